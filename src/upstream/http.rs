use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::Upstream;
use crate::error::UpstreamError;
use crate::execution::RequestContext;
use crate::query::Document;
use crate::response::ExecutionResult;

/// A GraphQL service reached over HTTP POST.
pub struct HttpUpstream {
    client: reqwest::Client,
    url: String,
}

impl HttpUpstream {
    pub fn with_client(url: impl Into<String>, client: reqwest::Client) -> Self {
        HttpUpstream {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn execute(
        &self,
        document: &Document,
        variables: &Map<String, Value>,
        context: &RequestContext,
        is_introspection: bool,
    ) -> Result<ExecutionResult, UpstreamError> {
        let request_body = json!({
            "query": document.to_string(),
            "variables": variables,
        });
        tracing::debug!(url = %self.url, is_introspection, "sending query upstream");

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&request_body);
        // Introspection runs at startup, outside of any client request.
        if !is_introspection {
            for (name, value) in &context.headers {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        let response = request.send().await.map_err(|source| UpstreamError::Http {
            url: self.url.clone(),
            source,
        })?;
        let status = response.status();
        let body = response.text().await.map_err(|source| UpstreamError::Http {
            url: self.url.clone(),
            source,
        })?;
        if !status.is_success() {
            return Err(UpstreamError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str::<ExecutionResult>(&body).map_err(|source| {
            UpstreamError::MalformedResponse {
                url: self.url.clone(),
                source,
            }
        })
    }
}
