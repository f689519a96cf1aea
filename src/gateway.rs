use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::WeavingConfig;
use crate::error::{Error, WeavingError};
use crate::execution::{RequestContext, execute};
use crate::query::parse_document;
use crate::response::{ExecutionResult, GraphQLError};
use crate::schema::Schema;
use crate::weave::weave_schema_with_errors;

/// The body of a GraphQL POST request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(default)]
    pub operation_name: Option<String>,
    /// Forwarded to HTTP endpoints.
    #[serde(skip)]
    pub auth_headers: Option<HashMap<String, String>>,
}

/// Serves client requests against a woven schema.
pub struct Gateway {
    schema: RwLock<Arc<Schema>>,
}

impl Gateway {
    pub fn new(schema: Schema) -> Self {
        Gateway {
            schema: RwLock::new(Arc::new(schema)),
        }
    }

    /// Weaves `config` and serves the result. Recoverable errors are logged
    /// and returned next to the gateway.
    pub async fn weave(config: WeavingConfig) -> Result<(Self, Vec<WeavingError>), Error> {
        let result = weave_schema_with_errors(config).await?;
        for error in &result.errors {
            tracing::warn!(error = %error, "endpoint left out of the woven schema");
        }
        Ok((Gateway::new(result.schema), result.errors))
    }

    pub async fn schema(&self) -> Arc<Schema> {
        self.schema.read().await.clone()
    }

    /// Swaps the served schema; requests in flight finish on the old one.
    pub async fn replace_schema(&self, schema: Schema) {
        *self.schema.write().await = Arc::new(schema);
    }

    pub async fn process_request(&self, request: GraphQLRequest) -> ExecutionResult {
        tracing::debug!(operation = ?request.operation_name, "processing request");
        let document = match parse_document(&request.query) {
            Ok(document) => document,
            Err(e) => return ExecutionResult::from_errors(vec![GraphQLError::new(e.to_string())]),
        };
        let variables = match request.variables {
            Some(Value::Object(variables)) => variables,
            None | Some(Value::Null) => Map::new(),
            Some(_) => {
                return ExecutionResult::from_errors(vec![GraphQLError::new(
                    "variables must be an object",
                )]);
            }
        };
        let context = RequestContext::with_headers(request.auth_headers.unwrap_or_default());

        let schema = self.schema().await;
        execute(
            &schema,
            &document,
            request.operation_name.as_deref(),
            &variables,
            &context,
        )
        .await
    }
}
