use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::Upstream;
use crate::error::UpstreamError;
use crate::execution::{RequestContext, execute};
use crate::query::{Document, parse_document};
use crate::response::ExecutionResult;
use crate::schema::Schema;

/// A schema executed in-process.
///
/// The document is printed and parsed again before execution, so error
/// locations refer to the printed text exactly as they would for a remote
/// service.
#[derive(Clone)]
pub struct LocalUpstream {
    schema: Arc<Schema>,
}

impl LocalUpstream {
    pub fn new(schema: Schema) -> Self {
        LocalUpstream {
            schema: Arc::new(schema),
        }
    }
}

#[async_trait]
impl Upstream for LocalUpstream {
    async fn execute(
        &self,
        document: &Document,
        variables: &Map<String, Value>,
        context: &RequestContext,
        _is_introspection: bool,
    ) -> Result<ExecutionResult, UpstreamError> {
        let reparsed = parse_document(&document.to_string())
            .map_err(|e| UpstreamError::Execution(e.to_string()))?;
        let local_context = RequestContext::with_headers(context.headers.clone());
        Ok(execute(&self.schema, &reparsed, None, variables, &local_context).await)
    }
}
