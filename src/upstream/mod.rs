//! The services a woven schema forwards to.

mod http;
mod local;

pub use http::HttpUpstream;
pub use local::LocalUpstream;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::UpstreamError;
use crate::execution::RequestContext;
use crate::query::Document;
use crate::response::ExecutionResult;

/// Anything that executes GraphQL documents.
///
/// GraphQL errors are part of the returned [`ExecutionResult`]; `Err` is
/// reserved for failures to obtain a result at all.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn execute(
        &self,
        document: &Document,
        variables: &Map<String, Value>,
        context: &RequestContext,
        is_introspection: bool,
    ) -> Result<ExecutionResult, UpstreamError>;
}
