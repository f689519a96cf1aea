use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::{PipelineModule, QueryPipelineSlot};
use crate::error::{Error, FieldError};
use crate::errors_in_data::move_errors_to_data;
use crate::execution::{FieldResolver, RequestContext, ResolveInfo};
use crate::query::{Document, extract_query, map_location, parse_document};
use crate::response::ExecutionResult;
use crate::schema::Schema;
use crate::upstream::Upstream;

/// Resolves the root fields of an endpoint by forwarding the selection to
/// the endpoint. For a namespaced endpoint these are the fields beneath the
/// namespace field.
pub struct ProxyResolversModule {
    upstream: Arc<dyn Upstream>,
    endpoint: usize,
    pipeline: QueryPipelineSlot,
    namespace: Option<String>,
}

impl ProxyResolversModule {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        endpoint: usize,
        pipeline: QueryPipelineSlot,
        namespace: Option<String>,
    ) -> Self {
        ProxyResolversModule {
            upstream,
            endpoint,
            pipeline,
            namespace,
        }
    }
}

impl PipelineModule for ProxyResolversModule {
    fn name(&self) -> &'static str {
        "proxy-resolvers"
    }

    fn transform_schema(&mut self, mut schema: Schema) -> Result<Schema, Error> {
        let resolver: Arc<dyn FieldResolver> = Arc::new(ProxyResolver {
            upstream: self.upstream.clone(),
            endpoint: self.endpoint,
            pipeline: self.pipeline.clone(),
        });
        let roots: Vec<String> = schema
            .root_types()
            .into_iter()
            .filter_map(|(_, root)| match &self.namespace {
                Some(namespace) => schema
                    .field(root, namespace)
                    .map(|field| field.ty.named_type().to_string()),
                None => Some(root.to_string()),
            })
            .collect();
        for root in roots {
            if let Some(object) = schema.object_type_mut(&root) {
                for field in object.fields.values_mut() {
                    field.resolver = Some(resolver.clone());
                }
            }
        }
        Ok(schema)
    }
}

struct ProxyResolver {
    upstream: Arc<dyn Upstream>,
    endpoint: usize,
    pipeline: QueryPipelineSlot,
}

#[async_trait]
impl FieldResolver for ProxyResolver {
    async fn resolve(
        &self,
        _parent: &Value,
        _args: &Map<String, Value>,
        context: &RequestContext,
        info: &ResolveInfo<'_>,
    ) -> Result<Value, FieldError> {
        let pipeline = self
            .pipeline
            .get()
            .ok_or_else(|| FieldError::new("the schema is still being woven"))?;
        let query = pipeline.process_query(self.endpoint, extract_query(info)?)?;
        tracing::debug!(endpoint = self.endpoint, query = %query.print(), "forwarding query");

        let result = self
            .upstream
            .execute(&query.document, &query.variable_values, context, false)
            .await
            .inspect_err(|error| tracing::warn!(endpoint = self.endpoint, %error, "upstream call failed"))?;
        let result = move_errors_to_data(map_error_locations(result, &query.document));
        if !result.errors.is_empty() {
            return Err(FieldError::from_graphql_errors(&result.errors));
        }

        Ok(result
            .data
            .and_then(|data| data.get(info.response_key()).cloned())
            .unwrap_or(Value::Null))
    }
}

/// Points error locations, which refer to the printed query, back at the
/// client's document. Locations of nodes the client did not write are
/// dropped.
fn map_error_locations(mut result: ExecutionResult, sent: &Document) -> ExecutionResult {
    if result.errors.iter().all(|error| error.locations.is_empty()) {
        return result;
    }
    let reprinted = match parse_document(&sent.to_string()) {
        Ok(document) => Some(document),
        Err(error) => {
            tracing::warn!(%error, "cannot map error locations of a forwarded query");
            None
        }
    };
    for error in &mut result.errors {
        error.locations = match &reprinted {
            Some(reprinted) => error
                .locations
                .iter()
                .filter_map(|location| map_location(reprinted, sent, *location))
                .collect(),
            None => Vec::new(),
        };
    }
    result
}
