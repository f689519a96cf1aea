//! Entry points: fetch the schemas of all endpoints, run them through the
//! pipeline and publish the woven schema.

use futures::future::join_all;
use std::sync::Arc;

use crate::config::{EndpointConfig, EndpointSource, WeavingConfig};
use crate::error::{Error, WeavingError};
use crate::extended::{ExtendedSchema, fetch_extended_schema};
use crate::pipeline::{Pipeline, add_error_field, placeholder_schema};
use crate::schema::Schema;
use crate::upstream::{HttpUpstream, LocalUpstream, Upstream};

/// A woven schema together with the recoverable errors met while weaving it.
#[derive(Clone, Debug)]
pub struct WeavingResult {
    pub schema: Schema,
    pub errors: Vec<WeavingError>,
    pub has_errors: bool,
}

/// Weaves the configured endpoints into one schema. Recoverable errors are
/// handled according to `config.error_handling`; with a continuing mode they
/// are dropped, use [`weave_schema_with_errors`] to inspect them.
pub async fn weave_schema(config: WeavingConfig) -> Result<Schema, Error> {
    let result = weave_schema_with_errors(config).await?;
    Ok(result.schema)
}

pub async fn weave_schema_with_errors(config: WeavingConfig) -> Result<WeavingResult, Error> {
    let mode = config.error_handling;
    let client = reqwest::Client::new();
    let upstreams: Vec<Arc<dyn Upstream>> = config
        .endpoints
        .iter()
        .map(|endpoint| create_upstream(endpoint, &client))
        .collect();

    tracing::info!(endpoints = config.endpoints.len(), "fetching endpoint schemas");
    let fetched = join_all(upstreams.iter().zip(&config.endpoints).map(
        |(upstream, endpoint)| async move {
            fetch_extended_schema(upstream.as_ref())
                .await
                .map_err(|mut error| {
                    error.endpoint = Some(endpoint.endpoint_info());
                    error
                })
        },
    ))
    .await;

    let mut pipeline = Pipeline::new();
    let mut schemas = Vec::with_capacity(fetched.len());
    let mut errors = Vec::new();
    for ((endpoint, upstream), result) in config.endpoints.iter().zip(upstreams).zip(fetched) {
        match result {
            Ok(schema) => {
                tracing::debug!(endpoint = %endpoint.endpoint_info().describe(), "processing endpoint");
                schemas.push(pipeline.process_endpoint(endpoint, upstream, schema)?);
            }
            Err(error) if mode.continues() => {
                tracing::warn!(
                    endpoint = %endpoint.endpoint_info().describe(),
                    error = %error,
                    "leaving out endpoint"
                );
                if let (true, Some(namespace)) = (mode.adds_placeholders(), &endpoint.namespace) {
                    schemas.push(ExtendedSchema::without_metadata(placeholder_schema(
                        namespace, &error,
                    )));
                }
                errors.push(error);
            }
            Err(error) => return Err(Error::Weaving(error)),
        }
    }

    let mut schema = pipeline.finish(schemas)?.schema;
    if mode.reports_in_schema() {
        add_error_field(&mut schema, &errors)?;
    }
    tracing::info!(errors = errors.len(), "schema woven");
    Ok(WeavingResult {
        schema,
        has_errors: !errors.is_empty(),
        errors,
    })
}

fn create_upstream(endpoint: &EndpointConfig, client: &reqwest::Client) -> Arc<dyn Upstream> {
    match &endpoint.source {
        EndpointSource::Url(url) => Arc::new(HttpUpstream::with_client(url.clone(), client.clone())),
        EndpointSource::Schema(schema) => Arc::new(LocalUpstream::new(schema.clone())),
        EndpointSource::Client(upstream) => upstream.clone(),
    }
}
