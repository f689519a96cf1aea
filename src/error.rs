use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::response::{GraphQLError, Location, PathSegment};

/// Fatal errors. These indicate a misconfigured rule, link or join, or an
/// unusable schema, and are never caught by a pipeline stage.
#[derive(Debug, Error)]
pub enum Error {
    #[error("duplicate field `{field_name}` on type `{type_name}`")]
    DuplicateField {
        type_name: String,
        field_name: String,
    },

    #[error("duplicate type `{0}`")]
    DuplicateType(String),

    #[error("type `{0}` not found")]
    TypeNotFound(String),

    #[error("invalid link on `{field}`: {reason}")]
    InvalidLink { field: String, reason: String },

    #[error("invalid join on `{field}`: {reason}")]
    InvalidJoin { field: String, reason: String },

    #[error("invalid schema: {0}")]
    Schema(String),

    #[error("failed to parse {what}: {message}")]
    Parse { what: &'static str, message: String },

    #[error("failed to load configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Weaving(#[from] WeavingError),
}

/// Identifies the endpoint a [`WeavingError`] is attributed to.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_prefix: Option<String>,
}

impl EndpointInfo {
    pub fn describe(&self) -> String {
        self.identifier
            .as_ref()
            .or(self.namespace.as_ref())
            .or(self.url.as_ref())
            .cloned()
            .unwrap_or_else(|| "<anonymous endpoint>".to_string())
    }
}

/// A recoverable composition error: one upstream failed to provide its
/// schema or metadata.
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct WeavingError {
    pub message: String,
    pub endpoint: Option<EndpointInfo>,
    pub original_error: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl WeavingError {
    pub fn new(message: impl Into<String>, endpoint: Option<EndpointInfo>) -> Self {
        WeavingError {
            message: message.into(),
            endpoint,
            original_error: None,
        }
    }

    pub fn with_original_error(
        mut self,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.original_error = Some(Arc::new(error));
        self
    }
}

/// Failure of one call to an upstream.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} responded with status {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("malformed response from {url}: {source}")]
    MalformedResponse {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Execution(String),
}

/// An error raised while resolving one field.
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct FieldError {
    pub message: String,
    pub locations: Vec<Location>,
    pub path: Option<Vec<PathSegment>>,
    pub extensions: Option<Value>,
    pub original_error: Option<Arc<UpstreamError>>,
}

impl FieldError {
    pub fn new(message: impl Into<String>) -> Self {
        FieldError {
            message: message.into(),
            locations: Vec::new(),
            path: None,
            extensions: None,
            original_error: None,
        }
    }

    pub fn from_graphql_error(error: &GraphQLError) -> Self {
        FieldError {
            message: error.message.clone(),
            locations: error.locations.clone(),
            path: error.path.clone(),
            extensions: error.extensions.clone(),
            original_error: error.original_error.clone(),
        }
    }

    /// Condenses several errors reported for the same position into one.
    pub fn from_graphql_errors(errors: &[GraphQLError]) -> Self {
        match errors {
            [single] => FieldError::from_graphql_error(single),
            _ => {
                let message = errors
                    .iter()
                    .map(|error| error.message.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                let mut error = FieldError::new(message);
                error.locations = errors
                    .iter()
                    .flat_map(|error| error.locations.iter().copied())
                    .collect();
                error
            }
        }
    }

    /// Serialized form attached at `path`. Locations carried by the error win
    /// over the location of the field being resolved.
    pub fn to_graphql_error(&self, path: Vec<PathSegment>, locations: Vec<Location>) -> GraphQLError {
        GraphQLError {
            message: self.message.clone(),
            locations: if self.locations.is_empty() {
                locations
            } else {
                self.locations.clone()
            },
            path: Some(path),
            extensions: self.extensions.clone(),
            original_error: self.original_error.clone(),
        }
    }
}

impl From<UpstreamError> for FieldError {
    fn from(error: UpstreamError) -> Self {
        FieldError {
            message: error.to_string(),
            locations: Vec::new(),
            path: None,
            extensions: None,
            original_error: Some(Arc::new(error)),
        }
    }
}

impl From<Error> for FieldError {
    fn from(error: Error) -> Self {
        FieldError::new(error.to_string())
    }
}
