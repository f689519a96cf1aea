use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::{EndpointInfo, Error};
use crate::extended::FieldMetadataMap;
use crate::schema::Schema;
use crate::upstream::Upstream;

/// How recoverable errors of single endpoints are handled while weaving.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WeavingErrorHandlingMode {
    /// The first error aborts weaving.
    #[default]
    Throw,
    /// Failing endpoints are left out; errors are returned with the schema.
    Continue,
    /// Like `Continue`, and the errors are listed in a root `_errors` field.
    ContinueAndReportInSchema,
    /// Like `ContinueAndReportInSchema`, and a failed namespaced endpoint
    /// keeps its namespace field, exposing the error in `_error`.
    ContinueAndAddPlaceholders,
}

impl WeavingErrorHandlingMode {
    pub fn continues(self) -> bool {
        self != WeavingErrorHandlingMode::Throw
    }

    pub fn reports_in_schema(self) -> bool {
        matches!(
            self,
            WeavingErrorHandlingMode::ContinueAndReportInSchema
                | WeavingErrorHandlingMode::ContinueAndAddPlaceholders
        )
    }

    pub fn adds_placeholders(self) -> bool {
        self == WeavingErrorHandlingMode::ContinueAndAddPlaceholders
    }
}

/// Where an endpoint's schema comes from and where its queries go.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndpointSource {
    Url(String),
    /// A schema executed in-process.
    #[serde(skip)]
    Schema(Schema),
    #[serde(skip)]
    Client(Arc<dyn Upstream>),
}

impl fmt::Debug for EndpointSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointSource::Url(url) => f.debug_tuple("Url").field(url).finish(),
            EndpointSource::Schema(_) => f.write_str("Schema(..)"),
            EndpointSource::Client(_) => f.write_str("Client(..)"),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    #[serde(flatten)]
    pub source: EndpointSource,
    /// Root fields of the endpoint are nested under a field of this name.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Prepended to the name of every type of the endpoint.
    #[serde(default)]
    pub type_prefix: Option<String>,
    /// Link and join configuration, added to what the endpoint publishes.
    #[serde(default)]
    pub field_metadata: FieldMetadataMap,
    #[serde(default)]
    pub identifier: Option<String>,
}

impl EndpointConfig {
    fn from_source(source: EndpointSource) -> Self {
        EndpointConfig {
            source,
            namespace: None,
            type_prefix: None,
            field_metadata: FieldMetadataMap::new(),
            identifier: None,
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::from_source(EndpointSource::Url(url.into()))
    }

    pub fn schema(schema: Schema) -> Self {
        Self::from_source(EndpointSource::Schema(schema))
    }

    pub fn client(client: Arc<dyn Upstream>) -> Self {
        Self::from_source(EndpointSource::Client(client))
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_type_prefix(mut self, type_prefix: impl Into<String>) -> Self {
        self.type_prefix = Some(type_prefix.into());
        self
    }

    pub fn with_field_metadata(mut self, field_metadata: FieldMetadataMap) -> Self {
        self.field_metadata = field_metadata;
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn endpoint_info(&self) -> EndpointInfo {
        EndpointInfo {
            identifier: self.identifier.clone(),
            url: match &self.source {
                EndpointSource::Url(url) => Some(url.clone()),
                _ => None,
            },
            namespace: self.namespace.clone(),
            type_prefix: self.type_prefix.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeavingConfig {
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub error_handling: WeavingErrorHandlingMode,
}

impl WeavingConfig {
    pub fn new(endpoints: Vec<EndpointConfig>) -> Self {
        WeavingConfig {
            endpoints,
            error_handling: WeavingErrorHandlingMode::default(),
        }
    }

    pub fn with_error_handling(mut self, mode: WeavingErrorHandlingMode) -> Self {
        self.error_handling = mode;
        self
    }

    pub fn from_yaml(source: &str) -> Result<Self, Error> {
        serde_yaml::from_str(source).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&source)
    }
}
