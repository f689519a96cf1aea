//! Weaves several GraphQL services into one schema.
//!
//! Each endpoint's schema is fetched by introspection, optionally namespaced
//! or type-prefixed, merged with the others and extended with links and joins
//! between them. Queries against the woven schema are split up, rewritten for
//! each endpoint and forwarded; errors from the endpoints are relocated to
//! the fields they belong to.

pub mod config;
pub mod error;
pub mod errors_in_data;
pub mod execution;
pub mod extended;
pub mod gateway;
pub mod pipeline;
pub mod query;
pub mod response;
pub mod schema;
pub mod transform;
pub mod upstream;
pub mod weave;

pub use config::{EndpointConfig, EndpointSource, WeavingConfig, WeavingErrorHandlingMode};
pub use error::{EndpointInfo, Error, FieldError, UpstreamError, WeavingError};
pub use gateway::{Gateway, GraphQLRequest};
pub use response::{ExecutionResult, GraphQLError};
pub use schema::Schema;
pub use upstream::{HttpUpstream, LocalUpstream, Upstream};
pub use weave::{WeavingResult, weave_schema, weave_schema_with_errors};
