//! The weaving pipeline: per-endpoint modules run before the schemas are
//! merged, global modules run after. Each module may also rewrite the
//! queries sent to an endpoint, in the reverse of the order it built the
//! schema in.

mod abstract_types;
mod additional_metadata;
mod default_resolvers;
mod errors;
mod extended_introspection;
mod join;
mod links;
mod namespace;
mod proxy_resolvers;
mod type_prefix;

pub use abstract_types::AbstractTypesModule;
pub use additional_metadata::AdditionalMetadataModule;
pub use default_resolvers::DefaultResolversModule;
pub use errors::{add_error_field, placeholder_schema};
pub use extended_introspection::ExtendedIntrospectionModule;
pub use join::JoinModule;
pub use links::LinksModule;
pub use namespace::NamespaceModule;
pub use proxy_resolvers::ProxyResolversModule;
pub use type_prefix::TypePrefixModule;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::config::EndpointConfig;
use crate::error::{Error, FieldError};
use crate::extended::{ExtendedSchema, FieldMetadataMap, metadata_key};
use crate::query::Query;
use crate::schema::{Schema, merge_schemas};
use crate::upstream::Upstream;

/// One step of the pipeline. All hooks default to passing their input on.
#[allow(unused_variables)]
pub trait PipelineModule: Send + Sync {
    fn name(&self) -> &'static str;

    fn transform_extended_schema(&mut self, schema: ExtendedSchema) -> Result<ExtendedSchema, Error> {
        let ExtendedSchema {
            schema,
            field_metadata,
        } = schema;
        Ok(ExtendedSchema::new(self.transform_schema(schema)?, field_metadata))
    }

    fn transform_schema(&mut self, schema: Schema) -> Result<Schema, Error> {
        Ok(schema)
    }

    fn transform_query(&self, query: Query) -> Result<Query, FieldError> {
        Ok(query)
    }
}

/// Filled once the pipeline is complete. Resolvers created while the schema
/// is built reach the query side of the pipeline through it.
pub type QueryPipelineSlot = Arc<OnceLock<QueryPipeline>>;

/// The query side of a finished pipeline.
pub struct QueryPipeline {
    endpoints: Vec<Vec<Box<dyn PipelineModule>>>,
    post_merge: Vec<Box<dyn PipelineModule>>,
}

impl QueryPipeline {
    /// Rewrites a query against the woven schema into one the endpoint
    /// understands: post-merge modules first, then the endpoint's own
    /// modules, each list in reverse.
    pub fn process_query(&self, endpoint: usize, query: Query) -> Result<Query, FieldError> {
        let pre_merge = self
            .endpoints
            .get(endpoint)
            .ok_or_else(|| FieldError::new(format!("no pipeline for endpoint {}", endpoint)))?;
        let mut query = query;
        for module in self.post_merge.iter().rev().chain(pre_merge.iter().rev()) {
            query = module.transform_query(query)?;
        }
        Ok(query)
    }
}

/// Builds the woven schema from the schemas of the endpoints.
pub struct Pipeline {
    endpoints: Vec<Vec<Box<dyn PipelineModule>>>,
    slot: QueryPipelineSlot,
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline {
            endpoints: Vec::new(),
            slot: Arc::new(OnceLock::new()),
        }
    }

    /// Runs the pre-merge modules for one endpoint.
    pub fn process_endpoint(
        &mut self,
        config: &EndpointConfig,
        upstream: Arc<dyn Upstream>,
        schema: ExtendedSchema,
    ) -> Result<ExtendedSchema, Error> {
        let index = self.endpoints.len();
        let mut modules: Vec<Box<dyn PipelineModule>> = vec![Box::new(AdditionalMetadataModule::new(
            config.field_metadata.clone(),
        ))];
        if let Some(prefix) = &config.type_prefix {
            modules.push(Box::new(TypePrefixModule::new(prefix.clone())));
        }
        if let Some(namespace) = &config.namespace {
            modules.push(Box::new(NamespaceModule::new(namespace.clone())));
        }
        modules.push(Box::new(ProxyResolversModule::new(
            upstream,
            index,
            self.slot.clone(),
            config.namespace.clone(),
        )));
        modules.push(Box::new(DefaultResolversModule));
        modules.push(Box::new(AbstractTypesModule::new(config.type_prefix.clone())));

        let schema = run_modules(&mut modules, schema)?;
        self.endpoints.push(modules);
        Ok(schema)
    }

    /// Merges the processed endpoint schemas, runs the post-merge modules and
    /// completes the query side of the pipeline.
    pub fn finish(self, schemas: Vec<ExtendedSchema>) -> Result<ExtendedSchema, Error> {
        let merged = merge_extended_schemas(schemas)?;
        let mut post_merge: Vec<Box<dyn PipelineModule>> = vec![
            Box::new(LinksModule::new()),
            Box::new(JoinModule::new()),
            Box::new(ExtendedIntrospectionModule),
        ];
        let woven = run_modules(&mut post_merge, merged)?;

        let query_pipeline = QueryPipeline {
            endpoints: self.endpoints,
            post_merge,
        };
        if self.slot.set(query_pipeline).is_err() {
            return Err(Error::Schema("pipeline was finished twice".to_string()));
        }
        Ok(woven)
    }
}

fn run_modules(
    modules: &mut [Box<dyn PipelineModule>],
    schema: ExtendedSchema,
) -> Result<ExtendedSchema, Error> {
    let mut schema = schema;
    for module in modules.iter_mut() {
        tracing::debug!(module = module.name(), "applying pipeline module");
        schema = module.transform_extended_schema(schema)?;
    }
    Ok(schema)
}

/// Merges schemas and concatenates their metadata. Metadata of root fields is
/// re-keyed to the merged root type names.
pub fn merge_extended_schemas(schemas: Vec<ExtendedSchema>) -> Result<ExtendedSchema, Error> {
    let mut field_metadata = FieldMetadataMap::new();
    let mut plain = Vec::with_capacity(schemas.len());
    for ExtendedSchema {
        schema,
        field_metadata: metadata,
    } in schemas
    {
        let root_names: HashMap<&str, &str> = schema
            .root_types()
            .into_iter()
            .map(|(kind, name)| (name, kind.default_type_name()))
            .collect();
        for (key, entry) in metadata {
            let key = match key.split_once('.') {
                Some((type_name, field_name)) => match root_names.get(type_name) {
                    Some(root) => metadata_key(root, field_name),
                    None => key,
                },
                None => key,
            };
            field_metadata.insert(key, entry);
        }
        plain.push(schema);
    }
    Ok(ExtendedSchema::new(merge_schemas(plain)?, field_metadata))
}

/// `nationality` -> `Nationality`.
pub(crate) fn upper_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extended::{FieldMetadata, LinkConfig};
    use pretty_assertions::assert_eq;

    #[test]
    fn merging_rekeys_metadata_of_renamed_roots() {
        let schema = Schema::from_sdl(
            "schema { query: RootQuery } type Person { id: ID } type RootQuery { person: Person }",
        )
        .unwrap();
        let mut metadata = FieldMetadataMap::new();
        let entry = FieldMetadata {
            link: Some(LinkConfig {
                field: "people".to_string(),
                argument: "id".to_string(),
                ..Default::default()
            }),
            join: None,
        };
        metadata.insert("RootQuery.person".to_string(), entry.clone());
        metadata.insert("Person.id".to_string(), entry.clone());

        let merged = merge_extended_schemas(vec![ExtendedSchema::new(schema, metadata)]).unwrap();

        assert_eq!(
            merged.field_metadata.keys().collect::<Vec<_>>(),
            vec!["Query.person", "Person.id"]
        );
        assert!(merged.schema.field("Query", "person").is_some());
    }

    #[test]
    fn upper_first_handles_empty_names() {
        assert_eq!(upper_first("geo"), "Geo");
        assert_eq!(upper_first(""), "");
    }
}
