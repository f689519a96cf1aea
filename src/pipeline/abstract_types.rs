use serde_json::Value;
use std::sync::Arc;

use super::PipelineModule;
use crate::error::{Error, FieldError};
use crate::execution::TypeResolver;
use crate::query::{Query, Selection, synthetic_field, visit_fields};
use crate::schema::{Schema, TypeDef};

const TYPENAME_FIELD: &str = "__typename";

/// Resolves interfaces and unions of an endpoint from the `__typename` the
/// endpoint reports, and makes sure outgoing queries ask for it.
pub struct AbstractTypesModule {
    type_prefix: Option<String>,
    /// The endpoint's schema as built so far, to find abstract-typed
    /// selections in outgoing queries.
    schema: Option<Schema>,
}

impl AbstractTypesModule {
    pub fn new(type_prefix: Option<String>) -> Self {
        AbstractTypesModule {
            type_prefix,
            schema: None,
        }
    }
}

impl PipelineModule for AbstractTypesModule {
    fn name(&self) -> &'static str {
        "abstract-types"
    }

    fn transform_schema(&mut self, mut schema: Schema) -> Result<Schema, Error> {
        let resolver: Arc<dyn TypeResolver> = Arc::new(TypenameResolver {
            type_prefix: self.type_prefix.clone().unwrap_or_default(),
        });
        for type_def in schema.types.values_mut() {
            match type_def {
                TypeDef::Interface(interface) => interface.resolve_type = Some(resolver.clone()),
                TypeDef::Union(union) => union.resolve_type = Some(resolver.clone()),
                _ => {}
            }
        }
        self.schema = Some(schema.without_resolvers());
        Ok(schema)
    }

    fn transform_query(&self, mut query: Query) -> Result<Query, FieldError> {
        let Some(schema) = &self.schema else {
            return Ok(query);
        };
        visit_fields(&mut query.document, schema, &mut |field, visit| {
            let is_abstract = visit
                .field_def
                .and_then(|def| schema.get_type(def.ty.named_type()))
                .is_some_and(TypeDef::is_abstract);
            let selects_typename = field.selection_set.items.iter().any(
                |selection| matches!(selection, Selection::Field(f) if f.alias.is_none() && f.name == TYPENAME_FIELD),
            );
            if is_abstract && !selects_typename {
                field
                    .selection_set
                    .items
                    .push(Selection::Field(synthetic_field(TYPENAME_FIELD)));
            }
        });
        Ok(query)
    }
}

/// Maps the `__typename` of a forwarded value to the woven type name.
struct TypenameResolver {
    type_prefix: String,
}

impl TypeResolver for TypenameResolver {
    fn resolve_type(&self, value: &Value, schema: &Schema, abstract_type: &str) -> Option<String> {
        let reported = value.get(TYPENAME_FIELD)?.as_str()?;
        let prefixed = format!("{}{}", self.type_prefix, reported);
        let possible = schema.possible_types(abstract_type);
        [prefixed.as_str(), reported]
            .into_iter()
            .find(|name| possible.contains(name))
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const SDL: &str = r#"
        interface GeoPlace { name: String }
        type GeoCity implements GeoPlace { name: String }
        type Query { place: GeoPlace, places: [GeoPlace] }
    "#;

    #[test]
    fn queries_ask_for_the_typename_of_abstract_selections() {
        let mut module = AbstractTypesModule::new(Some("Geo".to_string()));
        module.transform_schema(Schema::from_sdl(SDL).unwrap()).unwrap();

        let query = Query::parse("{ place { name } places { __typename name } }").unwrap();
        let rewritten = module.transform_query(query).unwrap();
        let expected = Query::parse("{ place { name __typename } places { __typename name } }").unwrap();

        assert_eq!(rewritten.print(), expected.print());
    }

    #[test]
    fn reported_names_get_the_prefix_back() {
        let mut module = AbstractTypesModule::new(Some("Geo".to_string()));
        let schema = module.transform_schema(Schema::from_sdl(SDL).unwrap()).unwrap();
        let Some(TypeDef::Interface(place)) = schema.get_type("GeoPlace") else {
            panic!("GeoPlace is not an interface");
        };
        let resolver = place.resolve_type.as_ref().unwrap();

        assert_eq!(
            resolver.resolve_type(&json!({"__typename": "City"}), &schema, "GeoPlace").as_deref(),
            Some("GeoCity")
        );
        assert_eq!(
            resolver.resolve_type(&json!({"__typename": "Town"}), &schema, "GeoPlace"),
            None
        );
    }
}
