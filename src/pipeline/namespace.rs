use serde_json::{Map, Value};
use std::collections::HashMap;

use super::{PipelineModule, upper_first};
use crate::error::{Error, FieldError};
use crate::execution::resolver_fn;
use crate::extended::{ExtendedSchema, transform_extended_schema};
use crate::query::{Query, Selection, SelectionSet, rename_types};
use crate::schema::{FieldDef, ObjectType, OperationKind, TypeDef, TypeRef};
use crate::transform::{SchemaTransformer, TransformContext};

/// Moves the root fields of an endpoint beneath a single field.
///
/// `{ a b }` on the endpoint becomes `{ ns { a b } }` on the woven schema:
/// each root type is renamed to `<Ns><Root>` and a fresh root type with the
/// field `ns` takes its place. The namespace field resolves to an empty
/// object; the fields beneath it forward their own selections. Outgoing
/// queries are unwrapped again.
pub struct NamespaceModule {
    namespace: String,
    /// Renamed root type -> root type name the endpoint knows.
    original_roots: HashMap<String, String>,
}

impl NamespaceModule {
    pub fn new(namespace: impl Into<String>) -> Self {
        NamespaceModule {
            namespace: namespace.into(),
            original_roots: HashMap::new(),
        }
    }
}

impl PipelineModule for NamespaceModule {
    fn name(&self) -> &'static str {
        "namespace"
    }

    fn transform_extended_schema(&mut self, schema: ExtendedSchema) -> Result<ExtendedSchema, Error> {
        let mut rules = NamespaceRules {
            type_prefix: upper_first(&self.namespace),
            original_roots: HashMap::new(),
        };
        let mut result = transform_extended_schema(&schema, &mut rules)?;

        let roots: Vec<(OperationKind, String)> = result
            .schema
            .root_types()
            .into_iter()
            .map(|(kind, name)| (kind, name.to_string()))
            .collect();
        for (kind, namespaced_root) in roots {
            let root_name = kind.default_type_name();
            let root = ObjectType::new(root_name).with_field(
                FieldDef::new(self.namespace.clone(), TypeRef::named(namespaced_root))
                    .with_resolver(resolver_fn(|_, _| Ok(Value::Object(Map::new())))),
            );
            result.schema.add_type(TypeDef::Object(root))?;
            match kind {
                OperationKind::Query => result.schema.query_type = root_name.to_string(),
                OperationKind::Mutation => result.schema.mutation_type = Some(root_name.to_string()),
                OperationKind::Subscription => {
                    result.schema.subscription_type = Some(root_name.to_string())
                }
            }
        }
        self.original_roots = rules.original_roots;
        Ok(result)
    }

    fn transform_query(&self, mut query: Query) -> Result<Query, FieldError> {
        if let Some(root) = query.root_selection_set_mut() {
            unwrap_namespace(root, &self.namespace);
        }
        rename_types(&mut query.document, &|name| self.original_roots.get(name).cloned());
        Ok(query)
    }
}

/// Replaces each selection of the namespace field by what it selects.
fn unwrap_namespace(selection_set: &mut SelectionSet, namespace: &str) {
    let items = std::mem::take(&mut selection_set.items);
    for selection in items {
        match selection {
            Selection::Field(field) if field.name == namespace => {
                selection_set.items.extend(field.selection_set.items);
            }
            Selection::InlineFragment(mut inline) => {
                unwrap_namespace(&mut inline.selection_set, namespace);
                selection_set.items.push(Selection::InlineFragment(inline));
            }
            other => selection_set.items.push(other),
        }
    }
}

struct NamespaceRules {
    type_prefix: String,
    original_roots: HashMap<String, String>,
}

impl SchemaTransformer for NamespaceRules {
    fn transform_object_type(&mut self, config: &mut ObjectType, ctx: &TransformContext<'_>) -> Result<(), Error> {
        if ctx.old_schema().is_root_type(&config.name) {
            let renamed = format!("{}{}", self.type_prefix, config.name);
            self.original_roots
                .insert(renamed.clone(), std::mem::replace(&mut config.name, renamed));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use pretty_assertions::assert_eq;

    fn namespaced() -> (NamespaceModule, ExtendedSchema) {
        let schema = Schema::from_sdl(
            "type Country { code: String } type Query { countries: [Country] } type Mutation { rename(code: String): Country }",
        )
        .unwrap();
        let mut module = NamespaceModule::new("geo");
        let result = module
            .transform_extended_schema(ExtendedSchema::without_metadata(schema))
            .unwrap();
        (module, result)
    }

    #[test]
    fn root_fields_move_beneath_the_namespace_field() {
        let (_, result) = namespaced();
        let schema = &result.schema;

        assert_eq!(schema.query_type, "Query");
        assert_eq!(schema.field("Query", "geo").unwrap().ty, TypeRef::named("GeoQuery"));
        assert!(schema.field("GeoQuery", "countries").is_some());
        assert_eq!(schema.mutation_type.as_deref(), Some("Mutation"));
        assert_eq!(
            schema.field("Mutation", "geo").unwrap().ty,
            TypeRef::named("GeoMutation")
        );
    }

    #[test]
    fn outgoing_queries_are_unwrapped() {
        let (module, _) = namespaced();
        let query = Query::parse("{ g: geo { countries { code } ... on GeoQuery { more: countries { code } } } }").unwrap();

        let rewritten = module.transform_query(query).unwrap();
        let expected = Query::parse("{ countries { code } ... on Query { more: countries { code } } }").unwrap();

        assert_eq!(rewritten.print(), expected.print());
    }
}
