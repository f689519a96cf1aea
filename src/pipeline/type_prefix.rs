use std::collections::HashMap;

use super::PipelineModule;
use crate::error::{Error, FieldError};
use crate::extended::{ExtendedSchema, transform_extended_schema};
use crate::query::{Query, rename_types};
use crate::schema::{EnumType, InputObjectType, InterfaceType, ObjectType, ScalarType, UnionType};
use crate::transform::{SchemaTransformer, TransformContext};

/// Prepends a prefix to the name of every type of an endpoint except its
/// root types. Outgoing queries get the prefix stripped from type
/// conditions and variable types.
pub struct TypePrefixModule {
    prefix: String,
    /// Prefixed name -> name the endpoint knows.
    original_names: HashMap<String, String>,
}

impl TypePrefixModule {
    pub fn new(prefix: impl Into<String>) -> Self {
        TypePrefixModule {
            prefix: prefix.into(),
            original_names: HashMap::new(),
        }
    }
}

impl PipelineModule for TypePrefixModule {
    fn name(&self) -> &'static str {
        "type-prefix"
    }

    fn transform_extended_schema(&mut self, schema: ExtendedSchema) -> Result<ExtendedSchema, Error> {
        let mut rules = PrefixRules {
            prefix: &self.prefix,
            original_names: HashMap::new(),
        };
        let prefixed = transform_extended_schema(&schema, &mut rules)?;
        self.original_names = rules.original_names;
        Ok(prefixed)
    }

    fn transform_query(&self, mut query: Query) -> Result<Query, FieldError> {
        rename_types(&mut query.document, &|name| self.original_names.get(name).cloned());
        Ok(query)
    }
}

struct PrefixRules<'p> {
    prefix: &'p str,
    original_names: HashMap<String, String>,
}

impl PrefixRules<'_> {
    fn rename(&mut self, name: &mut String, ctx: &TransformContext<'_>) {
        if ctx.old_schema().is_root_type(name) {
            return;
        }
        let prefixed = format!("{}{}", self.prefix, name);
        self.original_names.insert(prefixed.clone(), std::mem::replace(name, prefixed));
    }
}

impl SchemaTransformer for PrefixRules<'_> {
    fn transform_scalar_type(&mut self, config: &mut ScalarType, ctx: &TransformContext<'_>) -> Result<(), Error> {
        self.rename(&mut config.name, ctx);
        Ok(())
    }

    fn transform_object_type(&mut self, config: &mut ObjectType, ctx: &TransformContext<'_>) -> Result<(), Error> {
        self.rename(&mut config.name, ctx);
        Ok(())
    }

    fn transform_interface_type(
        &mut self,
        config: &mut InterfaceType,
        ctx: &TransformContext<'_>,
    ) -> Result<(), Error> {
        self.rename(&mut config.name, ctx);
        Ok(())
    }

    fn transform_union_type(&mut self, config: &mut UnionType, ctx: &TransformContext<'_>) -> Result<(), Error> {
        self.rename(&mut config.name, ctx);
        Ok(())
    }

    fn transform_enum_type(&mut self, config: &mut EnumType, ctx: &TransformContext<'_>) -> Result<(), Error> {
        self.rename(&mut config.name, ctx);
        Ok(())
    }

    fn transform_input_object_type(
        &mut self,
        config: &mut InputObjectType,
        ctx: &TransformContext<'_>,
    ) -> Result<(), Error> {
        self.rename(&mut config.name, ctx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extended::{FieldMetadata, FieldMetadataMap, LinkConfig};
    use crate::schema::{Schema, TypeRef};
    use pretty_assertions::assert_eq;

    fn source() -> ExtendedSchema {
        let schema = Schema::from_sdl(
            r#"
            interface Named { name: String }
            type Country implements Named { name: String, code: String }
            input CountryFilter { code_in: [String] }
            type Query { countries(filter: CountryFilter): [Country] }
            "#,
        )
        .unwrap();
        let mut metadata = FieldMetadataMap::new();
        metadata.insert(
            "Country.code".to_string(),
            FieldMetadata {
                link: Some(LinkConfig {
                    field: "countries".to_string(),
                    argument: "filter.code_in".to_string(),
                    ..Default::default()
                }),
                join: None,
            },
        );
        ExtendedSchema::new(schema, metadata)
    }

    #[test]
    fn prefixes_every_type_but_the_roots() {
        let mut module = TypePrefixModule::new("Geo");
        let result = module.transform_extended_schema(source()).unwrap();

        assert!(result.schema.object_type("GeoCountry").is_some());
        assert!(result.schema.get_type("GeoNamed").is_some());
        assert_eq!(result.schema.query_type, "Query");
        assert_eq!(
            result.schema.field("Query", "countries").unwrap().args["filter"].ty,
            TypeRef::named("GeoCountryFilter")
        );
        assert_eq!(result.field_metadata.len(), 1);
        assert!(result.field_metadata("GeoCountry", "code").is_some());
    }

    #[test]
    fn outgoing_queries_lose_the_prefix() {
        let mut module = TypePrefixModule::new("Geo");
        module.transform_extended_schema(source()).unwrap();
        let query = Query::parse(
            "query($f: GeoCountryFilter) { countries(filter: $f) { ... on GeoNamed { name } ...C } } fragment C on GeoCountry { code }",
        )
        .unwrap();

        let rewritten = module.transform_query(query).unwrap().print();

        assert!(rewritten.contains("$f: CountryFilter"));
        assert!(rewritten.contains("... on Named"));
        assert!(rewritten.contains("fragment C on Country"));
        assert!(!rewritten.contains("Geo"));
    }
}
