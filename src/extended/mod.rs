//! Link and join configuration attached to fields, carried next to a schema
//! through every transformation pass.

mod introspection;

pub use introspection::{
    EXTENDED_INTROSPECTION_FIELD, add_extended_introspection, extended_introspection_query,
    fetch_extended_schema, parse_extended_introspection,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::schema::{
    DirectiveDef, EnumType, InputObjectType, InputValueDef, InterfaceType, ObjectType, ScalarType,
    Schema, TypeDef, UnionType,
};
use crate::transform::{
    FieldConfig, FieldConfigMap, FieldInfo, InputFieldInfo, SchemaTransformer, TransformContext,
    TypeInfo, transform_schema,
};

/// Resolves a field by querying another root field with the field's value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkConfig {
    /// Dotted path of the target field, starting at the query root.
    pub field: String,
    /// Dotted path of the argument the value is bound to.
    pub argument: String,
    #[serde(default)]
    pub batch_mode: bool,
    /// Field of the target objects holding the key they were found by. Lets
    /// batch results arrive in any order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_field: Option<String>,
    /// Keeps the key field as is and exposes the linked object under this
    /// name instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_field_name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinConfig {
    /// Field of the list items that carries the link to join.
    pub link_field: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<LinkConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<JoinConfig>,
}

impl FieldMetadata {
    pub fn is_empty(&self) -> bool {
        self.link.is_none() && self.join.is_none()
    }
}

/// Metadata by `"Type.field"`.
pub type FieldMetadataMap = IndexMap<String, FieldMetadata>;

pub fn metadata_key(type_name: &str, field_name: &str) -> String {
    format!("{}.{}", type_name, field_name)
}

/// A schema together with the metadata of its fields.
#[derive(Clone, Debug)]
pub struct ExtendedSchema {
    pub schema: Schema,
    pub field_metadata: FieldMetadataMap,
}

impl ExtendedSchema {
    pub fn new(schema: Schema, field_metadata: FieldMetadataMap) -> Self {
        ExtendedSchema {
            schema,
            field_metadata,
        }
    }

    pub fn without_metadata(schema: Schema) -> Self {
        ExtendedSchema::new(schema, FieldMetadataMap::new())
    }

    pub fn field_metadata(&self, type_name: &str, field_name: &str) -> Option<&FieldMetadata> {
        self.field_metadata.get(&metadata_key(type_name, field_name))
    }

    /// Adds `metadata`; entries for fields that already have metadata are
    /// replaced as a whole.
    pub fn with_field_metadata(mut self, metadata: &FieldMetadataMap) -> Self {
        for (key, entry) in metadata {
            self.field_metadata.insert(key.clone(), entry.clone());
        }
        self
    }
}

/// Runs `rules` over the schema and re-keys the metadata of every object
/// field to the field's new type and field name.
///
/// Before a field's rule runs, the field's metadata is attached to its
/// [`FieldConfig`]; whatever metadata the configs carry after the
/// `transform_fields` rule of their type is what the new map contains. Rules
/// can thus rename, add and drop fields together with their metadata.
/// Interface fields carry no metadata.
pub fn transform_extended_schema(
    schema: &ExtendedSchema,
    rules: &mut dyn SchemaTransformer,
) -> Result<ExtendedSchema, Error> {
    let mut propagator = MetadataPropagator {
        inner: rules,
        old_metadata: &schema.field_metadata,
        new_metadata: FieldMetadataMap::new(),
    };
    let new_schema = transform_schema(&schema.schema, &mut propagator)?;
    Ok(ExtendedSchema::new(new_schema, propagator.new_metadata))
}

struct MetadataPropagator<'r> {
    inner: &'r mut dyn SchemaTransformer,
    old_metadata: &'r FieldMetadataMap,
    new_metadata: FieldMetadataMap,
}

impl SchemaTransformer for MetadataPropagator<'_> {
    fn transform_scalar_type(&mut self, config: &mut ScalarType, ctx: &TransformContext<'_>) -> Result<(), Error> {
        self.inner.transform_scalar_type(config, ctx)
    }

    fn transform_object_type(&mut self, config: &mut ObjectType, ctx: &TransformContext<'_>) -> Result<(), Error> {
        self.inner.transform_object_type(config, ctx)
    }

    fn transform_interface_type(
        &mut self,
        config: &mut InterfaceType,
        ctx: &TransformContext<'_>,
    ) -> Result<(), Error> {
        self.inner.transform_interface_type(config, ctx)
    }

    fn transform_union_type(&mut self, config: &mut UnionType, ctx: &TransformContext<'_>) -> Result<(), Error> {
        self.inner.transform_union_type(config, ctx)
    }

    fn transform_enum_type(&mut self, config: &mut EnumType, ctx: &TransformContext<'_>) -> Result<(), Error> {
        self.inner.transform_enum_type(config, ctx)
    }

    fn transform_input_object_type(
        &mut self,
        config: &mut InputObjectType,
        ctx: &TransformContext<'_>,
    ) -> Result<(), Error> {
        self.inner.transform_input_object_type(config, ctx)
    }

    fn transform_field(
        &mut self,
        config: &mut FieldConfig,
        info: &FieldInfo<'_>,
        ctx: &mut TransformContext<'_>,
    ) -> Result<(), Error> {
        if let TypeDef::Object(old_type) = info.old_type {
            config.metadata = self
                .old_metadata
                .get(&metadata_key(&old_type.name, &info.old_field.name))
                .cloned();
        }
        self.inner.transform_field(config, info, ctx)
    }

    fn transform_fields(
        &mut self,
        fields: &mut FieldConfigMap,
        info: &TypeInfo<'_>,
        ctx: &mut TransformContext<'_>,
    ) -> Result<(), Error> {
        self.inner.transform_fields(fields, info, ctx)?;
        if matches!(info.old_type, TypeDef::Object(_)) {
            for config in fields.values() {
                if let Some(metadata) = config.metadata.as_ref().filter(|m| !m.is_empty()) {
                    self.new_metadata.insert(
                        metadata_key(info.new_type_name, &config.name),
                        metadata.clone(),
                    );
                }
            }
        }
        Ok(())
    }

    fn transform_input_field(
        &mut self,
        config: &mut InputValueDef,
        info: &InputFieldInfo<'_>,
        ctx: &mut TransformContext<'_>,
    ) -> Result<(), Error> {
        self.inner.transform_input_field(config, info, ctx)
    }

    fn transform_directive(
        &mut self,
        config: &mut DirectiveDef,
        ctx: &TransformContext<'_>,
    ) -> Result<(), Error> {
        self.inner.transform_directive(config, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn link(field: &str, argument: &str) -> FieldMetadata {
        FieldMetadata {
            link: Some(LinkConfig {
                field: field.to_string(),
                argument: argument.to_string(),
                ..Default::default()
            }),
            join: None,
        }
    }

    fn extended() -> ExtendedSchema {
        let schema = Schema::from_sdl(
            r#"
            interface Named { name: String }
            type Person implements Named { name: String, nationality: String, employer: String }
            type Query { people: [Person] }
            "#,
        )
        .unwrap();
        let mut metadata = FieldMetadataMap::new();
        metadata.insert("Person.nationality".to_string(), link("country", "code"));
        metadata.insert("Person.employer".to_string(), link("company", "id"));
        ExtendedSchema::new(schema, metadata)
    }

    struct RenameAll;

    impl SchemaTransformer for RenameAll {
        fn transform_object_type(&mut self, config: &mut ObjectType, _: &TransformContext<'_>) -> Result<(), Error> {
            if config.name != "Query" {
                config.name = format!("Ns{}", config.name);
            }
            Ok(())
        }

        fn transform_field(
            &mut self,
            config: &mut FieldConfig,
            _: &FieldInfo<'_>,
            _: &mut TransformContext<'_>,
        ) -> Result<(), Error> {
            config.name = format!("{}_", config.name);
            Ok(())
        }
    }

    #[test]
    fn renaming_keeps_every_entry_under_its_new_key() {
        let source = extended();
        let renamed = transform_extended_schema(&source, &mut RenameAll).unwrap();

        assert_eq!(renamed.field_metadata.len(), source.field_metadata.len());
        assert_eq!(
            renamed.field_metadata("NsPerson", "nationality_"),
            Some(&link("country", "code"))
        );
        assert_eq!(
            renamed.field_metadata("NsPerson", "employer_"),
            Some(&link("company", "id"))
        );
    }

    #[test]
    fn aggregate_rules_can_move_metadata_to_new_fields() {
        struct Replace;
        impl SchemaTransformer for Replace {
            fn transform_fields(
                &mut self,
                fields: &mut FieldConfigMap,
                _: &TypeInfo<'_>,
                _: &mut TransformContext<'_>,
            ) -> Result<(), Error> {
                if let Some(mut employer) = fields.shift_remove("employer") {
                    employer.name = "company".to_string();
                    fields.insert(employer.name.clone(), employer);
                }
                if let Some(nationality) = fields.get_mut("nationality") {
                    nationality.metadata = None;
                }
                Ok(())
            }
        }

        let replaced = transform_extended_schema(&extended(), &mut Replace).unwrap();

        assert_eq!(
            replaced.field_metadata.keys().collect::<Vec<_>>(),
            vec!["Person.company"]
        );
    }

    #[test]
    fn metadata_deserializes_with_missing_optional_fields() {
        let metadata: FieldMetadata =
            serde_json::from_value(serde_json::json!({"link": {"field": "a.b", "argument": "c"}})).unwrap();

        let link = metadata.link.unwrap();
        assert!(!link.batch_mode);
        assert_eq!(link.key_field, None);
    }
}
