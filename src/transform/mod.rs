//! The type-graph transformer: rebuilds a whole schema while rules rename,
//! edit, add or remove types and fields.
//!
//! A pass runs in two phases. First every type's header (name, description,
//! interfaces, enum values, union members) goes through its type rule, with
//! interfaces ahead of all other types, which fixes the new name of every
//! type. Then fields and input fields are rebuilt, their types mapped to the
//! new names.

mod context;

pub use context::TransformContext;

use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Error;
use crate::execution::{FieldResolver, TypeResolver};
use crate::extended::FieldMetadata;
use crate::schema::{
    DirectiveDef, EnumType, FieldDef, InputObjectType, InputValueDef, InterfaceType, ObjectType,
    ScalarType, Schema, TypeDef, TypeRef, UnionType, is_builtin_scalar, is_introspection_type,
};

/// Working copy of a field while rules run on it.
#[derive(Clone, Debug)]
pub struct FieldConfig {
    pub name: String,
    pub description: Option<String>,
    pub args: IndexMap<String, InputValueDef>,
    pub ty: TypeRef,
    pub deprecation_reason: Option<String>,
    pub resolver: Option<Arc<dyn FieldResolver>>,
    /// Link and join configuration travelling with the field.
    pub metadata: Option<FieldMetadata>,
}

impl FieldConfig {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        FieldConfig {
            name: name.into(),
            description: None,
            args: IndexMap::new(),
            ty,
            deprecation_reason: None,
            resolver: None,
            metadata: None,
        }
    }

    pub fn with_arg(mut self, arg: InputValueDef) -> Self {
        self.args.insert(arg.name.clone(), arg);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn FieldResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    fn from_old_field(field: &FieldDef, ctx: &TransformContext<'_>) -> Self {
        let mut args = field.args.clone();
        for arg in args.values_mut() {
            arg.ty = ctx.map_type(&arg.ty);
        }
        FieldConfig {
            name: field.name.clone(),
            description: field.description.clone(),
            args,
            ty: ctx.map_type(&field.ty),
            deprecation_reason: field.deprecation_reason.clone(),
            resolver: field.resolver.clone(),
            metadata: None,
        }
    }

    pub fn into_field_def(self) -> FieldDef {
        FieldDef {
            name: self.name,
            description: self.description,
            args: self.args,
            ty: self.ty,
            deprecation_reason: self.deprecation_reason,
            resolver: self.resolver,
        }
    }
}

pub type FieldConfigMap = IndexMap<String, FieldConfig>;

/// The old field a [`FieldConfig`] was built from.
#[derive(Clone, Copy)]
pub struct FieldInfo<'a> {
    pub old_type: &'a TypeDef,
    pub old_field: &'a FieldDef,
    pub new_type_name: &'a str,
}

#[derive(Clone, Copy)]
pub struct TypeInfo<'a> {
    pub old_type: &'a TypeDef,
    pub new_type_name: &'a str,
}

#[derive(Clone, Copy)]
pub struct InputFieldInfo<'a> {
    pub old_type: &'a TypeDef,
    pub old_field: &'a InputValueDef,
    pub new_type_name: &'a str,
}

/// Rules of a transformation pass. Every hook defaults to leaving its input
/// untouched, so the empty implementation copies the schema.
///
/// Type hooks see the header of a type only: the fields of object, interface
/// and input object types are empty at that point and are rebuilt through
/// the field hooks afterwards.
#[allow(unused_variables)]
pub trait SchemaTransformer {
    fn transform_scalar_type(&mut self, config: &mut ScalarType, ctx: &TransformContext<'_>) -> Result<(), Error> {
        Ok(())
    }

    fn transform_object_type(&mut self, config: &mut ObjectType, ctx: &TransformContext<'_>) -> Result<(), Error> {
        Ok(())
    }

    fn transform_interface_type(
        &mut self,
        config: &mut InterfaceType,
        ctx: &TransformContext<'_>,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn transform_union_type(&mut self, config: &mut UnionType, ctx: &TransformContext<'_>) -> Result<(), Error> {
        Ok(())
    }

    fn transform_enum_type(&mut self, config: &mut EnumType, ctx: &TransformContext<'_>) -> Result<(), Error> {
        Ok(())
    }

    fn transform_input_object_type(
        &mut self,
        config: &mut InputObjectType,
        ctx: &TransformContext<'_>,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn transform_field(
        &mut self,
        config: &mut FieldConfig,
        info: &FieldInfo<'_>,
        ctx: &mut TransformContext<'_>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Runs once per object or interface type, after `transform_field` ran
    /// for each of its fields.
    fn transform_fields(
        &mut self,
        fields: &mut FieldConfigMap,
        info: &TypeInfo<'_>,
        ctx: &mut TransformContext<'_>,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn transform_input_field(
        &mut self,
        config: &mut InputValueDef,
        info: &InputFieldInfo<'_>,
        ctx: &mut TransformContext<'_>,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn transform_directive(&mut self, config: &mut DirectiveDef, ctx: &TransformContext<'_>) -> Result<(), Error> {
        Ok(())
    }
}

/// Rules that change nothing.
pub struct IdentityTransformer;

impl SchemaTransformer for IdentityTransformer {}

pub fn transform_schema(schema: &Schema, rules: &mut dyn SchemaTransformer) -> Result<Schema, Error> {
    let mut ctx = TransformContext::new(schema);
    let transformable: Vec<&TypeDef> = schema
        .types
        .values()
        .filter(|t| !is_introspection_type(t.name()) && !is_builtin_scalar(t.name()))
        .collect();

    let (interfaces, others): (Vec<&TypeDef>, Vec<&TypeDef>) = transformable
        .iter()
        .copied()
        .partition(|t| matches!(t, TypeDef::Interface(_)));
    let mut headers = HashMap::new();
    for old in interfaces.into_iter().chain(others) {
        let header = transform_header(old, rules, &ctx)?;
        ctx.register(old.name(), header.name());
        headers.insert(old.name(), header);
    }

    let mut new_schema = Schema {
        query_type: ctx.map_type_name(&schema.query_type),
        mutation_type: schema.mutation_type.as_deref().map(|name| ctx.map_type_name(name)),
        subscription_type: schema
            .subscription_type
            .as_deref()
            .map(|name| ctx.map_type_name(name)),
        types: IndexMap::new(),
        directives: Vec::new(),
    };
    new_schema.insert_builtin_scalars();

    for old in transformable {
        let Some(header) = headers.remove(old.name()) else {
            continue;
        };
        let new_type = populate_type(header, old, rules, &mut ctx)?;
        new_schema.add_type(new_type)?;
    }
    for added in std::mem::take(&mut ctx.added_types) {
        new_schema.add_type(added)?;
    }

    for directive in &schema.directives {
        let mut directive = directive.clone();
        for arg in directive.args.values_mut() {
            arg.ty = ctx.map_type(&arg.ty);
        }
        rules.transform_directive(&mut directive, &ctx)?;
        new_schema.directives.push(directive);
    }

    Ok(new_schema)
}

/// Runs the type rule on a copy of `old` stripped of its fields.
fn transform_header(
    old: &TypeDef,
    rules: &mut dyn SchemaTransformer,
    ctx: &TransformContext<'_>,
) -> Result<TypeDef, Error> {
    let mut header = old.clone();
    match &mut header {
        TypeDef::Scalar(scalar) => rules.transform_scalar_type(scalar, ctx)?,
        TypeDef::Object(object) => {
            object.fields.clear();
            rules.transform_object_type(object, ctx)?;
        }
        TypeDef::Interface(interface) => {
            interface.fields.clear();
            rules.transform_interface_type(interface, ctx)?;
        }
        TypeDef::Union(union) => rules.transform_union_type(union, ctx)?,
        TypeDef::Enum(enum_type) => rules.transform_enum_type(enum_type, ctx)?,
        TypeDef::InputObject(input) => {
            input.fields.clear();
            rules.transform_input_object_type(input, ctx)?;
        }
    }
    Ok(header)
}

/// Fills a transformed header with the transformed fields of `old` and maps
/// its references to other types.
fn populate_type(
    mut header: TypeDef,
    old: &TypeDef,
    rules: &mut dyn SchemaTransformer,
    ctx: &mut TransformContext<'_>,
) -> Result<TypeDef, Error> {
    let new_type_name = header.name().to_string();
    match (&mut header, old) {
        (TypeDef::Object(object), TypeDef::Object(old_object)) => {
            object.fields = transform_fields(old, &old_object.fields, &new_type_name, rules, ctx)?;
            object.interfaces = object
                .interfaces
                .iter()
                .map(|name| ctx.map_type_name(name))
                .collect();
        }
        (TypeDef::Interface(interface), TypeDef::Interface(old_interface)) => {
            interface.fields =
                transform_fields(old, &old_interface.fields, &new_type_name, rules, ctx)?;
            interface.resolve_type = interface
                .resolve_type
                .take()
                .map(|inner| renamed_type_resolver(inner, ctx));
        }
        (TypeDef::Union(union), _) => {
            union.types = union.types.iter().map(|name| ctx.map_type_name(name)).collect();
            union.resolve_type = union
                .resolve_type
                .take()
                .map(|inner| renamed_type_resolver(inner, ctx));
        }
        (TypeDef::InputObject(input), TypeDef::InputObject(old_input)) => {
            let mut fields = IndexMap::new();
            for old_field in old_input.fields.values() {
                let mut config = old_field.clone();
                config.ty = ctx.map_type(&config.ty);
                let info = InputFieldInfo {
                    old_type: old,
                    old_field,
                    new_type_name: &new_type_name,
                };
                rules.transform_input_field(&mut config, &info, ctx)?;
                if fields.contains_key(&config.name) {
                    return Err(Error::DuplicateField {
                        type_name: new_type_name,
                        field_name: config.name,
                    });
                }
                fields.insert(config.name.clone(), config);
            }
            input.fields = fields;
        }
        _ => {}
    }
    Ok(header)
}

fn transform_fields(
    old_type: &TypeDef,
    old_fields: &IndexMap<String, FieldDef>,
    new_type_name: &str,
    rules: &mut dyn SchemaTransformer,
    ctx: &mut TransformContext<'_>,
) -> Result<IndexMap<String, FieldDef>, Error> {
    let duplicate = |field_name: &str| Error::DuplicateField {
        type_name: new_type_name.to_string(),
        field_name: field_name.to_string(),
    };

    let mut configs = FieldConfigMap::new();
    for old_field in old_fields.values() {
        let mut config = FieldConfig::from_old_field(old_field, ctx);
        let info = FieldInfo {
            old_type,
            old_field,
            new_type_name,
        };
        rules.transform_field(&mut config, &info, ctx)?;
        if configs.contains_key(&config.name) {
            return Err(duplicate(&config.name));
        }
        configs.insert(config.name.clone(), config);
    }

    let info = TypeInfo {
        old_type,
        new_type_name,
    };
    rules.transform_fields(&mut configs, &info, ctx)?;

    let mut fields = IndexMap::new();
    for config in configs.into_values() {
        if fields.contains_key(&config.name) {
            return Err(duplicate(&config.name));
        }
        fields.insert(config.name.clone(), config.into_field_def());
    }
    Ok(fields)
}

/// Lets a type resolver written against the old schema answer with either
/// old or new type names.
struct RenamedTypeResolver {
    inner: Arc<dyn TypeResolver>,
    new_names: HashMap<String, String>,
}

impl TypeResolver for RenamedTypeResolver {
    fn resolve_type(&self, value: &Value, schema: &Schema, abstract_type: &str) -> Option<String> {
        let name = self.inner.resolve_type(value, schema, abstract_type)?;
        Some(self.new_names.get(&name).cloned().unwrap_or(name))
    }
}

fn renamed_type_resolver(inner: Arc<dyn TypeResolver>, ctx: &TransformContext<'_>) -> Arc<dyn TypeResolver> {
    Arc::new(RenamedTypeResolver {
        inner,
        new_names: ctx.type_names().clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SOURCE: &str = r#"
        interface Node { id: ID! }
        type Person implements Node { id: ID!, name: String, friends(first: Int = 2): [Person!] }
        union Result = Person
        enum Color { RED GREEN }
        input PersonFilter { name: String, color: Color }
        type Query { people(filter: PersonFilter): [Person], node: Node, result: Result }
    "#;

    struct Prefix(&'static str);

    impl Prefix {
        fn rename(&self, name: &mut String) {
            *name = format!("{}{}", self.0, name);
        }
    }

    impl SchemaTransformer for Prefix {
        fn transform_object_type(&mut self, config: &mut ObjectType, _: &TransformContext<'_>) -> Result<(), Error> {
            if config.name != "Query" {
                self.rename(&mut config.name);
            }
            Ok(())
        }

        fn transform_interface_type(&mut self, config: &mut InterfaceType, _: &TransformContext<'_>) -> Result<(), Error> {
            self.rename(&mut config.name);
            Ok(())
        }

        fn transform_union_type(&mut self, config: &mut UnionType, _: &TransformContext<'_>) -> Result<(), Error> {
            self.rename(&mut config.name);
            Ok(())
        }

        fn transform_enum_type(&mut self, config: &mut EnumType, _: &TransformContext<'_>) -> Result<(), Error> {
            self.rename(&mut config.name);
            Ok(())
        }

        fn transform_input_object_type(
            &mut self,
            config: &mut InputObjectType,
            _: &TransformContext<'_>,
        ) -> Result<(), Error> {
            self.rename(&mut config.name);
            Ok(())
        }
    }

    #[test]
    fn identity_rules_reproduce_the_schema() {
        let schema = Schema::from_sdl(SOURCE).unwrap();
        let copy = transform_schema(&schema, &mut IdentityTransformer).unwrap();

        assert_eq!(copy.to_sdl(), schema.to_sdl());
    }

    #[test]
    fn renamed_types_are_referenced_by_their_new_names() {
        let schema = Schema::from_sdl(SOURCE).unwrap();
        let renamed = transform_schema(&schema, &mut Prefix("X")).unwrap();

        assert_eq!(renamed.query_type, "Query");
        assert_eq!(
            renamed.field("Query", "people").unwrap().args["filter"].ty,
            TypeRef::named("XPersonFilter")
        );
        assert_eq!(
            renamed.field("XPerson", "friends").unwrap().ty.to_string(),
            "[XPerson!]"
        );
        assert_eq!(renamed.object_type("XPerson").unwrap().interfaces, vec!["XNode"]);
        assert_eq!(renamed.possible_types("XResult"), vec!["XPerson"]);
        assert_eq!(
            renamed.input_object_type("XPersonFilter").unwrap().fields["color"].ty,
            TypeRef::named("XColor")
        );
    }

    #[test]
    fn type_resolvers_accept_old_and_new_names() {
        struct Fixed(&'static str);
        impl TypeResolver for Fixed {
            fn resolve_type(&self, _: &Value, _: &Schema, _: &str) -> Option<String> {
                Some(self.0.to_string())
            }
        }

        for answer in ["Person", "XPerson"] {
            let mut schema = Schema::from_sdl(SOURCE).unwrap();
            schema.set_type_resolver("Node", Arc::new(Fixed(answer))).unwrap();
            let renamed = transform_schema(&schema, &mut Prefix("X")).unwrap();

            let Some(TypeDef::Interface(node)) = renamed.get_type("XNode") else {
                panic!("XNode is not an interface");
            };
            let resolver = node.resolve_type.as_ref().unwrap();
            assert_eq!(
                resolver.resolve_type(&Value::Null, &renamed, "XNode").as_deref(),
                Some("XPerson")
            );
        }
    }

    #[test]
    fn duplicate_field_after_rules_is_fatal() {
        struct Collapse;
        impl SchemaTransformer for Collapse {
            fn transform_field(
                &mut self,
                config: &mut FieldConfig,
                _: &FieldInfo<'_>,
                _: &mut TransformContext<'_>,
            ) -> Result<(), Error> {
                config.name = "same".to_string();
                Ok(())
            }
        }

        let schema = Schema::from_sdl("type Query { a: Int, b: Int }").unwrap();
        let error = transform_schema(&schema, &mut Collapse).unwrap_err();
        assert!(matches!(
            error,
            Error::DuplicateField { ref type_name, ref field_name } if type_name == "Query" && field_name == "same"
        ));
    }

    #[test]
    fn aggregate_rule_sees_every_transformed_field_and_can_copy_types() {
        struct AddCopy;
        impl SchemaTransformer for AddCopy {
            fn transform_fields(
                &mut self,
                fields: &mut FieldConfigMap,
                info: &TypeInfo<'_>,
                ctx: &mut TransformContext<'_>,
            ) -> Result<(), Error> {
                if info.new_type_name != "Query" {
                    return Ok(());
                }
                assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["people", "node", "result"]);
                struct Rename;
                impl SchemaTransformer for Rename {
                    fn transform_input_object_type(
                        &mut self,
                        config: &mut InputObjectType,
                        _: &TransformContext<'_>,
                    ) -> Result<(), Error> {
                        config.name = "PersonFilterCopy".to_string();
                        Ok(())
                    }
                }
                let copy = ctx.copy_type("PersonFilter", &mut Rename)?;
                let field = FieldConfig::new("copied", TypeRef::named("String"))
                    .with_arg(InputValueDef::new("filter", TypeRef::named(copy)));
                fields.insert(field.name.clone(), field);
                Ok(())
            }
        }

        let schema = Schema::from_sdl(SOURCE).unwrap();
        let result = transform_schema(&schema, &mut AddCopy).unwrap();

        assert!(result.input_object_type("PersonFilterCopy").is_some());
        assert_eq!(
            result.field("Query", "copied").unwrap().args["filter"].ty,
            TypeRef::named("PersonFilterCopy")
        );
    }
}
