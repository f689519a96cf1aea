//! Arena representation of a GraphQL type system.
//!
//! Types are stored by name in one ordered map and reference each other by
//! name only ([`TypeRef`]), so a schema can be rebuilt in two passes (allocate
//! all type names, then populate fields) without cyclic references.

mod introspection;
mod merge;
mod sdl;

pub use introspection::{INTROSPECTION_QUERY, introspect_schema, schema_from_introspection};
pub use merge::merge_schemas;

use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::error::Error;
use crate::execution::{FieldResolver, TypeResolver};

pub const BUILTIN_SCALARS: [&str; 5] = ["String", "Int", "Float", "Boolean", "ID"];

pub fn is_builtin_scalar(name: &str) -> bool {
    BUILTIN_SCALARS.contains(&name)
}

pub fn is_introspection_type(name: &str) -> bool {
    name.starts_with("__")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub fn default_type_name(self) -> &'static str {
        match self {
            OperationKind::Query => "Query",
            OperationKind::Mutation => "Mutation",
            OperationKind::Subscription => "Subscription",
        }
    }
}

/// A (possibly wrapped) reference to a named type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named(name.into())
    }

    pub fn list(inner: TypeRef) -> Self {
        TypeRef::List(Box::new(inner))
    }

    pub fn non_null(inner: TypeRef) -> Self {
        match inner {
            TypeRef::NonNull(_) => inner,
            other => TypeRef::NonNull(Box::new(other)),
        }
    }

    pub fn named_type(&self) -> &str {
        match self {
            TypeRef::Named(name) => name,
            TypeRef::List(inner) | TypeRef::NonNull(inner) => inner.named_type(),
        }
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, TypeRef::NonNull(_))
    }

    /// Strips one outer non-null wrapper.
    pub fn nullable(&self) -> &TypeRef {
        match self {
            TypeRef::NonNull(inner) => inner,
            other => other,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self.nullable(), TypeRef::List(_))
    }

    /// Element type of a (possibly non-null) list type.
    pub fn list_item(&self) -> Option<&TypeRef> {
        match self.nullable() {
            TypeRef::List(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn try_map_named<E>(&self, f: &mut impl FnMut(&str) -> Result<String, E>) -> Result<TypeRef, E> {
        Ok(match self {
            TypeRef::Named(name) => TypeRef::Named(f(name)?),
            TypeRef::List(inner) => TypeRef::List(Box::new(inner.try_map_named(f)?)),
            TypeRef::NonNull(inner) => TypeRef::NonNull(Box::new(inner.try_map_named(f)?)),
        })
    }

    pub fn from_ast(ty: &graphql_parser::query::Type<'_, String>) -> Self {
        use graphql_parser::query::Type;
        match ty {
            Type::NamedType(name) => TypeRef::Named(name.clone()),
            Type::ListType(inner) => TypeRef::List(Box::new(TypeRef::from_ast(inner))),
            Type::NonNullType(inner) => TypeRef::NonNull(Box::new(TypeRef::from_ast(inner))),
        }
    }

    pub fn to_ast(&self) -> graphql_parser::query::Type<'static, String> {
        use graphql_parser::query::Type;
        match self {
            TypeRef::Named(name) => Type::NamedType(name.clone()),
            TypeRef::List(inner) => Type::ListType(Box::new(inner.to_ast())),
            TypeRef::NonNull(inner) => Type::NonNullType(Box::new(inner.to_ast())),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named(name) => f.write_str(name),
            TypeRef::List(inner) => write!(f, "[{}]", inner),
            TypeRef::NonNull(inner) => write!(f, "{}!", inner),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InputValueDef {
    pub name: String,
    pub description: Option<String>,
    pub ty: TypeRef,
    pub default_value: Option<Value>,
}

impl InputValueDef {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        InputValueDef {
            name: name.into(),
            description: None,
            ty,
            default_value: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct FieldDef {
    pub name: String,
    pub description: Option<String>,
    pub args: IndexMap<String, InputValueDef>,
    pub ty: TypeRef,
    pub deprecation_reason: Option<String>,
    pub resolver: Option<Arc<dyn FieldResolver>>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        FieldDef {
            name: name.into(),
            description: None,
            args: IndexMap::new(),
            ty,
            deprecation_reason: None,
            resolver: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn FieldResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_arg(mut self, arg: InputValueDef) -> Self {
        self.args.insert(arg.name.clone(), arg);
        self
    }
}

#[derive(Clone, Debug)]
pub struct ScalarType {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ObjectType {
    pub name: String,
    pub description: Option<String>,
    pub fields: IndexMap<String, FieldDef>,
    pub interfaces: Vec<String>,
}

impl ObjectType {
    pub fn new(name: impl Into<String>) -> Self {
        ObjectType {
            name: name.into(),
            description: None,
            fields: IndexMap::new(),
            interfaces: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }
}

#[derive(Clone, Debug)]
pub struct InterfaceType {
    pub name: String,
    pub description: Option<String>,
    pub fields: IndexMap<String, FieldDef>,
    pub resolve_type: Option<Arc<dyn TypeResolver>>,
}

#[derive(Clone, Debug)]
pub struct UnionType {
    pub name: String,
    pub description: Option<String>,
    pub types: Vec<String>,
    pub resolve_type: Option<Arc<dyn TypeResolver>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumValueDef {
    pub name: String,
    pub description: Option<String>,
    pub deprecation_reason: Option<String>,
}

#[derive(Clone, Debug)]
pub struct EnumType {
    pub name: String,
    pub description: Option<String>,
    pub values: IndexMap<String, EnumValueDef>,
}

#[derive(Clone, Debug)]
pub struct InputObjectType {
    pub name: String,
    pub description: Option<String>,
    pub fields: IndexMap<String, InputValueDef>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
}

impl TypeKind {
    pub fn introspection_name(self) -> &'static str {
        match self {
            TypeKind::Scalar => "SCALAR",
            TypeKind::Object => "OBJECT",
            TypeKind::Interface => "INTERFACE",
            TypeKind::Union => "UNION",
            TypeKind::Enum => "ENUM",
            TypeKind::InputObject => "INPUT_OBJECT",
        }
    }
}

#[derive(Clone, Debug)]
pub enum TypeDef {
    Scalar(ScalarType),
    Object(ObjectType),
    Interface(InterfaceType),
    Union(UnionType),
    Enum(EnumType),
    InputObject(InputObjectType),
}

impl TypeDef {
    pub fn name(&self) -> &str {
        match self {
            TypeDef::Scalar(t) => &t.name,
            TypeDef::Object(t) => &t.name,
            TypeDef::Interface(t) => &t.name,
            TypeDef::Union(t) => &t.name,
            TypeDef::Enum(t) => &t.name,
            TypeDef::InputObject(t) => &t.name,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            TypeDef::Scalar(t) => t.description.as_deref(),
            TypeDef::Object(t) => t.description.as_deref(),
            TypeDef::Interface(t) => t.description.as_deref(),
            TypeDef::Union(t) => t.description.as_deref(),
            TypeDef::Enum(t) => t.description.as_deref(),
            TypeDef::InputObject(t) => t.description.as_deref(),
        }
    }

    pub fn kind(&self) -> TypeKind {
        match self {
            TypeDef::Scalar(_) => TypeKind::Scalar,
            TypeDef::Object(_) => TypeKind::Object,
            TypeDef::Interface(_) => TypeKind::Interface,
            TypeDef::Union(_) => TypeKind::Union,
            TypeDef::Enum(_) => TypeKind::Enum,
            TypeDef::InputObject(_) => TypeKind::InputObject,
        }
    }

    /// Output fields of object and interface types.
    pub fn fields(&self) -> Option<&IndexMap<String, FieldDef>> {
        match self {
            TypeDef::Object(t) => Some(&t.fields),
            TypeDef::Interface(t) => Some(&t.fields),
            _ => None,
        }
    }

    pub fn fields_mut(&mut self) -> Option<&mut IndexMap<String, FieldDef>> {
        match self {
            TypeDef::Object(t) => Some(&mut t.fields),
            TypeDef::Interface(t) => Some(&mut t.fields),
            _ => None,
        }
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self, TypeDef::Interface(_) | TypeDef::Union(_))
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, TypeDef::Scalar(_) | TypeDef::Enum(_))
    }
}

#[derive(Clone, Debug)]
pub struct DirectiveDef {
    pub name: String,
    pub description: Option<String>,
    pub args: IndexMap<String, InputValueDef>,
    pub locations: Vec<String>,
    pub repeatable: bool,
}

impl DirectiveDef {
    pub fn is_builtin(&self) -> bool {
        matches!(
            self.name.as_str(),
            "skip" | "include" | "deprecated" | "specifiedBy"
        )
    }
}

#[derive(Clone, Debug)]
pub struct Schema {
    pub query_type: String,
    pub mutation_type: Option<String>,
    pub subscription_type: Option<String>,
    pub types: IndexMap<String, TypeDef>,
    pub directives: Vec<DirectiveDef>,
}

impl Schema {
    /// Creates a schema holding only the built-in scalars and an empty root
    /// query type named `query_type`.
    pub fn new(query_type: impl Into<String>) -> Self {
        let query_type = query_type.into();
        let mut schema = Schema {
            query_type: query_type.clone(),
            mutation_type: None,
            subscription_type: None,
            types: IndexMap::new(),
            directives: Vec::new(),
        };
        schema.insert_builtin_scalars();
        schema
            .types
            .insert(query_type.clone(), TypeDef::Object(ObjectType::new(query_type)));
        schema
    }

    pub(crate) fn insert_builtin_scalars(&mut self) {
        for name in BUILTIN_SCALARS {
            self.types.entry(name.to_string()).or_insert_with(|| {
                TypeDef::Scalar(ScalarType {
                    name: name.to_string(),
                    description: None,
                })
            });
        }
    }

    pub fn from_sdl(sdl: &str) -> Result<Schema, Error> {
        sdl::parse_sdl(sdl)
    }

    pub fn to_sdl(&self) -> String {
        sdl::print_sdl(self)
    }

    pub fn get_type(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    pub fn get_type_mut(&mut self, name: &str) -> Option<&mut TypeDef> {
        self.types.get_mut(name)
    }

    pub fn add_type(&mut self, type_def: TypeDef) -> Result<(), Error> {
        let name = type_def.name().to_string();
        if self.types.contains_key(&name) {
            return Err(Error::DuplicateType(name));
        }
        self.types.insert(name, type_def);
        Ok(())
    }

    pub fn object_type(&self, name: &str) -> Option<&ObjectType> {
        match self.types.get(name) {
            Some(TypeDef::Object(object)) => Some(object),
            _ => None,
        }
    }

    pub fn object_type_mut(&mut self, name: &str) -> Option<&mut ObjectType> {
        match self.types.get_mut(name) {
            Some(TypeDef::Object(object)) => Some(object),
            _ => None,
        }
    }

    pub fn input_object_type(&self, name: &str) -> Option<&InputObjectType> {
        match self.types.get(name) {
            Some(TypeDef::InputObject(input)) => Some(input),
            _ => None,
        }
    }

    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&FieldDef> {
        self.types.get(type_name)?.fields()?.get(field_name)
    }

    pub fn field_mut(&mut self, type_name: &str, field_name: &str) -> Option<&mut FieldDef> {
        self.types.get_mut(type_name)?.fields_mut()?.get_mut(field_name)
    }

    pub fn root_type_name(&self, kind: OperationKind) -> Option<&str> {
        match kind {
            OperationKind::Query => Some(&self.query_type),
            OperationKind::Mutation => self.mutation_type.as_deref(),
            OperationKind::Subscription => self.subscription_type.as_deref(),
        }
    }

    pub fn root_types(&self) -> Vec<(OperationKind, &str)> {
        [
            OperationKind::Query,
            OperationKind::Mutation,
            OperationKind::Subscription,
        ]
        .into_iter()
        .filter_map(|kind| self.root_type_name(kind).map(|name| (kind, name)))
        .collect()
    }

    pub fn is_root_type(&self, name: &str) -> bool {
        self.root_types().iter().any(|(_, root)| *root == name)
    }

    pub fn set_resolver(
        &mut self,
        type_name: &str,
        field_name: &str,
        resolver: Arc<dyn FieldResolver>,
    ) -> Result<(), Error> {
        let field = self
            .field_mut(type_name, field_name)
            .ok_or_else(|| Error::TypeNotFound(format!("{}.{}", type_name, field_name)))?;
        field.resolver = Some(resolver);
        Ok(())
    }

    pub fn set_type_resolver(
        &mut self,
        type_name: &str,
        resolver: Arc<dyn TypeResolver>,
    ) -> Result<(), Error> {
        match self.types.get_mut(type_name) {
            Some(TypeDef::Interface(interface)) => interface.resolve_type = Some(resolver),
            Some(TypeDef::Union(union)) => union.resolve_type = Some(resolver),
            _ => return Err(Error::TypeNotFound(type_name.to_string())),
        }
        Ok(())
    }

    /// Object types an abstract type can resolve to.
    pub fn possible_types(&self, abstract_type: &str) -> Vec<&str> {
        match self.types.get(abstract_type) {
            Some(TypeDef::Union(union)) => union.types.iter().map(String::as_str).collect(),
            Some(TypeDef::Interface(_)) => self
                .types
                .values()
                .filter_map(|type_def| match type_def {
                    TypeDef::Object(object)
                        if object.interfaces.iter().any(|i| i == abstract_type) =>
                    {
                        Some(object.name.as_str())
                    }
                    _ => None,
                })
                .collect(),
            Some(TypeDef::Object(object)) => vec![object.name.as_str()],
            _ => Vec::new(),
        }
    }

    /// Whether a fragment with type condition `condition` applies to values
    /// of the object type `object_type`.
    pub fn type_condition_applies(&self, condition: &str, object_type: &str) -> bool {
        condition == object_type || self.possible_types(condition).contains(&object_type)
    }

    /// A copy holding type information only. Used where a schema is kept for
    /// reference by code that its own resolvers call into.
    pub fn without_resolvers(&self) -> Schema {
        let mut copy = self.clone();
        for type_def in copy.types.values_mut() {
            match type_def {
                TypeDef::Object(object) => object.fields.values_mut().for_each(|f| f.resolver = None),
                TypeDef::Interface(interface) => {
                    interface.resolve_type = None;
                    interface.fields.values_mut().for_each(|f| f.resolver = None);
                }
                TypeDef::Union(union) => union.resolve_type = None,
                _ => {}
            }
        }
        copy
    }

    /// User-defined types, in definition order.
    pub fn user_types(&self) -> impl Iterator<Item = &TypeDef> {
        self.types
            .values()
            .filter(|t| !is_introspection_type(t.name()) && !is_builtin_scalar(t.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn type_ref_display_and_unwrapping() {
        let ty = TypeRef::non_null(TypeRef::list(TypeRef::non_null(TypeRef::named("Person"))));
        assert_eq!(ty.to_string(), "[Person!]!");
        assert_eq!(ty.named_type(), "Person");
        assert!(ty.is_list());
        assert_eq!(ty.list_item().map(ToString::to_string), Some("Person!".to_string()));
    }

    #[test]
    fn possible_types_of_interfaces_and_unions() {
        let schema = Schema::from_sdl(
            r#"
            interface Node { id: ID! }
            type A implements Node { id: ID! }
            type B implements Node { id: ID! }
            type C { name: String }
            union AC = A | C
            type Query { node: Node, ac: AC }
            "#,
        )
        .unwrap();

        assert_eq!(schema.possible_types("Node"), vec!["A", "B"]);
        assert_eq!(schema.possible_types("AC"), vec!["A", "C"]);
        assert!(schema.type_condition_applies("Node", "B"));
        assert!(!schema.type_condition_applies("AC", "B"));
    }
}
