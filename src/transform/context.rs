use std::collections::HashMap;

use super::{SchemaTransformer, populate_type, transform_header};
use crate::error::Error;
use crate::schema::{Schema, TypeDef, TypeRef, is_builtin_scalar};

/// State of one transformation pass, handed to every rule.
///
/// Knows the new name of every old type (allocated before any field is
/// built) and collects the types rules synthesize along the way.
pub struct TransformContext<'s> {
    old_schema: &'s Schema,
    type_names: HashMap<String, String>,
    pub(super) added_types: Vec<TypeDef>,
}

impl<'s> TransformContext<'s> {
    pub(super) fn new(old_schema: &'s Schema) -> Self {
        TransformContext {
            old_schema,
            type_names: HashMap::new(),
            added_types: Vec::new(),
        }
    }

    pub(super) fn register(&mut self, old_name: &str, new_name: &str) {
        self.type_names
            .insert(old_name.to_string(), new_name.to_string());
    }

    pub(super) fn type_names(&self) -> &HashMap<String, String> {
        &self.type_names
    }

    pub fn old_schema(&self) -> &'s Schema {
        self.old_schema
    }

    /// New name of an old type. Built-in scalars and names unknown to the
    /// pass are returned unchanged.
    pub fn map_type_name(&self, old_name: &str) -> String {
        if is_builtin_scalar(old_name) {
            return old_name.to_string();
        }
        self.type_names
            .get(old_name)
            .cloned()
            .unwrap_or_else(|| old_name.to_string())
    }

    /// Maps the named type inside a wrapped type reference.
    pub fn map_type(&self, ty: &TypeRef) -> TypeRef {
        match ty {
            TypeRef::Named(name) => TypeRef::Named(self.map_type_name(name)),
            TypeRef::List(inner) => TypeRef::list(self.map_type(inner)),
            TypeRef::NonNull(inner) => TypeRef::NonNull(Box::new(self.map_type(inner))),
        }
    }

    /// New name of the old type `old_name`, if the pass knows it.
    pub fn find_type(&self, old_name: &str) -> Option<&str> {
        self.type_names.get(old_name).map(String::as_str)
    }

    /// Whether a type of this (new) name already exists or was added.
    pub fn has_type_named(&self, new_name: &str) -> bool {
        self.type_names.values().any(|name| name == new_name)
            || self.added_types.iter().any(|t| t.name() == new_name)
    }

    /// Copies the old type `old_name` as a new, additional type, running
    /// `rules` on it instead of the rules of the current pass. References to
    /// other types are mapped as in the current pass. Returns the name of the
    /// copy.
    pub fn copy_type(
        &mut self,
        old_name: &str,
        rules: &mut dyn SchemaTransformer,
    ) -> Result<String, Error> {
        let old_schema = self.old_schema;
        let old = old_schema
            .get_type(old_name)
            .ok_or_else(|| Error::TypeNotFound(old_name.to_string()))?;
        let header = transform_header(old, rules, self)?;
        let new_name = header.name().to_string();
        if self.has_type_named(&new_name) {
            return Err(Error::DuplicateType(new_name));
        }
        let copy = populate_type(header, old, rules, self)?;
        self.added_types.push(copy);
        Ok(new_name)
    }
}
