use std::collections::HashMap;

use super::{ObjectType, OperationKind, Schema, TypeDef, TypeRef};
use crate::error::Error;

/// Merges schemas into one.
///
/// The root types of all schemas are combined into `Query`, `Mutation` and
/// `Subscription` by unioning their fields; a root field provided twice is a
/// duplicate field error. Every other type must be defined by exactly one schema.
pub fn merge_schemas(schemas: Vec<Schema>) -> Result<Schema, Error> {
    let mut merged = Schema::new(OperationKind::Query.default_type_name());

    for schema in schemas {
        let root_names: HashMap<String, &'static str> = schema
            .root_types()
            .into_iter()
            .map(|(kind, name)| (name.to_string(), kind.default_type_name()))
            .collect();
        let rename = |name: &str| -> Result<String, Error> {
            Ok(root_names
                .get(name)
                .map(|merged_name| merged_name.to_string())
                .unwrap_or_else(|| name.to_string()))
        };

        for (kind, root_name) in schema.root_types() {
            let Some(root) = schema.object_type(root_name) else {
                continue;
            };
            let target_name = kind.default_type_name();
            match kind {
                OperationKind::Query => {}
                OperationKind::Mutation => merged.mutation_type = Some(target_name.to_string()),
                OperationKind::Subscription => {
                    merged.subscription_type = Some(target_name.to_string())
                }
            }
            if !merged.types.contains_key(target_name) {
                merged.add_type(TypeDef::Object(ObjectType::new(target_name)))?;
            }
            let Some(target) = merged.object_type_mut(target_name) else {
                return Err(Error::Schema(format!("`{}` is not an object type", target_name)));
            };
            for (field_name, field) in &root.fields {
                if target.fields.contains_key(field_name) {
                    return Err(Error::DuplicateField {
                        type_name: target_name.to_string(),
                        field_name: field_name.clone(),
                    });
                }
                let mut field = field.clone();
                rename_field_types(&mut field.ty, &mut field.args, &rename)?;
                target.fields.insert(field_name.clone(), field);
            }
        }

        for type_def in schema.types.values() {
            let name = type_def.name();
            if root_names.contains_key(name) || super::is_builtin_scalar(name) {
                continue;
            }
            let mut type_def = type_def.clone();
            if let Some(fields) = type_def.fields_mut() {
                for field in fields.values_mut() {
                    rename_field_types(&mut field.ty, &mut field.args, &rename)?;
                }
            }
            merged.add_type(type_def)?;
        }

        for directive in schema.directives {
            if !merged.directives.iter().any(|d| d.name == directive.name) {
                merged.directives.push(directive);
            }
        }
    }

    Ok(merged)
}

fn rename_field_types(
    ty: &mut TypeRef,
    args: &mut indexmap::IndexMap<String, super::InputValueDef>,
    rename: &impl Fn(&str) -> Result<String, Error>,
) -> Result<(), Error> {
    *ty = ty.try_map_named(&mut |name: &str| rename(name))?;
    for arg in args.values_mut() {
        arg.ty = arg.ty.try_map_named(&mut |name: &str| rename(name))?;
    }
    Ok(())
}
