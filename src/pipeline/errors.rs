//! Reporting of weaving errors inside the woven schema.

use serde_json::{Value, json};

use super::upper_first;
use crate::error::{Error, WeavingError};
use crate::execution::resolver_fn;
use crate::schema::{FieldDef, ObjectType, Schema, TypeDef, TypeRef};

pub const ERRORS_FIELD: &str = "_errors";
pub const PLACEHOLDER_ERROR_FIELD: &str = "_error";
const WEAVING_ERROR_TYPE: &str = "_WeavingError";

/// Adds `_errors: [_WeavingError!]!` to the query type, listing `errors`.
pub fn add_error_field(schema: &mut Schema, errors: &[WeavingError]) -> Result<(), Error> {
    let error_type = ObjectType::new(WEAVING_ERROR_TYPE)
        .with_field(FieldDef::new(
            "message",
            TypeRef::non_null(TypeRef::named("String")),
        ))
        .with_field(FieldDef::new("endpoint", TypeRef::named("String")));
    schema.add_type(TypeDef::Object(error_type))?;

    let value: Value = errors
        .iter()
        .map(|error| {
            json!({
                "message": error.message,
                "endpoint": error.endpoint.as_ref().map(|endpoint| endpoint.describe()),
            })
        })
        .collect();
    let query_type = schema.query_type.clone();
    let query = schema
        .object_type_mut(&query_type)
        .ok_or_else(|| Error::TypeNotFound(query_type.clone()))?;
    if query.fields.contains_key(ERRORS_FIELD) {
        return Err(Error::DuplicateField {
            type_name: query_type,
            field_name: ERRORS_FIELD.to_string(),
        });
    }
    let field = FieldDef::new(
        ERRORS_FIELD,
        TypeRef::non_null(TypeRef::list(TypeRef::non_null(TypeRef::named(WEAVING_ERROR_TYPE)))),
    )
    .with_resolver(resolver_fn(move |_, _| Ok(value.clone())));
    query.fields.insert(field.name.clone(), field);
    Ok(())
}

/// A schema standing in for a namespaced endpoint that failed: the namespace
/// field resolves to an object whose only field reports the failure.
pub fn placeholder_schema(namespace: &str, error: &WeavingError) -> Schema {
    let type_name = format!("{}Placeholder", upper_first(namespace));
    let message = error.message.clone();
    let placeholder = ObjectType::new(type_name.clone())
        .with_field(FieldDef::new(PLACEHOLDER_ERROR_FIELD, TypeRef::named("String")));
    let query = ObjectType::new("Query").with_field(
        FieldDef::new(namespace, TypeRef::named(type_name))
            .with_resolver(resolver_fn(move |_, _| Ok(json!({ PLACEHOLDER_ERROR_FIELD: message })))),
    );

    let mut schema = Schema::new("Query");
    schema.types.insert("Query".to_string(), TypeDef::Object(query));
    schema
        .types
        .insert(placeholder.name.clone(), TypeDef::Object(placeholder));
    schema
}
