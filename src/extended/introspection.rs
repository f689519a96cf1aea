//! The `_extIntrospection` root field, which publishes field metadata so
//! that a gateway composing this one can read it.

use serde_json::{Map, Value, json};

use super::{ExtendedSchema, FieldMetadata, FieldMetadataMap, metadata_key};
use crate::error::{Error, WeavingError};
use crate::execution::{RequestContext, resolver_fn};
use crate::query::parse_document;
use crate::response::ExecutionResult;
use crate::schema::{FieldDef, INTROSPECTION_QUERY, Schema, TypeRef, schema_from_introspection};
use crate::upstream::Upstream;

pub const EXTENDED_INTROSPECTION_FIELD: &str = "_extIntrospection";

const EXTENDED_INTROSPECTION_SDL: &str = r#"
type _ExtIntrospection { types: [_ExtTypeInfo!]! }
type _ExtTypeInfo { name: String!, fields: [_ExtFieldInfo!]! }
type _ExtFieldInfo { name: String!, metadata: _ExtFieldMetadata }
type _ExtFieldMetadata { link: _ExtLinkConfig, join: _ExtJoinConfig }
type _ExtLinkConfig { field: String!, argument: String!, batchMode: Boolean!, keyField: String, linkFieldName: String }
type _ExtJoinConfig { linkField: String! }
type Query { _extIntrospection: _ExtIntrospection! }
"#;

const LINK_FIELDS: [&str; 5] = ["field", "argument", "batchMode", "keyField", "linkFieldName"];
const JOIN_FIELDS: [&str; 1] = ["linkField"];

/// Adds the `_extIntrospection` field to the query type, answering with
/// `metadata`.
pub fn add_extended_introspection(schema: &mut Schema, metadata: &FieldMetadataMap) -> Result<(), Error> {
    let definitions = Schema::from_sdl(EXTENDED_INTROSPECTION_SDL)?;
    for type_def in definitions.user_types() {
        if type_def.name() != definitions.query_type {
            schema.add_type(type_def.clone())?;
        }
    }

    let value = introspection_value(metadata)?;
    let field = FieldDef::new(
        EXTENDED_INTROSPECTION_FIELD,
        TypeRef::non_null(TypeRef::named("_ExtIntrospection")),
    )
    .with_resolver(resolver_fn(move |_, _| Ok(value.clone())));
    let query_type = schema.query_type.clone();
    let query = schema
        .object_type_mut(&query_type)
        .ok_or_else(|| Error::TypeNotFound(query_type.clone()))?;
    if query.fields.contains_key(EXTENDED_INTROSPECTION_FIELD) {
        return Err(Error::DuplicateField {
            type_name: query_type,
            field_name: EXTENDED_INTROSPECTION_FIELD.to_string(),
        });
    }
    query.fields.insert(field.name.clone(), field);
    Ok(())
}

fn introspection_value(metadata: &FieldMetadataMap) -> Result<Value, Error> {
    let mut types: indexmap::IndexMap<&str, Vec<Value>> = indexmap::IndexMap::new();
    for (key, entry) in metadata {
        let Some((type_name, field_name)) = key.split_once('.') else {
            continue;
        };
        let metadata = serde_json::to_value(entry).map_err(|e| Error::Schema(e.to_string()))?;
        types
            .entry(type_name)
            .or_default()
            .push(json!({ "name": field_name, "metadata": metadata }));
    }
    Ok(json!({
        "types": types
            .into_iter()
            .map(|(name, fields)| json!({ "name": name, "fields": fields }))
            .collect::<Vec<_>>()
    }))
}

/// Query reading the metadata of an upstream, or `None` if it does not
/// publish any. Only asks for the link and join fields the upstream knows, so
/// gateways predating a field still answer.
pub fn extended_introspection_query(schema: &Schema) -> Option<String> {
    let root = schema.field(&schema.query_type, EXTENDED_INTROSPECTION_FIELD)?;
    let metadata_type = ["types", "fields", "metadata"]
        .iter()
        .try_fold(root.ty.named_type(), |type_name, field| {
            schema.field(type_name, field).map(|f| f.ty.named_type())
        })?;
    let known = |field: &str, candidates: &[&str]| -> Option<String> {
        let type_name = schema.field(metadata_type, field)?.ty.named_type();
        let fields = schema.get_type(type_name)?.fields()?;
        let present: Vec<&str> = candidates
            .iter()
            .copied()
            .filter(|name| fields.contains_key(*name))
            .collect();
        (!present.is_empty()).then(|| format!("{} {{ {} }}", field, present.join(" ")))
    };
    let selections: Vec<String> = [known("link", &LINK_FIELDS), known("join", &JOIN_FIELDS)]
        .into_iter()
        .flatten()
        .collect();
    if selections.is_empty() {
        return None;
    }
    Some(format!(
        "{{ {} {{ types {{ name fields {{ name metadata {{ {} }} }} }} }} }}",
        EXTENDED_INTROSPECTION_FIELD,
        selections.join(" ")
    ))
}

/// Reads the metadata map out of the data of an extended introspection query.
/// Entries that cannot be understood are skipped.
pub fn parse_extended_introspection(data: &Value) -> FieldMetadataMap {
    let mut metadata = FieldMetadataMap::new();
    let types = data[EXTENDED_INTROSPECTION_FIELD]["types"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default();
    for type_info in types {
        let Some(type_name) = type_info["name"].as_str() else {
            continue;
        };
        for field_info in type_info["fields"].as_array().map(Vec::as_slice).unwrap_or_default() {
            let Some(field_name) = field_info["name"].as_str() else {
                continue;
            };
            match serde_json::from_value::<FieldMetadata>(field_info["metadata"].clone()) {
                Ok(entry) if !entry.is_empty() => {
                    metadata.insert(metadata_key(type_name, field_name), entry);
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(%error, type_name, field_name, "ignoring unreadable field metadata");
                }
            }
        }
    }
    metadata
}

/// Removes the extended introspection field and its types, so that a
/// composed upstream does not leak them into the woven schema.
fn strip_extended_introspection(schema: &mut Schema) {
    let query_type = schema.query_type.clone();
    if let Some(query) = schema.object_type_mut(&query_type) {
        query.fields.shift_remove(EXTENDED_INTROSPECTION_FIELD);
    }
    if let Ok(definitions) = Schema::from_sdl(EXTENDED_INTROSPECTION_SDL) {
        for type_def in definitions.user_types() {
            if type_def.name() != definitions.query_type {
                schema.types.shift_remove(type_def.name());
            }
        }
    }
}

/// Fetches the schema of an upstream via introspection, together with the
/// metadata it publishes.
pub async fn fetch_extended_schema(upstream: &dyn Upstream) -> Result<ExtendedSchema, WeavingError> {
    let context = RequestContext::new();
    let document = parse_document(INTROSPECTION_QUERY)
        .map_err(|e| WeavingError::new("invalid introspection query", None).with_original_error(e))?;
    let result = upstream
        .execute(&document, &Map::new(), &context, true)
        .await
        .map_err(|e| {
            WeavingError::new(format!("failed to introspect upstream: {}", e), None).with_original_error(e)
        })?;
    let data = introspection_data(result, "introspection")?;
    let mut schema = schema_from_introspection(&data).map_err(|e| {
        WeavingError::new(format!("upstream returned an unusable schema: {}", e), None).with_original_error(e)
    })?;

    let Some(query) = extended_introspection_query(&schema) else {
        return Ok(ExtendedSchema::without_metadata(schema));
    };
    tracing::debug!("upstream publishes field metadata");
    let document = parse_document(&query)
        .map_err(|e| WeavingError::new("invalid extended introspection query", None).with_original_error(e))?;
    let result = upstream
        .execute(&document, &Map::new(), &context, true)
        .await
        .map_err(|e| {
            WeavingError::new(format!("failed to read field metadata of upstream: {}", e), None)
                .with_original_error(e)
        })?;
    let metadata = parse_extended_introspection(&introspection_data(result, "extended introspection")?);
    strip_extended_introspection(&mut schema);
    Ok(ExtendedSchema::new(schema, metadata))
}

fn introspection_data(result: ExecutionResult, what: &str) -> Result<Value, WeavingError> {
    if !result.errors.is_empty() {
        let messages: Vec<&str> = result.errors.iter().map(|e| e.message.as_str()).collect();
        return Err(WeavingError::new(
            format!("{} failed: {}", what, messages.join("\n")),
            None,
        ));
    }
    result
        .data
        .filter(|data| !data.is_null())
        .ok_or_else(|| WeavingError::new(format!("{} returned no data", what), None))
}
