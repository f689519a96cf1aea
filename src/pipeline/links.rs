//! Links: a field holding a key is resolved by querying another root field
//! with that key.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::PipelineModule;
use crate::error::{Error, FieldError};
use crate::errors_in_data::{FieldErrorValue, unwrap_field_error_value};
use crate::execution::values::typed_value_to_ast;
use crate::execution::{FieldResolver, RequestContext, ResolveInfo, resolve_field_path};
use crate::extended::{ExtendedSchema, LinkConfig, metadata_key};
use crate::query::{
    AstValue, Query, Selection, SelectionSet, build_query_document, collect_used_names,
    empty_selection_set, synthetic_field, visit_fields,
};
use crate::response::PathSegment;
use crate::schema::{FieldDef, OperationKind, Schema, TypeRef};

/// Response key of the key field added to batched link queries.
const LINK_KEY_ALIAS: &str = "_linkKey";

pub struct LinksModule {
    /// The woven schema after linking, without resolvers.
    schema: Option<Schema>,
    /// `"Type.field"` of every field resolved by a link -> the field holding
    /// the key on the endpoint.
    key_fields: HashMap<String, String>,
}

impl Default for LinksModule {
    fn default() -> Self {
        LinksModule::new()
    }
}

impl LinksModule {
    pub fn new() -> Self {
        LinksModule {
            schema: None,
            key_fields: HashMap::new(),
        }
    }

    fn add_link(&mut self, schema: &mut Schema, key: &str, link: &LinkConfig) -> Result<(), Error> {
        let invalid = |reason: String| Error::InvalidLink {
            field: key.to_string(),
            reason,
        };
        let (type_name, field_name) = key
            .split_once('.')
            .ok_or_else(|| invalid("metadata key is not of the form Type.field".to_string()))?;

        let path: Vec<&str> = link.field.split('.').collect();
        let target = target_field(schema, &path)
            .ok_or_else(|| invalid(format!("target field `{}` does not exist", link.field)))?;
        let argument = link.argument.split('.').next().unwrap_or_default();
        if !target.args.contains_key(argument) {
            return Err(invalid(format!(
                "target field `{}` has no argument `{}`",
                link.field, argument
            )));
        }
        let target_type = target.ty.named_type().to_string();
        if let Some(key_field) = &link.key_field {
            if schema.field(&target_type, key_field).is_none() {
                return Err(invalid(format!(
                    "key field `{}` does not exist on `{}`",
                    key_field, target_type
                )));
            }
        }

        let object = schema
            .object_type_mut(type_name)
            .ok_or_else(|| invalid(format!("`{}` is not an object type", type_name)))?;
        let key_type = object
            .fields
            .get(field_name)
            .map(|field| field.ty.clone())
            .ok_or_else(|| invalid("field does not exist".to_string()))?;
        let resolver: Arc<dyn FieldResolver> = Arc::new(LinkResolver { link: link.clone() });
        let linked_type = linked_type(&key_type, &target_type);

        match &link.link_field_name {
            None => {
                if let Some(field) = object.fields.get_mut(field_name) {
                    field.ty = linked_type;
                    field.resolver = Some(resolver);
                }
                self.key_fields
                    .insert(key.to_string(), field_name.to_string());
            }
            Some(link_field_name) => {
                if object.fields.contains_key(link_field_name) {
                    return Err(Error::DuplicateField {
                        type_name: type_name.to_string(),
                        field_name: link_field_name.clone(),
                    });
                }
                object.fields.insert(
                    link_field_name.clone(),
                    FieldDef::new(link_field_name.clone(), linked_type).with_resolver(resolver),
                );
                self.key_fields.insert(
                    metadata_key(type_name, link_field_name),
                    field_name.to_string(),
                );
            }
        }
        tracing::debug!(field = %key, target = %link.field, "linked field");
        Ok(())
    }
}

impl PipelineModule for LinksModule {
    fn name(&self) -> &'static str {
        "links"
    }

    fn transform_extended_schema(&mut self, extended: ExtendedSchema) -> Result<ExtendedSchema, Error> {
        let ExtendedSchema {
            mut schema,
            field_metadata,
        } = extended;
        for (key, metadata) in &field_metadata {
            if let Some(link) = &metadata.link {
                self.add_link(&mut schema, key, link)?;
            }
        }
        self.schema = Some(schema.without_resolvers());
        Ok(ExtendedSchema::new(schema, field_metadata))
    }

    /// Linked fields are sent as the plain key field they stand for.
    fn transform_query(&self, mut query: Query) -> Result<Query, FieldError> {
        let Some(schema) = &self.schema else {
            return Ok(query);
        };
        visit_fields(&mut query.document, schema, &mut |field, visit| {
            let Some(key_field) = self.key_fields.get(&metadata_key(visit.parent_type, &field.name)) else {
                return;
            };
            if field.name != *key_field {
                field.alias.get_or_insert_with(|| field.name.clone());
                field.name = key_field.clone();
            }
            field.selection_set.items.clear();
        });
        Ok(query)
    }
}

/// The field at a dotted path from the query root.
pub(super) fn target_field<'s>(schema: &'s Schema, path: &[&str]) -> Option<&'s FieldDef> {
    let (last, outer) = path.split_last()?;
    let mut type_name = schema.query_type.as_str();
    for name in outer {
        type_name = schema.field(type_name, name)?.ty.named_type();
    }
    schema.field(type_name, last)
}

/// Type of a linked field: the key's list structure around the target type.
/// Keys may be missing on the target, so nothing is non-null.
fn linked_type(key_type: &TypeRef, target_type: &str) -> TypeRef {
    match key_type {
        TypeRef::NonNull(inner) => linked_type(inner, target_type),
        TypeRef::List(inner) => TypeRef::list(linked_type(inner, target_type)),
        TypeRef::Named(_) => TypeRef::named(target_type),
    }
}

/// `{"a.b", v}` -> `("a", {"b": v})`.
pub(super) fn bind_argument(argument_path: &str, value: Value) -> (String, Value) {
    let mut segments = argument_path.split('.');
    let name = segments.next().unwrap_or_default().to_string();
    let nested: Vec<&str> = segments.collect();
    let value = nested.iter().rev().fold(value, |inner, key| {
        let mut object = Map::new();
        object.insert(key.to_string(), inner);
        Value::Object(object)
    });
    (name, value)
}

/// Selections of all field nodes of the position being resolved.
pub(super) fn merged_selection(info: &ResolveInfo<'_>) -> SelectionSet {
    let mut selection = empty_selection_set();
    for node in info.field_nodes {
        selection
            .items
            .extend(node.selection_set.items.iter().cloned());
    }
    selection
}

/// Queries the field at the dotted `path` through the woven schema and
/// returns its unresolved value.
///
/// Fragments and variables of the client's operation that `selection` uses
/// are carried along.
pub(super) async fn query_path(
    path: &[&str],
    arguments: Vec<(String, AstValue)>,
    selection: SelectionSet,
    context: &RequestContext,
    info: &ResolveInfo<'_>,
) -> Result<Value, FieldError> {
    let (leaf_name, outer) = path
        .split_last()
        .ok_or_else(|| FieldError::new("empty link path"))?;
    let used = collect_used_names(&[&selection], info.fragments);

    let mut leaf = synthetic_field(leaf_name);
    leaf.arguments = arguments;
    leaf.selection_set = selection;
    let root = outer.iter().rev().fold(leaf, |inner, name| {
        let mut wrapper = synthetic_field(name);
        wrapper.selection_set.items.push(Selection::Field(inner));
        wrapper
    });
    let mut root_selection = empty_selection_set();
    root_selection.items.push(Selection::Field(root));

    let variable_definitions = info
        .operation
        .variable_definitions
        .iter()
        .filter(|definition| used.variables.contains(&definition.name))
        .cloned()
        .collect();
    let variables: Map<String, Value> = info
        .variable_values
        .iter()
        .filter(|(name, _)| used.variables.contains(*name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    let fragments = used
        .fragments
        .iter()
        .filter_map(|name| info.fragments.get(name.as_str()).map(|fragment| (*fragment).clone()))
        .collect();
    let document = build_query_document(
        OperationKind::Query,
        None,
        variable_definitions,
        root_selection,
        fragments,
    );

    let value = resolve_field_path(info.schema, &document, path.len(), &variables, context).await?;
    unwrap_field_error_value(value)
}

/// String form of a key, so that `"1"` and `1` match.
pub(super) fn key_string(value: &Value) -> String {
    match value {
        Value::String(string) => string.clone(),
        other => other.to_string(),
    }
}

struct LinkResolver {
    link: LinkConfig,
}

impl LinkResolver {
    /// Queries the target with `key` bound to the link argument.
    async fn fetch(
        &self,
        key: Value,
        extra: Option<Selection>,
        context: &RequestContext,
        info: &ResolveInfo<'_>,
    ) -> Result<Value, FieldError> {
        let path: Vec<&str> = self.link.field.split('.').collect();
        let target = target_field(info.schema, &path)
            .ok_or_else(|| FieldError::new(format!("link target `{}` does not exist", self.link.field)))?;
        let (argument, value) = bind_argument(&self.link.argument, key);
        let literal = match target.args.get(&argument) {
            Some(definition) => typed_value_to_ast(&value, &definition.ty, info.schema),
            None => crate::execution::values::value_to_ast(&value),
        };
        let mut selection = merged_selection(info);
        selection.items.extend(extra);
        query_path(&path, vec![(argument, literal)], selection, context, info).await
    }

    /// Resolves a batch of keys, one result per key in request order.
    async fn fetch_batch(
        &self,
        keys: Vec<Value>,
        context: &RequestContext,
        info: &ResolveInfo<'_>,
    ) -> Result<Vec<Value>, FieldError> {
        tracing::debug!(field = %self.link.field, keys = keys.len(), "resolving link batch");
        let key_selection = self.link.key_field.as_ref().map(|key_field| {
            let mut field = synthetic_field(key_field);
            field.alias = Some(LINK_KEY_ALIAS.to_string());
            Selection::Field(field)
        });
        let realign = key_selection.is_some();
        let results = self
            .fetch(Value::Array(keys.clone()), key_selection, context, info)
            .await?;
        let results = match results {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                return Err(FieldError::new(format!(
                    "link target `{}` returned {} instead of a list",
                    self.link.field, other
                )));
            }
        };
        if !realign {
            return Ok(results);
        }

        let by_key: HashMap<String, Value> = results
            .into_iter()
            .filter(|item| !FieldErrorValue::is_sentinel(item))
            .filter_map(|item| {
                let key = item.get(LINK_KEY_ALIAS).filter(|key| !key.is_null())?;
                Some((key_string(key), item))
            })
            .collect();
        Ok(keys
            .iter()
            .map(|key| by_key.get(&key_string(key)).cloned().unwrap_or(Value::Null))
            .collect())
    }

    async fn fetch_one(&self, key: Value, context: &RequestContext, info: &ResolveInfo<'_>) -> Result<Value, FieldError> {
        if key.is_null() {
            return Ok(Value::Null);
        }
        self.fetch(key, None, context, info).await
    }

    async fn load(&self, key: Value, context: &RequestContext, info: &ResolveInfo<'_>) -> Result<Value, FieldError> {
        if key.is_null() {
            return Ok(Value::Null);
        }
        let position: Vec<&str> = info
            .path
            .iter()
            .filter_map(|segment| match segment {
                PathSegment::Key(key) => Some(key.as_str()),
                PathSegment::Index(_) => None,
            })
            .collect();
        let loader = context.loader(&format!(
            "{}.{}@{}",
            info.parent_type,
            info.field_name,
            position.join(".")
        ));
        loader
            .load(key, |keys| self.fetch_batch(keys, context, info))
            .await
    }
}

#[async_trait]
impl FieldResolver for LinkResolver {
    async fn resolve(
        &self,
        parent: &Value,
        _args: &Map<String, Value>,
        context: &RequestContext,
        info: &ResolveInfo<'_>,
    ) -> Result<Value, FieldError> {
        let key = unwrap_field_error_value(parent.get(info.response_key()).cloned().unwrap_or(Value::Null))?;
        if key.is_null() {
            return Ok(Value::Null);
        }
        match key {
            // A list of keys resolves element-wise, in key order.
            Value::Array(keys) => {
                let results = if self.link.batch_mode {
                    join_all(keys.into_iter().map(|key| self.load(key, context, info))).await
                } else {
                    join_all(keys.into_iter().map(|key| self.fetch_one(key, context, info))).await
                };
                let mut values = Vec::with_capacity(results.len());
                for value in results {
                    values.push(value?);
                }
                Ok(Value::Array(values))
            }
            key if self.link.batch_mode => self.load(key, context, info).await,
            key => self.fetch(key, None, context, info).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extended::{FieldMetadata, FieldMetadataMap};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn linked(link: LinkConfig) -> Result<(LinksModule, ExtendedSchema), Error> {
        let schema = Schema::from_sdl(
            r#"
            type Country { identCode: String, name: String }
            type Person { name: String, nationality: String! }
            input CountryFilter { identCode_in: [String] }
            type Query { person: Person, Country(identCode: String): Country, countries(filter: CountryFilter): [Country] }
            "#,
        )
        .unwrap();
        let mut metadata = FieldMetadataMap::new();
        metadata.insert(
            "Person.nationality".to_string(),
            FieldMetadata {
                link: Some(link),
                join: None,
            },
        );
        let mut module = LinksModule::new();
        let result = module.transform_extended_schema(ExtendedSchema::new(schema, metadata))?;
        Ok((module, result))
    }

    fn link(field: &str, argument: &str) -> LinkConfig {
        LinkConfig {
            field: field.to_string(),
            argument: argument.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn linked_field_takes_the_nullable_target_type() {
        let (_, result) = linked(link("Country", "identCode")).unwrap();
        assert_eq!(
            result.schema.field("Person", "nationality").unwrap().ty,
            TypeRef::named("Country")
        );
    }

    #[test]
    fn link_field_name_keeps_the_key_field() {
        let config = LinkConfig {
            link_field_name: Some("country".to_string()),
            ..link("Country", "identCode")
        };
        let (module, result) = linked(config).unwrap();

        assert_eq!(
            result.schema.field("Person", "nationality").unwrap().ty.to_string(),
            "String!"
        );
        assert_eq!(
            result.schema.field("Person", "country").unwrap().ty,
            TypeRef::named("Country")
        );

        let query = Query::parse("{ person { country { name } nationality } }").unwrap();
        let rewritten = module.transform_query(query).unwrap();
        let expected = Query::parse("{ person { country: nationality nationality } }").unwrap();
        assert_eq!(rewritten.print(), expected.print());
    }

    #[test]
    fn outgoing_queries_select_the_key_only() {
        let (module, _) = linked(link("Country", "identCode")).unwrap();
        let query = Query::parse("{ person { n: nationality { name } } }").unwrap();

        let rewritten = module.transform_query(query).unwrap();

        assert_eq!(
            rewritten.print(),
            Query::parse("{ person { n: nationality } }").unwrap().print()
        );
    }

    #[test]
    fn invalid_links_are_fatal() {
        for config in [
            link("Missing", "identCode"),
            link("Country", "code"),
            LinkConfig {
                key_field: Some("code".to_string()),
                batch_mode: true,
                ..link("countries", "filter.identCode_in")
            },
        ] {
            assert!(matches!(linked(config), Err(Error::InvalidLink { .. })));
        }
    }

    #[test]
    fn arguments_bind_into_nested_objects() {
        assert_eq!(
            bind_argument("filter.identCode_in", json!(["DE"])),
            ("filter".to_string(), json!({"identCode_in": ["DE"]}))
        );
        assert_eq!(bind_argument("identCode", json!("DE")), ("identCode".to_string(), json!("DE")));
    }
}
