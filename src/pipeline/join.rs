//! Joins: a list field can be filtered by the linked objects of its items.
//!
//! For `people` whose items link `nationality` to countries, the filter of
//! `people` gains a field `nationality` taking a country filter. Resolving
//! queries the countries first, collects their keys and filters the people
//! by `nationality_in`. Without such a filter field, the people are fetched
//! unfiltered and those whose nationality is not among the keys are dropped.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::links::{key_string, query_path, target_field};
use super::{PipelineModule, upper_first};
use crate::error::{Error, FieldError};
use crate::execution::values::typed_value_to_ast;
use crate::execution::{FieldResolver, RequestContext, ResolveInfo, default_field_value};
use crate::extended::{ExtendedSchema, FieldMetadataMap, JoinConfig, LinkConfig, metadata_key};
use crate::query::{AstValue, Field, Query, Selection, empty_selection_set, rename_types, synthetic_field, visit_fields};
use crate::schema::{InputValueDef, Schema, TypeDef, TypeRef};

/// Argument of both sides of a join holding the filter.
const FILTER_ARGUMENT: &str = "filter";
const JOIN_KEY_ALIAS: &str = "_joinKey";

pub struct JoinModule {
    schema: Option<Schema>,
    /// Synthesized filter type -> filter type the endpoint knows.
    original_filter_types: HashMap<String, String>,
    /// `"Type.field"` of joined fields -> the link field filtered on.
    joined_fields: HashMap<String, String>,
}

impl Default for JoinModule {
    fn default() -> Self {
        JoinModule::new()
    }
}

impl JoinModule {
    pub fn new() -> Self {
        JoinModule {
            schema: None,
            original_filter_types: HashMap::new(),
            joined_fields: HashMap::new(),
        }
    }

    fn add_join(
        &mut self,
        schema: &mut Schema,
        metadata: &FieldMetadataMap,
        key: &str,
        join: &JoinConfig,
    ) -> Result<(), Error> {
        let invalid = |reason: String| Error::InvalidJoin {
            field: key.to_string(),
            reason,
        };
        let (type_name, field_name) = key
            .split_once('.')
            .ok_or_else(|| invalid("metadata key is not of the form Type.field".to_string()))?;
        let field = schema
            .field(type_name, field_name)
            .ok_or_else(|| invalid("field does not exist".to_string()))?;
        let item_type = field.ty.named_type().to_string();
        if !field.ty.nullable().is_list() || schema.object_type(&item_type).is_none() {
            return Err(invalid("joins need a list of objects".to_string()));
        }

        let link = metadata
            .get(&metadata_key(&item_type, &join.link_field))
            .and_then(|entry| entry.link.clone())
            .ok_or_else(|| {
                invalid(format!(
                    "`{}.{}` is not a link field",
                    item_type, join.link_field
                ))
            })?;
        let key_field = link
            .key_field
            .clone()
            .ok_or_else(|| invalid(format!("the link of `{}` has no keyField", join.link_field)))?;

        let left_filter = field
            .args
            .get(FILTER_ARGUMENT)
            .map(|arg| arg.ty.clone())
            .ok_or_else(|| invalid(format!("`{}` has no `{}` argument", field_name, FILTER_ARGUMENT)))?;
        let left_input = schema
            .input_object_type(left_filter.named_type())
            .ok_or_else(|| invalid("the filter argument is not an input object".to_string()))?;
        let has_key_filter = left_input
            .fields
            .contains_key(&format!("{}_in", join.link_field));
        if left_input.fields.contains_key(&join.link_field) {
            return Err(invalid(format!(
                "filter type `{}` already has a field `{}`",
                left_input.name, join.link_field
            )));
        }

        let path: Vec<&str> = link.field.split('.').collect();
        let right_filter = target_field(schema, &path)
            .and_then(|target| target.args.get(FILTER_ARGUMENT))
            .map(|arg| arg.ty.nullable().clone())
            .ok_or_else(|| {
                invalid(format!(
                    "link target `{}` has no `{}` argument",
                    link.field, FILTER_ARGUMENT
                ))
            })?;

        let mut joined_filter = left_input.clone();
        joined_filter.name = format!(
            "{}{}JoinFilter",
            upper_first(type_name),
            upper_first(field_name)
        );
        joined_filter.fields.insert(
            join.link_field.clone(),
            InputValueDef::new(join.link_field.clone(), right_filter.clone()),
        );
        let joined_name = joined_filter.name.clone();
        let original_name = left_input.name.clone();
        schema.add_type(TypeDef::InputObject(joined_filter))?;

        let joined_filter_type = left_filter
            .try_map_named(&mut |_| Ok::<_, Error>(joined_name.clone()))?;
        let field = schema
            .field_mut(type_name, field_name)
            .ok_or_else(|| invalid("field does not exist".to_string()))?;
        if let Some(arg) = field.args.get_mut(FILTER_ARGUMENT) {
            arg.ty = joined_filter_type;
        }
        field.resolver = Some(Arc::new(JoinResolver {
            inner: field.resolver.take(),
            link_field: join.link_field.clone(),
            key_field,
            has_key_filter,
            link,
            left_filter,
            right_filter,
        }));

        self.original_filter_types.insert(joined_name, original_name);
        self.joined_fields
            .insert(key.to_string(), join.link_field.clone());
        tracing::debug!(field = %key, link_field = %join.link_field, "joined field");
        Ok(())
    }
}

impl PipelineModule for JoinModule {
    fn name(&self) -> &'static str {
        "join"
    }

    fn transform_extended_schema(&mut self, extended: ExtendedSchema) -> Result<ExtendedSchema, Error> {
        let ExtendedSchema {
            mut schema,
            field_metadata,
        } = extended;
        for (key, metadata) in &field_metadata {
            if let Some(join) = &metadata.join {
                self.add_join(&mut schema, &field_metadata, key, join)?;
            }
        }
        self.schema = Some(schema.without_resolvers());
        Ok(ExtendedSchema::new(schema, field_metadata))
    }

    /// Join filters reaching an endpoint unresolved lose their join part, and
    /// variables typed with a joined filter get the endpoint's filter type.
    fn transform_query(&self, mut query: Query) -> Result<Query, FieldError> {
        let Some(schema) = &self.schema else {
            return Ok(query);
        };
        let mut stripped_variables = Vec::new();
        visit_fields(&mut query.document, schema, &mut |field, visit| {
            let Some(link_field) = self.joined_fields.get(&metadata_key(visit.parent_type, &field.name)) else {
                return;
            };
            for (name, value) in &mut field.arguments {
                if name != FILTER_ARGUMENT {
                    continue;
                }
                match value {
                    AstValue::Object(fields) => {
                        fields.remove(link_field);
                    }
                    AstValue::Variable(variable) => {
                        stripped_variables.push((variable.clone(), link_field.clone()));
                    }
                    _ => {}
                }
            }
        });
        for (variable, link_field) in stripped_variables {
            if let Some(Value::Object(filter)) = query.variable_values.get_mut(&variable) {
                filter.remove(&link_field);
            }
        }
        rename_types(&mut query.document, &|name| self.original_filter_types.get(name).cloned());
        Ok(query)
    }
}

struct JoinResolver {
    inner: Option<Arc<dyn FieldResolver>>,
    link_field: String,
    key_field: String,
    /// Whether the left filter has `<link_field>_in`.
    has_key_filter: bool,
    link: LinkConfig,
    left_filter: TypeRef,
    right_filter: TypeRef,
}

impl JoinResolver {
    async fn delegate(
        &self,
        parent: &Value,
        args: &Map<String, Value>,
        context: &RequestContext,
        info: &ResolveInfo<'_>,
    ) -> Result<Value, FieldError> {
        match &self.inner {
            Some(inner) => inner.resolve(parent, args, context, info).await,
            None => Ok(default_field_value(parent, info.field_name)),
        }
    }

    /// Keys of the right-side objects matching `filter`.
    async fn right_keys(
        &self,
        filter: &Value,
        context: &RequestContext,
        info: &ResolveInfo<'_>,
    ) -> Result<Vec<Value>, FieldError> {
        let mut key = synthetic_field(&self.key_field);
        key.alias = Some(JOIN_KEY_ALIAS.to_string());
        let mut selection = empty_selection_set();
        selection.items.push(Selection::Field(key));
        let path: Vec<&str> = self.link.field.split('.').collect();
        let literal = typed_value_to_ast(filter, &self.right_filter, info.schema);

        let results = query_path(
            &path,
            vec![(FILTER_ARGUMENT.to_string(), literal)],
            selection,
            context,
            info,
        )
        .await?;
        let mut seen = HashSet::new();
        Ok(results
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter_map(|item| item.get(JOIN_KEY_ALIAS))
            .filter(|key| !key.is_null() && seen.insert(key_string(key)))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl FieldResolver for JoinResolver {
    async fn resolve(
        &self,
        parent: &Value,
        args: &Map<String, Value>,
        context: &RequestContext,
        info: &ResolveInfo<'_>,
    ) -> Result<Value, FieldError> {
        let Some(Value::Object(filter)) = args.get(FILTER_ARGUMENT) else {
            return self.delegate(parent, args, context, info).await;
        };
        let mut filter = filter.clone();
        let right = filter.remove(&self.link_field).filter(|right| !right.is_null());
        let Some(right) = right else {
            return self.delegate(parent, args, context, info).await;
        };

        let mut keys = self.right_keys(&right, context, info).await?;
        if !self.has_key_filter {
            let mut key = synthetic_field(&self.link_field);
            key.alias = Some(JOIN_KEY_ALIAS.to_string());
            let value = self
                .delegate_filtered(parent, args, filter, Some(Selection::Field(key)), context, info)
                .await?;
            return Ok(retain_joined(value, &keys));
        }

        let key_filter = format!("{}_in", self.link_field);
        if let Some(Value::Array(requested)) = filter.get(&key_filter) {
            let requested: HashSet<String> = requested.iter().map(key_string).collect();
            keys.retain(|key| requested.contains(&key_string(key)));
        }
        tracing::debug!(keys = keys.len(), link_field = %self.link_field, "rewrote join filter");
        filter.insert(key_filter, Value::Array(keys));
        self.delegate_filtered(parent, args, filter, None, context, info)
            .await
    }
}

impl JoinResolver {
    /// Delegates with `filter` in place of the client's filter, selecting
    /// `extra` on the items as well.
    async fn delegate_filtered(
        &self,
        parent: &Value,
        args: &Map<String, Value>,
        filter: Map<String, Value>,
        extra: Option<Selection>,
        context: &RequestContext,
        info: &ResolveInfo<'_>,
    ) -> Result<Value, FieldError> {
        let filter = Value::Object(filter);
        let mut args = args.clone();
        let literal = typed_value_to_ast(&filter, &self.left_filter, info.schema);
        args.insert(FILTER_ARGUMENT.to_string(), filter);
        let nodes: Vec<Field> = info
            .field_nodes
            .iter()
            .map(|node| {
                let mut node = (*node).clone();
                node.arguments.retain(|(name, _)| name != FILTER_ARGUMENT);
                node.arguments.push((FILTER_ARGUMENT.to_string(), literal.clone()));
                node.selection_set.items.extend(extra.clone());
                node
            })
            .collect();
        let node_refs: Vec<&Field> = nodes.iter().collect();
        let rewritten = ResolveInfo {
            field_nodes: &node_refs,
            ..*info
        };
        self.delegate(parent, &args, context, &rewritten).await
    }
}

/// Drops the items whose join key is not among `keys`.
fn retain_joined(value: Value, keys: &[Value]) -> Value {
    let keys: HashSet<String> = keys.iter().map(key_string).collect();
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .filter(|item| {
                    item.get(JOIN_KEY_ALIAS)
                        .filter(|key| !key.is_null())
                        .is_some_and(|key| keys.contains(&key_string(key)))
                })
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extended::FieldMetadata;
    use pretty_assertions::assert_eq;

    const SDL: &str = r#"
        type Country { identCode: String, continent: String }
        input CountryFilter { identCode_in: [String], continent: String }
        type Person { name: String, nationality: String }
        input PersonFilter { name: String, nationality_in: [String] }
        type Query {
            people(filter: PersonFilter): [Person]
            countries(filter: CountryFilter): [Country]
        }
    "#;

    fn metadata(key_field: Option<&str>) -> FieldMetadataMap {
        let mut metadata = FieldMetadataMap::new();
        metadata.insert(
            "Person.nationality".to_string(),
            FieldMetadata {
                link: Some(LinkConfig {
                    field: "countries".to_string(),
                    argument: "filter.identCode_in".to_string(),
                    batch_mode: true,
                    key_field: key_field.map(str::to_string),
                    link_field_name: None,
                }),
                join: None,
            },
        );
        metadata.insert(
            "Query.people".to_string(),
            FieldMetadata {
                link: None,
                join: Some(JoinConfig {
                    link_field: "nationality".to_string(),
                }),
            },
        );
        metadata
    }

    fn joined(key_field: Option<&str>) -> Result<(JoinModule, ExtendedSchema), Error> {
        joined_sdl(SDL, key_field)
    }

    fn joined_sdl(sdl: &str, key_field: Option<&str>) -> Result<(JoinModule, ExtendedSchema), Error> {
        let schema = Schema::from_sdl(sdl).unwrap();
        let mut module = JoinModule::new();
        let result = module.transform_extended_schema(ExtendedSchema::new(schema, metadata(key_field)))?;
        Ok((module, result))
    }

    #[test]
    fn filter_gains_the_right_side_filter() {
        let (_, result) = joined(Some("identCode")).unwrap();
        let schema = &result.schema;

        assert_eq!(
            schema.field("Query", "people").unwrap().args["filter"].ty,
            TypeRef::named("QueryPeopleJoinFilter")
        );
        let filter = schema.input_object_type("QueryPeopleJoinFilter").unwrap();
        assert_eq!(
            filter.fields.keys().collect::<Vec<_>>(),
            vec!["name", "nationality_in", "nationality"]
        );
        assert_eq!(filter.fields["nationality"].ty, TypeRef::named("CountryFilter"));
    }

    #[test]
    fn joins_need_a_key_field() {
        assert!(matches!(joined(None), Err(Error::InvalidJoin { .. })));
    }

    #[test]
    fn filters_without_a_key_filter_can_be_joined() {
        let sdl = SDL.replace("name: String, nationality_in: [String]", "name: String");
        let (_, result) = joined_sdl(&sdl, Some("identCode")).unwrap();

        let filter = result.schema.input_object_type("QueryPeopleJoinFilter").unwrap();
        assert_eq!(filter.fields.keys().collect::<Vec<_>>(), vec!["name", "nationality"]);
    }

    #[test]
    fn items_outside_the_joined_keys_are_dropped() {
        let people = serde_json::json!([
            {"name": "a", "_joinKey": "DE"},
            {"name": "b", "_joinKey": "US"},
            {"name": "c", "_joinKey": null},
            {"name": "d", "_joinKey": 7},
        ]);

        let kept = retain_joined(people, &[Value::from("DE"), Value::from("7")]);

        assert_eq!(
            kept,
            serde_json::json!([
                {"name": "a", "_joinKey": "DE"},
                {"name": "d", "_joinKey": 7},
            ])
        );
    }

    #[test]
    fn unresolved_join_filters_are_stripped() {
        let (module, _) = joined(Some("identCode")).unwrap();
        let mut query = Query::parse(
            r#"query($f: QueryPeopleJoinFilter) { a: people(filter: {name: "x", nationality: {continent: "EU"}}) { name } b: people(filter: $f) { name } }"#,
        )
        .unwrap();
        query.variable_values.insert(
            "f".to_string(),
            serde_json::json!({"name": "y", "nationality": {"continent": "EU"}}),
        );

        let rewritten = module.transform_query(query).unwrap();

        let expected = Query::parse(
            r#"query($f: PersonFilter) { a: people(filter: {name: "x"}) { name } b: people(filter: $f) { name } }"#,
        )
        .unwrap();
        assert_eq!(rewritten.print(), expected.print());
        assert_eq!(rewritten.variable_values["f"], serde_json::json!({"name": "y"}));
    }
}
