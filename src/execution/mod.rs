//! A small asynchronous executor for query documents against a [`Schema`].
//!
//! Sibling fields resolve concurrently; mutation root fields run serially.
//! Resolver failures become errors at the field's response path and null
//! propagates to the nearest nullable position.

pub mod batch;
pub mod values;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use graphql_parser::query::{Directive, Selection, TypeCondition};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::FieldError;
use crate::errors_in_data::FieldErrorValue;
use crate::query::{Document, Field, Fragments, Operation, SelectionSet, fragments_of, response_key};
use crate::response::{ExecutionResult, GraphQLError, Location, PathSegment};
use crate::schema::{OperationKind, Schema, TypeDef, TypeRef, introspect_schema};
pub use batch::BatchLoader;
use values::{coerce_arguments, coerce_variable_values, value_from_ast};

/// Everything a resolver can know about the position it resolves.
#[derive(Clone, Copy)]
pub struct ResolveInfo<'a> {
    pub schema: &'a Schema,
    pub field_name: &'a str,
    /// All field nodes merged into this response key.
    pub field_nodes: &'a [&'a Field],
    pub parent_type: &'a str,
    pub return_type: &'a TypeRef,
    pub path: &'a [PathSegment],
    pub operation: Operation<'a>,
    pub fragments: &'a Fragments<'a>,
    pub variable_values: &'a Map<String, Value>,
}

impl ResolveInfo<'_> {
    pub fn response_key(&self) -> &str {
        self.field_nodes
            .first()
            .map(|field| response_key(field))
            .unwrap_or(self.field_name)
    }
}

#[async_trait]
pub trait FieldResolver: Send + Sync {
    async fn resolve(
        &self,
        parent: &Value,
        args: &Map<String, Value>,
        context: &RequestContext,
        info: &ResolveInfo<'_>,
    ) -> Result<Value, FieldError>;
}

/// Picks the concrete object type of a value of an abstract type.
pub trait TypeResolver: Send + Sync {
    fn resolve_type(&self, value: &Value, schema: &Schema, abstract_type: &str) -> Option<String>;
}

impl fmt::Debug for dyn FieldResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<field resolver>")
    }
}

impl fmt::Debug for dyn TypeResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<type resolver>")
    }
}

struct FnResolver<F>(F);

#[async_trait]
impl<F> FieldResolver for FnResolver<F>
where
    F: Fn(&Value, &Map<String, Value>) -> Result<Value, FieldError> + Send + Sync,
{
    async fn resolve(
        &self,
        parent: &Value,
        args: &Map<String, Value>,
        _context: &RequestContext,
        _info: &ResolveInfo<'_>,
    ) -> Result<Value, FieldError> {
        (self.0)(parent, args)
    }
}

/// Wraps a synchronous closure of `(parent, args)` as a resolver.
pub fn resolver_fn<F>(f: F) -> Arc<dyn FieldResolver>
where
    F: Fn(&Value, &Map<String, Value>) -> Result<Value, FieldError> + Send + Sync + 'static,
{
    Arc::new(FnResolver(f))
}

/// Per-request state: forwarded headers and the request's batch loaders.
#[derive(Default)]
pub struct RequestContext {
    pub headers: HashMap<String, String>,
    loaders: Mutex<HashMap<String, Arc<BatchLoader>>>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_headers(headers: HashMap<String, String>) -> Self {
        RequestContext {
            headers,
            loaders: Mutex::default(),
        }
    }

    /// The loader registered under `key` for this request, created on first use.
    pub fn loader(&self, key: &str) -> Arc<BatchLoader> {
        let mut loaders = self.loaders.lock().unwrap_or_else(PoisonError::into_inner);
        loaders
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(BatchLoader::new()))
            .clone()
    }
}

/// Value of `field_name` on `parent`, as a resolver-less field sees it.
pub fn default_field_value(parent: &Value, field_name: &str) -> Value {
    parent.get(field_name).cloned().unwrap_or(Value::Null)
}

pub async fn execute(
    schema: &Schema,
    document: &Document,
    operation_name: Option<&str>,
    variables: &Map<String, Value>,
    context: &RequestContext,
) -> ExecutionResult {
    let operation = match Operation::find(document, operation_name) {
        Ok(operation) => operation,
        Err(message) => return ExecutionResult::from_errors(vec![GraphQLError::new(message)]),
    };
    let Some(root_type) = schema.root_type_name(operation.kind) else {
        return ExecutionResult::from_errors(vec![GraphQLError::new(format!(
            "schema does not support {:?} operations",
            operation.kind
        ))]);
    };

    let ctx = ExecutionContext::new(schema, document, operation, variables, context);
    let fields = ctx.collect_fields(Some(root_type), &[operation.selection_set]);
    let root_value = Value::Object(Map::new());

    let data = if operation.kind == OperationKind::Mutation {
        ctx.execute_fields_serially(root_type, &root_value, fields, Vec::new())
            .await
    } else {
        ctx.execute_fields(root_type, &root_value, fields, Vec::new())
            .await
    };

    ExecutionResult {
        data: Some(data.map(Value::Object).unwrap_or(Value::Null)),
        errors: ctx.errors.into_inner().unwrap_or_else(PoisonError::into_inner),
        extensions: None,
    }
}

/// Runs the resolvers along the chain of fields that starts at the single
/// root field of `document` and descends `depth - 1` levels through the
/// first field of each selection. Returns the raw value of the last field,
/// without completing the selection beneath it.
pub async fn resolve_field_path(
    schema: &Schema,
    document: &Document,
    depth: usize,
    variables: &Map<String, Value>,
    context: &RequestContext,
) -> Result<Value, FieldError> {
    let operation = Operation::find(document, None).map_err(FieldError::new)?;
    let root_type = schema
        .root_type_name(operation.kind)
        .ok_or_else(|| FieldError::new(format!("schema does not support {:?} operations", operation.kind)))?;
    let ctx = ExecutionContext::new(schema, document, operation, variables, context);
    let fields = ctx.collect_fields(Some(root_type), &[operation.selection_set]);
    let Some((key, nodes)) = fields.into_iter().next() else {
        return Err(FieldError::new("document does not select a root field"));
    };

    let mut parent_type = root_type;
    let mut parent = Value::Object(Map::new());
    let mut nodes = nodes;
    let mut path = vec![PathSegment::Key(key.to_string())];
    for level in 0..depth.max(1) {
        let field = nodes[0];
        let field_def = schema.field(parent_type, &field.name).ok_or_else(|| {
            FieldError::new(format!(
                "Cannot query field \"{}\" on type \"{}\".",
                field.name, parent_type
            ))
        })?;
        let args = coerce_arguments(&field_def.args, &field.arguments, &ctx.variables);
        let info = ResolveInfo {
            schema,
            field_name: &field.name,
            field_nodes: &nodes,
            parent_type,
            return_type: &field_def.ty,
            path: &path,
            operation,
            fragments: &ctx.fragments,
            variable_values: &ctx.variables,
        };
        let value = match &field_def.resolver {
            Some(resolver) => resolver.resolve(&parent, &args, context, &info).await?,
            None => default_field_value(&parent, &field.name),
        };
        if level + 1 >= depth || value.is_null() {
            return Ok(value);
        }

        let child_type = field_def.ty.named_type();
        let children = ctx.collect_fields(Some(child_type), &[&field.selection_set]);
        let Some((child_key, child_nodes)) = children.into_iter().next() else {
            return Err(FieldError::new(format!("no field selected beneath `{}`", field.name)));
        };
        parent = crate::errors_in_data::unwrap_field_error_value(value)?;
        parent_type = child_type;
        nodes = child_nodes;
        path.push(PathSegment::Key(child_key.to_string()));
    }
    Ok(Value::Null)
}

struct ExecutionContext<'a> {
    schema: &'a Schema,
    operation: Operation<'a>,
    fragments: Fragments<'a>,
    variables: Map<String, Value>,
    context: &'a RequestContext,
    errors: Mutex<Vec<GraphQLError>>,
}

type FieldsByKey<'a> = IndexMap<&'a str, Vec<&'a Field>>;

impl<'a> ExecutionContext<'a> {
    fn new(
        schema: &'a Schema,
        document: &'a Document,
        operation: Operation<'a>,
        variables: &Map<String, Value>,
        context: &'a RequestContext,
    ) -> Self {
        ExecutionContext {
            schema,
            operation,
            fragments: fragments_of(document),
            variables: coerce_variable_values(operation.variable_definitions, variables),
            context,
            errors: Mutex::default(),
        }
    }

    fn record(&self, error: GraphQLError) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error);
    }

    fn record_field_error(&self, error: &FieldError, path: &[PathSegment], nodes: &[&Field]) {
        let locations = nodes
            .iter()
            .map(|node| Location::from(node.position))
            .collect();
        self.record(error.to_graphql_error(path.to_vec(), locations));
    }

    /// Groups the fields selected on `type_name` by response key. `None`
    /// accepts every type condition.
    fn collect_fields(
        &self,
        type_name: Option<&str>,
        selection_sets: &[&'a SelectionSet],
    ) -> FieldsByKey<'a> {
        let mut fields = IndexMap::new();
        let mut visited = HashSet::new();
        for selection_set in selection_sets {
            self.collect_into(type_name, selection_set, &mut fields, &mut visited);
        }
        fields
    }

    fn collect_into(
        &self,
        type_name: Option<&str>,
        selection_set: &'a SelectionSet,
        fields: &mut FieldsByKey<'a>,
        visited: &mut HashSet<&'a str>,
    ) {
        for selection in &selection_set.items {
            match selection {
                Selection::Field(field) => {
                    if self.should_include(&field.directives) {
                        fields.entry(response_key(field)).or_default().push(field);
                    }
                }
                Selection::FragmentSpread(spread) => {
                    if !self.should_include(&spread.directives)
                        || !visited.insert(spread.fragment_name.as_str())
                    {
                        continue;
                    }
                    let Some(fragment) = self.fragments.get(spread.fragment_name.as_str()) else {
                        continue;
                    };
                    let TypeCondition::On(condition) = &fragment.type_condition;
                    if self.condition_applies(condition, type_name) {
                        self.collect_into(type_name, &fragment.selection_set, fields, visited);
                    }
                }
                Selection::InlineFragment(inline) => {
                    if !self.should_include(&inline.directives) {
                        continue;
                    }
                    if let Some(TypeCondition::On(condition)) = &inline.type_condition {
                        if !self.condition_applies(condition, type_name) {
                            continue;
                        }
                    }
                    self.collect_into(type_name, &inline.selection_set, fields, visited);
                }
            }
        }
    }

    fn condition_applies(&self, condition: &str, type_name: Option<&str>) -> bool {
        type_name.is_none_or(|object_type| self.schema.type_condition_applies(condition, object_type))
    }

    fn should_include(&self, directives: &[Directive<'static, String>]) -> bool {
        let condition = |name: &str| {
            directives.iter().find(|d| d.name == name).map(|directive| {
                directive
                    .arguments
                    .iter()
                    .find(|(arg, _)| arg == "if")
                    .map(|(_, value)| value_from_ast(value, &self.variables) == Value::Bool(true))
                    .unwrap_or(false)
            })
        };
        condition("skip") != Some(true) && condition("include") != Some(false)
    }

    async fn execute_fields(
        &self,
        type_name: &'a str,
        parent: &Value,
        fields: FieldsByKey<'a>,
        path: Vec<PathSegment>,
    ) -> Result<Map<String, Value>, ()> {
        let futures = fields.into_iter().map(|(key, nodes)| {
            let mut field_path = path.clone();
            field_path.push(PathSegment::Key(key.to_string()));
            async move { (key, self.execute_field(type_name, parent, nodes, field_path).await) }
        });
        let mut result = Map::new();
        for (key, value) in join_all(futures).await {
            result.insert(key.to_string(), value?);
        }
        Ok(result)
    }

    async fn execute_fields_serially(
        &self,
        type_name: &'a str,
        parent: &Value,
        fields: FieldsByKey<'a>,
        path: Vec<PathSegment>,
    ) -> Result<Map<String, Value>, ()> {
        let mut result = Map::new();
        for (key, nodes) in fields {
            let mut field_path = path.clone();
            field_path.push(PathSegment::Key(key.to_string()));
            let value = self
                .execute_field(type_name, parent, nodes, field_path)
                .await?;
            result.insert(key.to_string(), value);
        }
        Ok(result)
    }

    async fn execute_field(
        &self,
        parent_type: &'a str,
        parent: &Value,
        nodes: Vec<&'a Field>,
        path: Vec<PathSegment>,
    ) -> Result<Value, ()> {
        let field = nodes[0];
        let name = field.name.as_str();
        if name == "__typename" {
            return Ok(Value::String(parent_type.to_string()));
        }
        if parent_type == self.schema.query_type && (name == "__schema" || name == "__type") {
            return Ok(self.resolve_introspection(field, &nodes));
        }

        let Some(field_def) = self.schema.field(parent_type, name) else {
            let error = FieldError::new(format!(
                "Cannot query field \"{}\" on type \"{}\".",
                name, parent_type
            ));
            self.record_field_error(&error, &path, &nodes);
            return Ok(Value::Null);
        };

        let args = coerce_arguments(&field_def.args, &field.arguments, &self.variables);
        let resolved = {
            let info = ResolveInfo {
                schema: self.schema,
                field_name: name,
                field_nodes: &nodes,
                parent_type,
                return_type: &field_def.ty,
                path: &path,
                operation: self.operation,
                fragments: &self.fragments,
                variable_values: &self.variables,
            };
            match &field_def.resolver {
                Some(resolver) => resolver.resolve(parent, &args, self.context, &info).await,
                None => Ok(default_field_value(parent, name)),
            }
        };

        match resolved {
            Ok(value) => self.complete_value(&field_def.ty, nodes, value, path).await,
            Err(error) => {
                self.record_field_error(&error, &path, &nodes);
                if field_def.ty.is_non_null() {
                    Err(())
                } else {
                    Ok(Value::Null)
                }
            }
        }
    }

    /// Completes `value` at a position of type `ty`. Only non-null positions
    /// fail; a nullable position swallows a failure beneath it as `null`.
    fn complete_value<'b>(
        &'b self,
        ty: &'a TypeRef,
        nodes: Vec<&'a Field>,
        value: Value,
        path: Vec<PathSegment>,
    ) -> BoxFuture<'b, Result<Value, ()>> {
        async move {
            match ty {
                TypeRef::NonNull(inner) => {
                    match self.complete_inner(inner, nodes.clone(), value, path.clone()).await {
                        Ok(Value::Null) => {
                            let error = FieldError::new(format!(
                                "Cannot return null for non-nullable field {}.",
                                nodes[0].name
                            ));
                            self.record_field_error(&error, &path, &nodes);
                            Err(())
                        }
                        other => other,
                    }
                }
                nullable => Ok(self
                    .complete_inner(nullable, nodes, value, path)
                    .await
                    .unwrap_or(Value::Null)),
            }
        }
        .boxed()
    }

    async fn complete_inner(
        &self,
        ty: &'a TypeRef,
        nodes: Vec<&'a Field>,
        value: Value,
        path: Vec<PathSegment>,
    ) -> Result<Value, ()> {
        if let Some(sentinel) = FieldErrorValue::from_value(&value) {
            self.record_field_error(&sentinel.to_field_error(), &path, &nodes);
            return Err(());
        }
        if value.is_null() {
            return Ok(Value::Null);
        }

        match ty {
            TypeRef::NonNull(_) => self.complete_value(ty, nodes, value, path).await,
            TypeRef::List(item_type) => {
                let Value::Array(items) = value else {
                    let error = FieldError::new(format!(
                        "Expected a list for field \"{}\".",
                        nodes[0].name
                    ));
                    self.record_field_error(&error, &path, &nodes);
                    return Err(());
                };
                let futures = items.into_iter().enumerate().map(|(index, item)| {
                    let mut item_path = path.clone();
                    item_path.push(PathSegment::Index(index));
                    self.complete_value(item_type, nodes.clone(), item, item_path)
                });
                join_all(futures)
                    .await
                    .into_iter()
                    .collect::<Result<Vec<_>, ()>>()
                    .map(Value::Array)
            }
            TypeRef::Named(name) => {
                let Some((type_name, type_def)) = self.schema.types.get_key_value(name.as_str()) else {
                    let error = FieldError::new(format!("Unknown type \"{}\".", name));
                    self.record_field_error(&error, &path, &nodes);
                    return Err(());
                };
                match type_def {
                    TypeDef::Scalar(_) | TypeDef::Enum(_) => Ok(value),
                    TypeDef::Object(_) => self.complete_object(type_name, nodes, value, path).await,
                    TypeDef::Interface(_) | TypeDef::Union(_) => {
                        match self.resolve_abstract_type(type_def, &value) {
                            Some(object_type) => {
                                self.complete_object(object_type, nodes, value, path).await
                            }
                            None => {
                                let error = FieldError::new(format!(
                                    "Abstract type \"{}\" must resolve to an Object type at runtime for field \"{}\".",
                                    type_name, nodes[0].name
                                ));
                                self.record_field_error(&error, &path, &nodes);
                                Err(())
                            }
                        }
                    }
                    TypeDef::InputObject(_) => {
                        let error = FieldError::new(format!(
                            "Input type \"{}\" cannot be used as an output type.",
                            type_name
                        ));
                        self.record_field_error(&error, &path, &nodes);
                        Err(())
                    }
                }
            }
        }
    }

    async fn complete_object(
        &self,
        type_name: &'a str,
        nodes: Vec<&'a Field>,
        value: Value,
        path: Vec<PathSegment>,
    ) -> Result<Value, ()> {
        let selection_sets: Vec<&'a SelectionSet> =
            nodes.iter().map(|node| &node.selection_set).collect();
        let fields = self.collect_fields(Some(type_name), &selection_sets);
        self.execute_fields(type_name, &value, fields, path)
            .await
            .map(Value::Object)
    }

    fn resolve_abstract_type(&self, type_def: &TypeDef, value: &Value) -> Option<&'a str> {
        let resolver = match type_def {
            TypeDef::Interface(interface) => interface.resolve_type.as_ref(),
            TypeDef::Union(union) => union.resolve_type.as_ref(),
            _ => None,
        };
        let runtime_type = match resolver {
            Some(resolver) => resolver.resolve_type(value, self.schema, type_def.name())?,
            None => value.get("__typename")?.as_str()?.to_string(),
        };
        if !self
            .schema
            .possible_types(type_def.name())
            .contains(&runtime_type.as_str())
        {
            return None;
        }
        self.schema
            .types
            .get_key_value(runtime_type.as_str())
            .map(|(name, _)| name.as_str())
    }

    fn resolve_introspection(&self, field: &'a Field, nodes: &[&'a Field]) -> Value {
        let schema = introspect_schema(self.schema);
        let value = if field.name == "__schema" {
            schema
        } else {
            let requested = field
                .arguments
                .iter()
                .find(|(name, _)| name == "name")
                .map(|(_, value)| value_from_ast(value, &self.variables));
            schema["types"]
                .as_array()
                .and_then(|types| {
                    types
                        .iter()
                        .find(|t| Some(&t["name"]) == requested.as_ref())
                        .cloned()
                })
                .unwrap_or(Value::Null)
        };
        let selection_sets: Vec<&'a SelectionSet> =
            nodes.iter().map(|node| &node.selection_set).collect();
        self.select_introspection(&value, &selection_sets)
    }

    /// Projects introspection data onto the requested selection.
    fn select_introspection(&self, value: &Value, selection_sets: &[&'a SelectionSet]) -> Value {
        match value {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.select_introspection(item, selection_sets))
                    .collect(),
            ),
            Value::Object(object) => {
                let mut result = Map::new();
                for (key, nodes) in self.collect_fields(None, selection_sets) {
                    let node = nodes[0];
                    let mut field_value = object.get(&node.name).cloned().unwrap_or(Value::Null);
                    if node.name == "fields" || node.name == "enumValues" {
                        let include_deprecated = node
                            .arguments
                            .iter()
                            .find(|(name, _)| name == "includeDeprecated")
                            .map(|(_, value)| value_from_ast(value, &self.variables) == Value::Bool(true))
                            .unwrap_or(false);
                        if let (false, Value::Array(items)) = (include_deprecated, &mut field_value) {
                            items.retain(|item| item["isDeprecated"] != Value::Bool(true));
                        }
                    }
                    let child_sets: Vec<&'a SelectionSet> =
                        nodes.iter().map(|node| &node.selection_set).collect();
                    let projected = if child_sets.iter().all(|set| set.items.is_empty()) {
                        field_value
                    } else {
                        self.select_introspection(&field_value, &child_sets)
                    };
                    result.insert(key.to_string(), projected);
                }
                Value::Object(result)
            }
            other => other.clone(),
        }
    }
}
