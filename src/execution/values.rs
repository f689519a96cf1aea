use graphql_parser::query::{Number, Value as AstValue, VariableDefinition};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::schema::{InputValueDef, Schema, TypeDef, TypeRef};

/// Converts a literal (or variable reference) into a JSON value. Enum values
/// become strings; unbound variables become `null`.
pub fn value_from_ast(value: &AstValue<'_, String>, variables: &Map<String, Value>) -> Value {
    match value {
        AstValue::Variable(name) => variables.get(name).cloned().unwrap_or(Value::Null),
        AstValue::Int(number) => number.as_i64().map(Value::from).unwrap_or(Value::Null),
        AstValue::Float(float) => serde_json::Number::from_f64(*float)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        AstValue::String(string) => Value::String(string.clone()),
        AstValue::Boolean(boolean) => Value::Bool(*boolean),
        AstValue::Null => Value::Null,
        AstValue::Enum(name) => Value::String(name.clone()),
        AstValue::List(items) => Value::Array(
            items
                .iter()
                .map(|item| value_from_ast(item, variables))
                .collect(),
        ),
        AstValue::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, value)| (key.clone(), value_from_ast(value, variables)))
                .collect(),
        ),
    }
}

/// Converts a JSON value into a literal without type information: strings
/// stay strings, so enum-typed positions must be bound through variables.
pub fn value_to_ast(value: &Value) -> AstValue<'static, String> {
    match value {
        Value::Null => AstValue::Null,
        Value::Bool(boolean) => AstValue::Boolean(*boolean),
        Value::Number(number) => match number.as_i64().and_then(|n| i32::try_from(n).ok()) {
            Some(int) => AstValue::Int(Number::from(int)),
            None => AstValue::Float(number.as_f64().unwrap_or_default()),
        },
        Value::String(string) => AstValue::String(string.clone()),
        Value::Array(items) => AstValue::List(items.iter().map(value_to_ast).collect()),
        Value::Object(fields) => AstValue::Object(
            fields
                .iter()
                .map(|(key, value)| (key.clone(), value_to_ast(value)))
                .collect::<BTreeMap<_, _>>(),
        ),
    }
}

/// Like [`value_to_ast`], with strings at enum-typed positions of `ty`
/// turned into enum values.
pub fn typed_value_to_ast(value: &Value, ty: &TypeRef, schema: &Schema) -> AstValue<'static, String> {
    match (value, ty) {
        (Value::Null, _) => AstValue::Null,
        (_, TypeRef::NonNull(inner)) => typed_value_to_ast(value, inner, schema),
        (Value::Array(items), TypeRef::List(inner)) => AstValue::List(
            items
                .iter()
                .map(|item| typed_value_to_ast(item, inner, schema))
                .collect(),
        ),
        (_, TypeRef::List(inner)) => typed_value_to_ast(value, inner, schema),
        (Value::String(string), TypeRef::Named(name)) => match schema.get_type(name) {
            Some(TypeDef::Enum(_)) => AstValue::Enum(string.clone()),
            _ => AstValue::String(string.clone()),
        },
        (Value::Object(fields), TypeRef::Named(name)) => {
            let input = schema.input_object_type(name);
            AstValue::Object(
                fields
                    .iter()
                    .map(|(key, value)| {
                        let literal = match input.and_then(|input| input.fields.get(key)) {
                            Some(field) => typed_value_to_ast(value, &field.ty, schema),
                            None => value_to_ast(value),
                        };
                        (key.clone(), literal)
                    })
                    .collect::<BTreeMap<_, _>>(),
            )
        }
        (other, _) => value_to_ast(other),
    }
}

/// Prints a JSON value as a GraphQL literal of type `ty`.
pub fn print_literal(value: &Value, ty: &TypeRef, schema: &Schema) -> String {
    match (value, ty) {
        (Value::Null, _) => "null".to_string(),
        (_, TypeRef::NonNull(inner)) => print_literal(value, inner, schema),
        (Value::Array(items), TypeRef::List(inner)) => {
            let items = items
                .iter()
                .map(|item| print_literal(item, inner, schema))
                .collect::<Vec<_>>();
            format!("[{}]", items.join(", "))
        }
        (_, TypeRef::List(inner)) => print_literal(value, inner, schema),
        (Value::String(string), TypeRef::Named(name)) => match schema.get_type(name) {
            Some(TypeDef::Enum(_)) => string.clone(),
            _ => Value::String(string.clone()).to_string(),
        },
        (Value::Object(fields), TypeRef::Named(name)) => {
            let input = schema.input_object_type(name);
            let fields = fields
                .iter()
                .map(|(key, value)| {
                    let field_type = input
                        .and_then(|input| input.fields.get(key))
                        .map(|field| field.ty.clone())
                        .unwrap_or_else(|| TypeRef::named("String"));
                    format!("{}: {}", key, print_literal(value, &field_type, schema))
                })
                .collect::<Vec<_>>();
            format!("{{{}}}", fields.join(", "))
        }
        (other, _) => other.to_string(),
    }
}

/// Evaluates field arguments, falling back to declared defaults. Arguments
/// bound to absent variables are treated as not provided.
pub fn coerce_arguments(
    definitions: &IndexMap<String, InputValueDef>,
    arguments: &[(String, AstValue<'static, String>)],
    variables: &Map<String, Value>,
) -> Map<String, Value> {
    let mut coerced = Map::new();
    for (name, value) in arguments {
        if let AstValue::Variable(variable) = value {
            if !variables.contains_key(variable) {
                continue;
            }
        }
        coerced.insert(name.clone(), value_from_ast(value, variables));
    }
    for definition in definitions.values() {
        if coerced.contains_key(&definition.name) {
            continue;
        }
        if let Some(default) = &definition.default_value {
            coerced.insert(definition.name.clone(), default.clone());
        }
    }
    coerced
}

/// Applies variable defaults to the provided variable values.
pub fn coerce_variable_values(
    definitions: &[VariableDefinition<'static, String>],
    provided: &Map<String, Value>,
) -> Map<String, Value> {
    let mut coerced = Map::new();
    let no_variables = Map::new();
    for definition in definitions {
        if let Some(value) = provided.get(&definition.name) {
            coerced.insert(definition.name.clone(), value.clone());
        } else if let Some(default) = &definition.default_value {
            coerced.insert(
                definition.name.clone(),
                value_from_ast(default, &no_variables),
            );
        }
    }
    coerced
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn literal_printing_respects_enum_types() {
        let schema = Schema::from_sdl(
            "enum Color { RED } input Filter { color: Color, name: String } type Query { a: Int }",
        )
        .unwrap();
        let printed = print_literal(
            &json!({"color": "RED", "name": "x"}),
            &TypeRef::named("Filter"),
            &schema,
        );
        assert_eq!(printed, r#"{color: RED, name: "x"}"#);
    }

    #[test]
    fn arguments_use_defaults_and_skip_unbound_variables() {
        let mut definitions = IndexMap::new();
        definitions.insert(
            "first".to_string(),
            InputValueDef {
                default_value: Some(json!(10)),
                ..InputValueDef::new("first", TypeRef::named("Int"))
            },
        );
        let arguments = vec![("first".to_string(), AstValue::Variable("n".to_string()))];

        let coerced = coerce_arguments(&definitions, &arguments, &Map::new());
        assert_eq!(Value::Object(coerced), json!({"first": 10}));

        let mut variables = Map::new();
        variables.insert("n".to_string(), json!(3));
        let coerced = coerce_arguments(&definitions, &arguments, &variables);
        assert_eq!(Value::Object(coerced), json!({"first": 3}));
    }
}
