use graphql_parser::query::{Definition, OperationDefinition, Selection};
use indexmap::IndexMap;
use serde_json::{Map, Value, json};

use super::{
    DirectiveDef, EnumType, EnumValueDef, FieldDef, InputObjectType, InputValueDef,
    InterfaceType, ObjectType, ScalarType, Schema, TypeDef, TypeRef, UnionType,
    is_builtin_scalar, is_introspection_type,
};
use crate::error::Error;
use crate::execution::values::{print_literal, value_from_ast};

/// The standard introspection query used to fetch upstream schemas.
pub const INTROSPECTION_QUERY: &str = r#"
query IntrospectionQuery {
  __schema {
    queryType { name }
    mutationType { name }
    subscriptionType { name }
    types { ...FullType }
    directives {
      name
      description
      locations
      isRepeatable
      args { ...InputValue }
    }
  }
}

fragment FullType on __Type {
  kind
  name
  description
  fields(includeDeprecated: true) {
    name
    description
    args { ...InputValue }
    type { ...TypeRef }
    isDeprecated
    deprecationReason
  }
  inputFields { ...InputValue }
  interfaces { ...TypeRef }
  enumValues(includeDeprecated: true) {
    name
    description
    isDeprecated
    deprecationReason
  }
  possibleTypes { ...TypeRef }
}

fragment InputValue on __InputValue {
  name
  description
  type { ...TypeRef }
  defaultValue
}

fragment TypeRef on __Type {
  kind
  name
  ofType {
    kind
    name
    ofType {
      kind
      name
      ofType {
        kind
        name
        ofType {
          kind
          name
          ofType {
            kind
            name
            ofType {
              kind
              name
              ofType { kind name }
            }
          }
        }
      }
    }
  }
}
"#;

/// The `__schema` object describing `schema`.
pub fn introspect_schema(schema: &Schema) -> Value {
    let root = |name: Option<&str>| match name {
        Some(name) => json!({ "name": name }),
        None => Value::Null,
    };
    let types: Vec<Value> = schema
        .types
        .values()
        .filter(|t| !is_introspection_type(t.name()))
        .map(|t| introspect_type(schema, t))
        .collect();

    let mut directives: Vec<Value> = builtin_directives()
        .iter()
        .filter(|builtin| !schema.directives.iter().any(|d| d.name == builtin.name))
        .chain(schema.directives.iter())
        .map(|directive| {
            json!({
                "name": directive.name,
                "description": directive.description,
                "locations": directive.locations,
                "isRepeatable": directive.repeatable,
                "args": introspect_input_values(schema, &directive.args),
            })
        })
        .collect();
    directives.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

    json!({
        "queryType": root(Some(&schema.query_type)),
        "mutationType": root(schema.mutation_type.as_deref()),
        "subscriptionType": root(schema.subscription_type.as_deref()),
        "types": types,
        "directives": directives,
    })
}

fn builtin_directives() -> Vec<DirectiveDef> {
    let condition = |name: &str, description: &str| DirectiveDef {
        name: name.to_string(),
        description: Some(description.to_string()),
        args: IndexMap::from([(
            "if".to_string(),
            InputValueDef::new("if", TypeRef::non_null(TypeRef::named("Boolean"))),
        )]),
        locations: vec![
            "FIELD".to_string(),
            "FRAGMENT_SPREAD".to_string(),
            "INLINE_FRAGMENT".to_string(),
        ],
        repeatable: false,
    };
    let mut reason = InputValueDef::new("reason", TypeRef::named("String"));
    reason.default_value = Some(json!("No longer supported"));
    vec![
        condition("include", "Directs the executor to include this field or fragment only when the `if` argument is true."),
        condition("skip", "Directs the executor to skip this field or fragment when the `if` argument is true."),
        DirectiveDef {
            name: "deprecated".to_string(),
            description: Some("Marks an element of a GraphQL schema as no longer supported.".to_string()),
            args: IndexMap::from([("reason".to_string(), reason)]),
            locations: vec!["FIELD_DEFINITION".to_string(), "ENUM_VALUE".to_string()],
            repeatable: false,
        },
    ]
}

fn introspect_type(schema: &Schema, type_def: &TypeDef) -> Value {
    let mut fields = Value::Null;
    let mut interfaces = Value::Null;
    let mut possible_types = Value::Null;
    let mut enum_values = Value::Null;
    let mut input_fields = Value::Null;

    match type_def {
        TypeDef::Scalar(_) => {}
        TypeDef::Object(object) => {
            fields = introspect_fields(schema, &object.fields);
            interfaces = Value::Array(
                object
                    .interfaces
                    .iter()
                    .map(|name| named_type_ref(schema, name))
                    .collect(),
            );
        }
        TypeDef::Interface(interface) => {
            fields = introspect_fields(schema, &interface.fields);
            interfaces = json!([]);
            possible_types = possible_type_refs(schema, &interface.name);
        }
        TypeDef::Union(union) => possible_types = possible_type_refs(schema, &union.name),
        TypeDef::Enum(enum_type) => {
            enum_values = Value::Array(
                enum_type
                    .values
                    .values()
                    .map(|value| {
                        json!({
                            "name": value.name,
                            "description": value.description,
                            "isDeprecated": value.deprecation_reason.is_some(),
                            "deprecationReason": value.deprecation_reason,
                        })
                    })
                    .collect(),
            );
        }
        TypeDef::InputObject(input) => input_fields = introspect_input_values(schema, &input.fields),
    }

    json!({
        "kind": type_def.kind().introspection_name(),
        "name": type_def.name(),
        "description": type_def.description(),
        "fields": fields,
        "inputFields": input_fields,
        "interfaces": interfaces,
        "enumValues": enum_values,
        "possibleTypes": possible_types,
        "specifiedByURL": Value::Null,
    })
}

fn introspect_fields(schema: &Schema, fields: &IndexMap<String, FieldDef>) -> Value {
    Value::Array(
        fields
            .values()
            .map(|field| {
                json!({
                    "name": field.name,
                    "description": field.description,
                    "args": introspect_input_values(schema, &field.args),
                    "type": type_ref_value(schema, &field.ty),
                    "isDeprecated": field.deprecation_reason.is_some(),
                    "deprecationReason": field.deprecation_reason,
                })
            })
            .collect(),
    )
}

fn introspect_input_values(schema: &Schema, values: &IndexMap<String, InputValueDef>) -> Value {
    Value::Array(
        values
            .values()
            .map(|value| {
                json!({
                    "name": value.name,
                    "description": value.description,
                    "type": type_ref_value(schema, &value.ty),
                    "defaultValue": value
                        .default_value
                        .as_ref()
                        .map(|default| print_literal(default, &value.ty, schema)),
                })
            })
            .collect(),
    )
}

fn type_ref_value(schema: &Schema, ty: &TypeRef) -> Value {
    match ty {
        TypeRef::Named(name) => named_type_ref(schema, name),
        TypeRef::List(inner) => json!({
            "kind": "LIST",
            "name": Value::Null,
            "ofType": type_ref_value(schema, inner),
        }),
        TypeRef::NonNull(inner) => json!({
            "kind": "NON_NULL",
            "name": Value::Null,
            "ofType": type_ref_value(schema, inner),
        }),
    }
}

fn named_type_ref(schema: &Schema, name: &str) -> Value {
    let kind = schema
        .get_type(name)
        .map(|t| t.kind().introspection_name())
        .unwrap_or("SCALAR");
    json!({ "kind": kind, "name": name, "ofType": Value::Null })
}

fn possible_type_refs(schema: &Schema, abstract_type: &str) -> Value {
    Value::Array(
        schema
            .possible_types(abstract_type)
            .into_iter()
            .map(|name| named_type_ref(schema, name))
            .collect(),
    )
}

/// Builds a schema from an introspection result. Accepts either the `data`
/// object of the response or the `__schema` object itself.
pub fn schema_from_introspection(introspection: &Value) -> Result<Schema, Error> {
    let schema_value = introspection.get("__schema").unwrap_or(introspection);
    let query_type = schema_value["queryType"]["name"]
        .as_str()
        .ok_or_else(|| Error::Schema("introspection result has no query type".to_string()))?;
    let root_name = |key: &str| schema_value[key]["name"].as_str().map(str::to_string);

    let mut schema = Schema {
        query_type: query_type.to_string(),
        mutation_type: root_name("mutationType"),
        subscription_type: root_name("subscriptionType"),
        types: IndexMap::new(),
        directives: Vec::new(),
    };
    schema.insert_builtin_scalars();

    let types = schema_value["types"]
        .as_array()
        .ok_or_else(|| Error::Schema("introspection result has no types".to_string()))?;
    for type_value in types {
        let name = required_str(type_value, "name")?;
        if is_introspection_type(name) || is_builtin_scalar(name) {
            continue;
        }
        schema.add_type(type_from_introspection(type_value)?)?;
    }

    if let Some(directives) = schema_value["directives"].as_array() {
        for directive in directives {
            schema.directives.push(DirectiveDef {
                name: required_str(directive, "name")?.to_string(),
                description: optional_string(directive, "description"),
                args: input_values_from_introspection(&directive["args"])?,
                locations: directive["locations"]
                    .as_array()
                    .map(|locations| {
                        locations
                            .iter()
                            .filter_map(|l| l.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default(),
                repeatable: directive["isRepeatable"].as_bool().unwrap_or(false),
            });
        }
    }

    if schema.object_type(&schema.query_type).is_none() {
        return Err(Error::Schema(format!(
            "query root type `{}` is not defined",
            schema.query_type
        )));
    }
    Ok(schema)
}

fn type_from_introspection(value: &Value) -> Result<TypeDef, Error> {
    let name = required_str(value, "name")?.to_string();
    let description = optional_string(value, "description");
    let names_of = |key: &str| -> Vec<String> {
        value[key]
            .as_array()
            .map(|refs| {
                refs.iter()
                    .filter_map(|r| r["name"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    };

    Ok(match required_str(value, "kind")? {
        "SCALAR" => TypeDef::Scalar(ScalarType { name, description }),
        "OBJECT" => TypeDef::Object(ObjectType {
            name,
            description,
            fields: fields_from_introspection(&value["fields"])?,
            interfaces: names_of("interfaces"),
        }),
        "INTERFACE" => TypeDef::Interface(InterfaceType {
            name,
            description,
            fields: fields_from_introspection(&value["fields"])?,
            resolve_type: None,
        }),
        "UNION" => TypeDef::Union(UnionType {
            name,
            description,
            types: names_of("possibleTypes"),
            resolve_type: None,
        }),
        "ENUM" => TypeDef::Enum(EnumType {
            name,
            description,
            values: value["enumValues"]
                .as_array()
                .map(|values| values.as_slice())
                .unwrap_or_default()
                .iter()
                .map(|v| {
                    let name = required_str(v, "name")?.to_string();
                    Ok((
                        name.clone(),
                        EnumValueDef {
                            name,
                            description: optional_string(v, "description"),
                            deprecation_reason: deprecation_from_introspection(v),
                        },
                    ))
                })
                .collect::<Result<_, Error>>()?,
        }),
        "INPUT_OBJECT" => TypeDef::InputObject(InputObjectType {
            name,
            description,
            fields: input_values_from_introspection(&value["inputFields"])?,
        }),
        other => {
            return Err(Error::Schema(format!(
                "type `{}` has unknown kind `{}`",
                name, other
            )));
        }
    })
}

fn fields_from_introspection(value: &Value) -> Result<IndexMap<String, FieldDef>, Error> {
    value
        .as_array()
        .map(|fields| fields.as_slice())
        .unwrap_or_default()
        .iter()
        .map(|field| {
            let name = required_str(field, "name")?.to_string();
            Ok((
                name.clone(),
                FieldDef {
                    name,
                    description: optional_string(field, "description"),
                    args: input_values_from_introspection(&field["args"])?,
                    ty: type_ref_from_introspection(&field["type"])?,
                    deprecation_reason: deprecation_from_introspection(field),
                    resolver: None,
                },
            ))
        })
        .collect()
}

fn input_values_from_introspection(value: &Value) -> Result<IndexMap<String, InputValueDef>, Error> {
    value
        .as_array()
        .map(|values| values.as_slice())
        .unwrap_or_default()
        .iter()
        .map(|input| {
            let name = required_str(input, "name")?.to_string();
            let default_value = match input["defaultValue"].as_str() {
                Some(literal) => Some(parse_literal(literal)?),
                None => None,
            };
            Ok((
                name.clone(),
                InputValueDef {
                    name,
                    description: optional_string(input, "description"),
                    ty: type_ref_from_introspection(&input["type"])?,
                    default_value,
                },
            ))
        })
        .collect()
}

fn type_ref_from_introspection(value: &Value) -> Result<TypeRef, Error> {
    match required_str(value, "kind")? {
        "NON_NULL" => Ok(TypeRef::NonNull(Box::new(type_ref_from_introspection(
            &value["ofType"],
        )?))),
        "LIST" => Ok(TypeRef::List(Box::new(type_ref_from_introspection(
            &value["ofType"],
        )?))),
        _ => Ok(TypeRef::named(required_str(value, "name")?)),
    }
}

fn deprecation_from_introspection(value: &Value) -> Option<String> {
    if value["isDeprecated"].as_bool() != Some(true) {
        return None;
    }
    Some(optional_string(value, "deprecationReason").unwrap_or_else(|| "No longer supported".to_string()))
}

/// Parses a default value literal by embedding it as an argument of a
/// throwaway query.
fn parse_literal(literal: &str) -> Result<Value, Error> {
    let source = format!("{{ f(v: {}) }}", literal);
    let invalid = || Error::Parse {
        what: "default value",
        message: literal.to_string(),
    };
    let document = graphql_parser::parse_query::<String>(&source).map_err(|_| invalid())?;
    let Some(Definition::Operation(OperationDefinition::SelectionSet(selection_set))) =
        document.definitions.first()
    else {
        return Err(invalid());
    };
    match selection_set.items.first() {
        Some(Selection::Field(field)) => field
            .arguments
            .first()
            .map(|(_, value)| value_from_ast(value, &Map::new()))
            .ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

fn required_str<'v>(value: &'v Value, key: &str) -> Result<&'v str, Error> {
    value[key].as_str().ok_or_else(|| {
        Error::Schema(format!("introspection entry is missing `{}`: {}", key, value))
    })
}

fn optional_string(value: &Value, key: &str) -> Option<String> {
    value[key].as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn introspection_round_trips_through_a_schema() {
        let schema = Schema::from_sdl(
            r#"
            interface Node { id: ID! }
            type Person implements Node { id: ID!, nick: String @deprecated(reason: "gone") }
            enum Order { ASC DESC }
            input Filter { name: String = "x", order: Order = DESC, ids: [ID!] }
            type Query { people(filter: Filter, first: Int = 3): [Person!]!, node: Node }
            "#,
        )
        .unwrap();

        let introspection = json!({ "__schema": introspect_schema(&schema) });
        let rebuilt = schema_from_introspection(&introspection).unwrap();

        assert_eq!(rebuilt.to_sdl(), schema.to_sdl());
        assert_eq!(
            rebuilt.field("Query", "people").unwrap().args["first"].default_value,
            Some(json!(3))
        );
    }

    #[test]
    fn missing_query_type_is_rejected() {
        let error = schema_from_introspection(&json!({ "__schema": { "types": [] } })).unwrap_err();
        assert!(matches!(error, Error::Schema(_)));
    }
}
