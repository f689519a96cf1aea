use graphql_parser::parse_schema;
use graphql_parser::schema::{
    Definition, Directive, Field, InputValue, TypeDefinition, TypeExtension,
};
use indexmap::IndexMap;
use serde_json::Map;
use std::fmt::Write;

use super::{
    DirectiveDef, EnumType, EnumValueDef, FieldDef, InputObjectType, InputValueDef,
    InterfaceType, ObjectType, ScalarType, Schema, TypeDef, TypeRef, UnionType,
};
use crate::error::Error;
use crate::execution::values::{print_literal, value_from_ast};

pub(super) fn parse_sdl(sdl: &str) -> Result<Schema, Error> {
    let document = parse_schema::<String>(sdl).map_err(|e| Error::Parse {
        what: "schema",
        message: e.to_string(),
    })?;

    let mut schema = Schema {
        query_type: "Query".to_string(),
        mutation_type: None,
        subscription_type: None,
        types: IndexMap::new(),
        directives: Vec::new(),
    };
    schema.insert_builtin_scalars();

    let mut explicit_roots = false;
    let mut extensions = Vec::new();

    for definition in &document.definitions {
        match definition {
            Definition::SchemaDefinition(def) => {
                explicit_roots = true;
                if let Some(query) = &def.query {
                    schema.query_type = query.clone();
                }
                schema.mutation_type = def.mutation.clone();
                schema.subscription_type = def.subscription.clone();
            }
            Definition::TypeDefinition(typedef) => {
                let type_def = convert_type_definition(typedef);
                if super::is_builtin_scalar(type_def.name()) {
                    continue;
                }
                schema.add_type(type_def)?;
            }
            Definition::TypeExtension(extension) => extensions.push(extension),
            Definition::DirectiveDefinition(def) => {
                schema.directives.push(DirectiveDef {
                    name: def.name.clone(),
                    description: def.description.clone(),
                    args: convert_input_values(&def.arguments),
                    locations: def.locations.iter().map(|l| l.as_str().to_string()).collect(),
                    repeatable: def.repeatable,
                });
            }
        }
    }

    for extension in extensions {
        if let TypeExtension::Object(ext) = extension {
            let object = schema
                .object_type_mut(&ext.name)
                .ok_or_else(|| Error::TypeNotFound(ext.name.clone()))?;
            for field in &ext.fields {
                object.fields.insert(field.name.clone(), convert_field(field));
            }
            object.interfaces.extend(ext.implements_interfaces.iter().cloned());
        }
    }

    if !explicit_roots {
        if schema.types.contains_key("Mutation") {
            schema.mutation_type = Some("Mutation".to_string());
        }
        if schema.types.contains_key("Subscription") {
            schema.subscription_type = Some("Subscription".to_string());
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

fn convert_type_definition(typedef: &TypeDefinition<'_, String>) -> TypeDef {
    match typedef {
        TypeDefinition::Scalar(scalar) => TypeDef::Scalar(ScalarType {
            name: scalar.name.clone(),
            description: scalar.description.clone(),
        }),
        TypeDefinition::Object(obj) => TypeDef::Object(ObjectType {
            name: obj.name.clone(),
            description: obj.description.clone(),
            fields: convert_fields(&obj.fields),
            interfaces: obj.implements_interfaces.clone(),
        }),
        TypeDefinition::Interface(iface) => TypeDef::Interface(InterfaceType {
            name: iface.name.clone(),
            description: iface.description.clone(),
            fields: convert_fields(&iface.fields),
            resolve_type: None,
        }),
        TypeDefinition::Union(union_type) => TypeDef::Union(UnionType {
            name: union_type.name.clone(),
            description: union_type.description.clone(),
            types: union_type.types.clone(),
            resolve_type: None,
        }),
        TypeDefinition::Enum(enum_type) => TypeDef::Enum(EnumType {
            name: enum_type.name.clone(),
            description: enum_type.description.clone(),
            values: enum_type
                .values
                .iter()
                .map(|value| {
                    (
                        value.name.clone(),
                        EnumValueDef {
                            name: value.name.clone(),
                            description: value.description.clone(),
                            deprecation_reason: deprecation_reason(&value.directives),
                        },
                    )
                })
                .collect(),
        }),
        TypeDefinition::InputObject(input) => TypeDef::InputObject(InputObjectType {
            name: input.name.clone(),
            description: input.description.clone(),
            fields: convert_input_values(&input.fields),
        }),
    }
}

fn convert_fields(fields: &[Field<'_, String>]) -> IndexMap<String, FieldDef> {
    fields
        .iter()
        .map(|field| (field.name.clone(), convert_field(field)))
        .collect()
}

fn convert_field(field: &Field<'_, String>) -> FieldDef {
    FieldDef {
        name: field.name.clone(),
        description: field.description.clone(),
        args: convert_input_values(&field.arguments),
        ty: TypeRef::from_ast(&field.field_type),
        deprecation_reason: deprecation_reason(&field.directives),
        resolver: None,
    }
}

fn convert_input_values(values: &[InputValue<'_, String>]) -> IndexMap<String, InputValueDef> {
    let no_variables = Map::new();
    values
        .iter()
        .map(|value| {
            (
                value.name.clone(),
                InputValueDef {
                    name: value.name.clone(),
                    description: value.description.clone(),
                    ty: TypeRef::from_ast(&value.value_type),
                    default_value: value
                        .default_value
                        .as_ref()
                        .map(|v| value_from_ast(v, &no_variables)),
                },
            )
        })
        .collect()
}

fn deprecation_reason(directives: &[Directive<'_, String>]) -> Option<String> {
    let directive = directives.iter().find(|d| d.name == "deprecated")?;
    let reason = directive
        .arguments
        .iter()
        .find(|(name, _)| name == "reason")
        .and_then(|(_, value)| match value {
            graphql_parser::schema::Value::String(reason) => Some(reason.clone()),
            _ => None,
        });
    Some(reason.unwrap_or_else(|| "No longer supported".to_string()))
}

pub(super) fn print_sdl(schema: &Schema) -> String {
    let mut out = String::new();

    let default_roots = schema.query_type == "Query"
        && schema.mutation_type.as_deref().is_none_or(|m| m == "Mutation")
        && schema
            .subscription_type
            .as_deref()
            .is_none_or(|s| s == "Subscription");
    if !default_roots {
        let _ = writeln!(out, "schema {{");
        let _ = writeln!(out, "  query: {}", schema.query_type);
        if let Some(mutation) = &schema.mutation_type {
            let _ = writeln!(out, "  mutation: {}", mutation);
        }
        if let Some(subscription) = &schema.subscription_type {
            let _ = writeln!(out, "  subscription: {}", subscription);
        }
        let _ = writeln!(out, "}}\n");
    }

    for directive in schema.directives.iter().filter(|d| !d.is_builtin()) {
        print_description(&mut out, directive.description.as_deref(), "");
        let _ = writeln!(
            out,
            "directive @{}{}{} on {}\n",
            directive.name,
            print_args(schema, &directive.args),
            if directive.repeatable { " repeatable" } else { "" },
            directive.locations.join(" | ")
        );
    }

    for type_def in schema.user_types() {
        print_description(&mut out, type_def.description(), "");
        match type_def {
            TypeDef::Scalar(scalar) => {
                let _ = writeln!(out, "scalar {}\n", scalar.name);
            }
            TypeDef::Object(object) => {
                let implements = if object.interfaces.is_empty() {
                    String::new()
                } else {
                    format!(" implements {}", object.interfaces.join(" & "))
                };
                let _ = writeln!(out, "type {}{} {{", object.name, implements);
                print_fields(&mut out, schema, &object.fields);
                let _ = writeln!(out, "}}\n");
            }
            TypeDef::Interface(interface) => {
                let _ = writeln!(out, "interface {} {{", interface.name);
                print_fields(&mut out, schema, &interface.fields);
                let _ = writeln!(out, "}}\n");
            }
            TypeDef::Union(union) => {
                let _ = writeln!(out, "union {} = {}\n", union.name, union.types.join(" | "));
            }
            TypeDef::Enum(enum_type) => {
                let _ = writeln!(out, "enum {} {{", enum_type.name);
                for value in enum_type.values.values() {
                    print_description(&mut out, value.description.as_deref(), "  ");
                    let _ = writeln!(
                        out,
                        "  {}{}",
                        value.name,
                        print_deprecation(value.deprecation_reason.as_deref())
                    );
                }
                let _ = writeln!(out, "}}\n");
            }
            TypeDef::InputObject(input) => {
                let _ = writeln!(out, "input {} {{", input.name);
                for field in input.fields.values() {
                    print_description(&mut out, field.description.as_deref(), "  ");
                    let _ = writeln!(out, "  {}", print_input_value(schema, field));
                }
                let _ = writeln!(out, "}}\n");
            }
        }
    }

    out.trim_end().to_string() + "\n"
}

fn print_fields(out: &mut String, schema: &Schema, fields: &IndexMap<String, FieldDef>) {
    for field in fields.values() {
        print_description(out, field.description.as_deref(), "  ");
        let _ = writeln!(
            out,
            "  {}{}: {}{}",
            field.name,
            print_args(schema, &field.args),
            field.ty,
            print_deprecation(field.deprecation_reason.as_deref())
        );
    }
}

fn print_args(schema: &Schema, args: &IndexMap<String, InputValueDef>) -> String {
    if args.is_empty() {
        return String::new();
    }
    let args = args
        .values()
        .map(|arg| print_input_value(schema, arg))
        .collect::<Vec<_>>();
    format!("({})", args.join(", "))
}

fn print_input_value(schema: &Schema, value: &InputValueDef) -> String {
    match &value.default_value {
        Some(default) => format!(
            "{}: {} = {}",
            value.name,
            value.ty,
            print_literal(default, &value.ty, schema)
        ),
        None => format!("{}: {}", value.name, value.ty),
    }
}

fn print_deprecation(reason: Option<&str>) -> String {
    match reason {
        Some(reason) => format!(
            " @deprecated(reason: {})",
            serde_json::Value::String(reason.to_string())
        ),
        None => String::new(),
    }
}

fn print_description(out: &mut String, description: Option<&str>, indent: &str) {
    if let Some(description) = description {
        let _ = writeln!(
            out,
            "{}{}",
            indent,
            serde_json::Value::String(description.to_string())
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_roots_types_and_deprecations() {
        let schema = Schema::from_sdl(
            r#"
            schema { query: RootQuery }
            "People"
            type Person { name: String, age: Int @deprecated(reason: "use birthday") }
            enum Color { RED GREEN }
            input PersonFilter { name: String = "x", color: Color = RED }
            type RootQuery { people(filter: PersonFilter, first: Int = 10): [Person!]! }
            "#,
        )
        .unwrap();

        assert_eq!(schema.query_type, "RootQuery");
        let people = schema.field("RootQuery", "people").unwrap();
        assert_eq!(people.ty.to_string(), "[Person!]!");
        assert_eq!(people.args["first"].default_value, Some(serde_json::json!(10)));
        assert_eq!(
            schema.field("Person", "age").unwrap().deprecation_reason.as_deref(),
            Some("use birthday")
        );
        assert_eq!(schema.get_type("Person").unwrap().description(), Some("People"));
    }

    #[test]
    fn printed_sdl_parses_back_to_the_same_shape() {
        let source = r#"
            interface Node { id: ID! }
            type Person implements Node { id: ID!, color: Color }
            enum Color { RED GREEN }
            input Filter { color: Color = GREEN }
            union Thing = Person
            type Query { node(filter: Filter): Node, things: [Thing] }
            "#;
        let printed = Schema::from_sdl(source).unwrap().to_sdl();
        let reparsed = Schema::from_sdl(&printed).unwrap();

        assert!(printed.contains("color: Color = GREEN"));
        assert!(printed.contains("type Person implements Node {"));
        assert_eq!(reparsed.to_sdl(), printed);
    }
}
