use graphql_parser::query::{Definition, OperationDefinition, Type, TypeCondition};

use super::{Document, Field, Selection, SelectionSet, operation_selection_set_mut};
use crate::schema::{FieldDef, OperationKind, Schema};

/// Renames the type names a query mentions: fragment type conditions and
/// variable types. `rename` returns `None` to keep a name.
pub fn rename_types(document: &mut Document, rename: &dyn Fn(&str) -> Option<String>) {
    for definition in &mut document.definitions {
        match definition {
            Definition::Operation(operation) => {
                let variables = match operation {
                    OperationDefinition::Query(query) => Some(&mut query.variable_definitions),
                    OperationDefinition::Mutation(mutation) => Some(&mut mutation.variable_definitions),
                    OperationDefinition::Subscription(subscription) => {
                        Some(&mut subscription.variable_definitions)
                    }
                    OperationDefinition::SelectionSet(_) => None,
                };
                for variable in variables.into_iter().flatten() {
                    rename_type(&mut variable.var_type, rename);
                }
                rename_in_selection_set(operation_selection_set_mut(operation), rename);
            }
            Definition::Fragment(fragment) => {
                let TypeCondition::On(condition) = &mut fragment.type_condition;
                if let Some(renamed) = rename(condition) {
                    *condition = renamed;
                }
                rename_in_selection_set(&mut fragment.selection_set, rename);
            }
        }
    }
}

fn rename_type(ty: &mut Type<'static, String>, rename: &dyn Fn(&str) -> Option<String>) {
    match ty {
        Type::NamedType(name) => {
            if let Some(renamed) = rename(name) {
                *name = renamed;
            }
        }
        Type::ListType(inner) | Type::NonNullType(inner) => rename_type(inner, rename),
    }
}

fn rename_in_selection_set(selection_set: &mut SelectionSet, rename: &dyn Fn(&str) -> Option<String>) {
    for selection in &mut selection_set.items {
        match selection {
            Selection::Field(field) => rename_in_selection_set(&mut field.selection_set, rename),
            Selection::InlineFragment(inline) => {
                if let Some(TypeCondition::On(condition)) = &mut inline.type_condition {
                    if let Some(renamed) = rename(condition) {
                        *condition = renamed;
                    }
                }
                rename_in_selection_set(&mut inline.selection_set, rename);
            }
            Selection::FragmentSpread(_) => {}
        }
    }
}

/// Where a visited field sits in the schema.
#[derive(Clone, Copy)]
pub struct FieldVisit<'s> {
    pub parent_type: &'s str,
    /// `None` for fields the schema does not know, including `__typename`.
    pub field_def: Option<&'s FieldDef>,
}

/// Calls `visitor` for every field of the document, outermost first, with
/// the type it is selected on. Child selections are walked after the visitor
/// ran, using the type of the field as it was before the visit.
pub fn visit_fields(
    document: &mut Document,
    schema: &Schema,
    visitor: &mut dyn FnMut(&mut Field, FieldVisit<'_>),
) {
    for definition in &mut document.definitions {
        match definition {
            Definition::Operation(operation) => {
                let kind = match operation {
                    OperationDefinition::SelectionSet(_) | OperationDefinition::Query(_) => {
                        OperationKind::Query
                    }
                    OperationDefinition::Mutation(_) => OperationKind::Mutation,
                    OperationDefinition::Subscription(_) => OperationKind::Subscription,
                };
                if let Some(root) = schema.root_type_name(kind) {
                    visit_selection_set(operation_selection_set_mut(operation), root, schema, visitor);
                }
            }
            Definition::Fragment(fragment) => {
                let TypeCondition::On(condition) = &fragment.type_condition;
                if let Some((type_name, _)) = schema.types.get_key_value(condition.as_str()) {
                    visit_selection_set(&mut fragment.selection_set, type_name, schema, visitor);
                }
            }
        }
    }
}

fn visit_selection_set(
    selection_set: &mut SelectionSet,
    type_name: &str,
    schema: &Schema,
    visitor: &mut dyn FnMut(&mut Field, FieldVisit<'_>),
) {
    for selection in &mut selection_set.items {
        match selection {
            Selection::Field(field) => {
                let field_def = schema.field(type_name, &field.name);
                let (parent_type, _) = match schema.types.get_key_value(type_name) {
                    Some(entry) => entry,
                    None => continue,
                };
                visitor(
                    field,
                    FieldVisit {
                        parent_type,
                        field_def,
                    },
                );
                if let Some(field_def) = field_def {
                    visit_selection_set(
                        &mut field.selection_set,
                        field_def.ty.named_type(),
                        schema,
                        visitor,
                    );
                }
            }
            Selection::InlineFragment(inline) => {
                let inner_type = match &inline.type_condition {
                    Some(TypeCondition::On(condition)) => condition.as_str(),
                    None => type_name,
                };
                visit_selection_set(&mut inline.selection_set, inner_type, schema, visitor);
            }
            Selection::FragmentSpread(_) => {}
        }
    }
}
