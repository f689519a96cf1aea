//! Query documents: parsing, the operation view the executor works on, and
//! the rewriting used to forward selections to upstreams.

mod ast_sync;
mod extract;
mod rewrite;

pub use ast_sync::{map_location, node_index_at};
pub use extract::{build_query_document, collect_used_names, extract_query};
pub use rewrite::{FieldVisit, rename_types, visit_fields};

use graphql_parser::Pos;
use graphql_parser::query::{Definition, OperationDefinition};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::Error;
use crate::schema::OperationKind;

pub type Document = graphql_parser::query::Document<'static, String>;
pub type Field = graphql_parser::query::Field<'static, String>;
pub type SelectionSet = graphql_parser::query::SelectionSet<'static, String>;
pub type Selection = graphql_parser::query::Selection<'static, String>;
pub type FragmentDefinition = graphql_parser::query::FragmentDefinition<'static, String>;
pub type VariableDefinition = graphql_parser::query::VariableDefinition<'static, String>;
pub type Directive = graphql_parser::query::Directive<'static, String>;
pub type AstValue = graphql_parser::query::Value<'static, String>;

/// Fragment definitions of a document by name.
pub type Fragments<'a> = HashMap<&'a str, &'a FragmentDefinition>;

pub fn parse_document(source: &str) -> Result<Document, Error> {
    graphql_parser::parse_query::<String>(source)
        .map(|document| document.into_static())
        .map_err(|e| Error::Parse {
            what: "query",
            message: e.to_string(),
        })
}

pub fn fragments_of(document: &Document) -> Fragments<'_> {
    document
        .definitions
        .iter()
        .filter_map(|definition| match definition {
            Definition::Fragment(fragment) => Some((fragment.name.as_str(), fragment)),
            Definition::Operation(_) => None,
        })
        .collect()
}

/// Alias if present, field name otherwise.
pub fn response_key(field: &Field) -> &str {
    field.alias.as_deref().unwrap_or(&field.name)
}

/// Uniform view over the four shapes of an operation definition.
#[derive(Clone, Copy)]
pub struct Operation<'a> {
    pub kind: OperationKind,
    pub name: Option<&'a str>,
    pub variable_definitions: &'a [VariableDefinition],
    pub directives: &'a [Directive],
    pub selection_set: &'a SelectionSet,
    pub position: Pos,
}

impl<'a> Operation<'a> {
    pub fn from_definition(definition: &'a OperationDefinition<'static, String>) -> Self {
        match definition {
            OperationDefinition::SelectionSet(selection_set) => Operation {
                kind: OperationKind::Query,
                name: None,
                variable_definitions: &[],
                directives: &[],
                selection_set,
                position: selection_set.span.0,
            },
            OperationDefinition::Query(query) => Operation {
                kind: OperationKind::Query,
                name: query.name.as_deref(),
                variable_definitions: &query.variable_definitions,
                directives: &query.directives,
                selection_set: &query.selection_set,
                position: query.position,
            },
            OperationDefinition::Mutation(mutation) => Operation {
                kind: OperationKind::Mutation,
                name: mutation.name.as_deref(),
                variable_definitions: &mutation.variable_definitions,
                directives: &mutation.directives,
                selection_set: &mutation.selection_set,
                position: mutation.position,
            },
            OperationDefinition::Subscription(subscription) => Operation {
                kind: OperationKind::Subscription,
                name: subscription.name.as_deref(),
                variable_definitions: &subscription.variable_definitions,
                directives: &subscription.directives,
                selection_set: &subscription.selection_set,
                position: subscription.position,
            },
        }
    }

    /// The operation named `name`, or the only operation of the document.
    pub fn find(document: &'a Document, name: Option<&str>) -> Result<Self, String> {
        let mut operations = document.definitions.iter().filter_map(|definition| match definition {
            Definition::Operation(operation) => Some(Operation::from_definition(operation)),
            Definition::Fragment(_) => None,
        });
        match name {
            Some(name) => operations
                .find(|operation| operation.name == Some(name))
                .ok_or_else(|| format!("Unknown operation named \"{}\".", name)),
            None => {
                let first = operations
                    .next()
                    .ok_or_else(|| "Must provide an operation.".to_string())?;
                if operations.next().is_some() {
                    return Err("Must provide operation name if query contains multiple operations.".to_string());
                }
                Ok(first)
            }
        }
    }
}

/// A standalone document plus the variable values it needs.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub document: Document,
    pub variable_values: Map<String, Value>,
}

impl Query {
    pub fn new(document: Document, variable_values: Map<String, Value>) -> Self {
        Query {
            document,
            variable_values,
        }
    }

    pub fn parse(source: &str) -> Result<Self, Error> {
        Ok(Query::new(parse_document(source)?, Map::new()))
    }

    pub fn print(&self) -> String {
        self.document.to_string()
    }

    /// Root selection set of the (single) operation.
    pub fn root_selection_set_mut(&mut self) -> Option<&mut SelectionSet> {
        self.document
            .definitions
            .iter_mut()
            .find_map(|definition| match definition {
                Definition::Operation(operation) => Some(operation_selection_set_mut(operation)),
                Definition::Fragment(_) => None,
            })
    }

    pub fn variable_definitions_mut(&mut self) -> Option<&mut Vec<VariableDefinition>> {
        self.document
            .definitions
            .iter_mut()
            .find_map(|definition| match definition {
                Definition::Operation(OperationDefinition::Query(query)) => {
                    Some(&mut query.variable_definitions)
                }
                Definition::Operation(OperationDefinition::Mutation(mutation)) => {
                    Some(&mut mutation.variable_definitions)
                }
                Definition::Operation(OperationDefinition::Subscription(subscription)) => {
                    Some(&mut subscription.variable_definitions)
                }
                _ => None,
            })
    }
}

pub(crate) fn operation_selection_set_mut<'a>(
    operation: &'a mut OperationDefinition<'static, String>,
) -> &'a mut SelectionSet {
    match operation {
        OperationDefinition::SelectionSet(selection_set) => selection_set,
        OperationDefinition::Query(query) => &mut query.selection_set,
        OperationDefinition::Mutation(mutation) => &mut mutation.selection_set,
        OperationDefinition::Subscription(subscription) => &mut subscription.selection_set,
    }
}

pub(crate) fn empty_selection_set() -> SelectionSet {
    SelectionSet {
        span: (Pos::default(), Pos::default()),
        items: Vec::new(),
    }
}

/// A field node that does not originate from a client document.
pub(crate) fn synthetic_field(name: &str) -> Field {
    Field {
        position: Pos::default(),
        alias: None,
        name: name.to_string(),
        arguments: Vec::new(),
        directives: Vec::new(),
        selection_set: empty_selection_set(),
    }
}
