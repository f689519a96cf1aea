use graphql_parser::Pos;
use graphql_parser::query::{
    Definition, Mutation, OperationDefinition, Query as QueryOperation, Subscription,
};
use indexmap::IndexSet;
use serde_json::Map;
use std::collections::HashSet;

use super::{
    AstValue, Directive, Document, Field, FragmentDefinition, Fragments, Query, Selection,
    SelectionSet, VariableDefinition, response_key,
};
use crate::error::FieldError;
use crate::execution::ResolveInfo;
use crate::response::PathSegment;
use crate::schema::OperationKind;

/// Fragment and variable names referenced from some selection sets.
#[derive(Debug, Default, PartialEq)]
pub struct UsedNames {
    /// In discovery order.
    pub fragments: IndexSet<String>,
    pub variables: HashSet<String>,
}

/// Builds a standalone query for the selection of the field being resolved.
///
/// The field is wrapped in the chain of fields leading to it from the
/// operation root (by response key, list indices skipped), so the result is
/// a valid root-level query. Only the fragments and variables the selection
/// uses are kept.
pub fn extract_query(info: &ResolveInfo<'_>) -> Result<Query, FieldError> {
    let keys: Vec<&str> = info
        .path
        .iter()
        .filter_map(|segment| match segment {
            PathSegment::Key(key) => Some(key.as_str()),
            PathSegment::Index(_) => None,
        })
        .collect();
    let leaf: Vec<Field> = info.field_nodes.iter().map(|node| (*node).clone()).collect();
    let outer_keys = keys.split_last().map(|(_, outer)| outer).unwrap_or(&[]);
    let items = wrap_in_alias_chain(
        &[info.operation.selection_set],
        outer_keys,
        leaf,
        info.fragments,
    )
    .ok_or_else(|| {
        FieldError::new(format!(
            "cannot locate the selection at path {:?} in the operation",
            keys
        ))
    })?;

    let selection_set = SelectionSet {
        span: info.operation.selection_set.span,
        items,
    };
    let used = collect_used_names(&[&selection_set], info.fragments);

    let variable_definitions: Vec<VariableDefinition> = info
        .operation
        .variable_definitions
        .iter()
        .filter(|definition| used.variables.contains(&definition.name))
        .cloned()
        .collect();
    let variable_values: Map<_, _> = info
        .variable_values
        .iter()
        .filter(|(name, _)| used.variables.contains(*name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    let fragments: Vec<FragmentDefinition> = used
        .fragments
        .iter()
        .filter_map(|name| info.fragments.get(name.as_str()).map(|f| (*f).clone()))
        .collect();

    let document = build_query_document(
        info.operation.kind,
        info.operation.name.map(str::to_string),
        variable_definitions,
        selection_set,
        fragments,
    );
    Ok(Query::new(document, variable_values))
}

/// Wraps `leaf` in copies of the fields found along `keys`, starting at
/// `selection_sets`. Each copy keeps its name, alias and arguments but only
/// the next step of the chain as its selection.
fn wrap_in_alias_chain(
    selection_sets: &[&SelectionSet],
    keys: &[&str],
    leaf: Vec<Field>,
    fragments: &Fragments<'_>,
) -> Option<Vec<Selection>> {
    let Some((key, rest)) = keys.split_first() else {
        return Some(leaf.into_iter().map(Selection::Field).collect());
    };
    let mut matches = Vec::new();
    for selection_set in selection_sets {
        find_fields_by_key(selection_set, key, fragments, &mut matches, &mut HashSet::new());
    }
    let first = *matches.first()?;
    let child_sets: Vec<&SelectionSet> = matches.iter().map(|field| &field.selection_set).collect();
    let inner = wrap_in_alias_chain(&child_sets, rest, leaf, fragments)?;
    let wrapper = Field {
        selection_set: SelectionSet {
            span: first.selection_set.span,
            items: inner,
        },
        ..first.clone()
    };
    Some(vec![Selection::Field(wrapper)])
}

fn find_fields_by_key<'a>(
    selection_set: &'a SelectionSet,
    key: &str,
    fragments: &Fragments<'a>,
    found: &mut Vec<&'a Field>,
    visited: &mut HashSet<&'a str>,
) {
    for selection in &selection_set.items {
        match selection {
            Selection::Field(field) if response_key(field) == key => found.push(field),
            Selection::Field(_) => {}
            Selection::FragmentSpread(spread) => {
                if !visited.insert(spread.fragment_name.as_str()) {
                    continue;
                }
                if let Some(fragment) = fragments.get(spread.fragment_name.as_str()) {
                    find_fields_by_key(&fragment.selection_set, key, fragments, found, visited);
                }
            }
            Selection::InlineFragment(inline) => {
                find_fields_by_key(&inline.selection_set, key, fragments, found, visited)
            }
        }
    }
}

/// Transitive closure of the fragments and variables used by
/// `selection_sets`. Iterates until no new fragment is discovered, because a
/// fragment can spread another fragment.
pub fn collect_used_names(selection_sets: &[&SelectionSet], fragments: &Fragments<'_>) -> UsedNames {
    let mut used = UsedNames::default();
    let mut pending: Vec<&SelectionSet> = selection_sets.to_vec();

    loop {
        let mut discovered = Vec::new();
        for selection_set in pending.drain(..) {
            scan_selection_set(selection_set, &mut discovered, &mut used.variables);
        }

        let mut added = false;
        for name in discovered {
            if used.fragments.contains(&name) {
                continue;
            }
            if let Some(fragment) = fragments.get(name.as_str()) {
                scan_directives(&fragment.directives, &mut used.variables);
                pending.push(&fragment.selection_set);
            }
            used.fragments.insert(name);
            added = true;
        }
        if !added {
            break;
        }
    }

    used
}

fn scan_selection_set(
    selection_set: &SelectionSet,
    fragments: &mut Vec<String>,
    variables: &mut HashSet<String>,
) {
    for selection in &selection_set.items {
        match selection {
            Selection::Field(field) => {
                for (_, value) in &field.arguments {
                    scan_value(value, variables);
                }
                scan_directives(&field.directives, variables);
                scan_selection_set(&field.selection_set, fragments, variables);
            }
            Selection::FragmentSpread(spread) => {
                scan_directives(&spread.directives, variables);
                fragments.push(spread.fragment_name.clone());
            }
            Selection::InlineFragment(inline) => {
                scan_directives(&inline.directives, variables);
                scan_selection_set(&inline.selection_set, fragments, variables);
            }
        }
    }
}

fn scan_directives(directives: &[Directive], variables: &mut HashSet<String>) {
    for directive in directives {
        for (_, value) in &directive.arguments {
            scan_value(value, variables);
        }
    }
}

fn scan_value(value: &AstValue, variables: &mut HashSet<String>) {
    match value {
        AstValue::Variable(name) => {
            variables.insert(name.clone());
        }
        AstValue::List(items) => items.iter().for_each(|item| scan_value(item, variables)),
        AstValue::Object(fields) => fields.values().for_each(|item| scan_value(item, variables)),
        _ => {}
    }
}

/// Assembles a single-operation document.
pub fn build_query_document(
    kind: OperationKind,
    name: Option<String>,
    variable_definitions: Vec<VariableDefinition>,
    selection_set: SelectionSet,
    fragments: Vec<FragmentDefinition>,
) -> Document {
    let position = Pos::default();
    let operation = match kind {
        OperationKind::Query => OperationDefinition::Query(QueryOperation {
            position,
            name,
            variable_definitions,
            directives: Vec::new(),
            selection_set,
        }),
        OperationKind::Mutation => OperationDefinition::Mutation(Mutation {
            position,
            name,
            variable_definitions,
            directives: Vec::new(),
            selection_set,
        }),
        OperationKind::Subscription => OperationDefinition::Subscription(Subscription {
            position,
            name,
            variable_definitions,
            directives: Vec::new(),
            selection_set,
        }),
    };
    let mut definitions = vec![Definition::Operation(operation)];
    definitions.extend(fragments.into_iter().map(Definition::Fragment));
    Document { definitions }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Operation, fragments_of, parse_document};
    use crate::schema::{Schema, TypeRef};
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    /// The field reached from `selection_set` along response keys, looking
    /// into fragments.
    fn field_at<'d>(selection_set: &'d SelectionSet, keys: &[&str], fragments: &Fragments<'d>) -> &'d Field {
        let (key, rest) = keys.split_first().unwrap();
        let mut found = Vec::new();
        find_fields_by_key(selection_set, key, fragments, &mut found, &mut HashSet::new());
        let field = found[0];
        if rest.is_empty() {
            field
        } else {
            field_at(&field.selection_set, rest, fragments)
        }
    }

    fn extract(source: &str, path: Vec<PathSegment>, variables: Value) -> Query {
        let document = parse_document(source).unwrap();
        let fragments = fragments_of(&document);
        let operation = Operation::find(&document, None).unwrap();
        let keys: Vec<&str> = path
            .iter()
            .filter_map(|segment| match segment {
                PathSegment::Key(key) => Some(key.as_str()),
                PathSegment::Index(_) => None,
            })
            .collect();
        let leaf = field_at(operation.selection_set, &keys, &fragments);
        let nodes = [leaf];
        let schema = Schema::from_sdl("type Query { unused: Int }").unwrap();
        let return_type = TypeRef::named("Int");
        let Value::Object(variable_values) = variables else {
            panic!("variables must be an object");
        };
        let info = ResolveInfo {
            schema: &schema,
            field_name: &leaf.name,
            field_nodes: &nodes,
            parent_type: "Query",
            return_type: &return_type,
            path: &path,
            operation,
            fragments: &fragments,
            variable_values: &variable_values,
        };
        extract_query(&info).unwrap()
    }

    fn printed(source: &str) -> String {
        parse_document(source).unwrap().to_string()
    }

    #[test]
    fn wraps_the_field_in_its_alias_chain() {
        let query = extract(
            "query Q { top: viewer(id: 1) { friends: people(first: 2) { id best: name } other } }",
            vec!["top".into(), "friends".into(), PathSegment::Index(0), "best".into()],
            json!({}),
        );

        assert_eq!(
            query.print(),
            printed("query Q { top: viewer(id: 1) { friends: people(first: 2) { best: name } } }")
        );
    }

    #[test]
    fn alias_chain_is_followed_through_fragments() {
        let query = extract(
            "query Q { ...Root } fragment Root on Query { viewer { me: user { name } } }",
            vec!["viewer".into(), "me".into()],
            json!({}),
        );

        assert_eq!(query.print(), printed("query Q { viewer { me: user { name } } }"));
    }

    #[test]
    fn keeps_only_used_fragments_and_variables() {
        let query = extract(
            r#"
            query Q($id: ID, $size: Int, $unused: Int) {
                node(id: $id) { ...Outer }
                other(x: $unused)
            }
            fragment Outer on Node { ...Inner }
            fragment Inner on Node { picture(size: $size) }
            fragment Stray on Node { other }
            "#,
            vec!["node".into()],
            json!({"id": "n1", "size": 64, "unused": 1}),
        );

        assert_eq!(
            query.print(),
            printed(
                r#"
                query Q($id: ID, $size: Int) { node(id: $id) { ...Outer } }
                fragment Outer on Node { ...Inner }
                fragment Inner on Node { picture(size: $size) }
                "#
            )
        );
        assert_eq!(Value::Object(query.variable_values), json!({"id": "n1", "size": 64}));
    }

    #[test]
    fn follows_fragments_to_a_fixed_point() {
        let document = parse_document(
            r#"
            query($a: Int, $b: Int, $unused: Int) { x(a: $a) { ...One } }
            fragment One on X { ...Two y }
            fragment Two on X { z(b: $b) }
            fragment Three on X { w(c: $unused) }
            "#,
        )
        .unwrap();
        let fragments = fragments_of(&document);
        let operation = crate::query::Operation::find(&document, None).unwrap();

        let used = collect_used_names(&[operation.selection_set], &fragments);

        assert_eq!(
            used.fragments.into_iter().collect::<Vec<_>>(),
            vec!["One".to_string(), "Two".to_string()]
        );
        let mut variables: Vec<_> = used.variables.into_iter().collect();
        variables.sort();
        assert_eq!(variables, vec!["a".to_string(), "b".to_string()]);
    }
}
