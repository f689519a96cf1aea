//! Maps source locations between a printed-and-reparsed copy of a document
//! and the document it was printed from.
//!
//! Printing does not preserve source positions, but it preserves structure:
//! both documents visit the same node kinds in the same pre-order. A node is
//! therefore identified by its ordinal in that traversal.

use graphql_parser::Pos;
use graphql_parser::query::{Definition, OperationDefinition};

use super::{Document, Selection, SelectionSet};
use crate::response::Location;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NodeKind {
    Operation,
    VariableDefinition,
    Field,
    FragmentSpread,
    InlineFragment,
    FragmentDefinition,
}

/// A node with its source span. `end` is exclusive.
#[derive(Clone, Copy, Debug)]
struct Node {
    kind: NodeKind,
    start: Pos,
    end: Pos,
}

impl Node {
    fn contains(&self, location: Location) -> bool {
        let location = (location.line, location.column);
        (self.start.line, self.start.column) <= location && location < (self.end.line, self.end.column)
    }
}

// Just past a closing brace.
fn after(pos: Pos) -> Pos {
    Pos {
        line: pos.line,
        column: pos.column + 1,
    }
}

fn collect_nodes(document: &Document) -> Vec<Node> {
    let mut nodes = Vec::new();
    for definition in &document.definitions {
        match definition {
            Definition::Operation(operation) => {
                let (position, variables, selection_set) = match operation {
                    OperationDefinition::SelectionSet(set) => (set.span.0, &[][..], set),
                    OperationDefinition::Query(q) => (q.position, &q.variable_definitions[..], &q.selection_set),
                    OperationDefinition::Mutation(m) => (m.position, &m.variable_definitions[..], &m.selection_set),
                    OperationDefinition::Subscription(s) => {
                        (s.position, &s.variable_definitions[..], &s.selection_set)
                    }
                };
                nodes.push(Node {
                    kind: NodeKind::Operation,
                    start: position,
                    end: after(selection_set.span.1),
                });
                for (i, variable) in variables.iter().enumerate() {
                    let end = variables
                        .get(i + 1)
                        .map(|next| next.position)
                        .unwrap_or(selection_set.span.0);
                    nodes.push(Node {
                        kind: NodeKind::VariableDefinition,
                        start: variable.position,
                        end,
                    });
                }
                collect_selection_nodes(selection_set, &mut nodes);
            }
            Definition::Fragment(fragment) => {
                nodes.push(Node {
                    kind: NodeKind::FragmentDefinition,
                    start: fragment.position,
                    end: after(fragment.selection_set.span.1),
                });
                collect_selection_nodes(&fragment.selection_set, &mut nodes);
            }
        }
    }
    nodes
}

fn selection_start(selection: &Selection) -> Pos {
    match selection {
        Selection::Field(field) => field.position,
        Selection::FragmentSpread(spread) => spread.position,
        Selection::InlineFragment(inline) => inline.position,
    }
}

// Leaves end where the next sibling starts, or at the enclosing brace.
fn collect_selection_nodes(selection_set: &SelectionSet, nodes: &mut Vec<Node>) {
    let items = &selection_set.items;
    for (i, selection) in items.iter().enumerate() {
        let leaf_end = items
            .get(i + 1)
            .map(selection_start)
            .unwrap_or(selection_set.span.1);
        match selection {
            Selection::Field(field) => {
                let end = if field.selection_set.items.is_empty() {
                    leaf_end
                } else {
                    after(field.selection_set.span.1)
                };
                nodes.push(Node {
                    kind: NodeKind::Field,
                    start: field.position,
                    end,
                });
                collect_selection_nodes(&field.selection_set, nodes);
            }
            Selection::FragmentSpread(spread) => {
                nodes.push(Node {
                    kind: NodeKind::FragmentSpread,
                    start: spread.position,
                    end: leaf_end,
                });
            }
            Selection::InlineFragment(inline) => {
                nodes.push(Node {
                    kind: NodeKind::InlineFragment,
                    start: inline.position,
                    end: after(inline.selection_set.span.1),
                });
                collect_selection_nodes(&inline.selection_set, nodes);
            }
        }
    }
}

// Spans nest, so the last containing node in pre-order is the innermost one.
fn innermost_containing(nodes: &[Node], location: Location) -> Option<usize> {
    nodes.iter().rposition(|node| node.contains(location))
}

/// Pre-order index of the innermost node whose span contains `location`.
pub fn node_index_at(document: &Document, location: Location) -> Option<usize> {
    innermost_containing(&collect_nodes(document), location)
}

/// Translates `location`, found in `reprinted`, to the position of the
/// corresponding node in `original`.
///
/// Returns `None` when no node contains the location, when the node kinds at
/// the matching ordinal differ or when the original node has no source
/// position (it was synthesized).
pub fn map_location(reprinted: &Document, original: &Document, location: Location) -> Option<Location> {
    let reprinted_nodes = collect_nodes(reprinted);
    let index = innermost_containing(&reprinted_nodes, location)?;
    let original_nodes = collect_nodes(original);
    let node = original_nodes.get(index)?;
    if node.kind != reprinted_nodes[index].kind || node.start == Pos::default() {
        return None;
    }
    Some(Location::from(node.start))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse_document;
    use pretty_assertions::assert_eq;

    #[test]
    fn maps_reprinted_location_back_to_source() {
        let original = parse_document("query Q { a { b c(x: 1) } }").unwrap();
        let reprinted = parse_document(&original.to_string()).unwrap();

        let printed = original.to_string();
        let (line_index, line) = printed
            .lines()
            .enumerate()
            .find(|(_, line)| line.trim_start().starts_with("c("))
            .unwrap();
        let location = Location {
            line: line_index + 1,
            column: line.len() - line.trim_start().len() + 1,
        };

        assert_eq!(
            map_location(&reprinted, &original, location),
            Some(Location { line: 1, column: 17 })
        );
    }

    #[test]
    fn refuses_to_guess_on_structural_mismatch() {
        let original = parse_document("{ a { b } }").unwrap();
        let other = parse_document("{ a { ... on X { b } } }").unwrap();
        // Inline fragments are positioned after their `...`.
        let fragment = Location { line: 1, column: 11 };

        assert_eq!(node_index_at(&other, fragment), Some(2));
        assert_eq!(map_location(&other, &original, fragment), None);
    }

    #[test]
    fn gaps_belong_to_the_enclosing_node() {
        let document = parse_document("{ a { ... on X { b } } }").unwrap();

        assert_eq!(node_index_at(&document, Location { line: 1, column: 7 }), Some(1));
        assert_eq!(node_index_at(&document, Location { line: 1, column: 18 }), Some(3));
    }

    #[test]
    fn locations_outside_every_node_match_nothing() {
        let original = parse_document("query Q { a b }").unwrap();
        let reprinted = parse_document(&original.to_string()).unwrap();
        let past_the_end = Location { line: 1, column: 16 };
        let below = Location { line: 40, column: 1 };

        assert_eq!(node_index_at(&original, past_the_end), None);
        assert_eq!(node_index_at(&original, below), None);
        assert_eq!(map_location(&reprinted, &original, below), None);
    }
}
