use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::snapshot::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    RefId,
    Text,
    ContentDesc,
    ResourceId,
    ClassName,
    PackageName,
    Enabled,
    Clickable,
    Visible,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[default]
    Eq,
    Contains,
    Prefix,
    Suffix,
    Regex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clause {
    pub field: Field,
    #[serde(default)]
    pub operator: Operator,
    #[serde(default)]
    pub value: String,
}

/// Conjunctive-or-disjunctive set of clauses evaluated against snapshot nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Selector {
    #[serde(default)]
    pub clauses: Vec<Clause>,
    #[serde(default)]
    pub match_all: bool,
    #[serde(default)]
    pub within_ref_id: String,
    #[serde(default)]
    pub limit: usize,
}

/// Filters `nodes` in traversal order, returning copies of the matches.
///
/// `within_ref_id` restricts the scope to the named node and its direct
/// children. An empty clause list passes every node in scope.
pub fn filter_nodes(nodes: &[Node], selector: &Selector) -> Vec<Node> {
    let mut out = Vec::new();
    for node in nodes {
        if !selector.within_ref_id.is_empty()
            && node.ref_id != selector.within_ref_id
            && node.parent_ref_id != selector.within_ref_id
        {
            continue;
        }

        let pass = if selector.clauses.is_empty() {
            true
        } else {
            let matched = selector
                .clauses
                .iter()
                .filter(|clause| clause_match(node, clause))
                .count();
            if selector.match_all {
                matched == selector.clauses.len()
            } else {
                matched > 0
            }
        };

        if pass {
            out.push(node.clone());
            if selector.limit > 0 && out.len() == selector.limit {
                break;
            }
        }
    }
    out
}

fn clause_match(node: &Node, clause: &Clause) -> bool {
    let field_value = match clause.field {
        Field::RefId => &node.ref_id,
        Field::Text => &node.text,
        Field::ContentDesc => &node.content_desc,
        Field::ResourceId => &node.resource_id,
        Field::ClassName => &node.class_name,
        Field::PackageName => &node.package_name,
        // Boolean fields accept only true/false values; operators are ignored.
        Field::Enabled => return bool_match(node.enabled, &clause.value),
        Field::Clickable => return bool_match(node.clickable, &clause.value),
        Field::Visible => return bool_match(node.visible, &clause.value),
    };
    operator_match(field_value, clause.operator, &clause.value)
}

fn bool_match(actual: bool, value: &str) -> bool {
    match value.to_ascii_lowercase().as_str() {
        "true" => actual,
        "false" => !actual,
        _ => false,
    }
}

fn operator_match(actual: &str, op: Operator, expected: &str) -> bool {
    match op {
        Operator::Eq => actual == expected,
        Operator::Contains => actual.contains(expected),
        Operator::Prefix => actual.starts_with(expected),
        Operator::Suffix => actual.ends_with(expected),
        Operator::Regex => Regex::new(expected)
            .map(|re| re.is_match(actual))
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(ref_id: &str, parent: &str, text: &str) -> Node {
        Node {
            ref_id: ref_id.to_string(),
            parent_ref_id: parent.to_string(),
            text: text.to_string(),
            enabled: true,
            ..Node::default()
        }
    }

    fn clause(field: Field, operator: Operator, value: &str) -> Clause {
        Clause {
            field,
            operator,
            value: value.to_string(),
        }
    }

    #[test]
    fn boolean_values_are_case_insensitive_and_strict() {
        let n = node("n-0", "", "");
        let hit = Selector {
            clauses: vec![clause(Field::Enabled, Operator::Eq, "TRUE")],
            ..Selector::default()
        };
        assert_eq!(filter_nodes(&[n.clone()], &hit).len(), 1);

        let miss = Selector {
            clauses: vec![clause(Field::Enabled, Operator::Eq, "yes")],
            ..Selector::default()
        };
        assert!(filter_nodes(&[n], &miss).is_empty());
    }

    #[test]
    fn match_all_requires_every_clause() {
        let n = node("n-0", "", "Login");
        let clauses = vec![
            clause(Field::Text, Operator::Eq, "Login"),
            clause(Field::Text, Operator::Eq, "Logout"),
        ];

        let all = Selector {
            clauses: clauses.clone(),
            match_all: true,
            ..Selector::default()
        };
        assert!(filter_nodes(&[n.clone()], &all).is_empty());

        let any = Selector {
            clauses,
            match_all: false,
            ..Selector::default()
        };
        assert_eq!(filter_nodes(&[n], &any).len(), 1);
    }

    #[test]
    fn regex_clause_matches_in_traversal_order() {
        let nodes = vec![
            node("n-0", "", "Login"),
            node("n-1", "n-0", "Log out"),
            node("n-2", "n-0", "Sign up"),
        ];
        let selector = Selector {
            clauses: vec![clause(Field::Text, Operator::Regex, "^Log")],
            ..Selector::default()
        };
        let matched = filter_nodes(&nodes, &selector);
        let ids: Vec<_> = matched.iter().map(|n| n.ref_id.as_str()).collect();
        assert_eq!(ids, vec!["n-0", "n-1"]);
    }

    #[test]
    fn invalid_regex_matches_nothing() {
        let nodes = vec![node("n-0", "", "Login")];
        let selector = Selector {
            clauses: vec![clause(Field::Text, Operator::Regex, "(unclosed")],
            ..Selector::default()
        };
        assert!(filter_nodes(&nodes, &selector).is_empty());
    }

    #[test]
    fn string_operators() {
        let n = node("n-0", "", "hello world");
        for (op, value, expect) in [
            (Operator::Eq, "hello world", true),
            (Operator::Eq, "hello", false),
            (Operator::Contains, "lo wo", true),
            (Operator::Prefix, "hello", true),
            (Operator::Prefix, "world", false),
            (Operator::Suffix, "world", true),
        ] {
            let selector = Selector {
                clauses: vec![clause(Field::Text, op, value)],
                ..Selector::default()
            };
            assert_eq!(
                filter_nodes(&[n.clone()], &selector).len(),
                usize::from(expect),
                "{op:?} {value:?}"
            );
        }
    }

    #[test]
    fn within_ref_id_scopes_to_node_and_direct_children() {
        let nodes = vec![
            node("n-0", "", "root"),
            node("n-1", "n-0", "child"),
            node("n-2", "n-1", "grandchild"),
            node("n-3", "n-0", "child"),
        ];
        let selector = Selector {
            within_ref_id: "n-0".to_string(),
            ..Selector::default()
        };
        let ids: Vec<_> = filter_nodes(&nodes, &selector)
            .iter()
            .map(|n| n.ref_id.clone())
            .collect();
        assert_eq!(ids, vec!["n-0", "n-1", "n-3"]);
    }

    #[test]
    fn limit_truncates_matches() {
        let nodes: Vec<_> = (0..5).map(|i| node(&format!("n-{i}"), "", "x")).collect();
        let selector = Selector {
            clauses: vec![clause(Field::Text, Operator::Eq, "x")],
            limit: 2,
            ..Selector::default()
        };
        assert_eq!(filter_nodes(&nodes, &selector).len(), 2);
    }
}
