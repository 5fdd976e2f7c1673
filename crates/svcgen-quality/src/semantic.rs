//! Semantic passes over a parsed service script.
//!
//! Four independent passes, all run to completion:
//! - naming: declared variables follow the `<name><8 digits>` convention
//! - termination: every statement ends with `;`
//! - data flow: every variable read is declared somewhere in the script
//! - gql bodies: embedded queries and mutations select something
//!
//! The data-flow pass only checks membership. It does not model scopes or
//! declaration order.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use service_script::{Expression, GqlOperation, Node, ParseTree, StatementKind};
use std::collections::HashSet;

lazy_static! {
    /// Convention for declared variable names
    pub static ref VARIABLE_NAME: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9]*[0-9]{8}$").unwrap();
}

/// Which check produced a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Syntax,
    ServiceDefinition,
    Naming,
    Termination,
    DataFlow,
    GqlBody,
}

/// Single validation problem, optionally paired with a fix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub check: CheckKind,
    pub message: String,
    pub suggestion: Option<String>,
    pub line: Option<usize>,
}

impl Finding {
    pub fn new(check: CheckKind, message: impl Into<String>) -> Self {
        Self {
            check,
            message: message.into(),
            suggestion: None,
            line: None,
        }
    }

    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }
}

/// Run every semantic pass over the tree.
pub fn analyze(tree: &ParseTree) -> Vec<Finding> {
    let mut findings = Vec::new();
    check_naming(tree, &mut findings);
    check_termination(tree, &mut findings);
    check_data_flow(tree, &mut findings);
    check_gql_bodies(tree, &mut findings);
    findings
}

pub fn check_naming(tree: &ParseTree, findings: &mut Vec<Finding>) {
    tree.walk(|node| {
        if let Node::Declaration { name, position } = node {
            if !VARIABLE_NAME.is_match(name) {
                findings.push(naming_finding(name).at_line(position.line));
            }
        }
    });
}

pub fn check_termination(tree: &ParseTree, findings: &mut Vec<Finding>) {
    tree.walk(|node| {
        if let Node::Statement(statement) = node {
            if !statement.terminated {
                findings.push(
                    Finding::new(
                        CheckKind::Termination,
                        format!(
                            "statement at line {} is missing its terminator: {}",
                            statement.position.line, statement.content
                        ),
                    )
                    .suggest(format!("append ';' to '{}'", statement.content))
                    .at_line(statement.position.line),
                );
            }
        }
    });
}

pub fn check_data_flow(tree: &ParseTree, findings: &mut Vec<Finding>) {
    let mut declared = HashSet::new();
    let mut used = Vec::new();
    let mut seen = HashSet::new();

    tree.walk(|node| match node {
        Node::Declaration { name, .. } => {
            declared.insert(name);
        }
        Node::Usage(reference) => {
            if seen.insert(reference.name.as_str()) {
                used.push(reference);
            }
        }
        Node::Statement(_) => {}
    });

    for reference in used {
        if !declared.contains(reference.name.as_str()) {
            findings.push(
                Finding::new(
                    CheckKind::DataFlow,
                    format!("variable '{}' is used but never declared", reference.name),
                )
                .suggest(format!(
                    "declare '{}' with `new {} = ...` before using it",
                    reference.name, reference.name
                ))
                .at_line(reference.position.line),
            );
        }
    }
}

pub fn check_gql_bodies(tree: &ParseTree, findings: &mut Vec<Finding>) {
    for statement in &tree.statements {
        let value = match &statement.kind {
            StatementKind::Declaration { value, .. }
            | StatementKind::Output { value, .. }
            | StatementKind::Return { value } => value,
            StatementKind::Call { .. } => continue,
        };
        if let Expression::Query(block) = value {
            if block.body.trim().is_empty() {
                findings.push(gql_body_finding(block.operation).at_line(statement.position.line));
            }
        }
    }
}

/// Empty gql body finding shared with the regex fallback.
pub(crate) fn gql_body_finding(operation: GqlOperation) -> Finding {
    let operation = match operation {
        GqlOperation::Query => "query",
        GqlOperation::Mutation => "mutation",
    };
    Finding::new(CheckKind::GqlBody, format!("gql {} body is empty", operation))
        .suggest(format!("add the fields to select in the gql {}", operation))
}

/// Naming finding shared with the regex fallback.
pub(crate) fn naming_finding(name: &str) -> Finding {
    let stem: String = name.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    Finding::new(
        CheckKind::Naming,
        format!(
            "variable name '{}' does not follow the '<name><8 digits>' convention",
            name
        ),
    )
    .suggest(format!(
        "rename '{}' to something like '{}{}'",
        name,
        stem,
        suffix_digits(name)
    ))
}

/// Eight digits derived from the name, so the same script always gets the
/// same suggestion.
fn suffix_digits(name: &str) -> String {
    blake3::hash(name.as_bytes())
        .as_bytes()
        .iter()
        .take(8)
        .map(|b| char::from(b'0' + b % 10))
        .collect()
}
