//! Regex checks used when the grammar is unavailable.
//!
//! Weaker than the grammar path but independent of it: works on raw text,
//! needs no parse tree.

use crate::semantic::{gql_body_finding, naming_finding, CheckKind, Finding, VARIABLE_NAME};
use service_script::GqlOperation;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SERVICE_DECL: Regex = Regex::new(r"service\s+([A-Za-z][A-Za-z0-9-]*)\s*\{").unwrap();
    static ref DECLARATION: Regex = Regex::new(r"\bnew\s+([A-Za-z_][A-Za-z0-9_-]*)\s*=").unwrap();
    static ref GQL_BLOCK: Regex = Regex::new(r"gql\s+(query|mutation)\s*\{([^}]*)\}").unwrap();
}

/// Run all fallback checks over the raw script.
pub fn check(script: &str) -> Vec<Finding> {
    let mut findings = Vec::new();
    check_service_definition(script, &mut findings);
    check_naming(script, &mut findings);
    check_terminators(script, &mut findings);
    check_gql_bodies(script, &mut findings);
    findings
}

fn check_service_definition(script: &str, findings: &mut Vec<Finding>) {
    if !SERVICE_DECL.is_match(script) {
        findings.push(
            Finding::new(
                CheckKind::ServiceDefinition,
                "script must contain a `service <name> {` definition",
            )
            .suggest("wrap the statements in a service block, e.g. `service order-rpc { ... }`"),
        );
    }
}

fn check_naming(script: &str, findings: &mut Vec<Finding>) {
    for caps in DECLARATION.captures_iter(script) {
        let name = &caps[1];
        if !VARIABLE_NAME.is_match(name) {
            let line = line_of(script, caps.get(1).map_or(0, |m| m.start()));
            findings.push(naming_finding(name).at_line(line));
        }
    }
}

fn check_terminators(script: &str, findings: &mut Vec<Finding>) {
    let mut in_block_comment = false;
    for (index, line) in script.lines().enumerate() {
        let mut trimmed = line.trim();
        if in_block_comment {
            match trimmed.find("*/") {
                Some(end) => {
                    in_block_comment = false;
                    trimmed = trimmed[end + 2..].trim();
                }
                None => continue,
            }
        }
        if trimmed.starts_with("/*") && !trimmed.contains("*/") {
            in_block_comment = true;
            continue;
        }
        if trimmed.is_empty()
            || trimmed.ends_with(';')
            || trimmed.ends_with('{')
            || trimmed.ends_with('}')
            || trimmed.starts_with("//")
            || trimmed.starts_with("/*")
            || trimmed.ends_with("*/")
        {
            continue;
        }
        let number = index + 1;
        findings.push(
            Finding::new(
                CheckKind::Termination,
                format!("line {} is missing its terminator: {}", number, trimmed),
            )
            .suggest(format!("append ';' to line {}", number))
            .at_line(number),
        );
    }
}

fn check_gql_bodies(script: &str, findings: &mut Vec<Finding>) {
    for caps in GQL_BLOCK.captures_iter(script) {
        if caps[2].trim().is_empty() {
            let operation = match &caps[1] {
                "mutation" => GqlOperation::Mutation,
                _ => GqlOperation::Query,
            };
            let line = line_of(script, caps.get(0).map_or(0, |m| m.start()));
            findings.push(gql_body_finding(operation).at_line(line));
        }
    }
}

fn line_of(script: &str, offset: usize) -> usize {
    script[..offset].matches('\n').count() + 1
}
