use crate::ast::{
    CallExpr, Expression, GqlBlock, GqlOperation, Literal, LiteralType, ParseTree, Position,
    Statement, StatementKind, VariableRef,
};
use pest::error::LineColLocation;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

#[derive(Parser)]
#[grammar = "grammar/service_script.pest"]
struct ServiceScriptParser;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty script")]
    Empty,
    #[error("line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },
    #[error("unexpected parse structure: missing {0}")]
    Structure(String),
}

impl ParseError {
    pub fn position(&self) -> Option<Position> {
        match self {
            Self::Syntax { line, column, .. } => Some(Position {
                line: *line,
                column: *column,
            }),
            _ => None,
        }
    }
}

/// Parse a service script into a [`ParseTree`].
///
/// Deterministic: the same text always yields the same tree or the same error.
pub fn parse_script(input: &str) -> Result<ParseTree, ParseError> {
    if input.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let script = ServiceScriptParser::parse(Rule::script, input)
        .map_err(syntax_error)?
        .next()
        .ok_or_else(|| missing(Rule::script))?;
    let service = child(script, Rule::service)?;

    let mut name = None;
    let mut statements = Vec::new();
    for pair in service.into_inner() {
        match pair.as_rule() {
            Rule::service_name => name = Some(pair.as_str().to_string()),
            Rule::statement => statements.push(build_statement(pair)?),
            _ => {}
        }
    }

    Ok(ParseTree {
        service: name.ok_or_else(|| missing(Rule::service_name))?,
        statements,
    })
}

fn build_statement(pair: Pair<'_, Rule>) -> Result<Statement, ParseError> {
    let position = position_of(&pair);
    let mut terminated = false;
    let mut body = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::terminator => terminated = true,
            _ => body = Some(inner),
        }
    }
    let body = body.ok_or_else(|| missing(Rule::statement))?;
    let content = collapse_whitespace(body.as_str());

    let kind = match body.as_rule() {
        Rule::declaration => {
            let mut name = None;
            let mut value = None;
            for inner in body.into_inner() {
                match inner.as_rule() {
                    Rule::declared_name => name = Some(inner.as_str().to_string()),
                    Rule::expression => value = Some(build_expression(inner)?),
                    _ => {}
                }
            }
            StatementKind::Declaration {
                name: name.ok_or_else(|| missing(Rule::declared_name))?,
                value: value.ok_or_else(|| missing(Rule::expression))?,
            }
        }
        Rule::return_stmt => StatementKind::Return {
            value: build_expression(child(body, Rule::expression)?)?,
        },
        Rule::output_stmt => {
            let mut target = None;
            let mut value = None;
            for inner in body.into_inner() {
                match inner.as_rule() {
                    Rule::output_target => target = Some(inner),
                    Rule::expression => value = Some(build_expression(inner)?),
                    _ => {}
                }
            }
            let target = target.ok_or_else(|| missing(Rule::output_target))?;
            let mut service = String::new();
            let mut field = String::new();
            for inner in target.into_inner() {
                match inner.as_rule() {
                    Rule::service_name => service = inner.as_str().to_string(),
                    Rule::field => field = inner.as_str().to_string(),
                    _ => {}
                }
            }
            StatementKind::Output {
                service,
                field,
                value: value.ok_or_else(|| missing(Rule::expression))?,
            }
        }
        Rule::call_stmt => StatementKind::Call {
            call: build_call(child(body, Rule::call)?)?,
        },
        other => return Err(missing_owned(format!("statement body, found {:?}", other))),
    };

    Ok(Statement {
        kind,
        content,
        terminated,
        position,
    })
}

/// `expression` and `argument` wrap exactly one operand.
fn build_expression(pair: Pair<'_, Rule>) -> Result<Expression, ParseError> {
    let rule = pair.as_rule();
    let operand = pair.into_inner().next().ok_or_else(|| missing(rule))?;
    build_operand(operand)
}

fn build_operand(pair: Pair<'_, Rule>) -> Result<Expression, ParseError> {
    match pair.as_rule() {
        Rule::gql_block => {
            let mut operation = GqlOperation::Query;
            let mut body = String::new();
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::gql_operation if inner.as_str() == "mutation" => {
                        operation = GqlOperation::Mutation
                    }
                    Rule::gql_body => body = strip_braces(inner.as_str()),
                    _ => {}
                }
            }
            Ok(Expression::Query(GqlBlock { operation, body }))
        }
        Rule::call => Ok(Expression::Call(build_call(pair)?)),
        Rule::literal => {
            let value = pair.into_inner().next().ok_or_else(|| missing(Rule::literal))?;
            let literal_type = match value.as_rule() {
                Rule::string => LiteralType::String,
                Rule::number => LiteralType::Number,
                _ => LiteralType::Boolean,
            };
            Ok(Expression::Literal(Literal {
                literal_type,
                raw: value.as_str().to_string(),
            }))
        }
        Rule::reference => {
            let position = position_of(&pair);
            let mut name = String::new();
            let mut path = Vec::new();
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::identifier => name = inner.as_str().to_string(),
                    Rule::field => path.push(inner.as_str().to_string()),
                    _ => {}
                }
            }
            Ok(Expression::Reference(VariableRef {
                name,
                path,
                position,
            }))
        }
        other => Err(missing_owned(format!("operand, found {:?}", other))),
    }
}

fn build_call(pair: Pair<'_, Rule>) -> Result<CallExpr, ParseError> {
    let mut plugin = String::new();
    let mut extension = String::new();
    let mut function = String::new();
    let mut args = Vec::new();

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::callee => {
                for part in inner.into_inner() {
                    match part.as_rule() {
                        Rule::plugin_name => plugin = part.as_str().to_string(),
                        Rule::extension => extension = part.as_str().to_string(),
                        Rule::function_name => function = part.as_str().to_string(),
                        _ => {}
                    }
                }
            }
            Rule::argument => args.push(build_expression(inner)?),
            _ => {}
        }
    }

    Ok(CallExpr {
        plugin,
        extension,
        function,
        args,
    })
}

fn child(pair: Pair<'_, Rule>, rule: Rule) -> Result<Pair<'_, Rule>, ParseError> {
    pair.into_inner()
        .find(|p| p.as_rule() == rule)
        .ok_or_else(|| missing(rule))
}

fn missing(rule: Rule) -> ParseError {
    ParseError::Structure(describe_rule(&rule))
}

fn missing_owned(what: String) -> ParseError {
    ParseError::Structure(what)
}

fn position_of(pair: &Pair<'_, Rule>) -> Position {
    let (line, column) = pair.as_span().start_pos().line_col();
    Position { line, column }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_braces(body: &str) -> String {
    body.trim()
        .strip_prefix('{')
        .and_then(|b| b.strip_suffix('}'))
        .unwrap_or(body)
        .trim()
        .to_string()
}

fn syntax_error(err: pest::error::Error<Rule>) -> ParseError {
    let err = err.renamed_rules(describe_rule);
    let (line, column) = match err.line_col {
        LineColLocation::Pos(pos) => pos,
        LineColLocation::Span(start, _) => start,
    };
    ParseError::Syntax {
        line,
        column,
        message: err.variant.message().into_owned(),
    }
}

fn describe_rule(rule: &Rule) -> String {
    let name = match rule {
        Rule::EOI => "end of script",
        Rule::service | Rule::kw_service => "`service <name> {`",
        Rule::service_name => "service name",
        Rule::statement => "statement",
        Rule::terminator => "`;`",
        Rule::declaration | Rule::kw_new => "`new <name> = <expression>`",
        Rule::return_stmt | Rule::kw_return => "`return <expression>`",
        Rule::output_stmt | Rule::kw_output | Rule::output_target => {
            "`output <service>.<field> = <expression>`"
        }
        Rule::call_stmt | Rule::call | Rule::callee => "`<plugin>.<extension>/<function>(<args>)`",
        Rule::expression | Rule::argument => "expression",
        Rule::gql_block | Rule::kw_gql => "`gql query { ... }`",
        Rule::gql_operation => "`query` or `mutation`",
        Rule::gql_body => "`{ ... }` query body",
        Rule::identifier | Rule::reference => "identifier",
        Rule::declared_name => "variable name",
        Rule::literal | Rule::string | Rule::number | Rule::boolean => "literal",
        other => return format!("{:?}", other),
    };
    name.to_string()
}
