//! Service script grammar and parse tree.
//!
//! A service script describes one orchestrated service: variable
//! declarations fed by embedded GraphQL blocks or plugin calls, output
//! mappings onto the service's fields, and a final `return`.
pub mod ast;
pub mod parser;

pub use ast::{
    CallExpr, Expression, GqlBlock, GqlOperation, Literal, LiteralType, Node, NodeKind, ParseTree,
    Position, Statement, StatementKind, VariableRef,
};
pub use parser::{parse_script, ParseError};

/// Canonical script the compiled grammar must accept.
pub const SMOKE_SCRIPT: &str = r#"service order-rpc {
    new order12345678 = gql query { getOrder };

    new result12345678 = myorder.exe/processOrder(order12345678);

    output order-rpc.result = result12345678;

    return result12345678;
}"#;
