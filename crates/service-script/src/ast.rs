use serde::{Deserialize, Serialize};

/// 1-based line/column of a node's first character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseTree {
    pub service: String,
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub kind: StatementKind,
    /// Statement text without its terminator, whitespace collapsed.
    pub content: String,
    pub terminated: bool,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum StatementKind {
    Declaration { name: String, value: Expression },
    Output { service: String, field: String, value: Expression },
    Return { value: Expression },
    Call { call: CallExpr },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Expression {
    Query(GqlBlock),
    Call(CallExpr),
    Reference(VariableRef),
    Literal(Literal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GqlOperation {
    Query,
    Mutation,
}

/// Embedded `gql query { ... }` / `gql mutation { ... }` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GqlBlock {
    pub operation: GqlOperation,
    /// Body between the outer braces, trimmed.
    pub body: String,
}

/// `plugin.extension/function(args)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallExpr {
    pub plugin: String,
    pub extension: String,
    pub function: String,
    pub args: Vec<Expression>,
}

/// A variable read, optionally followed by a field path (`order12345678.id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableRef {
    pub name: String,
    pub path: Vec<String>,
    pub position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiteralType {
    String,
    Number,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Literal {
    pub literal_type: LiteralType,
    pub raw: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    VariableDeclaration,
    Statement,
    VariableUsage,
}

/// Flattened view of the tree handed to visitors.
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    Declaration { name: &'a str, position: Position },
    Statement(&'a Statement),
    Usage(&'a VariableRef),
}

impl Node<'_> {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Declaration { .. } => NodeKind::VariableDeclaration,
            Node::Statement(_) => NodeKind::Statement,
            Node::Usage(_) => NodeKind::VariableUsage,
        }
    }
}

impl ParseTree {
    /// Pre-order walk: each statement, then the variable it declares, then
    /// every variable it reads (call arguments included).
    pub fn walk<'a, F>(&'a self, mut visit: F)
    where
        F: FnMut(Node<'a>),
    {
        for statement in &self.statements {
            visit(Node::Statement(statement));
            match &statement.kind {
                StatementKind::Declaration { name, value } => {
                    visit(Node::Declaration {
                        name,
                        position: statement.position,
                    });
                    walk_expression(value, &mut visit);
                }
                StatementKind::Output { value, .. } | StatementKind::Return { value } => {
                    walk_expression(value, &mut visit);
                }
                StatementKind::Call { call } => walk_call(call, &mut visit),
            }
        }
    }

    pub fn nodes(&self) -> Vec<Node<'_>> {
        let mut nodes = Vec::new();
        self.walk(|node| nodes.push(node));
        nodes
    }
}

fn walk_expression<'a, F>(expression: &'a Expression, visit: &mut F)
where
    F: FnMut(Node<'a>),
{
    match expression {
        Expression::Reference(reference) => visit(Node::Usage(reference)),
        Expression::Call(call) => walk_call(call, visit),
        Expression::Query(_) | Expression::Literal(_) => {}
    }
}

fn walk_call<'a, F>(call: &'a CallExpr, visit: &mut F)
where
    F: FnMut(Node<'a>),
{
    for arg in &call.args {
        walk_expression(arg, visit);
    }
}
