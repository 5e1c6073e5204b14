// Abstract syntax tree for template documents and their expressions

use serde::{Deserialize, Serialize};

/// A top-level piece of a parsed document: literal prose or template
/// structure. Statement bodies nest recursively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Literal document text between expression blocks
    Text(String),

    /// Output block `{{ expr }}` (after default-filter injection the
    /// expression always carries at least one filter)
    Output(Expr),

    /// `{% if %}` chain with zero or more `{% elif %}` arms and an
    /// optional `{% else %}` body
    If {
        arms: Vec<IfArm>,
        else_body: Vec<Node>,
    },

    /// `{% for targets in iterable %}` with an optional `{% else %}` body
    For {
        targets: Vec<String>,
        iterable: Expr,
        body: Vec<Node>,
        else_body: Vec<Node>,
    },

    /// Inline assignment `{% set name = expr %}`
    Set { name: String, value: Expr },

    /// Block assignment `{% set name %}...{% endset %}`
    SetBlock { name: String, body: Vec<Node> },

    /// `{% filter name %}...{% endfilter %}`, applying a named filter to
    /// the rendered body
    FilterBlock {
        name: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
        body: Vec<Node>,
    },
}

/// One `if`/`elif` condition and its body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfArm {
    pub condition: Expr,
    pub body: Vec<Node>,
}

/// Expression node types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// String literal
    String(String),

    /// Number literal
    Number(f64),

    /// Boolean literal
    Bool(bool),

    /// The `none` literal
    None,

    /// Bare name resolved against the data context
    Name(String),

    /// List literal `[...]` (parenthesized tuples parse to the same node)
    List(Vec<Expr>),

    /// Dict literal `{...}`
    Dict(Vec<(Expr, Expr)>),

    /// Attribute access `base.attr`
    Attr { base: Box<Expr>, attr: String },

    /// Subscript `base[index]`
    Index { base: Box<Expr>, index: Box<Expr> },

    /// Call with positional and keyword arguments
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },

    /// Filter application `value | name(args)`
    Filter {
        value: Box<Expr>,
        name: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },

    /// Test application `value is [not] name [args]`
    Test {
        value: Box<Expr>,
        name: String,
        negated: bool,
        args: Vec<Expr>,
    },

    /// Unary operation
    Unary { op: UnaryOp, operand: Box<Expr> },

    /// Binary operation
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    /// Conditional expression `then if condition else otherwise`;
    /// the else branch may be omitted
    Conditional {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Option<Box<Expr>>,
    },
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    FloorDivide,
    Modulo,
    Power,

    // Comparison
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,

    // Logical
    And,
    Or,

    // Membership
    In,
    NotIn,

    // String
    Concat,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Negation (-)
    Negate,

    /// Logical NOT
    Not,
}

impl Expr {
    /// Create a string literal node
    pub fn string(s: impl Into<String>) -> Self {
        Expr::String(s.into())
    }

    /// Create a number literal node
    pub fn number(n: f64) -> Self {
        Expr::Number(n)
    }

    /// Create a name node
    pub fn name(n: impl Into<String>) -> Self {
        Expr::Name(n.into())
    }

    /// Wrap an expression in a no-argument filter application
    pub fn filtered(self, name: impl Into<String>) -> Self {
        Expr::Filter {
            value: Box::new(self),
            name: name.into(),
            args: Vec::new(),
            kwargs: Vec::new(),
        }
    }
}
