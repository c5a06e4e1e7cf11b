//! AST for the AQL subset

use themis_core::TypedValue;
use themis_index::Direction;

/// Binary operators, loosest to tightest binding handled in the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(TypedValue),
    /// A bound variable (loop variable or LET binding).
    Var(String),
    /// `base.field.sub`: member path on an expression.
    Member(Box<Expr>, Vec<String>),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    FnCall(String, Vec<Expr>),
    ArrayLit(Vec<Expr>),
    ObjectLit(Vec<(String, Expr)>),
}

impl Expr {
    /// True when the expression only references `var` (or nothing).
    pub fn only_references(&self, var: &str) -> bool {
        match self {
            Expr::Literal(_) => true,
            Expr::Var(name) => name == var,
            Expr::Member(base, _) => base.only_references(var),
            Expr::Unary(_, inner) => inner.only_references(var),
            Expr::Binary(_, lhs, rhs) => {
                lhs.only_references(var) && rhs.only_references(var)
            }
            Expr::FnCall(_, args) => args.iter().all(|a| a.only_references(var)),
            Expr::ArrayLit(items) => items.iter().all(|i| i.only_references(var)),
            Expr::ObjectLit(fields) => fields.iter().all(|(_, e)| e.only_references(var)),
        }
    }

    /// `Some(field)` when this is a single-segment member access on
    /// `var` (`var.field`).
    pub fn as_field_of(&self, var: &str) -> Option<&str> {
        match self {
            Expr::Member(base, path) if path.len() == 1 => match base.as_ref() {
                Expr::Var(name) if name == var => Some(&path[0]),
                _ => None,
            },
            _ => None,
        }
    }
}

/// One sort key: expression plus direction.
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub expr: Expr,
    pub ascending: bool,
}

/// Pipeline clauses after the source.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Filter(Expr),
    Let(String, Expr),
    Sort(Vec<SortKey>),
    Limit {
        offset: usize,
        count: usize,
    },
    Collect {
        var: String,
        expr: Expr,
        with_count_into: Option<String>,
    },
    Return(Expr),
}

/// What the FOR clause iterates.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// `FOR var IN collection`
    Collection { var: String, name: String },
    /// `FOR v[, e[, p]] IN min..max OUTBOUND|INBOUND|ANY start GRAPH g`
    Traversal {
        vertex_var: String,
        edge_var: Option<String>,
        path_var: Option<String>,
        min_hops: u32,
        max_hops: u32,
        direction: Direction,
        start: Expr,
        graph: String,
    },
}

/// A parsed query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub source: Source,
    pub clauses: Vec<Clause>,
}
