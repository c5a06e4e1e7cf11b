//! Recursive-descent parser for the AQL subset
//!
//! Grammar (simplified):
//!
//! ```text
//! query     := FOR spec clause* RETURN expr
//! spec      := ident IN ident
//!            | ident (, ident (, ident)?)? IN int .. int
//!              (OUTBOUND|INBOUND|ANY) expr GRAPH string
//! clause    := FILTER expr | LET ident = expr | SORT key (, key)*
//!            | LIMIT [int ,] int
//!            | COLLECT ident = expr [WITH COUNT INTO ident]
//! expr      := or; or := and (||/OR and)*; and := cmp (&&/AND cmp)*
//! cmp       := add ((==|!=|<|<=|>|>=|IN) add)?
//! add       := mul ((+|-) mul)*; mul := unary ((*|/) unary)*
//! unary     := (!|NOT|-) unary | postfix
//! postfix   := primary (. ident)*
//! primary   := literal | ident | fncall | ( expr ) | [ ... ] | { ... }
//! ```

use crate::ast::{BinOp, Clause, Expr, Query, SortKey, Source, UnOp};
use crate::lexer::{tokenize, Token};
use themis_core::{Error, Result, TypedValue};
use themis_index::Direction;

/// Parse a query string into its AST.
pub fn parse(input: &str) -> Result<Query> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let query = parser.query()?;
    parser.expect(Token::Eof)?;
    Ok(query)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        self.pos += 1;
        token
    }

    fn accept(&mut self, token: Token) -> bool {
        if *self.peek() == token {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        if *self.peek() == token {
            self.pos += 1;
            Ok(())
        } else {
            Err(Error::InvalidArgument(format!(
                "expected {token:?}, found {:?}",
                self.peek()
            )))
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.advance() {
            Token::Ident(name) => Ok(name),
            other => Err(Error::InvalidArgument(format!(
                "expected identifier, found {other:?}"
            ))),
        }
    }

    fn integer(&mut self) -> Result<i64> {
        match self.advance() {
            Token::Integer(v) => Ok(v),
            other => Err(Error::InvalidArgument(format!(
                "expected integer, found {other:?}"
            ))),
        }
    }

    // ========================================================================
    // Query structure
    // ========================================================================

    fn query(&mut self) -> Result<Query> {
        self.expect(Token::For)?;
        let source = self.source()?;

        let mut clauses = Vec::new();
        let mut saw_return = false;
        loop {
            match self.peek() {
                Token::Filter => {
                    self.advance();
                    clauses.push(Clause::Filter(self.expr()?));
                }
                Token::Let => {
                    self.advance();
                    let name = self.ident()?;
                    self.expect(Token::Assign)?;
                    clauses.push(Clause::Let(name, self.expr()?));
                }
                Token::Sort => {
                    self.advance();
                    let mut keys = vec![self.sort_key()?];
                    while self.accept(Token::Comma) {
                        keys.push(self.sort_key()?);
                    }
                    clauses.push(Clause::Sort(keys));
                }
                Token::Limit => {
                    self.advance();
                    let first = self.integer()?;
                    let (offset, count) = if self.accept(Token::Comma) {
                        (first, self.integer()?)
                    } else {
                        (0, first)
                    };
                    if offset < 0 || count < 0 {
                        return Err(Error::InvalidArgument(
                            "LIMIT values must be non-negative".to_string(),
                        ));
                    }
                    clauses.push(Clause::Limit {
                        offset: offset as usize,
                        count: count as usize,
                    });
                }
                Token::Collect => {
                    self.advance();
                    let var = self.ident()?;
                    self.expect(Token::Assign)?;
                    let expr = self.expr()?;
                    let with_count_into = if self.accept(Token::With) {
                        self.expect(Token::Count)?;
                        self.expect(Token::Into)?;
                        Some(self.ident()?)
                    } else {
                        None
                    };
                    clauses.push(Clause::Collect {
                        var,
                        expr,
                        with_count_into,
                    });
                }
                Token::Return => {
                    self.advance();
                    clauses.push(Clause::Return(self.expr()?));
                    saw_return = true;
                    break;
                }
                other => {
                    return Err(Error::InvalidArgument(format!(
                        "unexpected {other:?}; expected FILTER, LET, SORT, LIMIT, COLLECT, or RETURN"
                    )))
                }
            }
        }
        if !saw_return {
            return Err(Error::InvalidArgument("query must end in RETURN".to_string()));
        }
        Ok(Query { source, clauses })
    }

    fn source(&mut self) -> Result<Source> {
        let first = self.ident()?;
        let mut vars = vec![first];
        while self.accept(Token::Comma) {
            vars.push(self.ident()?);
        }
        if vars.len() > 3 {
            return Err(Error::InvalidArgument(
                "FOR accepts at most three variables (vertex, edge, path)".to_string(),
            ));
        }
        self.expect(Token::In)?;

        // A leading integer means hop bounds (graph traversal).
        if matches!(self.peek(), Token::Integer(_)) {
            let min_hops = self.integer()?;
            self.expect(Token::DotDot)?;
            let max_hops = self.integer()?;
            if min_hops < 0 || max_hops < min_hops {
                return Err(Error::InvalidArgument(format!(
                    "invalid hop range {min_hops}..{max_hops}"
                )));
            }
            let direction = match self.advance() {
                Token::Outbound => Direction::Out,
                Token::Inbound => Direction::In,
                Token::Any => Direction::Both,
                other => {
                    return Err(Error::InvalidArgument(format!(
                        "expected OUTBOUND, INBOUND, or ANY, found {other:?}"
                    )))
                }
            };
            let start = self.expr()?;
            self.expect(Token::Graph)?;
            let graph = match self.advance() {
                Token::Str(name) => name,
                Token::Ident(name) => name,
                other => {
                    return Err(Error::InvalidArgument(format!(
                        "expected graph name, found {other:?}"
                    )))
                }
            };
            let mut vars = vars.into_iter();
            Ok(Source::Traversal {
                vertex_var: vars.next().unwrap(),
                edge_var: vars.next(),
                path_var: vars.next(),
                min_hops: min_hops as u32,
                max_hops: max_hops as u32,
                direction,
                start,
                graph,
            })
        } else {
            if vars.len() != 1 {
                return Err(Error::InvalidArgument(
                    "collection iteration binds exactly one variable".to_string(),
                ));
            }
            let name = self.ident()?;
            Ok(Source::Collection {
                var: vars.pop().unwrap(),
                name,
            })
        }
    }

    fn sort_key(&mut self) -> Result<SortKey> {
        let expr = self.expr()?;
        let ascending = if self.accept(Token::Desc) {
            false
        } else {
            self.accept(Token::Asc);
            true
        };
        Ok(SortKey { expr, ascending })
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn expr(&mut self) -> Result<Expr> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.and_expr()?;
        while matches!(self.peek(), Token::OrOr | Token::Or) {
            self.advance();
            let rhs = self.and_expr()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.cmp_expr()?;
        while matches!(self.peek(), Token::AndAnd | Token::And) {
            self.advance();
            let rhs = self.cmp_expr()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn cmp_expr(&mut self) -> Result<Expr> {
        let lhs = self.add_expr()?;
        let op = match self.peek() {
            Token::Eq => BinOp::Eq,
            Token::Ne => BinOp::Ne,
            Token::Lt => BinOp::Lt,
            Token::Le => BinOp::Le,
            Token::Gt => BinOp::Gt,
            Token::Ge => BinOp::Ge,
            Token::In => BinOp::In,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.add_expr()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn add_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.mul_expr()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.mul_expr()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn mul_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.unary_expr()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.unary_expr()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary_expr(&mut self) -> Result<Expr> {
        match self.peek() {
            Token::Bang | Token::Not => {
                self.advance();
                Ok(Expr::Unary(UnOp::Not, Box::new(self.unary_expr()?)))
            }
            Token::Minus => {
                self.advance();
                Ok(Expr::Unary(UnOp::Neg, Box::new(self.unary_expr()?)))
            }
            _ => self.postfix_expr(),
        }
    }

    fn postfix_expr(&mut self) -> Result<Expr> {
        let base = self.primary_expr()?;
        let mut path = Vec::new();
        while self.accept(Token::Dot) {
            path.push(self.ident()?);
        }
        if path.is_empty() {
            Ok(base)
        } else {
            Ok(Expr::Member(Box::new(base), path))
        }
    }

    fn primary_expr(&mut self) -> Result<Expr> {
        match self.advance() {
            Token::Integer(v) => Ok(Expr::Literal(TypedValue::Int64(v))),
            Token::Number(v) => Ok(Expr::Literal(TypedValue::Double(v))),
            Token::Str(s) => Ok(Expr::Literal(TypedValue::String(s))),
            Token::True => Ok(Expr::Literal(TypedValue::Bool(true))),
            Token::False => Ok(Expr::Literal(TypedValue::Bool(false))),
            Token::Null => Ok(Expr::Literal(TypedValue::Null)),
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if !self.accept(Token::RBracket) {
                    loop {
                        items.push(self.expr()?);
                        if !self.accept(Token::Comma) {
                            break;
                        }
                    }
                    self.expect(Token::RBracket)?;
                }
                Ok(Expr::ArrayLit(items))
            }
            Token::LBrace => {
                let mut fields = Vec::new();
                if !self.accept(Token::RBrace) {
                    loop {
                        let key = match self.advance() {
                            Token::Ident(name) => name,
                            Token::Str(name) => name,
                            other => {
                                return Err(Error::InvalidArgument(format!(
                                    "expected object key, found {other:?}"
                                )))
                            }
                        };
                        self.expect(Token::Colon)?;
                        fields.push((key, self.expr()?));
                        if !self.accept(Token::Comma) {
                            break;
                        }
                    }
                    self.expect(Token::RBrace)?;
                }
                Ok(Expr::ObjectLit(fields))
            }
            Token::Ident(name) => {
                if self.accept(Token::LParen) {
                    let mut args = Vec::new();
                    if !self.accept(Token::RParen) {
                        loop {
                            args.push(self.expr()?);
                            if !self.accept(Token::Comma) {
                                break;
                            }
                        }
                        self.expect(Token::RParen)?;
                    }
                    Ok(Expr::FnCall(name.to_ascii_uppercase(), args))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            other => Err(Error::InvalidArgument(format!(
                "unexpected {other:?} in expression"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_query() {
        let q = parse("FOR doc IN users RETURN doc").unwrap();
        assert_eq!(
            q.source,
            Source::Collection {
                var: "doc".to_string(),
                name: "users".to_string()
            }
        );
        assert_eq!(q.clauses.len(), 1);
        assert!(matches!(q.clauses[0], Clause::Return(Expr::Var(_))));
    }

    #[test]
    fn test_filter_sort_limit() {
        let q = parse(
            "FOR u IN users FILTER u.age >= 21 && u.city == 'oslo' SORT u.age DESC LIMIT 2, 10 RETURN u.name",
        )
        .unwrap();
        assert_eq!(q.clauses.len(), 4);
        match &q.clauses[0] {
            Clause::Filter(Expr::Binary(BinOp::And, _, _)) => {}
            other => panic!("expected AND filter, got {other:?}"),
        }
        match &q.clauses[1] {
            Clause::Sort(keys) => {
                assert_eq!(keys.len(), 1);
                assert!(!keys[0].ascending);
            }
            other => panic!("expected sort, got {other:?}"),
        }
        assert_eq!(
            q.clauses[2],
            Clause::Limit {
                offset: 2,
                count: 10
            }
        );
    }

    #[test]
    fn test_let_and_collect() {
        let q = parse(
            "FOR u IN users LET city = u.city COLLECT c = city WITH COUNT INTO n RETURN { city: c, total: n }",
        )
        .unwrap();
        assert!(matches!(q.clauses[0], Clause::Let(_, _)));
        match &q.clauses[1] {
            Clause::Collect {
                var,
                with_count_into,
                ..
            } => {
                assert_eq!(var, "c");
                assert_eq!(with_count_into.as_deref(), Some("n"));
            }
            other => panic!("expected collect, got {other:?}"),
        }
        assert!(matches!(q.clauses[2], Clause::Return(Expr::ObjectLit(_))));
    }

    #[test]
    fn test_traversal() {
        let q = parse("FOR v, e, p IN 1..3 OUTBOUND 'node-1' GRAPH 'main' RETURN v").unwrap();
        match q.source {
            Source::Traversal {
                vertex_var,
                edge_var,
                path_var,
                min_hops,
                max_hops,
                direction,
                graph,
                ..
            } => {
                assert_eq!(vertex_var, "v");
                assert_eq!(edge_var.as_deref(), Some("e"));
                assert_eq!(path_var.as_deref(), Some("p"));
                assert_eq!((min_hops, max_hops), (1, 3));
                assert_eq!(direction, Direction::Out);
                assert_eq!(graph, "main");
            }
            other => panic!("expected traversal, got {other:?}"),
        }
    }

    #[test]
    fn test_traversal_any_direction() {
        let q = parse("FOR v IN 0..2 ANY 'x' GRAPH g RETURN v").unwrap();
        match q.source {
            Source::Traversal { direction, .. } => assert_eq!(direction, Direction::Both),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn test_in_operator_vs_for_in() {
        let q = parse("FOR u IN users FILTER u.age IN [20, 30] RETURN u").unwrap();
        match &q.clauses[0] {
            Clause::Filter(Expr::Binary(BinOp::In, _, rhs)) => {
                assert!(matches!(rhs.as_ref(), Expr::ArrayLit(items) if items.len() == 2));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn test_function_call_uppercased() {
        let q = parse("FOR d IN docs FILTER bm25(d, 'query') > 0.5 RETURN d").unwrap();
        match &q.clauses[0] {
            Clause::Filter(Expr::Binary(BinOp::Gt, lhs, _)) => match lhs.as_ref() {
                Expr::FnCall(name, args) => {
                    assert_eq!(name, "BM25");
                    assert_eq!(args.len(), 2);
                }
                other => panic!("{other:?}"),
            },
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn test_operator_precedence() {
        // a || b && c parses as a || (b && c)
        let q = parse("FOR d IN t FILTER d.a == 1 || d.b == 2 && d.c == 3 RETURN d").unwrap();
        match &q.clauses[0] {
            Clause::Filter(Expr::Binary(BinOp::Or, _, rhs)) => {
                assert!(matches!(rhs.as_ref(), Expr::Binary(BinOp::And, _, _)));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn test_missing_return_rejected() {
        assert!(parse("FOR u IN users FILTER u.x == 1").is_err());
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        assert!(parse("FOR u IN users RETURN u garbage").is_err());
    }

    #[test]
    fn test_bad_hop_range_rejected() {
        assert!(parse("FOR v IN 3..1 OUTBOUND 'x' GRAPH g RETURN v").is_err());
    }
}
