//! Query execution
//!
//! Materializes source rows (index scan or full scan for collections,
//! bounded BFS for traversals), then runs the clause pipeline over the
//! binding stream: FILTER / LET / SORT / LIMIT / COLLECT / RETURN.
//!
//! Collection names resolve against the relational namespace first and
//! fall back to documents; secondary indexes only accelerate the
//! relational side.

use crate::ast::{BinOp, Clause, Expr, Query, SortKey, Source, UnOp};
use crate::fulltext::{Bm25, Corpus};
use crate::parser::parse;
use crate::planner::{plan_collection, AccessPath};
use std::collections::BTreeMap;
use std::sync::Arc;
use themis_core::{codec, keys, keys::Model, Entity, Error, Result, TypedValue};
use themis_index::{GraphIndexManager, SecondaryIndexManager};
use themis_storage::{Cf, KvEngine};

type Binding = BTreeMap<String, TypedValue>;

/// Executes parsed queries against the storage and index managers.
pub struct QueryEngine {
    engine: Arc<dyn KvEngine>,
    index: Arc<SecondaryIndexManager>,
    graph: Arc<GraphIndexManager>,
}

impl QueryEngine {
    pub fn new(
        engine: Arc<dyn KvEngine>,
        index: Arc<SecondaryIndexManager>,
        graph: Arc<GraphIndexManager>,
    ) -> Self {
        QueryEngine {
            engine,
            index,
            graph,
        }
    }

    /// Parse and execute, returning the RETURN values in order.
    pub fn execute(&self, aql: &str) -> Result<Vec<TypedValue>> {
        let query = parse(aql)?;
        self.run(&query)
    }

    fn run(&self, query: &Query) -> Result<Vec<TypedValue>> {
        let mut rows = self.source_bindings(query)?;

        let mut results = Vec::new();
        for clause in &query.clauses {
            match clause {
                Clause::Filter(expr) => {
                    let corpus = self.corpus_for(expr, &rows, query)?;
                    let ctx = EvalCtx {
                        corpus: corpus.as_ref(),
                    };
                    let mut kept = Vec::with_capacity(rows.len());
                    for row in rows {
                        if truthy(&eval(expr, &row, &ctx)?) {
                            kept.push(row);
                        }
                    }
                    rows = kept;
                }
                Clause::Let(name, expr) => {
                    let corpus = self.corpus_for(expr, &rows, query)?;
                    let ctx = EvalCtx {
                        corpus: corpus.as_ref(),
                    };
                    for row in rows.iter_mut() {
                        let value = eval(expr, row, &ctx)?;
                        row.insert(name.clone(), value);
                    }
                }
                Clause::Sort(sort_keys) => {
                    rows = self.sort_rows(rows, sort_keys, query)?;
                }
                Clause::Limit { offset, count } => {
                    rows = rows.into_iter().skip(*offset).take(*count).collect();
                }
                Clause::Collect {
                    var,
                    expr,
                    with_count_into,
                } => {
                    let corpus = self.corpus_for(expr, &rows, query)?;
                    let ctx = EvalCtx {
                        corpus: corpus.as_ref(),
                    };
                    // Group by the codec encoding of the key for a
                    // deterministic group order.
                    let mut groups: BTreeMap<Vec<u8>, (TypedValue, usize)> = BTreeMap::new();
                    for row in &rows {
                        let key = eval(expr, row, &ctx)?;
                        let encoded = codec::encode(&key);
                        groups
                            .entry(encoded)
                            .and_modify(|(_, n)| *n += 1)
                            .or_insert((key, 1));
                    }
                    rows = groups
                        .into_values()
                        .map(|(key, count)| {
                            let mut binding = Binding::new();
                            binding.insert(var.clone(), key);
                            if let Some(count_var) = with_count_into {
                                binding.insert(count_var.clone(), TypedValue::Int64(count as i64));
                            }
                            binding
                        })
                        .collect();
                }
                Clause::Return(expr) => {
                    let corpus = self.corpus_for(expr, &rows, query)?;
                    let ctx = EvalCtx {
                        corpus: corpus.as_ref(),
                    };
                    for row in &rows {
                        results.push(eval(expr, row, &ctx)?);
                    }
                }
            }
        }
        Ok(results)
    }

    // ========================================================================
    // Sources
    // ========================================================================

    fn source_bindings(&self, query: &Query) -> Result<Vec<Binding>> {
        match &query.source {
            Source::Collection { var, name } => {
                let rows = self.collection_rows(name, var, &query.clauses)?;
                Ok(rows)
            }
            Source::Traversal {
                vertex_var,
                edge_var,
                path_var,
                min_hops,
                max_hops,
                direction,
                start,
                graph: _,
            } => {
                let empty = Binding::new();
                let ctx = EvalCtx { corpus: None };
                let start_pk = match eval(start, &empty, &ctx)? {
                    TypedValue::String(s) => s,
                    other => {
                        return Err(Error::InvalidArgument(format!(
                            "traversal start must be a string pk, got {}",
                            other.type_name()
                        )))
                    }
                };
                let traversal = self.graph.bfs(&start_pk, *max_hops, *direction, None)?;
                if traversal.truncated {
                    tracing::warn!(start = %start_pk, "traversal truncated by visit bound");
                }
                let mut bindings = Vec::new();
                for visit in traversal.visits {
                    if visit.hop < *min_hops {
                        continue;
                    }
                    let mut binding = Binding::new();
                    binding.insert(vertex_var.clone(), self.node_value(&visit.pk)?);
                    if let Some(edge_var) = edge_var {
                        let edge_value = match visit.path_edges.last() {
                            Some(edge_pk) => self.edge_value(edge_pk)?,
                            None => TypedValue::Null,
                        };
                        binding.insert(edge_var.clone(), edge_value);
                    }
                    if let Some(path_var) = path_var {
                        let mut path = BTreeMap::new();
                        path.insert(
                            "edges".to_string(),
                            TypedValue::Array(
                                visit
                                    .path_edges
                                    .iter()
                                    .map(|e| TypedValue::String(e.clone()))
                                    .collect(),
                            ),
                        );
                        binding.insert(path_var.clone(), TypedValue::Object(path));
                    }
                    bindings.push(binding);
                }
                Ok(bindings)
            }
        }
    }

    /// A graph node's field map (plus `_key`), or a bare `{_key}`
    /// object when no node record exists.
    fn node_value(&self, pk: &str) -> Result<TypedValue> {
        let key = keys::graph_node(pk)?;
        let mut fields = match self.engine.get(Cf::Graph, &key)? {
            Some(bytes) => Entity::from_bytes(&bytes)?.fields().clone(),
            None => BTreeMap::new(),
        };
        fields.insert("_key".to_string(), TypedValue::String(pk.to_string()));
        Ok(TypedValue::Object(fields))
    }

    fn edge_value(&self, edge_pk: &str) -> Result<TypedValue> {
        let key = keys::graph_edge(edge_pk)?;
        match self.engine.get(Cf::Graph, &key)? {
            Some(bytes) => {
                let json: serde_json::Value = serde_json::from_slice(&bytes)?;
                TypedValue::from_json(&json)
            }
            None => Err(Error::Corruption(format!(
                "path references missing edge {edge_pk}"
            ))),
        }
    }

    fn collection_rows(&self, name: &str, var: &str, clauses: &[Clause]) -> Result<Vec<Binding>> {
        // Relational tables win name resolution; documents are the
        // fallback namespace.
        let relational_prefix = Model::Relational.prefix(name)?;
        let is_relational = self
            .engine
            .iter_prefix(Cf::Default, &relational_prefix)?
            .next()
            .is_some();

        let entities: Vec<Entity> = if is_relational {
            match plan_collection(&self.index, name, var, clauses) {
                AccessPath::FullScan => self.scan_model(Model::Relational, name)?,
                path => {
                    let pks = self.materialize(name, &path)?;
                    let mut rows = Vec::with_capacity(pks.len());
                    for pk in pks {
                        let key = Model::Relational.row_key(name, &pk)?;
                        if let Some(bytes) = self.engine.get(Cf::Default, &key)? {
                            rows.push(Entity::from_bytes(&bytes)?);
                        }
                    }
                    rows
                }
            }
        } else {
            self.scan_model(Model::Document, name)?
        };

        Ok(entities
            .into_iter()
            .map(|entity| {
                let mut fields = entity.fields().clone();
                fields.insert("_key".to_string(), TypedValue::String(entity.pk().to_string()));
                let mut binding = Binding::new();
                binding.insert(var.to_string(), TypedValue::Object(fields));
                binding
            })
            .collect())
    }

    fn scan_model(&self, model: Model, name: &str) -> Result<Vec<Entity>> {
        let prefix = model.prefix(name)?;
        let mut rows = Vec::new();
        for (_key, bytes) in self.engine.iter_prefix(Cf::Default, &prefix)? {
            rows.push(Entity::from_bytes(&bytes)?);
        }
        Ok(rows)
    }

    /// Resolve an access path to an ordered, deduplicated pk list.
    fn materialize(&self, table: &str, path: &AccessPath) -> Result<Vec<String>> {
        Ok(match path {
            AccessPath::FullScan => unreachable!("full scans bypass materialize"),
            AccessPath::IndexEq { column, value } => {
                self.index.query_eq(table, column, value)?.into_iter().collect()
            }
            AccessPath::IndexIn { column, values } => {
                self.index.query_in(table, column, values)?.into_iter().collect()
            }
            AccessPath::IndexRange {
                column,
                lo,
                hi,
                inclusive_lo,
                inclusive_hi,
            } => self.index.query_range(
                table,
                column,
                lo.as_ref(),
                hi.as_ref(),
                *inclusive_lo,
                *inclusive_hi,
            )?,
            AccessPath::Union(paths) => {
                let mut all = std::collections::BTreeSet::new();
                for sub in paths {
                    all.extend(self.materialize(table, sub)?);
                }
                all.into_iter().collect()
            }
        })
    }

    // ========================================================================
    // Sorting and full-text context
    // ========================================================================

    fn sort_rows(
        &self,
        rows: Vec<Binding>,
        sort_keys: &[SortKey],
        query: &Query,
    ) -> Result<Vec<Binding>> {
        let needs_corpus = sort_keys.iter().any(|k| uses_fulltext(&k.expr));
        let corpus = if needs_corpus {
            self.build_corpus(&rows, query)?
        } else {
            None
        };
        let ctx = EvalCtx {
            corpus: corpus.as_ref(),
        };

        let mut keyed: Vec<(Vec<TypedValue>, Binding)> = Vec::with_capacity(rows.len());
        for row in rows {
            let mut key = Vec::with_capacity(sort_keys.len());
            for sk in sort_keys {
                key.push(eval(&sk.expr, &row, &ctx)?);
            }
            keyed.push((key, row));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            for (i, sk) in sort_keys.iter().enumerate() {
                let ord = compare(&a[i], &b[i]);
                let ord = if sk.ascending { ord } else { ord.reverse() };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }

    fn corpus_for(&self, expr: &Expr, rows: &[Binding], query: &Query) -> Result<Option<Corpus>> {
        if uses_fulltext(expr) {
            self.build_corpus(rows, query)
        } else {
            Ok(None)
        }
    }

    /// Corpus statistics over the current candidate set: the source
    /// variable's document text per row.
    fn build_corpus(&self, rows: &[Binding], query: &Query) -> Result<Option<Corpus>> {
        let var = match &query.source {
            Source::Collection { var, .. } => var,
            Source::Traversal { vertex_var, .. } => vertex_var,
        };
        let texts: Vec<String> = rows
            .iter()
            .map(|row| row.get(var).map(document_text).unwrap_or_default())
            .collect();
        Ok(Some(Corpus::build(texts.iter().map(|s| s.as_str()))))
    }
}

// ============================================================================
// Expression evaluation
// ============================================================================

struct EvalCtx<'a> {
    corpus: Option<&'a Corpus>,
}

fn uses_fulltext(expr: &Expr) -> bool {
    match expr {
        Expr::FnCall(name, args) => {
            name == "BM25" || name == "FULLTEXT_SCORE" || args.iter().any(uses_fulltext)
        }
        Expr::Unary(_, inner) => uses_fulltext(inner),
        Expr::Binary(_, lhs, rhs) => uses_fulltext(lhs) || uses_fulltext(rhs),
        Expr::Member(base, _) => uses_fulltext(base),
        Expr::ArrayLit(items) => items.iter().any(uses_fulltext),
        Expr::ObjectLit(fields) => fields.iter().any(|(_, e)| uses_fulltext(e)),
        Expr::Literal(_) | Expr::Var(_) => false,
    }
}

/// Concatenated string content of a value, for full-text scoring.
fn document_text(value: &TypedValue) -> String {
    fn collect(value: &TypedValue, out: &mut String) {
        match value {
            TypedValue::String(s) => {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(s);
            }
            TypedValue::Array(items) => items.iter().for_each(|i| collect(i, out)),
            TypedValue::Object(map) => map.values().for_each(|v| collect(v, out)),
            _ => {}
        }
    }
    let mut out = String::new();
    collect(value, &mut out);
    out
}

fn truthy(value: &TypedValue) -> bool {
    match value {
        TypedValue::Null => false,
        TypedValue::Bool(b) => *b,
        TypedValue::String(s) => !s.is_empty(),
        TypedValue::Array(items) => !items.is_empty(),
        TypedValue::Object(map) => !map.is_empty(),
        other => other.as_f64().map(|f| f != 0.0).unwrap_or(true),
    }
}

fn type_rank(value: &TypedValue) -> u8 {
    match value {
        TypedValue::Null => 0,
        TypedValue::Bool(_) => 1,
        TypedValue::Int32(_)
        | TypedValue::Int64(_)
        | TypedValue::UInt32(_)
        | TypedValue::UInt64(_)
        | TypedValue::Float(_)
        | TypedValue::Double(_) => 2,
        TypedValue::String(_) => 3,
        _ => 4,
    }
}

/// Total order over values: numerics by magnitude, strings
/// lexicographic, mixed types by type rank, composites by encoding.
fn compare(a: &TypedValue, b: &TypedValue) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (TypedValue::Null, TypedValue::Null) => Ordering::Equal,
        (TypedValue::Bool(x), TypedValue::Bool(y)) => x.cmp(y),
        (TypedValue::String(x), TypedValue::String(y)) => x.cmp(y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => codec::encode(a).cmp(&codec::encode(b)),
        },
    }
}

fn value_eq(a: &TypedValue, b: &TypedValue) -> bool {
    if a == b {
        return true;
    }
    // Numeric equality across widths (Int64(1) == Double(1.0)).
    matches!((a.as_f64(), b.as_f64()), (Some(x), Some(y)) if x == y)
}

fn eval(expr: &Expr, binding: &Binding, ctx: &EvalCtx<'_>) -> Result<TypedValue> {
    Ok(match expr {
        Expr::Literal(value) => value.clone(),
        Expr::Var(name) => binding
            .get(name)
            .cloned()
            .ok_or_else(|| Error::InvalidArgument(format!("unknown variable {name}")))?,
        Expr::Member(base, path) => {
            let mut current = eval(base, binding, ctx)?;
            for segment in path {
                current = match current {
                    TypedValue::Object(mut map) => {
                        map.remove(segment).unwrap_or(TypedValue::Null)
                    }
                    _ => TypedValue::Null,
                };
            }
            current
        }
        Expr::Unary(op, inner) => {
            let value = eval(inner, binding, ctx)?;
            match op {
                UnOp::Not => TypedValue::Bool(!truthy(&value)),
                UnOp::Neg => match value {
                    TypedValue::Int64(v) => TypedValue::Int64(-v),
                    TypedValue::Int32(v) => TypedValue::Int32(-v),
                    other => match other.as_f64() {
                        Some(f) => TypedValue::Double(-f),
                        None => {
                            return Err(Error::InvalidArgument(format!(
                                "cannot negate {}",
                                other.type_name()
                            )))
                        }
                    },
                },
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            match op {
                BinOp::And => {
                    let left = eval(lhs, binding, ctx)?;
                    if !truthy(&left) {
                        return Ok(TypedValue::Bool(false));
                    }
                    return Ok(TypedValue::Bool(truthy(&eval(rhs, binding, ctx)?)));
                }
                BinOp::Or => {
                    let left = eval(lhs, binding, ctx)?;
                    if truthy(&left) {
                        return Ok(TypedValue::Bool(true));
                    }
                    return Ok(TypedValue::Bool(truthy(&eval(rhs, binding, ctx)?)));
                }
                _ => {}
            }
            let left = eval(lhs, binding, ctx)?;
            let right = eval(rhs, binding, ctx)?;
            match op {
                BinOp::Eq => TypedValue::Bool(value_eq(&left, &right)),
                BinOp::Ne => TypedValue::Bool(!value_eq(&left, &right)),
                BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                    if type_rank(&left) != type_rank(&right) {
                        // Cross-type comparisons never match.
                        TypedValue::Bool(false)
                    } else {
                        let ord = compare(&left, &right);
                        TypedValue::Bool(match op {
                            BinOp::Lt => ord == std::cmp::Ordering::Less,
                            BinOp::Le => ord != std::cmp::Ordering::Greater,
                            BinOp::Gt => ord == std::cmp::Ordering::Greater,
                            BinOp::Ge => ord != std::cmp::Ordering::Less,
                            _ => unreachable!(),
                        })
                    }
                }
                BinOp::In => match right {
                    TypedValue::Array(items) => {
                        TypedValue::Bool(items.iter().any(|item| value_eq(&left, item)))
                    }
                    other => {
                        return Err(Error::InvalidArgument(format!(
                            "IN requires an array, got {}",
                            other.type_name()
                        )))
                    }
                },
                BinOp::Add => match (&left, &right) {
                    (TypedValue::String(a), TypedValue::String(b)) => {
                        TypedValue::String(format!("{a}{b}"))
                    }
                    _ => arith(&left, &right, *op)?,
                },
                BinOp::Sub | BinOp::Mul | BinOp::Div => arith(&left, &right, *op)?,
                BinOp::And | BinOp::Or => unreachable!(),
            }
        }
        Expr::ArrayLit(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval(item, binding, ctx)?);
            }
            TypedValue::Array(values)
        }
        Expr::ObjectLit(fields) => {
            let mut map = BTreeMap::new();
            for (key, value_expr) in fields {
                map.insert(key.clone(), eval(value_expr, binding, ctx)?);
            }
            TypedValue::Object(map)
        }
        Expr::FnCall(name, args) => eval_fn(name, args, binding, ctx)?,
    })
}

fn arith(left: &TypedValue, right: &TypedValue, op: BinOp) -> Result<TypedValue> {
    let both_integral = matches!(
        left,
        TypedValue::Int32(_) | TypedValue::Int64(_) | TypedValue::UInt32(_) | TypedValue::UInt64(_)
    ) && matches!(
        right,
        TypedValue::Int32(_) | TypedValue::Int64(_) | TypedValue::UInt32(_) | TypedValue::UInt64(_)
    );
    let (a, b) = match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(Error::InvalidArgument(format!(
                "arithmetic on {} and {}",
                left.type_name(),
                right.type_name()
            )))
        }
    };
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(Error::InvalidArgument("division by zero".to_string()));
            }
            a / b
        }
        _ => unreachable!(),
    };
    if both_integral && op != BinOp::Div && result.fract() == 0.0 {
        Ok(TypedValue::Int64(result as i64))
    } else {
        Ok(TypedValue::Double(result))
    }
}

fn eval_fn(name: &str, args: &[Expr], binding: &Binding, ctx: &EvalCtx<'_>) -> Result<TypedValue> {
    if name.starts_with("ST_") {
        return Err(Error::InvalidArgument(format!(
            "spatial function {name} is not supported"
        )));
    }
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(eval(arg, binding, ctx)?);
    }
    Ok(match name {
        "LENGTH" => match values.first() {
            Some(TypedValue::String(s)) => TypedValue::Int64(s.chars().count() as i64),
            Some(TypedValue::Array(items)) => TypedValue::Int64(items.len() as i64),
            Some(TypedValue::Object(map)) => TypedValue::Int64(map.len() as i64),
            _ => {
                return Err(Error::InvalidArgument(
                    "LENGTH expects a string, array, or object".to_string(),
                ))
            }
        },
        "LOWER" => match values.first() {
            Some(TypedValue::String(s)) => TypedValue::String(s.to_lowercase()),
            _ => return Err(Error::InvalidArgument("LOWER expects a string".to_string())),
        },
        "UPPER" => match values.first() {
            Some(TypedValue::String(s)) => TypedValue::String(s.to_uppercase()),
            _ => return Err(Error::InvalidArgument("UPPER expects a string".to_string())),
        },
        "CONCAT" => {
            let mut out = String::new();
            for value in &values {
                match value {
                    TypedValue::String(s) => out.push_str(s),
                    TypedValue::Null => {}
                    other => out.push_str(&other.to_json().to_string()),
                }
            }
            TypedValue::String(out)
        }
        "ABS" => match values.first().and_then(|v| v.as_f64()) {
            Some(f) => TypedValue::Double(f.abs()),
            None => return Err(Error::InvalidArgument("ABS expects a number".to_string())),
        },
        "MIN" | "MAX" => {
            let items: Vec<&TypedValue> = match values.as_slice() {
                [TypedValue::Array(items)] => items.iter().collect(),
                other => other.iter().collect(),
            };
            if items.is_empty() {
                return Ok(TypedValue::Null);
            }
            let mut best = items[0];
            for item in &items[1..] {
                let ord = compare(item, best);
                let take = if name == "MIN" {
                    ord == std::cmp::Ordering::Less
                } else {
                    ord == std::cmp::Ordering::Greater
                };
                if take {
                    best = item;
                }
            }
            best.clone()
        }
        "BM25" | "FULLTEXT_SCORE" => {
            let corpus = ctx.corpus.ok_or_else(|| {
                Error::InvalidArgument(format!("{name} needs a document corpus in scope"))
            })?;
            let (doc, query) = match values.as_slice() {
                [doc, TypedValue::String(query)] => (doc, query.clone()),
                _ => {
                    return Err(Error::InvalidArgument(format!(
                        "{name} expects (document, query-string)"
                    )))
                }
            };
            let text = match (name, doc) {
                ("FULLTEXT_SCORE", TypedValue::String(field_text)) => field_text.clone(),
                _ => document_text(doc),
            };
            TypedValue::Double(Bm25::default().score(corpus, &text, &query))
        }
        other => {
            return Err(Error::InvalidArgument(format!(
                "unknown function {other}"
            )))
        }
    })
}
