//! Access-path selection
//!
//! FILTER predicates over the loop variable are classified into
//! equality, range, and IN predicates on single fields. Indexed
//! predicates become index scans; the most selective one (smallest
//! estimated candidate set) is materialized, the rest stay residual:
//! the executor re-applies every FILTER anyway, so the access path
//! only has to be a superset of the answer.
//!
//! `OR` becomes a set union when every branch is independently
//! indexable; otherwise the whole disjunction stays residual over a
//! full scan.

use crate::ast::{BinOp, Clause, Expr};
use themis_core::TypedValue;
use themis_index::SecondaryIndexManager;

/// How the executor materializes the candidate rows.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessPath {
    FullScan,
    IndexEq {
        column: String,
        value: TypedValue,
    },
    IndexRange {
        column: String,
        lo: Option<TypedValue>,
        hi: Option<TypedValue>,
        inclusive_lo: bool,
        inclusive_hi: bool,
    },
    IndexIn {
        column: String,
        values: Vec<TypedValue>,
    },
    /// Union of independently indexable branches (from OR).
    Union(Vec<AccessPath>),
}

/// A single-field predicate extracted from a filter conjunct.
#[derive(Debug, Clone, PartialEq)]
enum Pred {
    Eq(String, TypedValue),
    Cmp(String, BinOp, TypedValue),
    In(String, Vec<TypedValue>),
}

fn literal_of(expr: &Expr) -> Option<TypedValue> {
    match expr {
        Expr::Literal(v) => Some(v.clone()),
        Expr::Unary(crate::ast::UnOp::Neg, inner) => match literal_of(inner)? {
            TypedValue::Int64(v) => Some(TypedValue::Int64(-v)),
            TypedValue::Int32(v) => Some(TypedValue::Int32(-v)),
            TypedValue::Double(v) => Some(TypedValue::Double(-v)),
            TypedValue::Float(v) => Some(TypedValue::Float(-v)),
            _ => None,
        },
        _ => None,
    }
}

/// Classify one conjunct as a single-field predicate on `var`.
fn classify(expr: &Expr, var: &str) -> Option<Pred> {
    let Expr::Binary(op, lhs, rhs) = expr else {
        return None;
    };
    // Normalize `literal op var.field` to `var.field op' literal`.
    let (field, op, value) = if let (Some(field), Some(value)) =
        (lhs.as_field_of(var), literal_of(rhs))
    {
        (field, *op, value)
    } else if let (Some(field), Some(value)) = (rhs.as_field_of(var), literal_of(lhs)) {
        let flipped = match op {
            BinOp::Lt => BinOp::Gt,
            BinOp::Le => BinOp::Ge,
            BinOp::Gt => BinOp::Lt,
            BinOp::Ge => BinOp::Le,
            BinOp::Eq => BinOp::Eq,
            _ => return None,
        };
        (field, flipped, value)
    } else if *op == BinOp::In {
        // var.field IN [literals]
        let field = lhs.as_field_of(var)?;
        let Expr::ArrayLit(items) = rhs.as_ref() else {
            return None;
        };
        let values: Option<Vec<TypedValue>> = items.iter().map(literal_of).collect();
        return Some(Pred::In(field.to_string(), values?));
    } else {
        return None;
    };

    match op {
        BinOp::Eq => Some(Pred::Eq(field.to_string(), value)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            Some(Pred::Cmp(field.to_string(), op, value))
        }
        _ => None,
    }
}

/// Flatten an AND tree into conjuncts.
fn conjuncts<'a>(expr: &'a Expr, out: &mut Vec<&'a Expr>) {
    match expr {
        Expr::Binary(BinOp::And, lhs, rhs) => {
            conjuncts(lhs, out);
            conjuncts(rhs, out);
        }
        other => out.push(other),
    }
}

/// Try to turn an OR tree into a union of indexable predicates.
fn or_union(expr: &Expr, var: &str, table: &str, index: &SecondaryIndexManager) -> Option<AccessPath> {
    let mut branches = Vec::new();
    let mut stack = vec![expr];
    while let Some(e) = stack.pop() {
        match e {
            Expr::Binary(BinOp::Or, lhs, rhs) => {
                stack.push(lhs);
                stack.push(rhs);
            }
            other => branches.push(other),
        }
    }
    let mut paths = Vec::with_capacity(branches.len());
    for branch in branches {
        let pred = classify(branch, var)?;
        let column = match &pred {
            Pred::Eq(c, _) | Pred::Cmp(c, _, _) | Pred::In(c, _) => c.clone(),
        };
        if !index.is_indexed(table, &column).unwrap_or(false) {
            return None;
        }
        paths.push(match pred {
            Pred::Eq(column, value) => AccessPath::IndexEq { column, value },
            Pred::In(column, values) => AccessPath::IndexIn { column, values },
            Pred::Cmp(column, op, value) => range_path(column, op, value),
        });
    }
    Some(AccessPath::Union(paths))
}

fn range_path(column: String, op: BinOp, value: TypedValue) -> AccessPath {
    match op {
        BinOp::Lt => AccessPath::IndexRange {
            column,
            lo: None,
            hi: Some(value),
            inclusive_lo: true,
            inclusive_hi: false,
        },
        BinOp::Le => AccessPath::IndexRange {
            column,
            lo: None,
            hi: Some(value),
            inclusive_lo: true,
            inclusive_hi: true,
        },
        BinOp::Gt => AccessPath::IndexRange {
            column,
            lo: Some(value),
            hi: None,
            inclusive_lo: false,
            inclusive_hi: true,
        },
        BinOp::Ge => AccessPath::IndexRange {
            column,
            lo: Some(value),
            hi: None,
            inclusive_lo: true,
            inclusive_hi: true,
        },
        _ => unreachable!("range_path called with non-range op"),
    }
}

/// Pick the access path for `FOR var IN table` given the query's
/// filter clauses.
pub fn plan_collection(
    index: &SecondaryIndexManager,
    table: &str,
    var: &str,
    clauses: &[Clause],
) -> AccessPath {
    let mut preds: Vec<Pred> = Vec::new();
    let mut union_candidate: Option<AccessPath> = None;

    for clause in clauses {
        // Predicates are only liftable from filters ahead of any
        // COLLECT (which rebinds the row stream).
        match clause {
            Clause::Filter(expr) if expr.only_references(var) => {
                let mut parts = Vec::new();
                conjuncts(expr, &mut parts);
                for part in parts {
                    if let Some(pred) = classify(part, var) {
                        preds.push(pred);
                    } else if matches!(part, Expr::Binary(BinOp::Or, _, _)) && union_candidate.is_none()
                    {
                        union_candidate = or_union(part, var, table, index);
                    }
                }
            }
            Clause::Collect { .. } => break,
            _ => {}
        }
    }

    // Equality first, most selective wins; ties by ascending estimate
    // then lexicographic column name.
    let mut best_eq: Option<(u64, String, TypedValue)> = None;
    for pred in &preds {
        if let Pred::Eq(column, value) = pred {
            if index.is_indexed(table, column).unwrap_or(false) {
                let estimate = index.estimate_eq(table, column, value);
                let better = match &best_eq {
                    None => true,
                    Some((best, best_col, _)) => {
                        estimate < *best || (estimate == *best && column < best_col)
                    }
                };
                if better {
                    best_eq = Some((estimate, column.clone(), value.clone()));
                }
            }
        }
    }
    if let Some((_, column, value)) = best_eq {
        return AccessPath::IndexEq { column, value };
    }

    for pred in &preds {
        if let Pred::In(column, values) = pred {
            if index.is_indexed(table, column).unwrap_or(false) {
                return AccessPath::IndexIn {
                    column: column.clone(),
                    values: values.clone(),
                };
            }
        }
    }

    // Merge all range predicates on one indexed column.
    for pred in &preds {
        if let Pred::Cmp(column, _, _) = pred {
            if !index.is_indexed(table, column).unwrap_or(false) {
                continue;
            }
            let mut lo: Option<(TypedValue, bool)> = None;
            let mut hi: Option<(TypedValue, bool)> = None;
            for other in &preds {
                if let Pred::Cmp(c, op, value) = other {
                    if c != column {
                        continue;
                    }
                    match op {
                        BinOp::Gt | BinOp::Ge => {
                            let inclusive = *op == BinOp::Ge;
                            if lo.is_none() {
                                lo = Some((value.clone(), inclusive));
                            }
                        }
                        BinOp::Lt | BinOp::Le => {
                            let inclusive = *op == BinOp::Le;
                            if hi.is_none() {
                                hi = Some((value.clone(), inclusive));
                            }
                        }
                        _ => {}
                    }
                }
            }
            return AccessPath::IndexRange {
                column: column.clone(),
                inclusive_lo: lo.as_ref().map(|(_, i)| *i).unwrap_or(true),
                inclusive_hi: hi.as_ref().map(|(_, i)| *i).unwrap_or(true),
                lo: lo.map(|(v, _)| v),
                hi: hi.map(|(v, _)| v),
            };
        }
    }

    union_candidate.unwrap_or(AccessPath::FullScan)
}
