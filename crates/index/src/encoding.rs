//! Order-preserving value encoding for index keys
//!
//! Index entries embed the column value inside the key, so byte order
//! of the encoding must match value order; that is what makes
//! `query_range` a plain prefix scan.
//!
//! Layout: a one-byte type tag (tags ordered null < bool < number <
//! string < binary) followed by a payload:
//!
//! - numbers: all numeric variants normalized to f64, sign-folded so
//!   negative values sort before positive, big-endian. Integers beyond
//!   2^53 may collide in the index; results are candidate sets and the
//!   executor re-verifies predicates against the row.
//! - strings/binary: content bytes with 0x00 → 0x01 0x01 and
//!   0x01 → 0x01 0x02, then a 0x00 terminator. Content bytes are never
//!   0x00, so no encoding is a proper prefix of another.
//!
//! NaN is rejected: it has no place in a total order.

use themis_core::{Error, Result, TypedValue};

const TAG_NULL: u8 = 0x05;
const TAG_FALSE: u8 = 0x08;
const TAG_TRUE: u8 = 0x09;
const TAG_NUMBER: u8 = 0x10;
const TAG_STRING: u8 = 0x20;
const TAG_BINARY: u8 = 0x21;

/// Encode a column value into its order-preserving index form.
///
/// Vectors, arrays, and objects are not indexable and fail with
/// `InvalidArgument`.
pub fn encode_value(value: &TypedValue) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(12);
    match value {
        TypedValue::Null => out.push(TAG_NULL),
        TypedValue::Bool(false) => out.push(TAG_FALSE),
        TypedValue::Bool(true) => out.push(TAG_TRUE),
        TypedValue::Int32(_)
        | TypedValue::Int64(_)
        | TypedValue::UInt32(_)
        | TypedValue::UInt64(_)
        | TypedValue::Float(_)
        | TypedValue::Double(_) => {
            let f = value.as_f64().unwrap_or(f64::NAN);
            if f.is_nan() {
                return Err(Error::InvalidArgument(
                    "NaN is not indexable".to_string(),
                ));
            }
            out.push(TAG_NUMBER);
            out.extend_from_slice(&fold_f64(f));
        }
        TypedValue::String(s) => {
            out.push(TAG_STRING);
            escape_into(s.as_bytes(), &mut out);
        }
        TypedValue::Binary(b) => {
            out.push(TAG_BINARY);
            escape_into(b, &mut out);
        }
        other => {
            return Err(Error::InvalidArgument(format!(
                "{} is not indexable",
                other.type_name()
            )))
        }
    }
    Ok(out)
}

/// Sign-fold an f64 into big-endian bytes whose unsigned order matches
/// numeric order.
fn fold_f64(v: f64) -> [u8; 8] {
    let bits = v.to_bits();
    let folded = if bits & (1 << 63) != 0 {
        !bits
    } else {
        bits | (1 << 63)
    };
    folded.to_be_bytes()
}

fn escape_into(content: &[u8], out: &mut Vec<u8>) {
    for &b in content {
        match b {
            0x00 => out.extend_from_slice(&[0x01, 0x01]),
            0x01 => out.extend_from_slice(&[0x01, 0x02]),
            other => out.push(other),
        }
    }
    out.push(0x00);
}
