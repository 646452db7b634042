//! The tagged value and its operation dispatch.
//!
//! `spec.md` §4.6 specifies a 3-row primitive dispatch table (`NONE`,
//! `INT`, `FLOAT`) plus an `OBJECT` row that forwards to a per-object
//! vtable. Rather than storing function pointers on each heap object (the
//! C source's approach, `original_source/include/emerald/object.h`), every
//! operation here is a free function that matches on [`Value`] /
//! [`HeapData`] — the enum-dispatch alternative called out in `spec.md`
//! §9's Design Notes. Operations that may invoke user-defined code
//! (`call`, `to_string` via `_toString`) live in `eval.rs` instead, since
//! they need the evaluator's scope stack and signal machinery; everything
//! here is pure with respect to the AST.

use crate::diagnostics::RaisedError;
use crate::heap::{Heap, HeapData, HeapId};
use crate::object::{ByteArray, EmString};
use crate::position::Position;

pub type ValueResult<T> = Result<T, RaisedError>;

/// The tagged value: `NONE`, `INT`, `FLOAT`, or a reference into the heap.
/// Always `Copy` — incrementing/decrementing the referent's refcount is a
/// separate, explicit step (`Heap::incref_value`/`decref_value`), never
/// implicit in a plain Rust `Clone`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    None,
    Int(i64),
    Float(f64),
    Object(HeapId),
}

impl Value {
    #[must_use]
    pub fn type_name(self, heap: &Heap) -> &'static str {
        match self {
            Self::None => "None",
            Self::Int(_) => "Int",
            Self::Float(_) => "Float",
            Self::Object(id) => heap.get(id).type_name(),
        }
    }

    #[must_use]
    pub fn as_object(self) -> Option<HeapId> {
        match self {
            Self::Object(id) => Some(id),
            _ => None,
        }
    }
}

fn type_error(pos: &Position, op: &str, a: Value, b: Value, heap: &Heap) -> RaisedError {
    RaisedError::runtime(
        format!(
            "Unsupported operand types for {op}: '{}' and '{}'",
            a.type_name(heap),
            b.type_name(heap)
        ),
        pos,
    )
}

fn unsupported(pos: &Position, op: &str, v: Value, heap: &Heap) -> RaisedError {
    RaisedError::runtime(format!("'{}' does not support {op}", v.type_name(heap)), pos)
}

/// Truthiness. Numbers are truthy when nonzero; strings/lists/maps are
/// truthy when non-empty; everything else callable-ish defaults to true
/// (no vtable slot to say otherwise, and unlike `eq`/`to_string` the spec
/// doesn't call for a RuntimeError default here since every control-flow
/// construct needs *some* answer for every value).
#[must_use]
pub fn is_true(v: Value, heap: &Heap) -> bool {
    match v {
        Value::None => false,
        Value::Int(n) => n != 0,
        Value::Float(f) => f != 0.0,
        Value::Object(id) => match heap.get(id) {
            HeapData::Str(s) => !s.is_empty(),
            HeapData::List(l) => !l.is_empty(),
            HeapData::Map(m) | HeapData::Instance(m, _) => !m.is_empty(),
            HeapData::ByteArray(b) => b.element_count() != 0,
            _ => true,
        },
    }
}

enum Num {
    Int(i64),
    Float(f64),
}

fn as_num(v: Value) -> Option<Num> {
    match v {
        Value::Int(n) => Some(Num::Int(n)),
        Value::Float(f) => Some(Num::Float(f)),
        _ => None,
    }
}

/// INT op INT -> INT; mixed -> FLOAT; FLOAT op FLOAT -> FLOAT, per
/// `spec.md` §4.6's arithmetic promotion table.
fn numeric_binop(
    a: Value,
    b: Value,
    pos: &Position,
    heap: &Heap,
    op_name: &str,
    int_op: impl FnOnce(i64, i64) -> ValueResult<Value>,
    float_op: impl FnOnce(f64, f64) -> ValueResult<Value>,
) -> ValueResult<Value> {
    match (as_num(a), as_num(b)) {
        (Some(Num::Int(x)), Some(Num::Int(y))) => int_op(x, y),
        (Some(x), Some(y)) => {
            let xf = match x {
                Num::Int(n) => n as f64,
                Num::Float(f) => f,
            };
            let yf = match y {
                Num::Int(n) => n as f64,
                Num::Float(f) => f,
            };
            float_op(xf, yf)
        }
        _ => Err(type_error(pos, op_name, a, b, heap)),
    }
}

pub fn add(a: Value, b: Value, heap: &mut Heap, pos: &Position) -> ValueResult<Value> {
    if let (Value::Object(ida), Value::Object(idb)) = (a, b) {
        if let (HeapData::Str(sa), HeapData::Str(sb)) = (heap.get(ida), heap.get(idb)) {
            let mut chars = Vec::with_capacity(sa.len() + sb.len());
            chars.extend_from_slice(&sa.chars);
            chars.extend_from_slice(&sb.chars);
            let id = heap.allocate(HeapData::Str(EmString::new(chars)));
            return Ok(Value::Object(id));
        }
    }
    numeric_binop(
        a,
        b,
        pos,
        heap,
        "+",
        |x, y| Ok(Value::Int(x.wrapping_add(y))),
        |x, y| Ok(Value::Float(x + y)),
    )
}

pub fn sub(a: Value, b: Value, heap: &Heap, pos: &Position) -> ValueResult<Value> {
    numeric_binop(
        a,
        b,
        pos,
        heap,
        "-",
        |x, y| Ok(Value::Int(x.wrapping_sub(y))),
        |x, y| Ok(Value::Float(x - y)),
    )
}

pub fn mul(a: Value, b: Value, heap: &mut Heap, pos: &Position) -> ValueResult<Value> {
    // String * Int repeats the string; 0 <= n < 1024 (spec.md §4.7/§8).
    if let (Value::Object(id), Value::Int(n)) = (a, b) {
        if let HeapData::Str(s) = heap.get(id) {
            return repeat_string(s.clone(), n, heap, pos);
        }
    }
    if let (Value::Int(n), Value::Object(id)) = (a, b) {
        if let HeapData::Str(s) = heap.get(id) {
            return repeat_string(s.clone(), n, heap, pos);
        }
    }
    numeric_binop(
        a,
        b,
        pos,
        heap,
        "*",
        |x, y| Ok(Value::Int(x.wrapping_mul(y))),
        |x, y| Ok(Value::Float(x * y)),
    )
}

fn repeat_string(s: EmString, n: i64, heap: &mut Heap, pos: &Position) -> ValueResult<Value> {
    if !(0..1024).contains(&n) {
        return Err(RaisedError::runtime(
            format!("String repeat count out of range (0..1024): {n}"),
            pos,
        ));
    }
    let mut chars = Vec::with_capacity(s.len() * n as usize);
    for _ in 0..n {
        chars.extend_from_slice(&s.chars);
    }
    let id = heap.allocate(HeapData::Str(EmString::new(chars)));
    Ok(Value::Object(id))
}

pub fn div(a: Value, b: Value, heap: &Heap, pos: &Position) -> ValueResult<Value> {
    numeric_binop(
        a,
        b,
        pos,
        heap,
        "/",
        |x, y| {
            if y == 0 {
                Err(RaisedError::runtime("Integer division by zero", pos))
            } else {
                Ok(Value::Int(x.wrapping_div(y)))
            }
        },
        |x, y| Ok(Value::Float(x / y)),
    )
}

pub fn modulo(a: Value, b: Value, heap: &Heap, pos: &Position) -> ValueResult<Value> {
    numeric_binop(
        a,
        b,
        pos,
        heap,
        "%",
        |x, y| {
            if y == 0 {
                Err(RaisedError::runtime("Integer modulo by zero", pos))
            } else {
                Ok(Value::Int(x.wrapping_rem(y)))
            }
        },
        |x, y| Ok(Value::Float(x % y)),
    )
}

fn int_only(a: Value, b: Value, heap: &Heap, pos: &Position, op_name: &str) -> ValueResult<(i64, i64)> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok((x, y)),
        _ => Err(type_error(pos, op_name, a, b, heap)),
    }
}

pub fn bit_or(a: Value, b: Value, heap: &Heap, pos: &Position) -> ValueResult<Value> {
    int_only(a, b, heap, pos, "|").map(|(x, y)| Value::Int(x | y))
}

pub fn bit_and(a: Value, b: Value, heap: &Heap, pos: &Position) -> ValueResult<Value> {
    int_only(a, b, heap, pos, "&").map(|(x, y)| Value::Int(x & y))
}

pub fn shift_left(a: Value, b: Value, heap: &Heap, pos: &Position) -> ValueResult<Value> {
    int_only(a, b, heap, pos, "<<").map(|(x, y)| Value::Int(x.wrapping_shl(y as u32)))
}

pub fn shift_right(a: Value, b: Value, heap: &Heap, pos: &Position) -> ValueResult<Value> {
    int_only(a, b, heap, pos, ">>").map(|(x, y)| Value::Int(x.wrapping_shr(y as u32)))
}

/// Equality. Numbers compare across kinds (INT promoted to FLOAT);
/// strings compare length, hash, then code points (`spec.md` §4.7); every
/// other object defaults to identity, per §4.6's "Objects compare-equal
/// defaults to identity when no vtable entry exists."
#[must_use]
pub fn eq(a: Value, b: Value, heap: &Heap) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => (x as f64) == y,
        (Value::Object(ida), Value::Object(idb)) => {
            if ida == idb {
                return true;
            }
            match (heap.get(ida), heap.get(idb)) {
                (HeapData::Str(sa), HeapData::Str(sb)) => {
                    sa.len() == sb.len() && sa.hash == sb.hash && sa.chars == sb.chars
                }
                _ => false,
            }
        }
        _ => false,
    }
}

pub fn compare_less_than(a: Value, b: Value, heap: &Heap, pos: &Position) -> ValueResult<bool> {
    match (a, b) {
        (Value::Object(ida), Value::Object(idb)) => {
            if let (HeapData::Str(sa), HeapData::Str(sb)) = (heap.get(ida), heap.get(idb)) {
                return Ok(sa.chars < sb.chars);
            }
            Err(type_error(pos, "<", a, b, heap))
        }
        _ => numeric_binop(
            a,
            b,
            pos,
            heap,
            "<",
            |x, y| Ok(Value::Int(i64::from(x < y))),
            |x, y| Ok(Value::Int(i64::from(x < y))),
        )
        .map(|v| matches!(v, Value::Int(1))),
    }
}

pub fn compare_greater_than(a: Value, b: Value, heap: &Heap, pos: &Position) -> ValueResult<bool> {
    match (a, b) {
        (Value::Object(ida), Value::Object(idb)) => {
            if let (HeapData::Str(sa), HeapData::Str(sb)) = (heap.get(ida), heap.get(idb)) {
                return Ok(sa.chars > sb.chars);
            }
            Err(type_error(pos, ">", a, b, heap))
        }
        _ => numeric_binop(
            a,
            b,
            pos,
            heap,
            ">",
            |x, y| Ok(Value::Int(i64::from(x > y))),
            |x, y| Ok(Value::Int(i64::from(x > y))),
        )
        .map(|v| matches!(v, Value::Int(1))),
    }
}

/// `spec.md` §4.6: INT hash is the bit pattern, FLOAT hash is the double's
/// bit pattern, String hash is its cached char-sum hash. Every other
/// object hashes by heap identity (its `HeapId` index) so it can still be
/// used as a map key, even though two equal-by-identity values are the
/// only ones guaranteed to collide.
#[must_use]
pub fn hash(v: Value, heap: &Heap) -> u64 {
    match v {
        Value::None => 0,
        Value::Int(n) => n as u64,
        Value::Float(f) => f.to_bits(),
        Value::Object(id) => match heap.get(id) {
            HeapData::Str(s) => s.hash,
            _ => id.index() as u64 ^ 0x9E37_79B9_7F4A_7C15,
        },
    }
}

#[must_use]
pub fn length_of(v: Value, heap: &Heap) -> Option<usize> {
    match v {
        Value::Object(id) => match heap.get(id) {
            HeapData::Str(s) => Some(s.len()),
            HeapData::List(l) => Some(l.len()),
            HeapData::Map(m) | HeapData::Instance(m, _) => Some(m.len()),
            HeapData::ByteArray(b) => Some(b.element_count()),
            _ => None,
        },
        _ => None,
    }
}

pub fn length_of_checked(v: Value, heap: &Heap, pos: &Position) -> ValueResult<i64> {
    length_of(v, heap)
        .map(|n| n as i64)
        .ok_or_else(|| unsupported(pos, "length_of", v, heap))
}

fn normalize_index(len: usize, i: i64) -> Option<usize> {
    if i >= 0 {
        let i = i as usize;
        (i < len).then_some(i)
    } else {
        let from_end = (-i) as usize;
        if from_end > len {
            None
        } else {
            Some(len - from_end)
        }
    }
}

/// `get_by_index`: Lists index directly; Strings index by code point;
/// Maps/Instances hash the index value and delegate to `get_by_hash`;
/// ByteArrays index by numeric element.
pub fn get_by_index(v: Value, index: Value, heap: &mut Heap, pos: &Position) -> ValueResult<Value> {
    let Value::Object(id) = v else {
        return Err(unsupported(pos, "indexing", v, heap));
    };
    match heap.get(id) {
        HeapData::List(list) => {
            let Value::Int(i) = index else {
                return Err(RaisedError::runtime("List index must be an integer", pos));
            };
            let real = normalize_index(list.len(), i)
                .ok_or_else(|| RaisedError::runtime(format!("List index out of range: {i}"), pos))?;
            Ok(list[real])
        }
        HeapData::Str(s) => {
            let Value::Int(i) = index else {
                return Err(RaisedError::runtime("String index must be an integer", pos));
            };
            let real = normalize_index(s.len(), i)
                .ok_or_else(|| RaisedError::runtime(format!("String index out of range: {i}"), pos))?;
            let ch = s.chars[real];
            Ok(Value::Object(heap.allocate(HeapData::Str(EmString::new(vec![ch])))))
        }
        HeapData::ByteArray(arr) => {
            let Value::Int(i) = index else {
                return Err(RaisedError::runtime("Byte array index must be an integer", pos));
            };
            let real = normalize_index(arr.element_count(), i)
                .ok_or_else(|| RaisedError::runtime(format!("Byte array index out of range: {i}"), pos))?;
            Ok(Value::Int(arr.get(real).expect("validated index")))
        }
        HeapData::Map(_) | HeapData::Instance(..) => {
            let h = hash(index, heap);
            get_by_hash(v, h, heap, pos)
        }
        _ => Err(unsupported(pos, "indexing", v, heap)),
    }
}

pub fn set_by_index(v: Value, index: Value, new_value: Value, heap: &mut Heap, pos: &Position) -> ValueResult<()> {
    let Value::Object(id) = v else {
        return Err(unsupported(pos, "index assignment", v, heap));
    };
    match heap.get(id) {
        HeapData::Map(_) | HeapData::Instance(..) => {
            let h = hash(index, heap);
            return set_by_hash(v, h, new_value, heap, pos);
        }
        _ => {}
    }
    match heap.get_mut(id) {
        HeapData::List(list) => {
            let Value::Int(i) = index else {
                return Err(RaisedError::runtime("List index must be an integer", pos));
            };
            let real = normalize_index(list.len(), i)
                .ok_or_else(|| RaisedError::runtime(format!("List index out of range: {i}"), pos))?;
            let old = list[real];
            list[real] = new_value;
            heap.incref_value(new_value);
            heap.decref_value(old);
            Ok(())
        }
        HeapData::ByteArray(arr) => {
            let (Value::Int(i), Value::Int(n)) = (index, new_value) else {
                return Err(RaisedError::runtime("Byte array index/value must be integers", pos));
            };
            let real = normalize_index(arr.element_count(), i)
                .ok_or_else(|| RaisedError::runtime(format!("Byte array index out of range: {i}"), pos))?;
            arr.set(real, n).expect("validated index");
            Ok(())
        }
        _ => Err(unsupported(pos, "index assignment", v, heap)),
    }
}

/// Linear search by hashed key, per `spec.md` §4.7: entries store the
/// key's *hash*, not the key itself, so lookup is "does any entry's
/// stored hash equal this hash" rather than a deep-equality lookup.
pub fn get_by_hash(v: Value, key_hash: u64, heap: &Heap, pos: &Position) -> ValueResult<Value> {
    let Value::Object(id) = v else {
        return Err(unsupported(pos, "key access", v, heap));
    };
    match heap.get(id) {
        HeapData::Map(m) | HeapData::Instance(m, _) => m
            .get(&key_hash)
            .copied()
            .ok_or_else(|| RaisedError::runtime("Key not found", pos)),
        _ => Err(unsupported(pos, "key access", v, heap)),
    }
}

/// Insert-or-update preserving order; updating in place decrefs the old
/// value and increfs the new one (a no-op refcount-wise if they're the
/// same object), matching `spec.md` §4.7.
pub fn set_by_hash(v: Value, key_hash: u64, new_value: Value, heap: &mut Heap, pos: &Position) -> ValueResult<()> {
    let Value::Object(id) = v else {
        return Err(unsupported(pos, "key assignment", v, heap));
    };
    let map = match heap.get_mut(id) {
        HeapData::Map(m) | HeapData::Instance(m, _) => m,
        _ => return Err(unsupported(pos, "key assignment", v, heap)),
    };
    let old = map.insert(key_hash, new_value);
    heap.incref_value(new_value);
    if let Some(old) = old {
        heap.decref_value(old);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_hash_is_stable() {
        let heap = Heap::new();
        assert_eq!(hash(Value::Int(42), &heap), hash(Value::Int(42), &heap));
    }

    #[test]
    fn string_hash_matches_for_identical_code_points() {
        let mut heap = Heap::new();
        let a = heap.allocate(HeapData::Str(EmString::from_str("hello")));
        let b = heap.allocate(HeapData::Str(EmString::from_str("hello")));
        assert_eq!(hash(Value::Object(a), &heap), hash(Value::Object(b), &heap));
        assert!(eq(Value::Object(a), Value::Object(b), &heap));
    }

    #[test]
    fn string_concat_lengths_add() {
        let mut heap = Heap::new();
        let a = heap.allocate(HeapData::Str(EmString::from_str("foo")));
        let b = heap.allocate(HeapData::Str(EmString::from_str("bar")));
        let pos = Position::new("t", "");
        let result = add(Value::Object(a), Value::Object(b), &mut heap, &pos).unwrap();
        assert_eq!(length_of(result, &heap), Some(6));
    }

    #[test]
    fn string_repeat_zero_is_empty() {
        let mut heap = Heap::new();
        let a = heap.allocate(HeapData::Str(EmString::from_str("ab")));
        let pos = Position::new("t", "");
        let result = mul(Value::Object(a), Value::Int(0), &mut heap, &pos).unwrap();
        assert_eq!(length_of(result, &heap), Some(0));
    }

    #[test]
    fn string_repeat_over_limit_errors() {
        let mut heap = Heap::new();
        let a = heap.allocate(HeapData::Str(EmString::from_str("ab")));
        let pos = Position::new("t", "");
        assert!(mul(Value::Object(a), Value::Int(1024), &mut heap, &pos).is_err());
    }

    #[test]
    fn negative_list_index_is_last_element() {
        let mut heap = Heap::new();
        let list = heap.allocate(HeapData::List(smallvec::smallvec![Value::Int(1), Value::Int(2), Value::Int(3)]));
        let pos = Position::new("t", "");
        let v = get_by_index(Value::Object(list), Value::Int(-1), &mut heap, &pos).unwrap();
        assert_eq!(v, Value::Int(3));
        assert!(get_by_index(Value::Object(list), Value::Int(-4), &mut heap, &pos).is_err());
    }

    #[test]
    fn arithmetic_promotes_int_to_float() {
        let heap = Heap::new();
        let pos = Position::new("t", "");
        let result = numeric_binop(
            Value::Int(1),
            Value::Float(2.5),
            &pos,
            &heap,
            "+",
            |x, y| Ok(Value::Int(x + y)),
            |x, y| Ok(Value::Float(x + y)),
        )
        .unwrap();
        assert_eq!(result, Value::Float(3.5));
    }
}
