//! `__module_string`: `format(fmt, ...values)`.
//!
//! Grounded on `original_source/src/emerald/module/string.c`'s two-pass
//! `string_format` (length pass, then fill pass). We collapse that into a
//! single pass over a `String` builder, since Rust's growable `String`
//! makes the length precomputation pass unnecessary — the observable
//! grammar (`{INDEX}` placeholder, `{{` literal-brace escape, unterminated
//! `{...}` and out-of-range index both `RuntimeError`) is unchanged.

use crate::context::Context;
use crate::diagnostics::RaisedError;
use crate::heap::HeapData;
use crate::object::{BuiltinId, EmString};
use crate::position::Position;
use crate::value::Value;

use super::{expect_string, new_module, set_builtin};

pub fn install(ctx: &mut Context) {
    let mod_id = new_module(ctx, "__module_string");
    set_builtin(ctx, mod_id, "format", BuiltinId::StringFormat);
}

pub fn call(id: BuiltinId, ctx: &mut Context, args: &[Value], pos: &Position) -> Result<Value, RaisedError> {
    match id {
        BuiltinId::StringFormat => format(args, ctx, pos),
        _ => unreachable!("string_mod::call received a non-string BuiltinId"),
    }
}

fn format(args: &[Value], ctx: &mut Context, pos: &Position) -> Result<Value, RaisedError> {
    if args.is_empty() {
        return Err(RaisedError::runtime("Expected a format string", pos));
    }
    let fmt: Vec<char> = expect_string(args[0], &ctx.heap, pos)?.chars.to_vec();

    let mut rendered = Vec::with_capacity(args.len() - 1);
    for v in &args[1..] {
        rendered.push(crate::eval::value_to_chars(*v, ctx, pos)?);
    }

    let mut out = Vec::new();
    let mut chars = fmt.into_iter().peekable();
    while let Some(c) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'{') {
            chars.next();
            out.push('{');
            continue;
        }
        let mut digits = String::new();
        for d in chars.by_ref() {
            if d == '}' {
                break;
            }
            if !d.is_ascii_digit() {
                return Err(RaisedError::runtime("Invalid format specifier", pos));
            }
            digits.push(d);
        }
        if digits.is_empty() {
            return Err(RaisedError::runtime("Unclosed format specifier", pos));
        }
        let index: usize = digits.parse().map_err(|_| RaisedError::runtime("Invalid index", pos))?;
        let piece = rendered.get(index).ok_or_else(|| RaisedError::runtime("Invalid index", pos))?;
        out.extend_from_slice(piece);
    }

    let id = ctx.heap.allocate(HeapData::Str(EmString::new(out)));
    Ok(Value::Object(id))
}
