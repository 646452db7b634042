//! `__module_utf8`: encode/decode single code points and whole strings
//! to/from byte arrays, plus a validity check.
//!
//! `original_source/include/emerald/module/utf8.h` declares this surface
//! without a shipped body in the filtered source (see `SPEC_FULL.md`), so
//! behavior follows standard UTF-8 semantics: invalid input yields `none`,
//! the general failure-sentinel convention `spec.md` §7 describes for
//! operations that don't raise a hard error.

use crate::context::Context;
use crate::diagnostics::RaisedError;
use crate::heap::HeapData;
use crate::object::{BuiltinId, ByteArray, ByteArrayMode, EmString};
use crate::position::decode_utf8;
use crate::position::Position;
use crate::value::Value;

use super::{expect_argc, expect_int, expect_string, new_module, set_builtin};

pub fn install(ctx: &mut Context) {
    let mod_id = new_module(ctx, "__module_utf8");
    set_builtin(ctx, mod_id, "encodeInteger", BuiltinId::Utf8EncodeInteger);
    set_builtin(ctx, mod_id, "decodeInteger", BuiltinId::Utf8DecodeInteger);
    set_builtin(ctx, mod_id, "encode", BuiltinId::Utf8Encode);
    set_builtin(ctx, mod_id, "decode", BuiltinId::Utf8Decode);
    set_builtin(ctx, mod_id, "validateBytes", BuiltinId::Utf8ValidateBytes);
}

pub fn call(id: BuiltinId, ctx: &mut Context, args: &[Value], pos: &Position) -> Result<Value, RaisedError> {
    match id {
        BuiltinId::Utf8EncodeInteger => encode_integer(args, ctx, pos),
        BuiltinId::Utf8DecodeInteger => decode_integer(args, ctx, pos),
        BuiltinId::Utf8Encode => encode(args, ctx, pos),
        BuiltinId::Utf8Decode => decode(args, ctx, pos),
        BuiltinId::Utf8ValidateBytes => validate_bytes(args, ctx, pos),
        _ => unreachable!("utf8_mod::call received a non-utf8 BuiltinId"),
    }
}

fn bytes_of(v: Value, ctx: &Context, pos: &Position) -> Result<Vec<u8>, RaisedError> {
    if let Value::Object(id) = v {
        if let HeapData::ByteArray(arr) = ctx.heap.get(id) {
            if arr.mode == ByteArrayMode::UnsignedChar {
                return Ok(arr.bytes.clone());
            }
        }
    }
    Err(RaisedError::runtime("Expected a byte array of unsignedChar elements", pos))
}

fn encode_integer(args: &[Value], ctx: &mut Context, pos: &Position) -> Result<Value, RaisedError> {
    expect_argc(args, 1, pos)?;
    let codepoint = expect_int(args[0], pos)?;
    let ch = char::from_u32(codepoint as u32).ok_or_else(|| RaisedError::runtime("Invalid code point", pos))?;
    let mut buf = [0u8; 4];
    let encoded = ch.encode_utf8(&mut buf);
    let mut array = ByteArray::new(encoded.len(), ByteArrayMode::UnsignedChar);
    array.bytes.copy_from_slice(encoded.as_bytes());
    Ok(Value::Object(ctx.heap.allocate(HeapData::ByteArray(array))))
}

fn decode_integer(args: &[Value], ctx: &mut Context, pos: &Position) -> Result<Value, RaisedError> {
    expect_argc(args, 2, pos)?;
    let bytes = bytes_of(args[0], ctx, pos)?;
    let index = expect_int(args[1], pos)? as usize;
    if index >= bytes.len() {
        return Ok(Value::None);
    }
    match decode_utf8(&bytes[index..]) {
        Some((ch, _)) => Ok(Value::Int(i64::from(ch as u32))),
        None => Ok(Value::None),
    }
}

fn encode(args: &[Value], ctx: &mut Context, pos: &Position) -> Result<Value, RaisedError> {
    expect_argc(args, 1, pos)?;
    let s = expect_string(args[0], &ctx.heap, pos)?.to_rust_string();
    let mut array = ByteArray::new(s.len(), ByteArrayMode::UnsignedChar);
    array.bytes.copy_from_slice(s.as_bytes());
    Ok(Value::Object(ctx.heap.allocate(HeapData::ByteArray(array))))
}

fn decode(args: &[Value], ctx: &mut Context, pos: &Position) -> Result<Value, RaisedError> {
    expect_argc(args, 1, pos)?;
    let bytes = bytes_of(args[0], ctx, pos)?;
    match String::from_utf8(bytes) {
        Ok(s) => Ok(Value::Object(ctx.heap.allocate(HeapData::Str(EmString::from_str(&s))))),
        Err(_) => Ok(Value::None),
    }
}

fn validate_bytes(args: &[Value], ctx: &mut Context, pos: &Position) -> Result<Value, RaisedError> {
    expect_argc(args, 1, pos)?;
    let bytes = bytes_of(args[0], ctx, pos)?;
    Ok(Value::Int(i64::from(std::str::from_utf8(&bytes).is_ok())))
}
