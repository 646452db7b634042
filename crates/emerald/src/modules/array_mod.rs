//! `__module_array`: `Array(size, mode)`, a fixed-size numeric buffer.
//!
//! Grounded on `original_source/src/emerald/module/array.c`; mode constants
//! match its `modesizes` table (`char, unsignedChar, short, unsignedShort,
//! int, unsignedInt, long`).

use crate::context::Context;
use crate::diagnostics::RaisedError;
use crate::heap::HeapData;
use crate::object::{BuiltinId, ByteArray, ByteArrayMode};
use crate::position::Position;
use crate::value::Value;

use super::{expect_argc, expect_int, new_module, set_builtin, set_const};

pub fn install(ctx: &mut Context) {
    let mod_id = new_module(ctx, "__module_array");
    set_const(ctx, mod_id, "char", Value::Int(0));
    set_const(ctx, mod_id, "unsignedChar", Value::Int(1));
    set_const(ctx, mod_id, "short", Value::Int(2));
    set_const(ctx, mod_id, "unsignedShort", Value::Int(3));
    set_const(ctx, mod_id, "int", Value::Int(4));
    set_const(ctx, mod_id, "unsignedInt", Value::Int(5));
    set_const(ctx, mod_id, "long", Value::Int(6));
    set_builtin(ctx, mod_id, "Array", BuiltinId::ArrayNew);
}

pub fn call(id: BuiltinId, ctx: &mut Context, args: &[Value], pos: &Position) -> Result<Value, RaisedError> {
    match id {
        BuiltinId::ArrayNew => new_array(args, ctx, pos),
        _ => unreachable!("array_mod::call received a non-array BuiltinId"),
    }
}

fn mode_from_int(n: i64) -> Option<ByteArrayMode> {
    Some(match n {
        0 => ByteArrayMode::Char,
        1 => ByteArrayMode::UnsignedChar,
        2 => ByteArrayMode::Short,
        3 => ByteArrayMode::UnsignedShort,
        4 => ByteArrayMode::Int,
        5 => ByteArrayMode::UnsignedInt,
        6 => ByteArrayMode::Long,
        _ => return None,
    })
}

fn new_array(args: &[Value], ctx: &mut Context, pos: &Position) -> Result<Value, RaisedError> {
    expect_argc(args, 2, pos)?;
    let size = expect_int(args[0], pos)?;
    let mode = expect_int(args[1], pos)?;
    if size < 1 {
        return Err(RaisedError::runtime("Invalid byte array size", pos));
    }
    let mode = mode_from_int(mode).ok_or_else(|| RaisedError::runtime("Invalid byte array mode", pos))?;
    let array = ByteArray::new(size as usize, mode);
    Ok(Value::Object(ctx.heap.allocate(HeapData::ByteArray(array))))
}
