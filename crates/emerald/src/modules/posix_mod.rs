//! `__module_posix`: thin `read`/`write`/`tcgetattr`/`tcsetattr`/`strerror`
//! bindings plus termios flag constants.
//!
//! Grounded on `original_source/src/emerald/module/posix.c`. Raw termios
//! control is the external collaborator `SPEC_FULL.md` calls out: real
//! queries on Unix via `libc`, `none`/error stand-ins elsewhere, so the
//! core only needs to expose a stable call surface.

use crate::context::Context;
use crate::diagnostics::RaisedError;
use crate::heap::HeapData;
use crate::object::{BuiltinId, ByteArrayMode, EmString};
use crate::position::Position;
use crate::value::Value;

use super::{expect_argc, expect_int, new_module, set_builtin, set_const};

pub fn install(ctx: &mut Context) {
    let mod_id = new_module(ctx, "__module_posix");
    set_builtin(ctx, mod_id, "strerror", BuiltinId::PosixStrError);
    set_builtin(ctx, mod_id, "read", BuiltinId::PosixRead);
    set_builtin(ctx, mod_id, "write", BuiltinId::PosixWrite);
    set_builtin(ctx, mod_id, "tcgetattr", BuiltinId::PosixTcGetAttr);
    set_builtin(ctx, mod_id, "tcsetattr", BuiltinId::PosixTcSetAttr);

    set_const(ctx, mod_id, "TCSANOW", Value::Int(0));
    set_const(ctx, mod_id, "TCSADRAIN", Value::Int(1));
    set_const(ctx, mod_id, "TCSAFLUSH", Value::Int(2));
    set_const(ctx, mod_id, "NCCS", Value::Int(32));
}

pub fn call(id: BuiltinId, ctx: &mut Context, args: &[Value], pos: &Position) -> Result<Value, RaisedError> {
    match id {
        BuiltinId::PosixStrError => strerror(args, ctx, pos),
        BuiltinId::PosixRead => read(args, ctx, pos),
        BuiltinId::PosixWrite => write(args, ctx, pos),
        BuiltinId::PosixTcGetAttr => tcgetattr(args, ctx, pos),
        BuiltinId::PosixTcSetAttr => tcsetattr(args, ctx, pos),
        _ => unreachable!("posix_mod::call received a non-posix BuiltinId"),
    }
}

fn strerror(args: &[Value], ctx: &mut Context, pos: &Position) -> Result<Value, RaisedError> {
    let errno = if args.is_empty() { 0 } else { expect_int(args[0], pos)? };
    let message = std::io::Error::from_raw_os_error(errno as i32).to_string();
    let id = ctx.heap.allocate(HeapData::Str(EmString::from_str(&message)));
    Ok(Value::Object(id))
}

#[cfg(unix)]
fn read(args: &[Value], ctx: &mut Context, pos: &Position) -> Result<Value, RaisedError> {
    expect_argc(args, 3, pos)?;
    let fd = expect_int(args[0], pos)? as i32;
    let count = expect_int(args[2], pos)? as usize;
    let Value::Object(array_id) = args[1] else {
        return Err(RaisedError::runtime("Invalid arguments", pos));
    };
    let HeapData::ByteArray(array) = ctx.heap.get_mut(array_id) else {
        return Err(RaisedError::runtime("Invalid arguments", pos));
    };
    if array.mode != ByteArrayMode::UnsignedChar || count > array.bytes.len() {
        return Err(RaisedError::runtime("Invalid arguments", pos));
    }
    let n = unsafe { libc::read(fd, array.bytes.as_mut_ptr().cast(), count) };
    Ok(Value::Int(n as i64))
}

#[cfg(not(unix))]
fn read(_args: &[Value], _ctx: &mut Context, pos: &Position) -> Result<Value, RaisedError> {
    Err(RaisedError::runtime("posix.read is not supported on this platform", pos))
}

#[cfg(unix)]
fn write(args: &[Value], ctx: &mut Context, pos: &Position) -> Result<Value, RaisedError> {
    expect_argc(args, 3, pos)?;
    let fd = expect_int(args[0], pos)? as i32;
    let count = expect_int(args[2], pos)? as usize;
    let Value::Object(array_id) = args[1] else {
        return Err(RaisedError::runtime("Invalid arguments", pos));
    };
    let HeapData::ByteArray(array) = ctx.heap.get(array_id) else {
        return Err(RaisedError::runtime("Invalid arguments", pos));
    };
    if array.mode != ByteArrayMode::UnsignedChar || count > array.bytes.len() {
        return Err(RaisedError::runtime("Invalid arguments", pos));
    }
    let n = unsafe { libc::write(fd, array.bytes.as_ptr().cast(), count) };
    Ok(Value::Int(n as i64))
}

#[cfg(not(unix))]
fn write(_args: &[Value], _ctx: &mut Context, pos: &Position) -> Result<Value, RaisedError> {
    Err(RaisedError::runtime("posix.write is not supported on this platform", pos))
}

#[cfg(unix)]
fn tcgetattr(args: &[Value], ctx: &mut Context, pos: &Position) -> Result<Value, RaisedError> {
    expect_argc(args, 2, pos)?;
    let fd = expect_int(args[0], pos)? as i32;
    let Value::Object(map_id) = args[1] else {
        return Err(RaisedError::runtime("Invalid arguments", pos));
    };

    let mut attr: libc::termios = unsafe { std::mem::zeroed() };
    if unsafe { libc::tcgetattr(fd, &mut attr) } < 0 {
        return Ok(Value::Int(-1));
    }

    crate::value::set_by_hash(
        Value::Object(map_id),
        crate::object::hash_chars(&"c_iflag".chars().collect::<Vec<_>>()),
        Value::Int(i64::from(attr.c_iflag)),
        &mut ctx.heap,
        pos,
    )?;
    crate::value::set_by_hash(
        Value::Object(map_id),
        crate::object::hash_chars(&"c_oflag".chars().collect::<Vec<_>>()),
        Value::Int(i64::from(attr.c_oflag)),
        &mut ctx.heap,
        pos,
    )?;
    crate::value::set_by_hash(
        Value::Object(map_id),
        crate::object::hash_chars(&"c_cflag".chars().collect::<Vec<_>>()),
        Value::Int(i64::from(attr.c_cflag)),
        &mut ctx.heap,
        pos,
    )?;
    crate::value::set_by_hash(
        Value::Object(map_id),
        crate::object::hash_chars(&"c_lflag".chars().collect::<Vec<_>>()),
        Value::Int(i64::from(attr.c_lflag)),
        &mut ctx.heap,
        pos,
    )?;

    let cc_hash = crate::object::hash_chars(&"c_cc".chars().collect::<Vec<_>>());
    if let Ok(cc_value) = crate::value::get_by_hash(Value::Object(map_id), cc_hash, &ctx.heap, pos) {
        if let Value::Object(cc_id) = cc_value {
            if let HeapData::ByteArray(array) = ctx.heap.get_mut(cc_id) {
                if array.mode == ByteArrayMode::UnsignedChar {
                    for (i, byte) in attr.c_cc.iter().enumerate().take(array.element_count()) {
                        let _ = array.set(i, i64::from(*byte));
                    }
                }
            }
        }
    }
    Ok(Value::Int(0))
}

#[cfg(not(unix))]
fn tcgetattr(_args: &[Value], _ctx: &mut Context, _pos: &Position) -> Result<Value, RaisedError> {
    Ok(Value::None)
}

#[cfg(unix)]
fn tcsetattr(args: &[Value], ctx: &mut Context, pos: &Position) -> Result<Value, RaisedError> {
    expect_argc(args, 3, pos)?;
    let fd = expect_int(args[0], pos)? as i32;
    let actions = expect_int(args[1], pos)? as i32;
    let Value::Object(map_id) = args[2] else {
        return Err(RaisedError::runtime("Invalid arguments", pos));
    };

    let mut attr: libc::termios = unsafe { std::mem::zeroed() };
    for (field, setter) in [
        ("c_iflag", (|a: &mut libc::termios, v: i64| a.c_iflag = v as libc::tcflag_t) as fn(&mut libc::termios, i64)),
        ("c_oflag", |a, v| a.c_oflag = v as libc::tcflag_t),
        ("c_cflag", |a, v| a.c_cflag = v as libc::tcflag_t),
        ("c_lflag", |a, v| a.c_lflag = v as libc::tcflag_t),
    ] {
        let hash = crate::object::hash_chars(&field.chars().collect::<Vec<_>>());
        if let Ok(Value::Int(v)) = crate::value::get_by_hash(Value::Object(map_id), hash, &ctx.heap, pos) {
            setter(&mut attr, v);
        }
    }

    let cc_hash = crate::object::hash_chars(&"c_cc".chars().collect::<Vec<_>>());
    if let Ok(Value::Object(cc_id)) = crate::value::get_by_hash(Value::Object(map_id), cc_hash, &ctx.heap, pos) {
        if let HeapData::ByteArray(array) = ctx.heap.get(cc_id) {
            if array.mode == ByteArrayMode::UnsignedChar {
                for (i, slot) in attr.c_cc.iter_mut().enumerate() {
                    if let Some(v) = array.get(i) {
                        *slot = v as libc::cc_t;
                    }
                }
            }
        }
    }

    let result = unsafe { libc::tcsetattr(fd, actions, &attr) };
    Ok(Value::Int(i64::from(result)))
}

#[cfg(not(unix))]
fn tcsetattr(_args: &[Value], _ctx: &mut Context, _pos: &Position) -> Result<Value, RaisedError> {
    Ok(Value::Int(-1))
}
