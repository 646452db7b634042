//! Stdlib module registration and builtin dispatch.
//!
//! Each submodule here mirrors one `original_source/src/emerald/module/*.c`
//! file's `initialize` function: build a map, populate it with constants
//! and [`crate::object::BuiltinFunction`] values, then bind it into the
//! root scope. `site` is the one exception (per `spec.md` §6 and
//! `SPEC_FULL.md`'s supplemented-features note): its bindings land directly
//! in the root scope rather than behind a `__module_site` namespace.

pub mod array_mod;
pub mod os_mod;
pub mod posix_mod;
pub mod site_mod;
pub mod string_mod;
pub mod utf8_mod;

use crate::context::Context;
use crate::diagnostics::RaisedError;
use crate::heap::{Heap, HeapData, HeapId};
use crate::object::{BuiltinFunction, BuiltinId, EmMap};
use crate::position::Position;
use crate::value::Value;

/// Install every stdlib module into `ctx`'s root scope. Called once at
/// interpreter startup, before any user source runs.
pub fn install(ctx: &mut Context, argv: Vec<String>) {
    os_mod::install(ctx);
    string_mod::install(ctx);
    utf8_mod::install(ctx);
    array_mod::install(ctx);
    posix_mod::install(ctx);
    site_mod::install(ctx, argv);
}

/// Allocate an empty map, bind it under `name` in the root scope, and
/// return its id for the caller to populate.
fn new_module(ctx: &mut Context, name: &str) -> HeapId {
    let id = ctx.heap.allocate(HeapData::Map(EmMap::default()));
    let root = ctx.root_scope();
    ctx.set_value_in(root, name, Value::Object(id));
    id
}

fn set_const(ctx: &mut Context, map: HeapId, name: &str, value: Value) {
    ctx.set_value_in(map, name, value);
}

fn set_builtin(ctx: &mut Context, map: HeapId, name: &'static str, id: BuiltinId) {
    let heap_id = ctx.heap.allocate(HeapData::Builtin(BuiltinFunction { name, id }));
    ctx.set_value_in(map, name, Value::Object(heap_id));
}

/// Dispatch a native call by [`BuiltinId`] to its module's handler.
pub fn call_builtin(id: BuiltinId, ctx: &mut Context, args: &[Value], pos: &Position) -> Result<Value, RaisedError> {
    match id {
        BuiltinId::SiteLengthOf
        | BuiltinId::SiteToString
        | BuiltinId::SiteAppend
        | BuiltinId::SitePrint
        | BuiltinId::SitePrintln
        | BuiltinId::SiteExit => site_mod::call(id, ctx, args, pos),
        BuiltinId::OsSleep
        | BuiltinId::OsExists
        | BuiltinId::OsOpenFile
        | BuiltinId::OsReadFile
        | BuiltinId::OsWriteFile
        | BuiltinId::OsSeekFile
        | BuiltinId::OsCloseFile => os_mod::call(id, ctx, args, pos),
        BuiltinId::StringFormat => string_mod::call(id, ctx, args, pos),
        BuiltinId::Utf8EncodeInteger
        | BuiltinId::Utf8DecodeInteger
        | BuiltinId::Utf8Encode
        | BuiltinId::Utf8Decode
        | BuiltinId::Utf8ValidateBytes => utf8_mod::call(id, ctx, args, pos),
        BuiltinId::ArrayNew => array_mod::call(id, ctx, args, pos),
        BuiltinId::PosixRead
        | BuiltinId::PosixWrite
        | BuiltinId::PosixTcGetAttr
        | BuiltinId::PosixTcSetAttr
        | BuiltinId::PosixStrError => posix_mod::call(id, ctx, args, pos),
    }
}

/// Argument-count and type-extraction helpers shared by every module,
/// standing in for the original's `em_util_parse_args` format-string
/// parser (`"n"`, `"W"`, `"ii"`, ...).
pub fn expect_argc(args: &[Value], n: usize, pos: &Position) -> Result<(), RaisedError> {
    if args.len() != n {
        return Err(RaisedError::runtime(
            format!("Expected {n} argument(s), got {}", args.len()),
            pos,
        ));
    }
    Ok(())
}

pub fn expect_int(value: Value, pos: &Position) -> Result<i64, RaisedError> {
    match value {
        Value::Int(n) => Ok(n),
        _ => Err(RaisedError::runtime("Expected an integer argument", pos)),
    }
}

pub fn expect_string<'h>(value: Value, heap: &'h Heap, pos: &Position) -> Result<&'h crate::object::EmString, RaisedError> {
    if let Value::Object(id) = value {
        if let HeapData::Str(s) = heap.get(id) {
            return Ok(s);
        }
    }
    Err(RaisedError::runtime("Expected a string argument", pos))
}
