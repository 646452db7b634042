//! The `site` bindings: unlike every other stdlib module, these land
//! directly in the root scope rather than behind a `__module_site`
//! namespace (`SPEC_FULL.md`'s supplemented-features note, grounded on
//! `original_source/src/emerald/module/site.c`).

use std::io::Write as _;

use crate::context::Context;
use crate::diagnostics::RaisedError;
use crate::heap::HeapData;
use crate::object::BuiltinId;
use crate::position::Position;
use crate::value::Value;

use super::{expect_argc, set_builtin, set_const};

pub fn install(ctx: &mut Context, argv: Vec<String>) {
    let root = ctx.root_scope();
    set_const(ctx, root, "true", Value::Int(1));
    set_const(ctx, root, "false", Value::Int(0));
    set_const(ctx, root, "none", Value::None);

    let mut entries = crate::object::EmList::new();
    for s in &argv {
        let id = ctx.heap.allocate(HeapData::Str(crate::object::EmString::from_str(s)));
        entries.push(Value::Object(id));
    }
    let argv_id = ctx.heap.allocate(HeapData::List(entries));
    set_const(ctx, root, "argv", Value::Object(argv_id));

    set_builtin(ctx, root, "lengthOf", BuiltinId::SiteLengthOf);
    set_builtin(ctx, root, "toString", BuiltinId::SiteToString);
    set_builtin(ctx, root, "append", BuiltinId::SiteAppend);
    set_builtin(ctx, root, "print", BuiltinId::SitePrint);
    set_builtin(ctx, root, "println", BuiltinId::SitePrintln);
    set_builtin(ctx, root, "exit", BuiltinId::SiteExit);
}

pub fn call(id: BuiltinId, ctx: &mut Context, args: &[Value], pos: &Position) -> Result<Value, RaisedError> {
    match id {
        BuiltinId::SiteLengthOf => length_of(args, ctx, pos),
        BuiltinId::SiteToString => to_string(args, ctx, pos),
        BuiltinId::SiteAppend => append(args, ctx, pos),
        BuiltinId::SitePrint => print(args, ctx, pos, false),
        BuiltinId::SitePrintln => print(args, ctx, pos, true),
        BuiltinId::SiteExit => exit(args, pos),
        _ => unreachable!("site_mod::call received a non-site BuiltinId"),
    }
}

fn length_of(args: &[Value], ctx: &mut Context, pos: &Position) -> Result<Value, RaisedError> {
    expect_argc(args, 1, pos)?;
    let n = crate::value::length_of_checked(args[0], &ctx.heap, pos)?;
    Ok(Value::Int(n))
}

fn to_string(args: &[Value], ctx: &mut Context, pos: &Position) -> Result<Value, RaisedError> {
    expect_argc(args, 1, pos)?;
    let chars = crate::eval::value_to_chars(args[0], ctx, pos)?;
    let id = ctx.heap.allocate(HeapData::Str(crate::object::EmString::new(chars)));
    Ok(Value::Object(id))
}

fn append(args: &[Value], ctx: &mut Context, pos: &Position) -> Result<Value, RaisedError> {
    expect_argc(args, 2, pos)?;
    let Value::Object(list_id) = args[0] else {
        return Err(RaisedError::runtime("Expected a list argument", pos));
    };
    let HeapData::List(list) = ctx.heap.get_mut(list_id) else {
        return Err(RaisedError::runtime("Expected a list argument", pos));
    };
    list.push(args[1]);
    ctx.heap.incref_value(args[1]);
    Ok(Value::None)
}

fn print(args: &[Value], ctx: &mut Context, pos: &Position, newline: bool) -> Result<Value, RaisedError> {
    let mut out = std::io::stdout().lock();
    for arg in args {
        let chars = crate::eval::value_to_chars(*arg, ctx, pos)?;
        let text: String = chars.into_iter().collect();
        let _ = write!(out, "{text}");
    }
    if newline {
        let _ = writeln!(out);
    }
    Ok(Value::None)
}

/// Raises `SystemExit` rather than calling `std::process::exit` directly,
/// so a `try/catch` can still intercept it; an uncaught `SystemExit`
/// reaching the top level is what actually ends the process (`emerald-cli`
/// maps `RaisedError::exit_code` onto the real exit code there).
fn exit(args: &[Value], pos: &Position) -> Result<Value, RaisedError> {
    let code = if args.is_empty() { 0 } else { super::expect_int(args[0], pos)? };
    Err(RaisedError::exit(code as i32))
}
