//! The tree-walking evaluator.
//!
//! Grounded on `original_source/src/emerald/eval.c`'s `em_eval_node`
//! dispatch and `spec.md` §4.9's redesign note: instead of a process-wide
//! raised-error channel with a handful of sentinel "system" classes for
//! control flow, every evaluation returns `Result<Value, Signal>`, and
//! `break`/`continue`/`return`/a raised error are each a distinct
//! [`Signal`] variant propagated with `?`. Only the frames `spec.md` §7
//! names as catching something actually match on a `Signal` variant; every
//! other node just lets `?` carry it past.

use crate::ast::{AssignTarget, BinOp, Node, NodeKind, UnaryOp};
use crate::context::Context;
use crate::diagnostics::{ErrorClass, RaisedError};
use crate::heap::{Heap, HeapData, HeapId};
use crate::object::{hash_chars, BoundMethod, EmClass, EmFunction, EmList, EmMap, EmString};
use crate::position::Position;
use crate::value::{self, Value};

/// What a node evaluation produced when it isn't a plain value: the three
/// loop/function control-flow escapes, or a raised error. `spec.md` §9's
/// redesigned `Outcome = Value | Break | Continue | Return(Value) |
/// Error(Instance)`, with the final `Value` folded into `Ok` instead of a
/// fourth `Signal` variant.
#[derive(Debug)]
pub enum Signal {
    Break,
    Continue,
    Return(Value),
    Raised(RaisedError),
}

impl From<RaisedError> for Signal {
    fn from(e: RaisedError) -> Self {
        Self::Raised(e)
    }
}

pub type EvalResult<T> = Result<T, Signal>;

// Sentinel identities for the seven builtin error classes, bound as plain
// `Int`s in the root scope (`install_builtin_classes`, below). These never
// appear in ordinary arithmetic since user programs have no reason to
// construct negative constants named `Error`/`RuntimeError`/etc., and
// unlike user classes they carry no member map or base chain — the
// builtins are not subclassable, matching `original_source`'s fixed set
// of "system" error kinds.
const CLASS_TAG_ERROR: i64 = -1;
const CLASS_TAG_SYNTAX_ERROR: i64 = -2;
const CLASS_TAG_RUNTIME_ERROR: i64 = -3;
const CLASS_TAG_SYSTEM_BREAK: i64 = -4;
const CLASS_TAG_SYSTEM_CONTINUE: i64 = -5;
const CLASS_TAG_SYSTEM_RETURN: i64 = -6;
const CLASS_TAG_SYSTEM_EXIT: i64 = -7;

fn class_value_of(class: ErrorClass) -> Value {
    match class {
        ErrorClass::Error => Value::Int(CLASS_TAG_ERROR),
        ErrorClass::SyntaxError => Value::Int(CLASS_TAG_SYNTAX_ERROR),
        ErrorClass::RuntimeError => Value::Int(CLASS_TAG_RUNTIME_ERROR),
        ErrorClass::SystemBreak => Value::Int(CLASS_TAG_SYSTEM_BREAK),
        ErrorClass::SystemContinue => Value::Int(CLASS_TAG_SYSTEM_CONTINUE),
        ErrorClass::SystemReturn => Value::Int(CLASS_TAG_SYSTEM_RETURN),
        ErrorClass::SystemExit => Value::Int(CLASS_TAG_SYSTEM_EXIT),
        ErrorClass::User(id) => Value::Object(id),
    }
}

fn error_class_of_value(v: Value, heap: &Heap) -> Option<ErrorClass> {
    match v {
        Value::Int(CLASS_TAG_ERROR) => Some(ErrorClass::Error),
        Value::Int(CLASS_TAG_SYNTAX_ERROR) => Some(ErrorClass::SyntaxError),
        Value::Int(CLASS_TAG_RUNTIME_ERROR) => Some(ErrorClass::RuntimeError),
        Value::Int(CLASS_TAG_SYSTEM_BREAK) => Some(ErrorClass::SystemBreak),
        Value::Int(CLASS_TAG_SYSTEM_CONTINUE) => Some(ErrorClass::SystemContinue),
        Value::Int(CLASS_TAG_SYSTEM_RETURN) => Some(ErrorClass::SystemReturn),
        Value::Int(CLASS_TAG_SYSTEM_EXIT) => Some(ErrorClass::SystemExit),
        Value::Object(id) if matches!(heap.get(id), HeapData::Class(_)) => Some(ErrorClass::User(id)),
        _ => None,
    }
}

fn install_builtin_classes(ctx: &mut Context) {
    let root = ctx.root_scope();
    ctx.set_value_in(root, "Error", class_value_of(ErrorClass::Error));
    ctx.set_value_in(root, "SyntaxError", class_value_of(ErrorClass::SyntaxError));
    ctx.set_value_in(root, "RuntimeError", class_value_of(ErrorClass::RuntimeError));
    ctx.set_value_in(root, "SystemBreak", class_value_of(ErrorClass::SystemBreak));
    ctx.set_value_in(root, "SystemContinue", class_value_of(ErrorClass::SystemContinue));
    ctx.set_value_in(root, "SystemReturn", class_value_of(ErrorClass::SystemReturn));
    ctx.set_value_in(root, "SystemExit", class_value_of(ErrorClass::SystemExit));
}

/// Owns the context and drives source through lex/parse/eval. The single
/// entry point `emerald-cli` (and the test harness) calls against.
pub struct Interpreter {
    pub ctx: Context,
}

impl Interpreter {
    #[must_use]
    pub fn new(cwd: std::path::PathBuf, stdlib_dir: std::path::PathBuf, argv: Vec<String>) -> Self {
        let mut ctx = Context::new(cwd, stdlib_dir, argv.clone());
        install_builtin_classes(&mut ctx);
        crate::modules::install(&mut ctx, argv);
        Self { ctx }
    }

    /// Lex, parse, and evaluate `source` as a full program. A `return` at
    /// the top level is treated as ending the program with that value (the
    /// REPL's last typed expression does this); a stray `break`/`continue`
    /// is a `RuntimeError` since nothing catches them outside a loop.
    pub fn run(&mut self, path: &str, source: &str) -> Result<Value, RaisedError> {
        let tokens = crate::lexer::Lexer::new(path, source).tokenize()?;
        let program = crate::parser::Parser::new(tokens).parse_program()?;
        let top_pos = program.pos.clone();
        match eval_node(&mut self.ctx, &program) {
            Ok(v) => Ok(v),
            Err(Signal::Return(v)) => Ok(v),
            Err(Signal::Break) => Err(RaisedError::runtime("'break' used outside a loop", &top_pos)),
            Err(Signal::Continue) => Err(RaisedError::runtime("'continue' used outside a loop", &top_pos)),
            Err(Signal::Raised(e)) => Err(e),
        }
    }
}

/// Render any value the way `puts`/`site.toString`/`string.format` do.
/// `spec.md` §4.7: a map/instance exposes `to_string` by looking up
/// `_toString` and delegating to it; absence yields the literal `"{...}"`.
pub fn value_to_chars(v: Value, ctx: &mut Context, pos: &Position) -> Result<Vec<char>, RaisedError> {
    match v {
        Value::None => Ok("none".chars().collect()),
        Value::Int(n) => Ok(n.to_string().chars().collect()),
        Value::Float(f) => Ok(f.to_string().chars().collect()),
        Value::Object(id) => match ctx.heap.get(id) {
            HeapData::Str(s) => Ok(s.chars.to_vec()),
            HeapData::List(list) => {
                let items: Vec<Value> = list.iter().copied().collect();
                let mut out = vec!['['];
                for (i, item) in items.into_iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                        out.push(' ');
                    }
                    out.extend(value_to_chars(item, ctx, pos)?);
                }
                out.push(']');
                Ok(out)
            }
            HeapData::Map(_) | HeapData::Instance(..) => to_string_via_map(v, ctx, pos),
            HeapData::Function(f) => {
                Ok(format!("<function {}>", f.name.as_deref().unwrap_or("anonymous")).chars().collect())
            }
            HeapData::Builtin(b) => Ok(format!("<builtin {}>", b.name).chars().collect()),
            HeapData::BoundMethod(_) => Ok("<bound method>".chars().collect()),
            HeapData::Class(c) => Ok(format!("<class {}>", c.name).chars().collect()),
            HeapData::ByteArray(b) => Ok(format!("<Byte array of size {}>", b.element_count()).chars().collect()),
            HeapData::File(_) => Ok("<file>".chars().collect()),
        },
    }
}

fn to_string_via_map(v: Value, ctx: &mut Context, pos: &Position) -> Result<Vec<char>, RaisedError> {
    let to_string_hash = hash_chars(&"_toString".chars().collect::<Vec<_>>());
    match value::get_by_hash(v, to_string_hash, &ctx.heap, pos) {
        Ok(entry) if is_callable(entry, &ctx.heap) => {
            let result = call_value(entry, &[], ctx, pos).map_err(signal_into_raised)?;
            value_to_chars(result, ctx, pos)
        }
        Ok(entry) => value_to_chars(entry, ctx, pos),
        Err(_) => Ok("{...}".chars().collect()),
    }
}

/// `Signal` -> `RaisedError` for spots (native builtins) that can only
/// surface a raised error, never a bare break/continue/return: those two
/// escapes can't occur from a `_toString` method body reaching here
/// legitimately, so a stray one is itself reported as a runtime error.
fn signal_into_raised(sig: Signal) -> RaisedError {
    match sig {
        Signal::Raised(e) => e,
        Signal::Break => RaisedError::new(ErrorClass::RuntimeError, "'break' escaped a _toString call", None),
        Signal::Continue => RaisedError::new(ErrorClass::RuntimeError, "'continue' escaped a _toString call", None),
        Signal::Return(_) => RaisedError::new(ErrorClass::RuntimeError, "'return' escaped a _toString call", None),
    }
}

fn is_callable(v: Value, heap: &Heap) -> bool {
    matches!(
        v,
        Value::Object(id)
            if matches!(
                heap.get(id),
                HeapData::Function(_) | HeapData::Builtin(_) | HeapData::BoundMethod(_) | HeapData::Class(_)
            )
    )
}

fn is_wrappable(v: Value, heap: &Heap) -> bool {
    matches!(
        v,
        Value::Object(id) if matches!(heap.get(id), HeapData::Function(_) | HeapData::Builtin(_) | HeapData::BoundMethod(_))
    )
}

fn undefined_variable(name: &str, pos: &Position) -> Signal {
    Signal::Raised(RaisedError::runtime(format!("Undefined variable '{name}'"), pos))
}

/// Evaluate a single node. `Block` (and anything that contains one) is the
/// only place a sequence of statements runs; every other variant handles
/// its own children directly.
pub fn eval_node(ctx: &mut Context, node: &Node) -> EvalResult<Value> {
    match &node.kind {
        NodeKind::IntLit(n) => Ok(Value::Int(*n)),
        NodeKind::FloatLit(f) => Ok(Value::Float(*f)),
        NodeKind::StringLit(chars) => {
            let id = ctx.heap.allocate(HeapData::Str(EmString::new(chars.to_vec())));
            Ok(Value::Object(id))
        }
        NodeKind::Ident(name) => ctx.get_value(name).ok_or_else(|| undefined_variable(name, &node.pos)),

        NodeKind::ListLit(items) => {
            let mut list = EmList::new();
            for item in items {
                let v = eval_node(ctx, item)?;
                ctx.heap.incref_value(v);
                list.push(v);
            }
            Ok(Value::Object(ctx.heap.allocate(HeapData::List(list))))
        }
        NodeKind::MapLit(entries) => {
            let map_id = ctx.heap.allocate(HeapData::Map(EmMap::default()));
            for (key_node, value_node) in entries {
                let key_value = eval_node(ctx, key_node)?;
                let h = value::hash(key_value, &ctx.heap);
                let v = eval_node(ctx, value_node)?;
                value::set_by_hash(Value::Object(map_id), h, v, &mut ctx.heap, &node.pos)?;
            }
            Ok(Value::Object(map_id))
        }

        NodeKind::BinOp { op, left, right } => eval_binop(ctx, *op, left, right, &node.pos),
        NodeKind::UnaryOp { op, operand } => eval_unaryop(ctx, *op, operand, &node.pos),

        NodeKind::Call { callee, args } => {
            let callee_value = eval_node(ctx, callee)?;
            let mut arg_values = Vec::with_capacity(args.len());
            for a in args {
                arg_values.push(eval_node(ctx, a)?);
            }
            call_value(callee_value, &arg_values, ctx, &node.pos)
        }
        NodeKind::MemberAccess { object, name } => {
            let object_value = eval_node(ctx, object)?;
            let h = hash_chars(&name.chars().collect::<Vec<_>>());
            member_access(ctx, object_value, h, &node.pos)
        }
        NodeKind::Index { object, index } => {
            let object_value = eval_node(ctx, object)?;
            let index_value = eval_node(ctx, index)?;
            Ok(value::get_by_index(object_value, index_value, &mut ctx.heap, &node.pos)?)
        }

        NodeKind::Let { target, value } => {
            let v = eval_node(ctx, value)?;
            assign(ctx, target, v, &node.pos)?;
            Ok(v)
        }
        NodeKind::Func { name, params, body } => {
            let closure = ctx.capture_scope_chain();
            let func = EmFunction {
                name: name.clone(),
                arg_names: params.clone().into(),
                body: body.clone(),
                closure,
            };
            let id = ctx.heap.allocate(HeapData::Function(func));
            if let Some(name) = name {
                ctx.set_value(name, Value::Object(id));
            }
            Ok(Value::Object(id))
        }
        NodeKind::Class { name, base, body } => eval_class(ctx, name, base.as_deref(), body, &node.pos),

        NodeKind::Try {
            try_block,
            catch_name,
            catch_class,
            catch_block,
        } => eval_try(ctx, try_block, catch_name.as_deref(), catch_class.as_deref(), catch_block),

        NodeKind::If { branches, else_block } => {
            for (cond, block) in branches {
                let c = eval_node(ctx, cond)?;
                if value::is_true(c, &ctx.heap) {
                    return eval_node(ctx, block);
                }
            }
            match else_block {
                Some(block) => eval_node(ctx, block),
                None => Ok(Value::None),
            }
        }
        NodeKind::For { var, start, end, body } => eval_for(ctx, var, start, end, body, &node.pos),
        NodeKind::Foreach { var, iter, body } => eval_foreach(ctx, var, iter, body, &node.pos),
        NodeKind::While { cond, body } => eval_while(ctx, cond, body),

        NodeKind::Puts(exprs) => {
            let mut rendered = Vec::with_capacity(exprs.len());
            for e in exprs {
                let v = eval_node(ctx, e)?;
                rendered.push(value_to_chars(v, ctx, &node.pos)?);
            }
            for chars in rendered {
                let text: String = chars.into_iter().collect();
                ctx.output.write_str(&text);
            }
            ctx.output.write_str("\n");
            Ok(Value::None)
        }
        NodeKind::Return(expr) => {
            let v = eval_node(ctx, expr)?;
            Err(Signal::Return(v))
        }
        NodeKind::Raise(expr) => {
            let v = eval_node(ctx, expr)?;
            Err(build_raise(ctx, v, &node.pos))
        }
        NodeKind::Include(expr) => eval_include(ctx, expr, &node.pos),
        NodeKind::Break => Err(Signal::Break),
        NodeKind::Continue => Err(Signal::Continue),

        NodeKind::Block(statements) => {
            let mut last = Value::None;
            for stmt in statements {
                last = eval_node(ctx, stmt)?;
            }
            Ok(last)
        }
    }
}

fn eval_binop(ctx: &mut Context, op: BinOp, left: &Node, right: &Node, pos: &Position) -> EvalResult<Value> {
    // Every binary operator, including `and`/`or`, evaluates both operands
    // eagerly and in order (`spec.md` §5): there is no short-circuiting.
    let l = eval_node(ctx, left)?;
    let r = eval_node(ctx, right)?;
    match op {
        BinOp::And => Ok(Value::Int(i64::from(value::is_true(l, &ctx.heap) && value::is_true(r, &ctx.heap)))),
        BinOp::Or => Ok(Value::Int(i64::from(value::is_true(l, &ctx.heap) || value::is_true(r, &ctx.heap)))),
        BinOp::Eq => Ok(Value::Int(i64::from(value::eq(l, r, &ctx.heap)))),
        BinOp::NotEq => Ok(Value::Int(i64::from(!value::eq(l, r, &ctx.heap)))),
        BinOp::Lt => Ok(Value::Int(i64::from(value::compare_less_than(l, r, &ctx.heap, pos)?))),
        BinOp::Gt => Ok(Value::Int(i64::from(value::compare_greater_than(l, r, &ctx.heap, pos)?))),
        BinOp::LtEq => Ok(Value::Int(i64::from(!value::compare_greater_than(l, r, &ctx.heap, pos)?))),
        BinOp::GtEq => Ok(Value::Int(i64::from(!value::compare_less_than(l, r, &ctx.heap, pos)?))),
        BinOp::Add => Ok(value::add(l, r, &mut ctx.heap, pos)?),
        BinOp::Sub => Ok(value::sub(l, r, &ctx.heap, pos)?),
        BinOp::Mul => Ok(value::mul(l, r, &mut ctx.heap, pos)?),
        BinOp::Div => Ok(value::div(l, r, &ctx.heap, pos)?),
        BinOp::Mod => Ok(value::modulo(l, r, &ctx.heap, pos)?),
        BinOp::BitOr => Ok(value::bit_or(l, r, &ctx.heap, pos)?),
        BinOp::BitAnd => Ok(value::bit_and(l, r, &ctx.heap, pos)?),
        BinOp::Shl => Ok(value::shift_left(l, r, &ctx.heap, pos)?),
        BinOp::Shr => Ok(value::shift_right(l, r, &ctx.heap, pos)?),
    }
}

fn eval_unaryop(ctx: &mut Context, op: UnaryOp, operand: &Node, pos: &Position) -> EvalResult<Value> {
    let v = eval_node(ctx, operand)?;
    match op {
        UnaryOp::Not => Ok(Value::Int(i64::from(!value::is_true(v, &ctx.heap)))),
        UnaryOp::Plus => match v {
            Value::Int(_) | Value::Float(_) => Ok(v),
            _ => Err(RaisedError::runtime(format!("Unsupported operand type for unary +: '{}'", v.type_name(&ctx.heap)), pos).into()),
        },
        UnaryOp::Minus => match v {
            Value::Int(n) => Ok(Value::Int(n.wrapping_neg())),
            Value::Float(f) => Ok(Value::Float(-f)),
            _ => Err(RaisedError::runtime(format!("Unsupported operand type for unary -: '{}'", v.type_name(&ctx.heap)), pos).into()),
        },
        UnaryOp::BitNot => match v {
            Value::Int(n) => Ok(Value::Int(!n)),
            _ => Err(RaisedError::runtime(format!("Unsupported operand type for unary ~: '{}'", v.type_name(&ctx.heap)), pos).into()),
        },
    }
}

fn member_access(ctx: &mut Context, object_value: Value, name_hash: u64, pos: &Position) -> EvalResult<Value> {
    // Class attribute access passes through to the class's member map
    // rather than treating the class heap object itself as a map
    // (`spec.md` §4.8).
    if let Value::Object(id) = object_value {
        if let HeapData::Class(c) = ctx.heap.get(id) {
            let members = Value::Object(c.members);
            return Ok(value::get_by_hash(members, name_hash, &ctx.heap, pos)?);
        }
    }
    Ok(value::get_by_hash(object_value, name_hash, &ctx.heap, pos)?)
}

fn assign(ctx: &mut Context, target: &AssignTarget, value_to_store: Value, pos: &Position) -> EvalResult<()> {
    let first = &target.path[0];

    if target.path.len() == 1 {
        match &target.index {
            None => ctx.set_value(first, value_to_store),
            Some(index_node) => {
                let container = ctx.get_value(first).ok_or_else(|| undefined_variable(first, pos))?;
                let index_value = eval_node(ctx, index_node)?;
                value::set_by_index(container, index_value, value_to_store, &mut ctx.heap, pos)?;
            }
        }
        return Ok(());
    }

    let mut current = ctx.get_value(first).ok_or_else(|| undefined_variable(first, pos))?;
    for name in &target.path[1..target.path.len() - 1] {
        let h = hash_chars(&name.chars().collect::<Vec<_>>());
        current = value::get_by_hash(current, h, &ctx.heap, pos)?;
    }

    let last = target.path.last().expect("path is non-empty");
    let last_hash = hash_chars(&last.chars().collect::<Vec<_>>());
    match &target.index {
        None => value::set_by_hash(current, last_hash, value_to_store, &mut ctx.heap, pos)?,
        Some(index_node) => {
            let container = value::get_by_hash(current, last_hash, &ctx.heap, pos)?;
            let index_value = eval_node(ctx, index_node)?;
            value::set_by_index(container, index_value, value_to_store, &mut ctx.heap, pos)?;
        }
    }
    Ok(())
}

// --- Calls: functions, builtins, bound methods, class instantiation -----

pub fn call_value(callee: Value, args: &[Value], ctx: &mut Context, pos: &Position) -> EvalResult<Value> {
    let Value::Object(id) = callee else {
        return Err(RaisedError::runtime(format!("'{}' is not callable", callee.type_name(&ctx.heap)), pos).into());
    };
    match ctx.heap.get(id) {
        HeapData::Function(_) => call_function(ctx, id, args, pos),
        HeapData::Builtin(b) => {
            let builtin_id = b.id;
            crate::modules::call_builtin(builtin_id, ctx, args, pos).map_err(Signal::from)
        }
        HeapData::BoundMethod(_) => call_bound_method(ctx, id, args, pos),
        HeapData::Class(_) => instantiate_class(ctx, id, args, pos),
        other => Err(RaisedError::runtime(format!("'{}' is not callable", other.type_name()), pos).into()),
    }
}

fn call_function(ctx: &mut Context, func_id: HeapId, args: &[Value], pos: &Position) -> EvalResult<Value> {
    let (arg_names, body, closure) = {
        let HeapData::Function(f) = ctx.heap.get(func_id) else {
            unreachable!("call_function requires a Function heap object")
        };
        (f.arg_names.clone(), f.body.clone(), f.closure.clone())
    };

    if args.len() != arg_names.len() {
        let msg = if args.len() < arg_names.len() { "Too few arguments" } else { "Too many arguments" };
        return Err(RaisedError::runtime(msg, pos).into());
    }

    let saved_scopes = ctx.set_scope_chain(closure);
    let push_result = ctx.push_scope(pos);
    if let Err(e) = push_result {
        ctx.set_scope_chain(saved_scopes);
        return Err(e.into());
    }
    for (name, value) in arg_names.iter().zip(args.iter()) {
        ctx.set_value(name, *value);
    }

    let result = eval_node(ctx, &body);

    ctx.pop_scope();
    ctx.set_scope_chain(saved_scopes);

    match result {
        // Falling off the end of the body without an explicit `return`
        // yields `none`, regardless of the body's last expression value
        // (`spec.md` §4.8) — unlike `if`/`try`/`Block`, which pass their
        // trailing value through.
        Ok(_) => Ok(Value::None),
        Err(Signal::Return(v)) => Ok(v),
        Err(other) => Err(other),
    }
}

/// `binding` is incref'd for the duration of the call and decref'd after,
/// so a call like `obj.method()` — where the `BoundMethod` built by the
/// member access is the only thing keeping `obj` alive — doesn't let
/// `obj`'s refcount reach zero mid-call (`spec.md` §4.8/§9).
fn call_bound_method(ctx: &mut Context, bm_id: HeapId, args: &[Value], pos: &Position) -> EvalResult<Value> {
    let (binding, function) = {
        let HeapData::BoundMethod(bm) = ctx.heap.get(bm_id) else {
            unreachable!("call_bound_method requires a BoundMethod heap object")
        };
        (bm.binding, bm.function)
    };
    ctx.heap.incref_value(binding);
    let mut full_args = Vec::with_capacity(args.len() + 1);
    full_args.push(binding);
    full_args.extend_from_slice(args);
    let result = call_value(function, &full_args, ctx, pos);
    ctx.heap.decref_value(binding);
    result
}

fn eval_class(ctx: &mut Context, name: &str, base: Option<&Node>, body: &Node, pos: &Position) -> EvalResult<Value> {
    let base_id = match base {
        None => None,
        Some(base_expr) => {
            let base_value = eval_node(ctx, base_expr)?;
            let Value::Object(id) = base_value else {
                return Err(RaisedError::runtime("Base class expression is not a class", pos).into());
            };
            if !matches!(ctx.heap.get(id), HeapData::Class(_)) {
                return Err(RaisedError::runtime("Base class expression is not a class", pos).into());
            }
            Some(id)
        }
    };

    let members_id = ctx.heap.allocate(HeapData::Map(EmMap::default()));
    // Run the body with the member map as the active scope, so the `func`
    // and `let` statements inside land there instead of the enclosing
    // scope. `push_existing_scope` increfs it; `pop_scope` decrefs it back
    // down to the single reference the `EmClass` below will hold.
    ctx.push_existing_scope(members_id, pos)?;
    let body_result = eval_node(ctx, body);
    ctx.pop_scope();
    body_result?;

    let class = EmClass {
        name: crate::context::intern(name),
        base: base_id,
        members: members_id,
    };
    let class_id = ctx.heap.allocate(HeapData::Class(class));
    ctx.set_value(name, Value::Object(class_id));
    Ok(Value::Object(class_id))
}

/// Walk the base chain root-to-leaf copying every member into a fresh
/// instance map; callables become bound methods rebound to the new
/// instance; `_class` is set; `_initialize`, if present, is invoked with
/// the instance prepended (`spec.md` §4.8).
fn instantiate_class(ctx: &mut Context, class_id: HeapId, args: &[Value], pos: &Position) -> EvalResult<Value> {
    let mut chain = Vec::new();
    let mut cursor = Some(class_id);
    while let Some(id) = cursor {
        let HeapData::Class(c) = ctx.heap.get(id) else {
            return Err(RaisedError::runtime("Cannot instantiate a non-class value", pos).into());
        };
        chain.push(c.members);
        cursor = c.base;
    }
    chain.reverse();

    let inst_id = ctx.heap.allocate(HeapData::Instance(EmMap::default(), class_id));
    ctx.heap.incref(class_id);

    for members_id in chain {
        let entries: Vec<(u64, Value)> = match ctx.heap.get(members_id) {
            HeapData::Map(m) => m.iter().map(|(k, v)| (*k, *v)).collect(),
            _ => unreachable!("class members slot is always a Map"),
        };
        for (key_hash, value) in entries {
            let bound_value = if is_wrappable(value, &ctx.heap) {
                let bm_id = ctx.heap.allocate(HeapData::BoundMethod(BoundMethod {
                    binding: Value::Object(inst_id),
                    function: value,
                }));
                ctx.heap.incref_value(value);
                Value::Object(bm_id)
            } else {
                value
            };
            value::set_by_hash(Value::Object(inst_id), key_hash, bound_value, &mut ctx.heap, pos)?;
        }
    }

    let class_hash = hash_chars(&"_class".chars().collect::<Vec<_>>());
    value::set_by_hash(Value::Object(inst_id), class_hash, Value::Object(class_id), &mut ctx.heap, pos)?;

    let init_hash = hash_chars(&"_initialize".chars().collect::<Vec<_>>());
    if let Ok(init_fn) = value::get_by_hash(Value::Object(inst_id), init_hash, &ctx.heap, pos) {
        call_value(init_fn, args, ctx, pos)?;
    }

    Ok(Value::Object(inst_id))
}

// --- Control flow ---------------------------------------------------------

fn eval_for(ctx: &mut Context, var: &str, start: &Node, end: &Node, body: &Node, pos: &Position) -> EvalResult<Value> {
    let start_v = eval_node(ctx, start)?;
    let end_v = eval_node(ctx, end)?;
    let (Value::Int(_), Value::Int(end_n)) = (start_v, end_v) else {
        return Err(RaisedError::runtime("'for' loop bounds must be integers", pos).into());
    };
    let Value::Int(start_n) = start_v else { unreachable!() };

    ctx.set_value(var, Value::Int(start_n));
    loop {
        let current = match ctx.get_value(var) {
            Some(Value::Int(n)) => n,
            _ => return Err(RaisedError::runtime(format!("Loop variable '{var}' is no longer an integer"), pos).into()),
        };
        if current >= end_n {
            break;
        }
        match eval_node(ctx, body) {
            Ok(_) | Err(Signal::Continue) => {}
            Err(Signal::Break) => break,
            Err(other) => return Err(other),
        }
        // Re-read the counter after the body runs: a body that reassigns
        // the loop variable changes what the next comparison/increment
        // sees (`spec.md` §4.9).
        let after_body = match ctx.get_value(var) {
            Some(Value::Int(n)) => n,
            _ => return Err(RaisedError::runtime(format!("Loop variable '{var}' is no longer an integer"), pos).into()),
        };
        ctx.set_value(var, Value::Int(after_body.wrapping_add(1)));
    }
    Ok(Value::None)
}

enum IterItems {
    Values(Vec<Value>),
    Chars(Vec<char>),
}

fn collect_iterable(ctx: &Context, v: Value, pos: &Position) -> EvalResult<IterItems> {
    let Value::Object(id) = v else {
        return Err(RaisedError::runtime(format!("'{}' is not iterable", v.type_name(&ctx.heap)), pos).into());
    };
    match ctx.heap.get(id) {
        HeapData::List(l) => Ok(IterItems::Values(l.iter().copied().collect())),
        HeapData::Str(s) => Ok(IterItems::Chars(s.chars.to_vec())),
        HeapData::Map(m) | HeapData::Instance(m, _) => Ok(IterItems::Values(m.values().copied().collect())),
        other => Err(RaisedError::runtime(format!("'{}' is not iterable", other.type_name()), pos).into()),
    }
}

fn eval_foreach(ctx: &mut Context, var: &str, iter: &Node, body: &Node, pos: &Position) -> EvalResult<Value> {
    let iter_value = eval_node(ctx, iter)?;
    let items = collect_iterable(ctx, iter_value, pos)?;
    match items {
        IterItems::Values(values) => {
            for v in values {
                ctx.set_value(var, v);
                match eval_node(ctx, body) {
                    Ok(_) | Err(Signal::Continue) => {}
                    Err(Signal::Break) => break,
                    Err(other) => return Err(other),
                }
            }
        }
        IterItems::Chars(chars) => {
            for c in chars {
                let id = ctx.heap.allocate(HeapData::Str(EmString::new(vec![c])));
                ctx.set_value(var, Value::Object(id));
                match eval_node(ctx, body) {
                    Ok(_) | Err(Signal::Continue) => {}
                    Err(Signal::Break) => break,
                    Err(other) => return Err(other),
                }
            }
        }
    }
    Ok(Value::None)
}

fn eval_while(ctx: &mut Context, cond: &Node, body: &Node) -> EvalResult<Value> {
    loop {
        let c = eval_node(ctx, cond)?;
        if !value::is_true(c, &ctx.heap) {
            break;
        }
        match eval_node(ctx, body) {
            Ok(_) | Err(Signal::Continue) => {}
            Err(Signal::Break) => break,
            Err(other) => return Err(other),
        }
    }
    Ok(Value::None)
}

// --- Errors: raise, try/catch, include ------------------------------------

fn lookup_message(map: &EmMap, heap: &Heap) -> String {
    let h = hash_chars(&"_message".chars().collect::<Vec<_>>());
    match map.get(&h) {
        Some(Value::Object(id)) => match heap.get(*id) {
            HeapData::Str(s) => s.to_rust_string(),
            _ => String::new(),
        },
        _ => String::new(),
    }
}

/// `raise EXPR`. A string literal is auto-wrapped as a `RuntimeError` (the
/// open question `spec.md` §9 flags, resolved by §8 scenario 5's literal
/// `catch e = Error` / stdout expectation — a bare string could only match
/// that catch clause if it becomes a `RuntimeError` instance). A class
/// value raises that class with its name as the message; an instance
/// (typically one already caught and re-raised) carries its own
/// `_class`/`_message`.
fn build_raise(ctx: &Context, v: Value, pos: &Position) -> Signal {
    if let Some(class) = error_class_of_value(v, &ctx.heap) {
        let message = match class {
            ErrorClass::User(id) => match ctx.heap.get(id) {
                HeapData::Class(c) => c.name.to_string(),
                _ => class.name().to_owned(),
            },
            _ => class.name().to_owned(),
        };
        return Signal::Raised(RaisedError::new(class, message, Some(pos.clone())));
    }
    if let Value::Object(id) = v {
        match ctx.heap.get(id) {
            HeapData::Str(s) => return Signal::Raised(RaisedError::runtime(s.to_rust_string(), pos)),
            HeapData::Instance(map, class_id) => {
                let message = lookup_message(map, &ctx.heap);
                let class = error_class_of_value(Value::Object(*class_id), &ctx.heap).unwrap_or(ErrorClass::RuntimeError);
                let mut err = RaisedError::new(class, message, Some(pos.clone()));
                err.instance = Some(v);
                return Signal::Raised(err);
            }
            HeapData::Map(map) => {
                let message = lookup_message(map, &ctx.heap);
                if !message.is_empty() {
                    return Signal::Raised(RaisedError::new(ErrorClass::RuntimeError, message, Some(pos.clone())));
                }
            }
            _ => {}
        }
    }
    Signal::Raised(RaisedError::runtime("'raise' expects a class, an error instance, or a string", pos))
}

/// Build the `{_class, _message, _toString}` object a `catch` clause binds
/// its identifier to (`spec.md` §4.9/§7). `_toString` is simply aliased to
/// the same string as `_message`, since `to_string_via_map` already treats
/// a non-callable `_toString` entry as the rendered value directly.
fn build_caught_instance(ctx: &mut Context, err: &RaisedError, pos: &Position) -> EvalResult<Value> {
    let map_id = ctx.heap.allocate(HeapData::Map(EmMap::default()));

    let class_value = match err.instance {
        Some(Value::Object(id)) => match ctx.heap.get(id) {
            HeapData::Instance(_, class_id) => Value::Object(*class_id),
            _ => class_value_of(err.class),
        },
        _ => class_value_of(err.class),
    };

    let message_id = ctx.heap.allocate(HeapData::Str(EmString::from_str(&err.message)));

    let class_hash = hash_chars(&"_class".chars().collect::<Vec<_>>());
    let message_hash = hash_chars(&"_message".chars().collect::<Vec<_>>());
    let tostring_hash = hash_chars(&"_toString".chars().collect::<Vec<_>>());

    value::set_by_hash(Value::Object(map_id), class_hash, class_value, &mut ctx.heap, pos)?;
    value::set_by_hash(Value::Object(map_id), message_hash, Value::Object(message_id), &mut ctx.heap, pos)?;
    value::set_by_hash(Value::Object(map_id), tostring_hash, Value::Object(message_id), &mut ctx.heap, pos)?;

    Ok(Value::Object(map_id))
}

fn eval_try(
    ctx: &mut Context,
    try_block: &Node,
    catch_name: Option<&str>,
    catch_class: Option<&Node>,
    catch_block: &Node,
) -> EvalResult<Value> {
    // Locking prevents an object the try block is mid-traversal over (e.g.
    // the class base chain during an instantiation that raises partway
    // through) from being torn down before the catch clause runs
    // (`spec.md` §4.9, reusing the same lock/wait-list discipline
    // `heap.rs` already provides for exactly this situation).
    ctx.heap.lock();
    let result = eval_node(ctx, try_block);
    ctx.heap.unlock();

    let err = match result {
        Err(Signal::Raised(e)) => e,
        other => return other,
    };

    let matches = match catch_class {
        None => true,
        Some(class_expr) => {
            let class_value = eval_node(ctx, class_expr)?;
            match error_class_of_value(class_value, &ctx.heap) {
                Some(target) => err.class.inherits(target, &ctx.heap),
                None => false,
            }
        }
    };

    if !matches {
        return Err(Signal::Raised(err));
    }

    if let Some(name) = catch_name {
        let inst = build_caught_instance(ctx, &err, &catch_block.pos)?;
        ctx.set_value(name, inst);
    }
    eval_node(ctx, catch_block)
}

fn eval_include(ctx: &mut Context, expr: &Node, pos: &Position) -> EvalResult<Value> {
    let path_value = eval_node(ctx, expr)?;
    let path_str = match path_value {
        Value::Object(id) => match ctx.heap.get(id) {
            HeapData::Str(s) => s.to_rust_string(),
            _ => return Err(RaisedError::runtime("'include' expects a string path", pos).into()),
        },
        _ => return Err(RaisedError::runtime("'include' expects a string path", pos).into()),
    };

    let Some(abs_path) = ctx.resolve_include(&path_str, pos)? else {
        return Ok(Value::None); // already included; a no-op per spec.md's include-once semantics
    };

    let text =
        std::fs::read_to_string(&abs_path).map_err(|e| RaisedError::runtime(format!("Failed to read '{}': {e}", abs_path.display()), pos))?;
    let path_label = abs_path.to_string_lossy().into_owned();
    let tokens = crate::lexer::Lexer::new(path_label, text.clone()).tokenize()?;
    let program = crate::parser::Parser::new(tokens).parse_program()?;

    let dir = Context::dir_of(&abs_path);
    ctx.push_dir(dir, pos)?;
    let result = eval_node(ctx, &program);
    ctx.pop_dir();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn run(source: &str) -> Result<Value, RaisedError> {
        let mut interp = Interpreter::new(PathBuf::from("."), PathBuf::from("."), Vec::new());
        interp.run("test", source)
    }

    #[test]
    fn arithmetic_and_let() {
        let v = run("let x = 1 + 2 * 3\nx").unwrap();
        assert_eq!(v, Value::Int(7));
    }

    #[test]
    fn and_or_do_not_short_circuit_and_coerce_to_int() {
        let v = run("0 and 5").unwrap();
        assert_eq!(v, Value::Int(0));
        let v = run("1 or 0").unwrap();
        assert_eq!(v, Value::Int(1));
    }

    #[test]
    fn if_elif_else() {
        let v = run("if 0 then 1 elif 1 then 2 else 3 end").unwrap();
        assert_eq!(v, Value::Int(2));
    }

    #[test]
    fn while_loop_counts() {
        let v = run("let i = 0\nwhile i < 5 then let i = i + 1 end\ni").unwrap();
        assert_eq!(v, Value::Int(5));
    }

    #[test]
    fn for_loop_body_can_advance_counter() {
        // spec.md's for loop re-reads the counter from scope after the body,
        // so doubling it inside the body changes the next comparison.
        let v = run("let n = 0\nfor i = 0 to 10 then let n = n + 1\nlet i = i + 2 end\nn").unwrap();
        assert_eq!(v, Value::Int(4));
    }

    #[test]
    fn function_call_and_return() {
        let v = run("func add(a, b) then return a + b end\nadd(2, 3)").unwrap();
        assert_eq!(v, Value::Int(5));
    }

    #[test]
    fn function_without_return_yields_none() {
        let v = run("func nop() then let x = 1 end\nnop()").unwrap();
        assert_eq!(v, Value::None);
    }

    #[test]
    fn arity_mismatch_raises() {
        let err = run("func add(a, b) then return a + b end\nadd(1)").unwrap_err();
        assert_eq!(err.class, ErrorClass::RuntimeError);
    }

    #[test]
    fn class_instantiation_and_method_call() {
        let v = run(
            "class A then\nfunc _initialize(self, x) then let self.x = x end\nfunc get(self) then return self.x end\nend\nlet a = A(42)\na.get()",
        )
        .unwrap();
        assert_eq!(v, Value::Int(42));
    }

    #[test]
    fn try_catch_binds_message() {
        let v = run("try then raise \"boom\" catch e = Error then e end").unwrap();
        match v {
            Value::Object(_) => {}
            other => panic!("expected an object, got {other:?}"),
        }
    }

    #[test]
    fn uncaught_raise_propagates_as_error() {
        let err = run("raise \"boom\"").unwrap_err();
        assert_eq!(err.class, ErrorClass::RuntimeError);
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn break_stops_a_while_loop_early() {
        let v = run("let i = 0\nwhile 1 then let i = i + 1\nif i == 3 then break end end\ni").unwrap();
        assert_eq!(v, Value::Int(3));
    }

    #[test]
    fn foreach_over_list() {
        let v = run("let total = 0\nforeach x in [1, 2, 3] then let total = total + x end\ntotal").unwrap();
        assert_eq!(v, Value::Int(6));
    }
}
