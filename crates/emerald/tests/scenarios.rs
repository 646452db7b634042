//! End-to-end scenarios from `spec.md` §8, driven through the public
//! `Interpreter` entry point the way `ouros`'s `tests/session_manager_tests.rs`
//! drives the library through `SessionManager` rather than internal
//! functions. One `#[test]` per literal scenario, plus the named boundary
//! cases `spec.md` §8 calls out.

use emerald::diagnostics::ErrorClass;
use emerald::{Interpreter, Value};
use std::path::PathBuf;

/// Runs `source` with stdout captured into a shared buffer (rather than
/// `CollectStringPrint`, which would be consumed by-value and fight the
/// borrow the running `Interpreter` holds on its own output sink).
fn run(source: &str) -> (Result<Value, emerald::RaisedError>, String) {
    let mut interp = Interpreter::new(PathBuf::from("."), PathBuf::from("."), vec!["emerald".to_owned()]);
    let sink = std::rc::Rc::new(std::cell::RefCell::new(String::new()));
    interp.ctx.set_output(Box::new(SharedSink(sink.clone())));
    let result = interp.run("test", source);
    let text = sink.borrow().clone();
    (result, text)
}

struct SharedSink(std::rc::Rc<std::cell::RefCell<String>>);

impl emerald::io::PrintWriter for SharedSink {
    fn write_str(&mut self, s: &str) {
        self.0.borrow_mut().push_str(s);
    }
}

#[test]
fn scenario_1_arithmetic_precedence() {
    let (result, stdout) = run("puts 1 + 2 * 3\n");
    assert!(result.is_ok());
    assert_eq!(stdout, "7\n");
}

#[test]
fn scenario_2_for_loop_over_list_indices() {
    let (result, stdout) = run("let xs = [1,2,3]\nfor i = 0 to lengthOf(xs) then\n  puts xs[i]\nend\n");
    assert!(result.is_ok());
    assert_eq!(stdout, "1\n2\n3\n");
}

#[test]
fn scenario_3_recursive_factorial() {
    let (result, stdout) = run(
        "func fact(n) then\n  if n <= 1 then return 1 end\n  return n * fact(n - 1)\nend\nputs fact(6)\n",
    );
    assert!(result.is_ok());
    assert_eq!(stdout, "720\n");
}

#[test]
fn scenario_4_class_with_initialize_and_method() {
    let (result, stdout) = run(
        "class A then\n  func _initialize(self, x) then let self.x = x end\n  func get(self) then return self.x end\nend\nlet a = A(42)\nputs a.get()\n",
    );
    assert!(result.is_ok());
    assert_eq!(stdout, "42\n");
}

#[test]
fn scenario_5_raise_string_caught_as_error() {
    let (result, stdout) = run("try then raise \"boom\" catch e = Error then puts e end\n");
    assert!(result.is_ok());
    assert_eq!(stdout, "boom\n");
}

#[test]
fn scenario_6_foreach_over_string_rebuilds_it() {
    let (result, stdout) = run("let s = \"\"\nforeach c in \"abc\" then let s = s + c end\nputs s\n");
    assert!(result.is_ok());
    assert_eq!(stdout, "abc\n");
}

#[test]
fn boundary_string_repeat_zero_is_empty() {
    let (result, stdout) = run("puts \"ab\" * 0\n");
    assert!(result.is_ok());
    assert_eq!(stdout, "\n");
}

#[test]
fn boundary_string_repeat_at_limit_raises() {
    let (result, _) = run("puts \"a\" * 1024\n");
    let err = result.unwrap_err();
    assert_eq!(err.class, ErrorClass::RuntimeError);
}

#[test]
fn boundary_negative_list_index_addresses_from_the_end() {
    let (result, stdout) = run("let xs = [10, 20, 30]\nputs xs[-1]\n");
    assert!(result.is_ok());
    assert_eq!(stdout, "30\n");
}

#[test]
fn boundary_negative_list_index_past_start_raises() {
    let (result, _) = run("let xs = [10, 20, 30]\nputs xs[-4]\n");
    let err = result.unwrap_err();
    assert_eq!(err.class, ErrorClass::RuntimeError);
}

#[test]
fn boundary_for_loop_with_equal_bounds_runs_zero_times() {
    let (result, stdout) = run("for i = 5 to 5 then puts i end\n");
    assert!(result.is_ok());
    assert_eq!(stdout, "");
}

#[test]
fn boundary_too_few_arguments_raises() {
    let (result, _) = run("func f(x, y) then end\nf(1)\n");
    let err = result.unwrap_err();
    assert_eq!(err.class, ErrorClass::RuntimeError);
    assert!(err.message.contains("Too few"));
}

#[test]
fn boundary_too_many_arguments_raises() {
    let (result, _) = run("func f(x, y) then end\nf(1, 2, 3)\n");
    let err = result.unwrap_err();
    assert_eq!(err.class, ErrorClass::RuntimeError);
    assert!(err.message.contains("Too many"));
}

#[test]
fn map_round_trip_preserves_inserted_value() {
    let (result, stdout) = run("let m = {\"a\": 1}\nlet m[\"a\"] = 2\nputs m[\"a\"]\n");
    assert!(result.is_ok());
    assert_eq!(stdout, "2\n");
}

#[test]
fn exception_subclass_matches_base_catch_clause() {
    let (result, stdout) = run(
        "class Base then end\nclass Derived of Base then end\ntry then raise Derived catch e = Base then puts \"caught\" end\n",
    );
    assert!(result.is_ok());
    assert_eq!(stdout, "caught\n");
}

#[test]
fn uncaught_system_exit_propagates_with_its_code() {
    let (result, _) = run("exit(7)\n");
    let err = result.unwrap_err();
    assert_eq!(err.class, ErrorClass::SystemExit);
    assert_eq!(err.exit_code, Some(7));
}
