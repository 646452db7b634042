//! `emerald [options] [filename] [script args...]`: run a script file, or
//! drop into a line-at-a-time REPL on stdin when no filename is given.
//!
//! `spec.md` §6 scopes the shell itself out of the core as an external
//! collaborator; this binary is that collaborator, built on the same
//! parse-then-run/REPL split as `ouros-cli`'s `main.rs`, but reaching for
//! `clap` where `ouros-cli` hand-parses `env::args()`, since emerald's
//! flag surface is wide enough to want derive-based parsing and `--help`
//! generation.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use emerald::diagnostics::ErrorClass;
use emerald::Interpreter;

/// A small, dynamically typed, imperative scripting language.
#[derive(Parser, Debug)]
#[command(name = "emerald", version, about, disable_help_subcommand = true)]
struct Args {
    /// Lower the diagnostic filter to info.
    #[arg(long = "log-info", short = 'i', visible_alias = "li")]
    log_info: bool,

    /// Lower the diagnostic filter to warning.
    #[arg(long = "log-warning", short = 'w', visible_alias = "lw")]
    log_warning: bool,

    /// Lower the diagnostic filter to fatal only.
    #[arg(long = "log-fatal", visible_alias = "lf")]
    log_fatal: bool,

    /// Skip freeing live heap objects at exit (debug hook; a no-op here,
    /// since the process allocator reclaims everything anyway).
    #[arg(long = "no-exit-free")]
    no_exit_free: bool,

    /// Don't report live object counts at exit.
    #[arg(long = "no-print-allocs")]
    no_print_allocs: bool,

    /// Log every heap allocation and free as it happens.
    #[arg(long = "print-alloc-traffic")]
    print_alloc_traffic: bool,

    /// Script to run; omit for an interactive REPL.
    filename: Option<String>,

    /// Arguments passed through to the script as `site.argv`.
    #[arg(trailing_var_arg = true)]
    script_args: Vec<String>,
}

fn init_logging(args: &Args) {
    let level = if args.log_info {
        log::LevelFilter::Info
    } else if args.log_warning {
        log::LevelFilter::Warn
    } else if args.log_fatal {
        log::LevelFilter::Error
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::new().filter_level(level).format_timestamp(None).init();
}

fn stdlib_dir() -> PathBuf {
    std::env::var_os("EMERALD_STDLIB_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let stdlib = stdlib_dir();

    match &args.filename {
        Some(path) => run_file(path, &args, cwd, stdlib),
        None => run_repl(&args, cwd, stdlib),
    }
}

fn run_file(path: &str, args: &Args, cwd: PathBuf, stdlib: PathBuf) -> ExitCode {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("emerald: could not read '{path}': {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut argv = vec![path.to_owned()];
    argv.extend(args.script_args.iter().cloned());

    let mut interp = Interpreter::new(cwd, stdlib, argv);
    interp.ctx.heap.set_trace(args.print_alloc_traffic);
    match interp.run(path, &source) {
        Ok(_) => {
            report_allocs(&interp, args);
            ExitCode::SUCCESS
        }
        Err(err) if err.class == ErrorClass::SystemExit => {
            report_allocs(&interp, args);
            let code = err.exit_code.unwrap_or(0);
            #[allow(clippy::cast_sign_loss)]
            ExitCode::from(code as u8)
        }
        Err(err) => {
            eprintln!("{}", err.render());
            report_allocs(&interp, args);
            ExitCode::FAILURE
        }
    }
}

fn report_allocs(interp: &Interpreter, args: &Args) {
    if !args.no_print_allocs {
        log::info!("{} object(s) still live at exit", interp.ctx.heap.live_object_count());
    }
}

fn run_repl(args: &Args, cwd: PathBuf, stdlib: PathBuf) -> ExitCode {
    let mut interp = Interpreter::new(cwd, stdlib, vec!["emerald".to_owned()]);
    interp.ctx.heap.set_trace(args.print_alloc_traffic);
    let mut rl = rustyline::DefaultEditor::new().expect("failed to initialize line editor");

    loop {
        match rl.readline(">>> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line.as_str());
                match interp.run("<stdin>", &line) {
                    Ok(emerald::Value::None) => {}
                    Ok(v) => {
                        if let Ok(chars) = emerald::eval::value_to_chars(v, &mut interp.ctx, &dummy_pos()) {
                            println!("{}", chars.into_iter().collect::<String>());
                        }
                    }
                    Err(err) if err.class == ErrorClass::SystemExit => {
                        let code = err.exit_code.unwrap_or(0);
                        #[allow(clippy::cast_sign_loss)]
                        return ExitCode::from(code as u8);
                    }
                    Err(err) => eprintln!("{}", err.render()),
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted | rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("emerald: {e}");
                break;
            }
        }
    }
    ExitCode::SUCCESS
}

fn dummy_pos() -> emerald::position::Position {
    emerald::position::Position::new("<stdin>", "")
}
