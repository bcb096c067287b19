use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use monkey::compiler::{Bytecode, Compiler};
use monkey::diagnostic::{self, Diagnostic, ansi::AnsiRenderer};
use monkey::object::Object;
use monkey::session::{self, Session, SessionError, SessionOptions};
use monkey::vm::{self, VmOptions};

const PROMPT: &str = ">> ";

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("cannot write output: {0}")]
    Io(#[from] io::Error),
    #[error("cannot serialize program: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Emit {
    /// Parsed program as JSON
    Ast,
    /// Disassembled instructions and constant pool
    Bytecode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ErrorFormat {
    Ansi,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "monkey", version, about = "Compile and run Monkey programs on a bytecode VM")]
struct Cli {
    /// Script to run. Starts an interactive session when omitted.
    file: Option<PathBuf>,

    /// Run the given code instead of a file
    #[arg(short, long, conflicts_with = "file")]
    eval: Option<String>,

    /// Print an intermediate form instead of running
    #[arg(long, value_enum)]
    emit: Option<Emit>,

    /// Call depth at which recursion is aborted
    #[arg(long, default_value_t = vm::MAX_FRAMES)]
    max_frames: usize,

    /// Operand stack slots
    #[arg(long, default_value_t = vm::STACK_SIZE)]
    stack_size: usize,

    #[arg(long, value_enum, default_value_t = ErrorFormat::Ansi)]
    error_format: ErrorFormat,

    /// Disable colored diagnostics
    #[arg(long)]
    no_color: bool,
}

impl Cli {
    fn session_options(&self) -> SessionOptions {
        SessionOptions {
            vm: VmOptions { stack_size: self.stack_size, max_frames: self.max_frames },
        }
    }

    fn use_color(&self) -> bool {
        !self.no_color && io::stderr().is_terminal()
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("off")).init();
    let cli = Cli::parse();

    let source = match (&cli.eval, &cli.file) {
        (Some(code), _) => code.clone(),
        (None, Some(path)) => match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("error: cannot read {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        (None, None) => {
            return match repl(&cli) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("error: {}", e);
                    ExitCode::FAILURE
                }
            };
        }
    };

    let result = match cli.emit {
        Some(emit) => emit_program(&source, emit, &mut io::stdout().lock()),
        None => run_source(&source, cli.session_options()).map_err(CliError::from),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Session(e)) => {
            report(&cli, &e, &source);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_source(source: &str, options: SessionOptions) -> Result<(), SessionError> {
    let mut session = Session::with_options(options);
    let value = session.eval(source)?;
    if value != Object::Null {
        println!("{}", value);
    }
    Ok(())
}

fn emit_program(source: &str, emit: Emit, out: &mut impl Write) -> Result<(), CliError> {
    let program = session::parse(source)?;
    match emit {
        Emit::Ast => {
            serde_json::to_writer_pretty(&mut *out, &program)?;
            writeln!(out)?;
        }
        Emit::Bytecode => {
            let mut compiler = Compiler::new();
            compiler.compile(&program).map_err(SessionError::from)?;
            write!(out, "{}", render_bytecode(&compiler.bytecode()))?;
        }
    }
    out.flush()?;
    Ok(())
}

fn render_bytecode(bytecode: &Bytecode) -> String {
    let mut out = format!("== main ==\n{}", bytecode.instructions);
    for (i, constant) in bytecode.constants.iter().enumerate() {
        match constant {
            Object::CompiledFunction(func) => {
                out.push_str(&format!(
                    "== constant {}: function (params={}, locals={}) ==\n{}",
                    i, func.num_parameters, func.num_locals, func.instructions
                ));
            }
            other => out.push_str(&format!("== constant {}: {} {} ==\n", i, other.object_type(), other)),
        }
    }
    out
}

fn report(cli: &Cli, e: &SessionError, source: &str) {
    let diagnostics: Vec<Diagnostic> = diagnostic::from_session_error(e)
        .into_iter()
        .map(|d| d.with_source(source))
        .collect();
    match cli.error_format {
        ErrorFormat::Ansi => {
            let renderer = AnsiRenderer { use_color: cli.use_color() };
            for d in &diagnostics {
                eprint!("{}", renderer.render(d));
            }
        }
        ErrorFormat::Json => {
            for d in &diagnostics {
                eprintln!("{}", diagnostic::json::render(d));
            }
        }
    }
}

/// Read-eval-print loop over stdin. Each line is one unit; failures are
/// reported and the session carries on with its prior state.
fn repl(cli: &Cli) -> io::Result<()> {
    let mut session = Session::with_options(cli.session_options());
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut lines = stdin.lock().lines();

    loop {
        write!(stdout, "{}", PROMPT)?;
        stdout.flush()?;
        let Some(line) = lines.next().transpose()? else {
            writeln!(stdout)?;
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }
        match session.eval(&line) {
            Ok(value) => writeln!(stdout, "{}", value)?,
            Err(e) => report(cli, &e, &line),
        }
    }
}
