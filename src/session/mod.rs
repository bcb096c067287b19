use crate::ast::Program;
use crate::compiler::{Bytecode, CompileError, Compiler, SymbolTable, new_symbol_table};
use crate::lexer::{self, LexError};
use crate::object::Object;
use crate::parser::{self, ParseError};
use crate::vm::{self, Vm, VmError, VmOptions};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("{}", join_messages(.0))]
    Parse(Vec<ParseError>),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] VmError),
}

impl From<Vec<ParseError>> for SessionError {
    fn from(errors: Vec<ParseError>) -> Self {
        SessionError::Parse(errors)
    }
}

fn join_messages(errors: &[ParseError]) -> String {
    errors.iter().map(|e| e.message.as_str()).collect::<Vec<_>>().join("; ")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub vm: VmOptions,
}

/// State that carries over between successive units: the symbol table,
/// the constant pool and the globals array. Each `eval` compiles against a
/// copy of the first two and commits them only once compilation succeeds.
pub struct Session {
    symbol_table: SymbolTable,
    constants: Vec<Object>,
    globals: Vec<Object>,
    options: SessionOptions,
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Session::with_options(SessionOptions::default())
    }

    pub fn with_options(options: SessionOptions) -> Self {
        Session {
            symbol_table: new_symbol_table(),
            constants: Vec::new(),
            globals: vm::new_globals(),
            options,
        }
    }

    /// Lex, parse, compile and run one unit, returning the value of the last
    /// expression statement it evaluated.
    pub fn eval(&mut self, source: &str) -> Result<Object, SessionError> {
        let program = parse(source)?;
        self.run(&program)
    }

    /// Compile `program` against the session state and commit the result.
    /// On failure nothing is committed.
    pub fn compile(&mut self, program: &Program) -> Result<Bytecode, SessionError> {
        let mut compiler = Compiler::with_state(self.symbol_table.clone(), self.constants.clone());
        compiler.compile(program)?;
        let (symbol_table, bytecode) = compiler.into_state();
        log::debug!(
            "committing unit: {} globals defined, {} constants",
            symbol_table.num_definitions(),
            bytecode.constants.len()
        );
        self.symbol_table = symbol_table;
        self.constants = bytecode.constants.clone();
        Ok(bytecode)
    }

    pub fn run(&mut self, program: &Program) -> Result<Object, SessionError> {
        let bytecode = self.compile(program)?;
        let mut vm = Vm::with_options(bytecode, &mut self.globals, self.options.vm);
        match vm.run() {
            Ok(()) => Ok(vm.last_popped()),
            Err(e) => {
                // Globals written before the failure stay written.
                if e.is_fatal() {
                    log::error!("runtime failure: {}", e);
                } else {
                    log::warn!("runtime error: {}", e);
                }
                Err(e.into())
            }
        }
    }

    pub fn globals(&self) -> &[Object] {
        &self.globals
    }

    pub fn symbol_table(&self) -> &SymbolTable {
        &self.symbol_table
    }

    pub fn constants(&self) -> &[Object] {
        &self.constants
    }
}

/// Lex and parse one unit, attaching the source text for diagnostics.
pub fn parse(source: &str) -> Result<Program, SessionError> {
    let tokens = lexer::lex(source)?;
    let mut program = parser::parse(tokens)?;
    program.source = Some(source.to_string());
    Ok(program)
}
