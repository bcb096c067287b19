use std::rc::Rc;

use crate::ast::*;
use crate::code::{Instructions, Opcode, OperandError};
use crate::object::{BUILTINS, CompiledFunction, Object};

pub mod symbol_table;
pub use symbol_table::{GLOBALS_SIZE, Symbol, SymbolScope, SymbolTable};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("undefined variable: {name}")]
    UndefinedVariable { name: String, span: Span },
    #[error("return statement outside of a function")]
    ReturnOutsideFunction,
    #[error("too many global bindings (limit {limit})")]
    TooManyGlobals { limit: usize },
    #[error("too many constants (limit {limit})")]
    TooManyConstants { limit: usize },
    #[error(transparent)]
    Operand(#[from] OperandError),
}

type Result<T> = std::result::Result<T, CompileError>;

/// Largest constant index a `OpConstant`/`OpClosure` operand can address.
const MAX_CONSTANTS: usize = u16::MAX as usize + 1;

/// Placeholder jump target, overwritten once the real target is known.
const UNPATCHED: usize = 9999;

/// The compiled form of one unit: a flat instruction stream plus its constant pool.
#[derive(Debug, Clone, PartialEq)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Vec<Object>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EmittedInstruction {
    opcode: Opcode,
    position: usize,
}

/// Instruction buffer for one function body (or the top level) while it is
/// being compiled, plus the two most recent emissions so trailing `OpPop`s
/// can be rewritten.
#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Instructions,
    last_instruction: Option<EmittedInstruction>,
    previous_instruction: Option<EmittedInstruction>,
}

pub struct Compiler {
    constants: Vec<Object>,
    symbol_table: SymbolTable,
    scopes: Vec<CompilationScope>,
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}

impl Compiler {
    /// A compiler for a fresh session, with every builtin pre-registered.
    pub fn new() -> Self {
        Compiler::with_state(new_symbol_table(), Vec::new())
    }

    /// Resume a session: later units see earlier globals and append to the
    /// same constant pool.
    pub fn with_state(symbol_table: SymbolTable, constants: Vec<Object>) -> Self {
        Compiler {
            constants,
            symbol_table,
            scopes: vec![CompilationScope::default()],
        }
    }

    pub fn bytecode(&self) -> Bytecode {
        Bytecode {
            instructions: self.current_scope().instructions.clone(),
            constants: self.constants.clone(),
        }
    }

    /// Consume the compiler, handing back the session state it was built on.
    pub fn into_state(self) -> (SymbolTable, Bytecode) {
        let Compiler { constants, symbol_table, mut scopes } = self;
        let instructions = scopes.pop().map(|s| s.instructions).unwrap_or_default();
        (symbol_table, Bytecode { instructions, constants })
    }

    pub fn compile(&mut self, program: &Program) -> Result<()> {
        for stmt in &program.statements {
            self.compile_statement(stmt)?;
        }
        log::debug!(
            "compiled {} statement(s): {} instruction bytes, {} constants",
            program.statements.len(),
            self.current_scope().instructions.len(),
            self.constants.len()
        );
        Ok(())
    }

    // ---- Scope management ----

    fn current_scope(&self) -> &CompilationScope {
        // The top-level scope is never popped.
        &self.scopes[self.scopes.len() - 1]
    }

    fn current_scope_mut(&mut self) -> &mut CompilationScope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
        let outer = std::mem::take(&mut self.symbol_table);
        self.symbol_table = SymbolTable::new_enclosed(outer);
    }

    fn leave_scope(&mut self) -> Instructions {
        let scope = self.scopes.pop().unwrap_or_default();
        if let Some(outer) = self.symbol_table.take_outer() {
            self.symbol_table = outer;
        }
        scope.instructions
    }

    fn in_function(&self) -> bool {
        self.scopes.len() > 1
    }

    // ---- Emission ----

    fn emit(&mut self, op: Opcode, operands: &[usize]) -> Result<usize> {
        let scope = self.current_scope_mut();
        let position = scope.instructions.emit(op, operands)?;
        scope.previous_instruction = scope.last_instruction;
        scope.last_instruction = Some(EmittedInstruction { opcode: op, position });
        Ok(position)
    }

    fn add_constant(&mut self, obj: Object) -> Result<usize> {
        if self.constants.len() >= MAX_CONSTANTS {
            return Err(CompileError::TooManyConstants { limit: MAX_CONSTANTS });
        }
        self.constants.push(obj);
        Ok(self.constants.len() - 1)
    }

    fn last_instruction_is(&self, op: Opcode) -> bool {
        self.current_scope().last_instruction.is_some_and(|last| last.opcode == op)
    }

    fn remove_last_pop(&mut self) {
        let scope = self.current_scope_mut();
        if let Some(last) = scope.last_instruction {
            scope.instructions.truncate(last.position);
            scope.last_instruction = scope.previous_instruction;
        }
    }

    fn replace_last_pop_with_return(&mut self) -> Result<()> {
        let scope = self.current_scope_mut();
        if let Some(last) = scope.last_instruction.as_mut() {
            scope.instructions.replace(last.position, Opcode::ReturnValue, &[])?;
            last.opcode = Opcode::ReturnValue;
        }
        Ok(())
    }

    /// Point the jump emitted at `position` at the current end of the stream.
    fn patch_jump(&mut self, position: usize, op: Opcode) -> Result<()> {
        let scope = self.current_scope_mut();
        let target = scope.instructions.len();
        scope.instructions.replace(position, op, &[target])?;
        Ok(())
    }

    fn load_symbol(&mut self, symbol: &Symbol) -> Result<usize> {
        match symbol.scope {
            SymbolScope::Global => self.emit(Opcode::GetGlobal, &[symbol.index]),
            SymbolScope::Local => self.emit(Opcode::GetLocal, &[symbol.index]),
            SymbolScope::Builtin => self.emit(Opcode::GetBuiltin, &[symbol.index]),
            SymbolScope::Free => self.emit(Opcode::GetFree, &[symbol.index]),
            SymbolScope::Function => self.emit(Opcode::CurrentClosure, &[]),
        }
    }

    // ---- Statements ----

    fn compile_statement(&mut self, stmt: &Statement) -> Result<()> {
        match stmt {
            Statement::Expression(expr) => {
                self.compile_expression(expr)?;
                self.emit(Opcode::Pop, &[])?;
            }

            Statement::Let { name, value } => {
                let symbol = match value {
                    Expression::Function(func) => {
                        let symbol = self.symbol_table.define(&name.name)?;
                        self.compile_function(func, Some(&name.name))?;
                        symbol
                    }
                    _ => {
                        self.compile_expression(value)?;
                        self.symbol_table.define(&name.name)?
                    }
                };
                match symbol.scope {
                    SymbolScope::Global => self.emit(Opcode::SetGlobal, &[symbol.index])?,
                    _ => self.emit(Opcode::SetLocal, &[symbol.index])?,
                };
            }

            Statement::Return(value) => {
                if !self.in_function() {
                    return Err(CompileError::ReturnOutsideFunction);
                }
                match value {
                    Some(expr) => {
                        self.compile_expression(expr)?;
                        self.emit(Opcode::ReturnValue, &[])?;
                    }
                    None => {
                        self.emit(Opcode::Return, &[])?;
                    }
                }
            }
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &BlockStatement) -> Result<()> {
        for stmt in &block.statements {
            self.compile_statement(stmt)?;
        }
        Ok(())
    }

    /// Compile a conditional branch so it leaves exactly one value: the last
    /// expression statement's value, or null when there is none.
    fn compile_branch(&mut self, block: &BlockStatement) -> Result<()> {
        let start = self.current_scope().instructions.len();
        self.compile_block(block)?;
        let ends_in_pop = self.current_scope().instructions.len() > start && self.last_instruction_is(Opcode::Pop);
        if ends_in_pop {
            self.remove_last_pop();
        } else {
            self.emit(Opcode::Null, &[])?;
        }
        Ok(())
    }

    // ---- Expressions ----

    fn compile_expression(&mut self, expr: &Expression) -> Result<()> {
        match expr {
            Expression::Integer(n) => {
                let idx = self.add_constant(Object::Integer(*n))?;
                self.emit(Opcode::Constant, &[idx])?;
            }

            Expression::String(s) => {
                let idx = self.add_constant(Object::string(s))?;
                self.emit(Opcode::Constant, &[idx])?;
            }

            Expression::Boolean(true) => {
                self.emit(Opcode::True, &[])?;
            }

            Expression::Boolean(false) => {
                self.emit(Opcode::False, &[])?;
            }

            Expression::Null => {
                self.emit(Opcode::Null, &[])?;
            }

            Expression::Identifier(ident) => {
                let symbol = self.symbol_table.resolve(&ident.name).ok_or_else(|| {
                    CompileError::UndefinedVariable { name: ident.name.clone(), span: ident.span }
                })?;
                self.load_symbol(&symbol)?;
            }

            Expression::Prefix { operator, right } => {
                self.compile_expression(right)?;
                let op = match operator {
                    PrefixOp::Not => Opcode::Bang,
                    PrefixOp::Negate => Opcode::Minus,
                };
                self.emit(op, &[])?;
            }

            Expression::Infix { left, operator, right } => {
                // `a < b` is compiled as `b > a`.
                if *operator == InfixOp::LessThan {
                    self.compile_expression(right)?;
                    self.compile_expression(left)?;
                    self.emit(Opcode::GreaterThan, &[])?;
                    return Ok(());
                }
                self.compile_expression(left)?;
                self.compile_expression(right)?;
                let op = match operator {
                    InfixOp::Add => Opcode::Add,
                    InfixOp::Subtract => Opcode::Sub,
                    InfixOp::Multiply => Opcode::Mul,
                    InfixOp::Divide => Opcode::Div,
                    InfixOp::Equals => Opcode::Equal,
                    InfixOp::NotEquals => Opcode::NotEqual,
                    InfixOp::GreaterThan | InfixOp::LessThan => Opcode::GreaterThan,
                };
                self.emit(op, &[])?;
            }

            Expression::If { condition, consequence, alternative } => {
                self.compile_expression(condition)?;
                let jump_not_truthy = self.emit(Opcode::JumpNotTruthy, &[UNPATCHED])?;

                self.compile_branch(consequence)?;
                let jump = self.emit(Opcode::Jump, &[UNPATCHED])?;
                self.patch_jump(jump_not_truthy, Opcode::JumpNotTruthy)?;

                match alternative {
                    Some(alt) => self.compile_branch(alt)?,
                    None => {
                        self.emit(Opcode::Null, &[])?;
                    }
                }
                self.patch_jump(jump, Opcode::Jump)?;
            }

            Expression::Function(func) => {
                self.compile_function(func, None)?;
            }

            Expression::Call { function, arguments } => {
                self.compile_expression(function)?;
                for arg in arguments {
                    self.compile_expression(arg)?;
                }
                self.emit(Opcode::Call, &[arguments.len()])?;
            }

            Expression::Array(elements) => {
                for element in elements {
                    self.compile_expression(element)?;
                }
                self.emit(Opcode::Array, &[elements.len()])?;
            }

            Expression::Hash(pairs) => {
                // Canonical key order keeps identical literals byte-identical.
                let mut sorted: Vec<(String, &Expression, &Expression)> =
                    pairs.iter().map(|(k, v)| (k.to_string(), k, v)).collect();
                sorted.sort_by(|a, b| a.0.cmp(&b.0));
                for (_, key, value) in &sorted {
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                }
                self.emit(Opcode::Hash, &[pairs.len()])?;
            }

            Expression::Index { left, index } => {
                self.compile_expression(left)?;
                self.compile_expression(index)?;
                self.emit(Opcode::Index, &[])?;
            }
        }
        Ok(())
    }

    /// Compile a function literal into a `CompiledFunction` constant and emit
    /// the `OpClosure` that instantiates it. `name` is the `let` binding the
    /// literal is assigned to, which the body may use to call itself.
    fn compile_function(&mut self, func: &FunctionLiteral, name: Option<&str>) -> Result<()> {
        self.enter_scope();
        let body = self.compile_function_body(func, name);
        let free_symbols = self.symbol_table.free_symbols().to_vec();
        let num_locals = self.symbol_table.num_definitions();
        let instructions = self.leave_scope();
        body?;

        for symbol in &free_symbols {
            self.load_symbol(symbol)?;
        }

        let compiled = CompiledFunction {
            instructions,
            num_locals,
            num_parameters: func.parameters.len(),
        };
        log::debug!(
            "compiled function {}: {} params, {} locals, {} free",
            name.unwrap_or("<anonymous>"),
            compiled.num_parameters,
            compiled.num_locals,
            free_symbols.len()
        );
        let idx = self.add_constant(Object::CompiledFunction(Rc::new(compiled)))?;
        self.emit(Opcode::Closure, &[idx, free_symbols.len()])?;
        Ok(())
    }

    fn compile_function_body(&mut self, func: &FunctionLiteral, name: Option<&str>) -> Result<()> {
        if let Some(name) = name {
            self.symbol_table.define_function_name(name);
        }
        for param in &func.parameters {
            self.symbol_table.define(&param.name)?;
        }

        self.compile_block(&func.body)?;

        if self.last_instruction_is(Opcode::Pop) {
            self.replace_last_pop_with_return()?;
        }
        if !self.last_instruction_is(Opcode::ReturnValue) && !self.last_instruction_is(Opcode::Return) {
            self.emit(Opcode::Return, &[])?;
        }
        Ok(())
    }
}

/// A top-level symbol table with the builtin registry pre-registered in
/// `BUILTINS` order.
pub fn new_symbol_table() -> SymbolTable {
    let mut table = SymbolTable::new();
    for (i, builtin) in BUILTINS.iter().enumerate() {
        table.define_builtin(i, builtin.name);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::make;
    use crate::lexer;
    use crate::parser;

    fn parse_program(source: &str) -> Program {
        parser::parse(lexer::lex(source).unwrap()).unwrap()
    }

    fn compile_source(source: &str) -> Bytecode {
        let mut compiler = Compiler::new();
        compiler.compile(&parse_program(source)).unwrap();
        compiler.bytecode()
    }

    fn ins(parts: &[(Opcode, &[usize])]) -> Instructions {
        Instructions::concat(parts.iter().map(|(op, operands)| Instructions::from(make(*op, operands).unwrap())))
    }

    fn function(parts: &[(Opcode, &[usize])], num_locals: usize, num_parameters: usize) -> Object {
        Object::CompiledFunction(Rc::new(CompiledFunction {
            instructions: ins(parts),
            num_locals,
            num_parameters,
        }))
    }

    fn assert_instructions(bytecode: &Bytecode, expected: &[(Opcode, &[usize])]) {
        let expected = ins(expected);
        assert_eq!(
            bytecode.instructions, expected,
            "\nwant:\n{}\ngot:\n{}",
            expected, bytecode.instructions
        );
    }

    #[test]
    fn integer_arithmetic() {
        let bc = compile_source("1 + 2");
        assert_eq!(bc.constants, vec![Object::Integer(1), Object::Integer(2)]);
        assert_instructions(&bc, &[
            (Opcode::Constant, &[0]),
            (Opcode::Constant, &[1]),
            (Opcode::Add, &[]),
            (Opcode::Pop, &[]),
        ]);

        let bc = compile_source("1; 2");
        assert_instructions(&bc, &[
            (Opcode::Constant, &[0]),
            (Opcode::Pop, &[]),
            (Opcode::Constant, &[1]),
            (Opcode::Pop, &[]),
        ]);

        let bc = compile_source("-1");
        assert_instructions(&bc, &[(Opcode::Constant, &[0]), (Opcode::Minus, &[]), (Opcode::Pop, &[])]);
    }

    #[test]
    fn less_than_swaps_operands() {
        let bc = compile_source("1 < 2");
        assert_eq!(bc.constants, vec![Object::Integer(2), Object::Integer(1)]);
        assert_instructions(&bc, &[
            (Opcode::Constant, &[0]),
            (Opcode::Constant, &[1]),
            (Opcode::GreaterThan, &[]),
            (Opcode::Pop, &[]),
        ]);
    }

    #[test]
    fn boolean_and_null_literals() {
        let bc = compile_source("true == !false; null");
        assert!(bc.constants.is_empty());
        assert_instructions(&bc, &[
            (Opcode::True, &[]),
            (Opcode::False, &[]),
            (Opcode::Bang, &[]),
            (Opcode::Equal, &[]),
            (Opcode::Pop, &[]),
            (Opcode::Null, &[]),
            (Opcode::Pop, &[]),
        ]);
    }

    #[test]
    fn conditional_without_alternative_yields_null() {
        let bc = compile_source("if (true) { 10 }; 3333;");
        assert_instructions(&bc, &[
            (Opcode::True, &[]), // 0000
            (Opcode::JumpNotTruthy, &[10]), // 0001
            (Opcode::Constant, &[0]), // 0004
            (Opcode::Jump, &[11]), // 0007
            (Opcode::Null, &[]), // 0010
            (Opcode::Pop, &[]), // 0011
            (Opcode::Constant, &[1]), // 0012
            (Opcode::Pop, &[]), // 0015
        ]);
    }

    #[test]
    fn conditional_with_alternative() {
        let bc = compile_source("if (true) { 10 } else { 20 }; 3333;");
        assert_instructions(&bc, &[
            (Opcode::True, &[]), // 0000
            (Opcode::JumpNotTruthy, &[10]), // 0001
            (Opcode::Constant, &[0]), // 0004
            (Opcode::Jump, &[13]), // 0007
            (Opcode::Constant, &[1]), // 0010
            (Opcode::Pop, &[]), // 0013
            (Opcode::Constant, &[2]), // 0014
            (Opcode::Pop, &[]), // 0017
        ]);
    }

    #[test]
    fn branch_ending_in_let_yields_null() {
        let bc = compile_source("if (true) { let a = 1; }");
        assert_instructions(&bc, &[
            (Opcode::True, &[]), // 0000
            (Opcode::JumpNotTruthy, &[14]), // 0001
            (Opcode::Constant, &[0]), // 0004
            (Opcode::SetGlobal, &[0]), // 0007
            (Opcode::Null, &[]), // 0010
            (Opcode::Jump, &[15]), // 0011
            (Opcode::Null, &[]), // 0014
            (Opcode::Pop, &[]), // 0015
        ]);
    }

    #[test]
    fn global_let_statements() {
        let bc = compile_source("let one = 1; let two = one; two;");
        assert_instructions(&bc, &[
            (Opcode::Constant, &[0]),
            (Opcode::SetGlobal, &[0]),
            (Opcode::GetGlobal, &[0]),
            (Opcode::SetGlobal, &[1]),
            (Opcode::GetGlobal, &[1]),
            (Opcode::Pop, &[]),
        ]);
    }

    #[test]
    fn let_initializer_cannot_see_its_own_name() {
        let mut compiler = Compiler::new();
        let err = compiler.compile(&parse_program("let x = x;")).unwrap_err();
        assert!(matches!(err, CompileError::UndefinedVariable { ref name, .. } if name == "x"));
    }

    #[test]
    fn undefined_variable_carries_span() {
        let mut compiler = Compiler::new();
        let err = compiler.compile(&parse_program("let a = 1;\nfoo + a")).unwrap_err();
        assert_eq!(
            err,
            CompileError::UndefinedVariable { name: "foo".to_string(), span: Span { start: 11, end: 14 } }
        );
    }

    #[test]
    fn top_level_return_is_rejected() {
        let mut compiler = Compiler::new();
        assert_eq!(
            compiler.compile(&parse_program("return 1;")),
            Err(CompileError::ReturnOutsideFunction)
        );
    }

    #[test]
    fn string_constants_and_concatenation() {
        let bc = compile_source(r#""mon" + "key""#);
        assert_eq!(bc.constants, vec![Object::string("mon"), Object::string("key")]);
        assert_instructions(&bc, &[
            (Opcode::Constant, &[0]),
            (Opcode::Constant, &[1]),
            (Opcode::Add, &[]),
            (Opcode::Pop, &[]),
        ]);
    }

    #[test]
    fn array_literals() {
        let bc = compile_source("[1 + 2, 3]");
        assert_instructions(&bc, &[
            (Opcode::Constant, &[0]),
            (Opcode::Constant, &[1]),
            (Opcode::Add, &[]),
            (Opcode::Constant, &[2]),
            (Opcode::Array, &[2]),
            (Opcode::Pop, &[]),
        ]);
    }

    #[test]
    fn hash_literals_compile_in_canonical_key_order() {
        let bc = compile_source(r#"{"b": 2, "a": 1}"#);
        assert_eq!(
            bc.constants,
            vec![Object::string("a"), Object::Integer(1), Object::string("b"), Object::Integer(2)]
        );
        assert_instructions(&bc, &[
            (Opcode::Constant, &[0]),
            (Opcode::Constant, &[1]),
            (Opcode::Constant, &[2]),
            (Opcode::Constant, &[3]),
            (Opcode::Hash, &[2]),
            (Opcode::Pop, &[]),
        ]);

        assert_eq!(compile_source("{2: 0, 1: 0}").instructions, compile_source("{1: 0, 2: 0}").instructions);
        assert_instructions(&compile_source("{}"), &[(Opcode::Hash, &[0]), (Opcode::Pop, &[])]);
    }

    #[test]
    fn index_expressions() {
        let bc = compile_source("[1][0]");
        assert_instructions(&bc, &[
            (Opcode::Constant, &[0]),
            (Opcode::Array, &[1]),
            (Opcode::Constant, &[1]),
            (Opcode::Index, &[]),
            (Opcode::Pop, &[]),
        ]);
    }

    #[test]
    fn functions_return_last_expression() {
        let bc = compile_source("fn() { 5 + 10 }");
        assert_eq!(
            bc.constants[2],
            function(&[
                (Opcode::Constant, &[0]),
                (Opcode::Constant, &[1]),
                (Opcode::Add, &[]),
                (Opcode::ReturnValue, &[]),
            ], 0, 0)
        );
        assert_instructions(&bc, &[(Opcode::Closure, &[2, 0]), (Opcode::Pop, &[])]);

        // Explicit and implicit returns compile identically.
        assert_eq!(compile_source("fn() { return 5 + 10 }").constants, bc.constants);
    }

    #[test]
    fn functions_without_value_return_empty() {
        let bc = compile_source("fn() { }");
        assert_eq!(bc.constants[0], function(&[(Opcode::Return, &[])], 0, 0));

        let bc = compile_source("fn() { let a = 1; }");
        assert_eq!(
            bc.constants[1],
            function(&[(Opcode::Constant, &[0]), (Opcode::SetLocal, &[0]), (Opcode::Return, &[])], 1, 0)
        );
    }

    #[test]
    fn locals_and_parameters() {
        let bc = compile_source("let num = 55; fn(a, b) { let c = a; num; c + b }");
        assert_eq!(
            bc.constants[1],
            function(&[
                (Opcode::GetLocal, &[0]),
                (Opcode::SetLocal, &[2]),
                (Opcode::GetGlobal, &[0]),
                (Opcode::Pop, &[]),
                (Opcode::GetLocal, &[2]),
                (Opcode::GetLocal, &[1]),
                (Opcode::Add, &[]),
                (Opcode::ReturnValue, &[]),
            ], 3, 2)
        );
    }

    #[test]
    fn calls_compile_arguments_left_to_right() {
        let bc = compile_source("let f = fn(a, b) { a }; f(24, 25);");
        assert_instructions(&bc, &[
            (Opcode::Closure, &[0, 0]),
            (Opcode::SetGlobal, &[0]),
            (Opcode::GetGlobal, &[0]),
            (Opcode::Constant, &[1]),
            (Opcode::Constant, &[2]),
            (Opcode::Call, &[2]),
            (Opcode::Pop, &[]),
        ]);
    }

    #[test]
    fn builtins_resolve_by_registry_index() {
        let bc = compile_source("len([]); push([], 1);");
        assert_instructions(&bc, &[
            (Opcode::GetBuiltin, &[0]),
            (Opcode::Array, &[0]),
            (Opcode::Call, &[1]),
            (Opcode::Pop, &[]),
            (Opcode::GetBuiltin, &[5]),
            (Opcode::Array, &[0]),
            (Opcode::Constant, &[0]),
            (Opcode::Call, &[2]),
            (Opcode::Pop, &[]),
        ]);

        let bc = compile_source("fn() { len([]) }");
        assert_eq!(
            bc.constants[0],
            function(&[
                (Opcode::GetBuiltin, &[0]),
                (Opcode::Array, &[0]),
                (Opcode::Call, &[1]),
                (Opcode::ReturnValue, &[]),
            ], 0, 0)
        );
    }

    #[test]
    fn closures_load_free_values_in_enclosing_scope() {
        let bc = compile_source("fn(a) { fn(b) { a + b } }");
        assert_eq!(
            bc.constants[0],
            function(&[
                (Opcode::GetFree, &[0]),
                (Opcode::GetLocal, &[0]),
                (Opcode::Add, &[]),
                (Opcode::ReturnValue, &[]),
            ], 1, 1)
        );
        assert_eq!(
            bc.constants[1],
            function(&[
                (Opcode::GetLocal, &[0]),
                (Opcode::Closure, &[0, 1]),
                (Opcode::ReturnValue, &[]),
            ], 1, 1)
        );
    }

    #[test]
    fn nested_capture_passes_through_intermediate_scope() {
        let bc = compile_source("fn(a) { fn(b) { fn(c) { a + b + c } } }");
        // innermost: a and b are both free
        assert_eq!(
            bc.constants[0],
            function(&[
                (Opcode::GetFree, &[0]),
                (Opcode::GetFree, &[1]),
                (Opcode::Add, &[]),
                (Opcode::GetLocal, &[0]),
                (Opcode::Add, &[]),
                (Opcode::ReturnValue, &[]),
            ], 1, 1)
        );
        // middle: captures a as free itself, forwards it plus its own local b
        assert_eq!(
            bc.constants[1],
            function(&[
                (Opcode::GetFree, &[0]),
                (Opcode::GetLocal, &[0]),
                (Opcode::Closure, &[0, 2]),
                (Opcode::ReturnValue, &[]),
            ], 1, 1)
        );
        // outer: a single load of its own local a
        assert_eq!(
            bc.constants[2],
            function(&[
                (Opcode::GetLocal, &[0]),
                (Opcode::Closure, &[1, 1]),
                (Opcode::ReturnValue, &[]),
            ], 1, 1)
        );
    }

    #[test]
    fn recursive_function_uses_current_closure() {
        let bc = compile_source("let countDown = fn(x) { countDown(x - 1); }; countDown(1);");
        assert_eq!(
            bc.constants[1],
            function(&[
                (Opcode::CurrentClosure, &[]),
                (Opcode::GetLocal, &[0]),
                (Opcode::Constant, &[0]),
                (Opcode::Sub, &[]),
                (Opcode::Call, &[1]),
                (Opcode::ReturnValue, &[]),
            ], 1, 1)
        );
        assert_instructions(&bc, &[
            (Opcode::Closure, &[1, 0]),
            (Opcode::SetGlobal, &[0]),
            (Opcode::GetGlobal, &[0]),
            (Opcode::Constant, &[2]),
            (Opcode::Call, &[1]),
            (Opcode::Pop, &[]),
        ]);
    }

    #[test]
    fn local_recursive_function_is_not_captured_from_its_slot() {
        let source = "let wrapper = fn() { let inner = fn(x) { inner(x) }; inner(1); }; wrapper();";
        let bc = compile_source(source);
        // inner: self reference through OpCurrentClosure, no free values
        assert_eq!(
            bc.constants[0],
            function(&[
                (Opcode::CurrentClosure, &[]),
                (Opcode::GetLocal, &[0]),
                (Opcode::Call, &[1]),
                (Opcode::ReturnValue, &[]),
            ], 1, 1)
        );
    }

    #[test]
    fn resumed_state_shares_globals_and_constants() {
        let mut first = Compiler::new();
        first.compile(&parse_program("let a = 1;")).unwrap();
        let (symbol_table, bytecode) = first.into_state();

        let mut second = Compiler::with_state(symbol_table, bytecode.constants);
        second.compile(&parse_program("a + 2;")).unwrap();
        let bc = second.bytecode();
        assert_eq!(bc.constants, vec![Object::Integer(1), Object::Integer(2)]);
        assert_instructions(&bc, &[
            (Opcode::GetGlobal, &[0]),
            (Opcode::Constant, &[1]),
            (Opcode::Add, &[]),
            (Opcode::Pop, &[]),
        ]);
    }

    #[test]
    fn scopes_restore_symbol_table() {
        let mut compiler = Compiler::new();
        compiler.compile(&parse_program("let g = 1; fn(p) { p }; g;")).unwrap();
        assert!(compiler.symbol_table.is_global());
        assert_eq!(compiler.scopes.len(), 1);
        assert_eq!(compiler.symbol_table.resolve("p"), None);
    }

    #[test]
    fn too_many_call_arguments_is_a_compile_error() {
        let args = vec!["1"; 256].join(", ");
        let mut compiler = Compiler::new();
        let err = compiler.compile(&parse_program(&format!("len({});", args))).unwrap_err();
        assert!(matches!(err, CompileError::Operand(OperandError::Overflow { op: Opcode::Call, .. })));
    }
}
