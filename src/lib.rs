//! Bytecode compiler and stack virtual machine for the Monkey language.
//!
//! Source flows through [`lexer`] and [`parser`] into an [`ast::Program`],
//! which the [`compiler`] lowers to [`code::Instructions`] plus a constant
//! pool for the [`vm`] to execute. A [`session::Session`] carries globals,
//! constants and the symbol table from one unit to the next.

pub mod ast;
pub mod code;
pub mod compiler;
pub mod diagnostic;
pub mod lexer;
pub mod object;
pub mod parser;
pub mod session;
pub mod vm;
