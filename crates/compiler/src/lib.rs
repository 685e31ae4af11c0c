//! B-minor compiler library
//!
//! Compiles B-minor source text to x86-64 assembly in AT&T syntax through
//! four pipelined phases: parsing, name resolution, type checking, and
//! code generation. Later phases only attach or read annotations on the
//! tree the parser built; no phase reshapes it.
//!
//! Resolution and type checking accumulate diagnostics and run to
//! completion, so a single invocation reports every static error; the
//! pipeline stops between phases as soon as any were recorded. The
//! generated assembly expects to be assembled and linked against a C
//! runtime providing `printf`.
//!
//! ```rust
//! let assembly = bminorc::compile_source(
//!     "main: function integer () = { print \"hi\\n\"; return 0; }",
//! )
//! .unwrap();
//! assert!(assembly.contains("CALL printf@PLT"));
//! ```

pub mod ast;
pub mod codegen;
pub mod parser;
pub mod resolver;
pub mod scope;
pub mod typechecker;

pub use ast::Program;
pub use codegen::{Codegen, CodegenError};
pub use parser::Parser;
pub use resolver::Resolver;
pub use typechecker::TypeChecker;

use std::fmt;
use std::fs;
use std::path::Path;

/// Default output path for generated assembly.
pub const DEFAULT_OUTPUT: &str = "output.s";

/// A failed compilation, carrying every diagnostic its phase produced.
#[derive(Debug)]
pub enum CompileError {
    Parse(String),
    Resolve(Vec<String>),
    Typecheck(Vec<String>),
    Codegen(CodegenError),
    Io(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Parse(message) => write!(f, "Parse error: {message}"),
            CompileError::Resolve(errors) | CompileError::Typecheck(errors) => {
                for (i, error) in errors.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{error}")?;
                }
                Ok(())
            }
            CompileError::Codegen(error) => write!(f, "Code generation error: {error}"),
            CompileError::Io(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<CodegenError> for CompileError {
    fn from(e: CodegenError) -> Self {
        CompileError::Codegen(e)
    }
}

/// Parse, resolve, and type check, returning the fully annotated program.
pub fn check_source(source: &str) -> Result<Program, CompileError> {
    let mut program = parser::parse_source(source).map_err(CompileError::Parse)?;

    let mut resolver = Resolver::new();
    resolver.resolve(&mut program);
    if !resolver.errors.is_empty() {
        return Err(CompileError::Resolve(resolver.errors));
    }

    let mut checker = TypeChecker::new();
    checker.check(&mut program);
    if !checker.errors.is_empty() {
        return Err(CompileError::Typecheck(checker.errors));
    }

    Ok(program)
}

/// Compile source text to assembly text.
pub fn compile_source(source: &str) -> Result<String, CompileError> {
    let program = check_source(source)?;
    Ok(Codegen::generate(&program)?)
}

/// Compile a source file, writing the assembly to `output`.
pub fn compile_file(input: &Path, output: &Path) -> Result<(), CompileError> {
    let source = fs::read_to_string(input).map_err(|e| {
        CompileError::Io(format!("Could not open file '{}': {e}", input.display()))
    })?;
    let assembly = compile_source(&source)?;
    fs::write(output, assembly).map_err(|e| {
        CompileError::Io(format!("Could not write '{}': {e}", output.display()))
    })?;
    Ok(())
}
