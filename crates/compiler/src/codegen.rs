//! x86-64 code generation for B-minor
//!
//! A naive tree-walking emitter producing AT&T-syntax assembly for the
//! System V AMD64 convention, linked against a C runtime for `printf`.
//!
//! # Scratch registers
//!
//! Values live in a pool of seven registers (`%rbx`, `%r10`, `%r11`,
//! `%r12`–`%r15`). Every `expr_codegen` call returns exactly one occupied
//! register as a move-only [`Scratch`] handle; the caller must hand it
//! back with `free`, so a leak is a type error rather than a silent pool
//! exhaustion. `%r10` and `%r11` are caller-saved in the ABI, so they are
//! additionally pushed and popped around every call.
//!
//! # Output
//!
//! Assembly accumulates in a `String`; the driver writes it to disk once
//! generation succeeds. String and format-string literals are emitted
//! inline by switching to `.data` and back.

use crate::ast::{escape_string, BinaryOp, Decl, Expr, ExprKind, Program, Stmt, Type, UnaryOp};
use crate::scope::{Symbol, SymbolKind, NUM_ARGUMENT_REGISTERS};
use std::fmt;
use std::fmt::Write as _;

const SCRATCH_NAMES: [&str; 7] = ["%rbx", "%r10", "%r11", "%r12", "%r13", "%r14", "%r15"];

const ARGUMENT_REGISTERS: [&str; NUM_ARGUMENT_REGISTERS] =
    ["%rdi", "%rsi", "%rdx", "%rcx", "%r8", "%r9"];

/// Error type for code generation.
///
/// Allows `?` propagation for both logical errors (constructs with no
/// lowering) and formatting errors while writing assembly text.
#[derive(Debug)]
pub enum CodegenError {
    /// A logical error (e.g. a construct this generator cannot lower)
    Logic(String),
    /// A formatting error when writing assembly
    Format(fmt::Error),
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodegenError::Logic(s) => write!(f, "{}", s),
            CodegenError::Format(e) => write!(f, "assembly generation error: {}", e),
        }
    }
}

impl std::error::Error for CodegenError {}

impl From<String> for CodegenError {
    fn from(s: String) -> Self {
        CodegenError::Logic(s)
    }
}

impl From<fmt::Error> for CodegenError {
    fn from(e: fmt::Error) -> Self {
        CodegenError::Format(e)
    }
}

/// An occupied scratch register. Move-only: freeing consumes the handle.
#[derive(Debug)]
pub struct Scratch(usize);

impl Scratch {
    fn name(&self) -> &'static str {
        SCRATCH_NAMES[self.0]
    }
}

#[derive(Debug, Default)]
struct ScratchTable {
    in_use: [bool; SCRATCH_NAMES.len()],
}

impl ScratchTable {
    /// Claim the lowest free register. Exhaustion means an expression
    /// emitter leaked a handle, which the `Scratch` type rules out short
    /// of a compiler bug.
    fn alloc(&mut self) -> Scratch {
        for (r, in_use) in self.in_use.iter_mut().enumerate() {
            if !*in_use {
                *in_use = true;
                return Scratch(r);
            }
        }
        panic!("compiler bug: all scratch registers are in use");
    }

    fn free(&mut self, r: Scratch) {
        self.in_use[r.0] = false;
    }

    #[cfg(test)]
    fn occupied(&self) -> usize {
        self.in_use.iter().filter(|&&b| b).count()
    }
}

pub struct Codegen {
    out: String,
    scratch: ScratchTable,
    label_counter: usize,
}

impl Default for Codegen {
    fn default() -> Self {
        Self::new()
    }
}

impl Codegen {
    pub fn new() -> Self {
        Codegen {
            out: String::new(),
            scratch: ScratchTable::default(),
            label_counter: 0,
        }
    }

    /// Generate the assembly for a resolved and type-checked program.
    pub fn generate(program: &Program) -> Result<String, CodegenError> {
        let mut cg = Codegen::new();
        cg.emit_header()?;
        for decl in &program.decls {
            cg.decl_codegen(decl)?;
        }
        Ok(cg.out)
    }

    /// Fixed string constants used by `print`, then switch to `.text`.
    fn emit_header(&mut self) -> Result<(), CodegenError> {
        writeln!(self.out, ".data")?;
        writeln!(self.out, ".__STR_TRUE:")?;
        writeln!(self.out, "\t.string \"true\"")?;
        writeln!(self.out, ".__STR_FALSE:")?;
        writeln!(self.out, "\t.string \"false\"")?;
        writeln!(self.out, ".__STR_ARRAY:")?;
        writeln!(self.out, "\t.string \"(T_ARRAY)\"")?;
        writeln!(self.out, ".__STR_FUNCTION:")?;
        writeln!(self.out, "\t.string \"(T_FUNCTION)\"")?;
        writeln!(self.out, ".text")?;
        Ok(())
    }

    fn label_create(&mut self) -> String {
        let label = self.label_counter;
        self.label_counter += 1;
        format!(".L{label}")
    }

    /// Operand text addressing a symbol: globals are rip-relative by name,
    /// locals and register-spilled parameters sit below the base pointer,
    /// stack-passed parameters above it (past the saved `%r10`/`%r11` and
    /// return address).
    fn symbol_address(symbol: &Symbol) -> String {
        match symbol.kind {
            SymbolKind::Global => format!("{}(%rip)", symbol.name),
            SymbolKind::Local { slot } => format!("-{}(%rbp)", (slot + 1) * 8),
            SymbolKind::Param { index } => {
                if index < NUM_ARGUMENT_REGISTERS {
                    format!("-{}(%rbp)", (index + 1) * 8)
                } else {
                    format!("{}(%rbp)", 32 + (index - NUM_ARGUMENT_REGISTERS) * 8)
                }
            }
        }
    }

    /// The symbol behind a store target. Only plain names can be stored
    /// through.
    fn store_target<'a>(e: &'a Expr, what: &str) -> Result<&'a Symbol, CodegenError> {
        match (&e.kind, &e.symbol) {
            (ExprKind::Name(_), Some(symbol)) => Ok(symbol.as_ref()),
            (ExprKind::Name(name), None) => Err(CodegenError::Logic(format!(
                "name '{name}' reached code generation without a symbol"
            ))),
            _ => Err(CodegenError::Logic(format!(
                "{what} target must be a variable name, got ({e})"
            ))),
        }
    }

    fn expr_codegen(&mut self, e: &Expr) -> Result<Scratch, CodegenError> {
        match &e.kind {
            ExprKind::Name(_) => {
                let symbol = Self::store_target(e, "load")?;
                let address = Self::symbol_address(symbol);
                let r = self.scratch.alloc();
                writeln!(self.out, "MOVQ {address}, {}", r.name())?;
                Ok(r)
            }
            ExprKind::IntegerLiteral(value) => self.literal_codegen(*value),
            ExprKind::BooleanLiteral(value) => self.literal_codegen(*value as i64),
            ExprKind::CharLiteral(c) => self.literal_codegen(*c as i64),
            ExprKind::StringLiteral(s) => {
                let label = self.label_create();
                writeln!(self.out, ".data")?;
                writeln!(self.out, "{label}:")?;
                writeln!(self.out, "\t.string \"{}\"", escape_string(s))?;
                writeln!(self.out, ".text")?;
                let r = self.scratch.alloc();
                writeln!(self.out, "LEAQ {label}(%rip), {}", r.name())?;
                Ok(r)
            }
            ExprKind::Binary { op, left, right } => self.binary_codegen(*op, left, right),
            ExprKind::Unary { op, operand } => match op {
                UnaryOp::Negate => {
                    let r = self.expr_codegen(operand)?;
                    writeln!(self.out, "NEG {}", r.name())?;
                    Ok(r)
                }
                UnaryOp::Not => {
                    let r = self.expr_codegen(operand)?;
                    let true_label = self.label_create();
                    let end_label = self.label_create();
                    writeln!(self.out, "CMP $0, {}", r.name())?;
                    writeln!(self.out, "JE {true_label}")?;
                    writeln!(self.out, "XOR {}, {}", r.name(), r.name())?;
                    writeln!(self.out, "JMP {end_label}")?;
                    writeln!(self.out, "{true_label}:")?;
                    writeln!(self.out, "MOVQ $1, {}", r.name())?;
                    writeln!(self.out, "{end_label}:")?;
                    Ok(r)
                }
            },
            ExprKind::Assign { left, right } => {
                let address = Self::symbol_address(Self::store_target(left, "assignment")?);
                let r = self.expr_codegen(right)?;
                writeln!(self.out, "MOVQ {}, {address}", r.name())?;
                // the assignment keeps its value
                Ok(r)
            }
            ExprKind::Increment(operand) => {
                // address first, then the load through the ordinary name
                // path, then the store back to the same slot
                let address = Self::symbol_address(Self::store_target(operand, "increment")?);
                let r = self.expr_codegen(operand)?;
                writeln!(self.out, "INC {}", r.name())?;
                writeln!(self.out, "MOVQ {}, {address}", r.name())?;
                Ok(r)
            }
            ExprKind::Decrement(operand) => {
                let address = Self::symbol_address(Self::store_target(operand, "decrement")?);
                let r = self.expr_codegen(operand)?;
                writeln!(self.out, "DEC {}", r.name())?;
                writeln!(self.out, "MOVQ {}, {address}", r.name())?;
                Ok(r)
            }
            ExprKind::Call { callee, args } => {
                let ExprKind::Name(name) = &callee.kind else {
                    return Err(CodegenError::Logic(format!(
                        "call target must be a function name, got ({callee})"
                    )));
                };

                // evaluate and push in reverse so the first argument ends
                // on top, then pop the leading six into argument registers;
                // any extras stay on the stack for the callee
                for arg in args.iter().rev() {
                    let r = self.expr_codegen(arg)?;
                    writeln!(self.out, "PUSHQ {}", r.name())?;
                    self.scratch.free(r);
                }
                for register in ARGUMENT_REGISTERS.iter().take(args.len()) {
                    writeln!(self.out, "POPQ {register}")?;
                }

                // the variadic convention counts vector arguments in %rax
                writeln!(self.out, "XOR %rax, %rax")?;
                writeln!(self.out)?;

                writeln!(self.out, "PUSHQ %r10")?;
                writeln!(self.out, "PUSHQ %r11")?;
                writeln!(self.out, "CALL {name}")?;
                writeln!(self.out, "POPQ %r11")?;
                writeln!(self.out, "POPQ %r10")?;

                let r = self.scratch.alloc();
                writeln!(self.out, "MOVQ %rax, {}", r.name())?;
                Ok(r)
            }
            ExprKind::Subscript { array, index } => {
                let address = Self::symbol_address(Self::store_target(array, "subscript")?);
                let index_reg = self.expr_codegen(index)?;
                let base = self.scratch.alloc();
                writeln!(self.out, "LEAQ {address}, {}", base.name())?;
                // elements are uniformly eight bytes
                writeln!(
                    self.out,
                    "MOVQ 0({}, {}, 8), {}",
                    base.name(),
                    index_reg.name(),
                    index_reg.name()
                )?;
                self.scratch.free(base);
                Ok(index_reg)
            }
            ExprKind::InitList(_) => Err(CodegenError::Logic(format!(
                "initializer lists cannot be compiled outside global array declarations: ({e})"
            ))),
        }
    }

    fn literal_codegen(&mut self, value: i64) -> Result<Scratch, CodegenError> {
        let r = self.scratch.alloc();
        writeln!(self.out, "MOVQ ${value}, {}", r.name())?;
        Ok(r)
    }

    fn binary_codegen(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
    ) -> Result<Scratch, CodegenError> {
        if op == BinaryOp::Exponent {
            return Err(CodegenError::Logic(
                "the exponent operator cannot be compiled".to_string(),
            ));
        }

        let l = self.expr_codegen(left)?;
        let r = self.expr_codegen(right)?;
        match op {
            BinaryOp::Add => {
                writeln!(self.out, "ADDQ {}, {}", l.name(), r.name())?;
                self.scratch.free(l);
                Ok(r)
            }
            BinaryOp::Sub => {
                writeln!(self.out, "SUBQ {}, {}", r.name(), l.name())?;
                self.scratch.free(r);
                Ok(l)
            }
            BinaryOp::Mul => {
                writeln!(self.out, "MOVQ {}, %rax", l.name())?;
                writeln!(self.out, "IMULQ {}", r.name())?;
                writeln!(self.out, "MOVQ %rax, {}", r.name())?;
                self.scratch.free(l);
                Ok(r)
            }
            BinaryOp::Div => {
                writeln!(self.out, "MOVQ {}, %rax", l.name())?;
                writeln!(self.out, "CQO")?;
                writeln!(self.out, "IDIVQ {}", r.name())?;
                writeln!(self.out, "MOVQ %rax, {}", l.name())?;
                self.scratch.free(r);
                Ok(l)
            }
            BinaryOp::Modulo => {
                writeln!(self.out, "MOVQ {}, %rax", l.name())?;
                writeln!(self.out, "CQO")?;
                writeln!(self.out, "IDIVQ {}", r.name())?;
                // the remainder comes back in %rdx
                writeln!(self.out, "MOVQ %rdx, {}", l.name())?;
                self.scratch.free(r);
                Ok(l)
            }
            BinaryOp::Or => {
                let right_label = self.label_create();
                let false_label = self.label_create();
                let end_label = self.label_create();

                writeln!(self.out, "CMP $0, {}", l.name())?;
                writeln!(self.out, "JE {right_label}")?;
                writeln!(self.out, "MOV $1, {}", l.name())?;
                writeln!(self.out, "JMP {end_label}")?;
                writeln!(self.out, "{right_label}:")?;

                writeln!(self.out, "CMP $0, {}", r.name())?;
                writeln!(self.out, "JE {false_label}")?;
                writeln!(self.out, "MOV $1, {}", l.name())?;
                writeln!(self.out, "JMP {end_label}")?;
                writeln!(self.out, "{false_label}:")?;

                writeln!(self.out, "MOV $0, {}", l.name())?;
                writeln!(self.out, "{end_label}:")?;

                self.scratch.free(r);
                Ok(l)
            }
            BinaryOp::And => {
                let false_label = self.label_create();
                let end_label = self.label_create();

                writeln!(self.out, "CMP $0, {}", l.name())?;
                writeln!(self.out, "JE {false_label}")?;
                writeln!(self.out, "CMP $0, {}", r.name())?;
                writeln!(self.out, "JE {false_label}")?;
                writeln!(self.out, "MOVQ $1, {}", l.name())?;
                writeln!(self.out, "JMP {end_label}")?;

                writeln!(self.out, "{false_label}:")?;
                writeln!(self.out, "MOVQ $0, {}", l.name())?;
                writeln!(self.out, "{end_label}:")?;

                self.scratch.free(r);
                Ok(l)
            }
            BinaryOp::Eq
            | BinaryOp::NotEq
            | BinaryOp::Gt
            | BinaryOp::GtEq
            | BinaryOp::Lt
            | BinaryOp::LtEq => {
                let true_label = self.label_create();
                let end_label = self.label_create();

                // AT&T order: computes left - right
                writeln!(self.out, "CMP {}, {}", r.name(), l.name())?;
                let jump = match op {
                    BinaryOp::Eq => "JE",
                    BinaryOp::NotEq => "JNE",
                    BinaryOp::Gt => "JG",
                    BinaryOp::GtEq => "JGE",
                    BinaryOp::Lt => "JL",
                    BinaryOp::LtEq => "JLE",
                    _ => unreachable!(),
                };
                writeln!(self.out, "{jump} {true_label}")?;

                writeln!(self.out, "MOVQ $0, {}", r.name())?;
                writeln!(self.out, "JMP {end_label}")?;
                writeln!(self.out, "{true_label}:")?;
                writeln!(self.out, "MOVQ $1, {}", r.name())?;
                writeln!(self.out, "{end_label}:")?;

                self.scratch.free(l);
                Ok(r)
            }
            BinaryOp::Exponent => unreachable!(),
        }
    }

    fn stmt_codegen(&mut self, s: &Stmt) -> Result<(), CodegenError> {
        match s {
            Stmt::Decl(decl) => self.decl_codegen(decl)?,
            Stmt::Expr(expr) => {
                // value discarded
                let r = self.expr_codegen(expr)?;
                self.scratch.free(r);
            }
            Stmt::IfElse {
                condition,
                body,
                else_body,
            } => {
                let else_label = self.label_create();
                let done_label = self.label_create();

                let r = self.expr_codegen(condition)?;
                writeln!(self.out, "CMP $0, {}", r.name())?;
                self.scratch.free(r);
                writeln!(self.out, "JE {else_label}")?;

                self.stmt_codegen(body)?;
                writeln!(self.out, "JMP {done_label}")?;

                writeln!(self.out, "{else_label}:")?;
                if let Some(else_body) = else_body {
                    self.stmt_codegen(else_body)?;
                }
                writeln!(self.out, "{done_label}:")?;
            }
            Stmt::For {
                init,
                condition,
                step,
                body,
            } => {
                let top_label = self.label_create();
                let done_label = self.label_create();

                if let Some(init) = init {
                    let r = self.expr_codegen(init)?;
                    self.scratch.free(r);
                }

                writeln!(self.out, "{top_label}:")?;

                if let Some(condition) = condition {
                    let r = self.expr_codegen(condition)?;
                    writeln!(self.out, "CMP $0, {}", r.name())?;
                    self.scratch.free(r);
                    writeln!(self.out, "JE {done_label}")?;
                }

                self.stmt_codegen(body)?;

                if let Some(step) = step {
                    let r = self.expr_codegen(step)?;
                    self.scratch.free(r);
                }
                writeln!(self.out, "JMP {top_label}")?;

                writeln!(self.out, "{done_label}:")?;
            }
            Stmt::Print(args) => self.print_codegen(args)?,
            Stmt::Return {
                value,
                function_name,
            } => {
                let function_name = function_name.as_deref().ok_or_else(|| {
                    CodegenError::Logic(
                        "return statement reached code generation without a function".to_string(),
                    )
                })?;
                if let Some(value) = value {
                    let r = self.expr_codegen(value)?;
                    writeln!(self.out, "MOVQ {}, %rax", r.name())?;
                    writeln!(self.out, "JMP .{function_name}_epilogue")?;
                    self.scratch.free(r);
                } else {
                    writeln!(self.out, "JMP .{function_name}_epilogue")?;
                }
            }
            Stmt::Block(stmts) => {
                for stmt in stmts {
                    self.stmt_codegen(stmt)?;
                }
            }
        }

        writeln!(self.out)?;
        Ok(())
    }

    /// Variadic, type-directed `print`: build a `printf` format string
    /// from the argument types, translate booleans/arrays/functions to
    /// their fixed display strings, and call `printf` through the PLT.
    fn print_codegen(&mut self, args: &[Expr]) -> Result<(), CodegenError> {
        let mut format_string = String::new();
        for arg in args {
            let ty = arg.ty.as_ref().ok_or_else(|| {
                CodegenError::Logic(format!(
                    "expression ({arg}) reached code generation without a type"
                ))
            })?;
            format_string.push_str(match ty {
                Type::Char => "%c",
                Type::Integer => "%d",
                _ => "%s",
            });
        }

        for arg in args.iter().rev() {
            let r = self.expr_codegen(arg)?;
            match arg.ty.as_ref() {
                Some(Type::Boolean) => {
                    let false_label = self.label_create();
                    let end_label = self.label_create();

                    writeln!(self.out, "CMP $0, {}", r.name())?;
                    writeln!(self.out, "JE {false_label}")?;

                    writeln!(self.out, "LEAQ .__STR_TRUE(%rip), {}", r.name())?;
                    writeln!(self.out, "JMP {end_label}")?;

                    writeln!(self.out, "{false_label}:")?;
                    writeln!(self.out, "LEAQ .__STR_FALSE(%rip), {}", r.name())?;

                    writeln!(self.out, "{end_label}:")?;
                }
                Some(Type::Array { .. }) => {
                    writeln!(self.out, "LEAQ .__STR_ARRAY(%rip), {}", r.name())?;
                }
                Some(Type::Function { .. }) => {
                    writeln!(self.out, "LEAQ .__STR_FUNCTION(%rip), {}", r.name())?;
                }
                _ => {}
            }
            writeln!(self.out, "PUSHQ {}", r.name())?;
            self.scratch.free(r);
        }

        // %rdi is reserved for the format string
        for register in ARGUMENT_REGISTERS[1..].iter().take(args.len()) {
            writeln!(self.out, "POPQ {register}")?;
        }

        let format_label = self.label_create();
        writeln!(self.out, ".data")?;
        writeln!(self.out, "{format_label}:")?;
        writeln!(self.out, "\t.string \"{format_string}\"")?;
        writeln!(self.out, ".text")?;

        writeln!(self.out, "LEAQ {format_label}(%rip), {}", ARGUMENT_REGISTERS[0])?;
        writeln!(self.out, "XOR %rax, %rax")?;

        writeln!(self.out, "PUSHQ %r10")?;
        writeln!(self.out, "PUSHQ %r11")?;
        writeln!(self.out, "CALL printf@PLT")?;
        writeln!(self.out, "POPQ %r11")?;
        writeln!(self.out, "POPQ %r10")?;

        Ok(())
    }

    fn decl_codegen(&mut self, d: &Decl) -> Result<(), CodegenError> {
        match &d.ty {
            Type::Function { params, .. } => self.function_codegen(d, params.len()),
            Type::Array { size, .. } => self.array_codegen(d, size.as_deref()),
            Type::String => self.string_codegen(d),
            Type::Boolean | Type::Char | Type::Integer => self.scalar_codegen(d),
            Type::Void => panic!("compiler bug: cannot create a variable of type void"),
        }
    }

    fn function_codegen(&mut self, d: &Decl, param_count: usize) -> Result<(), CodegenError> {
        // prototypes produce no code
        let Some(body) = &d.body else {
            return Ok(());
        };

        writeln!(self.out, ".text")?;
        writeln!(self.out, ".global {}", d.name)?;
        writeln!(self.out, "{}:", d.name)?;

        // prologue: new frame, spill register-passed parameters into their
        // slots, make room for locals, save callee-saved scratch
        writeln!(self.out, "PUSHQ %rbp")?;
        writeln!(self.out, "MOVQ %rsp, %rbp")?;
        for register in ARGUMENT_REGISTERS.iter().take(param_count) {
            writeln!(self.out, "PUSHQ {register}")?;
        }
        if d.local_var_count > 0 {
            writeln!(self.out)?;
            writeln!(self.out, "SUBQ ${}, %rsp", 8 * d.local_var_count)?;
            writeln!(self.out)?;
        }
        writeln!(self.out, "PUSHQ %rbx")?;
        writeln!(self.out, "PUSHQ %r12")?;
        writeln!(self.out, "PUSHQ %r13")?;
        writeln!(self.out, "PUSHQ %r14")?;
        writeln!(self.out, "PUSHQ %r15")?;
        writeln!(self.out)?;

        for stmt in body {
            self.stmt_codegen(stmt)?;
        }

        // epilogue: every return jumps here
        writeln!(self.out, ".{}_epilogue:", d.name)?;
        writeln!(self.out, "POPQ %r15")?;
        writeln!(self.out, "POPQ %r14")?;
        writeln!(self.out, "POPQ %r13")?;
        writeln!(self.out, "POPQ %r12")?;
        writeln!(self.out, "POPQ %rbx")?;
        writeln!(self.out, "MOVQ %rbp, %rsp")?;
        writeln!(self.out, "POPQ %rbp")?;
        writeln!(self.out, "RET")?;
        Ok(())
    }

    fn array_codegen(&mut self, d: &Decl, size: Option<&Expr>) -> Result<(), CodegenError> {
        let is_global = d
            .symbol
            .as_ref()
            .is_some_and(|s| s.kind == SymbolKind::Global);
        if !is_global {
            return Err(CodegenError::Logic(format!(
                "local arrays are not supported: '{}'",
                d.name
            )));
        }

        writeln!(self.out, ".global {}", d.name)?;
        writeln!(self.out, ".data")?;
        writeln!(self.out, "{}:", d.name)?;

        // the type checker guarantees a constant size here, so anything
        // but an integer literal cannot be sized
        let size = match size {
            Some(Expr {
                kind: ExprKind::IntegerLiteral(n),
                ..
            }) => Some(*n as usize),
            Some(other) => {
                return Err(CodegenError::Logic(format!(
                    "array size must be an integer literal, got ({other})"
                )));
            }
            None => None,
        };

        match &d.value {
            Some(value) => {
                let ExprKind::InitList(elements) = &value.kind else {
                    return Err(CodegenError::Logic(format!(
                        "array initializer must be an initializer list, got ({value})"
                    )));
                };

                let emit_count = match size {
                    Some(size) => elements.len().min(size),
                    None => elements.len(),
                };
                for element in &elements[..emit_count] {
                    let value = match &element.kind {
                        ExprKind::IntegerLiteral(v) => *v,
                        ExprKind::BooleanLiteral(b) => *b as i64,
                        ExprKind::CharLiteral(c) => *c as i64,
                        ExprKind::StringLiteral(_) => {
                            return Err(CodegenError::Logic(
                                "arrays of strings are not supported".to_string(),
                            ));
                        }
                        ExprKind::InitList(_) => {
                            return Err(CodegenError::Logic(
                                "multi-dimensional arrays are not supported".to_string(),
                            ));
                        }
                        other => {
                            return Err(CodegenError::Logic(format!(
                                "array initializer elements must be literals, got ({:?})",
                                other
                            )));
                        }
                    };
                    writeln!(self.out, "\t.quad {value}")?;
                }
                if let Some(size) = size {
                    if emit_count < size {
                        writeln!(self.out, "\t.zero {}", (size - emit_count) * 8)?;
                    }
                }
            }
            None => {
                let size = size.ok_or_else(|| {
                    CodegenError::Logic(format!("array '{}' has no size", d.name))
                })?;
                writeln!(self.out, ".zero {}", size * 8)?;
            }
        }
        Ok(())
    }

    fn string_codegen(&mut self, d: &Decl) -> Result<(), CodegenError> {
        let text = match &d.value {
            Some(Expr {
                kind: ExprKind::StringLiteral(s),
                ..
            }) => s.as_str(),
            Some(other) => {
                return Err(CodegenError::Logic(format!(
                    "string initializers must be string literals, got ({other})"
                )));
            }
            None => "",
        };

        let is_global = d
            .symbol
            .as_ref()
            .is_some_and(|s| s.kind == SymbolKind::Global);
        if is_global {
            // the literal under its own label, the variable as a pointer
            let label = self.label_create();
            writeln!(self.out, ".global {}", d.name)?;
            writeln!(self.out, ".data")?;
            writeln!(self.out, "{label}:")?;
            writeln!(self.out, "\t.string \"{}\"", escape_string(text))?;
            writeln!(self.out, "{}:", d.name)?;
            writeln!(self.out, "\t.quad {label}")?;
            writeln!(self.out, ".text")?;
            writeln!(self.out)?;
        } else {
            let label = self.label_create();
            writeln!(self.out, ".data")?;
            writeln!(self.out, "{label}:")?;
            writeln!(self.out, "\t.string \"{}\"", escape_string(text))?;
            writeln!(self.out, ".text")?;
            writeln!(self.out)?;

            let symbol = d.symbol.as_ref().ok_or_else(|| {
                CodegenError::Logic(format!("declaration '{}' has no symbol", d.name))
            })?;
            let r = self.scratch.alloc();
            writeln!(self.out, "LEAQ {label}(%rip), {}", r.name())?;
            writeln!(self.out, "MOVQ {}, {}", r.name(), Self::symbol_address(symbol))?;
            self.scratch.free(r);
        }
        Ok(())
    }

    fn scalar_codegen(&mut self, d: &Decl) -> Result<(), CodegenError> {
        let symbol = d.symbol.as_ref().ok_or_else(|| {
            CodegenError::Logic(format!("declaration '{}' has no symbol", d.name))
        })?;

        // a missing initializer becomes the zero literal of the declared type
        let default_value;
        let value = match &d.value {
            Some(value) => value,
            None => {
                default_value = match d.ty {
                    Type::Boolean => Expr::boolean(false),
                    Type::Char => Expr::new(ExprKind::CharLiteral('\0')),
                    _ => Expr::integer(0),
                };
                &default_value
            }
        };

        if symbol.kind == SymbolKind::Global {
            let literal = match &value.kind {
                ExprKind::IntegerLiteral(v) => *v,
                ExprKind::BooleanLiteral(b) => *b as i64,
                ExprKind::CharLiteral(c) => *c as i64,
                other => {
                    return Err(CodegenError::Logic(format!(
                        "global initializers must be literals, got ({:?})",
                        other
                    )));
                }
            };
            writeln!(self.out, ".data")?;
            writeln!(self.out, "{}:", d.name)?;
            writeln!(self.out, "\t.quad {literal}")?;
            writeln!(self.out, ".text")?;
            writeln!(self.out)?;
        } else {
            let r = self.expr_codegen(value)?;
            writeln!(self.out, "MOVQ {}, {}", r.name(), Self::symbol_address(symbol))?;
            self.scratch.free(r);
        }
        Ok(())
    }

    #[cfg(test)]
    fn scratch_occupied(&self) -> usize {
        self.scratch.occupied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_source, Parser};
    use crate::resolver::Resolver;
    use crate::typechecker::TypeChecker;

    fn compile(source: &str) -> String {
        let mut program = parse_source(source).unwrap();
        let mut resolver = Resolver::new();
        resolver.resolve(&mut program);
        assert!(resolver.errors.is_empty(), "{:?}", resolver.errors);
        let mut checker = TypeChecker::new();
        checker.check(&mut program);
        assert!(checker.errors.is_empty(), "{:?}", checker.errors);
        Codegen::generate(&program).unwrap()
    }

    /// Positions of `needles` in `haystack`, asserting they appear in order.
    fn assert_ordered(haystack: &str, needles: &[&str]) {
        let mut from = 0;
        for needle in needles {
            match haystack[from..].find(needle) {
                Some(at) => from += at + needle.len(),
                None => panic!("missing '{needle}' (in order) in:\n{haystack}"),
            }
        }
    }

    #[test]
    fn test_header_defines_print_strings() {
        let asm = compile("x: integer = 1;");
        assert_ordered(
            &asm,
            &[
                ".data",
                ".__STR_TRUE:",
                "\t.string \"true\"",
                ".__STR_FALSE:",
                "\t.string \"false\"",
                ".__STR_ARRAY:",
                ".__STR_FUNCTION:",
                ".text",
            ],
        );
    }

    #[test]
    fn test_three_locals_frame_layout() {
        let asm = compile(
            "f: function void () = {\n\
                 a: integer = 1;\n\
                 b: integer = 2;\n\
                 c: integer = 3;\n\
             }",
        );
        assert!(asm.contains("SUBQ $24, %rsp"), "{asm}");
        assert_ordered(
            &asm,
            &[
                "MOVQ $1, %rbx",
                "MOVQ %rbx, -8(%rbp)",
                "MOVQ $2, %rbx",
                "MOVQ %rbx, -16(%rbp)",
                "MOVQ $3, %rbx",
                "MOVQ %rbx, -24(%rbp)",
            ],
        );
    }

    #[test]
    fn test_prologue_spills_parameters() {
        let asm = compile("f: function integer (a: integer, b: integer) = { return a + b; }");
        assert_ordered(
            &asm,
            &[
                ".global f",
                "f:",
                "PUSHQ %rbp",
                "MOVQ %rsp, %rbp",
                "PUSHQ %rdi",
                "PUSHQ %rsi",
                "PUSHQ %rbx",
                "PUSHQ %r12",
                "PUSHQ %r13",
                "PUSHQ %r14",
                "PUSHQ %r15",
            ],
        );
        // parameters are read back from their spill slots
        assert!(asm.contains("MOVQ -8(%rbp), %rbx"), "{asm}");
        assert!(asm.contains("MOVQ -16(%rbp), %r10"), "{asm}");
    }

    #[test]
    fn test_epilogue_restores_in_reverse() {
        let asm = compile("f: function integer () = { return 0; }");
        assert_ordered(
            &asm,
            &[
                "JMP .f_epilogue",
                ".f_epilogue:",
                "POPQ %r15",
                "POPQ %r14",
                "POPQ %r13",
                "POPQ %r12",
                "POPQ %rbx",
                "MOVQ %rbp, %rsp",
                "POPQ %rbp",
                "RET",
            ],
        );
    }

    #[test]
    fn test_seven_argument_call_lowering() {
        let asm = compile(
            "f: function integer (a: integer, b: integer, c: integer, d: integer,\n\
                                  e: integer, g: integer, h: integer) = { return 0; }\n\
             main: function integer () = { return f(1, 2, 3, 4, 5, 6, 7); }",
        );
        // the seventh argument is evaluated and pushed first and stays on
        // the stack; the first six pop into the argument registers
        assert_ordered(
            &asm,
            &[
                "MOVQ $7, %rbx",
                "PUSHQ %rbx",
                "MOVQ $6, %rbx",
                "PUSHQ %rbx",
                "MOVQ $5, %rbx",
                "MOVQ $4, %rbx",
                "MOVQ $3, %rbx",
                "MOVQ $2, %rbx",
                "MOVQ $1, %rbx",
                "POPQ %rdi",
                "POPQ %rsi",
                "POPQ %rdx",
                "POPQ %rcx",
                "POPQ %r8",
                "POPQ %r9",
                "XOR %rax, %rax",
                "PUSHQ %r10",
                "PUSHQ %r11",
                "CALL f",
                "POPQ %r11",
                "POPQ %r10",
                "MOVQ %rax, %rbx",
            ],
        );
    }

    #[test]
    fn test_stack_passed_parameter_address() {
        let asm = compile(
            "f: function integer (a: integer, b: integer, c: integer, d: integer,\n\
                                  e: integer, g: integer, h: integer) = { return h; }",
        );
        // the seventh parameter sits past the saved registers and return
        // address
        assert!(asm.contains("MOVQ 32(%rbp), %rbx"), "{asm}");
    }

    #[test]
    fn test_short_circuit_or_shape() {
        let asm = compile("f: function boolean (a: boolean, b: boolean) = { return a || b; }");
        assert_ordered(
            &asm,
            &[
                "MOVQ -8(%rbp), %rbx",
                "MOVQ -16(%rbp), %r10",
                "CMP $0, %rbx",
                "JE .L0",
                "MOV $1, %rbx",
                "JMP .L2",
                ".L0:",
                "CMP $0, %r10",
                "JE .L1",
                "MOV $1, %rbx",
                "JMP .L2",
                ".L1:",
                "MOV $0, %rbx",
                ".L2:",
            ],
        );
    }

    #[test]
    fn test_comparison_normalizes_to_flag() {
        let asm = compile("f: function boolean (a: integer) = { return a < 10; }");
        assert_ordered(
            &asm,
            &[
                "CMP %r10, %rbx",
                "JL .L0",
                "MOVQ $0, %r10",
                "JMP .L1",
                ".L0:",
                "MOVQ $1, %r10",
                ".L1:",
            ],
        );
    }

    #[test]
    fn test_if_else_labels() {
        let asm = compile(
            "f: function integer (a: boolean) = {\n\
                 if (a) {\n\
                     return 1;\n\
                 } else {\n\
                     return 2;\n\
                 }\n\
             }",
        );
        assert_ordered(
            &asm,
            &["CMP $0, %rbx", "JE .L0", "MOVQ $1, %rbx", "JMP .L1", ".L0:", "MOVQ $2, %rbx", ".L1:"],
        );
    }

    #[test]
    fn test_for_loop_shape() {
        let asm = compile(
            "f: function void (i: integer) = {\n\
                 for (i = 0; i < 3; i++) {\n\
                     i;\n\
                 }\n\
             }",
        );
        // .L0/.L1 are the loop's top and exit labels; the comparison in
        // the condition mints .L2/.L3 for its own normalization
        assert_ordered(
            &asm,
            &[
                "MOVQ $0, %rbx",
                "MOVQ %rbx, -8(%rbp)",
                ".L0:",
                "CMP %r10, %rbx",
                "JL .L2",
                ".L3:",
                "CMP $0, %r10",
                "JE .L1",
                "INC",
                "JMP .L0",
                ".L1:",
            ],
        );
    }

    #[test]
    fn test_increment_stores_back() {
        let asm = compile("f: function void (n: integer) = { n++; }");
        assert_ordered(
            &asm,
            &["MOVQ -8(%rbp), %rbx", "INC %rbx", "MOVQ %rbx, -8(%rbp)"],
        );
    }

    #[test]
    fn test_assignment_keeps_value() {
        let asm = compile("f: function void (a: integer, b: integer) = { a = b = 1; }");
        // b = 1 stores to b, then the same register stores to a
        assert_ordered(
            &asm,
            &["MOVQ $1, %rbx", "MOVQ %rbx, -16(%rbp)", "MOVQ %rbx, -8(%rbp)"],
        );
    }

    #[test]
    fn test_subscript_scaled_addressing() {
        let asm = compile(
            "a: array [4] integer = {1, 2, 3, 4};\n\
             f: function integer (i: integer) = { return a[i]; }",
        );
        assert_ordered(&asm, &["LEAQ a(%rip), %r10", "MOVQ 0(%r10, %rbx, 8), %rbx"]);
    }

    #[test]
    fn test_global_array_data() {
        let asm = compile("a: array [5] integer = {1, 2, 3};");
        assert_ordered(
            &asm,
            &[
                ".global a",
                ".data",
                "a:",
                "\t.quad 1",
                "\t.quad 2",
                "\t.quad 3",
                "\t.zero 16",
            ],
        );
    }

    #[test]
    fn test_global_array_without_initializer() {
        let asm = compile("a: array [4] integer;");
        assert_ordered(&asm, &["a:", ".zero 32"]);
    }

    #[test]
    fn test_global_string_is_a_pointer() {
        let asm = compile("s: string = \"hi\";");
        assert_ordered(
            &asm,
            &[
                ".global s",
                ".data",
                ".L0:",
                "\t.string \"hi\"",
                "s:",
                "\t.quad .L0",
            ],
        );
    }

    #[test]
    fn test_local_string_loads_address() {
        let asm = compile("f: function void () = { s: string = \"hi\"; }");
        assert_ordered(
            &asm,
            &["\t.string \"hi\"", "LEAQ .L0(%rip), %rbx", "MOVQ %rbx, -8(%rbp)"],
        );
    }

    #[test]
    fn test_global_scalar_defaults_to_zero() {
        let asm = compile("x: integer;\nb: boolean;\nc: char;");
        let zeroes = asm.matches("\t.quad 0").count();
        assert_eq!(zeroes, 3, "{asm}");
    }

    #[test]
    fn test_string_literal_escapes_preserved() {
        let asm = compile("f: function void () = { print \"a\\nb\"; }");
        assert!(asm.contains("\t.string \"a\\nb\""), "{asm}");
    }

    #[test]
    fn test_print_format_string_by_type() {
        let asm = compile(
            "f: function void (c: char, n: integer, s: string, b: boolean) = {\n\
                 print c, n, s, b;\n\
             }",
        );
        assert!(asm.contains("\t.string \"%c%d%s%s\""), "{asm}");
        // booleans print as the fixed true/false strings
        assert_ordered(&asm, &["LEAQ .__STR_TRUE(%rip)", "LEAQ .__STR_FALSE(%rip)"]);
    }

    #[test]
    fn test_print_call_sequence() {
        let asm = compile("f: function void (n: integer) = { print \"n = \", n; }");
        assert_ordered(
            &asm,
            &[
                "POPQ %rsi",
                "POPQ %rdx",
                ".data",
                "\t.string \"%s%d\"",
                ".text",
                "(%rip), %rdi",
                "XOR %rax, %rax",
                "PUSHQ %r10",
                "PUSHQ %r11",
                "CALL printf@PLT",
                "POPQ %r11",
                "POPQ %r10",
            ],
        );
    }

    #[test]
    fn test_division_and_modulo_use_rax_rdx() {
        let asm = compile("f: function integer (a: integer, b: integer) = { return a / b + a % b; }");
        assert_ordered(&asm, &["CQO", "IDIVQ", "MOVQ %rax,", "CQO", "IDIVQ", "MOVQ %rdx,"]);
    }

    #[test]
    fn test_exponent_is_rejected() {
        let mut program = parse_source("f: function integer () = { return 2 ^ 3; }").unwrap();
        let mut resolver = Resolver::new();
        resolver.resolve(&mut program);
        let mut checker = TypeChecker::new();
        checker.check(&mut program);
        let err = Codegen::generate(&program).unwrap_err();
        assert!(matches!(err, CodegenError::Logic(_)), "{err}");
    }

    #[test]
    fn test_local_array_is_rejected() {
        let mut program =
            parse_source("f: function void () = { a: array [2] integer = {1, 2}; }").unwrap();
        let mut resolver = Resolver::new();
        resolver.resolve(&mut program);
        let mut checker = TypeChecker::new();
        checker.check(&mut program);
        let err = Codegen::generate(&program).unwrap_err();
        assert!(err.to_string().contains("local arrays"), "{err}");
    }

    #[test]
    fn test_scratch_pool_restored_after_expression() {
        let mut parser = Parser::new("(1 + 2) * (3 - 4) / 5 % 6").unwrap();
        let expr = parser.parse_expr().unwrap();

        let mut cg = Codegen::new();
        let r = cg.expr_codegen(&expr).unwrap();
        assert_eq!(cg.scratch_occupied(), 1);
        cg.scratch.free(r);
        assert_eq!(cg.scratch_occupied(), 0);
    }

    #[test]
    fn test_statement_leaves_pool_empty() {
        let asm_source = "f: function void (n: integer) = { n = n * 2 + 1; print n; }";
        let mut program = parse_source(asm_source).unwrap();
        let mut resolver = Resolver::new();
        resolver.resolve(&mut program);
        let mut checker = TypeChecker::new();
        checker.check(&mut program);

        let mut cg = Codegen::new();
        cg.emit_header().unwrap();
        for decl in &program.decls {
            cg.decl_codegen(decl).unwrap();
        }
        assert_eq!(cg.scratch_occupied(), 0);
    }
}
