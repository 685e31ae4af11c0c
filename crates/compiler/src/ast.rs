//! Abstract syntax tree for B-minor
//!
//! The parser produces this tree with every annotation field empty; the
//! resolver attaches symbols, the type checker attaches result types, and
//! code generation only reads. Sibling chains from the grammar (argument
//! lists, statement sequences, parameter lists) are ordinary `Vec`s;
//! recursion is reserved for true tree descent.
//!
//! The `Display` impls double as the pretty-printer: printing a parsed
//! program and re-parsing it yields a structurally equal tree.

use crate::scope::Symbol;
use std::fmt;
use std::rc::Rc;

/// A complete translation unit: the top-level declaration list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub decls: Vec<Decl>,
}

impl Program {
    pub fn new() -> Self {
        Program { decls: Vec::new() }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for decl in &self.decls {
            decl.write_indented(f, 0)?;
        }
        Ok(())
    }
}

/// A declaration: `name: type`, optionally with an initializer value or,
/// for functions, a block body.
#[derive(Debug, Clone, PartialEq)]
pub struct Decl {
    pub name: String,
    pub ty: Type,
    pub value: Option<Expr>,
    /// Statements of a function's block body. Only function declarations
    /// carry one; `None` on a function type is a prototype.
    pub body: Option<Vec<Stmt>>,

    /// Attached by the resolver.
    pub symbol: Option<Rc<Symbol>>,
    /// Number of locals declared directly in the function scope, attached
    /// by the resolver and used for stack-frame sizing.
    pub local_var_count: usize,
}

impl Decl {
    pub fn new(
        name: impl Into<String>,
        ty: Type,
        value: Option<Expr>,
        body: Option<Vec<Stmt>>,
    ) -> Self {
        Decl {
            name: name.into(),
            ty,
            value,
            body,
            symbol: None,
            local_var_count: 0,
        }
    }

    pub(crate) fn write_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.ty)?;
        if let Some(value) = &self.value {
            write!(f, " = {value}")?;
        }
        if let Some(body) = &self.body {
            writeln!(f, " = {{")?;
            for stmt in body {
                stmt.write_indented(f, indent + 1)?;
            }
            write_indent(f, indent)?;
            writeln!(f, "}}")
        } else {
            writeln!(f, ";")
        }
    }
}

impl fmt::Display for Decl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

/// A statement. `Block` owns its children directly; the other compound
/// statements hold a single (possibly block) body.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Decl(Box<Decl>),
    Expr(Expr),
    IfElse {
        condition: Expr,
        body: Box<Stmt>,
        else_body: Option<Box<Stmt>>,
    },
    For {
        init: Option<Expr>,
        condition: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
    },
    Print(Vec<Expr>),
    Return {
        value: Option<Expr>,
        /// Name of the enclosing function, attached by the resolver and
        /// consumed by code generation for the epilogue jump.
        function_name: Option<String>,
    },
    Block(Vec<Stmt>),
}

impl Stmt {
    /// Print a statement used as the body of `if`/`for`: blocks open on the
    /// current line, anything else drops to its own indented line.
    fn write_body(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        if let Stmt::Block(stmts) = self {
            writeln!(f, "{{")?;
            for stmt in stmts {
                stmt.write_indented(f, indent + 1)?;
            }
            write_indent(f, indent)?;
            writeln!(f, "}}")
        } else {
            writeln!(f)?;
            self.write_indented(f, indent + 1)
        }
    }

    pub(crate) fn write_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        match self {
            Stmt::Decl(decl) => {
                write_indent(f, indent)?;
                decl.write_indented(f, indent)
            }
            Stmt::Expr(expr) => {
                write_indent(f, indent)?;
                writeln!(f, "{expr};")
            }
            Stmt::IfElse {
                condition,
                body,
                else_body,
            } => {
                write_indent(f, indent)?;
                write!(f, "if ({condition}) ")?;
                body.write_body(f, indent)?;
                if let Some(else_body) = else_body {
                    write_indent(f, indent)?;
                    write!(f, "else ")?;
                    else_body.write_body(f, indent)?;
                }
                Ok(())
            }
            Stmt::For {
                init,
                condition,
                step,
                body,
            } => {
                write_indent(f, indent)?;
                write!(f, "for (")?;
                if let Some(init) = init {
                    write!(f, "{init}")?;
                }
                write!(f, "; ")?;
                if let Some(condition) = condition {
                    write!(f, "{condition}")?;
                }
                write!(f, "; ")?;
                if let Some(step) = step {
                    write!(f, "{step}")?;
                }
                write!(f, ") ")?;
                body.write_body(f, indent)
            }
            Stmt::Print(args) => {
                write_indent(f, indent)?;
                write!(f, "print")?;
                for (i, arg) in args.iter().enumerate() {
                    if i == 0 {
                        write!(f, " {arg}")?;
                    } else {
                        write!(f, ", {arg}")?;
                    }
                }
                writeln!(f, ";")
            }
            Stmt::Return { value, .. } => {
                write_indent(f, indent)?;
                match value {
                    Some(value) => writeln!(f, "return {value};"),
                    None => writeln!(f, "return;"),
                }
            }
            Stmt::Block(stmts) => {
                write_indent(f, indent)?;
                writeln!(f, "{{")?;
                for stmt in stmts {
                    stmt.write_indented(f, indent + 1)?;
                }
                write_indent(f, indent)?;
                writeln!(f, "}}")
            }
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

/// Binary operators, grouped the way the type checker treats them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Exponent,
    Modulo,
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl BinaryOp {
    pub fn token(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Exponent => "^",
            BinaryOp::Modulo => "%",
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
        }
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Sub
                | BinaryOp::Mul
                | BinaryOp::Div
                | BinaryOp::Exponent
                | BinaryOp::Modulo
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::Or | BinaryOp::And)
    }

    pub fn is_equality(self) -> bool {
        matches!(self, BinaryOp::Eq | BinaryOp::NotEq)
    }

    pub fn is_relational(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq
        )
    }

    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 2,
            BinaryOp::And => 3,
            BinaryOp::Eq
            | BinaryOp::NotEq
            | BinaryOp::Lt
            | BinaryOp::LtEq
            | BinaryOp::Gt
            | BinaryOp::GtEq => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Modulo => 6,
            BinaryOp::Exponent => 7,
        }
    }

    fn right_assoc(self) -> bool {
        self == BinaryOp::Exponent
    }
}

/// Unary prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

impl UnaryOp {
    pub fn token(self) -> &'static str {
        match self {
            UnaryOp::Negate => "-",
            UnaryOp::Not => "!",
        }
    }
}

/// An expression node with its phase annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    /// Attached by the resolver on `Name` nodes.
    pub symbol: Option<Rc<Symbol>>,
    /// Attached by the type checker on every node.
    pub ty: Option<Type>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Assign {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Postfix `++`; stores back through the operand's symbol.
    Increment(Box<Expr>),
    /// Postfix `--`; stores back through the operand's symbol.
    Decrement(Box<Expr>),
    IntegerLiteral(i64),
    BooleanLiteral(bool),
    CharLiteral(char),
    StringLiteral(String),
    Name(String),
    Call {
        /// Always a `Name` node: the grammar has no indirect calls.
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    InitList(Vec<Expr>),
    Subscript {
        array: Box<Expr>,
        index: Box<Expr>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Expr {
            kind,
            symbol: None,
            ty: None,
        }
    }

    pub fn name(name: impl Into<String>) -> Self {
        Expr::new(ExprKind::Name(name.into()))
    }

    pub fn integer(value: i64) -> Self {
        Expr::new(ExprKind::IntegerLiteral(value))
    }

    pub fn boolean(value: bool) -> Self {
        Expr::new(ExprKind::BooleanLiteral(value))
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::new(ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// Printing precedence; higher binds tighter. Used to decide where the
    /// pretty-printer must reinsert parentheses.
    fn precedence(&self) -> u8 {
        match &self.kind {
            ExprKind::Assign { .. } => 1,
            ExprKind::Binary { op, .. } => op.precedence(),
            ExprKind::Unary { .. } => 8,
            ExprKind::Increment(_) | ExprKind::Decrement(_) => 9,
            ExprKind::Call { .. } | ExprKind::Subscript { .. } => 9,
            _ => 10,
        }
    }

    fn write_prec(&self, f: &mut fmt::Formatter<'_>, min_prec: u8) -> fmt::Result {
        if self.precedence() < min_prec {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Binary { op, left, right } => {
                let prec = op.precedence();
                let (lmin, rmin) = if op.right_assoc() {
                    (prec + 1, prec)
                } else {
                    (prec, prec + 1)
                };
                left.write_prec(f, lmin)?;
                write!(f, " {} ", op.token())?;
                right.write_prec(f, rmin)
            }
            ExprKind::Unary { op, operand } => {
                write!(f, "{}", op.token())?;
                // one level above unary, so nested prefixes keep their
                // parentheses and `- -x` cannot re-lex as a decrement
                operand.write_prec(f, 9)
            }
            ExprKind::Assign { left, right } => {
                left.write_prec(f, 2)?;
                write!(f, " = ")?;
                right.write_prec(f, 1)
            }
            ExprKind::Increment(operand) => {
                operand.write_prec(f, 9)?;
                write!(f, "++")
            }
            ExprKind::Decrement(operand) => {
                operand.write_prec(f, 9)?;
                write!(f, "--")
            }
            ExprKind::IntegerLiteral(value) => write!(f, "{value}"),
            ExprKind::BooleanLiteral(value) => {
                write!(f, "{}", if *value { "true" } else { "false" })
            }
            ExprKind::CharLiteral(c) => write!(f, "'{}'", escape_char(*c)),
            ExprKind::StringLiteral(s) => write!(f, "\"{}\"", escape_string(s)),
            ExprKind::Name(name) => write!(f, "{name}"),
            ExprKind::Call { callee, args } => {
                write!(f, "{callee}(")?;
                write_comma_separated(f, args)?;
                write!(f, ")")
            }
            ExprKind::InitList(elements) => {
                write!(f, "{{")?;
                write_comma_separated(f, elements)?;
                write!(f, "}}")
            }
            ExprKind::Subscript { array, index } => {
                array.write_prec(f, 9)?;
                write!(f, "[{index}]")
            }
        }
    }
}

/// A B-minor type. Only `Array` and `Function` carry structure; `Void` is
/// forbidden as a variable type.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Void,
    Boolean,
    Char,
    Integer,
    String,
    Array {
        subtype: Box<Type>,
        /// Absent when an initializer supplies the size.
        size: Option<Box<Expr>>,
    },
    Function {
        return_type: Box<Type>,
        params: Vec<Param>,
    },
}

impl Type {
    /// Structural equality. Array sizes are never compared; function types
    /// compare return type and parameters pairwise by name and type.
    pub fn equals(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Void, Type::Void)
            | (Type::Boolean, Type::Boolean)
            | (Type::Char, Type::Char)
            | (Type::Integer, Type::Integer)
            | (Type::String, Type::String) => true,
            (Type::Array { subtype: a, .. }, Type::Array { subtype: b, .. }) => a.equals(b),
            (
                Type::Function {
                    return_type: ra,
                    params: pa,
                },
                Type::Function {
                    return_type: rb,
                    params: pb,
                },
            ) => {
                ra.equals(rb)
                    && pa.len() == pb.len()
                    && pa
                        .iter()
                        .zip(pb)
                        .all(|(a, b)| a.name == b.name && a.ty.equals(&b.ty))
            }
            _ => false,
        }
    }

    pub fn is_atomic(&self) -> bool {
        matches!(
            self,
            Type::Boolean | Type::Char | Type::Integer | Type::String
        )
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Boolean => write!(f, "boolean"),
            Type::Char => write!(f, "char"),
            Type::Integer => write!(f, "integer"),
            Type::String => write!(f, "string"),
            Type::Array { subtype, size } => {
                write!(f, "array [")?;
                if let Some(size) = size {
                    write!(f, "{size}")?;
                }
                write!(f, "] {subtype}")
            }
            Type::Function {
                return_type,
                params,
            } => {
                write!(f, "function {return_type} (")?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", param.name, param.ty)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// A named function parameter. Order is significant.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    /// Attached by the resolver.
    pub symbol: Option<Rc<Symbol>>,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Param {
            name: name.into(),
            ty,
            symbol: None,
        }
    }
}

fn write_indent(f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
    for _ in 0..indent {
        write!(f, "    ")?;
    }
    Ok(())
}

fn write_comma_separated(f: &mut fmt::Formatter<'_>, exprs: &[Expr]) -> fmt::Result {
    for (i, expr) in exprs.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{expr}")?;
    }
    Ok(())
}

pub(crate) fn escape_char(c: char) -> String {
    match c {
        '\n' => "\\n".to_string(),
        '\t' => "\\t".to_string(),
        '\0' => "\\0".to_string(),
        '\\' => "\\\\".to_string(),
        '\'' => "\\'".to_string(),
        c => c.to_string(),
    }
}

pub(crate) fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
    }
    out
}
