//! Tokenizer and recursive-descent parser for B-minor
//!
//! Declarations read `name: type` with an optional `= value` initializer;
//! function declarations take a block body. Expressions follow the usual
//! C-like precedence ladder with `=` loosest and postfix tightest.
//!
//! The parser builds the `ast` tree with every annotation field empty.

use crate::ast::{BinaryOp, Decl, Expr, ExprKind, Param, Program, Stmt, Type, UnaryOp};

const KEYWORDS: &[&str] = &[
    "array", "boolean", "char", "else", "false", "for", "function", "if", "integer", "print",
    "return", "string", "true", "void",
];

/// What a token is; literal tokens carry their decoded value in `text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Keyword,
    Integer,
    CharLiteral,
    StringLiteral,
    /// Operators and punctuation.
    Symbol,
}

/// A token with source position information.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// Line number (0-indexed).
    pub line: usize,
    /// Column number (0-indexed).
    pub column: usize,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, line: usize, column: usize) -> Self {
        Token {
            kind,
            text: text.into(),
            line,
            column,
        }
    }

    fn is_symbol(&self, text: &str) -> bool {
        self.kind == TokenKind::Symbol && self.text == text
    }

    fn is_keyword(&self, text: &str) -> bool {
        self.kind == TokenKind::Keyword && self.text == text
    }
}

/// Split source text into tokens. `//` and `/* */` comments are skipped;
/// string and char literals are decoded here, so the parser only ever sees
/// their actual values.
pub fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line = 0;
    let mut column = 0;

    macro_rules! bump {
        () => {{
            if chars[i] == '\n' {
                line += 1;
                column = 0;
            } else {
                column += 1;
            }
            i += 1;
        }};
    }

    while i < chars.len() {
        let c = chars[i];
        let (tok_line, tok_column) = (line, column);

        if c.is_whitespace() {
            bump!();
            continue;
        }

        // line comment
        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                bump!();
            }
            continue;
        }

        // block comment
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            bump!();
            bump!();
            loop {
                if i >= chars.len() {
                    return Err(format!(
                        "line {}: unterminated block comment",
                        tok_line + 1
                    ));
                }
                if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                    bump!();
                    bump!();
                    break;
                }
                bump!();
            }
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                bump!();
            }
            let text: String = chars[start..i].iter().collect();
            let kind = if KEYWORDS.contains(&text.as_str()) {
                TokenKind::Keyword
            } else {
                TokenKind::Identifier
            };
            tokens.push(Token::new(kind, text, tok_line, tok_column));
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                bump!();
            }
            let text: String = chars[start..i].iter().collect();
            tokens.push(Token::new(TokenKind::Integer, text, tok_line, tok_column));
            continue;
        }

        if c == '\'' {
            bump!();
            let value = if i < chars.len() && chars[i] == '\\' {
                bump!();
                let escaped = *chars
                    .get(i)
                    .ok_or_else(|| format!("line {}: unterminated char literal", tok_line + 1))?;
                bump!();
                decode_escape(escaped)
                    .ok_or_else(|| format!("line {}: unknown escape '\\{escaped}'", tok_line + 1))?
            } else {
                let value = *chars
                    .get(i)
                    .ok_or_else(|| format!("line {}: unterminated char literal", tok_line + 1))?;
                bump!();
                value
            };
            if i >= chars.len() || chars[i] != '\'' {
                return Err(format!("line {}: unterminated char literal", tok_line + 1));
            }
            bump!();
            tokens.push(Token::new(
                TokenKind::CharLiteral,
                value,
                tok_line,
                tok_column,
            ));
            continue;
        }

        if c == '"' {
            bump!();
            let mut value = String::new();
            loop {
                let c = *chars
                    .get(i)
                    .ok_or_else(|| format!("line {}: unterminated string literal", tok_line + 1))?;
                if c == '"' {
                    bump!();
                    break;
                }
                if c == '\n' {
                    return Err(format!(
                        "line {}: unterminated string literal",
                        tok_line + 1
                    ));
                }
                if c == '\\' {
                    bump!();
                    let escaped = *chars.get(i).ok_or_else(|| {
                        format!("line {}: unterminated string literal", tok_line + 1)
                    })?;
                    bump!();
                    value.push(decode_escape(escaped).ok_or_else(|| {
                        format!("line {}: unknown escape '\\{escaped}'", tok_line + 1)
                    })?);
                } else {
                    value.push(c);
                    bump!();
                }
            }
            tokens.push(Token::new(
                TokenKind::StringLiteral,
                value,
                tok_line,
                tok_column,
            ));
            continue;
        }

        // two-character operators before their one-character prefixes
        let two: String = chars[i..chars.len().min(i + 2)].iter().collect();
        if matches!(two.as_str(), "==" | "!=" | "<=" | ">=" | "&&" | "||" | "++" | "--") {
            bump!();
            bump!();
            tokens.push(Token::new(TokenKind::Symbol, two, tok_line, tok_column));
            continue;
        }

        if "+-*/%^=<>!(){}[];:,".contains(c) {
            bump!();
            tokens.push(Token::new(TokenKind::Symbol, c, tok_line, tok_column));
            continue;
        }

        return Err(format!(
            "line {}: unexpected character '{c}'",
            tok_line + 1
        ));
    }

    Ok(tokens)
}

fn decode_escape(c: char) -> Option<char> {
    match c {
        'n' => Some('\n'),
        't' => Some('\t'),
        '0' => Some('\0'),
        '\\' => Some('\\'),
        '\'' => Some('\''),
        '"' => Some('"'),
        _ => None,
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(source: &str) -> Result<Self, String> {
        Ok(Parser {
            tokens: tokenize(source)?,
            pos: 0,
        })
    }

    /// Parse a whole translation unit: declarations until end of input.
    pub fn parse(&mut self) -> Result<Program, String> {
        let mut program = Program::new();
        while !self.is_at_end() {
            program.decls.push(self.parse_decl()?);
        }
        Ok(program)
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn check_symbol(&self, text: &str) -> bool {
        self.peek().is_some_and(|t| t.is_symbol(text))
    }

    fn check_keyword(&self, text: &str) -> bool {
        self.peek().is_some_and(|t| t.is_keyword(text))
    }

    /// Consume a symbol token if it is next; report whether it was there.
    fn eat_symbol(&mut self, text: &str) -> bool {
        if self.check_symbol(text) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, text: &str) -> bool {
        if self.check_keyword(text) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, text: &str) -> Result<(), String> {
        if self.eat_symbol(text) {
            Ok(())
        } else {
            Err(self.error_at(&format!("expected '{text}'")))
        }
    }

    fn expect_identifier(&mut self, what: &str) -> Result<String, String> {
        match self.peek() {
            Some(t) if t.kind == TokenKind::Identifier => {
                let name = t.text.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error_at(&format!("expected {what}"))),
        }
    }

    fn error_at(&self, message: &str) -> String {
        match self.peek() {
            Some(t) => format!(
                "line {}, column {}: {message}, found '{}'",
                t.line + 1,
                t.column + 1,
                t.text
            ),
            None => format!("{message}, found end of input"),
        }
    }

    /// `name : type [= initializer | = { body }] ;`
    fn parse_decl(&mut self) -> Result<Decl, String> {
        let name = self.expect_identifier("a declaration name")?;
        self.expect_symbol(":")?;
        let ty = self.parse_type()?;

        let mut value = None;
        let mut body = None;
        if self.eat_symbol("=") {
            if matches!(ty, Type::Function { .. }) {
                if !self.check_symbol("{") {
                    return Err(self.error_at("expected '{' to begin a function body"));
                }
                body = Some(self.parse_block_stmts()?);
            } else {
                value = Some(self.parse_expr()?);
            }
        }

        if body.is_some() {
            // trailing semicolon after a function body is tolerated
            self.eat_symbol(";");
        } else {
            self.expect_symbol(";")?;
        }

        Ok(Decl::new(name, ty, value, body))
    }

    fn parse_type(&mut self) -> Result<Type, String> {
        if self.eat_keyword("void") {
            return Ok(Type::Void);
        }
        if self.eat_keyword("boolean") {
            return Ok(Type::Boolean);
        }
        if self.eat_keyword("char") {
            return Ok(Type::Char);
        }
        if self.eat_keyword("integer") {
            return Ok(Type::Integer);
        }
        if self.eat_keyword("string") {
            return Ok(Type::String);
        }
        if self.eat_keyword("array") {
            self.expect_symbol("[")?;
            let size = if self.check_symbol("]") {
                None
            } else {
                Some(Box::new(self.parse_expr()?))
            };
            self.expect_symbol("]")?;
            let subtype = Box::new(self.parse_type()?);
            return Ok(Type::Array { subtype, size });
        }
        if self.eat_keyword("function") {
            let return_type = Box::new(self.parse_type()?);
            self.expect_symbol("(")?;
            let mut params = Vec::new();
            if !self.check_symbol(")") {
                loop {
                    let name = self.expect_identifier("a parameter name")?;
                    self.expect_symbol(":")?;
                    let ty = self.parse_type()?;
                    params.push(Param::new(name, ty));
                    if !self.eat_symbol(",") {
                        break;
                    }
                }
            }
            self.expect_symbol(")")?;
            return Ok(Type::Function {
                return_type,
                params,
            });
        }
        Err(self.error_at("expected a type"))
    }

    /// The statements of a `{ ... }` block, consuming both braces.
    fn parse_block_stmts(&mut self) -> Result<Vec<Stmt>, String> {
        self.expect_symbol("{")?;
        let mut stmts = Vec::new();
        while !self.check_symbol("}") {
            if self.is_at_end() {
                return Err(self.error_at("expected '}'"));
            }
            stmts.push(self.parse_stmt()?);
        }
        self.expect_symbol("}")?;
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, String> {
        if self.check_symbol("{") {
            return Ok(Stmt::Block(self.parse_block_stmts()?));
        }

        if self.eat_keyword("if") {
            self.expect_symbol("(")?;
            let condition = self.parse_expr()?;
            self.expect_symbol(")")?;
            let body = Box::new(self.parse_stmt()?);
            let else_body = if self.eat_keyword("else") {
                Some(Box::new(self.parse_stmt()?))
            } else {
                None
            };
            return Ok(Stmt::IfElse {
                condition,
                body,
                else_body,
            });
        }

        if self.eat_keyword("for") {
            self.expect_symbol("(")?;
            let init = if self.check_symbol(";") {
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.expect_symbol(";")?;
            let condition = if self.check_symbol(";") {
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.expect_symbol(";")?;
            let step = if self.check_symbol(")") {
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.expect_symbol(")")?;
            let body = Box::new(self.parse_stmt()?);
            return Ok(Stmt::For {
                init,
                condition,
                step,
                body,
            });
        }

        if self.eat_keyword("print") {
            let mut args = Vec::new();
            if !self.check_symbol(";") {
                loop {
                    args.push(self.parse_expr()?);
                    if !self.eat_symbol(",") {
                        break;
                    }
                }
            }
            self.expect_symbol(";")?;
            return Ok(Stmt::Print(args));
        }

        if self.eat_keyword("return") {
            let value = if self.check_symbol(";") {
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.expect_symbol(";")?;
            return Ok(Stmt::Return {
                value,
                function_name: None,
            });
        }

        // `name :` opens a declaration; anything else is an expression
        if self.peek().is_some_and(|t| t.kind == TokenKind::Identifier)
            && self.peek_at(1).is_some_and(|t| t.is_symbol(":"))
        {
            return Ok(Stmt::Decl(Box::new(self.parse_decl()?)));
        }

        let expr = self.parse_expr()?;
        self.expect_symbol(";")?;
        Ok(Stmt::Expr(expr))
    }

    pub fn parse_expr(&mut self) -> Result<Expr, String> {
        self.parse_assign()
    }

    fn parse_assign(&mut self) -> Result<Expr, String> {
        let left = self.parse_or()?;
        if self.eat_symbol("=") {
            let right = self.parse_assign()?;
            return Ok(Expr::new(ExprKind::Assign {
                left: Box::new(left),
                right: Box::new(right),
            }));
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.eat_symbol("||") {
            let right = self.parse_and()?;
            left = Expr::binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_comparison()?;
        while self.eat_symbol("&&") {
            let right = self.parse_comparison()?;
            left = Expr::binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_additive()?;
        loop {
            let op = if self.eat_symbol("==") {
                BinaryOp::Eq
            } else if self.eat_symbol("!=") {
                BinaryOp::NotEq
            } else if self.eat_symbol("<=") {
                BinaryOp::LtEq
            } else if self.eat_symbol(">=") {
                BinaryOp::GtEq
            } else if self.eat_symbol("<") {
                BinaryOp::Lt
            } else if self.eat_symbol(">") {
                BinaryOp::Gt
            } else {
                return Ok(left);
            };
            let right = self.parse_additive()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_term()?;
        loop {
            let op = if self.eat_symbol("+") {
                BinaryOp::Add
            } else if self.eat_symbol("-") {
                BinaryOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.parse_term()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn parse_term(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_exponent()?;
        loop {
            let op = if self.eat_symbol("*") {
                BinaryOp::Mul
            } else if self.eat_symbol("/") {
                BinaryOp::Div
            } else if self.eat_symbol("%") {
                BinaryOp::Modulo
            } else {
                return Ok(left);
            };
            let right = self.parse_exponent()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn parse_exponent(&mut self) -> Result<Expr, String> {
        let left = self.parse_unary()?;
        if self.eat_symbol("^") {
            // right-associative
            let right = self.parse_exponent()?;
            return Ok(Expr::binary(BinaryOp::Exponent, left, right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        let op = if self.eat_symbol("-") {
            UnaryOp::Negate
        } else if self.eat_symbol("!") {
            UnaryOp::Not
        } else {
            return self.parse_postfix();
        };
        let operand = self.parse_unary()?;
        Ok(Expr::new(ExprKind::Unary {
            op,
            operand: Box::new(operand),
        }))
    }

    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_symbol("++") {
                expr = Expr::new(ExprKind::Increment(Box::new(expr)));
            } else if self.eat_symbol("--") {
                expr = Expr::new(ExprKind::Decrement(Box::new(expr)));
            } else if self.check_symbol("[") {
                self.expect_symbol("[")?;
                let index = self.parse_expr()?;
                self.expect_symbol("]")?;
                expr = Expr::new(ExprKind::Subscript {
                    array: Box::new(expr),
                    index: Box::new(index),
                });
            } else if self.check_symbol("(") {
                if !matches!(expr.kind, ExprKind::Name(_)) {
                    return Err(self.error_at("call target must be a function name"));
                }
                self.expect_symbol("(")?;
                let mut args = Vec::new();
                if !self.check_symbol(")") {
                    loop {
                        args.push(self.parse_expr()?);
                        if !self.eat_symbol(",") {
                            break;
                        }
                    }
                }
                self.expect_symbol(")")?;
                expr = Expr::new(ExprKind::Call {
                    callee: Box::new(expr),
                    args,
                });
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        if self.eat_keyword("true") {
            return Ok(Expr::boolean(true));
        }
        if self.eat_keyword("false") {
            return Ok(Expr::boolean(false));
        }

        if self.eat_symbol("(") {
            let expr = self.parse_expr()?;
            self.expect_symbol(")")?;
            return Ok(expr);
        }

        if self.check_symbol("{") {
            self.expect_symbol("{")?;
            let mut elements = Vec::new();
            if self.check_symbol("}") {
                return Err(self.error_at("initializer lists must not be empty"));
            }
            loop {
                elements.push(self.parse_expr()?);
                if !self.eat_symbol(",") {
                    break;
                }
            }
            self.expect_symbol("}")?;
            return Ok(Expr::new(ExprKind::InitList(elements)));
        }

        let Some(token) = self.peek() else {
            return Err(self.error_at("expected an expression"));
        };
        match token.kind {
            TokenKind::Integer => {
                let text = token.text.clone();
                let line = token.line;
                self.pos += 1;
                let value: i64 = text
                    .parse()
                    .map_err(|_| format!("line {}: integer literal '{text}' out of range", line + 1))?;
                Ok(Expr::integer(value))
            }
            TokenKind::CharLiteral => {
                let c = token.text.chars().next().unwrap_or('\0');
                self.pos += 1;
                Ok(Expr::new(ExprKind::CharLiteral(c)))
            }
            TokenKind::StringLiteral => {
                let s = token.text.clone();
                self.pos += 1;
                Ok(Expr::new(ExprKind::StringLiteral(s)))
            }
            TokenKind::Identifier => {
                let name = token.text.clone();
                self.pos += 1;
                Ok(Expr::name(name))
            }
            _ => Err(self.error_at("expected an expression")),
        }
    }
}

/// Parse a complete source text.
pub fn parse_source(source: &str) -> Result<Program, String> {
    Parser::new(source)?.parse()
}
