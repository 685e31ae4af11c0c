//! Type checking for B-minor
//!
//! Bottom-up: `expr_typecheck` computes the type of every expression,
//! attaches it to the node, and reports rule violations along the way. On
//! error a reasonable fallback type is installed so the walk always
//! finishes with every reachable expression annotated, and so one run
//! surfaces every type error.
//!
//! Assignment compatibility is judged by type kind alone; declaration
//! initializers use full structural equality.

use crate::ast::{Decl, Expr, ExprKind, Program, Stmt, Type, UnaryOp};
use crate::scope::SymbolKind;

pub struct TypeChecker {
    pub errors: Vec<String>,
}

impl Default for TypeChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// A literal, or an init list made entirely of compile-time constants.
pub fn is_compile_time_constant(e: &Expr) -> bool {
    match &e.kind {
        ExprKind::IntegerLiteral(_)
        | ExprKind::BooleanLiteral(_)
        | ExprKind::CharLiteral(_)
        | ExprKind::StringLiteral(_) => true,
        ExprKind::InitList(elements) => elements.iter().all(is_compile_time_constant),
        _ => false,
    }
}

fn same_kind(a: &Type, b: &Type) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

impl TypeChecker {
    pub fn new() -> Self {
        TypeChecker { errors: Vec::new() }
    }

    pub fn check(&mut self, program: &mut Program) {
        for decl in &mut program.decls {
            self.decl_typecheck(decl);
        }
    }

    fn error(&mut self, message: String) {
        self.errors.push(message);
    }

    fn decl_typecheck(&mut self, d: &mut Decl) {
        if let Type::Array { size, .. } = &mut d.ty {
            if d.value.is_none() && size.is_none() {
                self.errors.push(format!(
                    "Type error: cannot infer size for array '{}'; \
                     a size expression or initial value must be included.",
                    d.name
                ));
            }
            if let Some(size) = size {
                let st = self.expr_typecheck(size);
                if !matches!(st, Type::Integer) {
                    self.errors.push(format!(
                        "Type error: array size expression must be an integer. \
                         Got ({size}), which is of type ({st})."
                    ));
                }
            }
        }

        if let Some(value) = &mut d.value {
            let vt = self.expr_typecheck(value);
            if !vt.equals(&d.ty) {
                self.errors.push(format!(
                    "Type error: cannot assign to a variable of a different type. \
                     Got declaration ({}: {} = {}), which is of type ({}) = ({vt}).",
                    d.name, d.ty, value, d.ty
                ));
            }

            if let Type::Array {
                size: Some(size), ..
            } = &d.ty
            {
                if !is_compile_time_constant(size) {
                    self.errors.push(format!(
                        "Type error: array size expression must be a compile-time constant. \
                         Found: ({size})."
                    ));
                }
            }

            // only compile-time constants may initialize globals
            let is_global = d
                .symbol
                .as_ref()
                .is_some_and(|s| s.kind == SymbolKind::Global);
            if is_global && !is_compile_time_constant(value) {
                self.errors.push(format!(
                    "Type error: global initializer values must be compile-time constants. \
                     Found: ({value})."
                ));
            }
        }

        if let Some(body) = &mut d.body {
            for stmt in body {
                self.stmt_typecheck(stmt);
            }
        }
    }

    fn stmt_typecheck(&mut self, s: &mut Stmt) {
        match s {
            Stmt::Decl(decl) => self.decl_typecheck(decl),
            Stmt::Expr(expr) => {
                self.expr_typecheck(expr);
            }
            Stmt::IfElse {
                condition,
                body,
                else_body,
            } => {
                let ct = self.expr_typecheck(condition);
                if !matches!(ct, Type::Boolean) {
                    self.error(format!(
                        "Type error: if statement condition must be a boolean. \
                         Got ({condition}), which is of type ({ct})."
                    ));
                }
                self.stmt_typecheck(body);
                if let Some(else_body) = else_body {
                    self.stmt_typecheck(else_body);
                }
            }
            Stmt::For {
                init,
                condition,
                step,
                body,
            } => {
                if let Some(init) = init {
                    self.expr_typecheck(init);
                }
                if let Some(condition) = condition {
                    let ct = self.expr_typecheck(condition);
                    if !matches!(ct, Type::Boolean) {
                        self.error(format!(
                            "Type error: for loop condition must be a boolean. \
                             Got ({condition}), which is of type ({ct})."
                        ));
                    }
                }
                if let Some(step) = step {
                    self.expr_typecheck(step);
                }
                self.stmt_typecheck(body);
            }
            Stmt::Print(args) => {
                for arg in args {
                    self.expr_typecheck(arg);
                }
            }
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    self.expr_typecheck(value);
                }
            }
            Stmt::Block(stmts) => {
                for stmt in stmts {
                    self.stmt_typecheck(stmt);
                }
            }
        }
    }

    /// Compute, attach, and return the type of `e`.
    fn expr_typecheck(&mut self, e: &mut Expr) -> Type {
        let result = match &mut e.kind {
            ExprKind::Binary { op, left, right } => {
                let op = *op;
                let lt = self.expr_typecheck(left);
                let rt = self.expr_typecheck(right);
                if op.is_arithmetic() {
                    if !matches!(lt, Type::Integer) || !matches!(rt, Type::Integer) {
                        self.error(format!(
                            "Type error: arithmetic operations require integers. \
                             Got ({left} {} {right}), which is of type ({lt}) {} ({rt}).",
                            op.token(),
                            op.token()
                        ));
                    }
                    Type::Integer
                } else if op.is_logical() {
                    if !matches!(lt, Type::Boolean) || !matches!(rt, Type::Boolean) {
                        self.error(format!(
                            "Type error: logical operators require boolean arguments. \
                             Got ({left} {} {right}), which is of type ({lt}) {} ({rt}).",
                            op.token(),
                            op.token()
                        ));
                    }
                    Type::Boolean
                } else if op.is_equality() {
                    if !lt.equals(&rt) {
                        self.error(format!(
                            "Type error: comparison operators may only be used on two values \
                             of the same type. Got ({left} {} {right}), which is of type \
                             ({lt}) {} ({rt}).",
                            op.token(),
                            op.token()
                        ));
                    }
                    if !lt.is_atomic() {
                        self.error(format!(
                            "Type error: cannot compare values of non-atomic types. \
                             Got ({left} {} {right}), which is of type ({lt}).",
                            op.token()
                        ));
                    }
                    Type::Boolean
                } else {
                    if !matches!(lt, Type::Integer) || !matches!(rt, Type::Integer) {
                        self.error(format!(
                            "Type error: cannot use relative comparison operators on \
                             non-integer types. Got ({left} {} {right}), with operands of \
                             type ({lt}), ({rt}).",
                            op.token()
                        ));
                    }
                    Type::Boolean
                }
            }
            ExprKind::Unary { op, operand } => {
                let op = *op;
                let ot = self.expr_typecheck(operand);
                match op {
                    UnaryOp::Negate => {
                        if !matches!(ot, Type::Integer) {
                            self.error(format!(
                                "Type error: negate operator requires an integer. \
                                 Got (-{operand}), which is of type ({ot})."
                            ));
                        }
                        Type::Integer
                    }
                    UnaryOp::Not => {
                        if !matches!(ot, Type::Boolean) {
                            self.error(format!(
                                "Type error: logical negation requires a boolean. \
                                 Got (!{operand}), which is of type ({ot})."
                            ));
                        }
                        Type::Boolean
                    }
                }
            }
            ExprKind::Assign { left, right } => {
                let lt = self.expr_typecheck(left);
                let rt = self.expr_typecheck(right);
                if !same_kind(&lt, &rt) {
                    self.error(format!(
                        "Type error: cannot assign to a variable of a different type. \
                         Got ({left} = {right}), which is of type ({lt}) = ({rt})."
                    ));
                }
                lt
            }
            ExprKind::Increment(operand) => {
                let ot = self.expr_typecheck(operand);
                if !matches!(ot, Type::Integer) {
                    self.error(format!(
                        "Type error: cannot use increment operator on a non-integer. \
                         Got ({operand}++), which is of type ({ot})."
                    ));
                }
                Type::Integer
            }
            ExprKind::Decrement(operand) => {
                let ot = self.expr_typecheck(operand);
                if !matches!(ot, Type::Integer) {
                    self.error(format!(
                        "Type error: cannot use decrement operator on a non-integer. \
                         Got ({operand}--), which is of type ({ot})."
                    ));
                }
                Type::Integer
            }
            ExprKind::IntegerLiteral(_) => Type::Integer,
            ExprKind::BooleanLiteral(_) => Type::Boolean,
            ExprKind::CharLiteral(_) => Type::Char,
            ExprKind::StringLiteral(_) => Type::String,
            // an unresolved name already produced a resolver error; fall
            // back to integer so checking can continue
            ExprKind::Name(_) => match &e.symbol {
                Some(symbol) => symbol.ty.clone(),
                None => Type::Integer,
            },
            ExprKind::Call { callee, args } => {
                let ct = self.expr_typecheck(callee);
                for arg in args {
                    self.expr_typecheck(arg);
                }
                match ct {
                    Type::Function { return_type, .. } => *return_type,
                    other => {
                        self.error(format!(
                            "Type error: call target is not a function. \
                             Got ({callee}), which is of type ({other})."
                        ));
                        Type::Integer
                    }
                }
            }
            ExprKind::InitList(elements) => {
                let mut first = None;
                for element in elements {
                    let et = self.expr_typecheck(element);
                    if first.is_none() {
                        first = Some(et);
                    }
                }
                Type::Array {
                    subtype: Box::new(first.unwrap_or(Type::Integer)),
                    size: None,
                }
            }
            ExprKind::Subscript { array, index } => {
                let at = self.expr_typecheck(array);
                let it = self.expr_typecheck(index);
                match at {
                    Type::Array { subtype, .. } => {
                        if !matches!(it, Type::Integer) {
                            self.error(format!(
                                "Type error: array subscript must be an integer. \
                                 Got ({index}), which is of type ({it})."
                            ));
                        }
                        *subtype
                    }
                    other => {
                        self.error(format!(
                            "Type error: subscript target is not an array. \
                             Got ({array}), which is of type ({other})."
                        ));
                        other
                    }
                }
            }
        };

        e.ty = Some(result.clone());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use crate::resolver::Resolver;

    fn check(source: &str) -> (Program, Vec<String>) {
        let mut program = parse_source(source).unwrap();
        let mut resolver = Resolver::new();
        resolver.resolve(&mut program);
        assert!(resolver.errors.is_empty(), "{:?}", resolver.errors);
        let mut checker = TypeChecker::new();
        checker.check(&mut program);
        (program, checker.errors)
    }

    fn check_ok(source: &str) -> Program {
        let (program, errors) = check(source);
        assert!(errors.is_empty(), "{errors:?}");
        program
    }

    fn check_err(source: &str) -> Vec<String> {
        let (_, errors) = check(source);
        assert!(!errors.is_empty(), "expected a type error");
        errors
    }

    #[test]
    fn test_arithmetic_requires_integers() {
        check_ok("f: function integer () = { return 1 + 2 * 3 % 4; }");
        let errors = check_err("f: function integer () = { return 1 + true; }");
        assert!(errors[0].contains("arithmetic"), "{}", errors[0]);
    }

    #[test]
    fn test_logical_requires_booleans() {
        check_ok("f: function boolean () = { return true && !false || true; }");
        let errors = check_err("f: function boolean () = { return 1 || true; }");
        assert!(errors[0].contains("boolean"), "{}", errors[0]);
    }

    #[test]
    fn test_equality_requires_matching_atomic_types() {
        check_ok("f: function boolean (c: char) = { return c == 'x'; }");
        let errors = check_err("f: function boolean () = { return 1 == 'c'; }");
        assert!(errors[0].contains("same type"), "{}", errors[0]);

        let errors = check_err(
            "a: array [2] integer = {1, 2};\n\
             b: array [2] integer = {3, 4};\n\
             f: function boolean () = { return a == b; }",
        );
        assert!(errors[0].contains("non-atomic"), "{}", errors[0]);
    }

    #[test]
    fn test_relational_requires_integers() {
        check_ok("f: function boolean () = { return 1 < 2; }");
        let errors = check_err("f: function boolean () = { return 'a' < 'b'; }");
        assert!(errors[0].contains("non-integer"), "{}", errors[0]);
    }

    #[test]
    fn test_every_expression_gets_a_type() {
        let program = check_ok(
            "f: function integer (n: integer) = {\n\
                 s: string = \"x\";\n\
                 for (n = 0; n < 3; n++) {\n\
                     print s, n;\n\
                 }\n\
                 return n;\n\
             }",
        );
        fn assert_typed(e: &Expr) {
            assert!(e.ty.is_some(), "untyped expression: {e}");
            match &e.kind {
                ExprKind::Binary { left, right, .. } | ExprKind::Assign { left, right } => {
                    assert_typed(left);
                    assert_typed(right);
                }
                ExprKind::Unary { operand, .. }
                | ExprKind::Increment(operand)
                | ExprKind::Decrement(operand) => assert_typed(operand),
                ExprKind::Call { callee, args } => {
                    assert_typed(callee);
                    args.iter().for_each(assert_typed);
                }
                ExprKind::InitList(elements) => elements.iter().for_each(assert_typed),
                ExprKind::Subscript { array, index } => {
                    assert_typed(array);
                    assert_typed(index);
                }
                _ => {}
            }
        }
        fn walk(s: &Stmt) {
            match s {
                Stmt::Decl(d) => {
                    if let Some(v) = &d.value {
                        assert_typed(v);
                    }
                }
                Stmt::Expr(e) => assert_typed(e),
                Stmt::IfElse {
                    condition,
                    body,
                    else_body,
                } => {
                    assert_typed(condition);
                    walk(body);
                    if let Some(else_body) = else_body {
                        walk(else_body);
                    }
                }
                Stmt::For {
                    init,
                    condition,
                    step,
                    body,
                } => {
                    init.iter().for_each(assert_typed);
                    condition.iter().for_each(assert_typed);
                    step.iter().for_each(assert_typed);
                    walk(body);
                }
                Stmt::Print(args) => args.iter().for_each(assert_typed),
                Stmt::Return { value, .. } => value.iter().for_each(assert_typed),
                Stmt::Block(stmts) => stmts.iter().for_each(walk),
            }
        }
        for stmt in program.decls[0].body.as_ref().unwrap() {
            walk(stmt);
        }
    }

    #[test]
    fn test_assignment_type_mismatch() {
        let errors = check_err(
            "main: function integer () = { x: integer = 1; x = \"hi\"; return 0; }",
        );
        assert!(
            errors[0].contains("cannot assign to a variable of a different type"),
            "{}",
            errors[0]
        );
    }

    #[test]
    fn test_global_initializer_must_be_constant() {
        let errors = check_err("a: integer = 1;\nb: integer = a + 1;");
        assert!(
            errors[0].contains("compile-time constants"),
            "{}",
            errors[0]
        );
    }

    #[test]
    fn test_local_initializer_may_be_computed() {
        check_ok("f: function void (n: integer) = { x: integer = n + 1; }");
    }

    #[test]
    fn test_declaration_initializer_type_must_match() {
        let errors = check_err("x: integer = \"hi\";");
        assert!(errors[0].contains("different type"), "{}", errors[0]);
    }

    #[test]
    fn test_array_needs_size_or_initializer() {
        let errors = check_err("a: array [] integer;");
        assert!(errors[0].contains("cannot infer size"), "{}", errors[0]);
        check_ok("a: array [] integer = {1, 2};");
        check_ok("a: array [4] integer;");
    }

    #[test]
    fn test_array_size_must_be_integer() {
        let errors = check_err("a: array [true] integer;");
        assert!(errors[0].contains("must be an integer"), "{}", errors[0]);
    }

    #[test]
    fn test_array_size_with_initializer_must_be_constant() {
        let errors = check_err(
            "f: function void (n: integer) = { a: array [n] integer = {1}; }",
        );
        assert!(
            errors.iter().any(|e| e.contains("compile-time constant")),
            "{errors:?}"
        );
    }

    #[test]
    fn test_init_list_of_constants_is_constant() {
        check_ok("a: array [3] integer = {1, 2, 3};");
    }

    #[test]
    fn test_subscript_rules() {
        check_ok(
            "a: array [3] integer = {1, 2, 3};\n\
             f: function integer (i: integer) = { return a[i + 1]; }",
        );
        let errors = check_err(
            "x: integer = 1;\nf: function integer () = { return x[0]; }",
        );
        assert!(errors[0].contains("not an array"), "{}", errors[0]);

        let errors = check_err(
            "a: array [3] integer = {1, 2, 3};\n\
             f: function integer () = { return a[true]; }",
        );
        assert!(errors[0].contains("subscript must be an integer"), "{}", errors[0]);
    }

    #[test]
    fn test_call_returns_callee_return_type() {
        let program = check_ok(
            "half: function integer (n: integer) = { return n / 2; }\n\
             f: function boolean () = { return half(4) == 2; }",
        );
        let Stmt::Return { value, .. } = &program.decls[1].body.as_ref().unwrap()[0] else {
            panic!("expected a return statement");
        };
        let ExprKind::Binary { left, .. } = &value.as_ref().unwrap().kind else {
            panic!("expected a comparison");
        };
        assert_eq!(left.ty, Some(Type::Integer));
    }

    #[test]
    fn test_call_of_non_function() {
        let errors = check_err(
            "x: integer = 1;\nf: function void () = { x(); }",
        );
        assert!(errors[0].contains("not a function"), "{}", errors[0]);
    }

    #[test]
    fn test_condition_must_be_boolean() {
        let errors = check_err("f: function void () = { if (1) { } }");
        assert!(errors[0].contains("if statement condition"), "{}", errors[0]);

        let errors = check_err("f: function void () = { for (; 1; ) { } }");
        assert!(errors[0].contains("for loop condition"), "{}", errors[0]);

        // an absent condition is an infinite loop, not an error
        check_ok("f: function void () = { for (;;) { } }");
    }

    #[test]
    fn test_increment_requires_integer() {
        check_ok("f: function void (n: integer) = { n++; n--; }");
        let errors = check_err("f: function void (b: boolean) = { b++; }");
        assert!(errors[0].contains("increment"), "{}", errors[0]);
    }

    #[test]
    fn test_multiple_errors_surface_in_one_run() {
        let errors = check_err(
            "f: function void () = { x: integer = true; y: boolean = 1; }",
        );
        assert_eq!(errors.len(), 2, "{errors:?}");
    }

    #[test]
    fn test_undeclared_name_falls_back_to_integer() {
        // resolution fails, but the checker still annotates with a fallback
        let mut program = parse_source("f: function integer () = { return y + 1; }").unwrap();
        let mut resolver = Resolver::new();
        resolver.resolve(&mut program);
        assert!(!resolver.errors.is_empty());
        let mut checker = TypeChecker::new();
        checker.check(&mut program);
        assert!(checker.errors.is_empty(), "{:?}", checker.errors);
    }
}
