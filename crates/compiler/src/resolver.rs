//! Name resolution for B-minor
//!
//! Walks the tree once, classifying every declared name as global, local,
//! or parameter and attaching a shared `Symbol` to each declaration and
//! each use. Locals and register-passed parameters receive their frame
//! slots here; `return` statements learn the name of their enclosing
//! function for the epilogue jump.
//!
//! Diagnostics accumulate so that one run surfaces every resolution error;
//! the driver aborts before type checking if any were recorded.

use crate::ast::{Decl, Expr, ExprKind, Param, Program, Stmt, Type};
use crate::scope::{ScopeStack, Symbol, SymbolKind};
use std::rc::Rc;

pub struct Resolver {
    scopes: ScopeStack,
    current_function: Option<String>,
    pub errors: Vec<String>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    pub fn new() -> Self {
        Resolver {
            scopes: ScopeStack::new(),
            current_function: None,
            errors: Vec::new(),
        }
    }

    pub fn resolve(&mut self, program: &mut Program) {
        for decl in &mut program.decls {
            self.decl_resolve(decl);
        }
    }

    fn decl_resolve(&mut self, d: &mut Decl) {
        let kind = if self.scopes.level() == 1 {
            SymbolKind::Global
        } else {
            SymbolKind::Local {
                slot: self.scopes.next_local_slot(),
            }
        };

        if self.scopes.lookup_current(&d.name).is_some() {
            self.errors
                .push(format!("Variable '{}' was redeclared.", d.name));
        }

        let symbol = Rc::new(Symbol::new(kind, d.ty.clone(), d.name.clone()));
        d.symbol = Some(Rc::clone(&symbol));

        // the initializer is resolved before the name is bound, so it
        // cannot refer to the variable being declared
        if let Some(value) = &mut d.value {
            self.expr_resolve(value);
        }
        self.scopes.bind(&d.name, symbol);

        if let Some(body) = &mut d.body {
            let enclosing = if matches!(d.ty, Type::Function { .. }) {
                self.current_function.replace(d.name.clone())
            } else {
                self.current_function.take()
            };

            // this scope stands in for the body block's own
            self.scopes.enter();
            if let Type::Function { params, .. } = &mut d.ty {
                self.param_list_resolve(params);
            }
            for stmt in body {
                self.stmt_resolve(stmt);
            }
            d.local_var_count = self.scopes.local_count();
            self.scopes.exit();

            self.current_function = enclosing;
        }
    }

    fn param_list_resolve(&mut self, params: &mut [Param]) {
        for (index, param) in params.iter_mut().enumerate() {
            let symbol = Rc::new(Symbol::new(
                SymbolKind::Param { index },
                param.ty.clone(),
                param.name.clone(),
            ));
            param.symbol = Some(Rc::clone(&symbol));
            self.scopes.bind(&param.name, symbol);
        }
    }

    fn stmt_resolve(&mut self, s: &mut Stmt) {
        match s {
            Stmt::Block(stmts) => {
                self.scopes.enter();
                for stmt in stmts {
                    self.stmt_resolve(stmt);
                }
                self.scopes.exit();
            }
            Stmt::Decl(decl) => self.decl_resolve(decl),
            Stmt::Expr(expr) => self.expr_resolve(expr),
            Stmt::IfElse {
                condition,
                body,
                else_body,
            } => {
                self.expr_resolve(condition);
                self.stmt_resolve(body);
                if let Some(else_body) = else_body {
                    self.stmt_resolve(else_body);
                }
            }
            Stmt::For {
                init,
                condition,
                step,
                body,
            } => {
                if let Some(init) = init {
                    self.expr_resolve(init);
                }
                if let Some(condition) = condition {
                    self.expr_resolve(condition);
                }
                if let Some(step) = step {
                    self.expr_resolve(step);
                }
                self.stmt_resolve(body);
            }
            Stmt::Print(args) => {
                for arg in args {
                    self.expr_resolve(arg);
                }
            }
            Stmt::Return {
                value,
                function_name,
            } => {
                match &self.current_function {
                    Some(name) => *function_name = Some(name.clone()),
                    None => self
                        .errors
                        .push("Return statement outside of a function.".to_string()),
                }
                if let Some(value) = value {
                    self.expr_resolve(value);
                }
            }
        }
    }

    fn expr_resolve(&mut self, e: &mut Expr) {
        match &mut e.kind {
            ExprKind::Name(name) => {
                e.symbol = self.scopes.lookup(name);
                if e.symbol.is_none() {
                    self.errors.push(format!(
                        "Identifier '{name}' used before it was declared."
                    ));
                }
            }
            ExprKind::Binary { left, right, .. } | ExprKind::Assign { left, right } => {
                self.expr_resolve(left);
                self.expr_resolve(right);
            }
            ExprKind::Unary { operand, .. }
            | ExprKind::Increment(operand)
            | ExprKind::Decrement(operand) => self.expr_resolve(operand),
            ExprKind::Call { callee, args } => {
                self.expr_resolve(callee);
                for arg in args {
                    self.expr_resolve(arg);
                }
            }
            ExprKind::InitList(elements) => {
                for element in elements {
                    self.expr_resolve(element);
                }
            }
            ExprKind::Subscript { array, index } => {
                self.expr_resolve(array);
                self.expr_resolve(index);
            }
            ExprKind::IntegerLiteral(_)
            | ExprKind::BooleanLiteral(_)
            | ExprKind::CharLiteral(_)
            | ExprKind::StringLiteral(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use crate::scope::SymbolKind;

    fn resolve(source: &str) -> (Program, Vec<String>) {
        let mut program = parse_source(source).unwrap();
        let mut resolver = Resolver::new();
        resolver.resolve(&mut program);
        (program, resolver.errors)
    }

    fn function_body<'a>(program: &'a Program, index: usize) -> &'a [Stmt] {
        program.decls[index].body.as_deref().unwrap()
    }

    #[test]
    fn test_global_and_local_kinds() {
        let (program, errors) = resolve(
            "g: integer = 1;\n\
             f: function void () = { x: integer; }",
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(
            program.decls[0].symbol.as_ref().unwrap().kind,
            SymbolKind::Global
        );
        let Stmt::Decl(local) = &function_body(&program, 1)[0] else {
            panic!("expected a declaration statement");
        };
        assert_eq!(
            local.symbol.as_ref().unwrap().kind,
            SymbolKind::Local { slot: 0 }
        );
    }

    #[test]
    fn test_name_use_gets_declaration_symbol() {
        let (program, errors) = resolve(
            "g: integer = 1;\n\
             f: function integer () = { return g; }",
        );
        assert!(errors.is_empty(), "{errors:?}");
        let Stmt::Return { value, .. } = &function_body(&program, 1)[0] else {
            panic!("expected a return statement");
        };
        let symbol = value.as_ref().unwrap().symbol.as_ref().unwrap();
        assert_eq!(symbol.name, "g");
        assert_eq!(symbol.kind, SymbolKind::Global);
    }

    #[test]
    fn test_redeclaration_in_same_scope() {
        let (_, errors) = resolve("x: integer = 1;\nx: integer = 2;");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("redeclared"), "{}", errors[0]);
    }

    #[test]
    fn test_shadowing_in_inner_scope_is_allowed() {
        let (_, errors) = resolve(
            "x: integer = 1;\n\
             f: function void () = { x: integer = 2; { x: integer = 3; } }",
        );
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn test_undeclared_identifier() {
        let (_, errors) = resolve("f: function integer () = { return y; }");
        assert_eq!(errors.len(), 1);
        assert!(
            errors[0].contains("Identifier 'y' used before it was declared"),
            "{}",
            errors[0]
        );
    }

    #[test]
    fn test_initializer_cannot_reference_own_name() {
        let (_, errors) = resolve("f: function void () = { x: integer = x + 1; }");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("'x'"), "{}", errors[0]);
    }

    #[test]
    fn test_param_indices_and_local_slots() {
        let (program, errors) = resolve(
            "f: function integer (a: integer, b: integer) = {\n\
                 x: integer;\n\
                 y: integer;\n\
                 return x;\n\
             }",
        );
        assert!(errors.is_empty(), "{errors:?}");
        let Type::Function { params, .. } = &program.decls[0].ty else {
            panic!("expected a function type");
        };
        assert_eq!(
            params[0].symbol.as_ref().unwrap().kind,
            SymbolKind::Param { index: 0 }
        );
        assert_eq!(
            params[1].symbol.as_ref().unwrap().kind,
            SymbolKind::Param { index: 1 }
        );

        // locals sit after the register-spilled parameters, in order
        let body = function_body(&program, 0);
        let slots: Vec<_> = body[..2]
            .iter()
            .map(|s| {
                let Stmt::Decl(d) = s else {
                    panic!("expected a declaration");
                };
                d.symbol.as_ref().unwrap().kind
            })
            .collect();
        assert_eq!(
            slots,
            vec![SymbolKind::Local { slot: 2 }, SymbolKind::Local { slot: 3 }]
        );
    }

    #[test]
    fn test_local_var_count_covers_function_scope() {
        let (program, errors) = resolve(
            "f: function void () = { a: integer; b: integer; c: integer; }",
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(program.decls[0].local_var_count, 3);
    }

    #[test]
    fn test_return_learns_enclosing_function_name() {
        let (program, errors) = resolve("f: function integer () = { return 1; }");
        assert!(errors.is_empty(), "{errors:?}");
        let Stmt::Return { function_name, .. } = &function_body(&program, 0)[0] else {
            panic!("expected a return statement");
        };
        assert_eq!(function_name.as_deref(), Some("f"));
    }

    #[test]
    fn test_return_in_nested_block() {
        let (program, errors) =
            resolve("f: function integer () = { { return 1; } }");
        assert!(errors.is_empty(), "{errors:?}");
        let Stmt::Block(stmts) = &function_body(&program, 0)[0] else {
            panic!("expected a block");
        };
        let Stmt::Return { function_name, .. } = &stmts[0] else {
            panic!("expected a return statement");
        };
        assert_eq!(function_name.as_deref(), Some("f"));
    }

    #[test]
    fn test_function_can_call_itself() {
        let (_, errors) = resolve(
            "f: function integer (n: integer) = { return f(n - 1); }",
        );
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn test_later_global_is_not_visible_earlier() {
        let (_, errors) = resolve(
            "f: function integer () = { return g; }\ng: integer = 1;",
        );
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("'g'"), "{}", errors[0]);
    }
}
