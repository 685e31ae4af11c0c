//! Scope stack and symbols
//!
//! A bounded stack of name-to-symbol maps. The bottom frame is the global
//! scope; each function body and each nested block pushes a fresh frame.
//! Binding a local mints its stack slot from the frame's counters, so slot
//! order follows declaration order.

use crate::ast::Type;
use std::collections::HashMap;
use std::rc::Rc;

/// Hard bound on nesting depth.
pub const SCOPE_STACK_MAX: usize = 256;

/// Number of integer argument registers in the System V AMD64 convention.
/// Parameters past this index live on the caller's stack and do not consume
/// a slot in the callee's frame.
pub const NUM_ARGUMENT_REGISTERS: usize = 6;

/// Storage class of a resolved name.
///
/// The slot/index is the symbol's `which`: for locals it numbers frame
/// slots, for parameters it is the zero-based position in the parameter
/// list. Globals are addressed by name and carry neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Global,
    Local { slot: usize },
    Param { index: usize },
}

/// A resolved name. Created once by the resolver and shared by `Rc`
/// between the declaration site and every use site.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub ty: Type,
    pub name: String,
}

impl Symbol {
    pub fn new(kind: SymbolKind, ty: Type, name: impl Into<String>) -> Self {
        Symbol {
            kind,
            ty,
            name: name.into(),
        }
    }
}

/// One nesting level: its bindings plus the counters used to mint slots.
#[derive(Debug, Default)]
struct Frame {
    symbols: HashMap<String, Rc<Symbol>>,
    local_count: usize,
    param_count: usize,
}

/// The scope stack. Constructed with the global frame already in place.
#[derive(Debug)]
pub struct ScopeStack {
    frames: Vec<Frame>,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    pub fn new() -> Self {
        ScopeStack {
            frames: vec![Frame::default()],
        }
    }

    /// Push a fresh empty frame.
    pub fn enter(&mut self) {
        if self.frames.len() >= SCOPE_STACK_MAX {
            panic!("maximum scope nesting depth ({SCOPE_STACK_MAX}) exceeded");
        }
        self.frames.push(Frame::default());
    }

    /// Pop and discard the innermost frame.
    pub fn exit(&mut self) {
        if self.frames.len() == 1 {
            panic!("compiler bug: attempt to exit the global scope");
        }
        self.frames.pop();
    }

    /// 1-based nesting depth; the global scope is level 1.
    pub fn level(&self) -> usize {
        self.frames.len()
    }

    /// Slot the next local bound in the innermost frame will receive:
    /// locals already bound plus register-passed parameters already bound.
    pub fn next_local_slot(&self) -> usize {
        let top = self.top();
        top.local_count + top.param_count
    }

    /// Number of locals bound in the innermost frame so far.
    pub fn local_count(&self) -> usize {
        self.top().local_count
    }

    /// Insert a binding into the innermost frame, overwriting any earlier
    /// binding of the same name at this level (the resolver reports the
    /// redeclaration before calling). Advances the frame counters for
    /// locals and register-passed parameters.
    pub fn bind(&mut self, name: &str, symbol: Rc<Symbol>) {
        let frame = self.frames.last_mut().expect("scope stack is never empty");
        match symbol.kind {
            SymbolKind::Local { .. } => frame.local_count += 1,
            SymbolKind::Param { index } if index < NUM_ARGUMENT_REGISTERS => {
                frame.param_count += 1;
            }
            _ => {}
        }
        frame.symbols.insert(name.to_string(), symbol);
    }

    /// Search every frame from innermost to global.
    pub fn lookup(&self, name: &str) -> Option<Rc<Symbol>> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.symbols.get(name).cloned())
    }

    /// Search only the innermost frame.
    pub fn lookup_current(&self, name: &str) -> Option<Rc<Symbol>> {
        self.top().symbols.get(name).cloned()
    }

    fn top(&self) -> &Frame {
        self.frames.last().expect("scope stack is never empty")
    }
}
