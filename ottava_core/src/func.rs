//! Callable values: compiled functions, builtins, handles, and the
//! per-slot function cache.

use crate::error::ExecError;
use crate::value::Value;
use ottava_bytecode::BytecodeUnit;
use std::cell::RefCell;
use std::rc::Rc;

/// Signature for host-independent builtins. Builtins that need host state
/// (display, I/O) are routed through the host's `feval` instead.
pub type BuiltinFn = fn(&[Value], usize) -> Result<Vec<Value>, ExecError>;

/// A resolved callable.
#[derive(Debug)]
pub struct Function {
    pub name: Rc<str>,
    pub kind: FunctionKind,
}

pub enum FunctionKind {
    /// Compiled to bytecode; the VM runs it in-VM.
    Compiled(Rc<BytecodeUnit>),
    /// Host-native; called out-of-VM with a marshaled value list.
    Builtin(BuiltinFn),
}

impl std::fmt::Debug for FunctionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionKind::Compiled(unit) => write!(f, "Compiled({})", unit.name()),
            FunctionKind::Builtin(_) => write!(f, "Builtin"),
        }
    }
}

impl Function {
    pub fn compiled(unit: Rc<BytecodeUnit>) -> Rc<Function> {
        Rc::new(Function {
            name: unit.name().into(),
            kind: FunctionKind::Compiled(unit),
        })
    }

    pub fn builtin(name: &str, f: BuiltinFn) -> Rc<Function> {
        Rc::new(Function {
            name: name.into(),
            kind: FunctionKind::Builtin(f),
        })
    }

    pub fn as_compiled(&self) -> Option<&Rc<BytecodeUnit>> {
        match &self.kind {
            FunctionKind::Compiled(unit) => Some(unit),
            FunctionKind::Builtin(_) => None,
        }
    }
}

/// Per-slot memo of the callable an identifier resolved to.
///
/// Installed into a nil slot on first use (`FN_LOOKUP` dispatch), reused
/// until the user shadows the identifier by assignment. `builtin` marks a
/// cache whose resolution came straight from the builtin table; the named
/// constant opcodes (`PushPi` and friends) only trust those.
#[derive(Debug)]
pub struct FnCache {
    pub name: Rc<str>,
    pub resolved: RefCell<Option<Value>>,
    pub builtin: std::cell::Cell<bool>,
}

impl FnCache {
    pub fn unresolved(name: Rc<str>) -> Rc<FnCache> {
        Rc::new(FnCache {
            name,
            resolved: RefCell::new(None),
            builtin: std::cell::Cell::new(false),
        })
    }

    pub fn store(&self, callee: Value, is_builtin: bool) {
        *self.resolved.borrow_mut() = Some(callee);
        self.builtin.set(is_builtin);
    }

    pub fn cached(&self) -> Option<Value> {
        self.resolved.borrow().clone()
    }

    /// True when this cache still holds the untouched builtin resolution
    /// for `name` (user shadowing invalidates the slot entirely).
    pub fn is_fresh_builtin(&self, name: &str) -> bool {
        self.builtin.get() && &*self.name == name && self.resolved.borrow().is_some()
    }
}

/// A function handle (`@sin`, `@(x) x + a`, handles to nested functions).
#[derive(Debug)]
pub struct FnHandle {
    pub name: Rc<str>,
    pub kind: HandleKind,
}

#[derive(Debug)]
pub enum HandleKind {
    /// `@name`: resolved lazily against the host, then memoized.
    Named(RefCell<Option<Value>>),
    /// `@(args) expr` with its captured values, seeded into the leading
    /// local slots at call time.
    Anon {
        unit: Rc<BytecodeUnit>,
        captures: Vec<Value>,
    },
    /// Handle to a nested function, bound to a host closure context.
    Nested {
        unit: Rc<BytecodeUnit>,
        context_id: u64,
    },
}

impl FnHandle {
    pub fn named(name: &str) -> Rc<FnHandle> {
        Rc::new(FnHandle {
            name: name.into(),
            kind: HandleKind::Named(RefCell::new(None)),
        })
    }

    pub fn anon(unit: Rc<BytecodeUnit>, captures: Vec<Value>) -> Rc<FnHandle> {
        Rc::new(FnHandle {
            name: "@<anonymous>".into(),
            kind: HandleKind::Anon { unit, captures },
        })
    }

    pub fn nested(unit: Rc<BytecodeUnit>, context_id: u64) -> Rc<FnHandle> {
        Rc::new(FnHandle {
            name: unit.name().into(),
            kind: HandleKind::Nested { unit, context_id },
        })
    }
}

/// Code path to take for a value in callee position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchKind {
    /// Plain data: index it.
    Subsref,
    /// Nil slot: resolve the identifier and install a function cache.
    FnLookup,
    /// A resolved function (cache or function value): call it.
    Call,
    /// A function handle.
    Handle,
    /// A classdef-style object; goes through its capability trait.
    Object,
    /// Handle to a nested function; needs the shared call site.
    NestedHandle,
}

/// Pick the code path for a value appearing in callee position.
pub fn dispatch_kind(v: &Value) -> DispatchKind {
    match v {
        Value::Undef => DispatchKind::FnLookup,
        Value::Function(_) | Value::FnCache(_) => DispatchKind::Call,
        Value::Handle(h) => match h.kind {
            HandleKind::Nested { .. } => DispatchKind::NestedHandle,
            _ => DispatchKind::Handle,
        },
        Value::Object(_) => DispatchKind::Object,
        _ => DispatchKind::Subsref,
    }
}
