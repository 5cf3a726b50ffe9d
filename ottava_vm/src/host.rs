//! The host interpreter contract.
//!
//! The VM owns dispatch and the operand stack; everything else — the
//! global store, builtin functions, display, breakpoints, echo, the
//! error system — belongs to the surrounding interpreter and is reached
//! through this trait. [`Session`] is the self-contained implementation
//! used by tests and embedders that have no interpreter around the VM.

use crate::error::{VmError, VmResult};
use ottava_core::{
    CellArray, ExecError, Function, Matrix, Value,
};
use rustc_hash::FxHashMap;
use std::rc::Rc;

/// What the debugger asked for at a breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointAction {
    Continue,
    /// Leave the VM entirely (maps to the debug-quit error kind).
    QuitDebug { all: bool },
}

#[allow(unused_variables)]
pub trait Host {
    // =========================================================================
    // Identifier resolution and native calls
    // =========================================================================

    /// Resolve a free identifier to a callable value.
    fn lookup_function(&mut self, name: &str) -> Option<Value>;

    /// Whether `name` resolves to an entry in the builtin table (the
    /// named-constant opcodes only trust those).
    fn is_builtin(&self, name: &str) -> bool;

    /// Call a host-native function with a marshaled value list.
    fn feval(&mut self, name: &str, args: &[Value], nargout: usize)
        -> Result<Vec<Value>, ExecError>;

    /// `eval` fallback for expressions the compiler left as source trees.
    fn eval_tree(&mut self, tree: u64, nargout: usize) -> Result<Vec<Value>, ExecError> {
        Err(ExecError::msg("eval: no host evaluator available"))
    }

    // =========================================================================
    // Display and warnings
    // =========================================================================

    fn display(&mut self, name: &str, value: &Value);

    fn warn(&mut self, id: &str, message: &str) {
        log::warn!("{id}: {message}");
    }

    // =========================================================================
    // Global and persistent storage
    // =========================================================================

    fn global_exists(&self, name: &str) -> bool;
    fn global_value(&self, name: &str) -> Option<Value>;
    fn global_assign(&mut self, name: &str, value: Value);

    fn persistent_exists(&self, fn_name: &str, offset: u16) -> bool;
    fn persistent_value(&self, fn_name: &str, offset: u16) -> Option<Value>;
    fn persistent_assign(&mut self, fn_name: &str, offset: u16, value: Value);

    // =========================================================================
    // Frame notifications
    // =========================================================================

    /// A compiled frame is being entered. `closure_ctx` carries the
    /// nested-handle context when there is one.
    fn push_stack_frame(
        &mut self,
        fn_name: &str,
        nargout: usize,
        nargin: usize,
        closure_ctx: Option<u64>,
    ) {
    }

    fn pop_stack_frame(&mut self) {}

    fn vm_enter_script(&mut self) {}
    fn vm_exit_script(&mut self) {}
    fn vm_enter_nested(&mut self) {}
    /// The VM is abandoning the current frame during unwinding.
    fn vm_unwinds(&mut self) {}

    /// Lets the host compute source lines from the active unit's
    /// location table.
    fn set_active_bytecode_ip(&mut self, ip: usize) {}

    /// Black-hole propagation: the lvalue list for the imminent call
    /// (`true` marks an ignored output), or `None` to clear.
    fn set_lvalue_list(&mut self, list: Option<Vec<bool>>) {}

    /// Current lvalue list, for callees that ask (`isargout`).
    fn lvalue_list(&self) -> Option<&[bool]> {
        None
    }

    // =========================================================================
    // Interrupts, breakpoints, echo
    // =========================================================================

    /// Polled at signal checkpoints; `true` raises the interrupt kind.
    fn check_interrupt(&mut self) -> bool {
        false
    }

    fn breakpoint_active(&self) -> bool {
        false
    }

    fn do_breakpoint(&mut self, tree: Option<u64>, is_return: bool) -> BreakpointAction {
        BreakpointAction::Continue
    }

    fn echo_enabled(&self) -> bool {
        false
    }

    fn echo_code(&mut self, line: u32) {}

    // =========================================================================
    // Error system
    // =========================================================================

    fn save_exception(&mut self, err: &ExecError) {}
    fn recover_from_exception(&mut self) {}
    fn last_error(&self) -> ExecError {
        ExecError::msg("")
    }
}

// =============================================================================
// Session: the batteries-included host
// =============================================================================

/// Reusable dynamic-frame records, recycled to dodge allocator traffic.
/// Closure contexts and shared frames never enter the pool.
const FRAME_POOL_MAX: usize = 8;

#[derive(Debug, Default)]
struct FramePool {
    free: Vec<FrameRecord>,
}

#[derive(Debug, Default)]
struct FrameRecord {
    fn_name: String,
    nargout: usize,
    nargin: usize,
    closure_ctx: Option<u64>,
}

impl FramePool {
    fn acquire(&mut self) -> FrameRecord {
        self.free.pop().unwrap_or_default()
    }

    fn release(&mut self, mut record: FrameRecord) {
        if record.closure_ctx.is_none() && self.free.len() < FRAME_POOL_MAX {
            record.fn_name.clear();
            self.free.push(record);
        }
    }
}

/// Self-contained host: FxHashMap-backed global store, a small builtin
/// table, captured display output, and a recorded warning list.
pub struct Session {
    globals: FxHashMap<Rc<str>, Value>,
    persistents: FxHashMap<(Rc<str>, u16), Value>,
    builtins: FxHashMap<&'static str, Rc<Function>>,
    frames: Vec<FrameRecord>,
    frame_pool: FramePool,
    lvalues: Vec<Vec<bool>>,
    last_error: Option<ExecError>,
    /// `(name, rendered)` pairs from `display`, for assertions.
    pub displayed: Vec<(String, String)>,
    /// `(identifier, message)` pairs from `warn`.
    pub warnings: Vec<(String, String)>,
    /// Pending interrupt flag, consumed by the next checkpoint.
    pub interrupt_pending: bool,
    /// Optional evaluator for `Eval` tree handles.
    pub eval_hook: Option<fn(u64, usize) -> Result<Vec<Value>, ExecError>>,
    /// `(tree, is_return)` for every breakpoint callback.
    pub breakpoints_hit: Vec<(Option<u64>, bool)>,
    /// Make the next breakpoint ask to leave the VM.
    pub quit_debug_on_next: bool,
    /// Echo toggle and the lines echoed.
    pub echo_on: bool,
    pub echo_lines: Vec<u32>,
    /// The `__vm_enable__` toggle: whether the host routes calls into
    /// the VM at all (off falls back to the tree-walking evaluator).
    pub vm_enabled: bool,
    /// Functions whose one-shot compilation failed; they stay on the
    /// tree walker.
    vm_disabled_fns: Vec<String>,
}

impl Session {
    pub fn new() -> Session {
        let mut builtins: FxHashMap<&'static str, Rc<Function>> = FxHashMap::default();
        builtins.insert("numel", Function::builtin("numel", builtin_numel));
        builtins.insert("length", Function::builtin("length", builtin_length));
        builtins.insert("size", Function::builtin("size", builtin_size));
        builtins.insert("isempty", Function::builtin("isempty", builtin_isempty));
        builtins.insert("class", Function::builtin("class", builtin_class));
        builtins.insert("error", Function::builtin("error", builtin_error));
        builtins.insert("deal", Function::builtin("deal", builtin_deal));
        builtins.insert("zeros", Function::builtin("zeros", builtin_zeros));
        builtins.insert("cell", Function::builtin("cell", builtin_cell));
        builtins.insert("pi", Function::builtin("pi", builtin_pi));
        builtins.insert("e", Function::builtin("e", builtin_e));
        builtins.insert("i", Function::builtin("i", builtin_i));
        // Sentinels: the VM routes these through `feval`, which owns the
        // output sink; the entries only make name lookup succeed.
        builtins.insert("disp", Function::builtin("disp", builtin_display_stub));
        builtins.insert("display", Function::builtin("display", builtin_display_stub));
        Session {
            globals: FxHashMap::default(),
            persistents: FxHashMap::default(),
            builtins,
            frames: Vec::new(),
            frame_pool: FramePool::default(),
            lvalues: Vec::new(),
            last_error: None,
            displayed: Vec::new(),
            warnings: Vec::new(),
            interrupt_pending: false,
            eval_hook: None,
            breakpoints_hit: Vec::new(),
            quit_debug_on_next: false,
            echo_on: false,
            echo_lines: Vec::new(),
            vm_enabled: true,
            vm_disabled_fns: Vec::new(),
        }
    }

    /// One-shot compilation of `name` failed: warn once with the
    /// compilation identifier and pin the function to the tree walker.
    pub fn disable_vm_for(&mut self, name: &str, reason: &str) {
        if self.vm_disabled_fns.iter().any(|n| n == name) {
            return;
        }
        self.warn(
            "Octave:bytecode-compilation",
            &format!("auto-compilation of {name} failed with error '{reason}'"),
        );
        self.vm_disabled_fns.push(name.to_string());
    }

    /// Should a call to `name` run in the VM?
    pub fn vm_eligible(&self, name: &str) -> bool {
        self.vm_enabled && !self.vm_disabled_fns.iter().any(|n| n == name)
    }

    /// Install or replace a user function (what the interpreter's symbol
    /// table would serve).
    pub fn define_function(&mut self, name: &'static str, f: Rc<Function>) {
        self.builtins.insert(name, f);
    }

    pub fn global_names(&self) -> impl Iterator<Item = &Rc<str>> {
        self.globals.keys()
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

impl Host for Session {
    fn lookup_function(&mut self, name: &str) -> Option<Value> {
        self.builtins
            .get(name)
            .cloned()
            .map(Value::Function)
    }

    fn is_builtin(&self, name: &str) -> bool {
        self.builtins.contains_key(name)
    }

    fn feval(
        &mut self,
        name: &str,
        args: &[Value],
        nargout: usize,
    ) -> Result<Vec<Value>, ExecError> {
        if name == "disp" || name == "display" {
            for v in args {
                self.display("", v);
            }
            return Ok(Vec::new());
        }
        let fun = self
            .builtins
            .get(name)
            .cloned()
            .ok_or_else(|| ExecError::undefined_function(name))?;
        match &fun.kind {
            ottava_core::FunctionKind::Builtin(f) => f(args, nargout),
            ottava_core::FunctionKind::Compiled(_) => Err(ExecError::msg(format!(
                "feval: '{name}' is compiled; the VM should have called it in-VM"
            ))),
        }
    }

    fn display(&mut self, name: &str, value: &Value) {
        self.displayed.push((name.to_string(), value.to_string()));
    }

    fn warn(&mut self, id: &str, message: &str) {
        log::warn!("{id}: {message}");
        self.warnings.push((id.to_string(), message.to_string()));
    }

    fn global_exists(&self, name: &str) -> bool {
        self.globals.contains_key(name)
    }

    fn global_value(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    fn global_assign(&mut self, name: &str, value: Value) {
        self.globals.insert(name.into(), value);
    }

    fn persistent_exists(&self, fn_name: &str, offset: u16) -> bool {
        self.persistents.contains_key(&(Rc::from(fn_name), offset))
    }

    fn persistent_value(&self, fn_name: &str, offset: u16) -> Option<Value> {
        self.persistents.get(&(Rc::from(fn_name), offset)).cloned()
    }

    fn persistent_assign(&mut self, fn_name: &str, offset: u16, value: Value) {
        self.persistents.insert((Rc::from(fn_name), offset), value);
    }

    fn push_stack_frame(
        &mut self,
        fn_name: &str,
        nargout: usize,
        nargin: usize,
        closure_ctx: Option<u64>,
    ) {
        let mut record = self.frame_pool.acquire();
        record.fn_name.push_str(fn_name);
        record.nargout = nargout;
        record.nargin = nargin;
        record.closure_ctx = closure_ctx;
        self.frames.push(record);
    }

    fn pop_stack_frame(&mut self) {
        if let Some(record) = self.frames.pop() {
            self.frame_pool.release(record);
        }
    }

    fn set_lvalue_list(&mut self, list: Option<Vec<bool>>) {
        match list {
            Some(list) => self.lvalues.push(list),
            None => {
                self.lvalues.pop();
            }
        }
    }

    fn lvalue_list(&self) -> Option<&[bool]> {
        self.lvalues.last().map(|v| v.as_slice())
    }

    fn check_interrupt(&mut self) -> bool {
        std::mem::take(&mut self.interrupt_pending)
    }

    fn eval_tree(&mut self, tree: u64, nargout: usize) -> Result<Vec<Value>, ExecError> {
        match self.eval_hook {
            Some(hook) => hook(tree, nargout),
            None => Err(ExecError::msg("eval: no host evaluator available")),
        }
    }

    fn do_breakpoint(&mut self, tree: Option<u64>, is_return: bool) -> BreakpointAction {
        self.breakpoints_hit.push((tree, is_return));
        if std::mem::take(&mut self.quit_debug_on_next) {
            BreakpointAction::QuitDebug { all: false }
        } else {
            BreakpointAction::Continue
        }
    }

    fn echo_enabled(&self) -> bool {
        self.echo_on
    }

    fn echo_code(&mut self, line: u32) {
        self.echo_lines.push(line);
    }

    fn save_exception(&mut self, err: &ExecError) {
        self.last_error = Some(err.clone());
    }

    fn recover_from_exception(&mut self) {}

    fn last_error(&self) -> ExecError {
        self.last_error.clone().unwrap_or_else(|| ExecError::msg(""))
    }
}

// =============================================================================
// Builtins
// =============================================================================

fn builtin_numel(args: &[Value], _nargout: usize) -> Result<Vec<Value>, ExecError> {
    let v = args
        .first()
        .ok_or_else(|| ExecError::invalid_fun_call("numel: not enough inputs"))?;
    Ok(vec![Value::Num(v.numel() as f64)])
}

fn builtin_length(args: &[Value], _nargout: usize) -> Result<Vec<Value>, ExecError> {
    let v = args
        .first()
        .ok_or_else(|| ExecError::invalid_fun_call("length: not enough inputs"))?;
    let (r, c) = v.dims();
    Ok(vec![Value::Num(if r == 0 || c == 0 {
        0.0
    } else {
        r.max(c) as f64
    })])
}

fn builtin_size(args: &[Value], nargout: usize) -> Result<Vec<Value>, ExecError> {
    let v = args
        .first()
        .ok_or_else(|| ExecError::invalid_fun_call("size: not enough inputs"))?;
    let (r, c) = v.dims();
    if nargout >= 2 {
        Ok(vec![Value::Num(r as f64), Value::Num(c as f64)])
    } else {
        Ok(vec![Value::matrix(Matrix::row(vec![r as f64, c as f64]))])
    }
}

fn builtin_isempty(args: &[Value], _nargout: usize) -> Result<Vec<Value>, ExecError> {
    let v = args
        .first()
        .ok_or_else(|| ExecError::invalid_fun_call("isempty: not enough inputs"))?;
    Ok(vec![Value::Bool(v.numel() == 0)])
}

fn builtin_class(args: &[Value], _nargout: usize) -> Result<Vec<Value>, ExecError> {
    let v = args
        .first()
        .ok_or_else(|| ExecError::invalid_fun_call("class: not enough inputs"))?;
    let name = match v {
        Value::Num(_) | Value::Matrix(_) | Value::Range(_) => "double",
        Value::Bool(_) => "logical",
        Value::Str(_) => "char",
        Value::Cell(_) => "cell",
        Value::Struct(_) => "struct",
        Value::Handle(_) | Value::Function(_) => "function_handle",
        other => other.type_name(),
    };
    Ok(vec![Value::str(name)])
}

/// `error(msg)` / `error(id, template, ...)`.
fn builtin_error(args: &[Value], _nargout: usize) -> Result<Vec<Value>, ExecError> {
    match args {
        [] => Err(ExecError::msg("unspecified error")),
        [Value::Str(msg)] => {
            // A lone argument with identifier shape is still a message.
            Err(ExecError::msg(msg.to_string()))
        }
        [Value::Str(id), Value::Str(msg), ..] if id.contains(':') && !id.contains(' ') => {
            Err(ExecError::new(id, msg.to_string()))
        }
        [Value::Str(msg), ..] => Err(ExecError::msg(msg.to_string())),
        _ => Err(ExecError::invalid_fun_call("error: expected string arguments")),
    }
}

fn builtin_deal(args: &[Value], nargout: usize) -> Result<Vec<Value>, ExecError> {
    let n = nargout.max(1);
    if args.len() == 1 {
        return Ok(vec![args[0].clone(); n]);
    }
    if args.len() != n {
        return Err(ExecError::invalid_fun_call(
            "deal: nargin > 1 and nargin != nargout",
        ));
    }
    Ok(args.to_vec())
}

fn builtin_zeros(args: &[Value], _nargout: usize) -> Result<Vec<Value>, ExecError> {
    let (r, c) = zeros_dims(args)?;
    Ok(vec![Value::matrix(Matrix::new(r, c))])
}

fn builtin_cell(args: &[Value], _nargout: usize) -> Result<Vec<Value>, ExecError> {
    let (r, c) = zeros_dims(args)?;
    let mut out = CellArray::new(r, c);
    for i in 0..out.numel() {
        out.set_linear(i, Value::empty_matrix());
    }
    Ok(vec![Value::cell(out)])
}

fn zeros_dims(args: &[Value]) -> Result<(usize, usize), ExecError> {
    match args {
        [] => Ok((1, 1)),
        [n] => {
            let n = n.as_double()? as usize;
            Ok((n, n))
        }
        [r, c, ..] => Ok((r.as_double()? as usize, c.as_double()? as usize)),
    }
}

fn builtin_display_stub(_args: &[Value], _nargout: usize) -> Result<Vec<Value>, ExecError> {
    Ok(Vec::new())
}

fn builtin_pi(_args: &[Value], _nargout: usize) -> Result<Vec<Value>, ExecError> {
    Ok(vec![Value::Num(std::f64::consts::PI)])
}

fn builtin_e(_args: &[Value], _nargout: usize) -> Result<Vec<Value>, ExecError> {
    Ok(vec![Value::Num(std::f64::consts::E)])
}

fn builtin_i(_args: &[Value], _nargout: usize) -> Result<Vec<Value>, ExecError> {
    Ok(vec![Value::Complex(0.0, 1.0)])
}

/// Convenience used by handlers: poll the host and produce the interrupt
/// error when a signal arrived.
pub fn signal_checkpoint(host: &mut dyn Host) -> VmResult<()> {
    if host.check_interrupt() {
        Err(VmError::Interrupt)
    } else {
        Ok(())
    }
}
