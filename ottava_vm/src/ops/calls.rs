//! Callee dispatch: identifier indexing, function calls in and out of
//! the VM, command-form calls, handles, and `eval`.
//!
//! `IndexId*` is the workhorse: the value in the named slot decides the
//! code path (plain data indexes, a nil slot resolves and installs a
//! function cache, callables call). Compiled callees continue in-VM by
//! frame switch; native callees get a marshaled value list and their
//! results are expanded back onto the stack.

use crate::error::{VmError, VmResult};
use crate::vm::{SlotNargout, Vm};
use ottava_bytecode::opcode::{INDEX_BRACE, INDEX_PAREN};
use ottava_bytecode::Op;
use ottava_core::{
    dispatch_kind, expand_args, simple_subsref, DispatchKind, ExecError, FnCache, FnHandle,
    FunctionKind, HandleKind, IndexError, SubsError, Value,
};
use smallvec::SmallVec;
use std::rc::Rc;

impl<'h> Vm<'h> {
    // =========================================================================
    // IndexId* family
    // =========================================================================

    pub(crate) fn op_index_id(&mut self, mode: SlotNargout, cell: bool) -> VmResult<()> {
        let slot = self.fetch_slot();
        let nargs = self.fetch_u8() as usize;
        let nargout = match mode {
            SlotNargout::Fixed(n) => n,
            SlotNargout::Operand => self.fetch_u8() as usize,
            SlotNargout::Frame => self.frame_nargout(),
        };
        let nargout = self.take_nargout(nargout);
        self.index_or_call_slot(slot, nargs, nargout, cell)
    }

    pub(crate) fn index_or_call_slot(
        &mut self,
        slot: usize,
        nargs: usize,
        nargout: usize,
        cell: bool,
    ) -> VmResult<()> {
        let v = self.slot_deref(slot);
        match dispatch_kind(&v) {
            DispatchKind::Subsref => {
                let raw = self.stack.pop_n(nargs);
                self.maybe_specialize_mat_index(&v, &raw, nargout, cell);
                let args = expand_args(raw);
                let kind = if cell { INDEX_BRACE } else { INDEX_PAREN };
                let results = simple_subsref(&v, kind, &args, nargout.max(1))
                    .map_err(|e| self.decorate_index_err(e, Some(slot)))?;
                self.push_index_results(results, nargout, cell);
                Ok(())
            }
            DispatchKind::FnLookup => {
                let name = self.id_name(slot);
                let callee = self
                    .host
                    .lookup_function(&name)
                    .ok_or_else(|| VmError::UndefinedId {
                        name: name.to_string(),
                    })?;
                // Install the per-slot function cache for next time.
                let cache = FnCache::unresolved(name.clone());
                cache.store(callee.clone(), self.host.is_builtin(&name));
                self.set_slot_raw(slot, Value::FnCache(cache));
                let args = self.pop_expanded_args(nargs);
                self.call_value(callee, args, nargout, &name)
            }
            DispatchKind::Call
            | DispatchKind::Handle
            | DispatchKind::Object
            | DispatchKind::NestedHandle => {
                let name = self.id_name(slot);
                let args = self.pop_expanded_args(nargs);
                self.call_value(v, args, nargout, &name)
            }
        }
    }

    pub(crate) fn pop_expanded_args(&mut self, nargs: usize) -> SmallVec<[Value; 8]> {
        let raw = self.stack.pop_n(nargs);
        expand_args(raw)
    }

    /// First successful scalar read through `IndexIdNargout1` on a full
    /// numeric matrix installs the direct-read specialization.
    fn maybe_specialize_mat_index(
        &mut self,
        base: &Value,
        raw_args: &[Value],
        nargout: usize,
        cell: bool,
    ) {
        if cell || nargout != 1 || !base.is_full_num_matrix() {
            return;
        }
        if self.unit.op_at(self.op_ip) != Some(Op::IndexIdNargout1) {
            return;
        }
        let all_scalar = raw_args.iter().all(|v| matches!(v, Value::Num(_)));
        match raw_args.len() {
            1 if all_scalar => self.unit.patch_op(self.op_ip, Op::IndexId1Mat1d),
            2 if all_scalar => self.unit.patch_op(self.op_ip, Op::IndexId1Mat2d),
            _ => {}
        }
    }

    /// Specialized 1-D/2-D matrix read with explicit integer and bound
    /// checks; any guard failure despecializes.
    pub(crate) fn op_index_id1_mat(&mut self, n_dims: usize) -> VmResult<()> {
        let slot = self.fetch_slot();
        let nargs = self.fetch_u8() as usize;

        let matrix = match self.slot_ref(slot) {
            Value::Matrix(m) => m.clone(),
            _ => return self.despecialize_index(),
        };
        if nargs != n_dims {
            return self.despecialize_index();
        }
        let scalar_at = |depth: usize, vm: &Vm<'_>| match vm.stack.peek(depth) {
            Value::Num(v) => Some(*v),
            _ => None,
        };
        if n_dims == 1 {
            let Some(idx) = scalar_at(0, self) else {
                return self.despecialize_index();
            };
            self.stack.pop();
            let i = self.checked_index(idx, matrix.numel(), 1, 1, slot)?;
            self.stack.push(Value::Num(matrix.at(i)));
        } else {
            let (Some(col), Some(row)) = (scalar_at(0, self), scalar_at(1, self)) else {
                return self.despecialize_index();
            };
            self.stack.pop();
            self.stack.pop();
            let r = self.checked_index(row, matrix.rows(), 1, 2, slot)?;
            let c = self.checked_index(col, matrix.cols(), 2, 2, slot)?;
            self.stack.push(Value::Num(matrix.elem(r, c)));
        }
        Ok(())
    }

    fn despecialize_index(&mut self) -> VmResult<()> {
        self.unit.patch_op(self.op_ip, Op::IndexIdNargout1);
        self.redispatch();
        Ok(())
    }

    /// 1-based scalar subscript to 0-based offset, with the
    /// dimension-citing diagnostics the specialized reads promise.
    pub(crate) fn checked_index(
        &self,
        v: f64,
        extent: usize,
        dim: usize,
        n_dims: usize,
        slot: usize,
    ) -> VmResult<usize> {
        let decorate = |mut e: IndexError, vm: &Vm<'_>| {
            if let Some(name) = vm.index_error_name(Some(slot)) {
                e.set_object_name(&name);
            }
            VmError::Index(e)
        };
        if v < 1.0 || v != v.trunc() || !v.is_finite() {
            return Err(decorate(IndexError::bad_subscript(dim, n_dims, v), self));
        }
        let i = v as usize - 1;
        if i >= extent {
            return Err(decorate(
                IndexError::out_of_bound(dim, n_dims, v, extent),
                self,
            ));
        }
        Ok(i)
    }

    pub(crate) fn decorate_index_err(&self, e: SubsError, slot: Option<usize>) -> VmError {
        match e {
            SubsError::Index(mut ie) => {
                if let Some(name) = self.index_error_name(slot) {
                    ie.set_object_name(&name);
                }
                VmError::Index(ie)
            }
            SubsError::Exec(e) => VmError::Exec(e),
        }
    }

    /// Push what an indexing produced, respecting the nargout contract:
    /// paren indexing yields one value; brace selections yield a cs-list
    /// at nargout ≤ 1 and exactly `nargout` spread values above that.
    pub(crate) fn push_index_results(
        &mut self,
        mut results: Vec<Value>,
        nargout: usize,
        cell: bool,
    ) {
        if !cell {
            let v = results.drain(..).next().unwrap_or(Value::Undef);
            self.stack.push(v);
            return;
        }
        if nargout <= 1 {
            if results.len() == 1 {
                let v = results.pop().unwrap();
                self.stack.push(v);
            } else {
                self.stack.push(Value::CsList(Rc::new(results)));
            }
            return;
        }
        results.resize(nargout, Value::Undef);
        for v in results {
            self.stack.push(v);
        }
    }

    // =========================================================================
    // Generic call dispatch
    // =========================================================================

    pub(crate) fn call_value(
        &mut self,
        callee: Value,
        args: SmallVec<[Value; 8]>,
        nargout: usize,
        name: &str,
    ) -> VmResult<()> {
        match callee {
            Value::FnCache(cache) => {
                let resolved = match cache.cached() {
                    Some(v) => v,
                    None => {
                        let v = self.host.lookup_function(&cache.name).ok_or_else(|| {
                            VmError::UndefinedId {
                                name: cache.name.to_string(),
                            }
                        })?;
                        cache.store(v.clone(), self.host.is_builtin(&cache.name));
                        v
                    }
                };
                self.call_value(resolved, args, nargout, name)
            }
            Value::Function(fun) => match &fun.kind {
                FunctionKind::Compiled(unit) => {
                    self.call_compiled(unit.clone(), args, nargout, &[], None)
                }
                FunctionKind::Builtin(bf) => {
                    let results = if matches!(&*fun.name, "disp" | "display") {
                        self.host.feval(&fun.name, &args, nargout)
                    } else {
                        bf(&args, nargout)
                    }
                    .map_err(VmError::Exec)?;
                    self.push_call_results(results, nargout);
                    Ok(())
                }
            },
            Value::Handle(handle) => self.call_handle(handle, args, nargout),
            Value::Object(obj) => {
                let results = obj.call(&args, nargout).map_err(VmError::Exec)?;
                self.push_call_results(results, nargout);
                Ok(())
            }
            other if other.is_defined() => Err(VmError::Exec(ExecError::msg(format!(
                "'{name}' is a '{}' value, not a function",
                other.type_name()
            )))),
            _ => Err(VmError::UndefinedId {
                name: name.to_string(),
            }),
        }
    }

    fn call_handle(
        &mut self,
        handle: Rc<FnHandle>,
        args: SmallVec<[Value; 8]>,
        nargout: usize,
    ) -> VmResult<()> {
        match &handle.kind {
            HandleKind::Named(memo) => {
                let resolved = {
                    let cached = memo.borrow().clone();
                    match cached {
                        Some(v) => v,
                        None => {
                            let v = self.host.lookup_function(&handle.name).ok_or_else(|| {
                                VmError::UndefinedId {
                                    name: handle.name.to_string(),
                                }
                            })?;
                            *memo.borrow_mut() = Some(v.clone());
                            v
                        }
                    }
                };
                let name = handle.name.clone();
                self.call_value(resolved, args, nargout, &name)
            }
            HandleKind::Anon { unit, captures } => {
                self.call_compiled(unit.clone(), args, nargout, captures, None)
            }
            HandleKind::Nested { unit, context_id } => {
                self.host.vm_enter_nested();
                self.call_compiled(unit.clone(), args, nargout, &[], Some(*context_id))
            }
        }
    }

    /// A native callee returned a value list: expand cs-lists inside it
    /// and leave the demanded number of stack values (nargout 0 still
    /// hands one back for `ans`).
    pub(crate) fn push_call_results(&mut self, results: Vec<Value>, nargout: usize) {
        let mut expanded: Vec<Value> = Vec::with_capacity(results.len());
        for v in results {
            match v {
                Value::CsList(list) => expanded.extend(list.iter().cloned()),
                v => expanded.push(v),
            }
        }
        let demand = nargout.max(1);
        expanded.resize(demand, Value::Undef);
        expanded.truncate(demand);
        for v in expanded {
            self.stack.push(v);
        }
    }

    // =========================================================================
    // Command form and eval
    // =========================================================================

    pub(crate) fn op_word_cmd(&mut self, nx: bool) -> VmResult<()> {
        let slot = self.fetch_slot();
        let nargout = if nx {
            self.frame_nargout()
        } else {
            self.fetch_u8() as usize
        };
        let nargs = self.fetch_u8() as usize;
        let nargout = self.take_nargout(nargout);
        self.index_or_call_slot(slot, nargs, nargout, false)?;
        self.last_was_cmd = true;
        Ok(())
    }

    pub(crate) fn op_eval(&mut self) -> VmResult<()> {
        let nargout = self.fetch_u8() as usize;
        let tree = self.fetch_u32() as u64;
        let nargout = self.take_nargout(nargout);
        let results = self
            .host
            .eval_tree(tree, nargout)
            .map_err(VmError::Exec)?;
        self.push_call_results(results, nargout);
        Ok(())
    }

    // =========================================================================
    // Function handles
    // =========================================================================

    pub(crate) fn op_push_fcn_handle(&mut self) -> VmResult<()> {
        let slot = self.fetch_slot();
        let name = self.id_name(slot);
        let handle = match self.slot_ref(slot) {
            // A local function already installed in the slot resolves
            // immediately.
            Value::Function(_) => Rc::new(FnHandle {
                name: name.clone(),
                kind: HandleKind::Named(std::cell::RefCell::new(Some(
                    self.slot_ref(slot).clone(),
                ))),
            }),
            _ => FnHandle::named(&name),
        };
        self.stack.push(Value::Handle(handle));
        Ok(())
    }

    pub(crate) fn op_push_anon_fcn_handle(&mut self) -> VmResult<()> {
        let cst = self.fetch_u16() as usize;
        let unit = match self.unit.constants.get(cst) {
            Some(ottava_bytecode::Const::Unit(u)) => u.clone(),
            _ => {
                return Err(VmError::Exec(ExecError::msg(
                    "PushAnonFcnHandle constant is not a compiled unit",
                )))
            }
        };
        let captures = self.stack.pop_n(unit.n_captures as usize);
        self.stack
            .push(Value::Handle(FnHandle::anon(unit, captures)));
        Ok(())
    }
}
