//! Constant loads, slot pushes, assignments, stack shuffling and the
//! small diagnostic opcodes.

use crate::error::{VmError, VmResult};
use crate::host::BreakpointAction;
use crate::vm::{SlotNargout, Vm};
use ottava_bytecode::Const;
use ottava_core::{ExecError, Value};

impl<'h> Vm<'h> {
    // =========================================================================
    // Constant pool
    // =========================================================================

    /// Push a copy of a pool entry; the pool itself is never written.
    pub(crate) fn push_constant(&mut self, idx: usize) -> VmResult<()> {
        let value = match self.unit.constants.get(idx) {
            Some(Const::Num(v)) => Value::Num(*v),
            Some(Const::Bool(b)) => Value::Bool(*b),
            Some(Const::Str(s)) => Value::Str(s.clone()),
            Some(Const::Colon) => Value::Colon,
            Some(Const::Unit(unit)) => {
                Value::Function(ottava_core::Function::compiled(unit.clone()))
            }
            None => {
                return Err(VmError::Exec(ExecError::msg(format!(
                    "constant index {idx} out of range"
                ))))
            }
        };
        self.stack.push(value);
        Ok(())
    }

    // =========================================================================
    // Slot pushes
    // =========================================================================

    /// `PushSlotNargout*`: a defined data value pushes; a nil slot or a
    /// callable resolves and calls with zero arguments.
    pub(crate) fn op_push_slot(&mut self, mode: SlotNargout, _special: bool) -> VmResult<()> {
        let slot = self.fetch_slot();
        let nargout = match mode {
            SlotNargout::Fixed(n) => n,
            SlotNargout::Operand => self.fetch_u8() as usize,
            SlotNargout::Frame => self.frame_nargout(),
        };
        self.push_slot_common(slot, nargout)
    }

    pub(crate) fn push_slot_common(&mut self, slot: usize, nargout: usize) -> VmResult<()> {
        let v = self.slot_deref(slot);
        match v {
            Value::Undef | Value::FnCache(_) | Value::Function(_) => {
                // Identifier names a function here (or nothing at all).
                self.index_or_call_slot(slot, 0, nargout, false)?;
                self.last_was_cmd = true;
                Ok(())
            }
            v => {
                self.stack.push(v);
                self.last_was_cmd = false;
                Ok(())
            }
        }
    }

    /// `PushSlotDisp`: slot push that remembers, for the following
    /// `Disp`, whether the value came from a command-form call.
    pub(crate) fn op_push_slot_disp(&mut self) -> VmResult<()> {
        let slot = self.fetch_slot();
        self.push_slot_common(slot, 1)
    }

    /// The named-constant specializations: trust only an untouched
    /// builtin resolution, otherwise let shadowing win.
    pub(crate) fn op_named_const(&mut self, name: &str, prebuilt: Value) -> VmResult<()> {
        let slot = self.fetch_slot();
        match self.slot_ref(slot) {
            Value::FnCache(cache) if cache.is_fresh_builtin(name) => {
                self.stack.push(prebuilt);
                Ok(())
            }
            Value::Undef => {
                if self.host.is_builtin(name) {
                    if let Some(callee) = self.host.lookup_function(name) {
                        let cache = ottava_core::FnCache::unresolved(self.id_name(slot));
                        cache.store(callee, true);
                        self.set_slot_raw(slot, Value::FnCache(cache));
                        self.stack.push(prebuilt);
                        return Ok(());
                    }
                }
                self.push_slot_common(slot, 1)
            }
            _ => self.push_slot_common(slot, 1),
        }
    }

    // =========================================================================
    // Folded constants
    // =========================================================================

    pub(crate) fn op_push_folded_cst(&mut self) {
        let slot = self.fetch_slot();
        let target = self.fetch_u16() as usize;
        let cached = self.slot_ref(slot).clone();
        if cached.is_defined() {
            self.stack.push(cached);
            self.ip = target;
        }
        // Undefined cache: fall through into the initialization code.
    }

    pub(crate) fn op_set_folded_cst(&mut self) {
        let slot = self.fetch_slot();
        let value = self.stack.top().clone();
        self.set_slot_raw(slot, value);
    }

    // =========================================================================
    // Assignment
    // =========================================================================

    /// RHS normalization shared by every assigning opcode: cs-lists
    /// collapse to their first element, undefined is an error.
    pub(crate) fn storable(&self, v: Value) -> VmResult<Value> {
        match v {
            Value::Undef => Err(VmError::RhsUndefined),
            Value::CsList(list) => list
                .first()
                .cloned()
                .ok_or(VmError::InvalidNelRhs { expected: 1, got: 0 }),
            Value::Chain(_) | Value::Int(_) => Err(VmError::Exec(ExecError::msg(
                "internal value escaped to an assignment",
            ))),
            v => Ok(v),
        }
    }

    /// Store into a slot, writing through a reference target when one is
    /// installed.
    pub(crate) fn write_slot_or_ref(&mut self, slot: usize, v: Value) -> VmResult<()> {
        match self.slot_ref(slot) {
            Value::Ref(target) => {
                let target = target.clone();
                self.ref_write(&target, v);
            }
            _ => self.set_slot_raw(slot, v),
        }
        Ok(())
    }

    pub(crate) fn op_assign(&mut self, force: bool) -> VmResult<()> {
        let slot = self.fetch_slot();
        let rhs = self.stack.pop();
        let stored = self.storable(rhs)?;
        if force {
            self.set_slot_raw(slot, stored);
            Ok(())
        } else {
            self.write_slot_or_ref(slot, stored)
        }
    }

    /// `[a, b, …] = …`: values are on the stack in return order, the
    /// slot list is in the operand tail, black holes come from the
    /// active ignore frame.
    pub(crate) fn op_assign_n(&mut self) -> VmResult<()> {
        let n = self.fetch_u8() as usize;
        let mut slots = Vec::with_capacity(n);
        for _ in 0..n {
            slots.push(self.fetch_u16() as usize);
        }

        let raw = self.stack.pop_n(n);
        let mut values: Vec<Value> = Vec::with_capacity(n);
        for v in raw {
            match v {
                Value::CsList(list) => values.extend(list.iter().cloned()),
                v => values.push(v),
            }
        }
        if values.len() != n {
            return Err(VmError::InvalidNelRhs {
                expected: n,
                got: values.len(),
            });
        }

        let ignored: Vec<bool> = self
            .ignore
            .active_at(self.frames.len())
            .map(|f| f.lvalues.clone())
            .unwrap_or_default();

        for (i, (slot, value)) in slots.into_iter().zip(values).enumerate() {
            let black_hole = ignored.get(i).copied().unwrap_or(false);
            if black_hole {
                // Sink slots take whatever arrived (ClearIgnoreOutputs
                // wipes them); an undefined value is fine here.
                if value.is_defined() {
                    self.set_slot_raw(slot, value);
                }
                continue;
            }
            if !value.is_defined() {
                return Err(VmError::Exec(ExecError::msg(format!(
                    "element number {} undefined in return list",
                    i + 1
                ))));
            }
            let stored = self.storable(value)?;
            self.write_slot_or_ref(slot, stored)?;
        }
        Ok(())
    }

    /// Statement-level result binding: defined values land in `ans`,
    /// valueless calls leave it untouched.
    pub(crate) fn op_bind_ans(&mut self) -> VmResult<()> {
        let slot = self.fetch_slot();
        let v = self.stack.pop();
        if !v.is_defined() {
            return Ok(());
        }
        let stored = self.storable(v)?;
        self.write_slot_or_ref(slot, stored)
    }

    pub(crate) fn op_set_slot_to_stack_depth(&mut self) {
        let slot = self.fetch_slot();
        let depth = self.stack.sp() - self.bsp - self.n_locals();
        self.set_slot_raw(slot, Value::Int(depth as i64));
    }

    // =========================================================================
    // Stack shuffling
    // =========================================================================

    /// `[… a b] → [… b a b]`: a copy of TOS tucked beneath the pair.
    pub(crate) fn op_dup_move(&mut self) {
        let b = self.stack.pop();
        let a = self.stack.pop();
        self.stack.push(b.clone());
        self.stack.push(a);
        self.stack.push(b);
    }

    /// `DupN offset, n`: re-push a run of `n` values whose top sits
    /// `offset` below TOS.
    pub(crate) fn op_dup_n(&mut self) -> VmResult<()> {
        let offset = self.fetch_u8() as usize;
        let n = self.fetch_u8() as usize;
        for depth in (offset..offset + n).rev() {
            let v = self.stack.peek(depth).clone();
            self.stack.push(v);
        }
        Ok(())
    }

    pub(crate) fn op_rot(&mut self) {
        let b = self.stack.pop();
        let a = self.stack.pop();
        self.stack.push(b);
        self.stack.push(a);
    }

    /// Reclaim loop-state integers left by `ForSetup`.
    pub(crate) fn op_pop_n_ints(&mut self) -> VmResult<()> {
        let n = self.fetch_u8() as usize;
        for _ in 0..n {
            let v = self.stack.pop();
            debug_assert!(matches!(v, Value::Int(_)), "PopNInts popped {v:?}");
        }
        Ok(())
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Display the TOS through the host, tagged with the variable name
    /// or with `ans` for command-form results.
    pub(crate) fn op_disp(&mut self) -> VmResult<()> {
        let slot = self.fetch_slot();
        let _cmd_marker_slot = self.fetch_u16();
        let value = self.stack.pop();
        if !value.is_defined() {
            return Ok(());
        }
        let name = if self.last_was_cmd || slot >= self.unit.ids.len() {
            "ans".into()
        } else {
            self.id_name(slot)
        };
        self.last_was_cmd = false;
        self.host.display(&name, &value);
        Ok(())
    }

    /// Fire the legacy short-circuit warning once per textual occurrence
    /// (the slot memoizes "already warned").
    pub(crate) fn op_braindead_warning(&mut self) {
        let slot = self.fetch_slot();
        let kind = self.fetch_u8();
        if self.slot_ref(slot).is_defined() {
            return;
        }
        let operator = if kind == 0 { "&" } else { "|" };
        self.host.warn(
            "Octave:possible-matlab-short-circuit-operator",
            &format!(
                "Matlab-style short-circuit operation performed for operator {operator}"
            ),
        );
        self.set_slot_raw(slot, Value::Bool(true));
    }

    /// End of an unwind-protect cleanup block: rethrow the saved error
    /// if one rode through the cleanup.
    pub(crate) fn op_throw_if_err_obj(&mut self) -> VmResult<()> {
        let v = self.stack.pop();
        if let Value::Struct(s) = &v {
            let id = s.get("identifier");
            let msg = s.get("message");
            if let (Some(Value::Str(id)), Some(Value::Str(msg))) = (id, msg) {
                if &**id == "Octave:interrupt-exception" {
                    return Err(VmError::Interrupt);
                }
                return Err(VmError::Exec(ExecError::new(id, msg.to_string())));
            }
        }
        Ok(())
    }

    /// Explicit breakpoint opcode (independent of the debug flag).
    pub(crate) fn op_debug(&mut self) -> VmResult<()> {
        let tree = self.unit.tree_for_ip(self.instr_ip as u32);
        self.host.set_active_bytecode_ip(self.instr_ip);
        match self.host.do_breakpoint(tree, false) {
            BreakpointAction::Continue => Ok(()),
            BreakpointAction::QuitDebug { all } => Err(VmError::DebugQuit { all }),
        }
    }
}
