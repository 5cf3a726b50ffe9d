//! Global/persistent declarations, function installation, and the
//! ignored-outputs opcodes.

use crate::error::{VmError, VmResult};
use crate::vm::Vm;
use ottava_bytecode::opcode::{GLOBAL_KIND_GLOBAL, GLOBAL_KIND_PERSISTENT};
use ottava_bytecode::Const;
use ottava_core::{ExecError, Function, RefTarget, Value};
use std::rc::Rc;

impl<'h> Vm<'h> {
    /// `GlobalInit kind, slot, has_init, skip`: install a reference
    /// value into the slot; run the init block only when the storage is
    /// newly created.
    pub(crate) fn op_global_init(&mut self) -> VmResult<()> {
        let kind = self.fetch_u8();
        let slot = self.fetch_u16() as usize;
        let has_init = self.fetch_u8() != 0;
        let skip = self.fetch_u16() as usize;
        let name = self.id_name(slot);

        let is_new = match kind {
            GLOBAL_KIND_GLOBAL => {
                if let Value::Ref(target) = self.slot_ref(slot) {
                    if matches!(**target, RefTarget::Persistent { .. }) {
                        return Err(VmError::Exec(ExecError::msg(format!(
                            "global: '{name}' is already persistent and cannot be \
                             declared global"
                        ))));
                    }
                }
                let is_new = !self.host.global_exists(&name);
                if is_new {
                    // A pre-existing local value seeds the new global.
                    let local = self.slot_ref(slot).clone();
                    let initial = match local {
                        v @ (Value::Num(_)
                        | Value::Bool(_)
                        | Value::Complex(..)
                        | Value::Str(_)
                        | Value::Range(_)
                        | Value::Matrix(_)
                        | Value::Cell(_)
                        | Value::Struct(_)
                        | Value::Handle(_)) => v,
                        _ => Value::empty_matrix(),
                    };
                    self.host.global_assign(&name, initial);
                }
                self.set_slot_raw(
                    slot,
                    Value::Ref(Rc::new(RefTarget::Global { name: name.clone() })),
                );
                is_new
            }
            GLOBAL_KIND_PERSISTENT => {
                if let Value::Ref(target) = self.slot_ref(slot) {
                    if matches!(**target, RefTarget::Global { .. }) {
                        return Err(VmError::Exec(ExecError::msg(format!(
                            "persistent: '{name}' is already global and cannot be \
                             declared persistent"
                        ))));
                    }
                }
                let offset = self.unit.persistent_offset(slot as u16).ok_or_else(|| {
                    VmError::Exec(ExecError::msg(format!(
                        "persistent: no scope offset recorded for '{name}'"
                    )))
                })?;
                let fn_name: Rc<str> = self.unit.name().into();
                let is_new = !self.host.persistent_exists(&fn_name, offset);
                if is_new {
                    self.host
                        .persistent_assign(&fn_name, offset, Value::empty_matrix());
                }
                self.set_slot_raw(
                    slot,
                    Value::Ref(Rc::new(RefTarget::Persistent { fn_name, offset })),
                );
                is_new
            }
            other => {
                return Err(VmError::Exec(ExecError::msg(format!(
                    "invalid GlobalInit kind byte {other}"
                ))))
            }
        };

        if !(has_init && is_new) {
            self.ip = skip;
        }
        Ok(())
    }

    /// Install a sibling/local compiled function into its slot.
    pub(crate) fn op_install_function(&mut self) -> VmResult<()> {
        let slot = self.fetch_slot();
        let cst = self.fetch_u16() as usize;
        match self.unit.constants.get(cst) {
            Some(Const::Unit(unit)) => {
                let fun = Function::compiled(unit.clone());
                self.set_slot_raw(slot, Value::Function(fun));
                Ok(())
            }
            _ => Err(VmError::Exec(ExecError::msg(
                "InstallFunction constant is not a compiled unit",
            ))),
        }
    }

    // =========================================================================
    // Ignored outputs
    // =========================================================================

    pub(crate) fn op_set_ignore_outputs(&mut self) {
        let n_ignored = self.fetch_u8() as usize;
        let n_total = self.fetch_u8() as usize;
        let mut ignored = Vec::with_capacity(n_ignored);
        for _ in 0..n_ignored {
            ignored.push(self.fetch_u8());
        }
        let depth = self.frames.len();
        let lvalues = self.ignore.push(&ignored, n_total, depth).lvalues.clone();
        self.host.set_lvalue_list(Some(lvalues));
    }

    pub(crate) fn op_clear_ignore_outputs(&mut self) {
        let n_slots = self.fetch_u8() as usize;
        let mut slots = Vec::with_capacity(n_slots);
        for _ in 0..n_slots {
            slots.push(self.fetch_u16() as usize);
        }
        if self.ignore.pop().is_some() {
            self.host.set_lvalue_list(None);
        }
        for slot in slots {
            self.set_slot_raw(slot, Value::Undef);
        }
    }

    /// Anonymous-function prologue: adopt the caller's pending ignore
    /// frame, if the call site pushed one. Never inferred; the compiler
    /// emits this for every anonymous root expression.
    pub(crate) fn op_anon_maybe_set_ignore_outputs(&mut self) {
        let caller_depth = match self.frames.len() {
            0 => return,
            depth => depth - 1,
        };
        let inherited = match self.ignore.active_at(caller_depth) {
            Some(frame) => frame.clone(),
            None => return,
        };
        let lvalues = inherited.lvalues.clone();
        let ignored: Vec<u8> = lvalues
            .iter()
            .enumerate()
            .filter(|(_, black)| **black)
            .map(|(i, _)| (i + 1) as u8)
            .collect();
        self.ignore.push(&ignored, lvalues.len(), self.frames.len());
        self.host.set_lvalue_list(Some(lvalues));
    }
}
