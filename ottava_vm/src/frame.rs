//! Frame construction, calls, and returns.
//!
//! A frame occupies a contiguous run of the operand stack:
//!
//! ```text
//! bsp[0]              nargout (Int; readable as %nargout)
//! bsp[1 .. R]         return slots
//! bsp[R+1 .. R+A]     argument slots (last is varargin when variadic)
//! bsp[R+A+1 .. L-1]   pure locals
//! bsp[L ..]           transient operands
//! ```
//!
//! The caller registers spilled across a compiled-to-compiled call (code,
//! constants, ids, unwind table, base pointer, return address, demanded
//! output count) live in a [`CallerContext`] record on a side stack,
//! pushed and popped in call order; the operand-stack layout and the
//! stack-depth invariants are unchanged by that placement.

use crate::error::{VmError, VmResult};
use crate::vm::{Flow, Vm};
use ottava_bytecode::BytecodeUnit;
use ottava_core::{CellArray, ExecError, Value};
use smallvec::SmallVec;
use std::rc::Rc;

/// Hard cap on effective arguments to a variadic-input call, matching
/// the tree-walking evaluator's limit.
pub const MAX_VARARG_CALL_ARGS: usize = 512;

/// Input-count rules for a callee: the variadic cap and the too-many-
/// inputs check, applied before any caller state is disturbed.
fn validate_inputs(unit: &BytecodeUnit, n_args: usize) -> VmResult<()> {
    let hdr = unit.header();
    if hdr.is_vararg_in() {
        if n_args > MAX_VARARG_CALL_ARGS {
            return Err(VmError::Exec(ExecError::invalid_fun_call(format!(
                "{}: function called with too many inputs (max {MAX_VARARG_CALL_ARGS})",
                unit.name()
            ))));
        }
    } else if n_args > hdr.arg_slots() {
        return Err(VmError::Exec(ExecError::too_many_inputs(unit.name())));
    }
    Ok(())
}

/// Saved caller registers for one active compiled-to-compiled call.
#[derive(Debug)]
pub(crate) struct CallerContext {
    pub unit: Rc<BytecodeUnit>,
    /// Return address: first byte after the call instruction.
    pub ip: usize,
    pub bsp: usize,
    /// How many values the caller wants pushed back.
    pub nvalback: usize,
}

impl<'h> Vm<'h> {
    // =========================================================================
    // Frame entry
    // =========================================================================

    /// Build the root frame for `execute`.
    pub(crate) fn enter_root_frame(
        &mut self,
        unit: &Rc<BytecodeUnit>,
        args: &[Value],
        nargout: usize,
    ) -> VmResult<()> {
        self.stack.check_headroom(unit.header().n_locals as usize)?;
        validate_inputs(unit, args.len())?;
        self.unit = unit.clone();
        self.bsp = self.stack.sp();
        self.ip = unit.entry_ip();
        self.echo_state.reset();

        let collected: SmallVec<[Value; 8]> = args.iter().cloned().collect();
        self.host
            .push_stack_frame(unit.name(), nargout, collected.len(), None);
        if let Some(profiler) = &mut self.profiler {
            profiler.enter_fn(&unit.profiler_name().into());
        }
        self.fill_frame_slots(nargout, collected, &[]);
        Ok(())
    }

    /// Switch into a compiled callee: spill the caller registers, build
    /// the callee frame, and leave dispatch running at its entry.
    pub(crate) fn call_compiled(
        &mut self,
        unit: Rc<BytecodeUnit>,
        args: SmallVec<[Value; 8]>,
        nargout: usize,
        captures: &[Value],
        closure_ctx: Option<u64>,
    ) -> VmResult<()> {
        let hdr = unit.header();
        if !hdr.is_vararg_out() && !hdr.is_anon() && nargout > hdr.return_slots().max(1) {
            return Err(VmError::Exec(ExecError::too_many_outputs(unit.name())));
        }
        self.stack.check_headroom(hdr.n_locals as usize)?;
        // Marshaling must be known-good before any caller state moves;
        // a failure past this point would unwind a half-built frame.
        validate_inputs(&unit, args.len())?;

        self.host
            .push_stack_frame(unit.name(), nargout, args.len(), closure_ctx);
        if let Some(profiler) = &mut self.profiler {
            profiler.enter_fn(&unit.profiler_name().into());
        }

        let caller_unit = std::mem::replace(&mut self.unit, unit);
        self.frames.push(CallerContext {
            unit: caller_unit,
            ip: self.ip,
            bsp: self.bsp,
            nvalback: nargout,
        });
        self.bsp = self.stack.sp();
        self.ip = self.unit.entry_ip();
        self.echo_state.reset();

        self.fill_frame_slots(nargout, args, captures);
        Ok(())
    }

    /// Write `nargout`, the undefined slot run, and the marshaled
    /// arguments for the unit already installed in `self.unit`. Input
    /// counts were validated up front.
    fn fill_frame_slots(
        &mut self,
        nargout: usize,
        args: SmallVec<[Value; 8]>,
        captures: &[Value],
    ) {
        let hdr = self.unit.header();
        let n_locals = hdr.n_locals as usize;
        let r = hdr.return_slots();
        let a = hdr.arg_slots();

        self.stack.push(Value::Int(nargout as i64));
        for _ in 1..n_locals {
            self.stack.push(Value::Undef);
        }

        if hdr.is_vararg_in() {
            let named = a.saturating_sub(1);
            let mut args = args.into_iter();
            for slot in 0..named {
                let v = args.next().unwrap_or(Value::Undef);
                self.set_slot_raw(1 + r + slot, v);
            }
            let rest: Vec<Value> = args.collect();
            self.set_slot_raw(1 + r + named, Value::cell(CellArray::row(rest)));
        } else {
            for (slot, v) in args.into_iter().enumerate() {
                self.set_slot_raw(1 + r + slot, v);
            }
        }

        // Anonymous captures seed the leading pure locals.
        let capture_base = 1 + r + a;
        for (i, v) in captures.iter().enumerate() {
            self.set_slot_raw(capture_base + i, v.clone());
        }
    }

    // =========================================================================
    // Return
    // =========================================================================

    pub(crate) fn op_ret(&mut self, anon: bool) -> VmResult<Flow> {
        let hdr = self.unit.header();
        let nargout_req = self.frame_nargout();
        // The host gets a chance to persist locals captured by closures.
        self.host.vm_unwinds();

        // Harvest return slots before the frame is torn down.
        let r = if anon || hdr.is_anon() {
            1
        } else {
            hdr.return_slots()
        };
        let mut rets: Vec<Value> = (1..=r).map(|s| self.stack.take(self.bsp + s)).collect();

        // Variadic output: the trailing varargout cell unpacks into
        // actual return values.
        if hdr.is_vararg_out() {
            match rets.pop() {
                Some(Value::Cell(cell)) => {
                    rets.extend(cell.data().iter().cloned());
                }
                Some(Value::Undef) | None => {}
                Some(other) => {
                    return Err(VmError::Exec(ExecError::msg(format!(
                        "varargout must be a cell array, not '{}'",
                        other.type_name()
                    ))))
                }
            }
        }

        // Anonymous bodies may return a cs-list; it expands to the
        // demanded outputs.
        if (anon || hdr.is_anon()) && rets.len() == 1 && rets[0].is_cs_list() {
            rets = std::mem::take(&mut rets[0]).list_value();
        }

        if let Some(profiler) = &mut self.profiler {
            profiler.exit_fn(self.unit.profiler_name());
        }

        // Locals (and any leftover operands) drop base-to-top.
        self.stack.truncate(self.bsp);
        self.host.pop_stack_frame();

        match self.frames.pop() {
            Some(ctx) => {
                self.unit = ctx.unit;
                self.ip = ctx.ip;
                self.bsp = ctx.bsp;
                // Even nargout=0 hands one value back for `ans`.
                let demand = ctx.nvalback.max(1);
                rets.resize(demand, Value::Undef);
                for v in rets {
                    self.stack.push(v);
                }
                let dropped = self.ignore.unwind_to(self.frames.len());
                for _ in 0..dropped {
                    self.host.set_lvalue_list(None);
                }
                Ok(Flow::Continue)
            }
            None => {
                let demand = nargout_req.max(1);
                rets.resize(demand, Value::Undef);
                while matches!(rets.last(), Some(Value::Undef)) {
                    rets.pop();
                }
                debug_assert!(self.stack.guards_intact());
                Ok(Flow::Finished(rets))
            }
        }
    }
}
