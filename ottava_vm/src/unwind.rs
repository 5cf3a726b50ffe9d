//! Exception unwinding.
//!
//! An erroring handler returns its error kind to the dispatch loop,
//! which hands it here. The unwinder publishes the error to the host
//! error system, then walks frames: a covering `try`/`catch` or
//! `unwind-protect` range trims the operand stack to its recorded depth,
//! pushes the error struct and resumes at the handler target; otherwise
//! the frame is torn down and the walk continues in the caller. Errors
//! that reach the root propagate out of `execute` untouched so the host
//! can rethrow the original exception.
//!
//! Interrupts honor only unwind-protect ranges; debug-quit and exit
//! bypass every handler.

use crate::error::{VmError, VmResult};
use crate::vm::Vm;
use ottava_bytecode::UnwindKind;
use ottava_core::{ErrorStackFrame, ExecError, Struct, Value};

impl<'h> Vm<'h> {
    /// Walk the unwind tables for `err`. `Ok(())` means a handler was
    /// found and dispatch may resume; `Err` propagates to the caller of
    /// `execute`.
    pub(crate) fn unwind(&mut self, mut err: VmError) -> VmResult<()> {
        // Attach the user-visible name to index errors while the
        // erroring instruction's tables are still in scope.
        if let VmError::Index(e) = &mut err {
            if e.object_name.is_none() {
                if let Some(name) = self.unit.arg_name_for_ip(self.instr_ip as u32) {
                    e.set_object_name(name);
                }
            }
        }

        // Publish to the host error system (so `lasterr` sees it) with
        // the source location of the faulting instruction.
        let mut exec = err.to_exec_error();
        if let Some(loc) = self.unit.loc_for_ip(self.instr_ip as u32) {
            exec = exec.with_frame(ErrorStackFrame {
                name: self.unit.name().to_string(),
                line: loc.line,
                column: loc.column,
            });
        }
        self.host.set_active_bytecode_ip(self.instr_ip);
        self.host.save_exception(&exec);

        let only_unwind_protect = matches!(err, VmError::Interrupt);
        let no_handlers = !err.runs_unwind_protect();

        loop {
            let entry = if no_handlers {
                None
            } else {
                self.unit
                    .unwind_entry_for_ip(self.instr_ip as u32, only_unwind_protect)
                    .copied()
            };

            if let Some(entry) = entry {
                debug_assert!(matches!(
                    entry.kind,
                    UnwindKind::TryCatch | UnwindKind::UnwindProtect
                ));
                // Trim operands to the handler's recorded depth. Loop
                // state integers within the trimmed region drop with
                // everything else; the for-loop unwind entries identify
                // them for machines whose stacks cannot drop them
                // uniformly.
                let target_sp = self.bsp + self.n_locals() + entry.stack_depth as usize;
                self.stack.truncate(target_sp);

                self.host.recover_from_exception();

                // The handler binds a scalar struct view of the error
                // just published to the host error system.
                self.stack.push(error_struct(&exec));

                self.ip = entry.target_ip as usize;
                self.instr_ip = entry.target_ip as usize;
                self.echo_state.reset();
                return Ok(());
            }

            // No handler here: abandon this frame.
            self.host.vm_unwinds();
            if let Some(profiler) = &mut self.profiler {
                profiler.exit_fn(self.unit.profiler_name());
            }
            self.stack.truncate(self.bsp);
            self.host.pop_stack_frame();

            match self.frames.pop() {
                Some(ctx) => {
                    self.unit = ctx.unit;
                    self.ip = ctx.ip;
                    self.bsp = ctx.bsp;
                    // The faulting location in the caller is its call
                    // instruction; close enough for its tables is the
                    // return address.
                    self.instr_ip = ctx.ip;
                    let dropped = self.ignore.unwind_to(self.frames.len());
                    for _ in 0..dropped {
                        self.host.set_lvalue_list(None);
                    }
                }
                None => {
                    // Leaving the VM entirely: every ignore frame goes,
                    // including the root's own.
                    while self.ignore.pop().is_some() {
                        self.host.set_lvalue_list(None);
                    }
                    debug_assert!(self.stack.guards_intact());
                    return Err(err);
                }
            }
        }
    }
}

/// The `{message, identifier, stack}` struct a catch clause binds.
pub(crate) fn error_struct(err: &ExecError) -> Value {
    let mut s = Struct::new();
    s.set("message", Value::str(&err.message));
    s.set("identifier", Value::str(&err.identifier));
    let stack = if err.stack.is_empty() {
        Value::empty_matrix()
    } else {
        let mut frames = Struct::new();
        // Scalar struct view of the innermost frame; the full frame
        // list is host territory.
        let top = &err.stack[0];
        frames.set("name", Value::str(&top.name));
        frames.set("line", Value::Num(f64::from(top.line)));
        frames.set("column", Value::Num(f64::from(top.column)));
        Value::strct(frames)
    };
    s.set("stack", stack);
    Value::strct(s)
}
