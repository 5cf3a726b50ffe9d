//! The chained-indexing protocol and `end` resolution.
//!
//! `a.b(c){d}` lowers to one `IndexStructCall` leader plus followers.
//! When the leftmost value tolerates one bulk `subsref`, the links
//! accumulate `(kind, args)` into a chain wrapper on TOS and the final
//! link issues a single chained read. Values that demand stepwise
//! subsref (objects with their own dispatch) index link by link instead,
//! and a link whose current value is callable turns into a function call
//! whose result the next follower picks up — which is how compiled
//! functions run mid-chain and the protocol resumes afterwards.

use crate::error::{VmError, VmResult};
use crate::vm::Vm;
use ottava_bytecode::opcode::INDEX_PAREN;
use ottava_core::{
    dispatch_kind, end_value, expand_args, simple_subsref, subsref, ChainAccum, DispatchKind,
    ExecError, Value,
};
use std::cell::RefCell;
use std::rc::Rc;

impl<'h> Vm<'h> {
    // =========================================================================
    // Plain struct field read
    // =========================================================================

    pub(crate) fn op_index_struct(&mut self) -> VmResult<()> {
        let nargout = self.fetch_u8() as usize;
        let field_id = self.fetch_u16() as usize;
        let nargout = self.take_nargout(nargout);
        let field = self.id_name(field_id);
        let base = self.stack.pop();
        let results = simple_subsref(&base, ottava_bytecode::opcode::INDEX_DOT,
            &[Value::Str(field)], nargout.max(1))
            .map_err(|e| self.decorate_index_err(e, None))?;
        self.push_index_results(results, nargout, false);
        Ok(())
    }

    // =========================================================================
    // Chained subsref: leader
    // =========================================================================

    pub(crate) fn op_index_struct_call(&mut self) -> VmResult<()> {
        let nargs = self.fetch_u8() as usize;
        let kind = self.fetch_u8();
        let raw = self.stack.pop_n(nargs);
        let args = expand_args(raw);
        let base = self.stack.pop();

        // A callable head with a paren link is a call, not an indexing;
        // its result re-enters the chain at the next follower.
        if is_callable(&base) && kind == INDEX_PAREN {
            return self.call_value(base, args, 1, "<chain>");
        }

        if needs_stepwise(&base) {
            let mut results = simple_subsref(&base, kind, &args, 1)
                .map_err(|e| self.decorate_index_err(e, None))?;
            let v = results.drain(..).next().unwrap_or(Value::Undef);
            self.stack.push(v);
            return Ok(());
        }

        let accum = ChainAccum {
            base,
            kinds: vec![kind],
            idxs: vec![args.to_vec()],
        };
        self.stack.push(Value::Chain(Rc::new(RefCell::new(accum))));
        Ok(())
    }

    // =========================================================================
    // Chained subsref: followers
    // =========================================================================

    pub(crate) fn op_index_struct_subcall(&mut self) -> VmResult<()> {
        let i = self.fetch_u8() as usize;
        let n = self.fetch_u8() as usize;
        let nargs = self.fetch_u8() as usize;
        let kind = self.fetch_u8();
        let last = i == n;

        let raw = self.stack.pop_n(nargs);
        let args = expand_args(raw);
        let top = self.stack.pop();

        match top {
            Value::Chain(chain) => {
                {
                    let mut accum = chain.borrow_mut();
                    accum.kinds.push(kind);
                    accum.idxs.push(args.to_vec());
                }
                if !last {
                    self.stack.push(Value::Chain(chain));
                    return Ok(());
                }
                let nargout = self.take_nargout(1);
                let accum = chain.borrow();
                let results = subsref(&accum.base, &accum.kinds, &accum.idxs, nargout.max(1))
                    .map_err(|e| self.decorate_index_err(e, None))?;
                drop(accum);
                self.finish_chain(results, nargout)
            }
            // Stepwise mode: the previous link left a plain value.
            value => {
                if is_callable(&value) && kind == INDEX_PAREN {
                    let nargout = if last { self.take_nargout(1) } else { 1 };
                    return self.call_value(value, args, nargout, "<chain>");
                }
                let nargout = if last { self.take_nargout(1) } else { 1 };
                let results = simple_subsref(&value, kind, &args, nargout.max(1))
                    .map_err(|e| self.decorate_index_err(e, None))?;
                if last {
                    self.finish_chain(results, nargout)
                } else {
                    let v = results.into_iter().next().unwrap_or(Value::Undef);
                    self.stack.push(v);
                    Ok(())
                }
            }
        }
    }

    /// Final link: a lone callable result is invoked, everything else is
    /// pushed under the usual nargout packing.
    fn finish_chain(&mut self, results: Vec<Value>, nargout: usize) -> VmResult<()> {
        if results.len() == 1 && results[0].is_function() {
            let callee = results.into_iter().next().unwrap();
            return self.call_value(callee, Default::default(), nargout, "<chain>");
        }
        self.push_index_results(results, nargout, true);
        Ok(())
    }

    // =========================================================================
    // Indexing an expression result
    // =========================================================================

    pub(crate) fn op_index_obj(&mut self) -> VmResult<()> {
        let nargout = self.fetch_u8() as usize;
        let nargs = self.fetch_u8() as usize;
        let kind = self.fetch_u8();
        let nargout = self.take_nargout(nargout);

        let raw = self.stack.pop_n(nargs);
        let args = expand_args(raw);
        let base = self.stack.pop();

        if is_callable(&base) && kind == INDEX_PAREN {
            return self.call_value(base, args, nargout, "<expression>");
        }
        let results = simple_subsref(&base, kind, &args, nargout.max(1))
            .map_err(|e| self.decorate_index_err(e, None))?;
        self.push_index_results(results, nargout, kind != INDEX_PAREN);
        Ok(())
    }

    // =========================================================================
    // `end` resolution
    // =========================================================================

    /// `end` inside an index over a named slot.
    pub(crate) fn op_end_id(&mut self) -> VmResult<()> {
        let slot = self.fetch_slot();
        let nargs = self.fetch_u8() as usize;
        let idx = self.fetch_u8() as usize;
        let v = self.slot_deref(slot);
        if !v.is_defined() {
            return Err(VmError::UndefinedId {
                name: self.id_name(slot).to_string(),
            });
        }
        let out = end_value(&v, idx + 1, nargs).map_err(|e| self.decorate_index_err(e, Some(slot)))?;
        self.stack.push(Value::Num(out));
        Ok(())
    }

    /// `end` for an indexable sitting on the stack (the object is
    /// `depth` values below TOS, under the index args built so far).
    pub(crate) fn op_end_obj(&mut self) -> VmResult<()> {
        let depth = self.fetch_u8() as usize;
        let nargs = self.fetch_u8() as usize;
        let idx = self.fetch_u8() as usize;
        let v = self.stack.peek(depth).clone();
        let out = end_value(&v, idx + 1, nargs).map_err(|e| self.decorate_index_err(e, None))?;
        self.stack.push(Value::Num(out));
        Ok(())
    }

    /// The nested case: the innermost name that actually holds a value
    /// wins; names that resolve to functions are skipped outward.
    pub(crate) fn op_end_x_n(&mut self) -> VmResult<()> {
        let n = self.fetch_u8() as usize;
        let mut entries = Vec::with_capacity(n);
        for _ in 0..n {
            let nargs = self.fetch_u8() as usize;
            let idx = self.fetch_u8() as usize;
            let kind = self.fetch_u8();
            let slot = self.fetch_u16() as usize;
            entries.push((nargs, idx, kind, slot));
        }

        for (nargs, idx, kind, slot) in entries {
            let v = if kind == 0 {
                self.slot_deref(slot)
            } else {
                self.stack.peek(slot).clone()
            };
            if !v.is_defined() || is_callable(&v) {
                continue;
            }
            let out =
                end_value(&v, idx + 1, nargs).map_err(|e| self.decorate_index_err(e, None))?;
            self.stack.push(Value::Num(out));
            return Ok(());
        }
        Err(VmError::Exec(ExecError::msg(
            "'end': invalid use in this context",
        )))
    }
}

fn is_callable(v: &Value) -> bool {
    matches!(
        dispatch_kind(v),
        DispatchKind::Call | DispatchKind::Handle | DispatchKind::NestedHandle
    )
}

fn needs_stepwise(v: &Value) -> bool {
    match v {
        Value::Object(obj) => obj.needs_stepwise_subsref(),
        _ => false,
    }
}
