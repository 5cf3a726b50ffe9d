//! Indexed assignment (`a(i) = x`, `c{i} = x`, `s.f = x`, chained
//! forms), with the in-place matrix specializations.

use crate::error::{VmError, VmResult};
use crate::vm::Vm;
use ottava_bytecode::opcode::{INDEX_BRACE, INDEX_DOT, INDEX_PAREN};
use ottava_bytecode::Op;
use ottava_core::{
    apply_subsasgn, binop, expand_args, subsasgn, subsref, ExecError, IndexError, RefTarget,
    Value,
};
use smallvec::SmallVec;

impl<'h> Vm<'h> {
    /// Read a slot's assignment base, moving it out when the slot owns
    /// it directly and reading through an installed reference otherwise.
    fn take_assign_base(&mut self, slot: usize) -> (Option<RefTarget>, Value) {
        match self.slot_ref(slot) {
            Value::Ref(target) => {
                let target = (**target).clone();
                let current = self.ref_read(&target);
                (Some(target), current)
            }
            _ => (None, self.stack.take(self.bsp + slot)),
        }
    }

    fn store_assign_result(
        &mut self,
        slot: usize,
        target: Option<RefTarget>,
        value: Value,
    ) -> VmResult<()> {
        match target {
            Some(target) => {
                self.ref_write(&target, value);
                Ok(())
            }
            None => {
                self.set_slot_raw(slot, value);
                Ok(())
            }
        }
    }

    // =========================================================================
    // SubassignId / SubassignCellId / SubassignStruct
    // =========================================================================

    pub(crate) fn op_subassign_id(&mut self) -> VmResult<()> {
        let slot = self.fetch_slot();
        let nargs = self.fetch_u8() as usize;
        let rhs = self.stack.pop();
        let raw = self.stack.pop_n(nargs);

        self.maybe_specialize_mat_assign(slot, &raw, &rhs);

        let args = expand_args(raw);
        let rhs = self.storable(rhs)?;
        let (target, base) = self.take_assign_base(slot);
        let out = apply_subsasgn(base, INDEX_PAREN, &args, rhs)
            .map_err(|e| self.decorate_index_err(e, Some(slot)))?;
        self.store_assign_result(slot, target, out)
    }

    pub(crate) fn op_subassign_cell_id(&mut self) -> VmResult<()> {
        let slot = self.fetch_slot();
        let nargs = self.fetch_u8() as usize;
        let rhs = self.stack.pop();
        let raw = self.stack.pop_n(nargs);
        let args = expand_args(raw);
        let rhs = self.storable(rhs)?;
        let (target, base) = self.take_assign_base(slot);
        let out = apply_subsasgn(base, INDEX_BRACE, &args, rhs)
            .map_err(|e| self.decorate_index_err(e, Some(slot)))?;
        self.store_assign_result(slot, target, out)
    }

    pub(crate) fn op_subassign_struct(&mut self) -> VmResult<()> {
        let slot = self.fetch_slot();
        let field_id = self.fetch_u16() as usize;
        let field = self.id_name(field_id);
        let rhs = self.stack.pop();
        let rhs = self.storable(rhs)?;
        let (target, base) = self.take_assign_base(slot);
        if base.is_defined() && base.numel() != 1 {
            return Err(VmError::Exec(ExecError::msg(
                "invalid use of a N-d array in struct assignment",
            )));
        }
        let out = apply_subsasgn(base, INDEX_DOT, &[Value::Str(field)], rhs)
            .map_err(|e| self.decorate_index_err(e, Some(slot)))?;
        self.store_assign_result(slot, target, out)
    }

    // =========================================================================
    // Specialized in-place matrix stores
    // =========================================================================

    fn maybe_specialize_mat_assign(&mut self, slot: usize, raw_args: &[Value], rhs: &Value) {
        if self.unit.op_at(self.op_ip) != Some(Op::SubassignId) {
            return;
        }
        if !matches!(self.slot_ref(slot), Value::Matrix(_)) || !matches!(rhs, Value::Num(_)) {
            return;
        }
        let all_scalar = raw_args.iter().all(|v| matches!(v, Value::Num(_)));
        match raw_args.len() {
            1 if all_scalar => self.unit.patch_op(self.op_ip, Op::SubassignIdMat1d),
            2 if all_scalar => self.unit.patch_op(self.op_ip, Op::SubassignIdMat2d),
            _ => {}
        }
    }

    pub(crate) fn op_subassign_id_mat(&mut self, n_dims: usize) -> VmResult<()> {
        let slot = self.fetch_slot();
        let nargs = self.fetch_u8() as usize;

        // Guards: direct matrix slot, scalar double rhs and subscripts.
        let guards_hold = nargs == n_dims
            && matches!(self.slot_ref(slot), Value::Matrix(_))
            && matches!(self.stack.peek(0), Value::Num(_))
            && (1..=n_dims)
                .all(|d| matches!(self.stack.peek(d), Value::Num(_)));
        if !guards_hold {
            self.unit.patch_op(self.op_ip, Op::SubassignId);
            self.redispatch();
            return Ok(());
        }

        let rhs = match self.stack.pop() {
            Value::Num(v) => v,
            _ => unreachable!("guard checked rhs"),
        };
        let mut idxs = [0.0f64; 2];
        for d in (0..n_dims).rev() {
            idxs[d] = match self.stack.pop() {
                Value::Num(v) => v,
                _ => unreachable!("guard checked subscript"),
            };
        }

        let mut matrix = match self.stack.take(self.bsp + slot) {
            Value::Matrix(m) => m,
            _ => unreachable!("guard checked slot"),
        };
        let target = Value::make_unique_matrix(&mut matrix);

        let check = |v: f64, dim: usize, vm: &Vm<'_>| -> VmResult<usize> {
            if v < 1.0 || v != v.trunc() || !v.is_finite() {
                let mut e = IndexError::bad_subscript(dim, n_dims, v);
                if let Some(name) = vm.index_error_name(Some(slot)) {
                    e.set_object_name(&name);
                }
                return Err(VmError::Index(e));
            }
            Ok(v as usize - 1)
        };

        if n_dims == 1 {
            let i = check(idxs[0], 1, self)?;
            target.grow_linear_to(i).map_err(VmError::Exec)?;
            target.set_linear(i, rhs);
        } else {
            let r = check(idxs[0], 1, self)?;
            let c = check(idxs[1], 2, self)?;
            target.grow_to(r, c);
            target.set_elem(r, c, rhs);
        }
        self.set_slot_raw(slot, Value::Matrix(matrix));
        Ok(())
    }

    // =========================================================================
    // Object and chained assignment
    // =========================================================================

    /// Assign into an expression result sitting on the stack; the
    /// rewritten value is pushed back for the surrounding expression.
    pub(crate) fn op_subassign_obj(&mut self) -> VmResult<()> {
        let nargs = self.fetch_u8() as usize;
        let kind = self.fetch_u8();
        let rhs = self.stack.pop();
        let raw = self.stack.pop_n(nargs);
        let args = expand_args(raw);
        let base = self.stack.pop();
        let rhs = self.storable(rhs)?;
        let out = match &base {
            Value::Object(obj) => obj
                .subsasgn(&[kind], &[args.to_vec()], rhs)
                .map_err(VmError::Exec)?,
            _ => apply_subsasgn(base, kind, &args, rhs)
                .map_err(|e| self.decorate_index_err(e, None))?,
        };
        self.stack.push(out);
        Ok(())
    }

    /// `SubassignChained slot, op, n_links, (nargs, kind)*`: argument
    /// groups pop in reverse link order, then one `subsasgn` walks the
    /// whole chain (reading first for compound operators).
    pub(crate) fn op_subassign_chained(&mut self) -> VmResult<()> {
        let slot = self.fetch_slot();
        let op_byte = self.fetch_u8();
        let n_links = self.fetch_u8() as usize;
        let mut link_spec = Vec::with_capacity(n_links);
        for _ in 0..n_links {
            let nargs = self.fetch_u8() as usize;
            let kind = self.fetch_u8();
            link_spec.push((nargs, kind));
        }

        let rhs = self.stack.pop();
        let mut idxs: Vec<Vec<Value>> = vec![Vec::new(); n_links];
        for (i, (nargs, _)) in link_spec.iter().enumerate().rev() {
            let raw = self.stack.pop_n(*nargs);
            let args: SmallVec<[Value; 8]> = expand_args(raw);
            idxs[i] = args.to_vec();
        }
        let kinds: Vec<u8> = link_spec.iter().map(|(_, k)| *k).collect();

        let mut rhs = self.storable(rhs)?;
        let (target, base) = self.take_assign_base(slot);

        // Compound form reads the chain target first.
        if op_byte != 0 {
            let op = super::arith::compound_op(op_byte - 1)?;
            let current = subsref(&base, &kinds, &idxs, 1)
                .map_err(|e| self.decorate_index_err(e, Some(slot)))?
                .into_iter()
                .next()
                .unwrap_or(Value::Undef);
            if !current.is_defined() {
                return Err(VmError::UndefinedId {
                    name: self.id_name(slot).to_string(),
                });
            }
            rhs = binop(op, &current, &rhs).map_err(VmError::Exec)?;
        }

        let out = subsasgn(base, &kinds, &idxs, rhs)
            .map_err(|e| self.decorate_index_err(e, Some(slot)))?;
        self.store_assign_result(slot, target, out)
    }
}
