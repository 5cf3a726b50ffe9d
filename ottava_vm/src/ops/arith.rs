//! Arithmetic, relational and unary handlers, with the double-specialized
//! variants that patch themselves in and out of the instruction stream.
//!
//! Specialization discipline: a generic handler that sees two scalar
//! doubles patches its opcode byte to the `*Dbl` form and still finishes
//! the generic computation (the two are semantically identical). A
//! specialized handler whose guard fails patches the generic byte back
//! and re-dispatches the same instruction.

use crate::error::{VmError, VmResult};
use crate::host::signal_checkpoint;
use crate::vm::Vm;
use ottava_bytecode::Op;
use ottava_core::{binop, scalar_binop, unop, BinOp, ExecError, UnOp, Value};

impl<'h> Vm<'h> {
    // =========================================================================
    // Binary operators
    // =========================================================================

    pub(crate) fn op_binary(&mut self, op: BinOp, specialized: Option<Op>) -> VmResult<()> {
        signal_checkpoint(self.host)?;
        let b = self.stack.pop();
        let a = self.stack.pop();
        if let (Value::Num(_), Value::Num(_)) = (&a, &b) {
            if let Some(spec) = specialized {
                self.unit.patch_op(self.op_ip, spec);
            }
        }
        let out = binop(op, &a, &b)?;
        self.stack.push(out);
        Ok(())
    }

    /// double×double fast path; anything else despecializes.
    pub(crate) fn op_binary_dbl(&mut self, op: BinOp, generic: Op) -> VmResult<()> {
        if let (Value::Num(y), Value::Num(x)) =
            (self.stack.peek(0).clone(), self.stack.peek(1).clone())
        {
            signal_checkpoint(self.host)?;
            self.stack.pop();
            self.stack.pop();
            self.stack.push(scalar_binop(op, x, y)?);
            return Ok(());
        }
        self.unit.patch_op(self.op_ip, generic);
        self.redispatch();
        Ok(())
    }

    /// `a' * b`, `a * b'`, `a' \ b` and friends: the transpose folds
    /// into the binary op.
    pub(crate) fn op_fused_trans(
        &mut self,
        op: BinOp,
        lhs_transposed: bool,
        conjugate: bool,
    ) -> VmResult<()> {
        signal_checkpoint(self.host)?;
        let b = self.stack.pop();
        let a = self.stack.pop();
        let trans = if conjugate { UnOp::Herm } else { UnOp::Trans };
        let out = if lhs_transposed {
            binop(op, &unop(trans, &a)?, &b)?
        } else {
            binop(op, &a, &unop(trans, &b)?)?
        };
        self.stack.push(out);
        Ok(())
    }

    // =========================================================================
    // Unary operators
    // =========================================================================

    pub(crate) fn op_unary(&mut self, op: UnOp, specialized: Option<Op>) -> VmResult<()> {
        signal_checkpoint(self.host)?;
        let a = self.stack.pop();
        match (&a, specialized) {
            (Value::Num(_), Some(spec)) => self.unit.patch_op(self.op_ip, spec),
            (Value::Bool(_), Some(_)) if op == UnOp::Not => {
                self.unit.patch_op(self.op_ip, Op::NotBool)
            }
            _ => {}
        }
        let out = unop(op, &a)?;
        self.stack.push(out);
        Ok(())
    }

    pub(crate) fn op_not_dbl(&mut self) -> VmResult<()> {
        if let Value::Num(x) = self.stack.peek(0) {
            signal_checkpoint(self.host)?;
            let out = Value::Bool(*x == 0.0);
            self.stack.pop();
            self.stack.push(out);
            return Ok(());
        }
        self.unit.patch_op(self.op_ip, Op::Not);
        self.redispatch();
        Ok(())
    }

    pub(crate) fn op_not_bool(&mut self) -> VmResult<()> {
        if let Value::Bool(b) = self.stack.peek(0) {
            signal_checkpoint(self.host)?;
            let out = Value::Bool(!*b);
            self.stack.pop();
            self.stack.push(out);
            return Ok(());
        }
        self.unit.patch_op(self.op_ip, Op::Not);
        self.redispatch();
        Ok(())
    }

    pub(crate) fn op_usub_dbl(&mut self) -> VmResult<()> {
        if let Value::Num(x) = self.stack.peek(0) {
            signal_checkpoint(self.host)?;
            let out = Value::Num(-*x);
            self.stack.pop();
            self.stack.push(out);
            return Ok(());
        }
        self.unit.patch_op(self.op_ip, Op::Usub);
        self.redispatch();
        Ok(())
    }

    // =========================================================================
    // Increment / decrement of a slot
    // =========================================================================

    /// `x++`/`x--`/`++x`/`--x`: prefix pushes the stepped value, postfix
    /// the previous one.
    pub(crate) fn op_step_id(
        &mut self,
        delta: f64,
        prefix: bool,
        specialized: Option<Op>,
    ) -> VmResult<()> {
        signal_checkpoint(self.host)?;
        let slot = self.fetch_slot();
        let old = self.slot_deref(slot);
        if !old.is_defined() {
            return Err(VmError::UndefinedId {
                name: self.id_name(slot).to_string(),
            });
        }
        if matches!(old, Value::Num(_)) {
            if let Some(spec) = specialized {
                self.unit.patch_op(self.op_ip, spec);
            }
        }
        let new = binop(BinOp::Add, &old, &Value::Num(delta))?;
        let pushed = if prefix { new.clone() } else { old };
        self.write_slot_or_ref(slot, new)?;
        self.stack.push(pushed);
        Ok(())
    }

    pub(crate) fn op_step_id_dbl(
        &mut self,
        delta: f64,
        prefix: bool,
        generic: Op,
    ) -> VmResult<()> {
        let slot = self.fetch_slot();
        if let Value::Num(old) = self.slot_ref(slot) {
            let old = *old;
            signal_checkpoint(self.host)?;
            let new = old + delta;
            self.set_slot_raw(slot, Value::Num(new));
            self.stack.push(Value::Num(if prefix { new } else { old }));
            return Ok(());
        }
        self.unit.patch_op(self.op_ip, generic);
        self.redispatch();
        Ok(())
    }

    // =========================================================================
    // Compound assignment
    // =========================================================================

    pub(crate) fn op_assign_compound(&mut self) -> VmResult<()> {
        let slot = self.fetch_slot();
        let op_byte = self.fetch_u8();
        let op = compound_op(op_byte)?;
        let rhs = self.stack.pop();
        let current = self.slot_deref(slot);
        if !current.is_defined() {
            return Err(VmError::UndefinedId {
                name: self.id_name(slot).to_string(),
            });
        }
        let out = binop(op, &current, &rhs)?;
        self.write_slot_or_ref(slot, out)?;
        Ok(())
    }
}

/// Map a `CompoundOp` byte onto the operator it applies.
pub(crate) fn compound_op(byte: u8) -> VmResult<BinOp> {
    use ottava_bytecode::CompoundOp::*;
    let op = ottava_bytecode::CompoundOp::from_u8(byte).ok_or_else(|| {
        VmError::Exec(ExecError::msg(format!(
            "invalid compound-assignment operator byte {byte}"
        )))
    })?;
    Ok(match op {
        AddEq => BinOp::Add,
        SubEq => BinOp::Sub,
        MulEq => BinOp::Mul,
        DivEq => BinOp::Div,
        PowEq => BinOp::Pow,
        LdivEq => BinOp::Ldiv,
        ElMulEq => BinOp::ElMul,
        ElDivEq => BinOp::ElDiv,
        ElPowEq => BinOp::ElPow,
        ElLdivEq => BinOp::ElLdiv,
        AndEq => BinOp::ElAnd,
        OrEq => BinOp::ElOr,
    })
}
