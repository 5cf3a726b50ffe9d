//! Branches and loop iteration.

use crate::error::{VmError, VmResult};
use crate::host::signal_checkpoint;
use crate::vm::Vm;
use ottava_bytecode::Op;
use ottava_core::{binop, BinOp, ExecError, Value};

impl<'h> Vm<'h> {
    // =========================================================================
    // Conditional branches
    // =========================================================================

    /// `JmpIf`/`JmpIfn`; a scalar bool condition installs the
    /// bool-specialized variant. Conditions are loop back-edges for
    /// `while`, so they are signal checkpoints like the `for` conds.
    pub(crate) fn op_jmp_cond(&mut self, jump_when: bool, specialized: Option<Op>) -> VmResult<()> {
        signal_checkpoint(self.host)?;
        let target = self.fetch_u16() as usize;
        let cond = self.stack.pop();
        if !cond.is_defined() {
            return Err(VmError::UndefinedCondition);
        }
        if matches!(cond, Value::Bool(_)) {
            if let Some(spec) = specialized {
                self.unit.patch_op(self.op_ip, spec);
            }
        }
        if cond.is_true().map_err(VmError::Exec)? == jump_when {
            self.ip = target;
        }
        Ok(())
    }

    pub(crate) fn op_jmp_cond_bool(&mut self, jump_when: bool, generic: Op) -> VmResult<()> {
        if let Value::Bool(b) = self.stack.peek(0) {
            let b = *b;
            signal_checkpoint(self.host)?;
            let target = self.fetch_u16() as usize;
            self.stack.pop();
            if b == jump_when {
                self.ip = target;
            }
            return Ok(());
        }
        self.unit.patch_op(self.op_ip, generic);
        self.redispatch();
        Ok(())
    }

    /// Switch dispatch: TOS is the case label, beneath it the switch
    /// value (which stays put until the switch ends). Jumps when the
    /// label does NOT match.
    pub(crate) fn op_jmp_ifn_case_match(&mut self) -> VmResult<()> {
        let target = self.fetch_u16() as usize;
        let label = self.stack.pop();
        let subject = self.stack.top().clone();
        if !case_matches(&subject, &label)? {
            self.ip = target;
        }
        Ok(())
    }

    // =========================================================================
    // For loops
    // =========================================================================

    /// Inspect the iterable and push the loop-state integer pair
    /// `(n, i = −1)` above it.
    pub(crate) fn op_for_setup(&mut self) -> VmResult<()> {
        let rhs = self.stack.pop();
        let n: usize = match &rhs {
            Value::Range(r) => r.numel(),
            Value::Matrix(m) => {
                if m.rows() > 0 {
                    m.cols()
                } else {
                    0
                }
            }
            Value::Cell(c) => {
                if c.rows() > 0 {
                    c.cols()
                } else {
                    0
                }
            }
            Value::Str(s) => s.len(),
            Value::Struct(_) => 1,
            Value::Num(_) | Value::Bool(_) | Value::Int(_) | Value::Complex(..) => 1,
            // The undefined iterable takes the empty-range path: zero
            // iterations, loop variable still bound once.
            Value::Undef => 0,
            other => {
                return Err(VmError::Exec(ExecError::msg(format!(
                    "'{}' cannot be iterated by a for loop",
                    other.type_name()
                ))))
            }
        };
        self.stack.push(rhs);
        self.stack.push(Value::Int(n as i64));
        self.stack.push(Value::Int(-1));
        Ok(())
    }

    /// Advance the counter; either bind the next iteration value or
    /// jump past the body. Loop back-edges are signal checkpoints.
    pub(crate) fn op_for_cond(&mut self) -> VmResult<()> {
        signal_checkpoint(self.host)?;
        let slot = self.fetch_slot();
        let after = self.fetch_u16() as usize;

        let i = match self.stack.pop() {
            Value::Int(i) => i + 1,
            other => {
                return Err(VmError::Exec(ExecError::msg(format!(
                    "for-loop state corrupted: counter was {other:?}"
                ))))
            }
        };
        let n = match self.stack.top() {
            Value::Int(n) => *n,
            other => {
                return Err(VmError::Exec(ExecError::msg(format!(
                    "for-loop state corrupted: count was {other:?}"
                ))))
            }
        };
        self.stack.push(Value::Int(i));

        if i >= n {
            // Loop done. An empty iterable still binds the variable to
            // the original right-hand side once.
            if n == 0 {
                let rhs = self.stack.peek(2).clone();
                if rhs.is_defined() {
                    self.write_slot_or_ref(slot, rhs)?;
                }
            }
            self.ip = after;
            return Ok(());
        }

        let rhs = self.stack.peek(2).clone();
        let item = iteration_value(&rhs, i as usize)?;
        self.write_slot_or_ref(slot, item)?;
        Ok(())
    }

    /// `for [k, v] = struct`: push the field count pair.
    pub(crate) fn op_for_complex_setup(&mut self) -> VmResult<()> {
        let rhs = self.stack.pop();
        let n = match &rhs {
            Value::Struct(s) => s.len(),
            other => {
                return Err(VmError::Exec(ExecError::msg(format!(
                    "complex for requires a struct, got '{}'",
                    other.type_name()
                ))))
            }
        };
        self.stack.push(rhs);
        self.stack.push(Value::Int(n as i64));
        self.stack.push(Value::Int(-1));
        Ok(())
    }

    pub(crate) fn op_for_complex_cond(&mut self) -> VmResult<()> {
        signal_checkpoint(self.host)?;
        let after = self.fetch_u16() as usize;
        let key_slot = self.fetch_u16() as usize;
        let val_slot = self.fetch_u16() as usize;

        let i = match self.stack.pop() {
            Value::Int(i) => i + 1,
            other => {
                return Err(VmError::Exec(ExecError::msg(format!(
                    "for-loop state corrupted: counter was {other:?}"
                ))))
            }
        };
        let n = match self.stack.top() {
            Value::Int(n) => *n,
            _ => 0,
        };
        self.stack.push(Value::Int(i));

        if i >= n {
            self.ip = after;
            return Ok(());
        }

        let (key, value) = match self.stack.peek(2) {
            Value::Struct(s) => match s.field_at(i as usize) {
                Some((k, v)) => (Value::Str(k.clone()), v.clone()),
                None => (Value::Undef, Value::Undef),
            },
            _ => (Value::Undef, Value::Undef),
        };
        self.write_slot_or_ref(key_slot, key)?;
        self.write_slot_or_ref(val_slot, value)?;
        Ok(())
    }
}

/// Column-wise iteration value for index `i` (0-based).
fn iteration_value(rhs: &Value, i: usize) -> VmResult<Value> {
    Ok(match rhs {
        Value::Range(r) => Value::Num(r.nth(i)),
        Value::Matrix(m) => {
            if m.rows() == 1 {
                Value::Num(m.elem(0, i))
            } else {
                Value::matrix(m.column_at(i))
            }
        }
        Value::Cell(c) => {
            if c.rows() == 1 {
                Value::cell(ottava_core::CellArray::row(vec![c.elem(0, i).clone()]))
            } else {
                Value::cell(c.column_at(i))
            }
        }
        Value::Str(s) => {
            let byte = s.as_bytes()[i];
            Value::Str(String::from_utf8_lossy(&[byte]).into_owned().into())
        }
        scalar => scalar.clone(),
    })
}

/// `switch` label matching: numeric equality or string equality; a cell
/// label matches when any of its elements does.
fn case_matches(subject: &Value, label: &Value) -> VmResult<bool> {
    match label {
        Value::Cell(cases) => {
            for case in cases.data() {
                if case_matches(subject, case)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Str(want) => Ok(matches!(subject, Value::Str(have) if have == want)),
        _ => match (subject, label) {
            (Value::Str(_), _) => Ok(false),
            _ => binop(BinOp::Eq, subject, label)
                .map(|v| v.is_true().unwrap_or(false))
                .map_err(VmError::Exec),
        },
    }
}
