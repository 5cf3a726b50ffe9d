//! Shared helpers for the VM integration tests.
//!
//! The compiler lives outside this repository, so these tests hand-
//! assemble units with `BytecodeBuilder` — the tests are the compiler.
#![allow(dead_code)]

use ottava_bytecode::BytecodeUnit;
use ottava_core::Value;
use ottava_vm::{Session, Vm, VmError};
use std::rc::Rc;

/// Run a unit against a fresh session.
pub fn run(
    unit: &Rc<BytecodeUnit>,
    args: &[Value],
    nargout: usize,
) -> (Session, Result<Vec<Value>, VmError>) {
    let mut session = Session::new();
    let result = {
        let mut vm = Vm::new(&mut session);
        vm.execute(unit, args, nargout)
    };
    (session, result)
}

/// Run against an existing session (globals/persistents survive).
pub fn run_in(
    session: &mut Session,
    unit: &Rc<BytecodeUnit>,
    args: &[Value],
    nargout: usize,
) -> Result<Vec<Value>, VmError> {
    let mut vm = Vm::new(session);
    vm.execute(unit, args, nargout)
}

#[track_caller]
pub fn num(v: &Value) -> f64 {
    match v {
        Value::Num(x) => *x,
        Value::Bool(b) => f64::from(*b),
        Value::Matrix(m) if m.is_scalar() => m.at(0),
        other => panic!("expected a numeric scalar, got {other:?}"),
    }
}

#[track_caller]
pub fn text(v: &Value) -> String {
    match v {
        Value::Str(s) => s.to_string(),
        other => panic!("expected a string, got {other:?}"),
    }
}
