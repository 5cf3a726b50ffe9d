//! Globals, persistents, reference slots and frame hooks.

mod common;

use common::{num, run_in};
use ottava_bytecode::opcode::{GLOBAL_KIND_GLOBAL, GLOBAL_KIND_PERSISTENT};
use ottava_bytecode::{BytecodeBuilder, BytecodeUnit, CompoundOp, Op};
use ottava_core::Value;
use ottava_vm::{Host, Session, VmError};
use std::rc::Rc;

/// function set_g(v): global g; g = v
fn set_global_unit() -> Rc<BytecodeUnit> {
    let mut b = BytecodeBuilder::new("set_g");
    b.add_return("y");
    let v = b.add_arg("v");
    let g = b.add_local("g");
    let skip = b.label();
    b.emit_global_init(GLOBAL_KIND_GLOBAL, g, false, skip);
    b.bind(skip);
    b.emit_push_slot(v);
    b.emit_assign(g);
    b.op(Op::Ret);
    b.finish()
}

/// function y = get_g(): global g; y = g
fn get_global_unit() -> Rc<BytecodeUnit> {
    let mut b = BytecodeBuilder::new("get_g");
    let y = b.add_return("y");
    let g = b.add_local("g");
    let skip = b.label();
    b.emit_global_init(GLOBAL_KIND_GLOBAL, g, false, skip);
    b.bind(skip);
    b.emit_push_slot(g);
    b.emit_assign(y);
    b.op(Op::Ret);
    b.finish()
}

#[test]
fn test_global_shared_across_calls() {
    let mut session = Session::new();
    run_in(&mut session, &set_global_unit(), &[Value::Num(5.0)], 0).unwrap();
    let out = run_in(&mut session, &get_global_unit(), &[], 1).unwrap();
    assert_eq!(num(&out[0]), 5.0);
    assert!(session.global_exists("g"));
}

#[test]
fn test_new_global_seeds_from_local_value() {
    // v = 7; global v — the local becomes the initial global value.
    let mut b = BytecodeBuilder::new("seed");
    let y = b.add_return("y");
    let v = b.add_local("v");
    b.emit_num(7.0);
    b.emit_assign(v);
    let skip = b.label();
    b.emit_global_init(GLOBAL_KIND_GLOBAL, v, false, skip);
    b.bind(skip);
    b.emit_push_slot(v);
    b.emit_assign(y);
    b.op(Op::Ret);

    let mut session = Session::new();
    let out = run_in(&mut session, &b.finish(), &[], 1).unwrap();
    assert_eq!(num(&out[0]), 7.0);
    assert!(matches!(session.global_value("v"), Some(Value::Num(x)) if x == 7.0));
}

#[test]
fn test_global_init_block_runs_once() {
    // global k = 41 — init only when the global is newly created.
    fn unit() -> Rc<BytecodeUnit> {
        let mut b = BytecodeBuilder::new("initonce");
        let y = b.add_return("y");
        let k = b.add_local("k");
        let skip = b.label();
        b.emit_global_init(GLOBAL_KIND_GLOBAL, k, true, skip);
        b.emit_num(41.0);
        b.emit_assign(k);
        b.bind(skip);
        b.emit_push_slot(k);
        b.emit_num(1.0);
        b.op(Op::Add);
        b.emit_assign(k);
        b.emit_push_slot(k);
        b.emit_assign(y);
        b.op(Op::Ret);
        b.finish()
    }

    let mut session = Session::new();
    let unit = unit();
    assert_eq!(num(&run_in(&mut session, &unit, &[], 1).unwrap()[0]), 42.0);
    // Second call: no re-init, the increment keeps going.
    assert_eq!(num(&run_in(&mut session, &unit, &[], 1).unwrap()[0]), 43.0);
}

#[test]
fn test_persistent_counter() {
    fn unit() -> Rc<BytecodeUnit> {
        let mut b = BytecodeBuilder::new("counter");
        let y = b.add_return("y");
        let p = b.add_local("p");
        b.map_persistent(p, 0);
        let skip = b.label();
        b.emit_global_init(GLOBAL_KIND_PERSISTENT, p, true, skip);
        b.emit_num(0.0);
        b.emit_assign(p);
        b.bind(skip);
        b.emit_num(1.0);
        b.emit_assign_compound(p, CompoundOp::AddEq);
        b.emit_push_slot(p);
        b.emit_assign(y);
        b.op(Op::Ret);
        b.finish()
    }

    let mut session = Session::new();
    let unit = unit();
    assert_eq!(num(&run_in(&mut session, &unit, &[], 1).unwrap()[0]), 1.0);
    assert_eq!(num(&run_in(&mut session, &unit, &[], 1).unwrap()[0]), 2.0);
    assert_eq!(num(&run_in(&mut session, &unit, &[], 1).unwrap()[0]), 3.0);
}

#[test]
fn test_reclassifying_a_reference_is_an_error() {
    // persistent p; global p — rejected.
    let mut b = BytecodeBuilder::new("reclass");
    b.add_return("y");
    let p = b.add_local("p");
    b.map_persistent(p, 0);
    let skip1 = b.label();
    b.emit_global_init(GLOBAL_KIND_PERSISTENT, p, false, skip1);
    b.bind(skip1);
    let skip2 = b.label();
    b.emit_global_init(GLOBAL_KIND_GLOBAL, p, false, skip2);
    b.bind(skip2);
    b.op(Op::Ret);

    let mut session = Session::new();
    let err = run_in(&mut session, &b.finish(), &[], 1).unwrap_err();
    match err {
        VmError::Exec(e) => {
            assert!(e.message.contains("persistent"), "{}", e.message);
        }
        other => panic!("{other:?}"),
    }
}

#[test]
fn test_script_frame_hooks_fire() {
    // Hooks are notifications; with the default host they are no-ops,
    // so this just proves the opcodes dispatch cleanly.
    let mut b = BytecodeBuilder::new("scriptish");
    let y = b.add_return("y");
    b.op(Op::EnterScriptFrame);
    b.emit_num(1.0);
    b.emit_assign(y);
    b.op(Op::ExitScriptFrame);
    b.op(Op::EnterNestedFrame);
    b.op(Op::Ret);
    let mut session = Session::new();
    let out = run_in(&mut session, &b.finish(), &[], 1).unwrap();
    assert_eq!(num(&out[0]), 1.0);
}
