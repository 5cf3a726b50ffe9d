//! Indexing protocol coverage beyond the basic scenarios: chains with
//! calls between links, `end` resolution, stepwise objects, and the
//! indexed-assignment family.

mod common;

use common::{num, run, run_in};
use ottava_bytecode::opcode::{INDEX_BRACE, INDEX_DOT, INDEX_PAREN};
use ottava_bytecode::{BytecodeBuilder, CompoundOp, Op};
use ottava_core::{ExecError, Function, ObjectCapability, Struct, Value};
use ottava_vm::{Host, Session};
use std::cell::RefCell;
use std::rc::Rc;

// =============================================================================
// Chains with a compiled call between links
// =============================================================================

#[test]
fn test_chain_calls_compiled_function_mid_chain() {
    // s.f = @maker-result; querying s.f(3).v where s.f(3) runs compiled
    // code returning a struct.
    // maker(x): y = struct with field v = x * 2 (built via subassign).
    let mut maker = BytecodeBuilder::new("maker");
    let y = maker.add_return("y");
    let x = maker.add_arg("x");
    maker.emit_str("v");
    maker.emit_push_slot(x);
    maker.emit_num(2.0);
    maker.op(Op::Mul);
    maker.emit_subassign_chained(y, 0, &[(1, INDEX_DOT)]);
    maker.op(Op::Ret);
    let maker_unit = maker.finish();

    let mut session = Session::new();
    session.define_function("maker", Function::compiled(maker_unit));

    // y = maker(3).v  — leader calls, follower indexes the result.
    let mut b = BytecodeBuilder::new("chain_call");
    let yy = b.add_return("y");
    let maker_slot = b.add_local("maker");
    b.emit_push_fcn_handle(maker_slot);
    b.emit_num(3.0);
    b.emit_index_struct_call(1, INDEX_PAREN); // calls the handle with (3)
    b.emit_str("v");
    b.emit_index_struct_subcall(1, 1, 1, INDEX_DOT); // .v on the result
    b.emit_assign(yy);
    b.op(Op::Ret);
    let out = run_in(&mut session, &b.finish(), &[], 1);
    let out = out.unwrap();
    assert_eq!(num(&out[0]), 6.0);
}

#[test]
fn test_mixed_chain_paren_then_brace() {
    // c = {[10 20], 0}; y = c{1}(2)
    let mut b = BytecodeBuilder::new("mixed");
    let y = b.add_return("y");
    let c = b.add_local("c");
    b.emit_push_cell(1, 2);
    b.emit_num(10.0);
    b.emit_num(20.0);
    b.emit_matrix(1, 2);
    b.emit_append_cell(ottava_bytecode::opcode::CELL_APPEND_MID);
    b.emit_num(0.0);
    b.emit_append_cell(ottava_bytecode::opcode::CELL_APPEND_FINAL);
    b.emit_assign(c);

    b.emit_push_slot(c);
    b.emit_num(1.0);
    b.emit_index_struct_call(1, INDEX_BRACE);
    b.emit_num(2.0);
    b.emit_index_struct_subcall(1, 1, 1, INDEX_PAREN);
    b.emit_assign(y);
    b.op(Op::Ret);
    let (_, out) = run(&b.finish(), &[], 1);
    assert_eq!(num(&out.unwrap()[0]), 20.0);
}

// =============================================================================
// `end` resolution
// =============================================================================

#[test]
fn test_end_in_linear_and_2d_indexing() {
    // M = [1 2 3; 4 5 6]; y = M(end); z = M(1, end)
    let mut b = BytecodeBuilder::new("ends");
    let y = b.add_return("y");
    let z = b.add_return("z");
    let m = b.add_local("M");
    for v in [1.0, 2.0, 3.0, 4.0, 5.0, 6.0] {
        b.emit_num(v);
    }
    b.emit_matrix(2, 3);
    b.emit_assign(m);

    b.emit_end_id(m, 1, 0);
    b.emit_index_id(m, 1, 1);
    b.emit_assign(y);

    b.emit_num(1.0);
    b.emit_end_id(m, 2, 1);
    b.emit_index_id(m, 2, 1);
    b.emit_assign(z);
    b.op(Op::Ret);
    let (_, out) = run(&b.finish(), &[], 2);
    let out = out.unwrap();
    assert_eq!(num(&out[0]), 6.0); // column-major last element
    assert_eq!(num(&out[1]), 3.0);
}

#[test]
fn test_end_x_n_skips_callable_names() {
    // `numel` resolves to a function, so `end` must bind to the outer
    // matrix in the second entry.
    let mut b = BytecodeBuilder::new("endxn");
    let y = b.add_return("y");
    let m = b.add_local("M");
    let numel_slot = b.add_local("numel");
    b.emit_num(7.0);
    b.emit_num(8.0);
    b.emit_matrix(1, 2);
    b.emit_assign(m);

    b.emit_end_x_n(&[(1, 0, 0, numel_slot), (1, 0, 0, m)]);
    b.emit_index_id(m, 1, 1);
    b.emit_assign(y);
    b.op(Op::Ret);
    let (_, out) = run(&b.finish(), &[], 1);
    assert_eq!(num(&out.unwrap()[0]), 8.0);
}

// =============================================================================
// Objects: stepwise subsref and custom `end`
// =============================================================================

/// Recording object: paren/dot reads are served from a table; `end`
/// reports a fixed extent; every subsref step is logged.
#[derive(Debug)]
struct Probe {
    fields: RefCell<Struct>,
    log: Rc<RefCell<Vec<u8>>>,
    stepwise: bool,
}

impl ObjectCapability for Probe {
    fn class_name(&self) -> &str {
        "probe"
    }

    fn needs_stepwise_subsref(&self) -> bool {
        self.stepwise
    }

    fn simple_subsref(
        &self,
        kind: u8,
        args: &[Value],
        _nargout: usize,
    ) -> Result<Vec<Value>, ExecError> {
        self.log.borrow_mut().push(kind);
        match kind {
            INDEX_DOT => match args.first() {
                Some(Value::Str(name)) => self
                    .fields
                    .borrow()
                    .get(name)
                    .cloned()
                    .map(|v| vec![v])
                    .ok_or_else(|| ExecError::msg("no such field")),
                _ => Err(ExecError::msg("bad field arg")),
            },
            INDEX_PAREN => Ok(vec![Value::Num(match args.first() {
                Some(Value::Num(i)) => *i * 100.0,
                _ => -1.0,
            })]),
            _ => Err(ExecError::msg("unsupported kind")),
        }
    }

    fn subsasgn(
        &self,
        _kinds: &[u8],
        _idxs: &[Vec<Value>],
        _rhs: Value,
    ) -> Result<Value, ExecError> {
        Err(ExecError::msg("probe is read-only"))
    }

    fn end_index(&self, _dim: usize, _n_dims: usize) -> Option<Result<f64, ExecError>> {
        Some(Ok(41.0))
    }
}

#[test]
fn test_stepwise_object_chain() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut fields = Struct::new();
    fields.set("inner", {
        let mut s = Struct::new();
        s.set("w", Value::Num(5.0));
        Value::strct(s)
    });
    let probe = Rc::new(Probe {
        fields: RefCell::new(fields),
        log: log.clone(),
        stepwise: true,
    });

    let mut session = Session::new();
    session.global_assign("obj", Value::Object(probe));

    // y = obj.inner.w — stepwise: the object serves link one, a plain
    // struct serves link two.
    let mut b = BytecodeBuilder::new("objchain");
    let y = b.add_return("y");
    let obj = b.add_local("obj");
    let skip = b.label();
    b.emit_global_init(ottava_bytecode::opcode::GLOBAL_KIND_GLOBAL, obj, false, skip);
    b.bind(skip);
    b.emit_push_slot(obj);
    b.emit_str("inner");
    b.emit_index_struct_call(1, INDEX_DOT);
    b.emit_str("w");
    b.emit_index_struct_subcall(1, 1, 1, INDEX_DOT);
    b.emit_assign(y);
    b.op(Op::Ret);
    let out = run_in(&mut session, &b.finish(), &[], 1).unwrap();
    assert_eq!(num(&out[0]), 5.0);
    // Exactly one step went through the object.
    assert_eq!(log.borrow().as_slice(), &[INDEX_DOT]);
}

#[test]
fn test_object_end_method_wins() {
    let probe = Rc::new(Probe {
        fields: RefCell::new(Struct::new()),
        log: Rc::new(RefCell::new(Vec::new())),
        stepwise: false,
    });
    let mut session = Session::new();
    session.global_assign("obj", Value::Object(probe));

    // y = obj(end) — end defers to the object: 41, then obj(41) = 4100.
    let mut b = BytecodeBuilder::new("objend");
    let y = b.add_return("y");
    let obj = b.add_local("obj");
    let skip = b.label();
    b.emit_global_init(ottava_bytecode::opcode::GLOBAL_KIND_GLOBAL, obj, false, skip);
    b.bind(skip);
    b.emit_push_slot(obj);
    b.emit_end_obj(0, 1, 0);
    b.emit_index_obj(1, 1, INDEX_PAREN);
    b.emit_assign(y);
    b.op(Op::Ret);
    let out = run_in(&mut session, &b.finish(), &[], 1).unwrap();
    assert_eq!(num(&out[0]), 4100.0);
}

// =============================================================================
// Indexed assignment family
// =============================================================================

#[test]
fn test_subassign_grows_and_specializes() {
    // a = [1 2]; a(4) = 9; a(2) = 5 — second store runs specialized.
    let mut b = BytecodeBuilder::new("grower");
    let y = b.add_return("y");
    let a = b.add_local("a");
    b.emit_num(1.0);
    b.emit_num(2.0);
    b.emit_matrix(1, 2);
    b.emit_assign(a);

    b.emit_num(4.0);
    b.emit_num(9.0);
    b.emit_subassign_id(a, 1);
    b.emit_num(2.0);
    b.emit_num(5.0);
    b.emit_subassign_id(a, 1);

    b.emit_push_slot(a);
    b.emit_assign(y);
    b.op(Op::Ret);
    let unit = b.finish();
    let (_, out) = run(&unit, &[], 1);
    match &out.unwrap()[0] {
        Value::Matrix(m) => {
            assert_eq!((m.rows(), m.cols()), (1, 4));
            assert_eq!(m.data(), &[1.0, 5.0, 0.0, 9.0]);
        }
        other => panic!("{other:?}"),
    }
    assert!(ottava_bytecode::disassemble(&unit).contains("SubassignIdMat1d"));
}

#[test]
fn test_subassign_cell_and_struct() {
    // c{2} = 'x'; s.f = 3 — auto-vivified from nothing.
    let mut b = BytecodeBuilder::new("viv");
    let y = b.add_return("y");
    let z = b.add_return("z");
    let c = b.add_local("c");
    let s = b.add_local("s");
    let f_id = b.add_local("f");

    b.emit_num(2.0);
    b.emit_str("x");
    b.emit_subassign_cell_id(c, 1);

    b.emit_num(3.0);
    b.emit_subassign_struct(s, f_id);

    b.emit_push_slot(c);
    b.emit_assign(y);
    b.emit_push_slot(s);
    b.emit_assign(z);
    b.op(Op::Ret);
    let (_, out) = run(&b.finish(), &[], 2);
    let out = out.unwrap();
    match &out[0] {
        Value::Cell(cell) => {
            assert_eq!((cell.rows(), cell.cols()), (1, 2));
            assert!(matches!(cell.at(1), Value::Str(s) if &**s == "x"));
        }
        other => panic!("{other:?}"),
    }
    match &out[1] {
        Value::Struct(st) => assert!(matches!(st.get("f"), Some(Value::Num(v)) if *v == 3.0)),
        other => panic!("{other:?}"),
    }
}

#[test]
fn test_subassign_obj_pushes_rewritten_value() {
    // tmp = ([1 2 3])(2) = 9 — assignment into an expression result.
    let mut b = BytecodeBuilder::new("exprassign");
    let y = b.add_return("y");
    for v in [1.0, 2.0, 3.0] {
        b.emit_num(v);
    }
    b.emit_matrix(1, 3);
    b.emit_num(2.0);
    b.emit_num(9.0);
    b.emit_subassign_obj(1, INDEX_PAREN);
    b.emit_assign(y);
    b.op(Op::Ret);
    let (_, out) = run(&b.finish(), &[], 1);
    match &out.unwrap()[0] {
        Value::Matrix(m) => assert_eq!(m.data(), &[1.0, 9.0, 3.0]),
        other => panic!("{other:?}"),
    }
}

#[test]
fn test_chained_compound_assign() {
    // s.n = 5; s.n += 2 via the chained compound form.
    let mut b = BytecodeBuilder::new("chained_compound");
    let y = b.add_return("y");
    let s = b.add_local("s");
    let n_id = b.add_local("n");
    b.emit_str("n");
    b.emit_num(5.0);
    b.emit_subassign_chained(s, 0, &[(1, INDEX_DOT)]);
    b.emit_str("n");
    b.emit_num(2.0);
    b.emit_subassign_chained(s, 1 + CompoundOp::AddEq as u8, &[(1, INDEX_DOT)]);
    b.emit_push_slot(s);
    b.emit_index_struct(1, n_id);
    b.emit_assign(y);
    b.op(Op::Ret);
    let (_, out) = run(&b.finish(), &[], 1);
    assert_eq!(num(&out.unwrap()[0]), 7.0);
}

#[test]
fn test_colon_assignment_fills_all() {
    // a = [1 2 3]; a(:) = 0.
    let mut b = BytecodeBuilder::new("colonfill");
    let y = b.add_return("y");
    let a = b.add_local("a");
    for v in [1.0, 2.0, 3.0] {
        b.emit_num(v);
    }
    b.emit_matrix(1, 3);
    b.emit_assign(a);
    b.emit_colon();
    b.emit_num(0.0);
    b.emit_subassign_id(a, 1);
    b.emit_push_slot(a);
    b.emit_assign(y);
    b.op(Op::Ret);
    let (_, out) = run(&b.finish(), &[], 1);
    match &out.unwrap()[0] {
        Value::Matrix(m) => assert_eq!(m.data(), &[0.0, 0.0, 0.0]),
        other => panic!("{other:?}"),
    }
}

#[test]
fn test_range_indexed_read() {
    // M = [1 2 3 4]; y = M(2:3)
    let mut b = BytecodeBuilder::new("rangeread");
    let y = b.add_return("y");
    let m = b.add_local("M");
    for v in [1.0, 2.0, 3.0, 4.0] {
        b.emit_num(v);
    }
    b.emit_matrix(1, 4);
    b.emit_assign(m);
    b.emit_num(2.0);
    b.emit_num(3.0);
    b.op(Op::Colon2);
    b.emit_index_id(m, 1, 1);
    b.emit_assign(y);
    b.op(Op::Ret);
    let (_, out) = run(&b.finish(), &[], 1);
    match &out.unwrap()[0] {
        Value::Matrix(m) => assert_eq!(m.data(), &[2.0, 3.0]),
        other => panic!("{other:?}"),
    }
}

#[test]
fn test_cell_paren_read_keeps_cell() {
    // c = {1, 2}; y = c(2) — a 1×1 cell, not the content.
    let mut b = BytecodeBuilder::new("cellparen");
    let y = b.add_return("y");
    let c = b.add_local("c");
    b.emit_push_cell(1, 2);
    b.emit_num(1.0);
    b.emit_append_cell(ottava_bytecode::opcode::CELL_APPEND_MID);
    b.emit_num(2.0);
    b.emit_append_cell(ottava_bytecode::opcode::CELL_APPEND_FINAL);
    b.emit_assign(c);
    b.emit_num(2.0);
    b.emit_index_id(c, 1, 1);
    b.emit_assign(y);
    b.op(Op::Ret);
    let (_, out) = run(&b.finish(), &[], 1);
    match &out.unwrap()[0] {
        Value::Cell(cell) => {
            assert_eq!(cell.numel(), 1);
            assert!(matches!(cell.at(0), Value::Num(v) if *v == 2.0));
        }
        other => panic!("{other:?}"),
    }
}

#[test]
fn test_string_indexing_keeps_char() {
    let mut b = BytecodeBuilder::new("strindex");
    let y = b.add_return("y");
    let s = b.add_arg("s");
    b.emit_num(2.0);
    b.emit_index_id(s, 1, 1);
    b.emit_assign(y);
    b.op(Op::Ret);
    let (_, out) = run(&b.finish(), &[Value::str("abc")], 1);
    assert_eq!(common::text(&out.unwrap()[0]), "b");
}

#[test]
fn test_matrix_from_cells_and_ranges() {
    // y = [1:3, 10] — a range splices into a literal row.
    let mut b = BytecodeBuilder::new("rangelit");
    let y = b.add_return("y");
    b.emit_num(1.0);
    b.emit_num(3.0);
    b.op(Op::Colon2);
    b.emit_num(10.0);
    b.emit_matrix(1, 2);
    b.emit_assign(y);
    b.op(Op::Ret);
    let (_, out) = run(&b.finish(), &[], 1);
    match &out.unwrap()[0] {
        Value::Matrix(m) => assert_eq!(m.data(), &[1.0, 2.0, 3.0, 10.0]),
        other => panic!("{other:?}"),
    }
}

#[test]
fn test_cell_array_used_before_defined_errors() {
    let mut b = BytecodeBuilder::new("undef_cell");
    b.add_return("y");
    let ghost = b.add_local("nothing");
    b.emit_num(1.0);
    b.emit_index_cell_id(ghost, 1, 1);
    b.emit_assign(1);
    b.op(Op::Ret);
    let (_, out) = run(&b.finish(), &[], 1);
    assert!(out.is_err());
}

#[test]
fn test_empty_cell_helper_builtin() {
    // y = cell(2, 2) — a host builtin allocating a cell; checks the
    // native-call marshaling of non-numeric results.
    let mut b = BytecodeBuilder::new("alloc");
    let y = b.add_return("y");
    let cell_slot = b.add_local("cell");
    b.emit_num(2.0);
    b.emit_num(2.0);
    b.emit_index_id(cell_slot, 2, 1);
    b.emit_assign(y);
    b.op(Op::Ret);
    let (_, out) = run(&b.finish(), &[], 1);
    match &out.unwrap()[0] {
        Value::Cell(c) => {
            assert_eq!((c.rows(), c.cols()), (2, 2));
            assert!(matches!(c.at(0), Value::Matrix(m) if m.is_empty()));
        }
        other => panic!("{other:?}"),
    }
}

#[test]
fn test_matrix_uneven_literal() {
    let mut b = BytecodeBuilder::new("uneven");
    let y = b.add_return("y");
    // [1 2 3; 4 5 6] emitted through the jagged encoding with equal
    // row lengths.
    for v in [1.0, 2.0, 3.0, 4.0, 5.0, 6.0] {
        b.emit_num(v);
    }
    b.emit_matrix_uneven(&[3, 3]);
    b.emit_assign(y);
    b.op(Op::Ret);
    let (_, out) = run(&b.finish(), &[], 1);
    match &out.unwrap()[0] {
        Value::Matrix(m) => {
            assert_eq!((m.rows(), m.cols()), (2, 3));
            assert_eq!(m.elem(1, 0), 4.0);
        }
        other => panic!("{other:?}"),
    }
}

#[test]
fn test_ragged_matrix_literal_is_an_error() {
    let mut b = BytecodeBuilder::new("ragged");
    b.add_return("y");
    for v in [1.0, 2.0, 3.0] {
        b.emit_num(v);
    }
    b.emit_matrix_uneven(&[2, 1]);
    b.emit_assign(1);
    b.op(Op::Ret);
    let (_, out) = run(&b.finish(), &[], 1);
    match out.unwrap_err() {
        ottava_vm::VmError::Exec(e) => {
            assert!(e.message.contains("dimensions mismatch"), "{}", e.message)
        }
        other => panic!("{other:?}"),
    }
}
