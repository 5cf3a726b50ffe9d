//! Bytecode emission for tests and front-ends.
//!
//! `BytecodeBuilder` assembles a [`BytecodeUnit`]: it interns identifiers
//! into slots, dedups constants, resolves labels, and writes the frame
//! header. The compiler proper lives outside this repository; in-tree the
//! builder is what authors units for the integration tests.

use crate::opcode::{CompoundOp, Op};
use crate::unit::{
    ArgNameEntry, BytecodeUnit, Const, FrameHeader, LocEntry, UnwindEntry, UnwindKind,
    ANON_N_RETURNS, FRAME_HEADER_SIZE,
};
use rustc_hash::FxHashMap;
use std::rc::Rc;

/// A jump target; bind with [`BytecodeBuilder::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

/// Constant-dedup key (floats keyed by bit pattern).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Num(u64),
    Bool(bool),
    Str(Rc<str>),
}

#[derive(Debug)]
struct PendingJump {
    patch_at: usize,
    label: Label,
}

#[derive(Debug)]
struct PendingUnwind {
    ip_start: u32,
    ip_end: u32,
    stack_depth: u32,
    kind: UnwindKind,
    target: Label,
}

/// Builder for a single compiled function.
pub struct BytecodeBuilder {
    code: Vec<u8>,
    constants: Vec<Const>,
    constant_map: FxHashMap<ConstKey, u32>,
    ids: Vec<Rc<str>>,

    n_returns: u8,
    n_args: u8,
    vararg_in: bool,
    vararg_out: bool,
    anon: bool,
    n_captures: u8,
    locals_started: bool,

    labels: Vec<Option<u32>>,
    pending_jumps: Vec<PendingJump>,
    pending_unwinds: Vec<PendingUnwind>,

    loc_table: Vec<LocEntry>,
    arg_name_table: Vec<ArgNameEntry>,
    ip_to_tree: Vec<(u32, u64)>,
    persistent_slot_map: Vec<(u16, u16)>,
}

impl BytecodeBuilder {
    pub fn new(name: &str) -> BytecodeBuilder {
        let name: Rc<str> = name.into();
        let mut b = BytecodeBuilder {
            code: vec![0; FRAME_HEADER_SIZE],
            constants: Vec::new(),
            constant_map: FxHashMap::default(),
            ids: vec!["%nargout".into()],
            n_returns: 0,
            n_args: 0,
            vararg_in: false,
            vararg_out: false,
            anon: false,
            n_captures: 0,
            locals_started: false,
            labels: Vec::new(),
            pending_jumps: Vec::new(),
            pending_unwinds: Vec::new(),
            loc_table: Vec::new(),
            arg_name_table: Vec::new(),
            ip_to_tree: Vec::new(),
            persistent_slot_map: Vec::new(),
        };
        // Pool entries 0..=2: name, function-type tag, profiler name.
        b.constants.push(Const::Str(name.clone()));
        b.constants.push(Const::Str("function".into()));
        b.constants.push(Const::Str(name));
        b
    }

    // =========================================================================
    // Frame declaration (call in order: returns, args, locals)
    // =========================================================================

    /// Declare a return variable; its slot is returned.
    pub fn add_return(&mut self, name: &str) -> u16 {
        assert!(self.n_args == 0 && !self.locals_started, "returns first");
        self.n_returns += 1;
        self.intern_id(name)
    }

    /// Declare an argument; the last one is `varargin` when
    /// [`BytecodeBuilder::set_vararg_in`] is used.
    pub fn add_arg(&mut self, name: &str) -> u16 {
        assert!(!self.locals_started, "arguments before locals");
        self.n_args += 1;
        self.intern_id(name)
    }

    /// Declare a pure local.
    pub fn add_local(&mut self, name: &str) -> u16 {
        self.locals_started = true;
        self.intern_id(name)
    }

    pub fn set_vararg_in(&mut self) {
        self.vararg_in = true;
    }

    pub fn set_vararg_out(&mut self) {
        self.vararg_out = true;
    }

    /// Mark the unit anonymous; `n_captures` leading locals are seeded
    /// from the handle's captured values.
    pub fn set_anon(&mut self, n_captures: u8) {
        self.anon = true;
        self.n_captures = n_captures;
        self.set_const(1, Const::Str("anonymous function".into()));
    }

    pub fn set_function_type(&mut self, tag: &str) {
        self.set_const(1, Const::Str(tag.into()));
    }

    fn set_const(&mut self, idx: usize, c: Const) {
        self.constants[idx] = c;
    }

    fn intern_id(&mut self, name: &str) -> u16 {
        let slot = self.ids.len();
        assert!(slot <= u16::MAX as usize, "too many slots");
        self.ids.push(name.into());
        slot as u16
    }

    /// Slot of a previously declared identifier.
    pub fn slot_of(&self, name: &str) -> Option<u16> {
        self.ids.iter().position(|n| &**n == name).map(|i| i as u16)
    }

    /// Map a slot to a persistent-scope offset.
    pub fn map_persistent(&mut self, slot: u16, offset: u16) {
        self.persistent_slot_map.push((slot, offset));
    }

    // =========================================================================
    // Constants
    // =========================================================================

    pub fn const_num(&mut self, v: f64) -> u32 {
        self.intern_const(ConstKey::Num(v.to_bits()), Const::Num(v))
    }

    pub fn const_str(&mut self, s: &str) -> u32 {
        let s: Rc<str> = s.into();
        self.intern_const(ConstKey::Str(s.clone()), Const::Str(s))
    }

    pub fn const_bool(&mut self, v: bool) -> u32 {
        self.intern_const(ConstKey::Bool(v), Const::Bool(v))
    }

    /// The magic colon; not dedupped (it is one byte and rare).
    pub fn const_colon(&mut self) -> u32 {
        let idx = self.constants.len() as u32;
        self.constants.push(Const::Colon);
        idx
    }

    /// Push the magic colon as an index argument.
    pub fn emit_colon(&mut self) -> &mut Self {
        let idx = self.const_colon();
        self.emit_load_cst(idx)
    }

    /// Nested units (anonymous bodies) are never dedupped.
    pub fn const_unit(&mut self, unit: Rc<BytecodeUnit>) -> u32 {
        let idx = self.constants.len() as u32;
        self.constants.push(Const::Unit(unit));
        idx
    }

    fn intern_const(&mut self, key: ConstKey, value: Const) -> u32 {
        if let Some(idx) = self.constant_map.get(&key) {
            return *idx;
        }
        let idx = self.constants.len() as u32;
        self.constants.push(value);
        self.constant_map.insert(key, idx);
        idx
    }

    // =========================================================================
    // Raw emission
    // =========================================================================

    #[inline]
    pub fn ip(&self) -> u32 {
        self.code.len() as u32
    }

    pub fn op(&mut self, op: Op) -> &mut Self {
        self.code.push(op as u8);
        self
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.code.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.code.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.code.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Emit an opcode whose first operand is a slot, widening with a
    /// `Wide` prefix when the slot does not fit a byte.
    fn slot_op(&mut self, op: Op, slot: u16) -> &mut Self {
        if slot > u8::MAX as u16 {
            self.op(Op::Wide).op(op).u16(slot)
        } else {
            self.op(op).u8(slot as u8)
        }
    }

    // =========================================================================
    // Labels
    // =========================================================================

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    pub fn bind(&mut self, label: Label) {
        assert!(self.labels[label.0 as usize].is_none(), "label bound twice");
        self.labels[label.0 as usize] = Some(self.ip());
    }

    fn target(&mut self, label: Label) -> &mut Self {
        self.pending_jumps.push(PendingJump {
            patch_at: self.code.len(),
            label,
        });
        self.u16(0)
    }

    // =========================================================================
    // Convenience emitters (the subset with non-obvious encodings)
    // =========================================================================

    pub fn emit_load_cst(&mut self, idx: u32) -> &mut Self {
        if idx <= u8::MAX as u32 {
            self.op(Op::LoadCst).u8(idx as u8)
        } else {
            self.op(Op::LoadFarCst).u32(idx)
        }
    }

    pub fn emit_num(&mut self, v: f64) -> &mut Self {
        if v.is_sign_positive() {
            if v == 0.0 {
                return self.op(Op::PushDbl0);
            } else if v == 1.0 {
                return self.op(Op::PushDbl1);
            } else if v == 2.0 {
                return self.op(Op::PushDbl2);
            }
        }
        let idx = self.const_num(v);
        self.emit_load_cst(idx)
    }

    pub fn emit_str(&mut self, s: &str) -> &mut Self {
        let idx = self.const_str(s);
        self.emit_load_cst(idx)
    }

    pub fn emit_push_slot(&mut self, slot: u16) -> &mut Self {
        self.slot_op(Op::PushSlotNargout1, slot)
    }

    pub fn emit_push_slot_nargout(&mut self, slot: u16, nargout: u8) -> &mut Self {
        self.slot_op(Op::PushSlotNargoutN, slot).u8(nargout)
    }

    pub fn emit_assign(&mut self, slot: u16) -> &mut Self {
        self.slot_op(Op::Assign, slot)
    }

    pub fn emit_force_assign(&mut self, slot: u16) -> &mut Self {
        self.slot_op(Op::ForceAssign, slot)
    }

    /// `[s1, s2, …] = …` multi-assignment.
    pub fn emit_assign_n(&mut self, slots: &[u16]) -> &mut Self {
        self.op(Op::AssignN).u8(slots.len() as u8);
        for s in slots {
            self.u16(*s);
        }
        self
    }

    pub fn emit_bind_ans(&mut self, slot: u16) -> &mut Self {
        self.slot_op(Op::BindAns, slot)
    }

    pub fn emit_assign_compound(&mut self, slot: u16, op: CompoundOp) -> &mut Self {
        self.slot_op(Op::AssignCompound, slot).u8(op as u8)
    }

    pub fn emit_jmp(&mut self, label: Label) -> &mut Self {
        self.op(Op::Jmp).target(label)
    }

    pub fn emit_jmp_if(&mut self, label: Label) -> &mut Self {
        self.op(Op::JmpIf).target(label)
    }

    pub fn emit_jmp_ifn(&mut self, label: Label) -> &mut Self {
        self.op(Op::JmpIfn).target(label)
    }

    /// Jump when `slot` holds a defined value (default-argument skips).
    pub fn emit_jmp_ifdef(&mut self, slot: u16, label: Label) -> &mut Self {
        self.op(Op::JmpIfDef).u16(slot).target(label)
    }

    pub fn emit_jmp_ifncasematch(&mut self, label: Label) -> &mut Self {
        self.op(Op::JmpIfnCaseMatch).target(label)
    }

    pub fn emit_index_id(&mut self, slot: u16, nargs: u8, nargout: u8) -> &mut Self {
        match nargout {
            0 => self.slot_op(Op::IndexIdNargout0, slot).u8(nargs),
            1 => self.slot_op(Op::IndexIdNargout1, slot).u8(nargs),
            n => self.slot_op(Op::IndexIdN, slot).u8(nargs).u8(n),
        }
    }

    pub fn emit_index_cell_id(&mut self, slot: u16, nargs: u8, nargout: u8) -> &mut Self {
        match nargout {
            0 => self.slot_op(Op::IndexCellIdNargout0, slot).u8(nargs),
            1 => self.slot_op(Op::IndexCellIdNargout1, slot).u8(nargs),
            n => self.slot_op(Op::IndexCellIdN, slot).u8(nargs).u8(n),
        }
    }

    pub fn emit_index_struct(&mut self, nargout: u8, field_id: u16) -> &mut Self {
        self.op(Op::IndexStructNargoutN).u8(nargout).u16(field_id)
    }

    pub fn emit_index_struct_call(&mut self, nargs: u8, kind: u8) -> &mut Self {
        self.op(Op::IndexStructCall).u8(nargs).u8(kind)
    }

    pub fn emit_index_struct_subcall(
        &mut self,
        i: u8,
        n: u8,
        nargs: u8,
        kind: u8,
    ) -> &mut Self {
        self.op(Op::IndexStructSubcall).u8(i).u8(n).u8(nargs).u8(kind)
    }

    pub fn emit_index_obj(&mut self, nargout: u8, nargs: u8, kind: u8) -> &mut Self {
        self.op(Op::IndexObj).u8(nargout).u8(nargs).u8(kind)
    }

    pub fn emit_word_cmd(&mut self, slot: u16, nargout: u8, nargs: u8) -> &mut Self {
        self.slot_op(Op::WordCmd, slot).u8(nargout).u8(nargs)
    }

    pub fn emit_subassign_id(&mut self, slot: u16, nargs: u8) -> &mut Self {
        self.slot_op(Op::SubassignId, slot).u8(nargs)
    }

    pub fn emit_subassign_cell_id(&mut self, slot: u16, nargs: u8) -> &mut Self {
        self.slot_op(Op::SubassignCellId, slot).u8(nargs)
    }

    pub fn emit_subassign_struct(&mut self, slot: u16, field_id: u16) -> &mut Self {
        self.slot_op(Op::SubassignStruct, slot).u16(field_id)
    }

    pub fn emit_subassign_obj(&mut self, nargs: u8, kind: u8) -> &mut Self {
        self.op(Op::SubassignObj).u8(nargs).u8(kind)
    }

    /// `SubassignChained slot, op, n_links, (nargs, kind)*`.
    pub fn emit_subassign_chained(
        &mut self,
        slot: u16,
        op: u8,
        links: &[(u8, u8)],
    ) -> &mut Self {
        self.slot_op(Op::SubassignChained, slot)
            .u8(op)
            .u8(links.len() as u8);
        for (nargs, kind) in links {
            self.u8(*nargs).u8(*kind);
        }
        self
    }

    pub fn emit_for_cond(&mut self, slot: u16, after: Label) -> &mut Self {
        self.slot_op(Op::ForCond, slot).target(after)
    }

    pub fn emit_for_complex_cond(&mut self, after: Label, key: u16, val: u16) -> &mut Self {
        self.op(Op::ForComplexCond).target(after).u16(key).u16(val)
    }

    pub fn emit_matrix(&mut self, rows: u8, cols: u8) -> &mut Self {
        self.op(Op::Matrix).u8(rows).u8(cols)
    }

    /// Jagged (`kind = 0`, per-row lengths) or big rectangular
    /// (`kind = 1`) matrix literal.
    pub fn emit_matrix_uneven(&mut self, row_lens: &[u32]) -> &mut Self {
        self.op(Op::MatrixUneven).u8(0).u32(row_lens.len() as u32);
        for len in row_lens {
            self.u32(*len);
        }
        self
    }

    pub fn emit_matrix_big(&mut self, rows: u32, cols: u32) -> &mut Self {
        self.op(Op::MatrixUneven).u8(1).u32(rows).u32(cols)
    }

    pub fn emit_push_cell(&mut self, rows: u32, cols: u32) -> &mut Self {
        if rows <= u8::MAX as u32 && cols <= u8::MAX as u32 {
            self.op(Op::PushCell).u8(rows as u8).u8(cols as u8)
        } else {
            self.op(Op::PushCellBig).u32(rows).u32(cols)
        }
    }

    pub fn emit_append_cell(&mut self, tag: u8) -> &mut Self {
        self.op(Op::AppendCell).u8(tag)
    }

    pub fn emit_global_init(
        &mut self,
        kind: u8,
        slot: u16,
        has_init: bool,
        skip: Label,
    ) -> &mut Self {
        self.op(Op::GlobalInit)
            .u8(kind)
            .u16(slot)
            .u8(has_init as u8);
        self.target(skip)
    }

    pub fn emit_install_function(&mut self, slot: u16, cst: u16) -> &mut Self {
        self.slot_op(Op::InstallFunction, slot).u16(cst)
    }

    pub fn emit_set_ignore_outputs(&mut self, ignored: &[u8], n_total: u8) -> &mut Self {
        self.op(Op::SetIgnoreOutputs)
            .u8(ignored.len() as u8)
            .u8(n_total);
        for idx in ignored {
            self.u8(*idx);
        }
        self
    }

    pub fn emit_clear_ignore_outputs(&mut self, sink_slots: &[u16]) -> &mut Self {
        self.op(Op::ClearIgnoreOutputs).u8(sink_slots.len() as u8);
        for s in sink_slots {
            self.u16(*s);
        }
        self
    }

    pub fn emit_disp(&mut self, slot: u16, cmd_slot: u16) -> &mut Self {
        self.slot_op(Op::Disp, slot).u16(cmd_slot)
    }

    pub fn emit_braindead_warning(&mut self, slot: u16, kind: u8) -> &mut Self {
        self.slot_op(Op::BraindeadWarning, slot).u8(kind)
    }

    pub fn emit_push_fcn_handle(&mut self, slot: u16) -> &mut Self {
        self.slot_op(Op::PushFcnHandle, slot)
    }

    pub fn emit_push_anon_fcn_handle(&mut self, cst: u16) -> &mut Self {
        self.op(Op::PushAnonFcnHandle).u16(cst)
    }

    pub fn emit_push_folded_cst(&mut self, slot: u16, past_init: Label) -> &mut Self {
        self.slot_op(Op::PushFoldedCst, slot).target(past_init)
    }

    pub fn emit_set_folded_cst(&mut self, slot: u16) -> &mut Self {
        self.slot_op(Op::SetFoldedCst, slot)
    }

    pub fn emit_named_const(&mut self, op: Op, slot: u16) -> &mut Self {
        debug_assert!(matches!(op, Op::PushPi | Op::PushI | Op::PushE));
        self.slot_op(op, slot)
    }

    pub fn emit_end_id(&mut self, slot: u16, nargs: u8, idx: u8) -> &mut Self {
        self.slot_op(Op::EndId, slot).u8(nargs).u8(idx)
    }

    pub fn emit_end_obj(&mut self, stack_off: u8, nargs: u8, idx: u8) -> &mut Self {
        self.op(Op::EndObj).u8(stack_off).u8(nargs).u8(idx)
    }

    /// `EndXN n, (nargs, idx, kind, slot)*`.
    pub fn emit_end_x_n(&mut self, entries: &[(u8, u8, u8, u16)]) -> &mut Self {
        self.op(Op::EndXN).u8(entries.len() as u8);
        for (nargs, idx, kind, slot) in entries {
            self.u8(*nargs).u8(*idx).u8(*kind).u16(*slot);
        }
        self
    }

    pub fn emit_eval(&mut self, nargout: u8, tree: u32) -> &mut Self {
        self.op(Op::Eval).u8(nargout).u32(tree)
    }

    pub fn emit_incr_decr(&mut self, op: Op, slot: u16) -> &mut Self {
        self.slot_op(op, slot)
    }

    pub fn emit_dup_n(&mut self, offset: u8, n: u8) -> &mut Self {
        self.op(Op::DupN).u8(offset).u8(n)
    }

    pub fn emit_pop_n_ints(&mut self, n: u8) -> &mut Self {
        self.op(Op::PopNInts).u8(n)
    }

    pub fn emit_set_slot_to_stack_depth(&mut self, slot: u16) -> &mut Self {
        self.slot_op(Op::SetSlotToStackDepth, slot)
    }

    // =========================================================================
    // Metadata tables
    // =========================================================================

    pub fn add_loc(&mut self, ip_start: u32, ip_end: u32, line: u32, column: u32) {
        self.loc_table.push(LocEntry {
            ip_start,
            ip_end,
            line,
            column,
        });
    }

    /// Register an unwind range; `stack_depth` is relative to the locals.
    pub fn add_unwind(
        &mut self,
        kind: UnwindKind,
        ip_start: u32,
        ip_end: u32,
        stack_depth: u32,
        target: Label,
    ) {
        self.pending_unwinds.push(PendingUnwind {
            ip_start,
            ip_end,
            stack_depth,
            kind,
            target,
        });
    }

    pub fn add_arg_name(&mut self, ip_start: u32, ip_end: u32, name: &str) {
        self.arg_name_table.push(ArgNameEntry {
            ip_start,
            ip_end,
            object_name: name.into(),
        });
    }

    pub fn add_tree_handle(&mut self, ip: u32, tree: u64) {
        self.ip_to_tree.push((ip, tree));
    }

    // =========================================================================
    // Finish
    // =========================================================================

    pub fn finish(mut self) -> Rc<BytecodeUnit> {
        // Resolve jumps.
        for jump in &self.pending_jumps {
            let ip = self.labels[jump.label.0 as usize].expect("unbound label");
            let target = (ip as u16).to_le_bytes();
            self.code[jump.patch_at] = target[0];
            self.code[jump.patch_at + 1] = target[1];
        }
        let unwind_table: Vec<UnwindEntry> = self
            .pending_unwinds
            .iter()
            .map(|p| UnwindEntry {
                ip_start: p.ip_start,
                ip_end: p.ip_end,
                stack_depth: p.stack_depth,
                kind: p.kind,
                target_ip: self.labels[p.target.0 as usize].expect("unbound unwind target"),
            })
            .collect();

        // Frame header.
        let n_returns: i8 = if self.anon {
            ANON_N_RETURNS
        } else if self.vararg_out {
            -(self.n_returns as i8)
        } else {
            self.n_returns as i8
        };
        let n_args: i8 = if self.vararg_in {
            -(self.n_args as i8)
        } else {
            self.n_args as i8
        };
        let n_locals = self.ids.len() as u16;
        self.code[0] = n_returns as u8;
        self.code[1] = n_args as u8;
        let loc = n_locals.to_le_bytes();
        self.code[2] = loc[0];
        self.code[3] = loc[1];

        Rc::new(BytecodeUnit::from_parts(
            self.code,
            self.constants,
            self.ids,
            self.loc_table,
            unwind_table,
            self.arg_name_table,
            self.ip_to_tree,
            self.persistent_slot_map,
            self.n_captures,
        ))
    }
}

impl BytecodeBuilder {
    /// Frame header the unit will carry, for assertions mid-build.
    pub fn header_preview(&self) -> FrameHeader {
        FrameHeader {
            n_returns: self.n_returns as i8,
            n_args: self.n_args as i8,
            n_locals: self.ids.len() as u16,
        }
    }
}
