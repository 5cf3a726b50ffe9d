//! The dispatch core.
//!
//! One `Vm` owns the operand stack, the saved caller contexts, and the
//! execution registers (current unit, ip, base pointer). `execute` builds
//! the root frame and spins [`Vm::step`] until the root returns or an
//! error escapes the unwinder. Handlers live in [`crate::ops`], grouped
//! by instruction family; this file owns decode, the slow-path hooks
//! (profiler, breakpoints, echo), and the glue they all share.

use crate::echo::EchoState;
use crate::error::{VmError, VmResult};
use crate::frame::CallerContext;
use crate::host::{BreakpointAction, Host};
use crate::ignore::IgnoreStack;
use crate::profiler::VmProfiler;
use crate::stack::OperandStack;
use ottava_bytecode::{BytecodeUnit, Op};
use ottava_core::{RefTarget, Value};
use std::rc::Rc;

/// Outcome of one dispatched instruction.
pub(crate) enum Flow {
    Continue,
    /// The root frame returned; harvested values.
    Finished(Vec<Value>),
}

pub struct Vm<'h> {
    pub(crate) host: &'h mut dyn Host,
    pub(crate) stack: OperandStack,

    // Execution registers for the current frame.
    pub(crate) unit: Rc<BytecodeUnit>,
    pub(crate) ip: usize,
    pub(crate) bsp: usize,

    /// Start of the instruction being executed (including a `Wide`
    /// prefix); what the metadata tables are keyed by.
    pub(crate) instr_ip: usize,
    /// Position of the opcode byte itself; what specialization patches.
    pub(crate) op_ip: usize,
    pub(crate) wide: bool,

    /// Saved caller contexts, pushed per compiled-to-compiled call.
    pub(crate) frames: Vec<CallerContext>,
    pub(crate) ignore: IgnoreStack,
    pub(crate) echo_state: EchoState,
    pub(crate) profiler: Option<VmProfiler>,

    pub(crate) debug_mode: bool,
    pub(crate) echo_mode: bool,
    /// `ExtNargout` override for the next nargout-consuming opcode.
    pub(crate) ext_nargout: Option<usize>,
    /// Set by `PushSlotDisp`/`WordCmd`; `Disp` reads it to pick "ans".
    pub(crate) last_was_cmd: bool,
}

impl<'h> Vm<'h> {
    pub fn new(host: &'h mut dyn Host) -> Vm<'h> {
        Vm {
            host,
            stack: OperandStack::new(),
            unit: empty_unit(),
            ip: 0,
            bsp: 0,
            instr_ip: 0,
            op_ip: 0,
            wide: false,
            frames: Vec::new(),
            ignore: IgnoreStack::new(),
            echo_state: EchoState::new(),
            profiler: None,
            debug_mode: false,
            echo_mode: false,
            ext_nargout: None,
            last_was_cmd: false,
        }
    }

    pub fn enable_profiling(&mut self) {
        self.profiler = Some(VmProfiler::new());
    }

    pub fn take_profiler(&mut self) -> Option<VmProfiler> {
        self.profiler.take()
    }

    pub fn set_debug_mode(&mut self, on: bool) {
        self.debug_mode = on;
    }

    pub fn set_echo_mode(&mut self, on: bool) {
        self.echo_mode = on;
    }

    /// Operand-stack depth above the guard pad; zero when the machine is
    /// idle. Diagnostic surface for the stack-balance invariant.
    pub fn residual_stack_depth(&self) -> usize {
        self.stack.sp() - self.stack.base()
    }

    /// The guard pads still hold their sentinels.
    pub fn guards_intact(&self) -> bool {
        self.stack.guards_intact()
    }

    /// Run a compiled function to completion.
    ///
    /// Returns the harvested return values (up to `max(nargout, 1)`,
    /// trailing undefined values trimmed) or the error that escaped the
    /// root frame.
    pub fn execute(
        &mut self,
        unit: &Rc<BytecodeUnit>,
        args: &[Value],
        nargout: usize,
    ) -> Result<Vec<Value>, VmError> {
        self.enter_root_frame(unit, args, nargout)?;
        loop {
            match self.step() {
                Ok(Flow::Continue) => {}
                Ok(Flow::Finished(values)) => return Ok(values),
                Err(err) => {
                    if let Err(fatal) = self.unwind(err) {
                        return Err(fatal);
                    }
                }
            }
        }
    }

    // =========================================================================
    // Decode helpers
    // =========================================================================

    #[inline(always)]
    pub(crate) fn fetch_u8(&mut self) -> u8 {
        let v = self.unit.u8_at(self.ip);
        self.ip += 1;
        v
    }

    #[inline(always)]
    pub(crate) fn fetch_u16(&mut self) -> u16 {
        let v = self.unit.u16_at(self.ip);
        self.ip += 2;
        v
    }

    #[inline(always)]
    pub(crate) fn fetch_u32(&mut self) -> u32 {
        let v = self.unit.u32_at(self.ip);
        self.ip += 4;
        v
    }

    /// First slot operand; honors the `Wide` prefix.
    #[inline(always)]
    pub(crate) fn fetch_slot(&mut self) -> usize {
        if self.wide {
            self.fetch_u16() as usize
        } else {
            self.fetch_u8() as usize
        }
    }

    /// Re-execute the current instruction from its start (despecialize
    /// path: the opcode byte has just been patched).
    #[inline]
    pub(crate) fn redispatch(&mut self) {
        self.ip = self.instr_ip;
    }

    // =========================================================================
    // Slot and frame helpers
    // =========================================================================

    #[inline(always)]
    pub(crate) fn slot_ref(&self, slot: usize) -> &Value {
        self.stack.get(self.bsp + slot)
    }

    #[inline(always)]
    pub(crate) fn set_slot_raw(&mut self, slot: usize, v: Value) {
        self.stack.set(self.bsp + slot, v);
    }

    /// Slot contents with reference values read through.
    pub(crate) fn slot_deref(&mut self, slot: usize) -> Value {
        match self.slot_ref(slot) {
            Value::Ref(target) => {
                let target = target.clone();
                self.ref_read(&target)
            }
            v => v.clone(),
        }
    }

    pub(crate) fn ref_read(&mut self, target: &RefTarget) -> Value {
        match target {
            RefTarget::Global { name } => {
                self.host.global_value(name).unwrap_or(Value::Undef)
            }
            RefTarget::Persistent { fn_name, offset } => self
                .host
                .persistent_value(fn_name, *offset)
                .unwrap_or(Value::Undef),
        }
    }

    pub(crate) fn ref_write(&mut self, target: &RefTarget, value: Value) {
        match target {
            RefTarget::Global { name } => self.host.global_assign(name, value),
            RefTarget::Persistent { fn_name, offset } => {
                self.host.persistent_assign(fn_name, *offset, value)
            }
        }
    }

    /// The nargout the caller requested of the running function
    /// (`bsp[0]`, readable in source as `%nargout`).
    pub(crate) fn frame_nargout(&self) -> usize {
        match self.stack.get(self.bsp) {
            Value::Int(n) => *n as usize,
            _ => 0,
        }
    }

    pub(crate) fn n_locals(&self) -> usize {
        self.unit.header().n_locals as usize
    }

    pub(crate) fn id_name(&self, slot: usize) -> Rc<str> {
        self.unit
            .ids
            .get(slot)
            .cloned()
            .unwrap_or_else(|| "<unnamed>".into())
    }

    /// Consume a pending `ExtNargout` override, else use `fallback`.
    pub(crate) fn take_nargout(&mut self, fallback: usize) -> usize {
        self.ext_nargout.take().unwrap_or(fallback)
    }

    // =========================================================================
    // Step
    // =========================================================================

    pub(crate) fn step(&mut self) -> VmResult<Flow> {
        if self.profiler.is_some() || self.debug_mode || self.echo_mode {
            self.pre_dispatch_hooks()?;
        }

        self.instr_ip = self.ip;
        self.wide = false;
        let mut byte = self.fetch_u8();
        if byte == Op::Wide as u8 {
            self.wide = true;
            byte = self.fetch_u8();
        }
        self.op_ip = self.ip - 1;
        let op = Op::from_u8(byte).ok_or_else(|| {
            VmError::Exec(ottava_core::ExecError::msg(format!(
                "invalid opcode byte {byte:#04x} at ip {}",
                self.op_ip
            )))
        })?;

        use ottava_core::{BinOp, UnOp};
        match op {
            // -- Stack shuffling ---------------------------------------------
            Op::Pop => {
                self.stack.pop();
            }
            Op::Dup => {
                let v = self.stack.top().clone();
                self.stack.push(v);
            }
            Op::DupMove => self.op_dup_move(),
            Op::DupN => self.op_dup_n()?,
            Op::Rot => self.op_rot(),
            Op::PopNInts => self.op_pop_n_ints()?,

            // -- Binary arithmetic -------------------------------------------
            Op::Add => self.op_binary(BinOp::Add, Some(Op::AddDbl))?,
            Op::Sub => self.op_binary(BinOp::Sub, Some(Op::SubDbl))?,
            Op::Mul => self.op_binary(BinOp::Mul, Some(Op::MulDbl))?,
            Op::Div => self.op_binary(BinOp::Div, Some(Op::DivDbl))?,
            Op::Pow => self.op_binary(BinOp::Pow, Some(Op::PowDbl))?,
            Op::Ldiv => self.op_binary(BinOp::Ldiv, Some(Op::LdivDbl))?,
            Op::AddDbl => self.op_binary_dbl(BinOp::Add, Op::Add)?,
            Op::SubDbl => self.op_binary_dbl(BinOp::Sub, Op::Sub)?,
            Op::MulDbl => self.op_binary_dbl(BinOp::Mul, Op::Mul)?,
            Op::DivDbl => self.op_binary_dbl(BinOp::Div, Op::Div)?,
            Op::PowDbl => self.op_binary_dbl(BinOp::Pow, Op::Pow)?,
            Op::LdivDbl => self.op_binary_dbl(BinOp::Ldiv, Op::Ldiv)?,

            Op::ElMul => self.op_binary(BinOp::ElMul, None)?,
            Op::ElDiv => self.op_binary(BinOp::ElDiv, None)?,
            Op::ElPow => self.op_binary(BinOp::ElPow, None)?,
            Op::ElLdiv => self.op_binary(BinOp::ElLdiv, None)?,
            Op::ElAnd => self.op_binary(BinOp::ElAnd, None)?,
            Op::ElOr => self.op_binary(BinOp::ElOr, None)?,

            Op::TransMul => self.op_fused_trans(BinOp::Mul, true, false)?,
            Op::MulTrans => self.op_fused_trans(BinOp::Mul, false, false)?,
            Op::HermMul => self.op_fused_trans(BinOp::Mul, true, true)?,
            Op::MulHerm => self.op_fused_trans(BinOp::Mul, false, true)?,
            Op::TransLdiv => self.op_fused_trans(BinOp::Ldiv, true, false)?,
            Op::HermLdiv => self.op_fused_trans(BinOp::Ldiv, true, true)?,

            // -- Relational --------------------------------------------------
            Op::Le => self.op_binary(BinOp::Le, Some(Op::LeDbl))?,
            Op::LeEq => self.op_binary(BinOp::LeEq, Some(Op::LeEqDbl))?,
            Op::Gr => self.op_binary(BinOp::Gr, Some(Op::GrDbl))?,
            Op::GrEq => self.op_binary(BinOp::GrEq, Some(Op::GrEqDbl))?,
            Op::Eq => self.op_binary(BinOp::Eq, Some(Op::EqDbl))?,
            Op::Neq => self.op_binary(BinOp::Neq, Some(Op::NeqDbl))?,
            Op::LeDbl => self.op_binary_dbl(BinOp::Le, Op::Le)?,
            Op::LeEqDbl => self.op_binary_dbl(BinOp::LeEq, Op::LeEq)?,
            Op::GrDbl => self.op_binary_dbl(BinOp::Gr, Op::Gr)?,
            Op::GrEqDbl => self.op_binary_dbl(BinOp::GrEq, Op::GrEq)?,
            Op::EqDbl => self.op_binary_dbl(BinOp::Eq, Op::Eq)?,
            Op::NeqDbl => self.op_binary_dbl(BinOp::Neq, Op::Neq)?,

            // -- Unary -------------------------------------------------------
            Op::Not => self.op_unary(UnOp::Not, Some(Op::NotDbl))?,
            Op::NotDbl => self.op_not_dbl()?,
            Op::NotBool => self.op_not_bool()?,
            Op::Uadd => self.op_unary(UnOp::Uadd, None)?,
            Op::Usub => self.op_unary(UnOp::Usub, Some(Op::UsubDbl))?,
            Op::UsubDbl => self.op_usub_dbl()?,
            Op::Trans => self.op_unary(UnOp::Trans, None)?,
            Op::Herm => self.op_unary(UnOp::Herm, None)?,

            // -- Increment / decrement ---------------------------------------
            Op::IncrIdPrefix => self.op_step_id(1.0, true, Some(Op::IncrIdPrefixDbl))?,
            Op::IncrIdPostfix => self.op_step_id(1.0, false, Some(Op::IncrIdPostfixDbl))?,
            Op::DecrIdPrefix => self.op_step_id(-1.0, true, Some(Op::DecrIdPrefixDbl))?,
            Op::DecrIdPostfix => self.op_step_id(-1.0, false, Some(Op::DecrIdPostfixDbl))?,
            Op::IncrIdPrefixDbl => self.op_step_id_dbl(1.0, true, Op::IncrIdPrefix)?,
            Op::IncrIdPostfixDbl => self.op_step_id_dbl(1.0, false, Op::IncrIdPostfix)?,
            Op::DecrIdPrefixDbl => self.op_step_id_dbl(-1.0, true, Op::DecrIdPrefix)?,
            Op::DecrIdPostfixDbl => self.op_step_id_dbl(-1.0, false, Op::DecrIdPostfix)?,

            // -- Constant loads ----------------------------------------------
            Op::LoadCst => {
                let idx = self.fetch_u8() as usize;
                self.push_constant(idx)?;
            }
            Op::LoadFarCst => {
                let idx = self.fetch_u32() as usize;
                self.push_constant(idx)?;
            }
            Op::Load2Cst => {
                let idx = self.fetch_u8() as usize;
                self.push_constant(idx)?;
                self.push_constant(idx + 1)?;
            }
            Op::PushDbl0 => self.stack.push(Value::Num(0.0)),
            Op::PushDbl1 => self.stack.push(Value::Num(1.0)),
            Op::PushDbl2 => self.stack.push(Value::Num(2.0)),
            Op::PushTrue => self.stack.push(Value::Bool(true)),
            Op::PushFalse => self.stack.push(Value::Bool(false)),
            Op::PushNil => self.stack.push(Value::Undef),
            Op::PushPi => self.op_named_const("pi", Value::Num(std::f64::consts::PI))?,
            Op::PushI => self.op_named_const("i", Value::Complex(0.0, 1.0))?,
            Op::PushE => self.op_named_const("e", Value::Num(std::f64::consts::E))?,
            Op::PushFoldedCst => self.op_push_folded_cst(),
            Op::SetFoldedCst => self.op_set_folded_cst(),

            // -- Slot access -------------------------------------------------
            Op::PushSlotNargout0 => self.op_push_slot(SlotNargout::Fixed(0), false)?,
            Op::PushSlotNargout1 => self.op_push_slot(SlotNargout::Fixed(1), false)?,
            Op::PushSlotNargout1Special => self.op_push_slot(SlotNargout::Fixed(1), true)?,
            Op::PushSlotNargoutN => self.op_push_slot(SlotNargout::Operand, false)?,
            Op::PushSlotNx => self.op_push_slot(SlotNargout::Frame, false)?,
            Op::PushSlotDisp => self.op_push_slot_disp()?,
            Op::Assign => self.op_assign(false)?,
            Op::ForceAssign => self.op_assign(true)?,
            Op::AssignN => self.op_assign_n()?,
            Op::BindAns => self.op_bind_ans()?,
            Op::AssignCompound => self.op_assign_compound()?,
            Op::SetSlotToStackDepth => self.op_set_slot_to_stack_depth(),

            // -- Branches ----------------------------------------------------
            Op::Jmp => {
                let target = self.fetch_u16() as usize;
                self.ip = target;
            }
            Op::JmpIf => self.op_jmp_cond(true, Some(Op::JmpIfBool))?,
            Op::JmpIfn => self.op_jmp_cond(false, Some(Op::JmpIfnBool))?,
            Op::JmpIfBool => self.op_jmp_cond_bool(true, Op::JmpIf)?,
            Op::JmpIfnBool => self.op_jmp_cond_bool(false, Op::JmpIfn)?,
            Op::JmpIfDef => {
                let slot = self.fetch_u16() as usize;
                let target = self.fetch_u16() as usize;
                if self.slot_ref(slot).is_defined() {
                    self.ip = target;
                }
            }
            Op::JmpIfnCaseMatch => self.op_jmp_ifn_case_match()?,

            // -- Calls and returns -------------------------------------------
            Op::Ret => return self.op_ret(false),
            Op::RetAnon => return self.op_ret(true),
            Op::IndexIdNargout0 => self.op_index_id(SlotNargout::Fixed(0), false)?,
            Op::IndexIdNargout1 => self.op_index_id(SlotNargout::Fixed(1), false)?,
            Op::IndexId1Mat1d => self.op_index_id1_mat(1)?,
            Op::IndexId1Mat2d => self.op_index_id1_mat(2)?,
            Op::IndexIdN => self.op_index_id(SlotNargout::Operand, false)?,
            Op::IndexIdNx => self.op_index_id(SlotNargout::Frame, false)?,
            Op::IndexCellIdNargout0 => self.op_index_id(SlotNargout::Fixed(0), true)?,
            Op::IndexCellIdNargout1 => self.op_index_id(SlotNargout::Fixed(1), true)?,
            Op::IndexCellIdN => self.op_index_id(SlotNargout::Operand, true)?,
            Op::IndexCellIdNx => self.op_index_id(SlotNargout::Frame, true)?,
            Op::IndexStructNargoutN => self.op_index_struct()?,
            Op::IndexStructCall => self.op_index_struct_call()?,
            Op::IndexStructSubcall => self.op_index_struct_subcall()?,
            Op::IndexObj => self.op_index_obj()?,
            Op::WordCmd => self.op_word_cmd(false)?,
            Op::WordCmdNx => self.op_word_cmd(true)?,
            Op::Eval => self.op_eval()?,

            // -- Indexed assignment ------------------------------------------
            Op::SubassignId => self.op_subassign_id()?,
            Op::SubassignIdMat1d => self.op_subassign_id_mat(1)?,
            Op::SubassignIdMat2d => self.op_subassign_id_mat(2)?,
            Op::SubassignObj => self.op_subassign_obj()?,
            Op::SubassignStruct => self.op_subassign_struct()?,
            Op::SubassignCellId => self.op_subassign_cell_id()?,
            Op::SubassignChained => self.op_subassign_chained()?,

            // -- Iteration ---------------------------------------------------
            Op::ForSetup => self.op_for_setup()?,
            Op::ForCond => self.op_for_cond()?,
            Op::ForComplexSetup => self.op_for_complex_setup()?,
            Op::ForComplexCond => self.op_for_complex_cond()?,

            // -- Aggregates --------------------------------------------------
            Op::Matrix => self.op_matrix()?,
            Op::MatrixUneven => self.op_matrix_uneven()?,
            Op::PushCell => self.op_push_cell(false)?,
            Op::PushCellBig => self.op_push_cell(true)?,
            Op::AppendCell => self.op_append_cell()?,
            Op::Colon2 | Op::Colon2Cmd => self.op_colon(false)?,
            Op::Colon3 | Op::Colon3Cmd => self.op_colon(true)?,

            // -- Scoping -----------------------------------------------------
            Op::GlobalInit => self.op_global_init()?,
            Op::EnterScriptFrame => self.host.vm_enter_script(),
            Op::ExitScriptFrame => self.host.vm_exit_script(),
            Op::EnterNestedFrame => self.host.vm_enter_nested(),
            Op::InstallFunction => self.op_install_function()?,

            // -- Ignored outputs ---------------------------------------------
            Op::SetIgnoreOutputs => self.op_set_ignore_outputs(),
            Op::ClearIgnoreOutputs => self.op_clear_ignore_outputs(),
            Op::AnonMaybeSetIgnoreOutputs => self.op_anon_maybe_set_ignore_outputs(),
            Op::ExtNargout => {
                self.ext_nargout = Some(self.frame_nargout());
            }

            // -- Diagnostics -------------------------------------------------
            Op::Disp => self.op_disp()?,
            Op::HandleSignals => crate::host::signal_checkpoint(self.host)?,
            Op::Debug => self.op_debug()?,
            Op::BraindeadPrecondition => {
                let scalar = self.stack.top().is_scalar_shaped();
                self.stack.push(Value::Bool(scalar));
            }
            Op::BraindeadWarning => self.op_braindead_warning(),

            // -- Function handles --------------------------------------------
            Op::PushFcnHandle => self.op_push_fcn_handle()?,
            Op::PushAnonFcnHandle => self.op_push_anon_fcn_handle()?,

            // -- Misc --------------------------------------------------------
            Op::ThrowIfErrObj => self.op_throw_if_err_obj()?,
            Op::EndId => self.op_end_id()?,
            Op::EndObj => self.op_end_obj()?,
            Op::EndXN => self.op_end_x_n()?,

            Op::Wide => {
                return Err(VmError::Exec(ottava_core::ExecError::msg(
                    "Wide prefix with no instruction",
                )))
            }
        }
        Ok(Flow::Continue)
    }

    // =========================================================================
    // Slow-path hooks
    // =========================================================================

    fn pre_dispatch_hooks(&mut self) -> VmResult<()> {
        if let Some(profiler) = &mut self.profiler {
            profiler.tick(self.ip as u32);
        }
        if self.debug_mode || self.host.breakpoint_active() {
            let tree = self.unit.tree_for_ip(self.ip as u32);
            let is_ret = matches!(self.unit.op_at(self.ip), Some(op) if op.is_return());
            self.host.set_active_bytecode_ip(self.ip);
            match self.host.do_breakpoint(tree, is_ret) {
                BreakpointAction::Continue => {}
                BreakpointAction::QuitDebug { all } => {
                    return Err(VmError::DebugQuit { all });
                }
            }
        }
        if self.echo_mode || self.host.echo_enabled() {
            let is_cond = matches!(
                self.unit.op_at(self.ip),
                Some(Op::ForCond | Op::ForComplexCond)
            );
            if let Some(loc) = self.unit.loc_for_ip(self.ip as u32) {
                let line = loc.line;
                if self.echo_state.should_echo(line, is_cond) {
                    self.host.echo_code(line);
                }
            }
        }
        Ok(())
    }

    /// Name to blame for an index error at the current instruction: the
    /// arg-name table wins, the indexed slot's identifier is the
    /// fallback.
    pub(crate) fn index_error_name(&self, slot: Option<usize>) -> Option<Rc<str>> {
        if let Some(name) = self.unit.arg_name_for_ip(self.instr_ip as u32) {
            return Some(name.clone());
        }
        slot.map(|s| self.id_name(s))
    }
}

/// How a slot/index opcode determines its nargout.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SlotNargout {
    Fixed(usize),
    /// From a trailing u8 operand.
    Operand,
    /// From the running frame's own nargout (`bsp[0]`).
    Frame,
}

/// Placeholder unit so `Vm` has a valid register file before the first
/// `execute`.
fn empty_unit() -> Rc<BytecodeUnit> {
    let code = vec![0, 0, 1, 0, Op::Ret as u8];
    Rc::new(BytecodeUnit::from_parts(
        code,
        vec![ottava_bytecode::Const::Str("<idle>".into())],
        vec!["%nargout".into()],
        vec![],
        vec![],
        vec![],
        vec![],
        vec![],
        0,
    ))
}
