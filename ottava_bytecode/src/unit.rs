//! Compiled-function representation.
//!
//! A [`BytecodeUnit`] is the unit of execution: code bytes, constant pool,
//! identifier table, and the metadata tables the VM needs for diagnostics
//! and unwinding. Units are immutable after construction with one
//! exception: opcode self-specialization stores a replacement opcode byte
//! in place, which is why the code buffer is `Cell<u8>` rather than plain
//! bytes. The VM is single-threaded, so these stores need no
//! synchronization.

use crate::opcode::Op;
use std::cell::Cell;
use std::rc::Rc;

/// Frame header size at the front of every code buffer:
/// `i8 n_returns, i8 n_args, u16le n_locals`.
pub const FRAME_HEADER_SIZE: usize = 4;

/// `n_returns` sentinel marking an anonymous function (effective return
/// count 1).
pub const ANON_N_RETURNS: i8 = i8::MIN;

/// A constant-pool entry.
///
/// Pool entries are converted to runtime values on `LoadCst`; the pool
/// itself is never written by the VM. Entry 0 holds the function name,
/// entry 1 the function-type tag, entry 2 the profiler name.
#[derive(Debug, Clone)]
pub enum Const {
    Num(f64),
    Bool(bool),
    Str(Rc<str>),
    /// The magic colon used as a whole-dimension index.
    Colon,
    /// A nested compiled unit (anonymous-function bodies).
    Unit(Rc<BytecodeUnit>),
}

impl Const {
    /// The function-name entry every pool starts with.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Const::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Source range for an ip span, used for error locations and echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocEntry {
    pub ip_start: u32,
    pub ip_end: u32,
    pub line: u32,
    pub column: u32,
}

/// What an unwind-table entry protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwindKind {
    TryCatch,
    UnwindProtect,
    /// Marks the two loop-state integers a `ForSetup` left on the stack.
    ForLoop,
}

/// A per-ip-range unwind directive.
///
/// `stack_depth` is relative to `bsp + n_locals`; `target_ip` is where
/// dispatch resumes for the handler kinds (unused for `ForLoop`).
#[derive(Debug, Clone, Copy)]
pub struct UnwindEntry {
    pub ip_start: u32,
    pub ip_end: u32,
    pub stack_depth: u32,
    pub kind: UnwindKind,
    pub target_ip: u32,
}

/// Attributes an index error inside an ip range to a user-visible name.
#[derive(Debug, Clone)]
pub struct ArgNameEntry {
    pub ip_start: u32,
    pub ip_end: u32,
    pub object_name: Rc<str>,
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Negative marks variadic output; [`ANON_N_RETURNS`] marks an
    /// anonymous function.
    pub n_returns: i8,
    /// Negative marks variadic input (last named slot is `varargin`).
    pub n_args: i8,
    /// Total slot count: `%nargout`, returns, arguments, locals.
    pub n_locals: u16,
}

impl FrameHeader {
    #[inline]
    pub fn is_vararg_in(&self) -> bool {
        self.n_args < 0
    }

    #[inline]
    pub fn is_vararg_out(&self) -> bool {
        self.n_returns < 0 && self.n_returns != ANON_N_RETURNS
    }

    #[inline]
    pub fn is_anon(&self) -> bool {
        self.n_returns == ANON_N_RETURNS
    }

    /// Declared argument-slot count (including the `varargin` slot).
    #[inline]
    pub fn arg_slots(&self) -> usize {
        self.n_args.unsigned_abs() as usize
    }

    /// Declared return-slot count.
    #[inline]
    pub fn return_slots(&self) -> usize {
        if self.is_anon() {
            1
        } else {
            self.n_returns.unsigned_abs() as usize
        }
    }
}

/// A compiled function: code plus everything the VM needs to run it.
#[derive(Debug)]
pub struct BytecodeUnit {
    /// Code bytes, frame header first. `Cell` so specialization handlers
    /// can patch the opcode byte they are executing.
    code: Box<[Cell<u8>]>,
    pub constants: Box<[Const]>,
    /// Identifier strings, indexed by slot number.
    pub ids: Box<[Rc<str>]>,
    pub loc_table: Box<[LocEntry]>,
    pub unwind_table: Box<[UnwindEntry]>,
    pub arg_name_table: Box<[ArgNameEntry]>,
    /// ip → opaque source-tree handle, for breakpoints, echo and `eval`.
    pub ip_to_tree: Box<[(u32, u64)]>,
    /// slot → persistent-scope offset.
    pub persistent_slot_map: Box<[(u16, u16)]>,
    /// Number of captured values an anonymous unit expects (zero
    /// otherwise).
    pub n_captures: u8,
}

impl BytecodeUnit {
    /// Wrap raw parts produced by the builder (or a loader).
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        code: Vec<u8>,
        constants: Vec<Const>,
        ids: Vec<Rc<str>>,
        loc_table: Vec<LocEntry>,
        unwind_table: Vec<UnwindEntry>,
        arg_name_table: Vec<ArgNameEntry>,
        ip_to_tree: Vec<(u32, u64)>,
        persistent_slot_map: Vec<(u16, u16)>,
        n_captures: u8,
    ) -> BytecodeUnit {
        assert!(code.len() >= FRAME_HEADER_SIZE, "missing frame header");
        BytecodeUnit {
            code: code.into_iter().map(Cell::new).collect(),
            constants: constants.into(),
            ids: ids.into(),
            loc_table: loc_table.into(),
            unwind_table: unwind_table.into(),
            arg_name_table: arg_name_table.into(),
            ip_to_tree: ip_to_tree.into(),
            persistent_slot_map: persistent_slot_map.into(),
            n_captures,
        }
    }

    /// Function name from `constants[0]`.
    pub fn name(&self) -> &str {
        self.constants
            .first()
            .and_then(Const::as_str)
            .unwrap_or("<unknown>")
    }

    /// Profiler name from `constants[2]`.
    pub fn profiler_name(&self) -> &str {
        self.constants
            .get(2)
            .and_then(Const::as_str)
            .unwrap_or_else(|| self.name())
    }

    #[inline]
    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            n_returns: self.code[0].get() as i8,
            n_args: self.code[1].get() as i8,
            n_locals: u16::from_le_bytes([self.code[2].get(), self.code[3].get()]),
        }
    }

    #[inline]
    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    /// First executable ip.
    #[inline]
    pub fn entry_ip(&self) -> usize {
        FRAME_HEADER_SIZE
    }

    // =========================================================================
    // Code reads (little-endian multi-byte operands)
    // =========================================================================

    #[inline(always)]
    pub fn u8_at(&self, ip: usize) -> u8 {
        self.code[ip].get()
    }

    #[inline(always)]
    pub fn u16_at(&self, ip: usize) -> u16 {
        u16::from_le_bytes([self.code[ip].get(), self.code[ip + 1].get()])
    }

    #[inline(always)]
    pub fn u32_at(&self, ip: usize) -> u32 {
        u32::from_le_bytes([
            self.code[ip].get(),
            self.code[ip + 1].get(),
            self.code[ip + 2].get(),
            self.code[ip + 3].get(),
        ])
    }

    #[inline(always)]
    pub fn op_at(&self, ip: usize) -> Option<Op> {
        Op::from_u8(self.code[ip].get())
    }

    /// Opcode self-specialization: replace the opcode byte at `ip`.
    ///
    /// The only mutation a unit ever sees; both the specialized and the
    /// generic byte must be semantically equivalent for the operands that
    /// reach them.
    #[inline]
    pub fn patch_op(&self, ip: usize, op: Op) {
        self.code[ip].set(op as u8);
    }

    // =========================================================================
    // Table lookups
    // =========================================================================

    /// Source location covering `ip`, if any.
    pub fn loc_for_ip(&self, ip: u32) -> Option<&LocEntry> {
        self.loc_table
            .iter()
            .find(|e| e.ip_start <= ip && ip < e.ip_end)
    }

    /// Innermost unwind entry covering `ip`, optionally restricted to
    /// `UnwindProtect` (interrupt unwinding honors nothing else).
    /// `ForLoop` entries never match here; they are bookkeeping for
    /// [`BytecodeUnit::forloop_depth_at`].
    pub fn unwind_entry_for_ip(&self, ip: u32, only_unwind_protect: bool) -> Option<&UnwindEntry> {
        self.unwind_table
            .iter()
            .filter(|e| e.ip_start <= ip && ip < e.ip_end)
            .filter(|e| match e.kind {
                UnwindKind::ForLoop => false,
                UnwindKind::TryCatch => !only_unwind_protect,
                UnwindKind::UnwindProtect => true,
            })
            .min_by_key(|e| e.ip_end - e.ip_start)
    }

    /// Stack depth of a for-loop state pair, if `depth` sits just above
    /// one. Consulted while trimming so the unwinder knows it is dropping
    /// loop integers rather than plain values.
    pub fn forloop_depth_at(&self, depth: u32) -> Option<u32> {
        self.unwind_table
            .iter()
            .filter(|e| e.kind == UnwindKind::ForLoop)
            .map(|e| e.stack_depth)
            .find(|d| *d == depth)
    }

    /// Object name to blame for an index error raised at `ip`.
    pub fn arg_name_for_ip(&self, ip: u32) -> Option<&Rc<str>> {
        self.arg_name_table
            .iter()
            .find(|e| e.ip_start <= ip && ip < e.ip_end)
            .map(|e| &e.object_name)
    }

    /// Opaque source-tree handle for `ip` (breakpoints, echo, `eval`).
    pub fn tree_for_ip(&self, ip: u32) -> Option<u64> {
        self.ip_to_tree
            .iter()
            .find(|(i, _)| *i == ip)
            .map(|(_, t)| *t)
    }

    /// Persistent-scope offset for a slot declared `persistent`.
    pub fn persistent_offset(&self, slot: u16) -> Option<u16> {
        self.persistent_slot_map
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, off)| *off)
    }
}
