//! Opcode set for the Ottava stack VM.
//!
//! Opcodes are a single byte; operands are byte-oriented and little-endian
//! (see [`crate::unit::BytecodeUnit`] for the reading side). A handful of
//! opcodes are *specialized* variants of a generic one (`AddDbl` for `Add`,
//! `JmpIfBool` for `JmpIf`, ...): the dispatch loop installs them by
//! patching the opcode byte in place on a type match and the specialized
//! handler patches the generic byte back on a mismatch, so the two stay
//! semantically interchangeable.

/// Declares [`Op`] with explicit `u8` discriminants plus the name and
/// decode tables.
macro_rules! define_opcodes {
    ($($(#[$meta:meta])* $variant:ident = $byte:expr,)*) => {
        /// A bytecode operation.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Op {
            $($(#[$meta])* $variant = $byte,)*
        }

        impl Op {
            /// Decode a raw opcode byte.
            #[inline]
            pub fn from_u8(byte: u8) -> Option<Op> {
                match byte {
                    $($byte => Some(Op::$variant),)*
                    _ => None,
                }
            }

            /// Mnemonic used by the disassembler and error messages.
            pub fn name(self) -> &'static str {
                match self {
                    $(Op::$variant => stringify!($variant),)*
                }
            }
        }
    };
}

define_opcodes! {
    // Stack shuffling
    Pop = 0,
    Dup = 1,
    /// Duplicate TOS and tuck the copy below the value beneath it.
    DupMove = 2,
    /// `DupN offset, n`: re-push `n` values starting `offset` below TOS.
    DupN = 3,
    Rot = 4,
    /// Reclaim `n` loop-state integers at loop exit.
    PopNInts = 5,

    // Binary arithmetic, generic then double-specialized
    Add = 6,
    Sub = 7,
    Mul = 8,
    Div = 9,
    Pow = 10,
    Ldiv = 11,
    AddDbl = 12,
    SubDbl = 13,
    MulDbl = 14,
    DivDbl = 15,
    PowDbl = 16,
    LdivDbl = 17,

    // Elementwise binary
    ElMul = 18,
    ElDiv = 19,
    ElPow = 20,
    ElLdiv = 21,
    ElAnd = 22,
    ElOr = 23,

    // Fused transpose forms (`a' * b` etc.)
    TransMul = 24,
    MulTrans = 25,
    HermMul = 26,
    MulHerm = 27,
    TransLdiv = 28,
    HermLdiv = 29,

    // Relational, generic then double-specialized
    Le = 30,
    LeEq = 31,
    Gr = 32,
    GrEq = 33,
    Eq = 34,
    Neq = 35,
    LeDbl = 36,
    LeEqDbl = 37,
    GrDbl = 38,
    GrEqDbl = 39,
    EqDbl = 40,
    NeqDbl = 41,

    // Unary
    Not = 42,
    NotDbl = 43,
    NotBool = 44,
    Uadd = 45,
    Usub = 46,
    UsubDbl = 47,
    Trans = 48,
    Herm = 49,

    // Increment/decrement of a slot, prefix pushes the new value and
    // postfix the old one
    IncrIdPrefix = 50,
    IncrIdPostfix = 51,
    DecrIdPrefix = 52,
    DecrIdPostfix = 53,
    IncrIdPrefixDbl = 54,
    IncrIdPostfixDbl = 55,
    DecrIdPrefixDbl = 56,
    DecrIdPostfixDbl = 57,

    // Constant loads
    LoadCst = 58,
    LoadFarCst = 59,
    /// Push `constants[k]` and `constants[k + 1]`.
    Load2Cst = 60,
    PushDbl0 = 61,
    PushDbl1 = 62,
    PushDbl2 = 63,
    PushTrue = 64,
    PushFalse = 65,
    PushNil = 66,
    PushPi = 67,
    PushI = 68,
    PushE = 69,
    PushFoldedCst = 70,
    SetFoldedCst = 71,

    // Slot access
    PushSlotNargout0 = 72,
    PushSlotNargout1 = 73,
    /// As `PushSlotNargout1` but keeps the came-from-command-syntax marker
    /// consulted by `Disp`.
    PushSlotNargout1Special = 74,
    PushSlotNargoutN = 75,
    PushSlotNx = 76,
    PushSlotDisp = 77,
    Assign = 78,
    ForceAssign = 79,
    AssignN = 80,
    BindAns = 81,
    AssignCompound = 82,
    SetSlotToStackDepth = 83,

    // Branches
    Jmp = 84,
    JmpIf = 85,
    JmpIfn = 86,
    JmpIfBool = 87,
    JmpIfnBool = 88,
    JmpIfDef = 89,
    JmpIfnCaseMatch = 90,

    // Calls and returns
    Ret = 91,
    RetAnon = 92,
    IndexIdNargout0 = 93,
    IndexIdNargout1 = 94,
    IndexId1Mat1d = 95,
    IndexId1Mat2d = 96,
    IndexIdN = 97,
    IndexIdNx = 98,
    IndexCellIdNargout0 = 99,
    IndexCellIdNargout1 = 100,
    IndexCellIdN = 101,
    IndexCellIdNx = 102,
    IndexStructNargoutN = 103,
    IndexStructCall = 104,
    IndexStructSubcall = 105,
    IndexObj = 106,
    WordCmd = 107,
    WordCmdNx = 108,
    Eval = 109,

    // Indexed assignment
    SubassignId = 110,
    SubassignIdMat1d = 111,
    SubassignIdMat2d = 112,
    SubassignObj = 113,
    SubassignStruct = 114,
    SubassignCellId = 115,
    SubassignChained = 116,

    // Iteration
    ForSetup = 117,
    ForCond = 118,
    ForComplexSetup = 119,
    ForComplexCond = 120,

    // Aggregate construction
    Matrix = 121,
    MatrixUneven = 122,
    PushCell = 123,
    PushCellBig = 124,
    AppendCell = 125,
    Colon2 = 126,
    Colon3 = 127,
    Colon2Cmd = 128,
    Colon3Cmd = 129,

    // Scoping
    GlobalInit = 130,
    EnterScriptFrame = 131,
    ExitScriptFrame = 132,
    EnterNestedFrame = 133,
    InstallFunction = 134,

    // Ignored outputs ("black holes")
    SetIgnoreOutputs = 135,
    ClearIgnoreOutputs = 136,
    AnonMaybeSetIgnoreOutputs = 137,
    ExtNargout = 138,

    // Diagnostics
    Disp = 139,
    HandleSignals = 140,
    Debug = 141,
    BraindeadPrecondition = 142,
    BraindeadWarning = 143,

    // Function handles
    PushFcnHandle = 144,
    PushAnonFcnHandle = 145,

    // Misc
    ThrowIfErrObj = 146,
    EndId = 147,
    EndObj = 148,
    EndXN = 149,
    /// Prefix widening the next opcode's first slot operand to 16 bits.
    Wide = 150,
}

/// Kinds for `GlobalInit`.
pub const GLOBAL_KIND_GLOBAL: u8 = 0;
pub const GLOBAL_KIND_PERSISTENT: u8 = 1;

/// Index-kind bytes shared by the indexing and subassign opcodes.
pub const INDEX_PAREN: u8 = b'(';
pub const INDEX_BRACE: u8 = b'{';
pub const INDEX_DOT: u8 = b'.';

/// `AppendCell` tags: element within a row, last element of a row, last
/// element of the whole literal, and single-element finalization.
pub const CELL_APPEND_MID: u8 = 1;
pub const CELL_APPEND_ROW_END: u8 = 2;
pub const CELL_APPEND_FINAL: u8 = 3;
pub const CELL_APPEND_ONLY: u8 = 4;

/// Compound-assignment operator bytes for `AssignCompound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompoundOp {
    AddEq = 0,
    SubEq = 1,
    MulEq = 2,
    DivEq = 3,
    PowEq = 4,
    LdivEq = 5,
    ElMulEq = 6,
    ElDivEq = 7,
    ElPowEq = 8,
    ElLdivEq = 9,
    AndEq = 10,
    OrEq = 11,
}

impl CompoundOp {
    pub fn from_u8(byte: u8) -> Option<CompoundOp> {
        use CompoundOp::*;
        Some(match byte {
            0 => AddEq,
            1 => SubEq,
            2 => MulEq,
            3 => DivEq,
            4 => PowEq,
            5 => LdivEq,
            6 => ElMulEq,
            7 => ElDivEq,
            8 => ElPowEq,
            9 => ElLdivEq,
            10 => AndEq,
            11 => OrEq,
            _ => return None,
        })
    }
}

impl Op {
    /// True for the two return opcodes; the breakpoint hook wants to know.
    #[inline]
    pub fn is_return(self) -> bool {
        matches!(self, Op::Ret | Op::RetAnon)
    }

    /// The generic opcode a specialized variant decays to, or `None` for
    /// opcodes that are not specializations.
    pub fn generic_form(self) -> Option<Op> {
        Some(match self {
            Op::AddDbl => Op::Add,
            Op::SubDbl => Op::Sub,
            Op::MulDbl => Op::Mul,
            Op::DivDbl => Op::Div,
            Op::PowDbl => Op::Pow,
            Op::LdivDbl => Op::Ldiv,
            Op::LeDbl => Op::Le,
            Op::LeEqDbl => Op::LeEq,
            Op::GrDbl => Op::Gr,
            Op::GrEqDbl => Op::GrEq,
            Op::EqDbl => Op::Eq,
            Op::NeqDbl => Op::Neq,
            Op::NotDbl | Op::NotBool => Op::Not,
            Op::UsubDbl => Op::Usub,
            Op::JmpIfBool => Op::JmpIf,
            Op::JmpIfnBool => Op::JmpIfn,
            Op::IncrIdPrefixDbl => Op::IncrIdPrefix,
            Op::IncrIdPostfixDbl => Op::IncrIdPostfix,
            Op::DecrIdPrefixDbl => Op::DecrIdPrefix,
            Op::DecrIdPostfixDbl => Op::DecrIdPostfix,
            Op::IndexId1Mat1d | Op::IndexId1Mat2d => Op::IndexIdNargout1,
            Op::SubassignIdMat1d | Op::SubassignIdMat2d => Op::SubassignId,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for byte in 0..=u8::MAX {
            if let Some(op) = Op::from_u8(byte) {
                assert_eq!(op as u8, byte, "{}", op.name());
            }
        }
    }

    #[test]
    fn test_opcode_count_and_range() {
        let count = (0..=u8::MAX).filter(|b| Op::from_u8(*b).is_some()).count();
        assert_eq!(count, 151);
        assert!(Op::from_u8(151).is_none());
    }

    #[test]
    fn test_specializations_decay_to_their_generic() {
        assert_eq!(Op::AddDbl.generic_form(), Some(Op::Add));
        assert_eq!(Op::IndexId1Mat2d.generic_form(), Some(Op::IndexIdNargout1));
        assert_eq!(Op::JmpIfnBool.generic_form(), Some(Op::JmpIfn));
        assert_eq!(Op::Add.generic_form(), None);
        assert_eq!(Op::Wide.generic_form(), None);
    }

    #[test]
    fn test_return_predicate() {
        assert!(Op::Ret.is_return());
        assert!(Op::RetAnon.is_return());
        assert!(!Op::Jmp.is_return());
    }
}
