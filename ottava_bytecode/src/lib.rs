//! Bytecode format for the Ottava VM.
//!
//! This crate owns subsystem B of the VM: the wire format of compiled
//! functions and the tooling around it.
//!
//! - [`Op`] — the ~150-opcode instruction set, one byte per opcode with
//!   byte-oriented little-endian operands and a [`Op::Wide`] prefix that
//!   widens the next opcode's first slot operand to 16 bits
//! - [`BytecodeUnit`] — code, constant pool, identifier table, frame
//!   header, and the source-location / unwind / arg-name metadata tables
//! - [`BytecodeBuilder`] — label-resolving assembler used by tests and
//!   front-ends
//! - [`disassemble`] — the listing printer (and the authority on operand
//!   widths)
//!
//! Units are immutable except for opcode self-specialization: type
//! observing opcodes patch their own opcode byte between a generic and a
//! specialized form. That single-byte store is the only mutation and the
//! VM is single-threaded, so the code buffer is `Cell<u8>`.

pub mod builder;
pub mod dis;
pub mod opcode;
pub mod unit;

pub use builder::{BytecodeBuilder, Label};
pub use dis::{disassemble, disassemble_at};
pub use opcode::{CompoundOp, Op};
pub use unit::{
    ArgNameEntry, BytecodeUnit, Const, FrameHeader, LocEntry, UnwindEntry, UnwindKind,
    ANON_N_RETURNS, FRAME_HEADER_SIZE,
};
