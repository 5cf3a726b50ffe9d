//! Stack-based bytecode virtual machine for the Ottava runtime.
//!
//! The VM executes compiled user functions for a dynamically-typed,
//! array-oriented language with numeric matrix semantics, 1-based
//! indexing, comma-separated lists, and structured exception handling.
//! It replaces a tree-walking evaluator while preserving its observable
//! semantics.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                          Vm                            │
//! ├────────────────────────────────────────────────────────┤
//! │  ┌───────────────────────────┐  ┌───────────────────┐  │
//! │  │ OperandStack              │  │ CallerContext[]   │  │
//! │  │ guard | frame | frame | … │  │ (saved registers) │  │
//! │  └───────────────────────────┘  └───────────────────┘  │
//! │                                                        │
//! │  ┌──────────────┐  ┌────────────┐  ┌───────────────┐   │
//! │  │ dispatch     │  │ unwinder   │  │ IgnoreStack   │   │
//! │  │ (ops::*)     │  │ (unwind)   │  │ (black holes) │   │
//! │  └──────────────┘  └────────────┘  └───────────────┘   │
//! │                                                        │
//! │  ┌──────────────┐  ┌────────────┐  ┌───────────────┐   │
//! │  │ VmProfiler   │  │ EchoState  │  │ dyn Host      │   │
//! │  └──────────────┘  └────────────┘  └───────────────┘   │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! Dispatch is a byte-at-a-time decode loop over self-specializing
//! opcodes: type-observing instructions patch their own opcode byte
//! between a generic and a typed variant, which behaves like an inline
//! cache without side tables. The machine is strictly single-threaded.
//!
//! # Example
//!
//! ```
//! use ottava_bytecode::{BytecodeBuilder, Op};
//! use ottava_core::Value;
//! use ottava_vm::{Session, Vm};
//!
//! // function y = f(x); y = x * x + 1; endfunction
//! let mut b = BytecodeBuilder::new("f");
//! let y = b.add_return("y");
//! let x = b.add_arg("x");
//! b.emit_push_slot(x);
//! b.emit_push_slot(x);
//! b.op(Op::Mul);
//! b.emit_num(1.0);
//! b.op(Op::Add);
//! b.emit_assign(y);
//! b.op(Op::Ret);
//! let unit = b.finish();
//!
//! let mut session = Session::new();
//! let mut vm = Vm::new(&mut session);
//! let out = vm.execute(&unit, &[Value::Num(3.0)], 1).unwrap();
//! assert!(matches!(out[0], Value::Num(v) if v == 10.0));
//! ```

pub mod echo;
pub mod error;
pub mod frame;
pub mod host;
pub mod ignore;
pub mod profiler;
pub mod stack;
pub mod unwind;
pub mod vm;

mod ops;

pub use error::{VmError, VmResult};
pub use frame::MAX_VARARG_CALL_ARGS;
pub use host::{BreakpointAction, Host, Session};
pub use profiler::{FnStats, IpStats, VmProfiler};
pub use stack::{OperandStack, GUARD_PAD, STACK_MIN_FOR_NEW_CALL, STACK_SIZE};
pub use vm::Vm;
