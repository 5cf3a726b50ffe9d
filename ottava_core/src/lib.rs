//! Runtime values for the Ottava VM.
//!
//! This crate is the value capability layer: the polymorphic [`Value`],
//! the concrete bodies behind its heap arms (matrices, cells, structs,
//! ranges), operator dispatch, subscripting, and the callable kinds. The
//! VM consumes values exclusively through this surface; the host
//! interpreter's richer type system plugs into the [`ObjectCapability`]
//! seam.
//!
//! Values are `Rc`-shared with copy-on-write (`make_unique_*`) before
//! in-place mutation, which is what gives indexed assignment its
//! no-aliasing guarantee.

pub mod cell;
pub mod error;
pub mod func;
pub mod matrix;
pub mod object;
pub mod ops;
pub mod range;
pub mod strct;
pub mod subs;
pub mod value;

pub use cell::CellArray;
pub use error::{ErrorStackFrame, ExecError, IndexError, IndexErrorKind, SubsError};
pub use func::{dispatch_kind, BuiltinFn, DispatchKind, FnCache, FnHandle, Function, FunctionKind, HandleKind};
pub use matrix::Matrix;
pub use object::ObjectCapability;
pub use ops::{binop, scalar_binop, scalar_pow, specialized_binop, unop, BinFn, BinOp, UnOp};
pub use range::Range;
pub use strct::Struct;
pub use subs::{
    apply_subsasgn, end_value, expand_args, resolve_subscript, simple_subsref, subsasgn, subsref,
    ResolvedIdx,
};
pub use value::{ChainAccum, RefTarget, TypeId, Value};
