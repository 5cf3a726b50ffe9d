//! The polymorphic runtime value.
//!
//! A [`Value`] is a small tag plus `Rc` payloads for the heap kinds, so
//! clones are cheap and the VM's operand stack can move them freely. The
//! capability surface the VM dispatches through (`type_id`, cs-list
//! expansion, `make_unique`, truthiness, …) lives here; arithmetic is in
//! [`crate::ops`] and subscripting in [`crate::subs`].

use crate::cell::CellArray;
use crate::error::ExecError;
use crate::func::{FnCache, FnHandle, Function};
use crate::matrix::Matrix;
use crate::object::ObjectCapability;
use crate::range::Range;
use crate::strct::Struct;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Small integer tag used for fast-path specialization checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    Undef = 0,
    Num = 1,
    Bool = 2,
    Int = 3,
    Complex = 4,
    Str = 5,
    Range = 6,
    Matrix = 7,
    Cell = 8,
    Struct = 9,
    CsList = 10,
    Colon = 11,
    Ref = 12,
    Function = 13,
    FnCache = 14,
    Handle = 15,
    Object = 16,
    Chain = 17,
}

/// Where a reference value redirects reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    Global { name: Rc<str> },
    Persistent { fn_name: Rc<str>, offset: u16 },
}

/// State accumulated by the chained-subsref protocol
/// (`IndexStructCall` + `IndexStructSubcall`).
#[derive(Debug)]
pub struct ChainAccum {
    pub base: Value,
    pub kinds: Vec<u8>,
    pub idxs: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    /// An unset slot or stack hole.
    #[default]
    Undef,
    Num(f64),
    Bool(bool),
    /// VM-internal integer (loop counters, stack-depth markers). Never
    /// escapes to user code.
    Int(i64),
    Complex(f64, f64),
    Str(Rc<str>),
    Range(Range),
    Matrix(Rc<Matrix>),
    Cell(Rc<CellArray>),
    Struct(Rc<Struct>),
    CsList(Rc<Vec<Value>>),
    /// The magic colon index.
    Colon,
    Ref(Rc<RefTarget>),
    Function(Rc<Function>),
    FnCache(Rc<FnCache>),
    Handle(Rc<FnHandle>),
    Object(Rc<dyn ObjectCapability>),
    /// Chained-subsref accumulator; only ever lives on the operand stack.
    Chain(Rc<RefCell<ChainAccum>>),
}

impl Value {
    #[inline]
    pub fn type_id(&self) -> TypeId {
        match self {
            Value::Undef => TypeId::Undef,
            Value::Num(_) => TypeId::Num,
            Value::Bool(_) => TypeId::Bool,
            Value::Int(_) => TypeId::Int,
            Value::Complex(..) => TypeId::Complex,
            Value::Str(_) => TypeId::Str,
            Value::Range(_) => TypeId::Range,
            Value::Matrix(_) => TypeId::Matrix,
            Value::Cell(_) => TypeId::Cell,
            Value::Struct(_) => TypeId::Struct,
            Value::CsList(_) => TypeId::CsList,
            Value::Colon => TypeId::Colon,
            Value::Ref(_) => TypeId::Ref,
            Value::Function(_) => TypeId::Function,
            Value::FnCache(_) => TypeId::FnCache,
            Value::Handle(_) => TypeId::Handle,
            Value::Object(_) => TypeId::Object,
            Value::Chain(_) => TypeId::Chain,
        }
    }

    #[inline]
    pub fn is_defined(&self) -> bool {
        !matches!(self, Value::Undef)
    }

    #[inline]
    pub fn is_ref(&self) -> bool {
        matches!(self, Value::Ref(_))
    }

    #[inline]
    pub fn is_cs_list(&self) -> bool {
        matches!(self, Value::CsList(_))
    }

    #[inline]
    pub fn is_function(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Handle(_))
    }

    #[inline]
    pub fn has_function_cache(&self) -> bool {
        matches!(self, Value::FnCache(_))
    }

    /// Full (non-sparse) numeric matrix, the shape the `IndexId1Mat*`
    /// specializations require.
    #[inline]
    pub fn is_full_num_matrix(&self) -> bool {
        matches!(self, Value::Matrix(_))
    }

    pub fn empty_matrix() -> Value {
        Value::Matrix(Rc::new(Matrix::empty()))
    }

    pub fn matrix(m: Matrix) -> Value {
        Value::Matrix(Rc::new(m))
    }

    pub fn cell(c: CellArray) -> Value {
        Value::Cell(Rc::new(c))
    }

    pub fn strct(s: Struct) -> Value {
        Value::Struct(Rc::new(s))
    }

    pub fn str(s: &str) -> Value {
        Value::Str(s.into())
    }

    // =========================================================================
    // Cs-list handling
    // =========================================================================

    /// Expand into a sequence: cs-lists flatten one level, everything
    /// else is a singleton.
    pub fn list_value(self) -> Vec<Value> {
        match self {
            Value::CsList(list) => match Rc::try_unwrap(list) {
                Ok(v) => v,
                Err(shared) => (*shared).clone(),
            },
            v => vec![v],
        }
    }

    /// Number of values this expands to in an argument list.
    pub fn list_len(&self) -> usize {
        match self {
            Value::CsList(list) => list.len(),
            _ => 1,
        }
    }

    /// First element of a cs-list (assignment semantics); `None` when the
    /// list is empty.
    pub fn first_of_list(self) -> Option<Value> {
        match self {
            Value::CsList(list) => list.first().cloned(),
            v => Some(v),
        }
    }

    // =========================================================================
    // Storability / uniqueness
    // =========================================================================

    /// Resolve a value for storage into a slot: cs-lists collapse to
    /// their first element, internal markers must not leak.
    pub fn make_storable(self) -> Result<Value, ExecError> {
        match self {
            Value::Undef => Err(ExecError::undefined_value()),
            Value::CsList(list) => list
                .first()
                .cloned()
                .ok_or_else(|| ExecError::msg("invalid number of elements on RHS of assignment")),
            Value::Chain(_) | Value::Int(_) => {
                Err(ExecError::msg("internal value escaped to storage"))
            }
            v => Ok(v),
        }
    }

    /// Exclusive heap copies of the mutable kinds, for in-place
    /// mutation. Cheap when the `Rc` is already unique.
    pub fn make_unique_matrix(matrix: &mut Rc<Matrix>) -> &mut Matrix {
        Rc::make_mut(matrix)
    }

    pub fn make_unique_cell(cell: &mut Rc<CellArray>) -> &mut CellArray {
        Rc::make_mut(cell)
    }

    pub fn make_unique_struct(strct: &mut Rc<Struct>) -> &mut Struct {
        Rc::make_mut(strct)
    }

    // =========================================================================
    // Scalar views
    // =========================================================================

    /// Condition truthiness: all elements nonzero, empty is false,
    /// undefined is the caller's error.
    pub fn is_true(&self) -> Result<bool, ExecError> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Num(v) => Ok(*v != 0.0),
            Value::Int(v) => Ok(*v != 0),
            Value::Complex(re, im) => Ok(*re != 0.0 || *im != 0.0),
            Value::Matrix(m) => Ok(m.all_nonzero()),
            Value::Range(r) => Ok(!r.is_empty() && r.to_matrix().all_nonzero()),
            Value::Str(s) => Ok(!s.is_empty() && s.bytes().all(|b| b != 0)),
            Value::Undef => Err(ExecError::msg("undefined value used in conditional")),
            other => Err(ExecError::msg(format!(
                "wrong type '{}' used in conditional",
                other.type_name()
            ))),
        }
    }

    /// Numeric view of a scalar-shaped value.
    pub fn as_double(&self) -> Result<f64, ExecError> {
        match self {
            Value::Num(v) => Ok(*v),
            Value::Bool(b) => Ok(f64::from(*b)),
            Value::Int(v) => Ok(*v as f64),
            Value::Matrix(m) if m.is_scalar() => Ok(m.at(0)),
            Value::Range(r) if r.numel() == 1 => Ok(r.nth(0)),
            Value::Str(s) if s.len() == 1 => Ok(s.as_bytes()[0] as f64),
            _ => Err(ExecError::msg(format!(
                "wrong type argument '{}'; expected a scalar",
                self.type_name()
            ))),
        }
    }

    /// 1×1 check, what `BraindeadPrecondition` wants to know.
    pub fn is_scalar_shaped(&self) -> bool {
        match self {
            Value::Num(_) | Value::Bool(_) | Value::Int(_) | Value::Complex(..) => true,
            Value::Matrix(m) => m.is_scalar(),
            Value::Range(r) => r.numel() == 1,
            Value::Str(s) => s.len() == 1,
            _ => false,
        }
    }

    /// Element count as user code sees it.
    pub fn numel(&self) -> usize {
        match self {
            Value::Undef => 0,
            Value::Num(_) | Value::Bool(_) | Value::Int(_) | Value::Complex(..) => 1,
            Value::Str(s) => s.len(),
            Value::Range(r) => r.numel(),
            Value::Matrix(m) => m.numel(),
            Value::Cell(c) => c.numel(),
            Value::Struct(_) => 1,
            Value::CsList(list) => list.len(),
            _ => 1,
        }
    }

    /// (rows, cols) as user code sees it.
    pub fn dims(&self) -> (usize, usize) {
        match self {
            Value::Undef => (0, 0),
            Value::Num(_) | Value::Bool(_) | Value::Int(_) | Value::Complex(..)
            | Value::Struct(_) => (1, 1),
            Value::Str(s) => (usize::from(!s.is_empty()), s.len()),
            Value::Range(r) => (usize::from(!r.is_empty()), r.numel()),
            Value::Matrix(m) => (m.rows(), m.cols()),
            Value::Cell(c) => (c.rows(), c.cols()),
            _ => (1, 1),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undef => "undefined",
            Value::Num(_) => "double",
            Value::Bool(_) => "logical",
            Value::Int(_) => "int",
            Value::Complex(..) => "complex",
            Value::Str(_) => "char",
            Value::Range(_) => "range",
            Value::Matrix(_) => "matrix",
            Value::Cell(_) => "cell",
            Value::Struct(_) => "struct",
            Value::CsList(_) => "cs-list",
            Value::Colon => "magic-colon",
            Value::Ref(_) => "reference",
            Value::Function(_) => "function",
            Value::FnCache(_) => "function cache",
            Value::Handle(_) => "function handle",
            Value::Object(_) => "object",
            Value::Chain(_) => "chain",
        }
    }

    /// Numeric content as a matrix, for concatenation and elementwise
    /// kernels. Strings decay to their character codes.
    pub fn to_matrix(&self) -> Result<Matrix, ExecError> {
        match self {
            Value::Num(v) => Ok(Matrix::from_col_major(1, 1, vec![*v])),
            Value::Bool(b) => Ok(Matrix::from_col_major(1, 1, vec![f64::from(*b)])),
            Value::Int(v) => Ok(Matrix::from_col_major(1, 1, vec![*v as f64])),
            Value::Matrix(m) => Ok((**m).clone()),
            Value::Range(r) => Ok(r.to_matrix()),
            Value::Str(s) => Ok(Matrix::row(s.bytes().map(f64::from).collect())),
            Value::Undef => Err(ExecError::undefined_value()),
            other => Err(ExecError::msg(format!(
                "wrong type argument '{}'; expected numeric data",
                other.type_name()
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undef => write!(f, "<undefined>"),
            Value::Num(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{}", u8::from(*b)),
            Value::Int(v) => write!(f, "{v}"),
            Value::Complex(re, im) => {
                if *im < 0.0 {
                    write!(f, "{re} - {}i", -im)
                } else {
                    write!(f, "{re} + {im}i")
                }
            }
            Value::Str(s) => write!(f, "{s}"),
            Value::Range(r) => write!(f, "{}", Value::matrix(r.to_matrix())),
            Value::Matrix(m) => {
                if m.is_empty() {
                    return write!(f, "[](0x0)");
                }
                for r in 0..m.rows() {
                    if r > 0 {
                        writeln!(f)?;
                    }
                    for c in 0..m.cols() {
                        if c > 0 {
                            write!(f, "   ")?;
                        }
                        write!(f, "{}", m.elem(r, c))?;
                    }
                }
                Ok(())
            }
            Value::Cell(c) => write!(f, "{{{}x{} cell}}", c.rows(), c.cols()),
            Value::Struct(s) => {
                write!(f, "struct with fields:")?;
                for (name, _) in s.fields() {
                    write!(f, " {name}")?;
                }
                Ok(())
            }
            Value::CsList(list) => write!(f, "<cs-list of {}>", list.len()),
            Value::Colon => write!(f, ":"),
            Value::Ref(target) => match &**target {
                RefTarget::Global { name } => write!(f, "<global {name}>"),
                RefTarget::Persistent { fn_name, offset } => {
                    write!(f, "<persistent {fn_name}:{offset}>")
                }
            },
            Value::Function(fun) => write!(f, "<function {}>", fun.name),
            Value::FnCache(cache) => write!(f, "<fcn-cache {}>", cache.name),
            Value::Handle(h) => write!(f, "@{}", h.name),
            Value::Object(obj) => write!(f, "<{} object>", obj.class_name()),
            Value::Chain(_) => write!(f, "<subsref chain>"),
        }
    }
}
