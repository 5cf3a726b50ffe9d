//! Runtime error carriers.
//!
//! `ExecError` is the heap-allocated execution-exception payload:
//! identifier, message, and the user-visible call stack the VM fills in as
//! it unwinds. `IndexError` wraps it with the extra bits an indexing
//! failure carries (offending dimension, out-of-range value, and the
//! object name the arg-name table supplies after the fact).

use std::fmt;

/// One frame of a user-visible error stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorStackFrame {
    pub name: String,
    pub line: u32,
    pub column: u32,
}

/// A runtime error: `error("Octave:some-id", "message")` and friends.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecError {
    pub identifier: String,
    pub message: String,
    pub stack: Vec<ErrorStackFrame>,
}

impl ExecError {
    pub fn new(identifier: &str, message: impl Into<String>) -> ExecError {
        ExecError {
            identifier: identifier.to_string(),
            message: message.into(),
            stack: Vec::new(),
        }
    }

    /// An error with a message but no identifier.
    pub fn msg(message: impl Into<String>) -> ExecError {
        ExecError::new("", message)
    }

    pub fn with_frame(mut self, frame: ErrorStackFrame) -> ExecError {
        self.stack.push(frame);
        self
    }

    // =========================================================================
    // The identifiers the reference interpreter uses, kept verbatim
    // =========================================================================

    pub fn undefined_function(name: &str) -> ExecError {
        ExecError::new(
            "Octave:undefined-function",
            format!("'{name}' undefined"),
        )
    }

    pub fn invalid_fun_call(message: impl Into<String>) -> ExecError {
        ExecError::new("Octave:invalid-fun-call", message)
    }

    pub fn too_many_inputs(name: &str) -> ExecError {
        ExecError::invalid_fun_call(format!("{name}: function called with too many inputs"))
    }

    pub fn too_many_outputs(name: &str) -> ExecError {
        ExecError::invalid_fun_call(format!("{name}: function called with too many outputs"))
    }

    pub fn stack_overflow() -> ExecError {
        ExecError::invalid_fun_call("VM is running out of stack space")
    }

    pub fn bad_alloc() -> ExecError {
        ExecError::new("Octave:bad-alloc", "out of memory or dimension too large")
    }

    pub fn nonconformant(op: &str, a: (usize, usize), b: (usize, usize)) -> ExecError {
        ExecError::new(
            "Octave:nonconformant-args",
            format!(
                "operator {op}: nonconformant arguments (op1 is {}x{}, op2 is {}x{})",
                a.0, a.1, b.0, b.1
            ),
        )
    }

    pub fn undefined_value() -> ExecError {
        ExecError::msg("value on right hand side of assignment is undefined")
    }

    pub fn undefined_operator(op: &str, a: &str, b: &str) -> ExecError {
        ExecError::msg(format!("binary operator '{op}' not implemented for '{a}' by '{b}' operations"))
    }

    pub fn undefined_unary_operator(op: &str, a: &str) -> ExecError {
        ExecError::msg(format!("unary operator '{op}' not implemented for '{a}' operations"))
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.identifier.is_empty() {
            write!(f, "error: {}", self.message)
        } else {
            write!(f, "error: {} [{}]", self.message, self.identifier)
        }
    }
}

impl std::error::Error for ExecError {}

/// An index-out-of-bounds or bad-subscript failure.
///
/// Constructed nameless; the VM consults the unit's arg-name table and
/// attaches the user-visible variable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexError {
    /// 1-based dimension the subscript failed in, 0 when not applicable.
    pub dim: usize,
    pub n_dims: usize,
    /// Rendering of the offending index (`"4"`, `"_,3"`, `"-1"`).
    pub index: String,
    /// Extent of the indexed object along `dim`.
    pub extent: usize,
    /// Variable name, attached late from the arg-name table.
    pub object_name: Option<String>,
    pub kind: IndexErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexErrorKind {
    OutOfBound,
    /// Non-integer or non-positive subscript.
    BadSubscript,
}

impl IndexError {
    pub fn out_of_bound(dim: usize, n_dims: usize, index: f64, extent: usize) -> IndexError {
        IndexError {
            dim,
            n_dims,
            index: fmt_index(index),
            extent,
            object_name: None,
            kind: IndexErrorKind::OutOfBound,
        }
    }

    pub fn bad_subscript(dim: usize, n_dims: usize, index: f64) -> IndexError {
        IndexError {
            dim,
            n_dims,
            index: fmt_index(index),
            extent: 0,
            object_name: None,
            kind: IndexErrorKind::BadSubscript,
        }
    }

    pub fn set_object_name(&mut self, name: &str) {
        if self.object_name.is_none() {
            self.object_name = Some(name.to_string());
        }
    }

    /// Render as the execution error the user sees.
    pub fn into_exec_error(self) -> ExecError {
        let who = match &self.object_name {
            Some(name) => format!("{name}"),
            None => "index".to_string(),
        };
        let message = match self.kind {
            IndexErrorKind::OutOfBound => format!(
                "{who}({}): out of bound; value {} out of bound {}",
                self.index, self.index, self.extent
            ),
            IndexErrorKind::BadSubscript => format!(
                "{who}({}): subscripts must be either integers 1 to (2^63)-1 or logicals",
                self.index
            ),
        };
        ExecError::new("Octave:index-out-of-bounds", message)
    }
}

/// Failure of a subscript operation: either a proper index exception
/// (which the VM may still decorate with an object name) or a plain
/// execution error.
#[derive(Debug, Clone, PartialEq)]
pub enum SubsError {
    Index(IndexError),
    Exec(ExecError),
}

impl SubsError {
    pub fn into_exec(self) -> ExecError {
        match self {
            SubsError::Index(e) => e.into_exec_error(),
            SubsError::Exec(e) => e,
        }
    }
}

impl From<ExecError> for SubsError {
    fn from(e: ExecError) -> SubsError {
        SubsError::Exec(e)
    }
}

impl From<IndexError> for SubsError {
    fn from(e: IndexError) -> SubsError {
        SubsError::Index(e)
    }
}

fn fmt_index(v: f64) -> String {
    if v == v.trunc() && v.is_finite() {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers_are_verbatim() {
        assert_eq!(
            ExecError::stack_overflow().identifier,
            "Octave:invalid-fun-call"
        );
        assert_eq!(
            ExecError::undefined_function("foo").identifier,
            "Octave:undefined-function"
        );
        assert_eq!(ExecError::bad_alloc().identifier, "Octave:bad-alloc");
    }

    #[test]
    fn test_nonconformant_message_shape() {
        let e = ExecError::nonconformant("+", (2, 3), (3, 2));
        assert_eq!(
            e.message,
            "operator +: nonconformant arguments (op1 is 2x3, op2 is 3x2)"
        );
    }

    #[test]
    fn test_index_error_attaches_name_once() {
        let mut e = IndexError::out_of_bound(1, 2, 4.0, 2);
        e.set_object_name("M");
        e.set_object_name("shadow");
        assert_eq!(e.object_name.as_deref(), Some("M"));
        let exec = e.into_exec_error();
        assert!(exec.message.starts_with("M(4)"), "{}", exec.message);
        assert_eq!(exec.identifier, "Octave:index-out-of-bounds");
    }
}
