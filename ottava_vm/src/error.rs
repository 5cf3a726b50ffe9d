//! VM error kinds.
//!
//! Every opcode handler translates failures into one of these
//! discriminators before control reaches the unwinder; the unwinder then
//! decides which handler kinds may catch it and what reaches the host if
//! none does.

use ottava_core::{ExecError, IndexError, SubsError};

pub type VmResult<T> = Result<T, VmError>;

/// The error discriminator handed to the unwinder.
#[derive(Debug, Clone, PartialEq)]
pub enum VmError {
    /// Generic runtime error with its full carrier.
    Exec(ExecError),
    /// Index out of bounds / bad subscript; the arg-name table may still
    /// attach a variable name while unwinding.
    Index(IndexError),
    /// Identifier lookup produced neither a value nor a callable.
    UndefinedId { name: String },
    /// A condition expression evaluated to an undefined value.
    UndefinedCondition,
    /// Wrong number of elements on the RHS of a multi-assignment.
    InvalidNelRhs { expected: usize, got: usize },
    /// Undefined value on the RHS of an assignment.
    RhsUndefined,
    /// User interrupt; only unwind-protect handlers run.
    Interrupt,
    /// `exit`/`quit`; no handlers run, frames still clean up.
    Exit { status: i32, safe_to_return: bool },
    /// The debugger asked to leave the VM; bypasses every handler.
    DebugQuit { all: bool },
    /// Heap exhaustion.
    BadAlloc,
}

impl VmError {
    /// Can a `try`/`catch` range catch this?
    pub fn catchable_by_try(&self) -> bool {
        !matches!(
            self,
            VmError::Interrupt | VmError::DebugQuit { .. } | VmError::Exit { .. }
        )
    }

    /// Does any unwind handler run at all?
    pub fn runs_unwind_protect(&self) -> bool {
        !matches!(self, VmError::DebugQuit { .. } | VmError::Exit { .. })
    }

    /// The execution-exception view published to the error system and
    /// materialized as the catch `err` struct.
    pub fn to_exec_error(&self) -> ExecError {
        match self {
            VmError::Exec(e) => e.clone(),
            VmError::Index(e) => e.clone().into_exec_error(),
            VmError::UndefinedId { name } => ExecError::undefined_function(name),
            VmError::UndefinedCondition => {
                ExecError::msg("undefined value used in conditional expression")
            }
            VmError::InvalidNelRhs { expected, got } => ExecError::msg(format!(
                "invalid number of elements on RHS of assignment (expected {expected}, got {got})"
            )),
            VmError::RhsUndefined => ExecError::undefined_value(),
            VmError::Interrupt => ExecError::new("Octave:interrupt-exception", ""),
            VmError::Exit { status, .. } => {
                ExecError::msg(format!("exit with status {status}"))
            }
            VmError::DebugQuit { .. } => ExecError::msg("quit debug"),
            VmError::BadAlloc => ExecError::bad_alloc(),
        }
    }
}

impl From<ExecError> for VmError {
    fn from(e: ExecError) -> VmError {
        VmError::Exec(e)
    }
}

impl From<IndexError> for VmError {
    fn from(e: IndexError) -> VmError {
        VmError::Index(e)
    }
}

impl From<SubsError> for VmError {
    fn from(e: SubsError) -> VmError {
        match e {
            SubsError::Index(e) => VmError::Index(e),
            SubsError::Exec(e) => VmError::Exec(e),
        }
    }
}

impl std::fmt::Display for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_exec_error())
    }
}

impl std::error::Error for VmError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_eligibility() {
        assert!(VmError::Exec(ExecError::msg("x")).catchable_by_try());
        assert!(!VmError::Interrupt.catchable_by_try());
        assert!(VmError::Interrupt.runs_unwind_protect());
        assert!(!VmError::DebugQuit { all: false }.runs_unwind_protect());
        assert!(!VmError::Exit { status: 0, safe_to_return: true }.catchable_by_try());
    }

    #[test]
    fn test_exec_view_keeps_identifier() {
        let e = VmError::Exec(ExecError::new("Octave:bad", "boom"));
        assert_eq!(e.to_exec_error().identifier, "Octave:bad");
        let u = VmError::UndefinedId { name: "foo".into() };
        assert_eq!(u.to_exec_error().identifier, "Octave:undefined-function");
    }
}
