//! Capability seam for host-defined object values.
//!
//! The VM never learns what a classdef object is; it talks to the `Object`
//! arm of [`crate::value::Value`] through this trait. Objects that define
//! their own `subsref`/`end` participate in the chained-indexing protocol
//! stepwise; plain ones can take a single bulk `subsref`.

use crate::error::ExecError;
use crate::value::Value;

pub trait ObjectCapability: std::fmt::Debug {
    fn class_name(&self) -> &str;

    /// Whether chained indexing must go one link at a time (objects with
    /// a metaclass, Java-style values). Defaults to bulk.
    fn needs_stepwise_subsref(&self) -> bool {
        false
    }

    /// One indexing step: `kind` is `b'('`, `b'{'` or `b'.'`.
    fn simple_subsref(
        &self,
        kind: u8,
        args: &[Value],
        nargout: usize,
    ) -> Result<Vec<Value>, ExecError>;

    /// Bulk chained subsref. The default composes
    /// [`ObjectCapability::simple_subsref`] steps, taking the first value
    /// between links.
    fn subsref_chain(
        &self,
        kinds: &[u8],
        idxs: &[Vec<Value>],
        nargout: usize,
    ) -> Result<Vec<Value>, ExecError> {
        let mut current: Option<Value> = None;
        let mut out = Vec::new();
        for (i, (kind, args)) in kinds.iter().zip(idxs.iter()).enumerate() {
            let last = i + 1 == kinds.len();
            let want = if last { nargout } else { 1 };
            out = match &current {
                None => self.simple_subsref(*kind, args, want)?,
                Some(value) => crate::subs::simple_subsref(value, *kind, args, want)
                    .map_err(crate::error::SubsError::into_exec)?,
            };
            if !last {
                current = Some(out.first().cloned().ok_or_else(|| {
                    ExecError::msg("indexing produced no value mid-chain")
                })?);
            }
        }
        Ok(out)
    }

    /// Indexed assignment through the whole chain rooted at this object.
    fn subsasgn(
        &self,
        kinds: &[u8],
        idxs: &[Vec<Value>],
        rhs: Value,
    ) -> Result<Value, ExecError>;

    /// `end` inside an index expression; `None` defers to numeric
    /// extents, `Some` plays the object's own `end` method.
    fn end_index(&self, _dim: usize, _n_dims: usize) -> Option<Result<f64, ExecError>> {
        None
    }

    /// Objects in callee position may be callable (operator overload).
    fn call(&self, _args: &[Value], _nargout: usize) -> Result<Vec<Value>, ExecError> {
        Err(ExecError::msg(format!(
            "'{}' object is not callable",
            self.class_name()
        )))
    }
}
