//! Lazy numeric ranges (`base:limit`, `base:inc:limit`).
//!
//! Ranges iterate and index without materializing; they decay to matrices
//! when arithmetic or concatenation demands it.

use crate::error::ExecError;
use crate::matrix::Matrix;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub base: f64,
    pub inc: f64,
    len: usize,
}

impl Range {
    /// Build from the colon expression endpoints.
    pub fn make(base: f64, inc: f64, limit: f64) -> Result<Range, ExecError> {
        if !base.is_finite() || !inc.is_finite() || !limit.is_finite() {
            return Err(ExecError::msg("invalid use of non-finite value in range"));
        }
        let len = if inc == 0.0 {
            0
        } else {
            let span = (limit - base) / inc;
            if span < 0.0 {
                0
            } else {
                span.floor() as usize + 1
            }
        };
        Ok(Range { base, inc, len })
    }

    #[inline]
    pub fn numel(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 0-based element.
    #[inline]
    pub fn nth(&self, i: usize) -> f64 {
        self.base + self.inc * i as f64
    }

    pub fn last(&self) -> Option<f64> {
        if self.len == 0 {
            None
        } else {
            Some(self.nth(self.len - 1))
        }
    }

    pub fn to_matrix(&self) -> Matrix {
        Matrix::row((0..self.len).map(|i| self.nth(i)).collect())
    }
}
