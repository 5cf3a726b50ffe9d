//! Ignored-output ("black hole") bookkeeping.
//!
//! `SetIgnoreOutputs` pushes one frame per call site with `~` sinks;
//! `ClearIgnoreOutputs` pops it and clears the sink slots. Frames carry
//! the call depth they were created at so the unwinder can discard the
//! ones belonging to abandoned frames, and so anonymous-function calls
//! can tell "my caller's frame" from unrelated leftovers.

use ottava_core::{Matrix, Value};

#[derive(Debug, Clone)]
pub struct IgnoreFrame {
    /// 1×n matrix of ignored output positions (1-based), the value user
    /// code sees through `isargout`-style introspection.
    pub ignored_matrix: Value,
    /// Lvalue list for the imminent call; `true` marks a black hole.
    pub lvalues: Vec<bool>,
    /// Call depth (number of saved caller contexts) at creation.
    pub depth: usize,
}

#[derive(Debug, Default)]
pub struct IgnoreStack {
    frames: Vec<IgnoreFrame>,
}

impl IgnoreStack {
    pub fn new() -> IgnoreStack {
        IgnoreStack::default()
    }

    pub fn push(&mut self, ignored: &[u8], n_total: usize, depth: usize) -> &IgnoreFrame {
        let mut lvalues = vec![false; n_total];
        for idx in ignored {
            let pos = *idx as usize;
            if pos >= 1 && pos <= n_total {
                lvalues[pos - 1] = true;
            }
        }
        let matrix = Value::matrix(Matrix::row(
            ignored.iter().map(|i| f64::from(*i)).collect(),
        ));
        self.frames.push(IgnoreFrame {
            ignored_matrix: matrix,
            lvalues,
            depth,
        });
        self.frames.last().unwrap()
    }

    pub fn pop(&mut self) -> Option<IgnoreFrame> {
        self.frames.pop()
    }

    pub fn top(&self) -> Option<&IgnoreFrame> {
        self.frames.last()
    }

    /// The frame governing a multi-assignment at `depth`, if any.
    pub fn active_at(&self, depth: usize) -> Option<&IgnoreFrame> {
        self.frames.last().filter(|f| f.depth == depth)
    }

    /// Unwinding dropped back to `depth`: discard frames of deeper calls.
    /// Returns how many were discarded so the host lvalue stack can be
    /// popped in lockstep.
    pub fn unwind_to(&mut self, depth: usize) -> usize {
        let before = self.frames.len();
        self.frames.retain(|f| f.depth <= depth);
        before - self.frames.len()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
