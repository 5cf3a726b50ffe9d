//! Cell arrays.
//!
//! Column-major like matrices, but holding arbitrary values. Brace
//! indexing yields the contents (a cs-list when several elements are
//! selected); paren indexing yields a sub-cell.

use crate::value::Value;

#[derive(Debug, Clone)]
pub struct CellArray {
    rows: usize,
    cols: usize,
    data: Vec<Value>,
}

impl CellArray {
    pub fn new(rows: usize, cols: usize) -> CellArray {
        CellArray {
            rows,
            cols,
            data: vec![Value::Undef; rows * cols],
        }
    }

    pub fn empty() -> CellArray {
        CellArray::new(0, 0)
    }

    /// 1×n row cell (varargin packing).
    pub fn row(values: Vec<Value>) -> CellArray {
        let cols = values.len();
        CellArray {
            rows: usize::from(cols > 0),
            cols,
            data: values,
        }
    }

    pub fn from_col_major(rows: usize, cols: usize, data: Vec<Value>) -> CellArray {
        assert_eq!(data.len(), rows * cols);
        CellArray { rows, cols, data }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn at(&self, i: usize) -> &Value {
        &self.data[i]
    }

    #[inline]
    pub fn elem(&self, r: usize, c: usize) -> &Value {
        &self.data[c * self.rows + r]
    }

    #[inline]
    pub fn set_elem(&mut self, r: usize, c: usize, v: Value) {
        self.data[c * self.rows + r] = v;
    }

    #[inline]
    pub fn set_linear(&mut self, i: usize, v: Value) {
        self.data[i] = v;
    }

    pub fn data(&self) -> &[Value] {
        &self.data
    }

    /// Column `c` as a fresh column cell (for-loop iteration).
    pub fn column_at(&self, c: usize) -> CellArray {
        let start = c * self.rows;
        let data = self.data[start..start + self.rows].to_vec();
        CellArray {
            rows: self.rows,
            cols: usize::from(self.rows > 0),
            data,
        }
    }

    /// Ensure (r, c) is addressable, padding with empty matrices.
    pub fn grow_to(&mut self, r: usize, c: usize) {
        if r < self.rows && c < self.cols {
            return;
        }
        let new_rows = self.rows.max(r + 1);
        let new_cols = self.cols.max(c + 1);
        let mut grown = CellArray::new(new_rows, new_cols);
        for slot in &mut grown.data {
            *slot = Value::empty_matrix();
        }
        for cc in 0..self.cols {
            for rr in 0..self.rows {
                grown.set_elem(rr, cc, self.elem(rr, cc).clone());
            }
        }
        *self = grown;
    }

    /// Ensure a 0-based linear index is addressable (vectors keep their
    /// orientation; empty cells become rows).
    pub fn grow_linear_to(&mut self, i: usize) -> bool {
        if i < self.numel() {
            return true;
        }
        if self.is_empty() {
            *self = CellArray::row(vec![Value::Undef; i + 1]);
            for slot in &mut self.data {
                *slot = Value::empty_matrix();
            }
            true
        } else if self.rows == 1 {
            self.grow_to(0, i);
            true
        } else if self.cols == 1 {
            self.grow_to(i, 0);
            true
        } else {
            false
        }
    }
}
