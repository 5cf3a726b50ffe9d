//! Dense numeric matrices.
//!
//! Column-major `f64` storage, 1-based user indexing (callers resolve
//! subscripts to 0-based offsets through [`crate::subs`]). This is the
//! minimal kernel surface the VM needs: elementwise maps, matrix product,
//! transpose, concatenation for matrix literals, and growth on indexed
//! assignment. Anything fancier belongs to the host numerics, not here.

use crate::error::ExecError;

#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    /// Column-major: element (r, c) lives at `c * rows + r`.
    data: Vec<f64>,
}

impl Matrix {
    pub fn new(rows: usize, cols: usize) -> Matrix {
        Matrix::filled(rows, cols, 0.0)
    }

    pub fn filled(rows: usize, cols: usize, fill: f64) -> Matrix {
        Matrix {
            rows,
            cols,
            data: vec![fill; rows * cols],
        }
    }

    pub fn empty() -> Matrix {
        Matrix {
            rows: 0,
            cols: 0,
            data: Vec::new(),
        }
    }

    pub fn from_col_major(rows: usize, cols: usize, data: Vec<f64>) -> Matrix {
        assert_eq!(data.len(), rows * cols);
        Matrix { rows, cols, data }
    }

    /// 1×n row vector.
    pub fn row(values: Vec<f64>) -> Matrix {
        let cols = values.len();
        Matrix {
            rows: usize::from(cols > 0),
            cols,
            data: values,
        }
    }

    /// n×1 column vector.
    pub fn column(values: Vec<f64>) -> Matrix {
        let rows = values.len();
        Matrix {
            rows,
            cols: usize::from(rows > 0),
            data: values,
        }
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
    pub fn is_scalar(&self) -> bool {
        self.numel() == 1
    }

    #[inline]
    pub fn is_vector(&self) -> bool {
        self.rows == 1 || self.cols == 1
    }

    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// 0-based linear element (column-major order).
    #[inline]
    pub fn at(&self, i: usize) -> f64 {
        self.data[i]
    }

    /// 0-based (row, col) element.
    #[inline]
    pub fn elem(&self, r: usize, c: usize) -> f64 {
        self.data[c * self.rows + r]
    }

    #[inline]
    pub fn set_elem(&mut self, r: usize, c: usize, v: f64) {
        self.data[c * self.rows + r] = v;
    }

    /// Column `c` as a fresh column vector (for-loop iteration).
    pub fn column_at(&self, c: usize) -> Matrix {
        let start = c * self.rows;
        Matrix::column(self.data[start..start + self.rows].to_vec())
    }

    /// Truthiness: non-empty and every element nonzero.
    pub fn all_nonzero(&self) -> bool {
        !self.is_empty() && self.data.iter().all(|v| *v != 0.0)
    }

    // =========================================================================
    // Elementwise and matrix arithmetic
    // =========================================================================

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Matrix {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|v| f(*v)).collect(),
        }
    }

    /// Elementwise combine; dims must agree exactly (scalar broadcast is
    /// the caller's job).
    pub fn zip(
        &self,
        other: &Matrix,
        op_name: &str,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<Matrix, ExecError> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err(ExecError::nonconformant(
                op_name,
                (self.rows, self.cols),
                (other.rows, other.cols),
            ));
        }
        Ok(Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(a, b)| f(*a, *b))
                .collect(),
        })
    }

    pub fn transpose(&self) -> Matrix {
        let mut out = Matrix::new(self.cols, self.rows);
        for c in 0..self.cols {
            for r in 0..self.rows {
                out.set_elem(c, r, self.elem(r, c));
            }
        }
        out
    }

    pub fn matmul(&self, other: &Matrix) -> Result<Matrix, ExecError> {
        if self.cols != other.rows {
            return Err(ExecError::nonconformant(
                "*",
                (self.rows, self.cols),
                (other.rows, other.cols),
            ));
        }
        let mut out = Matrix::new(self.rows, other.cols);
        for c in 0..other.cols {
            for k in 0..self.cols {
                let b = other.elem(k, c);
                if b == 0.0 {
                    continue;
                }
                for r in 0..self.rows {
                    let v = out.elem(r, c) + self.elem(r, k) * b;
                    out.set_elem(r, c, v);
                }
            }
        }
        Ok(out)
    }

    // =========================================================================
    // Concatenation (matrix literals)
    // =========================================================================

    /// `[a, b, …]` within one literal row.
    pub fn horzcat(blocks: &[Matrix]) -> Result<Matrix, ExecError> {
        let nonempty: Vec<&Matrix> = blocks.iter().filter(|b| !b.is_empty()).collect();
        if nonempty.is_empty() {
            return Ok(Matrix::empty());
        }
        let rows = nonempty[0].rows;
        let mut data = Vec::new();
        let mut cols = 0;
        for block in &nonempty {
            if block.rows != rows {
                return Err(ExecError::msg(format!(
                    "horizontal dimensions mismatch ({}x{} vs {}x{})",
                    rows, cols, block.rows, block.cols
                )));
            }
            data.extend_from_slice(&block.data);
            cols += block.cols;
        }
        Ok(Matrix { rows, cols, data })
    }

    /// `[row1; row2; …]` across literal rows.
    pub fn vertcat(blocks: &[Matrix]) -> Result<Matrix, ExecError> {
        let nonempty: Vec<&Matrix> = blocks.iter().filter(|b| !b.is_empty()).collect();
        if nonempty.is_empty() {
            return Ok(Matrix::empty());
        }
        let cols = nonempty[0].cols;
        let mut rows = 0;
        for block in &nonempty {
            if block.cols != cols {
                return Err(ExecError::msg(format!(
                    "vertical dimensions mismatch ({}x{} vs {}x{})",
                    rows, cols, block.rows, block.cols
                )));
            }
            rows += block.rows;
        }
        let mut out = Matrix::new(rows, cols);
        let mut row_base = 0;
        for block in &nonempty {
            for c in 0..cols {
                for r in 0..block.rows {
                    out.set_elem(row_base + r, c, block.elem(r, c));
                }
            }
            row_base += block.rows;
        }
        Ok(out)
    }

    // =========================================================================
    // Growth on indexed assignment
    // =========================================================================

    /// Ensure the matrix covers 0-based (r, c), zero-filling new space.
    pub fn grow_to(&mut self, r: usize, c: usize) {
        if r < self.rows && c < self.cols {
            return;
        }
        let new_rows = self.rows.max(r + 1);
        let new_cols = self.cols.max(c + 1);
        let mut grown = Matrix::new(new_rows, new_cols);
        for cc in 0..self.cols {
            for rr in 0..self.rows {
                grown.set_elem(rr, cc, self.elem(rr, cc));
            }
        }
        *self = grown;
    }

    /// Ensure a 0-based linear index is addressable. Growing a vector
    /// keeps its orientation; growing an empty matrix makes a row.
    pub fn grow_linear_to(&mut self, i: usize) -> Result<(), ExecError> {
        if i < self.numel() {
            return Ok(());
        }
        if self.is_empty() {
            *self = Matrix::row(vec![0.0; i + 1]);
            Ok(())
        } else if self.rows == 1 {
            self.grow_to(0, i);
            Ok(())
        } else if self.cols == 1 {
            self.grow_to(i, 0);
            Ok(())
        } else {
            Err(ExecError::msg(
                "Octave:index out of bound; value exceeds matrix dimensions in linear assignment",
            ))
        }
    }

    #[inline]
    pub fn set_linear(&mut self, i: usize, v: f64) {
        self.data[i] = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_col_major_layout() {
        // [1 3; 2 4] stored as 1,2,3,4.
        let m = Matrix::from_col_major(2, 2, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(m.elem(0, 0), 1.0);
        assert_eq!(m.elem(1, 0), 2.0);
        assert_eq!(m.elem(0, 1), 3.0);
        assert_eq!(m.elem(1, 1), 4.0);
        assert_eq!(m.at(2), 3.0);
    }

    #[test]
    fn test_matmul() {
        let a = Matrix::from_col_major(2, 2, vec![1.0, 3.0, 2.0, 4.0]); // [1 2; 3 4]
        let b = Matrix::from_col_major(2, 1, vec![5.0, 6.0]); // [5; 6]
        let c = a.matmul(&b).unwrap();
        assert_eq!((c.rows(), c.cols()), (2, 1));
        assert_eq!(c.data(), &[17.0, 39.0]);
    }

    #[test]
    fn test_matmul_nonconformant() {
        let a = Matrix::new(2, 3);
        let b = Matrix::new(2, 3);
        let err = a.matmul(&b).unwrap_err();
        assert_eq!(err.identifier, "Octave:nonconformant-args");
    }

    #[test]
    fn test_zip_dim_check() {
        let a = Matrix::new(2, 2);
        let b = Matrix::new(2, 3);
        assert!(a.zip(&b, "+", |x, y| x + y).is_err());
    }

    #[test]
    fn test_vertcat_mismatch_message() {
        let a = Matrix::row(vec![1.0, 2.0]);
        let b = Matrix::row(vec![1.0, 2.0, 3.0]);
        let err = Matrix::vertcat(&[a, b]).unwrap_err();
        assert!(err.message.contains("vertical dimensions mismatch"));
    }

    #[test]
    fn test_growth_preserves_and_zero_fills() {
        let mut m = Matrix::from_col_major(2, 2, vec![1.0, 2.0, 3.0, 4.0]);
        m.grow_to(2, 3);
        assert_eq!((m.rows(), m.cols()), (3, 4));
        assert_eq!(m.elem(1, 1), 4.0);
        assert_eq!(m.elem(2, 3), 0.0);
    }

    #[test]
    fn test_linear_growth_keeps_orientation() {
        let mut row = Matrix::row(vec![1.0]);
        row.grow_linear_to(3).unwrap();
        assert_eq!((row.rows(), row.cols()), (1, 4));

        let mut col = Matrix::column(vec![1.0, 2.0]);
        col.grow_linear_to(4).unwrap();
        assert_eq!((col.rows(), col.cols()), (5, 1));

        let mut mat = Matrix::new(2, 2);
        assert!(mat.grow_linear_to(10).is_err());
    }

    #[test]
    fn test_column_extraction() {
        let m = Matrix::from_col_major(2, 2, vec![10.0, 30.0, 20.0, 40.0]);
        let c0 = m.column_at(0);
        assert_eq!((c0.rows(), c0.cols()), (2, 1));
        assert_eq!(c0.data(), &[10.0, 30.0]);
    }
}
