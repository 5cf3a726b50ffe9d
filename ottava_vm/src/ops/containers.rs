//! Matrix and cell literals, and colon ranges.

use crate::error::{VmError, VmResult};
use crate::vm::Vm;
use ottava_bytecode::opcode::{
    CELL_APPEND_FINAL, CELL_APPEND_MID, CELL_APPEND_ONLY, CELL_APPEND_ROW_END,
};
use ottava_core::{CellArray, ExecError, Matrix, Range, Value};

impl<'h> Vm<'h> {
    // =========================================================================
    // Matrix literals
    // =========================================================================

    /// `Matrix rows, cols`: concatenate `rows × cols` operands pushed in
    /// row-major order.
    pub(crate) fn op_matrix(&mut self) -> VmResult<()> {
        let rows = self.fetch_u8() as usize;
        let cols = self.fetch_u8() as usize;
        let row_lens = vec![cols; rows];
        self.build_matrix_literal(&row_lens)
    }

    /// Jagged rows (explicit per-row lengths) or a big rectangular
    /// literal with 32-bit dimensions.
    pub(crate) fn op_matrix_uneven(&mut self) -> VmResult<()> {
        let kind = self.fetch_u8();
        if kind == 1 {
            let rows = self.fetch_u32() as usize;
            let cols = self.fetch_u32() as usize;
            let row_lens = vec![cols; rows];
            return self.build_matrix_literal(&row_lens);
        }
        let n_rows = self.fetch_u32() as usize;
        let mut row_lens = Vec::with_capacity(n_rows);
        for _ in 0..n_rows {
            row_lens.push(self.fetch_u32() as usize);
        }
        self.build_matrix_literal(&row_lens)
    }

    fn build_matrix_literal(&mut self, row_lens: &[usize]) -> VmResult<()> {
        let total: usize = row_lens.iter().sum();
        let raw = self.stack.pop_n(total);

        // Cs-lists splice into their row.
        let mut rows_of_values: Vec<Vec<Value>> = Vec::with_capacity(row_lens.len());
        let mut cursor = raw.into_iter();
        for len in row_lens {
            let mut row = Vec::with_capacity(*len);
            for _ in 0..*len {
                match cursor.next() {
                    Some(Value::CsList(list)) => row.extend(list.iter().cloned()),
                    Some(v) => row.push(v),
                    None => unreachable!("literal operand count mismatch"),
                }
            }
            rows_of_values.push(row);
        }

        // A single-row literal of strings concatenates as char data.
        let all_str = rows_of_values.len() == 1
            && !rows_of_values[0].is_empty()
            && rows_of_values[0].iter().all(|v| matches!(v, Value::Str(_)));
        if all_str {
            let mut out = String::new();
            for v in &rows_of_values[0] {
                if let Value::Str(s) = v {
                    out.push_str(s);
                }
            }
            self.stack.push(Value::str(&out));
            return Ok(());
        }

        let mut row_blocks = Vec::with_capacity(rows_of_values.len());
        for row in &rows_of_values {
            let blocks: Vec<Matrix> = row
                .iter()
                .map(|v| v.to_matrix().map_err(VmError::Exec))
                .collect::<VmResult<_>>()?;
            row_blocks.push(Matrix::horzcat(&blocks).map_err(VmError::Exec)?);
        }
        let out = Matrix::vertcat(&row_blocks).map_err(VmError::Exec)?;
        self.stack.push(Value::matrix(out));
        Ok(())
    }

    // =========================================================================
    // Cell literals
    // =========================================================================

    /// Reserve the cell and push the `(cell, col_counter, row_counter)`
    /// triple the append protocol works on.
    pub(crate) fn op_push_cell(&mut self, big: bool) -> VmResult<()> {
        let (rows, cols) = if big {
            (self.fetch_u32() as usize, self.fetch_u32() as usize)
        } else {
            (self.fetch_u8() as usize, self.fetch_u8() as usize)
        };
        self.stack.push(Value::cell(CellArray::new(rows, cols)));
        self.stack.push(Value::Int(0)); // col counter
        self.stack.push(Value::Int(0)); // row counter
        Ok(())
    }

    /// Append TOS into the cell under construction. Tags mark row
    /// boundaries and finalization; every non-empty row must end at the
    /// same width.
    pub(crate) fn op_append_cell(&mut self) -> VmResult<()> {
        let tag = self.fetch_u8();
        let value = self.stack.pop();
        let row = match self.stack.pop() {
            Value::Int(r) => r as usize,
            other => {
                return Err(VmError::Exec(ExecError::msg(format!(
                    "cell literal state corrupted: row counter was {other:?}"
                ))))
            }
        };
        let mut col = match self.stack.pop() {
            Value::Int(c) => c as usize,
            other => {
                return Err(VmError::Exec(ExecError::msg(format!(
                    "cell literal state corrupted: col counter was {other:?}"
                ))))
            }
        };

        let mut cell = match self.stack.pop() {
            Value::Cell(c) => c,
            other => {
                return Err(VmError::Exec(ExecError::msg(format!(
                    "cell literal state corrupted: base was {other:?}"
                ))))
            }
        };
        {
            let target = Value::make_unique_cell(&mut cell);
            for element in value.list_value() {
                // The first row may overflow the reserved width when a
                // cs-list splices in; later rows must conform.
                if col >= target.cols() {
                    if row == 0 {
                        target.grow_to(0, col);
                    } else {
                        return Err(VmError::Exec(ExecError::msg(format!(
                            "vertical dimensions mismatch ({}x{} vs 1x{})",
                            row,
                            target.cols(),
                            col + 1
                        ))));
                    }
                }
                if row >= target.rows() {
                    target.grow_to(row, col);
                }
                target.set_elem(row, col, element);
                col += 1;
            }
        }

        match tag {
            CELL_APPEND_MID => {
                self.stack.push(Value::Cell(cell));
                self.stack.push(Value::Int(col as i64));
                self.stack.push(Value::Int(row as i64));
            }
            CELL_APPEND_ROW_END => {
                let width = cell.cols();
                if col != width {
                    return Err(VmError::Exec(ExecError::msg(format!(
                        "vertical dimensions mismatch ({}x{} vs 1x{})",
                        row + 1,
                        width,
                        col
                    ))));
                }
                self.stack.push(Value::Cell(cell));
                self.stack.push(Value::Int(0));
                self.stack.push(Value::Int(row as i64 + 1));
            }
            CELL_APPEND_FINAL | CELL_APPEND_ONLY => {
                let width = cell.cols();
                if col != width {
                    // A lone row may come out narrower than reserved
                    // (an empty cs-list spliced in); shrink to fit.
                    if row == 0 && cell.rows() <= 1 && col < width {
                        let target = Value::make_unique_cell(&mut cell);
                        let data: Vec<Value> =
                            (0..col).map(|i| target.at(i).clone()).collect();
                        *target = CellArray::row(data);
                    } else {
                        return Err(VmError::Exec(ExecError::msg(format!(
                            "vertical dimensions mismatch ({}x{} vs 1x{})",
                            row + 1,
                            width,
                            col
                        ))));
                    }
                }
                self.stack.push(Value::Cell(cell));
            }
            other => {
                return Err(VmError::Exec(ExecError::msg(format!(
                    "invalid AppendCell tag {other}"
                ))))
            }
        }
        Ok(())
    }

    // =========================================================================
    // Colon ranges
    // =========================================================================

    /// `base:limit` / `base:inc:limit` from stack operands; the result
    /// stays a lazy range.
    pub(crate) fn op_colon(&mut self, with_increment: bool) -> VmResult<()> {
        let limit = self.stack.pop().as_double().map_err(VmError::Exec)?;
        let inc = if with_increment {
            self.stack.pop().as_double().map_err(VmError::Exec)?
        } else {
            1.0
        };
        let base = self.stack.pop().as_double().map_err(VmError::Exec)?;
        let range = Range::make(base, inc, limit).map_err(VmError::Exec)?;
        self.stack.push(Value::Range(range));
        Ok(())
    }
}
