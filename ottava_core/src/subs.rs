//! Subscript operations over values.
//!
//! `simple_subsref` is one indexing step (`(`, `{` or `.`); `subsref`
//! drives a whole chain; `subsasgn` is the write side with the language's
//! auto-vivification and growth rules. Subscripts are 1-based; resolution
//! to 0-based offsets happens here and nowhere else.

use crate::cell::CellArray;
use crate::error::{ExecError, IndexError, SubsError};
use crate::matrix::Matrix;
use crate::strct::Struct;
use crate::value::Value;
use ottava_bytecode::opcode::{INDEX_BRACE, INDEX_DOT, INDEX_PAREN};
use smallvec::SmallVec;
use std::rc::Rc;

/// A subscript resolved against one dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedIdx {
    /// Single 0-based offset.
    Scalar(usize),
    /// 0-based offsets in subscript order.
    List(Vec<usize>),
    /// The whole dimension.
    Colon,
}

impl ResolvedIdx {
    pub fn len(&self, extent: usize) -> usize {
        match self {
            ResolvedIdx::Scalar(_) => 1,
            ResolvedIdx::List(v) => v.len(),
            ResolvedIdx::Colon => extent,
        }
    }

    pub fn offsets(&self, extent: usize) -> Vec<usize> {
        match self {
            ResolvedIdx::Scalar(i) => vec![*i],
            ResolvedIdx::List(v) => v.clone(),
            ResolvedIdx::Colon => (0..extent).collect(),
        }
    }
}

/// Convert one subscript value to 0-based offsets, checking integerness
/// and positivity but not the upper bound (assignment grows; reads check
/// the bound at the use site).
pub fn resolve_subscript(
    arg: &Value,
    dim: usize,
    n_dims: usize,
) -> Result<ResolvedIdx, SubsError> {
    match arg {
        Value::Colon => Ok(ResolvedIdx::Colon),
        Value::Bool(b) => {
            // Logical scalar: true selects the first element.
            if *b {
                Ok(ResolvedIdx::Scalar(0))
            } else {
                Ok(ResolvedIdx::List(Vec::new()))
            }
        }
        Value::Num(v) => Ok(ResolvedIdx::Scalar(one_based(*v, dim, n_dims)?)),
        Value::Int(v) => Ok(ResolvedIdx::Scalar(one_based(*v as f64, dim, n_dims)?)),
        Value::Range(r) => {
            let mut out = Vec::with_capacity(r.numel());
            for i in 0..r.numel() {
                out.push(one_based(r.nth(i), dim, n_dims)?);
            }
            Ok(ResolvedIdx::List(out))
        }
        Value::Matrix(m) => {
            if m.is_scalar() {
                return Ok(ResolvedIdx::Scalar(one_based(m.at(0), dim, n_dims)?));
            }
            let mut out = Vec::with_capacity(m.numel());
            for i in 0..m.numel() {
                out.push(one_based(m.at(i), dim, n_dims)?);
            }
            Ok(ResolvedIdx::List(out))
        }
        other => Err(SubsError::Exec(ExecError::msg(format!(
            "subscript indices must be numeric; got '{}'",
            other.type_name()
        )))),
    }
}

fn one_based(v: f64, dim: usize, n_dims: usize) -> Result<usize, SubsError> {
    if v < 1.0 || v != v.trunc() || !v.is_finite() {
        return Err(SubsError::Index(IndexError::bad_subscript(dim, n_dims, v)));
    }
    Ok(v as usize - 1)
}

fn check_bound(
    idx: &ResolvedIdx,
    extent: usize,
    dim: usize,
    n_dims: usize,
) -> Result<(), SubsError> {
    let over = match idx {
        ResolvedIdx::Scalar(i) => (*i >= extent).then_some(*i),
        ResolvedIdx::List(v) => v.iter().copied().find(|i| *i >= extent),
        ResolvedIdx::Colon => None,
    };
    if let Some(i) = over {
        return Err(SubsError::Index(IndexError::out_of_bound(
            dim,
            n_dims,
            (i + 1) as f64,
            extent,
        )));
    }
    Ok(())
}

// =============================================================================
// Read side
// =============================================================================

/// One indexing step. Returns the produced value list: one element for
/// `(`/`.` on scalar data, possibly many for `{}` selections. The
/// demanded `nargout` is advisory (callers pack the results); brace
/// selections always return everything selected so cs-list expansion
/// sees the full sequence.
pub fn simple_subsref(
    base: &Value,
    kind: u8,
    args: &[Value],
    _nargout: usize,
) -> Result<Vec<Value>, SubsError> {
    match kind {
        INDEX_PAREN => paren_subsref(base, args).map(|v| vec![v]),
        INDEX_BRACE => brace_subsref(base, args),
        INDEX_DOT => dot_subsref(base, args).map(|v| vec![v]),
        _ => Err(SubsError::Exec(ExecError::msg(format!(
            "invalid index kind byte {kind:#x}"
        )))),
    }
}

fn paren_subsref(base: &Value, args: &[Value]) -> Result<Value, SubsError> {
    match base {
        Value::Matrix(m) => matrix_paren(m, args),
        Value::Range(r) => matrix_paren(&Rc::new(r.to_matrix()), args),
        Value::Str(s) => {
            let codes = Matrix::row(s.bytes().map(f64::from).collect());
            let picked = matrix_paren(&Rc::new(codes), args)?;
            // Char data stays char through indexing.
            match picked {
                Value::Num(code) => Ok(Value::Str(
                    String::from_utf8_lossy(&[code as u8]).into_owned().into(),
                )),
                Value::Matrix(m) => {
                    let bytes: Vec<u8> = m.data().iter().map(|c| *c as u8).collect();
                    Ok(Value::Str(String::from_utf8_lossy(&bytes).into_owned().into()))
                }
                other => Ok(other),
            }
        }
        Value::Cell(c) => cell_paren(c, args),
        Value::Struct(_) => {
            // s(1) on a scalar struct is the struct itself.
            if args.is_empty() {
                return Ok(base.clone());
            }
            let idx = resolve_subscript(&args[0], 1, args.len())?;
            check_bound(&idx, 1, 1, args.len())?;
            Ok(base.clone())
        }
        Value::Object(obj) => obj
            .simple_subsref(INDEX_PAREN, args, 1)
            .map_err(SubsError::Exec)?
            .into_iter()
            .next()
            .ok_or_else(|| SubsError::Exec(ExecError::msg("object subsref produced no value"))),
        Value::Num(_) | Value::Bool(_) | Value::Complex(..) => {
            // Scalars index like 1×1 matrices.
            let m = Rc::new(base.to_matrix().map_err(SubsError::Exec)?);
            matrix_paren(&m, args).map(|v| match (base, v) {
                (Value::Complex(re, im), Value::Num(_)) => Value::Complex(*re, *im),
                (_, v) => v,
            })
        }
        Value::Undef => Err(SubsError::Exec(ExecError::undefined_value())),
        other => Err(SubsError::Exec(ExecError::msg(format!(
            "'{}' cannot be indexed with ()",
            other.type_name()
        )))),
    }
}

fn matrix_paren(m: &Rc<Matrix>, args: &[Value]) -> Result<Value, SubsError> {
    match args.len() {
        0 => Ok(Value::Matrix(m.clone())),
        1 => {
            let idx = resolve_subscript(&args[0], 1, 1)?;
            check_bound(&idx, m.numel(), 1, 1)?;
            match idx {
                ResolvedIdx::Scalar(i) => Ok(Value::Num(m.at(i))),
                ResolvedIdx::List(list) => Ok(Value::matrix(Matrix::row(
                    list.into_iter().map(|i| m.at(i)).collect(),
                ))),
                // A(:) is a column.
                ResolvedIdx::Colon => Ok(Value::matrix(Matrix::column(m.data().to_vec()))),
            }
        }
        2 => {
            let ri = resolve_subscript(&args[0], 1, 2)?;
            let ci = resolve_subscript(&args[1], 2, 2)?;
            check_bound(&ri, m.rows(), 1, 2)?;
            check_bound(&ci, m.cols(), 2, 2)?;
            if let (ResolvedIdx::Scalar(r), ResolvedIdx::Scalar(c)) = (&ri, &ci) {
                return Ok(Value::Num(m.elem(*r, *c)));
            }
            let rows = ri.offsets(m.rows());
            let cols = ci.offsets(m.cols());
            let mut out = Matrix::new(rows.len(), cols.len());
            for (oc, c) in cols.iter().enumerate() {
                for (or, r) in rows.iter().enumerate() {
                    out.set_elem(or, oc, m.elem(*r, *c));
                }
            }
            Ok(Value::matrix(out))
        }
        n => Err(SubsError::Exec(ExecError::msg(format!(
            "matrix indexing supports 1 or 2 subscripts; got {n}"
        )))),
    }
}

fn cell_paren(c: &Rc<CellArray>, args: &[Value]) -> Result<Value, SubsError> {
    let picked = cell_select(c, args)?;
    let (rows, cols, data) = picked;
    Ok(Value::cell(CellArray::from_col_major(rows, cols, data)))
}

fn brace_subsref(base: &Value, args: &[Value]) -> Result<Vec<Value>, SubsError> {
    match base {
        Value::Cell(c) => {
            let (_, _, data) = cell_select(c, args)?;
            Ok(data)
        }
        Value::Object(obj) => obj
            .simple_subsref(INDEX_BRACE, args, 1)
            .map_err(SubsError::Exec),
        Value::Undef => Err(SubsError::Exec(ExecError::undefined_value())),
        other => Err(SubsError::Exec(ExecError::msg(format!(
            "'{{' undefined for '{}' values",
            other.type_name()
        )))),
    }
}

/// Shared element selection for `c(...)` and `c{...}`.
fn cell_select(
    c: &Rc<CellArray>,
    args: &[Value],
) -> Result<(usize, usize, Vec<Value>), SubsError> {
    match args.len() {
        0 => Ok((c.rows(), c.cols(), c.data().to_vec())),
        1 => {
            let idx = resolve_subscript(&args[0], 1, 1)?;
            check_bound(&idx, c.numel(), 1, 1)?;
            let offs = idx.offsets(c.numel());
            let data: Vec<Value> = offs.iter().map(|i| c.at(*i).clone()).collect();
            let n = data.len();
            Ok((usize::from(n > 0), n, data))
        }
        2 => {
            let ri = resolve_subscript(&args[0], 1, 2)?;
            let ci = resolve_subscript(&args[1], 2, 2)?;
            check_bound(&ri, c.rows(), 1, 2)?;
            check_bound(&ci, c.cols(), 2, 2)?;
            let rows = ri.offsets(c.rows());
            let cols = ci.offsets(c.cols());
            let mut data = Vec::with_capacity(rows.len() * cols.len());
            for cc in &cols {
                for rr in &rows {
                    data.push(c.elem(*rr, *cc).clone());
                }
            }
            Ok((rows.len(), cols.len(), data))
        }
        n => Err(SubsError::Exec(ExecError::msg(format!(
            "cell indexing supports 1 or 2 subscripts; got {n}"
        )))),
    }
}

fn dot_subsref(base: &Value, args: &[Value]) -> Result<Value, SubsError> {
    let field = match args.first() {
        Some(Value::Str(s)) => s.clone(),
        Some(other) => {
            return Err(SubsError::Exec(ExecError::msg(format!(
                "dynamic field name must be a string, not '{}'",
                other.type_name()
            ))))
        }
        None => return Err(SubsError::Exec(ExecError::msg("missing field name"))),
    };
    match base {
        Value::Struct(s) => s.get(&field).cloned().ok_or_else(|| {
            SubsError::Exec(ExecError::msg("invalid use of undefined value"))
        }),
        Value::Object(obj) => obj
            .simple_subsref(INDEX_DOT, args, 1)
            .map_err(SubsError::Exec)?
            .into_iter()
            .next()
            .ok_or_else(|| SubsError::Exec(ExecError::msg("object subsref produced no value"))),
        Value::Undef => Err(SubsError::Exec(ExecError::undefined_value())),
        other => Err(SubsError::Exec(ExecError::msg(format!(
            "invalid use of a '{}' value: . undefined",
            other.type_name()
        )))),
    }
}

/// Bulk chained subsref: objects get one shot at the whole chain,
/// everything else walks link by link taking the first value in between.
pub fn subsref(
    base: &Value,
    kinds: &[u8],
    idxs: &[Vec<Value>],
    nargout: usize,
) -> Result<Vec<Value>, SubsError> {
    debug_assert_eq!(kinds.len(), idxs.len());
    if let Value::Object(obj) = base {
        return obj
            .subsref_chain(kinds, idxs, nargout)
            .map_err(SubsError::Exec);
    }
    let mut current = base.clone();
    let mut out: Vec<Value> = Vec::new();
    for (i, (kind, args)) in kinds.iter().zip(idxs.iter()).enumerate() {
        let last = i + 1 == kinds.len();
        let want = if last { nargout.max(1) } else { 1 };
        out = simple_subsref(&current, *kind, args, want)?;
        if !last {
            current = out
                .first()
                .cloned()
                .ok_or_else(|| SubsError::Exec(ExecError::msg("indexing produced no value")))?;
        }
    }
    Ok(out)
}

// =============================================================================
// Write side
// =============================================================================

/// Default value a missing base auto-vivifies to under an index kind.
fn vivify(kind: u8) -> Value {
    match kind {
        INDEX_BRACE => Value::cell(CellArray::empty()),
        INDEX_DOT => Value::strct(Struct::new()),
        _ => Value::empty_matrix(),
    }
}

/// Indexed assignment through a chain of links.
pub fn subsasgn(
    base: Value,
    kinds: &[u8],
    idxs: &[Vec<Value>],
    rhs: Value,
) -> Result<Value, SubsError> {
    debug_assert_eq!(kinds.len(), idxs.len());
    assert!(!kinds.is_empty(), "empty subsasgn chain");

    if let Value::Object(obj) = &base {
        return obj.subsasgn(kinds, idxs, rhs).map_err(SubsError::Exec);
    }

    let base = if base.is_defined() {
        base
    } else {
        vivify(kinds[0])
    };

    let kind = kinds[0];
    let args = &idxs[0];
    if kinds.len() == 1 {
        return apply_subsasgn(base, kind, args, rhs);
    }

    // Fetch the existing sub-value (tolerating absence), rewrite it,
    // store it back.
    let sub = fetch_for_update(&base, kind, args)?;
    let rewritten = subsasgn(sub, &kinds[1..], &idxs[1..], rhs)?;
    apply_subsasgn(base, kind, args, rewritten)
}

/// Read one link for read-modify-write; missing struct fields and
/// brand-new cells read as undefined rather than erroring.
fn fetch_for_update(base: &Value, kind: u8, args: &[Value]) -> Result<Value, SubsError> {
    match (base, kind) {
        (Value::Struct(s), INDEX_DOT) => {
            let field = match args.first() {
                Some(Value::Str(name)) => name,
                _ => return Err(SubsError::Exec(ExecError::msg("missing field name"))),
            };
            Ok(s.get(field).cloned().unwrap_or(Value::Undef))
        }
        (Value::Cell(c), INDEX_BRACE) => {
            match cell_select(c, args) {
                Ok((_, _, mut data)) if data.len() == 1 => Ok(data.pop().unwrap()),
                Ok(_) => Err(SubsError::Exec(ExecError::msg(
                    "a cs-list cannot be further indexed",
                ))),
                // Out of today's bounds: the write below will grow it.
                Err(SubsError::Index(_)) => Ok(Value::Undef),
                Err(e) => Err(e),
            }
        }
        _ => match simple_subsref(base, kind, args, 1) {
            Ok(mut vals) if vals.len() == 1 => Ok(vals.pop().unwrap()),
            Ok(_) => Err(SubsError::Exec(ExecError::msg(
                "a cs-list cannot be further indexed",
            ))),
            Err(SubsError::Index(_)) => Ok(Value::Undef),
            Err(e) => Err(e),
        },
    }
}

/// One-link assignment with growth.
pub fn apply_subsasgn(
    base: Value,
    kind: u8,
    args: &[Value],
    rhs: Value,
) -> Result<Value, SubsError> {
    let rhs = rhs.make_storable().map_err(SubsError::Exec)?;
    match kind {
        INDEX_PAREN => paren_subsasgn(base, args, rhs),
        INDEX_BRACE => brace_subsasgn(base, args, rhs),
        INDEX_DOT => dot_subsasgn(base, args, rhs),
        _ => Err(SubsError::Exec(ExecError::msg(format!(
            "invalid index kind byte {kind:#x}"
        )))),
    }
}

fn paren_subsasgn(base: Value, args: &[Value], rhs: Value) -> Result<Value, SubsError> {
    // Writing through () on a cell keeps the cell class.
    if let Value::Cell(cell) = &base {
        if let Value::Cell(rhs_cell) = &rhs {
            let mut cell = cell.clone();
            let target = Value::make_unique_cell(&mut cell);
            match args.len() {
                1 => {
                    let idx = resolve_subscript(&args[0], 1, 1)?;
                    let offs = idx.offsets(target.numel().max(rhs_cell.numel()));
                    if offs.len() != rhs_cell.numel() {
                        return Err(SubsError::Exec(ExecError::msg(
                            "=: nonconformant arguments in cell assignment",
                        )));
                    }
                    for (k, i) in offs.iter().enumerate() {
                        if !target.grow_linear_to(*i) {
                            return Err(SubsError::Index(IndexError::out_of_bound(
                                1,
                                1,
                                (*i + 1) as f64,
                                target.numel(),
                            )));
                        }
                        target.set_linear(*i, rhs_cell.at(k).clone());
                    }
                    return Ok(Value::Cell(cell));
                }
                _ => {
                    return Err(SubsError::Exec(ExecError::msg(
                        "cell () assignment supports a single subscript here",
                    )))
                }
            }
        }
    }

    let mut matrix = match &base {
        Value::Matrix(m) => m.clone(),
        _ => Rc::new(base.to_matrix().map_err(SubsError::Exec)?),
    };
    let target = Value::make_unique_matrix(&mut matrix);

    // RHS views: scalar writes broadcast, matrix writes must conform.
    let rhs_m = rhs.to_matrix().map_err(|_| {
        SubsError::Exec(ExecError::msg(format!(
            "invalid RHS of class '{}' in matrix assignment",
            rhs.type_name()
        )))
    })?;

    match args.len() {
        1 => {
            let idx = resolve_subscript(&args[0], 1, 1)?;
            let offs = match &idx {
                ResolvedIdx::Colon => (0..target.numel()).collect(),
                other => other.offsets(target.numel()),
            };
            if rhs_m.is_scalar() {
                let v = rhs_m.at(0);
                for i in offs {
                    target
                        .grow_linear_to(i)
                        .map_err(SubsError::Exec)?;
                    target.set_linear(i, v);
                }
            } else {
                if offs.len() != rhs_m.numel() {
                    return Err(SubsError::Exec(ExecError::msg(format!(
                        "=: nonconformant arguments (op1 is 1x{}, op2 is {}x{})",
                        offs.len(),
                        rhs_m.rows(),
                        rhs_m.cols()
                    ))));
                }
                for (k, i) in offs.into_iter().enumerate() {
                    target
                        .grow_linear_to(i)
                        .map_err(SubsError::Exec)?;
                    target.set_linear(i, rhs_m.at(k));
                }
            }
        }
        2 => {
            let ri = resolve_subscript(&args[0], 1, 2)?;
            let ci = resolve_subscript(&args[1], 2, 2)?;
            let rows = match &ri {
                ResolvedIdx::Colon => (0..target.rows()).collect(),
                other => other.offsets(target.rows()),
            };
            let cols = match &ci {
                ResolvedIdx::Colon => (0..target.cols()).collect(),
                other => other.offsets(target.cols()),
            };
            let max_r = rows.iter().copied().max();
            let max_c = cols.iter().copied().max();
            if let (Some(r), Some(c)) = (max_r, max_c) {
                target.grow_to(r, c);
            }
            if rhs_m.is_scalar() {
                let v = rhs_m.at(0);
                for c in &cols {
                    for r in &rows {
                        target.set_elem(*r, *c, v);
                    }
                }
            } else {
                if rows.len() != rhs_m.rows() || cols.len() != rhs_m.cols() {
                    return Err(SubsError::Exec(ExecError::msg(format!(
                        "=: nonconformant arguments (op1 is {}x{}, op2 is {}x{})",
                        rows.len(),
                        cols.len(),
                        rhs_m.rows(),
                        rhs_m.cols()
                    ))));
                }
                for (oc, c) in cols.iter().enumerate() {
                    for (or, r) in rows.iter().enumerate() {
                        target.set_elem(*r, *c, rhs_m.elem(or, oc));
                    }
                }
            }
        }
        n => {
            return Err(SubsError::Exec(ExecError::msg(format!(
                "matrix assignment supports 1 or 2 subscripts; got {n}"
            ))))
        }
    }
    Ok(Value::Matrix(matrix))
}

fn brace_subsasgn(base: Value, args: &[Value], rhs: Value) -> Result<Value, SubsError> {
    let mut cell = match base {
        Value::Cell(c) => c,
        Value::Undef => Rc::new(CellArray::empty()),
        Value::Matrix(m) if m.is_empty() => Rc::new(CellArray::empty()),
        other => {
            return Err(SubsError::Exec(ExecError::msg(format!(
                "matrix cannot be indexed with {{; base is '{}'",
                other.type_name()
            ))))
        }
    };
    let target = Value::make_unique_cell(&mut cell);
    match args.len() {
        1 => {
            let idx = resolve_subscript(&args[0], 1, 1)?;
            let i = match idx {
                ResolvedIdx::Scalar(i) => i,
                _ => {
                    return Err(SubsError::Exec(ExecError::msg(
                        "{} assignment needs a single element target",
                    )))
                }
            };
            if !target.grow_linear_to(i) {
                return Err(SubsError::Index(IndexError::out_of_bound(
                    1,
                    1,
                    (i + 1) as f64,
                    target.numel(),
                )));
            }
            target.set_linear(i, rhs);
        }
        2 => {
            let ri = resolve_subscript(&args[0], 1, 2)?;
            let ci = resolve_subscript(&args[1], 2, 2)?;
            match (ri, ci) {
                (ResolvedIdx::Scalar(r), ResolvedIdx::Scalar(c)) => {
                    target.grow_to(r, c);
                    target.set_elem(r, c, rhs);
                }
                _ => {
                    return Err(SubsError::Exec(ExecError::msg(
                        "{} assignment needs a single element target",
                    )))
                }
            }
        }
        n => {
            return Err(SubsError::Exec(ExecError::msg(format!(
                "cell assignment supports 1 or 2 subscripts; got {n}"
            ))))
        }
    }
    Ok(Value::Cell(cell))
}

fn dot_subsasgn(base: Value, args: &[Value], rhs: Value) -> Result<Value, SubsError> {
    let field = match args.first() {
        Some(Value::Str(s)) => s.clone(),
        Some(other) => {
            return Err(SubsError::Exec(ExecError::msg(format!(
                "dynamic field name must be a string, not '{}'",
                other.type_name()
            ))))
        }
        None => return Err(SubsError::Exec(ExecError::msg("missing field name"))),
    };
    let mut strct = match base {
        Value::Struct(s) => s,
        Value::Undef => Rc::new(Struct::new()),
        Value::Matrix(m) if m.is_empty() => Rc::new(Struct::new()),
        other => {
            // The reference requires a scalar struct target here.
            if other.numel() != 1 {
                return Err(SubsError::Exec(ExecError::msg(
                    "invalid use of a N-d array in struct assignment",
                )));
            }
            return Err(SubsError::Exec(ExecError::msg(format!(
                "invalid use of a '{}' value: . assignment undefined",
                other.type_name()
            ))));
        }
    };
    Value::make_unique_struct(&mut strct).set(&field, rhs);
    Ok(Value::Struct(strct))
}

// =============================================================================
// `end` resolution
// =============================================================================

/// Built-in `end` value for `v` in subscript position `dim` (1-based) of
/// an index with `n_dims` subscripts.
pub fn end_value(v: &Value, dim: usize, n_dims: usize) -> Result<f64, SubsError> {
    if let Value::Object(obj) = v {
        if let Some(res) = obj.end_index(dim, n_dims) {
            return res.map_err(SubsError::Exec);
        }
    }
    let (rows, cols) = v.dims();
    let out = if n_dims == 1 {
        v.numel()
    } else {
        match dim {
            1 => rows,
            2 => cols,
            _ => 1,
        }
    };
    Ok(out as f64)
}

/// Collect arguments popped for a call/index, expanding cs-lists.
pub fn expand_args(raw: impl IntoIterator<Item = Value>) -> SmallVec<[Value; 8]> {
    let mut out = SmallVec::new();
    for v in raw {
        match v {
            Value::CsList(list) => out.extend(list.iter().cloned()),
            v => out.push(v),
        }
    }
    out
}
