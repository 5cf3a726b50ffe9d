//! Binary and unary operator dispatch.
//!
//! Keyed by `(op, lhs type-id, rhs type-id)` the way the VM wants it:
//! scalar doubles take the straight-line path, everything numeric decays
//! to the matrix kernels, and the unsupported combinations fail with the
//! operator-undefined message the user expects. The VM's `*Dbl` opcode
//! specializations call [`specialized_binop`] to fetch a direct function
//! pointer for their type pair.

use crate::error::ExecError;
use crate::matrix::Matrix;
use crate::value::{TypeId, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Ldiv,
    ElMul,
    ElDiv,
    ElPow,
    ElLdiv,
    ElAnd,
    ElOr,
    Le,
    LeEq,
    Gr,
    GrEq,
    Eq,
    Neq,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Pow => "^",
            BinOp::Ldiv => "\\",
            BinOp::ElMul => ".*",
            BinOp::ElDiv => "./",
            BinOp::ElPow => ".^",
            BinOp::ElLdiv => ".\\",
            BinOp::ElAnd => "&",
            BinOp::ElOr => "|",
            BinOp::Le => "<",
            BinOp::LeEq => "<=",
            BinOp::Gr => ">",
            BinOp::GrEq => ">=",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
        }
    }

    pub fn is_relational(self) -> bool {
        matches!(
            self,
            BinOp::Le | BinOp::LeEq | BinOp::Gr | BinOp::GrEq | BinOp::Eq | BinOp::Neq
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::ElAnd | BinOp::ElOr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Not,
    Uadd,
    Usub,
    Trans,
    Herm,
}

impl UnOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnOp::Not => "!",
            UnOp::Uadd => "+",
            UnOp::Usub => "-",
            UnOp::Trans => ".'",
            UnOp::Herm => "'",
        }
    }
}

/// Direct function pointer for a specialized type pair.
pub type BinFn = fn(&Value, &Value) -> Result<Value, ExecError>;

/// Fast-path lookup for the opcode specializations: today the only pairs
/// worth a dedicated pointer are double×double (and bool operands decay
/// to doubles before the VM asks).
pub fn specialized_binop(op: BinOp, lhs: TypeId, rhs: TypeId) -> Option<BinFn> {
    if lhs != TypeId::Num || rhs != TypeId::Num {
        return None;
    }
    Some(match op {
        BinOp::Add => |a, b| scalar(a, b, |x, y| x + y),
        BinOp::Sub => |a, b| scalar(a, b, |x, y| x - y),
        BinOp::Mul => |a, b| scalar(a, b, |x, y| x * y),
        BinOp::Div => |a, b| scalar(a, b, |x, y| x / y),
        BinOp::Ldiv => |a, b| scalar(a, b, |x, y| y / x),
        BinOp::Pow => |a, b| match (a, b) {
            (Value::Num(x), Value::Num(y)) => Ok(scalar_pow(*x, *y)),
            _ => unreachable!("specialized pow on non-doubles"),
        },
        BinOp::ElMul => |a, b| scalar(a, b, |x, y| x * y),
        BinOp::ElDiv => |a, b| scalar(a, b, |x, y| x / y),
        BinOp::ElLdiv => |a, b| scalar(a, b, |x, y| y / x),
        BinOp::ElPow => |a, b| match (a, b) {
            (Value::Num(x), Value::Num(y)) => Ok(scalar_pow(*x, *y)),
            _ => unreachable!("specialized pow on non-doubles"),
        },
        BinOp::ElAnd => |a, b| scalar_bool(a, b, |x, y| x != 0.0 && y != 0.0),
        BinOp::ElOr => |a, b| scalar_bool(a, b, |x, y| x != 0.0 || y != 0.0),
        BinOp::Le => |a, b| scalar_bool(a, b, |x, y| x < y),
        BinOp::LeEq => |a, b| scalar_bool(a, b, |x, y| x <= y),
        BinOp::Gr => |a, b| scalar_bool(a, b, |x, y| x > y),
        BinOp::GrEq => |a, b| scalar_bool(a, b, |x, y| x >= y),
        BinOp::Eq => |a, b| scalar_bool(a, b, |x, y| x == y),
        BinOp::Neq => |a, b| scalar_bool(a, b, |x, y| x != y),
    })
}

fn scalar(a: &Value, b: &Value, f: impl Fn(f64, f64) -> f64) -> Result<Value, ExecError> {
    match (a, b) {
        (Value::Num(x), Value::Num(y)) => Ok(Value::Num(f(*x, *y))),
        _ => unreachable!("specialized binop on non-doubles"),
    }
}

fn scalar_bool(a: &Value, b: &Value, f: impl Fn(f64, f64) -> bool) -> Result<Value, ExecError> {
    match (a, b) {
        (Value::Num(x), Value::Num(y)) => Ok(Value::Bool(f(*x, *y))),
        _ => unreachable!("specialized binop on non-doubles"),
    }
}

/// `x ^ y` with the negative-base escape into the complex plane.
pub fn scalar_pow(x: f64, y: f64) -> Value {
    if x < 0.0 && y != y.trunc() {
        let r = (-x).powf(y);
        let theta = std::f64::consts::PI * y;
        Value::Complex(r * theta.cos(), r * theta.sin())
    } else {
        Value::Num(x.powf(y))
    }
}

// =============================================================================
// Generic dispatch
// =============================================================================

/// Generic binary operation over any operand pair.
pub fn binop(op: BinOp, a: &Value, b: &Value) -> Result<Value, ExecError> {
    // Scalar doubles first; this is also what the specialized opcodes
    // degenerate to.
    if let (Value::Num(x), Value::Num(y)) = (a, b) {
        return scalar_binop(op, *x, *y);
    }

    // Complex scalars (and complex×real mixes).
    if matches!(a, Value::Complex(..)) || matches!(b, Value::Complex(..)) {
        if let (Some(ca), Some(cb)) = (as_complex(a), as_complex(b)) {
            return complex_binop(op, ca, cb);
        }
    }

    // Scalar-shaped values decay to doubles.
    if a.is_scalar_shaped() && b.is_scalar_shaped() {
        if let (Ok(x), Ok(y)) = (a.as_double(), b.as_double()) {
            return scalar_binop(op, x, y);
        }
    }

    // Everything numeric-shaped goes through the matrix kernels.
    let numeric = |v: &Value| {
        matches!(
            v.type_id(),
            TypeId::Num | TypeId::Bool | TypeId::Int | TypeId::Str | TypeId::Range | TypeId::Matrix
        )
    };
    if numeric(a) && numeric(b) {
        return matrix_binop(op, &a.to_matrix()?, &b.to_matrix()?);
    }

    Err(ExecError::undefined_operator(
        op.symbol(),
        a.type_name(),
        b.type_name(),
    ))
}

pub fn scalar_binop(op: BinOp, x: f64, y: f64) -> Result<Value, ExecError> {
    Ok(match op {
        BinOp::Add => Value::Num(x + y),
        BinOp::Sub => Value::Num(x - y),
        BinOp::Mul | BinOp::ElMul => Value::Num(x * y),
        BinOp::Div | BinOp::ElDiv => Value::Num(x / y),
        BinOp::Ldiv | BinOp::ElLdiv => Value::Num(y / x),
        BinOp::Pow | BinOp::ElPow => scalar_pow(x, y),
        BinOp::ElAnd => Value::Bool(x != 0.0 && y != 0.0),
        BinOp::ElOr => Value::Bool(x != 0.0 || y != 0.0),
        BinOp::Le => Value::Bool(x < y),
        BinOp::LeEq => Value::Bool(x <= y),
        BinOp::Gr => Value::Bool(x > y),
        BinOp::GrEq => Value::Bool(x >= y),
        BinOp::Eq => Value::Bool(x == y),
        BinOp::Neq => Value::Bool(x != y),
    })
}

fn as_complex(v: &Value) -> Option<(f64, f64)> {
    match v {
        Value::Complex(re, im) => Some((*re, *im)),
        _ => v.as_double().ok().map(|x| (x, 0.0)),
    }
}

fn complex_binop(op: BinOp, (ar, ai): (f64, f64), (br, bi): (f64, f64)) -> Result<Value, ExecError> {
    let normalize = |re: f64, im: f64| {
        if im == 0.0 {
            Value::Num(re)
        } else {
            Value::Complex(re, im)
        }
    };
    Ok(match op {
        BinOp::Add => normalize(ar + br, ai + bi),
        BinOp::Sub => normalize(ar - br, ai - bi),
        BinOp::Mul | BinOp::ElMul => normalize(ar * br - ai * bi, ar * bi + ai * br),
        BinOp::Div | BinOp::ElDiv => {
            let den = br * br + bi * bi;
            normalize((ar * br + ai * bi) / den, (ai * br - ar * bi) / den)
        }
        BinOp::Ldiv | BinOp::ElLdiv => return complex_binop(BinOp::Div, (br, bi), (ar, ai)),
        BinOp::Eq => Value::Bool(ar == br && ai == bi),
        BinOp::Neq => Value::Bool(ar != br || ai != bi),
        // Ordering compares real parts, like the reference.
        BinOp::Le => Value::Bool(ar < br),
        BinOp::LeEq => Value::Bool(ar <= br),
        BinOp::Gr => Value::Bool(ar > br),
        BinOp::GrEq => Value::Bool(ar >= br),
        _ => {
            return Err(ExecError::undefined_operator(
                op.symbol(),
                "complex",
                "complex",
            ))
        }
    })
}

fn matrix_binop(op: BinOp, a: &Matrix, b: &Matrix) -> Result<Value, ExecError> {
    // True matrix product and divisions get their own rules; everything
    // else is elementwise with scalar broadcast.
    match op {
        BinOp::Mul => {
            if a.is_scalar() || b.is_scalar() {
                return broadcast(op, a, b, |x, y| x * y);
            }
            return a.matmul(b).map(Value::matrix);
        }
        BinOp::Div => {
            if b.is_scalar() {
                return broadcast(op, a, b, |x, y| x / y);
            }
            return Err(ExecError::msg(
                "matrix right division requires the host numerics; not supported in the VM kernels",
            ));
        }
        BinOp::Ldiv => {
            if a.is_scalar() {
                return broadcast(op, a, b, |x, y| y / x);
            }
            return Err(ExecError::msg(
                "matrix left division requires the host numerics; not supported in the VM kernels",
            ));
        }
        BinOp::Pow => {
            if a.is_scalar() && b.is_scalar() {
                return Ok(scalar_pow(a.at(0), b.at(0)));
            }
            return Err(ExecError::msg(
                "matrix power requires the host numerics; not supported in the VM kernels",
            ));
        }
        _ => {}
    }

    let f: fn(f64, f64) -> f64 = match op {
        BinOp::Add => |x, y| x + y,
        BinOp::Sub => |x, y| x - y,
        BinOp::ElMul => |x, y| x * y,
        BinOp::ElDiv => |x, y| x / y,
        BinOp::ElLdiv => |x, y| y / x,
        BinOp::ElPow => |x, y| x.powf(y),
        BinOp::ElAnd => |x, y| f64::from(x != 0.0 && y != 0.0),
        BinOp::ElOr => |x, y| f64::from(x != 0.0 || y != 0.0),
        BinOp::Le => |x, y| f64::from(x < y),
        BinOp::LeEq => |x, y| f64::from(x <= y),
        BinOp::Gr => |x, y| f64::from(x > y),
        BinOp::GrEq => |x, y| f64::from(x >= y),
        BinOp::Eq => |x, y| f64::from(x == y),
        BinOp::Neq => |x, y| f64::from(x != y),
        BinOp::Mul | BinOp::Div | BinOp::Ldiv | BinOp::Pow => unreachable!(),
    };
    broadcast(op, a, b, f)
}

fn broadcast(
    op: BinOp,
    a: &Matrix,
    b: &Matrix,
    f: fn(f64, f64) -> f64,
) -> Result<Value, ExecError> {
    let out = if a.is_scalar() && !b.is_scalar() {
        let x = a.at(0);
        b.map(|y| f(x, y))
    } else if b.is_scalar() && !a.is_scalar() {
        let y = b.at(0);
        a.map(|x| f(x, y))
    } else {
        a.zip(b, op.symbol(), f)?
    };
    Ok(Value::matrix(out))
}

/// Generic unary operation.
pub fn unop(op: UnOp, a: &Value) -> Result<Value, ExecError> {
    match (op, a) {
        (UnOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnOp::Not, Value::Num(v)) => Ok(Value::Bool(*v == 0.0)),
        (UnOp::Uadd, Value::Num(v)) => Ok(Value::Num(*v)),
        (UnOp::Usub, Value::Num(v)) => Ok(Value::Num(-v)),
        (UnOp::Usub, Value::Bool(b)) => Ok(Value::Num(-f64::from(*b))),
        (UnOp::Usub, Value::Complex(re, im)) => Ok(Value::Complex(-re, -im)),
        (UnOp::Uadd, Value::Complex(re, im)) => Ok(Value::Complex(*re, *im)),
        (UnOp::Trans, Value::Complex(re, im)) => Ok(Value::Complex(*re, *im)),
        (UnOp::Herm, Value::Complex(re, im)) => Ok(Value::Complex(*re, -im)),
        (UnOp::Trans | UnOp::Herm, Value::Num(v)) => Ok(Value::Num(*v)),
        (UnOp::Trans | UnOp::Herm, Value::Bool(b)) => Ok(Value::Bool(*b)),
        (_, Value::Undef) => Err(ExecError::undefined_value()),
        (op, v) => {
            // Everything numeric-shaped goes through the matrix kernels.
            let m = v.to_matrix().map_err(|_| {
                ExecError::undefined_unary_operator(op.symbol(), v.type_name())
            })?;
            Ok(match op {
                UnOp::Not => Value::matrix(m.map(|x| f64::from(x == 0.0))),
                UnOp::Uadd => Value::matrix(m),
                UnOp::Usub => Value::matrix(m.map(|x| -x)),
                UnOp::Trans | UnOp::Herm => Value::matrix(m.transpose()),
            })
        }
    }
}
