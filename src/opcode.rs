//! Instruction set of an equation tape.
//!
//! One opcode per elementary operation an [`Expr`](crate::Expr) can contain.
//! [`eval_forward`] computes an instruction's value, [`reverse_partials`] its
//! local partials.

use num_traits::FromPrimitive;

use crate::scalar::Scalar;

/// Second-slot marker for instructions with one operand.
pub const UNUSED: u32 = u32::MAX;

/// Elementary operation codes.
///
/// Binary ops use both `arg_indices` slots; unary ops use slot 0 only
/// (slot 1 = [`UNUSED`], except for [`OpCode::Powi`] which stores the `i32`
/// exponent reinterpreted as `u32` in slot 1).
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OpCode {
    // ── Structural ──
    /// Input variable (leaf node).
    Input,
    /// Scalar constant.
    Const,

    // ── Binary arithmetic ──
    Add,
    Sub,
    Mul,
    Div,
    Powf,

    // ── Unary ──
    Neg,
    Sqrt,
    /// Integer power. Exponent stored in `arg_indices[1]` as `exp as u32`.
    Powi,
    Exp,
    Ln,
    Sin,
    Cos,
    Tanh,
}

impl OpCode {
    /// Whether the op reads its second argument slot as a tape index.
    #[inline]
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Powf
        )
    }
}

/// Evaluate a single opcode in the forward direction.
///
/// Generic over `T: Scalar` so the same code runs on `f64` and `Dual<f64>`.
/// For unary ops `b` is ignored; `arg1` is the raw second slot and only
/// matters for [`OpCode::Powi`].
#[inline]
pub fn eval_forward<T: Scalar>(op: OpCode, a: T, b: T, arg1: u32) -> T {
    match op {
        OpCode::Input | OpCode::Const => {
            unreachable!("Input/Const should not be re-evaluated via eval_forward")
        }

        OpCode::Add => a + b,
        OpCode::Sub => a - b,
        OpCode::Mul => a * b,
        OpCode::Div => a / b,
        OpCode::Powf => a.powf(b),

        OpCode::Neg => -a,
        OpCode::Sqrt => a.sqrt(),
        OpCode::Powi => a.powi(powi_exp_decode(arg1)),
        OpCode::Exp => a.exp(),
        OpCode::Ln => a.ln(),
        OpCode::Sin => a.sin(),
        OpCode::Cos => a.cos(),
        OpCode::Tanh => a.tanh(),
    }
}

/// Compute reverse-mode partial derivatives for a single opcode.
///
/// Returns `(∂result/∂arg0, ∂result/∂arg1)`; for unary ops the second partial
/// is zero. `r` is the result value. Called with `Dual<f64>` operands the
/// partials carry their own tangents, which is what makes forward-over-reverse
/// produce exact second derivatives.
#[inline]
pub fn reverse_partials<T: Scalar>(op: OpCode, a: T, b: T, r: T, arg1: u32) -> (T, T) {
    let zero = T::zero();
    let one = T::one();
    match op {
        OpCode::Input | OpCode::Const => (zero, zero),

        OpCode::Add => (one, one),
        OpCode::Sub => (one, -one),
        OpCode::Mul => (b, a),
        OpCode::Div => {
            let inv = one / b;
            (inv, -a * inv * inv)
        }
        OpCode::Powf => {
            // d/da a^b = b * a^(b-1)
            // d/db a^b = a^b * ln(a)
            let da = b * a.powf(b - one);
            let db = if r.is_all_zero() { zero } else { r * a.ln() };
            (da, db)
        }

        OpCode::Neg => (-one, zero),
        OpCode::Sqrt => {
            let two = one + one;
            (one / (two * r), zero)
        }
        OpCode::Powi => {
            let exp = powi_exp_decode(arg1);
            if exp == 0 {
                return (zero, zero);
            }
            let n = <T::Float as FromPrimitive>::from_i32(exp).map_or(zero, T::from_f);
            (n * a.powi(exp - 1), zero)
        }
        OpCode::Exp => (r, zero),
        OpCode::Ln => (one / a, zero),
        OpCode::Sin => (a.cos(), zero),
        OpCode::Cos => (-a.sin(), zero),
        OpCode::Tanh => (one - r * r, zero),
    }
}

/// Decode a `powi` exponent stored in `arg_indices[1]`.
#[inline]
pub fn powi_exp_decode(bits: u32) -> i32 {
    bits as i32
}

/// Encode a `powi` exponent as a value that can be stored in `arg_indices[1]`.
#[inline]
pub fn powi_exp_encode(exp: i32) -> u32 {
    exp as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn powi_round_trips_negative_exponents() {
        for exp in [-3, -1, 0, 1, 2, 7] {
            assert_eq!(powi_exp_decode(powi_exp_encode(exp)), exp);
        }
    }

    #[test]
    fn powi_partial_matches_closed_form() {
        let arg1 = powi_exp_encode(-2);
        let a = 2.0_f64;
        let r = eval_forward(OpCode::Powi, a, 0.0, arg1);
        let (da, _) = reverse_partials(OpCode::Powi, a, 0.0, r, arg1);
        assert!((r - 0.25).abs() < 1e-15);
        assert!((da + 0.25).abs() < 1e-15);
    }

    #[test]
    fn div_partials() {
        let (da, db) = reverse_partials(OpCode::Div, 3.0_f64, 2.0, 1.5, UNUSED);
        assert!((da - 0.5).abs() < 1e-15);
        assert!((db + 0.75).abs() < 1e-15);
    }
}
