//! The [`Scalar`] trait for writing AD-generic numeric code.
//!
//! The tape's forward and reverse sweeps are written once as
//! `fn sweep<T: Scalar>(..)` and run with plain `f64` for values and gradients,
//! and with `Dual<f64>` for forward-over-reverse Hessian columns.

use std::fmt::Debug;
use std::ops::{Add, Div, Mul, Neg, Sub};

use num_traits::{One, Zero};

use crate::dual::Dual;
use crate::float::Float;

/// The elementary operations a tape sweep needs from its number type.
pub trait Scalar:
    Copy
    + Debug
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
{
    /// The underlying primitive float type.
    type Float: Float;

    /// Lift a plain float to this scalar (constant, zero derivative).
    fn from_f(val: Self::Float) -> Self;

    /// True if every component (primal and tangents) is exactly zero.
    ///
    /// Reverse sweeps skip zero adjoints; for duals that is only safe when
    /// the tangent part is zero too.
    fn is_all_zero(&self) -> bool;

    #[inline]
    fn zero() -> Self {
        Self::from_f(<Self::Float as Zero>::zero())
    }

    #[inline]
    fn one() -> Self {
        Self::from_f(<Self::Float as One>::one())
    }

    fn powi(self, n: i32) -> Self;
    fn powf(self, n: Self) -> Self;
    fn sqrt(self) -> Self;
    fn exp(self) -> Self;
    fn ln(self) -> Self;
    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn tanh(self) -> Self;
}

macro_rules! impl_scalar_for_float {
    ($t:ty) => {
        impl Scalar for $t {
            type Float = $t;

            #[inline]
            fn from_f(val: $t) -> Self {
                val
            }

            #[inline]
            fn is_all_zero(&self) -> bool {
                *self == 0.0
            }

            #[inline]
            fn powi(self, n: i32) -> Self {
                <$t>::powi(self, n)
            }

            #[inline]
            fn powf(self, n: Self) -> Self {
                <$t>::powf(self, n)
            }

            #[inline]
            fn sqrt(self) -> Self {
                <$t>::sqrt(self)
            }

            #[inline]
            fn exp(self) -> Self {
                <$t>::exp(self)
            }

            #[inline]
            fn ln(self) -> Self {
                <$t>::ln(self)
            }

            #[inline]
            fn sin(self) -> Self {
                <$t>::sin(self)
            }

            #[inline]
            fn cos(self) -> Self {
                <$t>::cos(self)
            }

            #[inline]
            fn tanh(self) -> Self {
                <$t>::tanh(self)
            }
        }
    };
}

impl_scalar_for_float!(f32);
impl_scalar_for_float!(f64);

impl<F: Float> Scalar for Dual<F> {
    type Float = F;

    #[inline]
    fn from_f(val: F) -> Self {
        Dual::constant(val)
    }

    #[inline]
    fn is_all_zero(&self) -> bool {
        self.re == F::zero() && self.eps == F::zero()
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        Dual::powi(self, n)
    }

    #[inline]
    fn powf(self, n: Self) -> Self {
        Dual::powf(self, n)
    }

    #[inline]
    fn sqrt(self) -> Self {
        Dual::sqrt(self)
    }

    #[inline]
    fn exp(self) -> Self {
        Dual::exp(self)
    }

    #[inline]
    fn ln(self) -> Self {
        Dual::ln(self)
    }

    #[inline]
    fn sin(self) -> Self {
        Dual::sin(self)
    }

    #[inline]
    fn cos(self) -> Self {
        Dual::cos(self)
    }

    #[inline]
    fn tanh(self) -> Self {
        Dual::tanh(self)
    }
}
