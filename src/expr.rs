//! Symbolic expressions over model variables.
//!
//! An [`Expr`] is a small tree of elementary operations whose leaves are
//! variables ([`VarId`]) and `f64` constants. Expressions are built with
//! ordinary operators:
//!
//! ```
//! use flowtape::{Expr, Model};
//!
//! let mut m = Model::new();
//! let x = m.add_var("x", 2.0);
//! let y = m.add_var("y", 3.0);
//! let body: Expr = x * y - 1.0;
//! assert_eq!(body.variables(), vec![x, y]);
//! ```
//!
//! Expressions carry structure only. Values and derivatives are computed by
//! compiling them into a [`Tape`](crate::Tape).

use std::ops::{Add, Div, Mul, Neg, Sub};

use crate::model::VarId;
use crate::opcode::{self, OpCode, UNUSED};

/// A symbolic scalar expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// A model variable.
    Var(VarId),
    /// A constant.
    Const(f64),
    /// A unary elementary operation.
    Unary(OpCode, Box<Expr>),
    /// A binary elementary operation.
    Binary(OpCode, Box<Expr>, Box<Expr>),
    /// An integer power.
    Powi(Box<Expr>, i32),
}

impl Expr {
    pub fn var(v: VarId) -> Self {
        Expr::Var(v)
    }

    pub fn constant(c: f64) -> Self {
        Expr::Const(c)
    }

    /// Sum of the given terms. An empty sum is the constant `0`.
    pub fn sum<I, T>(terms: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Expr>,
    {
        let mut iter = terms.into_iter();
        match iter.next() {
            None => Expr::Const(0.0),
            Some(first) => iter.fold(first.into(), |acc: Expr, t| acc + Into::<Expr>::into(t)),
        }
    }

    fn unary(op: OpCode, arg: Expr) -> Self {
        Expr::Unary(op, Box::new(arg))
    }

    fn binary(op: OpCode, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn powi(self, n: i32) -> Self {
        Expr::Powi(Box::new(self), n)
    }

    pub fn powf(self, n: impl Into<Expr>) -> Self {
        Expr::binary(OpCode::Powf, self, n.into())
    }

    pub fn sqrt(self) -> Self {
        Expr::unary(OpCode::Sqrt, self)
    }

    pub fn exp(self) -> Self {
        Expr::unary(OpCode::Exp, self)
    }

    pub fn ln(self) -> Self {
        Expr::unary(OpCode::Ln, self)
    }

    pub fn sin(self) -> Self {
        Expr::unary(OpCode::Sin, self)
    }

    pub fn cos(self) -> Self {
        Expr::unary(OpCode::Cos, self)
    }

    pub fn tanh(self) -> Self {
        Expr::unary(OpCode::Tanh, self)
    }

    /// Variables that appear in the expression, in first-appearance order,
    /// without duplicates.
    ///
    /// This is the *structural* variable set: a variable whose every
    /// occurrence cancels algebraically (`x - x`) is still reported.
    pub fn variables(&self) -> Vec<VarId> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut Vec<VarId>) {
        match self {
            Expr::Var(v) => {
                if !out.contains(v) {
                    out.push(*v);
                }
            }
            Expr::Const(_) => {}
            Expr::Unary(_, a) | Expr::Powi(a, _) => a.collect_variables(out),
            Expr::Binary(_, a, b) => {
                a.collect_variables(out);
                b.collect_variables(out);
            }
        }
    }

    /// Whether `v` appears in the expression.
    pub fn contains(&self, v: VarId) -> bool {
        match self {
            Expr::Var(w) => *w == v,
            Expr::Const(_) => false,
            Expr::Unary(_, a) | Expr::Powi(a, _) => a.contains(v),
            Expr::Binary(_, a, b) => a.contains(v) || b.contains(v),
        }
    }

    /// Evaluate directly on the tree, reading variable values from `value`.
    pub fn eval(&self, value: &impl Fn(VarId) -> f64) -> f64 {
        match self {
            Expr::Var(v) => value(*v),
            Expr::Const(c) => *c,
            Expr::Unary(op, a) => opcode::eval_forward(*op, a.eval(value), 0.0, UNUSED),
            Expr::Binary(op, a, b) => {
                opcode::eval_forward(*op, a.eval(value), b.eval(value), UNUSED)
            }
            Expr::Powi(a, n) => a.eval(value).powi(*n),
        }
    }
}

impl From<VarId> for Expr {
    fn from(v: VarId) -> Self {
        Expr::Var(v)
    }
}

impl From<f64> for Expr {
    fn from(c: f64) -> Self {
        Expr::Const(c)
    }
}

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::unary(OpCode::Neg, self)
    }
}

impl Neg for VarId {
    type Output = Expr;
    fn neg(self) -> Expr {
        -Expr::Var(self)
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<R: Into<Expr>> $trait<R> for Expr {
            type Output = Expr;
            fn $method(self, rhs: R) -> Expr {
                Expr::binary($op, self, rhs.into())
            }
        }

        impl<R: Into<Expr>> $trait<R> for VarId {
            type Output = Expr;
            fn $method(self, rhs: R) -> Expr {
                Expr::binary($op, Expr::Var(self), rhs.into())
            }
        }

        impl $trait<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, Expr::Const(self), rhs)
            }
        }

        impl $trait<VarId> for f64 {
            type Output = Expr;
            fn $method(self, rhs: VarId) -> Expr {
                Expr::binary($op, Expr::Const(self), Expr::Var(rhs))
            }
        }
    };
}

impl_binary_op!(Add, add, OpCode::Add);
impl_binary_op!(Sub, sub, OpCode::Sub);
impl_binary_op!(Mul, mul, OpCode::Mul);
impl_binary_op!(Div, div, OpCode::Div);
