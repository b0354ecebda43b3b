use std::fmt::{Debug, Display};

use num_traits::{Float as NumFloat, FromPrimitive};

/// Primitive float a tape value, a model value or a dual component can be.
///
/// Tapes store `f64`; `f32` is accepted by the generic sweep code so that
/// [`Dual`](crate::Dual) and [`Scalar`](crate::Scalar) stay usable on their own.
pub trait Float: NumFloat + FromPrimitive + Default + Debug + Display + Send + Sync + 'static {}

impl Float for f32 {}
impl Float for f64 {}
