//! Equation-oriented model: scalar variables and equality constraints.

use std::fmt;

use crate::expr::Expr;

/// Index of a variable in a [`Model`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VarId(pub(crate) usize);

/// Index of an equality constraint in a [`Model`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConId(pub(crate) usize);

impl VarId {
    /// Position of the variable in its owning model (or block).
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl ConId {
    /// Position of the constraint in its owning model (or block).
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for ConId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

#[derive(Clone, Debug)]
struct Variable {
    name: String,
    value: f64,
    fixed: bool,
}

#[derive(Clone, Debug)]
struct Constraint {
    name: String,
    body: Expr,
}

/// A flat collection of scalar variables and equality constraints.
///
/// Every constraint means `body == 0`. Variables carry a current value and a
/// fixed flag; fixed variables are treated as constants by derivative
/// evaluators built over the model.
#[derive(Clone, Debug, Default)]
pub struct Model {
    vars: Vec<Variable>,
    cons: Vec<Constraint>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a free variable with an initial value.
    pub fn add_var(&mut self, name: impl Into<String>, value: f64) -> VarId {
        let id = VarId(self.vars.len());
        self.vars.push(Variable {
            name: name.into(),
            value,
            fixed: false,
        });
        id
    }

    /// Add the constraint `body == 0`.
    pub fn add_constraint(&mut self, name: impl Into<String>, body: impl Into<Expr>) -> ConId {
        let id = ConId(self.cons.len());
        self.cons.push(Constraint {
            name: name.into(),
            body: body.into(),
        });
        id
    }

    /// Add the constraint `lhs == rhs`, stored as `lhs - rhs == 0`.
    pub fn add_equality(
        &mut self,
        name: impl Into<String>,
        lhs: impl Into<Expr>,
        rhs: impl Into<Expr>,
    ) -> ConId {
        let body = lhs.into() - rhs.into();
        self.add_constraint(name, body)
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.cons.len()
    }

    pub fn var_ids(&self) -> impl Iterator<Item = VarId> + '_ {
        (0..self.vars.len()).map(VarId)
    }

    pub fn constraint_ids(&self) -> impl Iterator<Item = ConId> + '_ {
        (0..self.cons.len()).map(ConId)
    }

    pub fn contains_var(&self, v: VarId) -> bool {
        v.0 < self.vars.len()
    }

    pub fn contains_constraint(&self, c: ConId) -> bool {
        c.0 < self.cons.len()
    }

    /// # Panics
    ///
    /// Panics if `v` does not belong to this model.
    pub fn var_name(&self, v: VarId) -> &str {
        &self.vars[v.0].name
    }

    /// # Panics
    ///
    /// Panics if `v` does not belong to this model.
    pub fn value(&self, v: VarId) -> f64 {
        self.vars[v.0].value
    }

    pub fn set_value(&mut self, v: VarId, value: f64) {
        self.vars[v.0].value = value;
    }

    /// Values of `vars`, index-aligned.
    pub fn values(&self, vars: &[VarId]) -> Vec<f64> {
        vars.iter().map(|&v| self.value(v)).collect()
    }

    /// Assign `values` to `vars` position by position.
    ///
    /// # Panics
    ///
    /// Panics if the two slices differ in length.
    pub fn set_values(&mut self, vars: &[VarId], values: &[f64]) {
        assert_eq!(
            vars.len(),
            values.len(),
            "vars length ({}) must equal values length ({})",
            vars.len(),
            values.len()
        );
        for (&v, &val) in vars.iter().zip(values) {
            self.set_value(v, val);
        }
    }

    pub fn is_fixed(&self, v: VarId) -> bool {
        self.vars[v.0].fixed
    }

    pub fn fix(&mut self, v: VarId) {
        self.vars[v.0].fixed = true;
    }

    pub fn unfix(&mut self, v: VarId) {
        self.vars[v.0].fixed = false;
    }

    /// # Panics
    ///
    /// Panics if `c` does not belong to this model.
    pub fn constraint_name(&self, c: ConId) -> &str {
        &self.cons[c.0].name
    }

    pub fn body(&self, c: ConId) -> &Expr {
        &self.cons[c.0].body
    }

    /// Variables that structurally appear in constraint `c`.
    pub fn constraint_variables(&self, c: ConId) -> Vec<VarId> {
        self.body(c).variables()
    }

    /// Residual `body(c)` at the current variable values.
    pub fn residual(&self, c: ConId) -> f64 {
        self.body(c).eval(&|v| self.value(v))
    }

    /// Residuals of `cons` at the current variable values, index-aligned.
    pub fn residuals(&self, cons: &[ConId]) -> Vec<f64> {
        cons.iter().map(|&c| self.residual(c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_stored_as_difference() {
        let mut m = Model::new();
        let x = m.add_var("x", 2.0);
        let y = m.add_var("y", 5.0);
        let c = m.add_equality("c", x * y, 4.0);
        assert!((m.residual(c) - 6.0).abs() < 1e-15);
        assert_eq!(m.constraint_variables(c), vec![x, y]);
        assert_eq!(m.constraint_name(c), "c");
    }

    #[test]
    fn set_values_is_positional() {
        let mut m = Model::new();
        let a = m.add_var("a", 0.0);
        let b = m.add_var("b", 0.0);
        m.set_values(&[b, a], &[1.0, 2.0]);
        assert_eq!(m.value(a), 2.0);
        assert_eq!(m.value(b), 1.0);
    }

    #[test]
    fn fix_and_unfix() {
        let mut m = Model::new();
        let a = m.add_var("a", 0.0);
        assert!(!m.is_fixed(a));
        m.fix(a);
        assert!(m.is_fixed(a));
        m.unfix(a);
        assert!(!m.is_fixed(a));
    }
}
