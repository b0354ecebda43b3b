//! Equation blocks: a subset of a model's equations, optionally padded with
//! auxiliary variables and equations that live only in the block.

use crate::error::NlpError;
use crate::expr::Expr;
use crate::model::{ConId, Model, VarId};

#[derive(Clone, Debug)]
struct BlockConstraint {
    id: ConId,
    name: String,
    body: Expr,
}

#[derive(Clone, Debug)]
struct AuxVar {
    name: String,
    value: f64,
}

/// A view of selected equations of a [`Model`], over which an
/// [`Nlp`](crate::Nlp) can be compiled.
///
/// The block's variables are *structural*: exactly the variables that appear
/// in its equations. Variables fixed in the model are treated as constants
/// and are not primal variables of the block.
///
/// Auxiliary variables and equations get ids past the end of the model's id
/// ranges, so they never collide with model ids and never leak into the
/// model itself.
#[derive(Clone, Debug)]
pub struct Block<'m> {
    model: &'m Model,
    constraints: Vec<BlockConstraint>,
    aux_vars: Vec<AuxVar>,
}

impl<'m> Block<'m> {
    /// Block over the given model equations, in the given order.
    pub fn new(model: &'m Model, constraints: &[ConId]) -> Result<Self, NlpError> {
        let mut block = Block {
            model,
            constraints: Vec::with_capacity(constraints.len()),
            aux_vars: Vec::new(),
        };
        for &c in constraints {
            if !model.contains_constraint(c) {
                return Err(NlpError::UnknownConstraint(c));
            }
            block.constraints.push(BlockConstraint {
                id: c,
                name: model.constraint_name(c).to_owned(),
                body: model.body(c).clone(),
            });
        }
        Ok(block)
    }

    pub fn model(&self) -> &'m Model {
        self.model
    }

    /// Add a free variable that exists only in this block.
    pub fn add_aux_var(&mut self, name: impl Into<String>, value: f64) -> VarId {
        let id = VarId(self.model.num_vars() + self.aux_vars.len());
        self.aux_vars.push(AuxVar {
            name: name.into(),
            value,
        });
        id
    }

    /// Add the equation `body == 0` to this block only.
    ///
    /// `body` may reference model variables and this block's auxiliary
    /// variables.
    pub fn add_aux_equation(
        &mut self,
        name: impl Into<String>,
        body: impl Into<Expr>,
    ) -> Result<ConId, NlpError> {
        let body = body.into();
        if let Some(v) = body.variables().into_iter().find(|&v| !self.knows_var(v)) {
            return Err(NlpError::UnknownVariable(v));
        }
        let id = ConId(self.model.num_constraints() + self.num_aux_equations());
        self.constraints.push(BlockConstraint {
            id,
            name: name.into(),
            body,
        });
        Ok(id)
    }

    fn num_aux_equations(&self) -> usize {
        self.constraints
            .iter()
            .filter(|c| self.is_aux_constraint(c.id))
            .count()
    }

    fn is_aux_var(&self, v: VarId) -> bool {
        v.0 >= self.model.num_vars()
    }

    fn is_aux_constraint(&self, c: ConId) -> bool {
        c.0 >= self.model.num_constraints()
    }

    fn knows_var(&self, v: VarId) -> bool {
        v.0 < self.model.num_vars() + self.aux_vars.len()
    }

    /// Equations of the block, model equations first in construction order,
    /// then auxiliary equations in insertion order.
    pub fn constraints(&self) -> Vec<ConId> {
        self.constraints.iter().map(|c| c.id).collect()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// Every variable that appears in the block's equations, fixed or not,
    /// in first-appearance order.
    pub fn variables(&self) -> Vec<VarId> {
        let mut out: Vec<VarId> = Vec::new();
        for c in &self.constraints {
            for v in c.body.variables() {
                if !out.contains(&v) {
                    out.push(v);
                }
            }
        }
        out
    }

    /// The block's primal variables: [`variables`](Self::variables) minus
    /// the ones fixed in the model.
    pub fn primal_variables(&self) -> Vec<VarId> {
        self.variables()
            .into_iter()
            .filter(|&v| !self.is_fixed(v))
            .collect()
    }

    pub fn is_fixed(&self, v: VarId) -> bool {
        !self.is_aux_var(v) && self.model.is_fixed(v)
    }

    /// Current value of a model or auxiliary variable.
    ///
    /// # Panics
    ///
    /// Panics if `v` is neither.
    pub fn value(&self, v: VarId) -> f64 {
        if self.is_aux_var(v) {
            self.aux_vars[v.0 - self.model.num_vars()].value
        } else {
            self.model.value(v)
        }
    }

    pub fn var_name(&self, v: VarId) -> &str {
        if self.is_aux_var(v) {
            &self.aux_vars[v.0 - self.model.num_vars()].name
        } else {
            self.model.var_name(v)
        }
    }

    fn find(&self, c: ConId) -> Option<&BlockConstraint> {
        self.constraints.iter().find(|bc| bc.id == c)
    }

    pub fn constraint_name(&self, c: ConId) -> Option<&str> {
        self.find(c).map(|bc| bc.name.as_str())
    }

    pub fn body(&self, c: ConId) -> Option<&Expr> {
        self.find(c).map(|bc| &bc.body)
    }

    pub(crate) fn bodies(&self) -> impl Iterator<Item = &Expr> + '_ {
        self.constraints.iter().map(|c| &c.body)
    }
}
