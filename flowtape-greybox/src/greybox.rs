//! The grey-box façade: a nested equation system seen from outside as a
//! vector function of its inputs alone.

use flowtape::{ConId, Model, Nlp, VarId};
use tracing::{debug, warn};

use crate::error::GreyBoxError;
use crate::hessian::CurvatureBlocks;
use crate::implicit::ImplicitSensitivity;
use crate::resolver::{Partition, StateResolver};
use crate::solver::EquationSolver;

/// Residual norm of `g` above which derivatives are flagged as suspect.
#[cfg(debug_assertions)]
const ROOT_WARN_TOL: f64 = 1e-6;

/// Interface an outer optimizer drives a grey-box model through.
///
/// The model exposes equality constraints `F(x) = 0` over its inputs `x`.
/// Every evaluation refers to the state established by the last successful
/// [`set_input_values`](Self::set_input_values).
pub trait GreyBoxModel {
    fn n_inputs(&self) -> usize;
    fn n_equality_constraints(&self) -> usize;
    fn input_names(&self) -> Vec<String>;
    fn equality_constraint_names(&self) -> Vec<String>;

    /// Move the inputs and re-establish a consistent state.
    fn set_input_values(&mut self, values: &[f64]) -> Result<(), GreyBoxError>;

    /// `F(x)`, length [`n_equality_constraints`](Self::n_equality_constraints).
    fn evaluate_equality_constraints(&self) -> Result<Vec<f64>, GreyBoxError>;

    /// `dF/dx`, dense `n_f × n_x`.
    fn evaluate_jacobian_equality_constraints(&mut self) -> Result<Vec<Vec<f64>>, GreyBoxError>;

    /// `d²F_m/dx²` for every `m`: `n_f` dense `n_x × n_x` matrices.
    fn evaluate_hessian_equality_constraints(
        &mut self,
    ) -> Result<Vec<Vec<Vec<f64>>>, GreyBoxError>;

    /// Multiplier-weighted Hessians are not offered by grey-box models.
    fn set_equality_constraint_multipliers(&mut self, _values: &[f64]) -> Result<(), GreyBoxError> {
        Err(GreyBoxError::NotSupported("set_equality_constraint_multipliers"))
    }
}

#[derive(Debug)]
struct ResolvedState {
    nlp: Nlp,
    // Built on the first derivative request at this state.
    sensitivity: Option<ImplicitSensitivity>,
}

/// A grey-box model built from equations of a [`Model`].
///
/// Given inputs `x`, externals `y`, residual equations `f(x, y) = 0` and
/// external equations `g(x, y) = 0` with `|g| == |y|`, the constraints seen
/// from outside are `F(x) = f(x, y(x))`, where `y(x)` solves `g`.
///
/// # Example
///
/// ```
/// use flowtape::Model;
/// use flowtape_greybox::{ExternalModel, GreyBoxModel};
///
/// let mut m = Model::new();
/// let x = m.add_var("x", 1.0);
/// let y = m.add_var("y", 1.0);
/// let f = m.add_equality("f", x * y, 1.0);
/// let g = m.add_equality("g", y, x);
///
/// let mut ext = ExternalModel::new(m, vec![x], vec![y], vec![f], vec![g])?;
/// ext.set_input_values(&[2.0])?;
/// let r = ext.evaluate_equality_constraints()?;
/// assert!((r[0] - 3.0).abs() < 1e-9);
/// # Ok::<(), flowtape_greybox::GreyBoxError>(())
/// ```
#[derive(Debug)]
pub struct ExternalModel {
    model: Model,
    partition: Partition,
    resolver: StateResolver,
    state: Option<ResolvedState>,
    factorizations: usize,
}

impl ExternalModel {
    /// Build with the default Newton inner solver.
    pub fn new(
        model: Model,
        inputs: Vec<VarId>,
        externals: Vec<VarId>,
        residual_eqs: Vec<ConId>,
        external_eqs: Vec<ConId>,
    ) -> Result<Self, GreyBoxError> {
        let partition = Partition {
            inputs,
            externals,
            residual_eqs,
            external_eqs,
        };
        Self::from_partition(model, partition, StateResolver::default())
    }

    /// Build with a caller-supplied inner solver.
    pub fn with_solver(
        model: Model,
        partition: Partition,
        solver: Box<dyn EquationSolver>,
    ) -> Result<Self, GreyBoxError> {
        Self::from_partition(model, partition, StateResolver::new(solver))
    }

    fn from_partition(
        model: Model,
        partition: Partition,
        resolver: StateResolver,
    ) -> Result<Self, GreyBoxError> {
        partition.validate(&model)?;
        debug!(
            n_inputs = partition.inputs.len(),
            n_externals = partition.externals.len(),
            n_residuals = partition.residual_eqs.len(),
            "external model created"
        );
        Ok(ExternalModel {
            model,
            partition,
            resolver,
            state: None,
            factorizations: 0,
        })
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn into_model(self) -> Model {
        self.model
    }

    /// Whether the last `set_input_values` succeeded.
    pub fn is_resolved(&self) -> bool {
        self.state.is_some()
    }

    /// Number of `g_y` factorizations performed since construction.
    pub fn factorization_count(&self) -> usize {
        self.factorizations
    }

    /// Current input values.
    pub fn input_values(&self) -> Vec<f64> {
        self.model.values(&self.partition.inputs)
    }

    /// Current external values.
    pub fn external_values(&self) -> Vec<f64> {
        self.model.values(&self.partition.externals)
    }

    fn nlp(&self) -> Result<&Nlp, GreyBoxError> {
        self.state
            .as_ref()
            .map(|s| &s.nlp)
            .ok_or(GreyBoxError::StateNotResolved)
    }

    /// Factorize `g_y` at the current state unless already done.
    fn ensure_sensitivity(&mut self) -> Result<(), GreyBoxError> {
        let state = self.state.as_mut().ok_or(GreyBoxError::StateNotResolved)?;
        if state.sensitivity.is_some() {
            return Ok(());
        }

        let p = &self.partition;
        let nlp = &state.nlp;

        #[cfg(debug_assertions)]
        {
            let g = nlp.extract_subvector_constraints(&p.external_eqs)?;
            let norm = g.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm > ROOT_WARN_TOL {
                warn!(
                    residual_norm = norm,
                    "differentiating at a point where the external equations are not solved"
                );
            }
        }

        let jgy = nlp.extract_submatrix_jacobian(&p.externals, &p.external_eqs)?;
        let jgx = nlp.extract_submatrix_jacobian(&p.inputs, &p.external_eqs)?;
        let sensitivity = ImplicitSensitivity::new(&jgy, &jgx).ok_or_else(|| {
            warn!("external-equation Jacobian is singular at the current state");
            GreyBoxError::Singular
        })?;
        self.factorizations += 1;
        debug!(
            n_externals = jgy.nrows,
            nnz = jgy.nnz(),
            "factorized external-equation Jacobian"
        );
        state.sensitivity = Some(sensitivity);
        Ok(())
    }

    fn resolved(&self) -> Result<(&Nlp, &ImplicitSensitivity), GreyBoxError> {
        let state = self.state.as_ref().ok_or(GreyBoxError::StateNotResolved)?;
        let sens = state
            .sensitivity
            .as_ref()
            .ok_or(GreyBoxError::StateNotResolved)?;
        Ok((&state.nlp, sens))
    }

    /// `dy/dx`, dense `n_y × n_x`.
    pub fn evaluate_jacobian_external_variables(&mut self) -> Result<Vec<Vec<f64>>, GreyBoxError> {
        self.ensure_sensitivity()?;
        let (_, sens) = self.resolved()?;
        Ok(sens.dydx().to_vec())
    }

    /// `d²y_a/dx²` for every external `a`: `n_y` dense `n_x × n_x` matrices.
    pub fn evaluate_hessian_external_variables(
        &mut self,
    ) -> Result<Vec<Vec<Vec<f64>>>, GreyBoxError> {
        self.ensure_sensitivity()?;
        self.d2y()
    }

    fn d2y(&self) -> Result<Vec<Vec<Vec<f64>>>, GreyBoxError> {
        let (_, sens) = self.resolved()?;
        let g_curvature = self.curvature(&self.partition.external_eqs)?;
        Ok(sens.second_order(&g_curvature))
    }

    fn curvature(&self, cons: &[ConId]) -> Result<Vec<CurvatureBlocks>, GreyBoxError> {
        let p = &self.partition;
        cons.iter()
            .map(|&c| CurvatureBlocks::of(&self.model, c, &p.inputs, &p.externals).map_err(Into::into))
            .collect()
    }
}

impl GreyBoxModel for ExternalModel {
    fn n_inputs(&self) -> usize {
        self.partition.inputs.len()
    }

    fn n_equality_constraints(&self) -> usize {
        self.partition.residual_eqs.len()
    }

    fn input_names(&self) -> Vec<String> {
        (0..self.n_inputs()).map(|i| format!("input_{i}")).collect()
    }

    fn equality_constraint_names(&self) -> Vec<String> {
        (0..self.n_equality_constraints())
            .map(|i| format!("residual_{i}"))
            .collect()
    }

    fn set_input_values(&mut self, values: &[f64]) -> Result<(), GreyBoxError> {
        if values.len() != self.n_inputs() {
            return Err(GreyBoxError::DimensionMismatch {
                expected: self.n_inputs(),
                found: values.len(),
            });
        }
        self.state = None;
        let resolved = self
            .resolver
            .resolve(&mut self.model, &self.partition, values)?;
        self.state = Some(ResolvedState {
            nlp: resolved.nlp,
            sensitivity: None,
        });
        Ok(())
    }

    fn evaluate_equality_constraints(&self) -> Result<Vec<f64>, GreyBoxError> {
        Ok(self
            .nlp()?
            .extract_subvector_constraints(&self.partition.residual_eqs)?)
    }

    fn evaluate_jacobian_equality_constraints(&mut self) -> Result<Vec<Vec<f64>>, GreyBoxError> {
        self.ensure_sensitivity()?;
        let (nlp, sens) = self.resolved()?;
        let p = &self.partition;
        let jfx = nlp.extract_submatrix_jacobian(&p.inputs, &p.residual_eqs)?;
        let jfy = nlp.extract_submatrix_jacobian(&p.externals, &p.residual_eqs)?;
        Ok(sens.reduced_jacobian(&jfx, &jfy))
    }

    fn evaluate_hessian_equality_constraints(
        &mut self,
    ) -> Result<Vec<Vec<Vec<f64>>>, GreyBoxError> {
        self.ensure_sensitivity()?;
        let d2y = self.d2y()?;
        let (nlp, sens) = self.resolved()?;
        let p = &self.partition;
        let jfy = nlp.extract_submatrix_jacobian(&p.externals, &p.residual_eqs)?;
        let f_curvature = self.curvature(&p.residual_eqs)?;
        Ok(sens.reduced_hessians(&jfy, &f_curvature, &d2y))
    }
}
