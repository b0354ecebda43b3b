//! Bytecode tape for re-evaluable derivatives of a set of equations.
//!
//! A [`Tape`] is compiled once from one or more [`Expr`] bodies (the outputs)
//! and a list of input variables. Every other variable an expression mentions
//! is frozen into the tape as a constant at compile time. The tape stores
//! opcodes rather than precomputed multipliers, so it can be re-evaluated at
//! new inputs without recompiling.
//!
//! The sweeps are written once over [`Scalar`] and run on `f64` for values,
//! gradients and Jacobians, and on [`Dual<f64>`](crate::Dual) for
//! forward-over-reverse Hessian columns (see `tangent.rs`).

use std::collections::HashMap;

use crate::expr::Expr;
use crate::model::VarId;
use crate::opcode::{self, OpCode, UNUSED};
use crate::scalar::Scalar;

mod tangent;

/// A compiled, multi-output bytecode tape.
///
/// Layout: the first [`num_inputs`](Self::num_inputs) slots are `Input`
/// entries in the order the inputs were given; every later slot is a
/// constant or an operation whose arguments point to earlier slots.
#[derive(Clone, Debug)]
pub struct Tape {
    pub(crate) opcodes: Vec<OpCode>,
    pub(crate) arg_indices: Vec<[u32; 2]>,
    pub(crate) values: Vec<f64>,
    pub(crate) num_inputs: u32,
    pub(crate) output_indices: Vec<u32>,
}

impl Tape {
    /// Compile `outputs` into a tape over `inputs`.
    ///
    /// `value` supplies the initial value of every input and the frozen value
    /// of every non-input variable the outputs reference.
    ///
    /// # Panics
    ///
    /// Panics if `inputs` contains duplicates.
    pub fn compile<'e>(
        outputs: impl IntoIterator<Item = &'e Expr>,
        inputs: &[VarId],
        value: impl Fn(VarId) -> f64,
    ) -> Self {
        let mut tape = Tape {
            opcodes: Vec::new(),
            arg_indices: Vec::new(),
            values: Vec::new(),
            num_inputs: 0,
            output_indices: Vec::new(),
        };

        let mut index: HashMap<VarId, u32> = HashMap::with_capacity(inputs.len());
        for &v in inputs {
            let idx = tape.new_input(value(v));
            let prev = index.insert(v, idx);
            assert!(prev.is_none(), "duplicate tape input {v}");
        }

        for expr in outputs {
            let out = tape.record(expr, &index, &value);
            tape.output_indices.push(out);
        }
        tape
    }

    fn new_input(&mut self, value: f64) -> u32 {
        let idx = self.opcodes.len() as u32;
        self.num_inputs += 1;
        self.opcodes.push(OpCode::Input);
        self.arg_indices.push([UNUSED, UNUSED]);
        self.values.push(value);
        idx
    }

    fn push_const(&mut self, value: f64) -> u32 {
        let idx = self.opcodes.len() as u32;
        self.opcodes.push(OpCode::Const);
        self.arg_indices.push([UNUSED, UNUSED]);
        self.values.push(value);
        idx
    }

    /// Record an operation. Operations whose arguments are all constants are
    /// folded into a single `Const` slot.
    fn push_op(&mut self, op: OpCode, arg0: u32, arg1: u32, value: f64) -> u32 {
        let arg0_const = self.opcodes[arg0 as usize] == OpCode::Const;
        let arg1_const = !op.is_binary() || self.opcodes[arg1 as usize] == OpCode::Const;
        if arg0_const && arg1_const {
            return self.push_const(value);
        }

        let idx = self.opcodes.len() as u32;
        self.opcodes.push(op);
        self.arg_indices.push([arg0, arg1]);
        self.values.push(value);
        idx
    }

    fn record(&mut self, expr: &Expr, index: &HashMap<VarId, u32>, value: &impl Fn(VarId) -> f64) -> u32 {
        match expr {
            Expr::Var(v) => match index.get(v) {
                Some(&idx) => idx,
                None => self.push_const(value(*v)),
            },
            Expr::Const(c) => self.push_const(*c),
            Expr::Unary(op, a) => {
                let ia = self.record(a, index, value);
                let r = opcode::eval_forward(*op, self.values[ia as usize], 0.0, UNUSED);
                self.push_op(*op, ia, UNUSED, r)
            }
            Expr::Binary(op, a, b) => {
                let ia = self.record(a, index, value);
                let ib = self.record(b, index, value);
                let r = opcode::eval_forward(
                    *op,
                    self.values[ia as usize],
                    self.values[ib as usize],
                    UNUSED,
                );
                self.push_op(*op, ia, ib, r)
            }
            Expr::Powi(a, n) => {
                let ia = self.record(a, index, value);
                let arg1 = opcode::powi_exp_encode(*n);
                let r = self.values[ia as usize].powi(*n);
                self.push_op(OpCode::Powi, ia, arg1, r)
            }
        }
    }

    #[inline]
    pub fn num_inputs(&self) -> usize {
        self.num_inputs as usize
    }

    #[inline]
    pub fn num_outputs(&self) -> usize {
        self.output_indices.len()
    }

    /// Total number of tape slots (inputs, constants and operations).
    #[inline]
    pub fn len(&self) -> usize {
        self.opcodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.opcodes.is_empty()
    }

    /// Number of slots that are actual operations.
    pub fn num_ops(&self) -> usize {
        self.opcodes
            .iter()
            .filter(|op| !matches!(op, OpCode::Input | OpCode::Const))
            .count()
    }

    /// Inputs the tape was last evaluated at.
    pub fn inputs(&self) -> &[f64] {
        &self.values[..self.num_inputs()]
    }

    /// Output values at the last evaluated inputs.
    pub fn outputs(&self) -> Vec<f64> {
        self.output_indices
            .iter()
            .map(|&o| self.values[o as usize])
            .collect()
    }

    /// Generic forward sweep. Reads opcodes and constants from `self`,
    /// writing one value per slot into `buf`. Does not mutate the tape.
    pub fn forward_sweep<T: Scalar<Float = f64>>(&self, inputs: &[T], buf: &mut Vec<T>) {
        assert_eq!(
            inputs.len(),
            self.num_inputs(),
            "wrong number of inputs"
        );

        buf.clear();
        buf.reserve(self.opcodes.len());
        for i in 0..self.opcodes.len() {
            let v = match self.opcodes[i] {
                OpCode::Input => inputs[i],
                OpCode::Const => T::from_f(self.values[i]),
                op => {
                    let [a_idx, b_idx] = self.arg_indices[i];
                    let a = buf[a_idx as usize];
                    let b = if op.is_binary() {
                        buf[b_idx as usize]
                    } else {
                        T::zero()
                    };
                    opcode::eval_forward(op, a, b, b_idx)
                }
            };
            buf.push(v);
        }
    }

    /// Generic reverse sweep seeded with `seeds[k]` at output `k`.
    ///
    /// `vals` are the slot values from [`forward_sweep`](Self::forward_sweep)
    /// on the same scalar type. On return `buf[..num_inputs]` holds
    /// `Σ_k seeds[k]·∂output_k/∂input`.
    pub fn reverse_sweep<T: Scalar<Float = f64>>(&self, vals: &[T], seeds: &[T], buf: &mut Vec<T>) {
        assert_eq!(
            seeds.len(),
            self.num_outputs(),
            "seeds length must match number of outputs"
        );

        let n = self.opcodes.len();
        buf.clear();
        buf.resize(n, T::zero());
        // Two outputs may share a slot, so seeds accumulate.
        for (&o, &s) in self.output_indices.iter().zip(seeds) {
            buf[o as usize] = buf[o as usize] + s;
        }

        for i in (0..n).rev() {
            match self.opcodes[i] {
                OpCode::Input | OpCode::Const => continue,
                op => {
                    let adj = buf[i];
                    if adj.is_all_zero() {
                        continue;
                    }
                    buf[i] = T::zero();

                    let [a_idx, b_idx] = self.arg_indices[i];
                    let a = vals[a_idx as usize];
                    let b = if op.is_binary() {
                        vals[b_idx as usize]
                    } else {
                        T::zero()
                    };
                    let (da, db) = opcode::reverse_partials(op, a, b, vals[i], b_idx);

                    buf[a_idx as usize] = buf[a_idx as usize] + da * adj;
                    if op.is_binary() {
                        buf[b_idx as usize] = buf[b_idx as usize] + db * adj;
                    }
                }
            }
        }
    }

    /// Re-evaluate the tape at new inputs, storing the slot values.
    pub fn forward(&mut self, inputs: &[f64]) {
        let mut buf = Vec::with_capacity(self.opcodes.len());
        self.forward_sweep(inputs, &mut buf);
        self.values = buf;
    }

    /// Vector-Jacobian product `Σ_k seeds[k]·∇output_k` at the stored inputs.
    pub fn reverse_seeded(&self, seeds: &[f64]) -> Vec<f64> {
        let mut buf = Vec::new();
        self.reverse_sweep(&self.values, seeds, &mut buf);
        buf.truncate(self.num_inputs());
        buf
    }

    /// Gradient of output `k` at new inputs.
    pub fn gradient(&mut self, inputs: &[f64], k: usize) -> Vec<f64> {
        self.forward(inputs);
        let mut seeds = vec![0.0; self.num_outputs()];
        seeds[k] = 1.0;
        self.reverse_seeded(&seeds)
    }

    /// Dense Jacobian (one row per output) at the stored inputs.
    pub fn jacobian_at_current(&self) -> Vec<Vec<f64>> {
        let m = self.num_outputs();
        let mut seeds = vec![0.0; m];
        let mut buf = Vec::new();
        let mut rows = Vec::with_capacity(m);
        for k in 0..m {
            seeds[k] = 1.0;
            self.reverse_sweep(&self.values, &seeds, &mut buf);
            rows.push(buf[..self.num_inputs()].to_vec());
            seeds[k] = 0.0;
        }
        rows
    }

    /// Forward + reverse: dense Jacobian at new inputs.
    pub fn jacobian(&mut self, inputs: &[f64]) -> Vec<Vec<f64>> {
        self.forward(inputs);
        self.jacobian_at_current()
    }
}
