//! Scalar objective over the parameter vector.
//!
//! Each evaluation is self-contained: the topology is cloned, the clamped
//! parameters are written into the clone, the equilibrium solver produces
//! a form, and goal errors are summed into one nonnegative loss. No state
//! leaks between evaluations, so finite-difference perturbations can run
//! in parallel.

use rayon::prelude::*;
use tracing::trace;

use crate::diagram::Diagram;
use crate::equilibrium::{self, EquilibriumSettings};
use crate::error::EquilibriumError;
use crate::goals::{Constraint, Goal};

/// How each evaluation reaches equilibrium.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum EquilibriumMode {
    /// Single dependency-ordered pass; rejects cyclic deviation
    /// dependencies.
    #[default]
    Direct,
    /// Relaxation sweeps until the residual tolerance is met.
    Iterative(EquilibriumSettings),
}

/// Finite-difference flavor for the gradient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GradientMode {
    /// Central differences, one extra evaluation pair per parameter.
    #[default]
    Central,
    /// Forward differences, reusing the loss at the base point.
    Forward,
}

pub struct Objective<'a> {
    topology: &'a Diagram,
    goals: &'a [Goal],
    constraints: &'a [Constraint],
    mode: EquilibriumMode,
    gradient: GradientMode,
    step: f64,
}

impl<'a> Objective<'a> {
    pub fn new(
        topology: &'a Diagram,
        goals: &'a [Goal],
        constraints: &'a [Constraint],
        mode: EquilibriumMode,
        gradient: GradientMode,
        step: f64,
    ) -> Self {
        Self {
            topology,
            goals,
            constraints,
            mode,
            gradient,
            step,
        }
    }

    /// Current parameter values read from the topology, clamped into their
    /// feasible intervals, in constraint registration order.
    pub fn initial_parameters(&self) -> Vec<f64> {
        self.constraints
            .iter()
            .map(|constraint| constraint.clamp(constraint.value(self.topology)))
            .collect()
    }

    /// A fresh copy of the topology with `parameters` written in, each
    /// clamped by its constraint.
    pub fn apply_parameters(&self, parameters: &[f64]) -> Diagram {
        let mut diagram = self.topology.clone();
        for (constraint, &value) in self.constraints.iter().zip(parameters) {
            constraint.apply(&mut diagram, value);
        }
        diagram
    }

    /// Equilibrated form under `parameters`.
    pub fn form(&self, parameters: &[f64]) -> Result<Diagram, EquilibriumError> {
        let diagram = self.apply_parameters(parameters);
        match self.mode {
            EquilibriumMode::Direct => equilibrium::force_equilibrium(&diagram),
            EquilibriumMode::Iterative(settings) => {
                equilibrium::static_equilibrium(&diagram, &settings)
            }
        }
    }

    /// Sum of all goal errors on the form under `parameters`.
    pub fn loss(&self, parameters: &[f64]) -> Result<f64, EquilibriumError> {
        let form = self.form(parameters)?;
        Ok(self.goals.iter().map(|goal| goal.error(&form)).sum())
    }

    /// Loss and finite-difference gradient at `parameters`.
    ///
    /// Perturbed evaluations are independent and run on the rayon pool;
    /// results are merged in parameter order, so the gradient is
    /// deterministic regardless of scheduling.
    pub fn evaluate(&self, parameters: &[f64]) -> Result<(f64, Vec<f64>), EquilibriumError> {
        let value = self.loss(parameters)?;
        let step = self.step;
        let gradient = (0..parameters.len())
            .into_par_iter()
            .map(|i| {
                let mut forward = parameters.to_vec();
                forward[i] += step;
                let ahead = self.loss(&forward)?;
                match self.gradient {
                    GradientMode::Forward => Ok((ahead - value) / step),
                    GradientMode::Central => {
                        let mut backward = parameters.to_vec();
                        backward[i] -= step;
                        Ok((ahead - self.loss(&backward)?) / (2.0 * step))
                    }
                }
            })
            .collect::<Result<Vec<f64>, EquilibriumError>>()?;
        trace!(loss = value, gradient_norm = norm(&gradient), "objective evaluated");
        Ok((value, gradient))
    }
}

pub(crate) fn norm(vector: &[f64]) -> f64 {
    vector.iter().map(|v| v * v).sum::<f64>().sqrt()
}
