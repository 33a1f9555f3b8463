//! Goal-driven search over equilibrium forms via the `argmin` crate.
//!
//! Wraps the objective in argmin's `CostFunction` + `Gradient` traits and
//! drives either L-BFGS (gradient family) or Nelder-Mead (derivative-free
//! family). Parameters are `Vec<f64>` to stay independent of any array
//! backend.

use std::cell::RefCell;
use std::sync::{Arc, Mutex};

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::neldermead::NelderMead;
use argmin::solver::quasinewton::LBFGS;
use tracing::{debug, info};

use crate::diagram::Diagram;
use crate::error::{EquilibriumError, GoalError, SolveError};
use crate::goals::{Constraint, Goal};
use crate::objective::{self, EquilibriumMode, GradientMode, Objective};

/// Numerical algorithm family driving the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// Limited-memory BFGS with More-Thuente line search.
    Lbfgs,
    /// Nelder-Mead simplex; no gradient evaluations.
    NelderMead,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveOptions {
    pub algorithm: Algorithm,
    /// Outer iteration budget, checked every iteration; the best point so
    /// far is returned when it runs out.
    pub max_iterations: u64,
    /// Stop as soon as the loss falls to this value or below.
    pub stopval: Option<f64>,
    /// Loss-improvement tolerance handed to the numerical method.
    pub ftol: Option<f64>,
    /// Finite-difference step for gradient evaluations.
    pub step_size: f64,
    pub gradient: GradientMode,
    pub equilibrium: EquilibriumMode,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Lbfgs,
            max_iterations: 100,
            stopval: None,
            ftol: None,
            step_size: 1e-6,
            gradient: GradientMode::Central,
            equilibrium: EquilibriumMode::Direct,
        }
    }
}

/// Where the optimizer currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizerState {
    #[default]
    Initialized,
    Iterating,
    Converged,
    /// The numerical method stalled or aborted; the best point found is
    /// retained.
    Failed,
    Exhausted,
}

/// Result of a solve: the best parameter vector and its loss.
///
/// Callers re-run the equilibrium solver on `parameters` (see
/// [`Optimizer::form`]) to obtain the final form.
#[derive(Debug, Clone)]
pub struct Solution {
    pub parameters: Vec<f64>,
    pub loss: f64,
    /// Outer iterations reported by the numerical method.
    pub iterations: u64,
    pub state: OptimizerState,
    /// Gradient norm at the last evaluated point; `None` for
    /// derivative-free runs.
    pub gradient_norm: Option<f64>,
    /// Loss of every objective evaluation, in evaluation order. Line
    /// searches may probe uphill; the running minimum is non-increasing.
    pub loss_trace: Vec<f64>,
}

/// Accumulates goals and constraints, then searches the bounded parameter
/// space for the least total goal error.
#[derive(Debug, Default)]
pub struct Optimizer {
    goals: Vec<Goal>,
    constraints: Vec<Constraint>,
    state: OptimizerState,
}

impl Optimizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a goal; invalid references fail here, not at solve time.
    pub fn add_goal(&mut self, diagram: &Diagram, goal: Goal) -> Result<(), GoalError> {
        goal.validate(diagram)?;
        self.goals.push(goal);
        Ok(())
    }

    /// Registers a constraint; one entry of the parameter vector per call,
    /// in registration order.
    pub fn add_constraint(
        &mut self,
        diagram: &Diagram,
        constraint: Constraint,
    ) -> Result<(), GoalError> {
        constraint.validate(diagram)?;
        self.constraints.push(constraint);
        Ok(())
    }

    pub fn goals(&self) -> &[Goal] {
        &self.goals
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn number_of_goals(&self) -> usize {
        self.goals.len()
    }

    pub fn number_of_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn state(&self) -> OptimizerState {
        self.state
    }

    /// Equilibrates `diagram` under `parameters`, clamped by the
    /// registered constraints.
    pub fn form(
        &self,
        diagram: &Diagram,
        parameters: &[f64],
        mode: EquilibriumMode,
    ) -> Result<Diagram, EquilibriumError> {
        Objective::new(
            diagram,
            &self.goals,
            &self.constraints,
            mode,
            GradientMode::Central,
            1e-6,
        )
        .form(parameters)
    }

    /// Runs the bounded search and returns the best parameters found with
    /// their loss. Progress is never discarded: a `Failed` or `Exhausted`
    /// outcome still reports the best point seen.
    pub fn solve(
        &mut self,
        diagram: &Diagram,
        options: &SolveOptions,
    ) -> Result<Solution, SolveError> {
        if self.constraints.is_empty() {
            return Err(SolveError::NoParameters);
        }

        let objective = Objective::new(
            diagram,
            &self.goals,
            &self.constraints,
            options.equilibrium,
            options.gradient,
            options.step_size,
        );
        let x0 = objective.initial_parameters();

        // Surface topology problems before the line search wraps them.
        if let Err(e) = objective.form(&x0) {
            self.state = OptimizerState::Failed;
            return Err(e.into());
        }

        info!(
            algorithm = ?options.algorithm,
            parameters = x0.len(),
            goals = self.goals.len(),
            "optimization started"
        );
        self.state = OptimizerState::Iterating;

        let trace = Arc::new(Mutex::new(Vec::new()));
        let gradient_norm = Arc::new(Mutex::new(None));
        let failure = Arc::new(Mutex::new(None));
        let best_seen = Arc::new(Mutex::new(None));
        let problem = GoalProblem {
            objective,
            needs_gradient: options.algorithm == Algorithm::Lbfgs,
            last: RefCell::new(None),
            trace: Arc::clone(&trace),
            gradient_norm: Arc::clone(&gradient_norm),
            failure: Arc::clone(&failure),
            best_seen: Arc::clone(&best_seen),
        };

        let target = options.stopval.unwrap_or(f64::NEG_INFINITY);
        let run = match options.algorithm {
            Algorithm::Lbfgs => {
                let linesearch = MoreThuenteLineSearch::new();
                let mut solver = LBFGS::new(linesearch, 10);
                if let Some(ftol) = options.ftol {
                    solver = match solver.with_tolerance_cost(ftol) {
                        Ok(solver) => solver,
                        Err(err) => {
                            self.state = OptimizerState::Failed;
                            return Err(err.into());
                        }
                    };
                }
                Executor::new(problem, solver)
                    .configure(|config| {
                        config
                            .param(x0.clone())
                            .max_iters(options.max_iterations)
                            .target_cost(target)
                    })
                    .run()
                    .map(|result| {
                        let state = result.state();
                        (
                            state.get_best_param().cloned(),
                            state.get_best_cost(),
                            state.get_iter(),
                            classify(state.get_termination_reason()),
                        )
                    })
            }
            Algorithm::NelderMead => {
                let simplex = initial_simplex(&x0, &self.constraints);
                let mut solver = NelderMead::new(simplex);
                if let Some(ftol) = options.ftol {
                    solver = match solver.with_sd_tolerance(ftol) {
                        Ok(solver) => solver,
                        Err(err) => {
                            self.state = OptimizerState::Failed;
                            return Err(err.into());
                        }
                    };
                }
                Executor::new(problem, solver)
                    .configure(|config| {
                        config.max_iters(options.max_iterations).target_cost(target)
                    })
                    .run()
                    .map(|result| {
                        let state = result.state();
                        (
                            state.get_best_param().cloned(),
                            state.get_best_cost(),
                            state.get_iter(),
                            classify(state.get_termination_reason()),
                        )
                    })
            }
        };

        let (best, best_cost, iterations, outcome) = match run {
            Ok(tuple) => tuple,
            Err(err) => {
                // Equilibrium failures come out unwrapped; anything else is
                // a stall, reported with the best evaluation retained.
                if let Some(equilibrium) =
                    failure.lock().unwrap_or_else(|p| p.into_inner()).take()
                {
                    self.state = OptimizerState::Failed;
                    return Err(SolveError::Equilibrium(equilibrium));
                }
                match best_seen.lock().unwrap_or_else(|p| p.into_inner()).take() {
                    Some((loss, parameters)) => {
                        (Some(parameters), loss, 0, OptimizerState::Failed)
                    }
                    None => {
                        self.state = OptimizerState::Failed;
                        return Err(SolveError::Solver(err.to_string()));
                    }
                }
            }
        };

        let Some(best) = best else {
            self.state = OptimizerState::Failed;
            return Err(SolveError::Solver("no best parameters recorded".into()));
        };

        // Clamp once more so reported parameters always sit inside their
        // intervals, whatever path the numerical method took.
        let parameters: Vec<f64> = best
            .iter()
            .zip(&self.constraints)
            .map(|(&value, constraint)| constraint.clamp(value))
            .collect();

        let mut state = outcome;
        if let Some(stopval) = options.stopval {
            if best_cost <= stopval {
                state = OptimizerState::Converged;
            }
        }
        self.state = state;

        let loss_trace = trace.lock().unwrap_or_else(|p| p.into_inner()).clone();
        let gradient_norm = *gradient_norm.lock().unwrap_or_else(|p| p.into_inner());

        debug!(loss = best_cost, iterations, state = ?state, "optimization finished");
        Ok(Solution {
            parameters,
            loss: best_cost,
            iterations,
            state,
            gradient_norm,
            loss_trace,
        })
    }
}

fn classify(reason: Option<&TerminationReason>) -> OptimizerState {
    match reason {
        Some(TerminationReason::TargetCostReached) | Some(TerminationReason::SolverConverged) => {
            OptimizerState::Converged
        }
        Some(TerminationReason::MaxItersReached) => OptimizerState::Exhausted,
        _ => OptimizerState::Failed,
    }
}

/// Start simplex for Nelder-Mead: the initial point plus one vertex per
/// parameter, stepped by 5% of the bound interval toward whichever side
/// leaves room.
fn initial_simplex(x0: &[f64], constraints: &[Constraint]) -> Vec<Vec<f64>> {
    let mut simplex = Vec::with_capacity(x0.len() + 1);
    simplex.push(x0.to_vec());
    for (i, constraint) in constraints.iter().enumerate() {
        let (lower, upper) = constraint.bounds();
        let range = upper - lower;
        let spread = if range.is_finite() && range > 0.0 {
            range * 0.05
        } else {
            0.1
        };
        let mut vertex = x0.to_vec();
        vertex[i] = constraint.clamp(x0[i] + spread);
        if vertex[i] == x0[i] {
            vertex[i] = constraint.clamp(x0[i] - spread);
        }
        simplex.push(vertex);
    }
    simplex
}

// ── argmin problem wrapper ─────────────────────────────────

struct Evaluation {
    parameters: Vec<f64>,
    loss: f64,
    gradient: Option<Vec<f64>>,
}

/// Bridges the objective into argmin.
///
/// argmin requests cost and gradient separately at the same point each
/// iteration; the `RefCell` cache makes the expensive equilibrium pipeline
/// run once per unique point. For gradient algorithms both are computed
/// together up front.
struct GoalProblem<'a> {
    objective: Objective<'a>,
    needs_gradient: bool,
    last: RefCell<Option<Evaluation>>,
    trace: Arc<Mutex<Vec<f64>>>,
    gradient_norm: Arc<Mutex<Option<f64>>>,
    failure: Arc<Mutex<Option<EquilibriumError>>>,
    best_seen: Arc<Mutex<Option<(f64, Vec<f64>)>>>,
}

impl GoalProblem<'_> {
    fn ensure(&self, parameters: &[f64], want_gradient: bool) -> Result<(), argmin::core::Error> {
        {
            let cached = self.last.borrow();
            if let Some(eval) = cached.as_ref() {
                if eval.parameters == parameters && (!want_gradient || eval.gradient.is_some()) {
                    return Ok(());
                }
            }
        }
        let evaluated = if want_gradient {
            self.objective
                .evaluate(parameters)
                .map(|(loss, gradient)| (loss, Some(gradient)))
        } else {
            self.objective.loss(parameters).map(|loss| (loss, None))
        };
        let (loss, gradient) = evaluated.map_err(|e| {
            self.failure
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .replace(e.clone());
            argmin::core::Error::msg(e.to_string())
        })?;
        self.trace
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(loss);
        {
            let mut best = self.best_seen.lock().unwrap_or_else(|p| p.into_inner());
            if best.as_ref().map_or(true, |(b, _)| loss < *b) {
                *best = Some((loss, parameters.to_vec()));
            }
        }
        if let Some(gradient) = &gradient {
            *self.gradient_norm.lock().unwrap_or_else(|p| p.into_inner()) =
                Some(objective::norm(gradient));
        }
        *self.last.borrow_mut() = Some(Evaluation {
            parameters: parameters.to_vec(),
            loss,
            gradient,
        });
        Ok(())
    }
}

impl CostFunction for GoalProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, parameters: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        self.ensure(parameters, self.needs_gradient)?;
        let cached = self.last.borrow();
        Ok(cached.as_ref().map_or(f64::INFINITY, |eval| eval.loss))
    }
}

impl Gradient for GoalProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, parameters: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        self.ensure(parameters, true)?;
        let cached = self.last.borrow();
        cached
            .as_ref()
            .and_then(|eval| eval.gradient.clone())
            .ok_or_else(|| argmin::core::Error::msg("gradient unavailable"))
    }
}
