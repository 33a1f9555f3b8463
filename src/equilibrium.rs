//! Equilibrium solvers: direct trail walk and iterative relaxation.
//!
//! Both consume a topology diagram and produce a new diagram (the form)
//! with node positions, trail edge forces, and support reactions
//! finalized. The input is never mutated.
//!
//! At every node the vector sum of incoming trail force, outgoing trail
//! force, incident deviation forces, and the applied load is zero; at
//! supports the unresolved residual becomes the reaction.

use std::collections::HashSet;

use nalgebra::Vector3;
use petgraph::stable_graph::NodeIndex;
use tracing::{debug, trace};

use crate::diagram::{Diagram, NodeKind, Trail, DIRECTION_EPS};
use crate::error::{EquilibriumError, TopologyError};

/// Tolerance and iteration budget for the relaxation solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquilibriumSettings {
    /// Convergence tolerance on the peak force residual.
    pub eta: f64,
    /// Maximum number of relaxation sweeps.
    pub tmax: usize,
}

impl Default for EquilibriumSettings {
    fn default() -> Self {
        Self { eta: 1e-6, tmax: 100 }
    }
}

/// Outcome of a successful relaxation run.
#[derive(Debug, Clone)]
pub struct Relaxed {
    pub form: Diagram,
    /// Sweeps spent, including the one that hit the tolerance.
    pub iterations: usize,
    pub residual: f64,
}

/// Termination state of the relaxation loop.
///
/// Terminal states are absorbing so the contract can be tested apart from
/// the sweep itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Relaxation {
    Iterating { step: usize, residual: f64 },
    Converged { steps: usize, residual: f64 },
    Exhausted { residual: f64 },
}

impl Relaxation {
    pub fn start() -> Self {
        Relaxation::Iterating {
            step: 0,
            residual: f64::INFINITY,
        }
    }

    /// Folds one sweep's residual into the state.
    pub fn advance(self, residual: f64, eta: f64, tmax: usize) -> Self {
        match self {
            Relaxation::Iterating { step, .. } => {
                let step = step + 1;
                if residual <= eta {
                    Relaxation::Converged { steps: step, residual }
                } else if step >= tmax {
                    Relaxation::Exhausted { residual }
                } else {
                    Relaxation::Iterating { step, residual }
                }
            }
            terminal => terminal,
        }
    }
}

/// Direct single-pass solver.
///
/// Resolves nodes in dependency order: a node is ready once its own
/// position and the positions of all its deviation neighbors are final.
/// Diagrams whose deviation edges form a cyclic dependency are rejected
/// with [`TopologyError::CyclicDependency`]; use [`static_equilibrium`]
/// for those.
pub fn force_equilibrium(topology: &Diagram) -> Result<Diagram, EquilibriumError> {
    let mut form = topology.clone();
    let trails = validated_trails(&form)?;
    stamp_trails(&mut form, &trails);
    solve_direct(&mut form, &trails)?;
    debug!(trails = trails.len(), "direct equilibrium solved");
    Ok(form)
}

/// Iterative relaxation solver.
///
/// Sweeps every trail repeatedly, reusing the previous sweep's positions
/// for deviation neighbors that are not yet resolved, until the peak force
/// residual falls below `eta` or `tmax` sweeps are exhausted. Tolerates
/// cyclic force dependencies the direct mode cannot.
pub fn static_equilibrium(
    topology: &Diagram,
    settings: &EquilibriumSettings,
) -> Result<Diagram, EquilibriumError> {
    relax(topology, settings).map(|relaxed| relaxed.form)
}

/// Like [`static_equilibrium`], also reporting sweeps and final residual.
pub fn relax(
    topology: &Diagram,
    settings: &EquilibriumSettings,
) -> Result<Relaxed, EquilibriumError> {
    let mut form = topology.clone();
    let trails = validated_trails(&form)?;
    stamp_trails(&mut form, &trails);

    let mut state = Relaxation::start();
    loop {
        match state {
            Relaxation::Iterating { .. } => {
                sweep(&mut form, &trails);
                let residual = peak_residual(&form, &trails);
                trace!(residual, "relaxation sweep");
                state = state.advance(residual, settings.eta, settings.tmax);
            }
            Relaxation::Converged { steps, residual } => {
                debug!(iterations = steps, residual, "static equilibrium converged");
                return Ok(Relaxed {
                    form,
                    iterations: steps,
                    residual,
                });
            }
            Relaxation::Exhausted { residual } => {
                return Err(EquilibriumError::Convergence {
                    residual,
                    iterations: settings.tmax,
                });
            }
        }
    }
}

// ── Validation ─────────────────────────────────────────────

/// Derives trails and checks the invariants both solver modes rely on:
/// every edge typed, every node on exactly one trail, every trail ending
/// at a support and containing no interior support.
fn validated_trails(diagram: &Diagram) -> Result<Vec<Trail>, TopologyError> {
    for edge in diagram.edges() {
        if diagram.edge(edge).and_then(|attributes| attributes.kind).is_none() {
            return Err(TopologyError::UntypedEdge(edge));
        }
    }
    let trails = diagram.trails()?;
    let mut covered = HashSet::new();
    for trail in &trails {
        for (k, &node) in trail.nodes.iter().enumerate() {
            let last = k + 1 == trail.nodes.len();
            if last && !diagram.is_node_support(node) {
                return Err(TopologyError::TrailWithoutSupport {
                    root: trail.root,
                    end: node,
                });
            }
            if !last && diagram.is_node_support(node) {
                return Err(TopologyError::SupportWithinTrail(node));
            }
            covered.insert(node);
        }
    }
    for node in diagram.nodes() {
        if !covered.contains(&node) {
            return Err(TopologyError::NodeOutsideTrails(node));
        }
    }
    Ok(trails)
}

fn stamp_trails(form: &mut Diagram, trails: &[Trail]) {
    for trail in trails {
        for (k, &node) in trail.nodes.iter().enumerate() {
            form.set_sequence(node, k);
            if k == 0 && !form.is_node_support(node) {
                form.set_node_kind(node, NodeKind::Root);
            }
        }
    }
}

// ── Node resolution ────────────────────────────────────────

/// Resolves the force balance at one trail node.
///
/// `inflow` is the force the incoming trail edge exerts on the node (zero
/// at roots). The outgoing trail vector absorbs load and deviation forces;
/// it either places the next node along itself (scaled by the signed
/// target length) or, at the trail's end, becomes the support reaction.
/// Returns the inflow for the next node.
fn resolve_node(form: &mut Diagram, trail: &Trail, k: usize, inflow: Vector3<f64>) -> Vector3<f64> {
    let node = trail.nodes[k];
    let outflow = -(inflow + form.node_load(node) + deviation_resultant(form, node));

    if k + 1 == trail.nodes.len() {
        form.set_reaction(node, outflow);
        return Vector3::zeros();
    }

    let next = trail.nodes[k + 1];
    let edge = trail.edges[k];
    let length = form.target_length(edge);
    let magnitude = outflow.norm();
    let direction = if magnitude > DIRECTION_EPS {
        outflow / magnitude
    } else {
        // Zero outgoing force leaves the direction free; keep the chord.
        chord_direction(form, node, next)
    };

    form.set_position(next, form.position(node) + direction * length);
    form.set_edge_force(edge, magnitude.copysign(length));
    -outflow
}

/// Resultant of all deviation forces acting on `node` at current positions.
fn deviation_resultant(form: &Diagram, node: NodeIndex) -> Vector3<f64> {
    let mut total = Vector3::zeros();
    for (edge, other) in form.deviation_neighbors(node) {
        let chord = form.position(other) - form.position(node);
        let length = chord.norm();
        if length > DIRECTION_EPS {
            total += chord / length * form.edge_force(edge);
        }
    }
    total
}

fn chord_direction(form: &Diagram, node: NodeIndex, next: NodeIndex) -> Vector3<f64> {
    let chord = form.position(next) - form.position(node);
    let length = chord.norm();
    if length > DIRECTION_EPS {
        chord / length
    } else {
        Vector3::x()
    }
}

// ── Direct mode ────────────────────────────────────────────

fn solve_direct(form: &mut Diagram, trails: &[Trail]) -> Result<(), TopologyError> {
    let total: usize = trails.iter().map(|trail| trail.nodes.len()).sum();
    let mut placed: HashSet<NodeIndex> = trails.iter().map(|trail| trail.root).collect();
    let mut cursors = vec![0usize; trails.len()];
    let mut inflows = vec![Vector3::zeros(); trails.len()];
    let mut resolved = 0usize;

    loop {
        let mut progressed = false;
        for (t, trail) in trails.iter().enumerate() {
            while cursors[t] < trail.nodes.len() {
                let node = trail.nodes[cursors[t]];
                let ready = form
                    .deviation_neighbors(node)
                    .all(|(_, other)| placed.contains(&other));
                if !ready {
                    break;
                }
                inflows[t] = resolve_node(form, trail, cursors[t], inflows[t]);
                if cursors[t] + 1 < trail.nodes.len() {
                    placed.insert(trail.nodes[cursors[t] + 1]);
                }
                cursors[t] += 1;
                resolved += 1;
                progressed = true;
            }
        }
        if resolved == total {
            return Ok(());
        }
        if !progressed {
            return Err(TopologyError::CyclicDependency {
                unresolved: total - resolved,
            });
        }
    }
}

// ── Iterative mode ─────────────────────────────────────────

/// One full pass over all trails in sequence order. Nodes of ordinal `k`
/// across all trails are resolved together, so equal-ordinal deviation
/// neighbors are already final while unequal ones keep the positions of
/// the previous sweep.
fn sweep(form: &mut Diagram, trails: &[Trail]) {
    let depth = trails.iter().map(|trail| trail.nodes.len()).max().unwrap_or(0);
    let mut inflows = vec![Vector3::zeros(); trails.len()];
    for k in 0..depth {
        for (t, trail) in trails.iter().enumerate() {
            if k < trail.nodes.len() {
                inflows[t] = resolve_node(form, trail, k, inflows[t]);
            }
        }
    }
}

/// Largest force-balance defect over all non-support trail nodes.
fn peak_residual(form: &Diagram, trails: &[Trail]) -> f64 {
    let mut peak = 0.0f64;
    for trail in trails {
        for &node in &trail.nodes {
            if !form.is_node_support(node) {
                peak = peak.max(form.residual_force(node).norm());
            }
        }
    }
    peak
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relaxation_converges_when_residual_drops() {
        let state = Relaxation::start().advance(1e-9, 1e-6, 10);
        assert_eq!(state, Relaxation::Converged { steps: 1, residual: 1e-9 });
    }

    #[test]
    fn relaxation_exhausts_the_budget() {
        let mut state = Relaxation::start();
        for _ in 0..3 {
            state = state.advance(0.5, 1e-6, 3);
        }
        assert_eq!(state, Relaxation::Exhausted { residual: 0.5 });
    }

    #[test]
    fn relaxation_keeps_iterating_below_budget() {
        let state = Relaxation::start().advance(0.5, 1e-6, 10);
        assert_eq!(state, Relaxation::Iterating { step: 1, residual: 0.5 });
    }

    #[test]
    fn terminal_states_absorb_further_updates() {
        let converged = Relaxation::Converged { steps: 2, residual: 0.0 };
        assert_eq!(converged.advance(9.0, 1e-6, 10), converged);
        let exhausted = Relaxation::Exhausted { residual: 0.5 };
        assert_eq!(exhausted.advance(0.0, 1e-6, 10), exhausted);
    }
}
