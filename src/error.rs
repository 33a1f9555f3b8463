//! Error types, split per concern: topology validation, equilibrium
//! computation, goal/constraint registration, and the optimization driver.

use petgraph::stable_graph::{EdgeIndex, NodeIndex};
use thiserror::Error;

use crate::diagram::EdgeKind;

/// Structural defects in a diagram that make equilibrium impossible.
///
/// Fatal for the evaluation that hit them; the input diagram is never
/// partially mutated because solvers work on their own copy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("node {0:?} does not exist in the diagram")]
    MissingNode(NodeIndex),
    #[error("an edge between {0:?} and {1:?} already exists")]
    DuplicateEdge(NodeIndex, NodeIndex),
    #[error("self-loop on node {0:?} is not allowed")]
    SelfLoop(NodeIndex),
    #[error("edge {0:?} has no type assigned")]
    UntypedEdge(EdgeIndex),
    #[error("node {node:?} carries {degree} trail edges in one direction, trails may not branch")]
    BranchingTrail { node: NodeIndex, degree: usize },
    #[error("trail rooted at {root:?} ends at {end:?}, which is not a support")]
    TrailWithoutSupport { root: NodeIndex, end: NodeIndex },
    #[error("support node {0:?} sits in the interior of a trail")]
    SupportWithinTrail(NodeIndex),
    #[error("node {0:?} belongs to no trail")]
    NodeOutsideTrails(NodeIndex),
    #[error("deviation edges form a cyclic dependency, {unresolved} nodes cannot be resolved in a single pass")]
    CyclicDependency { unresolved: usize },
}

/// Failure of an equilibrium computation.
///
/// `Convergence` is recoverable: it reports the residual reached so the
/// caller can retry with a looser tolerance or a larger iteration budget.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EquilibriumError {
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error("equilibrium did not converge, residual {residual:.3e} after {iterations} iterations")]
    Convergence { residual: f64, iterations: usize },
}

/// Invalid goal or constraint, raised at registration time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GoalError {
    #[error("goal references unknown node {0:?}")]
    UnknownNode(NodeIndex),
    #[error("goal or constraint references unknown edge {0:?}")]
    UnknownEdge(EdgeIndex),
    #[error("constraint on edge {edge:?} expects a {expected:?} edge")]
    KindMismatch { edge: EdgeIndex, expected: EdgeKind },
    #[error("constraint bounds [{lower}, {upper}] are not a valid interval")]
    InvertedBounds { lower: f64, upper: f64 },
    #[error("plane normal has zero length")]
    DegeneratePlane,
}

/// Failure of an optimization run.
#[derive(Debug, Error)]
pub enum SolveError {
    #[error(transparent)]
    Equilibrium(#[from] EquilibriumError),
    #[error("no constraints registered, there are no parameters to optimize")]
    NoParameters,
    #[error("numerical solver failed: {0}")]
    Solver(String),
}

impl From<argmin::core::Error> for SolveError {
    fn from(e: argmin::core::Error) -> Self {
        Self::Solver(e.to_string())
    }
}
