//! Goals score an equilibrated form against targets; constraints bound the
//! editable edge parameters the optimizer is allowed to move.
//!
//! Both are closed sets of variants dispatched by exhaustive matches, so a
//! new kind cannot be half-wired: the compiler flags every site that needs
//! to learn about it.

use nalgebra::Point3;
use petgraph::stable_graph::{EdgeIndex, NodeIndex};

use crate::diagram::{Diagram, EdgeKind};
use crate::error::GoalError;
use crate::geometry::Plane;

/// A measured quantity on a form, paired with a target by each goal kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    Point(Point3<f64>),
    Scalar(f64),
}

/// Target measurement a form is scored against.
///
/// Goals are immutable once created and own no diagram state; they are
/// re-evaluated against whichever form the solver produced last.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Goal {
    /// Pulls a node to a fixed point.
    Point { node: NodeIndex, target: Point3<f64> },
    /// Pulls a node onto a plane.
    Plane { node: NodeIndex, plane: Plane },
    /// Drives an edge's axial force to a target value.
    EdgeForce { edge: EdgeIndex, target: f64 },
}

impl Goal {
    /// Every key the goal references must exist in `diagram`.
    pub fn validate(&self, diagram: &Diagram) -> Result<(), GoalError> {
        match self {
            Goal::Point { node, .. } | Goal::Plane { node, .. } => {
                if diagram.node(*node).is_none() {
                    return Err(GoalError::UnknownNode(*node));
                }
            }
            Goal::EdgeForce { edge, .. } => {
                if diagram.edge(*edge).is_none() {
                    return Err(GoalError::UnknownEdge(*edge));
                }
            }
        }
        Ok(())
    }

    /// The measured quantity on `form`.
    pub fn reference(&self, form: &Diagram) -> Measurement {
        match self {
            Goal::Point { node, .. } | Goal::Plane { node, .. } => {
                Measurement::Point(form.position(*node))
            }
            Goal::EdgeForce { edge, .. } => Measurement::Scalar(form.edge_force(*edge)),
        }
    }

    /// The desired value; for plane goals, the projection of the measured
    /// point onto the plane.
    pub fn target(&self, form: &Diagram) -> Measurement {
        match self {
            Goal::Point { target, .. } => Measurement::Point(*target),
            Goal::Plane { node, plane } => {
                Measurement::Point(plane.closest_point(&form.position(*node)))
            }
            Goal::EdgeForce { target, .. } => Measurement::Scalar(*target),
        }
    }

    /// Squared deviation between the measured quantity and its target.
    pub fn error(&self, form: &Diagram) -> f64 {
        match self {
            Goal::Point { node, target } => (form.position(*node) - *target).norm_squared(),
            Goal::Plane { node, plane } => {
                let point = form.position(*node);
                (point - plane.closest_point(&point)).norm_squared()
            }
            Goal::EdgeForce { edge, target } => {
                let difference = form.edge_force(*edge) - *target;
                difference * difference
            }
        }
    }
}

/// Interval bound on one editable parameter.
///
/// Out-of-range values are clamped rather than rejected, which keeps the
/// search space convex for the optimizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constraint {
    /// Trail edge target length confined to `[lower, upper]`.
    TrailLength { edge: EdgeIndex, lower: f64, upper: f64 },
    /// Deviation edge force confined to `[lower, upper]`.
    DeviationForce { edge: EdgeIndex, lower: f64, upper: f64 },
}

impl Constraint {
    pub fn edge(&self) -> EdgeIndex {
        match self {
            Constraint::TrailLength { edge, .. } | Constraint::DeviationForce { edge, .. } => *edge,
        }
    }

    pub fn bounds(&self) -> (f64, f64) {
        match self {
            Constraint::TrailLength { lower, upper, .. }
            | Constraint::DeviationForce { lower, upper, .. } => (*lower, *upper),
        }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        let (lower, upper) = self.bounds();
        value.clamp(lower, upper)
    }

    pub fn contains(&self, value: f64) -> bool {
        let (lower, upper) = self.bounds();
        lower <= value && value <= upper
    }

    /// The edge must exist, match the constraint's kind, and the interval
    /// must be ordered.
    pub fn validate(&self, diagram: &Diagram) -> Result<(), GoalError> {
        let (lower, upper) = self.bounds();
        if !(lower <= upper) {
            return Err(GoalError::InvertedBounds { lower, upper });
        }
        let edge = self.edge();
        let Some(attributes) = diagram.edge(edge) else {
            return Err(GoalError::UnknownEdge(edge));
        };
        let expected = match self {
            Constraint::TrailLength { .. } => EdgeKind::Trail,
            Constraint::DeviationForce { .. } => EdgeKind::Deviation,
        };
        if attributes.kind != Some(expected) {
            return Err(GoalError::KindMismatch { edge, expected });
        }
        Ok(())
    }

    /// Current value of the bounded parameter in `diagram`.
    pub fn value(&self, diagram: &Diagram) -> f64 {
        match self {
            Constraint::TrailLength { edge, .. } => diagram.target_length(*edge),
            Constraint::DeviationForce { edge, .. } => diagram.edge_force(*edge),
        }
    }

    /// Writes `value` into `diagram`, clamped to the bounds.
    pub fn apply(&self, diagram: &mut Diagram, value: f64) {
        let value = self.clamp(value);
        match self {
            Constraint::TrailLength { edge, .. } => diagram.set_target_length(*edge, value),
            Constraint::DeviationForce { edge, .. } => diagram.set_edge_force(*edge, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn two_node_diagram() -> (Diagram, NodeIndex, EdgeIndex, EdgeIndex) {
        let mut diagram = Diagram::new();
        let a = diagram.add_node(Point3::origin());
        let b = diagram.add_node(Point3::new(1.0, 0.0, 0.0));
        let c = diagram.add_node(Point3::new(0.0, 1.0, 0.0));
        let trail = diagram.add_trail_edge(a, b, -1.0).unwrap();
        let deviation = diagram.add_deviation_edge(a, c, 1.0).unwrap();
        (diagram, a, trail, deviation)
    }

    #[test]
    fn goal_on_unknown_key_is_rejected() {
        let (diagram, _, _, _) = two_node_diagram();
        let goal = Goal::Point {
            node: NodeIndex::new(99),
            target: Point3::origin(),
        };
        assert_eq!(goal.validate(&diagram), Err(GoalError::UnknownNode(NodeIndex::new(99))));

        let goal = Goal::EdgeForce {
            edge: EdgeIndex::new(99),
            target: 1.0,
        };
        assert_eq!(goal.validate(&diagram), Err(GoalError::UnknownEdge(EdgeIndex::new(99))));
    }

    #[test]
    fn goal_error_vanishes_on_target() {
        let (diagram, a, _, _) = two_node_diagram();
        let goal = Goal::Point {
            node: a,
            target: diagram.position(a),
        };
        assert_eq!(goal.error(&diagram), 0.0);
    }

    #[test]
    fn plane_goal_measures_squared_offset() {
        let (diagram, a, _, _) = two_node_diagram();
        let plane = Plane::new(Point3::new(0.0, 0.0, 3.0), Vector3::z()).unwrap();
        let goal = Goal::Plane { node: a, plane };
        assert!((goal.error(&diagram) - 9.0).abs() < 1e-12);
    }

    #[test]
    fn constraint_kind_must_match_edge_kind() {
        let (diagram, _, trail, deviation) = two_node_diagram();
        let constraint = Constraint::TrailLength {
            edge: deviation,
            lower: -2.0,
            upper: -1.0,
        };
        assert_eq!(
            constraint.validate(&diagram),
            Err(GoalError::KindMismatch {
                edge: deviation,
                expected: EdgeKind::Trail,
            })
        );
        let constraint = Constraint::DeviationForce {
            edge: trail,
            lower: 0.0,
            upper: 1.0,
        };
        assert!(constraint.validate(&diagram).is_err());
    }

    #[test]
    fn inverted_and_nan_bounds_are_rejected() {
        let (diagram, _, trail, _) = two_node_diagram();
        let constraint = Constraint::TrailLength {
            edge: trail,
            lower: 2.0,
            upper: 1.0,
        };
        assert!(constraint.validate(&diagram).is_err());
        let constraint = Constraint::TrailLength {
            edge: trail,
            lower: f64::NAN,
            upper: 1.0,
        };
        assert!(constraint.validate(&diagram).is_err());
    }

    #[test]
    fn clamping_keeps_values_in_the_interval() {
        let (mut diagram, _, trail, _) = two_node_diagram();
        let constraint = Constraint::TrailLength {
            edge: trail,
            lower: -3.0,
            upper: -0.5,
        };
        assert_eq!(constraint.clamp(-10.0), -3.0);
        assert_eq!(constraint.clamp(5.0), -0.5);
        assert!(constraint.contains(-1.0));

        constraint.apply(&mut diagram, -10.0);
        assert_eq!(diagram.target_length(trail), -3.0);
    }
}
