//! Attributed graph of nodes and trail/deviation edges.
//!
//! The diagram is a pure container plus convenience queries; equilibrium
//! logic lives in [`crate::equilibrium`]. Node and edge attributes default
//! to zero so a diagram can be built incrementally: positions and loads
//! first, supports and edge parameters as they become known.

use nalgebra::{Point3, Vector3};
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::error::TopologyError;

/// Minimum load magnitude for a node to count as loaded.
///
/// Keeps floating noise from turning unloaded nodes into loaded ones.
pub const MIN_LOAD: f64 = 1e-6;

/// Chord length below which an edge direction is considered degenerate.
pub(crate) const DIRECTION_EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NodeKind {
    #[default]
    Plain,
    /// First node of a trail; stamped during trail derivation.
    Root,
    /// Node with an external reaction; trails must end here.
    Support,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Carries axial force between consecutive nodes of one trail and
    /// prescribes the distance the edge must span.
    Trail,
    /// Redirects force between trails; no positional constraint.
    Deviation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub position: Point3<f64>,
    /// Applied load, summed into the node's force balance.
    pub load: Vector3<f64>,
    /// Residual of the force balance; populated at supports after
    /// equilibrium, zero elsewhere.
    pub reaction: Vector3<f64>,
    pub kind: NodeKind,
    /// Ordinal along the owning trail; assigned during trail derivation.
    pub sequence: Option<usize>,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            position: Point3::origin(),
            load: Vector3::zeros(),
            reaction: Vector3::zeros(),
            kind: NodeKind::Plain,
            sequence: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Edge {
    pub kind: Option<EdgeKind>,
    /// Signed target length of a trail edge. A negative value places the
    /// next node against the outgoing force vector (compression member).
    pub length: f64,
    /// Signed axial force: a parameter on deviation edges, computed on
    /// trail edges. Positive is tension.
    pub force: f64,
}

/// An ordered chain of nodes walked from a root along trail edges.
///
/// Derived, never stored: recomputed by [`Diagram::trails`].
#[derive(Debug, Clone)]
pub struct Trail {
    pub root: NodeIndex,
    pub nodes: Vec<NodeIndex>,
    /// Trail edges between consecutive nodes; `edges.len() == nodes.len() - 1`.
    pub edges: Vec<EdgeIndex>,
}

/// Graph of nodes and trail/deviation edges with typed attributes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagram {
    graph: StableDiGraph<Node, Edge>,
}

impl Diagram {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Construction ───────────────────────────────────────

    pub fn add_node(&mut self, position: Point3<f64>) -> NodeIndex {
        self.graph.add_node(Node {
            position,
            ..Node::default()
        })
    }

    /// Marks `node` as a support.
    pub fn set_support(&mut self, node: NodeIndex) -> Result<(), TopologyError> {
        self.node_mut(node)
            .ok_or(TopologyError::MissingNode(node))?
            .kind = NodeKind::Support;
        Ok(())
    }

    /// Accumulates `load` into the node's applied load vector.
    pub fn add_load(&mut self, node: NodeIndex, load: Vector3<f64>) -> Result<(), TopologyError> {
        self.node_mut(node)
            .ok_or(TopologyError::MissingNode(node))?
            .load += load;
        Ok(())
    }

    /// Adds a trail edge from `u` to `v` with a signed target `length`.
    pub fn add_trail_edge(
        &mut self,
        u: NodeIndex,
        v: NodeIndex,
        length: f64,
    ) -> Result<EdgeIndex, TopologyError> {
        self.add_edge(
            u,
            v,
            Edge {
                kind: Some(EdgeKind::Trail),
                length,
                force: 0.0,
            },
        )
    }

    /// Adds a deviation edge between `u` and `v` with a signed `force`.
    pub fn add_deviation_edge(
        &mut self,
        u: NodeIndex,
        v: NodeIndex,
        force: f64,
    ) -> Result<EdgeIndex, TopologyError> {
        self.add_edge(
            u,
            v,
            Edge {
                kind: Some(EdgeKind::Deviation),
                length: 0.0,
                force,
            },
        )
    }

    fn add_edge(
        &mut self,
        u: NodeIndex,
        v: NodeIndex,
        attributes: Edge,
    ) -> Result<EdgeIndex, TopologyError> {
        if u == v {
            return Err(TopologyError::SelfLoop(u));
        }
        if !self.graph.contains_node(u) {
            return Err(TopologyError::MissingNode(u));
        }
        if !self.graph.contains_node(v) {
            return Err(TopologyError::MissingNode(v));
        }
        if self.graph.find_edge(u, v).is_some() || self.graph.find_edge(v, u).is_some() {
            return Err(TopologyError::DuplicateEdge(u, v));
        }
        Ok(self.graph.add_edge(u, v, attributes))
    }

    // ── Enumeration ────────────────────────────────────────

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    pub fn edges(&self) -> impl Iterator<Item = EdgeIndex> + '_ {
        self.graph.edge_indices()
    }

    pub fn node(&self, node: NodeIndex) -> Option<&Node> {
        self.graph.node_weight(node)
    }

    pub fn node_mut(&mut self, node: NodeIndex) -> Option<&mut Node> {
        self.graph.node_weight_mut(node)
    }

    pub fn edge(&self, edge: EdgeIndex) -> Option<&Edge> {
        self.graph.edge_weight(edge)
    }

    pub fn edge_mut(&mut self, edge: EdgeIndex) -> Option<&mut Edge> {
        self.graph.edge_weight_mut(edge)
    }

    pub fn endpoints(&self, edge: EdgeIndex) -> Option<(NodeIndex, NodeIndex)> {
        self.graph.edge_endpoints(edge)
    }

    // ── Node attributes ────────────────────────────────────
    //
    // The direct accessors panic on a stale key, like indexing a map;
    // use `node`/`edge` for fallible lookups.

    /// Panics if `node` is not in the diagram.
    pub fn position(&self, node: NodeIndex) -> Point3<f64> {
        self.graph[node].position
    }

    /// Panics if `node` is not in the diagram.
    pub fn set_position(&mut self, node: NodeIndex, position: Point3<f64>) {
        self.graph[node].position = position;
    }

    /// The load applied at `node`. Panics if `node` is not in the diagram.
    pub fn node_load(&self, node: NodeIndex) -> Vector3<f64> {
        self.graph[node].load
    }

    /// The reaction force at `node`, meaningful at supports after
    /// equilibrium. Panics if `node` is not in the diagram.
    pub fn reaction_force(&self, node: NodeIndex) -> Vector3<f64> {
        self.graph[node].reaction
    }

    /// Panics if `node` is not in the diagram.
    pub fn set_reaction(&mut self, node: NodeIndex, reaction: Vector3<f64>) {
        self.graph[node].reaction = reaction;
    }

    /// Panics if `node` is not in the diagram.
    pub fn set_sequence(&mut self, node: NodeIndex, sequence: usize) {
        self.graph[node].sequence = Some(sequence);
    }

    /// Panics if `node` is not in the diagram.
    pub fn set_node_kind(&mut self, node: NodeIndex, kind: NodeKind) {
        self.graph[node].kind = kind;
    }

    // ── Edge attributes ────────────────────────────────────

    /// Signed axial force in `edge`. Panics if `edge` is not in the diagram.
    pub fn edge_force(&self, edge: EdgeIndex) -> f64 {
        self.graph[edge].force
    }

    /// Panics if `edge` is not in the diagram.
    pub fn set_edge_force(&mut self, edge: EdgeIndex, force: f64) {
        self.graph[edge].force = force;
    }

    /// Signed target length of a trail edge. Panics if `edge` is not in
    /// the diagram.
    pub fn target_length(&self, edge: EdgeIndex) -> f64 {
        self.graph[edge].length
    }

    /// Panics if `edge` is not in the diagram.
    pub fn set_target_length(&mut self, edge: EdgeIndex, length: f64) {
        self.graph[edge].length = length;
    }

    /// Geometric length of `edge` computed from current node positions.
    pub fn edge_length(&self, edge: EdgeIndex) -> Option<f64> {
        let (u, v) = self.endpoints(edge)?;
        Some((self.position(v) - self.position(u)).norm())
    }

    // ── Filters and collections ────────────────────────────

    pub fn is_node_support(&self, node: NodeIndex) -> bool {
        self.node(node).is_some_and(|n| n.kind == NodeKind::Support)
    }

    /// Whether a large-enough load is applied at `node`.
    pub fn is_node_loaded(&self, node: NodeIndex, min_force: f64) -> bool {
        self.node(node).is_some_and(|n| n.load.norm() > min_force)
    }

    pub fn support_nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.nodes().filter(|&n| self.is_node_support(n))
    }

    /// Nodes with a load magnitude above [`MIN_LOAD`].
    pub fn loaded_nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.nodes().filter(|&n| self.is_node_loaded(n, MIN_LOAD))
    }

    /// Nodes with an outgoing trail edge and no incoming one.
    pub fn root_nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.nodes().filter(|&n| {
            self.trail_degree(n, Direction::Incoming) == 0
                && self.trail_degree(n, Direction::Outgoing) > 0
        })
    }

    pub fn number_of_support_nodes(&self) -> usize {
        self.support_nodes().count()
    }

    pub fn number_of_loaded_nodes(&self) -> usize {
        self.loaded_nodes().count()
    }

    pub fn trail_edges(&self) -> impl Iterator<Item = EdgeIndex> + '_ {
        self.edges()
            .filter(|&e| self.graph[e].kind == Some(EdgeKind::Trail))
    }

    pub fn deviation_edges(&self) -> impl Iterator<Item = EdgeIndex> + '_ {
        self.edges()
            .filter(|&e| self.graph[e].kind == Some(EdgeKind::Deviation))
    }

    /// Deviation edges incident to `node`, with the opposite endpoint.
    pub fn deviation_neighbors(
        &self,
        node: NodeIndex,
    ) -> impl Iterator<Item = (EdgeIndex, NodeIndex)> + '_ {
        self.graph
            .edges_directed(node, Direction::Outgoing)
            .chain(self.graph.edges_directed(node, Direction::Incoming))
            .filter(|e| e.weight().kind == Some(EdgeKind::Deviation))
            .map(move |e| {
                let other = if e.source() == node { e.target() } else { e.source() };
                (e.id(), other)
            })
    }

    /// Sum of incident edge forces and the applied load at `node`,
    /// excluding any reaction. Zero (within tolerance) at every non-support
    /// node of a form in equilibrium; the negated reaction at supports.
    pub fn residual_force(&self, node: NodeIndex) -> Vector3<f64> {
        let mut total = self.graph[node].load;
        let incident = self
            .graph
            .edges_directed(node, Direction::Outgoing)
            .chain(self.graph.edges_directed(node, Direction::Incoming));
        for edge in incident {
            let other = if edge.source() == node { edge.target() } else { edge.source() };
            let chord = self.position(other) - self.position(node);
            let length = chord.norm();
            if length > DIRECTION_EPS {
                total += chord / length * edge.weight().force;
            }
        }
        total
    }

    // ── Trails ─────────────────────────────────────────────

    fn trail_degree(&self, node: NodeIndex, direction: Direction) -> usize {
        self.graph
            .edges_directed(node, direction)
            .filter(|e| e.weight().kind == Some(EdgeKind::Trail))
            .count()
    }

    fn trail_successor(&self, node: NodeIndex) -> Option<(EdgeIndex, NodeIndex)> {
        self.graph
            .edges_directed(node, Direction::Outgoing)
            .find(|e| e.weight().kind == Some(EdgeKind::Trail))
            .map(|e| (e.id(), e.target()))
    }

    /// Walks trail edges from every root and returns the resulting chains.
    ///
    /// Fails when trail edges branch or merge. Nodes outside any trail and
    /// trails not ending at a support are legal here; the equilibrium
    /// solvers reject them.
    pub fn trails(&self) -> Result<Vec<Trail>, TopologyError> {
        for node in self.nodes() {
            for direction in [Direction::Outgoing, Direction::Incoming] {
                let degree = self.trail_degree(node, direction);
                if degree > 1 {
                    return Err(TopologyError::BranchingTrail { node, degree });
                }
            }
        }
        let mut trails = Vec::new();
        for root in self.root_nodes() {
            let mut nodes = vec![root];
            let mut edges = Vec::new();
            let mut current = root;
            while let Some((edge, next)) = self.trail_successor(current) {
                nodes.push(next);
                edges.push(edge);
                current = next;
            }
            trails.push(Trail { root, nodes, edges });
        }
        Ok(trails)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_defaults_are_zero() {
        let mut diagram = Diagram::new();
        let a = diagram.add_node(Point3::origin());
        let b = diagram.add_node(Point3::new(1.0, 0.0, 0.0));
        let e = diagram.add_trail_edge(a, b, 0.0).unwrap();

        assert_eq!(diagram.node_load(a), Vector3::zeros());
        assert_eq!(diagram.reaction_force(a), Vector3::zeros());
        assert_eq!(diagram.edge_force(e), 0.0);
        assert_eq!(diagram.node(a).unwrap().kind, NodeKind::Plain);
    }

    #[test]
    fn duplicate_and_reversed_edges_are_rejected() {
        let mut diagram = Diagram::new();
        let a = diagram.add_node(Point3::origin());
        let b = diagram.add_node(Point3::new(1.0, 0.0, 0.0));
        diagram.add_trail_edge(a, b, 1.0).unwrap();

        assert_eq!(
            diagram.add_deviation_edge(a, b, 1.0),
            Err(TopologyError::DuplicateEdge(a, b))
        );
        assert_eq!(
            diagram.add_trail_edge(b, a, 1.0),
            Err(TopologyError::DuplicateEdge(b, a))
        );
        assert_eq!(diagram.add_trail_edge(a, a, 1.0), Err(TopologyError::SelfLoop(a)));
    }

    #[test]
    fn loaded_filter_ignores_noise() {
        let mut diagram = Diagram::new();
        let a = diagram.add_node(Point3::origin());
        let b = diagram.add_node(Point3::origin());
        diagram.add_load(a, Vector3::new(0.0, 0.0, -1.0)).unwrap();
        diagram.add_load(b, Vector3::new(0.0, 0.0, 1e-9)).unwrap();

        let loaded: Vec<_> = diagram.loaded_nodes().collect();
        assert_eq!(loaded, vec![a]);
        assert_eq!(diagram.number_of_loaded_nodes(), 1);
    }

    #[test]
    fn loads_accumulate() {
        let mut diagram = Diagram::new();
        let a = diagram.add_node(Point3::origin());
        diagram.add_load(a, Vector3::new(1.0, 0.0, 0.0)).unwrap();
        diagram.add_load(a, Vector3::new(0.0, 2.0, 0.0)).unwrap();
        assert_eq!(diagram.node_load(a), Vector3::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn trails_walk_from_roots() {
        let mut diagram = Diagram::new();
        let a = diagram.add_node(Point3::origin());
        let b = diagram.add_node(Point3::new(1.0, 0.0, 0.0));
        let c = diagram.add_node(Point3::new(2.0, 0.0, 0.0));
        let d = diagram.add_node(Point3::new(0.0, 1.0, 0.0));
        diagram.add_trail_edge(a, b, 1.0).unwrap();
        diagram.add_trail_edge(b, c, 1.0).unwrap();
        diagram.add_deviation_edge(d, b, 1.0).unwrap();

        let trails = diagram.trails().unwrap();
        assert_eq!(trails.len(), 1);
        assert_eq!(trails[0].root, a);
        assert_eq!(trails[0].nodes, vec![a, b, c]);
        assert_eq!(trails[0].edges.len(), 2);
    }

    #[test]
    fn branching_trails_are_rejected() {
        let mut diagram = Diagram::new();
        let a = diagram.add_node(Point3::origin());
        let b = diagram.add_node(Point3::new(1.0, 0.0, 0.0));
        let c = diagram.add_node(Point3::new(2.0, 0.0, 0.0));
        diagram.add_trail_edge(a, b, 1.0).unwrap();
        diagram.add_trail_edge(a, c, 1.0).unwrap();

        assert!(matches!(
            diagram.trails(),
            Err(TopologyError::BranchingTrail { degree: 2, .. })
        ));
    }

    #[test]
    fn geometric_length_follows_positions() {
        let mut diagram = Diagram::new();
        let a = diagram.add_node(Point3::origin());
        let b = diagram.add_node(Point3::new(3.0, 4.0, 0.0));
        let e = diagram.add_trail_edge(a, b, -5.0).unwrap();

        assert_eq!(diagram.edge_length(e), Some(5.0));
        assert_eq!(diagram.target_length(e), -5.0);
    }
}
