//! **Catena** — form-finding for trail/deviation structures.
//!
//! A structure is modeled as a directed graph of *trails* (chains of trail
//! edges carrying axial force from a root node to a support) tied together
//! by *deviation* edges that redirect force between trails. The crate
//! implements the full pipeline:
//!
//! 1. **Diagram** (`diagram`): attributed graph of nodes and edges.
//! 2. **Equilibrium** (`equilibrium`): direct and iterative solvers that
//!    turn a topology into a form (positions, forces, reactions).
//! 3. **Goals** (`goals`): point / plane / edge-force targets and bounds
//!    on the editable edge parameters.
//! 4. **Objective** (`objective`): scalar loss with finite-difference
//!    gradients over the parameter vector.
//! 5. **Optimizer** (`optimizer`): bounded L-BFGS / Nelder-Mead search via
//!    `argmin`.

pub mod diagram;
pub mod equilibrium;
pub mod error;
pub mod geometry;
pub mod goals;
pub mod objective;
pub mod optimizer;
