//! Barnes-Hut octree forest.
//!
//! The simulation box is tiled by a grid of root boxes, each holding its own
//! octree. After [`Tree::update`] places every particle in a leaf,
//! [`Tree::update_gravity_data`] aggregates mass, center of mass and
//! (optionally) the quadrupole moment bottom-up, and [`Tree::gravity_view`]
//! hands the result to force and collision code. With the `distributed`
//! feature, ranks owning disjoint blocks of root boxes exchange the parts of
//! their trees each peer needs.

pub mod boundary;
pub mod cell;
pub mod config;
pub mod error;
pub mod octree;
pub mod particle;
pub mod simulation;
pub mod tree;
pub mod vector;
pub mod view;

#[cfg(feature = "distributed")]
pub mod distributed;

pub use cell::{CellKind, Moment, NodeId, Quadrupole, TreeCell};
pub use config::{RebuildPolicy, TreeConfig};
pub use error::{ProtocolError, Result, TreeError};
pub use octree::Octree;
pub use particle::{Particle, PointMass};
pub use simulation::Simulation;
pub use tree::{Tree, TreeParam, TreeStats};
pub use vector::Vector;
pub use view::{CellSummary, GravityView};
