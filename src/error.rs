use thiserror::Error;

use crate::vector::Vector;

pub type Result<T> = std::result::Result<T, TreeError>;

/// Fatal conditions raised by the tree layer. None of them are recoverable
/// within a step: the tree is left marked for a full rebuild.
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("particle {index} at {position:?} lies outside every root box")]
    OutsideDomain { index: usize, position: Vector },

    #[error("particle {index} lies in root box {root_box}, which is owned by rank {owner}")]
    ForeignParticle {
        index: usize,
        root_box: usize,
        owner: usize,
    },

    #[error(
        "particles {first} and {second} could not be separated after {depth} splits \
         (coincident positions?)"
    )]
    DegenerateInsertion {
        first: usize,
        second: usize,
        depth: usize,
    },

    #[error("particle index {index} is out of range for {len} particles")]
    ParticleIndex { index: usize, len: usize },

    #[error("invalid tree configuration: {0}")]
    InvalidConfig(String),

    #[error("gravity data read before update_gravity_data completed")]
    GravityDataStale,

    #[error("essential tree protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("essential tree exchange incomplete: nothing received from rank {peer}")]
    IncompleteExchange { peer: usize },

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Malformed or out-of-order essential-tree traffic.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("node in root box {root_box} at {center:?} arrived before its parent")]
    OrphanNode { root_box: usize, center: Vector },

    #[error("node in root box {root_box} at {center:?} was received twice")]
    DuplicateNode { root_box: usize, center: Vector },

    #[error(
        "node in root box {root_box} at {center:?} (width {width}) does not fit the octree grid"
    )]
    Misaligned {
        root_box: usize,
        center: Vector,
        width: f64,
    },

    #[error("root box {root_box} is out of range or owned by the receiving rank")]
    ForeignRootBox { root_box: usize },

    #[error("rank {from} sent {got} while {expected} was expected")]
    WrongRound {
        from: usize,
        expected: &'static str,
        got: &'static str,
    },
}
