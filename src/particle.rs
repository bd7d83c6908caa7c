use serde::{Deserialize, Serialize};

use crate::vector::Vector;

#[derive(Default, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub x: f64,
    pub y: f64,
    pub z: f64,

    pub vx: f64,
    pub vy: f64,
    pub vz: f64,

    pub ax: f64,
    pub ay: f64,
    pub az: f64,

    pub m: f64,
    pub r: f64,

    /// Marked for deletion; the next tree update detaches it.
    #[serde(default)]
    pub removed: bool,
}

impl Particle {
    pub fn at(x: f64, y: f64, z: f64, m: f64) -> Self {
        Particle {
            x,
            y,
            z,
            m,
            ..Default::default()
        }
    }

    pub fn position(&self) -> Vector {
        Vector::new(self.x, self.y, self.z)
    }
}

/// What the tree needs to know about a body. Implemented by local particles
/// and by particles received from other ranks.
pub trait PointMass {
    fn position(&self) -> Vector;
    fn mass(&self) -> f64;
    fn radius(&self) -> f64;

    /// Removed bodies are never attached to a tree.
    fn is_removed(&self) -> bool {
        false
    }
}

impl PointMass for Particle {
    #[inline]
    fn position(&self) -> Vector {
        Particle::position(self)
    }

    #[inline]
    fn mass(&self) -> f64 {
        self.m
    }

    #[inline]
    fn radius(&self) -> f64 {
        self.r
    }

    #[inline]
    fn is_removed(&self) -> bool {
        self.removed
    }
}
