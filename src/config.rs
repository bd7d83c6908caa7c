//! Tree configuration, loadable from YAML.
//!
//! ```yaml
//! root_size: 50.0      # edge of one root box
//! root_x: 1            # root boxes along x
//! root_y: 1
//! root_z: 1
//! n_ghost_x: 3         # ghost-box images used by distance tests
//! n_ghost_y: 3
//! n_ghost_z: 0
//! max_depth: 64        # split guard against coincident particles
//! rebuild: full        # or "incremental"
//! opening_angle: 0.5   # Barnes-Hut theta used when exporting essential nodes
//! collision_margin: 0.0
//! boundary: periodic
//! ```

use std::io::Read;

use serde::Deserialize;

use crate::boundary::Boundary;
use crate::error::{Result, TreeError};
use crate::vector::Vector;

/// How `Tree::update` treats the structure left over from the previous step.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RebuildPolicy {
    /// Discard every arena and reinsert all particles.
    #[default]
    Full,
    /// Keep cells whose particles did not leave them and reinsert the rest.
    Incremental,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TreeConfig {
    pub root_size: f64,
    #[serde(default = "one")]
    pub root_x: usize,
    #[serde(default = "one")]
    pub root_y: usize,
    #[serde(default = "one")]
    pub root_z: usize,

    #[serde(default)]
    pub n_ghost_x: usize,
    #[serde(default)]
    pub n_ghost_y: usize,
    #[serde(default)]
    pub n_ghost_z: usize,

    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default)]
    pub rebuild: RebuildPolicy,
    #[serde(default = "default_opening_angle")]
    pub opening_angle: f64,
    #[serde(default)]
    pub collision_margin: f64,
    #[serde(default)]
    pub boundary: Boundary,
}

fn one() -> usize {
    1
}

fn default_max_depth() -> usize {
    64
}

fn default_opening_angle() -> f64 {
    0.5
}

impl Default for TreeConfig {
    fn default() -> Self {
        TreeConfig {
            root_size: 1.0,
            root_x: 1,
            root_y: 1,
            root_z: 1,
            n_ghost_x: 0,
            n_ghost_y: 0,
            n_ghost_z: 0,
            max_depth: default_max_depth(),
            rebuild: RebuildPolicy::Full,
            opening_angle: default_opening_angle(),
            collision_margin: 0.0,
            boundary: Boundary::None,
        }
    }
}

impl TreeConfig {
    pub fn configure_box(root_size: f64, x: usize, y: usize, z: usize) -> Self {
        TreeConfig {
            root_size,
            root_x: x,
            root_y: y,
            root_z: z,
            ..Default::default()
        }
    }

    pub fn with_ghosts(mut self, x: usize, y: usize, z: usize) -> Self {
        self.n_ghost_x = x;
        self.n_ghost_y = y;
        self.n_ghost_z = z;
        self
    }

    pub fn with_rebuild(mut self, rebuild: RebuildPolicy) -> Self {
        self.rebuild = rebuild;
        self
    }

    pub fn with_boundary(mut self, boundary: Boundary) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let cfg: TreeConfig =
            serde_yaml::from_str(s).map_err(|e| TreeError::InvalidConfig(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_reader<R: Read>(reader: R) -> Result<Self> {
        let cfg: TreeConfig =
            serde_yaml::from_reader(reader).map_err(|e| TreeError::InvalidConfig(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.root_size.is_finite() && self.root_size > 0.0) {
            return Err(TreeError::InvalidConfig(format!(
                "root_size must be positive, got {}",
                self.root_size
            )));
        }
        if self.root_x == 0 || self.root_y == 0 || self.root_z == 0 {
            return Err(TreeError::InvalidConfig(
                "number of root boxes in each dimension must be positive".into(),
            ));
        }
        if self.max_depth == 0 {
            return Err(TreeError::InvalidConfig("max_depth must be at least 1".into()));
        }
        if !(self.opening_angle >= 0.0) {
            return Err(TreeError::InvalidConfig(format!(
                "opening_angle must be non-negative, got {}",
                self.opening_angle
            )));
        }
        if !(self.collision_margin >= 0.0) {
            return Err(TreeError::InvalidConfig(format!(
                "collision_margin must be non-negative, got {}",
                self.collision_margin
            )));
        }
        Ok(())
    }

    pub fn n_root(&self) -> usize {
        self.root_x * self.root_y * self.root_z
    }

    pub fn box_size(&self) -> Vector {
        Vector::new(
            self.root_size * self.root_x as f64,
            self.root_size * self.root_y as f64,
            self.root_size * self.root_z as f64,
        )
    }

    /// Center of root box `index`; boxes are laid out x fastest, then y, then z.
    pub fn root_center(&self, index: usize) -> Vector {
        let ix = index % self.root_x;
        let iy = (index / self.root_x) % self.root_y;
        let iz = index / (self.root_x * self.root_y);
        let half = self.box_size() * 0.5;
        Vector::new(
            -half.x() + self.root_size * (ix as f64 + 0.5),
            -half.y() + self.root_size * (iy as f64 + 0.5),
            -half.z() + self.root_size * (iz as f64 + 0.5),
        )
    }

    /// Root box containing `pos`, or `None` if it lies outside the box.
    /// The upper faces of the box belong to the last root along each axis.
    pub fn root_box_for(&self, pos: Vector) -> Option<usize> {
        let half = self.box_size() * 0.5;
        let axis = |c: f64, h: f64, n: usize| -> Option<usize> {
            if !(c >= -h && c <= h) {
                return None;
            }
            let i = ((c + h) / self.root_size).floor() as usize;
            Some(i.min(n - 1))
        };
        let ix = axis(pos.x(), half.x(), self.root_x)?;
        let iy = axis(pos.y(), half.y(), self.root_y)?;
        let iz = axis(pos.z(), half.z(), self.root_z)?;
        Some((iz * self.root_y + iy) * self.root_x + ix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_layout_round_trips_through_centers() {
        let cfg = TreeConfig::configure_box(2.0, 3, 2, 1);
        assert_eq!(cfg.n_root(), 6);
        for i in 0..cfg.n_root() {
            assert_eq!(cfg.root_box_for(cfg.root_center(i)), Some(i));
        }
    }

    #[test]
    fn upper_face_belongs_to_last_root() {
        let cfg = TreeConfig::configure_box(2.0, 2, 1, 1);
        assert_eq!(cfg.root_box_for(Vector::new(2.0, 1.0, 1.0)), Some(1));
        assert_eq!(cfg.root_box_for(Vector::new(2.000001, 0.0, 0.0)), None);
        assert_eq!(cfg.root_box_for(Vector::new(f64::NAN, 0.0, 0.0)), None);
    }

    #[test]
    fn parses_yaml_with_defaults() {
        let cfg = TreeConfig::from_yaml_str(
            "root_size: 50.0\nn_ghost_x: 3\nn_ghost_y: 3\n\
             rebuild: incremental\nboundary: periodic\n",
        )
        .unwrap();
        assert_eq!(cfg.root_x, 1);
        assert_eq!(cfg.n_ghost_x, 3);
        assert_eq!(cfg.n_ghost_z, 0);
        assert_eq!(cfg.max_depth, 64);
        assert_eq!(cfg.rebuild, RebuildPolicy::Incremental);
        assert_eq!(cfg.boundary, Boundary::Periodic);
    }

    #[test]
    fn reads_yaml_from_a_reader() {
        let yaml = b"root_size: 25.0\nroot_x: 2\nroot_y: 2\nboundary: periodic\n";
        let cfg = TreeConfig::from_yaml_reader(&yaml[..]).unwrap();
        assert_eq!(cfg.n_root(), 4);
        assert_eq!(cfg.boundary, Boundary::Periodic);

        let err = TreeConfig::from_yaml_reader(&b"root_size: -1.0\n"[..]).unwrap_err();
        assert!(matches!(err, TreeError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_zero_root_counts() {
        let err = TreeConfig::from_yaml_str("root_size: 1.0\nroot_y: 0\n").unwrap_err();
        assert!(matches!(err, TreeError::InvalidConfig(_)));
    }
}
