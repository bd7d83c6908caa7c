//! Essential-tree exchange between ranks that each own a block of root boxes.
//!
//! Each step, after the local tree is built and aggregated, a rank exports
//! to every peer the part of its tree that peer needs, and merges what it
//! receives into an [`EssentialTree`] kept apart from its own tree.

mod essential;
mod transport;

use std::ops::Range;

use itertools::iproduct;

use crate::boundary::{Boundary, BoundaryContext};
use crate::cell::Moment;
use crate::config::TreeConfig;
use crate::error::{Result, TreeError};
use crate::tree::Tree;
use crate::vector::Vector;

pub use essential::{
    export_for_collisions, export_for_gravity, prepare_essential_tree_for_collisions,
    prepare_essential_tree_for_gravity, EssentialNode, EssentialParticle, EssentialTree,
};
pub use transport::{ChannelTransport, Message, Transport};

/// Which rank this is and how many there are. Root boxes are handed out in
/// contiguous blocks of `n_root / n_ranks`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decomposition {
    pub rank: usize,
    pub n_ranks: usize,
}

impl Decomposition {
    pub fn new(rank: usize, n_ranks: usize) -> Result<Self> {
        if n_ranks == 0 || rank >= n_ranks {
            return Err(TreeError::InvalidConfig(format!(
                "rank {rank} is not valid for {n_ranks} ranks"
            )));
        }
        Ok(Self { rank, n_ranks })
    }

    pub fn single() -> Self {
        Self {
            rank: 0,
            n_ranks: 1,
        }
    }

    pub fn roots_per_rank(&self, n_root: usize) -> Result<usize> {
        if n_root % self.n_ranks != 0 {
            return Err(TreeError::InvalidConfig(format!(
                "{n_root} root boxes cannot be split evenly over {} ranks",
                self.n_ranks
            )));
        }
        Ok(n_root / self.n_ranks)
    }

    pub fn roots_of(&self, rank: usize, n_root: usize) -> Result<Range<usize>> {
        let per = self.roots_per_rank(n_root)?;
        Ok(rank * per..(rank + 1) * per)
    }

    pub fn owned_roots(&self, n_root: usize) -> Result<Range<usize>> {
        self.roots_of(self.rank, n_root)
    }

    pub fn owner_of(&self, root_box: usize, n_root: usize) -> Result<usize> {
        Ok(root_box / self.roots_per_rank(n_root)?)
    }

    pub fn peers(&self) -> impl Iterator<Item = usize> {
        let me = self.rank;
        (0..self.n_ranks).filter(move |&r| r != me)
    }
}

impl<M: Moment> Tree<M> {
    /// Tree for one rank of a decomposition; only owned root boxes accept particles.
    pub fn for_rank(config: TreeConfig, decomposition: Decomposition) -> Result<Self> {
        let owned = decomposition.owned_roots(config.n_root())?;
        Self::with_owned_roots(config, owned)
    }
}

/// The root boxes of one peer, together with their ghost-box images.
#[derive(Clone, Debug)]
pub struct PeerRegion {
    boxes: Vec<Vector>,
    half: f64,
}

impl PeerRegion {
    pub fn new(
        config: &TreeConfig,
        decomposition: &Decomposition,
        peer: usize,
        t: f64,
    ) -> Result<Self> {
        let roots = decomposition.roots_of(peer, config.n_root())?;
        let box_size = config.box_size();
        let ctx = BoundaryContext {
            t,
            box_size: &box_size,
        };

        let (ngx, ngy, ngz) = match config.boundary {
            Boundary::None => (0, 0, 0),
            _ => (
                config.n_ghost_x as isize,
                config.n_ghost_y as isize,
                config.n_ghost_z as isize,
            ),
        };

        let mut boxes = Vec::new();
        for root_box in roots {
            let center = config.root_center(root_box);
            for (i, j, k) in iproduct!(-ngx..=ngx, -ngy..=ngy, -ngz..=ngz) {
                let gb = config.boundary.get_ghost_box(&ctx, i, j, k);
                boxes.push(center + gb.position);
            }
        }

        Ok(Self {
            boxes,
            half: config.root_size / 2.0,
        })
    }

    /// Distance from `pos` to the nearest point of the region.
    pub fn distance_to_point(&self, pos: Vector) -> f64 {
        self.gap(pos, 0.0)
    }

    /// Gap between the region and a cube of edge `width` centered at `center`.
    pub fn distance_to_cube(&self, center: Vector, width: f64) -> f64 {
        self.gap(center, width / 2.0)
    }

    fn gap(&self, center: Vector, half: f64) -> f64 {
        let reach = self.half + half;
        self.boxes
            .iter()
            .map(|b| (center - *b).map(|d| (d.abs() - reach).max(0.0)).norm())
            .fold(f64::INFINITY, f64::min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_contiguous() {
        let d = Decomposition::new(1, 3).unwrap();
        assert_eq!(d.owned_roots(6).unwrap(), 2..4);
        assert_eq!(d.owner_of(5, 6).unwrap(), 2);
        assert_eq!(d.peers().collect::<Vec<_>>(), vec![0, 2]);
        assert!(d.roots_per_rank(7).is_err());
    }

    #[test]
    fn region_distance_sees_ghost_images() {
        let cfg = TreeConfig::configure_box(1.0, 2, 1, 1)
            .with_ghosts(1, 0, 0)
            .with_boundary(Boundary::Periodic);
        let d = Decomposition::new(0, 2).unwrap();
        // Rank 1 owns x in [0, 1]; its image at x in [-2, -1] is 0.2 away.
        let region = PeerRegion::new(&cfg, &d, 1, 0.0).unwrap();
        let p = Vector::new(-0.8, 0.0, 0.0);
        assert!((region.distance_to_point(p) - 0.2).abs() < 1e-12);
        assert_eq!(region.distance_to_point(Vector::new(0.5, 0.0, 0.0)), 0.0);
    }
}
