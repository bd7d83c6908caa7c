//! The forest of octrees, one per root box.

use std::ops::Range;

use rayon::iter::{
    IndexedParallelIterator, IntoParallelRefIterator, IntoParallelRefMutIterator, ParallelIterator,
};
use tracing::{debug, error, trace, warn};

use crate::cell::{CellKind, Moment};
use crate::config::{RebuildPolicy, TreeConfig};
use crate::error::{Result, TreeError};
use crate::octree::Octree;
use crate::particle::PointMass;
use crate::vector::Vector;
use crate::view::GravityView;

#[cfg(feature = "quadrupole")]
pub type TreeParam = crate::cell::Quadrupole;

#[cfg(not(feature = "quadrupole"))]
pub type TreeParam = ();

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub cells: usize,
    pub leaves: usize,
    pub internal: usize,
    pub population: usize,
    pub max_depth: usize,
}

pub struct Tree<M = ()> {
    config: TreeConfig,
    roots: Vec<Octree<M>>,
    owned: Range<usize>,
    /// One past the highest index ever attached.
    tracked: usize,
    gravity_ready: bool,
    /// Set after a failed insertion; the next update starts from scratch.
    dirty: bool,
}

impl<M: Moment> Tree<M> {
    pub fn new(config: TreeConfig) -> Result<Self> {
        let n_root = config.n_root();
        Self::with_owned_roots(config, 0..n_root)
    }

    /// A tree that only accepts particles in root boxes `owned`.
    pub(crate) fn with_owned_roots(config: TreeConfig, owned: Range<usize>) -> Result<Self> {
        config.validate()?;
        let roots = (0..config.n_root())
            .map(|i| Octree::new(config.root_center(i), config.root_size, config.max_depth))
            .collect();
        Ok(Self {
            config,
            roots,
            owned,
            tracked: 0,
            gravity_ready: false,
            dirty: false,
        })
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn n_root(&self) -> usize {
        self.roots.len()
    }

    pub fn root(&self, root_box: usize) -> &Octree<M> {
        &self.roots[root_box]
    }

    pub fn roots(&self) -> &[Octree<M>] {
        &self.roots
    }

    pub fn owned_roots(&self) -> Range<usize> {
        self.owned.clone()
    }

    pub fn is_gravity_ready(&self) -> bool {
        self.gravity_ready
    }

    pub fn population(&self) -> usize {
        self.roots.iter().map(Octree::population).sum()
    }

    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats::default();
        for tree in &self.roots {
            for id in tree.pre_order() {
                stats.cells += 1;
                match tree.get_node(id).kind() {
                    CellKind::Leaf { .. } => stats.leaves += 1,
                    _ => stats.internal += 1,
                }
            }
            stats.population += tree.population();
            stats.max_depth = stats.max_depth.max(tree.depth());
        }
        stats
    }

    fn locate<P: PointMass>(&self, bodies: &[P], index: usize) -> Result<usize> {
        self.locate_at(index, bodies[index].position())
    }

    /// Root box that would receive particle `index` at `pos` on this rank.
    pub(crate) fn locate_at(&self, index: usize, pos: Vector) -> Result<usize> {
        let Some(root_box) = self.config.root_box_for(pos) else {
            error!(index, ?pos, "particle outside the simulation box");
            return Err(TreeError::OutsideDomain {
                index,
                position: pos,
            });
        };
        if !self.owned.contains(&root_box) {
            let owner = root_box / self.owned.len().max(1);
            error!(index, root_box, owner, "particle in a root box owned by another rank");
            return Err(TreeError::ForeignParticle {
                index,
                root_box,
                owner,
            });
        }
        Ok(root_box)
    }

    /// Insert one particle into the tree of its root box.
    ///
    /// A particle already in the leaf its position routes to is left alone;
    /// one attached elsewhere (it moved since) is detached first, so an
    /// index never occupies two leaves.
    pub fn add_particle_to_tree<P: PointMass>(&mut self, bodies: &[P], index: usize) -> Result<()> {
        if index >= bodies.len() {
            return Err(TreeError::ParticleIndex {
                index,
                len: bodies.len(),
            });
        }
        self.gravity_ready = false;
        if bodies[index].is_removed() {
            return Ok(());
        }
        let root_box = self.locate(bodies, index)?;
        if self.roots[root_box].holds(index, bodies[index].position()) {
            return Ok(());
        }
        // Indices at or past `tracked` have never been attached.
        if index < self.tracked {
            for tree in &mut self.roots[self.owned.clone()] {
                if tree.detach(index) {
                    trace!(particle = index, "detached moved particle before reinsertion");
                    break;
                }
            }
        }
        self.attach(bodies, index, root_box)
    }

    fn attach<P: PointMass>(&mut self, bodies: &[P], index: usize, root_box: usize) -> Result<()> {
        if let Err(e) = self.roots[root_box].insert(bodies, index) {
            self.dirty = true;
            return Err(e);
        }
        self.tracked = self.tracked.max(index + 1);
        Ok(())
    }

    /// Bring the structure in line with the current particle positions.
    ///
    /// On success every live particle sits in exactly one leaf whose cube
    /// contains it, and no removed or out-of-range index is attached.
    pub fn update<P: PointMass + Sync>(&mut self, bodies: &[P]) -> Result<()> {
        self.gravity_ready = false;

        let incremental = match self.config.rebuild {
            RebuildPolicy::Full => false,
            RebuildPolicy::Incremental if self.dirty => {
                warn!("previous build failed; rebuilding from scratch");
                false
            }
            RebuildPolicy::Incremental if bodies.len() < self.tracked => {
                warn!(
                    tracked = self.tracked,
                    len = bodies.len(),
                    "particle array shrank; rebuilding from scratch"
                );
                false
            }
            RebuildPolicy::Incremental => true,
        };

        let result = if incremental {
            self.refresh(bodies)
        } else {
            self.rebuild(bodies)
        };
        self.dirty = result.is_err();
        result?;

        debug!(
            incremental,
            population = self.population(),
            cells = self.roots.iter().map(Octree::size).sum::<usize>(),
            "tree updated"
        );
        Ok(())
    }

    fn rebuild<P: PointMass + Sync>(&mut self, bodies: &[P]) -> Result<()> {
        let mut buckets = vec![Vec::new(); self.roots.len()];
        for (i, body) in bodies.iter().enumerate() {
            if body.is_removed() {
                continue;
            }
            buckets[self.locate(bodies, i)?].push(i);
        }

        self.roots
            .par_iter_mut()
            .zip(buckets.par_iter())
            .try_for_each(|(tree, indices)| {
                tree.clear();
                indices.iter().try_for_each(|&i| tree.insert(bodies, i))
            })?;

        self.tracked = bodies.len();
        Ok(())
    }

    /// Prune the existing structure, then attach every live particle that no
    /// leaf holds: movers, newcomers and particles that are live again.
    fn refresh<P: PointMass + Sync>(&mut self, bodies: &[P]) -> Result<()> {
        let config = &self.config;
        let evicted: Vec<Vec<usize>> = self
            .roots
            .par_iter_mut()
            .enumerate()
            .map(|(root_box, tree)| {
                let mut evicted = Vec::new();
                let in_root = |pos: Vector| config.root_box_for(pos) == Some(root_box);
                tree.refresh(bodies, in_root, &mut evicted);
                evicted
            })
            .collect();
        for i in evicted.iter().flatten() {
            trace!(particle = i, "particle left its cell");
        }

        let mut attached = vec![false; bodies.len()];
        for tree in &self.roots {
            for (_, particle) in tree.leaves() {
                attached[particle] = true;
            }
        }
        for (i, body) in bodies.iter().enumerate() {
            if attached[i] || body.is_removed() {
                continue;
            }
            let root_box = self.locate(bodies, i)?;
            self.attach(bodies, i, root_box)?;
        }

        self.tracked = bodies.len();
        Ok(())
    }

    /// Recompute mass, center of mass and moments for every cell.
    pub fn update_gravity_data<P: PointMass + Sync>(&mut self, bodies: &[P]) -> Result<()> {
        if self.dirty {
            return Err(TreeError::GravityDataStale);
        }
        if bodies.len() < self.tracked {
            return Err(TreeError::ParticleIndex {
                index: self.tracked - 1,
                len: bodies.len(),
            });
        }
        self.roots
            .par_iter_mut()
            .for_each(|tree| tree.update_gravity_data(bodies));
        self.gravity_ready = true;
        Ok(())
    }

    /// Aggregated data, available once `update_gravity_data` has run on the
    /// current structure.
    pub fn gravity_view(&self) -> Result<GravityView<'_, M>> {
        if !self.gravity_ready {
            return Err(TreeError::GravityDataStale);
        }
        Ok(GravityView::new(&self.roots))
    }

    /// Broad-phase query: local particles within `reach` of `center`.
    pub fn particles_within<P: PointMass>(
        &self,
        bodies: &[P],
        center: Vector,
        reach: f64,
    ) -> Vec<usize> {
        let mut out = Vec::new();
        for tree in &self.roots {
            tree.particles_within(bodies, center, reach, &mut out);
        }
        out
    }
}
