//! Explicit context threaded through the per-step tree hooks.

use tracing::{debug, error};

use crate::cell::Moment;
use crate::config::TreeConfig;
use crate::error::{Result, TreeError};
use crate::particle::Particle;
use crate::tree::{Tree, TreeParam};
use crate::view::GravityView;

#[cfg(feature = "distributed")]
use crate::distributed::{
    prepare_essential_tree_for_collisions, prepare_essential_tree_for_gravity, Decomposition,
    EssentialNode, EssentialTree, Transport,
};

pub struct Simulation<M = TreeParam> {
    pub t: f64,
    pub particles: Vec<Particle>,
    tree: Tree<M>,
    #[cfg(feature = "distributed")]
    essential: EssentialTree<M>,
}

impl<M: Moment> Simulation<M> {
    /// Single-rank simulation owning every root box.
    pub fn init(config: TreeConfig) -> Result<Self> {
        Ok(Simulation {
            t: 0.0,
            particles: Vec::new(),
            #[cfg(feature = "distributed")]
            essential: EssentialTree::new(config.clone(), Decomposition::single())?,
            tree: Tree::new(config)?,
        })
    }

    /// One rank of a distributed run.
    #[cfg(feature = "distributed")]
    pub fn for_rank(config: TreeConfig, decomposition: Decomposition) -> Result<Self> {
        Ok(Simulation {
            t: 0.0,
            particles: Vec::new(),
            essential: EssentialTree::new(config.clone(), decomposition)?,
            tree: Tree::for_rank(config, decomposition)?,
        })
    }

    pub fn config(&self) -> &TreeConfig {
        self.tree.config()
    }

    pub fn tree(&self) -> &Tree<M> {
        &self.tree
    }

    #[cfg(feature = "distributed")]
    pub fn essential_tree(&self) -> &EssentialTree<M> {
        &self.essential
    }

    /// Append a particle. Once the tree holds particles, new ones are
    /// inserted right away instead of waiting for the next update.
    pub fn add(&mut self, p: Particle) -> Result<usize> {
        let index = self.particles.len();
        if !self.is_particle_in_box(&p) {
            let position = p.position();
            error!(
                index,
                ?position,
                box_size = ?self.config().box_size(),
                "adding particle outside of box"
            );
            return Err(TreeError::OutsideDomain { index, position });
        }
        self.tree.locate_at(index, p.position())?;

        self.particles.push(p);
        if self.tree.population() > 0 {
            if let Err(e) = self.tree.add_particle_to_tree(&self.particles, index) {
                self.particles.pop();
                return Err(e);
            }
        }
        Ok(index)
    }

    /// Mark a particle for removal; the next update detaches it.
    pub fn remove(&mut self, index: usize) -> Result<()> {
        let len = self.particles.len();
        let p = self
            .particles
            .get_mut(index)
            .ok_or(TreeError::ParticleIndex { index, len })?;
        p.removed = true;
        Ok(())
    }

    pub fn is_particle_in_box(&self, p: &Particle) -> bool {
        self.config().root_box_for(p.position()).is_some()
    }

    pub fn tree_update(&mut self) -> Result<()> {
        self.tree.update(&self.particles)
    }

    pub fn tree_update_gravity_data(&mut self) -> Result<()> {
        self.tree.update_gravity_data(&self.particles)?;
        debug!(t = self.t, mass = self.tree.gravity_view()?.total_mass(), "gravity data ready");
        Ok(())
    }

    pub fn tree_add_particle_to_tree(&mut self, index: usize) -> Result<()> {
        self.tree.add_particle_to_tree(&self.particles, index)
    }

    pub fn gravity_view(&self) -> Result<GravityView<'_, M>> {
        self.tree.gravity_view()
    }

    #[cfg(feature = "distributed")]
    pub fn tree_prepare_essential_tree_for_gravity<T: Transport<M>>(
        &mut self,
        transport: &mut T,
    ) -> Result<()> {
        prepare_essential_tree_for_gravity(&self.tree, &mut self.essential, transport, self.t)
    }

    #[cfg(feature = "distributed")]
    pub fn tree_prepare_essential_tree_for_collisions<T: Transport<M>>(
        &mut self,
        transport: &mut T,
    ) -> Result<()> {
        prepare_essential_tree_for_collisions(
            &self.tree,
            &self.particles,
            &mut self.essential,
            transport,
            self.t,
        )
    }

    #[cfg(feature = "distributed")]
    pub fn tree_add_essential_node(&mut self, node: EssentialNode<M>) -> Result<()> {
        self.essential.add_essential_node(node)
    }
}
