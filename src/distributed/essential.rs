use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::cell::{CellData, CellKind, Moment};
use crate::config::TreeConfig;
use crate::error::{ProtocolError, Result, TreeError};
use crate::octree::Octree;
use crate::particle::{Particle, PointMass};
use crate::tree::Tree;
use crate::vector::Vector;
use crate::view::GravityView;

use super::transport::{Message, Transport};
use super::{Decomposition, PeerRegion};

/// Aggregated physics of one exported cell. Carries no particle index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EssentialNode<M> {
    pub root_box: usize,
    pub center: Vector,
    pub width: f64,
    pub mass: f64,
    pub center_of_mass: Vector,
    pub moment: M,
    /// Particles below this cell on the sending rank.
    pub count: usize,
}

/// A particle sent to a peer for cross-boundary collision detection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EssentialParticle {
    pub origin_rank: usize,
    pub origin_index: usize,
    pub particle: Particle,
}

impl PointMass for EssentialParticle {
    fn position(&self) -> Vector {
        self.particle.position()
    }

    fn mass(&self) -> f64 {
        self.particle.m
    }

    fn radius(&self) -> f64 {
        self.particle.r
    }
}

/// Cells of the local tree a peer needs for its force walk, parent first.
///
/// A cell's children are exported only if some point of the peer's region
/// would open it, i.e. `w^2 > theta^2 d^2` with `d` the distance from the
/// cell's center of mass to the region.
pub fn export_for_gravity<M: Moment>(
    view: &GravityView<'_, M>,
    owned: Range<usize>,
    region: &PeerRegion,
    opening_angle: f64,
) -> Vec<EssentialNode<M>> {
    let theta2 = opening_angle * opening_angle;
    let mut out = Vec::new();

    for (root_box, root) in view.roots().filter(|(i, _)| owned.contains(i)) {
        let mut stack = vec![root];
        while let Some(cell) = stack.pop() {
            out.push(EssentialNode {
                root_box,
                center: cell.center(),
                width: cell.width(),
                mass: cell.mass(),
                center_of_mass: cell.center_of_mass(),
                moment: *cell.moment(),
                count: cell.count(),
            });
            if !cell.has_children() {
                continue;
            }
            let d = region.distance_to_point(cell.center_of_mass());
            let w = cell.width();
            if w * w > theta2 * d * d {
                let mut children: Vec<_> = cell.children().collect();
                children.reverse();
                stack.extend(children);
            }
        }
    }
    out
}

/// Largest radius among live bodies, zero if there are none.
pub fn max_radius<P: PointMass>(bodies: &[P]) -> f64 {
    bodies
        .iter()
        .filter(|p| !p.is_removed())
        .map(PointMass::radius)
        .fold(0.0, f64::max)
}

/// Local particles close enough to a peer's region to touch one of its
/// particles. A particle of radius `r` goes out if it lies within
/// `r + peer_radius + margin` of the region, where `peer_radius` is the
/// largest radius on the peer.
pub fn export_for_collisions<M: Moment>(
    tree: &Tree<M>,
    bodies: &[Particle],
    rank: usize,
    region: &PeerRegion,
    peer_radius: f64,
    margin: f64,
) -> Vec<EssentialParticle> {
    let cell_reach = max_radius(bodies) + peer_radius + margin;

    let mut out = Vec::new();
    for root_box in tree.owned_roots() {
        let octree = tree.root(root_box);
        let mut stack: Vec<_> = octree.root().into_iter().collect();
        while let Some(id) = stack.pop() {
            let cell = octree.get_node(id);
            if region.distance_to_cube(cell.center(), cell.width()) > cell_reach {
                continue;
            }
            match cell.kind() {
                CellKind::Leaf { particle } => {
                    let p = &bodies[particle];
                    if region.distance_to_point(p.position()) <= p.radius() + peer_radius + margin {
                        out.push(EssentialParticle {
                            origin_rank: rank,
                            origin_index: particle,
                            particle: p.clone(),
                        });
                    }
                }
                _ => stack.extend(cell.children()),
            }
        }
    }
    out
}

/// What this rank has received from its peers for the current step. Kept
/// apart from the rank's own tree and discarded at the start of the next
/// exchange.
pub struct EssentialTree<M = ()> {
    config: TreeConfig,
    decomposition: Decomposition,
    owned: Range<usize>,
    gravity: Vec<Octree<M>>,
    collisions: Vec<Octree<M>>,
    particles: Vec<EssentialParticle>,
    gravity_from: Vec<bool>,
    collisions_from: Vec<bool>,
}

impl<M: Moment> EssentialTree<M> {
    pub fn new(config: TreeConfig, decomposition: Decomposition) -> Result<Self> {
        config.validate()?;
        let owned = decomposition.owned_roots(config.n_root())?;
        let forest = |config: &TreeConfig| -> Vec<Octree<M>> {
            (0..config.n_root())
                .map(|i| Octree::new(config.root_center(i), config.root_size, config.max_depth))
                .collect()
        };
        Ok(Self {
            gravity: forest(&config),
            collisions: forest(&config),
            particles: Vec::new(),
            gravity_from: vec![false; decomposition.n_ranks],
            collisions_from: vec![false; decomposition.n_ranks],
            owned,
            decomposition,
            config,
        })
    }

    pub fn decomposition(&self) -> Decomposition {
        self.decomposition
    }

    pub fn clear_gravity(&mut self) {
        self.gravity.iter_mut().for_each(Octree::clear);
        self.gravity_from.iter_mut().for_each(|f| *f = false);
    }

    pub fn clear_collisions(&mut self) {
        self.collisions.iter_mut().for_each(Octree::clear);
        self.particles.clear();
        self.collisions_from.iter_mut().for_each(|f| *f = false);
    }

    fn check_root_box(&self, root_box: usize) -> Result<()> {
        if root_box >= self.gravity.len() || self.owned.contains(&root_box) {
            return Err(ProtocolError::ForeignRootBox { root_box }.into());
        }
        Ok(())
    }

    /// Merge one received summary. Summaries must arrive parent first.
    pub fn add_essential_node(&mut self, node: EssentialNode<M>) -> Result<()> {
        self.check_root_box(node.root_box)?;
        let data = CellData {
            m: node.mass,
            com: node.center_of_mass,
            moment: node.moment,
        };
        self.gravity[node.root_box]
            .attach_remote(node.root_box, node.center, node.width, data, node.count)
            .map_err(|e| {
                error!(error = %e, "rejected essential node");
                TreeError::from(e)
            })?;
        Ok(())
    }

    /// Merge one received particle into the collision product.
    pub fn add_essential_particle(&mut self, particle: EssentialParticle) -> Result<()> {
        let pos = particle.position();
        let Some(root_box) = self.config.root_box_for(pos) else {
            return Err(TreeError::OutsideDomain {
                index: particle.origin_index,
                position: pos,
            });
        };
        self.check_root_box(root_box)?;
        self.particles.push(particle);
        let index = self.particles.len() - 1;
        self.collisions[root_box].insert(&self.particles, index)
    }

    /// Merge everything `from` sent in the gravity round.
    pub fn record_gravity(&mut self, from: usize, nodes: Vec<EssentialNode<M>>) -> Result<()> {
        debug!(from, nodes = nodes.len(), "merging essential gravity nodes");
        for node in nodes {
            self.add_essential_node(node)?;
        }
        self.gravity_from[from] = true;
        Ok(())
    }

    /// Merge everything `from` sent in the collision round.
    pub fn record_collisions(
        &mut self,
        from: usize,
        particles: Vec<EssentialParticle>,
    ) -> Result<()> {
        debug!(from, particles = particles.len(), "merging essential particles");
        for p in particles {
            self.add_essential_particle(p)?;
        }
        self.collisions_from[from] = true;
        Ok(())
    }

    fn missing(&self, received: &[bool]) -> Option<usize> {
        self.decomposition.peers().find(|&p| !received[p])
    }

    /// Remote summaries, once every peer's gravity export has been merged.
    pub fn gravity_view(&self) -> Result<GravityView<'_, M>> {
        if let Some(peer) = self.missing(&self.gravity_from) {
            return Err(TreeError::IncompleteExchange { peer });
        }
        Ok(GravityView::new(&self.gravity))
    }

    /// Received particles, once every peer's collision export has been merged.
    pub fn particles(&self) -> Result<&[EssentialParticle]> {
        if let Some(peer) = self.missing(&self.collisions_from) {
            return Err(TreeError::IncompleteExchange { peer });
        }
        Ok(&self.particles)
    }

    /// Broad-phase query over received particles; indices refer to [`Self::particles`].
    pub fn particles_within(&self, center: Vector, reach: f64) -> Result<Vec<usize>> {
        let particles = self.particles()?;
        let mut out = Vec::new();
        for tree in &self.collisions {
            tree.particles_within(particles, center, reach, &mut out);
        }
        Ok(out)
    }
}

fn check_transport<M, T: Transport<M>>(transport: &T, decomposition: &Decomposition) -> Result<()> {
    if transport.rank() != decomposition.rank || transport.n_ranks() != decomposition.n_ranks {
        return Err(TreeError::InvalidConfig(format!(
            "transport is rank {} of {}, tree is rank {} of {}",
            transport.rank(),
            transport.n_ranks(),
            decomposition.rank,
            decomposition.n_ranks
        )));
    }
    Ok(())
}

/// One blocking gravity round: send every peer its export, then merge one
/// message from every peer. Returns only once all peers have been heard from.
pub fn prepare_essential_tree_for_gravity<M: Moment, T: Transport<M>>(
    tree: &Tree<M>,
    essential: &mut EssentialTree<M>,
    transport: &mut T,
    t: f64,
) -> Result<()> {
    let decomposition = essential.decomposition();
    check_transport::<M, T>(transport, &decomposition)?;
    let view = tree.gravity_view()?;
    let config = tree.config();

    essential.clear_gravity();
    for peer in decomposition.peers() {
        let region = PeerRegion::new(config, &decomposition, peer, t)?;
        let nodes = export_for_gravity(&view, tree.owned_roots(), &region, config.opening_angle);
        debug!(peer, nodes = nodes.len(), "sending essential gravity nodes");
        transport.send(peer, Message::Gravity(nodes))?;
    }

    for peer in decomposition.peers() {
        match transport.recv(peer)? {
            Message::Gravity(nodes) => essential.record_gravity(peer, nodes)?,
            other => return Err(wrong_round(peer, "gravity", &other)),
        }
    }
    Ok(())
}

fn wrong_round<M>(from: usize, expected: &'static str, got: &Message<M>) -> TreeError {
    ProtocolError::WrongRound {
        from,
        expected,
        got: got.label(),
    }
    .into()
}

/// One blocking collision round. Ranks first trade their largest particle
/// radius, so each export can reach as far as the peer's biggest particle,
/// then trade particles the way the gravity round trades nodes.
pub fn prepare_essential_tree_for_collisions<M: Moment, T: Transport<M>>(
    tree: &Tree<M>,
    bodies: &[Particle],
    essential: &mut EssentialTree<M>,
    transport: &mut T,
    t: f64,
) -> Result<()> {
    let decomposition = essential.decomposition();
    check_transport::<M, T>(transport, &decomposition)?;
    let config = tree.config();

    essential.clear_collisions();
    let local_radius = max_radius(bodies);
    for peer in decomposition.peers() {
        transport.send(peer, Message::Reach(local_radius))?;
    }
    let mut peer_radius = vec![0.0; decomposition.n_ranks];
    for peer in decomposition.peers() {
        match transport.recv(peer)? {
            Message::Reach(r) => peer_radius[peer] = r,
            other => return Err(wrong_round(peer, "reach", &other)),
        }
    }

    for peer in decomposition.peers() {
        let region = PeerRegion::new(config, &decomposition, peer, t)?;
        let particles = export_for_collisions(
            tree,
            bodies,
            decomposition.rank,
            &region,
            peer_radius[peer],
            config.collision_margin,
        );
        debug!(peer, particles = particles.len(), "sending essential particles");
        transport.send(peer, Message::Collisions(particles))?;
    }

    for peer in decomposition.peers() {
        match transport.recv(peer)? {
            Message::Collisions(particles) => essential.record_collisions(peer, particles)?,
            other => return Err(wrong_round(peer, "collisions", &other)),
        }
    }
    Ok(())
}
