//! Arena-backed octree over a single root box.
//!
//! Cells live in a `Vec` and refer to each other by [`NodeId`]. Freed cells go
//! on a free list so incremental refreshes do not grow the arena; a full
//! rebuild simply clears it.

use tracing::error;

use crate::cell::{octant, CellData, CellKind, Moment, NodeId, TreeCell};
use crate::error::{Result, TreeError};
use crate::particle::PointMass;
use crate::vector::Vector;

#[cfg(feature = "distributed")]
use crate::error::ProtocolError;

pub struct Octree<M = ()> {
    nodes: Vec<TreeCell<M>>,
    free: Vec<NodeId>,
    root: Option<NodeId>,
    center: Vector,
    width: f64,
    max_depth: usize,
}

impl<M: Moment> Octree<M> {
    pub fn new(center: Vector, width: f64, max_depth: usize) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            center,
            width,
            max_depth,
        }
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn get_node(&self, id: NodeId) -> &TreeCell<M> {
        &self.nodes[id.0]
    }

    pub fn center(&self) -> Vector {
        self.center
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    /// Number of live cells.
    pub fn size(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Number of particles below the root.
    pub fn population(&self) -> usize {
        self.root
            .map(|r| self.get_node(r).kind.count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.root = None;
    }

    /// Closed-cube test against the root box. False for NaN coordinates.
    pub fn contains(&self, pos: Vector) -> bool {
        let h = self.width / 2.0;
        let d = pos - self.center;
        d.x().abs() <= h && d.y().abs() <= h && d.z().abs() <= h
    }

    fn alloc(&mut self, cell: TreeCell<M>) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id.0] = cell;
                id
            }
            None => {
                self.nodes.push(cell);
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        self.nodes[id.0].children = [None; 8];
        self.free.push(id);
    }

    /// Insert body `index` of `bodies`, splitting leaves as needed. Inserting
    /// an index that already sits in the leaf its position routes to is a
    /// no-op.
    pub fn insert<P: PointMass>(&mut self, bodies: &[P], index: usize) -> Result<()> {
        let pos = bodies[index].position();
        if !pos.is_finite() || !self.contains(pos) {
            error!(index, ?pos, "particle outside its root box");
            return Err(TreeError::OutsideDomain {
                index,
                position: pos,
            });
        }
        match self.root {
            None => {
                let leaf =
                    TreeCell::new(self.center, self.width, CellKind::Leaf { particle: index });
                self.root = Some(self.alloc(leaf));
                Ok(())
            }
            Some(_) if self.holds(index, pos) => Ok(()),
            Some(root) => self.insert_into(root, bodies, index, pos, 0),
        }
    }

    /// Whether `index` is the particle of the leaf that `pos` routes to.
    pub fn holds(&self, index: usize, pos: Vector) -> bool {
        self.leaf_for(pos)
            .is_some_and(|leaf| self.get_node(leaf).kind == CellKind::Leaf { particle: index })
    }

    /// Remove the leaf holding `index`, wherever it is, and collapse the
    /// cells above it. Returns false if `index` is not in this tree.
    pub(crate) fn detach(&mut self, index: usize) -> bool {
        let Some(root) = self.root else {
            return false;
        };
        let mut path = Vec::new();
        if !self.find_leaf(root, index, &mut path) {
            return false;
        }
        let Some(&(parent, o)) = path.last() else {
            self.release(root);
            self.root = None;
            return true;
        };
        if let Some(leaf) = self.nodes[parent.0].children[o].take() {
            self.release(leaf);
        }

        for &(id, _) in path.iter().rev() {
            let count = self.nodes[id.0].kind.count() - 1;
            self.nodes[id.0].kind = CellKind::Internal { count };
            if count != 1 {
                continue;
            }
            // Deeper cells were collapsed first, so a lone particle is
            // already in a leaf directly below.
            let only = self.nodes[id.0]
                .children
                .iter()
                .enumerate()
                .find_map(|(o, c)| c.map(|c| (o, c)));
            if let Some((o, child)) = only {
                if let CellKind::Leaf { particle } = self.nodes[child.0].kind {
                    self.release(child);
                    let cell = &mut self.nodes[id.0];
                    cell.children[o] = None;
                    cell.kind = CellKind::Leaf { particle };
                }
            }
        }
        true
    }

    fn find_leaf(&self, id: NodeId, index: usize, path: &mut Vec<(NodeId, usize)>) -> bool {
        let cell = self.get_node(id);
        if let CellKind::Leaf { particle } = cell.kind {
            return particle == index;
        }
        for (o, child) in cell.children.iter().enumerate() {
            let Some(child) = *child else {
                continue;
            };
            path.push((id, o));
            if self.find_leaf(child, index, path) {
                return true;
            }
            path.pop();
        }
        false
    }

    fn insert_into<P: PointMass>(
        &mut self,
        id: NodeId,
        bodies: &[P],
        index: usize,
        pos: Vector,
        depth: usize,
    ) -> Result<()> {
        match self.nodes[id.0].kind {
            CellKind::Leaf { particle: other } => {
                if depth >= self.max_depth {
                    error!(first = other, second = index, depth, "octree depth guard tripped");
                    return Err(TreeError::DegenerateInsertion {
                        first: other,
                        second: index,
                        depth,
                    });
                }
                // Split: the resident particle moves down one level, then the
                // newcomer descends through what is now an internal cell.
                let other_pos = bodies[other].position();
                let cell = &self.nodes[id.0];
                let o = cell.octant_for(other_pos);
                let leaf = TreeCell::new(
                    cell.child_center(o),
                    cell.width() / 2.0,
                    CellKind::Leaf { particle: other },
                );
                let child = self.alloc(leaf);
                let cell = &mut self.nodes[id.0];
                cell.children[o] = Some(child);
                cell.kind = CellKind::Internal { count: 1 };
                self.insert_into(id, bodies, index, pos, depth)
            }
            CellKind::Internal { count } | CellKind::Remote { count } => {
                let cell = &mut self.nodes[id.0];
                cell.kind = CellKind::Internal { count: count + 1 };
                let o = cell.octant_for(pos);
                if let Some(child) = cell.children[o] {
                    return self.insert_into(child, bodies, index, pos, depth + 1);
                }
                let leaf = TreeCell::new(
                    cell.child_center(o),
                    cell.width() / 2.0,
                    CellKind::Leaf { particle: index },
                );
                let child = self.alloc(leaf);
                self.nodes[id.0].children[o] = Some(child);
                Ok(())
            }
        }
    }

    /// Drop leaves whose particle was removed or moved, collapse internal
    /// cells down to one particle, and free empty ones.
    ///
    /// A leaf stays only if its particle still routes to it from the root,
    /// so a particle that lands on a dividing plane ends up where a fresh
    /// insertion would put it. `in_root` says whether a position belongs to
    /// this root box at all. Indices of particles that moved out are
    /// appended to `evicted`.
    pub(crate) fn refresh<P, F>(&mut self, bodies: &[P], in_root: F, evicted: &mut Vec<usize>)
    where
        P: PointMass,
        F: Fn(Vector) -> bool,
    {
        if let Some(root) = self.root {
            let mut route = Vec::new();
            self.root = self.refresh_cell(root, bodies, &in_root, &mut route, evicted);
        }
    }

    fn refresh_cell<P, F>(
        &mut self,
        id: NodeId,
        bodies: &[P],
        in_root: &F,
        route: &mut Vec<(Vector, usize)>,
        evicted: &mut Vec<usize>,
    ) -> Option<NodeId>
    where
        P: PointMass,
        F: Fn(Vector) -> bool,
    {
        match self.nodes[id.0].kind {
            CellKind::Leaf { particle } => {
                let Some(body) = bodies.get(particle) else {
                    self.release(id);
                    return None;
                };
                if body.is_removed() {
                    self.release(id);
                    return None;
                }
                let pos = body.position();
                let routed = route.iter().all(|&(center, o)| octant(center, pos) == o);
                if !(routed && self.contains(pos) && in_root(pos)) {
                    evicted.push(particle);
                    self.release(id);
                    return None;
                }
                Some(id)
            }
            CellKind::Internal { .. } | CellKind::Remote { .. } => {
                let mut count = 0;
                let mut last = None;
                let center = self.nodes[id.0].center();
                for o in 0..8 {
                    let Some(child) = self.nodes[id.0].children[o] else {
                        continue;
                    };
                    route.push((center, o));
                    let kept = self.refresh_cell(child, bodies, in_root, route, evicted);
                    route.pop();
                    self.nodes[id.0].children[o] = kept;
                    if let Some(k) = kept {
                        count += self.nodes[k.0].kind.count();
                        last = Some((o, k));
                    }
                }

                match (count, last) {
                    (0, _) | (_, None) => {
                        self.release(id);
                        None
                    }
                    (1, Some((o, only))) => {
                        // Children were refreshed first, so a lone particle
                        // already sits in a leaf directly below us.
                        if let CellKind::Leaf { particle } = self.nodes[only.0].kind {
                            self.release(only);
                            let cell = &mut self.nodes[id.0];
                            cell.children[o] = None;
                            cell.kind = CellKind::Leaf { particle };
                        } else {
                            self.nodes[id.0].kind = CellKind::Internal { count };
                        }
                        Some(id)
                    }
                    _ => {
                        self.nodes[id.0].kind = CellKind::Internal { count };
                        Some(id)
                    }
                }
            }
        }
    }

    /// Post-order recomputation of mass, center of mass and moment.
    pub(crate) fn update_gravity_data<P: PointMass>(&mut self, bodies: &[P]) {
        if let Some(root) = self.root {
            self.aggregate(root, bodies);
        }
    }

    fn aggregate<P: PointMass>(&mut self, id: NodeId, bodies: &[P]) {
        match self.nodes[id.0].kind {
            CellKind::Leaf { particle } => {
                let body = &bodies[particle];
                self.nodes[id.0].data = CellData {
                    m: body.mass(),
                    com: body.position(),
                    moment: M::default(),
                };
            }
            CellKind::Internal { .. } => {
                let children = self.nodes[id.0].children;
                let center = self.nodes[id.0].center();

                // Accumulate offsets from the cell center rather than absolute
                // positions to keep cancellation small far from the origin.
                let mut m = 0.0;
                let mut weighted = Vector::zero();
                for child in children.iter().flatten() {
                    self.aggregate(*child, bodies);
                    let d = &self.nodes[child.0].data;
                    m += d.m;
                    weighted += (d.com - center) * d.m;
                }
                let com = if m > 0.0 { center + weighted / m } else { center };

                let mut moment = M::default();
                if M::ENABLED {
                    for child in children.iter().flatten() {
                        let d = &self.nodes[child.0].data;
                        moment.accumulate(&d.moment, d.m, d.com - com);
                    }
                }

                self.nodes[id.0].data = CellData { m, com, moment };
            }
            // Received summaries are authoritative.
            CellKind::Remote { .. } => {}
        }
    }

    /// Leaf reached by following octants from the root towards `pos`.
    pub fn leaf_for(&self, pos: Vector) -> Option<NodeId> {
        let mut cur = self.root?;
        loop {
            let cell = self.get_node(cur);
            if cell.kind.is_leaf() {
                return Some(cur);
            }
            cur = cell.children[cell.octant_for(pos)]?;
        }
    }

    /// All `(leaf, particle)` pairs.
    pub fn leaves(&self) -> Vec<(NodeId, usize)> {
        self.pre_order()
            .into_iter()
            .filter_map(|id| match self.get_node(id).kind {
                CellKind::Leaf { particle } => Some((id, particle)),
                _ => None,
            })
            .collect()
    }

    /// Cell ids in parent-before-children order, octants ascending.
    pub fn pre_order(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.size());
        let mut stack: Vec<NodeId> = self.root.into_iter().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.get_node(id).children.iter().rev().flatten());
        }
        out
    }

    /// Deepest level below the root (the root is level 0).
    pub fn depth(&self) -> usize {
        fn walk<M: Moment>(tree: &Octree<M>, id: NodeId) -> usize {
            tree.get_node(id)
                .children()
                .map(|c| 1 + walk(tree, c))
                .max()
                .unwrap_or(0)
        }
        self.root.map(|r| walk(self, r)).unwrap_or(0)
    }

    /// Leaf particles within `reach` of `center`.
    pub fn particles_within<P: PointMass>(
        &self,
        bodies: &[P],
        center: Vector,
        reach: f64,
        out: &mut Vec<usize>,
    ) {
        let mut stack: Vec<NodeId> = self.root.into_iter().collect();
        while let Some(id) = stack.pop() {
            let cell = self.get_node(id);
            if cell.distance_to(center) > reach {
                continue;
            }
            match cell.kind {
                CellKind::Leaf { particle } => {
                    if (bodies[particle].position() - center).norm() <= reach {
                        out.push(particle);
                    }
                }
                _ => stack.extend(cell.children()),
            }
        }
    }

    /// Attach a summary received from another rank. Summaries must arrive
    /// parent first; the first one for an empty tree must be the root cell.
    #[cfg(feature = "distributed")]
    pub(crate) fn attach_remote(
        &mut self,
        root_box: usize,
        center: Vector,
        width: f64,
        data: CellData<M>,
        count: usize,
    ) -> std::result::Result<NodeId, ProtocolError> {
        let tol = self.width * 1e-9;
        let misaligned = ProtocolError::Misaligned {
            root_box,
            center,
            width,
        };
        let orphan = ProtocolError::OrphanNode { root_box, center };
        let duplicate = ProtocolError::DuplicateNode { root_box, center };

        if !(width.is_finite() && center.is_finite()) {
            return Err(misaligned);
        }
        let mut cell = TreeCell::new(center, width, CellKind::Remote { count });
        cell.data = data;

        let Some(mut cur) = self.root else {
            if width < self.width - tol {
                return Err(orphan);
            }
            if (width - self.width).abs() > tol || (center - self.center).max_abs() > tol {
                return Err(misaligned);
            }
            let id = self.alloc(cell);
            self.root = Some(id);
            return Ok(id);
        };

        loop {
            let parent = self.get_node(cur);
            if width >= parent.width() - tol {
                return Err(if Some(cur) == self.root && (width - parent.width()).abs() <= tol {
                    duplicate
                } else {
                    misaligned
                });
            }
            let child_width = parent.width() / 2.0;
            if width > child_width + tol {
                return Err(misaligned);
            }
            let o = parent.octant_for(center);
            let at_child_level = (width - child_width).abs() <= tol;
            if at_child_level && (center - parent.child_center(o)).max_abs() > tol {
                return Err(misaligned);
            }
            match parent.children[o] {
                Some(child) => {
                    if at_child_level {
                        return Err(duplicate);
                    }
                    cur = child;
                }
                None => {
                    if !at_child_level {
                        return Err(orphan);
                    }
                    let id = self.alloc(cell);
                    self.nodes[cur.0].children[o] = Some(id);
                    return Ok(id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::Particle;

    fn tree() -> Octree<()> {
        Octree::new(Vector::zero(), 8.0, 32)
    }

    #[test]
    fn second_particle_splits_leaf() {
        let bodies = vec![
            Particle::at(1.0, 1.0, 1.0, 1.0),
            Particle::at(-1.0, -1.0, -1.0, 1.0),
        ];
        let mut t = tree();
        t.insert(&bodies, 0).unwrap();
        assert!(t.get_node(t.root().unwrap()).kind().is_leaf());
        t.insert(&bodies, 1).unwrap();

        let root = t.get_node(t.root().unwrap());
        assert_eq!(root.kind(), CellKind::Internal { count: 2 });
        assert_eq!(root.children().count(), 2);
        assert_eq!(t.size(), 3);
        assert_eq!(t.depth(), 1);
    }

    #[test]
    fn refresh_collapses_to_single_leaf() {
        let mut bodies = vec![
            Particle::at(1.0, 1.0, 1.0, 1.0),
            Particle::at(1.5, 1.5, 1.5, 1.0),
        ];
        let mut t = tree();
        t.insert(&bodies, 0).unwrap();
        t.insert(&bodies, 1).unwrap();
        assert!(t.depth() >= 2);

        bodies[1].removed = true;
        let mut evicted = Vec::new();
        t.refresh(&bodies, |_| true, &mut evicted);

        assert!(evicted.is_empty());
        assert_eq!(t.size(), 1);
        assert_eq!(
            t.get_node(t.root().unwrap()).kind(),
            CellKind::Leaf { particle: 0 }
        );
    }

    #[test]
    fn freed_cells_are_reused() {
        let mut bodies = vec![
            Particle::at(1.0, 1.0, 1.0, 1.0),
            Particle::at(-1.0, 1.0, 1.0, 1.0),
            Particle::at(-1.0, -1.0, 1.0, 1.0),
        ];
        let mut t = tree();
        for i in 0..3 {
            t.insert(&bodies, i).unwrap();
        }
        let arena = t.nodes.len();

        bodies[2].x = 1.0;
        bodies[2].y = -1.0;
        let mut evicted = Vec::new();
        t.refresh(&bodies, |_| true, &mut evicted);
        assert_eq!(evicted, vec![2]);
        t.insert(&bodies, 2).unwrap();

        assert_eq!(t.nodes.len(), arena);
        assert_eq!(t.population(), 3);
    }

    #[test]
    fn query_matches_brute_force() {
        let bodies: Vec<Particle> = (0..64)
            .map(|i| {
                let f = i as f64;
                Particle::at(
                    (f * 0.37).sin() * 3.9,
                    (f * 0.11).cos() * 3.9,
                    (f * 0.73).sin() * 3.9,
                    1.0,
                )
            })
            .collect();
        let mut t = tree();
        for i in 0..bodies.len() {
            t.insert(&bodies, i).unwrap();
        }
        let center = Vector::new(0.5, -0.5, 1.0);
        let mut found = Vec::new();
        t.particles_within(&bodies, center, 2.0, &mut found);
        found.sort_unstable();

        let expected: Vec<usize> = bodies
            .iter()
            .enumerate()
            .filter(|(_, p)| (p.position() - center).norm() <= 2.0)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(found, expected);
    }

    #[test]
    fn particle_on_a_dividing_plane_moves_to_the_upper_octant() {
        let mut bodies = vec![
            Particle::at(-1.0, 1.0, 1.0, 1.0),
            Particle::at(1.0, 1.0, 1.0, 1.0),
            Particle::at(-1.0, -1.0, -1.0, 1.0),
        ];
        let mut t = tree();
        for i in 0..3 {
            t.insert(&bodies, i).unwrap();
        }

        // Still inside its old cube, but a fresh insertion would route it
        // to the x-upper side.
        bodies[0].x = 0.0;
        let mut evicted = Vec::new();
        t.refresh(&bodies, |_| true, &mut evicted);
        assert_eq!(evicted, vec![0]);
        t.insert(&bodies, 0).unwrap();

        let leaf = t.leaf_for(bodies[0].position()).unwrap();
        assert_eq!(t.get_node(leaf).kind(), CellKind::Leaf { particle: 0 });
        assert_eq!(t.population(), 3);
        assert_eq!(t.leaves().len(), 3);
    }

    #[test]
    fn refresh_evicts_particles_the_root_predicate_rejects() {
        let bodies = vec![
            Particle::at(1.0, 1.0, 1.0, 1.0),
            Particle::at(4.0, -1.0, -1.0, 1.0),
        ];
        let mut t = tree();
        t.insert(&bodies, 0).unwrap();
        t.insert(&bodies, 1).unwrap();

        let mut evicted = Vec::new();
        t.refresh(&bodies, |pos| pos.x() < 4.0, &mut evicted);
        assert_eq!(evicted, vec![1]);
        assert_eq!(
            t.get_node(t.root().unwrap()).kind(),
            CellKind::Leaf { particle: 0 }
        );
    }

    #[test]
    fn non_finite_positions_are_outside() {
        let bodies = vec![
            Particle::at(f64::NAN, 0.0, 0.0, 1.0),
            Particle::at(0.0, f64::INFINITY, 0.0, 1.0),
        ];
        let mut t = tree();
        assert!(!t.contains(bodies[0].position()));
        for i in 0..2 {
            assert!(matches!(
                t.insert(&bodies, i),
                Err(TreeError::OutsideDomain { index, .. }) if index == i
            ));
        }
        assert!(t.is_empty());
    }

    #[test]
    fn reinserting_a_resident_index_changes_nothing() {
        let bodies = vec![
            Particle::at(1.0, 1.0, 1.0, 1.0),
            Particle::at(-1.0, -1.0, -1.0, 1.0),
        ];
        let mut t = tree();
        t.insert(&bodies, 0).unwrap();
        t.insert(&bodies, 0).unwrap();
        assert_eq!(t.size(), 1);

        t.insert(&bodies, 1).unwrap();
        t.insert(&bodies, 1).unwrap();
        t.insert(&bodies, 0).unwrap();
        assert_eq!(t.population(), 2);
        assert_eq!(t.size(), 3);
    }

    #[test]
    fn detach_collapses_the_path() {
        let bodies = vec![
            Particle::at(1.0, 1.0, 1.0, 1.0),
            Particle::at(1.5, 1.5, 1.5, 1.0),
            Particle::at(-1.0, -1.0, -1.0, 1.0),
        ];
        let mut t = tree();
        for i in 0..3 {
            t.insert(&bodies, i).unwrap();
        }

        assert!(t.detach(1));
        assert!(!t.detach(1));
        assert_eq!(t.population(), 2);
        assert_eq!(t.size(), 3);
        assert_eq!(t.depth(), 1);

        assert!(t.detach(2));
        assert_eq!(t.size(), 1);
        assert_eq!(
            t.get_node(t.root().unwrap()).kind(),
            CellKind::Leaf { particle: 0 }
        );
        assert!(t.detach(0));
        assert!(t.is_empty());
    }

    #[cfg(feature = "distributed")]
    #[test]
    fn remote_child_with_wrong_center_is_misaligned() {
        let mut t = tree();
        let data = || CellData {
            m: 1.0,
            com: Vector::zero(),
            moment: (),
        };
        t.attach_remote(0, Vector::zero(), 8.0, data(), 2).unwrap();
        t.attach_remote(0, Vector::new(2.0, 2.0, 2.0), 4.0, data(), 1)
            .unwrap();

        // Routes to the occupied octant 0 but is not its center.
        let off = Vector::new(2.0, 2.5, 2.5);
        assert_eq!(
            t.attach_remote(0, off, 4.0, data(), 1),
            Err(ProtocolError::Misaligned {
                root_box: 0,
                center: off,
                width: 4.0
            })
        );
        assert_eq!(
            t.attach_remote(0, Vector::new(2.0, 2.0, 2.0), 4.0, data(), 1),
            Err(ProtocolError::DuplicateNode {
                root_box: 0,
                center: Vector::new(2.0, 2.0, 2.0)
            })
        );
        let nan = Vector::new(f64::NAN, 0.0, 0.0);
        assert!(matches!(
            t.attach_remote(0, nan, 4.0, data(), 1),
            Err(ProtocolError::Misaligned { .. })
        ));
    }
}
