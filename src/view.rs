//! Read-only access to aggregated cell data.
//!
//! Mass, center of mass and moments are only reachable through a
//! [`GravityView`], which a tree hands out once its aggregation pass has
//! completed and no structural change has happened since.

use crate::cell::{CellKind, Moment, NodeId, TreeCell};
use crate::octree::Octree;
use crate::vector::Vector;

pub struct GravityView<'a, M> {
    roots: &'a [Octree<M>],
}

impl<'a, M: Moment> GravityView<'a, M> {
    pub(crate) fn new(roots: &'a [Octree<M>]) -> Self {
        Self { roots }
    }

    /// Non-empty roots with their root-box index.
    pub fn roots(&self) -> impl Iterator<Item = (usize, CellSummary<'a, M>)> + 'a {
        self.roots.iter().enumerate().filter_map(|(i, tree)| {
            tree.root()
                .map(|id| (i, CellSummary { tree, id }))
        })
    }

    pub fn root(&self, root_box: usize) -> Option<CellSummary<'a, M>> {
        let tree = self.roots.get(root_box)?;
        tree.root().map(|id| CellSummary { tree, id })
    }

    pub fn total_mass(&self) -> f64 {
        self.roots().map(|(_, c)| c.mass()).sum()
    }

    /// Depth-first walk over every root. `open` sees each visited cell and
    /// returns whether to descend into its children.
    pub fn walk<F>(&self, mut open: F)
    where
        F: FnMut(&CellSummary<'a, M>) -> bool,
    {
        let mut stack: Vec<CellSummary<'a, M>> = self.roots().map(|(_, c)| c).collect();
        stack.reverse();
        while let Some(cell) = stack.pop() {
            if open(&cell) {
                let mut children: Vec<_> = cell.children().collect();
                children.reverse();
                stack.extend(children);
            }
        }
    }
}

/// One aggregated cell.
pub struct CellSummary<'a, M> {
    tree: &'a Octree<M>,
    id: NodeId,
}

impl<M> Clone for CellSummary<'_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for CellSummary<'_, M> {}

impl<'a, M: Moment> CellSummary<'a, M> {
    fn cell(&self) -> &'a TreeCell<M> {
        self.tree.get_node(self.id)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn center(&self) -> Vector {
        self.cell().center()
    }

    pub fn width(&self) -> f64 {
        self.cell().width()
    }

    pub fn kind(&self) -> CellKind {
        self.cell().kind()
    }

    /// Particle held by a local leaf.
    pub fn particle(&self) -> Option<usize> {
        match self.cell().kind() {
            CellKind::Leaf { particle } => Some(particle),
            _ => None,
        }
    }

    pub fn count(&self) -> usize {
        self.cell().kind().count()
    }

    pub fn mass(&self) -> f64 {
        self.cell().data.m
    }

    pub fn center_of_mass(&self) -> Vector {
        self.cell().data.com
    }

    pub fn moment(&self) -> &'a M {
        &self.cell().data.moment
    }

    pub fn has_children(&self) -> bool {
        self.cell().has_children()
    }

    pub fn children(&self) -> impl Iterator<Item = CellSummary<'a, M>> + 'a {
        let tree = self.tree;
        self.cell().children().map(move |id| CellSummary { tree, id })
    }
}
