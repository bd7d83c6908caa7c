//! One node of an octree and the moment data aggregated into it.

use std::fmt::Debug;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::vector::Vector;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellKind {
    /// Holds exactly one local particle.
    Leaf { particle: usize },
    /// Has at least one child; `count` particles live below it.
    Internal { count: usize },
    /// Summary received from another rank. Children may be missing wherever
    /// the sender decided this node was far enough to stand in for them.
    Remote { count: usize },
}

impl CellKind {
    pub fn count(&self) -> usize {
        match *self {
            CellKind::Leaf { .. } => 1,
            CellKind::Internal { count } | CellKind::Remote { count } => count,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, CellKind::Leaf { .. })
    }
}

/// Higher-order moment carried alongside mass and center of mass.
///
/// `()` tracks nothing. [`Quadrupole`] tracks the traceless second moment
/// about the cell's center of mass.
pub trait Moment:
    Copy + Default + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned
{
    const ENABLED: bool;

    /// Fold a child's moment into its parent's. `offset` is the child's center
    /// of mass minus the parent's.
    fn accumulate(&mut self, child: &Self, child_mass: f64, offset: Vector);
}

impl Moment for () {
    const ENABLED: bool = false;

    #[inline]
    fn accumulate(&mut self, _child: &Self, _child_mass: f64, _offset: Vector) {}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Quadrupole {
    pub mxx: f64,
    pub mxy: f64,
    pub mxz: f64,
    pub myy: f64,
    pub myz: f64,
    pub mzz: f64,
}

impl Quadrupole {
    /// Quadrupole of a point mass `m` displaced by `d` from the expansion center.
    pub fn of_point(m: f64, d: Vector) -> Self {
        let d2 = d.norm2();
        Quadrupole {
            mxx: m * (3.0 * d.x() * d.x() - d2),
            mxy: m * 3.0 * d.x() * d.y(),
            mxz: m * 3.0 * d.x() * d.z(),
            myy: m * (3.0 * d.y() * d.y() - d2),
            myz: m * 3.0 * d.y() * d.z(),
            mzz: m * (3.0 * d.z() * d.z() - d2),
        }
    }

    pub fn trace(&self) -> f64 {
        self.mxx + self.myy + self.mzz
    }
}

impl Moment for Quadrupole {
    const ENABLED: bool = true;

    fn accumulate(&mut self, child: &Self, child_mass: f64, offset: Vector) {
        // Parallel-axis shift of the child's own moment to the parent's center of mass.
        let shift = Quadrupole::of_point(child_mass, offset);
        self.mxx += child.mxx + shift.mxx;
        self.mxy += child.mxy + shift.mxy;
        self.mxz += child.mxz + shift.mxz;
        self.myy += child.myy + shift.myy;
        self.myz += child.myz + shift.myz;
        self.mzz += child.mzz + shift.mzz;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct CellData<M> {
    pub m: f64,
    pub com: Vector,
    pub moment: M,
}

pub struct TreeCell<M = ()> {
    center: Vector,
    width: f64,
    pub(crate) data: CellData<M>,
    pub(crate) children: [Option<NodeId>; 8],
    pub(crate) kind: CellKind,
}

impl<M: Moment> TreeCell<M> {
    pub(crate) fn new(center: Vector, width: f64, kind: CellKind) -> Self {
        TreeCell {
            center,
            width,
            data: CellData::default(),
            children: [None; 8],
            kind,
        }
    }

    pub fn center(&self) -> Vector {
        self.center
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.iter().flatten().copied()
    }

    pub fn has_children(&self) -> bool {
        self.children.iter().any(Option::is_some)
    }

    /// Inclusive containment test against this cell's cube.
    pub fn contains(&self, pos: Vector) -> bool {
        let h = self.width / 2.0;
        (pos.x() - self.center.x()).abs() <= h
            && (pos.y() - self.center.y()).abs() <= h
            && (pos.z() - self.center.z()).abs() <= h
    }

    pub fn octant_for(&self, pos: Vector) -> usize {
        octant(self.center, pos)
    }

    pub fn child_center(&self, octant: usize) -> Vector {
        child_center(self.center, self.width, octant)
    }

    /// Distance from `pos` to the nearest point of this cell's cube.
    pub fn distance_to(&self, pos: Vector) -> f64 {
        let h = self.width / 2.0;
        (pos - self.center)
            .map(|d| (d.abs() - h).max(0.0))
            .norm()
    }
}

/// Octant of `pos` relative to `center`: bit 0 for x below center, bit 1 for
/// y, bit 2 for z. Points on a dividing plane go to the upper side.
#[inline]
pub fn octant(center: Vector, pos: Vector) -> usize {
    let mut o = 0;
    if pos.x() < center.x() {
        o |= 1;
    }
    if pos.y() < center.y() {
        o |= 2;
    }
    if pos.z() < center.z() {
        o |= 4;
    }
    o
}

#[inline]
pub fn child_center(center: Vector, width: f64, octant: usize) -> Vector {
    let q = width / 4.0;
    let sign = |bit: usize| if octant & bit != 0 { -q } else { q };
    center + Vector::new(sign(1), sign(2), sign(4))
}
