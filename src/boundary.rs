use serde::Deserialize;

use crate::vector::Vector;

pub struct BoundaryContext<'a> {
    pub t: f64,
    pub box_size: &'a Vector,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Boundary {
    #[default]
    None,
    Open,
    Periodic,
    /// Shearing sheet with orbital frequency `omega`.
    Shear { omega: f64 },
}

impl Boundary {
    pub fn get_ghost_box(
        &self,
        ctx: &BoundaryContext<'_>,
        i: isize,
        j: isize,
        k: isize,
    ) -> GhostBox {
        match *self {
            Boundary::Open | Boundary::Periodic => {
                let x = ctx.box_size.x() * (i as f64);
                let y = ctx.box_size.y() * (j as f64);
                let z = ctx.box_size.z() * (k as f64);
                GhostBox {
                    position: Vector::new(x, y, z),
                }
            }
            Boundary::Shear { omega } => {
                let lx = ctx.box_size.x();
                let ly = ctx.box_size.y();
                let vy = -1.5 * (i as f64) * omega * lx;

                let shift = if i == 0 {
                    -(vy * ctx.t) % ly
                } else if i > 0 {
                    let rem = -(vy * ctx.t - ly / 2.0) % ly;
                    rem - ly / 2.0
                } else {
                    let rem = -(vy * ctx.t + ly / 2.0) % ly;
                    rem + ly / 2.0
                };

                GhostBox {
                    position: Vector::new(
                        lx * (i as f64),
                        ly * (j as f64) - shift,
                        ctx.box_size.z() * (k as f64),
                    ),
                }
            }
            Boundary::None => GhostBox {
                position: Vector::zero(),
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GhostBox {
    pub position: Vector,
}
