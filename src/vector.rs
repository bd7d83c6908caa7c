use std::{
    iter::Sum,
    ops::{Add, AddAssign, Div, Mul, Sub, SubAssign},
};

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vector {
    data: [f64; 3],
}

impl Vector {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Vector { data: [x, y, z] }
    }

    pub const fn zero() -> Self {
        Vector {
            data: [0.0, 0.0, 0.0],
        }
    }

    #[inline]
    pub fn x(&self) -> f64 {
        self.data[0]
    }

    #[inline]
    pub fn y(&self) -> f64 {
        self.data[1]
    }

    #[inline]
    pub fn z(&self) -> f64 {
        self.data[2]
    }

    pub fn norm2(&self) -> f64 {
        self.dot(self)
    }

    pub fn norm(&self) -> f64 {
        self.norm2().sqrt()
    }

    pub fn dot(&self, other: &Vector) -> f64 {
        self.data[0] * other.data[0] + self.data[1] * other.data[1] + self.data[2] * other.data[2]
    }

    /// Largest absolute component, or NaN if any component is NaN.
    pub fn max_abs(&self) -> f64 {
        if self.data.iter().any(|c| c.is_nan()) {
            return f64::NAN;
        }
        self.data.iter().fold(0.0_f64, |m, c| m.max(c.abs()))
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|c| c.is_finite())
    }

    pub fn map(self, f: impl Fn(f64) -> f64) -> Vector {
        Vector {
            data: [f(self.data[0]), f(self.data[1]), f(self.data[2])],
        }
    }
}

// Vector * scalar
impl Mul<f64> for Vector {
    type Output = Vector;

    fn mul(self, rhs: f64) -> Vector {
        Vector {
            data: [self.data[0] * rhs, self.data[1] * rhs, self.data[2] * rhs],
        }
    }
}

impl Mul<Vector> for f64 {
    type Output = Vector;

    fn mul(self, rhs: Vector) -> Vector {
        rhs * self
    }
}

impl Div<f64> for Vector {
    type Output = Vector;

    fn div(self, rhs: f64) -> Vector {
        Vector {
            data: [self.data[0] / rhs, self.data[1] / rhs, self.data[2] / rhs],
        }
    }
}

impl Add for Vector {
    type Output = Vector;

    fn add(self, rhs: Vector) -> Vector {
        Vector {
            data: [
                self.data[0] + rhs.data[0],
                self.data[1] + rhs.data[1],
                self.data[2] + rhs.data[2],
            ],
        }
    }
}

impl AddAssign for Vector {
    fn add_assign(&mut self, rhs: Vector) {
        self.data[0] += rhs.data[0];
        self.data[1] += rhs.data[1];
        self.data[2] += rhs.data[2];
    }
}

impl Sub for Vector {
    type Output = Vector;

    fn sub(self, rhs: Vector) -> Vector {
        Vector {
            data: [
                self.data[0] - rhs.data[0],
                self.data[1] - rhs.data[1],
                self.data[2] - rhs.data[2],
            ],
        }
    }
}

impl SubAssign for Vector {
    fn sub_assign(&mut self, rhs: Vector) {
        self.data[0] -= rhs.data[0];
        self.data[1] -= rhs.data[1];
        self.data[2] -= rhs.data[2];
    }
}

// Enable iterator .sum()
impl Sum for Vector {
    fn sum<I: Iterator<Item = Vector>>(iter: I) -> Vector {
        iter.fold(Vector::zero(), |a, b| a + b)
    }
}
