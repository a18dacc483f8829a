use bytemuck::{Pod, Zeroable};
use core::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};
use num::Integer;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// An N-dimensional point (where N=2 or N=3), which is usually just a primitive array of type `D`.
/// It is most convenient to construct points of any dimension as:
///
/// ```
/// use scalable_tsdf_core::PointN;
///
/// let p2 = PointN([1.0, 2.0]); // a pixel
/// let p3 = PointN([1, 2, 3]); // a block coordinate
/// ```
///
/// The partial order on points says that A < B if and only if every component of A is less than the corresponding
/// component of B. This is what makes `Extent3i::contains` a pair of comparisons.
#[derive(Copy, Clone, Debug, Deserialize, Default, Eq, Hash, PartialEq, Serialize)]
#[repr(transparent)]
pub struct PointN<N>(pub N);

/// A 2-dimensional point with scalar type `T`.
pub type Point2<T> = PointN<[T; 2]>;
/// A 2-dimensional point with scalar type `i32`. Used for pixel coordinates.
pub type Point2i = PointN<[i32; 2]>;
/// A 2-dimensional point with scalar type `f32`. Used for sub-pixel image coordinates.
pub type Point2f = PointN<[f32; 2]>;
/// A 3-dimensional point with scalar type `T`.
pub type Point3<T> = PointN<[T; 3]>;
/// A 3-dimensional point with scalar type `i32`. Block coordinates and global voxel coordinates are both `Point3i`.
pub type Point3i = PointN<[i32; 3]>;
/// A 3-dimensional point with scalar type `f32`.
pub type Point3f = PointN<[f32; 3]>;

unsafe impl Zeroable for Point3i {}
unsafe impl Pod for Point3i {}
unsafe impl Zeroable for Point3f {}
unsafe impl Pod for Point3f {}

impl<T: Copy> Point2<T> {
    #[inline]
    pub fn x(&self) -> T {
        self.0[0]
    }

    #[inline]
    pub fn y(&self) -> T {
        self.0[1]
    }

    #[inline]
    pub fn fill(value: T) -> Self {
        PointN([value; 2])
    }

    #[inline]
    pub fn map_components_unary(&self, f: impl Fn(T) -> T) -> Self {
        PointN([f(self.x()), f(self.y())])
    }

    #[inline]
    pub fn map_components_binary(&self, other: &Self, f: impl Fn(T, T) -> T) -> Self {
        PointN([f(self.x(), other.x()), f(self.y(), other.y())])
    }
}

impl<T: Copy> Point3<T> {
    #[inline]
    pub fn x(&self) -> T {
        self.0[0]
    }

    #[inline]
    pub fn y(&self) -> T {
        self.0[1]
    }

    #[inline]
    pub fn z(&self) -> T {
        self.0[2]
    }

    #[inline]
    pub fn x_mut(&mut self) -> &mut T {
        &mut self.0[0]
    }

    #[inline]
    pub fn y_mut(&mut self) -> &mut T {
        &mut self.0[1]
    }

    #[inline]
    pub fn z_mut(&mut self) -> &mut T {
        &mut self.0[2]
    }

    #[inline]
    pub fn at(&self, component_index: usize) -> T {
        self.0[component_index]
    }

    #[inline]
    pub fn fill(value: T) -> Self {
        PointN([value; 3])
    }

    #[inline]
    pub fn xy(&self) -> Point2<T> {
        PointN([self.x(), self.y()])
    }

    #[inline]
    pub fn map_components_unary(&self, f: impl Fn(T) -> T) -> Self {
        PointN([f(self.x()), f(self.y()), f(self.z())])
    }

    #[inline]
    pub fn map_components_binary(&self, other: &Self, f: impl Fn(T, T) -> T) -> Self {
        PointN([
            f(self.x(), other.x()),
            f(self.y(), other.y()),
            f(self.z(), other.z()),
        ])
    }
}

impl<T> Point3<T>
where
    T: Copy + Add<Output = T> + Mul<Output = T> + Sub<Output = T>,
{
    #[inline]
    pub fn dot(&self, other: &Self) -> T {
        self.x() * other.x() + self.y() * other.y() + self.z() * other.z()
    }

    #[inline]
    pub fn cross(&self, other: &Self) -> Self {
        PointN([
            self.y() * other.z() - self.z() * other.y(),
            self.z() * other.x() - self.x() * other.z(),
            self.x() * other.y() - self.y() * other.x(),
        ])
    }
}

impl Point2i {
    pub const ZERO: Self = PointN([0; 2]);
}

impl Point2f {
    pub const ZERO: Self = PointN([0.0; 2]);

    #[inline]
    pub fn floor(&self) -> Self {
        self.map_components_unary(|c| c.floor())
    }

    #[inline]
    pub fn round(&self) -> Self {
        self.map_components_unary(|c| c.round())
    }

    #[inline]
    pub fn as_2i(&self) -> Point2i {
        PointN([self.x() as i32, self.y() as i32])
    }
}

impl Point3i {
    pub const ZERO: Self = PointN([0; 3]);
    pub const ONES: Self = PointN([1; 3]);

    #[inline]
    pub fn vector_div_floor(&self, rhs: &Self) -> Self {
        self.map_components_binary(rhs, |c1, c2| c1.div_floor(&c2))
    }

    #[inline]
    pub fn scalar_div_floor(&self, rhs: i32) -> Self {
        self.map_components_unary(|c| c.div_floor(&rhs))
    }

    #[inline]
    pub fn scalar_mod_floor(&self, rhs: i32) -> Self {
        self.map_components_unary(|c| c.mod_floor(&rhs))
    }

    /// Component-wise maximum.
    #[inline]
    pub fn join(&self, other: &Self) -> Self {
        self.map_components_binary(other, i32::max)
    }

    /// Component-wise minimum.
    #[inline]
    pub fn meet(&self, other: &Self) -> Self {
        self.map_components_binary(other, i32::min)
    }

    #[inline]
    pub fn volume(&self) -> i32 {
        self.x() * self.y() * self.z()
    }

    /// All 27 offsets in the `[-1, 1]^3` cube, in X-fastest order. The center `[0, 0, 0]` is at index 13.
    #[inline]
    pub fn moore_offsets_with_center() -> impl Iterator<Item = Self> {
        itertools::iproduct!(-1..=1, -1..=1, -1..=1).map(|(z, y, x)| PointN([x, y, z]))
    }
}

impl Point3f {
    pub const ZERO: Self = PointN([0.0; 3]);
    pub const ONES: Self = PointN([1.0; 3]);

    #[inline]
    pub fn round(&self) -> Self {
        self.map_components_unary(|c| c.round())
    }

    #[inline]
    pub fn floor(&self) -> Self {
        self.map_components_unary(|c| c.floor())
    }

    #[inline]
    pub fn fract(&self) -> Self {
        self.map_components_unary(|c| c.fract())
    }

    #[inline]
    pub fn abs(&self) -> Self {
        self.map_components_unary(|c| c.abs())
    }

    #[inline]
    pub fn signum(&self) -> Self {
        self.map_components_unary(|c| c.signum())
    }

    /// Truncating cast. Use `in_voxel` to get the lattice point containing `self`.
    #[inline]
    pub fn as_3i(&self) -> Point3i {
        PointN([self.x() as i32, self.y() as i32, self.z() as i32])
    }

    /// The lattice point whose unit cell contains `self`.
    #[inline]
    pub fn in_voxel(&self) -> Point3i {
        self.floor().as_3i()
    }

    /// Component-wise maximum.
    #[inline]
    pub fn join(&self, other: &Self) -> Self {
        self.map_components_binary(other, f32::max)
    }

    /// Component-wise minimum.
    #[inline]
    pub fn meet(&self, other: &Self) -> Self {
        self.map_components_binary(other, f32::min)
    }

    #[inline]
    pub fn norm_squared(&self) -> f32 {
        self.dot(self)
    }

    #[inline]
    pub fn norm(&self) -> f32 {
        self.norm_squared().sqrt()
    }

    /// Returns `self` scaled to unit length, or `None` for (nearly) zero vectors.
    #[inline]
    pub fn normalized(&self) -> Option<Self> {
        let n = self.norm();
        if n > f32::EPSILON {
            Some(*self / n)
        } else {
            None
        }
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x().is_finite() && self.y().is_finite() && self.z().is_finite()
    }

    /// Whether every component can be floored into an `i32` without overflow.
    #[inline]
    pub fn fits_in_i32(&self) -> bool {
        const LIMIT: f32 = i32::MAX as f32;
        self.is_finite() && self.abs().0.iter().all(|c| *c < LIMIT)
    }
}

impl From<Point3i> for Point3f {
    #[inline]
    fn from(p: Point3i) -> Self {
        PointN([p.x() as f32, p.y() as f32, p.z() as f32])
    }
}

impl From<Point2i> for Point2f {
    #[inline]
    fn from(p: Point2i) -> Self {
        PointN([p.x() as f32, p.y() as f32])
    }
}

// This particular partial order allows us to say that an `Extent3i` e contains a `Point3i` p iff p
// is GEQ the minimum of e and p is LT the least upper bound of e.
impl<T> PartialOrd for Point3<T>
where
    T: Copy + PartialOrd,
{
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self < other {
            Some(Ordering::Less)
        } else if self > other {
            Some(Ordering::Greater)
        } else if self.x() == other.x() && self.y() == other.y() && self.z() == other.z() {
            Some(Ordering::Equal)
        } else {
            None
        }
    }

    #[inline]
    fn lt(&self, other: &Self) -> bool {
        self.x() < other.x() && self.y() < other.y() && self.z() < other.z()
    }

    #[inline]
    fn gt(&self, other: &Self) -> bool {
        self.x() > other.x() && self.y() > other.y() && self.z() > other.z()
    }

    #[inline]
    fn le(&self, other: &Self) -> bool {
        self.x() <= other.x() && self.y() <= other.y() && self.z() <= other.z()
    }

    #[inline]
    fn ge(&self, other: &Self) -> bool {
        self.x() >= other.x() && self.y() >= other.y() && self.z() >= other.z()
    }
}

// Use specialized implementation for integers because the default Div impl rounds towards zero,
// which is not what we want.
impl Div<i32> for Point3i {
    type Output = Self;

    #[inline]
    fn div(self, rhs: i32) -> Self {
        self.scalar_div_floor(rhs)
    }
}

impl Div<f32> for Point3f {
    type Output = Self;

    #[inline]
    fn div(self, rhs: f32) -> Self {
        self.map_components_unary(|c| c / rhs)
    }
}

impl Div<f32> for Point2f {
    type Output = Self;

    #[inline]
    fn div(self, rhs: f32) -> Self {
        self.map_components_unary(|c| c / rhs)
    }
}

macro_rules! impl_componentwise_ops {
    ($t:ty, $scalar:ty) => {
        impl Add for $t {
            type Output = Self;

            #[inline]
            fn add(self, rhs: Self) -> Self {
                self.map_components_binary(&rhs, |c1, c2| c1 + c2)
            }
        }

        impl Sub for $t {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: Self) -> Self {
                self.map_components_binary(&rhs, |c1, c2| c1 - c2)
            }
        }

        impl Mul<$scalar> for $t {
            type Output = Self;

            #[inline]
            fn mul(self, rhs: $scalar) -> Self {
                self.map_components_unary(|c| rhs * c)
            }
        }

        impl Mul<$t> for $scalar {
            type Output = $t;

            #[inline]
            fn mul(self, rhs: $t) -> $t {
                rhs * self
            }
        }

        impl Mul<Self> for $t {
            type Output = Self;

            #[inline]
            fn mul(self, rhs: Self) -> Self {
                self.map_components_binary(&rhs, |c1, c2| c1 * c2)
            }
        }

        impl Neg for $t {
            type Output = Self;

            #[inline]
            fn neg(self) -> Self {
                self.map_components_unary(|c| -c)
            }
        }

        impl AddAssign for $t {
            #[inline]
            fn add_assign(&mut self, rhs: Self) {
                *self = *self + rhs;
            }
        }

        impl SubAssign for $t {
            #[inline]
            fn sub_assign(&mut self, rhs: Self) {
                *self = *self - rhs;
            }
        }
    };
}

impl_componentwise_ops!(Point2i, i32);
impl_componentwise_ops!(Point2f, f32);
impl_componentwise_ops!(Point3i, i32);
impl_componentwise_ops!(Point3f, f32);

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn integer_division_rounds_down() {
        assert_eq!(PointN([-1, -8, -9]) / 8, PointN([-1, -1, -2]));
        assert_eq!(PointN([7, 8, 15]) / 8, PointN([0, 1, 1]));
        assert_eq!(PointN([-1, 9, -9]).scalar_mod_floor(8), PointN([7, 1, 7]));
    }

    #[test]
    fn in_voxel_floors_negative_components() {
        assert_eq!(PointN([-0.5, 0.5, 1.99]).in_voxel(), PointN([-1, 0, 1]));
    }

    #[test]
    fn moore_offsets_center_is_index_13() {
        let offsets: Vec<_> = Point3i::moore_offsets_with_center().collect();
        assert_eq!(offsets.len(), 27);
        assert_eq!(offsets[0], PointN([-1, -1, -1]));
        assert_eq!(offsets[13], Point3i::ZERO);
        assert_eq!(offsets[26], PointN([1, 1, 1]));
    }

    #[test]
    fn partial_order_is_componentwise() {
        let min = PointN([0, 0, 0]);
        let lub = PointN([3, 3, 3]);
        assert!(min <= PointN([0, 1, 2]) && PointN([0, 1, 2]) < lub);
        assert!(!(PointN([0, 3, 2]) < lub));
    }

    #[test]
    fn out_of_range_floats_do_not_fit() {
        assert!(PointN([1.0e9, 0.0, 0.0]).fits_in_i32());
        assert!(!PointN([1.0e10, 0.0, 0.0]).fits_in_i32());
        assert!(!PointN([f32::NAN, 0.0, 0.0]).fits_in_i32());
    }
}
