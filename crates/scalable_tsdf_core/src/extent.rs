use crate::{Point3f, Point3i, PointN};

use core::ops::Range;
use itertools::{iproduct, ConsTuples, Product};
use serde::{Deserialize, Serialize};

/// A 3-dimensional extent with scalar type `i32`.
pub type Extent3i = ExtentN<[i32; 3]>;
/// A 3-dimensional extent with scalar type `f32`.
pub type Extent3f = ExtentN<[f32; 3]>;

/// An N-dimensional extent. This is mathematically the Cartesian product of a half-closed interval `[a, b)` in each dimension.
/// You can also just think of it as an axis-aligned box with some shape and a minimum point.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct ExtentN<N> {
    /// The least point contained in the extent.
    pub minimum: PointN<N>,
    /// The length of each dimension.
    pub shape: PointN<N>,
}

impl<N> ExtentN<N> {
    /// The default representation of an extent as the minimum point and shape.
    #[inline]
    pub fn from_min_and_shape(minimum: PointN<N>, shape: PointN<N>) -> Self {
        Self { minimum, shape }
    }
}

impl Extent3i {
    /// Returns the smallest extent containing both `min` and `max` (inclusive).
    #[inline]
    pub fn from_min_and_max(min: Point3i, max: Point3i) -> Self {
        Self::from_min_and_shape(min, max - min + Point3i::ONES)
    }

    /// The least point `p` for which all points `q` in the extent satisfy `q < p`.
    #[inline]
    pub fn least_upper_bound(&self) -> Point3i {
        self.minimum + self.shape
    }

    /// The greatest point contained in the extent.
    #[inline]
    pub fn max(&self) -> Point3i {
        self.least_upper_bound() - Point3i::ONES
    }

    #[inline]
    pub fn num_points(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.shape.volume() as usize
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        !(self.shape > Point3i::ZERO)
    }

    /// Returns `true` iff the point `p` is contained in this extent.
    #[inline]
    pub fn contains(&self, p: Point3i) -> bool {
        self.minimum <= p && p < self.least_upper_bound()
    }

    /// Returns the extent containing only the points in both `self` and `other`.
    #[inline]
    pub fn intersection(&self, other: &Self) -> Self {
        let minimum = self.minimum.join(&other.minimum);
        let lub = self.least_upper_bound().meet(&other.least_upper_bound());

        Self::from_min_and_shape(minimum, (lub - minimum).join(&Point3i::ZERO))
    }

    /// Iterates over all points in row-major order (X fastest).
    #[inline(always)]
    pub fn iter_points(&self) -> Extent3PointIter {
        let lub = self.least_upper_bound();

        Extent3PointIter {
            // iproduct is opposite of row-major order.
            product_iter: iproduct!(
                self.minimum.z()..lub.z(),
                self.minimum.y()..lub.y(),
                self.minimum.x()..lub.x()
            ),
        }
    }
}

impl Extent3f {
    /// Returns the box spanning `min` to `max`.
    #[inline]
    pub fn from_min_and_max(min: Point3f, max: Point3f) -> Self {
        Self::from_min_and_shape(min, max - min)
    }

    #[inline]
    pub fn least_upper_bound(&self) -> Point3f {
        self.minimum + self.shape
    }

    /// The 8 corners of the box, in the same order as `Extent3i::iter_points` visits a `2x2x2` extent.
    #[inline]
    pub fn corners(&self) -> [Point3f; 8] {
        let min = self.minimum;
        let lub = self.least_upper_bound();

        [
            PointN([min.x(), min.y(), min.z()]),
            PointN([lub.x(), min.y(), min.z()]),
            PointN([min.x(), lub.y(), min.z()]),
            PointN([lub.x(), lub.y(), min.z()]),
            PointN([min.x(), min.y(), lub.z()]),
            PointN([lub.x(), min.y(), lub.z()]),
            PointN([min.x(), lub.y(), lub.z()]),
            PointN([lub.x(), lub.y(), lub.z()]),
        ]
    }

    /// The smallest box containing `self` and `p`.
    #[inline]
    pub fn add_point(&self, p: Point3f) -> Self {
        Self::from_min_and_max(self.minimum.meet(&p), self.least_upper_bound().join(&p))
    }
}

impl From<Extent3i> for Extent3f {
    #[inline]
    fn from(e: Extent3i) -> Self {
        Self::from_min_and_shape(e.minimum.into(), e.shape.into())
    }
}

/// An iterator over all points in an `Extent3i`.
pub struct Extent3PointIter {
    product_iter: ConsTuples<RangeProduct3, ((i32, i32), i32)>,
}

type RangeProduct2 = Product<Range<i32>, Range<i32>>;
type RangeProduct3 = Product<RangeProduct2, Range<i32>>;

impl Iterator for Extent3PointIter {
    type Item = Point3i;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.product_iter.next().map(|(z, y, x)| PointN([x, y, z]))
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝

#[cfg(test)]
mod test {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn row_major_extent_iter() {
        let extent = Extent3i::from_min_and_shape(PointN([0, 0, 0]), PointN([2, 2, 2]));

        let points: Vec<_> = extent.iter_points().collect();

        assert_eq!(
            points,
            vec![
                PointN([0, 0, 0]),
                PointN([1, 0, 0]),
                PointN([0, 1, 0]),
                PointN([1, 1, 0]),
                PointN([0, 0, 1]),
                PointN([1, 0, 1]),
                PointN([0, 1, 1]),
                PointN([1, 1, 1]),
            ]
        );
    }

    #[test]
    fn min_and_max_are_inclusive() {
        let extent = Extent3i::from_min_and_max(PointN([-1, 0, 2]), PointN([1, 0, 3]));

        assert_eq!(extent.shape, PointN([3, 1, 2]));
        assert_eq!(extent.max(), PointN([1, 0, 3]));
        assert_eq!(extent.num_points(), 6);
        assert!(extent.contains(PointN([1, 0, 3])));
        assert!(!extent.contains(PointN([2, 0, 3])));
    }

    #[test]
    fn disjoint_intersection_is_empty() {
        let a = Extent3i::from_min_and_shape(Point3i::ZERO, Point3i::fill(2));
        let b = Extent3i::from_min_and_shape(Point3i::fill(5), Point3i::fill(2));

        assert!(a.intersection(&b).is_empty());
        assert_eq!(a.intersection(&b).num_points(), 0);
    }
}
