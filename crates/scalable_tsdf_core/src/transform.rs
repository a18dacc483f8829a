use crate::{Point3f, PointN};

use serde::{Deserialize, Serialize};

/// A rigid transformation `x -> R * x + t`, where `R` is a rotation matrix stored in row-major order.
///
/// Poses are always given as "A to B" transforms, e.g. a camera pose is the camera-to-world transform.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Transform3 {
    pub rotation: [[f32; 3]; 3],
    pub translation: Point3f,
}

impl Default for Transform3 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform3 {
    pub const IDENTITY: Self = Self {
        rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        translation: PointN([0.0; 3]),
    };

    #[inline]
    pub fn from_rotation_translation(rotation: [[f32; 3]; 3], translation: Point3f) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    #[inline]
    pub fn from_translation(translation: Point3f) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    /// Rotation of `angle` radians about the `+Y` axis, followed by `translation`.
    pub fn from_yaw_translation(angle: f32, translation: Point3f) -> Self {
        let (s, c) = angle.sin_cos();

        Self::from_rotation_translation([[c, 0.0, s], [0.0, 1.0, 0.0], [-s, 0.0, c]], translation)
    }

    /// Builds a transform from a row-major 4x4 homogeneous matrix. The bottom row is ignored.
    pub fn from_row_major_4x4(m: [[f32; 4]; 4]) -> Self {
        Self::from_rotation_translation(
            [
                [m[0][0], m[0][1], m[0][2]],
                [m[1][0], m[1][1], m[1][2]],
                [m[2][0], m[2][1], m[2][2]],
            ],
            PointN([m[0][3], m[1][3], m[2][3]]),
        )
    }

    /// Applies only the rotation.
    #[inline]
    pub fn transform_vector(&self, v: Point3f) -> Point3f {
        let r = &self.rotation;

        PointN([
            r[0][0] * v.x() + r[0][1] * v.y() + r[0][2] * v.z(),
            r[1][0] * v.x() + r[1][1] * v.y() + r[1][2] * v.z(),
            r[2][0] * v.x() + r[2][1] * v.y() + r[2][2] * v.z(),
        ])
    }

    #[inline]
    pub fn transform_point(&self, p: Point3f) -> Point3f {
        self.transform_vector(p) + self.translation
    }

    /// The inverse of a rigid transform is `x -> R^T * x - R^T * t`.
    pub fn inverse(&self) -> Self {
        let r = &self.rotation;
        let rotation = [
            [r[0][0], r[1][0], r[2][0]],
            [r[0][1], r[1][1], r[2][1]],
            [r[0][2], r[1][2], r[2][2]],
        ];
        let inverse = Self::from_rotation_translation(rotation, Point3f::ZERO);
        let translation = -inverse.transform_vector(self.translation);

        Self::from_rotation_translation(rotation, translation)
    }

    /// Returns the transform that applies `rhs` first, then `self`.
    pub fn compose(&self, rhs: &Self) -> Self {
        let a = &self.rotation;
        let b = &rhs.rotation;
        let mut rotation = [[0.0; 3]; 3];
        for (i, row) in rotation.iter_mut().enumerate() {
            for (j, value) in row.iter_mut().enumerate() {
                *value = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
            }
        }

        Self::from_rotation_translation(rotation, self.transform_point(rhs.translation))
    }
}

#[cfg(feature = "glam")]
mod glam_conversions {
    use super::*;

    use glam as gl;

    impl From<gl::Vec3> for Point3f {
        #[inline]
        fn from(p: gl::Vec3) -> Self {
            PointN([p.x, p.y, p.z])
        }
    }

    impl From<Point3f> for gl::Vec3 {
        #[inline]
        fn from(p: Point3f) -> Self {
            gl::Vec3::new(p.x(), p.y(), p.z())
        }
    }

    impl From<gl::Mat4> for Transform3 {
        fn from(m: gl::Mat4) -> Self {
            // glam is column-major.
            let c = m.to_cols_array_2d();
            Transform3::from_row_major_4x4([
                [c[0][0], c[1][0], c[2][0], c[3][0]],
                [c[0][1], c[1][1], c[2][1], c[3][1]],
                [c[0][2], c[1][2], c[2][2], c[3][2]],
                [0.0, 0.0, 0.0, 1.0],
            ])
        }
    }
}

#[cfg(feature = "mint")]
mod mint_conversions {
    use super::*;

    impl From<mint::Vector3<f32>> for Point3f {
        #[inline]
        fn from(p: mint::Vector3<f32>) -> Self {
            PointN([p.x, p.y, p.z])
        }
    }

    impl From<Point3f> for mint::Vector3<f32> {
        #[inline]
        fn from(p: Point3f) -> Self {
            mint::Vector3 {
                x: p.x(),
                y: p.y(),
                z: p.z(),
            }
        }
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
