//! The core geometric types shared by the sparse TSDF volume:
//! - `PointN`: an N-dimensional point, most importantly `Point3i` (block and voxel coordinates) and `Point3f`
//! - `ExtentN`: an axis-aligned box, `Extent3i` for lattice regions and `Extent3f` for world-space bounds
//! - `Transform3`: a rigid transformation (camera poses, volume-to-world placement)
//! - `PinholeIntrinsics`: pinhole camera projection
//! - `GridRayTraversal3`: Amanatides-Woo traversal of a unit lattice

pub mod camera;
pub mod extent;
pub mod grid_ray_traversal;
pub mod point;
pub mod transform;

pub use camera::PinholeIntrinsics;
pub use extent::{Extent3PointIter, Extent3f, Extent3i, ExtentN};
pub use grid_ray_traversal::{voxels_on_segment, GridRayTraversal3, SegmentVoxelIter};
pub use point::{Point2, Point2f, Point2i, Point3, Point3f, Point3i, PointN};
pub use transform::Transform3;

pub use num;

pub mod prelude {
    pub use super::{
        Extent3f, Extent3i, ExtentN, GridRayTraversal3, PinholeIntrinsics, Point2, Point2f,
        Point2i, Point3, Point3f, Point3i, PointN, Transform3,
    };
}
