use crate::{Point3f, Point3i};

#[cfg(test)]
use crate::PointN;

/// Grid traversal algorithm by Amanatides and Woo. Visits every voxel intersecting the given ray.
///
/// The lattice has unit spacing, so callers traversing blocks of side `s` should divide positions by `s` first.
pub struct GridRayTraversal3 {
    // The current voxel position.
    current_grid_point: Point3i,
    // Either -1 or +1 in each axis. The direction we step along each axis.
    step: Point3i,
    // The amount of time it takes to move 1 unit along each axis.
    t_delta: Point3f,
    // The next time when each axis will cross a voxel boundary.
    t_max: Point3f,
}

impl GridRayTraversal3 {
    /// Initialize the traversal, beginning at the `start` position and moving along the `velocity` vector.
    #[inline]
    pub fn new(start: Point3f, velocity: Point3f) -> Self {
        let current_grid_point = start.in_voxel();
        let vel_signs = velocity.signum();
        let step = vel_signs.as_3i();
        let t_delta = vel_signs.map_components_binary(&velocity, |s, v| s / v);

        // For each axis, calculate the time delta we need to reach a voxel boundary on that axis. For a positive velocity, this
        // is just the next voxel, but for negative, it's the current voxel (hence the join with zero).
        let next_bounds: Point3f = (current_grid_point + step.join(&Point3i::ZERO)).into();
        let delta_to_next_bounds = next_bounds - start;
        let t_max = delta_to_next_bounds.map_components_binary(&velocity, |d, v| d / v);

        Self {
            current_grid_point,
            step,
            t_delta,
            t_max,
        }
    }

    /// Move the the next closest voxel along the ray.
    #[inline]
    pub fn step(&mut self) {
        if self.t_max.x() < self.t_max.y() {
            if self.t_max.x() < self.t_max.z() {
                *self.current_grid_point.x_mut() += self.step.x();
                *self.t_max.x_mut() += self.t_delta.x();
            } else {
                *self.current_grid_point.z_mut() += self.step.z();
                *self.t_max.z_mut() += self.t_delta.z();
            }
        } else if self.t_max.y() < self.t_max.z() {
            *self.current_grid_point.y_mut() += self.step.y();
            *self.t_max.y_mut() += self.t_delta.y();
        } else {
            *self.current_grid_point.z_mut() += self.step.z();
            *self.t_max.z_mut() += self.t_delta.z();
        }
    }

    /// The current voxel position. Changes on every call of `step`.
    #[inline]
    pub fn current_voxel(&self) -> Point3i {
        self.current_grid_point
    }

    /// The time at which the ray leaves the current voxel.
    #[inline]
    pub fn exit_time(&self) -> f32 {
        self.t_max.x().min(self.t_max.y()).min(self.t_max.z())
    }
}

/// Visits every unit voxel touched by the closed segment from `start` to `end`, in order, both endpoint voxels included.
pub fn voxels_on_segment(start: Point3f, end: Point3f) -> SegmentVoxelIter {
    let first = start.in_voxel();
    let last = end.in_voxel();
    let remaining_steps = (last - first).map_components_unary(i32::abs);

    SegmentVoxelIter {
        traversal: GridRayTraversal3::new(start, end - start),
        remaining: remaining_steps.x() + remaining_steps.y() + remaining_steps.z() + 1,
        last,
    }
}

/// Iterator returned by `voxels_on_segment`.
pub struct SegmentVoxelIter {
    traversal: GridRayTraversal3,
    // Upper bound on the number of voxels left to emit. Guards against floating point drift near voxel corners.
    remaining: i32,
    last: Point3i,
}

impl Iterator for SegmentVoxelIter {
    type Item = Point3i;

    #[inline]
    fn next(&mut self) -> Option<Point3i> {
        if self.remaining <= 0 {
            return None;
        }

        let voxel = self.traversal.current_voxel();
        if voxel == self.last || self.traversal.exit_time() > 1.0 {
            self.remaining = 0;
        } else {
            self.remaining -= 1;
            self.traversal.step();
        }

        Some(voxel)
    }
}

impl core::iter::FusedIterator for SegmentVoxelIter {}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
