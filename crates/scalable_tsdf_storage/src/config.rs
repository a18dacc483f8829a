use crate::VolumeError;

use scalable_tsdf_core::prelude::*;

use serde::{Deserialize, Serialize};

/// Everything needed to construct a `TsdfVolume`. Can be loaded from a RON file:
///
/// ```
/// use scalable_tsdf_storage::VolumeConfig;
///
/// let config = VolumeConfig::from_ron_str("(block_side: 16, voxel_length: 0.01, bucket_count: 1000, value_capacity: 800)").unwrap();
/// assert_eq!(config.block_side, 16);
/// assert_eq!(config.upload_attempts, 10);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// The number of voxels along each edge of a block. Must be a power of two in `2..=32`.
    pub block_side: u32,
    /// The edge length of a voxel, in meters.
    pub voxel_length: f32,
    /// Observations further than this behind a surface are ignored, and signed distances are clamped to this in front.
    pub truncation_distance: f32,
    /// Depth samples beyond this range are invalid.
    pub max_depth: f32,
    pub bucket_count: usize,
    /// The maximum number of blocks.
    pub value_capacity: usize,
    pub volume_to_world: Transform3,
    /// The retry budget for bulk insertion.
    pub upload_attempts: usize,
    /// Optionally limit the number of blocks allocated per bulk insertion round. Integration is not limited.
    pub allocations_per_round: Option<usize>,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            block_side: 8,
            voxel_length: 3.0 / 512.0,
            truncation_distance: 0.04,
            max_depth: 3.0,
            bucket_count: 20_000,
            value_capacity: 20_000,
            volume_to_world: Transform3::IDENTITY,
            upload_attempts: 10,
            allocations_per_round: None,
        }
    }
}

impl VolumeConfig {
    pub fn read_file(path: &str) -> Result<Self, ron::Error> {
        let reader = std::fs::File::open(path)?;

        ron::de::from_reader(reader)
    }

    pub fn from_ron_str(s: &str) -> Result<Self, ron::Error> {
        ron::de::from_str(s)
    }

    pub fn to_ron_string(&self) -> Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
    }

    pub fn validate(&self) -> Result<(), VolumeError> {
        let invalid = |msg: String| Err(VolumeError::InvalidConfig(msg));

        if !self.block_side.is_power_of_two() || !(2..=32).contains(&self.block_side) {
            return invalid(format!(
                "block_side must be a power of two in 2..=32, got {}",
                self.block_side
            ));
        }
        for (name, value) in [
            ("voxel_length", self.voxel_length),
            ("truncation_distance", self.truncation_distance),
            ("max_depth", self.max_depth),
        ]
        .iter()
        {
            if !(value.is_finite() && *value > 0.0) {
                return invalid(format!("{} must be positive, got {}", name, value));
            }
        }
        if self.bucket_count == 0 || self.value_capacity == 0 {
            return invalid("bucket_count and value_capacity must be non-zero".to_string());
        }
        if self.value_capacity > i32::MAX as usize {
            return invalid(format!("value_capacity {} is too large", self.value_capacity));
        }
        if self.upload_attempts == 0 {
            return invalid("upload_attempts must be non-zero".to_string());
        }
        if self.allocations_per_round == Some(0) {
            return invalid("allocations_per_round must be non-zero".to_string());
        }

        Ok(())
    }

    #[inline]
    pub fn block_volume(&self) -> usize {
        (self.block_side * self.block_side * self.block_side) as usize
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn ron_round_trip() {
        let config = VolumeConfig {
            block_side: 4,
            volume_to_world: Transform3::from_translation(PointN([1.0, 2.0, 3.0])),
            allocations_per_round: Some(7),
            ..Default::default()
        };

        let s = config.to_ron_string().unwrap();

        assert_eq!(VolumeConfig::from_ron_str(&s).unwrap(), config);
    }

    #[test]
    fn rejects_bad_block_side() {
        for side in [0, 1, 3, 12, 64].iter() {
            let config = VolumeConfig {
                block_side: *side,
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(VolumeError::InvalidConfig(_))));
        }
    }

    #[test]
    fn rejects_non_positive_lengths() {
        let config = VolumeConfig {
            truncation_distance: 0.0,
            ..Default::default()
        };

        assert!(config.validate().is_err());
        assert!(VolumeConfig::default().validate().is_ok());
    }
}
