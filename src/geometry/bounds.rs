//! Axis-aligned bounding volume shared by every geometry contributor.

use glam::Vec3;

/// Axis-aligned bounding box.
///
/// Starts empty (inverted extents) and grows by merging in points or other
/// boxes. Every sampler and mesher merges the positions it emits; the circuit
/// loader unions the per-worker boxes into the scene's world bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            min: Vec3::splat(f32::MAX),
            max: Vec3::splat(f32::MIN),
        }
    }
}

impl Bounds {
    /// An empty box that any merge will overwrite.
    pub fn empty() -> Self {
        Self::default()
    }

    /// True until at least one point has been merged.
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x
    }

    /// Grow the box to contain `point`.
    pub fn merge_point(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Grow the box to contain `other`. Merging an empty box is a no-op.
    pub fn merge(&mut self, other: &Bounds) {
        if other.is_empty() {
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Center of the box. Meaningless on an empty box.
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Extent along each axis.
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}
