//! Box overlap broad phase.
//!
//! Every SGP owns one axis-aligned box here, refreshed before each step; a
//! sweep along the widest axis produces the ordered candidate pair set.

use slotmap::{new_key_type, SlotMap};
use vek::{Aabb, Vec3};

use crate::body::BodyId;

new_key_type! {
    /// Key of one SGP box in the index.
    pub struct BoxKey;
}

/// One box of the index.
#[derive(Debug, Clone, Copy)]
pub struct BoxEntry {
    /// Current extents.
    pub aabb: Aabb<f64>,
    /// Owning body.
    pub body: BodyId,
    /// SGP index within the body.
    pub sgp: usize,
    /// Surface id when the SGP has a single one (spheres, ellipsoids).
    pub surface: Option<i32>,
}

/// Box overlap index.
#[derive(Debug, Default)]
pub struct BoxIndex {
    /// All boxes.
    boxes: SlotMap<BoxKey, BoxEntry>,
}

impl BoxIndex {
    /// Construct an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a box and return its key.
    pub fn insert(&mut self, entry: BoxEntry) -> BoxKey {
        self.boxes.insert(entry)
    }

    /// Remove a box.
    pub fn remove(&mut self, key: BoxKey) {
        self.boxes.remove(key);
    }

    /// Refresh the extents of a box.
    pub fn update(&mut self, key: BoxKey, aabb: Aabb<f64>) {
        if let Some(entry) = self.boxes.get_mut(key) {
            entry.aabb = aabb;
        }
    }

    /// Access a box.
    pub fn get(&self, key: BoxKey) -> Option<&BoxEntry> {
        self.boxes.get(key)
    }

    /// Number of live boxes.
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Ordered overlapping pairs, filtered by the caller before narrow phase
    /// dispatch.
    ///
    /// The filter receives both entries and must apply the domain exclusion
    /// sets (surface pairs, body pairs) and the self-contact rule.
    pub fn overlapping_pairs(
        &self,
        filter: impl Fn(&BoxEntry, &BoxEntry) -> bool,
    ) -> Vec<(BoxKey, BoxKey)> {
        // Sweep along the axis with the widest spread
        let mut lo = Vec3::broadcast(f64::MAX);
        let mut hi = Vec3::broadcast(f64::MIN);
        for (_, entry) in self.boxes.iter() {
            lo = crate::math::vmin(lo, entry.aabb.min);
            hi = crate::math::vmax(hi, entry.aabb.max);
        }
        let spread = hi - lo;
        let axis = if spread.x >= spread.y && spread.x >= spread.z {
            0
        } else if spread.y >= spread.z {
            1
        } else {
            2
        };

        let mut sorted: Vec<(BoxKey, &BoxEntry)> = self.boxes.iter().collect();
        sorted.sort_by(|a, b| {
            a.1.aabb.min[axis]
                .partial_cmp(&b.1.aabb.min[axis])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut pairs = Vec::new();
        for (i, (key_a, entry_a)) in sorted.iter().enumerate() {
            for (key_b, entry_b) in &sorted[i + 1..] {
                if entry_b.aabb.min[axis] > entry_a.aabb.max[axis] {
                    break;
                }
                if !overlap(&entry_a.aabb, &entry_b.aabb) {
                    continue;
                }
                if !filter(entry_a, entry_b) {
                    continue;
                }

                // Canonical pair order keeps downstream processing stable
                if (entry_a.body, entry_a.sgp) <= (entry_b.body, entry_b.sgp) {
                    pairs.push((*key_a, *key_b));
                } else {
                    pairs.push((*key_b, *key_a));
                }
            }
        }

        pairs.sort_by_key(|(a, b)| {
            let a = &self.boxes[*a];
            let b = &self.boxes[*b];

            (a.body, a.sgp, b.body, b.sgp)
        });

        pairs
    }
}

/// Box overlap test on all three axes.
fn overlap(a: &Aabb<f64>, b: &Aabb<f64>) -> bool {
    a.min.x <= b.max.x
        && b.min.x <= a.max.x
        && a.min.y <= b.max.y
        && b.min.y <= a.max.y
        && a.min.z <= b.max.z
        && b.min.z <= a.max.z
}

#[cfg(test)]
mod tests {
    use vek::{Aabb, Vec3};

    use crate::body::BodyId;

    use super::{BoxEntry, BoxIndex};

    fn entry(body: u32, sgp: usize, min: f64, max: f64) -> BoxEntry {
        BoxEntry {
            aabb: Aabb {
                min: Vec3::broadcast(min),
                max: Vec3::broadcast(max),
            },
            body: BodyId(body),
            sgp,
            surface: None,
        }
    }

    #[test]
    fn test_pairs() {
        let mut index = BoxIndex::new();
        index.insert(entry(1, 0, 0.0, 1.0));
        index.insert(entry(2, 0, 0.5, 1.5));
        index.insert(entry(3, 0, 5.0, 6.0));

        let pairs = index.overlapping_pairs(|_, _| true);
        assert_eq!(pairs.len(), 1);

        let a = index.get(pairs[0].0).unwrap();
        let b = index.get(pairs[0].1).unwrap();
        assert_eq!((a.body, b.body), (BodyId(1), BodyId(2)));
    }

    #[test]
    fn test_filtered_pairs() {
        let mut index = BoxIndex::new();
        index.insert(entry(1, 0, 0.0, 1.0));
        index.insert(entry(1, 1, 0.5, 1.5));

        // Same body pairs only pass when the filter allows self contact
        assert_eq!(
            index
                .overlapping_pairs(|a, b| a.body != b.body)
                .len(),
            0
        );
        assert_eq!(index.overlapping_pairs(|_, _| true).len(), 1);
    }
}
