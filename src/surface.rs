//! Surface pair materials: friction, cohesion, restitution and the penalty
//! spring/dashpot parameters.

use hashbrown::HashMap;

/// Material assigned to a pair of surface ids.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceMaterial {
    /// Coulomb friction coefficient.
    pub friction: f64,
    /// Cohesion per unit area; positive makes fresh contacts cohesive.
    pub cohesion: f64,
    /// Velocity restitution.
    pub restitution: f64,
    /// Penalty spring stiffness.
    pub spring: f64,
    /// Penalty dashpot coefficient.
    pub dashpot: f64,
}

impl Default for SurfaceMaterial {
    fn default() -> Self {
        Self {
            friction: 0.0,
            cohesion: 0.0,
            restitution: 0.0,
            spring: 1e6,
            dashpot: 1e3,
        }
    }
}

/// Per-contact snapshot of the surface pair material.
///
/// Taken at contact creation and persisted with the constraint, so that
/// later edits of the pair set do not perturb live contacts.
pub type SurfaceMaterialState = SurfaceMaterial;

/// Set of surface pair materials with a default fallback.
#[derive(Debug, Clone, Default)]
pub struct SurfacePairSet {
    /// Fallback material.
    pub default: SurfaceMaterial,
    /// Materials by unordered surface id pair.
    pairs: HashMap<(i32, i32), SurfaceMaterial>,
}

impl SurfacePairSet {
    /// Construct with a default material.
    pub fn new(default: SurfaceMaterial) -> Self {
        Self {
            default,
            pairs: HashMap::new(),
        }
    }

    /// Assign a material to a surface id pair, in either order.
    pub fn insert(&mut self, surf1: i32, surf2: i32, material: SurfaceMaterial) {
        self.pairs.insert(ordered(surf1, surf2), material);
    }

    /// Material of a pair, falling back to the default.
    pub fn get(&self, surf1: i32, surf2: i32) -> SurfaceMaterial {
        self.pairs
            .get(&ordered(surf1, surf2))
            .copied()
            .unwrap_or(self.default)
    }
}

/// Unordered pair key.
fn ordered(a: i32, b: i32) -> (i32, i32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::{SurfaceMaterial, SurfacePairSet};

    #[test]
    fn test_pair_lookup_is_unordered() {
        let mut set = SurfacePairSet::default();
        set.insert(
            1,
            2,
            SurfaceMaterial {
                friction: 0.3,
                ..SurfaceMaterial::default()
            },
        );

        assert_eq!(set.get(2, 1).friction, 0.3);
        assert_eq!(set.get(1, 3).friction, 0.0);
    }
}
