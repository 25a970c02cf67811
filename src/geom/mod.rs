//! Geometric primitives making up body shapes.

pub mod convex;
pub mod ellipsoid;
pub mod gjk;
pub mod intersect;
pub mod sphere;

use smallvec::SmallVec;
use vek::{Mat3, Vec3};

pub use self::{convex::Convex, ellipsoid::Ellipsoid, sphere::Sphere};

/// Oriented plane described by an outward unit normal and a point on it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Outward unit normal.
    pub normal: Vec3<f64>,
    /// Any point on the plane.
    pub point: Vec3<f64>,
}

impl Plane {
    /// Signed distance of a point, positive on the outward side.
    pub fn signed_distance(&self, point: Vec3<f64>) -> f64 {
        self.normal.dot(point - self.point)
    }
}

/// Flat view of a convex cell: vertices, outward planes and surface ids.
///
/// The first `nsurf` planes lie on the body surface and carry the matching
/// entries of `surfaces`; the rest are internal faces.
#[derive(Debug, Clone, Default)]
pub struct ConvexData {
    /// Current vertices.
    pub vertices: SmallVec<[Vec3<f64>; 8]>,
    /// Current outward planes.
    pub planes: SmallVec<[Plane; 6]>,
    /// Surface ids of the surface planes.
    pub surfaces: SmallVec<[i32; 6]>,
    /// How many leading planes lie on the body surface.
    pub nsurf: usize,
}

/// Motion map carrying a primitive from its referential to its current
/// placement.
#[derive(Debug, Clone, Copy)]
pub enum Motion<'a> {
    /// Current equals referential.
    Identity,
    /// Rigid motion `x = r (X - c₀) + c`.
    Rigid {
        /// Rotation.
        rotation: Mat3<f64>,
        /// Referential center.
        ref_center: Vec3<f64>,
        /// Current center.
        center: Vec3<f64>,
    },
    /// Homogeneous deformation `x = f (X - c₀) + c`.
    Affine {
        /// Deformation gradient.
        gradient: Mat3<f64>,
        /// Referential center.
        ref_center: Vec3<f64>,
        /// Current center.
        center: Vec3<f64>,
    },
    /// Per-node displacements of a mesh primitive, `3 N` long.
    Nodal(&'a [f64]),
}

impl Motion<'_> {
    /// Map a referential point to its current position.
    ///
    /// Only valid for the pointwise kinds; mesh primitives consume
    /// [`Motion::Nodal`] directly.
    pub fn map_point(&self, point: Vec3<f64>) -> Vec3<f64> {
        match self {
            Self::Identity => point,
            Self::Rigid {
                rotation,
                ref_center,
                center,
            } => *rotation * (point - *ref_center) + *center,
            Self::Affine {
                gradient,
                ref_center,
                center,
            } => *gradient * (point - *ref_center) + *center,
            Self::Nodal(_) => point,
        }
    }

    /// Linear part of the map, if it has one.
    pub fn linear(&self) -> Mat3<f64> {
        match self {
            Self::Identity | Self::Nodal(_) => Mat3::identity(),
            Self::Rigid { rotation, .. } => *rotation,
            Self::Affine { gradient, .. } => *gradient,
        }
    }
}

/// Partial characteristics of a primitive: volume, static moments and the
/// Euler tensor about the global origin.
///
/// Summing these componentwise over a shape and centering afterwards yields
/// the shape mass center and inertia data.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Characteristics {
    /// Volume.
    pub volume: f64,
    /// Static moments `∫ x dV`.
    pub moments: Vec3<f64>,
    /// Euler tensor `∫ x xᵀ dV`.
    pub euler: Mat3<f64>,
}

impl Characteristics {
    /// Accumulate another primitive's contribution.
    pub fn add(&mut self, other: &Characteristics) {
        self.volume += other.volume;
        self.moments += other.moments;
        self.euler += other.euler;
    }

    /// Mass center implied by the accumulated moments.
    pub fn center(&self) -> Vec3<f64> {
        if self.volume > 0.0 {
            self.moments / self.volume
        } else {
            Vec3::zero()
        }
    }
}

/// Accumulate the characteristics of a solid tetrahedron `(a, b, c, o)` where
/// `o` is the fan apex; used by convex and mesh volume integrals.
pub(crate) fn tetra_characteristics(
    a: Vec3<f64>,
    b: Vec3<f64>,
    c: Vec3<f64>,
    o: Vec3<f64>,
    out: &mut Characteristics,
) {
    let da = a - o;
    let db = b - o;
    let dc = c - o;

    // Signed volume of the tetrahedron
    let vol = da.dot(db.cross(dc)) / 6.0;

    out.volume += vol;
    out.moments += (a + b + c + o) * (vol / 4.0);

    // ∫ xᵢxⱼ over a tetrahedron: V/20 (Σₖ vₖvₖᵀ + (Σₖ vₖ)(Σₖ vₖ)ᵀ)
    let sum = a + b + c + o;
    let mut second = crate::math::outer(sum, sum);
    for v in [a, b, c, o] {
        second += crate::math::outer(v, v);
    }
    out.euler += second * (vol / 20.0);
}
