//! Contact detection: box overlap broad phase and pairwise narrow phase.

pub mod broad;
pub mod narrow;

use vek::Vec3;

/// Geometry of one detected or updated contact, oriented so that the normal
/// points outward from the master side.
#[derive(Debug, Clone, Copy)]
pub struct ContactGeometry {
    /// Spatial contact point on the master side.
    pub point: Vec3<f64>,
    /// Contact point on the slave side.
    pub slave_point: Vec3<f64>,
    /// Outward unit normal of the master.
    pub normal: Vec3<f64>,
    /// Semi-negative gap; negative means interpenetration.
    pub gap: f64,
    /// Contact area.
    pub area: f64,
    /// Surface id pair, master first.
    pub spair: [i32; 2],
}

/// Outcome of a fresh detection.
#[derive(Debug, Clone, Copy)]
pub enum Detect {
    /// Overlap empty.
    NoContact,
    /// A new contact; `master_is_second` tells which input the normal points
    /// outward from.
    Contact {
        /// The contact data.
        geometry: ContactGeometry,
        /// When set, the second input is the master.
        master_is_second: bool,
    },
    /// Geometry sanity failed; the pair must be dropped.
    Reject,
}

/// Outcome of updating an existing contact, called with `(master, slave)`
/// argument order.
#[derive(Debug, Clone, Copy)]
pub enum Update {
    /// Overlap vanished; the contact dies.
    Gone,
    /// Contact refreshed with the same surface pair.
    Updated(ContactGeometry),
    /// Contact refreshed but the nearest surfaces changed; a fresh detection
    /// is requested upstream.
    SurfaceChanged(ContactGeometry),
    /// Geometry sanity failed; the pair must be dropped.
    Reject,
}
