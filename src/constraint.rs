//! Constraints: frictional contacts and the bilateral kinds.

use bitflags::bitflags;
use vek::{Mat3, Vec3};

use crate::{body::BodyId, surface::SurfaceMaterialState, tms::TimeSeries};

/// Stable constraint identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstraintId(pub u32);

/// Constraint kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// Unilateral frictional contact.
    Contact,
    /// Referential point fixed along all directions.
    FixPoint,
    /// Referential point fixed along a spatial direction.
    FixDirection,
    /// Prescribed velocity along a spatial direction.
    VeloDir,
    /// Rigid link between two referential points.
    RigidLink,
    /// User spring between two referential points.
    Spring,
}

impl ConstraintKind {
    /// Integer tag used in frame stores.
    pub fn tag(&self) -> i32 {
        match self {
            Self::Contact => 0,
            Self::FixPoint => 1,
            Self::FixDirection => 2,
            Self::VeloDir => 3,
            Self::RigidLink => 4,
            Self::Spring => 5,
        }
    }

    /// Kind from its frame store tag.
    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            0 => Some(Self::Contact),
            1 => Some(Self::FixPoint),
            2 => Some(Self::FixDirection),
            3 => Some(Self::VeloDir),
            4 => Some(Self::RigidLink),
            5 => Some(Self::Spring),
            _ => None,
        }
    }
}

bitflags! {
    /// Constraint state flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConState: u32 {
        /// Contact with unbroken cohesion.
        const COHESIVE = 0x01;
        /// Freshly inserted this step.
        const NEW = 0x02;
        /// Locked id, never freed back to the pool.
        const IDLOCK = 0x04;
        /// Boundary mirror migrated in from another rank.
        const EXTERNAL = 0x08;
        /// Scratch flag used within single phases.
        const DONE = 0x10;
    }
}

/// Size of the auxiliary Z storage.
pub const Z_SIZE: usize = 7;

/// A constraint between a master body and an optional slave.
#[derive(Debug, Clone)]
pub struct Constraint {
    /// Unique identifier.
    pub id: ConstraintId,
    /// Kind.
    pub kind: ConstraintKind,
    /// Average reaction over the step, in the local base.
    pub r: Vec3<f64>,
    /// Relative velocity, in the local base.
    pub u: Vec3<f64>,
    /// Relative velocity at the beginning of the step.
    pub v: Vec3<f64>,
    /// Spatial point.
    pub point: Vec3<f64>,
    /// Local orthonormal base; the third column is the outward normal (for
    /// contacts) or the constrained direction (for bilateral kinds).
    pub base: Mat3<f64>,
    /// Contact area; unused for bilateral kinds.
    pub area: f64,
    /// Contact gap; unused for bilateral kinds.
    pub gap: f64,
    /// Auxiliary storage: rigid link vector and length, prescribed velocity,
    /// tensile strength, spring state.
    pub z: [f64; Z_SIZE],
    /// Constraint satisfaction merit.
    pub merit: f64,
    /// State flags.
    pub state: ConState,
    /// Surface id pair of a contact, master first.
    pub spair: [i32; 2],
    /// Surface pair material snapshot of a contact.
    pub mat: SurfaceMaterialState,
    /// Prescribed velocity series of a VELODIR constraint.
    pub tms: Option<TimeSeries>,
    /// Master body.
    pub master: BodyId,
    /// Optional slave body.
    pub slave: Option<BodyId>,
    /// Master referential attachment point.
    pub mpnt: Vec3<f64>,
    /// Slave referential attachment point.
    pub spnt: Vec3<f64>,
    /// Master SGP index.
    pub msgp: usize,
    /// Slave SGP index.
    pub ssgp: usize,
    /// Origin rank of an external mirror; residence rank on serial reads of
    /// parallel output.
    pub rank: i32,
}

impl Constraint {
    /// Fresh constraint skeleton; the domain fills the id and graph links.
    pub fn new(kind: ConstraintKind, master: BodyId) -> Self {
        Self {
            id: ConstraintId(0),
            kind,
            r: Vec3::zero(),
            u: Vec3::zero(),
            v: Vec3::zero(),
            point: Vec3::zero(),
            base: Mat3::identity(),
            area: 0.0,
            gap: 0.0,
            z: [0.0; Z_SIZE],
            merit: 0.0,
            state: ConState::NEW,
            spair: [0; 2],
            mat: SurfaceMaterialState::default(),
            tms: None,
            master,
            slave: None,
            mpnt: Vec3::zero(),
            spnt: Vec3::zero(),
            msgp: 0,
            ssgp: 0,
            rank: 0,
        }
    }

    /// Rigid link vector `Z[0..3]`.
    pub fn riglnk_vec(&self) -> Vec3<f64> {
        Vec3::new(self.z[0], self.z[1], self.z[2])
    }

    /// Store the rigid link vector.
    pub fn set_riglnk_vec(&mut self, v: Vec3<f64>) {
        self.z[0] = v.x;
        self.z[1] = v.y;
        self.z[2] = v.z;
    }

    /// Rigid link length `Z[3]`.
    pub fn riglnk_len(&self) -> f64 {
        self.z[3]
    }

    /// Tensile strength `Z[4]` of a fix-point or rigid link; the constraint
    /// releases once its tension exceeds this bound.
    pub fn strength(&self) -> f64 {
        self.z[4]
    }

    /// Prescribed velocity `Z[0]` of a VELODIR constraint at the end of the
    /// step.
    pub fn velodir(&self) -> f64 {
        self.z[0]
    }

    /// Spring stiffness `Z[0]` and dashpot `Z[1]`.
    pub fn spring(&self) -> (f64, f64) {
        (self.z[0], self.z[1])
    }

    /// Spring stroke limits `Z[2..4]`.
    pub fn spring_limits(&self) -> (f64, f64) {
        (self.z[2], self.z[3])
    }

    /// Spring referential length `Z[5]` and current stroke `Z[6]`.
    pub fn spring_stroke(&self) -> (f64, f64) {
        (self.z[5], self.z[6])
    }

    /// Whether the constraint couples two bodies rather than anchoring one
    /// to a spatial point.
    pub fn two_sided(&self) -> bool {
        self.slave.is_some()
    }
}
