//! Bodies: kind-polymorphic state, mass operators and time stepping.

pub mod fem;
pub mod pseudo;
pub mod rigid;

use std::collections::BTreeSet;

use bitflags::bitflags;
use smallvec::SmallVec;
use vek::{Aabb, Mat3, Vec3};

use crate::{
    constraint::ConstraintId,
    error::{Error, Result},
    force::Force,
    geom::Motion,
    math,
    shape::{Shape, Sgp},
};

/// Stable body identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BodyId(pub u32);

/// Body kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// Zero velocity dimensions, never a solver unknown.
    Obstacle,
    /// Rotation and translation.
    Rigid,
    /// Homogeneous deformation and translation.
    PseudoRigid,
    /// Nodal finite element state.
    FiniteElement,
}

impl BodyKind {
    /// Integer tag used in frame stores.
    pub fn tag(&self) -> i32 {
        match self {
            Self::Obstacle => 0,
            Self::Rigid => 1,
            Self::PseudoRigid => 2,
            Self::FiniteElement => 3,
        }
    }

    /// Kind from its frame store tag.
    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            0 => Some(Self::Obstacle),
            1 => Some(Self::Rigid),
            2 => Some(Self::PseudoRigid),
            3 => Some(Self::FiniteElement),
            _ => None,
        }
    }
}

/// Time integration scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Rigid, positive energy drift, approximate momentum conservation.
    RigPos,
    /// Rigid, exact momentum conservation, negative energy drift (default).
    RigNeg,
    /// Rigid, semi-implicit, stable and momentum conserving.
    RigImp,
    /// Deformable explicit (default).
    DefExp,
    /// Deformable linearly implicit.
    DefLim,
}

/// Finite element formulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FemForm {
    /// Total Lagrangian over linear tetrahedra.
    TotalLagrangian,
}

bitflags! {
    /// Body behaviour flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BodyFlags: u32 {
        /// Within-body SGP pairs participate in contact detection.
        const SELF_CONTACT = 0x0001;
        /// Parent copy on a partitioned run.
        const PARENT = 0x0010;
        /// Child mirror on a partitioned run.
        const CHILD = 0x0020;
        /// State was not found in the frame being read.
        const ABSENT = 0x0080;
    }
}

/// Step phase of a body inside one domain step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    /// Before the step or after it completed.
    Ready,
    /// Configuration advanced to the mid step.
    HalfStepped,
    /// Reactions written by the solver.
    Constrained,
    /// Velocity and configuration completed.
    Stepped,
}

/// Indices into the body energy vector.
pub mod energy {
    /// Kinetic energy.
    pub const KINETIC: usize = 0;
    /// Work of external forces.
    pub const EXTERNAL: usize = 1;
    /// Work of normal contact reactions.
    pub const CONTACT: usize = 2;
    /// Work of frictional reactions.
    pub const FRICTION: usize = 3;
    /// Internal (strain) energy.
    pub const INTERNAL: usize = 4;
    /// Storage size.
    pub const SPACE: usize = 5;
}

/// Bulk material of a body.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkMaterial {
    /// Label.
    pub label: String,
    /// Mass density.
    pub density: f64,
    /// Young modulus.
    pub young: f64,
    /// Poisson ratio.
    pub poisson: f64,
}

impl BulkMaterial {
    /// Lamé coefficients `(λ, μ)`.
    pub fn lame(&self) -> (f64, f64) {
        let lambda = self.young * self.poisson
            / ((1.0 + self.poisson) * (1.0 - 2.0 * self.poisson));
        let mu = self.young / (2.0 * (1.0 + self.poisson));

        (lambda, mu)
    }
}

impl Default for BulkMaterial {
    fn default() -> Self {
        Self {
            label: "default".to_string(),
            density: 1e3,
            young: 1e9,
            poisson: 0.25,
        }
    }
}

/// Generalised inverse inertia operator.
#[derive(Debug, Clone)]
pub enum Inverse {
    /// Obstacles carry none.
    None,
    /// Rigid: inverse inertia tensor and inverse mass.
    Rigid {
        /// Referential inverse inertia.
        j_inv: Mat3<f64>,
        /// Inverse mass.
        m_inv: f64,
    },
    /// Pseudo-rigid: inverse Euler tensor per deformation row and inverse
    /// mass for the translation.
    Pseudo {
        /// Inverse of the centered referential Euler tensor.
        e_inv: Mat3<f64>,
        /// Inverse mass.
        m_inv: f64,
    },
    /// Finite element: inverse lumped nodal masses.
    Lumped(Vec<f64>),
}

/// Sparse operator mapping body velocity DOFs to the 3-D spatial velocity of
/// one material point: `v = Σ col · u[dof]`.
#[derive(Debug, Clone, Default)]
pub struct LocOp {
    /// `(dof, column)` pairs.
    pub cols: SmallVec<[(usize, Vec3<f64>); 12]>,
}

impl LocOp {
    /// Apply to a velocity vector.
    pub fn apply(&self, u: &[f64]) -> Vec3<f64> {
        let mut out = Vec3::zero();
        for (dof, col) in &self.cols {
            out += *col * u[*dof];
        }

        out
    }

    /// Accumulate the transposed action `f += H ᵀ v` into a generalised
    /// force vector.
    pub fn apply_transposed(&self, v: Vec3<f64>, f: &mut [f64]) {
        for (dof, col) in &self.cols {
            f[*dof] += col.dot(v);
        }
    }
}

/// Finite element internals.
#[derive(Debug, Clone)]
pub struct FemState {
    /// Formulation.
    pub form: FemForm,
    /// Linear tetrahedra with referential shape gradients.
    pub tets: Vec<fem::FemTet>,
    /// Lumped nodal masses.
    pub node_mass: Vec<f64>,
}

/// A simulated body.
#[derive(Debug)]
pub struct Body {
    /// Unique identifier, assigned at domain insertion.
    pub id: BodyId,
    /// Kind.
    pub kind: BodyKind,
    /// Optional user label.
    pub label: Option<String>,
    /// Integration scheme.
    pub scheme: Scheme,
    /// Behaviour flags.
    pub flags: BodyFlags,
    /// Step phase within the current step.
    pub phase: StepPhase,
    /// Shape.
    pub shape: Shape,
    /// Shape/geometric-object pairs, fixed for the body lifetime.
    pub sgps: Vec<Sgp>,
    /// Configuration.
    pub conf: Vec<f64>,
    /// Velocity.
    pub velo: Vec<f64>,
    /// Velocity at the beginning of the current step.
    pub prev_velo: Vec<f64>,
    /// Applied external forces.
    pub forces: Vec<Force>,
    /// Attached constraints.
    pub con: BTreeSet<ConstraintId>,
    /// Energy counters.
    pub energy: [f64; energy::SPACE],
    /// Referential mass.
    pub ref_mass: f64,
    /// Referential volume.
    pub ref_volume: f64,
    /// Referential mass center.
    pub ref_center: Vec3<f64>,
    /// Referential inertia (rigid) or Euler (pseudo-rigid) tensor, centered.
    pub ref_tensor: Mat3<f64>,
    /// Inverse generalised inertia.
    pub inverse: Inverse,
    /// Stiffness proportional damping.
    pub damping: f64,
    /// Default bulk material.
    pub material: BulkMaterial,
    /// Critical step estimate.
    pub cristep: f64,
    /// Current shape extents.
    pub extents: Aabb<f64>,
    /// Parent rank (parallel runs; zero on serial ones).
    pub rank: i32,
    /// Finite element internals.
    pub fem: Option<FemState>,
}

impl Body {
    /// Create a body over a shape; the id is assigned when the body enters a
    /// domain.
    pub fn new(kind: BodyKind, shape: Shape, material: BulkMaterial) -> Self {
        let chars = shape.characteristics(true);
        let center = chars.center();
        let mass = material.density * chars.volume;
        // Center the Euler tensor and scale it by density
        let euler =
            (chars.euler - math::outer(center, chars.moments)) * material.density;

        let scheme = match kind {
            BodyKind::Rigid | BodyKind::Obstacle => Scheme::RigNeg,
            _ => Scheme::DefExp,
        };

        let (conf, velo) = match kind {
            BodyKind::Obstacle => (identity_conf(center), Vec::new()),
            BodyKind::Rigid => (identity_conf(center), vec![0.0; 6]),
            BodyKind::PseudoRigid => (identity_conf(center), vec![0.0; 12]),
            BodyKind::FiniteElement => {
                let nodes = shape.as_mesh().map(|m| m.node_count()).unwrap_or(0);

                (vec![0.0; 3 * nodes], vec![0.0; 3 * nodes])
            }
        };

        let sgps = shape.sgps();
        let extents = shape.extents();
        let prev_velo = velo.clone();
        let ref_tensor = match kind {
            // Rigid bodies keep the inertia tensor, the rest the Euler tensor
            BodyKind::Rigid | BodyKind::Obstacle => {
                Mat3::identity() * math::trace(&euler) - euler
            }
            _ => euler,
        };

        Self {
            id: BodyId(0),
            kind,
            label: None,
            scheme,
            flags: BodyFlags::empty(),
            phase: StepPhase::Ready,
            shape,
            sgps,
            conf,
            velo,
            prev_velo,
            forces: Vec::new(),
            con: BTreeSet::new(),
            energy: [0.0; energy::SPACE],
            ref_mass: mass,
            ref_volume: chars.volume,
            ref_center: center,
            ref_tensor,
            inverse: Inverse::None,
            damping: 0.0,
            material,
            cristep: f64::INFINITY,
            extents,
            rank: 0,
            fem: None,
        }
    }

    /// Attach a label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());

        self
    }

    /// Pick a non-default integration scheme.
    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;

        self
    }

    /// Configuration length of the kind.
    pub fn conf_size(&self) -> usize {
        self.conf.len()
    }

    /// Velocity degrees of freedom.
    pub fn dofs(&self) -> usize {
        self.velo.len()
    }

    /// Length of the persisted energy vector.
    pub fn energy_size(&self) -> usize {
        match self.kind {
            BodyKind::Obstacle => 0,
            BodyKind::Rigid => 4,
            _ => 5,
        }
    }

    /// Overwrite mass and volume characteristics.
    pub fn overwrite_chars(
        &mut self,
        mass: f64,
        volume: f64,
        center: Vec3<f64>,
        tensor: Mat3<f64>,
    ) {
        self.ref_mass = mass;
        self.ref_volume = volume;
        self.ref_center = center;
        self.ref_tensor = tensor;
    }

    /// Overwrite configuration and velocity.
    pub fn overwrite_state(&mut self, conf: &[f64], velo: &[f64]) {
        debug_assert_eq!(conf.len(), self.conf.len());
        debug_assert_eq!(velo.len(), self.velo.len());

        self.conf.copy_from_slice(conf);
        self.velo.copy_from_slice(velo);
        self.prev_velo.copy_from_slice(velo);
    }

    /// Map a rigid 12-double configuration and 6-double velocity onto this
    /// body's basis; meaningful for finite element bodies only.
    pub fn from_rigid(
        &mut self,
        rotation: &Mat3<f64>,
        position: Vec3<f64>,
        angular: Vec3<f64>,
        linear: Vec3<f64>,
    ) {
        if self.kind == BodyKind::FiniteElement {
            fem::from_rigid(self, rotation, position, angular, linear);
        }
    }

    /// Apply an initial rigid motion velocity.
    pub fn initial_velocity(&mut self, linear: Vec3<f64>, angular: Vec3<f64>) {
        match self.kind {
            BodyKind::Obstacle => {}
            BodyKind::Rigid => rigid::initial_velocity(self, linear, angular),
            BodyKind::PseudoRigid => pseudo::initial_velocity(self, linear, angular),
            BodyKind::FiniteElement => fem::initial_velocity(self, linear, angular),
        }
    }

    /// Current motion map of the body.
    pub fn motion(&self) -> Motion {
        match self.kind {
            BodyKind::Obstacle | BodyKind::Rigid => Motion::Rigid {
                rotation: rigid::rotation(&self.conf),
                ref_center: self.ref_center,
                center: rigid::position(&self.conf),
            },
            BodyKind::PseudoRigid => Motion::Affine {
                gradient: rigid::rotation(&self.conf),
                ref_center: self.ref_center,
                center: rigid::position(&self.conf),
            },
            BodyKind::FiniteElement => Motion::Nodal(&self.conf),
        }
    }

    /// Refresh the current shape and extents from the configuration.
    pub fn update_shape(&mut self) {
        let motion = match self.kind {
            BodyKind::Obstacle | BodyKind::Rigid => Motion::Rigid {
                rotation: rigid::rotation(&self.conf),
                ref_center: self.ref_center,
                center: rigid::position(&self.conf),
            },
            BodyKind::PseudoRigid => Motion::Affine {
                gradient: rigid::rotation(&self.conf),
                ref_center: self.ref_center,
                center: rigid::position(&self.conf),
            },
            BodyKind::FiniteElement => {
                let conf = std::mem::take(&mut self.conf);
                if let Some(mesh) = self.shape.as_mesh_mut() {
                    mesh.update(&Motion::Nodal(&conf));
                }
                self.conf = conf;
                self.extents = self.shape.extents();
                return;
            }
        };

        self.shape.update(&motion);
        self.extents = self.shape.extents();
    }

    /// Initialise dynamic stepping: rebuild the inverse inertia and estimate
    /// the critical step.
    pub fn dynamic_init(&mut self) -> Result<()> {
        match self.kind {
            BodyKind::Obstacle => {
                self.inverse = Inverse::None;
                self.cristep = f64::INFINITY;
            }
            BodyKind::Rigid => rigid::dynamic_init(self)?,
            BodyKind::PseudoRigid => pseudo::dynamic_init(self)?,
            BodyKind::FiniteElement => fem::dynamic_init(self)?,
        }

        Ok(())
    }

    /// Initialise quasi-static stepping.
    ///
    /// The same operators serve; inertia simply stops feeding back into the
    /// free velocity, which the step operators handle through the domain's
    /// dynamic flag.
    pub fn static_init(&mut self) -> Result<()> {
        self.dynamic_init()
    }

    /// Perform the initial half-step: advance the configuration by `h/2`
    /// with the current velocity.
    pub fn step_begin(&mut self, _time: f64, step: f64) {
        debug_assert_eq!(self.phase, StepPhase::Ready);
        if self.kind == BodyKind::Obstacle {
            return;
        }

        self.prev_velo.copy_from_slice(&self.velo);
        match self.kind {
            BodyKind::Obstacle => {}
            BodyKind::Rigid => rigid::half_advance(self, step),
            BodyKind::PseudoRigid => pseudo::half_advance(self, step),
            BodyKind::FiniteElement => fem::half_advance(self, step),
        }

        self.phase = StepPhase::HalfStepped;
    }

    /// Fold the external forces evaluated at the mid step into the free
    /// velocity.
    pub fn apply_forces(&mut self, time: f64, step: f64, gravity: Vec3<f64>, dynamic: bool) {
        if self.kind == BodyKind::Obstacle {
            return;
        }
        debug_assert_eq!(self.phase, StepPhase::HalfStepped);

        match self.kind {
            BodyKind::Obstacle => {}
            BodyKind::Rigid => rigid::apply_forces(self, time, step, gravity, dynamic),
            BodyKind::PseudoRigid => pseudo::apply_forces(self, time, step, gravity, dynamic),
            BodyKind::FiniteElement => fem::apply_forces(self, time, step, gravity, dynamic),
        }
    }

    /// Perform the final half-step after the solver wrote the reactions: the
    /// generalised impulses are already folded into the velocity.
    pub fn step_end(&mut self, _time: f64, step: f64) -> Result<()> {
        if self.kind == BodyKind::Obstacle {
            return Ok(());
        }
        debug_assert!(matches!(
            self.phase,
            StepPhase::HalfStepped | StepPhase::Constrained
        ));

        match self.kind {
            BodyKind::Obstacle => {}
            BodyKind::Rigid => rigid::half_advance(self, step),
            BodyKind::PseudoRigid => pseudo::half_advance(self, step),
            BodyKind::FiniteElement => fem::half_advance(self, step),
        }

        self.energy[energy::KINETIC] = self.kinetic_energy();
        self.phase = StepPhase::Stepped;

        if !self.state_finite() {
            return Err(Error::NonFiniteState(self.id));
        }

        Ok(())
    }

    /// Reset the phase for the next step.
    pub fn step_done(&mut self) {
        self.phase = StepPhase::Ready;
    }

    /// Apply a constraint impulse `h · Hᵀ base · r` through the inverse
    /// inertia.
    pub fn apply_impulse(&mut self, op: &LocOp, base: &Mat3<f64>, r: Vec3<f64>, step: f64) {
        if self.dofs() == 0 {
            return;
        }

        let spatial = *base * r;
        let mut force = vec![0.0; self.dofs()];
        op.apply_transposed(spatial, &mut force);

        let velo = std::mem::take(&mut self.velo);
        let mut out = velo;
        self.invvec(step, &force, 1.0, &mut out);
        self.velo = out;
        self.phase = StepPhase::Constrained;
    }

    /// Apply a positional impulse `M⁻¹ Hᵀ base · dr` straight to the
    /// configuration, leaving the velocity untouched.
    pub fn apply_position_impulse(&mut self, op: &LocOp, base: &Mat3<f64>, dr: Vec3<f64>) {
        if self.dofs() == 0 {
            return;
        }

        let spatial = *base * dr;
        let mut force = vec![0.0; self.dofs()];
        op.apply_transposed(spatial, &mut force);

        let mut delta = vec![0.0; self.dofs()];
        self.invvec(1.0, &force, 0.0, &mut delta);

        match self.kind {
            BodyKind::Obstacle => {}
            BodyKind::Rigid => {
                let omega = Vec3::new(delta[0], delta[1], delta[2]);
                let r = rigid::rotation(&self.conf) * math::expmap(omega);
                rigid::set_rotation(&mut self.conf, &r);
                self.conf[9] += delta[3];
                self.conf[10] += delta[4];
                self.conf[11] += delta[5];
            }
            BodyKind::PseudoRigid | BodyKind::FiniteElement => {
                for (q, d) in self.conf.iter_mut().zip(&delta) {
                    *q += d;
                }
            }
        }
    }

    /// `c := α · M⁻¹ · b + β · c`.
    pub fn invvec(&self, alpha: f64, b: &[f64], beta: f64, c: &mut [f64]) {
        debug_assert_eq!(b.len(), c.len());

        for x in c.iter_mut() {
            *x *= beta;
        }

        match &self.inverse {
            Inverse::None => {}
            Inverse::Rigid { j_inv, m_inv } => {
                let torque = Vec3::new(b[0], b[1], b[2]);
                let angular = *j_inv * torque * alpha;
                c[0] += angular.x;
                c[1] += angular.y;
                c[2] += angular.z;
                for i in 3..6 {
                    c[i] += alpha * m_inv * b[i];
                }
            }
            Inverse::Pseudo { e_inv, m_inv } => {
                for row in 0..3 {
                    let v = Vec3::new(b[3 * row], b[3 * row + 1], b[3 * row + 2]);
                    let out = *e_inv * v * alpha;
                    c[3 * row] += out.x;
                    c[3 * row + 1] += out.y;
                    c[3 * row + 2] += out.z;
                }
                for i in 9..12 {
                    c[i] += alpha * m_inv * b[i];
                }
            }
            Inverse::Lumped(inv_mass) => {
                for (i, x) in c.iter_mut().enumerate() {
                    *x += alpha * inv_mass[i / 3] * b[i];
                }
            }
        }
    }

    /// Delassus product `H₁ M⁻¹ H₂ᵀ` of two point operators on this body.
    pub fn delassus(&self, h1: &LocOp, h2: &LocOp) -> Mat3<f64> {
        let mut out = Mat3::zero();

        match &self.inverse {
            Inverse::None => {}
            Inverse::Rigid { j_inv, m_inv } => {
                for (d1, c1) in &h1.cols {
                    for (d2, c2) in &h2.cols {
                        let m = inverse_entry_rigid(*d1, *d2, j_inv, *m_inv);
                        if m != 0.0 {
                            out += math::outer(*c1, *c2) * m;
                        }
                    }
                }
            }
            Inverse::Pseudo { e_inv, m_inv } => {
                for (d1, c1) in &h1.cols {
                    for (d2, c2) in &h2.cols {
                        let m = inverse_entry_pseudo(*d1, *d2, e_inv, *m_inv);
                        if m != 0.0 {
                            out += math::outer(*c1, *c2) * m;
                        }
                    }
                }
            }
            Inverse::Lumped(inv_mass) => {
                for (d1, c1) in &h1.cols {
                    for (d2, c2) in &h2.cols {
                        if d1 == d2 {
                            out += math::outer(*c1, *c2) * inv_mass[*d1 / 3];
                        }
                    }
                }
            }
        }

        out
    }

    /// Operator from the generalised velocity space to the spatial velocity
    /// at a referential point of an SGP.
    pub fn gen_to_loc(&self, sgp: usize, ref_point: Vec3<f64>) -> LocOp {
        match self.kind {
            BodyKind::Obstacle => LocOp::default(),
            BodyKind::Rigid => rigid::gen_to_loc(self, ref_point),
            BodyKind::PseudoRigid => pseudo::gen_to_loc(self, ref_point),
            BodyKind::FiniteElement => fem::gen_to_loc(self, sgp, ref_point),
        }
    }

    /// Spatial velocity at a referential point expressed in a constraint
    /// base, for the previous and the current velocity.
    pub fn local_velo(
        &self,
        sgp: usize,
        ref_point: Vec3<f64>,
        base: &Mat3<f64>,
    ) -> (Vec3<f64>, Vec3<f64>) {
        let op = self.gen_to_loc(sgp, ref_point);
        let bt = base.transposed();

        (bt * op.apply(&self.prev_velo), bt * op.apply(&self.velo))
    }

    /// Forward motion of a referential point.
    pub fn cur_point(&self, sgp: usize, ref_point: Vec3<f64>) -> Vec3<f64> {
        match self.kind {
            BodyKind::Obstacle | BodyKind::Rigid | BodyKind::PseudoRigid => {
                self.motion().map_point(ref_point)
            }
            BodyKind::FiniteElement => fem::cur_point(self, sgp, ref_point),
        }
    }

    /// Inverse motion of a spatial point.
    pub fn ref_point(&self, sgp: usize, cur_point: Vec3<f64>) -> Vec3<f64> {
        match self.kind {
            BodyKind::Obstacle | BodyKind::Rigid => rigid::ref_point(self, cur_point),
            BodyKind::PseudoRigid => pseudo::ref_point(self, cur_point),
            BodyKind::FiniteElement => fem::ref_point(self, sgp, cur_point),
        }
    }

    /// Current kinetic energy.
    pub fn kinetic_energy(&self) -> f64 {
        match self.kind {
            BodyKind::Obstacle => 0.0,
            BodyKind::Rigid => rigid::kinetic_energy(self),
            BodyKind::PseudoRigid => pseudo::kinetic_energy(self),
            BodyKind::FiniteElement => fem::kinetic_energy(self),
        }
    }

    /// Whether the configuration and velocity are finite.
    pub fn state_finite(&self) -> bool {
        self.conf.iter().all(|x| x.is_finite()) && self.velo.iter().all(|x| x.is_finite())
    }
}

/// Identity rotation block plus a center, the 12-double rigid configuration.
fn identity_conf(center: Vec3<f64>) -> Vec<f64> {
    vec![
        1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, center.x, center.y, center.z,
    ]
}

/// Entry of the rigid inverse inertia.
fn inverse_entry_rigid(d1: usize, d2: usize, j_inv: &Mat3<f64>, m_inv: f64) -> f64 {
    match (d1 < 3, d2 < 3) {
        (true, true) => math::col(j_inv, d2)[d1],
        (false, false) => {
            if d1 == d2 {
                m_inv
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

/// Entry of the pseudo-rigid inverse inertia.
fn inverse_entry_pseudo(d1: usize, d2: usize, e_inv: &Mat3<f64>, m_inv: f64) -> f64 {
    match (d1 < 9, d2 < 9) {
        (true, true) => {
            if d1 / 3 == d2 / 3 {
                math::col(e_inv, d2 % 3)[d1 % 3]
            } else {
                0.0
            }
        }
        (false, false) => {
            if d1 == d2 {
                m_inv
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use vek::Vec3;

    use crate::geom::Sphere;
    use crate::shape::{Primitive, Shape};

    use super::{Body, BodyKind, BulkMaterial};

    fn unit_sphere_body() -> Body {
        let shape = Shape::single(Primitive::Sphere(Sphere::new(Vec3::zero(), 0.5, 1)));
        let material = BulkMaterial {
            density: 1.0 / (4.0 / 3.0 * std::f64::consts::PI * 0.125),
            ..BulkMaterial::default()
        };

        Body::new(BodyKind::Rigid, shape, material)
    }

    #[test]
    fn test_unit_mass() {
        let body = unit_sphere_body();

        assert_relative_eq!(body.ref_mass, 1.0, epsilon = 1e-12);
        assert_eq!(body.conf_size(), 12);
        assert_eq!(body.dofs(), 6);
    }

    #[test]
    fn test_invvec_rigid() {
        let mut body = unit_sphere_body();
        body.dynamic_init().unwrap();

        let b = vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0];
        let mut c = vec![0.0; 6];
        body.invvec(2.0, &b, 0.0, &mut c);

        // Unit mass: c = 2 * b on the linear block
        assert_relative_eq!(c[3], 2.0, epsilon = 1e-12);
        assert_relative_eq!(c[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_energy_size_by_kind() {
        let body = unit_sphere_body();
        assert_eq!(body.energy_size(), 4);
    }
}
