//! Projected block Gauss-Seidel over the local dynamical system.
//!
//! Contacts are projected onto the Signorini-Coulomb cone with restitution
//! and cohesion; bilateral kinds solve their block equations exactly.

use hashbrown::HashMap;
use vek::{Mat3, Vec3};

use crate::{
    constraint::{ConState, Constraint, ConstraintId, ConstraintKind},
    io::pbf::FrameWriter,
    locdyn::LocalDynamics,
    math,
};

/// Per-constraint data frozen at the start of the sweeps.
#[derive(Debug, Clone, Copy)]
struct ConData {
    /// Kind.
    kind: ConstraintKind,
    /// Friction coefficient.
    friction: f64,
    /// Cohesion bound `cohesion · area`, zero once broken.
    cohesion: f64,
    /// Normal velocity restitution bias.
    bias: f64,
    /// Velocity target along the normal for the prescribing kinds.
    target: f64,
    /// Explicit normal reaction of springs.
    explicit: Option<f64>,
}

/// Projected Gauss-Seidel solver.
#[derive(Debug, Clone)]
pub struct GaussSeidel {
    /// Sweep limit.
    pub max_iterations: usize,
    /// Convergence bound on the merit.
    pub epsilon: f64,
    /// Merit achieved by the last run.
    pub merit: f64,
    /// Sweeps used by the last run.
    pub iterations: usize,
}

impl Default for GaussSeidel {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            epsilon: 1e-9,
            merit: 0.0,
            iterations: 0,
        }
    }
}

impl GaussSeidel {
    /// Construct with explicit limits.
    pub fn new(max_iterations: usize, epsilon: f64) -> Self {
        Self {
            max_iterations,
            epsilon,
            ..Self::default()
        }
    }

    /// Solve and write reactions back; returns the merit.
    pub fn solve(
        &mut self,
        system: &LocalDynamics,
        constraints: &mut HashMap<ConstraintId, Constraint>,
        dynamic: bool,
        step: f64,
    ) -> f64 {
        self.run(system, constraints, dynamic, step, false)
    }

    /// Shared sweep driver; with `skip_contacts` the contact reactions are
    /// held fixed (the penalty solver sets them beforehand).
    pub(super) fn run(
        &mut self,
        system: &LocalDynamics,
        constraints: &mut HashMap<ConstraintId, Constraint>,
        dynamic: bool,
        step: f64,
        skip_contacts: bool,
    ) -> f64 {
        let n = system.blocks.len();
        if n == 0 {
            self.merit = 0.0;
            self.iterations = 0;
            return 0.0;
        }

        // Snapshot reactions (warm start) and the per-constraint laws
        let mut reactions: Vec<Vec3<f64>> = Vec::with_capacity(n);
        let mut data: Vec<ConData> = Vec::with_capacity(n);
        let mut broke_cohesion = vec![false; n];

        for block in &system.blocks {
            let con = &constraints[&block.con];
            reactions.push(con.r);
            data.push(con_data(con, dynamic, step));
        }

        let mut merit = 0.0;
        self.iterations = 0;

        for _ in 0..self.max_iterations {
            merit = 0.0;

            for (i, block) in system.blocks.iter().enumerate() {
                // Local velocity from the free term and the neighbours
                let mut velocity = block.b + block.w * reactions[i];
                for (other, w) in &block.adj {
                    if let Some(&j) = system.index.get(other) {
                        velocity += *w * reactions[j];
                    }
                }

                let law = &data[i];
                let old = reactions[i];
                let fresh = match law.kind {
                    ConstraintKind::Contact => {
                        if skip_contacts {
                            old
                        } else {
                            let (r, broke) =
                                solve_contact(&block.w, velocity, old, law);
                            if broke {
                                broke_cohesion[i] = true;
                            }
                            r
                        }
                    }
                    ConstraintKind::FixPoint => {
                        // Exact block solve toward zero relative velocity
                        match math::solve(&block.w, velocity) {
                            Some(delta) => old - delta,
                            None => old,
                        }
                    }
                    ConstraintKind::FixDirection
                    | ConstraintKind::VeloDir
                    | ConstraintKind::RigidLink => {
                        let wnn = math::col(&block.w, 2).z.max(1e-300);

                        Vec3::new(0.0, 0.0, old.z - (velocity.z - law.target) / wnn)
                    }
                    ConstraintKind::Spring => {
                        Vec3::new(0.0, 0.0, law.explicit.unwrap_or(0.0))
                    }
                };

                let delta = (fresh - old).magnitude();
                let scale = 1.0 + fresh.magnitude().max(old.magnitude());
                merit = f64::max(merit, delta / scale);
                reactions[i] = fresh;
            }

            self.iterations += 1;
            if merit < self.epsilon {
                break;
            }
        }

        if merit >= self.epsilon {
            log::warn!(
                "constraint solver stopped at merit {merit:.3e} after {} sweeps",
                self.iterations
            );
        }

        // Final velocities and write back
        for (i, block) in system.blocks.iter().enumerate() {
            let mut velocity = block.b + block.w * reactions[i];
            for (other, w) in &block.adj {
                if let Some(&j) = system.index.get(other) {
                    velocity += *w * reactions[j];
                }
            }

            let con = constraints.get_mut(&block.con).expect("constraint vanished");
            con.r = reactions[i];
            con.u = velocity;
            con.merit = merit;
            if broke_cohesion[i] {
                con.state.remove(ConState::COHESIVE);
            }
        }

        self.merit = merit;
        merit
    }

    /// Append the solver state to an output frame.
    pub fn write_state(&self, frame: &mut FrameWriter) {
        frame.label("GSITERS");
        frame.ints(&[self.iterations as i32]);
        frame.label("GSMERIT");
        frame.doubles(&[self.merit]);
    }
}

/// Freeze the solve law of one constraint.
fn con_data(con: &Constraint, dynamic: bool, step: f64) -> ConData {
    let mut data = ConData {
        kind: con.kind,
        friction: con.mat.friction,
        cohesion: 0.0,
        bias: 0.0,
        target: 0.0,
        explicit: None,
    };

    match con.kind {
        ConstraintKind::Contact => {
            if con.state.contains(ConState::COHESIVE) {
                data.cohesion = con.mat.cohesion * con.area;
            }
            data.bias = if dynamic {
                // Newton restitution on the approach velocity
                con.mat.restitution * con.v.z.min(0.0)
            } else {
                // Quasi-statics resolve the gap instead
                con.gap.min(0.0) / step
            };
        }
        ConstraintKind::VeloDir => {
            // U reads slave relative to master: the master point follows
            // the prescribed value with the opposite local sign
            data.target = -con.velodir();
        }
        ConstraintKind::RigidLink => {
            // Drive the link length back over one step
            let d = con.riglnk_vec();
            data.target = (d.magnitude() - con.riglnk_len()) / step;
        }
        ConstraintKind::Spring => {
            let (stiffness, dashpot) = con.spring();
            let (lo, hi) = con.spring_limits();
            let (ref_len, stroke) = con.spring_stroke();

            let mut force = stiffness * (stroke - ref_len) - dashpot * con.u.z;
            force = force.clamp(lo, hi);
            data.explicit = Some(force);
        }
        _ => {}
    }

    data
}

/// Signorini-Coulomb projection of one contact block.
///
/// Returns the projected reaction and whether cohesion broke.
fn solve_contact(
    w: &Mat3<f64>,
    velocity: Vec3<f64>,
    old: Vec3<f64>,
    law: &ConData,
) -> (Vec3<f64>, bool) {
    let wnn = math::col(w, 2).z.max(1e-300);

    // Normal reaction toward the restitution target
    let trial = old.z - (velocity.z + law.bias) / wnn;
    let lower = -law.cohesion;
    let mut broke = false;

    let rn = if trial < lower {
        if law.cohesion > 0.0 {
            broke = true;
        }
        lower
    } else {
        trial
    };

    // Tangential block solve with the normal update folded in
    let un = Vec3::new(
        velocity.x + math::col(w, 2).x * (rn - old.z),
        velocity.y + math::col(w, 2).y * (rn - old.z),
        0.0,
    );
    let wt = Mat3::new(
        math::col(w, 0).x,
        math::col(w, 1).x,
        0.0,
        math::col(w, 0).y,
        math::col(w, 1).y,
        0.0,
        0.0,
        0.0,
        1.0,
    );
    let delta = math::solve(&wt, Vec3::new(un.x, un.y, 0.0)).unwrap_or_default();
    let mut rt = Vec3::new(old.x - delta.x, old.y - delta.y, 0.0);

    // Coulomb cone
    let limit = law.friction * rn.max(0.0);
    let mag = rt.magnitude();
    if mag > limit {
        rt = if limit > 0.0 && mag > 0.0 {
            rt * (limit / mag)
        } else {
            Vec3::zero()
        };
    }

    (Vec3::new(rt.x, rt.y, rn.max(lower)), broke)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use hashbrown::HashMap;
    use vek::{Mat3, Vec3};

    use crate::constraint::{Constraint, ConstraintId, ConstraintKind};
    use crate::locdyn::{Block, LocalDynamics};
    use crate::surface::SurfaceMaterial;

    use super::GaussSeidel;

    /// One contact on a unit mass approaching at 1 m/s.
    fn single_contact(friction: f64) -> (LocalDynamics, HashMap<ConstraintId, Constraint>) {
        let id = ConstraintId(1);
        let mut con = Constraint::new(ConstraintKind::Contact, crate::body::BodyId(1));
        con.id = id;
        con.v = Vec3::new(0.0, 0.0, -1.0);
        con.mat = SurfaceMaterial {
            friction,
            ..SurfaceMaterial::default()
        };

        let mut system = LocalDynamics::default();
        system.index.insert(id, 0);
        system.blocks.push(Block {
            con: id,
            w: Mat3::identity(),
            b: Vec3::new(0.3, 0.0, -1.0),
            adj: Vec::new(),
            master_op: Default::default(),
            slave_op: None,
        });

        let mut constraints = HashMap::new();
        constraints.insert(id, con);

        (system, constraints)
    }

    #[test]
    fn test_contact_stops_normal_approach() {
        let (system, mut constraints) = single_contact(0.0);
        let mut solver = GaussSeidel::default();

        let merit = solver.solve(&system, &mut constraints, true, 1e-3);
        assert!(merit < 1e-9);

        let con = &constraints[&ConstraintId(1)];
        // Unit diagonal: the reaction cancels the approach velocity
        assert_relative_eq!(con.r.z, 1.0, epsilon = 1e-9);
        assert_relative_eq!(con.u.z, 0.0, epsilon = 1e-9);
        // Frictionless: tangential slip remains
        assert_relative_eq!(con.r.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(con.u.x, 0.3, epsilon = 1e-9);
    }

    #[test]
    fn test_friction_cone_clamp() {
        let (system, mut constraints) = single_contact(0.2);
        let mut solver = GaussSeidel::default();

        solver.solve(&system, &mut constraints, true, 1e-3);

        let con = &constraints[&ConstraintId(1)];
        // Slip exceeds the cone: |r_t| = μ r_n
        assert_relative_eq!(con.r.x.abs(), 0.2 * con.r.z, epsilon = 1e-9);
        assert!(con.r.x < 0.0);
    }

    #[test]
    fn test_fixpoint_zeroes_velocity() {
        let id = ConstraintId(2);
        let mut con = Constraint::new(ConstraintKind::FixPoint, crate::body::BodyId(1));
        con.id = id;

        let mut system = LocalDynamics::default();
        system.index.insert(id, 0);
        system.blocks.push(Block {
            con: id,
            w: Mat3::identity() * 2.0,
            b: Vec3::new(1.0, -2.0, 0.5),
            adj: Vec::new(),
            master_op: Default::default(),
            slave_op: None,
        });

        let mut constraints = HashMap::new();
        constraints.insert(id, con);

        let mut solver = GaussSeidel::default();
        solver.solve(&system, &mut constraints, true, 1e-3);

        let con = &constraints[&id];
        assert_relative_eq!(con.u.magnitude(), 0.0, epsilon = 1e-9);
    }
}
