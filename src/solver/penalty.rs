//! Explicit penalty solver: spring-dashpot contact reactions with
//! regularised Coulomb friction, bilateral kinds swept by Gauss-Seidel.

use hashbrown::HashMap;
use vek::Vec3;

use crate::{
    constraint::{Constraint, ConstraintId, ConstraintKind},
    io::pbf::FrameWriter,
    locdyn::LocalDynamics,
};

use super::GaussSeidel;

/// Penalty solver.
#[derive(Debug, Clone)]
pub struct Penalty {
    /// Sweep configuration for the bilateral kinds.
    pub bilateral: GaussSeidel,
    /// Merit achieved by the last run.
    pub merit: f64,
}

impl Default for Penalty {
    fn default() -> Self {
        Self {
            bilateral: GaussSeidel::default(),
            merit: 0.0,
        }
    }
}

impl Penalty {
    /// Solve and write reactions back; returns the merit of the bilateral
    /// sweep.
    pub fn solve(
        &mut self,
        system: &LocalDynamics,
        constraints: &mut HashMap<ConstraintId, Constraint>,
        dynamic: bool,
        step: f64,
    ) -> f64 {
        // Explicit contact reactions from the surface material springs
        for block in &system.blocks {
            let con = constraints.get_mut(&block.con).expect("constraint vanished");
            if con.kind != ConstraintKind::Contact {
                continue;
            }

            let normal = (-con.mat.spring * con.gap.min(0.0) - con.mat.dashpot * con.v.z)
                .max(0.0)
                * con.area.max(1e-12);

            // Regularised friction against the free slip velocity
            let slip = Vec3::new(con.u.x, con.u.y, 0.0);
            let mag = slip.magnitude();
            let tangent = if mag > 1e-12 {
                slip * (-con.mat.friction * normal / mag)
            } else {
                Vec3::zero()
            };

            con.r = Vec3::new(tangent.x, tangent.y, normal);
        }

        // Bilateral kinds react to the fixed contact forces
        self.merit = self
            .bilateral
            .run(system, constraints, dynamic, step, true);

        self.merit
    }

    /// Append the solver state to an output frame.
    pub fn write_state(&self, frame: &mut FrameWriter) {
        frame.label("PENMERIT");
        frame.doubles(&[self.merit]);
    }
}
