//! Constraint solvers behind a common facade.

pub mod gauss_seidel;
pub mod penalty;

use hashbrown::HashMap;

use crate::{
    constraint::{Constraint, ConstraintId},
    io::pbf::FrameWriter,
    locdyn::LocalDynamics,
};

pub use self::{gauss_seidel::GaussSeidel, penalty::Penalty};

/// Solver kind dispatch.
///
/// Every solver only reads the inverse inertia through the assembled
/// Delassus blocks, leaves each reaction inside its admissible cone and
/// leaves `U` consistent with the returned reactions.
#[derive(Debug)]
pub enum SolverKind {
    /// Projected block Gauss-Seidel.
    GaussSeidel(GaussSeidel),
    /// Explicit spring-dashpot penalisation of contacts.
    Penalty(Penalty),
}

impl SolverKind {
    /// Default projected Gauss-Seidel configuration.
    pub fn gauss_seidel() -> Self {
        Self::GaussSeidel(GaussSeidel::default())
    }

    /// Default penalty configuration.
    pub fn penalty() -> Self {
        Self::Penalty(Penalty::default())
    }

    /// Solve the local system, writing reactions and relative velocities
    /// back into the constraints; returns the achieved merit.
    pub fn solve(
        &mut self,
        system: &LocalDynamics,
        constraints: &mut HashMap<ConstraintId, Constraint>,
        dynamic: bool,
        step: f64,
    ) -> f64 {
        match self {
            Self::GaussSeidel(solver) => solver.solve(system, constraints, dynamic, step),
            Self::Penalty(solver) => solver.solve(system, constraints, dynamic, step),
        }
    }

    /// Append the solver state to an output frame.
    pub fn write_state(&self, frame: &mut FrameWriter) {
        match self {
            Self::GaussSeidel(solver) => solver.write_state(frame),
            Self::Penalty(solver) => solver.write_state(frame),
        }
    }
}
