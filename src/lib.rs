//! Non-smooth multi-body contact dynamics engine.
//!
//! Rigid, pseudo-rigid and finite-element bodies interacting through
//! unilateral frictional contacts and bilateral constraints, advanced in time
//! by half-step schemes with the constraint reactions resolved on a local
//! dynamical system.

pub mod body;
pub mod collision;
pub mod constraint;
pub mod domain;
pub mod error;
pub mod force;
pub mod geom;
pub mod io;
pub mod locdyn;
pub mod math;
pub mod mesh;
pub mod shape;
pub mod sim;
pub mod solver;
pub mod surface;
pub mod timer;
pub mod tms;

pub use body::{Body, BodyId, BodyKind, Scheme};
pub use constraint::{Constraint, ConstraintId, ConstraintKind};
pub use domain::Domain;
pub use error::Error;
pub use sim::Simulation;
pub use solver::SolverKind;
