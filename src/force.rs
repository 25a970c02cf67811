//! Applied external forces.

use std::fmt;

use bitflags::bitflags;
use vek::Vec3;

use crate::tms::TimeSeries;

bitflags! {
    /// Force kind mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ForceKind: u8 {
        /// Direction fixed in space.
        const SPATIAL = 0x01;
        /// Direction convected with the body motion.
        const CONVECTED = 0x02;
        /// Pure torque; rigid bodies only.
        const TORQUE = 0x04;
        /// Pressure over a surface id.
        const PRESSURE = 0x08;
    }
}

/// User force callback `(q, u, t, h) → f`.
///
/// For rigid bodies `f` is `[spatial force, spatial torque, referential
/// torque]`; otherwise a generalised force of body DOF length.
pub type ForceFunc = Box<dyn Fn(&[f64], &[f64], f64, f64) -> Vec<f64> + Send + Sync>;

/// One applied force.
pub struct Force {
    /// Kind mask.
    pub kind: ForceKind,
    /// Referential attachment point.
    pub ref_point: Vec3<f64>,
    /// Direction vector, spatial or referential depending on the kind.
    pub direction: Vec3<f64>,
    /// Magnitude over time.
    pub data: TimeSeries,
    /// Optional user callback overriding the series-driven value.
    pub func: Option<ForceFunc>,
    /// Pressure surface id.
    pub surface: i32,
}

impl Force {
    /// Spatially fixed point force.
    pub fn spatial(ref_point: Vec3<f64>, direction: Vec3<f64>, data: TimeSeries) -> Self {
        Self {
            kind: ForceKind::SPATIAL,
            ref_point,
            direction,
            data,
            func: None,
            surface: 0,
        }
    }

    /// Convected point force.
    pub fn convected(ref_point: Vec3<f64>, direction: Vec3<f64>, data: TimeSeries) -> Self {
        Self {
            kind: ForceKind::CONVECTED,
            ref_point,
            direction,
            data,
            func: None,
            surface: 0,
        }
    }

    /// Pure torque about a referential (convected) or spatial axis.
    pub fn torque(kind: ForceKind, direction: Vec3<f64>, data: TimeSeries) -> Self {
        Self {
            kind: kind | ForceKind::TORQUE,
            ref_point: Vec3::zero(),
            direction,
            data,
            func: None,
            surface: 0,
        }
    }

    /// Pressure over the faces carrying a surface id.
    pub fn pressure(surface: i32, data: TimeSeries) -> Self {
        Self {
            kind: ForceKind::PRESSURE,
            ref_point: Vec3::zero(),
            direction: Vec3::zero(),
            data,
            func: None,
            surface,
        }
    }

    /// Attach a user callback.
    pub fn with_func(mut self, func: ForceFunc) -> Self {
        self.func = Some(func);

        self
    }

    /// Series value at a time.
    pub fn value(&self, time: f64) -> f64 {
        self.data.value(time)
    }
}

impl fmt::Debug for Force {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Force")
            .field("kind", &self.kind)
            .field("ref_point", &self.ref_point)
            .field("direction", &self.direction)
            .field("surface", &self.surface)
            .field("func", &self.func.as_ref().map(|_| "..."))
            .finish()
    }
}
