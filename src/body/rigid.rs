//! Rigid body kinematics and the three rotation integrators.
//!
//! Configuration: 9-double rotation block (row major, orthogonal up to
//! rounding) followed by the 3-double center position. Velocity: referential
//! angular velocity followed by the spatial linear velocity.

use vek::{Mat3, Vec3};

use crate::{
    error::{Error, Result},
    force::ForceKind,
    math,
};

use super::{energy, Body, Inverse, LocOp, Scheme};

/// Rotation block of a 12-double configuration.
pub fn rotation(conf: &[f64]) -> Mat3<f64> {
    Mat3::new(
        conf[0], conf[1], conf[2], conf[3], conf[4], conf[5], conf[6], conf[7], conf[8],
    )
}

/// Store a rotation into the configuration block.
pub fn set_rotation(conf: &mut [f64], r: &Mat3<f64>) {
    conf[..9].copy_from_slice(&r.into_row_array());
}

/// Center position of a 12-double configuration.
pub fn position(conf: &[f64]) -> Vec3<f64> {
    Vec3::new(conf[9], conf[10], conf[11])
}

/// Referential angular velocity.
pub fn angular(velo: &[f64]) -> Vec3<f64> {
    Vec3::new(velo[0], velo[1], velo[2])
}

/// Spatial linear velocity.
pub fn linear(velo: &[f64]) -> Vec3<f64> {
    Vec3::new(velo[3], velo[4], velo[5])
}

/// Rebuild the inverse inertia; rigid rotations have no critical step.
pub fn dynamic_init(body: &mut Body) -> Result<()> {
    if body.ref_mass <= 0.0 {
        return Err(Error::Geometry(format!(
            "body {:?} has non-positive mass",
            body.id
        )));
    }

    let j_inv = math::inv(&body.ref_tensor).ok_or_else(|| {
        Error::Geometry(format!("body {:?} has a singular inertia tensor", body.id))
    })?;

    body.inverse = Inverse::Rigid {
        j_inv,
        m_inv: 1.0 / body.ref_mass,
    };
    body.cristep = f64::INFINITY;

    Ok(())
}

/// Advance the configuration by half a step with the current velocity.
pub fn half_advance(body: &mut Body, step: f64) {
    let half = 0.5 * step;
    let omega = angular(&body.velo);
    let v = linear(&body.velo);

    let r = rotation(&body.conf) * math::expmap(omega * half);
    set_rotation(&mut body.conf, &r);

    body.conf[9] += half * v.x;
    body.conf[10] += half * v.y;
    body.conf[11] += half * v.z;
}

/// Resolve the applied forces at a given time into a spatial force, a
/// spatial torque about the center, and a referential torque.
fn resolve_forces(body: &Body, time: f64, step: f64) -> (Vec3<f64>, Vec3<f64>, Vec3<f64>) {
    let r = rotation(&body.conf);
    let center = position(&body.conf);

    let mut force = Vec3::zero();
    let mut torque_spatial = Vec3::zero();
    let mut torque_ref = Vec3::zero();

    for applied in &body.forces {
        if let Some(func) = &applied.func {
            let f = func(&body.conf, &body.velo, time, step);
            debug_assert!(f.len() >= 9);

            force += Vec3::new(f[0], f[1], f[2]);
            torque_spatial += Vec3::new(f[3], f[4], f[5]);
            torque_ref += Vec3::new(f[6], f[7], f[8]);
            continue;
        }

        let value = applied.value(time);

        if applied.kind.contains(ForceKind::TORQUE) {
            if applied.kind.contains(ForceKind::CONVECTED) {
                torque_ref += applied.direction * value;
            } else {
                torque_spatial += applied.direction * value;
            }
        } else if applied.kind.contains(ForceKind::PRESSURE) {
            for face in body.shape.surface_faces(applied.surface) {
                let f = -face.normal * (value * face.area);
                force += f;
                torque_spatial += (face.center - center).cross(f);
            }
        } else {
            let direction = if applied.kind.contains(ForceKind::CONVECTED) {
                r * applied.direction
            } else {
                applied.direction
            };
            let f = direction * value;
            let at = r * (applied.ref_point - body.ref_center) + center;

            force += f;
            torque_spatial += (at - center).cross(f);
        }
    }

    (force, torque_spatial, torque_ref)
}

/// Velocity update from the forces evaluated at the mid step.
pub fn apply_forces(body: &mut Body, time: f64, step: f64, gravity: Vec3<f64>, dynamic: bool) {
    let (j_inv, m_inv) = match &body.inverse {
        Inverse::Rigid { j_inv, m_inv } => (*j_inv, *m_inv),
        _ => return,
    };
    let j = body.ref_tensor;
    let r = rotation(&body.conf);

    let mid = time + 0.5 * step;
    let (mut force, torque_spatial, torque_ref) = resolve_forces(body, mid, step);
    force += gravity * body.ref_mass;

    // Total referential torque at the mid configuration
    let torque = r.transposed() * torque_spatial + torque_ref;

    let omega0 = angular(&body.velo);
    let v0 = linear(&body.velo);

    if !dynamic {
        // Quasi-statics: the free velocity is the force increment rate
        let omega = j_inv * torque * step;
        let v = force * (m_inv * step);
        body.velo[..3].copy_from_slice(&[omega.x, omega.y, omega.z]);
        body.velo[3..6].copy_from_slice(&[v.x, v.y, v.z]);
        return;
    }

    let omega1 = match body.scheme {
        // NEW1: explicit Euler on the gyroscopic equations, positive drift
        Scheme::RigPos => omega0 + j_inv * (torque - omega0.cross(j * omega0)) * step,
        // NEW2: referential momentum transported through the half rotation,
        // exact momentum conservation
        Scheme::RigNeg => {
            let transported = math::expmap(-omega0 * (0.5 * step)) * (j * omega0);

            j_inv * (transported + torque * step)
        }
        // NEW3: the transported momentum balance solved implicitly in the
        // new angular velocity
        Scheme::RigImp => {
            let b = math::expmap(-omega0 * (0.5 * step)) * (j * omega0) + torque * step;

            let mut omega = omega0;
            for _ in 0..12 {
                omega = j_inv * (math::expmap(-omega * (0.5 * step)) * b);
            }
            omega
        }
        _ => omega0,
    };

    let v1 = v0 + force * (m_inv * step);

    body.velo[..3].copy_from_slice(&[omega1.x, omega1.y, omega1.z]);
    body.velo[3..6].copy_from_slice(&[v1.x, v1.y, v1.z]);

    let v_avg = (v0 + v1) * 0.5;
    let omega_avg = (omega0 + omega1) * 0.5;
    body.energy[energy::EXTERNAL] += step * (force.dot(v_avg) + torque.dot(omega_avg));
}

/// Point velocity operator: `ẋ = R (Ω × X') + v`.
pub fn gen_to_loc(body: &Body, ref_point: Vec3<f64>) -> LocOp {
    let r = rotation(&body.conf);
    let arm = ref_point - body.ref_center;

    let mut op = LocOp::default();
    for k in 0..3 {
        let e = match k {
            0 => Vec3::unit_x(),
            1 => Vec3::unit_y(),
            _ => Vec3::unit_z(),
        };
        op.cols.push((k, r * e.cross(arm)));
    }
    for k in 0..3 {
        let mut e = Vec3::zero();
        e[k] = 1.0;
        op.cols.push((3 + k, e));
    }

    op
}

/// Inverse motion of a spatial point.
pub fn ref_point(body: &Body, cur: Vec3<f64>) -> Vec3<f64> {
    let r = rotation(&body.conf);

    r.transposed() * (cur - position(&body.conf)) + body.ref_center
}

/// Kinetic energy `½ (m v² + Ω·JΩ)`.
pub fn kinetic_energy(body: &Body) -> f64 {
    let omega = angular(&body.velo);
    let v = linear(&body.velo);

    0.5 * (body.ref_mass * v.magnitude_squared() + omega.dot(body.ref_tensor * omega))
}

/// Set the velocity from a spatial linear and angular pair.
pub fn initial_velocity(body: &mut Body, linear: Vec3<f64>, angular: Vec3<f64>) {
    let r = rotation(&body.conf);
    let omega = r.transposed() * angular;

    body.velo[..3].copy_from_slice(&[omega.x, omega.y, omega.z]);
    body.velo[3..6].copy_from_slice(&[linear.x, linear.y, linear.z]);
    body.prev_velo.copy_from_slice(&body.velo);
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use vek::Vec3;

    use crate::body::{Body, BodyKind, BulkMaterial, Scheme};
    use crate::geom::Sphere;
    use crate::shape::{Primitive, Shape};

    fn spinning_body(scheme: Scheme) -> Body {
        let shape = Shape::single(Primitive::Sphere(Sphere::new(Vec3::zero(), 0.5, 1)));
        let mut body = Body::new(BodyKind::Rigid, shape, BulkMaterial::default()).with_scheme(scheme);
        body.dynamic_init().unwrap();
        body.initial_velocity(Vec3::zero(), Vec3::new(0.0, 0.0, 2.0));

        body
    }

    #[test]
    fn test_momentum_conservation_torque_free() {
        let mut body = spinning_body(Scheme::RigNeg);
        let h = 1e-3;

        let momentum0 = {
            let r = super::rotation(&body.conf);
            let omega = super::angular(&body.velo);
            r * (body.ref_tensor * omega)
        };

        let mut time = 0.0;
        for _ in 0..1000 {
            body.step_begin(time, h);
            body.apply_forces(time, h, Vec3::zero(), true);
            body.step_end(time, h).unwrap();
            body.step_done();
            time += h;
        }

        let momentum1 = {
            let r = super::rotation(&body.conf);
            let omega = super::angular(&body.velo);
            r * (body.ref_tensor * omega)
        };

        assert_relative_eq!(
            (momentum1 - momentum0).magnitude() / momentum0.magnitude(),
            0.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_rotation_stays_orthogonal() {
        let mut body = spinning_body(Scheme::RigImp);
        let h = 1e-2;

        let mut time = 0.0;
        for _ in 0..500 {
            body.step_begin(time, h);
            body.apply_forces(time, h, Vec3::zero(), true);
            body.step_end(time, h).unwrap();
            body.step_done();
            time += h;
        }

        let r = super::rotation(&body.conf);
        let rrt = r * r.transposed();
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(crate::math::col(&rrt, j)[i], expected, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_free_fall() {
        let shape = Shape::single(Primitive::Sphere(Sphere::new(Vec3::zero(), 0.5, 1)));
        let mut body = Body::new(BodyKind::Rigid, shape, BulkMaterial::default());
        body.dynamic_init().unwrap();

        let h = 1e-3;
        let gravity = Vec3::new(0.0, 0.0, -9.81);
        let mut time = 0.0;
        for _ in 0..1000 {
            body.step_begin(time, h);
            body.apply_forces(time, h, gravity, true);
            body.step_end(time, h).unwrap();
            body.step_done();
            time += h;
        }

        // After one second of free fall
        assert_relative_eq!(super::linear(&body.velo).z, -9.81, epsilon = 1e-9);
        assert_relative_eq!(super::position(&body.conf).z, -0.5 * 9.81, epsilon = 1e-2);
    }
}
