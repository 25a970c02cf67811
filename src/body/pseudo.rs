//! Pseudo-rigid bodies: a homogeneous deformation gradient plus a center.
//!
//! Configuration: 9-double deformation gradient (row major) followed by the
//! center position; velocity: the gradient rate followed by the linear
//! velocity. The generalised mass of the gradient rows is the centered
//! referential Euler tensor.

use vek::{Mat3, Vec3};

use crate::{
    error::{Error, Result},
    force::ForceKind,
    math,
};

use super::{energy, rigid, Body, Inverse, LocOp};

/// Deformation gradient block.
fn gradient(conf: &[f64]) -> Mat3<f64> {
    rigid::rotation(conf)
}

/// Gradient rate block.
fn gradient_rate(velo: &[f64]) -> Mat3<f64> {
    Mat3::new(
        velo[0], velo[1], velo[2], velo[3], velo[4], velo[5], velo[6], velo[7], velo[8],
    )
}

/// Linear velocity block.
fn linear(velo: &[f64]) -> Vec3<f64> {
    Vec3::new(velo[9], velo[10], velo[11])
}

/// Rebuild the inverse Euler tensor and estimate the critical step from the
/// pressure wave speed over the body size.
pub fn dynamic_init(body: &mut Body) -> Result<()> {
    if body.ref_mass <= 0.0 {
        return Err(Error::Geometry(format!(
            "body {:?} has non-positive mass",
            body.id
        )));
    }

    let e_inv = math::inv(&body.ref_tensor).ok_or_else(|| {
        Error::Geometry(format!("body {:?} has a singular Euler tensor", body.id))
    })?;

    body.inverse = Inverse::Pseudo {
        e_inv,
        m_inv: 1.0 / body.ref_mass,
    };

    let (lambda, mu) = body.material.lame();
    let wave = ((lambda + 2.0 * mu) / body.material.density).sqrt();
    body.cristep = body.ref_volume.cbrt() / wave;

    Ok(())
}

/// Advance the configuration by half a step with the current velocity.
pub fn half_advance(body: &mut Body, step: f64) {
    let half = 0.5 * step;

    for i in 0..9 {
        body.conf[i] += half * body.velo[i];
    }
    for i in 9..12 {
        body.conf[i] += half * body.velo[i];
    }
}

/// Second Piola-Kirchhoff stress of the Saint Venant-Kirchhoff material.
fn svk_stress(strain: &Mat3<f64>, lambda: f64, mu: f64) -> Mat3<f64> {
    Mat3::identity() * (lambda * math::trace(strain)) + *strain * (2.0 * mu)
}

/// Velocity update from the forces evaluated at the mid step.
pub fn apply_forces(body: &mut Body, time: f64, step: f64, gravity: Vec3<f64>, dynamic: bool) {
    let (e_inv, m_inv) = match &body.inverse {
        Inverse::Pseudo { e_inv, m_inv } => (*e_inv, *m_inv),
        _ => return,
    };

    let f = gradient(&body.conf);
    let center = rigid::position(&body.conf);
    let mid = time + 0.5 * step;

    // External generalised force: a 3-by-3 block on the gradient rows plus a
    // translation part
    let mut block = Mat3::zero();
    let mut translation = gravity * body.ref_mass;

    for applied in &body.forces {
        if let Some(func) = &applied.func {
            let out = func(&body.conf, &body.velo, mid, step);
            debug_assert_eq!(out.len(), 12);

            block += Mat3::new(
                out[0], out[1], out[2], out[3], out[4], out[5], out[6], out[7], out[8],
            );
            translation += Vec3::new(out[9], out[10], out[11]);
            continue;
        }

        let value = applied.value(mid);

        if applied.kind.contains(ForceKind::PRESSURE) {
            let f_inv = math::inv(&f).unwrap_or_else(Mat3::identity);
            for face in body.shape.surface_faces(applied.surface) {
                let point_force = -face.normal * (value * face.area);
                let arm = f_inv * (face.center - center);

                translation += point_force;
                block += math::outer(point_force, arm);
            }
        } else {
            let direction = if applied.kind.contains(ForceKind::CONVECTED) {
                f * applied.direction
            } else {
                applied.direction
            };
            let point_force = direction * value;
            let arm = applied.ref_point - body.ref_center;

            translation += point_force;
            block += math::outer(point_force, arm);
        }
    }

    // Internal Saint Venant-Kirchhoff response with stiffness proportional
    // damping
    let (lambda, mu) = body.material.lame();
    let strain = (f.transposed() * f - Mat3::identity()) * 0.5;
    let stress = svk_stress(&strain, lambda, mu);
    block -= f * stress * body.ref_volume;

    let rate = gradient_rate(&body.velo);
    let strain_rate = (rate.transposed() * f + f.transposed() * rate) * 0.5;
    block -= f * svk_stress(&strain_rate, lambda, mu) * (body.damping * body.ref_volume);

    body.energy[energy::INTERNAL] = body.ref_volume
        * (0.5 * lambda * math::trace(&strain).powi(2)
            + mu * math::trace(&(strain * strain)));

    let rate0 = rate;
    let v0 = linear(&body.velo);

    if !dynamic {
        for i in 0..3 {
            let row = math::col(&block.transposed(), i);
            let out = e_inv * row * step;
            body.velo[3 * i] = out.x;
            body.velo[3 * i + 1] = out.y;
            body.velo[3 * i + 2] = out.z;
        }
        let v = translation * (m_inv * step);
        body.velo[9..12].copy_from_slice(&[v.x, v.y, v.z]);
        return;
    }

    // Row-wise velocity update through the inverse Euler tensor
    for i in 0..3 {
        let row = math::col(&block.transposed(), i);
        let out = e_inv * row * step;
        body.velo[3 * i] += out.x;
        body.velo[3 * i + 1] += out.y;
        body.velo[3 * i + 2] += out.z;
    }
    let v1 = v0 + translation * (m_inv * step);
    body.velo[9..12].copy_from_slice(&[v1.x, v1.y, v1.z]);

    let rate1 = gradient_rate(&body.velo);
    let mid_rate = (rate0 + rate1) * 0.5;
    let block_work: f64 = (0..3)
        .map(|i| math::col(&block.transposed(), i).dot(math::col(&mid_rate.transposed(), i)))
        .sum();
    body.energy[energy::EXTERNAL] += step * (translation.dot((v0 + v1) * 0.5) + block_work);
}

/// Point velocity operator: `ẋ = Ḟ X' + v`.
pub fn gen_to_loc(body: &Body, ref_point: Vec3<f64>) -> LocOp {
    let arm = ref_point - body.ref_center;

    let mut op = LocOp::default();
    for i in 0..3 {
        for j in 0..3 {
            let mut col = Vec3::zero();
            col[i] = arm[j];
            op.cols.push((3 * i + j, col));
        }
    }
    for k in 0..3 {
        let mut e = Vec3::zero();
        e[k] = 1.0;
        op.cols.push((9 + k, e));
    }

    op
}

/// Inverse motion of a spatial point.
pub fn ref_point(body: &Body, cur: Vec3<f64>) -> Vec3<f64> {
    let f = gradient(&body.conf);
    let f_inv = math::inv(&f).unwrap_or_else(Mat3::identity);

    f_inv * (cur - rigid::position(&body.conf)) + body.ref_center
}

/// Kinetic energy `½ (m v² + Σᵢ Ḟᵢ E Ḟᵢᵀ)`.
pub fn kinetic_energy(body: &Body) -> f64 {
    let rate = gradient_rate(&body.velo);
    let v = linear(&body.velo);

    let deformation: f64 = (0..3)
        .map(|i| {
            let row = math::col(&rate.transposed(), i);
            row.dot(body.ref_tensor * row)
        })
        .sum();

    0.5 * (body.ref_mass * v.magnitude_squared() + deformation)
}

/// Set the velocity from a spatial linear and angular pair.
pub fn initial_velocity(body: &mut Body, linear: Vec3<f64>, angular: Vec3<f64>) {
    let rate = math::skew(angular) * gradient(&body.conf);

    body.velo[..9].copy_from_slice(&rate.into_row_array());
    body.velo[9..12].copy_from_slice(&[linear.x, linear.y, linear.z]);
    body.prev_velo.copy_from_slice(&body.velo);
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use vek::Vec3;

    use crate::body::{Body, BodyKind, BulkMaterial};
    use crate::geom::Convex;
    use crate::shape::{Primitive, Shape};

    fn cube_body() -> Body {
        let shape = Shape::single(Primitive::Convex(Convex::cuboid(
            Vec3::broadcast(-0.5),
            Vec3::broadcast(0.5),
            1,
        )));
        let mut body = Body::new(BodyKind::PseudoRigid, shape, BulkMaterial::default());
        body.dynamic_init().unwrap();

        body
    }

    #[test]
    fn test_free_fall_keeps_gradient() {
        let mut body = cube_body();
        let h = 1e-4;
        let gravity = Vec3::new(0.0, 0.0, -9.81);

        let mut time = 0.0;
        for _ in 0..100 {
            body.step_begin(time, h);
            body.apply_forces(time, h, gravity, true);
            body.step_end(time, h).unwrap();
            body.step_done();
            time += h;
        }

        // Unstrained free fall leaves the gradient at identity
        assert_relative_eq!(body.conf[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(body.conf[1], 0.0, epsilon = 1e-9);
        assert!(super::linear(&body.velo).z < -9.81 * 0.009);
    }

    #[test]
    fn test_critical_step_positive() {
        let body = cube_body();

        assert!(body.cristep.is_finite());
        assert!(body.cristep > 0.0);
    }
}
