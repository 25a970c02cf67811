//! Finite element bodies: total Lagrangian linear tetrahedra with lumped
//! masses.
//!
//! Non-tetrahedral elements are split into tetrahedra over their own nodes
//! for quadrature, so every element kind shares one code path.

use vek::{Mat3, Vec3};

use crate::{
    error::{Error, Result},
    force::ForceKind,
    math,
};

use super::{energy, Body, FemForm, FemState, Inverse, LocOp, Scheme};

/// One linear tetrahedron with referential shape gradients.
#[derive(Debug, Clone)]
pub struct FemTet {
    /// Global node indices.
    pub nodes: [u32; 4],
    /// Constant shape function gradients.
    pub grads: [Vec3<f64>; 4],
    /// Referential volume.
    pub volume: f64,
}

/// Build the tetrahedra, the lumped masses and the critical step.
pub fn dynamic_init(body: &mut Body) -> Result<()> {
    let mesh = body
        .shape
        .as_mesh()
        .ok_or_else(|| Error::Geometry(format!("body {:?} has no mesh shape", body.id)))?;

    let mut tets = Vec::new();
    let mut node_mass = vec![0.0; mesh.node_count()];
    let mut shortest = f64::MAX;
    let density = body.material.density;

    for index in 0..mesh.elements.len() {
        for nodes in mesh.element_tets(index) {
            let [a, b, c, d] = nodes.map(|n| mesh.ref_nodes[n as usize]);
            let jacobian = math::mat_from_cols(b - a, c - a, d - a);
            let volume = jacobian.determinant() / 6.0;
            if volume <= 0.0 {
                return Err(Error::Geometry(format!(
                    "body {:?} has a degenerate element",
                    body.id
                )));
            }

            let j_inv = math::inv(&jacobian).ok_or_else(|| {
                Error::Geometry(format!("body {:?} has a degenerate element", body.id))
            })?;
            // Rows of the inverse Jacobian are the gradients of N₁..N₃
            let jt = j_inv;
            let g1 = math::col(&jt.transposed(), 0);
            let g2 = math::col(&jt.transposed(), 1);
            let g3 = math::col(&jt.transposed(), 2);
            let g0 = -(g1 + g2 + g3);

            for &n in &nodes {
                node_mass[n as usize] += density * volume / 4.0;
            }
            for (p, q) in [(a, b), (a, c), (a, d), (b, c), (b, d), (c, d)] {
                shortest = shortest.min((p - q).magnitude());
            }

            tets.push(FemTet {
                nodes,
                grads: [g0, g1, g2, g3],
                volume,
            });
        }
    }

    let (lambda, mu) = body.material.lame();
    let wave = ((lambda + 2.0 * mu) / density).sqrt();
    body.cristep = shortest / wave;

    body.inverse = Inverse::Lumped(node_mass.iter().map(|m| 1.0 / m).collect());
    body.fem = Some(FemState {
        form: FemForm::TotalLagrangian,
        tets,
        node_mass,
    });

    Ok(())
}

/// Advance the configuration by half a step with the current velocity.
pub fn half_advance(body: &mut Body, step: f64) {
    let half = 0.5 * step;
    for (q, u) in body.conf.iter_mut().zip(&body.velo) {
        *q += half * u;
    }
}

/// Nodal displacement as a vector.
fn disp(conf: &[f64], node: u32) -> Vec3<f64> {
    let i = node as usize * 3;

    Vec3::new(conf[i], conf[i + 1], conf[i + 2])
}

/// Deformation gradient of one tetrahedron.
fn tet_gradient(tet: &FemTet, conf: &[f64]) -> Mat3<f64> {
    let mut f = Mat3::identity();
    for (node, grad) in tet.nodes.iter().zip(&tet.grads) {
        f += math::outer(disp(conf, *node), *grad);
    }

    f
}

/// Second Piola-Kirchhoff stress of the Saint Venant-Kirchhoff material.
fn svk_stress(strain: &Mat3<f64>, lambda: f64, mu: f64) -> Mat3<f64> {
    Mat3::identity() * (lambda * math::trace(strain)) + *strain * (2.0 * mu)
}

/// Accumulate the internal force and return the strain energy.
fn internal_force(body: &Body, out: &mut [f64]) -> f64 {
    let state = match &body.fem {
        Some(state) => state,
        None => return 0.0,
    };
    let (lambda, mu) = body.material.lame();
    let mut strain_energy = 0.0;

    for tet in &state.tets {
        let f = tet_gradient(tet, &body.conf);
        let strain = (f.transposed() * f - Mat3::identity()) * 0.5;
        let stress = svk_stress(&strain, lambda, mu);
        let piola = f * stress;

        strain_energy += tet.volume
            * (0.5 * lambda * math::trace(&strain).powi(2)
                + mu * math::trace(&(strain * strain)));

        // Stiffness proportional damping from the strain rate
        let rate = {
            let mut df = Mat3::zero();
            for (node, grad) in tet.nodes.iter().zip(&tet.grads) {
                df += math::outer(disp(&body.velo, *node), *grad);
            }
            df
        };
        let strain_rate = (rate.transposed() * f + f.transposed() * rate) * 0.5;
        let piola_damp = f * svk_stress(&strain_rate, lambda, mu) * body.damping;

        for (node, grad) in tet.nodes.iter().zip(&tet.grads) {
            let f_node = (piola + piola_damp) * *grad * (-tet.volume);
            let i = *node as usize * 3;
            out[i] += f_node.x;
            out[i + 1] += f_node.y;
            out[i + 2] += f_node.z;
        }
    }

    strain_energy
}

/// Directional derivative of the internal force at the current state,
/// `out = K · v`, used by the linearly implicit scheme.
fn stiffness_apply(body: &Body, v: &[f64], out: &mut [f64]) {
    let state = match &body.fem {
        Some(state) => state,
        None => return,
    };
    let (lambda, mu) = body.material.lame();

    for x in out.iter_mut() {
        *x = 0.0;
    }

    for tet in &state.tets {
        let f = tet_gradient(tet, &body.conf);
        let strain = (f.transposed() * f - Mat3::identity()) * 0.5;
        let stress = svk_stress(&strain, lambda, mu);

        let mut df = Mat3::zero();
        for (node, grad) in tet.nodes.iter().zip(&tet.grads) {
            df += math::outer(disp(v, *node), *grad);
        }
        let dstrain = (df.transposed() * f + f.transposed() * df) * 0.5;
        let dpiola = df * stress + f * svk_stress(&dstrain, lambda, mu);

        for (node, grad) in tet.nodes.iter().zip(&tet.grads) {
            let f_node = dpiola * *grad * tet.volume;
            let i = *node as usize * 3;
            out[i] += f_node.x;
            out[i + 1] += f_node.y;
            out[i + 2] += f_node.z;
        }
    }
}

/// Conjugate gradients on `(M + h²/4 K) x = b` for the linearly implicit
/// scheme.
fn solve_implicit(body: &Body, step: f64, b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let node_mass = match &body.fem {
        Some(state) => &state.node_mass,
        None => return b.to_vec(),
    };
    let factor = step * step / 4.0;

    let matvec = |x: &[f64], out: &mut Vec<f64>| {
        stiffness_apply(body, x, out);
        for i in 0..n {
            out[i] = node_mass[i / 3] * x[i] + factor * out[i];
        }
    };

    let mut x = vec![0.0; n];
    let mut r = b.to_vec();
    let mut p = r.clone();
    let mut ap = vec![0.0; n];
    let mut rr: f64 = r.iter().map(|v| v * v).sum();
    let tol = 1e-20 * rr.max(1e-30);

    for _ in 0..200 {
        if rr <= tol {
            break;
        }
        matvec(&p, &mut ap);
        let pap: f64 = p.iter().zip(&ap).map(|(a, b)| a * b).sum();
        if pap.abs() < 1e-300 {
            break;
        }
        let alpha = rr / pap;
        for i in 0..n {
            x[i] += alpha * p[i];
            r[i] -= alpha * ap[i];
        }
        let rr_next: f64 = r.iter().map(|v| v * v).sum();
        let beta = rr_next / rr;
        rr = rr_next;
        for i in 0..n {
            p[i] = r[i] + beta * p[i];
        }
    }

    x
}

/// Velocity update from the forces evaluated at the mid step.
pub fn apply_forces(body: &mut Body, time: f64, step: f64, gravity: Vec3<f64>, dynamic: bool) {
    let n = body.dofs();
    let mid = time + 0.5 * step;
    let mut force = vec![0.0; n];

    // Gravity through the lumped masses
    if let Some(state) = &body.fem {
        for (i, mass) in state.node_mass.iter().enumerate() {
            force[3 * i] += mass * gravity.x;
            force[3 * i + 1] += mass * gravity.y;
            force[3 * i + 2] += mass * gravity.z;
        }
    }

    for applied in &body.forces {
        if let Some(func) = &applied.func {
            let out = func(&body.conf, &body.velo, mid, step);
            debug_assert_eq!(out.len(), n);
            for (f, o) in force.iter_mut().zip(&out) {
                *f += o;
            }
            continue;
        }

        let value = applied.value(mid);

        if applied.kind.contains(ForceKind::PRESSURE) {
            for face in body.shape.surface_faces(applied.surface) {
                if face.nodes.is_empty() {
                    continue;
                }
                let share = -face.normal * (value * face.area / face.nodes.len() as f64);
                for &node in &face.nodes {
                    let i = node as usize * 3;
                    force[i] += share.x;
                    force[i + 1] += share.y;
                    force[i + 2] += share.z;
                }
            }
        } else {
            let f = applied.direction * value;
            if let Some(weights) = point_weights(body, applied.ref_point) {
                for (node, w) in weights {
                    let i = node as usize * 3;
                    force[i] += w * f.x;
                    force[i + 1] += w * f.y;
                    force[i + 2] += w * f.z;
                }
            }
        }
    }

    body.energy[energy::INTERNAL] = internal_force(body, &mut force);

    let u0 = body.velo.clone();

    if !dynamic {
        let mut u = vec![0.0; n];
        body.invvec(step, &force, 0.0, &mut u);
        body.velo = u;
        return;
    }

    match body.scheme {
        Scheme::DefLim => {
            let b: Vec<f64> = force.iter().map(|f| f * step).collect();
            let du = solve_implicit(body, step, &b);
            for (u, d) in body.velo.iter_mut().zip(&du) {
                *u += d;
            }
        }
        _ => {
            let velo = std::mem::take(&mut body.velo);
            let mut u = velo;
            body.invvec(step, &force, 1.0, &mut u);
            body.velo = u;
        }
    }

    let work: f64 = force
        .iter()
        .zip(u0.iter().zip(&body.velo))
        .map(|(f, (a, b))| f * 0.5 * (a + b))
        .sum();
    body.energy[energy::EXTERNAL] += step * work;
}

/// Barycentric interpolation weights of a referential point.
fn point_weights(body: &Body, ref_point: Vec3<f64>) -> Option<Vec<(u32, f64)>> {
    let mesh = body.shape.as_mesh()?;
    let state = body.fem.as_ref()?;

    for tet in &state.tets {
        if let Some(weights) = mesh.ref_tet_barycentric(tet.nodes, ref_point) {
            return Some(
                tet.nodes
                    .iter()
                    .zip(weights)
                    .map(|(&n, w)| (n, w))
                    .collect(),
            );
        }
    }

    None
}

/// Point velocity operator over the containing element's nodes.
pub fn gen_to_loc(body: &Body, _sgp: usize, ref_point: Vec3<f64>) -> LocOp {
    let mut op = LocOp::default();

    if let Some(weights) = point_weights(body, ref_point) {
        for (node, w) in weights {
            for c in 0..3 {
                let mut e = Vec3::zero();
                e[c] = w;
                op.cols.push((node as usize * 3 + c, e));
            }
        }
    }

    op
}

/// Forward motion of a referential point.
pub fn cur_point(body: &Body, _sgp: usize, ref_point: Vec3<f64>) -> Vec3<f64> {
    match point_weights(body, ref_point) {
        Some(weights) => {
            let mesh = body.shape.as_mesh().expect("mesh shape");
            let mut out = Vec3::zero();
            for (node, w) in weights {
                out += (mesh.ref_nodes[node as usize] + disp(&body.conf, node)) * w;
            }
            out
        }
        None => ref_point,
    }
}

/// Inverse motion of a spatial point through the current tetrahedra.
pub fn ref_point(body: &Body, _sgp: usize, cur: Vec3<f64>) -> Vec3<f64> {
    let mesh = match body.shape.as_mesh() {
        Some(mesh) => mesh,
        None => return cur,
    };
    let state = match &body.fem {
        Some(state) => state,
        None => return cur,
    };

    for tet in &state.tets {
        let [a, b, c, d] = tet.nodes.map(|n| mesh.cur_nodes[n as usize]);
        let m = math::mat_from_cols(b - a, c - a, d - a);
        if let Some(x) = math::solve(&m, cur - a) {
            let l0 = 1.0 - x.x - x.y - x.z;
            let eps = 1e-9;
            if l0 >= -eps && x.x >= -eps && x.y >= -eps && x.z >= -eps {
                let refs = tet.nodes.map(|n| mesh.ref_nodes[n as usize]);
                return refs[0] * l0 + refs[1] * x.x + refs[2] * x.y + refs[3] * x.z;
            }
        }
    }

    cur
}

/// Kinetic energy of the lumped nodes.
pub fn kinetic_energy(body: &Body) -> f64 {
    match &body.fem {
        Some(state) => state
            .node_mass
            .iter()
            .enumerate()
            .map(|(i, mass)| 0.5 * mass * disp(&body.velo, i as u32).magnitude_squared())
            .sum(),
        None => 0.0,
    }
}

/// Set nodal velocities from a rigid motion.
pub fn initial_velocity(body: &mut Body, linear: Vec3<f64>, angular: Vec3<f64>) {
    let center = body.ref_center;
    let nodes = match body.shape.as_mesh() {
        Some(mesh) => mesh.ref_nodes.clone(),
        None => return,
    };

    for (i, node) in nodes.iter().enumerate() {
        let v = linear + angular.cross(*node - center);
        body.velo[3 * i] = v.x;
        body.velo[3 * i + 1] = v.y;
        body.velo[3 * i + 2] = v.z;
    }
    body.prev_velo.copy_from_slice(&body.velo);
}

/// Map a 12-element rigid configuration and 6-element velocity onto the
/// nodal basis, used by the rigid-to-FEM state remap.
pub fn from_rigid(
    body: &mut Body,
    rotation: &Mat3<f64>,
    position: Vec3<f64>,
    angular: Vec3<f64>,
    linear: Vec3<f64>,
) {
    let center = body.ref_center;
    let nodes = match body.shape.as_mesh() {
        Some(mesh) => mesh.ref_nodes.clone(),
        None => return,
    };
    // Referential angular velocity mapped to space through the rotation
    let omega = *rotation * angular;

    for (i, node) in nodes.iter().enumerate() {
        let x = *rotation * (*node - center) + position;
        let d = x - *node;
        body.conf[3 * i] = d.x;
        body.conf[3 * i + 1] = d.y;
        body.conf[3 * i + 2] = d.z;

        let v = linear + omega.cross(x - position);
        body.velo[3 * i] = v.x;
        body.velo[3 * i + 1] = v.y;
        body.velo[3 * i + 2] = v.z;
    }
    body.prev_velo.copy_from_slice(&body.velo);
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use vek::Vec3;

    use crate::body::{Body, BodyKind, BulkMaterial};
    use crate::mesh::Mesh;
    use crate::shape::{Primitive, Shape};

    fn block_body() -> Body {
        let mesh = Mesh::hex_block(Vec3::zero(), Vec3::one(), (1, 1, 1), 1);
        let shape = Shape::single(Primitive::Mesh(mesh));
        let mut body = Body::new(
            BodyKind::FiniteElement,
            shape,
            BulkMaterial {
                density: 1000.0,
                young: 1e7,
                poisson: 0.3,
                ..BulkMaterial::default()
            },
        );
        body.dynamic_init().unwrap();

        body
    }

    #[test]
    fn test_lumped_mass_sums_to_body_mass() {
        let body = block_body();

        let total: f64 = body.fem.as_ref().unwrap().node_mass.iter().sum();
        assert_relative_eq!(total, 1000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_unstrained_block_has_no_internal_force() {
        let body = block_body();

        let mut force = vec![0.0; body.dofs()];
        let strain_energy = super::internal_force(&body, &mut force);

        assert_relative_eq!(strain_energy, 0.0, epsilon = 1e-12);
        assert!(force.iter().all(|f| f.abs() < 1e-9));
    }

    #[test]
    fn test_free_fall_uniform() {
        let mut body = block_body();
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

        // Uniform acceleration of every node without strain
        for i in 0..body.dofs() / 3 {
            assert_relative_eq!(body.velo[3 * i + 2], -9.81 * 0.01, epsilon = 1e-6);
        }
        assert!(body.energy[crate::body::energy::INTERNAL].abs() < 1e-9);
    }

    #[test]
    fn test_point_weights_partition_unity() {
        let body = block_body();

        let weights = super::point_weights(&body, Vec3::new(0.3, 0.4, 0.5)).unwrap();
        let sum: f64 = weights.iter().map(|(_, w)| w).sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-12);
    }
}
