use vek::{Mat3, Vec3};

/// Tolerance below which geometric quantities are treated as degenerate.
pub const GEOMETRIC_EPSILON: f64 = 1e-10;

/// Build a matrix from three column vectors.
pub fn mat_from_cols(x: Vec3<f64>, y: Vec3<f64>, z: Vec3<f64>) -> Mat3<f64> {
    Mat3::new(x.x, y.x, z.x, x.y, y.y, z.y, x.z, y.z, z.z)
}

/// Column `i` of a matrix.
pub fn col(m: &Mat3<f64>, i: usize) -> Vec3<f64> {
    let e = match i {
        0 => Vec3::unit_x(),
        1 => Vec3::unit_y(),
        _ => Vec3::unit_z(),
    };

    *m * e
}

/// Componentwise minimum.
pub fn vmin(a: Vec3<f64>, b: Vec3<f64>) -> Vec3<f64> {
    Vec3::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z))
}

/// Componentwise maximum.
pub fn vmax(a: Vec3<f64>, b: Vec3<f64>) -> Vec3<f64> {
    Vec3::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z))
}

/// Trace of a matrix.
pub fn trace(m: &Mat3<f64>) -> f64 {
    col(m, 0).x + col(m, 1).y + col(m, 2).z
}

/// Outer product `a bᵀ`.
pub fn outer(a: Vec3<f64>, b: Vec3<f64>) -> Mat3<f64> {
    Mat3::new(
        a.x * b.x,
        a.x * b.y,
        a.x * b.z,
        a.y * b.x,
        a.y * b.y,
        a.y * b.z,
        a.z * b.x,
        a.z * b.y,
        a.z * b.z,
    )
}

/// Skew-symmetric cross product matrix of `w`, so that `skew(w) * v == w × v`.
pub fn skew(w: Vec3<f64>) -> Mat3<f64> {
    Mat3::new(0.0, -w.z, w.y, w.z, 0.0, -w.x, -w.y, w.x, 0.0)
}

/// Exponential map of a rotation vector (Rodrigues formula).
pub fn expmap(w: Vec3<f64>) -> Mat3<f64> {
    let angle = w.magnitude();
    if angle < 1e-15 {
        return Mat3::identity();
    }

    let k = skew(w / angle);
    let (sin, cos) = angle.sin_cos();

    Mat3::<f64>::identity() + k * sin + (k * k) * (1.0 - cos)
}

/// Inverse of a matrix through its adjugate.
///
/// Returns `None` for a singular input.
pub fn inv(m: &Mat3<f64>) -> Option<Mat3<f64>> {
    let det = m.determinant();
    if det.abs() < 1e-300 {
        return None;
    }

    let c0 = col(m, 0);
    let c1 = col(m, 1);
    let c2 = col(m, 2);

    // Rows of the inverse are the scaled cross products of the columns
    let r0 = c1.cross(c2) / det;
    let r1 = c2.cross(c0) / det;
    let r2 = c0.cross(c1) / det;

    Some(Mat3::new(
        r0.x, r0.y, r0.z, r1.x, r1.y, r1.z, r2.x, r2.y, r2.z,
    ))
}

/// Solve the 3-by-3 system `m x = b`.
pub fn solve(m: &Mat3<f64>, b: Vec3<f64>) -> Option<Vec3<f64>> {
    inv(m).map(|mi| mi * b)
}

/// Orthonormal base whose third column is the given unit normal.
pub fn base_from_normal(normal: Vec3<f64>) -> Mat3<f64> {
    // Pick the axis least aligned with the normal to seed the first tangent
    let seed = if normal.x.abs() < 0.57 {
        Vec3::unit_x()
    } else if normal.y.abs() < 0.57 {
        Vec3::unit_y()
    } else {
        Vec3::unit_z()
    };

    let t1 = (seed - normal * seed.dot(normal)).normalized();
    let t2 = normal.cross(t1);

    mat_from_cols(t1, t2, normal)
}

/// Rotation factor of the polar decomposition `f = r u`.
///
/// Higham iteration; the input must have a positive determinant.
pub fn polar_rotation(f: &Mat3<f64>) -> Mat3<f64> {
    let mut r = *f;

    for _ in 0..32 {
        let ri = match inv(&r) {
            Some(ri) => ri,
            None => return Mat3::identity(),
        };
        let next = (r + ri.transposed()) * 0.5;

        let delta: f64 = (next - r).into_row_array().iter().map(|x| x * x).sum();
        r = next;
        if delta < 1e-28 {
            break;
        }
    }

    r
}

/// Doubled area vector of a triangle; its magnitude is twice the area.
pub fn triangle_cross(a: Vec3<f64>, b: Vec3<f64>, c: Vec3<f64>) -> Vec3<f64> {
    (b - a).cross(c - a)
}

/// Area of a triangle.
pub fn triangle_area(a: Vec3<f64>, b: Vec3<f64>, c: Vec3<f64>) -> f64 {
    0.5 * triangle_cross(a, b, c).magnitude()
}

/// Whether all components are finite.
pub fn vec_finite(v: Vec3<f64>) -> bool {
    v.x.is_finite() && v.y.is_finite() && v.z.is_finite()
}

/// Whether all entries are finite.
pub fn mat_finite(m: &Mat3<f64>) -> bool {
    m.into_row_array().iter().all(|x| x.is_finite())
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use vek::{Mat3, Vec3};

    use super::{base_from_normal, col, expmap, inv, polar_rotation, skew};

    #[test]
    fn test_expmap_orthogonal() {
        let r = expmap(Vec3::new(0.3, -1.2, 0.7));
        let rrt = r * r.transposed();

        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(col(&rrt, j)[i], expected, epsilon = 1e-12);
            }
        }
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_skew_cross() {
        let w = Vec3::new(1.0, 2.0, 3.0);
        let v = Vec3::new(-0.5, 0.25, 4.0);

        assert_relative_eq!((skew(w) * v - w.cross(v)).magnitude(), 0.0);
    }

    #[test]
    fn test_inverse() {
        let m = Mat3::new(2.0, 1.0, 0.0, 0.5, 3.0, -1.0, 0.0, 0.2, 1.5);
        let id = m * inv(&m).unwrap();

        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(col(&id, j)[i], expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_base_from_normal() {
        let normal = Vec3::new(1.0, 2.0, -0.5).normalized();
        let base = base_from_normal(normal);

        assert_relative_eq!((col(&base, 2) - normal).magnitude(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(col(&base, 0).dot(col(&base, 1)), 0.0, epsilon = 1e-12);
        assert_relative_eq!(base.determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_polar_of_scaled_rotation() {
        let r = expmap(Vec3::new(0.1, 0.4, -0.2));
        let scaled = r * 2.5;

        let polar = polar_rotation(&scaled);
        for i in 0..3 {
            assert_relative_eq!(
                (col(&polar, i) - col(&r, i)).magnitude(),
                0.0,
                epsilon = 1e-10
            );
        }
    }
}
