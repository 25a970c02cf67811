//! Gilbert–Johnson–Keerthi closest point queries between convex point clouds
//! and implicit smooth bodies (spheres, ellipsoids).

use arrayvec::ArrayVec;
use vek::Vec3;

use crate::math;

use super::Ellipsoid;

/// Iteration cap; the query is declared converged with the best simplex so
/// far when it is reached.
const MAX_ITERATIONS: usize = 64;

/// Relative convergence tolerance on the support gap.
const RELATIVE_TOLERANCE: f64 = 1e-12;

/// One vertex of the simplex: a Minkowski difference point together with the
/// two shape supports it came from.
#[derive(Debug, Clone, Copy)]
struct SimplexVertex {
    /// Point of `A - B`.
    w: Vec3<f64>,
    /// Support of `A`.
    a: Vec3<f64>,
    /// Support of `B`.
    b: Vec3<f64>,
}

/// Closest points between two convex sets given their support functions.
///
/// Returns the distance and the witness points in `A` and `B`; the distance
/// is zero when the sets overlap.
pub fn support_distance(
    support_a: impl Fn(Vec3<f64>) -> Vec3<f64>,
    support_b: impl Fn(Vec3<f64>) -> Vec3<f64>,
) -> (f64, Vec3<f64>, Vec3<f64>) {
    let minkowski = |direction: Vec3<f64>| {
        let a = support_a(direction);
        let b = support_b(-direction);

        SimplexVertex { w: a - b, a, b }
    };

    let mut simplex: ArrayVec<SimplexVertex, 4> = ArrayVec::new();
    simplex.push(minkowski(Vec3::unit_x()));

    let mut lambdas: ArrayVec<f64, 4> = ArrayVec::new();
    lambdas.push(1.0);

    for _ in 0..MAX_ITERATIONS {
        let v = reduce(&mut simplex, &mut lambdas);
        let dist = v.magnitude();

        if dist < 1e-14 {
            break;
        }

        let fresh = minkowski(-v);

        // No progress along the search direction means convergence
        if v.dot(v) - v.dot(fresh.w) <= RELATIVE_TOLERANCE * v.dot(v).max(1e-30) {
            break;
        }

        // A repeated support point would cycle forever
        if simplex
            .iter()
            .any(|s| (s.w - fresh.w).magnitude_squared() < 1e-28)
        {
            break;
        }

        if simplex.is_full() {
            break;
        }
        simplex.push(fresh);
        lambdas.push(0.0);
    }

    let v = reduce(&mut simplex, &mut lambdas);
    let mut pa = Vec3::zero();
    let mut pb = Vec3::zero();
    for (vertex, lambda) in simplex.iter().zip(&lambdas) {
        pa += vertex.a * *lambda;
        pb += vertex.b * *lambda;
    }

    (v.magnitude(), pa, pb)
}

/// Reduce the simplex to the minimal feature supporting the point closest to
/// the origin; returns that point and leaves the matching barycentric weights
/// in `lambdas`.
fn reduce(simplex: &mut ArrayVec<SimplexVertex, 4>, lambdas: &mut ArrayVec<f64, 4>) -> Vec3<f64> {
    let (closest, keep, weights) = match simplex.len() {
        1 => (simplex[0].w, vec![0], vec![1.0]),
        2 => {
            let (point, t) = closest_on_segment(simplex[0].w, simplex[1].w);
            if t <= 0.0 {
                (simplex[0].w, vec![0], vec![1.0])
            } else if t >= 1.0 {
                (simplex[1].w, vec![1], vec![1.0])
            } else {
                (point, vec![0, 1], vec![1.0 - t, t])
            }
        }
        3 => closest_on_triangle([simplex[0].w, simplex[1].w, simplex[2].w]),
        _ => closest_on_tetrahedron([
            simplex[0].w,
            simplex[1].w,
            simplex[2].w,
            simplex[3].w,
        ]),
    };

    let kept: ArrayVec<SimplexVertex, 4> = keep.iter().map(|&i| simplex[i]).collect();
    simplex.clear();
    lambdas.clear();
    for (vertex, weight) in kept.into_iter().zip(weights) {
        simplex.push(vertex);
        lambdas.push(weight);
    }

    closest
}

/// Parameter and position of the origin projection onto a segment.
fn closest_on_segment(a: Vec3<f64>, b: Vec3<f64>) -> (Vec3<f64>, f64) {
    let ab = b - a;
    let len2 = ab.magnitude_squared();
    if len2 < 1e-30 {
        return (a, 0.0);
    }

    let t = (-a.dot(ab) / len2).clamp(0.0, 1.0);

    (a + ab * t, t)
}

/// Closest point to the origin on a triangle, with the kept vertex indices
/// and their weights.
#[allow(clippy::type_complexity)]
fn closest_on_triangle(p: [Vec3<f64>; 3]) -> (Vec3<f64>, Vec<usize>, Vec<f64>) {
    let normal = math::triangle_cross(p[0], p[1], p[2]);
    let area2 = normal.magnitude_squared();

    if area2 > 1e-30 {
        // Project the origin onto the plane and test the barycentrics
        let project = normal * (p[0].dot(normal) / area2);

        let u = math::triangle_cross(p[1], p[2], project).dot(normal) / area2;
        let w = math::triangle_cross(p[2], p[0], project).dot(normal) / area2;
        let t = 1.0 - u - w;

        if u >= 0.0 && w >= 0.0 && t >= 0.0 {
            return (project, vec![0, 1, 2], vec![u, w, t]);
        }
    }

    // Fall back to the nearest edge
    let mut best: Option<(f64, Vec3<f64>, Vec<usize>, Vec<f64>)> = None;
    for (i, j) in [(0, 1), (1, 2), (2, 0)] {
        let (point, t) = closest_on_segment(p[i], p[j]);
        let dist = point.magnitude_squared();
        if best.as_ref().map_or(true, |(d, ..)| dist < *d) {
            best = Some((dist, point, vec![i, j], vec![1.0 - t, t]));
        }
    }

    let (_, point, keep, weights) = best.unwrap();
    (point, keep, weights)
}

/// Closest point to the origin on a tetrahedron, with the kept vertex
/// indices and their weights.
#[allow(clippy::type_complexity)]
fn closest_on_tetrahedron(p: [Vec3<f64>; 4]) -> (Vec3<f64>, Vec<usize>, Vec<f64>) {
    // Barycentric coordinates of the origin from a linear solve
    let m = math::mat_from_cols(p[1] - p[0], p[2] - p[0], p[3] - p[0]);
    if let Some(x) = math::solve(&m, -p[0]) {
        let l0 = 1.0 - x.x - x.y - x.z;
        if l0 >= 0.0 && x.x >= 0.0 && x.y >= 0.0 && x.z >= 0.0 {
            // Origin enclosed: zero distance
            return (Vec3::zero(), vec![0, 1, 2, 3], vec![l0, x.x, x.y, x.z]);
        }
    }

    let faces = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
    let mut best: Option<(f64, Vec3<f64>, Vec<usize>, Vec<f64>)> = None;

    for face in faces {
        let (point, keep, weights) = closest_on_triangle([p[face[0]], p[face[1]], p[face[2]]]);
        let dist = point.magnitude_squared();
        if best.as_ref().map_or(true, |(d, ..)| dist < *d) {
            let keep = keep.into_iter().map(|i| face[i]).collect();
            best = Some((dist, point, keep, weights));
        }
    }

    let (_, point, keep, weights) = best.unwrap();
    (point, keep, weights)
}

/// Support of a vertex cloud in a direction.
fn cloud_support(vertices: &[Vec3<f64>]) -> impl Fn(Vec3<f64>) -> Vec3<f64> + '_ {
    move |direction| {
        let mut best = vertices[0];
        let mut max = best.dot(direction);

        for v in &vertices[1..] {
            let d = v.dot(direction);
            if d > max {
                max = d;
                best = *v;
            }
        }

        best
    }
}

/// Support of a sphere in a direction.
fn sphere_support(center: Vec3<f64>, radius: f64) -> impl Fn(Vec3<f64>) -> Vec3<f64> {
    move |direction| {
        let mag = direction.magnitude();
        if mag < 1e-300 {
            center
        } else {
            center + direction * (radius / mag)
        }
    }
}

/// Closest points between two convex vertex clouds.
pub fn points(a: &[Vec3<f64>], b: &[Vec3<f64>]) -> (f64, Vec3<f64>, Vec3<f64>) {
    support_distance(cloud_support(a), cloud_support(b))
}

/// Distance of a point to a convex hull, with the closest hull point; zero
/// when the point is enclosed.
pub fn convex_point(vertices: &[Vec3<f64>], point: Vec3<f64>) -> (f64, Vec3<f64>) {
    let (dist, on_hull, _) = support_distance(cloud_support(vertices), move |_| point);

    (dist, on_hull)
}

/// Closest points between a convex hull and a sphere.
pub fn convex_sphere(
    vertices: &[Vec3<f64>],
    center: Vec3<f64>,
    radius: f64,
) -> (f64, Vec3<f64>, Vec3<f64>) {
    let (dist, p, q) = support_distance(cloud_support(vertices), sphere_support(center, radius));

    (dist, p, q)
}

/// Signed sphere–sphere distance with the surface witness points; negative
/// when overlapping.
pub fn sphere_sphere(
    ca: Vec3<f64>,
    ra: f64,
    cb: Vec3<f64>,
    rb: f64,
) -> (f64, Vec3<f64>, Vec3<f64>) {
    let axis = cb - ca;
    let len = axis.magnitude();
    let normal = if len > 1e-300 {
        axis / len
    } else {
        Vec3::unit_z()
    };

    (len - ra - rb, ca + normal * ra, cb - normal * rb)
}

/// Closest points between a convex hull and an ellipsoid.
pub fn convex_ellip(vertices: &[Vec3<f64>], ellip: &Ellipsoid) -> (f64, Vec3<f64>, Vec3<f64>) {
    support_distance(cloud_support(vertices), |d| ellip.support(d))
}

/// Closest points between two ellipsoids.
pub fn ellip_ellip(a: &Ellipsoid, b: &Ellipsoid) -> (f64, Vec3<f64>, Vec3<f64>) {
    support_distance(|d| a.support(d), |d| b.support(d))
}

/// Closest points between a sphere and an ellipsoid.
pub fn sphere_ellip(
    center: Vec3<f64>,
    radius: f64,
    ellip: &Ellipsoid,
) -> (f64, Vec3<f64>, Vec3<f64>) {
    support_distance(sphere_support(center, radius), |d| ellip.support(d))
}

/// Semi-negative gap between two supported sets along an outward normal of
/// the first: the span between the closest supporting planes.
pub fn support_gap(
    support_a: impl Fn(Vec3<f64>) -> Vec3<f64>,
    support_b: impl Fn(Vec3<f64>) -> Vec3<f64>,
    normal: Vec3<f64>,
) -> f64 {
    support_b(-normal).dot(normal) - support_a(normal).dot(normal)
}

/// Gap between a convex hull and an ellipsoid along a normal.
pub fn convex_ellip_gap(vertices: &[Vec3<f64>], ellip: &Ellipsoid, normal: Vec3<f64>) -> f64 {
    support_gap(cloud_support(vertices), |d| ellip.support(d), normal)
}

/// Gap between two ellipsoids along a normal.
pub fn ellip_ellip_gap(a: &Ellipsoid, b: &Ellipsoid, normal: Vec3<f64>) -> f64 {
    support_gap(|d| a.support(d), |d| b.support(d), normal)
}

/// Gap between a sphere and an ellipsoid along a normal.
pub fn sphere_ellip_gap(
    center: Vec3<f64>,
    radius: f64,
    ellip: &Ellipsoid,
    normal: Vec3<f64>,
) -> f64 {
    support_gap(sphere_support(center, radius), |d| ellip.support(d), normal)
}

#[cfg(test)]
fn unit_cube() -> Vec<Vec3<f64>> {
    let mut out = Vec::new();
    for x in [0.0, 1.0] {
        for y in [0.0, 1.0] {
            for z in [0.0, 1.0] {
                out.push(Vec3::new(x, y, z));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use vek::Vec3;

    use crate::geom::Ellipsoid;

    use super::{
        convex_point, ellip_ellip, points, sphere_ellip, sphere_sphere, support_gap, unit_cube,
    };

    #[test]
    fn test_separated_cubes() {
        let a = unit_cube();
        let b: Vec<_> = unit_cube()
            .into_iter()
            .map(|v| v + Vec3::new(2.5, 0.0, 0.0))
            .collect();

        let (dist, p, q) = points(&a, &b);
        assert_relative_eq!(dist, 1.5, epsilon = 1e-9);
        assert_relative_eq!(p.x, 1.0, epsilon = 1e-9);
        assert_relative_eq!(q.x, 2.5, epsilon = 1e-9);
    }

    #[test]
    fn test_overlapping_cubes() {
        let a = unit_cube();
        let b: Vec<_> = unit_cube()
            .into_iter()
            .map(|v| v + Vec3::new(0.5, 0.5, 0.5))
            .collect();

        let (dist, _, _) = points(&a, &b);
        assert_relative_eq!(dist, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_point_in_hull() {
        let cube = unit_cube();

        let (inside, _) = convex_point(&cube, Vec3::broadcast(0.5));
        assert_relative_eq!(inside, 0.0, epsilon = 1e-9);

        let (outside, closest) = convex_point(&cube, Vec3::new(2.0, 0.5, 0.5));
        assert_relative_eq!(outside, 1.0, epsilon = 1e-9);
        assert_relative_eq!(closest.x, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_sphere_sphere_signed() {
        let (dist, pa, pb) = sphere_sphere(
            Vec3::zero(),
            1.0,
            Vec3::new(1.5, 0.0, 0.0),
            1.0,
        );

        assert_relative_eq!(dist, -0.5, epsilon = 1e-12);
        assert_relative_eq!(pa.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(pb.x, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_ellipsoid_queries() {
        let a = Ellipsoid::new(Vec3::zero(), Vec3::new(0.5, 0.3, 0.3), 1);
        let b = Ellipsoid::new(Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.5, 0.3, 0.3), 2);

        let (dist, p, q) = ellip_ellip(&a, &b);
        assert_relative_eq!(dist, 1.0, epsilon = 1e-6);
        assert_relative_eq!(p.x, 0.5, epsilon = 1e-6);
        assert_relative_eq!(q.x, 1.5, epsilon = 1e-6);

        let (dist, _, _) = sphere_ellip(Vec3::new(1.0, 0.0, 0.0), 0.2, &a);
        assert_relative_eq!(dist, 0.3, epsilon = 1e-6);
    }

    #[test]
    fn test_support_gap_matches_distance() {
        let a = unit_cube();
        let b: Vec<_> = unit_cube()
            .into_iter()
            .map(|v| v + Vec3::new(1.75, 0.0, 0.0))
            .collect();

        let support = |vs: Vec<Vec3<f64>>| {
            move |d: Vec3<f64>| {
                *vs.iter()
                    .max_by(|p, q| p.dot(d).partial_cmp(&q.dot(d)).unwrap())
                    .unwrap()
            }
        };

        let gap = support_gap(support(a), support(b), Vec3::unit_x());
        assert_relative_eq!(gap, 0.75, epsilon = 1e-12);
    }
}
