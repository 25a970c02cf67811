//! Convex–convex overlap volume by half-space clipping.
//!
//! The overlap region of two convex cells is the intersection of all their
//! half-spaces; its boundary comes out as a triangle list where each triangle
//! remembers which input face it lies on.

use smallvec::SmallVec;
use vek::Vec3;

use crate::math;

use super::{ConvexData, Plane};

/// Triangle of the overlap boundary.
#[derive(Debug, Clone, Copy)]
pub struct OverlapTri {
    /// Corners.
    pub v: [Vec3<f64>; 3],
    /// Outward unit normal of the face the triangle lies on.
    pub out: Vec3<f64>,
    /// `+(i + 1)` for plane `i` of the first body, `-(i + 1)` for plane `i`
    /// of the second.
    pub flag: i32,
}

/// Triangulated boundary of the overlap region.
#[derive(Debug, Clone, Default)]
pub struct Overlap {
    /// Boundary triangles.
    pub tris: Vec<OverlapTri>,
    /// All boundary polygon vertices.
    pub vertices: Vec<Vec3<f64>>,
}

/// Clip a polygon by the inside (`signed distance <= 0`) of a plane.
fn clip_polygon(polygon: &[Vec3<f64>], plane: &Plane, eps: f64) -> SmallVec<[Vec3<f64>; 16]> {
    let mut out = SmallVec::new();
    let n = polygon.len();

    for i in 0..n {
        let a = polygon[i];
        let b = polygon[(i + 1) % n];
        let da = plane.signed_distance(a);
        let db = plane.signed_distance(b);

        if da <= eps {
            out.push(a);
        }
        if (da < -eps && db > eps) || (da > eps && db < -eps) {
            let t = da / (da - db);
            out.push(a + (b - a) * t);
        }
    }

    out
}

/// Intersect two convex cells; `None` when the overlap is empty or
/// degenerate.
pub fn convex_intersect(a: &ConvexData, b: &ConvexData) -> Option<Overlap> {
    // Seed polygon size from the combined extents
    let mut radius = 0.0f64;
    let mut center = Vec3::zero();
    let count = (a.vertices.len() + b.vertices.len()) as f64;
    for v in a.vertices.iter().chain(&b.vertices) {
        center += *v;
    }
    center /= count;
    for v in a.vertices.iter().chain(&b.vertices) {
        radius = radius.max((*v - center).magnitude());
    }
    let radius = 2.0 * radius + 1.0;
    let eps = 1e-12 * radius;

    let mut overlap = Overlap::default();

    let sides = [(&a.planes, &b.planes, 1i32), (&b.planes, &a.planes, -1i32)];
    for (own, other, sign) in sides {
        for (index, plane) in own.iter().enumerate() {
            // Large seed square on the face plane
            let base = math::base_from_normal(plane.normal);
            let t1 = math::col(&base, 0) * radius;
            let t2 = math::col(&base, 1) * radius;
            let origin = plane.point;

            let mut polygon: SmallVec<[Vec3<f64>; 16]> = SmallVec::new();
            polygon.push(origin - t1 - t2);
            polygon.push(origin + t1 - t2);
            polygon.push(origin + t1 + t2);
            polygon.push(origin - t1 + t2);

            // Clip by every other half-space of both cells
            for (clip_index, clip) in own.iter().enumerate() {
                if clip_index != index {
                    polygon = clip_polygon(&polygon, clip, eps);
                    if polygon.len() < 3 {
                        break;
                    }
                }
            }
            if polygon.len() >= 3 {
                for clip in other.iter() {
                    polygon = clip_polygon(&polygon, clip, eps);
                    if polygon.len() < 3 {
                        break;
                    }
                }
            }
            if polygon.len() < 3 {
                continue;
            }

            // Orient the fan outward and keep only non-sliver triangles
            let flag = sign * (index as i32 + 1);
            for w in polygon[1..].windows(2) {
                let (p0, p1, p2) = (polygon[0], w[0], w[1]);
                if math::triangle_area(p0, p1, p2) < eps * eps {
                    continue;
                }

                let tri = if math::triangle_cross(p0, p1, p2).dot(plane.normal) >= 0.0 {
                    [p0, p1, p2]
                } else {
                    [p0, p2, p1]
                };
                overlap.tris.push(OverlapTri {
                    v: tri,
                    out: plane.normal,
                    flag,
                });
            }
            overlap.vertices.extend(polygon);
        }
    }

    if overlap.tris.is_empty() {
        None
    } else {
        Some(overlap)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use vek::Vec3;

    use crate::geom::Convex;

    use super::convex_intersect;

    #[test]
    fn test_overlapping_cubes() {
        let a = Convex::cuboid(Vec3::zero(), Vec3::one(), 1);
        let b = Convex::cuboid(Vec3::broadcast(0.5), Vec3::broadcast(1.5), 2);

        let overlap = convex_intersect(&a.data(), &b.data()).unwrap();

        // The overlap is a half-unit cube: total boundary area 6 * 0.25
        let area: f64 = overlap
            .tris
            .iter()
            .map(|t| crate::math::triangle_area(t.v[0], t.v[1], t.v[2]))
            .sum();
        assert_relative_eq!(area, 1.5, epsilon = 1e-9);

        // Flags reference faces of both inputs
        assert!(overlap.tris.iter().any(|t| t.flag > 0));
        assert!(overlap.tris.iter().any(|t| t.flag < 0));
    }

    #[test]
    fn test_disjoint_cubes() {
        let a = Convex::cuboid(Vec3::zero(), Vec3::one(), 1);
        let b = Convex::cuboid(Vec3::broadcast(2.0), Vec3::broadcast(3.0), 2);

        assert!(convex_intersect(&a.data(), &b.data()).is_none());
    }

    #[test]
    fn test_contained_cube() {
        let a = Convex::cuboid(Vec3::zero(), Vec3::one(), 1);
        let b = Convex::cuboid(Vec3::broadcast(0.25), Vec3::broadcast(0.75), 2);

        let overlap = convex_intersect(&a.data(), &b.data()).unwrap();

        // Only the inner cube's faces bound the overlap
        assert!(overlap.tris.iter().all(|t| t.flag < 0));
        let area: f64 = overlap
            .tris
            .iter()
            .map(|t| crate::math::triangle_area(t.v[0], t.v[1], t.v[2]))
            .sum();
        assert_relative_eq!(area, 6.0 * 0.25, epsilon = 1e-9);
    }
}
