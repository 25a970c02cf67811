//! Narrow phase contact detection and update between SGP pairs.
//!
//! Convex cells (mesh elements and convex primitives) meet through the
//! overlap clipping kernel; smooth bodies use analytic normals at the GJK
//! closest points. Asymmetric pairs are processed with swapped arguments so
//! the returned normal is always outward from the master.

use vek::Vec3;

use crate::{
    geom::{
        gjk,
        intersect::{convex_intersect, Overlap},
        ConvexData, Ellipsoid, Plane, Sphere,
    },
    math::{self, GEOMETRIC_EPSILON},
    shape::SgpRef,
};

use super::{ContactGeometry, Detect, Update};

/// Surface id whose plane is nearest to a point, ties broken by minimum
/// absolute signed distance.
fn nearest_surface(point: Vec3<f64>, planes: &[Plane], surfaces: &[i32], nsurf: usize) -> i32 {
    let mut min = f64::MAX;
    let mut best = surfaces.first().copied().unwrap_or(0);

    for (plane, surface) in planes.iter().zip(surfaces).take(nsurf) {
        let d = plane.signed_distance(point).abs();
        if d < min {
            min = d;
            best = *surface;
        }
    }

    best
}

/// Surface plane nearest from the inside, used when a sphere center sits
/// inside a convex cell.
fn nearest_normal(point: Vec3<f64>, planes: &[Plane], nsurf: usize) -> Option<Vec3<f64>> {
    let mut max = f64::MIN;
    let mut best = None;

    for plane in planes.iter().take(nsurf) {
        let d = plane.signed_distance(point);
        if d > max {
            max = d;
            best = Some(plane.normal);
        }
    }

    best
}

/// Resultant contact data distilled from the overlap triangulation.
///
/// `prev_spair` switches the routine into update mode: the surface pair is
/// recomputed and compared instead of freshly assigned. Returns `None` on an
/// ill-conditioned point, otherwise the geometry and whether the surface
/// pair changed.
fn point_normal_spair_area_gap(
    overlap: &Overlap,
    a: &ConvexData,
    b: &ConvexData,
    prev_spair: Option<[i32; 2]>,
) -> Option<(ContactGeometry, bool)> {
    let mut normal = Vec3::zero();
    let mut point = Vec3::zero();
    let mut area = 0.0;

    for tri in &overlap.tris {
        let t = math::triangle_area(tri.v[0], tri.v[1], tri.v[2]);
        // Squaring the weight damps the influence of sliver triangles
        let weight = t * t;
        if tri.flag > 0 && (tri.flag as usize) < a.nsurf + 1 {
            normal += tri.out * weight;
        }
        if tri.flag < 0 && (-tri.flag as usize) < b.nsurf + 1 {
            normal -= tri.out * weight;
        }
        point += (tri.v[0] + tri.v[1] + tri.v[2]) / 3.0 * t;
        area += t;
    }

    if area < 1e-300 || normal.magnitude() < 1e-300 {
        return None;
    }
    point /= area;
    let normal = normal.normalized();
    let area = 0.5 * area;

    // Fail ill-conditioned points outside of either hull
    if gjk::convex_point(&a.vertices, point).0 > GEOMETRIC_EPSILON
        || gjk::convex_point(&b.vertices, point).0 > GEOMETRIC_EPSILON
    {
        return None;
    }

    let spair = [
        nearest_surface(point, &a.planes, &a.surfaces, a.nsurf),
        nearest_surface(point, &b.planes, &b.surfaces, b.nsurf),
    ];
    let changed = match prev_spair {
        Some(prev) => prev != spair,
        None => false,
    };

    // Candidate gap from the min-max projection of the overlap vertices
    let mut pos = f64::MIN;
    let mut neg = f64::MAX;
    for v in &overlap.vertices {
        let d = normal.dot(*v);
        pos = pos.max(d);
        neg = neg.min(d);
    }
    let mut gap = if neg == f64::MAX { 0.0 } else { neg - pos };

    if gap < -GEOMETRIC_EPSILON {
        // Robustness corrector: pull the bodies apart by the candidate depth
        // and measure what remains with GJK
        let depth = -gap;
        let moved_a: Vec<Vec3<f64>> = a
            .vertices
            .iter()
            .map(|v| *v - normal * depth)
            .collect();
        let moved_b: Vec<Vec3<f64>> = b
            .vertices
            .iter()
            .map(|v| *v + normal * depth)
            .collect();

        let (dist, _, _) = gjk::points(&moved_a, &moved_b);
        gap = (dist - 2.0 * depth).min(0.0);
    }

    let geometry = ContactGeometry {
        point,
        slave_point: point,
        normal,
        gap,
        area,
        spair,
    };

    if geometry.is_finite() {
        Some((geometry, changed))
    } else {
        None
    }
}

impl ContactGeometry {
    /// Sanity check over every computed quantity.
    fn is_finite(&self) -> bool {
        math::vec_finite(self.point)
            && math::vec_finite(self.slave_point)
            && math::vec_finite(self.normal)
            && self.gap.is_finite()
            && self.area.is_finite()
    }

    /// Exchange master and slave sides.
    fn swapped(mut self) -> Self {
        std::mem::swap(&mut self.point, &mut self.slave_point);
        self.spair.swap(0, 1);

        self
    }

    /// Reverse the normal direction.
    fn flipped(mut self) -> Self {
        self.normal = -self.normal;

        self
    }
}

/// Detect contact between two convex cells.
fn detect_convex_convex(a: &ConvexData, b: &ConvexData) -> Detect {
    let overlap = match convex_intersect(a, b) {
        Some(overlap) => overlap,
        None => return Detect::NoContact,
    };

    match point_normal_spair_area_gap(&overlap, a, b, None) {
        Some((geometry, _)) => Detect::Contact {
            geometry,
            master_is_second: false,
        },
        None => Detect::Reject,
    }
}

/// Detect contact between a convex cell and a sphere; normal outward from
/// the convex.
fn detect_convex_sphere(c: &ConvexData, sphere: &Sphere) -> Detect {
    let center = sphere.cur_center;
    let radius = sphere.cur_radius;

    let (dist, on_hull) = gjk::convex_point(&c.vertices, center);
    if dist >= radius + GEOMETRIC_EPSILON {
        return Detect::NoContact;
    }

    let axis = center - on_hull;
    let len2 = axis.magnitude_squared();
    let (normal, len) = if len2 == 0.0 {
        // Center inside the convex: fall back to the nearest surface plane
        match nearest_normal(on_hull, &c.planes, c.nsurf) {
            Some(normal) => (normal, radius),
            None => return Detect::Reject,
        }
    } else {
        let len = len2.sqrt();
        (axis / len, len)
    };

    let geometry = ContactGeometry {
        point: on_hull,
        slave_point: center - normal * radius,
        normal,
        gap: (len - radius).min(0.0),
        area: 1.0,
        spair: [
            nearest_surface(on_hull, &c.planes, &c.surfaces, c.nsurf),
            sphere.surface,
        ],
    };

    if geometry.is_finite() {
        Detect::Contact {
            geometry,
            master_is_second: false,
        }
    } else {
        Detect::Reject
    }
}

/// Shared convex–ellipsoid closest-feature scan; returns the geometry with
/// the normal outward from the convex, or `None` when no surface plane is
/// close enough.
fn convex_ellip_geometry(c: &ConvexData, ellip: &Ellipsoid) -> Option<ContactGeometry> {
    let (dist, on_hull, on_ellip) = gjk::convex_ellip(&c.vertices, ellip);
    if dist >= GEOMETRIC_EPSILON {
        return None;
    }

    let mut spair0 = None;
    let mut found = None;

    for (index, plane) in c.planes.iter().take(c.nsurf).enumerate() {
        if plane.signed_distance(on_hull) < GEOMETRIC_EPSILON {
            spair0 = Some(c.surfaces[index]);

            // Ellipsoid support point opposed to that plane normal
            let support = ellip.support(-plane.normal);
            let (d, on_hull_again) = gjk::convex_point(&c.vertices, support);
            if d < GEOMETRIC_EPSILON {
                found = Some((plane.normal, on_hull_again, support));
                break;
            }
        }
    }

    let spair0 = spair0?;

    let (normal, point, slave_point) = match found {
        Some((normal, p, q)) => (normal, p, q),
        // Corner or edge: use the ellipsoid normal flipped convex-outward
        None => (-ellip.normal_at(on_ellip), on_hull, on_ellip),
    };

    let gap = gjk::convex_ellip_gap(&c.vertices, ellip, normal).min(0.0);

    let geometry = ContactGeometry {
        point,
        slave_point,
        normal,
        gap,
        area: 1.0,
        spair: [spair0, ellip.surface],
    };

    geometry.is_finite().then_some(geometry)
}

/// Detect contact between a convex cell and an ellipsoid.
fn detect_convex_ellip(c: &ConvexData, ellip: &Ellipsoid) -> Detect {
    let (dist, _, _) = gjk::convex_ellip(&c.vertices, ellip);
    if dist >= GEOMETRIC_EPSILON {
        return Detect::NoContact;
    }

    match convex_ellip_geometry(c, ellip) {
        Some(geometry) => Detect::Contact {
            geometry,
            master_is_second: false,
        },
        None => Detect::Reject,
    }
}

/// Compute the semi-negative sphere–sphere gap along a normal.
fn sphere_sphere_gap(ca: Vec3<f64>, ra: f64, cb: Vec3<f64>, rb: f64, normal: Vec3<f64>) -> f64 {
    let d = (cb - ca).dot(normal);
    let e = ra + rb;

    if e > d {
        d - e
    } else {
        0.0
    }
}

/// Lexicographic point comparison keeping the normal orientation independent
/// of the processing order.
fn point_less_eq(a: Vec3<f64>, b: Vec3<f64>) -> bool {
    for i in 0..3 {
        if a[i] < b[i] {
            return true;
        }
        if a[i] > b[i] {
            return false;
        }
    }

    true
}

/// Detect contact between two spheres.
fn detect_sphere_sphere(a: &Sphere, b: &Sphere) -> Detect {
    let (dist, pa, pb) = gjk::sphere_sphere(a.cur_center, a.cur_radius, b.cur_center, b.cur_radius);
    if dist >= GEOMETRIC_EPSILON {
        return Detect::NoContact;
    }

    let (geometry, master_is_second) = if point_less_eq(a.cur_center, b.cur_center) {
        let normal = (pa - a.cur_center).normalized();
        let gap = sphere_sphere_gap(a.cur_center, a.cur_radius, b.cur_center, b.cur_radius, normal);

        (
            ContactGeometry {
                point: pa,
                slave_point: pb,
                normal,
                gap,
                area: 1.0,
                spair: [a.surface, b.surface],
            },
            false,
        )
    } else {
        let normal = (pb - b.cur_center).normalized();
        let gap = sphere_sphere_gap(b.cur_center, b.cur_radius, a.cur_center, a.cur_radius, normal);

        (
            ContactGeometry {
                point: pb,
                slave_point: pa,
                normal,
                gap,
                area: 1.0,
                spair: [b.surface, a.surface],
            },
            true,
        )
    };

    if geometry.is_finite() {
        Detect::Contact {
            geometry,
            master_is_second,
        }
    } else {
        Detect::Reject
    }
}

/// Detect contact between two ellipsoids.
fn detect_ellip_ellip(a: &Ellipsoid, b: &Ellipsoid) -> Detect {
    let (dist, pa, pb) = gjk::ellip_ellip(a, b);
    if dist >= GEOMETRIC_EPSILON {
        return Detect::NoContact;
    }

    let (geometry, master_is_second) = if point_less_eq(a.cur_center, b.cur_center) {
        let normal = a.normal_at(pa);
        let gap = gjk::ellip_ellip_gap(a, b, normal).min(0.0);

        (
            ContactGeometry {
                point: pa,
                slave_point: pb,
                normal,
                gap,
                area: 1.0,
                spair: [a.surface, b.surface],
            },
            false,
        )
    } else {
        let normal = b.normal_at(pb);
        let gap = gjk::ellip_ellip_gap(b, a, normal).min(0.0);

        (
            ContactGeometry {
                point: pb,
                slave_point: pa,
                normal,
                gap,
                area: 1.0,
                spair: [b.surface, a.surface],
            },
            true,
        )
    };

    if geometry.is_finite() {
        Detect::Contact {
            geometry,
            master_is_second,
        }
    } else {
        Detect::Reject
    }
}

/// Detect contact between a sphere and an ellipsoid; the sphere is master.
fn detect_sphere_ellip(sphere: &Sphere, ellip: &Ellipsoid) -> Detect {
    let (dist, pa, pb) =
        gjk::sphere_ellip(sphere.cur_center, sphere.cur_radius, ellip);
    if dist >= GEOMETRIC_EPSILON {
        return Detect::NoContact;
    }

    let normal = sphere.normal_at(pa);
    let gap = gjk::sphere_ellip_gap(sphere.cur_center, sphere.cur_radius, ellip, normal).min(0.0);

    let geometry = ContactGeometry {
        point: pa,
        slave_point: pb,
        normal,
        gap,
        area: 1.0,
        spair: [sphere.surface, ellip.surface],
    };

    if geometry.is_finite() {
        Detect::Contact {
            geometry,
            master_is_second: false,
        }
    } else {
        Detect::Reject
    }
}

/// Detect contact between two SGPs in their given order.
pub fn detect(one: &SgpRef, two: &SgpRef) -> Detect {
    match (one, two) {
        (SgpRef::Convex(a), SgpRef::Convex(b)) => detect_convex_convex(a, b),
        (SgpRef::Convex(c), SgpRef::Sphere(s)) => detect_convex_sphere(c, s),
        (SgpRef::Sphere(s), SgpRef::Convex(c)) => detect_convex_sphere(c, s).swap_roles(),
        (SgpRef::Convex(c), SgpRef::Ellipsoid(e)) => detect_convex_ellip(c, e),
        (SgpRef::Ellipsoid(e), SgpRef::Convex(c)) => detect_convex_ellip(c, e).swap_roles(),
        (SgpRef::Sphere(a), SgpRef::Sphere(b)) => detect_sphere_sphere(a, b),
        (SgpRef::Ellipsoid(a), SgpRef::Ellipsoid(b)) => detect_ellip_ellip(a, b),
        (SgpRef::Sphere(s), SgpRef::Ellipsoid(e)) => detect_sphere_ellip(s, e),
        (SgpRef::Ellipsoid(e), SgpRef::Sphere(s)) => detect_sphere_ellip(s, e).swap_roles(),
    }
}

impl Detect {
    /// Flip which input is considered the master after a swapped dispatch.
    fn swap_roles(self) -> Self {
        match self {
            Self::Contact {
                geometry,
                master_is_second,
            } => Self::Contact {
                geometry,
                master_is_second: !master_is_second,
            },
            other => other,
        }
    }
}

/// Update an existing contact; the arguments are the master and slave SGPs
/// of the constraint, in that order.
pub fn update(master: &SgpRef, slave: &SgpRef, prev_spair: [i32; 2]) -> Update {
    match (master, slave) {
        (SgpRef::Convex(a), SgpRef::Convex(b)) => {
            let overlap = match convex_intersect(a, b) {
                Some(overlap) => overlap,
                None => return Update::Gone,
            };

            match point_normal_spair_area_gap(&overlap, a, b, Some(prev_spair)) {
                Some((geometry, false)) => Update::Updated(geometry),
                Some((geometry, true)) => Update::SurfaceChanged(geometry),
                None => Update::Reject,
            }
        }
        (SgpRef::Convex(c), SgpRef::Sphere(s)) => match detect_convex_sphere(c, s) {
            Detect::Contact { geometry, .. } => {
                if geometry.spair[0] == prev_spair[0] {
                    Update::Updated(geometry)
                } else {
                    Update::SurfaceChanged(geometry)
                }
            }
            Detect::NoContact => Update::Gone,
            Detect::Reject => Update::Reject,
        },
        (SgpRef::Convex(c), SgpRef::Ellipsoid(e)) => {
            let (dist, _, _) = gjk::convex_ellip(&c.vertices, e);
            if dist >= GEOMETRIC_EPSILON {
                return Update::Gone;
            }

            match convex_ellip_geometry(c, e) {
                Some(geometry) if geometry.spair[0] == prev_spair[0] => Update::Updated(geometry),
                Some(geometry) => Update::SurfaceChanged(geometry),
                None => Update::Reject,
            }
        }
        (SgpRef::Sphere(a), SgpRef::Sphere(b)) => {
            let (dist, pa, pb) =
                gjk::sphere_sphere(a.cur_center, a.cur_radius, b.cur_center, b.cur_radius);
            if dist >= GEOMETRIC_EPSILON {
                return Update::Gone;
            }

            // Orientation stays with the master regardless of center motion
            let normal = (pa - a.cur_center).normalized();
            let gap = sphere_sphere_gap(a.cur_center, a.cur_radius, b.cur_center, b.cur_radius, normal);

            let geometry = ContactGeometry {
                point: pa,
                slave_point: pb,
                normal,
                gap,
                area: 1.0,
                spair: prev_spair,
            };
            if geometry.is_finite() {
                Update::Updated(geometry)
            } else {
                Update::Reject
            }
        }
        (SgpRef::Ellipsoid(a), SgpRef::Ellipsoid(b)) => {
            let (dist, pa, pb) = gjk::ellip_ellip(a, b);
            if dist >= GEOMETRIC_EPSILON {
                return Update::Gone;
            }

            let normal = a.normal_at(pa);
            let gap = gjk::ellip_ellip_gap(a, b, normal).min(0.0);

            let geometry = ContactGeometry {
                point: pa,
                slave_point: pb,
                normal,
                gap,
                area: 1.0,
                spair: prev_spair,
            };
            if geometry.is_finite() {
                Update::Updated(geometry)
            } else {
                Update::Reject
            }
        }
        (SgpRef::Sphere(s), SgpRef::Ellipsoid(e)) => match detect_sphere_ellip(s, e) {
            Detect::Contact { mut geometry, .. } => {
                geometry.spair = prev_spair;
                Update::Updated(geometry)
            }
            Detect::NoContact => Update::Gone,
            Detect::Reject => Update::Reject,
        },
        // Asymmetric pairs always carry the convex (or sphere) as master, so
        // a reversed order means the constraint was built the other way
        // around; process swapped and restore the roles.
        (one, two) => match update_swapped(one, two, prev_spair) {
            Some(result) => result,
            None => Update::Reject,
        },
    }
}

/// Handle the reversed asymmetric orders by swapping sides.
fn update_swapped(master: &SgpRef, slave: &SgpRef, prev_spair: [i32; 2]) -> Option<Update> {
    let swapped_prev = [prev_spair[1], prev_spair[0]];

    let result = match (master, slave) {
        (SgpRef::Sphere(s), SgpRef::Convex(c)) => update(
            &SgpRef::Convex(c.clone()),
            &SgpRef::Sphere(*s),
            swapped_prev,
        ),
        (SgpRef::Ellipsoid(e), SgpRef::Convex(c)) => update(
            &SgpRef::Convex(c.clone()),
            &SgpRef::Ellipsoid(*e),
            swapped_prev,
        ),
        (SgpRef::Ellipsoid(e), SgpRef::Sphere(s)) => update(
            &SgpRef::Sphere(*s),
            &SgpRef::Ellipsoid(*e),
            swapped_prev,
        ),
        _ => return None,
    };

    // The returned normal points outward from the slave here; flip the
    // geometry back into the master frame
    Some(match result {
        Update::Updated(geometry) => Update::Updated(geometry.swapped().flipped()),
        Update::SurfaceChanged(geometry) => Update::SurfaceChanged(geometry.swapped().flipped()),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use vek::Vec3;

    use crate::geom::{Convex, Ellipsoid, Sphere};
    use crate::shape::SgpRef;

    use super::{detect, update, Detect, Update};

    #[test]
    fn test_convex_convex_contact() {
        let a = Convex::cuboid(Vec3::zero(), Vec3::one(), 1);
        let b = Convex::cuboid(
            Vec3::new(0.0, 0.0, 0.95),
            Vec3::new(1.0, 1.0, 1.95),
            2,
        );

        match detect(&SgpRef::Convex(a.data()), &SgpRef::Convex(b.data())) {
            Detect::Contact { geometry, .. } => {
                assert_relative_eq!(geometry.normal.magnitude(), 1.0, epsilon = 1e-9);
                assert_relative_eq!(geometry.normal.z.abs(), 1.0, epsilon = 1e-6);
                assert!(geometry.gap <= 0.0);
                assert!(geometry.gap > -0.1);
                assert!(geometry.area > 0.5);
                assert_eq!(geometry.spair, [1, 2]);
            }
            other => panic!("expected contact, got {other:?}"),
        }
    }

    #[test]
    fn test_convex_sphere_contact() {
        let cube = Convex::cuboid(Vec3::zero(), Vec3::one(), 3);
        let sphere = Sphere::new(Vec3::new(0.5, 0.5, 1.4), 0.5, 4);

        match detect(&SgpRef::Convex(cube.data()), &SgpRef::Sphere(&sphere)) {
            Detect::Contact {
                geometry,
                master_is_second,
            } => {
                assert!(!master_is_second);
                assert_relative_eq!(geometry.normal.z, 1.0, epsilon = 1e-9);
                assert_relative_eq!(geometry.gap, -0.1, epsilon = 1e-9);
                assert_eq!(geometry.spair, [3, 4]);
            }
            other => panic!("expected contact, got {other:?}"),
        }
    }

    #[test]
    fn test_sphere_convex_swaps_master() {
        let cube = Convex::cuboid(Vec3::zero(), Vec3::one(), 3);
        let sphere = Sphere::new(Vec3::new(0.5, 0.5, 1.4), 0.5, 4);

        match detect(&SgpRef::Sphere(&sphere), &SgpRef::Convex(cube.data())) {
            Detect::Contact {
                master_is_second, ..
            } => assert!(master_is_second),
            other => panic!("expected contact, got {other:?}"),
        }
    }

    #[test]
    fn test_sphere_sphere_orientation_stable() {
        let a = Sphere::new(Vec3::zero(), 0.5, 1);
        let b = Sphere::new(Vec3::new(0.9, 0.0, 0.0), 0.5, 2);

        let forward = detect(&SgpRef::Sphere(&a), &SgpRef::Sphere(&b));
        let backward = detect(&SgpRef::Sphere(&b), &SgpRef::Sphere(&a));

        match (forward, backward) {
            (
                Detect::Contact {
                    geometry: f,
                    master_is_second: fs,
                },
                Detect::Contact {
                    geometry: g,
                    master_is_second: gs,
                },
            ) => {
                // Same normal in space no matter the processing order
                assert_relative_eq!((f.normal - g.normal).magnitude(), 0.0, epsilon = 1e-12);
                assert!(!fs);
                assert!(gs);
                assert_relative_eq!(f.gap, -0.1, epsilon = 1e-12);
            }
            other => panic!("expected two contacts, got {other:?}"),
        }
    }

    #[test]
    fn test_sphere_ellip_glancing() {
        let sphere = Sphere::new(Vec3::new(-0.65, 0.0, 0.0), 0.2, 1);
        let ellip = Ellipsoid::new(Vec3::zero(), Vec3::new(0.5, 0.3, 0.3), 2);

        match detect(&SgpRef::Sphere(&sphere), &SgpRef::Ellipsoid(&ellip)) {
            Detect::Contact { geometry, .. } => {
                assert_relative_eq!(geometry.normal.magnitude(), 1.0, epsilon = 1e-9);
                assert!(geometry.normal.x > 0.0);
                assert!(geometry.gap <= 0.0);
            }
            other => panic!("expected contact, got {other:?}"),
        }
    }

    #[test]
    fn test_detect_then_update_idempotent() {
        let a = Convex::cuboid(Vec3::zero(), Vec3::one(), 1);
        let b = Convex::cuboid(
            Vec3::new(0.0, 0.0, 0.9),
            Vec3::new(1.0, 1.0, 1.9),
            2,
        );

        let first = match detect(&SgpRef::Convex(a.data()), &SgpRef::Convex(b.data())) {
            Detect::Contact { geometry, .. } => geometry,
            other => panic!("expected contact, got {other:?}"),
        };

        match update(
            &SgpRef::Convex(a.data()),
            &SgpRef::Convex(b.data()),
            first.spair,
        ) {
            Update::Updated(second) => {
                assert_relative_eq!((first.point - second.point).magnitude(), 0.0, epsilon = 1e-9);
                assert_relative_eq!(
                    (first.normal - second.normal).magnitude(),
                    0.0,
                    epsilon = 1e-9
                );
                assert_relative_eq!(first.gap, second.gap, epsilon = 1e-9);
            }
            other => panic!("expected update, got {other:?}"),
        }
    }
}
