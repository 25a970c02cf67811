use vek::{Aabb, Mat3, Vec3};

use crate::math;

use super::{Characteristics, Motion};

/// Analytic ellipsoid encoded as a scaled and rotated unit sphere.
///
/// The referential rotation is kept separately from the current one so that
/// repeated deformations do not accumulate rounding error in the frame.
#[derive(Debug, Clone)]
pub struct Ellipsoid {
    /// Referential center.
    pub ref_center: Vec3<f64>,
    /// Unit sphere scaling into the unrotated referential ellipsoid.
    pub ref_sca: Vec3<f64>,
    /// Initial rotation of the referential ellipsoid.
    pub ref_rot: Mat3<f64>,
    /// Current center.
    pub cur_center: Vec3<f64>,
    /// Current scaling.
    pub cur_sca: Vec3<f64>,
    /// Current rotation.
    pub cur_rot: Mat3<f64>,
    /// Surface identifier.
    pub surface: i32,
    /// Volume identifier.
    pub volume: i32,
}

impl Ellipsoid {
    /// Construct from a center and the three semi-axis radii.
    pub fn new(center: Vec3<f64>, radii: Vec3<f64>, surface: i32) -> Self {
        Self {
            ref_center: center,
            ref_sca: radii,
            ref_rot: Mat3::identity(),
            cur_center: center,
            cur_sca: radii,
            cur_rot: Mat3::identity(),
            surface,
            volume: 0,
        }
    }

    /// Scale the radii; referential and current copies both change.
    pub fn scale(&mut self, factor: Vec3<f64>) {
        self.ref_sca *= factor;
        self.ref_center *= factor;
        self.cur_sca = self.ref_sca;
        self.cur_center = self.ref_center;
    }

    /// Translate; referential and current copies both move.
    pub fn translate(&mut self, vector: Vec3<f64>) {
        self.ref_center += vector;
        self.cur_center = self.ref_center;
    }

    /// Rotate about a point; referential and current copies both move.
    pub fn rotate(&mut self, point: Vec3<f64>, axis: Vec3<f64>, angle: f64) {
        let rotation = math::expmap(axis.normalized() * angle);

        self.ref_center = rotation * (self.ref_center - point) + point;
        self.ref_rot = rotation * self.ref_rot;
        self.cur_center = self.ref_center;
        self.cur_rot = self.ref_rot;
    }

    /// Map a point from the frame where the ellipsoid is a unit sphere.
    pub fn from_unit(&self, p: Vec3<f64>) -> Vec3<f64> {
        self.cur_rot * (p * self.cur_sca) + self.cur_center
    }

    /// Map a spatial point into the frame where the ellipsoid is a unit
    /// sphere.
    pub fn to_unit(&self, x: Vec3<f64>) -> Vec3<f64> {
        (self.cur_rot.transposed() * (x - self.cur_center)) / self.cur_sca
    }

    /// Current axis-aligned extents.
    pub fn extents(&self) -> Aabb<f64> {
        // Half-extent along axis i is |row_i(R S)|
        let rs = self.cur_rot * Mat3::new(
            self.cur_sca.x,
            0.0,
            0.0,
            0.0,
            self.cur_sca.y,
            0.0,
            0.0,
            0.0,
            self.cur_sca.z,
        );
        let rows = rs.transposed();
        let half = Vec3::new(
            math::col(&rows, 0).magnitude(),
            math::col(&rows, 1).magnitude(),
            math::col(&rows, 2).magnitude(),
        );

        Aabb {
            min: self.cur_center - half,
            max: self.cur_center + half,
        }
    }

    /// Extents along three given directions.
    pub fn oriented_extents(&self, directions: [Vec3<f64>; 3]) -> [(f64, f64); 3] {
        directions.map(|dir| {
            let c = dir.dot(self.cur_center);
            let r = ((self.cur_rot.transposed() * dir) * self.cur_sca).magnitude();

            (c - r, c + r)
        })
    }

    /// Whether a spatial point lies inside.
    pub fn contains(&self, point: Vec3<f64>) -> bool {
        self.to_unit(point).magnitude() <= 1.0 + math::GEOMETRIC_EPSILON
    }

    /// Distance of a spatial point to the surface; zero inside.
    ///
    /// Approximated through the unit-sphere pullback scaled by the smallest
    /// semi-axis, which is exact for spheres and conservative otherwise.
    pub fn point_distance(&self, point: Vec3<f64>) -> f64 {
        let q = self.to_unit(point).magnitude();
        if q <= 1.0 {
            return 0.0;
        }

        let closest = self.from_unit(self.to_unit(point) / q);

        (point - closest).magnitude()
    }

    /// Outward normal at a point on the surface.
    pub fn normal_at(&self, point: Vec3<f64>) -> Vec3<f64> {
        let p = self.cur_rot.transposed() * (point - self.cur_center);
        let gradient = Vec3::new(
            p.x / (self.cur_sca.x * self.cur_sca.x),
            p.y / (self.cur_sca.y * self.cur_sca.y),
            p.z / (self.cur_sca.z * self.cur_sca.z),
        );

        (self.cur_rot * gradient).normalized()
    }

    /// Support point in a spatial direction.
    pub fn support(&self, direction: Vec3<f64>) -> Vec3<f64> {
        let local = (self.cur_rot.transposed() * direction) * self.cur_sca;
        let mag = local.magnitude();
        if mag < 1e-300 {
            return self.cur_center;
        }

        self.from_unit(local / mag)
    }

    /// Partial characteristics about the global origin.
    pub fn characteristics(&self, ref_config: bool, out: &mut Characteristics) {
        let (center, sca, rot) = if ref_config {
            (self.ref_center, self.ref_sca, self.ref_rot)
        } else {
            (self.cur_center, self.cur_sca, self.cur_rot)
        };

        let volume = 4.0 / 3.0 * std::f64::consts::PI * sca.x * sca.y * sca.z;

        // Central second moments in the principal frame, then rotated out
        let principal = Mat3::new(
            sca.x * sca.x,
            0.0,
            0.0,
            0.0,
            sca.y * sca.y,
            0.0,
            0.0,
            0.0,
            sca.z * sca.z,
        ) * (volume / 5.0);

        out.volume += volume;
        out.moments += center * volume;
        out.euler += rot * principal * rot.transposed() + math::outer(center, center) * volume;
    }

    /// Refresh the current placement through a motion map.
    ///
    /// The current rotation is rebuilt from the referential one through the
    /// polar factor of the motion, never incrementally.
    pub fn update(&mut self, motion: &Motion) {
        match motion {
            Motion::Nodal(_) => debug_assert!(false, "ellipsoids move with pointwise maps"),
            _ => {
                self.cur_center = motion.map_point(self.ref_center);
                let f = motion.linear();
                let rotation = math::polar_rotation(&f);

                self.cur_rot = rotation * self.ref_rot;
                // Stretch along the rotated axes with the mean dilation left over
                let dilation = (f.determinant().abs()).cbrt();
                self.cur_sca = self.ref_sca * dilation;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use vek::Vec3;

    use crate::geom::Characteristics;

    use super::Ellipsoid;

    #[test]
    fn test_characteristics_volume() {
        let ellip = Ellipsoid::new(Vec3::zero(), Vec3::new(0.5, 0.3, 0.3), 1);

        let mut chars = Characteristics::default();
        ellip.characteristics(true, &mut chars);

        assert_relative_eq!(
            chars.volume,
            4.0 / 3.0 * std::f64::consts::PI * 0.5 * 0.3 * 0.3,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_support_on_axis() {
        let ellip = Ellipsoid::new(Vec3::zero(), Vec3::new(0.5, 0.3, 0.3), 1);

        let support = ellip.support(Vec3::unit_x());
        assert_relative_eq!(support.x, 0.5, epsilon = 1e-12);
        assert_relative_eq!(support.y, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_normal_outward() {
        let ellip = Ellipsoid::new(Vec3::zero(), Vec3::new(0.5, 0.3, 0.3), 1);

        let at = ellip.support(Vec3::unit_x());
        let normal = ellip.normal_at(at);
        assert_relative_eq!(normal.x, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_unit_round_trip() {
        let mut ellip = Ellipsoid::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.5, 0.3, 0.2), 1);
        ellip.rotate(Vec3::zero(), Vec3::unit_z(), 0.7);

        let x = Vec3::new(1.1, 2.05, 3.1);
        let back = ellip.from_unit(ellip.to_unit(x));
        assert_relative_eq!((back - x).magnitude(), 0.0, epsilon = 1e-12);
    }
}
