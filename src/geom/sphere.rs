use vek::{Aabb, Vec3};

use crate::math;

use super::{Characteristics, Motion};

/// Analytic sphere.
#[derive(Debug, Clone)]
pub struct Sphere {
    /// Referential center.
    pub ref_center: Vec3<f64>,
    /// Referential radius.
    pub ref_radius: f64,
    /// Current center.
    pub cur_center: Vec3<f64>,
    /// Current radius.
    pub cur_radius: f64,
    /// Surface identifier.
    pub surface: i32,
    /// Volume identifier.
    pub volume: i32,
}

impl Sphere {
    /// Construct a sphere; referential and current copies start out equal.
    pub fn new(center: Vec3<f64>, radius: f64, surface: i32) -> Self {
        Self {
            ref_center: center,
            ref_radius: radius,
            cur_center: center,
            cur_radius: radius,
            surface,
            volume: 0,
        }
    }

    /// Scale the radius by the first component, as spheres stay spheres.
    pub fn scale(&mut self, factor: Vec3<f64>) {
        self.ref_radius *= factor.x;
        self.ref_center *= factor.x;
        self.cur_center = self.ref_center;
        self.cur_radius = self.ref_radius;
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
        self.cur_center = self.ref_center;
    }

    /// Current axis-aligned extents.
    pub fn extents(&self) -> Aabb<f64> {
        let r = Vec3::broadcast(self.cur_radius);

        Aabb {
            min: self.cur_center - r,
            max: self.cur_center + r,
        }
    }

    /// Extents along three given directions.
    pub fn oriented_extents(&self, directions: [Vec3<f64>; 3]) -> [(f64, f64); 3] {
        directions.map(|dir| {
            let d = dir.dot(self.cur_center);
            let r = self.cur_radius * dir.magnitude();

            (d - r, d + r)
        })
    }

    /// Whether a spatial point lies inside.
    pub fn contains(&self, point: Vec3<f64>) -> bool {
        (point - self.cur_center).magnitude() <= self.cur_radius + math::GEOMETRIC_EPSILON
    }

    /// Distance of a spatial point to the surface; zero inside.
    pub fn point_distance(&self, point: Vec3<f64>) -> f64 {
        ((point - self.cur_center).magnitude() - self.cur_radius).max(0.0)
    }

    /// Outward normal at a point on the surface.
    pub fn normal_at(&self, point: Vec3<f64>) -> Vec3<f64> {
        (point - self.cur_center).normalized()
    }

    /// Partial characteristics about the global origin.
    pub fn characteristics(&self, ref_config: bool, out: &mut Characteristics) {
        let (center, radius) = if ref_config {
            (self.ref_center, self.ref_radius)
        } else {
            (self.cur_center, self.cur_radius)
        };

        let volume = 4.0 / 3.0 * std::f64::consts::PI * radius.powi(3);

        out.volume += volume;
        out.moments += center * volume;
        // Central second moment V r²/5 on the diagonal, transported to the origin
        out.euler += vek::Mat3::identity() * (volume * radius * radius / 5.0)
            + math::outer(center, center) * volume;
    }

    /// Refresh the current placement through a motion map.
    pub fn update(&mut self, motion: &Motion) {
        match motion {
            Motion::Nodal(_) => debug_assert!(false, "spheres move with pointwise maps"),
            _ => {
                self.cur_center = motion.map_point(self.ref_center);
                // Homogeneous stretch turns the radius with the mean dilation
                let f = motion.linear();
                let dilation = f.determinant().abs().cbrt();
                self.cur_radius = self.ref_radius * dilation;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use vek::Vec3;

    use crate::geom::Characteristics;

    use super::Sphere;

    #[test]
    fn test_characteristics() {
        let sphere = Sphere::new(Vec3::new(1.0, 0.0, 0.0), 0.5, 1);

        let mut chars = Characteristics::default();
        sphere.characteristics(true, &mut chars);

        assert_relative_eq!(
            chars.volume,
            4.0 / 3.0 * std::f64::consts::PI * 0.125,
            epsilon = 1e-12
        );
        assert_relative_eq!(chars.center().x, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_point_distance() {
        let sphere = Sphere::new(Vec3::zero(), 1.0, 1);

        assert_relative_eq!(sphere.point_distance(Vec3::new(3.0, 0.0, 0.0)), 2.0);
        assert_relative_eq!(sphere.point_distance(Vec3::new(0.5, 0.0, 0.0)), 0.0);
    }
}
