use smallvec::SmallVec;
use vek::{Aabb, Vec3};

use crate::math;

use super::{gjk, Characteristics, ConvexData, Motion, Plane};

/// Face of a convex polyhedron.
#[derive(Debug, Clone)]
pub struct ConvexFace {
    /// Vertex indices in outward counter-clockwise order.
    pub indices: SmallVec<[u32; 4]>,
    /// Surface identifier.
    pub surface: i32,
}

/// Convex polyhedron with referential and current vertex copies.
#[derive(Debug, Clone)]
pub struct Convex {
    /// Referential vertices.
    pub ref_vertices: Vec<Vec3<f64>>,
    /// Current vertices.
    pub cur_vertices: Vec<Vec3<f64>>,
    /// Outward faces.
    pub faces: Vec<ConvexFace>,
    /// Volume identifier.
    pub volume: i32,
}

impl Convex {
    /// Construct from vertices and outward faces; referential and current
    /// copies start out equal.
    pub fn new(vertices: Vec<Vec3<f64>>, faces: Vec<ConvexFace>, volume: i32) -> Self {
        let cur_vertices = vertices.clone();

        Self {
            ref_vertices: vertices,
            cur_vertices,
            faces,
            volume,
        }
    }

    /// Axis-aligned box between two corners with a single surface id on all
    /// six faces.
    pub fn cuboid(min: Vec3<f64>, max: Vec3<f64>, surface: i32) -> Self {
        let vertices = vec![
            Vec3::new(min.x, min.y, min.z),
            Vec3::new(max.x, min.y, min.z),
            Vec3::new(max.x, max.y, min.z),
            Vec3::new(min.x, max.y, min.z),
            Vec3::new(min.x, min.y, max.z),
            Vec3::new(max.x, min.y, max.z),
            Vec3::new(max.x, max.y, max.z),
            Vec3::new(min.x, max.y, max.z),
        ];

        let quads: [[u32; 4]; 6] = [
            [0, 3, 2, 1], // bottom, -z
            [4, 5, 6, 7], // top, +z
            [0, 1, 5, 4], // -y
            [2, 3, 7, 6], // +y
            [1, 2, 6, 5], // +x
            [0, 4, 7, 3], // -x
        ];
        let faces = quads
            .into_iter()
            .map(|quad| ConvexFace {
                indices: quad.into_iter().collect(),
                surface,
            })
            .collect();

        Self::new(vertices, faces, 0)
    }

    /// Current outward plane of a face (Newell normal).
    pub fn face_plane(&self, face: &ConvexFace) -> Plane {
        let mut normal = Vec3::zero();
        let n = face.indices.len();

        for i in 0..n {
            let a = self.cur_vertices[face.indices[i] as usize];
            let b = self.cur_vertices[face.indices[(i + 1) % n] as usize];
            normal += (a - b).cross(a + b);
        }

        Plane {
            normal: normal.normalized(),
            point: self.cur_vertices[face.indices[0] as usize],
        }
    }

    /// Flat vertex/plane/surface view for the contact kernel.
    pub fn data(&self) -> ConvexData {
        let planes: SmallVec<[Plane; 6]> =
            self.faces.iter().map(|face| self.face_plane(face)).collect();
        let surfaces = self.faces.iter().map(|face| face.surface).collect();
        let nsurf = self.faces.len();

        ConvexData {
            vertices: self.cur_vertices.iter().copied().collect(),
            planes,
            surfaces,
            nsurf,
        }
    }

    /// Apply an affine scale about the origin; referential and current copies
    /// both end up at the scaled placement.
    pub fn scale(&mut self, factor: Vec3<f64>) {
        for v in &mut self.ref_vertices {
            *v *= factor;
        }
        self.cur_vertices.clone_from(&self.ref_vertices);
    }

    /// Translate; referential and current copies both move.
    pub fn translate(&mut self, vector: Vec3<f64>) {
        for v in &mut self.ref_vertices {
            *v += vector;
        }
        self.cur_vertices.clone_from(&self.ref_vertices);
    }

    /// Rotate about a point; referential and current copies both move.
    pub fn rotate(&mut self, point: Vec3<f64>, axis: Vec3<f64>, angle: f64) {
        let rotation = math::expmap(axis.normalized() * angle);

        for v in &mut self.ref_vertices {
            *v = rotation * (*v - point) + point;
        }
        self.cur_vertices.clone_from(&self.ref_vertices);
    }

    /// Current axis-aligned extents.
    pub fn extents(&self) -> Aabb<f64> {
        extents_of(&self.cur_vertices)
    }

    /// Extents along three given directions, as `(min, max)` per direction.
    pub fn oriented_extents(&self, directions: [Vec3<f64>; 3]) -> [(f64, f64); 3] {
        oriented_extents_of(&self.cur_vertices, directions)
    }

    /// Whether a spatial point lies inside the current hull.
    pub fn contains(&self, point: Vec3<f64>) -> bool {
        self.faces
            .iter()
            .all(|face| self.face_plane(face).signed_distance(point) <= math::GEOMETRIC_EPSILON)
    }

    /// Distance of a spatial point to the current hull; zero inside.
    pub fn point_distance(&self, point: Vec3<f64>) -> f64 {
        gjk::convex_point(&self.cur_vertices, point).0
    }

    /// Partial characteristics of the referential (`ref_config = true`) or
    /// current volume.
    pub fn characteristics(&self, ref_config: bool, out: &mut Characteristics) {
        let vertices = if ref_config {
            &self.ref_vertices
        } else {
            &self.cur_vertices
        };

        for face in &self.faces {
            let apex = vertices[face.indices[0] as usize];
            for w in face.indices[1..].windows(2) {
                super::tetra_characteristics(
                    apex,
                    vertices[w[0] as usize],
                    vertices[w[1] as usize],
                    Vec3::zero(),
                    out,
                );
            }
        }
    }

    /// Refresh the current vertices through a motion map.
    pub fn update(&mut self, motion: &Motion) {
        match motion {
            Motion::Nodal(_) => debug_assert!(false, "convex pieces move with pointwise maps"),
            _ => {
                for (cur, reference) in self.cur_vertices.iter_mut().zip(&self.ref_vertices) {
                    *cur = motion.map_point(*reference);
                }
            }
        }
    }
}

/// Axis-aligned extents of a vertex set.
pub fn extents_of(vertices: &[Vec3<f64>]) -> Aabb<f64> {
    let mut min = Vec3::broadcast(f64::MAX);
    let mut max = Vec3::broadcast(f64::MIN);

    for v in vertices {
        min = math::vmin(min, *v);
        max = math::vmax(max, *v);
    }

    Aabb { min, max }
}

/// Extents of a vertex set along three given directions.
pub fn oriented_extents_of(vertices: &[Vec3<f64>], directions: [Vec3<f64>; 3]) -> [(f64, f64); 3] {
    let mut out = [(f64::MAX, f64::MIN); 3];

    for v in vertices {
        for (i, dir) in directions.iter().enumerate() {
            let d = dir.dot(*v);
            out[i].0 = out[i].0.min(d);
            out[i].1 = out[i].1.max(d);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use vek::Vec3;

    use crate::geom::Characteristics;

    use super::Convex;

    #[test]
    fn test_cuboid_characteristics() {
        let cube = Convex::cuboid(Vec3::new(-0.5, -0.5, 0.0), Vec3::new(0.5, 0.5, 1.0), 1);

        let mut chars = Characteristics::default();
        cube.characteristics(true, &mut chars);

        assert_relative_eq!(chars.volume, 1.0, epsilon = 1e-12);
        assert_relative_eq!(chars.center().z, 0.5, epsilon = 1e-12);
        assert_relative_eq!(chars.center().x, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cuboid_contains() {
        let cube = Convex::cuboid(Vec3::zero(), Vec3::one(), 1);

        assert!(cube.contains(Vec3::broadcast(0.5)));
        assert!(!cube.contains(Vec3::broadcast(1.5)));
    }

    #[test]
    fn test_outward_planes() {
        let cube = Convex::cuboid(Vec3::zero(), Vec3::one(), 1);
        let center = Vec3::broadcast(0.5);

        for face in &cube.faces {
            assert!(cube.face_plane(face).signed_distance(center) < 0.0);
        }
    }
}
