//! Body shapes: ordered lists of geometric primitives and the shape/geometric
//! object pairs (SGPs) the contact detector works on.

use vek::{Aabb, Vec3};

use crate::{
    collision::broad::BoxKey,
    geom::{Characteristics, Convex, ConvexData, Ellipsoid, Motion, Sphere},
    mesh::Mesh,
};

/// One geometric primitive of a shape.
#[derive(Debug, Clone)]
pub enum Primitive {
    /// Finite element mesh; every surface element is a contact cell.
    Mesh(Mesh),
    /// Convex polyhedron.
    Convex(Convex),
    /// Sphere.
    Sphere(Sphere),
    /// Ellipsoid.
    Ellipsoid(Ellipsoid),
}

/// Detectable object kind; the ordering defines the narrow phase pair code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GobjKind {
    /// Mesh element.
    Element = 0,
    /// Convex polyhedron.
    Convex = 1,
    /// Sphere.
    Sphere = 2,
    /// Ellipsoid.
    Ellipsoid = 3,
}

/// Shape/geometric-object pair: one detectable primitive within a shape.
///
/// The set of SGPs of a body is fixed for its lifetime; only the broad phase
/// box key changes as extents move.
#[derive(Debug, Clone)]
pub struct Sgp {
    /// Index of the primitive in the shape.
    pub primitive: usize,
    /// Element index for meshes, zero otherwise.
    pub gobj: usize,
    /// Object kind.
    pub kind: GobjKind,
    /// Box owned in the broad phase index.
    pub box_key: Option<BoxKey>,
}

/// Narrow phase view of one SGP.
pub enum SgpRef<'a> {
    /// Convex cell (mesh element or convex primitive).
    Convex(ConvexData),
    /// Sphere primitive.
    Sphere(&'a Sphere),
    /// Ellipsoid primitive.
    Ellipsoid(&'a Ellipsoid),
}

/// One current face of a shape carrying a surface id.
#[derive(Debug, Clone)]
pub struct SurfaceFace {
    /// Area centroid.
    pub center: Vec3<f64>,
    /// Outward unit normal.
    pub normal: Vec3<f64>,
    /// Face area.
    pub area: f64,
    /// Primitive the face belongs to.
    pub primitive: usize,
    /// Mesh node indices when the face lives on a mesh.
    pub nodes: arrayvec::ArrayVec<u32, 4>,
}

/// Ordered list of primitives.
#[derive(Debug, Clone, Default)]
pub struct Shape {
    /// The primitives.
    pub primitives: Vec<Primitive>,
}

impl Shape {
    /// Shape made of a single primitive.
    pub fn single(primitive: Primitive) -> Self {
        Self {
            primitives: vec![primitive],
        }
    }

    /// Glue another primitive onto the shape.
    pub fn push(&mut self, primitive: Primitive) {
        self.primitives.push(primitive);
    }

    /// Enumerate the SGPs.
    pub fn sgps(&self) -> Vec<Sgp> {
        let mut out = Vec::new();

        for (index, primitive) in self.primitives.iter().enumerate() {
            match primitive {
                Primitive::Mesh(mesh) => {
                    for element in mesh.surface_elements() {
                        out.push(Sgp {
                            primitive: index,
                            gobj: element,
                            kind: GobjKind::Element,
                            box_key: None,
                        });
                    }
                }
                Primitive::Convex(_) => out.push(Sgp {
                    primitive: index,
                    gobj: 0,
                    kind: GobjKind::Convex,
                    box_key: None,
                }),
                Primitive::Sphere(_) => out.push(Sgp {
                    primitive: index,
                    gobj: 0,
                    kind: GobjKind::Sphere,
                    box_key: None,
                }),
                Primitive::Ellipsoid(_) => out.push(Sgp {
                    primitive: index,
                    gobj: 0,
                    kind: GobjKind::Ellipsoid,
                    box_key: None,
                }),
            }
        }

        out
    }

    /// Narrow phase view of one SGP.
    pub fn sgp_ref(&self, sgp: &Sgp) -> SgpRef {
        match &self.primitives[sgp.primitive] {
            Primitive::Mesh(mesh) => SgpRef::Convex(mesh.element_data(sgp.gobj)),
            Primitive::Convex(convex) => SgpRef::Convex(convex.data()),
            Primitive::Sphere(sphere) => SgpRef::Sphere(sphere),
            Primitive::Ellipsoid(ellipsoid) => SgpRef::Ellipsoid(ellipsoid),
        }
    }

    /// Current extents of one SGP.
    pub fn sgp_extents(&self, sgp: &Sgp) -> Aabb<f64> {
        match &self.primitives[sgp.primitive] {
            Primitive::Mesh(mesh) => mesh.element_extents(sgp.gobj),
            Primitive::Convex(convex) => convex.extents(),
            Primitive::Sphere(sphere) => sphere.extents(),
            Primitive::Ellipsoid(ellipsoid) => ellipsoid.extents(),
        }
    }

    /// Current extents of the whole shape.
    pub fn extents(&self) -> Aabb<f64> {
        let mut out: Option<Aabb<f64>> = None;

        for primitive in &self.primitives {
            let e = match primitive {
                Primitive::Mesh(mesh) => mesh.extents(),
                Primitive::Convex(convex) => convex.extents(),
                Primitive::Sphere(sphere) => sphere.extents(),
                Primitive::Ellipsoid(ellipsoid) => ellipsoid.extents(),
            };
            out = Some(match out {
                Some(acc) => Aabb {
                    min: crate::math::vmin(acc.min, e.min),
                    max: crate::math::vmax(acc.max, e.max),
                },
                None => e,
            });
        }

        out.unwrap_or(Aabb {
            min: Vec3::zero(),
            max: Vec3::zero(),
        })
    }

    /// Extents along three given directions, merged over the primitives.
    pub fn oriented_extents(&self, directions: [Vec3<f64>; 3]) -> [(f64, f64); 3] {
        let mut out = [(f64::MAX, f64::MIN); 3];

        for primitive in &self.primitives {
            let e = match primitive {
                Primitive::Mesh(mesh) => mesh.oriented_extents(directions),
                Primitive::Convex(convex) => convex.oriented_extents(directions),
                Primitive::Sphere(sphere) => sphere.oriented_extents(directions),
                Primitive::Ellipsoid(ellipsoid) => ellipsoid.oriented_extents(directions),
            };
            for i in 0..3 {
                out[i].0 = out[i].0.min(e[i].0);
                out[i].1 = out[i].1.max(e[i].1);
            }
        }

        out
    }

    /// Referential or current characteristics summed over the primitives.
    pub fn characteristics(&self, ref_config: bool) -> Characteristics {
        let mut out = Characteristics::default();

        for primitive in &self.primitives {
            match primitive {
                Primitive::Mesh(mesh) => mesh.characteristics(ref_config, &mut out),
                Primitive::Convex(convex) => convex.characteristics(ref_config, &mut out),
                Primitive::Sphere(sphere) => sphere.characteristics(ref_config, &mut out),
                Primitive::Ellipsoid(ellipsoid) => ellipsoid.characteristics(ref_config, &mut out),
            }
        }

        out
    }

    /// Whether a spatial point lies inside any primitive.
    pub fn contains(&self, point: Vec3<f64>) -> bool {
        self.primitives.iter().any(|primitive| match primitive {
            Primitive::Mesh(mesh) => mesh.contains(point),
            Primitive::Convex(convex) => convex.contains(point),
            Primitive::Sphere(sphere) => sphere.contains(point),
            Primitive::Ellipsoid(ellipsoid) => ellipsoid.contains(point),
        })
    }

    /// Distance of a spatial point to the shape; zero inside.
    pub fn point_distance(&self, point: Vec3<f64>) -> f64 {
        self.primitives
            .iter()
            .map(|primitive| match primitive {
                Primitive::Mesh(mesh) => mesh.point_distance(point),
                Primitive::Convex(convex) => convex.point_distance(point),
                Primitive::Sphere(sphere) => sphere.point_distance(point),
                Primitive::Ellipsoid(ellipsoid) => ellipsoid.point_distance(point),
            })
            .fold(f64::MAX, f64::min)
    }

    /// Affine scale; referential and current copies of each primitive move.
    pub fn scale(&mut self, factor: Vec3<f64>) {
        for primitive in &mut self.primitives {
            match primitive {
                Primitive::Mesh(mesh) => mesh.scale(factor),
                Primitive::Convex(convex) => convex.scale(factor),
                Primitive::Sphere(sphere) => sphere.scale(factor),
                Primitive::Ellipsoid(ellipsoid) => ellipsoid.scale(factor),
            }
        }
    }

    /// Translate; referential and current copies of each primitive move.
    pub fn translate(&mut self, vector: Vec3<f64>) {
        for primitive in &mut self.primitives {
            match primitive {
                Primitive::Mesh(mesh) => mesh.translate(vector),
                Primitive::Convex(convex) => convex.translate(vector),
                Primitive::Sphere(sphere) => sphere.translate(vector),
                Primitive::Ellipsoid(ellipsoid) => ellipsoid.translate(vector),
            }
        }
    }

    /// Rotate about a point; referential and current copies of each primitive
    /// move.
    pub fn rotate(&mut self, point: Vec3<f64>, axis: Vec3<f64>, angle: f64) {
        for primitive in &mut self.primitives {
            match primitive {
                Primitive::Mesh(mesh) => mesh.rotate(point, axis, angle),
                Primitive::Convex(convex) => convex.rotate(point, axis, angle),
                Primitive::Sphere(sphere) => sphere.rotate(point, axis, angle),
                Primitive::Ellipsoid(ellipsoid) => ellipsoid.rotate(point, axis, angle),
            }
        }
    }

    /// Refresh the current copies through a motion map.
    pub fn update(&mut self, motion: &Motion) {
        for primitive in &mut self.primitives {
            match primitive {
                Primitive::Mesh(mesh) => mesh.update(motion),
                Primitive::Convex(convex) => convex.update(motion),
                Primitive::Sphere(sphere) => sphere.update(motion),
                Primitive::Ellipsoid(ellipsoid) => ellipsoid.update(motion),
            }
        }
    }

    /// Current faces carrying a given surface id, for pressure loading.
    pub fn surface_faces(&self, surface: i32) -> Vec<SurfaceFace> {
        let mut out = Vec::new();

        for (index, primitive) in self.primitives.iter().enumerate() {
            match primitive {
                Primitive::Convex(convex) => {
                    for face in convex.faces.iter().filter(|f| f.surface == surface) {
                        let plane = convex.face_plane(face);
                        let mut center = Vec3::zero();
                        let mut area = 0.0;
                        let first = convex.cur_vertices[face.indices[0] as usize];
                        for w in face.indices[1..].windows(2) {
                            let b = convex.cur_vertices[w[0] as usize];
                            let c = convex.cur_vertices[w[1] as usize];
                            let a = crate::math::triangle_area(first, b, c);
                            center += (first + b + c) / 3.0 * a;
                            area += a;
                        }
                        if area > 0.0 {
                            out.push(SurfaceFace {
                                center: center / area,
                                normal: plane.normal,
                                area,
                                primitive: index,
                                nodes: Default::default(),
                            });
                        }
                    }
                }
                Primitive::Mesh(mesh) => {
                    for face in mesh.faces.iter().filter(|f| f.surface == surface) {
                        let pts: Vec<Vec3<f64>> = face
                            .nodes
                            .iter()
                            .map(|&n| mesh.cur_nodes[n as usize])
                            .collect();
                        let mut normal = Vec3::zero();
                        let n = pts.len();
                        for i in 0..n {
                            let a = pts[i];
                            let b = pts[(i + 1) % n];
                            normal += (a - b).cross(a + b);
                        }
                        let area = 0.5 * normal.magnitude();
                        if area > 0.0 {
                            let mut center = Vec3::zero();
                            for p in &pts {
                                center += *p;
                            }
                            center /= n as f64;
                            let mut normal = normal.normalized();

                            // Outward with respect to the owning element
                            let vertices = mesh.element_vertices(face.element as usize);
                            let mut centroid = Vec3::zero();
                            for v in &vertices {
                                centroid += *v;
                            }
                            centroid /= vertices.len() as f64;
                            if normal.dot(center - centroid) < 0.0 {
                                normal = -normal;
                            }

                            out.push(SurfaceFace {
                                center,
                                normal,
                                area,
                                primitive: index,
                                nodes: face.nodes.clone(),
                            });
                        }
                    }
                }
                _ => {}
            }
        }

        out
    }

    /// The mesh primitive, when the shape is a single mesh (the usual finite
    /// element layout).
    pub fn as_mesh(&self) -> Option<&Mesh> {
        match self.primitives.as_slice() {
            [Primitive::Mesh(mesh)] => Some(mesh),
            _ => None,
        }
    }

    /// Mutable access to the single mesh primitive.
    pub fn as_mesh_mut(&mut self) -> Option<&mut Mesh> {
        match self.primitives.as_mut_slice() {
            [Primitive::Mesh(mesh)] => Some(mesh),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use vek::Vec3;

    use crate::geom::{Convex, Sphere};
    use crate::mesh::Mesh;

    use super::{GobjKind, Primitive, Shape};

    #[test]
    fn test_sgps_of_mixed_shape() {
        let mut shape = Shape::single(Primitive::Convex(Convex::cuboid(
            Vec3::zero(),
            Vec3::one(),
            1,
        )));
        shape.push(Primitive::Sphere(Sphere::new(Vec3::broadcast(2.0), 0.5, 2)));

        let sgps = shape.sgps();
        assert_eq!(sgps.len(), 2);
        assert_eq!(sgps[0].kind, GobjKind::Convex);
        assert_eq!(sgps[1].kind, GobjKind::Sphere);
    }

    #[test]
    fn test_sgps_of_mesh() {
        let shape = Shape::single(Primitive::Mesh(Mesh::hex_block(
            Vec3::zero(),
            Vec3::one(),
            (2, 1, 1),
            1,
        )));

        assert_eq!(shape.sgps().len(), 2);
    }

    #[test]
    fn test_characteristics_sum() {
        let mut shape = Shape::single(Primitive::Convex(Convex::cuboid(
            Vec3::zero(),
            Vec3::one(),
            1,
        )));
        shape.push(Primitive::Convex(Convex::cuboid(
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(2.0, 1.0, 1.0),
            1,
        )));

        let chars = shape.characteristics(true);
        assert_relative_eq!(chars.volume, 2.0, epsilon = 1e-12);
        assert_relative_eq!(chars.center().x, 1.0, epsilon = 1e-12);
    }
}
