//! Finite element meshes: tetrahedra, pyramids, wedges and hexahedra with
//! triangle or quadrilateral boundary faces.
//!
//! Mesh elements double as contact cells; each surface element is one
//! detectable geometric object of its body.

use arrayvec::ArrayVec;
use hashbrown::HashMap;
use smallvec::SmallVec;
use vek::{Aabb, Vec3};

use crate::{
    geom::{convex, gjk, tetra_characteristics, Characteristics, ConvexData, Motion, Plane},
    math,
};

/// Volumetric element kind, named by node count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// 4 nodes.
    Tetrahedron,
    /// 5 nodes, quadrilateral base.
    Pyramid,
    /// 6 nodes, triangular prism.
    Wedge,
    /// 8 nodes.
    Hexahedron,
}

impl ElementKind {
    /// Kind from a node count.
    pub fn from_nodes(count: usize) -> Option<Self> {
        match count {
            4 => Some(Self::Tetrahedron),
            5 => Some(Self::Pyramid),
            6 => Some(Self::Wedge),
            8 => Some(Self::Hexahedron),
            _ => None,
        }
    }

    /// Local node index lists of the faces.
    fn local_faces(&self) -> &'static [&'static [usize]] {
        match self {
            Self::Tetrahedron => &[&[0, 2, 1], &[0, 1, 3], &[1, 2, 3], &[2, 0, 3]],
            Self::Pyramid => &[
                &[0, 3, 2, 1],
                &[0, 1, 4],
                &[1, 2, 4],
                &[2, 3, 4],
                &[3, 0, 4],
            ],
            Self::Wedge => &[
                &[0, 2, 1],
                &[3, 4, 5],
                &[0, 1, 4, 3],
                &[1, 2, 5, 4],
                &[2, 0, 3, 5],
            ],
            Self::Hexahedron => &[
                &[0, 3, 2, 1],
                &[4, 5, 6, 7],
                &[0, 1, 5, 4],
                &[1, 2, 6, 5],
                &[2, 3, 7, 6],
                &[3, 0, 4, 7],
            ],
        }
    }
}

/// One volumetric element.
#[derive(Debug, Clone)]
pub struct Element {
    /// Element kind.
    pub kind: ElementKind,
    /// Global node indices.
    pub nodes: ArrayVec<u32, 8>,
}

/// Boundary face with its surface id.
#[derive(Debug, Clone)]
pub struct MeshFace {
    /// Global node indices, outward ordered.
    pub nodes: ArrayVec<u32, 4>,
    /// Surface identifier.
    pub surface: i32,
    /// Owning element index.
    pub element: u32,
}

/// Mesh with referential and current nodal coordinates.
#[derive(Debug, Clone)]
pub struct Mesh {
    /// Referential nodes.
    pub ref_nodes: Vec<Vec3<f64>>,
    /// Current nodes.
    pub cur_nodes: Vec<Vec3<f64>>,
    /// Elements.
    pub elements: Vec<Element>,
    /// Boundary faces.
    pub faces: Vec<MeshFace>,
    /// Volume identifier.
    pub volume: i32,
}

impl Mesh {
    /// Construct from nodes and elements, deriving the boundary faces as the
    /// element faces that appear exactly once; all of them get the given
    /// surface id.
    pub fn from_elements(nodes: Vec<Vec3<f64>>, elements: Vec<Element>, surface: i32) -> Self {
        let mut seen: HashMap<Vec<u32>, (usize, ArrayVec<u32, 4>)> = HashMap::new();

        for (index, element) in elements.iter().enumerate() {
            for local in element.kind.local_faces() {
                let nodes: ArrayVec<u32, 4> =
                    local.iter().map(|&l| element.nodes[l]).collect();
                let mut key: Vec<u32> = nodes.iter().copied().collect();
                key.sort_unstable();

                match seen.remove(&key) {
                    // Shared by two elements: internal
                    Some(_) => {}
                    None => {
                        seen.insert(key, (index, nodes));
                    }
                }
            }
        }

        let faces = seen
            .into_values()
            .map(|(element, nodes)| MeshFace {
                nodes,
                surface,
                element: element as u32,
            })
            .collect();

        let cur_nodes = nodes.clone();
        Self {
            ref_nodes: nodes,
            cur_nodes,
            elements,
            faces,
            volume: 0,
        }
    }

    /// Regular hexahedral block between two corners.
    pub fn hex_block(
        min: Vec3<f64>,
        max: Vec3<f64>,
        divisions: (usize, usize, usize),
        surface: i32,
    ) -> Self {
        let (nx, ny, nz) = divisions;
        let step = (max - min) / Vec3::new(nx as f64, ny as f64, nz as f64);

        let node = |i: usize, j: usize, k: usize| -> u32 {
            (i + j * (nx + 1) + k * (nx + 1) * (ny + 1)) as u32
        };

        let mut nodes = Vec::new();
        for k in 0..=nz {
            for j in 0..=ny {
                for i in 0..=nx {
                    nodes.push(min + step * Vec3::new(i as f64, j as f64, k as f64));
                }
            }
        }

        let mut elements = Vec::new();
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let bottom = [node(i, j, k), node(i + 1, j, k), node(i + 1, j + 1, k), node(i, j + 1, k)];
                    let top = [
                        node(i, j, k + 1),
                        node(i + 1, j, k + 1),
                        node(i + 1, j + 1, k + 1),
                        node(i, j + 1, k + 1),
                    ];
                    elements.push(Element {
                        kind: ElementKind::Hexahedron,
                        nodes: bottom.into_iter().chain(top).collect(),
                    });
                }
            }
        }

        Self::from_elements(nodes, elements, surface)
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.ref_nodes.len()
    }

    /// Current vertices of an element.
    pub fn element_vertices(&self, index: usize) -> SmallVec<[Vec3<f64>; 8]> {
        self.elements[index]
            .nodes
            .iter()
            .map(|&n| self.cur_nodes[n as usize])
            .collect()
    }

    /// Referential vertices of an element.
    pub fn element_ref_vertices(&self, index: usize) -> SmallVec<[Vec3<f64>; 8]> {
        self.elements[index]
            .nodes
            .iter()
            .map(|&n| self.ref_nodes[n as usize])
            .collect()
    }

    /// Flat vertex/plane/surface view of an element for the contact kernel;
    /// boundary faces come first and carry their surface ids.
    pub fn element_data(&self, index: usize) -> ConvexData {
        let element = &self.elements[index];
        let vertices = self.element_vertices(index);

        let mut centroid = Vec3::zero();
        for v in &vertices {
            centroid += *v;
        }
        centroid /= vertices.len() as f64;

        // Boundary faces of this element, keyed by sorted global node set
        let mut boundary: HashMap<Vec<u32>, i32> = HashMap::new();
        for face in self.faces.iter().filter(|f| f.element as usize == index) {
            let mut key: Vec<u32> = face.nodes.iter().copied().collect();
            key.sort_unstable();
            boundary.insert(key, face.surface);
        }

        let mut surface_planes: SmallVec<[(Plane, i32); 6]> = SmallVec::new();
        let mut inner_planes: SmallVec<[Plane; 6]> = SmallVec::new();

        for local in element.kind.local_faces() {
            let pts: SmallVec<[Vec3<f64>; 4]> = local
                .iter()
                .map(|&l| self.cur_nodes[element.nodes[l] as usize])
                .collect();

            let mut normal = Vec3::zero();
            let n = pts.len();
            for i in 0..n {
                let a = pts[i];
                let b = pts[(i + 1) % n];
                normal += (a - b).cross(a + b);
            }
            let mut plane = Plane {
                normal: normal.normalized(),
                point: pts[0],
            };
            // Outward from the element regardless of the table orientation
            if plane.signed_distance(centroid) > 0.0 {
                plane.normal = -plane.normal;
            }

            let mut key: Vec<u32> = local.iter().map(|&l| element.nodes[l]).collect();
            key.sort_unstable();
            match boundary.get(&key) {
                Some(&surface) => surface_planes.push((plane, surface)),
                None => inner_planes.push(plane),
            }
        }

        let nsurf = surface_planes.len();
        let mut planes: SmallVec<[Plane; 6]> = SmallVec::new();
        let mut surfaces: SmallVec<[i32; 6]> = SmallVec::new();
        for (plane, surface) in surface_planes {
            planes.push(plane);
            surfaces.push(surface);
        }
        planes.extend(inner_planes);

        ConvexData {
            vertices,
            planes,
            surfaces,
            nsurf,
        }
    }

    /// Split an element into tetrahedra over its own nodes.
    ///
    /// Fans from the first node across the outward face triangles avoiding
    /// it; every returned tetrahedron has positive referential volume.
    pub fn element_tets(&self, index: usize) -> SmallVec<[[u32; 4]; 6]> {
        let element = &self.elements[index];
        let apex = element.nodes[0];
        let mut out = SmallVec::new();

        for local in element.kind.local_faces() {
            if local.contains(&0) {
                continue;
            }

            let global: SmallVec<[u32; 4]> = local.iter().map(|&l| element.nodes[l]).collect();
            for w in global[1..].windows(2) {
                let mut tet = [apex, global[0], w[0], w[1]];

                let volume = self.ref_tet_volume(tet);
                if volume.abs() < 1e-300 {
                    continue;
                }
                if volume < 0.0 {
                    tet.swap(2, 3);
                }
                out.push(tet);
            }
        }

        out
    }

    /// Signed referential volume of a node quadruple.
    pub fn ref_tet_volume(&self, tet: [u32; 4]) -> f64 {
        let [a, b, c, d] = tet.map(|n| self.ref_nodes[n as usize]);

        (b - a).dot((c - a).cross(d - a)) / 6.0
    }

    /// Elements owning at least one boundary face, in index order; these are
    /// the detectable contact cells.
    pub fn surface_elements(&self) -> Vec<usize> {
        let mut owners: Vec<usize> = self.faces.iter().map(|f| f.element as usize).collect();
        owners.sort_unstable();
        owners.dedup();

        owners
    }

    /// Current axis-aligned extents of one element.
    pub fn element_extents(&self, index: usize) -> Aabb<f64> {
        convex::extents_of(&self.element_vertices(index))
    }

    /// Current axis-aligned extents of the whole mesh.
    pub fn extents(&self) -> Aabb<f64> {
        convex::extents_of(&self.cur_nodes)
    }

    /// Extents along three given directions.
    pub fn oriented_extents(&self, directions: [Vec3<f64>; 3]) -> [(f64, f64); 3] {
        convex::oriented_extents_of(&self.cur_nodes, directions)
    }

    /// Element containing a referential point, if any.
    pub fn element_containing_ref_point(&self, point: Vec3<f64>) -> Option<usize> {
        (0..self.elements.len()).find(|&index| {
            self.element_tets(index)
                .iter()
                .any(|&tet| self.ref_tet_barycentric(tet, point).is_some())
        })
    }

    /// Barycentric weights of a referential point inside a node quadruple.
    pub fn ref_tet_barycentric(&self, tet: [u32; 4], point: Vec3<f64>) -> Option<[f64; 4]> {
        let [a, b, c, d] = tet.map(|n| self.ref_nodes[n as usize]);
        let m = math::mat_from_cols(b - a, c - a, d - a);

        let x = math::solve(&m, point - a)?;
        let l0 = 1.0 - x.x - x.y - x.z;
        let eps = 1e-9;
        if l0 >= -eps && x.x >= -eps && x.y >= -eps && x.z >= -eps {
            Some([l0, x.x, x.y, x.z])
        } else {
            None
        }
    }

    /// Whether a spatial point lies inside any element.
    pub fn contains(&self, point: Vec3<f64>) -> bool {
        (0..self.elements.len()).any(|index| {
            self.element_data(index)
                .planes
                .iter()
                .all(|p| p.signed_distance(point) <= math::GEOMETRIC_EPSILON)
        })
    }

    /// Distance of a spatial point to the mesh; zero inside.
    pub fn point_distance(&self, point: Vec3<f64>) -> f64 {
        (0..self.elements.len())
            .map(|index| gjk::convex_point(&self.element_vertices(index), point).0)
            .fold(f64::MAX, f64::min)
    }

    /// Partial characteristics of the referential or current volume.
    pub fn characteristics(&self, ref_config: bool, out: &mut Characteristics) {
        let nodes = if ref_config {
            &self.ref_nodes
        } else {
            &self.cur_nodes
        };

        for index in 0..self.elements.len() {
            for tet in self.element_tets(index) {
                let [a, b, c, d] = tet.map(|n| nodes[n as usize]);
                tetra_characteristics(b, c, d, a, out);
            }
        }
    }

    /// Affine transforms; referential and current copies both move.
    pub fn scale(&mut self, factor: Vec3<f64>) {
        for v in &mut self.ref_nodes {
            *v *= factor;
        }
        self.cur_nodes.clone_from(&self.ref_nodes);
    }

    /// Translate; referential and current copies both move.
    pub fn translate(&mut self, vector: Vec3<f64>) {
        for v in &mut self.ref_nodes {
            *v += vector;
        }
        self.cur_nodes.clone_from(&self.ref_nodes);
    }

    /// Rotate about a point; referential and current copies both move.
    pub fn rotate(&mut self, point: Vec3<f64>, axis: Vec3<f64>, angle: f64) {
        let rotation = math::expmap(axis.normalized() * angle);

        for v in &mut self.ref_nodes {
            *v = rotation * (*v - point) + point;
        }
        self.cur_nodes.clone_from(&self.ref_nodes);
    }

    /// Refresh the current nodes through a motion map.
    pub fn update(&mut self, motion: &Motion) {
        match motion {
            Motion::Nodal(displacements) => {
                debug_assert_eq!(displacements.len(), 3 * self.ref_nodes.len());

                for (i, (cur, reference)) in self
                    .cur_nodes
                    .iter_mut()
                    .zip(&self.ref_nodes)
                    .enumerate()
                {
                    *cur = *reference
                        + Vec3::new(
                            displacements[3 * i],
                            displacements[3 * i + 1],
                            displacements[3 * i + 2],
                        );
                }
            }
            _ => {
                for (cur, reference) in self.cur_nodes.iter_mut().zip(&self.ref_nodes) {
                    *cur = motion.map_point(*reference);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use vek::Vec3;

    use crate::geom::Characteristics;

    use super::Mesh;

    #[test]
    fn test_hex_block_characteristics() {
        let mesh = Mesh::hex_block(Vec3::zero(), Vec3::one(), (2, 2, 2), 1);

        assert_eq!(mesh.elements.len(), 8);
        assert_eq!(mesh.faces.len(), 24);

        let mut chars = Characteristics::default();
        mesh.characteristics(true, &mut chars);
        assert_relative_eq!(chars.volume, 1.0, epsilon = 1e-12);
        assert_relative_eq!(chars.center().x, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_surface_elements_of_block() {
        let mesh = Mesh::hex_block(Vec3::zero(), Vec3::one(), (3, 1, 1), 1);

        // Every element of a flat block touches the boundary
        assert_eq!(mesh.surface_elements().len(), 3);
    }

    #[test]
    fn test_element_data_planes_outward() {
        let mesh = Mesh::hex_block(Vec3::zero(), Vec3::one(), (1, 1, 1), 7);
        let data = mesh.element_data(0);

        assert_eq!(data.nsurf, 6);
        assert!(data.surfaces.iter().all(|&s| s == 7));

        let center = Vec3::broadcast(0.5);
        for plane in &data.planes {
            assert!(plane.signed_distance(center) < 0.0);
        }
    }

    #[test]
    fn test_containing_element() {
        let mesh = Mesh::hex_block(Vec3::zero(), Vec3::one(), (2, 1, 1), 1);

        assert_eq!(mesh.element_containing_ref_point(Vec3::new(0.25, 0.5, 0.5)), Some(0));
        assert_eq!(mesh.element_containing_ref_point(Vec3::new(0.75, 0.5, 0.5)), Some(1));
        assert_eq!(mesh.element_containing_ref_point(Vec3::new(1.5, 0.5, 0.5)), None);
    }
}
