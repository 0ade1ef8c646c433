use crate::geometry::{Point3D, PointNormal, Vector3D};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("Failed to load mesh: {0}")]
    LoadError(String),

    #[error("Failed to save mesh: {0}")]
    SaveError(String),

    #[error("Invalid mesh format")]
    InvalidFormat,

    #[error("Empty mesh")]
    EmptyMesh,

    #[error("Cell {cell} references vertex {index} but mesh has {count} vertices")]
    IndexOutOfRange {
        cell: usize,
        index: u32,
        count: usize,
    },
}

/// Indexed triangular surface mesh.
///
/// Vertices and per-vertex normals are shared between cells. Deleting
/// cells compacts the triangle list only; the vertex buffer is left
/// untouched, so vertex indices stay valid across pruning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mesh {
    pub vertices: Vec<Point3D>,
    pub triangles: Vec<[u32; 3]>,
    pub vertex_normals: Option<Vec<Vector3D>>,
    pub face_normals: Option<Vec<Vector3D>>,
    pub bounds_min: Point3D,
    pub bounds_max: Point3D,
}

impl Mesh {
    /// Create a new mesh, validating cell indices.
    pub fn new(vertices: Vec<Point3D>, triangles: Vec<[u32; 3]>) -> Result<Self, MeshError> {
        if vertices.is_empty() || triangles.is_empty() {
            return Err(MeshError::EmptyMesh);
        }
        for (cell, tri) in triangles.iter().enumerate() {
            for &index in tri {
                if index as usize >= vertices.len() {
                    return Err(MeshError::IndexOutOfRange {
                        cell,
                        index,
                        count: vertices.len(),
                    });
                }
            }
        }

        let (bounds_min, bounds_max) = Self::compute_bounds(&vertices);

        Ok(Self {
            vertices,
            triangles,
            vertex_normals: None,
            face_normals: None,
            bounds_min,
            bounds_max,
        })
    }

    /// Compute bounding box of a vertex set
    fn compute_bounds(vertices: &[Point3D]) -> (Point3D, Point3D) {
        let mut min = Point3D::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
        let mut max = Point3D::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);

        for vertex in vertices {
            min.x = min.x.min(vertex.x);
            min.y = min.y.min(vertex.y);
            min.z = min.z.min(vertex.z);

            max.x = max.x.max(vertex.x);
            max.y = max.y.max(vertex.y);
            max.z = max.z.max(vertex.z);
        }

        (min, max)
    }

    /// Corner positions of a cell.
    pub fn corners(&self, cell: usize) -> [Point3D; 3] {
        let [a, b, c] = self.triangles[cell];
        [
            self.vertices[a as usize],
            self.vertices[b as usize],
            self.vertices[c as usize],
        ]
    }

    /// Corner positions and recorded normals of a cell.
    /// Falls back to the geometric face normal when vertex normals are absent.
    pub fn corner_samples(&self, cell: usize) -> [PointNormal; 3] {
        let [a, b, c] = self.triangles[cell];
        let fallback = self.geometric_face_normal(cell);
        let normal_of = |i: u32| {
            self.vertex_normals
                .as_ref()
                .map(|normals| normals[i as usize])
                .unwrap_or(fallback)
        };
        [
            PointNormal::new(self.vertices[a as usize], normal_of(a)),
            PointNormal::new(self.vertices[b as usize], normal_of(b)),
            PointNormal::new(self.vertices[c as usize], normal_of(c)),
        ]
    }

    /// Parametric centre of a cell.
    pub fn cell_center(&self, cell: usize) -> Point3D {
        let [a, b, c] = self.corners(cell);
        Point3D::from((a.coords + b.coords + c.coords) / 3.0)
    }

    /// Geometric normal of a cell from its winding.
    /// Returns a unit normal, or (0, 0, 1) for degenerate cells.
    pub fn geometric_face_normal(&self, cell: usize) -> Vector3D {
        let [a, b, c] = self.corners(cell);
        let cross = (b - a).cross(&(c - a));
        let norm = cross.norm();

        if norm < 1e-10 || !norm.is_finite() {
            return Vector3D::new(0.0, 0.0, 1.0);
        }

        cross / norm
    }

    /// Generate per-cell normals from winding.
    pub fn generate_face_normals(&mut self) {
        let normals = (0..self.triangles.len())
            .map(|cell| self.geometric_face_normal(cell))
            .collect();
        self.face_normals = Some(normals);
    }

    /// Generate per-vertex normals as the area-weighted average of the
    /// windings of incident cells.
    pub fn generate_vertex_normals(&mut self) {
        let mut sums = vec![Vector3D::zeros(); self.vertices.len()];

        for tri in &self.triangles {
            let a = self.vertices[tri[0] as usize];
            let b = self.vertices[tri[1] as usize];
            let c = self.vertices[tri[2] as usize];
            // Cross product magnitude carries the area weighting
            let weighted = (b - a).cross(&(c - a));
            for &index in tri {
                sums[index as usize] += weighted;
            }
        }

        let normals = sums
            .into_iter()
            .map(|sum| {
                sum.try_normalize(1e-12)
                    .unwrap_or_else(|| Vector3D::new(0.0, 0.0, 1.0))
            })
            .collect();
        self.vertex_normals = Some(normals);
    }

    /// Generate vertex normals only when none are recorded.
    pub fn ensure_vertex_normals(&mut self) {
        if self.vertex_normals.is_none() {
            self.generate_vertex_normals();
        }
    }

    /// Drop every cell whose `keep` flag is false. Face normals are
    /// compacted alongside; vertices and bounds are left untouched.
    pub fn retain_cells(&mut self, keep: &[bool]) {
        debug_assert_eq!(keep.len(), self.triangles.len());

        let mut index = 0;
        self.triangles.retain(|_| {
            let kept = keep[index];
            index += 1;
            kept
        });

        if let Some(normals) = self.face_normals.as_mut() {
            let mut index = 0;
            normals.retain(|_| {
                let kept = keep[index];
                index += 1;
                kept
            });
        }
    }

    /// True when every vertex coordinate is finite.
    pub fn has_finite_vertices(&self) -> bool {
        self.vertices
            .iter()
            .all(|v| v.coords.iter().all(|c| c.is_finite()))
    }

    /// Get mesh dimensions
    pub fn dimensions(&self) -> Vector3D {
        self.bounds_max - self.bounds_min
    }

    /// Longest side of the bounding box.
    pub fn max_side_length(&self) -> f64 {
        let extent = self.dimensions();
        extent.x.max(extent.y).max(extent.z)
    }

    /// Centre of the bounding box.
    pub fn center(&self) -> Point3D {
        Point3D::from((self.bounds_min.coords + self.bounds_max.coords) / 2.0)
    }

    /// Number of cells in the mesh
    pub fn num_cells(&self) -> usize {
        self.triangles.len()
    }

    /// Number of vertices in the mesh
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }
}
