// Nearest-vertex queries shared by the dilation and pruning stages.

use crate::geometry::{Point3D, Vector3D};
use crate::mesh::Mesh;

/// Static KD-tree over a set of vertex positions.
pub struct VertexTree {
    points: Vec<Point3D>,
    nodes: Vec<Node>,
    root: i32,
}

struct Node {
    point: u32,
    axis: u8,
    left: i32,
    right: i32,
}

impl VertexTree {
    /// Build a balanced tree by median splits.
    pub fn build(points: &[Point3D]) -> Self {
        let mut tree = Self {
            points: points.to_vec(),
            nodes: Vec::with_capacity(points.len()),
            root: -1,
        };
        let mut ids: Vec<u32> = (0..points.len() as u32).collect();
        tree.root = tree.build_recursive(&mut ids, 0);
        tree
    }

    fn build_recursive(&mut self, ids: &mut [u32], depth: usize) -> i32 {
        if ids.is_empty() {
            return -1;
        }
        let axis = (depth % 3) as u8;
        let median = ids.len() / 2;
        ids.select_nth_unstable_by(median, |&a, &b| {
            let ca = self.points[a as usize][axis as usize];
            let cb = self.points[b as usize][axis as usize];
            ca.partial_cmp(&cb).unwrap_or(std::cmp::Ordering::Equal)
        });

        let point = ids[median];
        let node_index = self.nodes.len() as i32;
        self.nodes.push(Node {
            point,
            axis,
            left: -1,
            right: -1,
        });

        // Split the slice so the recursion borrows do not overlap the node list
        let (lower, rest) = ids.split_at_mut(median);
        let upper = &mut rest[1..];
        let left = self.build_recursive(lower, depth + 1);
        let right = self.build_recursive(upper, depth + 1);
        self.nodes[node_index as usize].left = left;
        self.nodes[node_index as usize].right = right;
        node_index
    }

    /// Index and squared distance of the vertex closest to `query`.
    pub fn nearest(&self, query: &Point3D) -> (usize, f64) {
        let mut best = (0usize, f64::MAX);
        self.search(self.root, query, &mut best);
        best
    }

    fn search(&self, node_index: i32, query: &Point3D, best: &mut (usize, f64)) {
        if node_index < 0 {
            return;
        }
        let node = &self.nodes[node_index as usize];
        let point = &self.points[node.point as usize];

        let dist_sq = (point - query).norm_squared();
        if dist_sq < best.1 {
            *best = (node.point as usize, dist_sq);
        }

        let axis = node.axis as usize;
        let delta = query[axis] - point[axis];
        let (near, far) = if delta < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };

        self.search(near, query, best);
        // The far side can only matter when the splitting plane is closer
        // than the best match found so far.
        if delta * delta < best.1 {
            self.search(far, query, best);
        }
    }

    pub fn point(&self, index: usize) -> &Point3D {
        &self.points[index]
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Signed-side probe against a reference surface.
///
/// For a query point the probe finds the nearest reference vertex and
/// reports the dot product of that vertex's recorded normal with the unit
/// vector from the vertex to the query: positive when the query lies on
/// the side the recorded normals point to.
pub struct SurfaceSideProbe {
    tree: VertexTree,
    normals: Vec<Vector3D>,
}

impl SurfaceSideProbe {
    /// Build a probe over a mesh. Returns None when the mesh carries no
    /// recorded vertex normals.
    pub fn for_mesh(mesh: &Mesh) -> Option<Self> {
        let normals = mesh.vertex_normals.as_ref()?.clone();
        Some(Self {
            tree: VertexTree::build(&mesh.vertices),
            normals,
        })
    }

    /// Signed side of `query`, in [-1, 1]. Zero for a query coincident
    /// with its nearest reference vertex.
    pub fn side_of(&self, query: &Point3D) -> f64 {
        let (index, _) = self.tree.nearest(query);
        let offset = query - self.tree.point(index);
        match offset.try_normalize(1e-12) {
            Some(direction) => self.normals[index].dot(&direction),
            None => 0.0,
        }
    }
}
