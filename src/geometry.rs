use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// 3D point type
pub type Point3D = Point3<f64>;

/// 3D vector type
pub type Vector3D = Vector3<f64>;

/// A surface sample: position paired with the recorded unit normal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PointNormal {
    pub position: Point3D,
    pub normal: Vector3D,
}

impl PointNormal {
    pub fn new(position: Point3D, normal: Vector3D) -> Self {
        Self { position, normal }
    }
}

/// Open run of surface samples traversed in order by the effector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Polyline {
    pub points: Vec<PointNormal>,
}

impl Polyline {
    pub fn new(points: Vec<PointNormal>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&PointNormal> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&PointNormal> {
        self.points.last()
    }

    pub fn reverse(&mut self) {
        self.points.reverse();
    }
}

/// Cutting plane defined by a point and unit normal vector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CutPlane {
    pub origin: Point3D,
    pub normal: Vector3D,
}

impl CutPlane {
    pub fn new(origin: Point3D, normal: Vector3D) -> Self {
        Self {
            origin,
            normal: normal.normalize(),
        }
    }

    /// Distance from point to plane (signed)
    pub fn signed_distance(&self, point: &Point3D) -> f64 {
        self.normal.dot(&(point - self.origin))
    }
}

/// Intersect the triangle spanned by `corners` with a plane.
/// Returns None if no intersection, or Some(segment endpoints).
///
/// Normals at the crossing points are interpolated from the corner
/// normals with the same parameter as the positions.
pub fn intersect_triangle_with_plane(
    corners: &[PointNormal; 3],
    plane: &CutPlane,
) -> Option<(PointNormal, PointNormal)> {
    let d = [
        plane.signed_distance(&corners[0].position),
        plane.signed_distance(&corners[1].position),
        plane.signed_distance(&corners[2].position),
    ];

    // Early exit if the plane does not reach the triangle
    let d_min = d[0].min(d[1]).min(d[2]);
    let d_max = d[0].max(d[1]).max(d[2]);
    if d_min > 0.0 || d_max < 0.0 {
        return None;
    }

    let mut crossings: Vec<PointNormal> = Vec::new();
    let edges = [(0usize, 1usize), (1, 2), (2, 0)];

    for (i, j) in edges {
        if let Some(point) = intersect_edge_with_plane(&corners[i], d[i], &corners[j], d[j]) {
            crossings.push(point);
        }
    }

    // Remove duplicate points
    crossings.dedup_by(|a, b| (a.position.coords - b.position.coords).norm() < 1e-10);

    if crossings.len() == 2 {
        Some((crossings[0], crossings[1]))
    } else {
        None
    }
}

/// Helper function to intersect a triangle edge with a plane, given the
/// precomputed signed distances of the endpoints.
fn intersect_edge_with_plane(
    p1: &PointNormal,
    d1: f64,
    p2: &PointNormal,
    d2: f64,
) -> Option<PointNormal> {
    if d1.abs() < 1e-10 {
        return Some(*p1);
    }
    if d2.abs() < 1e-10 {
        return Some(*p2);
    }

    // Check if both points are on the same side
    if (d1 < 0.0 && d2 < 0.0) || (d1 > 0.0 && d2 > 0.0) {
        return None;
    }

    // Linear interpolation of position and normal
    let t = d1 / (d1 - d2);
    let position = p1.position + t * (p2.position - p1.position);
    let blended = p1.normal + t * (p2.normal - p1.normal);
    let normal = blended.try_normalize(1e-12).unwrap_or(p1.normal);
    Some(PointNormal::new(position, normal))
}
