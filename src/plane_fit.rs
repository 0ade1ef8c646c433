// Dominant-plane estimation for the input surface.

use crate::geometry::{Point3D, Vector3D};
use crate::mesh::Mesh;
use nalgebra::Matrix3;

/// Unit normal of the dominant plane through the mesh vertex cloud.
///
/// Covariance fit: the eigenvector of the smallest eigenvalue of the
/// vertex scatter matrix. Deterministic, and sufficient for deriving the
/// sweep direction; any estimator returning a unit normal works here.
pub fn dominant_plane_normal(mesh: &Mesh) -> Option<Vector3D> {
    let vertices = &mesh.vertices;
    if vertices.len() < 3 {
        return None;
    }

    let centroid: Vector3D =
        vertices.iter().map(|v| v.coords).sum::<Vector3D>() / vertices.len() as f64;

    let mut scatter = Matrix3::zeros();
    for vertex in vertices {
        let d = vertex.coords - centroid;
        scatter += d * d.transpose();
    }

    let eigen = scatter.symmetric_eigen();
    let mut smallest = 0;
    for i in 1..3 {
        if eigen.eigenvalues[i] < eigen.eigenvalues[smallest] {
            smallest = i;
        }
    }

    let normal = eigen.eigenvectors.column(smallest).into_owned();
    normal.try_normalize(1e-12)
}
