// Tool frame construction along grinding lines.

use crate::geometry::{Point3D, Vector3D};
use nalgebra::{Matrix3, Rotation3};
use serde::{Deserialize, Serialize};

/// Six-degree-of-freedom effector pose.
///
/// The rotation columns are (x, y, z): x points forward along the line,
/// z along the surface normal toward the tool, y completes the
/// right-handed frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pose {
    pub position: Point3D,
    pub rotation: Rotation3<f64>,
}

impl Pose {
    pub fn x_axis(&self) -> Vector3D {
        self.rotation.matrix().column(0).into_owned()
    }

    pub fn y_axis(&self) -> Vector3D {
        self.rotation.matrix().column(1).into_owned()
    }

    pub fn z_axis(&self) -> Vector3D {
        self.rotation.matrix().column(2).into_owned()
    }

    /// Same orientation at a different translation.
    pub fn at_position(&self, position: Point3D) -> Pose {
        Pose {
            position,
            rotation: self.rotation,
        }
    }
}

/// Build the tool frame at `point` advancing toward `next` with surface
/// normal `normal`. Returns None when the advance vector vanishes or the
/// frame degenerates; the caller drops that pose.
pub fn frame_pose(point: &Point3D, next: &Point3D, normal: &Vector3D) -> Option<Pose> {
    let advance = next - point;
    if advance == Vector3D::zeros() {
        return None;
    }

    let z = normal.try_normalize(1e-12)?;
    // y = z x x; a non-finite or vanishing result means the advance runs
    // along the normal and no tangent frame exists.
    let y = z.cross(&advance).try_normalize(1e-12)?;
    if !y.iter().all(|c| c.is_finite()) {
        return None;
    }
    // Recompute x from the orthonormal pair so the columns are exactly
    // orthonormal even when the advance is not perfectly tangent.
    let x = y.cross(&z);

    Some(Pose {
        position: *point,
        rotation: Rotation3::from_matrix_unchecked(Matrix3::from_columns(&[x, y, z])),
    })
}
