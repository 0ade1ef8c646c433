// Removal of offset cells that do not reach past the protected surface.

use crate::mesh::Mesh;
use crate::spatial::SurfaceSideProbe;
use crate::{Error, Result};
use log::debug;

/// Delete from `mesh` every cell none of whose vertices lies behind the
/// default surface, i.e. on the side opposite its recorded normals.
/// Returns whether at least one cell was kept.
///
/// `corner_tolerance` guards the side test against spurious deletion
/// along near-tangent corners; 0.1 is the documented default.
pub fn prune_against_default(
    mesh: &mut Mesh,
    default_mesh: &Mesh,
    corner_tolerance: f64,
) -> Result<bool> {
    let probe = SurfaceSideProbe::for_mesh(default_mesh)
        .ok_or_else(|| Error::InputInvalid("default mesh has no vertex normals".into()))?;

    let keep: Vec<bool> = mesh
        .triangles
        .iter()
        .map(|tri| {
            tri.iter().any(|&index| {
                let p = mesh.vertices[index as usize];
                p.coords.iter().all(|c| c.is_finite())
                    && probe.side_of(&p) < -corner_tolerance
            })
        })
        .collect();

    let kept = keep.iter().filter(|&&k| k).count();
    debug!(
        "default pruning kept {kept} of {} cells",
        mesh.num_cells()
    );

    mesh.retain_cells(&keep);
    Ok(kept > 0)
}
