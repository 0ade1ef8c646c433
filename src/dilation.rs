// Offset-shell generation by implicit distance sampling.
//
// Dilating a surface is a volumetric operation: sampling an unsigned
// distance field around the mesh and extracting the isosurface at the
// requested depth yields a shell with two halves, one on each side of the
// source. The half on the recorded-normal side is kept; the other half
// doubles back under the source and is pruned with a nearest-vertex side
// test. High depths can punch holes in the retained shell; the slicing
// retry loop downstream compensates.

use crate::geometry::{Point3D, Vector3D};
use crate::mesh::Mesh;
use crate::spatial::SurfaceSideProbe;
use crate::{Error, Result};
use log::{debug, info};
use rayon::prelude::*;
use std::collections::HashMap;

/// Samples per axis of the distance grid.
const GRID_DIM: usize = 50;

/// Dilate `mesh` by `depth`, keeping the half-shell on the side the
/// recorded vertex normals point to.
pub fn dilate(mesh: &Mesh, depth: f64) -> Result<Mesh> {
    let probe = SurfaceSideProbe::for_mesh(mesh)
        .ok_or_else(|| Error::InputInvalid("source mesh has no vertex normals".into()))?;

    let side = mesh.max_side_length();
    if !(depth > 0.0) || side <= 0.0 {
        return Err(Error::InputInvalid(format!(
            "dilation depth {depth} invalid for mesh extent {side}"
        )));
    }
    // Saturation distance: beyond it the field is capped, bounding cost
    // and smoothing the far field.
    let threshold = depth / side;
    let cap = side * (2.0 * threshold).min(1.0);
    if depth >= cap {
        return Err(Error::OffsetDegenerate { depth });
    }

    let grid = DistanceGrid::sample(mesh, depth, cap);
    let mut shell = grid.extract_isosurface(depth)?;

    // Half-shell pruning: keep cells whose centre lies on the recorded
    // normal side of the nearest source vertex.
    let keep: Vec<bool> = (0..shell.num_cells())
        .map(|cell| {
            let center = shell.cell_center(cell);
            center.coords.iter().all(|c| c.is_finite()) && probe.side_of(&center) > 0.0
        })
        .collect();
    shell.retain_cells(&keep);

    if shell.num_cells() == 0 {
        return Err(Error::OffsetDegenerate { depth });
    }
    shell.generate_vertex_normals();

    debug!(
        "dilation at {:.4}: {} cells retained of {}",
        depth,
        shell.num_cells(),
        keep.len()
    );
    Ok(shell)
}

// ============================================================================
// Distance grid
// ============================================================================

struct DistanceGrid {
    /// Unsigned distances at grid vertices, saturated at the cap.
    values: Vec<f64>,
    nx: usize,
    ny: usize,
    nz: usize,
    origin: Point3D,
    spacing: Vector3D,
}

impl DistanceGrid {
    fn get(&self, ix: usize, iy: usize, iz: usize) -> f64 {
        self.values[ix + iy * self.nx + iz * self.nx * self.ny]
    }

    fn grid_point(&self, ix: usize, iy: usize, iz: usize) -> Point3D {
        Point3D::new(
            self.origin.x + ix as f64 * self.spacing.x,
            self.origin.y + iy as f64 * self.spacing.y,
            self.origin.z + iz as f64 * self.spacing.z,
        )
    }

    /// Sample the unsigned distance field on a regular grid over the mesh
    /// bounds enlarged by `depth` on every axis. Distance computation is
    /// per grid vertex against the nearest mesh cell.
    fn sample(mesh: &Mesh, depth: f64, cap: f64) -> Self {
        let origin = Point3D::from(mesh.bounds_min.coords.add_scalar(-depth));
        let top = Point3D::from(mesh.bounds_max.coords.add_scalar(depth));
        let (nx, ny, nz) = (GRID_DIM, GRID_DIM, GRID_DIM);
        let spacing = Vector3D::new(
            (top.x - origin.x) / (nx - 1) as f64,
            (top.y - origin.y) / (ny - 1) as f64,
            (top.z - origin.z) / (nz - 1) as f64,
        );

        let tris: Vec<[Point3D; 3]> = (0..mesh.num_cells()).map(|cell| mesh.corners(cell)).collect();

        // Spatial hash over triangle AABBs. Bins are cap-sized, so a
        // 3x3x3 neighbourhood of the query bin covers every triangle
        // within the saturation distance.
        let inv_bin = 1.0 / cap;
        let mut bins: HashMap<(i32, i32, i32), Vec<usize>> = HashMap::new();
        for (ti, tri) in tris.iter().enumerate() {
            let mut tmin = tri[0];
            let mut tmax = tri[0];
            for v in &tri[1..] {
                tmin.x = tmin.x.min(v.x);
                tmin.y = tmin.y.min(v.y);
                tmin.z = tmin.z.min(v.z);
                tmax.x = tmax.x.max(v.x);
                tmax.y = tmax.y.max(v.y);
                tmax.z = tmax.z.max(v.z);
            }
            let lo = bin_index(&tmin, &origin, inv_bin);
            let hi = bin_index(&tmax, &origin, inv_bin);
            for bx in lo.0..=hi.0 {
                for by in lo.1..=hi.1 {
                    for bz in lo.2..=hi.2 {
                        bins.entry((bx, by, bz)).or_default().push(ti);
                    }
                }
            }
        }

        let mut values = vec![cap; nx * ny * nz];
        values
            .par_chunks_mut(nx * ny)
            .enumerate()
            .for_each(|(iz, slab)| {
                for iy in 0..ny {
                    for ix in 0..nx {
                        let p = Point3D::new(
                            origin.x + ix as f64 * spacing.x,
                            origin.y + iy as f64 * spacing.y,
                            origin.z + iz as f64 * spacing.z,
                        );
                        let (bx, by, bz) = bin_index(&p, &origin, inv_bin);

                        let mut best_sq = cap * cap;
                        for dbx in -1..=1 {
                            for dby in -1..=1 {
                                for dbz in -1..=1 {
                                    let Some(list) = bins.get(&(bx + dbx, by + dby, bz + dbz))
                                    else {
                                        continue;
                                    };
                                    for &ti in list {
                                        let tri = &tris[ti];
                                        let cp =
                                            closest_point_on_tri(&p, &tri[0], &tri[1], &tri[2]);
                                        let d2 = (cp - p).norm_squared();
                                        if d2 < best_sq {
                                            best_sq = d2;
                                        }
                                    }
                                }
                            }
                        }
                        slab[ix + iy * nx] = best_sq.sqrt().min(cap);
                    }
                }
            });

        // Cap the grid boundary so the isosurface closes instead of
        // leaking out of the sampled volume.
        for iz in 0..nz {
            for iy in 0..ny {
                for ix in 0..nx {
                    if ix == 0 || iy == 0 || iz == 0 || ix == nx - 1 || iy == ny - 1 || iz == nz - 1
                    {
                        values[ix + iy * nx + iz * nx * ny] = cap;
                    }
                }
            }
        }

        info!(
            "distance grid {}x{}x{} sampled over {} cells, cap {:.4}",
            nx,
            ny,
            nz,
            tris.len(),
            cap
        );

        DistanceGrid {
            values,
            nx,
            ny,
            nz,
            origin,
            spacing,
        }
    }

    /// Extract the isosurface at `iso` with Naive Surface Nets. Each grid
    /// cell straddling the level set contributes a vertex at the average
    /// of its edge crossings; crossed grid edges stitch the cell vertices
    /// into quads. Windings are oriented toward decreasing field values,
    /// so generated normals point back at the source surface.
    fn extract_isosurface(&self, iso: f64) -> Result<Mesh> {
        let ncx = self.nx - 1;
        let ncy = self.ny - 1;
        let ncz = self.nz - 1;

        // Phase 1: cell vertices
        let mut cell_verts: HashMap<(usize, usize, usize), u32> = HashMap::new();
        let mut vertices: Vec<Point3D> = Vec::new();

        let corners: [(usize, usize, usize); 8] = [
            (0, 0, 0),
            (1, 0, 0),
            (1, 1, 0),
            (0, 1, 0),
            (0, 0, 1),
            (1, 0, 1),
            (1, 1, 1),
            (0, 1, 1),
        ];
        let edges: [(usize, usize); 12] = [
            (0, 1),
            (1, 2),
            (2, 3),
            (3, 0), // bottom
            (4, 5),
            (5, 6),
            (6, 7),
            (7, 4), // top
            (0, 4),
            (1, 5),
            (2, 6),
            (3, 7), // vertical
        ];

        for cz in 0..ncz {
            for cy in 0..ncy {
                for cx in 0..ncx {
                    let vals: [f64; 8] = std::array::from_fn(|i| {
                        let (dx, dy, dz) = corners[i];
                        self.get(cx + dx, cy + dy, cz + dz)
                    });

                    let above = vals.iter().filter(|&&v| v > iso).count();
                    if above == 0 || above == 8 {
                        continue;
                    }

                    let mut avg = Vector3D::zeros();
                    let mut count = 0;
                    for &(i, j) in &edges {
                        if (vals[i] > iso) != (vals[j] > iso) {
                            let t = (iso - vals[i]) / (vals[j] - vals[i]);
                            let (di, dj) = (corners[i], corners[j]);
                            let pi = self.grid_point(cx + di.0, cy + di.1, cz + di.2);
                            let pj = self.grid_point(cx + dj.0, cy + dj.1, cz + dj.2);
                            avg += pi.coords * (1.0 - t) + pj.coords * t;
                            count += 1;
                        }
                    }

                    if count > 0 {
                        cell_verts.insert((cx, cy, cz), vertices.len() as u32);
                        vertices.push(Point3D::from(avg / count as f64));
                    }
                }
            }
        }

        // Phase 2: quads for each crossed grid edge
        let mut triangles: Vec<[u32; 3]> = Vec::new();
        let mut emit = |a: u32, b: u32, c: u32, d: u32, flip: bool| {
            if flip {
                triangles.push([a, c, b]);
                triangles.push([a, d, c]);
            } else {
                triangles.push([a, b, c]);
                triangles.push([a, c, d]);
            }
        };

        // X-aligned edges, shared by four cells in the (y, z) ring
        for iz in 1..self.nz - 1 {
            for iy in 1..self.ny - 1 {
                for ix in 0..self.nx - 1 {
                    let v0 = self.get(ix, iy, iz);
                    let v1 = self.get(ix + 1, iy, iz);
                    if (v0 > iso) == (v1 > iso) {
                        continue;
                    }
                    if let (Some(&a), Some(&b), Some(&c), Some(&d)) = (
                        cell_verts.get(&(ix, iy - 1, iz - 1)),
                        cell_verts.get(&(ix, iy, iz - 1)),
                        cell_verts.get(&(ix, iy, iz)),
                        cell_verts.get(&(ix, iy - 1, iz)),
                    ) {
                        emit(a, b, c, d, v0 < v1);
                    }
                }
            }
        }

        // Y-aligned edges
        for iz in 1..self.nz - 1 {
            for iy in 0..self.ny - 1 {
                for ix in 1..self.nx - 1 {
                    let v0 = self.get(ix, iy, iz);
                    let v1 = self.get(ix, iy + 1, iz);
                    if (v0 > iso) == (v1 > iso) {
                        continue;
                    }
                    if let (Some(&a), Some(&b), Some(&c), Some(&d)) = (
                        cell_verts.get(&(ix - 1, iy, iz - 1)),
                        cell_verts.get(&(ix, iy, iz - 1)),
                        cell_verts.get(&(ix, iy, iz)),
                        cell_verts.get(&(ix - 1, iy, iz)),
                    ) {
                        emit(a, b, c, d, v0 > v1);
                    }
                }
            }
        }

        // Z-aligned edges
        for iz in 0..self.nz - 1 {
            for iy in 1..self.ny - 1 {
                for ix in 1..self.nx - 1 {
                    let v0 = self.get(ix, iy, iz);
                    let v1 = self.get(ix, iy, iz + 1);
                    if (v0 > iso) == (v1 > iso) {
                        continue;
                    }
                    if let (Some(&a), Some(&b), Some(&c), Some(&d)) = (
                        cell_verts.get(&(ix - 1, iy - 1, iz)),
                        cell_verts.get(&(ix, iy - 1, iz)),
                        cell_verts.get(&(ix, iy, iz)),
                        cell_verts.get(&(ix - 1, iy, iz)),
                    ) {
                        emit(a, b, c, d, v0 < v1);
                    }
                }
            }
        }

        debug!(
            "isosurface at {:.4}: {} vertices, {} cells",
            iso,
            vertices.len(),
            triangles.len()
        );

        Mesh::new(vertices, triangles).map_err(|_| Error::OffsetDegenerate { depth: iso })
    }
}

fn bin_index(p: &Point3D, origin: &Point3D, inv_bin: f64) -> (i32, i32, i32) {
    (
        ((p.x - origin.x) * inv_bin).floor() as i32,
        ((p.y - origin.y) * inv_bin).floor() as i32,
        ((p.z - origin.z) * inv_bin).floor() as i32,
    )
}

/// Closest point on triangle (a, b, c) to point p.
/// Ericson (2004) "Real-Time Collision Detection" algorithm.
fn closest_point_on_tri(p: &Point3D, a: &Point3D, b: &Point3D, c: &Point3D) -> Point3D {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;

    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return *a;
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return *b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return Point3D::from(a.coords + ab * v);
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return *c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return Point3D::from(a.coords + ac * w);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return Point3D::from(b.coords + (c - b) * w);
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    Point3D::from(a.coords + ab * v + ac * w)
}
