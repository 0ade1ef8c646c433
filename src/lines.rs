// Ordering, orientation and decimation of sliced grinding lines.

use crate::geometry::{Polyline, Vector3D};
use log::debug;
use ordered_float::OrderedFloat;

/// Points closer than this along a line collapse into one.
const MIN_POINT_SPACING: f64 = 1e-3;

/// Sort lines along the sweep direction, align every line's traversal
/// direction, and decimate near-duplicate points. Lines left with fewer
/// than two points are dropped.
pub fn organize_lines(lines: &mut Vec<Polyline>, sweep_dir: &Vector3D, mesh_normal: &Vector3D) {
    lines.retain(|line| !line.is_empty());
    sort_lines(lines, sweep_dir);
    align_orientation(lines, sweep_dir, mesh_normal);
    decimate(lines);

    let before = lines.len();
    lines.retain(|line| line.len() >= 2);
    if lines.len() < before {
        debug!("dropped {} degenerate lines", before - lines.len());
    }
}

/// Sort ascending by the projection of each line's first point onto the
/// sweep direction.
pub fn sort_lines(lines: &mut [Polyline], sweep_dir: &Vector3D) {
    lines.sort_by_key(|line| {
        let first = line.first().expect("empty lines are filtered before sorting");
        OrderedFloat(sweep_dir.dot(&first.position.coords))
    });
}

/// Reverse every line whose travel disagrees with the reference
/// direction `sweep_dir x mesh_normal`.
fn align_orientation(lines: &mut [Polyline], sweep_dir: &Vector3D, mesh_normal: &Vector3D) {
    let Some(reference) = sweep_dir.cross(mesh_normal).try_normalize(1e-12) else {
        return;
    };

    for line in lines.iter_mut() {
        let (Some(first), Some(last)) = (line.first(), line.last()) else {
            continue;
        };
        let travel = last.position - first.position;
        if reference.dot(&travel) < 0.0 {
            line.reverse();
        }
    }
}

/// Remove the second of any two successive points closer than the
/// minimum spacing, or the first when the pair ends the line.
fn decimate(lines: &mut [Polyline]) {
    for line in lines.iter_mut() {
        let points = &mut line.points;
        let mut index = 0;
        while index + 1 < points.len() {
            let gap = (points[index].position - points[index + 1].position).norm();
            if gap < MIN_POINT_SPACING {
                if index + 2 < points.len() {
                    points.remove(index + 1);
                } else {
                    points.remove(index);
                }
            } else {
                index += 1;
            }
        }
    }
}

/// Negate the recorded normals of every point. Lines sliced from the
/// input mesh carry normals pointing inward relative to the tool side.
pub fn flip_normals(lines: &mut [Polyline]) {
    for line in lines.iter_mut() {
        for point in &mut line.points {
            point.normal = -point.normal;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point3D, PointNormal};

    fn line_along_y(x: f64, ys: &[f64]) -> Polyline {
        let up = Vector3D::new(0.0, 0.0, 1.0);
        Polyline::new(
            ys.iter()
                .map(|&y| PointNormal::new(Point3D::new(x, y, 0.0), up))
                .collect(),
        )
    }

    #[test]
    fn test_sort_by_sweep_projection() {
        let mut lines = vec![
            line_along_y(0.3, &[0.0, 1.0]),
            line_along_y(0.1, &[0.0, 1.0]),
            line_along_y(0.2, &[0.0, 1.0]),
        ];
        sort_lines(&mut lines, &Vector3D::new(1.0, 0.0, 0.0));

        let xs: Vec<f64> = lines.iter().map(|l| l.first().unwrap().position.x).collect();
        assert_eq!(xs, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_sort_is_idempotent() {
        let mut lines = vec![
            line_along_y(0.3, &[0.0, 1.0]),
            line_along_y(0.1, &[0.0, 1.0]),
        ];
        let sweep = Vector3D::new(1.0, 0.0, 0.0);
        sort_lines(&mut lines, &sweep);
        let once: Vec<f64> = lines.iter().map(|l| l.first().unwrap().position.x).collect();
        sort_lines(&mut lines, &sweep);
        let twice: Vec<f64> = lines.iter().map(|l| l.first().unwrap().position.x).collect();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_orientation_aligned_against_reference() {
        // sweep = +X, normal = -Z, so the reference is +X x -Z = +Y
        let sweep = Vector3D::new(1.0, 0.0, 0.0);
        let normal = Vector3D::new(0.0, 0.0, -1.0);

        let mut lines = vec![
            line_along_y(0.0, &[0.0, 1.0]),
            line_along_y(0.1, &[1.0, 0.0]), // runs backward
        ];
        organize_lines(&mut lines, &sweep, &normal);

        for line in &lines {
            let travel = line.last().unwrap().position - line.first().unwrap().position;
            assert!(travel.y > 0.0, "line not aligned: {travel:?}");
        }
    }

    #[test]
    fn test_decimation_removes_close_points() {
        let mut lines = vec![line_along_y(0.0, &[0.0, 0.0005, 0.01, 0.02])];
        organize_lines(
            &mut lines,
            &Vector3D::new(1.0, 0.0, 0.0),
            &Vector3D::new(0.0, 0.0, -1.0),
        );

        let line = &lines[0];
        assert_eq!(line.len(), 3);
        for pair in line.points.windows(2) {
            let gap = (pair[1].position - pair[0].position).norm();
            assert!(gap >= 1e-3, "points closer than the minimum: {gap}");
        }
    }

    #[test]
    fn test_penultimate_rule_keeps_line_end() {
        // The close pair sits at the end: the first of the pair goes
        let mut lines = vec![line_along_y(0.0, &[0.0, 0.01, 0.0104])];
        organize_lines(
            &mut lines,
            &Vector3D::new(1.0, 0.0, 0.0),
            &Vector3D::new(0.0, 0.0, -1.0),
        );
        let line = &lines[0];
        assert_eq!(line.len(), 2);
        assert!((line.last().unwrap().position.y - 0.0104).abs() < 1e-12);
    }

    #[test]
    fn test_singleton_lines_dropped() {
        let mut lines = vec![
            line_along_y(0.0, &[0.0]),
            line_along_y(0.1, &[0.0, 0.0002]),
            line_along_y(0.2, &[0.0, 1.0]),
        ];
        organize_lines(
            &mut lines,
            &Vector3D::new(1.0, 0.0, 0.0),
            &Vector3D::new(0.0, 0.0, -1.0),
        );
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn test_flip_normals() {
        let mut lines = vec![line_along_y(0.0, &[0.0, 1.0])];
        flip_normals(&mut lines);
        assert_eq!(lines[0].points[0].normal, Vector3D::new(0.0, 0.0, -1.0));
    }
}
