// Layered pass planning: dilation stack, grinding lines, extrication weaving.

use crate::dilation;
use crate::geometry::{Point3D, PointNormal, Polyline, Vector3D};
use crate::lines;
use crate::mesh::Mesh;
use crate::plane_fit;
use crate::pose::{frame_pose, Pose};
use crate::pruning;
use crate::slicing::{self, SliceError};
use crate::{Error, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// A pass surface with fewer cells than this does not count as a pass.
const MIN_PASS_CELLS: usize = 10;

/// Planner parameters. Distances are in metres.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Material removed per pass; also the spacing of the offset stack.
    pub grind_depth: f64,

    /// Diameter of the grinding effector.
    pub effector_diameter: f64,

    /// Fractional overlap between adjacent lines, in [0, 1).
    pub covering: f64,

    /// Extra pass-counts of lift applied to the extrication surface.
    pub extrication_coefficient: u32,

    /// Regenerate the extrication surface every this many passes.
    pub extrication_frequency: u32,

    /// Guard for the default-mesh side test; avoids spurious deletion
    /// along near-tangent corners.
    pub corner_tolerance: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            grind_depth: 0.05,
            effector_diameter: 0.02,
            covering: 0.50,
            extrication_coefficient: 2,
            extrication_frequency: 1,
            corner_tolerance: 0.1,
        }
    }
}

impl PlannerConfig {
    /// Effective spacing between adjacent grinding lines.
    pub fn line_spacing(&self) -> f64 {
        self.effector_diameter * (1.0 - self.covering)
    }

    /// Collapse threshold for hole-split strips at the same cut offset.
    pub fn dedup_epsilon(&self) -> f64 {
        self.line_spacing() / 20.0
    }

    fn validate(&self) -> Result<()> {
        if !(self.grind_depth > 0.0) {
            return Err(Error::InputInvalid("grind_depth must be positive".into()));
        }
        if !(self.effector_diameter > 0.0) {
            return Err(Error::InputInvalid(
                "effector_diameter must be positive".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.covering) {
            return Err(Error::InputInvalid("covering must be in [0, 1)".into()));
        }
        if self.extrication_coefficient < 1 || self.extrication_frequency < 1 {
            return Err(Error::InputInvalid(
                "extrication parameters must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Planned tool trajectory: aligned pose and grinding-flag streams plus
/// the index of the last pose of each pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trajectory {
    pub poses: Vec<Pose>,
    pub grinding: Vec<bool>,
    pub pass_ends: Vec<usize>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    fn push(&mut self, pose: Pose, grinding: bool) {
        self.poses.push(pose);
        self.grinding.push(grinding);
    }

    fn close_pass(&mut self) {
        if self.is_empty() {
            return;
        }
        let index = self.len() - 1;
        if self.pass_ends.last() != Some(&index) {
            self.pass_ends.push(index);
        }
    }
}

/// Plan the full layered trajectory over `input`, grinding down to the
/// side protected by `default_mesh`.
pub fn generate_trajectory(
    input: &Mesh,
    default_mesh: &Mesh,
    config: &PlannerConfig,
) -> Result<Trajectory> {
    config.validate()?;
    info!(
        "planning: grind depth {:.1} cm, effector {:.1} cm, covering {:.0}%",
        config.grind_depth * 100.0,
        config.effector_diameter * 100.0,
        config.covering * 100.0
    );

    if !input.has_finite_vertices() {
        return Err(Error::InputInvalid("input mesh has non-finite vertices".into()));
    }

    let mut input = input.clone();
    input.ensure_vertex_normals();
    let mut default_mesh = default_mesh.clone();
    default_mesh.ensure_vertex_normals();

    let mesh_normal = plane_fit::dominant_plane_normal(&input)
        .ok_or_else(|| Error::InputInvalid("cannot fit a plane to the input mesh".into()))?;
    let sweep_dir = sweep_direction(&mesh_normal);
    debug!("mesh normal {mesh_normal:?}, sweep direction {sweep_dir:?}");

    let stack = build_stack(&input, &default_mesh, config)?;
    if stack.len() <= 1 {
        info!("first offset does not reach the default mesh: nothing to grind");
        return Ok(Trajectory::default());
    }
    let pass_count = stack.len();
    info!("{pass_count} passes planned");

    let line_spacing = config.line_spacing();
    let dedup_eps = config.dedup_epsilon();
    let mut trajectory = Trajectory::default();
    let mut extrication_surface: Option<Mesh> = None;
    let mut extrication_lines: Vec<Polyline> = Vec::new();

    for (pass, surface) in stack.iter().enumerate() {
        if pass as u32 % config.extrication_frequency == 0 {
            let layers_above = (pass_count - 1 - pass) as f64;
            let depth =
                (config.extrication_coefficient as f64 + layers_above) * config.grind_depth;
            let ext = dilation::dilate(&input, depth)?;
            extrication_lines = slice_and_organize(
                &ext,
                &sweep_dir,
                &mesh_normal,
                line_spacing,
                dedup_eps,
                pass,
            )?;
            extrication_surface = Some(ext);
        }
        let lift = (config.extrication_coefficient as f64 + pass as f64) * config.grind_depth;

        let mut pass_lines = slice_and_organize(
            surface,
            &sweep_dir,
            &mesh_normal,
            line_spacing,
            dedup_eps,
            pass,
        )?;
        // The innermost pass is the input surface itself; its recorded
        // normals point inward relative to the tool side.
        if pass == pass_count - 1 {
            lines::flip_normals(&mut pass_lines);
        }

        info!("pass {pass}: {} lines, lift {:.3}", pass_lines.len(), lift);
        weave_pass(&mut trajectory, &pass_lines, &extrication_lines, lift);

        if let Some(ext) = extrication_surface.as_ref() {
            return_to_pass_start(
                &mut trajectory,
                &pass_lines,
                ext,
                &mesh_normal,
                lift,
                dedup_eps,
                pass,
            )?;
        }
        trajectory.close_pass();
    }

    debug_assert_eq!(trajectory.poses.len(), trajectory.grinding.len());
    Ok(trajectory)
}

/// Build the ordered pass stack: the outermost offset first, the input
/// mesh last. Offsets are stacked at multiples of the grind depth while
/// they still reach the default mesh and keep a workable cell count.
pub fn build_pass_stack(
    input: &Mesh,
    default_mesh: &Mesh,
    config: &PlannerConfig,
) -> Result<Vec<Mesh>> {
    config.validate()?;
    let mut input = input.clone();
    input.ensure_vertex_normals();
    let mut default_mesh = default_mesh.clone();
    default_mesh.ensure_vertex_normals();
    build_stack(&input, &default_mesh, config)
}

fn build_stack(input: &Mesh, default_mesh: &Mesh, config: &PlannerConfig) -> Result<Vec<Mesh>> {
    let mut stack = vec![input.clone()];
    let mut depth = config.grind_depth;

    loop {
        let mut offset = match dilation::dilate(input, depth) {
            Ok(mesh) => mesh,
            // Deeper offsets eventually vanish; that ends the stack. A
            // degenerate first offset means the depth does not fit the
            // mesh at all.
            Err(Error::OffsetDegenerate { .. }) if stack.len() > 1 => break,
            Err(error) => return Err(error),
        };

        let intersects =
            pruning::prune_against_default(&mut offset, default_mesh, config.corner_tolerance)?;
        if !intersects || offset.num_cells() <= MIN_PASS_CELLS {
            break;
        }
        debug!(
            "offset at {:.4} m keeps {} cells",
            depth,
            offset.num_cells()
        );
        stack.push(offset);
        depth += config.grind_depth;
    }

    stack.reverse();
    Ok(stack)
}

/// Deterministic unit vector orthogonal to the mesh normal.
fn sweep_direction(mesh_normal: &Vector3D) -> Vector3D {
    let candidate = Vector3D::new(mesh_normal.z, 0.0, -mesh_normal.x);
    candidate.try_normalize(1e-12).unwrap_or_else(|| {
        Vector3D::new(0.0, mesh_normal.z, -mesh_normal.y).normalize()
    })
}

fn slice_and_organize(
    mesh: &Mesh,
    sweep_dir: &Vector3D,
    mesh_normal: &Vector3D,
    line_spacing: f64,
    dedup_eps: f64,
    pass: usize,
) -> Result<Vec<Polyline>> {
    let expected = slicing::expected_line_count(mesh, sweep_dir, line_spacing);
    if expected == 0 {
        return Ok(Vec::new());
    }
    let mut strips =
        slicing::slice_mesh(mesh, sweep_dir, expected, dedup_eps).map_err(|error| match error {
            SliceError::Exhausted { expected, achieved } => Error::SliceExhaustion {
                pass,
                expected,
                achieved,
            },
        })?;
    lines::organize_lines(&mut strips, sweep_dir, mesh_normal);
    Ok(strips)
}

/// Frame every point of a line, dropping degenerate poses. The terminal
/// point reuses the preceding advance direction with its own translation.
fn frame_line(line: &Polyline) -> Vec<Pose> {
    let points = &line.points;
    let mut framed = Vec::with_capacity(points.len());

    for index in 0..points.len() {
        let pose = if index + 1 < points.len() {
            frame_pose(
                &points[index].position,
                &points[index + 1].position,
                &points[index].normal,
            )
        } else {
            frame_pose(
                &points[index - 1].position,
                &points[index].position,
                &points[index - 1].normal,
            )
            .map(|pose| pose.at_position(points[index].position))
        };

        match pose {
            Some(pose) => framed.push(pose),
            None => debug!("dropping degenerate pose at line point {index}"),
        }
    }
    framed
}

/// Emit grinding poses line by line, with approach/retract markers and
/// inter-line extrication routing.
fn weave_pass(
    trajectory: &mut Trajectory,
    pass_lines: &[Polyline],
    extrication_lines: &[Polyline],
    lift: f64,
) {
    for (index, line) in pass_lines.iter().enumerate() {
        if line.len() < 2 {
            debug!("skipping line {index}: fewer than two points");
            continue;
        }
        let framed = frame_line(line);
        if framed.is_empty() {
            warn!("line {index} framed no poses");
            continue;
        }
        let start_pose = framed[0];
        let end_pose = *framed.last().expect("framed is non-empty");

        trajectory.push(start_pose, false); // approach marker
        for pose in &framed {
            trajectory.push(*pose, true);
        }
        trajectory.push(end_pose, false); // retract marker

        if index + 1 < pass_lines.len() {
            append_extrication(trajectory, &start_pose, &end_pose, extrication_lines, lift);
        }
    }
}

/// Route the effector from the end of one line back over the start of
/// the next along the extrication surface.
fn append_extrication(
    trajectory: &mut Trajectory,
    start_pose: &Pose,
    end_pose: &Pose,
    extrication_lines: &[Polyline],
    lift: f64,
) {
    if extrication_lines.is_empty() {
        return;
    }

    let end_air = end_pose.position + lift * end_pose.x_axis();
    let end_lifted = end_pose.position - lift * end_pose.z_axis();
    let start_lifted = start_pose.position - lift * start_pose.z_axis();

    let line = &extrication_lines[closest_line_by_end(&end_air, extrication_lines)];
    let near_end = closest_point_index(&end_lifted, line);
    let near_start = closest_point_index(&start_lifted, line);
    if near_start == near_end {
        return;
    }

    // Traverse the window from the end side of the ground line back over
    // its start side.
    let window: Vec<&PointNormal> = if near_start < near_end {
        line.points[near_start..near_end].iter().rev().collect()
    } else {
        line.points[near_end..near_start].iter().collect()
    };

    for point in window {
        trajectory.push(end_pose.at_position(point.position), false);
    }
}

/// End-of-pass return: a single cross-cut strip on the extrication
/// surface routed from the last retract back over the first approach.
fn return_to_pass_start(
    trajectory: &mut Trajectory,
    pass_lines: &[Polyline],
    extrication_surface: &Mesh,
    mesh_normal: &Vector3D,
    lift: f64,
    dedup_eps: f64,
    pass: usize,
) -> Result<()> {
    let Some(first_line) = pass_lines.iter().find(|line| line.len() >= 2) else {
        return Ok(());
    };
    let last_line = pass_lines
        .iter()
        .rev()
        .find(|line| line.len() >= 2)
        .expect("a first line implies a last line");

    let start = *first_line.first().expect("line has points");
    let end = *last_line.last().expect("line has points");

    let Some(pass_dir) = (end.position - start.position).try_normalize(1e-12) else {
        return Ok(());
    };
    // Project onto the fitted plane, then take the in-plane perpendicular
    let in_plane = pass_dir - pass_dir.dot(mesh_normal) * mesh_normal;
    let Some(cut_dir) = in_plane.cross(mesh_normal).try_normalize(1e-12) else {
        return Ok(());
    };

    let strips = slicing::slice_mesh(extrication_surface, &cut_dir, 1, dedup_eps).map_err(
        |error| match error {
            SliceError::Exhausted { expected, achieved } => Error::SliceExhaustion {
                pass,
                expected,
                achieved,
            },
        },
    )?;
    let Some(strip) = strips.iter().max_by_key(|strip| strip.len()) else {
        return Ok(());
    };
    let Some(base_pose) = trajectory.poses.last().copied() else {
        return Ok(());
    };

    let mut path = strip.points.clone();
    let travel = path[path.len() - 1].position - path[0].position;
    if travel.dot(&pass_dir) > 0.0 {
        path.reverse();
    }

    let lifted_end = Point3D::from(end.position.coords - lift * end.normal);
    let lifted_start = Point3D::from(start.position.coords - lift * start.normal);
    let near_end = closest_position_index(&lifted_end, &path);
    let near_start = closest_position_index(&lifted_start, &path);

    if near_end < near_start {
        for point in &path[near_end..near_start] {
            trajectory.push(base_pose.at_position(point.position), false);
        }
    }
    Ok(())
}

/// Index of the extrication line whose last point is nearest to `target`.
fn closest_line_by_end(target: &Point3D, extrication_lines: &[Polyline]) -> usize {
    let mut best = (0usize, f64::MAX);
    for (index, line) in extrication_lines.iter().enumerate() {
        let Some(last) = line.last() else { continue };
        let dist = (last.position - target).norm_squared();
        if dist < best.1 {
            best = (index, dist);
        }
    }
    best.0
}

fn closest_point_index(target: &Point3D, line: &Polyline) -> usize {
    let mut best = (0usize, f64::MAX);
    for (index, point) in line.points.iter().enumerate() {
        let dist = (point.position - target).norm_squared();
        if dist < best.1 {
            best = (index, dist);
        }
    }
    best.0
}

fn closest_position_index(target: &Point3D, points: &[PointNormal]) -> usize {
    let mut best = (0usize, f64::MAX);
    for (index, point) in points.iter().enumerate() {
        let dist = (point.position - target).norm_squared();
        if dist < best.1 {
            best = (index, dist);
        }
    }
    best.0
}

#[cfg(test)]
mod tests {
    use super::*;

    /// UV sphere with recorded normals pointing inward.
    fn inward_sphere(radius: f64, stacks: usize, slices: usize) -> Mesh {
        let mut vertices = vec![Point3D::new(0.0, 0.0, radius)];
        for i in 1..stacks {
            let phi = std::f64::consts::PI * i as f64 / stacks as f64;
            for j in 0..slices {
                let theta = std::f64::consts::TAU * j as f64 / slices as f64;
                vertices.push(Point3D::new(
                    radius * phi.sin() * theta.cos(),
                    radius * phi.sin() * theta.sin(),
                    radius * phi.cos(),
                ));
            }
        }
        vertices.push(Point3D::new(0.0, 0.0, -radius));
        let bottom = (vertices.len() - 1) as u32;

        let ring = |i: usize, j: usize| (1 + (i - 1) * slices + (j % slices)) as u32;
        let mut triangles = Vec::new();
        for j in 0..slices {
            triangles.push([0, ring(1, j), ring(1, j + 1)]);
            triangles.push([bottom, ring(stacks - 1, j + 1), ring(stacks - 1, j)]);
        }
        for i in 1..stacks - 1 {
            for j in 0..slices {
                let (a, b) = (ring(i, j), ring(i, j + 1));
                let (c, d) = (ring(i + 1, j), ring(i + 1, j + 1));
                triangles.push([a, b, d]);
                triangles.push([a, d, c]);
            }
        }

        let normals = vertices.iter().map(|v| -v.coords.normalize()).collect();
        let mut mesh = Mesh::new(vertices, triangles).unwrap();
        mesh.vertex_normals = Some(normals);
        mesh
    }

    fn test_config() -> PlannerConfig {
        PlannerConfig {
            grind_depth: 0.002,
            effector_diameter: 0.01,
            covering: 0.5,
            extrication_coefficient: 1,
            extrication_frequency: 1,
            corner_tolerance: 0.1,
        }
    }

    #[test]
    fn test_sweep_direction_is_orthogonal_unit() {
        let normals = [
            Vector3D::new(0.0, 0.0, 1.0),
            Vector3D::new(1.0, 0.0, 0.0),
            Vector3D::new(0.0, 1.0, 0.0), // degenerate first candidate
            Vector3D::new(0.5, -0.3, 0.8).normalize(),
        ];
        for normal in &normals {
            let sweep = sweep_direction(normal);
            assert!((sweep.norm() - 1.0).abs() < 1e-9);
            assert!(sweep.dot(normal).abs() < 1e-9, "normal {normal:?}");
        }
    }

    #[test]
    fn test_config_validation() {
        let mut config = PlannerConfig::default();
        config.covering = 1.0;
        assert!(config.validate().is_err());

        let mut config = PlannerConfig::default();
        config.grind_depth = 0.0;
        assert!(config.validate().is_err());

        let mut config = PlannerConfig::default();
        config.extrication_frequency = 0;
        assert!(config.validate().is_err());

        assert!(PlannerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_line_spacing_monotone_in_covering() {
        let mut config = test_config();
        let mut previous = f64::MAX;
        for covering in [0.0, 0.25, 0.5, 0.75, 0.9] {
            config.covering = covering;
            let spacing = config.line_spacing();
            assert!(spacing < previous);
            previous = spacing;
        }
    }

    #[test]
    fn test_non_finite_input_rejected() {
        let mut mesh = inward_sphere(0.025, 8, 16);
        mesh.vertices[3].x = f64::NAN;
        let default_mesh = inward_sphere(0.020, 8, 16);

        let result = generate_trajectory(&mesh, &default_mesh, &test_config());
        assert!(matches!(result, Err(Error::InputInvalid(_))));
    }

    #[test]
    fn test_coincident_default_yields_empty_trajectory() {
        let input = inward_sphere(0.025, 16, 32);
        let default_mesh = inward_sphere(0.025, 16, 32);

        let trajectory = generate_trajectory(&input, &default_mesh, &test_config()).unwrap();
        assert!(trajectory.is_empty());
        assert!(trajectory.pass_ends.is_empty());
    }

    #[test]
    fn test_sphere_trajectory_structure() {
        // Grinding marches inward from a 25 mm sphere toward a protected
        // sphere at 22.2 mm; offsets at 23 mm reach it, offsets at 21 mm
        // are already inside it. Two passes: one offset plus the input.
        let input = inward_sphere(0.025, 16, 32);
        let default_mesh = inward_sphere(0.0222, 32, 64);
        let config = test_config();

        let trajectory = generate_trajectory(&input, &default_mesh, &config).unwrap();

        assert!(!trajectory.is_empty());
        assert_eq!(trajectory.poses.len(), trajectory.grinding.len());
        assert_eq!(trajectory.pass_ends.len(), 2);

        // pass_ends strictly increasing, closing on the final pose
        for pair in trajectory.pass_ends.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(
            *trajectory.pass_ends.last().unwrap(),
            trajectory.len() - 1
        );

        // Both grinding and transition poses present
        assert!(trajectory.grinding.iter().any(|&g| g));
        assert!(trajectory.grinding.iter().any(|&g| !g));

        for (pose, &grinding) in trajectory.poses.iter().zip(&trajectory.grinding) {
            // Orthonormal frames throughout
            let m = pose.rotation.matrix();
            for i in 0..3 {
                for j in 0..3 {
                    let dot = m.column(i).dot(&m.column(j));
                    let want = if i == j { 1.0 } else { 0.0 };
                    assert!((dot - want).abs() < 1e-6);
                }
            }
            // Grinding poses face outward, toward the tool
            if grinding {
                let radial = pose.position.coords.normalize();
                assert!(
                    pose.z_axis().dot(&radial) > 0.0,
                    "grinding pose facing inward at {:?}",
                    pose.position
                );
            }
        }
    }

    #[test]
    fn test_pass_stack_order_and_intersection() {
        let input = inward_sphere(0.025, 16, 32);
        let default_mesh = inward_sphere(0.0222, 32, 64);
        let config = test_config();

        let stack = build_pass_stack(&input, &default_mesh, &config).unwrap();
        assert_eq!(stack.len(), 2);

        // Outermost offset first, input mesh last
        assert!(stack[0].num_cells() > MIN_PASS_CELLS);
        assert_eq!(stack[1].num_cells(), input.num_cells());

        // Every non-input layer still reaches the default mesh
        let mut prepared_default = default_mesh.clone();
        prepared_default.ensure_vertex_normals();
        let mut offset = stack[0].clone();
        let intersects =
            pruning::prune_against_default(&mut offset, &prepared_default, config.corner_tolerance)
                .unwrap();
        assert!(intersects);
    }
}
