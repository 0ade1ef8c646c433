// Core modules for layered grinding tool-path generation
pub mod dilation;
pub mod geometry;
pub mod io;
pub mod lines;
pub mod mesh;
pub mod plane_fit;
pub mod planner;
pub mod pose;
pub mod pruning;
pub mod slicing;
pub mod spatial;

// Re-export commonly used types
pub use geometry::{Point3D, PointNormal, Polyline, Vector3D};
pub use mesh::{Mesh, MeshError};
pub use planner::{generate_trajectory, PlannerConfig, Trajectory};
pub use pose::Pose;

/// Main result type for the planner
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the planner
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Mesh error: {0}")]
    Mesh(#[from] MeshError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InputInvalid(String),

    #[error("Dilation at depth {depth} m retained no cells")]
    OffsetDegenerate { depth: f64 },

    #[error("Slicing pass {pass} reached {achieved} of {expected} expected lines")]
    SliceExhaustion {
        pass: usize,
        expected: usize,
        achieved: usize,
    },
}
