//! Keypoint matching: residual model, neighborhood fitting, the 6-DoF
//! Levenberg-Marquardt solver, and the two ICP drivers (ego-motion and
//! mapping).

pub mod config;
pub mod lm;
pub mod matcher;
pub mod neighbors;
pub mod rejection;
pub mod residual;

pub use config::{MatchStep, MatchingConfig, MIN_TOTAL_MATCHES};
pub use lm::{optimize_pose, LmConfig, LmResult, LmStatus};
pub use matcher::{
    estimate_ego_motion, refine_with_map, MatchOutcome, MatchReport, StepRejections,
};
pub use rejection::{RejectionCause, RejectionHistogram, REJECTION_CAUSES};
pub use residual::{ResidualSet, ResidualTerm};
