//! The two ICP drivers: frame-to-frame ego-motion and frame-to-map
//! refinement.
//!
//! Both share the per-pass structure: (re)build the undistortion
//! interpolator, match every keypoint to local geometry, accumulate residual
//! terms, then run the Levenberg-Marquardt solver. They differ in where the
//! target points come from and how edge neighborhoods are selected.

use log::{debug, warn};
use nalgebra::Vector3;

use crate::core::{PointCloud, Pose};
use crate::interpolator::TransformInterpolator;
use crate::map::RollingGrid;

use super::config::{MatchStep, MatchingConfig, MIN_TOTAL_MATCHES};
use super::lm::{optimize_pose, LmConfig, LmStatus};
use super::neighbors::{
    build_kdtree, ego_motion_line_neighbors, fit_blob, fit_line, fit_plane,
    mapping_line_neighbors, plane_neighbors, FittedModel,
};
use super::rejection::{RejectionCause, RejectionHistogram};
use super::residual::{ResidualSet, ResidualTerm};

/// Floor of the squared robust-weight scale (σ²), so early iterations with
/// decimeter-level misalignment still carry gradient.
const WEIGHT_SIGMA_SQ_FLOOR: f64 = 0.25;

/// Outer ICP passes stop early once the pose stops moving by this much.
const ICP_POSE_TOLERANCE: f64 = 1e-9;

/// How a matching step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The pose was refined by at least one solver run.
    Refined,
    /// Fewer than the minimum total terms; the pose was not updated.
    InsufficientMatches,
    /// The divergence guard tripped; the pose was reset.
    Diverged,
    /// The normal equations went singular; the pass was abandoned.
    Singular,
}

/// Diagnostics of one matching step.
#[derive(Debug, Clone)]
pub struct MatchReport {
    /// Line terms accumulated in the final pass.
    pub edge_terms: usize,
    /// Plane terms accumulated in the final pass.
    pub plane_terms: usize,
    /// Blob terms accumulated in the final pass.
    pub blob_terms: usize,
    /// Outer ICP passes run.
    pub icp_iterations: usize,
    /// Solver iterations of the final pass.
    pub lm_iterations: usize,
    /// Final total weighted cost.
    pub final_cost: f64,
    /// How the step ended.
    pub outcome: MatchOutcome,
}

impl MatchReport {
    fn empty(outcome: MatchOutcome) -> Self {
        Self {
            edge_terms: 0,
            plane_terms: 0,
            blob_terms: 0,
            icp_iterations: 0,
            lm_iterations: 0,
            final_cost: 0.0,
            outcome,
        }
    }

    /// Total terms of the final pass.
    pub fn total_terms(&self) -> usize {
        self.edge_terms + self.plane_terms + self.blob_terms
    }
}

/// Rejection histograms of one matching step, per keypoint category.
#[derive(Debug, Clone, Default)]
pub struct StepRejections {
    /// Edge-keypoint rejections.
    pub edges: RejectionHistogram,
    /// Planar-keypoint rejections.
    pub planars: RejectionHistogram,
    /// Blob-keypoint rejections.
    pub blobs: RejectionHistogram,
}

impl StepRejections {
    /// Reset all histograms.
    pub fn reset(&mut self) {
        self.edges.reset();
        self.planars.reset();
        self.blobs.reset();
    }
}

/// Robust attenuation weight for a matched keypoint: a Welsch-style
/// `exp(−d²/σ²)` with σ² from the neighborhood spread.
#[inline]
fn robust_weight(transformed: &Vector3<f64>, model: &FittedModel) -> f64 {
    let sigma_sq = model.spread_sq.max(WEIGHT_SIGMA_SQ_FLOOR);
    (-(transformed - model.centroid).norm_squared() / sigma_sq).exp()
}

/// Estimate the relative motion between the previous and current sweep by
/// matching the current keypoints against the previous sweep's keypoints.
///
/// Returns the refined `Trelative` and a report. On divergence the pose is
/// reset to identity; on insufficient matches the initial pose is returned
/// untouched.
#[allow(clippy::too_many_arguments)]
pub fn estimate_ego_motion(
    edges: &PointCloud,
    planars: &PointCloud,
    previous_edges: &PointCloud,
    previous_planars: &PointCloud,
    initial: Pose,
    config: &MatchingConfig,
    undistortion: bool,
    max_translation: f64,
    rejections: &mut StepRejections,
) -> (Pose, MatchReport) {
    debug_assert_eq!(config.step, MatchStep::EgoMotion);

    let edge_tree = build_kdtree(previous_edges);
    let plane_tree = build_kdtree(previous_planars);

    let mut pose = initial;
    let mut report = MatchReport::empty(MatchOutcome::Refined);

    for pass in 0..config.icp_max_iter {
        report.icp_iterations = pass + 1;
        let interpolator = undistortion.then(|| TransformInterpolator::from_identity_to(&pose));

        let mut terms = ResidualSet::new();
        report.edge_terms = 0;
        report.plane_terms = 0;

        for keypoint in edges.iter() {
            let transformed = match &interpolator {
                Some(interp) => interp.transform_point(&keypoint.position, keypoint.time),
                None => pose.transform_point(&keypoint.position),
            };
            let matched = ego_motion_line_neighbors(
                &edge_tree,
                previous_edges,
                &transformed,
                config.line_neighbors,
                config.min_line_neighbors,
                max_translation,
            )
            .and_then(|neighbors| {
                fit_line(&neighbors, config.line_eigen_factor, config.max_line_distance)
            });
            match matched {
                Ok(model) => {
                    terms.push(ResidualTerm {
                        weighting: model.weighting,
                        target: model.centroid,
                        keypoint: keypoint.position,
                        weight: robust_weight(&transformed, &model),
                        time: if undistortion { keypoint.time } else { 1.0 },
                    });
                    report.edge_terms += 1;
                    rejections.edges.accept();
                }
                Err(cause) => rejections.edges.record(cause),
            }
        }

        for keypoint in planars.iter() {
            let transformed = match &interpolator {
                Some(interp) => interp.transform_point(&keypoint.position, keypoint.time),
                None => pose.transform_point(&keypoint.position),
            };
            let matched = plane_neighbors(
                &plane_tree,
                previous_planars,
                &transformed,
                config.plane_neighbors,
                max_translation,
            )
            .and_then(|neighbors| {
                fit_plane(
                    &neighbors,
                    config.plane_eigen_factor1,
                    config.plane_eigen_factor2,
                    config.max_plane_distance,
                )
            });
            match matched {
                Ok(model) => {
                    terms.push(ResidualTerm {
                        weighting: model.weighting,
                        target: model.centroid,
                        keypoint: keypoint.position,
                        weight: robust_weight(&transformed, &model),
                        time: if undistortion { keypoint.time } else { 1.0 },
                    });
                    report.plane_terms += 1;
                    rejections.planars.accept();
                }
                Err(cause) => rejections.planars.record(cause),
            }
        }

        if terms.len() < MIN_TOTAL_MATCHES {
            warn!(
                "ego-motion: only {} terms in pass {pass}, skipping pose update",
                terms.len()
            );
            report.outcome = MatchOutcome::InsufficientMatches;
            return (initial, report);
        }

        let lm_config = LmConfig {
            max_iterations: config.lm_max_iter,
            max_translation_increment: max_translation,
            undistortion,
            ..LmConfig::default()
        };
        let result = optimize_pose(&terms, pose, &Pose::identity(), &lm_config);
        report.lm_iterations = result.iterations;
        report.final_cost = result.cost;

        match result.status {
            LmStatus::Diverged => {
                warn!("ego-motion diverged, resetting relative transform");
                record_divergence(rejections, terms.len());
                report.outcome = MatchOutcome::Diverged;
                return (Pose::identity(), report);
            }
            LmStatus::Singular => {
                debug!("ego-motion normal equations singular in pass {pass}");
                report.outcome = MatchOutcome::Singular;
                return (pose, report);
            }
            _ => {}
        }

        let moved = pose_delta(&pose, &result.pose);
        pose = result.pose;
        if moved < ICP_POSE_TOLERANCE {
            break;
        }
    }

    // Final guard on the committed relative transform.
    if pose.translation_norm() > max_translation {
        warn!("ego-motion translation exceeds the inter-frame bound, resetting");
        report.outcome = MatchOutcome::Diverged;
        return (Pose::identity(), report);
    }

    (pose, report)
}

/// Refine a world pose by matching the current keypoints against the rolling
/// grids.
///
/// `base` is the previous world pose (the t = 0 anchor of the undistortion
/// interpolator). On divergence or insufficient matches the initial guess is
/// returned untouched.
#[allow(clippy::too_many_arguments)]
pub fn refine_with_map(
    edges: &PointCloud,
    planars: &PointCloud,
    blobs: &PointCloud,
    edge_map: &RollingGrid,
    planar_map: &RollingGrid,
    blob_map: &RollingGrid,
    initial: Pose,
    base: Pose,
    config: &MatchingConfig,
    undistortion: bool,
    max_translation_increment: f64,
    match_radius: f64,
    rejections: &mut StepRejections,
) -> (Pose, MatchReport) {
    debug_assert_eq!(config.step, MatchStep::Mapping);

    let mut pose = initial;
    let mut report = MatchReport::empty(MatchOutcome::Refined);

    for pass in 0..config.icp_max_iter {
        report.icp_iterations = pass + 1;

        // Pull the map subsets around the current position estimate.
        let position = pose.translation();
        let edge_targets: PointCloud = edge_map
            .query_radius(&position, match_radius)
            .into_iter()
            .collect();
        let plane_targets: PointCloud = planar_map
            .query_radius(&position, match_radius)
            .into_iter()
            .collect();
        let blob_targets: PointCloud = if blobs.is_empty() {
            PointCloud::new()
        } else {
            blob_map.query_radius(&position, match_radius).into_iter().collect()
        };

        let edge_tree = build_kdtree(&edge_targets);
        let plane_tree = build_kdtree(&plane_targets);
        let blob_tree = build_kdtree(&blob_targets);

        let interpolator = undistortion.then(|| TransformInterpolator::between(&base, &pose));

        let mut terms = ResidualSet::new();
        report.edge_terms = 0;
        report.plane_terms = 0;
        report.blob_terms = 0;

        for keypoint in edges.iter() {
            let transformed = match &interpolator {
                Some(interp) => interp.transform_point(&keypoint.position, keypoint.time),
                None => pose.transform_point(&keypoint.position),
            };
            let matched = mapping_line_neighbors(
                &edge_tree,
                &edge_targets,
                &transformed,
                config.line_neighbors,
                config.min_line_neighbors,
                match_radius,
                config.line_max_dist_inlier,
            )
            .and_then(|neighbors| {
                fit_line(&neighbors, config.line_eigen_factor, config.max_line_distance)
            });
            match matched {
                Ok(model) => {
                    terms.push(ResidualTerm {
                        weighting: model.weighting,
                        target: model.centroid,
                        keypoint: keypoint.position,
                        weight: robust_weight(&transformed, &model),
                        time: if undistortion { keypoint.time } else { 1.0 },
                    });
                    report.edge_terms += 1;
                    rejections.edges.accept();
                }
                Err(cause) => rejections.edges.record(cause),
            }
        }

        for keypoint in planars.iter() {
            let transformed = match &interpolator {
                Some(interp) => interp.transform_point(&keypoint.position, keypoint.time),
                None => pose.transform_point(&keypoint.position),
            };
            let matched = plane_neighbors(
                &plane_tree,
                &plane_targets,
                &transformed,
                config.plane_neighbors,
                match_radius,
            )
            .and_then(|neighbors| {
                fit_plane(
                    &neighbors,
                    config.plane_eigen_factor1,
                    config.plane_eigen_factor2,
                    config.max_plane_distance,
                )
            });
            match matched {
                Ok(model) => {
                    terms.push(ResidualTerm {
                        weighting: model.weighting,
                        target: model.centroid,
                        keypoint: keypoint.position,
                        weight: robust_weight(&transformed, &model),
                        time: if undistortion { keypoint.time } else { 1.0 },
                    });
                    report.plane_terms += 1;
                    rejections.planars.accept();
                }
                Err(cause) => rejections.planars.record(cause),
            }
        }

        for keypoint in blobs.iter() {
            if blob_targets.is_empty() {
                rejections.blobs.record(RejectionCause::InsufficientNeighbors);
                continue;
            }
            let transformed = match &interpolator {
                Some(interp) => interp.transform_point(&keypoint.position, keypoint.time),
                None => pose.transform_point(&keypoint.position),
            };
            let matched = plane_neighbors(
                &blob_tree,
                &blob_targets,
                &transformed,
                config.plane_neighbors.min(blob_targets.len()),
                match_radius,
            )
            .and_then(|neighbors| fit_blob(&neighbors));
            match matched {
                Ok(model) => {
                    terms.push(ResidualTerm {
                        weighting: model.weighting,
                        target: model.centroid,
                        keypoint: keypoint.position,
                        weight: robust_weight(&transformed, &model),
                        time: if undistortion { keypoint.time } else { 1.0 },
                    });
                    report.blob_terms += 1;
                    rejections.blobs.accept();
                }
                Err(cause) => rejections.blobs.record(cause),
            }
        }

        if terms.len() < MIN_TOTAL_MATCHES {
            warn!(
                "mapping: only {} terms in pass {pass}, keeping predicted pose",
                terms.len()
            );
            report.outcome = MatchOutcome::InsufficientMatches;
            return (initial, report);
        }

        let lm_config = LmConfig {
            max_iterations: config.lm_max_iter,
            max_translation_increment,
            undistortion,
            ..LmConfig::default()
        };
        let result = optimize_pose(&terms, pose, &base, &lm_config);
        report.lm_iterations = result.iterations;
        report.final_cost = result.cost;

        match result.status {
            LmStatus::Diverged => {
                warn!("mapping diverged, keeping predicted pose");
                record_divergence(rejections, terms.len());
                report.outcome = MatchOutcome::Diverged;
                return (initial, report);
            }
            LmStatus::Singular => {
                debug!("mapping normal equations singular in pass {pass}");
                report.outcome = MatchOutcome::Singular;
                return (pose, report);
            }
            _ => {}
        }

        let moved = pose_delta(&pose, &result.pose);
        pose = result.pose;
        if moved < ICP_POSE_TOLERANCE {
            break;
        }
    }

    (pose, report)
}

/// Parameter-space distance between two poses.
fn pose_delta(a: &Pose, b: &Pose) -> f64 {
    let pa = a.params();
    let pb = b.params();
    pa.iter()
        .zip(pb.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Count an aborted pass against every term that was built.
fn record_divergence(rejections: &mut StepRejections, terms: usize) {
    for _ in 0..terms {
        rejections.edges.record(RejectionCause::TransformDiverged);
    }
}
