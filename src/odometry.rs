//! The top-level sweep processor: LiDAR odometry and mapping.
//!
//! Per sweep: re-order scan lines, extract keypoints, estimate the
//! frame-to-frame motion against the previous sweep's keypoints, refine the
//! world pose against the rolling-grid local maps, then commit the pose and
//! fold the keypoints into the maps.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::core::{PointCloud, PointLabel, Pose, SweepPoint};
use crate::error::{Result, SlamError};
use crate::extraction::{ExtractedKeypoints, KeypointConfig, KeypointExtractor};
use crate::interpolator::TransformInterpolator;
use crate::map::{RollingGrid, RollingGridConfig};
use crate::matching::{
    estimate_ego_motion, refine_with_map, MatchOutcome, MatchReport, MatchStep, MatchingConfig,
    StepRejections,
};
use crate::sweep::SweepIngestor;

/// General estimator parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Leaf size of the rolling-grid voxel filters (meters).
    /// Default: 0.6
    pub leaf_size: f64,

    /// Divergence guard: the largest credible sensor motion between two
    /// consecutive sweeps.
    /// Default: 2.5 (90 km/h at 600 rpm)
    pub max_dist_between_two_frames: f64,

    /// Radius of the map queries feeding frame-to-map matching (meters).
    /// Default: 20.0
    pub max_distance_for_icp_matching: f64,

    /// Reuse the ego-motion planar keypoints during mapping instead of every
    /// valid low-sharpness point.
    /// Default: true
    pub fast_slam: bool,

    /// Compensate per-point sensor motion across the sweep.
    /// Default: false
    pub undistortion: bool,

    /// Attach per-point labels and rejection histograms to each summary.
    /// Default: false
    pub display_mode: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            leaf_size: 0.6,
            max_dist_between_two_frames: (90.0 / 3.6) * (60.0 / 600.0),
            max_distance_for_icp_matching: 20.0,
            fast_slam: true,
            undistortion: false,
            display_mode: false,
        }
    }
}

/// Full estimator configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SlamConfig {
    /// General parameters.
    pub general: GeneralConfig,
    /// Keypoint extraction parameters.
    pub keypoints: KeypointConfig,
    /// Ego-motion matching parameters.
    pub ego_motion: MatchingConfig,
    /// Mapping matching parameters.
    pub mapping: MatchingConfig,
    /// Rolling-grid geometry.
    pub grid: RollingGridConfig,
}

impl SlamConfig {
    /// Validate every fatal precondition.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("leaf_size", self.general.leaf_size),
            (
                "max_dist_between_two_frames",
                self.general.max_dist_between_two_frames,
            ),
            (
                "max_distance_for_icp_matching",
                self.general.max_distance_for_icp_matching,
            ),
        ] {
            if !(value > 0.0) {
                return Err(SlamError::invalid(
                    name,
                    format!("must be positive, got {value}"),
                ));
            }
        }

        if self.keypoints.neighbor_width == 0 {
            return Err(SlamError::invalid("neighbor_width", "must be at least 1"));
        }
        if self.keypoints.min_distance_to_sensor < 0.0 {
            return Err(SlamError::invalid(
                "min_distance_to_sensor",
                "must be non-negative",
            ));
        }
        if self.keypoints.max_edge_per_scan_line == 0
            || self.keypoints.max_planar_per_scan_line == 0
        {
            return Err(SlamError::invalid(
                "max_keypoints_per_scan_line",
                "per-line caps must be at least 1",
            ));
        }

        if self.ego_motion.step != MatchStep::EgoMotion {
            return Err(SlamError::invalid(
                "ego_motion.step",
                "parameter pack is tagged for the wrong step",
            ));
        }
        if self.mapping.step != MatchStep::Mapping {
            return Err(SlamError::invalid(
                "mapping.step",
                "parameter pack is tagged for the wrong step",
            ));
        }
        self.ego_motion.validate()?;
        self.mapping.validate()?;
        self.grid.validate()?;
        Ok(())
    }
}

impl Default for SlamConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            keypoints: KeypointConfig::default(),
            ego_motion: MatchingConfig::ego_motion(),
            mapping: MatchingConfig::mapping(),
            grid: RollingGridConfig::default(),
        }
    }
}

/// Why a sweep's pose update was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Too few keypoints were extracted (or the sweep was empty).
    UnderDenseSweep,
    /// Neither matching step accumulated enough terms.
    InsufficientMatches,
    /// The divergence guard tripped.
    Diverged,
}

/// Extra per-sweep output attached when `display_mode` is on.
#[derive(Debug, Clone)]
pub struct SweepDiagnostics {
    /// Final label of every input point, aligned with the input slice.
    /// Dropped points carry [`PointLabel::Invalid`].
    pub labels: Vec<PointLabel>,
    /// Ego-motion rejection histograms for this sweep.
    pub ego_rejections: StepRejections,
    /// Mapping rejection histograms for this sweep.
    pub mapping_rejections: StepRejections,
}

/// Result of processing one sweep.
#[derive(Debug, Clone)]
pub struct SweepSummary {
    /// The committed world pose after this sweep.
    pub pose: Pose,
    /// The committed relative transform (previous → current sweep).
    pub relative: Pose,
    /// Whether this sweep changed the world pose.
    pub pose_updated: bool,
    /// Set when the pose update was skipped.
    pub skip_reason: Option<SkipReason>,
    /// Edge keypoints extracted.
    pub num_edges: usize,
    /// Planar keypoints extracted.
    pub num_planars: usize,
    /// Blob keypoints extracted.
    pub num_blobs: usize,
    /// Ego-motion report, absent on the first sweep and on skips before
    /// matching.
    pub ego_motion: Option<MatchReport>,
    /// Mapping report, absent on the first sweep and on skips before
    /// matching.
    pub mapping: Option<MatchReport>,
    /// Per-point diagnostics when `display_mode` is on.
    pub diagnostics: Option<SweepDiagnostics>,
}

/// The LiDAR odometry and mapping estimator.
///
/// Owns all persisted state: the world pose and trajectory, the previous
/// sweep's keypoints, the three rolling grids, the frozen laser mapping, and
/// the rejection histograms. The rolling grids are never exposed by
/// reference; map queries hand back owned point vectors.
pub struct LidarOdometry {
    config: SlamConfig,
    ingestor: SweepIngestor,
    extractor: KeypointExtractor,

    trelative: Pose,
    tworld: Pose,
    previous_tworld: Pose,
    trajectory: Vec<Pose>,

    previous_edges: PointCloud,
    previous_planars: PointCloud,
    previous_blobs: PointCloud,

    edge_map: RollingGrid,
    planar_map: RollingGrid,
    blob_map: RollingGrid,

    ego_rejections: StepRejections,
    mapping_rejections: StepRejections,

    frames_processed: u64,
}

impl LidarOdometry {
    /// Create an estimator, validating every parameter.
    pub fn new(config: SlamConfig) -> Result<Self> {
        config.validate()?;

        let grid_config = RollingGridConfig {
            leaf_size: config.general.leaf_size,
            ..config.grid.clone()
        };
        let ingestor = SweepIngestor::new(config.keypoints.min_distance_to_sensor);
        let extractor = KeypointExtractor::new(config.keypoints.clone());

        Ok(Self {
            edge_map: RollingGrid::new(grid_config.clone())?,
            planar_map: RollingGrid::new(grid_config.clone())?,
            blob_map: RollingGrid::new(grid_config)?,
            ingestor,
            extractor,
            config,
            trelative: Pose::identity(),
            tworld: Pose::identity(),
            previous_tworld: Pose::identity(),
            trajectory: Vec::new(),
            previous_edges: PointCloud::new(),
            previous_planars: PointCloud::new(),
            previous_blobs: PointCloud::new(),
            ego_rejections: StepRejections::default(),
            mapping_rejections: StepRejections::default(),
            frames_processed: 0,
        })
    }

    /// Create an estimator with default parameters.
    pub fn with_defaults() -> Self {
        // The default configuration always validates.
        match Self::new(SlamConfig::default()) {
            Ok(odometry) => odometry,
            Err(_) => unreachable!("default configuration is valid"),
        }
    }

    /// The current configuration.
    pub fn config(&self) -> &SlamConfig {
        &self.config
    }

    /// The current world pose.
    pub fn world_transform(&self) -> Pose {
        self.tworld
    }

    /// The committed relative transform of the last sweep.
    pub fn relative_transform(&self) -> Pose {
        self.trelative
    }

    /// The world pose at the end of every processed sweep.
    pub fn trajectory(&self) -> &[Pose] {
        &self.trajectory
    }

    /// Number of sweeps processed (including skipped ones after
    /// initialization).
    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Ego-motion rejection histograms of the last sweep.
    pub fn ego_motion_rejections(&self) -> &StepRejections {
        &self.ego_rejections
    }

    /// Mapping rejection histograms of the last sweep.
    pub fn mapping_rejections(&self) -> &StepRejections {
        &self.mapping_rejections
    }

    // ------------------------------------------------------------------
    // Live tuning
    // ------------------------------------------------------------------

    /// Set the voxel-filter leaf size of all three maps.
    pub fn set_leaf_size(&mut self, leaf_size: f64) -> Result<()> {
        self.edge_map.set_leaf_size(leaf_size)?;
        self.planar_map.set_leaf_size(leaf_size)?;
        self.blob_map.set_leaf_size(leaf_size)?;
        self.config.general.leaf_size = leaf_size;
        Ok(())
    }

    /// Enable or disable per-point motion compensation.
    pub fn set_undistortion(&mut self, undistortion: bool) {
        self.config.general.undistortion = undistortion;
    }

    /// Enable or disable planar-keypoint reuse during mapping.
    pub fn set_fast_slam(&mut self, fast_slam: bool) {
        self.config.general.fast_slam = fast_slam;
    }

    /// Enable or disable per-sweep diagnostics output.
    pub fn set_display_mode(&mut self, display_mode: bool) {
        self.config.general.display_mode = display_mode;
    }

    /// Set the divergence-guard distance.
    pub fn set_max_dist_between_two_frames(&mut self, distance: f64) -> Result<()> {
        if !(distance > 0.0) {
            return Err(SlamError::invalid(
                "max_dist_between_two_frames",
                format!("must be positive, got {distance}"),
            ));
        }
        self.config.general.max_dist_between_two_frames = distance;
        Ok(())
    }

    /// Set the map-query radius for frame-to-map matching.
    pub fn set_max_distance_for_icp_matching(&mut self, radius: f64) -> Result<()> {
        if !(radius > 0.0) {
            return Err(SlamError::invalid(
                "max_distance_for_icp_matching",
                format!("must be positive, got {radius}"),
            ));
        }
        self.config.general.max_distance_for_icp_matching = radius;
        Ok(())
    }

    /// Replace the keypoint-extraction parameters.
    pub fn set_keypoint_config(&mut self, keypoints: KeypointConfig) -> Result<()> {
        let candidate = SlamConfig {
            keypoints: keypoints.clone(),
            ..self.config.clone()
        };
        candidate.validate()?;
        self.ingestor
            .set_min_distance_to_sensor(keypoints.min_distance_to_sensor);
        self.extractor.set_config(keypoints.clone());
        self.config.keypoints = keypoints;
        Ok(())
    }

    /// Replace a matching parameter pack (selected by its step tag).
    pub fn set_matching_config(&mut self, matching: MatchingConfig) -> Result<()> {
        matching.validate()?;
        match matching.step {
            MatchStep::EgoMotion => self.config.ego_motion = matching,
            MatchStep::Mapping => self.config.mapping = matching,
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sweep processing
    // ------------------------------------------------------------------

    /// Ingest one sweep and commit its pose.
    ///
    /// The first dense sweep initializes the world frame; afterwards every
    /// call appends exactly one pose to the trajectory, re-using the previous
    /// pose when the update is skipped.
    pub fn process_sweep(&mut self, sweep: &[SweepPoint]) -> Result<SweepSummary> {
        self.ego_rejections.reset();
        self.mapping_rejections.reset();

        let mut scan_lines = self.ingestor.ingest(sweep);
        let keypoints = self.extractor.extract(&mut scan_lines.lines);

        let diagnostics = self.config.general.display_mode.then(|| {
            let mut labels = vec![PointLabel::Invalid; sweep.len()];
            for line in &scan_lines.lines {
                for point in line {
                    labels[point.source_index] = point.label;
                }
            }
            labels
        });

        if keypoints.is_under_dense() {
            warn!(
                "sweep {}: under-dense ({} edges, {} planars), skipping",
                self.frames_processed,
                keypoints.edges.len(),
                keypoints.planars.len()
            );
            return Ok(self.skip_sweep(SkipReason::UnderDenseSweep, &keypoints, diagnostics));
        }

        if self.frames_processed == 0 {
            return Ok(self.initialize_world(keypoints, diagnostics));
        }

        // Ego-motion against the previous sweep, seeded with the previous
        // relative transform (constant-velocity prior).
        let (trelative, ego_report) = estimate_ego_motion(
            &keypoints.edges,
            &keypoints.planars,
            &self.previous_edges,
            &self.previous_planars,
            self.trelative,
            &self.config.ego_motion,
            self.config.general.undistortion,
            self.config.general.max_dist_between_two_frames,
            &mut self.ego_rejections,
        );

        // Frame-to-map refinement, seeded with the dead-reckoned pose.
        let predicted = self.tworld.compose(&trelative);
        let mapping_planars = if self.config.general.fast_slam {
            &keypoints.planars
        } else {
            &keypoints.dense_planars
        };
        let (refined, mapping_report) = refine_with_map(
            &keypoints.edges,
            mapping_planars,
            &keypoints.blobs,
            &self.edge_map,
            &self.planar_map,
            &self.blob_map,
            predicted,
            self.tworld,
            &self.config.mapping,
            self.config.general.undistortion,
            self.config.general.max_dist_between_two_frames,
            self.config.general.max_distance_for_icp_matching,
            &mut self.mapping_rejections,
        );

        let ego_ok = ego_report.outcome == MatchOutcome::Refined;
        let mapping_ok = mapping_report.outcome == MatchOutcome::Refined;

        if !ego_ok && !mapping_ok {
            let reason = if ego_report.outcome == MatchOutcome::Diverged
                || mapping_report.outcome == MatchOutcome::Diverged
            {
                SkipReason::Diverged
            } else {
                SkipReason::InsufficientMatches
            };
            let mut summary = self.skip_sweep(reason, &keypoints, diagnostics);
            summary.ego_motion = Some(ego_report);
            summary.mapping = Some(mapping_report);
            // The keypoints themselves are sound; keep them as the matching
            // target for the next sweep.
            self.store_previous(keypoints);
            return Ok(summary);
        }

        let committed = if mapping_ok { refined } else { predicted };
        let prior_world = self.tworld;
        self.previous_tworld = prior_world;
        self.tworld = committed;
        self.trelative = prior_world.inverse().compose(&committed);
        self.trajectory.push(committed);
        self.frames_processed += 1;

        self.update_maps(&keypoints, prior_world, committed);
        self.store_previous(keypoints);

        debug!(
            "sweep {}: pose ({:.3}, {:.3}, {:.3}), ego {:?}, mapping {:?}",
            self.frames_processed,
            committed.tx,
            committed.ty,
            committed.tz,
            ego_report.outcome,
            mapping_report.outcome
        );

        Ok(SweepSummary {
            pose: self.tworld,
            relative: self.trelative,
            pose_updated: true,
            skip_reason: None,
            num_edges: self.previous_edges.len(),
            num_planars: self.previous_planars.len(),
            num_blobs: self.previous_blobs.len(),
            ego_motion: Some(ego_report),
            mapping: Some(mapping_report),
            diagnostics: diagnostics.map(|labels| SweepDiagnostics {
                labels,
                ego_rejections: self.ego_rejections.clone(),
                mapping_rejections: self.mapping_rejections.clone(),
            }),
        })
    }

    /// First dense sweep: fix the world frame at the sensor and seed the maps.
    fn initialize_world(
        &mut self,
        keypoints: ExtractedKeypoints,
        diagnostics: Option<Vec<PointLabel>>,
    ) -> SweepSummary {
        info!(
            "initializing world frame with {} edges, {} planars",
            keypoints.edges.len(),
            keypoints.planars.len()
        );
        self.tworld = Pose::identity();
        self.previous_tworld = Pose::identity();
        self.trelative = Pose::identity();
        self.trajectory.push(self.tworld);
        self.frames_processed = 1;

        self.update_maps(&keypoints, Pose::identity(), Pose::identity());
        self.store_previous(keypoints);

        SweepSummary {
            pose: self.tworld,
            relative: self.trelative,
            pose_updated: true,
            skip_reason: None,
            num_edges: self.previous_edges.len(),
            num_planars: self.previous_planars.len(),
            num_blobs: self.previous_blobs.len(),
            ego_motion: None,
            mapping: None,
            diagnostics: diagnostics.map(|labels| SweepDiagnostics {
                labels,
                ego_rejections: self.ego_rejections.clone(),
                mapping_rejections: self.mapping_rejections.clone(),
            }),
        }
    }

    /// Commit a skipped sweep: the pose is unchanged, the relative transform
    /// resets, and the previous pose is re-appended to the trajectory (when
    /// the world frame exists).
    fn skip_sweep(
        &mut self,
        reason: SkipReason,
        keypoints: &ExtractedKeypoints,
        diagnostics: Option<Vec<PointLabel>>,
    ) -> SweepSummary {
        self.trelative = Pose::identity();
        if self.frames_processed > 0 {
            self.trajectory.push(self.tworld);
            self.frames_processed += 1;
        }

        SweepSummary {
            pose: self.tworld,
            relative: self.trelative,
            pose_updated: false,
            skip_reason: Some(reason),
            num_edges: keypoints.edges.len(),
            num_planars: keypoints.planars.len(),
            num_blobs: keypoints.blobs.len(),
            ego_motion: None,
            mapping: None,
            diagnostics: diagnostics.map(|labels| SweepDiagnostics {
                labels,
                ego_rejections: self.ego_rejections.clone(),
                mapping_rejections: self.mapping_rejections.clone(),
            }),
        }
    }

    /// Transform the current keypoints into world coordinates and fold them
    /// into the rolling grids.
    fn update_maps(&mut self, keypoints: &ExtractedKeypoints, previous: Pose, current: Pose) {
        let anchor = current.translation();
        self.edge_map.recenter(&anchor);
        self.planar_map.recenter(&anchor);
        self.blob_map.recenter(&anchor);

        let interpolator = self
            .config
            .general
            .undistortion
            .then(|| TransformInterpolator::between(&previous, &current));

        let to_world = |cloud: &PointCloud| -> Vec<crate::core::LidarPoint> {
            cloud
                .iter()
                .map(|point| {
                    let mut world = *point;
                    world.position = match &interpolator {
                        Some(interp) => interp.transform_point(&point.position, point.time),
                        None => current.transform_point(&point.position),
                    };
                    world
                })
                .collect()
        };

        self.edge_map.insert(&to_world(&keypoints.edges));
        self.planar_map.insert(&to_world(&keypoints.planars));
        if !keypoints.blobs.is_empty() {
            self.blob_map.insert(&to_world(&keypoints.blobs));
        }
    }

    /// Advance the Previous* keypoint clouds.
    fn store_previous(&mut self, keypoints: ExtractedKeypoints) {
        self.previous_edges = keypoints.edges;
        self.previous_planars = keypoints.planars;
        self.previous_blobs = keypoints.blobs;
    }
}
