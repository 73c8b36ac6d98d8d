//! Keypoint selection: labeling edge, planar, and blob points per scan line.

use log::debug;

use crate::core::math::{covariance, mean, SortedEigen};
use crate::core::{LidarPoint, PointCloud, PointLabel};

use super::config::{KeypointConfig, MIN_KEYPOINTS_PER_CATEGORY};
use super::descriptors::LineDescriptors;

/// Keypoints selected from one sweep.
#[derive(Debug, Clone, Default)]
pub struct ExtractedKeypoints {
    /// Edge keypoints (high sharpness).
    pub edges: PointCloud,
    /// Planar keypoints (low sharpness), capped and spaced per line.
    pub planars: PointCloud,
    /// Blob keypoints (isotropic neighborhoods); empty unless `use_blob`.
    pub blobs: PointCloud,
    /// Every valid low-sharpness point, uncapped. Used by the map refiner
    /// when it is not reusing the ego-motion planar set.
    pub dense_planars: PointCloud,
}

impl ExtractedKeypoints {
    /// Whether the sweep yielded too few keypoints to estimate motion from.
    pub fn is_under_dense(&self) -> bool {
        self.edges.len() < MIN_KEYPOINTS_PER_CATEGORY
            || self.planars.len() < MIN_KEYPOINTS_PER_CATEGORY
    }
}

/// Labels every point of a sweep and collects bounded keypoint sets.
#[derive(Debug, Clone)]
pub struct KeypointExtractor {
    config: KeypointConfig,
}

impl KeypointExtractor {
    /// Create an extractor with the given configuration.
    pub fn new(config: KeypointConfig) -> Self {
        Self { config }
    }

    /// The current configuration.
    pub fn config(&self) -> &KeypointConfig {
        &self.config
    }

    /// Replace the configuration.
    pub fn set_config(&mut self, config: KeypointConfig) {
        self.config = config;
    }

    /// Label every point of the sweep and collect the keypoint clouds.
    ///
    /// Labels are written back into `lines` so callers can inspect the full
    /// classification; the returned clouds hold copies of the selected
    /// points.
    pub fn extract(&self, lines: &mut [Vec<LidarPoint>]) -> ExtractedKeypoints {
        let mut out = ExtractedKeypoints::default();

        for line in lines.iter_mut() {
            let desc = LineDescriptors::compute(line, &self.config);
            for (point, valid) in line.iter_mut().zip(desc.valid.iter()) {
                if !valid {
                    point.label = PointLabel::Invalid;
                }
            }

            self.select_edges(line, &desc, &mut out.edges);
            self.select_planars(line, &desc, &mut out.planars, &mut out.dense_planars);
            if self.config.use_blob {
                self.select_blobs(line, &desc, &mut out.blobs);
            }
        }

        debug!(
            "extracted {} edges, {} planars, {} blobs",
            out.edges.len(),
            out.planars.len(),
            out.blobs.len()
        );
        out
    }

    /// Walk valid points from the sharpest down and pick edges, suppressing
    /// the ±W neighborhood of every winner.
    fn select_edges(&self, line: &mut [LidarPoint], desc: &LineDescriptors, edges: &mut PointCloud) {
        let w = self.config.neighbor_width;
        let mut order: Vec<usize> = (0..line.len()).filter(|&i| desc.valid[i]).collect();
        order.sort_by(|&a, &b| {
            desc.sin_angle[b]
                .partial_cmp(&desc.sin_angle[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut suppressed = vec![false; line.len()];
        let mut selected = 0usize;
        for &i in &order {
            if desc.sin_angle[i] < self.config.edge_sin_angle_threshold {
                break;
            }
            if suppressed[i] || selected >= self.config.max_edge_per_scan_line {
                line[i].label = PointLabel::EdgeCandidate;
                continue;
            }
            line[i].label = PointLabel::EdgeSelected;
            edges.push(line[i]);
            selected += 1;
            suppress_around(&mut suppressed, i, w);
        }
    }

    /// Walk valid points from the flattest up and pick planars; every valid
    /// point under the threshold also lands in the dense set.
    fn select_planars(
        &self,
        line: &mut [LidarPoint],
        desc: &LineDescriptors,
        planars: &mut PointCloud,
        dense: &mut PointCloud,
    ) {
        let w = self.config.neighbor_width;
        let mut order: Vec<usize> = (0..line.len()).filter(|&i| desc.valid[i]).collect();
        order.sort_by(|&a, &b| {
            desc.sin_angle[a]
                .partial_cmp(&desc.sin_angle[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut suppressed = vec![false; line.len()];
        let mut selected = 0usize;
        for &i in &order {
            if desc.sin_angle[i] > self.config.plane_sin_angle_threshold {
                break;
            }
            if matches!(
                line[i].label,
                PointLabel::EdgeSelected | PointLabel::EdgeCandidate
            ) {
                continue;
            }
            dense.push(line[i]);
            if suppressed[i] || selected >= self.config.max_planar_per_scan_line {
                line[i].label = PointLabel::PlanarCandidate;
                continue;
            }
            line[i].label = PointLabel::PlanarSelected;
            planars.push(line[i]);
            selected += 1;
            suppress_around(&mut suppressed, i, w);
        }
    }

    /// Pick blob points by the sphericity of the ±W neighborhood covariance.
    fn select_blobs(&self, line: &mut [LidarPoint], desc: &LineDescriptors, blobs: &mut PointCloud) {
        let w = self.config.neighbor_width;
        if line.len() < 2 * w + 1 {
            return;
        }

        let mut suppressed = vec![false; line.len()];
        let mut selected = 0usize;
        for i in w..line.len() - w {
            if !desc.valid[i]
                || suppressed[i]
                || line[i].label != PointLabel::Unlabeled
                || selected >= self.config.max_planar_per_scan_line
            {
                continue;
            }

            let neighborhood: Vec<_> =
                line[i - w..=i + w].iter().map(|p| p.position).collect();
            let center = mean(&neighborhood);
            let eig = SortedEigen::of(&covariance(&neighborhood, &center));
            if eig.max() <= f64::EPSILON {
                continue;
            }
            let sphericity = eig.min() / eig.max();
            if sphericity >= self.config.sphericity_threshold {
                line[i].label = PointLabel::Blob;
                blobs.push(line[i]);
                selected += 1;
                suppress_around(&mut suppressed, i, w);
            }
        }
    }
}

/// Mark `center ± 1..=width` as unavailable for further selection.
fn suppress_around(suppressed: &mut [bool], center: usize, width: usize) {
    let lo = center.saturating_sub(width);
    let hi = (center + width).min(suppressed.len().saturating_sub(1));
    for s in &mut suppressed[lo..=hi] {
        *s = true;
    }
}
