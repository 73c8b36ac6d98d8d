//! Per-point geometric descriptors along one scan line.
//!
//! Each descriptor array is parallel to the line's points. The sharpness
//! score is the sine of the angle formed by the central point and the means
//! of its two symmetric neighborhoods: colinear geometry scores 0, a right
//! corner scores 1.

use nalgebra::Vector3;

use crate::core::LidarPoint;

use super::config::KeypointConfig;

/// Range ratio between neighbors above which the surface is treated as
/// roughly parallel to the beam and both sides are invalidated.
const PARALLEL_BEAM_RANGE_RATIO: f64 = 1.3;

/// Saliency below this is indistinguishable from a duplicated return and the
/// point is invalidated.
const SALIENCY_NOISE_FLOOR: f64 = 1e-9;

/// Descriptors of one scan line, arrays parallel to its points.
#[derive(Debug, Clone, Default)]
pub struct LineDescriptors {
    /// Sine of the neighborhood angle, in [0, 1].
    pub sin_angle: Vec<f64>,
    /// Signed depth discontinuity to the nearest neighbor along the line;
    /// negative when this point is the far side.
    pub depth_gap: Vec<f64>,
    /// Expected azimuthal spacing at this range.
    pub length_resolution: Vec<f64>,
    /// Norm of the symmetric second difference.
    pub saliency: Vec<f64>,
    /// False once a point is rejected by the occlusion / parallel-beam /
    /// noise filters or sits too close to a line end.
    pub valid: Vec<bool>,
}

impl LineDescriptors {
    /// Compute descriptors and apply the invalidation filters for one line.
    pub fn compute(line: &[LidarPoint], config: &KeypointConfig) -> Self {
        let n = line.len();
        let w = config.neighbor_width;

        let mut desc = Self {
            sin_angle: vec![0.0; n],
            depth_gap: vec![0.0; n],
            length_resolution: vec![0.0; n],
            saliency: vec![0.0; n],
            valid: vec![false; n],
        };
        if n < 2 * w + 1 {
            return desc;
        }

        for i in w..n - w {
            let p = line[i].position;
            desc.length_resolution[i] = config.angle_resolution * p.norm();

            // Means of the two symmetric neighborhoods of half-width W.
            let mut left = Vector3::zeros();
            let mut right = Vector3::zeros();
            for k in 1..=w {
                left += line[i - k].position;
                right += line[i + k].position;
            }
            left /= w as f64;
            right /= w as f64;

            let u = p - left;
            let v = right - p;
            let norms = u.norm() * v.norm();
            desc.sin_angle[i] = if norms > f64::EPSILON {
                (u.cross(&v).norm() / norms).clamp(0.0, 1.0)
            } else {
                0.0
            };

            // Signed gap to the nearest neighbor with the larger jump;
            // negative means the neighbor is closer than this point.
            let range = p.norm();
            let gap_prev = line[i - 1].position.norm() - range;
            let gap_next = line[i + 1].position.norm() - range;
            desc.depth_gap[i] = if gap_prev.abs() >= gap_next.abs() {
                gap_prev
            } else {
                gap_next
            };

            desc.saliency[i] =
                (line[i - 1].position - 2.0 * p + line[i + 1].position).norm();

            desc.valid[i] = true;
        }

        desc.invalidate_bad_points(line, config);
        desc
    }

    /// Apply the occlusion, parallel-beam, and noise filters.
    fn invalidate_bad_points(&mut self, line: &[LidarPoint], config: &KeypointConfig) {
        let n = line.len();
        let w = config.neighbor_width;
        if n < 2 * w + 1 {
            return;
        }

        for i in w..n - w {
            let range = line[i].position.norm();

            // Occlusion boundary: the far side of a large depth step would
            // match against empty space, so only the near side survives.
            if self.depth_gap[i].abs() > config.edge_depth_gap_threshold
                && self.depth_gap[i] < 0.0
            {
                self.valid[i] = false;
                continue;
            }

            // Surface roughly parallel to the beam: consecutive ranges blow
            // up relative to each other on both sides of the grazing point.
            for neighbor in [&line[i - 1], &line[i + 1]] {
                let other = neighbor.position.norm();
                let ratio = range.max(other) / range.min(other).max(f64::EPSILON);
                if ratio > PARALLEL_BEAM_RANGE_RATIO {
                    self.valid[i] = false;
                }
            }
            if !self.valid[i] {
                continue;
            }

            if self.saliency[i] < SALIENCY_NOISE_FLOOR {
                self.valid[i] = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PointLabel;
    use approx::assert_relative_eq;

    fn make_point(position: Vector3<f64>, index: usize) -> LidarPoint {
        LidarPoint {
            position,
            intensity: 0.0,
            scan_line: 0,
            time: index as f64 / 100.0,
            label: PointLabel::Unlabeled,
            source_index: index,
        }
    }

    /// A ring of points at constant range, as a spinning beam sees a
    /// cylindrical wall. Colinear-ish geometry, low sharpness.
    fn ring_line(count: usize, radius: f64) -> Vec<LidarPoint> {
        (0..count)
            .map(|i| {
                let a = 0.007 * i as f64;
                make_point(Vector3::new(radius * a.cos(), radius * a.sin(), 0.0), i)
            })
            .collect()
    }

    #[test]
    fn test_ends_are_invalid() {
        let config = KeypointConfig::default();
        let line = ring_line(30, 10.0);
        let desc = LineDescriptors::compute(&line, &config);
        for i in 0..config.neighbor_width {
            assert!(!desc.valid[i]);
            assert!(!desc.valid[29 - i]);
        }
    }

    #[test]
    fn test_smooth_ring_scores_low() {
        let config = KeypointConfig::default();
        let line = ring_line(40, 10.0);
        let desc = LineDescriptors::compute(&line, &config);
        for i in config.neighbor_width..40 - config.neighbor_width {
            assert!(
                desc.sin_angle[i] < 0.1,
                "ring point {i} scored {}",
                desc.sin_angle[i]
            );
            assert!(desc.valid[i], "ring point {i} unexpectedly invalid");
        }
    }

    #[test]
    fn test_corner_scores_high() {
        let config = KeypointConfig::default();
        // Two straight segments meeting at a right angle at index 8.
        let mut line = Vec::new();
        for i in 0..=8 {
            line.push(make_point(Vector3::new(i as f64 * 0.1, 0.0, 0.0), i));
        }
        for i in 1..=8 {
            line.push(make_point(Vector3::new(0.8, i as f64 * 0.1, 0.0), 8 + i));
        }
        let desc = LineDescriptors::compute(&line, &config);
        assert!(
            desc.sin_angle[8] > 0.9,
            "corner scored {}",
            desc.sin_angle[8]
        );
        // Points well inside a straight segment stay flat.
        assert!(desc.sin_angle[4] < 0.3);
    }

    #[test]
    fn test_occlusion_invalidates_far_side_only() {
        let config = KeypointConfig::default();
        // Near wall at 10 m, far wall at 11 m: a 1 m step at the boundary.
        let mut line = Vec::new();
        for i in 0..24 {
            let radius = if i < 12 { 10.0 } else { 11.0 };
            let a = 0.007 * i as f64;
            line.push(make_point(
                Vector3::new(radius * a.cos(), radius * a.sin(), 0.0),
                i,
            ));
        }
        let desc = LineDescriptors::compute(&line, &config);
        // Index 12 (first far point) sees a closer neighbor: invalid.
        assert!(!desc.valid[12]);
        // Index 11 (last near point) is the near side: it survives.
        assert!(desc.valid[11]);
    }

    #[test]
    fn test_length_resolution_scales_with_range() {
        let config = KeypointConfig::default();
        let line = ring_line(30, 20.0);
        let desc = LineDescriptors::compute(&line, &config);
        let i = 15;
        assert_relative_eq!(
            desc.length_resolution[i],
            config.angle_resolution * 20.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_duplicated_returns_invalidated() {
        let config = KeypointConfig::default();
        let mut line = ring_line(30, 10.0);
        // Duplicate one interior point exactly over its neighbors.
        let p = line[14].position;
        line[15].position = p;
        line[13].position = p;
        let desc = LineDescriptors::compute(&line, &config);
        assert!(!desc.valid[14]);
    }
}
