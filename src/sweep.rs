//! Sweep ingestion: re-ordering raw points into azimuth-sorted scan lines.
//!
//! The laser-id set is discovered on the first non-empty sweep, ordered by
//! mean elevation angle, and frozen for the lifetime of the ingestor. Points
//! carrying a laser id unseen during discovery are dropped with a warning.

use std::collections::HashMap;
use std::f64::consts::TAU;

use log::{debug, warn};

use crate::core::{LidarPoint, PointLabel, SweepPoint};

/// One sweep re-ordered into per-line sequences.
///
/// Line `l` holds the points of sorted laser `l` ordered by azimuth from the
/// sweep start; each point carries its sweep-relative acquisition time in
/// [0, 1] and its index into the caller's input slice (the reverse map from
/// input index to `(line, position)` is derived on demand).
#[derive(Debug, Clone, Default)]
pub struct ScanLines {
    /// Per-line point sequences, `lines.len()` equals the frozen laser count.
    pub lines: Vec<Vec<LidarPoint>>,
    /// Points dropped for NaN coordinates, short range, or unknown laser id.
    pub dropped: usize,
}

impl ScanLines {
    /// Total number of kept points.
    pub fn total_points(&self) -> usize {
        self.lines.iter().map(Vec::len).sum()
    }

    /// Whether no line holds any point.
    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(Vec::is_empty)
    }

    /// Derive the map from input index to `(line, position)`.
    pub fn source_mapping(&self) -> HashMap<usize, (usize, usize)> {
        let mut map = HashMap::with_capacity(self.total_points());
        for (line_idx, line) in self.lines.iter().enumerate() {
            for (pos, point) in line.iter().enumerate() {
                map.insert(point.source_index, (line_idx, pos));
            }
        }
        map
    }
}

/// Re-orders incoming sweeps by scan line and azimuth.
#[derive(Debug, Clone)]
pub struct SweepIngestor {
    /// Frozen mapping from raw laser id to sorted line index.
    laser_map: Option<HashMap<u32, usize>>,
    /// Points closer than this to the sensor are dropped (meters).
    min_distance_to_sensor: f64,
}

impl SweepIngestor {
    /// Create an ingestor with the given minimum sensor range.
    pub fn new(min_distance_to_sensor: f64) -> Self {
        Self {
            laser_map: None,
            min_distance_to_sensor,
        }
    }

    /// Number of scan lines, once discovered.
    pub fn laser_count(&self) -> Option<usize> {
        self.laser_map.as_ref().map(HashMap::len)
    }

    /// Update the minimum sensor range for subsequent sweeps.
    pub fn set_min_distance_to_sensor(&mut self, distance: f64) {
        self.min_distance_to_sensor = distance;
    }

    /// Re-order one sweep into azimuth-sorted scan lines.
    ///
    /// The first non-empty sweep fixes the laser-id set; lines are indexed by
    /// ascending mean elevation angle.
    pub fn ingest(&mut self, sweep: &[SweepPoint]) -> ScanLines {
        let mut dropped = 0usize;

        if self.laser_map.is_none() && !sweep.is_empty() {
            self.laser_map = Some(Self::discover_lasers(sweep));
        }

        let Some(laser_map) = &self.laser_map else {
            return ScanLines::default();
        };

        // The sweep starts at the azimuth of the first usable point; relative
        // time grows with azimuth over one full turn.
        let start_azimuth = sweep
            .iter()
            .find(|p| p.is_finite())
            .map(SweepPoint::azimuth)
            .unwrap_or(0.0);

        let mut lines: Vec<Vec<LidarPoint>> = vec![Vec::new(); laser_map.len()];
        for (source_index, point) in sweep.iter().enumerate() {
            if !point.is_finite() || point.range() < self.min_distance_to_sensor {
                dropped += 1;
                continue;
            }
            let Some(&line) = laser_map.get(&point.laser_id) else {
                warn!(
                    "dropping point with unknown laser id {} (laser set frozen at {})",
                    point.laser_id,
                    laser_map.len()
                );
                dropped += 1;
                continue;
            };

            let time = (point.azimuth() - start_azimuth).rem_euclid(TAU) / TAU;
            lines[line].push(LidarPoint {
                position: nalgebra::Vector3::new(point.x, point.y, point.z),
                intensity: point.intensity,
                scan_line: line,
                time,
                label: PointLabel::Unlabeled,
                source_index,
            });
        }

        for line in &mut lines {
            line.sort_by(|a, b| {
                a.time
                    .partial_cmp(&b.time)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        if dropped > 0 {
            debug!("ingest: dropped {dropped} of {} points", sweep.len());
        }

        ScanLines { lines, dropped }
    }

    /// Order lasers by mean elevation angle and freeze the mapping.
    fn discover_lasers(sweep: &[SweepPoint]) -> HashMap<u32, usize> {
        let mut elevation_sums: HashMap<u32, (f64, usize)> = HashMap::new();
        for point in sweep {
            if !point.is_finite() {
                continue;
            }
            let horizontal = (point.x * point.x + point.y * point.y).sqrt();
            let elevation = point.z.atan2(horizontal);
            let entry = elevation_sums.entry(point.laser_id).or_insert((0.0, 0));
            entry.0 += elevation;
            entry.1 += 1;
        }

        let mut ordered: Vec<(u32, f64)> = elevation_sums
            .into_iter()
            .map(|(id, (sum, count))| (id, sum / count.max(1) as f64))
            .collect();
        ordered.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        debug!("discovered {} scan lines", ordered.len());
        ordered
            .into_iter()
            .enumerate()
            .map(|(line, (id, _))| (id, line))
            .collect()
    }
}
