//! Synthetic spinning-LiDAR scenes for the end-to-end scenarios.
//!
//! A scene is a set of axis-aligned rectangles; sweeps are generated by
//! casting one ray per (laser, azimuth step) from the sensor pose and
//! expressing the hits in the sensor frame, exactly as a driver would
//! deliver them.

use gati_slam::{Pose, SweepPoint};
use nalgebra::Vector3;

/// An axis-aligned rectangle: the plane `p[axis] == value`, bounded on the
/// two remaining axes.
pub struct Rect {
    pub axis: usize,
    pub value: f64,
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl Rect {
    fn other_axes(&self) -> (usize, usize) {
        match self.axis {
            0 => (1, 2),
            1 => (0, 2),
            _ => (0, 1),
        }
    }

    /// Ray-rectangle intersection distance, if any.
    fn raycast(&self, origin: &Vector3<f64>, dir: &Vector3<f64>) -> Option<f64> {
        if dir[self.axis].abs() < 1e-12 {
            return None;
        }
        let t = (self.value - origin[self.axis]) / dir[self.axis];
        if t <= 1e-9 {
            return None;
        }
        let hit = origin + t * dir;
        let (a, b) = self.other_axes();
        if hit[a] < self.min[0] || hit[a] > self.max[0] || hit[b] < self.min[1] || hit[b] > self.max[1]
        {
            return None;
        }
        Some(t)
    }
}

/// A world made of axis-aligned rectangles.
pub struct Scene {
    pub rects: Vec<Rect>,
}

impl Scene {
    /// A closed box room spanning `min..max`.
    pub fn box_room(min: Vector3<f64>, max: Vector3<f64>) -> Self {
        let mut rects = Vec::new();
        for axis in 0..3 {
            let (a, b) = match axis {
                0 => (1, 2),
                1 => (0, 2),
                _ => (0, 1),
            };
            for value in [min[axis], max[axis]] {
                rects.push(Rect {
                    axis,
                    value,
                    min: [min[a], min[b]],
                    max: [max[a], max[b]],
                });
            }
        }
        Self { rects }
    }

    /// Nearest surface hit along a ray.
    pub fn raycast(&self, origin: &Vector3<f64>, dir: &Vector3<f64>) -> Option<f64> {
        self.rects
            .iter()
            .filter_map(|r| r.raycast(origin, dir))
            .min_by(|a, b| a.partial_cmp(b).unwrap())
    }
}

/// Laser elevations (degrees) for a room-scale scene: four beams sweep the
/// floor in close rings, the rest sweep the walls.
pub const ROOM_ELEVATIONS: [f64; 10] = [
    -19.0, -17.0, -15.0, -13.0, -8.0, -4.0, 0.0, 4.0, 8.0, 12.0,
];

/// Laser elevations (degrees) for a narrow corridor: steep beams reach the
/// close floor and ceiling, shallow ones the walls.
pub const CORRIDOR_ELEVATIONS: [f64; 10] = [
    -45.0, -40.0, -35.0, -30.0, -10.0, -5.0, 0.0, 5.0, 10.0, 15.0,
];

/// One sweep seen from a stationary sensor pose.
pub fn sweep_from(
    scene: &Scene,
    pose: &Pose,
    elevations: &[f64],
    azimuth_steps: usize,
) -> Vec<SweepPoint> {
    distorted_sweep(scene, pose, pose, elevations, azimuth_steps)
}

/// One sweep acquired while the sensor moves from `start` (sweep begin) to
/// `end` (sweep end); each azimuth column is measured from the interpolated
/// pose, producing a motion-distorted cloud.
pub fn distorted_sweep(
    scene: &Scene,
    start: &Pose,
    end: &Pose,
    elevations: &[f64],
    azimuth_steps: usize,
) -> Vec<SweepPoint> {
    let mut sweep = Vec::new();
    for step in 0..azimuth_steps {
        let time = step as f64 / azimuth_steps as f64;
        let pose = interpolate(start, end, time);
        let rotation = pose.rotation();
        let origin = pose.translation();
        let azimuth = std::f64::consts::TAU * time;

        for (laser, elevation_deg) in elevations.iter().enumerate() {
            let elevation = elevation_deg.to_radians();
            let dir_sensor = Vector3::new(
                elevation.cos() * azimuth.cos(),
                elevation.cos() * azimuth.sin(),
                elevation.sin(),
            );
            let dir = rotation * dir_sensor;
            let Some(t) = scene.raycast(&origin, &dir) else {
                continue;
            };
            let hit = origin + t * dir;
            let local = rotation.transpose() * (hit - origin);
            sweep.push(SweepPoint::new(
                local.x,
                local.y,
                local.z,
                1.0,
                laser as u32,
            ));
        }
    }
    sweep
}

fn interpolate(start: &Pose, end: &Pose, t: f64) -> Pose {
    Pose::new(
        start.rx + t * (end.rx - start.rx),
        start.ry + t * (end.ry - start.ry),
        start.rz + t * (end.rz - start.rz),
        start.tx + t * (end.tx - start.tx),
        start.ty + t * (end.ty - start.ty),
        start.tz + t * (end.tz - start.tz),
    )
}
