//! End-to-end scenarios on synthetic spinning-LiDAR data.

mod common;

use common::{
    distorted_sweep, sweep_from, Scene, CORRIDOR_ELEVATIONS, ROOM_ELEVATIONS,
};
use gati_slam::{LidarOdometry, Pose, SlamConfig, SweepPoint};
use nalgebra::Vector3;

fn room_scene() -> Scene {
    Scene::box_room(Vector3::new(-5.0, -5.0, 0.0), Vector3::new(5.0, 5.0, 3.0))
}

fn sensor_pose(x: f64, y: f64, yaw: f64) -> Pose {
    Pose::new(0.0, 0.0, yaw, x, y, 1.0)
}

/// Property 1: resubmitting the same stationary sweep keeps the estimate at
/// identity over a long run.
#[test]
fn identity_sweeps_do_not_drift() {
    let scene = room_scene();
    let sweep = sweep_from(&scene, &sensor_pose(0.0, 0.0, 0.0), &ROOM_ELEVATIONS, 240);

    let mut odometry = LidarOdometry::with_defaults();
    for _ in 0..100 {
        let summary = odometry.process_sweep(&sweep).unwrap();
        assert!(summary.pose_updated);
        assert!(
            summary.relative.translation_norm() < 1e-4,
            "relative drift {:?}",
            summary.relative
        );
    }

    let pose = odometry.world_transform();
    assert!(pose.translation_norm() < 1e-4, "world drift {pose:?}");
    assert!(pose.rx.abs() < 1e-4 && pose.ry.abs() < 1e-4 && pose.rz.abs() < 1e-4);
    assert_eq!(odometry.trajectory().len(), 100);
}

/// Property 2: a pure translation between two sweeps is recovered within the
/// leaf size, up to half the inter-frame divergence bound.
#[test]
fn pure_translation_recovered() {
    // A long room so the end walls stay in view while the sensor advances.
    let scene = Scene::box_room(Vector3::new(-5.0, -5.0, 0.0), Vector3::new(25.0, 5.0, 3.0));
    let leaf = SlamConfig::default().general.leaf_size;

    for dx in [0.5, 1.2] {
        let mut odometry = LidarOdometry::with_defaults();
        odometry
            .process_sweep(&sweep_from(
                &scene,
                &sensor_pose(0.0, 0.0, 0.0),
                &ROOM_ELEVATIONS,
                360,
            ))
            .unwrap();
        let summary = odometry
            .process_sweep(&sweep_from(
                &scene,
                &sensor_pose(dx, 0.0, 0.0),
                &ROOM_ELEVATIONS,
                360,
            ))
            .unwrap();

        assert!(summary.pose_updated, "dx = {dx}");
        assert!(
            (summary.relative.tx - dx).abs() <= leaf,
            "dx = {dx}: recovered {:.3}",
            summary.relative.tx
        );
        assert!(summary.relative.ty.abs() <= leaf);
        assert!(summary.relative.tz.abs() <= leaf);
    }
}

/// Property 3: a pure yaw between two sweeps is recovered.
#[test]
fn pure_rotation_recovered() {
    let scene = room_scene();
    let theta = 10.0_f64.to_radians();

    let mut odometry = LidarOdometry::with_defaults();
    odometry
        .process_sweep(&sweep_from(
            &scene,
            &sensor_pose(0.0, 0.0, 0.0),
            &ROOM_ELEVATIONS,
            360,
        ))
        .unwrap();
    let summary = odometry
        .process_sweep(&sweep_from(
            &scene,
            &sensor_pose(0.0, 0.0, theta),
            &ROOM_ELEVATIONS,
            360,
        ))
        .unwrap();

    assert!(summary.pose_updated);
    assert!(
        (summary.relative.rz - theta).abs() < 0.02,
        "recovered yaw {:.4} vs {:.4}",
        summary.relative.rz,
        theta
    );
    assert!(summary.relative.translation_norm() < 0.3);
}

/// S1: flat floor and walls, stationary sensor, ten sweeps.
#[test]
fn s1_stationary_room() {
    let scene = room_scene();
    let sweep = sweep_from(&scene, &sensor_pose(0.0, 0.0, 0.0), &ROOM_ELEVATIONS, 360);

    let mut odometry = LidarOdometry::with_defaults();
    for _ in 0..10 {
        odometry.process_sweep(&sweep).unwrap();
    }
    assert!(odometry.world_transform().translation_norm() <= 1e-3);
}

/// S2: floor plus two perpendicular walls, +0.5 m along x per sweep.
#[test]
fn s2_forward_motion() {
    let scene = Scene {
        rects: vec![
            // Floor.
            common::Rect {
                axis: 2,
                value: 0.0,
                min: [-6.0, -7.0],
                max: [26.0, 7.0],
            },
            // Side wall at y = 5.
            common::Rect {
                axis: 1,
                value: 5.0,
                min: [-6.0, 0.0],
                max: [26.0, 3.0],
            },
            // End wall at x = 15, perpendicular to the motion.
            common::Rect {
                axis: 0,
                value: 15.0,
                min: [-7.0, 0.0],
                max: [7.0, 3.0],
            },
        ],
    };

    let mut odometry = LidarOdometry::with_defaults();
    for k in 0..=20 {
        let x = 0.5 * k as f64;
        let summary = odometry
            .process_sweep(&sweep_from(
                &scene,
                &sensor_pose(x, 0.0, 0.0),
                &ROOM_ELEVATIONS,
                720,
            ))
            .unwrap();
        assert!(summary.pose_updated, "sweep {k} skipped");
    }

    let tx = odometry.world_transform().tx;
    assert!((9.5..=10.5).contains(&tx), "final tx {tx:.3}");
}

/// S3: a narrow corridor with the sensor yawing 2° per sweep.
#[test]
fn s3_corridor_yaw() {
    let scene = Scene::box_room(Vector3::new(-10.0, -1.5, 0.0), Vector3::new(10.0, 1.5, 3.0));

    let mut config = SlamConfig::default();
    config.keypoints.min_distance_to_sensor = 1.0;
    let mut odometry = LidarOdometry::new(config).unwrap();

    for k in 0..=30 {
        let yaw = (2.0 * k as f64).to_radians();
        let summary = odometry
            .process_sweep(&sweep_from(
                &scene,
                &Pose::new(0.0, 0.0, yaw, 0.0, 0.0, 1.5),
                &CORRIDOR_ELEVATIONS,
                720,
            ))
            .unwrap();
        assert!(summary.pose_updated, "sweep {k} skipped");
    }

    let yaw = odometry.world_transform().rz.to_degrees();
    assert!((58.0..=62.0).contains(&yaw), "final yaw {yaw:.2}°");
}

/// S4: an empty sweep mid-run preserves the pose and appends one trajectory
/// entry re-using the previous pose.
#[test]
fn s4_empty_sweep_mid_run() {
    let scene = room_scene();
    let sweep = sweep_from(&scene, &sensor_pose(0.0, 0.0, 0.0), &ROOM_ELEVATIONS, 360);

    let mut odometry = LidarOdometry::with_defaults();
    for _ in 0..3 {
        odometry.process_sweep(&sweep).unwrap();
    }
    let pose_before = odometry.world_transform();
    let len_before = odometry.trajectory().len();

    let empty: Vec<SweepPoint> = Vec::new();
    let summary = odometry.process_sweep(&empty).unwrap();
    assert!(!summary.pose_updated);
    assert!(summary.skip_reason.is_some());
    assert_eq!(odometry.trajectory().len(), len_before + 1);
    let pose_after = odometry.world_transform();
    assert!((pose_after.translation() - pose_before.translation()).norm() < 1e-12);
    assert_eq!(
        odometry.trajectory().last().map(|p| p.tx),
        Some(pose_before.tx)
    );

    // The run continues normally afterwards.
    let summary = odometry.process_sweep(&sweep).unwrap();
    assert!(summary.pose_updated);
    assert!(odometry.world_transform().translation_norm() < 1e-3);
}

/// S5: a 30 m jump between otherwise identical sweeps trips the guards; the
/// pose is preserved and the relative transform resets to identity.
#[test]
fn s5_jump_is_rejected() {
    let scene = room_scene();
    let sweep = sweep_from(&scene, &sensor_pose(0.0, 0.0, 0.0), &ROOM_ELEVATIONS, 360);

    let mut odometry = LidarOdometry::with_defaults();
    odometry.process_sweep(&sweep).unwrap();

    let jumped: Vec<SweepPoint> = sweep
        .iter()
        .map(|p| SweepPoint::new(p.x + 30.0, p.y, p.z, p.intensity, p.laser_id))
        .collect();
    let summary = odometry.process_sweep(&jumped).unwrap();

    assert!(!summary.pose_updated, "jump must not update the pose");
    assert!(summary.skip_reason.is_some());
    assert!(summary.relative.translation_norm() < 1e-12);
    assert!(odometry.world_transform().translation_norm() < 1e-9);
    assert_eq!(odometry.trajectory().len(), 2);
}

/// Property 9: with constant-velocity motion, undistortion strictly lowers
/// the converged residuals.
#[test]
fn undistortion_lowers_residuals() {
    let scene = room_scene();
    let velocity = 0.3;
    let sweeps: Vec<Vec<SweepPoint>> = (0..6)
        .map(|k| {
            let start = sensor_pose(velocity * k as f64, 0.0, 0.0);
            let end = sensor_pose(velocity * (k + 1) as f64, 0.0, 0.0);
            distorted_sweep(&scene, &start, &end, &ROOM_ELEVATIONS, 360)
        })
        .collect();

    let run = |undistortion: bool| -> f64 {
        let mut odometry = LidarOdometry::with_defaults();
        odometry.set_undistortion(undistortion);
        let mut normalized_cost = 0.0;
        for sweep in &sweeps {
            let summary = odometry.process_sweep(sweep).unwrap();
            if let Some(report) = &summary.mapping {
                if report.total_terms() > 0 {
                    normalized_cost = report.final_cost / report.total_terms() as f64;
                }
            }
        }
        normalized_cost
    };

    let distorted = run(false);
    let compensated = run(true);
    assert!(
        compensated < distorted,
        "undistorted residual {compensated:.6} should beat {distorted:.6}"
    );
}
