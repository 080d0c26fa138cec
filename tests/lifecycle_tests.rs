// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for acquisition ordering and unwind

mod common;

use camera_bridge::backends::camera::virtual_camera::{
    VirtualCamera, VirtualCameraConfig, VirtualDeviceConfig,
};
use camera_bridge::backends::camera::{
    CapturePipeline, DeviceCatalog, PixelFormat, Resolution, StreamSettings,
};
use camera_bridge::errors::BackendError;
use camera_bridge::{
    BridgeError, CaptureSettings, LifecycleCoordinator, LifecycleState, ResourceKind,
};
use common::{CallLog, MockCamera, MockGpu, calls, count, coordinator, new_log, position};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// Acquire call paired with the release call that undoes it
const PAIRS: &[(&str, &str)] = &[
    ("camera:open_session", "camera:close_session"),
    ("camera:create_output_stream", "camera:disconnect_stream"),
    ("gpu:retain", "gpu:release"),
    ("gpu:connect", "gpu:disconnect"),
    ("camera:repeat", "camera:stop_repeat"),
];

fn acquire_for(release: &str) -> Option<&'static str> {
    PAIRS
        .iter()
        .find(|(_, rel)| *rel == release)
        .map(|(acq, _)| *acq)
}

fn assert_no_leaks(log: &CallLog) {
    for (acquire, release) in PAIRS {
        assert_eq!(
            count(log, acquire),
            count(log, release),
            "{} and {} are unbalanced: {:?}",
            acquire,
            release,
            calls(log)
        );
    }
    assert_eq!(count(log, "gpu:push"), count(log, "gpu:pop"));
}

#[test]
fn test_start_reaches_capturing() {
    let log = new_log();
    let mut coordinator = coordinator(&log, &[]);

    let active = coordinator.start().unwrap();

    assert_eq!(coordinator.state(), LifecycleState::Capturing);
    assert_eq!(active.resolution, Resolution::new(1280, 720));
    assert_eq!(coordinator.resolution(), Some(Resolution::new(1280, 720)));
    assert_eq!(active.settings.pixel_format, PixelFormat::NV12);
    assert!(active.settings.metadata_enabled);
    assert!(active.endpoint().has_consumer());
    assert_eq!(
        coordinator.unwind_kinds(),
        vec![
            ResourceKind::CaptureSession,
            ResourceKind::OutputStream,
            ResourceKind::GpuContext,
            ResourceKind::ConsumerConnection,
            ResourceKind::RepeatingRequest,
        ]
    );

    assert!(coordinator.shutdown().is_clean());
}

#[test]
fn test_shutdown_pops_five_entries_in_reverse() {
    let log = new_log();
    let mut coordinator = coordinator(&log, &[]);
    coordinator.start().unwrap();
    let setup_len = calls(&log).len();

    let report = coordinator.shutdown();

    assert!(report.is_clean());
    assert_eq!(coordinator.state(), LifecycleState::TornDown);
    assert!(coordinator.unwind_kinds().is_empty());
    assert_eq!(
        calls(&log)[setup_len..],
        [
            "camera:stop_repeat",
            "camera:wait_for_idle",
            "gpu:disconnect",
            "gpu:release",
            "camera:disconnect_stream",
            "camera:close_session",
        ]
    );
}

#[test]
fn test_teardown_is_reverse_of_setup() {
    let log = new_log();
    let mut coordinator = coordinator(&log, &[]);
    coordinator.start().unwrap();
    coordinator.shutdown();

    let entries = calls(&log);
    let acquired: Vec<&str> = entries
        .iter()
        .map(String::as_str)
        .filter(|e| PAIRS.iter().any(|(acq, _)| acq == e))
        .collect();
    let mut released: Vec<&str> = entries
        .iter()
        .filter_map(|e| acquire_for(e))
        .collect();
    released.reverse();

    assert_eq!(acquired.len(), 5);
    assert_eq!(acquired, released);
}

#[test]
fn test_no_leak_at_every_failure_point() {
    let cases: &[(&str, &str)] = &[
        ("open_session", "SessionCreateError"),
        ("create_output_stream", "StreamCreateError"),
        ("init", "GpuInitError"),
        ("retain", "GpuInitError"),
        ("push", "ConsumerConnectError"),
        ("connect", "ConsumerConnectError"),
        ("request_control", "MissingCapability"),
        ("create_request", "RepeatStartError"),
        ("repeat", "RepeatStartError"),
    ];

    for (failing, kind) in cases {
        let log = new_log();
        let mut coordinator = coordinator(&log, &[*failing]);

        let err = coordinator.start().unwrap_err();

        assert_eq!(err.error.kind(), *kind, "failing step {}", failing);
        assert!(err.warnings.is_empty(), "failing step {}", failing);
        assert_eq!(coordinator.state(), LifecycleState::TornDown);
        assert!(coordinator.unwind_kinds().is_empty());
        assert_no_leaks(&log);
    }
}

#[test]
fn test_no_devices_fails_before_gpu() {
    let log = new_log();
    let mut coordinator = LifecycleCoordinator::new(
        Box::new(MockCamera::new(log.clone(), &[]).without_devices()),
        Box::new(MockGpu::new(log.clone(), &[])),
        CaptureSettings::default(),
    );

    let err = coordinator.start().unwrap_err();

    assert_eq!(err.error, BridgeError::NoDeviceFound);
    assert!(calls(&log).iter().all(|e| !e.starts_with("gpu:")));
    assert_eq!(count(&log, "camera:open_session"), 0);
    assert_eq!(coordinator.resolution(), None);
}

#[test]
fn test_no_modes_fails_before_session() {
    let log = new_log();
    let mut coordinator = LifecycleCoordinator::new(
        Box::new(MockCamera::new(log.clone(), &[]).without_modes()),
        Box::new(MockGpu::new(log.clone(), &[])),
        CaptureSettings::default(),
    );

    let err = coordinator.start().unwrap_err();

    assert!(matches!(err.error, BridgeError::NoModeFound(_)));
    assert_eq!(count(&log, "camera:open_session"), 0);
}

#[test]
fn test_gpu_acquire_failure_unwinds_camera_side() {
    let log = new_log();
    let mut coordinator = coordinator(&log, &["retain"]);

    let err = coordinator.start().unwrap_err();

    assert!(matches!(err.error, BridgeError::GpuInit(_)));
    assert_eq!(count(&log, "gpu:release"), 0);
    assert_eq!(count(&log, "gpu:connect"), 0);
    let disconnect = position(&log, "camera:disconnect_stream").unwrap();
    let close = position(&log, "camera:close_session").unwrap();
    assert!(disconnect < close);
    assert_no_leaks(&log);
}

#[test]
fn test_gpu_without_devices_is_init_error() {
    let log = new_log();
    let mut coordinator = LifecycleCoordinator::new(
        Box::new(MockCamera::new(log.clone(), &[])),
        Box::new(MockGpu::new(log.clone(), &[]).without_devices()),
        CaptureSettings::default(),
    );

    let err = coordinator.start().unwrap_err();

    assert!(matches!(err.error, BridgeError::GpuInit(_)));
    assert_eq!(count(&log, "gpu:retain"), 0);
    assert_no_leaks(&log);
}

#[test]
fn test_consumer_connect_failure_releases_context_once() {
    let log = new_log();
    let mut coordinator = coordinator(&log, &["connect"]);

    let err = coordinator.start().unwrap_err();

    assert!(matches!(err.error, BridgeError::ConsumerConnect(_)));
    assert_eq!(count(&log, "gpu:release"), 1);
    assert_eq!(count(&log, "gpu:disconnect"), 0);
    assert_eq!(count(&log, "camera:repeat"), 0);

    // Context was made current for the connect attempt only
    let failed = position(&log, "gpu:connect failed").unwrap();
    let popped = position(&log, "gpu:pop").unwrap();
    assert!(position(&log, "gpu:push").unwrap() < failed);
    assert!(failed < popped);
    assert!(popped < position(&log, "gpu:release").unwrap());

    let release = position(&log, "gpu:release").unwrap();
    let disconnect = position(&log, "camera:disconnect_stream").unwrap();
    let close = position(&log, "camera:close_session").unwrap();
    assert!(release < disconnect && disconnect < close);
}

#[test]
fn test_activation_is_scoped_on_success() {
    let log = new_log();
    let mut coordinator = coordinator(&log, &[]);
    coordinator.start().unwrap();

    let connect = position(&log, "gpu:connect").unwrap();
    let popped = position(&log, "gpu:pop").unwrap();
    assert!(connect < popped);
    assert!(popped < position(&log, "camera:repeat").unwrap());
    assert_eq!(count(&log, "gpu:push"), 1);
}

#[test]
fn test_drain_before_teardown() {
    let log = new_log();
    let mut coordinator = coordinator(&log, &[]);
    coordinator.start().unwrap();
    coordinator.shutdown();

    let stop = position(&log, "camera:stop_repeat").unwrap();
    let idle = position(&log, "camera:wait_for_idle").unwrap();
    let consumer = position(&log, "gpu:disconnect").unwrap();
    let stream = position(&log, "camera:disconnect_stream").unwrap();
    assert!(stop < idle);
    assert!(idle < consumer);
    assert!(consumer < stream);
}

#[test]
fn test_repeat_failure_after_consumer_unwinds_consumer() {
    let log = new_log();
    let mut coordinator = coordinator(&log, &["repeat"]);

    let err = coordinator.start().unwrap_err();

    assert!(matches!(err.error, BridgeError::RepeatStart(_)));
    // Request never started, so there is nothing to stop
    assert_eq!(count(&log, "camera:stop_repeat"), 0);
    assert_eq!(count(&log, "gpu:disconnect"), 1);
    assert_no_leaks(&log);
}

#[test]
fn test_release_failure_does_not_abort_unwind() {
    let log = new_log();
    let mut coordinator = coordinator(&log, &["disconnect"]);
    coordinator.start().unwrap();

    let report = coordinator.shutdown();

    assert!(!report.is_clean());
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].resource, ResourceKind::ConsumerConnection);
    assert_eq!(count(&log, "gpu:release"), 1);
    assert_eq!(count(&log, "camera:disconnect_stream"), 1);
    assert_eq!(count(&log, "camera:close_session"), 1);
    assert_eq!(coordinator.state(), LifecycleState::TornDown);
}

#[test]
fn test_every_release_failing_still_attempts_all() {
    let log = new_log();
    let mut coordinator = coordinator(
        &log,
        &["stop_repeat", "disconnect", "release", "disconnect_stream", "close_session"],
    );
    coordinator.start().unwrap();

    let report = coordinator.shutdown();

    let kinds: Vec<ResourceKind> = report.warnings.iter().map(|w| w.resource).collect();
    assert_eq!(
        kinds,
        vec![
            ResourceKind::RepeatingRequest,
            ResourceKind::ConsumerConnection,
            ResourceKind::GpuContext,
            ResourceKind::OutputStream,
            ResourceKind::CaptureSession,
        ]
    );
    // Drain is still attempted after the stop call fails
    assert_eq!(count(&log, "camera:wait_for_idle"), 1);
}

#[test]
fn test_stream_already_disconnected_is_warning() {
    let log = new_log();
    let mut coordinator = coordinator(&log, &["disconnect_stream"]);
    coordinator.start().unwrap();

    let report = coordinator.shutdown();

    assert_eq!(report.warnings.len(), 1);
    let warning = &report.warnings[0];
    assert_eq!(warning.resource, ResourceKind::OutputStream);
    assert!(warning.to_string().contains("output stream"));
    assert_eq!(count(&log, "camera:close_session"), 1);
}

#[test]
fn test_setup_failure_reports_unwind_warnings() {
    let log = new_log();
    let mut coordinator = coordinator(&log, &["connect", "release"]);

    let err = coordinator.start().unwrap_err();

    assert!(matches!(err.error, BridgeError::ConsumerConnect(_)));
    assert_eq!(err.warnings.len(), 1);
    assert_eq!(err.warnings[0].resource, ResourceKind::GpuContext);
    assert_eq!(count(&log, "camera:close_session"), 1);
}

#[test]
fn test_drop_unwinds_live_pipeline() {
    let log = new_log();
    {
        let mut coordinator = coordinator(&log, &[]);
        coordinator.start().unwrap();
    }

    assert_no_leaks(&log);
    assert_eq!(count(&log, "camera:close_session"), 1);
}

#[test]
fn test_second_start_is_rejected() {
    let log = new_log();
    let mut coordinator = coordinator(&log, &[]);
    coordinator.start().unwrap();

    let err = coordinator.start().unwrap_err();

    assert_eq!(err.error, BridgeError::AlreadyStarted);
    assert_eq!(count(&log, "camera:open_session"), 1);
    assert_eq!(coordinator.state(), LifecycleState::Capturing);
    assert_eq!(coordinator.unwind_kinds().len(), 5);
}

#[test]
fn test_restart_after_shutdown() {
    let log = new_log();
    let mut coordinator = coordinator(&log, &[]);
    coordinator.start().unwrap();
    coordinator.shutdown();

    coordinator.start().unwrap();
    assert_eq!(coordinator.state(), LifecycleState::Capturing);
    coordinator.shutdown();

    assert_eq!(count(&log, "camera:open_session"), 2);
    assert_no_leaks(&log);
}

#[test]
fn test_shutdown_twice_is_noop() {
    let log = new_log();
    let mut coordinator = coordinator(&log, &[]);
    coordinator.start().unwrap();
    coordinator.shutdown();
    let after_first = calls(&log).len();

    assert!(coordinator.shutdown().is_clean());
    assert_eq!(calls(&log).len(), after_first);
}

#[test]
fn test_resolution_override() {
    let log = new_log();
    let settings = CaptureSettings {
        resolution: Some(Resolution::new(640, 480)),
        pixel_format: PixelFormat::YUYV,
        metadata_enabled: false,
        ..Default::default()
    };
    let mut coordinator = LifecycleCoordinator::new(
        Box::new(MockCamera::new(log.clone(), &[])),
        Box::new(MockGpu::new(log.clone(), &[])),
        settings,
    );

    let active = coordinator.start().unwrap();

    assert_eq!(active.resolution, Resolution::new(640, 480));
    assert_eq!(active.mode.resolution, Resolution::new(1280, 720));
    assert_eq!(active.stream.settings.pixel_format, PixelFormat::YUYV);
    assert!(!active.stream.settings.metadata_enabled);
}

#[test]
fn test_virtual_camera_delivers_frames() {
    let log = new_log();
    let gpu = MockGpu::new(log.clone(), &[]);
    let consumed = gpu.consumed.clone();
    let config = VirtualCameraConfig {
        devices: vec![VirtualDeviceConfig {
            name: "Small".to_string(),
            modes: vec![Resolution::new(64, 48)],
        }],
        framerate: 100,
    };
    let mut coordinator = LifecycleCoordinator::new(
        Box::new(VirtualCamera::new(config)),
        Box::new(gpu),
        CaptureSettings::default(),
    );

    let active = coordinator.start().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while consumed.load(Ordering::Relaxed) < 3 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    let report = coordinator.shutdown();

    assert!(report.is_clean(), "{:?}", report.warnings);
    assert!(consumed.load(Ordering::Relaxed) >= 3);
    assert!(!active.endpoint().is_open());
    assert_eq!(active.endpoint().dropped_frames(), 0);
}

#[test]
fn test_virtual_stream_double_disconnect() {
    let mut camera = VirtualCamera::new(VirtualCameraConfig::default());
    let (device, _mode) = DeviceCatalog::new(&camera).select_first().unwrap();
    let mut pipeline = CapturePipeline::new(&mut camera);

    let session = pipeline.create_session(&device).unwrap();
    let stream = pipeline
        .create_output_stream(
            &session,
            StreamSettings {
                pixel_format: PixelFormat::NV12,
                resolution: Resolution::new(640, 480),
                metadata_enabled: true,
            },
        )
        .unwrap();

    pipeline.disconnect(&stream).unwrap();
    assert!(matches!(
        pipeline.disconnect(&stream),
        Err(BackendError::AlreadyReleased(_))
    ));
    pipeline.destroy_session(&session).unwrap();
}
