use std::time::{Duration, Instant};

use rust_parallax_viewer::config::ImmersiveOptions;
use rust_parallax_viewer::events::{ExampleDirection, HostEvent};
use rust_parallax_viewer::immersive::platform::{Gamepad, Handedness, InputSource, SessionEvent};
use rust_parallax_viewer::immersive::session::{ImmersiveSessionManager, SessionPhase};
use rust_parallax_viewer::immersive::stub::{SessionCall, SimulatedPlatform};

fn controller(id: u32, handedness: Handedness) -> InputSource {
    InputSource {
        id,
        handedness,
        gamepad: Some(Gamepad {
            axes: vec![0.0; 4],
        }),
    }
}

fn active_session() -> (SimulatedPlatform, ImmersiveSessionManager) {
    let platform = SimulatedPlatform::new();
    platform.connect_controller(controller(0, Handedness::Left));
    platform.connect_controller(controller(1, Handedness::Right));
    let mut manager =
        ImmersiveSessionManager::new(Box::new(platform.clone()), ImmersiveOptions::default());
    manager.enter().unwrap();
    manager.take_host_events();
    (platform, manager)
}

#[test]
fn controllers_present_at_entry_are_polled() {
    let (_platform, manager) = active_session();
    assert_eq!(manager.registry().controllers().len(), 2);
    assert_eq!(manager.registry().polling_count(), 2);
}

#[test]
fn triggers_and_grips_move_the_image() {
    let (platform, mut manager) = active_session();
    let t0 = Instant::now();

    platform.emit(SessionEvent::SelectStart(Handedness::Left));
    manager.on_frame(t0);
    assert!((manager.distance() - 2.5).abs() < 1e-6);

    platform.emit(SessionEvent::SqueezeStart(Handedness::Left));
    platform.emit(SessionEvent::SelectStart(Handedness::Right));
    manager.on_frame(t0 + Duration::from_millis(16));
    assert!((manager.distance() - 3.0).abs() < 1e-6);
    assert!((manager.x_offset() + 0.5).abs() < 1e-6);
}

#[test]
fn right_grip_double_tap_exits() {
    let (platform, mut manager) = active_session();
    let t0 = Instant::now();

    platform.emit(SessionEvent::SqueezeStart(Handedness::Right));
    manager.on_frame(t0);
    assert!((manager.x_offset() - 0.5).abs() < 1e-6);

    platform.emit(SessionEvent::SqueezeStart(Handedness::Right));
    manager.on_frame(t0 + Duration::from_millis(200));
    assert_eq!(manager.phase(), SessionPhase::Idle);
    assert_eq!(manager.take_host_events(), vec![HostEvent::ImmersiveExitComplete]);
    assert_eq!(platform.listener_count(), 0);
    assert!(!platform.is_frame_loop_running());
}

#[test]
fn thumbsticks_adjust_height_and_change_example() {
    let (platform, mut manager) = active_session();
    let t0 = Instant::now();

    platform.set_axes(0, [0.0, 0.0, 0.0, 1.0]);
    platform.set_axes(1, [0.0, 0.0, 1.0, 0.0]);
    manager.on_frame(t0);
    manager.on_frame(t0 + Duration::from_millis(16));

    assert!((manager.y_offset() - 0.2).abs() < 1e-6);
    assert_eq!(
        manager.take_host_events(),
        vec![HostEvent::ExampleChange(ExampleDirection::Next)]
    );
}

#[test]
fn disconnected_controller_stops_polling() {
    let (platform, mut manager) = active_session();
    platform.disconnect_controller(0);
    manager.on_frame(Instant::now());
    assert!(!manager.registry().is_polling(0));
    assert!(manager.registry().is_polling(1));

    platform.set_axes(0, [0.0, 0.0, 0.0, 1.0]);
    manager.on_frame(Instant::now());
    assert_eq!(manager.y_offset(), 0.0);
}

#[test]
fn platform_end_event_tears_down() {
    let (platform, mut manager) = active_session();
    platform.clear_calls();
    platform.emit(SessionEvent::End);
    manager.on_frame(Instant::now());
    assert_eq!(manager.phase(), SessionPhase::Idle);
    assert_eq!(manager.registry().polling_count(), 0);
    assert_eq!(
        platform.calls(),
        vec![
            SessionCall::RemoveListener,
            SessionCall::StopFrameLoop,
            SessionCall::DetachRenderer,
            SessionCall::End,
        ]
    );
}

#[test]
fn session_can_be_entered_again_after_exit() {
    let (platform, mut manager) = active_session();
    assert!(manager.exit());
    manager.enter().unwrap();
    assert!(manager.is_active());
    assert_eq!(platform.sessions_requested(), 2);
}
