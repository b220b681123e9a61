//! Controller bookkeeping and the mapping from raw controller input to
//! image-placement actions.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use super::platform::{ControllerId, Gamepad, Handedness, InputSource};
use crate::config::ImmersiveOptions;
use crate::events::ExampleDirection;

/// Axis index of the left thumbstick's vertical deflection.
pub const LEFT_STICK_Y_AXIS: usize = 3;
/// Axis index of the right thumbstick's horizontal deflection.
pub const RIGHT_STICK_X_AXIS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControllerAction {
    AdjustDistance(f32),
    AdjustX(f32),
    AdjustY(f32),
    ChangeExample(ExampleDirection),
    RequestExit,
}

/// Turns trigger, grip and thumbstick input into [`ControllerAction`]s.
#[derive(Debug, Clone)]
pub struct GestureMapper {
    step: f32,
    thumbstick_sensitivity: f32,
    thumbstick_deadzone: f32,
    example_deadzone: f32,
    example_cooldown: Duration,
    exit_double_tap: Duration,
    last_example_change: Option<Instant>,
    last_right_grip: Option<Instant>,
}

impl GestureMapper {
    pub fn new(opts: &ImmersiveOptions) -> Self {
        Self {
            step: opts.discrete_step,
            thumbstick_sensitivity: opts.thumbstick_sensitivity,
            thumbstick_deadzone: opts.thumbstick_deadzone,
            example_deadzone: opts.example_deadzone,
            example_cooldown: opts.example_cooldown,
            exit_double_tap: opts.exit_double_tap,
            last_example_change: None,
            last_right_grip: None,
        }
    }

    /// Trigger: left pulls the image closer, right moves it left.
    pub fn on_select_start(&mut self, hand: Handedness) -> Option<ControllerAction> {
        match hand {
            Handedness::Left => Some(ControllerAction::AdjustDistance(-self.step)),
            Handedness::Right => Some(ControllerAction::AdjustX(-self.step)),
            Handedness::Unknown => None,
        }
    }

    /// Grip: left pushes the image away, right moves it right. A second
    /// right grip inside the double-tap window asks to exit instead and
    /// leaves the press timestamp untouched.
    pub fn on_squeeze_start(&mut self, hand: Handedness, now: Instant) -> Option<ControllerAction> {
        match hand {
            Handedness::Left => Some(ControllerAction::AdjustDistance(self.step)),
            Handedness::Right => {
                if let Some(last) = self.last_right_grip {
                    if now.saturating_duration_since(last) < self.exit_double_tap {
                        debug!("right grip double tap");
                        return Some(ControllerAction::RequestExit);
                    }
                }
                self.last_right_grip = Some(now);
                Some(ControllerAction::AdjustX(self.step))
            }
            Handedness::Unknown => None,
        }
    }

    /// One polling step for a controller's thumbstick.
    pub fn poll_thumbstick(
        &mut self,
        hand: Handedness,
        gamepad: &Gamepad,
        now: Instant,
    ) -> Option<ControllerAction> {
        if gamepad.axes.len() < 4 {
            return None;
        }
        match hand {
            Handedness::Left => {
                let y = gamepad.axes[LEFT_STICK_Y_AXIS];
                (y.abs() > self.thumbstick_deadzone)
                    .then(|| ControllerAction::AdjustY(y * self.thumbstick_sensitivity))
            }
            Handedness::Right => {
                let x = gamepad.axes[RIGHT_STICK_X_AXIS];
                if x.abs() <= self.example_deadzone {
                    return None;
                }
                if let Some(last) = self.last_example_change {
                    if now.saturating_duration_since(last) < self.example_cooldown {
                        return None;
                    }
                }
                self.last_example_change = Some(now);
                let direction = if x > 0.0 {
                    ExampleDirection::Next
                } else {
                    ExampleDirection::Previous
                };
                Some(ControllerAction::ChangeExample(direction))
            }
            Handedness::Unknown => None,
        }
    }
}

/// A controller known to the session.
#[derive(Debug, Clone, PartialEq)]
pub struct Controller {
    pub id: ControllerId,
    pub handedness: Handedness,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PollTask {
    hand: Handedness,
}

/// Connected controllers plus one thumbstick polling task per controller
/// with a gamepad. Cancelling a task is removing it; every run checks
/// membership first, so a removed task never polls again.
#[derive(Debug, Default)]
pub struct ControllerRegistry {
    controllers: Vec<Controller>,
    tasks: HashMap<ControllerId, PollTask>,
}

impl ControllerRegistry {
    pub fn connect(&mut self, source: &InputSource) {
        if self.controllers.iter().any(|c| c.id == source.id) {
            return;
        }
        self.controllers.push(Controller {
            id: source.id,
            handedness: source.handedness,
        });
        if source.gamepad.is_some() {
            self.tasks.insert(
                source.id,
                PollTask {
                    hand: source.handedness,
                },
            );
        }
        debug!(id = source.id, hand = source.handedness.as_str(), "controller connected");
    }

    pub fn disconnect(&mut self, id: ControllerId) {
        self.tasks.remove(&id);
        self.controllers.retain(|c| c.id != id);
    }

    /// Cancels every polling task and forgets every controller.
    pub fn clear(&mut self) {
        self.tasks.clear();
        self.controllers.clear();
    }

    pub fn controllers(&self) -> &[Controller] {
        &self.controllers
    }

    pub fn polling_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_polling(&self, id: ControllerId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Runs one step of every registered polling task against the latest
    /// input snapshot.
    pub fn poll(
        &self,
        sources: &[InputSource],
        mapper: &mut GestureMapper,
        now: Instant,
    ) -> Vec<ControllerAction> {
        let mut actions = Vec::new();
        for source in sources {
            let Some(task) = self.tasks.get(&source.id) else {
                continue;
            };
            let Some(gamepad) = source.gamepad.as_ref() else {
                continue;
            };
            if let Some(action) = mapper.poll_thumbstick(task.hand, gamepad, now) {
                actions.push(action);
            }
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> GestureMapper {
        GestureMapper::new(&ImmersiveOptions::default())
    }

    fn stick(axes: [f32; 4]) -> Gamepad {
        Gamepad {
            axes: axes.to_vec(),
        }
    }

    #[test]
    fn triggers_and_grips_map_to_steps() {
        let mut m = mapper();
        let now = Instant::now();
        assert_eq!(
            m.on_select_start(Handedness::Left),
            Some(ControllerAction::AdjustDistance(-0.5))
        );
        assert_eq!(
            m.on_select_start(Handedness::Right),
            Some(ControllerAction::AdjustX(-0.5))
        );
        assert_eq!(
            m.on_squeeze_start(Handedness::Left, now),
            Some(ControllerAction::AdjustDistance(0.5))
        );
        assert_eq!(m.on_select_start(Handedness::Unknown), None);
    }

    #[test]
    fn double_tap_within_window_requests_exit() {
        let mut m = mapper();
        let t0 = Instant::now();
        assert_eq!(
            m.on_squeeze_start(Handedness::Right, t0),
            Some(ControllerAction::AdjustX(0.5))
        );
        assert_eq!(
            m.on_squeeze_start(Handedness::Right, t0 + Duration::from_millis(300)),
            Some(ControllerAction::RequestExit)
        );
    }

    #[test]
    fn slow_grips_both_move_right() {
        let mut m = mapper();
        let t0 = Instant::now();
        assert_eq!(
            m.on_squeeze_start(Handedness::Right, t0),
            Some(ControllerAction::AdjustX(0.5))
        );
        assert_eq!(
            m.on_squeeze_start(Handedness::Right, t0 + Duration::from_millis(600)),
            Some(ControllerAction::AdjustX(0.5))
        );
    }

    #[test]
    fn exit_tap_does_not_refresh_timestamp() {
        let mut m = mapper();
        let t0 = Instant::now();
        m.on_squeeze_start(Handedness::Right, t0);
        m.on_squeeze_start(Handedness::Right, t0 + Duration::from_millis(400));
        assert_eq!(
            m.on_squeeze_start(Handedness::Right, t0 + Duration::from_millis(700)),
            Some(ControllerAction::AdjustX(0.5))
        );
    }

    #[test]
    fn left_stick_respects_deadzone() {
        let mut m = mapper();
        let now = Instant::now();
        assert_eq!(
            m.poll_thumbstick(Handedness::Left, &stick([0.0, 0.0, 0.0, 0.05]), now),
            None
        );
        match m.poll_thumbstick(Handedness::Left, &stick([0.0, 0.0, 0.0, -0.8]), now) {
            Some(ControllerAction::AdjustY(dy)) => assert!((dy + 0.08).abs() < 1e-6),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn right_stick_changes_example_with_cooldown() {
        let mut m = mapper();
        let t0 = Instant::now();
        let right = stick([0.0, 0.0, 0.9, 0.0]);
        assert_eq!(
            m.poll_thumbstick(Handedness::Right, &right, t0),
            Some(ControllerAction::ChangeExample(ExampleDirection::Next))
        );
        assert_eq!(
            m.poll_thumbstick(Handedness::Right, &right, t0 + Duration::from_millis(500)),
            None
        );
        let left = stick([0.0, 0.0, -0.9, 0.0]);
        assert_eq!(
            m.poll_thumbstick(Handedness::Right, &left, t0 + Duration::from_millis(1000)),
            Some(ControllerAction::ChangeExample(ExampleDirection::Previous))
        );
        assert_eq!(
            m.poll_thumbstick(Handedness::Right, &stick([0.0, 0.0, 0.4, 0.0]), t0 + Duration::from_secs(5)),
            None
        );
    }

    #[test]
    fn short_axis_list_is_ignored() {
        let mut m = mapper();
        let pad = Gamepad {
            axes: vec![1.0, 1.0],
        };
        assert_eq!(m.poll_thumbstick(Handedness::Left, &pad, Instant::now()), None);
    }

    #[test]
    fn removed_controller_stops_polling() {
        let mut reg = ControllerRegistry::default();
        let source = InputSource {
            id: 7,
            handedness: Handedness::Left,
            gamepad: Some(stick([0.0, 0.0, 0.0, 1.0])),
        };
        reg.connect(&source);
        let mut m = mapper();
        let now = Instant::now();
        assert_eq!(reg.poll(std::slice::from_ref(&source), &mut m, now).len(), 1);
        reg.disconnect(7);
        assert!(!reg.is_polling(7));
        assert!(reg.poll(std::slice::from_ref(&source), &mut m, now).is_empty());
    }

    #[test]
    fn clear_drops_everything() {
        let mut reg = ControllerRegistry::default();
        for id in 0..3 {
            reg.connect(&InputSource {
                id,
                handedness: Handedness::Right,
                gamepad: Some(Gamepad::default()),
            });
        }
        reg.connect(&InputSource {
            id: 9,
            handedness: Handedness::Unknown,
            gamepad: None,
        });
        assert_eq!(reg.controllers().len(), 4);
        assert_eq!(reg.polling_count(), 3);
        reg.clear();
        assert!(reg.controllers().is_empty());
        assert_eq!(reg.polling_count(), 0);
    }
}
