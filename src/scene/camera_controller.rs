//! Fly camera controller and the per-frame input snapshot it consumes

use crate::config::MovementConfig;
use crate::scene::CameraState;
use glam::{Vec2, Vec3};
use std::collections::HashSet;

/// Logical keys the renderer reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Up,
    Down,
    /// Flips the cascade colouring baked into the shading pipeline
    ToggleCascadeDebug,
}

/// Input state for one frame, produced by the windowing layer
#[derive(Debug, Clone, Default)]
pub struct FrameInput {
    /// x = strafe right, y = forward; each in -1..=1
    pub movement: Vec2,
    /// Look delta in sensitivity-scaled units (usually pixels / viewport height)
    pub look_delta: Vec2,
    /// Whether look deltas should rotate the camera (pointer captured)
    pub look_active: bool,
    held: HashSet<Key>,
    pressed: HashSet<Key>,
}

impl FrameInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_held(&mut self, key: Key, down: bool) {
        if down {
            if self.held.insert(key) {
                self.pressed.insert(key);
            }
        } else {
            self.held.remove(&key);
        }
    }

    pub fn is_held(&self, key: Key) -> bool {
        self.held.contains(&key)
    }

    /// Went down since the last `end_frame`
    pub fn was_pressed(&self, key: Key) -> bool {
        self.pressed.contains(&key)
    }

    /// Reset per-frame deltas (call after the frame was drawn)
    pub fn end_frame(&mut self) {
        self.look_delta = Vec2::ZERO;
        self.pressed.clear();
    }
}

/// Free-fly camera with smoothed acceleration
///
/// - Look delta: yaw/pitch, pitch clamped short of vertical
/// - Movement axes: accelerate along forward/right
/// - Up/Down keys: accelerate along world Y
#[derive(Debug, Clone)]
pub struct FlyController {
    pub velocity: Vec3,
    pub max_velocity: f32,
    pub acceleration: f32,
    pub mouse_sensitivity: f32,
}

impl Default for FlyController {
    fn default() -> Self {
        Self::new(&MovementConfig::default())
    }
}

impl FlyController {
    pub fn new(config: &MovementConfig) -> Self {
        Self {
            velocity: Vec3::ZERO,
            max_velocity: config.max_velocity,
            acceleration: config.acceleration,
            mouse_sensitivity: config.mouse_sensitivity,
        }
    }

    /// Apply one frame of input; `dt` is in milliseconds
    pub fn update(&mut self, camera: &mut CameraState, input: &FrameInput, dt: f32) {
        if input.look_active {
            camera.yaw += input.look_delta.x * self.mouse_sensitivity;
            camera.pitch = (camera.pitch - input.look_delta.y * self.mouse_sensitivity)
                .clamp(-super::camera::PITCH_LIMIT, super::camera::PITCH_LIMIT);
        }

        let axes = input.movement.normalize_or_zero();
        let mut target = camera.right() * axes.x + camera.forward() * axes.y;
        if input.is_held(Key::Up) {
            target += Vec3::Y;
        }
        if input.is_held(Key::Down) {
            target -= Vec3::Y;
        }

        let blend = (self.acceleration * dt).min(1.0);
        self.velocity += (target - self.velocity) * blend;
        self.velocity = self
            .velocity
            .clamp(Vec3::splat(-self.max_velocity), Vec3::splat(self.max_velocity));

        camera.position += self.velocity * 0.01 * dt;
    }

    pub fn reset(&mut self) {
        self.velocity = Vec3::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pressed_only_on_transition() {
        let mut input = FrameInput::new();
        input.set_held(Key::ToggleCascadeDebug, true);
        assert!(input.was_pressed(Key::ToggleCascadeDebug));
        input.end_frame();
        input.set_held(Key::ToggleCascadeDebug, true);
        assert!(!input.was_pressed(Key::ToggleCascadeDebug));
        assert!(input.is_held(Key::ToggleCascadeDebug));
        input.set_held(Key::ToggleCascadeDebug, false);
        assert!(!input.is_held(Key::ToggleCascadeDebug));
    }

    #[test]
    fn test_forward_movement() {
        let mut camera = CameraState::default();
        let mut controller = FlyController::default();
        let mut input = FrameInput::new();
        input.movement = Vec2::new(0.0, 1.0);

        for _ in 0..100 {
            controller.update(&mut camera, &input, 16.0);
            camera.update(1.0);
        }
        assert!(camera.position.z < 0.0);
        assert!(camera.position.x.abs() < 1e-4);
        assert!(controller.velocity.abs().max_element() <= controller.max_velocity);
    }

    #[test]
    fn test_look_ignored_when_inactive() {
        let mut camera = CameraState::default();
        let mut controller = FlyController::default();
        let mut input = FrameInput::new();
        input.look_delta = Vec2::new(0.1, 0.1);

        controller.update(&mut camera, &input, 16.0);
        assert_eq!(camera.yaw, 0.0);

        input.look_active = true;
        controller.update(&mut camera, &input, 16.0);
        assert!((camera.yaw - 0.2).abs() < 1e-6);
        assert!((camera.pitch + 0.2).abs() < 1e-6);
    }
}
