//! Interactive scene viewer
//!
//! Run with:
//!   cargo run --example viewer
//!   cargo run --example viewer -- --model assets/bunny.bin --environment assets/sky.hdr
//!
//! Controls:
//!   WASD        - Move camera
//!   Space/Shift - Move up/down
//!   Right Mouse - Look around
//!   C           - Toggle cascade debug colouring
//!   Escape      - Exit

use clap::Parser;
use glam::{Vec2, Vec3};
use scene_renderer::instances::Material;
use scene_renderer::resources::MeshData;
use scene_renderer::{
    FrameInput, Key, ObjectHandle, Renderer, RendererConfig, SceneObject, Transform, Usage,
    WgpuBackend,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    dpi::PhysicalSize,
    event::{DeviceEvent, ElementState, Event, MouseButton, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    keyboard::{KeyCode, PhysicalKey},
    window::WindowBuilder,
};

#[derive(Parser, Debug)]
#[command(name = "viewer", about = "GPU-driven scene renderer viewer")]
struct Args {
    /// Mesh stream file; a cube is used when omitted
    #[arg(long)]
    model: Option<PathBuf>,

    /// Radiance HDR environment for image-based lighting
    #[arg(long)]
    environment: Option<PathBuf>,

    /// MSAA sample count (1 or 4)
    #[arg(long, default_value = "4")]
    msaa: u32,

    /// Number of static objects placed on a grid
    #[arg(long, default_value = "64")]
    objects: u32,

    #[arg(long, default_value = "1280")]
    width: u32,

    #[arg(long, default_value = "720")]
    height: u32,

    #[arg(long)]
    no_vsync: bool,
}

/// Keyboard and mouse state folded into one `FrameInput` per frame
struct InputState {
    frame: FrameInput,
    forward: f32,
    back: f32,
    left: f32,
    right: f32,
    viewport_height: f32,
}

impl InputState {
    fn new(viewport_height: u32) -> Self {
        Self {
            frame: FrameInput::new(),
            forward: 0.0,
            back: 0.0,
            left: 0.0,
            right: 0.0,
            viewport_height: viewport_height.max(1) as f32,
        }
    }

    fn on_key(&mut self, code: KeyCode, pressed: bool) {
        let value = if pressed { 1.0 } else { 0.0 };
        match code {
            KeyCode::KeyW => self.forward = value,
            KeyCode::KeyS => self.back = value,
            KeyCode::KeyA => self.left = value,
            KeyCode::KeyD => self.right = value,
            KeyCode::Space => self.frame.set_held(Key::Up, pressed),
            KeyCode::ShiftLeft => self.frame.set_held(Key::Down, pressed),
            KeyCode::KeyC => self.frame.set_held(Key::ToggleCascadeDebug, pressed),
            _ => {}
        }
        self.frame.movement = Vec2::new(self.right - self.left, self.forward - self.back);
    }

    fn on_mouse_motion(&mut self, delta: (f64, f64)) {
        if self.frame.look_active {
            self.frame.look_delta +=
                Vec2::new(delta.0 as f32, delta.1 as f32) / self.viewport_height;
        }
    }

    fn end_frame(&mut self) {
        self.frame.look_delta = Vec2::ZERO;
        self.frame.end_frame();
    }
}

struct Spinner {
    handle: ObjectHandle,
    center: Vec3,
    radius: f32,
    phase: f32,
}

fn populate(renderer: &mut Renderer<WgpuBackend>, args: &Args) -> Vec<Spinner> {
    let model = match &args.model {
        Some(path) => renderer.load_model(path),
        None => renderer.load_model_data("cube", MeshData::cube()),
    };
    let cube = renderer.load_model_data("ground", MeshData::cube());

    let ground = SceneObject::new(
        Transform::from_position(Vec3::new(0.0, -1.0, 0.0)).with_scale(Vec3::new(80.0, 0.5, 80.0)),
    )
    .with_material(Material::new(0.0, 0.9, 1.0));
    if let Err(err) = renderer.add_object(cube, Usage::Static, ground) {
        log::error!("Failed to place ground: {}", err);
    }

    let side = (args.objects as f32).sqrt().ceil().max(1.0) as u32;
    for i in 0..args.objects {
        let (x, z) = ((i % side) as f32, (i / side) as f32);
        let position = Vec3::new((x - side as f32 * 0.5) * 3.0, 0.0, -(z + 2.0) * 3.0);
        let roughness = (x + 1.0) / (side as f32 + 1.0);
        let object = SceneObject::new(Transform::from_position(position))
            .with_material(Material::new((z % 2.0) * 0.9, roughness, 1.0));
        if let Err(err) = renderer.add_object(model, Usage::Static, object) {
            log::error!("Failed to place object {}: {}", i, err);
        }
    }

    (0..8)
        .filter_map(|i| {
            let phase = i as f32 * std::f32::consts::TAU / 8.0;
            let object = SceneObject::new(Transform::new().with_scale(Vec3::splat(0.5)))
                .with_material(Material::new(1.0, 0.2, 1.0));
            renderer
                .add_object(model, Usage::Dynamic, object)
                .map_err(|err| log::error!("Failed to place spinner {}: {}", i, err))
                .ok()
                .map(|handle| Spinner {
                    handle,
                    center: Vec3::new(0.0, 2.0, -12.0),
                    radius: 6.0,
                    phase,
                })
        })
        .collect()
}

fn animate(renderer: &mut Renderer<WgpuBackend>, spinners: &[Spinner], seconds: f32) {
    for spinner in spinners {
        if let Some(object) = renderer.object_mut(spinner.handle) {
            let angle = seconds * 0.5 + spinner.phase;
            object.transform.position =
                spinner.center + Vec3::new(angle.cos(), 0.0, angle.sin()) * spinner.radius;
            object.transform.rotation = Vec3::new(seconds, seconds * 0.7, 0.0);
        }
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let event_loop = EventLoop::new().expect("Failed to create event loop");
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("Scene Renderer")
            .with_inner_size(PhysicalSize::new(args.width, args.height))
            .build(&event_loop)
            .expect("Failed to create window"),
    );

    let backend = match WgpuBackend::new(Arc::clone(&window), !args.no_vsync) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Failed to create backend: {}", e);
            return;
        }
    };

    let config = RendererConfig {
        msaa_samples: args.msaa,
        ..Default::default()
    };
    let mut renderer = match Renderer::new(backend, config) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to create renderer: {}", e);
            return;
        }
    };

    if let Some(path) = &args.environment {
        renderer.load_environment(path);
    }
    let spinners = populate(&mut renderer, &args);

    let mut input = InputState::new(args.height);
    let start = Instant::now();
    let mut last_frame = Instant::now();
    let mut last_report = Instant::now();

    let window_clone = Arc::clone(&window);
    event_loop
        .run(move |event, elwt: &EventLoopWindowTarget<()>| {
            elwt.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { event, .. } => match event {
                    WindowEvent::CloseRequested => elwt.exit(),
                    WindowEvent::Resized(size) => {
                        input.viewport_height = size.height.max(1) as f32;
                        if let Err(e) = renderer.on_resize(size.width, size.height) {
                            log::error!("Resize failed: {}", e);
                            elwt.exit();
                        }
                    }
                    WindowEvent::KeyboardInput { event, .. } => {
                        if let PhysicalKey::Code(code) = event.physical_key {
                            if code == KeyCode::Escape {
                                elwt.exit();
                            }
                            input.on_key(code, event.state == ElementState::Pressed);
                        }
                    }
                    WindowEvent::MouseInput {
                        state,
                        button: MouseButton::Right,
                        ..
                    } => {
                        input.frame.look_active = state == ElementState::Pressed;
                    }
                    WindowEvent::RedrawRequested => {
                        let now = Instant::now();
                        let dt = (now - last_frame).as_secs_f32() * 1000.0;
                        last_frame = now;

                        animate(&mut renderer, &spinners, start.elapsed().as_secs_f32());
                        if let Err(e) = renderer.draw(&input.frame, dt) {
                            log::error!("Frame failed: {}", e);
                        }
                        input.end_frame();

                        if last_report.elapsed().as_secs_f32() >= 1.0 {
                            last_report = now;
                            match renderer.gpu_frame_time() {
                                Some(ms) => log::info!("frame {:.2} ms, gpu {:.2} ms", dt, ms),
                                None => log::info!("frame {:.2} ms", dt),
                            }
                        }
                    }
                    _ => {}
                },
                Event::DeviceEvent {
                    event: DeviceEvent::MouseMotion { delta },
                    ..
                } => input.on_mouse_motion(delta),
                Event::AboutToWait => window_clone.request_redraw(),
                _ => {}
            }
        })
        .expect("Event loop failed");
}
