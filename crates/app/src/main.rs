//! ember demo.
//!
//! Opens a window and drives the renderer with a small scene graph. No mesh
//! pipelines are compiled here, so frames show the background pass only.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ash::vk;
use glam::{Mat4, Vec3};
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use ember_core::{FrameTimer, RendererConfig, Timer};
use ember_renderer::Renderer;
use ember_resources::GpuSceneData;
use ember_rhi::device::Device;
use ember_rhi::instance::{Instance, InstanceDesc};
use ember_rhi::physical_device::{SurfaceSupport, select_physical_device};
use ember_rhi::surface::{Surface, required_extensions};
use ember_rhi::swapchain::Swapchain;
use ember_scene::{DrawContext, Node, build_draw_context};

const CONFIG_PATH: &str = "ember.toml";

/// Everything that lives as long as the window. Field order is drop order.
struct Gpu {
    renderer: Renderer,
    swapchain: Swapchain,
    window: Arc<Window>,
}

impl Gpu {
    fn new(event_loop: &ActiveEventLoop, config: &RendererConfig) -> Result<Self> {
        let attributes = Window::default_attributes()
            .with_title(config.window_title.clone())
            .with_inner_size(PhysicalSize::new(config.window_width, config.window_height));
        let window = Arc::new(event_loop.create_window(attributes)?);

        let extensions = required_extensions(window.as_ref())?;
        let instance = Arc::new(Instance::new(&InstanceDesc {
            enable_validation: config.enable_validation,
            extensions,
        })?);
        let surface = Surface::new(instance.clone(), window.as_ref())?;
        let info = select_physical_device(
            instance.handle(),
            Some(SurfaceSupport {
                surface: surface.handle(),
                loader: surface.loader(),
            }),
        )?;
        let device: Arc<Device> = Device::new(instance, &info)?;

        let size = window.inner_size();
        let swapchain = Swapchain::new(
            device.clone(),
            surface,
            vk::Extent2D {
                width: size.width,
                height: size.height,
            },
        )?;
        let renderer = Renderer::new(device, config)?;

        Ok(Self {
            renderer,
            swapchain,
            window,
        })
    }
}

struct App {
    config: RendererConfig,
    gpu: Option<Gpu>,
    scene: Node,
    timer: Timer,
    frame_timer: FrameTimer,
    elapsed: f32,
}

impl App {
    fn new(config: RendererConfig) -> Self {
        Self {
            config,
            gpu: None,
            scene: Node::container("root", Mat4::IDENTITY),
            timer: Timer::new(),
            frame_timer: FrameTimer::new(Duration::from_secs(1)),
            elapsed: 0.0,
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(gpu) = self.gpu.as_mut() else {
            return;
        };

        let delta = self.timer.tick();
        self.elapsed += delta.as_secs_f32();
        if self.frame_timer.record(delta) {
            let stats = gpu.renderer.stats();
            info!(
                "{:.1} fps, {} draws, {} triangles, geometry {:.3} ms",
                self.frame_timer.fps(),
                stats.draw_calls,
                stats.triangles,
                stats.geometry_time_ms()
            );
        }

        let size = gpu.window.inner_size();
        if gpu.renderer.resize_requested() {
            let extent = vk::Extent2D {
                width: size.width,
                height: size.height,
            };
            if let Err(e) = gpu.renderer.handle_resize(&mut gpu.swapchain, extent) {
                self.fail(event_loop, e.into());
                return;
            }
        }
        if size.width == 0 || size.height == 0 {
            return;
        }

        let eye = Vec3::new(self.elapsed.cos() * 5.0, 2.0, self.elapsed.sin() * 5.0);
        let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
        let aspect = size.width as f32 / size.height as f32;
        // Reverse-Z: near and far swapped.
        let proj = Mat4::perspective_rh(70f32.to_radians(), aspect, 10_000.0, 0.1);
        *gpu.renderer.scene_data_mut() = GpuSceneData::new(view, proj);

        let mut ctx = DrawContext::new();
        build_draw_context(&self.scene, &Mat4::IDENTITY, &mut ctx);

        if let Err(e) = gpu.renderer.draw(&mut gpu.swapchain, &ctx, None) {
            self.fail(event_loop, e.into());
        }
    }

    /// Log a fatal error, tear the renderer down and stop the loop.
    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("Fatal render error: {:#}", e);
        if let Some(mut gpu) = self.gpu.take()
            && let Err(e) = gpu.renderer.shutdown()
        {
            error!("Cleanup after fatal error failed: {}", e);
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.gpu.is_some() {
            return;
        }
        match Gpu::new(event_loop, &self.config) {
            Ok(gpu) => {
                info!("Initialization complete, entering main loop");
                self.gpu = Some(gpu);
            }
            Err(e) => {
                error!("Failed to initialize: {:#}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                if let Some(mut gpu) = self.gpu.take()
                    && let Err(e) = gpu.renderer.shutdown()
                {
                    error!("Shutdown failed: {}", e);
                }
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                tracing::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(gpu) = self.gpu.as_mut() {
                    gpu.renderer.request_resize();
                }
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(gpu) = self.gpu.as_ref() {
            gpu.window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    let config = RendererConfig::load(CONFIG_PATH).context("loading renderer config")?;
    ember_core::init_logging_with(config.log_filter.as_deref());
    info!("Starting ember");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}
