//! winit window and event loop driving one `Renderer`.

use anyhow::{anyhow, Context, Result};
use raw_window_handle::{HasWindowHandle, RawWindowHandle};
use windows::Win32::Foundation::HWND;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, ModifiersState, NamedKey};
use winit::window::{Window, WindowId};

use crate::app::{AppState, FrameLimiter};
use crate::config::{AppConfig, BackendChoice};
use crate::dx11::Dx11Renderer;
use crate::dx12::Dx12Renderer;
use crate::render::{self, Renderer};
use crate::ui::UiState;

const WINDOW_TITLE: &str = "hvkrender";

struct Shell {
    config: AppConfig,
    window: Option<Window>,
    renderer: Option<Box<dyn Renderer>>,
    app_state: AppState,
    ui_state: UiState,
    limiter: FrameLimiter,
    modifiers: ModifiersState,
}

impl Shell {
    fn new(config: AppConfig) -> Self {
        let app_state = AppState::new(&config);
        Self {
            config,
            window: None,
            renderer: None,
            app_state,
            ui_state: UiState::new(),
            limiter: FrameLimiter::default(),
            modifiers: ModifiersState::empty(),
        }
    }

    fn render(&mut self) -> Result<()> {
        let (Some(window), Some(renderer)) = (&self.window, self.renderer.as_mut()) else {
            return Ok(());
        };
        let size = window.inner_size();
        render::run_frame(
            renderer.as_mut(),
            &mut self.ui_state,
            &mut self.app_state,
            size.width,
            size.height,
        )?;
        self.limiter.limit(&self.app_state.frontend);
        Ok(())
    }
}

fn window_hwnd(window: &Window) -> Result<HWND> {
    let handle = window.window_handle().context("Failed to get window handle")?;
    match handle.as_raw() {
        RawWindowHandle::Win32(h) => Ok(HWND(h.hwnd.get() as *mut _)),
        _ => Err(anyhow!("Unsupported window handle type")),
    }
}

fn create_renderer(config: &AppConfig, hwnd: HWND, width: u32, height: u32) -> Result<Box<dyn Renderer>> {
    match config.backend {
        BackendChoice::Dx12 => Ok(Box::new(Dx12Renderer::new(hwnd, width, height, config)?)),
        BackendChoice::Dx11 => Ok(Box::new(Dx11Renderer::new(hwnd, width, height, config)?)),
        BackendChoice::Auto => match Dx12Renderer::new(hwnd, width, height, config) {
            Ok(renderer) => Ok(Box::new(renderer)),
            Err(e) => {
                log::warn!("Direct3D 12 unavailable ({:#}), falling back to Direct3D 11", e);
                Ok(Box::new(Dx11Renderer::new(hwnd, width, height, config)?))
            }
        },
    }
}

impl ApplicationHandler for Shell {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attrs = Window::default_attributes()
            .with_title(WINDOW_TITLE)
            .with_inner_size(PhysicalSize::new(1280, 800));

        let window = match event_loop.create_window(window_attrs) {
            Ok(window) => window,
            Err(e) => {
                log::error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };
        let size = window.inner_size();

        let renderer = window_hwnd(&window)
            .and_then(|hwnd| create_renderer(&self.config, hwnd, size.width, size.height));
        match renderer {
            Ok(mut renderer) => {
                log::info!("Rendering with {}", renderer.backend_name());
                window.set_title(&format!("{} ({})", WINDOW_TITLE, renderer.backend_name()));
                render::start(renderer.as_mut(), &mut self.app_state);
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => {
                log::error!("Failed to initialize renderer: {:#}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(renderer) = &mut self.renderer {
                    renderer.resize(size.width, size.height);
                }
            }
            WindowEvent::ModifiersChanged(mods) => {
                self.modifiers = mods.state();
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.ui_state.on_mouse_move(position.x as f32, position.y as f32);
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let egui_button = match button {
                    MouseButton::Left => egui::PointerButton::Primary,
                    MouseButton::Right => egui::PointerButton::Secondary,
                    MouseButton::Middle => egui::PointerButton::Middle,
                    _ => return,
                };
                self.ui_state.on_mouse_button(egui_button, state == ElementState::Pressed);
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let (dx, dy) = match delta {
                    MouseScrollDelta::LineDelta(x, y) => (x * 20.0, y * 20.0),
                    MouseScrollDelta::PixelDelta(pos) => (pos.x as f32, pos.y as f32),
                };
                self.ui_state.on_mouse_wheel(dx, dy);
            }
            WindowEvent::KeyboardInput {
                event: KeyEvent {
                    logical_key,
                    state: ElementState::Pressed,
                    ..
                },
                ..
            } => match &logical_key {
                Key::Character(c) if c.eq_ignore_ascii_case("u") && self.modifiers.control_key() => {
                    self.app_state.toggle_ui();
                }
                Key::Named(NamedKey::Escape) => {
                    event_loop.exit();
                }
                _ => {}
            },
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render() {
                    log::error!("Render error: {:#}", e);
                    event_loop.exit();
                    return;
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Drain the GPU before the window goes away.
        self.renderer = None;
    }
}

pub fn run(config: AppConfig) -> Result<()> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut shell = Shell::new(config);
    event_loop.run_app(&mut shell)?;
    Ok(())
}
