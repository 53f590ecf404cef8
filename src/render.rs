use std::path::PathBuf;

use anyhow::Result;

use crate::app::AppState;
use crate::glow::GlowSettings;
use crate::reload::FrontendSettings;
use crate::ui::{UiOutput, UiState, UiTextures};

/// What the window loop needs from a graphics backend.
pub trait Renderer {
    fn backend_name(&self) -> &'static str;

    /// Applied at the start of the next frame.
    fn resize(&mut self, width: u32, height: u32);

    fn request_background(&mut self, path: PathBuf, ui: &mut FrontendSettings);

    fn restart_loading(&mut self, dir: PathBuf, frame_count: usize);

    /// Advance reloads and the spinner, and report which textures the UI may
    /// reference this frame.
    fn prepare(&mut self, ui: &mut FrontendSettings) -> Result<UiTextures>;

    /// Draw the UI, with the glow pass when `glow` is set, and present.
    fn render_frame(&mut self, output: &UiOutput, glow: Option<GlowSettings>, vsync: bool) -> Result<()>;
}

/// Window size reported since the last frame, applied before drawing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PendingResize(Option<(u32, u32)>);

impl PendingResize {
    /// The newest size wins, including one equal to the current extent.
    pub fn record(&mut self, width: u32, height: u32) {
        self.0 = Some((width, height));
    }

    /// The recorded size, unless it matches `current`.
    pub fn take_change(&mut self, current: (u32, u32)) -> Option<(u32, u32)> {
        self.0.take().filter(|&size| size != current)
    }
}

/// Startup work: the first background and the loading animation.
pub fn start<R: Renderer + ?Sized>(renderer: &mut R, app: &mut AppState) {
    let loading_dir = app.loading_dir();
    renderer.restart_loading(loading_dir, app.loading_theme.frame_count());
    let background = app.background_path();
    renderer.request_background(background, &mut app.frontend);
}

pub fn run_frame<R: Renderer + ?Sized>(
    renderer: &mut R,
    ui: &mut UiState,
    app: &mut AppState,
    width: u32,
    height: u32,
) -> Result<()> {
    let textures = renderer.prepare(&mut app.frontend)?;
    let output = ui.run(app, &textures, width, height);

    if let Some(path) = &output.actions.reload_background {
        renderer.request_background(path.clone(), &mut app.frontend);
    }
    if let Some(theme) = output.actions.swap_loading_theme {
        renderer.restart_loading(app.loading_dir(), theme.frame_count());
    }

    let glow = app.glow_enabled.then_some(app.glow);
    renderer.render_frame(&output, glow, app.frontend.vsync)
}
