use std::time::Instant;

use bytemuck::{Pod, Zeroable};
use egui::{
    Color32, Context, Event, PointerButton, Pos2, RawInput, Rect, TextureId, TexturesDelta, Vec2,
    ViewportId, ViewportInfo,
};

use crate::app::{AppState, BgTheme, LoadingTheme, UiActions};
use crate::gpu::RgbaImage;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
    pub color: [f32; 4],
}

/// Texture a batch samples from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UiTexture {
    Font,
    /// A backend texture registered as `TextureId::User`.
    User(u64),
}

impl UiTexture {
    fn from_egui(id: TextureId) -> Option<Self> {
        match id {
            TextureId::Managed(0) => Some(UiTexture::Font),
            TextureId::User(id) => Some(UiTexture::User(id)),
            TextureId::Managed(_) => None,
        }
    }
}

/// Pixel-space scissor, `[left, top, right, bottom]`.
pub type ScissorRect = [u32; 4];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawBatch {
    pub texture: UiTexture,
    pub first_vertex: u32,
    pub vertex_count: u32,
    pub scissor: ScissorRect,
}

/// One frame of UI geometry: triangle-list vertices in NDC plus the
/// batches that split them by texture and clip rect.
#[derive(Clone, Debug, Default)]
pub struct DrawList {
    pub vertices: Vec<Vertex>,
    pub batches: Vec<DrawBatch>,
}

impl DrawList {
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// `TextureId::User` ids of the textures backends hand to the UI.
pub const BACKGROUND_TEXTURE_ID: u64 = 1;
pub const SPINNER_TEXTURE_ID: u64 = 2;

/// Textured, vertex-coloured triangles. Colours arrive premultiplied.
pub const UI_HLSL: &str = r#"
struct VSInput
{
    float2 position : POSITION;
    float2 uv : TEXCOORD;
    float4 color : COLOR;
};

struct PSInput
{
    float4 position : SV_Position;
    float2 uv : TEXCOORD;
    float4 color : COLOR;
};

Texture2D UiTexture : register(t0);
SamplerState UiSampler : register(s0);

PSInput UiVS(VSInput input)
{
    PSInput output;
    output.position = float4(input.position, 0.0, 1.0);
    output.uv = input.uv;
    output.color = input.color;
    return output;
}

float4 UiPS(PSInput input) : SV_Target
{
    return input.color * UiTexture.Sample(UiSampler, input.uv);
}
"#;

/// Textures the UI can show this frame, by backend id.
#[derive(Clone, Copy, Debug, Default)]
pub struct UiTextures {
    pub background: Option<u64>,
    pub spinner: Option<u64>,
}

/// CPU copy of egui's font atlas, patched with each delta.
#[derive(Default)]
pub struct FontAtlas {
    size: [usize; 2],
    pixels: Vec<u8>,
}

impl FontAtlas {
    /// Apply the font texture's updates. Returns true if the atlas changed.
    pub fn apply(&mut self, delta: &TexturesDelta) -> bool {
        let mut changed = false;
        for (id, image_delta) in &delta.set {
            if *id != TextureId::Managed(0) {
                continue;
            }
            let egui::ImageData::Color(color) = &image_delta.image;
            let [width, height] = color.size;
            let rgba: Vec<u8> = color.pixels.iter().flat_map(|c| c.to_array()).collect();

            match image_delta.pos {
                None => {
                    self.size = [width, height];
                    self.pixels = rgba;
                }
                Some([x, y]) => {
                    if x + width > self.size[0] || y + height > self.size[1] {
                        log::warn!("Font atlas patch at ({}, {}) falls outside the atlas", x, y);
                        continue;
                    }
                    let stride = self.size[0] * 4;
                    for row in 0..height {
                        let dst = (y + row) * stride + x * 4;
                        let src = row * width * 4;
                        self.pixels[dst..dst + width * 4].copy_from_slice(&rgba[src..src + width * 4]);
                    }
                }
            }
            changed = true;
        }
        changed
    }

    pub fn image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.size[0] as u32, self.size[1] as u32, self.pixels.clone()).ok()
    }
}

pub struct UiOutput {
    pub draw_list: DrawList,
    /// New font atlas contents, when they changed this frame.
    pub font_image: Option<RgbaImage>,
    pub actions: UiActions,
}

pub struct UiState {
    pub ctx: Context,
    pub pixels_per_point: f32,
    pointer_pos: Option<Pos2>,
    events: Vec<Event>,
    font_atlas: FontAtlas,
    start_time: Instant,
}

impl Default for UiState {
    fn default() -> Self {
        Self::new()
    }
}

impl UiState {
    pub fn new() -> Self {
        let ctx = Context::default();
        ctx.set_pixels_per_point(1.0);

        Self {
            ctx,
            pixels_per_point: 1.0,
            pointer_pos: None,
            events: Vec::new(),
            font_atlas: FontAtlas::default(),
            start_time: Instant::now(),
        }
    }

    pub fn on_mouse_move(&mut self, x: f32, y: f32) {
        self.pointer_pos = Some(Pos2::new(x, y));
        self.events.push(Event::PointerMoved(Pos2::new(x, y)));
    }

    pub fn on_mouse_button(&mut self, button: PointerButton, pressed: bool) {
        if let Some(pos) = self.pointer_pos {
            self.events.push(Event::PointerButton {
                pos,
                button,
                pressed,
                modifiers: Default::default(),
            });
        }
    }

    pub fn on_mouse_wheel(&mut self, delta_x: f32, delta_y: f32) {
        self.events.push(Event::MouseWheel {
            unit: egui::MouseWheelUnit::Point,
            delta: Vec2::new(delta_x, delta_y),
            modifiers: Default::default(),
        });
    }

    pub fn run(&mut self, app: &mut AppState, textures: &UiTextures, width: u32, height: u32) -> UiOutput {
        let mut input = RawInput::default();

        let mut viewport_info = ViewportInfo::default();
        viewport_info.native_pixels_per_point = Some(1.0);
        input.viewports.insert(ViewportId::ROOT, viewport_info);
        input.screen_rect = Some(Rect::from_min_size(
            Pos2::ZERO,
            Vec2::new(width as f32, height as f32),
        ));
        input.time = Some(self.start_time.elapsed().as_secs_f64());
        input.focused = true;
        input.events = std::mem::take(&mut self.events);

        let mut actions = UiActions::default();
        let output = self.ctx.run(input, |ctx| {
            render_ui(ctx, app, textures, width, height, &mut actions);
        });

        let font_image = if self.font_atlas.apply(&output.textures_delta) {
            self.font_atlas.image()
        } else {
            None
        };

        let primitives = self.ctx.tessellate(output.shapes, self.pixels_per_point);
        UiOutput {
            draw_list: primitives_to_draw_list(&primitives, width, height),
            font_image,
            actions,
        }
    }
}

fn render_ui(
    ctx: &Context,
    app: &mut AppState,
    textures: &UiTextures,
    width: u32,
    height: u32,
    actions: &mut UiActions,
) {
    if let Some(id) = textures.background {
        let screen = Rect::from_min_size(Pos2::ZERO, Vec2::new(width as f32, height as f32));
        ctx.layer_painter(egui::LayerId::background()).image(
            TextureId::User(id),
            screen,
            Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0)),
            Color32::WHITE,
        );
    }

    if !app.show_ui {
        return;
    }

    egui::Window::new("Appearance")
        .default_pos([16.0, 16.0])
        .resizable(false)
        .show(ctx, |ui| {
            let mut bg_theme = app.bg_theme;
            egui::ComboBox::from_label("Background Theme")
                .selected_text(bg_theme.label())
                .show_ui(ui, |ui| {
                    for theme in BgTheme::ALL {
                        ui.selectable_value(&mut bg_theme, theme, theme.label());
                    }
                });
            if let Some(path) = app.select_bg_theme(bg_theme) {
                actions.reload_background = Some(path);
            }

            let mut loading_theme = app.loading_theme;
            egui::ComboBox::from_label("Loading Theme")
                .selected_text(loading_theme.label())
                .show_ui(ui, |ui| {
                    for theme in [LoadingTheme::Dark, LoadingTheme::Light] {
                        ui.selectable_value(&mut loading_theme, theme, theme.label());
                    }
                });
            actions.swap_loading_theme = app.select_loading_theme(loading_theme);

            ui.separator();
            ui.checkbox(&mut app.glow_enabled, "Glow");
            ui.add_enabled_ui(app.glow_enabled, |ui| {
                ui.add(egui::Slider::new(&mut app.glow.radius, 0.0..=16.0).text("Radius"));
                ui.add(egui::Slider::new(&mut app.glow.intensity, 0.0..=4.0).text("Intensity"));
            });

            ui.separator();
            ui.add_enabled_ui(!app.frontend.is_loading, |ui| {
                ui.checkbox(&mut app.frontend.vsync, "VSync");
                ui.add(egui::Slider::new(&mut app.frontend.target_fps, 30..=240).text("FPS cap"));
            });

            if app.frontend.is_loading {
                ui.separator();
                ui.horizontal(|ui| {
                    match textures.spinner {
                        Some(id) => {
                            ui.image(egui::load::SizedTexture::new(TextureId::User(id), [32.0, 32.0]));
                        }
                        None => {
                            ui.add(egui::Spinner::new());
                        }
                    }
                    ui.label("Loading background...");
                });
            }

            ui.separator();
            ui.label(format!("Uptime: {:.0}s", app.elapsed().as_secs_f32()));
            ui.label("Ctrl+U: Toggle UI");
        });
}

fn clip_to_scissor(clip: Rect, width: u32, height: u32) -> Option<ScissorRect> {
    let left = clip.min.x.max(0.0).round() as u32;
    let top = clip.min.y.max(0.0).round() as u32;
    let right = (clip.max.x.round().max(0.0) as u32).min(width);
    let bottom = (clip.max.y.round().max(0.0) as u32).min(height);
    (right > left && bottom > top).then_some([left, top, right, bottom])
}

/// Flatten tessellated egui meshes into one vertex stream, one batch per mesh.
pub fn primitives_to_draw_list(
    primitives: &[egui::ClippedPrimitive],
    width: u32,
    height: u32,
) -> DrawList {
    let mut list = DrawList::default();

    for primitive in primitives {
        let egui::epaint::Primitive::Mesh(mesh) = &primitive.primitive else {
            continue;
        };
        let Some(texture) = UiTexture::from_egui(mesh.texture_id) else {
            continue;
        };
        let Some(scissor) = clip_to_scissor(primitive.clip_rect, width, height) else {
            continue;
        };

        let first_vertex = list.vertices.len() as u32;
        for idx in mesh.indices.chunks_exact(3) {
            for &i in idx {
                let v = &mesh.vertices[i as usize];
                let x = (v.pos.x / width as f32) * 2.0 - 1.0;
                let y = 1.0 - (v.pos.y / height as f32) * 2.0;
                let [r, g, b, a] = v.color.to_array();
                list.vertices.push(Vertex {
                    position: [x, y],
                    uv: [v.uv.x, v.uv.y],
                    color: [
                        r as f32 / 255.0,
                        g as f32 / 255.0,
                        b as f32 / 255.0,
                        a as f32 / 255.0,
                    ],
                });
            }
        }
        let vertex_count = list.vertices.len() as u32 - first_vertex;
        if vertex_count > 0 {
            list.batches.push(DrawBatch {
                texture,
                first_vertex,
                vertex_count,
                scissor,
            });
        }
    }

    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use clap::Parser;
    use egui::epaint::{ClippedPrimitive, Mesh, Primitive};

    fn quad(texture: TextureId, min: Pos2, max: Pos2) -> Mesh {
        let mut mesh = Mesh::with_texture(texture);
        mesh.add_rect_with_uv(
            Rect::from_min_max(min, max),
            Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0)),
            Color32::from_rgba_premultiplied(255, 0, 0, 255),
        );
        mesh
    }

    fn clipped(mesh: Mesh, clip: Rect) -> ClippedPrimitive {
        ClippedPrimitive {
            clip_rect: clip,
            primitive: Primitive::Mesh(mesh),
        }
    }

    #[test]
    fn meshes_become_batches_in_ndc() {
        let everything = Rect::from_min_max(Pos2::ZERO, Pos2::new(100.0, 100.0));
        let primitives = vec![
            clipped(quad(TextureId::User(7), Pos2::ZERO, Pos2::new(100.0, 100.0)), everything),
            clipped(
                quad(TextureId::Managed(0), Pos2::new(50.0, 50.0), Pos2::new(100.0, 100.0)),
                Rect::from_min_max(Pos2::new(10.0, 20.0), Pos2::new(500.0, 60.0)),
            ),
            // Unknown managed textures and off-screen clips are dropped.
            clipped(quad(TextureId::Managed(3), Pos2::ZERO, Pos2::new(1.0, 1.0)), everything),
            clipped(
                quad(TextureId::Managed(0), Pos2::ZERO, Pos2::new(1.0, 1.0)),
                Rect::from_min_max(Pos2::new(200.0, 200.0), Pos2::new(300.0, 300.0)),
            ),
        ];

        let list = primitives_to_draw_list(&primitives, 100, 100);
        assert_eq!(list.batches.len(), 2);
        assert_eq!(list.vertices.len(), 12);

        assert_eq!(list.batches[0].texture, UiTexture::User(7));
        assert_eq!(list.batches[0].first_vertex, 0);
        assert_eq!(list.batches[0].vertex_count, 6);
        assert_eq!(list.batches[0].scissor, [0, 0, 100, 100]);

        assert_eq!(list.batches[1].texture, UiTexture::Font);
        assert_eq!(list.batches[1].first_vertex, 6);
        assert_eq!(list.batches[1].scissor, [10, 20, 100, 60]);

        for v in &list.vertices[..6] {
            assert!(v.position[0] == -1.0 || v.position[0] == 1.0);
            assert!(v.position[1] == -1.0 || v.position[1] == 1.0);
            assert_eq!(v.color, [1.0, 0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn atlas_applies_full_and_partial_updates() {
        let mut atlas = FontAtlas::default();
        let mut delta = TexturesDelta::default();
        delta.set.push((
            TextureId::Managed(0),
            egui::epaint::ImageDelta::full(
                egui::ColorImage::from_rgba_premultiplied([4, 2], &[0, 0, 0, 255].repeat(8)),
                egui::TextureOptions::LINEAR,
            ),
        ));
        assert!(atlas.apply(&delta));

        let mut patch = TexturesDelta::default();
        patch.set.push((
            TextureId::Managed(0),
            egui::epaint::ImageDelta::partial(
                [2, 1],
                egui::ColorImage::from_rgba_premultiplied([2, 1], &[255; 8]),
                egui::TextureOptions::LINEAR,
            ),
        ));
        assert!(atlas.apply(&patch));

        let image = atlas.image().unwrap();
        assert_eq!((image.width(), image.height()), (4, 2));
        let pixels = image.pixels();
        assert_eq!(&pixels[0..4], &[0, 0, 0, 255]);
        assert_eq!(&pixels[(4 + 2) * 4..(4 + 3) * 4], &[255, 255, 255, 255]);
        assert_eq!(&pixels[(4 + 3) * 4..], &[255, 255, 255, 255]);

        let mut unrelated = TexturesDelta::default();
        unrelated.set.push((
            TextureId::Managed(1),
            egui::epaint::ImageDelta::full(
                egui::ColorImage::from_rgba_premultiplied([1, 1], &[255; 4]),
                egui::TextureOptions::LINEAR,
            ),
        ));
        assert!(!atlas.apply(&unrelated));
    }

    #[test]
    fn first_frame_produces_geometry_and_the_font_atlas() {
        let config = AppConfig::try_parse_from(["hvkrender"]).unwrap();
        let mut app = AppState::new(&config);
        let mut ui = UiState::new();
        let textures = UiTextures {
            background: Some(1),
            spinner: None,
        };

        let output = ui.run(&mut app, &textures, 800, 600);
        assert!(output.font_image.is_some());
        assert!(!output.draw_list.is_empty());
        assert_eq!(output.draw_list.batches[0].texture, UiTexture::User(1));
        assert_eq!(output.actions, UiActions::default());
    }
}
