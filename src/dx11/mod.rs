//! Direct3D 11 backend. Textures are created synchronously with initial
//! data, so reloads and the spinner skip the upload queue entirely.

mod glow;
mod ui;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use windows::core::Interface;
use windows::Win32::Foundation::{HMODULE, HWND};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

use self::glow::GlowPipelineDx11;
use self::ui::UiPipelineDx11;
use crate::config::AppConfig;
use crate::d3d::device_error;
use crate::font::FontTexture;
use crate::glow::{GlowSettings, TargetExtent};
use crate::gpu::{FenceValue, GpuError, ImmediateTextureLoader, RgbaImage};
use crate::loading::LoadingAnimation;
use crate::reload::{BackgroundReload, FrontendSettings};
use crate::render::{PendingResize, Renderer};
use crate::ui::{UiOutput, UiTexture, UiTextures, BACKGROUND_TEXTURE_ID, SPINNER_TEXTURE_ID};

const BACK_BUFFER_COUNT: u32 = 2;
const CLEAR_COLOR: [f32; 4] = [0.45, 0.55, 0.60, 1.00];

/// A shader-readable texture. The view keeps the underlying resource alive.
pub struct Dx11Texture {
    srv: ID3D11ShaderResourceView,
    width: u32,
    height: u32,
}

impl Dx11Texture {
    pub fn srv(&self) -> &ID3D11ShaderResourceView {
        &self.srv
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

pub struct Dx11Loader {
    device: ID3D11Device,
}

impl ImmediateTextureLoader for Dx11Loader {
    type Texture = Dx11Texture;

    fn create_from_rgba(&mut self, image: &RgbaImage) -> Result<Dx11Texture, GpuError> {
        let desc = D3D11_TEXTURE2D_DESC {
            Width: image.width(),
            Height: image.height(),
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_R8G8B8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: D3D11_BIND_SHADER_RESOURCE.0 as u32,
            CPUAccessFlags: 0,
            MiscFlags: 0,
        };
        let init_data = D3D11_SUBRESOURCE_DATA {
            pSysMem: image.pixels().as_ptr() as *const _,
            SysMemPitch: image.width() * 4,
            SysMemSlicePitch: 0,
        };

        unsafe {
            let mut texture = None;
            self.device
                .CreateTexture2D(&desc, Some(&init_data), Some(&mut texture))
                .map_err(|e| device_error("texture", e))?;
            let texture = texture.ok_or_else(|| GpuError::resource("texture", "no resource returned"))?;

            let mut srv = None;
            self.device
                .CreateShaderResourceView(&texture, None, Some(&mut srv))
                .map_err(|e| device_error("shader resource view", e))?;
            let srv = srv.ok_or_else(|| GpuError::resource("shader resource view", "no view returned"))?;

            Ok(Dx11Texture {
                srv,
                width: image.width(),
                height: image.height(),
            })
        }
    }
}

pub struct Dx11Renderer {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    swapchain: IDXGISwapChain1,
    rtv: Option<ID3D11RenderTargetView>,
    loader: Dx11Loader,
    ui_pipeline: UiPipelineDx11,
    glow: GlowPipelineDx11,
    font: FontTexture<Dx11Texture>,
    background: BackgroundReload<Dx11Texture, ()>,
    loading: LoadingAnimation<Dx11Texture>,
    width: u32,
    height: u32,
    pending_resize: PendingResize,
    occluded: bool,
}

impl Dx11Renderer {
    pub fn new(hwnd: HWND, width: u32, height: u32, config: &AppConfig) -> Result<Self> {
        let (device, context) = create_device()?;

        unsafe {
            let dxgi_device: IDXGIDevice = device.cast()?;
            let adapter = dxgi_device.GetAdapter()?;
            let factory: IDXGIFactory2 = adapter.GetParent()?;

            let swapchain_desc = DXGI_SWAP_CHAIN_DESC1 {
                Width: width,
                Height: height,
                Format: DXGI_FORMAT_R8G8B8A8_UNORM,
                SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
                BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
                BufferCount: BACK_BUFFER_COUNT,
                SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
                AlphaMode: DXGI_ALPHA_MODE_UNSPECIFIED,
                Scaling: DXGI_SCALING_STRETCH,
                ..Default::default()
            };
            let swapchain = factory
                .CreateSwapChainForHwnd(&device, hwnd, &swapchain_desc, None, None)
                .context("Failed to create swap chain")?;
            factory.MakeWindowAssociation(hwnd, DXGI_MWA_NO_ALT_ENTER)?;

            let ui_pipeline = UiPipelineDx11::new(&device)?;
            let glow = GlowPipelineDx11::new();

            let mut renderer = Self {
                loader: Dx11Loader { device: device.clone() },
                device,
                context,
                swapchain,
                rtv: None,
                ui_pipeline,
                glow,
                font: FontTexture::new(),
                background: BackgroundReload::new(config.reload_config()),
                loading: LoadingAnimation::new(),
                width,
                height,
                pending_resize: PendingResize::default(),
                occluded: false,
            };
            renderer.create_render_target()?;
            renderer.glow.resize(&renderer.device, width, height)?;

            log::info!("D3D11 renderer ready: {}x{}", width, height);
            Ok(renderer)
        }
    }

    fn create_render_target(&mut self) -> Result<()> {
        unsafe {
            let back_buffer: ID3D11Texture2D = self.swapchain.GetBuffer(0)?;
            let mut rtv = None;
            self.device.CreateRenderTargetView(&back_buffer, None, Some(&mut rtv))?;
            self.rtv = Some(rtv.ok_or_else(|| anyhow!("Failed to create back buffer RTV"))?);
        }
        Ok(())
    }

    fn apply_pending_resize(&mut self) -> Result<()> {
        let Some((width, height)) = self.pending_resize.take_change((self.width, self.height)) else {
            return Ok(());
        };

        // ResizeBuffers fails while any view of the back buffer is alive.
        self.rtv = None;
        unsafe { self.context.ClearState() };
        self.glow.resize(&self.device, 0, 0)?;

        if width > 0 && height > 0 {
            unsafe {
                self.swapchain
                    .ResizeBuffers(0, width, height, DXGI_FORMAT_UNKNOWN, DXGI_SWAP_CHAIN_FLAG(0))?;
            }
            self.create_render_target()?;
            self.glow.resize(&self.device, width, height)?;
        }

        self.width = width;
        self.height = height;
        log::debug!("Resized to {}x{}", width, height);
        Ok(())
    }

    fn resolve_texture(&self, texture: UiTexture) -> Option<ID3D11ShaderResourceView> {
        let texture = match texture {
            UiTexture::Font => self.font.active()?,
            UiTexture::User(BACKGROUND_TEXTURE_ID) => self.background.active()?,
            UiTexture::User(SPINNER_TEXTURE_ID) => self.loading.current()?,
            UiTexture::User(_) => return None,
        };
        Some(texture.srv.clone())
    }

    fn draw_frame(&mut self, output: &UiOutput, glow: Option<GlowSettings>) -> Result<()> {
        let Some(extent) = TargetExtent::new(self.width, self.height) else {
            return Ok(());
        };
        let Some(rtv) = self.rtv.clone() else {
            return Ok(());
        };
        let has_vertices = self
            .ui_pipeline
            .upload(&self.device, &self.context, &output.draw_list)?;

        unsafe {
            self.context.OMSetRenderTargets(Some(&[Some(rtv.clone())]), None);
            self.context.ClearRenderTargetView(&rtv, &premultiplied(CLEAR_COLOR));
        }
        if !has_vertices {
            return Ok(());
        }

        let resolve = |texture: UiTexture| self.resolve_texture(texture);
        match glow {
            Some(settings) if self.glow.is_ready() => self.glow.render(
                &self.context,
                &self.ui_pipeline,
                &output.draw_list,
                &rtv,
                extent,
                &settings,
                &resolve,
            )?,
            _ => self.ui_pipeline.draw(&self.context, &output.draw_list, extent, &resolve),
        }
        Ok(())
    }

    fn present(&mut self, vsync: bool) -> Result<()> {
        let hr = unsafe { self.swapchain.Present(if vsync { 1 } else { 0 }, DXGI_PRESENT(0)) };
        self.occluded = hr == DXGI_STATUS_OCCLUDED;
        hr.ok().map_err(|e| device_error("present", e))?;
        Ok(())
    }
}

impl Renderer for Dx11Renderer {
    fn backend_name(&self) -> &'static str {
        "Direct3D 11"
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.pending_resize.record(width, height);
    }

    fn request_background(&mut self, path: PathBuf, ui: &mut FrontendSettings) {
        self.background.request(path, ui);
    }

    fn restart_loading(&mut self, dir: PathBuf, frame_count: usize) {
        // The immediate context serialises everything, so retired frames
        // can go as soon as they are replaced.
        self.loading.restart(dir, frame_count, FenceValue::ZERO);
        self.loading.release_retired(FenceValue::ZERO);
    }

    fn prepare(&mut self, ui: &mut FrontendSettings) -> Result<UiTextures> {
        self.background.poll_immediate(&mut self.loader, ui)?;
        self.loading.pump_immediate(&mut self.loader)?;

        let spinner = if ui.is_loading {
            self.loading.advance().map(|_| SPINNER_TEXTURE_ID)
        } else {
            None
        };
        Ok(UiTextures {
            background: self.background.active().map(|_| BACKGROUND_TEXTURE_ID),
            spinner,
        })
    }

    fn render_frame(&mut self, output: &UiOutput, glow: Option<GlowSettings>, vsync: bool) -> Result<()> {
        self.apply_pending_resize()?;
        if self.width == 0 || self.height == 0 {
            return Ok(());
        }

        if self.occluded {
            let hr = unsafe { self.swapchain.Present(0, DXGI_PRESENT_TEST) };
            if hr == DXGI_STATUS_OCCLUDED {
                std::thread::sleep(std::time::Duration::from_millis(10));
                return Ok(());
            }
            self.occluded = false;
        }

        if let Some(image) = &output.font_image {
            self.font.replace_immediate(&mut self.loader, image)?;
        }

        self.draw_frame(output, glow)?;
        self.present(vsync)
    }
}

fn create_device() -> Result<(ID3D11Device, ID3D11DeviceContext)> {
    let feature_levels = [D3D_FEATURE_LEVEL_11_1, D3D_FEATURE_LEVEL_11_0];
    let mut device = None;
    let mut context = None;
    unsafe {
        D3D11CreateDevice(
            None,
            D3D_DRIVER_TYPE_HARDWARE,
            HMODULE::default(),
            D3D11_CREATE_DEVICE_BGRA_SUPPORT,
            Some(&feature_levels),
            D3D11_SDK_VERSION,
            Some(&mut device),
            None,
            Some(&mut context),
        )
        .context("Failed to create D3D11 device")?;
    }
    Ok((
        device.ok_or_else(|| anyhow!("D3D11CreateDevice returned no device"))?,
        context.ok_or_else(|| anyhow!("D3D11CreateDevice returned no context"))?,
    ))
}

/// Linear clamp sampler shared by the UI and glow passes.
fn create_linear_sampler(device: &ID3D11Device) -> Result<ID3D11SamplerState> {
    let desc = D3D11_SAMPLER_DESC {
        Filter: D3D11_FILTER_MIN_MAG_MIP_LINEAR,
        AddressU: D3D11_TEXTURE_ADDRESS_CLAMP,
        AddressV: D3D11_TEXTURE_ADDRESS_CLAMP,
        AddressW: D3D11_TEXTURE_ADDRESS_CLAMP,
        MipLODBias: 0.0,
        MaxAnisotropy: 1,
        ComparisonFunc: D3D11_COMPARISON_NEVER,
        BorderColor: [0.0; 4],
        MinLOD: 0.0,
        MaxLOD: D3D11_FLOAT32_MAX,
    };

    let mut sampler = None;
    unsafe { device.CreateSamplerState(&desc, Some(&mut sampler)) }.context("Failed to create sampler state")?;
    sampler.ok_or_else(|| anyhow!("CreateSamplerState returned no sampler"))
}

fn premultiplied(color: [f32; 4]) -> [f32; 4] {
    [color[0] * color[3], color[1] * color[3], color[2] * color[3], color[3]]
}
