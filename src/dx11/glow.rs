use anyhow::{anyhow, Result};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use super::create_linear_sampler;
use super::ui::UiPipelineDx11;
use crate::d3d::{blob_bytes, compile_shader};
use crate::glow::{
    BlurAxis, GlowConstants, GlowSettings, ResizeAction, SizedResources, TargetExtent, GLOW_HLSL,
};
use crate::ui::{DrawList, UiTexture};

const GLOW_FORMAT: DXGI_FORMAT = DXGI_FORMAT_R16G16B16A16_FLOAT;

struct GlowTarget {
    _texture: ID3D11Texture2D,
    rtv: ID3D11RenderTargetView,
    srv: ID3D11ShaderResourceView,
}

struct GlowTargets {
    emissive: GlowTarget,
    blur_a: GlowTarget,
    blur_b: GlowTarget,
}

/// What a resize throws away and recreates. Constants go through a small
/// dynamic buffer rewritten before every fullscreen pass.
struct GlowResources {
    fullscreen_vs: ID3D11VertexShader,
    blur_ps: ID3D11PixelShader,
    composite_ps: ID3D11PixelShader,
    constant_buffer: ID3D11Buffer,
    additive_blend: ID3D11BlendState,
    rasterizer_state: ID3D11RasterizerState,
    sampler: ID3D11SamplerState,
    targets: GlowTargets,
}

/// The D3D11 flavour of the glow chain.
#[derive(Default)]
pub struct GlowPipelineDx11 {
    resources: SizedResources<GlowResources>,
}

impl GlowPipelineDx11 {
    /// Nothing is built until the first [`resize`](Self::resize).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.resources.get().is_some()
    }

    /// Any size change recompiles the shaders and recreates every state
    /// object and target.
    pub fn resize(&mut self, device: &ID3D11Device, width: u32, height: u32) -> Result<()> {
        let action = self
            .resources
            .resize(width, height, |extent| create_resources(device, extent))?;
        if let ResizeAction::Rebuild(extent) = action {
            log::debug!("Glow pipeline rebuilt at {}x{}", extent.width, extent.height);
        }
        Ok(())
    }

    /// Same pass order as the D3D12 path: emissive, horizontal blur,
    /// vertical blur, base UI onto `main_rtv`, additive composite.
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &self,
        context: &ID3D11DeviceContext,
        ui: &UiPipelineDx11,
        draw: &DrawList,
        main_rtv: &ID3D11RenderTargetView,
        extent: TargetExtent,
        settings: &GlowSettings,
        resolve: &dyn Fn(UiTexture) -> Option<ID3D11ShaderResourceView>,
    ) -> Result<()> {
        let Some((glow_extent, resources)) = self.resources.get() else {
            unsafe { context.OMSetRenderTargets(Some(&[Some(main_rtv.clone())]), None) };
            ui.draw(context, draw, extent, resolve);
            return Ok(());
        };
        let targets = &resources.targets;

        unsafe {
            context.OMSetRenderTargets(Some(&[Some(targets.emissive.rtv.clone())]), None);
            context.ClearRenderTargetView(&targets.emissive.rtv, &[0.0, 0.0, 0.0, 0.0]);
        }
        ui.draw(context, draw, glow_extent, resolve);

        resources.blur_pass(context, &targets.emissive, &targets.blur_a, BlurAxis::Horizontal, glow_extent, settings)?;
        resources.blur_pass(context, &targets.blur_a, &targets.blur_b, BlurAxis::Vertical, glow_extent, settings)?;

        unsafe { context.OMSetRenderTargets(Some(&[Some(main_rtv.clone())]), None) };
        ui.draw(context, draw, extent, resolve);

        resources.write_constants(context, &GlowConstants::composite(settings))?;
        unsafe {
            resources.bind_fullscreen(context, extent, &resources.composite_ps);
            context.OMSetBlendState(&resources.additive_blend, Some(&[0.0; 4]), 0xffff_ffff);
            context.PSSetShaderResources(0, Some(&[Some(targets.blur_b.srv.clone())]));
            context.Draw(3, 0);
            context.PSSetShaderResources(0, Some(&[None]));
            context.OMSetBlendState(None, None, 0xffff_ffff);
        }
        Ok(())
    }
}

impl GlowResources {
    fn blur_pass(
        &self,
        context: &ID3D11DeviceContext,
        input: &GlowTarget,
        output: &GlowTarget,
        axis: BlurAxis,
        extent: TargetExtent,
        settings: &GlowSettings,
    ) -> Result<()> {
        self.write_constants(context, &GlowConstants::blur(axis, extent, settings))?;
        unsafe {
            context.OMSetRenderTargets(Some(&[Some(output.rtv.clone())]), None);
            self.bind_fullscreen(context, extent, &self.blur_ps);
            context.OMSetBlendState(None, None, 0xffff_ffff);
            context.PSSetShaderResources(0, Some(&[Some(input.srv.clone())]));
            context.Draw(3, 0);
            // The next pass renders into `input`'s sibling; unbind before it
            // becomes a render target.
            context.PSSetShaderResources(0, Some(&[None]));
        }
        Ok(())
    }

    unsafe fn bind_fullscreen(&self, context: &ID3D11DeviceContext, extent: TargetExtent, ps: &ID3D11PixelShader) {
        unsafe {
            context.IASetInputLayout(None);
            context.IASetPrimitiveTopology(D3D11_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
            context.VSSetShader(&self.fullscreen_vs, None);
            context.PSSetShader(ps, None);
            context.PSSetConstantBuffers(0, Some(&[Some(self.constant_buffer.clone())]));
            context.PSSetSamplers(0, Some(&[Some(self.sampler.clone())]));
            context.RSSetState(&self.rasterizer_state);
            context.RSSetViewports(Some(&[D3D11_VIEWPORT {
                Width: extent.width as f32,
                Height: extent.height as f32,
                MaxDepth: 1.0,
                ..Default::default()
            }]));
        }
    }

    fn write_constants(&self, context: &ID3D11DeviceContext, constants: &GlowConstants) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(constants.as_values());
        unsafe {
            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            context.Map(&self.constant_buffer, 0, D3D11_MAP_WRITE_DISCARD, 0, Some(&mut mapped))?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapped.pData as *mut u8, bytes.len());
            context.Unmap(&self.constant_buffer, 0);
        }
        Ok(())
    }
}

fn create_resources(device: &ID3D11Device, extent: TargetExtent) -> Result<GlowResources> {
    let vs = compile_shader(GLOW_HLSL, "FullscreenVS", "vs_5_0")?;
    let blur = compile_shader(GLOW_HLSL, "BlurPS", "ps_5_0")?;
    let composite = compile_shader(GLOW_HLSL, "CompositePS", "ps_5_0")?;

    unsafe {
        let mut fullscreen_vs = None;
        device.CreateVertexShader(blob_bytes(&vs), None, Some(&mut fullscreen_vs))?;
        let mut blur_ps = None;
        device.CreatePixelShader(blob_bytes(&blur), None, Some(&mut blur_ps))?;
        let mut composite_ps = None;
        device.CreatePixelShader(blob_bytes(&composite), None, Some(&mut composite_ps))?;

        let mut constant_buffer = None;
        device.CreateBuffer(
            &D3D11_BUFFER_DESC {
                ByteWidth: std::mem::size_of::<GlowConstants>() as u32,
                Usage: D3D11_USAGE_DYNAMIC,
                BindFlags: D3D11_BIND_CONSTANT_BUFFER.0 as u32,
                CPUAccessFlags: D3D11_CPU_ACCESS_WRITE.0 as u32,
                MiscFlags: 0,
                StructureByteStride: 0,
            },
            None,
            Some(&mut constant_buffer),
        )?;

        let mut blend_desc = D3D11_BLEND_DESC::default();
        blend_desc.RenderTarget[0] = D3D11_RENDER_TARGET_BLEND_DESC {
            BlendEnable: true.into(),
            SrcBlend: D3D11_BLEND_ONE,
            DestBlend: D3D11_BLEND_ONE,
            BlendOp: D3D11_BLEND_OP_ADD,
            SrcBlendAlpha: D3D11_BLEND_ONE,
            DestBlendAlpha: D3D11_BLEND_ZERO,
            BlendOpAlpha: D3D11_BLEND_OP_ADD,
            RenderTargetWriteMask: D3D11_COLOR_WRITE_ENABLE_ALL.0 as u8,
        };
        let mut additive_blend = None;
        device.CreateBlendState(&blend_desc, Some(&mut additive_blend))?;

        let mut rasterizer_state = None;
        device.CreateRasterizerState(
            &D3D11_RASTERIZER_DESC {
                FillMode: D3D11_FILL_SOLID,
                CullMode: D3D11_CULL_NONE,
                DepthClipEnable: true.into(),
                ..Default::default()
            },
            Some(&mut rasterizer_state),
        )?;

        Ok(GlowResources {
            fullscreen_vs: fullscreen_vs.ok_or_else(|| anyhow!("Failed to create fullscreen vertex shader"))?,
            blur_ps: blur_ps.ok_or_else(|| anyhow!("Failed to create blur pixel shader"))?,
            composite_ps: composite_ps.ok_or_else(|| anyhow!("Failed to create composite pixel shader"))?,
            constant_buffer: constant_buffer.ok_or_else(|| anyhow!("Failed to create glow constants"))?,
            additive_blend: additive_blend.ok_or_else(|| anyhow!("Failed to create additive blend state"))?,
            rasterizer_state: rasterizer_state.ok_or_else(|| anyhow!("Failed to create glow rasterizer state"))?,
            sampler: create_linear_sampler(device)?,
            targets: GlowTargets {
                emissive: create_target(device, extent)?,
                blur_a: create_target(device, extent)?,
                blur_b: create_target(device, extent)?,
            },
        })
    }
}

fn create_target(device: &ID3D11Device, extent: TargetExtent) -> Result<GlowTarget> {
    unsafe {
        let mut texture = None;
        device.CreateTexture2D(
            &D3D11_TEXTURE2D_DESC {
                Width: extent.width,
                Height: extent.height,
                MipLevels: 1,
                ArraySize: 1,
                Format: GLOW_FORMAT,
                SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
                Usage: D3D11_USAGE_DEFAULT,
                BindFlags: (D3D11_BIND_RENDER_TARGET.0 | D3D11_BIND_SHADER_RESOURCE.0) as u32,
                CPUAccessFlags: 0,
                MiscFlags: 0,
            },
            None,
            Some(&mut texture),
        )?;
        let texture: ID3D11Texture2D = texture.ok_or_else(|| anyhow!("Failed to create glow target"))?;

        let mut rtv = None;
        device.CreateRenderTargetView(&texture, None, Some(&mut rtv))?;
        let mut srv = None;
        device.CreateShaderResourceView(&texture, None, Some(&mut srv))?;

        Ok(GlowTarget {
            rtv: rtv.ok_or_else(|| anyhow!("Failed to create glow RTV"))?,
            srv: srv.ok_or_else(|| anyhow!("Failed to create glow SRV"))?,
            _texture: texture,
        })
    }
}
