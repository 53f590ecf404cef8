use anyhow::{anyhow, Result};
use windows::core::PCSTR;
use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use super::create_linear_sampler;
use crate::d3d::{blob_bytes, compile_shader};
use crate::glow::TargetExtent;
use crate::ui::{DrawList, Vertex, UI_HLSL};

/// egui triangle lists through a dynamic vertex buffer that grows on demand.
pub struct UiPipelineDx11 {
    vertex_shader: ID3D11VertexShader,
    pixel_shader: ID3D11PixelShader,
    input_layout: ID3D11InputLayout,
    blend_state: ID3D11BlendState,
    rasterizer_state: ID3D11RasterizerState,
    sampler: ID3D11SamplerState,
    vertex_buffer: Option<ID3D11Buffer>,
    vertex_capacity: usize,
}

impl UiPipelineDx11 {
    pub fn new(device: &ID3D11Device) -> Result<Self> {
        let vs_blob = compile_shader(UI_HLSL, "UiVS", "vs_5_0")?;
        let ps_blob = compile_shader(UI_HLSL, "UiPS", "ps_5_0")?;

        let input_elements = [
            D3D11_INPUT_ELEMENT_DESC {
                SemanticName: PCSTR(b"POSITION\0".as_ptr()),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: 0,
                InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
            D3D11_INPUT_ELEMENT_DESC {
                SemanticName: PCSTR(b"TEXCOORD\0".as_ptr()),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: 8,
                InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
            D3D11_INPUT_ELEMENT_DESC {
                SemanticName: PCSTR(b"COLOR\0".as_ptr()),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32B32A32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: 16,
                InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
        ];

        unsafe {
            let mut vertex_shader = None;
            device.CreateVertexShader(blob_bytes(&vs_blob), None, Some(&mut vertex_shader))?;
            let mut pixel_shader = None;
            device.CreatePixelShader(blob_bytes(&ps_blob), None, Some(&mut pixel_shader))?;
            let mut input_layout = None;
            device.CreateInputLayout(&input_elements, blob_bytes(&vs_blob), Some(&mut input_layout))?;

            let mut blend_desc = D3D11_BLEND_DESC::default();
            // egui colours are premultiplied.
            blend_desc.RenderTarget[0] = D3D11_RENDER_TARGET_BLEND_DESC {
                BlendEnable: true.into(),
                SrcBlend: D3D11_BLEND_ONE,
                DestBlend: D3D11_BLEND_INV_SRC_ALPHA,
                BlendOp: D3D11_BLEND_OP_ADD,
                SrcBlendAlpha: D3D11_BLEND_ONE,
                DestBlendAlpha: D3D11_BLEND_INV_SRC_ALPHA,
                BlendOpAlpha: D3D11_BLEND_OP_ADD,
                RenderTargetWriteMask: D3D11_COLOR_WRITE_ENABLE_ALL.0 as u8,
            };
            let mut blend_state = None;
            device.CreateBlendState(&blend_desc, Some(&mut blend_state))?;

            let mut rasterizer_state = None;
            device.CreateRasterizerState(
                &D3D11_RASTERIZER_DESC {
                    FillMode: D3D11_FILL_SOLID,
                    CullMode: D3D11_CULL_NONE,
                    DepthClipEnable: true.into(),
                    ScissorEnable: true.into(),
                    ..Default::default()
                },
                Some(&mut rasterizer_state),
            )?;

            Ok(Self {
                vertex_shader: vertex_shader.ok_or_else(|| anyhow!("Failed to create UI vertex shader"))?,
                pixel_shader: pixel_shader.ok_or_else(|| anyhow!("Failed to create UI pixel shader"))?,
                input_layout: input_layout.ok_or_else(|| anyhow!("Failed to create UI input layout"))?,
                blend_state: blend_state.ok_or_else(|| anyhow!("Failed to create UI blend state"))?,
                rasterizer_state: rasterizer_state
                    .ok_or_else(|| anyhow!("Failed to create UI rasterizer state"))?,
                sampler: create_linear_sampler(device)?,
                vertex_buffer: None,
                vertex_capacity: 0,
            })
        }
    }

    /// Write this frame's vertices. Returns false when there is nothing to draw.
    pub fn upload(&mut self, device: &ID3D11Device, context: &ID3D11DeviceContext, draw: &DrawList) -> Result<bool> {
        if draw.vertices.is_empty() {
            return Ok(false);
        }
        if draw.vertices.len() > self.vertex_capacity {
            let capacity = draw.vertices.len().next_power_of_two().max(4096);
            let mut buffer = None;
            unsafe {
                device.CreateBuffer(
                    &D3D11_BUFFER_DESC {
                        ByteWidth: (capacity * std::mem::size_of::<Vertex>()) as u32,
                        Usage: D3D11_USAGE_DYNAMIC,
                        BindFlags: D3D11_BIND_VERTEX_BUFFER.0 as u32,
                        CPUAccessFlags: D3D11_CPU_ACCESS_WRITE.0 as u32,
                        MiscFlags: 0,
                        StructureByteStride: 0,
                    },
                    None,
                    Some(&mut buffer),
                )?;
            }
            self.vertex_buffer = Some(buffer.ok_or_else(|| anyhow!("Failed to create UI vertex buffer"))?);
            self.vertex_capacity = capacity;
            log::debug!("UI vertex buffer grown to {} vertices", capacity);
        }

        let Some(buffer) = &self.vertex_buffer else {
            return Ok(false);
        };
        let bytes: &[u8] = bytemuck::cast_slice(&draw.vertices);
        unsafe {
            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            context.Map(buffer, 0, D3D11_MAP_WRITE_DISCARD, 0, Some(&mut mapped))?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapped.pData as *mut u8, bytes.len());
            context.Unmap(buffer, 0);
        }
        Ok(true)
    }

    /// Draw into the bound render target. `upload` must have succeeded
    /// this frame.
    pub fn draw(
        &self,
        context: &ID3D11DeviceContext,
        draw: &DrawList,
        extent: TargetExtent,
        resolve: &dyn Fn(crate::ui::UiTexture) -> Option<ID3D11ShaderResourceView>,
    ) {
        let Some(buffer) = &self.vertex_buffer else {
            return;
        };
        let stride = std::mem::size_of::<Vertex>() as u32;
        let offset = 0u32;
        unsafe {
            context.IASetInputLayout(&self.input_layout);
            context.IASetVertexBuffers(0, 1, Some(&Some(buffer.clone())), Some(&stride), Some(&offset));
            context.IASetPrimitiveTopology(D3D11_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
            context.VSSetShader(&self.vertex_shader, None);
            context.PSSetShader(&self.pixel_shader, None);
            context.PSSetSamplers(0, Some(&[Some(self.sampler.clone())]));
            context.OMSetBlendState(&self.blend_state, Some(&[0.0; 4]), 0xffff_ffff);
            context.RSSetState(&self.rasterizer_state);
            context.RSSetViewports(Some(&[D3D11_VIEWPORT {
                Width: extent.width as f32,
                Height: extent.height as f32,
                MaxDepth: 1.0,
                ..Default::default()
            }]));

            for batch in &draw.batches {
                let Some(srv) = resolve(batch.texture) else {
                    continue;
                };
                let [left, top, right, bottom] = batch.scissor;
                context.RSSetScissorRects(Some(&[RECT {
                    left: left as i32,
                    top: top as i32,
                    right: right.min(extent.width) as i32,
                    bottom: bottom.min(extent.height) as i32,
                }]));
                context.PSSetShaderResources(0, Some(&[Some(srv)]));
                context.Draw(batch.vertex_count, batch.first_vertex);
            }
            context.PSSetShaderResources(0, Some(&[None]));
        }
    }
}
