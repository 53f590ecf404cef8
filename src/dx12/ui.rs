use std::mem::ManuallyDrop;

use anyhow::{anyhow, Result};
use windows::core::PCSTR;
use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::d3d::{blob_bytes, compile_shader};
use crate::glow::TargetExtent;
use crate::ui::{DrawList, UiTexture, Vertex, UI_HLSL};

/// Vertices one frame slot can hold.
const MAX_UI_VERTICES: usize = 64 * 1024;

/// Which render target format the UI is drawn into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiTarget {
    Backbuffer,
    Emissive,
}

/// egui triangle lists, drawn with a persistently mapped upload buffer
/// split into one region per frame in flight.
pub struct UiPipelineDx12 {
    backbuffer_pso: ID3D12PipelineState,
    emissive_pso: ID3D12PipelineState,
    vertex_buffer: ID3D12Resource,
    vertex_ptr: *mut u8,
    frames: usize,
}

impl UiPipelineDx12 {
    pub fn new(
        device: &ID3D12Device,
        root_signature: &ID3D12RootSignature,
        frames_in_flight: usize,
    ) -> Result<Self> {
        let backbuffer_pso = create_ui_pso(device, root_signature, DXGI_FORMAT_R8G8B8A8_UNORM)?;
        let emissive_pso = create_ui_pso(device, root_signature, DXGI_FORMAT_R16G16B16A16_FLOAT)?;

        let size = (MAX_UI_VERTICES * std::mem::size_of::<Vertex>() * frames_in_flight) as u64;
        unsafe {
            let mut resource: Option<ID3D12Resource> = None;
            device.CreateCommittedResource(
                &D3D12_HEAP_PROPERTIES {
                    Type: D3D12_HEAP_TYPE_UPLOAD,
                    ..Default::default()
                },
                D3D12_HEAP_FLAG_NONE,
                &D3D12_RESOURCE_DESC {
                    Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
                    Width: size,
                    Height: 1,
                    DepthOrArraySize: 1,
                    MipLevels: 1,
                    SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
                    Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
                    ..Default::default()
                },
                D3D12_RESOURCE_STATE_GENERIC_READ,
                None,
                &mut resource,
            )?;
            let vertex_buffer = resource.ok_or_else(|| anyhow!("Failed to create UI vertex buffer"))?;

            let mut mapped: *mut std::ffi::c_void = std::ptr::null_mut();
            vertex_buffer.Map(0, None, Some(&mut mapped))?;

            Ok(Self {
                backbuffer_pso,
                emissive_pso,
                vertex_buffer,
                vertex_ptr: mapped as *mut u8,
                frames: frames_in_flight,
            })
        }
    }

    /// Copy this frame's vertices into the slot's region. Returns `None`
    /// when there is nothing to draw.
    pub fn upload(&self, frame_index: usize, draw: &DrawList) -> Option<D3D12_VERTEX_BUFFER_VIEW> {
        if draw.vertices.is_empty() || frame_index >= self.frames {
            return None;
        }
        let count = if draw.vertices.len() > MAX_UI_VERTICES {
            log::warn!(
                "UI produced {} vertices, drawing the first {}",
                draw.vertices.len(),
                MAX_UI_VERTICES
            );
            MAX_UI_VERTICES
        } else {
            draw.vertices.len()
        };

        let stride = std::mem::size_of::<Vertex>();
        let offset = frame_index * MAX_UI_VERTICES * stride;
        let bytes: &[u8] = bytemuck::cast_slice(&draw.vertices[..count]);
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.vertex_ptr.add(offset), bytes.len());
            Some(D3D12_VERTEX_BUFFER_VIEW {
                BufferLocation: self.vertex_buffer.GetGPUVirtualAddress() + offset as u64,
                SizeInBytes: bytes.len() as u32,
                StrideInBytes: stride as u32,
            })
        }
    }

    /// Record the batches into the currently bound render target. The
    /// shader-visible heap and root signature must already be set.
    pub fn draw(
        &self,
        list: &ID3D12GraphicsCommandList,
        target: UiTarget,
        vertices: &D3D12_VERTEX_BUFFER_VIEW,
        draw: &DrawList,
        extent: TargetExtent,
        resolve: &dyn Fn(UiTexture) -> Option<D3D12_GPU_DESCRIPTOR_HANDLE>,
    ) {
        let vertex_count = vertices.SizeInBytes / vertices.StrideInBytes;
        unsafe {
            list.SetPipelineState(match target {
                UiTarget::Backbuffer => &self.backbuffer_pso,
                UiTarget::Emissive => &self.emissive_pso,
            });
            list.RSSetViewports(&[D3D12_VIEWPORT {
                Width: extent.width as f32,
                Height: extent.height as f32,
                MaxDepth: 1.0,
                ..Default::default()
            }]);
            list.IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
            list.IASetVertexBuffers(0, Some(&[*vertices]));

            for batch in &draw.batches {
                if batch.first_vertex + batch.vertex_count > vertex_count {
                    break;
                }
                let Some(texture) = resolve(batch.texture) else {
                    continue;
                };
                let [left, top, right, bottom] = batch.scissor;
                list.RSSetScissorRects(&[RECT {
                    left: left as i32,
                    top: top as i32,
                    right: right.min(extent.width) as i32,
                    bottom: bottom.min(extent.height) as i32,
                }]);
                list.SetGraphicsRootDescriptorTable(0, texture);
                list.DrawInstanced(batch.vertex_count, 1, batch.first_vertex, 0);
            }
        }
    }
}

impl Drop for UiPipelineDx12 {
    fn drop(&mut self) {
        unsafe {
            self.vertex_buffer.Unmap(0, None);
        }
    }
}

fn create_ui_pso(
    device: &ID3D12Device,
    root_signature: &ID3D12RootSignature,
    format: DXGI_FORMAT,
) -> Result<ID3D12PipelineState> {
    let vs_blob = compile_shader(UI_HLSL, "UiVS", "vs_5_0")?;
    let ps_blob = compile_shader(UI_HLSL, "UiPS", "ps_5_0")?;

    let input_elements = [
        D3D12_INPUT_ELEMENT_DESC {
            SemanticName: PCSTR(b"POSITION\0".as_ptr()),
            SemanticIndex: 0,
            Format: DXGI_FORMAT_R32G32_FLOAT,
            InputSlot: 0,
            AlignedByteOffset: 0,
            InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
            InstanceDataStepRate: 0,
        },
        D3D12_INPUT_ELEMENT_DESC {
            SemanticName: PCSTR(b"TEXCOORD\0".as_ptr()),
            SemanticIndex: 0,
            Format: DXGI_FORMAT_R32G32_FLOAT,
            InputSlot: 0,
            AlignedByteOffset: 8,
            InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
            InstanceDataStepRate: 0,
        },
        D3D12_INPUT_ELEMENT_DESC {
            SemanticName: PCSTR(b"COLOR\0".as_ptr()),
            SemanticIndex: 0,
            Format: DXGI_FORMAT_R32G32B32A32_FLOAT,
            InputSlot: 0,
            AlignedByteOffset: 16,
            InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
            InstanceDataStepRate: 0,
        },
    ];

    unsafe {
        let vs = blob_bytes(&vs_blob);
        let ps = blob_bytes(&ps_blob);
        let mut pso_desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
            pRootSignature: ManuallyDrop::new(Some(root_signature.clone())),
            VS: D3D12_SHADER_BYTECODE {
                pShaderBytecode: vs.as_ptr() as *const _,
                BytecodeLength: vs.len(),
            },
            PS: D3D12_SHADER_BYTECODE {
                pShaderBytecode: ps.as_ptr() as *const _,
                BytecodeLength: ps.len(),
            },
            SampleMask: u32::MAX,
            RasterizerState: D3D12_RASTERIZER_DESC {
                FillMode: D3D12_FILL_MODE_SOLID,
                CullMode: D3D12_CULL_MODE_NONE,
                DepthClipEnable: true.into(),
                ..Default::default()
            },
            InputLayout: D3D12_INPUT_LAYOUT_DESC {
                pInputElementDescs: input_elements.as_ptr(),
                NumElements: input_elements.len() as u32,
            },
            PrimitiveTopologyType: D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
            NumRenderTargets: 1,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            ..Default::default()
        };
        // egui colours are premultiplied.
        pso_desc.BlendState.RenderTarget[0] = D3D12_RENDER_TARGET_BLEND_DESC {
            BlendEnable: true.into(),
            SrcBlend: D3D12_BLEND_ONE,
            DestBlend: D3D12_BLEND_INV_SRC_ALPHA,
            BlendOp: D3D12_BLEND_OP_ADD,
            SrcBlendAlpha: D3D12_BLEND_ONE,
            DestBlendAlpha: D3D12_BLEND_INV_SRC_ALPHA,
            BlendOpAlpha: D3D12_BLEND_OP_ADD,
            RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
            ..Default::default()
        };
        pso_desc.RTVFormats[0] = format;

        let pso = device.CreateGraphicsPipelineState(&pso_desc);
        // Release the root signature reference held by the descriptor.
        ManuallyDrop::drop(&mut pso_desc.pRootSignature);
        Ok(pso?)
    }
}
