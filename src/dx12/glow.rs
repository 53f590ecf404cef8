use std::mem::ManuallyDrop;

use anyhow::{anyhow, Result};
use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use super::resource_barrier;
use super::ui::{UiPipelineDx12, UiTarget};
use crate::d3d::{blob_bytes, compile_shader};
use crate::glow::{
    BlurAxis, GlowConstants, GlowSettings, ResizeAction, SizedResources, TargetExtent, GLOW_HLSL,
};
use crate::gpu::{DescriptorSlot, SharedDescriptorHeap};
use crate::ui::{DrawList, UiTexture};

const GLOW_FORMAT: DXGI_FORMAT = DXGI_FORMAT_R16G16B16A16_FLOAT;

/// One off-screen target: the texture, its RTV and its SRV slot.
struct GlowTarget {
    resource: ID3D12Resource,
    rtv: D3D12_CPU_DESCRIPTOR_HANDLE,
    srv: DescriptorSlot,
}

impl GlowTarget {
    fn srv_gpu(&self) -> D3D12_GPU_DESCRIPTOR_HANDLE {
        D3D12_GPU_DESCRIPTOR_HANDLE { ptr: self.srv.gpu().0 }
    }
}

struct GlowTargets {
    // Keeps the RTV descriptors alive.
    _rtv_heap: ID3D12DescriptorHeap,
    emissive: GlowTarget,
    blur_a: GlowTarget,
    blur_b: GlowTarget,
}

/// What a resize throws away and recreates.
struct GlowResources {
    blur_pso: ID3D12PipelineState,
    composite_pso: ID3D12PipelineState,
    targets: GlowTargets,
}

/// Emissive pass, separable blur and additive composite on D3D12. Targets
/// are RGBA16F and rest in the pixel-shader-resource state between frames.
pub struct GlowPipelineDx12 {
    root_signature: ID3D12RootSignature,
    resources: SizedResources<GlowResources>,
}

impl GlowPipelineDx12 {
    /// Nothing is built until the first [`resize`](Self::resize).
    pub fn new(root_signature: &ID3D12RootSignature) -> Self {
        Self {
            root_signature: root_signature.clone(),
            resources: SizedResources::new(),
        }
    }

    /// Any size change recompiles the shaders and rebuilds the pipeline
    /// states and targets. The GPU must be idle.
    pub fn resize(
        &mut self,
        device: &ID3D12Device,
        heap: &SharedDescriptorHeap,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let root_signature = &self.root_signature;
        let action = self.resources.resize(width, height, |extent| {
            create_resources(device, root_signature, heap, extent)
        })?;
        if let ResizeAction::Rebuild(extent) = action {
            log::debug!("Glow pipeline rebuilt at {}x{}", extent.width, extent.height);
        }
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.resources.get().is_some()
    }

    /// Record the whole glow frame: emissive, two blur passes, the base UI
    /// onto `main_rtv`, then the composite. Falls back to the plain UI pass
    /// when the targets are missing.
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &self,
        list: &ID3D12GraphicsCommandList,
        ui: &UiPipelineDx12,
        vertices: &D3D12_VERTEX_BUFFER_VIEW,
        draw: &DrawList,
        main_rtv: D3D12_CPU_DESCRIPTOR_HANDLE,
        extent: TargetExtent,
        settings: &GlowSettings,
        resolve: &dyn Fn(UiTexture) -> Option<D3D12_GPU_DESCRIPTOR_HANDLE>,
    ) {
        let Some((glow_extent, resources)) = self.resources.get() else {
            unsafe { list.OMSetRenderTargets(1, Some(&main_rtv), false, None) };
            ui.draw(list, UiTarget::Backbuffer, vertices, draw, extent, resolve);
            return;
        };
        let targets = &resources.targets;

        unsafe {
            resource_barrier(
                list,
                &targets.emissive.resource,
                D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE,
                D3D12_RESOURCE_STATE_RENDER_TARGET,
            );
            list.OMSetRenderTargets(1, Some(&targets.emissive.rtv), false, None);
            list.ClearRenderTargetView(targets.emissive.rtv, &[0.0, 0.0, 0.0, 0.0], None);
        }
        ui.draw(list, UiTarget::Emissive, vertices, draw, glow_extent, resolve);

        unsafe {
            resource_barrier(
                list,
                &targets.emissive.resource,
                D3D12_RESOURCE_STATE_RENDER_TARGET,
                D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE,
            );
            resources.blur_pass(list, &targets.emissive, &targets.blur_a, BlurAxis::Horizontal, glow_extent, settings);
            resources.blur_pass(list, &targets.blur_a, &targets.blur_b, BlurAxis::Vertical, glow_extent, settings);

            list.OMSetRenderTargets(1, Some(&main_rtv), false, None);
        }
        ui.draw(list, UiTarget::Backbuffer, vertices, draw, extent, resolve);

        unsafe {
            set_fullscreen_state(list, extent);
            list.SetPipelineState(&resources.composite_pso);
            list.SetGraphicsRootDescriptorTable(0, targets.blur_b.srv_gpu());
            let constants = GlowConstants::composite(settings);
            list.SetGraphicsRoot32BitConstants(
                1,
                GlowConstants::NUM_VALUES,
                constants.as_values().as_ptr() as *const std::ffi::c_void,
                0,
            );
            list.DrawInstanced(3, 1, 0, 0);
        }
    }
}

impl GlowResources {
    unsafe fn blur_pass(
        &self,
        list: &ID3D12GraphicsCommandList,
        input: &GlowTarget,
        output: &GlowTarget,
        axis: BlurAxis,
        extent: TargetExtent,
        settings: &GlowSettings,
    ) {
        unsafe {
            resource_barrier(
                list,
                &output.resource,
                D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE,
                D3D12_RESOURCE_STATE_RENDER_TARGET,
            );
            list.OMSetRenderTargets(1, Some(&output.rtv), false, None);
            set_fullscreen_state(list, extent);
            list.SetPipelineState(&self.blur_pso);
            list.SetGraphicsRootDescriptorTable(0, input.srv_gpu());
            let constants = GlowConstants::blur(axis, extent, settings);
            list.SetGraphicsRoot32BitConstants(
                1,
                GlowConstants::NUM_VALUES,
                constants.as_values().as_ptr() as *const std::ffi::c_void,
                0,
            );
            list.DrawInstanced(3, 1, 0, 0);
            resource_barrier(
                list,
                &output.resource,
                D3D12_RESOURCE_STATE_RENDER_TARGET,
                D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE,
            );
        }
    }
}

unsafe fn set_fullscreen_state(list: &ID3D12GraphicsCommandList, extent: TargetExtent) {
    unsafe {
        list.RSSetViewports(&[D3D12_VIEWPORT {
            Width: extent.width as f32,
            Height: extent.height as f32,
            MaxDepth: 1.0,
            ..Default::default()
        }]);
        list.RSSetScissorRects(&[RECT {
            right: extent.width as i32,
            bottom: extent.height as i32,
            ..Default::default()
        }]);
        list.IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
    }
}

fn create_resources(
    device: &ID3D12Device,
    root_signature: &ID3D12RootSignature,
    heap: &SharedDescriptorHeap,
    extent: TargetExtent,
) -> Result<GlowResources> {
    let vs = compile_shader(GLOW_HLSL, "FullscreenVS", "vs_5_0")?;
    let blur = compile_shader(GLOW_HLSL, "BlurPS", "ps_5_0")?;
    let composite = compile_shader(GLOW_HLSL, "CompositePS", "ps_5_0")?;

    Ok(GlowResources {
        blur_pso: create_fullscreen_pso(device, root_signature, blob_bytes(&vs), blob_bytes(&blur), false)?,
        composite_pso: create_fullscreen_pso(
            device,
            root_signature,
            blob_bytes(&vs),
            blob_bytes(&composite),
            true,
        )?,
        targets: create_targets(device, heap, extent)?,
    })
}

fn create_targets(device: &ID3D12Device, heap: &SharedDescriptorHeap, extent: TargetExtent) -> Result<GlowTargets> {
    unsafe {
        let rtv_heap: ID3D12DescriptorHeap = device.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
            NumDescriptors: 3,
            Type: D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
            ..Default::default()
        })?;
        let rtv_size = device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_RTV) as usize;
        let rtv_start = rtv_heap.GetCPUDescriptorHandleForHeapStart();

        let make = |index: usize| -> Result<GlowTarget> {
            let resource = create_target_texture(device, extent)?;
            let rtv = D3D12_CPU_DESCRIPTOR_HANDLE {
                ptr: rtv_start.ptr + index * rtv_size,
            };
            device.CreateRenderTargetView(&resource, None, rtv);

            let srv = heap.alloc_slot()?;
            device.CreateShaderResourceView(
                &resource,
                Some(&D3D12_SHADER_RESOURCE_VIEW_DESC {
                    Format: GLOW_FORMAT,
                    ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
                    Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                    Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                        Texture2D: D3D12_TEX2D_SRV {
                            MipLevels: 1,
                            ..Default::default()
                        },
                    },
                }),
                D3D12_CPU_DESCRIPTOR_HANDLE { ptr: srv.cpu().0 },
            );
            Ok(GlowTarget { resource, rtv, srv })
        };

        let emissive = make(0)?;
        let blur_a = make(1)?;
        let blur_b = make(2)?;

        Ok(GlowTargets {
            _rtv_heap: rtv_heap,
            emissive,
            blur_a,
            blur_b,
        })
    }
}

unsafe fn create_target_texture(device: &ID3D12Device, extent: TargetExtent) -> Result<ID3D12Resource> {
    unsafe {
        let mut texture: Option<ID3D12Resource> = None;
        device.CreateCommittedResource(
            &D3D12_HEAP_PROPERTIES {
                Type: D3D12_HEAP_TYPE_DEFAULT,
                ..Default::default()
            },
            D3D12_HEAP_FLAG_NONE,
            &D3D12_RESOURCE_DESC {
                Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
                Width: extent.width as u64,
                Height: extent.height,
                DepthOrArraySize: 1,
                MipLevels: 1,
                Format: GLOW_FORMAT,
                SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
                Flags: D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET,
                ..Default::default()
            },
            D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE,
            Some(&D3D12_CLEAR_VALUE {
                Format: GLOW_FORMAT,
                Anonymous: D3D12_CLEAR_VALUE_0 {
                    Color: [0.0, 0.0, 0.0, 0.0],
                },
            }),
            &mut texture,
        )?;
        texture.ok_or_else(|| anyhow!("Failed to create glow target"))
    }
}

/// Fullscreen-triangle PSO. The blur writes RGBA16F unblended; the
/// composite adds colour onto the back buffer and replaces its alpha.
fn create_fullscreen_pso(
    device: &ID3D12Device,
    root_signature: &ID3D12RootSignature,
    vs: &[u8],
    ps: &[u8],
    additive: bool,
) -> Result<ID3D12PipelineState> {
    unsafe {
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
            PrimitiveTopologyType: D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
            NumRenderTargets: 1,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            ..Default::default()
        };
        pso_desc.BlendState.RenderTarget[0] = if additive {
            D3D12_RENDER_TARGET_BLEND_DESC {
                BlendEnable: true.into(),
                SrcBlend: D3D12_BLEND_ONE,
                DestBlend: D3D12_BLEND_ONE,
                BlendOp: D3D12_BLEND_OP_ADD,
                SrcBlendAlpha: D3D12_BLEND_ONE,
                DestBlendAlpha: D3D12_BLEND_ZERO,
                BlendOpAlpha: D3D12_BLEND_OP_ADD,
                RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
                ..Default::default()
            }
        } else {
            D3D12_RENDER_TARGET_BLEND_DESC {
                BlendEnable: false.into(),
                RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
                ..Default::default()
            }
        };
        pso_desc.RTVFormats[0] = if additive {
            DXGI_FORMAT_R8G8B8A8_UNORM
        } else {
            GLOW_FORMAT
        };

        let pso = device.CreateGraphicsPipelineState(&pso_desc);
        ManuallyDrop::drop(&mut pso_desc.pRootSignature);
        Ok(pso?)
    }
}
