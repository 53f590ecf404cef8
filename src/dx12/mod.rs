//! Direct3D 12 backend: waitable flip-model swap chain, a fixed-size
//! shader-visible SRV heap shared by every texture, a dedicated upload list
//! and the glow pipeline.

mod glow;
mod timeline;
mod ui;
mod upload;

use std::mem::ManuallyDrop;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use windows::core::Interface;
use windows::Win32::Foundation::*;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

use self::glow::GlowPipelineDx12;
use self::timeline::Dx12Timeline;
use self::ui::{UiPipelineDx12, UiTarget};
use self::upload::Dx12UploadQueue;
use crate::config::AppConfig;
use crate::d3d::blob_bytes;
use crate::glow::{GlowSettings, TargetExtent};
use crate::font::FontTexture;
use crate::gpu::{
    CpuDescriptorHandle, DescriptorHeapInfo, FrameSync, GpuDescriptorHandle, GpuTexture,
    SharedDescriptorHeap,
};
use crate::loading::LoadingAnimation;
use crate::reload::{BackgroundReload, FrontendSettings};
use crate::render::{PendingResize, Renderer};
use crate::ui::{UiOutput, UiTexture, UiTextures, BACKGROUND_TEXTURE_ID, SPINNER_TEXTURE_ID};

const BACK_BUFFER_COUNT: u32 = 2;
const CLEAR_COLOR: [f32; 4] = [0.45, 0.55, 0.60, 1.00];

type Texture = GpuTexture<ID3D12Resource>;

pub struct Dx12Renderer {
    device: ID3D12Device,
    command_queue: ID3D12CommandQueue,
    swapchain: IDXGISwapChain3,
    swapchain_flags: DXGI_SWAP_CHAIN_FLAG,
    rtv_heap: ID3D12DescriptorHeap,
    rtv_descriptor_size: u32,
    render_targets: Vec<ID3D12Resource>,
    command_list: ID3D12GraphicsCommandList,
    sync: FrameSync<Dx12Timeline, ID3D12CommandAllocator>,
    srv_heap: ID3D12DescriptorHeap,
    descriptors: SharedDescriptorHeap,
    upload: Mutex<Dx12UploadQueue>,
    root_signature: ID3D12RootSignature,
    ui_pipeline: UiPipelineDx12,
    glow: GlowPipelineDx12,
    font: FontTexture<Texture>,
    background: BackgroundReload<Texture, ID3D12Resource>,
    loading: LoadingAnimation<Texture>,
    width: u32,
    height: u32,
    pending_resize: PendingResize,
    tearing_supported: bool,
    occluded: bool,
}

impl Dx12Renderer {
    pub fn new(hwnd: HWND, width: u32, height: u32, config: &AppConfig) -> Result<Self> {
        unsafe {
            let factory: IDXGIFactory4 = CreateDXGIFactory2(DXGI_CREATE_FACTORY_FLAGS(0))?;

            let adapter = get_hardware_adapter(&factory)?;
            let mut device: Option<ID3D12Device> = None;
            D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device)?;
            let device = device.ok_or_else(|| anyhow!("Failed to create device"))?;

            let command_queue: ID3D12CommandQueue = device.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                ..Default::default()
            })?;

            let tearing_supported = tearing_supported(&factory);
            let mut swapchain_flags = DXGI_SWAP_CHAIN_FLAG_FRAME_LATENCY_WAITABLE_OBJECT.0;
            if tearing_supported {
                swapchain_flags |= DXGI_SWAP_CHAIN_FLAG_ALLOW_TEARING.0;
            }
            let swapchain_flags = DXGI_SWAP_CHAIN_FLAG(swapchain_flags);

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
                Flags: swapchain_flags.0 as u32,
                ..Default::default()
            };
            let swapchain: IDXGISwapChain1 =
                factory.CreateSwapChainForHwnd(&command_queue, hwnd, &swapchain_desc, None, None)?;
            factory.MakeWindowAssociation(hwnd, DXGI_MWA_NO_ALT_ENTER)?;
            let swapchain: IDXGISwapChain3 = swapchain.cast()?;
            swapchain.SetMaximumFrameLatency(BACK_BUFFER_COUNT)?;

            let mut timeline = Dx12Timeline::new(&device, &command_queue)?;
            timeline.set_swap_chain_waitable(swapchain.GetFrameLatencyWaitableObject());

            let rtv_heap: ID3D12DescriptorHeap = device.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                NumDescriptors: BACK_BUFFER_COUNT,
                Type: D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
                ..Default::default()
            })?;
            let rtv_descriptor_size = device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_RTV);

            let mut command_allocators = Vec::with_capacity(config.frames_in_flight as usize);
            for _ in 0..config.frames_in_flight {
                let allocator: ID3D12CommandAllocator =
                    device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)?;
                command_allocators.push(allocator);
            }
            let command_list: ID3D12GraphicsCommandList = device.CreateCommandList(
                0,
                D3D12_COMMAND_LIST_TYPE_DIRECT,
                &command_allocators[0],
                None,
            )?;
            command_list.Close()?;
            let sync = FrameSync::new(timeline, command_allocators)?;

            let srv_heap: ID3D12DescriptorHeap = device.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                NumDescriptors: config.srv_heap_size,
                Type: D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
                Flags: D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE,
                ..Default::default()
            })?;
            let descriptors = SharedDescriptorHeap::new(DescriptorHeapInfo {
                cpu_start: CpuDescriptorHandle(srv_heap.GetCPUDescriptorHandleForHeapStart().ptr),
                gpu_start: GpuDescriptorHandle(srv_heap.GetGPUDescriptorHandleForHeapStart().ptr),
                increment: device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV),
                capacity: config.srv_heap_size,
            });

            let upload = Mutex::new(Dx12UploadQueue::new(&device, &command_queue)?);
            let root_signature = create_root_signature(&device)?;
            let ui_pipeline = UiPipelineDx12::new(&device, &root_signature, config.frames_in_flight as usize)?;
            let glow = GlowPipelineDx12::new(&root_signature);

            let mut renderer = Self {
                device,
                command_queue,
                swapchain,
                swapchain_flags,
                rtv_heap,
                rtv_descriptor_size,
                render_targets: Vec::new(),
                command_list,
                sync,
                srv_heap,
                descriptors,
                upload,
                root_signature,
                ui_pipeline,
                glow,
                font: FontTexture::new(),
                background: BackgroundReload::new(config.reload_config()),
                loading: LoadingAnimation::new(),
                width,
                height,
                pending_resize: PendingResize::default(),
                tearing_supported,
                occluded: false,
            };
            renderer.create_render_targets()?;
            renderer.glow.resize(&renderer.device, &renderer.descriptors, width, height)?;

            log::info!(
                "D3D12 renderer ready: {}x{}, {} frames in flight, {} SRV slots, tearing {}",
                width,
                height,
                config.frames_in_flight,
                config.srv_heap_size,
                if tearing_supported { "on" } else { "off" }
            );
            Ok(renderer)
        }
    }

    fn create_render_targets(&mut self) -> Result<()> {
        unsafe {
            for i in 0..BACK_BUFFER_COUNT {
                let resource: ID3D12Resource = self.swapchain.GetBuffer(i)?;
                self.device.CreateRenderTargetView(&resource, None, self.rtv_handle(i as usize));
                self.render_targets.push(resource);
            }
        }
        Ok(())
    }

    fn rtv_handle(&self, index: usize) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        unsafe {
            D3D12_CPU_DESCRIPTOR_HANDLE {
                ptr: self.rtv_heap.GetCPUDescriptorHandleForHeapStart().ptr
                    + index * self.rtv_descriptor_size as usize,
            }
        }
    }

    fn apply_pending_resize(&mut self) -> Result<()> {
        let Some((width, height)) = self.pending_resize.take_change((self.width, self.height)) else {
            return Ok(());
        };

        // Everything sized to the window is rebuilt, so the GPU must be idle.
        self.sync.signal_and_wait()?;
        self.render_targets.clear();
        self.glow.resize(&self.device, &self.descriptors, 0, 0)?;

        if width > 0 && height > 0 {
            unsafe {
                self.swapchain.ResizeBuffers(
                    0,
                    width,
                    height,
                    DXGI_FORMAT_UNKNOWN,
                    self.swapchain_flags,
                )?;
            }
            self.create_render_targets()?;
            self.glow.resize(&self.device, &self.descriptors, width, height)?;
        }

        self.width = width;
        self.height = height;
        log::debug!("Resized to {}x{}", width, height);
        Ok(())
    }

    fn resolve_texture(&self, texture: UiTexture) -> Option<D3D12_GPU_DESCRIPTOR_HANDLE> {
        let handle = match texture {
            UiTexture::Font => self.font.active()?.gpu_handle(),
            UiTexture::User(BACKGROUND_TEXTURE_ID) => self.background.active()?.gpu_handle(),
            UiTexture::User(SPINNER_TEXTURE_ID) => self.loading.current()?.gpu_handle(),
            UiTexture::User(_) => return None,
        };
        Some(D3D12_GPU_DESCRIPTOR_HANDLE { ptr: handle.0 })
    }

    fn record_frame(&mut self, output: &UiOutput, glow: Option<GlowSettings>) -> Result<()> {
        let back_buffer = unsafe { self.swapchain.GetCurrentBackBufferIndex() } as usize;
        let rtv = self.rtv_handle(back_buffer);
        let frame_index = self.sync.frame_index();
        let frame = self.sync.wait_for_next_frame()?;
        let allocator = frame.command_allocator.clone();

        let Some(extent) = TargetExtent::new(self.width, self.height) else {
            return Ok(());
        };

        unsafe {
            allocator.Reset()?;
            self.command_list.Reset(&allocator, None)?;

            let list = &self.command_list;
            resource_barrier(
                list,
                &self.render_targets[back_buffer],
                D3D12_RESOURCE_STATE_PRESENT,
                D3D12_RESOURCE_STATE_RENDER_TARGET,
            );
            list.OMSetRenderTargets(1, Some(&rtv), false, None);
            list.ClearRenderTargetView(rtv, &premultiplied(CLEAR_COLOR), None);
            list.SetDescriptorHeaps(&[Some(self.srv_heap.clone())]);
            list.SetGraphicsRootSignature(&self.root_signature);

            let resolve = |texture: UiTexture| self.resolve_texture(texture);
            if let Some(vertices) = self.ui_pipeline.upload(frame_index, &output.draw_list) {
                match glow {
                    Some(settings) if self.glow.is_ready() => self.glow.render(
                        list,
                        &self.ui_pipeline,
                        &vertices,
                        &output.draw_list,
                        rtv,
                        extent,
                        &settings,
                        &resolve,
                    ),
                    _ => self.ui_pipeline.draw(
                        list,
                        UiTarget::Backbuffer,
                        &vertices,
                        &output.draw_list,
                        extent,
                        &resolve,
                    ),
                }
            }

            resource_barrier(
                list,
                &self.render_targets[back_buffer],
                D3D12_RESOURCE_STATE_RENDER_TARGET,
                D3D12_RESOURCE_STATE_PRESENT,
            );
            list.Close()?;
            let command_lists = [Some(list.cast::<ID3D12CommandList>()?)];
            self.command_queue.ExecuteCommandLists(&command_lists);
        }
        Ok(())
    }

    fn present(&mut self, vsync: bool) -> Result<()> {
        let (interval, flags) = if vsync {
            (1, DXGI_PRESENT(0))
        } else if self.tearing_supported {
            (0, DXGI_PRESENT_ALLOW_TEARING)
        } else {
            (0, DXGI_PRESENT(0))
        };
        let hr = unsafe { self.swapchain.Present(interval, flags) };
        self.occluded = hr == DXGI_STATUS_OCCLUDED;
        hr.ok()?;
        Ok(())
    }
}

impl Renderer for Dx12Renderer {
    fn backend_name(&self) -> &'static str {
        "Direct3D 12"
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.pending_resize.record(width, height);
    }

    fn request_background(&mut self, path: PathBuf, ui: &mut FrontendSettings) {
        self.background.request(path, ui);
    }

    fn restart_loading(&mut self, dir: PathBuf, frame_count: usize) {
        self.loading.restart(dir, frame_count, self.sync.last_signaled());
    }

    fn prepare(&mut self, ui: &mut FrontendSettings) -> Result<UiTextures> {
        self.background
            .poll_gpu(&self.descriptors, &self.upload, &mut self.sync, ui)?;
        self.loading
            .pump_to_gpu(&self.descriptors, &self.upload, &mut self.sync)?;

        let completed = self.sync.completed_value();
        self.loading.release_retired(completed);
        self.font.release_retired(completed);

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
            self.font
                .replace_gpu(&self.descriptors, &self.upload, &mut self.sync, image)?;
        }

        self.record_frame(output, glow)?;
        self.present(vsync)?;
        self.sync.finish_frame()?;
        Ok(())
    }
}

impl Drop for Dx12Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.sync.signal_and_wait() {
            log::error!("Failed to drain the GPU on shutdown: {}", e);
        }
        let released = self.font.drain_retired();
        log::debug!("D3D12 renderer shut down ({} retired font textures)", released);
    }
}

fn premultiplied(color: [f32; 4]) -> [f32; 4] {
    [color[0] * color[3], color[1] * color[3], color[2] * color[3], color[3]]
}

fn tearing_supported(factory: &IDXGIFactory4) -> bool {
    let Ok(factory5) = factory.cast::<IDXGIFactory5>() else {
        return false;
    };
    let mut allow: i32 = 0;
    unsafe {
        factory5
            .CheckFeatureSupport(
                DXGI_FEATURE_PRESENT_ALLOW_TEARING,
                &mut allow as *mut i32 as *mut std::ffi::c_void,
                std::mem::size_of::<i32>() as u32,
            )
            .is_ok()
            && allow != 0
    }
}

unsafe fn get_hardware_adapter(factory: &IDXGIFactory4) -> Result<IDXGIAdapter1> {
    unsafe {
        for i in 0.. {
            let adapter = match factory.EnumAdapters1(i) {
                Ok(a) => a,
                Err(_) => break,
            };

            let desc = adapter.GetDesc1()?;

            if (desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32) != 0 {
                continue;
            }

            if D3D12CreateDevice(
                &adapter,
                D3D_FEATURE_LEVEL_11_0,
                std::ptr::null_mut::<Option<ID3D12Device>>(),
            )
            .is_ok()
            {
                return Ok(adapter);
            }
        }
        Err(anyhow!("No suitable GPU adapter found"))
    }
}

/// A non-owning COM pointer for descriptor structs. Must not outlive
/// `resource`, and must never be dropped.
pub(crate) unsafe fn borrowed(resource: &ID3D12Resource) -> ManuallyDrop<Option<ID3D12Resource>> {
    unsafe { std::mem::transmute_copy(resource) }
}

/// Transition barrier that does not touch the resource's refcount.
pub(crate) unsafe fn resource_barrier(
    command_list: &ID3D12GraphicsCommandList,
    resource: &ID3D12Resource,
    before: D3D12_RESOURCE_STATES,
    after: D3D12_RESOURCE_STATES,
) {
    unsafe {
        let barriers = [D3D12_RESOURCE_BARRIER {
            Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
            Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
            Anonymous: D3D12_RESOURCE_BARRIER_0 {
                Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                    pResource: borrowed(resource),
                    StateBefore: before,
                    StateAfter: after,
                    Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                }),
            },
        }];

        command_list.ResourceBarrier(&barriers);
    }
}

/// Shared by the UI and glow passes:
/// 0: SRV table (t0), 1: four 32-bit constants (b0), static linear clamp sampler (s0).
fn create_root_signature(device: &ID3D12Device) -> Result<ID3D12RootSignature> {
    unsafe {
        let range = D3D12_DESCRIPTOR_RANGE {
            RangeType: D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
            NumDescriptors: 1,
            BaseShaderRegister: 0,
            RegisterSpace: 0,
            OffsetInDescriptorsFromTableStart: 0,
        };
        let parameters = [
            D3D12_ROOT_PARAMETER {
                ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
                Anonymous: D3D12_ROOT_PARAMETER_0 {
                    DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                        NumDescriptorRanges: 1,
                        pDescriptorRanges: &range,
                    },
                },
                ShaderVisibility: D3D12_SHADER_VISIBILITY_PIXEL,
            },
            D3D12_ROOT_PARAMETER {
                ParameterType: D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS,
                Anonymous: D3D12_ROOT_PARAMETER_0 {
                    Constants: D3D12_ROOT_CONSTANTS {
                        ShaderRegister: 0,
                        RegisterSpace: 0,
                        Num32BitValues: crate::glow::GlowConstants::NUM_VALUES,
                    },
                },
                ShaderVisibility: D3D12_SHADER_VISIBILITY_PIXEL,
            },
        ];

        let sampler = D3D12_STATIC_SAMPLER_DESC {
            Filter: D3D12_FILTER_MIN_MAG_MIP_LINEAR,
            AddressU: D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
            AddressV: D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
            AddressW: D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
            ShaderRegister: 0,
            RegisterSpace: 0,
            ShaderVisibility: D3D12_SHADER_VISIBILITY_PIXEL,
            ..Default::default()
        };

        let desc = D3D12_ROOT_SIGNATURE_DESC {
            NumParameters: parameters.len() as u32,
            pParameters: parameters.as_ptr(),
            NumStaticSamplers: 1,
            pStaticSamplers: &sampler,
            Flags: D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
        };

        let mut signature = None;
        let mut error = None;
        let result = D3D12SerializeRootSignature(
            &desc,
            D3D_ROOT_SIGNATURE_VERSION_1,
            &mut signature,
            Some(&mut error),
        );
        if let Some(error) = error {
            log::error!("Root signature error: {}", String::from_utf8_lossy(blob_bytes(&error)));
        }
        result?;

        let signature = signature.ok_or_else(|| anyhow!("Failed to serialize root signature"))?;
        let root_signature = device.CreateRootSignature(0, blob_bytes(&signature))?;
        Ok(root_signature)
    }
}
