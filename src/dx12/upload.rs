use anyhow::Result;
use windows::core::Interface;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject};

use super::{borrowed, resource_barrier};
use crate::d3d::device_error;
use crate::gpu::upload::TextureFootprint;
use crate::gpu::{CpuDescriptorHandle, GpuError, TextureUploadDevice, UploadQueue};

const UPLOAD_WAIT_MS: u32 = 10_000;

pub struct Dx12UploadDevice {
    device: ID3D12Device,
}

impl Dx12UploadDevice {
    pub fn new(device: &ID3D12Device) -> Self {
        Self {
            device: device.clone(),
        }
    }
}

impl TextureUploadDevice for Dx12UploadDevice {
    type Texture = ID3D12Resource;
    type Staging = ID3D12Resource;
    type CommandList = ID3D12GraphicsCommandList;

    fn create_texture(&self, footprint: &TextureFootprint) -> Result<ID3D12Resource, GpuError> {
        unsafe {
            let mut texture: Option<ID3D12Resource> = None;
            self.device
                .CreateCommittedResource(
                    &D3D12_HEAP_PROPERTIES {
                        Type: D3D12_HEAP_TYPE_DEFAULT,
                        ..Default::default()
                    },
                    D3D12_HEAP_FLAG_NONE,
                    &D3D12_RESOURCE_DESC {
                        Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
                        Width: footprint.width as u64,
                        Height: footprint.height,
                        DepthOrArraySize: 1,
                        MipLevels: 1,
                        Format: DXGI_FORMAT_R8G8B8A8_UNORM,
                        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
                        Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
                        Flags: D3D12_RESOURCE_FLAG_NONE,
                        ..Default::default()
                    },
                    D3D12_RESOURCE_STATE_COPY_DEST,
                    None,
                    &mut texture,
                )
                .map_err(|e| device_error("texture", e))?;
            texture.ok_or_else(|| GpuError::resource("texture", "no resource returned"))
        }
    }

    fn create_staging(&self, size: u64) -> Result<ID3D12Resource, GpuError> {
        unsafe {
            let mut buffer: Option<ID3D12Resource> = None;
            self.device
                .CreateCommittedResource(
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
                        Format: DXGI_FORMAT_UNKNOWN,
                        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
                        Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
                        Flags: D3D12_RESOURCE_FLAG_NONE,
                        ..Default::default()
                    },
                    D3D12_RESOURCE_STATE_GENERIC_READ,
                    None,
                    &mut buffer,
                )
                .map_err(|e| device_error("staging buffer", e))?;
            buffer.ok_or_else(|| GpuError::resource("staging buffer", "no resource returned"))
        }
    }

    fn write_staging(
        &self,
        staging: &ID3D12Resource,
        write: &mut dyn FnMut(&mut [u8]) -> Result<(), GpuError>,
    ) -> Result<(), GpuError> {
        unsafe {
            let size = staging.GetDesc().Width as usize;
            // Empty read range: the CPU never reads back.
            let read_range = D3D12_RANGE { Begin: 0, End: 0 };
            let mut mapped: *mut std::ffi::c_void = std::ptr::null_mut();
            staging
                .Map(0, Some(&read_range), Some(&mut mapped))
                .map_err(|e| device_error("staging map", e))?;
            if mapped.is_null() {
                return Err(GpuError::resource("staging map", "null mapping"));
            }
            let dst = std::slice::from_raw_parts_mut(mapped as *mut u8, size);
            let result = write(dst);
            staging.Unmap(0, None);
            result
        }
    }

    fn record_copy(
        &self,
        list: &ID3D12GraphicsCommandList,
        staging: &ID3D12Resource,
        texture: &ID3D12Resource,
        footprint: &TextureFootprint,
    ) {
        unsafe {
            let dst = D3D12_TEXTURE_COPY_LOCATION {
                pResource: borrowed(texture),
                Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
                Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                    SubresourceIndex: 0,
                },
            };
            let src = D3D12_TEXTURE_COPY_LOCATION {
                pResource: borrowed(staging),
                Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
                Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                    PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                        Offset: 0,
                        Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                            Format: DXGI_FORMAT_R8G8B8A8_UNORM,
                            Width: footprint.width,
                            Height: footprint.height,
                            Depth: 1,
                            RowPitch: footprint.row_pitch,
                        },
                    },
                },
            };
            list.CopyTextureRegion(&dst, 0, 0, 0, &src, None);
        }
    }

    fn record_shader_read_transition(&self, list: &ID3D12GraphicsCommandList, texture: &ID3D12Resource) {
        unsafe {
            resource_barrier(
                list,
                texture,
                D3D12_RESOURCE_STATE_COPY_DEST,
                D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE,
            );
        }
    }

    fn create_shader_view(&self, texture: &ID3D12Resource, slot: CpuDescriptorHandle) {
        unsafe {
            self.device.CreateShaderResourceView(
                texture,
                Some(&D3D12_SHADER_RESOURCE_VIEW_DESC {
                    Format: DXGI_FORMAT_R8G8B8A8_UNORM,
                    ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
                    Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                    Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                        Texture2D: D3D12_TEX2D_SRV {
                            MipLevels: 1,
                            ..Default::default()
                        },
                    },
                }),
                D3D12_CPU_DESCRIPTOR_HANDLE { ptr: slot.0 },
            );
        }
    }
}

/// Dedicated allocator and command list for uploads, executed on the
/// direct queue. A private fence keeps `begin` from resetting the
/// allocator while a previous upload is still executing.
pub struct Dx12UploadQueue {
    device: Dx12UploadDevice,
    queue: ID3D12CommandQueue,
    allocator: ID3D12CommandAllocator,
    list: ID3D12GraphicsCommandList,
    fence: ID3D12Fence,
    fence_event: HANDLE,
    submitted: u64,
}

impl Dx12UploadQueue {
    pub fn new(device: &ID3D12Device, queue: &ID3D12CommandQueue) -> Result<Self> {
        unsafe {
            let allocator: ID3D12CommandAllocator =
                device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)?;
            let list: ID3D12GraphicsCommandList =
                device.CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator, None)?;
            list.Close()?;
            let fence: ID3D12Fence = device.CreateFence(0, D3D12_FENCE_FLAG_NONE)?;
            let fence_event = CreateEventA(None, false, false, None)?;

            Ok(Self {
                device: Dx12UploadDevice::new(device),
                queue: queue.clone(),
                allocator,
                list,
                fence,
                fence_event,
                submitted: 0,
            })
        }
    }

    fn wait_idle(&self) -> Result<(), GpuError> {
        unsafe {
            if self.fence.GetCompletedValue() >= self.submitted {
                return Ok(());
            }
            self.fence
                .SetEventOnCompletion(self.submitted, self.fence_event)
                .map_err(|e| device_error("upload fence", e))?;
            if WaitForSingleObject(self.fence_event, UPLOAD_WAIT_MS) != WAIT_OBJECT_0 {
                return Err(GpuError::WaitTimeout(self.submitted));
            }
        }
        Ok(())
    }
}

impl UploadQueue for Dx12UploadQueue {
    type Device = Dx12UploadDevice;

    fn device(&self) -> &Dx12UploadDevice {
        &self.device
    }

    fn command_list(&self) -> &ID3D12GraphicsCommandList {
        &self.list
    }

    fn begin(&mut self) -> Result<(), GpuError> {
        self.wait_idle()?;
        unsafe {
            self.allocator
                .Reset()
                .map_err(|e| device_error("upload allocator", e))?;
            self.list
                .Reset(&self.allocator, None)
                .map_err(|e| device_error("upload command list", e))
        }
    }

    fn submit(&mut self) -> Result<(), GpuError> {
        unsafe {
            self.list
                .Close()
                .map_err(|e| device_error("upload command list", e))?;
            let list = self
                .list
                .cast::<ID3D12CommandList>()
                .map_err(|e| device_error("upload command list", e))?;
            self.queue.ExecuteCommandLists(&[Some(list)]);
            let next = self.submitted + 1;
            self.queue
                .Signal(&self.fence, next)
                .map_err(|e| GpuError::SubmitFailed(format!("upload fence signal: {}", e)))?;
            self.submitted = next;
        }
        Ok(())
    }

    fn abandon(&mut self) {
        unsafe {
            if let Err(e) = self.list.Close() {
                log::warn!("Closing abandoned upload list failed: {}", e);
            }
        }
    }
}

impl Drop for Dx12UploadQueue {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            log::error!("Upload queue dropped with work in flight: {}", e);
        }
        unsafe {
            if !self.fence_event.is_invalid() {
                let _ = CloseHandle(self.fence_event);
            }
        }
    }
}
