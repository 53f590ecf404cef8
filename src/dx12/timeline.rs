use anyhow::Result;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::System::Threading::{CreateEventA, WaitForMultipleObjects, WaitForSingleObject};

use crate::d3d::device_error;
use crate::gpu::{FenceValue, GpuError, GpuTimeline};

const WAIT_TIMEOUT_MS: u32 = 10_000;

/// The direct queue's fence plus the swap chain's frame latency object.
pub struct Dx12Timeline {
    queue: ID3D12CommandQueue,
    fence: ID3D12Fence,
    fence_event: HANDLE,
    swap_chain_waitable: Option<HANDLE>,
}

impl Dx12Timeline {
    pub fn new(device: &ID3D12Device, queue: &ID3D12CommandQueue) -> Result<Self> {
        unsafe {
            let fence: ID3D12Fence = device.CreateFence(0, D3D12_FENCE_FLAG_NONE)?;
            let fence_event = CreateEventA(None, false, false, None)?;
            Ok(Self {
                queue: queue.clone(),
                fence,
                fence_event,
                swap_chain_waitable: None,
            })
        }
    }

    /// Takes ownership of the handle.
    pub fn set_swap_chain_waitable(&mut self, waitable: HANDLE) {
        self.swap_chain_waitable = Some(waitable);
    }

    fn check_device(&self, value: FenceValue) -> Result<(), GpuError> {
        // A removed device reports every bit set.
        if unsafe { self.fence.GetCompletedValue() } == u64::MAX {
            return Err(GpuError::DeviceRemoved(format!("fence lost while waiting for {}", value)));
        }
        Ok(())
    }

    fn arm(&self, value: FenceValue) -> Result<(), GpuError> {
        unsafe {
            self.fence
                .SetEventOnCompletion(value.get(), self.fence_event)
                .map_err(|e| device_error("fence event", e))
        }
    }
}

impl GpuTimeline for Dx12Timeline {
    fn signal(&self, value: FenceValue) -> Result<(), GpuError> {
        unsafe {
            self.queue
                .Signal(&self.fence, value.get())
                .map_err(|e| device_error("fence signal", e))
        }
    }

    fn completed_value(&self) -> FenceValue {
        FenceValue(unsafe { self.fence.GetCompletedValue() })
    }

    fn wait_for(&self, value: FenceValue) -> Result<(), GpuError> {
        if self.completed_value() >= value {
            return self.check_device(value);
        }
        self.arm(value)?;
        if unsafe { WaitForSingleObject(self.fence_event, WAIT_TIMEOUT_MS) } != WAIT_OBJECT_0 {
            self.check_device(value)?;
            return Err(GpuError::WaitTimeout(value.get()));
        }
        Ok(())
    }

    fn wait_for_frame(&self, value: FenceValue) -> Result<(), GpuError> {
        let Some(waitable) = self.swap_chain_waitable else {
            return self.wait_for(value);
        };
        self.arm(value)?;
        let handles = [waitable, self.fence_event];
        let result = unsafe { WaitForMultipleObjects(&handles, true, WAIT_TIMEOUT_MS) };
        if result.0 >= WAIT_OBJECT_0.0 + handles.len() as u32 {
            self.check_device(value)?;
            return Err(GpuError::WaitTimeout(value.get()));
        }
        Ok(())
    }

    fn wait_for_present(&self) -> Result<(), GpuError> {
        if let Some(waitable) = self.swap_chain_waitable
            && unsafe { WaitForSingleObject(waitable, WAIT_TIMEOUT_MS) } != WAIT_OBJECT_0
        {
            log::warn!("Swap chain latency wait timed out");
        }
        Ok(())
    }
}

impl Drop for Dx12Timeline {
    fn drop(&mut self) {
        unsafe {
            if !self.fence_event.is_invalid() {
                let _ = CloseHandle(self.fence_event);
            }
            if let Some(waitable) = self.swap_chain_waitable.take() {
                let _ = CloseHandle(waitable);
            }
        }
    }
}
