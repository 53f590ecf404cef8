use super::{DescriptorSlot, GpuDescriptorHandle};

/// A shader-visible texture: the committed resource plus the heap slot its
/// view lives in. Dropping it releases both, so it must only be dropped once
/// the GPU is done with it.
pub struct GpuTexture<R> {
    resource: R,
    slot: DescriptorSlot,
    width: u32,
    height: u32,
}

impl<R> GpuTexture<R> {
    pub fn new(resource: R, slot: DescriptorSlot, width: u32, height: u32) -> Self {
        Self {
            resource,
            slot,
            width,
            height,
        }
    }

    pub fn resource(&self) -> &R {
        &self.resource
    }

    pub fn slot(&self) -> &DescriptorSlot {
        &self.slot
    }

    pub fn gpu_handle(&self) -> GpuDescriptorHandle {
        self.slot.gpu()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}
