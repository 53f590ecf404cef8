//! Backend-neutral GPU resource bookkeeping: descriptor slots, fence
//! tracking, deferred release and the texture upload path.

mod deferred;
mod descriptor;
mod error;
mod fence;
mod texture;
pub mod upload;

pub use deferred::DeferredReleaseQueue;
pub use descriptor::{
    CpuDescriptorHandle, DescriptorHeapAllocator, DescriptorHeapInfo, DescriptorSlot,
    GpuDescriptorHandle, SharedDescriptorHeap,
};
pub use error::GpuError;
pub use fence::{FenceValue, FrameContext, FrameSync, GpuTimeline};
pub use texture::GpuTexture;
pub use upload::{RgbaImage, TextureUploadDevice, UploadQueue, UploadedTexture};

/// Builds textures synchronously on the render thread. Used by backends
/// without an explicit upload queue.
pub trait ImmediateTextureLoader {
    type Texture;

    fn create_from_rgba(&mut self, image: &RgbaImage) -> Result<Self::Texture, GpuError>;

    fn load_texture(&mut self, bytes: &[u8]) -> Result<Self::Texture, GpuError> {
        let image = upload::decode_rgba8(bytes)?;
        self.create_from_rgba(&image)
    }
}
