//! The UI font atlas texture.
//!
//! Atlas updates are rare, so both replacement paths stall until the new
//! texture is usable. A failed update keeps the atlas already on screen.

use parking_lot::Mutex;

use crate::gpu::upload::upload_rgba;
use crate::gpu::{
    DeferredReleaseQueue, FenceValue, FrameSync, GpuError, GpuTexture, GpuTimeline,
    ImmediateTextureLoader, RgbaImage, SharedDescriptorHeap, TextureUploadDevice, UploadQueue,
};

pub struct FontTexture<T> {
    active: Option<T>,
    retired: DeferredReleaseQueue<T>,
}

impl<T> Default for FontTexture<T> {
    fn default() -> Self {
        Self {
            active: None,
            retired: DeferredReleaseQueue::new(),
        }
    }
}

impl<T> FontTexture<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&T> {
        self.active.as_ref()
    }

    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }

    pub fn release_retired(&mut self, completed: FenceValue) -> usize {
        self.retired.release_reached(completed)
    }

    pub fn drain_retired(&mut self) -> usize {
        self.retired.drain_all()
    }

    fn swap_in(&mut self, texture: T, retire_at: FenceValue) {
        if let Some(old) = self.active.replace(texture) {
            self.retired.push(retire_at, old);
        }
    }

    /// Build the atlas on the calling thread.
    pub fn replace_immediate<L>(&mut self, loader: &mut L, image: &RgbaImage) -> Result<bool, GpuError>
    where
        L: ImmediateTextureLoader<Texture = T>,
    {
        match loader.create_from_rgba(image) {
            Ok(texture) => {
                self.active = Some(texture);
                log::debug!("Font atlas created ({}x{})", image.width(), image.height());
                Ok(true)
            }
            Err(e) => keep_current(e),
        }
    }
}

impl<R> FontTexture<GpuTexture<R>> {
    /// Upload the atlas on the upload list and wait for the copy. The old
    /// texture is retired at the wait's fence.
    pub fn replace_gpu<Q, TL, A>(
        &mut self,
        heap: &SharedDescriptorHeap,
        upload: &Mutex<Q>,
        sync: &mut FrameSync<TL, A>,
        image: &RgbaImage,
    ) -> Result<bool, GpuError>
    where
        Q: UploadQueue,
        Q::Device: TextureUploadDevice<Texture = R>,
        TL: GpuTimeline,
    {
        let slot = match heap.alloc_slot() {
            Ok(slot) => slot,
            Err(e) => return keep_current(e),
        };
        let uploaded = {
            let mut queue = upload.lock();
            if let Err(e) = queue.begin() {
                return keep_current(e);
            }
            let uploaded = match upload_rgba(queue.device(), queue.command_list(), image, slot.cpu()) {
                Ok(uploaded) => uploaded,
                Err(e) => {
                    queue.abandon();
                    return keep_current(e);
                }
            };
            if let Err(e) = queue.submit() {
                if e.is_fatal() {
                    // The copy may still be running; never free its memory.
                    std::mem::forget((uploaded, slot));
                    return Err(e);
                }
                return keep_current(e);
            }
            uploaded
        };
        sync.signal_and_wait()?;

        let texture = GpuTexture::new(uploaded.texture, slot, image.width(), image.height());
        self.swap_in(texture, sync.last_signaled());
        log::debug!("Font atlas uploaded ({}x{})", image.width(), image.height());
        Ok(true)
    }
}

fn keep_current(err: GpuError) -> Result<bool, GpuError> {
    if err.is_fatal() {
        return Err(err);
    }
    log::warn!("Font atlas update failed, keeping the current one: {}", err);
    Ok(false)
}
