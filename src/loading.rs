//! Frame-by-frame loading spinner streamed from disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, TryRecvError};
use parking_lot::Mutex;

use crate::gpu::upload::upload_from_bytes;
use crate::gpu::{
    DeferredReleaseQueue, FenceValue, FrameSync, GpuError, GpuTexture, GpuTimeline,
    ImmediateTextureLoader, SharedDescriptorHeap, TextureUploadDevice, UploadQueue,
};

struct FrameBytes {
    index: usize,
    bytes: Vec<u8>,
}

/// Candidate file names for 1-based frame `number`: zero-padded first.
pub fn frame_file_names(number: usize) -> [String; 2] {
    [format!("{:04}.png", number), format!("{}.png", number)]
}

fn read_frame(dir: &Path, number: usize) -> Option<Vec<u8>> {
    frame_file_names(number)
        .iter()
        .find_map(|name| fs::read(dir.join(name)).ok())
}

pub struct LoadingAnimation<T> {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    inbox: Option<Receiver<FrameBytes>>,
    received: Vec<FrameBytes>,
    frames: Vec<T>,
    retired: DeferredReleaseQueue<T>,
    current: Option<usize>,
}

impl<T> Default for LoadingAnimation<T> {
    fn default() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
            inbox: None,
            received: Vec::new(),
            frames: Vec::new(),
            retired: DeferredReleaseQueue::new(),
            current: None,
        }
    }
}

impl<T> LoadingAnimation<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames are uploaded and the spinner can be drawn.
    pub fn textures_ready(&self) -> bool {
        self.inbox.is_none() && !self.frames.is_empty()
    }

    pub fn is_streaming(&self) -> bool {
        self.inbox.is_some()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Stop any running loader, retire the current frames at `retire_at`
    /// and start streaming `frame_count` frames from `dir`.
    pub fn restart(&mut self, dir: impl Into<PathBuf>, frame_count: usize, retire_at: FenceValue) {
        self.stop_worker();
        for frame in self.frames.drain(..) {
            self.retired.push(retire_at, frame);
        }
        self.received.clear();
        self.current = None;

        let dir = dir.into();
        if !dir.is_dir() {
            log::warn!("Loading icon directory {} does not exist", dir.display());
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        let stop = self.stop.clone();
        let spawned = thread::Builder::new()
            .name("loading-frames".to_string())
            .spawn(move || {
                for number in 1..=frame_count {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    match read_frame(&dir, number) {
                        Some(bytes) => {
                            if tx.send(FrameBytes { index: number - 1, bytes }).is_err() {
                                break;
                            }
                        }
                        None => log::debug!("Loading frame {} missing in {}", number, dir.display()),
                    }
                }
            });
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                self.inbox = Some(rx);
            }
            Err(e) => log::error!("Failed to spawn loading frame reader: {}", e),
        }
    }

    /// Drain the worker. Returns true once it has finished and every frame
    /// it produced is waiting in `received`.
    fn collect(&mut self) -> bool {
        let Some(inbox) = &self.inbox else {
            return false;
        };
        loop {
            match inbox.try_recv() {
                Ok(frame) => self.received.push(frame),
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => break,
            }
        }
        self.inbox = None;
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            log::error!("Loading frame reader panicked");
        }
        self.received.sort_by_key(|frame| frame.index);
        true
    }

    /// Build every received frame synchronously.
    pub fn pump_immediate<L>(&mut self, loader: &mut L) -> Result<bool, GpuError>
    where
        L: ImmediateTextureLoader<Texture = T>,
    {
        if !self.collect() {
            return Ok(false);
        }
        for frame in std::mem::take(&mut self.received) {
            match loader.load_texture(&frame.bytes) {
                Ok(texture) => self.frames.push(texture),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => log::warn!("Skipping loading frame {}: {}", frame.index + 1, e),
            }
        }
        log::info!("Loading animation ready ({} frames)", self.frames.len());
        Ok(true)
    }

    /// Advance the spinner and return the frame to draw.
    pub fn advance(&mut self) -> Option<&T> {
        if !self.textures_ready() {
            return None;
        }
        let next = match self.current {
            Some(i) if i + 1 < self.frames.len() => i + 1,
            _ => 0,
        };
        self.current = Some(next);
        self.frames.get(next)
    }

    pub fn current(&self) -> Option<&T> {
        self.current.and_then(|i| self.frames.get(i))
    }

    pub fn release_retired(&mut self, completed: FenceValue) -> usize {
        self.retired.release_reached(completed)
    }

    fn stop_worker(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.inbox = None;
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            log::error!("Loading frame reader panicked");
        }
        self.stop.store(false, Ordering::Relaxed);
    }
}

impl<R> LoadingAnimation<GpuTexture<R>> {
    /// Upload every received frame in one submission on the upload list,
    /// then stall until the copies are done. Frames that cannot be uploaded
    /// are skipped; only fatal errors are returned.
    pub fn pump_to_gpu<Q, TL, A>(
        &mut self,
        heap: &SharedDescriptorHeap,
        upload: &Mutex<Q>,
        sync: &mut FrameSync<TL, A>,
    ) -> Result<bool, GpuError>
    where
        Q: UploadQueue,
        Q::Device: TextureUploadDevice<Texture = R>,
        TL: GpuTimeline,
    {
        if !self.collect() {
            return Ok(false);
        }
        let received = std::mem::take(&mut self.received);
        if received.is_empty() {
            log::warn!("No loading frames found");
            return Ok(true);
        }

        let mut staged = Vec::with_capacity(received.len());
        {
            let mut queue = upload.lock();
            if let Err(e) = queue.begin() {
                if e.is_fatal() {
                    return Err(e);
                }
                log::warn!("Loading frames not uploaded: {}", e);
                return Ok(true);
            }
            for frame in &received {
                let slot = match heap.alloc_slot() {
                    Ok(slot) => slot,
                    Err(e) => {
                        log::warn!("Skipping loading frame {}: {}", frame.index + 1, e);
                        continue;
                    }
                };
                match upload_from_bytes(queue.device(), queue.command_list(), &frame.bytes, slot.cpu()) {
                    Ok(uploaded) => staged.push((uploaded, slot)),
                    Err(e) if e.is_fatal() => {
                        queue.abandon();
                        return Err(e);
                    }
                    Err(e) => log::warn!("Skipping loading frame {}: {}", frame.index + 1, e),
                }
            }
            if staged.is_empty() {
                queue.abandon();
                log::warn!("No loading frame could be uploaded");
                return Ok(true);
            }
            match queue.submit() {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    // The copies may still be running; never free their memory.
                    std::mem::forget(staged);
                    return Err(e);
                }
                Err(e) => {
                    log::warn!("Loading frames not uploaded: {}", e);
                    return Ok(true);
                }
            }
        }
        sync.signal_and_wait()?;

        for (uploaded, slot) in staged {
            let footprint = uploaded.footprint;
            self.frames.push(GpuTexture::new(
                uploaded.texture,
                slot,
                footprint.width,
                footprint.height,
            ));
        }
        log::info!("Loading animation ready ({} frames)", self.frames.len());
        Ok(true)
    }
}

impl<T> Drop for LoadingAnimation<T> {
    fn drop(&mut self) {
        self.stop_worker();
    }
}
