//! Background image reloads: disk reads on a worker thread, GPU upload on
//! the render thread, promotion once the upload's fence is reached.

use std::fs;
use std::io;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, TryRecvError};
use parking_lot::Mutex;

use crate::gpu::upload::upload_from_bytes;
use crate::gpu::{
    DeferredReleaseQueue, FenceValue, FrameSync, GpuError, GpuTexture, GpuTimeline,
    ImmediateTextureLoader, SharedDescriptorHeap, TextureUploadDevice, UploadQueue,
    UploadedTexture,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReloadConfig {
    /// Delay before the worker touches the disk, so rapid theme switches
    /// collapse into one read.
    pub debounce: Duration,
    /// Frame rate forced while a reload is in progress.
    pub loading_target_fps: u32,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1300),
            loading_target_fps: 60,
        }
    }
}

/// The UI-facing values a reload overrides while it runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrontendSettings {
    pub vsync: bool,
    pub target_fps: u32,
    pub is_loading: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct CachedFrontend {
    vsync: bool,
    target_fps: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReloadPhase {
    Idle,
    Requested,
    BytesReady,
    Submitted,
}

enum ReloadState<T, S> {
    Idle,
    Requested {
        path: PathBuf,
        inbox: Receiver<io::Result<Vec<u8>>>,
        cancel: Arc<AtomicBool>,
    },
    BytesReady {
        path: PathBuf,
        bytes: Vec<u8>,
    },
    Submitted {
        path: PathBuf,
        fence: FenceValue,
        pending: T,
        staging: S,
    },
}

/// Owns the active background texture and drives at most one reload.
///
/// `T` is the backend texture type, `S` the staging buffer kept alive while
/// an upload is in flight (unit for backends that upload synchronously).
pub struct BackgroundReload<T, S> {
    config: ReloadConfig,
    state: ReloadState<T, S>,
    active: Option<T>,
    retired: DeferredReleaseQueue<T>,
    queued: Option<PathBuf>,
    cached: Option<CachedFrontend>,
}

impl<T, S> BackgroundReload<T, S> {
    pub fn new(config: ReloadConfig) -> Self {
        Self {
            config,
            state: ReloadState::Idle,
            active: None,
            retired: DeferredReleaseQueue::new(),
            queued: None,
            cached: None,
        }
    }

    pub fn phase(&self) -> ReloadPhase {
        match self.state {
            ReloadState::Idle => ReloadPhase::Idle,
            ReloadState::Requested { .. } => ReloadPhase::Requested,
            ReloadState::BytesReady { .. } => ReloadPhase::BytesReady,
            ReloadState::Submitted { .. } => ReloadPhase::Submitted,
        }
    }

    pub fn active(&self) -> Option<&T> {
        self.active.as_ref()
    }

    pub fn texture_ready(&self) -> bool {
        self.active.is_some()
    }

    pub fn queued(&self) -> Option<&Path> {
        self.queued.as_deref()
    }

    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }

    /// Replace the active texture outright. The previous one stays alive
    /// until `retire_at` is reached.
    pub fn set_active(&mut self, texture: T, retire_at: FenceValue) {
        if let Some(old) = self.active.replace(texture) {
            self.retired.push(retire_at, old);
        }
    }

    /// Start loading `path`.
    ///
    /// While an upload is on the GPU the request is parked and started once
    /// that upload is promoted; a later request overwrites a parked one.
    /// Earlier stages are cancelled and replaced.
    pub fn request(&mut self, path: impl Into<PathBuf>, ui: &mut FrontendSettings) {
        let path = path.into();
        if let ReloadState::Submitted { .. } = self.state {
            log::debug!("Upload in flight, queueing reload of {}", path.display());
            self.queued = Some(path);
            return;
        }
        if let ReloadState::Requested { cancel, .. } = &self.state {
            cancel.store(true, Ordering::Relaxed);
        }
        if !matches!(self.state, ReloadState::Idle) {
            log::debug!("Replacing pending reload with {}", path.display());
        }

        if self.cached.is_none() {
            self.cached = Some(CachedFrontend {
                vsync: ui.vsync,
                target_fps: ui.target_fps,
            });
        }
        ui.vsync = false;
        ui.target_fps = self.config.loading_target_fps;
        ui.is_loading = true;

        let cancel = Arc::new(AtomicBool::new(false));
        match spawn_reader(path.clone(), self.config.debounce, cancel.clone()) {
            Ok(inbox) => {
                log::info!("Reloading background from {}", path.display());
                self.state = ReloadState::Requested {
                    path,
                    inbox,
                    cancel,
                };
            }
            Err(e) => {
                log::error!("Failed to spawn background reader: {}", e);
                self.abort(ui);
            }
        }
    }

    /// Pick up the worker's result without blocking.
    pub fn poll_worker(&mut self, ui: &mut FrontendSettings) {
        let result = match &self.state {
            ReloadState::Requested { inbox, .. } => match inbox.try_recv() {
                Ok(result) => result,
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    Err(io::Error::other("reader exited without a result"))
                }
            },
            _ => return,
        };
        let ReloadState::Requested { path, .. } = mem::replace(&mut self.state, ReloadState::Idle)
        else {
            return;
        };
        match result {
            Ok(bytes) => {
                log::debug!("Read {} bytes from {}", bytes.len(), path.display());
                self.state = ReloadState::BytesReady { path, bytes };
            }
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                self.abort(ui);
            }
        }
    }

    /// Promote the uploaded texture once its fence is reached. The old
    /// texture is retired at the last signaled value, since frames still in
    /// flight may sample it.
    pub fn finalize_if_ready<TL: GpuTimeline, A>(
        &mut self,
        sync: &FrameSync<TL, A>,
        ui: &mut FrontendSettings,
    ) -> bool {
        let fence = match &self.state {
            ReloadState::Submitted { fence, .. } => *fence,
            _ => return false,
        };
        if !sync.is_reached(fence) {
            return false;
        }
        let ReloadState::Submitted {
            path,
            pending,
            staging,
            ..
        } = mem::replace(&mut self.state, ReloadState::Idle)
        else {
            return false;
        };

        drop(staging);
        self.set_active(pending, sync.last_signaled());
        log::info!("Background {} is live (fence {})", path.display(), fence);

        self.restore(ui);
        if let Some(next) = self.queued.take() {
            self.request(next, ui);
        }
        self.retired.release_reached(sync.completed_value());
        true
    }

    pub fn release_retired(&mut self, completed: FenceValue) -> usize {
        self.retired.release_reached(completed)
    }

    /// Build the texture on the calling thread once bytes are in.
    pub fn apply_immediate<L>(
        &mut self,
        loader: &mut L,
        ui: &mut FrontendSettings,
    ) -> Result<bool, GpuError>
    where
        L: ImmediateTextureLoader<Texture = T>,
    {
        if !matches!(self.state, ReloadState::BytesReady { .. }) {
            return Ok(false);
        }
        let ReloadState::BytesReady { path, bytes } = mem::replace(&mut self.state, ReloadState::Idle)
        else {
            return Ok(false);
        };

        let texture = match loader.load_texture(&bytes) {
            Ok(texture) => texture,
            Err(e) => return self.fail(e, ui),
        };
        self.active = Some(texture);
        log::info!("Background {} is live", path.display());

        self.restore(ui);
        if let Some(next) = self.queued.take() {
            self.request(next, ui);
        }
        Ok(true)
    }

    /// Per-frame step for synchronous backends.
    pub fn poll_immediate<L>(
        &mut self,
        loader: &mut L,
        ui: &mut FrontendSettings,
    ) -> Result<bool, GpuError>
    where
        L: ImmediateTextureLoader<Texture = T>,
    {
        self.poll_worker(ui);
        self.apply_immediate(loader, ui)
    }

    fn fail(&mut self, err: GpuError, ui: &mut FrontendSettings) -> Result<bool, GpuError> {
        if err.is_fatal() {
            return Err(err);
        }
        log::warn!("Background reload failed, keeping the current image: {}", err);
        self.abort(ui);
        Ok(false)
    }

    fn abort(&mut self, ui: &mut FrontendSettings) {
        self.state = ReloadState::Idle;
        self.restore(ui);
        if let Some(next) = self.queued.take() {
            self.request(next, ui);
        }
    }

    fn restore(&mut self, ui: &mut FrontendSettings) {
        if let Some(cached) = self.cached.take() {
            ui.vsync = cached.vsync;
            ui.target_fps = cached.target_fps;
        }
        ui.is_loading = false;
    }
}

impl<R, S> BackgroundReload<GpuTexture<R>, S> {
    /// Record and execute the upload on the dedicated upload list, then
    /// signal the fence that gates promotion.
    pub fn submit_pending<Q, TL, A>(
        &mut self,
        heap: &SharedDescriptorHeap,
        upload: &Mutex<Q>,
        sync: &mut FrameSync<TL, A>,
        ui: &mut FrontendSettings,
    ) -> Result<bool, GpuError>
    where
        Q: UploadQueue,
        Q::Device: TextureUploadDevice<Texture = R, Staging = S>,
        TL: GpuTimeline,
    {
        if !matches!(self.state, ReloadState::BytesReady { .. }) {
            return Ok(false);
        }
        let ReloadState::BytesReady { path, bytes } = mem::replace(&mut self.state, ReloadState::Idle)
        else {
            return Ok(false);
        };

        let slot = match heap.alloc_slot() {
            Ok(slot) => slot,
            Err(e) => return self.fail(e, ui),
        };

        let uploaded = {
            let mut queue = upload.lock();
            if let Err(e) = queue.begin() {
                return self.fail(e, ui);
            }
            let uploaded =
                match upload_from_bytes(queue.device(), queue.command_list(), &bytes, slot.cpu()) {
                    Ok(uploaded) => uploaded,
                    Err(e) => {
                        queue.abandon();
                        return self.fail(e, ui);
                    }
                };
            if let Err(e) = queue.submit() {
                if e.is_fatal() {
                    // The copy may still be running; never free its memory.
                    mem::forget((uploaded, slot));
                    return Err(e);
                }
                return self.fail(e, ui);
            }
            uploaded
        };

        let fence = sync.signal()?;
        let UploadedTexture {
            texture,
            staging,
            footprint,
        } = uploaded;
        log::debug!(
            "Submitted {}x{} upload of {} at fence {}",
            footprint.width,
            footprint.height,
            path.display(),
            fence
        );
        self.state = ReloadState::Submitted {
            path,
            fence,
            pending: GpuTexture::new(texture, slot, footprint.width, footprint.height),
            staging,
        };
        Ok(true)
    }

    /// Per-frame step for backends with an upload queue.
    pub fn poll_gpu<Q, TL, A>(
        &mut self,
        heap: &SharedDescriptorHeap,
        upload: &Mutex<Q>,
        sync: &mut FrameSync<TL, A>,
        ui: &mut FrontendSettings,
    ) -> Result<bool, GpuError>
    where
        Q: UploadQueue,
        Q::Device: TextureUploadDevice<Texture = R, Staging = S>,
        TL: GpuTimeline,
    {
        self.poll_worker(ui);
        self.submit_pending(heap, upload, sync, ui)?;
        let promoted = self.finalize_if_ready(sync, ui);
        self.release_retired(sync.completed_value());
        Ok(promoted)
    }
}

/// Read `path` on a worker after `debounce`. Setting `cancel` before the
/// debounce runs out skips the read; the receiver then disconnects empty.
fn spawn_reader(
    path: PathBuf,
    debounce: Duration,
    cancel: Arc<AtomicBool>,
) -> io::Result<Receiver<io::Result<Vec<u8>>>> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::Builder::new()
        .name("bg-reload".to_string())
        .spawn(move || {
            if !debounce.is_zero() {
                thread::sleep(debounce);
            }
            if cancel.load(Ordering::Relaxed) {
                log::debug!("Reload of {} cancelled before reading", path.display());
                return;
            }
            let result = fs::read(&path);
            if tx.send(result).is_err() {
                log::debug!("Reload of {} was superseded", path.display());
            }
        })?;
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::upload::TextureFootprint;
    use crate::gpu::RgbaImage;
    use crate::test_support::{
        encode_png, gradient_pixels, heap, FakeLoader, FakeStaging, FakeTexture, FakeTimeline,
        FakeUploadQueue,
    };
    use std::time::Instant;

    type Reload = BackgroundReload<GpuTexture<FakeTexture>, FakeStaging>;
    type Sync = FrameSync<FakeTimeline, u32>;

    const ORIGINAL_UI: FrontendSettings = FrontendSettings {
        vsync: true,
        target_fps: 144,
        is_loading: false,
    };

    fn config() -> ReloadConfig {
        ReloadConfig {
            debounce: Duration::ZERO,
            loading_target_fps: 60,
        }
    }

    struct Harness {
        dir: tempfile::TempDir,
        heap: SharedDescriptorHeap,
        queue: Mutex<FakeUploadQueue>,
        sync: Sync,
        reload: Reload,
        ui: FrontendSettings,
    }

    impl Harness {
        fn new(heap_size: u32) -> Self {
            let heap = heap(heap_size);
            let queue = Mutex::new(FakeUploadQueue::default());
            let mut reload = Reload::new(config());
            let initial = {
                let q = queue.lock();
                let texture = q.device.create_texture(&TextureFootprint::new(1, 1)).unwrap();
                GpuTexture::new(texture, heap.alloc_slot().unwrap(), 1, 1)
            };
            reload.set_active(initial, FenceValue::ZERO);
            Self {
                dir: tempfile::tempdir().unwrap(),
                heap,
                queue,
                sync: FrameSync::new(FakeTimeline::default(), vec![0, 1]).unwrap(),
                reload,
                ui: ORIGINAL_UI,
            }
        }

        fn write_image(&self, name: &str, width: u32, height: u32) -> PathBuf {
            let path = self.dir.path().join(name);
            fs::write(&path, encode_png(width, height, &gradient_pixels(width, height))).unwrap();
            path
        }

        fn wait_for_worker(&mut self) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while self.reload.phase() == ReloadPhase::Requested {
                assert!(Instant::now() < deadline, "worker never answered");
                self.reload.poll_worker(&mut self.ui);
                thread::sleep(Duration::from_millis(2));
            }
        }

        fn submit(&mut self) -> bool {
            self.reload
                .submit_pending(&self.heap, &self.queue, &mut self.sync, &mut self.ui)
                .unwrap()
        }

        fn finalize(&mut self) -> bool {
            self.reload.finalize_if_ready(&self.sync, &mut self.ui)
        }

        fn active_extent(&self) -> (u32, u32) {
            let active = self.reload.active().unwrap();
            (active.width(), active.height())
        }
    }

    #[test]
    fn reload_walks_every_state_and_restores_the_ui() {
        let mut h = Harness::new(8);
        let path = h.write_image("bg2.png", 3, 2);
        let old_handle = h.reload.active().unwrap().gpu_handle();

        h.reload.request(&path, &mut h.ui);
        assert_eq!(h.reload.phase(), ReloadPhase::Requested);
        assert_eq!(
            h.ui,
            FrontendSettings {
                vsync: false,
                target_fps: 60,
                is_loading: true
            }
        );

        h.wait_for_worker();
        assert_eq!(h.reload.phase(), ReloadPhase::BytesReady);

        assert!(h.submit());
        assert_eq!(h.reload.phase(), ReloadPhase::Submitted);
        let fence = h.sync.last_signaled();
        assert_eq!(fence, FenceValue(1));
        assert_eq!(h.heap.available(), 6);
        assert_eq!(h.queue.lock().submits, 1);

        // Fence not reached: nothing changes.
        assert!(!h.finalize());
        assert_eq!(h.reload.phase(), ReloadPhase::Submitted);
        assert_eq!(h.reload.active().unwrap().gpu_handle(), old_handle);
        assert!(h.ui.is_loading);
        assert_eq!(h.queue.lock().device.live_staging(), 1);

        h.sync.timeline().complete_through(fence);
        assert!(h.finalize());
        assert_eq!(h.reload.phase(), ReloadPhase::Idle);
        assert_eq!(h.ui, ORIGINAL_UI);
        assert_eq!(h.active_extent(), (3, 2));
        assert_eq!(h.reload.active().unwrap().gpu_handle(), h.heap.info().gpu_at(1));
        assert_eq!(h.queue.lock().device.live_staging(), 0);
        // Old slot came back as soon as the fence it was retired at completed.
        assert_eq!(h.heap.available(), 7);
        assert_eq!(h.queue.lock().device.live_textures(), 1);
    }

    #[test]
    fn old_texture_outlives_frames_that_may_still_sample_it() {
        let mut h = Harness::new(8);
        let path = h.write_image("bg.png", 2, 2);
        h.reload.request(&path, &mut h.ui);
        h.wait_for_worker();
        assert!(h.submit());
        let upload_fence = h.sync.last_signaled();

        // A frame recorded against the old texture is still in flight.
        let frame_fence = h.sync.finish_frame().unwrap();
        assert!(frame_fence > upload_fence);

        h.sync.timeline().complete_through(upload_fence);
        assert!(h.finalize());
        assert_eq!(h.reload.retired_len(), 1);
        assert_eq!(h.heap.available(), 6);
        assert_eq!(h.queue.lock().device.live_textures(), 2);

        assert_eq!(h.reload.release_retired(h.sync.completed_value()), 0);
        h.sync.timeline().complete_through(frame_fence);
        assert_eq!(h.reload.release_retired(h.sync.completed_value()), 1);
        assert_eq!(h.heap.available(), 7);
        assert_eq!(h.queue.lock().device.live_textures(), 1);
    }

    #[test]
    fn undecodable_bytes_keep_the_old_background() {
        let mut h = Harness::new(8);
        let path = h.dir.path().join("broken.png");
        fs::write(&path, b"not a png at all").unwrap();
        let old_handle = h.reload.active().unwrap().gpu_handle();

        h.reload.request(&path, &mut h.ui);
        h.wait_for_worker();
        assert!(!h.submit());

        assert_eq!(h.reload.phase(), ReloadPhase::Idle);
        assert_eq!(h.ui, ORIGINAL_UI);
        assert_eq!(h.reload.active().unwrap().gpu_handle(), old_handle);
        assert_eq!(h.heap.available(), 7);
        assert_eq!(h.queue.lock().abandons, 1);
        assert_eq!(h.sync.last_signaled(), FenceValue::ZERO);
    }

    #[test]
    fn missing_file_aborts_during_the_read() {
        let mut h = Harness::new(8);
        let path = h.dir.path().join("missing.png");
        h.reload.request(&path, &mut h.ui);
        h.wait_for_worker();
        assert_eq!(h.reload.phase(), ReloadPhase::Idle);
        assert_eq!(h.ui, ORIGINAL_UI);
        assert!(h.reload.texture_ready());
    }

    #[test]
    fn exhausted_heap_skips_the_upload() {
        let mut h = Harness::new(1);
        let path = h.write_image("bg.png", 2, 2);
        h.reload.request(&path, &mut h.ui);
        h.wait_for_worker();
        assert!(!h.submit());
        assert_eq!(h.reload.phase(), ReloadPhase::Idle);
        assert_eq!(h.ui, ORIGINAL_UI);
        assert_eq!(h.queue.lock().begins, 0);
    }

    #[test]
    fn lost_submission_is_fatal_and_keeps_the_copy_source_alive() {
        let mut h = Harness::new(8);
        let path = h.write_image("bg.png", 2, 2);
        h.queue.lock().fail_signal = true;

        h.reload.request(&path, &mut h.ui);
        h.wait_for_worker();
        let err = h
            .reload
            .submit_pending(&h.heap, &h.queue, &mut h.sync, &mut h.ui)
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(h.queue.lock().submits, 1);
        assert_eq!(h.queue.lock().device.live_staging(), 1);
        assert_eq!(h.queue.lock().device.live_textures(), 2);
        assert_eq!(h.heap.available(), 6);
    }

    #[test]
    fn failed_begin_keeps_the_old_background() {
        let mut h = Harness::new(8);
        let path = h.write_image("bg.png", 2, 2);
        let old_handle = h.reload.active().unwrap().gpu_handle();
        h.queue.lock().fail_begin = true;

        h.reload.request(&path, &mut h.ui);
        h.wait_for_worker();
        assert!(!h.submit());
        assert_eq!(h.reload.phase(), ReloadPhase::Idle);
        assert_eq!(h.ui, ORIGINAL_UI);
        assert_eq!(h.reload.active().unwrap().gpu_handle(), old_handle);
        assert_eq!(h.heap.available(), 7);
    }

    #[test]
    fn request_during_upload_is_queued_until_promotion() {
        let mut h = Harness::new(8);
        let first = h.write_image("first.png", 2, 2);
        let second = h.write_image("second.png", 5, 1);

        h.reload.request(&first, &mut h.ui);
        h.wait_for_worker();
        assert!(h.submit());

        h.reload.request(&second, &mut h.ui);
        assert_eq!(h.reload.phase(), ReloadPhase::Submitted);
        assert_eq!(h.reload.queued(), Some(second.as_path()));

        h.sync.timeline().complete_through(h.sync.last_signaled());
        assert!(h.finalize());
        assert_eq!(h.active_extent(), (2, 2));
        assert_eq!(h.reload.phase(), ReloadPhase::Requested);
        assert!(h.ui.is_loading);

        h.wait_for_worker();
        assert!(h.submit());
        h.sync.timeline().complete_through(h.sync.last_signaled());
        assert!(h.finalize());
        assert_eq!(h.active_extent(), (5, 1));
        assert_eq!(h.ui, ORIGINAL_UI);
        assert_eq!(h.heap.available(), 7);
    }

    #[test]
    fn request_before_upload_replaces_the_pending_one() {
        let mut h = Harness::new(8);
        let first = h.write_image("first.png", 2, 2);
        let second = h.write_image("second.png", 4, 3);

        h.reload.request(&first, &mut h.ui);
        h.reload.request(&second, &mut h.ui);
        h.wait_for_worker();
        assert!(h.submit());
        h.sync.timeline().complete_through(h.sync.last_signaled());
        assert!(h.finalize());

        assert_eq!(h.active_extent(), (4, 3));
        assert_eq!(h.ui, ORIGINAL_UI);
        assert_eq!(h.queue.lock().submits, 1);
    }

    fn reader_token(reload: &Reload) -> Arc<AtomicBool> {
        match &reload.state {
            ReloadState::Requested { cancel, .. } => cancel.clone(),
            _ => panic!("no reader running"),
        }
    }

    #[test]
    fn replaced_request_cancels_the_earlier_reader() {
        let mut h = Harness::new(8);
        let first = h.write_image("first.png", 2, 2);
        let second = h.write_image("second.png", 4, 3);

        h.reload.request(&first, &mut h.ui);
        let first_token = reader_token(&h.reload);
        assert!(!first_token.load(Ordering::Relaxed));

        h.reload.request(&second, &mut h.ui);
        assert!(first_token.load(Ordering::Relaxed));
        assert!(!reader_token(&h.reload).load(Ordering::Relaxed));
    }

    #[test]
    fn cancelled_reader_never_reads_the_file() {
        let dir = tempfile::tempdir().unwrap();
        // A read would report NotFound; a cancelled reader reports nothing.
        let path = dir.path().join("never-read.png");

        let cancel = Arc::new(AtomicBool::new(false));
        let inbox =
            spawn_reader(path.clone(), Duration::from_millis(200), cancel.clone()).unwrap();
        cancel.store(true, Ordering::Relaxed);
        assert!(inbox.recv().is_err());

        let inbox = spawn_reader(path, Duration::ZERO, Arc::new(AtomicBool::new(false))).unwrap();
        let read = inbox.recv().unwrap();
        assert_eq!(read.unwrap_err().kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn poll_gpu_drives_a_reload_to_completion() {
        let mut h = Harness::new(8);
        let path = h.write_image("bg.png", 6, 6);
        h.reload.request(&path, &mut h.ui);

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let promoted = h
                .reload
                .poll_gpu(&h.heap, &h.queue, &mut h.sync, &mut h.ui)
                .unwrap();
            if promoted {
                break;
            }
            assert!(Instant::now() < deadline, "reload never completed");
            // The GPU keeps up with everything submitted so far.
            h.sync.timeline().complete_through(h.sync.last_signaled());
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(h.active_extent(), (6, 6));
        assert_eq!(h.ui, ORIGINAL_UI);
    }

    #[test]
    fn immediate_backend_swaps_on_the_render_thread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bg.png");
        fs::write(&path, encode_png(3, 3, &gradient_pixels(3, 3))).unwrap();

        let mut reload: BackgroundReload<RgbaImage, ()> = BackgroundReload::new(config());
        let mut loader = FakeLoader::default();
        let mut ui = ORIGINAL_UI;

        reload.request(&path, &mut ui);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !reload.poll_immediate(&mut loader, &mut ui).unwrap() {
            assert!(Instant::now() < deadline, "reload never completed");
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(loader.created, 1);
        assert_eq!(reload.active().map(|image| image.width()), Some(3));
        assert_eq!(reload.phase(), ReloadPhase::Idle);
        assert_eq!(ui, ORIGINAL_UI);
    }
}
