//! In-memory stand-ins for the GPU seams, shared by the unit tests.

use std::cell::{Cell, RefCell};
use std::io::Cursor;
use std::rc::Rc;

use crate::gpu::upload::TextureFootprint;
use crate::gpu::{
    CpuDescriptorHandle, DescriptorHeapInfo, FenceValue, GpuDescriptorHandle, GpuError,
    GpuTimeline, ImmediateTextureLoader, RgbaImage, SharedDescriptorHeap, TextureUploadDevice,
    UploadQueue,
};

/// A fence the test advances by hand. Blocking waits complete immediately
/// by jumping the fence forward, as if the GPU caught up.
#[derive(Default)]
pub struct FakeTimeline {
    completed: Cell<u64>,
    signaled: RefCell<Vec<FenceValue>>,
    waits: RefCell<Vec<FenceValue>>,
    frame_waits: RefCell<Vec<FenceValue>>,
    present_waits: Cell<usize>,
    fail: Cell<bool>,
}

impl FakeTimeline {
    pub fn complete_through(&self, value: FenceValue) {
        if value.0 > self.completed.get() {
            self.completed.set(value.0);
        }
    }

    pub fn signaled(&self) -> Vec<FenceValue> {
        self.signaled.borrow().clone()
    }

    pub fn waits(&self) -> Vec<FenceValue> {
        self.waits.borrow().clone()
    }

    pub fn frame_waits(&self) -> Vec<FenceValue> {
        self.frame_waits.borrow().clone()
    }

    pub fn present_waits(&self) -> usize {
        self.present_waits.get()
    }

    pub fn fail_waits(&self) {
        self.fail.set(true);
    }
}

impl GpuTimeline for FakeTimeline {
    fn signal(&self, value: FenceValue) -> Result<(), GpuError> {
        self.signaled.borrow_mut().push(value);
        Ok(())
    }

    fn completed_value(&self) -> FenceValue {
        FenceValue(self.completed.get())
    }

    fn wait_for(&self, value: FenceValue) -> Result<(), GpuError> {
        if self.fail.get() {
            return Err(GpuError::WaitTimeout(value.0));
        }
        self.waits.borrow_mut().push(value);
        self.complete_through(value);
        Ok(())
    }

    fn wait_for_frame(&self, value: FenceValue) -> Result<(), GpuError> {
        if self.fail.get() {
            return Err(GpuError::WaitTimeout(value.0));
        }
        self.frame_waits.borrow_mut().push(value);
        self.complete_through(value);
        Ok(())
    }

    fn wait_for_present(&self) -> Result<(), GpuError> {
        self.present_waits.set(self.present_waits.get() + 1);
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Copy(u32),
    ShaderRead(u32),
}

#[derive(Default)]
pub struct FakeList {
    ops: RefCell<Vec<Op>>,
}

impl FakeList {
    pub fn ops(&self) -> Vec<Op> {
        self.ops.borrow().clone()
    }
}

pub struct FakeTexture {
    id: u32,
    pixels: RefCell<Vec<u8>>,
    readable: Cell<bool>,
    live: Rc<Cell<usize>>,
}

impl FakeTexture {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn pixels(&self) -> Vec<u8> {
        self.pixels.borrow().clone()
    }

    pub fn is_shader_readable(&self) -> bool {
        self.readable.get()
    }
}

impl Drop for FakeTexture {
    fn drop(&mut self) {
        self.live.set(self.live.get() - 1);
    }
}

pub struct FakeStaging {
    bytes: RefCell<Vec<u8>>,
    live: Rc<Cell<usize>>,
}

impl FakeStaging {
    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.borrow().clone()
    }
}

impl Drop for FakeStaging {
    fn drop(&mut self) {
        self.live.set(self.live.get() - 1);
    }
}

#[derive(Default)]
pub struct FakeDevice {
    next_id: Cell<u32>,
    live_textures: Rc<Cell<usize>>,
    live_staging: Rc<Cell<usize>>,
    views: RefCell<Vec<(u32, CpuDescriptorHandle)>>,
    fail_staging: Cell<bool>,
}

impl FakeDevice {
    pub fn fail_staging(&self) {
        self.fail_staging.set(true);
    }

    pub fn views(&self) -> Vec<(u32, CpuDescriptorHandle)> {
        self.views.borrow().clone()
    }

    pub fn live_textures(&self) -> usize {
        self.live_textures.get()
    }

    pub fn live_staging(&self) -> usize {
        self.live_staging.get()
    }
}

/// Undo the pitched layout of a staging buffer.
pub fn read_rows(footprint: &TextureFootprint, src: &[u8]) -> Vec<u8> {
    let row_bytes = footprint.tight_row_bytes();
    let mut out = Vec::with_capacity(row_bytes * footprint.height as usize);
    for y in 0..footprint.height as usize {
        let offset = y * footprint.row_pitch as usize;
        out.extend_from_slice(&src[offset..offset + row_bytes]);
    }
    out
}

impl TextureUploadDevice for FakeDevice {
    type Texture = FakeTexture;
    type Staging = FakeStaging;
    type CommandList = FakeList;

    fn create_texture(&self, _footprint: &TextureFootprint) -> Result<FakeTexture, GpuError> {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        self.live_textures.set(self.live_textures.get() + 1);
        Ok(FakeTexture {
            id,
            pixels: RefCell::new(Vec::new()),
            readable: Cell::new(false),
            live: self.live_textures.clone(),
        })
    }

    fn create_staging(&self, size: u64) -> Result<FakeStaging, GpuError> {
        if self.fail_staging.get() {
            return Err(GpuError::resource("upload buffer", "E_OUTOFMEMORY"));
        }
        self.live_staging.set(self.live_staging.get() + 1);
        Ok(FakeStaging {
            bytes: RefCell::new(vec![0xCD; size as usize]),
            live: self.live_staging.clone(),
        })
    }

    fn write_staging(
        &self,
        staging: &FakeStaging,
        write: &mut dyn FnMut(&mut [u8]) -> Result<(), GpuError>,
    ) -> Result<(), GpuError> {
        write(staging.bytes.borrow_mut().as_mut_slice())
    }

    fn record_copy(
        &self,
        list: &FakeList,
        staging: &FakeStaging,
        texture: &FakeTexture,
        footprint: &TextureFootprint,
    ) {
        *texture.pixels.borrow_mut() = read_rows(footprint, &staging.bytes.borrow());
        list.ops.borrow_mut().push(Op::Copy(texture.id));
    }

    fn record_shader_read_transition(&self, list: &FakeList, texture: &FakeTexture) {
        texture.readable.set(true);
        list.ops.borrow_mut().push(Op::ShaderRead(texture.id));
    }

    fn create_shader_view(&self, texture: &FakeTexture, slot: CpuDescriptorHandle) {
        self.views.borrow_mut().push((texture.id, slot));
    }
}

/// Upload queue over [`FakeDevice`] that counts submissions.
#[derive(Default)]
pub struct FakeUploadQueue {
    pub device: FakeDevice,
    list: FakeList,
    open: bool,
    pub begins: u32,
    pub submits: u32,
    pub abandons: u32,
    /// `begin` reports a non-fatal failure.
    pub fail_begin: bool,
    /// `submit` executes the list, then fails to fence it.
    pub fail_signal: bool,
}

impl UploadQueue for FakeUploadQueue {
    type Device = FakeDevice;

    fn device(&self) -> &FakeDevice {
        &self.device
    }

    fn command_list(&self) -> &FakeList {
        &self.list
    }

    fn begin(&mut self) -> Result<(), GpuError> {
        assert!(!self.open, "upload list reset while recording");
        if self.fail_begin {
            return Err(GpuError::resource("upload command list", "E_OUTOFMEMORY"));
        }
        self.open = true;
        self.begins += 1;
        self.list.ops.borrow_mut().clear();
        Ok(())
    }

    fn submit(&mut self) -> Result<(), GpuError> {
        assert!(self.open, "submit without begin");
        self.open = false;
        self.submits += 1;
        if self.fail_signal {
            return Err(GpuError::SubmitFailed("E_FAIL".into()));
        }
        Ok(())
    }

    fn abandon(&mut self) {
        self.open = false;
        self.abandons += 1;
    }
}

/// Synchronous loader producing plain images.
#[derive(Default)]
pub struct FakeLoader {
    pub created: u32,
    pub fail: bool,
}

impl ImmediateTextureLoader for FakeLoader {
    type Texture = RgbaImage;

    fn create_from_rgba(&mut self, image: &RgbaImage) -> Result<RgbaImage, GpuError> {
        if self.fail {
            return Err(GpuError::resource("texture", "E_OUTOFMEMORY"));
        }
        self.created += 1;
        Ok(image.clone())
    }
}

pub fn heap(capacity: u32) -> SharedDescriptorHeap {
    SharedDescriptorHeap::new(DescriptorHeapInfo {
        cpu_start: CpuDescriptorHandle(0x10_0000),
        gpu_start: GpuDescriptorHandle(0x2000_0000),
        increment: 64,
        capacity,
    })
}

pub fn gradient_pixels(width: u32, height: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            pixels.extend_from_slice(&[x as u8, y as u8, (x ^ y) as u8, 255 - (x as u8)]);
        }
    }
    pixels
}

pub fn encode_png(width: u32, height: u32, pixels: &[u8]) -> Vec<u8> {
    let buffer = image::RgbaImage::from_raw(width, height, pixels.to_vec())
        .expect("pixel buffer matches extent");
    let mut out = Cursor::new(Vec::new());
    buffer
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("png encoding");
    out.into_inner()
}
