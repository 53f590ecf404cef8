use super::{CpuDescriptorHandle, GpuError};

/// Row pitch alignment required for buffer-to-texture copies.
pub const TEXTURE_DATA_PITCH_ALIGNMENT: u32 = 256;

pub const BYTES_PER_PIXEL: u32 = 4;

pub fn aligned_row_pitch(width: u32) -> u32 {
    let tight = width * BYTES_PER_PIXEL;
    (tight + TEXTURE_DATA_PITCH_ALIGNMENT - 1) & !(TEXTURE_DATA_PITCH_ALIGNMENT - 1)
}

/// Layout of an RGBA8 image inside a staging buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureFootprint {
    pub width: u32,
    pub height: u32,
    pub row_pitch: u32,
}

impl TextureFootprint {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            row_pitch: aligned_row_pitch(width),
        }
    }

    pub fn tight_row_bytes(&self) -> usize {
        (self.width * BYTES_PER_PIXEL) as usize
    }

    pub fn staging_size(&self) -> u64 {
        self.row_pitch as u64 * self.height as u64
    }
}

/// Tightly packed 8-bit RGBA pixels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgbaImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RgbaImage {
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, GpuError> {
        if width == 0 || height == 0 {
            return Err(GpuError::EmptyImage { width, height });
        }
        let expected = width as usize * height as usize * BYTES_PER_PIXEL as usize;
        if pixels.len() != expected {
            return Err(GpuError::PixelSize {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn footprint(&self) -> TextureFootprint {
        TextureFootprint::new(self.width, self.height)
    }
}

/// Decode a compressed image payload into RGBA8.
pub fn decode_rgba8(bytes: &[u8]) -> Result<RgbaImage, GpuError> {
    let decoded = image::load_from_memory(bytes)?.into_rgba8();
    let (width, height) = decoded.dimensions();
    RgbaImage::from_raw(width, height, decoded.into_raw())
}

/// Copy tightly packed rows into a pitched staging buffer.
pub fn write_rows(image: &RgbaImage, footprint: &TextureFootprint, dst: &mut [u8]) -> Result<(), GpuError> {
    let required = footprint.staging_size() as usize;
    if dst.len() < required {
        return Err(GpuError::PixelSize {
            expected: required,
            actual: dst.len(),
        });
    }
    let row_bytes = footprint.tight_row_bytes();
    let pitch = footprint.row_pitch as usize;
    for (y, src_row) in image.pixels.chunks_exact(row_bytes).enumerate() {
        let offset = y * pitch;
        dst[offset..offset + row_bytes].copy_from_slice(src_row);
    }
    Ok(())
}

/// Device operations the upload path needs.
pub trait TextureUploadDevice {
    type Texture;
    type Staging;
    type CommandList;

    /// Default-heap RGBA8 texture, created in the copy-destination state.
    fn create_texture(&self, footprint: &TextureFootprint) -> Result<Self::Texture, GpuError>;

    fn create_staging(&self, size: u64) -> Result<Self::Staging, GpuError>;

    /// Map the staging buffer for the duration of `write`.
    fn write_staging(
        &self,
        staging: &Self::Staging,
        write: &mut dyn FnMut(&mut [u8]) -> Result<(), GpuError>,
    ) -> Result<(), GpuError>;

    fn record_copy(
        &self,
        list: &Self::CommandList,
        staging: &Self::Staging,
        texture: &Self::Texture,
        footprint: &TextureFootprint,
    );

    fn record_shader_read_transition(&self, list: &Self::CommandList, texture: &Self::Texture);

    fn create_shader_view(&self, texture: &Self::Texture, slot: CpuDescriptorHandle);
}

/// The dedicated upload allocator and command list pair.
pub trait UploadQueue {
    type Device: TextureUploadDevice;

    fn device(&self) -> &Self::Device;

    fn command_list(&self) -> &<Self::Device as TextureUploadDevice>::CommandList;

    /// Reset the allocator and open the list for recording.
    fn begin(&mut self) -> Result<(), GpuError>;

    /// Close the list and execute it on the queue.
    ///
    /// An error raised once the list has been executed must be fatal, since
    /// the recorded copies may still be reading the caller's staging memory.
    fn submit(&mut self) -> Result<(), GpuError>;

    /// Close the list without executing it.
    fn abandon(&mut self);
}

/// A texture whose copy has been recorded but not yet executed. The staging
/// buffer must outlive the GPU copy.
pub struct UploadedTexture<T, S> {
    pub texture: T,
    pub staging: S,
    pub footprint: TextureFootprint,
}

pub fn upload_from_bytes<D: TextureUploadDevice>(
    device: &D,
    list: &D::CommandList,
    bytes: &[u8],
    slot: CpuDescriptorHandle,
) -> Result<UploadedTexture<D::Texture, D::Staging>, GpuError> {
    let image = decode_rgba8(bytes)?;
    upload_rgba(device, list, &image, slot)
}

pub fn upload_rgba<D: TextureUploadDevice>(
    device: &D,
    list: &D::CommandList,
    image: &RgbaImage,
    slot: CpuDescriptorHandle,
) -> Result<UploadedTexture<D::Texture, D::Staging>, GpuError> {
    let footprint = image.footprint();
    let texture = device.create_texture(&footprint)?;
    let staging = device.create_staging(footprint.staging_size())?;
    device.write_staging(&staging, &mut |dst: &mut [u8]| write_rows(image, &footprint, dst))?;

    device.record_copy(list, &staging, &texture, &footprint);
    device.record_shader_read_transition(list, &texture);
    device.create_shader_view(&texture, slot);

    Ok(UploadedTexture {
        texture,
        staging,
        footprint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{encode_png, gradient_pixels, FakeDevice, FakeList, Op};

    #[test]
    fn row_pitch_rounds_up_to_alignment() {
        assert_eq!(aligned_row_pitch(1), 256);
        assert_eq!(aligned_row_pitch(64), 256);
        assert_eq!(aligned_row_pitch(65), 512);
        assert_eq!(aligned_row_pitch(255), 1024);
        assert_eq!(aligned_row_pitch(256), 1024);
        assert_eq!(TextureFootprint::new(255, 3).staging_size(), 3 * 1024);
    }

    #[test]
    fn zero_extent_and_short_buffers_are_rejected() {
        assert!(matches!(
            RgbaImage::from_raw(0, 4, Vec::new()),
            Err(GpuError::EmptyImage { width: 0, height: 4 })
        ));
        assert!(matches!(
            RgbaImage::from_raw(2, 2, vec![0; 15]),
            Err(GpuError::PixelSize { expected: 16, actual: 15 })
        ));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(matches!(
            decode_rgba8(b"definitely not an image"),
            Err(GpuError::Decode(_))
        ));
    }

    #[test]
    fn pitched_upload_round_trips_for_unaligned_and_aligned_widths() {
        for &(width, height) in &[(255u32, 3u32), (256, 3), (1, 1), (65, 2)] {
            let pixels = gradient_pixels(width, height);
            let png = encode_png(width, height, &pixels);
            let device = FakeDevice::default();
            let list = FakeList::default();

            let uploaded = upload_from_bytes(&device, &list, &png, CpuDescriptorHandle(0x40)).unwrap();
            assert_eq!(uploaded.footprint.row_pitch, aligned_row_pitch(width));
            assert_eq!(
                uploaded.staging.bytes().len() as u64,
                uploaded.footprint.staging_size()
            );
            assert_eq!(uploaded.texture.pixels(), pixels, "{}x{}", width, height);
        }
    }

    #[test]
    fn upload_records_copy_transition_and_view_in_order() {
        let pixels = gradient_pixels(4, 4);
        let image = RgbaImage::from_raw(4, 4, pixels).unwrap();
        let device = FakeDevice::default();
        let list = FakeList::default();
        let uploaded = upload_rgba(&device, &list, &image, CpuDescriptorHandle(0x80)).unwrap();

        assert_eq!(
            list.ops(),
            vec![Op::Copy(uploaded.texture.id()), Op::ShaderRead(uploaded.texture.id())]
        );
        assert_eq!(device.views(), vec![(uploaded.texture.id(), CpuDescriptorHandle(0x80))]);
        assert!(uploaded.texture.is_shader_readable());
    }

    #[test]
    fn failed_staging_creation_leaves_nothing_recorded() {
        let image = RgbaImage::from_raw(2, 2, vec![7; 16]).unwrap();
        let device = FakeDevice::default();
        device.fail_staging();
        let list = FakeList::default();
        assert!(upload_rgba(&device, &list, &image, CpuDescriptorHandle(0)).is_err());
        assert!(list.ops().is_empty());
        assert!(device.views().is_empty());
        assert_eq!(device.live_textures(), 0);
    }
}
