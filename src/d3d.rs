//! Helpers shared by the Direct3D 11 and 12 backends.

use std::ffi::CString;

use anyhow::{anyhow, Result};
use windows::core::PCSTR;
use windows::Win32::Graphics::Direct3D::Fxc::*;
use windows::Win32::Graphics::Direct3D::ID3DBlob;
use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_DEVICE_HUNG, DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_DEVICE_RESET,
};

use crate::gpu::GpuError;

pub fn compile_shader(source: &str, entry_point: &str, target: &str) -> Result<ID3DBlob> {
    unsafe {
        let entry = CString::new(entry_point)?;
        let target = CString::new(target)?;
        let mut blob = None;
        let mut error = None;

        let result = D3DCompile(
            source.as_ptr() as *const std::ffi::c_void,
            source.len(),
            None,
            None,
            None,
            PCSTR(entry.as_ptr() as *const u8),
            PCSTR(target.as_ptr() as *const u8),
            D3DCOMPILE_OPTIMIZATION_LEVEL3,
            0,
            &mut blob,
            Some(&mut error),
        );

        if let Some(error) = error {
            let error_str = String::from_utf8_lossy(blob_bytes(&error));
            log::error!("Shader compilation error in {}: {}", entry_point, error_str);
        }

        result?;
        blob.ok_or_else(|| anyhow!("Failed to compile shader {}", entry_point))
    }
}

pub fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
    unsafe { std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize()) }
}

/// Classify a failed D3D call. Device loss is fatal, anything else only
/// fails the operation that hit it.
pub fn device_error(what: &'static str, err: windows::core::Error) -> GpuError {
    let code = err.code();
    if code == DXGI_ERROR_DEVICE_REMOVED || code == DXGI_ERROR_DEVICE_RESET || code == DXGI_ERROR_DEVICE_HUNG {
        GpuError::DeviceRemoved(format!("{}: {}", what, err))
    } else {
        GpuError::resource(what, err)
    }
}
