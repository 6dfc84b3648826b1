//! COM apartment handling shared by the capture and render threads.

use windows::Win32::System::Com::*;

use ac3_live_core::models::error::StreamError;

/// Joins the calling thread to the multithreaded apartment until dropped.
///
/// Must be dropped on the thread that created it.
pub struct ComApartment {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl ComApartment {
    pub fn enter() -> Result<Self, StreamError> {
        unsafe {
            CoInitializeEx(None, COINIT_MULTITHREADED)
                .ok()
                .map_err(|e| StreamError::device(format!("CoInitializeEx failed: {}", e)))?;
        }
        Ok(Self {
            _not_send: std::marker::PhantomData,
        })
    }
}

impl Drop for ComApartment {
    fn drop(&mut self) {
        unsafe {
            CoUninitialize();
        }
    }
}
