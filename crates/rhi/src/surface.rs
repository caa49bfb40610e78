//! Vulkan surface creation from raw window handles.

use std::ffi::c_char;
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;

/// Instance extensions the platform needs to present to `window`.
pub fn required_extensions(window: &impl HasDisplayHandle) -> RhiResult<&'static [*const c_char]> {
    let display = window
        .display_handle()
        .map_err(|e| RhiError::SurfaceError(e.to_string()))?;
    Ok(ash_window::enumerate_required_extensions(display.as_raw())?)
}

/// Owned `VkSurfaceKHR`, destroyed on drop.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
    _instance: Arc<Instance>,
}

impl Surface {
    /// The window must outlive the returned surface.
    pub fn new(
        instance: Arc<Instance>,
        window: &(impl HasDisplayHandle + HasWindowHandle),
    ) -> RhiResult<Self> {
        let display = window
            .display_handle()
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        let handle = unsafe {
            ash_window::create_surface(
                instance.entry(),
                instance.handle(),
                display.as_raw(),
                window_handle.as_raw(),
                None,
            )?
        };
        let loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
        tracing::debug!("Vulkan surface created");

        Ok(Self {
            handle,
            loader,
            _instance: instance,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.handle, None) };
        tracing::debug!("Vulkan surface destroyed");
    }
}
