// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    buffer::{self, HandleGuard, PortableBuffer},
    error::{Error, Result},
    format::{FormatResolver, HalFormatResolver, Size, UsageFlags},
    handle::NativeHandle,
    service::{AllocationRequest, AllocationService, DmaHeapService, HeapType},
};
use parking_lot::Mutex;
use std::sync::OnceLock;
use tracing::{debug, error};

/// Name the allocator reports to the platform service.
pub const REQUESTOR: &str = "edgefirst-framebuffer";

/// Frame buffer allocator.
///
/// Front end to a platform [`AllocationService`]: requests buffers from it
/// and turns the returned handles into [`PortableBuffer`]s. Buffers borrow
/// the allocator and release their handle through it when dropped, so the
/// allocator must outlive every buffer it creates.
///
/// All calls into the service are serialized by an internal lock, so a
/// single allocator may be shared between threads.
///
/// # Example
///
/// ```no_run
/// use edgefirst_framebuffer::{format::{hal, Size, UsageFlags}, Allocator};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let allocator = Allocator::system();
/// let buffer = allocator.allocate(
///     hal::YCBCR_420_888,
///     Size::new(1920, 1080),
///     UsageFlags::CAMERA_WRITE | UsageFlags::CAMERA_READ,
/// )?;
/// for plane in buffer.planes() {
///     println!("{:?}", plane);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Allocator {
    service: Mutex<Box<dyn AllocationService>>,
    resolver: Box<dyn FormatResolver>,
}

static SYSTEM: OnceLock<Allocator> = OnceLock::new();

fn check_size(size: Size) -> Result<()> {
    if size.is_empty() {
        return Err(Error::InvalidSize {
            width: size.width.into(),
            height: size.height.into(),
        });
    }
    Ok(())
}

impl Allocator {
    pub fn new(service: impl AllocationService + 'static) -> Self {
        Self {
            service: Mutex::new(Box::new(service)),
            resolver: Box::new(HalFormatResolver::default()),
        }
    }

    /// Replaces the resolver used to map device format codes.
    pub fn with_resolver(mut self, resolver: impl FormatResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Process-wide allocator backed by the CMA DMA heap.
    ///
    /// Created on first use and never torn down, so buffers from it may
    /// live for the rest of the process.
    pub fn system() -> &'static Allocator {
        SYSTEM.get_or_init(|| {
            debug!("creating system frame buffer allocator");
            Allocator::new(DmaHeapService::new(HeapType::Cma))
        })
    }

    pub fn resolver(&self) -> &dyn FormatResolver {
        self.resolver.as_ref()
    }

    /// Requests a single layer buffer from the platform service.
    ///
    /// Returns the handle and the row stride, in pixels, chosen by the
    /// service. The handle must be wrapped in a [`HandleGuard`] straight
    /// away so it is returned to the service.
    pub(crate) fn allocate_handle(
        &self,
        format: i32,
        size: Size,
        usage: UsageFlags,
    ) -> Result<(NativeHandle, u32)> {
        check_size(size)?;

        debug!(
            "allocate: pixelFormat={:#x} size={} usage={:#x}",
            format,
            size,
            usage.bits()
        );

        let request = AllocationRequest {
            width: size.width,
            height: size.height,
            format,
            layer_count: 1,
            usage,
            requestor: REQUESTOR,
        };

        let mut service = self.service.lock();
        let allocation = service.allocate(&request).map_err(|status| {
            error!("failed buffer allocation: {}", status);
            Error::AllocationFailed(status)
        })?;

        match allocation.handle {
            Some(handle) if handle.num_fds() > 0 => Ok((handle, allocation.stride)),
            Some(handle) => {
                error!("invalid buffer handle without descriptors: {:?}", handle);
                if let Err(status) = service.free(handle) {
                    error!("{}", Error::FreeFailed(status));
                }
                Err(Error::InvalidHandle)
            }
            None => {
                error!("invalid buffer handle");
                Err(Error::InvalidHandle)
            }
        }
    }

    /// Returns `handle` to the platform service.
    ///
    /// Only [`HandleGuard`] calls this, once per handle.
    pub(crate) fn free(&self, handle: NativeHandle) -> Result<()> {
        debug!("free: {:?}", handle);
        self.service.lock().free(handle).map_err(Error::FreeFailed)
    }

    /// Allocates a buffer and resolves its plane layout.
    ///
    /// `format` is the device-facing format code, resolved through this
    /// allocator's [`FormatResolver`] before anything is requested from the
    /// platform. On error nothing remains allocated.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidSize`] if either dimension is zero or the rows of
    ///   the format overflow at this size
    /// - [`Error::UnsupportedFormat`] if the code has no known layout
    /// - [`Error::AllocationFailed`] if the platform refused the request
    /// - [`Error::InvalidHandle`] if the platform returned an unusable handle
    /// - [`Error::PlaneLayoutMismatch`] if the handle's planes disagree with
    ///   the format or overrun their backing memory
    pub fn allocate(
        &self,
        format: i32,
        size: Size,
        usage: UsageFlags,
    ) -> Result<PortableBuffer<'_>> {
        check_size(size)?;
        let (pixel_format, info) = self.resolver.resolve(format)?;
        if info.frame_size(size).is_none() {
            return Err(Error::InvalidSize {
                width: size.width.into(),
                height: size.height.into(),
            });
        }

        let (handle, stride) = self.allocate_handle(format, size, usage)?;
        let guard = HandleGuard::new(self, handle);
        let planes = buffer::build_planes(guard.handle(), info, size)?;

        Ok(PortableBuffer::new(
            planes,
            guard,
            pixel_format,
            info,
            size,
            stride,
            usage,
        ))
    }
}
