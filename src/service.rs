// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Platform allocation services.
//!
//! [`AllocationService`] is the seam between the allocator and whatever
//! actually reserves buffer memory. Two Linux implementations are provided:
//! [`DmaHeapService`] allocates dma-bufs from a DMA heap and
//! [`MemfdService`] backs buffers with anonymous memory for hosts without
//! DMA heaps.

use crate::{
    error::Status,
    format::{FormatInfo, FormatResolver, HalFormatResolver, UsageFlags},
    handle::{NativeHandle, VendorMetadata, VendorPlane, MAX_PLANES},
};
use dma_heap::{Heap, HeapKind};
use std::{
    ffi::CString,
    io,
    os::fd::{AsRawFd, FromRawFd, OwnedFd},
};
use tracing::{debug, warn};

/// Parameters of one buffer request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AllocationRequest<'a> {
    pub width: u32,
    pub height: u32,
    /// Device-facing pixel format code.
    pub format: i32,
    pub layer_count: u32,
    pub usage: UsageFlags,
    /// Name recorded by the service for debugging.
    pub requestor: &'a str,
}

/// Result of a successful allocation request.
///
/// A service reporting success without a handle is in breach of its
/// contract; the allocator treats that as fatal rather than trusting it.
#[derive(Debug)]
pub struct Allocation {
    pub handle: Option<NativeHandle>,
    /// Row stride of the first plane, in pixels.
    pub stride: u32,
}

pub trait AllocationService: Send {
    fn allocate(&mut self, request: &AllocationRequest<'_>) -> Result<Allocation, Status>;

    /// Releases a handle previously returned by `allocate`.
    fn free(&mut self, handle: NativeHandle) -> Result<(), Status>;
}

/// Creates an anonymous memory file of `len` bytes.
pub fn memfd(name: &str, len: u64) -> io::Result<OwnedFd> {
    let name = CString::new(name)?;
    let fd = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };
    if unsafe { libc::ftruncate(fd.as_raw_fd(), len as libc::off_t) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

fn page_size() -> u64 {
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        n if n > 0 => n as u64,
        _ => 4096,
    }
}

/// Planes packed one after another with aligned rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedLayout {
    pub planes: Vec<VendorPlane>,
    /// Row stride of the first plane, in pixels.
    pub pixel_stride: u32,
    /// Bytes to reserve, rounded up to whole pages.
    pub total: u64,
}

/// Lays out the planes of `info` consecutively from offset zero, each row
/// padded to `stride_align` bytes.
///
/// Returns `None` when the layout cannot be described with 32-bit plane
/// geometry.
pub fn pack_planes(
    info: &FormatInfo,
    width: u32,
    height: u32,
    stride_align: u32,
) -> Option<PackedLayout> {
    let mut offset = 0u64;
    let mut planes = Vec::with_capacity(info.num_planes());
    for i in 0..info.num_planes() {
        let stride = info.stride(width, i, stride_align)?;
        let size = info.plane_size_with_stride(height, i, stride);
        planes.push(VendorPlane {
            stride,
            offset: u32::try_from(offset).ok()?,
            size: u32::try_from(size).ok()?,
        });
        offset = offset.checked_add(size)?;
    }

    let page = page_size();
    let total = offset.div_ceil(page) * page;
    if total > u64::from(u32::MAX) {
        return None;
    }

    let pixel_stride = match (planes.first(), info.planes().first()) {
        (Some(plane), Some(geometry)) => {
            u64::from(plane.stride) * u64::from(info.pixels_per_group)
                / u64::from(geometry.bytes_per_group)
        }
        _ => 0,
    };

    Some(PackedLayout {
        planes,
        pixel_stride: u32::try_from(pixel_stride).ok()?,
        total,
    })
}

/// Shared request handling for services that pack planes into one buffer.
struct Packer {
    resolver: Box<dyn FormatResolver>,
    stride_align: u32,
    next_id: u32,
}

impl Packer {
    fn new() -> Self {
        Self {
            resolver: Box::new(HalFormatResolver::default()),
            stride_align: DEFAULT_STRIDE_ALIGN,
            next_id: 1,
        }
    }

    fn allocate<F>(
        &mut self,
        request: &AllocationRequest<'_>,
        reserve: F,
    ) -> Result<Allocation, Status>
    where
        F: FnOnce(u64) -> Result<OwnedFd, Status>,
    {
        if request.width == 0 || request.height == 0 || request.layer_count != 1 {
            warn!(
                "rejecting request {}x{} layers={}",
                request.width, request.height, request.layer_count
            );
            return Err(Status::BAD_VALUE);
        }

        let Some(format) = self.resolver.to_pixel_format(request.format) else {
            warn!("unknown format code {:#x}", request.format);
            return Err(Status::BAD_VALUE);
        };
        let Some(info) = FormatInfo::info(format) else {
            warn!("no layout for format {}", format);
            return Err(Status::BAD_VALUE);
        };
        if info.num_planes() > MAX_PLANES {
            return Err(Status::BAD_VALUE);
        }

        let Some(layout) = pack_planes(info, request.width, request.height, self.stride_align)
        else {
            warn!(
                "{}x{} {} does not fit in one buffer",
                request.width, request.height, format
            );
            return Err(Status::NO_MEMORY);
        };
        let fd = reserve(layout.total)?;

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        debug!(
            "allocated id={} {}x{} {} len={} for {}",
            id, request.width, request.height, format, layout.total, request.requestor
        );

        let metadata = VendorMetadata {
            id,
            width: request.width,
            height: request.height,
            format,
            planes: layout.planes,
        };

        Ok(Allocation {
            handle: Some(NativeHandle::new(vec![fd], metadata.encode())),
            stride: layout.pixel_stride,
        })
    }
}

/// Row alignment used by the bundled services.
pub const DEFAULT_STRIDE_ALIGN: u32 = 64;

/// DMA heap to allocate from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HeapType {
    /// Physically contiguous memory, required by most camera and codec IP.
    Cma,
    System,
}

impl From<HeapType> for HeapKind {
    fn from(value: HeapType) -> Self {
        match value {
            HeapType::Cma => HeapKind::Cma,
            HeapType::System => HeapKind::System,
        }
    }
}

/// Allocates buffers as dma-bufs from a Linux DMA heap.
///
/// Every buffer is a single dma-buf holding all planes back to back.
pub struct DmaHeapService {
    heap: HeapType,
    packer: Packer,
}

impl DmaHeapService {
    pub fn new(heap: HeapType) -> Self {
        Self {
            heap,
            packer: Packer::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: impl FormatResolver + 'static) -> Self {
        self.packer.resolver = Box::new(resolver);
        self
    }

    pub fn with_stride_align(mut self, align: u32) -> Self {
        self.packer.stride_align = align.max(1);
        self
    }

    pub fn heap(&self) -> HeapType {
        self.heap
    }
}

impl AllocationService for DmaHeapService {
    fn allocate(&mut self, request: &AllocationRequest<'_>) -> Result<Allocation, Status> {
        let kind = self.heap;
        self.packer.allocate(request, |len| {
            let heap = Heap::new(kind.into()).map_err(|e| {
                warn!("failed to open {:?} heap: {:?}", kind, e);
                Status::NO_INIT
            })?;
            heap.allocate(len as usize).map_err(|e| {
                warn!("{:?} heap allocation of {} bytes failed: {:?}", kind, len, e);
                Status::NO_MEMORY
            })
        })
    }

    fn free(&mut self, handle: NativeHandle) -> Result<(), Status> {
        debug!("releasing {:?}", handle);
        drop(handle);
        Ok(())
    }
}

/// Allocates buffers from anonymous memory files.
pub struct MemfdService {
    packer: Packer,
}

impl Default for MemfdService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemfdService {
    pub fn new() -> Self {
        Self {
            packer: Packer::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: impl FormatResolver + 'static) -> Self {
        self.packer.resolver = Box::new(resolver);
        self
    }

    pub fn with_stride_align(mut self, align: u32) -> Self {
        self.packer.stride_align = align.max(1);
        self
    }
}

impl AllocationService for MemfdService {
    fn allocate(&mut self, request: &AllocationRequest<'_>) -> Result<Allocation, Status> {
        let name = request.requestor;
        self.packer.allocate(request, |len| {
            memfd(name, len).map_err(|e| {
                warn!("memfd allocation of {} bytes failed: {}", len, e);
                Status::from_io(&e)
            })
        })
    }

    fn free(&mut self, handle: NativeHandle) -> Result<(), Status> {
        debug!("releasing {:?}", handle);
        drop(handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        format::{hal, NV12, RGB3, RGBA, YU12, YUYV},
        handle::{backing_size, VendorHandle},
    };

    fn request(format: i32, width: u32, height: u32) -> AllocationRequest<'static> {
        AllocationRequest {
            width,
            height,
            format,
            layer_count: 1,
            usage: UsageFlags::CAMERA_READ,
            requestor: "service-test",
        }
    }

    #[test]
    fn test_pack_nv12() {
        let info = FormatInfo::info(NV12).unwrap();
        let layout = pack_planes(info, 1920, 1080, 64).unwrap();
        assert_eq!(layout.planes.len(), 2);
        assert_eq!(layout.planes[0].size, 1920 * 1080);
        assert_eq!(layout.planes[1].offset, 1920 * 1080);
        assert_eq!(layout.planes[1].size, 1920 * 540);
        assert_eq!(layout.pixel_stride, 1920);
        assert!(layout.total >= 1920 * 1080 * 3 / 2);
        assert_eq!(layout.total % page_size(), 0);
    }

    #[test]
    fn test_pack_pads_rows() {
        let info = FormatInfo::info(YU12).unwrap();
        let layout = pack_planes(info, 100, 10, 64).unwrap();
        assert_eq!(layout.planes[0].stride, 128);
        assert_eq!(layout.planes[1].stride, 64);
        assert_eq!(layout.planes[2].offset, 128 * 10 + 64 * 5);
        assert_eq!(layout.pixel_stride, 128);

        let info = FormatInfo::info(RGB3).unwrap();
        assert_eq!(pack_planes(info, 100, 1, 64).unwrap().pixel_stride, 320 / 3);
    }

    #[test]
    fn test_pack_rejects_oversized_rows() {
        let info = FormatInfo::info(YUYV).unwrap();
        assert!(pack_planes(info, 0x7FFF_FFC0, 1, 64).is_none());
        assert!(pack_planes(info, 0x7FFF_FFC0, 2, 1).is_none());

        let info = FormatInfo::info(RGBA).unwrap();
        assert!(pack_planes(info, 0x4000_0001, 1, 64).is_none());
        assert!(pack_planes(info, 8192, 8192, 64).is_some());
    }

    #[test]
    fn test_memfd_service_allocates() {
        let mut service = MemfdService::new();
        let allocation = service
            .allocate(&request(hal::YCBCR_420_888, 640, 480))
            .unwrap();
        let handle = allocation.handle.unwrap();
        assert_eq!(allocation.stride, 640);
        assert_eq!(handle.num_fds(), 1);

        let vendor = VendorHandle::new(&handle).unwrap();
        assert_eq!(vendor.num_planes(), 2);
        assert_eq!(vendor.format(), NV12);
        let end = vendor.offset_of(1).unwrap() + vendor.size_of(1).unwrap();
        assert!(end <= backing_size(handle.fd(0).unwrap()).unwrap());

        let second = service
            .allocate(&request(hal::YCBCR_420_888, 640, 480))
            .unwrap()
            .handle
            .unwrap();
        assert_ne!(VendorHandle::new(&second).unwrap().id(), vendor.id());

        service.free(handle).unwrap();
        service.free(second).unwrap();
    }

    #[test]
    fn test_memfd_service_rejects_bad_requests() {
        let mut service = MemfdService::new();
        assert_eq!(
            service.allocate(&request(0x7777, 64, 64)).unwrap_err(),
            Status::BAD_VALUE
        );
        assert_eq!(
            service.allocate(&request(hal::RGBA_8888, 0, 64)).unwrap_err(),
            Status::BAD_VALUE
        );
        let mut layered = request(hal::RGBA_8888, 64, 64);
        layered.layer_count = 2;
        assert_eq!(service.allocate(&layered).unwrap_err(), Status::BAD_VALUE);
        assert_eq!(
            service
                .allocate(&request(hal::YCBCR_422_I, 0x7FFF_FFC0, 1))
                .unwrap_err(),
            Status::NO_MEMORY
        );
    }

    #[test]
    fn test_memfd_service_custom_alignment() {
        let mut service = MemfdService::new().with_stride_align(256);
        let handle = service
            .allocate(&request(hal::RGB_888, 100, 4))
            .unwrap()
            .handle
            .unwrap();
        let vendor = VendorHandle::new(&handle).unwrap();
        assert_eq!(vendor.stride_of(0), Some(512));
        assert_eq!(vendor.size_of(0), Some(2048));
    }
}
