// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Portable buffers and the translation from platform handles to planes.

use crate::{
    allocator::Allocator,
    error::{Error, LayoutMismatch, Result},
    format::{FormatInfo, PixelFormat, Size, UsageFlags},
    handle::{NativeHandle, SharedFd, VendorHandle},
};
use core::fmt;
use dma_buf::DmaBuf;
use std::{
    collections::HashMap,
    io, mem,
    os::fd::{AsRawFd, BorrowedFd, RawFd},
};
use tracing::{debug, error};

/// One contiguous memory region of a buffer.
#[derive(Clone, Debug)]
pub struct Plane {
    pub fd: SharedFd,
    /// Byte offset of the plane within `fd`.
    pub offset: u64,
    /// Byte length of the plane.
    pub length: u64,
}

impl Plane {
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Releases a platform handle when dropped.
///
/// Owns the handle exclusively and borrows the allocator that produced it,
/// so the handle is freed exactly once and never after the allocator is
/// gone.
pub struct HandleGuard<'a> {
    allocator: &'a Allocator,
    handle: NativeHandle,
}

impl<'a> HandleGuard<'a> {
    pub(crate) fn new(allocator: &'a Allocator, handle: NativeHandle) -> Self {
        Self {
            allocator,
            handle,
        }
    }

    pub fn handle(&self) -> &NativeHandle {
        &self.handle
    }
}

impl Drop for HandleGuard<'_> {
    fn drop(&mut self) {
        let handle = mem::take(&mut self.handle);
        match self.allocator.free(handle) {
            Ok(()) => debug!("frame buffer freed"),
            Err(e) => error!("{}", e),
        }
    }
}

impl fmt::Debug for HandleGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HandleGuard")
            .field("handle", &self.handle)
            .finish()
    }
}

/// Descriptors of a handle, each duplicated once and measured once.
///
/// Planes that share a platform descriptor share the same [`SharedFd`].
#[derive(Default)]
struct Descriptors {
    shared: HashMap<RawFd, (SharedFd, u64)>,
}

impl Descriptors {
    fn get(&mut self, fd: BorrowedFd<'_>) -> io::Result<(SharedFd, u64)> {
        if let Some((shared, len)) = self.shared.get(&fd.as_raw_fd()) {
            return Ok((shared.clone(), *len));
        }
        let shared = SharedFd::dup(fd)?;
        let len = shared.backing_size()?;
        debug!("fd info fd={} len={}", fd.as_raw_fd(), len);
        self.shared.insert(fd.as_raw_fd(), (shared.clone(), len));
        Ok((shared, len))
    }
}

fn check_bounds(plane: usize, offset: u64, length: u64, backing: u64) -> Result<()> {
    let end = offset.saturating_add(length);
    if end > backing {
        return Err(LayoutMismatch::Overrun {
            plane,
            end,
            backing,
        }
        .into());
    }
    Ok(())
}

/// Planes as reported by the vendor metadata of the handle.
fn vendor_planes(vendor: &VendorHandle<'_>, info: &FormatInfo) -> Result<Vec<Plane>> {
    let expected = info.num_planes();
    let reported = vendor.num_planes();
    if reported != expected {
        return Err(LayoutMismatch::PlaneCount { reported, expected }.into());
    }

    debug!(
        "id={} width={} height={} numPlanes={}",
        vendor.id(),
        vendor.width(),
        vendor.height(),
        reported
    );

    let mut descriptors = Descriptors::default();
    let mut planes = Vec::with_capacity(expected);
    for i in 0..reported {
        let (Some(offset), Some(length)) = (vendor.offset_of(i), vendor.size_of(i)) else {
            return Err(LayoutMismatch::PlaneCount { reported, expected }.into());
        };
        debug!(
            "plane data index={} size={} offset={} stride={}",
            i,
            length,
            offset,
            vendor.stride_of(i).unwrap_or(0)
        );

        let fd = vendor
            .descriptor_of(i)
            .ok_or(LayoutMismatch::MissingDescriptor { plane: i })?;
        let (fd, backing) = descriptors.get(fd)?;
        check_bounds(i, offset, length, backing)?;

        planes.push(Plane { fd, offset, length });
    }
    Ok(planes)
}

/// Planes packed consecutively from the start of the first descriptor,
/// sized by the canonical format model.
fn canonical_planes(handle: &NativeHandle, info: &FormatInfo, size: Size) -> Result<Vec<Plane>> {
    let fd = handle
        .fd(0)
        .ok_or(LayoutMismatch::MissingDescriptor { plane: 0 })?;
    let (fd, backing) = Descriptors::default().get(fd)?;

    let invalid = || Error::InvalidSize {
        width: size.width.into(),
        height: size.height.into(),
    };

    let mut offset = 0u64;
    let mut planes = Vec::with_capacity(info.num_planes());
    for i in 0..info.num_planes() {
        let length = info.plane_size(size, i).ok_or_else(invalid)?;
        check_bounds(i, offset, length, backing)?;
        planes.push(Plane {
            fd: fd.clone(),
            offset,
            length,
        });
        offset = offset.checked_add(length).ok_or_else(invalid)?;
    }
    Ok(planes)
}

/// Resolves the planes of a freshly allocated `handle`.
///
/// Geometry reported by the vendor is authoritative; the canonical layout
/// of `info` is only used for handles that carry no vendor metadata. Either
/// way the plane count matches `info` and no plane extends past the end of
/// its descriptor.
pub fn build_planes(handle: &NativeHandle, info: &FormatInfo, size: Size) -> Result<Vec<Plane>> {
    let planes = match VendorHandle::new(handle) {
        Some(vendor) => vendor_planes(&vendor, info)?,
        None => {
            debug!("handle has no vendor metadata, assuming consecutive planes");
            canonical_planes(handle, info, size)?
        }
    };

    for (i, plane) in planes.iter().enumerate() {
        debug!(
            "planeInfo i={} fd={} offset={} size={}",
            i,
            plane.fd.as_raw_fd(),
            plane.offset,
            plane.length
        );
    }
    Ok(planes)
}

/// Buffer allocated through an [`Allocator`].
///
/// Holds the resolved planes and the guard of the platform handle. The
/// handle is released when the buffer is dropped. Plane descriptors are
/// duplicates, so clones of them stay valid after that.
#[derive(Debug)]
pub struct PortableBuffer<'a> {
    planes: Vec<Plane>,
    guard: HandleGuard<'a>,
    format: PixelFormat,
    info: &'static FormatInfo,
    size: Size,
    stride: u32,
    usage: UsageFlags,
}

impl<'a> PortableBuffer<'a> {
    pub(crate) fn new(
        planes: Vec<Plane>,
        guard: HandleGuard<'a>,
        format: PixelFormat,
        info: &'static FormatInfo,
        size: Size,
        stride: u32,
        usage: UsageFlags,
    ) -> Self {
        Self {
            planes,
            guard,
            format,
            info,
            size,
            stride,
            usage,
        }
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn plane(&self, index: usize) -> Option<&Plane> {
        self.planes.get(index)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn format_info(&self) -> &'static FormatInfo {
        self.info
    }

    pub fn size(&self) -> Size {
        self.size
    }

    /// Row stride of the first plane in pixels, as chosen by the platform.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn usage(&self) -> UsageFlags {
        self.usage
    }

    /// Identifier assigned by the platform, if the handle reports one.
    pub fn id(&self) -> Option<u32> {
        VendorHandle::new(self.guard.handle()).map(|vendor| vendor.id())
    }

    pub fn handle(&self) -> &NativeHandle {
        self.guard.handle()
    }

    /// Sum of all plane lengths.
    pub fn total_length(&self) -> u64 {
        self.planes.iter().map(|plane| plane.length).sum()
    }

    /// DMA buffer over a duplicate of the descriptor of `plane`, for CPU
    /// mapping.
    pub fn dmabuf(&self, plane: usize) -> io::Result<DmaBuf> {
        let plane = self.plane(plane).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("buffer has {} planes", self.planes.len()),
            )
        })?;
        Ok(DmaBuf::from(plane.fd.try_clone_to_owned()?))
    }
}

impl fmt::Display for PortableBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} stride:{}", self.size, self.format, self.stride)?;
        for plane in &self.planes {
            write!(
                f,
                " [fd:{} {}+{}]",
                plane.fd.as_raw_fd(),
                plane.offset,
                plane.length
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        format::{NV12, RGBA, YU12},
        handle::{VendorMetadata, VendorPlane},
        service::memfd,
    };
    use std::os::fd::OwnedFd;

    fn vendor_handle(fds: Vec<OwnedFd>, planes: Vec<VendorPlane>) -> NativeHandle {
        let metadata = VendorMetadata {
            id: 3,
            width: 64,
            height: 32,
            format: NV12,
            planes,
        };
        NativeHandle::new(fds, metadata.encode())
    }

    fn plane(offset: u32, size: u32) -> VendorPlane {
        VendorPlane {
            stride: 64,
            offset,
            size,
        }
    }

    #[test]
    fn test_vendor_layout_is_authoritative() {
        // padding between planes the canonical model cannot predict
        let handle = vendor_handle(
            vec![memfd("test", 8192).unwrap()],
            vec![plane(0, 2048), plane(4096, 1024)],
        );
        let info = FormatInfo::info(NV12).unwrap();
        let planes = build_planes(&handle, info, Size::new(64, 32)).unwrap();

        assert_eq!(planes.len(), 2);
        assert_eq!((planes[0].offset, planes[0].length), (0, 2048));
        assert_eq!((planes[1].offset, planes[1].length), (4096, 1024));
        assert!(planes[0].fd.ptr_eq(&planes[1].fd));
    }

    #[test]
    fn test_vendor_per_plane_descriptors() {
        let handle = vendor_handle(
            vec![memfd("y", 2048).unwrap(), memfd("uv", 1024).unwrap()],
            vec![plane(0, 2048), plane(0, 1024)],
        );
        let info = FormatInfo::info(NV12).unwrap();
        let planes = build_planes(&handle, info, Size::new(64, 32)).unwrap();

        assert!(!planes[0].fd.ptr_eq(&planes[1].fd));
        assert_eq!(planes[1].fd.backing_size().unwrap(), 1024);
    }

    #[test]
    fn test_vendor_plane_count_mismatch() {
        let handle = vendor_handle(
            vec![memfd("test", 8192).unwrap()],
            vec![plane(0, 2048), plane(2048, 512), plane(2560, 512)],
        );
        let info = FormatInfo::info(NV12).unwrap();
        let err = build_planes(&handle, info, Size::new(64, 32)).unwrap_err();
        assert!(matches!(
            err,
            Error::PlaneLayoutMismatch(LayoutMismatch::PlaneCount {
                reported: 3,
                expected: 2
            })
        ));
    }

    #[test]
    fn test_vendor_overrun_not_clamped() {
        let handle = vendor_handle(
            vec![memfd("test", 2560).unwrap()],
            vec![plane(0, 2048), plane(2048, 1024)],
        );
        let info = FormatInfo::info(NV12).unwrap();
        let err = build_planes(&handle, info, Size::new(64, 32)).unwrap_err();
        assert!(matches!(
            err,
            Error::PlaneLayoutMismatch(LayoutMismatch::Overrun {
                plane: 1,
                end: 3072,
                backing: 2560
            })
        ));
    }

    #[test]
    fn test_vendor_missing_descriptor() {
        let handle = vendor_handle(
            vec![memfd("a", 4096).unwrap(), memfd("b", 4096).unwrap()],
            vec![plane(0, 1024), plane(0, 512), plane(0, 512)],
        );
        let info = FormatInfo::info(YU12).unwrap();
        let err = build_planes(&handle, info, Size::new(32, 32)).unwrap_err();
        assert!(matches!(
            err,
            Error::PlaneLayoutMismatch(LayoutMismatch::MissingDescriptor { plane: 2 })
        ));
    }

    #[test]
    fn test_canonical_fallback() {
        let handle = NativeHandle::new(vec![memfd("test", 4096).unwrap()], vec![]);
        let info = FormatInfo::info(NV12).unwrap();
        let planes = build_planes(&handle, info, Size::new(64, 32)).unwrap();

        assert_eq!(planes.len(), 2);
        assert_eq!((planes[0].offset, planes[0].length), (0, 2048));
        assert_eq!((planes[1].offset, planes[1].length), (2048, 1024));
        assert!(planes[0].fd.ptr_eq(&planes[1].fd));
    }

    #[test]
    fn test_canonical_overrun() {
        let handle = NativeHandle::new(vec![memfd("test", 1000).unwrap()], vec![]);
        let info = FormatInfo::info(RGBA).unwrap();
        let err = build_planes(&handle, info, Size::new(16, 16)).unwrap_err();
        assert!(matches!(
            err,
            Error::PlaneLayoutMismatch(LayoutMismatch::Overrun {
                plane: 0,
                end: 1024,
                backing: 1000
            })
        ));
    }

    #[test]
    fn test_canonical_rows_overflow() {
        let handle = NativeHandle::new(vec![memfd("test", 4096).unwrap()], vec![]);
        let info = FormatInfo::info(RGBA).unwrap();
        let err = build_planes(&handle, info, Size::new(0x4000_0001, 1)).unwrap_err();
        assert!(matches!(err, Error::InvalidSize { width: 0x4000_0001, .. }));
    }

    #[test]
    fn test_planes_outlive_handle() {
        let handle = NativeHandle::new(vec![memfd("test", 4096).unwrap()], vec![]);
        let info = FormatInfo::info(RGBA).unwrap();
        let planes = build_planes(&handle, info, Size::new(16, 16)).unwrap();
        drop(handle);
        assert_eq!(planes[0].fd.backing_size().unwrap(), 4096);
    }
}
