// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Platform buffer handles.
//!
//! A [`NativeHandle`] is what an allocation service hands back: a set of
//! file descriptors plus a block of integers whose meaning belongs to the
//! vendor. [`VendorHandle`] is the only place that block is interpreted.

use crate::format::PixelFormat;
use core::fmt;
use std::{
    io,
    os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd},
    sync::Arc,
};

/// Maximum number of planes a vendor handle can describe.
pub const MAX_PLANES: usize = 4;

/// Tag stored in the first integer of handles carrying plane metadata.
pub const VENDOR_MAGIC: i32 = 0x4546_4742;

const MAGIC: usize = 0;
const ID: usize = 1;
const WIDTH: usize = 2;
const HEIGHT: usize = 3;
const FORMAT: usize = 4;
const NUM_PLANES: usize = 5;
const STRIDES: usize = 6;
const OFFSETS: usize = STRIDES + MAX_PLANES;
const SIZES: usize = OFFSETS + MAX_PLANES;

/// Number of integers in an encoded vendor metadata block.
pub const VENDOR_INTS: usize = SIZES + MAX_PLANES;

/// Returns the size of the memory behind `fd` by seeking to its end.
///
/// The file offset is rewound afterwards. Descriptors duplicated from the
/// same allocation share that offset, so this is not safe to race with
/// another seek on the same buffer.
pub fn backing_size(fd: BorrowedFd<'_>) -> io::Result<u64> {
    let end = unsafe { libc::lseek(fd.as_raw_fd(), 0, libc::SEEK_END) };
    if end < 0 {
        return Err(io::Error::last_os_error());
    }
    _ = unsafe { libc::lseek(fd.as_raw_fd(), 0, libc::SEEK_SET) };
    Ok(end as u64)
}

/// Reference counted file descriptor.
///
/// Built from a duplicate of the platform's descriptor, so it stays valid
/// after the platform handle is released and the underlying buffer lives
/// until the last clone is dropped.
#[derive(Clone, Debug)]
pub struct SharedFd(Arc<OwnedFd>);

impl SharedFd {
    /// Duplicates `fd` into a new shared descriptor.
    pub fn dup(fd: BorrowedFd<'_>) -> io::Result<Self> {
        Ok(Self(Arc::new(fd.try_clone_to_owned()?)))
    }

    pub fn backing_size(&self) -> io::Result<u64> {
        backing_size(self.as_fd())
    }

    /// Duplicates the descriptor into an independently owned one.
    pub fn try_clone_to_owned(&self) -> io::Result<OwnedFd> {
        self.0.try_clone()
    }

    /// True when both refer to the same descriptor, not merely the same
    /// buffer.
    pub fn ptr_eq(&self, other: &SharedFd) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<OwnedFd> for SharedFd {
    fn from(fd: OwnedFd) -> Self {
        Self(Arc::new(fd))
    }
}

impl AsFd for SharedFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl AsRawFd for SharedFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

/// Platform buffer handle: owned descriptors plus opaque integers.
///
/// Dropping the handle closes its descriptors, which is how services
/// release it once the buffer is freed.
#[derive(Default)]
pub struct NativeHandle {
    fds: Vec<OwnedFd>,
    ints: Vec<i32>,
}

impl NativeHandle {
    pub fn new(fds: Vec<OwnedFd>, ints: Vec<i32>) -> Self {
        Self { fds, ints }
    }

    pub fn num_fds(&self) -> usize {
        self.fds.len()
    }

    pub fn num_ints(&self) -> usize {
        self.ints.len()
    }

    pub fn fd(&self, index: usize) -> Option<BorrowedFd<'_>> {
        self.fds.get(index).map(|fd| fd.as_fd())
    }

    pub fn fds(&self) -> impl Iterator<Item = BorrowedFd<'_>> {
        self.fds.iter().map(|fd| fd.as_fd())
    }

    pub fn ints(&self) -> &[i32] {
        &self.ints
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let fds: Vec<RawFd> = self.fds.iter().map(|fd| fd.as_raw_fd()).collect();
        f.debug_struct("NativeHandle")
            .field("fds", &fds)
            .field("num_ints", &self.ints.len())
            .finish()
    }
}

/// Geometry of one plane as laid out by the allocator.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct VendorPlane {
    pub stride: u32,
    pub offset: u32,
    pub size: u32,
}

/// Plane metadata written into a handle by an allocation service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VendorMetadata {
    pub id: u32,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<VendorPlane>,
}

impl VendorMetadata {
    /// Encodes the metadata into the integer block of a handle.
    ///
    /// Planes beyond [`MAX_PLANES`] are not representable and are dropped
    /// from the per-plane arrays; the plane count is written as given.
    pub fn encode(&self) -> Vec<i32> {
        let mut ints = vec![0; VENDOR_INTS];
        ints[MAGIC] = VENDOR_MAGIC;
        ints[ID] = self.id as i32;
        ints[WIDTH] = self.width as i32;
        ints[HEIGHT] = self.height as i32;
        ints[FORMAT] = u32::from(self.format) as i32;
        ints[NUM_PLANES] = self.planes.len() as i32;
        for (i, plane) in self.planes.iter().take(MAX_PLANES).enumerate() {
            ints[STRIDES + i] = plane.stride as i32;
            ints[OFFSETS + i] = plane.offset as i32;
            ints[SIZES + i] = plane.size as i32;
        }
        ints
    }
}

/// Read-only view of the vendor metadata embedded in a [`NativeHandle`].
#[derive(Copy, Clone, Debug)]
pub struct VendorHandle<'a> {
    handle: &'a NativeHandle,
}

impl<'a> VendorHandle<'a> {
    /// Returns `None` if the handle carries no vendor metadata.
    pub fn new(handle: &'a NativeHandle) -> Option<Self> {
        let ints = handle.ints();
        if ints.len() < VENDOR_INTS || ints[MAGIC] != VENDOR_MAGIC {
            return None;
        }
        Some(Self { handle })
    }

    fn int(&self, index: usize) -> u32 {
        self.handle.ints[index] as u32
    }

    fn plane_int(&self, base: usize, plane: usize) -> Option<u32> {
        if plane >= self.num_planes().min(MAX_PLANES) {
            return None;
        }
        Some(self.int(base + plane))
    }

    pub fn id(&self) -> u32 {
        self.int(ID)
    }

    pub fn width(&self) -> u32 {
        self.int(WIDTH)
    }

    pub fn height(&self) -> u32 {
        self.int(HEIGHT)
    }

    pub fn format(&self) -> PixelFormat {
        PixelFormat::from(self.int(FORMAT))
    }

    /// Plane count as reported by the vendor, which may exceed
    /// [`MAX_PLANES`] on a malformed handle.
    pub fn num_planes(&self) -> usize {
        self.int(NUM_PLANES) as usize
    }

    pub fn stride_of(&self, plane: usize) -> Option<u32> {
        self.plane_int(STRIDES, plane)
    }

    pub fn offset_of(&self, plane: usize) -> Option<u64> {
        self.plane_int(OFFSETS, plane).map(u64::from)
    }

    pub fn size_of(&self, plane: usize) -> Option<u64> {
        self.plane_int(SIZES, plane).map(u64::from)
    }

    /// Descriptor backing `plane`.
    ///
    /// A handle with a single descriptor shares it across all planes,
    /// otherwise each plane uses the descriptor at its own index.
    pub fn descriptor_of(&self, plane: usize) -> Option<BorrowedFd<'a>> {
        if plane >= self.num_planes() {
            return None;
        }
        match self.handle.num_fds() {
            1 => self.handle.fd(0),
            _ => self.handle.fd(plane),
        }
    }
}
