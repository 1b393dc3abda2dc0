// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Pixel formats, their canonical plane geometry and the lookup from
//! device-facing format codes.

use crate::error::{Error, Result};
use bitflags::bitflags;
use core::fmt;
use std::collections::HashMap;

/// Four character code identifying a pixel format.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PixelFormat(pub [u8; 4]);

/// RGB 24-bit pixel format (8 bits per channel, no alpha)
pub const RGB3: PixelFormat = PixelFormat(*b"RGB3");

/// BGR 24-bit pixel format (8 bits per channel, no alpha)
pub const BGR3: PixelFormat = PixelFormat(*b"BGR3");

/// RGBX 32-bit pixel format (8 bits per channel, unused alpha)
pub const RGBX: PixelFormat = PixelFormat(*b"RGBX");

/// RGBA 32-bit pixel format (8 bits per channel, with alpha)
pub const RGBA: PixelFormat = PixelFormat(*b"RGBA");

/// YUYV 4:2:2 YUV packed format (common camera output format)
pub const YUYV: PixelFormat = PixelFormat(*b"YUYV");

/// UYVY 4:2:2 YUV packed format
pub const UYVY: PixelFormat = PixelFormat(*b"UYVY");

/// NV12 4:2:0 YUV semi-planar format (efficient for video encoding)
pub const NV12: PixelFormat = PixelFormat(*b"NV12");

/// NV21 4:2:0 YUV semi-planar format with swapped chroma order
pub const NV21: PixelFormat = PixelFormat(*b"NV21");

/// NV16 4:2:2 YUV semi-planar format
pub const NV16: PixelFormat = PixelFormat(*b"NV16");

/// YUV 4:2:0 fully planar format (I420)
pub const YU12: PixelFormat = PixelFormat(*b"YU12");

/// YVU 4:2:0 fully planar format (YV12)
pub const YV12: PixelFormat = PixelFormat(*b"YV12");

/// Compressed JPEG stream, allocated as an opaque byte blob
pub const MJPG: PixelFormat = PixelFormat(*b"MJPG");

impl PixelFormat {
    pub fn info(&self) -> Option<&'static FormatInfo> {
        FormatInfo::info(*self)
    }
}

impl From<PixelFormat> for u32 {
    fn from(format: PixelFormat) -> Self {
        u32::from_le_bytes(format.0)
    }
}

impl From<u32> for PixelFormat {
    fn from(value: u32) -> Self {
        PixelFormat(value.to_le_bytes())
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for c in self.0 {
            if c.is_ascii_graphic() {
                write!(f, "{}", c as char)?;
            } else {
                write!(f, "\\x{:02x}", c)?;
            }
        }
        Ok(())
    }
}

/// Buffer dimensions in pixels.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Size { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Builds a size from signed dimensions, rejecting anything not positive.
impl TryFrom<(i32, i32)> for Size {
    type Error = Error;

    fn try_from((width, height): (i32, i32)) -> Result<Self> {
        if width <= 0 || height <= 0 {
            return Err(Error::InvalidSize {
                width: width.into(),
                height: height.into(),
            });
        }
        Ok(Size::new(width as u32, height as u32))
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

bitflags! {
    /// Intended consumers of a buffer. Passed through to the allocation
    /// service untouched, unknown bits included.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct UsageFlags: u64 {
        const CPU_READ_RARELY = 0x2;
        const CPU_READ_OFTEN = 0x3;
        const CPU_WRITE_RARELY = 0x20;
        const CPU_WRITE_OFTEN = 0x30;
        const GPU_TEXTURE = 0x100;
        const GPU_RENDER_TARGET = 0x200;
        const COMPOSER_OVERLAY = 0x800;
        const VIDEO_ENCODER = 0x10000;
        const CAMERA_WRITE = 0x20000;
        const CAMERA_READ = 0x40000;

        const _ = !0;
    }
}

/// Geometry of one plane relative to the pixel group of its format.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PlaneInfo {
    /// Bytes used by one pixel group in this plane.
    pub bytes_per_group: u32,
    /// Rows of the image covered by one row of this plane.
    pub vertical_sub_sampling: u32,
}

const fn plane(bytes_per_group: u32, vertical_sub_sampling: u32) -> PlaneInfo {
    PlaneInfo {
        bytes_per_group,
        vertical_sub_sampling,
    }
}

/// Canonical memory layout of a pixel format.
///
/// Sizes computed here assume tightly packed rows and consecutive planes.
/// Allocators are free to pad rows or place planes elsewhere, so the
/// geometry reported by the allocator takes precedence when available.
#[derive(Debug, PartialEq, Eq)]
pub struct FormatInfo {
    pub name: &'static str,
    pub format: PixelFormat,
    /// Number of horizontally adjacent pixels sharing one group.
    pub pixels_per_group: u32,
    planes: &'static [PlaneInfo],
}

static FORMATS: [FormatInfo; 12] = [
    FormatInfo {
        name: "NV12",
        format: NV12,
        pixels_per_group: 2,
        planes: &[plane(2, 1), plane(2, 2)],
    },
    FormatInfo {
        name: "NV21",
        format: NV21,
        pixels_per_group: 2,
        planes: &[plane(2, 1), plane(2, 2)],
    },
    FormatInfo {
        name: "NV16",
        format: NV16,
        pixels_per_group: 2,
        planes: &[plane(2, 1), plane(2, 1)],
    },
    FormatInfo {
        name: "YUV420",
        format: YU12,
        pixels_per_group: 2,
        planes: &[plane(2, 1), plane(1, 2), plane(1, 2)],
    },
    FormatInfo {
        name: "YVU420",
        format: YV12,
        pixels_per_group: 2,
        planes: &[plane(2, 1), plane(1, 2), plane(1, 2)],
    },
    FormatInfo {
        name: "YUYV",
        format: YUYV,
        pixels_per_group: 2,
        planes: &[plane(4, 1)],
    },
    FormatInfo {
        name: "UYVY",
        format: UYVY,
        pixels_per_group: 2,
        planes: &[plane(4, 1)],
    },
    FormatInfo {
        name: "RGB888",
        format: RGB3,
        pixels_per_group: 1,
        planes: &[plane(3, 1)],
    },
    FormatInfo {
        name: "BGR888",
        format: BGR3,
        pixels_per_group: 1,
        planes: &[plane(3, 1)],
    },
    FormatInfo {
        name: "ABGR8888",
        format: RGBA,
        pixels_per_group: 1,
        planes: &[plane(4, 1)],
    },
    FormatInfo {
        name: "XBGR8888",
        format: RGBX,
        pixels_per_group: 1,
        planes: &[plane(4, 1)],
    },
    FormatInfo {
        name: "MJPEG",
        format: MJPG,
        pixels_per_group: 1,
        planes: &[plane(1, 1)],
    },
];

fn align_up(value: u64, align: u64) -> Option<u64> {
    value.div_ceil(align).checked_mul(align)
}

impl FormatInfo {
    /// Looks up the canonical description of `format`.
    pub fn info(format: PixelFormat) -> Option<&'static FormatInfo> {
        FORMATS.iter().find(|info| info.format == format)
    }

    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    pub fn planes(&self) -> &'static [PlaneInfo] {
        self.planes
    }

    /// Bytes per row of `plane` for an image `width` pixels wide, rounded
    /// up to a multiple of `align` bytes.
    ///
    /// Returns `None` for an unknown plane or a row that does not fit in
    /// `u32`.
    pub fn stride(&self, width: u32, plane: usize, align: u32) -> Option<u32> {
        let info = self.planes.get(plane)?;
        let groups = u64::from(width).div_ceil(u64::from(self.pixels_per_group));
        let stride = groups.checked_mul(u64::from(info.bytes_per_group))?;
        let stride = align_up(stride, u64::from(align.max(1)))?;
        u32::try_from(stride).ok()
    }

    /// Rows of `plane` for an image `height` pixels tall.
    pub fn plane_height(&self, height: u32, plane: usize) -> u32 {
        match self.planes.get(plane) {
            Some(info) => height.div_ceil(info.vertical_sub_sampling),
            None => 0,
        }
    }

    /// Bytes occupied by `plane` when rows are `stride` bytes apart.
    pub fn plane_size_with_stride(&self, height: u32, plane: usize, stride: u32) -> u64 {
        u64::from(stride) * u64::from(self.plane_height(height, plane))
    }

    /// Bytes occupied by `plane` with tightly packed rows, or `None` when
    /// the plane does not exist or its rows overflow.
    pub fn plane_size(&self, size: Size, plane: usize) -> Option<u64> {
        let stride = self.stride(size.width, plane, 1)?;
        Some(self.plane_size_with_stride(size.height, plane, stride))
    }

    /// Bytes occupied by all planes with tightly packed rows.
    pub fn frame_size(&self, size: Size) -> Option<u64> {
        (0..self.num_planes()).try_fold(0u64, |total, plane| {
            total.checked_add(self.plane_size(size, plane)?)
        })
    }
}

impl fmt::Display for FormatInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Android HAL pixel format codes as handed to the camera HAL.
pub mod hal {
    pub const RGBA_8888: i32 = 0x1;
    pub const RGBX_8888: i32 = 0x2;
    pub const RGB_888: i32 = 0x3;
    pub const YCBCR_422_SP: i32 = 0x10;
    pub const YCRCB_420_SP: i32 = 0x11;
    pub const YCBCR_422_I: i32 = 0x14;
    pub const BLOB: i32 = 0x21;
    pub const IMPLEMENTATION_DEFINED: i32 = 0x22;
    pub const YCBCR_420_888: i32 = 0x23;
    pub const YV12: i32 = 0x3231_5659;
}

/// Translates device-facing format codes into pixel formats.
pub trait FormatResolver: Send + Sync {
    fn to_pixel_format(&self, code: i32) -> Option<PixelFormat>;

    /// Resolves `code` and its canonical layout in one step.
    fn resolve(&self, code: i32) -> Result<(PixelFormat, &'static FormatInfo)> {
        let format = self
            .to_pixel_format(code)
            .ok_or(Error::UnsupportedFormat(code))?;
        let info = FormatInfo::info(format).ok_or(Error::UnsupportedFormat(code))?;
        Ok((format, info))
    }
}

/// Resolver for Android HAL format codes.
///
/// The flexible YUV and implementation defined codes resolve to NV12, which
/// is what camera pipelines on this platform produce. Individual codes can
/// be remapped with [`HalFormatResolver::with_mapping`].
#[derive(Debug, Clone)]
pub struct HalFormatResolver {
    mappings: HashMap<i32, PixelFormat>,
}

impl Default for HalFormatResolver {
    fn default() -> Self {
        let mappings = HashMap::from([
            (hal::RGBA_8888, RGBA),
            (hal::RGBX_8888, RGBX),
            (hal::RGB_888, RGB3),
            (hal::YCBCR_422_SP, NV16),
            (hal::YCRCB_420_SP, NV21),
            (hal::YCBCR_422_I, YUYV),
            (hal::BLOB, MJPG),
            (hal::IMPLEMENTATION_DEFINED, NV12),
            (hal::YCBCR_420_888, NV12),
            (hal::YV12, YV12),
        ]);
        Self { mappings }
    }
}

impl HalFormatResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mapping(mut self, code: i32, format: PixelFormat) -> Self {
        self.mappings.insert(code, format);
        self
    }
}

impl FormatResolver for HalFormatResolver {
    fn to_pixel_format(&self, code: i32) -> Option<PixelFormat> {
        self.mappings.get(&code).copied()
    }
}
