// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # EdgeFirst Frame Buffer Allocator
//!
//! This library allocates multi-planar frame buffers from a platform
//! allocation service and describes their memory layout in a portable way:
//! one file descriptor, byte offset and byte length per plane, ready for
//! zero-copy use by camera and video pipelines.
//!
//! ## Features
//!
//! - **Platform Services**: Buffers come from an [`AllocationService`]. DMA
//!   heap ([`DmaHeapService`]) and memfd ([`MemfdService`]) services are
//!   included; other platforms plug in through the trait.
//! - **Plane Layout**: Per-plane geometry reported by the platform is used
//!   as is and validated against the pixel format and the size of the
//!   backing memory. Handles without such metadata fall back to the
//!   canonical layout of the format.
//! - **Handle Lifetime**: Every [`PortableBuffer`] releases its platform
//!   handle exactly once when dropped, and cannot outlive its [`Allocator`].
//!
//! ## Example
//!
//! ```no_run
//! use edgefirst_framebuffer::{
//!     format::{hal, Size, UsageFlags},
//!     Allocator, DmaHeapService, HeapType,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let allocator = Allocator::new(DmaHeapService::new(HeapType::Cma));
//! let buffer = allocator.allocate(
//!     hal::YCBCR_420_888,
//!     Size::new(1920, 1080),
//!     UsageFlags::CAMERA_WRITE,
//! )?;
//!
//! // NV12: luma plane followed by interleaved chroma
//! assert_eq!(buffer.planes().len(), 2);
//! println!("{}", buffer);
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Requirements
//!
//! - **Linux**: DMA heap support (`/dev/dma_heap/*`) for [`DmaHeapService`];
//!   `memfd_create` for [`MemfdService`].
//!
//! ## Safety
//!
//! `unsafe` is limited to the `libc` calls on file descriptors.

pub mod allocator;
pub mod buffer;
pub mod error;
pub mod format;
pub mod handle;
pub mod service;

pub use allocator::Allocator;
pub use buffer::{HandleGuard, Plane, PortableBuffer};
pub use error::{Error, LayoutMismatch, Result, Status};
pub use service::{AllocationService, DmaHeapService, HeapType, MemfdService};
