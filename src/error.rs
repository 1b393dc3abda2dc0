// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use core::fmt;
use std::io;
use thiserror::Error;

/// Status code reported by a platform allocation service.
///
/// Follows the `status_t` convention: zero is success and failures are
/// negated errno values.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Status(pub i32);

impl Status {
    pub const OK: Status = Status(0);
    pub const NO_MEMORY: Status = Status(-libc::ENOMEM);
    pub const BAD_VALUE: Status = Status(-libc::EINVAL);
    pub const NO_INIT: Status = Status(-libc::ENODEV);
    pub const UNKNOWN_ERROR: Status = Status(i32::MIN);

    pub fn is_ok(self) -> bool {
        self == Status::OK
    }

    /// Maps an OS error onto a status, keeping the errno when there is one.
    pub fn from_io(err: &io::Error) -> Status {
        match err.raw_os_error() {
            Some(errno) => Status(-errno),
            None => Status::UNKNOWN_ERROR,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Status::OK => write!(f, "OK"),
            Status::UNKNOWN_ERROR => write!(f, "UNKNOWN_ERROR"),
            Status(code) if code < 0 => {
                write!(f, "{} ({})", io::Error::from_raw_os_error(-code), code)
            }
            Status(code) => write!(f, "status {}", code),
        }
    }
}

/// Details of a disagreement between a buffer's reported geometry and what
/// the pixel format or the backing memory allows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutMismatch {
    #[error("handle reports {reported} planes but format expects {expected}")]
    PlaneCount { reported: usize, expected: usize },

    #[error("plane {plane} ends at byte {end} past backing size {backing}")]
    Overrun {
        plane: usize,
        end: u64,
        backing: u64,
    },

    #[error("no descriptor for plane {plane}")]
    MissingDescriptor { plane: usize },
}

#[derive(Debug, Error)]
pub enum Error {
    /// Width or height was not positive; nothing was requested from the
    /// platform.
    #[error("invalid buffer size {width}x{height}")]
    InvalidSize { width: i64, height: i64 },

    #[error("unsupported device format code {0:#x}")]
    UnsupportedFormat(i32),

    /// The platform service refused the allocation. Nothing was allocated.
    #[error("buffer allocation failed: {0}")]
    AllocationFailed(Status),

    /// The platform reported success but produced an unusable handle.
    #[error("allocation service returned an invalid buffer handle")]
    InvalidHandle,

    #[error("plane layout mismatch: {0}")]
    PlaneLayoutMismatch(#[from] LayoutMismatch),

    #[error("error freeing framebuffer: {0}")]
    FreeFailed(Status),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(Status::OK.to_string(), "OK");
        assert!(Status::NO_MEMORY.to_string().contains(&(-libc::ENOMEM).to_string()));
        assert_eq!(Status(7).to_string(), "status 7");
    }

    #[test]
    fn test_status_from_io() {
        let err = io::Error::from_raw_os_error(libc::ENOMEM);
        assert_eq!(Status::from_io(&err), Status::NO_MEMORY);
        assert_eq!(Status::from_io(&io::Error::other("x")), Status::UNKNOWN_ERROR);
    }

    #[test]
    fn test_layout_mismatch_converts() {
        let err: Error = LayoutMismatch::PlaneCount {
            reported: 3,
            expected: 2,
        }
        .into();
        assert!(matches!(
            err,
            Error::PlaneLayoutMismatch(LayoutMismatch::PlaneCount {
                reported: 3,
                expected: 2
            })
        ));
        assert_eq!(
            err.to_string(),
            "plane layout mismatch: handle reports 3 planes but format expects 2"
        );
    }
}
