// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_framebuffer::{
    format::{Size, UsageFlags},
    HeapType,
};
use std::error::Error;

/// Memory the probe allocates buffers from.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum HeapSetting {
    /// Contiguous DMA heap (/dev/dma_heap/linux,cma)
    Cma,
    /// System DMA heap (/dev/dma_heap/system)
    System,
    /// Anonymous memory files, for hosts without DMA heaps
    Memfd,
}

impl HeapSetting {
    pub fn heap_type(self) -> Option<HeapType> {
        match self {
            HeapSetting::Cma => Some(HeapType::Cma),
            HeapSetting::System => Some(HeapType::System),
            HeapSetting::Memfd => None,
        }
    }
}

fn parse_int(value: &str) -> Result<i64, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid number {value:?}: {e}"))
}

fn parse_format(value: &str) -> Result<i32, String> {
    let code = parse_int(value)?;
    i32::try_from(code).map_err(|_| format!("format code {value} out of range"))
}

fn parse_usage(value: &str) -> Result<UsageFlags, String> {
    let bits = parse_int(value)?;
    Ok(UsageFlags::from_bits_retain(bits as u64))
}

/// Command-line arguments for the frame buffer probe.
///
/// Allocates buffers the way the camera HAL would and prints the resolved
/// plane layout of each one. Arguments can be specified via command line or
/// environment variables.
///
/// # Example
///
/// ```bash
/// # NV12 1080p camera buffer from the CMA heap
/// framebuffer-probe --format 0x23 --size "1920 1080" --usage 0x60000
///
/// # Same layout without DMA heaps
/// HEAP=memfd framebuffer-probe --json
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Device pixel format code (decimal or 0x-prefixed hex)
    #[arg(long, env = "FORMAT", default_value = "0x23", value_parser = parse_format)]
    pub format: i32,

    /// Buffer size in pixels (width height)
    #[arg(
        long,
        env = "SIZE",
        default_value = "1920 1080",
        value_delimiter = ' ',
        num_args = 2,
        allow_negative_numbers = true
    )]
    pub size: Vec<i32>,

    /// Usage flags bitmask (decimal or 0x-prefixed hex)
    #[arg(long, env = "USAGE", default_value = "0x40000", value_parser = parse_usage)]
    pub usage: UsageFlags,

    /// Memory to allocate from
    #[arg(long, env = "HEAP", default_value = "cma", value_enum)]
    pub heap: HeapSetting,

    /// Row alignment in bytes used by the allocation service
    #[arg(long, env = "STRIDE_ALIGN", default_value = "64")]
    pub stride_align: u32,

    /// Number of buffers to hold at the same time
    #[arg(long, env = "COUNT", default_value = "1")]
    pub count: usize,

    /// Print buffer layouts as JSON
    #[arg(long)]
    pub json: bool,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Also send logs to the systemd journal
    #[arg(long, env = "JOURNALD")]
    pub journald: bool,
}

impl Args {
    /// Buffer size requested with `--size`.
    pub fn frame_size(&self) -> Result<Size, Box<dyn Error>> {
        match self.size[..] {
            [width, height] => Ok(Size::try_from((width, height))?),
            _ => Err(format!("expected \"WIDTH HEIGHT\", got {:?}", self.size).into()),
        }
    }
}
