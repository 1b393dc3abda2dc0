// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use args::Args;
use clap::Parser;
use edgefirst_framebuffer::{Allocator, DmaHeapService, MemfdService, PortableBuffer};
use serde_json::json;
use std::{error::Error, os::fd::AsRawFd, time::Instant};
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, layer::SubscriberExt, Layer};

mod args;

fn init_logging(args: &Args) -> Result<(), Box<dyn Error>> {
    tracing_log::LogTracer::init()?;

    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let stdout = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(level);

    let journald = if args.journald {
        match tracing_journald::layer() {
            Ok(layer) => Some(layer.with_filter(level)),
            Err(e) => {
                eprintln!("journald logging unavailable: {e}");
                None
            }
        }
    } else {
        None
    };

    let subscriber = tracing_subscriber::registry().with(stdout).with(journald);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn describe(buffer: &PortableBuffer<'_>) -> serde_json::Value {
    let planes: Vec<_> = buffer
        .planes()
        .iter()
        .map(|plane| {
            json!({
                "fd": plane.fd.as_raw_fd(),
                "offset": plane.offset,
                "length": plane.length,
            })
        })
        .collect();
    json!({
        "id": buffer.id(),
        "format": buffer.format().to_string(),
        "width": buffer.size().width,
        "height": buffer.size().height,
        "stride": buffer.stride(),
        "usage": buffer.usage().bits(),
        "planes": planes,
    })
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(&args)?;

    let size = args.frame_size()?;
    let allocator = match args.heap.heap_type() {
        Some(heap) => {
            Allocator::new(DmaHeapService::new(heap).with_stride_align(args.stride_align))
        }
        None => Allocator::new(MemfdService::new().with_stride_align(args.stride_align)),
    };

    let (_, info) = allocator.resolver().resolve(args.format)?;
    info!(
        "allocating {} {} {} buffers from {:?}",
        args.count, size, info, args.heap
    );

    let mut buffers = Vec::with_capacity(args.count);
    for _ in 0..args.count {
        let now = Instant::now();
        let buffer = allocator.allocate(args.format, size, args.usage)?;
        let elapsed = now.elapsed();

        if args.json {
            println!("{}", describe(&buffer));
        } else {
            println!(
                "{} total: {} elapsed: {:.2?}",
                buffer,
                buffer.total_length(),
                elapsed
            );
        }
        buffers.push(buffer);
    }

    info!("releasing {} buffers", buffers.len());
    Ok(())
}
