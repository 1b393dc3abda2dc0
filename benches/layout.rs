use criterion::{criterion_group, criterion_main, Criterion};
use edgefirst_framebuffer::{
    buffer::build_planes,
    format::{hal, FormatResolver, HalFormatResolver, Size, UsageFlags},
    handle::NativeHandle,
    service::{AllocationRequest, AllocationService},
    Allocator, MemfdService,
};

const DIMS: [(u32, u32); 5] = [
    (320, 240),
    (640, 480),
    (960, 540),
    (1920, 1080),
    (3840, 2160),
];

pub fn benchmark_allocate(c: &mut Criterion) {
    let allocator = Allocator::new(MemfdService::new());
    let fmts = [
        ("NV12", hal::YCBCR_420_888),
        ("YUYV", hal::YCBCR_422_I),
        ("RGBA", hal::RGBA_8888),
    ];

    for (name, code) in fmts.iter() {
        let mut group = c.benchmark_group(format!("allocate/{}", name));
        for dim in DIMS.iter() {
            let size = Size::new(dim.0, dim.1);
            group.bench_with_input(format!("{}x{}", dim.0, dim.1), &size, |b, size| {
                b.iter(|| allocator.allocate(*code, *size, UsageFlags::CAMERA_READ).unwrap())
            });
        }
    }
}

pub fn benchmark_build_planes(c: &mut Criterion) {
    let mut service = MemfdService::new();
    let (_, info) = HalFormatResolver::new()
        .resolve(hal::YCBCR_420_888)
        .unwrap();

    let mut group = c.benchmark_group("build_planes/NV12");
    for dim in DIMS.iter() {
        let request = AllocationRequest {
            width: dim.0,
            height: dim.1,
            format: hal::YCBCR_420_888,
            layer_count: 1,
            usage: UsageFlags::CAMERA_READ,
            requestor: "bench",
        };
        let handle: NativeHandle = service.allocate(&request).unwrap().handle.unwrap();
        let size = Size::new(dim.0, dim.1);
        group.bench_with_input(format!("{}x{}", dim.0, dim.1), &handle, |b, handle| {
            b.iter(|| build_planes(handle, info, size).unwrap())
        });
    }
}

criterion_group!(benches, benchmark_allocate, benchmark_build_planes);
criterion_main!(benches);
