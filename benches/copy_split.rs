use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use residalloc::{
    compute_2d_texture_copy_subresource, compute_copy_regions, BufferTextureCopy, CopyDirection, Extent3D,
    NativeHandle, Origin3D, TexelBlockInfo, TextureDimension,
};

fn copy(dimension: TextureDimension, offset: u64, bytes_per_row: u32, size: Extent3D) -> BufferTextureCopy {
    BufferTextureCopy {
        direction: CopyDirection::BufferToTexture,
        buffer: NativeHandle(1),
        offset,
        bytes_per_row,
        rows_per_image: size.height,
        texture: NativeHandle(2),
        dimension,
        block: TexelBlockInfo::uncompressed(4),
        origin: Origin3D::default(),
        copy_size: size,
    }
}

fn bench_single_subresource(c: &mut Criterion) {
    let mut group = c.benchmark_group("copy_split_2d");
    let block = TexelBlockInfo::uncompressed(4);

    for offset in [0u64, 300, 768] {
        group.bench_with_input(BenchmarkId::new("offset", offset), &offset, |b, &offset| {
            b.iter(|| {
                black_box(compute_2d_texture_copy_subresource(
                    Origin3D::default(),
                    Extent3D::new(64, 64, 1),
                    &block,
                    black_box(offset),
                    256,
                ))
            });
        });
    }

    group.finish();
}

fn bench_copy_regions(c: &mut Criterion) {
    let mut group = c.benchmark_group("copy_regions");

    group.bench_function("array_16_layers", |b| {
        let copy = copy(TextureDimension::D2, 300, 256, Extent3D::new(64, 31, 16));
        b.iter(|| black_box(compute_copy_regions(black_box(&copy))));
    });

    group.bench_function("volume_odd_height", |b| {
        let copy = copy(TextureDimension::D3, 256, 256, Extent3D::new(64, 5, 8));
        b.iter(|| black_box(compute_copy_regions(black_box(&copy))));
    });

    group.bench_function("volume_even_height", |b| {
        let copy = copy(TextureDimension::D3, 256, 256, Extent3D::new(64, 4, 8));
        b.iter(|| black_box(compute_copy_regions(black_box(&copy))));
    });

    group.finish();
}

criterion_group!(benches, bench_single_subresource, bench_copy_regions);
criterion_main!(benches);
