//! Benchmarks for the cache engine's three tiers.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use strata_cache::{
    Codec, CompressedCodec, CompressionAlgorithm, DiskConfig, DiskSetOptions, DiskTier,
    HybridConfig, HybridSetOptions, HybridTier, JsonCodec, MemoryConfig, MemoryTier, SetOptions,
};

fn bench_memory_tier(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_tier");

    let tier: MemoryTier<String, Vec<u8>> = MemoryTier::new(MemoryConfig::default());
    let data = vec![0u8; 1024];

    for i in 0..1000 {
        tier.set(
            format!("key-{i}"),
            data.clone(),
            SetOptions {
                size_bytes: 1024,
                ..Default::default()
            },
        )
        .unwrap();
    }

    group.throughput(Throughput::Elements(1));

    group.bench_function("get_hit", |b| {
        b.iter(|| {
            black_box(tier.get(&"key-500".to_string()));
        });
    });

    group.bench_function("get_miss", |b| {
        b.iter(|| {
            black_box(tier.get(&"nonexistent-key".to_string()));
        });
    });

    group.bench_function("set", |b| {
        let mut i = 2000usize;
        b.iter(|| {
            tier.set(
                format!("bench-key-{i}"),
                data.clone(),
                SetOptions {
                    size_bytes: 1024,
                    ..Default::default()
                },
            )
            .unwrap();
            i += 1;
        });
    });

    group.bench_function("contains", |b| {
        b.iter(|| {
            black_box(tier.contains(&"key-500".to_string()));
        });
    });

    group.finish();
}

fn bench_disk_tier(c: &mut Criterion) {
    let mut group = c.benchmark_group("disk_tier");
    group.sample_size(50); // reduce sample size due to disk I/O

    let dir = tempfile::tempdir().unwrap();
    let config = DiskConfig::new(dir.path().join("cache"));
    let tier: DiskTier<String, Vec<u8>, JsonCodec<Vec<u8>>> =
        DiskTier::open(config, JsonCodec::new()).unwrap();

    let data = vec![0u8; 4096];
    for i in 0..100 {
        let mut d = data.clone();
        d[0] = i as u8;
        tier.set(&format!("key-{i}"), &d, DiskSetOptions::default())
            .unwrap();
    }

    group.throughput(Throughput::Elements(1));

    group.bench_function("get_hit", |b| {
        b.iter(|| {
            black_box(tier.get(&"key-50".to_string()).unwrap());
        });
    });

    group.bench_function("contains", |b| {
        b.iter(|| {
            black_box(tier.contains(&"key-50".to_string()));
        });
    });

    group.bench_function("contains_miss", |b| {
        b.iter(|| {
            black_box(tier.contains(&"not-in-cache".to_string()));
        });
    });

    group.bench_function("set_small", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let d = format!("small data {i}").into_bytes();
            tier.set(&format!("small-{i}"), &d, DiskSetOptions::default())
                .unwrap();
            i += 1;
        });
    });

    group.finish();
}

fn bench_hybrid_tier(c: &mut Criterion) {
    let mut group = c.benchmark_group("hybrid_tier");
    group.sample_size(50);

    let dir = tempfile::tempdir().unwrap();
    let disk_config = DiskConfig::new(dir.path().join("cache"));
    let disk = DiskTier::open(disk_config, JsonCodec::<Vec<u8>>::new()).unwrap();
    let tier: HybridTier<String, Vec<u8>, JsonCodec<Vec<u8>>> =
        HybridTier::new(HybridConfig::default(), disk);

    let data = vec![0u8; 4096];
    for i in 0..100 {
        let mut d = data.clone();
        d[0] = i as u8;
        tier.set(
            format!("key-{i}"),
            d,
            HybridSetOptions {
                size_bytes: 4096,
                ..Default::default()
            },
        )
        .unwrap();
    }

    group.throughput(Throughput::Elements(1));

    group.bench_function("get_memory_hit", |b| {
        b.iter(|| {
            black_box(tier.get(&"key-50".to_string()).unwrap());
        });
    });

    group.bench_function("get_disk_hit_with_promotion", |b| {
        b.iter(|| {
            tier.clear_memory();
            black_box(tier.get(&"key-50".to_string()).unwrap());
        });
    });

    group.bench_function("set", |b| {
        let mut i = 1000usize;
        b.iter(|| {
            tier.set(
                format!("bench-key-{i}"),
                data.clone(),
                HybridSetOptions {
                    size_bytes: 4096,
                    ..Default::default()
                },
            )
            .unwrap();
            i += 1;
        });
    });

    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    let sizes = [1024, 10240, 102400];

    for size in sizes {
        let compressible = vec![0xABu8; size];
        let mut less_compressible = vec![0u8; size];
        for (i, b) in less_compressible.iter_mut().enumerate() {
            *b = (i * 37 + i / 256) as u8;
        }

        let codec = CompressedCodec::new(JsonCodec::<Vec<u8>>::new(), CompressionAlgorithm::Zstd, 3);

        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(
            BenchmarkId::new("encode_high_compressibility", size),
            &compressible,
            |b, data| {
                b.iter(|| {
                    black_box(codec.encode(data).unwrap());
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("encode_low_compressibility", size),
            &less_compressible,
            |b, data| {
                b.iter(|| {
                    black_box(codec.encode(data).unwrap());
                });
            },
        );

        let encoded = codec.encode(&compressible).unwrap();
        group.bench_with_input(BenchmarkId::new("decode", size), &encoded, |b, data| {
            b.iter(|| {
                black_box(codec.decode(data).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_memory_tier,
    bench_disk_tier,
    bench_hybrid_tier,
    bench_codec,
);
criterion_main!(benches);
