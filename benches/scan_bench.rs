use cloudsync_lib::core::{hash_file, FileScanner, FilterSet};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::fs;

const PATTERNS: [&str; 6] = ["*.tmp", "node_modules/", ".git/", ".DS_Store", "target", "*.sw?"];

fn bench_patterns(c: &mut Criterion) {
    let filter = FilterSet::new(&PATTERNS, &[] as &[&str]);
    let paths = [
        "src/main.rs",
        "web/node_modules/react/index.js",
        "notes/.DS_Store",
        "build/target/debug/app",
        "docs/chapter.md.swp",
    ];

    c.bench_function("filter_should_ignore", |b| {
        b.iter(|| {
            for path in paths {
                black_box(filter.should_ignore(black_box(path), false));
            }
        })
    });
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");

    for files in [100usize, 1000] {
        let dir = tempfile::tempdir().expect("tempdir");
        for i in 0..files {
            let sub = dir.path().join(format!("d{}", i % 10));
            fs::create_dir_all(&sub).expect("mkdir");
            fs::write(sub.join(format!("f{}.txt", i)), vec![b'x'; 4096]).expect("write");
        }

        group.throughput(Throughput::Elements(files as u64));

        let with_hashes = FileScanner::new(FilterSet::empty());
        group.bench_with_input(BenchmarkId::new("hashed", files), &files, |b, _| {
            b.iter(|| with_hashes.scan_blocking(dir.path()).expect("scan"))
        });

        let metadata_only = FileScanner::new(FilterSet::empty()).without_hashes();
        group.bench_with_input(BenchmarkId::new("metadata", files), &files, |b, _| {
            b.iter(|| metadata_only.scan_blocking(dir.path()).expect("scan"))
        });
    }

    group.finish();
}

fn bench_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("md5");
    let dir = tempfile::tempdir().expect("tempdir");

    for size in [64 * 1024usize, 4 * 1024 * 1024] {
        let path = dir.path().join(format!("blob-{}", size));
        fs::write(&path, vec![0u8; size]).expect("write");

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(BenchmarkId::new("hash_file", size), |b| {
            b.iter(|| hash_file(&path).expect("hash"))
        });
    }

    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default();
    targets = bench_patterns, bench_scan, bench_hash
);

criterion_main!(benches);
