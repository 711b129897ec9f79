use criterion::{criterion_group, criterion_main, Criterion};
use mosaic_features::{BorderPolicy, BorderedImage, Extractor, GaussianKernel};

fn load_image() -> BorderedImage {
    let (width, height) = (320, 240);
    let data = (0..width * height)
        .map(|i| {
            let x = (i % width) as f64;
            let y = (i / width) as f64;
            0.5 + 0.25 * (0.11 * x).sin() * (0.07 * y).cos() + 0.2 * (0.02 * x * y).sin()
        })
        .collect();
    BorderedImage::from_raw(width, height, data, BorderPolicy::Mirror).unwrap()
}

fn extract(c: &mut Criterion) {
    let image = load_image();
    let extractor = Extractor::default();
    c.bench_function("extract", |b| b.iter(|| extractor.extract(&image)));
}

criterion_group!(
    name = mosaic;
    config = Criterion::default().sample_size(10);
    targets = extract
);

fn bench_horizontal_filter(c: &mut Criterion) {
    let image = load_image();
    let small_kernel = GaussianKernel::from_sigma(1.0).kernel_1d();
    c.bench_function("horizontal_filter_small_kernel", |b| {
        b.iter(|| mosaic_features::horizontal_filter(&image, &small_kernel))
    });
    let large_kernel = GaussianKernel::from_sigma(10.0).kernel_1d();
    c.bench_function("horizontal_filter_large_kernel", |b| {
        b.iter(|| mosaic_features::horizontal_filter(&image, &large_kernel))
    });
}

fn bench_vertical_filter(c: &mut Criterion) {
    let image = load_image();
    let small_kernel = GaussianKernel::from_sigma(1.0).kernel_1d();
    c.bench_function("vertical_filter_small_kernel", |b| {
        b.iter(|| mosaic_features::vertical_filter(&image, &small_kernel))
    });
    let large_kernel = GaussianKernel::from_sigma(10.0).kernel_1d();
    c.bench_function("vertical_filter_large_kernel", |b| {
        b.iter(|| mosaic_features::vertical_filter(&image, &large_kernel))
    });
}

criterion_group!(
    name = mosaic_image;
    config = Criterion::default().sample_size(10);
    targets = bench_horizontal_filter, bench_vertical_filter
);

criterion_main!(mosaic, mosaic_image);
