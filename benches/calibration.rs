use criterion::{Criterion, black_box, criterion_group, criterion_main};
use svisurf::SviParameters;
use svisurf::calibration::{SliceData, SviCalibrator};

fn calibration_benchmarks(c: &mut Criterion) {
    let truth = SviParameters::new(0.04, 0.4, -0.4, 0.0, 0.1).unwrap();
    let x: Vec<f64> = (0..25).map(|i| -0.5 + 0.04 * i as f64).collect();
    let w: Vec<f64> = x.iter().map(|&x| truth.total_variance(x)).collect();
    let data = SliceData::new(x.clone(), w.clone()).unwrap();

    c.bench_function("inner_fit_25_points", |b| {
        b.iter(|| data.fit(black_box(0.01), black_box(0.12)))
    });

    let mut group = c.benchmark_group("svi_slice");
    group.sample_size(10);
    group.bench_function("fit_slice_25_points", |b| {
        let calibrator = SviCalibrator::default();
        b.iter(|| calibrator.fit_slice(black_box(&x), black_box(&w), None, 0).unwrap())
    });
    group.finish();
}

criterion_group!(benches, calibration_benchmarks);
criterion_main!(benches);
