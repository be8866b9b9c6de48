use criterion::{Criterion, black_box, criterion_group, criterion_main};
use svisurf::OptionType;
use svisurf::implied::{BlackImpliedVol, black_price};

fn implied_vol_benchmarks(c: &mut Criterion) {
    let solver = BlackImpliedVol::default();
    let quotes: Vec<(f64, OptionType, f64)> = (0..41)
        .map(|i| {
            let k = 60.0 + 2.0 * i as f64;
            let kind = OptionType::otm_for(k, 100.0);
            let vol = 0.2 + 0.002 * (k - 100.0).abs();
            (k, kind, black_price(100.0, k, vol, 0.5, kind).unwrap())
        })
        .collect();

    c.bench_function("black_price_atm", |b| {
        b.iter(|| black_price(black_box(100.0), black_box(100.0), 0.2, 0.5, OptionType::Call))
    });

    c.bench_function("implied_vol_smile_41_strikes", |b| {
        b.iter(|| {
            for &(k, kind, price) in &quotes {
                black_box(solver.solve(black_box(price), 100.0, k, 0.5, kind).unwrap());
            }
        })
    });
}

criterion_group!(benches, implied_vol_benchmarks);
criterion_main!(benches);
