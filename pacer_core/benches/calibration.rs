use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use pacer_core::{
    Calibration, CalibrationMode, PolynomialModel, RegressionSample, fit_best_monotonic,
};

// Belt readings around a mildly curved true speed, with xorshift noise.
fn synth_samples(n: usize, noise_kmh: f64, seed: u32) -> Vec<RegressionSample> {
    let mut state = seed.max(1);
    let mut next_f64 = || {
        let mut x = state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        state = x;
        f64::from(x) / (f64::from(u32::MAX) + 1.0)
    };
    (0..n)
        .map(|i| {
            let raw = 4.0 + 16.0 * i as f64 / n as f64;
            let truth = 0.15 + 0.94 * raw + 0.002 * raw * raw;
            RegressionSample {
                raw_speed: raw,
                reference_speed: truth + (next_f64() * 2.0 - 1.0) * noise_kmh,
                run_id: (i / 500) as u64,
            }
        })
        .collect()
}

fn configure(g: &mut criterion::BenchmarkGroup<'_, criterion::measurement::WallTime>) {
    //   BENCH_SAMPLE_SIZE=10 BENCH_MEAS_MS=50 cargo bench -p pacer_core --bench calibration
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE") {
        if let Ok(n) = ss.parse::<usize>() {
            g.sample_size(n.max(10));
        }
    } else {
        g.sample_size(50);
    }
    if let Ok(ms) = std::env::var("BENCH_MEAS_MS")
        && let Ok(ms_u64) = ms.parse::<u64>()
    {
        g.measurement_time(std::time::Duration::from_millis(ms_u64));
    }
}

pub fn bench_inversion(c: &mut Criterion) {
    let mut g = c.benchmark_group("inversion");
    configure(&mut g);

    let mut cal = Calibration::default();
    cal.mode = CalibrationMode::Polynomial;
    for (name, coeffs, degree) in [
        ("quadratic", [0.2, 0.9, 0.004, 0.0], 2u8),
        ("cubic", [0.1, 0.95, 0.001, 0.0001], 3),
    ] {
        let Ok(model) = PolynomialModel::new(coeffs, degree) else {
            continue;
        };
        cal.polynomial = model;
        let targets: Vec<f64> = (0..200).map(|i| 3.0 + i as f64 * 0.1).collect();
        g.bench_function(name, |b| {
            b.iter(|| {
                for &t in &targets {
                    black_box(cal.adjusted_to_raw(black_box(t)));
                }
            })
        });
    }
    g.finish();
}

pub fn bench_fit(c: &mut Criterion) {
    let mut g = c.benchmark_group("fit_best_monotonic");
    configure(&mut g);

    for &n in &[200usize, 5_000] {
        let samples = synth_samples(n, 0.05, 0xC0FFEE);
        g.bench_function(format!("cubic_{n}"), |b| {
            b.iter_batched(
                || samples.clone(),
                |s| {
                    let fit = fit_best_monotonic(black_box(&s), 3, 20);
                    black_box(fit.is_ok());
                },
                BatchSize::SmallInput,
            )
        });
    }
    g.finish();
}

criterion_group!(calibration, bench_inversion, bench_fit);
criterion_main!(calibration);
