use criterion::{black_box, criterion_group, criterion_main, Criterion};

use adaptest_core::estimator::{estimate, EstimatorConfig};
use adaptest_core::model::{Attempt, EstimationMethod, ItemParams};

fn history(len: usize) -> Vec<Attempt> {
    (0..len)
        .map(|k| Attempt {
            item: ItemParams::new(
                format!("i{k}"),
                1.0 + 0.05 * k as f64,
                -2.0 + 4.0 * k as f64 / len as f64,
                0.15,
            ),
            correct: k % 3 != 0,
        })
        .collect()
}

fn bench_estimators(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate");
    let config = EstimatorConfig::default();

    for len in [5, 20, 50] {
        let attempts = history(len);
        for method in [EstimationMethod::Mle, EstimationMethod::Map, EstimationMethod::Eap] {
            group.bench_function(format!("{method}/{len}"), |b| {
                b.iter(|| estimate(black_box(method), black_box(&attempts), 0.0, &config))
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_estimators);
criterion_main!(benches);
