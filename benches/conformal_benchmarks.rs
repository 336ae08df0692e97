use conformal_cms::bootstrap::BootstrapOneSided;
use conformal_cms::calibration::calibrate;
use conformal_cms::scoring::ScoringStrategy;
use conformal_cms::sketch::CountMinSketch;
use conformal_cms::stream::{PitmanYorStream, Stream};
use conformal_cms::{ConformalCms, ConformalConfig, ScorerKind};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;

pub fn conformal_benchmarks(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(2021);
    let mut stream = PitmanYorStream::new(10.0, 0.25);
    let draws: Vec<u64> = (0..50_000).map(|_| stream.sample(&mut rng)).collect();

    c.bench_function("sketch ingest 50k", |b| {
        b.iter(|| {
            let mut sketch = CountMinSketch::new(3, 1000, 42);
            for &x in black_box(&draws) {
                sketch.update(x);
            }
            sketch
        })
    });

    let mut sketch = CountMinSketch::new(3, 1000, 42);
    for &x in &draws {
        sketch.update(x);
    }
    c.bench_function("estimate_count", |b| {
        b.iter(|| {
            (0..500u64)
                .map(|item| sketch.estimate_count(black_box(item)))
                .sum::<u64>()
        })
    });

    c.bench_function("bootstrap noise interval", |b| {
        b.iter(|| {
            let mut scorer = BootstrapOneSided::new(&sketch, 0.1, 1000, 7);
            scorer.predict_interval(black_box(3), 2.0, 0.0).unwrap()
        })
    });

    let scores: Vec<(f64, f64)> = (0..2000).map(|i| ((i % 97) as f64, 0.0)).collect();
    let counts: Vec<f64> = (0..2000).map(|i| (i % 311) as f64).collect();
    c.bench_function("calibrate 2000 points", |b| {
        b.iter(|| calibrate(black_box(&scores), black_box(&counts), 5, 0.9, false).unwrap())
    });

    c.bench_function("classical end-to-end run", |b| {
        b.iter(|| {
            let cfg = ConformalConfig::default()
                .set_width(256)
                .set_n_track(500)
                .set_scorer(ScorerKind::Classical);
            let mut cms = ConformalCms::new(cfg, PitmanYorStream::new(10.0, 0.25)).unwrap();
            cms.run(3000, 200, false, false).unwrap()
        })
    });
}

criterion_group!(benches, conformal_benchmarks);
criterion_main!(benches);
