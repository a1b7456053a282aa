//! Benchmarks for batch and real-time decoding

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array2;

use rootstar_place_native::{
    simulate_session, spike_count_matrix, BayesianDecoder, DecoderConfig, FieldConfig, PlaceFieldBuilder,
    RealtimeDecoder, SimulationConfig,
};

/// Fit a decoder on a synthetic session and return it with its count matrix
fn fitted(n_cells: usize) -> (BayesianDecoder, Array2<u32>) {
    let sim = simulate_session(&SimulationConfig {
        duration_s: 300.0,
        n_place_cells: n_cells,
        noise_rate: None,
        ..SimulationConfig::default()
    })
    .expect("simulate");
    let builder = PlaceFieldBuilder::new(sim.trajectory.clone(), FieldConfig::default()).expect("builder");
    let mut decoder = BayesianDecoder::new(DecoderConfig::default());
    decoder.fit(&builder, &sim.spikes, (0.0, 200.0), 5.0).expect("fit");
    let ts: Vec<f64> = sim.trajectory.ts().iter().step_by(5).copied().collect();
    let counts = spike_count_matrix(&sim.spikes, 0.5, &ts).expect("counts");
    (decoder, counts.counts)
}

fn bench_predict(c: &mut Criterion) {
    let mut group = c.benchmark_group("predict_batch");

    for cells in [20, 60].iter() {
        let (decoder, counts) = fitted(*cells);
        let rows = counts.slice(ndarray::s![..256, ..]).to_owned();
        group.bench_with_input(BenchmarkId::from_parameter(cells), cells, |b, _| {
            b.iter(|| black_box(decoder.predict(black_box(rows.view())).expect("predict")));
        });
    }

    group.finish();
}

fn bench_predict_rt(c: &mut Criterion) {
    let mut group = c.benchmark_group("predict_rt");

    for cells in [20, 60].iter() {
        let (decoder, counts) = fitted(*cells);
        let window = counts.slice(ndarray::s![100..105, ..]).to_owned();
        group.bench_with_input(BenchmarkId::from_parameter(cells), cells, |b, _| {
            b.iter(|| black_box(decoder.predict_rt(black_box(window.view())).expect("predict_rt")));
        });
    }

    group.finish();
}

fn bench_realtime_stream(c: &mut Criterion) {
    let (decoder, counts) = fitted(40);
    let bins: Vec<Vec<u32>> = counts.outer_iter().take(200).map(|r| r.to_vec()).collect();

    c.bench_function("realtime_push_bin", |b| {
        let mut rt = RealtimeDecoder::from_decoder(&decoder, 0.1).expect("realtime");
        let mut i = 0;
        b.iter(|| {
            let out = rt.push_bin(black_box(&bins[i % bins.len()])).expect("push");
            i += 1;
            black_box(out)
        });
    });
}

criterion_group!(benches, bench_predict, bench_predict_rt, bench_realtime_stream);
criterion_main!(benches);
