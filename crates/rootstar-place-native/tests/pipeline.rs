//! End-to-end decoding on a synthetic session

use ndarray::Axis;
use rootstar_place_native::evaluator::mean_error;
use rootstar_place_native::{
    simulate_session, BayesianDecoder, CountCutoffConfig, DecodeError, DecoderModel, DecodingSession,
    PipelineConfig, RealtimeDecoder, SimulatedSession, SimulationConfig, UnitSelection,
};

fn simulated() -> SimulatedSession {
    simulate_session(&SimulationConfig {
        duration_s: 300.0,
        n_place_cells: 30,
        seed: 11,
        ..SimulationConfig::default()
    })
    .unwrap()
}

fn session() -> DecodingSession {
    let sim = simulated();
    DecodingSession::new(sim.trajectory, sim.spikes, PipelineConfig::default()).unwrap()
}

#[test]
fn test_decodes_better_than_chance() {
    let s = session();
    let run = s.score(2.0, true).unwrap();
    assert!(run.r2.combined > 0.2, "r2 = {:?}", run.r2);
    let err = mean_error(&run.truth, &run.smoothed).unwrap();
    assert!(err < 25.0, "mean error {err}");
}

#[test]
fn test_unit_selection_drops_noise_unit() {
    let s = session();
    let run = s.score_selected(2.0, &UnitSelection::default()).unwrap();
    assert!(run.decoder.dropped_neurons().contains(&0));
    let active = run.decoder.active_model().unwrap();
    assert!(!active.neuron_ids().contains(&0));
    assert!(run.r2.x.is_finite());
}

#[test]
fn test_realtime_matches_batch_on_session() {
    let s = session();
    let run = s.score(2.0, false).unwrap();
    let data = s.get_data(&CountCutoffConfig::default(), false).unwrap();
    let counts = data.test.counts.counts;

    for r in (0..counts.nrows()).step_by(37) {
        let row = counts.row(r).insert_axis(Axis(0)).to_owned();
        let batch = run.decoder.predict(row.view()).unwrap();
        let rt = run.decoder.predict_rt(row.view()).unwrap();
        assert_eq!(batch[0], rt.position);
        assert!((rt.posterior.sum() - 1.0).abs() < 1e-9);
    }
}

#[test]
fn test_saved_model_decodes_identically() {
    let s = session();
    let run = s.score(2.0, true).unwrap();
    let model = run.decoder.model().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("decoder.json");
    model.save(&path).unwrap();
    let loaded = DecoderModel::load(&path).unwrap();
    assert_eq!(loaded.neuron_ids(), model.neuron_ids());

    let data = s.get_data(&CountCutoffConfig::default(), true).unwrap();
    let counts = data.test.counts.counts.view();
    let reloaded = BayesianDecoder::from_model(run.decoder.config().clone(), loaded);
    assert_eq!(reloaded.predict(counts).unwrap(), run.decoder.predict(counts).unwrap());
}

#[test]
fn test_streaming_decoder_runs_over_session() {
    let s = session();
    let run = s.score(2.0, false).unwrap();
    let data = s.get_data(&CountCutoffConfig { minimum_spikes: 0, ..CountCutoffConfig::default() }, false).unwrap();

    // t_window 0.5 s delivered as 0.1 s bins: 5 bins per decode
    let mut rt = RealtimeDecoder::from_decoder(&run.decoder, 0.1).unwrap();
    let mut estimates = 0;
    for row in data.test.counts.counts.outer_iter() {
        if rt.push_bin(row.as_slice().unwrap()).unwrap().is_some() {
            estimates += 1;
        }
    }
    assert_eq!(estimates, data.test.counts.rows().saturating_sub(rt.window_bins() - 1));
}

#[test]
fn test_unfitted_decoder_rejects_decode() {
    let sim = simulated();
    let decoder = BayesianDecoder::default();
    let counts = ndarray::Array2::<u32>::zeros((1, sim.spikes.len()));
    assert!(matches!(decoder.predict(counts.view()), Err(DecodeError::NotFitted)));
}
