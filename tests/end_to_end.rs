//! Full runs of the inference pipeline on small series.

use bayes_changepoint::{
    analyze, diagnose, summarize, ChangePointModel, Error, InferenceConfig, ObservationSeries,
    Parameter, PosteriorAnalysis, PriceRecord, PriorConfig, RandomSeed, Sampler, SamplerConfig,
};
use chrono::NaiveDate;

fn step_series() -> ObservationSeries {
    ObservationSeries::new(vec![0.01, 0.01, 0.01, 0.05, 0.05, 0.05]).unwrap()
}

fn config(seed: u64) -> InferenceConfig {
    InferenceConfig {
        sampler: SamplerConfig {
            draws: 500,
            tune: 200,
            chains: 2,
            random_seed: Some(RandomSeed::Base(seed)),
            ..SamplerConfig::default()
        },
        ..InferenceConfig::default()
    }
}

#[test]
fn step_series_locates_break() {
    let analysis = analyze(&step_series(), &config(2024)).unwrap();
    let summary = &analysis.summary;

    let tau = summary.get(Parameter::Tau).unwrap().mean;
    assert!((1.5..=3.5).contains(&tau), "tau mean = {}", tau);
    let mu_1 = summary.get(Parameter::Mu1).unwrap().mean;
    let mu_2 = summary.get(Parameter::Mu2).unwrap().mean;
    assert!((mu_1 - 0.01).abs() < 0.01, "mu_1 = {}", mu_1);
    assert!((mu_2 - 0.05).abs() < 0.01, "mu_2 = {}", mu_2);
    assert!(summary.prob_mu_2_greater > 0.9);

    for p in analysis.traces.pooled_draws() {
        assert!(p.tau <= 6);
        assert!(p.sigma > 0.0);
    }
}

#[test]
fn same_seed_same_analysis() {
    let a = analyze(&step_series(), &config(7)).unwrap();
    let b = analyze(&step_series(), &config(7)).unwrap();
    assert_eq!(a.traces, b.traces);
    assert_eq!(a.diagnostics, b.diagnostics);
    assert_eq!(a.summary, b.summary);
}

#[test]
fn per_chain_seeds_reproduce_single_chain() {
    let series = step_series();
    let model = ChangePointModel::new(series.values(), PriorConfig::default()).unwrap();
    let sampler_config = |seeds: Vec<u64>| SamplerConfig {
        draws: 50,
        tune: 50,
        chains: 2,
        random_seed: Some(RandomSeed::PerChain(seeds)),
        ..SamplerConfig::default()
    };
    let a = Sampler::new(&model, sampler_config(vec![1, 2])).unwrap().sample().unwrap();
    let b = Sampler::new(&model, sampler_config(vec![3, 1])).unwrap().sample().unwrap();
    // Chain 0 of `a` and chain 1 of `b` share seed 1 and stream 0.
    assert_eq!(a.chain(0).unwrap().draws, b.chain(1).unwrap().draws);
}

#[test]
fn empty_series_is_invalid_input() {
    assert!(matches!(
        ObservationSeries::new(vec![]),
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        ChangePointModel::new(&[], PriorConfig::default()),
        Err(Error::InvalidInput(_))
    ));
}

#[test]
fn zero_draws_is_invalid_configuration() {
    let mut config = config(1);
    config.sampler.draws = 0;
    match analyze(&step_series(), &config) {
        Err(Error::InvalidConfiguration { field, .. }) => assert_eq!(field, "draws"),
        other => panic!("expected invalid configuration, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn diagnostics_and_summary_are_idempotent() {
    let analysis = analyze(&step_series(), &config(11)).unwrap();
    let report = diagnose(&analysis.traces).unwrap();
    assert_eq!(report, analysis.diagnostics);
    let summary_config = InferenceConfig::default().summary;
    let first = summarize(&analysis.traces, &report, &summary_config, None).unwrap();
    let second = summarize(&analysis.traces, &report, &summary_config, None).unwrap();
    assert_eq!(first, second);

    let mut posterior = PosteriorAnalysis::new(analysis.traces.clone());
    posterior.diagnose().unwrap();
    assert_eq!(posterior.summarize(&summary_config, None).unwrap(), first);
}

#[test]
fn dated_prices_map_change_point_to_date() {
    let day = |d| NaiveDate::from_ymd_opt(2021, 3, d).unwrap();
    // Prices grow 1% a day, then 5% a day.
    let mut price = 100.0;
    let mut records = vec![PriceRecord { date: day(1), price }];
    for d in 2..=21 {
        price *= if d <= 11 { 1.01 } else { 1.05 };
        records.push(PriceRecord { date: day(d), price });
    }
    records.reverse();
    let series = ObservationSeries::from_prices(records).unwrap();
    assert_eq!(series.len(), 20);

    let analysis = analyze(&series, &config(5)).unwrap();
    let change_point = analysis.summary.change_point;
    // Returns 0..=9 are dated 2..=11 March and belong to the 1% regime.
    assert!((8..=11).contains(&change_point.index), "{:?}", change_point);
    assert_eq!(change_point.date, series.date_at(change_point.index));
    assert!(change_point.date.is_some());
}
