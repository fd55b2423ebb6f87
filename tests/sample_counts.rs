use pretty_assertions::assert_eq;
use selex_rs::{
    summarize, CountTable, GibbsSampler, GibbsSettings, ModelOptions, PointEstimate, SamplerError,
    SummaryOptions, TableError,
};

fn table(rows: &str) -> CountTable {
    CountTable::from_reader(rows.as_bytes()).unwrap()
}

fn run(rows: &str, settings: GibbsSettings) -> (CountTable, selex_rs::Trace) {
    let t = table(rows);
    let sampler = GibbsSampler::new(&t, ModelOptions::default(), settings).unwrap();
    let trace = sampler.sample().unwrap();
    (t, trace)
}

fn quick_settings() -> GibbsSettings {
    GibbsSettings {
        n_burnin: 50,
        n_samples: 200,
        random_seed: 42,
        ..GibbsSettings::default()
    }
}

#[test]
fn summary_has_one_row_per_entity_in_input_order() {
    let (t, trace) = run("z9,10,20\na1,5,3\nmm,0,0\nq,7,7\n", quick_settings());
    let summary = summarize(&trace, &SummaryOptions::default());
    let names: Vec<&str> = summary.rows().iter().map(|r| r.entity.as_str()).collect();
    assert_eq!(names, t.entities().iter().map(String::as_str).collect::<Vec<_>>());
    assert_eq!(summary.len(), 4);
}

#[test]
fn identical_seed_and_config_reproduce_trace_and_summary_exactly() {
    let rows = "a,100,100\nb,100,1000\nc,3,0\n";
    let settings = quick_settings();
    let (_, trace1) = run(rows, settings);
    let (_, trace2) = run(rows, settings);
    assert_eq!(trace1, trace2);

    let options = SummaryOptions::default();
    assert_eq!(summarize(&trace1, &options), summarize(&trace2, &options));
}

#[test]
fn widening_coverage_never_narrows_any_interval() {
    let (_, trace) = run("a,100,100\nb,100,1000\nc,3,0\nd,50,51\n", quick_settings());
    let narrow = summarize(
        &trace,
        &SummaryOptions {
            interval_coverage: 0.8,
            ..SummaryOptions::default()
        },
    );
    let wide = summarize(
        &trace,
        &SummaryOptions {
            interval_coverage: 0.95,
            ..SummaryOptions::default()
        },
    );
    for (n, w) in narrow.rows().iter().zip(wide.rows()) {
        assert!(w.lower <= n.lower, "{}: {} > {}", n.entity, w.lower, n.lower);
        assert!(w.upper >= n.upper, "{}: {} < {}", n.entity, w.upper, n.upper);
    }
}

#[test]
fn all_zero_entity_stays_finite() {
    let (_, trace) = run("dead,0,0\nlive,10,30\n", quick_settings());
    let summary = summarize(&trace, &SummaryOptions::default());
    let row = &summary.rows()[0];
    assert_eq!(row.entity, "dead");
    assert!(row.estimate.is_finite());
    assert!(row.lower.is_finite() && row.upper.is_finite());
    assert!(row.sd.is_finite());
}

#[test]
fn enriched_entity_scores_strictly_higher() {
    // A: no change; B: tenfold enrichment at equal input depth.
    let settings = GibbsSettings {
        n_burnin: 500,
        n_samples: 1000,
        thinning_interval: 1,
        random_seed: 42,
        ..GibbsSettings::default()
    };
    let (_, trace) = run("A,100,100\nB,100,1000\n", settings);
    for point_estimate in [PointEstimate::Mean, PointEstimate::Median] {
        let summary = summarize(
            &trace,
            &SummaryOptions {
                point_estimate,
                ..SummaryOptions::default()
            },
        );
        let a = summary.rows()[0].estimate;
        let b = summary.rows()[1].estimate;
        assert!(b > a, "expected B > A, got A={a}, B={b}");
    }
}

#[test]
fn zero_samples_is_a_config_error_before_any_input() {
    let settings = GibbsSettings {
        n_samples: 0,
        ..GibbsSettings::default()
    };
    // The configuration is rejected on its own, with no table in sight.
    assert!(matches!(settings.validate(), Err(SamplerError::Config(_))));

    // And through the sampler front door as well.
    let t = table("a,1,2\n");
    let err = GibbsSampler::new(&t, ModelOptions::default(), settings)
        .err()
        .expect("expected a config error");
    match err {
        SamplerError::Config(msg) => assert!(msg.contains("n_samples")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn malformed_count_reports_row_position() {
    let err = CountTable::from_reader("a,10,20\nb,10,abc\nc,1,2\n".as_bytes()).unwrap_err();
    match err {
        TableError::MalformedRow { line, reason } => {
            assert_eq!(line, 2);
            assert!(reason.contains("abc"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn summarization_is_idempotent_on_a_finished_trace() {
    let (_, trace) = run("a,10,20\nb,5,3\n", quick_settings());
    let options = SummaryOptions {
        point_estimate: PointEstimate::Mean,
        interval_coverage: 0.9,
    };
    let first = summarize(&trace, &options);
    let second = summarize(&trace, &options);
    assert_eq!(first, second);
}

#[test]
fn different_seeds_produce_different_traces() {
    let rows = "a,100,100\nb,100,1000\n";
    let (_, trace1) = run(
        rows,
        GibbsSettings {
            random_seed: 1,
            ..quick_settings()
        },
    );
    let (_, trace2) = run(
        rows,
        GibbsSettings {
            random_seed: 2,
            ..quick_settings()
        },
    );
    assert_ne!(trace1, trace2);
}

#[test]
fn depleted_entity_scores_below_neutral() {
    let settings = GibbsSettings {
        n_burnin: 300,
        n_samples: 500,
        random_seed: 7,
        ..GibbsSettings::default()
    };
    let (_, trace) = run("gone,200,2\nflat,200,200\n", settings);
    let summary = summarize(&trace, &SummaryOptions::default());
    assert!(summary.rows()[0].estimate < summary.rows()[1].estimate);
}
