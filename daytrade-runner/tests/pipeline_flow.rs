//! Download → preprocess → compare, against an in-memory data source and a
//! Parquet store in a temp directory.

use std::sync::Mutex;

use chrono::NaiveDate;
use daytrade_core::data::{
    DataError, DataSource, HistoryWindow, Interval, Lookback, PanelStore, ParquetStore, PriceField,
};
use daytrade_core::{forward_return_name, Panel, TickerRegistry, INDEX};
use daytrade_runner::export::{load_report, save_artifacts};
use daytrade_runner::{
    compare_policies, day_range, random_finals, refresh_raw, resolve_tickers, run_preprocess,
    DataConfig, RunConfig,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i64::from(d))
}

/// Serves rows of a fixed raw history up to `today`.
struct FakeSource {
    history: Panel,
    today: NaiveDate,
    calls: Mutex<Vec<HistoryWindow>>,
}

impl FakeSource {
    fn new(tickers: &[String], days: u32, today: NaiveDate) -> Self {
        let mut rng = StdRng::seed_from_u64(3);
        let mut history = Panel::new((0..days).map(date).collect()).unwrap();
        for ticker in tickers {
            let mut price = 100.0;
            let open: Vec<f64> = (0..days)
                .map(|_| {
                    price *= 1.0 + rng.gen_range(-0.02..0.02);
                    price
                })
                .collect();
            history.insert(PriceField::Open.column(ticker), open).unwrap();
        }
        Self {
            history,
            today,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<HistoryWindow> {
        self.calls.lock().unwrap().clone()
    }
}

impl DataSource for FakeSource {
    fn name(&self) -> &str {
        "fake"
    }

    fn fetch_history(
        &self,
        _tickers: &[String],
        window: HistoryWindow,
        _interval: Interval,
    ) -> Result<Panel, DataError> {
        self.calls.lock().unwrap().push(window);
        let start = window.start(self.today);
        let dates = self.history.dates();
        let from = dates.partition_point(|d| *d < start);
        let to = dates.partition_point(|d| *d <= self.today);
        Ok(self.history.slice_rows(from..to.max(from))?)
    }
}

fn tickers() -> Vec<String> {
    vec!["AAA".into(), "BBB".into(), "CCC".into()]
}

fn data_cfg(dir: &std::path::Path) -> DataConfig {
    DataConfig {
        group: "test".into(),
        period: Lookback::Days(40),
        data_dir: dir.to_path_buf(),
        ..DataConfig::default()
    }
}

#[test]
fn tickers_resolve_from_the_registry() {
    let registry = TickerRegistry::builtin();
    let mut cfg = DataConfig::default();
    assert_eq!(resolve_tickers(&cfg, &registry).unwrap().len(), 30);

    cfg.num_tickers = Some(2);
    assert_eq!(resolve_tickers(&cfg, &registry).unwrap().len(), 2);

    cfg.group = "no_such_group".into();
    assert!(resolve_tickers(&cfg, &registry).is_err());
}

#[test]
fn first_refresh_fetches_the_lookback_then_only_new_days() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = data_cfg(tmp.path());
    let store = ParquetStore::new(tmp.path(), "test");
    let ts = tickers();

    // Day 0..=40 available on the first run
    let first = FakeSource::new(&ts, 60, date(40));
    let raw = refresh_raw(&first, &store, &ts, &cfg, date(40)).unwrap();
    assert_eq!(first.calls(), vec![HistoryWindow::Lookback(Lookback::Days(40))]);
    assert_eq!(raw.height(), 41);
    assert_eq!(store.snapshots().unwrap().len(), 1);

    // Two more days later on
    let second = FakeSource::new(&ts, 60, date(42));
    let raw = refresh_raw(&second, &store, &ts, &cfg, date(42)).unwrap();
    assert_eq!(second.calls(), vec![HistoryWindow::Since(date(41))]);
    assert_eq!(raw.height(), 43);
    assert_eq!(raw.max_date(), Some(date(42)));
    assert_eq!(store.snapshots().unwrap().len(), 2);

    // Reloading from disk gives the same merged history
    let loaded = store.load_latest().unwrap();
    assert_eq!(loaded.dates(), raw.dates());
    assert_eq!(
        loaded.column(&PriceField::Open.column("AAA")),
        raw.column(&PriceField::Open.column("AAA"))
    );
}

#[test]
fn current_history_is_not_refetched() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = data_cfg(tmp.path());
    let store = ParquetStore::new(tmp.path(), "test");
    let ts = tickers();

    let source = FakeSource::new(&ts, 60, date(40));
    refresh_raw(&source, &store, &ts, &cfg, date(40)).unwrap();
    let again = refresh_raw(&source, &store, &ts, &cfg, date(40)).unwrap();

    assert_eq!(source.calls().len(), 1);
    assert_eq!(again.height(), 41);
}

#[test]
fn empty_fetch_keeps_stored_history() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = data_cfg(tmp.path());
    let store = ParquetStore::new(tmp.path(), "test");
    let ts = tickers();

    let source = FakeSource::new(&ts, 41, date(40));
    refresh_raw(&source, &store, &ts, &cfg, date(40)).unwrap();

    // The source has nothing past day 40
    let later = FakeSource::new(&ts, 41, date(45));
    let raw = refresh_raw(&later, &store, &ts, &cfg, date(45)).unwrap();
    assert_eq!(later.calls(), vec![HistoryWindow::Since(date(41))]);
    assert_eq!(raw.height(), 41);
    assert_eq!(store.snapshots().unwrap().len(), 1);
}

#[test]
fn preprocess_without_download_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let store = ParquetStore::new(tmp.path(), "test");
    let cfg = RunConfig::debug().preprocess.to_config().unwrap();
    let err = run_preprocess(&store, &tickers(), &cfg).unwrap_err();
    assert!(err.to_string().contains("run `download` first"), "{err}");
}

fn prepared(tmp: &std::path::Path) -> (Panel, RunConfig) {
    let mut cfg = RunConfig::debug();
    cfg.data = data_cfg(tmp);
    cfg.data.period = Lookback::Days(80);
    cfg.monte_carlo.trials = 64;

    let store = ParquetStore::new(tmp, "test");
    let ts = tickers();
    let source = FakeSource::new(&ts, 81, date(80));
    refresh_raw(&source, &store, &ts, &cfg.data, date(80)).unwrap();

    let processed = run_preprocess(&store, &ts, &cfg.preprocess.to_config().unwrap()).unwrap();
    let reloaded = store.load_preprocessed().unwrap();
    assert_eq!(reloaded.dates(), processed.dates());
    assert_eq!(reloaded.width(), processed.width());
    (processed, cfg)
}

#[test]
fn preprocessed_panel_is_persisted_with_labels() {
    let tmp = tempfile::tempdir().unwrap();
    let (panel, _) = prepared(tmp.path());
    for t in tickers() {
        assert!(panel.contains(&forward_return_name(&t)));
        assert!(panel.contains(&format!("{t}_pdiff_0d_5d")));
    }
    assert!(panel.contains(&forward_return_name(INDEX)));
}

#[test]
fn comparison_is_reproducible_for_a_seed() {
    let tmp = tempfile::tempdir().unwrap();
    let (panel, cfg) = prepared(tmp.path());
    let ts = tickers();

    let a = compare_policies(&panel, &ts, &cfg).unwrap();
    let b = compare_policies(&panel, &ts, &cfg).unwrap();

    assert_eq!(a.random, b.random);
    assert_eq!(a.random.trials, 64);
    assert_eq!(a.policies.len(), 2);
    for (pa, pb) in a.policies.iter().zip(&b.policies) {
        assert_eq!(pa.name, pb.name);
        assert_eq!(pa.final_value, pb.final_value);
        assert_eq!(pa.trajectory, pb.trajectory);
    }

    // The forward return on the last row is undefined
    assert_eq!(a.start, 0);
    assert_eq!(a.end, panel.height() - 2);
    assert_eq!(a.start_date, date(0));
    assert!(a.policy("control_index").is_some());
    assert!(a.policy("max_pdiff_0d_5d").is_some());
    assert_eq!(a.run_id, cfg.run_id().unwrap());
}

#[test]
fn random_baseline_is_independent_of_thread_count() {
    let tmp = tempfile::tempdir().unwrap();
    let (panel, _) = prepared(tmp.path());
    let ts = tickers();
    let (start, end) = day_range(&panel, &ts, None, None).unwrap();

    let parallel = random_finals(&panel, &ts, start, end, 1.0, 50, 9).unwrap();
    let single = rayon::ThreadPoolBuilder::new()
        .num_threads(1)
        .build()
        .unwrap()
        .install(|| random_finals(&panel, &ts, start, end, 1.0, 50, 9).unwrap());
    assert_eq!(parallel, single);

    let other_seed = random_finals(&panel, &ts, start, end, 1.0, 50, 10).unwrap();
    assert_ne!(parallel, other_seed);
}

#[test]
fn explicit_day_range_is_bounds_checked() {
    let tmp = tempfile::tempdir().unwrap();
    let (panel, mut cfg) = prepared(tmp.path());
    let ts = tickers();

    cfg.backtest.start = Some(10);
    cfg.backtest.end = Some(20);
    let report = compare_policies(&panel, &ts, &cfg).unwrap();
    assert_eq!((report.start, report.end), (10, 20));
    assert_eq!(report.policies[0].trajectory.len(), 11);
    assert_eq!(report.days(&panel).len(), 11);

    cfg.backtest.end = Some(panel.height());
    assert!(compare_policies(&panel, &ts, &cfg).is_err());
}

#[test]
fn run_through_the_last_row_saves_a_loadable_report() {
    let tmp = tempfile::tempdir().unwrap();
    let (panel, mut cfg) = prepared(tmp.path());
    let ts = tickers();

    // The last row has no forward return, so the final step is undefined
    cfg.backtest.start = Some(10);
    cfg.backtest.end = Some(panel.height() - 1);
    let report = compare_policies(&panel, &ts, &cfg).unwrap();
    assert!(report.policies[0].final_value.is_nan());

    let out = tempfile::tempdir().unwrap();
    let dir = save_artifacts(&report, &panel, out.path()).unwrap();
    let loaded = load_report(&dir).unwrap();
    assert_eq!(loaded.end, panel.height() - 1);
    assert_eq!(loaded.policies.len(), report.policies.len());
    assert!(loaded.policies[0].final_value.is_nan());
    assert_eq!(loaded.random.trials, report.random.trials);
}
