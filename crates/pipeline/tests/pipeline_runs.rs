//! End-to-end runs of the stage pipeline over synthetic bar series.
//!
//! Uses in-memory SQLite unless a test needs the on-disk path, where a
//! `tempfile` directory holds the database.

use pipeline::{
    ChannelHook, HookRunner, Pipeline, ProgressEvent, ProgressHook, Stage, TaskControl, TaskState,
    tables,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use storage::{
    BarSource, Criteria, MemoryBarSource, Order, RecordStore, SqliteBarSource, SqliteStore,
    import_bars,
};
use tempfile::TempDir;
use types::{AverageSpec, Bar, PipelineConfig, SpreadSpec};

/// Two overlapping waves so averages cross and spreads change sign.
fn synthetic_bars(n: usize) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let t = i as f64;
            let close = 100.0 + 5.0 * (t / 9.0).sin() + 2.0 * (t / 2.5).cos();
            let open = close - 0.3 * (t / 4.0).sin();
            Bar::new(
                i as i64,
                1_700_000_000_000 + 60_000 * i as i64,
                open,
                open.max(close) + 0.4,
                open.min(close) - 0.4,
                close,
                1_000.0,
            )
        })
        .collect()
}

fn count(store: &dyn RecordStore, table: &str) -> i64 {
    store.count(table, &Criteria::all()).unwrap()
}

fn expected_performance(n: i64, horizons: &[usize]) -> i64 {
    horizons
        .iter()
        .map(|&h| (n - h as i64).max(0))
        .sum()
}

/// Cancels once, when `task` reaches `at` finished units.
struct CancelAt {
    control: TaskControl,
    task: &'static str,
    at: u64,
    fired: AtomicBool,
}

impl ProgressHook for CancelAt {
    fn name(&self) -> &str {
        "CancelAt"
    }

    fn on_step_end(&self, task: &str, done: u64, _total: u64) {
        if task == self.task && done == self.at && !self.fired.swap(true, Ordering::SeqCst) {
            self.control.request_cancel();
        }
    }
}

#[test]
fn test_full_pipeline_on_disk() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::from_path(dir.path().join("stats.db")).unwrap();
    let config = PipelineConfig::default();
    let n = 300;
    import_bars(&store, synthetic_bars(n), 64).unwrap();

    let mut bars = SqliteBarSource::new(&store, 32).unwrap();
    let report = Pipeline::new(&config, &store)
        .with_batch(50)
        .run(&mut bars, Stage::States)
        .unwrap();

    assert_eq!(report.stages.len(), 5);
    assert!(report.stages.iter().all(|r| r.state == TaskState::Completed));
    let n = n as i64;

    // contiguity
    assert_eq!(count(&store, tables::STATES_TABLE), n);
    let indices: Vec<i64> = store
        .select(tables::STATES_TABLE, &Criteria::all(), &Order::asc("idx"))
        .unwrap()
        .map(|r| r.unwrap().integer("idx").unwrap())
        .collect();
    assert_eq!(indices, (0..n).collect::<Vec<_>>());

    // every state keyed, one transition per index_in except the tail
    assert_eq!(store.count(tables::STATES_TABLE, &tables::keyed()).unwrap(), n);
    assert_eq!(count(&store, tables::TRANSITIONS_TABLE), n - 1);
    assert_eq!(
        store
            .count_distinct(tables::TRANSITIONS_TABLE, "index_in", &Criteria::all())
            .unwrap(),
        n - 1
    );

    assert_eq!(
        count(&store, tables::PERFORMANCE_TABLE),
        expected_performance(n, &config.horizons)
    );
    assert!(count(&store, tables::RANGES_TABLE) > 0);
    assert_eq!(report.get("performance").unwrap().done, n as u64);
}

#[test]
fn test_states_contiguous_for_any_lookback() {
    let n = 37;
    for averages in [
        vec![AverageSpec::sma(2), AverageSpec::sma(3)],
        vec![AverageSpec::sma(3), AverageSpec::ema(60)],
    ] {
        let mut config = PipelineConfig::default();
        let periods: Vec<usize> = averages.iter().map(|a| a.period).collect();
        config.averages = averages;
        config.spreads = vec![SpreadSpec {
            fast: periods[0],
            slow: periods[1],
        }];
        config.speeds = vec![periods[1]];
        config = with_default_normalizers(config);

        let store = SqliteStore::open_in_memory().unwrap();
        let mut bars = MemoryBarSource::new(synthetic_bars(n));
        let report = Pipeline::new(&config, &store)
            .run_stage(Stage::States, &mut bars)
            .unwrap();
        assert_eq!(report.done, n as u64);

        let indices: Vec<i64> = store
            .select(tables::STATES_TABLE, &Criteria::all(), &Order::asc("idx"))
            .unwrap()
            .map(|r| r.unwrap().integer("idx").unwrap())
            .collect();
        assert_eq!(indices, (0..n as i64).collect::<Vec<_>>());
    }
}

/// Rebuild normalizers, discretizers, key and ranges for changed averages.
fn with_default_normalizers(mut config: PipelineConfig) -> PipelineConfig {
    let defaults = PipelineConfig::default();
    let delta = defaults.normalizers[&types::FieldRole::Delta(types::PriceKind::Close)];
    let spread = defaults.normalizers[&defaults.spread_fields()[0]];
    let discrete = defaults.discretizers[&defaults.spread_fields()[0]];
    config.normalizers.clear();
    config.discretizers.clear();
    for field in types::FieldRole::deltas() {
        config.normalizers.insert(field, delta);
    }
    for field in config.discretized_fields() {
        config.normalizers.insert(field, spread);
        config.discretizers.insert(field, discrete);
    }
    config.key.fields = config.discretized_fields();
    config.ranges = vec![types::RangeSpec {
        field: config.spread_fields()[0],
        period: 3,
    }];
    config
}

#[test]
fn test_normalizer_second_run_is_noop() {
    let config = PipelineConfig::default();
    let store = SqliteStore::open_in_memory().unwrap();
    let mut bars = MemoryBarSource::new(synthetic_bars(120));
    let pipeline = Pipeline::new(&config, &store);
    pipeline.run_stage(Stage::States, &mut bars).unwrap();

    let first = pipeline.run_stage(Stage::Normalize, &mut bars).unwrap();
    assert_eq!((first.total, first.done), (120, 120));

    let second = pipeline.run_stage(Stage::Normalize, &mut bars).unwrap();
    assert_eq!(second.state, TaskState::Completed);
    assert_eq!((second.total, second.done), (0, 0));
}

#[test]
fn test_cancelled_run_leaves_no_residue_after_rerun() {
    let config = PipelineConfig::default();
    let n = 200;

    let reference = SqliteStore::open_in_memory().unwrap();
    Pipeline::new(&config, &reference)
        .run(&mut MemoryBarSource::new(synthetic_bars(n)), Stage::States)
        .unwrap();

    let store = SqliteStore::open_in_memory().unwrap();
    let control = TaskControl::new();
    let mut hooks = HookRunner::new();
    hooks.add(Arc::new(CancelAt {
        control: control.clone(),
        task: "performance",
        at: 40,
        fired: AtomicBool::new(false),
    }));
    let pipeline = Pipeline::new(&config, &store)
        .with_control(control.clone())
        .with_hooks(hooks)
        .with_batch(16);

    let mut bars = MemoryBarSource::new(synthetic_bars(n));
    let cancelled = pipeline.run(&mut bars, Stage::States).unwrap();
    assert!(cancelled.is_cancelled());
    assert_eq!(cancelled.stages.last().unwrap().task, "performance");
    assert_eq!(cancelled.stages.last().unwrap().done, 40);
    assert!(count(&store, tables::PERFORMANCE_TABLE) < count(&reference, tables::PERFORMANCE_TABLE));
    assert!(!store.exists(tables::TRANSITIONS_TABLE).unwrap());

    control.reset();
    let mut bars = MemoryBarSource::new(synthetic_bars(n));
    let rerun = pipeline.run(&mut bars, Stage::States).unwrap();
    assert!(!rerun.is_cancelled());

    for table in [
        tables::STATES_TABLE,
        tables::RANGES_TABLE,
        tables::PERFORMANCE_TABLE,
        tables::TRANSITIONS_TABLE,
    ] {
        assert_eq!(count(&store, table), count(&reference, table), "{table}");
    }
    let keys = |s: &SqliteStore| -> Vec<(i64, String)> {
        s.select(tables::STATES_TABLE, &Criteria::all(), &Order::asc("idx"))
            .unwrap()
            .map(|r| {
                let r = r.unwrap();
                (r.integer("idx").unwrap(), r.text("key").unwrap().to_string())
            })
            .collect()
    };
    assert_eq!(keys(&store), keys(&reference));
}

#[test]
fn test_pause_blocks_until_resume() {
    let config = PipelineConfig::default();
    let store = SqliteStore::open_in_memory().unwrap();
    let control = TaskControl::new();
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut hooks = HookRunner::new();
    hooks.add(Arc::new(ChannelHook::new(tx, 1)));

    control.request_pause();
    thread::scope(|scope| {
        let worker = scope.spawn(|| {
            let mut bars = MemoryBarSource::new(synthetic_bars(80));
            Pipeline::new(&config, &store)
                .with_control(control.clone())
                .with_hooks(hooks)
                .run_stage(Stage::States, &mut bars)
        });

        // counting happens before the first checkpoint
        loop {
            match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                ProgressEvent::Counted { total, .. } => {
                    assert_eq!(total, 80);
                    break;
                }
                _ => continue,
            }
        }
        thread::sleep(Duration::from_millis(100));
        assert!(!worker.is_finished());
        assert!(rx.try_recv().is_err());

        control.resume();
        let report = worker.join().unwrap().unwrap();
        assert_eq!(report.state, TaskState::Completed);
        assert_eq!(report.done, 80);
    });
}

#[test]
fn test_performance_windows_widen() {
    let config = PipelineConfig::default();
    let store = SqliteStore::open_in_memory().unwrap();
    let mut bars = MemoryBarSource::new(synthetic_bars(150));
    Pipeline::new(&config, &store)
        .run(&mut bars, Stage::States)
        .unwrap();

    let order = Order::asc("idx").then_asc("period");
    let rows: Vec<_> = store
        .select(tables::PERFORMANCE_TABLE, &Criteria::all(), &order)
        .unwrap()
        .map(|r| tables::performance_from_record(&r.unwrap()).unwrap())
        .collect();
    assert!(!rows.is_empty());
    for pair in rows.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if a.index == b.index {
            assert!(b.period > a.period);
            assert!(b.maximum >= a.maximum);
            assert!(b.minimum <= a.minimum);
        }
    }

    // the source bar itself is never part of the window
    let bar = bars.get(10).unwrap();
    let next = bars.get(11).unwrap();
    let first = rows.iter().find(|r| r.index == 10 && r.period == 1).unwrap();
    assert_eq!(first.maximum, next.high);
    assert_eq!(first.minimum, next.low);
    assert_eq!(first.time, bar.time);
}
