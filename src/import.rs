//! CSV bar import.
//!
//! Expected header: `time,open,high,low,close,volume`, with `time` in epoch
//! milliseconds and rows in ascending time order.

use anyhow::{Context, bail};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use storage::{RecordStore, import_bars};
use tracing::info;
use types::Bar;

#[derive(Debug, Deserialize)]
struct BarRow {
    time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Parse bars from any CSV reader, indexed from zero in row order.
pub fn read_bars<R: Read>(reader: R) -> anyhow::Result<Vec<Bar>> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut bars: Vec<Bar> = Vec::new();
    for (line, row) in reader.deserialize::<BarRow>().enumerate() {
        let row = row.with_context(|| format!("bar row {}", line + 1))?;
        if let Some(last) = bars.last()
            && row.time < last.time
        {
            bail!("bar row {} goes back in time ({} < {})", line + 1, row.time, last.time);
        }
        bars.push(Bar::new(
            bars.len() as i64,
            row.time,
            row.open,
            row.high,
            row.low,
            row.close,
            row.volume,
        ));
    }
    Ok(bars)
}

/// Replace the bars table of `store` with the contents of a CSV file.
pub fn import_csv(store: &dyn RecordStore, path: &Path, batch: usize) -> anyhow::Result<usize> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let bars = read_bars(file)?;
    let written = import_bars(store, bars, batch)?;
    info!(bars = written, path = %path.display(), "Bars imported");
    Ok(written)
}
