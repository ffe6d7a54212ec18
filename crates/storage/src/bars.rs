//! Index-addressable price bar sources.
//!
//! **SoC:** This module ONLY loads and caches bars, no indicator logic

use std::collections::BTreeMap;
use tracing::{debug, info};
use types::{Bar, Index};

use crate::criteria::{Criteria, Order};
use crate::error::{Result, StoreError};
use crate::schema::{Column, Schema};
use crate::store::RecordStore;
use crate::value::Record;

/// Table holding imported bars.
pub const BARS_TABLE: &str = "bars";

/// Ordered, zero-based, contiguous sequence of bars.
pub trait BarSource: Send {
    fn get(&mut self, index: Index) -> Result<Bar>;

    /// Number of bars in the sequence.
    fn size(&self) -> i64;

    /// Release the bar at `index` from memory. The bar stays addressable.
    fn remove(&mut self, index: Index);
}

pub fn bars_schema() -> Schema {
    Schema::new(BARS_TABLE)
        .column(Column::integer("idx").primary_key())
        .column(Column::integer("time").not_null())
        .column(Column::real("open"))
        .column(Column::real("high"))
        .column(Column::real("low"))
        .column(Column::real("close"))
        .column(Column::real("volume"))
}

fn bar_record(bar: &Bar) -> Record {
    Record::new()
        .with("idx", bar.index)
        .with("time", bar.time)
        .with("open", bar.open)
        .with("high", bar.high)
        .with("low", bar.low)
        .with("close", bar.close)
        .with("volume", bar.volume)
}

fn bar_from_record(record: &Record) -> Result<Bar> {
    Ok(Bar::new(
        record.integer("idx")?,
        record.integer("time")?,
        record.real("open")?,
        record.real("high")?,
        record.real("low")?,
        record.real("close")?,
        record.real("volume")?,
    ))
}

/// Replace the bars table with `bars`, re-indexed from zero in input order.
///
/// Inserts are batched, one transaction per `batch` bars.
pub fn import_bars<I>(store: &dyn RecordStore, bars: I, batch: usize) -> Result<usize>
where
    I: IntoIterator<Item = Bar>,
{
    store.rebuild(&bars_schema())?;
    let batch = batch.max(1);
    let mut buffer = Vec::with_capacity(batch);
    let mut total = 0usize;
    for (position, mut bar) in bars.into_iter().enumerate() {
        bar.index = position as Index;
        buffer.push(bar_record(&bar));
        if buffer.len() >= batch {
            total += store.insert_all(BARS_TABLE, &buffer)?;
            buffer.clear();
        }
    }
    total += store.insert_all(BARS_TABLE, &buffer)?;
    info!(bars = total, "Imported bars");
    Ok(total)
}

/// Bars read from a [`RecordStore`] a page at a time.
///
/// Loaded bars are cached by index until removed. The cache never exceeds
/// `capacity`; when full, the lowest indices are dropped first.
pub struct SqliteBarSource<'a> {
    store: &'a dyn RecordStore,
    size: i64,
    page: i64,
    capacity: usize,
    cache: BTreeMap<Index, Bar>,
}

impl<'a> SqliteBarSource<'a> {
    pub fn new(store: &'a dyn RecordStore, page: usize) -> Result<Self> {
        let size = store.count(BARS_TABLE, &Criteria::all())?;
        let page = page.max(1);
        debug!(size, page, "Opened bar source");
        Ok(Self {
            store,
            size,
            page: page as i64,
            capacity: page * 4,
            cache: BTreeMap::new(),
        })
    }

    /// Number of bars currently held in memory.
    pub fn resident(&self) -> usize {
        self.cache.len()
    }

    /// Lowest cached index, if any.
    pub fn first_resident(&self) -> Option<Index> {
        self.cache.keys().next().copied()
    }

    fn load_page(&mut self, from: Index) -> Result<()> {
        let to = (from + self.page).min(self.size);
        while self.cache.len() + (to - from) as usize > self.capacity {
            if self.cache.pop_first().is_none() {
                break;
            }
        }
        let criteria = Criteria::all().ge("idx", from).lt("idx", to);
        for record in self.store.select(BARS_TABLE, &criteria, &Order::asc("idx"))? {
            let bar = bar_from_record(&record?)?;
            self.cache.insert(bar.index, bar);
        }
        Ok(())
    }
}

impl BarSource for SqliteBarSource<'_> {
    fn get(&mut self, index: Index) -> Result<Bar> {
        if index < 0 || index >= self.size {
            return Err(StoreError::IndexOutOfRange {
                index,
                size: self.size,
            });
        }
        if let Some(bar) = self.cache.get(&index) {
            return Ok(*bar);
        }
        self.load_page(index)?;
        self.cache
            .get(&index)
            .copied()
            .ok_or(StoreError::BarUnavailable(index))
    }

    fn size(&self) -> i64 {
        self.size
    }

    fn remove(&mut self, index: Index) {
        self.cache.remove(&index);
    }
}

/// Fully resident bars.
///
/// `remove` only records which indices were released; every bar stays
/// addressable.
#[derive(Debug, Clone, Default)]
pub struct MemoryBarSource {
    bars: Vec<Bar>,
    removed: Vec<Index>,
}

impl MemoryBarSource {
    /// Bars are re-indexed from zero in input order.
    pub fn new(bars: impl IntoIterator<Item = Bar>) -> Self {
        let bars = bars
            .into_iter()
            .enumerate()
            .map(|(position, mut bar)| {
                bar.index = position as Index;
                bar
            })
            .collect();
        Self {
            bars,
            removed: Vec::new(),
        }
    }

    /// Indices passed to [`BarSource::remove`], in call order.
    pub fn removed(&self) -> &[Index] {
        &self.removed
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }
}

impl BarSource for MemoryBarSource {
    fn get(&mut self, index: Index) -> Result<Bar> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.bars.get(i))
            .copied()
            .ok_or(StoreError::IndexOutOfRange {
                index,
                size: self.size(),
            })
    }

    fn size(&self) -> i64 {
        self.bars.len() as i64
    }

    fn remove(&mut self, index: Index) {
        self.removed.push(index);
    }
}
