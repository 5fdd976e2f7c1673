//! Per-round timing and token statistics.
use crate::stage::StageSlot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;

/// Stage measurements for one round. Stages that did not run in the round
/// have no entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStats {
    pub round: u32,
    pub latency_ms: BTreeMap<StageSlot, u64>,
    pub tokens: BTreeMap<StageSlot, u64>,
}

impl RoundStats {
    pub fn new(round: u32) -> Self {
        Self {
            round,
            ..Default::default()
        }
    }

    pub fn add(&mut self, slot: StageSlot, latency_ms: u64, tokens: u64) {
        *self.latency_ms.entry(slot).or_insert(0) += latency_ms;
        *self.tokens.entry(slot).or_insert(0) += tokens;
    }
}

pub trait StatsSink: Send + Sync {
    fn record_round(&self, stats: &RoundStats) -> io::Result<()>;
}

/// Keeps rounds in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStatsSink {
    rounds: Mutex<Vec<RoundStats>>,
}

impl MemoryStatsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rounds(&self) -> Vec<RoundStats> {
        self.rounds.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl StatsSink for MemoryStatsSink {
    fn record_round(&self, stats: &RoundStats) -> io::Result<()> {
        self.rounds
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "stats lock poisoned"))?
            .push(stats.clone());
        Ok(())
    }
}

/// Column header of the statistics file.
pub const CSV_HEADER: [&str; 8] = [
    "round",
    "kind",
    "identify",
    "encapsulate",
    "package",
    "generate",
    "combine",
    "review",
];

/// Append-only CSV: a `duration_ms` row and a `tokens` row per round.
pub struct CsvStatsSink {
    writer: Mutex<csv::Writer<File>>,
}

impl CsvStatsSink {
    /// Create (or truncate) the file and write the header.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::with_file(File::create(path)?, true)
    }

    /// Append to an existing file, writing the header only if it is empty.
    pub fn append(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let empty = file.metadata()?.len() == 0;
        Self::with_file(file, empty)
    }

    fn with_file(file: File, write_header: bool) -> io::Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if write_header {
            writer.write_record(CSV_HEADER)?;
            writer.flush()?;
        }
        Ok(Self {
            writer: Mutex::new(writer),
        })
    }
}

fn csv_row(round: u32, kind: &str, values: &BTreeMap<StageSlot, u64>) -> Vec<String> {
    let mut row = vec![round.to_string(), kind.to_string()];
    row.extend(
        StageSlot::ALL
            .iter()
            .map(|slot| values.get(slot).map(u64::to_string).unwrap_or_default()),
    );
    row
}

impl StatsSink for CsvStatsSink {
    fn record_round(&self, stats: &RoundStats) -> io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "stats lock poisoned"))?;
        writer.write_record(csv_row(stats.round, "duration_ms", &stats.latency_ms))?;
        writer.write_record(csv_row(stats.round, "tokens", &stats.tokens))?;
        writer.flush()
    }
}
