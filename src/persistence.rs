// =============================================================================
// Persistence — append-only JSONL journal
// =============================================================================
//
// Durable record of everything the engine decided: closed-trade outcomes,
// regime transitions, universe transitions, and kill-switch events. One
// JSON object per line, append-only; a torn final line (crash mid-write)
// is skipped on read rather than poisoning the file.
//
// The only startup read is the trade-outcome replay that warms Sharpe
// memory. Everything else is write-only operational history.
// =============================================================================

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::regime::RegimeTransition;
use crate::universe::{TradeOutcome, UniverseEvent};

/// One journal line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum JournalRecord {
    TradeOutcome(TradeOutcome),
    RegimeTransition(RegimeTransition),
    UniverseEvent(UniverseEvent),
    Kill { reason: String, at_ms: i64 },
}

/// Append-only journal at a fixed path. Writes are serialised through a
/// mutex; each record is flushed before the lock is released.
pub struct Journal {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a JSON line.
    pub fn append(&self, record: &JournalRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("failed to serialise journal record")?;

        let _guard = self.write_lock.lock();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open journal at {}", self.path.display()))?;

        writeln!(file, "{line}")
            .with_context(|| format!("failed to append to journal at {}", self.path.display()))?;
        file.flush().context("failed to flush journal")?;
        Ok(())
    }

    /// Replay all trade outcomes from the journal (Sharpe warm-up).
    ///
    /// Unparsable lines are skipped with a warning — a torn tail from a
    /// crash must not block startup.
    pub fn read_trade_outcomes(&self) -> Result<Vec<TradeOutcome>> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "no journal yet; starting cold");
            return Ok(Vec::new());
        }

        let file = std::fs::File::open(&self.path)
            .with_context(|| format!("failed to open journal at {}", self.path.display()))?;
        let reader = BufReader::new(file);

        let mut outcomes = Vec::new();
        let mut skipped = 0usize;
        for line in reader.lines() {
            let line = line.context("failed to read journal line")?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalRecord>(&line) {
                Ok(JournalRecord::TradeOutcome(outcome)) => outcomes.push(outcome),
                Ok(_) => {}
                Err(_) => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!(skipped, "journal lines skipped during replay");
        }
        info!(
            outcomes = outcomes.len(),
            path = %self.path.display(),
            "trade outcomes replayed from journal"
        );
        Ok(outcomes)
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal").field("path", &self.path).finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(trade_id: &str) -> TradeOutcome {
        TradeOutcome {
            trade_id: trade_id.to_string(),
            pool: "pool-a".to_string(),
            entry_time_ms: 1_000,
            exit_time_ms: 2_000,
            size_usd: 500.0,
            realized_pnl: 12.5,
            slippage_impact: 0.0,
            entry_score: 45.0,
            exit_score: 30.0,
            risk_amount: 50.0,
        }
    }

    fn temp_journal(name: &str) -> Journal {
        let path = std::env::temp_dir().join(format!("meridian-journal-test-{name}-{}.jsonl", std::process::id()));
        let _ = std::fs::remove_file(&path);
        Journal::new(path)
    }

    #[test]
    fn test_append_and_replay_outcomes() {
        let journal = temp_journal("roundtrip");
        journal
            .append(&JournalRecord::TradeOutcome(outcome("t1")))
            .unwrap();
        journal
            .append(&JournalRecord::Kill {
                reason: "SIMULTANEOUS_COLLAPSE (3 pools)".to_string(),
                at_ms: 5_000,
            })
            .unwrap();
        journal
            .append(&JournalRecord::TradeOutcome(outcome("t2")))
            .unwrap();

        let outcomes = journal.read_trade_outcomes().unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].trade_id, "t1");
        assert_eq!(outcomes[1].trade_id, "t2");
        assert!((outcomes[0].realized_pnl - 12.5).abs() < f64::EPSILON);

        let _ = std::fs::remove_file(journal.path());
    }

    #[test]
    fn test_missing_journal_starts_cold() {
        let journal = temp_journal("missing");
        let outcomes = journal.read_trade_outcomes().unwrap();
        assert!(outcomes.is_empty());
    }

    #[test]
    fn test_torn_line_skipped() {
        let journal = temp_journal("torn");
        journal
            .append(&JournalRecord::TradeOutcome(outcome("t1")))
            .unwrap();

        // Simulate a crash mid-write: a truncated JSON tail.
        {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(journal.path())
                .unwrap();
            write!(file, "{{\"kind\":\"TradeOutcome\",\"data\":{{\"trade_").unwrap();
        }

        let outcomes = journal.read_trade_outcomes().unwrap();
        assert_eq!(outcomes.len(), 1);

        let _ = std::fs::remove_file(journal.path());
    }
}
