//! Trade ledger: what was emitted, what it was expected to earn and, once
//! known, what it actually earned.
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use eyre::{bail, Result, WrapErr};
use serde::{Deserialize, Serialize};

use super::dispatch::TradeInstruction;
use super::types::Asset;

/// One emitted trade and its outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    /// Transaction reference returned by the executor
    pub reference: String,
    /// When the trade was emitted
    pub recorded_at: DateTime<Utc>,
    /// Asset sold
    pub from_asset: Asset,
    /// Asset bought
    pub to_asset: Asset,
    /// Batch the instruction belonged to
    pub batch: usize,
    /// Position inside the batch
    pub leg: usize,
    /// Estimated net profit rate of the edge
    pub estimated_profit_rate: f64,
    /// Expected profit, `estimated_profit_rate * trade_size`
    pub expected_profit: f64,
    /// Realized profit, once reported
    pub realized_profit: Option<f64>,
}

impl TradeRecord {
    /// Records an instruction as emitted under `reference`
    #[must_use]
    pub fn new(
        instruction: &TradeInstruction,
        reference: String,
        trade_size: f64,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            reference,
            recorded_at,
            from_asset: instruction.from_asset.clone(),
            to_asset: instruction.to_asset.clone(),
            batch: instruction.batch,
            leg: instruction.leg,
            estimated_profit_rate: instruction.estimated_profit_rate,
            expected_profit: instruction.estimated_profit_rate * trade_size,
            realized_profit: None,
        }
    }
}

/// Expected against realized profit over a ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    /// Trades recorded
    pub trades: usize,
    /// Trades with a realized profit attached
    pub settled: usize,
    /// Expected profit over every trade
    pub expected_total: f64,
    /// Expected profit over settled trades only
    pub settled_expected_total: f64,
    /// Realized profit over settled trades
    pub realized_total: f64,
}

impl Reconciliation {
    /// Realized minus expected over settled trades
    #[must_use]
    pub fn slippage(&self) -> f64 {
        self.realized_total - self.settled_expected_total
    }
}

/// Storage for emitted trades
pub trait TradeLedger {
    /// Appends a newly emitted trade
    ///
    /// # Errors
    /// * If the record cannot be stored
    fn record(&mut self, record: TradeRecord) -> Result<()>;

    /// Attaches the realized profit to the trade emitted under `reference`
    ///
    /// # Errors
    /// * If no trade carries `reference`
    /// * If the ledger cannot be updated
    fn record_realized(&mut self, reference: &str, realized_profit: f64) -> Result<()>;

    /// Every stored trade, oldest first
    ///
    /// # Errors
    /// * If the ledger cannot be read
    fn records(&self) -> Result<Vec<TradeRecord>>;

    /// Sums expected and realized profit over every stored trade
    ///
    /// # Errors
    /// * If the ledger cannot be read
    fn reconcile(&self) -> Result<Reconciliation> {
        let mut reconciliation = Reconciliation::default();
        for record in self.records()? {
            reconciliation.trades += 1;
            reconciliation.expected_total += record.expected_profit;
            if let Some(realized) = record.realized_profit {
                reconciliation.settled += 1;
                reconciliation.settled_expected_total += record.expected_profit;
                reconciliation.realized_total += realized;
            }
        }
        Ok(reconciliation)
    }
}

/// Sets the realized profit on the record carrying `reference`
fn settle(records: &mut [TradeRecord], reference: &str, realized_profit: f64) -> Result<()> {
    let Some(record) = records.iter_mut().find(|record| record.reference == reference) else {
        bail!("no trade recorded with reference {reference}");
    };
    record.realized_profit = Some(realized_profit);
    Ok(())
}

/// Ledger kept in memory for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryLedger {
    /// Recorded trades, oldest first
    records: Vec<TradeRecord>,
}

impl MemoryLedger {
    /// Creates an empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TradeLedger for MemoryLedger {
    fn record(&mut self, record: TradeRecord) -> Result<()> {
        self.records.push(record);
        Ok(())
    }

    fn record_realized(&mut self, reference: &str, realized_profit: f64) -> Result<()> {
        settle(&mut self.records, reference, realized_profit)
    }

    fn records(&self) -> Result<Vec<TradeRecord>> {
        Ok(self.records.clone())
    }
}

/// Ledger persisted as one JSON object per line.
///
/// New trades are appended; attaching a realized profit rewrites the file.
#[derive(Debug, Clone)]
pub struct JsonlLedger {
    /// Ledger file
    path: PathBuf,
}

impl JsonlLedger {
    /// Uses `path` as the ledger file, creating it on first write
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the ledger file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the file with `records` through a temporary file and a rename
    fn rewrite(&self, records: &[TradeRecord]) -> Result<()> {
        let tmp = self.path.with_extension("jsonl.tmp");
        let mut writer = BufWriter::new(
            File::create(&tmp).wrap_err_with(|| format!("creating {}", tmp.display()))?,
        );
        for record in records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        drop(writer);
        fs::rename(&tmp, &self.path)
            .wrap_err_with(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

impl TradeLedger for JsonlLedger {
    fn record(&mut self, record: TradeRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .wrap_err_with(|| format!("opening ledger {}", self.path.display()))?;
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn record_realized(&mut self, reference: &str, realized_profit: f64) -> Result<()> {
        let mut records = self.records()?;
        settle(&mut records, reference, realized_profit)?;
        self.rewrite(&records)
    }

    fn records(&self) -> Result<Vec<TradeRecord>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).wrap_err_with(|| format!("opening ledger {}", self.path.display()))
            }
        };

        let mut records = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).wrap_err_with(|| {
                format!("malformed ledger line {} in {}", number + 1, self.path.display())
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::arb::test_helpers::*;

    fn record(reference: &str, expected_profit: f64) -> TradeRecord {
        TradeRecord {
            reference: reference.to_string(),
            recorded_at: epoch(),
            from_asset: "A".into(),
            to_asset: "B".into(),
            batch: 0,
            leg: 0,
            estimated_profit_rate: expected_profit / 10.0,
            expected_profit,
            realized_profit: None,
        }
    }

    fn temp_ledger(name: &str) -> JsonlLedger {
        let path = std::env::temp_dir().join(format!("arbgraph-{name}-{}.jsonl", std::process::id()));
        let _ = fs::remove_file(&path);
        JsonlLedger::new(path)
    }

    fn exercise(ledger: &mut dyn TradeLedger) {
        ledger.record(record("tx-1", 0.3)).unwrap();
        ledger.record(record("tx-2", 0.5)).unwrap();
        ledger.record_realized("tx-2", 0.4).unwrap();

        let records = ledger.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].realized_profit, None);
        assert_eq!(records[1].realized_profit, Some(0.4));

        let reconciliation = ledger.reconcile().unwrap();
        assert_eq!(reconciliation.trades, 2);
        assert_eq!(reconciliation.settled, 1);
        assert!((reconciliation.expected_total - 0.8).abs() < 1e-12);
        assert!((reconciliation.settled_expected_total - 0.5).abs() < 1e-12);
        assert!((reconciliation.slippage() + 0.1).abs() < 1e-12);

        let err = ledger.record_realized("tx-9", 1.0).unwrap_err();
        assert_eq!(err.to_string(), "no trade recorded with reference tx-9");
    }

    #[test]
    fn test_memory_ledger() {
        exercise(&mut MemoryLedger::new());
    }

    #[test]
    fn test_jsonl_ledger() {
        let mut ledger = temp_ledger("roundtrip");
        exercise(&mut ledger);

        // A fresh handle on the same file sees the same history
        let reopened = JsonlLedger::new(ledger.path());
        assert_eq!(reopened.records().unwrap(), ledger.records().unwrap());
        assert_eq!(fs::read_to_string(ledger.path()).unwrap().lines().count(), 2);
        fs::remove_file(ledger.path()).unwrap();
    }

    #[test]
    fn test_missing_jsonl_file_is_empty() {
        let ledger = temp_ledger("missing");
        assert!(ledger.records().unwrap().is_empty());
        assert_eq!(ledger.reconcile().unwrap(), Reconciliation::default());
    }

    #[test]
    fn test_malformed_jsonl_line_reported() {
        let ledger = temp_ledger("malformed");
        fs::write(ledger.path(), "{not json}\n").unwrap();
        let err = ledger.records().unwrap_err();
        assert!(err.to_string().starts_with("malformed ledger line 1"));
        fs::remove_file(ledger.path()).unwrap();
    }
}
