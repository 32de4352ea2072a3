//! File loaders for candles, backtest parameters and sweep grids.
//!
//! Candles: CSV with a header row, or JSON (an array, or `{"candles": [...]}`).
//! Params and grids: TOML or JSON, chosen by extension.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, warn};

use tradefuse_core::domain::{Candle, CandleFeatures, CandleLabel};

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    #[serde(default)]
    open: Option<f64>,
    #[serde(default)]
    high: Option<f64>,
    #[serde(default)]
    low: Option<f64>,
    close: f64,
    #[serde(default)]
    volume: Option<f64>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    signal_strength: Option<f64>,
    #[serde(default)]
    win_rate: Option<f64>,
    #[serde(default)]
    execution_quality: Option<f64>,
    #[serde(default)]
    volatility: Option<f64>,
    #[serde(default)]
    ensemble_confidence: Option<f64>,
    #[serde(default)]
    model_diversity: Option<f64>,
    #[serde(default)]
    signal_age_secs: Option<f64>,
    #[serde(default)]
    regime_alignment: Option<f64>,
    #[serde(default)]
    choppiness: Option<f64>,
    #[serde(default)]
    liquidity: Option<f64>,
}

impl CsvRow {
    fn into_candle(self, line: usize) -> Result<Candle> {
        let timestamp = parse_timestamp(&self.timestamp)
            .with_context(|| format!("line {line}: bad timestamp '{}'", self.timestamp))?;
        let label = match self.label.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => {
                let parsed = CandleLabel::parse(raw);
                if parsed.is_none() {
                    warn!(line, label = raw, "unknown candle label; treated as unlabeled");
                }
                parsed
            }
        };

        let mut features = CandleFeatures::default();
        let overrides = [
            (&mut features.signal_strength, self.signal_strength),
            (&mut features.win_rate, self.win_rate),
            (&mut features.execution_quality, self.execution_quality),
            (&mut features.volatility, self.volatility),
            (&mut features.ensemble_confidence, self.ensemble_confidence),
            (&mut features.model_diversity, self.model_diversity),
            (&mut features.signal_age_secs, self.signal_age_secs),
            (&mut features.regime_alignment, self.regime_alignment),
            (&mut features.choppiness, self.choppiness),
            (&mut features.liquidity, self.liquidity),
        ];
        for (slot, value) in overrides {
            if let Some(v) = value {
                *slot = v;
            }
        }

        Ok(Candle {
            timestamp,
            open: self.open.unwrap_or(self.close),
            high: self.high.unwrap_or(self.close),
            low: self.low.unwrap_or(self.close),
            close: self.close,
            volume: self.volume.unwrap_or(0.0),
            label,
            features,
        })
    }
}

/// Epoch milliseconds, RFC 3339, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD` (UTC).
pub fn parse_timestamp(raw: &str) -> Result<i64> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<i64>() {
        return Ok(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.timestamp_millis());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc().timestamp_millis());
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(dt) = d.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc().timestamp_millis());
        }
    }
    bail!("unrecognized timestamp format")
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CandleFile {
    List(Vec<Candle>),
    Wrapped { candles: Vec<Candle> },
}

pub fn load_candles(path: &Path) -> Result<Vec<Candle>> {
    let candles = match extension(path).as_str() {
        "csv" => load_csv(path)?,
        "json" => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read {}", path.display()))?;
            match serde_json::from_str::<CandleFile>(&text)
                .with_context(|| format!("parse candles JSON {}", path.display()))?
            {
                CandleFile::List(c) | CandleFile::Wrapped { candles: c } => c,
            }
        }
        other => bail!("unsupported candle file extension '{other}' (expected csv or json)"),
    };
    if candles.is_empty() {
        bail!("{} contains no candles", path.display());
    }
    if candles.windows(2).any(|w| w[1].timestamp < w[0].timestamp) {
        warn!(path = %path.display(), "candles are not in timestamp order; replaying as given");
    }
    debug!(path = %path.display(), count = candles.len(), "candles loaded");
    Ok(candles)
}

fn load_csv(path: &Path) -> Result<Vec<Candle>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("open {}", path.display()))?;
    let mut candles = Vec::new();
    for (i, row) in reader.deserialize::<CsvRow>().enumerate() {
        // Header is line 1.
        let line = i + 2;
        let row = row.with_context(|| format!("{}: line {line}", path.display()))?;
        candles.push(row.into_candle(line)?);
    }
    Ok(candles)
}

/// Load a TOML or JSON document into `T`.
pub fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    match extension(path).as_str() {
        "toml" => toml::from_str(&text).with_context(|| format!("parse TOML {}", path.display())),
        "json" => serde_json::from_str(&text).with_context(|| format!("parse JSON {}", path.display())),
        other => bail!("unsupported extension '{other}' for {} (expected toml or json)", path.display()),
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tradefuse_core::backtest::{BacktestParams, ParamGrid};

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn csv_with_optional_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "candles.csv",
            "timestamp,close,label,win_rate\n\
             1700000000000,100.0,STRONG_BUY,0.8\n\
             2024-01-02,100.5,,\n\
             2024-01-02T01:00:00Z,101.0,sideways,\n",
        );
        let candles = load_candles(&path).unwrap();
        assert_eq!(candles.len(), 3);
        assert_eq!(candles[0].label, Some(CandleLabel::StrongBuy));
        assert_eq!(candles[0].features.win_rate, 0.8);
        assert_eq!(candles[0].open, 100.0);
        assert_eq!(candles[1].label, None);
        assert_eq!(candles[1].features.win_rate, CandleFeatures::default().win_rate);
        assert_eq!(candles[2].label, None);
        assert_eq!(candles[2].timestamp - candles[1].timestamp, 3_600_000);
    }

    #[test]
    fn json_array_and_wrapped() {
        let dir = tempfile::tempdir().unwrap();
        let one = r#"{"timestamp":0,"open":1,"high":1,"low":1,"close":1,"label":"strong_sell"}"#;
        let a = write(&dir, "a.json", &format!("[{one}]"));
        let b = write(&dir, "b.json", &format!(r#"{{"candles":[{one},{one}]}}"#));
        assert_eq!(load_candles(&a).unwrap()[0].label, Some(CandleLabel::StrongSell));
        assert_eq!(load_candles(&b).unwrap().len(), 2);
    }

    #[test]
    fn rejects_empty_and_unknown_formats() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_candles(&write(&dir, "empty.json", "[]")).is_err());
        assert!(load_candles(&write(&dir, "x.parquet", "")).is_err());
        let bad = write(&dir, "bad.csv", "timestamp,close\nyesterday,1\n");
        let err = format!("{:#}", load_candles(&bad).unwrap_err());
        assert!(err.contains("line 2"), "{err}");
    }

    #[test]
    fn params_and_grid_documents() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(
            &dir,
            "params.toml",
            "profit_pct = 0.01\nloss_pct = 0.004\nmin_hold = 6\ntrade_quality = 45.0\nfee_rate = 0.001\n",
        );
        let params: BacktestParams = load_document(&p).unwrap();
        assert_eq!(params.min_hold, 6);
        assert_eq!(params.fee_rate, 0.001);

        let g = write(
            &dir,
            "grid.json",
            r#"{"profit_pcts":[0.01],"loss_pcts":[0.002,0.004],"min_holds":[4],"trade_qualities":[0,50]}"#,
        );
        let grid: ParamGrid = load_document(&g).unwrap();
        assert_eq!(grid.size(), 4);
    }

    #[test]
    fn timestamp_formats() {
        assert_eq!(parse_timestamp("1700000000000").unwrap(), 1_700_000_000_000);
        assert_eq!(parse_timestamp("1970-01-01").unwrap(), 0);
        assert_eq!(parse_timestamp("1970-01-01 00:00:01").unwrap(), 1_000);
        assert!(parse_timestamp("soon").is_err());
    }
}
