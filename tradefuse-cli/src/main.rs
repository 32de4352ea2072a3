//! TradeFuse CLI: backtests, parameter sweeps, live state inspection.
//!
//! Commands:
//! - `backtest`: replay labeled candles with one parameter set
//! - `sweep`: replay candles across a parameter grid (parallel)
//! - `state`: print a persisted position state file
//! - `config`: print default live config TOML, or validate a config file

mod loader;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

use tradefuse_core::backtest::{self, sweep, BacktestParams, BacktestReport, BacktestRun, ParamGrid};
use tradefuse_core::domain::Candle;
use tradefuse_live::{LiveConfig, PersistedState};

#[derive(Parser)]
#[command(name = "tradefuse", about = "TradeFuse CLI: signal fusion, backtesting and position state")]
struct Cli {
    /// Default log filter when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one backtest over a candle file.
    Backtest {
        /// Candle file (.csv or .json).
        candles: PathBuf,

        /// Parameter file (.toml or .json). Defaults to built-in params.
        #[arg(long)]
        params: Option<PathBuf>,

        #[arg(long)]
        profit_pct: Option<f64>,

        #[arg(long)]
        loss_pct: Option<f64>,

        #[arg(long)]
        min_hold: Option<usize>,

        /// Minimum trade quality score (0-100) to enter.
        #[arg(long)]
        trade_quality: Option<f64>,

        #[arg(long)]
        fee_rate: Option<f64>,

        /// Write the report JSON here.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Also print every trade.
        #[arg(long, default_value_t = false)]
        trades: bool,
    },
    /// Run a parameter grid over a candle file.
    Sweep {
        candles: PathBuf,

        /// Grid file (.toml or .json). Defaults to the built-in grid.
        #[arg(long)]
        grid: Option<PathBuf>,

        /// Base params supplying costs, clock and scorer weights.
        #[arg(long)]
        params: Option<PathBuf>,

        #[arg(long)]
        output: Option<PathBuf>,

        /// Rows to print, best total PnL first.
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Inspect a persisted position state file.
    State {
        /// State file. Overrides the path from --config.
        #[arg(long)]
        path: Option<PathBuf>,

        /// Live config TOML to take `state_path` from.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Include closed positions.
        #[arg(long, default_value_t = false)]
        all: bool,
    },
    /// Print the default live config, or validate a config file.
    Config {
        path: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tradefuse_live::logging::init(&cli.log);

    match cli.command {
        Commands::Backtest {
            candles,
            params,
            profit_pct,
            loss_pct,
            min_hold,
            trade_quality,
            fee_rate,
            output,
            trades,
        } => {
            let mut p = load_params(params.as_deref())?;
            if let Some(v) = profit_pct {
                p.profit_pct = v;
            }
            if let Some(v) = loss_pct {
                p.loss_pct = v;
            }
            if let Some(v) = min_hold {
                p.min_hold = v;
            }
            if let Some(v) = trade_quality {
                p.trade_quality = v;
            }
            if let Some(v) = fee_rate {
                p.fee_rate = v;
            }
            run_backtest_cmd(&candles, p, output.as_deref(), trades)
        }
        Commands::Sweep {
            candles,
            grid,
            params,
            output,
            top,
        } => run_sweep_cmd(&candles, grid.as_deref(), params.as_deref(), output.as_deref(), top),
        Commands::State { path, config, all } => run_state_cmd(path, config, all),
        Commands::Config { path } => run_config_cmd(path.as_deref()),
    }
}

fn load_params(path: Option<&Path>) -> Result<BacktestParams> {
    match path {
        Some(p) => loader::load_document(p),
        None => Ok(BacktestParams::default()),
    }
}

fn run_backtest_cmd(candles_path: &Path, params: BacktestParams, output: Option<&Path>, show_trades: bool) -> Result<()> {
    params.validate().context("invalid backtest parameters")?;
    let candles = loader::load_candles(candles_path)?;
    info!(candles = candles.len(), run_id = %params.run_id().short(), "running backtest");

    let run = backtest_once(&candles, &params)?;
    print_run_summary(&run);
    if show_trades {
        print_trades(&run);
    }

    let report = BacktestReport::new(candles_path.display().to_string(), vec![run]);
    if let Some(out) = output {
        write_report(&report, out)?;
    }
    Ok(())
}

/// One validated run, scored with the weights from `params`.
fn backtest_once(candles: &[Candle], params: &BacktestParams) -> Result<BacktestRun> {
    params.validate().context("invalid backtest parameters")?;
    Ok(backtest::run(candles, params))
}

fn run_sweep_cmd(
    candles_path: &Path,
    grid_path: Option<&Path>,
    params_path: Option<&Path>,
    output: Option<&Path>,
    top: usize,
) -> Result<()> {
    let grid: ParamGrid = match grid_path {
        Some(p) => loader::load_document(p)?,
        None => ParamGrid::default(),
    };
    let base = load_params(params_path)?;
    let params = grid.expand(&base).context("expand parameter grid")?;
    let candles = loader::load_candles(candles_path)?;
    info!(candles = candles.len(), runs = params.len(), "running sweep");

    let report = BacktestReport::new(candles_path.display().to_string(), sweep(&candles, &params));

    let mut ranked: Vec<&BacktestRun> = report.runs.iter().collect();
    ranked.sort_by(|a, b| b.stats.total_pnl.total_cmp(&a.stats.total_pnl));
    println!(
        "{:<12} {:>8} {:>8} {:>5} {:>6} {:>7} {:>10} {:>7} {:>10}",
        "Run", "Profit", "Loss", "Hold", "Qual", "Trades", "PnL", "Win%", "MaxDD"
    );
    println!("{}", "-".repeat(82));
    for run in ranked.iter().take(top) {
        println!(
            "{:<12} {:>8.4} {:>8.4} {:>5} {:>6.1} {:>7} {:>10.4} {:>6.1}% {:>10.4}",
            run.run_id.short(),
            run.params.profit_pct,
            run.params.loss_pct,
            run.params.min_hold,
            run.params.trade_quality,
            run.stats.num_trades,
            run.stats.total_pnl,
            run.stats.win_rate * 100.0,
            run.stats.max_drawdown,
        );
    }
    if let Some(best) = report.best_by_pnl() {
        println!();
        println!("Best: {} (total PnL {:.4})", best.run_id.short(), best.stats.total_pnl);
    }

    if let Some(out) = output {
        write_report(&report, out)?;
    }
    Ok(())
}

fn print_run_summary(run: &BacktestRun) {
    let s = &run.stats;
    println!();
    println!("=== Backtest {} ===", run.run_id.short());
    println!(
        "Params:        profit {:.4}  loss {:.4}  min_hold {}  quality >= {:.1}",
        run.params.profit_pct, run.params.loss_pct, run.params.min_hold, run.params.trade_quality
    );
    println!("Trades:        {}", s.num_trades);
    println!("Total PnL:     {:.6}", s.total_pnl);
    println!("Avg PnL:       {:.6}", s.avg_pnl);
    println!("Win rate:      {:.1}%", s.win_rate * 100.0);
    println!("Max drawdown:  {:.6}", s.max_drawdown);
    println!("Avg hold:      {:.1} candles", s.avg_hold_time);
    if let Some(idx) = s.open_at_end {
        println!("Open at end:   entry index {idx} (not in realized stats)");
    }
    let labels: Vec<String> = s.signal_count.iter().map(|(k, v)| format!("{k}={v}")).collect();
    println!("Labels:        {}", labels.join(" "));
    let reasons: Vec<String> = s.no_trade_reasons.iter().map(|(k, v)| format!("{k}={v}")).collect();
    if !reasons.is_empty() {
        println!("No-trade:      {}", reasons.join(" "));
    }
}

fn print_trades(run: &BacktestRun) {
    println!();
    println!(
        "{:<6} {:>6} {:>6} {:>12} {:>12} {:>10} {:<8} {:>6}",
        "Side", "Entry", "Exit", "EntryPx", "ExitPx", "PnL", "Reason", "Qual"
    );
    for t in &run.trades {
        println!(
            "{:<6} {:>6} {:>6} {:>12.4} {:>12.4} {:>10.6} {:<8} {:>6.1}",
            t.side.to_string(),
            t.entry_idx,
            t.exit_idx,
            t.entry,
            t.exit,
            t.pnl,
            t.reason.to_string(),
            t.trade_quality
        );
    }
}

fn write_report(report: &BacktestReport, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
    println!("Report written to: {}", path.display());
    Ok(())
}

fn run_state_cmd(path: Option<PathBuf>, config: Option<PathBuf>, all: bool) -> Result<()> {
    let path = match (path, config) {
        (Some(p), _) => p,
        (None, Some(c)) => LiveConfig::from_file(&c)?.state_path,
        (None, None) => LiveConfig::default().state_path,
    };
    if !path.exists() {
        println!("No state file at {}", path.display());
        return Ok(());
    }
    let text = std::fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let state: PersistedState =
        serde_json::from_str(&text).with_context(|| format!("parse state file {}", path.display()))?;

    let updated = chrono::DateTime::from_timestamp_millis(state.updated_at)
        .map(|d| d.to_rfc3339())
        .unwrap_or_else(|| state.updated_at.to_string());
    println!("State:   {}", path.display());
    println!("Updated: {updated}");
    println!("Tracked: {} ({} open)", state.tracked.len(), state.open_count());
    println!();
    println!(
        "{:<24} {:<10} {:<6} {:<7} {:>12} {:>10} {:>12} {:>12} {:<12}",
        "Id", "Symbol", "Side", "Status", "Entry", "Amount", "Last/Exit", "PnL", "Reason"
    );
    for p in state.tracked.values().filter(|p| all || p.open) {
        let (status, px, pnl) = if p.open {
            ("open", p.last_price, p.unrealized_pnl())
        } else {
            ("closed", p.exit_price, p.realized_pnl)
        };
        println!(
            "{:<24} {:<10} {:<6} {:<7} {:>12.4} {:>10.6} {:>12} {:>12} {:<12}",
            p.id.to_string(),
            p.symbol.as_deref().unwrap_or("-"),
            p.side.to_string(),
            status,
            p.entry_price,
            p.amount,
            fmt_opt(px, 4),
            fmt_opt(pnl, 6),
            p.closed_reason.map(|r| r.to_string()).unwrap_or_default(),
        );
    }
    Ok(())
}

fn fmt_opt(v: Option<f64>, decimals: usize) -> String {
    v.map(|x| format!("{x:.decimals$}")).unwrap_or_else(|| "-".to_string())
}

fn run_config_cmd(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            let cfg = LiveConfig::from_file(p).with_context(|| format!("config {}", p.display()))?;
            println!("{} is valid", p.display());
            println!("{}", cfg.to_toml()?);
        }
        None => println!("{}", LiveConfig::default().to_toml()?),
    }
    Ok(())
}
