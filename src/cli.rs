//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvCandleProvider;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::fallback_provider::FallbackProvider;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_strategy_store::JsonStrategyStore;
use crate::adapters::memory_cache::MemoryCandleCache;
use crate::domain::backfill::{DataIntegrityPipeline, EnsuredSeries};
use crate::domain::backtest::{BacktestConfig, BacktestResult, run_backtest};
use crate::domain::candle::{format_timestamp, normalize_series, parse_timestamp};
use crate::domain::config_validation::{
    DataConfig, load_backtest_config, load_data_config, load_run_window, load_strategy_set,
};
use crate::domain::error::{EngineError, ParseError};
use crate::domain::gaps::{DataQualityReport, assess_quality};
use crate::domain::strategy::{StrategySet, parse_indicator_list};
use crate::domain::timeframe::Timeframe;
use crate::ports::candle_port::{CandleProvider, CandleStore};
use crate::ports::config_port::ConfigPort;
use crate::ports::report_port::ReportPort;
use crate::ports::strategy_port::StrategyStore;

#[derive(Parser, Debug)]
#[command(name = "regimetrader", about = "Regime-switching single-asset backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest over the configured window
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Directory for trades.csv, audits.csv, snapshots.csv and metrics.csv
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Use the active strategy set from the strategy store
        #[arg(long, conflicts_with = "save_strategy")]
        from_store: bool,
        /// Save the configured strategy set as the active one before running
        #[arg(long)]
        save_strategy: bool,
        /// Evaluation time (defaults to the current time)
        #[arg(long)]
        now: Option<String>,
    },
    /// Report gaps, staleness and coverage without fetching anything
    CheckData {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        now: Option<String>,
    },
    /// Detect gaps and backfill them from the configured providers
    Backfill {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        now: Option<String>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List archived strategy sets for an asset
    StrategyHistory {
        #[arg(short, long)]
        config: PathBuf,
        /// Defaults to [backtest] symbol
        #[arg(long)]
        asset: Option<String>,
    },
    /// Re-activate an archived strategy set
    StrategyRestore {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        asset: Option<String>,
        #[arg(long)]
        version: u32,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Backtest {
            config,
            output,
            from_store,
            save_strategy,
            now,
        } => run_backtest_command(
            &config,
            output.as_deref(),
            from_store,
            save_strategy,
            now.as_deref(),
        ),
        Command::CheckData { config, now } => run_check_data(&config, now.as_deref()),
        Command::Backfill { config, now } => run_backfill(&config, now.as_deref()),
        Command::Validate { config } => run_validate(&config),
        Command::StrategyHistory { config, asset } => {
            run_strategy_history(&config, asset.as_deref())
        }
        Command::StrategyRestore {
            config,
            asset,
            version,
        } => run_strategy_restore(&config, asset.as_deref(), version),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

/// Everything a data or backtest command needs from one config file.
struct Settings {
    backtest: BacktestConfig,
    data: DataConfig,
}

fn load_settings(path: &Path) -> Result<(FileConfigAdapter, Settings), EngineError> {
    eprintln!("Loading config from {}", path.display());
    let adapter = FileConfigAdapter::from_file(path)?;
    let settings = Settings {
        backtest: load_backtest_config(&adapter)?,
        data: load_data_config(&adapter)?,
    };
    Ok((adapter, settings))
}

fn resolve_now(now: Option<&str>) -> Result<i64, EngineError> {
    match now {
        None => Ok(chrono::Utc::now().timestamp_millis()),
        Some(raw) => parse_timestamp(raw).ok_or_else(|| EngineError::ConfigInvalid {
            section: "cli".into(),
            key: "now".into(),
            reason: format!("invalid timestamp '{raw}'"),
        }),
    }
}

/// Quality is judged as of the end of the window for historical runs.
fn as_of(settings: &Settings, end: i64, now: i64) -> i64 {
    now.min(end + settings.backtest.timeframe.interval_ms())
}

fn build_provider(data: &DataConfig) -> FallbackProvider {
    let mut providers: Vec<Box<dyn CandleProvider>> = Vec::new();
    if let Some(dir) = &data.csv_dir {
        providers.push(Box::new(CsvCandleProvider::new(dir.clone())));
    }
    if providers.is_empty() {
        tracing::warn!("no candle providers configured, backfill will find nothing");
    }
    FallbackProvider::new(providers)
}

#[cfg(feature = "sqlite")]
fn open_store(data: &DataConfig, adapter: &FileConfigAdapter) -> Result<Box<dyn CandleStore>, EngineError> {
    use crate::adapters::sqlite_adapter::SqliteCandleStore;

    let store = match data.store_path {
        Some(_) => SqliteCandleStore::from_config(adapter)?,
        None => {
            tracing::info!("no [data] store_path, using an in-memory store");
            SqliteCandleStore::in_memory()?
        }
    };
    Ok(Box::new(store))
}

#[cfg(not(feature = "sqlite"))]
fn open_store(_data: &DataConfig, _adapter: &FileConfigAdapter) -> Result<Box<dyn CandleStore>, EngineError> {
    Err(EngineError::Database {
        reason: "the sqlite feature is required for candle storage".into(),
    })
}

fn ensure_series(
    adapter: &FileConfigAdapter,
    settings: &Settings,
    (start, end): (i64, i64),
    now: i64,
) -> Result<EnsuredSeries, EngineError> {
    let provider = build_provider(&settings.data);
    let store = open_store(&settings.data, adapter)?;
    let cache = MemoryCandleCache::new();
    let pipeline = DataIntegrityPipeline::new(&provider, store.as_ref(), &cache)
        .with_retry(settings.data.retry.clone())
        .with_min_candles(settings.data.min_candles);

    pipeline.ensure_series(
        &settings.backtest.symbol,
        settings.backtest.timeframe,
        start,
        end,
        as_of(settings, end, now),
    )
}

fn print_quality(report: &DataQualityReport) {
    println!(
        "valid: {}  coverage: {:.1}%  gaps: {}  missing: {}",
        report.is_valid,
        report.coverage,
        report.gap_count,
        report.missing_candles.len()
    );
    for issue in &report.issues {
        println!("  issue: {issue}");
    }
    for warning in &report.warnings {
        println!("  warning: {warning}");
    }
}

fn strategy_store(settings: &Settings) -> JsonStrategyStore {
    JsonStrategyStore::new(settings.data.strategy_dir.clone())
}

const STRATEGY_SECTIONS: [&str; 3] = ["bullish", "bearish", "neutral"];

/// The offending `indicators` entry with a caret under the error position.
fn indicator_error_context(config: &dyn ConfigPort, err: &ParseError) -> Option<String> {
    STRATEGY_SECTIONS.iter().find_map(|section| {
        let list = config.get_string(section, "indicators")?;
        let list = list.trim();
        let reparsed = parse_indicator_list(list).err()?;
        (reparsed.position == err.position && reparsed.message == err.message).then(|| {
            format!(
                "failed to parse [{section}] indicators:\n{}",
                err.display_with_context(list)
            )
        })
    })
}

fn load_configured_strategies(
    adapter: &FileConfigAdapter,
    timeframe: Timeframe,
) -> Result<StrategySet, EngineError> {
    load_strategy_set(adapter, timeframe).inspect_err(|e| {
        if let EngineError::IndicatorParse(parse) = e
            && let Some(context) = indicator_error_context(adapter, parse)
        {
            eprintln!("error: {context}");
        }
    })
}

fn resolve_strategy_set(
    adapter: &FileConfigAdapter,
    settings: &Settings,
    from_store: bool,
    save: bool,
    now: i64,
) -> Result<StrategySet, EngineError> {
    let symbol = &settings.backtest.symbol;
    if from_store {
        return strategy_store(settings)
            .load(symbol)?
            .ok_or_else(|| EngineError::StrategyStore {
                reason: format!("no active strategy set for {symbol}"),
            });
    }

    let set = load_configured_strategies(adapter, settings.backtest.timeframe)?;
    if save {
        strategy_store(settings).save(symbol, &set, now)?;
        eprintln!("Saved strategy set for {symbol}");
    }
    Ok(set)
}

fn print_summary(result: &BacktestResult) {
    let m = &result.metrics;
    println!("final value:    {:.2}", result.portfolio.total_value);
    println!("total return:   {:.2}%", m.total_return * 100.0);
    println!("max drawdown:   {:.2}%", m.max_drawdown * 100.0);
    println!("sharpe:         {:.3}", m.sharpe_ratio);
    println!("sortino:        {:.3}", m.sortino_ratio);
    println!(
        "closed trades:  {} ({} won, {} lost, {} even)",
        m.trades_won + m.trades_lost + m.trades_breakeven,
        m.trades_won,
        m.trades_lost,
        m.trades_breakeven
    );
    println!("win rate:       {:.1}%", m.win_rate * 100.0);
    println!("profit factor:  {:.2}", m.profit_factor);
    println!("stop exits:     {}", result.stop_exits);
    println!(
        "regimes:        {} bullish, {} bearish, {} neutral",
        result.regimes.bullish, result.regimes.bearish, result.regimes.neutral
    );
}

fn run_backtest_command(
    config_path: &Path,
    output: Option<&Path>,
    from_store: bool,
    save_strategy: bool,
    now: Option<&str>,
) -> Result<(), EngineError> {
    let (adapter, settings) = load_settings(config_path)?;
    let now = resolve_now(now)?;
    let window = load_run_window(&adapter)?;
    let set = resolve_strategy_set(&adapter, &settings, from_store, save_strategy, now)?;

    let ensured = ensure_series(&adapter, &settings, window, now)?;
    if !ensured.quality.is_valid {
        print_quality(&ensured.quality);
    }
    if ensured.candles.len() < settings.data.min_candles {
        return Err(EngineError::InsufficientData {
            symbol: settings.backtest.symbol.clone(),
            candles: ensured.candles.len(),
            minimum: settings.data.min_candles,
        });
    }

    eprintln!(
        "Running {} {} over {} candles ({} to {})",
        settings.backtest.symbol,
        settings.backtest.timeframe,
        ensured.candles.len(),
        format_timestamp(window.0),
        format_timestamp(window.1)
    );
    let result = run_backtest(&ensured.candles, &set, &settings.backtest)?;
    print_summary(&result);

    if let Some(dir) = output {
        CsvReportAdapter::new().write(&result, dir)?;
        eprintln!("Report written to {}", dir.display());
    }
    Ok(())
}

fn run_check_data(config_path: &Path, now: Option<&str>) -> Result<(), EngineError> {
    let (adapter, settings) = load_settings(config_path)?;
    let now = resolve_now(now)?;
    let (start, end) = load_run_window(&adapter)?;
    let store = open_store(&settings.data, &adapter)?;

    let candles = store.read(
        &settings.backtest.symbol,
        settings.backtest.timeframe,
        start,
        end,
    )?;
    let report = assess_quality(
        &normalize_series(candles),
        settings.backtest.timeframe,
        start,
        end,
        as_of(&settings, end, now),
        settings.data.min_candles,
    );
    print_quality(&report);
    Ok(())
}

fn run_backfill(config_path: &Path, now: Option<&str>) -> Result<(), EngineError> {
    let (adapter, settings) = load_settings(config_path)?;
    let now = resolve_now(now)?;
    let window = load_run_window(&adapter)?;
    let ensured = ensure_series(&adapter, &settings, window, now)?;

    let b = &ensured.backfill;
    println!(
        "batches: {}  filled: {}  unavailable: {}  failed: {}{}",
        b.batches,
        b.filled,
        b.unavailable,
        b.failed,
        if b.aborted { "  (aborted)" } else { "" }
    );
    print_quality(&ensured.quality);
    Ok(())
}

/// One line per regime slot; a missing neutral config runs the bearish one.
fn strategy_lines(set: &StrategySet) -> Vec<String> {
    let slots = [
        ("bullish", Some(&set.bullish)),
        ("bearish", Some(&set.bearish)),
        ("neutral", set.neutral.as_ref()),
    ];
    slots
        .into_iter()
        .map(|(slot, config)| match config {
            Some(c) => {
                let indicators = c
                    .indicators
                    .iter()
                    .map(|w| format!("{}x{}", w.indicator, w.weight))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{slot}: {} [{indicators}]", c.name)
            }
            None => format!("{slot}: {} (bearish fallback)", set.bearish.name),
        })
        .collect()
}

fn run_validate(config_path: &Path) -> Result<(), EngineError> {
    let (adapter, settings) = load_settings(config_path)?;
    let set = load_configured_strategies(&adapter, settings.backtest.timeframe)?;

    println!(
        "Config is valid: {} {}",
        settings.backtest.symbol, settings.backtest.timeframe
    );
    for line in strategy_lines(&set) {
        println!("  {line}");
    }
    Ok(())
}

fn run_strategy_history(config_path: &Path, asset: Option<&str>) -> Result<(), EngineError> {
    let (_, settings) = load_settings(config_path)?;
    let asset = asset.unwrap_or(settings.backtest.symbol.as_str());
    let store = strategy_store(&settings);

    match store.load(asset)? {
        Some(active) => println!(
            "active: bullish={} bearish={}",
            active.bullish.name, active.bearish.name
        ),
        None => println!("active: none"),
    }
    for archived in store.history(asset)? {
        println!(
            "v{}: bullish={} bearish={} active {} to {}",
            archived.version,
            archived.set.bullish.name,
            archived.set.bearish.name,
            format_timestamp(archived.activated_at),
            format_timestamp(archived.archived_at)
        );
    }
    Ok(())
}

fn run_strategy_restore(
    config_path: &Path,
    asset: Option<&str>,
    version: u32,
) -> Result<(), EngineError> {
    let (_, settings) = load_settings(config_path)?;
    let asset = asset.unwrap_or(settings.backtest.symbol.as_str());
    let now = chrono::Utc::now().timestamp_millis();

    let restored = strategy_store(&settings).restore(asset, version, now)?;
    println!(
        "Restored v{version} for {asset}: bullish={} bearish={}",
        restored.bullish.name, restored.bearish.name
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_failure(config: &FileConfigAdapter) -> ParseError {
        match load_strategy_set(config, Timeframe::H1) {
            Err(EngineError::IndicatorParse(e)) => e,
            other => panic!("expected an indicator parse error, got {other:?}"),
        }
    }

    #[test]
    fn caret_points_into_the_failing_section() {
        let config = FileConfigAdapter::from_string(
            "[bullish]\nindicators = rsi:14:1\n[bearish]\nindicators = rsi:14:1,stoch:3:1\n",
        )
        .unwrap();
        let err = parse_failure(&config);

        let context = indicator_error_context(&config, &err).unwrap();
        let lines: Vec<&str> = context.lines().collect();
        assert_eq!(lines[0], "failed to parse [bearish] indicators:");
        assert_eq!(lines[1], "rsi:14:1,stoch:3:1");
        assert_eq!(lines[2].trim_end(), format!("{}^", " ".repeat(err.position)));
    }

    #[test]
    fn no_context_when_indicators_parse() {
        let config = FileConfigAdapter::from_string(
            "[bullish]\nindicators = rsi:14:1\n[bearish]\nindicators = rsi:14:1\n",
        )
        .unwrap();
        let err = ParseError {
            message: "unrelated".into(),
            position: 0,
        };
        assert!(indicator_error_context(&config, &err).is_none());
    }

    #[test]
    fn missing_neutral_reports_bearish_fallback() {
        let config = FileConfigAdapter::from_string(
            "[bullish]\nname = up\nindicators = rsi:14:1\n[bearish]\nname = down\nindicators = momentum:5:1\n",
        )
        .unwrap();
        let set = load_strategy_set(&config, Timeframe::H1).unwrap();

        let lines = strategy_lines(&set);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("bullish: up ["));
        assert_eq!(lines[2], "neutral: down (bearish fallback)");
    }
}
