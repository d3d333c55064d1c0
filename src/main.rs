use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use std::fs::{File, OpenOptions};
use std::sync::Arc;

use stock_dashboard::analysis::{self, SymbolReport};
use stock_dashboard::klines::{HistorySource, YahooChartSource};
use stock_dashboard::models::{Interval, Period};
use stock_dashboard::report;
use stock_dashboard::storage_utils::{AppConfig, AsyncStorageManager};
use stock_dashboard::tui;

#[derive(Parser)]
#[command(version, about = "Stock price dashboard")]
struct Cli {
    #[command(subcommand)]
    cmd: Option<Cmd>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Interactive terminal dashboard (default)
    Tui(SelectionArgs),
    /// Fetch once and print tables
    Report {
        #[command(flatten)]
        selection: SelectionArgs,
        /// Also print the chart specs as JSON
        #[arg(long)]
        charts: bool,
        /// Clear the terminal before printing
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Args, Default)]
struct SelectionArgs {
    /// Comma separated symbols, e.g. AAPL,MSFT
    #[arg(long, value_delimiter = ',')]
    symbols: Vec<String>,
    #[arg(long)]
    principal: Option<f64>,
    #[arg(long)]
    period: Option<Period>,
    #[arg(long)]
    interval: Option<Interval>,
}

impl SelectionArgs {
    /// Applies command-line overrides and returns the selected symbols.
    fn apply(self, config: &mut AppConfig) -> Result<Vec<String>> {
        if let Some(principal) = self.principal {
            config.principal = principal;
        }
        if let Some(period) = self.period {
            config.default_period = period;
        }
        if let Some(interval) = self.interval {
            config.default_interval = interval;
        }
        config.validate()?;

        Ok(self
            .symbols
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }
}

fn init_log(target: Option<File>) {
    let mut builder = env_logger::Builder::new();

    builder
        .filter(None, log::LevelFilter::Warn)
        .filter(Some("stock_dashboard"), log::LevelFilter::Info)
        .parse_default_env();

    // The TUI owns the terminal, so its logs go to a file.
    if let Some(file) = target {
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = AsyncStorageManager::new_relative("storage").await?;
    let cmd = cli.cmd.unwrap_or(Cmd::Tui(SelectionArgs::default()));

    let log_file = match cmd {
        Cmd::Tui(_) => Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(storage.path_for("dashboard.log"))?,
        ),
        Cmd::Report { .. } => None,
    };
    init_log(log_file);

    let mut config = storage.load_or_init_config().await?;

    match cmd {
        Cmd::Tui(selection) => {
            let selected = selection.apply(&mut config)?;
            let source: Arc<dyn HistorySource> =
                Arc::new(YahooChartSource::new(config.fetch_timeout())?);
            tui::run_tui(source, config, selected).await
        }
        Cmd::Report { selection, charts, clear } => {
            let selected = selection.apply(&mut config)?;
            if selected.is_empty() {
                bail!("pass at least one symbol with --symbols");
            }
            let source = YahooChartSource::new(config.fetch_timeout())?;

            let reports = analysis::run_analysis_pipeline(
                &source,
                &selected,
                config.default_period,
                config.default_interval,
                config.principal,
            )
            .await?;

            if clear {
                clearscreen::clear()?;
            }
            println!("{}", report::render(&reports, config.default_interval, config.table_rows));

            if charts {
                for ready in reports.values().filter_map(SymbolReport::analysis) {
                    println!("{}", ready.daily_change.to_json()?);
                    println!("{}", ready.candlestick.to_json()?);
                }
            }
            Ok(())
        }
    }
}
