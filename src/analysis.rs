//! The per-refresh analysis pipeline.
//!
//! For every selected symbol:
//! 1. Fetches and cleans the price history.
//! 2. Annotates it with daily percentage changes.
//! 3. Builds the candlestick and daily-change chart specs.
//! 4. Simulates the investment over the window.
//!
//! Each symbol is handled independently; a failure on one only marks that
//! symbol as having no data.

use indexmap::IndexMap;
use serde::Serialize;

use crate::charts::{self, ChartSpec};
use crate::daily_change;
use crate::klines::{self, FetchError, FetchOutcome, HistorySource};
use crate::models::{AnnotatedSeries, Interval, Period, PriceSeries};
use crate::simulation::{self, SimulationError, SimulationResult, SimulationStatus};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SymbolStatus {
    FetchedOk,
    NoData,
    InsufficientData,
}

#[derive(Debug, Clone)]
pub struct Analysis {
    pub series: PriceSeries,
    pub annotated: AnnotatedSeries,
    pub candlestick: ChartSpec,
    pub daily_change: ChartSpec,
    pub simulation: SimulationResult,
}

#[derive(Debug)]
pub enum SymbolReport {
    NoData { reason: FetchError },
    Ready(Box<Analysis>),
}

impl SymbolReport {
    pub fn status(&self) -> SymbolStatus {
        match self {
            SymbolReport::NoData { .. } => SymbolStatus::NoData,
            SymbolReport::Ready(analysis) => match analysis.simulation.status {
                SimulationStatus::InsufficientData => SymbolStatus::InsufficientData,
                _ => SymbolStatus::FetchedOk,
            },
        }
    }

    pub fn analysis(&self) -> Option<&Analysis> {
        match self {
            SymbolReport::Ready(analysis) => Some(analysis),
            SymbolReport::NoData { .. } => None,
        }
    }
}

/// Runs the pure stages on an already fetched series.
pub fn analyze(
    symbol: &str,
    series: PriceSeries,
    principal: f64,
) -> Result<Analysis, SimulationError> {
    let annotated = daily_change::annotate(&series);
    let simulation = simulation::simulate(&annotated, principal)?;

    if let SimulationStatus::Degenerate { first_index } = simulation.status {
        log::warn!(
            "{}: simulated value hit {:.4} at bar {}",
            symbol,
            simulation.trajectory.multipliers[first_index],
            first_index
        );
    }

    Ok(Analysis {
        candlestick: charts::build_candlestick(&series, symbol),
        daily_change: charts::build_daily_change_line(&annotated, symbol),
        series,
        annotated,
        simulation,
    })
}

/// Fetches every symbol concurrently and analyzes what came back.
///
/// Symbols are trimmed and upper-cased first. Results keep the selection
/// order and are keyed by the normalized symbol, so `aapl` and `AAPL` are
/// analyzed once. Symbols that cannot be tickers are reported without a fetch.
pub async fn run_analysis_pipeline(
    source: &dyn HistorySource,
    symbols: &[String],
    period: Period,
    interval: Interval,
    principal: f64,
) -> Result<IndexMap<String, SymbolReport>, SimulationError> {
    let principal = simulation::validate_principal(principal)?;

    let mut selected: IndexMap<String, Option<FetchError>> = IndexMap::with_capacity(symbols.len());
    for raw in symbols {
        match klines::normalize_symbol(raw) {
            Ok(symbol) => {
                selected.entry(symbol).or_insert(None);
            }
            Err(e) => {
                log::warn!("skipping {:?}: {}", raw, e);
                selected.entry(raw.trim().to_string()).or_insert(Some(e));
            }
        }
    }

    let tasks = selected.into_iter().map(move |(symbol, rejected)| async move {
        let outcome = match rejected {
            None => klines::fetch(source, &symbol, period, interval).await,
            Some(reason) => FetchOutcome::NotFound(reason),
        };
        (symbol, outcome)
    });
    let outcomes = futures::future::join_all(tasks).await;

    let mut reports = IndexMap::with_capacity(outcomes.len());
    for (symbol, outcome) in outcomes {
        let report = match outcome {
            FetchOutcome::Found(series) => {
                SymbolReport::Ready(Box::new(analyze(&symbol, series, principal)?))
            }
            FetchOutcome::NotFound(reason) => SymbolReport::NoData { reason },
        };
        reports.insert(symbol, report);
    }

    log::info!(
        "pipeline finished: {} of {} symbols with data",
        reports.values().filter(|r| r.analysis().is_some()).count(),
        reports.len()
    );

    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::klines::test_support::FakeSource;
    use crate::simulation::Classification;

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn one_failure_does_not_affect_other_symbols() {
        let source = FakeSource::default()
            .with("AAPL", &[100.0, 110.0, 99.0])
            .with("MSFT", &[50.0, 55.0]);

        let reports = run_analysis_pipeline(
            &source,
            &symbols(&["AAPL", "NOPE", "MSFT"]),
            Period::OneYear,
            Interval::OneDay,
            1000.0,
        )
        .await
        .unwrap();

        let keys: Vec<&str> = reports.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["AAPL", "NOPE", "MSFT"]);

        assert_eq!(reports["NOPE"].status(), SymbolStatus::NoData);
        assert_eq!(reports["AAPL"].status(), SymbolStatus::FetchedOk);
        assert_eq!(reports["MSFT"].status(), SymbolStatus::FetchedOk);

        let aapl = reports["AAPL"].analysis().unwrap();
        assert!((aapl.simulation.final_value - 990.0).abs() < 1e-9);
        assert_eq!(aapl.simulation.classification, Some(Classification::Loss));

        let msft = reports["MSFT"].analysis().unwrap();
        assert!((msft.simulation.final_value - 1100.0).abs() < 1e-9);
        assert_eq!(msft.candlestick.layout.title, "Candlestick Chart - MSFT");
    }

    #[tokio::test]
    async fn single_bar_symbol_is_insufficient_data() {
        let source = FakeSource::default().with("ARM", &[120.0]);
        let reports = run_analysis_pipeline(
            &source,
            &symbols(&["ARM"]),
            Period::OneYear,
            Interval::OneDay,
            10.0,
        )
        .await
        .unwrap();

        assert_eq!(reports["ARM"].status(), SymbolStatus::InsufficientData);
    }

    #[tokio::test]
    async fn duplicates_are_analyzed_once() {
        let source = FakeSource::default().with("AMD", &[1.0, 2.0]);
        let reports = run_analysis_pipeline(
            &source,
            &symbols(&["AMD", "AMD"]),
            Period::OneYear,
            Interval::OneDay,
            10.0,
        )
        .await
        .unwrap();
        assert_eq!(reports.len(), 1);
    }

    #[tokio::test]
    async fn symbols_differing_in_case_or_spacing_are_one_entry() {
        let source = FakeSource::default().with("AAPL", &[100.0, 101.0]);
        let reports = run_analysis_pipeline(
            &source,
            &symbols(&["AAPL", "aapl", " AAPL"]),
            Period::OneYear,
            Interval::OneDay,
            10.0,
        )
        .await
        .unwrap();

        let keys: Vec<&str> = reports.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["AAPL"]);
        let aapl = reports["AAPL"].analysis().unwrap();
        assert_eq!(aapl.candlestick.layout.title, "Candlestick Chart - AAPL");
    }

    #[tokio::test]
    async fn lowercase_symbol_is_keyed_and_labelled_upper_case() {
        let source = FakeSource::default().with("MSFT", &[50.0, 55.0]);
        let reports = run_analysis_pipeline(
            &source,
            &symbols(&["msft"]),
            Period::OneYear,
            Interval::OneDay,
            10.0,
        )
        .await
        .unwrap();

        assert!(!reports.contains_key("msft"));
        let msft = reports["MSFT"].analysis().unwrap();
        assert_eq!(msft.daily_change.layout.title, "Daily Profit/Loss - MSFT");
    }

    #[tokio::test]
    async fn malformed_symbol_is_reported_without_a_fetch() {
        let source = FakeSource::default().with("AMD", &[1.0, 2.0]);
        let reports = run_analysis_pipeline(
            &source,
            &symbols(&["AMD", "not a ticker!"]),
            Period::OneYear,
            Interval::OneDay,
            10.0,
        )
        .await
        .unwrap();

        let keys: Vec<&str> = reports.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["AMD", "not a ticker!"]);
        assert!(matches!(
            reports["not a ticker!"],
            SymbolReport::NoData {
                reason: FetchError::InvalidSymbol(_)
            }
        ));
    }

    #[tokio::test]
    async fn invalid_principal_fails_the_batch() {
        let source = FakeSource::default().with("AMD", &[1.0, 2.0]);
        let err = run_analysis_pipeline(
            &source,
            &symbols(&["AMD"]),
            Period::OneYear,
            Interval::OneDay,
            0.0,
        )
        .await
        .unwrap_err();
        assert_eq!(err, SimulationError::InvalidPrincipal(0.0));
    }

    #[test]
    fn degenerate_series_still_reports_data() {
        let series = crate::models::test_support::daily_series(&[4.0, 0.0, 0.0]);
        let analysis = analyze("WIPE", series, 100.0).unwrap();
        assert_eq!(analysis.simulation.status, SimulationStatus::Degenerate { first_index: 1 });
        assert_eq!(SymbolReport::Ready(Box::new(analysis)).status(), SymbolStatus::FetchedOk);
    }
}
