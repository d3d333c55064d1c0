pub mod analysis;
pub mod charts;
pub mod daily_change;
pub mod klines;
pub mod models;
pub mod report;
pub mod simulation;
pub mod storage_utils;
pub mod tui;

pub use analysis::{Analysis, SymbolReport, SymbolStatus, run_analysis_pipeline};
pub use klines::{FetchError, FetchOutcome, HistorySource, YahooChartSource};
pub use models::{AnnotatedBar, AnnotatedSeries, Interval, Period, PriceBar, PriceSeries};
pub use simulation::{Classification, SimulationResult, SimulationStatus};
