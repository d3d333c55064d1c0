//! Renderer-agnostic chart descriptions.
//!
//! A [`ChartSpec`] serializes to a plotly-style figure (`data` + `layout`),
//! and the terminal dashboard draws the same value with ratatui.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{AnnotatedSeries, PriceSeries};

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trace {
    Candlestick {
        name: String,
        x: Vec<DateTime<Utc>>,
        open: Vec<f64>,
        high: Vec<f64>,
        low: Vec<f64>,
        close: Vec<f64>,
    },
    /// `None` in `y` is a gap in the line, never a zero.
    Scatter {
        name: String,
        mode: &'static str,
        x: Vec<DateTime<Utc>>,
        y: Vec<Option<f64>>,
    },
}

impl Trace {
    /// Number of points a renderer actually draws.
    pub fn plotted_points(&self) -> usize {
        match self {
            Trace::Candlestick { close, .. } => close.len(),
            Trace::Scatter { y, .. } => y.iter().filter(|v| v.is_some()).count(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Axis {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rangeslider: Option<RangeSlider>,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct RangeSlider {
    pub visible: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Layout {
    pub title: String,
    pub xaxis: Axis,
    pub yaxis: Axis,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ChartSpec {
    pub data: Vec<Trace>,
    pub layout: Layout,
}

impl ChartSpec {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn axis(title: &str) -> Axis {
    Axis {
        title: title.to_string(),
        rangeslider: None,
    }
}

pub fn build_candlestick(series: &PriceSeries, label: &str) -> ChartSpec {
    let bars = series.bars();

    let trace = Trace::Candlestick {
        name: label.to_string(),
        x: bars.iter().map(|b| b.timestamp).collect(),
        open: bars.iter().map(|b| b.open).collect(),
        high: bars.iter().map(|b| b.high).collect(),
        low: bars.iter().map(|b| b.low).collect(),
        close: bars.iter().map(|b| b.close).collect(),
    };

    ChartSpec {
        data: vec![trace],
        layout: Layout {
            title: format!("Candlestick Chart - {}", label),
            xaxis: Axis {
                rangeslider: Some(RangeSlider { visible: false }),
                ..axis("Date")
            },
            yaxis: axis("Stock Price"),
        },
    }
}

pub fn build_daily_change_line(annotated: &AnnotatedSeries, label: &str) -> ChartSpec {
    // Leading undefined values are dropped; interior ones stay as gaps.
    let (x, y) = annotated
        .rows()
        .iter()
        .skip_while(|r| r.daily_change.is_none())
        .map(|r| (r.bar.timestamp, r.daily_change))
        .unzip();

    let trace = Trace::Scatter {
        name: "Daily Change".to_string(),
        mode: "lines",
        x,
        y,
    };

    ChartSpec {
        data: vec![trace],
        layout: Layout {
            title: format!("Daily Profit/Loss - {}", label),
            xaxis: axis("Date"),
            yaxis: axis("Percentage Change"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daily_change::annotate;
    use crate::models::test_support::{day, daily_series};

    #[test]
    fn candlestick_has_one_ohlc_trace_without_rangeslider() {
        let series = daily_series(&[10.0, 11.0, 12.0]);
        let chart = build_candlestick(&series, "AAPL");

        assert_eq!(chart.layout.title, "Candlestick Chart - AAPL");
        assert_eq!(chart.layout.yaxis.title, "Stock Price");
        assert_eq!(chart.layout.xaxis.rangeslider, Some(RangeSlider { visible: false }));
        assert_eq!(chart.data.len(), 1);

        match &chart.data[0] {
            Trace::Candlestick { x, close, high, .. } => {
                assert_eq!(x, &vec![day(0), day(1), day(2)]);
                assert_eq!(close, &vec![10.0, 11.0, 12.0]);
                assert_eq!(high.len(), 3);
            }
            other => panic!("expected candlestick trace, got {:?}", other),
        }
    }

    #[test]
    fn daily_change_line_skips_undefined_first_point() {
        let annotated = annotate(&daily_series(&[100.0, 110.0, 99.0]));
        let chart = build_daily_change_line(&annotated, "MSFT");

        assert_eq!(chart.layout.title, "Daily Profit/Loss - MSFT");
        let trace = &chart.data[0];
        assert!(trace.plotted_points() <= annotated.len());
        assert_eq!(trace.plotted_points(), 2);

        match trace {
            Trace::Scatter { x, y, mode, .. } => {
                assert_eq!(*mode, "lines");
                assert_eq!(x[0], day(1));
                assert!(y.iter().all(Option::is_some));
            }
            other => panic!("expected scatter trace, got {:?}", other),
        }
    }

    #[test]
    fn interior_undefined_change_is_a_gap_not_zero() {
        let annotated = annotate(&daily_series(&[5.0, 0.0, 2.0, 3.0]));
        let chart = build_daily_change_line(&annotated, "X");

        match &chart.data[0] {
            Trace::Scatter { y, .. } => {
                assert_eq!(y.len(), 3);
                assert_eq!(y[1], None);
                assert_eq!(chart.data[0].plotted_points(), 2);
            }
            other => panic!("expected scatter trace, got {:?}", other),
        }
    }

    #[test]
    fn single_bar_yields_empty_line() {
        let annotated = annotate(&daily_series(&[5.0]));
        let chart = build_daily_change_line(&annotated, "X");
        assert_eq!(chart.data[0].plotted_points(), 0);
    }

    #[test]
    fn serializes_to_plotly_figure_shape() {
        let annotated = annotate(&daily_series(&[1.0, 0.0, 1.0]));
        let value = serde_json::to_value(build_daily_change_line(&annotated, "T")).unwrap();

        assert_eq!(value["data"][0]["type"], "scatter");
        assert_eq!(value["data"][0]["y"][1], serde_json::Value::Null);
        assert_eq!(value["layout"]["xaxis"]["title"], "Date");
        assert!(value["layout"]["xaxis"].get("rangeslider").is_none());

        let candle = serde_json::to_value(build_candlestick(&daily_series(&[1.0]), "T")).unwrap();
        assert_eq!(candle["data"][0]["type"], "candlestick");
        assert_eq!(candle["layout"]["xaxis"]["rangeslider"]["visible"], false);
    }
}
