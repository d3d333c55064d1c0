use crate::models::{AnnotatedBar, AnnotatedSeries, PriceSeries};

/// Percentage change of `close` against `prev_close`. Undefined when the
/// previous close is zero.
fn pct_change(prev_close: f64, close: f64) -> Option<f64> {
    if prev_close == 0.0 {
        return None;
    }
    Some((close - prev_close) / prev_close * 100.0)
}

/// Attaches a daily percentage change to every bar. The first bar has none.
pub fn annotate(series: &PriceSeries) -> AnnotatedSeries {
    let bars = series.bars();

    let rows = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| AnnotatedBar {
            bar: *bar,
            daily_change: i
                .checked_sub(1)
                .and_then(|prev| pct_change(bars[prev].close, bar.close)),
        })
        .collect();

    AnnotatedSeries::new(rows)
}
