use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// --- Price Bars ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl PriceBar {
    /// All four prices finite and non-negative.
    pub fn is_valid(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|p| p.is_finite() && *p >= 0.0)
    }
}

/// Timestamp-ordered bars with unique timestamps.
///
/// The only way in is [`PriceSeries::from_bars`], which sorts, drops invalid
/// bars and keeps the last bar seen for a repeated timestamp.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct PriceSeries {
    bars: Vec<PriceBar>,
}

impl PriceSeries {
    pub fn from_bars(bars: impl IntoIterator<Item = PriceBar>) -> Self {
        let mut bars: Vec<PriceBar> = bars.into_iter().filter(PriceBar::is_valid).collect();

        // Stable sort keeps arrival order among equal timestamps, so the
        // dedup below can keep the latest arrival.
        bars.sort_by_key(|b| b.timestamp);

        let mut deduped: Vec<PriceBar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match deduped.last_mut() {
                Some(last) if last.timestamp == bar.timestamp => *last = bar,
                _ => deduped.push(bar),
            }
        }

        Self { bars: deduped }
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

// --- Annotated Series ---

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct AnnotatedBar {
    #[serde(flatten)]
    pub bar: PriceBar,
    /// Percentage change of close against the previous bar. `None` on the
    /// first bar and wherever the previous close was zero.
    pub daily_change: Option<f64>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct AnnotatedSeries {
    rows: Vec<AnnotatedBar>,
}

impl AnnotatedSeries {
    pub(crate) fn new(rows: Vec<AnnotatedBar>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[AnnotatedBar] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The most recent `n` rows, oldest first.
    pub fn tail(&self, n: usize) -> &[AnnotatedBar] {
        let start = self.rows.len().saturating_sub(n);
        &self.rows[start..]
    }

    pub fn changes(&self) -> impl Iterator<Item = Option<f64>> + '_ {
        self.rows.iter().map(|r| r.daily_change)
    }
}

// --- Windows & Granularities ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownValue {}

/// Declares a closed set of string-keyed options with `FromStr`/`Display`
/// and serde support through the string form.
macro_rules! string_enum {
    (
        $(#[$meta:meta])* $name:ident, $kind:literal,
        { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownValue { kind: $kind, value: other.to_string() }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = UnknownValue;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_string()
            }
        }
    };
}

string_enum!(
    /// Lookback window accepted by the market-data service.
    Period, "period", {
        OneDay => "1d",
        FiveDays => "5d",
        OneMonth => "1mo",
        ThreeMonths => "3mo",
        SixMonths => "6mo",
        OneYear => "1y",
        TwoYears => "2y",
        FiveYears => "5y",
        TenYears => "10y",
        YearToDate => "ytd",
        Max => "max",
    }
);

string_enum!(
    /// Bar granularity accepted by the market-data service.
    Interval, "interval", {
        OneMinute => "1m",
        TwoMinutes => "2m",
        FiveMinutes => "5m",
        FifteenMinutes => "15m",
        ThirtyMinutes => "30m",
        SixtyMinutes => "60m",
        NinetyMinutes => "90m",
        OneHour => "1h",
        OneDay => "1d",
        FiveDays => "5d",
        OneWeek => "1wk",
        OneMonth => "1mo",
        ThreeMonths => "3mo",
    }
);

impl Default for Period {
    fn default() -> Self {
        Period::OneYear
    }
}

impl Default for Interval {
    fn default() -> Self {
        Interval::OneDay
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::day;
    use super::*;

    fn bar(offset: i64, close: f64) -> PriceBar {
        PriceBar {
            timestamp: day(offset),
            open: close,
            high: close,
            low: close,
            close,
        }
    }

    #[test]
    fn from_bars_sorts_and_keeps_latest_duplicate() {
        let series =
            PriceSeries::from_bars(vec![bar(2, 30.0), bar(0, 10.0), bar(2, 31.0), bar(1, 20.0)]);

        let closes: Vec<f64> = series.bars().iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![10.0, 20.0, 31.0]);
        assert!(series.bars().windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn from_bars_drops_negative_and_non_finite_prices() {
        let mut bad_low = bar(1, 5.0);
        bad_low.low = -1.0;
        let mut nan_close = bar(2, 5.0);
        nan_close.close = f64::NAN;

        let series = PriceSeries::from_bars(vec![bar(0, 5.0), bad_low, nan_close, bar(3, 0.0)]);
        assert_eq!(series.len(), 2);
        assert_eq!(series.bars()[1].close, 0.0);
    }

    #[test]
    fn period_and_interval_round_trip_through_strings() {
        for p in Period::ALL {
            assert_eq!(p.as_str().parse::<Period>().unwrap(), *p);
        }
        for i in Interval::ALL {
            assert_eq!(i.to_string().parse::<Interval>().unwrap(), *i);
        }
        assert!("2w".parse::<Interval>().is_err());
        assert_eq!(Period::default(), Period::OneYear);
        assert_eq!(Interval::default(), Interval::OneDay);
    }

    #[test]
    fn period_serializes_as_plain_string() {
        let json = serde_json::to_string(&Period::SixMonths).unwrap();
        assert_eq!(json, "\"6mo\"");
        let back: Interval = serde_json::from_str("\"1wk\"").unwrap();
        assert_eq!(back, Interval::OneWeek);
        assert!(serde_json::from_str::<Period>("\"7y\"").is_err());
    }
}
