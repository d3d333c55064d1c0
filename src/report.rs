use chrono::{DateTime, Utc};
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};
use indexmap::IndexMap;

use crate::analysis::{Analysis, SymbolReport};
use crate::models::{AnnotatedBar, Interval};
use crate::simulation::{Classification, SimulationStatus};

pub const PLACEHOLDER: &str = "N/A";

/// `1234.5` → `$1,234.50`.
pub fn format_currency(amount: f64) -> String {
    // non-finite, or too large to count in u64 cents
    if !amount.is_finite() || amount.abs() >= u64::MAX as f64 / 100.0 {
        return PLACEHOLDER.to_string();
    }
    let sign = if amount < 0.0 { "-" } else { "" };
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{}${}.{:02}", sign, grouped, cents % 100)
}

pub fn format_change(change: Option<f64>) -> String {
    change.map_or_else(|| PLACEHOLDER.to_string(), |c| format!("{:+.2}%", c))
}

/// Intraday bars need the time of day, daily and coarser ones do not.
pub fn format_timestamp(ts: DateTime<Utc>, interval: Interval) -> String {
    match interval {
        Interval::OneDay
        | Interval::FiveDays
        | Interval::OneWeek
        | Interval::OneMonth
        | Interval::ThreeMonths => ts.format("%Y-%m-%d").to_string(),
        _ => ts.format("%Y-%m-%d %H:%M").to_string(),
    }
}

fn change_color(change: Option<f64>) -> Color {
    match change {
        Some(c) if c > 0.0 => Color::Green,
        Some(c) if c < 0.0 => Color::Red,
        _ => Color::DarkGrey,
    }
}

pub fn latest_rows_table(rows: &[AnnotatedBar], interval: Interval) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            ["Date", "Open", "High", "Low", "Close", "Daily Change"]
                .into_iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold)),
        );

    for row in rows {
        let price = |p: f64| Cell::new(format!("{:.2}", p)).set_alignment(CellAlignment::Right);
        table.add_row(vec![
            Cell::new(format_timestamp(row.bar.timestamp, interval)).fg(Color::DarkGrey),
            price(row.bar.open),
            price(row.bar.high),
            price(row.bar.low),
            price(row.bar.close),
            Cell::new(format_change(row.daily_change))
                .fg(change_color(row.daily_change))
                .set_alignment(CellAlignment::Right),
        ]);
    }

    table
}

/// The user-facing verdict for one simulation.
pub fn simulation_message(analysis: &Analysis) -> &'static str {
    let sim = &analysis.simulation;
    match (sim.status, sim.classification) {
        (SimulationStatus::InsufficientData, _) | (_, None) => {
            "Not enough valid data to simulate investment performance."
        }
        (SimulationStatus::Degenerate { .. }, _) => {
            "The investment was wiped out during the window."
        }
        (_, Some(Classification::Profit)) => "You made a profit!",
        (_, Some(Classification::Loss)) => "You incurred a loss.",
        (_, Some(Classification::Unchanged)) => "No profit, no loss. Value remained unchanged.",
    }
}

fn classification_cell(analysis: &Analysis) -> Cell {
    let color = match analysis.simulation.classification {
        _ if analysis.simulation.status == SimulationStatus::InsufficientData => Color::Yellow,
        Some(Classification::Profit) => Color::Green,
        Some(Classification::Loss) => Color::Red,
        _ => Color::Cyan,
    };
    Cell::new(simulation_message(analysis)).fg(color)
}

pub fn summary_table(reports: &IndexMap<String, SymbolReport>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Asset").add_attribute(Attribute::Bold),
            Cell::new("Bars").add_attribute(Attribute::Bold),
            Cell::new("Initial").add_attribute(Attribute::Bold),
            Cell::new("Final Value")
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Right),
            Cell::new("Result").add_attribute(Attribute::Bold),
        ]);

    for (symbol, report) in reports {
        let symbol_cell = Cell::new(symbol).fg(Color::Cyan);
        let row = match report {
            SymbolReport::NoData { .. } => vec![
                symbol_cell,
                Cell::new(0),
                Cell::new(PLACEHOLDER),
                Cell::new(PLACEHOLDER).set_alignment(CellAlignment::Right),
                Cell::new("No valid data found.").fg(Color::Yellow),
            ],
            SymbolReport::Ready(analysis) => vec![
                symbol_cell,
                Cell::new(analysis.series.len()),
                Cell::new(format_currency(analysis.simulation.principal)),
                Cell::new(format_currency(analysis.simulation.final_value))
                    .set_alignment(CellAlignment::Right),
                classification_cell(analysis),
            ],
        };
        table.add_row(row);
    }

    table
}

/// Full text report: one section per symbol plus a closing summary.
pub fn render(
    reports: &IndexMap<String, SymbolReport>,
    interval: Interval,
    table_rows: usize,
) -> String {
    let mut out = String::new();

    for (symbol, report) in reports {
        match report {
            SymbolReport::NoData { reason } => {
                out.push_str(&format!(
                    "\n{}: no valid data found ({}). \
                     Check the ticker or try a different interval.\n",
                    symbol, reason
                ));
            }
            SymbolReport::Ready(analysis) => {
                out.push_str(&format!("\n{} - latest data\n", symbol));
                let table = latest_rows_table(analysis.annotated.tail(table_rows), interval);
                out.push_str(&table.to_string());
                out.push('\n');
            }
        }
    }

    out.push_str(&format!("\nInvestment simulation\n{}\n", summary_table(reports)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyze;
    use crate::klines::FetchError;
    use crate::models::test_support::{day, daily_series};

    #[test]
    fn currency_formatting() {
        assert_eq!(format_currency(0.0), "$0.00");
        assert_eq!(format_currency(990.0), "$990.00");
        assert_eq!(format_currency(1234.5), "$1,234.50");
        assert_eq!(format_currency(1_000_000.004), "$1,000,000.00");
        assert_eq!(format_currency(-42.129), "-$42.13");
    }

    #[test]
    fn unrepresentable_amounts_show_the_placeholder() {
        assert_eq!(format_currency(f64::INFINITY), PLACEHOLDER);
        assert_eq!(format_currency(f64::NEG_INFINITY), PLACEHOLDER);
        assert_eq!(format_currency(f64::NAN), PLACEHOLDER);
        assert_eq!(format_currency(1e300), PLACEHOLDER);
    }

    #[test]
    fn undefined_change_renders_as_placeholder() {
        assert_eq!(format_change(None), PLACEHOLDER);
        assert_eq!(format_change(Some(0.0)), "+0.00%");
        assert_eq!(format_change(Some(-10.0)), "-10.00%");
    }

    #[test]
    fn timestamps_follow_granularity() {
        assert_eq!(format_timestamp(day(2), Interval::OneDay), "2024-01-03");
        assert_eq!(format_timestamp(day(2), Interval::FiveMinutes), "2024-01-03 00:00");
    }

    #[test]
    fn latest_rows_table_shows_placeholder_for_first_bar() {
        let analysis = analyze("AAPL", daily_series(&[100.0, 110.0]), 1000.0).unwrap();
        let rendered = latest_rows_table(analysis.annotated.rows(), Interval::OneDay).to_string();

        assert!(rendered.contains(PLACEHOLDER));
        assert!(rendered.contains("+10.00%"));
        assert!(rendered.contains("110.00"));
    }

    #[test]
    fn messages_distinguish_no_data_from_unchanged() {
        let single = analyze("ONE", daily_series(&[5.0]), 100.0).unwrap();
        assert_eq!(
            simulation_message(&single),
            "Not enough valid data to simulate investment performance."
        );

        let flat = analyze("FLAT", daily_series(&[5.0, 5.0]), 100.0).unwrap();
        assert_eq!(simulation_message(&flat), "No profit, no loss. Value remained unchanged.");
    }

    #[test]
    fn render_covers_every_symbol() {
        let mut reports = IndexMap::new();
        reports.insert(
            "AAPL".to_string(),
            SymbolReport::Ready(Box::new(
                analyze("AAPL", daily_series(&[100.0, 110.0, 99.0]), 1000.0).unwrap(),
            )),
        );
        reports.insert("NOPE".to_string(), SymbolReport::NoData { reason: FetchError::Empty });

        let text = render(&reports, Interval::OneDay, 2);
        assert!(text.contains("AAPL - latest data"));
        assert!(text.contains("NOPE: no valid data found"));
        assert!(text.contains("$990.00"));
        assert!(text.contains("You incurred a loss."));
    }
}
