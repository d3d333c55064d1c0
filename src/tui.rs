use anyhow::Result;
use chrono::{DateTime, Utc};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use indexmap::IndexMap;
use ratatui::{
    prelude::*,
    symbols::Marker,
    text::Line,
    widgets::{
        Axis, Block, Borders, Cell, Chart, Clear, Dataset, GraphType, Paragraph, Row, Table, Wrap,
    },
};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::analysis::{self, Analysis, SymbolReport, SymbolStatus};
use crate::charts::{ChartSpec, Trace};
use crate::klines::HistorySource;
use crate::models::{Interval, Period};
use crate::report::{format_change, format_currency, format_timestamp, simulation_message};
use crate::simulation::{Classification, SimulationError, SimulationStatus};
use crate::storage_utils::AppConfig;

type PipelineResult = std::result::Result<IndexMap<String, SymbolReport>, SimulationError>;

// --- App State ---

struct App {
    instruments: Vec<String>,
    period: Period,
    interval: Interval,
    table_rows: usize,
    cursor: usize,
    /// Selected symbols in the order the user picked them.
    selected: Vec<String>,
    principal: f64,
    principal_input: Option<String>,
    reports: IndexMap<String, SymbolReport>,
    focused_report: usize,
    is_refreshing: bool,
    /// Another refresh was asked for while one was running.
    refresh_queued: bool,
    last_updated: Option<DateTime<Utc>>,
    notice: Option<String>,
}

impl App {
    fn new(config: &AppConfig, selected: Vec<String>) -> Self {
        Self {
            instruments: config.instruments.clone(),
            period: config.default_period,
            interval: config.default_interval,
            table_rows: config.table_rows,
            cursor: 0,
            selected,
            principal: config.principal,
            principal_input: None,
            reports: IndexMap::new(),
            focused_report: 0,
            is_refreshing: false,
            refresh_queued: false,
            last_updated: None,
            notice: None,
        }
    }

    fn toggle_current(&mut self) {
        let Some(symbol) = self.instruments.get(self.cursor) else {
            return;
        };
        if let Some(pos) = self.selected.iter().position(|s| s == symbol) {
            self.selected.remove(pos);
        } else {
            self.selected.push(symbol.clone());
        }
    }

    fn set_reports(&mut self, result: PipelineResult) {
        self.is_refreshing = false;
        match result {
            Ok(reports) => {
                self.reports = reports;
                self.focused_report = 0;
                self.last_updated = Some(Utc::now());
                self.notice = None;
            }
            Err(e) => {
                log::error!("refresh failed: {}", e);
                self.notice = Some(e.to_string());
            }
        }
    }

    fn commit_principal(&mut self) {
        let Some(input) = self.principal_input.take() else {
            return;
        };
        match input.trim().parse::<f64>() {
            Ok(value) if value.is_finite() && value >= 0.01 => {
                self.principal = value;
                self.notice = None;
            }
            _ => self.notice = Some(format!("{:?} is not a valid amount (minimum 0.01)", input)),
        }
    }

    fn focused(&self) -> Option<(&String, &SymbolReport)> {
        self.reports.get_index(self.focused_report)
    }
}

// --- TUI ---

pub async fn run_tui(
    source: Arc<dyn HistorySource>,
    config: AppConfig,
    selected: Vec<String>,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, source, App::new(&config, selected)).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;
    res
}

async fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    source: Arc<dyn HistorySource>,
    mut app: App,
) -> Result<()> {
    let (data_tx, mut data_rx) = mpsc::channel::<PipelineResult>(1);

    if !app.selected.is_empty() {
        start_refresh(&mut app, &source, &data_tx);
    }

    loop {
        terminal.draw(|f| ui(f, &app))?;

        if let Ok(result) = data_rx.try_recv() {
            finish_refresh(&mut app, result, &source, &data_tx);
        }

        if event::poll(Duration::from_millis(50))? {
            // Resize needs no handling, the next draw picks up the new size.
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press
                    && !handle_key_event(key, &mut app, &source, &data_tx)
                {
                    return Ok(());
                }
            }
        }
    }
}

/// Re-runs the whole pipeline for the current selection on a background task.
/// While one is running, the request is queued and served when it finishes.
fn start_refresh(
    app: &mut App,
    source: &Arc<dyn HistorySource>,
    tx: &mpsc::Sender<PipelineResult>,
) {
    if app.is_refreshing {
        app.refresh_queued = true;
        return;
    }
    if app.selected.is_empty() {
        app.reports.clear();
        app.notice = Some("Select at least one symbol".to_string());
        return;
    }

    app.is_refreshing = true;
    let source = Arc::clone(source);
    let tx = tx.clone();
    let symbols = app.selected.clone();
    let (period, interval, principal) = (app.period, app.interval, app.principal);

    tokio::spawn(async move {
        let result =
            analysis::run_analysis_pipeline(source.as_ref(), &symbols, period, interval, principal)
                .await;
        let _ = tx.send(result).await;
    });
}

/// Shows a finished refresh and starts the queued one, if any.
fn finish_refresh(
    app: &mut App,
    result: PipelineResult,
    source: &Arc<dyn HistorySource>,
    tx: &mpsc::Sender<PipelineResult>,
) {
    app.set_reports(result);
    if std::mem::take(&mut app.refresh_queued) {
        start_refresh(app, source, tx);
    }
}

fn handle_key_event(
    key: KeyEvent,
    app: &mut App,
    source: &Arc<dyn HistorySource>,
    tx: &mpsc::Sender<PipelineResult>,
) -> bool {
    if let Some(input) = app.principal_input.as_mut() {
        match key.code {
            KeyCode::Enter => {
                app.commit_principal();
                start_refresh(app, source, tx);
            }
            KeyCode::Esc => app.principal_input = None,
            KeyCode::Backspace => {
                input.pop();
            }
            KeyCode::Char(c) if c.is_ascii_digit() || (c == '.' && !input.contains('.')) => {
                input.push(c)
            }
            _ => {}
        }
        return true;
    }

    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return false,
        KeyCode::F(5) | KeyCode::Char('r') => start_refresh(app, source, tx),
        KeyCode::Char('p') => app.principal_input = Some(String::new()),
        KeyCode::Char(' ') | KeyCode::Enter => app.toggle_current(),
        KeyCode::Up => {
            if !app.instruments.is_empty() {
                app.cursor = app.cursor.checked_sub(1).unwrap_or(app.instruments.len() - 1);
            }
        }
        KeyCode::Down => {
            if !app.instruments.is_empty() {
                app.cursor = (app.cursor + 1) % app.instruments.len();
            }
        }
        KeyCode::Tab | KeyCode::Right => {
            if !app.reports.is_empty() {
                app.focused_report = (app.focused_report + 1) % app.reports.len();
            }
        }
        KeyCode::BackTab | KeyCode::Left => {
            if !app.reports.is_empty() {
                app.focused_report =
                    app.focused_report.checked_sub(1).unwrap_or(app.reports.len() - 1);
            }
        }
        _ => {}
    }
    true
}

// --- Rendering ---

fn ui(f: &mut Frame, app: &App) {
    let main_layout = Layout::horizontal([Constraint::Percentage(20), Constraint::Percentage(80)])
        .split(f.size());

    render_sidebar(f, app, main_layout[0]);

    let right_chunks =
        Layout::vertical([Constraint::Length(3), Constraint::Min(0)]).split(main_layout[1]);

    let updated = app
        .last_updated
        .map(|t| t.format("%d-%m-%Y %H:%M:%S").to_string())
        .unwrap_or_else(|| "Never".to_string());
    let tabs: Vec<Span> = app
        .reports
        .iter()
        .enumerate()
        .flat_map(|(i, (symbol, report))| {
            let mut style = Style::default().fg(status_color(report.status()));
            if i == app.focused_report {
                style = style.add_modifier(Modifier::REVERSED);
            }
            [Span::styled(format!(" {} ", symbol), style), Span::raw(" ")]
        })
        .collect();
    f.render_widget(
        Paragraph::new(Line::from(tabs)).block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("Last Updated: {} ({} / {})", updated, app.period, app.interval)),
        ),
        right_chunks[0],
    );

    match app.focused() {
        Some((symbol, SymbolReport::Ready(analysis))) => {
            render_analysis(f, app, symbol, analysis, right_chunks[1])
        }
        Some((symbol, SymbolReport::NoData { reason })) => {
            f.render_widget(
                Paragraph::new(format!(
                    "No valid data found for {}.\n\
                     Please check the ticker or try a different interval.\n\n({})",
                    symbol, reason
                ))
                .style(Style::default().fg(Color::Yellow))
                .wrap(Wrap { trim: true })
                .block(Block::default().borders(Borders::ALL).title(symbol.as_str())),
                right_chunks[1],
            );
        }
        None => {
            f.render_widget(
                Paragraph::new("Select symbols with Space, then press F5 to fetch data.")
                    .alignment(Alignment::Center)
                    .block(Block::default().borders(Borders::ALL)),
                right_chunks[1],
            );
        }
    }

    if app.is_refreshing {
        let area = centered_rect(60, 20, main_layout[1]);
        f.render_widget(Clear, area);
        f.render_widget(
            Paragraph::new(format!(
                "Fetching data for {} symbol(s)...\nPlease wait.",
                app.selected.len()
            ))
            .block(Block::default().title("Refreshing").borders(Borders::ALL))
            .alignment(Alignment::Center),
            area,
        );
    }
}

fn render_sidebar(f: &mut Frame, app: &App, area: Rect) {
    let sidebar_block = Block::default().borders(Borders::ALL).title("Symbols");
    let inner = sidebar_block.inner(area);
    f.render_widget(sidebar_block, area);

    let chunks = Layout::vertical([
        Constraint::Min(1),    // instrument list
        Constraint::Length(3), // principal
        Constraint::Length(4), // key help
    ])
    .split(inner);

    // Keep the cursor on screen for long universes.
    let visible = chunks[0].height as usize;
    let offset = app.cursor.saturating_sub(visible.saturating_sub(1));
    let lines: Vec<Line> = app
        .instruments
        .iter()
        .enumerate()
        .skip(offset)
        .take(visible)
        .map(|(i, symbol)| {
            let mark = if app.selected.contains(symbol) { "[x]" } else { "[ ]" };
            let mut line = Line::from(format!("{} {}", mark, symbol));
            if i == app.cursor {
                line = line.style(Style::default().fg(Color::Yellow).bg(Color::DarkGray));
            }
            line
        })
        .collect();
    f.render_widget(Paragraph::new(lines), chunks[0]);

    let principal_text = match &app.principal_input {
        Some(input) => format!("{}_", input),
        None => format_currency(app.principal),
    };
    let principal_style = if app.principal_input.is_some() {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };
    f.render_widget(
        Paragraph::new(principal_text)
            .style(principal_style)
            .block(Block::default().borders(Borders::TOP).title("Investment (p)")),
        chunks[1],
    );

    let help = match &app.notice {
        Some(notice) => Paragraph::new(notice.as_str()).style(Style::default().fg(Color::Red)),
        None => Paragraph::new("Space select  F5 refresh\nTab next  q quit"),
    };
    f.render_widget(help.wrap(Wrap { trim: true }), chunks[2]);
}

fn render_analysis(f: &mut Frame, app: &App, symbol: &str, analysis: &Analysis, area: Rect) {
    let rows_height = app.table_rows as u16 + 3;
    let chunks = Layout::vertical([
        Constraint::Length(rows_height),
        Constraint::Min(8),
        Constraint::Length(5),
    ])
    .split(area);

    let header = Row::new(["Date", "Open", "High", "Low", "Close", "Daily Change"])
        .style(Style::default().bg(Color::DarkGray));
    let rows = analysis.annotated.tail(app.table_rows).iter().map(|row| {
        Row::new([
            Cell::from(format_timestamp(row.bar.timestamp, app.interval))
                .style(Style::default().fg(Color::DarkGray)),
            Cell::from(format!("{:.2}", row.bar.open)),
            Cell::from(format!("{:.2}", row.bar.high)),
            Cell::from(format!("{:.2}", row.bar.low)),
            Cell::from(format!("{:.2}", row.bar.close)),
            Cell::from(format_change(row.daily_change))
                .style(Style::default().fg(change_color(row.daily_change))),
        ])
    });
    f.render_widget(
        Table::new(rows, [Constraint::Ratio(1, 6); 6])
            .header(header)
            .block(Block::default().borders(Borders::ALL).title(format!("{} Latest Data", symbol))),
        chunks[0],
    );

    let chart_chunks =
        Layout::horizontal([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(chunks[1]);
    render_chart(f, &analysis.daily_change, chart_chunks[0]);
    render_chart(f, &analysis.candlestick, chart_chunks[1]);

    let sim = &analysis.simulation;
    let verdict_color = match (sim.status, sim.classification) {
        (SimulationStatus::InsufficientData, _) => Color::Yellow,
        (_, Some(Classification::Profit)) => Color::Green,
        (_, Some(Classification::Loss)) => Color::Red,
        _ => Color::Cyan,
    };
    let text = vec![
        Line::from(format!("Initial Investment: {}", format_currency(sim.principal))),
        Line::from(format!(
            "Final Value After {}: {}",
            app.period,
            format_currency(sim.final_value)
        )),
        Line::styled(simulation_message(analysis), Style::default().fg(verdict_color)),
    ];
    f.render_widget(
        Paragraph::new(text).block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("Investment Simulation - {}", symbol)),
        ),
        chunks[2],
    );
}

/// Drawable point sets of one trace. Scatter traces are split at gaps.
fn trace_segments(trace: &Trace) -> Vec<(String, GraphType, Color, Vec<(f64, f64)>)> {
    let secs = |t: &DateTime<Utc>| t.timestamp() as f64;
    match trace {
        Trace::Scatter { name, x, y, .. } => {
            let mut segments = Vec::new();
            let mut current = Vec::new();
            for (t, v) in x.iter().zip(y) {
                match v {
                    Some(v) => current.push((secs(t), *v)),
                    None if !current.is_empty() => segments.push(std::mem::take(&mut current)),
                    None => {}
                }
            }
            if !current.is_empty() {
                segments.push(current);
            }
            segments
                .into_iter()
                .map(|points| (name.clone(), GraphType::Line, Color::Cyan, points))
                .collect()
        }
        Trace::Candlestick { name, x, high, low, close, .. } => {
            let points = |values: &[f64]| {
                x.iter().map(secs).zip(values.iter().copied()).collect::<Vec<_>>()
            };
            vec![
                (format!("{} high", name), GraphType::Scatter, Color::Green, points(high)),
                (format!("{} low", name), GraphType::Scatter, Color::Red, points(low)),
                (format!("{} close", name), GraphType::Line, Color::Yellow, points(close)),
            ]
        }
    }
}

fn render_chart(f: &mut Frame, spec: &ChartSpec, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title(spec.layout.title.as_str());
    let segments: Vec<_> = spec.data.iter().flat_map(trace_segments).collect();

    let all_points = || segments.iter().flat_map(|(_, _, _, pts)| pts.iter());
    let (Some(x_min), Some(x_max)) = (
        all_points().map(|p| p.0).reduce(f64::min),
        all_points().map(|p| p.0).reduce(f64::max),
    ) else {
        f.render_widget(Paragraph::new("Not enough data to plot.").block(block), area);
        return;
    };
    let y_min = all_points().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let y_max = all_points().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    let pad = ((y_max - y_min) * 0.05).max(0.01);

    let mut last_name: Option<&str> = None;
    let datasets: Vec<Dataset> = segments
        .iter()
        .map(|(name, graph_type, color, points)| {
            let dataset = Dataset::default()
                .marker(Marker::Braille)
                .graph_type(*graph_type)
                .style(Style::default().fg(*color))
                .data(points);
            // segments split at a gap share one legend entry
            if last_name == Some(name.as_str()) {
                dataset
            } else {
                last_name = Some(name.as_str());
                dataset.name(name.clone())
            }
        })
        .collect();

    let date_label = |secs: f64| {
        DateTime::<Utc>::from_timestamp(secs as i64, 0)
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_default()
    };

    let chart = Chart::new(datasets)
        .block(block)
        .x_axis(
            Axis::default()
                .title(spec.layout.xaxis.title.as_str())
                .bounds([x_min, x_max.max(x_min + 1.0)])
                .labels(vec![Span::raw(date_label(x_min)), Span::raw(date_label(x_max))]),
        )
        .y_axis(
            Axis::default()
                .title(spec.layout.yaxis.title.as_str())
                .bounds([y_min - pad, y_max + pad])
                .labels(vec![
                    Span::raw(format!("{:.2}", y_min)),
                    Span::raw(format!("{:.2}", y_max)),
                ]),
        );
    f.render_widget(chart, area);
}

fn status_color(status: SymbolStatus) -> Color {
    match status {
        SymbolStatus::FetchedOk => Color::Green,
        SymbolStatus::InsufficientData => Color::Yellow,
        SymbolStatus::NoData => Color::Red,
    }
}

fn change_color(change: Option<f64>) -> Color {
    match change {
        Some(c) if c > 0.0 => Color::Green,
        Some(c) if c < 0.0 => Color::Red,
        _ => Color::DarkGray,
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::vertical([
        Constraint::Percentage((100 - percent_y) / 2),
        Constraint::Percentage(percent_y),
        Constraint::Percentage((100 - percent_y) / 2),
    ])
    .split(r);
    Layout::horizontal([
        Constraint::Percentage((100 - percent_x) / 2),
        Constraint::Percentage(percent_x),
        Constraint::Percentage((100 - percent_x) / 2),
    ])
    .split(popup_layout[1])[1]
}
