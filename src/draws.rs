//! Module for visualizing backtest results and trade setups.

use std::ops::Range;
use std::path::PathBuf;

use crate::PercentCalculus;
use crate::engine::{CandidateEntry, NodeType, ResolvedTrade, TradeStatus, VolumeNode, ZoneType};
use crate::errors::{Error, Result};
use crate::metrics::BacktestResult;

use chrono::{DateTime, Duration, Utc};
use plotters::backend::{BitMapBackend, DrawingBackend, SVGBackend};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::WHITE;

/// Aspect ratio for the generated charts.
const ASPECT_RATIO: f64 = 0.5625;
/// Width of the generated charts.
const WIDTH: u32 = 1280;
/// Size of the X-axis labels.
const X_LABEL_SIZE: i32 = 20;
/// Size of the Y-axis labels.
const Y_LABEL_SIZE: i32 = 20;

const HVN_COLOR: RGBColor = RGBColor(255, 193, 7);
const POC_COLOR: RGBColor = RGBColor(33, 150, 243);
const FORCED_COLOR: RGBColor = RGBColor(255, 152, 0);

/// Output formats for the generated charts with output filename.
#[derive(Debug, Clone)]
pub enum DrawOutput {
    /// Save to the output SVG file.
    Svg(PathBuf),
    /// Save to the output PNG file.
    Png(PathBuf),
}

impl DrawOutput {
    /// Picks the format from the file extension, SVG unless it is `.png`.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let is_png = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
        if is_png { Self::Png(path) } else { Self::Svg(path) }
    }
}

/// Configuration options for chart generation.
#[derive(Debug, Clone)]
pub struct DrawOptions {
    /// Chart title.
    title: Option<String>,
    /// Output format and path.
    output: DrawOutput,
    /// Whether to mark trade exits on the equity curve.
    show_trades: bool,
}

impl Default for DrawOptions {
    fn default() -> Self {
        Self {
            title: None,
            output: DrawOutput::Svg(PathBuf::from("bts-zones.svg")),
            show_trades: true,
        }
    }
}

impl DrawOptions {
    /// Sets the chart title.
    pub fn title(mut self, title: impl ToString) -> Self {
        self.title = Some(title.to_string());
        self
    }

    /// Sets the output format and path.
    pub fn draw_output(mut self, output: DrawOutput) -> Self {
        self.output = output;
        self
    }

    /// Enables or disables the trade exit markers.
    pub fn show_trades(mut self, show: bool) -> Self {
        self.show_trades = show;
        self
    }
}

/// What a chart shows.
#[derive(Debug, Clone, Copy)]
enum Subject<'d> {
    Equity(&'d BacktestResult),
    Setup {
        candidate: &'d CandidateEntry,
        trade: Option<&'d ResolvedTrade>,
        nodes: &'d [VolumeNode],
    },
}

/// Chart drawing utility for backtest visualization.
#[derive(Debug, Clone)]
pub struct Draw<'d> {
    subject: Subject<'d>,
    options: DrawOptions,
}

impl<'d> Draw<'d> {
    /// Draws the equity curve of a run.
    pub fn with_result(result: &'d BacktestResult) -> Self {
        Self {
            subject: Subject::Equity(result),
            options: DrawOptions::default(),
        }
    }

    /// Draws one zone retest: forward closes, the zone band, entry, stop and
    /// target, and the symbol's volume nodes.
    ///
    /// `trade` is the candidate resolved by an exit policy; without it only
    /// the entry is drawn.
    pub fn with_setup(candidate: &'d CandidateEntry, trade: Option<&'d ResolvedTrade>, nodes: &'d [VolumeNode]) -> Self {
        Self {
            subject: Subject::Setup { candidate, trade, nodes },
            options: DrawOptions::default(),
        }
    }

    /// Sets the drawing options.
    pub fn with_options(mut self, options: DrawOptions) -> Self {
        self.options = options;
        self
    }

    /// Generates and saves the chart based on the configured options.
    pub fn plot(&self) -> Result<()> {
        if let Subject::Equity(result) = self.subject {
            if result.equity_curve.is_empty() {
                return Err(Error::Msg("no equity points to draw".to_string()));
            }
        }

        let height = (WIDTH as f64 * ASPECT_RATIO) as u32;
        match &self.options.output {
            DrawOutput::Svg(path) => {
                let root = SVGBackend::new(path, (WIDTH, height)).into_drawing_area();
                self.draw_chart(&root)
            }
            DrawOutput::Png(path) => {
                let root = BitMapBackend::new(path, (WIDTH, height)).into_drawing_area();
                self.draw_chart(&root)
            }
        }
    }

    fn draw_chart<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>) -> Result<()> {
        root.fill(&WHITE).map_err(|e| Error::Plotters(e.to_string()))?;
        match self.subject {
            Subject::Equity(result) => self.draw_equity_chart(root, result)?,
            Subject::Setup { candidate, trade, nodes } => self.draw_setup_chart(root, candidate, trade, nodes)?,
        }
        root.present().map_err(|e| Error::Plotters(e.to_string()))
    }

    /// Draws the equity curve with one marker per closed trade.
    fn draw_equity_chart<DB: DrawingBackend>(
        &self,
        drawing_area: &DrawingArea<DB, Shift>,
        result: &BacktestResult,
    ) -> Result<()> {
        let curve = &result.equity_curve;
        let time_range = time_range(curve.iter().map(|point| point.time)).ok_or(Error::Msg("empty equity curve".to_string()))?;
        let value_range = value_range(
            curve
                .iter()
                .map(|point| point.equity)
                .chain(std::iter::once(result.initial_capital)),
        )
        .ok_or(Error::Msg("empty equity curve".to_string()))?;

        let title = self.options.title.clone().unwrap_or_else(|| {
            format!(
                "Equity | return {:.2}% | max drawdown {:.2}% | sharpe {:.2}",
                result.total_return_pct, result.max_drawdown_pct, result.sharpe_ratio
            )
        });

        let drawing_area = drawing_area.margin(10, 10, 70, 70);
        let mut chart = ChartBuilder::on(&drawing_area)
            .caption(title, ("sans-serif", 30).into_font())
            .x_label_area_size(X_LABEL_SIZE)
            .y_label_area_size(Y_LABEL_SIZE * 3)
            .build_cartesian_2d(time_range.clone(), value_range)
            .map_err(|e| Error::Plotters(e.to_string()))?;

        chart
            .configure_mesh()
            .x_desc("Time")
            .y_desc("Equity")
            .x_label_style(("sans-serif", X_LABEL_SIZE))
            .y_label_style(("sans-serif", Y_LABEL_SIZE))
            .x_labels(8)
            .y_labels(6)
            .draw()
            .map_err(|e| Error::Plotters(e.to_string()))?;

        chart
            .draw_series(LineSeries::new(
                [time_range.start, time_range.end].map(|time| (time, result.initial_capital)),
                BLACK.mix(0.4),
            ))
            .map_err(|e| Error::Plotters(e.to_string()))?;

        chart
            .draw_series(LineSeries::new(curve.iter().map(|point| (point.time, point.equity)), BLUE))
            .map_err(|e| Error::Plotters(e.to_string()))?;

        if self.options.show_trades {
            // the first point is the starting capital, then one per closed trade
            let markers = result
                .trades
                .iter()
                .zip(curve.iter().skip(1))
                .map(|(trade, point)| Circle::new((point.time, point.equity), 3, status_color(trade.status).filled()));
            chart
                .draw_series(markers)
                .map_err(|e| Error::Plotters(e.to_string()))?;
        }

        Ok(())
    }

    /// Draws the setup of one candidate by days after entry.
    fn draw_setup_chart<DB: DrawingBackend>(
        &self,
        drawing_area: &DrawingArea<DB, Shift>,
        candidate: &CandidateEntry,
        trade: Option<&ResolvedTrade>,
        nodes: &[VolumeNode],
    ) -> Result<()> {
        let closes: Vec<(f64, f64)> = std::iter::once((0.0, candidate.entry_price()))
            .chain(candidate.forward_closes().map(|(days, close)| (days as f64, close)))
            .collect();
        let last_day = closes.iter().map(|(day, _)| *day).fold(1.0, f64::max);
        let x_range = -0.5..last_day + 0.5;

        let stop = trade.map(|trade| trade.stop_price);
        let target = trade.and_then(|trade| trade.target_price);
        let levels = closes
            .iter()
            .map(|(_, close)| *close)
            .chain([candidate.zone_low(), candidate.zone_high()])
            .chain(stop)
            .chain(target);
        let y_range = value_range(levels).ok_or(Error::Msg("nothing to draw".to_string()))?;

        let title = self.options.title.clone().unwrap_or_else(|| {
            let zone = match candidate.zone_type() {
                ZoneType::Demand => "demand",
                ZoneType::Supply => "supply",
            };
            format!("{} {} zone #{}", candidate.symbol(), zone, candidate.zone_id())
        });

        let drawing_area = drawing_area.margin(10, 10, 70, 70);
        let mut chart = ChartBuilder::on(&drawing_area)
            .caption(title, ("sans-serif", 30).into_font())
            .x_label_area_size(X_LABEL_SIZE)
            .y_label_area_size(Y_LABEL_SIZE * 3)
            .build_cartesian_2d(x_range.clone(), y_range.clone())
            .map_err(|e| Error::Plotters(e.to_string()))?;

        chart
            .configure_mesh()
            .x_desc("Days after entry")
            .y_desc("Price")
            .x_label_style(("sans-serif", X_LABEL_SIZE))
            .y_label_style(("sans-serif", Y_LABEL_SIZE))
            .draw()
            .map_err(|e| Error::Plotters(e.to_string()))?;

        let zone_color = match candidate.zone_type() {
            ZoneType::Demand => GREEN.mix(0.2),
            ZoneType::Supply => RED.mix(0.2),
        };
        chart
            .draw_series([Rectangle::new(
                [(x_range.start, candidate.zone_low()), (x_range.end, candidate.zone_high())],
                zone_color.filled(),
            )])
            .map_err(|e| Error::Plotters(e.to_string()))?;

        for node in nodes.iter().filter(|node| node.symbol == candidate.symbol() && node.is_target()) {
            if !y_range.contains(&node.price) {
                continue;
            }
            let color = match node.node_type {
                NodeType::Poc => POC_COLOR,
                _ => HVN_COLOR,
            };
            chart
                .draw_series(horizontal(&x_range, node.price, color.mix(0.6)))
                .map_err(|e| Error::Plotters(e.to_string()))?;
        }

        chart
            .draw_series(horizontal(&x_range, candidate.entry_price(), BLACK.mix(1.0)))
            .map_err(|e| Error::Plotters(e.to_string()))?;
        if let Some(stop) = stop {
            chart
                .draw_series(horizontal(&x_range, stop, RED.mix(1.0)))
                .map_err(|e| Error::Plotters(e.to_string()))?;
        }
        if let Some(target) = target {
            chart
                .draw_series(horizontal(&x_range, target, GREEN.mix(1.0)))
                .map_err(|e| Error::Plotters(e.to_string()))?;
        }

        chart
            .draw_series(LineSeries::new(closes.iter().copied(), BLUE))
            .map_err(|e| Error::Plotters(e.to_string()))?;
        chart
            .draw_series(closes.iter().map(|point| Circle::new(*point, 3, BLUE.filled())))
            .map_err(|e| Error::Plotters(e.to_string()))?;

        if let Some(exit) = trade.and_then(|trade| trade.exit) {
            chart
                .draw_series([Cross::new((exit.days_held as f64, exit.exit_price), 6, MAGENTA.stroke_width(2))])
                .map_err(|e| Error::Plotters(e.to_string()))?;
        }

        Ok(())
    }
}

fn horizontal<DB: DrawingBackend>(x_range: &Range<f64>, price: f64, color: RGBAColor) -> LineSeries<DB, (f64, f64)> {
    LineSeries::new([(x_range.start, price), (x_range.end, price)], color.stroke_width(2))
}

fn status_color(status: TradeStatus) -> RGBColor {
    match status {
        TradeStatus::Win => GREEN,
        TradeStatus::Loss => RED,
        TradeStatus::Breakeven => BLACK,
        TradeStatus::ForcedOpenAtEnd => FORCED_COLOR,
    }
}

/// Time axis covering every timestamp, widened to a day when they all coincide.
fn time_range(times: impl Iterator<Item = DateTime<Utc>>) -> Option<Range<DateTime<Utc>>> {
    let (first, last) = times.fold(None, |acc: Option<(DateTime<Utc>, DateTime<Utc>)>, time| match acc {
        None => Some((time, time)),
        Some((first, last)) => Some((first.min(time), last.max(time))),
    })?;
    if first == last {
        return Some(first - Duration::hours(12)..last + Duration::hours(12));
    }
    Some(first..last)
}

/// Value axis covering every value with 10% padding, or 1% of the value when flat.
fn value_range(values: impl Iterator<Item = f64>) -> Option<Range<f64>> {
    let (min, max) = values
        .filter(|value| value.is_finite())
        .fold(None, |acc: Option<(f64, f64)>, value| match acc {
            None => Some((value, value)),
            Some((min, max)) => Some((min.min(value), max.max(value))),
        })?;
    let padding = if max > min {
        (max - min) * 0.1
    } else {
        max.abs().how_many(1.0).max(1.0)
    };
    Some(min - padding..max + padding)
}

#[cfg(test)]
#[test]
fn ranges() {
    assert_eq!(value_range([100.0, 120.0, f64::NAN].into_iter()), Some(98.0..122.0));
    assert_eq!(value_range([200.0].into_iter()), Some(198.0..202.0));
    assert_eq!(value_range(std::iter::empty()), None);

    let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    let range = time_range([start, start].into_iter()).unwrap();
    assert_eq!(range.end - range.start, Duration::days(1));
    assert_eq!(time_range(std::iter::empty()), None);
}

#[cfg(test)]
#[test]
fn output_from_extension() {
    assert!(matches!(DrawOutput::from_path("equity.PNG"), DrawOutput::Png(_)));
    assert!(matches!(DrawOutput::from_path("equity.svg"), DrawOutput::Svg(_)));
    assert!(matches!(DrawOutput::from_path("equity"), DrawOutput::Svg(_)));
}

#[cfg(test)]
#[test]
fn empty_result_is_not_drawn() {
    use crate::config::BacktestConfig;
    use crate::engine::{Dataset, run_backtest};

    let result = run_backtest(&Dataset::default(), &BacktestConfig::default()).unwrap();
    let draw = Draw::with_result(&result).with_options(DrawOptions::default().show_trades(false));
    assert!(matches!(draw.plot(), Err(Error::Msg(_))));
}

#[cfg(test)]
#[test]
fn setup_chart_is_written() {
    use crate::engine::{CandidateBuilder, ExitStrategy, Setup, VolumeNodes};

    let candidate = CandidateBuilder::builder()
        .symbol("AAPL")
        .zone_id(1)
        .zone_type(ZoneType::Demand)
        .entry_time(DateTime::from_timestamp(1_700_000_000, 0).unwrap())
        .entry_price(100.0)
        .zone(90.0, 95.0)
        .forward_close(1, 103.0)
        .forward_close(2, 108.0)
        .forward_close(3, 121.0)
        .build()
        .unwrap();
    let nodes = vec![
        VolumeNode {
            symbol: "AAPL".to_string(),
            price: 120.0,
            node_type: NodeType::Hvn,
            as_of: None,
        },
        VolumeNode {
            symbol: "AAPL".to_string(),
            price: 104.0,
            node_type: NodeType::Poc,
            as_of: None,
        },
    ];
    let strategy = ExitStrategy::VolumeNode { hvn_lookback_days: 90 };
    let trade = strategy
        .resolve(Setup::Zone(&candidate), &VolumeNodes::new(&nodes))
        .unwrap();

    let path = std::env::temp_dir().join(format!("bts-zones-{}-setup.svg", std::process::id()));
    let options = DrawOptions::default()
        .title("AAPL demand retest")
        .draw_output(DrawOutput::Svg(path.clone()));
    let result = Draw::with_setup(&candidate, Some(&trade), &nodes).with_options(options).plot();

    match result {
        Ok(()) => {
            let svg = std::fs::read_to_string(&path).unwrap();
            std::fs::remove_file(&path).ok();
            assert!(svg.contains("<svg"));
            assert!(svg.contains("AAPL demand retest"));
        }
        // hosts without system fonts cannot lay out text
        Err(Error::Plotters(_)) => {}
        Err(e) => panic!("unexpected error: {e}"),
    }
}
