//! Plot selections, figure computation, and terminal drawing.
//!
//! [`render_plot`] turns the current [`PlotSpec`] and result frame into a
//! [`Figure`] (pure data, comparable in tests); [`Figure::draw`] lays it out
//! as text. Computation fails with a [`RenderError`] whenever the selected
//! variables do not fit the chosen plot; the caller decides what a failure
//! means for the pane.

use crate::frame::{Frame, FrameError, Summary, Value, format_float, quantile};
use crate::render::{buffer_lines, clamp_u16, draw_widget};
use ratatui::buffer::Buffer;
use ratatui::layout::{Direction, Rect};
use ratatui::style::{Color, Style};
use ratatui::symbols;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Bar, BarChart, BarGroup, Block, Borders, Sparkline, Widget};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use unicode_width::UnicodeWidthStr;

/// Rotation applied to categorical x tick labels.
pub const X_TICK_ROTATION_DEG: u16 = 45;

const BAR_HEIGHT: usize = 8;
const STRIP_WIDTH: usize = 40;
const HIST_WIDTH: usize = 40;
const MAX_TICK_LABEL: usize = 12;
const MAX_ROW_LABEL: usize = 16;
const MAX_BINS: usize = 50;

const BAR_SCALE: f64 = 1000.0;

/// Colours distinguishing hue levels; cycles for more levels.
const HUE_COLORS: [Color; 4] = [Color::Cyan, Color::Magenta, Color::Yellow, Color::Green];

// ---------------------------------------------------------------------------
// Spec
// ---------------------------------------------------------------------------

/// Top-level plot selector.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlotFamily {
    /// Summary statistics of the frame.
    Describe,
    /// Faceted categorical plot.
    Categorical,
    /// Distribution of one numeric variable.
    Numeric,
}

impl PlotFamily {
    pub const ALL: [PlotFamily; 3] = [Self::Describe, Self::Categorical, Self::Numeric];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Describe => "describe",
            Self::Categorical => "categorical",
            Self::Numeric => "numeric",
        }
    }
}

impl fmt::Display for PlotFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlotFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown plot type '{s}' (expected describe, categorical, numeric)"))
    }
}

/// Categorical plot flavour.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlotKind {
    #[default]
    Count,
    Swarm,
    Box,
    Boxen,
    Violin,
    Bar,
    Point,
}

impl PlotKind {
    pub const ALL: [PlotKind; 7] = [
        Self::Count,
        Self::Swarm,
        Self::Box,
        Self::Boxen,
        Self::Violin,
        Self::Bar,
        Self::Point,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Swarm => "swarm",
            Self::Box => "box",
            Self::Boxen => "boxen",
            Self::Violin => "violin",
            Self::Bar => "bar",
            Self::Point => "point",
        }
    }
}

impl fmt::Display for PlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlotKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|k| k.as_str()).collect();
                format!("unknown plot kind '{s}' (expected one of {})", names.join(", "))
            })
    }
}

/// Current plot selections. Every field may be unset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PlotSpec {
    pub family: Option<PlotFamily>,
    pub kind: PlotKind,
    pub x: Option<String>,
    pub y: Option<String>,
    pub hue: Option<String>,
    pub row: Option<String>,
    pub col: Option<String>,
}

impl PlotSpec {
    /// Unset every column-bound selector, keeping family and kind.
    pub fn clear_axes(&mut self) {
        self.x = None;
        self.y = None;
        self.hue = None;
        self.row = None;
        self.col = None;
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("no data to plot")]
    NoData,
    #[error("`{0}` must be set for this plot")]
    MissingVariable(&'static str),
    #[error("cannot pass values for both `x` and `y` to a count plot")]
    BothAxes,
    #[error("column `{0}` is not numeric")]
    NotNumeric(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

// ---------------------------------------------------------------------------
// Figures
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub enum Figure {
    Summary(Frame),
    Categorical(CategoricalFigure),
    Histogram(HistogramFigure),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Orientation {
    /// Categories along x.
    Vertical,
    /// Categories along y.
    Horizontal,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CategoryStat {
    Count(usize),
    Mean { mean: f64, n: usize },
    Distribution { summary: Summary, values: Vec<f64> },
}

impl CategoryStat {
    fn scalar(&self) -> Option<f64> {
        match self {
            Self::Count(n) => Some(*n as f64),
            Self::Mean { mean, .. } => Some(*mean),
            Self::Distribution { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CategoryGroup {
    pub category: String,
    pub hue: Option<String>,
    pub stat: CategoryStat,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Facet {
    pub row: Option<String>,
    pub col: Option<String>,
    pub groups: Vec<CategoryGroup>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CategoricalFigure {
    pub kind: PlotKind,
    pub orientation: Orientation,
    pub category_var: Option<String>,
    pub value_var: Option<String>,
    pub hue_var: Option<String>,
    pub hue_levels: Vec<String>,
    pub row_var: Option<String>,
    pub col_var: Option<String>,
    pub facets: Vec<Facet>,
    pub x_tick_rotation: u16,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HistogramBin {
    pub lo: f64,
    pub hi: f64,
    /// One count per hue level (a single entry without hue).
    pub counts: Vec<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HistogramFigure {
    pub x_var: String,
    pub hue_var: Option<String>,
    pub hue_levels: Vec<String>,
    pub bins: Vec<HistogramBin>,
}

/// Compute the figure for `spec` over `frame`.
///
/// `Ok(None)` means no plot family is selected. Describe ignores every
/// axis selector; the numeric family honours only `x` and `hue`.
pub fn render_plot(frame: Option<&Frame>, spec: &PlotSpec) -> Result<Option<Figure>, RenderError> {
    let Some(family) = spec.family else {
        return Ok(None);
    };
    let frame = frame.ok_or(RenderError::NoData)?;
    let figure = match family {
        PlotFamily::Describe => {
            if frame.columns().is_empty() {
                return Err(RenderError::NoData);
            }
            Figure::Summary(frame.describe()?)
        }
        PlotFamily::Categorical => Figure::Categorical(categorical(frame, spec)?),
        PlotFamily::Numeric => Figure::Histogram(histogram(frame, spec.x.as_deref(), spec.hue.as_deref())?),
    };
    Ok(Some(figure))
}

fn require_numeric(frame: &Frame, name: &str) -> Result<(), RenderError> {
    if frame.column(name)?.kind.is_numeric() {
        Ok(())
    } else {
        Err(RenderError::NotNumeric(name.to_string()))
    }
}

/// Levels of an optional grouping variable; `[None]` when unset.
fn levels(frame: &Frame, var: Option<&str>) -> Result<Vec<Option<String>>, RenderError> {
    match var {
        None => Ok(vec![None]),
        Some(name) => Ok(frame.distinct_labels(name)?.into_iter().map(Some).collect()),
    }
}

fn subset(frame: &Frame, var: Option<&str>, level: Option<&str>) -> Result<Frame, RenderError> {
    match (var, level) {
        (Some(var), Some(level)) => Ok(frame.filter_eq(var, level)?),
        _ => Ok(frame.clone()),
    }
}

fn categorical(frame: &Frame, spec: &PlotSpec) -> Result<CategoricalFigure, RenderError> {
    let x = spec.x.as_deref();
    let y = spec.y.as_deref();
    let (orientation, category_var, value_var) = match spec.kind {
        PlotKind::Count => match (x, y) {
            (Some(_), Some(_)) => return Err(RenderError::BothAxes),
            (Some(x), None) => (Orientation::Vertical, Some(x), None),
            (None, Some(y)) => (Orientation::Horizontal, Some(y), None),
            (None, None) => return Err(RenderError::MissingVariable("x")),
        },
        _ => match (x, y) {
            (Some(x), Some(y)) => {
                if frame.column(y)?.kind.is_numeric() {
                    (Orientation::Vertical, Some(x), Some(y))
                } else if frame.column(x)?.kind.is_numeric() {
                    (Orientation::Horizontal, Some(y), Some(x))
                } else {
                    return Err(RenderError::NotNumeric(y.to_string()));
                }
            }
            (Some(x), None) => {
                require_numeric(frame, x)?;
                (Orientation::Horizontal, None, Some(x))
            }
            (None, Some(y)) => {
                require_numeric(frame, y)?;
                (Orientation::Vertical, None, Some(y))
            }
            (None, None) => return Err(RenderError::MissingVariable("x")),
        },
    };
    if let Some(c) = category_var {
        frame.column(c)?;
    }
    if frame.is_empty() {
        return Err(RenderError::NoData);
    }

    let hue_var = spec.hue.as_deref();
    let row_var = spec.row.as_deref();
    let col_var = spec.col.as_deref();
    let hue_levels = levels(frame, hue_var)?;
    let row_levels = levels(frame, row_var)?;
    let col_levels = levels(frame, col_var)?;
    let categories = match category_var {
        Some(c) => frame.distinct_labels(c)?,
        None => vec![String::new()],
    };

    let mut facets = Vec::with_capacity(row_levels.len() * col_levels.len());
    for row in &row_levels {
        let by_row = subset(frame, row_var, row.as_deref())?;
        for col in &col_levels {
            let cell = subset(&by_row, col_var, col.as_deref())?;
            let mut groups = Vec::new();
            for category in &categories {
                let by_cat = match category_var {
                    Some(c) => cell.filter_eq(c, category)?,
                    None => cell.clone(),
                };
                for hue in &hue_levels {
                    let group = subset(&by_cat, hue_var, hue.as_deref())?;
                    if let Some(stat) = category_stat(&group, spec.kind, value_var)? {
                        groups.push(CategoryGroup {
                            category: category.clone(),
                            hue: hue.clone(),
                            stat,
                        });
                    }
                }
            }
            facets.push(Facet {
                row: row.clone(),
                col: col.clone(),
                groups,
            });
        }
    }

    Ok(CategoricalFigure {
        kind: spec.kind,
        orientation,
        category_var: category_var.map(str::to_string),
        value_var: value_var.map(str::to_string),
        hue_var: hue_var.map(str::to_string),
        hue_levels: hue_levels.into_iter().flatten().collect(),
        row_var: row_var.map(str::to_string),
        col_var: col_var.map(str::to_string),
        facets,
        x_tick_rotation: X_TICK_ROTATION_DEG,
    })
}

/// Statistic for one (facet, category, hue) cell; `None` when the cell has
/// no observations.
fn category_stat(
    group: &Frame,
    kind: PlotKind,
    value_var: Option<&str>,
) -> Result<Option<CategoryStat>, RenderError> {
    if kind == PlotKind::Count {
        let n = group.len();
        return Ok((n > 0).then_some(CategoryStat::Count(n)));
    }
    let Some(var) = value_var else {
        return Err(RenderError::MissingVariable("y"));
    };
    let values: Vec<f64> = group.values(var)?.filter_map(Value::as_f64).collect();
    if values.is_empty() {
        return Ok(None);
    }
    let summary = Summary::of(&values)?;
    Ok(Some(match kind {
        PlotKind::Bar | PlotKind::Point => CategoryStat::Mean {
            mean: summary.mean.unwrap_or_default(),
            n: summary.count,
        },
        _ => CategoryStat::Distribution { summary, values },
    }))
}

fn histogram(frame: &Frame, x: Option<&str>, hue: Option<&str>) -> Result<HistogramFigure, RenderError> {
    let x = x.ok_or(RenderError::MissingVariable("x"))?;
    require_numeric(frame, x)?;
    let hue_levels = levels(frame, hue)?;

    let mut series: Vec<Vec<f64>> = Vec::with_capacity(hue_levels.len());
    for level in &hue_levels {
        let part = subset(frame, hue, level.as_deref())?;
        series.push(part.values(x)?.filter_map(Value::as_f64).collect());
    }
    let all: Vec<f64> = series.iter().flatten().copied().collect();
    if all.is_empty() {
        return Err(RenderError::NoData);
    }
    let lo = all.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = all.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let (lo, hi, nbins) = if lo == hi {
        (lo - 0.5, hi + 0.5, 1)
    } else {
        (lo, hi, sturges_bins(all.len()))
    };
    let width = (hi - lo) / nbins as f64;

    let mut bins: Vec<HistogramBin> = (0..nbins)
        .map(|i| HistogramBin {
            lo: lo + width * i as f64,
            hi: if i + 1 == nbins { hi } else { lo + width * (i + 1) as f64 },
            counts: vec![0; series.len()],
        })
        .collect();
    for (s_idx, values) in series.iter().enumerate() {
        for v in values {
            // The last bin is closed on the right.
            let idx = (((v - lo) / width) as usize).min(nbins - 1);
            bins[idx].counts[s_idx] += 1;
        }
    }

    Ok(HistogramFigure {
        x_var: x.to_string(),
        hue_var: hue.map(str::to_string),
        hue_levels: hue_levels.into_iter().flatten().collect(),
        bins,
    })
}

fn sturges_bins(n: usize) -> usize {
    let k = (n as f64).log2().ceil() as usize + 1;
    k.clamp(1, MAX_BINS)
}

// ---------------------------------------------------------------------------
// Drawing
// ---------------------------------------------------------------------------

impl Figure {
    /// Lay the figure out as terminal text.
    pub fn draw(&self) -> String {
        match self {
            Self::Summary(frame) => crate::render::draw_frame(frame, frame.len()),
            Self::Categorical(fig) => fig.draw(),
            Self::Histogram(fig) => fig.draw(),
        }
    }
}

/// Bar charts take integer values; means are kept to three decimals.
fn scaled(v: f64) -> u64 {
    (v.max(0.0) * BAR_SCALE).round() as u64
}

fn truncate(label: &str, max: usize) -> String {
    if label.width() <= max {
        return label.to_string();
    }
    let mut out = String::new();
    for ch in label.chars() {
        if out.width() + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('…');
    out
}

fn pad(label: &str, width: usize) -> String {
    let w = label.width();
    format!("{label}{}", " ".repeat(width.saturating_sub(w)))
}

fn hue_style(levels: &[String], hue: Option<&String>) -> Style {
    let idx = hue
        .and_then(|h| levels.iter().position(|l| l == h))
        .unwrap_or(0);
    Style::new().fg(HUE_COLORS[idx % HUE_COLORS.len()])
}

fn legend(var: Option<&String>, levels: &[String]) -> Option<String> {
    let var = var?;
    let mut spans = vec![Span::raw(format!("{var}:"))];
    for (i, level) in levels.iter().enumerate() {
        spans.push(Span::styled(" ■", Style::new().fg(HUE_COLORS[i % HUE_COLORS.len()])));
        spans.push(Span::raw(format!(" {level}")));
    }
    let line = Line::from(spans);
    let width = line.width();
    draw_widget(line, width, 1).into_iter().next()
}

fn facet_title(fig: &CategoricalFigure, facet: &Facet) -> Option<String> {
    let mut parts = Vec::new();
    if let (Some(var), Some(level)) = (&fig.row_var, &facet.row) {
        parts.push(format!("{var} = {level}"));
    }
    if let (Some(var), Some(level)) = (&fig.col_var, &facet.col) {
        parts.push(format!("{var} = {level}"));
    }
    (!parts.is_empty()).then(|| parts.join(" | "))
}

/// Place `label` diagonally below column `start`, one row down per character.
/// Characters falling outside the buffer are dropped.
fn stamp_rotated(buf: &mut Buffer, start: usize, label: &str) {
    for (i, ch) in label.chars().enumerate() {
        let (x, y) = (start + i, i);
        if x < usize::from(buf.area.width) && y < usize::from(buf.area.height) {
            buf.set_string(clamp_u16(x), clamp_u16(y), ch.to_string(), Style::new());
        }
    }
}

/// One distribution drawn across a single row.
struct Strip<'a> {
    kind: PlotKind,
    summary: &'a Summary,
    values: &'a [f64],
    range: (f64, f64),
    style: Style,
}

impl Strip<'_> {
    fn column(&self, v: f64, width: u16) -> u16 {
        let (lo, hi) = self.range;
        let last = width.saturating_sub(1);
        let t = ((v - lo) / (hi - lo)).clamp(0.0, 1.0);
        ((t * f64::from(last)).round() as u16).min(last)
    }

    fn fill(&self, buf: &mut Buffer, area: Rect, from: u16, to: u16, symbol: &str) {
        for x in from..=to.min(area.width.saturating_sub(1)) {
            buf[(area.x + x, area.y)].set_symbol(symbol).set_style(self.style);
        }
    }

    fn render_box(&self, area: Rect, buf: &mut Buffer) {
        let s = self.summary;
        let (Some(min), Some(q1), Some(med), Some(q3), Some(max)) = (s.min, s.q1, s.median, s.q3, s.max)
        else {
            return;
        };
        let col = |v: f64| self.column(v, area.width);
        self.fill(buf, area, col(min), col(max), "─");
        if self.kind == PlotKind::Boxen
            && self.values.len() >= 8
            && let (Ok(Some(lo)), Ok(Some(hi))) = (quantile(self.values, 0.125), quantile(self.values, 0.875))
        {
            self.fill(buf, area, col(lo), col(hi), "▒");
        }
        self.fill(buf, area, col(q1), col(q3), "█");
        for (v, symbol) in [(min, "├"), (max, "┤"), (med, "┃")] {
            self.fill(buf, area, col(v), col(v), symbol);
        }
    }
}

impl Widget for Strip<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if area.is_empty() {
            return;
        }
        match self.kind {
            PlotKind::Violin | PlotKind::Swarm => {
                let mut counts = vec![0u64; usize::from(area.width)];
                for v in self.values {
                    counts[usize::from(self.column(*v, area.width))] += 1;
                }
                let peak = counts.iter().copied().max().unwrap_or(0).max(1);
                let bar_set = if self.kind == PlotKind::Violin {
                    symbols::bar::NINE_LEVELS
                } else {
                    symbols::bar::THREE_LEVELS
                };
                Sparkline::default()
                    .data(counts.as_slice())
                    .max(peak)
                    .bar_set(bar_set)
                    .style(self.style)
                    .render(area, buf);
            }
            _ => self.render_box(area, buf),
        }
    }
}

impl CategoricalFigure {
    fn value_label(&self) -> String {
        match (self.kind, &self.value_var) {
            (PlotKind::Count, _) => "count".to_string(),
            (PlotKind::Bar | PlotKind::Point, Some(v)) => format!("mean({v})"),
            (_, Some(v)) => v.clone(),
            (_, None) => String::new(),
        }
    }

    fn is_scalar(&self) -> bool {
        matches!(self.kind, PlotKind::Count | PlotKind::Bar | PlotKind::Point)
    }

    pub fn draw(&self) -> String {
        let mut out = Vec::new();
        let cat = self.category_var.clone().unwrap_or_default();
        out.push(format!(
            "{} plot: {} by {}",
            self.kind,
            self.value_label(),
            if cat.is_empty() { "(all rows)" } else { cat.as_str() }
        ));
        if let Some(line) = legend(self.hue_var.as_ref(), &self.hue_levels) {
            out.push(line);
        }

        // Shared value scale across facets.
        let (vmin, vmax) = self.value_range();
        for facet in &self.facets {
            out.push(String::new());
            if let Some(title) = facet_title(self, facet) {
                out.push(title);
            }
            if facet.groups.is_empty() {
                out.push("(no observations)".to_string());
                continue;
            }
            let lines = if self.is_scalar() && self.orientation == Orientation::Vertical {
                self.draw_columns(facet, vmax)
            } else if self.is_scalar() {
                self.draw_bars(facet, vmax)
            } else {
                self.draw_strips(facet, vmin, vmax)
            };
            out.extend(lines);
        }
        out.join("\n")
    }

    fn value_range(&self) -> (f64, f64) {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for g in self.facets.iter().flat_map(|f| &f.groups) {
            match &g.stat {
                CategoryStat::Distribution { summary, .. } => {
                    lo = lo.min(summary.min.unwrap_or(lo));
                    hi = hi.max(summary.max.unwrap_or(hi));
                }
                other => {
                    let v = other.scalar().unwrap_or_default();
                    lo = lo.min(v.min(0.0));
                    hi = hi.max(v);
                }
            }
        }
        if !lo.is_finite() || !hi.is_finite() {
            return (0.0, 1.0);
        }
        if lo == hi { (lo - 0.5, hi + 0.5) } else { (lo, hi) }
    }

    fn bar(&self, g: &CategoryGroup) -> Bar<'static> {
        Bar::default()
            .value(scaled(g.stat.scalar().unwrap_or_default()))
            .style(hue_style(&self.hue_levels, g.hue.as_ref()))
    }

    /// Vertical column chart with diagonal tick labels.
    fn draw_columns(&self, facet: &Facet, vmax: f64) -> Vec<String> {
        let mut chart = BarChart::default()
            .block(Block::new().borders(Borders::LEFT | Borders::BOTTOM))
            .bar_width(1)
            .bar_gap(0)
            .group_gap(1)
            .bar_set(symbols::bar::NINE_LEVELS)
            .max(scaled(vmax).max(1));
        // One cell per bar, one blank between categories.
        let mut tick_starts: Vec<(usize, &str)> = Vec::new();
        let mut cursor = 0usize;
        for group in facet.groups.chunk_by(|a, b| a.category == b.category) {
            if !tick_starts.is_empty() {
                cursor += 1;
            }
            tick_starts.push((cursor, group[0].category.as_str()));
            cursor += group.len();
            // Values would not fit in one-cell bars.
            let bars: Vec<Bar> = group.iter().map(|g| self.bar(g).text_value(String::new())).collect();
            chart = chart.data(BarGroup::default().bars(&bars));
        }

        let axis_w = format_float(vmax).width();
        let body = draw_widget(chart, cursor + 1, BAR_HEIGHT + 1);
        let last = body.len().saturating_sub(1);
        let mut lines: Vec<String> = body
            .into_iter()
            .enumerate()
            .map(|(i, line)| {
                let tick = match i {
                    0 => format_float(vmax),
                    i if i == last => "0".to_string(),
                    _ => String::new(),
                };
                format!("{tick:>axis_w$} {line}")
            })
            .collect();

        let labels: Vec<(usize, String)> = tick_starts
            .iter()
            .map(|(start, label)| (*start, truncate(label, MAX_TICK_LABEL)))
            .collect();
        let height = labels.iter().map(|(_, l)| l.chars().count()).max().unwrap_or(0);
        let mut canvas = Buffer::empty(Rect::new(
            0,
            0,
            clamp_u16(cursor + MAX_TICK_LABEL),
            clamp_u16(height),
        ));
        for (start, label) in &labels {
            stamp_rotated(&mut canvas, *start, label);
        }
        let indent = " ".repeat(axis_w + 2);
        lines.extend(
            buffer_lines(&canvas)
                .into_iter()
                .map(|line| format!("{indent}{line}")),
        );
        lines
    }

    /// Horizontal bar chart, categories down the left.
    fn draw_bars(&self, facet: &Facet, vmax: f64) -> Vec<String> {
        let gap = u16::from(self.hue_var.is_some());
        let mut chart = BarChart::default()
            .direction(Direction::Horizontal)
            .bar_width(1)
            .bar_gap(0)
            .group_gap(gap)
            .max(scaled(vmax).max(1));
        let mut label_w = 0usize;
        let mut rows = 0usize;
        for (i, group) in facet.groups.chunk_by(|a, b| a.category == b.category).enumerate() {
            if i > 0 {
                rows += usize::from(gap);
            }
            let bars: Vec<Bar> = group
                .iter()
                .map(|g| {
                    let label = match &g.hue {
                        Some(h) => truncate(&format!("{} [{h}]", g.category), MAX_ROW_LABEL),
                        None => truncate(&g.category, MAX_ROW_LABEL),
                    };
                    label_w = label_w.max(label.width());
                    let v = g.stat.scalar().unwrap_or_default();
                    self.bar(g).label(Line::from(label)).text_value(format_float(v))
                })
                .collect();
            rows += bars.len();
            chart = chart.data(BarGroup::default().bars(&bars));
        }
        draw_widget(chart, label_w + 1 + STRIP_WIDTH, rows)
    }

    /// One strip per group for distribution kinds.
    fn draw_strips(&self, facet: &Facet, vmin: f64, vmax: f64) -> Vec<String> {
        let label_w = self.label_width(facet);
        let frame_area = Rect::new(0, 0, clamp_u16(STRIP_WIDTH + 2), 1);
        let mut lines = Vec::new();
        for g in &facet.groups {
            let CategoryStat::Distribution { summary, values } = &g.stat else {
                continue;
            };
            let mut buf = Buffer::empty(frame_area);
            let block = Block::new().borders(Borders::LEFT | Borders::RIGHT);
            let inner = block.inner(frame_area);
            block.render(frame_area, &mut buf);
            Strip {
                kind: self.kind,
                summary,
                values,
                range: (vmin, vmax),
                style: hue_style(&self.hue_levels, g.hue.as_ref()),
            }
            .render(inner, &mut buf);
            let strip = buffer_lines(&buf).into_iter().next().unwrap_or_default();

            let hue_suffix = g.hue.as_deref().map(|h| format!(" [{h}]")).unwrap_or_default();
            lines.push(format!(
                "{} {strip} n={} median={}{hue_suffix}",
                pad(&truncate(&g.category, MAX_ROW_LABEL), label_w),
                summary.count,
                summary.median.map(format_float).unwrap_or_default(),
            ));
        }
        lines.push(format!(
            "{} {}{}",
            " ".repeat(label_w),
            pad(&format_float(vmin), STRIP_WIDTH / 2 + 1),
            format!("{:>w$}", format_float(vmax), w = STRIP_WIDTH / 2 + 1)
        ));
        lines
    }

    fn label_width(&self, facet: &Facet) -> usize {
        facet
            .groups
            .iter()
            .map(|g| truncate(&g.category, MAX_ROW_LABEL).width())
            .max()
            .unwrap_or(0)
    }
}

impl HistogramFigure {
    pub fn draw(&self) -> String {
        let mut out = vec![format!("distribution of {}", self.x_var)];
        if let Some(line) = legend(self.hue_var.as_ref(), &self.hue_levels) {
            out.push(line);
        }
        let peak = self
            .bins
            .iter()
            .flat_map(|b| b.counts.iter().copied())
            .max()
            .unwrap_or(0);
        let gap = u16::from(self.hue_levels.len() > 1);
        let mut chart = BarChart::default()
            .direction(Direction::Horizontal)
            .bar_width(1)
            .bar_gap(0)
            .group_gap(gap)
            .max((peak as u64).max(1));
        let mut label_w = 0usize;
        let mut rows = 0usize;
        for (i, bin) in self.bins.iter().enumerate() {
            if i > 0 {
                rows += usize::from(gap);
            }
            let label = format!("[{}, {}]", format_float(bin.lo), format_float(bin.hi));
            label_w = label_w.max(label.width());
            let bars: Vec<Bar> = bin
                .counts
                .iter()
                .enumerate()
                .map(|(h, count)| {
                    let bar = Bar::default()
                        .value(*count as u64)
                        .text_value(count.to_string())
                        .style(Style::new().fg(HUE_COLORS[h % HUE_COLORS.len()]));
                    // The bin range labels the first bar of each group.
                    if h == 0 { bar.label(Line::from(label.clone())) } else { bar }
                })
                .collect();
            rows += bars.len();
            chart = chart.data(BarGroup::default().bars(&bars));
        }
        out.extend(draw_widget(chart, label_w + 1 + HIST_WIDTH, rows));
        out.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Column, ColumnKind};

    fn frame() -> Frame {
        let rows = [
            ("F", 52, "ICU"),
            ("M", 19, "ED"),
            ("F", 71, "ICU"),
            ("M", 33, "ICU"),
            ("F", 45, "ED"),
        ];
        Frame::new(
            vec![
                Column::new("gender", ColumnKind::Text),
                Column::new("anchor_age", ColumnKind::Int),
                Column::new("unit", ColumnKind::Text),
            ],
            rows.iter()
                .map(|(g, a, u)| vec![Value::Text((*g).into()), Value::Int(*a), Value::Text((*u).into())])
                .collect(),
        )
        .unwrap()
    }

    fn spec(family: PlotFamily, kind: PlotKind) -> PlotSpec {
        PlotSpec {
            family: Some(family),
            kind,
            ..Default::default()
        }
    }

    #[test]
    fn family_and_kind_parse() {
        assert_eq!("Categorical".parse::<PlotFamily>().unwrap(), PlotFamily::Categorical);
        assert_eq!("boxen".parse::<PlotKind>().unwrap(), PlotKind::Boxen);
        assert!("pie".parse::<PlotKind>().is_err());
        assert_eq!(PlotKind::default(), PlotKind::Count);
    }

    #[test]
    fn unset_family_renders_nothing() {
        let mut s = PlotSpec::default();
        s.x = Some("gender".into());
        assert_eq!(render_plot(Some(&frame()), &s).unwrap(), None);
        assert_eq!(render_plot(None, &s).unwrap(), None);
    }

    #[test]
    fn count_plot_counts_per_category() {
        let mut s = spec(PlotFamily::Categorical, PlotKind::Count);
        s.x = Some("gender".into());
        let Some(Figure::Categorical(fig)) = render_plot(Some(&frame()), &s).unwrap() else {
            panic!("expected categorical figure");
        };
        assert_eq!(fig.orientation, Orientation::Vertical);
        assert_eq!(fig.x_tick_rotation, 45);
        let counts: Vec<(String, CategoryStat)> = fig.facets[0]
            .groups
            .iter()
            .map(|g| (g.category.clone(), g.stat.clone()))
            .collect();
        assert_eq!(
            counts,
            vec![
                ("F".to_string(), CategoryStat::Count(3)),
                ("M".to_string(), CategoryStat::Count(2))
            ]
        );
    }

    #[test]
    fn count_plot_rejects_both_axes() {
        let mut s = spec(PlotFamily::Categorical, PlotKind::Count);
        s.x = Some("gender".into());
        s.y = Some("unit".into());
        assert_eq!(render_plot(Some(&frame()), &s), Err(RenderError::BothAxes));
    }

    #[test]
    fn box_plot_needs_a_numeric_axis() {
        let mut s = spec(PlotFamily::Categorical, PlotKind::Box);
        s.x = Some("gender".into());
        s.y = Some("unit".into());
        assert_eq!(
            render_plot(Some(&frame()), &s),
            Err(RenderError::NotNumeric("unit".into()))
        );
    }

    #[test]
    fn horizontal_orientation_when_x_is_numeric() {
        let mut s = spec(PlotFamily::Categorical, PlotKind::Bar);
        s.x = Some("anchor_age".into());
        s.y = Some("gender".into());
        let Some(Figure::Categorical(fig)) = render_plot(Some(&frame()), &s).unwrap() else {
            panic!("expected categorical figure");
        };
        assert_eq!(fig.orientation, Orientation::Horizontal);
        assert_eq!(fig.category_var.as_deref(), Some("gender"));
        let CategoryStat::Mean { mean, n } = fig.facets[0].groups[1].stat else {
            panic!("expected mean");
        };
        assert_eq!(n, 2);
        assert!((mean - 26.0).abs() < 1e-9);
    }

    #[test]
    fn facets_cover_row_by_col_grid() {
        let mut s = spec(PlotFamily::Categorical, PlotKind::Violin);
        s.x = Some("gender".into());
        s.y = Some("anchor_age".into());
        s.row = Some("unit".into());
        s.hue = Some("gender".into());
        let Some(Figure::Categorical(fig)) = render_plot(Some(&frame()), &s).unwrap() else {
            panic!("expected categorical figure");
        };
        assert_eq!(fig.facets.len(), 2);
        assert_eq!(fig.facets[0].row.as_deref(), Some("ICU"));
        assert_eq!(fig.hue_levels, vec!["F", "M"]);
        let text = Figure::Categorical(fig).draw();
        assert!(text.contains("unit = ICU"));
        assert!(text.contains("unit = ED"));
    }

    #[test]
    fn numeric_ignores_facets_and_kind() {
        let mut a = spec(PlotFamily::Numeric, PlotKind::Count);
        a.x = Some("anchor_age".into());
        let mut b = a.clone();
        b.kind = PlotKind::Violin;
        b.row = Some("unit".into());
        b.col = Some("gender".into());
        b.y = Some("gender".into());
        assert_eq!(
            render_plot(Some(&frame()), &a).unwrap(),
            render_plot(Some(&frame()), &b).unwrap()
        );
    }

    #[test]
    fn histogram_bins_hold_every_value() {
        let mut s = spec(PlotFamily::Numeric, PlotKind::Count);
        s.x = Some("anchor_age".into());
        s.hue = Some("gender".into());
        let Some(Figure::Histogram(h)) = render_plot(Some(&frame()), &s).unwrap() else {
            panic!("expected histogram");
        };
        let total: usize = h.bins.iter().flat_map(|b| b.counts.iter()).sum();
        assert_eq!(total, 5);
        assert_eq!(h.bins.len(), sturges_bins(5));
        assert_eq!(h.bins.last().unwrap().hi, 71.0);
    }

    #[test]
    fn numeric_on_text_column_fails() {
        let mut s = spec(PlotFamily::Numeric, PlotKind::Count);
        s.x = Some("gender".into());
        assert_eq!(
            render_plot(Some(&frame()), &s),
            Err(RenderError::NotNumeric("gender".into()))
        );
    }

    #[test]
    fn rotated_labels_step_diagonally() {
        let mut canvas = Buffer::empty(Rect::new(0, 0, 6, 3));
        stamp_rotated(&mut canvas, 2, "abcdef");
        assert_eq!(buffer_lines(&canvas), vec!["  a", "   b", "    c"]);
    }

    #[test]
    fn column_chart_draws_without_panicking() {
        let mut s = spec(PlotFamily::Categorical, PlotKind::Count);
        s.x = Some("unit".into());
        s.hue = Some("gender".into());
        let fig = render_plot(Some(&frame()), &s).unwrap().unwrap();
        colored::control::set_override(false);
        let text = fig.draw();
        assert!(text.contains("count plot"));
        assert!(text.contains("gender: ■ F ■ M"));
        let lines: Vec<&str> = text.lines().collect();
        // Top tick is the tallest count; the baseline closes the axis.
        assert!(lines[3].starts_with("2.0 │"), "{text}");
        assert!(lines.iter().any(|l| l.starts_with("  0 └──")), "{text}");
        // ICU holds F=2, M=1 and ED holds F=1, M=1: the top row has one full cell.
        assert_eq!(lines[3].matches('█').count(), 1);
    }

    #[test]
    fn horizontal_bars_carry_labels_and_values() {
        colored::control::set_override(false);
        let mut s = spec(PlotFamily::Categorical, PlotKind::Bar);
        s.x = Some("anchor_age".into());
        s.y = Some("gender".into());
        let text = render_plot(Some(&frame()), &s).unwrap().unwrap().draw();
        let bars: Vec<&str> = text.lines().skip(2).collect();
        assert_eq!(bars.len(), 2);
        assert!(bars[0].starts_with("F "));
        assert!(bars[0].contains("56"));
        assert!(bars[1].starts_with("M "));
        assert!(bars[1].contains("26.0"));
    }

    #[test]
    fn box_strip_marks_quartiles_inside_a_frame() {
        colored::control::set_override(false);
        let mut s = spec(PlotFamily::Categorical, PlotKind::Box);
        s.x = Some("gender".into());
        s.y = Some("anchor_age".into());
        let text = render_plot(Some(&frame()), &s).unwrap().unwrap().draw();
        // The youngest value sits on the left edge of the shared scale.
        let male = text.lines().find(|l| l.starts_with("M ")).unwrap();
        assert!(male.starts_with("M │├──"), "{male}");
        assert!(male.contains('┃') && male.contains('┤'));
        assert!(male.contains("│ n=2 median=26.0"));
        let female = text.lines().find(|l| l.starts_with("F ")).unwrap();
        assert!(female.contains("n=3 median=52.0"));
    }

    #[test]
    fn histogram_draws_one_labelled_row_per_bin() {
        colored::control::set_override(false);
        let mut s = spec(PlotFamily::Numeric, PlotKind::Count);
        s.x = Some("anchor_age".into());
        let Some(fig @ Figure::Histogram(_)) = render_plot(Some(&frame()), &s).unwrap() else {
            panic!("expected histogram");
        };
        let text = fig.draw();
        let rows: Vec<&str> = text.lines().skip(1).collect();
        assert_eq!(rows.len(), sturges_bins(5));
        assert!(rows[0].starts_with("[19.0, "));
        assert!(rows.last().unwrap().contains("71.0]"));
    }
}
