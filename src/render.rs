//! Text rendering of result frames.
//!
//! Tables and charts are laid out with ratatui widgets into an off-screen
//! [`Buffer`], then flattened to lines; cell colour and bold survive as
//! ANSI escapes when `colored` allows them.

use crate::frame::{ColumnKind, Frame};
use crate::plot::RenderError;
use colored::Colorize;
use ratatui::buffer::Buffer;
use ratatui::layout::{Constraint, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Line;
use ratatui::widgets::{Cell, Row, Table, Widget};
use unicode_width::UnicodeWidthStr;

/// Rows shown before the middle of a long frame is elided.
pub const DISPLAY_ROWS: usize = 20;

const MAX_CELL_WIDTH: usize = 24;
const COLUMN_SPACING: u16 = 2;

/// A rendered window of the result frame, ready to print.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableView {
    /// Absolute index of the first row (the query offset).
    pub first_row: u64,
    pub row_count: usize,
    pub column_count: usize,
    pub body: String,
}

impl TableView {
    pub fn caption(&self) -> String {
        if self.row_count == 0 {
            return format!("0 rows × {} columns", self.column_count);
        }
        format!(
            "rows {}–{} ({} rows × {} columns)",
            self.first_row,
            self.first_row + self.row_count as u64 - 1,
            self.row_count,
            self.column_count
        )
    }

    pub fn draw(&self) -> String {
        format!("{}\n{}", self.body, self.caption().dimmed())
    }
}

/// Render the table pane for the current frame.
pub fn table_view(frame: Option<&Frame>, first_row: u64) -> Result<TableView, RenderError> {
    let frame = frame.ok_or(RenderError::NoData)?;
    if frame.columns().is_empty() {
        return Err(RenderError::NoData);
    }
    Ok(TableView {
        first_row,
        row_count: frame.len(),
        column_count: frame.columns().len(),
        body: draw_indexed(frame, DISPLAY_ROWS, Some(first_row)),
    })
}

/// Lay out a frame as an aligned text table, eliding the middle when it has
/// more than `max_rows` rows.
pub fn draw_frame(frame: &Frame, max_rows: usize) -> String {
    draw_indexed(frame, max_rows, None)
}

/// Render `widget` into a `width` × `height` buffer and flatten it.
pub(crate) fn draw_widget(widget: impl Widget, width: usize, height: usize) -> Vec<String> {
    let area = Rect::new(0, 0, clamp_u16(width), clamp_u16(height));
    let mut buf = Buffer::empty(area);
    widget.render(area, &mut buf);
    buffer_lines(&buf)
}

pub(crate) fn clamp_u16(n: usize) -> u16 {
    u16::try_from(n).unwrap_or(u16::MAX)
}

/// One string per buffer row with trailing blanks dropped.
pub(crate) fn buffer_lines(buf: &Buffer) -> Vec<String> {
    let width = usize::from(buf.area.width);
    if width == 0 {
        return Vec::new();
    }
    buf.content
        .chunks(width)
        .map(|row| {
            let end = row
                .iter()
                .rposition(|cell| cell.symbol() != " ")
                .map_or(0, |i| i + 1);
            let mut line = String::new();
            let mut hidden = 0usize;
            for cell in &row[..end] {
                // Cells behind a wide glyph are blank placeholders.
                if hidden > 0 {
                    hidden -= 1;
                    continue;
                }
                let symbol = cell.symbol();
                hidden = symbol.width().saturating_sub(1);
                line.push_str(&paint(symbol, cell.fg, cell.modifier));
            }
            line
        })
        .collect()
}

fn paint(symbol: &str, fg: Color, modifier: Modifier) -> String {
    let color = match fg {
        Color::Red => Some(colored::Color::Red),
        Color::Green => Some(colored::Color::Green),
        Color::Yellow => Some(colored::Color::Yellow),
        Color::Blue => Some(colored::Color::Blue),
        Color::Magenta => Some(colored::Color::Magenta),
        Color::Cyan => Some(colored::Color::Cyan),
        _ => None,
    };
    let bold = modifier.contains(Modifier::BOLD);
    if color.is_none() && !bold {
        return symbol.to_string();
    }
    let mut out = symbol.normal();
    if let Some(color) = color {
        out = out.color(color);
    }
    if bold {
        out = out.bold();
    }
    out.to_string()
}

fn clip(cell: &str) -> String {
    let flat = cell.replace(['\n', '\r', '\t'], " ");
    if flat.width() <= MAX_CELL_WIDTH {
        return flat;
    }
    let mut out = String::new();
    for ch in flat.chars() {
        if out.width() + 1 >= MAX_CELL_WIDTH {
            break;
        }
        out.push(ch);
    }
    out.push('…');
    out
}

fn aligned(text: String, right: bool) -> Cell<'static> {
    let line = Line::from(text);
    Cell::from(if right { line.right_aligned() } else { line })
}

fn draw_indexed(frame: &Frame, max_rows: usize, first_row: Option<u64>) -> String {
    let n = frame.len();
    let shown: Vec<Option<usize>> = if n > max_rows && max_rows >= 2 {
        let head = max_rows / 2;
        let tail = max_rows - head;
        (0..head)
            .map(Some)
            .chain(std::iter::once(None))
            .chain((n - tail..n).map(Some))
            .collect()
    } else {
        (0..n).map(Some).collect()
    };

    let mut grid: Vec<Vec<String>> = Vec::with_capacity(shown.len() + 1);
    let mut header: Vec<String> = Vec::new();
    if first_row.is_some() {
        header.push(String::new());
    }
    header.extend(frame.columns().iter().map(|c| clip(&c.name)));
    grid.push(header);
    for idx in &shown {
        let mut line = Vec::with_capacity(frame.columns().len() + 1);
        match idx {
            Some(i) => {
                if let Some(base) = first_row {
                    line.push((base + *i as u64).to_string());
                }
                line.extend(frame.rows()[*i].iter().map(|v| clip(&v.to_string())));
            }
            None => {
                let width = frame.columns().len() + usize::from(first_row.is_some());
                line.extend(std::iter::repeat_n("…".to_string(), width));
            }
        }
        grid.push(line);
    }

    let cols = grid[0].len();
    if cols == 0 {
        return String::new();
    }
    let widths: Vec<usize> = (0..cols)
        .map(|c| grid.iter().map(|row| row[c].width()).max().unwrap_or(0))
        .collect();
    let offset = usize::from(first_row.is_some());
    let right_aligned: Vec<bool> = (0..cols)
        .map(|c| {
            c < offset
                || matches!(
                    frame.columns()[c - offset].kind,
                    ColumnKind::Int | ColumnKind::Float
                )
        })
        .collect();

    let mut rows = grid.into_iter().map(|cells| {
        Row::new(
            cells
                .into_iter()
                .zip(&right_aligned)
                .map(|(text, right)| aligned(text, *right)),
        )
    });
    let header = rows
        .next()
        .unwrap_or_default()
        .style(Style::new().add_modifier(Modifier::BOLD))
        .bottom_margin(1);
    let body: Vec<Row> = rows.collect();
    let height = body.len() + 2;
    let table = Table::new(body, widths.iter().map(|w| Constraint::Length(clamp_u16(*w))))
        .header(header)
        .column_spacing(COLUMN_SPACING);

    let total_width = widths.iter().sum::<usize>() + usize::from(COLUMN_SPACING) * (cols - 1);
    let area = Rect::new(0, 0, clamp_u16(total_width), clamp_u16(height));
    let mut buf = Buffer::empty(area);
    table.render(area, &mut buf);
    buf.set_string(0, 1, "─".repeat(total_width), Style::new());
    buffer_lines(&buf).join("\n")
}
