//! Line-oriented driver for [`Browser`].
//!
//! Each input line is one widget change (`db mimic_core`, `offset 2000`,
//! `plot categorical`, ...). Lines are split with shell quoting rules so
//! names containing spaces can be quoted. Parse errors and invalid
//! selections are reported and the session continues; query failures end
//! it.

use crate::browser::{Axis, Browser, BrowserError, Event, Pane};
use crate::plot::{PlotFamily, PlotKind};
use anyhow::{Context, Result};
use colored::Colorize;
use std::io::{BufRead, Write};

const HELP: &str = "\
commands:
  dbs | tables | columns        list selector options
  db <name|none>                select a database
  table <name|none>             select a table (fetches the first window)
  offset <n> | next | prev      move the query window
  plot <describe|categorical|numeric|none>
  kind <count|swarm|box|boxen|violin|bar|point>
  x|y|hue|row|col <column|none> plot variables
  show | status                 redraw panes / print selections
  help | quit";

/// A parsed input line.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Event(Event),
    Next,
    Prev,
    ListDatabases,
    ListTables,
    ListColumns,
    Show,
    Status,
    Help,
    Quit,
    Nothing,
}

fn optional(arg: Option<&String>) -> Option<String> {
    match arg.map(String::as_str) {
        None | Some("none") | Some("None") | Some("-") => None,
        Some(v) => Some(v.to_string()),
    }
}

/// Parse one line into a [`Command`].
pub fn parse_command(line: &str) -> Result<Command, String> {
    let words = shell_words::split(line).map_err(|e| format!("could not parse input: {e}"))?;
    let Some((head, rest)) = words.split_first() else {
        return Ok(Command::Nothing);
    };
    let arg = rest.first();
    let needs_arg = |name: &str| -> Result<&String, String> {
        arg.ok_or_else(|| format!("`{name}` needs an argument"))
    };
    let cmd = match head.to_ascii_lowercase().as_str() {
        "db" | "database" => Command::Event(Event::SelectDatabase(optional(Some(needs_arg("db")?)))),
        "table" => Command::Event(Event::SelectTable(optional(Some(needs_arg("table")?)))),
        "offset" => {
            let raw = needs_arg("offset")?;
            let n = raw
                .parse::<u64>()
                .map_err(|_| format!("offset must be a non-negative integer, got '{raw}'"))?;
            Command::Event(Event::SetOffset(n))
        }
        "next" => Command::Next,
        "prev" => Command::Prev,
        "plot" | "viz" => {
            let family = match optional(Some(needs_arg("plot")?)) {
                None => None,
                Some(v) => Some(v.parse::<PlotFamily>()?),
            };
            Command::Event(Event::SetPlotFamily(family))
        }
        "kind" => Command::Event(Event::SetPlotKind(needs_arg("kind")?.parse::<PlotKind>()?)),
        "x" => Command::Event(Event::SetAxis(Axis::X, optional(arg))),
        "y" => Command::Event(Event::SetAxis(Axis::Y, optional(arg))),
        "hue" => Command::Event(Event::SetAxis(Axis::Hue, optional(arg))),
        "row" => Command::Event(Event::SetAxis(Axis::Row, optional(arg))),
        "col" => Command::Event(Event::SetAxis(Axis::Col, optional(arg))),
        "dbs" | "databases" => Command::ListDatabases,
        "tables" => Command::ListTables,
        "columns" | "cols" => Command::ListColumns,
        "show" => Command::Show,
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(format!("unknown command '{other}' (try `help`)")),
    };
    Ok(cmd)
}

fn list(out: &mut dyn Write, title: &str, items: &[String], selected: Option<&str>) -> Result<()> {
    writeln!(out, "{}", title.bold())?;
    if items.is_empty() {
        writeln!(out, "  (none)")?;
    }
    for item in items {
        let marker = if Some(item.as_str()) == selected { "*" } else { " " };
        writeln!(out, "{marker} {item}")?;
    }
    Ok(())
}

/// Print both panes.
pub fn draw_panes(browser: &Browser<'_>, out: &mut dyn Write) -> Result<()> {
    if let Pane::Shown(view) = browser.table_pane() {
        writeln!(out, "{}", view.draw())?;
    }
    if let Pane::Shown(figure) = browser.plot_pane() {
        writeln!(out)?;
        writeln!(out, "{}", figure.draw())?;
    }
    Ok(())
}

pub fn draw_status(browser: &Browser<'_>, out: &mut dyn Write) -> Result<()> {
    let show = |v: Option<&str>| v.unwrap_or("-").to_string();
    let spec = browser.plot_spec();
    let (lo, hi) = browser.offset_range();
    writeln!(out, "database : {}", show(browser.database()))?;
    writeln!(out, "table    : {}", show(browser.table()))?;
    writeln!(
        out,
        "offset   : {} (range {lo}..={hi}, page {})",
        browser.offset(),
        browser.page_size()
    )?;
    writeln!(
        out,
        "plot     : {} kind={} x={} y={} hue={} row={} col={}",
        spec.family.map_or("-".to_string(), |f| f.to_string()),
        spec.kind,
        show(spec.x.as_deref()),
        show(spec.y.as_deref()),
        show(spec.hue.as_deref()),
        show(spec.row.as_deref()),
        show(spec.col.as_deref()),
    )?;
    Ok(())
}

/// Whether an event changes what the panes show.
fn redraws(event: &Event) -> bool {
    !matches!(event, Event::SelectDatabase(_))
}

/// Run commands from `input` until it is exhausted or `quit` is read.
pub fn run(browser: &mut Browser<'_>, input: &mut dyn BufRead, out: &mut dyn Write, prompt: bool) -> Result<()> {
    let mut line = String::new();
    loop {
        if prompt {
            write!(out, "{} ", "bqb>".cyan())?;
            out.flush()?;
        }
        line.clear();
        if input.read_line(&mut line).context("reading command")? == 0 {
            break;
        }
        let command = match parse_command(&line) {
            Ok(c) => c,
            Err(msg) => {
                writeln!(out, "{}", msg.yellow())?;
                continue;
            }
        };
        let event = match command {
            Command::Quit => break,
            Command::Nothing => continue,
            Command::Help => {
                writeln!(out, "{HELP}")?;
                continue;
            }
            Command::ListDatabases => {
                list(out, "databases", browser.database_options(), browser.database())?;
                continue;
            }
            Command::ListTables => {
                list(out, "tables", browser.table_options(), browser.table())?;
                continue;
            }
            Command::ListColumns => {
                list(out, "columns", browser.column_options(), None)?;
                continue;
            }
            Command::Show => {
                draw_panes(browser, out)?;
                continue;
            }
            Command::Status => {
                draw_status(browser, out)?;
                continue;
            }
            Command::Next => Event::SetOffset(browser.offset().saturating_add(browser.page_size())),
            Command::Prev => Event::SetOffset(browser.offset().saturating_sub(browser.page_size())),
            Command::Event(e) => e,
        };
        let redraw = redraws(&event);
        match browser.dispatch(event) {
            Ok(()) => {
                if redraw {
                    draw_panes(browser, out)?;
                }
            }
            Err(BrowserError::Query(e)) => {
                return Err(e).context("query failed; ending session");
            }
            Err(e) => writeln!(out, "{}", e.to_string().yellow())?,
        }
    }
    Ok(())
}
