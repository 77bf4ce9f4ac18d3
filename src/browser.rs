//! Interactive dataset browser state.
//!
//! [`Browser`] owns every selection, the last fetched [`Frame`] and the two
//! display panes. Input arrives as discrete [`Event`]s through
//! [`Browser::dispatch`]; derived state (offset bounds, column options,
//! panes) is recomputed from the current selection after each event.
//!
//! Two failure classes are kept apart:
//! - query failures are fatal and propagate out of `dispatch`;
//! - rendering failures leave the affected pane [`Pane::Empty`].

use crate::client::{ClientError, QueryService};
use crate::frame::Frame;
use crate::manifest::{Manifest, qualify};
use crate::plot::{Figure, PlotFamily, PlotKind, PlotSpec, RenderError, render_plot};
use crate::render::{TableView, table_view};
use thiserror::Error;
use tracing::debug;

/// Rows fetched per query window unless configured otherwise.
pub const DEFAULT_PAGE_SIZE: u64 = 1000;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("query failed: {0}")]
    Query(#[from] ClientError),

    #[error("table '{table}' of database '{database}' is not in the manifest")]
    UnknownTable { database: String, table: String },

    #[error("'{0}' is not one of the offered options")]
    NotAnOption(String),

    #[error("column '{0}' is not in the current result")]
    UnknownColumn(String),

    #[error("select a database first")]
    NoDatabase,
}

/// Display state of one output area.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Pane<T> {
    #[default]
    Empty,
    Shown(T),
}

impl<T> Pane<T> {
    /// Best-effort display: a failed render leaves the pane empty.
    pub fn from_render(result: Result<T, RenderError>, pane: &str) -> Self {
        match result {
            Ok(content) => Self::Shown(content),
            Err(e) => {
                debug!(pane, "render skipped: {e}");
                Self::Empty
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn content(&self) -> Option<&T> {
        match self {
            Self::Shown(c) => Some(c),
            Self::Empty => None,
        }
    }
}

/// Which column-bound plot selector an event targets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Hue,
    Row,
    Col,
}

impl Axis {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::X => "x",
            Self::Y => "y",
            Self::Hue => "hue",
            Self::Row => "row var",
            Self::Col => "col var",
        }
    }
}

/// A single widget change.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    SelectDatabase(Option<String>),
    SelectTable(Option<String>),
    SetOffset(u64),
    SetPlotFamily(Option<PlotFamily>),
    SetPlotKind(PlotKind),
    SetAxis(Axis, Option<String>),
}

#[derive(Clone, Debug)]
pub struct BrowserOptions {
    /// Prefix joined to database names for remote calls, e.g. `physionet-data.`.
    pub base_project: String,
    /// Databases offered in the database selector.
    pub databases: Vec<String>,
    pub page_size: u64,
    /// Also recompute the plot pane when the offset moves.
    pub redraw_plot_on_offset: bool,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            base_project: String::new(),
            databases: Vec::new(),
            page_size: DEFAULT_PAGE_SIZE,
            redraw_plot_on_offset: false,
        }
    }
}

/// Selector state plus derived options and panes.
pub struct Browser<'a> {
    service: &'a dyn QueryService,
    manifest: Manifest,
    options: BrowserOptions,

    database: Option<String>,
    table_options: Vec<String>,
    table: Option<String>,
    offset: u64,
    offset_max: u64,

    frame: Option<Frame>,
    column_options: Vec<String>,
    plot: PlotSpec,

    table_pane: Pane<TableView>,
    plot_pane: Pane<Figure>,
}

impl<'a> Browser<'a> {
    /// A browser with nothing selected. Both panes start out rendered from
    /// the empty state, which leaves them empty.
    pub fn new(service: &'a dyn QueryService, manifest: Manifest, mut options: BrowserOptions) -> Self {
        options.page_size = options.page_size.max(1);
        options.databases.sort();
        let mut browser = Self {
            service,
            manifest,
            options,
            database: None,
            table_options: Vec::new(),
            table: None,
            offset: 0,
            offset_max: 0,
            frame: None,
            column_options: Vec::new(),
            plot: PlotSpec::default(),
            table_pane: Pane::Empty,
            plot_pane: Pane::Empty,
        };
        browser.redraw_table();
        browser.redraw_plot();
        browser
    }

    /// Apply one widget change.
    pub fn dispatch(&mut self, event: Event) -> Result<(), BrowserError> {
        debug!(?event, "dispatch");
        match event {
            Event::SelectDatabase(db) => self.select_database(db),
            Event::SelectTable(table) => self.select_table(table),
            Event::SetOffset(offset) => self.set_offset(offset),
            Event::SetPlotFamily(family) => {
                self.plot.family = family;
                self.redraw_plot();
                Ok(())
            }
            Event::SetPlotKind(kind) => {
                self.plot.kind = kind;
                self.redraw_plot();
                Ok(())
            }
            Event::SetAxis(axis, column) => self.set_axis(axis, column),
        }
    }

    fn select_database(&mut self, db: Option<String>) -> Result<(), BrowserError> {
        let Some(db) = db else {
            return Ok(());
        };
        if !self.options.databases.contains(&db) {
            return Err(BrowserError::NotAnOption(db));
        }
        let tables = self
            .service
            .list_tables(&qualify(&self.options.base_project, &db))?;
        self.database = Some(db);
        self.table_options = tables;
        self.table = None;
        Ok(())
    }

    fn select_table(&mut self, table: Option<String>) -> Result<(), BrowserError> {
        let Some(table) = table else {
            return Ok(());
        };
        let database = self.database.clone().ok_or(BrowserError::NoDatabase)?;
        if !self.table_options.contains(&table) {
            return Err(BrowserError::NotAnOption(table));
        }
        let rows = self
            .manifest
            .row_count(&database, &table)
            .ok_or_else(|| BrowserError::UnknownTable {
                database: database.clone(),
                table: table.clone(),
            })?;

        let frame = self.fetch(&database, &table, 0)?;
        self.table = Some(table);
        self.offset_max = rows;
        self.offset = 0;
        self.column_options = frame.column_names();
        self.frame = Some(frame);
        self.plot.clear_axes();
        self.redraw_table();
        self.redraw_plot();
        Ok(())
    }

    fn set_offset(&mut self, offset: u64) -> Result<(), BrowserError> {
        let (Some(database), Some(table)) = (self.database.clone(), self.table.clone()) else {
            debug!("offset change ignored: no table selected");
            return Ok(());
        };
        let offset = offset.min(self.offset_max);
        let frame = self.fetch(&database, &table, offset)?;
        self.offset = offset;
        self.frame = Some(frame);
        self.redraw_table();
        if self.options.redraw_plot_on_offset {
            self.redraw_plot();
        }
        Ok(())
    }

    fn set_axis(&mut self, axis: Axis, column: Option<String>) -> Result<(), BrowserError> {
        if let Some(c) = &column
            && !self.column_options.contains(c)
        {
            return Err(BrowserError::UnknownColumn(c.clone()));
        }
        let slot = match axis {
            Axis::X => &mut self.plot.x,
            Axis::Y => &mut self.plot.y,
            Axis::Hue => &mut self.plot.hue,
            Axis::Row => &mut self.plot.row,
            Axis::Col => &mut self.plot.col,
        };
        *slot = column;
        self.redraw_plot();
        Ok(())
    }

    fn fetch(&self, database: &str, table: &str, offset: u64) -> Result<Frame, BrowserError> {
        let qualified = qualify(&self.options.base_project, database);
        Ok(self
            .service
            .fetch_window(&qualified, table, None, self.options.page_size, offset)?)
    }

    fn redraw_table(&mut self) {
        self.table_pane = Pane::from_render(table_view(self.frame.as_ref(), self.offset), "table");
    }

    fn redraw_plot(&mut self) {
        self.plot_pane = match render_plot(self.frame.as_ref(), &self.plot) {
            Ok(Some(figure)) => Pane::Shown(figure),
            Ok(None) => Pane::Empty,
            Err(e) => Pane::from_render(Err(e), "plot"),
        };
    }

    // -- accessors ---------------------------------------------------------

    pub fn database_options(&self) -> &[String] {
        &self.options.databases
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn table_options(&self) -> &[String] {
        &self.table_options
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Inclusive offset bounds for the selected table.
    pub fn offset_range(&self) -> (u64, u64) {
        (0, self.offset_max)
    }

    pub fn page_size(&self) -> u64 {
        self.options.page_size
    }

    pub fn column_options(&self) -> &[String] {
        &self.column_options
    }

    pub fn plot_spec(&self) -> &PlotSpec {
        &self.plot
    }

    pub fn frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn table_pane(&self) -> &Pane<TableView> {
        &self.table_pane
    }

    pub fn plot_pane(&self) -> &Pane<Figure> {
        &self.plot_pane
    }
}
