//! Terminal browser for BigQuery-hosted research datasets.
//!
//! The pieces, leaf first:
//! - [`auth`]: application-default credentials and project discovery
//! - [`client`]: blocking BigQuery REST client behind [`client::QueryService`]
//! - [`manifest`]: cached per-table row counts
//! - [`frame`], [`render`], [`plot`]: result frames and their text views
//! - [`browser`]: selection state and event dispatch
//! - [`repl`]: line-oriented driver for the browser
//! - [`samples`]: canned queries behind the entry binaries

pub mod auth;
pub mod browser;
pub mod client;
pub mod config;
pub mod frame;
pub mod logging;
pub mod manifest;
pub mod plot;
pub mod render;
pub mod repl;
pub mod samples;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::{BufReader, IsTerminal, Write};
use std::path::PathBuf;
use tracing::info;

use crate::auth::AuthError;
use crate::browser::Browser;
use crate::client::{BigQueryClient, ClientError, QueryService};
use crate::config::{BrowserConfig, ConfigError};
use crate::manifest::{Manifest, ManifestError};
use crate::samples::Sample;

#[derive(Parser, Debug)]
#[command(
    name = "bqb",
    version,
    about = "Browse BigQuery-hosted datasets from the terminal"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit machine-readable JSON (results on stdout, errors on stderr)
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to ./bqb.toml, then the user config dir)
    #[arg(long, global = true, env = "BQB_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Overrides shared by the session-level commands.
#[derive(Args, Debug, Clone, Default)]
pub struct SessionArgs {
    /// Prefix joined to database names (e.g. `physionet-data.`)
    #[arg(long)]
    pub base_project: Option<String>,

    /// Database to offer (repeatable; replaces the configured list)
    #[arg(long = "db", value_name = "DATABASE")]
    pub databases: Vec<String>,

    /// Rows fetched per query window
    #[arg(long)]
    pub query_size: Option<u64>,

    /// Row-count manifest file
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Default dataset for unqualified table names
    #[arg(long)]
    pub dataset: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Interactive browser (default when no command is given)
    Browse {
        #[command(flatten)]
        session: SessionArgs,

        /// Recompute the plot when the offset moves
        #[arg(long)]
        redraw_plot_on_offset: bool,

        /// Read commands from a file instead of stdin
        #[arg(long)]
        script: Option<PathBuf>,
    },
    /// Build (if missing) and print the row-count manifest
    Manifest {
        #[command(flatten)]
        session: SessionArgs,

        /// Recount every table even if the manifest exists
        #[arg(long)]
        rebuild: bool,
    },
    /// List datasets of the project, or tables of one database
    Tables {
        /// `project.dataset` or bare dataset name
        database: Option<String>,

        #[command(flatten)]
        session: SessionArgs,
    },
    /// Run one standard-SQL query and print the rows
    Query {
        /// SQL text
        sql: String,

        #[command(flatten)]
        session: SessionArgs,
    },
    /// Run one of the canned sample queries
    Sample {
        #[arg(value_enum)]
        name: Sample,
    },
}

/// Error surfaced at the process boundary.
#[derive(Debug, Clone)]
pub struct CliError {
    pub code: i32,
    pub kind: &'static str,
    pub message: String,
    pub hint: Option<String>,
    pub retryable: bool,
}

impl CliError {
    fn usage(message: String) -> Self {
        Self {
            code: 2,
            kind: "usage",
            message,
            hint: Some("run `bqb --help` for usage".into()),
            retryable: false,
        }
    }

    /// Classify an error chain into an exit code and kind.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");
        for cause in err.chain() {
            if cause.downcast_ref::<AuthError>().is_some()
                || matches!(cause.downcast_ref::<ClientError>(), Some(ClientError::Auth(_)))
            {
                return Self {
                    code: 3,
                    kind: "auth",
                    message,
                    hint: Some(
                        "run `gcloud auth application-default login` or set GOOGLE_APPLICATION_CREDENTIALS"
                            .into(),
                    ),
                    retryable: false,
                };
            }
            if cause.downcast_ref::<ClientError>().is_some() {
                return Self {
                    code: 4,
                    kind: "query",
                    message,
                    hint: None,
                    retryable: false,
                };
            }
            if cause.downcast_ref::<ManifestError>().is_some() {
                return Self {
                    code: 5,
                    kind: "manifest",
                    message,
                    hint: Some("delete the manifest file or pass --rebuild to recount".into()),
                    retryable: false,
                };
            }
            if cause.downcast_ref::<ConfigError>().is_some() {
                return Self {
                    code: 6,
                    kind: "config",
                    message,
                    hint: None,
                    retryable: false,
                };
            }
        }
        Self {
            code: 1,
            kind: "error",
            message,
            hint: None,
            retryable: false,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "code": self.code,
                "kind": self.kind,
                "message": self.message,
                "hint": self.hint,
                "retryable": self.retryable,
            }
        })
    }
}

/// Parsed command line plus anything needed before dispatch.
#[derive(Debug)]
pub struct ParsedCli {
    pub cli: Cli,
}

/// Parse raw arguments. Help and version requests come back as a
/// `CliError` with code 0 and the rendered text as the message.
pub fn parse_cli(raw_args: Vec<String>) -> Result<ParsedCli, CliError> {
    match Cli::try_parse_from(raw_args) {
        Ok(cli) => Ok(ParsedCli { cli }),
        Err(e) => {
            use clap::error::ErrorKind;
            match e.kind() {
                ErrorKind::DisplayHelp
                | ErrorKind::DisplayVersion
                | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => Err(CliError {
                    code: 0,
                    kind: "help",
                    message: e.render().to_string(),
                    hint: None,
                    retryable: false,
                }),
                _ => Err(CliError::usage(e.render().to_string())),
            }
        }
    }
}

/// Run a parsed command line.
pub fn run_with_parsed(parsed: ParsedCli) -> Result<(), CliError> {
    let cli = parsed.cli;
    logging::init(cli.verbose);
    run_command(&cli).map_err(|e| CliError::from_anyhow(&e))
}

fn load_config(cli: &Cli, session: &SessionArgs) -> Result<BrowserConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut c = BrowserConfig::load_from(path)
                .with_context(|| format!("loading config {}", path.display()))?;
            c.apply_env()?;
            c
        }
        None => BrowserConfig::load()?,
    };
    if let Some(base) = &session.base_project {
        config.base_project = base.clone();
    }
    if !session.databases.is_empty() {
        config.databases = session.databases.clone();
    }
    if let Some(n) = session.query_size {
        config.query_size = n;
    }
    if let Some(path) = &session.manifest {
        config.manifest_path = path.clone();
    }
    if let Some(ds) = &session.dataset {
        config.dataset_id = ds.clone();
    }
    config.validate()?;
    Ok(config)
}

fn open_client(config: &BrowserConfig) -> Result<BigQueryClient> {
    let scopes = config.scope_refs();
    let (credentials, project) = auth::acquire(Some(scopes.as_slice()))?;
    info!(%project, dataset = %config.dataset_id, "connecting");
    Ok(client::connect(credentials, project, Some(&config.dataset_id))?)
}

fn run_command(cli: &Cli) -> Result<()> {
    let default_browse;
    let command = match &cli.command {
        Some(c) => c,
        None => {
            default_browse = Commands::Browse {
                session: SessionArgs::default(),
                redraw_plot_on_offset: false,
                script: None,
            };
            &default_browse
        }
    };

    match command {
        Commands::Browse {
            session,
            redraw_plot_on_offset,
            script,
        } => {
            let mut config = load_config(cli, session)?;
            config.redraw_plot_on_offset |= *redraw_plot_on_offset;
            let client = open_client(&config)?;
            let manifest = manifest::ensure_manifest(
                &client,
                &config.base_project,
                &config.databases,
                &config.manifest_path,
                &mut *progress_sink(cli.json),
            )?;
            browse(&client, manifest, &config, script.as_ref())
        }
        Commands::Manifest { session, rebuild } => {
            let config = load_config(cli, session)?;
            let client = open_client(&config)?;
            let mut progress = progress_sink(cli.json);
            let manifest = if *rebuild {
                let m = Manifest::build(&client, &config.base_project, &config.databases, &mut *progress)?;
                m.save(&config.manifest_path)?;
                m
            } else {
                manifest::ensure_manifest(
                    &client,
                    &config.base_project,
                    &config.databases,
                    &config.manifest_path,
                    &mut *progress,
                )?
            };
            print_manifest(&manifest, cli.json)
        }
        Commands::Tables { database, session } => {
            let config = load_config(cli, session)?;
            let client = open_client(&config)?;
            let names = match database {
                Some(db) => client.list_tables(db)?,
                None => client.list_databases(client.project_id())?,
            };
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            if cli.json {
                writeln!(out, "{}", serde_json::to_string_pretty(&names)?)?;
            } else {
                for name in names {
                    writeln!(out, "{name}")?;
                }
            }
            Ok(())
        }
        Commands::Query { sql, session } => {
            let config = load_config(cli, session)?;
            let client = open_client(&config)?;
            let frame = client.query(sql)?;
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            if cli.json {
                writeln!(out, "{}", serde_json::to_string_pretty(&records_json(&frame))?)?;
            } else {
                writeln!(out, "{}", render::draw_frame(&frame, usize::MAX))?;
            }
            Ok(())
        }
        Commands::Sample { name } => samples::run(*name),
    }
}

fn browse(
    client: &dyn QueryService,
    manifest: Manifest,
    config: &BrowserConfig,
    script: Option<&PathBuf>,
) -> Result<()> {
    let mut browser = Browser::new(client, manifest, config.browser_options());
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match script {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("opening script {}", path.display()))?;
            let mut input = BufReader::new(file);
            repl::run(&mut browser, &mut input, &mut out, false)
        }
        None => {
            let stdin = std::io::stdin();
            let interactive = stdin.is_terminal();
            if interactive {
                writeln!(
                    out,
                    "databases: {} (type `help` for commands)",
                    browser.database_options().join(", ")
                )?;
            }
            let mut input = stdin.lock();
            repl::run(&mut browser, &mut input, &mut out, interactive)
        }
    }
}

/// Where manifest build progress goes. Under `--json` stdout carries only the
/// JSON document.
fn progress_sink(json: bool) -> Box<dyn Write> {
    if json {
        Box::new(std::io::stderr())
    } else {
        Box::new(std::io::stdout())
    }
}

fn print_manifest(manifest: &Manifest, json: bool) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(manifest)?)?;
        return Ok(());
    }
    for db in manifest.databases() {
        writeln!(out, "{db}")?;
        for (table, rows) in manifest.tables(db).into_iter().flatten() {
            writeln!(out, "  {table:<40} {rows:>12}")?;
        }
    }
    Ok(())
}

/// Rows as an array of `{column: value}` objects.
pub fn records_json(frame: &frame::Frame) -> serde_json::Value {
    let rows: Vec<serde_json::Value> = frame
        .records()
        .map(|record| {
            let map: serde_json::Map<String, serde_json::Value> = record
                .into_iter()
                .map(|(name, value)| {
                    (
                        name.to_string(),
                        serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
                    )
                })
                .collect();
            serde_json::Value::Object(map)
        })
        .collect();
    serde_json::Value::Array(rows)
}
