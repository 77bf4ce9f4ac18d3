//! Fixed sample queries behind the argument-less entry binaries.

use crate::auth;
use crate::client::{self, QueryService};
use crate::frame::Frame;
use anyhow::{Context, Result};
use std::io::Write;

/// One canned query.
#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Sample {
    /// Five Stack Overflow questions, projected to creation date and answer count.
    SoQuestions,
    /// Five MIMIC patients through a bounded table window.
    MimicPatients,
    /// Five MIMIC patients through literal SQL.
    MimicPatientsSql,
}

enum SampleQuery {
    Window {
        database: &'static str,
        table: &'static str,
        columns: &'static [&'static str],
        limit: u64,
    },
    Sql(&'static str),
}

impl Sample {
    fn query(self) -> SampleQuery {
        match self {
            Self::SoQuestions => SampleQuery::Window {
                database: "bigquery-public-data.stackoverflow",
                table: "posts_questions",
                columns: &["creation_date", "answer_count"],
                limit: 5,
            },
            Self::MimicPatients => SampleQuery::Window {
                database: "physionet-data.mimic_core",
                table: "patients",
                columns: &[],
                limit: 5,
            },
            Self::MimicPatientsSql => {
                SampleQuery::Sql("SELECT * FROM `physionet-data.mimic_core.patients` LIMIT 5")
            }
        }
    }

    /// Execute against `service`.
    pub fn fetch(self, service: &dyn QueryService) -> Result<Frame> {
        let frame = match self.query() {
            SampleQuery::Window {
                database,
                table,
                columns,
                limit,
            } => {
                let cols: Vec<String> = columns.iter().map(|c| (*c).to_string()).collect();
                let projection = (!cols.is_empty()).then_some(cols.as_slice());
                service.fetch_window(database, table, projection, limit, 0)?
            }
            SampleQuery::Sql(sql) => service.query(sql)?,
        };
        Ok(frame)
    }
}

/// Print each row as `column  value` lines, rows separated by a blank line.
pub fn print_rows(frame: &Frame, out: &mut dyn Write) -> std::io::Result<()> {
    let width = frame
        .columns()
        .iter()
        .map(|c| unicode_width::UnicodeWidthStr::width(c.name.as_str()))
        .max()
        .unwrap_or(0);
    for (i, record) in frame.records().enumerate() {
        if i > 0 {
            writeln!(out)?;
        }
        for (name, value) in record {
            let fill = width.saturating_sub(unicode_width::UnicodeWidthStr::width(name));
            writeln!(out, "{name}{}    {value}", " ".repeat(fill))?;
        }
    }
    Ok(())
}

/// Authenticate, connect, run the sample, print the rows to stdout.
pub fn run(sample: Sample) -> Result<()> {
    let (credentials, project) = auth::acquire(None).context("acquiring credentials")?;
    let client = client::connect(credentials, project, None).context("connecting to BigQuery")?;
    let frame = sample.fetch(&client).with_context(|| format!("running sample {sample:?}"))?;
    let stdout = std::io::stdout();
    print_rows(&frame, &mut stdout.lock())?;
    Ok(())
}
