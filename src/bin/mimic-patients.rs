//! Print five MIMIC patients read through a table window.

use bq_browser::samples::{self, Sample};

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    bq_browser::logging::init(0);
    samples::run(Sample::MimicPatients)
}
