//! Print five Stack Overflow questions (creation date, answer count).

use bq_browser::samples::{self, Sample};

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    bq_browser::logging::init(0);
    samples::run(Sample::SoQuestions)
}
