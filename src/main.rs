fn is_json_mode_args() -> bool {
    std::env::args().any(|arg| arg == "--json")
}

fn report(err: &bq_browser::CliError) {
    if is_json_mode_args() {
        eprintln!("{}", err.to_json());
        return;
    }
    eprintln!("{}", err.message.trim_end());
    if let Some(hint) = &err.hint {
        eprintln!("hint: {hint}");
    }
}

fn main() {
    // Load .env early; ignore if missing.
    dotenvy::dotenv().ok();

    let raw_args: Vec<String> = std::env::args().collect();
    let parsed = match bq_browser::parse_cli(raw_args) {
        Ok(parsed) => parsed,
        Err(err) if err.code == 0 => {
            // --help / --version
            print!("{}", err.message);
            return;
        }
        Err(err) => {
            report(&err);
            std::process::exit(err.code);
        }
    };

    if let Err(err) = bq_browser::run_with_parsed(parsed) {
        report(&err);
        std::process::exit(err.code);
    }
}
