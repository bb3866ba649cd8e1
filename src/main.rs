use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use paragen::cli::Cli;
use paragen::{observability, walker};

fn main() -> ExitCode {
    observability::init_logging();
    let cli = Cli::parse();
    let start = Instant::now();

    match walker::run(&cli.path, &cli.ignore, cli.fix_legacy_loop_capture()) {
        Ok(report) if report.failed.is_empty() => {
            let elapsed = start.elapsed();
            if elapsed.as_secs_f64() < 0.01 {
                println!("✨ Done in {}ms", elapsed.as_millis());
            } else {
                println!("✨ Done in {:.2}s", elapsed.as_secs_f64());
            }
            ExitCode::SUCCESS
        }
        Ok(report) => {
            for (path, err) in &report.failed {
                eprintln!("failed to commit {}: {err}", path.display());
            }
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
