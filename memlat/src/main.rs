mod aggregate;
mod config;
mod report;
mod run;

use std::process::ExitCode;

use clap::Parser;
use config::{Mode, OutputFormat, RunConfig, RunOptions};

/// Walks a NUMA-placed buffer by pointer chasing and reports where the
/// sampled loads were served from.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Size of the buffer in megabytes (10^6 bytes)
    size_mb: u64,
    /// Order in which the buffer is walked
    #[arg(value_enum)]
    mode: Mode,
    /// Take one sample every PERIOD qualifying loads
    period: u64,
    #[command(flatten)]
    options: RunOptions,
}

const EXIT_FAILURE: u8 = 1;
const EXIT_CAPTURE_OVERFLOW: u8 = 3;

fn main() -> ExitCode {
    env_logger::init();
    let args = Cli::parse();

    match do_run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");

            if let Some(pmu::Error::CaptureOverflow { .. }) = err.downcast_ref::<pmu::Error>() {
                eprintln!("hint: raise the sampling period or --ring-pages");
                return ExitCode::from(EXIT_CAPTURE_OVERFLOW);
            }

            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn do_run(args: Cli) -> anyhow::Result<()> {
    let config = RunConfig::resolve(args.size_mb, args.mode, args.period, &args.options)?;
    log::debug!("{config:?}");

    let report = run::run(&config)?;

    match config.format {
        OutputFormat::Table => print!("{}", report.render()),
        OutputFormat::Json => println!("{}", report.to_json()?),
    }

    Ok(())
}
