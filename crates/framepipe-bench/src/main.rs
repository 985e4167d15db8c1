//! framepipe-bench: decode-only throughput benchmark.
//!
//! ```bash
//! framepipe-bench [--swapUV | --noSwapUV] [--seconds N] [--software] <file>
//! ```
//!
//! Decoding needs the `ffmpeg` feature, which links the system FFmpeg
//! libraries:
//!
//! ```bash
//! cargo run --release -p framepipe-bench --features ffmpeg -- clip.mp4
//! ```
//!
//! Without it the binary still parses and validates its arguments, then exits
//! 1 with an error naming the missing feature.
//!
//! Exits 0 after printing the report, 1 on invalid input or decode failure.
//! Logging is controlled through `RUST_LOG` (e.g. `RUST_LOG=framepipe_core=debug`).

mod cli;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use framepipe_core::BenchmarkReport;

use crate::cli::Cli;

fn init_logging() {
    // RUST_LOG wins when set
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("framepipe_core=info,framepipe_bench=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_logging();

    match run(&cli) {
        Ok(report) => {
            println!("{report}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Benchmark failed: {e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<BenchmarkReport> {
    cli.validate()?;
    decode(cli)
}

#[cfg(feature = "ffmpeg")]
fn decode(cli: &Cli) -> Result<BenchmarkReport> {
    use anyhow::Context;
    use framepipe_core::ffmpeg::{available_hw_devices, FfmpegBackend};
    use framepipe_core::{run_decode_benchmark, CancelToken, FrameDecoder};

    let config = cli.decoder_config();
    tracing::debug!("Hardware devices in this FFmpeg build: {:?}", available_hw_devices());

    let cancel = CancelToken::new();
    let backend = FfmpegBackend::open(&cli.path, &config, cancel.clone())
        .with_context(|| format!("failed to open {}", cli.path.display()))?;
    let mut decoder = FrameDecoder::new(backend, &config).context("failed to set up decoder")?;
    let report = run_decode_benchmark(&mut decoder, cli.seconds, &cancel).context("decode failed")?;
    Ok(report)
}

#[cfg(not(feature = "ffmpeg"))]
fn decode(_cli: &Cli) -> Result<BenchmarkReport> {
    Err(framepipe_core::VideoError::DecoderInit(
        "framepipe-bench was built without the `ffmpeg` feature; rebuild with `--features ffmpeg`".to_string(),
    )
    .into())
}
