//! Command-line arguments.

use std::path::PathBuf;

use anyhow::{ensure, Result};
use clap::Parser;
use framepipe_core::{DecoderConfig, HwAccelType, DEFAULT_BENCHMARK_SECONDS};

#[cfg(feature = "ffmpeg")]
const DECODER_NOTE: &str = "Decodes through FFmpeg (built with the `ffmpeg` feature).";
#[cfg(not(feature = "ffmpeg"))]
const DECODER_NOTE: &str =
    "This build has no decoder. Rebuild with the `ffmpeg` feature (`--features ffmpeg`) to decode media files.";

#[derive(Parser, Debug)]
#[command(name = "framepipe-bench")]
#[command(about = "Decode-only throughput benchmark: decodes a media file and reports frames per second")]
#[command(after_help = DECODER_NOTE)]
#[command(version)]
pub struct Cli {
    /// Media file to decode
    pub path: PathBuf,

    /// Swap the chroma channels of every frame while copying
    #[arg(long = "swapUV", conflicts_with = "no_swap_uv")]
    pub swap_uv: bool,

    /// Keep the decoder's chroma order, even for V-first formats such as NV21
    #[arg(long = "noSwapUV")]
    pub no_swap_uv: bool,

    /// Seconds of content to decode
    #[arg(long, default_value_t = DEFAULT_BENCHMARK_SECONDS)]
    pub seconds: f64,

    /// Skip hardware decoding
    #[arg(long)]
    pub software: bool,
}

impl Cli {
    /// Chroma-swap override selected on the command line.
    pub fn swap_override(&self) -> Option<bool> {
        match (self.swap_uv, self.no_swap_uv) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }

    pub fn decoder_config(&self) -> DecoderConfig {
        let hw_type = if self.software {
            HwAccelType::None
        } else {
            HwAccelType::platform_default()
        };
        DecoderConfig::default()
            .with_hw_type(hw_type)
            .with_fallback_to_software(true)
            .with_swap_uv(self.swap_override())
    }

    /// Checks the arguments clap cannot check.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.path.is_file(),
            "media file {} does not exist",
            self.path.display()
        );
        ensure!(
            self.seconds.is_finite() && self.seconds > 0.0,
            "--seconds must be a positive number, got {}",
            self.seconds
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("framepipe-bench").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let Ok(cli) = parse(&["clip.mp4"]) else {
            panic!("should parse");
        };
        assert_eq!(cli.path, PathBuf::from("clip.mp4"));
        assert_eq!(cli.swap_override(), None);
        assert_eq!(cli.seconds, DEFAULT_BENCHMARK_SECONDS);
        assert_eq!(cli.decoder_config().hw_type, HwAccelType::platform_default());
    }

    #[test]
    fn test_swap_flags() {
        let Ok(cli) = parse(&["--swapUV", "clip.mp4"]) else {
            panic!("should parse");
        };
        assert_eq!(cli.swap_override(), Some(true));
        assert_eq!(cli.decoder_config().swap_uv, Some(true));

        let Ok(cli) = parse(&["clip.mp4", "--noSwapUV", "--software"]) else {
            panic!("should parse");
        };
        assert_eq!(cli.swap_override(), Some(false));
        assert_eq!(cli.decoder_config().hw_type, HwAccelType::None);

        let Err(e) = parse(&["--swapUV", "--noSwapUV", "clip.mp4"]) else {
            panic!("conflicting flags must be rejected");
        };
        assert_eq!(e.kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_help_and_missing_path() {
        let Err(e) = parse(&["--help"]) else {
            panic!("help is reported as an early exit");
        };
        assert_eq!(e.kind(), ErrorKind::DisplayHelp);
        assert!(!e.use_stderr());

        let Err(e) = parse(&[]) else {
            panic!("path is required");
        };
        assert!(e.use_stderr());
    }

    #[test]
    fn test_help_names_decoder_feature() {
        use clap::CommandFactory;

        let help = Cli::command().render_long_help().to_string();
        assert!(help.contains("`ffmpeg`"));
    }

    #[test]
    fn test_validate() {
        let Ok(file) = tempfile::NamedTempFile::new() else {
            panic!("temp file");
        };
        let path = file.path().display().to_string();
        let Ok(cli) = parse(&[path.as_str()]) else {
            panic!("should parse");
        };
        assert!(cli.validate().is_ok());

        let Ok(cli) = parse(&[path.as_str(), "--seconds", "0"]) else {
            panic!("should parse");
        };
        assert!(cli.validate().is_err());

        let Ok(cli) = parse(&["/nonexistent/framepipe-clip.mp4"]) else {
            panic!("should parse");
        };
        let Err(e) = cli.validate() else {
            panic!("missing file must fail");
        };
        assert!(e.to_string().contains("does not exist"));
    }
}
