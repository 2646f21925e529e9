use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::num::{NonZeroU32, NonZeroUsize};
use std::path::PathBuf;

use anyhow::Context;
use avcmux::{AnnexBSource, Config};
use clap::Parser as _;

#[derive(clap::Parser)]
struct Args {
    /// The frame rate of the input stream, used to time every access unit.
    #[clap(long, default_value_t = 25)]
    fps: u32,

    /// The media timescale of the output track, in ticks per second.
    #[clap(long, default_value_t = 9000)]
    timescale: u32,

    /// The number of access units per fragment.
    ///
    /// If zero, all access units are written in a single fragment.
    #[clap(long, default_value_t = 1)]
    samples_per_fragment: usize,

    /// Path to the H.264 Annex-B elementary stream to mux, or `-` for stdin.
    input: PathBuf,

    /// Path to write the fragmented MP4 to, or `-` for stdout.
    output: PathBuf,
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init()
        .context("Error initializing logging")?;

    let args = Args::try_parse().context("Error parsing command line arguments")?;

    let input: Box<dyn Read> = match args.input.to_str() {
        Some("-") => Box::new(io::stdin().lock()),
        _ => Box::new(File::open(&args.input).context("Error opening input file")?),
    };
    let output: Box<dyn Write> = match args.output.to_str() {
        Some("-") => Box::new(io::stdout().lock()),
        _ => Box::new(File::create(&args.output).context("Error creating output file")?),
    };

    let timescale = NonZeroU32::new(args.timescale).context("Timescale must be nonzero")?;
    let config = Config::builder()
        .timescale(timescale)
        .samples_per_fragment(NonZeroUsize::new(args.samples_per_fragment))
        .build();
    let source = AnnexBSource::with_frame_rate(input, args.fps);
    let stats = avcmux::mux_with_config(source, BufWriter::new(output), config).context("Error muxing stream")?;

    log::info!(
        "wrote {bytes} bytes: {samples} samples in {fragments} fragments, {dropped} dropped",
        bytes = stats.bytes_written,
        samples = stats.samples,
        fragments = stats.fragments,
        dropped = stats.dropped_samples,
    );
    Ok(())
}
