//! Sample conversion planning and raw PCM conversion.

use std::path::PathBuf;

use audiohal_config::KeyValuePairs;
use audiohal_core::{ConversionPipeline, convert_src_to_dst_frames};
use clap::Args;

use super::common::{parse_pairs, spec_from_pairs};

/// Convert interleaved PCM between two sample specs.
#[derive(Args)]
pub struct ConvertArgs {
    /// Source spec, e.g. "sample_rate=44100;format=pcm16;channels=2"
    #[arg(long, value_parser = parse_pairs)]
    pub from: KeyValuePairs,

    /// Destination spec, e.g. "sample_rate=192000;format=pcm8_24"
    #[arg(long, value_parser = parse_pairs)]
    pub to: KeyValuePairs,

    /// Frame count used to report the output size
    #[arg(long, default_value_t = 480)]
    pub frames: usize,

    /// Raw interleaved input file to convert
    #[arg(short, long, requires = "output")]
    pub input: Option<PathBuf>,

    /// Where to write the converted frames
    #[arg(short, long, requires = "input")]
    pub output: Option<PathBuf>,
}

/// Run the convert command.
pub fn run(args: ConvertArgs) -> anyhow::Result<()> {
    let src = spec_from_pairs(&args.from)?;
    let dst = spec_from_pairs(&args.to)?;

    let mut pipeline = ConversionPipeline::new();
    pipeline.configure(&src, &dst)?;

    println!("From: {src}");
    println!("To:   {dst}");
    if pipeline.is_passthrough() {
        println!("Pipeline: passthrough");
    } else {
        println!("Pipeline:");
        for stage in pipeline.stages() {
            println!("  {}", stage.describe());
        }
    }
    println!(
        "{} frames in -> {} frames out",
        args.frames,
        convert_src_to_dst_frames(args.frames, &src, &dst)
    );

    let (Some(input), Some(output)) = (args.input, args.output) else {
        return Ok(());
    };
    let data = std::fs::read(&input)?;
    let frames = src.bytes_to_frames(data.len());
    if data.len() % src.frame_size() != 0 {
        tracing::warn!(
            "{}: trailing {} byte(s) ignored",
            input.display(),
            data.len() % src.frame_size()
        );
    }
    let converted = pipeline.convert(&data[..src.frames_to_bytes(frames)], frames)?;
    std::fs::write(&output, &converted)?;
    println!(
        "Wrote {} frames to {}",
        dst.bytes_to_frames(converted.len()),
        output.display()
    );
    Ok(())
}
