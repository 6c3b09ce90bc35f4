//! Offline render of the reference-null scenario.
//!
//! ```text
//! silkclip_render <input.wav> <output.wav> [--reference ref.wav]
//! ```
//!
//! Runs the file through the engine in 512-sample chunks with the analog path
//! forced on (Analog, SILK 100%, 8x, no limiter/OTT/SAT, 0 dB input), writes a
//! 32-bit float WAV and prints loudness, true peak and, with a reference, the
//! null depth.

use anyhow::{bail, Context, Result};
use ebur128::{EbuR128, Mode};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use silkclip::engine::{ClipEngine, EngineParams, MAX_CHANNELS};
use silkclip::meters::Meters;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const CHUNK: usize = 512;

struct Args {
    input: PathBuf,
    output: PathBuf,
    reference: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut positional = Vec::new();
    let mut reference = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--reference" {
            let path = args.next().context("--reference needs a path")?;
            reference = Some(PathBuf::from(path));
        } else {
            positional.push(PathBuf::from(arg));
        }
    }
    if positional.len() != 2 {
        bail!("usage: silkclip_render <input.wav> <output.wav> [--reference ref.wav]");
    }
    let output = positional.pop().context("missing output path")?;
    let input = positional.pop().context("missing input path")?;
    Ok(Args {
        input,
        output,
        reference,
    })
}

/// Decodes a WAV into one `Vec<f32>` per channel.
fn read_wav(path: &Path) -> Result<(WavSpec, Vec<Vec<f32>>)> {
    let mut reader =
        WavReader::open(path).with_context(|| format!("failed to open '{}'", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 || channels > MAX_CHANNELS {
        bail!("'{}' has {} channels", path.display(), channels);
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .with_context(|| format!("failed to decode '{}'", path.display()))?,
        SampleFormat::Int => {
            let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .with_context(|| format!("failed to decode '{}'", path.display()))?
        }
    };

    let mut planar = vec![Vec::with_capacity(interleaved.len() / channels); channels];
    for frame in interleaved.chunks_exact(channels) {
        for (ch, &s) in planar.iter_mut().zip(frame) {
            ch.push(s);
        }
    }
    Ok((spec, planar))
}

fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    let frames = planar.first().map_or(0, Vec::len);
    let mut out = Vec::with_capacity(frames * planar.len());
    for i in 0..frames {
        out.extend(planar.iter().map(|ch| ch[i]));
    }
    out
}

fn render(spec: &WavSpec, mut audio: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>> {
    let mut engine = ClipEngine::new(Arc::new(Meters::new()));
    let params = EngineParams::reference_null();
    engine.set_oversampling(params.oversample_index);
    engine
        .prepare(spec.sample_rate as f32, CHUNK, audio.len())
        .context("engine rejected the file's format")?;

    let frames = audio.first().map_or(0, Vec::len);
    let mut offset = 0;
    while offset < frames {
        let end = (offset + CHUNK).min(frames);
        let mut block: Vec<&mut [f32]> = audio
            .iter_mut()
            .map(|ch| &mut ch[offset..end])
            .collect();
        engine.process(&mut block, &params);
        offset = end;
    }
    Ok(audio)
}

fn write_wav(path: &Path, sample_rate: u32, audio: &[Vec<f32>]) -> Result<()> {
    let spec = WavSpec {
        channels: audio.len() as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("failed to create '{}'", path.display()))?;
    for s in interleave(audio) {
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    Ok(())
}

fn report_loudness(sample_rate: u32, audio: &[Vec<f32>]) -> Result<()> {
    let mut meter = EbuR128::new(audio.len() as u32, sample_rate, Mode::I | Mode::TRUE_PEAK)
        .context("failed to create loudness meter")?;
    meter.add_frames_f32(&interleave(audio))?;
    let integrated = meter.loudness_global()?;
    let mut true_peak = 0.0f64;
    for ch in 0..audio.len() as u32 {
        true_peak = true_peak.max(meter.true_peak(ch)?);
    }
    println!("  integrated       : {:.2} LUFS", integrated);
    println!(
        "  true peak        : {:.2} dBTP",
        20.0 * true_peak.max(1e-12).log10()
    );
    Ok(())
}

fn report_null(rendered: &[Vec<f32>], reference_path: &Path) -> Result<()> {
    let (_, reference) = read_wav(reference_path)?;
    if reference.len() != rendered.len() {
        bail!(
            "reference has {} channels, render has {}",
            reference.len(),
            rendered.len()
        );
    }

    let mut max_diff = 0.0f64;
    let mut diff_energy = 0.0f64;
    let mut ref_energy = 0.0f64;
    for (out, refr) in rendered.iter().zip(reference.iter()) {
        for (&a, &b) in out.iter().zip(refr.iter()) {
            let d = (a - b) as f64;
            max_diff = max_diff.max(d.abs());
            diff_energy += d * d;
            ref_energy += (b as f64) * (b as f64);
        }
    }
    let depth = 10.0 * (diff_energy.max(1e-30) / ref_energy.max(1e-30)).log10();
    println!("  max abs diff     : {:.3e}", max_diff);
    println!("  null depth       : {:.1} dB", depth);
    Ok(())
}

fn main() -> Result<()> {
    let args = parse_args()?;
    let (spec, audio) = read_wav(&args.input)?;
    let rendered = render(&spec, audio)?;
    write_wav(&args.output, spec.sample_rate, &rendered)?;

    println!("Rendered '{}' -> '{}'", args.input.display(), args.output.display());
    println!("  frames           : {}", rendered.first().map_or(0, Vec::len));
    report_loudness(spec.sample_rate, &rendered)?;
    if let Some(reference) = args.reference {
        report_null(&rendered, &reference)?;
    }
    Ok(())
}
