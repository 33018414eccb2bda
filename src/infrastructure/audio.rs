use crate::domain::entities::Waveform;
use crate::domain::errors::{NarrationError, Result};
use dasp_rs::audio_io::wav::load;
use dasp_rs::signal_processing::resampling::resample;
use std::path::Path;

/// Timeline sample rate used when nothing else is configured (XTTS output rate).
pub const DEFAULT_SAMPLE_RATE: u32 = 24000;

fn path_str(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| {
        NarrationError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("non UTF-8 path: {}", path.display()),
        ))
    })
}

/// Loads a WAV file as a mono waveform at its native sample rate.
pub fn load_wav(path: impl AsRef<Path>) -> Result<Waveform> {
    let audio_data = load(path_str(path.as_ref())?, None, Some(true), None, None)?;
    Ok(Waveform::new(audio_data.samples, audio_data.sample_rate))
}

/// Writes a mono WAV. `bits_per_sample` selects 16-bit PCM or 32-bit float.
pub fn write_wav(path: impl AsRef<Path>, waveform: &Waveform, bits_per_sample: u16) -> Result<()> {
    let path = path.as_ref();
    let sample_format = match bits_per_sample {
        16 => hound::SampleFormat::Int,
        32 => hound::SampleFormat::Float,
        other => {
            return Err(NarrationError::Config(format!(
                "unsupported output bit depth {}; use 16 or 32",
                other
            )));
        }
    };
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: waveform.sample_rate,
        bits_per_sample,
        sample_format,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    match sample_format {
        hound::SampleFormat::Int => {
            for &sample in &waveform.samples {
                let clamped = sample.clamp(-1.0, 1.0);
                writer.write_sample((clamped * i16::MAX as f32).round() as i16)?;
            }
        }
        hound::SampleFormat::Float => {
            for &sample in &waveform.samples {
                writer.write_sample(sample)?;
            }
        }
    }
    writer.finalize()?;

    Ok(())
}

/// Resamples to `target_rate`, returning the input unchanged when the rates already match.
pub fn resample_to(waveform: &Waveform, target_rate: u32) -> Result<Waveform> {
    if waveform.sample_rate == target_rate || waveform.is_empty() {
        return Ok(Waveform::new(waveform.samples.clone(), target_rate));
    }
    let samples = resample(&waveform.samples, waveform.sample_rate, target_rate)?;
    Ok(Waveform::new(samples, target_rate))
}

pub fn db_to_amplitude(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

pub fn amplitude_to_db(amplitude: f32) -> f32 {
    20.0 * amplitude.max(1e-10).log10()
}
