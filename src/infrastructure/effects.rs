use crate::domain::entities::Waveform;
use crate::domain::errors::{NarrationError, Result};
use crate::infrastructure::audio::{amplitude_to_db, db_to_amplitude};
use dasp_rs::signal_processing::resampling::resample;
use log::{debug, info};
use num_complex::Complex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

/// A post-processing step applied to the assembled narration.
pub trait Effect {
    fn apply(&self, waveform: &Waveform) -> Result<Waveform>;
    fn name(&self) -> &'static str;
}

/// Longest stretch of room tone generated before it is looped.
const ROOM_TONE_BED_SECONDS: u32 = 10;

/// Low-level, low-passed white noise mixed under the whole timeline so pauses
/// are not digitally silent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomTone {
    /// Noise level in dBFS. Default: -50
    pub volume_db: f32,
    /// Low-pass cutoff in Hz. Default: 500
    pub cutoff_hz: f32,
    /// Fixed seed for reproducible noise.
    pub seed: Option<u64>,
}

impl Default for RoomTone {
    fn default() -> Self {
        Self {
            volume_db: -50.0,
            cutoff_hz: 500.0,
            seed: None,
        }
    }
}

impl RoomTone {
    /// Noise bed of `len` samples, low-passed with a circular FFT filter so it
    /// loops without a seam.
    fn bed(&self, len: usize, sample_rate: u32) -> Vec<f32> {
        let seed = self.seed.unwrap_or_else(|| rand::rng().random());
        let mut rng = StdRng::seed_from_u64(seed);
        let level = db_to_amplitude(self.volume_db);

        let mut buffer: Vec<Complex<f32>> = (0..len)
            .map(|_| Complex::new(level * rng.random_range(-1.0f32..1.0), 0.0))
            .collect();

        let mut planner = FftPlanner::new();
        planner.plan_fft_forward(len).process(&mut buffer);
        let bin_hz = sample_rate as f32 / len as f32;
        for (k, bin) in buffer.iter_mut().enumerate() {
            let freq = k.min(len - k) as f32 * bin_hz;
            if freq > self.cutoff_hz {
                *bin = Complex::new(0.0, 0.0);
            }
        }
        planner.plan_fft_inverse(len).process(&mut buffer);

        buffer.iter().map(|c| c.re / len as f32).collect()
    }
}

impl Effect for RoomTone {
    fn apply(&self, waveform: &Waveform) -> Result<Waveform> {
        let nyquist = waveform.sample_rate as f32 / 2.0;
        if !(self.cutoff_hz > 0.0 && self.cutoff_hz < nyquist) {
            return Err(NarrationError::Effect(format!(
                "cutoff {} Hz must lie between 0 and the Nyquist frequency {} Hz",
                self.cutoff_hz, nyquist
            )));
        }
        if waveform.is_empty() {
            return Ok(waveform.clone());
        }

        let bed_len = waveform
            .len()
            .min((waveform.sample_rate * ROOM_TONE_BED_SECONDS) as usize);
        let bed = self.bed(bed_len, waveform.sample_rate);
        debug!("room tone bed: {} samples at {} dBFS", bed_len, self.volume_db);

        let mixed = waveform
            .samples
            .iter()
            .zip(bed.iter().cycle())
            .map(|(&s, &n)| (s + n).clamp(-1.0, 1.0))
            .collect();
        Ok(Waveform::new(mixed, waveform.sample_rate))
    }

    fn name(&self) -> &'static str {
        "room_tone"
    }
}

/// Feed-forward dynamic-range compressor with an attack/release envelope follower.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Compressor {
    /// Level in dBFS above which gain is reduced. Default: -20
    pub threshold_db: f32,
    /// Input dB over the threshold per output dB. Default: 4
    pub ratio: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
    /// Gain added after compression, lifting quiet passages. Default: 0
    pub makeup_gain_db: f32,
}

impl Default for Compressor {
    fn default() -> Self {
        Self {
            threshold_db: -20.0,
            ratio: 4.0,
            attack_ms: 5.0,
            release_ms: 50.0,
            makeup_gain_db: 0.0,
        }
    }
}

impl Compressor {
    fn coefficient(ms: f32, sample_rate: u32) -> f32 {
        (-1.0 / (ms * sample_rate as f32 / 1000.0)).exp()
    }
}

impl Effect for Compressor {
    fn apply(&self, waveform: &Waveform) -> Result<Waveform> {
        if !(self.ratio >= 1.0) {
            return Err(NarrationError::Effect(format!(
                "ratio must be at least 1, got {}",
                self.ratio
            )));
        }
        if !(self.attack_ms > 0.0 && self.release_ms > 0.0) {
            return Err(NarrationError::Effect(
                "attack and release must be positive".to_string(),
            ));
        }

        let attack = Self::coefficient(self.attack_ms, waveform.sample_rate);
        let release = Self::coefficient(self.release_ms, waveform.sample_rate);
        let slope = 1.0 - 1.0 / self.ratio;

        let mut envelope = 0.0f32;
        let compressed = waveform
            .samples
            .iter()
            .map(|&s| {
                let level = s.abs();
                let coef = if level > envelope { attack } else { release };
                envelope = coef * envelope + (1.0 - coef) * level;

                let over = amplitude_to_db(envelope) - self.threshold_db;
                let reduction = if over > 0.0 { -over * slope } else { 0.0 };
                s * db_to_amplitude(reduction + self.makeup_gain_db)
            })
            .collect();

        Ok(Waveform::new(compressed, waveform.sample_rate))
    }

    fn name(&self) -> &'static str {
        "compress"
    }
}

/// "Deeper voice" trick: reinterpret the samples at a rate scaled by the
/// semitone factor and resample back to the original rate, then stretch the
/// result back to the original sample count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchShift {
    /// Negative lowers the voice. Default: -2
    pub semitones: f32,
}

impl Default for PitchShift {
    fn default() -> Self {
        Self { semitones: -2.0 }
    }
}

const STRETCH_WINDOW: usize = 1024;
const STRETCH_HOP: usize = STRETCH_WINDOW / 4;

/// Linear interpolation onto `target` samples. Changes pitch along with length.
fn interpolate_to_length(samples: &[f32], target: usize) -> Vec<f32> {
    if samples.is_empty() || target == 0 {
        return vec![0.0; target];
    }
    let rate = if target > 1 {
        (samples.len() - 1) as f32 / (target - 1) as f32
    } else {
        0.0
    };
    (0..target)
        .map(|i| {
            let pos = i as f32 * rate;
            let idx = pos.floor() as usize;
            let frac = pos - idx as f32;
            if idx + 1 < samples.len() {
                samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
            } else {
                samples[samples.len() - 1]
            }
        })
        .collect()
}

/// Overlap-add time stretch onto exactly `target` samples, keeping pitch.
fn stretch_to_length(samples: &[f32], target: usize) -> Vec<f32> {
    if samples.len() < STRETCH_WINDOW || target < STRETCH_WINDOW {
        return interpolate_to_length(samples, target);
    }

    let hann: Vec<f32> = (0..STRETCH_WINDOW)
        .map(|i| {
            0.5 * (1.0
                - ((2.0 * std::f32::consts::PI * i as f32) / STRETCH_WINDOW as f32).cos())
        })
        .collect();

    let frames = (target - STRETCH_WINDOW).div_ceil(STRETCH_HOP);
    let analysis_hop = if frames == 0 {
        0.0
    } else {
        (samples.len() - STRETCH_WINDOW) as f64 / frames as f64
    };
    let out_len = frames * STRETCH_HOP + STRETCH_WINDOW;
    let mut output = vec![0.0f32; out_len];
    let mut norm = vec![0.0f32; out_len];

    for frame in 0..=frames {
        let src = ((frame as f64 * analysis_hop).round() as usize)
            .min(samples.len() - STRETCH_WINDOW);
        let dst = frame * STRETCH_HOP;
        for (i, &w) in hann.iter().enumerate() {
            output[dst + i] += samples[src + i] * w;
            norm[dst + i] += w;
        }
    }

    output
        .iter_mut()
        .zip(norm.iter())
        .for_each(|(o, &n)| *o = if n > 1e-6 { *o / n } else { 0.0 });
    output.truncate(target);
    output
}

impl Effect for PitchShift {
    fn apply(&self, waveform: &Waveform) -> Result<Waveform> {
        if waveform.is_empty() || self.semitones == 0.0 {
            return Ok(waveform.clone());
        }
        let factor = 2.0f64.powf(self.semitones as f64 / 12.0);
        let shifted_rate = (waveform.sample_rate as f64 * factor).round() as u32;
        if shifted_rate == 0 {
            return Err(NarrationError::Effect(format!(
                "{} semitones leaves no usable sample rate",
                self.semitones
            )));
        }

        let resampled = resample(&waveform.samples, shifted_rate, waveform.sample_rate)?;
        debug!(
            "pitch shift {} st: {} Hz relabel, {} -> {} samples before stretch",
            self.semitones,
            shifted_rate,
            waveform.len(),
            resampled.len()
        );
        let restored = stretch_to_length(&resampled, waveform.len());

        Ok(Waveform::new(restored, waveform.sample_rate))
    }

    fn name(&self) -> &'static str {
        "pitch_shift"
    }
}

/// Ordered list of effects; each step's output feeds the next.
#[derive(Default)]
pub struct EffectChain {
    effects: Vec<Box<dyn Effect>>,
}

impl EffectChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, effect: Box<dyn Effect>) {
        self.effects.push(effect);
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.effects.iter().map(|e| e.name()).collect()
    }

    /// Runs every effect in order. The first failure aborts the chain.
    pub fn apply(&self, waveform: Waveform) -> Result<Waveform> {
        let mut current = waveform;
        for effect in &self.effects {
            info!("Applying {}...", effect.name());
            current = effect
                .apply(&current)
                .map_err(|e| NarrationError::PostProcessing {
                    step: effect.name(),
                    source: Box::new(e),
                })?;
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, amplitude: f32, seconds: f32, sample_rate: u32) -> Waveform {
        let len = (seconds * sample_rate as f32) as usize;
        let samples = (0..len)
            .map(|i| {
                amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin()
            })
            .collect();
        Waveform::new(samples, sample_rate)
    }

    fn zero_crossings(samples: &[f32]) -> usize {
        samples
            .windows(2)
            .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
            .count()
    }

    fn peak(samples: &[f32]) -> f32 {
        samples.iter().fold(0.0, |m, s| m.max(s.abs()))
    }

    #[test]
    fn test_room_tone_fills_silence_and_keeps_length() {
        let silent = Waveform::silence(1.0, 16000);
        let toned = RoomTone { seed: Some(7), ..Default::default() }
            .apply(&silent)
            .unwrap();
        assert_eq!(toned.len(), silent.len());
        assert_eq!(toned.sample_rate, 16000);
        assert!(toned.samples.iter().any(|&s| s != 0.0));
        // -50 dBFS noise stays far below speech levels.
        assert!(peak(&toned.samples) < 0.01);
    }

    #[test]
    fn test_room_tone_is_low_passed() {
        let silent = Waveform::silence(1.0, 16000);
        let bright = RoomTone { cutoff_hz: 7900.0, volume_db: -20.0, seed: Some(1) }
            .apply(&silent)
            .unwrap();
        let muffled = RoomTone { cutoff_hz: 200.0, volume_db: -20.0, seed: Some(1) }
            .apply(&silent)
            .unwrap();
        assert!(zero_crossings(&muffled.samples) * 4 < zero_crossings(&bright.samples));
    }

    #[test]
    fn test_room_tone_seed_is_reproducible() {
        let wave = tone(200.0, 0.3, 0.2, 8000);
        let effect = RoomTone { seed: Some(42), ..Default::default() };
        assert_eq!(effect.apply(&wave).unwrap(), effect.apply(&wave).unwrap());
    }

    #[test]
    fn test_room_tone_rejects_cutoff_above_nyquist() {
        let wave = tone(200.0, 0.3, 0.1, 8000);
        let effect = RoomTone { cutoff_hz: 5000.0, ..Default::default() };
        assert!(matches!(effect.apply(&wave), Err(NarrationError::Effect(_))));
    }

    #[test]
    fn test_room_tone_loops_past_bed_length() {
        let wave = Waveform::silence(12.0, 1000);
        let toned = RoomTone { cutoff_hz: 400.0, seed: Some(3), ..Default::default() }
            .apply(&wave)
            .unwrap();
        assert_eq!(toned.len(), 12000);
        assert_eq!(toned.samples[0], toned.samples[10000]);
    }

    #[test]
    fn test_compressor_attenuates_loud_passages() {
        let loud = tone(220.0, 0.9, 1.0, 16000);
        let out = Compressor::default().apply(&loud).unwrap();
        assert_eq!(out.len(), loud.len());
        assert!(peak(&out.samples[8000..]) < 0.5);
    }

    #[test]
    fn test_compressor_leaves_quiet_passages() {
        let quiet = tone(220.0, 0.01, 0.5, 16000);
        let out = Compressor::default().apply(&quiet).unwrap();
        for (a, b) in quiet.samples.iter().zip(out.samples.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_compressor_makeup_gain_lifts_quiet_passages() {
        let quiet = tone(220.0, 0.01, 0.5, 16000);
        let out = Compressor { makeup_gain_db: 6.0, ..Default::default() }
            .apply(&quiet)
            .unwrap();
        let ratio = peak(&out.samples) / peak(&quiet.samples);
        assert!((ratio - 1.995).abs() < 0.01, "ratio was {ratio}");
    }

    #[test]
    fn test_compressor_rejects_expanding_ratio() {
        let wave = tone(220.0, 0.5, 0.1, 8000);
        let effect = Compressor { ratio: 0.5, ..Default::default() };
        assert!(effect.apply(&wave).is_err());
    }

    #[test]
    fn test_pitch_shift_keeps_sample_count() {
        for &len_secs in &[0.01f32, 0.5, 1.3] {
            let wave = tone(300.0, 0.5, len_secs, 24000);
            let out = PitchShift::default().apply(&wave).unwrap();
            assert_eq!(out.len(), wave.len());
            assert_eq!(out.sample_rate, wave.sample_rate);
        }
    }

    #[test]
    fn test_pitch_shift_lowers_pitch() {
        let wave = tone(440.0, 0.5, 1.0, 24000);
        let out = PitchShift { semitones: -12.0 }.apply(&wave).unwrap();
        assert_eq!(out.len(), wave.len());
        let before = zero_crossings(&wave.samples);
        let after = zero_crossings(&out.samples);
        assert!(after * 4 < before * 3, "before {before}, after {after}");
    }

    #[test]
    fn test_pitch_shift_zero_is_identity() {
        let wave = tone(440.0, 0.5, 0.2, 24000);
        assert_eq!(PitchShift { semitones: 0.0 }.apply(&wave).unwrap(), wave);
    }

    #[test]
    fn test_pitch_shift_empty() {
        let wave = Waveform::empty(24000);
        assert!(PitchShift::default().apply(&wave).unwrap().is_empty());
    }

    #[test]
    fn test_stretch_to_length_exact() {
        let samples: Vec<f32> = (0..5000).map(|i| (i as f32 * 0.01).sin()).collect();
        assert_eq!(stretch_to_length(&samples, 4000).len(), 4000);
        assert_eq!(stretch_to_length(&samples, 6001).len(), 6001);
        assert_eq!(stretch_to_length(&samples, 10).len(), 10);
        assert!(stretch_to_length(&[], 0).is_empty());
    }

    #[test]
    fn test_stretch_constant_signal_stays_constant() {
        let samples = vec![0.25f32; 3000];
        let out = stretch_to_length(&samples, 2500);
        assert!(out[1..].iter().all(|&s| (s - 0.25).abs() < 1e-4));
    }

    struct Tag(&'static str, f32);

    impl Effect for Tag {
        fn apply(&self, waveform: &Waveform) -> Result<Waveform> {
            let mut out = waveform.clone();
            out.samples.push(self.1);
            Ok(out)
        }

        fn name(&self) -> &'static str {
            self.0
        }
    }

    #[test]
    fn test_chain_runs_in_order() {
        let mut chain = EffectChain::new();
        chain.push(Box::new(Tag("first", 1.0)));
        chain.push(Box::new(Tag("second", 2.0)));
        assert_eq!(chain.names(), vec!["first", "second"]);
        let out = chain.apply(Waveform::empty(8000)).unwrap();
        assert_eq!(out.samples, vec![1.0, 2.0]);
    }

    #[test]
    fn test_chain_failure_names_step_and_stops() {
        let mut chain = EffectChain::new();
        chain.push(Box::new(Compressor { ratio: 0.0, ..Default::default() }));
        chain.push(Box::new(Tag("after", 1.0)));
        let err = chain.apply(Waveform::silence(0.1, 8000)).unwrap_err();
        match err {
            NarrationError::PostProcessing { step, .. } => assert_eq!(step, "compress"),
            other => panic!("expected post-processing error, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let wave = tone(100.0, 0.2, 0.1, 8000);
        assert_eq!(EffectChain::new().apply(wave.clone()).unwrap(), wave);
    }
}
