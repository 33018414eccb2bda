//! TOML configuration for a narration run. Every field has a default, so an
//! empty file (or no file) is a valid configuration.

use crate::domain::errors::{NarrationError, Result};
use crate::infrastructure::audio::DEFAULT_SAMPLE_RATE;
use crate::infrastructure::effects::{Compressor, EffectChain, PitchShift, RoomTone};
use crate::infrastructure::synthesis::SynthesisOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrationConfig {
    pub synthesis: SynthesisConfig,
    pub timeline: TimelineConfig,
    pub output: OutputConfig,
    pub post_processing: PostProcessingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Program and arguments; see `CommandSynthesizer` for placeholders.
    pub command: Vec<String>,
    /// Reference recording of the voice to clone.
    pub speaker_wav: PathBuf,
    pub language: String,
    #[serde(flatten)]
    pub options: SynthesisOptions,
    /// Where per-segment temp files go (system temp dir if unset).
    pub temp_dir: Option<PathBuf>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        let command = [
            "tts",
            "--model_name",
            "tts_models/multilingual/multi-dataset/xtts_v2",
            "--text",
            "{text}",
            "--speaker_wav",
            "{speaker_wav}",
            "--language_idx",
            "{language}",
            "--out_path",
            "{output}",
        ];
        Self {
            command: command.iter().map(|s| s.to_string()).collect(),
            speaker_wav: PathBuf::from("sample.wav"),
            language: "en".to_string(),
            options: SynthesisOptions::default(),
            temp_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Rate of the assembled narration; speech chunks are resampled to it.
    pub sample_rate: u32,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub path: PathBuf,
    /// 16 for PCM integers, 32 for float.
    pub bits_per_sample: u16,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("narration.wav"),
            bits_per_sample: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStep {
    RoomTone,
    Compress,
    PitchShift,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessingConfig {
    /// Steps to run, in application order.
    pub steps: Vec<PostStep>,
    pub room_tone: RoomTone,
    pub compress: Compressor,
    pub pitch_shift: PitchShift,
}

impl Default for PostProcessingConfig {
    fn default() -> Self {
        Self {
            steps: vec![PostStep::RoomTone, PostStep::Compress, PostStep::PitchShift],
            room_tone: RoomTone::default(),
            compress: Compressor::default(),
            pitch_shift: PitchShift::default(),
        }
    }
}

impl PostProcessingConfig {
    pub fn build_chain(&self) -> EffectChain {
        let mut chain = EffectChain::new();
        for step in &self.steps {
            match step {
                PostStep::RoomTone => chain.push(Box::new(self.room_tone.clone())),
                PostStep::Compress => chain.push(Box::new(self.compress.clone())),
                PostStep::PitchShift => chain.push(Box::new(self.pitch_shift.clone())),
            }
        }
        chain
    }
}

impl NarrationConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: NarrationConfig =
            toml::from_str(content).map_err(|e| NarrationError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(NarrationError::Config(msg));

        if self.synthesis.command.is_empty() {
            return fail("synthesis.command must name a program".to_string());
        }
        let opts = &self.synthesis.options;
        if !(opts.speed > 0.0) || !(opts.temperature > 0.0) || !(opts.repetition_penalty > 0.0) {
            return fail("synthesis speed, temperature and repetition_penalty must be positive".to_string());
        }
        if self.timeline.sample_rate == 0 {
            return fail("timeline.sample_rate must be positive".to_string());
        }
        if !matches!(self.output.bits_per_sample, 16 | 32) {
            return fail(format!(
                "output.bits_per_sample must be 16 or 32, got {}",
                self.output.bits_per_sample
            ));
        }

        let post = &self.post_processing;
        let nyquist = self.timeline.sample_rate as f32 / 2.0;
        if !(post.room_tone.cutoff_hz > 0.0 && post.room_tone.cutoff_hz < nyquist) {
            return fail(format!(
                "room_tone.cutoff_hz must lie in (0, {}), got {}",
                nyquist, post.room_tone.cutoff_hz
            ));
        }
        if !(post.compress.ratio >= 1.0) {
            return fail(format!("compress.ratio must be >= 1, got {}", post.compress.ratio));
        }
        if !(post.compress.attack_ms > 0.0 && post.compress.release_ms > 0.0) {
            return fail("compress.attack_ms and compress.release_ms must be positive".to_string());
        }

        Ok(())
    }
}
