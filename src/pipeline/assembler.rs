use crate::domain::entities::{Script, Segment, Waveform};
use crate::domain::errors::{NarrationError, Result};
use crate::infrastructure::audio::resample_to;
use crate::infrastructure::synthesis::Synthesizer;
use indicatif::ProgressBar;
use log::{debug, info, warn};

/// Compiles a [`Script`] into one waveform by synthesizing speech segments
/// one at a time and inserting silence for pauses.
pub struct Assembler<'a, S: Synthesizer + ?Sized> {
    synthesizer: &'a mut S,
    sample_rate: u32,
    progress: Option<ProgressBar>,
}

impl<'a, S: Synthesizer + ?Sized> Assembler<'a, S> {
    pub fn new(synthesizer: &'a mut S, sample_rate: u32) -> Self {
        Assembler {
            synthesizer,
            sample_rate,
            progress: None,
        }
    }

    /// Advances `progress` once per synthesized speech segment.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn assemble(&mut self, script: &Script) -> Result<Waveform> {
        let mut timeline = Waveform::empty(self.sample_rate);
        self.assemble_into(script, &mut timeline)?;
        Ok(timeline)
    }

    /// Appends every segment of `script` to `timeline` in order.
    ///
    /// On a synthesis failure `timeline` keeps everything assembled before the
    /// failing segment, so a caller can still save it.
    pub fn assemble_into(&mut self, script: &Script, timeline: &mut Waveform) -> Result<()> {
        if timeline.is_empty() {
            timeline.sample_rate = self.sample_rate;
        } else if timeline.sample_rate != self.sample_rate {
            return Err(NarrationError::Config(format!(
                "timeline is at {} Hz but the assembler renders at {} Hz",
                timeline.sample_rate, self.sample_rate
            )));
        }

        for (index, segment) in script.iter().enumerate() {
            match segment {
                Segment::Speech { text } => {
                    info!("Generating [{}]: {:.40}", index, text);
                    let chunk = self.synthesizer.synthesize(text).map_err(|source| {
                        NarrationError::Synthesis {
                            index,
                            text: text.clone(),
                            source,
                        }
                    })?;
                    let chunk = if chunk.sample_rate != self.sample_rate {
                        warn!(
                            "segment {} came back at {} Hz, resampling to {} Hz",
                            index, chunk.sample_rate, self.sample_rate
                        );
                        resample_to(&chunk, self.sample_rate)?
                    } else {
                        chunk
                    };
                    debug!("segment {}: {:.3}s of speech", index, chunk.duration_secs());
                    timeline.append(&chunk);
                    if let Some(pb) = &self.progress {
                        pb.inc(1);
                    }
                }
                Segment::Pause { duration_seconds } => {
                    debug!("segment {}: {}s silence", index, duration_seconds);
                    timeline.append(&Waveform::silence(*duration_seconds, self.sample_rate));
                }
            }
        }

        Ok(())
    }
}
