use serde::Serialize;

/// One unit of a parsed script timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Segment {
    /// Trimmed, non-empty text to hand to the synthesizer.
    Speech { text: String },
    /// Silence to insert, in seconds.
    Pause { duration_seconds: f64 },
}

impl Segment {
    pub fn speech(text: impl Into<String>) -> Self {
        Segment::Speech { text: text.into() }
    }

    pub fn pause(duration_seconds: f64) -> Self {
        Segment::Pause { duration_seconds }
    }
}

/// Ordered, immutable sequence of segments produced by the parser.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Script {
    segments: Vec<Segment>,
}

impl Script {
    pub(crate) fn from_segments(segments: Vec<Segment>) -> Self {
        Script { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.segments.iter()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn speech_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Speech { .. }))
            .count()
    }

    /// Total seconds of silence the script asks for.
    pub fn total_pause_seconds(&self) -> f64 {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Pause { duration_seconds } => *duration_seconds,
                Segment::Speech { .. } => 0.0,
            })
            .sum()
    }
}

/// Mono audio buffer with samples in [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Waveform { samples, sample_rate }
    }

    pub fn empty(sample_rate: u32) -> Self {
        Waveform::new(Vec::new(), sample_rate)
    }

    /// Digital silence of `seconds`, rounded to the nearest sample.
    pub fn silence(seconds: f64, sample_rate: u32) -> Self {
        let len = (seconds * sample_rate as f64).round().max(0.0) as usize;
        Waveform::new(vec![0.0; len], sample_rate)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Appends `other` to the end of this waveform.
    ///
    /// # Panics
    ///
    /// Panics if the sample rates differ; resample first.
    pub fn append(&mut self, other: &Waveform) {
        assert_eq!(
            self.sample_rate, other.sample_rate,
            "cannot append {} Hz audio to a {} Hz waveform",
            other.sample_rate, self.sample_rate
        );
        self.samples.extend_from_slice(&other.samples);
    }
}
