use crate::config::{DEFAULT_BEATS_PER_BAR, DEFAULT_BPM};

/// Musical subdivisions tracked by [`BeatClock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subdivision {
    Quarter,
    Eighth,
    Sixteenth,
    Bar,
}

/// Quantises a continuous audio time into beat, bar and note counters and
/// raises one-frame "hit" flags whenever a counter moves.
#[derive(Debug, Clone)]
pub struct BeatClock {
    bpm: f32,
    beats_per_bar: u32,
    audio_time: f64,
    counts: Counters,
    previous: Counters,
    hits: Hits,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Counters {
    quarter: u64,
    eighth: u64,
    sixteenth: u64,
    bar: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Hits {
    quarter: bool,
    eighth: bool,
    sixteenth: bool,
    bar: bool,
}

impl Default for BeatClock {
    fn default() -> Self {
        Self::new(DEFAULT_BPM, DEFAULT_BEATS_PER_BAR)
    }
}

impl BeatClock {
    pub fn new(bpm: f32, beats_per_bar: u32) -> Self {
        let mut clock = Self {
            bpm: DEFAULT_BPM,
            beats_per_bar: DEFAULT_BEATS_PER_BAR,
            audio_time: 0.0,
            counts: Counters::default(),
            previous: Counters::default(),
            hits: Hits::default(),
        };
        clock.set_tempo(bpm);
        clock.set_time_signature(beats_per_bar);
        clock
    }

    /// Non-positive tempi fall back to 120 BPM.
    pub fn set_tempo(&mut self, bpm: f32) {
        self.bpm = if bpm > 0.0 && bpm.is_finite() { bpm } else { DEFAULT_BPM };
    }

    /// A zero-length bar falls back to four beats.
    pub fn set_time_signature(&mut self, beats_per_bar: u32) {
        self.beats_per_bar = if beats_per_bar > 0 {
            beats_per_bar
        } else {
            DEFAULT_BEATS_PER_BAR
        };
    }

    pub fn tempo(&self) -> f32 {
        self.bpm
    }

    pub fn beats_per_bar(&self) -> u32 {
        self.beats_per_bar
    }

    pub fn audio_time(&self) -> f64 {
        self.audio_time
    }

    pub fn update(&mut self, audio_time_seconds: f64) {
        self.audio_time = audio_time_seconds.max(0.0);

        self.counts = Counters {
            quarter: self.count_for(Subdivision::Quarter),
            eighth: self.count_for(Subdivision::Eighth),
            sixteenth: self.count_for(Subdivision::Sixteenth),
            bar: self.count_for(Subdivision::Bar),
        };

        self.hits = Hits {
            quarter: self.counts.quarter != self.previous.quarter,
            eighth: self.counts.eighth != self.previous.eighth,
            sixteenth: self.counts.sixteenth != self.previous.sixteenth,
            bar: self.counts.bar != self.previous.bar,
        };
        self.previous = self.counts;
    }

    pub fn reset(&mut self) {
        self.audio_time = 0.0;
        self.counts = Counters::default();
        self.previous = Counters::default();
        self.hits = Hits::default();
    }

    /// Length of one subdivision in seconds at the current tempo.
    pub fn seconds_per(&self, subdivision: Subdivision) -> f64 {
        let beat = 60.0 / f64::from(self.bpm);
        match subdivision {
            Subdivision::Quarter => beat,
            Subdivision::Eighth => beat * 0.5,
            Subdivision::Sixteenth => beat * 0.25,
            Subdivision::Bar => beat * f64::from(self.beats_per_bar),
        }
    }

    pub fn count(&self, subdivision: Subdivision) -> u64 {
        match subdivision {
            Subdivision::Quarter => self.counts.quarter,
            Subdivision::Eighth => self.counts.eighth,
            Subdivision::Sixteenth => self.counts.sixteenth,
            Subdivision::Bar => self.counts.bar,
        }
    }

    /// True for exactly the update in which the counter changed.
    pub fn hit(&self, subdivision: Subdivision) -> bool {
        match subdivision {
            Subdivision::Quarter => self.hits.quarter,
            Subdivision::Eighth => self.hits.eighth,
            Subdivision::Sixteenth => self.hits.sixteenth,
            Subdivision::Bar => self.hits.bar,
        }
    }

    /// Position inside the current subdivision, in `[0, 1)`.
    pub fn phase(&self, subdivision: Subdivision) -> f32 {
        let length = self.seconds_per(subdivision);
        if length <= 0.0 {
            return 0.0;
        }
        let phase = (self.audio_time % length) / length;
        (phase as f32).clamp(0.0, 1.0 - f32::EPSILON)
    }

    pub fn bar_progress(&self) -> f32 {
        self.phase(Subdivision::Bar)
    }

    pub fn beat_in_bar(&self) -> u32 {
        (self.counts.quarter % u64::from(self.beats_per_bar)) as u32
    }

    fn count_for(&self, subdivision: Subdivision) -> u64 {
        (self.audio_time / self.seconds_per(subdivision)).floor() as u64
    }
}
