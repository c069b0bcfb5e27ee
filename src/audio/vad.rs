//! Energy-based voice activity detection.
//!
//! Classifies capture frames with a hysteresis pair of RMS thresholds and a
//! hang window, and emits edge events only; the turn-taking engine reacts
//! to transitions, never to continuous classification. Timing comes from
//! frame capture timestamps, so classification is deterministic for a given
//! frame sequence.

use crate::audio::frame::AudioFrame;
use crate::config::VadConfig;

/// Speech boundary edges delivered to the turn-taking engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    SpeechStarted,
    SpeechStopped,
}

pub struct VoiceActivityDetector {
    config: VadConfig,
    in_speech: bool,
    /// Timestamp of the first frame below the stop threshold while in
    /// speech; cleared when the level recovers within the hang window.
    dip_started_ms: Option<u64>,
    last_level: f32,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            in_speech: false,
            dip_started_ms: None,
            last_level: 0.0,
        }
    }

    /// Classify one frame. Returns an edge event when the speech state
    /// flips, `None` otherwise.
    pub fn process(&mut self, frame: &AudioFrame) -> Option<VadEvent> {
        let level = rms_level(&frame.samples);
        self.last_level = level;

        if !self.in_speech {
            if level >= self.config.start_threshold {
                self.in_speech = true;
                self.dip_started_ms = None;
                log::debug!("VAD: speech started at {}ms (level {:.3})", frame.timestamp_ms, level);
                return Some(VadEvent::SpeechStarted);
            }
            return None;
        }

        // In speech: only a sustained drop below the stop threshold ends it.
        if level > self.config.stop_threshold {
            self.dip_started_ms = None;
            return None;
        }

        let dip_start = *self.dip_started_ms.get_or_insert(frame.timestamp_ms);
        if frame.timestamp_ms.saturating_sub(dip_start) >= self.config.hang_ms {
            self.in_speech = false;
            self.dip_started_ms = None;
            log::debug!("VAD: speech stopped at {}ms (level {:.3})", frame.timestamp_ms, level);
            return Some(VadEvent::SpeechStopped);
        }
        None
    }

    /// Last normalized level, for the cosmetic volume-meter observer.
    pub fn level(&self) -> f32 {
        self.last_level
    }

    pub fn is_in_speech(&self) -> bool {
        self.in_speech
    }

    /// True while the level sits below the stop threshold but the hang
    /// window has not yet expired.
    pub fn is_dipping(&self) -> bool {
        self.dip_started_ms.is_some()
    }
}

/// Root-mean-square of the samples, scaled to [0, 1].
fn rms_level(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    let rms = (sum_sq / samples.len() as f64).sqrt();
    (rms / i16::MAX as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(level: f32, timestamp_ms: u64) -> AudioFrame {
        // A constant-amplitude frame has RMS equal to that amplitude.
        let amplitude = (level * i16::MAX as f32) as i16;
        AudioFrame {
            samples: vec![amplitude; 320],
            sample_rate: 16000,
            channels: 1,
            timestamp_ms,
            duration_ms: 20,
        }
    }

    #[test]
    fn emits_edges_with_hysteresis() {
        let mut vad = VoiceActivityDetector::new(VadConfig::default());

        assert_eq!(vad.process(&frame(0.005, 0)), None);
        assert_eq!(vad.process(&frame(0.05, 20)), Some(VadEvent::SpeechStarted));
        // Between stop and start thresholds: still speech, no event.
        assert_eq!(vad.process(&frame(0.015, 40)), None);
        assert!(vad.is_in_speech());
    }

    #[test]
    fn short_dip_does_not_end_speech() {
        let mut vad = VoiceActivityDetector::new(VadConfig::default());
        vad.process(&frame(0.05, 0));

        // 200ms below stop threshold, then recovery: inside the hang window.
        assert_eq!(vad.process(&frame(0.001, 100)), None);
        assert_eq!(vad.process(&frame(0.001, 200)), None);
        assert_eq!(vad.process(&frame(0.05, 300)), None);
        assert!(vad.is_in_speech());
    }

    #[test]
    fn sustained_silence_ends_speech() {
        let mut vad = VoiceActivityDetector::new(VadConfig::default());
        vad.process(&frame(0.05, 0));

        assert_eq!(vad.process(&frame(0.001, 100)), None);
        assert_eq!(vad.process(&frame(0.001, 250)), None);
        assert_eq!(vad.process(&frame(0.001, 400)), Some(VadEvent::SpeechStopped));
        assert!(!vad.is_in_speech());
    }

    #[test]
    fn stop_threshold_is_sticky() {
        // A level between stop and start must not re-trigger a start once
        // speech has ended.
        let mut vad = VoiceActivityDetector::new(VadConfig::default());
        vad.process(&frame(0.05, 0));
        vad.process(&frame(0.001, 100));
        vad.process(&frame(0.001, 500));
        assert!(!vad.is_in_speech());

        assert_eq!(vad.process(&frame(0.015, 520)), None);
        assert_eq!(vad.process(&frame(0.03, 540)), Some(VadEvent::SpeechStarted));
    }

    #[test]
    fn level_tracks_rms() {
        let mut vad = VoiceActivityDetector::new(VadConfig::default());
        vad.process(&frame(0.5, 0));
        assert!((vad.level() - 0.5).abs() < 0.01);
    }
}
