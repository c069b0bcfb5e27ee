//! audio - capture frames, voice activity detection, and agent playback.
//!
//! Real-time work (capture pacing, chunk rendering) runs on dedicated OS
//! threads and talks to the orchestration context only through channels.

mod capture;
mod frame;
mod playback;
mod vad;

pub use capture::{AudioCapture, FrameSource, SilenceSource};
pub use frame::AudioFrame;
pub use playback::{PlaybackQueue, PlaybackSink};
pub use vad::{VadEvent, VoiceActivityDetector};
