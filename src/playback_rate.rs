//! The current playback rate, shared between the application and the pipeline.

use std::sync::atomic::{AtomicU32, Ordering};

/// A signed playback rate. 1.0 is normal forward playback; other values indicate trick play
/// (fast forward, or rewind when negative). The rate can be changed at any time by the
/// application thread while the pipeline reads it.
#[derive(Debug)]
pub struct PlaybackRate {
    bits: AtomicU32,
}

impl PlaybackRate {
    pub fn new(rate: f32) -> PlaybackRate {
        PlaybackRate { bits: AtomicU32::new(rate.to_bits()) }
    }

    pub fn rate(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn set_rate(&self, rate: f32) {
        self.bits.store(rate.to_bits(), Ordering::Relaxed);
    }

    pub fn abs_rate(&self) -> f32 {
        self.rate().abs()
    }

    pub fn is_forward(&self) -> bool {
        self.rate() >= 0.0
    }

    pub fn is_normal(&self) -> bool {
        self.rate() == 1.0
    }

    pub fn is_trick(&self) -> bool {
        self.rate() != 1.0
    }
}

impl Default for PlaybackRate {
    fn default() -> PlaybackRate {
        PlaybackRate::new(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::PlaybackRate;

    #[test]
    fn test_playback_rate_directions() {
        let rate = PlaybackRate::default();
        assert!(rate.is_forward());
        assert!(rate.is_normal());
        assert!(!rate.is_trick());

        rate.set_rate(-8.0);
        assert!(!rate.is_forward());
        assert!(rate.is_trick());
        assert_eq!(rate.abs_rate(), 8.0);

        rate.set_rate(2.0);
        assert!(rate.is_forward());
        assert!(rate.is_trick());
        assert!(!rate.is_normal());
    }
}
