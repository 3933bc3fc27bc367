//! # Pitch Detection Module
//!
//! This module implements the time-domain pitch estimator used by the
//! [`PitchDetector`](crate::detector::PitchDetector). It is a difference-based
//! autocorrelation: cheap, allocation-free once warmed up, and adequate for a
//! monophonic wind instrument or a sung tone.
//!
//! ## Features
//! - RMS amplitude gating to filter out silence
//! - Difference-based autocorrelation over every lag of the window
//! - First-peak locking once the correlation crosses the threshold
//! - Parabolic-neighbour correction of the locked lag
//!
//! The peak picking deliberately takes the first peak above the threshold and
//! performs no octave-error correction.

use crate::config::PitchConfig;

/// Root-mean-square amplitude of a signal.
pub fn rms(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    (signal.iter().map(|&s| s * s).sum::<f32>() / signal.len() as f32).sqrt()
}

/// Estimates the fundamental frequency of a window of samples.
///
/// For every lag `offset` the correlation is
/// `1 - sum(|x[i] - x[i + offset]|) / N` over the overlapping samples.
/// Lag 0 always correlates perfectly, so the initial falling lobe is skipped:
/// tracking starts at the first lag whose correlation rises again. The best
/// lag is locked as soon as the correlation has exceeded the threshold and
/// then fails to improve.
///
/// # Arguments
/// * `signal` - Input audio window
/// * `sample_rate` - Sample rate in Hz
/// * `config` - Gating and correlation thresholds
/// * `correlations` - Scratch buffer, resized to the window length and reused across calls
///
/// # Returns
/// * `Some(frequency)` - Estimated fundamental in Hz
/// * `None` - Silence, or no periodic signal found
pub fn autocorrelate(
    signal: &[f32],
    sample_rate: u32,
    config: &PitchConfig,
    correlations: &mut Vec<f32>,
) -> Option<f32> {
    let size = signal.len();
    if size < 3 || sample_rate == 0 {
        return None;
    }

    // --- Noise Gate ---
    if rms(signal) < config.rms_threshold {
        return None;
    }

    correlations.clear();
    correlations.resize(size, 0.0);

    let mut in_zero_lag_lobe = true;
    let mut found_good_correlation = false;
    let mut best_offset = 0usize;
    let mut best_correlation = 0.0f32;

    for offset in 0..size {
        let difference: f32 = signal[..size - offset]
            .iter()
            .zip(&signal[offset..])
            .map(|(a, b)| (a - b).abs())
            .sum();
        let correlation = 1.0 - difference / size as f32;
        correlations[offset] = correlation;

        if in_zero_lag_lobe {
            if offset > 0 && correlation > correlations[offset - 1] {
                in_zero_lag_lobe = false;
            } else {
                continue;
            }
        }

        if correlation > best_correlation {
            best_correlation = correlation;
            best_offset = offset;
            if correlation > config.correlation_threshold {
                found_good_correlation = true;
            }
        } else if found_good_correlation {
            // Peak passed; best_offset >= 1 because lag 0 sits in the skipped lobe.
            let shift = (correlations[best_offset + 1] - correlations[best_offset - 1]) / 8.0;
            return valid_frequency(sample_rate as f32 / (best_offset as f32 + shift));
        }
    }

    if best_offset > 0 && best_correlation > config.fallback_threshold {
        return valid_frequency(sample_rate as f32 / best_offset as f32);
    }

    None
}

fn valid_frequency(frequency: f32) -> Option<f32> {
    if frequency.is_finite() && frequency > 0.0 {
        Some(frequency)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sine(freq: f32, sample_rate: u32, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                amplitude * (2.0 * std::f32::consts::PI * freq * t).sin()
            })
            .collect()
    }

    #[test]
    fn rms_of_known_signals() {
        assert_eq!(rms(&[]), 0.0);
        assert_relative_eq!(rms(&[0.5; 64]), 0.5);
        assert_relative_eq!(rms(&sine(1000.0, 48000, 1.0, 4800)), 0.7071, epsilon = 1e-3);
    }

    #[test]
    fn silence_is_gated() {
        let mut scratch = Vec::new();
        let config = PitchConfig::default();
        assert_eq!(autocorrelate(&[0.0; 2048], 44100, &config, &mut scratch), None);

        let quiet = sine(880.0, 44100, 0.005, 2048);
        assert_eq!(autocorrelate(&quiet, 44100, &config, &mut scratch), None);
    }

    #[test]
    fn constant_signal_has_no_period() {
        let mut scratch = Vec::new();
        let config = PitchConfig::default();
        assert_eq!(autocorrelate(&[0.5; 2048], 44100, &config, &mut scratch), None);
    }

    #[test]
    fn locks_on_first_period() {
        let mut scratch = Vec::new();
        let config = PitchConfig::default();
        let signal = sine(880.0, 44100, 0.5, 2048);
        let freq = autocorrelate(&signal, 44100, &config, &mut scratch).unwrap();
        assert_relative_eq!(freq, 880.0, max_relative = 0.01);
        assert_eq!(scratch.len(), 2048);
    }

    #[test]
    fn tracks_across_recorder_range() {
        let mut scratch = Vec::new();
        let config = PitchConfig::default();
        for target in [523.25, 587.33, 659.25, 783.99, 880.0, 987.77, 1046.5] {
            let signal = sine(target, 44100, 0.4, 2048);
            let freq = autocorrelate(&signal, 44100, &config, &mut scratch)
                .unwrap_or_else(|| panic!("no pitch for {target} Hz"));
            assert_relative_eq!(freq, target, max_relative = 0.01);
        }
        // Integer-lag resolution: above C6 the period is only ~30 samples.
        for target in [1396.91, 1760.0] {
            let signal = sine(target, 44100, 0.4, 2048);
            let freq = autocorrelate(&signal, 44100, &config, &mut scratch)
                .unwrap_or_else(|| panic!("no pitch for {target} Hz"));
            assert_relative_eq!(freq, target, max_relative = 0.02);
        }
    }

    #[test]
    fn falls_back_to_best_lag_below_threshold() {
        let mut scratch = Vec::new();
        // Unreachable threshold, so the tracker never locks.
        let config = PitchConfig { correlation_threshold: 1.0, ..PitchConfig::default() };
        let signal = sine(441.0, 44100, 0.5, 2048);
        let freq = autocorrelate(&signal, 44100, &config, &mut scratch).unwrap();

        // Best lag after the zero-lag lobe, first one wins on ties.
        let lobe_end = (1..scratch.len()).find(|&k| scratch[k] > scratch[k - 1]).unwrap();
        let mut best = lobe_end;
        for k in lobe_end..scratch.len() {
            if scratch[k] > scratch[best] {
                best = k;
            }
        }
        assert!(scratch[best] > config.fallback_threshold);
        assert_eq!(freq, 44100.0 / best as f32);
    }

    #[test]
    fn peak_rising_at_last_lag_uses_last_lag() {
        let mut scratch = Vec::new();
        let config = PitchConfig::default();
        // A ramp never repeats: correlation falls to the midpoint, then
        // rises until the final lag.
        let signal: Vec<f32> = (0..1024).map(|i| 0.5 * i as f32 / 1024.0).collect();
        let freq = autocorrelate(&signal, 44100, &config, &mut scratch).unwrap();
        assert_relative_eq!(freq, 44100.0 / 1023.0);
    }

    #[test]
    fn degenerate_inputs() {
        let mut scratch = Vec::new();
        let config = PitchConfig::default();
        assert_eq!(autocorrelate(&[0.5, -0.5], 44100, &config, &mut scratch), None);
        assert_eq!(autocorrelate(&[0.5; 16], 0, &config, &mut scratch), None);
    }
}
