//! Spectral radar track detector (spec §4.4).
//!
//! Maintains an adaptive per-bin baseline spectrum and a small table of
//! live tracks, fed by periodic windowed FFTs of the four mic channels.
//! One `RadarEngine` is owned by the radar loop task and touched by no one
//! else, so it needs no lock of its own.

use std::collections::HashMap;
use std::f32::consts::PI;
use std::sync::Arc;
use std::time::Instant;

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};

use super::angle::wrap_deg;
use super::fusion::{self, FusionInputs, FusionParams, GlowEdge};
use crate::config::RadarConfig;

const EPS: f32 = 1e-6;

/// Most recent sample window per channel, already trimmed to freshness.
/// `None` means that channel has no recent audio.
#[derive(Debug, Clone, Default)]
pub struct RadarChannels {
    pub front_left: Option<Vec<f32>>,
    pub front_right: Option<Vec<f32>>,
    pub back_left: Option<Vec<f32>>,
    pub back_right: Option<Vec<f32>>,
}

struct FftPlan {
    r2c: Arc<dyn RealToComplex<f32>>,
    hann: Vec<f32>,
}

/// One tracked spectral peak, in torso frame.
#[derive(Debug, Clone, Copy)]
struct Track {
    id: u64,
    freq_hz: f32,
    intensity: f32,
    torso_direction_deg: f32,
    last_seen: Instant,
}

/// A live track mapped to HUD output coordinates, ready to broadcast.
#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RadarDot {
    pub track_id: u64,
    pub freq_hz: f32,
    pub direction_deg: f32,
    pub torso_direction_deg: f32,
    pub intensity: f32,
    pub radar_x: f32,
    pub radar_y: f32,
}

/// Per-bin power spectrum for one channel, alongside its presence flag.
struct ChannelSpectrum {
    present: bool,
    power: Vec<f32>,
}

/// Owns the FFT plan cache, adaptive baseline, and track table across ticks.
pub struct RadarEngine {
    planner: RealFftPlanner<f32>,
    plans: HashMap<usize, FftPlan>,
    baseline_n: Option<usize>,
    baseline: Vec<f32>,
    tracks: Vec<Track>,
    next_track_id: u64,
}

impl RadarEngine {
    pub fn new() -> Self {
        Self {
            planner: RealFftPlanner::new(),
            plans: HashMap::new(),
            baseline_n: None,
            baseline: Vec::new(),
            tracks: Vec::new(),
            next_track_id: 1,
        }
    }

    fn plan_for(&mut self, n: usize) -> &FftPlan {
        self.plans.entry(n).or_insert_with(|| {
            let r2c = self.planner.plan_fft_forward(n);
            let hann = (0..n)
                .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / (n as f32 - 1.0)).cos())
                .collect();
            FftPlan { r2c, hann }
        })
    }

    /// Runs one baseline/track update pass. Does nothing if fewer than two
    /// channels have enough fresh samples for a `RADAR_MIN_WINDOW_SAMPLES`
    /// window.
    pub fn update(
        &mut self,
        channels: &RadarChannels,
        sample_rate_hz: u32,
        cfg: &RadarConfig,
        fusion_params: &FusionParams,
        now: Instant,
    ) {
        let named = [
            channels.front_left.as_deref(),
            channels.front_right.as_deref(),
            channels.back_left.as_deref(),
            channels.back_right.as_deref(),
        ];
        let lens: Vec<usize> = named.iter().filter_map(|c| c.map(|s| s.len())).collect();
        if lens.is_empty() {
            return;
        }
        let n = *lens.iter().min().unwrap();
        if n < crate::protocol_constants::RADAR_MIN_WINDOW_SAMPLES {
            return;
        }

        let plan = self.plan_for(n);
        let hann = plan.hann.clone();
        let r2c = Arc::clone(&plan.r2c);
        let spectrum_len = n / 2 + 1;

        let compute = |samples: &[f32]| -> Vec<f32> {
            let tail = &samples[samples.len() - n..];
            let mean = tail.iter().sum::<f32>() / n as f32;
            let mut windowed: Vec<f32> = tail
                .iter()
                .zip(hann.iter())
                .map(|(s, w)| (s - mean) * w)
                .collect();
            let mut spectrum = r2c.make_output_vec();
            let _ = r2c.process(&mut windowed, &mut spectrum);
            spectrum.iter().map(|c: &Complex<f32>| c.norm_sqr()).collect()
        };

        let specs: [ChannelSpectrum; 4] = [
            channels.front_left.as_deref().map_or(
                ChannelSpectrum { present: false, power: vec![0.0; spectrum_len] },
                |s| ChannelSpectrum { present: true, power: compute(s) },
            ),
            channels.front_right.as_deref().map_or(
                ChannelSpectrum { present: false, power: vec![0.0; spectrum_len] },
                |s| ChannelSpectrum { present: true, power: compute(s) },
            ),
            channels.back_left.as_deref().map_or(
                ChannelSpectrum { present: false, power: vec![0.0; spectrum_len] },
                |s| ChannelSpectrum { present: true, power: compute(s) },
            ),
            channels.back_right.as_deref().map_or(
                ChannelSpectrum { present: false, power: vec![0.0; spectrum_len] },
                |s| ChannelSpectrum { present: true, power: compute(s) },
            ),
        ];

        let mut total = vec![0.0f32; spectrum_len];
        for spec in &specs {
            for (t, p) in total.iter_mut().zip(spec.power.iter()) {
                *t += p;
            }
        }

        let bin_hz = sample_rate_hz as f32 / n as f32;
        let freqs: Vec<f32> = (0..spectrum_len).map(|k| k as f32 * bin_hz).collect();
        let idx: Vec<usize> = (0..spectrum_len)
            .filter(|&k| freqs[k] >= cfg.min_freq_hz && freqs[k] <= cfg.max_freq_hz)
            .collect();
        if idx.is_empty() {
            return;
        }

        if self.baseline_n != Some(n) {
            self.baseline = total.clone();
            self.baseline_n = Some(n);
        } else {
            for k in 0..spectrum_len {
                let clipped = total[k].min(self.baseline[k] * cfg.baseline_peak_cap);
                self.baseline[k] = (1.0 - cfg.baseline_alpha) * self.baseline[k]
                    + cfg.baseline_alpha * clipped;
            }
        }

        let excess: Vec<f32> = (0..spectrum_len)
            .map(|k| (total[k] - self.baseline[k]).max(0.0))
            .collect();
        let max_excess = idx.iter().map(|&k| excess[k]).fold(0.0f32, f32::max);
        if max_excess <= 0.0 {
            return;
        }

        let mut scored: Vec<usize> = idx.clone();
        scored.sort_by(|&a, &b| {
            let score_a = score(excess[a], self.baseline[a]);
            let score_b = score(excess[b], self.baseline[b]);
            score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal)
        });

        let sep_bins = (200.0 / bin_hz).ceil() as usize;
        let band_bins = (120.0 / bin_hz).ceil() as usize;

        let mut accepted: Vec<usize> = Vec::new();
        for &b in &scored {
            if accepted.len() >= cfg.max_dots {
                break;
            }
            if excess[b] < 0.25 * max_excess {
                continue;
            }
            let rel = excess[b] / (self.baseline[b] + EPS);
            if rel < cfg.outlier_ratio_thresh {
                continue;
            }
            if accepted.iter().any(|&p| (b as i64 - p as i64).unsigned_abs() as usize < sep_bins) {
                continue;
            }
            accepted.push(b);
        }
        if accepted.is_empty() {
            return;
        }

        struct Candidate {
            freq_hz: f32,
            intensity: f32,
            raw_dir: f32,
        }

        let mut band_excesses = Vec::with_capacity(accepted.len());
        let mut band_data = Vec::with_capacity(accepted.len());
        for &b in &accepted {
            let lo = b.saturating_sub(band_bins);
            let hi = (b + band_bins).min(spectrum_len - 1);

            let mut band_total = 0.0f32;
            let mut band_base = 0.0f32;
            let mut band_excess_weighted_freq = 0.0f32;
            let mut band_excess_sum = 0.0f32;
            let mut e = [0.0f32; 4];
            for k in lo..=hi {
                band_total += total[k];
                band_base += self.baseline[k];
                let ex = (total[k] - self.baseline[k]).max(0.0);
                band_excess_weighted_freq += ex * freqs[k];
                band_excess_sum += ex;
                for (ch, spec) in specs.iter().enumerate() {
                    e[ch] += spec.power[k];
                }
            }
            let band_excess = (band_total - band_base).max(0.0);
            band_excesses.push(band_excess);
            band_data.push((band_total, band_excess, e, band_excess_weighted_freq, band_excess_sum));
        }

        let max_band_excess = band_excesses.iter().cloned().fold(0.0f32, f32::max);
        if max_band_excess <= 0.0 {
            return;
        }

        let mut candidates = Vec::new();
        for (band_total, band_excess, e, excess_freq_sum, excess_sum) in band_data {
            if band_total <= 0.0 || band_excess <= 0.0 {
                continue;
            }
            let intensity = (band_excess / max_band_excess).sqrt().clamp(0.0, 1.0);
            let scale = (band_excess / band_total).clamp(0.0, 1.0);
            let inputs = FusionInputs {
                front_left: specs[0].present.then_some(e[0] * scale),
                front_right: specs[1].present.then_some(e[1] * scale),
                back_left: specs[2].present.then_some(e[2] * scale),
                back_right: specs[3].present.then_some(e[3] * scale),
                back_mono: None,
            };
            let raw_dir = fusion::fuse(inputs, fusion_params)
                .map(|r| r.raw_direction_deg)
                .unwrap_or(0.0);
            let freq_hz = if excess_sum > 0.0 {
                excess_freq_sum / excess_sum
            } else {
                0.0
            };
            candidates.push(Candidate { freq_hz, intensity, raw_dir });
        }

        candidates.sort_by(|a, b| b.intensity.partial_cmp(&a.intensity).unwrap_or(std::cmp::Ordering::Equal));

        let mut used = vec![false; self.tracks.len()];
        for candidate in candidates {
            let mut best: Option<(usize, f32)> = None;
            for (i, track) in self.tracks.iter().enumerate() {
                if used[i] {
                    continue;
                }
                let dist = (track.freq_hz - candidate.freq_hz).abs();
                if best.map_or(true, |(_, d)| dist < d) {
                    best = Some((i, dist));
                }
            }

            match best {
                Some((i, dist)) if dist <= cfg.track_freq_tol_hz => {
                    let track = &mut self.tracks[i];
                    track.freq_hz = (1.0 - cfg.track_alpha_freq) * track.freq_hz
                        + cfg.track_alpha_freq * candidate.freq_hz;
                    track.intensity = (1.0 - cfg.track_alpha_intensity) * track.intensity
                        + cfg.track_alpha_intensity * candidate.intensity;
                    track.torso_direction_deg =
                        super::angle::lerp_angle(track.torso_direction_deg, candidate.raw_dir, cfg.track_alpha_dir);
                    track.last_seen = now;
                    used[i] = true;
                }
                _ => {
                    let id = self.next_track_id;
                    self.next_track_id += 1;
                    self.tracks.push(Track {
                        id,
                        freq_hz: candidate.freq_hz,
                        intensity: candidate.intensity,
                        torso_direction_deg: candidate.raw_dir,
                        last_seen: now,
                    });
                }
            }
        }
    }

    /// Prunes dead tracks and renders the remaining live ones to UI dots.
    pub fn emit(&mut self, now: Instant, delta_yaw_deg: f32, cfg: &RadarConfig) -> Vec<RadarDot> {
        self.tracks.retain(|t| {
            now.saturating_duration_since(t.last_seen).as_secs_f32() <= crate::protocol_constants::RADAR_TRACK_MAX_AGE_S
        });

        let mut dots: Vec<RadarDot> = self
            .tracks
            .iter()
            .filter_map(|t| {
                let age = now.saturating_duration_since(t.last_seen).as_secs_f32();
                let decay = (-age / cfg.track_decay_tau_s).exp();
                let display_intensity = t.intensity * decay;
                if display_intensity < cfg.track_min_intensity {
                    return None;
                }
                let dir_head = wrap_deg(t.torso_direction_deg - delta_yaw_deg);
                let (radar_x, radar_y, _edge): (f32, f32, GlowEdge) = fusion::map_ui(dir_head, display_intensity);
                Some(RadarDot {
                    track_id: t.id,
                    freq_hz: t.freq_hz,
                    direction_deg: dir_head,
                    torso_direction_deg: t.torso_direction_deg,
                    intensity: display_intensity,
                    radar_x,
                    radar_y,
                })
            })
            .collect();

        dots.sort_by(|a, b| b.intensity.partial_cmp(&a.intensity).unwrap_or(std::cmp::Ordering::Equal));
        dots.truncate(cfg.max_dots);
        dots
    }
}

impl Default for RadarEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn score(excess: f32, baseline: f32) -> f32 {
    let rel = excess / (baseline + EPS);
    excess * (rel + 1e-6).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_params() -> FusionParams {
        FusionParams {
            noise_floor: 0.0,
            gain_quad: 1.0,
            gain_lr: 1.0,
            gain_mono: 1.0,
            back_balance_gain_deg: 150.0,
            back_balance_exp: 0.8,
            hybrid_front_back_gain: 1.0,
        }
    }

    fn test_cfg() -> RadarConfig {
        RadarConfig {
            window_s: 0.5,
            max_dots: 3,
            min_freq_hz: 200.0,
            max_freq_hz: 4000.0,
            baseline_alpha: 0.03,
            baseline_peak_cap: 2.0,
            outlier_ratio_thresh: 0.7,
            track_freq_tol_hz: 250.0,
            track_alpha_freq: 0.25,
            track_alpha_intensity: 0.15,
            track_alpha_dir: 0.15,
            track_decay_tau_s: 1.2,
            track_min_intensity: 0.15,
        }
    }

    fn tone(freq_hz: f32, sample_rate_hz: u32, n: usize, amplitude: f32) -> Vec<f32> {
        (0..n)
            .map(|i| amplitude * (2.0 * PI * freq_hz * i as f32 / sample_rate_hz as f32).sin())
            .collect()
    }

    #[test]
    fn sustained_tone_forms_a_converging_track() {
        let mut engine = RadarEngine::new();
        let sample_rate = 16_000u32;
        let n = 4096;
        let now = Instant::now();

        for i in 0..10 {
            let samples = tone(1000.0, sample_rate, n, if i == 0 { 0.02 } else { 1.0 });
            let channels = RadarChannels {
                front_left: Some(samples.clone()),
                front_right: Some(samples.clone()),
                back_left: None,
                back_right: None,
            };
            engine.update(&channels, sample_rate, &test_cfg(), &test_params(), now + Duration::from_millis(i * 200));
        }

        let dots = engine.emit(now + Duration::from_millis(2000), 0.0, &test_cfg());
        assert_eq!(dots.len(), 1, "expected exactly one converged track");
        assert!((dots[0].freq_hz - 1000.0).abs() < 50.0, "freq_hz={}", dots[0].freq_hz);
    }

    #[test]
    fn silence_after_activity_decays_and_dies() {
        let mut engine = RadarEngine::new();
        let sample_rate = 16_000u32;
        let n = 4096;
        let now = Instant::now();

        for i in 0..5 {
            let samples = tone(1500.0, sample_rate, n, if i == 0 { 0.02 } else { 1.0 });
            let channels = RadarChannels {
                front_left: Some(samples.clone()),
                front_right: Some(samples.clone()),
                back_left: None,
                back_right: None,
            };
            engine.update(&channels, sample_rate, &test_cfg(), &test_params(), now + Duration::from_millis(i * 200));
        }

        let dots = engine.emit(now + Duration::from_millis(4000), 0.0, &test_cfg());
        assert!(dots.is_empty(), "track should have decayed below min_intensity or aged out");
    }

    #[test]
    fn two_separated_tones_form_two_tracks() {
        let mut engine = RadarEngine::new();
        let sample_rate = 16_000u32;
        let n = 4096;
        let now = Instant::now();

        for i in 0..10 {
            let mut samples = tone(800.0, sample_rate, n, if i == 0 { 0.01 } else { 0.8 });
            let second = tone(1600.0, sample_rate, n, if i == 0 { 0.01 } else { 0.8 });
            for (s, t) in samples.iter_mut().zip(second.iter()) {
                *s += t;
            }
            let channels = RadarChannels {
                front_left: Some(samples.clone()),
                front_right: Some(samples.clone()),
                back_left: None,
                back_right: None,
            };
            engine.update(&channels, sample_rate, &test_cfg(), &test_params(), now + Duration::from_millis(i * 200));
        }

        let dots = engine.emit(now + Duration::from_millis(2000), 0.0, &test_cfg());
        assert_eq!(dots.len(), 2, "expected two distinct tracks, got {}", dots.len());
    }

    #[test]
    fn insufficient_samples_leaves_tracks_untouched() {
        let mut engine = RadarEngine::new();
        let channels = RadarChannels {
            front_left: Some(vec![0.0; 100]),
            front_right: Some(vec![0.0; 100]),
            back_left: None,
            back_right: None,
        };
        engine.update(&channels, 16_000, &test_cfg(), &test_params(), Instant::now());
        assert!(engine.tracks.is_empty());
    }
}
