//! Server configuration.
//!
//! Loads `hud_core::Config` from defaults, layers an optional YAML file,
//! then environment variables, then CLI flags (highest precedence, applied
//! in `main.rs`).

use std::path::Path;

use anyhow::{Context, Result};
use hud_core::Config;

/// Loads configuration from a YAML file (if given), then applies
/// environment variable overrides (spec's environment variable list).
pub fn load(path: Option<&Path>) -> Result<Config> {
    let mut config = if let Some(path) = path {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

fn env_parse<T: std::str::FromStr>(key: &str, field: &mut T) {
    if let Ok(val) = std::env::var(key) {
        if let Ok(parsed) = val.parse() {
            *field = parsed;
        } else {
            log::warn!("[Config] Ignoring unparsable {}={}", key, val);
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn apply_env_overrides(config: &mut Config) {
    env_parse("BIND_PORT", &mut config.bind_port);
    if let Some(host) = env_string("BIND_HOST") {
        config.bind_host = host;
    }

    if let Ok(val) = std::env::var("STT_AUDIO_SOURCE") {
        config.stt_audio_source = match val.as_str() {
            "android" | "android_mic" => hud_core::config::SttAudioSource::AndroidMic,
            "esp32" => hud_core::config::SttAudioSource::Esp32,
            "auto" => hud_core::config::SttAudioSource::Auto,
            other => {
                log::warn!("[Config] Unrecognized STT_AUDIO_SOURCE={}, keeping default", other);
                config.stt_audio_source
            }
        };
    }

    env_parse("ESP32_GAIN_LEFT", &mut config.esp32_gain_left);
    env_parse("ESP32_GAIN_RIGHT", &mut config.esp32_gain_right);

    env_parse("DIRECTION_NOISE_FLOOR", &mut config.direction.noise_floor);
    env_parse("DIRECTION_GAIN_QUAD", &mut config.direction.gain_quad);
    env_parse("DIRECTION_GAIN_LR", &mut config.direction.gain_lr);
    env_parse("DIRECTION_GAIN_MONO", &mut config.direction.gain_mono);
    env_parse("BACK_BALANCE_GAIN_DEG", &mut config.direction.back_balance_gain_deg);
    env_parse("BACK_BALANCE_EXP", &mut config.direction.back_balance_exp);
    env_parse("HYBRID_FRONT_BACK_GAIN", &mut config.direction.hybrid_front_back_gain);
    env_parse("QUAD_FRONT_WEIGHT", &mut config.direction.quad_front_weight);
    env_parse("QUAD_BACK_WEIGHT", &mut config.direction.quad_back_weight);

    env_parse("RADAR_WINDOW_S", &mut config.radar.window_s);
    env_parse("RADAR_MAX_DOTS", &mut config.radar.max_dots);
    env_parse("RADAR_MIN_FREQ_HZ", &mut config.radar.min_freq_hz);
    env_parse("RADAR_MAX_FREQ_HZ", &mut config.radar.max_freq_hz);
    env_parse("RADAR_BASELINE_ALPHA", &mut config.radar.baseline_alpha);
    env_parse("RADAR_BASELINE_PEAK_CAP", &mut config.radar.baseline_peak_cap);
    env_parse("RADAR_OUTLIER_RATIO_THRESH", &mut config.radar.outlier_ratio_thresh);
    env_parse("RADAR_TRACK_FREQ_TOL_HZ", &mut config.radar.track_freq_tol_hz);
    env_parse("RADAR_TRACK_ALPHA_FREQ", &mut config.radar.track_alpha_freq);
    env_parse("RADAR_TRACK_ALPHA_INTENSITY", &mut config.radar.track_alpha_intensity);
    env_parse("RADAR_TRACK_ALPHA_DIR", &mut config.radar.track_alpha_dir);
    env_parse("RADAR_TRACK_DECAY_TAU_S", &mut config.radar.track_decay_tau_s);
    env_parse("RADAR_TRACK_MIN_INTENSITY", &mut config.radar.track_min_intensity);

    env_parse("KEYWORD_COOLDOWN_S", &mut config.keyword_cooldown_s);
    if let Ok(val) = std::env::var("KEYWORDS") {
        config.keywords = val.split(',').map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()).collect();
    }

    env_parse("ALARM_RMS_THRESHOLD", &mut config.alarm.alarm_rms_threshold);
    env_parse("ALARM_FIRE_RATIO_THRESHOLD", &mut config.alarm.fire_ratio_threshold);
    env_parse("ALARM_HORN_RATIO_THRESHOLD", &mut config.alarm.horn_ratio_threshold);
    env_parse("ALARM_FIRE_HOLD_S", &mut config.alarm.fire_hold_s);
    env_parse("ALARM_CAR_HORN_HOLD_S", &mut config.alarm.car_horn_hold_s);
    env_parse("ALARM_SIREN_HOLD_S", &mut config.alarm.siren_hold_s);
    env_parse("YAMNET_FIRE_THRESHOLD", &mut config.alarm.yamnet_fire_threshold);
    env_parse("YAMNET_HORN_THRESHOLD", &mut config.alarm.yamnet_horn_threshold);
    env_parse("YAMNET_MIN_RMS", &mut config.alarm.yamnet_min_rms);

    env_parse("EXTERNAL_HAPTICS_ENABLED", &mut config.haptics.enabled);
    if let Some(url) = env_string("EXTERNAL_HAPTICS_LEFT_URL") {
        config.haptics.left_url = Some(url);
    }
    if let Some(url) = env_string("EXTERNAL_HAPTICS_RIGHT_URL") {
        config.haptics.right_url = Some(url);
    }
    if let Some(encoding) = env_string("EXTERNAL_HAPTICS_ENCODING") {
        config.haptics.encoding = encoding;
    }

    env_parse("ARRAY_BACK_WIDTH_MM", &mut config.array.back_width_mm);
    env_parse("ARRAY_FRONT_WIDTH_MM", &mut config.array.front_width_mm);
    env_parse("ARRAY_SIDE_LEN_MM", &mut config.array.side_len_mm);

    if let Some(key) = env_string("ELEVENLABS_API_KEY") {
        config.elevenlabs.api_key = Some(key);
    }
    if let Some(host) = env_string("ELEVENLABS_HOST") {
        config.elevenlabs.host = host;
    }
    if let Some(model_id) = env_string("ELEVENLABS_MODEL_ID") {
        config.elevenlabs.model_id = model_id;
    }
    if let Some(lang) = env_string("ELEVENLABS_LANGUAGE_CODE") {
        config.elevenlabs.language_code = Some(lang);
    }
    if let Some(format) = env_string("ELEVENLABS_AUDIO_FORMAT") {
        config.elevenlabs.audio_format = format;
    }
    if let Some(strategy) = env_string("ELEVENLABS_COMMIT_STRATEGY") {
        config.elevenlabs.commit_strategy = strategy;
    }
    env_parse("ELEVENLABS_VAD_SILENCE_THRESHOLD_SECS", &mut config.elevenlabs.vad_silence_threshold_secs);
    env_parse("ELEVENLABS_INCLUDE_TIMESTAMPS", &mut config.elevenlabs.include_timestamps);
}
