//! Application bootstrap and dependency wiring.
//!
//! The composition root: the single place where `SharedAudioState`, the
//! broadcast hub, the connection managers, the haptics clients, and the
//! three background loops (direction, STT muxer, alarm) are instantiated
//! and wired together, modeled on the teacher's own `bootstrap.rs`.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::alarm::{self, HeuristicClassifier};
use crate::api::WsConnectionManager;
use crate::broadcast::BroadcastHub;
use crate::config::Config;
use crate::direction;
use crate::haptics::HapticsClient;
use crate::state::SharedAudioState;
use crate::stt::{self, ElevenLabsStt};

/// Container for all bootstrapped services and the background tasks they
/// run in. Consumed by `apps/server` to build the final `AppState` and to
/// drive graceful shutdown.
pub struct BootstrappedServices {
    pub audio: Arc<RwLock<SharedAudioState>>,
    pub config: Arc<RwLock<Config>>,
    pub hub: Arc<BroadcastHub>,
    pub events_ws: Arc<WsConnectionManager>,
    pub stt_ws: Arc<WsConnectionManager>,
    pub esp32_ws: Arc<WsConnectionManager>,
    pub haptics_left: Arc<HapticsClient>,
    pub haptics_right: Arc<HapticsClient>,
    pub sample_rate_hz: u32,
    pub cancel_token: CancellationToken,
    task_handles: Vec<JoinHandle<()>>,
}

impl BootstrappedServices {
    /// Cancels every background task and waits for them to finish. Safe to
    /// call more than once.
    pub async fn shutdown(mut self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");
        self.cancel_token.cancel();

        let closed = self.events_ws.close_all() + self.stt_ws.close_all() + self.esp32_ws.close_all();
        if closed > 0 {
            log::info!("[Bootstrap] Closed {} WebSocket connection(s)", closed);
        }

        for handle in self.task_handles.drain(..) {
            let _ = handle.await;
        }
        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Bootstraps all application services with their dependencies and spawns
/// the direction loop, STT muxer, alarm loop, and haptics clients.
///
/// Wiring order:
/// 1. Shared state (`SharedAudioState`, `Config`, `BroadcastHub`)
/// 2. Connection managers for the three WebSocket routes
/// 3. Haptics clients (spawned only when the respective URL is configured)
/// 4. STT muxer (depends on an `ElevenLabsStt` connector)
/// 5. Alarm loop (depends on a boxed `AlarmClassifier`)
/// 6. Direction loop
pub fn bootstrap_services(config: Config, sample_rate_hz: u32) -> BootstrappedServices {
    let cancel_token = CancellationToken::new();

    let audio = Arc::new(RwLock::new(SharedAudioState::new()));
    let haptics_cfg = config.haptics.clone();
    let elevenlabs_cfg = config.elevenlabs.clone();
    let config = Arc::new(RwLock::new(config));
    let hub = Arc::new(BroadcastHub::new());

    let events_ws = Arc::new(WsConnectionManager::new());
    let stt_ws = Arc::new(WsConnectionManager::new());
    let esp32_ws = Arc::new(WsConnectionManager::new());

    let haptics_left = Arc::new(HapticsClient::new(
        "left",
        haptics_cfg.left_url.clone().unwrap_or_default(),
        haptics_cfg.encoding.clone(),
    ));
    let haptics_right = Arc::new(HapticsClient::new(
        "right",
        haptics_cfg.right_url.clone().unwrap_or_default(),
        haptics_cfg.encoding.clone(),
    ));

    let mut task_handles = Vec::new();

    if haptics_cfg.enabled && haptics_cfg.left_url.is_some() {
        let client = Arc::clone(&haptics_left);
        let cancel = cancel_token.child_token();
        task_handles.push(tokio::spawn(async move { client.run(cancel).await }));
    }
    if haptics_cfg.enabled && haptics_cfg.right_url.is_some() {
        let client = Arc::clone(&haptics_right);
        let cancel = cancel_token.child_token();
        task_handles.push(tokio::spawn(async move { client.run(cancel).await }));
    }

    {
        let audio = Arc::clone(&audio);
        let config = Arc::clone(&config);
        let hub = Arc::clone(&hub);
        let cancel = cancel_token.child_token();
        task_handles.push(tokio::spawn(async move {
            direction::run(audio, config, hub, sample_rate_hz, cancel).await
        }));
    }

    {
        let audio = Arc::clone(&audio);
        let config = Arc::clone(&config);
        let hub = Arc::clone(&hub);
        let connector = Arc::new(ElevenLabsStt::new(elevenlabs_cfg));
        let cancel = cancel_token.child_token();
        task_handles.push(tokio::spawn(async move { stt::run(audio, config, hub, connector, cancel).await }));
    }

    {
        let audio = Arc::clone(&audio);
        let config = Arc::clone(&config);
        let hub = Arc::clone(&hub);
        let classifier: Box<dyn alarm::AlarmClassifier> = Box::new(HeuristicClassifier::new());
        let cancel = cancel_token.child_token();
        task_handles.push(tokio::spawn(async move {
            alarm::run(audio, config, hub, classifier, sample_rate_hz, cancel).await
        }));
    }

    BootstrappedServices {
        audio,
        config,
        hub,
        events_ws,
        stt_ws,
        esp32_ws,
        haptics_left,
        haptics_right,
        sample_rate_hz,
        cancel_token,
        task_handles,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_wires_services_and_shuts_down_cleanly() {
        let services = bootstrap_services(Config::default(), 16_000);
        assert_eq!(services.events_ws.connection_count(), 0);
        assert!(!services.cancel_token.is_cancelled());
        services.shutdown().await;
    }
}
