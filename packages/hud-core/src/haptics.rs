//! External haptics connector (spec §4.8, grounded on
//! `original_source/server/hudserver/external_haptics.py`).
//!
//! One [`HapticsClient`] per side (left/right). Each owns a bounded
//! drop-oldest queue of encoded buzz commands and a task that holds a
//! reconnecting WebSocket to the device, draining any replies the firmware
//! sends so the send path never blocks on them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::protocol_constants::{
    BACKOFF_CAP_SECS, BACKOFF_JITTER_MAX_SECS, BACKOFF_MULTIPLIER_MAX, BACKOFF_MULTIPLIER_MIN, BACKOFF_START_SECS,
};

const MAX_QUEUE: usize = 10;

fn clamp_u16(v: i64, lo: i64, hi: i64) -> u16 {
    v.clamp(lo, hi) as u16
}

/// Encodes a `(durationMs, intensity)` buzz command per the configured
/// on-wire format (spec §4.8: csv/tuple/json, default matching a device's
/// parser expectations).
fn encode_buzz(duration_ms: u16, intensity: u16, encoding: &str) -> String {
    match encoding {
        "json" => format!("[{},{}]", duration_ms, intensity),
        "tuple" => format!("({},{})", duration_ms, intensity),
        _ => format!("{},{}", duration_ms, intensity),
    }
}

/// Drop-oldest bounded queue of pending buzz payloads, shared between the
/// public `enqueue_buzz` call and the connection task's send loop.
struct HapticsQueue {
    items: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl HapticsQueue {
    fn new() -> Self {
        Self { items: Mutex::new(VecDeque::with_capacity(MAX_QUEUE)), notify: Notify::new() }
    }

    fn push(&self, payload: String) {
        let mut items = self.items.lock();
        if items.len() >= MAX_QUEUE {
            items.pop_front();
        }
        items.push_back(payload);
        drop(items);
        self.notify.notify_one();
    }

    async fn pop(&self) -> String {
        loop {
            if let Some(item) = self.items.lock().pop_front() {
                return item;
            }
            self.notify.notified().await;
        }
    }
}

/// One side's reconnecting haptics connection (spec §4.8).
pub struct HapticsClient {
    name: &'static str,
    url: String,
    encoding: String,
    queue: Arc<HapticsQueue>,
    connected: Arc<AtomicBool>,
}

impl HapticsClient {
    pub fn new(name: &'static str, url: String, encoding: String) -> Self {
        Self {
            name,
            url,
            encoding,
            queue: Arc::new(HapticsQueue::new()),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Queues a buzz command, clamping duration to `[0, 60000]` ms and
    /// intensity to `[0, 255]` (spec §4.8).
    pub fn enqueue_buzz(&self, duration_ms: i64, intensity: i64) {
        let duration_ms = clamp_u16(duration_ms, 0, 60_000);
        let intensity = clamp_u16(intensity, 0, 255);
        self.queue.push(encode_buzz(duration_ms, intensity, &self.encoding));
    }

    /// Runs the reconnect-forever loop until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut backoff_s = BACKOFF_START_SECS;

        loop {
            if cancel.is_cancelled() {
                return;
            }

            match tokio_tungstenite::connect_async(&self.url).await {
                Ok((stream, _)) => {
                    log::info!("[Haptics] {} connected url={}", self.name, self.url);
                    self.connected.store(true, Ordering::Relaxed);
                    backoff_s = BACKOFF_START_SECS;

                    let (mut write, mut read) = stream.split();
                    let drain = async {
                        while read.next().await.is_some() {}
                    };
                    let send_loop = async {
                        loop {
                            let payload = self.queue.pop().await;
                            if write.send(WsMessage::Text(payload)).await.is_err() {
                                break;
                            }
                        }
                    };

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            self.connected.store(false, Ordering::Relaxed);
                            return;
                        }
                        _ = drain => {}
                        _ = send_loop => {}
                    }

                    self.connected.store(false, Ordering::Relaxed);
                    log::info!("[Haptics] {} disconnected url={}", self.name, self.url);
                }
                Err(e) => {
                    log::info!("[Haptics] {} connect failed url={} err={}", self.name, self.url, e);
                }
            }

            let jitter = rand::thread_rng().gen_range(0.0..BACKOFF_JITTER_MAX_SECS);
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs_f64(backoff_s + jitter)) => {}
            }
            backoff_s = (backoff_s * rand::thread_rng().gen_range(BACKOFF_MULTIPLIER_MIN..=BACKOFF_MULTIPLIER_MAX))
                .min(BACKOFF_CAP_SECS);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_buzz_defaults_to_csv() {
        assert_eq!(encode_buzz(200, 180, "csv"), "200,180");
    }

    #[test]
    fn encode_buzz_supports_json_and_tuple() {
        assert_eq!(encode_buzz(200, 180, "json"), "[200,180]");
        assert_eq!(encode_buzz(200, 180, "tuple"), "(200,180)");
    }

    #[test]
    fn clamp_u16_bounds_values() {
        assert_eq!(clamp_u16(-5, 0, 255), 0);
        assert_eq!(clamp_u16(9999, 0, 255), 255);
    }

    #[tokio::test]
    async fn queue_drops_oldest_when_full() {
        let client = HapticsClient::new("test", "ws://unused".to_string(), "csv".to_string());
        for i in 0..(MAX_QUEUE + 3) {
            client.enqueue_buzz(i as i64, 1);
        }
        assert_eq!(client.queue.items.lock().len(), MAX_QUEUE);
    }
}
