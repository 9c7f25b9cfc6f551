//! Control-plane thread: mode monitoring and telemetry publishing.
//!
//! Runs beside the render thread and never touches audio buffers. It
//! talks to the render thread only through the atomics in
//! [`crate::EffectController`].

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::config::{keys, ConfigSnapshot, ConfigStore};
use crate::mode::{ModeMonitor, ModeSource};
use crate::shared::EffectController;

/// Default poll interval of the control loop
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Default minimum spacing between telemetry writes
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_millis(500);

/// Messages accepted by the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Re-read the config store and apply the enable flag
    ReloadConfig,
    /// Publish telemetry now, ignoring the rate limit
    PublishNow,
    Shutdown,
}

/// Writes telemetry into the config store at a bounded rate
pub struct TelemetryPublisher {
    controller: EffectController,
    store: Arc<dyn ConfigStore>,
    interval: Duration,
    last_publish: Option<Instant>,
    last_faults: u64,
    over_threshold: bool,
    latency_threshold_ms: f32,
}

impl TelemetryPublisher {
    pub fn new(controller: EffectController, store: Arc<dyn ConfigStore>, interval: Duration) -> Self {
        let latency_threshold_ms = ConfigSnapshot::load(store.as_ref()).latency_threshold_ms;
        Self {
            controller,
            store,
            interval,
            last_publish: None,
            last_faults: 0,
            over_threshold: false,
            latency_threshold_ms,
        }
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    pub fn set_latency_threshold_ms(&mut self, threshold: f32) {
        self.latency_threshold_ms = threshold;
    }

    /// Publish if at least one interval has passed since the last write.
    /// Returns whether anything was written.
    pub fn publish(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_publish {
            if now.saturating_duration_since(last) < self.interval {
                return false;
            }
        }
        self.publish_now(now);
        true
    }

    pub fn publish_now(&mut self, now: Instant) {
        self.last_publish = Some(now);
        let telemetry = self.controller.telemetry();

        if telemetry.faults > self.last_faults {
            warn!(
                "Pitch shifter bypassed {} block(s) since last report ({} total)",
                telemetry.faults - self.last_faults,
                telemetry.faults
            );
        }
        self.last_faults = telemetry.faults;

        let over = telemetry.latency_ms > self.latency_threshold_ms;
        if over && !self.over_threshold {
            warn!(
                "Processing latency {:.2} ms exceeds {:.1} ms threshold",
                telemetry.latency_ms, self.latency_threshold_ms
            );
        }
        self.over_threshold = over;

        let writes = [
            (keys::LATENCY_MS, format!("{:.3}", telemetry.latency_ms)),
            (keys::VOIP_MODE, telemetry.voice_active.to_string()),
            (keys::FAULT_COUNT, telemetry.faults.to_string()),
        ];
        for (key, value) in writes {
            if let Err(e) = self.store.set(key, &value) {
                warn!("Failed to publish {}: {}", key, e);
            }
        }
    }
}

/// Background thread driving a [`ModeMonitor`] and a [`TelemetryPublisher`]
pub struct ControlLoop {
    tx: Sender<ControlMessage>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ControlLoop {
    pub fn spawn<S: ModeSource + 'static>(
        mut monitor: ModeMonitor<S>,
        mut publisher: TelemetryPublisher,
        poll_interval: Duration,
    ) -> io::Result<Self> {
        let (tx, rx) = bounded(64);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_loop = shutdown.clone();

        let handle = thread::Builder::new()
            .name("audioshift-control".to_string())
            .spawn(move || {
                debug!("Control loop started");
                while !shutdown_loop.load(Ordering::Relaxed) {
                    match rx.recv_timeout(poll_interval) {
                        Ok(ControlMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                        Ok(ControlMessage::ReloadConfig) => {
                            let snapshot = ConfigSnapshot::load(publisher.store().as_ref());
                            publisher.controller.set_enabled(snapshot.enabled);
                            publisher.set_latency_threshold_ms(snapshot.latency_threshold_ms);
                            info!("Config reloaded, enabled={}", snapshot.enabled);
                        }
                        Ok(ControlMessage::PublishNow) => publisher.publish_now(Instant::now()),
                        Err(RecvTimeoutError::Timeout) => {}
                    }

                    if let Some(period) = publisher.controller.block_period() {
                        monitor.set_min_hold(period);
                    }
                    monitor.poll();
                    publisher.publish(Instant::now());
                }
                publisher.publish_now(Instant::now());
                debug!("Control loop stopped");
            })?;

        Ok(Self {
            tx,
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn send(&self, message: ControlMessage) {
        let _ = self.tx.try_send(message);
    }

    pub fn reload(&self) {
        self.send(ControlMessage::ReloadConfig);
    }

    /// Stop the thread and wait for it
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.tx.try_send(ControlMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Control loop panicked");
            }
        }
    }
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryStore;
    use crate::mode::{AudioMode, SharedModeSignal};
    use crate::shared::SharedState;
    use audioshift_dsp::ProfileKind;

    fn controller() -> EffectController {
        EffectController::new(Arc::new(SharedState::default()))
    }

    #[test]
    fn test_publish_is_rate_limited() {
        let store = Arc::new(MemoryStore::new());
        let mut publisher = TelemetryPublisher::new(controller(), store.clone(), Duration::from_millis(100));
        let t0 = Instant::now();

        assert!(publisher.publish(t0));
        assert_eq!(store.get(keys::FAULT_COUNT).as_deref(), Some("0"));
        assert_eq!(store.get(keys::VOIP_MODE).as_deref(), Some("false"));
        assert!(store.get(keys::LATENCY_MS).is_some());

        assert!(!publisher.publish(t0 + Duration::from_millis(50)));
        assert!(publisher.publish(t0 + Duration::from_millis(100)));
    }

    #[test]
    fn test_control_loop_forwards_mode_changes() {
        let controller = controller();
        let store: Arc<dyn ConfigStore> = Arc::new(MemoryStore::new());
        let signal = SharedModeSignal::new();
        let monitor = ModeMonitor::new(signal.clone(), controller.selector(), Duration::from_millis(1));
        let publisher = TelemetryPublisher::new(controller.clone(), store, DEFAULT_PUBLISH_INTERVAL);
        let mut control = ControlLoop::spawn(monitor, publisher, Duration::from_millis(1)).unwrap();

        signal.set(AudioMode::InCommunication);
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut seen = None;
        while Instant::now() < deadline {
            if let Some(kind) = controller.selector().take() {
                seen = Some(kind);
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        control.stop();
        assert_eq!(seen, Some(ProfileKind::VoiceCall));
    }

    #[test]
    fn test_reload_applies_enable_flag() {
        let controller = controller();
        controller.set_enabled(true);
        let store = Arc::new(MemoryStore::with_values([(keys::ENABLED, "false")]));
        let monitor = ModeMonitor::new(SharedModeSignal::new(), controller.selector(), Duration::ZERO);
        let publisher = TelemetryPublisher::new(controller.clone(), store, DEFAULT_PUBLISH_INTERVAL);
        let mut control = ControlLoop::spawn(monitor, publisher, Duration::from_millis(1)).unwrap();

        control.reload();
        let deadline = Instant::now() + Duration::from_secs(2);
        while controller.is_enabled() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        control.stop();
        assert!(!controller.is_enabled());
    }

    #[test]
    fn test_stop_publishes_final_telemetry() {
        let store = Arc::new(MemoryStore::new());
        let monitor = ModeMonitor::new(SharedModeSignal::new(), controller().selector(), Duration::ZERO);
        let publisher = TelemetryPublisher::new(controller(), store.clone(), Duration::from_secs(3600));
        let mut control = ControlLoop::spawn(monitor, publisher, Duration::from_millis(1)).unwrap();
        control.stop();
        assert!(store.get(keys::LATENCY_MS).is_some());
    }
}
