//! Launch monitor device.
//!
//! Composition root tying the pipeline, correlator, state tracker, and
//! telemetry decoders together over an abstract transport. One instance
//! corresponds to one BLE connection; on a dropped link the owner builds a
//! fresh monitor rather than reusing this one.

use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use parking_lot::Mutex;

use crate::config::{MonitorConfig, TelemetrySource};
use crate::error::DeviceError;
use crate::events::{DeviceEvent, EventBus};
use crate::pipeline::Pipeline;
use crate::proto::event::{AlertDetails, AlertStatus, Severity};
use crate::proto::service::{
    ResponseStatus, ServiceMessage, ShotConfig, StateType, Tilt,
};
use crate::proto::Wrapper;
use crate::raw::RawMeasurementDecoder;
use crate::shot::ShotMetrics;
use crate::state::StateTracker;
use crate::bridge;
use crate::transport::{uuids, Transport};

/// Handshake must finish within this window or setup fails.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Most recent shot ids remembered for deduplication.
const SEEN_SHOT_CAPACITY: usize = 512;

/// Shot-id set bounded by insertion order.
struct SeenShots {
    ids: HashSet<u32>,
    order: VecDeque<u32>,
}

impl SeenShots {
    fn new() -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Record an id; `false` if it was already present.
    fn insert(&mut self, id: u32) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > SEEN_SHOT_CAPACITY {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
        true
    }
}

/// State shared with the pipeline's push handler and the notification
/// callbacks.
struct Inner {
    config: MonitorConfig,
    events: Arc<EventBus>,
    tracker: Mutex<StateTracker>,
    seen_shots: Mutex<SeenShots>,
    raw_decoder: Mutex<RawMeasurementDecoder>,
}

impl Inner {
    fn publish_shot(&self, shot: ShotMetrics) {
        if !self.seen_shots.lock().insert(shot.shot_id) {
            info!("ignoring duplicate shot {}", shot.shot_id);
            return;
        }
        info!(
            "shot {}: ball {:.1} m/s, spin {} rpm",
            shot.shot_id, shot.ball_speed, shot.total_spin
        );
        self.events.publish(DeviceEvent::Shot(shot));
    }

    fn apply_state(&self, state: StateType, pipeline: &Arc<Pipeline>) {
        if let Some(ready) = self.tracker.lock().update_state(state) {
            self.events.publish(DeviceEvent::ReadinessChanged(ready));
        }
        if state == StateType::Standby {
            if self.config.auto_wake {
                info!("device asleep, sending wake request");
                if send_wake(pipeline).is_none() {
                    warn!("wake request got no response");
                }
            } else {
                error!("device asleep; wake it with the button or enable autoWake");
                self.events.publish(DeviceEvent::Error {
                    severity: Severity::Warning,
                    message: "device asleep; wake it with the button or enable autoWake"
                        .to_string(),
                });
            }
        }
    }

    /// Handle one pushed alert notification.
    fn handle_alert(&self, details: &AlertDetails, pipeline: &Arc<Pipeline>) {
        if let Some(state) = &details.state {
            self.apply_state(state.state, pipeline);
        }
        if let Some(alert_error) = &details.error {
            if let Some(code) = alert_error.code {
                let message = match alert_error.device_tilt {
                    Some(tilt) => format!(
                        "device error {code} (tilt roll {:.1}, pitch {:.1})",
                        tilt.roll, tilt.pitch
                    ),
                    None => format!("device error {code}"),
                };
                warn!("{message}");
                self.events.publish(DeviceEvent::Error {
                    severity: alert_error.severity,
                    message,
                });
            }
        }
        if let Some(metrics) = &details.metrics {
            self.publish_shot(ShotMetrics::from(metrics));
        }
        if details.tilt_calibration.is_some() {
            // Calibration finished; the stored tilt is stale.
            let tilt = send_tilt_request(pipeline);
            self.tracker.lock().set_tilt(tilt);
        }
    }
}

fn send_wake(pipeline: &Arc<Pipeline>) -> Option<ResponseStatus> {
    match pipeline.send_request(&Wrapper::wake_up_request())?.service {
        Some(ServiceMessage::WakeUpResponse { status }) => Some(status),
        _ => None,
    }
}

fn send_tilt_request(pipeline: &Arc<Pipeline>) -> Option<Tilt> {
    match pipeline.send_request(&Wrapper::tilt_request())?.service {
        Some(ServiceMessage::TiltResponse { tilt }) => tilt,
        _ => None,
    }
}

/// A connected launch monitor.
pub struct LaunchMonitor {
    transport: Arc<dyn Transport>,
    pipeline: Arc<Pipeline>,
    inner: Arc<Inner>,
    model: Option<String>,
    firmware: Option<String>,
    serial: Option<String>,
}

impl LaunchMonitor {
    pub fn new(transport: Arc<dyn Transport>, config: MonitorConfig) -> Self {
        let events = Arc::new(EventBus::new());
        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&transport),
            Arc::clone(&events),
            config.debug_logging,
        ));
        let inner = Arc::new(Inner {
            config,
            events,
            tracker: Mutex::new(StateTracker::new()),
            seen_shots: Mutex::new(SeenShots::new()),
            raw_decoder: Mutex::new(RawMeasurementDecoder::new()),
        });
        LaunchMonitor {
            transport,
            pipeline,
            inner,
            model: None,
            firmware: None,
            serial: None,
        }
    }

    /// Subscribe to device events. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> crossbeam_channel::Receiver<DeviceEvent> {
        self.inner.events.subscribe()
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn firmware(&self) -> Option<&str> {
        self.firmware.as_deref()
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    pub fn battery(&self) -> Option<u8> {
        self.inner.tracker.lock().battery()
    }

    pub fn state(&self) -> StateType {
        self.inner.tracker.lock().state()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.tracker.lock().is_ready()
    }

    pub fn device_tilt(&self) -> Option<Tilt> {
        self.inner.tracker.lock().tilt()
    }

    /// Bring the device up: identity reads, subscriptions, handshake,
    /// wake, status, tilt, alert subscription, optional tilt calibration,
    /// and the environmental shot config.
    pub fn setup(&mut self) -> Result<(), DeviceError> {
        self.read_device_info()?;
        self.subscribe_battery()?;

        // Raw telemetry, where the platform never delivers protobuf
        // pushes for shots.
        if self.inner.config.telemetry_source == TelemetrySource::RawMeasurement {
            self.subscribe_raw_measurements()?;
        }

        // Wire the framed protocol before any traffic flows.
        self.transport.subscribe(
            uuids::INTERFACE_SERVICE,
            uuids::INTERFACE_NOTIFIER,
            self.pipeline.notification_handler(),
        )?;
        self.install_push_handler();

        info!("performing handshake");
        self.pipeline.perform_handshake(HANDSHAKE_TIMEOUT)?;

        if send_wake(&self.pipeline).is_none() {
            warn!("wake request got no response");
        }

        let state = self.status().unwrap_or(StateType::Error);
        self.inner.apply_state(state, &self.pipeline);

        let tilt = send_tilt_request(&self.pipeline);
        self.inner.tracker.lock().set_tilt(tilt);

        let alert_status = self.subscribe_alerts();
        if alert_status.is_empty() {
            error!("alert subscription failed; device may not send notifications");
        }

        if self.inner.config.calibrate_tilt_on_connect {
            info!("calibrating tilt on connect");
            self.start_tilt_calibration();
        }

        let config = &self.inner.config;
        let accepted = self.shot_config(ShotConfig {
            temperature: config.temperature,
            humidity: config.humidity,
            altitude: config.altitude,
            air_density: config.air_density,
            tee_range: bridge::tee_range_from_feet(config.tee_distance_in_feet),
        });
        if !accepted {
            warn!("shot config was not accepted");
        }

        info!(
            "setup complete: model {:?}, firmware {:?}, serial {:?}, battery {:?}",
            self.model, self.firmware, self.serial, self.battery()
        );
        Ok(())
    }

    /// Query the device's current state.
    pub fn status(&self) -> Option<StateType> {
        match self
            .pipeline
            .send_request(&Wrapper::status_request())?
            .service
        {
            Some(ServiceMessage::StatusResponse { state }) => Some(state?.state),
            _ => None,
        }
    }

    /// Wake the device from standby.
    pub fn wake(&self) -> Option<ResponseStatus> {
        send_wake(&self.pipeline)
    }

    /// Read the current device tilt.
    pub fn tilt(&self) -> Option<Tilt> {
        send_tilt_request(&self.pipeline)
    }

    /// Subscribe to launch-monitor alert notifications.
    pub fn subscribe_alerts(&self) -> Vec<AlertStatus> {
        use crate::proto::event::EventMessage;
        match self.pipeline.send_request(&Wrapper::subscribe_alerts()) {
            Some(Wrapper {
                event: Some(EventMessage::SubscribeResponse { alert_status }),
                ..
            }) => alert_status,
            _ => Vec::new(),
        }
    }

    /// Apply environmental parameters. Returns the device's acceptance.
    pub fn shot_config(&self, config: ShotConfig) -> bool {
        matches!(
            self.pipeline
                .send_request(&Wrapper::shot_config_request(config))
                .and_then(|w| w.service),
            Some(ServiceMessage::ShotConfigResponse { success: true })
        )
    }

    /// Begin tilt calibration; completion arrives as an alert.
    pub fn start_tilt_calibration(&self) -> Option<u32> {
        match self
            .pipeline
            .send_request(&Wrapper::start_tilt_cal_request())?
            .service
        {
            Some(ServiceMessage::StartTiltCalResponse { status }) => Some(status),
            _ => None,
        }
    }

    /// Clear stored tilt calibration.
    pub fn reset_tilt_calibration(&self, should_reset: bool) -> Option<u32> {
        match self
            .pipeline
            .send_request(&Wrapper::reset_tilt_cal_request(should_reset))?
            .service
        {
            Some(ServiceMessage::ResetTiltCalResponse { status }) => Some(status),
            _ => None,
        }
    }

    /// Stop the pipeline, reset state, and release the transport.
    pub fn shutdown(&mut self) {
        self.pipeline.shutdown();
        self.inner.tracker.lock().reset();
        if let Err(err) = self.transport.disconnect() {
            warn!("disconnect failed: {err}");
        }
    }

    fn read_device_info(&mut self) -> Result<(), DeviceError> {
        self.serial = self.read_info_string(uuids::SERIAL_NUMBER)?;
        self.firmware = self.read_info_string(uuids::FIRMWARE_REVISION)?;
        self.model = self.read_info_string(uuids::MODEL_NUMBER)?;
        Ok(())
    }

    fn read_info_string(&self, characteristic: &str) -> Result<Option<String>, DeviceError> {
        let bytes = self
            .transport
            .read_value(uuids::DEVICE_INFO_SERVICE, characteristic)?;
        Ok(Some(
            String::from_utf8_lossy(&bytes).trim_end_matches('\0').to_string(),
        ))
    }

    fn subscribe_battery(&self) -> Result<(), DeviceError> {
        let inner = Arc::clone(&self.inner);
        self.transport.subscribe(
            uuids::BATTERY_SERVICE,
            uuids::BATTERY_LEVEL,
            Box::new(move |value| {
                if let Some(&level) = value.first() {
                    let level = inner.tracker.lock().update_battery(level);
                    info!("battery level {level}%");
                    inner.events.publish(DeviceEvent::BatteryLevel(level));
                }
            }),
        )?;
        // The current level is also readable immediately.
        if let Ok(value) = self
            .transport
            .read_value(uuids::BATTERY_SERVICE, uuids::BATTERY_LEVEL)
        {
            if let Some(&level) = value.first() {
                let level = self.inner.tracker.lock().update_battery(level);
                self.inner.events.publish(DeviceEvent::BatteryLevel(level));
            }
        }
        Ok(())
    }

    fn subscribe_raw_measurements(&self) -> Result<(), DeviceError> {
        let inner = Arc::clone(&self.inner);
        self.transport.subscribe(
            uuids::MEASUREMENT_SERVICE,
            uuids::MEASUREMENT_CHARACTERISTIC,
            Box::new(move |value| {
                let shot = inner.raw_decoder.lock().process(value);
                if let Some(shot) = shot {
                    inner.publish_shot(shot);
                }
            }),
        )?;
        Ok(())
    }

    fn install_push_handler(&self) {
        let inner = Arc::clone(&self.inner);
        // Weak reference: the pipeline must not keep itself alive through
        // its own push handler.
        let pipeline = Arc::downgrade(&self.pipeline);
        let use_alert_shots =
            self.inner.config.telemetry_source == TelemetrySource::ProtobufAlerts;
        self.pipeline.set_push_handler(Box::new(move |wrapper| {
            let Some(pipeline) = pipeline.upgrade() else {
                return;
            };
            if let Some(details) = wrapper.notification() {
                let mut details = *details;
                if !use_alert_shots {
                    // Shots come from the raw path on this platform.
                    details.metrics = None;
                }
                inner.handle_alert(&details, &pipeline);
            }
        }));
    }
}

impl Drop for LaunchMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
