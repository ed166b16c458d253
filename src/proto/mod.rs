//! Protobuf message layer.
//!
//! Every protobuf payload on the wire is a `Wrapper` carrying either a
//! service-channel message (request/response RPCs) or an event-channel
//! message (alert subscription and pushed notifications). The codec is
//! hand-rolled over [`wire`]; the device's schema is small and fixed.

pub mod event;
pub mod service;
pub mod wire;

use crate::error::Result;
use event::{AlertDetails, AlertType, EventMessage};
use service::{ServiceMessage, ShotConfig};

/// Top-level protobuf envelope.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Wrapper {
    pub service: Option<ServiceMessage>,
    pub event: Option<EventMessage>,
}

const F_SERVICE: u32 = 1;
const F_EVENT: u32 = 2;

impl Wrapper {
    pub fn service(message: ServiceMessage) -> Self {
        Self {
            service: Some(message),
            event: None,
        }
    }

    pub fn event(message: EventMessage) -> Self {
        Self {
            service: None,
            event: Some(message),
        }
    }

    /// Standard alert subscription sent during setup.
    pub fn subscribe_alerts() -> Self {
        Self::event(EventMessage::SubscribeRequest {
            alerts: vec![AlertType::LaunchMonitor],
        })
    }

    pub fn status_request() -> Self {
        Self::service(ServiceMessage::StatusRequest)
    }

    pub fn wake_up_request() -> Self {
        Self::service(ServiceMessage::WakeUpRequest)
    }

    pub fn tilt_request() -> Self {
        Self::service(ServiceMessage::TiltRequest)
    }

    pub fn shot_config_request(config: ShotConfig) -> Self {
        Self::service(ServiceMessage::ShotConfigRequest(config))
    }

    pub fn start_tilt_cal_request() -> Self {
        Self::service(ServiceMessage::StartTiltCalRequest)
    }

    pub fn reset_tilt_cal_request(should_reset: bool) -> Self {
        Self::service(ServiceMessage::ResetTiltCalRequest { should_reset })
    }

    /// Pushed alert details, if this wrapper is an event notification.
    pub fn notification(&self) -> Option<&AlertDetails> {
        match &self.event {
            Some(EventMessage::Notification { details }) => Some(details),
            _ => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        if let Some(service) = &self.service {
            wire::put_message(&mut buf, F_SERVICE, &service.encode());
        }
        if let Some(event) = &self.event {
            wire::put_message(&mut buf, F_EVENT, &event.encode());
        }
        buf
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut wrapper = Wrapper::default();
        let mut reader = wire::Reader::new(body);
        while let Some((field, value)) = reader.next_field()? {
            match field {
                F_SERVICE => wrapper.service = ServiceMessage::decode(value.bytes(field)?)?,
                F_EVENT => wrapper.event = EventMessage::decode(value.bytes(field)?)?,
                _ => {}
            }
        }
        Ok(wrapper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event::{BallMetrics, Metrics};

    #[test]
    fn wrapper_round_trip() {
        for wrapper in [
            Wrapper::status_request(),
            Wrapper::wake_up_request(),
            Wrapper::tilt_request(),
            Wrapper::subscribe_alerts(),
            Wrapper::reset_tilt_cal_request(true),
            Wrapper::shot_config_request(ShotConfig {
                temperature: 60.0,
                humidity: 1.0,
                altitude: 0.0,
                air_density: 1.0,
                tee_range: 7.0 / 3.281,
            }),
        ] {
            let decoded = Wrapper::decode(&wrapper.encode()).unwrap();
            assert_eq!(decoded, wrapper);
        }
    }

    #[test]
    fn notification_accessor() {
        let wrapper = Wrapper::event(EventMessage::Notification {
            details: AlertDetails {
                metrics: Some(Metrics {
                    shot_id: 7,
                    ball_metrics: Some(BallMetrics::default()),
                    club_metrics: None,
                }),
                ..Default::default()
            },
        });
        let details = wrapper.notification().unwrap();
        assert_eq!(details.metrics.unwrap().shot_id, 7);

        assert!(Wrapper::status_request().notification().is_none());
    }

    #[test]
    fn empty_wrapper_decodes() {
        let wrapper = Wrapper::decode(&[]).unwrap();
        assert!(wrapper.service.is_none());
        assert!(wrapper.event.is_none());
    }
}
