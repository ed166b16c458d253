//! Shot telemetry produced by either measurement path.
//!
//! Both the protobuf alert path and the raw notification path reduce to a
//! [`ShotMetrics`] so downstream consumers never care which transport
//! capability the shot arrived over.

use crate::proto::event::{GolfBallType, Metrics, SpinCalculationType};

/// How the spin number was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinCalculation {
    Ratio,
    BallFlight,
    Other,
    Measured,
}

impl From<SpinCalculationType> for SpinCalculation {
    fn from(kind: SpinCalculationType) -> Self {
        match kind {
            SpinCalculationType::Ratio => SpinCalculation::Ratio,
            SpinCalculationType::BallFlight => SpinCalculation::BallFlight,
            SpinCalculationType::Other => SpinCalculation::Other,
            SpinCalculationType::Measured => SpinCalculation::Measured,
        }
    }
}

/// Ball construction, when the device reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BallType {
    Unknown,
    Conventional,
    Marked,
}

impl From<GolfBallType> for BallType {
    fn from(kind: GolfBallType) -> Self {
        match kind {
            GolfBallType::Unknown => BallType::Unknown,
            GolfBallType::Conventional => BallType::Conventional,
            GolfBallType::Marked => BallType::Marked,
        }
    }
}

/// One measured shot. Speeds in m/s, angles in degrees, spin in rpm.
///
/// Sign conventions follow the device: positive launch direction and club
/// path are rightward (for a right-handed golfer), positive attack angle is
/// upward, positive spin axis tilts right (fade spin).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShotMetrics {
    pub shot_id: u32,
    pub ball_speed: f32,
    pub launch_angle: f32,
    pub launch_direction: f32,
    pub spin_axis: f32,
    pub total_spin: u32,
    pub spin_calculation: SpinCalculation,
    pub ball_type: BallType,
    pub club_head_speed: f32,
    pub attack_angle: f32,
    pub club_path: f32,
    pub club_face: f32,
}

impl From<&Metrics> for ShotMetrics {
    fn from(metrics: &Metrics) -> Self {
        let ball = metrics.ball_metrics.unwrap_or_default();
        let club = metrics.club_metrics.unwrap_or_default();
        ShotMetrics {
            shot_id: metrics.shot_id,
            ball_speed: ball.ball_speed,
            launch_angle: ball.launch_angle,
            launch_direction: ball.launch_direction,
            spin_axis: ball.spin_axis,
            total_spin: ball.total_spin,
            spin_calculation: ball.spin_calculation_type.into(),
            ball_type: ball.golf_ball_type.into(),
            club_head_speed: club.club_head_speed,
            attack_angle: club.attack_angle,
            club_path: club.club_angle_path,
            club_face: club.club_angle_face,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::event::BallMetrics;

    #[test]
    fn converts_from_alert_metrics() {
        let metrics = Metrics {
            shot_id: 31,
            ball_metrics: Some(BallMetrics {
                ball_speed: 55.0,
                launch_angle: 12.0,
                launch_direction: -2.0,
                spin_axis: 4.5,
                total_spin: 3100,
                golf_ball_type: GolfBallType::Conventional,
                spin_calculation_type: SpinCalculationType::Measured,
            }),
            club_metrics: None,
        };
        let shot = ShotMetrics::from(&metrics);
        assert_eq!(shot.shot_id, 31);
        assert_eq!(shot.ball_speed, 55.0);
        assert_eq!(shot.spin_calculation, SpinCalculation::Measured);
        assert_eq!(shot.ball_type, BallType::Conventional);
        // Missing club section falls back to zeroed metrics.
        assert_eq!(shot.club_head_speed, 0.0);
    }
}
