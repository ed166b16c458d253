//! Simulator-facing boundary.
//!
//! The downstream consumer (a JSON/TCP simulator client, out of scope
//! here) is modeled as a [`SimulatorSink`] with exactly two operations.
//! Conversions from [`ShotMetrics`] match simulator conventions: imperial
//! speeds, spin axis sign flipped, and total spin decomposed into side and
//! back components.

use crate::shot::ShotMetrics;

const MS_TO_MPH: f32 = 2.2369;
const FEET_TO_METERS: f32 = 1.0 / 3.281;

/// Ball launch data in simulator units (mph, degrees, rpm).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BallData {
    pub speed: f32,
    /// Horizontal launch angle.
    pub hla: f32,
    /// Vertical launch angle.
    pub vla: f32,
    pub spin_axis: f32,
    pub total_spin: f32,
    pub side_spin: f32,
    pub back_spin: f32,
}

impl From<&ShotMetrics> for BallData {
    fn from(shot: &ShotMetrics) -> Self {
        // The simulator's spin axis convention is mirrored relative to
        // the device's.
        let axis = -shot.spin_axis;
        let total_spin = shot.total_spin as f32;
        BallData {
            speed: shot.ball_speed * MS_TO_MPH,
            hla: shot.launch_direction,
            vla: shot.launch_angle,
            spin_axis: axis,
            total_spin,
            side_spin: total_spin * axis.to_radians().sin(),
            back_spin: total_spin * axis.to_radians().cos(),
        }
    }
}

/// Club delivery data in simulator units (mph, degrees).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClubData {
    pub speed: f32,
    pub speed_at_impact: f32,
    pub angle_of_attack: f32,
    pub face_to_target: f32,
    pub path: f32,
}

impl From<&ShotMetrics> for ClubData {
    fn from(shot: &ShotMetrics) -> Self {
        let speed = shot.club_head_speed * MS_TO_MPH;
        ClubData {
            speed,
            speed_at_impact: speed,
            angle_of_attack: shot.attack_angle,
            face_to_target: shot.club_face,
            path: shot.club_path,
        }
    }
}

/// The two operations the simulator client exposes to this engine.
pub trait SimulatorSink: Send + Sync {
    fn send_shot(&self, ball: BallData, club: ClubData);
    fn set_device_ready(&self, ready: bool);
}

/// Tee distance as configured (feet) to the device's shot-config unit
/// (meters).
pub fn tee_range_from_feet(feet: f32) -> f32 {
    feet * FEET_TO_METERS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shot::{BallType, SpinCalculation};

    fn shot() -> ShotMetrics {
        ShotMetrics {
            shot_id: 1,
            ball_speed: 60.0,
            launch_angle: 14.0,
            launch_direction: -1.5,
            spin_axis: 8.0,
            total_spin: 3000,
            spin_calculation: SpinCalculation::Measured,
            ball_type: BallType::Unknown,
            club_head_speed: 45.0,
            attack_angle: -3.0,
            club_path: 2.0,
            club_face: 0.5,
        }
    }

    #[test]
    fn ball_conversion_flips_spin_axis_and_decomposes_spin() {
        let ball = BallData::from(&shot());
        assert!((ball.speed - 60.0 * MS_TO_MPH).abs() < 1e-3);
        assert_eq!(ball.hla, -1.5);
        assert_eq!(ball.vla, 14.0);
        assert_eq!(ball.spin_axis, -8.0);

        // Negative axis tilts spin leftward: negative side spin, back
        // spin close to total.
        assert!(ball.side_spin < 0.0);
        assert!((ball.side_spin - 3000.0 * (-8.0f32).to_radians().sin()).abs() < 1e-2);
        assert!((ball.back_spin - 3000.0 * (-8.0f32).to_radians().cos()).abs() < 1e-2);
    }

    #[test]
    fn club_conversion_uses_imperial_speed() {
        let club = ClubData::from(&shot());
        assert!((club.speed - 45.0 * MS_TO_MPH).abs() < 1e-3);
        assert_eq!(club.speed, club.speed_at_impact);
        assert_eq!(club.angle_of_attack, -3.0);
        assert_eq!(club.path, 2.0);
        assert_eq!(club.face_to_target, 0.5);
    }

    #[test]
    fn tee_range_conversion() {
        assert!((tee_range_from_feet(7.0) - 2.1335).abs() < 1e-3);
        assert_eq!(tee_range_from_feet(0.0), 0.0);
    }
}
