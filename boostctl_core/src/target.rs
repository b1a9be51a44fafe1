//! Boost target lookup from vehicle state.

use boostctl_config::BoostCfg;

use crate::link::VehicleState;

/// Gear-indexed boost targets with the hold-off conditions under which no
/// boost is ever requested.
#[derive(Debug, Clone)]
pub struct BoostTargets {
    gear_kpa: Vec<(i32, f32)>,
    min_speed_kph: f32,
    min_rpm: i32,
}

impl BoostTargets {
    pub fn from_cfg(cfg: &BoostCfg) -> Self {
        Self {
            gear_kpa: cfg.gear_table.clone(),
            min_speed_kph: cfg.min_speed_kph,
            min_rpm: cfg.min_rpm,
        }
    }

    /// Desired boost in kPa gauge. Zero whenever the vehicle is stationary,
    /// out of gear, clutch-in or below the rpm floor; otherwise the gear
    /// table entry (unknown gears get no boost).
    pub fn target_kpa(&self, vehicle: &VehicleState) -> f32 {
        if vehicle.speed_kph <= self.min_speed_kph
            || vehicle.gear == 0
            || vehicle.clutch_pressed
            || vehicle.rpm < self.min_rpm
        {
            return 0.0;
        }
        self.gear_kpa
            .iter()
            .find(|(gear, _)| *gear == vehicle.gear)
            .map_or(0.0, |(_, kpa)| *kpa)
    }
}
