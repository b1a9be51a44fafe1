//! Saturating-linear range mapping and TMAP sensor conversions.

/// Position of `raw` within `[min, max]` as a percentage, saturating at the
/// boundaries. This is the one mapping primitive used for valve open
/// percentage and sensor-voltage style conversions alike.
pub fn percent_in_range(raw: f32, min: f32, max: f32) -> f32 {
    if max <= min {
        return 0.0;
    }
    if raw <= min {
        0.0
    } else if raw >= max {
        100.0
    } else {
        (raw - min) / (max - min) * 100.0
    }
}

/// ADC full-scale count for the 10-bit, 5 V analog front end.
pub const ADC_FULL_SCALE: f32 = 1023.0;
const SENSOR_SUPPLY_VOLTAGE: f32 = 5.0;

// Bosch 3-bar TMAP datasheet transfer-function constants.
const BOSCH_C1: f32 = 5.4 / 280.0;
const BOSCH_C2: f32 = 0.85 / 280.0;

// Datasheet temperature span of the TMAP's NTC element.
const TMAP_TEMP_MIN_C: f32 = -40.0;
const TMAP_TEMP_MAX_C: f32 = 130.0;

/// Absolute pressure (kPa) from a raw TMAP pressure reading.
pub fn kpa_from_raw(raw: f32) -> f32 {
    let volts = raw / ADC_FULL_SCALE * SENSOR_SUPPLY_VOLTAGE;
    (volts - BOSCH_C1 * SENSOR_SUPPLY_VOLTAGE) / (BOSCH_C2 * SENSOR_SUPPLY_VOLTAGE)
}

/// Gauge pressure (kPa) relative to the atmospheric reading captured at
/// boot, before the engine starts. Zero at atmosphere by construction.
pub fn gauge_kpa_from_raw(raw: f32, atmospheric_offset_raw: f32) -> f32 {
    let delta_volts = (raw - atmospheric_offset_raw) / ADC_FULL_SCALE * SENSOR_SUPPLY_VOLTAGE;
    delta_volts / (BOSCH_C2 * SENSOR_SUPPLY_VOLTAGE)
}

pub fn psi_from_kpa(kpa: f32) -> f32 {
    kpa * 0.145038
}

/// TMAP temperature reading mapped over the sensor's datasheet span.
pub fn celsius_from_raw(raw: u16) -> i32 {
    let pct = percent_in_range(f32::from(raw), 0.0, ADC_FULL_SCALE);
    (TMAP_TEMP_MIN_C + pct / 100.0 * (TMAP_TEMP_MAX_C - TMAP_TEMP_MIN_C)).round() as i32
}
