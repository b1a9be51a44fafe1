//! Fault detection and the latching critical alarm.
//!
//! Three independent detectors feed one latching flag: comms silence,
//! sustained overboost and degraded link quality. The alarm is one-way; the
//! only recovery is a full restart. While critical, the control engine
//! commands motor speed zero and the return spring fails the valve open.

use boostctl_config::FaultCfg;

use crate::link::LinkCounters;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmReason {
    /// No valid status push from the master within the timeout.
    CommsLost,
    /// Manifold pressure above target allowance for a contiguous window.
    Overboost,
    /// Lifetime partial/bad-checksum/corrupt rates exceed thresholds.
    LinkQuality,
}

impl std::fmt::Display for AlarmReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CommsLost => write!(f, "comms lost"),
            Self::Overboost => write!(f, "overboost"),
            Self::LinkQuality => write!(f, "link quality"),
        }
    }
}

/// One-way alarm state. There is deliberately no transition back from
/// `Critical`; clearing requires a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alarm {
    Nominal,
    Critical(AlarmReason),
}

impl Alarm {
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Critical(_))
    }
}

/// Watches pressure and the link, and latches the critical alarm.
#[derive(Debug)]
pub struct FaultMonitor {
    cfg: FaultCfg,
    alarm: Alarm,
    in_overboost: bool,
    overboost_since_ms: u64,
    last_good_comms_ms: u64,
}

impl FaultMonitor {
    pub fn new(cfg: FaultCfg) -> Self {
        Self {
            cfg,
            alarm: Alarm::Nominal,
            in_overboost: false,
            overboost_since_ms: 0,
            last_good_comms_ms: 0,
        }
    }

    pub fn alarm(&self) -> Alarm {
        self.alarm
    }

    pub fn is_critical(&self) -> bool {
        self.alarm.is_critical()
    }

    /// A command-1 push decoded successfully; the master is alive.
    pub fn record_good_comms(&mut self, now_ms: u64) {
        self.last_good_comms_ms = now_ms;
    }

    pub fn last_good_comms_ms(&self) -> u64 {
        self.last_good_comms_ms
    }

    /// Periodic detector pass: comms staleness and the contiguous overboost
    /// window. `now_ms` is milliseconds since boot.
    pub fn check(&mut self, now_ms: u64, current_kpa: f32, target_kpa: f32) {
        let past_grace = now_ms > self.cfg.boot_grace_ms;

        if past_grace
            && now_ms.saturating_sub(self.last_good_comms_ms) > self.cfg.comms_timeout_ms
        {
            self.trip(AlarmReason::CommsLost);
        }

        if current_kpa > target_kpa * self.cfg.overboost_allowance {
            if !self.in_overboost {
                self.in_overboost = true;
                self.overboost_since_ms = now_ms;
            }
            // The window must be contiguous; it keeps accruing during boot
            // grace but may only trip once grace has expired.
            if past_grace
                && now_ms.saturating_sub(self.overboost_since_ms) > self.cfg.overboost_allowance_ms
            {
                self.trip(AlarmReason::Overboost);
            }
        } else {
            // Any compliant sample resets the window.
            self.in_overboost = false;
        }
    }

    /// Periodic statistical pass over the lifetime link counters.
    pub fn check_link_quality(&mut self, counters: &LinkCounters) {
        if counters.received == 0 {
            return;
        }
        let partial = counters.partial_rate_pct();
        let bad_checksum = counters.bad_checksum_rate_pct();
        let corrupt = counters.corrupt_rate_pct();
        if partial > self.cfg.partial_pct_max
            || bad_checksum > self.cfg.bad_checksum_pct_max
            || corrupt > self.cfg.corrupt_pct_max
        {
            tracing::warn!(partial, bad_checksum, corrupt, "link quality degraded");
            self.trip(AlarmReason::LinkQuality);
        }
    }

    fn trip(&mut self, reason: AlarmReason) {
        if self.alarm.is_critical() {
            return;
        }
        tracing::error!(%reason, "latching critical alarm; motor held at zero until restart");
        self.alarm = Alarm::Critical(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> FaultCfg {
        FaultCfg {
            boot_grace_ms: 1_000,
            comms_timeout_ms: 1_000,
            overboost_allowance: 1.1,
            overboost_allowance_ms: 550,
            partial_pct_max: 20.0,
            bad_checksum_pct_max: 5.0,
            corrupt_pct_max: 10.0,
        }
    }

    #[test]
    fn comms_silence_trips_after_grace() {
        let mut m = FaultMonitor::new(cfg());
        // Inside grace: silent but not yet a fault.
        m.check(900, 0.0, 0.0);
        assert_eq!(m.alarm(), Alarm::Nominal);
        // Past grace and past the timeout since boot: trip.
        m.check(2_100, 0.0, 0.0);
        assert_eq!(m.alarm(), Alarm::Critical(AlarmReason::CommsLost));
    }

    #[test]
    fn fresh_comms_keeps_alarm_nominal() {
        let mut m = FaultMonitor::new(cfg());
        for t in (0..10_000).step_by(200) {
            m.record_good_comms(t);
            m.check(t, 0.0, 0.0);
        }
        assert_eq!(m.alarm(), Alarm::Nominal);
    }

    #[test]
    fn overboost_window_must_be_contiguous() {
        let mut m = FaultMonitor::new(cfg());
        m.record_good_comms(5_000);
        // Threshold is 550ms; samples every 300ms. Two overboost samples
        // (span 300ms), one compliant sample, two more overboost samples:
        // must NOT trip, because the compliant sample reset the window.
        let target = 100.0;
        let over = 120.0; // > 100 * 1.1
        let ok = 90.0;
        for (t, p) in [(5_000, over), (5_300, over), (5_600, ok), (5_900, over), (6_200, over)] {
            m.record_good_comms(t);
            m.check(t, p, target);
        }
        assert_eq!(m.alarm(), Alarm::Nominal);
        // One more contiguous overboost sample pushes the window past the
        // threshold and trips.
        m.record_good_comms(6_500);
        m.check(6_500, over, target);
        assert_eq!(m.alarm(), Alarm::Critical(AlarmReason::Overboost));
    }

    #[test]
    fn momentary_overboost_below_threshold_is_ignored() {
        let mut m = FaultMonitor::new(cfg());
        m.record_good_comms(5_000);
        m.check(5_000, 200.0, 100.0);
        m.record_good_comms(5_400);
        m.check(5_400, 90.0, 100.0);
        assert_eq!(m.alarm(), Alarm::Nominal);
    }

    #[test]
    fn overboost_spanning_grace_trips_when_grace_expires() {
        let mut m = FaultMonitor::new(cfg());
        m.record_good_comms(400);
        m.check(400, 200.0, 100.0); // window opens during grace
        m.record_good_comms(1_200);
        m.check(1_200, 200.0, 100.0); // 800ms contiguous, grace expired
        assert_eq!(m.alarm(), Alarm::Critical(AlarmReason::Overboost));
    }

    #[test]
    fn alarm_never_clears() {
        let mut m = FaultMonitor::new(cfg());
        m.check(5_000, 0.0, 0.0); // comms silent
        assert!(m.is_critical());
        // Comms resume, pressure nominal: alarm stays latched.
        m.record_good_comms(5_100);
        m.check(5_200, 0.0, 100.0);
        assert_eq!(m.alarm(), Alarm::Critical(AlarmReason::CommsLost));
    }

    #[test]
    fn link_quality_trips_on_bad_checksum_rate() {
        let mut m = FaultMonitor::new(cfg());
        let counters = LinkCounters {
            received: 100,
            partial: 0,
            bad_checksum: 6,
            corrupt: 0,
        };
        m.check_link_quality(&counters);
        assert_eq!(m.alarm(), Alarm::Critical(AlarmReason::LinkQuality));
    }

    #[test]
    fn link_quality_silent_before_any_traffic() {
        let mut m = FaultMonitor::new(cfg());
        m.check_link_quality(&LinkCounters::default());
        assert_eq!(m.alarm(), Alarm::Nominal);
    }

    #[test]
    fn link_quality_under_thresholds_is_fine() {
        let mut m = FaultMonitor::new(cfg());
        let counters = LinkCounters {
            received: 100,
            partial: 20,
            bad_checksum: 5,
            corrupt: 10,
        };
        // Thresholds are strict "greater than".
        m.check_link_quality(&counters);
        assert_eq!(m.alarm(), Alarm::Nominal);
    }
}
