//! Motion sensor of Scan nodes

use plugwise_core::constants::{SCAN_DAYLIGHT_MODE, SCAN_MOTION_RESET_TIMER};
use plugwise_core::MacAddress;
use plugwise_protocol::{NodeAckCode, Request};
use serde::Deserialize;

use crate::capability::{Reading, Sensing};
use crate::error::{StickError, StickResult};
use crate::event::{NodeEvent, Setting};

/// Largest motion reset timer in minutes
const MAX_RESET_TIMER: u8 = 240;

/// Motion detection sensitivity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    High,
    #[default]
    Medium,
    Off,
}

impl Sensitivity {
    pub fn code(&self) -> u8 {
        match self {
            Sensitivity::High => 0x14,
            Sensitivity::Medium => 0x1E,
            Sensitivity::Off => 0xFF,
        }
    }
}

/// Motion detection settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Minutes without motion before motion is cleared
    pub reset_timer: u8,
    pub sensitivity: Sensitivity,
    /// Detect motion in daylight as well
    pub daylight_mode: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            reset_timer: SCAN_MOTION_RESET_TIMER,
            sensitivity: Sensitivity::default(),
            daylight_mode: SCAN_DAYLIGHT_MODE,
        }
    }
}

/// Motion state and configuration of a Scan node
#[derive(Debug, Clone)]
pub struct Motion {
    mac: MacAddress,
    motion: Option<bool>,
    config: Option<ScanConfig>,
    pending: Option<ScanConfig>,
}

impl Motion {
    pub fn new(mac: MacAddress) -> Self {
        Self {
            mac,
            motion: None,
            config: None,
            pending: None,
        }
    }

    pub fn motion(&self) -> Option<bool> {
        self.motion
    }

    /// Settings the node last accepted
    pub fn config(&self) -> Option<ScanConfig> {
        self.config
    }

    /// Build the configuration request; it applies once the node accepts it
    ///
    /// # Errors
    ///
    /// `StickError::InvalidData` for a reset timer outside 1..=240 minutes
    pub fn configure(&mut self, config: ScanConfig) -> StickResult<Request> {
        if !(1..=MAX_RESET_TIMER).contains(&config.reset_timer) {
            return Err(StickError::InvalidData(format!(
                "motion reset timer {} outside 1..={} minutes",
                config.reset_timer, MAX_RESET_TIMER
            )));
        }
        self.pending = Some(config);
        Ok(Request::ScanConfigure {
            mac: self.mac,
            sensitivity: config.sensitivity.code(),
            daylight_mode: config.daylight_mode,
            reset_timer: config.reset_timer,
        })
    }

    pub fn light_calibration(&self) -> Request {
        Request::ScanLightCalibrate { mac: self.mac }
    }

    /// Switch group state 1 reports motion, 0 its end
    pub fn on_switch_group(&mut self, power_state: bool) -> Option<NodeEvent> {
        if self.motion == Some(power_state) {
            return None;
        }
        self.motion = Some(power_state);
        Some(NodeEvent::MotionChanged {
            mac: self.mac,
            motion: power_state,
        })
    }

    pub fn on_node_ack(&mut self, code: NodeAckCode) -> Option<NodeEvent> {
        let (setting, accepted) = match code {
            NodeAckCode::ScanConfigAccepted => {
                self.config = self.pending.take().or(self.config);
                (Setting::ScanConfig, true)
            }
            NodeAckCode::ScanConfigFailed => {
                self.pending = None;
                (Setting::ScanConfig, false)
            }
            NodeAckCode::LightCalibrationAccepted => (Setting::LightCalibration, true),
            _ => return None,
        };
        log::info!(
            "Scan {} {} {}",
            self.mac,
            if accepted { "accepted" } else { "refused" },
            setting
        );
        Some(NodeEvent::Configured {
            mac: self.mac,
            setting,
            accepted,
        })
    }
}

impl Sensing for Motion {
    fn readings(&self) -> Vec<Reading> {
        self.motion.map(Reading::Motion).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> MacAddress {
        "000D6F0000468F71".parse().unwrap()
    }

    #[test]
    fn test_motion_changes_once() {
        let mut motion = Motion::new(mac());
        assert!(motion.readings().is_empty());
        assert_eq!(
            motion.on_switch_group(true),
            Some(NodeEvent::MotionChanged { mac: mac(), motion: true })
        );
        assert_eq!(motion.on_switch_group(true), None);
        assert!(motion.on_switch_group(false).is_some());
        assert_eq!(motion.readings(), vec![Reading::Motion(false)]);
    }

    #[test]
    fn test_configure_applies_on_accept() {
        let mut motion = Motion::new(mac());
        let config = ScanConfig {
            reset_timer: 10,
            sensitivity: Sensitivity::High,
            daylight_mode: true,
        };
        let request = motion.configure(config).unwrap();
        assert_eq!(
            request,
            Request::ScanConfigure {
                mac: mac(),
                sensitivity: 0x14,
                daylight_mode: true,
                reset_timer: 10,
            }
        );
        assert_eq!(motion.config(), None);
        motion.on_node_ack(NodeAckCode::ScanConfigAccepted);
        assert_eq!(motion.config(), Some(config));
    }

    #[test]
    fn test_configure_refused() {
        let mut motion = Motion::new(mac());
        motion.configure(ScanConfig::default()).unwrap();
        let event = motion.on_node_ack(NodeAckCode::ScanConfigFailed);
        assert_eq!(
            event,
            Some(NodeEvent::Configured {
                mac: mac(),
                setting: Setting::ScanConfig,
                accepted: false,
            })
        );
        assert_eq!(motion.config(), None);
        assert!(motion
            .configure(ScanConfig {
                reset_timer: 0,
                ..ScanConfig::default()
            })
            .is_err());
    }

    #[test]
    fn test_sensitivity_codes() {
        assert_eq!(Sensitivity::High.code(), 20);
        assert_eq!(Sensitivity::Medium.code(), 30);
        assert_eq!(Sensitivity::Off.code(), 255);
    }
}
