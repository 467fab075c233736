//! Temperature and humidity sensor of Sense nodes

use plugwise_core::constants::{
    SENSE_HUMIDITY_MULTIPLIER, SENSE_HUMIDITY_OFFSET, SENSE_NO_READING,
    SENSE_TEMPERATURE_MULTIPLIER,
    SENSE_TEMPERATURE_OFFSET,
};
use plugwise_core::MacAddress;
use plugwise_protocol::{NodeAckCode, Request};

use crate::capability::{Reading, Sensing};
use crate::event::{NodeEvent, Setting};
use crate::outbound::Actions;

const RAW_SCALE: f64 = 65_536.0;

/// Whole degrees Celsius of a raw temperature value
pub fn temperature_from_raw(raw: u16) -> Option<f64> {
    (raw as i64 != SENSE_NO_READING)
        .then(|| {
            (SENSE_TEMPERATURE_MULTIPLIER * (raw as f64 / RAW_SCALE) - SENSE_TEMPERATURE_OFFSET)
                .trunc()
        })
}

/// Whole percent relative humidity of a raw humidity value
pub fn humidity_from_raw(raw: u16) -> Option<f64> {
    (raw as i64 != SENSE_NO_READING)
        .then(|| {
            (SENSE_HUMIDITY_MULTIPLIER * (raw as f64 / RAW_SCALE) - SENSE_HUMIDITY_OFFSET).trunc()
        })
}

/// Climate readings of a Sense node
#[derive(Debug, Clone)]
pub struct Climate {
    mac: MacAddress,
    temperature: Option<f64>,
    humidity: Option<f64>,
    report_interval: Option<u8>,
    pending_interval: Option<u8>,
}

impl Climate {
    pub fn new(mac: MacAddress) -> Self {
        Self {
            mac,
            temperature: None,
            humidity: None,
            report_interval: None,
            pending_interval: None,
        }
    }

    pub fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    pub fn humidity(&self) -> Option<f64> {
        self.humidity
    }

    /// Minutes between reports, once accepted by the node
    pub fn report_interval(&self) -> Option<u8> {
        self.report_interval
    }

    pub fn set_report_interval(&mut self, minutes: u8) -> Request {
        self.pending_interval = Some(minutes);
        Request::SenseReportInterval {
            mac: self.mac,
            interval: minutes,
        }
    }

    pub fn on_report(&mut self, humidity: u16, temperature: u16, actions: &mut Actions) {
        if let Some(celsius) = temperature_from_raw(temperature) {
            if self.temperature != Some(celsius) {
                log::debug!("Temperature of node {} is {}", self.mac, celsius);
                self.temperature = Some(celsius);
                actions.emit(NodeEvent::TemperatureChanged { mac: self.mac, celsius });
            }
        }
        if let Some(percent) = humidity_from_raw(humidity) {
            if self.humidity != Some(percent) {
                log::debug!("Humidity of node {} is {}", self.mac, percent);
                self.humidity = Some(percent);
                actions.emit(NodeEvent::HumidityChanged { mac: self.mac, percent });
            }
        }
    }

    pub fn on_node_ack(&mut self, code: NodeAckCode) -> Option<NodeEvent> {
        let (setting, accepted) = match code {
            NodeAckCode::SenseIntervalAccepted => {
                self.report_interval = self.pending_interval.take().or(self.report_interval);
                (Setting::SenseInterval, true)
            }
            NodeAckCode::SenseIntervalFailed => {
                self.pending_interval = None;
                (Setting::SenseInterval, false)
            }
            NodeAckCode::SenseBoundariesAccepted => (Setting::SenseBoundaries, true),
            NodeAckCode::SenseBoundariesFailed => (Setting::SenseBoundaries, false),
            _ => return None,
        };
        Some(NodeEvent::Configured {
            mac: self.mac,
            setting,
            accepted,
        })
    }
}

impl Sensing for Climate {
    fn readings(&self) -> Vec<Reading> {
        self.temperature
            .map(Reading::Temperature)
            .into_iter()
            .chain(self.humidity.map(Reading::Humidity))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> MacAddress {
        "000D6F0000468F71".parse().unwrap()
    }

    #[test]
    fn test_conversion() {
        // 175.72 * 0.5 - 46.85 = 41.01
        assert_eq!(temperature_from_raw(32_768), Some(41.0));
        // 125 * 0.5 - 6 = 56.5
        assert_eq!(humidity_from_raw(32_768), Some(56.0));
        assert_eq!(temperature_from_raw(65_535), None);
        assert_eq!(humidity_from_raw(65_535), None);
    }

    #[test]
    fn test_report_emits_changes_only() {
        let mut climate = Climate::new(mac());
        let mut actions = Actions::new();
        climate.on_report(32_768, 32_768, &mut actions);
        assert_eq!(actions.events.len(), 2);
        let mut again = Actions::new();
        climate.on_report(32_768, 65_535, &mut again);
        assert!(again.events.is_empty());
        assert_eq!(climate.readings(), vec![Reading::Temperature(41.0), Reading::Humidity(56.0)]);
    }

    #[test]
    fn test_report_interval() {
        let mut climate = Climate::new(mac());
        let request = climate.set_report_interval(15);
        assert_eq!(request, Request::SenseReportInterval { mac: mac(), interval: 15 });
        assert_eq!(climate.report_interval(), None);
        climate.on_node_ack(NodeAckCode::SenseIntervalAccepted);
        assert_eq!(climate.report_interval(), Some(15));
    }
}
