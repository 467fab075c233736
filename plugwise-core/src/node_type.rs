//! Node type codes and hardware model lookup

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Device type reported in the node info response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Stick,
    CirclePlus,
    Circle,
    Switch,
    Sense,
    Scan,
    CelsiusSed,
    CelsiusNr,
    Stealth,
    Unknown(u8),
}

impl NodeType {
    /// Map the raw type code
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => NodeType::Stick,
            1 => NodeType::CirclePlus,
            2 => NodeType::Circle,
            3 => NodeType::Switch,
            5 => NodeType::Sense,
            6 => NodeType::Scan,
            7 => NodeType::CelsiusSed,
            8 => NodeType::CelsiusNr,
            9 => NodeType::Stealth,
            other => NodeType::Unknown(other),
        }
    }

    /// Raw type code
    pub fn code(&self) -> u8 {
        match self {
            NodeType::Stick => 0,
            NodeType::CirclePlus => 1,
            NodeType::Circle => 2,
            NodeType::Switch => 3,
            NodeType::Sense => 5,
            NodeType::Scan => 6,
            NodeType::CelsiusSed => 7,
            NodeType::CelsiusNr => 8,
            NodeType::Stealth => 9,
            NodeType::Unknown(code) => *code,
        }
    }

    /// Battery powered devices that are only reachable during wake windows
    pub fn is_sleeping(&self) -> bool {
        matches!(
            self,
            NodeType::Switch | NodeType::Sense | NodeType::Scan | NodeType::CelsiusSed
        )
    }

    /// Devices with a relay and a power meter
    pub fn measures_power(&self) -> bool {
        matches!(
            self,
            NodeType::CirclePlus | NodeType::Circle | NodeType::Stealth
        )
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Stick => write!(f, "Stick"),
            NodeType::CirclePlus => write!(f, "Circle+"),
            NodeType::Circle => write!(f, "Circle"),
            NodeType::Switch => write!(f, "Switch"),
            NodeType::Sense => write!(f, "Sense"),
            NodeType::Scan => write!(f, "Scan"),
            NodeType::CelsiusSed => write!(f, "Celsius (SED)"),
            NodeType::CelsiusNr => write!(f, "Celsius (NR)"),
            NodeType::Stealth => write!(f, "Stealth"),
            NodeType::Unknown(code) => write!(f, "Unknown ({})", code),
        }
    }
}

static HW_MODELS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("038500", "Stick"),
        ("070085", "Stick"),
        ("120002", "Stick Legrand"),
        ("120041", "Circle+ Legrand type E"),
        ("120000", "Circle+ Legrand type F"),
        ("090000", "Circle+ type B"),
        ("090007", "Circle+ type B"),
        ("090088", "Circle+ type E"),
        ("070073", "Circle+ type F"),
        ("090048", "Circle+ type G"),
        ("120049", "Stealth M+"),
        ("090188", "Stealth+"),
        ("120040", "Circle Legrand type E"),
        ("120001", "Circle Legrand type F"),
        ("090079", "Circle type B"),
        ("090087", "Circle type E"),
        ("070140", "Circle type F"),
        ("090093", "Circle type G"),
        ("100025", "Circle"),
        ("120048", "Stealth M"),
        ("120029", "Stealth Legrand"),
        ("090011", "Stealth"),
        ("001200", "Stealth"),
        ("080007", "Scan"),
        ("110028", "Scan Legrand"),
        ("070030", "Sense"),
        ("120006", "Sense Legrand"),
        ("070051", "Switch"),
        ("080029", "Switch"),
    ])
});

/// Translate a hardware version string into a model name
///
/// Tries the full string, then the six model digits at offset 4, then the last six
/// digits in reversed byte order.
pub fn hardware_model(version: &str) -> &'static str {
    if let Some(model) = HW_MODELS.get(version) {
        return model;
    }
    if let Some(model) = version.get(4..10).and_then(|key| HW_MODELS.get(key)) {
        return model;
    }
    let len = version.len();
    if len >= 6 && version.is_ascii() {
        let reversed = format!(
            "{}{}{}",
            &version[len - 2..],
            &version[len - 4..len - 2],
            &version[len - 6..len - 4]
        );
        if let Some(model) = HW_MODELS.get(reversed.as_str()) {
            return model;
        }
    }
    "Unknown"
}
