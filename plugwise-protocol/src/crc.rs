//! CRC-16/XMODEM checksum of stick frames

/// CRC polynomial x^16 + x^12 + x^5 + 1
const POLYNOMIAL: u16 = 0x1021;
const INITIAL_CRC: u16 = 0x0000;

/// Precomputed CRC table
static CRC_TABLE: once_cell::sync::Lazy<[u16; 256]> = once_cell::sync::Lazy::new(|| {
    let mut table = [0u16; 256];
    for b in 0..=0xFFu16 {
        let mut v = b << 8;
        for _ in 0..8 {
            if (v & 0x8000) != 0 {
                v = (v << 1) ^ POLYNOMIAL;
            } else {
                v <<= 1;
            }
        }
        table[b as usize] = v;
    }
    table
});

/// Checksum calculator
#[derive(Debug, Clone)]
pub struct CrcCalc {
    crc_value: u16,
}

impl CrcCalc {
    /// Create a new CRC calculator
    pub fn new() -> Self {
        Self {
            crc_value: INITIAL_CRC,
        }
    }

    /// Reset the CRC value to initial state
    pub fn reset(&mut self) {
        self.crc_value = INITIAL_CRC;
    }

    /// Update the CRC value with a single byte
    pub fn update(&mut self, data: u8) {
        let index = ((self.crc_value >> 8) ^ data as u16) & 0xFF;
        self.crc_value = (self.crc_value << 8) ^ CRC_TABLE[index as usize];
    }

    /// Update the CRC value with multiple bytes
    pub fn update_bytes(&mut self, data: &[u8]) {
        for &byte in data {
            self.update(byte);
        }
    }

    /// Get the current CRC value
    pub fn value(&self) -> u16 {
        self.crc_value
    }

    /// Get the CRC as it travels on the wire: four uppercase hex digits
    pub fn value_ascii(&self) -> [u8; 4] {
        let mut out = [0u8; 4];
        out.copy_from_slice(format!("{:04X}", self.crc_value).as_bytes());
        out
    }
}

impl Default for CrcCalc {
    fn default() -> Self {
        Self::new()
    }
}

/// Checksum of a frame body in wire form
pub fn checksum(data: &[u8]) -> [u8; 4] {
    let mut calc = CrcCalc::new();
    calc.update_bytes(data);
    calc.value_ascii()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_check_value() {
        let mut calc = CrcCalc::new();
        calc.update_bytes(b"123456789");
        assert_eq!(calc.value(), 0x31C3);
        assert_eq!(&calc.value_ascii(), b"31C3");
    }

    #[test]
    fn test_crc_reset() {
        let mut calc = CrcCalc::new();
        calc.update(0x01);
        calc.reset();
        assert_eq!(calc.value(), INITIAL_CRC);
    }

    #[test]
    fn test_checksum_is_zero_padded() {
        assert_eq!(&checksum(b""), b"0000");
    }
}
