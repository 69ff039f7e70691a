//! Numeric codings shared by both register dialects.

/// Decode a temperature word: signed fixed point, 1/256 °C per LSB.
pub fn decode_temp(raw: u16) -> f32 {
    raw as i16 as f32 / 256.0
}

/// A temperature slot counts as connected only while it reads above zero.
/// Zero and negative values mean an open thermistor input.
pub fn temp_present(value: f32) -> bool {
    value > 0.0
}

/// Encode a duty percentage into the PWM register byte.
pub fn encode_pwm(percent: f32) -> u8 {
    (percent * 2.55).round().clamp(0.0, 255.0) as u8
}

/// Decode a PWM register byte into a duty percentage.
pub fn decode_pwm(raw: u8) -> f32 {
    raw as f32 / 2.55
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_temp() {
        assert_eq!(decode_temp(2560), 10.0);
        assert_eq!(decode_temp(0x1A80), 26.5);
        // 0xFF00 reinterprets as -256, i.e. -1.0 C.
        assert_eq!(decode_temp(0xFF00), -1.0);
    }

    #[test]
    fn test_temp_present() {
        assert!(temp_present(10.0));
        assert!(temp_present(0.004));
        assert!(!temp_present(0.0));
        assert!(!temp_present(-1.0));
    }

    #[test]
    fn test_encode_pwm() {
        assert_eq!(encode_pwm(50.0), 128);
        assert_eq!(encode_pwm(0.0), 0);
        assert_eq!(encode_pwm(100.0), 255);
        // Out-of-range input saturates rather than wrapping.
        assert_eq!(encode_pwm(120.0), 255);
    }

    #[test]
    fn test_decode_pwm() {
        assert!((decode_pwm(128) - 50.196).abs() < 0.001);
        assert_eq!(decode_pwm(0), 0.0);
        assert_eq!(decode_pwm(255), 100.0);
    }
}
