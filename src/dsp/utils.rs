/// Additive guard for magnitude ratios.
pub const MAG_EPS: f32 = 1e-9;

pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t.clamp(0.0, 1.0)
}

/// Fractional bin index of `hz` for a transform of `frame_len` points.
#[inline]
pub fn hz_to_bin(hz: f32, frame_len: usize, sample_rate: f32) -> f32 {
    hz * frame_len as f32 / sample_rate.max(1.0)
}

#[inline]
pub fn bin_to_hz(bin: usize, frame_len: usize, sample_rate: f32) -> f32 {
    bin as f32 * sample_rate / frame_len as f32
}

#[inline]
pub fn in_band(freq: f32, low: f32, high: f32) -> bool {
    freq > low && freq < high
}

pub fn peak_abs(x: &[f32]) -> f32 {
    x.iter().fold(0.0f32, |m, &v| m.max(v.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_mapping_round_trip() {
        let bin = hz_to_bin(150.0, 2048, 44100.0);
        assert!((bin - 6.9659).abs() < 1e-3);
        let hz = bin_to_hz(7, 2048, 44100.0);
        assert!((hz - 150.73).abs() < 0.01);
    }

    #[test]
    fn test_lerp_clamps_t() {
        assert_eq!(lerp(0.5, 1.0, 2.0), 1.0);
        assert_eq!(lerp(0.5, 1.0, -1.0), 0.5);
    }

    #[test]
    fn test_levels() {
        let x = [0.5, -1.0, 0.25];
        assert_eq!(peak_abs(&x), 1.0);
        assert_eq!(peak_abs(&[]), 0.0);
    }
}
