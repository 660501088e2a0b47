//! Mount-frame degrees <-> controller encoder units.
//!
//! The controller counts tenths of a degree from its own zero, which sits at
//! mount azimuth 180°. Mount 180° is encoder 0, mount 0° is encoder 1800.

/// Largest encoder value the controller accepts.
pub const DEVICE_MAX: u16 = 3599;

/// Absorbs binary representation error before truncating (e.g. 18.9 * 10).
const TRUNCATION_EPSILON: f64 = 1e-6;

/// Convert a mount azimuth in degrees to encoder units.
///
/// Fractions of a tenth are truncated; the result is clamped to
/// `0..=DEVICE_MAX`.
pub fn to_device(mount: f64) -> u16 {
    let mut device = mount * 10.0 - 1800.0;
    if (0.0..=179.9).contains(&mount) {
        device += 3600.0;
    }
    let device = (device + TRUNCATION_EPSILON).trunc();
    device.clamp(0.0, f64::from(DEVICE_MAX)) as u16
}

/// Convert encoder units to a mount azimuth in degrees.
pub fn to_mount(device: u16) -> f64 {
    let mut mount = (f64::from(device) + 1800.0) / 10.0;
    if device >= 1800 {
        mount -= 360.0;
    }
    if mount > 360.0 {
        mount -= 360.0;
    }
    if mount < 0.0 {
        mount += 360.0;
    }
    mount
}

/// Wrap any angle into `[0, 360)`.
pub fn wrap_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Absolute angular distance, ignoring wrap.
///
/// Arrival detection compares positions the same way the controller reports
/// them, so a target of 359.5 and a reading of 0.2 are not considered close.
pub fn separation(a: f64, b: f64) -> f64 {
    (a - b).abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_known_round_trips() {
        let cases = [(0.0, 1800), (180.0, 0), (200.0, 200), (359.0, 1790)];
        for (mount, device) in cases {
            assert_eq!(to_device(mount), device, "to_device({mount})");
            assert_relative_eq!(to_mount(device), mount);
            assert_relative_eq!(to_mount(to_device(mount)), mount);
        }
    }

    #[test]
    fn test_to_device_clamped_over_full_circle() {
        let mut mount = 0.0;
        while mount < 360.0 {
            let device = to_device(mount);
            assert!(device <= DEVICE_MAX, "to_device({mount}) = {device}");
            mount += 0.05;
        }
    }

    #[test]
    fn test_to_device_truncates_tenths() {
        assert_eq!(to_device(189.0), 90);
        assert_eq!(to_device(189.07), 90);
        assert_eq!(to_device(18.9), 1989);
    }

    #[test]
    fn test_band_between_179_9_and_180() {
        // 179.95 falls outside the +3600 band and clamps at zero.
        assert_eq!(to_device(179.95), 0);
        assert_eq!(to_device(179.9), 3599);
    }

    #[test]
    fn test_to_mount_range() {
        for device in 0..=DEVICE_MAX {
            let mount = to_mount(device);
            assert!((0.0..=360.0).contains(&mount), "to_mount({device}) = {mount}");
        }
        assert_relative_eq!(to_mount(3599), 179.9, epsilon = 1e-9);
        assert_relative_eq!(to_mount(1799), 359.9, epsilon = 1e-9);
    }

    #[test]
    fn test_wrap_degrees() {
        assert_relative_eq!(wrap_degrees(370.0), 10.0);
        assert_relative_eq!(wrap_degrees(-1.0), 359.0);
        assert_relative_eq!(wrap_degrees(360.0), 0.0);
        assert_relative_eq!(wrap_degrees(0.0), 0.0);
        assert!(wrap_degrees(-1e-20) < 360.0);
    }
}
