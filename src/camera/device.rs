use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn fits_within(&self, max: Resolution) -> bool {
        self.width <= max.width && self.height <= max.height
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A capture device as reported by enumeration. Immutable once listed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CameraDevice {
    /// Opaque identifier understood by the frame source.
    pub moniker: String,
    pub name: String,
    pub resolutions: Vec<Resolution>,
}

impl CameraDevice {
    pub fn new(moniker: impl Into<String>, name: impl Into<String>, resolutions: Vec<Resolution>) -> Self {
        Self {
            moniker: moniker.into(),
            name: name.into(),
            resolutions,
        }
    }
}

/// Largest resolution by area that fits within `max`; otherwise the smallest
/// the device offers. `None` only when the device lists no resolutions.
pub fn select_resolution(available: &[Resolution], max: Resolution) -> Option<Resolution> {
    available
        .iter()
        .filter(|res| res.fits_within(max))
        .max_by_key(|res| res.area())
        .or_else(|| available.iter().min_by_key(|res| res.area()))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VGA: Resolution = Resolution::new(640, 480);

    #[test]
    fn picks_largest_fitting_resolution() {
        let available = [
            Resolution::new(320, 240),
            Resolution::new(1280, 720),
            Resolution::new(640, 480),
            Resolution::new(352, 288),
        ];
        assert_eq!(select_resolution(&available, VGA), Some(VGA));
    }

    #[test]
    fn width_and_height_must_both_fit() {
        let available = [Resolution::new(800, 448), Resolution::new(424, 240)];
        assert_eq!(
            select_resolution(&available, VGA),
            Some(Resolution::new(424, 240))
        );
    }

    #[test]
    fn falls_back_to_smallest_when_nothing_fits() {
        let available = [Resolution::new(1920, 1080), Resolution::new(1280, 720)];
        assert_eq!(
            select_resolution(&available, VGA),
            Some(Resolution::new(1280, 720))
        );
    }

    #[test]
    fn no_resolutions_means_device_default() {
        assert_eq!(select_resolution(&[], VGA), None);
    }
}
