// hn-core/src/units.rs

use core::fmt;

use uom::fmt::DisplayStyle;
use uom::si::f64::{Ratio as UomRatio, ThermodynamicTemperature as UomThermodynamicTemperature};
use uom::si::ratio::percent;
use uom::si::thermodynamic_temperature::degree_celsius;

use crate::error::{HnError, HnResult};
use crate::numeric::ensure_finite;

// Public canonical unit types (SI, f64), used at the display/interop edge.
pub type Ratio = UomRatio;
pub type Temperature = UomThermodynamicTemperature;

/// Temperature in tenths of a degree Celsius.
///
/// Field devices report this fixed-point scale; all thresholds and
/// breakpoints are compared in it so no float rounding enters the latch
/// decisions.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct DeciCelsius(pub i32);

impl DeciCelsius {
    pub const MIN: DeciCelsius = DeciCelsius(i32::MIN);
    pub const MAX: DeciCelsius = DeciCelsius(i32::MAX);

    pub const fn new(tenths: i32) -> Self {
        Self(tenths)
    }

    /// Round a Celsius value to the nearest tenth.
    pub fn from_celsius(celsius: f64) -> HnResult<Self> {
        let tenths = (ensure_finite(celsius, "celsius")? * 10.0).round();
        if tenths < i32::MIN as f64 || tenths > i32::MAX as f64 {
            return Err(HnError::OutOfRange {
                what: "celsius",
                value: celsius,
                min: i32::MIN as f64 / 10.0,
                max: i32::MAX as f64 / 10.0,
            });
        }
        Ok(Self(tenths as i32))
    }

    pub const fn tenths(self) -> i32 {
        self.0
    }

    pub fn celsius(self) -> f64 {
        f64::from(self.0) / 10.0
    }

    pub fn to_temperature(self) -> Temperature {
        Temperature::new::<degree_celsius>(self.celsius())
    }
}

impl fmt::Debug for DeciCelsius {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}dC", self.0)
    }
}

impl fmt::Display for DeciCelsius {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.to_temperature();
        write!(f, "{:.1}", t.into_format_args(degree_celsius, DisplayStyle::Abbreviation))
    }
}

impl From<i32> for DeciCelsius {
    fn from(tenths: i32) -> Self {
        Self(tenths)
    }
}

/// Power level or valve position in percent, always within `[0, 100]`.
#[derive(Clone, Copy, PartialEq, PartialOrd, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "f64", into = "f64")
)]
pub struct Percent(f64);

impl Percent {
    pub const ZERO: Percent = Percent(0.0);
    pub const FULL: Percent = Percent(100.0);

    pub fn new(value: f64) -> HnResult<Self> {
        let value = ensure_finite(value, "percent")?;
        if !(0.0..=100.0).contains(&value) {
            return Err(HnError::OutOfRange {
                what: "percent",
                value,
                min: 0.0,
                max: 100.0,
            });
        }
        Ok(Self(value))
    }

    /// Clamp into range instead of rejecting. NaN maps to zero.
    pub fn saturating(value: f64) -> Self {
        if value.is_nan() {
            return Self::ZERO;
        }
        Self(value.clamp(0.0, 100.0))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0.0
    }

    pub fn to_ratio(self) -> Ratio {
        Ratio::new::<percent>(self.0)
    }
}

impl fmt::Debug for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = self.to_ratio();
        write!(f, "{:.1}", r.into_format_args(percent, DisplayStyle::Abbreviation))
    }
}

impl TryFrom<f64> for Percent {
    type Error = HnError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Percent> for f64 {
    fn from(p: Percent) -> Self {
        p.0
    }
}
