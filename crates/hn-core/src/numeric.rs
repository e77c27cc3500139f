use crate::HnError;

/// Differences below this are float noise on a 0..=100 scale.
const POSITION_EPSILON: f64 = 1e-9;

/// True when `candidate` moved further than `band` away from `reference`.
///
/// A zero band still ignores float noise, so re-applying the same value is
/// never reported as a change.
pub fn exceeds_deadband(reference: f64, candidate: f64, band: f64) -> bool {
    let diff = (candidate - reference).abs();
    diff > POSITION_EPSILON && diff > band
}

pub fn ensure_finite(v: f64, what: &'static str) -> Result<f64, HnError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(HnError::NonFinite { what, value: v })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadband_edges() {
        assert!(!exceeds_deadband(50.0, 50.0, 0.0));
        assert!(!exceeds_deadband(50.0, 50.0 + 1e-12, 0.0));
        assert!(exceeds_deadband(50.0, 50.5, 0.0));
        assert!(!exceeds_deadband(50.0, 52.0, 2.0));
        assert!(exceeds_deadband(50.0, 47.9, 2.0));
    }

    #[test]
    fn ensure_finite_detects_nan() {
        let err = ensure_finite(f64::NAN, "position").unwrap_err();
        assert!(matches!(err, HnError::NonFinite { what: "position", .. }));
        assert_eq!(ensure_finite(42.0, "position").unwrap(), 42.0);
    }
}
