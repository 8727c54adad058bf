//! Pure anomaly decisions. The supervisor owns gating (heating, already
//! paused, already aborted); these functions only compare numbers.

use printwatch_shared::{BoundsMinimum, FileBounds, MaterialProfile, Position};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundsViolation {
    pub axis: char,
    pub value: f64,
    pub limit: f64,
}

/// First axis on which `position` leaves the travel envelope of `bounds`.
/// The upper limit is the file's travel maximum; the lower limit depends on
/// `minimum`.
pub fn check_position(position: &Position, bounds: &FileBounds, minimum: BoundsMinimum) -> Option<BoundsViolation> {
    let travel = &bounds.travel;
    let max = travel.max.axes();
    let min = match minimum {
        BoundsMinimum::Zero => [0.0; 3],
        BoundsMinimum::File => travel.min.axes(),
    };
    for (i, (axis, value)) in ['X', 'Y', 'Z'].into_iter().zip(position.axes()).enumerate() {
        if value > max[i] {
            return Some(BoundsViolation { axis, value, limit: max[i] });
        }
        if value < min[i] {
            return Some(BoundsViolation { axis, value, limit: min[i] });
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TemperatureAnomaly {
    TooCold { temperature: f64, min: f64 },
    TooHot { temperature: f64, max: f64 },
}

/// Heating is over once the nozzle reaches the material minimum.
pub fn heating_complete(temperature: f64, profile: &MaterialProfile) -> bool {
    temperature >= profile.min_temp
}

pub fn check_temperature(temperature: f64, profile: &MaterialProfile) -> Option<TemperatureAnomaly> {
    if profile.contains(temperature) {
        None
    } else if temperature > profile.max_temp {
        Some(TemperatureAnomaly::TooHot { temperature, max: profile.max_temp })
    } else {
        Some(TemperatureAnomaly::TooCold { temperature, min: profile.min_temp })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use printwatch_shared::Extent;

    fn bounds() -> FileBounds {
        FileBounds::from_travel(Extent::new(
            Position::new(5.0, 5.0, 0.2),
            Position::new(200.0, 180.0, 50.0),
        ))
    }

    #[test]
    fn test_position_inside() {
        let p = Position::new(100.0, 100.0, 10.0);
        assert_eq!(check_position(&p, &bounds(), BoundsMinimum::Zero), None);
        assert_eq!(check_position(&Position::new(200.0, 180.0, 50.0), &bounds(), BoundsMinimum::Zero), None);
    }

    #[test]
    fn test_position_over_max() {
        let v = check_position(&Position::new(10.0, 180.5, 10.0), &bounds(), BoundsMinimum::Zero).unwrap();
        assert_eq!(v, BoundsViolation { axis: 'Y', value: 180.5, limit: 180.0 });
    }

    #[test]
    fn test_negative_axis() {
        let v = check_position(&Position::new(10.0, 10.0, -0.1), &bounds(), BoundsMinimum::Zero).unwrap();
        assert_eq!(v.axis, 'Z');
        assert_eq!(v.limit, 0.0);
    }

    #[test]
    fn test_minimum_modes() {
        // Below the file minimum but not negative
        let p = Position::new(1.0, 10.0, 10.0);
        assert_eq!(check_position(&p, &bounds(), BoundsMinimum::Zero), None);
        let v = check_position(&p, &bounds(), BoundsMinimum::File).unwrap();
        assert_eq!(v, BoundsViolation { axis: 'X', value: 1.0, limit: 5.0 });
    }

    #[test]
    fn test_temperature_window() {
        let pla = MaterialProfile::new(190.0, 220.0);
        assert_eq!(check_temperature(190.0, &pla), None);
        assert_eq!(check_temperature(220.0, &pla), None);
        assert!(matches!(check_temperature(221.0, &pla), Some(TemperatureAnomaly::TooHot { .. })));
        assert!(matches!(check_temperature(150.0, &pla), Some(TemperatureAnomaly::TooCold { .. })));
        assert!(heating_complete(190.0, &pla));
        assert!(!heating_complete(189.9, &pla));
    }
}
