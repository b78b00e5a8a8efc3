//! Operator-facing unit handling. The engine itself only sees du and steps;
//! these helpers are for keypad and display collaborators at the boundary.

use serde::{Deserialize, Serialize};

/// du per millimetre.
pub const DU_PER_MM: i64 = 10_000;
/// du per inch, and the largest pitch the keypad accepts (1 tpi).
pub const DU_PER_INCH: i64 = 254_000;
pub const DUPR_MAX: i64 = DU_PER_INCH;

const TPI_ROUND_EPSILON: f64 = 0.03;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Measure {
    #[default]
    Metric,
    Inch,
    Tpi,
}

impl Measure {
    pub fn cycle(self) -> Self {
        match self {
            Measure::Metric => Measure::Inch,
            Measure::Inch => Measure::Tpi,
            Measure::Tpi => Measure::Metric,
        }
    }

    /// Convert a fixed-decimal keypad entry to du: metric digits are
    /// thousandths of a mm, inch digits ten-thousandths of an inch, TPI
    /// digits are threads per inch.
    pub fn numpad_to_du(self, digits: i64) -> i64 {
        if digits == 0 {
            return 0;
        }
        match self {
            Measure::Metric => digits * 10,
            Measure::Inch => (digits as f64 * 25.4).round() as i64,
            Measure::Tpi => (DU_PER_INCH as f64 / digits as f64).round() as i64,
        }
    }

    /// Length for a small display, "12.345mm" or "0.4724\"".
    pub fn format_du(self, du: i64) -> String {
        if du == 0 {
            return "0".to_string();
        }
        match self {
            Measure::Metric => format!("{:.3}mm", du as f64 / DU_PER_MM as f64),
            Measure::Inch | Measure::Tpi => format!("{:.4}\"", du as f64 / DU_PER_INCH as f64),
        }
    }

    /// Pitch for display; in TPI mode shows threads per inch, rounded to a
    /// whole number when within 0.03.
    pub fn format_pitch(self, dupr: i64) -> String {
        if self != Measure::Tpi || dupr == 0 {
            return self.format_du(dupr);
        }
        let tpi = DU_PER_INCH as f64 / dupr as f64;
        if (tpi - tpi.round()).abs() < TPI_ROUND_EPSILON {
            return format!("{}tpi", tpi.round() as i64);
        }
        let tpi100 = (tpi * 100.0).round() as i64;
        let points = if tpi100 % 10 != 0 {
            2
        } else if tpi100 % 100 != 0 {
            1
        } else {
            0
        };
        format!("{:.*}tpi", points, tpi)
    }
}

pub fn du_from_mm(mm: f32) -> i64 {
    (f64::from(mm) * DU_PER_MM as f64).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measure_cycles_through_all_units() {
        assert_eq!(Measure::Metric.cycle(), Measure::Inch);
        assert_eq!(Measure::Inch.cycle(), Measure::Tpi);
        assert_eq!(Measure::Tpi.cycle(), Measure::Metric);
    }

    #[test]
    fn numpad_conversions() {
        // 20.000 mm
        assert_eq!(Measure::Metric.numpad_to_du(20_000), 200_000);
        // 1.0000"
        assert_eq!(Measure::Inch.numpad_to_du(10_000), 254_000);
        // 20 tpi = 1.27 mm pitch
        assert_eq!(Measure::Tpi.numpad_to_du(20), 12_700);
        assert_eq!(Measure::Tpi.numpad_to_du(0), 0);
    }

    #[test]
    fn formatting_fits_a_small_display() {
        assert_eq!(Measure::Metric.format_du(123_450), "12.345mm");
        assert_eq!(Measure::Inch.format_du(254_000), "1.0000\"");
        assert_eq!(Measure::Tpi.format_pitch(12_700), "20tpi");
        assert_eq!(Measure::Tpi.format_pitch(254_000 * 2 / 23), "11.5tpi");
        assert!(Measure::Metric.format_du(-DUPR_MAX * 40).len() <= 21);
    }
}
