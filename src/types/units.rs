//! Measurement units.
//!
//! Every surface unit maps to one base unit per dimension. Literals are
//! normalized to the base unit as soon as they are folded, so arithmetic at
//! runtime always happens in base units and formatting converts back.

use std::collections::HashMap;

use lazy_static::lazy_static;

/// Conversion from a surface unit to its base unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transform {
    /// `base = value * factor`
    Linear(f64),
    /// `base = value * scale + offset` (temperature scales)
    Affine { scale: f64, offset: f64 },
}

impl Transform {
    pub fn forward(&self, value: f64) -> f64 {
        match *self {
            Transform::Linear(factor) => value * factor,
            Transform::Affine { scale, offset } => value * scale + offset,
        }
    }

    pub fn inverse(&self, value: f64) -> f64 {
        match *self {
            Transform::Linear(factor) => value / factor,
            Transform::Affine { scale, offset } => (value - offset) / scale,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UnitDef {
    pub base: &'static str,
    pub transform: Transform,
}

const fn linear(base: &'static str, factor: f64) -> UnitDef {
    UnitDef {
        base,
        transform: Transform::Linear(factor),
    }
}

const DAY_MS: f64 = 86_400_000.0;

// (symbol, definition)
const UNIT_TABLE: &[(&str, UnitDef)] = &[
    // time, base is milliseconds
    ("ms", linear("ms", 1.0)),
    ("s", linear("ms", 1000.0)),
    ("min", linear("ms", 60_000.0)),
    ("h", linear("ms", 3_600_000.0)),
    ("day", linear("ms", DAY_MS)),
    ("week", linear("ms", 7.0 * DAY_MS)),
    // business month and year: 30 and 365 days
    ("mon", linear("ms", 30.0 * DAY_MS)),
    ("year", linear("ms", 365.0 * DAY_MS)),
    // length
    ("m", linear("m", 1.0)),
    ("km", linear("m", 1000.0)),
    ("mm", linear("m", 0.001)),
    ("cm", linear("m", 0.01)),
    ("mi", linear("m", 1609.344)),
    ("in", linear("m", 0.0254)),
    ("ft", linear("m", 0.3048)),
    // speed
    ("mps", linear("mps", 1.0)),
    ("kmph", linear("mps", 0.277_777_78)),
    ("mph", linear("mps", 0.44704)),
    // mass
    ("kg", linear("kg", 1.0)),
    ("g", linear("kg", 0.001)),
    ("lb", linear("kg", 0.453_592_37)),
    ("oz", linear("kg", 0.028_349_523)),
    // pressure
    ("Pa", linear("Pa", 1.0)),
    ("bar", linear("Pa", 100_000.0)),
    ("psi", linear("Pa", 6894.7573)),
    ("mmHg", linear("Pa", 133.32239)),
    ("inHg", linear("Pa", 3386.3886)),
    ("atm", linear("Pa", 101_325.0)),
    // temperature
    ("C", linear("C", 1.0)),
    (
        "F",
        UnitDef {
            base: "C",
            transform: Transform::Affine {
                scale: 1.0 / 1.8,
                offset: -32.0 / 1.8,
            },
        },
    ),
    (
        "K",
        UnitDef {
            base: "C",
            transform: Transform::Affine {
                scale: 1.0,
                offset: -273.15,
            },
        },
    ),
    // energy
    ("kcal", linear("kcal", 1.0)),
    ("kJ", linear("kcal", 0.239_006)),
    // file and memory sizes
    ("byte", linear("byte", 1.0)),
    ("KB", linear("byte", 1000.0)),
    ("KiB", linear("byte", 1024.0)),
    ("MB", linear("byte", 1_000_000.0)),
    ("MiB", linear("byte", 1_048_576.0)),
    ("GB", linear("byte", 1_000_000_000.0)),
    ("GiB", linear("byte", 1_073_741_824.0)),
    ("TB", linear("byte", 1_000_000_000_000.0)),
    ("TiB", linear("byte", 1_099_511_627_776.0)),
];

lazy_static! {
    static ref UNITS: HashMap<&'static str, UnitDef> = UNIT_TABLE.iter().copied().collect();
}

/// All known surface unit symbols.
pub fn all_units() -> impl Iterator<Item = &'static str> {
    UNIT_TABLE.iter().map(|(symbol, _)| *symbol)
}

pub fn lookup(unit: &str) -> Option<UnitDef> {
    UNITS.get(unit).copied()
}

/// The base unit `unit` normalizes to, or `None` for unknown symbols.
pub fn base_unit(unit: &str) -> Option<&'static str> {
    lookup(unit).map(|def| def.base)
}

pub fn transform_to_base(value: f64, unit: &str) -> Option<f64> {
    lookup(unit).map(|def| def.transform.forward(value))
}

pub fn transform_from_base(value: f64, unit: &str) -> Option<f64> {
    lookup(unit).map(|def| def.transform.inverse(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_base_units_are_fixed_points() {
        for unit in all_units() {
            let base = base_unit(unit).unwrap();
            assert_eq!(base_unit(base), Some(base), "{} -> {}", unit, base);
            assert_eq!(transform_to_base(42.0, base), Some(42.0));
        }
    }

    #[test]
    fn test_temperature_conversion() {
        let boiling = transform_to_base(212.0, "F").unwrap();
        assert!((boiling - 100.0).abs() < 1e-9);
        let freezing = transform_to_base(273.15, "K").unwrap();
        assert!(freezing.abs() < 1e-9);
        assert!((transform_from_base(0.0, "F").unwrap() - 32.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_unit() {
        assert_eq!(base_unit("furlong"), None);
        assert_eq!(transform_to_base(1.0, "furlong"), None);
    }

    proptest! {
        #[test]
        fn prop_unit_round_trip(idx in 0usize..UNIT_TABLE.len(), value in -1.0e6f64..1.0e6f64) {
            let unit = UNIT_TABLE[idx].0;
            let base = transform_to_base(value, unit).unwrap();
            let back = transform_from_base(base, unit).unwrap();
            prop_assert!((back - value).abs() <= 1e-6 * value.abs().max(1.0));
        }
    }
}
