//! The closed 4-bit unit code mapping carried in an INIT frame's
//! `batch_count` field.

/// A physical unit a sensor reports in, encoded as a 4-bit code on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Celsius,
    Fahrenheit,
    Kelvin,
    Percent,
    Volts,
    Amps,
    Watts,
    Meters,
    Liters,
    Grams,
    Pascal,
    Hertz,
    Lux,
    Db,
    Ppm,
    Unknown,
}

impl Unit {
    /// Decode a 4-bit unit code (0–15) from an INIT frame's `batch_count`.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Unit::Celsius,
            1 => Unit::Fahrenheit,
            2 => Unit::Kelvin,
            3 => Unit::Percent,
            4 => Unit::Volts,
            5 => Unit::Amps,
            6 => Unit::Watts,
            7 => Unit::Meters,
            8 => Unit::Liters,
            9 => Unit::Grams,
            10 => Unit::Pascal,
            11 => Unit::Hertz,
            12 => Unit::Lux,
            13 => Unit::Db,
            14 => Unit::Ppm,
            _ => Unit::Unknown,
        }
    }

    /// Encode this unit back into its 4-bit wire code.
    pub fn to_code(self) -> u8 {
        match self {
            Unit::Celsius => 0,
            Unit::Fahrenheit => 1,
            Unit::Kelvin => 2,
            Unit::Percent => 3,
            Unit::Volts => 4,
            Unit::Amps => 5,
            Unit::Watts => 6,
            Unit::Meters => 7,
            Unit::Liters => 8,
            Unit::Grams => 9,
            Unit::Pascal => 10,
            Unit::Hertz => 11,
            Unit::Lux => 12,
            Unit::Db => 13,
            Unit::Ppm => 14,
            Unit::Unknown => 15,
        }
    }

    /// Parse a configuration-file unit name (case-insensitive) into a
    /// [`Unit`], or `None` if it isn't in the closed table.
    pub fn from_name(name: &str) -> Option<Self> {
        let unit = match name.to_ascii_lowercase().as_str() {
            "celsius" => Unit::Celsius,
            "fahrenheit" => Unit::Fahrenheit,
            "kelvin" => Unit::Kelvin,
            "percent" => Unit::Percent,
            "volts" => Unit::Volts,
            "amps" => Unit::Amps,
            "watts" => Unit::Watts,
            "meters" => Unit::Meters,
            "liters" => Unit::Liters,
            "grams" => Unit::Grams,
            "pascal" => Unit::Pascal,
            "hertz" => Unit::Hertz,
            "lux" => Unit::Lux,
            "db" => Unit::Db,
            "ppm" => Unit::Ppm,
            "unknown" => Unit::Unknown,
            _ => return None,
        };
        Some(unit)
    }

    /// The canonical lowercase name for this unit, used in journal rows.
    pub fn name(self) -> &'static str {
        match self {
            Unit::Celsius => "celsius",
            Unit::Fahrenheit => "fahrenheit",
            Unit::Kelvin => "kelvin",
            Unit::Percent => "percent",
            Unit::Volts => "volts",
            Unit::Amps => "amps",
            Unit::Watts => "watts",
            Unit::Meters => "meters",
            Unit::Liters => "liters",
            Unit::Grams => "grams",
            Unit::Pascal => "pascal",
            Unit::Hertz => "hertz",
            Unit::Lux => "lux",
            Unit::Db => "db",
            Unit::Ppm => "ppm",
            Unit::Unknown => "unknown",
        }
    }
}
