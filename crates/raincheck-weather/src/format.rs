//! Display helpers for temperatures and rain chances.

use serde::{Deserialize, Serialize};

use crate::types::ForecastSnapshot;

/// Regions that default to Fahrenheit.
const FAHRENHEIT_REGIONS: [&str; 3] = ["US", "LR", "MM"];

/// Temperature unit preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn from_setting(use_fahrenheit: bool) -> Self {
        if use_fahrenheit {
            Self::Fahrenheit
        } else {
            Self::Celsius
        }
    }

    /// Default unit for an ISO 3166 region code.
    pub fn for_region(region: &str) -> Self {
        let region = region.to_ascii_uppercase();
        Self::from_setting(FAHRENHEIT_REGIONS.contains(&region.as_str()))
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Celsius => "°C",
            Self::Fahrenheit => "°F",
        }
    }
}

/// UI language for generated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    English,
    Swedish,
}

impl Language {
    /// Swedish for any `sv` tag, English otherwise.
    pub fn from_tag(tag: &str) -> Self {
        let primary = tag.split(['-', '_']).next().unwrap_or("");
        if primary.eq_ignore_ascii_case("sv") {
            Self::Swedish
        } else {
            Self::English
        }
    }
}

pub fn celsius_to_fahrenheit(c: f64) -> f64 {
    c * 9.0 / 5.0 + 32.0
}

/// Format a Celsius value in `unit`, e.g. `"21°C"` or `"69.8°F"`.
pub fn format_temperature(value_c: f64, unit: TemperatureUnit, decimals: usize, with_unit: bool) -> String {
    let value = match unit {
        TemperatureUnit::Celsius => value_c,
        TemperatureUnit::Fahrenheit => celsius_to_fahrenheit(value_c),
    };
    let text = if decimals == 0 {
        format!("{}", value.round() as i64)
    } else {
        format!("{:.*}", decimals, value)
    };
    if with_unit {
        format!("{}{}", text, unit.symbol())
    } else {
        format!("{}°", text)
    }
}

pub fn high_label(value_c: f64, unit: TemperatureUnit) -> String {
    format!("↑{}", format_temperature(value_c, unit, 0, true))
}

pub fn low_label(value_c: f64, unit: TemperatureUnit) -> String {
    format!("↓{}", format_temperature(value_c, unit, 0, true))
}

pub fn rain_chip_text(pct: u8, language: Language) -> String {
    match language {
        Language::Swedish => format!("Regnchans • {} %", pct),
        Language::English => format!("Rain chance • {}%", pct),
    }
}

/// Header line of the details view. The rain part is left out when the chance is 0.
pub fn now_header(snapshot: &ForecastSnapshot, unit: TemperatureUnit, language: Language) -> String {
    let now = format_temperature(snapshot.current_temperature_c, unit, 1, true);
    let rain = snapshot.next_hour_rain_probability_pct;
    match (language, rain) {
        (Language::Swedish, 0) => format!("Nu: {}", now),
        (Language::Swedish, _) => format!("Nu: {} • Nästa timme: {}% regn", now, rain),
        (Language::English, 0) => format!("Now: {}", now),
        (Language::English, _) => format!("Now: {} • Next hour: {}% rain", now, rain),
    }
}

/// Text of the rain notification body.
pub fn rain_alert_text(location_name: &str, pct: u8, language: Language) -> String {
    match language {
        Language::Swedish => format!("{}: {}% risk för regn nästa timme", location_name, pct),
        Language::English => format!("{}: {}% chance of rain in the next hour", location_name, pct),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    fn snapshot(temp: f64, rain: u8) -> ForecastSnapshot {
        ForecastSnapshot {
            current_temperature_c: temp,
            next_hour_rain_probability_pct: rain,
            hourly: Vec::new(),
            daily: Vec::new(),
        }
    }

    #[test]
    fn test_unit_for_region() {
        assert_eq!(TemperatureUnit::for_region("us"), TemperatureUnit::Fahrenheit);
        assert_eq!(TemperatureUnit::for_region("MM"), TemperatureUnit::Fahrenheit);
        assert_eq!(TemperatureUnit::for_region("SE"), TemperatureUnit::Celsius);
    }

    #[test]
    fn test_language_from_tag() {
        assert_eq!(Language::from_tag("sv-SE"), Language::Swedish);
        assert_eq!(Language::from_tag("sv"), Language::Swedish);
        assert_eq!(Language::from_tag("en_US"), Language::English);
        assert_eq!(Language::from_tag(""), Language::English);
    }

    #[test]
    fn test_format_temperature() {
        assert_eq!(format_temperature(21.4, TemperatureUnit::Celsius, 0, true), "21°C");
        assert_eq!(format_temperature(21.0, TemperatureUnit::Fahrenheit, 1, true), "69.8°F");
        assert_eq!(format_temperature(-3.6, TemperatureUnit::Celsius, 0, false), "-4°");
    }

    #[test]
    fn test_high_low_labels() {
        assert_eq!(high_label(10.0, TemperatureUnit::Celsius), "↑10°C");
        assert_eq!(low_label(0.0, TemperatureUnit::Fahrenheit), "↓32°F");
    }

    #[test]
    fn test_now_header_omits_zero_rain() {
        let header = now_header(&snapshot(3.46, 0), TemperatureUnit::Celsius, Language::English);
        assert_eq!(header, "Now: 3.5°C");

        let header = now_header(&snapshot(3.0, 40), TemperatureUnit::Celsius, Language::Swedish);
        assert_eq!(header, "Nu: 3.0°C • Nästa timme: 40% regn");
    }

    #[test]
    fn test_rain_chip_text() {
        assert_eq!(rain_chip_text(70, Language::English), "Rain chance • 70%");
        assert_eq!(rain_chip_text(70, Language::Swedish), "Regnchans • 70 %");
    }

    #[test]
    fn test_unit_conversions() {
        assert_eq!(celsius_to_fahrenheit(100.0), 212.0);
        assert_eq!(celsius_to_fahrenheit(-40.0), -40.0);
    }
}
