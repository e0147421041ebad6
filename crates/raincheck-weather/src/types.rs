use serde::{Deserialize, Serialize};

/// Daily sky/precipitation class derived from an Open-Meteo `weathercode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    #[default]
    Clear,
    PartlyCloudy,
    Cloudy,
    Fog,
    Drizzle,
    Rain,
    HeavyRain,
    /// Freezing drizzle or rain
    Sleet,
    Snow,
    Thunderstorm,
}

impl WeatherCondition {
    /// Map a WMO 4677 code. Unknown codes read as clear.
    pub fn from_wmo_code(code: i32) -> Self {
        match code {
            1 | 2 => Self::PartlyCloudy,
            3 => Self::Cloudy,
            45 | 48 => Self::Fog,
            51 | 53 | 55 => Self::Drizzle,
            61 | 63 | 80 => Self::Rain,
            65 | 81 | 82 => Self::HeavyRain,
            56 | 57 | 66 | 67 => Self::Sleet,
            71 | 73 | 75 | 77 | 85 | 86 => Self::Snow,
            95 | 96 | 99 => Self::Thunderstorm,
            _ => Self::Clear,
        }
    }

    /// English and Swedish labels.
    fn labels(&self) -> (&'static str, &'static str) {
        match self {
            Self::Clear => ("Clear", "Klart"),
            Self::PartlyCloudy => ("Partly cloudy", "Halvklart"),
            Self::Cloudy => ("Overcast", "Mulet"),
            Self::Fog => ("Fog", "Dimma"),
            Self::Drizzle => ("Drizzle", "Duggregn"),
            Self::Rain => ("Rain", "Regn"),
            Self::HeavyRain => ("Heavy rain", "Kraftigt regn"),
            Self::Sleet => ("Freezing rain", "Underkylt regn"),
            Self::Snow => ("Snow", "Snö"),
            Self::Thunderstorm => ("Thunder", "Åska"),
        }
    }

    pub fn description(&self) -> &'static str {
        self.labels().0
    }

    pub fn description_sv(&self) -> &'static str {
        self.labels().1
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Clear => "☀️",
            Self::PartlyCloudy => "⛅",
            Self::Cloudy => "☁️",
            Self::Fog => "🌫️",
            Self::Drizzle | Self::Rain => "🌦️",
            Self::HeavyRain | Self::Sleet => "🌧️",
            Self::Snow => "❄️",
            Self::Thunderstorm => "⛈️",
        }
    }
}

/// A place the user searched for or saved.
///
/// `id == 0` marks a transient (unsaved) location. Saved locations are unique
/// on `(name, latitude, longitude)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    pub country: Option<String>,
    pub admin1: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

/// Exact coordinate identity used for merging search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoordinateKey(u64, u64);

impl Location {
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            id: 0,
            name: name.into(),
            country: None,
            admin1: None,
            latitude,
            longitude,
        }
    }

    pub fn with_region(mut self, admin1: Option<&str>, country: Option<&str>) -> Self {
        self.admin1 = admin1.map(str::to_string);
        self.country = country.map(str::to_string);
        self
    }

    pub fn is_saved(&self) -> bool {
        self.id != 0
    }

    pub fn coordinate_key(&self) -> CoordinateKey {
        CoordinateKey(self.latitude.to_bits(), self.longitude.to_bits())
    }

    /// "Name, Region, Country" with absent parts left out.
    pub fn display_name(&self) -> String {
        std::iter::once(self.name.as_str())
            .chain(self.admin1.as_deref())
            .chain(self.country.as_deref())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// One hourly forecast point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourPoint {
    pub time_iso: String,
    pub temperature_c: f64,
    pub rain_probability_pct: u8,
}

/// One day of the short-range outlook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySummary {
    /// `yyyy-MM-dd`
    pub date_iso: String,
    pub t_min_c: f64,
    pub t_max_c: f64,
    pub rain_probability_max_pct: u8,
    pub weather_code: i32,
}

impl DaySummary {
    pub fn condition(&self) -> WeatherCondition {
        WeatherCondition::from_wmo_code(self.weather_code)
    }
}

/// Result of a single successful forecast fetch. Never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSnapshot {
    pub current_temperature_c: f64,
    pub next_hour_rain_probability_pct: u8,
    /// At most 24 entries
    pub hourly: Vec<HourPoint>,
    /// At most 5 entries
    pub daily: Vec<DaySummary>,
}

/// Last-known forecast values kept per saved location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedForecast {
    pub location_id: i64,
    pub timestamp_ms: i64,
    pub current_temperature_c: f64,
    pub next_hour_rain_pct: u8,
}

/// Clamp a raw probability into `0..=100`.
pub fn clamp_pct(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_wmo_code_mapping() {
        let cases = [
            (0, WeatherCondition::Clear),
            (2, WeatherCondition::PartlyCloudy),
            (48, WeatherCondition::Fog),
            (53, WeatherCondition::Drizzle),
            (57, WeatherCondition::Sleet),
            (63, WeatherCondition::Rain),
            (67, WeatherCondition::Sleet),
            (82, WeatherCondition::HeavyRain),
            (86, WeatherCondition::Snow),
            (96, WeatherCondition::Thunderstorm),
            (4, WeatherCondition::Clear),
            (-1, WeatherCondition::Clear),
        ];
        for (code, expected) in cases {
            assert_eq!(WeatherCondition::from_wmo_code(code), expected, "code {}", code);
        }
    }

    #[test]
    fn test_condition_labels() {
        let storm = WeatherCondition::from_wmo_code(95);
        assert_eq!(storm.description(), "Thunder");
        assert_eq!(storm.description_sv(), "Åska");
        assert_eq!(WeatherCondition::Snow.emoji(), "❄️");
    }

    #[test]
    fn test_display_name_skips_missing_parts() {
        let loc = Location::new("Lund", 55.7, 13.19).with_region(None, Some("Sweden"));
        assert_eq!(loc.display_name(), "Lund, Sweden");

        let loc = Location::new("Lund", 55.7, 13.19).with_region(Some("Skåne"), Some("Sweden"));
        assert_eq!(loc.display_name(), "Lund, Skåne, Sweden");
    }

    #[test]
    fn test_coordinate_key_is_exact() {
        let a = Location::new("A", 59.33, 18.06);
        let b = Location::new("B", 59.33, 18.06);
        let c = Location::new("A", 59.330001, 18.06);
        assert_eq!(a.coordinate_key(), b.coordinate_key());
        assert_ne!(a.coordinate_key(), c.coordinate_key());
    }

    #[test]
    fn test_clamp_pct() {
        assert_eq!(clamp_pct(-5), 0);
        assert_eq!(clamp_pct(42), 42);
        assert_eq!(clamp_pct(140), 100);
    }
}
