//! Application error hierarchy.
//!
//! `Display` carries the technical detail for logs; `user_message()` is the
//! short text shown to whoever is looking at the forecast.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("Forecast error: {0}")]
    Weather(#[from] WeatherError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Network(e) => e.user_message(),
            AppError::Storage(e) => e.user_message(),
            AppError::Weather(e) => e.user_message(),
            AppError::Io(_) => "Could not read or write local files.",
            AppError::Other(_) => "Something went wrong.",
        }
    }
}

/// Transport-level failures talking to the forecast or geocoding service.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Offline or unreachable: {0}")]
    Unreachable(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Service answered HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Unreadable response: {0}")]
    InvalidResponse(String),
}

impl NetworkError {
    pub fn user_message(&self) -> &'static str {
        match self {
            NetworkError::Unreachable(_) => "No connection to the weather service.",
            NetworkError::Timeout => "The weather service is slow to answer. Try again soon.",
            NetworkError::Status { status, .. } if *status >= 500 => {
                "The weather service is having trouble. Try again later."
            }
            NetworkError::Status { .. } | NetworkError::InvalidResponse(_) => {
                "Could not load forecast."
            }
        }
    }
}

/// Local SQLite failures.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Cannot open database: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Database file is damaged: {0}")]
    Corrupt(String),
}

impl DatabaseError {
    pub fn user_message(&self) -> &'static str {
        match self {
            DatabaseError::Unavailable(_) => "Saved places are unavailable right now.",
            DatabaseError::Query(_) => "Could not update saved places.",
            DatabaseError::Corrupt(_) => "Saved places are damaged and may need to be reset.",
        }
    }
}

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("No place matches '{0}'")]
    NotFound(String),

    #[error("Forecast request rejected: {0}")]
    Rejected(String),
}

impl WeatherError {
    pub fn user_message(&self) -> &'static str {
        match self {
            WeatherError::NotFound(_) => "No matching place found.",
            WeatherError::Rejected(_) => "Could not load forecast.",
        }
    }
}

/// Classify a reqwest failure as a [`NetworkError`].
pub trait ReqwestErrorExt {
    fn into_network_error(self) -> NetworkError;
}

impl ReqwestErrorExt for reqwest::Error {
    fn into_network_error(self) -> NetworkError {
        if self.is_timeout() {
            return NetworkError::Timeout;
        }
        match self.status() {
            Some(status) => NetworkError::Status {
                status: status.as_u16(),
                message: self.to_string(),
            },
            None if self.is_decode() => NetworkError::InvalidResponse(self.to_string()),
            None => NetworkError::Unreachable(self.to_string()),
        }
    }
}

/// Classify a rusqlite failure as a [`DatabaseError`].
pub trait RusqliteErrorExt {
    fn into_database_error(self) -> DatabaseError;
}

impl RusqliteErrorExt for rusqlite::Error {
    fn into_database_error(self) -> DatabaseError {
        use rusqlite::ErrorCode;

        let code = match &self {
            rusqlite::Error::SqliteFailure(err, _) => Some(err.code),
            _ => None,
        };
        match code {
            Some(ErrorCode::CannotOpen | ErrorCode::PermissionDenied) => {
                DatabaseError::Unavailable(self.to_string())
            }
            Some(ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase) => {
                DatabaseError::Corrupt(self.to_string())
            }
            _ => DatabaseError::Query(self.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn test_status_message_depends_on_class() {
        let outage = NetworkError::Status {
            status: 503,
            message: "maintenance".into(),
        };
        let rejected = NetworkError::Status {
            status: 400,
            message: "bad latitude".into(),
        };

        assert!(outage.user_message().contains("later"));
        assert_eq!(rejected.user_message(), "Could not load forecast.");
        assert!(NetworkError::Timeout.user_message().contains("slow"));
    }

    #[test]
    fn test_not_found_names_the_query() {
        let err: AppError = WeatherError::NotFound("Atlantis".into()).into();
        assert_eq!(err.to_string(), "Forecast error: No place matches 'Atlantis'");
        assert_eq!(err.user_message(), "No matching place found.");
    }

    #[test]
    fn test_app_error_forwards_user_message() {
        let err: AppError = WeatherError::Rejected("HTTP 404".into()).into();
        assert_eq!(err.user_message(), "Could not load forecast.");

        let err: AppError = DatabaseError::Corrupt("header".into()).into();
        assert!(matches!(err, AppError::Storage(DatabaseError::Corrupt(_))));
        assert!(err.user_message().contains("reset"));
    }

    #[test]
    fn test_rusqlite_error_classification() {
        let err = rusqlite::Error::QueryReturnedNoRows.into_database_error();
        assert!(matches!(err, DatabaseError::Query(_)));

        let failure = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
            None,
        );
        assert!(matches!(failure.into_database_error(), DatabaseError::Unavailable(_)));
    }
}
