//! Storage connection strings
//!
//! A connection string is a list of `Key=Value` pairs separated by `;`.
//! Keys are case-insensitive. Exactly one backend selector must be present:
//!
//! - `UseDevelopmentStorage=true` - in-process table service
//! - `DataSource=<path>` - SQLite file (or `:memory:`)
//!
//! `PageSize=<n>` optionally caps how many entities one query segment holds
//! (1 to [`MAX_PAGE_SIZE`]).

use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Largest number of entities one query segment may hold (table service maximum)
pub const MAX_PAGE_SIZE: usize = 1000;

/// Default number of entities per query segment
pub const DEFAULT_PAGE_SIZE: usize = MAX_PAGE_SIZE;

const USE_DEVELOPMENT_STORAGE: &str = "usedevelopmentstorage";
const DATA_SOURCE: &str = "datasource";
const PAGE_SIZE: &str = "pagesize";

/// Errors produced while parsing a connection string
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStringError {
    #[error("Connection string is empty")]
    Empty,

    #[error("Malformed segment '{0}': expected Key=Value")]
    MalformedSegment(String),

    #[error("Setting '{0}' appears more than once")]
    DuplicateKey(String),

    #[error("Unknown setting '{0}'")]
    UnknownKey(String),

    #[error("Invalid value '{value}' for '{key}'")]
    InvalidValue { key: String, value: String },

    #[error("No storage backend selected (expected UseDevelopmentStorage=true or DataSource=...)")]
    MissingBackend,

    #[error("UseDevelopmentStorage and DataSource cannot be combined")]
    ConflictingBackends,
}

/// Which table service a connection string points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    /// In-process emulator
    Development,
    /// SQLite database at the given path
    Sqlite(PathBuf),
}

/// Parsed connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub backend: BackendKind,
    pub page_size: usize,
}

impl ConnectionString {
    pub fn parse(input: &str) -> Result<Self, ConnectionStringError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ConnectionStringError::Empty);
        }

        let mut development: Option<bool> = None;
        let mut data_source: Option<PathBuf> = None;
        let mut page_size: Option<usize> = None;

        for segment in trimmed.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                // Trailing separators are allowed
                continue;
            }

            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| ConnectionStringError::MalformedSegment(segment.to_string()))?;
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() {
                return Err(ConnectionStringError::MalformedSegment(segment.to_string()));
            }

            let invalid = || ConnectionStringError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            };

            match key.to_ascii_lowercase().as_str() {
                USE_DEVELOPMENT_STORAGE => {
                    if development.is_some() {
                        return Err(ConnectionStringError::DuplicateKey(key.to_string()));
                    }
                    let flag = if value.eq_ignore_ascii_case("true") {
                        true
                    } else if value.eq_ignore_ascii_case("false") {
                        false
                    } else {
                        return Err(invalid());
                    };
                    development = Some(flag);
                }
                DATA_SOURCE => {
                    if data_source.is_some() {
                        return Err(ConnectionStringError::DuplicateKey(key.to_string()));
                    }
                    if value.is_empty() {
                        return Err(invalid());
                    }
                    data_source = Some(PathBuf::from(value));
                }
                PAGE_SIZE => {
                    if page_size.is_some() {
                        return Err(ConnectionStringError::DuplicateKey(key.to_string()));
                    }
                    let size = value.parse::<usize>().map_err(|_| invalid())?;
                    if !(1..=MAX_PAGE_SIZE).contains(&size) {
                        return Err(invalid());
                    }
                    page_size = Some(size);
                }
                _ => return Err(ConnectionStringError::UnknownKey(key.to_string())),
            }
        }

        let backend = match (development.unwrap_or(false), data_source) {
            (true, Some(_)) => return Err(ConnectionStringError::ConflictingBackends),
            (true, None) => BackendKind::Development,
            (false, Some(path)) => BackendKind::Sqlite(path),
            (false, None) => return Err(ConnectionStringError::MissingBackend),
        };

        Ok(Self {
            backend,
            page_size: page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        })
    }
}

impl FromStr for ConnectionString {
    type Err = ConnectionStringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
