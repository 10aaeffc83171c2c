use std::env;
use std::path::PathBuf;

use thiserror::Error;

use crate::td::types::TdlibParameters;

// TDLib's public sample application; override with your own from my.telegram.org.
const DEFAULT_API_ID: i32 = 94575;
const DEFAULT_API_HASH: &str = "a3406de8d171bb422bb6ddf3bbd800e2";

const DEFAULT_PREVIEW_LIMIT: i32 = 100;
const DEFAULT_DOWNLOAD_PRIORITY: i32 = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be a number, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
    #[error("{var} must be between {min} and {max}, got {value}")]
    OutOfRange {
        var: &'static str,
        value: i32,
        min: i32,
        max: i32,
    },
    #[error("{var} must be true or false, got {value:?}")]
    InvalidBool { var: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub api_id: i32,
    pub api_hash: String,
    pub data_dir: PathBuf,
    pub database_dir: PathBuf,
    pub files_dir: PathBuf,
    pub download_dir: PathBuf,
    pub preview_limit: i32,
    pub download_priority: i32,
    pub use_test_dc: bool,
    pub td_verbosity: i32,
    pub system_language: String,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let api_id = match var("TDMUSIC_API_ID") {
            Some(value) => parse_number("TDMUSIC_API_ID", &value)?,
            None => DEFAULT_API_ID,
        };
        let api_hash = var("TDMUSIC_API_HASH").unwrap_or_else(|| DEFAULT_API_HASH.to_string());

        let data_dir = var("TDMUSIC_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_data_dir(var("HOME")));
        let database_dir = var("TDMUSIC_DATABASE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("db"));
        let files_dir = var("TDMUSIC_FILES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("files"));
        let download_dir = var("TDMUSIC_DOWNLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./downloads"));

        let preview_limit = match var("TDMUSIC_PREVIEW_LIMIT") {
            Some(value) => parse_in_range("TDMUSIC_PREVIEW_LIMIT", &value, 1, 100)?,
            None => DEFAULT_PREVIEW_LIMIT,
        };
        let download_priority = match var("TDMUSIC_DOWNLOAD_PRIORITY") {
            Some(value) => parse_in_range("TDMUSIC_DOWNLOAD_PRIORITY", &value, 1, 32)?,
            None => DEFAULT_DOWNLOAD_PRIORITY,
        };
        let use_test_dc = match var("TDMUSIC_USE_TEST_DC") {
            Some(value) => parse_bool("TDMUSIC_USE_TEST_DC", &value)?,
            None => false,
        };
        let td_verbosity = match var("TDMUSIC_TD_VERBOSITY") {
            Some(value) => parse_in_range("TDMUSIC_TD_VERBOSITY", &value, 0, 1024)?,
            None => 0,
        };
        let system_language = var("TDMUSIC_SYSTEM_LANGUAGE").unwrap_or_else(|| "en".to_string());

        Ok(Self {
            api_id,
            api_hash,
            data_dir,
            database_dir,
            files_dir,
            download_dir,
            preview_limit,
            download_priority,
            use_test_dc,
            td_verbosity,
            system_language,
        })
    }

    pub fn tdlib_parameters(&self) -> TdlibParameters {
        let device_model = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "PC".to_string());

        TdlibParameters {
            use_test_dc: self.use_test_dc,
            database_directory: self.database_dir.clone(),
            files_directory: self.files_dir.clone(),
            database_encryption_key: String::new(),
            use_file_database: true,
            use_chat_info_database: true,
            use_message_database: true,
            use_secret_chats: false,
            api_id: self.api_id,
            api_hash: self.api_hash.clone(),
            system_language_code: self.system_language.clone(),
            device_model,
            system_version: env::consts::OS.to_string(),
            application_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

fn default_data_dir(home: Option<String>) -> PathBuf {
    let base = home.map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    base.join(".local").join("share").join("tdmusic")
}

fn parse_number(var: &'static str, value: &str) -> Result<i32, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        var,
        value: value.to_string(),
    })
}

fn parse_in_range(var: &'static str, value: &str, min: i32, max: i32) -> Result<i32, ConfigError> {
    let value = parse_number(var, value)?;
    if value < min || value > max {
        return Err(ConfigError::OutOfRange { var, value, min, max });
    }
    Ok(value)
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            var,
            value: value.to_string(),
        }),
    }
}
