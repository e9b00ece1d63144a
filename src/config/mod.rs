//! Layered configuration (spec's ambient config layer): restriction policy,
//! direct-HTTP uploader options, and companion client options, loaded from
//! an ini file under the engine's home directory with built-in defaults
//! filled in for anything the file omits.
//!
//! Grounded on the teacher's `config::api::ConfigStore` trait: a
//! string-keyed dict that knows how to merge with another instance of
//! itself (keeping its own keys) and to merge with its own `Default` to
//! backfill missing keys.

pub mod constants;
mod error;

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::ops::{Deref, DerefMut};
use std::str::FromStr;

use ini::Ini;
use serde_json::Value;

use self::constants as c;
pub use self::error::{Error, ErrorKind, Result};

type Dict = HashMap<String, String>;

/// Objects that store configuration as a flat string-to-string map
/// implement this trait to get `merge`/`get_required`/`get_and_update` for
/// free, the way the teacher's settings objects do.
pub trait ConfigStore: Default {
    fn store(&mut self) -> &mut Dict;

    /// Merge `other` into `self`. A key already present in `self` wins.
    fn merge<C: ConfigStore>(&mut self, other: &mut C) -> &Self {
        {
            let st = self.store();
            for (key, value) in other.store().iter() {
                st.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        self
    }

    /// Merge `self` with a fresh default instance of `T`.
    fn merge_default<T: ConfigStore>(&mut self) -> &Self {
        let mut default: T = Default::default();
        self.merge(&mut default);
        self
    }

    fn get_required<K: Into<String>>(&mut self, key: K) -> Result<String> {
        let key = key.into();
        self.store()
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::missing_config_value(key))
    }

    fn get_and_update<K: Into<String>>(&mut self, key: K, default: String) -> String {
        self.store()
            .entry(key.into())
            .or_insert(default)
            .clone()
    }

    fn get_as_and_update<K, T>(&mut self, key: K, default: T) -> Result<T>
    where
        K: Into<String>,
        T: FromStr + ToString,
        <T as FromStr>::Err: 'static + Send + std::error::Error,
    {
        let key = key.into();
        let key_inner = key.clone();
        self.store()
            .entry(key)
            .or_insert_with(|| default.to_string())
            .parse::<T>()
            .map_err(|_| Error::invalid_config(format!("bad value for option \"{}\"", key_inner)))
    }
}

/// Admission policy applied before a file is added to the session
/// (spec §4.E). `None` means "unbounded" for every field.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestrictionsConfig(Dict);

impl Deref for RestrictionsConfig {
    type Target = Dict;
    fn deref(&self) -> &Dict {
        &self.0
    }
}
impl DerefMut for RestrictionsConfig {
    fn deref_mut(&mut self) -> &mut Dict {
        &mut self.0
    }
}
impl ConfigStore for RestrictionsConfig {
    fn store(&mut self) -> &mut Dict {
        &mut self.0
    }
}

impl RestrictionsConfig {
    pub fn max_file_size(&self) -> Option<u64> {
        self.0.get("max_file_size").and_then(|v| v.parse().ok())
    }
    pub fn max_total_file_size(&self) -> Option<u64> {
        self.0
            .get("max_total_file_size")
            .and_then(|v| v.parse().ok())
    }
    pub fn max_number_of_files(&self) -> Option<usize> {
        self.0
            .get("max_number_of_files")
            .and_then(|v| v.parse().ok())
    }
    pub fn min_number_of_files(&self) -> Option<usize> {
        self.0
            .get("min_number_of_files")
            .and_then(|v| v.parse().ok())
    }
    /// Comma-separated list of extensions and/or MIME patterns
    /// (spec §4.E, `allowedFileTypes`).
    pub fn allowed_file_types(&self) -> Option<Vec<String>> {
        self.0.get("allowed_file_types").map(|v| {
            v.split(',')
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty())
                .collect()
        })
    }
    pub fn required_meta_fields(&self) -> Vec<String> {
        self.0
            .get("required_meta_fields")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_owned())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Options for the direct-HTTP uploader (spec §4.I).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XhrConfig {
    pub endpoint: String,
    pub method: String,
    pub field_name: String,
    pub bundle: bool,
    pub with_credentials: bool,
    pub timeout_ms: u64,
    pub headers: HashMap<String, String>,
}

impl Default for XhrConfig {
    fn default() -> Self {
        XhrConfig {
            endpoint: String::new(),
            method: "POST".to_owned(),
            field_name: c::DEFAULT_XHR_FIELD_NAME.to_owned(),
            bundle: false,
            with_credentials: false,
            timeout_ms: c::DEFAULT_XHR_TIMEOUT_MS,
            headers: HashMap::new(),
        }
    }
}

/// Options for the companion-proxied remote uploader (spec §4.K).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompanionConfig {
    pub url: Option<String>,
    pub headers: HashMap<String, String>,
}

/// Top-level engine options that aren't specific to any one uploader
/// (spec §4.G/H, `autoProceed`, render debounce, retry backoff).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineOptions {
    pub auto_proceed: bool,
    pub render_debounce_ms: u64,
    pub progress_throttle_ms: u64,
    pub upload_concurrency: usize,
    pub retry_delays_ms: Vec<u64>,
    pub allow_multiple_uploads: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            auto_proceed: false,
            render_debounce_ms: c::DEFAULT_RENDER_DEBOUNCE_MS,
            progress_throttle_ms: c::DEFAULT_PROGRESS_THROTTLE_MS,
            upload_concurrency: c::DEFAULT_UPLOAD_CONCURRENCY,
            retry_delays_ms: c::DEFAULT_RETRY_DELAYS_MS.to_vec(),
            allow_multiple_uploads: c::DEFAULT_ALLOW_MULTIPLE_UPLOADS,
        }
    }
}

/// The full configuration surface: engine options, restriction policy, and
/// per-uploader option tables (spec's ambient config section).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub engine: EngineOptions,
    pub restrictions: RestrictionsConfig,
    pub xhr: XhrConfig,
    pub companion: CompanionConfig,
    pub meta: HashMap<String, Value>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            engine: EngineOptions::default(),
            restrictions: RestrictionsConfig::default(),
            xhr: XhrConfig::default(),
            companion: CompanionConfig::default(),
            meta: HashMap::new(),
        }
    }
}

impl Config {
    /// Load from `$CONVEYOR_HOME/config.ini`, falling back to defaults if
    /// the file is missing.
    pub fn from_config_file_or_default() -> Result<Self> {
        match Self::from_config_file() {
            Ok(config) => Ok(config),
            Err(_) => Ok(Self::default()),
        }
    }

    fn from_config_file() -> Result<Self> {
        let path = crate::home::config_file()
            .map_err(|e| Error::config_file_not_found(e.to_string()))?;
        let mut contents = String::new();
        File::open(&path)
            .map_err(|e| Error::config_file_not_found(e.to_string()))?
            .read_to_string(&mut contents)?;
        contents.parse()
    }

    pub fn write_to_config_file(&self) -> Result<()> {
        let path = crate::home::config_file()
            .map_err(|e| Error::config_file_not_found(e.to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(path)?;
        write!(file, "{}", self)?;
        Ok(())
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ini = Ini::new();

        ini.with_section(Some(c::ENGINE_SECTION))
            .set("auto_proceed", self.engine.auto_proceed.to_string())
            .set(
                "render_debounce_ms",
                self.engine.render_debounce_ms.to_string(),
            )
            .set(
                "progress_throttle_ms",
                self.engine.progress_throttle_ms.to_string(),
            )
            .set(
                "upload_concurrency",
                self.engine.upload_concurrency.to_string(),
            )
            .set(
                "allow_multiple_uploads",
                self.engine.allow_multiple_uploads.to_string(),
            );

        {
            let mut section = ini.with_section(Some(c::RESTRICTIONS_SECTION));
            for (key, value) in self.restrictions.iter() {
                section.set(key.clone(), value.clone());
            }
        }

        ini.with_section(Some(c::XHR_SECTION))
            .set("endpoint", self.xhr.endpoint.clone())
            .set("method", self.xhr.method.clone())
            .set("field_name", self.xhr.field_name.clone())
            .set("bundle", self.xhr.bundle.to_string())
            .set("with_credentials", self.xhr.with_credentials.to_string())
            .set("timeout_ms", self.xhr.timeout_ms.to_string());

        if let Some(url) = &self.companion.url {
            ini.with_section(Some(c::COMPANION_SECTION))
                .set("url", url.clone());
        }

        let mut bytes: Vec<u8> = vec![];
        let _ = ini.write_to(&mut bytes);
        write!(f, "{}", String::from_utf8_lossy(&bytes))
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(raw_ini: &str) -> Result<Self> {
        let ini = Ini::load_from_str(raw_ini)?;

        let engine_section: Dict = ini.section(Some(c::ENGINE_SECTION)).cloned().unwrap_or_default();
        let mut engine_store = GenericSettings::from(engine_section);
        let defaults = EngineOptions::default();
        let engine = EngineOptions {
            auto_proceed: engine_store
                .get_as_and_update("auto_proceed", defaults.auto_proceed)?,
            render_debounce_ms: engine_store
                .get_as_and_update("render_debounce_ms", defaults.render_debounce_ms)?,
            progress_throttle_ms: engine_store
                .get_as_and_update("progress_throttle_ms", defaults.progress_throttle_ms)?,
            upload_concurrency: engine_store
                .get_as_and_update("upload_concurrency", defaults.upload_concurrency)?,
            retry_delays_ms: defaults.retry_delays_ms,
            allow_multiple_uploads: engine_store
                .get_as_and_update("allow_multiple_uploads", defaults.allow_multiple_uploads)?,
        };

        let restrictions_section: Dict = ini
            .section(Some(c::RESTRICTIONS_SECTION))
            .cloned()
            .unwrap_or_default();
        let restrictions = RestrictionsConfig(restrictions_section);

        let xhr_section: Dict = ini.section(Some(c::XHR_SECTION)).cloned().unwrap_or_default();
        let mut xhr_store = GenericSettings::from(xhr_section);
        let xhr_defaults = XhrConfig::default();
        let xhr = XhrConfig {
            endpoint: xhr_store.get_and_update("endpoint", xhr_defaults.endpoint),
            method: xhr_store.get_and_update("method", xhr_defaults.method),
            field_name: xhr_store.get_and_update("field_name", xhr_defaults.field_name),
            bundle: xhr_store.get_as_and_update("bundle", xhr_defaults.bundle)?,
            with_credentials: xhr_store
                .get_as_and_update("with_credentials", xhr_defaults.with_credentials)?,
            timeout_ms: xhr_store.get_as_and_update("timeout_ms", xhr_defaults.timeout_ms)?,
            headers: HashMap::new(),
        };

        let companion_section: Dict = ini
            .section(Some(c::COMPANION_SECTION))
            .cloned()
            .unwrap_or_default();
        let companion = CompanionConfig {
            url: companion_section.get("url").cloned(),
            headers: HashMap::new(),
        };

        Ok(Config {
            engine,
            restrictions,
            xhr,
            companion,
            meta: HashMap::new(),
        })
    }
}

/// A bare `ConfigStore` over an arbitrary ini section, used for sections
/// that don't warrant their own named type.
#[derive(Clone, Debug, Default)]
struct GenericSettings(Dict);

impl From<Dict> for GenericSettings {
    fn from(dict: Dict) -> Self {
        GenericSettings(dict)
    }
}

impl ConfigStore for GenericSettings {
    fn store(&mut self) -> &mut Dict {
        &mut self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_when_sections_are_missing() {
        let config: Config = "".parse().unwrap();
        assert_eq!(config.engine.upload_concurrency, c::DEFAULT_UPLOAD_CONCURRENCY);
        assert_eq!(config.engine.allow_multiple_uploads, c::DEFAULT_ALLOW_MULTIPLE_UPLOADS);
        assert_eq!(config.xhr.field_name, c::DEFAULT_XHR_FIELD_NAME);
        assert!(config.companion.url.is_none());
    }

    #[test]
    fn parses_restrictions_section() {
        let ini_str = r#"
            [restrictions]
            max_file_size = 1000000
            max_number_of_files = 5
            allowed_file_types = .png, .jpg, image/*
        "#;
        let config: Config = ini_str.parse().unwrap();
        assert_eq!(config.restrictions.max_file_size(), Some(1_000_000));
        assert_eq!(config.restrictions.max_number_of_files(), Some(5));
        assert_eq!(
            config.restrictions.allowed_file_types(),
            Some(vec![".png".to_owned(), ".jpg".to_owned(), "image/*".to_owned()])
        );
    }

    #[test]
    fn rejects_malformed_integers() {
        let ini_str = r#"
            [engine]
            upload_concurrency = not-a-number
        "#;
        assert!(ini_str.parse::<Config>().is_err());
    }

    #[test]
    fn round_trips_through_display_and_from_str() {
        let mut config = Config::default();
        config.xhr.endpoint = "https://uploads.example.com".to_owned();
        config.engine.auto_proceed = true;

        let rendered = config.to_string();
        let reparsed: Config = rendered.parse().unwrap();
        assert_eq!(reparsed.xhr.endpoint, "https://uploads.example.com");
        assert!(reparsed.engine.auto_proceed);
    }

    #[test]
    fn config_store_merge_keeps_existing_keys() {
        let mut a = GenericSettings::from(Dict::from([("k".to_owned(), "a".to_owned())]));
        let mut b = GenericSettings::from(Dict::from([("k".to_owned(), "b".to_owned()), ("k2".to_owned(), "b2".to_owned())]));
        a.merge(&mut b);
        assert_eq!(a.store().get("k"), Some(&"a".to_owned()));
        assert_eq!(a.store().get("k2"), Some(&"b2".to_owned()));
    }
}
