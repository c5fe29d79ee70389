use std::env;
use thiserror::Error;

const DEFAULT_TABLE: &str = "cars";
const DEFAULT_CDN_FOLDER: &str = "inventory";
const DEFAULT_MAX_IMAGES: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Everything a sync run needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub sheet_url: String,
    pub store: StoreConfig,
    pub cdn: CdnConfig,
    pub http: HttpConfig,
    pub max_images_per_record: usize,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub base_url: String,
    pub service_key: String,
    pub table: String,
}

#[derive(Debug, Clone)]
pub struct CdnConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub folder: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            connect_timeout_secs: 5,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so tests never touch the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &'static str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let service_key = get("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|| get("SUPABASE_SERVICE_KEY"))
            .or_else(|| get("SUPABASE_KEY"))
            .ok_or(ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY"))?;

        let store = StoreConfig {
            base_url: required("SUPABASE_URL")?.trim_end_matches('/').to_string(),
            service_key,
            table: get("INVENTORY_TABLE").unwrap_or_else(|| DEFAULT_TABLE.to_string()),
        };

        let cdn = CdnConfig {
            cloud_name: required("CLOUDINARY_CLOUD_NAME")?,
            api_key: required("CLOUDINARY_API_KEY")?,
            api_secret: required("CLOUDINARY_API_SECRET")?,
            folder: get("CDN_FOLDER")
                .map(|value| value.trim_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_CDN_FOLDER.to_string()),
        };

        let defaults = HttpConfig::default();
        let http = HttpConfig {
            timeout_secs: parse_number("HTTP_TIMEOUT_SECS", get("HTTP_TIMEOUT_SECS"))?
                .unwrap_or(defaults.timeout_secs),
            connect_timeout_secs: parse_number(
                "HTTP_CONNECT_TIMEOUT_SECS",
                get("HTTP_CONNECT_TIMEOUT_SECS"),
            )?
            .unwrap_or(defaults.connect_timeout_secs),
        };

        let max_images_per_record =
            match parse_number::<usize>("MAX_IMAGES_PER_RECORD", get("MAX_IMAGES_PER_RECORD"))? {
                Some(0) => {
                    return Err(ConfigError::Invalid {
                        name: "MAX_IMAGES_PER_RECORD",
                        value: "0".into(),
                    });
                }
                Some(value) => value,
                None => DEFAULT_MAX_IMAGES,
            };

        Ok(Self {
            sheet_url: required("SHEET_EXPORT_URL")?,
            store,
            cdn,
            http,
            max_images_per_record,
            dry_run: get("SYNC_DRY_RUN").as_deref().is_some_and(parse_bool),
        })
    }
}

fn parse_number<T: std::str::FromStr>(
    name: &'static str,
    raw: Option<String>,
) -> Result<Option<T>, ConfigError> {
    match raw {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(None),
    }
}

pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("SHEET_EXPORT_URL", "https://sheets.example/export?format=csv"),
            ("SUPABASE_URL", "https://db.example/"),
            ("SUPABASE_KEY", "service-key"),
            ("CLOUDINARY_CLOUD_NAME", "demo"),
            ("CLOUDINARY_API_KEY", "123"),
            ("CLOUDINARY_API_SECRET", "shh"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<SyncConfig, ConfigError> {
        SyncConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_apply_when_optional_vars_absent() {
        let cfg = load(&base_env()).expect("config");
        assert_eq!(cfg.store.base_url, "https://db.example");
        assert_eq!(cfg.store.service_key, "service-key");
        assert_eq!(cfg.store.table, "cars");
        assert_eq!(cfg.cdn.folder, "inventory");
        assert_eq!(cfg.max_images_per_record, 12);
        assert_eq!(cfg.http, HttpConfig::default());
        assert!(!cfg.dry_run);
    }

    #[test]
    fn service_role_key_takes_precedence() {
        let mut env = base_env();
        env.insert("SUPABASE_SERVICE_ROLE_KEY", "role-key");
        let cfg = load(&env).expect("config");
        assert_eq!(cfg.store.service_key, "role-key");
    }

    #[test]
    fn missing_sheet_url_is_reported() {
        let mut env = base_env();
        env.remove("SHEET_EXPORT_URL");
        assert_eq!(
            load(&env).unwrap_err(),
            ConfigError::Missing("SHEET_EXPORT_URL")
        );
    }

    #[test]
    fn zero_image_cap_is_rejected() {
        let mut env = base_env();
        env.insert("MAX_IMAGES_PER_RECORD", "0");
        assert!(matches!(
            load(&env).unwrap_err(),
            ConfigError::Invalid {
                name: "MAX_IMAGES_PER_RECORD",
                ..
            }
        ));
    }

    #[test]
    fn dry_run_and_timeouts_are_parsed() {
        let mut env = base_env();
        env.insert("SYNC_DRY_RUN", "Yes");
        env.insert("HTTP_TIMEOUT_SECS", "40");
        env.insert("CDN_FOLDER", "/showroom/");
        let cfg = load(&env).expect("config");
        assert!(cfg.dry_run);
        assert_eq!(cfg.http.timeout_secs, 40);
        assert_eq!(cfg.http.connect_timeout_secs, 5);
        assert_eq!(cfg.cdn.folder, "showroom");
    }

    #[test]
    fn non_numeric_timeout_is_invalid() {
        let mut env = base_env();
        env.insert("HTTP_TIMEOUT_SECS", "soon");
        assert!(load(&env).is_err());
    }
}
