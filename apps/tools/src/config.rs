#[derive(Debug)]
pub struct Settings {
    pub database_url: String,
    pub provider_timeout_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/marketplace.db".into(),
            provider_timeout_seconds: 10,
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = std::fs::read_to_string("marketplace.toml") {
        if let Ok(file_cfg) = raw.parse::<toml::Table>() {
            if let Some(v) = file_cfg.get("database_url").and_then(|v| v.as_str()) {
                settings.database_url = v.to_string();
            }
            if let Some(v) = file_cfg
                .get("provider_timeout_seconds")
                .and_then(|v| v.as_integer())
            {
                settings.provider_timeout_seconds = v.max(0) as u64;
            }
        }
    }

    if let Ok(v) = std::env::var("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Ok(v) = std::env::var("APP__PROVIDER_TIMEOUT_SECONDS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.provider_timeout_seconds = parsed;
        }
    }

    settings
}

/// Accepts a bare file path as a convenience and turns it into a sqlite
/// url; full urls pass through untouched.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}
