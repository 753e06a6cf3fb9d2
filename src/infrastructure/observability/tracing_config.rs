use super::init_tracing::default_filter;

/// Subscriber options resolved from settings and the process environment.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub environment: String,
    pub json_format: bool,
    pub filter: String,
}

impl TracingConfig {
    pub fn new(environment: impl Into<String>, json_format: bool, level: Option<&str>) -> Self {
        let filter = match level {
            Some(level) if !level.trim().is_empty() => {
                format!("{},invoice_copilot={},tower_http=debug", level, level)
            }
            _ => default_filter().to_string(),
        };
        Self {
            environment: environment.into(),
            json_format,
            filter,
        }
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::new(
            std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "local".to_string()),
            std::env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            None,
        )
    }
}
