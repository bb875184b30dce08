use crate::config::types::{
    ApiConfig, Config, CrawlerConfig, FeedConfig, OutputConfig, TransportConfig, UserAgentConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_transport_config(&config.transport)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_api_config(&config.api)?;
    validate_feed_config(&config.feed)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates discovery and budget settings
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.seeds.is_empty() {
        return Err(ConfigError::Validation(
            "at least one seed account is required".to_string(),
        ));
    }

    for name in config.seeds.iter().chain(config.seed_pool.iter()) {
        validate_account_name(name)?;
    }

    if config.max_accounts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_accounts must be >= 1, got {}",
            config.max_accounts
        )));
    }

    if config.kinds.is_empty() {
        return Err(ConfigError::Validation(
            "kinds must name at least one interaction kind".to_string(),
        ));
    }

    if config.max_pages_per_kind < 1 {
        return Err(ConfigError::Validation(format!(
            "max_pages_per_kind must be >= 1, got {}",
            config.max_pages_per_kind
        )));
    }

    Ok(())
}

/// Validates pacing and retry settings
fn validate_transport_config(config: &TransportConfig) -> Result<(), ConfigError> {
    if config.jitter_ms > config.base_pause_ms {
        return Err(ConfigError::Validation(format!(
            "jitter_ms ({}) cannot exceed base_pause_ms ({})",
            config.jitter_ms, config.base_pause_ms
        )));
    }

    if !(config.backoff_factor >= 1.0) {
        return Err(ConfigError::Validation(format!(
            "backoff_factor must be >= 1.0, got {}",
            config.backoff_factor
        )));
    }

    if config.backoff_cap_ms < config.backoff_base_ms {
        return Err(ConfigError::Validation(format!(
            "backoff_cap_ms ({}) must be >= backoff_base_ms ({})",
            config.backoff_cap_ms, config.backoff_base_ms
        )));
    }

    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "timeout_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

fn validate_api_config(config: &ApiConfig) -> Result<(), ConfigError> {
    validate_base_url("api.base_url", &config.base_url)?;

    if config.per_page < 1 || config.per_page > 100 {
        return Err(ConfigError::Validation(format!(
            "api.per_page must be between 1 and 100, got {}",
            config.per_page
        )));
    }

    Ok(())
}

fn validate_feed_config(config: &FeedConfig) -> Result<(), ConfigError> {
    validate_base_url("feed.base_url", &config.base_url)?;

    if !config.kinds.is_empty() && config.cookies_file.is_none() {
        return Err(ConfigError::Validation(
            "feed.kinds requires feed.cookies_file".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.visited_log_path.is_empty() {
        return Err(ConfigError::Validation(
            "visited_log_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates an account name used as a seed
fn validate_account_name(name: &str) -> Result<(), ConfigError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Validation(
            "account names cannot be empty".to_string(),
        ));
    }

    if trimmed.contains('/') || trimmed.contains('?') || trimmed.contains('#') {
        return Err(ConfigError::Validation(format!(
            "account name '{}' contains a reserved character",
            name
        )));
    }

    Ok(())
}

/// Base URLs must be absolute http(s) URLs
fn validate_base_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", field, value, e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} must use http or https, got '{}'",
            field,
            url.scheme()
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
