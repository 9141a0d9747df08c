use crate::config::types::{
    AuthConfig, Config, ContentStoreConfig, EnrichmentConfig, HarvestConfig, HttpConfig,
    OutputConfig, SiteEntry,
};
use crate::enrichment::MAX_BATCH_SUB_REQUESTS;
use crate::ConfigError;
use url::Url;

/// Largest page the content store will serve
pub const MAX_PAGE_SIZE: u32 = 5_000;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_harvest_config(&config.harvest)?;
    validate_http_config(&config.http)?;
    validate_content_store_config(&config.content_store)?;
    validate_enrichment_config(&config.enrichment, &config.harvest)?;
    if let Some(auth) = &config.auth {
        validate_auth_config(auth)?;
    }
    validate_output_config(&config.output)?;
    validate_sites(&config.sites)?;
    Ok(())
}

/// Validates harvest pipeline tuning
fn validate_harvest_config(config: &HarvestConfig) -> Result<(), ConfigError> {
    if config.discovery_batch_size < 1 {
        return Err(ConfigError::Validation(format!(
            "discovery_batch_size must be >= 1, got {}",
            config.discovery_batch_size
        )));
    }

    if config.enrichment_chunk_size < 1 {
        return Err(ConfigError::Validation(format!(
            "enrichment_chunk_size must be >= 1, got {}",
            config.enrichment_chunk_size
        )));
    }

    if config.max_concurrent_chunks < 1 || config.max_concurrent_chunks > 64 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_chunks must be between 1 and 64, got {}",
            config.max_concurrent_chunks
        )));
    }

    if config.drain_poll_interval_ms < 10 {
        return Err(ConfigError::Validation(format!(
            "drain_poll_interval_ms must be >= 10ms, got {}ms",
            config.drain_poll_interval_ms
        )));
    }

    if config.status_interval_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "status_interval_ms must be >= 100ms, got {}ms",
            config.status_interval_ms
        )));
    }

    if config.crawl_queue_capacity < 1 {
        return Err(ConfigError::Validation(
            "crawl_queue_capacity must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates throttled client settings
fn validate_http_config(config: &HttpConfig) -> Result<(), ConfigError> {
    if config.backoff_step_ms == 0 {
        return Err(ConfigError::Validation(
            "backoff_step_ms must be > 0".to_string(),
        ));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be > 0".to_string(),
        ));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_content_store_config(config: &ContentStoreConfig) -> Result<(), ConfigError> {
    if config.page_size < 1 || config.page_size > MAX_PAGE_SIZE {
        return Err(ConfigError::Validation(format!(
            "page_size must be between 1 and {}, got {}",
            MAX_PAGE_SIZE, config.page_size
        )));
    }
    Ok(())
}

/// Validates the enrichment endpoint and its interaction with chunking
fn validate_enrichment_config(
    config: &EnrichmentConfig,
    harvest: &HarvestConfig,
) -> Result<(), ConfigError> {
    validate_http_url("enrichment base_url", &config.base_url)?;

    // Two sub-requests (analytics + versions) per document
    if config.use_batch_endpoint && harvest.enrichment_chunk_size * 2 > MAX_BATCH_SUB_REQUESTS {
        return Err(ConfigError::Validation(format!(
            "enrichment_chunk_size must be <= {} when use_batch_endpoint is set, got {}",
            MAX_BATCH_SUB_REQUESTS / 2,
            harvest.enrichment_chunk_size
        )));
    }

    Ok(())
}

fn validate_auth_config(config: &AuthConfig) -> Result<(), ConfigError> {
    if config.token_env.is_empty() {
        return Err(ConfigError::Validation(
            "token_env cannot be empty".to_string(),
        ));
    }

    if config.token_lifetime_minutes < 6 {
        return Err(ConfigError::Validation(format!(
            "token_lifetime_minutes must be >= 6, got {}",
            config.token_lifetime_minutes
        )));
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
    Ok(())
}

/// Validates configured sites and their list filters
fn validate_sites(sites: &[SiteEntry]) -> Result<(), ConfigError> {
    for site in sites {
        validate_http_url("site url", &site.url)?;

        for list in &site.lists {
            if list.title.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Site '{}' has a list filter with an empty title",
                    site.url
                )));
            }
            for folder in &list.folders {
                if folder.starts_with('/') || folder.ends_with('/') || folder.contains("//") {
                    return Err(ConfigError::Validation(format!(
                        "Folder '{}' in list '{}' must be a relative path without leading or trailing '/'",
                        folder, list.title
                    )));
                }
            }
        }
    }
    Ok(())
}

fn validate_http_url(what: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", what, value, e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::Validation(format!(
            "{} '{}' must use HTTP(S) scheme",
            what, value
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::filter::ListFilter;

    fn create_valid_config() -> Config {
        Config {
            harvest: HarvestConfig::default(),
            http: HttpConfig::default(),
            content_store: ContentStoreConfig::default(),
            enrichment: EnrichmentConfig {
                base_url: "https://graph.example.com/v1.0".to_string(),
                use_batch_endpoint: false,
            },
            auth: None,
            output: OutputConfig {
                database_path: "./harvest.db".to_string(),
            },
            sites: vec![SiteEntry {
                url: "https://tenant.example.com/sites/hr".to_string(),
                lists: vec![],
            }],
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&create_valid_config()).is_ok());
    }

    #[test]
    fn test_page_size_ceiling() {
        let mut config = create_valid_config();
        config.content_store.page_size = 5_001;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::Validation(_))
        ));

        config.content_store.page_size = 5_000;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let mut config = create_valid_config();
        config.harvest.enrichment_chunk_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_batch_endpoint_limits_chunk_size() {
        let mut config = create_valid_config();
        config.enrichment.use_batch_endpoint = true;
        config.harvest.enrichment_chunk_size = 11;
        assert!(validate(&config).is_err());

        config.harvest.enrichment_chunk_size = 10;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_site_url() {
        let mut config = create_valid_config();
        config.sites[0].url = "not a url".to_string();
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl(_))));

        config.sites[0].url = "ftp://tenant.example.com/sites/hr".to_string();
        assert!(matches!(
            validate(&config),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_invalid_folder_filter() {
        let mut config = create_valid_config();
        config.sites[0].lists.push(ListFilter {
            title: "Documents".to_string(),
            folders: vec!["/Policies".to_string()],
        });
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_empty_database_path() {
        let mut config = create_valid_config();
        config.output.database_path.clear();
        assert!(validate(&config).is_err());
    }
}
