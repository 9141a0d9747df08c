//! Tenant-wide harvest across every configured site

use crate::config::Config;
use crate::crawler::{RestContentStore, SiteFilter};
use crate::enrichment::GraphEnrichmentClient;
use crate::harvest::site::{HarvestSettings, SiteHarvestReport, SiteHarvester};
use crate::http::{
    build_http_client, EnvTokenProvider, RetryPolicy, ThrottledClient, TokenCache, TokenProvider,
};
use crate::storage::{open_shared, with_storage, SharedStorage, Storage, TargetSiteRecord};
use crate::{HarvestError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Builds the harvester of one target site
#[async_trait]
pub trait SiteHarvesterFactory: Send + Sync + 'static {
    async fn build(&self, site: &TargetSiteRecord) -> Result<SiteHarvester>;
}

/// Outcome of a tenant harvest
#[derive(Debug, Default)]
pub struct TenantHarvestReport {
    /// Reports of sites that ran to the end, ordered by URL
    pub sites: Vec<SiteHarvestReport>,
    /// Sites that failed to build or run, with the reason
    pub failures: Vec<(String, String)>,
}

/// Harvests every target site concurrently
///
/// One site failing never affects the others.
pub struct TenantHarvester<F> {
    factory: Arc<F>,
    storage: SharedStorage,
}

impl<F: SiteHarvesterFactory> TenantHarvester<F> {
    pub fn new(factory: F, storage: SharedStorage) -> Self {
        Self {
            factory: Arc::new(factory),
            storage,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<TenantHarvestReport> {
        let sites = with_storage(&self.storage, |s| s.list_target_sites()).await?;
        tracing::info!("Harvesting {} target sites", sites.len());

        let mut set = JoinSet::new();
        for site in sites {
            let factory = Arc::clone(&self.factory);
            let cancel = cancel.child_token();
            set.spawn(async move {
                let url = site.root_url.clone();
                // inner task so a panic is attributed to its site
                let outcome = tokio::spawn(async move {
                    let harvester = factory.build(&site).await?;
                    harvester.run(cancel).await
                })
                .await;
                (url, outcome)
            });
        }

        let mut report = TenantHarvestReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(Ok(site)))) => report.sites.push(site),
                Ok((url, Ok(Err(e)))) => {
                    tracing::error!("Site {} failed: {}", url, e);
                    report.failures.push((url, e.to_string()));
                }
                Ok((url, Err(e))) => {
                    tracing::error!("Site {} task aborted: {}", url, e);
                    report.failures.push((url, e.to_string()));
                }
                Err(e) => tracing::error!("Site task failed: {}", e),
            }
        }

        report.sites.sort_by(|a, b| a.site_url.cmp(&b.site_url));
        report.failures.sort();
        tracing::info!(
            "Tenant harvest done: {} sites harvested, {} failed",
            report.sites.len(),
            report.failures.len()
        );
        Ok(report)
    }
}

/// Builds harvesters that talk to the REST content store and enrichment API
pub struct RestHarvesterFactory {
    config: Arc<Config>,
    config_hash: String,
    tokens: Option<Arc<dyn TokenProvider>>,
}

impl RestHarvesterFactory {
    /// Uses the environment token provider when `[auth]` is configured
    pub fn new(config: Arc<Config>, config_hash: impl Into<String>) -> Self {
        let tokens = config.auth.as_ref().map(|auth| {
            Arc::new(EnvTokenProvider::new(
                auth.token_env.clone(),
                chrono::Duration::minutes(auth.token_lifetime_minutes),
            )) as Arc<dyn TokenProvider>
        });
        Self {
            config,
            config_hash: config_hash.into(),
            tokens,
        }
    }

    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(provider);
        self
    }

    fn clients(&self, site_url: &str) -> Result<(ThrottledClient, ThrottledClient)> {
        let http = build_http_client(&self.config.http).map_err(|source| HarvestError::Http {
            url: site_url.to_string(),
            source,
        })?;
        let policy = RetryPolicy::from_config(&self.config.http);

        let mut content = ThrottledClient::new(http.clone(), policy);
        let mut enrichment = ThrottledClient::new(http, policy.without_retries());

        if let (Some(auth), Some(provider)) = (&self.config.auth, &self.tokens) {
            content = content.with_tokens(Arc::new(TokenCache::new(
                Arc::clone(provider),
                auth.content_audience.clone(),
            )));
            enrichment = enrichment.with_tokens(Arc::new(TokenCache::new(
                Arc::clone(provider),
                auth.enrichment_audience.clone(),
            )));
        }
        Ok((content, enrichment))
    }
}

#[async_trait]
impl SiteHarvesterFactory for RestHarvesterFactory {
    async fn build(&self, site: &TargetSiteRecord) -> Result<SiteHarvester> {
        let filter = SiteFilter::from_json_lenient(&site.root_url, site.filter_json.as_deref());

        // each site gets its own connection
        let path = PathBuf::from(&self.config.output.database_path);
        let storage = tokio::task::spawn_blocking(move || open_shared(&path)).await??;

        let (content, enrichment) = self.clients(&site.root_url)?;
        let api = GraphEnrichmentClient::new(enrichment.clone(), &self.config.enrichment.base_url)
            .with_batch_endpoint(self.config.enrichment.use_batch_endpoint);

        Ok(SiteHarvester::new(
            &site.root_url,
            filter,
            Arc::new(RestContentStore::new(content.clone())),
            Arc::new(api),
            storage,
            HarvestSettings::from_config(&self.config),
        )
        .with_config_hash(&self.config_hash)
        .with_client_counters("content", content.counters())
        .with_client_counters("enrichment", enrichment.counters()))
    }
}
