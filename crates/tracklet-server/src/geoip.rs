//! HTTP GeoIP resolution with a TTL + capacity bounded cache.
//!
//! Resolution never fails the request: any provider error, timeout or
//! unusable response degrades to an all-`None` [`GeoData`], and that
//! negative result is cached for the same TTL so a dead provider is not
//! hammered once per event.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use tracklet_core::config::Config;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoData {
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

#[async_trait]
pub trait GeoProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn lookup(&self, ip: &str) -> Result<GeoData>;
}

#[derive(Deserialize)]
struct IpWhoIsResponse {
    success: bool,
    country_code: Option<String>,
    region: Option<String>,
    city: Option<String>,
}

/// Primary provider: `https://ipwho.is/{ip}`.
pub struct IpWhoIs {
    client: reqwest::Client,
}

#[async_trait]
impl GeoProvider for IpWhoIs {
    fn name(&self) -> &'static str {
        "ipwho.is"
    }

    async fn lookup(&self, ip: &str) -> Result<GeoData> {
        let resp: IpWhoIsResponse = self
            .client
            .get(format!("https://ipwho.is/{ip}"))
            .send()
            .await?
            .json()
            .await?;
        if !resp.success {
            anyhow::bail!("ipwho.is reported failure for {ip}");
        }
        Ok(GeoData {
            country: resp.country_code.filter(|c| !c.is_empty()),
            region: resp.region.filter(|r| !r.is_empty()),
            city: resp.city.filter(|c| !c.is_empty()),
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    country_code: Option<String>,
    region_name: Option<String>,
    city: Option<String>,
}

/// Fallback provider: `http://ip-api.com/json/{ip}`.
pub struct IpApiCom {
    client: reqwest::Client,
}

#[async_trait]
impl GeoProvider for IpApiCom {
    fn name(&self) -> &'static str {
        "ip-api.com"
    }

    async fn lookup(&self, ip: &str) -> Result<GeoData> {
        let resp: IpApiResponse = self
            .client
            .get(format!(
                "http://ip-api.com/json/{ip}?fields=status,countryCode,regionName,city"
            ))
            .send()
            .await?
            .json()
            .await?;
        if resp.status != "success" {
            anyhow::bail!("ip-api.com reported {} for {ip}", resp.status);
        }
        Ok(GeoData {
            country: resp.country_code.filter(|c| !c.is_empty()),
            region: resp.region_name.filter(|r| !r.is_empty()),
            city: resp.city.filter(|c| !c.is_empty()),
        })
    }
}

struct CacheEntry {
    geo: GeoData,
    expires_at: Instant,
    seq: u64,
}

/// TTL + capacity bounded map with recency eviction.
///
/// Recency is tracked with a monotonically increasing access sequence and a
/// `BTreeMap` index from sequence to key, so eviction pops the least
/// recently used entry without scanning.
struct GeoCacheInner {
    entries: HashMap<String, CacheEntry>,
    by_recency: BTreeMap<u64, String>,
    next_seq: u64,
}

pub struct GeoCache {
    inner: Mutex<GeoCacheInner>,
    ttl: Duration,
    capacity: usize,
}

impl GeoCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(GeoCacheInner {
                entries: HashMap::new(),
                by_recency: BTreeMap::new(),
                next_seq: 0,
            }),
            ttl,
            capacity,
        }
    }

    pub async fn get(&self, ip: &str) -> Option<GeoData> {
        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq;
        let entry = inner.entries.get_mut(ip)?;
        if entry.expires_at <= Instant::now() {
            let old_seq = entry.seq;
            inner.entries.remove(ip);
            inner.by_recency.remove(&old_seq);
            return None;
        }
        let old_seq = entry.seq;
        entry.seq = seq;
        let geo = entry.geo.clone();
        inner.by_recency.remove(&old_seq);
        inner.by_recency.insert(seq, ip.to_string());
        inner.next_seq += 1;
        Some(geo)
    }

    pub async fn put(&self, ip: &str, geo: GeoData) {
        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        if let Some(old) = inner.entries.insert(
            ip.to_string(),
            CacheEntry {
                geo,
                expires_at: Instant::now() + self.ttl,
                seq,
            },
        ) {
            inner.by_recency.remove(&old.seq);
        }
        inner.by_recency.insert(seq, ip.to_string());

        while inner.entries.len() > self.capacity {
            let Some((&oldest_seq, _)) = inner.by_recency.iter().next() else {
                break;
            };
            if let Some(key) = inner.by_recency.remove(&oldest_seq) {
                inner.entries.remove(&key);
            }
        }
    }

    /// Drop expired entries; called by the periodic sweep task.
    pub async fn evict(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let expired: Vec<(String, u64)> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, e)| (k.clone(), e.seq))
            .collect();
        for (key, seq) in expired {
            inner.entries.remove(&key);
            inner.by_recency.remove(&seq);
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }
}

pub struct GeoResolver {
    providers: Vec<Box<dyn GeoProvider>>,
    cache: GeoCache,
    provider_timeout: Duration,
}

impl GeoResolver {
    pub fn new(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.geo_provider_timeout())
            .build()
            .unwrap_or_default();
        Self::with_providers(
            vec![
                Box::new(IpWhoIs {
                    client: client.clone(),
                }),
                Box::new(IpApiCom { client }),
            ],
            config,
        )
    }

    /// Inject providers directly; used by tests.
    pub fn with_providers(providers: Vec<Box<dyn GeoProvider>>, config: &Config) -> Self {
        Self {
            providers,
            cache: GeoCache::new(config.geo_cache_ttl(), config.geo_cache_capacity),
            provider_timeout: config.geo_provider_timeout(),
        }
    }

    /// Resolve an IP to geo data. Providers run in priority order; the
    /// first response carrying a country wins.
    pub async fn resolve(&self, ip: Option<&str>) -> GeoData {
        let Some(ip) = ip.filter(|ip| !ip.is_empty()) else {
            return GeoData::default();
        };
        if let Some(cached) = self.cache.get(ip).await {
            return cached;
        }

        for provider in &self.providers {
            match tokio::time::timeout(self.provider_timeout, provider.lookup(ip)).await {
                Ok(Ok(geo)) if geo.country.is_some() => {
                    self.cache.put(ip, geo.clone()).await;
                    return geo;
                }
                Ok(Ok(_)) => {
                    debug!(provider = provider.name(), ip, "geo response without country");
                }
                Ok(Err(e)) => {
                    debug!(provider = provider.name(), ip, error = %e, "geo lookup failed");
                }
                Err(_) => {
                    debug!(provider = provider.name(), ip, "geo lookup timed out");
                }
            }
        }

        // Negative cache: remember that this IP is unresolvable.
        self.cache.put(ip, GeoData::default()).await;
        GeoData::default()
    }

    pub async fn sweep(&self) {
        self.cache.evict().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticProvider(GeoData);

    #[async_trait]
    impl GeoProvider for StaticProvider {
        fn name(&self) -> &'static str {
            "static"
        }
        async fn lookup(&self, _ip: &str) -> Result<GeoData> {
            Ok(self.0.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl GeoProvider for FailingProvider {
        fn name(&self) -> &'static str {
            "failing"
        }
        async fn lookup(&self, _ip: &str) -> Result<GeoData> {
            anyhow::bail!("unreachable")
        }
    }

    struct CountingProvider {
        geo: GeoData,
        calls: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl GeoProvider for CountingProvider {
        fn name(&self) -> &'static str {
            "counting"
        }
        async fn lookup(&self, _ip: &str) -> Result<GeoData> {
            self.calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(self.geo.clone())
        }
    }

    fn config() -> Config {
        Config {
            port: 0,
            data_dir: ".".to_string(),
            session_expiry_minutes: 30,
            rate_limit_max_requests: 60,
            rate_limit_window_secs: 60,
            geo_cache_ttl_secs: 3600,
            geo_cache_capacity: 2,
            geo_provider_timeout_ms: 100,
            spike_cooldown_secs: 900,
            duckdb_memory_limit: "1GB".to_string(),
        }
    }

    fn berlin() -> GeoData {
        GeoData {
            country: Some("DE".to_string()),
            region: Some("Berlin".to_string()),
            city: Some("Berlin".to_string()),
        }
    }

    #[tokio::test]
    async fn none_ip_resolves_to_empty() {
        let resolver = GeoResolver::with_providers(vec![Box::new(FailingProvider)], &config());
        assert_eq!(resolver.resolve(None).await, GeoData::default());
    }

    #[tokio::test]
    async fn fallback_provider_wins_when_first_fails() {
        let resolver = GeoResolver::with_providers(
            vec![Box::new(FailingProvider), Box::new(StaticProvider(berlin()))],
            &config(),
        );
        assert_eq!(resolver.resolve(Some("203.0.113.1")).await, berlin());
    }

    #[tokio::test]
    async fn countryless_response_falls_through() {
        let resolver = GeoResolver::with_providers(
            vec![
                Box::new(StaticProvider(GeoData::default())),
                Box::new(StaticProvider(berlin())),
            ],
            &config(),
        );
        assert_eq!(resolver.resolve(Some("203.0.113.1")).await, berlin());
    }

    #[tokio::test]
    async fn negative_result_is_cached() {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let resolver = GeoResolver::with_providers(
            vec![Box::new(CountingProvider {
                geo: GeoData::default(),
                calls: calls.clone(),
            })],
            &config(),
        );

        resolver.resolve(Some("203.0.113.9")).await;
        resolver.resolve(Some("203.0.113.9")).await;
        // Second resolve must come from the negative cache.
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cache_evicts_least_recently_used_at_capacity() {
        let cache = GeoCache::new(Duration::from_secs(60), 2);
        cache.put("a", berlin()).await;
        cache.put("b", berlin()).await;
        // Touch "a" so "b" becomes the eviction candidate.
        cache.get("a").await;
        cache.put("c", berlin()).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get("a").await.is_some());
        assert!(cache.get("b").await.is_none());
        assert!(cache.get("c").await.is_some());
    }

    #[tokio::test]
    async fn expired_entries_are_swept() {
        let cache = GeoCache::new(Duration::from_millis(5), 10);
        cache.put("a", berlin()).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.evict().await;
        assert_eq!(cache.len().await, 0);
    }
}
