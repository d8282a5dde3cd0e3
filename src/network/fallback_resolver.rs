//! Discovery of alternate API domains for when the primary one is unreachable.
//!
//! Candidates come from DNS TXT records. A chosen fallback is used until it expires; every
//! successful request through it extends the expiry. DNS lookups are rate limited per endpoint.
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{hashing::djb2, storage::KeyValueStorage, Result};

use super::{dns, Endpoint};

pub(crate) const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub(crate) const COOLDOWN: Duration = Duration::from_secs(4 * 60 * 60);
const MAX_PREVIOUS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct FallbackInfoEntry {
    pub url: String,
    /// Fallback URLs used before `url`, oldest first.
    #[serde(default)]
    pub previous: Vec<String>,
    /// Milliseconds since epoch.
    pub expiry_time: u64,
}

type FallbackInfo = HashMap<Endpoint, FallbackInfoEntry>;

pub(crate) fn storage_key(sdk_key: &str) -> String {
    format!("statsig.network_fallback.{}", djb2(sdk_key))
}

/// Whether a request failure looks like the domain is blocked rather than the request being bad.
pub(crate) fn is_domain_failure(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

#[derive(Default)]
struct ResolverState {
    /// Lazily loaded from storage.
    info: Option<FallbackInfo>,
    dns_query_cooldowns: HashMap<Endpoint, u64>,
}

pub(crate) struct FallbackResolver {
    storage: Arc<dyn KeyValueStorage>,
    storage_key: String,
    dns_url: String,
    /// Fallback URLs are this URL with the host replaced.
    default_api_url: String,
    state: Mutex<ResolverState>,
}

impl FallbackResolver {
    pub(crate) fn new(
        sdk_key: &str,
        storage: Arc<dyn KeyValueStorage>,
        dns_url: impl Into<String>,
        default_api_url: impl Into<String>,
    ) -> FallbackResolver {
        FallbackResolver {
            storage,
            storage_key: storage_key(sdk_key),
            dns_url: dns_url.into(),
            default_api_url: default_api_url.into(),
            state: Mutex::new(ResolverState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ResolverState> {
        self.state
            .lock()
            .expect("thread holding fallback lock should not panic")
    }

    fn load(&self, state: &mut ResolverState) {
        if state.info.is_none() {
            state.info = Some(
                self.storage
                    .get(&self.storage_key)
                    .and_then(|raw| serde_json::from_value(raw).ok())
                    .unwrap_or_default(),
            );
        }
    }

    fn save(&self, info: &FallbackInfo) {
        match serde_json::to_value(info) {
            Ok(value) => self.storage.set(&self.storage_key, value),
            Err(err) => log::warn!(target: "statsig", "failed to serialize fallback info: {err}"),
        }
    }

    /// Fallback URL to use for `endpoint`, if one is set and hasn't expired. Expired entries are
    /// discarded.
    pub(crate) fn active_fallback_url(&self, endpoint: Endpoint, now: u64) -> Option<String> {
        let mut state = self.lock();
        self.load(&mut state);
        let info = state.info.as_mut()?;
        let entry = info.get(&endpoint)?;
        if now > entry.expiry_time {
            log::debug!(target: "statsig", endpoint = endpoint.as_str(); "fallback url expired");
            info.remove(&endpoint);
            self.save(info);
            return None;
        }
        Some(entry.url.clone())
    }

    /// Extend the expiry of the active fallback after a successful request through it.
    pub(crate) fn bump_expiry(&self, endpoint: Endpoint, now: u64) {
        let mut state = self.lock();
        self.load(&mut state);
        let Some(info) = state.info.as_mut() else {
            return;
        };
        if let Some(entry) = info.get_mut(&endpoint) {
            entry.expiry_time = now + DEFAULT_TTL.as_millis() as u64;
            self.save(info);
        }
    }

    /// Query DNS for a new fallback URL unless `endpoint` is cooling down. Returns whether a new
    /// fallback was selected.
    pub(crate) async fn try_fetch_updated_fallback_info(
        &self,
        http: &reqwest::Client,
        endpoint: Endpoint,
        now: u64,
    ) -> Result<bool> {
        {
            let mut state = self.lock();
            if state
                .dns_query_cooldowns
                .get(&endpoint)
                .is_some_and(|cooldown| now < *cooldown)
            {
                return Ok(false);
            }
            state
                .dns_query_cooldowns
                .insert(endpoint, now + COOLDOWN.as_millis() as u64);
        }

        let records = dns::fetch_txt_records(http, &self.dns_url).await?;
        self.handle_txt_records(endpoint, &records, now)
    }

    pub(crate) fn handle_txt_records(&self, endpoint: Endpoint, records: &[String], now: u64) -> Result<bool> {
        let urls = parse_urls_from_records(records, endpoint, &self.default_api_url)?;

        let mut state = self.lock();
        self.load(&mut state);
        let info = state.info.get_or_insert_with(HashMap::new);
        let Some(new_url) = pick_new_fallback_url(info.get(&endpoint), &urls) else {
            return Ok(false);
        };

        let mut previous = Vec::new();
        if let Some(current) = info.get(&endpoint) {
            previous.extend(current.previous.iter().cloned());
            previous.push(current.url.clone());
        }
        if previous.len() > MAX_PREVIOUS {
            previous.drain(..previous.len() - MAX_PREVIOUS);
        }

        log::debug!(target: "statsig", endpoint = endpoint.as_str(), url = new_url.as_str(); "selected fallback url");
        info.insert(
            endpoint,
            FallbackInfoEntry {
                url: new_url,
                previous,
                expiry_time: now + DEFAULT_TTL.as_millis() as u64,
            },
        );
        self.save(info);
        Ok(true)
    }
}

/// Candidate URLs for `endpoint`: its URL under `api_url` with the host replaced by each matching
/// record.
fn parse_urls_from_records(records: &[String], endpoint: Endpoint, api_url: &str) -> Result<Vec<String>> {
    let default_url = endpoint.url(api_url)?;
    let prefix = format!("{}=", endpoint.dns_key());
    let urls = records
        .iter()
        .filter_map(|record| record.strip_prefix(&prefix))
        .filter_map(|host| {
            let mut url = default_url.clone();
            match url.set_host(Some(removing_trailing_slash(host))) {
                Ok(()) => Some(removing_trailing_slash(url.as_str()).to_owned()),
                Err(err) => {
                    log::warn!(target: "statsig", host; "failed to build fallback url: {err}");
                    None
                }
            }
        })
        .collect();
    Ok(urls)
}

/// First candidate that is neither the current fallback nor one used before it.
fn pick_new_fallback_url(current: Option<&FallbackInfoEntry>, urls: &[String]) -> Option<String> {
    let previously_used: HashSet<&str> = current
        .map(|entry| entry.previous.iter().map(String::as_str).collect())
        .unwrap_or_default();
    let current_url = current.map(|entry| entry.url.as_str());

    urls.iter()
        .map(|url| removing_trailing_slash(url))
        .find(|url| !previously_used.contains(url) && Some(*url) != current_url)
        .map(str::to_owned)
}

fn removing_trailing_slash(value: &str) -> &str {
    value.strip_suffix('/').unwrap_or(value)
}
