//! HTTP client for fetching values and submitting events.
use std::{sync::Arc, time::Duration};

use reqwest::{header, StatusCode, Url};
use serde_json::json;

use crate::{
    diagnostics::Diagnostics,
    error_boundary::ErrorBoundary,
    hashing::HashAlgorithm,
    now_millis,
    response::InitializeResponse,
    sdk_key::validate_response_key,
    store::SyncState,
    Error, Result, StatsigUser,
};

use super::{
    fallback_resolver::{is_domain_failure, FallbackResolver},
    gzip::gzip,
    Endpoint,
};

/// Status codes that indicate a transient server-side failure.
pub(crate) const RETRY_CODES: [u16; 8] = [408, 500, 502, 503, 504, 522, 524, 599];

pub(crate) struct SyncClientConfig {
    pub sdk_key: String,
    /// Replaces the default API URL. Disables fallback URLs.
    pub api_url: Option<String>,
    /// Used when `api_url` is unset and no fallback is active.
    pub default_api_url: String,
    pub retry_backoff: Duration,
    /// Retries for initialize requests.
    pub max_retries: u32,
}

pub(crate) struct SyncClient {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    http: reqwest::Client,
    config: SyncClientConfig,
    fallback: Option<FallbackResolver>,
    diagnostics: Diagnostics,
    error_boundary: Arc<ErrorBoundary>,
}

impl SyncClient {
    pub(crate) fn new(
        http: reqwest::Client,
        config: SyncClientConfig,
        fallback: Option<FallbackResolver>,
        diagnostics: Diagnostics,
        error_boundary: Arc<ErrorBoundary>,
    ) -> SyncClient {
        // An explicit API URL means requests must not be redirected elsewhere.
        let fallback = fallback.filter(|_| config.api_url.is_none());
        SyncClient {
            http,
            config,
            fallback,
            diagnostics,
            error_boundary,
        }
    }

    /// Fetch values for `user`. A `204 No Content` is reported as a response without updates.
    pub(crate) async fn fetch_values(
        &self,
        user: &StatsigUser,
        sync: &SyncState,
        hash: HashAlgorithm,
    ) -> Result<InitializeResponse> {
        let body = json!({
            "user": user.to_json(false),
            "statsigMetadata": user.statsig_metadata(),
            "sinceTime": sync.since_time,
            "previousDerivedFields": sync.previous_derived_fields,
            "full_checksum": sync.full_checksum,
            "hash": hash.as_str(),
        });
        let body = serde_json::to_vec(&body)?;

        log::debug!(target: "statsig", since_time = sync.since_time; "fetching values");
        let response = self
            .post(Endpoint::Initialize, body, false, self.config.max_retries)
            .await?;
        if response.status() == StatusCode::NO_CONTENT {
            log::debug!(target: "statsig", "values not modified");
            return Ok(InitializeResponse::default());
        }

        let bytes = response.bytes().await?;
        let values: InitializeResponse = serde_json::from_slice(&bytes).map_err(|err| {
            log::warn!(target: "statsig", "failed to parse initialize response: {err}");
            Error::from(err)
        })?;
        validate_response_key(&self.config.sdk_key, &values)?;

        log::debug!(target: "statsig", has_updates = values.has_updates; "successfully fetched values");
        Ok(values)
    }

    /// Submit a serialized event batch, gzipped when `compress` is set.
    pub(crate) async fn send_events(&self, body: Vec<u8>, compress: bool) -> Result<()> {
        self.post(Endpoint::Rgstr, body, compress, 0).await?;
        Ok(())
    }

    fn url_for(&self, endpoint: Endpoint) -> Result<(Url, bool)> {
        if let Some(api_url) = &self.config.api_url {
            return Ok((endpoint.url(api_url)?, false));
        }
        if let Some(fallback) = self
            .fallback
            .as_ref()
            .and_then(|resolver| resolver.active_fallback_url(endpoint, now_millis()))
        {
            return Ok((Url::parse(&fallback)?, true));
        }
        Ok((endpoint.url(&self.config.default_api_url)?, false))
    }

    async fn post(
        &self,
        endpoint: Endpoint,
        body: Vec<u8>,
        compress: bool,
        retries: u32,
    ) -> Result<reqwest::Response> {
        let (body, compressed) = if compress {
            match gzip(&body) {
                Ok(compressed) => (compressed, true),
                Err(err) => {
                    log::warn!(target: "statsig", "failed to compress request body: {err}");
                    (body, false)
                }
            }
        } else {
            (body, false)
        };

        let (mut url, mut via_fallback) = self.url_for(endpoint)?;
        let mut backoff = self.config.retry_backoff;
        let mut attempt = 0;
        let mut tried_fallback = false;

        loop {
            attempt += 1;
            self.diagnostics.network_start(endpoint.as_str(), attempt);

            let mut request = self
                .http
                .post(url.clone())
                .header(header::CONTENT_TYPE, "application/json")
                .header("STATSIG-API-KEY", &self.config.sdk_key)
                .header("STATSIG-CLIENT-TIME", now_millis().to_string())
                .header("STATSIG-SDK-TYPE", crate::SDK_TYPE)
                .header("STATSIG-SDK-VERSION", crate::SDK_VERSION);
            if compressed {
                request = request.header(header::CONTENT_ENCODING, "gzip");
            }

            match request.body(body.clone()).send().await {
                Ok(response) => {
                    let status = response.status();
                    self.diagnostics.network_end(
                        endpoint.as_str(),
                        attempt,
                        status.is_success(),
                        Some(status.as_u16()),
                    );
                    if status.is_success() {
                        if via_fallback {
                            if let Some(resolver) = &self.fallback {
                                resolver.bump_expiry(endpoint, now_millis());
                            }
                        }
                        return Ok(response);
                    }
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        log::warn!(target: "statsig", "client is not authorized. Check your SDK key");
                        return Err(Error::Unauthorized);
                    }
                    if RETRY_CODES.contains(&status.as_u16()) && attempt <= retries {
                        log::debug!(target: "statsig", endpoint = endpoint.as_str(), status = status.as_u16(); "retrying request");
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                        continue;
                    }
                    log::warn!(target: "statsig", endpoint = endpoint.as_str(), status = status.as_u16(); "received non-2xx response");
                    return Err(Error::HttpStatus(status.as_u16()));
                }
                Err(err) => {
                    self.diagnostics
                        .network_end(endpoint.as_str(), attempt, false, None);
                    if !tried_fallback && is_domain_failure(&err) {
                        tried_fallback = true;
                        if let Some(fallback_url) = self.discover_fallback(endpoint).await {
                            url = fallback_url;
                            via_fallback = true;
                            continue;
                        }
                    }
                    log::warn!(target: "statsig", endpoint = endpoint.as_str(); "request failed: {err}");
                    return Err(err.into());
                }
            }
        }
    }

    async fn discover_fallback(&self, endpoint: Endpoint) -> Option<Url> {
        let resolver = self.fallback.as_ref()?;
        let now = now_millis();
        match resolver
            .try_fetch_updated_fallback_info(&self.http, endpoint, now)
            .await
        {
            Ok(true) => {}
            Ok(false) => return None,
            Err(err) => {
                self.error_boundary
                    .log_exception("network_fallback_resolver", &err);
                return None;
            }
        }
        let url = resolver.active_fallback_url(endpoint, now)?;
        Url::parse(&url).ok()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read as _;

    use flate2::read::GzDecoder;
    use mockito::Matcher;

    use super::*;
    use crate::{
        hashing::djb2,
        network::{dns::tests::dns_answer_with, fallback_resolver::DEFAULT_TTL},
        storage::{InMemoryStorage, KeyValueStorage},
    };

    fn error_boundary() -> Arc<ErrorBoundary> {
        Arc::new(ErrorBoundary::new(
            "client-key",
            crate::error_boundary::DEFAULT_EXCEPTION_URL,
            reqwest::Client::new(),
            None,
        ))
    }

    fn client(api_url: &str, max_retries: u32) -> SyncClient {
        let _ = env_logger::builder().is_test(true).try_init();
        SyncClient::new(
            reqwest::Client::new(),
            SyncClientConfig {
                sdk_key: "client-key".to_owned(),
                api_url: Some(api_url.to_owned()),
                default_api_url: crate::DEFAULT_API_URL.to_owned(),
                retry_backoff: Duration::from_millis(1),
                max_retries,
            },
            None,
            Diagnostics::new(None),
            error_boundary(),
        )
    }

    #[tokio::test]
    async fn fetches_values_with_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/initialize")
            .match_header("STATSIG-API-KEY", "client-key")
            .match_header("STATSIG-SDK-TYPE", crate::SDK_TYPE)
            .match_header("STATSIG-CLIENT-TIME", Matcher::Regex(r"^\d+$".to_owned()))
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJson(json!({
                "user": {"userID": "a"},
                "sinceTime": 42,
                "hash": "djb2"
            })))
            .with_status(200)
            .with_body(
                json!({
                    "has_updates": true, "time": 100,
                    "hashed_sdk_key_used": djb2("client-key"),
                    "feature_gates": {}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let sync = SyncState {
            since_time: 42,
            ..Default::default()
        };
        let values = client(&server.url(), 0)
            .fetch_values(&StatsigUser::with_user_id("a"), &sync, HashAlgorithm::Djb2)
            .await
            .unwrap();
        assert!(values.has_updates);
        assert_eq!(values.time, 100);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn no_content_means_no_updates() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/initialize")
            .with_status(204)
            .create_async()
            .await;

        let values = client(&server.url(), 0)
            .fetch_values(&StatsigUser::new(), &SyncState::default(), HashAlgorithm::Djb2)
            .await
            .unwrap();
        assert!(!values.has_updates);
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/initialize")
            .with_status(503)
            .expect(4)
            .create_async()
            .await;

        let result = client(&server.url(), 3)
            .fetch_values(&StatsigUser::new(), &SyncState::default(), HashAlgorithm::Djb2)
            .await;
        assert!(matches!(result, Err(Error::HttpStatus(503))));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn does_not_retry_other_failures() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/initialize")
            .with_status(400)
            .expect(1)
            .create_async()
            .await;

        let result = client(&server.url(), 3)
            .fetch_values(&StatsigUser::new(), &SyncState::default(), HashAlgorithm::Djb2)
            .await;
        assert!(matches!(result, Err(Error::HttpStatus(400))));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unauthorized_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/initialize")
            .with_status(401)
            .create_async()
            .await;

        let result = client(&server.url(), 3)
            .fetch_values(&StatsigUser::new(), &SyncState::default(), HashAlgorithm::Djb2)
            .await;
        assert!(matches!(result, Err(Error::Unauthorized)));
    }

    #[tokio::test]
    async fn rejects_values_for_another_key() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/initialize")
            .with_status(200)
            .with_body(json!({"has_updates": true, "hashed_sdk_key_used": "1"}).to_string())
            .create_async()
            .await;

        let result = client(&server.url(), 0)
            .fetch_values(&StatsigUser::new(), &SyncState::default(), HashAlgorithm::Djb2)
            .await;
        assert!(matches!(result, Err(Error::SdkKeyMismatch)));
    }

    #[tokio::test]
    async fn malformed_body_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/initialize")
            .with_status(200)
            .with_body("{not json")
            .create_async()
            .await;

        let result = client(&server.url(), 0)
            .fetch_values(&StatsigUser::new(), &SyncState::default(), HashAlgorithm::Djb2)
            .await;
        assert!(matches!(result, Err(Error::Json(_))));
    }

    #[tokio::test]
    async fn sends_compressed_events() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/rgstr")
            .match_header("content-encoding", "gzip")
            .with_status(202)
            .create_async()
            .await;

        let body = json!({"events": [{"eventName": "e"}]}).to_string().into_bytes();
        client(&server.url(), 0)
            .send_events(body.clone(), true)
            .await
            .unwrap();
        mock.assert_async().await;

        let mut decoded = Vec::new();
        GzDecoder::new(gzip(&body).unwrap().as_slice())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, body);
    }

    #[tokio::test]
    async fn connection_failures_surface_as_network_errors() {
        let result = client("http://127.0.0.1:1", 0)
            .send_events(b"{}".to_vec(), false)
            .await;
        assert!(matches!(result, Err(Error::Network(_))));
    }

    #[tokio::test]
    async fn unreachable_domain_fails_over_to_dns_fallback() {
        let mut server = mockito::Server::new_async().await;
        let dns = server
            .mock("POST", "/dns-query")
            .with_status(200)
            .with_body(dns_answer_with("i=127.0.0.1,e=127.0.0.1"))
            .expect(1)
            .create_async()
            .await;
        let initialize = server
            .mock("POST", "/v1/initialize")
            .with_status(200)
            .with_body(json!({"has_updates": true, "time": 7}).to_string())
            .expect(1)
            .create_async()
            .await;

        // Nothing listens on 127.0.0.2, so only the host swapped in from DNS can answer.
        let port = server.socket_address().port();
        let storage = Arc::new(InMemoryStorage::new());
        let default_api_url = format!("http://127.0.0.2:{port}");
        let resolver = FallbackResolver::new(
            "client-key",
            storage.clone(),
            format!("{}/dns-query", server.url()),
            default_api_url.clone(),
        );
        let client = SyncClient::new(
            reqwest::Client::new(),
            SyncClientConfig {
                sdk_key: "client-key".to_owned(),
                api_url: None,
                default_api_url,
                retry_backoff: Duration::from_millis(1),
                max_retries: 0,
            },
            Some(resolver),
            Diagnostics::new(None),
            error_boundary(),
        );

        let before = now_millis();
        let values = client
            .fetch_values(&StatsigUser::new(), &SyncState::default(), HashAlgorithm::Djb2)
            .await
            .unwrap();
        assert_eq!(values.time, 7);
        dns.assert_async().await;
        initialize.assert_async().await;

        let fallback = client.fallback.as_ref().unwrap();
        assert_eq!(
            fallback.active_fallback_url(Endpoint::Initialize, before).as_deref(),
            Some(format!("http://127.0.0.1:{port}/v1/initialize").as_str())
        );
        // a successful request through the fallback pushes its expiry out
        let stored = storage
            .get(&crate::network::fallback_resolver::storage_key("client-key"))
            .unwrap();
        let expiry = stored["initialize"]["expiry_time"].as_u64().unwrap();
        assert!(expiry >= before + DEFAULT_TTL.as_millis() as u64);
    }

    #[tokio::test]
    async fn explicit_api_url_disables_fallback() {
        let resolver = FallbackResolver::new(
            "client-key",
            Arc::new(InMemoryStorage::new()),
            "http://127.0.0.1:1/dns-query",
            crate::DEFAULT_API_URL,
        );
        let client = SyncClient::new(
            reqwest::Client::new(),
            SyncClientConfig {
                sdk_key: "client-key".to_owned(),
                api_url: Some("http://127.0.0.1:1".to_owned()),
                default_api_url: crate::DEFAULT_API_URL.to_owned(),
                retry_backoff: Duration::from_millis(1),
                max_retries: 0,
            },
            Some(resolver),
            Diagnostics::new(None),
            error_boundary(),
        );
        assert!(client.fallback.is_none());
        let result = client.send_events(b"{}".to_vec(), false).await;
        assert!(matches!(result, Err(Error::Network(_))));
    }
}
