//! HTTP client for the profiler frontend

use super::contract::{
    format_wire_timestamp, quoted_etag, ArtifactAcceptedResponse, BlobAccessPass,
    ARTIFACT_API_VERSION, ARTIFACT_KIND_PROFILE, FEATURE_VERSION, PROFILER_API_PREFIX,
};
use super::ArtifactService;
use crate::settings::SettingsSource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, redirect, Client, StatusCode};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;
use uuid::Uuid;

/// Connection settings for the frontend client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the frontend
    pub endpoint: String,
    pub instrumentation_key: String,
    pub user_agent: Option<String>,
    /// Per-request timeout (default: 30 seconds)
    pub request_timeout: Duration,
    /// Redirects followed per request (default: 3)
    pub max_redirects: usize,
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>, instrumentation_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            instrumentation_key: instrumentation_key.into(),
            user_agent: None,
            request_timeout: Duration::from_secs(30),
            max_redirects: 3,
        }
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Client for the settings and artifact endpoints
pub struct ServiceProfilerClient {
    client: Client,
    base_url: Url,
    instrumentation_key: String,
}

impl ServiceProfilerClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        anyhow::ensure!(
            !config.instrumentation_key.is_empty(),
            "Instrumentation key is required"
        );

        let mut builder = Client::builder()
            .timeout(config.request_timeout)
            .redirect(redirect::Policy::limited(config.max_redirects));
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("Failed to create HTTP client")?;

        let mut base_url = Url::parse(&config.endpoint).context("Invalid profiler endpoint")?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            instrumentation_key: config.instrumentation_key,
        })
    }

    /// `api/profileragent/v4/settings?iKey=..&oldTimestamp=..&featureVersion=1.0.0`
    pub fn settings_url(&self, modified_since: &DateTime<Utc>) -> Result<Url> {
        let mut url = self
            .base_url
            .join(&format!("{}/settings", PROFILER_API_PREFIX))
            .context("Invalid settings path")?;

        url.query_pairs_mut()
            .append_pair("iKey", &self.instrumentation_key)
            .append_pair("oldTimestamp", &format_wire_timestamp(modified_since))
            .append_pair("featureVersion", FEATURE_VERSION);

        Ok(url)
    }

    /// `api/apps/{iKey}/artifactkinds/profile/artifacts/{id}?iKey=..&extension=..&api-version=..&action=..`
    pub fn artifact_url(
        &self,
        artifact_id: Uuid,
        extension: &str,
        action: &str,
        etag: Option<&str>,
    ) -> Result<Url> {
        let path = format!(
            "api/apps/{}/artifactkinds/{}/artifacts/{}",
            self.instrumentation_key, ARTIFACT_KIND_PROFILE, artifact_id
        );
        let mut url = self.base_url.join(&path).context("Invalid artifact path")?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("iKey", &self.instrumentation_key)
                .append_pair("extension", extension)
                .append_pair("api-version", ARTIFACT_API_VERSION)
                .append_pair("action", action);
            if let Some(etag) = etag {
                query.append_pair("etag", &quoted_etag(etag));
            }
        }

        Ok(url)
    }
}

#[async_trait]
impl SettingsSource for ServiceProfilerClient {
    async fn fetch_settings(&self, modified_since: DateTime<Utc>) -> Result<String> {
        let url = self.settings_url(&modified_since)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send settings request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Settings request failed ({}): {}", status, body);
        }

        response.text().await.context("Failed to read settings response")
    }
}

#[async_trait]
impl ArtifactService for ServiceProfilerClient {
    async fn get_upload_access(&self, artifact_id: Uuid, extension: &str) -> Result<BlobAccessPass> {
        let url = self.artifact_url(artifact_id, extension, "gettoken", None)?;

        let response = self
            .client
            .post(url)
            .send()
            .await
            .context("Failed to send upload token request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Upload token request failed ({}): {}", status, body);
        }

        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        if let Some(location) = location {
            return Ok(BlobAccessPass::from_location(location));
        }

        let body = response
            .text()
            .await
            .context("Failed to read upload token response")?;
        serde_json::from_str(&body).context("Upload token response had neither a location nor a pass")
    }

    async fn upload_blob(
        &self,
        pass: &BlobAccessPass,
        body: Vec<u8>,
        metadata: &BTreeMap<String, String>,
    ) -> Result<String> {
        let url = pass.upload_url()?;
        debug!(blob = %pass.redacted_url(), bytes = body.len(), "Uploading trace blob");

        let mut request = self
            .client
            .put(url)
            .header("x-ms-blob-type", "BlockBlob")
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_ENCODING, "gzip");
        for (key, value) in metadata {
            request = request.header(format!("x-ms-meta-{}", key), value.as_str());
        }

        let response = request
            .body(body)
            .send()
            .await
            .context("Failed to send blob upload")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Blob upload failed ({}): {}", status, body);
        }

        response
            .headers()
            .get(header::ETAG)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .context("Blob upload response carried no ETag")
    }

    async fn report_upload_finish(
        &self,
        artifact_id: Uuid,
        extension: &str,
        etag: &str,
    ) -> Result<ArtifactAcceptedResponse> {
        let url = self.artifact_url(artifact_id, extension, "commit", Some(etag))?;

        let response = self
            .client
            .post(url)
            .send()
            .await
            .context("Failed to send commit request")?;

        let status = response.status();
        if status != StatusCode::CREATED && status != StatusCode::ACCEPTED {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Commit rejected ({}): {}", status, body);
        }

        response
            .json::<ArtifactAcceptedResponse>()
            .await
            .context("Failed to parse commit response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mockito::Matcher;

    const IKEY: &str = "00000000-1111-2222-3333-444444444444";

    fn client(endpoint: &str) -> ServiceProfilerClient {
        ServiceProfilerClient::new(
            ClientConfig::new(endpoint, IKEY)
                .user_agent("profiler-agent/test")
                .request_timeout(Duration::from_secs(5)),
        )
        .unwrap()
    }

    fn artifact_id() -> Uuid {
        Uuid::parse_str("8b2f0c8e-5d1a-4c1e-9a53-0d1f3c2b4a55").unwrap()
    }

    #[test]
    fn test_missing_instrumentation_key_is_rejected() {
        assert!(ServiceProfilerClient::new(ClientConfig::new("http://localhost", "")).is_err());
    }

    #[test]
    fn test_settings_url() {
        let client = client("https://profiler.example.com/base");
        let since = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();

        let url = client.settings_url(&since).unwrap();
        assert_eq!(url.path(), "/base/api/profileragent/v4/settings");

        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            query,
            vec![
                ("iKey".to_string(), IKEY.to_string()),
                ("oldTimestamp".to_string(), "2024-05-01T08:00:00.0000000Z".to_string()),
                ("featureVersion".to_string(), "1.0.0".to_string()),
            ]
        );
    }

    #[test]
    fn test_commit_url_quotes_etag_once() {
        let client = client("https://profiler.example.com/");
        let url = client
            .artifact_url(artifact_id(), "jfr", "commit", Some("\"0x8D8C1\""))
            .unwrap();

        assert_eq!(
            url.path(),
            format!(
                "/api/apps/{}/artifactkinds/profile/artifacts/{}",
                IKEY,
                artifact_id()
            )
        );
        let etag = url
            .query_pairs()
            .find(|(key, _)| key == "etag")
            .map(|(_, value)| value.into_owned());
        assert_eq!(etag.as_deref(), Some("\"0x8D8C1\""));
    }

    #[tokio::test]
    async fn test_fetch_settings() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/profileragent/v4/settings")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("iKey".into(), IKEY.into()),
                Matcher::UrlEncoded("featureVersion".into(), "1.0.0".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"enabled": true}"#)
            .create_async()
            .await;

        let body = client(&server.url())
            .fetch_settings(Utc::now())
            .await
            .unwrap();

        assert_eq!(body, r#"{"enabled": true}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_settings_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", Matcher::Any)
            .with_status(503)
            .with_body("busy")
            .create_async()
            .await;

        let err = client(&server.url())
            .fetch_settings(Utc::now())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_upload_access_from_location_header() {
        let mut server = mockito::Server::new_async().await;
        let sas = format!("{}/container/trace.jfr?sig=secret", server.url());
        let mock = server
            .mock(
                "POST",
                format!("/api/apps/{}/artifactkinds/profile/artifacts/{}", IKEY, artifact_id()).as_str(),
            )
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("action".into(), "gettoken".into()),
                Matcher::UrlEncoded("extension".into(), "jfr".into()),
                Matcher::UrlEncoded("api-version".into(), ARTIFACT_API_VERSION.into()),
            ]))
            .with_status(202)
            .with_header("location", &sas)
            .create_async()
            .await;

        let pass = client(&server.url())
            .get_upload_access(artifact_id(), "jfr")
            .await
            .unwrap();

        assert_eq!(pass.uri_with_sas_token, sas);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_upload_blob_sends_metadata_and_returns_etag() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/container/trace.jfr")
            .match_query(Matcher::UrlEncoded("sig".into(), "secret".into()))
            .match_header("x-ms-blob-type", "BlockBlob")
            .match_header("content-encoding", "gzip")
            .match_header("x-ms-meta-spmachinename", "host-1")
            .match_body("trace-bytes")
            .with_status(201)
            .with_header("etag", "\"0x8D8C1\"")
            .create_async()
            .await;

        let pass = BlobAccessPass::from_location(format!(
            "{}/container/trace.jfr?sig=secret",
            server.url()
        ));
        let mut metadata = BTreeMap::new();
        metadata.insert("spMachineName".to_string(), "host-1".to_string());

        let etag = client(&server.url())
            .upload_blob(&pass, b"trace-bytes".to_vec(), &metadata)
            .await
            .unwrap();

        assert_eq!(etag, "\"0x8D8C1\"");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_report_upload_finish() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Any)
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("action".into(), "commit".into()),
                Matcher::UrlEncoded("etag".into(), "\"0x8D8C1\"".into()),
            ]))
            .with_status(202)
            .with_body(
                r#"{"acceptedTime": "2024-05-01T08:00:01.0000000Z", "blobUri": "https://blob/x", "correlationId": "c-1", "stampId": "stamp-7"}"#,
            )
            .create_async()
            .await;

        let accepted = client(&server.url())
            .report_upload_finish(artifact_id(), "jfr", "0x8D8C1")
            .await
            .unwrap();

        assert_eq!(accepted.stamp_id, "stamp-7");
        assert_eq!(accepted.correlation_id, "c-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_commit_rejects_plain_ok() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", Matcher::Any)
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let result = client(&server.url())
            .report_upload_finish(artifact_id(), "jfr", "0x8D8C1")
            .await;
        assert!(result.is_err());
    }
}
