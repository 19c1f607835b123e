use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};

use super::ProviderAdapter;
use super::error::ProviderError;
use super::types::{
    BucketCheckRequest, CreateReportRequest, ReportDefinition, ReportLookupRequest,
    ReportLookupResponse,
};
use crate::model::{Credential, ProviderType};

/// [`ProviderAdapter`] backed by the HTTP adapter service.
pub struct HttpAdapter {
    client: Client,
    base_url: String,
    provider: ProviderType,
}

impl HttpAdapter {
    /// Client for `provider` under `base_url`. `timeout` bounds each request.
    pub fn new(
        base_url: impl Into<String>,
        provider: ProviderType,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            provider,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.provider, path)
    }

    async fn api_error(response: Response) -> ProviderError {
        let status = response.status().as_u16();
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        ProviderError::ApiError { status, message }
    }
}

#[async_trait]
impl ProviderAdapter for HttpAdapter {
    async fn check_bucket(&self, credential: &Credential, bucket: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(self.url("buckets/check"))
            .json(&BucketCheckRequest { credential, bucket })
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(ProviderError::BucketNotFound(bucket.to_string())),
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| format!("no access to bucket `{bucket}`"));
                Err(ProviderError::AccessDenied(message))
            }
            _ => Err(Self::api_error(response).await),
        }
    }

    async fn find_report(
        &self,
        credential: &Credential,
        name: &str,
    ) -> Result<Option<ReportDefinition>, ProviderError> {
        let response = self
            .client
            .post(self.url("reports/lookup"))
            .json(&ReportLookupRequest { credential, name })
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let body = response.json::<ReportLookupResponse>().await?;
                Ok(Some(body.report))
            }
            _ => Err(Self::api_error(response).await),
        }
    }

    async fn create_report(
        &self,
        credential: &Credential,
        report: &ReportDefinition,
    ) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(self.url("reports"))
            .json(&CreateReportRequest { credential, report })
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::api_error(response).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::KeysCredential;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credential() -> Credential {
        Credential::Keys(KeysCredential {
            access_key_id: "ak".into(),
            secret_key: "sk".into(),
        })
    }

    async fn adapter(server: &MockServer) -> HttpAdapter {
        HttpAdapter::new(server.uri(), ProviderType::Aws, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn bucket_check_maps_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/aws/buckets/check"))
            .and(body_partial_json(serde_json::json!({"bucket": "ok-bucket"})))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/aws/buckets/check"))
            .and(body_partial_json(serde_json::json!({"bucket": "gone"})))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/aws/buckets/check"))
            .and(body_partial_json(serde_json::json!({"bucket": "locked"})))
            .respond_with(ResponseTemplate::new(403).set_body_string("AccessDenied"))
            .mount(&server)
            .await;

        let adapter = adapter(&server).await;
        let cred = credential();
        adapter.check_bucket(&cred, "ok-bucket").await.unwrap();
        assert!(matches!(
            adapter.check_bucket(&cred, "gone").await,
            Err(ProviderError::BucketNotFound(b)) if b == "gone"
        ));
        assert!(matches!(
            adapter.check_bucket(&cred, "locked").await,
            Err(ProviderError::AccessDenied(m)) if m == "AccessDenied"
        ));
    }

    #[tokio::test]
    async fn report_lookup_returns_none_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/aws/reports/lookup"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let adapter = adapter(&server).await;
        let found = adapter.find_report(&credential(), "r1").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn report_lookup_parses_definition() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/aws/reports/lookup"))
            .and(body_partial_json(serde_json::json!({"name": "r1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "report": {"name": "r1", "bucket": "b1", "prefix": "cur/"}
            })))
            .mount(&server)
            .await;

        let adapter = adapter(&server).await;
        let found = adapter.find_report(&credential(), "r1").await.unwrap();
        assert_eq!(found, Some(ReportDefinition::new("r1", "b1", "cur/")));
    }

    #[tokio::test]
    async fn create_report_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/aws/reports"))
            .respond_with(ResponseTemplate::new(500).set_body_string("quota exceeded"))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = adapter(&server).await;
        let err = adapter
            .create_report(&credential(), &ReportDefinition::new("r1", "b1", "p"))
            .await
            .unwrap_err();
        match err {
            ProviderError::ApiError { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "quota exceeded");
            }
            other => panic!("expected ApiError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn base_url_trailing_slash_is_ignored() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/azure/reports"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = HttpAdapter::new(
            format!("{}/", server.uri()),
            ProviderType::Azure,
            Duration::from_secs(5),
        )
        .unwrap();
        adapter
            .create_report(&credential(), &ReportDefinition::new("r", "b", "p"))
            .await
            .unwrap();
    }
}
