use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::{PollError, PropvalError};
use crate::poller::StatusSource;
use crate::routes::{AddressRequest, ReportResponse, ValidateResponse};
use crate::status::StatusReport;

/// HTTP client for a running propval server.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    client: Client,
    base_url: String,
}

impl RemoteClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, PropvalError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn submit(&self, address: &str) -> Result<ReportResponse, PropvalError> {
        let response = self
            .client
            .post(self.url("/generate-report"))
            .json(&AddressRequest {
                address: address.to_string(),
            })
            .send()
            .await?;
        read_json(response).await
    }

    pub async fn validate(&self, address: &str) -> Result<ValidateResponse, PropvalError> {
        let response = self
            .client
            .post(self.url("/validate-address"))
            .json(&AddressRequest {
                address: address.to_string(),
            })
            .send()
            .await?;
        read_json(response).await
    }

    pub async fn retry(&self, id: &str) -> Result<ReportResponse, PropvalError> {
        let response = self
            .client
            .post(self.url(&format!("/retry-report/{id}")))
            .send()
            .await?;
        read_json(response).await
    }

    /// Query the status of a job. A 404 still carries a status payload
    /// (`success: false`), so it is returned rather than treated as an error.
    pub async fn status(&self, id: &str) -> Result<StatusReport, PollError> {
        let response = self
            .client
            .get(self.url(&format!("/report-status/{id}")))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(PollError::Status(status.as_u16()));
        }
        Ok(response.json::<StatusReport>().await?)
    }

    pub async fn fetch_markdown(&self, id: &str) -> Result<String, PropvalError> {
        let response = self
            .client
            .get(self.url(&format!("/export-report/{id}")))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(server_error(response).await);
        }
        Ok(response.text().await?)
    }

    pub async fn fetch_pdf(&self, id: &str) -> Result<Vec<u8>, PropvalError> {
        let response = self
            .client
            .get(self.url(&format!("/export-pdf/{id}")))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(server_error(response).await);
        }
        Ok(response.bytes().await?.to_vec())
    }
}

impl StatusSource for RemoteClient {
    async fn fetch_status(&self, id: &str) -> Result<StatusReport, PollError> {
        self.status(id).await
    }
}

/// Decode a JSON reply. Error statuses with a `{success, message}` body are
/// decoded too so callers can show the server's message.
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, PropvalError> {
    let status = response.status();
    let body = response.text().await?;
    match serde_json::from_str::<T>(&body) {
        Ok(value) => Ok(value),
        Err(_) if !status.is_success() => Err(PropvalError::Server {
            status: status.as_u16(),
            message: body,
        }),
        Err(e) => Err(e.into()),
    }
}

async fn server_error(response: reqwest::Response) -> PropvalError {
    let status = response.status().as_u16();
    let message = match response.json::<ReportResponse>().await {
        Ok(body) => body.message,
        Err(_) => "unexpected response".to_string(),
    };
    PropvalError::Server { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn submit_posts_address() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate-report"))
            .and(body_json(json!({"address": "10 Downing Street, London, SW1A 2AA"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "report_id": "abc",
                "message": "Report generation started"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = RemoteClient::new(server.uri()).unwrap();
        let reply = client
            .submit("10 Downing Street, London, SW1A 2AA")
            .await
            .unwrap();
        assert!(reply.success);
        assert_eq!(reply.report_id.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn rejected_submission_keeps_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate-report"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "success": false,
                "message": "Address does not contain a valid UK postcode"
            })))
            .mount(&server)
            .await;

        let client = RemoteClient::new(server.uri()).unwrap();
        let reply = client.submit("1 Nowhere Lane").await.unwrap();
        assert!(!reply.success);
        assert!(reply.report_id.is_none());
        assert!(reply.message.contains("postcode"));
    }

    #[tokio::test]
    async fn status_not_found_is_a_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/report-status/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "success": false,
                "message": "Report not found"
            })))
            .mount(&server)
            .await;

        let client = RemoteClient::new(server.uri()).unwrap();
        let report = client.fetch_status("missing").await.unwrap();
        assert_eq!(report, StatusReport::not_found());
    }

    #[tokio::test]
    async fn status_server_error_is_a_poll_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/report-status/abc"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = RemoteClient::new(server.uri()).unwrap();
        let err = client.status("abc").await.unwrap_err();
        assert!(matches!(err, PollError::Status(503)));
    }

    #[tokio::test]
    async fn fetch_markdown_surfaces_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/export-report/abc"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "success": false,
                "message": "Report abc is not ready yet (status: EVALUATING)"
            })))
            .mount(&server)
            .await;

        let client = RemoteClient::new(format!("{}/", server.uri())).unwrap();
        match client.fetch_markdown("abc").await {
            Err(PropvalError::Server { status, message }) => {
                assert_eq!(status, 409);
                assert!(message.contains("not ready"));
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_pdf_returns_raw_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/export-pdf/abc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .set_body_bytes(b"%PDF-1.3 test".to_vec()),
            )
            .mount(&server)
            .await;

        let client = RemoteClient::new(server.uri()).unwrap();
        let pdf = client.fetch_pdf("abc").await.unwrap();
        assert_eq!(pdf, b"%PDF-1.3 test");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let client = RemoteClient::new("http://127.0.0.1:1").unwrap();
        let err = client.status("abc").await.unwrap_err();
        assert!(matches!(err, PollError::Transport(_)));
    }
}
