use crate::error::{PaymentError, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Authenticated HTTP client for one live provider API.
///
/// Every request runs under the configured timeout; expiry surfaces as
/// `ProviderUnavailable` instead of blocking the caller.
pub struct LiveClient {
    client: Client,
    base_url: String,
    api_key: SecretString,
}

impl LiveClient {
    pub fn new(base_url: &str, api_key: SecretString, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| PaymentError::Configuration(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(self.url(path))
            .bearer_auth(self.api_key.expose_secret())
    }

    pub fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> RequestBuilder {
        self.client
            .post(self.url(path))
            .bearer_auth(self.api_key.expose_secret())
            .json(body)
    }

    pub fn post_form<B: Serialize + ?Sized>(&self, path: &str, form: &B) -> RequestBuilder {
        self.client
            .post(self.url(path))
            .bearer_auth(self.api_key.expose_secret())
            .form(form)
    }

    /// Sends the request and decodes a successful JSON response.
    ///
    /// `what` names the resource for error messages, e.g. the operation id.
    pub async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = request.send().await.map_err(|e| {
            tracing::warn!(resource = what, error = %e, "provider request failed");
            PaymentError::from(e)
        })?;

        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                PaymentError::InvalidPayload(format!("unexpected provider response for {what}: {e}"))
            });
        }

        let message = response.text().await.unwrap_or_default();
        Err(map_status_error(status, what, message))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

fn map_status_error(status: StatusCode, what: &str, message: String) -> PaymentError {
    if status == StatusCode::NOT_FOUND {
        PaymentError::NotFound(what.to_string())
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        tracing::warn!(resource = what, status = status.as_u16(), "provider unavailable");
        PaymentError::ProviderUnavailable(format!("{status} for {what}"))
    } else {
        PaymentError::ProviderRejected {
            status: status.as_u16(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, timeout: Duration) -> LiveClient {
        LiveClient::new(&server.uri(), SecretString::from("sk_test".to_string()), timeout).unwrap()
    }

    #[tokio::test]
    async fn test_sends_bearer_and_decodes_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/things/1"))
            .and(header("authorization", "Bearer sk_test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "1"})))
            .mount(&server)
            .await;

        let client = client(&server, Duration::from_secs(5));
        let body: serde_json::Value = client
            .send(client.get("/v1/things/1"), "thing 1")
            .await
            .unwrap();
        assert_eq!(body["id"], "1");
    }

    #[tokio::test]
    async fn test_maps_status_codes() {
        let server = MockServer::start().await;
        Mock::given(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(path("/bad"))
            .respond_with(ResponseTemplate::new(400).set_body_string("nope"))
            .mount(&server)
            .await;

        let client = client(&server, Duration::from_secs(5));
        let missing = client
            .send::<serde_json::Value>(client.get("/missing"), "x")
            .await;
        assert!(matches!(missing, Err(PaymentError::NotFound(_))));

        let down = client.send::<serde_json::Value>(client.get("/down"), "x").await;
        assert!(matches!(down, Err(PaymentError::ProviderUnavailable(_))));

        let bad = client.send::<serde_json::Value>(client.get("/bad"), "x").await;
        match bad {
            Err(PaymentError::ProviderRejected { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "nope");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_provider_unavailable() {
        let server = MockServer::start().await;
        Mock::given(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = client(&server, Duration::from_millis(50));
        let result = client.send::<serde_json::Value>(client.get("/slow"), "x").await;
        assert!(matches!(result, Err(PaymentError::ProviderUnavailable(_))));
    }
}
