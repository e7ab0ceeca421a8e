use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use super::{
    CreatePlanRequest, CreateSubscriptionRequest, CreatedPlan, CreatedSubscription,
    PayPalService, PayPalServiceError, WebhookTransmission,
};
use crate::config::PayPalSettings;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct LivePayPalService {
    client: reqwest::Client,
    api_base: String,
    client_id: String,
    client_secret: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl LivePayPalService {
    pub fn new(
        api_base: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build paypal http client");
        Self {
            client,
            api_base: api_base.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    pub fn from_settings(settings: &PayPalSettings) -> Self {
        Self::new(
            settings.api_base.clone(),
            settings.client_id.clone(),
            settings.client_secret.clone(),
        )
    }

    /// Client-credentials token for the REST API. Fetched per call; the
    /// billing endpoints are low-traffic enough that caching the token is
    /// not worth the refresh bookkeeping.
    async fn access_token(&self) -> Result<String, PayPalServiceError> {
        let resp = self
            .client
            .post(format!("{}/v1/oauth2/token", self.api_base))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(PayPalServiceError::Api {
                status: status.as_u16(),
                detail,
            });
        }

        let token: TokenResponse = resp.json().await?;
        Ok(token.access_token)
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<(reqwest::StatusCode, serde_json::Value), PayPalServiceError> {
        let token = self.access_token().await?;
        let resp = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        let value = resp.json::<serde_json::Value>().await.unwrap_or_default();
        Ok((status, value))
    }
}

#[async_trait]
impl PayPalService for LivePayPalService {
    async fn create_subscription(
        &self,
        req: CreateSubscriptionRequest,
    ) -> Result<CreatedSubscription, PayPalServiceError> {
        let (status, body) = self
            .post_json("/v1/billing/subscriptions", &req.to_body())
            .await?;

        if status.as_u16() != 201 {
            return Err(PayPalServiceError::Api {
                status: status.as_u16(),
                detail: body.to_string(),
            });
        }

        let mut created: CreatedSubscription = serde_json::from_value(body.clone())
            .map_err(|_| PayPalServiceError::MalformedResponse("id"))?;
        if created.id.is_empty() {
            return Err(PayPalServiceError::MalformedResponse("id"));
        }
        created.raw = body;
        Ok(created)
    }

    async fn verify_webhook_signature(
        &self,
        webhook_id: &str,
        transmission: &WebhookTransmission,
        event_body: &serde_json::Value,
    ) -> Result<bool, PayPalServiceError> {
        let body = serde_json::json!({
            "auth_algo": transmission.auth_algo,
            "cert_url": transmission.cert_url,
            "transmission_id": transmission.transmission_id,
            "transmission_sig": transmission.transmission_sig,
            "transmission_time": transmission.transmission_time,
            "webhook_id": webhook_id,
            "webhook_event": event_body,
        });

        let (status, response) = self
            .post_json("/v1/notifications/verify-webhook-signature", &body)
            .await?;

        if status.as_u16() != 200 {
            warn!(
                status = status.as_u16(),
                "webhook signature verification call returned non-200"
            );
            return Ok(false);
        }

        Ok(response
            .get("verification_status")
            .and_then(|v| v.as_str())
            .map(|v| v == "SUCCESS")
            .unwrap_or(false))
    }

    async fn create_plan(
        &self,
        req: CreatePlanRequest,
    ) -> Result<CreatedPlan, PayPalServiceError> {
        let body = serde_json::json!({
            "product_id": req.product_id,
            "name": req.name,
            "billing_cycles": [{
                "frequency": { "interval_unit": "MONTH", "interval_count": 1 },
                "tenure_type": "REGULAR",
                "sequence": 1,
                "total_cycles": 0,
                "pricing_scheme": {
                    "fixed_price": { "value": req.price, "currency_code": req.currency }
                }
            }],
            "payment_preferences": {
                "auto_bill_outstanding": true,
                "payment_failure_threshold": 3,
            }
        });

        let (status, response) = self.post_json("/v1/billing/plans", &body).await?;
        if status.as_u16() != 201 {
            return Err(PayPalServiceError::Api {
                status: status.as_u16(),
                detail: response.to_string(),
            });
        }

        serde_json::from_value(response).map_err(|_| PayPalServiceError::MalformedResponse("id"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn service(server: &MockServer) -> LivePayPalService {
        LivePayPalService::new(server.base_url(), "client-id", "client-secret")
    }

    fn mock_token(server: &MockServer) -> httpmock::Mock<'_> {
        server.mock(|when, then| {
            when.method(POST).path("/v1/oauth2/token");
            then.status(200)
                .json_body(serde_json::json!({ "access_token": "A21.test", "token_type": "Bearer" }));
        })
    }

    fn create_request() -> CreateSubscriptionRequest {
        CreateSubscriptionRequest {
            plan_id: "P-X".into(),
            start_time: None,
            brand_name: "Taxfolio".into(),
            return_url: "https://app/success".into(),
            cancel_url: "https://app/cancel".into(),
        }
    }

    #[tokio::test]
    async fn create_subscription_parses_id_and_links() {
        let server = MockServer::start();
        let _token = mock_token(&server);
        let _create = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/billing/subscriptions")
                .header("authorization", "Bearer A21.test")
                .json_body_partial(r#"{ "plan_id": "P-X" }"#);
            then.status(201).json_body(serde_json::json!({
                "id": "I-1",
                "status": "APPROVAL_PENDING",
                "links": [
                    { "href": "https://pay/approve?token=I-1", "rel": "approve", "method": "GET" }
                ]
            }));
        });

        let created = service(&server)
            .create_subscription(create_request())
            .await
            .unwrap();
        assert_eq!(created.id, "I-1");
        assert_eq!(created.approval_url(), Some("https://pay/approve?token=I-1"));
    }

    #[tokio::test]
    async fn create_subscription_non_201_is_api_error() {
        let server = MockServer::start();
        let _token = mock_token(&server);
        let _create = server.mock(|when, then| {
            when.method(POST).path("/v1/billing/subscriptions");
            then.status(422)
                .json_body(serde_json::json!({ "name": "UNPROCESSABLE_ENTITY" }));
        });

        let err = service(&server)
            .create_subscription(create_request())
            .await
            .unwrap_err();
        assert!(matches!(err, PayPalServiceError::Api { status: 422, .. }));
    }

    fn transmission() -> WebhookTransmission {
        WebhookTransmission {
            transmission_id: "tid".into(),
            transmission_time: "2025-01-01T00:00:00Z".into(),
            cert_url: "https://api.paypal.com/cert".into(),
            auth_algo: "SHA256withRSA".into(),
            transmission_sig: "sig".into(),
        }
    }

    #[tokio::test]
    async fn verification_accepts_only_explicit_success() {
        let server = MockServer::start();
        let _token = mock_token(&server);
        let verify = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/notifications/verify-webhook-signature")
                .json_body_partial(r#"{ "webhook_id": "WH-1", "transmission_id": "tid" }"#);
            then.status(200)
                .json_body(serde_json::json!({ "verification_status": "SUCCESS" }));
        });

        let ok = service(&server)
            .verify_webhook_signature("WH-1", &transmission(), &serde_json::json!({"id": "evt"}))
            .await
            .unwrap();
        assert!(ok);
        verify.assert();
    }

    #[tokio::test]
    async fn verification_failure_status_is_rejected() {
        let server = MockServer::start();
        let _token = mock_token(&server);
        let _verify = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/notifications/verify-webhook-signature");
            then.status(200)
                .json_body(serde_json::json!({ "verification_status": "FAILURE" }));
        });

        let ok = service(&server)
            .verify_webhook_signature("WH-1", &transmission(), &serde_json::json!({"id": "evt"}))
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn verification_non_200_is_rejected() {
        let server = MockServer::start();
        let _token = mock_token(&server);
        let _verify = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/notifications/verify-webhook-signature");
            then.status(503);
        });

        let ok = service(&server)
            .verify_webhook_signature("WH-1", &transmission(), &serde_json::json!({"id": "evt"}))
            .await
            .unwrap();
        assert!(!ok);
    }
}
