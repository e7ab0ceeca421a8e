use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum PayPalServiceError {
    #[error("paypal api error (status {status}): {detail}")]
    Api { status: u16, detail: String },
    #[error("paypal transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("paypal response missing field: {0}")]
    MalformedResponse(&'static str),
    #[error("subscription created but response carried no approval link")]
    MissingApprovalLink,
}

/// HATEOAS link from a PayPal response body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkDescription {
    pub href: String,
    pub rel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CreateSubscriptionRequest {
    pub plan_id: String,
    /// RFC 3339; PayPal rejects start times in the past, so callers pass
    /// a small future offset.
    pub start_time: Option<String>,
    pub brand_name: String,
    pub return_url: String,
    pub cancel_url: String,
}

impl CreateSubscriptionRequest {
    /// Request body for POST /v1/billing/subscriptions.
    pub fn to_body(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "plan_id": self.plan_id,
            "application_context": {
                "brand_name": self.brand_name,
                "locale": "en-US",
                "shipping_preference": "NO_SHIPPING",
                "user_action": "SUBSCRIBE_NOW",
                "payment_method": {
                    "payer_selected": "PAYPAL",
                    "payee_preferred": "IMMEDIATE_PAYMENT_REQUIRED",
                },
                "return_url": self.return_url,
                "cancel_url": self.cancel_url,
            }
        });
        if let Some(ref start_time) = self.start_time {
            body["start_time"] = serde_json::Value::String(start_time.clone());
        }
        body
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreatedSubscription {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub links: Vec<LinkDescription>,
    /// Raw response body, kept for the audit seed.
    #[serde(skip)]
    pub raw: serde_json::Value,
}

impl CreatedSubscription {
    /// The link the user's browser must be redirected to.
    pub fn approval_url(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|link| link.rel == "approve")
            .map(|link| link.href.as_str())
    }
}

/// The five transport headers PayPal signs each webhook delivery with.
#[derive(Clone, Debug, Serialize)]
pub struct WebhookTransmission {
    pub transmission_id: String,
    pub transmission_time: String,
    pub cert_url: String,
    pub auth_algo: String,
    pub transmission_sig: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct CreatePlanRequest {
    pub product_id: String,
    pub name: String,
    /// Monthly price, formatted as a decimal string (e.g. "9.99").
    pub price: String,
    pub currency: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CreatedPlan {
    pub id: String,
    #[serde(default)]
    pub status: String,
}

#[async_trait]
pub trait PayPalService: Send + Sync {
    async fn create_subscription(
        &self,
        req: CreateSubscriptionRequest,
    ) -> Result<CreatedSubscription, PayPalServiceError>;

    /// Submits the transmission headers, configured webhook id and the
    /// decoded event body to PayPal's verification endpoint. `Ok(true)`
    /// only for an explicit SUCCESS in a 200 response; callers treat any
    /// error as a failed verification.
    async fn verify_webhook_signature(
        &self,
        webhook_id: &str,
        transmission: &WebhookTransmission,
        event_body: &serde_json::Value,
    ) -> Result<bool, PayPalServiceError>;

    /// Operator path: creates a remote billing plan so a local plan can
    /// be linked to it.
    async fn create_plan(&self, req: CreatePlanRequest)
        -> Result<CreatedPlan, PayPalServiceError>;
}

mod live;
mod mock;

pub use live::LivePayPalService;
pub use mock::MockPayPalService;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_url_selects_the_approve_relation() {
        let created = CreatedSubscription {
            id: "I-1".into(),
            status: "APPROVAL_PENDING".into(),
            links: vec![
                LinkDescription {
                    href: "https://pay/self".into(),
                    rel: "self".into(),
                    method: Some("GET".into()),
                },
                LinkDescription {
                    href: "https://pay/approve?token=I-1".into(),
                    rel: "approve".into(),
                    method: Some("GET".into()),
                },
            ],
            raw: serde_json::Value::Null,
        };
        assert_eq!(created.approval_url(), Some("https://pay/approve?token=I-1"));
    }

    #[test]
    fn approval_url_absent_when_no_approve_link() {
        let created = CreatedSubscription {
            id: "I-1".into(),
            status: "APPROVAL_PENDING".into(),
            links: vec![LinkDescription {
                href: "https://pay/self".into(),
                rel: "self".into(),
                method: None,
            }],
            raw: serde_json::Value::Null,
        };
        assert_eq!(created.approval_url(), None);
    }

    #[test]
    fn create_subscription_body_carries_application_context() {
        let req = CreateSubscriptionRequest {
            plan_id: "P-X".into(),
            start_time: Some("2025-01-01T00:00:00Z".into()),
            brand_name: "Taxfolio".into(),
            return_url: "https://app/subscriptions/success".into(),
            cancel_url: "https://app/subscriptions/cancel".into(),
        };
        let body = req.to_body();
        assert_eq!(body["plan_id"], "P-X");
        assert_eq!(body["start_time"], "2025-01-01T00:00:00Z");
        assert_eq!(body["application_context"]["user_action"], "SUBSCRIBE_NOW");
        assert_eq!(
            body["application_context"]["return_url"],
            "https://app/subscriptions/success"
        );
    }
}
