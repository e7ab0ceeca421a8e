use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::{
    CreatePlanRequest, CreateSubscriptionRequest, CreatedPlan, CreatedSubscription,
    LinkDescription, PayPalService, PayPalServiceError, WebhookTransmission,
};

/// Test double that records every request and returns configurable
/// results without touching the network.
#[derive(Clone, Default)]
pub struct MockPayPalService {
    pub create_requests: Arc<Mutex<Vec<CreateSubscriptionRequest>>>,
    pub verify_requests: Arc<Mutex<Vec<(String, WebhookTransmission, serde_json::Value)>>>,
    pub plan_requests: Arc<Mutex<Vec<CreatePlanRequest>>>,
    next_subscription: Arc<Mutex<Option<CreatedSubscription>>>,
    verify_result: Arc<Mutex<bool>>,
    fail_create: Arc<AtomicBool>,
    fail_verify: Arc<AtomicBool>,
}

impl MockPayPalService {
    pub fn new() -> Self {
        let mock = Self::default();
        *mock.verify_result.lock().unwrap() = true;
        mock
    }

    /// Next create_subscription call returns this id with an approve link.
    pub fn with_subscription(self, id: &str, approval_url: &str) -> Self {
        *self.next_subscription.lock().unwrap() = Some(CreatedSubscription {
            id: id.to_string(),
            status: "APPROVAL_PENDING".into(),
            links: vec![LinkDescription {
                href: approval_url.to_string(),
                rel: "approve".into(),
                method: Some("GET".into()),
            }],
            raw: serde_json::json!({ "id": id, "status": "APPROVAL_PENDING" }),
        });
        self
    }

    /// Remote creation succeeds but the link set has no approve relation.
    pub fn without_approval_link(self, id: &str) -> Self {
        *self.next_subscription.lock().unwrap() = Some(CreatedSubscription {
            id: id.to_string(),
            status: "APPROVAL_PENDING".into(),
            links: vec![],
            raw: serde_json::json!({ "id": id }),
        });
        self
    }

    pub fn failing_create(self) -> Self {
        self.fail_create.store(true, Ordering::SeqCst);
        self
    }

    pub fn rejecting_verification(self) -> Self {
        *self.verify_result.lock().unwrap() = false;
        self
    }

    pub fn failing_verification(self) -> Self {
        self.fail_verify.store(true, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl PayPalService for MockPayPalService {
    async fn create_subscription(
        &self,
        req: CreateSubscriptionRequest,
    ) -> Result<CreatedSubscription, PayPalServiceError> {
        self.create_requests.lock().unwrap().push(req);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(PayPalServiceError::Api {
                status: 500,
                detail: "mock gateway failure".into(),
            });
        }
        let configured = self.next_subscription.lock().unwrap().clone();
        Ok(configured.unwrap_or_else(|| CreatedSubscription {
            id: "I-MOCK".into(),
            status: "APPROVAL_PENDING".into(),
            links: vec![LinkDescription {
                href: "https://pay.example.test/approve?token=I-MOCK".into(),
                rel: "approve".into(),
                method: Some("GET".into()),
            }],
            raw: serde_json::json!({ "id": "I-MOCK" }),
        }))
    }

    async fn verify_webhook_signature(
        &self,
        webhook_id: &str,
        transmission: &WebhookTransmission,
        event_body: &serde_json::Value,
    ) -> Result<bool, PayPalServiceError> {
        self.verify_requests.lock().unwrap().push((
            webhook_id.to_string(),
            transmission.clone(),
            event_body.clone(),
        ));
        if self.fail_verify.load(Ordering::SeqCst) {
            return Err(PayPalServiceError::Api {
                status: 503,
                detail: "mock verification outage".into(),
            });
        }
        Ok(*self.verify_result.lock().unwrap())
    }

    async fn create_plan(
        &self,
        req: CreatePlanRequest,
    ) -> Result<CreatedPlan, PayPalServiceError> {
        self.plan_requests.lock().unwrap().push(req);
        Ok(CreatedPlan {
            id: "P-MOCK".into(),
            status: "ACTIVE".into(),
        })
    }
}
