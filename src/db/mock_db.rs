//! In-memory repository implementations for tests. They enforce the same
//! invariants as the Postgres implementations (one open subscription per
//! user, event-log uniqueness) so handler tests exercise real behavior.

use async_trait::async_trait;
use std::sync::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::plan_repository::PlanRepository;
use crate::db::subscription_repository::{
    ApprovalCallbackOutcome, EventApplyOutcome, EventRecord, InsertSubscriptionError,
    NewSubscription, StatusPatch, SubscriptionRepository,
};
use crate::models::plan::SubscriptionPlan;
use crate::models::subscription::{Subscription, SubscriptionEvent, SubscriptionStatus};

#[derive(Default)]
pub struct MockPlanRepository {
    pub plans: Mutex<Vec<SubscriptionPlan>>,
    pub should_fail: bool,
}

impl MockPlanRepository {
    pub fn with_plans(plans: Vec<SubscriptionPlan>) -> Self {
        MockPlanRepository {
            plans: Mutex::new(plans),
            should_fail: false,
        }
    }
}

#[async_trait]
impl PlanRepository for MockPlanRepository {
    async fn find_plan(&self, plan_id: i64) -> Result<Option<SubscriptionPlan>, sqlx::Error> {
        if self.should_fail {
            return Err(sqlx::Error::Protocol("mock plan repo failure".into()));
        }
        Ok(self
            .plans
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == plan_id)
            .cloned())
    }

    async fn list_billable(&self) -> Result<Vec<SubscriptionPlan>, sqlx::Error> {
        Ok(self
            .plans
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.is_billable())
            .cloned()
            .collect())
    }

    async fn set_paypal_plan_id(
        &self,
        plan_id: i64,
        paypal_plan_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let mut plans = self.plans.lock().unwrap();
        match plans.iter_mut().find(|p| p.id == plan_id) {
            Some(plan) => {
                plan.paypal_plan_id = Some(paypal_plan_id.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct MockSubscriptionRepository {
    pub subscriptions: Mutex<Vec<Subscription>>,
    pub events: Mutex<Vec<SubscriptionEvent>>,
    pub should_fail: bool,
}

impl MockSubscriptionRepository {
    pub fn failing() -> Self {
        MockSubscriptionRepository {
            should_fail: true,
            ..Default::default()
        }
    }

    pub fn seed(&self, subscription: Subscription) {
        self.subscriptions.lock().unwrap().push(subscription);
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn status_of(&self, paypal_subscription_id: &str) -> Option<SubscriptionStatus> {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.paypal_subscription_id == paypal_subscription_id)
            .map(|s| s.status)
    }

    fn fail_check(&self) -> Result<(), sqlx::Error> {
        if self.should_fail {
            Err(sqlx::Error::Protocol("mock subscription repo failure".into()))
        } else {
            Ok(())
        }
    }

    fn append_event(
        events: &mut Vec<SubscriptionEvent>,
        subscription_id: i64,
        event: &EventRecord<'_>,
    ) -> bool {
        let duplicate = events
            .iter()
            .any(|e| e.event_type == event.event_type && e.external_event_id == event.external_event_id);
        if duplicate {
            return false;
        }
        let id = events.len() as i64 + 1;
        events.push(SubscriptionEvent {
            id,
            subscription_id,
            event_type: event.event_type.to_string(),
            external_event_id: event.external_event_id.to_string(),
            payload: event.payload.clone(),
            received_at: OffsetDateTime::now_utc(),
        });
        true
    }
}

#[async_trait]
impl SubscriptionRepository for MockSubscriptionRepository {
    async fn find_by_paypal_subscription_id(
        &self,
        paypal_subscription_id: &str,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        self.fail_check()?;
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.paypal_subscription_id == paypal_subscription_id)
            .cloned())
    }

    async fn find_active_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        self.fail_check()?;
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.user_id == user_id && s.is_active())
            .cloned())
    }

    async fn insert_pending(
        &self,
        new: NewSubscription<'_>,
    ) -> Result<Subscription, InsertSubscriptionError> {
        self.fail_check()?;
        let mut subscriptions = self.subscriptions.lock().unwrap();
        if subscriptions
            .iter()
            .any(|s| s.user_id == new.user_id && s.status.is_open())
        {
            return Err(InsertSubscriptionError::AlreadySubscribed);
        }

        let now = OffsetDateTime::now_utc();
        let subscription = Subscription {
            id: subscriptions.len() as i64 + 1,
            user_id: new.user_id,
            plan_id: new.plan_id,
            paypal_subscription_id: new.paypal_subscription_id.to_string(),
            status: SubscriptionStatus::PendingApproval,
            starts_at: Some(now),
            ends_at: None,
            trial_ends_at: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        };
        subscriptions.push(subscription.clone());

        let mut events = self.events.lock().unwrap();
        Self::append_event(&mut events, subscription.id, &new.seed_event);
        Ok(subscription)
    }

    async fn mark_approval_returned(
        &self,
        user_id: Uuid,
        paypal_subscription_id: &str,
    ) -> Result<ApprovalCallbackOutcome, sqlx::Error> {
        self.fail_check()?;
        let mut subscriptions = self.subscriptions.lock().unwrap();
        match subscriptions
            .iter_mut()
            .find(|s| s.user_id == user_id && s.paypal_subscription_id == paypal_subscription_id)
        {
            Some(sub) if sub.status == SubscriptionStatus::PendingApproval => {
                sub.status = SubscriptionStatus::PendingWebhookConfirmation;
                sub.updated_at = OffsetDateTime::now_utc();
                Ok(ApprovalCallbackOutcome::Updated)
            }
            Some(_) => Ok(ApprovalCallbackOutcome::AlreadySettled),
            None => Ok(ApprovalCallbackOutcome::NotFound),
        }
    }

    async fn cancel_pending_for_user(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<u64, sqlx::Error> {
        self.fail_check()?;
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let mut affected = 0;
        for sub in subscriptions
            .iter_mut()
            .filter(|s| s.user_id == user_id && s.status == SubscriptionStatus::PendingApproval)
        {
            sub.status = SubscriptionStatus::CancelledByUser;
            sub.ends_at = Some(now);
            sub.updated_at = now;
            affected += 1;
        }
        Ok(affected)
    }

    async fn apply_event(
        &self,
        paypal_subscription_id: &str,
        event: EventRecord<'_>,
        patch: StatusPatch,
    ) -> Result<EventApplyOutcome, sqlx::Error> {
        self.fail_check()?;
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let sub = match subscriptions
            .iter_mut()
            .find(|s| s.paypal_subscription_id == paypal_subscription_id)
        {
            Some(sub) => sub,
            None => return Ok(EventApplyOutcome::UnknownSubscription),
        };

        let mut events = self.events.lock().unwrap();
        if !Self::append_event(&mut events, sub.id, &event) {
            return Ok(EventApplyOutcome::Duplicate);
        }

        sub.status = patch.status;
        if let Some(starts_at) = patch.starts_at {
            sub.starts_at = Some(starts_at);
        }
        if let Some(ends_at) = patch.ends_at {
            sub.ends_at = Some(ends_at);
        }
        if let Some(cancelled_at) = patch.cancelled_at {
            sub.cancelled_at = Some(cancelled_at);
        }
        sub.updated_at = OffsetDateTime::now_utc();
        Ok(EventApplyOutcome::Applied(sub.clone()))
    }
}
