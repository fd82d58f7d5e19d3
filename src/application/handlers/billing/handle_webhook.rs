//! HandleWebhookHandler - Command handler for inbound provider webhooks.
//!
//! Verifies the delivery, claims its event id in the idempotency ledger,
//! then folds the event into the owning account with optimistic retries.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::CheckoutCorrelator;
use crate::domain::billing::{
    reconcile, Anomaly, CheckoutCompleted, Effect, EventPayload, PendingCorrelation, PlanCatalog,
    UserAccount, VerifiedEvent, WebhookError, WebhookVerifier,
};
use crate::domain::foundation::{Timestamp, UserId};
use crate::ports::{
    AppliedEvent, CustomerSync, IdempotencyLedger, LedgerOutcome, SaveOutcome, SubscriptionStore,
};

/// Default number of optimistic write attempts per delivery.
pub const DEFAULT_CONFLICT_RETRY_LIMIT: u32 = 5;

/// Command carrying one raw webhook delivery.
#[derive(Debug, Clone)]
pub struct HandleWebhookCommand {
    /// Raw request body, byte for byte as received.
    pub payload: Vec<u8>,
    /// Provider signature header value.
    pub signature: String,
}

/// What happened to an acknowledged delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HandleWebhookResult {
    /// State changed and was persisted.
    Applied {
        event_id: String,
        user_id: UserId,
        effects: Vec<Effect>,
    },
    /// Event was fresh but left the account as it was.
    Unchanged { event_id: String, user_id: UserId },
    /// Event id already in the ledger.
    Duplicate { event_id: String },
    /// Authentic event with nothing to reconcile.
    Ignored { event_id: String, reason: String },
}

impl HandleWebhookResult {
    pub fn event_id(&self) -> &str {
        match self {
            HandleWebhookResult::Applied { event_id, .. }
            | HandleWebhookResult::Unchanged { event_id, .. }
            | HandleWebhookResult::Duplicate { event_id }
            | HandleWebhookResult::Ignored { event_id, .. } => event_id,
        }
    }
}

/// How each retry re-reads the account.
#[derive(Clone, Copy)]
enum Load<'a> {
    User(&'a UserId),
    Owner {
        subscription_id: &'a str,
        user_id: &'a UserId,
    },
}

enum Commit {
    Saved,
    Conflict,
    OwnedElsewhere(String),
}

pub struct HandleWebhookHandler {
    verifier: Arc<WebhookVerifier>,
    ledger: Arc<dyn IdempotencyLedger>,
    store: Arc<dyn SubscriptionStore>,
    correlator: Arc<CheckoutCorrelator>,
    customer_sync: Arc<dyn CustomerSync>,
    catalog: Arc<PlanCatalog>,
    retry_limit: u32,
}

impl HandleWebhookHandler {
    pub fn new(
        verifier: Arc<WebhookVerifier>,
        ledger: Arc<dyn IdempotencyLedger>,
        store: Arc<dyn SubscriptionStore>,
        correlator: Arc<CheckoutCorrelator>,
        customer_sync: Arc<dyn CustomerSync>,
        catalog: Arc<PlanCatalog>,
    ) -> Self {
        Self {
            verifier,
            ledger,
            store,
            correlator,
            customer_sync,
            catalog,
            retry_limit: DEFAULT_CONFLICT_RETRY_LIMIT,
        }
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit.max(1);
        self
    }

    pub async fn handle(
        &self,
        cmd: HandleWebhookCommand,
    ) -> Result<HandleWebhookResult, WebhookError> {
        let event = self
            .verifier
            .verify(&cmd.payload, &cmd.signature)
            .map_err(|e| {
                warn!(error = %e, "Webhook rejected");
                e
            })?;

        if let EventPayload::Unhandled { reason } = &event.payload {
            debug!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                reason = %reason,
                "Webhook acknowledged without reconciliation"
            );
            return Ok(HandleWebhookResult::Ignored {
                event_id: event.event_id.clone(),
                reason: reason.clone(),
            });
        }

        match self.ledger.check_and_record(&AppliedEvent::for_event(&event)).await? {
            LedgerOutcome::AlreadyApplied => {
                info!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    "Duplicate webhook delivery ignored"
                );
                return Ok(HandleWebhookResult::Duplicate {
                    event_id: event.event_id,
                });
            }
            LedgerOutcome::Fresh => {}
        }

        let result = match &event.payload {
            EventPayload::CheckoutCompleted(checkout) => self.apply_checkout(&event, checkout).await,
            _ => self.apply_to_owner(&event).await,
        };

        if let Err(err) = &result {
            if err.is_retryable() {
                if let Err(release_err) = self.ledger.release(&event.event_id).await {
                    error!(
                        event_id = %event.event_id,
                        error = %release_err,
                        "Failed to release ledger entry; redelivery will be treated as duplicate"
                    );
                }
            }
            warn!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                code = err.code(),
                error = %err,
                "Webhook not applied"
            );
        }

        result
    }

    async fn apply_checkout(
        &self,
        event: &VerifiedEvent,
        checkout: &CheckoutCompleted,
    ) -> Result<HandleWebhookResult, WebhookError> {
        let user_id = match &checkout.user_id {
            Some(user_id) => user_id.clone(),
            None => match self.store.find_by_customer_id(&checkout.customer_id).await? {
                Some(account) => account.user_id,
                None => {
                    warn!(
                        anomaly = "unattributed_checkout",
                        event_id = %event.event_id,
                        subscription_id = %checkout.subscription_id,
                        customer_id = %checkout.customer_id,
                        "Checkout carries no user reference and the customer is unknown"
                    );
                    return Ok(HandleWebhookResult::Ignored {
                        event_id: event.event_id.clone(),
                        reason: "checkout not attributable to a user".to_string(),
                    });
                }
            },
        };

        if let Some(owner) = self.store.find_by_subscription_id(&checkout.subscription_id).await? {
            if owner.user_id != user_id {
                return Ok(self.owned_elsewhere(event, &user_id, &checkout.subscription_id));
            }
        }

        let correlation = self.correlator.resolve(&user_id).await?;
        let result = self
            .reconcile_with_retry(event, &user_id, correlation.as_ref(), Load::User(&user_id))
            .await
            .map(|outcome| {
                outcome.unwrap_or_else(|| HandleWebhookResult::Unchanged {
                    event_id: event.event_id.clone(),
                    user_id: user_id.clone(),
                })
            });

        // Only a checkout that opened a subscription consumes the correlation.
        let opened = matches!(
            &result,
            Ok(HandleWebhookResult::Applied { effects, .. })
                if effects.iter().any(|e| matches!(e, Effect::SubscriptionOpened { .. }))
        );
        if !opened {
            self.return_correlation(correlation.as_ref()).await;
        }

        if let Ok(HandleWebhookResult::Applied { effects, .. }) = &result {
            for effect in effects {
                if let Effect::CustomerLinked { customer_id } = effect {
                    self.spawn_customer_tag(customer_id.clone(), user_id.clone());
                }
            }
        }

        result
    }

    async fn apply_to_owner(&self, event: &VerifiedEvent) -> Result<HandleWebhookResult, WebhookError> {
        let Some(subscription_id) = event.payload.subscription_id() else {
            return Ok(HandleWebhookResult::Ignored {
                event_id: event.event_id.clone(),
                reason: "no subscription reference".to_string(),
            });
        };

        let unknown = || {
            warn!(
                anomaly = "unknown_subscription",
                event_id = %event.event_id,
                event_type = %event.event_type,
                subscription_id = %subscription_id,
                "Event references a subscription no account owns"
            );
            WebhookError::UnknownSubscription {
                subscription_id: subscription_id.to_string(),
            }
        };

        let Some(owner) = self.store.find_by_subscription_id(subscription_id).await? else {
            return Err(unknown());
        };
        let user_id = owner.user_id;

        let load = Load::Owner {
            subscription_id,
            user_id: &user_id,
        };
        match self.reconcile_with_retry(event, &user_id, None, load).await? {
            Some(outcome) => Ok(outcome),
            None => Err(unknown()),
        }
    }

    /// Read, reconcile, compare-and-save until the write lands.
    ///
    /// Returns `None` when the account can no longer be found.
    async fn reconcile_with_retry(
        &self,
        event: &VerifiedEvent,
        user_id: &UserId,
        correlation: Option<&PendingCorrelation>,
        load: Load<'_>,
    ) -> Result<Option<HandleWebhookResult>, WebhookError> {
        for attempt in 1..=self.retry_limit {
            let Some(current) = self.load(load).await? else {
                return Ok(None);
            };

            let reconciliation = reconcile(&current, event, correlation, &self.catalog);
            log_anomalies(event, user_id, &reconciliation.anomalies);

            if !reconciliation.is_changed() {
                debug!(event_id = %event.event_id, user_id = %user_id, "Event left account unchanged");
                return Ok(Some(HandleWebhookResult::Unchanged {
                    event_id: event.event_id.clone(),
                    user_id: user_id.clone(),
                }));
            }

            match self.commit(reconciliation.next).await? {
                Commit::Saved => {
                    info!(
                        event_id = %event.event_id,
                        event_type = %event.event_type,
                        user_id = %user_id,
                        effects = reconciliation.effects.len(),
                        attempt,
                        "Webhook applied"
                    );
                    return Ok(Some(HandleWebhookResult::Applied {
                        event_id: event.event_id.clone(),
                        user_id: user_id.clone(),
                        effects: reconciliation.effects,
                    }));
                }
                Commit::Conflict => {
                    debug!(event_id = %event.event_id, user_id = %user_id, attempt, "Write conflict, retrying");
                }
                Commit::OwnedElsewhere(subscription_id) => {
                    return Ok(Some(self.owned_elsewhere(event, user_id, &subscription_id)));
                }
            }
        }

        Err(WebhookError::ConflictRetryExhausted {
            user_id: user_id.to_string(),
            attempts: self.retry_limit,
        })
    }

    async fn load(&self, load: Load<'_>) -> Result<Option<UserAccount>, WebhookError> {
        Ok(match load {
            // Checkout may be the first event for this user.
            Load::User(user_id) => Some(
                self.store
                    .find_by_user(user_id)
                    .await?
                    .unwrap_or_else(|| UserAccount::new(user_id.clone())),
            ),
            Load::Owner {
                subscription_id,
                user_id,
            } => self
                .store
                .find_by_subscription_id(subscription_id)
                .await?
                .filter(|a| &a.user_id == user_id),
        })
    }

    async fn commit(&self, mut next: UserAccount) -> Result<Commit, WebhookError> {
        next.updated_at = Timestamp::now();
        Ok(match self.store.save(&next).await? {
            SaveOutcome::Saved { .. } => Commit::Saved,
            SaveOutcome::VersionConflict => Commit::Conflict,
            SaveOutcome::SubscriptionOwnedElsewhere { subscription_id } => {
                Commit::OwnedElsewhere(subscription_id)
            }
        })
    }

    fn owned_elsewhere(
        &self,
        event: &VerifiedEvent,
        user_id: &UserId,
        subscription_id: &str,
    ) -> HandleWebhookResult {
        warn!(
            anomaly = "subscription_owned_elsewhere",
            event_id = %event.event_id,
            user_id = %user_id,
            subscription_id = %subscription_id,
            "Subscription already belongs to another account"
        );
        HandleWebhookResult::Unchanged {
            event_id: event.event_id.clone(),
            user_id: user_id.clone(),
        }
    }

    async fn return_correlation(&self, correlation: Option<&PendingCorrelation>) {
        let Some(correlation) = correlation else {
            return;
        };
        match self.correlator.restore(correlation).await {
            Ok(true) => debug!(user_id = %correlation.user_id, "Checkout correlation restored"),
            Ok(false) => debug!(user_id = %correlation.user_id, "Newer checkout correlation kept"),
            Err(e) => error!(
                user_id = %correlation.user_id,
                error = %e,
                "Failed to restore checkout correlation"
            ),
        }
    }

    fn spawn_customer_tag(&self, customer_id: String, user_id: UserId) {
        let sync = Arc::clone(&self.customer_sync);
        tokio::spawn(async move {
            match sync.tag_customer(&customer_id, &user_id).await {
                Ok(()) => debug!(customer_id = %customer_id, user_id = %user_id, "Customer tagged"),
                Err(e) => warn!(
                    customer_id = %customer_id,
                    user_id = %user_id,
                    error = %e,
                    "Customer metadata write-back failed"
                ),
            }
        });
    }
}

fn log_anomalies(event: &VerifiedEvent, user_id: &UserId, anomalies: &[Anomaly]) {
    for anomaly in anomalies {
        warn!(
            anomaly = anomaly.kind(),
            event_id = %event.event_id,
            event_type = %event.event_type,
            user_id = %user_id,
            details = ?anomaly,
            "Reconciliation anomaly"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryCorrelationStore, InMemoryLedger, InMemorySubscriptionStore};
    use crate::application::handlers::billing::BeginCheckoutCommand;
    use crate::domain::billing::{signature_header, SubscriptionStatus};
    use crate::domain::foundation::DomainError;
    use crate::ports::{SyncError, UsageOutcome};
    use async_trait::async_trait;
    use secrecy::SecretString;
    use serde_json::json;
    use std::sync::Mutex;

    const SECRET: &str = "whsec_test_secret";
    const BASIC_PRICE: &str = "price_1PRPTDBW9IshQPOY344HAEeB";
    const PRO_PRICE: &str = "price_1PRPUnBW9IshQPOY8lWSpbpb";

    // ════════════════════════════════════════════════════════════════════════════
    // Mock Implementations
    // ════════════════════════════════════════════════════════════════════════════

    #[derive(Default)]
    struct RecordingSync {
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl CustomerSync for RecordingSync {
        async fn tag_customer(&self, customer_id: &str, user_id: &UserId) -> Result<(), SyncError> {
            self.calls
                .lock()
                .unwrap()
                .push((customer_id.to_string(), user_id.to_string()));
            Ok(())
        }
    }

    /// Reads through to a real store, but every save loses the race.
    struct AlwaysConflicting {
        inner: InMemorySubscriptionStore,
        saves: Mutex<u32>,
    }

    #[async_trait]
    impl SubscriptionStore for AlwaysConflicting {
        async fn find_by_user(&self, user_id: &UserId) -> Result<Option<UserAccount>, DomainError> {
            self.inner.find_by_user(user_id).await
        }
        async fn find_by_subscription_id(&self, id: &str) -> Result<Option<UserAccount>, DomainError> {
            self.inner.find_by_subscription_id(id).await
        }
        async fn find_by_customer_id(&self, id: &str) -> Result<Option<UserAccount>, DomainError> {
            self.inner.find_by_customer_id(id).await
        }
        async fn save(&self, _account: &UserAccount) -> Result<SaveOutcome, DomainError> {
            *self.saves.lock().unwrap() += 1;
            Ok(SaveOutcome::VersionConflict)
        }
        async fn record_usage(
            &self,
            _user_id: &UserId,
            _cost: u64,
            _ceiling: Option<u64>,
        ) -> Result<UsageOutcome, DomainError> {
            Ok(UsageOutcome::NoSubscription)
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Fixtures
    // ════════════════════════════════════════════════════════════════════════════

    struct Harness {
        handler: HandleWebhookHandler,
        ledger: InMemoryLedger,
        store: InMemorySubscriptionStore,
        correlator: Arc<CheckoutCorrelator>,
        sync: Arc<RecordingSync>,
    }

    fn harness() -> Harness {
        let store = InMemorySubscriptionStore::new();
        harness_with_store(store.clone(), Arc::new(store))
    }

    fn harness_with_store(store: InMemorySubscriptionStore, port: Arc<dyn SubscriptionStore>) -> Harness {
        let ledger = InMemoryLedger::new();
        let catalog = Arc::new(PlanCatalog::standard());
        let correlator = Arc::new(CheckoutCorrelator::new(
            Arc::new(InMemoryCorrelationStore::new()),
            Arc::clone(&catalog),
        ));
        let sync = Arc::new(RecordingSync::default());
        let handler = HandleWebhookHandler::new(
            Arc::new(WebhookVerifier::new(SecretString::new(SECRET.to_string()))),
            Arc::new(ledger.clone()),
            port,
            Arc::clone(&correlator),
            sync.clone(),
            catalog,
        )
        .with_retry_limit(3);
        Harness {
            handler,
            ledger,
            store,
            correlator,
            sync,
        }
    }

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn signed(body: serde_json::Value) -> HandleWebhookCommand {
        let payload = serde_json::to_vec(&body).unwrap();
        let signature = signature_header(SECRET, Timestamp::now().as_unix_secs(), &payload);
        HandleWebhookCommand { payload, signature }
    }

    fn checkout(event_id: &str, created: i64, user_id: &str, sub_id: &str) -> HandleWebhookCommand {
        signed(json!({
            "id": event_id,
            "type": "checkout.session.completed",
            "created": created,
            "livemode": false,
            "data": { "object": {
                "id": format!("cs_{event_id}"),
                "client_reference_id": user_id,
                "customer": format!("cus_{user_id}"),
                "subscription": sub_id,
                "payment_status": "paid",
                "metadata": {}
            }}
        }))
    }

    fn invoice_paid(event_id: &str, created: i64, sub_id: &str, start: i64, end: i64) -> HandleWebhookCommand {
        signed(json!({
            "id": event_id,
            "type": "invoice.paid",
            "created": created,
            "data": { "object": {
                "id": format!("in_{event_id}"),
                "subscription": sub_id,
                "period_start": start,
                "period_end": end
            }}
        }))
    }

    fn subscription_deleted(event_id: &str, created: i64, sub_id: &str) -> HandleWebhookCommand {
        signed(json!({
            "id": event_id,
            "type": "customer.subscription.deleted",
            "created": created,
            "data": { "object": { "id": sub_id, "status": "canceled" } }
        }))
    }

    async fn begin(h: &Harness, user_id: &str, price: Option<&str>) {
        h.correlator
            .begin(BeginCheckoutCommand {
                user_id: user(user_id),
                price_id: price.map(str::to_string),
            })
            .await
            .unwrap();
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Authenticity
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn bad_signature_is_rejected_before_the_ledger() {
        let h = harness();
        let mut cmd = checkout("evt_1", 100, "u1", "sub_1");
        cmd.signature = signature_header("whsec_other", Timestamp::now().as_unix_secs(), &cmd.payload);

        let err = h.handler.handle(cmd).await.unwrap_err();

        assert!(matches!(err, WebhookError::Authenticity(_)));
        assert_eq!(h.ledger.len().await, 0);
    }

    #[tokio::test]
    async fn unhandled_event_type_is_ignored() {
        let h = harness();
        let cmd = signed(json!({
            "id": "evt_x", "type": "customer.created", "created": 1,
            "data": { "object": { "id": "cus_1" } }
        }));

        let result = h.handler.handle(cmd).await.unwrap();

        assert!(matches!(result, HandleWebhookResult::Ignored { .. }));
        assert_eq!(h.ledger.len().await, 0);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Checkout
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn checkout_with_correlation_activates_hinted_plan() {
        let h = harness();
        begin(&h, "u1", Some(PRO_PRICE)).await;

        let result = h.handler.handle(checkout("evt_1", 100, "u1", "sub_1")).await.unwrap();

        assert!(matches!(result, HandleWebhookResult::Applied { .. }));
        let account = h.store.find_by_user(&user("u1")).await.unwrap().unwrap();
        let sub = account.subscription.unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.plan_id.as_str(), "pro");
        assert_eq!(account.provider_customer_id.as_deref(), Some("cus_u1"));
        assert!(h.correlator.resolve(&user("u1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn checkout_without_correlation_still_creates_subscription() {
        let h = harness();

        let result = h.handler.handle(checkout("evt_1", 100, "u1", "sub_1")).await.unwrap();

        assert!(matches!(result, HandleWebhookResult::Applied { .. }));
        let sub = h.store.find_by_user(&user("u1")).await.unwrap().unwrap().subscription.unwrap();
        assert_eq!(sub.plan_id.as_str(), "starter");
    }

    #[tokio::test]
    async fn checkout_tags_customer_in_background() {
        let h = harness();
        h.handler.handle(checkout("evt_1", 100, "u1", "sub_1")).await.unwrap();

        for _ in 0..50 {
            if !h.sync.calls.lock().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }

        let calls = h.sync.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![("cus_u1".to_string(), "u1".to_string())]);
    }

    #[tokio::test]
    async fn subscription_claimed_by_another_user_is_not_stolen() {
        let h = harness();
        h.handler.handle(checkout("evt_1", 100, "u1", "sub_1")).await.unwrap();

        let result = h.handler.handle(checkout("evt_2", 200, "u2", "sub_1")).await.unwrap();

        assert!(matches!(result, HandleWebhookResult::Unchanged { .. }));
        assert!(h.store.find_by_user(&user("u2")).await.unwrap().is_none());
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Idempotency
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn redelivery_is_a_duplicate() {
        let h = harness();
        h.handler.handle(checkout("evt_1", 100, "u1", "sub_1")).await.unwrap();
        let version = h.store.find_by_user(&user("u1")).await.unwrap().unwrap().version;

        let result = h.handler.handle(checkout("evt_1", 100, "u1", "sub_1")).await.unwrap();

        assert_eq!(result, HandleWebhookResult::Duplicate { event_id: "evt_1".into() });
        assert_eq!(h.store.find_by_user(&user("u1")).await.unwrap().unwrap().version, version);
    }

    #[tokio::test]
    async fn invoice_paid_resets_usage_on_new_period() {
        let h = harness();
        h.handler.handle(checkout("evt_1", 100, "u1", "sub_1")).await.unwrap();
        h.handler.handle(invoice_paid("evt_2", 110, "sub_1", 1_000, 2_000)).await.unwrap();
        h.store.record_usage(&user("u1"), 7, None).await.unwrap();

        h.handler.handle(invoice_paid("evt_3", 210, "sub_1", 2_000, 3_000)).await.unwrap();

        let sub = h.store.find_by_user(&user("u1")).await.unwrap().unwrap().subscription.unwrap();
        assert_eq!(sub.quota_used, 0);
        assert_eq!(sub.current_period_end.unwrap().as_unix_secs(), 3_000);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Error paths
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn unknown_subscription_is_acknowledged_and_kept_in_ledger() {
        let h = harness();

        let err = h.handler.handle(subscription_deleted("evt_9", 100, "sub_missing")).await.unwrap_err();

        assert!(matches!(err, WebhookError::UnknownSubscription { .. }));
        assert!(!err.is_retryable());
        assert!(h.ledger.find("evt_9").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn exhausted_retries_release_ledger_and_restore_correlation() {
        let store = InMemorySubscriptionStore::new();
        let conflicting = Arc::new(AlwaysConflicting {
            inner: store.clone(),
            saves: Mutex::new(0),
        });
        let h = harness_with_store(store, conflicting.clone());
        begin(&h, "u1", Some(BASIC_PRICE)).await;

        let err = h.handler.handle(checkout("evt_1", 100, "u1", "sub_1")).await.unwrap_err();

        assert!(matches!(err, WebhookError::ConflictRetryExhausted { attempts: 3, .. }));
        assert_eq!(*conflicting.saves.lock().unwrap(), 3);
        assert!(h.ledger.find("evt_1").await.unwrap().is_none());
        let restored = h.correlator.resolve(&user("u1")).await.unwrap().unwrap();
        assert_eq!(restored.price_id.as_deref(), Some(BASIC_PRICE));
    }

    #[tokio::test]
    async fn stale_checkout_leaves_pending_correlation_for_the_next_checkout() {
        let h = harness();
        h.handler.handle(checkout("evt_1", 100, "u1", "sub_1")).await.unwrap();
        h.handler.handle(subscription_deleted("evt_2", 200, "sub_1")).await.unwrap();
        begin(&h, "u1", Some(PRO_PRICE)).await;

        let stale = h.handler.handle(checkout("evt_3", 90, "u1", "sub_1")).await.unwrap();
        assert!(matches!(stale, HandleWebhookResult::Unchanged { .. }));

        let fresh = h.handler.handle(checkout("evt_4", 300, "u1", "sub_2")).await.unwrap();
        assert!(matches!(fresh, HandleWebhookResult::Applied { .. }));
        let sub = h.store.find_by_user(&user("u1")).await.unwrap().unwrap().subscription.unwrap();
        assert_eq!(sub.provider_subscription_id, "sub_2");
        assert_eq!(sub.plan_id.as_str(), "pro");
        assert!(h.correlator.resolve(&user("u1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn redelivered_checkout_under_new_event_id_keeps_correlation() {
        let h = harness();
        h.handler.handle(checkout("evt_1", 100, "u1", "sub_1")).await.unwrap();
        begin(&h, "u1", Some(BASIC_PRICE)).await;

        let again = h.handler.handle(checkout("evt_2", 100, "u1", "sub_1")).await.unwrap();

        assert!(matches!(again, HandleWebhookResult::Unchanged { .. }));
        let kept = h.correlator.resolve(&user("u1")).await.unwrap().unwrap();
        assert_eq!(kept.price_id.as_deref(), Some(BASIC_PRICE));
    }

    #[tokio::test]
    async fn canceled_subscription_is_not_resurrected_by_stale_checkout() {
        let h = harness();
        h.handler.handle(checkout("evt_1", 100, "u1", "sub_1")).await.unwrap();
        h.handler.handle(subscription_deleted("evt_2", 300, "sub_1")).await.unwrap();

        let result = h.handler.handle(checkout("evt_3", 50, "u1", "sub_1")).await.unwrap();

        assert!(matches!(result, HandleWebhookResult::Unchanged { .. }));
        let sub = h.store.find_by_user(&user("u1")).await.unwrap().unwrap().subscription.unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Canceled);
    }
}
