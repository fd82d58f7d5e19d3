//! Pure reconciliation of verified events into a user account.
//!
//! `reconcile(current, event) -> next` has no I/O. Each field group is a
//! register with its own merge rule so any two events commute:
//!
//! - status: last writer wins on `(occurred_at, event_id)`; `canceled` is
//!   absorbing regardless of event time; provider `incomplete` carries no
//!   information and is skipped.
//! - plan: last writer wins on its own marker.
//! - billing period: both bounds only move forward; usage resets when the
//!   start advances.

use serde::Serialize;

use super::correlation::PendingCorrelation;
use super::event::{
    CheckoutCompleted, EventPayload, InvoicePaid, InvoicePaymentFailed, PaymentStatus,
    SubscriptionDeleted, SubscriptionUpdated, VerifiedEvent,
};
use super::plan::{PlanCatalog, PlanId};
use super::status::SubscriptionStatus;
use super::subscription::{EventMarker, Subscription, UserAccount};
use crate::domain::foundation::{StateMachine, Timestamp};

/// A state change produced by an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    SubscriptionOpened {
        subscription_id: String,
        plan_id: PlanId,
        status: SubscriptionStatus,
    },
    CustomerLinked {
        customer_id: String,
    },
    StatusChanged {
        subscription_id: String,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    },
    PlanChanged {
        subscription_id: String,
        from: PlanId,
        to: PlanId,
    },
    PeriodAdvanced {
        subscription_id: String,
        period_end: Option<Timestamp>,
    },
    UsageReset {
        subscription_id: String,
    },
}

/// Something that should not happen under a well-behaved provider.
///
/// Anomalies never fail processing; they are logged for manual follow-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Anomaly {
    /// Checkout confirmed with no live correlation for the user.
    MissingCorrelation,
    /// No catalog plan for the checkout's price; fallback plan assigned.
    UnknownPrice {
        price_id: Option<String>,
        assigned: PlanId,
    },
    /// Price on a subscription update maps to no plan; plan left as is.
    UnmappedPrice {
        subscription_id: String,
        price_id: String,
    },
    /// Provider status with no local meaning.
    UnmappedStatus {
        subscription_id: String,
        provider_status: String,
    },
    /// A canceled subscription was confirmed again by a checkout.
    ResurrectionBlocked {
        subscription_id: String,
    },
    /// A new checkout replaced a subscription that was still live.
    SupersededLiveSubscription {
        retired_subscription_id: String,
    },
    /// The account owns no subscription with this id.
    UnknownSubscription {
        subscription_id: String,
    },
    InvalidTransition {
        subscription_id: String,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    },
}

impl Anomaly {
    /// Short name used as the `anomaly` log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Anomaly::MissingCorrelation => "missing_correlation",
            Anomaly::UnknownPrice { .. } => "unknown_price",
            Anomaly::UnmappedPrice { .. } => "unmapped_price",
            Anomaly::UnmappedStatus { .. } => "unmapped_status",
            Anomaly::ResurrectionBlocked { .. } => "resurrection_blocked",
            Anomaly::SupersededLiveSubscription { .. } => "superseded_live_subscription",
            Anomaly::UnknownSubscription { .. } => "unknown_subscription",
            Anomaly::InvalidTransition { .. } => "invalid_transition",
        }
    }
}

/// Result of reconciling one event against one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub next: UserAccount,
    pub effects: Vec<Effect>,
    pub anomalies: Vec<Anomaly>,
    changed: bool,
}

impl Reconciliation {
    /// True when `next` differs from the input and must be written.
    ///
    /// Can be true with no effects: a stale-looking event may still move a
    /// conflict marker forward.
    pub fn is_changed(&self) -> bool {
        self.changed
    }
}

#[derive(Default)]
struct Outcome {
    effects: Vec<Effect>,
    anomalies: Vec<Anomaly>,
}

/// Computes the next account state for `event`.
///
/// `correlation` is only consulted for checkout confirmations.
pub fn reconcile(
    current: &UserAccount,
    event: &VerifiedEvent,
    correlation: Option<&PendingCorrelation>,
    catalog: &PlanCatalog,
) -> Reconciliation {
    let mut next = current.clone();
    let mut out = Outcome::default();
    let marker = event.marker();

    match &event.payload {
        EventPayload::CheckoutCompleted(checkout) => {
            open_from_checkout(&mut next, checkout, &marker, correlation, catalog, &mut out);
        }
        EventPayload::InvoicePaid(paid) => {
            if let Some(sub) = locate(&mut next, &paid.subscription_id, &mut out) {
                apply_invoice_paid(sub, paid, &marker, &mut out);
            }
        }
        EventPayload::InvoicePaymentFailed(failed) => {
            if let Some(sub) = locate(&mut next, &failed.subscription_id, &mut out) {
                apply_invoice_failed(sub, failed, &marker, &mut out);
            }
        }
        EventPayload::SubscriptionUpdated(updated) => {
            if let Some(sub) = locate(&mut next, &updated.subscription_id, &mut out) {
                apply_subscription_updated(sub, updated, &marker, catalog, &mut out);
            }
        }
        EventPayload::SubscriptionDeleted(deleted) => {
            if let Some(sub) = locate(&mut next, &deleted.subscription_id, &mut out) {
                apply_subscription_deleted(sub, deleted, &marker, &mut out);
            }
        }
        EventPayload::Unhandled { .. } => {}
    }

    let changed = next != *current;
    Reconciliation {
        next,
        effects: out.effects,
        anomalies: out.anomalies,
        changed,
    }
}

fn locate<'a>(
    account: &'a mut UserAccount,
    subscription_id: &str,
    out: &mut Outcome,
) -> Option<&'a mut Subscription> {
    let found = account.find_subscription_mut(subscription_id);
    if found.is_none() {
        out.anomalies.push(Anomaly::UnknownSubscription {
            subscription_id: subscription_id.to_string(),
        });
    }
    found
}

// ════════════════════════════════════════════════════════════════════════════
// Per event class
// ════════════════════════════════════════════════════════════════════════════

fn open_from_checkout(
    account: &mut UserAccount,
    checkout: &CheckoutCompleted,
    marker: &EventMarker,
    correlation: Option<&PendingCorrelation>,
    catalog: &PlanCatalog,
    out: &mut Outcome,
) {
    if let Some(existing) = account.find_subscription(&checkout.subscription_id) {
        // Already attached: a redelivery under a new event id, or a late
        // duplicate of a canceled subscription.
        if existing.is_canceled() {
            out.anomalies.push(Anomaly::ResurrectionBlocked {
                subscription_id: checkout.subscription_id.clone(),
            });
        }
        return;
    }

    if correlation.is_none() {
        out.anomalies.push(Anomaly::MissingCorrelation);
    }

    let plan_id = resolve_checkout_plan(checkout, correlation, catalog, out);
    let status = match checkout.payment_status {
        PaymentStatus::Unpaid => SubscriptionStatus::Pending,
        PaymentStatus::Paid | PaymentStatus::NoPaymentRequired => SubscriptionStatus::Active,
    };

    if account.provider_customer_id.as_deref() != Some(checkout.customer_id.as_str()) {
        account.provider_customer_id = Some(checkout.customer_id.clone());
        out.effects.push(Effect::CustomerLinked {
            customer_id: checkout.customer_id.clone(),
        });
    }

    let opened = Subscription::open(
        checkout.subscription_id.clone(),
        plan_id.clone(),
        status,
        marker.clone(),
    );
    out.effects.push(Effect::SubscriptionOpened {
        subscription_id: checkout.subscription_id.clone(),
        plan_id,
        status,
    });

    // An older checkout arriving after a newer one must not displace it.
    let newer_is_live = account
        .subscription
        .as_ref()
        .map_or(false, |cur| !cur.is_canceled() && cur.created_at > opened.created_at);
    if newer_is_live {
        out.anomalies.push(Anomaly::SupersededLiveSubscription {
            retired_subscription_id: opened.provider_subscription_id.clone(),
        });
        account.retired_subscriptions.push(opened);
        return;
    }

    if let Some(retired) = account.install_subscription(opened) {
        out.anomalies.push(Anomaly::SupersededLiveSubscription {
            retired_subscription_id: retired,
        });
    }
}

/// Event price first, then the price chosen at checkout start, then the
/// catalog fallback.
fn resolve_checkout_plan(
    checkout: &CheckoutCompleted,
    correlation: Option<&PendingCorrelation>,
    catalog: &PlanCatalog,
    out: &mut Outcome,
) -> PlanId {
    let hinted = correlation.and_then(|c| c.price_id.as_deref());
    let found = checkout
        .price_id
        .as_deref()
        .and_then(|p| catalog.plan_for_price(p))
        .or_else(|| hinted.and_then(|p| catalog.plan_for_price(p)));

    match found {
        Some(plan) => plan.id.clone(),
        None => {
            let assigned = catalog.fallback().id.clone();
            out.anomalies.push(Anomaly::UnknownPrice {
                price_id: checkout.price_id.clone().or(hinted.map(str::to_string)),
                assigned: assigned.clone(),
            });
            assigned
        }
    }
}

fn apply_invoice_paid(
    sub: &mut Subscription,
    paid: &InvoicePaid,
    marker: &EventMarker,
    out: &mut Outcome,
) {
    observe_period(sub, paid.period_start, paid.period_end, out);
    write_status(sub, SubscriptionStatus::Active, marker, out);
}

fn apply_invoice_failed(
    sub: &mut Subscription,
    _failed: &InvoicePaymentFailed,
    marker: &EventMarker,
    out: &mut Outcome,
) {
    write_status(sub, SubscriptionStatus::PastDue, marker, out);
}

fn apply_subscription_updated(
    sub: &mut Subscription,
    updated: &SubscriptionUpdated,
    marker: &EventMarker,
    catalog: &PlanCatalog,
    out: &mut Outcome,
) {
    observe_period(sub, updated.period_start, updated.period_end, out);

    if let Some(price_id) = &updated.price_id {
        write_plan(sub, price_id, marker, catalog, out);
    }

    match updated.status {
        Some(status) => write_status(sub, status, marker, out),
        None => out.anomalies.push(Anomaly::UnmappedStatus {
            subscription_id: sub.provider_subscription_id.clone(),
            provider_status: updated.provider_status.clone(),
        }),
    }
}

fn apply_subscription_deleted(
    sub: &mut Subscription,
    _deleted: &SubscriptionDeleted,
    marker: &EventMarker,
    out: &mut Outcome,
) {
    write_status(sub, SubscriptionStatus::Canceled, marker, out);
}

// ════════════════════════════════════════════════════════════════════════════
// Register merges
// ════════════════════════════════════════════════════════════════════════════

fn write_status(
    sub: &mut Subscription,
    target: SubscriptionStatus,
    marker: &EventMarker,
    out: &mut Outcome,
) {
    if target == SubscriptionStatus::Pending {
        return;
    }

    let fresh = EventMarker::admits(sub.status_marker.as_ref(), marker);
    EventMarker::advance(&mut sub.status_marker, marker);

    if target == SubscriptionStatus::Canceled {
        let canceled_at = sub
            .canceled_at
            .map_or(marker.occurred_at, |at| at.min(marker.occurred_at));
        sub.canceled_at = Some(canceled_at);
        set_status(sub, target, out);
        return;
    }

    if !fresh || sub.is_canceled() || sub.status == target {
        return;
    }

    // Intermediate states may have been missed; any forward path is fine.
    if !sub.status.can_reach(&target) {
        out.anomalies.push(Anomaly::InvalidTransition {
            subscription_id: sub.provider_subscription_id.clone(),
            from: sub.status,
            to: target,
        });
        return;
    }
    set_status(sub, target, out);
}

fn set_status(sub: &mut Subscription, target: SubscriptionStatus, out: &mut Outcome) {
    if sub.status == target {
        return;
    }
    out.effects.push(Effect::StatusChanged {
        subscription_id: sub.provider_subscription_id.clone(),
        from: sub.status,
        to: target,
    });
    sub.status = target;
}

fn write_plan(
    sub: &mut Subscription,
    price_id: &str,
    marker: &EventMarker,
    catalog: &PlanCatalog,
    out: &mut Outcome,
) {
    let Some(plan) = catalog.plan_for_price(price_id) else {
        out.anomalies.push(Anomaly::UnmappedPrice {
            subscription_id: sub.provider_subscription_id.clone(),
            price_id: price_id.to_string(),
        });
        return;
    };

    let fresh = EventMarker::admits(sub.plan_marker.as_ref(), marker);
    EventMarker::advance(&mut sub.plan_marker, marker);
    if fresh && sub.plan_id != plan.id {
        out.effects.push(Effect::PlanChanged {
            subscription_id: sub.provider_subscription_id.clone(),
            from: sub.plan_id.clone(),
            to: plan.id.clone(),
        });
        sub.plan_id = plan.id.clone();
    }
}

fn observe_period(
    sub: &mut Subscription,
    start: Option<Timestamp>,
    end: Option<Timestamp>,
    out: &mut Outcome,
) {
    let previous_start = sub.current_period_start;
    if !sub.observe_period(start, end) {
        return;
    }
    if sub.current_period_start != previous_start {
        out.effects.push(Effect::UsageReset {
            subscription_id: sub.provider_subscription_id.clone(),
        });
    }
    out.effects.push(Effect::PeriodAdvanced {
        subscription_id: sub.provider_subscription_id.clone(),
        period_end: sub.current_period_end,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::UserId;
    use chrono::Duration;
    use proptest::prelude::*;

    const BASIC_PRICE: &str = "price_1PRPTDBW9IshQPOY344HAEeB";
    const PRO_PRICE: &str = "price_1PRPUnBW9IshQPOY8lWSpbpb";
    const STARTER_PRICE: &str = "price_1PTDOEBW9IshQPOYIY96dpIY";

    fn ts(secs: i64) -> Timestamp {
        Timestamp::from_unix_secs(secs).unwrap()
    }

    fn user() -> UserId {
        UserId::new("u1").unwrap()
    }

    fn event(id: &str, at: i64, payload: EventPayload) -> VerifiedEvent {
        VerifiedEvent {
            event_id: id.to_string(),
            event_type: "test".to_string(),
            occurred_at: ts(at),
            livemode: false,
            payload,
        }
    }

    fn checkout(sub: &str, price: Option<&str>, payment: PaymentStatus) -> EventPayload {
        EventPayload::CheckoutCompleted(CheckoutCompleted {
            session_id: "cs_1".into(),
            user_id: Some(user()),
            customer_id: "cus_1".into(),
            subscription_id: sub.into(),
            price_id: price.map(str::to_string),
            payment_status: payment,
        })
    }

    fn invoice_paid(sub: &str, start: i64, end: i64) -> EventPayload {
        EventPayload::InvoicePaid(InvoicePaid {
            invoice_id: "in_1".into(),
            customer_id: Some("cus_1".into()),
            subscription_id: sub.into(),
            period_start: Some(ts(start)),
            period_end: Some(ts(end)),
        })
    }

    fn invoice_failed(sub: &str) -> EventPayload {
        EventPayload::InvoicePaymentFailed(InvoicePaymentFailed {
            invoice_id: "in_2".into(),
            customer_id: None,
            subscription_id: sub.into(),
            attempt_count: 1,
        })
    }

    fn updated(sub: &str, status: &str, price: Option<&str>) -> EventPayload {
        EventPayload::SubscriptionUpdated(SubscriptionUpdated {
            subscription_id: sub.into(),
            customer_id: None,
            provider_status: status.into(),
            status: SubscriptionStatus::from_provider(status),
            price_id: price.map(str::to_string),
            period_start: None,
            period_end: None,
        })
    }

    fn deleted(sub: &str) -> EventPayload {
        EventPayload::SubscriptionDeleted(SubscriptionDeleted {
            subscription_id: sub.into(),
            customer_id: None,
        })
    }

    fn correlation(price: Option<&str>) -> PendingCorrelation {
        PendingCorrelation::new(user(), price.map(str::to_string), ts(0), Duration::minutes(30))
    }

    fn catalog() -> PlanCatalog {
        PlanCatalog::standard()
    }

    /// Account with an active basic subscription opened at t=10.
    fn active_account() -> UserAccount {
        let first = reconcile(
            &UserAccount::new(user()),
            &event("evt_open", 10, checkout("sub_1", Some(BASIC_PRICE), PaymentStatus::Paid)),
            Some(&correlation(None)),
            &catalog(),
        );
        first.next
    }

    fn apply(account: &UserAccount, e: &VerifiedEvent) -> Reconciliation {
        reconcile(account, e, None, &catalog())
    }

    fn sub(account: &UserAccount) -> &Subscription {
        account.subscription.as_ref().unwrap()
    }

    // ══════════════════════════════════════════════════════════════
    // Checkout confirmed
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn checkout_with_correlation_opens_active_subscription() {
        let r = reconcile(
            &UserAccount::new(user()),
            &event("evt_1", 10, checkout("sub_1", Some(BASIC_PRICE), PaymentStatus::Paid)),
            Some(&correlation(None)),
            &catalog(),
        );

        assert!(r.is_changed());
        assert!(r.anomalies.is_empty());
        assert_eq!(r.next.provider_customer_id.as_deref(), Some("cus_1"));
        let s = sub(&r.next);
        assert_eq!(s.status, SubscriptionStatus::Active);
        assert_eq!(s.plan_id.as_str(), "basic");
        assert_eq!(s.quota_used, 0);
    }

    #[test]
    fn checkout_without_correlation_still_opens_but_flags_anomaly() {
        let r = apply(
            &UserAccount::new(user()),
            &event("evt_1", 10, checkout("sub_1", Some(BASIC_PRICE), PaymentStatus::Paid)),
        );

        assert!(sub(&r.next).status.grants_quota());
        assert_eq!(r.anomalies, vec![Anomaly::MissingCorrelation]);
    }

    #[test]
    fn unpaid_checkout_opens_pending() {
        let r = apply(
            &UserAccount::new(user()),
            &event("evt_1", 10, checkout("sub_1", Some(BASIC_PRICE), PaymentStatus::Unpaid)),
        );
        assert_eq!(sub(&r.next).status, SubscriptionStatus::Pending);
    }

    #[test]
    fn checkout_plan_falls_back_to_correlation_price_hint() {
        let r = reconcile(
            &UserAccount::new(user()),
            &event("evt_1", 10, checkout("sub_1", None, PaymentStatus::Paid)),
            Some(&correlation(Some(PRO_PRICE))),
            &catalog(),
        );
        assert_eq!(sub(&r.next).plan_id.as_str(), "pro");
        assert!(r.anomalies.is_empty());
    }

    #[test]
    fn checkout_with_unknown_price_gets_fallback_plan() {
        let r = reconcile(
            &UserAccount::new(user()),
            &event("evt_1", 10, checkout("sub_1", Some("price_gone"), PaymentStatus::Paid)),
            Some(&correlation(None)),
            &catalog(),
        );

        assert_eq!(sub(&r.next).plan_id.as_str(), "starter");
        assert!(matches!(r.anomalies[0], Anomaly::UnknownPrice { .. }));
    }

    #[test]
    fn redelivered_checkout_under_new_event_id_is_a_noop() {
        let account = active_account();
        let r = apply(
            &account,
            &event("evt_again", 11, checkout("sub_1", Some(BASIC_PRICE), PaymentStatus::Paid)),
        );
        assert!(!r.is_changed());
        assert!(r.effects.is_empty());
    }

    #[test]
    fn checkout_for_canceled_subscription_does_not_resurrect() {
        let account = apply(&active_account(), &event("evt_del", 20, deleted("sub_1"))).next;

        let r = apply(
            &account,
            &event("evt_late", 30, checkout("sub_1", Some(BASIC_PRICE), PaymentStatus::Paid)),
        );

        assert!(!r.is_changed());
        assert_eq!(
            r.anomalies,
            vec![Anomaly::ResurrectionBlocked {
                subscription_id: "sub_1".into()
            }]
        );
        assert_eq!(sub(&r.next).status, SubscriptionStatus::Canceled);
    }

    #[test]
    fn resubscription_opens_new_subscription_next_to_canceled_one() {
        let account = apply(&active_account(), &event("evt_del", 20, deleted("sub_1"))).next;

        let r = reconcile(
            &account,
            &event("evt_new", 30, checkout("sub_2", Some(PRO_PRICE), PaymentStatus::Paid)),
            Some(&correlation(None)),
            &catalog(),
        );

        assert!(r.anomalies.is_empty());
        assert_eq!(sub(&r.next).provider_subscription_id, "sub_2");
        assert!(r.next.find_subscription("sub_1").unwrap().is_canceled());
    }

    #[test]
    fn newer_checkout_supersedes_live_subscription() {
        let r = apply(
            &active_account(),
            &event("evt_2", 20, checkout("sub_2", Some(PRO_PRICE), PaymentStatus::Paid)),
        );

        assert_eq!(sub(&r.next).provider_subscription_id, "sub_2");
        assert!(r.anomalies.contains(&Anomaly::SupersededLiveSubscription {
            retired_subscription_id: "sub_1".into()
        }));
    }

    #[test]
    fn older_checkout_does_not_displace_newer_live_subscription() {
        let r = apply(
            &active_account(),
            &event("evt_0", 5, checkout("sub_0", Some(PRO_PRICE), PaymentStatus::Paid)),
        );

        assert_eq!(sub(&r.next).provider_subscription_id, "sub_1");
        assert!(r.next.find_subscription("sub_0").is_some());
    }

    // ══════════════════════════════════════════════════════════════
    // Invoices
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn invoice_paid_for_new_period_resets_usage_and_advances_end() {
        let mut account = apply(&active_account(), &event("evt_p1", 20, invoice_paid("sub_1", 100, 200))).next;
        account.subscription.as_mut().unwrap().consume(40);

        let r = apply(&account, &event("evt_p2", 220, invoice_paid("sub_1", 200, 300)));

        let s = sub(&r.next);
        assert_eq!(s.quota_used, 0);
        assert_eq!(s.current_period_end, Some(ts(300)));
        assert!(r.effects.iter().any(|e| matches!(e, Effect::UsageReset { .. })));
    }

    #[test]
    fn invoice_paid_for_same_period_keeps_usage() {
        let mut account = apply(&active_account(), &event("evt_p1", 20, invoice_paid("sub_1", 100, 200))).next;
        account.subscription.as_mut().unwrap().consume(40);

        let r = apply(&account, &event("evt_p1b", 21, invoice_paid("sub_1", 100, 200)));

        assert_eq!(sub(&r.next).quota_used, 40);
    }

    #[test]
    fn invoice_paid_activates_pending_subscription() {
        let account = apply(
            &UserAccount::new(user()),
            &event("evt_1", 10, checkout("sub_1", Some(BASIC_PRICE), PaymentStatus::Unpaid)),
        )
        .next;

        let r = apply(&account, &event("evt_2", 11, invoice_paid("sub_1", 10, 40)));
        assert_eq!(sub(&r.next).status, SubscriptionStatus::Active);
    }

    #[test]
    fn payment_failure_marks_past_due_and_recovery_reactivates() {
        let account = apply(&active_account(), &event("evt_f", 20, invoice_failed("sub_1"))).next;
        assert_eq!(sub(&account).status, SubscriptionStatus::PastDue);

        let account = apply(&account, &event("evt_p", 30, invoice_paid("sub_1", 30, 60))).next;
        assert_eq!(sub(&account).status, SubscriptionStatus::Active);
    }

    #[test]
    fn stale_payment_failure_is_ignored() {
        let account = apply(&active_account(), &event("evt_p", 30, invoice_paid("sub_1", 30, 60))).next;

        let r = apply(&account, &event("evt_f", 20, invoice_failed("sub_1")));

        assert_eq!(sub(&r.next).status, SubscriptionStatus::Active);
        assert!(!r.is_changed());
    }

    // ══════════════════════════════════════════════════════════════
    // Subscription updated / deleted
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn update_changes_plan_and_status() {
        let r = apply(
            &active_account(),
            &event("evt_u", 20, updated("sub_1", "past_due", Some(PRO_PRICE))),
        );

        let s = sub(&r.next);
        assert_eq!(s.plan_id.as_str(), "pro");
        assert_eq!(s.status, SubscriptionStatus::PastDue);
    }

    #[test]
    fn older_update_is_ignored_after_newer_one() {
        let account = apply(
            &active_account(),
            &event("evt_new", 30, updated("sub_1", "active", Some(PRO_PRICE))),
        )
        .next;

        let r = apply(&account, &event("evt_old", 20, updated("sub_1", "past_due", Some(STARTER_PRICE))));

        assert_eq!(sub(&r.next).plan_id.as_str(), "pro");
        assert_eq!(sub(&r.next).status, SubscriptionStatus::Active);
    }

    #[test]
    fn equal_timestamps_resolve_by_event_id() {
        let a = event("evt_a", 20, updated("sub_1", "past_due", None));
        let b = event("evt_b", 20, updated("sub_1", "active", None));

        let ab = apply(&apply(&active_account(), &a).next, &b).next;
        let ba = apply(&apply(&active_account(), &b).next, &a).next;

        assert_eq!(sub(&ab).status, SubscriptionStatus::Active);
        assert_eq!(ab.subscription, ba.subscription);
    }

    #[test]
    fn unknown_provider_status_is_flagged() {
        let r = apply(&active_account(), &event("evt_u", 20, updated("sub_1", "mystery", None)));
        assert!(matches!(r.anomalies[0], Anomaly::UnmappedStatus { .. }));
        assert_eq!(sub(&r.next).status, SubscriptionStatus::Active);
    }

    #[test]
    fn deleted_cancels_even_when_older_than_last_update() {
        let account = apply(&active_account(), &event("evt_u", 50, updated("sub_1", "active", None))).next;

        let r = apply(&account, &event("evt_d", 40, deleted("sub_1")));

        let s = sub(&r.next);
        assert!(s.is_canceled());
        assert_eq!(s.canceled_at, Some(ts(40)));
    }

    #[test]
    fn canceled_is_terminal() {
        let account = apply(&active_account(), &event("evt_d", 20, deleted("sub_1"))).next;

        for (i, payload) in [
            invoice_paid("sub_1", 30, 60),
            updated("sub_1", "active", None),
            invoice_failed("sub_1"),
        ]
        .into_iter()
        .enumerate()
        {
            let r = apply(&account, &event(&format!("evt_{i}"), 100, payload));
            assert!(sub(&r.next).is_canceled());
        }
    }

    #[test]
    fn repeated_delete_is_idempotent() {
        let account = apply(&active_account(), &event("evt_d", 20, deleted("sub_1"))).next;
        let r = apply(&account, &event("evt_d2", 25, deleted("sub_1")));

        assert!(r.effects.is_empty());
        assert_eq!(sub(&r.next).canceled_at, Some(ts(20)));
    }

    #[test]
    fn event_for_foreign_subscription_is_anomaly() {
        let r = apply(&active_account(), &event("evt_x", 20, deleted("sub_other")));
        assert!(!r.is_changed());
        assert!(matches!(r.anomalies[0], Anomaly::UnknownSubscription { .. }));
    }

    #[test]
    fn incomplete_status_is_skipped() {
        let r = apply(&active_account(), &event("evt_u", 20, updated("sub_1", "incomplete", None)));
        assert!(!r.is_changed());
    }

    // ══════════════════════════════════════════════════════════════
    // Properties
    // ══════════════════════════════════════════════════════════════

    fn arb_mutation() -> impl Strategy<Value = (i64, EventPayload)> {
        let payload = prop_oneof![
            (0i64..50, 1i64..40).prop_map(|(start, len)| invoice_paid("sub_1", start, start + len)),
            Just(invoice_failed("sub_1")),
            (
                prop::sample::select(vec!["active", "past_due", "canceled", "incomplete", "trialing"]),
                prop::option::of(prop::sample::select(vec![BASIC_PRICE, PRO_PRICE, STARTER_PRICE, "price_x"])),
                prop::option::of(0i64..50),
            )
                .prop_map(|(status, price, start)| {
                    let mut p = updated("sub_1", status, price);
                    if let EventPayload::SubscriptionUpdated(u) = &mut p {
                        u.period_start = start.map(ts);
                        u.period_end = start.map(|s| ts(s + 30));
                    }
                    p
                }),
            Just(deleted("sub_1")),
        ];
        (11i64..40, payload)
    }

    fn arb_start() -> impl Strategy<Value = UserAccount> {
        (
            prop::sample::select(vec![PaymentStatus::Paid, PaymentStatus::Unpaid]),
            0u64..100,
        )
            .prop_map(|(payment, used)| {
                let mut account = apply(
                    &UserAccount::new(user()),
                    &event("evt_open", 10, checkout("sub_1", Some(BASIC_PRICE), payment)),
                )
                .next;
                account.subscription.as_mut().unwrap().consume(used);
                account
            })
    }

    proptest! {
        #[test]
        fn any_two_mutations_commute(
            start in arb_start(),
            (at_a, a) in arb_mutation(),
            (at_b, b) in arb_mutation(),
        ) {
            let a = event("evt_a", at_a, a);
            let b = event("evt_b", at_b, b);

            let ab = apply(&apply(&start, &a).next, &b).next;
            let ba = apply(&apply(&start, &b).next, &a).next;

            prop_assert_eq!(ab.subscription, ba.subscription);
        }

        #[test]
        fn reapplying_an_event_changes_nothing(
            start in arb_start(),
            (at, payload) in arb_mutation(),
        ) {
            let e = event("evt_a", at, payload);
            let once = apply(&start, &e).next;
            let twice = apply(&once, &e);

            prop_assert!(!twice.is_changed());
        }

        #[test]
        fn usage_only_drops_on_period_advance(
            start in arb_start(),
            (at, payload) in arb_mutation(),
        ) {
            let e = event("evt_a", at, payload);
            let r = apply(&start, &e);
            let before = sub(&start).quota_used;
            let after = sub(&r.next).quota_used;

            let reset = r.effects.iter().any(|e| matches!(e, Effect::UsageReset { .. }));
            prop_assert!(after == before || (reset && after == 0));
        }
    }
}
