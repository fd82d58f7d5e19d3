//! Verified provider events.
//!
//! The wire envelope is decoded into a closed set of typed payloads so the
//! reconciler never touches raw JSON. Only fields the reconciler needs are
//! captured; everything else in Stripe's schema is ignored.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::errors::WebhookError;
use super::status::SubscriptionStatus;
use super::subscription::EventMarker;
use crate::domain::foundation::{Timestamp, UserId};

/// Provider event types with a dedicated payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderEventType {
    CheckoutSessionCompleted,
    InvoicePaid,
    InvoicePaymentFailed,
    CustomerSubscriptionUpdated,
    CustomerSubscriptionDeleted,
    Other,
}

impl ProviderEventType {
    pub fn parse(s: &str) -> Self {
        match s {
            "checkout.session.completed" => Self::CheckoutSessionCompleted,
            "invoice.paid" | "invoice.payment_succeeded" => Self::InvoicePaid,
            "invoice.payment_failed" => Self::InvoicePaymentFailed,
            "customer.subscription.updated" => Self::CustomerSubscriptionUpdated,
            "customer.subscription.deleted" => Self::CustomerSubscriptionDeleted,
            _ => Self::Other,
        }
    }
}

/// How the checkout session was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
}

impl PaymentStatus {
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("unpaid") => PaymentStatus::Unpaid,
            Some("no_payment_required") => PaymentStatus::NoPaymentRequired,
            _ => PaymentStatus::Paid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutCompleted {
    pub session_id: String,
    /// User id passed through checkout as the client reference.
    pub user_id: Option<UserId>,
    pub customer_id: String,
    pub subscription_id: String,
    pub price_id: Option<String>,
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoicePaid {
    pub invoice_id: String,
    pub customer_id: Option<String>,
    pub subscription_id: String,
    pub period_start: Option<Timestamp>,
    pub period_end: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoicePaymentFailed {
    pub invoice_id: String,
    pub customer_id: Option<String>,
    pub subscription_id: String,
    pub attempt_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionUpdated {
    pub subscription_id: String,
    pub customer_id: Option<String>,
    /// Raw provider status, kept for logging.
    pub provider_status: String,
    /// `provider_status` mapped onto the local lifecycle.
    pub status: Option<SubscriptionStatus>,
    pub price_id: Option<String>,
    pub period_start: Option<Timestamp>,
    pub period_end: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionDeleted {
    pub subscription_id: String,
    pub customer_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    CheckoutCompleted(CheckoutCompleted),
    InvoicePaid(InvoicePaid),
    InvoicePaymentFailed(InvoicePaymentFailed),
    SubscriptionUpdated(SubscriptionUpdated),
    SubscriptionDeleted(SubscriptionDeleted),
    /// Authentic but nothing to reconcile.
    Unhandled { reason: String },
}

impl EventPayload {
    /// Provider subscription the event is about, if any.
    pub fn subscription_id(&self) -> Option<&str> {
        match self {
            EventPayload::CheckoutCompleted(e) => Some(&e.subscription_id),
            EventPayload::InvoicePaid(e) => Some(&e.subscription_id),
            EventPayload::InvoicePaymentFailed(e) => Some(&e.subscription_id),
            EventPayload::SubscriptionUpdated(e) => Some(&e.subscription_id),
            EventPayload::SubscriptionDeleted(e) => Some(&e.subscription_id),
            EventPayload::Unhandled { .. } => None,
        }
    }

    fn unhandled(reason: impl Into<String>) -> Self {
        EventPayload::Unhandled {
            reason: reason.into(),
        }
    }
}

/// An authenticated, decoded provider event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedEvent {
    pub event_id: String,
    pub event_type: String,
    pub occurred_at: Timestamp,
    pub livemode: bool,
    pub payload: EventPayload,
}

impl VerifiedEvent {
    /// Position of this event for last-writer-wins comparisons.
    pub fn marker(&self) -> EventMarker {
        EventMarker::new(self.occurred_at, self.event_id.clone())
    }

    /// Decodes an already authenticated body.
    pub fn decode(body: &[u8]) -> Result<Self, WebhookError> {
        let envelope: RawEnvelope = serde_json::from_slice(body)
            .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

        if envelope.id.is_empty() {
            return Err(WebhookError::MalformedPayload("empty event id".to_string()));
        }

        let occurred_at = Timestamp::from_unix_secs(envelope.created).ok_or_else(|| {
            WebhookError::MalformedPayload(format!("created out of range: {}", envelope.created))
        })?;

        let object = envelope.data.object;
        let payload = match ProviderEventType::parse(&envelope.event_type) {
            ProviderEventType::CheckoutSessionCompleted => decode_checkout(object)?,
            ProviderEventType::InvoicePaid => decode_invoice_paid(object)?,
            ProviderEventType::InvoicePaymentFailed => decode_invoice_failed(object)?,
            ProviderEventType::CustomerSubscriptionUpdated => decode_subscription_updated(object)?,
            ProviderEventType::CustomerSubscriptionDeleted => decode_subscription_deleted(object)?,
            ProviderEventType::Other => {
                EventPayload::unhandled(format!("event type {} is not reconciled", envelope.event_type))
            }
        };

        Ok(Self {
            event_id: envelope.id,
            event_type: envelope.event_type,
            occurred_at,
            livemode: envelope.livemode,
            payload,
        })
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Wire format
// ════════════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct RawEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    #[serde(default)]
    livemode: bool,
    data: RawData,
}

#[derive(Deserialize)]
struct RawData {
    object: serde_json::Value,
}

/// A reference that Stripe may send either as an id or as an expanded object.
#[derive(Deserialize)]
#[serde(untagged)]
enum Expandable {
    Id(String),
    Object { id: String },
}

impl Expandable {
    fn into_id(self) -> String {
        match self {
            Expandable::Id(id) | Expandable::Object { id } => id,
        }
    }
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct RawList<T> {
    #[serde(default)]
    data: Vec<T>,
}

#[derive(Deserialize)]
struct RawPrice {
    id: String,
}

#[derive(Deserialize)]
struct RawPeriod {
    start: i64,
    end: i64,
}

#[derive(Deserialize)]
struct RawLineItem {
    price: Option<RawPrice>,
    plan: Option<RawPrice>,
    period: Option<RawPeriod>,
}

impl RawLineItem {
    fn price_id(&self) -> Option<String> {
        self.price
            .as_ref()
            .or(self.plan.as_ref())
            .map(|p| p.id.clone())
    }
}

#[derive(Deserialize)]
struct RawCheckoutSession {
    id: String,
    client_reference_id: Option<String>,
    customer: Option<Expandable>,
    subscription: Option<Expandable>,
    payment_status: Option<String>,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
    line_items: Option<RawList<RawLineItem>>,
    #[serde(default)]
    display_items: Vec<RawLineItem>,
}

#[derive(Deserialize)]
struct RawInvoice {
    id: String,
    customer: Option<Expandable>,
    subscription: Option<Expandable>,
    lines: Option<RawList<RawLineItem>>,
    period_start: Option<i64>,
    period_end: Option<i64>,
    #[serde(default)]
    attempt_count: u32,
}

#[derive(Deserialize)]
struct RawSubscription {
    id: String,
    customer: Option<Expandable>,
    status: String,
    items: Option<RawList<RawLineItem>>,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
}

fn object_as<T: serde::de::DeserializeOwned>(
    object: serde_json::Value,
    kind: &str,
) -> Result<T, WebhookError> {
    serde_json::from_value(object)
        .map_err(|e| WebhookError::MalformedPayload(format!("{kind}: {e}")))
}

fn unix(secs: Option<i64>) -> Option<Timestamp> {
    secs.and_then(Timestamp::from_unix_secs)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn decode_checkout(object: serde_json::Value) -> Result<EventPayload, WebhookError> {
    let session: RawCheckoutSession = object_as(object, "checkout session")?;

    let Some(subscription_id) = session.subscription.map(Expandable::into_id) else {
        return Ok(EventPayload::unhandled("checkout session without subscription"));
    };
    let Some(customer_id) = session.customer.map(Expandable::into_id) else {
        return Ok(EventPayload::unhandled("checkout session without customer"));
    };

    let metadata = session.metadata.unwrap_or_default();
    let user_id = non_empty(session.client_reference_id)
        .or_else(|| non_empty(metadata.get("user_id").cloned()))
        .and_then(|id| UserId::new(id).ok());

    let price_id = session
        .line_items
        .and_then(|items| items.data.first().and_then(RawLineItem::price_id))
        .or_else(|| session.display_items.first().and_then(RawLineItem::price_id))
        .or_else(|| non_empty(metadata.get("price_id").cloned()));

    Ok(EventPayload::CheckoutCompleted(CheckoutCompleted {
        session_id: session.id,
        user_id,
        customer_id,
        subscription_id,
        price_id,
        payment_status: PaymentStatus::parse(session.payment_status.as_deref()),
    }))
}

fn decode_invoice_paid(object: serde_json::Value) -> Result<EventPayload, WebhookError> {
    let invoice: RawInvoice = object_as(object, "invoice")?;

    let Some(subscription_id) = invoice.subscription.map(Expandable::into_id) else {
        return Ok(EventPayload::unhandled("invoice without subscription"));
    };

    // The line item carries the period being paid for; the invoice-level
    // fields are only a fallback.
    let line_period = invoice
        .lines
        .and_then(|lines| lines.data.into_iter().find_map(|line| line.period));
    let (period_start, period_end) = match line_period {
        Some(period) => (unix(Some(period.start)), unix(Some(period.end))),
        None => (unix(invoice.period_start), unix(invoice.period_end)),
    };

    Ok(EventPayload::InvoicePaid(InvoicePaid {
        invoice_id: invoice.id,
        customer_id: invoice.customer.map(Expandable::into_id),
        subscription_id,
        period_start,
        period_end,
    }))
}

fn decode_invoice_failed(object: serde_json::Value) -> Result<EventPayload, WebhookError> {
    let invoice: RawInvoice = object_as(object, "invoice")?;

    let Some(subscription_id) = invoice.subscription.map(Expandable::into_id) else {
        return Ok(EventPayload::unhandled("invoice without subscription"));
    };

    Ok(EventPayload::InvoicePaymentFailed(InvoicePaymentFailed {
        invoice_id: invoice.id,
        customer_id: invoice.customer.map(Expandable::into_id),
        subscription_id,
        attempt_count: invoice.attempt_count,
    }))
}

fn decode_subscription_updated(object: serde_json::Value) -> Result<EventPayload, WebhookError> {
    let sub: RawSubscription = object_as(object, "subscription")?;

    let price_id = sub
        .items
        .and_then(|items| items.data.first().and_then(RawLineItem::price_id));

    Ok(EventPayload::SubscriptionUpdated(SubscriptionUpdated {
        status: SubscriptionStatus::from_provider(&sub.status),
        provider_status: sub.status,
        subscription_id: sub.id,
        customer_id: sub.customer.map(Expandable::into_id),
        price_id,
        period_start: unix(sub.current_period_start),
        period_end: unix(sub.current_period_end),
    }))
}

fn decode_subscription_deleted(object: serde_json::Value) -> Result<EventPayload, WebhookError> {
    let sub: RawSubscription = object_as(object, "subscription")?;

    Ok(EventPayload::SubscriptionDeleted(SubscriptionDeleted {
        subscription_id: sub.id,
        customer_id: sub.customer.map(Expandable::into_id),
    }))
}
