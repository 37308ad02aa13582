//! External request/notification bridge (§4.5/§6 of the wire protocol this
//! crate's market core is embedded behind).
//!
//! The original fabric is a Redis pub/sub bridge; this module gives the same
//! envelope shape, channel naming scheme, and worker-pool dispatch an
//! in-process, non-Redis body, so a caller outside this crate (or an
//! integration test) can drive a `Market` through the same wire contract
//! without standing up a broker.

use crate::config::MessagingConfig;
use crate::market::{Market, MarketEvent, Offer, Trade};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::time::timeout;
use tracing::{error, warn};

/// `M/OFFER`, `M/OFFER/RESPONSE`, and so on for a market with id `market_id`.
pub fn offer_channel(market_id: &str) -> String {
    format!("{market_id}/OFFER")
}

pub fn delete_offer_channel(market_id: &str) -> String {
    format!("{market_id}/DELETE_OFFER")
}

pub fn accept_offer_channel(market_id: &str) -> String {
    format!("{market_id}/ACCEPT_OFFER")
}

/// Every request channel's reply is published on `<channel>/RESPONSE`.
pub fn response_channel(request_channel: &str) -> String {
    format!("{request_channel}/RESPONSE")
}

pub fn notify_event_channel(market_id: &str) -> String {
    format!("market/{market_id}/notify_event")
}

pub fn notify_event_response_channel(market_id: &str) -> String {
    format!("market/{market_id}/notify_event/response")
}

/// The outer wire envelope: the inner payload travels JSON-encoded inside
/// `data`, mirroring the `{"data": "{...}"}` shape on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRequest {
    pub data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireStatus {
    Ready,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResponse {
    pub status: WireStatus,
    pub transaction_uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer: Option<Offer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade: Option<Trade>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl WireResponse {
    fn ready(transaction_uuid: String) -> Self {
        Self { status: WireStatus::Ready, transaction_uuid, offer: None, trade: None, exception: None, error_message: None }
    }

    fn error(transaction_uuid: String, exception: &str, message: impl Into<String>) -> Self {
        Self {
            status: WireStatus::Error,
            transaction_uuid,
            offer: None,
            trade: None,
            exception: Some(exception.to_string()),
            error_message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OfferRequestPayload {
    pub price: f64,
    pub energy: f64,
    pub seller: String,
    pub transaction_uuid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteOfferRequestPayload {
    /// Either a bare offer id, or (per the envelope rule for fields named
    /// `offer_or_id`) a JSON-serialized `Offer` string.
    pub offer_or_id: String,
    pub transaction_uuid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcceptOfferRequestPayload {
    pub offer_or_id: String,
    pub buyer: String,
    pub energy: Option<f64>,
    pub trade_rate: Option<f64>,
    pub transaction_uuid: String,
}

/// Resolves a field that the envelope rule allows to be either a bare id or
/// a JSON-serialized `Offer`, per §6's `offer_or_id` parsing rule.
fn resolve_offer_id(raw: &str) -> String {
    match serde_json::from_str::<Offer>(raw) {
        Ok(offer) => offer.id,
        Err(_) => raw.to_string(),
    }
}

/// Dispatches wire requests against a shared `Market` on a bounded worker
/// pool, mirroring the original subscriber's `lock_market_action` semantics:
/// every handler call takes the market's lock for its whole duration, so
/// concurrent workers interleave but each request completes atomically.
pub struct MarketSubscriber {
    market: Arc<parking_lot::Mutex<Market>>,
    permits: Arc<Semaphore>,
    shutdown_join_timeout: Duration,
    outstanding: AsyncMutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl MarketSubscriber {
    pub fn new(market: Arc<parking_lot::Mutex<Market>>, config: &MessagingConfig) -> Self {
        Self {
            market,
            permits: Arc::new(Semaphore::new(config.worker_pool_size)),
            shutdown_join_timeout: Duration::from_secs(config.shutdown_join_timeout_seconds),
            outstanding: AsyncMutex::new(Vec::new()),
        }
    }

    /// Spawns `body` on the bounded worker pool and tracks the join handle so
    /// `stop` can drain it.
    async fn spawn_tracked<F>(&self, body: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        let handle = tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.expect("semaphore not closed");
            body.await;
        });
        self.outstanding.lock().await.push(handle);
    }

    pub async fn handle_offer(&self, request: WireRequest) -> WireResponse {
        let payload: OfferRequestPayload = match serde_json::from_str(&request.data) {
            Ok(p) => p,
            Err(e) => return WireResponse::error(String::new(), "ParseError", e.to_string()),
        };
        let market = self.market.clone();
        let txn = payload.transaction_uuid.clone();
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.spawn_tracked(async move {
            let result = {
                let mut guard = market.lock();
                guard.offer(payload.price, payload.energy, payload.seller, true)
            };
            let response = match result {
                Ok(offer) => {
                    let mut r = WireResponse::ready(payload.transaction_uuid);
                    r.offer = Some(offer);
                    r
                }
                Err(e) => WireResponse::error(payload.transaction_uuid, "MarketException", e.to_string()),
            };
            let _ = tx.send(response);
        })
        .await;
        rx.await.unwrap_or_else(|_| WireResponse::error(txn, "InternalError", "worker dropped response"))
    }

    /// Preserves a known quirk of the original bridge: this handler replies
    /// `status: ready` even when the delete fails, merging the error payload
    /// into an otherwise-ready response rather than flipping the status.
    pub async fn handle_delete_offer(&self, request: WireRequest) -> WireResponse {
        let payload: DeleteOfferRequestPayload = match serde_json::from_str(&request.data) {
            Ok(p) => p,
            Err(e) => return WireResponse::error(String::new(), "ParseError", e.to_string()),
        };
        let market = self.market.clone();
        let txn = payload.transaction_uuid.clone();
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.spawn_tracked(async move {
            let offer_id = resolve_offer_id(&payload.offer_or_id);
            let result = {
                let mut guard = market.lock();
                guard.delete_offer(&offer_id)
            };
            let mut response = WireResponse::ready(payload.transaction_uuid.clone());
            if let Err(e) = result {
                response.exception = Some("MarketException".to_string());
                response.error_message = Some(e.to_string());
            }
            let _ = tx.send(response);
        })
        .await;
        rx.await.unwrap_or_else(|_| WireResponse::ready(txn))
    }

    pub async fn handle_accept_offer(&self, request: WireRequest) -> WireResponse {
        let payload: AcceptOfferRequestPayload = match serde_json::from_str(&request.data) {
            Ok(p) => p,
            Err(e) => return WireResponse::error(String::new(), "ParseError", e.to_string()),
        };
        let market = self.market.clone();
        let txn = payload.transaction_uuid.clone();
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.spawn_tracked(async move {
            let offer_id = resolve_offer_id(&payload.offer_or_id);
            let result = {
                let mut guard = market.lock();
                guard.accept_offer(&offer_id, payload.buyer, payload.energy, payload.trade_rate, None, false)
            };
            let response = match result {
                Ok(trade) => {
                    let mut r = WireResponse::ready(payload.transaction_uuid);
                    r.trade = Some(trade);
                    r
                }
                Err(e) => WireResponse::error(payload.transaction_uuid, "MarketException", e.to_string()),
            };
            let _ = tx.send(response);
        })
        .await;
        rx.await.unwrap_or_else(|_| WireResponse::error(txn, "InternalError", "worker dropped response"))
    }

    /// Joins every outstanding worker future with a per-future timeout, then
    /// releases the pool. Matches the "stop() joins outstanding futures with
    /// a 5-second timeout each" resource-model requirement.
    pub async fn stop(&self) {
        let mut handles = self.outstanding.lock().await;
        for handle in handles.drain(..) {
            match timeout(self.shutdown_join_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "subscriber worker panicked during shutdown"),
                Err(_) => warn!("subscriber worker did not join within shutdown timeout"),
            }
        }
    }
}

/// Publishes a market event to listeners and blocks the publisher until an
/// acknowledgement arrives or `timeout` elapses; on timeout the event is
/// still considered delivered and the simulation proceeds, per §4.5.
pub async fn publish_with_ack_timeout<F>(event: &MarketEvent, ack: F, response_timeout: Duration)
where
    F: std::future::Future<Output = ()>,
{
    if timeout(response_timeout, ack).await.is_err() {
        warn!(?event, "listener did not acknowledge market event publish within timeout");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MessagingConfig;
    use crate::market::FeePolicy;
    use chrono::Utc;

    fn subscriber() -> MarketSubscriber {
        let market = Market::new("m1", Utc::now(), false, FeePolicy::none());
        let config = MessagingConfig { worker_pool_size: 4, shutdown_join_timeout_seconds: 5, dispatch_events_bottom_to_top: true };
        MarketSubscriber::new(Arc::new(parking_lot::Mutex::new(market)), &config)
    }

    #[test]
    fn channel_names_follow_the_per_market_scheme() {
        assert_eq!(offer_channel("m1"), "m1/OFFER");
        assert_eq!(response_channel(&offer_channel("m1")), "m1/OFFER/RESPONSE");
        assert_eq!(notify_event_channel("m1"), "market/m1/notify_event");
    }

    #[tokio::test]
    async fn offer_request_round_trips_through_the_envelope() {
        let sub = subscriber();
        let data = serde_json::to_string(&serde_json::json!({
            "price": 10.0, "energy": 2.0, "seller": "pv-1", "transaction_uuid": "txn-1"
        }))
        .unwrap();
        let response = sub.handle_offer(WireRequest { data }).await;
        assert_eq!(response.status, WireStatus::Ready);
        assert_eq!(response.transaction_uuid, "txn-1");
        assert!(response.offer.is_some());
        sub.stop().await;
    }

    #[tokio::test]
    async fn delete_offer_replies_ready_even_when_the_offer_is_missing() {
        let sub = subscriber();
        let data = serde_json::to_string(&serde_json::json!({
            "offer_or_id": "does-not-exist", "transaction_uuid": "txn-2"
        }))
        .unwrap();
        let response = sub.handle_delete_offer(WireRequest { data }).await;
        assert_eq!(response.status, WireStatus::Ready);
        assert!(response.error_message.is_some());
        sub.stop().await;
    }

    #[tokio::test]
    async fn accept_offer_rejects_unknown_offer_with_error_status() {
        let sub = subscriber();
        let data = serde_json::to_string(&serde_json::json!({
            "offer_or_id": "does-not-exist", "buyer": "house-2", "transaction_uuid": "txn-3"
        }))
        .unwrap();
        let response = sub.handle_accept_offer(WireRequest { data }).await;
        assert_eq!(response.status, WireStatus::Error);
        sub.stop().await;
    }
}
