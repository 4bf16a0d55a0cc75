//! Wire types for the Q-Verse REST and realtime APIs
//!
//! # Design Principles
//! 1. Inbound frames never panic on parse: unknown topics and payloads that do
//!    not match their topic's shape fall back to `RealtimeEvent::Unknown`
//! 2. Known payloads keep unrecognized fields in `#[serde(flatten)] extra`
//! 3. Field names match the backend's JSON exactly

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

use crate::error::ClientError;

// ============================================================================
// REST Envelope
// ============================================================================

/// Response wrapper used by every REST endpoint
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Envelope<T = Value> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(message.into()) }
    }
}

impl Envelope<Value> {
    /// Unwrap `data` into the caller's type, or surface `error`
    ///
    /// `success=true` with no `data` decodes from `null`, so `()` and
    /// `Option<_>` targets still succeed.
    pub fn into_data<T: DeserializeOwned>(self) -> Result<T, ClientError> {
        if !self.success {
            return Err(ClientError::Api(self.error.unwrap_or_else(|| "Request failed".to_string())));
        }
        serde_json::from_value(self.data.unwrap_or(Value::Null))
            .map_err(|e| ClientError::Parse(format!("unexpected data shape: {}", e)))
    }
}

/// GET /oracle/price/{token}
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PriceQuote {
    pub token: String,
    pub price: f64,
    #[serde(default)]
    pub sources: u32,
}

// ============================================================================
// WebSocket Control Frames (Outbound)
// ============================================================================

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Subscribe,
    Unsubscribe,
}

/// `{"action": "subscribe", "event": "price:QVR"}`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlFrame {
    pub action: ControlAction,
    pub event: String,
}

impl ControlFrame {
    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self { action: ControlAction::Subscribe, event: topic.into() }
    }

    pub fn unsubscribe(topic: impl Into<String>) -> Self {
        Self { action: ControlAction::Unsubscribe, event: topic.into() }
    }
}

// ============================================================================
// WebSocket Inbound Frames
// ============================================================================

/// `{"type": "<topic>", "data": <any>}`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct InboundFrame {
    /// Missing `type` means the frame is dropped
    #[serde(rename = "type", default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, ClientError> {
        serde_json::from_str(text).map_err(|e| ClientError::Parse(e.to_string()))
    }
}

// ============================================================================
// Topics
// ============================================================================

/// Locally emitted pseudo-topics, never sent to the server
pub const CONNECTED_TOPIC: &str = "connected";
pub const DISCONNECTED_TOPIC: &str = "disconnected";
pub const ERROR_TOPIC: &str = "error";

/// Whether a topic is produced by the client itself rather than the server
pub fn is_local_topic(topic: &str) -> bool {
    matches!(topic, CONNECTED_TOPIC | DISCONNECTED_TOPIC | ERROR_TOPIC)
}

/// Well-known realtime topics
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    /// `price:<TOKEN>`
    Price(String),
    /// `transactions:<wallet_id>`
    Transactions(String),
    /// `block:new`
    NewBlock,
    /// `network:tps`
    NetworkTps,
    Connected,
    Disconnected,
    Error,
    /// Any other topic string
    Custom(String),
}

impl Topic {
    pub fn price(token: impl Into<String>) -> Self {
        Topic::Price(token.into())
    }

    pub fn transactions(wallet_id: impl Into<String>) -> Self {
        Topic::Transactions(wallet_id.into())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Price(token) => write!(f, "price:{}", token),
            Topic::Transactions(wallet) => write!(f, "transactions:{}", wallet),
            Topic::NewBlock => f.write_str("block:new"),
            Topic::NetworkTps => f.write_str("network:tps"),
            Topic::Connected => f.write_str(CONNECTED_TOPIC),
            Topic::Disconnected => f.write_str(DISCONNECTED_TOPIC),
            Topic::Error => f.write_str(ERROR_TOPIC),
            Topic::Custom(name) => f.write_str(name),
        }
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        match s {
            "block:new" => Topic::NewBlock,
            "network:tps" => Topic::NetworkTps,
            CONNECTED_TOPIC => Topic::Connected,
            DISCONNECTED_TOPIC => Topic::Disconnected,
            ERROR_TOPIC => Topic::Error,
            _ => {
                if let Some(token) = s.strip_prefix("price:").filter(|t| !t.is_empty()) {
                    Topic::Price(token.to_string())
                } else if let Some(wallet) =
                    s.strip_prefix("transactions:").filter(|w| !w.is_empty())
                {
                    Topic::Transactions(wallet.to_string())
                } else {
                    Topic::Custom(s.to_string())
                }
            }
        }
    }
}

impl From<String> for Topic {
    fn from(s: String) -> Self {
        Topic::from(s.as_str())
    }
}

// ============================================================================
// Typed Realtime Payloads
// ============================================================================

/// `price:<TOKEN>` payload
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PriceTick {
    /// Filled from the topic when the server omits it
    #[serde(default)]
    pub token: String,
    pub price: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `block:new` payload
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BlockEvent {
    pub block_number: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_count: Option<i64>,
    /// Unix seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `transactions:<wallet_id>` payload
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TransactionEvent {
    /// Filled from the topic when the server omits it
    #[serde(default)]
    pub wallet_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `network:tps` payload
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TpsTick {
    pub tps: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A realtime payload decoded according to its topic
#[derive(Clone, Debug, PartialEq)]
pub enum RealtimeEvent {
    Price(PriceTick),
    Block(BlockEvent),
    Transaction(TransactionEvent),
    Tps(TpsTick),
    Connected,
    Disconnected,
    Error { message: String },
    /// Topic without a known payload shape, or a payload that did not match it
    Unknown { topic: String, data: Value },
}

impl RealtimeEvent {
    /// Decode `data` using the payload shape implied by `topic`
    pub fn decode(topic: &Topic, data: &Value) -> Self {
        let decoded = match topic {
            Topic::Price(token) => from_data::<PriceTick>(data).map(|mut tick| {
                if tick.token.is_empty() {
                    tick.token = token.clone();
                }
                RealtimeEvent::Price(tick)
            }),
            Topic::Transactions(wallet) => from_data::<TransactionEvent>(data).map(|mut tx| {
                if tx.wallet_id.is_empty() {
                    tx.wallet_id = wallet.clone();
                }
                RealtimeEvent::Transaction(tx)
            }),
            Topic::NewBlock => from_data(data).map(RealtimeEvent::Block),
            Topic::NetworkTps => from_data(data).map(RealtimeEvent::Tps),
            Topic::Connected => Some(RealtimeEvent::Connected),
            Topic::Disconnected => Some(RealtimeEvent::Disconnected),
            Topic::Error => Some(RealtimeEvent::Error {
                message: data
                    .get("error")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown error")
                    .to_string(),
            }),
            Topic::Custom(_) => None,
        };

        decoded.unwrap_or_else(|| RealtimeEvent::Unknown { topic: topic.to_string(), data: data.clone() })
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, RealtimeEvent::Unknown { .. })
    }
}

fn from_data<T: DeserializeOwned>(data: &Value) -> Option<T> {
    serde_json::from_value(data.clone()).ok()
}

// ============================================================================
// Statistics Tracking
// ============================================================================

/// Counters for inbound realtime frames
#[derive(Clone, Debug, Default)]
pub struct StreamStats {
    pub total_frames: u64,
    /// Frames delivered to at least one listener
    pub dispatched: u64,
    /// Frames with no `type` or no listener for it
    pub unrouted: u64,
    pub parse_errors: u64,
    pub type_counts: HashMap<String, u64>,
    pub last_topic: Option<String>,
    pub last_frame_at: Option<DateTime<Utc>>,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a parsed frame and whether any listener received it
    pub fn record(&mut self, frame: &InboundFrame, delivered: bool) {
        self.total_frames += 1;
        self.last_frame_at = Some(Utc::now());

        if delivered {
            self.dispatched += 1;
        } else {
            self.unrouted += 1;
        }

        let key = frame.topic.clone().unwrap_or_else(|| "_no_type".to_string());
        *self.type_counts.entry(key.clone()).or_insert(0) += 1;
        self.last_topic = Some(key);
    }

    pub fn record_parse_error(&mut self) {
        self.total_frames += 1;
        self.parse_errors += 1;
        self.last_frame_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_success_unwraps_data() {
        let env: Envelope = serde_json::from_str(r#"{"success":true,"data":{"price":0.45}}"#).unwrap();
        let data: Value = env.into_data().unwrap();
        assert_eq!(data, json!({"price": 0.45}));
    }

    #[test]
    fn test_envelope_failure_surfaces_error() {
        let env: Envelope = serde_json::from_str(r#"{"success":false,"error":"Price not found"}"#).unwrap();
        let err = env.into_data::<Value>().unwrap_err();
        assert!(matches!(err, ClientError::Api(ref m) if m == "Price not found"));
    }

    #[test]
    fn test_envelope_failure_without_message() {
        let env: Envelope = serde_json::from_str(r#"{"success":false}"#).unwrap();
        let err = env.into_data::<Value>().unwrap_err();
        assert_eq!(err.to_string(), "API error: Request failed");
    }

    #[test]
    fn test_envelope_data_type_mismatch() {
        let env: Envelope = Envelope::ok(json!({"token": "QVR"}));
        assert!(matches!(env.into_data::<PriceQuote>(), Err(ClientError::Parse(_))));
    }

    #[test]
    fn test_control_frame_wire_shape() {
        let json = serde_json::to_value(ControlFrame::subscribe("price:QVR")).unwrap();
        assert_eq!(json, json!({"action": "subscribe", "event": "price:QVR"}));

        let json = serde_json::to_value(ControlFrame::unsubscribe("block:new")).unwrap();
        assert_eq!(json, json!({"action": "unsubscribe", "event": "block:new"}));
    }

    #[test]
    fn test_inbound_frame_parse() {
        let frame = InboundFrame::parse(r#"{"type":"price:QVR","data":{"price":0.45}}"#).unwrap();
        assert_eq!(frame.topic.as_deref(), Some("price:QVR"));
        assert_eq!(frame.data, json!({"price": 0.45}));

        let frame = InboundFrame::parse(r#"{"data":1}"#).unwrap();
        assert!(frame.topic.is_none());

        assert!(InboundFrame::parse("not json").is_err());
        assert!(InboundFrame::parse("[1,2]").is_err());
    }

    #[test]
    fn test_topic_names() {
        assert_eq!(Topic::price("QVR").to_string(), "price:QVR");
        assert_eq!(Topic::transactions("w1").to_string(), "transactions:w1");
        assert_eq!(Topic::NewBlock.to_string(), "block:new");
        assert_eq!(Topic::NetworkTps.to_string(), "network:tps");

        assert_eq!(Topic::from("price:RGLS"), Topic::price("RGLS"));
        assert_eq!(Topic::from("block:new"), Topic::NewBlock);
        assert_eq!(Topic::from("connected"), Topic::Connected);
        assert_eq!(Topic::from("price:"), Topic::Custom("price:".to_string()));
        assert_eq!(Topic::from("oracle:feed"), Topic::Custom("oracle:feed".to_string()));
    }

    #[test]
    fn test_local_topics() {
        assert!(is_local_topic("connected"));
        assert!(is_local_topic("error"));
        assert!(!is_local_topic("price:QVR"));
    }

    #[test]
    fn test_decode_price_fills_token() {
        let event = RealtimeEvent::decode(&Topic::price("QVR"), &json!({"price": 0.45}));
        match event {
            RealtimeEvent::Price(tick) => {
                assert_eq!(tick.token, "QVR");
                assert_eq!(tick.price, 0.45);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_block_keeps_extra_fields() {
        let data = json!({"block_number": 42, "block_hash": "0xabc", "validator_id": "v1"});
        match RealtimeEvent::decode(&Topic::NewBlock, &data) {
            RealtimeEvent::Block(block) => {
                assert_eq!(block.block_number, 42);
                assert_eq!(block.block_hash.as_deref(), Some("0xabc"));
                assert_eq!(block.extra.get("validator_id"), Some(&json!("v1")));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_falls_back_to_unknown() {
        let event = RealtimeEvent::decode(&Topic::NetworkTps, &json!({"rate": "fast"}));
        assert!(event.is_unknown());

        let event = RealtimeEvent::decode(&Topic::from("oracle:feed"), &json!(1));
        assert_eq!(event, RealtimeEvent::Unknown { topic: "oracle:feed".to_string(), data: json!(1) });
    }

    #[test]
    fn test_stats_record() {
        let mut stats = StreamStats::new();
        let frame = InboundFrame { topic: Some("block:new".to_string()), data: Value::Null };
        stats.record(&frame, true);
        stats.record(&InboundFrame { topic: None, data: Value::Null }, false);
        stats.record_parse_error();

        assert_eq!(stats.total_frames, 3);
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.unrouted, 1);
        assert_eq!(stats.parse_errors, 1);
        assert_eq!(stats.type_counts.get("block:new"), Some(&1));
        assert_eq!(stats.last_topic.as_deref(), Some("_no_type"));
    }
}
