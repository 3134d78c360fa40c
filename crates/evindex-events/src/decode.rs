//! `decode_events` — dispatches each [`RawEvent`] to ABI decoding based on
//! its callback kind, dropping (and counting) decode failures rather than
//! failing the whole batch.

use std::collections::HashMap;

use evindex_core::checkpoint::EventType;
use evindex_core::types::{DecodedLog, DecodedTrace, Event, EventPayload, RawEvent};

/// User-supplied ABI decoding. The pipeline doesn't know about Solidity ABI
/// encoding itself — it just needs something that can turn `(address,
/// topics, data)` into named args, and `(input, output)` into a function
/// call + result. Implemented by the schema/configuration builder, which
/// is out of scope for this crate.
pub trait AbiDecoder: Send + Sync {
    fn decode_log(&self, event_callback_index: usize, address: &str, topics: &[String], data: &str) -> Result<DecodedLog, DecodeError>;

    fn decode_trace(&self, event_callback_index: usize, input: &str, output: Option<&str>) -> Result<DecodedTrace, DecodeError>;
}

#[derive(Debug, Clone)]
pub struct DecodeError {
    /// The 4-byte selector / topic0 this decode attempt was keyed on, used
    /// to aggregate failure counts by signature rather than per-event.
    pub selector: String,
    pub reason: String,
}

/// Aggregated decode-failure counts, keyed by selector, for logging.
pub type DecodeFailures = HashMap<String, u64>;

/// Decode a checkpoint-sorted `RawEvent` stream into `Event`s, preserving
/// order. Log/trace events that fail to decode are dropped (and counted in
/// the returned failure map); transaction/transfer/block events never fail
/// to decode since they carry no ABI payload.
pub fn decode_events(raw_events: Vec<RawEvent>, decoder: &dyn AbiDecoder) -> (Vec<Event>, DecodeFailures) {
    let mut events = Vec::with_capacity(raw_events.len());
    let mut failures: DecodeFailures = HashMap::new();

    for raw in raw_events {
        let payload = match raw.kind {
            EventType::Block => Some(EventPayload::Block),
            EventType::Transaction => Some(EventPayload::Transaction),
            EventType::Transfer => Some(EventPayload::Transfer),
            EventType::Log => {
                let Some(log) = &raw.log else { continue };
                let topics: Vec<String> = log.topics.iter().map(|t| t.to_string()).collect();
                match decoder.decode_log(raw.event_callback_index, log.address.as_str(), &topics, &log.data) {
                    Ok(decoded) => Some(EventPayload::Log(decoded)),
                    Err(e) => {
                        tracing::warn!(selector = %e.selector, reason = %e.reason, "log decode failed, dropping event");
                        *failures.entry(e.selector).or_insert(0) += 1;
                        None
                    }
                }
            }
            EventType::Trace => {
                let Some(trace) = &raw.trace else { continue };
                match decoder.decode_trace(raw.event_callback_index, &trace.input, trace.output.as_deref()) {
                    Ok(decoded) => Some(EventPayload::Trace(decoded)),
                    Err(e) => {
                        tracing::warn!(selector = %e.selector, reason = %e.reason, "trace decode failed, dropping event");
                        *failures.entry(e.selector).or_insert(0) += 1;
                        None
                    }
                }
            }
        };

        if let Some(payload) = payload {
            events.push(Event { raw, payload });
        }
    }

    (events, failures)
}
