//! Filter matching — declarative predicates over chain data.
//!
//! Each filter kind mirrors one RPC-level concept (block, log, trace,
//! transaction, transfer) and exposes a `matches` operation. A `FactoryIndex`
//! lets a filter's address set be populated by previously matched logs
//! (child addresses) instead of a fixed list.

use std::collections::HashMap;

use crate::types::{EventLog, EventReceipt, EventTrace};

/// Identifies a factory filter whose child addresses are discovered at
/// runtime from earlier matched logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FactoryId(pub String);

/// `FactoryId -> Address -> block at which the address was first seen`.
///
/// Consulted by value, never by back-reference, so factory resolution has
/// no cycle back into the filter set that produced it.
#[derive(Debug, Clone, Default)]
pub struct FactoryIndex {
    discovered: HashMap<FactoryId, HashMap<String, u64>>,
}

impl FactoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `address` was discovered as a child of `factory_id` at
    /// `block_number`. A later insert for the same address is ignored —
    /// first discovery wins.
    pub fn insert(&mut self, factory_id: FactoryId, address: impl Into<String>, block_number: u64) {
        self.discovered
            .entry(factory_id)
            .or_default()
            .entry(address.into())
            .or_insert(block_number);
    }

    /// Returns `true` if `address` is a known child of `factory_id`, and was
    /// discovered at or before `current_block`.
    pub fn contains(&self, factory_id: &FactoryId, address: &str, current_block: u64) -> bool {
        self.discovered
            .get(factory_id)
            .and_then(|addrs| addrs.iter().find(|(a, _)| a.eq_ignore_ascii_case(address)))
            .is_some_and(|(_, &discovered_at)| discovered_at <= current_block)
    }
}

/// A factory seed: logs emitted by `address` with `event_selector` as
/// topic0 announce new child contracts, whose address is carried in one of
/// the log's indexed topics. Matched seeds populate a [`FactoryIndex`].
#[derive(Debug, Clone)]
pub struct FactorySource {
    pub factory_id: FactoryId,
    pub address: String,
    pub event_selector: String,
    /// Which topic slot (1..=3) carries the child address. A 20-byte
    /// address in a topic is left-padded to 32 bytes, so the child is the
    /// last 40 hex chars of the slot.
    pub child_topic_index: usize,
}

impl FactorySource {
    /// If `log` is an instance of this factory's child-creation event,
    /// returns the announced child address (lowercased `0x…`, 20 bytes).
    pub fn extract_child(&self, log: &EventLog) -> Option<String> {
        if !log.address.eq_ignore_case(&self.address) {
            return None;
        }
        if !log.topics.first()?.eq_ignore_case(&self.event_selector) {
            return None;
        }
        let topic = log.topics.get(self.child_topic_index)?.as_str();
        let hex = topic.strip_prefix("0x").or_else(|| topic.strip_prefix("0X")).unwrap_or(topic);
        if hex.len() < 40 {
            return None;
        }
        Some(format!("0x{}", hex[hex.len() - 40..].to_lowercase()))
    }
}

/// Either a fixed address list or a factory reference whose address set is
/// resolved at match time against a [`FactoryIndex`].
#[derive(Debug, Clone)]
pub enum AddressSet {
    Fixed(Vec<String>),
    Factory(FactoryId),
}

impl AddressSet {
    fn matches(&self, address: &str, current_block: u64, factories: &FactoryIndex) -> bool {
        match self {
            Self::Fixed(addrs) => addrs.is_empty() || addrs.iter().any(|a| a.eq_ignore_ascii_case(address)),
            Self::Factory(id) => factories.contains(id, address, current_block),
        }
    }
}

/// Inclusive `[from_block, to_block]` window; `to_block = None` means open
/// (still live).
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockWindow {
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
}

impl BlockWindow {
    fn contains(&self, block_number: u64) -> bool {
        self.from_block.map_or(true, |from| block_number >= from)
            && self.to_block.map_or(true, |to| block_number <= to)
    }
}

/// `(block.number - offset) % interval == 0`, subject to the block window.
#[derive(Debug, Clone)]
pub struct BlockFilter {
    pub offset: u64,
    pub interval: u64,
    pub window: BlockWindow,
}

impl BlockFilter {
    pub fn matches(&self, block_number: u64) -> bool {
        if self.interval == 0 {
            return false;
        }
        self.window.contains(block_number) && (block_number.saturating_sub(self.offset)) % self.interval == 0
    }
}

/// A single topic slot: `None` matches anything; `Some(values)` matches any
/// one of the listed values.
pub type TopicSlot = Option<Vec<String>>;

#[derive(Debug, Clone)]
pub struct LogFilter {
    pub chain_id: u64,
    pub addresses: AddressSet,
    /// Up to 4 topic slots (topic0..topic3).
    pub topics: [TopicSlot; 4],
    pub window: BlockWindow,
}

impl LogFilter {
    pub fn matches(&self, log: &EventLog, block_number: u64, factories: &FactoryIndex) -> bool {
        if !self.window.contains(block_number) {
            return false;
        }
        if !self.addresses.matches(log.address.as_str(), block_number, factories) {
            return false;
        }
        for (i, slot) in self.topics.iter().enumerate() {
            let Some(values) = slot else { continue };
            match log.topics.get(i) {
                Some(topic) if values.iter().any(|v| v.eq_ignore_ascii_case(topic.as_str())) => {}
                _ => return false,
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct TraceFilter {
    pub from_addresses: Option<Vec<String>>,
    pub to_addresses: Option<AddressSet>,
    pub call_type: Option<String>,
    /// A selector that must prefix `trace.input`.
    pub selector: Option<String>,
    pub include_reverted: bool,
    pub window: BlockWindow,
}

impl TraceFilter {
    pub fn matches(&self, trace: &EventTrace, block_number: u64, factories: &FactoryIndex) -> bool {
        if !self.window.contains(block_number) {
            return false;
        }
        if !self.include_reverted && trace.error.is_some() {
            return false;
        }
        if let Some(froms) = &self.from_addresses {
            if !froms.iter().any(|a| a.eq_ignore_ascii_case(&trace.from.to_string())) {
                return false;
            }
        }
        if let Some(to_set) = &self.to_addresses {
            // A missing `to` never matches a filter that requires `to_addresses`.
            match &trace.to {
                None => return false,
                Some(to) => {
                    if !to_set.matches(to.as_str(), block_number, factories) {
                        return false;
                    }
                }
            }
        }
        if let Some(call_type) = &self.call_type {
            if !call_type.eq_ignore_ascii_case(&trace.call_type) {
                return false;
            }
        }
        if let Some(selector) = &self.selector {
            if !trace.input.to_lowercase().starts_with(&selector.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct TransactionFilter {
    pub from_addresses: Option<Vec<String>>,
    pub to_addresses: Option<AddressSet>,
    pub include_reverted: bool,
    pub window: BlockWindow,
}

impl TransactionFilter {
    pub fn matches(
        &self,
        from: &str,
        to: Option<&str>,
        receipt: Option<&EventReceipt>,
        block_number: u64,
        factories: &FactoryIndex,
    ) -> bool {
        if !self.window.contains(block_number) {
            return false;
        }
        if !self.include_reverted {
            match receipt {
                Some(r) if r.status => {}
                _ => return false,
            }
        }
        if let Some(froms) = &self.from_addresses {
            if !froms.iter().any(|a| a.eq_ignore_ascii_case(from)) {
                return false;
            }
        }
        if let Some(to_set) = &self.to_addresses {
            match to {
                None => return false,
                Some(to) => {
                    if !to_set.matches(to, block_number, factories) {
                        return false;
                    }
                }
            }
        }
        true
    }
}

/// Like [`TraceFilter`], plus `trace.value > 0`.
#[derive(Debug, Clone)]
pub struct TransferFilter {
    pub from_addresses: Option<Vec<String>>,
    pub to_addresses: Option<AddressSet>,
    pub include_reverted: bool,
    pub window: BlockWindow,
}

impl TransferFilter {
    pub fn matches(&self, trace: &EventTrace, block_number: u64, factories: &FactoryIndex) -> bool {
        if !value_is_positive(&trace.value) {
            return false;
        }
        let as_trace_filter = TraceFilter {
            from_addresses: self.from_addresses.clone(),
            to_addresses: self.to_addresses.clone(),
            call_type: None,
            selector: None,
            include_reverted: self.include_reverted,
            window: self.window,
        };
        as_trace_filter.matches(trace, block_number, factories)
    }
}

fn value_is_positive(value: &str) -> bool {
    let trimmed = value.trim_start_matches("0x");
    !trimmed.chars().all(|c| c == '0') && !trimmed.is_empty()
}
