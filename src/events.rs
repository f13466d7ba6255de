// 11.0: every order decision and lifecycle step produces an event. the log is
// the audit trail for what the engine sent and why it skipped what it skipped.
// EventPayload lists every kind. the log is bounded; oldest events drop first.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::account::AccountState;
use crate::error_code::DexErrorCode;
use crate::order::{PlannedOrder, SkipReason};
use crate::types::{OrderId, Side, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

/// Teardown and setup steps, in the only order teardown may run them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStep {
    CancelOrders,
    SettleFunds,
    CloseOpenOrders,
    CloseTokenAccounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    // order events
    OrderSkipped(OrderSkippedEvent),
    OrderClipped(OrderClippedEvent),
    OrdersSubmitted(OrdersSubmittedEvent),
    OrderCancelRequested(OrderCancelRequestedEvent),

    // transaction outcomes
    TransactionRejected(TransactionRejectedEvent),
    TransactionFailed(TransactionFailedEvent),

    // account events
    StateChanged(StateChangedEvent),
    OpenOrdersCreated(OpenOrdersCreatedEvent),
    TokenAccountCreated(TokenAccountCreatedEvent),
    LifecycleStepCompleted(LifecycleStepEvent),
    Airdrop(AirdropEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSkippedEvent {
    pub symbol: String,
    pub side: Side,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderClippedEvent {
    pub symbol: String,
    pub side: Side,
    pub requested_base_lots: u64,
    pub base_lots: u64,
    pub balance: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdersSubmittedEvent {
    pub orders: Vec<PlannedOrder>,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelRequestedEvent {
    pub symbol: String,
    pub side: Side,
    pub order_id: OrderId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRejectedEvent {
    /// What the transaction was for, e.g. "place orders".
    pub context: String,
    pub code: Option<u32>,
    pub error: Option<DexErrorCode>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionFailedEvent {
    pub context: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChangedEvent {
    pub from: AccountState,
    pub to: AccountState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrdersCreatedEvent {
    pub symbol: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenAccountCreatedEvent {
    pub symbol: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleStepEvent {
    pub step: LifecycleStep,
    /// Instructions sent for this step. Zero is a no-op that still counts.
    pub instructions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirdropEvent {
    pub symbol: String,
    pub native_amount: u64,
}

/// Bounded, append-only event log.
#[derive(Debug)]
pub struct EventLog {
    events: VecDeque<Event>,
    next_id: u64,
    max_events: usize,
}

impl EventLog {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::new(),
            next_id: 1,
            max_events: max_events.max(1),
        }
    }

    pub fn push(&mut self, payload: EventPayload) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.events.push_back(Event::new(id, Timestamp::now(), payload));
        while self.events.len() > self.max_events {
            self.events.pop_front();
        }
        id
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn all(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }

    pub fn recent(&self, count: usize) -> Vec<Event> {
        let start = self.events.len().saturating_sub(count);
        self.events.iter().skip(start).cloned().collect()
    }
}
