use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ActionType {
    LocationUpdate,
    PunchIn,
    PunchOut,
    PreferenceUpdate,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::LocationUpdate => "location-update",
            ActionType::PunchIn => "punch-in",
            ActionType::PunchOut => "punch-out",
            ActionType::PreferenceUpdate => "preference-update",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "location-update" => Some(ActionType::LocationUpdate),
            "punch-in" => Some(ActionType::PunchIn),
            "punch-out" => Some(ActionType::PunchOut),
            "preference-update" => Some(ActionType::PreferenceUpdate),
            _ => None,
        }
    }

    /// Eviction priority under capacity pressure. Plain location updates go
    /// first; punches are never silently dropped.
    pub fn evictable(&self) -> bool {
        matches!(self, ActionType::LocationUpdate)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ActionStatus {
    Pending,
    Sent,
    Failed,
    DeadLetter,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Sent => "sent",
            ActionStatus::Failed => "failed",
            ActionStatus::DeadLetter => "dead-letter",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ActionStatus::Pending),
            "sent" => Some(ActionStatus::Sent),
            "failed" => Some(ActionStatus::Failed),
            "dead-letter" => Some(ActionStatus::DeadLetter),
            _ => None,
        }
    }
}

/// A durably persisted outward action awaiting (re)delivery. Ids come from
/// the store and are strictly increasing, so enqueue order is replay order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueuedAction {
    pub id: i64,
    pub employee_id: String,
    pub action_type: ActionType,
    /// Opaque to the engine; only the attendance collaborator interprets it.
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub status: ActionStatus,
}
