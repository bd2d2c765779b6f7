use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// Subscription plan level. Variant order is the tier ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    #[serde(alias = "starter")]
    Basic,
    #[serde(alias = "business")]
    Pro,
    Enterprise,
}

impl SubscriptionTier {
    pub const ALL: [SubscriptionTier; 3] = [Self::Basic, Self::Pro, Self::Enterprise];

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "basic" | "starter" => Some(Self::Basic),
            "pro" | "business" => Some(Self::Pro),
            "enterprise" => Some(Self::Enterprise),
            _ => None,
        }
    }

    pub fn as_code(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }

    /// Name shown on upgrade prompts.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Basic => "Basic",
            Self::Pro => "Pro",
            Self::Enterprise => "Enterprise",
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for SubscriptionTier {
    type Err = PolicyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or_else(|| PolicyError::UnknownTier(value.trim().to_string()))
    }
}

/// What to do with a tier string that is not one of the known plans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownTierPolicy {
    #[default]
    Reject,
    TreatAsBasic,
}

impl UnknownTierPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "reject" | "strict" => Some(Self::Reject),
            "basic" | "treat_as_basic" | "fail_closed" => Some(Self::TreatAsBasic),
            _ => None,
        }
    }
}

/// Quantity limits granted and advertised by a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub tier: SubscriptionTier,
    /// Agents the tier actually grants.
    pub agent_limit: usize,
    /// Slots rendered, including locked upsell slots.
    pub display_slot_count: usize,
    pub upgrade_target: Option<SubscriptionTier>,
}

impl TierLimits {
    /// | Tier       | Agents | Shown | Upgrade    |
    /// |------------|--------|-------|------------|
    /// | basic      | 2      | 4     | Pro        |
    /// | pro        | 4      | 10    | Enterprise |
    /// | enterprise | 10     | 10    | -          |
    pub const fn for_tier(tier: SubscriptionTier) -> Self {
        match tier {
            SubscriptionTier::Basic => Self {
                tier,
                agent_limit: 2,
                display_slot_count: 4,
                upgrade_target: Some(SubscriptionTier::Pro),
            },
            SubscriptionTier::Pro => Self {
                tier,
                agent_limit: 4,
                display_slot_count: 10,
                upgrade_target: Some(SubscriptionTier::Enterprise),
            },
            SubscriptionTier::Enterprise => Self {
                tier,
                agent_limit: 10,
                display_slot_count: 10,
                upgrade_target: None,
            },
        }
    }

    pub fn locked_slot_count(&self) -> usize {
        self.display_slot_count.saturating_sub(self.agent_limit)
    }
}

/// One rendered agent placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Slot<R> {
    Occupied { position: usize, resource: R },
    Available { position: usize },
    Locked {
        position: usize,
        upgrade_target: SubscriptionTier,
    },
}

impl<R> Slot<R> {
    pub fn position(&self) -> usize {
        match self {
            Slot::Occupied { position, .. }
            | Slot::Available { position }
            | Slot::Locked { position, .. } => *position,
        }
    }

    pub fn is_occupied(&self) -> bool {
        matches!(self, Slot::Occupied { .. })
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Slot::Available { .. })
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, Slot::Locked { .. })
    }
}

/// A computed slot sequence together with its counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotBoard<R> {
    pub tier: SubscriptionTier,
    pub agent_limit: usize,
    pub display_slot_count: usize,
    pub occupied: usize,
    pub available: usize,
    pub locked: usize,
    /// Occupied slots beyond the agent limit, e.g. after a downgrade.
    pub over_limit: usize,
    pub slots: Vec<Slot<R>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceAccessControl {
    pub available: bool,
    #[serde(default, alias = "requiredPlan")]
    pub required_plan: Option<String>,
}

/// Voice metadata as supplied by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceAccessDescriptor {
    #[serde(alias = "voiceId", alias = "id")]
    pub voice_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default, alias = "accessControl")]
    pub access_control: Option<VoiceAccessControl>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub agent_id: String,
    pub user_id: String,
    pub name: String,
    pub voice_id: Option<String>,
    pub language: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAgent {
    pub name: String,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Queued,
    Ringing,
    InProgress,
    Completed,
    Failed,
    NoAnswer,
    Busy,
    Canceled,
}

impl CallStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "queued" | "initiated" => Some(Self::Queued),
            "ringing" => Some(Self::Ringing),
            "in_progress" | "ongoing" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "no_answer" => Some(Self::NoAnswer),
            "busy" => Some(Self::Busy),
            "canceled" | "cancelled" => Some(Self::Canceled),
            _ => None,
        }
    }

    pub fn as_code(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Ringing => "ringing",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::NoAnswer => "no_answer",
            Self::Busy => "busy",
            Self::Canceled => "canceled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::NoAnswer | Self::Busy | Self::Canceled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: String,
    pub user_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub contact_name: Option<String>,
    pub phone_number: String,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallBatchStatus {
    pub batch_id: String,
    pub calls: Vec<CallRecord>,
}

impl CallBatchStatus {
    pub fn is_finished(&self) -> bool {
        self.calls.iter().all(|call| call.status.is_terminal())
    }

    pub fn pending(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| !call.status.is_terminal())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_map_onto_the_three_tiers() {
        assert_eq!(SubscriptionTier::parse("starter"), Some(SubscriptionTier::Basic));
        assert_eq!(SubscriptionTier::parse(" Business "), Some(SubscriptionTier::Pro));
        assert_eq!(SubscriptionTier::parse("ENTERPRISE"), Some(SubscriptionTier::Enterprise));
        assert_eq!(SubscriptionTier::parse("platinum"), None);
    }

    #[test]
    fn tiers_are_ordered() {
        assert!(SubscriptionTier::Basic < SubscriptionTier::Pro);
        assert!(SubscriptionTier::Pro < SubscriptionTier::Enterprise);
    }

    #[test]
    fn tier_serde_accepts_aliases() {
        let tier: SubscriptionTier = serde_json::from_str("\"starter\"").unwrap();
        assert_eq!(tier, SubscriptionTier::Basic);
        assert_eq!(serde_json::to_string(&SubscriptionTier::Pro).unwrap(), "\"pro\"");
    }

    #[test]
    fn unknown_tier_reports_the_raw_value() {
        let err = "gold".parse::<SubscriptionTier>().unwrap_err();
        assert_eq!(err, PolicyError::UnknownTier("gold".to_string()));
    }

    #[test]
    fn voice_descriptor_reads_backend_field_names() {
        let voice: VoiceAccessDescriptor = serde_json::from_str(
            r#"{"voiceId":"v1","name":"Aria","accessControl":{"available":false,"requiredPlan":"pro"}}"#,
        )
        .unwrap();
        let access = voice.access_control.unwrap();
        assert!(!access.available);
        assert_eq!(access.required_plan.as_deref(), Some("pro"));
    }

    #[test]
    fn batch_is_finished_only_when_all_calls_are_terminal() {
        let call = |status| CallRecord {
            call_id: "c".to_string(),
            user_id: "u".to_string(),
            agent_id: "a".to_string(),
            contact_name: None,
            phone_number: "+15550100".to_string(),
            status,
            started_at: Utc::now(),
            duration_secs: None,
        };
        let mut batch = CallBatchStatus {
            batch_id: "b".to_string(),
            calls: vec![call(CallStatus::Completed), call(CallStatus::Ringing)],
        };
        assert!(!batch.is_finished());
        assert_eq!(batch.pending(), 1);

        batch.calls[1].status = CallStatus::NoAnswer;
        assert!(batch.is_finished());
    }
}
