//! Tiered access policy: agent slot allocation and language/voice gating.
//!
//! Everything here is a pure function over static tables. Callers pass the
//! tier and counts explicitly.

use crate::error::{PolicyError, PolicyResult};
use crate::models::{
    Slot, SlotBoard, SubscriptionTier, TierLimits, UnknownTierPolicy, VoiceAccessDescriptor,
};

/// Languages the product knows about. Anything outside this list is treated
/// as unknown and permitted.
const SUPPORTED_LANGUAGES: &[&str] = &[
    "en", "hi", "es", "fr", "de", "it", "pt", "nl", "pl", "ru", "tr", "ar", "ja", "ko", "zh",
    "bn", "ta", "te", "mr", "gu", "kn", "ml", "pa", "ur",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct TierPolicyEngine {
    unknown_tier: UnknownTierPolicy,
}

impl TierPolicyEngine {
    pub fn new(unknown_tier: UnknownTierPolicy) -> Self {
        Self { unknown_tier }
    }

    pub fn unknown_tier_policy(&self) -> UnknownTierPolicy {
        self.unknown_tier
    }

    /// Parses a raw plan string. Unknown values never resolve above basic.
    pub fn resolve_tier(&self, raw: &str) -> PolicyResult<SubscriptionTier> {
        match SubscriptionTier::parse(raw) {
            Some(tier) => Ok(tier),
            None => match self.unknown_tier {
                UnknownTierPolicy::Reject => Err(PolicyError::UnknownTier(raw.trim().to_string())),
                UnknownTierPolicy::TreatAsBasic => Ok(SubscriptionTier::Basic),
            },
        }
    }

    pub fn slots_for(&self, raw_tier: &str, existing: i64) -> PolicyResult<SlotBoard<usize>> {
        let tier = self.resolve_tier(raw_tier)?;
        let count = checked_count(existing)?;
        Ok(slot_board(tier, 0..count))
    }

    pub fn language_access(&self, code: &str, raw_tier: &str) -> PolicyResult<LanguageAccess> {
        let tier = self.resolve_tier(raw_tier)?;
        Ok(LanguageAccess {
            code: normalize_language_code(code),
            tier,
            allowed: can_use_language(code, tier),
            upgrade_target: upgrade_target_for_language(code, tier),
        })
    }
}

/// Outcome of a language gate check.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LanguageAccess {
    pub code: String,
    pub tier: SubscriptionTier,
    pub allowed: bool,
    pub upgrade_target: Option<&'static str>,
}

/// Slot sequence for `existing` agents, each occupied slot tagged with the
/// agent's zero-based index.
pub fn compute_slots(tier: SubscriptionTier, existing: i64) -> PolicyResult<Vec<Slot<usize>>> {
    let count = checked_count(existing)?;
    Ok(allocate_slots(tier, 0..count))
}

/// Occupied first, then available, then locked.
///
/// Existing resources are never hidden: when there are more of them than the
/// tier grants, the overflow takes the place of locked slots, and past the
/// display count the sequence simply grows.
pub fn allocate_slots<R, I>(tier: SubscriptionTier, resources: I) -> Vec<Slot<R>>
where
    I: IntoIterator<Item = R>,
{
    let limits = TierLimits::for_tier(tier);
    let mut slots = Vec::with_capacity(limits.display_slot_count);

    for resource in resources {
        slots.push(Slot::Occupied {
            position: slots.len(),
            resource,
        });
    }

    let occupied = slots.len();
    for _ in 0..limits.agent_limit.saturating_sub(occupied) {
        slots.push(Slot::Available {
            position: slots.len(),
        });
    }

    if let Some(upgrade_target) = limits.upgrade_target {
        let locked = limits
            .display_slot_count
            .saturating_sub(occupied.max(limits.agent_limit));
        for _ in 0..locked {
            slots.push(Slot::Locked {
                position: slots.len(),
                upgrade_target,
            });
        }
    }

    slots
}

pub fn slot_board<R, I>(tier: SubscriptionTier, resources: I) -> SlotBoard<R>
where
    I: IntoIterator<Item = R>,
{
    let limits = TierLimits::for_tier(tier);
    let slots = allocate_slots(tier, resources);

    let occupied = slots.iter().filter(|slot| slot.is_occupied()).count();
    let available = slots.iter().filter(|slot| slot.is_available()).count();
    let locked = slots.iter().filter(|slot| slot.is_locked()).count();

    SlotBoard {
        tier,
        agent_limit: limits.agent_limit,
        display_slot_count: limits.display_slot_count,
        occupied,
        available,
        locked,
        over_limit: occupied.saturating_sub(limits.agent_limit),
        slots,
    }
}

pub fn can_create_agent(tier: SubscriptionTier, existing: i64) -> PolicyResult<bool> {
    let count = checked_count(existing)?;
    Ok(count < TierLimits::for_tier(tier).agent_limit)
}

/// `en-US` -> `en`.
pub fn normalize_language_code(code: &str) -> String {
    code.trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

/// Minimum tier for a language, or `None` when the code is not in the catalog.
pub fn required_tier_for_language(code: &str) -> Option<SubscriptionTier> {
    let code = normalize_language_code(code);
    match code.as_str() {
        "en" => Some(SubscriptionTier::Basic),
        "hi" => Some(SubscriptionTier::Pro),
        other if SUPPORTED_LANGUAGES.contains(&other) => Some(SubscriptionTier::Enterprise),
        _ => None,
    }
}

pub fn can_use_language(code: &str, tier: SubscriptionTier) -> bool {
    required_tier_for_language(code).map_or(true, |required| tier >= required)
}

pub fn upgrade_target_for_language(code: &str, tier: SubscriptionTier) -> Option<&'static str> {
    let required = required_tier_for_language(code)?;
    if tier >= required {
        return None;
    }

    match (required, tier) {
        (SubscriptionTier::Enterprise, SubscriptionTier::Basic) => Some("Pro or Enterprise"),
        (required, _) => Some(required.display_name()),
    }
}

pub fn can_use_voice(voice: &VoiceAccessDescriptor) -> bool {
    voice
        .access_control
        .as_ref()
        .map_or(true, |access| access.available)
}

fn checked_count(existing: i64) -> PolicyResult<usize> {
    usize::try_from(existing).map_err(|_| {
        PolicyError::invalid(
            "existing_resource_count",
            format!("must be zero or greater, got {existing}"),
        )
    })
}
