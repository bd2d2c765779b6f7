pub mod error;
pub mod filter;
pub mod format;
pub mod models;
pub mod policy;

pub use error::{PolicyError, PolicyResult};
pub use filter::{filter_agents, filter_calls, filter_voices, CallFilter, VoiceFilter};
pub use format::{format_call_duration, format_relative, format_timestamp};
pub use models::*;
pub use policy::{
    allocate_slots, can_create_agent, can_use_language, can_use_voice, compute_slots,
    slot_board, upgrade_target_for_language, LanguageAccess, TierPolicyEngine,
};
