mod poller;

use std::collections::HashMap;
use std::sync::Arc;

use callgenie_core::{
    can_create_agent, can_use_voice, filter_calls, slot_board, upgrade_target_for_language,
    AgentSummary, CallBatchStatus, CallFilter, CallRecord, LanguageAccess, NewAgent, PolicyError,
    SlotBoard, SubscriptionTier, TierLimits, TierPolicyEngine, VoiceAccessDescriptor,
};
use callgenie_observability::{DecisionKind, PolicyMetrics};
use callgenie_storage::{AccountPlan, AccountRepository, AgentRepository, CallRepository};
use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub use poller::{
    CallStatusPoller, CallStatusSource, HttpStatusSource, PollConfig, PollOutcome,
    DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT,
};

const MAX_AGENT_NAME_LEN: usize = 80;
const DEFAULT_AGENT_LANGUAGE: &str = "en";

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("{tier} plan allows {limit} agents")]
    AgentLimitReached {
        tier: SubscriptionTier,
        limit: usize,
        upgrade_target: Option<SubscriptionTier>,
    },

    #[error("language `{code}` is not included in the {tier} plan")]
    LanguageLocked {
        code: String,
        tier: SubscriptionTier,
        upgrade_target: Option<&'static str>,
    },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type WorkspaceResult<T> = std::result::Result<T, WorkspaceError>;

type CreationLocks = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Per-user view of the tier policy: reads the stored plan and agents and
/// hands them to the policy functions.
#[derive(Clone)]
pub struct AgentWorkspace<S>
where
    S: AccountRepository + AgentRepository + CallRepository,
{
    engine: TierPolicyEngine,
    store: Arc<S>,
    metrics: Arc<PolicyMetrics>,
    /// One entry per user with a creation in progress.
    creation_locks: CreationLocks,
}

impl<S> AgentWorkspace<S>
where
    S: AccountRepository + AgentRepository + CallRepository,
{
    pub fn new(engine: TierPolicyEngine, store: Arc<S>, metrics: Arc<PolicyMetrics>) -> Self {
        Self {
            engine,
            store,
            metrics,
            creation_locks: CreationLocks::default(),
        }
    }

    pub fn engine(&self) -> &TierPolicyEngine {
        &self.engine
    }

    pub fn metrics(&self) -> &Arc<PolicyMetrics> {
        &self.metrics
    }

    /// Users without a stored plan are on basic.
    pub async fn tier_for(&self, user_id: &str) -> WorkspaceResult<SubscriptionTier> {
        let plan = self.store.load_plan(user_id).await?;
        Ok(plan.map_or(SubscriptionTier::Basic, |plan| plan.tier))
    }

    #[instrument(skip(self))]
    pub async fn set_plan(&self, user_id: &str, raw_tier: &str) -> WorkspaceResult<AccountPlan> {
        let user_id = checked_user_id(user_id)?;
        let tier = self.engine.resolve_tier(raw_tier).inspect_err(|_| {
            self.metrics.inc_invalid_argument();
        })?;

        let plan = self.store.set_tier(user_id, tier).await?;
        let agents = self.store.count_agents(user_id).await?;
        let limit = TierLimits::for_tier(tier).agent_limit;
        if agents > limit {
            warn!(user_id = %user_id, tier = %tier, agents, limit, "plan change leaves agents over limit");
        }
        info!(user_id = %user_id, tier = %tier, "plan updated");
        Ok(plan)
    }

    #[instrument(skip(self))]
    pub async fn slot_board(&self, user_id: &str) -> WorkspaceResult<SlotBoard<AgentSummary>> {
        let user_id = checked_user_id(user_id)?;
        let tier = self.tier_for(user_id).await?;
        let agents = self.store.list_agents(user_id).await?;

        let board = slot_board(tier, agents);
        self.metrics.record_decision(DecisionKind::Slots, true);
        info!(
            user_id = %user_id,
            tier = %tier,
            occupied = board.occupied,
            available = board.available,
            locked = board.locked,
            over_limit = board.over_limit,
            "slot board computed"
        );
        Ok(board)
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_agent(
        &self,
        user_id: &str,
        request: NewAgent,
    ) -> WorkspaceResult<AgentSummary> {
        let user_id = checked_user_id(user_id)?;
        let name = request.name.trim();
        if name.is_empty() || name.chars().count() > MAX_AGENT_NAME_LEN {
            self.metrics.inc_invalid_argument();
            return Err(PolicyError::invalid(
                "name",
                format!("must be 1 to {MAX_AGENT_NAME_LEN} characters"),
            )
            .into());
        }

        let tier = self.tier_for(user_id).await?;
        let language = request
            .language
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .unwrap_or(DEFAULT_AGENT_LANGUAGE)
            .to_string();

        if let Some(upgrade_target) = upgrade_target_for_language(&language, tier) {
            self.metrics.record_decision(DecisionKind::Language, false);
            return Err(WorkspaceError::LanguageLocked {
                code: language,
                tier,
                upgrade_target: Some(upgrade_target),
            });
        }

        let agent = AgentSummary {
            agent_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            voice_id: request.voice_id.filter(|voice| !voice.trim().is_empty()),
            language,
            created_at: Utc::now(),
        };

        let lock = self.creation_lock(user_id);
        let created = {
            let _guard = lock.lock().await;
            self.insert_within_limit(tier, &agent).await
        };
        self.release_creation_lock(user_id, lock);

        let allowed = created?;
        self.metrics
            .record_decision(DecisionKind::AgentCreate, allowed);
        if !allowed {
            let limits = TierLimits::for_tier(tier);
            info!(user_id = %user_id, tier = %tier, limit = limits.agent_limit, "agent limit reached");
            return Err(WorkspaceError::AgentLimitReached {
                tier,
                limit: limits.agent_limit,
                upgrade_target: limits.upgrade_target,
            });
        }

        info!(user_id = %user_id, agent_id = %agent.agent_id, "agent created");
        Ok(agent)
    }

    /// Must be called with the user's creation lock held. The store repeats
    /// the count check so writers in other processes cannot overshoot either.
    async fn insert_within_limit(
        &self,
        tier: SubscriptionTier,
        agent: &AgentSummary,
    ) -> WorkspaceResult<bool> {
        let existing = self.store.count_agents(&agent.user_id).await?;
        if !can_create_agent(tier, i64::try_from(existing).unwrap_or(i64::MAX))? {
            return Ok(false);
        }

        let limit = TierLimits::for_tier(tier).agent_limit;
        Ok(self.store.insert_agent_within_limit(agent, limit).await?)
    }

    fn creation_lock(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.creation_locks
            .lock()
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    fn release_creation_lock(&self, user_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.creation_locks.lock();
        // The map and `lock` are the only holders once nobody else is waiting.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(user_id);
        }
    }

    pub async fn language_access(&self, user_id: &str, code: &str) -> WorkspaceResult<LanguageAccess> {
        let user_id = checked_user_id(user_id)?;
        let tier = self.tier_for(user_id).await?;
        let access = self.engine.language_access(code, tier.as_code())?;
        self.metrics
            .record_decision(DecisionKind::Language, access.allowed);
        Ok(access)
    }

    pub fn voice_access(&self, voice: &VoiceAccessDescriptor) -> bool {
        let allowed = can_use_voice(voice);
        self.metrics.record_decision(DecisionKind::Voice, allowed);
        allowed
    }

    pub async fn record_call(&self, call: &CallRecord) -> WorkspaceResult<()> {
        checked_user_id(&call.user_id)?;
        self.store.record_call(call).await?;
        Ok(())
    }

    /// Stores the latest status of every call in a polled batch.
    pub async fn sync_batch(&self, batch: &CallBatchStatus) -> WorkspaceResult<usize> {
        for call in &batch.calls {
            self.record_call(call).await?;
        }
        info!(batch_id = %batch.batch_id, calls = batch.calls.len(), pending = batch.pending(), "batch synced");
        Ok(batch.calls.len())
    }

    pub async fn call_history(
        &self,
        user_id: &str,
        filter: &CallFilter,
    ) -> WorkspaceResult<Vec<CallRecord>> {
        let user_id = checked_user_id(user_id)?;
        let calls = self.store.list_calls(user_id).await?;
        Ok(filter_calls(&calls, filter).into_iter().cloned().collect())
    }
}

fn checked_user_id(user_id: &str) -> Result<&str, PolicyError> {
    let trimmed = user_id.trim();
    if trimmed.is_empty() {
        return Err(PolicyError::invalid("user_id", "must not be empty"));
    }
    Ok(trimmed)
}
