use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use callgenie_core::{AgentSummary, CallRecord, CallStatus, SubscriptionTier};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountPlan {
    pub user_id: String,
    pub tier: SubscriptionTier,
    pub updated_at: DateTime<Utc>,
}

pub trait AccountRepository: Send + Sync {
    async fn load_plan(&self, user_id: &str) -> Result<Option<AccountPlan>>;
    async fn set_tier(&self, user_id: &str, tier: SubscriptionTier) -> Result<AccountPlan>;
}

pub trait AgentRepository: Send + Sync {
    /// Oldest first, which is also slot order.
    async fn list_agents(&self, user_id: &str) -> Result<Vec<AgentSummary>>;
    /// Inserts only while the user has fewer than `limit` agents. Returns
    /// `false` without writing when the user is already at the limit.
    async fn insert_agent_within_limit(&self, agent: &AgentSummary, limit: usize) -> Result<bool>;
    async fn count_agents(&self, user_id: &str) -> Result<usize>;
}

pub trait CallRepository: Send + Sync {
    /// Inserts or replaces by `call_id`.
    async fn record_call(&self, call: &CallRecord) -> Result<()>;
    async fn list_calls(&self, user_id: &str) -> Result<Vec<CallRecord>>;
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    plans: Arc<RwLock<HashMap<String, AccountPlan>>>,
    agents: Arc<RwLock<HashMap<String, Vec<AgentSummary>>>>,
    calls: Arc<RwLock<HashMap<String, Vec<CallRecord>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountRepository for MemoryStore {
    async fn load_plan(&self, user_id: &str) -> Result<Option<AccountPlan>> {
        Ok(self.plans.read().get(user_id).cloned())
    }

    async fn set_tier(&self, user_id: &str, tier: SubscriptionTier) -> Result<AccountPlan> {
        let plan = AccountPlan {
            user_id: user_id.to_string(),
            tier,
            updated_at: Utc::now(),
        };
        self.plans
            .write()
            .insert(user_id.to_string(), plan.clone());
        Ok(plan)
    }
}

impl AgentRepository for MemoryStore {
    async fn list_agents(&self, user_id: &str) -> Result<Vec<AgentSummary>> {
        Ok(self.agents.read().get(user_id).cloned().unwrap_or_default())
    }

    async fn insert_agent_within_limit(&self, agent: &AgentSummary, limit: usize) -> Result<bool> {
        let mut guard = self.agents.write();
        let agents = guard.entry(agent.user_id.clone()).or_default();
        if agents.len() >= limit {
            return Ok(false);
        }
        agents.push(agent.clone());
        Ok(true)
    }

    async fn count_agents(&self, user_id: &str) -> Result<usize> {
        Ok(self.agents.read().get(user_id).map_or(0, Vec::len))
    }
}

impl CallRepository for MemoryStore {
    async fn record_call(&self, call: &CallRecord) -> Result<()> {
        let mut guard = self.calls.write();
        let calls = guard.entry(call.user_id.clone()).or_default();
        match calls.iter_mut().find(|existing| existing.call_id == call.call_id) {
            Some(existing) => *existing = call.clone(),
            None => calls.push(call.clone()),
        }
        Ok(())
    }

    async fn list_calls(&self, user_id: &str) -> Result<Vec<CallRecord>> {
        Ok(self.calls.read().get(user_id).cloned().unwrap_or_default())
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .with_context(|| format!("failed connecting to sqlite at {}", database_url))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account_plans (
              user_id TEXT PRIMARY KEY,
              tier TEXT NOT NULL,
              updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agents (
              agent_id TEXT PRIMARY KEY,
              user_id TEXT NOT NULL,
              name TEXT NOT NULL,
              voice_id TEXT,
              language TEXT NOT NULL,
              created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS calls (
              call_id TEXT PRIMARY KEY,
              user_id TEXT NOT NULL,
              agent_id TEXT NOT NULL,
              contact_name TEXT,
              phone_number TEXT NOT NULL,
              status TEXT NOT NULL,
              started_at TEXT NOT NULL,
              duration_secs INTEGER
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl AccountRepository for SqliteStore {
    async fn load_plan(&self, user_id: &str) -> Result<Option<AccountPlan>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, tier, updated_at
            FROM account_plans
            WHERE user_id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw_tier: String = row.get("tier");
        let tier = SubscriptionTier::parse(&raw_tier)
            .with_context(|| format!("stored tier `{raw_tier}` is not a known plan"))?;

        Ok(Some(AccountPlan {
            user_id: row.get("user_id"),
            tier,
            updated_at: parse_timestamp(row.get("updated_at")),
        }))
    }

    async fn set_tier(&self, user_id: &str, tier: SubscriptionTier) -> Result<AccountPlan> {
        let plan = AccountPlan {
            user_id: user_id.to_string(),
            tier,
            updated_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO account_plans (user_id, tier, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET
              tier=excluded.tier,
              updated_at=excluded.updated_at
            "#,
        )
        .bind(&plan.user_id)
        .bind(tier.as_code())
        .bind(plan.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(plan)
    }
}

impl AgentRepository for SqliteStore {
    async fn list_agents(&self, user_id: &str) -> Result<Vec<AgentSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT agent_id, user_id, name, voice_id, language, created_at
            FROM agents
            WHERE user_id = ?1
            ORDER BY created_at, agent_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let agents = rows
            .into_iter()
            .map(|row| AgentSummary {
                agent_id: row.get("agent_id"),
                user_id: row.get("user_id"),
                name: row.get("name"),
                voice_id: row.get("voice_id"),
                language: row.get("language"),
                created_at: parse_timestamp(row.get("created_at")),
            })
            .collect();

        Ok(agents)
    }

    async fn insert_agent_within_limit(&self, agent: &AgentSummary, limit: usize) -> Result<bool> {
        // Count and insert run as one statement, so one write transaction.
        let result = sqlx::query(
            r#"
            INSERT INTO agents (agent_id, user_id, name, voice_id, language, created_at)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6
            WHERE (SELECT COUNT(*) FROM agents WHERE user_id = ?2) < ?7
            "#,
        )
        .bind(&agent.agent_id)
        .bind(&agent.user_id)
        .bind(&agent.name)
        .bind(&agent.voice_id)
        .bind(&agent.language)
        .bind(agent.created_at.to_rfc3339())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn count_agents(&self, user_id: &str) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM agents WHERE user_id = ?1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        let total: i64 = row.get("total");
        Ok(usize::try_from(total).unwrap_or_default())
    }
}

impl CallRepository for SqliteStore {
    async fn record_call(&self, call: &CallRecord) -> Result<()> {
        let duration = call.duration_secs.and_then(|secs| i64::try_from(secs).ok());

        sqlx::query(
            r#"
            INSERT INTO calls (call_id, user_id, agent_id, contact_name, phone_number, status, started_at, duration_secs)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(call_id) DO UPDATE SET
              status=excluded.status,
              contact_name=excluded.contact_name,
              duration_secs=excluded.duration_secs
            "#,
        )
        .bind(&call.call_id)
        .bind(&call.user_id)
        .bind(&call.agent_id)
        .bind(&call.contact_name)
        .bind(&call.phone_number)
        .bind(call.status.as_code())
        .bind(call.started_at.to_rfc3339())
        .bind(duration)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_calls(&self, user_id: &str) -> Result<Vec<CallRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT call_id, user_id, agent_id, contact_name, phone_number, status, started_at, duration_secs
            FROM calls
            WHERE user_id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let raw_status: String = row.get("status");
                let status = CallStatus::parse(&raw_status)
                    .with_context(|| format!("stored call status `{raw_status}` is not known"))?;
                let duration: Option<i64> = row.get("duration_secs");

                Ok(CallRecord {
                    call_id: row.get("call_id"),
                    user_id: row.get("user_id"),
                    agent_id: row.get("agent_id"),
                    contact_name: row.get("contact_name"),
                    phone_number: row.get("phone_number"),
                    status,
                    started_at: parse_timestamp(row.get("started_at")),
                    duration_secs: duration.and_then(|secs| u64::try_from(secs).ok()),
                })
            })
            .collect()
    }
}

fn parse_timestamp(raw: String) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|_| Utc::now())
}

#[derive(Clone)]
pub enum Store {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

impl Store {
    pub fn memory() -> Self {
        Self::Memory(MemoryStore::new())
    }

    pub async fn sqlite(database_url: &str) -> Result<Self> {
        let sqlite = SqliteStore::connect(database_url).await?;
        tracing::info!(database_url = %database_url, "sqlite store ready");
        Ok(Self::Sqlite(sqlite))
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Store::Memory(_) => "memory",
            Store::Sqlite(_) => "sqlite",
        }
    }
}

impl AccountRepository for Store {
    async fn load_plan(&self, user_id: &str) -> Result<Option<AccountPlan>> {
        match self {
            Store::Memory(store) => store.load_plan(user_id).await,
            Store::Sqlite(store) => store.load_plan(user_id).await,
        }
    }

    async fn set_tier(&self, user_id: &str, tier: SubscriptionTier) -> Result<AccountPlan> {
        match self {
            Store::Memory(store) => store.set_tier(user_id, tier).await,
            Store::Sqlite(store) => store.set_tier(user_id, tier).await,
        }
    }
}

impl AgentRepository for Store {
    async fn list_agents(&self, user_id: &str) -> Result<Vec<AgentSummary>> {
        match self {
            Store::Memory(store) => store.list_agents(user_id).await,
            Store::Sqlite(store) => store.list_agents(user_id).await,
        }
    }

    async fn insert_agent_within_limit(&self, agent: &AgentSummary, limit: usize) -> Result<bool> {
        match self {
            Store::Memory(store) => store.insert_agent_within_limit(agent, limit).await,
            Store::Sqlite(store) => store.insert_agent_within_limit(agent, limit).await,
        }
    }

    async fn count_agents(&self, user_id: &str) -> Result<usize> {
        match self {
            Store::Memory(store) => store.count_agents(user_id).await,
            Store::Sqlite(store) => store.count_agents(user_id).await,
        }
    }
}

impl CallRepository for Store {
    async fn record_call(&self, call: &CallRecord) -> Result<()> {
        match self {
            Store::Memory(store) => store.record_call(call).await,
            Store::Sqlite(store) => store.record_call(call).await,
        }
    }

    async fn list_calls(&self, user_id: &str) -> Result<Vec<CallRecord>> {
        match self {
            Store::Memory(store) => store.list_calls(user_id).await,
            Store::Sqlite(store) => store.list_calls(user_id).await,
        }
    }
}
