use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{AgentSummary, CallRecord, CallStatus, VoiceAccessDescriptor};
use crate::policy::{can_use_voice, normalize_language_code};

static NON_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^0-9]").expect("static regex"));

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceFilter {
    pub language: Option<String>,
    pub gender: Option<String>,
    pub query: Option<String>,
    #[serde(default)]
    pub only_available: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallFilter {
    pub status: Option<CallStatus>,
    pub agent_id: Option<String>,
    pub query: Option<String>,
}

pub fn filter_agents<'a>(agents: &'a [AgentSummary], query: &str) -> Vec<&'a AgentSummary> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return agents.iter().collect();
    }

    agents
        .iter()
        .filter(|agent| {
            agent.name.to_lowercase().contains(&needle)
                || agent.agent_id.to_lowercase().contains(&needle)
                || agent.language.to_lowercase().contains(&needle)
        })
        .collect()
}

pub fn filter_voices<'a>(
    voices: &'a [VoiceAccessDescriptor],
    filter: &VoiceFilter,
) -> Vec<&'a VoiceAccessDescriptor> {
    let language = filter
        .language
        .as_deref()
        .map(normalize_language_code)
        .filter(|code| !code.is_empty());
    let gender = non_blank(filter.gender.as_deref());
    let query = non_blank(filter.query.as_deref());

    voices
        .iter()
        .filter(|voice| !filter.only_available || can_use_voice(voice))
        .filter(|voice| match &language {
            Some(code) => voice
                .language
                .as_deref()
                .map(normalize_language_code)
                .is_some_and(|voice_code| &voice_code == code),
            None => true,
        })
        .filter(|voice| match &gender {
            Some(gender) => voice
                .gender
                .as_deref()
                .is_some_and(|value| value.eq_ignore_ascii_case(gender)),
            None => true,
        })
        .filter(|voice| match &query {
            Some(query) => {
                voice.name.to_lowercase().contains(query)
                    || voice.voice_id.to_lowercase().contains(query)
            }
            None => true,
        })
        .collect()
}

/// Newest first.
pub fn filter_calls<'a>(calls: &'a [CallRecord], filter: &CallFilter) -> Vec<&'a CallRecord> {
    let query = non_blank(filter.query.as_deref());
    let query_digits = query.as_deref().map(digits_only).unwrap_or_default();
    let agent_id = non_blank(filter.agent_id.as_deref());

    let mut matched = calls
        .iter()
        .filter(|call| filter.status.map_or(true, |status| call.status == status))
        .filter(|call| agent_id.as_deref().map_or(true, |id| call.agent_id == id))
        .filter(|call| match &query {
            Some(query) => {
                let name_hit = call
                    .contact_name
                    .as_deref()
                    .is_some_and(|name| name.to_lowercase().contains(query));
                let phone_hit = !query_digits.is_empty()
                    && digits_only(&call.phone_number).contains(&query_digits);
                name_hit || phone_hit
            }
            None => true,
        })
        .collect::<Vec<_>>();

    matched.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    matched
}

pub fn digits_only(value: &str) -> String {
    NON_DIGITS.replace_all(value, "").into_owned()
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::models::VoiceAccessControl;

    fn agent(id: &str, name: &str, language: &str) -> AgentSummary {
        AgentSummary {
            agent_id: id.to_string(),
            user_id: "u1".to_string(),
            name: name.to_string(),
            voice_id: None,
            language: language.to_string(),
            created_at: Utc::now(),
        }
    }

    fn call(id: &str, name: Option<&str>, phone: &str, status: CallStatus, age_min: i64) -> CallRecord {
        CallRecord {
            call_id: id.to_string(),
            user_id: "u1".to_string(),
            agent_id: if id.starts_with('a') { "agent-a" } else { "agent-b" }.to_string(),
            contact_name: name.map(ToString::to_string),
            phone_number: phone.to_string(),
            status,
            started_at: Utc::now() - Duration::minutes(age_min),
            duration_secs: None,
        }
    }

    #[test]
    fn agent_search_is_case_insensitive() {
        let agents = vec![agent("1", "Sales Bot", "en"), agent("2", "Support", "hi")];
        assert_eq!(filter_agents(&agents, "sales").len(), 1);
        assert_eq!(filter_agents(&agents, "HI")[0].agent_id, "2");
        assert_eq!(filter_agents(&agents, "   ").len(), 2);
    }

    #[test]
    fn agent_search_matches_part_of_a_language_tag() {
        let agents = vec![agent("1", "Desk", "en-US"), agent("2", "Desk", "es-MX")];
        let matched = filter_agents(&agents, "us");
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].agent_id, "1");
        assert_eq!(filter_agents(&agents, "es-").len(), 1);
    }

    #[test]
    fn call_search_matches_phone_digits_and_sorts_newest_first() {
        let calls = vec![
            call("a1", Some("Priya"), "+1 (555) 010-0001", CallStatus::Completed, 30),
            call("a2", None, "+1 555 010 0002", CallStatus::Failed, 5),
            call("b1", Some("Sam"), "+15550100003", CallStatus::Completed, 1),
        ];

        let hits = filter_calls(
            &calls,
            &CallFilter {
                query: Some("555-010".to_string()),
                ..CallFilter::default()
            },
        );
        assert_eq!(
            hits.iter().map(|c| c.call_id.as_str()).collect::<Vec<_>>(),
            vec!["b1", "a2", "a1"]
        );

        let completed_a = filter_calls(
            &calls,
            &CallFilter {
                status: Some(CallStatus::Completed),
                agent_id: Some("agent-a".to_string()),
                query: None,
            },
        );
        assert_eq!(completed_a.len(), 1);
        assert_eq!(completed_a[0].call_id, "a1");

        let by_name = filter_calls(
            &calls,
            &CallFilter {
                query: Some("priya".to_string()),
                ..CallFilter::default()
            },
        );
        assert_eq!(by_name.len(), 1);
    }

    #[test]
    fn voice_filter_combines_criteria() {
        let voices = vec![
            VoiceAccessDescriptor {
                voice_id: "v-en".to_string(),
                name: "Aria".to_string(),
                language: Some("en-US".to_string()),
                gender: Some("female".to_string()),
                access_control: None,
            },
            VoiceAccessDescriptor {
                voice_id: "v-hi".to_string(),
                name: "Kabir".to_string(),
                language: Some("hi".to_string()),
                gender: Some("male".to_string()),
                access_control: Some(VoiceAccessControl {
                    available: false,
                    required_plan: Some("pro".to_string()),
                }),
            },
        ];

        let english = filter_voices(
            &voices,
            &VoiceFilter {
                language: Some("en".to_string()),
                ..VoiceFilter::default()
            },
        );
        assert_eq!(english.len(), 1);

        let available = filter_voices(
            &voices,
            &VoiceFilter {
                only_available: true,
                ..VoiceFilter::default()
            },
        );
        assert_eq!(available[0].voice_id, "v-en");

        let male = filter_voices(
            &voices,
            &VoiceFilter {
                gender: Some("MALE".to_string()),
                ..VoiceFilter::default()
            },
        );
        assert_eq!(male[0].name, "Kabir");
    }
}
