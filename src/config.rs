use std::env;
use std::str::FromStr;

use crate::models::SlotOverwritePolicy;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub business_name: String,
    pub business_config_path: Option<String>,
    pub session_idle_timeout_minutes: i64,
    pub session_sweep_interval_secs: u64,
    pub dialogue: DialogueConfig,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DialogueConfig {
    pub max_history: usize,
    pub fallback_after_turns: u32,
    pub max_alternatives: usize,
    pub overwrite_policy: SlotOverwritePolicy,
    pub confirmation_interrupt: bool,
    pub require_subject: bool,
    pub default_subject: String,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            max_history: 20,
            fallback_after_turns: 2,
            max_alternatives: 3,
            overwrite_policy: SlotOverwritePolicy::LastMentionWins,
            confirmation_interrupt: true,
            require_subject: false,
            default_subject: "Appointment".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = DialogueConfig::default();
        Self {
            port: parse_var("PORT").unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "schedulebot.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            business_name: env::var("BUSINESS_NAME").unwrap_or_else(|_| "Schedulebot".to_string()),
            business_config_path: env::var("BUSINESS_CONFIG").ok().filter(|p| !p.is_empty()),
            session_idle_timeout_minutes: parse_var("SESSION_IDLE_TIMEOUT_MINUTES")
                .filter(|m: &i64| *m > 0)
                .unwrap_or(30),
            session_sweep_interval_secs: parse_var("SESSION_SWEEP_INTERVAL_SECS")
                .filter(|s: &u64| *s > 0)
                .unwrap_or(60),
            dialogue: DialogueConfig {
                max_history: parse_var("DIALOGUE_MAX_HISTORY").unwrap_or(defaults.max_history),
                fallback_after_turns: parse_var("DIALOGUE_FALLBACK_AFTER_TURNS")
                    .unwrap_or(defaults.fallback_after_turns),
                max_alternatives: parse_var("DIALOGUE_MAX_ALTERNATIVES")
                    .filter(|k: &usize| *k > 0)
                    .unwrap_or(defaults.max_alternatives),
                overwrite_policy: env::var("DIALOGUE_OVERWRITE_POLICY")
                    .ok()
                    .and_then(|v| SlotOverwritePolicy::parse(&v))
                    .unwrap_or(defaults.overwrite_policy),
                confirmation_interrupt: parse_var("DIALOGUE_CONFIRMATION_INTERRUPT")
                    .unwrap_or(defaults.confirmation_interrupt),
                require_subject: parse_var("DIALOGUE_REQUIRE_SUBJECT")
                    .unwrap_or(defaults.require_subject),
                default_subject: env::var("DIALOGUE_DEFAULT_SUBJECT")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or(defaults.default_subject),
            },
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
