use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Subscription tier of an account.
/// Unknown tiers coming from the server are kept verbatim; a null tier is free.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "String")]
pub enum PlanTier {
    #[default]
    Free,
    Premium,
    Other(String),
}

impl PlanTier {
    pub fn as_str(&self) -> &str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Premium => "premium",
            PlanTier::Other(s) => s,
        }
    }
}

impl From<String> for PlanTier {
    fn from(s: String) -> Self {
        match s.as_str() {
            "free" => PlanTier::Free,
            "premium" => PlanTier::Premium,
            _ => PlanTier::Other(s),
        }
    }
}

impl From<Option<String>> for PlanTier {
    fn from(s: Option<String>) -> Self {
        s.map(PlanTier::from).unwrap_or_default()
    }
}

impl From<PlanTier> for String {
    fn from(tier: PlanTier) -> Self {
        tier.as_str().to_string()
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Profile of the signed-in user as served by `/auth/profile/`.
///
/// This is a cache of the server's copy: it is replaced wholesale by
/// login, register, profile fetch and profile update responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub plan: PlanTier,
    #[serde(default)]
    #[cfg_attr(feature = "ts", ts(type = "string | null"))]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub monthly_transcriptions: i64,
    #[serde(default)]
    pub monthly_content_generations: i64,
    #[serde(default)]
    pub is_premium: bool,
    /// Fields this client does not know about, preserved as-is.
    #[serde(flatten)]
    #[cfg_attr(feature = "ts", ts(skip))]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    pub fn full_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() {
            self.username.clone()
        } else {
            name.to_string()
        }
    }
}

/// Usage limits for the current plan. `None` means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct PlanLimits {
    pub transcriptions: Option<i64>,
    pub content_generations: Option<i64>,
}

/// Usage statistics from `/auth/stats/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct UserStats {
    #[serde(default)]
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub plan: PlanTier,
    #[serde(default)]
    pub is_premium: bool,
    #[serde(default)]
    pub monthly_transcriptions: i64,
    #[serde(default)]
    pub monthly_content_generations: i64,
    #[serde(default)]
    pub can_transcribe: bool,
    #[serde(default)]
    pub can_generate_content: bool,
    #[serde(default)]
    pub limits: PlanLimits,
}

impl UserStats {
    /// Render a usage counter against its limit, e.g. "3 / 10" or "3 / unlimited"
    pub fn usage_display(used: i64, limit: Option<i64>) -> String {
        match limit {
            Some(limit) => format!("{} / {}", used, limit),
            None => format!("{} / unlimited", used),
        }
    }
}
