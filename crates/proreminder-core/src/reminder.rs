use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, SubsecRound, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::datetime::iso_serde;

pub const HIGH_SYMBOL: &str = "🔴";
pub const MEDIUM_SYMBOL: &str = "🟡";
pub const LOW_SYMBOL: &str = "🟢";

/// Priority bucket of a primary reminder, stored as its symbol token.
///
/// Tokens outside the three known symbols survive a load as `Unrecognized` so
/// the collection round-trips; such items never pass a priority filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Priority {
    High,
    Medium,
    Low,
    Unrecognized(String),
}

impl Priority {
    pub fn symbol(&self) -> &str {
        match self {
            Priority::High => HIGH_SYMBOL,
            Priority::Medium => MEDIUM_SYMBOL,
            Priority::Low => LOW_SYMBOL,
            Priority::Unrecognized(raw) => raw,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Priority::Unrecognized(_))
    }
}

impl From<String> for Priority {
    fn from(token: String) -> Self {
        match token.as_str() {
            HIGH_SYMBOL => Priority::High,
            MEDIUM_SYMBOL => Priority::Medium,
            LOW_SYMBOL => Priority::Low,
            _ => Priority::Unrecognized(token),
        }
    }
}

impl From<Priority> for String {
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::Unrecognized(raw) => raw,
            known => known.symbol().to_string(),
        }
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    /// Accepts the symbol token or a bucket name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "high" | "h" | "max" => return Ok(Priority::High),
            "medium" | "m" | "med" => return Ok(Priority::Medium),
            "low" | "l" | "min" => return Ok(Priority::Low),
            _ => {}
        }

        match Priority::from(trimmed.to_string()) {
            Priority::Unrecognized(raw) => Err(anyhow!(
                "unknown priority '{raw}' (expected high, medium, low or {HIGH_SYMBOL}/{MEDIUM_SYMBOL}/{LOW_SYMBOL})"
            )),
            known => Ok(known),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Form input shared by add and edit on both collections.
///
/// `symbol` carries the priority token for the primary list and the free-form
/// icon for the extra list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReminderDraft {
    pub title: String,
    pub description: Option<String>,
    pub symbol: String,
    pub alarm_at: Option<DateTime<Utc>>,
}

impl ReminderDraft {
    pub fn new(title: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            symbol: symbol.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_alarm(mut self, alarm_at: DateTime<Utc>) -> Self {
        self.alarm_at = Some(alarm_at);
        self
    }

    fn normalized_description(&self) -> Option<String> {
        self.description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(ToString::to_string)
    }
}

/// Behaviour shared by the items of both collections.
pub trait Entity: Clone + fmt::Debug + Serialize + DeserializeOwned {
    fn id(&self) -> &str;

    /// Only the identity migrator and the constructors call this.
    fn set_id(&mut self, id: String);

    fn has_id(&self) -> bool {
        !self.id().trim().is_empty()
    }

    fn title(&self) -> &str;

    fn description(&self) -> Option<&str>;

    fn alarm_at(&self) -> Option<DateTime<Utc>>;

    /// Priority symbol or icon, used as the notification title prefix.
    fn symbol(&self) -> &str;

    /// Whether a draft carries every required field for this collection.
    fn accepts(draft: &ReminderDraft) -> bool;

    fn from_draft(id: String, draft: ReminderDraft, now: DateTime<Utc>) -> Self;

    /// Overwrites every editable field. The id and creation time stay.
    fn apply_draft(&mut self, draft: ReminderDraft);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    #[serde(default)]
    pub id: String,

    pub title: String,

    #[serde(
        default,
        rename = "desc",
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<String>,

    #[serde(rename = "datetime", with = "iso_serde")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "emoji")]
    pub priority: Priority,

    #[serde(
        default,
        rename = "alarm",
        with = "iso_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub alarm_at: Option<DateTime<Utc>>,
}

impl Entity for Reminder {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn alarm_at(&self) -> Option<DateTime<Utc>> {
        self.alarm_at
    }

    fn symbol(&self) -> &str {
        self.priority.symbol()
    }

    fn accepts(draft: &ReminderDraft) -> bool {
        !draft.title.trim().is_empty() && Priority::from(draft.symbol.clone()).is_recognized()
    }

    fn from_draft(id: String, draft: ReminderDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: draft.title.trim().to_string(),
            description: draft.normalized_description(),
            created_at: now.trunc_subsecs(3),
            priority: Priority::from(draft.symbol),
            alarm_at: draft.alarm_at.map(|at| at.trunc_subsecs(3)),
        }
    }

    fn apply_draft(&mut self, draft: ReminderDraft) {
        self.title = draft.title.trim().to_string();
        self.description = draft.normalized_description();
        self.priority = Priority::from(draft.symbol);
        self.alarm_at = draft.alarm_at.map(|at| at.trunc_subsecs(3));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraReminder {
    #[serde(default)]
    pub id: String,

    pub title: String,

    #[serde(
        default,
        rename = "desc",
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<String>,

    #[serde(rename = "datetime", with = "iso_serde")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "emoji")]
    pub icon: String,

    #[serde(
        default,
        rename = "alarm",
        with = "iso_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub alarm_at: Option<DateTime<Utc>>,
}

impl Entity for ExtraReminder {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn alarm_at(&self) -> Option<DateTime<Utc>> {
        self.alarm_at
    }

    fn symbol(&self) -> &str {
        &self.icon
    }

    fn accepts(draft: &ReminderDraft) -> bool {
        !draft.title.trim().is_empty() && !draft.symbol.trim().is_empty()
    }

    fn from_draft(id: String, draft: ReminderDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: draft.title.trim().to_string(),
            description: draft.normalized_description(),
            created_at: now.trunc_subsecs(3),
            icon: draft.symbol.trim().to_string(),
            alarm_at: draft.alarm_at.map(|at| at.trunc_subsecs(3)),
        }
    }

    fn apply_draft(&mut self, draft: ReminderDraft) {
        self.title = draft.title.trim().to_string();
        self.description = draft.normalized_description();
        self.icon = draft.symbol.trim().to_string();
        self.alarm_at = draft.alarm_at.map(|at| at.trunc_subsecs(3));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterPreferences {
    #[serde(rename = "max")]
    pub show_high: bool,
    #[serde(rename = "med")]
    pub show_medium: bool,
    #[serde(rename = "min")]
    pub show_low: bool,
    #[serde(rename = "custom")]
    pub custom_order: bool,
}

impl Default for FilterPreferences {
    fn default() -> Self {
        Self {
            show_high: true,
            show_medium: true,
            show_low: true,
            custom_order: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtraFilterPreferences {
    #[serde(rename = "reorderable")]
    pub custom_order: bool,
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.trim().is_empty()))
}
