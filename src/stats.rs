use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Six-tier proficiency scale. Derived `Ord` follows declaration order,
/// which is the ordinal the platform uses everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    A1,
    A2,
    B1,
    B2,
    C1,
    C2,
}

#[allow(dead_code)]
pub const ALL_LEVELS: [Level; 6] = [
    Level::A1,
    Level::A2,
    Level::B1,
    Level::B2,
    Level::C1,
    Level::C2,
];

impl Level {
    pub fn parse(s: &str) -> Option<Level> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A1" => Some(Level::A1),
            "A2" => Some(Level::A2),
            "B1" => Some(Level::B1),
            "B2" => Some(Level::B2),
            "C1" => Some(Level::C1),
            "C2" => Some(Level::C2),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::A1 => "A1",
            Level::A2 => "A2",
            Level::B1 => "B1",
            Level::B2 => "B2",
            Level::C1 => "C1",
            Level::C2 => "C2",
        }
    }
}

/// A student may attempt any mission at or below their level. Missions
/// without a target level, and students without a recorded level, are
/// never gated.
pub fn is_eligible(student: Option<Level>, target: Option<Level>) -> bool {
    match (student, target) {
        (Some(s), Some(t)) => t <= s,
        _ => true,
    }
}

/// Subscription plans with their weekly conversation-time caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Starter,
    Standard,
    Pro,
    Unlimited,
}

impl Plan {
    pub fn parse(s: &str) -> Option<Plan> {
        match s.trim().to_ascii_lowercase().as_str() {
            "starter" => Some(Plan::Starter),
            "standard" => Some(Plan::Standard),
            "pro" => Some(Plan::Pro),
            "unlimited" => Some(Plan::Unlimited),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Starter => "starter",
            Plan::Standard => "standard",
            Plan::Pro => "pro",
            Plan::Unlimited => "unlimited",
        }
    }

    /// Weekly cap in seconds; `None` means uncapped.
    pub fn weekly_limit_seconds(&self) -> Option<i64> {
        match self {
            Plan::Starter => Some(1800),
            Plan::Standard => Some(3600),
            Plan::Pro => Some(7200),
            Plan::Unlimited => None,
        }
    }
}

/// One student as the aggregation engine sees them: identity, what to call
/// them in reports, gating level, and the set of completed mission ids.
#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub level: Option<Level>,
    pub completed: HashSet<String>,
}

impl RosterEntry {
    /// Display name, falling back to email, then "Unknown".
    pub fn report_name(&self) -> String {
        self.display_name
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(self.email.as_deref().filter(|s| !s.trim().is_empty()))
            .unwrap_or("Unknown")
            .to_string()
    }
}

#[derive(Debug, Clone)]
pub struct MissionDef {
    pub id: String,
    pub target_level: Option<Level>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotCompletedStudent {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionStats {
    pub mission_id: String,
    pub completed_count: usize,
    pub total_eligible: usize,
    pub completion_rate: f64,
    pub not_completed: Vec<NotCompletedStudent>,
}

/// Completion stats for one mission over a roster. Only eligible students
/// count; an empty eligible set yields a 0 rate rather than NaN.
pub fn mission_stats(
    mission_id: &str,
    target: Option<Level>,
    roster: &[RosterEntry],
) -> MissionStats {
    let mut completed_count = 0usize;
    let mut total_eligible = 0usize;
    let mut not_completed = Vec::new();

    for student in roster {
        if !is_eligible(student.level, target) {
            continue;
        }
        total_eligible += 1;
        if student.completed.contains(mission_id) {
            completed_count += 1;
        } else {
            not_completed.push(NotCompletedStudent {
                id: student.id.clone(),
                name: student.report_name(),
                level: student.level.map(|l| l.as_str().to_string()),
            });
        }
    }

    let completion_rate = if total_eligible > 0 {
        100.0 * (completed_count as f64) / (total_eligible as f64)
    } else {
        0.0
    };

    MissionStats {
        mission_id: mission_id.to_string(),
        completed_count,
        total_eligible,
        completion_rate,
        not_completed,
    }
}

/// Stats for every mission; missions are independent of each other.
pub fn all_mission_stats(
    missions: &[MissionDef],
    roster: &[RosterEntry],
) -> HashMap<String, MissionStats> {
    missions
        .iter()
        .map(|m| {
            (
                m.id.clone(),
                mission_stats(&m.id, m.target_level, roster),
            )
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub used_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_used: Option<f64>,
    pub is_at_limit: bool,
    pub is_unlimited: bool,
}

/// Current-period usage against the plan's weekly cap. A student with no
/// plan is treated as uncapped.
pub fn usage_stats(used_seconds: i64, plan: Option<Plan>) -> UsageStats {
    match plan.and_then(|p| p.weekly_limit_seconds()) {
        Some(limit) => UsageStats {
            used_seconds,
            limit_seconds: Some(limit),
            percent_used: Some(used_seconds as f64 / limit as f64),
            is_at_limit: used_seconds >= limit,
            is_unlimited: false,
        },
        None => UsageStats {
            used_seconds,
            limit_seconds: None,
            percent_used: None,
            is_at_limit: false,
            is_unlimited: true,
        },
    }
}
