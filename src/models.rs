use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ReportError;

pub type SkillKey = String;
pub type QuestionId = Uuid;

/// Peer rating on the comparative scale, ordered worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RatingLevel {
    #[serde(rename = "bottom_20")]
    Bottom20,
    #[serde(rename = "below_average")]
    BelowAverage,
    #[serde(rename = "average")]
    Average,
    #[serde(rename = "above_average")]
    AboveAverage,
    #[serde(rename = "top_20")]
    Top20,
}

impl RatingLevel {
    pub const ALL: [RatingLevel; 5] = [
        RatingLevel::Bottom20,
        RatingLevel::BelowAverage,
        RatingLevel::Average,
        RatingLevel::AboveAverage,
        RatingLevel::Top20,
    ];

    pub fn numeric(self) -> u8 {
        match self {
            RatingLevel::Bottom20 => 1,
            RatingLevel::BelowAverage => 2,
            RatingLevel::Average => 3,
            RatingLevel::AboveAverage => 4,
            RatingLevel::Top20 => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RatingLevel::Bottom20 => "bottom_20",
            RatingLevel::BelowAverage => "below_average",
            RatingLevel::Average => "average",
            RatingLevel::AboveAverage => "above_average",
            RatingLevel::Top20 => "top_20",
        }
    }
}

impl FromStr for RatingLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        RatingLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == value)
            .ok_or_else(|| format!("unknown rating level `{value}`"))
    }
}

/// What a peer answered for one skill: a level, or "can't say".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SkillRating {
    Level(RatingLevel),
    CantSay,
}

impl SkillRating {
    pub const CANT_SAY: &'static str = "cant_say";

    pub fn level(self) -> Option<RatingLevel> {
        match self {
            SkillRating::Level(level) => Some(level),
            SkillRating::CantSay => None,
        }
    }
}

impl FromStr for SkillRating {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value == Self::CANT_SAY {
            return Ok(SkillRating::CantSay);
        }
        value.parse().map(SkillRating::Level)
    }
}

impl TryFrom<String> for SkillRating {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SkillRating> for String {
    fn from(rating: SkillRating) -> Self {
        match rating {
            SkillRating::Level(level) => level.as_str().to_string(),
            SkillRating::CantSay => SkillRating::CANT_SAY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    Team,
    CrossFunctional,
    Manager,
    PeerPm,
    Other,
}

impl Relationship {
    pub fn as_str(self) -> &'static str {
        match self {
            Relationship::Team => "team",
            Relationship::CrossFunctional => "cross_functional",
            Relationship::Manager => "manager",
            Relationship::PeerPm => "peer_pm",
            Relationship::Other => "other",
        }
    }
}

impl FromStr for Relationship {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "team" => Ok(Relationship::Team),
            "cross_functional" => Ok(Relationship::CrossFunctional),
            "manager" => Ok(Relationship::Manager),
            "peer_pm" => Ok(Relationship::PeerPm),
            "other" => Ok(Relationship::Other),
            _ => Err(format!("unknown relationship `{value}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Closeness {
    VeryClose,
    Somewhat,
    NotMuch,
    Barely,
}

impl Closeness {
    pub fn as_str(self) -> &'static str {
        match self {
            Closeness::VeryClose => "very_close",
            Closeness::Somewhat => "somewhat",
            Closeness::NotMuch => "not_much",
            Closeness::Barely => "barely",
        }
    }
}

impl FromStr for Closeness {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "very_close" => Ok(Closeness::VeryClose),
            "somewhat" => Ok(Closeness::Somewhat),
            "not_much" => Ok(Closeness::NotMuch),
            "barely" => Ok(Closeness::Barely),
            _ => Err(format!("unknown closeness `{value}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackMode {
    Anonymous,
    Named,
}

impl FromStr for FeedbackMode {
    type Err = ReportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "anonymous" => Ok(FeedbackMode::Anonymous),
            "named" => Ok(FeedbackMode::Named),
            other => Err(ReportError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for FeedbackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedbackMode::Anonymous => f.write_str("anonymous"),
            FeedbackMode::Named => f.write_str("named"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespondentIdentity {
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenEnded {
    pub keep_doing: String,
    pub improve: String,
    pub anything_else: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomQuestion {
    pub id: QuestionId,
    pub text: String,
    pub order: i32,
}

/// One peer's submission for a cycle, normalized from either an invitation
/// or the shared link.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub skill_ratings: BTreeMap<SkillKey, SkillRating>,
    pub open_ended: OpenEnded,
    pub custom_answers: BTreeMap<QuestionId, String>,
    pub anonymous_note: Option<String>,
    pub relationship: Option<Relationship>,
    pub closeness: Option<Closeness>,
    pub respondent: Option<RespondentIdentity>,
    pub submitted_at: DateTime<Utc>,
}

/// Per-skill peer statistics. `average`, `min` and `max` are `None` exactly
/// when nobody gave a numeric rating.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillStat {
    pub average: Option<f64>,
    pub min: Option<u8>,
    pub max: Option<u8>,
    pub distribution: BTreeMap<RatingLevel, usize>,
    pub cant_say_count: usize,
    pub responded_count: usize,
}

/// Everything the collection store hands over for one report request.
#[derive(Debug, Clone)]
pub struct CycleInputs {
    pub cycle_id: Uuid,
    pub mode: String,
    pub status: String,
    pub concluded_at: Option<DateTime<Utc>>,
    pub self_ratings: BTreeMap<SkillKey, RatingLevel>,
    pub custom_questions: Vec<CustomQuestion>,
    pub invitations_count: usize,
    pub responses: Vec<RawResponse>,
}
