use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::ReportError;
use crate::models::{RatingLevel, SkillKey};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillTemplate {
    #[serde(default = "default_skills")]
    pub skills: Vec<SkillDefinition>,

    #[serde(default = "default_rating_scale")]
    pub rating_scale: Vec<RatingOption>,

    #[serde(default = "default_cant_say_label")]
    pub cant_say_label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillDefinition {
    pub key: SkillKey,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingOption {
    pub level: RatingLevel,
    pub label: String,
}

impl Default for SkillTemplate {
    fn default() -> Self {
        Self {
            skills: default_skills(),
            rating_scale: default_rating_scale(),
            cant_say_label: default_cant_say_label(),
        }
    }
}

fn default_skills() -> Vec<SkillDefinition> {
    [
        ("discovery", "Discovery & User Understanding"),
        ("prioritization", "Prioritization & Roadmap"),
        ("execution", "Execution & Delivery"),
        ("communication", "Communication"),
        ("stakeholder_management", "Stakeholder Management"),
        ("technical_fluency", "Technical Fluency"),
    ]
    .into_iter()
    .map(|(key, name)| SkillDefinition {
        key: key.to_string(),
        name: name.to_string(),
    })
    .collect()
}

fn default_rating_scale() -> Vec<RatingOption> {
    [
        (RatingLevel::Bottom20, "Bottom 20%"),
        (RatingLevel::BelowAverage, "Below average"),
        (RatingLevel::Average, "Average"),
        (RatingLevel::AboveAverage, "Above average"),
        (RatingLevel::Top20, "Top 20%"),
    ]
    .into_iter()
    .map(|(level, label)| RatingOption {
        level,
        label: label.to_string(),
    })
    .collect()
}

fn default_cant_say_label() -> String {
    "Can't say".to_string()
}

impl SkillTemplate {
    /// Load a template from TOML, falling back to the built-in template when
    /// no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let template = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read template {}", path.display()))?;
                Self::from_toml(&content)
                    .with_context(|| format!("failed to parse template {}", path.display()))?
            }
            None => Self::default(),
        };
        template.validate()?;
        Ok(template)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<(), ReportError> {
        if self.skills.is_empty() {
            return Err(ReportError::EmptySkillTemplate);
        }

        let mut seen = HashSet::new();
        for skill in &self.skills {
            if !seen.insert(skill.key.as_str()) {
                return Err(ReportError::DuplicateSkillKey(skill.key.clone()));
            }
        }

        let levels: Vec<RatingLevel> = self.rating_scale.iter().map(|o| o.level).collect();
        if levels != RatingLevel::ALL {
            return Err(ReportError::InvalidRatingScale(
                "rating scale must list every level once, lowest first".to_string(),
            ));
        }

        Ok(())
    }

    pub fn skill_keys(&self) -> impl Iterator<Item = &str> {
        self.skills.iter().map(|s| s.key.as_str())
    }

    pub fn label(&self, level: RatingLevel) -> &str {
        self.rating_scale
            .iter()
            .find(|o| o.level == level)
            .map(|o| o.label.as_str())
            .unwrap_or(level.as_str())
    }
}
