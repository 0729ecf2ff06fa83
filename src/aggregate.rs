use std::collections::BTreeMap;

use tracing::debug;

use crate::config::SkillTemplate;
use crate::error::ReportError;
use crate::models::{RatingLevel, RawResponse, SkillKey, SkillRating, SkillStat};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregate {
    pub stats: BTreeMap<SkillKey, SkillStat>,
    pub gaps: BTreeMap<SkillKey, Option<f64>>,
}

/// Per-skill peer statistics and self/peer gaps over the template's skills.
///
/// Ratings for keys outside the template are ignored, and a response that
/// skips a skill simply does not count towards it.
pub fn aggregate(
    responses: &[RawResponse],
    self_ratings: &BTreeMap<SkillKey, RatingLevel>,
    template: &SkillTemplate,
) -> Result<Aggregate, ReportError> {
    template.validate()?;

    let mut result = Aggregate::default();

    for key in template.skill_keys() {
        let ratings = responses.iter().filter_map(|r| r.skill_ratings.get(key).copied());
        let stat = skill_stat(ratings);
        let gap = compute_gap(stat.average, self_ratings.get(key).copied());

        result.stats.insert(key.to_string(), stat);
        result.gaps.insert(key.to_string(), gap);
    }

    debug!(
        responses = responses.len(),
        skills = result.stats.len(),
        "aggregated peer ratings"
    );

    Ok(result)
}

pub fn skill_stat(ratings: impl IntoIterator<Item = SkillRating>) -> SkillStat {
    let mut stat = SkillStat::default();
    let mut total = 0u32;

    for rating in ratings {
        let Some(level) = rating.level() else {
            stat.cant_say_count += 1;
            continue;
        };

        let value = level.numeric();
        total += u32::from(value);
        stat.min = Some(stat.min.map_or(value, |m| m.min(value)));
        stat.max = Some(stat.max.map_or(value, |m| m.max(value)));
        *stat.distribution.entry(level).or_insert(0) += 1;
        stat.responded_count += 1;
    }

    if stat.responded_count > 0 {
        stat.average = Some(f64::from(total) / stat.responded_count as f64);
    }

    stat
}

/// Peer average minus the self rating, rounded to one decimal. Halves round
/// up towards positive infinity, so -0.25 becomes -0.2.
pub fn compute_gap(peer_average: Option<f64>, self_rating: Option<RatingLevel>) -> Option<f64> {
    let peer_average = peer_average?;
    let self_numeric = f64::from(self_rating?.numeric());
    Some(((peer_average - self_numeric) * 10.0 + 0.5).floor() / 10.0)
}
