use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tracing::info;

use crate::aggregate::Aggregate;
use crate::models::{
    Closeness, CustomQuestion, FeedbackMode, QuestionId, RatingLevel, RawResponse, Relationship,
    SkillKey, SkillRating, SkillStat,
};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Report {
    Anonymous(AnonymousReport),
    Named(NamedReport),
}

impl Report {
    pub fn mode(&self) -> FeedbackMode {
        match self {
            Report::Anonymous(_) => FeedbackMode::Anonymous,
            Report::Named(_) => FeedbackMode::Named,
        }
    }

    pub fn summary(&self) -> &ReportSummary {
        match self {
            Report::Anonymous(report) => &report.summary,
            Report::Named(report) => &report.summary,
        }
    }
}

/// Parts shared by both report shapes.
#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub responses_count: usize,
    pub invitations_count: usize,
    pub self_ratings: BTreeMap<SkillKey, RatingLevel>,
    pub stats: BTreeMap<SkillKey, SkillStat>,
    pub gaps: BTreeMap<SkillKey, Option<f64>>,
    pub custom_questions: Vec<CustomQuestion>,
}

impl ReportSummary {
    /// Whole-percent response rate, 0 when nobody was invited.
    pub fn response_rate(&self) -> u32 {
        if self.invitations_count == 0 {
            return 0;
        }
        (self.responses_count as f64 / self.invitations_count as f64 * 100.0).round() as u32
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnonymousReport {
    #[serde(flatten)]
    pub summary: ReportSummary,
    pub open_ended: OpenEndedPools,
    pub custom_answers: Vec<CustomAnswerPool>,
    pub anonymous_notes: Vec<String>,
    pub responses: Vec<AnonymousResponseCard>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OpenEndedPools {
    pub keep_doing: Vec<String>,
    pub improve: Vec<String>,
    pub anything_else: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomAnswerPool {
    pub question_id: QuestionId,
    pub question: String,
    pub answers: Vec<String>,
}

/// A single peer's answers with nothing that could narrow down who they are.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnonymousResponseCard {
    pub skill_ratings: BTreeMap<SkillKey, SkillRating>,
    pub keep_doing: String,
    pub improve: String,
    pub anything_else: Option<String>,
    pub custom_answers: BTreeMap<QuestionId, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NamedReport {
    #[serde(flatten)]
    pub summary: ReportSummary,
    pub responses: Vec<NamedResponseCard>,
    pub anonymous_notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attribution {
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedResponseCard {
    pub from: Attribution,
    pub relationship: Option<Relationship>,
    pub closeness: Option<Closeness>,
    pub submitted_at: DateTime<Utc>,
    pub skill_ratings: BTreeMap<SkillKey, SkillRating>,
    pub keep_doing: String,
    pub improve: String,
    pub anything_else: Option<String>,
    pub custom_answers: BTreeMap<QuestionId, String>,
}

/// Build the mode-specific report with a freshly seeded RNG.
pub fn assemble(
    mode: FeedbackMode,
    responses: &[RawResponse],
    aggregate: Aggregate,
    custom_questions: &[CustomQuestion],
    self_ratings: &BTreeMap<SkillKey, RatingLevel>,
    invitations_count: usize,
) -> Report {
    let mut rng = rand::thread_rng();

    let mut custom_questions = custom_questions.to_vec();
    custom_questions.sort_by_key(|q| q.order);

    let summary = ReportSummary {
        responses_count: responses.len(),
        invitations_count,
        self_ratings: self_ratings.clone(),
        stats: aggregate.stats,
        gaps: aggregate.gaps,
        custom_questions,
    };

    info!(%mode, responses = responses.len(), "assembling report");

    match mode {
        FeedbackMode::Anonymous => Report::Anonymous(anonymous_report(summary, responses, &mut rng)),
        FeedbackMode::Named => Report::Named(named_report(summary, responses, &mut rng)),
    }
}

fn anonymous_report<R: Rng + ?Sized>(
    summary: ReportSummary,
    responses: &[RawResponse],
    rng: &mut R,
) -> AnonymousReport {
    let open_ended = OpenEndedPools {
        keep_doing: shuffled(
            non_blank(responses.iter().map(|r| Some(r.open_ended.keep_doing.as_str()))),
            rng,
        ),
        improve: shuffled(
            non_blank(responses.iter().map(|r| Some(r.open_ended.improve.as_str()))),
            rng,
        ),
        anything_else: shuffled(
            non_blank(responses.iter().map(|r| r.open_ended.anything_else.as_deref())),
            rng,
        ),
    };

    let custom_answers = summary
        .custom_questions
        .iter()
        .map(|question| CustomAnswerPool {
            question_id: question.id,
            question: question.text.clone(),
            answers: shuffled(
                non_blank(
                    responses
                        .iter()
                        .map(|r| r.custom_answers.get(&question.id).map(String::as_str)),
                ),
                rng,
            ),
        })
        .collect();

    let anonymous_notes = shuffled(
        non_blank(responses.iter().map(|r| r.anonymous_note.as_deref())),
        rng,
    );

    let cards = responses.iter().map(anonymous_card).collect();

    AnonymousReport {
        summary,
        open_ended,
        custom_answers,
        anonymous_notes,
        responses: shuffled(cards, rng),
    }
}

fn anonymous_card(response: &RawResponse) -> AnonymousResponseCard {
    AnonymousResponseCard {
        skill_ratings: response.skill_ratings.clone(),
        keep_doing: response.open_ended.keep_doing.clone(),
        improve: response.open_ended.improve.clone(),
        anything_else: response
            .open_ended
            .anything_else
            .clone()
            .filter(|text| !text.trim().is_empty()),
        custom_answers: response.custom_answers.clone(),
    }
}

fn named_report<R: Rng + ?Sized>(
    summary: ReportSummary,
    responses: &[RawResponse],
    rng: &mut R,
) -> NamedReport {
    let anonymous_notes = shuffled(
        non_blank(responses.iter().map(|r| r.anonymous_note.as_deref())),
        rng,
    );

    let mut ordered: Vec<&RawResponse> = responses.iter().collect();
    ordered.sort_by_key(|r| r.submitted_at);

    let cards = ordered
        .into_iter()
        .map(|r| NamedResponseCard {
            from: Attribution {
                email: r.respondent.as_ref().and_then(|id| id.email.clone()),
                name: r.respondent.as_ref().and_then(|id| id.name.clone()),
            },
            relationship: r.relationship,
            closeness: r.closeness,
            submitted_at: r.submitted_at,
            skill_ratings: r.skill_ratings.clone(),
            keep_doing: r.open_ended.keep_doing.clone(),
            improve: r.open_ended.improve.clone(),
            anything_else: r.open_ended.anything_else.clone(),
            custom_answers: r.custom_answers.clone(),
        })
        .collect();

    NamedReport {
        summary,
        responses: cards,
        anonymous_notes,
    }
}

fn non_blank<'a>(values: impl Iterator<Item = Option<&'a str>>) -> Vec<String> {
    values
        .flatten()
        .filter(|text| !text.trim().is_empty())
        .map(str::to_string)
        .collect()
}

/// Fisher-Yates shuffle into a new permutation, independent of any other
/// list shuffled with the same RNG.
pub fn shuffled<T, R: Rng + ?Sized>(mut items: Vec<T>, rng: &mut R) -> Vec<T> {
    items.shuffle(rng);
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::config::SkillTemplate;
    use crate::models::{OpenEnded, RespondentIdentity};
    use chrono::Duration;
    use uuid::Uuid;

    const RESPONDENTS: [&str; 6] = ["ana", "ben", "chen", "dara", "eli", "fay"];

    fn question(order: i32, text: &str) -> CustomQuestion {
        CustomQuestion {
            id: Uuid::new_v4(),
            text: text.to_string(),
            order,
        }
    }

    fn responses(questions: &[CustomQuestion]) -> Vec<RawResponse> {
        let start = Utc::now() - Duration::days(3);
        RESPONDENTS
            .iter()
            .enumerate()
            .map(|(i, who)| RawResponse {
                skill_ratings: BTreeMap::from([
                    (
                        "discovery".to_string(),
                        SkillRating::Level(RatingLevel::ALL[i % 5]),
                    ),
                    ("execution".to_string(), SkillRating::CantSay),
                ]),
                open_ended: OpenEnded {
                    keep_doing: format!("{who} keep"),
                    improve: format!("{who} improve"),
                    anything_else: (i % 2 == 0).then(|| format!("{who} else")),
                },
                custom_answers: questions
                    .iter()
                    .map(|q| (q.id, format!("{who} on {}", q.text)))
                    .collect(),
                anonymous_note: (i != 1).then(|| format!("{who} note")),
                relationship: Some(Relationship::Team),
                closeness: Some(Closeness::VeryClose),
                respondent: Some(RespondentIdentity {
                    email: Some(format!("{who}@example.com")),
                    name: Some(who.to_string()),
                }),
                submitted_at: start + Duration::minutes(i as i64),
            })
            .collect()
    }

    fn build(mode: FeedbackMode, responses: &[RawResponse], questions: &[CustomQuestion]) -> Report {
        let self_ratings = BTreeMap::from([("discovery".to_string(), RatingLevel::Average)]);
        let aggregate = aggregate(responses, &self_ratings, &SkillTemplate::default()).unwrap();
        assemble(mode, responses, aggregate, questions, &self_ratings, 8)
    }

    fn anonymous(report: Report) -> AnonymousReport {
        match report {
            Report::Anonymous(report) => report,
            Report::Named(_) => panic!("expected anonymous report"),
        }
    }

    fn named(report: Report) -> NamedReport {
        match report {
            Report::Named(report) => report,
            Report::Anonymous(_) => panic!("expected named report"),
        }
    }

    fn sorted(mut values: Vec<String>) -> Vec<String> {
        values.sort();
        values
    }

    fn collect_keys(value: &serde_json::Value, keys: &mut Vec<String>) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, nested) in map {
                    keys.push(key.clone());
                    collect_keys(nested, keys);
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    collect_keys(item, keys);
                }
            }
            _ => {}
        }
    }

    #[test]
    fn anonymous_cards_carry_no_identifying_fields() {
        let questions = vec![question(1, "What should they delegate?")];
        let input = responses(&questions);
        let report = build(FeedbackMode::Anonymous, &input, &questions);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["mode"], "anonymous");

        for card in json["responses"].as_array().unwrap() {
            let mut keys = Vec::new();
            collect_keys(card, &mut keys);
            for forbidden in [
                "relationship",
                "closeness",
                "email",
                "name",
                "from",
                "respondent",
                "submitted_at",
                "anonymous_note",
            ] {
                assert!(!keys.iter().any(|k| k == forbidden), "card leaked `{forbidden}`");
            }
        }

        let text = json.to_string();
        for who in RESPONDENTS {
            assert!(!text.contains(&format!("{who}@example.com")));
        }
        assert!(!text.contains("very_close"));
    }

    #[test]
    fn anonymous_pools_keep_content_and_drop_blanks() {
        let questions = vec![question(2, "Second"), question(1, "First")];
        let mut input = responses(&questions);
        input[3].open_ended.anything_else = Some("   ".to_string());
        input[4].custom_answers.clear();

        let report = anonymous(build(FeedbackMode::Anonymous, &input, &questions));

        let expected_keep: Vec<String> = RESPONDENTS.iter().map(|w| format!("{w} keep")).collect();
        assert_eq!(sorted(report.open_ended.keep_doing.clone()), sorted(expected_keep));
        assert_eq!(
            sorted(report.open_ended.anything_else.clone()),
            vec!["ana else", "chen else", "eli else"]
        );
        assert_eq!(report.responses.len(), RESPONDENTS.len());

        assert_eq!(report.custom_answers.len(), 2);
        assert_eq!(report.custom_answers[0].question, "First");
        assert_eq!(report.custom_answers[0].answers.len(), RESPONDENTS.len() - 1);
        assert!(!report.custom_answers[0]
            .answers
            .iter()
            .any(|a| a.starts_with("eli ")));
        assert_eq!(report.summary.self_ratings["discovery"], RatingLevel::Average);
    }

    #[test]
    fn anonymous_notes_form_their_own_pool() {
        let input = responses(&[]);
        let report = anonymous(build(FeedbackMode::Anonymous, &input, &[]));

        assert_eq!(
            sorted(report.anonymous_notes.clone()),
            vec!["ana note", "chen note", "dara note", "eli note", "fay note"]
        );
    }

    #[test]
    fn repeated_assemblies_reshuffle_keep_doing() {
        let input = responses(&[]);
        let first = anonymous(build(FeedbackMode::Anonymous, &input, &[]));
        let baseline = first.open_ended.keep_doing.clone();

        let mut identical = 0;
        for _ in 0..100 {
            let report = anonymous(build(FeedbackMode::Anonymous, &input, &[]));
            let pool = report.open_ended.keep_doing;
            assert_eq!(sorted(pool.clone()), sorted(baseline.clone()));
            if pool == baseline {
                identical += 1;
            }
        }

        // 720 possible orderings, so a handful of repeats at most.
        assert!(identical <= 5, "{identical} identical orderings out of 100");
    }

    #[test]
    fn pools_are_permuted_independently() {
        let input = responses(&[]);
        let mut aligned = 0;
        for _ in 0..50 {
            let report = anonymous(build(FeedbackMode::Anonymous, &input, &[]));
            let keep_owners: Vec<&str> = report
                .open_ended
                .keep_doing
                .iter()
                .map(|t| t.split(' ').next().unwrap_or_default())
                .collect();
            let improve_owners: Vec<&str> = report
                .open_ended
                .improve
                .iter()
                .map(|t| t.split(' ').next().unwrap_or_default())
                .collect();
            let card_owners: Vec<&str> = report
                .responses
                .iter()
                .map(|c| c.keep_doing.split(' ').next().unwrap_or_default())
                .collect();
            if keep_owners == improve_owners && keep_owners == card_owners {
                aligned += 1;
            }
        }
        assert!(aligned <= 2, "pools lined up {aligned} times out of 50");
    }

    #[test]
    fn named_report_keeps_attribution_in_arrival_order() {
        let questions = vec![question(1, "Anything to add?")];
        let mut input = responses(&questions);
        input.reverse();

        let report = named(build(FeedbackMode::Named, &input, &questions));
        let emails: Vec<Option<String>> = report.responses.iter().map(|c| c.from.email.clone()).collect();
        let expected: Vec<Option<String>> = RESPONDENTS
            .iter()
            .map(|w| Some(format!("{w}@example.com")))
            .collect();
        assert_eq!(emails, expected);
        assert_eq!(report.responses[0].relationship, Some(Relationship::Team));
        assert_eq!(report.responses[0].closeness, Some(Closeness::VeryClose));
    }

    #[test]
    fn named_notes_are_detached_from_cards() {
        let mut input = responses(&[]);
        input[2].anonymous_note = Some(String::new());
        input[3].respondent = None;

        let report = named(build(FeedbackMode::Named, &input, &[]));
        assert_eq!(
            sorted(report.anonymous_notes.clone()),
            vec!["ana note", "dara note", "eli note", "fay note"]
        );
        assert_eq!(report.responses[3].from, Attribution { email: None, name: None });

        let cards = serde_json::to_string(&report.responses).unwrap();
        assert!(!cards.contains("note"));
        assert!(!cards.contains("anonymous_note"));
    }

    #[test]
    fn empty_input_still_produces_a_report() {
        let report = anonymous(build(FeedbackMode::Anonymous, &[], &[]));
        assert_eq!(report.summary.responses_count, 0);
        assert!(report.responses.is_empty());
        assert!(report.open_ended.keep_doing.is_empty());
        assert!(report.summary.gaps.values().all(Option::is_none));
        assert_eq!(report.summary.response_rate(), 0);

        let report = named(build(FeedbackMode::Named, &[], &[]));
        assert!(report.anonymous_notes.is_empty());
    }

    #[test]
    fn shuffled_preserves_items() {
        let mut rng = rand::thread_rng();
        let items: Vec<u32> = (0..20).collect();
        let mut out = shuffled(items.clone(), &mut rng);
        out.sort_unstable();
        assert_eq!(out, items);
    }
}
