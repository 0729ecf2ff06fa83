use std::fmt::Write;

use tracing::debug;

use crate::aggregate;
use crate::anonymize::{self, AnonymousReport, NamedReport, Report, ReportSummary};
use crate::config::SkillTemplate;
use crate::error::ReportError;
use crate::models::{CustomQuestion, CycleInputs, FeedbackMode, QuestionId, SkillRating};

/// Aggregate and assemble a report for a concluded cycle.
///
/// An unrecognized mode is an error rather than a fallback to either branch.
pub fn build_report(inputs: &CycleInputs, template: &SkillTemplate) -> Result<Report, ReportError> {
    if inputs.status != "concluded" {
        return Err(ReportError::CycleNotConcluded(inputs.cycle_id));
    }
    let mode: FeedbackMode = inputs.mode.parse()?;
    debug!(
        cycle_id = %inputs.cycle_id,
        concluded_at = ?inputs.concluded_at,
        %mode,
        "building report"
    );

    let aggregate = aggregate::aggregate(&inputs.responses, &inputs.self_ratings, template)?;

    Ok(anonymize::assemble(
        mode,
        &inputs.responses,
        aggregate,
        &inputs.custom_questions,
        &inputs.self_ratings,
        inputs.invitations_count,
    ))
}

pub fn render_json(report: &Report) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

pub fn render_markdown(report: &Report, template: &SkillTemplate) -> String {
    let mut output = String::new();
    let summary = report.summary();

    let _ = writeln!(output, "# Peer Feedback Report");
    let _ = writeln!(output, "Mode: {}", report.mode());
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output, "- Responses: {}", summary.responses_count);
    let _ = writeln!(output, "- Invited: {}", summary.invitations_count);
    let _ = writeln!(output, "- Response rate: {}%", summary.response_rate());
    let _ = writeln!(output);

    write_skill_comparison(&mut output, summary, template);

    match report {
        Report::Anonymous(report) => write_anonymous(&mut output, report, template),
        Report::Named(report) => write_named(&mut output, report, template),
    }

    output
}

fn write_skill_comparison(output: &mut String, summary: &ReportSummary, template: &SkillTemplate) {
    let _ = writeln!(output, "## Skill Comparison");

    if summary.responses_count == 0 {
        let _ = writeln!(output, "No peer responses were received for this cycle.");
        let _ = writeln!(output);
    }

    let _ = writeln!(output, "| Skill | Self | Peers (avg) | Range | Can't say | Gap |");
    let _ = writeln!(output, "|---|---|---|---|---|---|");

    for skill in &template.skills {
        let key = skill.key.as_str();
        let self_label = summary
            .self_ratings
            .get(key)
            .map(|level| template.label(*level).to_string())
            .unwrap_or_else(|| "-".to_string());

        let Some(stat) = summary.stats.get(key) else {
            continue;
        };
        let average = stat
            .average
            .map(|avg| format!("{avg:.1} ({})", stat.responded_count))
            .unwrap_or_else(|| "-".to_string());
        let range = match (stat.min, stat.max) {
            (Some(min), Some(max)) => format!("{min}-{max}"),
            _ => "-".to_string(),
        };
        let gap = summary
            .gaps
            .get(key)
            .copied()
            .flatten()
            .map(|gap| format!("{gap:+.1}"))
            .unwrap_or_else(|| "-".to_string());

        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {} | {} |",
            skill.name, self_label, average, range, stat.cant_say_count, gap
        );
    }
    let _ = writeln!(output);
}

fn write_anonymous(output: &mut String, report: &AnonymousReport, template: &SkillTemplate) {
    let _ = writeln!(output, "## Open-Ended Feedback");
    write_pool(output, "What they should keep doing", &report.open_ended.keep_doing);
    write_pool(output, "What they could improve", &report.open_ended.improve);
    write_pool(output, "Anything else", &report.open_ended.anything_else);

    if !report.custom_answers.is_empty() {
        let _ = writeln!(output, "## Your Questions");
        for pool in &report.custom_answers {
            write_pool(output, &pool.question, &pool.answers);
        }
    }

    if !report.anonymous_notes.is_empty() {
        write_pool(output, "Anonymous notes", &report.anonymous_notes);
    }

    let _ = writeln!(output, "## Individual Responses");
    if report.responses.is_empty() {
        let _ = writeln!(output, "No responses recorded.");
        return;
    }

    for (index, card) in report.responses.iter().enumerate() {
        let _ = writeln!(output, "### Response {}", index + 1);
        write_ratings(output, &card.skill_ratings, template);
        let _ = writeln!(output, "- Keep doing: {}", card.keep_doing);
        let _ = writeln!(output, "- Improve: {}", card.improve);
        if let Some(extra) = &card.anything_else {
            let _ = writeln!(output, "- Anything else: {extra}");
        }
        write_custom_answers(output, &card.custom_answers, &report.summary.custom_questions);
        let _ = writeln!(output);
    }
}

fn write_named(output: &mut String, report: &NamedReport, template: &SkillTemplate) {
    let _ = writeln!(output, "## Responses");
    if report.responses.is_empty() {
        let _ = writeln!(output, "No responses recorded.");
        let _ = writeln!(output);
    }

    for card in &report.responses {
        let who = match (&card.from.name, &card.from.email) {
            (Some(name), Some(email)) => format!("{name} ({email})"),
            (Some(name), None) => name.clone(),
            (None, Some(email)) => email.clone(),
            (None, None) => "Anonymous".to_string(),
        };
        let _ = writeln!(output, "### {who}");
        let relationship = card.relationship.map(|r| r.as_str()).unwrap_or("unknown");
        let closeness = card.closeness.map(|c| c.as_str()).unwrap_or("unknown");
        let _ = writeln!(
            output,
            "Relationship: {relationship}, closeness: {closeness}, submitted {}",
            card.submitted_at.format("%Y-%m-%d")
        );
        write_ratings(output, &card.skill_ratings, template);
        let _ = writeln!(output, "- Keep doing: {}", card.keep_doing);
        let _ = writeln!(output, "- Improve: {}", card.improve);
        if let Some(extra) = &card.anything_else {
            let _ = writeln!(output, "- Anything else: {extra}");
        }
        write_custom_answers(output, &card.custom_answers, &report.summary.custom_questions);
        let _ = writeln!(output);
    }

    write_pool(output, "Anonymous notes", &report.anonymous_notes);
}

fn write_pool(output: &mut String, title: &str, entries: &[String]) {
    let _ = writeln!(output, "### {title}");
    if entries.is_empty() {
        let _ = writeln!(output, "No answers.");
    } else {
        for entry in entries {
            let _ = writeln!(output, "- {entry}");
        }
    }
    let _ = writeln!(output);
}

fn write_ratings(
    output: &mut String,
    ratings: &std::collections::BTreeMap<String, SkillRating>,
    template: &SkillTemplate,
) {
    for skill in &template.skills {
        let label = match ratings.get(&skill.key) {
            Some(SkillRating::Level(level)) => template.label(*level),
            Some(SkillRating::CantSay) => template.cant_say_label.as_str(),
            None => continue,
        };
        let _ = writeln!(output, "- {}: {}", skill.name, label);
    }
}

fn write_custom_answers(
    output: &mut String,
    answers: &std::collections::BTreeMap<QuestionId, String>,
    questions: &[CustomQuestion],
) {
    for question in questions {
        if let Some(answer) = answers.get(&question.id) {
            let _ = writeln!(output, "- {}: {}", question.text, answer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OpenEnded, RatingLevel, RawResponse, RespondentIdentity};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn inputs(mode: &str, status: &str) -> CycleInputs {
        let question = CustomQuestion {
            id: Uuid::new_v4(),
            text: "What should they delegate?".to_string(),
            order: 1,
        };
        let response = RawResponse {
            skill_ratings: BTreeMap::from([
                ("discovery".to_string(), SkillRating::Level(RatingLevel::Top20)),
                ("execution".to_string(), SkillRating::CantSay),
            ]),
            open_ended: OpenEnded {
                keep_doing: "Sharp user interviews".to_string(),
                improve: "Write decisions down".to_string(),
                anything_else: None,
            },
            custom_answers: BTreeMap::from([(question.id, "Release notes".to_string())]),
            anonymous_note: Some("Thanks for asking".to_string()),
            relationship: None,
            closeness: None,
            respondent: Some(RespondentIdentity {
                email: Some("robin@example.com".to_string()),
                name: Some("Robin".to_string()),
            }),
            submitted_at: Utc::now(),
        };

        CycleInputs {
            cycle_id: Uuid::new_v4(),
            mode: mode.to_string(),
            status: status.to_string(),
            concluded_at: Some(Utc::now()),
            self_ratings: BTreeMap::from([("discovery".to_string(), RatingLevel::Average)]),
            custom_questions: vec![question],
            invitations_count: 4,
            responses: vec![response],
        }
    }

    #[test]
    fn unknown_mode_fails_closed() {
        let result = build_report(&inputs("public", "concluded"), &SkillTemplate::default());
        assert!(matches!(result, Err(ReportError::UnknownMode(mode)) if mode == "public"));

        let result = build_report(&inputs("", "concluded"), &SkillTemplate::default());
        assert!(matches!(result, Err(ReportError::UnknownMode(_))));
    }

    #[test]
    fn pending_cycle_is_rejected() {
        let result = build_report(&inputs("anonymous", "pending"), &SkillTemplate::default());
        assert!(matches!(result, Err(ReportError::CycleNotConcluded(_))));
    }

    #[test]
    fn anonymous_markdown_hides_identity() {
        let template = SkillTemplate::default();
        let report = build_report(&inputs("anonymous", "concluded"), &template).unwrap();
        let markdown = render_markdown(&report, &template);

        assert!(markdown.contains("# Peer Feedback Report"));
        assert!(markdown.contains("Response rate: 25%"));
        assert!(markdown.contains("| Discovery & User Understanding | Average | 5.0 (1) | 5-5 | 0 | +2.0 |"));
        assert!(markdown.contains("- Execution & Delivery: Can't say"));
        assert!(markdown.contains("- What should they delegate?: Release notes"));
        assert!(!markdown.contains("robin@example.com"));
        assert!(!markdown.contains("Robin"));
        assert!(markdown.contains("### Anonymous notes\n- Thanks for asking"));
    }

    #[test]
    fn named_markdown_attributes_and_lists_notes() {
        let template = SkillTemplate::default();
        let report = build_report(&inputs("named", "concluded"), &template).unwrap();
        let markdown = render_markdown(&report, &template);

        assert!(markdown.contains("### Robin (robin@example.com)"));
        assert!(markdown.contains("### Anonymous notes\n- Thanks for asking"));

        let json = render_json(&report).unwrap();
        assert!(json.contains("\"mode\": \"named\""));
        assert!(json.contains("\"anonymous_notes\""));
    }

    #[test]
    fn named_card_keeps_name_without_email() {
        let template = SkillTemplate::default();
        let mut cycle = inputs("named", "concluded");
        cycle.responses[0].respondent = Some(RespondentIdentity {
            email: None,
            name: Some("Taylor".to_string()),
        });

        let report = build_report(&cycle, &template).unwrap();
        let markdown = render_markdown(&report, &template);
        assert!(markdown.contains("### Taylor\n"));
        assert!(!markdown.contains("### Anonymous\n"));

        let mut cycle = inputs("anonymous", "concluded");
        cycle.responses[0].respondent = Some(RespondentIdentity {
            email: None,
            name: Some("Taylor".to_string()),
        });
        let report = build_report(&cycle, &template).unwrap();
        assert!(!render_markdown(&report, &template).contains("Taylor"));
    }

    #[test]
    fn empty_cycle_renders_no_data() {
        let template = SkillTemplate::default();
        let mut cycle = inputs("anonymous", "concluded");
        cycle.responses.clear();

        let report = build_report(&cycle, &template).unwrap();
        let markdown = render_markdown(&report, &template);
        assert!(markdown.contains("No peer responses were received for this cycle."));
        assert!(markdown.contains("No responses recorded."));
    }
}
