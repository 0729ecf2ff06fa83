use std::collections::BTreeMap;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ReportError;
use crate::models::{
    CustomQuestion, CycleInputs, OpenEnded, QuestionId, RatingLevel, RawResponse,
    RespondentIdentity, SkillKey, SkillRating,
};

const RESPONSE_COLUMNS: &str = "r.closeness, r.relationship, r.skill_ratings, r.keep_doing, \
     r.improve, r.anything_else, r.anonymous_note, r.custom_answers, r.created_at";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Read everything a report needs for one cycle, with invitation and
/// shared-link responses normalized into arrival order.
pub async fn fetch_cycle_inputs(pool: &PgPool, cycle_id: Uuid) -> anyhow::Result<CycleInputs> {
    let cycle = sqlx::query(
        "SELECT c.mode, c.status, c.concluded_at, sa.skill_ratings \
         FROM peer_feedback.cycles c \
         LEFT JOIN peer_feedback.self_assessments sa ON sa.cycle_id = c.id \
         WHERE c.id = $1",
    )
    .bind(cycle_id)
    .fetch_optional(pool)
    .await
    .context("failed to load cycle")?
    .ok_or(ReportError::CycleNotFound(cycle_id))?;

    let self_ratings = parse_self_ratings(cycle.get::<Option<Value>, _>("skill_ratings").as_ref());

    let question_rows = sqlx::query(
        "SELECT id, question_text, question_order \
         FROM peer_feedback.custom_questions \
         WHERE cycle_id = $1 \
         ORDER BY question_order, id",
    )
    .bind(cycle_id)
    .fetch_all(pool)
    .await
    .context("failed to load custom questions")?;

    let custom_questions: Vec<CustomQuestion> = question_rows
        .into_iter()
        .map(|row| CustomQuestion {
            id: row.get("id"),
            text: row.get("question_text"),
            order: row.get("question_order"),
        })
        .collect();

    let invitations_count: i64 = sqlx::query(
        "SELECT COUNT(*) AS total FROM peer_feedback.invitations WHERE cycle_id = $1",
    )
    .bind(cycle_id)
    .fetch_one(pool)
    .await
    .context("failed to count invitations")?
    .get("total");

    let query = format!(
        "SELECT {RESPONSE_COLUMNS}, i.email AS responder_email, i.name AS responder_name \
         FROM peer_feedback.responses r \
         JOIN peer_feedback.invitations i ON i.id = r.invitation_id \
         WHERE i.cycle_id = $1 \
         UNION ALL \
         SELECT {RESPONSE_COLUMNS}, r.responder_email, r.responder_name \
         FROM peer_feedback.responses r \
         WHERE r.cycle_id = $1 AND r.invitation_id IS NULL \
         ORDER BY created_at"
    );

    let rows = sqlx::query(&query)
        .bind(cycle_id)
        .fetch_all(pool)
        .await
        .context("failed to load responses")?;

    let mut responses = Vec::with_capacity(rows.len());
    for row in rows {
        let stored = StoredResponse {
            closeness: row.get("closeness"),
            relationship: row.get("relationship"),
            skill_ratings: row.get("skill_ratings"),
            keep_doing: row.get("keep_doing"),
            improve: row.get("improve"),
            anything_else: row.get("anything_else"),
            anonymous_note: row.get("anonymous_note"),
            custom_answers: row.get("custom_answers"),
            responder_email: row.get("responder_email"),
            responder_name: row.get("responder_name"),
            created_at: row.get("created_at"),
        };
        responses.push(stored.normalize(&custom_questions));
    }

    info!(
        %cycle_id,
        responses = responses.len(),
        invitations = invitations_count,
        "loaded cycle inputs"
    );

    Ok(CycleInputs {
        cycle_id,
        mode: cycle.get("mode"),
        status: cycle.get("status"),
        concluded_at: cycle.get("concluded_at"),
        self_ratings,
        custom_questions,
        invitations_count: usize::try_from(invitations_count).unwrap_or_default(),
        responses,
    })
}

/// A response row as stored, before any field has been trusted.
#[derive(Debug, Clone)]
pub struct StoredResponse {
    pub closeness: Option<String>,
    pub relationship: Option<String>,
    pub skill_ratings: Value,
    pub keep_doing: String,
    pub improve: String,
    pub anything_else: Option<String>,
    pub anonymous_note: Option<String>,
    pub custom_answers: Value,
    pub responder_email: Option<String>,
    pub responder_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StoredResponse {
    /// Convert into the report shape. Fields that do not parse are dropped.
    pub fn normalize(self, questions: &[CustomQuestion]) -> RawResponse {
        let email = non_blank(self.responder_email);
        let name = non_blank(self.responder_name);
        let respondent = (email.is_some() || name.is_some())
            .then(|| RespondentIdentity { email, name });

        RawResponse {
            skill_ratings: parse_skill_ratings(&self.skill_ratings),
            open_ended: OpenEnded {
                keep_doing: self.keep_doing,
                improve: self.improve,
                anything_else: non_blank(self.anything_else),
            },
            custom_answers: parse_custom_answers(&self.custom_answers, questions),
            anonymous_note: non_blank(self.anonymous_note),
            relationship: parse_optional(self.relationship.as_deref(), "relationship"),
            closeness: parse_optional(self.closeness.as_deref(), "closeness"),
            respondent,
            submitted_at: self.created_at,
        }
    }
}

pub fn parse_skill_ratings(value: &Value) -> BTreeMap<SkillKey, SkillRating> {
    let Some(object) = value.as_object() else {
        if !value.is_null() {
            warn!("skill ratings are not a JSON object; ignoring");
        }
        return BTreeMap::new();
    };

    object
        .iter()
        .filter_map(|(key, raw)| {
            let rating = raw.as_str().and_then(|s| s.parse::<SkillRating>().ok());
            if rating.is_none() {
                debug!(skill = %key, "dropping unparseable skill rating");
            }
            rating.map(|r| (key.clone(), r))
        })
        .collect()
}

/// Self ratings keep only numeric levels; a self "can't say" has no gap.
pub fn parse_self_ratings(value: Option<&Value>) -> BTreeMap<SkillKey, RatingLevel> {
    value
        .map(parse_skill_ratings)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, rating)| rating.level().map(|level| (key, level)))
        .collect()
}

/// Stored answers are positional, one slot per question in question order.
/// Empty slots and non-string values are skipped.
pub fn parse_custom_answers(
    value: &Value,
    questions: &[CustomQuestion],
) -> BTreeMap<QuestionId, String> {
    let Some(answers) = value.as_array() else {
        return BTreeMap::new();
    };

    let mut ordered: Vec<&CustomQuestion> = questions.iter().collect();
    ordered.sort_by_key(|q| q.order);

    if answers.len() > ordered.len() {
        debug!(
            answers = answers.len(),
            questions = ordered.len(),
            "more custom answers than questions; extras ignored"
        );
    }

    ordered
        .into_iter()
        .zip(answers)
        .filter_map(|(question, answer)| {
            let text = answer.as_str()?.trim();
            (!text.is_empty()).then(|| (question.id, text.to_string()))
        })
        .collect()
}

fn parse_optional<T: std::str::FromStr>(value: Option<&str>, field: &str) -> Option<T> {
    let value = value?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            debug!(field, "dropping unrecognized value");
            None
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<Uuid> {
    let cycle_id = Uuid::parse_str("6b1f0c52-3a8e-4f0e-9d43-0f6a2f3c9b11")?;
    let question_id = Uuid::parse_str("a4c2e9d8-51b7-4c4b-8f0e-2d9b7c6e1a20")?;
    let concluded_at = Utc::now() - Duration::days(1);

    sqlx::query(
        r#"
        INSERT INTO peer_feedback.cycles (id, owner_email, mode, status, concluded_at)
        VALUES ($1, $2, 'anonymous', 'concluded', $3)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(cycle_id)
    .bind("jordan.kim@example.com")
    .bind(concluded_at)
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO peer_feedback.self_assessments (cycle_id, skill_ratings)
        VALUES ($1, $2)
        ON CONFLICT (cycle_id) DO NOTHING
        "#,
    )
    .bind(cycle_id)
    .bind(json!({
        "discovery": "average",
        "prioritization": "above_average",
        "execution": "top_20",
        "communication": "above_average",
        "stakeholder_management": "average",
        "technical_fluency": "below_average",
    }))
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO peer_feedback.custom_questions (id, cycle_id, question_text, question_order)
        VALUES ($1, $2, $3, 1)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(question_id)
    .bind(cycle_id)
    .bind("What is one thing I should start delegating?")
    .execute(pool)
    .await?;

    let peers = vec![
        (
            "5f3d1c7a-8e2b-4a61-9c0d-7b5e3f1a2c41",
            "priya.shah@example.com",
            "team",
            "very_close",
            json!({"discovery": "above_average", "prioritization": "top_20", "execution": "top_20",
                   "communication": "above_average", "stakeholder_management": "average",
                   "technical_fluency": "average"}),
            "Running tight discovery interviews before committing to scope.",
            "Share roadmap trade-offs earlier with design.",
            Some("Great quarter overall."),
            json!(["Sprint planning facilitation"]),
        ),
        (
            "0e9a4b2c-6d1f-4e83-a5b7-c2d4e6f8a0b3",
            "marco.silva@example.com",
            "cross_functional",
            "somewhat",
            json!({"discovery": "top_20", "prioritization": "above_average", "execution": "above_average",
                   "communication": "average", "stakeholder_management": "cant_say",
                   "technical_fluency": "above_average"}),
            "Clear written specs that engineering can pick up without meetings.",
            "Say no to late requests from sales more often.",
            None,
            json!([""]),
        ),
        (
            "b8c7d6e5-f4a3-4b21-8c9d-0e1f2a3b4c5d",
            "lena.fischer@example.com",
            "manager",
            "very_close",
            json!({"discovery": "cant_say", "prioritization": "average", "execution": "top_20",
                   "communication": "below_average", "stakeholder_management": "below_average",
                   "technical_fluency": "average"}),
            "Owning launches end to end and following up on metrics.",
            "Bring leadership into decisions before they are final.",
            Some("Happy to pair on stakeholder maps."),
            json!(["Weekly status updates"]),
        ),
    ];

    for (index, (invitation, email, relationship, closeness, ratings, keep, improve, extra, custom)) in
        peers.into_iter().enumerate()
    {
        let invitation_id = Uuid::parse_str(invitation)?;
        let submitted_at = concluded_at - Duration::days(5 - index as i64);

        sqlx::query(
            r#"
            INSERT INTO peer_feedback.invitations (id, cycle_id, email)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(invitation_id)
        .bind(cycle_id)
        .bind(email)
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO peer_feedback.responses
            (id, invitation_id, closeness, relationship, skill_ratings, keep_doing, improve,
             anything_else, custom_answers, source_key, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(invitation_id)
        .bind(closeness)
        .bind(relationship)
        .bind(ratings)
        .bind(keep)
        .bind(improve)
        .bind(extra)
        .bind(custom)
        .bind(format!("seed-{invitation}"))
        .bind(submitted_at)
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        INSERT INTO peer_feedback.invitations (id, cycle_id, email)
        VALUES ($1, $2, $3)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(Uuid::parse_str("c1d2e3f4-a5b6-4c7d-8e9f-0a1b2c3d4e5f")?)
    .bind(cycle_id)
    .bind("sam.okafor@example.com")
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO peer_feedback.responses
        (id, cycle_id, closeness, relationship, skill_ratings, keep_doing, improve,
         anonymous_note, custom_answers, responder_name, source_key, created_at)
        VALUES ($1, $2, 'not_much', 'peer_pm', $3, $4, $5, $6, $7, $8, 'seed-shared-1', $9)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(cycle_id)
    .bind(json!({"discovery": "above_average", "execution": "above_average", "unknown_skill": "top_20",
                 "communication": "excellent"}))
    .bind("Generous with context when onboarding new PMs.")
    .bind("Timebox research spikes; some ran for weeks.")
    .bind("Would love more 1:1 time.")
    .bind(json!(["Roadmap reviews"]))
    .bind("Taylor")
    .bind(concluded_at - Duration::hours(6))
    .execute(pool)
    .await?;

    Ok(cycle_id)
}

/// Import shared-link responses for a cycle from CSV. Rows whose
/// `source_key` was already imported are skipped.
pub async fn import_csv(
    pool: &PgPool,
    cycle_id: Uuid,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        responder_email: Option<String>,
        responder_name: Option<String>,
        relationship: String,
        closeness: String,
        skill_ratings: String,
        keep_doing: String,
        improve: String,
        anything_else: Option<String>,
        anonymous_note: Option<String>,
        custom_answers: Option<String>,
        submitted_at: Option<DateTime<Utc>>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid CSV row {}", line + 1))?;

        let skill_ratings: Value = serde_json::from_str(&row.skill_ratings)
            .with_context(|| format!("row {}: skill_ratings is not JSON", line + 1))?;
        let custom_answers: Value = match row.custom_answers.as_deref() {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw)
                .with_context(|| format!("row {}: custom_answers is not JSON", line + 1))?,
            _ => json!([]),
        };

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let result = sqlx::query(
            r#"
            INSERT INTO peer_feedback.responses
            (id, cycle_id, closeness, relationship, skill_ratings, keep_doing, improve,
             anything_else, anonymous_note, custom_answers, responder_email, responder_name,
             source_key, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(cycle_id)
        .bind(&row.closeness)
        .bind(&row.relationship)
        .bind(skill_ratings)
        .bind(&row.keep_doing)
        .bind(&row.improve)
        .bind(non_blank(row.anything_else))
        .bind(non_blank(row.anonymous_note))
        .bind(custom_answers)
        .bind(non_blank(row.responder_email))
        .bind(non_blank(row.responder_name))
        .bind(source_key)
        .bind(row.submitted_at.unwrap_or_else(Utc::now))
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}
