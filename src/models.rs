use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    For,
    Against,
}

// Vote log row as stored by the backend
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VoteRow {
    pub id: String,
    pub submission_id: String,
    pub voter_id: String,
    pub vote_type: VoteType,
    #[serde(default)]
    pub confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
}

// Denormalized counters on the submission record
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SubmissionSummary {
    pub id: String,
    #[serde(default)]
    pub total_votes: u64,
    #[serde(default)]
    pub votes_for: u64,
    #[serde(default)]
    pub votes_against: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestVote {
    pub id: String,
    pub vote_type: VoteType,
    pub confidence: Option<f64>,
    pub voter_username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteUpdate {
    pub submission_id: String,
    pub total_votes: u64,
    pub votes_for: u64,
    pub votes_against: u64,
    pub approval_percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_vote: Option<LatestVote>,
}

impl VoteUpdate {
    pub fn from_summary(summary: &SubmissionSummary) -> Self {
        Self {
            submission_id: summary.id.clone(),
            total_votes: summary.total_votes,
            votes_for: summary.votes_for,
            votes_against: summary.votes_against,
            approval_percentage: approval_percentage(summary.votes_for, summary.total_votes),
            latest_vote: None,
        }
    }
}

/// Share of "for" votes as a percentage with one decimal place.
pub fn approval_percentage(votes_for: u64, total_votes: u64) -> f64 {
    if total_votes == 0 {
        return 0.0;
    }
    (votes_for as f64 / total_votes as f64 * 1000.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_has_one_decimal() {
        assert_eq!(approval_percentage(7, 10), 70.0);
        assert_eq!(approval_percentage(1, 3), 33.3);
        assert_eq!(approval_percentage(2, 3), 66.7);
        assert_eq!(approval_percentage(5, 5), 100.0);
    }

    #[test]
    fn no_votes_means_zero() {
        assert_eq!(approval_percentage(0, 0), 0.0);
        assert_eq!(approval_percentage(3, 0), 0.0);
    }

    #[test]
    fn summary_defaults_missing_counters() {
        let summary: SubmissionSummary = serde_json::from_str(r#"{"id":"S1"}"#).unwrap();
        let update = VoteUpdate::from_summary(&summary);
        assert_eq!(update.total_votes, 0);
        assert_eq!(update.approval_percentage, 0.0);
    }

    #[test]
    fn vote_row_parses_backend_shape() {
        let row: VoteRow = serde_json::from_value(serde_json::json!({
            "id": "v1",
            "submission_id": "S1",
            "voter_id": "u1",
            "vote_type": "against",
            "confidence": 0.8,
            "created_at": "2026-10-19T12:00:00+00:00"
        }))
        .unwrap();
        assert_eq!(row.vote_type, VoteType::Against);
        assert_eq!(row.confidence, Some(0.8));
    }
}
