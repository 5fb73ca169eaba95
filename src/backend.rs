use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::models::SubmissionSummary;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend answered {status} for {what}")]
    Status {
        status: reqwest::StatusCode,
        what: &'static str,
    },
    #[error("invalid backend url: {0}")]
    Url(String),
}

/// Where authoritative vote aggregates and voter names come from.
pub trait VoteSource: Send + Sync + 'static {
    fn fetch_summaries(
        &self,
        ids: &[String],
    ) -> impl Future<Output = Result<Vec<SubmissionSummary>, SourceError>> + Send;

    fn fetch_voter_name(
        &self,
        voter_id: &str,
    ) -> impl Future<Output = Result<Option<String>, SourceError>> + Send;
}

// PostgREST-style row API of the managed backend
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct ProfileRow {
    username: Option<String>,
}

impl RestClient {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn table_url(&self, table: &str, params: &[(&str, String)]) -> Result<reqwest::Url, SourceError> {
        let raw = format!("{}/rest/v1/{}", self.base_url, table);
        reqwest::Url::parse_with_params(&raw, params).map_err(|e| SourceError::Url(e.to_string()))
    }

    async fn get_rows<T: for<'de> Deserialize<'de>>(
        &self,
        url: reqwest::Url,
        what: &'static str,
    ) -> Result<Vec<T>, SourceError> {
        let res = self
            .client
            .get(url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(SourceError::Status {
                status: res.status(),
                what,
            });
        }
        Ok(res.json::<Vec<T>>().await?)
    }
}

impl VoteSource for RestClient {
    async fn fetch_summaries(&self, ids: &[String]) -> Result<Vec<SubmissionSummary>, SourceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.table_url(
            "submissions",
            &[
                ("select", "id,total_votes,votes_for,votes_against".to_string()),
                ("id", format!("in.({})", ids.join(","))),
            ],
        )?;
        self.get_rows(url, "submission summaries").await
    }

    async fn fetch_voter_name(&self, voter_id: &str) -> Result<Option<String>, SourceError> {
        let url = self.table_url(
            "profiles",
            &[
                ("select", "username".to_string()),
                ("id", format!("eq.{voter_id}")),
            ],
        )?;
        let rows: Vec<ProfileRow> = self.get_rows(url, "voter profile").await?;
        Ok(rows.into_iter().next().and_then(|p| p.username))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_filtered_table_urls() {
        let client = RestClient::new(reqwest::Client::new(), "https://db.plyaz.test/", "key");
        let url = client
            .table_url("submissions", &[("id", "in.(S1,S2)".to_string())])
            .unwrap();

        assert_eq!(url.path(), "/rest/v1/submissions");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs, vec![("id".to_string(), "in.(S1,S2)".to_string())]);
    }

    #[test]
    fn rejects_bad_base_url() {
        let client = RestClient::new(reqwest::Client::new(), "not a url", "key");
        assert!(matches!(
            client.table_url("profiles", &[]),
            Err(SourceError::Url(_))
        ));
    }

    #[tokio::test]
    async fn empty_id_set_skips_the_round_trip() {
        let client = RestClient::new(reqwest::Client::new(), "http://127.0.0.1:9", "key");
        assert!(client.fetch_summaries(&[]).await.unwrap().is_empty());
    }
}
