use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::models::{ProgressUpsert, RemoteProgress, RemoteWord, WordIdentity, WordStory, WordUpsert};
use super::{RemoteError, RemoteStore, Result};

const WORDS_TABLE: &str = "words";
const PROGRESS_TABLE: &str = "user_word_progress";
/// Read-only view joining progress rows with their word key
const PROGRESS_VIEW: &str = "user_word_progress_with_word";

/// PostgREST-style HTTP client for the remote store
pub struct RestClient {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RemoteError::InvalidResponse(e.to_string())
        } else {
            RemoteError::Network(e.to_string())
        }
    }
}

impl RestClient {
    /// Create a new client. `base_url` is the project URL without the `/rest/v1` suffix.
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(RemoteError::InvalidResponse(
                "URL must start with http:// or https://".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.to_string(),
            timeout,
        })
    }

    fn url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self.authed(request).send().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout(self.timeout)
            } else {
                RemoteError::from(e)
            }
        })?;

        match response.status() {
            status if status.is_success() => Ok(response),
            status => Err(RemoteError::from_status(
                status.as_u16(),
                response.text().await.unwrap_or_default(),
            )),
        }
    }

    async fn get_rows<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Vec<T>> {
        let response = self.send(request).await?;
        Ok(response.json::<Vec<T>>().await?)
    }
}

/// Build a PostgREST `in.(...)` filter with each value quoted
fn in_filter(keys: &[String]) -> String {
    let quoted: Vec<String> = keys
        .iter()
        .map(|k| format!("\"{}\"", k.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

#[async_trait]
impl RemoteStore for RestClient {
    async fn list_words(&self, offset: usize, limit: usize) -> Result<Vec<RemoteWord>> {
        let request = self.client.get(self.url(WORDS_TABLE)).query(&[
            ("select", "*".to_string()),
            ("order", "id.asc".to_string()),
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
        ]);
        self.get_rows(request).await
    }

    async fn list_progress(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RemoteProgress>> {
        let request = self.client.get(self.url(PROGRESS_VIEW)).query(&[
            ("select", "*".to_string()),
            ("user_id", format!("eq.{}", user_id)),
            ("order", "word_id.asc".to_string()),
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
        ]);
        self.get_rows(request).await
    }

    async fn upsert_word(&self, word: &WordUpsert) -> Result<RemoteWord> {
        let request = self
            .client
            .post(self.url(WORDS_TABLE))
            .query(&[("on_conflict", "word")])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&[word]);
        let mut rows: Vec<RemoteWord> = self.get_rows(request).await?;
        rows.pop()
            .ok_or_else(|| RemoteError::InvalidResponse("upsert returned no row".to_string()))
    }

    async fn delete_word(&self, id: i64) -> Result<()> {
        let request = self
            .client
            .delete(self.url(WORDS_TABLE))
            .query(&[("id", format!("eq.{}", id))]);
        self.send(request).await?;
        Ok(())
    }

    async fn upsert_progress(&self, progress: &ProgressUpsert) -> Result<()> {
        self.upsert_progress_batch(std::slice::from_ref(progress)).await
    }

    async fn upsert_progress_batch(&self, rows: &[ProgressUpsert]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let request = self
            .client
            .post(self.url(PROGRESS_TABLE))
            .query(&[("on_conflict", "user_id,word_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(rows);
        self.send(request).await?;
        Ok(())
    }

    async fn delete_progress(&self, user_id: &str, word_id: i64) -> Result<()> {
        let request = self.client.delete(self.url(PROGRESS_TABLE)).query(&[
            ("user_id", format!("eq.{}", user_id)),
            ("word_id", format!("eq.{}", word_id)),
        ]);
        match self.send(request).await {
            Ok(_) => Ok(()),
            // Already gone is what we wanted
            Err(RemoteError::Rejected { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn fetch_stories(&self, keys: &[String]) -> Result<Vec<WordStory>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let request = self.client.get(self.url(WORDS_TABLE)).query(&[
            ("select", "word,story".to_string()),
            ("word", in_filter(keys)),
        ]);
        self.get_rows(request).await
    }

    async fn resolve_word_ids(&self, keys: &[String]) -> Result<HashMap<String, i64>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let request = self.client.get(self.url(WORDS_TABLE)).query(&[
            ("select", "id,word".to_string()),
            ("word", in_filter(keys)),
        ]);
        let rows: Vec<WordIdentity> = self.get_rows(request).await?;
        Ok(rows.into_iter().map(|r| (r.word, r.id)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_url() {
        assert!(RestClient::new("ftp://example.com", "key", Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_url_trims_trailing_slash() {
        let client = RestClient::new("https://example.com/", "key", Duration::from_secs(5)).unwrap();
        assert_eq!(client.url("words"), "https://example.com/rest/v1/words");
    }

    #[test]
    fn test_in_filter_quotes_values() {
        let keys = vec!["abate".to_string(), "say \"hi\"".to_string()];
        assert_eq!(in_filter(&keys), r#"in.("abate","say \"hi\"")"#);
    }
}
