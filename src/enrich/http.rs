use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{EnrichError, Enricher};
use crate::vocab::Word;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StoryRequest<'a> {
    word: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    part_of_speech: Option<&'a str>,
    meanings: &'a [String],
}

#[derive(Debug, Deserialize)]
struct StoryResponse {
    story: Option<String>,
}

/// Enricher backed by a story-generation HTTP endpoint
pub struct HttpEnricher {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl HttpEnricher {
    pub fn new(url: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self, EnrichError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            api_key: api_key.map(String::from),
        })
    }
}

#[async_trait]
impl Enricher for HttpEnricher {
    async fn story_for(&self, word: &Word) -> Result<String, EnrichError> {
        let body = StoryRequest {
            word: &word.key,
            part_of_speech: word.details.part_of_speech.as_deref(),
            meanings: &word.details.meanings,
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EnrichError::Generation(format!("{} - {}", status.as_u16(), text)));
        }

        let parsed: StoryResponse = response.json().await?;
        match parsed.story {
            Some(story) if !story.trim().is_empty() => Ok(story),
            _ => Err(EnrichError::Generation(format!("empty story for '{}'", word.key))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let mut word = Word::new("abate");
        word.details.meanings = vec!["lessen".to_string()];
        let body = StoryRequest {
            word: &word.key,
            part_of_speech: None,
            meanings: &word.details.meanings,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"word": "abate", "meanings": ["lessen"]})
        );
    }
}
