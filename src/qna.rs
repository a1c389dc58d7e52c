//! Client for the hosted QnA knowledge base.

use async_trait::async_trait;
use log::debug;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::QnaConfig;
use crate::error::{BotError, Result};
use crate::types::ScoredAnswer;

/// The service reports confidence on a 0-100 scale.
const SERVICE_SCORE_SCALE: f64 = 100.0;

/// Id the service gives its built-in "No good match found in KB." answer.
const NO_MATCH_ANSWER_ID: i64 = -1;

/// Source of ranked answers for a user question.
#[async_trait]
pub trait AnswerSource: Send + Sync {
    /// Returns candidate answers ordered by descending score. An empty list means no match.
    async fn get_answers(&self, question: &str) -> Result<Vec<ScoredAnswer>>;
}

#[derive(Debug, Serialize)]
struct GenerateAnswerRequest<'a> {
    question: &'a str,
    top: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateAnswerResponse {
    #[serde(default)]
    answers: Vec<QnaAnswer>,
}

#[derive(Debug, Deserialize)]
struct QnaAnswer {
    #[serde(default)]
    id: i64,
    answer: String,
    score: f64,
    #[serde(default)]
    questions: Vec<String>,
}

pub struct QnaMakerClient {
    client: reqwest::Client,
    generate_answer_url: Url,
    endpoint_key: String,
    top: u32,
    score_threshold: f64,
}

impl QnaMakerClient {
    /// Creates a client for one knowledge base. Timeouts come from `client`.
    pub fn new(client: reqwest::Client, config: &QnaConfig) -> Result<Self> {
        let generate_answer_url =
            generate_answer_url(&config.endpoint_host, &config.knowledge_base_id)?;
        debug!("QnA generateAnswer URL: {}", generate_answer_url);

        Ok(Self {
            client,
            generate_answer_url,
            endpoint_key: config.endpoint_key.clone(),
            top: config.top,
            score_threshold: config.score_threshold,
        })
    }
}

#[async_trait]
impl AnswerSource for QnaMakerClient {
    async fn get_answers(&self, question: &str) -> Result<Vec<ScoredAnswer>> {
        debug!("Querying knowledge base (top {}): {}", self.top, question);

        let request = GenerateAnswerRequest {
            question,
            top: self.top,
        };

        let response = self
            .client
            .post(self.generate_answer_url.clone())
            .header(AUTHORIZATION, format!("EndpointKey {}", self.endpoint_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .text()
                .await
                .unwrap_or_else(|e| format!("Failed to read error response: {e}"));
            return Err(BotError::QnaApi { status, message });
        }

        let api_response: GenerateAnswerResponse = response.json().await?;
        let answers = rank_answers(api_response.answers, self.score_threshold);

        debug!(
            "Knowledge base returned {} answers above threshold {}",
            answers.len(),
            self.score_threshold
        );
        Ok(answers)
    }
}

fn generate_answer_url(host: &Url, knowledge_base_id: &str) -> Result<Url> {
    let mut base = host.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base.join(&format!("knowledgebases/{knowledge_base_id}/generateAnswer"))?)
}

/// Normalizes scores, drops the no-match placeholder and answers under `threshold`,
/// and orders the rest best first.
fn rank_answers(answers: Vec<QnaAnswer>, threshold: f64) -> Vec<ScoredAnswer> {
    let mut ranked: Vec<ScoredAnswer> = answers
        .into_iter()
        .filter(|a| a.id != NO_MATCH_ANSWER_ID)
        .map(|a| ScoredAnswer {
            answer: a.answer,
            score: a.score / SERVICE_SCORE_SCALE,
            questions: a.questions,
        })
        .filter(|a| a.score >= threshold)
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
}
