use std::time::Duration;

use serde_json::Value;

use crate::llm::{preview, ChatError, ChatTransport};
use crate::models::{ChatMessage, ChatRequest, Evaluation, MessageContent};

const SYSTEM_PROMPT: &str = "You are an expert project evaluator. You MUST respond with valid \
JSON only. Do not include any explanatory text outside the JSON response.";

const MAX_TOKENS: u32 = 1000;
const TEMPERATURE: f32 = 0.3;
/// Evaluation keeps the shared client's default timeout.
const REQUEST_TIMEOUT: Option<Duration> = None;
const FENCE_OPEN: &str = "```json";
const FENCE_CLOSE: &str = "```";
const EXCERPT_CHARS: usize = 200;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error("AI response is not valid JSON ({source}): {}", preview(.content, EXCERPT_CHARS))]
    InvalidJson {
        content: String,
        source: serde_json::Error,
    },
    #[error("AI response does not match the evaluation schema ({source}): {}", preview(.content, EXCERPT_CHARS))]
    SchemaMismatch {
        content: String,
        source: serde_json::Error,
    },
}

// ── Client ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct EvaluationClient {
    transport: ChatTransport,
}

impl EvaluationClient {
    pub fn new(transport: ChatTransport) -> Self {
        Self { transport }
    }

    pub async fn evaluate(&self, text: &str) -> Result<Evaluation, EvaluationError> {
        let request = evaluation_request(text);

        tracing::info!("requesting evaluation");
        let reply = self.transport.complete(&request, REQUEST_TIMEOUT).await?;
        tracing::debug!("evaluation reply: {}", reply);

        let evaluation = parse_evaluation(&reply)?;
        tracing::info!(
            innovation = evaluation.innovation_score,
            feasibility = evaluation.feasibility_score,
            market_potential = evaluation.market_potential_score,
            "evaluation parsed"
        );
        Ok(evaluation)
    }
}

fn evaluation_request(text: &str) -> ChatRequest {
    ChatRequest {
        messages: vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(MessageContent::Text(build_prompt(text))),
        ],
        max_tokens: MAX_TOKENS,
        temperature: TEMPERATURE,
    }
}

fn build_prompt(text: &str) -> String {
    format!(
        r#"Read the following project description and rate it from 0 to 10 in the areas of Innovation, Feasibility, and Market Potential. Justify each score briefly.

Project Description:
{text}

You MUST respond with ONLY a valid JSON object in exactly this format:
{{
    "innovation_score": 7,
    "feasibility_score": 8,
    "market_potential_score": 6,
    "innovation_justification": "Brief explanation for innovation score",
    "feasibility_justification": "Brief explanation for feasibility score",
    "market_potential_justification": "Brief explanation for market potential score",
    "overall_feedback": "General feedback about the project"
}}

Do not include any text before or after the JSON. Respond with valid JSON only."#
    )
}

// ── Reply normalisation ──────────────────────────────────────────────────────

/// Trim, and drop a ```` ```json ```` fence if the reply opens with one.
/// Nothing else is rewritten.
pub fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    match trimmed.strip_prefix(FENCE_OPEN) {
        Some(inner) => inner
            .trim_end()
            .strip_suffix(FENCE_CLOSE)
            .unwrap_or(inner)
            .trim(),
        None => trimmed,
    }
}

/// Syntax errors and schema mismatches are kept apart so the caller can
/// tell a chatty model from one that picked the wrong field names.
pub fn parse_evaluation(reply: &str) -> Result<Evaluation, EvaluationError> {
    let content = strip_code_fence(reply);

    let value: Value = serde_json::from_str(content).map_err(|source| {
        tracing::error!("content that failed to parse: {:?}", content);
        EvaluationError::InvalidJson {
            content: content.to_string(),
            source,
        }
    })?;

    serde_json::from_value(value).map_err(|source| EvaluationError::SchemaMismatch {
        content: content.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::test_support::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID: &str = r#"{
        "innovation_score": 7,
        "feasibility_score": 8,
        "market_potential_score": 6,
        "innovation_justification": "Novel use of drones",
        "feasibility_justification": "Proven hardware",
        "market_potential_justification": "Niche but growing",
        "overall_feedback": "Promising"
    }"#;

    fn expected() -> Evaluation {
        Evaluation {
            innovation_score: 7,
            feasibility_score: 8,
            market_potential_score: 6,
            innovation_justification: "Novel use of drones".into(),
            feasibility_justification: "Proven hardware".into(),
            market_potential_justification: "Niche but growing".into(),
            overall_feedback: "Promising".into(),
        }
    }

    #[test]
    fn evaluation_keeps_client_default_timeout() {
        assert_eq!(REQUEST_TIMEOUT, None);

        let request = evaluation_request("Vertical farms");
        assert_eq!(request.max_tokens, 1000);
        assert_eq!(request.temperature, 0.3);
        let body = serde_json::to_value(&request).unwrap();
        assert!(body["messages"][1]["content"]
            .as_str()
            .unwrap()
            .contains("Project Description:\nVertical farms"));
    }

    #[test]
    fn parses_bare_object_with_surrounding_whitespace() {
        let reply = format!("\n  {VALID}  \n");
        assert_eq!(parse_evaluation(&reply).unwrap(), expected());
    }

    #[test]
    fn strips_json_code_fence() {
        let reply = format!("```json\n{VALID}\n```");
        assert_eq!(parse_evaluation(&reply).unwrap(), expected());
    }

    #[test]
    fn fence_without_closing_marker_still_parses() {
        let reply = format!("```json\n{VALID}");
        assert_eq!(parse_evaluation(&reply).unwrap(), expected());
    }

    #[test]
    fn fence_only_stripped_at_the_start() {
        assert_eq!(strip_code_fence("  plain  "), "plain");
        assert_eq!(
            strip_code_fence("Here you go:\n```json\n{}\n```"),
            "Here you go:\n```json\n{}\n```"
        );
    }

    #[test]
    fn prose_reply_is_a_syntax_error() {
        let err = parse_evaluation("Sure! Here is my evaluation: great project.").unwrap_err();
        match err {
            EvaluationError::InvalidJson { content, .. } => {
                assert!(content.starts_with("Sure!"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_field_is_a_schema_mismatch() {
        let mut value: Value = serde_json::from_str(VALID).unwrap();
        value.as_object_mut().unwrap().remove("feasibility_score");

        let err = parse_evaluation(&value.to_string()).unwrap_err();
        match err {
            EvaluationError::SchemaMismatch { source, .. } => {
                assert!(source.to_string().contains("feasibility_score"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn mistyped_and_extra_fields_are_schema_mismatches() {
        let mut mistyped: Value = serde_json::from_str(VALID).unwrap();
        mistyped["innovation_score"] = json!("seven");
        let mut extra: Value = serde_json::from_str(VALID).unwrap();
        extra["risk_score"] = json!(3);

        for value in [mistyped, extra, json!([1, 2, 3])] {
            assert!(matches!(
                parse_evaluation(&value.to_string()),
                Err(EvaluationError::SchemaMismatch { .. })
            ));
        }
    }

    #[test]
    fn error_message_excerpt_is_bounded() {
        let reply = "x".repeat(1000);
        let message = parse_evaluation(&reply).unwrap_err().to_string();
        assert!(message.len() < 400);
    }

    #[tokio::test]
    async fn sends_text_in_prompt_and_parses_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .and(body_string_contains("Project Description:\\nSolar-powered kiosks"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion(&format!("```json\n{VALID}\n```"))),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = EvaluationClient::new(ChatTransport::new(&config_for(&server.uri())).unwrap());
        let evaluation = client.evaluate("Solar-powered kiosks").await.unwrap();
        assert_eq!(evaluation, expected());
    }

    #[tokio::test]
    async fn upstream_rejection_is_not_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .mount(&server)
            .await;

        let client = EvaluationClient::new(ChatTransport::new(&config_for(&server.uri())).unwrap());
        let err = client.evaluate("anything").await.unwrap_err();
        match err {
            EvaluationError::Chat(ChatError::Upstream { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, "Unauthorized");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
