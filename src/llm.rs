use std::time::Duration;

use url::Url;

use crate::config::AzureOpenAiConfig;
use crate::models::{ChatCompletion, ChatRequest};

// ── Constants ────────────────────────────────────────────────────────────────

const USER_AGENT: &str = "project-evaluator-api/1.0";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Total timeout for calls that do not set their own.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const LOG_PREVIEW_CHARS: usize = 500;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("{0}")]
    Request(String),
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("unexpected completion envelope: {0}")]
    Envelope(String),
}

// ── Transport ────────────────────────────────────────────────────────────────

/// One HTTP client and one target deployment, shared by both pipeline stages.
#[derive(Clone)]
pub struct ChatTransport {
    client: reqwest::Client,
    url: Url,
    api_key: String,
}

impl ChatTransport {
    pub fn new(config: &AzureOpenAiConfig) -> Result<Self, ChatError> {
        let url = config
            .completions_url()
            .map_err(|e| ChatError::Request(format!("InvalidUrl: {}", e)))?;

        let client = reqwest::ClientBuilder::new()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ChatError::Request(e.to_string()))?;

        Ok(Self {
            client,
            url,
            api_key: config.api_key.clone(),
        })
    }

    /// POST one completion request and return the first choice's content.
    ///
    /// A non-2xx status is reported with the raw body and never parsed as
    /// an envelope.
    pub async fn complete(
        &self,
        request: &ChatRequest,
        timeout: Option<Duration>,
    ) -> Result<String, ChatError> {
        let mut builder = self
            .client
            .post(self.url.clone())
            .header("api-key", &self.api_key)
            .json(request);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        let body = response.text().await.map_err(classify)?;

        tracing::info!(status = status.as_u16(), "completion response");
        tracing::debug!("completion body: {}", preview(&body, LOG_PREVIEW_CHARS));

        if !status.is_success() {
            tracing::error!(status = status.as_u16(), "upstream error: {}", body);
            return Err(ChatError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        parse_envelope(&body)
    }
}

fn classify(e: reqwest::Error) -> ChatError {
    if e.is_timeout() {
        ChatError::Request(format!("TimeoutError: {}", e))
    } else if e.is_connect() {
        ChatError::Request(format!("ConnectError: {}", e))
    } else {
        ChatError::Request(format!("RequestError: {}", e))
    }
}

/// Pull `choices[0].message.content` out of a completion body.
pub fn parse_envelope(body: &str) -> Result<String, ChatError> {
    let completion: ChatCompletion =
        serde_json::from_str(body).map_err(|e| ChatError::Envelope(e.to_string()))?;
    completion
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| ChatError::Envelope("no choices in response".to_string()))
}

/// Truncate on a char boundary for log lines and error excerpts.
pub fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::models::ChatMessage;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ChatRequest {
        ChatRequest {
            messages: vec![ChatMessage::system("hi")],
            max_tokens: 10,
            temperature: 0.0,
        }
    }

    #[test]
    fn envelope_yields_first_choice_content() {
        let body = completion("first").to_string();
        assert_eq!(parse_envelope(&body).unwrap(), "first");
    }

    #[test]
    fn envelope_shape_errors() {
        for body in [
            "not json",
            r#"{"choices": []}"#,
            r#"{"choices": [{"message": {}}]}"#,
            r#"{"choices": [{"message": {"content": null}}]}"#,
            r#"{"result": "ok"}"#,
        ] {
            assert!(
                matches!(parse_envelope(body), Err(ChatError::Envelope(_))),
                "{body}"
            );
        }
    }

    #[test]
    fn preview_respects_char_boundaries() {
        assert_eq!(preview("héllo", 2), "hé");
        assert_eq!(preview("abc", 10), "abc");
    }

    #[tokio::test]
    async fn sends_key_header_and_api_version() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .and(query_param("api-version", API_VERSION))
            .and(header("api-key", API_KEY))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
            .expect(1)
            .mount(&server)
            .await;

        let transport = ChatTransport::new(&config_for(&server.uri())).unwrap();
        let content = transport.complete(&request(), None).await.unwrap();
        assert_eq!(content, "ok");
    }

    #[tokio::test]
    async fn non_success_status_keeps_raw_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Access denied"))
            .mount(&server)
            .await;

        let transport = ChatTransport::new(&config_for(&server.uri())).unwrap();
        let err = transport.complete(&request(), None).await.unwrap_err();
        match err {
            ChatError::Upstream { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "Access denied");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn per_call_timeout_is_reported_as_request_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion("late"))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let transport = ChatTransport::new(&config_for(&server.uri())).unwrap();
        let err = transport
            .complete(&request(), Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Request(msg) if msg.starts_with("TimeoutError")));
    }
}
