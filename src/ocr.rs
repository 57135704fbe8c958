use std::path::Path;
use std::time::Duration;

use crate::encode::{encode_file, EncodedImage};
use crate::llm::{ChatError, ChatTransport};
use crate::models::{ChatMessage, ChatRequest, ContentPart, ImageUrl, MessageContent};

const SYSTEM_PROMPT: &str = "You are an expert OCR system. Extract all visible text from the \
provided image accurately. Return only the extracted text without any additional commentary \
or formatting.";

const USER_PROMPT: &str = "Please extract all text from this image. Return only the text \
content, preserving the original structure as much as possible.";

const MAX_TOKENS: u32 = 2000;
const TEMPERATURE: f32 = 0.1;
/// Per-call override of the shared client's default timeout.
const REQUEST_TIMEOUT: Option<Duration> = Some(Duration::from_secs(60));

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("failed to read staged image: {0}")]
    Read(#[from] std::io::Error),
    #[error(transparent)]
    Chat(#[from] ChatError),
}

/// Text extraction through a vision-capable chat deployment.
#[derive(Clone)]
pub struct ExtractionClient {
    transport: ChatTransport,
}

impl ExtractionClient {
    pub fn new(transport: ChatTransport) -> Self {
        Self { transport }
    }

    /// Returns the model's answer trimmed; emptiness is the caller's concern.
    pub async fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let image = encode_file(path).await?;
        tracing::info!(format = %image.format, "requesting text extraction");

        let request = extraction_request(&image);
        let content = self.transport.complete(&request, REQUEST_TIMEOUT).await?;
        let text = content.trim().to_string();
        tracing::info!(chars = text.chars().count(), "text extracted");
        Ok(text)
    }
}

fn extraction_request(image: &EncodedImage) -> ChatRequest {
    ChatRequest {
        messages: vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(MessageContent::Parts(vec![
                ContentPart::Text {
                    text: USER_PROMPT.to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image.data_url(),
                        detail: "high",
                    },
                },
            ])),
        ],
        max_tokens: MAX_TOKENS,
        temperature: TEMPERATURE,
    }
}
