use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::imageops::FilterType;
use image::{ImageFormat, load_from_memory};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::io::Cursor;
use std::time::Duration;

use crate::domain::document::Page;
use crate::error::EpistolaryError;
use crate::extract::TextExtractor;
use crate::extract::raster::Rasterizer;

const SYSTEM_PROMPT: &str = "You are a powerful handwriting parser robot. You respond ONLY with \
the transcribed text, NEVER with any other information, questions, or discussion.";
const USER_PROMPT: &str = "What is the (formatted) text content of this hand-written message?";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiOptions {
    /// Falls back to `OPENAI_API_KEY`.
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    /// Pages wider than this are scaled down before upload.
    pub max_width: u32,
}

impl Default for OpenAiOptions {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            endpoint: "https://api.openai.com/v1".to_string(),
            max_width: 1024,
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    role: String,
    content: Option<String>,
}

/// Transcribes handwriting with a vision model behind a chat-completions API.
pub struct OpenAiTextExtractor {
    rasterizer: Rasterizer,
    client: reqwest::blocking::Client,
    api_key: String,
    options: OpenAiOptions,
}

impl OpenAiTextExtractor {
    pub fn new(rasterizer: Rasterizer, options: OpenAiOptions) -> Result<Self> {
        let api_key = match &options.api_key {
            Some(k) if !k.is_empty() => k.clone(),
            _ => std::env::var("OPENAI_API_KEY").map_err(|_| {
                EpistolaryError::Config("openai.api_key is not set and OPENAI_API_KEY is empty".into())
            })?,
        };
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            rasterizer,
            client,
            api_key,
            options,
        })
    }

    fn complete(&self, body: &Value) -> Result<String> {
        let url = format!("{}/chat/completions", self.options.endpoint.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .with_context(|| format!("POST {url}"))?
            .error_for_status()?;
        let text = resp.text()?;
        parse_completion(&text)
    }
}

impl TextExtractor for OpenAiTextExtractor {
    fn extract_text_from_page(&self, page: &Page<'_>) -> Result<String> {
        let png = self.rasterizer.render_png(page)?;
        let png = shrink_png(&png, self.options.max_width)?;
        debug!("sending page {} ({} bytes) to {}", page.number, png.len(), self.options.model);
        let body = completion_request(&self.options.model, &png);
        self.complete(&body)
    }
}

/// Scale a PNG down to `max_width`, keeping the aspect ratio.
pub fn shrink_png(png: &[u8], max_width: u32) -> Result<Vec<u8>> {
    let img = load_from_memory(png).context("decoding rendered page")?;
    if img.width() <= max_width || max_width == 0 {
        return Ok(png.to_vec());
    }
    let height = (img.height() as u64 * max_width as u64 / img.width() as u64).max(1) as u32;
    let small = img.resize_exact(max_width, height, FilterType::Triangle);

    let mut out = Vec::new();
    small.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(out)
}

fn completion_request(model: &str, png: &[u8]) -> Value {
    let data_url = format!("data:image/png;base64,{}", STANDARD.encode(png));
    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": USER_PROMPT },
                    { "type": "image_url", "image_url": { "url": data_url } }
                ]
            }
        ]
    })
}

/// Text of the first choice, which must come from the assistant.
pub fn parse_completion(body: &str) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_str(body).context("parsing completion")?;
    match parsed.choices.into_iter().next() {
        Some(choice) if choice.message.role == "assistant" => {
            Ok(choice.message.content.unwrap_or_default())
        }
        _ => Err(EpistolaryError::NoAssistantResponse.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, RgbImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png).unwrap();
        out
    }

    #[test]
    fn assistant_content_is_returned() {
        let body = r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"Sounds good!"}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), "Sounds good!");
    }

    #[test]
    fn null_content_is_empty() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), "");
    }

    #[test]
    fn missing_or_foreign_choices_fail() {
        for body in [
            r#"{"choices":[]}"#,
            r#"{}"#,
            r#"{"choices":[{"message":{"role":"tool","content":"x"}}]}"#,
        ] {
            let err = parse_completion(body).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<EpistolaryError>(),
                Some(EpistolaryError::NoAssistantResponse)
            ));
        }
    }

    #[test]
    fn wide_pages_are_scaled_down() {
        let small = shrink_png(&png(2000, 1000), 500).unwrap();
        let img = load_from_memory(&small).unwrap();
        assert_eq!(img.dimensions(), (500, 250));

        let narrow = png(300, 400);
        assert_eq!(shrink_png(&narrow, 500).unwrap(), narrow);
    }

    #[test]
    fn request_carries_prompts_and_image() {
        let req = completion_request("gpt-4o-mini", b"abc");
        assert_eq!(req["model"], "gpt-4o-mini");
        assert_eq!(req["messages"][0]["content"], SYSTEM_PROMPT);
        assert_eq!(req["messages"][1]["content"][0]["text"], USER_PROMPT);
        assert_eq!(
            req["messages"][1]["content"][1]["image_url"]["url"],
            "data:image/png;base64,YWJj"
        );
    }
}
