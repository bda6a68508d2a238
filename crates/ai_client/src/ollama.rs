use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::{InlineImage, TextGenerator};

/// Configuration for talking to a local Ollama server.
///
/// Only local hosts are accepted so scan data never leaves the machine
/// through this backend.
#[derive(Debug, Clone)]
pub struct OllamaClientConfig {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl OllamaClientConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Minimal Ollama chat client (blocking HTTP).
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: Client,
    base_url: Url,
    model: String,
}

const SYSTEM_PROMPT: &str = "You are a careful medical AI assistant. You explain automated MRI \
classification results in plain language and always remind the reader that results need \
professional verification.";

impl OllamaClient {
    pub fn new(config: OllamaClientConfig) -> Result<Self> {
        let base_url = validate_local_base_url(&config.base_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url,
            model: config.model,
        })
    }

    /// Generic helper for a single-turn chat call.
    pub fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        image: Option<&InlineImage>,
    ) -> Result<String> {
        let endpoint = self
            .base_url
            .join("api/chat")
            .context("Failed to build Ollama /api/chat URL")?;

        let request = self.build_request(system_prompt, user_prompt, image);

        let response: OllamaChatResponse = self
            .http
            .post(endpoint.clone())
            .json(&request)
            .send()
            .with_context(|| format!("POST {endpoint} failed"))?
            .error_for_status()
            .with_context(|| format!("POST {endpoint} returned non-success status"))?
            .json()
            .with_context(|| format!("Failed to parse JSON response from {endpoint}"))?;

        let content = response
            .message
            .map(|m| m.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| anyhow!("Ollama response had no message content"))?;

        Ok(content.trim().to_string())
    }

    fn build_request(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        image: Option<&InlineImage>,
    ) -> OllamaChatRequest {
        OllamaChatRequest {
            model: self.model.clone(),
            stream: false,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                    images: None,
                },
                Message {
                    role: "user".to_string(),
                    content: user_prompt.to_string(),
                    images: image.map(|i| vec![i.to_base64()]),
                },
            ],
            options: Some(OllamaOptions {
                temperature: Some(0.2),
            }),
        }
    }
}

impl TextGenerator for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    fn generate(&self, prompt: &str, image: Option<&InlineImage>) -> Result<String> {
        self.chat(SYSTEM_PROMPT, prompt, image)
    }
}

fn validate_local_base_url(base_url: &str) -> Result<Url> {
    let url =
        Url::parse(base_url).with_context(|| format!("Invalid OLLAMA_BASE_URL: {base_url}"))?;

    match url.scheme() {
        "http" => {}
        other => {
            return Err(anyhow!(
                "Unsupported scheme '{other}' for OLLAMA_BASE_URL (use http://localhost:11434)"
            ))
        }
    }

    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("OLLAMA_BASE_URL is missing a host"))?;

    let is_local = host.eq_ignore_ascii_case("localhost")
        || host == "127.0.0.1"
        || host == "::1"
        || host == "[::1]";

    if !is_local {
        return Err(anyhow!(
            "Refusing non-local OLLAMA_BASE_URL host '{host}'. Only a local Ollama is supported (use http://localhost:11434)."
        ));
    }

    Ok(url)
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    images: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: Option<Message>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> OllamaClientConfig {
        OllamaClientConfig {
            base_url: base_url.to_string(),
            model: "llava".to_string(),
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_rejects_remote_hosts() {
        assert!(OllamaClient::new(config("http://10.0.0.5:11434")).is_err());
        assert!(OllamaClient::new(config("https://localhost:11434")).is_err());
        assert!(OllamaClient::new(config("http://localhost:11434")).is_ok());
        assert!(OllamaClient::new(config("http://127.0.0.1:11434")).is_ok());
    }

    #[test]
    fn test_image_attached_to_user_message_only() {
        let client = OllamaClient::new(config("http://localhost:11434")).unwrap();
        let image = InlineImage::new("image/png", b"hello".to_vec());
        let request = client.build_request("sys", "user", Some(&image));
        let json = serde_json::to_value(&request).unwrap();

        assert!(json["messages"][0].get("images").is_none());
        assert_eq!(json["messages"][1]["images"][0], "aGVsbG8=");
        assert_eq!(json["stream"], false);
        assert_eq!(json["model"], "llava");
    }

    #[test]
    fn test_silent_server_times_out() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            // Hold the connection open without ever answering.
            if let Ok((_stream, _)) = listener.accept() {
                std::thread::sleep(Duration::from_secs(5));
            }
        });

        let client = OllamaClient::new(config(&format!("http://{addr}"))).unwrap();
        let started = std::time::Instant::now();
        assert!(client.generate("hello", None).is_err());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_unreachable_server_is_an_error() {
        // Port 9 (discard) is essentially never an HTTP server.
        let client = OllamaClient::new(config("http://127.0.0.1:9")).unwrap();
        assert!(client.generate("hello", None).is_err());
    }
}
