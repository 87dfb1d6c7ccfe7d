//! Ollama 兼容 HTTP 后端
//!
//! - `/api/generate`：非流式返回 `{"response": ...}`，流式返回逐行 JSON `{"response", "done"}`
//! - 加载模型：空 prompt 的 generate；卸载模型：`keep_alive: 0`
//! - `/api/tags`：列出可用模型

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::LlmSection;
use crate::llm::{ChunkStream, LlmError, ModelBackend, StreamChunk};

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// Ollama HTTP 客户端：持有 reqwest Client、base_url 与两类超时
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    request_timeout: Duration,
    stream_timeout: Duration,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>, request_timeout_secs: u64, stream_timeout_secs: u64) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(request_timeout_secs),
            stream_timeout: Duration::from_secs(stream_timeout_secs),
        }
    }

    pub fn from_config(cfg: &LlmSection) -> Self {
        Self::new(cfg.base_url.clone(), cfg.timeouts.request, cfg.timeouts.stream)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_generate(&self, body: &GenerateRequest<'_>) -> Result<reqwest::Response, LlmError> {
        let timeout = if body.stream {
            self.stream_timeout
        } else {
            self.request_timeout
        };
        let resp = self
            .client
            .post(self.url("/api/generate"))
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(resp).await
    }
}

fn map_reqwest_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else if e.is_decode() {
        LlmError::Decode(e.to_string())
    } else {
        LlmError::Network(e.to_string())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(LlmError::Http {
        status: status.as_u16(),
        body,
    })
}

/// 解析一行 NDJSON
pub(crate) fn parse_chunk_line(line: &[u8]) -> Result<StreamChunk, LlmError> {
    serde_json::from_slice(line).map_err(|e| LlmError::Decode(e.to_string()))
}

/// 从缓冲区切出下一整行（不含换行符），没有完整行时返回 None
fn take_line(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    let pos = buf.iter().position(|b| *b == b'\n')?;
    let mut line: Vec<u8> = buf.drain(..=pos).collect();
    line.pop();
    Some(line)
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, LlmError> {
        let resp = self
            .post_generate(&GenerateRequest {
                model,
                prompt,
                stream: false,
                keep_alive: None,
            })
            .await?;
        let parsed: GenerateResponse = resp.json().await.map_err(map_reqwest_error)?;
        Ok(parsed.response)
    }

    async fn generate_stream(&self, model: &str, prompt: &str) -> Result<ChunkStream, LlmError> {
        let resp = self
            .post_generate(&GenerateRequest {
                model,
                prompt,
                stream: true,
                keep_alive: None,
            })
            .await?;
        let bytes = Box::pin(resp.bytes_stream());

        // 状态：(字节流, 行缓冲, 是否已结束)
        let chunks = stream::unfold((bytes, Vec::new(), false), |(mut bytes, mut buf, finished)| async move {
            if finished {
                return None;
            }
            loop {
                if let Some(line) = take_line(&mut buf) {
                    if line.iter().all(|b| b.is_ascii_whitespace()) {
                        continue;
                    }
                    let item = parse_chunk_line(&line);
                    let stop = match &item {
                        Ok(chunk) => chunk.done,
                        Err(_) => true,
                    };
                    return Some((item, (bytes, buf, stop)));
                }
                match bytes.next().await {
                    Some(Ok(data)) => buf.extend_from_slice(&data),
                    Some(Err(e)) => return Some((Err(map_reqwest_error(e)), (bytes, buf, true))),
                    None => {
                        if buf.iter().all(|b| b.is_ascii_whitespace()) {
                            return None;
                        }
                        let rest = std::mem::take(&mut buf);
                        return Some((parse_chunk_line(&rest), (bytes, buf, true)));
                    }
                }
            }
        });

        Ok(Box::pin(chunks))
    }

    async fn load(&self, model: &str) -> Result<(), LlmError> {
        tracing::debug!("Loading model {}", model);
        self.post_generate(&GenerateRequest {
            model,
            prompt: "",
            stream: false,
            keep_alive: None,
        })
        .await
        .map_err(|e| match e {
            LlmError::Http { status: 404, .. } => LlmError::ModelUnavailable(model.to_string()),
            other => other,
        })?;
        Ok(())
    }

    async fn unload(&self, model: &str) -> Result<(), LlmError> {
        tracing::debug!("Unloading model {}", model);
        self.post_generate(&GenerateRequest {
            model,
            prompt: "",
            stream: false,
            keep_alive: Some(0),
        })
        .await?;
        Ok(())
    }

    async fn list_available(&self) -> Result<Vec<String>, LlmError> {
        let resp = self
            .client
            .get(self.url("/api/tags"))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let resp = check_status(resp).await?;
        let tags: TagsResponse = resp.json().await.map_err(map_reqwest_error)?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chunk_line() {
        let chunk = parse_chunk_line(br#"{"response":"fn main","done":false}"#).unwrap();
        assert_eq!(chunk.response, "fn main");
        assert!(!chunk.done);

        let last = parse_chunk_line(br#"{"done":true,"total_duration":12}"#).unwrap();
        assert!(last.done);
        assert!(last.response.is_empty());

        assert!(matches!(parse_chunk_line(b"not json"), Err(LlmError::Decode(_))));
    }

    #[test]
    fn test_take_line_keeps_partial_tail() {
        let mut buf = b"{\"a\":1}\n{\"b\":".to_vec();
        assert_eq!(take_line(&mut buf).unwrap(), b"{\"a\":1}".to_vec());
        assert!(take_line(&mut buf).is_none());
        assert_eq!(buf, b"{\"b\":".to_vec());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let backend = OllamaBackend::new("http://localhost:11434/", 5, 5);
        assert_eq!(backend.url("/api/tags"), "http://localhost:11434/api/tags");
    }
}
