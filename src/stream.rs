//! Incremental token stream from a local Ollama server.
//!
//! The generation endpoint answers `POST /api/generate` with one JSON object
//! per line, each carrying the next fragment of text under `response`. This
//! module turns that body into a lazy stream of non-empty fragments. Failures
//! never surface as errors: the stream yields a single diagnostic token of the
//! form `[streaming error: <cause>]` and ends, so the caller can speak and
//! record it like any other reply.

use std::fmt::Display;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

/// A one-pass sequence of text fragments in arrival order.
pub type TokenStream = BoxStream<'static, String>;

/// Something that can turn a prompt into a stream of generated text.
pub trait TokenSource: Send + Sync {
    fn stream(&self, prompt: &str) -> TokenStream;
}

/// Format the token used in place of model output when streaming fails.
pub fn error_token(cause: impl Display) -> String {
    format!("[streaming error: {cause}]")
}

/// Whether `text` carries a diagnostic token anywhere in it. Streams can
/// fail after some output was produced, so the marker may follow real text.
pub fn contains_error_token(text: &str) -> bool {
    text.contains("[streaming error:")
}

/// Drain a token stream into a single string.
pub async fn collect_text(stream: TokenStream) -> String {
    stream.collect::<Vec<String>>().await.concat()
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateLine {
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: Option<String>,
}

/// What a single line of the response body contributed.
#[derive(Debug, PartialEq, Eq)]
enum Line {
    Token(String),
    Failed(String),
    Skip,
}

fn parse_line(line: &str) -> Line {
    match serde_json::from_str::<GenerateLine>(line) {
        Ok(GenerateLine {
            error: Some(message),
            ..
        }) => Line::Failed(message),
        Ok(GenerateLine { response, .. }) if !response.is_empty() => Line::Token(response),
        Ok(_) => Line::Skip,
        Err(e) => {
            log::debug!("Skipping malformed stream line ({e}): {line}");
            Line::Skip
        }
    }
}

/// Reassembles newline-delimited records from arbitrary byte chunks.
///
/// Bytes are buffered until a `\n` arrives so that multi-byte UTF-8
/// sequences split across network reads decode correctly.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&raw).trim().to_string();
        (!line.is_empty()).then_some(line)
    }
}

/// Streaming client for Ollama's `/api/generate`.
pub struct OllamaStream {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaStream {
    /// Build a client for `base_url` (e.g. `http://localhost:11434`) that
    /// generates with `model`. `timeout` bounds each wait for the server,
    /// including every gap between streamed lines, but not the total length
    /// of a reply.
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .read_timeout(timeout)
            .build()
            .context("failed to build HTTP client for the language model")?;
        Ok(Self {
            client,
            url: format!("{}/api/generate", base_url.trim_end_matches('/')),
            model: model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl TokenSource for OllamaStream {
    fn stream(&self, prompt: &str) -> TokenStream {
        let client = self.client.clone();
        let url = self.url.clone();
        let model = self.model.clone();
        let prompt = prompt.to_string();

        Box::pin(async_stream::stream! {
            if prompt.trim().is_empty() {
                yield error_token("empty prompt");
                return;
            }

            let body = GenerateRequest { model: &model, prompt: &prompt, stream: true };
            let sent = client
                .post(&url)
                .json(&body)
                .send()
                .await
                .and_then(|response| response.error_for_status());
            let response = match sent {
                Ok(response) => response,
                Err(e) => {
                    log::error!("Generation request to {url} failed: {e}");
                    yield error_token(e);
                    return;
                }
            };

            let mut body = response.bytes_stream();
            let mut lines = LineBuffer::default();
            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        log::error!("Generation stream interrupted: {e}");
                        yield error_token(e);
                        return;
                    }
                };
                for line in lines.push(&chunk) {
                    match parse_line(&line) {
                        Line::Token(token) => {
                            yield token;
                        }
                        Line::Failed(message) => {
                            log::error!("Language model reported an error: {message}");
                            yield error_token(message);
                            return;
                        }
                        Line::Skip => {}
                    }
                }
            }
            if let Some(line) = lines.finish() {
                match parse_line(&line) {
                    Line::Token(token) => {
                        yield token;
                    }
                    Line::Failed(message) => {
                        yield error_token(message);
                    }
                    Line::Skip => {}
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(uri: &str) -> OllamaStream {
        OllamaStream::new(uri, "mistral", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn line_buffer_joins_split_records() {
        let mut buf = LineBuffer::default();
        assert!(buf.push(b"{\"response\":\"He").is_empty());
        assert_eq!(buf.push(b"llo\"}\n\n{\"resp"), vec!["{\"response\":\"Hello\"}"]);
        assert_eq!(buf.push(b"onse\":\"!\"}"), Vec::<String>::new());
        assert_eq!(buf.finish().as_deref(), Some("{\"response\":\"!\"}"));
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn line_buffer_keeps_multibyte_characters_intact() {
        let record = "{\"response\":\"21℃\"}\n".as_bytes();
        let split = record.len() - 5;
        let mut buf = LineBuffer::default();
        assert!(buf.push(&record[..split]).is_empty());
        assert_eq!(buf.push(&record[split..]), vec!["{\"response\":\"21℃\"}"]);
    }

    #[test]
    fn parse_line_classifies_records() {
        assert_eq!(parse_line(r#"{"response":"Hi"}"#), Line::Token("Hi".into()));
        assert_eq!(parse_line(r#"{"response":"","done":true}"#), Line::Skip);
        assert_eq!(parse_line("not json"), Line::Skip);
        assert_eq!(
            parse_line(r#"{"error":"model 'x' not found"}"#),
            Line::Failed("model 'x' not found".into())
        );
    }

    #[test]
    fn error_tokens_are_recognisable() {
        let token = error_token("timeout");
        assert_eq!(token, "[streaming error: timeout]");
        assert!(contains_error_token(&token));
        assert!(contains_error_token("Half an answer[streaming error: reset]"));
        assert!(!contains_error_token("Hello there."));
    }

    #[tokio::test]
    async fn streams_response_fragments_in_order() {
        let server = MockServer::start().await;
        let body = concat!(
            "{\"model\":\"mistral\",\"response\":\"Hi\",\"done\":false}\n",
            "{\"model\":\"mistral\",\"response\":\" there\",\"done\":false}\n",
            "garbage line\n",
            "{\"model\":\"mistral\",\"response\":\".\",\"done\":false}\n",
            "{\"model\":\"mistral\",\"response\":\"\",\"done\":true}\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({
                "model": "mistral",
                "prompt": "Say hi",
                "stream": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;

        let tokens: Vec<String> = client(&server.uri()).stream("Say hi").collect().await;
        assert_eq!(tokens, vec!["Hi", " there", "."]);
    }

    #[tokio::test]
    async fn http_failure_yields_single_error_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let tokens: Vec<String> = client(&server.uri()).stream("Hello").collect().await;
        assert_eq!(tokens.len(), 1);
        assert!(contains_error_token(&tokens[0]), "got {tokens:?}");
    }

    #[tokio::test]
    async fn server_error_object_ends_stream() {
        let server = MockServer::start().await;
        let body = "{\"response\":\"Par\"}\n{\"error\":\"out of memory\"}\n{\"response\":\"tial\"}\n";
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let tokens: Vec<String> = client(&server.uri()).stream("Hello").collect().await;
        assert_eq!(
            tokens,
            vec!["Par".to_string(), "[streaming error: out of memory]".to_string()]
        );
    }

    #[tokio::test]
    async fn unreachable_server_yields_single_error_token() {
        let uri = {
            let server = MockServer::start().await;
            server.uri()
        };
        let text = collect_text(client(&uri).stream("Hello")).await;
        assert!(contains_error_token(&text), "got {text}");
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected_without_a_request() {
        let text = collect_text(client("http://127.0.0.1:1").stream("   ")).await;
        assert_eq!(text, "[streaming error: empty prompt]");
    }

    /// Serve one `/api/generate` request, sending `lines` as separate
    /// chunks with `gap` between them.
    async fn trickle_server(lines: &'static [&'static str], gap: Duration) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            // Headers, then the JSON body; the body ends the read well before
            // the client waits on us.
            while !request.windows(4).any(|w| w == b"\r\n\r\n") || !request.ends_with(b"}") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: application/x-ndjson\r\n\
                      Transfer-Encoding: chunked\r\n\r\n",
                )
                .await
                .unwrap();
            for line in lines {
                tokio::time::sleep(gap).await;
                let chunk = format!("{line}\n");
                let framed = format!("{:x}\r\n{chunk}\r\n", chunk.len());
                socket.write_all(framed.as_bytes()).await.unwrap();
                socket.flush().await.unwrap();
            }
            socket.write_all(b"0\r\n\r\n").await.unwrap();
            socket.flush().await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn slow_reply_longer_than_the_timeout_is_delivered_whole() {
        const LINES: &[&str] = &[
            r#"{"response":"One","done":false}"#,
            r#"{"response":" two","done":false}"#,
            r#"{"response":" three","done":false}"#,
            r#"{"response":" four.","done":false}"#,
            r#"{"response":"","done":true}"#,
        ];
        // Each gap fits in the timeout; the whole reply takes twice as long.
        let uri = trickle_server(LINES, Duration::from_millis(400)).await;
        let source = OllamaStream::new(&uri, "mistral", Duration::from_secs(1)).unwrap();

        let tokens: Vec<String> = source.stream("Count to four").collect().await;
        assert_eq!(tokens, vec!["One", " two", " three", " four."], "got {tokens:?}");
    }
}
