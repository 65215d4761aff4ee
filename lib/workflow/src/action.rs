//! Action handlers.
//!
//! Action nodes name an operation as `service.action`; the registry maps that
//! key to an [`ActionHandler`]. Every handler gets the node's configured
//! parameters plus its resolved input and returns a JSON output.

use crate::node::NodeId;
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue, json};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// One call to an action handler.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionInvocation {
    pub node_id: NodeId,
    /// The node's configured parameters.
    pub parameters: JsonValue,
    /// The node's resolved input.
    pub input: JsonValue,
}

/// An action handler failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionError {
    pub message: String,
}

impl ActionError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ActionError {}

/// An operation on an external service.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn invoke(&self, invocation: ActionInvocation) -> Result<JsonValue, ActionError>;
}

/// Handlers keyed by `service.action`.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in `http.*` actions.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_builtins() -> Result<Self, ActionError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ActionError::new(format!("failed to build HTTP client: {e}")))?;
        let mut registry = Self::new();
        registry.register_http(client);
        Ok(registry)
    }

    /// Registers `http.request`, `http.get`, `http.post`, `http.put` and
    /// `http.delete` over `client`.
    pub fn register_http(&mut self, client: reqwest::Client) {
        let actions = [
            ("request", None),
            ("get", Some(Method::GET)),
            ("post", Some(Method::POST)),
            ("put", Some(Method::PUT)),
            ("delete", Some(Method::DELETE)),
        ];
        for (action, method) in actions {
            self.register(
                format!("http.{action}"),
                Arc::new(HttpRequestAction::new(client.clone(), method)),
            );
        }
    }

    /// Registers (or replaces) a handler.
    pub fn register(&mut self, key: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(key.into(), handler);
    }

    /// Builder form of [`Self::register`].
    #[must_use]
    pub fn with_handler(mut self, key: impl Into<String>, handler: Arc<dyn ActionHandler>) -> Self {
        self.register(key, handler);
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(key).cloned()
    }

    /// Registered keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<_> = self.handlers.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("handlers", &self.keys())
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct HttpParams {
    #[serde(default)]
    method: Option<String>,
    url: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    query: BTreeMap<String, JsonValue>,
    #[serde(default)]
    body: Option<JsonValue>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    /// Treat 4xx/5xx responses as output rather than failure.
    #[serde(default)]
    allow_error_status: bool,
}

/// Calls an HTTP endpoint.
///
/// Parameters: `url` (required), `method`, `headers`, `query`, `body`,
/// `timeout_secs`, `allow_error_status`. Methods with a body send `body`, or
/// the node input when no body is configured. Output is
/// `{status, headers, body}` where `body` is parsed JSON when possible.
#[derive(Debug, Clone)]
pub struct HttpRequestAction {
    client: reqwest::Client,
    /// Fixed method; `None` reads it from parameters, defaulting to GET.
    method: Option<Method>,
}

impl HttpRequestAction {
    #[must_use]
    pub fn new(client: reqwest::Client, method: Option<Method>) -> Self {
        Self { client, method }
    }

    fn method(&self, params: &HttpParams) -> Result<Method, ActionError> {
        if let Some(method) = &self.method {
            return Ok(method.clone());
        }
        match &params.method {
            Some(name) => Method::from_bytes(name.to_ascii_uppercase().as_bytes())
                .map_err(|_| ActionError::new(format!("invalid HTTP method '{name}'"))),
            None => Ok(Method::GET),
        }
    }
}

fn query_value(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ActionHandler for HttpRequestAction {
    async fn invoke(&self, invocation: ActionInvocation) -> Result<JsonValue, ActionError> {
        let params: HttpParams = serde_json::from_value(invocation.parameters)
            .map_err(|e| ActionError::new(format!("invalid http parameters: {e}")))?;
        let method = self.method(&params)?;

        let mut request = self.client.request(method.clone(), &params.url);
        for (name, value) in &params.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if !params.query.is_empty() {
            let query: Vec<(&str, String)> = params
                .query
                .iter()
                .map(|(k, v)| (k.as_str(), query_value(v)))
                .collect();
            request = request.query(&query);
        }
        if let Some(timeout) = params.timeout_secs {
            request = request.timeout(Duration::from_secs(timeout));
        }
        let sends_body = !matches!(method, Method::GET | Method::HEAD | Method::DELETE);
        match params.body {
            Some(body) => request = request.json(&body),
            None if sends_body && !invocation.input.is_null() => {
                request = request.json(&invocation.input);
            }
            None => {}
        }

        tracing::debug!(
            node_id = %invocation.node_id,
            method = %method,
            url = %params.url,
            "sending HTTP action request"
        );

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ActionError::new(format!("request to {} timed out", params.url))
            } else {
                ActionError::new(format!("request to {} failed: {e}", params.url))
            }
        })?;

        let status = response.status();
        let headers: Map<String, JsonValue> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                let value = value.to_str().ok()?;
                Some((name.as_str().to_string(), JsonValue::from(value)))
            })
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| ActionError::new(format!("failed to read response body: {e}")))?;

        if !status.is_success() && !params.allow_error_status {
            return Err(ActionError::new(format!(
                "{} {} returned {status}: {}",
                method,
                params.url,
                text.chars().take(200).collect::<String>()
            )));
        }

        let body = serde_json::from_str(&text).unwrap_or(JsonValue::String(text));
        Ok(json!({
            "status": status.as_u16(),
            "headers": headers,
            "body": body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn response(status_line: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    /// Serves one canned response and returns the raw request it received.
    async fn serve_once(reply: String) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut received = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.expect("read");
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&received);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if received.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            socket.write_all(reply.as_bytes()).await.expect("write");
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&received).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    fn registry() -> ActionRegistry {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .expect("client");
        let mut registry = ActionRegistry::new();
        registry.register_http(client);
        registry
    }

    fn invocation(parameters: JsonValue, input: JsonValue) -> ActionInvocation {
        ActionInvocation {
            node_id: NodeId::from("call"),
            parameters,
            input,
        }
    }

    #[test]
    fn builtins_are_registered() {
        assert_eq!(
            registry().keys(),
            vec![
                "http.delete",
                "http.get",
                "http.post",
                "http.put",
                "http.request"
            ]
        );
    }

    #[tokio::test]
    async fn get_returns_parsed_json_body() {
        let (base, server) = serve_once(response("200 OK", r#"{"id":7}"#)).await;
        let handler = registry().get("http.get").expect("handler");

        let output = handler
            .invoke(invocation(
                json!({ "url": format!("{base}/items"), "query": { "limit": 5 } }),
                json!(null),
            ))
            .await
            .expect("invoke");

        assert_eq!(output["status"], 200);
        assert_eq!(output["body"], json!({ "id": 7 }));
        assert_eq!(output["headers"]["content-type"], "application/json");
        let request = server.await.expect("server");
        assert!(request.starts_with("GET /items?limit=5 HTTP/1.1"));
    }

    #[tokio::test]
    async fn post_sends_input_when_no_body_configured() {
        let (base, server) = serve_once(response("201 Created", "created")).await;
        let handler = registry().get("http.post").expect("handler");

        let output = handler
            .invoke(invocation(
                json!({ "url": base, "headers": { "x-trace": "abc" } }),
                json!({ "name": "ada" }),
            ))
            .await
            .expect("invoke");

        assert_eq!(output["status"], 201);
        assert_eq!(output["body"], "created");
        let request = server.await.expect("server");
        assert!(request.starts_with("POST / HTTP/1.1"));
        assert!(request.contains("x-trace: abc"));
        assert!(request.ends_with(r#"{"name":"ada"}"#));
    }

    #[tokio::test]
    async fn error_status_fails_unless_allowed() {
        let (base, _server) = serve_once(response("503 Service Unavailable", "{}")).await;
        let handler = registry().get("http.request").expect("handler");
        let err = handler
            .invoke(invocation(json!({ "url": base, "method": "get" }), json!(null)))
            .await
            .expect_err("503");
        assert!(err.message.contains("503"));

        let (base, _server) = serve_once(response("404 Not Found", "{}")).await;
        let output = handler
            .invoke(invocation(
                json!({ "url": base, "allow_error_status": true }),
                json!(null),
            ))
            .await
            .expect("allowed");
        assert_eq!(output["status"], 404);
    }

    #[tokio::test]
    async fn missing_url_is_rejected() {
        let handler = registry().get("http.get").expect("handler");
        let err = handler
            .invoke(invocation(json!({ "method": "GET" }), json!(null)))
            .await
            .expect_err("no url");
        assert!(err.message.starts_with("invalid http parameters"));
    }
}
