//! HTTP request probe.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::ServiceError;

const MAX_TIMEOUT_MS: u64 = 120_000;
const MAX_REDIRECTS: usize = 10;
const METHODS: &[&str] = &[
    "GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS", "TRACE",
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpOptions {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub follow_redirects: Option<bool>,
    #[serde(default)]
    pub verify_ssl: Option<bool>,
    /// Accepted for compatibility; requests are not retried.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpProbe {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub options: HttpOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct HttpReport {
    pub url: String,
    pub final_url: String,
    pub method: String,
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub content_length: usize,
}

/// A validated HTTP probe, ready to send.
#[derive(Debug)]
pub struct HttpPlan {
    url: Url,
    method: Method,
    headers: HeaderMap,
    body: Option<Value>,
    timeout: Duration,
    follow_redirects: bool,
    verify_ssl: bool,
}

impl HttpProbe {
    pub fn validate(self, default_timeout: Duration) -> Result<HttpPlan, ServiceError> {
        let raw = self.url.trim();
        if raw.is_empty() {
            return Err(ServiceError::invalid("url is required"));
        }
        let url = Url::parse(raw)
            .map_err(|e| ServiceError::invalid(format!("invalid url '{}': {}", raw, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ServiceError::invalid(format!(
                "url scheme must be http or https, got '{}'",
                url.scheme()
            )));
        }
        if url.host_str().map(str::is_empty).unwrap_or(true) {
            return Err(ServiceError::invalid("url must include a host"));
        }

        let method_name = self
            .method
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or("GET")
            .to_ascii_uppercase();
        if !METHODS.contains(&method_name.as_str()) {
            return Err(ServiceError::invalid(format!(
                "unsupported HTTP method: {}",
                method_name
            )));
        }
        let method = Method::from_bytes(method_name.as_bytes()).map_err(|_| {
            ServiceError::invalid(format!("unsupported HTTP method: {}", method_name))
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ServiceError::invalid(format!("invalid header name: {}", name)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| ServiceError::invalid(format!("invalid value for header {}", name)))?;
            headers.append(name, value);
        }

        let timeout = match self.options.timeout_ms {
            Some(ms) if ms > 0 => Duration::from_millis(ms.min(MAX_TIMEOUT_MS)),
            _ => default_timeout,
        };

        Ok(HttpPlan {
            url,
            method,
            headers,
            body: self.body.filter(|b| !b.is_null()),
            timeout,
            follow_redirects: self.options.follow_redirects.unwrap_or(true),
            verify_ssl: self.options.verify_ssl.unwrap_or(true),
        })
    }
}

impl HttpPlan {
    pub async fn execute(&self) -> Result<HttpReport, ServiceError> {
        let redirect = if self.follow_redirects {
            reqwest::redirect::Policy::limited(MAX_REDIRECTS)
        } else {
            reqwest::redirect::Policy::none()
        };
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .redirect(redirect)
            .danger_accept_invalid_certs(!self.verify_ssl)
            .build()
            .map_err(|e| ServiceError::Internal(e.into()))?;

        let mut builder = client
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone());
        if let Some(body) = &self.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            ServiceError::probe(format!("HTTP {} {} failed: {}", self.method, self.url, e))
        })?;

        let status_code = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = join_headers(response.headers());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ServiceError::probe(format!("failed to read response body: {}", e)))?;

        Ok(HttpReport {
            url: self.url.to_string(),
            final_url,
            method: self.method.to_string(),
            status_code,
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
            content_length: bytes.len(),
        })
    }
}

/// One entry per header name, repeated values joined with `", "`.
fn join_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut joined = BTreeMap::new();
    for name in headers.keys() {
        let values: Vec<String> = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        joined.insert(name.as_str().to_string(), values.join(", "));
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn probe(value: Value) -> HttpProbe {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn defaults() {
        let plan = probe(json!({ "url": "https://example.com/x" }))
            .validate(Duration::from_secs(30))
            .unwrap();
        assert_eq!(plan.method, Method::GET);
        assert_eq!(plan.timeout, Duration::from_secs(30));
        assert!(plan.follow_redirects);
        assert!(plan.verify_ssl);
    }

    #[test]
    fn timeout_is_clamped() {
        let plan = probe(json!({ "url": "http://a.example", "options": { "timeout_ms": 999999 } }))
            .validate(Duration::from_secs(30))
            .unwrap();
        assert_eq!(plan.timeout, Duration::from_millis(MAX_TIMEOUT_MS));
        let plan = probe(json!({ "url": "http://a.example", "options": { "timeout_ms": 0 } }))
            .validate(Duration::from_secs(30))
            .unwrap();
        assert_eq!(plan.timeout, Duration::from_secs(30));
    }

    #[test]
    fn rejects_bad_input() {
        for bad in [
            json!({ "url": "" }),
            json!({ "url": "not a url" }),
            json!({ "url": "ftp://example.com" }),
            json!({ "url": "https://example.com", "method": "BREW" }),
            json!({ "url": "https://example.com", "headers": { "bad header": "x" } }),
        ] {
            assert!(matches!(
                probe(bad).validate(Duration::from_secs(1)),
                Err(ServiceError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn method_is_case_insensitive() {
        let plan = probe(json!({ "url": "https://example.com", "method": "post" }))
            .validate(Duration::from_secs(1))
            .unwrap();
        assert_eq!(plan.method, Method::POST);
    }

    #[test]
    fn repeated_headers_are_joined() {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        let joined = join_headers(&headers);
        assert_eq!(joined["set-cookie"], "a=1, b=2");
        assert_eq!(joined["content-type"], "text/plain");
    }
}
