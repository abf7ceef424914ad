use log::{debug, error};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Error types that can occur when interacting with HTTP clients
#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("HTTP request error: {0}")]
    RequestError(String),

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Empty response from server")]
    EmptyResponse,
}

/// A trait for HTTP client implementations
/// This version avoids generic methods to enable dynamic dispatch
pub trait HttpClient: Send + Sync + std::fmt::Debug {
    /// Send a GET request with headers and return the JSON response
    fn get_json_with_headers(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<Value, HttpClientError>;

    /// Send a POST request with a form-encoded body and custom headers,
    /// returning the JSON response
    fn post_form_with_headers(
        &self,
        url: &str,
        form: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<Value, HttpClientError>;

    /// Clone the client as a boxed trait object
    fn clone_box(&self) -> Box<dyn HttpClient>;
}

impl Clone for Box<dyn HttpClient> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

// Header values may carry tokens, don't log them in full
fn loggable_header(name: &str, value: &str) -> String {
    if name == "Authorization" {
        if value.len() > 15 {
            format!("{}...", &value[0..15])
        } else {
            "[hidden]".to_string()
        }
    } else {
        value.to_string()
    }
}

fn parse_json_body(response: ureq::Response) -> Result<Value, HttpClientError> {
    let response_text = match response.into_string() {
        Ok(text) => text,
        Err(e) => {
            debug!("Failed to read response body: {}", e);
            return Err(HttpClientError::ParseError(format!(
                "Failed to read response body: {}",
                e
            )));
        }
    };

    if response_text.is_empty() {
        return Err(HttpClientError::EmptyResponse);
    }

    match serde_json::from_str::<Value>(&response_text) {
        Ok(json_value) => Ok(json_value),
        Err(e) => {
            let truncated = if response_text.len() > 500 {
                format!(
                    "{}... (truncated, total length: {} bytes)",
                    &response_text[0..500],
                    response_text.len()
                )
            } else {
                response_text.clone()
            };
            error!("Failed to parse JSON response: {}", e);
            error!("Response content: {}", truncated);
            Err(HttpClientError::ParseError(format!(
                "Failed to parse response: {}",
                e
            )))
        }
    }
}

fn map_request_error(e: ureq::Error) -> HttpClientError {
    match e {
        ureq::Error::Status(code, response) => {
            let error_body = response
                .into_string()
                .unwrap_or_else(|_| "<failed to read response body>".to_string());
            error!("HTTP error {}: {}", code, error_body);
            HttpClientError::ServerError(format!("HTTP {} error: {}", code, error_body))
        }
        _ => {
            debug!("Request failed: {}", e);
            HttpClientError::RequestError(e.to_string())
        }
    }
}

/// An HTTP client implementation using ureq
#[derive(Clone, Debug)]
pub struct UreqHttpClient {
    timeout: Duration,
}

impl Default for UreqHttpClient {
    fn default() -> Self {
        Self::new(10)
    }
}

impl UreqHttpClient {
    /// Create a new HTTP client with the specified timeout
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

impl HttpClient for UreqHttpClient {
    fn get_json_with_headers(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<Value, HttpClientError> {
        debug!("GET JSON request to {}", url);

        let mut request = ureq::get(url).timeout(self.timeout);
        for &(name, value) in headers {
            debug!("Adding header '{}': '{}'", name, loggable_header(name, value));
            request = request.set(name, value);
        }

        let response = request.call().map_err(map_request_error)?;
        debug!("GET request succeeded with status: {}", response.status());
        parse_json_body(response)
    }

    fn post_form_with_headers(
        &self,
        url: &str,
        form: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<Value, HttpClientError> {
        debug!("POST form request to {}", url);

        let mut request = ureq::post(url).timeout(self.timeout);
        for &(name, value) in headers {
            debug!("Adding header '{}': '{}'", name, loggable_header(name, value));
            request = request.set(name, value);
        }

        let response = request.send_form(form).map_err(map_request_error)?;
        debug!("POST request succeeded with status: {}", response.status());
        parse_json_body(response)
    }

    fn clone_box(&self) -> Box<dyn HttpClient> {
        Box::new(self.clone())
    }
}

/// Create a new HTTP client using the default implementation
pub fn new_http_client(timeout_secs: u64) -> Box<dyn HttpClient> {
    Box::new(UreqHttpClient::new(timeout_secs))
}
