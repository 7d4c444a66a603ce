//! Common utilities for the runtime API client
//!
//! Request plumbing shared by every runtime operation: URL building, query
//! strings and mapping HTTP status codes onto [`RuntimeError`].

use crate::error::RuntimeError;
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

/// HTTP client wrapper bound to one runtime endpoint
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Build query string from parameters
    pub fn build_query_string(&self, params: &[(&str, &str)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Path with an encoded query string appended
    pub fn with_query(&self, path: &str, params: &[(&str, &str)]) -> String {
        if params.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, self.build_query_string(params))
        }
    }

    /// Send a request and map non-success statuses to errors.
    ///
    /// `304 Not Modified` counts as success: the runtime uses it for
    /// "already started" and "already stopped".
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, RuntimeError> {
        let url = self.build_url(path);
        debug!("{} {}", method, url);

        let mut request = self.client.request(method.clone(), &url).header("Accept", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(RuntimeError::Http)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(RuntimeError::NotFound(format!("{} {} - {}", method, path, body.trim())));
        }
        if !status.is_success() && status != StatusCode::NOT_MODIFIED {
            let body = response.text().await.unwrap_or_default();
            return Err(RuntimeError::Api(format!(
                "{} {} failed: {} - {}",
                method,
                path,
                status,
                body.trim()
            )));
        }

        Ok(response)
    }

    /// Make a GET request and decode the JSON body
    pub async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, RuntimeError> {
        let response = self.send(Method::GET, path, None).await?;
        decode(response).await
    }

    /// Make a POST request and decode the JSON body
    pub async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, RuntimeError> {
        let response = self.send(Method::POST, path, Some(body)).await?;
        decode(response).await
    }

    /// Make a POST request whose response body is not JSON
    pub async fn post_raw(&self, path: &str, body: Option<&serde_json::Value>) -> Result<Vec<u8>, RuntimeError> {
        let response = self.send(Method::POST, path, body).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<(), RuntimeError> {
        self.send(Method::DELETE, path, None).await?;
        Ok(())
    }
}

async fn decode<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, RuntimeError> {
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| {
        RuntimeError::Api(format!(
            "error decoding response body: {} - Response (first 500 chars): {}",
            e,
            text.chars().take(500).collect::<String>()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_string_is_encoded() {
        let http = HttpClient::new(Client::new(), "http://docker:2375/".to_string());
        assert_eq!(http.base_url(), "http://docker:2375");
        assert_eq!(
            http.with_query("/images/create", &[("fromImage", "registry:5000/app"), ("tag", "v1")]),
            "/images/create?fromImage=registry%3A5000%2Fapp&tag=v1"
        );
        assert_eq!(http.with_query("/containers/json", &[]), "/containers/json");
        assert_eq!(http.build_url("/_ping"), "http://docker:2375/_ping");
    }
}
