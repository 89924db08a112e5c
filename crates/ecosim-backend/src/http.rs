//! Thin JSON-over-HTTP transport shared by the remote backends.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::BackendError;

/// A `reqwest` client bound to one service base URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for `base_url` (trailing slashes are trimmed).
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    /// POST a JSON body and decode a JSON response.
    pub async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, BackendError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Http(format!("POST {path} failed: {e}")))?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| BackendError::Http(format!("POST {path} response parse failed: {e}")))
    }

    /// POST a JSON body, ignoring any response body.
    pub async fn post_unit<B>(&self, path: &str, body: &B) -> Result<(), BackendError>
    where
        B: Serialize + ?Sized,
    {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Http(format!("POST {path} failed: {e}")))?;
        check_status(response).await?;
        Ok(())
    }

    /// GET a text body.
    pub async fn get_text(&self, path: &str) -> Result<String, BackendError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| BackendError::Http(format!("GET {path} failed: {e}")))?;
        let response = check_status(response).await?;
        response
            .text()
            .await
            .map_err(|e| BackendError::Http(format!("GET {path} body read failed: {e}")))
    }

    /// DELETE a resource.
    pub async fn delete(&self, path: &str) -> Result<(), BackendError> {
        let response = self
            .client
            .delete(self.url(path))
            .send()
            .await
            .map_err(|e| BackendError::Http(format!("DELETE {path} failed: {e}")))?;
        check_status(response).await?;
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unable to read error body".to_owned());
    Err(BackendError::Status {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_slashes_when_joining() {
        let transport = HttpTransport::new("http://sim:8080/");
        assert_eq!(transport.base_url, "http://sim:8080");
        assert_eq!(transport.url("/manipulations"), "http://sim:8080/manipulations");
    }
}
