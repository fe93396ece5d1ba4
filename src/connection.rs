use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response};
use url::Url;

use crate::config::Setting;
use crate::error::{CycleError, Result};

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// HTTP transport used by the provider. Timeouts and network failures
/// surface as [`CycleError::Transport`].
#[async_trait]
pub trait HttpConnection: Send + Sync {
    /// GET `url` and return the JSON body as text.
    async fn get_as_string(&self, url: &Url) -> Result<String>;

    /// Check that `url` answers successfully with `media_type`.
    async fn test(&self, url: &Url, media_type: &str) -> Result<()>;
}

pub struct ReqwestConnection {
    client: Client,
}

impl ReqwestConnection {
    pub fn from_setting(setting: &Setting) -> Result<Self> {
        let client = Client::builder()
            .timeout(setting.read_timeout())
            .build()?;
        Ok(Self { client })
    }

    async fn get(&self, url: &Url, media_type: &str) -> Result<Response> {
        let resp = self
            .client
            .get(url.clone())
            .header(ACCEPT, media_type)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(CycleError::Transport(format!("HTTP {}: {}", status.as_u16(), snippet)));
        }
        check_content_type(
            resp.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            media_type,
        )?;
        Ok(resp)
    }
}

/// A missing header is accepted; a different media type is not.
fn check_content_type(header: Option<&str>, media_type: &str) -> Result<()> {
    match header {
        None => Ok(()),
        Some(value) => {
            let essence = value.split(';').next().unwrap_or("").trim();
            if essence.eq_ignore_ascii_case(media_type) {
                Ok(())
            } else {
                Err(CycleError::Transport(format!(
                    "unexpected content type '{}', expected '{}'",
                    value, media_type
                )))
            }
        }
    }
}

#[async_trait]
impl HttpConnection for ReqwestConnection {
    async fn get_as_string(&self, url: &Url) -> Result<String> {
        let resp = self.get(url, CONTENT_TYPE_JSON).await?;
        Ok(resp.text().await?)
    }

    async fn test(&self, url: &Url, media_type: &str) -> Result<()> {
        self.get(url, media_type).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_check() {
        assert!(check_content_type(None, CONTENT_TYPE_JSON).is_ok());
        assert!(check_content_type(Some("application/json"), CONTENT_TYPE_JSON).is_ok());
        assert!(check_content_type(Some("Application/JSON; charset=utf-8"), CONTENT_TYPE_JSON).is_ok());
        assert!(matches!(
            check_content_type(Some("text/html"), CONTENT_TYPE_JSON),
            Err(CycleError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let setting = Setting {
            read_timeout_ms: 500,
            ..Setting::default()
        };
        let conn = ReqwestConnection::from_setting(&setting).unwrap();
        let url = Url::parse("http://127.0.0.1:9/v1/marketdata").unwrap();
        let err = conn.get_as_string(&url).await.unwrap_err();
        assert!(matches!(err, CycleError::Transport(_)));
    }
}
