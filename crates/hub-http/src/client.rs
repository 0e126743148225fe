//! Outbound HTTPS with conditional headers, charset decoding, and Link
//! header capture.

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use reqwest::header::{
    CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, LINK, USER_AGENT,
};
use url::Url;

use crate::error::Error;
use crate::feed::{parse_link_header, LinkRelation};

/// WebSub's required specification tag.
pub const WEBSUB_SPEC_TAG: &str = "W3C.REC-websub-20180123";

/// Builds the `User-Agent` value every outbound request must send: a
/// product/version identifier followed by the WebSub spec tag.
pub fn default_user_agent(product_version: &str) -> String {
    format!("{product_version} ({WEBSUB_SPEC_TAG})")
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new(user_agent: impl Into<String>, timeout: Duration) -> Result<Self, Error> {
        let inner = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            inner,
            user_agent: user_agent.into(),
        })
    }

    /// `GET topic.url` with `If-None-Match`/`If-Modified-Since` when the
    /// caller has a cached `etag`/`last_modified`.
    pub async fn conditional_get(
        &self,
        url: &Url,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<HttpResponse, Error> {
        let mut request = self
            .inner
            .get(url.clone())
            .header(USER_AGENT, &self.user_agent);

        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }

        HttpResponse::from_reqwest(request.send().await?).await
    }

    /// `GET url?query...`, used for the verification challenge.
    /// `from_header` carries the subscriber's own `From` header forward
    /// onto the outbound request when the original subscribe request
    /// supplied one.
    pub async fn get_with_query(
        &self,
        url: &Url,
        query: &[(&str, &str)],
        from_header: Option<&str>,
    ) -> Result<HttpResponse, Error> {
        let mut request = self
            .inner
            .get(url.clone())
            .query(query)
            .header(USER_AGENT, &self.user_agent);

        if let Some(from) = from_header {
            request = request.header(http::header::FROM, from);
        }

        HttpResponse::from_reqwest(request.send().await?).await
    }

    /// `POST url` with `body`, used for delivery and
    /// publisher validation.
    pub async fn post(
        &self,
        url: &Url,
        body: Vec<u8>,
        content_type: Option<&str>,
        extra_headers: &[(HeaderName, String)],
    ) -> Result<HttpResponse, Error> {
        let mut request = self
            .inner
            .post(url.clone())
            .header(USER_AGENT, &self.user_agent)
            .body(body);

        if let Some(content_type) = content_type {
            request = request.header(CONTENT_TYPE, content_type);
        }
        for (name, value) in extra_headers {
            request = request.header(name.clone(), HeaderValue::from_str(value)?);
        }

        HttpResponse::from_reqwest(request.send().await?).await
    }
}

/// A captured response: status, headers, and raw body, with helpers for
/// the handful of things every engine needs from it.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    async fn from_reqwest(response: reqwest::Response) -> Result<Self, Error> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(Self {
            status,
            headers,
            body,
        })
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED
    }

    pub fn is_gone(&self) -> bool {
        self.status == StatusCode::GONE
    }

    pub fn etag(&self) -> Option<String> {
        self.headers
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    pub fn last_modified(&self) -> Option<String> {
        self.headers
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    pub fn content_type(&self) -> Option<String> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    /// All `Link:` header relations, resolved against `base` (used by
    /// `strictTopicHubLink` enforcement).
    pub fn link_relations(&self, base: &Url) -> Vec<LinkRelation> {
        self.headers
            .get_all(LINK)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|value| parse_link_header(value, base))
            .collect()
    }

    /// Decodes the body to UTF-8 using the `Content-Type` charset
    /// (default UTF-8 when absent or unrecognized).
    pub fn decoded_text(&self) -> String {
        let label = self
            .content_type()
            .and_then(|ct| ct.parse::<mime::Mime>().ok())
            .and_then(|m| m.get_param(mime::CHARSET).map(|c| c.as_str().to_owned()))
            .unwrap_or_else(|| "utf-8".to_owned());

        let encoding = encoding_rs::Encoding::for_label(label.as_bytes()).unwrap_or(encoding_rs::UTF_8);
        let (decoded, _, _) = encoding.decode(&self.body);
        decoded.into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_user_agent_includes_spec_tag() {
        let ua = default_user_agent("websub-hub/0.1.0");
        assert!(ua.contains(WEBSUB_SPEC_TAG));
        assert!(ua.starts_with("websub-hub/0.1.0"));
    }
}
