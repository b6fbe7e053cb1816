//! Okta system log.
//!
//! `GET /api/v1/logs` returns records oldest first, paged through an RFC 8288
//! `Link: rel="next"` header. Okta keeps returning a next link on an empty
//! page (it is a polling feed), so an empty page ends the run.

use super::trim_base;
use crate::config::ConnectorConfig;
use crate::connector::{CollectSpec, Connector};
use crate::http::{HttpClient, Request};
use crate::pagination::PageSource;
use crate::position::{LogOrder, PointerFormat, PositionEngine};
use crate::record::{LogEntry, Page};
use crate::Result;
use async_trait::async_trait;

const PAGE_LIMIT: &str = "1000";

pub struct Okta {
    http: HttpClient,
    base_url: String,
    token: String,
    spec: CollectSpec,
}

impl Okta {
    pub const NAME: &'static str = "okta";

    /// `identity` is the Okta domain, e.g. `acme.okta.com`.
    pub fn new(config: &ConnectorConfig, http: HttpClient) -> Result<Self> {
        let base_url = match &config.base_url {
            Some(url) => trim_base(url),
            None => format!("https://{}", config.identity),
        };
        Ok(Self {
            http,
            base_url,
            token: config.require_key()?.to_string(),
            spec: CollectSpec::new(PositionEngine::new(
                "published",
                PointerFormat::Iso8601,
                LogOrder::Chronological,
            )),
        })
    }

    fn request(&self, since: &str, cursor: Option<&str>) -> Request {
        let request = match cursor {
            // Next links already carry every query parameter.
            Some(next) => Request::get(next),
            None => Request::get(format!("{}/api/v1/logs", self.base_url))
                .query("since", since)
                .query("sortOrder", "ASCENDING")
                .query("limit", PAGE_LIMIT),
        };
        request
            .header("Accept", "application/json")
            .header("Authorization", format!("SSWS {}", self.token))
    }
}

#[async_trait]
impl PageSource for Okta {
    async fn fetch(&mut self, since: &str, cursor: Option<&str>) -> Result<Page> {
        let response = self.http.execute(&self.request(since, cursor)).await?;
        let entries = LogEntry::parse_array(&response.body)?;
        let next = if entries.is_empty() {
            None
        } else {
            response.next_link()
        };
        Ok(Page::new(entries, next))
    }
}

#[async_trait]
impl Connector for Okta {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn spec(&self) -> &CollectSpec {
        &self.spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::client;
    use crate::http::Response;
    use crate::Error;

    fn config() -> ConnectorConfig {
        ConnectorConfig::new("okta-prod", "okta", "acme.okta.com").with_key("s3cr3t")
    }

    #[test]
    fn test_requires_key() {
        let (http, _, _) = client(vec![]);
        let config = ConnectorConfig::new("okta-prod", "okta", "acme.okta.com");
        assert!(matches!(
            Okta::new(&config, http),
            Err(Error::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_first_page_request() {
        let (http, transport, _) = client(vec![Ok(Response::new(200)
            .with_header("Link", "<https://acme.okta.com/api/v1/logs?after=abc>; rel=\"next\"")
            .with_body(r#"[{"published":"2024-01-02T00:00:00.000Z","uuid":"1"}]"#))]);
        let mut okta = Okta::new(&config(), http).unwrap();

        let page = okta.fetch("2024-01-01T00:00:00.000Z", None).await.unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(
            page.next_cursor(),
            Some("https://acme.okta.com/api/v1/logs?after=abc")
        );

        let sent = &transport.requests()[0];
        assert_eq!(sent.url, "https://acme.okta.com/api/v1/logs");
        assert!(sent
            .query
            .contains(&("since".to_string(), "2024-01-01T00:00:00.000Z".to_string())));
        assert!(sent
            .headers
            .contains(&("Authorization".to_string(), "SSWS s3cr3t".to_string())));
    }

    #[tokio::test]
    async fn test_empty_page_ends_feed_despite_next_link() {
        let (http, transport, _) = client(vec![Ok(Response::new(200)
            .with_header("Link", "<https://acme.okta.com/api/v1/logs?after=abc>; rel=\"next\"")
            .with_body("[]"))]);
        let mut okta = Okta::new(&config(), http).unwrap();

        let page = okta
            .fetch("x", Some("https://acme.okta.com/api/v1/logs?after=zzz"))
            .await
            .unwrap();
        assert!(page.entries.is_empty());
        assert_eq!(page.next_cursor(), None);
        assert_eq!(
            transport.requests()[0].url,
            "https://acme.okta.com/api/v1/logs?after=zzz"
        );
        assert!(transport.requests()[0].query.is_empty());
    }

    #[test]
    fn test_base_url_override() {
        let (http, _, _) = client(vec![]);
        let okta = Okta::new(&config().with_base_url("http://localhost:8080/"), http).unwrap();
        assert_eq!(okta.base_url, "http://localhost:8080");
    }
}
