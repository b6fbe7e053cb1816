//! GitHub organization audit log.
//!
//! Records come back newest first with millisecond `@timestamp` values, so
//! many events share a timestamp; `_document_id` breaks ties. The API has no
//! exact "since" filter, only a day-granular `created:>=` search phrase, so
//! most filtering happens client side and the run stops at the first page
//! that reaches already-collected events.

use super::trim_base;
use crate::config::ConnectorConfig;
use crate::connector::{CollectSpec, Connector};
use crate::http::{HttpClient, RateLimitSignal, Request};
use crate::pagination::PageSource;
use crate::position::{LogOrder, PointerFormat, PositionEngine};
use crate::record::{LogEntry, Page};
use crate::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};

const DEFAULT_API_URL: &str = "https://api.github.com";
const PAGE_SIZE: &str = "100";

pub struct GitHub {
    http: HttpClient,
    api_url: String,
    org: String,
    include: String,
    token: String,
    spec: CollectSpec,
}

impl GitHub {
    pub const NAME: &'static str = "github";

    /// `identity` is the organization login; `operation` selects the
    /// `include` filter (`web`, `git` or `all`).
    pub fn new(config: &ConnectorConfig, http: HttpClient) -> Result<Self> {
        let api_url = config
            .base_url
            .as_deref()
            .map(trim_base)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        Ok(Self {
            http,
            api_url,
            org: config.identity.clone(),
            include: config.operation.clone().unwrap_or_else(|| "all".to_string()),
            token: config.require_key()?.to_string(),
            spec: CollectSpec::new(
                PositionEngine::new(
                    "@timestamp",
                    PointerFormat::EpochMillis,
                    LogOrder::ReverseChronological,
                )
                .with_tie_break("_document_id"),
            ),
        })
    }

    fn request(&self, since: &str, cursor: Option<&str>) -> Request {
        let request = match cursor {
            Some(next) => Request::get(next),
            None => {
                let url = format!("{}/orgs/{}/audit-log", self.api_url, self.org);
                let request = Request::get(url)
                    .query("per_page", PAGE_SIZE)
                    .query("order", "desc")
                    .query("include", self.include.as_str());
                match created_phrase(since) {
                    Some(phrase) => request.query("phrase", phrase),
                    None => request,
                }
            }
        };
        request
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .bearer(&self.token)
            .rate_limit(RateLimitSignal::QuotaForbidden)
    }
}

/// Day-granular search phrase for an epoch-millis pointer.
fn created_phrase(since: &str) -> Option<String> {
    let millis = since.trim().parse::<i64>().ok()?;
    let at = Utc.timestamp_millis_opt(millis).single()?;
    Some(format!("created:>={}", at.format("%Y-%m-%d")))
}

#[async_trait]
impl PageSource for GitHub {
    async fn fetch(&mut self, since: &str, cursor: Option<&str>) -> Result<Page> {
        let response = self.http.execute(&self.request(since, cursor)).await?;
        let entries = LogEntry::parse_array(&response.body)?;
        Ok(Page::new(entries, response.next_link()))
    }
}

#[async_trait]
impl Connector for GitHub {
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
    use std::time::Duration;

    fn config() -> ConnectorConfig {
        ConnectorConfig::new("gh-audit", "github", "acme").with_key("ghp_token")
    }

    #[test]
    fn test_created_phrase() {
        assert_eq!(
            created_phrase("1704153600000").as_deref(),
            Some("created:>=2024-01-02")
        );
        assert_eq!(created_phrase("not-a-number"), None);
    }

    #[tokio::test]
    async fn test_first_page_request() {
        let (http, transport, _) = client(vec![Ok(Response::new(200)
            .with_header(
                "Link",
                concat!(
                    r#"<https://api.github.com/orgs/acme/audit-log?after=c2>; rel="next", "#,
                    r#"<https://api.github.com/orgs/acme/audit-log?before=c0>; rel="prev""#,
                ),
            )
            .with_body(
                r#"[{"@timestamp":1704153600000,"_document_id":"b","action":"repo.create"},
                    {"@timestamp":1704153600000,"_document_id":"a","action":"repo.destroy"}]"#,
            ))]);
        let mut github = GitHub::new(&config().with_operation("web"), http).unwrap();

        let page = github.fetch("1704067200000", None).await.unwrap();
        assert_eq!(page.entries.len(), 2);
        assert_eq!(
            page.next_cursor(),
            Some("https://api.github.com/orgs/acme/audit-log?after=c2")
        );

        let sent = &transport.requests()[0];
        assert_eq!(sent.url, "https://api.github.com/orgs/acme/audit-log");
        assert!(sent
            .query
            .contains(&("include".to_string(), "web".to_string())));
        assert!(sent
            .query
            .contains(&("phrase".to_string(), "created:>=2024-01-01".to_string())));
        assert!(sent
            .headers
            .contains(&("Authorization".to_string(), "Bearer ghp_token".to_string())));
    }

    #[tokio::test]
    async fn test_forbidden_rate_limit_is_retried() {
        let (http, transport, sleeper) = client(vec![
            Ok(Response::new(403)
                .with_header("X-RateLimit-Remaining", "0")
                .with_header("Retry-After", "60")
                .with_body(r#"{"message":"API rate limit exceeded"}"#)),
            Ok(Response::new(200)
                .with_body(r#"[{"@timestamp":1704153600000,"_document_id":"a"}]"#)),
        ]);
        let mut github = GitHub::new(&config(), http).unwrap();

        let page = github.fetch("1704067200000", None).await.unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(transport.requests().len(), 2);
        assert_eq!(*sleeper.sleeps.lock().unwrap(), vec![Duration::from_secs(60)]);
    }

    #[tokio::test]
    async fn test_forbidden_without_quota_headers_fails() {
        let (http, _, sleeper) = client(vec![Ok(Response::new(403)
            .with_body(r#"{"message":"Must have admin rights to Repository."}"#))]);
        let mut github = GitHub::new(&config(), http).unwrap();

        let err = github.fetch("1704067200000", None).await.unwrap_err();
        assert!(matches!(err, Error::RequestFailed { status: Some(403), .. }));
        assert!(sleeper.sleeps.lock().unwrap().is_empty());
    }

    #[test]
    fn test_spec_breaks_ties_by_document_id() {
        let (http, _, _) = client(vec![]);
        let github = GitHub::new(&config(), http).unwrap();
        assert_eq!(github.spec().engine.order(), LogOrder::ReverseChronological);
        assert_eq!(github.include, "all");
    }
}
