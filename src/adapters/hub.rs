use crate::domain::model::HubRepository;
use crate::utils::error::{ImagenieError, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_HUB_URL: &str = "https://hub.docker.com";

#[derive(Debug, Deserialize)]
struct RepositoryPage {
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    results: Vec<HubRepository>,
}

/// Lists repositories under a Docker Hub namespace.
#[derive(Debug, Clone)]
pub struct DockerHubClient {
    client: Client,
    base_url: String,
    page_size: u32,
    max_pages: u32,
}

impl DockerHubClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("imagenie/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            page_size: 100,
            max_pages: 100,
        })
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Walks `?page=1,2,..` until a page fails, comes back empty, or has no
    /// `next` link. A failure on the first page is an error; later failures
    /// end the listing.
    pub async fn list_repositories(&self, org: &str) -> Result<Vec<HubRepository>> {
        let url = format!("{}/v2/repositories/{}/", self.base_url, org);
        let mut repositories = Vec::new();

        for page in 1..=self.max_pages {
            tracing::debug!("Fetching {} page {}", url, page);
            let response = self
                .client
                .get(&url)
                .query(&[("page", page), ("page_size", self.page_size)])
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                if page == 1 {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ImagenieError::HubError {
                        status: status.as_u16(),
                        message: body.chars().take(200).collect(),
                    });
                }
                tracing::warn!(
                    "⚠️ Page {} of {} returned {}; keeping the {} repositories listed so far",
                    page,
                    org,
                    status,
                    repositories.len()
                );
                break;
            }

            let body: RepositoryPage = response.json().await?;
            if body.results.is_empty() {
                break;
            }

            let mut results = body.results;
            for repo in &mut results {
                if repo.namespace.is_empty() {
                    repo.namespace = org.to_string();
                }
            }
            repositories.extend(results);

            if body.next.is_none() {
                break;
            }
            if page == self.max_pages {
                tracing::warn!(
                    "⚠️ Stopped listing {} after {} pages; raise hub.max_pages to see more",
                    org,
                    self.max_pages
                );
            }
        }

        tracing::info!("📦 Found {} repositories under {}", repositories.len(), org);
        Ok(repositories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn test_single_page_without_next() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/v2/repositories/acme/")
                .query_param("page", "1");
            then.status(200).json_body(serde_json::json!({
                "count": 2,
                "next": null,
                "results": [
                    {"name": "bwa", "namespace": "acme", "pull_count": 10,
                     "last_updated": "2024-03-01T10:00:00.000000Z"},
                    {"name": "samtools", "namespace": "acme", "description": null}
                ]
            }));
        });

        let client = DockerHubClient::new(&server.base_url()).unwrap();
        let repos = client.list_repositories("acme").await.unwrap();

        mock.assert();
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].name, "bwa");
        assert_eq!(repos[0].namespace, "acme");
        assert_eq!(repos[1].image("latest").docker_ref(), "acme/samtools:latest");
    }

    #[tokio::test]
    async fn test_first_page_error_is_reported() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v2/repositories/missing/");
            then.status(404).body("{\"message\":\"object not found\"}");
        });

        let client = DockerHubClient::new(&server.base_url()).unwrap();
        let err = client.list_repositories("missing").await.unwrap_err();
        assert!(matches!(err, ImagenieError::HubError { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_max_pages_guard() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/v2/repositories/loop/");
            then.status(200).json_body(serde_json::json!({
                "next": "https://hub.docker.com/v2/repositories/loop/?page=2",
                "results": [{"name": "again", "namespace": "loop"}]
            }));
        });

        let client = DockerHubClient::new(&server.base_url())
            .unwrap()
            .with_max_pages(3);
        let repos = client.list_repositories("loop").await.unwrap();

        mock.assert_hits(3);
        assert_eq!(repos.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_page_ends_listing_even_with_next() {
        let server = MockServer::start();
        let first = server.mock(|when, then| {
            when.method(GET)
                .path("/v2/repositories/acme/")
                .query_param("page", "1");
            then.status(200).json_body(serde_json::json!({
                "next": "https://hub.docker.com/v2/repositories/acme/?page=2",
                "results": [{"name": "bwa", "namespace": "acme"}]
            }));
        });
        let second = server.mock(|when, then| {
            when.method(GET)
                .path("/v2/repositories/acme/")
                .query_param("page", "2");
            then.status(200).json_body(serde_json::json!({
                "next": "https://hub.docker.com/v2/repositories/acme/?page=3",
                "results": []
            }));
        });
        let third = server.mock(|when, then| {
            when.method(GET)
                .path("/v2/repositories/acme/")
                .query_param("page", "3");
            then.status(200).json_body(serde_json::json!({
                "next": null,
                "results": [{"name": "never", "namespace": "acme"}]
            }));
        });

        let client = DockerHubClient::new(&server.base_url()).unwrap();
        let repos = client.list_repositories("acme").await.unwrap();

        first.assert();
        second.assert();
        third.assert_hits(0);
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].name, "bwa");
    }

    #[tokio::test]
    async fn test_later_page_error_keeps_earlier_results() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/v2/repositories/acme/")
                .query_param("page", "1");
            then.status(200).json_body(serde_json::json!({
                "next": "https://hub.docker.com/v2/repositories/acme/?page=2",
                "results": [
                    {"name": "bwa", "namespace": "acme"},
                    {"name": "samtools", "namespace": "acme"}
                ]
            }));
        });
        let failing = server.mock(|when, then| {
            when.method(GET)
                .path("/v2/repositories/acme/")
                .query_param("page", "2");
            then.status(503).body("upstream unavailable");
        });
        let after = server.mock(|when, then| {
            when.method(GET)
                .path("/v2/repositories/acme/")
                .query_param("page", "3");
            then.status(200).json_body(serde_json::json!({
                "next": null,
                "results": [{"name": "never", "namespace": "acme"}]
            }));
        });

        let client = DockerHubClient::new(&server.base_url()).unwrap();
        let repos = client.list_repositories("acme").await.unwrap();

        failing.assert();
        after.assert_hits(0);
        let names: Vec<&str> = repos.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["bwa", "samtools"]);
    }
}
