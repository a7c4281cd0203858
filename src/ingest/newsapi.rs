// src/ingest/newsapi.rs
//! NewsAPI.org `everything` endpoint.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::SourceProvider;
use crate::article::NewArticle;
use crate::config::NewsApiSettings;

#[derive(Debug, Deserialize)]
struct EverythingResponse {
    status: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<RawArticle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArticle {
    #[serde(default)]
    source: Option<RawSource>,
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    published_at: Option<DateTime<Utc>>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    name: Option<String>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

impl RawArticle {
    /// Drops entries without a URL. Body text: content, else description, else title.
    fn into_new_article(self) -> Option<NewArticle> {
        let url = non_empty(self.url)?;
        let title = non_empty(self.title.clone()).unwrap_or_else(|| url.clone());
        let raw_text = non_empty(self.content)
            .or_else(|| non_empty(self.description))
            .or_else(|| non_empty(self.title));
        Some(NewArticle {
            title,
            source: self.source.and_then(|s| non_empty(s.name)),
            url,
            published_at: self.published_at,
            raw_text,
        })
    }
}

pub struct NewsApiProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    language: String,
}

impl NewsApiProvider {
    pub fn new(settings: &NewsApiSettings) -> Result<Self> {
        if settings.api_key.trim().is_empty() {
            bail!("NewsAPI key is not configured");
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("news-enrichment/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            language: settings.language.clone(),
        })
    }
}

#[async_trait]
impl SourceProvider for NewsApiProvider {
    async fn fetch(&self, query: &str, limit: usize) -> Result<Vec<NewArticle>> {
        let page_size = limit.to_string();
        let resp = self
            .http
            .get(format!("{}/everything", self.base_url))
            .header("X-Api-Key", &self.api_key)
            .query(&[
                ("q", query),
                ("pageSize", page_size.as_str()),
                ("language", self.language.as_str()),
                ("sortBy", "relevancy"),
            ])
            .send()
            .await
            .context("NewsAPI request failed")?;

        let status = resp.status();
        let body: EverythingResponse = resp
            .json()
            .await
            .with_context(|| format!("NewsAPI returned unreadable body (HTTP {status})"))?;
        if !status.is_success() || body.status != "ok" {
            return Err(anyhow!(
                "NewsAPI error: HTTP {} {}: {}",
                status.as_u16(),
                body.code.unwrap_or_default(),
                body.message.unwrap_or_default()
            ));
        }
        Ok(body
            .articles
            .into_iter()
            .filter_map(RawArticle::into_new_article)
            .collect())
    }

    fn name(&self) -> &'static str {
        "newsapi"
    }
}
