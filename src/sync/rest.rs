//! Row backend over a PostgREST-style HTTP API

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::remote::{RemoteMemory, RemoteMemoryDraft, RemoteMemoryStore};
use crate::error::{Result, SoulSnapsError};

/// Default table holding memory rows
pub const DEFAULT_TABLE: &str = "memories";

/// Remote memory rows behind `{base_url}/rest/v1/{table}`
pub struct RestRemoteStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    table: String,
}

impl RestRemoteStore {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            table: DEFAULT_TABLE.to_string(),
        }
    }

    pub fn with_table(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(SoulSnapsError::Remote(format!("Status {}: {}", status, body)))
    }

    /// Mutations return the affected rows; expect exactly one
    async fn single_row(response: reqwest::Response, remote_id: Option<&str>) -> Result<RemoteMemory> {
        let rows: Vec<RemoteMemory> = Self::check(response).await?.json().await?;
        rows.into_iter().next().ok_or_else(|| {
            SoulSnapsError::Remote(match remote_id {
                Some(id) => format!("remote memory {} does not exist", id),
                None => "backend returned no row".to_string(),
            })
        })
    }
}

#[derive(Serialize)]
struct FavoritePatch {
    is_favorite: bool,
    updated_at: DateTime<Utc>,
}

#[async_trait]
impl RemoteMemoryStore for RestRemoteStore {
    async fn insert(&self, draft: &RemoteMemoryDraft) -> Result<RemoteMemory> {
        let response = self
            .request(reqwest::Method::POST, &self.table_url())
            .header("Prefer", "return=representation")
            .json(draft)
            .send()
            .await?;
        Self::single_row(response, None).await
    }

    async fn update(&self, remote_id: &str, draft: &RemoteMemoryDraft) -> Result<RemoteMemory> {
        let response = self
            .request(reqwest::Method::PATCH, &self.table_url())
            .query(&[("id", format!("eq.{}", remote_id))])
            .header("Prefer", "return=representation")
            .json(draft)
            .send()
            .await?;
        Self::single_row(response, Some(remote_id)).await
    }

    async fn set_favorite(
        &self,
        remote_id: &str,
        is_favorite: bool,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let response = self
            .request(reqwest::Method::PATCH, &self.table_url())
            .query(&[("id", format!("eq.{}", remote_id))])
            .header("Prefer", "return=representation")
            .json(&FavoritePatch {
                is_favorite,
                updated_at,
            })
            .send()
            .await?;
        Self::single_row(response, Some(remote_id)).await?;
        Ok(())
    }

    async fn delete(&self, remote_id: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::DELETE, &self.table_url())
            .query(&[("id", format!("eq.{}", remote_id))])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<RemoteMemory>> {
        let response = self
            .request(reqwest::Method::GET, &self.table_url())
            .query(&[
                ("user_id", format!("eq.{}", user_id)),
                ("order", "created_at.asc".to_string()),
            ])
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}
