use crate::errors::{AppError, AppResult};
use crate::models::{AckResponse, CheckUpdatesResponse, NotebookDocument, ReloadPayload, SaveResponse};
use crate::sync::transport::SyncTransport;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;

pub const CHECK_UPDATES_PATH: &str = "/api/notebook/check-updates";
pub const RELOAD_PATH: &str = "/api/notebook";
pub const ACKNOWLEDGE_PATH: &str = "/api/notebook/acknowledge";
pub const SAVE_PATH: &str = "/api/save";

/// Talks to the notebook web server.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> AppResult<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(AppError::Invalid("server url cannot be empty".to_string()));
        }
        // The notebook server is local; proxy settings from the environment do not apply.
        let client = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self { client, base_url })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> AppResult<T> {
        let url = self.url(path);
        let response = self.client.get(&url).send().await?;
        decode(&url, response).await
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> AppResult<T> {
        let url = self.url(path);
        let response = self.client.post(&url).json(&body).send().await?;
        decode(&url, response).await
    }
}

async fn decode<T: DeserializeOwned>(url: &str, response: reqwest::Response) -> AppResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::Transport(format!(
            "{} returned {}: {}",
            url,
            status,
            body.trim()
        )));
    }
    response
        .json::<T>()
        .await
        .map_err(|error| AppError::Transport(format!("invalid response from {}: {}", url, error)))
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn check_updates(&self) -> AppResult<CheckUpdatesResponse> {
        self.get_json(CHECK_UPDATES_PATH).await
    }

    async fn reload(&self) -> AppResult<ReloadPayload> {
        self.get_json(RELOAD_PATH).await
    }

    async fn acknowledge(&self) -> AppResult<AckResponse> {
        self.post_json(ACKNOWLEDGE_PATH, json!({})).await
    }

    async fn save(&self, document: &NotebookDocument) -> AppResult<SaveResponse> {
        self.post_json(
            SAVE_PATH,
            json!({ "include_session": false, "cells": document.cells }),
        )
        .await
    }
}
