//! HTTP node client
//!
//! Talks to the routes in [`crate::api`]. Every query it sends is marked
//! `remote`, so the receiving node runs it locally without fanning out.

use bitframe_core::cluster::{Node, NodeClient, NodeStatus};
use bitframe_core::query::{ExecOptions, QueryResponse};
use bitframe_core::{Error, Result};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct HttpClient {
    http: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { http })
    }

    async fn send(&self, host: &str, request: reqwest::RequestBuilder) -> Result<Response> {
        let resp = request
            .send()
            .await
            .map_err(|e| Error::remote(host, e.to_string()))?;
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or(body);
        Err(Error::remote(host, format!("{}: {}", status, message)))
    }

    async fn get_json<T: DeserializeOwned>(&self, host: &str, path: &str) -> Result<T> {
        let resp = self.send(host, self.http.get(url(host, path))).await?;
        resp.json().await.map_err(|e| Error::remote(host, e.to_string()))
    }
}

fn url(host: &str, path: &str) -> String {
    format!("http://{}{}", host, path)
}

fn query_path(db: &str, options: &ExecOptions) -> String {
    let mut path = format!("/db/{}/query?remote=true", db);
    if options.profiles {
        path.push_str("&profiles=true");
    }
    if let Some(slices) = &options.slices {
        let list: Vec<String> = slices.iter().map(u64::to_string).collect();
        path.push_str("&slices=");
        path.push_str(&list.join(","));
    }
    path
}

impl NodeClient for HttpClient {
    async fn execute_query(
        &self,
        host: &str,
        db: &str,
        query: &str,
        options: &ExecOptions,
    ) -> Result<QueryResponse> {
        let request = self
            .http
            .post(url(host, &query_path(db, options)))
            .body(query.to_string());
        let resp = self.send(host, request).await?;
        resp.json().await.map_err(|e| Error::remote(host, e.to_string()))
    }

    async fn status(&self, host: &str) -> Result<NodeStatus> {
        self.get_json(host, "/status").await
    }

    async fn max_slices(&self, host: &str) -> Result<BTreeMap<String, u64>> {
        self.get_json(host, "/slices/max").await
    }

    async fn fragment_nodes(&self, host: &str, db: &str, slice: u64) -> Result<Vec<Node>> {
        self.get_json(host, &format!("/fragment/nodes?db={}&slice={}", db, slice))
            .await
    }

    async fn backup_fragment(
        &self,
        host: &str,
        db: &str,
        frame: &str,
        slice: u64,
    ) -> Result<Option<Vec<u8>>> {
        let path = format!("/fragment/data?db={}&frame={}&slice={}", db, frame, slice);
        let resp = self.send(host, self.http.get(url(host, &path))).await?;
        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let data = resp
            .bytes()
            .await
            .map_err(|e| Error::remote(host, e.to_string()))?;
        Ok(Some(data.to_vec()))
    }

    async fn restore_fragment(
        &self,
        host: &str,
        db: &str,
        frame: &str,
        slice: u64,
        data: Vec<u8>,
    ) -> Result<()> {
        let path = format!("/fragment/data?db={}&frame={}&slice={}", db, frame, slice);
        self.send(host, self.http.post(url(host, &path)).body(data))
            .await?;
        Ok(())
    }
}
