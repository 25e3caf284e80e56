//! Typed wrapper over the server's HTTP API.
//!
//! One `reqwest::Client` serves every call; its timeout is set well past the
//! server's 60 s long-poll window so `poll` completes normally on timeout.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;

use models::{Delta, LongpollResponse, Metadata, Token};

const HEADER_USERNAME: &str = "X-Cloudsyncer-Username";
const HEADER_TOKEN: &str = "X-Cloudsyncer-Authtoken";
const HTTP_TIMEOUT: Duration = Duration::from_secs(90);

pub struct HttpClient {
    base: Url,
    http: reqwest::Client,
    username: String,
    token: String,
}

/// Outcome of the `check_upload` probe.
#[derive(Debug, Clone)]
pub enum CheckUpload {
    /// 204: content unknown, upload required.
    NeedContent,
    /// 200: the exact file is already current.
    Current(Metadata),
    /// 201: known content was linked under a fresh revision.
    Linked(Metadata),
}

impl HttpClient {
    pub fn new(base: &str, username: String, token: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("building http client")?;
        Ok(Self {
            base: Url::parse(base).with_context(|| format!("invalid server url {base}"))?,
            http,
            username,
            token,
        })
    }

    /// Register a new account, returning the session token.
    pub async fn register(
        server: &str,
        username: &str,
        password: &str,
        computername: &str,
    ) -> Result<String> {
        let resp = reqwest::Client::new()
            .post(format!("{}/register", server.trim_end_matches('/')))
            .form(&[
                ("username", username),
                ("password", password),
                ("computername", computername),
            ])
            .send()
            .await?;
        if resp.status() != StatusCode::OK {
            bail!("register failed: {}", resp.status());
        }
        Ok(resp.json::<Token>().await?.authencity_token)
    }

    /// Log in to an existing account, returning a fresh session token.
    pub async fn login(
        server: &str,
        username: &str,
        password: &str,
        computername: &str,
    ) -> Result<String> {
        let resp = reqwest::Client::new()
            .post(format!("{}/login", server.trim_end_matches('/')))
            .form(&[
                ("username", username),
                ("password", password),
                ("computername", computername),
            ])
            .send()
            .await?;
        if resp.status() != StatusCode::OK {
            bail!("login failed: {}", resp.status());
        }
        Ok(resp.json::<Token>().await?.authencity_token)
    }

    fn authed(&self, rb: RequestBuilder) -> RequestBuilder {
        rb.header(HEADER_USERNAME, &self.username)
            .header(HEADER_TOKEN, &self.token)
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(path);
        url
    }

    /// Endpoint whose suffix is a filesystem path; `set_path` percent-escapes
    /// what needs escaping.
    fn file_endpoint(&self, prefix: &str, server_path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(&format!("{prefix}{server_path}"));
        url
    }

    async fn expect_json<T: DeserializeOwned>(what: &str, resp: Response) -> Result<T> {
        if resp.status() != StatusCode::OK {
            bail!("{what} received wrong status: {}", resp.status());
        }
        Ok(resp.json().await?)
    }

    /// Upload the file at `local` under `server_path`, returning the
    /// metadata of the revision the server created.
    pub async fn upload(&self, local: &Path, server_path: &str) -> Result<Metadata> {
        let body = tokio::fs::read(local)
            .await
            .with_context(|| format!("reading {}", local.display()))?;
        let resp = self
            .authed(self.http.put(self.file_endpoint("/files_put", server_path)))
            .body(body)
            .send()
            .await?;
        Self::expect_json("upload", resp).await
    }

    pub async fn mkdir(&self, server_path: &str) -> Result<Metadata> {
        let resp = self
            .authed(self.http.post(self.endpoint("/create_folder")))
            .form(&[("path", server_path)])
            .send()
            .await?;
        Self::expect_json("create_folder", resp).await
    }

    pub async fn remove(&self, server_path: &str) -> Result<Metadata> {
        let resp = self
            .authed(self.http.post(self.endpoint("/remove")))
            .form(&[("path", server_path)])
            .send()
            .await?;
        Self::expect_json("remove", resp).await
    }

    /// Long-poll for changes past `cursor`. Returns whether a delta is worth
    /// fetching; `false` is the server-side timeout.
    pub async fn poll(&self, cursor: &str) -> Result<bool> {
        let mut url = self.endpoint("/longpoll_delta");
        url.query_pairs_mut().append_pair("cursor", cursor);
        let resp = self.authed(self.http.get(url)).send().await?;
        let poll: LongpollResponse = Self::expect_json("longpoll_delta", resp).await?;
        Ok(poll.changes)
    }

    /// Fetch changes past `cursor`; an empty cursor requests the full state.
    pub async fn get_delta(&self, cursor: &str) -> Result<Delta> {
        let resp = self
            .authed(self.http.post(self.endpoint("/delta")))
            .form(&[("cursor", cursor)])
            .send()
            .await?;
        Self::expect_json("delta", resp).await
    }

    /// Download content of `server_path`. The caller streams the body so the
    /// byte count can be verified against the expected size.
    pub async fn get_file(&self, server_path: &str, rev: i64) -> Result<Response> {
        let mut url = self.file_endpoint("/files", server_path);
        if rev > 0 {
            url.query_pairs_mut().append_pair("rev", &rev.to_string());
        }
        let resp = self.authed(self.http.get(url)).send().await?;
        if resp.status() != StatusCode::OK {
            bail!("download received wrong status: {}", resp.status());
        }
        Ok(resp)
    }

    /// Ask whether an upload can be skipped because the server already holds
    /// the content.
    pub async fn check_upload(
        &self,
        server_path: &str,
        size: i64,
        hash: &str,
        name: &str,
    ) -> Result<CheckUpload> {
        let resp = self
            .authed(self.http.post(self.endpoint("/check_upload")))
            .form(&[
                ("filepath", server_path),
                ("size", &size.to_string()),
                ("hash", hash),
                ("name", name),
            ])
            .send()
            .await?;
        match resp.status() {
            StatusCode::NO_CONTENT => Ok(CheckUpload::NeedContent),
            StatusCode::OK => Ok(CheckUpload::Current(resp.json().await?)),
            StatusCode::CREATED => Ok(CheckUpload::Linked(resp.json().await?)),
            status => bail!("check_upload received wrong status: {status}"),
        }
    }
}
