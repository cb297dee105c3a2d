//! Blocking HTTP client for a Dropbox-API-v2-style object store.
//!
//! RPC endpoints take JSON bodies; content endpoints carry the argument in
//! the `Dropbox-API-Arg` header and the payload in the body. The client does
//! no retrying of its own: every transport or protocol failure is terminal
//! for the calling filesystem operation.

use std::time::SystemTime;

use serde::Deserialize;
use serde_json::json;

use crate::{
    remote::{Metadata, MetadataSource, RemoteStore, Revision},
    Error, Result,
};

const API_BASE: &str = "https://api.dropboxapi.com";
const CONTENT_BASE: &str = "https://content.dropboxapi.com";

pub struct HttpStore {
    http: reqwest::blocking::Client,
    token: String,
    api_base: String,
    content_base: String,
}

/// Wire form of a metadata entry as returned by `get_metadata`,
/// `list_folder` and the `Dropbox-API-Result` header.
#[derive(Debug, Deserialize)]
struct WireEntry {
    #[serde(rename = ".tag")]
    tag: Option<String>,
    name: Option<String>,
    size: Option<u64>,
    server_modified: Option<String>,
    rev: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireListFolder {
    entries: Vec<WireEntry>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error_summary: String,
}

impl WireEntry {
    fn into_metadata(self) -> Metadata {
        let modified = self
            .server_modified
            .as_deref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(SystemTime::from)
            .unwrap_or_else(SystemTime::now);
        if self.tag.as_deref() == Some("folder") {
            Metadata::directory()
        } else {
            Metadata {
                is_dir: false,
                size: self.size.unwrap_or(0),
                modified,
                rev: self.rev,
            }
        }
    }
}

/// The API spells the root as the empty string rather than `/`.
fn wire_path(path: &str) -> &str {
    if path == "/" {
        ""
    } else {
        path
    }
}

impl HttpStore {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_endpoints(token, API_BASE, CONTENT_BASE)
    }

    pub fn with_endpoints(
        token: impl Into<String>,
        api_base: impl Into<String>,
        content_base: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::blocking::Client::new(),
            token: token.into(),
            api_base: api_base.into(),
            content_base: content_base.into(),
        }
    }

    /// Translate a failed response into the crate error taxonomy. 409 bodies
    /// carry an `error_summary` distinguishing missing paths from revision
    /// conflicts.
    fn protocol_error(path: &str, status: u16, body: &str) -> Error {
        if status == 409 {
            let summary = serde_json::from_str::<WireError>(body)
                .map(|e| e.error_summary)
                .unwrap_or_else(|_| body.to_string());
            if summary.contains("not_found") {
                return Error::NotFound(path.to_string());
            }
            if summary.contains("conflict") {
                return Error::Conflict {
                    path: path.to_string(),
                    expected: "stale revision".into(),
                };
            }
            return Error::Remote(summary);
        }
        Error::Remote(format!("{path}: http {status}: {body}"))
    }

    fn rpc(&self, endpoint: &str, path: &str, body: serde_json::Value) -> Result<String> {
        let resp = self
            .http
            .post(format!("{}{endpoint}", self.api_base))
            .bearer_auth(&self.token)
            .json(&body)
            .send()?;
        let status = resp.status().as_u16();
        let text = resp.text()?;
        if status != 200 {
            return Err(Self::protocol_error(path, status, &text).into());
        }
        Ok(text)
    }
}

impl MetadataSource for HttpStore {
    fn metadata(&self, path: &str) -> Result<Option<Metadata>> {
        // The root folder has no metadata endpoint of its own.
        if path == "/" {
            return Ok(Some(Metadata::directory()));
        }
        match self.rpc("/2/files/get_metadata", path, json!({ "path": path })) {
            Ok(body) => {
                let entry: WireEntry = serde_json::from_str(&body).map_err(Error::Serde)?;
                Ok(Some(entry.into_metadata()))
            }
            Err(err) => match err.downcast_ref::<Error>() {
                Some(Error::NotFound(_)) => Ok(None),
                _ => Err(err),
            },
        }
    }

    fn list_folder(&self, path: &str) -> Result<Vec<(String, Metadata)>> {
        let mut out = Vec::new();
        let body = self.rpc(
            "/2/files/list_folder",
            path,
            json!({ "path": wire_path(path) }),
        )?;
        let mut page: WireListFolder = serde_json::from_str(&body).map_err(Error::Serde)?;
        loop {
            for entry in page.entries.drain(..) {
                let name = entry.name.clone().unwrap_or_default();
                out.push((name, entry.into_metadata()));
            }
            if !page.has_more {
                break;
            }
            let body = self.rpc(
                "/2/files/list_folder/continue",
                path,
                json!({ "cursor": page.cursor }),
            )?;
            page = serde_json::from_str(&body).map_err(Error::Serde)?;
        }
        Ok(out)
    }
}

impl RemoteStore for HttpStore {
    fn get_content(&self, path: &str) -> Result<Option<(Vec<u8>, Revision)>> {
        let arg = json!({ "path": path }).to_string();
        let resp = self
            .http
            .post(format!("{}/2/files/download", self.content_base))
            .bearer_auth(&self.token)
            .header("Dropbox-API-Arg", arg)
            .send()?;
        let status = resp.status().as_u16();
        if status != 200 {
            let text = resp.text()?;
            return match Self::protocol_error(path, status, &text) {
                Error::NotFound(_) => Ok(None),
                err => Err(err.into()),
            };
        }
        // Revision rides alongside the payload in a result header.
        let result_header = resp
            .headers()
            .get("dropbox-api-result")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::Remote(format!("{path}: missing api-result header")))?
            .to_string();
        let entry: WireEntry = serde_json::from_str(&result_header).map_err(Error::Serde)?;
        let rev = entry
            .rev
            .ok_or_else(|| Error::Remote(format!("{path}: download without revision")))?;
        let bytes = resp.bytes()?.to_vec();
        Ok(Some((bytes, rev)))
    }

    fn put_content(
        &self,
        path: &str,
        data: &[u8],
        parent_rev: Option<&Revision>,
    ) -> Result<Revision> {
        let mode = match parent_rev {
            Some(rev) => json!({ ".tag": "update", "update": rev }),
            None => json!("overwrite"),
        };
        let arg = json!({ "path": path, "mode": mode, "autorename": false }).to_string();
        let resp = self
            .http
            .post(format!("{}/2/files/upload", self.content_base))
            .bearer_auth(&self.token)
            .header("Dropbox-API-Arg", arg)
            .header("Content-Type", "application/octet-stream")
            .body(data.to_vec())
            .send()?;
        let status = resp.status().as_u16();
        let text = resp.text()?;
        if status != 200 {
            return Err(Self::protocol_error(path, status, &text).into());
        }
        let entry: WireEntry = serde_json::from_str(&text).map_err(Error::Serde)?;
        entry
            .rev
            .ok_or_else(|| Error::Remote(format!("{path}: upload without revision")).into())
    }

    fn move_object(&self, from: &str, to: &str) -> Result<()> {
        self.rpc(
            "/2/files/move_v2",
            from,
            json!({ "from_path": from, "to_path": to }),
        )
        .map(|_| ())
    }

    fn copy_object(&self, from: &str, to: &str) -> Result<()> {
        self.rpc(
            "/2/files/copy_v2",
            from,
            json!({ "from_path": from, "to_path": to }),
        )
        .map(|_| ())
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.rpc("/2/files/delete_v2", path, json!({ "path": path }))
            .map(|_| ())
    }

    fn create_folder(&self, path: &str) -> Result<()> {
        self.rpc("/2/files/create_folder_v2", path, json!({ "path": path }))
            .map(|_| ())
    }
}
