//! Remote object store clients
//!
//! [`DriveObjectStore`] talks to a Drive-v3-style HTTP API and keeps the
//! budget file in the account's application-private folder.
//! [`MemoryObjectStore`] is an in-process stand-in with failure injection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::config::RemoteSettings;
use crate::error::{StorageError, StorageResult};
use crate::models::ProviderIdentity;

const APP_DATA_SPACE: &str = "appDataFolder";
const REQUEST_TIMEOUT_SECS: u64 = 20;

/// Metadata of a stored remote file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
}

/// Operations the remote provider needs from an object store
///
/// Every call takes the bearer token explicitly. An expired or revoked
/// token surfaces as [`StorageError::AuthenticationFailed`].
#[async_trait]
pub trait RemoteObjectStore: Send + Sync {
    /// Find a file by exact name in the application-private area
    async fn find_file(&self, token: &str, name: &str) -> StorageResult<Option<RemoteFile>>;

    /// File contents, or `None` if the file no longer exists
    async fn download(&self, token: &str, file_id: &str) -> StorageResult<Option<String>>;

    /// Create a file holding `contents`
    async fn create_file(&self, token: &str, name: &str, contents: &str)
        -> StorageResult<RemoteFile>;

    /// Overwrite a file; `false` if it no longer exists
    async fn update_file(&self, token: &str, file_id: &str, contents: &str) -> StorageResult<bool>;

    /// Delete a file; deleting a missing file succeeds
    async fn delete_file(&self, token: &str, file_id: &str) -> StorageResult<()>;

    /// Revoke the token
    async fn revoke(&self, token: &str) -> StorageResult<()>;

    /// The account the token belongs to
    async fn user_identity(&self, token: &str) -> StorageResult<ProviderIdentity>;
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<RemoteFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AboutUser {
    display_name: Option<String>,
    email_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct About {
    user: AboutUser,
}

/// HTTP client for a Drive-v3-style API
#[derive(Debug, Clone)]
pub struct DriveObjectStore {
    api_base_url: String,
    upload_base_url: String,
    revoke_url: String,
    http: Client,
}

impl DriveObjectStore {
    pub fn new(settings: &RemoteSettings) -> StorageResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| StorageError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            upload_base_url: settings.upload_base_url.trim_end_matches('/').to_string(),
            revoke_url: settings.revoke_url.clone(),
            http,
        })
    }

    fn file_url(&self, file_id: &str) -> String {
        format!("{}/files/{}", self.api_base_url, file_id)
    }
}

/// Map a non-success response to an error
async fn check(response: Response, operation: &str) -> StorageResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    debug!(operation, %status, body = %body, "Remote request failed");

    Err(match status {
        StatusCode::UNAUTHORIZED => {
            StorageError::AuthenticationFailed("Remote session expired, sign in again".to_string())
        }
        StatusCode::FORBIDDEN => StorageError::remote(format!(
            "Remote storage refused {} (insufficient permission or rate limited)",
            operation
        )),
        _ => StorageError::remote(format!("Remote {} failed with status {}", operation, status)),
    })
}

#[async_trait]
impl RemoteObjectStore for DriveObjectStore {
    async fn find_file(&self, token: &str, name: &str) -> StorageResult<Option<RemoteFile>> {
        let query = format!("name = '{}' and trashed = false", name.replace('\'', "\\'"));
        let response = self
            .http
            .get(format!("{}/files", self.api_base_url))
            .bearer_auth(token)
            .query(&[
                ("spaces", APP_DATA_SPACE),
                ("q", query.as_str()),
                ("fields", "files(id,name)"),
                ("pageSize", "10"),
            ])
            .send()
            .await?;

        let list: FileList = check(response, "lookup").await?.json().await?;
        Ok(list.files.into_iter().next())
    }

    async fn download(&self, token: &str, file_id: &str) -> StorageResult<Option<String>> {
        let response = self
            .http
            .get(self.file_url(file_id))
            .bearer_auth(token)
            .query(&[("alt", "media")])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(check(response, "download").await?.text().await?))
    }

    async fn create_file(
        &self,
        token: &str,
        name: &str,
        contents: &str,
    ) -> StorageResult<RemoteFile> {
        let metadata = json!({
            "name": name,
            "parents": [APP_DATA_SPACE],
            "mimeType": "application/json",
        });
        let response = self
            .http
            .post(format!("{}/files", self.api_base_url))
            .bearer_auth(token)
            .query(&[("fields", "id,name")])
            .json(&metadata)
            .send()
            .await?;
        let file: RemoteFile = check(response, "create").await?.json().await?;

        // An interrupted upload leaves an empty file that the next lookup reuses
        self.update_file(token, &file.id, contents).await?;
        Ok(file)
    }

    async fn update_file(&self, token: &str, file_id: &str, contents: &str) -> StorageResult<bool> {
        let response = self
            .http
            .patch(format!("{}/files/{}", self.upload_base_url, file_id))
            .bearer_auth(token)
            .query(&[("uploadType", "media")])
            .header(header::CONTENT_TYPE, "application/json")
            .body(contents.to_string())
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check(response, "upload").await?;
        Ok(true)
    }

    async fn delete_file(&self, token: &str, file_id: &str) -> StorageResult<()> {
        let response = self
            .http
            .delete(self.file_url(file_id))
            .bearer_auth(token)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(response, "delete").await?;
        Ok(())
    }

    async fn revoke(&self, token: &str) -> StorageResult<()> {
        let response = self
            .http
            .post(&self.revoke_url)
            .query(&[("token", token)])
            .send()
            .await?;
        check(response, "revoke").await?;
        Ok(())
    }

    async fn user_identity(&self, token: &str) -> StorageResult<ProviderIdentity> {
        let response = self
            .http
            .get(format!("{}/about", self.api_base_url))
            .bearer_auth(token)
            .query(&[("fields", "user(displayName,emailAddress)")])
            .send()
            .await?;
        let about: About = check(response, "identity lookup").await?.json().await?;

        Ok(ProviderIdentity {
            display_name: about
                .user
                .display_name
                .or_else(|| about.user.email_address.clone())
                .unwrap_or_else(|| "Remote account".to_string()),
            email: about.user.email_address,
        })
    }
}

#[derive(Default)]
struct MemoryFiles {
    files: HashMap<String, (String, String)>,
    revoked: Vec<String>,
}

/// In-process object store
///
/// Counts creates so duplicate-file bugs are observable, and can simulate
/// an unreachable backend, an expired token, or a create whose response
/// is lost after the file was stored.
#[derive(Default)]
pub struct MemoryObjectStore {
    state: Mutex<MemoryFiles>,
    creates: AtomicUsize,
    updates: AtomicUsize,
    offline: AtomicBool,
    reject_tokens: AtomicBool,
    lose_next_create_response: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file
    pub fn insert_file(&self, name: &str, contents: &str) -> RemoteFile {
        let id = Uuid::new_v4().to_string();
        self.lock()
            .files
            .insert(id.clone(), (name.to_string(), contents.to_string()));
        RemoteFile {
            id,
            name: name.to_string(),
        }
    }

    /// Contents of the first file named `name`
    pub fn contents(&self, name: &str) -> Option<String> {
        self.lock()
            .files
            .values()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c.clone())
    }

    pub fn file_count(&self) -> usize {
        self.lock().files.len()
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Tokens passed to `revoke`
    pub fn revoked_tokens(&self) -> Vec<String> {
        self.lock().revoked.clone()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Answer every authenticated call as if the token had expired
    pub fn set_reject_tokens(&self, reject: bool) {
        self.reject_tokens.store(reject, Ordering::SeqCst);
    }

    /// Store the next created file but report the create as failed
    pub fn lose_next_create_response(&self) {
        self.lose_next_create_response.store(true, Ordering::SeqCst);
    }

    fn guard(&self) -> StorageResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::offline("Remote storage unreachable"));
        }
        if self.reject_tokens.load(Ordering::SeqCst) {
            return Err(StorageError::AuthenticationFailed(
                "Remote session expired, sign in again".to_string(),
            ));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryFiles> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RemoteObjectStore for MemoryObjectStore {
    async fn find_file(&self, _token: &str, name: &str) -> StorageResult<Option<RemoteFile>> {
        self.guard()?;
        Ok(self
            .lock()
            .files
            .iter()
            .find(|(_, (n, _))| n == name)
            .map(|(id, (n, _))| RemoteFile {
                id: id.clone(),
                name: n.clone(),
            }))
    }

    async fn download(&self, _token: &str, file_id: &str) -> StorageResult<Option<String>> {
        self.guard()?;
        Ok(self.lock().files.get(file_id).map(|(_, c)| c.clone()))
    }

    async fn create_file(
        &self,
        _token: &str,
        name: &str,
        contents: &str,
    ) -> StorageResult<RemoteFile> {
        self.guard()?;
        self.creates.fetch_add(1, Ordering::SeqCst);
        let file = self.insert_file(name, contents);
        if self.lose_next_create_response.swap(false, Ordering::SeqCst) {
            return Err(StorageError::offline("Connection dropped"));
        }
        Ok(file)
    }

    async fn update_file(&self, _token: &str, file_id: &str, contents: &str) -> StorageResult<bool> {
        self.guard()?;
        match self.lock().files.get_mut(file_id) {
            Some(entry) => {
                entry.1 = contents.to_string();
                self.updates.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_file(&self, _token: &str, file_id: &str) -> StorageResult<()> {
        self.guard()?;
        self.lock().files.remove(file_id);
        Ok(())
    }

    async fn revoke(&self, token: &str) -> StorageResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::offline("Remote storage unreachable"));
        }
        self.lock().revoked.push(token.to_string());
        Ok(())
    }

    async fn user_identity(&self, _token: &str) -> StorageResult<ProviderIdentity> {
        self.guard()?;
        Ok(ProviderIdentity {
            display_name: "Test User".to_string(),
            email: Some("test@example.com".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_create_find_update() {
        let store = MemoryObjectStore::new();
        assert!(store.find_file("t", "budget.json").await.unwrap().is_none());

        let file = store.create_file("t", "budget.json", "{}").await.unwrap();
        let found = store.find_file("t", "budget.json").await.unwrap().unwrap();
        assert_eq!(found, file);

        assert!(store.update_file("t", &file.id, "[1]").await.unwrap());
        assert_eq!(store.download("t", &file.id).await.unwrap().as_deref(), Some("[1]"));
        assert!(!store.update_file("t", "missing", "x").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_store_failure_modes() {
        let store = MemoryObjectStore::new();
        store.set_offline(true);
        assert!(store.find_file("t", "x").await.unwrap_err().is_offline());

        store.set_offline(false);
        store.set_reject_tokens(true);
        assert!(store
            .download("t", "x")
            .await
            .unwrap_err()
            .requires_authentication());
    }

    #[tokio::test]
    async fn test_lost_create_response_still_stores_file() {
        let store = MemoryObjectStore::new();
        store.lose_next_create_response();
        assert!(store.create_file("t", "budget.json", "{}").await.is_err());
        assert_eq!(store.file_count(), 1);
        assert!(store.create_file("t", "other.json", "{}").await.is_ok());
    }

    #[test]
    fn test_drive_store_trims_urls() {
        let settings = RemoteSettings {
            api_base_url: "https://drive.example.com/v3/".into(),
            ..RemoteSettings::default()
        };
        let store = DriveObjectStore::new(&settings).unwrap();
        assert_eq!(store.file_url("abc"), "https://drive.example.com/v3/files/abc");
    }
}
