//! Steam workshop catalog fetch
//!
//! Two Web API calls: the collection listing yields the published file ids,
//! then the file details call yields one title per id. The result becomes
//! the map catalog.

use async_trait::async_trait;
use mapvote::{MapEntry, VoteConfig};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::service::ServiceInput;

const COLLECTION_DETAILS_URL: &str =
    "https://api.steampowered.com/ISteamRemoteStorage/GetCollectionDetails/v1/";
const FILE_DETAILS_URL: &str =
    "https://api.steampowered.com/ISteamRemoteStorage/GetPublishedFileDetails/v1/";

#[derive(Debug, Error)]
pub enum WorkshopError {
    #[error("workshop credentials are not configured")]
    MissingCredentials,

    #[error("workshop request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("collection {0} has no items")]
    EmptyCollection(String),
}

pub type WorkshopResult<T> = Result<T, WorkshopError>;

/// Anything that can produce the playable map list
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch(&self) -> WorkshopResult<Vec<MapEntry>>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    response: T,
}

#[derive(Debug, Deserialize)]
struct CollectionResponse {
    #[serde(default)]
    collectiondetails: Vec<CollectionDetails>,
}

#[derive(Debug, Deserialize)]
struct CollectionDetails {
    #[serde(default)]
    children: Vec<CollectionChild>,
}

#[derive(Debug, Deserialize)]
struct CollectionChild {
    publishedfileid: String,
}

#[derive(Debug, Deserialize)]
struct FileDetailsResponse {
    #[serde(default)]
    publishedfiledetails: Vec<FileDetails>,
}

#[derive(Debug, Deserialize)]
struct FileDetails {
    publishedfileid: String,
    #[serde(default)]
    title: Option<String>,
}

/// Published file ids of the first collection in a `GetCollectionDetails` body
fn parse_collection(body: &str) -> serde_json::Result<Vec<String>> {
    let envelope: Envelope<CollectionResponse> = serde_json::from_str(body)?;
    Ok(envelope
        .response
        .collectiondetails
        .into_iter()
        .next()
        .map(|details| {
            details
                .children
                .into_iter()
                .map(|c| c.publishedfileid)
                .collect()
        })
        .unwrap_or_default())
}

/// Map entries from a `GetPublishedFileDetails` body. Items without a title
/// fall back to their id.
fn parse_file_details(body: &str) -> serde_json::Result<Vec<MapEntry>> {
    let envelope: Envelope<FileDetailsResponse> = serde_json::from_str(body)?;
    Ok(envelope
        .response
        .publishedfiledetails
        .into_iter()
        .map(|item| {
            let title = item
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| item.publishedfileid.clone());
            MapEntry::new(item.publishedfileid, title)
        })
        .collect())
}

/// Steam Web API backed source
#[derive(Debug, Clone)]
pub struct SteamWorkshopSource {
    client: reqwest::Client,
    api_key: String,
    collection_id: String,
}

impl SteamWorkshopSource {
    pub fn new(api_key: impl Into<String>, collection_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            collection_id: collection_id.into(),
        }
    }

    pub fn from_config(config: &VoteConfig) -> Self {
        Self::new(config.steam_api_key.clone(), config.collection_id.clone())
    }

    async fn collection_items(&self) -> WorkshopResult<Vec<String>> {
        let form = [
            ("key", self.api_key.as_str()),
            ("collectioncount", "1"),
            ("publishedfileids[0]", self.collection_id.as_str()),
        ];
        let body = self
            .client
            .post(COLLECTION_DETAILS_URL)
            .form(&form)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(parse_collection(&body).unwrap_or_else(|e| {
            warn!(error = %e, "Malformed collection response");
            Vec::new()
        }))
    }

    async fn item_details(&self, ids: &[String]) -> WorkshopResult<Vec<MapEntry>> {
        let mut form = vec![
            ("key".to_string(), self.api_key.clone()),
            ("itemcount".to_string(), ids.len().to_string()),
        ];
        form.extend(
            ids.iter()
                .enumerate()
                .map(|(i, id)| (format!("publishedfileids[{i}]"), id.clone())),
        );
        let body = self
            .client
            .post(FILE_DETAILS_URL)
            .form(&form)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(parse_file_details(&body).unwrap_or_else(|e| {
            warn!(error = %e, "Malformed file details response");
            Vec::new()
        }))
    }
}

#[async_trait]
impl CatalogSource for SteamWorkshopSource {
    async fn fetch(&self) -> WorkshopResult<Vec<MapEntry>> {
        if self.api_key.is_empty() || self.collection_id.is_empty() {
            return Err(WorkshopError::MissingCredentials);
        }
        let ids = self.collection_items().await?;
        if ids.is_empty() {
            return Err(WorkshopError::EmptyCollection(self.collection_id.clone()));
        }
        self.item_details(&ids).await
    }
}

/// Fetch once in the background and hand the result to the service loop.
/// A failed fetch is logged and the loop keeps its current catalog.
pub fn spawn_refresh(
    source: impl CatalogSource + 'static,
    tx: mpsc::Sender<ServiceInput>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match source.fetch().await {
            Ok(maps) => {
                info!(maps = maps.len(), "Workshop catalog fetched");
                if tx.send(ServiceInput::CatalogUpdated(maps)).await.is_err() {
                    warn!("Service loop closed before the catalog arrived");
                }
            }
            Err(e) => warn!(error = %e, "Workshop catalog fetch failed"),
        }
    })
}
