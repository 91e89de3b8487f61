//! Traction Rec REST client and snapshot fetcher.
//!
//! Each fetch runs a SOQL query against the remote query endpoint, follows
//! `nextRecordsUrl` until the result set is complete and writes the records
//! into the current snapshot directory.

use crate::atomic::write_json;
use crate::config::{NetworkConfig, Settings};
use crate::snapshot::{new_snapshot_name, SnapshotKind};
use crate::{ImportError, Result};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const PROGRAMS_QUERY: &str = "SELECT Id, Name, TREX1__Available__c, TREX1__Description__c \
     FROM TREX1__Program__c";
const CATEGORIES_QUERY: &str = "SELECT Id, Name, TREX1__Program__r.Id, \
     TREX1__Program_Category__r.Id, TREX1__Program_Category__r.Name \
     FROM TREX1__Program_Category_Tag__c";
const CLASSES_QUERY: &str = "SELECT Id, Name, TREX1__Available__c, TREX1__Description__c, \
     TREX1__Rich_Description__c, TREX1__Program__r.Id, TREX1__Program__r.Name \
     FROM TREX1__Course__c";
const SESSIONS_QUERY: &str = "SELECT TREX1__Course_Option__r.Id, TREX1__Course_Option__r.Name, \
     TREX1__Course_Option__r.TREX1__Start_Date__c, TREX1__Course_Option__r.TREX1__End_Date__c, \
     TREX1__Course_Option__r.TREX1__Start_Time__c, TREX1__Course_Option__r.TREX1__End_Time__c, \
     TREX1__Course_Option__r.TREX1__Day_of_Week__c, TREX1__Course_Option__r.TREX1__Capacity__c, \
     TREX1__Course_Option__r.TREX1__Location__r.Name, TREX1__Course_Session__r.Id, \
     TREX1__Course_Session__r.TREX1__Course__r.Id \
     FROM TREX1__Course_Session_Option__c \
     WHERE TREX1__Course_Option__r.TREX1__Available__c = true";

/// Issues bearer tokens for the remote API.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// Token taken from settings or the `TRACTION_REC_ACCESS_TOKEN` environment variable.
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            token: settings.resolved_access_token(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String> {
        self.token
            .clone()
            .ok_or(ImportError::MissingSetting("access_token"))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    records: Vec<Value>,
    #[serde(default = "default_done")]
    done: bool,
    next_records_url: Option<String>,
}

fn default_done() -> bool {
    true
}

/// Client for the Traction Rec query API.
pub struct TractionRecClient {
    client: Client,
    base_url: String,
    api_version: String,
    tokens: Arc<dyn TokenProvider>,
}

impl TractionRecClient {
    pub fn new(settings: &Settings, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        if settings.services_base_url.trim().is_empty() {
            return Err(ImportError::MissingSetting("services_base_url"));
        }

        let client = Client::builder()
            .timeout(NetworkConfig::REQUEST_TIMEOUT)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| ImportError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                cause: None,
            })?;

        Ok(Self {
            client,
            base_url: settings.services_base_url.trim_end_matches('/').to_string(),
            api_version: settings.api_version.clone(),
            tokens,
        })
    }

    /// Run a SOQL query and collect every page of records.
    pub async fn query(&self, soql: &str) -> Result<Vec<Value>> {
        let token = self.tokens.access_token().await?;
        let first_url = format!("{}/services/data/{}/query", self.base_url, self.api_version);

        let mut page = self
            .fetch_page(
                self.client
                    .get(&first_url)
                    .query(&[("q", soql)])
                    .bearer_auth(&token),
            )
            .await?;
        let mut records = std::mem::take(&mut page.records);

        let mut pages = 1;
        while !page.done {
            let Some(next) = page.next_records_url.take() else {
                break;
            };
            if pages >= NetworkConfig::MAX_QUERY_PAGES {
                return Err(ImportError::RemoteApi {
                    message: format!("query exceeded {} pages", NetworkConfig::MAX_QUERY_PAGES),
                    status_code: 0,
                });
            }

            debug!("Fetching next page {}", next);
            page = self
                .fetch_page(
                    self.client
                        .get(format!("{}{}", self.base_url, next))
                        .bearer_auth(&token),
                )
                .await?;
            records.append(&mut page.records);
            pages += 1;
        }

        Ok(records)
    }

    async fn fetch_page(&self, request: reqwest::RequestBuilder) -> Result<QueryResponse> {
        let response = request
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(ImportError::RemoteApi {
                message: body,
                status_code: status.as_u16(),
            });
        }

        Ok(response.json::<QueryResponse>().await?)
    }
}

/// Pulls remote data into one dated snapshot directory.
pub struct TractionRecFetcher {
    client: TractionRecClient,
    json_directory: PathBuf,
}

impl TractionRecFetcher {
    /// Fetcher writing into a new snapshot directory under `settings.json_directory`.
    pub fn new(settings: &Settings, client: TractionRecClient) -> Self {
        Self {
            client,
            json_directory: settings.json_directory.join(new_snapshot_name()),
        }
    }

    /// Directory of the batch this fetcher writes.
    pub fn json_directory(&self) -> &Path {
        &self.json_directory
    }

    pub async fn fetch_programs_and_categories(&self) -> Result<()> {
        self.fetch_kind(SnapshotKind::Programs, PROGRAMS_QUERY).await?;
        self.fetch_kind(SnapshotKind::Categories, CATEGORIES_QUERY)
            .await?;
        Ok(())
    }

    pub async fn fetch_classes(&self) -> Result<()> {
        self.fetch_kind(SnapshotKind::Classes, CLASSES_QUERY).await?;
        Ok(())
    }

    pub async fn fetch_sessions(&self) -> Result<()> {
        self.fetch_kind(SnapshotKind::Sessions, SESSIONS_QUERY).await?;
        Ok(())
    }

    /// Fetch every record kind; returns the snapshot directory.
    pub async fn fetch(&self) -> Result<PathBuf> {
        info!(
            "Fetching Traction Rec data into {}",
            self.json_directory.display()
        );
        self.fetch_programs_and_categories().await?;
        self.fetch_classes().await?;
        self.fetch_sessions().await?;
        Ok(self.json_directory.clone())
    }

    async fn fetch_kind(&self, kind: SnapshotKind, soql: &str) -> Result<usize> {
        let records = self.client.query(soql).await?;
        let path = self.json_directory.join(kind.file_name());
        write_json(&path, &records)?;
        info!("Saved {} {:?} records to {}", records.len(), kind, path.display());
        Ok(records.len())
    }
}
