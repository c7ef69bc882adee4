//! SharePoint Online document library via Microsoft Graph.
//!
//! Authenticates with the OAuth2 client-credentials flow, resolves the site
//! id from hostname + site name and the site's default drive once at
//! [`SharePointSource::connect`], then serves folder listings and documents
//! from that drive.
//!
//! Folder `/` is the drive root (`/drives/{id}/root/children`); any other
//! folder is addressed by path (`/drives/{id}/root:/{path}:/children`).
//! Listings follow `@odata.nextLink` until exhausted. A document's
//! `read_access_entity` is the set of user and group ids granted access by
//! the item's permissions.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::SharePointConfig;
use crate::error::SourceError;
use crate::extract::{extension_of, extract_text, matches_format};
use crate::models::SourceDocument;

use super::{DocumentSource, ROOT_FOLDER};

const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
/// Refresh the token this long before the service says it expires.
const TOKEN_SKEW: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Deserialize)]
struct Page<T> {
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveItem {
    id: String,
    name: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    created_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    last_modified_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    created_by: Option<IdentitySet>,
    #[serde(default)]
    last_modified_by: Option<IdentitySet>,
    #[serde(default)]
    folder: Option<serde_json::Value>,
    #[serde(default)]
    file: Option<serde_json::Value>,
    #[serde(default)]
    web_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentitySet {
    #[serde(default)]
    user: Option<Identity>,
    #[serde(default)]
    group: Option<Identity>,
    #[serde(default)]
    site_user: Option<Identity>,
    #[serde(default)]
    site_group: Option<Identity>,
    #[serde(default)]
    application: Option<Identity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Identity {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Permission {
    #[serde(default)]
    granted_to_v2: Option<IdentitySet>,
    #[serde(default)]
    granted_to_identities_v2: Vec<IdentitySet>,
}

impl IdentitySet {
    /// Email, else display name, of whoever acted.
    fn actor(&self) -> String {
        [&self.user, &self.application, &self.site_user]
            .into_iter()
            .flatten()
            .find_map(|i| i.email.clone().or_else(|| i.display_name.clone()))
            .unwrap_or_default()
    }

    fn principal_ids(&self) -> impl Iterator<Item = &str> {
        [&self.user, &self.group, &self.site_user, &self.site_group]
            .into_iter()
            .flatten()
            .filter_map(|i| i.id.as_deref())
    }
}

pub struct SharePointSource {
    http: reqwest::Client,
    graph_base: Url,
    token_url: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
    drive_id: String,
}

impl SharePointSource {
    /// Authenticate and resolve the site's default drive.
    pub async fn connect(config: &SharePointConfig, client_secret: &str) -> Result<Self, SourceError> {
        let graph_base = Url::parse(config.graph_base.trim_end_matches('/'))
            .map_err(|e| SourceError::InvalidResponse(format!("bad graph_base: {}", e)))?;

        let mut source = Self {
            http: reqwest::Client::new(),
            graph_base,
            token_url: format!(
                "{}/{}/oauth2/v2.0/token",
                config.login_base.trim_end_matches('/'),
                config.tenant_id
            ),
            client_id: config.client_id.clone(),
            client_secret: client_secret.to_string(),
            token: Mutex::new(None),
            drive_id: String::new(),
        };

        let site_url = source.url(&[
            "sites",
            &format!("{}:", config.site_hostname),
            "sites",
            &config.site_name,
        ])?;
        let site: IdOnly = source.get_json(site_url).await?;
        info!(site_id = %site.id, "resolved SharePoint site");

        let drive_url = source.url(&["sites", &site.id, "drive"])?;
        let drive: IdOnly = source.get_json(drive_url).await?;
        debug!(drive_id = %drive.id, "resolved default drive");
        source.drive_id = drive.id;

        Ok(source)
    }

    fn url(&self, segments: &[&str]) -> Result<Url, SourceError> {
        let mut url = self.graph_base.clone();
        url.path_segments_mut()
            .map_err(|_| SourceError::InvalidResponse("graph_base cannot be a base URL".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn children_url(&self, folder: &str) -> Result<Url, SourceError> {
        let parts: Vec<&str> = folder.split('/').filter(|p| !p.is_empty()).collect();
        let Some((last, rest)) = parts.split_last() else {
            return self.url(&["drives", &self.drive_id, "root", "children"]);
        };
        // `root:/a/b:` addresses an item by path; the colons delimit the path.
        let last = format!("{}:", last);
        let mut segments = vec!["drives", self.drive_id.as_str(), "root:"];
        segments.extend(rest.iter().copied());
        segments.push(&last);
        segments.push("children");
        self.url(&segments)
    }

    async fn access_token(&self) -> Result<String, SourceError> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", GRAPH_SCOPE),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Auth(format!("token endpoint returned HTTP {}: {}", status, body)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Auth(e.to_string()))?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_SKEW);
        let mut cache = self.token.lock().unwrap_or_else(|e| e.into_inner());
        *cache = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    fn cached_token(&self) -> Option<String> {
        let cache = self.token.lock().unwrap_or_else(|e| e.into_inner());
        cache
            .as_ref()
            .filter(|t| Instant::now() < t.expires_at)
            .map(|t| t.value.clone())
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, SourceError> {
        let token = self.access_token().await?;
        Ok(self.http.get(url).bearer_auth(token).send().await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, SourceError> {
        let response = self.get(url).await?;
        if !response.status().is_success() {
            return Err(http_error(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))
    }

    /// All items of a paged collection. `Ok(None)` on 404.
    async fn get_all<T: DeserializeOwned>(&self, url: Url) -> Result<Option<Vec<T>>, SourceError> {
        let mut items = Vec::new();
        let mut next = Some(url);
        while let Some(url) = next.take() {
            let response = self.get(url).await?;
            if response.status() == StatusCode::NOT_FOUND && items.is_empty() {
                return Ok(None);
            }
            if !response.status().is_success() {
                return Err(http_error(response).await);
            }
            let page: Page<T> = response
                .json()
                .await
                .map_err(|e| SourceError::InvalidResponse(e.to_string()))?;
            items.extend(page.value);
            next = page
                .next_link
                .map(|link| Url::parse(&link))
                .transpose()
                .map_err(|e| SourceError::InvalidResponse(format!("bad nextLink: {}", e)))?;
        }
        Ok(Some(items))
    }

    async fn download(&self, item_id: &str) -> Result<Vec<u8>, SourceError> {
        let url = self.url(&["drives", &self.drive_id, "items", item_id, "content"])?;
        let response = self.get(url).await?;
        if !response.status().is_success() {
            return Err(http_error(response).await);
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn principals(&self, item_id: &str) -> Result<BTreeSet<String>, SourceError> {
        let url = self.url(&["drives", &self.drive_id, "items", item_id, "permissions"])?;
        let permissions: Vec<Permission> = self.get_all(url).await?.unwrap_or_default();
        let mut principals = BTreeSet::new();
        for permission in &permissions {
            let sets = permission
                .granted_to_v2
                .iter()
                .chain(permission.granted_to_identities_v2.iter());
            for set in sets {
                principals.extend(set.principal_ids().map(str::to_string));
            }
        }
        Ok(principals)
    }

    async fn to_document(&self, item: DriveItem, folder: &str) -> Result<SourceDocument, SourceError> {
        let extension = extension_of(&item.name).unwrap_or_default();
        let bytes = self.download(&item.id).await?;
        let content = extract_text(&bytes, &extension)
            .map_err(|e| SourceError::InvalidResponse(format!("{}: {}", item.name, e)))?;
        let read_access_entity = self.principals(&item.id).await?;

        let created_by = item.created_by.unwrap_or_default().actor();
        let last_modified_by = item.last_modified_by.unwrap_or_default().actor();
        Ok(SourceDocument {
            id: item.id,
            content,
            name: item.name,
            created_datetime: item.created_date_time.unwrap_or_default(),
            created_by,
            last_modified_datetime: item.last_modified_date_time.unwrap_or_default(),
            last_modified_by,
            size: item.size,
            source: item.web_url.unwrap_or_else(|| folder.to_string()),
            read_access_entity,
        })
    }
}

async fn http_error(response: reqwest::Response) -> SourceError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    SourceError::Http { status, body }
}

#[async_trait]
impl DocumentSource for SharePointSource {
    fn kind(&self) -> &str {
        "sharepoint"
    }

    async fn list_folders(&self) -> Result<Vec<String>, SourceError> {
        let mut folders = Vec::new();
        // Depth-first, children in listing order.
        let mut pending = vec![(
            self.url(&["drives", &self.drive_id, "root", "children"])?,
            String::new(),
        )];

        while let Some((url, path)) = pending.pop() {
            folders.push(if path.is_empty() {
                ROOT_FOLDER.to_string()
            } else {
                path.clone()
            });

            let children: Vec<DriveItem> = self.get_all(url).await?.unwrap_or_default();
            let mut subfolders = Vec::new();
            for child in children.into_iter().filter(|c| c.folder.is_some()) {
                let url = self.url(&["drives", &self.drive_id, "items", &child.id, "children"])?;
                subfolders.push((url, format!("{}/{}", path, child.name)));
            }
            pending.extend(subfolders.into_iter().rev());
        }

        Ok(folders)
    }

    async fn fetch_documents(
        &self,
        folder: &str,
        formats: &[String],
    ) -> Result<Option<Vec<SourceDocument>>, SourceError> {
        let Some(items) = self.get_all::<DriveItem>(self.children_url(folder)?).await? else {
            return Ok(None);
        };

        let mut documents = Vec::new();
        for item in items {
            if item.file.is_none() || !matches_format(&item.name, formats) {
                continue;
            }
            let name = item.name.clone();
            match self.to_document(item, folder).await {
                Ok(doc) => documents.push(doc),
                Err(e) => warn!(folder, file = %name, error = %e, "skipping SharePoint file"),
            }
        }

        debug!(folder, count = documents.len(), "SharePoint folder fetched");
        Ok((!documents.is_empty()).then_some(documents))
    }
}
