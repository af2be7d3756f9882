//! Screenshot session store.
//!
//! Layout under the root:
//!
//! ```text
//! current-session
//! <session_id>/<host_slug>/<image_id>.{jpg,png}
//! <session_id>/<host_slug>/<image_id>.json
//! ```
//!
//! Session and image ids derive from millisecond timestamps, forced strictly
//! increasing so two ids minted in the same millisecond never collide.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use pageshot_core::cache::write_atomic;
use pageshot_core::{CapturedPage, Dimensions, Error, ExportFormat, ViewportMode};

const CURRENT_SESSION_FILE: &str = "current-session";

/// URL prefix under which the store root is served.
pub const STATIC_PREFIX: &str = "/static/screenshots";

/// Directory-safe form of a host: lowercase, dots become underscores.
pub fn host_slug(host: &str) -> String {
    let slug: String = host
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| match c {
            '.' => '_',
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' => c,
            _ => '-',
        })
        .collect();
    if slug.is_empty() { "unknown".to_string() } else { slug }
}

fn extension_for(mime: &str) -> &'static str {
    if mime == ExportFormat::Png.mime() { ExportFormat::Png.extension() } else { ExportFormat::Jpeg.extension() }
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn store_err(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Store(format!("{}: {e}", path.display()))
}

/// Metadata written next to each image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMeta {
    pub page_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
    pub mode: ViewportMode,
    pub mime: String,
    pub dimensions: Dimensions,
    pub source_dimensions: Dimensions,
    pub captured_at: DateTime<Utc>,
}

/// An image on disk, as listed to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredImage {
    pub image_id: String,
    pub session_id: String,
    pub host: String,
    pub image_url: String,
    #[serde(flatten)]
    pub meta: ImageMeta,
    #[serde(skip)]
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSummary {
    pub host: String,
    pub images: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub images: usize,
    pub hosts: Vec<HostSummary>,
}

struct Ids {
    current: String,
    last: i64,
}

pub struct SessionStore {
    root: PathBuf,
    ids: Mutex<Ids>,
}

impl SessionStore {
    /// Open the store, resuming the session named in `current-session` or starting one.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|e| store_err(&root, e))?;

        let marker = root.join(CURRENT_SESSION_FILE);
        let resumed = match tokio::fs::read_to_string(&marker).await {
            Ok(text) => Some(text.trim().to_string()).filter(|id| is_valid_id(id)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(store_err(&marker, e)),
        };

        let last = resumed.as_deref().and_then(|id| id.parse::<i64>().ok()).unwrap_or(0);
        let store = Self { root, ids: Mutex::new(Ids { current: resumed.clone().unwrap_or_default(), last }) };

        match resumed {
            Some(id) => tracing::info!(session = %id, "resumed screenshot session"),
            None => {
                store.new_session().await?;
            }
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn next_id(ids: &mut Ids) -> i64 {
        let id = Utc::now().timestamp_millis().max(ids.last + 1);
        ids.last = id;
        id
    }

    pub async fn current(&self) -> String {
        self.ids.lock().await.current.clone()
    }

    /// Start a new session and make it current.
    pub async fn new_session(&self) -> Result<String, Error> {
        let mut ids = self.ids.lock().await;
        let id = Self::next_id(&mut ids).to_string();

        let dir = self.root.join(&id);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| store_err(&dir, e))?;
        let marker = self.root.join(CURRENT_SESSION_FILE);
        write_atomic(&marker, id.as_bytes()).await.map_err(|e| store_err(&marker, e))?;

        ids.current = id.clone();
        tracing::info!(session = %id, "started screenshot session");
        Ok(id)
    }

    /// Persist a captured page into the current session.
    pub async fn store(&self, page: &CapturedPage) -> Result<StoredImage, Error> {
        let (session_id, image_id) = {
            let mut ids = self.ids.lock().await;
            (ids.current.clone(), format!("{}-{}", Self::next_id(&mut ids), page.mode))
        };

        let slug = host_slug(&page.host);
        let dir = self.root.join(&session_id).join(&slug);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| store_err(&dir, e))?;

        let file_name = format!("{image_id}.{}", extension_for(&page.mime));
        let path = dir.join(&file_name);

        let meta = ImageMeta {
            page_url: page.page_url.clone(),
            page_title: page.title.clone(),
            mode: page.mode,
            mime: page.mime.clone(),
            dimensions: page.dimensions,
            source_dimensions: page.source_dimensions,
            captured_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&meta).map_err(|e| store_err(&path, e))?;

        write_atomic(&path, &page.image).await.map_err(|e| store_err(&path, e))?;
        let meta_path = dir.join(format!("{image_id}.json"));
        write_atomic(&meta_path, &json).await.map_err(|e| store_err(&meta_path, e))?;

        tracing::debug!(session = %session_id, image = %image_id, bytes = page.image.len(), "stored screenshot");

        Ok(StoredImage {
            image_url: format!("{STATIC_PREFIX}/{session_id}/{slug}/{file_name}"),
            image_id,
            session_id,
            host: slug,
            meta,
            path,
        })
    }

    /// Every image of `session`, oldest first.
    pub async fn list(&self, session: &str) -> Result<Vec<StoredImage>, Error> {
        if !is_valid_id(session) {
            return Err(Error::InvalidInput(format!("invalid session id: {session}")));
        }
        let session_dir = self.root.join(session);
        let mut images = Vec::new();

        let mut hosts = match tokio::fs::read_dir(&session_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(images),
            Err(e) => return Err(store_err(&session_dir, e)),
        };

        while let Some(host) = hosts.next_entry().await.map_err(|e| store_err(&session_dir, e))? {
            let host_dir = host.path();
            if !host_dir.is_dir() {
                continue;
            }
            let slug = host.file_name().to_string_lossy().into_owned();

            let mut files = tokio::fs::read_dir(&host_dir).await.map_err(|e| store_err(&host_dir, e))?;
            while let Some(file) = files.next_entry().await.map_err(|e| store_err(&host_dir, e))? {
                let meta_path = file.path();
                if meta_path.extension().is_none_or(|ext| ext != "json") {
                    continue;
                }
                let Some(image_id) = meta_path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                    continue;
                };

                let meta: ImageMeta = match tokio::fs::read(&meta_path).await.map(|b| serde_json::from_slice(&b)) {
                    Ok(Ok(meta)) => meta,
                    Ok(Err(e)) => {
                        tracing::warn!(path = %meta_path.display(), "skipping unreadable image metadata: {e}");
                        continue;
                    }
                    Err(e) => return Err(store_err(&meta_path, e)),
                };

                let file_name = format!("{image_id}.{}", extension_for(&meta.mime));
                images.push(StoredImage {
                    image_url: format!("{STATIC_PREFIX}/{session}/{slug}/{file_name}"),
                    path: host_dir.join(&file_name),
                    image_id,
                    session_id: session.to_string(),
                    host: slug.clone(),
                    meta,
                });
            }
        }

        images.sort_by(|a, b| a.image_id.cmp(&b.image_id));
        Ok(images)
    }

    pub async fn summary(&self, session: &str) -> Result<SessionSummary, Error> {
        let images = self.list(session).await?;
        let mut hosts: BTreeMap<String, usize> = BTreeMap::new();
        for image in &images {
            *hosts.entry(image.host.clone()).or_default() += 1;
        }
        Ok(SessionSummary {
            session_id: session.to_string(),
            images: images.len(),
            hosts: hosts.into_iter().map(|(host, images)| HostSummary { host, images }).collect(),
        })
    }

    /// Delete every image of `session`. Returns the number of images removed.
    pub async fn purge_session(&self, session: &str) -> Result<usize, Error> {
        let removed = self.list(session).await?.len();
        let dir = self.root.join(session);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(store_err(&dir, e)),
        }
        tokio::fs::create_dir_all(&dir).await.map_err(|e| store_err(&dir, e))?;
        tracing::info!(session, removed, "purged session");
        Ok(removed)
    }

    /// Delete the images of one host in `session`.
    pub async fn purge_host(&self, session: &str, host: &str) -> Result<usize, Error> {
        let slug = host_slug(host);
        let removed = self.list(session).await?.iter().filter(|image| image.host == slug).count();
        let dir = self.root.join(session).join(&slug);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(store_err(&dir, e)),
        }
        tracing::info!(session, host = %slug, removed, "purged host");
        Ok(removed)
    }

    pub async fn read_image(&self, image: &StoredImage) -> Result<Vec<u8>, Error> {
        tokio::fs::read(&image.path).await.map_err(|e| store_err(&image.path, e))
    }
}
