use std::path::PathBuf;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use secrecy::ExposeSecret;

use crate::attachments::AttachmentCache;
use crate::domain::Attachment;
use crate::domain::FetchMode;
use crate::domain::Tenant;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    #[error("attachment fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("invalid base64 attachment: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("filesystem attachment read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("attachment fetch timed out")]
    Timeout,
    #[error("attachment requires an http_url/endpoint base but tenant has none configured")]
    MissingEndpoint,
}

pub struct ResolvedAttachment {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

/// Resolves attachment descriptors to bytes via the `fetch_mode` contract in
/// spec.md §4.4, consulting the cache (keyed by `content_md5`) before
/// dispatching to a fetcher.
pub struct AttachmentResolver {
    http: Client,
    cache: Option<AttachmentCache>,
    filesystem_base_dir: PathBuf,
}

impl AttachmentResolver {
    pub fn new(http: Client, cache: Option<AttachmentCache>, filesystem_base_dir: PathBuf) -> Self {
        Self {
            http,
            cache,
            filesystem_base_dir,
        }
    }

    pub async fn resolve(
        &self,
        attachment: &Attachment,
        tenant: &Tenant,
    ) -> Result<ResolvedAttachment, AttachmentError> {
        if let (Some(cache), Some(md5)) = (&self.cache, &attachment.content_md5) {
            if let Some(bytes) = cache.get(md5).await {
                return Ok(ResolvedAttachment {
                    filename: attachment.filename.clone(),
                    bytes,
                    mime_type: attachment.mime_type.clone(),
                });
            }
        }

        let bytes = tokio::time::timeout(FETCH_TIMEOUT, self.fetch(attachment, tenant))
            .await
            .map_err(|_| AttachmentError::Timeout)??;

        if let (Some(cache), Some(md5)) = (&self.cache, &attachment.content_md5) {
            cache.put(md5, bytes.clone()).await;
        }

        Ok(ResolvedAttachment {
            filename: attachment.filename.clone(),
            bytes,
            mime_type: attachment.mime_type.clone(),
        })
    }

    async fn fetch(
        &self,
        attachment: &Attachment,
        tenant: &Tenant,
    ) -> Result<Vec<u8>, AttachmentError> {
        match &attachment.fetch_mode {
            FetchMode::Base64 => Ok(BASE64.decode(&attachment.storage_path)?),
            FetchMode::HttpUrl { url } => {
                let mut req = self.http.get(url);
                if let Some(auth) = &attachment.auth {
                    if let Some(token) = &auth.bearer_token {
                        req = req.bearer_auth(token.expose_secret());
                    }
                }
                let resp = req.send().await?.error_for_status()?;
                Ok(resp.bytes().await?.to_vec())
            }
            FetchMode::Endpoint => {
                let base = tenant
                    .attachment_url(&attachment.storage_path)
                    .ok_or(AttachmentError::MissingEndpoint)?;
                let mut req = self.http.get(&base);
                req = apply_tenant_auth(req, tenant);
                let resp = req.send().await?.error_for_status()?;
                Ok(resp.bytes().await?.to_vec())
            }
            FetchMode::Filesystem { path } => {
                let resolved = resolve_filesystem_path(&self.filesystem_base_dir, path);
                Ok(tokio::fs::read(resolved).await?)
            }
        }
    }
}

fn apply_tenant_auth(req: reqwest::RequestBuilder, tenant: &Tenant) -> reqwest::RequestBuilder {
    match &tenant.client_auth {
        crate::domain::ClientAuth::None => req,
        crate::domain::ClientAuth::Bearer { token } => req.bearer_auth(token.expose_secret()),
        crate::domain::ClientAuth::Basic { user, password } => {
            req.basic_auth(user, Some(password.expose_secret()))
        }
    }
}

fn resolve_filesystem_path(base_dir: &std::path::Path, path: &str) -> PathBuf {
    let candidate = PathBuf::from(path);
    if candidate.is_absolute() {
        candidate
    } else {
        base_dir.join(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_joins_base_dir() {
        let base = PathBuf::from("/var/mailcore/attachments");
        assert_eq!(
            resolve_filesystem_path(&base, "inbox/a.pdf"),
            PathBuf::from("/var/mailcore/attachments/inbox/a.pdf")
        );
    }

    #[test]
    fn absolute_path_is_used_verbatim() {
        let base = PathBuf::from("/var/mailcore/attachments");
        assert_eq!(
            resolve_filesystem_path(&base, "/etc/other.pdf"),
            PathBuf::from("/etc/other.pdf")
        );
    }
}
