//! Repository URL and credential handling
//!
//! Parses the URL forms accepted for remote projects, derives the mirror
//! slug, injects the configured access token for HTTPS transport and keeps
//! credentials out of anything that is stored or logged.

use url::Url;

use crate::error::{EngineError, Result};

/// Transport family of a repository URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKind {
    Https,
    Ssh,
    File,
}

/// A parsed remote repository location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryUrl {
    raw: String,
    kind: UrlKind,
    host: Option<String>,
    owner: String,
    name: String,
}

impl RepositoryUrl {
    /// Parse `https://`, `ssh://`, scp-style `git@host:owner/name` and
    /// `file://` URLs. The path must name at least an owner and a repository.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EngineError::InvalidRepositoryUrl("empty URL".to_string()));
        }

        if let Some((host, path)) = split_scp_like(trimmed) {
            let (owner, name) = owner_and_name(path)
                .ok_or_else(|| EngineError::InvalidRepositoryUrl(redact_url(trimmed)))?;
            return Ok(Self {
                raw: trimmed.to_string(),
                kind: UrlKind::Ssh,
                host: Some(host.to_lowercase()),
                owner,
                name,
            });
        }

        let parsed =
            Url::parse(trimmed).map_err(|_| EngineError::InvalidRepositoryUrl(redact_url(trimmed)))?;

        let kind = match parsed.scheme() {
            "https" | "http" => UrlKind::Https,
            "ssh" | "git+ssh" => UrlKind::Ssh,
            "file" => UrlKind::File,
            _ => return Err(EngineError::InvalidRepositoryUrl(redact_url(trimmed))),
        };

        let host = parsed.host_str().filter(|h| !h.is_empty()).map(str::to_lowercase);
        if kind != UrlKind::File && host.is_none() {
            return Err(EngineError::InvalidRepositoryUrl(redact_url(trimmed)));
        }

        let (owner, name) = owner_and_name(parsed.path())
            .ok_or_else(|| EngineError::InvalidRepositoryUrl(redact_url(trimmed)))?;

        Ok(Self {
            raw: trimmed.to_string(),
            kind,
            host,
            owner,
            name,
        })
    }

    pub fn kind(&self) -> UrlKind {
        self.kind
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Only the configured forge host is accepted for network remotes.
    /// `file://` remotes are always accepted.
    pub fn ensure_host_allowed(&self, forge_host: &str) -> Result<()> {
        match (self.kind, self.host.as_deref()) {
            (UrlKind::File, _) => Ok(()),
            (_, Some(host)) if host.eq_ignore_ascii_case(forge_host) => Ok(()),
            (_, host) => Err(EngineError::UnsupportedHost {
                host: host.unwrap_or_default().to_string(),
                allowed: forge_host.to_string(),
            }),
        }
    }

    /// Filesystem-safe mirror directory name, `owner__name`.
    pub fn slug(&self) -> String {
        format!("{}__{}", sanitize_slug_part(&self.owner), sanitize_slug_part(&self.name))
    }

    /// The URL as stored and shown: credentials removed, no trailing slash.
    pub fn canonical(&self) -> String {
        match self.kind {
            UrlKind::Ssh if !self.raw.contains("://") => {
                self.raw.trim_end_matches('/').to_string()
            }
            _ => match Url::parse(&self.raw) {
                Ok(mut url) => {
                    if self.kind == UrlKind::Https {
                        let _ = url.set_username("");
                        let _ = url.set_password(None);
                    }
                    url.to_string().trim_end_matches('/').to_string()
                }
                Err(_) => redact_url(&self.raw),
            },
        }
    }

    /// Key under which branch hints are remembered. HTTPS and SSH forms of
    /// the same repository share a key.
    pub fn hint_key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.host.as_deref().unwrap_or("file"),
            self.owner,
            self.name
        )
        .to_lowercase()
    }

    /// The URL handed to `git`: for HTTPS without credentials the access
    /// token becomes the username. Other forms pass through unchanged.
    pub fn clone_url(&self, token: Option<&str>) -> String {
        let token = token.map(str::trim).filter(|t| !t.is_empty());
        match (self.kind, token) {
            (UrlKind::Https, Some(token)) => match Url::parse(&self.raw) {
                Ok(mut url) if url.username().is_empty() && url.password().is_none() => {
                    if url.set_username(token).is_ok() {
                        url.to_string()
                    } else {
                        self.raw.clone()
                    }
                }
                _ => self.raw.clone(),
            },
            _ => self.raw.clone(),
        }
    }
}

/// Split `user@host:path` (no scheme) into host and path.
fn split_scp_like(raw: &str) -> Option<(&str, &str)> {
    if raw.contains("://") {
        return None;
    }
    let (left, path) = raw.split_once(':')?;
    if left.contains('/') || path.is_empty() {
        return None;
    }
    let host = left.rsplit_once('@').map(|(_, h)| h).unwrap_or(left);
    if host.is_empty() {
        return None;
    }
    Some((host, path))
}

/// The last two path segments, without a `.git` suffix.
fn owner_and_name(path: &str) -> Option<(String, String)> {
    let path = path.trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let mut segments = path.split('/').filter(|s| !s.is_empty()).rev();
    let name = segments.next()?;
    let owner = segments.next()?;
    Some((owner.to_string(), name.to_string()))
}

/// Lower-case and replace anything outside `[a-z0-9._-]` with `-`.
pub fn sanitize_slug_part(part: &str) -> String {
    part.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Replace URL credentials with `***`.
pub fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if !url.username().is_empty() || url.password().is_some() => {
            let _ = url.set_username("***");
            let _ = url.set_password(None);
            url.to_string()
        }
        Ok(_) => raw.to_string(),
        Err(_) => redact_text(raw),
    }
}

/// Redact `scheme://user:secret@` userinfo wherever it appears in free text,
/// such as `git` error output that echoes the remote URL.
pub fn redact_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(idx) = rest.find("://") {
        let (head, tail) = rest.split_at(idx + 3);
        out.push_str(head);

        let end = tail
            .find(|c: char| c == '/' || c == '@' || c.is_whitespace() || c == '\'' || c == '"')
            .unwrap_or(tail.len());

        if tail[end..].starts_with('@') && end > 0 {
            out.push_str("***@");
            rest = &tail[end + 1..];
        } else {
            rest = tail;
        }
    }

    out.push_str(rest);
    out
}
