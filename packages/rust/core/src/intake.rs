//! Intake gate: URL normalization and the deduplication check.
//!
//! Every submission passes through [`IntakeGate::admit`] before a job exists.
//! The gate classifies the link, reduces it to a canonical key and claims the
//! key in the deduplication store. The claim is the only synchronization
//! point between concurrent submissions of the same URL.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info, instrument};
use url::Url;

use reeldigest_shared::{ChatId, ContentType, DedupEntry, ProcessedUrl, ReelDigestError, Result};
use reeldigest_storage::Storage;

use crate::clock::Clock;
use crate::job::Job;

static SHORTCODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));

static URL_IN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:https?://)?(?:www\.|m\.)?(?:instagram\.com|threads\.net|threads\.com)/\S+")
        .expect("valid regex")
});

/// Query parameters that identify the share, not the content.
const TRACKING_PARAMS: &[&str] = &["igshid", "igsh", "fbclid", "si", "xmt", "slof"];

/// A classified submission reduced to its canonical key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedUrl {
    /// Scheme-less canonical form, e.g. `instagram.com/reel/abc`.
    pub key: String,
    pub content_type: ContentType,
}

impl NormalizedUrl {
    /// The URL handed to the acquisition tool.
    pub fn fetch_url(&self) -> String {
        format!("https://{}", self.key)
    }
}

impl std::fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Parse and canonicalize a single link.
pub fn normalize_url(raw: &str) -> Result<NormalizedUrl> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ReelDigestError::validation("empty submission"));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let url = Url::parse(&candidate)
        .map_err(|e| ReelDigestError::validation(format!("malformed URL {trimmed:?}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ReelDigestError::validation(format!(
            "unsupported scheme: {}",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| ReelDigestError::validation(format!("URL has no host: {trimmed}")))?
        .to_ascii_lowercase();
    let host = host
        .strip_prefix("www.")
        .or_else(|| host.strip_prefix("m."))
        .unwrap_or(&host);

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    let (host, content_type, path) = match host {
        "instagram.com" => {
            let (content_type, id) = classify_instagram(&segments).ok_or_else(|| {
                ReelDigestError::validation(format!("not an Instagram reel or post: {trimmed}"))
            })?;
            let kind = match content_type {
                ContentType::Post => "p",
                _ => "reel",
            };
            ("instagram.com", content_type, format!("/{kind}/{id}"))
        }
        "threads.net" | "threads.com" => match segments.as_slice() {
            [user, "post", id, ..]
                if user.len() > 1 && user.starts_with('@') && SHORTCODE.is_match(id) =>
            {
                ("threads.net", ContentType::Threads, format!("/{user}/post/{id}"))
            }
            _ => {
                return Err(ReelDigestError::validation(format!(
                    "not a Threads post: {trimmed}"
                )));
            }
        },
        other => {
            return Err(ReelDigestError::validation(format!(
                "unsupported host: {other}"
            )));
        }
    };

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();

    let mut key = format!("{host}{path}");
    if !params.is_empty() {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&params)
            .finish();
        key.push('?');
        key.push_str(&query);
    }

    Ok(NormalizedUrl { key, content_type })
}

fn classify_instagram<'a>(segments: &[&'a str]) -> Option<(ContentType, &'a str)> {
    let (kind, id) = match segments {
        [kind, id, ..] if is_instagram_kind(kind) => (*kind, *id),
        // Profile-scoped share links: /{user}/reel/{id}
        [_user, kind, id, ..] if is_instagram_kind(kind) => (*kind, *id),
        _ => return None,
    };
    if !SHORTCODE.is_match(id) {
        return None;
    }
    let content_type = if kind == "p" {
        ContentType::Post
    } else {
        ContentType::Reel
    };
    Some((content_type, id))
}

fn is_instagram_kind(segment: &str) -> bool {
    matches!(segment, "reel" | "reels" | "tv" | "p")
}

fn is_tracking_param(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name.as_str())
}

/// Normalize a submission that may be a bare link or free text containing
/// one. The first supported link wins.
pub fn normalize_submission(text: &str) -> Result<NormalizedUrl> {
    match normalize_url(text) {
        Ok(url) => Ok(url),
        Err(first) => {
            for found in URL_IN_TEXT.find_iter(text) {
                let candidate = found
                    .as_str()
                    .trim_end_matches(|c: char| matches!(c, '.' | ',' | ')' | ']' | '>' | '"' | '\''));
                if let Ok(url) = normalize_url(candidate) {
                    return Ok(url);
                }
            }
            if text.split_whitespace().count() > 1 {
                Err(ReelDigestError::validation(
                    "no Instagram or Threads link found in the message",
                ))
            } else {
                Err(first)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Result of passing a submission through the gate.
#[derive(Debug)]
pub enum Admission {
    /// The URL was claimed; the job may run.
    Accepted(Job),
    /// Already completed earlier. Nothing runs.
    AlreadyProcessed(ProcessedUrl),
    /// Another job holds the claim.
    InProgress(NormalizedUrl),
}

#[derive(Clone)]
pub struct IntakeGate {
    storage: Arc<Storage>,
    clock: Arc<dyn Clock>,
}

impl IntakeGate {
    pub fn new(storage: Arc<Storage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Validate, normalize and claim a submission.
    ///
    /// Validation failures are returned as errors and create no records.
    #[instrument(skip_all, fields(chat_id = %chat_id))]
    pub async fn admit(&self, raw: &str, chat_id: ChatId) -> Result<Admission> {
        let url = normalize_submission(raw)?;
        debug!(url = %url.key, content_type = %url.content_type, "normalized submission");

        if let Some(entry) = self.storage.lookup(&url.key).await? {
            return Ok(match entry {
                DedupEntry::Completed(record) => {
                    info!(url = %url.key, "duplicate submission");
                    Admission::AlreadyProcessed(record)
                }
                DedupEntry::InFlight(_) => Admission::InProgress(url),
            });
        }

        let job = Job::new(url.clone(), chat_id);
        if self
            .storage
            .reserve(&url.key, job.id, chat_id, self.clock.now())
            .await?
        {
            info!(url = %url.key, job_id = %job.id, "submission accepted");
            return Ok(Admission::Accepted(job));
        }

        // Lost the race: someone completed or claimed it between lookup and reserve.
        match self.storage.lookup(&url.key).await? {
            Some(DedupEntry::Completed(record)) => Ok(Admission::AlreadyProcessed(record)),
            _ => Ok(Admission::InProgress(url)),
        }
    }
}
