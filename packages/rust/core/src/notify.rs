//! User-facing messages and best-effort delivery.
//!
//! Delivery failures are logged and swallowed: a message that cannot be sent
//! never changes the outcome of the job it describes.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use reeldigest_shared::text::truncate_utf16;
use reeldigest_shared::{
    ChatId, FailedJob, ProcessedUrl, ReelDigestError, Result, Stage, StructuredSummary,
};

use crate::collaborators::NotificationSink;
use crate::intake::NormalizedUrl;
use crate::sync::SyncStatus;

/// Telegram's message size limit, in UTF-16 code units.
pub const MESSAGE_LIMIT: usize = 4096;

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

pub fn format_processing(url: &NormalizedUrl) -> String {
    format!(
        "⏳ Got it! Processing this {}…\n{}",
        url.content_type.label(),
        url.fetch_url()
    )
}

pub fn format_completed(
    record: &ProcessedUrl,
    summary: &StructuredSummary,
    sync: &SyncStatus,
    retried: bool,
) -> String {
    let mut out = String::new();
    if retried {
        out.push_str("✅ Retry succeeded\n\n");
    }
    let _ = writeln!(out, "📝 {}\n", record.title);
    let _ = writeln!(out, "{}", summary.summary.trim());

    push_section(&mut out, "🔑 Key points", &summary.bullet_points);
    push_section(&mut out, "🛠 Tools & skills", &summary.tools_and_skills);
    push_section(&mut out, "👁 Visual observations", &summary.visual_observations);

    out.push('\n');
    match sync {
        SyncStatus::Synced(receipt) => {
            let target = receipt
                .external_url
                .as_deref()
                .unwrap_or(&receipt.external_title);
            let _ = writeln!(out, "📚 Synced: {target}");
        }
        SyncStatus::Failed(reason) => {
            let _ = writeln!(out, "⚠️ Sync failed: {reason}");
        }
        SyncStatus::Disabled => {}
    }
    let _ = write!(out, "🔗 https://{}", record.url);
    out
}

fn push_section(out: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n{heading}");
    for item in items {
        let _ = writeln!(out, "• {item}");
    }
}

pub fn format_duplicate(record: &ProcessedUrl) -> String {
    format!(
        "🔁 Already processed on {}.\n📝 {}\nNote: {}",
        record.processed_at.format("%Y-%m-%d %H:%M UTC"),
        record.title,
        record.artifact_path.display()
    )
}

pub fn format_in_progress(url: &NormalizedUrl) -> String {
    format!(
        "⏳ This link is already being processed.\n{}",
        url.fetch_url()
    )
}

pub fn format_validation(err: &ReelDigestError) -> String {
    let reason = match err {
        ReelDigestError::Validation { message } => message.clone(),
        other => other.to_string(),
    };
    format!("❌ {reason}\nSend an Instagram reel, post or Threads link.")
}

pub fn format_queued(url: &str, stage: Stage, detail: &str) -> String {
    format!(
        "⚠️ Processing failed at the {stage} step: {detail}\nhttps://{url}\nIt will be retried automatically."
    )
}

/// The job failed and the failure store rejected it, so nothing will retry.
pub fn format_not_queued(url: &str, stage: Stage, detail: &str) -> String {
    format!(
        "❌ Processing failed at the {stage} step: {detail}\nhttps://{url}\nIt could not be queued for a retry. Please resubmit the link."
    )
}

pub fn format_abandoned(record: &FailedJob, max_retries: u32) -> String {
    format!(
        "❌ Giving up on https://{} after {max_retries} retries.\nLast error ({}): {}\nPlease resubmit the link if you still want it.",
        record.url, record.stage, record.error_detail
    )
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Sends formatted messages through a sink with a time budget.
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
    timeout: Duration,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>, timeout: Duration) -> Self {
        Self { sink, timeout }
    }

    pub async fn send(&self, chat_id: ChatId, text: &str) {
        let text = truncate_utf16(text, MESSAGE_LIMIT);
        match tokio::time::timeout(self.timeout, self.sink.deliver(chat_id, &text)).await {
            Ok(Ok(())) => debug!(chat_id, "notification delivered"),
            Ok(Err(e)) => warn!(chat_id, error = %e, "notification failed"),
            Err(_) => warn!(
                chat_id,
                timeout_secs = self.timeout.as_secs(),
                "notification timed out"
            ),
        }
    }
}

/// Writes notifications to the log. Used when no chat transport is set up.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn deliver(&self, chat_id: ChatId, text: &str) -> Result<()> {
        info!(chat_id, message = %text, "notification");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::{TimeZone, Utc};
    use reeldigest_shared::{ContentType, FailureStatus};

    use super::*;
    use crate::collaborators::SyncReceipt;
    use crate::testing::RecordingSink;

    fn record() -> ProcessedUrl {
        ProcessedUrl {
            url: "instagram.com/reel/abc".into(),
            content_type: ContentType::Reel,
            title: "Shaping sourdough".into(),
            chat_id: 5,
            artifact_path: PathBuf::from("/notes/2026-03-14/shaping-sourdough-1a2b3c4d.md"),
            processed_at: Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap(),
        }
    }

    fn summary() -> StructuredSummary {
        StructuredSummary {
            summary: "How to shape a boule.".into(),
            bullet_points: vec!["Use a bench scraper".into()],
            tools_and_skills: Vec::new(),
            visual_observations: vec!["Floured wooden counter".into()],
        }
    }

    #[test]
    fn completion_lists_sections_and_sync_link() {
        let sync = SyncStatus::Synced(SyncReceipt {
            external_id: "nb-1".into(),
            external_title: "IG Content - 2026-03-14".into(),
            external_url: Some("https://kb.example/nb-1".into()),
        });
        let text = format_completed(&record(), &summary(), &sync, false);

        assert!(text.starts_with("📝 Shaping sourdough"));
        assert!(text.contains("🔑 Key points\n• Use a bench scraper"));
        assert!(!text.contains("Tools & skills"));
        assert!(text.contains("👁 Visual observations\n• Floured wooden counter"));
        assert!(text.contains("📚 Synced: https://kb.example/nb-1"));
        assert!(text.ends_with("🔗 https://instagram.com/reel/abc"));
    }

    #[test]
    fn retried_completion_has_header_and_sync_failure() {
        let text = format_completed(
            &record(),
            &summary(),
            &SyncStatus::Failed("agent offline".into()),
            true,
        );
        assert!(text.starts_with("✅ Retry succeeded"));
        assert!(text.contains("⚠️ Sync failed: agent offline"));
    }

    #[test]
    fn duplicate_names_original_time_and_note() {
        let text = format_duplicate(&record());
        assert!(text.contains("2026-03-14 09:30 UTC"));
        assert!(text.contains("shaping-sourdough-1a2b3c4d.md"));
    }

    #[test]
    fn abandonment_names_bound_and_last_error() {
        let failed = FailedJob {
            id: 1,
            url: "instagram.com/p/xyz".into(),
            content_type: ContentType::Post,
            chat_id: 5,
            stage: Stage::Download,
            error_detail: "download error (not found): gone".into(),
            retry_count: 3,
            created_at: Utc::now(),
            last_retry_at: None,
            status: FailureStatus::Abandoned,
        };
        let text = format_abandoned(&failed, 3);
        assert!(text.contains("after 3 retries"));
        assert!(text.contains("https://instagram.com/p/xyz"));
        assert!(text.contains("Last error (download)"));
        assert!(text.contains("resubmit"));
    }

    #[test]
    fn validation_message_uses_bare_reason() {
        let text = format_validation(&ReelDigestError::validation("unsupported host: x.com"));
        assert!(text.starts_with("❌ unsupported host: x.com"));
    }

    #[tokio::test]
    async fn long_messages_are_truncated() {
        let sink = Arc::new(RecordingSink::default());
        let notifier = Notifier::new(sink.clone(), Duration::from_secs(1));

        notifier.send(1, &"x".repeat(10_000)).await;
        let sent = sink.messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.chars().count(), MESSAGE_LIMIT);
    }

    #[tokio::test]
    async fn emoji_heavy_messages_fit_the_utf16_limit() {
        let sink = Arc::new(RecordingSink::default());
        let notifier = Notifier::new(sink.clone(), Duration::from_secs(1));

        // 3000 chars but 6000 UTF-16 units
        notifier.send(1, &"🥖".repeat(3_000)).await;
        let sent = sink.messages();
        let text = &sent[0].1;
        assert!(text.encode_utf16().count() <= MESSAGE_LIMIT);
        assert!(text.chars().count() < 3_000);
        assert!(text.ends_with('…'));
    }

    #[tokio::test]
    async fn delivery_failure_is_swallowed() {
        let sink = Arc::new(RecordingSink::failing());
        let notifier = Notifier::new(sink.clone(), Duration::from_secs(1));
        notifier.send(1, "hello").await;
        assert!(sink.messages().is_empty());
    }
}
