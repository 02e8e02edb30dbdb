//! Job orchestration and domain logic for ReelDigest.
//!
//! This crate ties the intake gate, the media collaborators, the frame
//! analysis pool, summarization, note persistence, the daily knowledge-base
//! sync and notifications into end-to-end workflows. Live submissions go
//! through [`service::DigestService`]; failed jobs come back through
//! [`retry::RetryScheduler`].

pub mod adapters;
pub mod artifact;
pub mod clock;
pub mod collaborators;
pub mod frame_pool;
pub mod intake;
pub mod job;
pub mod notify;
pub mod orchestrator;
pub mod retry;
pub mod service;
pub mod sync;

#[cfg(test)]
mod testing;

pub use clock::{Clock, SystemClock};
pub use intake::{Admission, IntakeGate, NormalizedUrl, normalize_submission, normalize_url};
pub use job::{Job, JobState};
pub use notify::{LogNotifier, Notifier};
pub use orchestrator::{
    Collaborators, JobOutcome, JobReport, Orchestrator, PipelineSettings, SilentObserver,
    StageObserver,
};
pub use retry::{RetryScheduler, SweepReport};
pub use service::DigestService;
pub use sync::SyncStatus;
