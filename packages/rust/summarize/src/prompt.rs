//! Instruction templates, one per kind of content.

use reeldigest_shared::{ContentType, FrameDescription};

use crate::backend::SummaryRequest;

const SYSTEM_PROMPT: &str = "You turn short social media posts into structured study notes. \
Write in the same language as the content. Do not invent details that are not in the material. \
Do not use tools, read files or ask questions; answer directly.";

const OUTPUT_FORMAT: &str = "\
Reply in exactly this format:

## Summary
Two to four sentences on what the post is about and its main takeaway.

## Key Points
- One line per point, three to six points.

## Tools & Skills
- Each tool, product, technique or skill mentioned, or `- None`.

## Visual Observations
- What the visuals add beyond the words, or `- None`.";

/// Which instructions accompany the material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionTemplate {
    /// Video with a usable transcript, optionally with frames.
    Spoken,
    /// Video whose audio had no speech; frames carry the content.
    VisualOnly,
    /// Image post or carousel.
    ImagePost,
    /// Text-first Threads post.
    TextPost,
}

impl InstructionTemplate {
    pub fn select(content_type: ContentType, has_transcript: bool) -> Self {
        match content_type {
            ContentType::Threads => Self::TextPost,
            ContentType::Post if !has_transcript => Self::ImagePost,
            _ if has_transcript => Self::Spoken,
            _ => Self::VisualOnly,
        }
    }

    fn instructions(&self) -> &'static str {
        match self {
            Self::Spoken => {
                "Summarize this short video. The transcript is the main source; use the \
                 frame notes to confirm and enrich it."
            }
            Self::VisualOnly => {
                "This short video has no speech. Reconstruct what it shows from the \
                 chronological frame notes and any caption, and summarize it."
            }
            Self::ImagePost => {
                "Summarize this image post. The image descriptions are in gallery order; \
                 the caption, when present, explains the author's intent."
            }
            Self::TextPost => {
                "Summarize this text post. Any media descriptions are supporting context."
            }
        }
    }
}

/// System and user prompt, ready for a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

impl RenderedPrompt {
    /// Both parts as one block, for backends without a system role.
    pub fn combined(&self) -> String {
        format!("{}\n\n---\n\n{}", self.system, self.user)
    }
}

pub fn render_prompt(request: &SummaryRequest) -> RenderedPrompt {
    let mut user = String::new();
    user.push_str(request.template.instructions());
    user.push_str("\n\n");
    user.push_str(&format!("Source: {}\n", request.content_type.label()));
    if let Some(title) = request.title.as_deref().filter(|t| !t.is_empty()) {
        user.push_str(&format!("Title: {title}\n"));
    }

    if let Some(caption) = request.caption.as_deref().filter(|c| !c.trim().is_empty()) {
        user.push_str("\n### Caption\n");
        user.push_str(caption.trim());
        user.push('\n');
    }

    if let Some(transcript) = request.transcript.as_deref().filter(|t| !t.trim().is_empty()) {
        user.push_str("\n### Transcript\n");
        user.push_str(transcript.trim());
        user.push('\n');
    }

    if !request.frame_descriptions.is_empty() {
        let heading = match request.template {
            InstructionTemplate::ImagePost => "\n### Images (gallery order)\n",
            _ => "\n### Frame notes (chronological)\n",
        };
        user.push_str(heading);
        user.push_str(&render_frames(&request.frame_descriptions, request.template));
    }

    user.push('\n');
    user.push_str(OUTPUT_FORMAT);

    RenderedPrompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

fn render_frames(frames: &[FrameDescription], template: InstructionTemplate) -> String {
    frames
        .iter()
        .enumerate()
        .map(|(i, f)| match template {
            InstructionTemplate::ImagePost => format!("[image {}] {}\n", i + 1, f.text),
            _ => format!("[{:.1}s] {}\n", f.offset_secs, f.text),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(template: InstructionTemplate) -> SummaryRequest {
        SummaryRequest {
            content_type: ContentType::Reel,
            title: Some("Knife skills".into()),
            transcript: Some("Hold the knife like this.".into()),
            caption: None,
            frame_descriptions: vec![
                FrameDescription {
                    offset_secs: 0.0,
                    text: "A chef holds a knife.".into(),
                },
                FrameDescription {
                    offset_secs: 4.0,
                    text: "Onions are diced.".into(),
                },
            ],
            template,
        }
    }

    #[test]
    fn template_selection() {
        assert_eq!(
            InstructionTemplate::select(ContentType::Reel, true),
            InstructionTemplate::Spoken
        );
        assert_eq!(
            InstructionTemplate::select(ContentType::Reel, false),
            InstructionTemplate::VisualOnly
        );
        assert_eq!(
            InstructionTemplate::select(ContentType::Post, false),
            InstructionTemplate::ImagePost
        );
        assert_eq!(
            InstructionTemplate::select(ContentType::Post, true),
            InstructionTemplate::Spoken
        );
        assert_eq!(
            InstructionTemplate::select(ContentType::Threads, true),
            InstructionTemplate::TextPost
        );
    }

    #[test]
    fn frames_render_with_timestamps_in_order() {
        let prompt = render_prompt(&request(InstructionTemplate::Spoken));
        let first = prompt.user.find("[0.0s] A chef").unwrap();
        let second = prompt.user.find("[4.0s] Onions").unwrap();
        assert!(first < second);
        assert!(prompt.user.contains("### Transcript\nHold the knife"));
        assert!(prompt.user.contains("## Key Points"));
    }

    #[test]
    fn image_posts_number_images() {
        let mut req = request(InstructionTemplate::ImagePost);
        req.transcript = None;
        let prompt = render_prompt(&req);
        assert!(prompt.user.contains("[image 2] Onions are diced."));
        assert!(!prompt.user.contains("### Transcript"));
    }

    #[test]
    fn combined_keeps_system_first() {
        let prompt = render_prompt(&request(InstructionTemplate::VisualOnly));
        assert!(prompt.combined().starts_with("You turn short social media posts"));
    }
}
