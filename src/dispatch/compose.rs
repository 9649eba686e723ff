use chrono::{DateTime, FixedOffset, Utc};

use crate::services::MediaProbe;

const ELLIPSIS: char = '…';

/// Thread names longer than this are rejected by the platform.
pub const TITLE_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct ComposeOptions {
    pub content_limit: usize,
    pub attachment_cap: usize,
    pub max_attachment_bytes: u64,
    pub display_offset: FixedOffset,
}

/// Media split into uploads and URLs to append to the body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaPlan {
    pub attachments: Vec<String>,
    pub links: Vec<String>,
}

/// Images first, then files. Media that is over the byte cap, cannot be
/// probed, or exceeds the attachment count becomes a link.
pub async fn plan_media(
    images: &[String],
    files: &[String],
    opts: &ComposeOptions,
    probe: &dyn MediaProbe,
) -> MediaPlan {
    let mut plan = MediaPlan::default();

    for url in images.iter().chain(files) {
        if plan.attachments.len() >= opts.attachment_cap {
            plan.links.push(url.clone());
            continue;
        }
        match probe.content_length(url).await {
            Some(size) if size <= opts.max_attachment_bytes => plan.attachments.push(url.clone()),
            Some(size) => {
                tracing::debug!(url = %url, size, "media over attachment cap, linking");
                plan.links.push(url.clone());
            }
            None => {
                tracing::debug!(url = %url, "media size unknown, linking");
                plan.links.push(url.clone());
            }
        }
    }

    plan
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Cut `text` to at most `max` characters, marking the cut with an ellipsis.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if char_len(text) <= max {
        return text.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let mut out: String = text.chars().take(max - 1).collect();
    out.push(ELLIPSIS);
    out
}

pub fn footer(url: &str, published: DateTime<Utc>, offset: FixedOffset) -> String {
    let local = published.with_timezone(&offset);
    format!(
        "Source: {}\nPublished: {}",
        url,
        local.format("%Y-%m-%d %H:%M (UTC%:z)")
    )
}

/// First message of a thread: content, then media links, then the footer,
/// within `content_limit` characters. Links are dropped before the footer
/// and content is truncated last.
pub fn compose_body(
    content: &str,
    links: &[String],
    url: &str,
    published: DateTime<Utc>,
    opts: &ComposeOptions,
) -> String {
    let limit = opts.content_limit;
    let footer = footer(url, published, opts.display_offset);

    let mut tail = footer.clone();
    if !links.is_empty() {
        let with_links = format!("{}\n\n{}", links.join("\n"), footer);
        if char_len(&with_links) + 2 < limit {
            tail = with_links;
        } else {
            tracing::debug!(links = links.len(), "media links do not fit, dropping them");
        }
    }

    let content = content.trim();
    if content.is_empty() {
        return truncate_chars(&tail, limit);
    }

    let budget = limit.saturating_sub(char_len(&tail) + 2);
    if budget == 0 {
        return truncate_chars(&tail, limit);
    }
    format!("{}\n\n{}", truncate_chars(content, budget), tail)
}

pub fn thread_title(title: &str, max: usize) -> String {
    truncate_chars(title.trim(), max)
}
