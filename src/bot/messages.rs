//! User-facing text.

use std::fmt::Write;

use crate::downloader::{Download, Origin};
use crate::error::DownloadError;
use crate::links::canonical_post_url;
use crate::post::PostRecord;

use super::types::{InlineKeyboardButton, InlineKeyboardMarkup};

/// Longest text Telegram accepts in one message, in UTF-16 code units.
const MAX_MESSAGE_UNITS: usize = 4096;

pub const WELCOME: &str = "\
🤖 Instagram downloader

Send me a link to a public Instagram post, reel or IGTV video and I will send the photos and videos back to you.

Supported links:
• Posts: https://instagram.com/p/...
• Reels: https://instagram.com/reel/...
• IGTV: https://instagram.com/tv/...

Only public posts can be downloaded.";

pub const HELP: &str = "\
📖 How to use

1. Copy the link of a public Instagram post
2. Send it to this chat
3. Wait for the files to arrive

Example links:
https://instagram.com/p/ABC123/
https://instagram.com/reel/XYZ789/
https://instagram.com/tv/DEF456/

Commands:
/start - introduction
/help - this message
/about - about the bot
/saved - posts already downloaded

Downloaded posts are kept, so asking again is instant. Private posts are not supported.";

pub const ABOUT: &str = concat!(
    "ℹ️ Instagram downloader ",
    env!("CARGO_PKG_VERSION"),
    "\n\n\
Downloads public posts, reels, IGTV videos and multi-photo posts.\n\
Files and post details are cached on the server.\n\n\
Limits:\n\
• public content only\n\
• stories are not supported"
);

pub const PROCESSING: &str = "🔄 Processing link...";
pub const REFETCHING: &str = "📁 Saved files are gone, downloading again...";
pub const NOT_A_LINK: &str = "❌ Please send a valid Instagram link.\n\nSend /help for instructions.";
pub const NOTHING_SAVED: &str = "📁 No posts have been saved yet.";

/// Buttons shown under the welcome message.
#[must_use]
pub fn welcome_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: vec![
            vec![InlineKeyboardButton::callback("📖 Help", "help")],
            vec![InlineKeyboardButton::callback("ℹ️ About", "about")],
        ],
    }
}

/// Summary of a downloaded post, shown before its files are sent.
#[must_use]
pub fn post_summary(download: &Download) -> String {
    let record = &download.record;
    let heading = match download.origin {
        Origin::Cache => "📊 Post (from cache)",
        Origin::Remote => "📊 Post downloaded",
    };

    let mut text = format!(
        "{heading}\n👤 User: @{}\n❤️ Likes: {}\n💬 Comments: {}\n📅 Date: {}\n🎬 Type: {}\n📁 Files: {}\n",
        record.username,
        format_count(record.likes),
        format_count(record.comments),
        record.date_display(),
        kind_label(record),
        record.file_paths.len(),
    );

    if record.is_video && record.video_view_count > 0 {
        let _ = writeln!(text, "👀 Views: {}", format_count(record.video_view_count));
    }
    if let Some(caption) = record.caption_preview() {
        let _ = writeln!(text, "📝 Caption: {caption}");
    }

    truncate(&text)
}

/// Listing for the `/saved` command.
#[must_use]
pub fn saved_list(records: &[PostRecord]) -> String {
    if records.is_empty() {
        return NOTHING_SAVED.to_string();
    }

    let mut text = String::from("📁 Saved posts:\n\n");
    for (i, record) in records.iter().enumerate() {
        let _ = writeln!(
            text,
            "{}. @{}\n   📅 {}\n   {} ({} files)\n   🔗 {}\n",
            i + 1,
            record.username,
            record.date_display(),
            kind_label(record),
            record.file_paths.len(),
            canonical_post_url(&record.shortcode),
        );
    }
    let _ = write!(text, "📊 Total: {} posts", records.len());

    truncate(&text)
}

/// Explanation of a failed download.
#[must_use]
pub fn error(err: &DownloadError) -> String {
    let text = match err {
        DownloadError::Validation(reason) => format!("❌ Invalid Instagram link ({reason})"),
        DownloadError::NotFound(_) => "❌ Post not found or it was deleted".to_string(),
        DownloadError::Private(_) => "❌ This post is private and needs a login".to_string(),
        DownloadError::Fetch(message) => format!("❌ Download failed: {message}"),
        DownloadError::EmptyResult { .. } => "❌ No files could be downloaded".to_string(),
        DownloadError::Filesystem(message) => format!("❌ Could not save the files: {message}"),
    };
    truncate(&text)
}

#[must_use]
pub fn too_large(file_name: &str, size: u64, limit: u64) -> String {
    format!(
        "⚠️ {file_name} is {}, over the {} upload limit",
        human_size(size),
        human_size(limit)
    )
}

#[must_use]
pub fn send_failed(file_name: &str, err: &anyhow::Error) -> String {
    truncate(&format!("❌ Could not send {file_name}: {err:#}"))
}

fn kind_label(record: &PostRecord) -> &'static str {
    if record.is_video {
        "🎬 Video"
    } else {
        "📸 Photo"
    }
}

/// `1234567` → `1,234,567`.
#[must_use]
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[allow(clippy::cast_precision_loss)]
fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Cut `text` to what Telegram accepts, marking the cut with `…`.
fn truncate(text: &str) -> String {
    if text.encode_utf16().count() <= MAX_MESSAGE_UNITS {
        return text.to_string();
    }

    // Leave one unit for the ellipsis
    let budget = MAX_MESSAGE_UNITS - '…'.len_utf16();
    let mut used = 0;
    let mut cut = String::with_capacity(text.len().min(budget * 2));
    for c in text.chars() {
        used += c.len_utf16();
        if used > budget {
            break;
        }
        cut.push(c);
    }
    cut.push('…');
    cut
}
