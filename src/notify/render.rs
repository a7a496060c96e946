// src/notify/render.rs
//! Human-readable digest notification.

use chrono::DateTime;
use chrono_tz::Tz;

use crate::analyze::Digest;
use crate::notify::TextFormat;

pub const MAX_KEY_POINTS: usize = 3;

/// Escape the characters legacy Telegram Markdown treats as markup.
pub fn escape_markdown(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Plain-text rendition of legacy Markdown: drops `*`, `_` and backtick
/// markers and unescapes `\x` for the characters [`escape_markdown`] escapes.
pub fn strip_markdown(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                Some(&n) if matches!(n, '_' | '*' | '`' | '[') => {
                    out.push(n);
                    chars.next();
                }
                _ => out.push(c),
            },
            '*' | '_' | '`' => {}
            _ => out.push(c),
        }
    }
    out
}

/// Render a digest as a notification. `Markdown` bolds the section labels and
/// escapes model text; `Plain` leaves everything as is.
pub fn render_digest(digest: &Digest, generated_at: DateTime<Tz>, format: TextFormat) -> String {
    let md = format == TextFormat::Markdown;
    let bold = |label: &str| if md { format!("*{label}*") } else { label.to_string() };
    let text = |s: &str| if md { escape_markdown(s) } else { s.to_string() };
    let list = |xs: &[String]| xs.iter().map(|x| text(x.as_str())).collect::<Vec<_>>().join(", ");

    let mut out = format!("📊 {}\n\n{}\n", bold("Financial News Summary"), text(&digest.summary));

    if !digest.key_points.is_empty() {
        out.push_str(&format!("\n{}\n", bold("Key Points:")));
        for point in digest.key_points.iter().take(MAX_KEY_POINTS) {
            out.push_str(&format!("- {}\n", text(point)));
        }
    }

    out.push_str(&format!("\n{} {}\n", bold("Market Sentiment:"), digest.sentiment));

    if !digest.impacted_entities.is_empty() {
        out.push_str(&format!(
            "\n{} {}\n",
            bold("Potentially Impacted Stocks:"),
            list(&digest.impacted_entities)
        ));
    }
    if !digest.sectors.is_empty() {
        out.push_str(&format!("\n{} {}\n", bold("Affected Sectors:"), list(&digest.sectors)));
    }

    out.push_str(&format!(
        "\nGenerated at {} ({})",
        generated_at.format("%Y-%m-%d %H:%M:%S"),
        generated_at.timezone().name()
    ));
    out
}
