//! Email candidate scanning for a single HTML page.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

use leadgen_shared::{CandidateSource, Confidence, EmailCandidate};

/// Characters before a match searched for a contact label.
const LABEL_WINDOW: usize = 80;

const LABELS: &[&str] = &[
    "contact",
    "email",
    "e-mail",
    "mail us",
    "reach us",
    "get in touch",
    "write to us",
    "enquir",
    "inquir",
];

/// Substrings that mark an address as a false positive.
const REJECT_FRAGMENTS: &[&str] = &[
    ".png",
    ".jpg",
    ".jpeg",
    ".gif",
    ".svg",
    ".webp",
    "yoursite",
    "yourdomain",
    "wordpress",
    "woocommerce",
    "admin@localhost",
];

/// Placeholder and tracking domains.
const REJECT_DOMAINS: &[&str] = &[
    "example.com",
    "example.org",
    "example.net",
    "email.com",
    "domain.com",
    "sentry.io",
    "wixpress.com",
];

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b").expect("valid regex")
});

static AT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*[\[\(\{]\s*at\s*[\]\)\}]\s*").expect("valid regex"));

static DOT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*[\[\(\{]\s*dot\s*[\]\)\}]\s*").expect("valid regex"));

static LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

/// Scan one page. `contact_page` marks pages whose path names them as contact pages;
/// every address found there counts as labeled.
pub fn scan_page(html: &str, contact_page: bool) -> Vec<EmailCandidate> {
    let doc = Html::parse_document(html);
    let mut candidates = Vec::new();

    for el in doc.select(&LINK_SEL) {
        if let Some(address) = el.value().attr("href").and_then(mailto_address) {
            candidates.push(EmailCandidate {
                address,
                source: CandidateSource::MailtoLink,
                confidence: Confidence::High,
            });
        }
    }

    let text = decode_obfuscation(&visible_text(&doc));
    let lower = text.to_ascii_lowercase();
    for m in EMAIL_RE.find_iter(&text) {
        let Some(address) = clean_address(m.as_str()) else {
            continue;
        };
        let labeled = contact_page || has_label_before(&lower, m.start());
        candidates.push(EmailCandidate {
            address,
            source: CandidateSource::PageScan,
            confidence: if labeled {
                Confidence::High
            } else {
                Confidence::Low
            },
        });
    }

    merge_candidates(candidates)
}

/// Keep the best-ranked entry per address, best first.
pub fn merge_candidates(candidates: Vec<EmailCandidate>) -> Vec<EmailCandidate> {
    let mut merged: Vec<EmailCandidate> = Vec::new();
    for candidate in candidates {
        match merged.iter_mut().find(|c| c.address == candidate.address) {
            Some(existing) if candidate.rank() > existing.rank() => *existing = candidate,
            Some(_) => {}
            None => merged.push(candidate),
        }
    }
    // Stable: equal ranks keep page order.
    merged.sort_by(|a, b| b.rank().cmp(&a.rank()));
    merged
}

/// Address from a `mailto:` href, query string stripped.
fn mailto_address(href: &str) -> Option<String> {
    let href = href.trim();
    if !href.get(..7)?.eq_ignore_ascii_case("mailto:") {
        return None;
    }
    let rest = href.get(7..)?;
    let raw = rest.split('?').next().unwrap_or_default();
    let raw = raw.split(',').next().unwrap_or_default();
    let decoded = raw.replace("%40", "@").replace("%20", "");
    let trimmed = decoded.trim();
    if !EMAIL_RE.is_match(trimmed) {
        return None;
    }
    clean_address(trimmed)
}

/// Lowercase and reject known false positives.
fn clean_address(raw: &str) -> Option<String> {
    let address = raw.trim().trim_end_matches('.').to_lowercase();
    if REJECT_FRAGMENTS.iter().any(|f| address.contains(f)) {
        return None;
    }

    let (local, domain) = address.rsplit_once('@')?;
    if local.is_empty() || domain.is_empty() {
        return None;
    }
    let placeholder = REJECT_DOMAINS
        .iter()
        .any(|d| domain == *d || domain.ends_with(&format!(".{d}")));
    if placeholder {
        return None;
    }

    Some(address)
}

/// Text nodes outside `script`/`style`/`noscript`, space-joined.
fn visible_text(doc: &Html) -> String {
    let mut out = String::new();
    for node in doc.tree.nodes() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name().to_string()))
            .is_some_and(|name| matches!(name.as_str(), "script" | "style" | "noscript"));
        if hidden {
            continue;
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            out.push_str(trimmed);
            out.push(' ');
        }
    }
    out
}

/// Rewrite `[at]`, `(at)`, `[dot]`, `(dot)` and friends.
pub fn decode_obfuscation(text: &str) -> String {
    let text = AT_RE.replace_all(text, "@");
    DOT_RE.replace_all(&text, ".").into_owned()
}

fn has_label_before(lower: &str, start: usize) -> bool {
    let mut from = start.saturating_sub(LABEL_WINDOW);
    while !lower.is_char_boundary(from) {
        from += 1;
    }
    let window = lower.get(from..start).unwrap_or_default();
    LABELS.iter().any(|label| window.contains(label))
}
