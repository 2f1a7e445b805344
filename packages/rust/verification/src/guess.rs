//! Address synthesis from a business website.

use url::Url;

/// Mail domain implied by a website: host without a leading `www.`.
pub fn website_domain(website: &str) -> Option<String> {
    let trimmed = website.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    let with_scheme = if lower.starts_with("http://") || lower.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let url = Url::parse(&with_scheme).ok()?;
    let host = url.host_str()?.trim_end_matches('.').to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if host.contains('.') && host.parse::<std::net::IpAddr>().is_err() {
        Some(host)
    } else {
        None
    }
}

/// `local@domain` for every configured local part, in order.
pub fn guess_addresses(local_parts: &[String], domain: &str) -> Vec<String> {
    local_parts
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(|l| format!("{l}@{domain}"))
        .collect()
}

/// Intentionally unlikely mailbox used to detect catch-all domains.
pub fn catch_all_probe_address(prefix: &str, domain: &str) -> String {
    format!("{prefix}-{:08x}@{domain}", rand::random::<u32>())
}
