//! Email canonicalization for directory lookups.
//!
//! The directory keys entries by canonical address: lower-cased, with `.`,
//! `-` and `_` removed from the local part and any `+tag` suffix dropped.
//! Domain catch-all entries are keyed by `@domain`.

/// Canonical form of `email`.
pub fn normalize_email(email: &str) -> String {
    let lowered = email.trim().to_lowercase();
    match lowered.rsplit_once('@') {
        Some((local, domain)) => {
            let local = local.split('+').next().unwrap_or_default();
            let local: String = local
                .chars()
                .filter(|c| !matches!(c, '.' | '-' | '_'))
                .collect();
            format!("{local}@{domain}")
        }
        None => lowered,
    }
}

/// Catch-all label for the domain of `email`.
pub fn catch_all_email(email: &str) -> String {
    let lowered = email.trim().to_lowercase();
    match lowered.rsplit_once('@') {
        Some((_, domain)) => format!("@{domain}"),
        None => format!("@{lowered}"),
    }
}
