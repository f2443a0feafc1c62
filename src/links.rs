//! Outgoing link rewriting.

use tracing::{debug, warn};
use url::Url;

use crate::auth::TokenStore;

/// Whether `link` is a same-origin link under the reserved path prefix.
pub fn is_reserved(link: &Url, origin: &Url, prefix: &str) -> bool {
    link.origin() == origin.origin() && link.path().starts_with(prefix)
}

/// Attach auth parameters to every reserved link.
///
/// Links are resolved against `origin`. Other links, and links that do not
/// parse, are returned untouched.
pub fn rewrite_links(
    store: &TokenStore,
    origin: &Url,
    prefix: &str,
    links: &[String],
) -> Vec<String> {
    let mut rewritten = 0usize;

    let result = links
        .iter()
        .map(|link| match origin.join(link) {
            Ok(url) if is_reserved(&url, origin, prefix) => {
                rewritten += 1;
                store.to_url(&url).to_string()
            }
            Ok(_) => link.clone(),
            Err(e) => {
                warn!("Skipping unparseable link: {}", e);
                link.clone()
            }
        })
        .collect();

    debug!("Rewrote {} of {} links", rewritten, links.len());
    result
}

/// Resolve a `return_to` target. Only same-origin targets are accepted.
pub fn resolve_return_to(origin: &Url, raw: &str) -> Option<Url> {
    match origin.join(raw) {
        Ok(url) if url.origin() == origin.origin() => Some(url),
        Ok(url) => {
            warn!("Ignoring off-origin return_to target {}", url.origin().ascii_serialization());
            None
        }
        Err(e) => {
            warn!("Ignoring invalid return_to target: {}", e);
            None
        }
    }
}
