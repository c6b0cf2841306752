//! Structural classification of resource links.
//!
//! Links are hierarchical: `dbs/<id>/colls/<id>/docs/<id>/...`. Both
//! self-links (`dbs/AbC==/colls/AbCdE=/`) and id-based links
//! (`/dbs/orders/colls/2024`) share that shape, so classification only looks
//! at segment positions, never at what the ids look like.

pub const DATABASES_SEGMENT: &str = "dbs";
pub const COLLECTIONS_SEGMENT: &str = "colls";

/// Strips leading and trailing `/`.
pub fn trim_slashes(link: &str) -> &str {
    link.trim_matches('/')
}

fn segments(link: &str) -> Vec<&str> {
    let trimmed = trim_slashes(link);
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.split('/').collect()
}

/// True when the link is exactly `dbs/<id>`.
pub fn is_database_link(link: &str) -> bool {
    let parts = segments(link);
    parts.len() == 2 && parts[0] == DATABASES_SEGMENT && !parts[1].is_empty()
}

/// True when the link is exactly `dbs/<id>/colls/<id>`.
pub fn is_collection_link(link: &str) -> bool {
    let parts = segments(link);
    parts.len() == 4
        && parts[0] == DATABASES_SEGMENT
        && parts[2] == COLLECTIONS_SEGMENT
        && parts.iter().all(|part| !part.is_empty())
}

/// The `dbs/<id>/colls/<id>` prefix of a collection or deeper path.
pub fn collection_link_of(path: &str) -> Option<String> {
    let parts = segments(path);
    if parts.len() < 4
        || parts[0] != DATABASES_SEGMENT
        || parts[2] != COLLECTIONS_SEGMENT
        || parts[..4].iter().any(|part| part.is_empty())
    {
        return None;
    }
    Some(parts[..4].join("/"))
}

/// Joins two path fragments with exactly one `/` between them.
pub fn join_path(base: &str, segment: &str) -> String {
    let base = trim_slashes(base);
    let segment = trim_slashes(segment);
    match (base.is_empty(), segment.is_empty()) {
        (true, _) => segment.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{base}/{segment}"),
    }
}
