//! Filename search across mounts: validate, consult the short-TTL cache,
//! fan out one walk per accessible mount, then merge, rank and paginate.
//! One mount failing never fails the whole search.

use std::sync::Arc;

use tracing::warn;

use crate::cache::{SearchCache, SearchKey};
use crate::models::{
    Capability, FsError, Mount, Principal, SearchHit, SearchParams, SearchResults, SearchScope,
};
use crate::mount::registry::Resolution;
use crate::mount::MountManager;

use super::CancelFlag;

const MIN_QUERY_LEN: usize = 2;
const MAX_LIMIT: i64 = 200;
const PER_MOUNT_RAW_RESULTS: usize = 1000;

pub(super) async fn search_files(
    manager: &Arc<MountManager>,
    cache: &Arc<SearchCache>,
    principal: &Principal,
    query: &str,
    params: &SearchParams,
    cancel: &CancelFlag,
) -> Result<SearchResults, FsError> {
    validate(query, params)?;

    let key = SearchKey::new(
        query,
        params.scope.as_str(),
        params.scope_target.as_deref(),
        &principal.identity(),
    );
    if let Some(hits) = cache.get(&key) {
        return Ok(paginate(hits, params));
    }

    let targets = scope_targets(manager, principal, params).await?;
    let merged = fan_out(manager, targets, query, cancel).await?;

    let mut ranked = merged;
    rank(&mut ranked, query);

    cache.set(key, ranked.clone());
    Ok(paginate(ranked, params))
}

fn validate(query: &str, params: &SearchParams) -> Result<(), FsError> {
    if query.chars().count() < MIN_QUERY_LEN {
        return Err(FsError::bad_request(format!(
            "query must be at least {} characters",
            MIN_QUERY_LEN
        )));
    }
    if params.limit < 1 || params.limit > MAX_LIMIT {
        return Err(FsError::bad_request(format!(
            "limit must be between 1 and {}",
            MAX_LIMIT
        )));
    }
    if params.offset < 0 {
        return Err(FsError::bad_request("offset must not be negative"));
    }
    Ok(())
}

/// The `(mount, sub-path)` pairs a scoped search walks.
async fn scope_targets(
    manager: &Arc<MountManager>,
    principal: &Principal,
    params: &SearchParams,
) -> Result<Vec<(Mount, Option<String>)>, FsError> {
    let registry = manager.registry();
    match params.scope {
        SearchScope::Global => Ok(registry
            .list_for_principal(principal)
            .await?
            .into_iter()
            .map(|m| (m, None))
            .collect()),
        SearchScope::Mount => {
            let target = params
                .scope_target
                .as_deref()
                .ok_or_else(|| FsError::bad_request("mount scope needs a mount id"))?;
            let mount = registry
                .list_for_principal(principal)
                .await?
                .into_iter()
                .find(|m| m.id == target)
                .ok_or_else(|| FsError::not_found(format!("mount '{}'", target)))?;
            Ok(vec![(mount, None)])
        }
        SearchScope::Directory => {
            let target = params
                .scope_target
                .as_deref()
                .ok_or_else(|| FsError::bad_request("directory scope needs a path"))?;
            let dir = crate::path::normalize(target, true)?;
            match registry.resolve(principal, &dir).await? {
                Resolution::Mounted { mount, sub_path } => Ok(vec![(mount, Some(sub_path))]),
                Resolution::Virtual { path } => Ok(registry
                    .list_for_principal(principal)
                    .await?
                    .into_iter()
                    .filter(|m| m.mount_path.starts_with(&path))
                    .map(|m| (m, None))
                    .collect()),
            }
        }
    }
}

/// Concurrent per-mount walks with all-settled semantics.
async fn fan_out(
    manager: &Arc<MountManager>,
    targets: Vec<(Mount, Option<String>)>,
    query: &str,
    cancel: &CancelFlag,
) -> Result<Vec<SearchHit>, FsError> {
    let mut handles = Vec::with_capacity(targets.len());

    for (mount, sub) in targets {
        if cancel.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        let driver = match manager.get_driver(&mount).await {
            Ok(d) => d,
            Err(e) => {
                warn!(mount = %mount.id, "search skipped unreachable mount: {}", e);
                continue;
            }
        };
        if !driver.capabilities().contains(Capability::Reader) {
            continue;
        }

        let query = query.to_string();
        handles.push(tokio::spawn(async move {
            driver
                .search_walk(&mount, sub.as_deref(), &query, PER_MOUNT_RAW_RESULTS)
                .await
                .map_err(|e| (mount.id.clone(), e))
        }));
    }

    let mut merged = Vec::new();
    for handle in handles {
        if cancel.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        match handle.await {
            Ok(Ok(hits)) => merged.extend(hits),
            Ok(Err((mount_id, e))) => {
                warn!(mount = %mount_id, "search walk failed: {}", e)
            }
            Err(e) => warn!("search task join error: {}", e),
        }
    }
    Ok(merged)
}

/// Relevance of a hit for a lowercased query: exact filename > filename
/// prefix > filename substring > path substring.
fn relevance(hit: &SearchHit, query_lower: &str) -> u8 {
    let name = hit.name.to_lowercase();
    if name == query_lower {
        3
    } else if name.starts_with(query_lower) {
        2
    } else if name.contains(query_lower) {
        1
    } else {
        0
    }
}

fn rank(hits: &mut [SearchHit], query: &str) {
    let query_lower = query.to_lowercase();
    hits.sort_by(|a, b| {
        relevance(b, &query_lower)
            .cmp(&relevance(a, &query_lower))
            .then(b.modified.cmp(&a.modified))
            .then(a.path.cmp(&b.path))
    });
}

fn paginate(hits: Vec<SearchHit>, params: &SearchParams) -> SearchResults {
    let total = hits.len() as u64;
    let offset = params.offset.max(0) as usize;
    let limit = params.limit.max(0) as usize;
    let page = hits.into_iter().skip(offset).take(limit).collect();
    SearchResults {
        total,
        offset: params.offset,
        limit: params.limit,
        hits: page,
    }
}
