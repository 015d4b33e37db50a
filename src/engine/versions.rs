use std::collections::HashSet;

use anyhow::Result;

use crate::models::version::{VersionEntry, VersionLocator, VersionOrigin};
use crate::sources::history::GitRepository;

/// One entry per tag of `repo`, in tag-listing order.
pub fn tag_entries(repo: &GitRepository) -> Result<Vec<VersionEntry>> {
    Ok(repo
        .tags()?
        .into_iter()
        .map(|tag| {
            VersionEntry::new(
                tag.clone(),
                VersionOrigin::Vcs,
                VersionLocator::Tag {
                    repo: repo.dir().to_path_buf(),
                    tag,
                },
            )
        })
        .collect())
}

/// Combine every origin into one ordered sequence.
///
/// Downloaded archives are kept only for versions no tag covers.
pub fn merge_entries(
    vcs: Vec<VersionEntry>,
    local: Vec<VersionEntry>,
    downloaded: Vec<VersionEntry>,
) -> Vec<VersionEntry> {
    let tagged: HashSet<String> = vcs
        .iter()
        .filter_map(|e| e.semantic_version.normalized_full())
        .collect();

    let mut merged = vcs;
    merged.extend(local);
    merged.extend(downloaded.into_iter().filter(|e| {
        e.semantic_version
            .normalized_full()
            .is_none_or(|v| !tagged.contains(&v))
    }));
    merged.sort_by(|a, b| a.sort_cmp(b));
    merged
}
