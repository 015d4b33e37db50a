use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;

use crate::models::file_metrics::SourceTag;

/// Where a version entry was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VersionOrigin {
    Vcs,
    LocalArchive,
    DownloadedArchive,
}

impl VersionOrigin {
    pub fn source_tag(self) -> SourceTag {
        match self {
            Self::Vcs => SourceTag::Vcs,
            Self::LocalArchive => SourceTag::LocalArchive,
            Self::DownloadedArchive => SourceTag::DownloadedArchive,
        }
    }

    /// Tie-break order for entries with equal semantic versions.
    fn rank(self) -> u8 {
        match self {
            Self::LocalArchive => 0,
            Self::DownloadedArchive => 1,
            Self::Vcs => 2,
        }
    }
}

impl fmt::Display for VersionOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.source_tag().fmt(f)
    }
}

/// How to materialize the files of a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionLocator {
    Tag { repo: PathBuf, tag: String },
    Archive { path: PathBuf },
    Tarball { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum PreRelease {
    Numeric(u64),
    Text(String),
}

/// Semantic-version sort key parsed leniently from a tag or archive label.
///
/// Accepts `v1.2.3`, `pkg@1.2.3`, `1.2` and `1.2.3-beta.1-local`. Labels with
/// a non-numeric core sort after every parseable one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionKey {
    core: Option<Vec<u64>>,
    pre: Vec<PreRelease>,
    raw: String,
}

impl VersionKey {
    pub fn parse(label: &str) -> Self {
        let raw = label.to_string();
        let mut s = label.trim();
        if let Some((_, rest)) = s.rsplit_once('@') {
            s = rest;
        }
        s = s.strip_prefix(['v', 'V']).unwrap_or(s);
        s = s.strip_suffix("-local").unwrap_or(s);
        let s = s.split_once('+').map_or(s, |(v, _)| v);
        let (core_str, pre_str) = match s.split_once('-') {
            Some((c, p)) => (c, Some(p)),
            None => (s, None),
        };

        let core: Option<Vec<u64>> = core_str
            .split('.')
            .map(|part| part.parse::<u64>().ok())
            .collect();
        let pre = pre_str
            .map(|p| {
                p.split(['.', '-'])
                    .filter(|id| !id.is_empty())
                    .map(|id| match id.parse::<u64>() {
                        Ok(n) => PreRelease::Numeric(n),
                        Err(_) => PreRelease::Text(id.to_string()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self { core, pre, raw }
    }

    pub fn is_valid(&self) -> bool {
        self.core.is_some()
    }

    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }

    /// `major.minor.patch` with missing components as zero.
    pub fn normalized(&self) -> Option<String> {
        let core = self.core.as_ref()?;
        let part = |i: usize| core.get(i).copied().unwrap_or(0);
        Some(format!("{}.{}.{}", part(0), part(1), part(2)))
    }

    /// [`normalized`](Self::normalized) plus the pre-release, if any.
    pub fn normalized_full(&self) -> Option<String> {
        let core = self.normalized()?;
        if self.pre.is_empty() {
            return Some(core);
        }
        let pre: Vec<String> = self
            .pre
            .iter()
            .map(|id| match id {
                PreRelease::Numeric(n) => n.to_string(),
                PreRelease::Text(s) => s.clone(),
            })
            .collect();
        Some(format!("{core}-{}", pre.join(".")))
    }
}

fn compare_core(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

impl Ord for VersionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.core, &other.core) {
            (None, None) => self.raw.cmp(&other.raw),
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => compare_core(a, b).then_with(|| {
                // a pre-release sorts before its release
                match (self.pre.is_empty(), other.pre.is_empty()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => self.pre.cmp(&other.pre),
                }
            }),
        }
    }
}

impl PartialOrd for VersionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One identified, ordered release of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEntry {
    /// Display label (`-local` suffix for local archives)
    pub name: String,
    pub semantic_version: VersionKey,
    pub origin: VersionOrigin,
    pub locator: VersionLocator,
}

impl VersionEntry {
    pub fn new(name: impl Into<String>, origin: VersionOrigin, locator: VersionLocator) -> Self {
        let name = name.into();
        Self {
            semantic_version: VersionKey::parse(&name),
            name,
            origin,
            locator,
        }
    }

    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        self.semantic_version
            .cmp(&other.semantic_version)
            .then_with(|| self.origin.rank().cmp(&other.origin.rank()))
            .then_with(|| self.name.cmp(&other.name))
    }
}
