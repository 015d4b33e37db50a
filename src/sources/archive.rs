//! Release archives: discovery of local `.tgz` files and safe extraction.

use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::SightError;
use crate::models::version::{VersionEntry, VersionLocator, VersionOrigin};
use crate::sources::registry::PackageDocument;

/// Suffix distinguishing local archives from published versions.
pub const LOCAL_SUFFIX: &str = "-local";

static VERSION_IN_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d+\.\d+\.\d+(?:[-._]?[a-zA-Z0-9]+)*)").ok());

fn looks_like_version(s: &str) -> bool {
    let mut parts = s.splitn(3, '.');
    let major = parts.next().unwrap_or_default();
    let minor = parts.next().unwrap_or_default();
    !major.is_empty()
        && major.bytes().all(|b| b.is_ascii_digit())
        && minor.bytes().next().is_some_and(|b| b.is_ascii_digit())
}

/// Split an archive file name into `(package, version)`.
///
/// Understands `@scope@name@1.2.3.tgz`, `name@1.2.3.tgz` and `name-1.2.3.tgz`.
pub fn parse_archive_name(file_name: &str) -> Option<(String, String)> {
    let stem = file_name.strip_suffix(".tgz")?;
    let cleaned = stem.trim_start_matches('@');

    if let Some((package, version)) = cleaned.rsplit_once('@')
        && !package.is_empty()
        && looks_like_version(version)
    {
        return Some((package.to_string(), version.to_string()));
    }

    let re = VERSION_IN_NAME.as_ref()?;
    let last = re.find_iter(stem).last()?;
    let package = stem[..last.start()].trim_end_matches('-');
    if package.is_empty() || !looks_like_version(last.as_str()) {
        return None;
    }
    Some((package.to_string(), last.as_str().to_string()))
}

/// Last path segment of a package id, lowercased.
fn short_name(package: &str) -> String {
    package
        .rsplit(['/', '@'])
        .next()
        .unwrap_or(package)
        .to_lowercase()
}

/// Local archives in `dir` belonging to `package`.
///
/// A missing directory yields no entries.
pub fn discover_local_archives(dir: &Path, package: &str) -> Result<Vec<VersionEntry>> {
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "no local archive directory");
        return Ok(Vec::new());
    }
    let wanted = short_name(package);
    let mut entries = Vec::new();

    for item in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let item = item?;
        let file_name = item.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some((file_package, version)) = parse_archive_name(file_name) else {
            continue;
        };
        if short_name(&file_package) != wanted {
            continue;
        }
        entries.push(VersionEntry::new(
            format!("{version}{LOCAL_SUFFIX}"),
            VersionOrigin::LocalArchive,
            VersionLocator::Archive { path: item.path() },
        ));
    }

    debug!(package, count = entries.len(), "local archives discovered");
    Ok(entries)
}

/// Entry path relative to the destination, or `None` when it would escape it.
fn sanitize_entry_path(entry: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in entry.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!out.as_os_str().is_empty()).then_some(out)
}

/// Extract a gzip tarball into `dest` and return the package root.
///
/// npm tarballs wrap their content in `package/`; when that directory exists
/// it is returned instead of `dest`. Links and entries escaping `dest` are
/// skipped.
pub fn extract_tgz(archive: &Path, dest: &Path) -> Result<PathBuf> {
    let label = archive.display().to_string();
    let file = File::open(archive).map_err(|e| SightError::extract_failed(&label, e))?;
    fs::create_dir_all(dest)?;

    let mut tar = tar::Archive::new(GzDecoder::new(file));
    let entries = tar
        .entries()
        .map_err(|e| SightError::extract_failed(&label, e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| SightError::extract_failed(&label, e))?;
        let entry_path = entry
            .path()
            .map_err(|e| SightError::extract_failed(&label, e))?
            .into_owned();

        let Some(relative) = sanitize_entry_path(&entry_path) else {
            warn!(archive = %label, entry = %entry_path.display(), "skipping unsafe entry");
            continue;
        };
        let kind = entry.header().entry_type();
        if kind.is_symlink() || kind.is_hard_link() {
            warn!(archive = %label, entry = %entry_path.display(), "skipping link entry");
            continue;
        }
        if !(kind.is_file() || kind.is_dir()) {
            continue;
        }
        entry
            .unpack_in(dest)
            .map_err(|e| SightError::extract_failed(&label, e))?;
        debug!(entry = %relative.display(), "extracted");
    }

    let package_root = dest.join("package");
    Ok(if package_root.is_dir() {
        package_root
    } else {
        dest.to_path_buf()
    })
}

/// Published tarballs for registry versions that have one.
pub fn tarball_entries(document: &PackageDocument) -> Vec<VersionEntry> {
    document
        .versions()
        .into_iter()
        .filter_map(|version| {
            let url = document.tarball_url(&version)?;
            Some(VersionEntry::new(
                version,
                VersionOrigin::DownloadedArchive,
                VersionLocator::Tarball { url },
            ))
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    /// Write a `.tgz` holding `files` under `package/`.
    pub(crate) fn write_tgz(path: &Path, files: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("package/{name}"), content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_parse_archive_name_formats() {
        assert_eq!(
            parse_archive_name("left-pad-1.3.0.tgz"),
            Some(("left-pad".into(), "1.3.0".into()))
        );
        assert_eq!(
            parse_archive_name("left-pad@1.3.0.tgz"),
            Some(("left-pad".into(), "1.3.0".into()))
        );
        assert_eq!(
            parse_archive_name("@babel@core@7.0.0-beta.1.tgz"),
            Some(("babel@core".into(), "7.0.0-beta.1".into()))
        );
        assert_eq!(parse_archive_name("readme.md"), None);
        assert_eq!(parse_archive_name("noversion.tgz"), None);
    }

    #[test]
    fn test_short_name_matches_scoped_packages() {
        assert_eq!(short_name("@babel/core"), "core");
        assert_eq!(short_name("babel@core"), "core");
        assert_eq!(short_name("Left-Pad"), "left-pad");
    }

    #[test]
    fn test_discover_filters_by_package() {
        let dir = tempfile::TempDir::new().unwrap();
        write_tgz(&dir.path().join("left-pad-1.0.0.tgz"), &[("index.js", "x")]);
        write_tgz(&dir.path().join("left-pad@1.1.0.tgz"), &[("index.js", "y")]);
        write_tgz(&dir.path().join("other-2.0.0.tgz"), &[("index.js", "z")]);
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut entries = discover_local_archives(dir.path(), "left-pad").unwrap();
        entries.sort_by(|a, b| a.sort_cmp(b));
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["1.0.0-local", "1.1.0-local"]);
        assert!(entries.iter().all(|e| e.origin == VersionOrigin::LocalArchive));
    }

    #[test]
    fn test_discover_missing_dir_is_empty() {
        let entries = discover_local_archives(Path::new("/nonexistent/other_versions"), "x").unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_extract_returns_package_root() {
        let dir = tempfile::TempDir::new().unwrap();
        let archive = dir.path().join("pkg-1.0.0.tgz");
        write_tgz(&archive, &[("index.js", "module.exports = 1;"), ("lib/a.js", "a")]);

        let root = extract_tgz(&archive, &dir.path().join("out")).unwrap();
        assert!(root.ends_with("package"));
        assert_eq!(
            fs::read_to_string(root.join("index.js")).unwrap(),
            "module.exports = 1;"
        );
        assert!(root.join("lib/a.js").is_file());
    }

    #[test]
    fn test_extract_corrupt_archive_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let archive = dir.path().join("bad.tgz");
        fs::write(&archive, b"not a tarball").unwrap();

        let err = extract_tgz(&archive, &dir.path().join("out")).unwrap_err();
        let se = err.downcast_ref::<SightError>().unwrap();
        assert_eq!(se.code, crate::error::ErrorCode::ExtractFailed);
    }

    #[test]
    fn test_sanitize_rejects_traversal() {
        assert_eq!(sanitize_entry_path(Path::new("../etc/passwd")), None);
        assert_eq!(sanitize_entry_path(Path::new("/abs")), None);
        assert_eq!(
            sanitize_entry_path(Path::new("./package/a.js")),
            Some(PathBuf::from("package/a.js"))
        );
    }

    #[test]
    fn test_tarball_entries_from_document() {
        let doc = PackageDocument::new(crate::sources::registry::tests::sample_document());
        let entries = tarball_entries(&doc);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "1.0.0");
        assert_eq!(entries[0].origin, VersionOrigin::DownloadedArchive);
    }
}
