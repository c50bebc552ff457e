//! Reading an installed distribution's `*.dist-info` directory.

use anyhow::Result;
use log::debug;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::PkglinkError;
use crate::runtime::Runtime;

const DIST_INFO_SUFFIX: &str = ".dist-info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistInfo {
    pub path: PathBuf,
    pub name: String,
    pub version: String,
    pub console_scripts: BTreeMap<String, String>,
    pub summary: Option<String>,
    pub requires_python: Option<String>,
}

/// Distribution names compare case-insensitively with runs of `-`, `_` and `.` folded to `_`.
pub fn normalize_dist_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut separator = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            separator = true;
            continue;
        }
        if separator && !out.is_empty() {
            out.push('_');
        }
        separator = false;
        out.push(c.to_ascii_lowercase());
    }
    out
}

/// `foo_bar-1.2.3.dist-info` -> `("foo_bar", "1.2.3")`.
pub fn split_dist_info_name(dir_name: &str) -> Option<(&str, &str)> {
    let stem = dir_name.strip_suffix(DIST_INFO_SUFFIX)?;
    let (name, version) = stem.split_once('-')?;
    (!name.is_empty() && !version.is_empty()).then_some((name, version))
}

/// Entries of the `[console_scripts]` section of an `entry_points.txt`.
pub fn parse_console_scripts(content: &str) -> BTreeMap<String, String> {
    let mut scripts = BTreeMap::new();
    let mut in_section = false;
    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            in_section = section.trim() == "console_scripts";
            continue;
        }
        if !in_section {
            continue;
        }
        if let Some((name, target)) = line.split_once('=') {
            let (name, target) = (name.trim(), target.trim());
            if !name.is_empty() && !target.is_empty() {
                scripts.insert(name.to_string(), target.to_string());
            }
        }
    }
    scripts
}

/// Value of a header in the leading header block of a `METADATA` file.
fn metadata_header(content: &str, key: &str) -> Option<String> {
    content
        .lines()
        .take_while(|line| !line.trim().is_empty())
        .filter(|line| !line.starts_with([' ', '\t']))
        .filter_map(|line| line.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case(key))
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != "UNKNOWN")
}

/// Read the dist-info of the first of `names` installed under `install_root`.
#[tracing::instrument(skip(runtime))]
pub fn find_dist_info<R: Runtime>(
    runtime: &R,
    install_root: &Path,
    names: &[String],
) -> Result<DistInfo> {
    let wanted: Vec<String> = names.iter().map(|n| normalize_dist_name(n)).collect();

    let mut best: Option<(usize, PathBuf, String, String)> = None;
    for path in runtime.read_dir(install_root)? {
        let Some(dir_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some((name, version)) = split_dist_info_name(dir_name) else {
            continue;
        };
        let Some(rank) = wanted.iter().position(|w| *w == normalize_dist_name(name)) else {
            continue;
        };
        if !runtime.is_dir(&path) {
            continue;
        }
        if best.as_ref().is_none_or(|(r, ..)| rank < *r) {
            best = Some((rank, path.clone(), name.to_string(), version.to_string()));
        }
    }

    let Some((_, path, name, version)) = best else {
        return Err(PkglinkError::Resolution {
            requested: names
                .iter()
                .map(|n| format!("{}-*{}", n, DIST_INFO_SUFFIX))
                .collect::<Vec<_>>()
                .join(" or "),
            root: install_root.to_path_buf(),
        }
        .into());
    };
    debug!("Using {:?} for {} {}", path, name, version);

    let entry_points = path.join("entry_points.txt");
    let console_scripts = if runtime.is_file(&entry_points) {
        parse_console_scripts(&runtime.read_to_string(&entry_points)?)
    } else {
        BTreeMap::new()
    };

    let metadata = path.join("METADATA");
    let (summary, requires_python) = if runtime.is_file(&metadata) {
        let content = runtime.read_to_string(&metadata)?;
        (
            metadata_header(&content, "Summary"),
            metadata_header(&content, "Requires-Python"),
        )
    } else {
        (None, None)
    };

    Ok(DistInfo {
        path,
        name,
        version,
        console_scripts,
        summary,
        requires_python,
    })
}
