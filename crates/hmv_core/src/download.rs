use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use serde::Serialize;
use tokio::fs;
use tracing::info;

use crate::client::HmvClient;

/// Archives are hosted on MEGA; the resolved link is handed to the user
/// together with the path the archive is expected at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadOutcome {
    pub url: String,
    pub path: PathBuf,
}

pub fn download_source_url(download_base: &str, vm: &str) -> String {
    format!(
        "{}/{}.zip",
        download_base.trim_end_matches('/'),
        vm.trim().to_lowercase()
    )
}

pub fn is_mega_link(url: &str) -> bool {
    let lowered = url.to_ascii_lowercase();
    lowered.contains("mega.nz") || lowered.contains("mega.io")
}

pub fn archive_path(dest_dir: &Path, vm: &str) -> Result<PathBuf> {
    let stem = sanitize_filename(vm);
    if stem.is_empty() {
        bail!("cannot derive an archive name from VM name {vm:?}");
    }
    Ok(dest_dir.join(format!("{stem}.zip")))
}

pub fn sanitize_filename(value: &str) -> String {
    let mut output = String::new();
    let mut previous_dash = false;
    for ch in value.chars() {
        if ch.is_whitespace() || matches!(ch, '<' | '>' | ':' | '"' | '|' | '?' | '*' | '/' | '\\')
        {
            if !previous_dash && !output.is_empty() {
                output.push('-');
                previous_dash = true;
            }
            continue;
        }
        output.push(ch);
        previous_dash = false;
    }
    while output.ends_with('-') {
        output.pop();
    }
    output
}

/// Accept `resolved` only when the download redirect landed on MEGA.
pub fn mega_link(resolved: &str, vm: &str) -> Result<String> {
    if !is_mega_link(resolved) {
        bail!("valid MEGA link not found for {vm} (resolved to {resolved})");
    }
    Ok(resolved.to_string())
}

pub async fn download_vm(client: &HmvClient, vm: &str, dest_dir: &Path) -> Result<DownloadOutcome> {
    let path = archive_path(dest_dir, vm)?;
    ensure_absent(&path).await?;

    let source = download_source_url(&client.config().download_url, vm);
    let response = client.get_absolute(&source).await?;
    let resolved = response.url().to_string();
    info!(vm, resolved = %resolved, "resolved download link");

    let url = mega_link(&resolved, vm)?;
    Ok(DownloadOutcome { url, path })
}

/// Existing archives are never replaced.
async fn ensure_absent(path: &Path) -> Result<()> {
    if fs::try_exists(path).await.unwrap_or(false) {
        bail!("file {} already exists", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempfile::tempdir;

    use super::{
        archive_path, download_source_url, ensure_absent, is_mega_link, mega_link, sanitize_filename,
    };

    #[test]
    fn source_url_lowercases_vm_name() {
        assert_eq!(
            download_source_url("https://downloads.hackmyvm.eu/", " Gift "),
            "https://downloads.hackmyvm.eu/gift.zip"
        );
    }

    #[test]
    fn mega_links_are_detected() {
        assert!(is_mega_link("https://mega.nz/file/abc#key"));
        assert!(is_mega_link("https://MEGA.io/file/abc"));
        assert!(!is_mega_link("https://downloads.hackmyvm.eu/gift.zip"));
    }

    #[test]
    fn sanitize_filename_strips_invalid_characters() {
        assert_eq!(sanitize_filename("../Gift"), "..-Gift");
        assert_eq!(sanitize_filename("  Deep   Dive "), "Deep-Dive");
        assert_eq!(sanitize_filename("a:b*c"), "a-b-c");
    }

    #[test]
    fn archive_path_rejects_empty_names() {
        let dir = Path::new("/tmp/downloads");
        assert_eq!(
            archive_path(dir, "Gift").expect("path"),
            dir.join("Gift.zip")
        );
        assert!(archive_path(dir, " / ").is_err());
    }

    #[test]
    fn non_mega_resolution_is_rejected() {
        let error = mega_link("https://downloads.hackmyvm.eu/gift.zip", "Gift")
            .expect_err("must reject");
        assert!(error.to_string().contains("valid MEGA link not found"));
        assert_eq!(
            mega_link("https://mega.nz/file/abc#key", "Gift").expect("mega"),
            "https://mega.nz/file/abc#key"
        );
    }

    #[tokio::test]
    async fn existing_archive_is_never_overwritten() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("Gift.zip");
        std::fs::write(&path, b"keep").expect("seed file");

        let error = ensure_absent(&path).await.expect_err("must refuse");
        assert!(error.to_string().contains("already exists"));
        assert_eq!(std::fs::read(&path).expect("read"), b"keep");
    }

    #[tokio::test]
    async fn missing_archive_passes_and_nothing_is_written() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("Gift.zip");
        ensure_absent(&path).await.expect("absent");
        assert!(!path.exists());
    }
}
