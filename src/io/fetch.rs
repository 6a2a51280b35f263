//! Archive fetcher: downloads the boundary archive and extracts it.
//!
//! Contract: once [`fetch_archive`] returns, the configured MapInfo file
//! exists under the download directory.

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::paths::PathResolver;
use object_store::http::HttpBuilder;
use object_store::{ClientOptions, ObjectStore};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Split an archive URL into the store base URL and the object name.
///
/// The base is returned without a trailing slash.
pub fn split_archive_url(url: &str) -> Result<(&str, &str)> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| PipelineError::Fetch(format!("Invalid archive URL '{}': missing scheme", url)))?;
    if scheme.is_empty() {
        return Err(PipelineError::Fetch(format!("Invalid archive URL '{}': missing scheme", url)));
    }

    match rest.rsplit_once('/') {
        Some((host_path, name)) if !host_path.is_empty() && !name.is_empty() => {
            let base_len = scheme.len() + 3 + host_path.len();
            Ok((&url[..base_len], name))
        }
        _ => Err(PipelineError::Fetch(format!(
            "Invalid archive URL '{}': expected 'scheme://host/.../archive.zip'",
            url
        ))),
    }
}

/// Download `{baseUrl}{download.zip}` into the download directory and extract it.
///
/// Returns the path of the MapInfo source file.
pub async fn fetch_archive(config: &Config) -> Result<PathBuf> {
    let resolver = PathResolver::new(config);
    let download_dir = config.download_dir.clone();

    tokio::fs::create_dir_all(&download_dir)
        .await
        .map_err(|e| PipelineError::filesystem(&download_dir, e))?;

    let url = config.archive_url();
    let (base, name) = split_archive_url(&url)?;

    // object_store refuses plain http unless told otherwise
    let options = ClientOptions::new().with_allow_http(base.starts_with("http://"));
    let store = HttpBuilder::new()
        .with_url(base)
        .with_client_options(options)
        .build()
        .map_err(|e| PipelineError::Fetch(format!("Failed to create HTTP client for {}: {}", base, e)))?;

    tracing::info!("Downloading {}", url);
    let bytes = store
        .get(&object_store::path::Path::from(name))
        .await
        .map_err(|e| PipelineError::Fetch(format!("GET {} failed: {}", url, e)))?
        .bytes()
        .await
        .map_err(|e| PipelineError::Fetch(format!("Reading {} failed: {}", url, e)))?;

    let archive = resolver.archive();
    tokio::fs::write(&archive, &bytes)
        .await
        .map_err(|e| PipelineError::filesystem(&archive, e))?;
    tracing::info!("Saved {} ({} bytes)", archive.display(), bytes.len());

    let dest = download_dir.clone();
    let archive_path = archive.clone();
    let extracted = tokio::task::spawn_blocking(move || extract_archive(&archive_path, &dest))
        .await
        .map_err(|e| PipelineError::TaskFailed {
            unit: format!("extract {}", archive.display()),
            message: e.to_string(),
        })??;
    tracing::info!("Extracted {} entries into {}", extracted, download_dir.display());

    let source = resolver.mapinfo_source();
    if !source.exists() {
        return Err(PipelineError::SourceMissing(source));
    }
    Ok(source)
}

/// Extract every entry of a zip archive below `dest`, creating directories
/// as needed. Entries that would land outside `dest` are rejected.
///
/// Returns the number of entries extracted.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<usize> {
    let file = File::open(archive).map_err(|e| PipelineError::filesystem(archive, e))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| PipelineError::Fetch(format!("Invalid zip {}: {}", archive.display(), e)))?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| PipelineError::Fetch(format!("Corrupt zip entry {}: {}", i, e)))?;

        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| PipelineError::Fetch(format!("Unsafe zip entry name '{}'", entry.name())))?;
        let out_path = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|e| PipelineError::filesystem(&out_path, e))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PipelineError::filesystem(parent, e))?;
        }
        let mut out = File::create(&out_path).map_err(|e| PipelineError::filesystem(&out_path, e))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| PipelineError::filesystem(&out_path, e))?;
        tracing::debug!("Extracted {}", out_path.display());
    }

    Ok(zip.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, contents) in entries {
            writer.start_file(*name, zip::write::FileOptions::default()).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    /// Serve `body` at `/files/{name}` over HTTP/1.1; every other path is a 404.
    /// Returns the base URL, with a trailing slash.
    async fn serve(name: &'static str, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let wanted = format!("GET /files/{} ", name);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let body = body.clone();
                let wanted = wanted.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }

                    let response = if String::from_utf8_lossy(&request).starts_with(&wanted) {
                        let mut head = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/zip\r\n\
                             Content-Length: {}\r\nLast-Modified: Mon, 01 Jan 2024 00:00:00 GMT\r\n\
                             ETag: \"1\"\r\nConnection: close\r\n\r\n",
                            body.len()
                        )
                        .into_bytes();
                        head.extend_from_slice(&body);
                        head
                    } else {
                        b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec()
                    };
                    let _ = socket.write_all(&response).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        format!("http://{}/files/", addr)
    }

    fn fetch_config(dir: &Path, base_url: &str, zip: &str) -> Config {
        serde_json::from_value(serde_json::json!({
            "baseFileName": "base",
            "downloadDir": dir.join("download"),
            "baseUrl": base_url,
            "download": { "zip": zip, "mapinfoFile": "COM_ELB.TAB" },
            "simplifyPercentages": [10],
            "divisions": [],
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_downloads_extracts_and_checks_source() {
        let dir = TempDir::new().unwrap();
        let archive = zip_bytes(&[("COM_ELB.TAB", "tab"), ("COM_ELB.MAP", "map")]);
        let base_url = serve("national.zip", archive.clone()).await;
        let config = fetch_config(dir.path(), &base_url, "national.zip");

        let source = fetch_archive(&config).await.unwrap();

        assert_eq!(source, dir.path().join("download/COM_ELB.TAB"));
        assert_eq!(std::fs::read_to_string(&source).unwrap(), "tab");
        assert!(dir.path().join("download/COM_ELB.MAP").exists());
        assert_eq!(std::fs::read(dir.path().join("download/national.zip")).unwrap(), archive);
    }

    #[tokio::test]
    async fn test_fetch_without_source_in_archive_is_source_missing() {
        let dir = TempDir::new().unwrap();
        let base_url = serve("national.zip", zip_bytes(&[("README.txt", "no map here")])).await;
        let config = fetch_config(dir.path(), &base_url, "national.zip");

        let err = fetch_archive(&config).await.unwrap_err();

        assert!(matches!(err, PipelineError::SourceMissing(_)));
        assert!(dir.path().join("download/README.txt").exists());
    }

    #[tokio::test]
    async fn test_fetch_missing_archive_is_fetch_error() {
        let dir = TempDir::new().unwrap();
        let base_url = serve("national.zip", zip_bytes(&[("COM_ELB.TAB", "tab")])).await;
        let config = fetch_config(dir.path(), &base_url, "other.zip");

        let err = fetch_archive(&config).await.unwrap_err();

        assert!(matches!(err, PipelineError::Fetch(_)));
        assert!(!dir.path().join("download/other.zip").exists());
    }

    fn write_zip(path: &Path, entries: &[(&str, Option<&str>)]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        for (name, contents) in entries {
            match contents {
                Some(data) => {
                    writer.start_file(*name, options).unwrap();
                    writer.write_all(data.as_bytes()).unwrap();
                }
                None => writer.add_directory(*name, options).unwrap(),
            }
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_split_archive_url() {
        assert_eq!(
            split_archive_url("https://example.org/files/national.zip").unwrap(),
            ("https://example.org/files", "national.zip")
        );
        assert_eq!(
            split_archive_url("http://example.org/a.zip").unwrap(),
            ("http://example.org", "a.zip")
        );
    }

    #[test]
    fn test_split_archive_url_invalid() {
        assert!(split_archive_url("example.org/a.zip").is_err());
        assert!(split_archive_url("https://example.org/").is_err());
        assert!(split_archive_url("https://example.org").is_err());
        assert!(split_archive_url("://example.org/a.zip").is_err());
    }

    #[test]
    fn test_extract_creates_nested_directories() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("data.zip");
        write_zip(
            &archive,
            &[
                ("docs/", None),
                ("COM_ELB.TAB", Some("tab")),
                ("nested/deeper/COM_ELB.MAP", Some("map")),
            ],
        );

        let dest = dir.path().join("download");
        let count = extract_archive(&archive, &dest).unwrap();

        assert_eq!(count, 3);
        assert!(dest.join("docs").is_dir());
        assert_eq!(std::fs::read_to_string(dest.join("COM_ELB.TAB")).unwrap(), "tab");
        assert_eq!(
            std::fs::read_to_string(dest.join("nested/deeper/COM_ELB.MAP")).unwrap(),
            "map"
        );
    }

    #[test]
    fn test_extract_rejects_escaping_entries() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("evil.zip");
        write_zip(&archive, &[("../escaped.txt", Some("x"))]);

        let dest = dir.path().join("download");
        let err = extract_archive(&archive, &dest).unwrap_err();
        assert!(matches!(err, PipelineError::Fetch(_)));
        assert!(!dir.path().join("escaped.txt").exists());
    }

    #[test]
    fn test_extract_invalid_zip() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("not.zip");
        std::fs::write(&archive, "plain text").unwrap();
        assert!(extract_archive(&archive, dir.path()).is_err());
    }
}
