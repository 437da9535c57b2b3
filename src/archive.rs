use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use tokio::{fs, io::AsyncWriteExt};
use tokio_stream::StreamExt;
use tracing::info;

use crate::{
    error::{RelationsError, Result},
    models::ArchiveManifest,
    parser::{EPISODES_FILE_NAME, RELATIONS_FILE_NAME},
};

pub const ARCHIVE_FILE_NAME: &str = "relations.zip";

const REQUIRED_DATASET_FILES: [&str; 2] = [RELATIONS_FILE_NAME, EPISODES_FILE_NAME];

pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Downloads the archive named by the manifest at `manifest_url`, verifies
/// its size and unpacks it into `cache_dir`.
///
/// Returns the directory holding the extracted dataset files.
pub async fn fetch_latest(
    client: &reqwest::Client,
    manifest_url: &str,
    cache_dir: &Path,
) -> Result<PathBuf> {
    let manifest = fetch_manifest(client, manifest_url).await?;
    info!(
        url = %manifest.browser_download_url,
        size = manifest.size,
        "Resolved archive manifest"
    );

    ensure_cache_dir(cache_dir).await?;
    let archive_path = cache_dir.join(ARCHIVE_FILE_NAME);
    let written = download_archive(client, &manifest.browser_download_url, &archive_path).await?;

    let actual = fs::metadata(&archive_path)
        .await
        .map_err(|err| RelationsError::io(&archive_path, err))?
        .len();
    if actual != manifest.size || written != manifest.size {
        return Err(RelationsError::Integrity {
            expected: manifest.size,
            actual,
        });
    }
    info!(
        path = %archive_path.display(),
        size_mb = %format!("{:.2}", actual as f64 / 1024.0 / 1024.0),
        "Archive downloaded"
    );

    clear_stale_entries(cache_dir, ARCHIVE_FILE_NAME).await?;

    let target_dir = cache_dir.to_path_buf();
    let extracted = tokio::task::spawn_blocking(move || extract_archive(&archive_path, &target_dir))
        .await
        .map_err(|err| RelationsError::Worker(format!("archive extraction task: {err}")))??;
    info!(entries = extracted, "Archive extracted");

    for name in REQUIRED_DATASET_FILES {
        let path = cache_dir.join(name);
        if fs::metadata(&path).await.is_err() {
            return Err(RelationsError::MissingDatasetFile { path });
        }
    }

    Ok(cache_dir.to_path_buf())
}

async fn fetch_manifest(client: &reqwest::Client, url: &str) -> Result<ArchiveManifest> {
    let transfer = |source| RelationsError::Transfer {
        url: url.to_string(),
        source,
    };
    client
        .get(url)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(transfer)?
        .json::<ArchiveManifest>()
        .await
        .map_err(transfer)
}

/// Streams the archive body to `path` chunk by chunk; returns bytes written.
async fn download_archive(client: &reqwest::Client, url: &str, path: &Path) -> Result<u64> {
    let transfer = |source| RelationsError::Transfer {
        url: url.to_string(),
        source,
    };
    let response = client
        .get(url)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(transfer)?;

    let mut file = fs::File::create(path)
        .await
        .map_err(|err| RelationsError::io(path, err))?;
    let stream = response.bytes_stream();
    tokio::pin!(stream);

    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(transfer)?;
        file.write_all(&chunk)
            .await
            .map_err(|err| RelationsError::io(path, err))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|err| RelationsError::io(path, err))?;

    Ok(written)
}

pub async fn ensure_cache_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .map_err(|err| RelationsError::io(path, err))
}

/// Removes everything under `dir` except the entry named `keep`.
async fn clear_stale_entries(dir: &Path, keep: &str) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|err| RelationsError::io(dir, err))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| RelationsError::io(dir, err))?
    {
        if entry.file_name() == keep {
            continue;
        }
        let path = entry.path();
        let file_type = entry
            .file_type()
            .await
            .map_err(|err| RelationsError::io(&path, err))?;
        if file_type.is_dir() {
            fs::remove_dir_all(&path)
                .await
                .map_err(|err| RelationsError::io(&path, err))?;
        } else {
            delete_file_if_exists(&path).await?;
        }
    }
    Ok(())
}

async fn delete_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(RelationsError::io(path, err)),
    }
}

fn extract_archive(archive_path: &Path, target_dir: &Path) -> Result<usize> {
    let archive_error = |message: String| RelationsError::Archive {
        path: archive_path.to_path_buf(),
        message,
    };

    let file =
        std::fs::File::open(archive_path).map_err(|err| RelationsError::io(archive_path, err))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|err| archive_error(err.to_string()))?;

    for idx in 0..archive.len() {
        let mut entry = archive
            .by_index(idx)
            .map_err(|err| archive_error(err.to_string()))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(archive_error(format!(
                "entry escapes target directory: {}",
                entry.name()
            )));
        };
        let out_path = target_dir.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)
                .map_err(|err| RelationsError::io(&out_path, err))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| RelationsError::io(parent, err))?;
        }
        let mut output =
            std::fs::File::create(&out_path).map_err(|err| RelationsError::io(&out_path, err))?;
        io::copy(&mut entry, &mut output).map_err(|err| RelationsError::io(&out_path, err))?;
    }

    Ok(archive.len())
}
