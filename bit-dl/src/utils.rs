//! Misc utilities.

use crate::common::*;
use flate2::read::GzDecoder;
use tokio::io::AsyncWriteExt as _;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Downloads `url` to `path`.
///
/// The content is written to a `.part` file next to `path` and renamed when
/// the transfer completes, so that an interrupted download never leaves a
/// truncated file at `path`.
pub async fn download_file(url: &str, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let part_path = {
        let mut name = path
            .file_name()
            .ok_or_else(|| format_err!("invalid download path '{}'", path.display()))?
            .to_os_string();
        name.push(".part");
        path.with_file_name(name)
    };

    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }

    info!("downloading '{}' to '{}'", url, path.display());

    let mut response = reqwest::get(url)
        .await
        .and_then(|response| response.error_for_status())
        .with_context(|| format!("failed to download '{}'", url))?;

    let mut file = tokio::fs::File::create(&part_path)
        .await
        .with_context(|| format!("failed to create file '{}'", part_path.display()))?;
    let mut num_bytes = 0;

    while let Some(chunk) = response
        .chunk()
        .await
        .with_context(|| format!("failed to download '{}'", url))?
    {
        num_bytes += chunk.len();
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&part_path, path).await?;
    info!("downloaded {} bytes to '{}'", num_bytes, path.display());

    Ok(())
}

/// Unpacks a tar or gzipped tar archive into `output_dir`.
pub async fn extract_archive(
    archive_path: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
) -> Result<()> {
    let archive_path = archive_path.as_ref().to_owned();
    let output_dir = output_dir.as_ref().to_owned();

    tokio::task::spawn_blocking(move || extract_archive_blocking(&archive_path, &output_dir))
        .await??;
    Ok(())
}

fn extract_archive_blocking(archive_path: &Path, output_dir: &Path) -> Result<()> {
    use std::io::{Read as _, Seek as _, SeekFrom};

    info!(
        "extracting '{}' to '{}'",
        archive_path.display(),
        output_dir.display()
    );

    let mut file = fs::File::open(archive_path)
        .with_context(|| format!("failed to open archive '{}'", archive_path.display()))?;
    let is_gzip = {
        let mut magic = [0u8; 2];
        let is_gzip = file.read_exact(&mut magic).is_ok() && magic == GZIP_MAGIC;
        file.seek(SeekFrom::Start(0))?;
        is_gzip
    };

    fs::create_dir_all(output_dir)?;

    let result = if is_gzip {
        tar::Archive::new(GzDecoder::new(file)).unpack(output_dir)
    } else {
        tar::Archive::new(file).unpack(output_dir)
    };
    result.with_context(|| format!("failed to extract archive '{}'", archive_path.display()))?;

    Ok(())
}
