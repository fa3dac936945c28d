use crate::common::*;

/// Returns the checkpoint path of `model` in `dir`, downloading it first if absent.
pub async fn ensure_pretrained_weights(dir: impl AsRef<Path>, model: &ModelName) -> Result<PathBuf> {
    let dir = dir.as_ref();
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create directory '{}'", dir.display()))?;

    let path = dir.join(model.file_name());
    if path.is_file() {
        info!("use pretrained weights '{}'", path.display());
    } else {
        let url = model.url();
        info!("downloading the model from {}", url);
        bit_dl::utils::download_file(&url, &path)
            .await
            .with_context(|| format!("failed to download pretrained weights of {}", model))?;
    }

    Ok(path)
}
