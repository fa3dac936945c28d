use crate::{common::*, utils};

const COMPLETE_MARKER: &str = ".complete";

/// The location of a downloadable dataset archive.
#[derive(Debug, Clone)]
pub struct DatasetArchive<'a> {
    /// The dataset name, which names the cached archive and extraction directories.
    pub name: &'a str,
    pub url: &'a str,
    /// A file expected in the dataset root directory.
    pub descriptor_file: &'a Path,
}

impl DatasetArchive<'_> {
    /// Finds the directory containing the descriptor file.
    ///
    /// A manually prepared `manual_dir` takes precedence. Otherwise the archive
    /// is downloaded into `cache_dir` and extracted once, and later calls reuse
    /// the extracted files.
    pub async fn locate_root(
        &self,
        manual_dir: Option<&Path>,
        cache_dir: impl AsRef<Path>,
    ) -> Result<PathBuf> {
        if let Some(manual_dir) = manual_dir {
            ensure!(
                manual_dir.is_dir(),
                "the manual dataset directory '{}' does not exist",
                manual_dir.display()
            );
            info!("use manually prepared dataset at '{}'", manual_dir.display());
            return self.find_root(manual_dir);
        }

        let cache_dir = cache_dir.as_ref();
        let extract_dir = cache_dir.join("extracted").join(self.name);
        let marker = extract_dir.join(COMPLETE_MARKER);

        if !marker.is_file() {
            let archive_path = cache_dir
                .join("downloads")
                .join(format!("{}.archive", self.name));

            if archive_path.is_file() {
                info!("reuse downloaded archive '{}'", archive_path.display());
            } else {
                utils::download_file(self.url, &archive_path).await?;
            }

            utils::extract_archive(&archive_path, &extract_dir).await?;
            tokio::fs::write(&marker, b"").await?;
        }

        self.find_root(&extract_dir)
    }

    /// Searches the directory and its immediate subdirectories for the descriptor file.
    fn find_root(&self, dir: &Path) -> Result<PathBuf> {
        if dir.join(self.descriptor_file).is_file() {
            return Ok(dir.to_owned());
        }

        let candidates: Vec<PathBuf> = fs::read_dir(dir)?
            .map(|entry| -> Result<_> { Ok(entry?.path()) })
            .filter_ok(|path| path.is_dir() && path.join(self.descriptor_file).is_file())
            .collect::<Result<_>>()?;

        match candidates.as_slice() {
            [root] => Ok(root.to_owned()),
            [] => bail!(
                "unable to find '{}' in '{}'",
                self.descriptor_file.display(),
                dir.display()
            ),
            _ => bail!(
                "ambiguous dataset root, '{}' is found in multiple directories in '{}'",
                self.descriptor_file.display(),
                dir.display()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_dir_with_nested_root() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let nested = dir.path().join("wikipaintings");
        fs::create_dir_all(&nested)?;
        fs::write(nested.join("Wikipaintings_5.yaml"), "")?;

        let archive = DatasetArchive {
            name: "wikipaintings",
            url: "http://localhost/unused",
            descriptor_file: Path::new("Wikipaintings_5.yaml"),
        };
        let root = archive
            .locate_root(Some(dir.path()), dir.path().join("cache"))
            .await?;
        assert_eq!(root, nested);

        let missing = DatasetArchive {
            descriptor_file: Path::new("Wikipaintings_10.yaml"),
            ..archive
        };
        assert!(missing
            .locate_root(Some(dir.path()), dir.path().join("cache"))
            .await
            .is_err());

        Ok(())
    }

    #[tokio::test]
    async fn reuse_cached_extraction() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let extract_dir = dir.path().join("extracted/wikipaintings");
        fs::create_dir_all(&extract_dir)?;
        fs::write(extract_dir.join(COMPLETE_MARKER), "")?;
        fs::write(extract_dir.join("Wikipaintings_100.yaml"), "")?;

        let archive = DatasetArchive {
            name: "wikipaintings",
            url: "http://localhost/unused",
            descriptor_file: Path::new("Wikipaintings_100.yaml"),
        };
        let root = archive.locate_root(None, dir.path()).await?;
        assert_eq!(root, extract_dir);

        Ok(())
    }
}
