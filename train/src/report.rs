//! The per-class average precision report.

use crate::common::*;

/// The average precision of each class of the test split.
#[derive(Debug, Clone, PartialEq)]
pub struct ApReport {
    pub class_names: Vec<String>,
    pub aps: Vec<R64>,
}

impl ApReport {
    /// Computes AP per class from `[num_examples, num_classes]` ground truth and scores.
    pub fn new(class_names: Vec<String>, ground_truth: &Tensor, scores: &Tensor) -> Result<Self> {
        let aps = metrics::average_precision_per_class(ground_truth, scores)?;
        ensure!(
            aps.len() == class_names.len(),
            "expect {} classes, but get {} average precisions",
            class_names.len(),
            aps.len()
        );
        Ok(Self { class_names, aps })
    }

    pub fn mean_ap(&self) -> Option<R64> {
        (!self.aps.is_empty())
            .then(|| self.aps.iter().copied().sum::<R64>() / self.aps.len() as f64)
    }

    /// Writes `category,ap` rows in vocabulary order without a header.
    pub fn write_csv<W>(&self, writer: W) -> Result<()>
    where
        W: std::io::Write,
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        for (name, ap) in izip!(&self.class_names, &self.aps) {
            let ap = format!("{:.4}", ap.raw());
            writer.write_record(&[name.as_str(), ap.as_str()])?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Writes the report to `<dir>/<name>.csv` and returns the file path.
    pub fn save(&self, dir: impl AsRef<Path>, name: &str) -> Result<PathBuf> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory '{}'", dir.display()))?;
        let path = dir.join(format!("{}.csv", name));
        let file = std::fs::File::create(&path)
            .with_context(|| format!("failed to create report file '{}'", path.display()))?;
        self.write_csv(file)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> ApReport {
        ApReport {
            class_names: vec!["Baroque".into(), "Cubism".into()],
            aps: vec![r64(0.5), r64(2.0 / 3.0)],
        }
    }

    #[test]
    fn csv_rows() -> Result<()> {
        let mut buf = vec![];
        report().write_csv(&mut buf)?;
        assert_eq!(String::from_utf8(buf)?, "Baroque,0.5000\nCubism,0.6667\n");
        Ok(())
    }

    #[test]
    fn mean_ap() {
        assert_abs_diff_eq!(report().mean_ap().unwrap().raw(), 7.0 / 12.0, epsilon = 1e-9);
        let empty = ApReport {
            class_names: vec![],
            aps: vec![],
        };
        assert_eq!(empty.mean_ap(), None);
    }

    #[test]
    fn save_named_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ground_truth = Tensor::of_slice(&[1f32, 0., 0., 1.]).view([2, 2]);
        let scores = Tensor::of_slice(&[0.9f32, 0.1, 0.2, 0.8]).view([2, 2]);
        let report = ApReport::new(vec!["cat".into(), "dog".into()], &ground_truth, &scores)?;

        let path = report.save(dir.path().join("reports"), "run")?;
        assert_eq!(path, dir.path().join("reports").join("run.csv"));
        assert_eq!(std::fs::read_to_string(&path)?, "cat,1.0000\ndog,1.0000\n");
        Ok(())
    }
}
