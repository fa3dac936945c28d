use super::*;
use crate::common::*;

/// The summary of a checkpoint import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightImport {
    /// Names of the loaded backbone variables.
    pub loaded: Vec<String>,
    /// Checkpoint keys without a backbone counterpart, including the upstream head.
    pub skipped: Vec<String>,
}

/// Loads a BiT `.npz` checkpoint into the backbone variables of `vs`.
pub fn load_bit_weights(vs: &nn::VarStore, path: impl AsRef<Path>) -> Result<WeightImport> {
    let path = path.as_ref();
    let entries = Tensor::read_npz(path)
        .with_context(|| format!("failed to read checkpoint file '{}'", path.display()))?;
    import_bit_weights(vs, entries)
}

/// Copies checkpoint tensors into the backbone variables of `vs`.
///
/// Every variable in the backbone namespace must be covered by the checkpoint.
/// Entries of the upstream head and unknown entries are skipped.
pub fn import_bit_weights(
    vs: &nn::VarStore,
    entries: impl IntoIterator<Item = (String, Tensor)>,
) -> Result<WeightImport> {
    let variables = vs.variables();
    let prefix = format!("{}.", BACKBONE_NAMESPACE);
    let head_prefix = format!("{}/head/", BACKBONE_NAMESPACE);
    let mut loaded = HashSet::new();
    let mut skipped = vec![];

    tch::no_grad(|| -> Result<()> {
        for (key, value) in entries {
            let key = key.strip_suffix(".npy").unwrap_or(&key);
            let var_name = checkpoint_key_to_var_name(key);

            let var = match variables.get(&var_name) {
                Some(var) if var_name.starts_with(&prefix) => var,
                _ => {
                    if key.starts_with(&head_prefix) {
                        info!("skip upstream head weight '{}'", key);
                    } else {
                        warn!("ignore unknown checkpoint entry '{}'", key);
                    }
                    skipped.push(key.to_owned());
                    continue;
                }
            };

            let value = checkpoint_to_var_layout(&value);
            let var_size = var.size();
            let shape_matches = if value.dim() == var_size.len() {
                value.size() == var_size
            } else {
                value.numel() == var.numel()
            };
            ensure!(
                shape_matches,
                "shape mismatch for '{}', the checkpoint has {:?} but the variable has {:?}",
                key,
                value.size(),
                var_size
            );

            let value = value
                .reshape(&var_size)
                .to_kind(var.kind())
                .to_device(var.device());
            var.shallow_clone().copy_(&value);
            loaded.insert(var_name);
        }
        Ok(())
    })?;

    let missing: Vec<_> = variables
        .keys()
        .filter(|name| name.starts_with(&prefix) && !loaded.contains(*name))
        .sorted()
        .collect();
    ensure!(
        missing.is_empty(),
        "the checkpoint lacks {} backbone weights: {}",
        missing.len(),
        missing.iter().join(", ")
    );

    info!(
        "loaded {} pretrained weights, skipped {} checkpoint entries",
        loaded.len(),
        skipped.len()
    );

    Ok(WeightImport {
        loaded: loaded.into_iter().sorted().collect(),
        skipped,
    })
}

/// Converts a checkpoint key like `resnet/block1/unit01/a/group_norm/gamma`
/// to the variable name `resnet.block1.unit01.a.group_norm.weight`.
pub fn checkpoint_key_to_var_name(key: &str) -> String {
    key.split('/')
        .with_position()
        .map(|position| match position {
            itertools::Position::Last(name) | itertools::Position::Only(name) => match name {
                "kernel" | "gamma" => "weight",
                "beta" => "bias",
                name => name,
            },
            itertools::Position::First(name) | itertools::Position::Middle(name) => name,
        })
        .join(".")
}

/// Converts HWIO convolution kernels to the OIHW layout and keeps other tensors.
pub fn checkpoint_to_var_layout(value: &Tensor) -> Tensor {
    if value.dim() == 4 {
        value.permute(&[3, 2, 0, 1])
    } else {
        value.shallow_clone()
    }
}
