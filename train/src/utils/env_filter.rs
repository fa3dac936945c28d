use crate::common::*;

/// The log filter of the given `RUST_LOG` directives, `info` if unset.
pub fn env_filter(directives: Option<&str>) -> Result<EnvFilter> {
    let filter = match directives {
        Some(directives) => EnvFilter::try_new(directives)?,
        None => EnvFilter::default().add_directive(LevelFilter::INFO.into()),
    };
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_to_info() -> Result<()> {
        assert_eq!(env_filter(None)?.to_string(), "info");
        assert_eq!(
            env_filter(Some("warn,train=debug"))?.to_string(),
            EnvFilter::try_new("warn,train=debug")?.to_string()
        );
        Ok(())
    }
}
