use {
    crate::{declaration::OptionalConfig, stack::Layer},
    clap::Parser,
    std::{
        env::{self, ArgsOs},
        ffi::OsString,
    },
};

#[derive(Debug, Clone, Default)]
pub struct CliLayer<Args>(Args);

impl CliLayer<ArgsOs> {
    pub fn new() -> Self {
        Self(env::args_os())
    }
}

impl<Args: IntoIterator<Item: Into<OsString> + Clone>> Layer for CliLayer<Args> {
    type Err = clap::Error;

    fn try_load(self) -> Result<OptionalConfig, Self::Err> {
        OptionalConfig::try_parse_from(self.0)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::declaration::OptionalPool};

    #[test]
    fn test_cli_layer_parses_arguments_successfully() {
        let layer = CliLayer(vec![
            "",
            "--pool.max-workers",
            "4",
            "--paths.runtime-dir",
            "runtime",
        ]);
        let actual_config = layer.try_load().unwrap();
        assert_eq!(
            actual_config.pool,
            Some(OptionalPool {
                max_workers: Some(4)
            })
        );
        let paths = actual_config.paths.unwrap();
        assert_eq!(paths.runtime_dir.as_deref(), Some(std::path::Path::new("runtime")));
        assert_eq!(paths.repo_root, None);
    }
}
