use {
    crate::{declaration::OptionalConfig, stack::Layer},
    std::convert::Infallible,
};

#[derive(Debug, Clone, Default)]
pub struct DefaultLayer(OptionalConfig);

impl DefaultLayer {
    pub const fn new(default: OptionalConfig) -> Self {
        Self(default)
    }
}

impl Layer for DefaultLayer {
    type Err = Infallible;

    fn try_load(self) -> Result<OptionalConfig, Self::Err> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::declaration::OptionalPool};

    #[test]
    fn test_default_layer_passes_given_config_unchanged() {
        let expected_config = OptionalConfig {
            pool: Some(OptionalPool {
                max_workers: Some(2),
            }),
            ..Default::default()
        };
        let layer = DefaultLayer(expected_config.clone());
        let actual_config = layer.try_load().unwrap();

        assert_eq!(actual_config, expected_config);
    }
}
