use {
    crate::{declaration::OptionalConfig, stack::Layer},
    std::{env, env::Vars},
};

#[derive(Debug, Clone, Default)]
pub struct EnvLayer<Vars>(Vars);

impl EnvLayer<Vars> {
    pub fn new() -> Self {
        Self(env::vars())
    }
}

impl<Vars: IntoIterator<Item = (K, K)>, K: AsRef<str>> Layer for EnvLayer<Vars> {
    type Err = serde_env::Error;

    fn try_load(self) -> Result<OptionalConfig, Self::Err> {
        serde_env::from_iter_with_prefix(self.0, "ORDO")
    }
}
