pub use {
    declaration::*,
    layers::{CliLayer, DefaultLayer, EnvLayer, FileLayer},
    stack::{ConfigBuilder, Layer},
};

mod declaration;
mod layers;
mod stack;
