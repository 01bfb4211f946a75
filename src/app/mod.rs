pub mod bootstrap;
pub mod ports;

pub use bootstrap::{build_scheduler, BuildOptions};
