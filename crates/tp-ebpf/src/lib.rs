#[cfg(target_os = "linux")]
pub mod bpffs;
pub mod error;
pub mod loader;
pub mod maps;
pub mod programs;
pub mod runner;

#[cfg(target_os = "linux")]
pub use bpffs::*;
pub use error::*;
pub use loader::*;
pub use maps::*;
pub use programs::*;
pub use runner::*;
