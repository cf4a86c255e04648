pub mod chain;
pub mod diff;
pub mod flags;
pub mod mesh;
pub mod rule;
pub mod table;

pub use chain::*;
pub use diff::*;
pub use flags::*;
pub use mesh::*;
pub use rule::*;
pub use table::*;
