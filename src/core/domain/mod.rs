pub mod comparison;
pub mod events;
pub mod run;
pub mod stats;

pub use comparison::*;
pub use events::*;
pub use run::*;
pub use stats::*;
pub use test::*;
