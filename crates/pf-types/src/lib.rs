pub mod panel;
pub mod scores;
pub mod errors;

pub use panel::*;
pub use scores::*;
pub use errors::*;
