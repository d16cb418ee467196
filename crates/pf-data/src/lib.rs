pub mod scores;
pub mod reward_log;
pub mod storage;

pub use scores::*;
pub use reward_log::*;
pub use storage::*;
