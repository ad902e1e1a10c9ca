pub mod abci;
pub mod timestamp;
pub mod transaction;

pub use abci::*;
pub use timestamp::Timestamp;
pub use transaction::{Payload, Transaction, MAX_READ_IN_BYTES, UNSTAMPED_ROUND_COUNT};
