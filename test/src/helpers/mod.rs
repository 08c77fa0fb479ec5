mod memory_adapter;
mod mock_host;
mod pair;

pub use memory_adapter::{MemoryAdapter, Sent};
pub use mock_host::{MockHost, MockWorld, StepQueue};
pub use pair::{TestPair, CLIENT_PEER, SERVER_PEER};
