pub mod bridge;
pub mod error;
pub mod memory;
pub mod socket_state;

pub use bridge::StoreBridge;
pub use error::StoreError;
pub use memory::{MemoryStore, StoreAction, StoreMutation};
pub use socket_state::SocketState;
