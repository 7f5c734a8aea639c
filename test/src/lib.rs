pub mod helpers;
pub mod test_world;

pub use helpers::Peer;
pub use loopback::{FlakyDestination, LoopbackDestination};
pub use test_protocol::protocol;
pub use test_world::{Customer, Order, TestWorld};
