pub mod gateway;
pub mod listener;
pub mod state;

pub use gateway::{GatewayReadGuard, GatewayWriteGuard, LifecycleGateway};
pub use listener::{StopListener, StopListenerId};
pub use state::GatewayState;
