// Transfer orchestration: request state, its registry and the driver wrapper.

pub mod buffer;
pub mod form;
pub mod record;
pub mod registry;
pub mod request;
pub mod stats;
pub mod transfer;
