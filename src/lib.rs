pub mod bus;
pub mod chat;
pub mod config;
pub mod consumers;
pub mod error;
pub mod live;
pub mod voice;

pub use clouds_ai_types as types;
pub use clouds_ai_utils as utils;

pub use bus::{CommandBus, Delivery, Subscription};
pub use error::AgentError;
