//! AMQP integration for the lobby service
//!
//! This module handles the broker connection, the command message model,
//! ownership validation and the command consumer.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod ownership;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{
    Acknowledger, CommandConsumer, CommandHandler, DeliveryStream, Disposition, InboundDelivery,
};
pub use messages::*;
pub use ownership::{validate_ownership, OwnershipError, OwnershipField};
pub use publisher::{AmqpCommandPublisher, CommandPublisher};
