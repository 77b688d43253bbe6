pub mod event_publisher;
pub mod redis_manager;
pub mod request_consumer;
