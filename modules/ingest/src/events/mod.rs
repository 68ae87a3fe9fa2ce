pub mod processor;
pub mod publisher;
pub mod replay;
