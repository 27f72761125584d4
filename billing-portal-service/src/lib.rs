pub mod chat;
pub mod orchestrators;
pub mod service;
