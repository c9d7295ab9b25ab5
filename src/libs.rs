pub mod app;
pub mod assistant;
pub mod backend;
pub mod conversation;
pub mod core;
pub mod feed;
pub mod realtime;
pub mod router;
pub mod sandbox;
pub mod session;
pub mod toast;
pub mod uniffi;
