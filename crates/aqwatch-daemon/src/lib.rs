pub mod core;
pub mod http;
pub mod state;
pub mod timer;
