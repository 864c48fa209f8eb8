pub mod classify;
pub mod error;
pub mod history;
pub mod scene;
pub mod session;
