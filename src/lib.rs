pub mod bot;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod qna;
pub mod telemetry;
pub mod types;

pub use bot::run;
