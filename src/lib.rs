pub mod backend;
pub mod camera;
pub mod capture;
pub mod command;
pub mod config;
pub mod error;
pub mod game;
pub mod notify;
pub mod realtime;
pub mod session;
pub mod timer;
pub mod upload;
pub mod wait;

pub use config::BoothConfig;
pub use error::BoothError;
pub use session::{Event, Session, UiEvent};
