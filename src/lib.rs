pub mod configuration;
pub use configuration::Config;

pub mod controller;
pub use controller::Controller;

pub mod data_capture;
pub use data_capture::{CaptureOutcome, CaptureService};

pub mod error_handling;

pub mod formatting;

pub mod identifier;
pub use identifier::{BinId, ConnectionId};

pub mod network;

pub mod retention;
pub use retention::RetentionSweeper;

pub mod storage;
pub use storage::{BinStorage, FileBinStore};

pub mod web_interface;
