// Web Interface module root
pub mod routes;
pub mod types;
pub mod web_server;

// Re-export commonly used items
pub use routes::{delete_bin, inspect_bin, new_bin, routes};
pub use types::{Annotated, ApiError, BinView, NewBinResponse, SocketView};
pub use web_server::WebServer;
