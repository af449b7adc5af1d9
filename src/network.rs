// Capture listener module root
pub mod http_reader;
pub mod network_listener;
pub mod websocket;

pub use http_reader::{read_request, write_response};
pub use network_listener::{handle_connection, NetworkListener};
pub use websocket::serve_websocket;
