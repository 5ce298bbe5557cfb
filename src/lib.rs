//! Seat, grab and focus routing for IVI compositors.
//!
//! Raw keyboard, pointer and touch input from every seat is intercepted by
//! per-seat grabs and dispatched to the application surfaces that hold focus
//! for that device class and accept that seat. A privileged client drives
//! focus and acceptance through the `ivi_input` protocol.

pub mod backend;
pub mod compositor;
pub mod config;
pub mod handlers;
pub mod headless;
pub mod protocols;
pub mod signal;
pub mod state;
pub mod surface;

pub use backend::{Backend, BoundResources, DeviceEvent, Lifecycle};
pub use config::Config;
pub use handlers::{
    control::ControlEvent,
    input::InputEvent,
    seat::{Grab, SeatContext},
};
pub use signal::{ListenerToken, Signal};
pub use state::{DeviceClass, InputRouting, RoutingError};
pub use surface::{AcceptanceList, SurfaceContext};

/// Installs the fmt subscriber, honouring `RUST_LOG` when it parses.
pub fn init_logging() {
    if let Ok(env_filter) = tracing_subscriber::EnvFilter::try_from_default_env() {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().init();
    }
}
