mod tunnel_error;

pub use tunnel_error::{TunnelError, TunnelErrorKind};
