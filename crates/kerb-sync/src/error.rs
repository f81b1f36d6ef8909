use thiserror::Error;

/// Transport-level failures. Delivery is at-most-once: a failed send is
/// reported to the caller and never retried by this layer.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection not established")]
    NotConnected,

    #[error("connection driver has shut down")]
    Closed,
}
