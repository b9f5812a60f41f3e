//! Connector port: how to open, ping and close a client handle for an
//! external service.

/// Opens client handles for one external service.
pub trait Connector: Send + Sync {
    /// Live client handle.
    type Handle: Send + Sync;

    /// Connection error.
    type Error: std::fmt::Display;

    /// Service name for logs.
    fn service(&self) -> &'static str;

    /// Open a new handle.
    ///
    /// # Errors
    /// Returns error if the service cannot be reached.
    fn connect(&self) -> Result<Self::Handle, Self::Error>;

    /// Cheap liveness check.
    fn ping(&self, handle: &Self::Handle) -> bool;

    /// Tear down a handle.
    fn close(&self, _handle: &Self::Handle) {}
}
