//! Startup and serving failures of the binary.

use std::{io, net::SocketAddr};

use thiserror::Error;
use tracing_subscriber::util::TryInitError;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("failed to bind {listener} listener on {addr}")]
    Bind {
        listener: &'static str,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("http server stopped with an error")]
    Serve(#[source] io::Error),
    #[error("failed to install tracing subscriber")]
    Telemetry(#[from] TryInitError),
}

impl InfraError {
    pub fn bind(listener: &'static str, addr: SocketAddr, source: io::Error) -> Self {
        Self::Bind {
            listener,
            addr,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn bind_error_names_listener_and_keeps_cause() {
        let addr: SocketAddr = "127.0.0.1:8081".parse().expect("addr");
        let err = InfraError::bind(
            "admin",
            addr,
            io::Error::new(io::ErrorKind::AddrInUse, "address in use"),
        );

        assert_eq!(
            err.to_string(),
            "failed to bind admin listener on 127.0.0.1:8081"
        );
        assert_eq!(
            err.source().map(ToString::to_string).as_deref(),
            Some("address in use")
        );
    }
}
