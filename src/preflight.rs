//! Network preflight checks.
//!
//! Everything here runs before any listener is opened: picking the address to
//! bind, making sure both ports are usable, and making sure the shared
//! directory exists. None of these checks touch listener state.

use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::path::{Path, PathBuf};
use std::time::Duration;

use local_ip_address::list_afinet_netifas;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ServerConfig;

/// External address used for the outbound route probe. No data is sent.
const ROUTE_PROBE_TARGET: (Ipv4Addr, u16) = (Ipv4Addr::new(8, 8, 8, 8), 80);

/// Ports below this need elevated privileges on most systems.
pub const FIRST_UNPRIVILEGED_PORT: u16 = 1024;

/// Upper bound for the "is something already listening" connect probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Reasons a configuration is refused before any listener opens.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("port {port} is privileged (below 1024); choose a port of 1024 or higher")]
    PrivilegedPort { port: u16 },

    #[error("port {port} is already in use on {address}; stop the other program or choose another port")]
    PortInUse { address: IpAddr, port: u16 },

    #[error("FTP and HTTP cannot share port {port}")]
    PortConflict { port: u16 },

    #[error("directory not found or not accessible: {}", .path.display())]
    DirectoryNotFound { path: PathBuf },

    #[error("address {address} cannot be bound on this machine")]
    UnreachableAddress { address: IpAddr },
}

/// Outcome of local address detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressDetection {
    /// Address the listeners will bind to
    pub address: IpAddr,
    /// True when the detected address failed the bind test and loopback was used instead
    pub degraded: bool,
}

/// Result of a successful preflight run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreflightReport {
    pub address: IpAddr,
    pub degraded: bool,
}

/// Runs the preflight checks in a fixed order: address, ports, directory.
#[derive(Debug, Clone)]
pub struct Preflight {
    pinned_address: Option<IpAddr>,
    probe_timeout: Duration,
}

impl Default for Preflight {
    fn default() -> Self {
        Self::new()
    }
}

impl Preflight {
    /// Preflight that detects the local address on every run
    pub fn new() -> Self {
        Self {
            pinned_address: None,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Preflight that always uses `address` instead of detecting one
    pub fn with_address(address: IpAddr) -> Self {
        Self {
            pinned_address: Some(address),
            ..Self::new()
        }
    }

    /// Override the connect probe timeout
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// The pinned address, if any
    pub fn pinned_address(&self) -> Option<IpAddr> {
        self.pinned_address
    }

    /// Check `config` and choose the bind address.
    ///
    /// The first failing check is returned.
    pub fn run(&self, config: &ServerConfig) -> Result<PreflightReport, ValidationError> {
        let report = match self.pinned_address {
            Some(address) => {
                if !can_bind(address) {
                    return Err(ValidationError::UnreachableAddress { address });
                }
                PreflightReport {
                    address,
                    degraded: false,
                }
            }
            None => {
                let detection = detect_local_address();
                PreflightReport {
                    address: detection.address,
                    degraded: detection.degraded,
                }
            }
        };

        validate_port(report.address, config.ftp_port, self.probe_timeout)?;
        validate_port(report.address, config.http_port, self.probe_timeout)?;
        if config.ftp_port == config.http_port {
            return Err(ValidationError::PortConflict {
                port: config.ftp_port,
            });
        }
        validate_directory(&config.directory)?;

        debug!(address = %report.address, degraded = report.degraded, "Preflight passed");
        Ok(report)
    }
}

/// Work out which IPv4 address other machines can reach us on.
///
/// Tries the outbound route first, then the first private interface address,
/// then loopback. Whatever is chosen must survive a bind test, otherwise
/// loopback is returned and `degraded` is set.
pub fn detect_local_address() -> AddressDetection {
    let candidate = match route_probe() {
        Ok(address) => address,
        Err(e) => {
            debug!(error = %e, "Route probe failed, scanning interfaces");
            first_private_interface().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
        }
    };
    settle(candidate)
}

/// Keep `candidate` if it can be bound, otherwise fall back to loopback.
fn settle(candidate: IpAddr) -> AddressDetection {
    if can_bind(candidate) {
        return AddressDetection {
            address: candidate,
            degraded: false,
        };
    }

    warn!(address = %candidate, "Detected address cannot be bound, falling back to loopback");
    AddressDetection {
        address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        degraded: true,
    }
}

/// Local end of a connectionless "connection" towards a public address.
fn route_probe() -> io::Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(ROUTE_PROBE_TARGET)?;
    let address = socket.local_addr()?.ip();

    if address.is_unspecified() {
        return Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "route probe returned an unspecified address",
        ));
    }
    Ok(address)
}

fn first_private_interface() -> Option<IpAddr> {
    let interfaces = match list_afinet_netifas() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            debug!(error = %e, "Could not enumerate network interfaces");
            return None;
        }
    };

    interfaces
        .into_iter()
        .map(|(_, address)| address)
        .find(is_private)
}

/// True for addresses in 10.0.0.0/8, 172.16.0.0/12 or 192.168.0.0/16.
pub fn is_private(address: &IpAddr) -> bool {
    match address {
        IpAddr::V4(v4) => v4.is_private(),
        IpAddr::V6(_) => false,
    }
}

/// Whether a throwaway listener can be bound on `address`.
pub fn can_bind(address: IpAddr) -> bool {
    TcpListener::bind(SocketAddr::new(address, 0)).is_ok()
}

/// Refuse privileged ports and ports something is already listening on.
pub fn validate_port(address: IpAddr, port: u16, timeout: Duration) -> Result<(), ValidationError> {
    if port < FIRST_UNPRIVILEGED_PORT {
        return Err(ValidationError::PrivilegedPort { port });
    }

    if TcpStream::connect_timeout(&SocketAddr::new(address, port), timeout).is_ok() {
        return Err(ValidationError::PortInUse { address, port });
    }

    Ok(())
}

/// Refuse paths that are missing, not directories, or unreadable.
pub fn validate_directory(path: &Path) -> Result<(), ValidationError> {
    let not_found = || ValidationError::DirectoryNotFound {
        path: path.to_path_buf(),
    };

    let metadata = fs::metadata(path).map_err(|_| not_found())?;
    if !metadata.is_dir() {
        return Err(not_found());
    }
    fs::read_dir(path).map_err(|_| not_found())?;

    Ok(())
}
