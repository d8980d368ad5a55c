//! Network availability gate consulted before every weather request.

use std::{fmt::Debug, fs, path::Path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Wifi,
    Cellular,
    Ethernet,
    Other,
}

/// Capability set reported by the active network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkCapabilities {
    pub transports: Vec<Transport>,
}

impl NetworkCapabilities {
    pub fn with(transports: &[Transport]) -> Self {
        Self { transports: transports.to_vec() }
    }

    pub fn has_transport(&self, transport: Transport) -> bool {
        self.transports.contains(&transport)
    }
}

/// True if there is an active network and it reports Wi-Fi, cellular or
/// wired transport.
pub fn network_available(active: Option<&NetworkCapabilities>) -> bool {
    let Some(caps) = active else {
        return false;
    };

    [Transport::Wifi, Transport::Cellular, Transport::Ethernet]
        .into_iter()
        .any(|t| caps.has_transport(t))
}

pub trait Connectivity: Send + Sync + Debug {
    fn is_network_available(&self) -> bool;
}

/// Fixed connectivity state, for tests and an explicit offline mode.
#[derive(Debug, Clone, Default)]
pub struct StaticConnectivity(pub Option<NetworkCapabilities>);

impl StaticConnectivity {
    pub fn online() -> Self {
        Self(Some(NetworkCapabilities::with(&[Transport::Wifi])))
    }

    pub fn offline() -> Self {
        Self(None)
    }
}

impl Connectivity for StaticConnectivity {
    fn is_network_available(&self) -> bool {
        network_available(self.0.as_ref())
    }
}

/// Reads interface state from sysfs.
#[derive(Debug, Clone)]
pub struct SystemConnectivity {
    root: std::path::PathBuf,
}

impl Default for SystemConnectivity {
    fn default() -> Self {
        Self { root: "/sys/class/net".into() }
    }
}

impl SystemConnectivity {
    pub fn with_root(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Transports of every interface that is up, or `None` when nothing is.
    pub fn active_capabilities(&self) -> Option<NetworkCapabilities> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("Cannot list {}: {e}", self.root.display());
                return None;
            }
        };

        let transports: Vec<Transport> = entries
            .flatten()
            .filter_map(|entry| classify_interface(&entry.path()))
            .collect();

        if transports.is_empty() {
            None
        } else {
            Some(NetworkCapabilities { transports })
        }
    }
}

impl Connectivity for SystemConnectivity {
    fn is_network_available(&self) -> bool {
        network_available(self.active_capabilities().as_ref())
    }
}

// ARPHRD_LOOPBACK = 772, ARPHRD_ETHER = 1
fn classify_interface(dir: &Path) -> Option<Transport> {
    let name = dir.file_name()?.to_string_lossy().into_owned();
    let kind = read_trimmed(&dir.join("type"));
    if kind.as_deref() == Some("772") {
        return None;
    }
    if read_trimmed(&dir.join("operstate")).as_deref() != Some("up") {
        return None;
    }

    let transport = if dir.join("wireless").exists() || dir.join("phy80211").exists() {
        Transport::Wifi
    } else if name.starts_with("wwan") || name.starts_with("ppp") {
        Transport::Cellular
    } else if kind.as_deref() == Some("1") {
        Transport::Ethernet
    } else {
        Transport::Other
    };
    Some(transport)
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}
