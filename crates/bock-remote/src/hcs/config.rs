//! Compute system configuration document.

use bock_common::{BockError, BockResult};
use bock_network::{MacAddress, NatPortBinding, translate_port_bindings};
use bock_oci::Spec;
use bock_oci::runtime::WindowsNetworking;
use serde::Serialize;
use uuid::Uuid;

/// Owner recorded on every compute system this client creates.
pub const DEFAULT_OWNER: &str = "bock";

/// Name of the NAT every container network endpoint is attached to.
pub const DEFAULT_CONTAINER_NAT: &str = "ContainerNAT";

/// Namespace for deriving layer GUIDs from layer directory names.
const LAYER_NAMESPACE: Uuid = Uuid::from_u128(0x6b1d_6e0f_3c4a_4f5e_9a8d_2b7c_1e0f_4d3a);

/// Top-level configuration passed to `CreateComputeSystem`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerInit {
    /// Always `Container`.
    pub system_type: String,
    /// Container id.
    pub name: String,
    /// Creating application.
    pub owner: String,
    /// Create a placeholder without starting anything.
    pub is_dummy: bool,
    /// Root volume.
    pub volume_path: String,
    /// Attached devices.
    pub devices: Vec<Device>,
    /// Skip disk flushes while the first boot runs.
    pub ignore_flushes_during_boot: bool,
    /// Folder of the container's own layer.
    pub layer_folder_path: String,
    /// Read-only layers, top-most first.
    pub layers: Vec<Layer>,
    /// Relative CPU weight.
    #[serde(skip_serializing_if = "is_zero")]
    pub processor_weight: u64,
    /// Hostname inside the container.
    pub host_name: String,
    /// Host directories shared into the container.
    pub mapped_directories: Vec<MappedDir>,
    /// Sandbox location for Hyper-V isolated containers.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sandbox_path: String,
    /// Run in a Hyper-V partition.
    pub hv_partition: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero(value: &u64) -> bool {
    *value == 0
}

/// A read-only image layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Layer {
    /// Layer GUID.
    #[serde(rename = "ID")]
    pub id: String,
    /// Layer directory.
    #[serde(rename = "Path")]
    pub path: String,
}

/// A host directory mapped into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MappedDir {
    /// Directory on the host.
    pub host_path: String,
    /// Directory inside the container.
    pub container_path: String,
    /// Mapped read-only.
    pub read_only: bool,
}

/// A device attached to the compute system.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Device {
    /// Device kind, `Network` for endpoints.
    pub device_type: String,
    /// Network connection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<NetworkConnection>,
    /// Device settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<NetworkSettings>,
}

/// Network a device connects to.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkConnection {
    /// Network name.
    pub network_name: String,
    /// Whether NAT is enabled.
    pub enable_nat: bool,
    /// NAT configuration.
    pub nat: NatSettings,
}

/// NAT configuration for a network connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NatSettings {
    /// NAT name.
    pub name: String,
    /// Published ports.
    pub port_bindings: Vec<NatPortBinding>,
}

/// Endpoint settings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkSettings {
    /// MAC address in `AA-BB-CC-DD-EE-FF` form.
    pub mac_address: String,
}

impl ContainerInit {
    /// Configuration creating container `id` from `spec`.
    ///
    /// # Errors
    ///
    /// Fails when the spec has no `windows` section, when a port binding
    /// cannot be expressed as NAT, or when the MAC address is malformed.
    pub fn from_spec(id: &str, spec: &Spec) -> BockResult<Self> {
        let windows = spec.windows.as_ref().ok_or_else(|| BockError::Config {
            message: format!("container {id} has no Windows configuration"),
        })?;

        let layer_folder = windows.layer_folder.to_string_lossy().into_owned();
        let hv_partition = windows
            .hv_runtime
            .as_ref()
            .is_some_and(|hv| !hv.image_path.as_os_str().is_empty());

        let processor_weight = windows
            .resources
            .as_ref()
            .and_then(|r| r.cpu.as_ref())
            .and_then(|cpu| cpu.shares)
            .unwrap_or(0);

        let layers = windows
            .layer_paths
            .iter()
            .map(|path| {
                let path = path.to_string_lossy();
                Layer {
                    id: layer_id(file_name(&path)).to_string(),
                    path: path.into_owned(),
                }
            })
            .collect();

        let mapped_directories = spec
            .mounts
            .iter()
            .map(|mount| MappedDir {
                host_path: mount
                    .source
                    .as_deref()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                container_path: mount.destination.to_string_lossy().into_owned(),
                read_only: mount.is_readonly(),
            })
            .collect();

        let mut devices = Vec::new();
        if let Some(networking) = &windows.networking {
            devices.push(network_device(networking)?);
        } else {
            tracing::debug!(container_id = %id, "No network interface");
        }

        Ok(Self {
            system_type: "Container".to_string(),
            name: id.to_string(),
            owner: DEFAULT_OWNER.to_string(),
            is_dummy: false,
            volume_path: spec.root_path().to_string_lossy().into_owned(),
            devices,
            ignore_flushes_during_boot: windows.first_start,
            sandbox_path: if hv_partition {
                parent_dir(&layer_folder).to_string()
            } else {
                String::new()
            },
            layer_folder_path: layer_folder,
            layers,
            processor_weight,
            host_name: spec.hostname.clone().unwrap_or_default(),
            mapped_directories,
            hv_partition,
        })
    }
}

fn network_device(networking: &WindowsNetworking) -> BockResult<Device> {
    let port_bindings = translate_port_bindings(&networking.port_bindings)?;

    let settings = if networking.mac_address.is_empty() {
        None
    } else {
        let mac: MacAddress = networking.mac_address.parse()?;
        Some(NetworkSettings {
            mac_address: mac.to_hyphenated(),
        })
    };

    Ok(Device {
        device_type: "Network".to_string(),
        connection: Some(NetworkConnection {
            network_name: networking.bridge.clone(),
            enable_nat: true,
            nat: NatSettings {
                name: DEFAULT_CONTAINER_NAT.to_string(),
                port_bindings,
            },
        }),
        settings,
    })
}

/// Stable GUID for a layer directory name.
#[must_use]
pub fn layer_id(name: &str) -> Uuid {
    Uuid::new_v5(&LAYER_NAMESPACE, name.as_bytes())
}

// Layer paths use Windows separators even when built elsewhere.
fn file_name(path: &str) -> &str {
    path.rsplit(['\\', '/']).next().unwrap_or(path)
}

fn parent_dir(path: &str) -> &str {
    path.rfind(['\\', '/']).map_or(".", |i| &path[..i])
}
