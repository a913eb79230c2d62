//! Provision phases

use crate::core::data::{FieldSpec, StepData};
use crate::core::error::{Error, Result};
use crate::guest::connect::ConnectGuest;
use crate::guest::container::ContainerGuest;
use crate::guest::local::LocalGuest;
use crate::guest::{Guest, GuestData};
use crate::plugin::{Method, PhaseContext, ProvisionPlugin};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

const ROLE: FieldSpec = FieldSpec::text("role", "Role of the guest, used by phases' 'where'.").with_metavar("ROLE");
const BECOME: FieldSpec = FieldSpec::flag("become", "Run commands with sudo unless already root.");

const LOCAL_FIELDS: &[FieldSpec] = &[ROLE, BECOME];

const CONNECT_FIELDS: &[FieldSpec] = &[
    ROLE,
    BECOME,
    FieldSpec::text("guest", "Hostname or IP address of the guest.")
        .with_short('g')
        .with_metavar("HOSTNAME"),
    FieldSpec::text("user", "Username to log in with.")
        .with_short('u')
        .with_metavar("USER"),
    FieldSpec::integer("port", "Ssh port of the guest.")
        .with_short('P')
        .with_metavar("PORT"),
    FieldSpec::text("key", "Private key for authentication.")
        .with_short('k')
        .with_metavar("PATH"),
];

const CONTAINER_FIELDS: &[FieldSpec] = &[
    ROLE,
    BECOME,
    FieldSpec::text("image", "Container image to start.")
        .with_short('i')
        .with_metavar("IMAGE"),
];

pub const LOCAL: Method = Method::new(
    "local",
    "Use the local host, commands run directly on it.",
    40,
    LOCAL_FIELDS,
);

pub const CONTAINER: Method = Method::new(
    "container",
    "Start a podman container from an image.",
    50,
    CONTAINER_FIELDS,
);

pub const CONNECT: Method = Method::new(
    "connect",
    "Connect to an already running machine over ssh.",
    60,
    CONNECT_FIELDS,
);

/// Guest data shared by every provision method
fn base_data(data: &StepData) -> GuestData {
    GuestData {
        name: data.name.clone(),
        how: data.how.clone(),
        role: data.text("role").map(str::to_string),
        become_root: data.flag("become"),
        ..Default::default()
    }
}

pub struct LocalProvision;

#[async_trait]
impl ProvisionPlugin for LocalProvision {
    async fn go(&self, _ctx: &PhaseContext, data: &StepData) -> Result<Arc<dyn Guest>> {
        info!(phase = %data.name, "Using the local host as guest");
        self.restore(base_data(data))
    }

    fn restore(&self, data: GuestData) -> Result<Arc<dyn Guest>> {
        Ok(Arc::new(LocalGuest::new(data)))
    }
}

pub struct ConnectProvision;

#[async_trait]
impl ProvisionPlugin for ConnectProvision {
    async fn go(&self, _ctx: &PhaseContext, data: &StepData) -> Result<Arc<dyn Guest>> {
        let hostname = data.text("guest").ok_or_else(|| {
            Error::provision(format!("Provision phase '{}' needs the 'guest' hostname.", data.name))
        })?;
        let port = data
            .integer("port")
            .map(|port| {
                u16::try_from(port)
                    .map_err(|_| Error::specification(format!("Invalid port '{}'.", port)))
            })
            .transpose()?;

        let guest = GuestData {
            hostname: Some(hostname.to_string()),
            user: data.text("user").map(str::to_string),
            port,
            key: data.text("key").map(PathBuf::from),
            ..base_data(data)
        };
        info!(phase = %data.name, hostname = %hostname, "Connecting to guest");
        self.restore(guest)
    }

    fn restore(&self, data: GuestData) -> Result<Arc<dyn Guest>> {
        Ok(Arc::new(ConnectGuest::new(data)))
    }
}

pub struct ContainerProvision;

#[async_trait]
impl ProvisionPlugin for ContainerProvision {
    async fn go(&self, _ctx: &PhaseContext, data: &StepData) -> Result<Arc<dyn Guest>> {
        let guest = GuestData {
            image: data.text("image").map(str::to_string),
            ..base_data(data)
        };
        self.restore(guest)
    }

    fn restore(&self, data: GuestData) -> Result<Arc<dyn Guest>> {
        Ok(Arc::new(ContainerGuest::new(data)))
    }
}
