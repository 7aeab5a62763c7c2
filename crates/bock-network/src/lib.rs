//! # bock-network
//!
//! Networking primitives for Bock containers.
//!
//! This crate holds the engine's port-publishing model and the translation
//! of that model into the NAT rules a runtime understands.

#![warn(missing_docs)]

pub mod mac;
pub mod portmap;

pub use mac::MacAddress;
pub use portmap::{
    NatPortBinding, Port, PortBinding, PortMap, Protocol, translate_port_bindings,
};
