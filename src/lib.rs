//! SteelWall derives a dual-stack, default-deny packet filter for a Linux
//! host, applies it, stores it per address family and installs a boot-time
//! replay so the policy survives reboots.

#[cfg(not(target_os = "linux"))]
compile_error!("steelwall only supports Linux hosts");

#[cfg_attr(target_os = "linux", path = "linux/mod.rs")]
pub mod os;
pub mod utils;
