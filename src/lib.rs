//! `devaccess`: a backend-agnostic register-access library (spec §1-§9).
//!
//! A [`device::Device`] is opened from a ChimeraTK-style device descriptor
//! string (CDD) and hands out typed [`accessor::NDRegisterAccessor`]s for the
//! registers named in its [`register_info::RegisterCatalogue`]. Several
//! accessors on possibly different registers can be merged into one
//! [`transfer_group::TransferGroup`] so they transfer together; an accessor
//! opened with `wait_for_new_data` blocks until the backend's
//! [`async_domain::Domain`] wakes it.
//!
//! Four backends ship: [`backend::dummy`] (in-memory, for tests),
//! [`backend::shared_dummy`] (POSIX-shared-memory, for cross-process tests),
//! [`backend::xdma`] (PCIe/XDMA hardware), and [`backend::subdevice`]
//! (carves named registers out of another backend's one register). On top of
//! any of them, [`lnm`] redirects a logical register name to a register,
//! channel, or bit of a named target device, optionally through a chain of
//! plugins (`Multiplier`, `Math`, `FanOut`, ...).

pub mod accessor;
pub mod async_domain;
pub mod backend;
pub mod convert;
pub mod device;
pub mod error;
pub mod formula;
pub mod lnm;
pub mod register_info;
pub mod register_path;
pub mod shared_state;
pub mod transfer_group;
pub mod validity;
pub mod version;

pub use device::Device;
pub use error::{DeviceError, DeviceResult, LogicError, LogicResult, RuntimeError, RuntimeResult};
pub use register_info::{AccessModeFlags, AccessModes, RegisterCatalogue, RegisterInfo};
pub use register_path::RegisterPath;

/// Crate name and version, e.g. `"devaccess version 0.1.0"`.
pub fn version() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), " version ", env!("CARGO_PKG_VERSION"))
}
