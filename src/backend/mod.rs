//! Backend trait, device-descriptor-string (CDD) parser, and
//! `BackendFactory` registry (spec §4.14, §6), ground-truthed against
//! `examples/original_source/util/include/Utilities.h`'s `DeviceDescriptor`
//! and the registry idiom of `machine/src/drivers.rs`'s `DriverManager`
//! (`register_driver`/`driver_manager()`), generalised from a fixed-size
//! array of driver slots to a `HashMap`-backed registry since this crate
//! runs hosted, not on a bare-metal array-allocated stack.
//!
//! A `Backend` is only object-safe over its lifecycle and catalogue: the
//! per-register accessor construction is generic over the caller's chosen
//! `UserType`, which a `dyn Backend` cannot expose directly (no generic
//! trait methods). [`crate::device::Device`] instead holds each backend
//! behind a small closed enum and dispatches accessor construction to the
//! concrete backend's own inherent `get_accessor::<T>` method -- the
//! `BackendFactory` registry here still lets a CDD string resolve *which*
//! enum variant to build, matching the teacher's registration idiom, while
//! stopping short of a fully open, plugin-loadable factory (out of scope
//! per spec §1/§4.14).

pub mod dummy;
pub mod subdevice;

#[cfg(feature = "shared-dummy")]
pub mod shared_dummy;

#[cfg(feature = "xdma")]
pub mod xdma;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::accessor::SharedAccessor;
use crate::error::{LogicError, LogicResult, RuntimeError};
use crate::register_info::RegisterCatalogue;
use crate::register_path::RegisterPath;

/// Object-safe half of a backend: open/close lifecycle, the register
/// catalogue, and the shared exception-state flag every leaf accessor
/// built on this backend consults (spec §7).
///
/// `get_accessor::<T>` itself cannot live here (no generic trait methods on
/// a `dyn Backend`, per this module's own doc comment), but two narrower,
/// object-safe escape hatches are needed so one backend can be used as the
/// *target* of another (spec §4.13's `SubdeviceBackend`, and
/// [`crate::lnm::backend::LogicalNameMappingBackend`]'s redirects): a cooked
/// `f64` view of a whole register, and a raw `u64` word view for bit-level
/// decorators. Both default to `Unsupported` -- most callers go through the
/// concrete backend's own typed `get_accessor` instead.
pub trait Backend: Send {
    fn open(&mut self) -> Result<(), RuntimeError>;
    fn close(&mut self) -> Result<(), RuntimeError>;
    fn is_open(&self) -> bool;
    fn catalogue(&self) -> &RegisterCatalogue;

    /// Put the backend into exception state: every subsequent transfer on
    /// every accessor built on it fails until the next successful `open()`.
    fn set_exception(&self, error: RuntimeError);

    fn active_exception(&self) -> Option<RuntimeError>;

    /// A cooked `f64` view of `path`, for a backend that wants to redirect
    /// to a register on this one without caring about its concrete
    /// `UserType` (spec §4.13, §6).
    fn cooked_f64_accessor(&self, path: &RegisterPath) -> LogicResult<SharedAccessor<f64>> {
        let _ = path;
        Err(LogicError::Unsupported {
            reason: "this backend does not support redirecting to its registers by another backend".into(),
        })
    }

    /// A raw `u64` word view of `path`, for bit-level decorators
    /// ([`crate::accessor::bit`], [`crate::accessor::bit_range`],
    /// [`crate::accessor::fixed_point`]) built on top of another backend's
    /// register.
    fn raw_u64_accessor(&self, path: &RegisterPath) -> LogicResult<SharedAccessor<u64>> {
        let _ = path;
        Err(LogicError::Unsupported {
            reason: "this backend does not expose raw word access to its registers".into(),
        })
    }
}

/// A parsed ChimeraTK device descriptor (CDD), e.g.
/// `(dummy?map=foo.map)` or `(sharedDummy:myshm?map=foo.map)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub backend_type: String,
    pub address: String,
    pub parameters: HashMap<String, String>,
}

impl DeviceDescriptor {
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }
}

/// Parse a CDD string: `"(" backend_type [":" address] ["?" k=v[&k=v...]] ")"`.
pub fn parse_cdd(cdd: &str) -> LogicResult<DeviceDescriptor> {
    let trimmed = cdd.trim();
    let inner = trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| LogicError::BadDescriptor {
            reason: format!("'{cdd}' is not a parenthesised device descriptor"),
        })?;

    let (head, query) = match inner.split_once('?') {
        Some((h, q)) => (h, Some(q)),
        None => (inner, None),
    };
    let (backend_type, address) = match head.split_once(':') {
        Some((t, a)) => (t.to_string(), a.to_string()),
        None => (head.to_string(), String::new()),
    };
    if backend_type.is_empty() {
        return Err(LogicError::BadDescriptor {
            reason: format!("'{cdd}' has no backend type"),
        });
    }

    let mut parameters = HashMap::new();
    if let Some(query) = query {
        if !query.is_empty() {
            for pair in query.split('&') {
                let (key, value) = pair.split_once('=').ok_or_else(|| LogicError::BadDescriptor {
                    reason: format!("parameter '{pair}' in '{cdd}' is not key=value"),
                })?;
                parameters.insert(key.to_string(), value.to_string());
            }
        }
    }

    Ok(DeviceDescriptor {
        backend_type,
        address,
        parameters,
    })
}

/// Constructs a boxed [`Backend`] from a parsed descriptor. Registered per
/// `backend_type` name.
pub type BackendConstructor = Box<dyn Fn(&DeviceDescriptor) -> LogicResult<Arc<Mutex<dyn Backend>>> + Send + Sync>;

/// Process-wide registry of backend-type constructors (spec §4.14),
/// mirroring `machine/src/drivers.rs`'s `DriverManager`/`driver_manager()`.
#[derive(Default)]
pub struct BackendFactory {
    constructors: Mutex<HashMap<String, BackendConstructor>>,
}

impl BackendFactory {
    pub fn register(&self, backend_type: impl Into<String>, constructor: BackendConstructor) {
        self.constructors.lock().insert(backend_type.into(), constructor);
    }

    pub fn create(&self, descriptor: &DeviceDescriptor) -> LogicResult<Arc<Mutex<dyn Backend>>> {
        let constructors = self.constructors.lock();
        let constructor = constructors
            .get(&descriptor.backend_type)
            .ok_or_else(|| LogicError::UnknownPlugin {
                path: descriptor.address.clone(),
                name: descriptor.backend_type.clone(),
            })?;
        constructor(descriptor)
    }
}

static FACTORY: once_cell::sync::Lazy<BackendFactory> = once_cell::sync::Lazy::new(BackendFactory::default);

pub fn backend_factory() -> &'static BackendFactory {
    &FACTORY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backend_type_address_and_parameters() {
        let d = parse_cdd("(sharedDummy:myshm?map=foo.map&instance=1)").unwrap();
        assert_eq!(d.backend_type, "sharedDummy");
        assert_eq!(d.address, "myshm");
        assert_eq!(d.parameter("map"), Some("foo.map"));
        assert_eq!(d.parameter("instance"), Some("1"));
    }

    #[test]
    fn parses_descriptor_without_address_or_parameters() {
        let d = parse_cdd("(dummy)").unwrap();
        assert_eq!(d.backend_type, "dummy");
        assert_eq!(d.address, "");
        assert!(d.parameters.is_empty());
    }

    #[test]
    fn rejects_unparenthesised_strings() {
        assert!(parse_cdd("dummy?map=foo.map").is_err());
    }

    #[test]
    fn rejects_malformed_parameter() {
        assert!(parse_cdd("(dummy?mapfoo.map)").is_err());
    }
}
