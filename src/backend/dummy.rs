//! `DummyBackend` (spec §4.11's in-memory sibling, non-goals list in
//! `SPEC_FULL.md` §"Non-goals"), ground-truthed against
//! `examples/original_source/device_backends/DummyBackend/src/DummyBackend.cc`:
//! a backend with no real hardware underneath it, used for tests and for
//! exercising the accessor/decorator stack without a device. Storage is a
//! `HashMap` from register path to [`RawStorage`] instead of the original's
//! `bar -> Vec<i32>` flat address space -- this crate's catalogue already
//! names registers directly (spec §3's `RegisterInfo`), so there is no need
//! to route through a byte-addressed BAR to find one.
//!
//! Building a `DummyBackend` from a register-map *file* is out of scope
//! (`SPEC_FULL.md` non-goals: "no queryable schema evolution for map
//! files"); callers construct the [`crate::register_info::RegisterCatalogue`]
//! programmatically and hand it to [`DummyBackend::new`] directly, so this
//! backend is not registered with [`crate::backend::backend_factory`] the
//! way `sharedDummy`/`subdevice` are -- there is no CDD parameter that could
//! carry an entire catalogue.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::accessor::leaf::{RawRegisterAccessor, RawStorage};
use crate::accessor::SharedAccessor;
use crate::backend::Backend;
use crate::convert::numeric::Arithmetic;
use crate::convert::FixedPointConverter;
use crate::error::{LogicError, LogicResult, RuntimeError};
use crate::register_info::{RegisterCatalogue, TargetInfo};
use crate::register_path::RegisterPath;

fn unknown_register(path: &RegisterPath) -> LogicError {
    LogicError::UnknownRegister {
        path: path.to_string(),
    }
}

/// In-memory backend: every `NumericAddressed` register in the catalogue it
/// is built from gets its own [`RawStorage`] grid, addressed by register
/// path rather than by `(bar, address)` (spec §3's catalogue already
/// resolves that for us at construction time).
pub struct DummyBackend {
    catalogue: RegisterCatalogue,
    storages: HashMap<RegisterPath, Arc<Mutex<RawStorage>>>,
    opened: bool,
    exception: Arc<Mutex<Option<RuntimeError>>>,
}

impl DummyBackend {
    pub fn new(catalogue: RegisterCatalogue) -> Self {
        let mut storages = HashMap::new();
        for info in catalogue.iter() {
            if matches!(info.target, TargetInfo::NumericAddressed { .. }) {
                storages.insert(
                    info.path.clone(),
                    Arc::new(Mutex::new(RawStorage::new(info.n_channels, info.n_elements / info.n_channels.max(1)))),
                );
            }
        }
        DummyBackend {
            catalogue,
            storages,
            opened: false,
            exception: Arc::new(Mutex::new(None)),
        }
    }

    /// Direct access to a register's backing storage, for tests to poke raw
    /// words into the "hardware" or observe the transfer counters (spec §8).
    pub fn raw_storage(&self, path: &RegisterPath) -> LogicResult<Arc<Mutex<RawStorage>>> {
        self.storages.get(path).cloned().ok_or_else(|| unknown_register(path))
    }

    /// Build a typed accessor for `path` (spec §4.14's `get_accessor`). A
    /// generic inherent method, not part of the [`Backend`] trait, since a
    /// trait object cannot carry a generic method (see the module doc on
    /// [`crate::backend`]).
    pub fn get_accessor<T: Arithmetic + Default + Send + 'static>(
        &self,
        path: &RegisterPath,
    ) -> LogicResult<SharedAccessor<T>> {
        let info = self.catalogue.get(path).ok_or_else(|| unknown_register(path))?;
        let TargetInfo::NumericAddressed {
            width_bits,
            fractional_bits,
            ..
        } = info.target
        else {
            return Err(unknown_register(path));
        };
        let storage = self.raw_storage(path)?;
        let converter = FixedPointConverter::new(width_bits, fractional_bits, info.data_descriptor.signed);
        Ok(RawRegisterAccessor::<T>::new(storage, converter, info.access, self.exception.clone()))
    }
}

impl Backend for DummyBackend {
    fn open(&mut self) -> Result<(), RuntimeError> {
        self.opened = true;
        *self.exception.lock() = None;
        tracing::debug!("DummyBackend opened");
        Ok(())
    }

    fn close(&mut self) -> Result<(), RuntimeError> {
        self.opened = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.opened
    }

    fn catalogue(&self) -> &RegisterCatalogue {
        &self.catalogue
    }

    fn set_exception(&self, error: RuntimeError) {
        tracing::warn!(error = %error, "DummyBackend entering exception state");
        *self.exception.lock() = Some(error);
    }

    fn active_exception(&self) -> Option<RuntimeError> {
        self.exception.lock().clone()
    }

    fn cooked_f64_accessor(&self, path: &RegisterPath) -> LogicResult<SharedAccessor<f64>> {
        self.get_accessor::<f64>(path)
    }

    fn raw_u64_accessor(&self, path: &RegisterPath) -> LogicResult<SharedAccessor<u64>> {
        self.get_accessor::<u64>(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register_info::{AccessModeFlags, AccessModes, DataDescriptor, RegisterInfo};

    fn catalogue() -> RegisterCatalogue {
        let mut cat = RegisterCatalogue::new();
        cat.insert(RegisterInfo {
            path: RegisterPath::new("BOARD/WORD"),
            n_elements: 1,
            n_channels: 1,
            dimensions: vec![1],
            access: AccessModes::READ_WRITE,
            supported_flags: AccessModeFlags::empty(),
            data_descriptor: DataDescriptor::numeric_integer(16, true),
            target: TargetInfo::NumericAddressed {
                bar: 0,
                address: 0,
                width_bits: 16,
                fractional_bits: 0,
            },
        });
        cat
    }

    #[test]
    fn write_then_read_roundtrips_through_dummy_storage() {
        let mut backend = DummyBackend::new(catalogue());
        backend.open().unwrap();
        let path = RegisterPath::new("BOARD/WORD");

        let acc = backend.get_accessor::<i32>(&path).unwrap();
        acc.lock().buffer_mut()[0][0] = -7;
        acc.lock().write(crate::version::VersionNumber::new()).unwrap();

        let other = backend.get_accessor::<i32>(&path).unwrap();
        other.lock().read().unwrap();
        assert_eq!(other.lock().buffer()[0][0], -7);
    }

    #[test]
    fn unknown_register_is_rejected() {
        let backend = DummyBackend::new(catalogue());
        assert!(backend.get_accessor::<i32>(&RegisterPath::new("NOPE")).is_err());
    }

    #[test]
    fn exception_state_fails_every_subsequent_transfer() {
        let mut backend = DummyBackend::new(catalogue());
        backend.open().unwrap();
        let path = RegisterPath::new("BOARD/WORD");
        backend.set_exception(RuntimeError::generic("device unplugged"));

        let acc = backend.get_accessor::<i32>(&path).unwrap();
        assert!(acc.lock().read().is_err());
    }
}
