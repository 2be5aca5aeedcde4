//! Hardware-accessing leaf accessor shared by the numeric-addressed
//! backends ([`crate::backend::dummy`], [`crate::backend::shared_dummy`]).
//!
//! A leaf owns the canonical "hardware" storage for one register: a
//! `channels x samples` grid of raw `u64` words, reachable by every decorator
//! built on top of it through [`crate::shared_state::SharedAccessors`].
//! Reading/writing converts through a [`FixedPointConverter`] configured
//! from the register's `DataDescriptor`.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::accessor::{NDRegisterAccessor, SharedElement, TransferElement, TransferType};
use crate::convert::numeric::{convert, Arithmetic};
use crate::convert::FixedPointConverter;
use crate::error::{LogicError, RuntimeError, RuntimeResult};
use crate::register_info::AccessModes;
use crate::shared_state::TransferElementID;
use crate::validity::DataValidity;
use crate::version::VersionNumber;

/// Raw hardware storage for one register: `channels x samples` of `u64`
/// words, plus a transfer counter used by tests to verify that a
/// `TransferGroup` performs exactly one physical transfer (spec §8, S4).
pub struct RawStorage {
    pub words: Vec<Vec<u64>>,
    pub read_count: usize,
    pub write_count: usize,
}

impl RawStorage {
    pub fn new(n_channels: usize, n_samples: usize) -> Self {
        RawStorage {
            words: vec![vec![0; n_samples]; n_channels],
            read_count: 0,
            write_count: 0,
        }
    }
}

/// Hardware-accessing accessor for one numeric-addressed register.
pub struct RawRegisterAccessor<T> {
    id: TransferElementID,
    storage: Arc<Mutex<RawStorage>>,
    converter: FixedPointConverter,
    access: AccessModes,
    buffer: Vec<Vec<T>>,
    version: VersionNumber,
    validity: DataValidity,
    active_exception: Option<RuntimeError>,
    /// Set by the owning backend; consulted by `do_*_transfer` to fail
    /// every transfer while the backend is in exception state (spec §7).
    exception_flag: Arc<Mutex<Option<RuntimeError>>>,
    self_ref: std::sync::Weak<Mutex<RawRegisterAccessor<T>>>,
}

impl<T: Arithmetic + Default + Send + 'static> RawRegisterAccessor<T> {
    pub fn new(
        storage: Arc<Mutex<RawStorage>>,
        converter: FixedPointConverter,
        access: AccessModes,
        exception_flag: Arc<Mutex<Option<RuntimeError>>>,
    ) -> Arc<Mutex<Self>> {
        let (n_channels, n_samples) = {
            let s = storage.lock();
            (s.words.len(), s.words.first().map_or(0, |c| c.len()))
        };
        Arc::new_cyclic(|weak| {
            Mutex::new(RawRegisterAccessor {
                id: TransferElementID::new(),
                storage,
                converter,
                access,
                buffer: vec![vec![T::default(); n_samples]; n_channels],
                version: VersionNumber::new(),
                validity: DataValidity::Ok,
                active_exception: None,
                exception_flag,
                self_ref: weak.clone(),
            })
        })
    }
}

impl<T: Arithmetic + Default + Send + 'static> TransferElement for RawRegisterAccessor<T> {
    fn id(&self) -> TransferElementID {
        self.id
    }

    fn pre_read(&mut self, transfer: TransferType) -> Result<(), LogicError> {
        if !self.access.readable {
            return Err(LogicError::WriteOnly {
                path: "<raw>".into(),
            });
        }
        let _ = transfer;
        Ok(())
    }

    fn do_read_transfer(&mut self) -> RuntimeResult<bool> {
        if let Some(e) = self.exception_flag.lock().clone() {
            self.active_exception = Some(e.clone());
            return Err(e);
        }
        let mut storage = self.storage.lock();
        storage.read_count += 1;
        for (buf_ch, raw_ch) in self.buffer.iter_mut().zip(storage.words.iter()) {
            for (b, r) in buf_ch.iter_mut().zip(raw_ch.iter()) {
                let cooked = self.converter.to_cooked(*r);
                *b = convert::<T, f64>(cooked);
            }
        }
        Ok(true)
    }

    fn post_read(&mut self, _transfer: TransferType, has_new_data: bool) -> RuntimeResult<()> {
        if has_new_data {
            self.version = VersionNumber::new();
            self.validity = DataValidity::Ok;
        }
        Ok(())
    }

    fn pre_write(&mut self, _transfer: TransferType, _version: VersionNumber) -> Result<(), LogicError> {
        if !self.access.writeable {
            return Err(LogicError::ReadOnly {
                path: "<raw>".into(),
            });
        }
        Ok(())
    }

    fn do_write_transfer(&mut self, version: VersionNumber) -> RuntimeResult<bool> {
        if let Some(e) = self.exception_flag.lock().clone() {
            self.active_exception = Some(e.clone());
            return Err(e);
        }
        let mut storage = self.storage.lock();
        storage.write_count += 1;
        let mut any_clamped = false;
        for (buf_ch, raw_ch) in self.buffer.iter().zip(storage.words.iter_mut()) {
            for (b, r) in buf_ch.iter().zip(raw_ch.iter_mut()) {
                let cooked = convert::<f64, T>(*b);
                let (raw, validity) = self.converter.to_raw(cooked);
                if validity.is_faulty() {
                    any_clamped = true;
                }
                *r = raw;
            }
        }
        self.version = version;
        if any_clamped {
            self.validity = DataValidity::Faulty;
        }
        Ok(false)
    }

    fn post_write(&mut self, _transfer: TransferType, _version: VersionNumber) -> RuntimeResult<()> {
        Ok(())
    }

    fn is_readable(&self) -> bool {
        self.access.readable
    }

    fn is_writeable(&self) -> bool {
        self.access.writeable
    }

    fn supports_wait_for_new_data(&self) -> bool {
        false
    }

    fn version(&self) -> VersionNumber {
        self.version
    }

    fn validity(&self) -> DataValidity {
        self.validity
    }

    fn hardware_accessing_elements(&self) -> Vec<SharedElement> {
        match self.self_ref.upgrade() {
            Some(strong) => vec![strong as SharedElement],
            None => vec![],
        }
    }
}

impl<T: Arithmetic + Default + Send + 'static> NDRegisterAccessor<T> for RawRegisterAccessor<T> {
    fn buffer(&self) -> &[Vec<T>] {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut Vec<Vec<T>> {
        &mut self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_converts_raw_words_through_fixed_point() {
        let storage = Arc::new(Mutex::new(RawStorage::new(1, 2)));
        storage.lock().words[0] = vec![100, 200];
        let converter = FixedPointConverter::new(16, 4, false); // raw/16
        let acc = RawRegisterAccessor::<f64>::new(
            storage,
            converter,
            AccessModes::READ_WRITE,
            Arc::new(Mutex::new(None)),
        );
        {
            let mut guard = acc.lock();
            guard.pre_read(TransferType::new(Default::default())).unwrap();
            let has_new = guard.do_read_transfer().unwrap();
            guard.post_read(TransferType::new(Default::default()), has_new).unwrap();
            assert_eq!(guard.buffer()[0], vec![6.25, 12.5]);
        }
    }

    #[test]
    fn write_then_read_roundtrips() {
        let storage = Arc::new(Mutex::new(RawStorage::new(1, 1)));
        let converter = FixedPointConverter::new(32, 0, true);
        let acc = RawRegisterAccessor::<i32>::new(
            storage.clone(),
            converter,
            AccessModes::READ_WRITE,
            Arc::new(Mutex::new(None)),
        );
        let mut guard = acc.lock();
        guard.buffer_mut()[0][0] = 42;
        let v = VersionNumber::new();
        guard.pre_write(TransferType::new(Default::default()), v).unwrap();
        guard.do_write_transfer(v).unwrap();
        guard.post_write(TransferType::new(Default::default()), v).unwrap();
        assert_eq!(storage.lock().words[0][0], 42);
        assert_eq!(storage.lock().write_count, 1);
    }
}
