//! `FixedPoint` decorator (spec §4, item 6's decorator list), ground-truthed
//! against `examples/original_source/device/src/FixedPointConverter.cc`
//! together with this crate's own [`crate::accessor::leaf::RawRegisterAccessor`],
//! which bakes the identical conversion directly into a leaf accessor.
//!
//! [`crate::backend::dummy::DummyBackend`] never needs this as a separate
//! decorator -- it owns its storage outright, so the conversion lives in the
//! leaf. [`crate::backend::subdevice::SubdeviceBackend`]'s `area` registers
//! do not: they reinterpret a window of somebody else's raw `u64` words with
//! their *own* width/fractional-bits/signedness, so the conversion has to be
//! a decorator over a borrowed target rather than something a leaf can own.
//! Shares state the same way [`super::bit_range`] does, since several
//! `FixedPoint` views (and a `BitRange`/`SubArray` view) may legitimately
//! share one target register.

use std::sync::Arc;

use crate::accessor::{NDRegisterAccessor, SharedAccessor, SharedElement, TransferElement, TransferType};
use crate::convert::numeric::{convert, Arithmetic};
use crate::convert::FixedPointConverter;
use crate::error::{LogicError, LogicResult, RuntimeResult};
use crate::register_path::RegisterPath;
use crate::shared_state::{shared_accessors, SharedAccessorKey, SharedTargetState, TransferElementID};
use crate::validity::DataValidity;
use crate::version::VersionNumber;

pub struct FixedPointAccessorDecorator<T> {
    id: TransferElementID,
    target: SharedAccessor<u64>,
    shared: Arc<SharedTargetState>,
    path: String,
    converter: FixedPointConverter,
    writeable: bool,
    buffer: Vec<Vec<T>>,
    version: VersionNumber,
    validity: DataValidity,
    /// See [`super::sub_array::SubArrayAccessorDecorator`]'s fields of the
    /// same name: the read-remember-modify-write gate re-arms on every
    /// device reopen rather than latching permanently.
    version_on_open: VersionNumber,
    remembered_for: Option<VersionNumber>,
}

impl<T: Arithmetic + Default + Send + 'static> FixedPointAccessorDecorator<T> {
    pub fn new(
        target: SharedAccessor<u64>,
        backend_id: usize,
        path: impl Into<RegisterPath>,
        converter: FixedPointConverter,
        writeable: bool,
        version_on_open: VersionNumber,
    ) -> LogicResult<Self> {
        let path = path.into();
        let (n_channels, n_samples) = {
            let t = target.lock();
            (t.n_channels(), t.n_samples())
        };
        let key = SharedAccessorKey {
            backend_id,
            path: path.clone(),
        };
        let shared = shared_accessors().get_target_shared_state(key);
        Ok(FixedPointAccessorDecorator {
            id: TransferElementID::new(),
            target,
            shared,
            path: path.to_string(),
            converter,
            writeable,
            buffer: vec![vec![T::default(); n_samples]; n_channels],
            version: VersionNumber::new(),
            validity: DataValidity::Ok,
            version_on_open,
            remembered_for: None,
        })
    }
}

impl<T: Arithmetic + Send + 'static> TransferElement for FixedPointAccessorDecorator<T> {
    fn id(&self) -> TransferElementID {
        self.id
    }

    fn pre_read(&mut self, transfer: TransferType) -> LogicResult<()> {
        if self.shared.mutex.enter() {
            self.target.lock().pre_read(transfer)?;
        }
        Ok(())
    }

    fn do_read_transfer(&mut self) -> RuntimeResult<bool> {
        self.target.lock().do_read_transfer()
    }

    fn post_read(&mut self, transfer: TransferType, has_new_data: bool) -> RuntimeResult<()> {
        let (is_first_finisher, _is_last_finisher) = self.shared.mutex.finish();
        let mut target = self.target.lock();
        if is_first_finisher {
            target.post_read(transfer, has_new_data)?;
        }
        if has_new_data {
            for (buf_ch, raw_ch) in self.buffer.iter_mut().zip(target.buffer().iter()) {
                for (b, r) in buf_ch.iter_mut().zip(raw_ch.iter()) {
                    *b = convert::<T, f64>(self.converter.to_cooked(*r));
                }
            }
            self.version = self.version.combine(target.version());
            self.validity = target.validity();
            self.remembered_for = Some(self.version_on_open);
        }
        Ok(())
    }

    fn pre_write(&mut self, transfer: TransferType, version: VersionNumber) -> LogicResult<()> {
        if !self.writeable {
            return Err(LogicError::ReadOnly {
                path: self.path.clone(),
            });
        }
        if self.remembered_for != Some(self.version_on_open) {
            self.target.lock().read().map_err(|e| match e {
                crate::error::DeviceError::Logic { source } => source,
                crate::error::DeviceError::Runtime { .. } => LogicError::Unsupported {
                    reason: "could not read-remember before a FixedPoint write".into(),
                },
            })?;
            self.remembered_for = Some(self.version_on_open);
        }
        let mut faulty = false;
        let mut target = self.target.lock();
        for (buf_ch, raw_ch) in self.buffer.iter().zip(target.buffer_mut().iter_mut()) {
            for (b, r) in buf_ch.iter().zip(raw_ch.iter_mut()) {
                let (raw, validity) = self.converter.to_raw(convert::<f64, T>(*b));
                if validity.is_faulty() {
                    faulty = true;
                }
                *r = raw;
            }
        }
        if faulty {
            self.validity = DataValidity::Faulty;
        }
        target.pre_write(transfer, version)
    }

    fn do_write_transfer(&mut self, version: VersionNumber) -> RuntimeResult<bool> {
        self.target.lock().do_write_transfer(version)
    }

    fn post_write(&mut self, transfer: TransferType, version: VersionNumber) -> RuntimeResult<()> {
        self.target.lock().post_write(transfer, version)
    }

    fn is_readable(&self) -> bool {
        self.target.lock().is_readable()
    }

    fn is_writeable(&self) -> bool {
        self.writeable && self.target.lock().is_writeable()
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
        self.target.lock().hardware_accessing_elements()
    }

    fn is_copy_decorator(&self) -> bool {
        true
    }
}

impl<T: Arithmetic + Send + 'static> NDRegisterAccessor<T> for FixedPointAccessorDecorator<T> {
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
    use crate::accessor::leaf::{RawRegisterAccessor, RawStorage};
    use crate::register_info::AccessModes;
    use parking_lot::Mutex;

    fn raw_word_leaf(n_samples: usize) -> SharedAccessor<u64> {
        let storage = Arc::new(Mutex::new(RawStorage::new(1, n_samples)));
        RawRegisterAccessor::<u64>::new(
            storage,
            FixedPointConverter::new(32, 0, false),
            AccessModes::READ_WRITE,
            Arc::new(Mutex::new(None)),
        )
    }

    #[test]
    fn reinterprets_raw_words_with_its_own_scale() {
        let target = raw_word_leaf(1);
        let mut acc = FixedPointAccessorDecorator::<f64>::new(
            target,
            1,
            "SUB/AREA",
            FixedPointConverter::new(16, 4, false),
            true,
            VersionNumber::new(),
        )
        .unwrap();
        acc.buffer_mut()[0][0] = 6.25;
        acc.write(VersionNumber::new()).unwrap();
        acc.read().unwrap();
        assert_eq!(acc.buffer()[0][0], 6.25);
    }

    #[test]
    fn two_views_on_one_word_see_each_others_writes() {
        let target = raw_word_leaf(1);
        let opened_at = VersionNumber::new();
        let mut a = FixedPointAccessorDecorator::<i32>::new(
            target.clone(),
            1,
            "SUB/AREA",
            FixedPointConverter::new(32, 0, true),
            true,
            opened_at,
        )
        .unwrap();
        let mut b = FixedPointAccessorDecorator::<i32>::new(
            target,
            1,
            "SUB/AREA",
            FixedPointConverter::new(32, 0, true),
            true,
            opened_at,
        )
        .unwrap();
        a.buffer_mut()[0][0] = 42;
        a.write(VersionNumber::new()).unwrap();
        b.read().unwrap();
        assert_eq!(b.buffer()[0][0], 42);
    }
}
