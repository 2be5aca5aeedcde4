//! `BitRange` decorator (spec §4.7), ground-truthed against
//! `examples/original_source/device_backends/LogicalNameMapping/src/LNMBackendBitAccessor.cc`:
//! exposes `[shift, shift+num_bits)` of a shared 64-bit target register as a
//! smaller fixed-point cooked value. Several bit-range windows (and a plain
//! `SubArray`) can share one target the same way [`super::sub_array`] does.

use std::sync::Arc;

use crate::accessor::{NDRegisterAccessor, SharedAccessor, SharedElement, TransferElement, TransferType};
use crate::convert::numeric::{convert, Arithmetic};
use crate::convert::FixedPointConverter;
use crate::error::{LogicError, LogicResult, RuntimeResult};
use crate::register_path::RegisterPath;
use crate::shared_state::{shared_accessors, SharedAccessorKey, SharedTargetState, TransferElementID};
use crate::validity::DataValidity;
use crate::version::VersionNumber;

pub struct BitRangeAccessorDecorator<T> {
    id: TransferElementID,
    target: SharedAccessor<u64>,
    shared: Arc<SharedTargetState>,
    path: String,
    shift: u8,
    mask: u64,
    converter: FixedPointConverter,
    buffer: Vec<Vec<T>>,
    version: VersionNumber,
    validity: DataValidity,
    /// See [`super::sub_array::SubArrayAccessorDecorator`]'s fields of the
    /// same name: the read-remember-modify-write gate re-arms on every
    /// device reopen rather than latching permanently.
    version_on_open: VersionNumber,
    remembered_for: Option<VersionNumber>,
}

impl<T: Arithmetic + Default + Send + 'static> BitRangeAccessorDecorator<T> {
    pub fn new(
        target: SharedAccessor<u64>,
        backend_id: usize,
        path: impl Into<RegisterPath>,
        shift: u8,
        num_bits: u8,
        signed: bool,
        version_on_open: VersionNumber,
    ) -> LogicResult<Self> {
        let path = path.into();
        if shift as usize + num_bits as usize > 64 {
            return Err(LogicError::OutOfRange {
                path: path.to_string(),
                offset: shift as usize,
                length: num_bits as usize,
                size: 64,
            });
        }
        let key = SharedAccessorKey {
            backend_id,
            path: path.clone(),
        };
        let shared = shared_accessors().get_target_shared_state(key);
        let mask = if num_bits == 64 {
            u64::MAX
        } else {
            ((1u64 << num_bits) - 1) << shift
        };
        Ok(BitRangeAccessorDecorator {
            id: TransferElementID::new(),
            target,
            shared,
            path: path.to_string(),
            shift,
            mask,
            converter: FixedPointConverter::new(num_bits, 0, signed),
            buffer: vec![vec![T::default(); 1]],
            version: VersionNumber::new(),
            validity: DataValidity::Ok,
            version_on_open,
            remembered_for: None,
        })
    }
}

impl<T: Arithmetic + Send + 'static> TransferElement for BitRangeAccessorDecorator<T> {
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
        let (is_first_finisher, _) = self.shared.mutex.finish();
        let mut target = self.target.lock();
        if is_first_finisher {
            target.post_read(transfer, has_new_data)?;
        }
        if has_new_data {
            let raw = (target.buffer()[0][0] & self.mask) >> self.shift;
            let cooked = self.converter.to_cooked(raw);
            self.buffer[0][0] = convert::<T, f64>(cooked);
            self.version = self.version.combine(target.version());
            self.validity = target.validity();
            self.remembered_for = Some(self.version_on_open);
        }
        Ok(())
    }

    fn pre_write(&mut self, transfer: TransferType, version: VersionNumber) -> LogicResult<()> {
        if self.remembered_for != Some(self.version_on_open) {
            self.target.lock().read().map_err(|e| match e {
                crate::error::DeviceError::Logic { source } => source,
                crate::error::DeviceError::Runtime { .. } => LogicError::Unsupported {
                    reason: "could not read-remember before a BitRange write".into(),
                },
            })?;
            self.remembered_for = Some(self.version_on_open);
        }
        let cooked = convert::<f64, T>(self.buffer[0][0]);
        let (raw, clamp_validity) = self.converter.to_raw(cooked);
        if clamp_validity.is_faulty() {
            self.validity = DataValidity::Faulty;
        }
        let mut target = self.target.lock();
        let word = &mut target.buffer_mut()[0][0];
        *word = (*word & !self.mask) | ((raw << self.shift) & self.mask);
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
        self.target.lock().is_writeable()
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

impl<T: Arithmetic + Send + 'static> NDRegisterAccessor<T> for BitRangeAccessorDecorator<T> {
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
    use parking_lot::Mutex;

    fn leaf() -> SharedAccessor<u64> {
        let storage = Arc::new(Mutex::new(RawStorage::new(1, 1)));
        RawRegisterAccessor::<u64>::new(
            storage,
            FixedPointConverter::new(32, 0, false),
            crate::register_info::AccessModes::READ_WRITE,
            Arc::new(Mutex::new(None)),
        )
    }

    #[test]
    fn two_ranges_on_one_word_do_not_clobber_each_other() {
        let target = leaf();
        let opened_at = VersionNumber::new();
        let mut low = BitRangeAccessorDecorator::<i32>::new(target.clone(), 1, "R", 0, 4, false, opened_at).unwrap();
        let mut high = BitRangeAccessorDecorator::<i32>::new(target, 1, "R", 4, 4, false, opened_at).unwrap();

        low.buffer_mut()[0][0] = 0b1010;
        low.write(VersionNumber::new()).unwrap();
        high.buffer_mut()[0][0] = 0b0101;
        high.write(VersionNumber::new()).unwrap();

        low.read().unwrap();
        high.read().unwrap();
        assert_eq!(low.buffer()[0][0], 0b1010);
        assert_eq!(high.buffer()[0][0], 0b0101);
    }

    #[test]
    fn out_of_range_shift_is_rejected() {
        let target = leaf();
        let result = BitRangeAccessorDecorator::<i32>::new(target, 1, "R", 60, 8, false, VersionNumber::new());
        assert!(matches!(result, Err(LogicError::OutOfRange { .. })));
    }
}
