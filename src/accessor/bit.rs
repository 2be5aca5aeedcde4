//! `Bit` decorator (spec §4.8), ground-truthed against
//! `examples/original_source/device_backends/LogicalNameMapping/include/LNMBackendBitAccessor.h`:
//! a single-bit view of a shared target register. The original implements
//! this as its own accessor class, but its read/write/shared-state logic is
//! exactly [`super::bit_range::BitRangeAccessorDecorator`] with
//! `num_bits == 1`, so this is a thin, unsigned-only specialisation of it
//! rather than a parallel implementation.

use crate::accessor::bit_range::BitRangeAccessorDecorator;
use crate::accessor::{NDRegisterAccessor, SharedAccessor, SharedElement, TransferElement, TransferType};
use crate::convert::numeric::Arithmetic;
use crate::error::LogicResult;
use crate::register_path::RegisterPath;
use crate::shared_state::TransferElementID;
use crate::validity::DataValidity;
use crate::version::VersionNumber;

pub struct BitAccessorDecorator<T> {
    inner: BitRangeAccessorDecorator<T>,
}

impl<T: Arithmetic + Default + Send + 'static> BitAccessorDecorator<T> {
    pub fn new(
        target: SharedAccessor<u64>,
        backend_id: usize,
        path: impl Into<RegisterPath>,
        bit: u8,
        version_on_open: VersionNumber,
    ) -> LogicResult<Self> {
        Ok(BitAccessorDecorator {
            inner: BitRangeAccessorDecorator::new(target, backend_id, path, bit, 1, false, version_on_open)?,
        })
    }
}

impl<T: Arithmetic + Send + 'static> TransferElement for BitAccessorDecorator<T> {
    fn id(&self) -> TransferElementID {
        self.inner.id()
    }
    fn pre_read(&mut self, transfer: TransferType) -> LogicResult<()> {
        self.inner.pre_read(transfer)
    }
    fn do_read_transfer(&mut self) -> crate::error::RuntimeResult<bool> {
        self.inner.do_read_transfer()
    }
    fn post_read(&mut self, transfer: TransferType, has_new_data: bool) -> crate::error::RuntimeResult<()> {
        self.inner.post_read(transfer, has_new_data)
    }
    fn pre_write(&mut self, transfer: TransferType, version: VersionNumber) -> LogicResult<()> {
        self.inner.pre_write(transfer, version)
    }
    fn do_write_transfer(&mut self, version: VersionNumber) -> crate::error::RuntimeResult<bool> {
        self.inner.do_write_transfer(version)
    }
    fn post_write(&mut self, transfer: TransferType, version: VersionNumber) -> crate::error::RuntimeResult<()> {
        self.inner.post_write(transfer, version)
    }
    fn is_readable(&self) -> bool {
        self.inner.is_readable()
    }
    fn is_writeable(&self) -> bool {
        self.inner.is_writeable()
    }
    fn supports_wait_for_new_data(&self) -> bool {
        self.inner.supports_wait_for_new_data()
    }
    fn version(&self) -> VersionNumber {
        self.inner.version()
    }
    fn validity(&self) -> DataValidity {
        self.inner.validity()
    }
    fn hardware_accessing_elements(&self) -> Vec<SharedElement> {
        self.inner.hardware_accessing_elements()
    }
    fn is_copy_decorator(&self) -> bool {
        self.inner.is_copy_decorator()
    }
}

impl<T: Arithmetic + Send + 'static> NDRegisterAccessor<T> for BitAccessorDecorator<T> {
    fn buffer(&self) -> &[Vec<T>] {
        self.inner.buffer()
    }
    fn buffer_mut(&mut self) -> &mut Vec<Vec<T>> {
        self.inner.buffer_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::leaf::{RawRegisterAccessor, RawStorage};
    use crate::convert::FixedPointConverter;
    use crate::register_info::AccessModes;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn leaf() -> SharedAccessor<u64> {
        let storage = Arc::new(Mutex::new(RawStorage::new(1, 1)));
        RawRegisterAccessor::<u64>::new(
            storage,
            FixedPointConverter::new(32, 0, false),
            AccessModes::READ_WRITE,
            Arc::new(Mutex::new(None)),
        )
    }

    #[test]
    fn two_bits_of_one_word_do_not_clobber_each_other() {
        let target = leaf();
        let opened_at = VersionNumber::new();
        let mut bit0 = BitAccessorDecorator::<i32>::new(target.clone(), 1, "R", 0, opened_at).unwrap();
        let mut bit3 = BitAccessorDecorator::<i32>::new(target, 1, "R", 3, opened_at).unwrap();

        bit0.buffer_mut()[0][0] = 1;
        bit0.write(VersionNumber::new()).unwrap();
        bit3.buffer_mut()[0][0] = 1;
        bit3.write(VersionNumber::new()).unwrap();

        bit0.read().unwrap();
        bit3.read().unwrap();
        assert_eq!(bit0.buffer()[0][0], 1);
        assert_eq!(bit3.buffer()[0][0], 1);
    }
}
