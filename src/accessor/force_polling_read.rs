//! `ForcePollingRead` decorator (spec §4.9), ground-truthed against
//! `examples/original_source/device_backends/LogicalNameMapping/src/LNMForcePollingReadPlugin.cc`:
//! strips `wait_for_new_data` from a target's supported access modes,
//! forcing every read through this register to be a plain synchronous poll.

use crate::accessor::decorator::TransparentDecorator;
use crate::accessor::{NDRegisterAccessor, SharedAccessor, SharedElement, TransferElement, TransferType};
use crate::error::{LogicError, LogicResult, RuntimeResult};
use crate::shared_state::TransferElementID;
use crate::validity::DataValidity;
use crate::version::VersionNumber;

pub struct ForcePollingReadDecorator<T> {
    inner: TransparentDecorator<T>,
    path: String,
}

impl<T: Clone + Default + Send + 'static> ForcePollingReadDecorator<T> {
    pub fn new(target: SharedAccessor<T>, path: impl Into<String>) -> LogicResult<Self> {
        let path = path.into();
        if target.lock().supports_wait_for_new_data() {
            return Err(LogicError::Unsupported {
                reason: format!(
                    "wait_for_new_data is disallowed through ForcePollingRead for register '{path}'"
                ),
            });
        }
        Ok(ForcePollingReadDecorator {
            inner: TransparentDecorator::new(target),
            path,
        })
    }
}

impl<T: Clone + Send + 'static> TransferElement for ForcePollingReadDecorator<T> {
    fn id(&self) -> TransferElementID {
        self.inner.id()
    }
    fn pre_read(&mut self, transfer: TransferType) -> LogicResult<()> {
        if transfer.wants(crate::register_info::AccessModeFlags::WAIT_FOR_NEW_DATA) {
            return Err(LogicError::UnsupportedAccessMode {
                path: self.path.clone(),
                flag: "wait_for_new_data",
            });
        }
        self.inner.pre_read(transfer)
    }
    fn do_read_transfer(&mut self) -> RuntimeResult<bool> {
        self.inner.do_read_transfer()
    }
    fn post_read(&mut self, transfer: TransferType, has_new_data: bool) -> RuntimeResult<()> {
        self.inner.post_read(transfer, has_new_data)
    }
    fn pre_write(&mut self, transfer: TransferType, version: VersionNumber) -> LogicResult<()> {
        self.inner.pre_write(transfer, version)
    }
    fn do_write_transfer(&mut self, version: VersionNumber) -> RuntimeResult<bool> {
        self.inner.do_write_transfer(version)
    }
    fn post_write(&mut self, transfer: TransferType, version: VersionNumber) -> RuntimeResult<()> {
        self.inner.post_write(transfer, version)
    }
    fn is_readable(&self) -> bool {
        self.inner.is_readable()
    }
    fn is_writeable(&self) -> bool {
        self.inner.is_writeable()
    }
    fn supports_wait_for_new_data(&self) -> bool {
        false
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
}

impl<T: Clone + Send + 'static> NDRegisterAccessor<T> for ForcePollingReadDecorator<T> {
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

    #[test]
    fn strips_wait_for_new_data_support() {
        let storage = Arc::new(Mutex::new(RawStorage::new(1, 1)));
        let leaf = RawRegisterAccessor::<i32>::new(
            storage,
            FixedPointConverter::new(8, 0, false),
            AccessModes::READ_WRITE,
            Arc::new(Mutex::new(None)),
        );
        let decorator = ForcePollingReadDecorator::new(leaf, "A").unwrap();
        assert!(!decorator.supports_wait_for_new_data());
    }
}
