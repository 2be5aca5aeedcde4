//! `ForceReadOnly` decorator (spec §4.9): wraps a target that may itself be
//! writeable and unconditionally rejects writes, regardless of what the
//! target supports.

use crate::accessor::decorator::TransparentDecorator;
use crate::accessor::{NDRegisterAccessor, SharedAccessor, SharedElement, TransferElement, TransferType};
use crate::error::{LogicError, LogicResult, RuntimeResult};
use crate::shared_state::TransferElementID;
use crate::validity::DataValidity;
use crate::version::VersionNumber;

pub struct ForceReadOnlyDecorator<T> {
    inner: TransparentDecorator<T>,
    path: String,
}

impl<T: Clone + Default> ForceReadOnlyDecorator<T> {
    pub fn new(target: SharedAccessor<T>, path: impl Into<String>) -> Self {
        ForceReadOnlyDecorator {
            inner: TransparentDecorator::new(target),
            path: path.into(),
        }
    }
}

impl<T: Clone + Send + 'static> TransferElement for ForceReadOnlyDecorator<T> {
    fn id(&self) -> TransferElementID {
        self.inner.id()
    }
    fn pre_read(&mut self, transfer: TransferType) -> LogicResult<()> {
        self.inner.pre_read(transfer)
    }
    fn do_read_transfer(&mut self) -> RuntimeResult<bool> {
        self.inner.do_read_transfer()
    }
    fn post_read(&mut self, transfer: TransferType, has_new_data: bool) -> RuntimeResult<()> {
        self.inner.post_read(transfer, has_new_data)
    }
    fn pre_write(&mut self, _transfer: TransferType, _version: VersionNumber) -> LogicResult<()> {
        Err(LogicError::ReadOnly {
            path: self.path.clone(),
        })
    }
    fn do_write_transfer(&mut self, version: VersionNumber) -> RuntimeResult<bool> {
        // unreachable via the public `write()` convenience method, since
        // `pre_write` always fails first; kept total for direct callers.
        self.inner.do_write_transfer(version)
    }
    fn post_write(&mut self, transfer: TransferType, version: VersionNumber) -> RuntimeResult<()> {
        self.inner.post_write(transfer, version)
    }
    fn is_readable(&self) -> bool {
        self.inner.is_readable()
    }
    fn is_writeable(&self) -> bool {
        false
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
}

impl<T: Clone + Send + 'static> NDRegisterAccessor<T> for ForceReadOnlyDecorator<T> {
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
    fn write_is_always_rejected() {
        let storage = Arc::new(Mutex::new(RawStorage::new(1, 1)));
        let leaf = RawRegisterAccessor::<i32>::new(
            storage,
            FixedPointConverter::new(8, 0, false),
            AccessModes::READ_WRITE,
            Arc::new(Mutex::new(None)),
        );
        let mut decorator = ForceReadOnlyDecorator::new(leaf, "A");
        let v = VersionNumber::new();
        assert!(decorator.pre_write(TransferType::new(Default::default()), v).is_err());
        assert!(!decorator.is_writeable());
    }
}
