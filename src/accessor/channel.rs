//! `Channel` decorator (spec §4.8), ground-truthed against
//! `examples/original_source/device_backends/LogicalNameMapping/include/LNMBackendChannelAccessor.h`:
//! picks one row out of a multi-channel target register and presents it as
//! a scalar-channel accessor of its own. Read-only -- the original asserts
//! on write, we reject in `pre_write` instead so the failure is an ordinary
//! [`LogicError`] rather than a panic.

use crate::accessor::{NDRegisterAccessor, SharedAccessor, SharedElement, TransferElement, TransferType};
use crate::error::{LogicError, LogicResult, RuntimeResult};
use crate::shared_state::TransferElementID;
use crate::validity::DataValidity;
use crate::version::VersionNumber;

pub struct ChannelAccessorDecorator<T> {
    id: TransferElementID,
    target: SharedAccessor<T>,
    channel: usize,
    path: String,
    buffer: Vec<Vec<T>>,
    version: VersionNumber,
    validity: DataValidity,
}

impl<T: Clone + Default + Send + 'static> ChannelAccessorDecorator<T> {
    pub fn new(target: SharedAccessor<T>, channel: usize, path: impl Into<String>) -> LogicResult<Self> {
        let path = path.into();
        let (n_channels, n_samples) = {
            let t = target.lock();
            (t.n_channels(), t.n_samples())
        };
        if channel >= n_channels {
            return Err(LogicError::OutOfRange {
                path,
                offset: channel,
                length: 1,
                size: n_channels,
            });
        }
        Ok(ChannelAccessorDecorator {
            id: TransferElementID::new(),
            target,
            channel,
            path,
            buffer: vec![vec![T::default(); n_samples]],
            version: VersionNumber::new(),
            validity: DataValidity::Ok,
        })
    }
}

impl<T: Clone + Send + 'static> TransferElement for ChannelAccessorDecorator<T> {
    fn id(&self) -> TransferElementID {
        self.id
    }

    fn pre_read(&mut self, transfer: TransferType) -> LogicResult<()> {
        self.target.lock().pre_read(transfer)
    }

    fn do_read_transfer(&mut self) -> RuntimeResult<bool> {
        self.target.lock().do_read_transfer()
    }

    fn post_read(&mut self, transfer: TransferType, has_new_data: bool) -> RuntimeResult<()> {
        let mut target = self.target.lock();
        target.post_read(transfer, has_new_data)?;
        if has_new_data {
            self.buffer[0].clone_from_slice(&target.buffer()[self.channel]);
            self.version = target.version();
            self.validity = target.validity();
        }
        Ok(())
    }

    fn pre_write(&mut self, _transfer: TransferType, _version: VersionNumber) -> LogicResult<()> {
        Err(LogicError::ReadOnly { path: self.path.clone() })
    }

    fn do_write_transfer(&mut self, version: VersionNumber) -> RuntimeResult<bool> {
        // unreachable via `write()` since `pre_write` always fails first;
        // kept total for direct callers, same as `ForceReadOnlyDecorator`.
        self.target.lock().do_write_transfer(version)
    }

    fn post_write(&mut self, transfer: TransferType, version: VersionNumber) -> RuntimeResult<()> {
        self.target.lock().post_write(transfer, version)
    }

    fn is_readable(&self) -> bool {
        true
    }

    fn is_writeable(&self) -> bool {
        false
    }

    fn supports_wait_for_new_data(&self) -> bool {
        self.target.lock().supports_wait_for_new_data()
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

impl<T: Clone + Send + 'static> NDRegisterAccessor<T> for ChannelAccessorDecorator<T> {
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
    use crate::convert::FixedPointConverter;
    use crate::register_info::AccessModes;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn leaf(n_channels: usize, n_samples: usize) -> SharedAccessor<i32> {
        let storage = Arc::new(Mutex::new(RawStorage::new(n_channels, n_samples)));
        RawRegisterAccessor::<i32>::new(
            storage,
            FixedPointConverter::new(32, 0, true),
            AccessModes::READ_WRITE,
            Arc::new(Mutex::new(None)),
        )
    }

    #[test]
    fn reads_the_requested_channel_only() {
        let target = leaf(2, 2);
        {
            let mut t = target.lock();
            t.buffer_mut()[0] = vec![1, 2];
            t.buffer_mut()[1] = vec![3, 4];
            t.write(VersionNumber::new()).unwrap();
        }
        let mut decorator = ChannelAccessorDecorator::new(target, 1, "R").unwrap();
        decorator.read().unwrap();
        assert_eq!(decorator.buffer()[0], vec![3, 4]);
    }

    #[test]
    fn out_of_range_channel_is_rejected() {
        let target = leaf(1, 1);
        let result = ChannelAccessorDecorator::<i32>::new(target, 5, "R");
        assert!(matches!(result, Err(LogicError::OutOfRange { .. })));
    }

    #[test]
    fn write_is_rejected() {
        let target = leaf(1, 1);
        let mut decorator = ChannelAccessorDecorator::new(target, 0, "R").unwrap();
        assert!(decorator.write(VersionNumber::new()).is_err());
    }
}
