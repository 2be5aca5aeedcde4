//! `FanOut` decorator (spec §4.9), ground-truthed against
//! `examples/original_source/backends/LogicalNameMapping/src/FanOutPlugin.cc`:
//! a write-only register that fans its value out to N additional writeable
//! targets plus its own main target. Every target's `preWrite` is attempted
//! even if earlier ones threw; the first exception is re-thrown once all of
//! them (and the main target) have had their turn.

use crate::accessor::{NDRegisterAccessor, SharedAccessor, SharedElement, TransferElement, TransferType};
use crate::error::{LogicError, LogicResult, RuntimeResult};
use crate::shared_state::TransferElementID;
use crate::validity::DataValidity;
use crate::version::VersionNumber;

pub struct FanOutDecorator<T> {
    id: TransferElementID,
    target: SharedAccessor<T>,
    fan_targets: Vec<SharedAccessor<T>>,
    buffer: Vec<Vec<T>>,
    version: VersionNumber,
}

impl<T: Clone + Default + Send + 'static> FanOutDecorator<T> {
    pub fn new(target: SharedAccessor<T>, fan_targets: Vec<SharedAccessor<T>>) -> LogicResult<Self> {
        let (n_channels, n_samples) = {
            let t = target.lock();
            if !t.is_writeable() {
                return Err(LogicError::Unsupported {
                    reason: "FanOut requires a writeable main target register".into(),
                });
            }
            (t.n_channels(), t.n_samples())
        };
        for acc in &fan_targets {
            let a = acc.lock();
            if a.n_channels() != n_channels || a.n_samples() != n_samples {
                return Err(LogicError::Unsupported {
                    reason: "FanOut: shape of a target register does not match the main target".into(),
                });
            }
            if !a.is_writeable() {
                return Err(LogicError::Unsupported {
                    reason: "FanOut: a target register is not writeable".into(),
                });
            }
        }
        Ok(FanOutDecorator {
            id: TransferElementID::new(),
            target,
            fan_targets,
            buffer: vec![vec![T::default(); n_samples]; n_channels],
            version: VersionNumber::new(),
        })
    }
}

impl<T: Clone + Send + 'static> TransferElement for FanOutDecorator<T> {
    fn id(&self) -> TransferElementID {
        self.id
    }

    fn pre_read(&mut self, _transfer: TransferType) -> LogicResult<()> {
        Err(LogicError::Unsupported {
            reason: "FanOut register is not readable".into(),
        })
    }

    fn do_read_transfer(&mut self) -> RuntimeResult<bool> {
        Ok(false)
    }

    fn post_read(&mut self, _transfer: TransferType, _has_new_data: bool) -> RuntimeResult<()> {
        Ok(())
    }

    fn pre_write(&mut self, transfer: TransferType, version: VersionNumber) -> LogicResult<()> {
        let mut first_err = None;
        for acc in &self.fan_targets {
            let mut a = acc.lock();
            for (ch_a, ch_own) in a.buffer_mut().iter_mut().zip(self.buffer.iter()) {
                ch_a.clone_from(ch_own);
            }
            if let Err(e) = a.pre_write(transfer, version) {
                first_err.get_or_insert(e);
            }
        }
        {
            let mut t = self.target.lock();
            for (ch_t, ch_own) in t.buffer_mut().iter_mut().zip(self.buffer.iter()) {
                ch_t.clone_from(ch_own);
            }
            if let Err(e) = t.pre_write(transfer, version) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn do_write_transfer(&mut self, version: VersionNumber) -> RuntimeResult<bool> {
        let mut data_lost = false;
        for acc in &self.fan_targets {
            data_lost |= acc.lock().do_write_transfer(version)?;
        }
        data_lost |= self.target.lock().do_write_transfer(version)?;
        Ok(data_lost)
    }

    fn post_write(&mut self, transfer: TransferType, version: VersionNumber) -> RuntimeResult<()> {
        for acc in &self.fan_targets {
            acc.lock().post_write(transfer, version)?;
        }
        self.target.lock().post_write(transfer, version)
    }

    fn is_readable(&self) -> bool {
        false
    }

    fn is_writeable(&self) -> bool {
        true
    }

    fn supports_wait_for_new_data(&self) -> bool {
        false
    }

    fn version(&self) -> VersionNumber {
        self.version
    }

    fn validity(&self) -> DataValidity {
        self.target.lock().validity()
    }

    fn hardware_accessing_elements(&self) -> Vec<SharedElement> {
        let mut elements = self.target.lock().hardware_accessing_elements();
        for acc in &self.fan_targets {
            elements.extend(acc.lock().hardware_accessing_elements());
        }
        elements
    }
}

impl<T: Clone + Send + 'static> NDRegisterAccessor<T> for FanOutDecorator<T> {
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

    fn leaf() -> SharedAccessor<i32> {
        let storage = Arc::new(Mutex::new(RawStorage::new(1, 1)));
        RawRegisterAccessor::<i32>::new(
            storage,
            FixedPointConverter::new(32, 0, true),
            AccessModes::READ_WRITE,
            Arc::new(Mutex::new(None)),
        )
    }

    #[test]
    fn write_fans_out_to_every_target() {
        let main = leaf();
        let a = leaf();
        let b = leaf();
        let mut decorator = FanOutDecorator::new(main.clone(), vec![a.clone(), b.clone()]).unwrap();
        decorator.buffer_mut()[0][0] = 42;
        decorator.write(VersionNumber::new()).unwrap();
        assert_eq!(main.lock().buffer()[0][0], 42);
        assert_eq!(a.lock().buffer()[0][0], 42);
        assert_eq!(b.lock().buffer()[0][0], 42);
    }

    #[test]
    fn read_is_unsupported() {
        let main = leaf();
        let mut decorator = FanOutDecorator::new(main, vec![]).unwrap();
        assert!(decorator.read().is_err());
    }
}
