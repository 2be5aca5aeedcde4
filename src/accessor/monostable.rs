//! `MonostableTrigger` decorator (spec §4.9), ground-truthed against
//! `examples/original_source/device_backends/LogicalNameMapping/src/LNMMonostableTriggerPlugin.cc`:
//! writing any value to this register drives a scalar `u32` target to
//! `active`, waits `milliseconds`, then drives it back to `inactive`. The
//! value the caller actually wrote is irrelevant; only the act of writing
//! matters. Not readable.

use std::thread;
use std::time::Duration;

use crate::accessor::{NDRegisterAccessor, SharedAccessor, SharedElement, TransferElement, TransferType};
use crate::error::{LogicError, LogicResult, RuntimeResult};
use crate::shared_state::TransferElementID;
use crate::validity::DataValidity;
use crate::version::VersionNumber;

pub struct MonostableTriggerDecorator<T> {
    id: TransferElementID,
    target: SharedAccessor<u32>,
    milliseconds: f64,
    active: u32,
    inactive: u32,
    buffer: Vec<Vec<T>>,
    version: VersionNumber,
}

impl<T: Default + Send + 'static> MonostableTriggerDecorator<T> {
    pub fn new(target: SharedAccessor<u32>, milliseconds: f64, active: u32, inactive: u32) -> LogicResult<Self> {
        {
            let t = target.lock();
            if !t.is_writeable() {
                return Err(LogicError::Unsupported {
                    reason: "MonostableTrigger cannot target a non-writeable register".into(),
                });
            }
            if t.n_channels() > 1 || t.n_samples() > 1 {
                return Err(LogicError::Unsupported {
                    reason: "MonostableTrigger cannot target a non-scalar register".into(),
                });
            }
        }
        Ok(MonostableTriggerDecorator {
            id: TransferElementID::new(),
            target,
            milliseconds,
            active,
            inactive,
            buffer: vec![vec![T::default(); 1]],
            version: VersionNumber::new(),
        })
    }
}

impl<T: Send + 'static> TransferElement for MonostableTriggerDecorator<T> {
    fn id(&self) -> TransferElementID {
        self.id
    }

    fn pre_read(&mut self, _transfer: TransferType) -> LogicResult<()> {
        Err(LogicError::Unsupported {
            reason: "MonostableTrigger registers are not readable".into(),
        })
    }

    fn do_read_transfer(&mut self) -> RuntimeResult<bool> {
        Ok(false)
    }

    fn post_read(&mut self, _transfer: TransferType, _has_new_data: bool) -> RuntimeResult<()> {
        Ok(())
    }

    fn pre_write(&mut self, _transfer: TransferType, version: VersionNumber) -> LogicResult<()> {
        let mut target = self.target.lock();
        target.buffer_mut()[0][0] = self.active;
        target.pre_write(TransferType::new(Default::default()), version)
    }

    fn do_write_transfer(&mut self, version: VersionNumber) -> RuntimeResult<bool> {
        let activate_lost = {
            let mut target = self.target.lock();
            let lost = target.do_write_transfer(version)?;
            target.post_write(TransferType::new(Default::default()), version)?;
            lost
        };

        thread::sleep(Duration::from_secs_f64(self.milliseconds / 1000.0));

        let mut target = self.target.lock();
        target.buffer_mut()[0][0] = self.inactive;
        target
            .pre_write(TransferType::new(Default::default()), version)
            .map_err(|e| crate::error::RuntimeError::generic(e.to_string()))?;
        let deactivate_lost = target.do_write_transfer(version)?;
        Ok(activate_lost || deactivate_lost)
    }

    fn post_write(&mut self, transfer: TransferType, version: VersionNumber) -> RuntimeResult<()> {
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
        self.target.lock().hardware_accessing_elements()
    }
}

impl<T: Send + 'static> NDRegisterAccessor<T> for MonostableTriggerDecorator<T> {
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

    #[test]
    fn write_pulses_active_then_inactive() {
        let storage = Arc::new(Mutex::new(RawStorage::new(1, 1)));
        let target = RawRegisterAccessor::<u32>::new(
            storage.clone(),
            FixedPointConverter::new(32, 0, false),
            AccessModes::READ_WRITE,
            Arc::new(Mutex::new(None)),
        );
        let mut decorator = MonostableTriggerDecorator::<i32>::new(target, 0.0, 1, 0).unwrap();
        decorator.write(VersionNumber::new()).unwrap();
        assert_eq!(storage.lock().words[0][0], 0);
        assert_eq!(storage.lock().write_count, 2);
    }

    #[test]
    fn read_is_rejected() {
        let storage = Arc::new(Mutex::new(RawStorage::new(1, 1)));
        let target = RawRegisterAccessor::<u32>::new(
            storage,
            FixedPointConverter::new(32, 0, false),
            AccessModes::READ_WRITE,
            Arc::new(Mutex::new(None)),
        );
        let mut decorator = MonostableTriggerDecorator::<i32>::new(target, 0.0, 1, 0).unwrap();
        assert!(decorator.read().is_err());
    }
}
