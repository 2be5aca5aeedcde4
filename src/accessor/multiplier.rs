//! `Multiplier` decorator (spec §4.9): cooked value is scaled by a constant
//! factor on read, divided by it on write. Grounded on the same
//! `NDRegisterAccessorDecorator`-derived shape as every other LNM accessor
//! plugin, scaling through `f64` via [`crate::convert::numeric::convert`]
//! the same way [`super::decorator::ForwardingDecorator`] converts between
//! user types.

use crate::accessor::{NDRegisterAccessor, SharedAccessor, SharedElement, TransferElement, TransferType};
use crate::convert::numeric::{convert, Arithmetic};
use crate::error::{LogicResult, RuntimeResult};
use crate::shared_state::TransferElementID;
use crate::validity::DataValidity;
use crate::version::VersionNumber;

pub struct MultiplierDecorator<T> {
    target: SharedAccessor<T>,
    factor: f64,
    buffer: Vec<Vec<T>>,
}

impl<T: Arithmetic + Default + Send + 'static> MultiplierDecorator<T> {
    pub fn new(target: SharedAccessor<T>, factor: f64) -> Self {
        let (n_channels, n_samples) = {
            let t = target.lock();
            (t.n_channels(), t.n_samples())
        };
        MultiplierDecorator {
            target,
            factor,
            buffer: vec![vec![T::default(); n_samples]; n_channels],
        }
    }
}

impl<T: Arithmetic + Send + 'static> TransferElement for MultiplierDecorator<T> {
    fn id(&self) -> TransferElementID {
        self.target.lock().id()
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
            for (own_ch, target_ch) in self.buffer.iter_mut().zip(target.buffer().iter()) {
                for (o, t) in own_ch.iter_mut().zip(target_ch.iter()) {
                    *o = convert::<T, f64>(convert::<f64, T>(*t) * self.factor);
                }
            }
        }
        Ok(())
    }
    fn pre_write(&mut self, transfer: TransferType, version: VersionNumber) -> LogicResult<()> {
        let mut target = self.target.lock();
        for (own_ch, target_ch) in self.buffer.iter().zip(target.buffer_mut().iter_mut()) {
            for (o, t) in own_ch.iter().zip(target_ch.iter_mut()) {
                *t = convert::<T, f64>(convert::<f64, T>(*o) / self.factor);
            }
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
        self.target.lock().is_writeable()
    }
    fn supports_wait_for_new_data(&self) -> bool {
        self.target.lock().supports_wait_for_new_data()
    }
    fn version(&self) -> VersionNumber {
        self.target.lock().version()
    }
    fn validity(&self) -> DataValidity {
        self.target.lock().validity()
    }
    fn hardware_accessing_elements(&self) -> Vec<SharedElement> {
        self.target.lock().hardware_accessing_elements()
    }
}

impl<T: Arithmetic + Send + 'static> NDRegisterAccessor<T> for MultiplierDecorator<T> {
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
    fn read_scales_up_and_write_scales_down() {
        let storage = Arc::new(Mutex::new(RawStorage::new(1, 1)));
        let target = RawRegisterAccessor::<f64>::new(
            storage,
            FixedPointConverter::new(32, 8, true),
            AccessModes::READ_WRITE,
            Arc::new(Mutex::new(None)),
        );
        let mut decorator = MultiplierDecorator::<f64>::new(target.clone(), 2.0);
        decorator.buffer_mut()[0][0] = 5.0;
        decorator.write(VersionNumber::new()).unwrap();
        assert_eq!(target.lock().buffer()[0][0], 2.5);

        decorator.read().unwrap();
        assert_eq!(decorator.buffer()[0][0], 5.0);
    }
}
