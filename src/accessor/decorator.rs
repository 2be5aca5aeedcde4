//! Generic decorator base (spec §4.2), ground-truthed against the
//! "deref to inner, override only what diverges" idiom of
//! `machine/src/mmio_deref_wrapper.rs`: a decorator forwards every
//! `TransferElement` method to its target unchanged except the two that
//! cross the type boundary, `post_read`/`pre_write`, where it converts
//! element-by-element through [`convert::numeric::convert`].
//!
//! Concrete decorators (`fixed_point`, `sub_array`, `bit_range`, `fan_out`,
//! ...) build on top of this rather than reimplementing the forwarding
//! boilerplate. The target is held through [`SharedAccessor`] rather than a
//! `Box`: the same concrete leaf is frequently shared by more than one
//! decorator chain (overlapping sub-array/bit-range windows, spec §4.6/4.7)
//! and by [`crate::transfer_group::TransferGroup`]'s merged low-level set.

use crate::accessor::{NDRegisterAccessor, SharedAccessor, SharedElement, TransferElement, TransferType};
use crate::convert::numeric::{convert, Arithmetic};
use crate::error::{LogicResult, RuntimeResult};
use crate::shared_state::TransferElementID;
use crate::validity::DataValidity;
use crate::version::VersionNumber;

/// Wraps a [`SharedAccessor<Target>`] and exposes it as an
/// `NDRegisterAccessor<Own>`, converting through [`Arithmetic`] on every
/// transfer. `Own == Target` is the common case of a decorator that adds
/// behaviour without changing the user type (e.g. [`super::force_read_only`]).
pub struct ForwardingDecorator<Own, Target> {
    pub(crate) target: SharedAccessor<Target>,
    buffer: Vec<Vec<Own>>,
}

impl<Own, Target> ForwardingDecorator<Own, Target>
where
    Own: Arithmetic + Default,
    Target: Arithmetic,
{
    pub fn new(target: SharedAccessor<Target>) -> Self {
        let (n_channels, n_samples) = {
            let t = target.lock();
            (t.n_channels(), t.n_samples())
        };
        ForwardingDecorator {
            target,
            buffer: vec![vec![Own::default(); n_samples]; n_channels],
        }
    }

    /// The wrapped target, for decorators that need more than the plain
    /// forwarding behaviour (e.g. [`super::sub_array`] windowing).
    pub fn target(&self) -> &SharedAccessor<Target> {
        &self.target
    }
}

impl<Own, Target> TransferElement for ForwardingDecorator<Own, Target>
where
    Own: Arithmetic + Default + Send,
    Target: Arithmetic + Send,
{
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
                    *o = convert::<Own, Target>(*t);
                }
            }
        }
        Ok(())
    }

    fn pre_write(&mut self, transfer: TransferType, version: VersionNumber) -> LogicResult<()> {
        let mut target = self.target.lock();
        for (own_ch, target_ch) in self.buffer.iter().zip(target.buffer_mut().iter_mut()) {
            for (o, t) in own_ch.iter().zip(target_ch.iter_mut()) {
                *t = convert::<Target, Own>(*o);
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

impl<Own, Target> NDRegisterAccessor<Own> for ForwardingDecorator<Own, Target>
where
    Own: Arithmetic + Default + Send,
    Target: Arithmetic + Send,
{
    fn buffer(&self) -> &[Vec<Own>] {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut Vec<Vec<Own>> {
        &mut self.buffer
    }
}

/// Wraps a [`SharedAccessor<T>`] with the *same* user type: no conversion,
/// just a forwarded transfer protocol. The base for decorators that only
/// change behaviour (readability, access-mode support, timing) and never
/// the user type: [`super::force_read_only`], [`super::force_polling_read`],
/// [`super::monostable`]. `buffer()`/`buffer_mut()` can't borrow through the
/// `Mutex` guard (the guard would have to outlive the return value), so a
/// local mirror buffer is kept and copied through verbatim in `post_read`/
/// `pre_write`.
pub struct TransparentDecorator<T> {
    pub(crate) target: SharedAccessor<T>,
    buffer: Vec<Vec<T>>,
}

impl<T: Clone + Default> TransparentDecorator<T> {
    pub fn new(target: SharedAccessor<T>) -> Self {
        let (n_channels, n_samples) = {
            let t = target.lock();
            (t.n_channels(), t.n_samples())
        };
        TransparentDecorator {
            target,
            buffer: vec![vec![T::default(); n_samples]; n_channels],
        }
    }

    pub fn target(&self) -> &SharedAccessor<T> {
        &self.target
    }
}

impl<T: Clone + Send + 'static> TransferElement for TransparentDecorator<T> {
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
            for (o, t) in self.buffer.iter_mut().zip(target.buffer().iter()) {
                o.clone_from(t);
            }
        }
        Ok(())
    }
    fn pre_write(&mut self, transfer: TransferType, version: VersionNumber) -> LogicResult<()> {
        let mut target = self.target.lock();
        for (o, t) in self.buffer.iter().zip(target.buffer_mut().iter_mut()) {
            t.clone_from(o);
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

impl<T: Clone + Send + 'static> NDRegisterAccessor<T> for TransparentDecorator<T> {
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
    use crate::accessor::share;

    /// Minimal in-memory stand-in for a leaf accessor, just enough to
    /// exercise the forwarding/conversion behaviour in isolation.
    struct MockAccessor {
        id: TransferElementID,
        buffer: Vec<Vec<f64>>,
        version: VersionNumber,
    }

    impl TransferElement for MockAccessor {
        fn id(&self) -> TransferElementID {
            self.id
        }
        fn pre_read(&mut self, _transfer: TransferType) -> LogicResult<()> {
            Ok(())
        }
        fn do_read_transfer(&mut self) -> RuntimeResult<bool> {
            Ok(true)
        }
        fn post_read(&mut self, _transfer: TransferType, _has_new_data: bool) -> RuntimeResult<()> {
            Ok(())
        }
        fn pre_write(&mut self, _transfer: TransferType, _version: VersionNumber) -> LogicResult<()> {
            Ok(())
        }
        fn do_write_transfer(&mut self, version: VersionNumber) -> RuntimeResult<bool> {
            self.version = version;
            Ok(false)
        }
        fn post_write(&mut self, _transfer: TransferType, _version: VersionNumber) -> RuntimeResult<()> {
            Ok(())
        }
        fn is_readable(&self) -> bool {
            true
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
            DataValidity::Ok
        }
        fn hardware_accessing_elements(&self) -> Vec<SharedElement> {
            vec![]
        }
    }

    impl NDRegisterAccessor<f64> for MockAccessor {
        fn buffer(&self) -> &[Vec<f64>] {
            &self.buffer
        }
        fn buffer_mut(&mut self) -> &mut Vec<Vec<f64>> {
            &mut self.buffer
        }
    }

    #[test]
    fn forwarding_decorator_converts_through_to_a_different_user_type() {
        let target = MockAccessor {
            id: TransferElementID::new(),
            buffer: vec![vec![10.0]],
            version: VersionNumber::new(),
        };
        let mut decorator: ForwardingDecorator<i32, f64> = ForwardingDecorator::new(share(target));
        decorator.pre_read(TransferType::new(Default::default())).unwrap();
        let has_new = decorator.do_read_transfer().unwrap();
        decorator.post_read(TransferType::new(Default::default()), has_new).unwrap();
        assert_eq!(decorator.buffer()[0][0], 10);
    }

    #[test]
    fn forwarding_decorator_writes_convert_own_into_target() {
        let target = MockAccessor {
            id: TransferElementID::new(),
            buffer: vec![vec![0.0]],
            version: VersionNumber::new(),
        };
        let decorator_target = share(target);
        let mut decorator: ForwardingDecorator<i32, f64> = ForwardingDecorator::new(decorator_target.clone());
        decorator.buffer_mut()[0][0] = 7;
        let v = VersionNumber::new();
        decorator.pre_write(TransferType::new(Default::default()), v).unwrap();
        assert_eq!(decorator_target.lock().buffer()[0][0], 7.0);
    }
}
