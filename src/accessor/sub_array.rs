//! `SubArray` decorator (spec §4.6): exposes a contiguous window of a
//! shared underlying register as its own accessor, so several independent
//! clients can each own "their" slice of one physical register without
//! clobbering each other's writes.
//!
//! Grounded on `examples/original_source/device_backends/LogicalNameMapping/`'s
//! range plugin together with `include/SharedAccessor.h`/
//! `CountedRecursiveMutex.h`: every window-decorator on the same register
//! shares one `target` handle and one [`SharedTargetState`], so a write made
//! through one window is immediately visible to a read through another --
//! they are, quite literally, the same accessor underneath.

use std::sync::Arc;

use crate::accessor::{NDRegisterAccessor, SharedAccessor, SharedElement, TransferElement, TransferType};
use crate::error::{LogicError, LogicResult, RuntimeResult};
use crate::register_path::RegisterPath;
use crate::shared_state::{shared_accessors, SharedAccessorKey, SharedTargetState, TransferElementID};
use crate::validity::DataValidity;
use crate::version::VersionNumber;

pub struct SubArrayAccessorDecorator<T> {
    id: TransferElementID,
    target: SharedAccessor<T>,
    shared: Arc<SharedTargetState>,
    path: String,
    offset: usize,
    length: usize,
    writeable: bool,
    buffer: Vec<Vec<T>>,
    version: VersionNumber,
    validity: DataValidity,
    /// The backend's `versionOnOpen` at construction time (spec §4.6):
    /// the read-remember-modify-write gate must re-arm whenever this
    /// changes, i.e. every time the device is reopened, rather than only
    /// once for the accessor's whole lifetime.
    version_on_open: VersionNumber,
    /// `Some(v)` once we have read-remembered the rest of the register
    /// while `version_on_open == v`; compared against `version_on_open`
    /// rather than latched permanently so a reopen (new `version_on_open`)
    /// forces a fresh remember-read.
    remembered_for: Option<VersionNumber>,
}

impl<T: Clone + Default + Send + 'static> SubArrayAccessorDecorator<T> {
    /// `backend_id` identifies the owning backend for the shared-state
    /// registry key (spec §3); two decorators windowing the same register
    /// from different backends must not share state.
    pub fn new(
        target: SharedAccessor<T>,
        backend_id: usize,
        path: impl Into<RegisterPath>,
        offset: usize,
        length: usize,
        writeable: bool,
        version_on_open: VersionNumber,
    ) -> LogicResult<Self> {
        let path = path.into();
        let n_samples = target.lock().n_samples();
        if offset + length > n_samples {
            return Err(LogicError::OutOfRange {
                path: path.to_string(),
                offset,
                length,
                size: n_samples,
            });
        }
        let key = SharedAccessorKey {
            backend_id,
            path: path.clone(),
        };
        let shared = shared_accessors().get_target_shared_state(key);
        Ok(SubArrayAccessorDecorator {
            id: TransferElementID::new(),
            target,
            shared,
            path: path.to_string(),
            offset,
            length,
            writeable,
            buffer: vec![vec![T::default(); length]],
            version: VersionNumber::new(),
            validity: DataValidity::Ok,
            version_on_open,
            remembered_for: None,
        })
    }
}

impl<T: Clone + Send + 'static> TransferElement for SubArrayAccessorDecorator<T> {
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
            self.buffer[0].clone_from_slice(&target.buffer()[0][self.offset..self.offset + self.length]);
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
        // Read-remember-modify-write (spec §4.6): the rest of the register's
        // words must come from somewhere, so make sure the shared target
        // reflects the current hardware state before overlaying our window --
        // once per device-open, not once ever, since a reopen invalidates
        // whatever was remembered under the previous `version_on_open`.
        if self.remembered_for != Some(self.version_on_open) {
            self.target.lock().read().map_err(|e| match e {
                crate::error::DeviceError::Logic { source } => source,
                crate::error::DeviceError::Runtime { .. } => LogicError::Unsupported {
                    reason: "could not read-remember before a SubArray write".into(),
                },
            })?;
            self.remembered_for = Some(self.version_on_open);
        }
        let mut target = self.target.lock();
        target.buffer_mut()[0][self.offset..self.offset + self.length].clone_from_slice(&self.buffer[0]);
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

impl<T: Clone + Send + 'static> NDRegisterAccessor<T> for SubArrayAccessorDecorator<T> {
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

    fn leaf(n_samples: usize) -> SharedAccessor<i32> {
        let storage = Arc::new(Mutex::new(RawStorage::new(1, n_samples)));
        RawRegisterAccessor::<i32>::new(
            storage,
            FixedPointConverter::new(32, 0, true),
            AccessModes::READ_WRITE,
            Arc::new(Mutex::new(None)),
        )
    }

    #[test]
    fn out_of_range_window_is_rejected() {
        let target = leaf(4);
        let result = SubArrayAccessorDecorator::<i32>::new(target, 1, "R", 2, 4, true, VersionNumber::new());
        assert!(matches!(result, Err(LogicError::OutOfRange { .. })));
    }

    #[test]
    fn two_windows_on_one_register_see_each_others_writes() {
        let target = leaf(4);
        let opened_at = VersionNumber::new();
        let mut low = SubArrayAccessorDecorator::<i32>::new(target.clone(), 1, "R", 0, 2, true, opened_at).unwrap();
        let mut high = SubArrayAccessorDecorator::<i32>::new(target, 1, "R", 2, 2, true, opened_at).unwrap();

        low.buffer_mut()[0] = vec![1, 2];
        low.write(VersionNumber::new()).unwrap();

        high.buffer_mut()[0] = vec![3, 4];
        high.write(VersionNumber::new()).unwrap();

        low.read().unwrap();
        assert_eq!(low.buffer()[0], vec![1, 2]);
        high.read().unwrap();
        assert_eq!(high.buffer()[0], vec![3, 4]);
    }

    /// Spec §8 property 6 / S2: a window write must read-remember the rest
    /// of the register again after every device reopen, not just once ever
    /// -- otherwise a value an external process wrote outside the window
    /// between opens gets clobbered by the stale remembered copy.
    #[test]
    fn window_write_rereads_the_rest_of_the_register_after_a_reopen() {
        let storage = Arc::new(Mutex::new(RawStorage::new(1, 4)));
        let target = RawRegisterAccessor::<i32>::new(
            storage.clone(),
            FixedPointConverter::new(32, 0, true),
            AccessModes::READ_WRITE,
            Arc::new(Mutex::new(None)),
        );

        let v1 = VersionNumber::new();
        let mut low = SubArrayAccessorDecorator::<i32>::new(target.clone(), 1, "R", 0, 2, true, v1).unwrap();
        low.buffer_mut()[0] = vec![1, 2];
        low.write(VersionNumber::new()).unwrap();
        assert_eq!(storage.lock().words[0], vec![1, 2, 0, 0]);

        // External write to the hardware outside the window, then the
        // device is closed and reopened -- a fresh `version_on_open`.
        storage.lock().words[0][2] = 49;
        storage.lock().words[0][3] = 50;
        let v2 = VersionNumber::new();
        let mut high = SubArrayAccessorDecorator::<i32>::new(target, 1, "R", 2, 2, true, v2).unwrap();

        high.buffer_mut()[0] = vec![7, 8];
        high.write(VersionNumber::new()).unwrap();

        // The new window's write must have read-remembered the reopened
        // register first, so words 0/1 survive untouched.
        assert_eq!(storage.lock().words[0], vec![1, 2, 7, 8]);
    }

    /// Within one device-open, the remember-read only needs to happen once
    /// -- a second write through the same window accessor must not re-read
    /// the target each time.
    #[test]
    fn window_write_only_remembers_once_per_open() {
        let storage = Arc::new(Mutex::new(RawStorage::new(1, 4)));
        let target = RawRegisterAccessor::<i32>::new(
            storage.clone(),
            FixedPointConverter::new(32, 0, true),
            AccessModes::READ_WRITE,
            Arc::new(Mutex::new(None)),
        );
        let opened_at = VersionNumber::new();
        let mut low = SubArrayAccessorDecorator::<i32>::new(target, 1, "R", 0, 2, true, opened_at).unwrap();

        low.buffer_mut()[0] = vec![1, 2];
        low.write(VersionNumber::new()).unwrap();
        let reads_after_first_write = storage.lock().read_count;
        assert_eq!(reads_after_first_write, 1);

        low.buffer_mut()[0] = vec![3, 4];
        low.write(VersionNumber::new()).unwrap();
        assert_eq!(
            storage.lock().read_count,
            reads_after_first_write,
            "a second write in the same open must not remember-read again"
        );
    }
}
