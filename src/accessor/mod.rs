//! The accessor/transfer framework (spec §4.1, §4.2): every accessor, from
//! a raw backend register to the outermost decorator a client holds,
//! implements the same split `preXxx / xxxTransfer / postXxx` lifecycle.

pub mod bit;
pub mod bit_range;
pub mod channel;
pub mod decorator;
pub mod double_buffer;
pub mod fan_out;
pub mod fixed_point;
pub mod force_polling_read;
pub mod force_read_only;
pub mod leaf;
pub mod math;
pub mod monostable;
pub mod multiplier;
pub mod push;
pub mod sub_array;
pub mod variable;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{LogicError, LogicResult, RuntimeError, RuntimeResult};
use crate::register_info::AccessModeFlags;
use crate::shared_state::TransferElementID;
use crate::validity::DataValidity;
use crate::version::VersionNumber;

/// Which phase of the protocol a call belongs to; most decorators only care
/// about the access-mode flags carried alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferType {
    pub flags: AccessModeFlags,
}

impl TransferType {
    pub fn new(flags: AccessModeFlags) -> Self {
        TransferType { flags }
    }

    pub fn wants(&self, flag: AccessModeFlags) -> bool {
        self.flags.contains(flag)
    }
}

/// A handle to a hardware-accessing (leaf) element, shared across every
/// decorator whose chain bottoms out at the same physical register. Used by
/// [`crate::transfer_group::TransferGroup`] to collapse N high-level
/// accessors sharing one target into a single physical transfer (spec
/// §4.10).
pub type SharedElement = Arc<Mutex<dyn TransferElement + Send>>;

/// A decorator's handle to its direct target (spec §4.2): `Arc` rather than
/// `Box` because the same concrete accessor is shared with the
/// [`crate::shared_state::SharedAccessors`] registry and may be handed to a
/// second decorator chain built on the same register, or spliced into a
/// [`crate::transfer_group::TransferGroup`]'s merged low-level set -- not
/// because one accessor handle is meant to be used from multiple threads at
/// once (spec §1's non-goal still holds for a single handle).
pub type SharedAccessor<T> = Arc<Mutex<dyn NDRegisterAccessor<T> + Send>>;

/// Wrap an owned, concrete accessor behind the shared handle type decorators
/// expect. A thin helper so call sites don't need to spell out the unsizing
/// coercion themselves.
pub fn share<T, A>(accessor: A) -> SharedAccessor<T>
where
    A: NDRegisterAccessor<T> + Send + 'static,
{
    Arc::new(Mutex::new(accessor))
}

/// Like [`share`], but erases all the way down to [`SharedElement`] --
/// for handing a concrete accessor to a [`crate::transfer_group::TransferGroup`],
/// which only needs the non-generic half of the interface. Trait-object
/// upcasting (`dyn NDRegisterAccessor<T>` to `dyn TransferElement`) is not
/// something stable Rust allows, so this coerces straight from the
/// concrete, not-yet-erased accessor, same as `share` does.
pub fn share_element<A>(accessor: A) -> SharedElement
where
    A: TransferElement + 'static,
{
    Arc::new(Mutex::new(accessor))
}

/// Non-generic half of the accessor interface: the part a [`TransferGroup`]
/// needs without knowing the concrete `UserType`. Every `NDRegisterAccessor<T>`
/// is also a `TransferElement`.
///
/// [`TransferGroup`]: crate::transfer_group::TransferGroup
pub trait TransferElement: Send {
    fn id(&self) -> TransferElementID;

    /// May throw [`LogicError`] (permanent caller bug); must never throw a
    /// runtime error once a transfer has started somewhere in the stack.
    fn pre_read(&mut self, transfer: TransferType) -> LogicResult<()>;

    /// Hits hardware exactly once per target; never throws to the caller --
    /// on failure it records into `active_exception` instead and returns
    /// `Err` only to signal "do not proceed to the next phase normally"
    /// internally. Returns whether new data arrived.
    fn do_read_transfer(&mut self) -> RuntimeResult<bool>;

    /// Always runs if `pre_read` ran, even on error. `has_new_data == false`
    /// must leave the user buffer and version unchanged.
    fn post_read(&mut self, transfer: TransferType, has_new_data: bool) -> RuntimeResult<()>;

    fn pre_write(&mut self, transfer: TransferType, version: VersionNumber) -> LogicResult<()>;

    /// Returns the `dataLost` flag.
    fn do_write_transfer(&mut self, version: VersionNumber) -> RuntimeResult<bool>;

    fn post_write(&mut self, transfer: TransferType, version: VersionNumber) -> RuntimeResult<()>;

    fn is_readable(&self) -> bool;
    fn is_writeable(&self) -> bool;
    fn supports_wait_for_new_data(&self) -> bool;

    fn version(&self) -> VersionNumber;
    fn validity(&self) -> DataValidity;

    /// The set of physical, hardware-touching elements this accessor
    /// ultimately forwards to. A leaf accessor returns a handle to itself;
    /// a decorator forwards to its target's set unchanged.
    fn hardware_accessing_elements(&self) -> Vec<SharedElement>;

    /// True for elements whose `post_read` must run in `TransferGroup`'s
    /// deferred second phase (spec §4.10) -- decorators that swap a shared
    /// buffer back out, e.g. [`crate::accessor::sub_array`].
    fn is_copy_decorator(&self) -> bool {
        false
    }

    /// Offer this element the chance to subsume `other`'s low-level target,
    /// collapsing two high-level accessors that ultimately hit the same
    /// hardware register into a single physical transfer (spec §4.10).
    /// Returns `true` if the replacement happened.
    fn may_replace_other(&self, _other: &dyn TransferElement) -> bool {
        false
    }

    /// Unblock a pending `wait_for_new_data` read without new data having
    /// arrived (spec §5's `interrupt()`). A no-op for every element that
    /// does not support `wait_for_new_data`; overridden by
    /// [`crate::accessor::push::PushAccessorDecorator`].
    fn interrupt(&mut self) {}
}

/// Full, typed accessor interface a client holds (spec §3, §4.1): owns a
/// 2-D user buffer (channels x samples), current validity and version, and
/// the active-exception slot.
pub trait NDRegisterAccessor<T>: TransferElement {
    fn buffer(&self) -> &[Vec<T>];
    fn buffer_mut(&mut self) -> &mut Vec<Vec<T>>;

    fn n_channels(&self) -> usize {
        self.buffer().len()
    }

    fn n_samples(&self) -> usize {
        self.buffer().first().map_or(0, |c| c.len())
    }

    /// Convenience: `preRead(); doReadTransfer(); postRead()`.
    fn read(&mut self) -> Result<(), crate::error::DeviceError> {
        self.read_with_flags(TransferType::new(AccessModeFlags::empty()))
    }

    fn read_with_flags(&mut self, transfer: TransferType) -> Result<(), crate::error::DeviceError> {
        self.pre_read(transfer)?;
        let outcome = self.do_read_transfer();
        let has_new_data = match &outcome {
            Ok(v) => *v,
            Err(_) => false,
        };
        let post = self.post_read(transfer, has_new_data);
        match outcome {
            Err(e) => {
                post.ok();
                Err(e.into())
            }
            Ok(_) => Ok(post?),
        }
    }

    /// Convenience: `preWrite(v); doWriteTransfer(v); postWrite(v)`. Returns
    /// the `dataLost` flag.
    fn write(&mut self, version: VersionNumber) -> Result<bool, crate::error::DeviceError> {
        self.write_with_flags(TransferType::new(AccessModeFlags::empty()), version)
    }

    fn write_with_flags(
        &mut self,
        transfer: TransferType,
        version: VersionNumber,
    ) -> Result<bool, crate::error::DeviceError> {
        self.pre_write(transfer, version)?;
        let outcome = self.do_write_transfer(version);
        let post = self.post_write(transfer, version);
        match outcome {
            Err(e) => {
                post.ok();
                Err(e.into())
            }
            Ok(data_lost) => {
                post?;
                Ok(data_lost)
            }
        }
    }
}

/// Records a runtime error into the active-exception slot rather than
/// propagating it -- the `handleTransferException` helper of spec §7.
pub fn handle_transfer_exception<T>(
    result: Result<T, RuntimeError>,
    slot: &mut Option<RuntimeError>,
) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(error = %e, "transfer failed, captured into activeException");
            *slot = Some(e);
            None
        }
    }
}

/// `logic_error` is raised when a requested access mode is not in
/// `supported`.
pub fn check_access_mode(
    path: &str,
    requested: AccessModeFlags,
    supported: AccessModeFlags,
) -> LogicResult<()> {
    let unsupported = requested & !supported;
    if !unsupported.is_empty() {
        let flag = if unsupported.contains(AccessModeFlags::WAIT_FOR_NEW_DATA) {
            "wait_for_new_data"
        } else {
            "raw"
        };
        return Err(LogicError::UnsupportedAccessMode {
            path: path.to_string(),
            flag,
        });
    }
    Ok(())
}
