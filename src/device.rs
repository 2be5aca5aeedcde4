//! Device facade (spec §4.14), ground-truthed against
//! `examples/original_source/backends/Subdevice/src/SubdeviceBackend.cc`'s
//! CDD-parameter parsing and `examples/original_source/backends/SharedDummy/src/SharedDummyBackend.cc`'s
//! open/close lifecycle: the single entry point a client opens a CDD string
//! against. A `dyn Backend`
//! cannot expose a generic `get_accessor::<T>` (no generic trait methods,
//! per `backend::mod`'s doc comment), so `Device` holds its backend behind a
//! small closed [`BackendHandle`] enum and dispatches to whichever concrete
//! backend's own inherent `get_accessor` the CDD's `backend_type` names --
//! mirroring `machine/src/drivers.rs`'s `DriverManager` pattern at one level
//! up, the level that needs the concrete type back out again.
//!
//! Building a backend from a real register-map *file* is out of scope
//! (`SPEC_FULL.md` non-goals). In its place, four small process-wide
//! registries -- [`register_catalogue`], [`register_device_alias`],
//! [`register_lnm_map`], [`register_subdevice_spec`] -- let a test or an
//! application hand `Device::open` everything a real map-file parser would
//! otherwise have produced, keyed by the name carried in the CDD string, the
//! same registry idiom as [`crate::backend::backend_factory`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::accessor::sub_array::SubArrayAccessorDecorator;
use crate::accessor::{check_access_mode, share, SharedAccessor};
use crate::backend::dummy::DummyBackend;
use crate::backend::subdevice::{Handshake, SubRegisterSpec, SubdeviceBackend};
use crate::backend::{parse_cdd, Backend, DeviceDescriptor};
use crate::convert::numeric::Arithmetic;
use crate::error::{DeviceResult, LogicError, LogicResult, RuntimeError};
use crate::lnm::backend::LogicalNameMappingBackend;
use crate::lnm::{LogicalNameMap, RegisterKind};
use crate::register_info::{AccessModeFlags, RegisterCatalogue};
use crate::register_path::RegisterPath;
use crate::version::VersionNumber;

#[cfg(feature = "shared-dummy")]
use crate::backend::shared_dummy::SharedDummyBackend;
#[cfg(feature = "xdma")]
use crate::backend::xdma::XdmaBackend;

fn next_window_id() -> usize {
    static NEXT: AtomicUsize = AtomicUsize::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

fn unknown_register(path: &RegisterPath) -> LogicError {
    LogicError::UnknownRegister {
        path: path.to_string(),
    }
}

static CATALOGUES: Lazy<Mutex<HashMap<String, RegisterCatalogue>>> = Lazy::new(Default::default);
static DEVICE_ALIASES: Lazy<Mutex<HashMap<String, String>>> = Lazy::new(Default::default);
static LNM_MAPS: Lazy<Mutex<HashMap<String, LogicalNameMap>>> = Lazy::new(Default::default);
static SUBDEVICE_SPECS: Lazy<Mutex<HashMap<String, SubdeviceSpec>>> = Lazy::new(Default::default);

/// Register a [`RegisterCatalogue`] under `name`, for `(dummy?map=name)`,
/// `(sharedDummy:instance?map=name)`, `(xdma:/dev/...?map=name)` and
/// `(subdevice:name?map=name&...)` descriptors to pick up (spec §4.14's
/// map-file stand-in; see this module's doc comment).
pub fn register_catalogue(name: impl Into<String>, catalogue: RegisterCatalogue) {
    CATALOGUES.lock().insert(name.into(), catalogue);
}

fn lookup_catalogue(descriptor: &DeviceDescriptor) -> LogicResult<RegisterCatalogue> {
    let name = descriptor.parameter("map").unwrap_or(descriptor.address.as_str());
    CATALOGUES.lock().get(name).cloned().ok_or_else(|| LogicError::BadDescriptor {
        reason: format!("no register catalogue registered under '{name}'"),
    })
}

/// Register a resolution for one LNM `<targetDevice>` alias to a full CDD
/// string, e.g. `register_device_alias("board", "(dummy?map=board_cat)")`.
pub fn register_device_alias(alias: impl Into<String>, cdd: impl Into<String>) {
    DEVICE_ALIASES.lock().insert(alias.into(), cdd.into());
}

fn lookup_device_alias(alias: &str) -> LogicResult<String> {
    DEVICE_ALIASES.lock().get(alias).cloned().ok_or_else(|| LogicError::BadParameter {
        plugin: "LogicalNameMapping".into(),
        name: "targetDevice".into(),
        reason: format!("no device registered for alias '{alias}'"),
    })
}

/// Register a parsed [`LogicalNameMap`] under `name`, for
/// `(logicalNameMapper:name)` to pick up.
pub fn register_lnm_map(name: impl Into<String>, map: LogicalNameMap) {
    LNM_MAPS.lock().insert(name.into(), map);
}

fn lookup_lnm_map(name: &str) -> LogicResult<LogicalNameMap> {
    LNM_MAPS.lock().get(name).cloned().ok_or_else(|| LogicError::BadDescriptor {
        reason: format!("no logical name map registered under '{name}'"),
    })
}

/// `SubdeviceBackend`'s construction parameters, registered under a name for
/// `(subdevice:name?...)` to pick up -- the `area`/`areaHandshake` layout a
/// real map file would otherwise carry (spec §4.13).
#[derive(Debug, Clone)]
pub struct SubdeviceSpec {
    pub subdevice_type: String,
    pub target_area: RegisterPath,
    pub sub_registers: HashMap<RegisterPath, SubRegisterSpec>,
    pub handshake: Option<Handshake>,
}

pub fn register_subdevice_spec(name: impl Into<String>, spec: SubdeviceSpec) {
    SUBDEVICE_SPECS.lock().insert(name.into(), spec);
}

fn lookup_subdevice_spec(name: &str) -> LogicResult<SubdeviceSpec> {
    SUBDEVICE_SPECS.lock().get(name).cloned().ok_or_else(|| LogicError::BadDescriptor {
        reason: format!("no subdevice spec registered under '{name}'"),
    })
}

/// The concrete backend behind a [`Device`] (spec §4.14's "small closed
/// enum"). Never exposed to callers -- every operation they need goes
/// through `Device`'s own methods.
enum BackendHandle {
    Dummy(Arc<Mutex<DummyBackend>>),
    #[cfg(feature = "shared-dummy")]
    SharedDummy(Arc<Mutex<SharedDummyBackend>>),
    #[cfg(feature = "xdma")]
    Xdma(Arc<Mutex<XdmaBackend>>),
    Subdevice(Arc<Mutex<SubdeviceBackend>>),
    LogicalNameMapping(Arc<Mutex<LogicalNameMappingBackend>>),
}

impl BackendHandle {
    /// Erase to the object-safe half, for handing this backend to another
    /// one as a cross-backend redirect target (spec §4.13/§4.8).
    fn as_dyn(&self) -> Arc<Mutex<dyn Backend>> {
        match self {
            BackendHandle::Dummy(b) => b.clone(),
            #[cfg(feature = "shared-dummy")]
            BackendHandle::SharedDummy(b) => b.clone(),
            #[cfg(feature = "xdma")]
            BackendHandle::Xdma(b) => b.clone(),
            BackendHandle::Subdevice(b) => b.clone(),
            BackendHandle::LogicalNameMapping(b) => b.clone(),
        }
    }

    fn catalogue(&self) -> RegisterCatalogue {
        match self {
            BackendHandle::Dummy(b) => b.lock().catalogue().clone(),
            #[cfg(feature = "shared-dummy")]
            BackendHandle::SharedDummy(b) => b.lock().catalogue().clone(),
            #[cfg(feature = "xdma")]
            BackendHandle::Xdma(b) => b.lock().catalogue().clone(),
            BackendHandle::Subdevice(b) => b.lock().catalogue().clone(),
            BackendHandle::LogicalNameMapping(b) => b.lock().catalogue().clone(),
        }
    }

    fn close(&self) -> Result<(), RuntimeError> {
        match self {
            BackendHandle::Dummy(b) => b.lock().close(),
            #[cfg(feature = "shared-dummy")]
            BackendHandle::SharedDummy(b) => b.lock().close(),
            #[cfg(feature = "xdma")]
            BackendHandle::Xdma(b) => b.lock().close(),
            BackendHandle::Subdevice(b) => b.lock().close(),
            BackendHandle::LogicalNameMapping(b) => b.lock().close(),
        }
    }

    fn is_open(&self) -> bool {
        match self {
            BackendHandle::Dummy(b) => b.lock().is_open(),
            #[cfg(feature = "shared-dummy")]
            BackendHandle::SharedDummy(b) => b.lock().is_open(),
            #[cfg(feature = "xdma")]
            BackendHandle::Xdma(b) => b.lock().is_open(),
            BackendHandle::Subdevice(b) => b.lock().is_open(),
            BackendHandle::LogicalNameMapping(b) => b.lock().is_open(),
        }
    }

    fn set_exception(&self, error: RuntimeError) {
        match self {
            BackendHandle::Dummy(b) => b.lock().set_exception(error),
            #[cfg(feature = "shared-dummy")]
            BackendHandle::SharedDummy(b) => b.lock().set_exception(error),
            #[cfg(feature = "xdma")]
            BackendHandle::Xdma(b) => b.lock().set_exception(error),
            BackendHandle::Subdevice(b) => b.lock().set_exception(error),
            BackendHandle::LogicalNameMapping(b) => b.lock().set_exception(error),
        }
    }

    fn active_exception(&self) -> Option<RuntimeError> {
        match self {
            BackendHandle::Dummy(b) => b.lock().active_exception(),
            #[cfg(feature = "shared-dummy")]
            BackendHandle::SharedDummy(b) => b.lock().active_exception(),
            #[cfg(feature = "xdma")]
            BackendHandle::Xdma(b) => b.lock().active_exception(),
            BackendHandle::Subdevice(b) => b.lock().active_exception(),
            BackendHandle::LogicalNameMapping(b) => b.lock().active_exception(),
        }
    }

    /// Only [`BackendHandle::LogicalNameMapping`] knows how to turn
    /// `wait_for_new_data` into a push subscription generically (its
    /// `Domain`s are keyed by register path); every other backend keeps that
    /// as a manual `interrupt_domain`/`trigger_interrupt` affair (spec §4.11
    /// vs §4.12's split).
    fn supports_automatic_push(&self) -> bool {
        matches!(self, BackendHandle::LogicalNameMapping(_))
    }
}

/// A single opened device (spec §4.14): owns one backend, reached through a
/// CDD string, and hands out typed accessors for registers in its
/// catalogue.
pub struct Device {
    descriptor: String,
    window_id: usize,
    version_on_open: VersionNumber,
    backend: BackendHandle,
}

impl Device {
    /// Parse `descriptor` as a CDD and construct+open the backend it names.
    /// Recurses for `subdevice`'s `target` parameter and for every distinct
    /// `<targetDevice>` alias a `logicalNameMapper`'s map refers to.
    pub fn open(descriptor: &str) -> DeviceResult<Device> {
        let parsed = parse_cdd(descriptor)?;
        let backend = Self::build_backend(&parsed)?;
        Ok(Device {
            descriptor: descriptor.to_string(),
            window_id: next_window_id(),
            version_on_open: VersionNumber::new(),
            backend,
        })
    }

    fn build_backend(descriptor: &DeviceDescriptor) -> DeviceResult<BackendHandle> {
        match descriptor.backend_type.as_str() {
            "dummy" => {
                let catalogue = lookup_catalogue(descriptor)?;
                let mut backend = DummyBackend::new(catalogue);
                backend.open()?;
                Ok(BackendHandle::Dummy(Arc::new(Mutex::new(backend))))
            }
            "sharedDummy" => build_shared_dummy(descriptor),
            "xdma" => build_xdma(descriptor),
            "subdevice" => build_subdevice(descriptor),
            "logicalNameMapper" => build_lnm(descriptor),
            other => Err(LogicError::UnknownPlugin {
                path: descriptor.address.clone(),
                name: other.to_string(),
            }
            .into()),
        }
    }

    pub fn close(&self) -> DeviceResult<()> {
        Ok(self.backend.close()?)
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_open()
    }

    pub fn get_register_catalogue(&self) -> RegisterCatalogue {
        self.backend.catalogue()
    }

    pub fn set_exception(&self, message: impl Into<String>) {
        self.backend.set_exception(RuntimeError::generic(message.into()));
    }

    pub fn active_exception(&self) -> Option<RuntimeError> {
        self.backend.active_exception()
    }

    /// The CDD string this device was opened from, for diagnostics/logging.
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Build a typed accessor for `path` (spec §4.14). `n_elements == 0`
    /// means "everything from `offset` to the end of the register", the same
    /// `numberOfWords`/`wordOffsetInRegister` convention
    /// `examples/original_source/backends/Subdevice/src/SubdeviceBackend.cc`'s
    /// sub-register windowing uses.
    ///
    /// `offset`/`n_elements` windowing is applied here, uniformly across
    /// every backend, via [`SubArrayAccessorDecorator`] -- only
    /// [`crate::lnm::backend::LogicalNameMappingBackend`]'s `Register` kind
    /// also windows internally (against its *target*'s register, a
    /// different axis entirely), so the two windowing layers never conflict.
    pub fn get_accessor<T>(
        &self,
        path: impl Into<RegisterPath>,
        n_elements: usize,
        offset: usize,
        flags: AccessModeFlags,
    ) -> DeviceResult<SharedAccessor<T>>
    where
        T: Arithmetic + Default + Send + 'static,
    {
        let path = path.into();
        let catalogue = self.backend.catalogue();
        let info = catalogue.get(&path).ok_or_else(|| unknown_register(&path))?;
        check_access_mode(path.as_str(), flags, info.supported_flags)?;

        if flags.contains(AccessModeFlags::WAIT_FOR_NEW_DATA) && !self.backend.supports_automatic_push() {
            return Err(LogicError::UnsupportedAccessMode {
                path: path.to_string(),
                flag: "wait_for_new_data",
            }
            .into());
        }

        let full_length = info.n_elements;
        let length = if n_elements == 0 { full_length.saturating_sub(offset) } else { n_elements };
        if offset + length > full_length {
            return Err(LogicError::OutOfRange {
                path: path.to_string(),
                offset,
                length,
                size: full_length,
            }
            .into());
        }

        let accessor: SharedAccessor<T> = match &self.backend {
            BackendHandle::LogicalNameMapping(b) => b.lock().get_accessor::<T>(&path, flags)?,
            BackendHandle::Dummy(b) => b.lock().get_accessor::<T>(&path)?,
            #[cfg(feature = "shared-dummy")]
            BackendHandle::SharedDummy(b) => b.lock().get_accessor::<T>(&path)?,
            #[cfg(feature = "xdma")]
            BackendHandle::Xdma(b) => b.lock().get_accessor::<T>(&path)?,
            BackendHandle::Subdevice(b) => b.lock().get_accessor::<T>(&path)?,
        };

        if offset == 0 && length == full_length {
            Ok(accessor)
        } else {
            Ok(share(SubArrayAccessorDecorator::<T>::new(
                accessor,
                self.window_id,
                path,
                offset,
                length,
                info.access.writeable,
                self.version_on_open,
            )?))
        }
    }
}

#[cfg(feature = "shared-dummy")]
fn build_shared_dummy(descriptor: &DeviceDescriptor) -> DeviceResult<BackendHandle> {
    if descriptor.address.is_empty() {
        return Err(LogicError::BadDescriptor {
            reason: "sharedDummy requires an instance id as the CDD address".into(),
        }
        .into());
    }
    let catalogue = lookup_catalogue(descriptor)?;
    let mut backend = SharedDummyBackend::new(catalogue, descriptor.address.clone())?;
    backend.open()?;
    Ok(BackendHandle::SharedDummy(Arc::new(Mutex::new(backend))))
}

#[cfg(not(feature = "shared-dummy"))]
fn build_shared_dummy(descriptor: &DeviceDescriptor) -> DeviceResult<BackendHandle> {
    Err(LogicError::UnknownPlugin {
        path: descriptor.address.clone(),
        name: "sharedDummy".into(),
    }
    .into())
}

#[cfg(feature = "xdma")]
fn build_xdma(descriptor: &DeviceDescriptor) -> DeviceResult<BackendHandle> {
    if descriptor.address.is_empty() {
        return Err(LogicError::BadDescriptor {
            reason: "xdma requires a device file path as the CDD address".into(),
        }
        .into());
    }
    let catalogue = lookup_catalogue(descriptor)?;
    let mut backend = XdmaBackend::new(catalogue, descriptor.address.clone())?;
    backend.open()?;
    Ok(BackendHandle::Xdma(Arc::new(Mutex::new(backend))))
}

#[cfg(not(feature = "xdma"))]
fn build_xdma(descriptor: &DeviceDescriptor) -> DeviceResult<BackendHandle> {
    Err(LogicError::UnknownPlugin {
        path: descriptor.address.clone(),
        name: "xdma".into(),
    }
    .into())
}

fn build_subdevice(descriptor: &DeviceDescriptor) -> DeviceResult<BackendHandle> {
    let catalogue = lookup_catalogue(descriptor)?;
    let spec_name = descriptor.parameter("spec").unwrap_or(descriptor.address.as_str());
    let spec = lookup_subdevice_spec(spec_name)?;
    SubdeviceBackend::reject_unsupported_type(&spec.subdevice_type)?;

    let target_cdd = descriptor.parameter("target").ok_or_else(|| LogicError::BadParameter {
        plugin: "subdevice".into(),
        name: "target".into(),
        reason: "missing target device descriptor".into(),
    })?;
    let target = Device::open(target_cdd)?;

    let mut backend = SubdeviceBackend::new(catalogue, target.backend.as_dyn(), spec.target_area, spec.sub_registers, spec.handshake);
    backend.open()?;
    Ok(BackendHandle::Subdevice(Arc::new(Mutex::new(backend))))
}

fn build_lnm(descriptor: &DeviceDescriptor) -> DeviceResult<BackendHandle> {
    let map = lookup_lnm_map(&descriptor.address)?;

    let mut aliases: Vec<String> = Vec::new();
    for register in map.iter() {
        let alias = match &register.kind {
            RegisterKind::Register { target_device, .. }
            | RegisterKind::Channel { target_device, .. }
            | RegisterKind::Bit { target_device, .. } => Some(target_device.clone()),
            RegisterKind::Constant { .. } | RegisterKind::Variable { .. } => None,
        };
        if let Some(alias) = alias {
            if !aliases.contains(&alias) {
                aliases.push(alias);
            }
        }
    }

    let mut targets = HashMap::new();
    for alias in aliases {
        let cdd = lookup_device_alias(&alias)?;
        let device = Device::open(&cdd)?;
        targets.insert(alias, device.backend.as_dyn());
    }

    let mut backend = LogicalNameMappingBackend::new(map, targets)?;
    backend.open()?;
    Ok(BackendHandle::LogicalNameMapping(Arc::new(Mutex::new(backend))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register_info::{AccessModes, DataDescriptor, RegisterInfo, TargetInfo};
    use crate::version::VersionNumber;

    fn word_catalogue(path: &str, n_elements: usize) -> RegisterCatalogue {
        let mut cat = RegisterCatalogue::new();
        cat.insert(RegisterInfo {
            path: RegisterPath::new(path),
            n_elements,
            n_channels: 1,
            dimensions: vec![n_elements],
            access: AccessModes::READ_WRITE,
            supported_flags: AccessModeFlags::empty(),
            data_descriptor: DataDescriptor::numeric_integer(32, true),
            target: TargetInfo::NumericAddressed {
                bar: 0,
                address: 0,
                width_bits: 32,
                fractional_bits: 0,
            },
        });
        cat
    }

    #[test]
    fn dummy_descriptor_opens_via_registered_catalogue() {
        register_catalogue("device_test_dummy_cat", word_catalogue("BOARD/WORD", 4));
        let device = Device::open("(dummy?map=device_test_dummy_cat)").unwrap();
        assert!(device.is_open());

        let acc = device
            .get_accessor::<i32>(RegisterPath::new("BOARD/WORD"), 0, 0, AccessModeFlags::empty())
            .unwrap();
        acc.lock().buffer_mut()[0][0] = 42;
        acc.lock().write(VersionNumber::new()).unwrap();

        let other = device
            .get_accessor::<i32>(RegisterPath::new("BOARD/WORD"), 0, 0, AccessModeFlags::empty())
            .unwrap();
        other.lock().read().unwrap();
        assert_eq!(other.lock().buffer()[0][0], 42);
    }

    #[test]
    fn windowed_accessor_only_sees_its_slice() {
        register_catalogue("device_test_window_cat", word_catalogue("BOARD/ARRAY", 4));
        let device = Device::open("(dummy?map=device_test_window_cat)").unwrap();

        let full = device
            .get_accessor::<i32>(RegisterPath::new("BOARD/ARRAY"), 0, 0, AccessModeFlags::empty())
            .unwrap();
        full.lock().buffer_mut()[0] = vec![1, 2, 3, 4];
        full.lock().write(VersionNumber::new()).unwrap();

        let window = device
            .get_accessor::<i32>(RegisterPath::new("BOARD/ARRAY"), 2, 1, AccessModeFlags::empty())
            .unwrap();
        window.lock().read().unwrap();
        assert_eq!(window.lock().buffer()[0], vec![2, 3]);
    }

    #[test]
    fn subdevice_descriptor_resolves_through_its_target() {
        register_catalogue("device_test_subdevice_target_cat", word_catalogue("BOARD/AREA", 4));
        register_catalogue(
            "device_test_subdevice_sub_cat",
            {
                let mut cat = RegisterCatalogue::new();
                cat.insert(RegisterInfo {
                    path: RegisterPath::new("SUB0"),
                    n_elements: 1,
                    n_channels: 1,
                    dimensions: vec![1],
                    access: AccessModes::READ_WRITE,
                    supported_flags: AccessModeFlags::empty(),
                    data_descriptor: DataDescriptor::numeric_integer(16, true),
                    target: TargetInfo::LogicalName,
                });
                cat
            },
        );
        let mut sub_registers = HashMap::new();
        sub_registers.insert(
            RegisterPath::new("SUB0"),
            SubRegisterSpec {
                offset: 1,
                length: 1,
                width_bits: 16,
                fractional_bits: 0,
                signed: true,
            },
        );
        register_subdevice_spec(
            "device_test_subdevice_spec",
            SubdeviceSpec {
                subdevice_type: "area".into(),
                target_area: RegisterPath::new("BOARD/AREA"),
                sub_registers,
                handshake: None,
            },
        );

        let device = Device::open(
            "(subdevice:device_test_subdevice_spec?map=device_test_subdevice_sub_cat&target=(dummy?map=device_test_subdevice_target_cat))",
        )
        .unwrap();

        let acc = device
            .get_accessor::<i32>(RegisterPath::new("SUB0"), 0, 0, AccessModeFlags::empty())
            .unwrap();
        acc.lock().buffer_mut()[0][0] = 11;
        acc.lock().write(VersionNumber::new()).unwrap();
        acc.lock().buffer_mut()[0][0] = 0;
        acc.lock().read().unwrap();
        assert_eq!(acc.lock().buffer()[0][0], 11);
    }

    #[test]
    fn logical_name_mapper_resolves_redirects_through_registered_aliases() {
        register_catalogue("device_test_lnm_board_cat", word_catalogue("WORD", 4));
        register_device_alias("board", "(dummy?map=device_test_lnm_board_cat)");
        register_lnm_map(
            "device_test_lnm_map",
            LogicalNameMap {
                registers: vec![crate::lnm::LogicalRegister {
                    path: RegisterPath::new("MY_WORD"),
                    kind: RegisterKind::Register {
                        target_device: "board".into(),
                        target_register: RegisterPath::new("WORD"),
                        target_start_index: 0,
                        number_of_elements: None,
                    },
                    plugins: vec![],
                    writeable: true,
                }],
            },
        );

        let device = Device::open("(logicalNameMapper:device_test_lnm_map)").unwrap();
        let acc = device
            .get_accessor::<i32>(RegisterPath::new("MY_WORD"), 0, 0, AccessModeFlags::empty())
            .unwrap();
        acc.lock().buffer_mut()[0][0] = 5;
        acc.lock().write(VersionNumber::new()).unwrap();

        let other = device
            .get_accessor::<i32>(RegisterPath::new("MY_WORD"), 0, 0, AccessModeFlags::empty())
            .unwrap();
        other.lock().read().unwrap();
        assert_eq!(other.lock().buffer()[0][0], 5);
    }

    #[test]
    fn unknown_backend_type_is_rejected() {
        assert!(Device::open("(nosuchbackend)").is_err());
    }

    #[test]
    fn descriptor_is_retained_for_diagnostics() {
        register_catalogue("device_test_descriptor_cat", word_catalogue("WORD", 1));
        let device = Device::open("(dummy?map=device_test_descriptor_cat)").unwrap();
        assert_eq!(device.descriptor, "(dummy?map=device_test_descriptor_cat)");
    }
}
