//! `LogicalNameMappingBackend` (spec §4.8/§4.14), ground-truthed against
//! `examples/original_source/device_backends/LogicalNameMapping/src/LogicalNameMappingBackend.cc`:
//! wires a parsed [`crate::lnm::LogicalNameMap`] into a live accessor chain
//! against whatever real backends its `<targetDevice>` aliases name, the
//! same way [`crate::backend::subdevice::SubdeviceBackend`] wires its
//! sub-registers against one target via [`Backend::raw_u64_accessor`] --
//! this backend just has several named targets instead of one, and five
//! target shapes instead of a single `area` window.
//!
//! Every accessor chain stays typed at the caller's `UserType` throughout:
//! crossing into a target backend happens once, at the register/channel/bit
//! boundary, via [`Backend::cooked_f64_accessor`]/[`Backend::raw_u64_accessor`]
//! immediately followed by a [`ForwardingDecorator`] back to `UserType` --
//! every plugin on top of that (`Multiplier`, `Math`, `FanOut`, ...) is
//! already generic over `UserType` and needs no further crossing.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::accessor::bit::BitAccessorDecorator;
use crate::accessor::channel::ChannelAccessorDecorator;
use crate::accessor::decorator::ForwardingDecorator;
use crate::accessor::double_buffer::DoubleBufferAccessorDecorator;
use crate::accessor::fan_out::FanOutDecorator;
use crate::accessor::force_polling_read::ForcePollingReadDecorator;
use crate::accessor::force_read_only::ForceReadOnlyDecorator;
use crate::accessor::math::MathDecorator;
use crate::accessor::monostable::MonostableTriggerDecorator;
use crate::accessor::multiplier::MultiplierDecorator;
use crate::accessor::push::PushAccessorDecorator;
use crate::accessor::variable::{ValueTable, VariableAccessorDecorator};
use crate::accessor::{check_access_mode, share, NDRegisterAccessor, SharedAccessor, SharedElement, TransferElement, TransferType};
use crate::async_domain::Domain;
use crate::backend::Backend;
use crate::convert::numeric::{convert, Arithmetic};
use crate::error::{LogicError, LogicResult, RuntimeError, RuntimeResult};
use crate::lnm::{LnmValueType, LogicalNameMap, PluginSpec, RegisterKind};
use crate::register_info::{AccessModeFlags, AccessModes, DataDescriptor, FundamentalType, RegisterCatalogue, RegisterInfo, TargetInfo};
use crate::register_path::RegisterPath;
use crate::shared_state::TransferElementID;
use crate::validity::DataValidity;
use crate::version::VersionNumber;

fn unknown_register(path: &RegisterPath) -> LogicError {
    LogicError::UnknownRegister {
        path: path.to_string(),
    }
}

fn next_backend_id() -> usize {
    static NEXT: AtomicUsize = AtomicUsize::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

fn value_type_descriptor(value_type: LnmValueType) -> DataDescriptor {
    match value_type {
        LnmValueType::Integer => DataDescriptor::numeric_integer(32, true),
        LnmValueType::FloatingPoint => DataDescriptor::numeric_fractional(32, 16, true),
        LnmValueType::Boolean => DataDescriptor::boolean(),
    }
}

fn apply_type_hint(descriptor: &mut DataDescriptor, value_type: LnmValueType) {
    *descriptor = match value_type {
        LnmValueType::Boolean => DataDescriptor {
            fundamental_type: FundamentalType::Boolean,
            ..value_type_descriptor(value_type)
        },
        other => value_type_descriptor(other),
    };
}

/// One VARIABLE register's shared backing store: the typed value table
/// behind `Any` (only one `UserType` may ever be used for a given path,
/// same rule as [`crate::shared_state::SharedTargetState`]) plus the
/// [`Domain`] every writeable instance notifies and every
/// `wait_for_new_data` reader subscribes to.
struct VariableState {
    table: Box<dyn Any + Send>,
    domain: Arc<Domain>,
}

pub struct LogicalNameMappingBackend {
    backend_id: usize,
    catalogue: RegisterCatalogue,
    map: LogicalNameMap,
    targets: HashMap<String, Arc<Mutex<dyn Backend>>>,
    variables: Mutex<HashMap<RegisterPath, VariableState>>,
    double_buffer_readers: Mutex<HashMap<RegisterPath, Arc<AtomicU32>>>,
    opened: bool,
    version_on_open: Mutex<VersionNumber>,
    exception: Arc<Mutex<Option<RuntimeError>>>,
}

impl LogicalNameMappingBackend {
    /// `targets` resolves every distinct `<targetDevice>` alias the map
    /// refers to; building it (via CDD lookups through
    /// [`crate::backend::backend_factory`]) is [`crate::device::Device`]'s
    /// job, not this backend's, matching the object-safe/generic split
    /// documented on [`crate::backend::Backend`].
    pub fn new(map: LogicalNameMap, targets: HashMap<String, Arc<Mutex<dyn Backend>>>) -> LogicResult<Self> {
        let catalogue = build_catalogue(&map, &targets)?;
        Ok(LogicalNameMappingBackend {
            backend_id: next_backend_id(),
            catalogue,
            map,
            targets,
            variables: Mutex::new(HashMap::new()),
            double_buffer_readers: Mutex::new(HashMap::new()),
            opened: false,
            version_on_open: Mutex::new(VersionNumber::new()),
            exception: Arc::new(Mutex::new(None)),
        })
    }

    fn target(&self, alias: &str) -> LogicResult<&Arc<Mutex<dyn Backend>>> {
        self.targets.get(alias).ok_or_else(|| LogicError::BadParameter {
            plugin: "LogicalNameMapping".into(),
            name: "targetDevice".into(),
            reason: format!("no target device registered for alias '{alias}'"),
        })
    }

    fn variable_table_and_domain<T>(
        &self,
        path: &RegisterPath,
        values: &[f64],
    ) -> LogicResult<(Arc<Mutex<ValueTable<T>>>, Arc<Domain>)>
    where
        T: Arithmetic + Default + Send + 'static,
    {
        let mut variables = self.variables.lock();
        let state = variables.entry(path.clone()).or_insert_with(|| VariableState {
            table: Box::new(ValueTable::<T>::new(values.iter().map(|v| convert::<T, f64>(*v)).collect())),
            domain: Arc::new(Domain::new()),
        });
        let table = state
            .table
            .downcast_ref::<Arc<Mutex<ValueTable<T>>>>()
            .ok_or_else(|| LogicError::TypeMismatch { path: path.to_string() })?
            .clone();
        Ok((table, state.domain.clone()))
    }

    fn double_buffer_reader_count(&self, path: &RegisterPath) -> Arc<AtomicU32> {
        self.double_buffer_readers
            .lock()
            .entry(path.clone())
            .or_insert_with(|| Arc::new(AtomicU32::new(0)))
            .clone()
    }

    /// Build a typed accessor chain for `path` (spec §4.14's `get_accessor`).
    /// `flags` is accepted directly here, unlike the other concrete
    /// backends' `get_accessor`, because only this backend owns the
    /// [`Domain`] a `wait_for_new_data` subscription on a VARIABLE needs --
    /// [`crate::device::Device`] dispatches to whichever shape a given
    /// concrete backend's inherent method happens to have.
    pub fn get_accessor<T>(&self, path: &RegisterPath, flags: AccessModeFlags) -> LogicResult<SharedAccessor<T>>
    where
        T: Arithmetic + Default + Send + 'static,
    {
        let register = self.map.get(path).ok_or_else(|| unknown_register(path))?;
        let info = self.catalogue.get(path).ok_or_else(|| unknown_register(path))?;
        check_access_mode(path.as_str(), flags, info.supported_flags)?;

        let mut push_domain: Option<Arc<Domain>> = None;

        let mut acc: SharedAccessor<T> = match &register.kind {
            RegisterKind::Register {
                target_device,
                target_register,
                target_start_index,
                number_of_elements,
            } => {
                let base = self.target(target_device)?.lock().cooked_f64_accessor(target_register)?;
                let converted: SharedAccessor<T> = share(ForwardingDecorator::<T, f64>::new(base));
                let n_samples = converted.lock().n_samples();
                let length = number_of_elements.unwrap_or(n_samples.saturating_sub(*target_start_index));
                if *target_start_index == 0 && length == n_samples {
                    converted
                } else {
                    share(crate::accessor::sub_array::SubArrayAccessorDecorator::<T>::new(
                        converted,
                        self.backend_id,
                        path.clone(),
                        *target_start_index,
                        length,
                        info.access.writeable,
                        *self.version_on_open.lock(),
                    )?)
                }
            }
            RegisterKind::Channel {
                target_device,
                target_register,
                target_channel,
            } => {
                let base = self.target(target_device)?.lock().cooked_f64_accessor(target_register)?;
                let converted: SharedAccessor<T> = share(ForwardingDecorator::<T, f64>::new(base));
                share(ChannelAccessorDecorator::<T>::new(converted, *target_channel, path.to_string())?)
            }
            RegisterKind::Bit {
                target_device,
                target_register,
                target_bit,
            } => {
                let raw = self.target(target_device)?.lock().raw_u64_accessor(target_register)?;
                share(BitAccessorDecorator::<T>::new(
                    raw,
                    self.backend_id,
                    path.clone(),
                    *target_bit,
                    *self.version_on_open.lock(),
                )?)
            }
            RegisterKind::Constant { values, .. } => {
                let table = ValueTable::<T>::new(values.iter().map(|v| convert::<T, f64>(*v)).collect());
                share(VariableAccessorDecorator::constant(table, path.to_string()))
            }
            RegisterKind::Variable { values, .. } => {
                let (table, domain) = self.variable_table_and_domain::<T>(path, values)?;
                let base = VariableAccessorDecorator::new(table, path.to_string(), register.writeable);
                push_domain = Some(domain.clone());
                share(VariableWriteNotifier::new(share(base), domain))
            }
        };

        for plugin in register.plugins.iter().rev() {
            acc = self.apply_plugin(plugin, acc, path)?;
        }

        if flags.contains(AccessModeFlags::WAIT_FOR_NEW_DATA) {
            let domain = push_domain.ok_or_else(|| LogicError::UnsupportedAccessMode {
                path: path.to_string(),
                flag: "wait_for_new_data",
            })?;
            acc = share(PushAccessorDecorator::new(acc, domain));
        }

        Ok(acc)
    }

    fn apply_plugin<T>(&self, plugin: &PluginSpec, acc: SharedAccessor<T>, path: &RegisterPath) -> LogicResult<SharedAccessor<T>>
    where
        T: Arithmetic + Default + Send + 'static,
    {
        match plugin {
            PluginSpec::Multiplier { factor } => Ok(share(MultiplierDecorator::<T>::new(acc, *factor))),
            PluginSpec::Math {
                formula,
                self_variable_name,
                parameters,
            } => {
                let resolved = parameters
                    .iter()
                    .map(|(name, p)| Ok((name.clone(), self.get_accessor::<f64>(p, AccessModeFlags::empty())?)))
                    .collect::<LogicResult<Vec<_>>>()?;
                let version_on_open = *self.version_on_open.lock();
                Ok(share(MathDecorator::<T>::new(
                    acc,
                    formula,
                    self_variable_name.clone(),
                    resolved,
                    version_on_open,
                )?))
            }
            PluginSpec::MonostableTrigger {
                milliseconds,
                active,
                inactive,
            } => {
                let u32_target: SharedAccessor<u32> = share(ForwardingDecorator::<u32, T>::new(acc));
                Ok(share(MonostableTriggerDecorator::<T>::new(
                    u32_target,
                    *milliseconds,
                    *active,
                    *inactive,
                )?))
            }
            PluginSpec::ForceReadOnly => Ok(share(ForceReadOnlyDecorator::<T>::new(acc, path.to_string()))),
            PluginSpec::ForcePollingRead => Ok(share(ForcePollingReadDecorator::<T>::new(acc, path.to_string())?)),
            PluginSpec::TypeHintModifier { .. } => Ok(acc),
            PluginSpec::FanOut { targets } => {
                let fan_targets = targets
                    .iter()
                    .map(|p| self.get_accessor::<T>(p, AccessModeFlags::empty()))
                    .collect::<LogicResult<Vec<_>>>()?;
                Ok(share(FanOutDecorator::<T>::new(acc, fan_targets)?))
            }
            PluginSpec::DoubleBuffer {
                second_buffer,
                enable_double_buffer,
                current_buffer_number,
            } => {
                let second = self.get_accessor::<T>(second_buffer, AccessModeFlags::empty())?;
                let enable = self.get_accessor::<u32>(enable_double_buffer, AccessModeFlags::empty())?;
                let current = self.get_accessor::<u32>(current_buffer_number, AccessModeFlags::empty())?;
                let reader_count = self.double_buffer_reader_count(path);
                reader_count.fetch_add(1, Ordering::Relaxed);
                Ok(share(DoubleBufferAccessorDecorator::<T>::new(
                    acc,
                    second,
                    enable,
                    current,
                    reader_count,
                    path.to_string(),
                )?))
            }
        }
    }
}

fn build_catalogue(map: &LogicalNameMap, targets: &HashMap<String, Arc<Mutex<dyn Backend>>>) -> LogicResult<RegisterCatalogue> {
    let mut catalogue = RegisterCatalogue::new();
    for register in map.iter() {
        let mut info = match &register.kind {
            RegisterKind::Register {
                target_device,
                target_register,
                target_start_index,
                number_of_elements,
            } => {
                let target_info = target_register_info(targets, target_device, target_register)?;
                let n_elements = number_of_elements.unwrap_or(target_info.n_elements.saturating_sub(*target_start_index));
                RegisterInfo {
                    path: register.path.clone(),
                    n_elements,
                    n_channels: target_info.n_channels,
                    dimensions: vec![n_elements],
                    access: target_info.access,
                    supported_flags: AccessModeFlags::empty(),
                    data_descriptor: target_info.data_descriptor,
                    target: TargetInfo::LogicalName,
                }
            }
            RegisterKind::Channel {
                target_device,
                target_register,
                ..
            } => {
                let target_info = target_register_info(targets, target_device, target_register)?;
                RegisterInfo {
                    path: register.path.clone(),
                    n_elements: target_info.n_elements,
                    n_channels: 1,
                    dimensions: vec![target_info.n_elements],
                    access: AccessModes::READ_ONLY,
                    supported_flags: AccessModeFlags::empty(),
                    data_descriptor: target_info.data_descriptor,
                    target: TargetInfo::LogicalName,
                }
            }
            RegisterKind::Bit { target_device, target_register, .. } => {
                let target_info = target_register_info(targets, target_device, target_register)?;
                RegisterInfo {
                    path: register.path.clone(),
                    n_elements: 1,
                    n_channels: 1,
                    dimensions: vec![1],
                    access: target_info.access,
                    supported_flags: AccessModeFlags::empty(),
                    data_descriptor: DataDescriptor::boolean(),
                    target: TargetInfo::LogicalName,
                }
            }
            RegisterKind::Constant { value_type, values } => RegisterInfo {
                path: register.path.clone(),
                n_elements: values.len(),
                n_channels: 1,
                dimensions: vec![values.len()],
                access: AccessModes::READ_ONLY,
                supported_flags: AccessModeFlags::empty(),
                data_descriptor: value_type_descriptor(*value_type),
                target: TargetInfo::LogicalName,
            },
            RegisterKind::Variable { value_type, values } => RegisterInfo {
                path: register.path.clone(),
                n_elements: values.len(),
                n_channels: 1,
                dimensions: vec![values.len()],
                access: if register.writeable { AccessModes::READ_WRITE } else { AccessModes::READ_ONLY },
                supported_flags: AccessModeFlags::WAIT_FOR_NEW_DATA,
                data_descriptor: value_type_descriptor(*value_type),
                target: TargetInfo::LogicalName,
            },
        };
        for plugin in &register.plugins {
            if let PluginSpec::TypeHintModifier { value_type } = plugin {
                apply_type_hint(&mut info.data_descriptor, *value_type);
            }
            if matches!(plugin, PluginSpec::ForceReadOnly) {
                info.access = AccessModes::READ_ONLY;
            }
        }
        catalogue.insert(info);
    }
    Ok(catalogue)
}

fn target_register_info(
    targets: &HashMap<String, Arc<Mutex<dyn Backend>>>,
    target_device: &str,
    target_register: &RegisterPath,
) -> LogicResult<RegisterInfo> {
    let backend = targets.get(target_device).ok_or_else(|| LogicError::BadParameter {
        plugin: "LogicalNameMapping".into(),
        name: "targetDevice".into(),
        reason: format!("no target device registered for alias '{target_device}'"),
    })?;
    backend
        .lock()
        .catalogue()
        .get(target_register)
        .cloned()
        .ok_or_else(|| unknown_register(target_register))
}

impl Backend for LogicalNameMappingBackend {
    fn open(&mut self) -> Result<(), RuntimeError> {
        for target in self.targets.values() {
            target.lock().open()?;
        }
        *self.version_on_open.lock() = VersionNumber::new();
        self.opened = true;
        *self.exception.lock() = None;
        tracing::debug!(registers = self.catalogue.len(), "LogicalNameMappingBackend opened");
        Ok(())
    }

    fn close(&mut self) -> Result<(), RuntimeError> {
        for target in self.targets.values() {
            target.lock().close()?;
        }
        self.opened = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.opened
    }

    fn catalogue(&self) -> &RegisterCatalogue {
        &self.catalogue
    }

    fn set_exception(&self, error: RuntimeError) {
        tracing::warn!(error = %error, "LogicalNameMappingBackend entering exception state");
        *self.exception.lock() = Some(error.clone());
        for target in self.targets.values() {
            target.lock().set_exception(error.clone());
        }
        for state in self.variables.lock().values() {
            state.domain.distribute_exception(error.clone());
        }
    }

    fn active_exception(&self) -> Option<RuntimeError> {
        self.exception.lock().clone()
    }

    fn cooked_f64_accessor(&self, path: &RegisterPath) -> LogicResult<SharedAccessor<f64>> {
        self.get_accessor::<f64>(path, AccessModeFlags::empty())
    }

    fn raw_u64_accessor(&self, path: &RegisterPath) -> LogicResult<SharedAccessor<u64>> {
        self.get_accessor::<u64>(path, AccessModeFlags::empty())
    }
}

/// Wraps a writeable VARIABLE accessor so every successful write posts a
/// [`Domain::distribute`] notification -- `VariableAccessorDecorator` itself
/// only updates the shared [`ValueTable`], same split as the original's
/// `LNMVariable` (value storage) versus its `future_queue` subscribers.
struct VariableWriteNotifier<T> {
    target: SharedAccessor<T>,
    domain: Arc<Domain>,
}

impl<T> VariableWriteNotifier<T> {
    fn new(target: SharedAccessor<T>, domain: Arc<Domain>) -> Self {
        VariableWriteNotifier { target, domain }
    }
}

impl<T: Clone + Send + 'static> TransferElement for VariableWriteNotifier<T> {
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
        self.target.lock().post_read(transfer, has_new_data)
    }
    fn pre_write(&mut self, transfer: TransferType, version: VersionNumber) -> LogicResult<()> {
        self.target.lock().pre_write(transfer, version)
    }
    fn do_write_transfer(&mut self, version: VersionNumber) -> RuntimeResult<bool> {
        self.target.lock().do_write_transfer(version)
    }
    fn post_write(&mut self, transfer: TransferType, version: VersionNumber) -> RuntimeResult<()> {
        self.target.lock().post_write(transfer, version)?;
        self.domain.distribute();
        Ok(())
    }
    fn is_readable(&self) -> bool {
        self.target.lock().is_readable()
    }
    fn is_writeable(&self) -> bool {
        self.target.lock().is_writeable()
    }
    fn supports_wait_for_new_data(&self) -> bool {
        false
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

impl<T: Clone + Send + 'static> NDRegisterAccessor<T> for VariableWriteNotifier<T> {
    fn buffer(&self) -> &[Vec<T>] {
        self.target.lock().buffer()
    }
    fn buffer_mut(&mut self) -> &mut Vec<Vec<T>> {
        self.target.lock().buffer_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::register_info::{AccessModeFlags as Flags, AccessModes as Modes, DataDescriptor as Desc, RegisterInfo as Info, TargetInfo as Target};

    fn board() -> Arc<Mutex<dyn Backend>> {
        let mut cat = RegisterCatalogue::new();
        cat.insert(Info {
            path: RegisterPath::new("WORD"),
            n_elements: 4,
            n_channels: 1,
            dimensions: vec![4],
            access: Modes::READ_WRITE,
            supported_flags: Flags::empty(),
            data_descriptor: Desc::numeric_integer(32, true),
            target: Target::NumericAddressed {
                bar: 0,
                address: 0,
                width_bits: 32,
                fractional_bits: 0,
            },
        });
        let mut backend = DummyBackend::new(cat);
        backend.open().unwrap();
        Arc::new(Mutex::new(backend))
    }

    fn map_with_redirect() -> LogicalNameMap {
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
        }
    }

    fn variable_map() -> LogicalNameMap {
        LogicalNameMap {
            registers: vec![crate::lnm::LogicalRegister {
                path: RegisterPath::new("FLAG"),
                kind: RegisterKind::Variable {
                    value_type: LnmValueType::Integer,
                    values: vec![0.0],
                },
                plugins: vec![],
                writeable: true,
            }],
        }
    }

    #[test]
    fn redirected_register_reads_and_writes_through_target() {
        let mut targets = HashMap::new();
        targets.insert("board".to_string(), board());
        let mut backend = LogicalNameMappingBackend::new(map_with_redirect(), targets).unwrap();
        backend.open().unwrap();

        let acc = backend.get_accessor::<i32>(&RegisterPath::new("MY_WORD"), AccessModeFlags::empty()).unwrap();
        acc.lock().buffer_mut()[0][0] = 99;
        acc.lock().write(VersionNumber::new()).unwrap();

        let other = backend.get_accessor::<i32>(&RegisterPath::new("MY_WORD"), AccessModeFlags::empty()).unwrap();
        other.lock().read().unwrap();
        assert_eq!(other.lock().buffer()[0][0], 99);
    }

    #[test]
    fn variable_write_is_visible_across_instances_and_wakes_push_reader() {
        let mut backend = LogicalNameMappingBackend::new(variable_map(), HashMap::new()).unwrap();
        backend.open().unwrap();
        let path = RegisterPath::new("FLAG");

        let mut pushed = backend.get_accessor::<i32>(&path, AccessModeFlags::WAIT_FOR_NEW_DATA).unwrap();
        let mut writer = backend.get_accessor::<i32>(&path, AccessModeFlags::empty()).unwrap();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            writer.lock().buffer_mut()[0][0] = 5;
            writer.lock().write(VersionNumber::new()).unwrap();
        });
        pushed.lock().read().unwrap();
        handle.join().unwrap();
        assert_eq!(pushed.lock().buffer()[0][0], 5);
    }

    #[test]
    fn unknown_register_is_rejected() {
        let backend = LogicalNameMappingBackend::new(variable_map(), HashMap::new()).unwrap();
        assert!(backend.get_accessor::<i32>(&RegisterPath::new("NOPE"), AccessModeFlags::empty()).is_err());
    }
}
