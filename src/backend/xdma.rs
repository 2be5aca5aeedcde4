//! `XdmaBackend` (spec §4.12), ground-truthed against
//! `examples/original_source/device_backends/xdma/src/{DeviceFile,EventFile}.cc`:
//! register access through a PCIe/XDMA character device (`pread`/`pwrite` at
//! a byte offset standing in for a BAR address), plus one dedicated blocking
//! IO thread per `/events<idx>` character device forwarding firmware
//! interrupts onto an [`crate::async_domain::Domain`].
//!
//! The original's `EventFile` hands a blocking read off to a `boost::asio`
//! `stream_descriptor` running on its own thread and calls back into the
//! owning backend once per interrupt counted in the read result; this crate
//! has no async-IO dependency in its stack (spec §5: "parallel threads, not
//! cooperative"), so the read just blocks directly on a `std::thread`, the
//! same dedicated-worker-thread shape [`crate::backend::shared_dummy::Dispatcher`]
//! already uses for its own interrupt fan-out. Surplus interrupts counted in
//! one read are coalesced into a single [`crate::async_domain::Domain::distribute`]
//! call rather than replayed one-by-one -- see that module's doc comment.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use nix::fcntl::{open, OFlag};
use nix::sys::stat::{fstat, Mode};
use nix::sys::uio::{pread, pwrite};
use nix::unistd::{close, read};

use crate::accessor::{share, NDRegisterAccessor, SharedAccessor, SharedElement, TransferElement, TransferType};
use crate::async_domain::Domain;
use crate::backend::Backend;
use crate::convert::numeric::{convert, Arithmetic};
use crate::convert::FixedPointConverter;
use crate::error::{LogicError, LogicResult, RuntimeError, RuntimeResult};
use crate::register_info::{AccessModes, RegisterCatalogue, TargetInfo};
use crate::register_path::RegisterPath;
use crate::shared_state::TransferElementID;
use crate::validity::DataValidity;
use crate::version::VersionNumber;
use parking_lot::Mutex;

fn unknown_register(path: &RegisterPath) -> LogicError {
    LogicError::UnknownRegister {
        path: path.to_string(),
    }
}

fn io_error(path: &str, err: nix::Error) -> RuntimeError {
    RuntimeError::Io {
        path: path.to_string(),
        message: err.to_string(),
    }
}

/// An opened character device, closed automatically on drop. `path` is kept
/// for error messages and for building dependent paths (`{path}/events{idx}`).
struct DeviceFile {
    path: String,
    fd: RawFd,
}

impl DeviceFile {
    fn open(path: impl Into<String>, flags: OFlag) -> RuntimeResult<Self> {
        let path = path.into();
        let fd = open(path.as_str(), flags, Mode::empty()).map_err(|e| io_error(&path, e))?;
        tracing::debug!(path = %path, "xdma: opened device file");
        Ok(DeviceFile { path, fd })
    }

    fn read_at(&self, address: u64, buf: &mut [u8]) -> RuntimeResult<()> {
        let n = pread(self.fd, buf, address as i64).map_err(|e| io_error(&self.path, e))?;
        if n != buf.len() {
            return Err(RuntimeError::Io {
                path: self.path.clone(),
                message: format!("short read at offset {address}: got {n} of {} bytes", buf.len()),
            });
        }
        Ok(())
    }

    fn write_at(&self, address: u64, buf: &[u8]) -> RuntimeResult<()> {
        let n = pwrite(self.fd, buf, address as i64).map_err(|e| io_error(&self.path, e))?;
        if n != buf.len() {
            return Err(RuntimeError::Io {
                path: self.path.clone(),
                message: format!("short write at offset {address}: wrote {n} of {} bytes", buf.len()),
            });
        }
        Ok(())
    }

    /// `true` once the underlying device node has been unlinked (hot-unplug),
    /// the same `st_nlink == 0` check the owning `EventDispatcher` uses.
    fn is_gone(&self) -> bool {
        match fstat(self.fd) {
            Ok(stat) => stat.st_nlink == 0,
            Err(_) => true,
        }
    }
}

impl Drop for DeviceFile {
    fn drop(&mut self) {
        let _ = close(self.fd);
    }
}

unsafe impl Send for DeviceFile {}
unsafe impl Sync for DeviceFile {}

/// One register window on the control device: byte address plus the
/// fixed-point encoding of its bits (spec §4.12's numeric-addressed target).
struct XdmaRegisterAccessor<T> {
    id: TransferElementID,
    device: Arc<DeviceFile>,
    address: u64,
    width_bytes: usize,
    converter: FixedPointConverter,
    access: AccessModes,
    buffer: Vec<Vec<T>>,
    version: VersionNumber,
    validity: DataValidity,
    exception_flag: Arc<Mutex<Option<RuntimeError>>>,
    self_ref: std::sync::Weak<Mutex<XdmaRegisterAccessor<T>>>,
}

impl<T: Arithmetic + Default + Send + 'static> XdmaRegisterAccessor<T> {
    fn new(
        device: Arc<DeviceFile>,
        address: u64,
        converter: FixedPointConverter,
        access: AccessModes,
        exception_flag: Arc<Mutex<Option<RuntimeError>>>,
    ) -> Arc<Mutex<Self>> {
        let width_bytes = (converter.width() as usize).div_ceil(8).max(1);
        Arc::new_cyclic(|weak| {
            Mutex::new(XdmaRegisterAccessor {
                id: TransferElementID::new(),
                device,
                address,
                width_bytes,
                converter,
                access,
                buffer: vec![vec![T::default(); 1]],
                version: VersionNumber::new(),
                validity: DataValidity::Ok,
                exception_flag,
                self_ref: weak.clone(),
            })
        })
    }

    fn pending_exception(&self) -> Option<RuntimeError> {
        self.exception_flag.lock().clone()
    }
}

impl<T: Arithmetic + Default + Send + 'static> TransferElement for XdmaRegisterAccessor<T> {
    fn id(&self) -> TransferElementID {
        self.id
    }

    fn pre_read(&mut self, _transfer: TransferType) -> LogicResult<()> {
        if !self.access.readable {
            return Err(LogicError::WriteOnly {
                path: self.device.path.clone(),
            });
        }
        Ok(())
    }

    fn do_read_transfer(&mut self) -> RuntimeResult<bool> {
        if let Some(e) = self.pending_exception() {
            return Err(e);
        }
        let mut bytes = [0u8; 8];
        self.device.read_at(self.address, &mut bytes[..self.width_bytes])?;
        let raw = u64::from_le_bytes(bytes);
        let cooked = self.converter.to_cooked(raw);
        self.buffer[0][0] = convert::<T, f64>(cooked);
        Ok(true)
    }

    fn post_read(&mut self, _transfer: TransferType, has_new_data: bool) -> RuntimeResult<()> {
        if has_new_data {
            self.version = VersionNumber::new();
            self.validity = DataValidity::Ok;
        }
        Ok(())
    }

    fn pre_write(&mut self, _transfer: TransferType, _version: VersionNumber) -> LogicResult<()> {
        if !self.access.writeable {
            return Err(LogicError::ReadOnly {
                path: self.device.path.clone(),
            });
        }
        Ok(())
    }

    fn do_write_transfer(&mut self, version: VersionNumber) -> RuntimeResult<bool> {
        if let Some(e) = self.pending_exception() {
            return Err(e);
        }
        let cooked = convert::<f64, T>(self.buffer[0][0]);
        let (raw, validity) = self.converter.to_raw(cooked);
        let bytes = raw.to_le_bytes();
        self.device.write_at(self.address, &bytes[..self.width_bytes])?;
        self.version = version;
        if validity.is_faulty() {
            self.validity = DataValidity::Faulty;
        }
        Ok(false)
    }

    fn post_write(&mut self, _transfer: TransferType, _version: VersionNumber) -> RuntimeResult<()> {
        Ok(())
    }

    fn is_readable(&self) -> bool {
        self.access.readable
    }

    fn is_writeable(&self) -> bool {
        self.access.writeable
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
        match self.self_ref.upgrade() {
            Some(strong) => vec![strong as SharedElement],
            None => vec![],
        }
    }
}

impl<T: Arithmetic + Default + Send + 'static> NDRegisterAccessor<T> for XdmaRegisterAccessor<T> {
    fn buffer(&self) -> &[Vec<T>] {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut Vec<Vec<T>> {
        &mut self.buffer
    }
}

/// Dedicated blocking-read thread for one `/events<idx>` file, grounded on
/// `EventFile`/`EventThread`'s read loop: block on `read()`, fan the wakeup
/// out through `domain`, and on EOF or a disappeared device node forward a
/// [`RuntimeError`] to the owning backend's exception slot before exiting.
struct EventDispatcher {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl EventDispatcher {
    fn spawn(event_file: Arc<DeviceFile>, domain: Arc<Domain>, exception: Arc<Mutex<Option<RuntimeError>>>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let handle = thread::spawn(move || {
            let mut counter = [0u8; 4];
            while !thread_stop.load(Ordering::Relaxed) {
                match read(event_file.fd, &mut counter) {
                    Ok(4) => {
                        // The real count of coalesced interrupts is in
                        // `counter`; this crate only distinguishes "something
                        // happened" from "nothing happened" (spec §4.12), so
                        // every non-empty read is one wakeup regardless of
                        // how many interrupts it coalesces.
                        domain.distribute();
                    }
                    Ok(_) | Err(_) => {
                        if event_file.is_gone() {
                            let err = RuntimeError::Io {
                                path: event_file.path.clone(),
                                message: "event device disappeared".into(),
                            };
                            *exception.lock() = Some(err.clone());
                            domain.distribute_exception(err);
                            break;
                        }
                    }
                }
            }
        });
        EventDispatcher {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // The blocking `read()` above will not itself observe `stop` until
        // its next wakeup; on a real XDMA event file that only happens on
        // the next interrupt or device removal, so this join is best-effort
        // and mirrors the original's `_ctx.stop(); _thread.join();` shutdown,
        // which has the identical limitation.
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

/// One numeric-addressed register's location on the control device: a byte
/// address plus its own fixed-point encoding.
#[derive(Debug, Clone, Copy)]
struct RegisterLocation {
    address: u64,
    width_bits: u8,
    fractional_bits: i32,
    signed: bool,
}

pub struct XdmaBackend {
    catalogue: RegisterCatalogue,
    device_path: String,
    device: Arc<DeviceFile>,
    locations: HashMap<RegisterPath, RegisterLocation>,
    domains: Mutex<HashMap<u32, Arc<Domain>>>,
    dispatchers: Mutex<HashMap<u32, EventDispatcher>>,
    opened: bool,
    exception: Arc<Mutex<Option<RuntimeError>>>,
}

impl XdmaBackend {
    /// `device_path` is the control character device (e.g. `/dev/xdma0_user`);
    /// its sibling event files live at `"{device_path}/events<idx>"`.
    pub fn new(catalogue: RegisterCatalogue, device_path: impl Into<String>) -> RuntimeResult<Self> {
        let device_path = device_path.into();
        let device = DeviceFile::open(device_path.clone(), OFlag::O_RDWR)?;
        let mut locations = HashMap::new();
        for info in catalogue.iter() {
            if let TargetInfo::NumericAddressed {
                address,
                width_bits,
                fractional_bits,
                ..
            } = info.target
            {
                locations.insert(
                    info.path.clone(),
                    RegisterLocation {
                        address,
                        width_bits,
                        fractional_bits,
                        signed: info.data_descriptor.signed,
                    },
                );
            }
        }
        Ok(XdmaBackend {
            catalogue,
            device_path,
            device: Arc::new(device),
            locations,
            domains: Mutex::new(HashMap::new()),
            dispatchers: Mutex::new(HashMap::new()),
            opened: false,
            exception: Arc::new(Mutex::new(None)),
        })
    }

    pub fn get_accessor<T: Arithmetic + Default + Send + 'static>(
        &self,
        path: &RegisterPath,
    ) -> LogicResult<SharedAccessor<T>> {
        let info = self.catalogue.get(path).ok_or_else(|| unknown_register(path))?;
        let location = self.locations.get(path).ok_or_else(|| unknown_register(path))?;
        let converter = FixedPointConverter::new(location.width_bits, location.fractional_bits, location.signed);
        Ok(share(XdmaRegisterAccessor::<T>::new(
            self.device.clone(),
            location.address,
            converter,
            info.access,
            self.exception.clone(),
        )))
    }

    /// The [`Domain`] distributing wakeups for `/events<idx>`, created on
    /// first use (spec §4.12); its dispatcher thread only starts once
    /// [`Self::start_event_dispatcher`] is called, matching
    /// `SharedDummyBackend::interrupt_domain`/`start_dispatcher`'s split.
    pub fn interrupt_domain(&self, interrupt_idx: u32) -> Arc<Domain> {
        self.domains
            .lock()
            .entry(interrupt_idx)
            .or_insert_with(|| Arc::new(Domain::new()))
            .clone()
    }

    /// Open `/events<idx>` and start its dedicated blocking-read thread.
    pub fn start_event_dispatcher(&self, interrupt_idx: u32) -> RuntimeResult<()> {
        let mut dispatchers = self.dispatchers.lock();
        if dispatchers.contains_key(&interrupt_idx) {
            return Ok(());
        }
        let event_path = format!("{}/events{interrupt_idx}", self.device_path);
        let event_file = Arc::new(DeviceFile::open(event_path, OFlag::O_RDONLY)?);
        let domain = self.interrupt_domain(interrupt_idx);
        dispatchers.insert(
            interrupt_idx,
            EventDispatcher::spawn(event_file, domain, self.exception.clone()),
        );
        Ok(())
    }
}

impl Backend for XdmaBackend {
    fn open(&mut self) -> Result<(), RuntimeError> {
        self.opened = true;
        *self.exception.lock() = None;
        tracing::debug!(path = %self.device_path, "XdmaBackend opened");
        Ok(())
    }

    fn close(&mut self) -> Result<(), RuntimeError> {
        self.dispatchers.lock().clear();
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
        tracing::warn!(error = %error, path = %self.device_path, "XdmaBackend entering exception state");
        *self.exception.lock() = Some(error);
    }

    fn active_exception(&self) -> Option<RuntimeError> {
        self.exception.lock().clone()
    }

    fn cooked_f64_accessor(&self, path: &RegisterPath) -> LogicResult<SharedAccessor<f64>> {
        self.get_accessor::<f64>(path)
    }

    fn raw_u64_accessor(&self, path: &RegisterPath) -> LogicResult<SharedAccessor<u64>> {
        self.get_accessor::<u64>(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register_info::{AccessModeFlags, DataDescriptor, RegisterInfo};
    use std::io::Write;

    /// A real XDMA control device does not exist in a test environment; a
    /// regular file stands in for it since `pread`/`pwrite` work on both.
    fn fake_device() -> (tempfile::NamedTempFile, String) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 64]).unwrap();
        let path = file.path().to_string_lossy().into_owned();
        (file, path)
    }

    fn catalogue() -> RegisterCatalogue {
        let mut cat = RegisterCatalogue::new();
        cat.insert(RegisterInfo {
            path: RegisterPath::new("CTRL/WORD"),
            n_elements: 1,
            n_channels: 1,
            dimensions: vec![1],
            access: AccessModes::READ_WRITE,
            supported_flags: AccessModeFlags::empty(),
            data_descriptor: DataDescriptor::numeric_integer(32, true),
            target: TargetInfo::NumericAddressed {
                bar: 0,
                address: 8,
                width_bits: 32,
                fractional_bits: 0,
            },
        });
        cat
    }

    #[test]
    fn write_then_read_roundtrips_through_the_device_file() {
        let (_guard, path) = fake_device();
        let mut backend = XdmaBackend::new(catalogue(), path).unwrap();
        backend.open().unwrap();

        let acc = backend.get_accessor::<i32>(&RegisterPath::new("CTRL/WORD")).unwrap();
        acc.lock().buffer_mut()[0][0] = -11;
        acc.lock().write(VersionNumber::new()).unwrap();
        acc.lock().buffer_mut()[0][0] = 0;
        acc.lock().read().unwrap();
        assert_eq!(acc.lock().buffer()[0][0], -11);
    }

    #[test]
    fn unknown_register_is_rejected() {
        let (_guard, path) = fake_device();
        let backend = XdmaBackend::new(catalogue(), path).unwrap();
        assert!(backend.get_accessor::<i32>(&RegisterPath::new("NOPE")).is_err());
    }
}
