//! `Constant`/`Variable` accessors (spec §4.8), ground-truthed against
//! `examples/original_source/device_backends/LogicalNameMapping/include/LNMVariable.h`:
//! an in-process value that lives only inside the backend, not behind any
//! hardware transfer. A `VARIABLE` register's value table is shared by
//! every accessor instance opened on the same path (the original keeps one
//! `LNMVariable` per register in the backend and hands its
//! `ValueTable<T>` out to every accessor built on it); writing through one
//! instance is immediately visible to a read through another. A `CONSTANT`
//! register is the same table without the writeable half.
//!
//! The original additionally lets a waiting reader subscribe to a
//! `cppext::future_queue` of pushed values for `AccessMode::wait_for_new_data`.
//! `VariableAccessorDecorator` itself stays pull-only (`supports_wait_for_new_data`
//! reports `false`); `wait_for_new_data` is obtained by wrapping one in
//! [`crate::accessor::push::PushAccessorDecorator`] together with the
//! [`crate::async_domain::Domain`] that [`crate::lnm::backend::LogicalNameMappingBackend`]
//! notifies on every write -- the same split the original makes between "the
//! value lives here" and "something is waiting for it to change".

use std::sync::Arc;

use parking_lot::Mutex;

use crate::accessor::{NDRegisterAccessor, SharedElement, TransferElement, TransferType};
use crate::error::{LogicError, LogicResult, RuntimeResult};
use crate::shared_state::TransferElementID;
use crate::validity::DataValidity;
use crate::version::VersionNumber;

/// The shared backing store for one VARIABLE or CONSTANT register,
/// analogous to `LNMVariable::ValueTable<T>`. One instance is owned by the
/// backend per register path and handed out (cloned as an `Arc`) to every
/// accessor opened on that path.
pub struct ValueTable<T> {
    pub latest_value: Vec<T>,
    pub latest_validity: DataValidity,
    pub latest_version: VersionNumber,
}

impl<T: Clone> ValueTable<T> {
    pub fn new(initial_value: Vec<T>) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(ValueTable {
            latest_value: initial_value,
            latest_validity: DataValidity::Ok,
            latest_version: VersionNumber::new(),
        }))
    }
}

pub struct VariableAccessorDecorator<T> {
    id: TransferElementID,
    table: Arc<Mutex<ValueTable<T>>>,
    path: String,
    writeable: bool,
    buffer: Vec<Vec<T>>,
    version: VersionNumber,
    validity: DataValidity,
}

impl<T: Clone + Send + 'static> VariableAccessorDecorator<T> {
    pub fn new(table: Arc<Mutex<ValueTable<T>>>, path: impl Into<String>, writeable: bool) -> Self {
        let initial = table.lock().latest_value.clone();
        VariableAccessorDecorator {
            id: TransferElementID::new(),
            table,
            path: path.into(),
            writeable,
            buffer: vec![initial],
            version: VersionNumber::new(),
            validity: DataValidity::Ok,
        }
    }

    /// `CONSTANT` convenience constructor: read-only, fixed at construction.
    pub fn constant(table: Arc<Mutex<ValueTable<T>>>, path: impl Into<String>) -> Self {
        Self::new(table, path, false)
    }
}

impl<T: Clone + Send + 'static> TransferElement for VariableAccessorDecorator<T> {
    fn id(&self) -> TransferElementID {
        self.id
    }

    fn pre_read(&mut self, _transfer: TransferType) -> LogicResult<()> {
        Ok(())
    }

    fn do_read_transfer(&mut self) -> RuntimeResult<bool> {
        let table = self.table.lock();
        Ok(table.latest_version > self.version)
    }

    fn post_read(&mut self, _transfer: TransferType, has_new_data: bool) -> RuntimeResult<()> {
        if has_new_data {
            let table = self.table.lock();
            self.buffer[0].clone_from(&table.latest_value);
            self.version = table.latest_version;
            self.validity = table.latest_validity;
        }
        Ok(())
    }

    fn pre_write(&mut self, _transfer: TransferType, _version: VersionNumber) -> LogicResult<()> {
        if !self.writeable {
            return Err(LogicError::ReadOnly { path: self.path.clone() });
        }
        Ok(())
    }

    fn do_write_transfer(&mut self, version: VersionNumber) -> RuntimeResult<bool> {
        let mut table = self.table.lock();
        table.latest_value.clone_from(&self.buffer[0]);
        table.latest_validity = self.validity;
        table.latest_version = version;
        Ok(false)
    }

    fn post_write(&mut self, _transfer: TransferType, version: VersionNumber) -> RuntimeResult<()> {
        self.version = version;
        Ok(())
    }

    fn is_readable(&self) -> bool {
        true
    }

    fn is_writeable(&self) -> bool {
        self.writeable
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
        Vec::new()
    }
}

impl<T: Clone + Send + 'static> NDRegisterAccessor<T> for VariableAccessorDecorator<T> {
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

    #[test]
    fn write_through_one_instance_is_visible_to_another() {
        let table = ValueTable::new(vec![0i32]);
        let mut writer = VariableAccessorDecorator::new(table.clone(), "V", true);
        let mut reader = VariableAccessorDecorator::new(table, "V", false);

        writer.buffer_mut()[0][0] = 42;
        writer.write(VersionNumber::new()).unwrap();

        reader.read().unwrap();
        assert_eq!(reader.buffer()[0][0], 42);
    }

    #[test]
    fn constant_rejects_writes() {
        let table = ValueTable::new(vec![7i32]);
        let mut constant = VariableAccessorDecorator::constant(table, "C");
        assert!(constant.write(VersionNumber::new()).is_err());
        constant.read().unwrap();
        assert_eq!(constant.buffer()[0][0], 7);
    }
}
