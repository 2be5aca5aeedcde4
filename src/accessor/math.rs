//! `Math` decorator (spec §4.9), ground-truthed against
//! `examples/original_source/device_backends/LogicalNameMapping/src/LNMMathPlugin.cc`
//! and its `LNMMathPluginFormulaHelper.h`: computes a register's value from a
//! compiled [`crate::formula::Formula`] over named parameter registers (and,
//! if the decorated target is itself readable, its own incoming value bound
//! to `self_variable_name`).
//!
//! Read path: read every parameter, evaluate, publish. Write path: the
//! formula's result is only published once every parameter has been written
//! at least once since the device was opened -- publishing a formula result
//! computed partly from un-initialised parameters would be misleading.
//! Concurrent pushes and an explicit `write()` are serialised through a
//! recursive mutex held for the whole `preWrite..postWrite` span, matching
//! the original's `_writeMutex`.

use std::collections::HashMap;

use parking_lot::ReentrantMutex;

use crate::accessor::{NDRegisterAccessor, SharedAccessor, SharedElement, TransferElement, TransferType};
use crate::convert::numeric::{convert, Arithmetic};
use crate::error::{LogicError, LogicResult, RuntimeResult};
use crate::formula::Formula;
use crate::shared_state::TransferElementID;
use crate::validity::DataValidity;
use crate::version::VersionNumber;

pub struct MathDecorator<T> {
    id: TransferElementID,
    target: SharedAccessor<T>,
    formula: Formula,
    self_variable_name: String,
    parameters: Vec<(String, SharedAccessor<f64>)>,
    version_on_open: VersionNumber,
    buffer: Vec<Vec<T>>,
    version: VersionNumber,
    validity: DataValidity,
    write_mutex: ReentrantMutex<()>,
}

impl<T: Arithmetic + Default + Send + 'static> MathDecorator<T> {
    pub fn new(
        target: SharedAccessor<T>,
        formula_source: &str,
        self_variable_name: impl Into<String>,
        parameters: Vec<(String, SharedAccessor<f64>)>,
        version_on_open: VersionNumber,
    ) -> LogicResult<Self> {
        let formula = Formula::compile(formula_source).map_err(|e| LogicError::BadParameter {
            plugin: "Math".into(),
            name: "formula".into(),
            reason: e.to_string(),
        })?;
        Ok(MathDecorator {
            id: TransferElementID::new(),
            target,
            formula,
            self_variable_name: self_variable_name.into(),
            parameters,
            version_on_open,
            buffer: vec![vec![T::default(); 1]],
            version: VersionNumber::new(),
            validity: DataValidity::Ok,
            write_mutex: ReentrantMutex::new(()),
        })
    }

    fn evaluate(&self, self_value: Option<f64>) -> LogicResult<f64> {
        let mut vars = HashMap::with_capacity(self.parameters.len() + 1);
        if let Some(x) = self_value {
            vars.insert(self.self_variable_name.clone(), x);
        }
        for (name, acc) in &self.parameters {
            vars.insert(name.clone(), acc.lock().buffer()[0][0]);
        }
        self.formula.evaluate(&vars).map_err(|e| LogicError::Unsupported {
            reason: format!("Math formula evaluation failed: {e}"),
        })
    }
}

impl<T: Arithmetic + Send + 'static> TransferElement for MathDecorator<T> {
    fn id(&self) -> TransferElementID {
        self.id
    }

    fn pre_read(&mut self, transfer: TransferType) -> LogicResult<()> {
        for (_, acc) in &self.parameters {
            acc.lock().pre_read(transfer)?;
        }
        self.target.lock().pre_read(transfer)
    }

    fn do_read_transfer(&mut self) -> RuntimeResult<bool> {
        let mut has_new_data = false;
        for (_, acc) in &self.parameters {
            has_new_data |= acc.lock().do_read_transfer()?;
        }
        has_new_data |= self.target.lock().do_read_transfer()?;
        Ok(has_new_data)
    }

    fn post_read(&mut self, transfer: TransferType, has_new_data: bool) -> RuntimeResult<()> {
        for (_, acc) in &self.parameters {
            acc.lock().post_read(transfer, has_new_data)?;
        }
        let mut target = self.target.lock();
        target.post_read(transfer, has_new_data)?;
        if has_new_data {
            let self_value = if target.is_readable() {
                Some(convert::<f64, T>(target.buffer()[0][0]))
            } else {
                None
            };
            drop(target);
            let result = self
                .evaluate(self_value)
                .map_err(|e| crate::error::RuntimeError::generic(e.to_string()))?;
            self.buffer[0][0] = convert::<T, f64>(result);
            self.version = VersionNumber::new();
        }
        Ok(())
    }

    fn pre_write(&mut self, transfer: TransferType, version: VersionNumber) -> LogicResult<()> {
        let _guard = self.write_mutex.lock();
        if !self
            .parameters
            .iter()
            .all(|(_, acc)| acc.lock().version() > self.version_on_open)
        {
            return Err(LogicError::Unsupported {
                reason: "Math: not every parameter has been written since the device was opened".into(),
            });
        }
        let mut target = self.target.lock();
        target.pre_write(transfer, version)
    }

    fn do_write_transfer(&mut self, version: VersionNumber) -> RuntimeResult<bool> {
        let _guard = self.write_mutex.lock();
        self.target.lock().do_write_transfer(version)
    }

    fn post_write(&mut self, transfer: TransferType, version: VersionNumber) -> RuntimeResult<()> {
        let _guard = self.write_mutex.lock();
        self.target.lock().post_write(transfer, version)
    }

    fn is_readable(&self) -> bool {
        true
    }

    fn is_writeable(&self) -> bool {
        self.target.lock().is_writeable()
            && self
                .parameters
                .iter()
                .all(|(_, acc)| acc.lock().version() > self.version_on_open)
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
        let mut elements = self.target.lock().hardware_accessing_elements();
        for (_, acc) in &self.parameters {
            elements.extend(acc.lock().hardware_accessing_elements());
        }
        elements
    }
}

impl<T: Arithmetic + Send + 'static> NDRegisterAccessor<T> for MathDecorator<T> {
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

    fn leaf_f64(value: f64) -> SharedAccessor<f64> {
        let storage = Arc::new(Mutex::new(RawStorage::new(1, 1)));
        let converter = FixedPointConverter::new(32, 8, true);
        let acc = RawRegisterAccessor::<f64>::new(
            storage,
            converter,
            AccessModes::READ_WRITE,
            Arc::new(Mutex::new(None)),
        );
        acc.lock().buffer_mut()[0][0] = value;
        acc.lock().write(VersionNumber::new()).unwrap();
        acc
    }

    #[test]
    fn read_computes_formula_over_parameters() {
        let target = leaf_f64(0.0);
        let a = leaf_f64(2.0);
        let b = leaf_f64(3.0);
        let opened_at = VersionNumber::new();
        let mut decorator =
            MathDecorator::<f64>::new(target, "a * b + 1", "x", vec![("a".into(), a), ("b".into(), b)], opened_at)
                .unwrap();
        decorator.read().unwrap();
        assert_eq!(decorator.buffer()[0][0], 7.0);
    }
}
