//! Catalogue entries (spec §3, §6).

use std::collections::HashMap;

use bitflags::bitflags;

use crate::register_path::RegisterPath;

bitflags! {
    /// Access modes a client may request; rejected if the backend/decorator
    /// cannot honour them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessModeFlags: u8 {
        const RAW = 0b01;
        const WAIT_FOR_NEW_DATA = 0b10;
    }
}

/// Fundamental storage category of a register's cooked value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundamentalType {
    Numeric,
    Boolean,
    String,
    Nodata,
}

/// Describes how the raw wire value maps onto a cooked user value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    pub fundamental_type: FundamentalType,
    pub integral: bool,
    pub signed: bool,
    pub n_digits: u32,
    pub n_fractional_digits: u32,
    pub raw_data_type: RawDataType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawDataType {
    Int32,
    Int64,
    Float32,
    Float64,
    None,
}

impl DataDescriptor {
    pub const fn numeric_integer(n_digits: u32, signed: bool) -> Self {
        DataDescriptor {
            fundamental_type: FundamentalType::Numeric,
            integral: true,
            signed,
            n_digits,
            n_fractional_digits: 0,
            raw_data_type: RawDataType::Int32,
        }
    }

    pub const fn numeric_fractional(n_digits: u32, n_fractional_digits: u32, signed: bool) -> Self {
        DataDescriptor {
            fundamental_type: FundamentalType::Numeric,
            integral: false,
            signed,
            n_digits,
            n_fractional_digits,
            raw_data_type: RawDataType::Int32,
        }
    }

    pub const fn boolean() -> Self {
        DataDescriptor {
            fundamental_type: FundamentalType::Boolean,
            integral: true,
            signed: false,
            n_digits: 1,
            n_fractional_digits: 0,
            raw_data_type: RawDataType::Int32,
        }
    }
}

/// Backend-specific location of a register's bits. Kept deliberately thin:
/// the concrete numeric-address map / LNM XML / JSON parsers that produce
/// these are out of scope (spec §1); the core only consumes them.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetInfo {
    /// Numeric-addressed (PCIe/XDMA) register: bar, byte address, width in
    /// bits, fractional bits for fixed-point interpretation.
    NumericAddressed {
        bar: u8,
        address: u64,
        width_bits: u8,
        fractional_bits: i32,
    },
    /// Logical-name-mapping redirect/channel/bit/constant/variable target;
    /// the concrete LNM target type is carried in `lnm::RegisterKind`.
    LogicalName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessModes {
    pub readable: bool,
    pub writeable: bool,
}

impl AccessModes {
    pub const READ_WRITE: AccessModes = AccessModes {
        readable: true,
        writeable: true,
    };
    pub const READ_ONLY: AccessModes = AccessModes {
        readable: true,
        writeable: false,
    };
    pub const WRITE_ONLY: AccessModes = AccessModes {
        readable: false,
        writeable: true,
    };
}

/// One catalogue entry: everything needed to construct an accessor for a
/// named register without consulting the backend further.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterInfo {
    pub path: RegisterPath,
    pub n_elements: usize,
    pub n_channels: usize,
    pub dimensions: Vec<usize>,
    pub access: AccessModes,
    pub supported_flags: AccessModeFlags,
    pub data_descriptor: DataDescriptor,
    pub target: TargetInfo,
}

impl RegisterInfo {
    pub fn supports(&self, flags: AccessModeFlags) -> bool {
        self.supported_flags.contains(flags)
    }
}

/// Map from register path to register info (spec §3).
#[derive(Debug, Clone, Default)]
pub struct RegisterCatalogue {
    entries: HashMap<RegisterPath, RegisterInfo>,
}

impl RegisterCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, info: RegisterInfo) {
        self.entries.insert(info.path.clone(), info);
    }

    pub fn get(&self, path: &RegisterPath) -> Option<&RegisterInfo> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &RegisterPath) -> bool {
        self.entries.contains_key(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisterInfo> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_mode_flags_reject_unsupported() {
        let info = RegisterInfo {
            path: RegisterPath::new("A"),
            n_elements: 1,
            n_channels: 1,
            dimensions: vec![1],
            access: AccessModes::READ_ONLY,
            supported_flags: AccessModeFlags::empty(),
            data_descriptor: DataDescriptor::numeric_integer(10, true),
            target: TargetInfo::LogicalName,
        };
        assert!(!info.supports(AccessModeFlags::WAIT_FOR_NEW_DATA));
    }

    #[test]
    fn catalogue_roundtrips() {
        let mut cat = RegisterCatalogue::new();
        let path = RegisterPath::new("A/B");
        cat.insert(RegisterInfo {
            path: path.clone(),
            n_elements: 4,
            n_channels: 1,
            dimensions: vec![4],
            access: AccessModes::READ_WRITE,
            supported_flags: AccessModeFlags::all(),
            data_descriptor: DataDescriptor::numeric_integer(10, true),
            target: TargetInfo::LogicalName,
        });
        assert!(cat.contains(&path));
        assert_eq!(cat.get(&path).unwrap().n_elements, 4);
    }
}
