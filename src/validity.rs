//! Data-validity propagation (spec §3, §7): `faulty` is absorbing under
//! `meet`, so any faulty input along a data path makes the output faulty
//! within the same transaction.

/// In-band degradation signal that does not stop a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataValidity {
    #[default]
    Ok,
    Faulty,
}

impl DataValidity {
    /// `max(ok, faulty) = faulty`: strict monotone meet over a data path.
    pub fn meet(self, other: Self) -> Self {
        match (self, other) {
            (DataValidity::Ok, DataValidity::Ok) => DataValidity::Ok,
            _ => DataValidity::Faulty,
        }
    }

    pub fn is_ok(self) -> bool {
        matches!(self, DataValidity::Ok)
    }

    pub fn is_faulty(self) -> bool {
        matches!(self, DataValidity::Faulty)
    }
}

impl std::ops::BitAnd for DataValidity {
    type Output = DataValidity;
    fn bitand(self, rhs: Self) -> Self::Output {
        self.meet(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meet_is_absorbing_for_faulty() {
        assert_eq!(DataValidity::Ok.meet(DataValidity::Ok), DataValidity::Ok);
        assert_eq!(
            DataValidity::Ok.meet(DataValidity::Faulty),
            DataValidity::Faulty
        );
        assert_eq!(
            DataValidity::Faulty.meet(DataValidity::Ok),
            DataValidity::Faulty
        );
        assert_eq!(
            DataValidity::Faulty.meet(DataValidity::Faulty),
            DataValidity::Faulty
        );
    }
}
