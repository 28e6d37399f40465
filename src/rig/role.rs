//! Session permission tiers.

/// A user's permission tier on the rig.
///
/// Tiers are totally ordered: `Master > SlaveActive > SlavePassive > NotIn`.
/// Operations gate on [`Role::dominates`], so a master may do anything an
/// active collaborator may, and so on down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Not part of the session.
    NotIn,
    /// Collaborator who may only observe.
    SlavePassive,
    /// Collaborator who may interact with the device.
    SlaveActive,
    /// Session owner with full control.
    Master,
}

impl Role {
    fn rank(&self) -> u8 {
        match self {
            Role::NotIn => 0,
            Role::SlavePassive => 1,
            Role::SlaveActive => 2,
            Role::Master => 3,
        }
    }

    /// Returns `true` if this tier grants at least the permissions of
    /// `required`.
    pub fn dominates(&self, required: Role) -> bool {
        self.rank() >= required.rank()
    }

    /// Label used in log lines.
    pub fn as_label(&self) -> &'static str {
        match self {
            Role::NotIn => "not-in",
            Role::SlavePassive => "slave-passive",
            Role::SlaveActive => "slave-active",
            Role::Master => "master",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_total() {
        assert!(Role::Master.dominates(Role::SlaveActive));
        assert!(Role::Master.dominates(Role::NotIn));
        assert!(Role::SlaveActive.dominates(Role::SlavePassive));
        assert!(Role::SlavePassive.dominates(Role::NotIn));
        assert!(!Role::SlavePassive.dominates(Role::SlaveActive));
        assert!(!Role::NotIn.dominates(Role::SlavePassive));
    }

    #[test]
    fn every_tier_dominates_itself() {
        for role in [
            Role::NotIn,
            Role::SlavePassive,
            Role::SlaveActive,
            Role::Master,
        ] {
            assert!(role.dominates(role));
        }
    }
}
