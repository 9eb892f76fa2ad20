use crate::types::{Amount, Error, Height, PermissionMode, SubnetId};
use serde::{Deserialize, Serialize};

/// Lowest accepted majority percentage.
pub const MIN_MAJORITY_PERCENTAGE: u8 = 51;

/// Configuration of a subnet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Identifier of the subnet.
    pub subnet_id: SubnetId,

    /// How validator power is assigned.
    pub permission_mode: PermissionMode,

    /// Maximum number of active validators.
    pub active_validators_limit: u16,

    /// Percentage of the active weight required to certify a checkpoint or
    /// batch (between 51 and 100).
    pub majority_percentage: u8,

    /// Number of validators required before the subnet bootstraps.
    pub min_validators: u64,

    /// Total confirmed collateral required before the subnet bootstraps.
    ///
    /// Ignored in `Federated` mode.
    pub min_activation_collateral: Amount,

    /// Smallest collateral a validator may join with.
    #[serde(default)]
    pub min_validator_stake: Amount,

    /// Number of blocks withdrawn collateral stays locked.
    pub locking_duration: Height,

    /// Number of blocks between two checkpoints.
    pub bottom_up_check_period: Height,

    /// Number of blocks after which buffered messages may be cut into a batch.
    pub batch_period: Height,

    /// Maximum number of messages in a batch or checkpoint.
    pub max_msgs_per_batch: usize,

    /// Whether validators of a `Static` subnet may leave after bootstrap.
    #[serde(default)]
    pub static_allows_leave: bool,
}

impl Config {
    /// Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), Error> {
        if self.active_validators_limit == 0 {
            return Err(Error::InvalidParameter(
                "active_validators_limit",
                "must be positive",
            ));
        }
        if !(MIN_MAJORITY_PERCENTAGE..=100).contains(&self.majority_percentage) {
            return Err(Error::InvalidParameter(
                "majority_percentage",
                "must be between 51 and 100",
            ));
        }
        if self.min_validators == 0 {
            return Err(Error::InvalidParameter("min_validators", "must be positive"));
        }
        if self.permission_mode == PermissionMode::Static
            && self.min_validators > self.active_validators_limit as u64
        {
            return Err(Error::InvalidParameter(
                "min_validators",
                "exceeds the active validator limit",
            ));
        }
        if self.bottom_up_check_period == 0 {
            return Err(Error::InvalidParameter(
                "bottom_up_check_period",
                "must be positive",
            ));
        }
        if self.max_msgs_per_batch == 0 {
            return Err(Error::InvalidParameter(
                "max_msgs_per_batch",
                "must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use test_case::test_case;

    pub fn config(mode: PermissionMode) -> Config {
        Config {
            subnet_id: SubnetId::new_from_parent(
                &SubnetId::new_root(1),
                crate::types::Address::new([9; 20]),
            ),
            permission_mode: mode,
            active_validators_limit: 3,
            majority_percentage: 67,
            min_validators: 2,
            min_activation_collateral: 20,
            min_validator_stake: 1,
            locking_duration: 100,
            bottom_up_check_period: 10,
            batch_period: 5,
            max_msgs_per_batch: 10,
            static_allows_leave: false,
        }
    }

    #[test]
    fn test_validate() {
        for mode in [
            PermissionMode::Collateral,
            PermissionMode::Federated,
            PermissionMode::Static,
        ] {
            assert!(config(mode).validate().is_ok());
        }
    }

    #[test_case(|c| c.active_validators_limit = 0, "active_validators_limit"; "zero active limit")]
    #[test_case(|c| c.majority_percentage = 50, "majority_percentage"; "majority too low")]
    #[test_case(|c| c.majority_percentage = 101, "majority_percentage"; "majority too high")]
    #[test_case(|c| c.min_validators = 0, "min_validators"; "zero min validators")]
    #[test_case(|c| { c.permission_mode = PermissionMode::Static; c.min_validators = 4 }, "min_validators"; "static set cannot bootstrap")]
    #[test_case(|c| c.bottom_up_check_period = 0, "bottom_up_check_period"; "zero checkpoint period")]
    #[test_case(|c| c.max_msgs_per_batch = 0, "max_msgs_per_batch"; "zero batch size")]
    fn test_invalid(mutate: fn(&mut Config), field: &'static str) {
        let mut cfg = config(PermissionMode::Collateral);
        mutate(&mut cfg);
        assert!(matches!(
            cfg.validate(),
            Err(Error::InvalidParameter(f, _)) if f == field
        ));
    }

    #[test]
    fn test_static_min_validators_at_limit() {
        let mut cfg = config(PermissionMode::Static);
        cfg.min_validators = 3;
        assert!(cfg.validate().is_ok());

        // Other modes admit validators past the active limit
        let mut cfg = config(PermissionMode::Collateral);
        cfg.min_validators = 4;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_yaml() {
        let yaml = r#"
subnet_id: /r314/0x0101010101010101010101010101010101010101
permission_mode: federated
active_validators_limit: 100
majority_percentage: 67
min_validators: 4
min_activation_collateral: 0
locking_duration: 1000
bottom_up_check_period: 600
batch_period: 60
max_msgs_per_batch: 100
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.permission_mode, PermissionMode::Federated);
        assert_eq!(cfg.subnet_id.root(), 314);
        assert_eq!(cfg.subnet_id.route().len(), 1);
        assert_eq!(cfg.min_validator_stake, 0);
        assert!(!cfg.static_allows_leave);
        assert!(cfg.validate().is_ok());

        let encoded = serde_yaml::to_string(&cfg).unwrap();
        let decoded: Config = serde_yaml::from_str(&encoded).unwrap();
        assert_eq!(cfg, decoded);
    }
}
