// azmigrate/src/transfer/mod.rs
pub(crate) mod blob;
pub(crate) mod database;
pub(crate) mod registry;

pub use blob::BlobTransfer;
pub use database::DatabaseTransfer;
pub use registry::RegistryTransfer;

use crate::errors::MigrationError;
use crate::model::MigrationUnit;

/// Re-labels any failure during one unit's copy as a transfer error for that unit.
pub(crate) fn transfer_error(unit: &MigrationUnit, err: MigrationError) -> MigrationError {
    match err {
        e @ MigrationError::Transfer { .. } => e,
        other => MigrationError::Transfer {
            unit: unit.identity(),
            reason: other.to_string(),
        },
    }
}

pub(crate) fn unsupported(unit: &MigrationUnit) -> MigrationError {
    MigrationError::Transfer {
        unit: unit.identity(),
        reason: "unit type not handled by this transfer".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failure_becomes_unit_transfer_error() {
        let unit = MigrationUnit::database("orders");
        let err = transfer_error(
            &unit,
            MigrationError::Command {
                program: "pg_restore".into(),
                status: "exit status: 1".into(),
                stderr: "role \"app\" does not exist".into(),
            },
        );
        match err {
            MigrationError::Transfer { unit, reason } => {
                assert_eq!(unit, "db:orders");
                assert!(reason.contains("pg_restore exited with exit status: 1"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
