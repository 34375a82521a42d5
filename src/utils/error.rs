use crate::os::policy::AddressFamily;
use thiserror::Error;

/// Every way a hardening run can stop.
///
/// Validation, configuration and environment errors are raised before any
/// live firewall state is touched. Apply and persistence errors happen after
/// mutation has begun and are never compensated.
#[derive(Debug, Error)]
pub enum HardenError {
    /// Operator literal failed both the IPv4 and the IPv6 validator
    #[error("'{0}' is not a valid IPv4 or IPv6 address")]
    InvalidAddress(String),

    /// Operator input that is not an address (hostname, closed stdin)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Compile-time configuration cannot produce a policy
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No package manager, filter tooling or boot mechanism on this host
    #[error("Unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    /// The live packet filter refused a flush, policy or rule
    #[error("Failed to apply {family} policy, `{command}` failed: {reason}")]
    ApplyFailure {
        family: AddressFamily,
        command: String,
        reason: String,
    },

    /// Artifact write or boot registration failed; live rules stay applied
    #[error("Failed to persist policy: {0}")]
    PersistenceFailure(String),
}

impl HardenError {
    /// Process exit code for this failure kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            HardenError::InvalidAddress(_) | HardenError::InvalidInput(_) => 2,
            HardenError::InvalidConfig(_) => 3,
            HardenError::UnsupportedEnvironment(_) => 4,
            HardenError::ApplyFailure { .. } => 5,
            HardenError::PersistenceFailure(_) => 6,
        }
    }
}

/// A program could not be spawned or waited on.
#[derive(Debug, Error)]
#[error("Failed to run {program}: {reason}")]
pub struct CmdError {
    pub program: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_exit_codes_are_nonzero_and_distinct_per_kind() {
        let errors = [
            HardenError::InvalidAddress("x".to_owned()),
            HardenError::InvalidConfig("x".to_owned()),
            HardenError::UnsupportedEnvironment("x".to_owned()),
            HardenError::ApplyFailure {
                family: AddressFamily::V4,
                command: "iptables -F".to_owned(),
                reason: "x".to_owned(),
            },
            HardenError::PersistenceFailure("x".to_owned()),
        ];
        let codes: Vec<i32> = errors.iter().map(HardenError::exit_code).collect();
        assert!(codes.iter().all(|c| *c != 0));
        let unique: HashSet<i32> = codes.iter().copied().collect();
        assert_eq!(unique.len(), codes.len());
    }

    #[test]
    fn test_bad_operator_input_shares_the_address_exit_code() {
        let input = HardenError::InvalidInput("hostname is empty".to_owned());
        assert_ne!(input.exit_code(), 0);
        assert_eq!(
            input.exit_code(),
            HardenError::InvalidAddress("x".to_owned()).exit_code()
        );
    }

    #[test]
    fn test_apply_failure_message_names_family_and_command() {
        let err = HardenError::ApplyFailure {
            family: AddressFamily::V6,
            command: "ip6tables -A INPUT -j LOG".to_owned(),
            reason: "No chain/target/match by that name.".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("IPv6"));
        assert!(msg.contains("ip6tables -A INPUT -j LOG"));
    }
}
