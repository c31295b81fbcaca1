use crate::error::ServiceError;
use lazy_static::lazy_static;
use std::collections::HashSet;

/// What the caller should do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Expected to resolve itself; retry after a short delay.
    Transient,
    /// The database does not exist or cannot be reached for login. Retrying
    /// will not help; the caller has to create it first.
    NotFound,
    /// Structural failure; abandon the current trial.
    Fatal,
}

/// Codes meaning the target catalog is absent rather than broken.
pub const NOT_FOUND_CODES: &[i32] = &[
    4060, // cannot open database requested by the login
    1832, // database file cannot be attached / invalid catalog
    5120, // unable to open the physical file backing the database
];

/// The canonical retry table for the provisioning service. Under-classifying
/// aborts trials the service would have recovered; over-classifying retries
/// genuine failures forever. Keep it in sync with the service documentation.
pub const TRANSIENT_CODES: &[i32] = &[
    49920, // too many operations in progress for the subscription
    49919, // too many create/update operations in progress
    49918, // not enough resources to process the request
    41839, // transaction exceeded the maximum number of commit dependencies
    41325, // commit failed: serializable validation failure
    41305, // commit failed: repeatable read validation failure
    41302, // update conflict with a concurrent transaction
    41301, // dependency on a transaction that later failed to commit
    40613, // database not currently available, retry the connection later
    40501, // the service is currently busy
    40197, // the service encountered an error processing the request
    10929, // server too busy, request above the per-database limit
    10928, // per-database resource limit reached
    10060, // network error establishing the connection
    10054, // connection forcibly closed by the remote host
    10053, // established connection aborted locally
    1205,  // deadlock victim
    233,   // connection failed during pre-login
    121,   // semaphore timeout expired
    64,    // network name no longer available during login
    20,    // instance does not support encryption
    -2,    // client-side command timeout
];

lazy_static! {
    static ref TRANSIENT: HashSet<i32> = TRANSIENT_CODES.iter().copied().collect();
}

/// Pure classification over the error's code set. A composite server error is
/// transient when any of its codes is transient; the not-found codes are only
/// honored in primary position, matching how the service reports them.
pub fn classify(err: &ServiceError) -> Classification {
    match err {
        ServiceError::Timeout => Classification::Transient,
        ServiceError::Server { codes, .. } => {
            if codes
                .first()
                .map_or(false, |code| NOT_FOUND_CODES.contains(code))
            {
                Classification::NotFound
            } else if codes.iter().any(|code| TRANSIENT.contains(code)) {
                Classification::Transient
            } else {
                Classification::Fatal
            }
        }
        _ => Classification::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(codes: &[i32]) -> ServiceError {
        ServiceError::server(codes.to_vec(), "test")
    }

    #[test]
    fn every_transient_code_is_transient() {
        for &code in TRANSIENT_CODES {
            assert_eq!(
                classify(&server(&[code])),
                Classification::Transient,
                "code {}",
                code
            );
        }
    }

    #[test]
    fn not_found_codes_are_not_found() {
        for &code in NOT_FOUND_CODES {
            assert_eq!(
                classify(&server(&[code])),
                Classification::NotFound,
                "code {}",
                code
            );
        }
    }

    #[test]
    fn unknown_codes_are_fatal() {
        for code in [0, 18456, 207, 8134, 50000] {
            assert_eq!(classify(&server(&[code])), Classification::Fatal);
        }
    }

    #[test]
    fn bare_timeout_is_transient() {
        assert_eq!(classify(&ServiceError::Timeout), Classification::Transient);
    }

    #[test]
    fn composite_with_any_transient_code_is_transient() {
        assert_eq!(
            classify(&server(&[18456, 1205])),
            Classification::Transient
        );
        assert_eq!(classify(&server(&[18456, 207])), Classification::Fatal);
    }

    #[test]
    fn not_found_wins_in_primary_position() {
        assert_eq!(classify(&server(&[4060, 9999])), Classification::NotFound);
    }

    #[test]
    fn codeless_errors_are_fatal() {
        assert_eq!(
            classify(&ServiceError::Driver("tls handshake".into())),
            Classification::Fatal
        );
        assert_eq!(
            classify(&ServiceError::Interrupted),
            Classification::Fatal
        );
        assert_eq!(
            classify(&ServiceError::RetriesExhausted { attempts: 3 }),
            Classification::Fatal
        );
    }
}
