// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `errors.rs`

#[cfg(test)]
mod tests {
    use super::super::*;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(kube::core::Status::failure("boom", reason).with_code(code).boxed())
    }

    #[test]
    fn test_terminal_classification() {
        assert!(DistributorError::UnknownCluster {
            cluster: "99".into()
        }
        .is_terminal());
        assert!(DistributorError::MalformedKey(RoutingKeyError::Empty).is_terminal());

        assert!(!DistributorError::ImportFailed {
            reason: String::new(),
            message: "disk full".into(),
        }
        .is_terminal());
        assert!(!DistributorError::Api {
            operation: "replace",
            kind: "ImageStream".into(),
            namespace: "ocp".into(),
            name: "4.16".into(),
            cluster: "build01".into(),
            source: api_error(409, "Conflict"),
        }
        .is_terminal());
    }

    #[test]
    fn test_import_failed_message() {
        let err = DistributorError::ImportFailed {
            reason: String::new(),
            message: "disk full".into(),
        };
        assert_eq!(
            err.to_string(),
            "imageStreamImport did not succeed: reason: , message: disk full"
        );
    }

    #[test]
    fn test_api_error_carries_identity() {
        let err = DistributorError::Api {
            operation: "get",
            kind: "ImageStreamTag".into(),
            namespace: "ocp".into(),
            name: "4.16:cli".into(),
            cluster: "app.ci".into(),
            source: api_error(500, "InternalError"),
        };
        let message = err.to_string();
        assert!(message.contains("failed to get ImageStreamTag ocp/4.16:cli in cluster app.ci"));
    }

    #[test]
    fn test_swallow_if_terminal() {
        let key = RoutingKey::new("99", "ocp", "4.16:cli");

        let swallowed: Result<(), _> = swallow_if_terminal(
            &key,
            Err(DistributorError::UnknownCluster {
                cluster: "99".into(),
            }),
        );
        assert!(swallowed.is_ok());

        let kept: Result<(), _> = swallow_if_terminal(
            &key,
            Err(DistributorError::ImportFailed {
                reason: String::new(),
                message: "disk full".into(),
            }),
        );
        assert!(kept.is_err());

        assert_eq!(swallow_if_terminal(&key, Ok(7)).unwrap(), 7);
    }
}
