use crate::persist::types::{PersistError, PersistResult, WalOp};

/// Convert a WAL op into its JSON wire form.
pub fn op_to_json(op: &WalOp) -> PersistResult<String> {
    serde_json::to_string(op).map_err(|_| PersistError::SerializationFailure)
}

/// Parse a WAL op JSON (read back from the DB) into a `WalOp` value.
pub fn op_from_json(s: &str) -> PersistResult<WalOp> {
    serde_json::from_str(s).map_err(|_| PersistError::FormatMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::TicketBag;

    #[test]
    fn op_survives_the_wire() {
        let op = WalOp::TicketsPurchased {
            buyer: 3,
            requested: TicketBag::of("front", 2),
            offered_payment: 7,
            at_ms: 42,
        };
        let json = op_to_json(&op).unwrap();
        match op_from_json(&json).unwrap() {
            WalOp::TicketsPurchased { buyer, offered_payment, .. } => {
                assert_eq!(buyer, 3);
                assert_eq!(offered_payment, 7);
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn garbage_is_a_format_mismatch() {
        assert!(matches!(
            op_from_json("not json"),
            Err(PersistError::FormatMismatch)
        ));
    }
}
