//! Fingerprint of a closed session's movement set.

use sha2::{Digest, Sha256};

use caja_common::SessionId;

use crate::movement::Movement;

/// SHA-256 over a canonical line per posting, hex encoded.
///
/// Covers identity, order, magnitude, sign, cash flag and reversal links, so
/// any later edit of a frozen ledger changes the digest.
pub fn closing_digest(session_id: SessionId, movements: &[Movement]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.to_string().as_bytes());
    hasher.update(b"\n");

    for m in movements {
        let line = format!(
            "{}|{}|{}|{}|{}|{}|{}|{}\n",
            m.sequence,
            m.id,
            m.amount.normalize(),
            m.sign.as_i8(),
            m.affects_cash,
            m.status.as_str(),
            m.reversed_of.map(|id| id.to_string()).unwrap_or_default(),
            m.reversed_by.map(|id| id.to_string()).unwrap_or_default(),
        );
        hasher.update(line.as_bytes());
    }

    let hash: [u8; 32] = hasher.finalize().into();
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::Origin;
    use caja_common::{EmployeeId, Sign};
    use rust_decimal_macros::dec;

    #[test]
    fn test_digest_is_stable_and_sensitive() {
        let session_id = SessionId::new();
        let sale = Movement::new(
            session_id,
            1,
            dec!(250.00),
            Sign::Inflow,
            Origin::Venta,
            EmployeeId::new("ana"),
        );
        let movements = vec![sale.clone()];

        let first = closing_digest(session_id, &movements);
        assert_eq!(first.len(), 64);
        assert_eq!(first, closing_digest(session_id, &movements));

        let mut tampered = sale;
        tampered.amount = dec!(25.00);
        assert_ne!(first, closing_digest(session_id, &[tampered]));
    }

    #[test]
    fn test_trailing_zeros_do_not_change_digest() {
        let session_id = SessionId::new();
        let mut sale = Movement::new(
            session_id,
            1,
            dec!(250.00),
            Sign::Inflow,
            Origin::Venta,
            EmployeeId::new("ana"),
        );
        let a = closing_digest(session_id, std::slice::from_ref(&sale));
        sale.amount = dec!(250);
        assert_eq!(a, closing_digest(session_id, &[sale]));
    }
}
