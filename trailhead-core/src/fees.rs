use serde::{Deserialize, Serialize};

/// Basis points in one whole.
const BPS_SCALE: i64 = 10_000;

/// What the renter is charged for a stay. The booking stores `base`; the fee
/// is computed at payment time and both land on the Transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeBreakdown {
    pub base: i64,
    pub service_fee: i64,
    pub total: i64,
}

impl ChargeBreakdown {
    /// `fee_bps` is the service fee in basis points (1000 = 10%), rounded half
    /// up to the minor currency unit.
    pub fn compute(base: i64, fee_bps: u32) -> Self {
        let service_fee = (base * i64::from(fee_bps) + BPS_SCALE / 2) / BPS_SCALE;
        Self {
            base,
            service_fee,
            total: base + service_fee,
        }
    }
}
