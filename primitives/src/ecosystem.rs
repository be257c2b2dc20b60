//! Ecosystem constants shared by the lending pallets.

/// Token amounts, native and `pallet-assets` alike
pub type Balance = u128;

/// Seeds of pallet-owned accounts (`PalletId::into_account_truncating`).
pub mod pallet_ids {
  /// Leverage Router pallet ID (action-chain execution engine)
  pub const LEVERAGE_ROUTER_PALLET_ID: &[u8; 8] = b"lvgroutr";
}

/// Fixed-point parameters used by the lending layer.
pub mod params {
  use super::Balance;
  use sp_arithmetic::{Rounding, helpers_128bit::multiply_by_rational_with_rounding};

  /// 1e18 mantissa: fractions and exchange rates are scaled by this value.
  pub const ONE: Balance = 1_000_000_000_000_000_000;

  /// `amount * fraction / ONE`, rounded down.
  pub fn mul_mantissa(amount: Balance, fraction: Balance) -> Option<Balance> {
    multiply_by_rational_with_rounding(amount, fraction, ONE, Rounding::Down)
  }

  /// `part * ONE / total`, rounded down. `None` when `total` is zero.
  pub fn to_mantissa(part: Balance, total: Balance) -> Option<Balance> {
    if total == 0 {
      return None;
    }
    multiply_by_rational_with_rounding(part, ONE, total, Rounding::Down)
  }

}
