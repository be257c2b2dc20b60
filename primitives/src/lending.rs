//! Lending pool descriptors shared between the router and its collaborators.

use crate::AssetKind;
use codec::{Decode, DecodeWithMemTracking, Encode, MaxEncodedLen};
use scale_info::TypeInfo;

#[cfg(not(feature = "std"))]
extern crate alloc;

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;
#[cfg(feature = "std")]
use std::vec::Vec;

/// Key of a lending pool (one collateral over one liquidity pool)
pub type CollectionId = u32;
/// Identifier of a collateral position inside a collection
pub type PositionId = u64;
/// Index of a borrowable side (0 or 1)
pub type BorrowableIndex = u8;

/// Accounts and tokens forming one lending pool.
///
/// `borrowables[i]` lends `tokens[i]`, the two underlyings of the liquidity pool.
#[derive(
  Clone, Debug, Decode, DecodeWithMemTracking, Encode, Eq, MaxEncodedLen, PartialEq, TypeInfo,
)]
pub struct LendingPool<AccountId> {
  /// Accounting account holding deposited liquidity
  pub collateral: AccountId,
  /// Position token issuing the collateral NFTs
  pub position_token: AccountId,
  /// Borrowable accounts, one per underlying
  pub borrowables: [AccountId; 2],
  /// Underlying tokens of the liquidity pool
  pub tokens: [AssetKind; 2],
}

impl<AccountId> LendingPool<AccountId> {
  pub fn borrowable(&self, index: BorrowableIndex) -> Option<&AccountId> {
    self.borrowables.get(index as usize)
  }

  pub fn token(&self, index: BorrowableIndex) -> Option<AssetKind> {
    self.tokens.get(index as usize).copied()
  }
}

/// Tick range of a concentrated-liquidity position
#[derive(
  Clone,
  Copy,
  Debug,
  Decode,
  DecodeWithMemTracking,
  Encode,
  Eq,
  MaxEncodedLen,
  PartialEq,
  TypeInfo,
)]
pub struct TickRange {
  pub fee: u32,
  pub tick_lower: i32,
  pub tick_upper: i32,
}

/// Typed-data domain of a permit target.
///
/// `version` is omitted from the separator when `None` (allowance registry style).
#[derive(Clone, Debug, Decode, Encode, Eq, PartialEq, TypeInfo)]
pub struct PermitDomain {
  pub name: Vec<u8>,
  pub version: Option<Vec<u8>>,
  pub verifying_contract: [u8; 20],
}
