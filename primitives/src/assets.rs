use codec::{Decode, DecodeWithMemTracking, Encode, MaxEncodedLen};
use scale_info::TypeInfo;
use serde::{Deserialize, Serialize};

/// Token an action moves: the chain currency or a `pallet-assets` id.
#[derive(
  Clone,
  Copy,
  Debug,
  Decode,
  DecodeWithMemTracking,
  Default,
  Encode,
  Eq,
  MaxEncodedLen,
  Ord,
  PartialEq,
  PartialOrd,
  TypeInfo,
  Serialize,
  Deserialize,
)]
pub enum AssetKind {
  /// Chain currency held in pallet-balances
  #[default]
  Native,
  Local(u32),
  /// Asset registered from another consensus system
  Foreign(u32),
}

/// Leading bytes of a local asset's token address
pub const LOCAL_ADDRESS_PREFIX: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];
/// Leading bytes of a foreign asset's token address
pub const FOREIGN_ADDRESS_PREFIX: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFE];

pub trait AssetInspector {
  /// `pallet-assets` id, `None` for the chain currency
  fn local_id(&self) -> Option<u32>;
  /// 20-byte address that signed permits name as the token or verifying contract
  fn token_address(&self) -> Option<[u8; 20]>;
}

impl AssetInspector for AssetKind {
  fn local_id(&self) -> Option<u32> {
    match *self {
      AssetKind::Native => None,
      AssetKind::Local(id) | AssetKind::Foreign(id) => Some(id),
    }
  }

  fn token_address(&self) -> Option<[u8; 20]> {
    let (prefix, id) = match *self {
      AssetKind::Native => return None,
      AssetKind::Local(id) => (LOCAL_ADDRESS_PREFIX, id),
      AssetKind::Foreign(id) => (FOREIGN_ADDRESS_PREFIX, id),
    };
    let mut address = [0u8; 20];
    address[..4].copy_from_slice(&prefix);
    address[16..].copy_from_slice(&id.to_be_bytes());
    Some(address)
  }
}
