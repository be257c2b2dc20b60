//! Permit authorizer.
//!
//! Permits are EIP-712 typed-data signatures over the engine as spender. Signed permits
//! are verified against the target's own domain, consume the owner's (or the position's)
//! nonce and install the same approval the owner could have granted directly. Unsigned
//! permits are skipped: the caller is expected to have approved the engine already.

use crate::pallet::{Config, Error, Event, Pallet, PermitNonces, PositionNonces};
use crate::types::*;
use alloc::vec::Vec;
use frame::deps::frame_support::{
  ensure,
  traits::{
    Get,
    fungibles::{approvals, metadata},
  },
};
use frame::deps::sp_runtime::{DispatchError, DispatchResult};
use polkadot_sdk::sp_core::H160;
use polkadot_sdk::sp_io::{crypto::secp256k1_ecdsa_recover, hashing::keccak_256};
use primitives::AssetInspector;

pub const DOMAIN_TYPE: &[u8] =
  b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
pub const DOMAIN_TYPE_WITHOUT_VERSION: &[u8] =
  b"EIP712Domain(string name,uint256 chainId,address verifyingContract)";
pub const TOKEN_PERMIT_TYPE: &[u8] =
  b"Permit(address owner,address spender,uint256 value,uint256 nonce,uint256 deadline)";
pub const BORROW_PERMIT_TYPE: &[u8] =
  b"BorrowPermit(address owner,address spender,uint256 value,uint256 nonce,uint256 deadline)";
pub const POSITION_PERMIT_TYPE: &[u8] =
  b"Permit(address spender,uint256 tokenId,uint256 nonce,uint256 deadline)";
pub const ALLOWANCE_DETAILS_TYPE: &[u8] =
  b"PermitDetails(address token,uint160 amount,uint48 expiration,uint48 nonce)";
pub const ALLOWANCE_SINGLE_TYPE: &[u8] = b"PermitSingle(PermitDetails details,address spender,uint256 sigDeadline)PermitDetails(address token,uint160 amount,uint48 expiration,uint48 nonce)";
pub const ALLOWANCE_BATCH_TYPE: &[u8] = b"PermitBatch(PermitDetails[] details,address spender,uint256 sigDeadline)PermitDetails(address token,uint160 amount,uint48 expiration,uint48 nonce)";

/// Version of token and borrowable domains
pub const DOMAIN_VERSION: &[u8] = b"1";

/// ABI head encoder for static typed-data members (32-byte words)
#[derive(Default)]
struct Words(Vec<u8>);

impl Words {
  fn hash(mut self, word: [u8; 32]) -> Self {
    self.0.extend_from_slice(&word);
    self
  }

  fn address(mut self, address: &[u8; 20]) -> Self {
    self.0.extend_from_slice(&[0u8; 12]);
    self.0.extend_from_slice(address);
    self
  }

  fn uint(mut self, value: u128) -> Self {
    self.0.extend_from_slice(&[0u8; 16]);
    self.0.extend_from_slice(&value.to_be_bytes());
    self
  }

  fn keccak(self) -> [u8; 32] {
    keccak_256(&self.0)
  }
}

/// Separator of a typed-data domain on chain `chain_id`
pub fn domain_separator(domain: &PermitDomain, chain_id: u64) -> [u8; 32] {
  let words = match &domain.version {
    Some(version) => Words::default()
      .hash(keccak_256(DOMAIN_TYPE))
      .hash(keccak_256(&domain.name))
      .hash(keccak_256(version)),
    None => Words::default()
      .hash(keccak_256(DOMAIN_TYPE_WITHOUT_VERSION))
      .hash(keccak_256(&domain.name)),
  };
  words
    .uint(chain_id as u128)
    .address(&domain.verifying_contract)
    .keccak()
}

/// `keccak256(0x19 0x01 ‖ domainSeparator ‖ structHash)`
pub fn typed_data_digest(domain_separator: &[u8; 32], struct_hash: &[u8; 32]) -> [u8; 32] {
  let mut message = [0u8; 66];
  message[0] = 0x19;
  message[1] = 0x01;
  message[2..34].copy_from_slice(domain_separator);
  message[34..].copy_from_slice(struct_hash);
  keccak_256(&message)
}

/// Struct hash of an owner/spender/value allowance (`Permit` and `BorrowPermit`)
pub fn allowance_struct_hash(
  type_string: &[u8],
  owner: &H160,
  spender: &H160,
  value: Balance,
  nonce: u64,
  deadline: u64,
) -> [u8; 32] {
  Words::default()
    .hash(keccak_256(type_string))
    .address(&owner.0)
    .address(&spender.0)
    .uint(value)
    .uint(nonce as u128)
    .uint(deadline as u128)
    .keccak()
}

/// Struct hash of a position transfer permit
pub fn position_struct_hash(
  spender: &H160,
  position: PositionId,
  nonce: u64,
  deadline: u64,
) -> [u8; 32] {
  Words::default()
    .hash(keccak_256(POSITION_PERMIT_TYPE))
    .address(&spender.0)
    .uint(position as u128)
    .uint(nonce as u128)
    .uint(deadline as u128)
    .keccak()
}

/// Struct hash of one registry allowance entry
pub fn details_struct_hash(details: &AllowanceDetails) -> Result<[u8; 32], PermitEncodingError> {
  let token = details
    .token
    .token_address()
    .ok_or(PermitEncodingError::NativeToken)?;
  Ok(
    Words::default()
      .hash(keccak_256(ALLOWANCE_DETAILS_TYPE))
      .address(&token)
      .uint(details.amount)
      .uint(details.expiration as u128)
      .uint(details.nonce as u128)
      .keccak(),
  )
}

/// Allowance entries a registry permit signs over
#[derive(Clone, Copy, Debug)]
pub enum RegistryDetails<'a> {
  Single(&'a AllowanceDetails),
  Batch(&'a [AllowanceDetails]),
}

impl<'a> RegistryDetails<'a> {
  pub fn entries(self) -> &'a [AllowanceDetails] {
    match self {
      RegistryDetails::Single(details) => core::slice::from_ref(details),
      RegistryDetails::Batch(details) => details,
    }
  }
}

/// Struct hash of a single or batch registry permit
pub fn registry_struct_hash(
  details: RegistryDetails,
  spender: &H160,
  sig_deadline: u64,
) -> Result<[u8; 32], PermitEncodingError> {
  let (type_string, details_hash) = match details {
    RegistryDetails::Single(entry) => (ALLOWANCE_SINGLE_TYPE, details_struct_hash(entry)?),
    RegistryDetails::Batch(entries) => {
      let mut hashes = Vec::with_capacity(entries.len() * 32);
      for entry in entries {
        hashes.extend_from_slice(&details_struct_hash(entry)?);
      }
      (ALLOWANCE_BATCH_TYPE, keccak_256(&hashes))
    }
  };
  Ok(
    Words::default()
      .hash(keccak_256(type_string))
      .hash(details_hash)
      .address(&spender.0)
      .uint(sig_deadline as u128)
      .keccak(),
  )
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PermitEncodingError {
  /// The native currency has no token address
  NativeToken,
}

/// Address that signed `digest`; `v` may be given as 0/1 or 27/28.
pub fn recover_signer(digest: &[u8; 32], signature: &EcdsaSignature) -> Option<H160> {
  let mut sig = signature.0;
  if sig[64] >= 27 {
    sig[64] -= 27;
  }
  let public = secp256k1_ecdsa_recover(&sig, digest).ok()?;
  Some(H160::from_slice(&keccak_256(&public)[12..]))
}

impl<T: Config> Pallet<T> {
  /// Verify and install every signed permit. Returns the positions authorized by
  /// position permits in this call.
  pub(crate) fn apply_permits(
    caller: &T::AccountId,
    collection: CollectionId,
    permits: &[Permit],
  ) -> Result<Vec<PositionId>, DispatchError> {
    let mut permitted = Vec::new();
    for permit in permits {
      let Some(signature) = &permit.signature else {
        continue;
      };

      let owner = match &permit.data {
        PermitData::Token {
          token,
          owner,
          value,
          deadline,
        } => {
          Self::apply_token_permit(caller, *token, owner, *value, *deadline, signature)?;
          *owner
        }
        PermitData::Borrow {
          index,
          owner,
          value,
          deadline,
        } => {
          Self::apply_borrow_permit(caller, collection, *index, owner, *value, *deadline, signature)?;
          *owner
        }
        PermitData::Shares {
          index,
          owner,
          value,
          deadline,
        } => {
          Self::apply_share_permit(caller, collection, *index, owner, *value, *deadline, signature)?;
          *owner
        }
        PermitData::Position { position, deadline } => {
          let signer = Self::apply_position_permit(collection, *position, *deadline, signature)?;
          permitted.push(*position);
          signer
        }
        PermitData::AllowanceSingle {
          details,
          owner,
          sig_deadline,
        } => {
          Self::apply_registry_permit(
            caller,
            RegistryDetails::Single(details),
            owner,
            *sig_deadline,
            signature,
          )?;
          *owner
        }
        PermitData::AllowanceBatch {
          details,
          owner,
          sig_deadline,
        } => {
          Self::apply_registry_permit(
            caller,
            RegistryDetails::Batch(details),
            owner,
            *sig_deadline,
            signature,
          )?;
          *owner
        }
      };

      log::debug!(
        target: crate::LOG_TARGET,
        "applied {:?} permit of {:?}",
        permit.data.kind(),
        owner,
      );
      Self::deposit_event(Event::PermitApplied {
        owner,
        kind: permit.data.kind(),
      });
    }
    Ok(permitted)
  }

  fn spender_address() -> H160 {
    T::AddressMapping::into_address(&Self::account_id())
  }

  fn ensure_owner_is_caller(caller: &T::AccountId, owner: &H160) -> DispatchResult {
    ensure!(
      T::AddressMapping::into_account_id(owner) == *caller,
      Error::<T>::InvalidPermitOwner
    );
    Ok(())
  }

  fn ensure_signed_by(
    domain: &PermitDomain,
    struct_hash: &[u8; 32],
    signature: &EcdsaSignature,
    signer: &H160,
  ) -> DispatchResult {
    let separator = domain_separator(domain, T::ChainId::get());
    let digest = typed_data_digest(&separator, struct_hash);
    ensure!(
      recover_signer(&digest, signature).as_ref() == Some(signer),
      Error::<T>::InvalidSignature
    );
    Ok(())
  }

  /// Domain of a pallet-assets token
  pub fn token_domain(token: AssetKind) -> Result<PermitDomain, DispatchError> {
    let (id, verifying_contract) = match (token.local_id(), token.token_address()) {
      (Some(id), Some(address)) => (id, address),
      _ => return Err(Error::<T>::UnsupportedToken.into()),
    };
    Ok(PermitDomain {
      name: <T::Assets as metadata::Inspect<T::AccountId>>::name(id),
      version: Some(DOMAIN_VERSION.to_vec()),
      verifying_contract,
    })
  }

  fn use_permit_nonce(verifying_contract: [u8; 20], owner: &H160) -> u64 {
    PermitNonces::<T>::mutate(verifying_contract, owner, |nonce| {
      let current = *nonce;
      *nonce = nonce.saturating_add(1);
      current
    })
  }

  fn apply_token_permit(
    caller: &T::AccountId,
    token: AssetKind,
    owner: &H160,
    value: Balance,
    deadline: u64,
    signature: &EcdsaSignature,
  ) -> DispatchResult {
    Self::ensure_not_expired(deadline)?;
    Self::ensure_owner_is_caller(caller, owner)?;
    let domain = Self::token_domain(token)?;
    let id = token.local_id().ok_or(Error::<T>::UnsupportedToken)?;

    let nonce = Self::use_permit_nonce(domain.verifying_contract, owner);
    let struct_hash = allowance_struct_hash(
      TOKEN_PERMIT_TYPE,
      owner,
      &Self::spender_address(),
      value,
      nonce,
      deadline,
    );
    Self::ensure_signed_by(&domain, &struct_hash, signature, owner)?;

    <T::Assets as approvals::Mutate<T::AccountId>>::approve(id, caller, &Self::account_id(), value)
  }

  fn apply_borrow_permit(
    caller: &T::AccountId,
    collection: CollectionId,
    index: BorrowableIndex,
    owner: &H160,
    value: Balance,
    deadline: u64,
    signature: &EcdsaSignature,
  ) -> DispatchResult {
    Self::ensure_not_expired(deadline)?;
    Self::ensure_owner_is_caller(caller, owner)?;
    ensure!(index < 2, Error::<T>::InvalidBorrowableIndex);
    let domain = T::Borrowables::permit_domain(collection, index);

    let nonce = Self::use_permit_nonce(domain.verifying_contract, owner);
    let struct_hash = allowance_struct_hash(
      BORROW_PERMIT_TYPE,
      owner,
      &Self::spender_address(),
      value,
      nonce,
      deadline,
    );
    Self::ensure_signed_by(&domain, &struct_hash, signature, owner)?;

    T::Borrowables::borrow_approve(collection, index, caller, &Self::account_id(), value)
  }

  /// Share allowance on a borrowable; shares one nonce sequence with borrow permits
  fn apply_share_permit(
    caller: &T::AccountId,
    collection: CollectionId,
    index: BorrowableIndex,
    owner: &H160,
    value: Balance,
    deadline: u64,
    signature: &EcdsaSignature,
  ) -> DispatchResult {
    Self::ensure_not_expired(deadline)?;
    Self::ensure_owner_is_caller(caller, owner)?;
    ensure!(index < 2, Error::<T>::InvalidBorrowableIndex);
    let domain = T::Borrowables::permit_domain(collection, index);

    let nonce = Self::use_permit_nonce(domain.verifying_contract, owner);
    let struct_hash = allowance_struct_hash(
      TOKEN_PERMIT_TYPE,
      owner,
      &Self::spender_address(),
      value,
      nonce,
      deadline,
    );
    Self::ensure_signed_by(&domain, &struct_hash, signature, owner)?;

    T::Borrowables::share_approve(collection, index, caller, &Self::account_id(), value)
  }

  /// Returns the signer, who must own the position
  fn apply_position_permit(
    collection: CollectionId,
    position: PositionId,
    deadline: u64,
    signature: &EcdsaSignature,
  ) -> Result<H160, DispatchError> {
    Self::ensure_not_expired(deadline)?;
    let owner = T::Positions::owner_of(collection, position).ok_or(Error::<T>::UnknownPosition)?;
    let domain = T::Positions::permit_domain(collection);

    let nonce = PositionNonces::<T>::mutate(domain.verifying_contract, position, |nonce| {
      let current = *nonce;
      *nonce = nonce.saturating_add(1);
      current
    });
    let struct_hash = position_struct_hash(&Self::spender_address(), position, nonce, deadline);
    let separator = domain_separator(&domain, T::ChainId::get());
    let signer = recover_signer(&typed_data_digest(&separator, &struct_hash), signature)
      .filter(|signer| T::AddressMapping::into_account_id(signer) == owner)
      .ok_or(Error::<T>::InvalidSignature)?;

    T::Positions::approve(collection, position, &owner, &Self::account_id())?;
    Ok(signer)
  }

  fn apply_registry_permit(
    caller: &T::AccountId,
    details: RegistryDetails,
    owner: &H160,
    sig_deadline: u64,
    signature: &EcdsaSignature,
  ) -> DispatchResult {
    Self::ensure_not_expired(sig_deadline)?;
    Self::ensure_owner_is_caller(caller, owner)?;
    let router = Self::account_id();
    for entry in details.entries() {
      ensure!(
        entry.nonce == T::AllowanceRegistry::nonce(caller, entry.token, &router),
        Error::<T>::InvalidNonce
      );
    }

    let struct_hash = registry_struct_hash(details, &Self::spender_address(), sig_deadline)
      .map_err(|_| Error::<T>::UnsupportedToken)?;
    Self::ensure_signed_by(
      &T::AllowanceRegistry::domain(),
      &struct_hash,
      signature,
      owner,
    )?;

    for entry in details.entries() {
      T::AllowanceRegistry::permit(caller, &router, entry)?;
    }
    Ok(())
  }
}
