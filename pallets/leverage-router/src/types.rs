use alloc::vec::Vec;
use codec::{Decode, DecodeWithMemTracking, Encode, MaxEncodedLen};
use polkadot_sdk::frame_support::pallet_prelude::*;
use polkadot_sdk::sp_core::H160;
use scale_info::TypeInfo;

pub use primitives::{
  AssetKind, Balance, BorrowableIndex, CollectionId, LendingPool, PermitDomain, PositionId,
  TickRange,
};

/// Maximum number of entries in a batch allowance permit
pub const MAX_BATCH_DETAILS: u32 = 16;

/// Lending pool lookup by collection
pub trait LendingPoolRegistry<AccountId> {
  fn lending_pool(collection: CollectionId) -> Option<LendingPool<AccountId>>;
}

/// Accounting layer of the borrowables.
///
/// Borrow balances, interest and the collateral-factor checks all live behind this trait.
pub trait BorrowableApi<AccountId> {
  /// Lend `amount` of the underlying to `receiver`, debited to `position`.
  ///
  /// When `data` is not empty the borrowable must call [`BorrowCallee::on_borrow`] on the
  /// engine before verifying that the position is still sufficiently collateralized.
  fn borrow(
    collection: CollectionId,
    index: BorrowableIndex,
    operator: &AccountId,
    position: PositionId,
    receiver: &AccountId,
    amount: Balance,
    data: Vec<u8>,
  ) -> DispatchResult;

  /// Settle the underlying already transferred to the borrowable against the debt of
  /// `position`. Returns the amount repaid.
  fn repay(
    collection: CollectionId,
    index: BorrowableIndex,
    position: PositionId,
  ) -> Result<Balance, DispatchError>;

  /// Current debt of `position`, interest included
  fn borrow_balance(collection: CollectionId, index: BorrowableIndex, position: PositionId)
  -> Balance;

  /// Install a borrow allowance from `owner` to `spender`
  fn borrow_approve(
    collection: CollectionId,
    index: BorrowableIndex,
    owner: &AccountId,
    spender: &AccountId,
    amount: Balance,
  ) -> DispatchResult;

  /// Typed-data domain used by borrow and share permits
  fn permit_domain(collection: CollectionId, index: BorrowableIndex) -> PermitDomain;

  /// Turn the underlying already transferred to the borrowable into shares for `minter`.
  /// Returns the shares minted.
  fn mint(
    collection: CollectionId,
    index: BorrowableIndex,
    minter: &AccountId,
  ) -> Result<Balance, DispatchError>;

  /// Burn `shares` of `owner` and send the underlying to `to`. An `operator` other than
  /// the owner spends the owner's share allowance. Returns the underlying amount.
  fn redeem(
    collection: CollectionId,
    index: BorrowableIndex,
    operator: &AccountId,
    owner: &AccountId,
    shares: Balance,
    to: &AccountId,
  ) -> Result<Balance, DispatchError>;

  /// Install a share allowance from `owner` to `spender`
  fn share_approve(
    collection: CollectionId,
    index: BorrowableIndex,
    owner: &AccountId,
    spender: &AccountId,
    amount: Balance,
  ) -> DispatchResult;

  /// Settle the underlying already transferred to the borrowable against a position in
  /// shortfall and seize collateral to `liquidator`.
  ///
  /// Returns the seized position id and the amount repaid.
  fn liquidate(
    collection: CollectionId,
    index: BorrowableIndex,
    position: PositionId,
    liquidator: &AccountId,
  ) -> Result<(PositionId, Balance), DispatchError>;
}

/// Position-tokenization layer: ownership and liquidity of collateral positions
pub trait PositionToken<AccountId> {
  fn owner_of(collection: CollectionId, position: PositionId) -> Option<AccountId>;

  /// Whether `operator` holds a transfer approval for `position`
  fn is_approved(collection: CollectionId, position: PositionId, operator: &AccountId) -> bool;

  fn approve(
    collection: CollectionId,
    position: PositionId,
    owner: &AccountId,
    spender: &AccountId,
  ) -> DispatchResult;

  /// Move `position` from `from` to `to`; `operator` must be the owner or approved.
  fn transfer(
    collection: CollectionId,
    operator: &AccountId,
    from: &AccountId,
    to: &AccountId,
    position: PositionId,
  ) -> DispatchResult;

  /// Liquidity amount backing `position`
  fn liquidity(collection: CollectionId, position: PositionId) -> Balance;

  /// Create a position with zero liquidity owned by `to`
  fn mint_empty(
    collection: CollectionId,
    to: &AccountId,
    range: Option<TickRange>,
  ) -> Result<PositionId, DispatchError>;

  /// Add the LP tokens of `from` to the liquidity of `position`
  fn deposit(
    collection: CollectionId,
    position: PositionId,
    from: &AccountId,
    lp_amount: Balance,
  ) -> DispatchResult;

  /// Split `fraction` (1e18 mantissa) of `position` into a new position sent to `to`.
  ///
  /// When `data` is not empty the position token must call
  /// [`PositionReceiver::on_position_received`] on `to` before verifying the source position.
  fn redeem(
    collection: CollectionId,
    operator: &AccountId,
    to: &AccountId,
    position: PositionId,
    fraction: Balance,
    data: Vec<u8>,
  ) -> Result<PositionId, DispatchError>;

  /// Burn `position` and send its LP tokens to `to`. Returns the LP amount.
  fn withdraw(
    collection: CollectionId,
    operator: &AccountId,
    position: PositionId,
    to: &AccountId,
  ) -> Result<Balance, DispatchError>;

  /// Typed-data domain used by position permits
  fn permit_domain(collection: CollectionId) -> PermitDomain;
}

/// Liquidity pool underlying a collection
pub trait LiquidityPoolApi<AccountId> {
  /// Pool reserves of token0 and token1
  fn reserves(collection: CollectionId) -> (Balance, Balance);

  /// LP token minted by the pool
  fn lp_token(collection: CollectionId) -> AssetKind;

  /// Move exactly `amount0`/`amount1` from `who` into the pool and mint LP tokens to `who`
  fn add_liquidity(
    collection: CollectionId,
    who: &AccountId,
    amount0: Balance,
    amount1: Balance,
  ) -> Result<Balance, DispatchError>;

  /// Burn `liquidity` LP tokens of `who` and send the underlyings to `to`
  fn remove_liquidity(
    collection: CollectionId,
    who: &AccountId,
    liquidity: Balance,
    to: &AccountId,
  ) -> Result<(Balance, Balance), DispatchError>;
}

/// Converts between the native currency and its wrapped asset
pub trait NativeWrapper<AccountId> {
  fn wrap(who: &AccountId, amount: Balance) -> DispatchResult;
  fn unwrap(who: &AccountId, amount: Balance) -> DispatchResult;
}

/// Shared allowance registry accepting signed allowances for any token
pub trait AllowanceRegistry<AccountId> {
  fn domain() -> PermitDomain;

  /// Next nonce expected for `(owner, token, spender)`
  fn nonce(owner: &AccountId, token: AssetKind, spender: &AccountId) -> u64;

  /// Record a verified allowance and consume its nonce
  fn permit(owner: &AccountId, spender: &AccountId, details: &AllowanceDetails) -> DispatchResult;

  fn transfer_from(
    owner: &AccountId,
    spender: &AccountId,
    to: &AccountId,
    token: AssetKind,
    amount: Balance,
  ) -> DispatchResult;
}

/// Maps 20-byte signer addresses to runtime accounts and back
pub trait AddressMapping<AccountId> {
  fn into_account_id(address: &H160) -> AccountId;
  fn into_address(account: &AccountId) -> H160;
}

/// Hook invoked by a borrowable while lending with callback data
pub trait BorrowCallee<AccountId> {
  fn on_borrow(
    sender: &AccountId,
    borrower: &AccountId,
    position: PositionId,
    borrow_amount: Balance,
    data: &[u8],
  ) -> DispatchResult;
}

/// Hook invoked by the position token when it hands a position over with callback data
pub trait PositionReceiver<AccountId> {
  fn on_position_received(
    sender: &AccountId,
    operator: &AccountId,
    from: &AccountId,
    position: PositionId,
    data: &[u8],
  ) -> DispatchResult;
}

/// Destination of funds moved by an action
#[derive(
  Clone, Debug, Decode, DecodeWithMemTracking, Encode, Eq, MaxEncodedLen, PartialEq, TypeInfo,
)]
pub enum Recipient<AccountId> {
  /// The account that signed the call
  Caller,
  /// The engine account, funds stay available to later actions
  Router,
  Account(AccountId),
}

/// Source of funds for a repayment
#[derive(
  Clone, Debug, Decode, DecodeWithMemTracking, Encode, Eq, MaxEncodedLen, PartialEq, TypeInfo,
)]
pub enum Payer<AccountId> {
  /// Pulled from the caller
  Caller,
  /// Spent from the engine's holdings, surplus sent to `refund_to`
  Router { refund_to: Recipient<AccountId> },
}

/// One step of an action program
#[derive(
  Clone, Debug, Decode, DecodeWithMemTracking, Encode, Eq, MaxEncodedLen, PartialEq, TypeInfo,
)]
pub enum Action<AccountId> {
  /// Create a new position owned by the engine until the call returns
  MintEmpty { range: Option<TickRange> },
  /// Add caller funds as collateral to the current position
  Mint {
    lp_amount_user: Balance,
    amount0_desired: Balance,
    amount1_desired: Balance,
    amount0_min: Balance,
    amount1_min: Balance,
  },
  /// Redeem `fraction` (1e18 mantissa) of the position and remove its liquidity
  Redeem {
    fraction: Balance,
    amount0_min: Balance,
    amount1_min: Balance,
    to: Recipient<AccountId>,
  },
  Borrow {
    index: BorrowableIndex,
    amount: Balance,
    to: Recipient<AccountId>,
  },
  /// Repay up to `amount_max`, clamped to the outstanding debt
  Repay {
    index: BorrowableIndex,
    amount_max: Balance,
    payer: Payer<AccountId>,
  },
  /// Add the engine's tokens to the pool at the optimal ratio
  AddLiquidity {
    amount0_desired: Balance,
    amount1_desired: Balance,
    amount0_min: Balance,
    amount1_min: Balance,
  },
  /// Remove the LP tokens held by the engine (or of the redeemed position)
  RemoveLiquidity {
    amount0_min: Balance,
    amount1_min: Balance,
    to: Recipient<AccountId>,
  },
  /// Borrow the difference between desired and supplied amounts and add it as collateral
  BorrowAndMint {
    amount0_user: Balance,
    amount1_user: Balance,
    amount0_desired: Balance,
    amount1_desired: Balance,
    amount0_min: Balance,
    amount1_min: Balance,
  },
  /// Redeem `liquidity` of the position and repay both debts with the proceeds
  Deleverage {
    liquidity: Balance,
    amount0_min: Balance,
    amount1_min: Balance,
  },
  WithdrawToken {
    token: AssetKind,
    to: Recipient<AccountId>,
  },
  WithdrawNative { to: Recipient<AccountId> },
  /// Deposit every LP token held by the engine into the position
  MintCollateral,
}

/// Arena record of an action program; `next` indexes the following record.
#[derive(
  Clone, Debug, Decode, DecodeWithMemTracking, Encode, Eq, MaxEncodedLen, PartialEq, TypeInfo,
)]
pub struct ActionNode<AccountId> {
  pub action: Action<AccountId>,
  pub next: Option<u32>,
}

/// 65-byte `r ‖ s ‖ v` secp256k1 signature
#[derive(
  Clone, Copy, Debug, Decode, DecodeWithMemTracking, Encode, Eq, MaxEncodedLen, PartialEq, TypeInfo,
)]
pub struct EcdsaSignature(pub [u8; 65]);

/// Allowance entry of a registry permit
#[derive(
  Clone, Debug, Decode, DecodeWithMemTracking, Encode, Eq, MaxEncodedLen, PartialEq, TypeInfo,
)]
pub struct AllowanceDetails {
  pub token: AssetKind,
  pub amount: Balance,
  /// Unix seconds, 0 for no expiry
  pub expiration: u64,
  pub nonce: u64,
}

/// What a permit authorizes
#[derive(
  Clone, Debug, Decode, DecodeWithMemTracking, Encode, Eq, MaxEncodedLen, PartialEq, TypeInfo,
)]
pub enum PermitData {
  /// Token allowance from `owner` to the engine
  Token {
    token: AssetKind,
    owner: H160,
    value: Balance,
    deadline: u64,
  },
  /// Borrow allowance on one borrowable of the collection
  Borrow {
    index: BorrowableIndex,
    owner: H160,
    value: Balance,
    deadline: u64,
  },
  /// Share allowance on one borrowable of the collection
  Shares {
    index: BorrowableIndex,
    owner: H160,
    value: Balance,
    deadline: u64,
  },
  /// Transfer approval of a collateral position, signed by its owner
  Position { position: PositionId, deadline: u64 },
  /// Registry allowance for one token
  AllowanceSingle {
    details: AllowanceDetails,
    owner: H160,
    sig_deadline: u64,
  },
  /// Registry allowances for several tokens
  AllowanceBatch {
    details: BoundedVec<AllowanceDetails, ConstU32<MAX_BATCH_DETAILS>>,
    owner: H160,
    sig_deadline: u64,
  },
}

impl PermitData {
  pub fn kind(&self) -> PermitKind {
    match self {
      PermitData::Token { .. } => PermitKind::Token,
      PermitData::Borrow { .. } => PermitKind::Borrow,
      PermitData::Shares { .. } => PermitKind::Shares,
      PermitData::Position { .. } => PermitKind::Position,
      PermitData::AllowanceSingle { .. } => PermitKind::AllowanceSingle,
      PermitData::AllowanceBatch { .. } => PermitKind::AllowanceBatch,
    }
  }
}

#[derive(
  Clone, Copy, Debug, Decode, DecodeWithMemTracking, Encode, Eq, MaxEncodedLen, PartialEq, TypeInfo,
)]
pub enum PermitKind {
  Token,
  Borrow,
  Shares,
  Position,
  AllowanceSingle,
  AllowanceBatch,
}

/// A delegated authorization; without a signature it is a no-op.
#[derive(
  Clone, Debug, Decode, DecodeWithMemTracking, Encode, Eq, MaxEncodedLen, PartialEq, TypeInfo,
)]
pub struct Permit {
  pub data: PermitData,
  pub signature: Option<EcdsaSignature>,
}

/// State of the call being executed
#[derive(Clone, Debug, Decode, Encode, Eq, MaxEncodedLen, PartialEq, TypeInfo)]
pub struct ExecutionContext<AccountId> {
  pub caller: AccountId,
  pub collection: CollectionId,
  pub pool: LendingPool<AccountId>,
  /// `None` until a position is supplied or minted
  pub position: Option<PositionId>,
  /// Account the position NFT returns to
  pub position_owner: AccountId,
  pub created: bool,
  pub with_collateral_transfer: bool,
  /// Attached native value not wrapped yet
  pub native_available: Balance,
  /// Position received through the receipt hook, awaiting withdrawal
  pub redeemed: Option<PositionId>,
  pub steps: u32,
  pub borrowed: [Balance; 2],
  pub repaid: [Balance; 2],
}

impl<AccountId: Clone> ExecutionContext<AccountId> {
  pub fn new(
    caller: AccountId,
    collection: CollectionId,
    pool: LendingPool<AccountId>,
    with_collateral_transfer: bool,
    native_available: Balance,
  ) -> Self {
    Self {
      position_owner: caller.clone(),
      caller,
      collection,
      pool,
      position: None,
      created: false,
      with_collateral_transfer,
      native_available,
      redeemed: None,
      steps: 0,
      borrowed: [0; 2],
      repaid: [0; 2],
    }
  }
}

/// Callback the engine is suspended on, committed to the continuation bytes
#[derive(Clone, Debug, Decode, Encode, Eq, MaxEncodedLen, PartialEq, TypeInfo)]
pub enum PendingCallback {
  Borrow {
    collection: CollectionId,
    index: BorrowableIndex,
    position: PositionId,
    continuation: [u8; 32],
  },
  Redeem {
    collection: CollectionId,
    position: PositionId,
    continuation: [u8; 32],
  },
}

/// Remainder of a chain handed through a collaborator as opaque callback data
#[derive(Clone, Debug, Decode, Encode, Eq, PartialEq, TypeInfo)]
pub enum Continuation<AccountId> {
  Borrow {
    collection: CollectionId,
    index: BorrowableIndex,
    position: PositionId,
    actions: Vec<Action<AccountId>>,
  },
  Redeem {
    collection: CollectionId,
    position: PositionId,
    actions: Vec<Action<AccountId>>,
  },
}

/// What a successful call produced
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExecutionOutcome {
  pub position: Option<PositionId>,
  pub created: bool,
  pub borrowed: [Balance; 2],
  pub repaid: [Balance; 2],
  /// Seized position and settled amount of a liquidation
  pub seized: Option<(PositionId, Balance)>,
}
