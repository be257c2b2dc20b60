extern crate alloc;

use crate as pallet_leverage_router;
use crate::types::*;
use codec::{Decode, Encode};
use polkadot_sdk::frame_support::traits::fungible::Mutate as NativeMutate;
use polkadot_sdk::frame_support::traits::fungibles::{Inspect, Mutate, approvals};
use polkadot_sdk::frame_support::traits::tokens::{Fortitude, Precision, Preservation};
use polkadot_sdk::frame_support::{
  Blake2_128Concat, PalletId, Twox64Concat, construct_runtime, derive_impl, ensure,
  parameter_types,
  pallet_prelude::ValueQuery,
  storage_alias,
  traits::{ConstU32, ConstU64, ConstU128, UnixTime},
};
use polkadot_sdk::frame_system;
use polkadot_sdk::sp_core::{H160, U256};
use polkadot_sdk::sp_runtime::{
  BuildStorage, DispatchError, DispatchResult,
  testing::H256,
  traits::{BlakeTwo256, IdentityLookup, IntegerSquareRoot},
};
use primitives::{
  AssetInspector,
  params::{ONE, mul_mantissa},
  pallet_ids::LEVERAGE_ROUTER_PALLET_ID,
};
use std::cell::RefCell;

pub type AccountId = u64;

pub const ALICE: AccountId = 1;
pub const BOB: AccountId = 2;
pub const CHARLIE: AccountId = 3;
/// Holder of the initial LP supply
pub const SEEDER: AccountId = 500;
/// Native backing of the wrapped native asset
pub const VAULT: AccountId = 900;
/// Allowance registry spender account
pub const REGISTRY: AccountId = 901;
pub const ASSET_OWNER: AccountId = 999;

pub const TOKEN0: u32 = 1;
pub const TOKEN1: u32 = 2;
pub const WNATIVE: u32 = 3;

/// Collection over the TOKEN0/TOKEN1 pool
pub const COLLECTION: CollectionId = 1;
/// Collection over the WNATIVE/TOKEN1 pool
pub const NATIVE_COLLECTION: CollectionId = 2;

pub const INITIAL_BALANCE: Balance = 1_000_000_000_000;
pub const BORROWABLE_CASH: Balance = 1_000_000_000_000;
/// Wall clock at genesis, unix seconds
pub const NOW: u64 = 1_000;
pub const DEADLINE: u64 = 2_000;

/// Collateral factor in percent applied by the mock health check
pub const COLLATERAL_FACTOR: u128 = 85;
/// Liquidation incentive in percent
pub const LIQUIDATION_INCENTIVE: u128 = 104;

thread_local! {
    pub static SUPPRESS_CALLBACKS: RefCell<bool> = const { RefCell::new(false) };
    pub static TAMPER_CALLBACKS: RefCell<bool> = const { RefCell::new(false) };
}

/// Collaborators return without calling the engine back
pub fn suppress_callbacks(suppress: bool) {
  SUPPRESS_CALLBACKS.with(|s| *s.borrow_mut() = suppress);
}

fn callbacks_enabled() -> bool {
  !SUPPRESS_CALLBACKS.with(|s| *s.borrow())
}

/// Collaborators append a withdrawal to BOB to the continuation they hand back
pub fn tamper_callbacks(tamper: bool) {
  TAMPER_CALLBACKS.with(|t| *t.borrow_mut() = tamper);
}

/// Callback data as the collaborator hands it back
fn callback_data(data: &[u8]) -> Result<Vec<u8>, DispatchError> {
  if !TAMPER_CALLBACKS.with(|t| *t.borrow()) {
    return Ok(data.to_vec());
  }
  let mut continuation = Continuation::<AccountId>::decode(&mut &data[..])
    .map_err(|_| DispatchError::Other("UndecodableContinuation"))?;
  let injected = Action::WithdrawToken {
    token: AssetKind::Local(TOKEN0),
    to: Recipient::Account(BOB),
  };
  match &mut continuation {
    Continuation::Borrow { actions, .. } | Continuation::Redeem { actions, .. } => {
      actions.push(injected)
    }
  }
  Ok(continuation.encode())
}

pub fn collateral_account(collection: CollectionId) -> AccountId {
  1_000 + collection as AccountId * 10
}

pub fn position_token_account(collection: CollectionId) -> AccountId {
  collateral_account(collection) + 1
}

pub fn borrowable_account(collection: CollectionId, index: BorrowableIndex) -> AccountId {
  collateral_account(collection) + 2 + index as AccountId
}

pub fn pool_account(collection: CollectionId) -> AccountId {
  collateral_account(collection) + 4
}

pub fn lp_asset(collection: CollectionId) -> u32 {
  100 + collection
}

type Block = frame_system::mocking::MockBlock<Test>;

construct_runtime!(
  pub struct Test {
    System: frame_system,
    Balances: polkadot_sdk::pallet_balances,
    Assets: polkadot_sdk::pallet_assets,
    Timestamp: polkadot_sdk::pallet_timestamp,
    LeverageRouter: pallet_leverage_router,
  }
);

#[derive_impl(frame_system::config_preludes::TestDefaultConfig)]
impl frame_system::Config for Test {
  type Block = Block;
  type AccountId = u64;
  type Lookup = IdentityLookup<Self::AccountId>;
  type Hash = H256;
  type Hashing = BlakeTwo256;
  type AccountData = polkadot_sdk::pallet_balances::AccountData<u128>;
}

impl polkadot_sdk::pallet_balances::Config for Test {
  type MaxLocks = ();
  type MaxReserves = ();
  type ReserveIdentifier = [u8; 8];
  type Balance = u128;
  type DustRemoval = ();
  type RuntimeEvent = RuntimeEvent;
  type ExistentialDeposit = ConstU128<1>;
  type AccountStore = System;
  type WeightInfo = ();
  type FreezeIdentifier = ();
  type MaxFreezes = ();
  type RuntimeHoldReason = ();
  type RuntimeFreezeReason = ();
  type DoneSlashHandler = ();
}

impl polkadot_sdk::pallet_assets::Config for Test {
  type RuntimeEvent = RuntimeEvent;
  type Balance = u128;
  type AssetId = u32;
  type AssetIdParameter = u32;
  type Currency = Balances;
  type CreateOrigin = polkadot_sdk::frame_support::traits::AsEnsureOriginWithArg<
    frame_system::EnsureSigned<Self::AccountId>,
  >;
  type ForceOrigin = frame_system::EnsureRoot<Self::AccountId>;
  type AssetDeposit = ConstU128<1>;
  type AssetAccountDeposit = ConstU128<1>;
  type MetadataDepositBase = ConstU128<1>;
  type MetadataDepositPerByte = ConstU128<1>;
  type ApprovalDeposit = ConstU128<1>;
  type StringLimit = ConstU32<50>;
  type Freezer = ();
  type Extra = ();
  type CallbackHandle = ();
  type WeightInfo = ();
  type RemoveItemsLimit = ConstU32<5>;
  type Holder = ();
  type ReserveData = ();
  #[cfg(feature = "runtime-benchmarks")]
  type BenchmarkHelper = ();
}

impl polkadot_sdk::pallet_timestamp::Config for Test {
  type Moment = u64;
  type OnTimestampSet = ();
  type MinimumPeriod = ConstU64<1>;
  type WeightInfo = ();
}

// Collaborator state lives in storage so that it rolls back with the dispatch.

#[storage_alias]
pub type PositionOwners =
  StorageDoubleMap<LendingMock, Twox64Concat, CollectionId, Twox64Concat, PositionId, AccountId>;

#[storage_alias]
pub type PositionApprovals =
  StorageDoubleMap<LendingMock, Twox64Concat, CollectionId, Twox64Concat, PositionId, AccountId>;

#[storage_alias]
pub type PositionLiquidity = StorageDoubleMap<
  LendingMock,
  Twox64Concat,
  CollectionId,
  Twox64Concat,
  PositionId,
  Balance,
  ValueQuery,
>;

#[storage_alias]
pub type PositionRanges =
  StorageDoubleMap<LendingMock, Twox64Concat, CollectionId, Twox64Concat, PositionId, TickRange>;

#[storage_alias]
pub type NextPositionId =
  StorageMap<LendingMock, Twox64Concat, CollectionId, PositionId, ValueQuery>;

#[storage_alias]
pub type Debts = StorageMap<
  LendingMock,
  Blake2_128Concat,
  (CollectionId, BorrowableIndex, PositionId),
  Balance,
  ValueQuery,
>;

#[storage_alias]
pub type Cash =
  StorageMap<LendingMock, Blake2_128Concat, (CollectionId, BorrowableIndex), Balance, ValueQuery>;

#[storage_alias]
pub type BorrowAllowances = StorageMap<
  LendingMock,
  Blake2_128Concat,
  (CollectionId, BorrowableIndex, AccountId, AccountId),
  Balance,
  ValueQuery,
>;

/// Lender shares, one per unit of underlying
#[storage_alias]
pub type LenderShares = StorageMap<
  LendingMock,
  Blake2_128Concat,
  (CollectionId, BorrowableIndex, AccountId),
  Balance,
  ValueQuery,
>;

#[storage_alias]
pub type ShareAllowances = StorageMap<
  LendingMock,
  Blake2_128Concat,
  (CollectionId, BorrowableIndex, AccountId, AccountId),
  Balance,
  ValueQuery,
>;

/// `(owner, token, spender) -> (amount, expiration)`
#[storage_alias]
pub type RegistryAllowances = StorageMap<
  RegistryMock,
  Blake2_128Concat,
  (AccountId, AssetKind, AccountId),
  (Balance, u64),
>;

#[storage_alias]
pub type RegistryNonces =
  StorageMap<RegistryMock, Blake2_128Concat, (AccountId, AssetKind, AccountId), u64, ValueQuery>;

fn asset_id(token: AssetKind) -> Result<u32, DispatchError> {
  token
    .local_id()
    .ok_or(DispatchError::Other("Native token not supported"))
}

fn transfer(token: AssetKind, from: &AccountId, to: &AccountId, amount: Balance) -> DispatchResult {
  if amount == 0 || from == to {
    return Ok(());
  }
  <Assets as Mutate<u64>>::transfer(asset_id(token)?, from, to, amount, Preservation::Expendable)?;
  Ok(())
}

fn balance(token: AssetKind, who: &AccountId) -> Balance {
  token
    .local_id()
    .map(|id| <Assets as Inspect<u64>>::balance(id, who))
    .unwrap_or_default()
}

/// Address of a mock account in the 20-byte signer space
pub fn address_of(account: &AccountId) -> H160 {
  <TruncatedAddressMapping as AddressMapping<AccountId>>::into_address(account)
}

pub struct MockLendingPools;
impl LendingPoolRegistry<AccountId> for MockLendingPools {
  fn lending_pool(collection: CollectionId) -> Option<LendingPool<AccountId>> {
    let tokens = match collection {
      COLLECTION => [AssetKind::Local(TOKEN0), AssetKind::Local(TOKEN1)],
      NATIVE_COLLECTION => [AssetKind::Local(WNATIVE), AssetKind::Local(TOKEN1)],
      _ => return None,
    };
    Some(LendingPool {
      collateral: collateral_account(collection),
      position_token: position_token_account(collection),
      borrowables: [
        borrowable_account(collection, 0),
        borrowable_account(collection, 1),
      ],
      tokens,
    })
  }
}

fn pool_of(collection: CollectionId) -> Result<LendingPool<AccountId>, DispatchError> {
  MockLendingPools::lending_pool(collection).ok_or(DispatchError::Other("UnknownCollection"))
}

/// Debt value against twice the token0 side of the position's liquidity, scaled by the
/// collateral factor
pub fn is_healthy(collection: CollectionId, position: PositionId) -> bool {
  let debt0 = Debts::get((collection, 0, position));
  let debt1 = Debts::get((collection, 1, position));
  if debt0 == 0 && debt1 == 0 {
    return true;
  }

  let (reserve0, reserve1) = MockPools::reserves(collection);
  let supply = <Assets as Inspect<u64>>::total_issuance(lp_asset(collection));
  if reserve1 == 0 || supply == 0 {
    return false;
  }
  let liquidity = PositionLiquidity::get(collection, position);

  let debt_value = U256::from(debt0) + U256::from(debt1) * U256::from(reserve0) / U256::from(reserve1);
  let collateral_value = U256::from(2) * U256::from(liquidity) * U256::from(reserve0) / U256::from(supply);
  debt_value * U256::from(100) <= collateral_value * U256::from(COLLATERAL_FACTOR)
}

fn ensure_healthy(collection: CollectionId, position: PositionId) -> DispatchResult {
  ensure!(
    is_healthy(collection, position),
    DispatchError::Other("InsufficientLiquidity")
  );
  Ok(())
}

pub struct MockBorrowables;
impl MockBorrowables {
  /// Settle what the borrowable received above its tracked cash against `position`
  fn settle(collection: CollectionId, index: BorrowableIndex, position: PositionId) -> Result<Balance, DispatchError> {
    let pool = pool_of(collection)?;
    let borrowable = borrowable_account(collection, index);
    let held = balance(pool.tokens[index as usize], &borrowable);
    let surplus = held.saturating_sub(Cash::get((collection, index)));
    let repaid = Debts::mutate((collection, index, position), |debt| {
      let repaid = surplus.min(*debt);
      *debt -= repaid;
      repaid
    });
    Cash::insert((collection, index), held);
    Ok(repaid)
  }
}

impl BorrowableApi<AccountId> for MockBorrowables {
  fn borrow(
    collection: CollectionId,
    index: BorrowableIndex,
    operator: &AccountId,
    position: PositionId,
    receiver: &AccountId,
    amount: Balance,
    data: Vec<u8>,
  ) -> DispatchResult {
    let pool = pool_of(collection)?;
    let token = pool.token(index).ok_or(DispatchError::Other("InvalidIndex"))?;
    let borrowable = borrowable_account(collection, index);
    let owner = PositionOwners::get(collection, position).ok_or(DispatchError::Other("UnknownPosition"))?;

    if *operator != owner {
      BorrowAllowances::try_mutate((collection, index, owner, *operator), |allowance| {
        *allowance = allowance
          .checked_sub(amount)
          .ok_or(DispatchError::Other("BorrowNotAllowed"))?;
        Ok::<_, DispatchError>(())
      })?;
    }

    transfer(token, &borrowable, receiver, amount)?;
    Cash::mutate((collection, index), |cash| *cash = cash.saturating_sub(amount));
    Debts::mutate((collection, index, position), |debt| *debt += amount);

    if !data.is_empty() && callbacks_enabled() {
      <LeverageRouter as BorrowCallee<AccountId>>::on_borrow(
        &borrowable,
        operator,
        position,
        amount,
        &callback_data(&data)?,
      )?;
    }

    ensure_healthy(collection, position)
  }

  fn repay(
    collection: CollectionId,
    index: BorrowableIndex,
    position: PositionId,
  ) -> Result<Balance, DispatchError> {
    Self::settle(collection, index, position)
  }

  fn borrow_balance(collection: CollectionId, index: BorrowableIndex, position: PositionId) -> Balance {
    Debts::get((collection, index, position))
  }

  fn borrow_approve(
    collection: CollectionId,
    index: BorrowableIndex,
    owner: &AccountId,
    spender: &AccountId,
    amount: Balance,
  ) -> DispatchResult {
    BorrowAllowances::insert((collection, index, *owner, *spender), amount);
    Ok(())
  }

  fn permit_domain(collection: CollectionId, index: BorrowableIndex) -> PermitDomain {
    PermitDomain {
      name: b"Borrowable".to_vec(),
      version: Some(b"1".to_vec()),
      verifying_contract: address_of(&borrowable_account(collection, index)).0,
    }
  }

  fn mint(
    collection: CollectionId,
    index: BorrowableIndex,
    minter: &AccountId,
  ) -> Result<Balance, DispatchError> {
    let pool = pool_of(collection)?;
    let held = balance(pool.tokens[index as usize], &borrowable_account(collection, index));
    let minted = held.saturating_sub(Cash::get((collection, index)));
    ensure!(minted > 0, DispatchError::Other("MintAmountZero"));
    Cash::insert((collection, index), held);
    LenderShares::mutate((collection, index, *minter), |shares| *shares += minted);
    Ok(minted)
  }

  fn redeem(
    collection: CollectionId,
    index: BorrowableIndex,
    operator: &AccountId,
    owner: &AccountId,
    shares: Balance,
    to: &AccountId,
  ) -> Result<Balance, DispatchError> {
    let pool = pool_of(collection)?;
    let token = pool.token(index).ok_or(DispatchError::Other("InvalidIndex"))?;
    ensure!(shares > 0, DispatchError::Other("RedeemAmountZero"));

    if operator != owner {
      ShareAllowances::try_mutate((collection, index, *owner, *operator), |allowance| {
        // Unlimited allowances are not spent
        if *allowance != Balance::MAX {
          *allowance = allowance
            .checked_sub(shares)
            .ok_or(DispatchError::Other("TransferNotAllowed"))?;
        }
        Ok::<_, DispatchError>(())
      })?;
    }
    LenderShares::try_mutate((collection, index, *owner), |held| {
      *held = held
        .checked_sub(shares)
        .ok_or(DispatchError::Other("InsufficientShares"))?;
      Ok::<_, DispatchError>(())
    })?;

    transfer(token, &borrowable_account(collection, index), to, shares)?;
    Cash::mutate((collection, index), |cash| *cash = cash.saturating_sub(shares));
    Ok(shares)
  }

  fn share_approve(
    collection: CollectionId,
    index: BorrowableIndex,
    owner: &AccountId,
    spender: &AccountId,
    amount: Balance,
  ) -> DispatchResult {
    ShareAllowances::insert((collection, index, *owner, *spender), amount);
    Ok(())
  }

  fn liquidate(
    collection: CollectionId,
    index: BorrowableIndex,
    position: PositionId,
    liquidator: &AccountId,
  ) -> Result<(PositionId, Balance), DispatchError> {
    ensure!(
      !is_healthy(collection, position),
      DispatchError::Other("InsufficientShortfall")
    );
    let repaid = Self::settle(collection, index, position)?;

    let (reserve0, reserve1) = MockPools::reserves(collection);
    let supply = <Assets as Inspect<u64>>::total_issuance(lp_asset(collection));
    let value0 = match index {
      0 => U256::from(repaid),
      _ => U256::from(repaid) * U256::from(reserve0) / U256::from(reserve1),
    };
    let seize = value0 * U256::from(supply) * U256::from(LIQUIDATION_INCENTIVE)
      / (U256::from(2) * U256::from(reserve0) * U256::from(100));
    let available = PositionLiquidity::get(collection, position);
    let seize = seize.min(U256::from(available)).as_u128();

    let seized = MockPositions::mint_empty(collection, liquidator, None)?;
    PositionLiquidity::mutate(collection, position, |liquidity| *liquidity -= seize);
    PositionLiquidity::insert(collection, seized, seize);
    Ok((seized, repaid))
  }
}

pub struct MockPositions;
impl MockPositions {
  fn ensure_operator(collection: CollectionId, position: PositionId, operator: &AccountId) -> Result<AccountId, DispatchError> {
    let owner = PositionOwners::get(collection, position).ok_or(DispatchError::Other("UnknownPosition"))?;
    ensure!(
      owner == *operator || Self::is_approved(collection, position, operator),
      DispatchError::Other("NotApproved")
    );
    Ok(owner)
  }
}

impl PositionToken<AccountId> for MockPositions {
  fn owner_of(collection: CollectionId, position: PositionId) -> Option<AccountId> {
    PositionOwners::get(collection, position)
  }

  fn is_approved(collection: CollectionId, position: PositionId, operator: &AccountId) -> bool {
    PositionApprovals::get(collection, position).as_ref() == Some(operator)
  }

  fn approve(
    collection: CollectionId,
    position: PositionId,
    owner: &AccountId,
    spender: &AccountId,
  ) -> DispatchResult {
    ensure!(
      PositionOwners::get(collection, position).as_ref() == Some(owner),
      DispatchError::Other("NotOwner")
    );
    PositionApprovals::insert(collection, position, spender);
    Ok(())
  }

  fn transfer(
    collection: CollectionId,
    operator: &AccountId,
    from: &AccountId,
    to: &AccountId,
    position: PositionId,
  ) -> DispatchResult {
    let owner = Self::ensure_operator(collection, position, operator)?;
    ensure!(owner == *from, DispatchError::Other("NotOwner"));
    PositionOwners::insert(collection, position, to);
    PositionApprovals::remove(collection, position);
    Ok(())
  }

  fn liquidity(collection: CollectionId, position: PositionId) -> Balance {
    PositionLiquidity::get(collection, position)
  }

  fn mint_empty(
    collection: CollectionId,
    to: &AccountId,
    range: Option<TickRange>,
  ) -> Result<PositionId, DispatchError> {
    pool_of(collection)?;
    let position = NextPositionId::mutate(collection, |next| {
      *next += 1;
      *next
    });
    PositionOwners::insert(collection, position, to);
    if let Some(range) = range {
      PositionRanges::insert(collection, position, range);
    }
    Ok(position)
  }

  fn deposit(
    collection: CollectionId,
    position: PositionId,
    from: &AccountId,
    lp_amount: Balance,
  ) -> DispatchResult {
    ensure!(
      PositionOwners::contains_key(collection, position),
      DispatchError::Other("UnknownPosition")
    );
    transfer(
      AssetKind::Local(lp_asset(collection)),
      from,
      &collateral_account(collection),
      lp_amount,
    )?;
    PositionLiquidity::mutate(collection, position, |liquidity| *liquidity += lp_amount);
    Ok(())
  }

  fn redeem(
    collection: CollectionId,
    operator: &AccountId,
    to: &AccountId,
    position: PositionId,
    fraction: Balance,
    data: Vec<u8>,
  ) -> Result<PositionId, DispatchError> {
    Self::ensure_operator(collection, position, operator)?;
    ensure!(
      fraction <= ONE,
      DispatchError::Other("Above100Percent")
    );
    let liquidity = PositionLiquidity::get(collection, position);
    let redeemed = mul_mantissa(liquidity, fraction).ok_or(DispatchError::Other("Overflow"))?;

    let split = Self::mint_empty(collection, to, None)?;
    PositionLiquidity::insert(collection, position, liquidity - redeemed);
    PositionLiquidity::insert(collection, split, redeemed);

    if !data.is_empty() && callbacks_enabled() {
      <LeverageRouter as PositionReceiver<AccountId>>::on_position_received(
        &position_token_account(collection),
        operator,
        &collateral_account(collection),
        split,
        &callback_data(&data)?,
      )?;
    }

    ensure_healthy(collection, position)?;
    Ok(split)
  }

  fn withdraw(
    collection: CollectionId,
    operator: &AccountId,
    position: PositionId,
    to: &AccountId,
  ) -> Result<Balance, DispatchError> {
    Self::ensure_operator(collection, position, operator)?;
    let liquidity = PositionLiquidity::take(collection, position);
    PositionOwners::remove(collection, position);
    PositionApprovals::remove(collection, position);
    PositionRanges::remove(collection, position);
    transfer(
      AssetKind::Local(lp_asset(collection)),
      &collateral_account(collection),
      to,
      liquidity,
    )?;
    Ok(liquidity)
  }

  fn permit_domain(collection: CollectionId) -> PermitDomain {
    PermitDomain {
      name: b"Collateral Position".to_vec(),
      version: Some(b"1".to_vec()),
      verifying_contract: address_of(&position_token_account(collection)).0,
    }
  }
}

pub struct MockPools;
impl LiquidityPoolApi<AccountId> for MockPools {
  fn reserves(collection: CollectionId) -> (Balance, Balance) {
    let Some(pool) = MockLendingPools::lending_pool(collection) else {
      return (0, 0);
    };
    let account = pool_account(collection);
    (
      balance(pool.tokens[0], &account),
      balance(pool.tokens[1], &account),
    )
  }

  fn lp_token(collection: CollectionId) -> AssetKind {
    AssetKind::Local(lp_asset(collection))
  }

  fn add_liquidity(
    collection: CollectionId,
    who: &AccountId,
    amount0: Balance,
    amount1: Balance,
  ) -> Result<Balance, DispatchError> {
    let pool = pool_of(collection)?;
    let (reserve0, reserve1) = Self::reserves(collection);
    let supply = <Assets as Inspect<u64>>::total_issuance(lp_asset(collection));

    let liquidity = if supply == 0 {
      (amount0 * amount1).integer_sqrt()
    } else {
      (amount0 * supply / reserve0).min(amount1 * supply / reserve1)
    };
    ensure!(liquidity > 0, DispatchError::Other("InsufficientLiquidityMinted"));

    let account = pool_account(collection);
    transfer(pool.tokens[0], who, &account, amount0)?;
    transfer(pool.tokens[1], who, &account, amount1)?;
    <Assets as Mutate<u64>>::mint_into(lp_asset(collection), who, liquidity)?;
    Ok(liquidity)
  }

  fn remove_liquidity(
    collection: CollectionId,
    who: &AccountId,
    liquidity: Balance,
    to: &AccountId,
  ) -> Result<(Balance, Balance), DispatchError> {
    let pool = pool_of(collection)?;
    let (reserve0, reserve1) = Self::reserves(collection);
    let supply = <Assets as Inspect<u64>>::total_issuance(lp_asset(collection));
    ensure!(supply > 0, DispatchError::Other("NoSupply"));

    let amount0 = liquidity * reserve0 / supply;
    let amount1 = liquidity * reserve1 / supply;
    <Assets as Mutate<u64>>::burn_from(
      lp_asset(collection),
      who,
      liquidity,
      Preservation::Expendable,
      Precision::Exact,
      Fortitude::Polite,
    )?;
    let account = pool_account(collection);
    transfer(pool.tokens[0], &account, to, amount0)?;
    transfer(pool.tokens[1], &account, to, amount1)?;
    Ok((amount0, amount1))
  }
}

pub struct MockWrapper;
impl NativeWrapper<AccountId> for MockWrapper {
  fn wrap(who: &AccountId, amount: Balance) -> DispatchResult {
    <Balances as NativeMutate<u64>>::transfer(who, &VAULT, amount, Preservation::Expendable)?;
    <Assets as Mutate<u64>>::mint_into(WNATIVE, who, amount)?;
    Ok(())
  }

  fn unwrap(who: &AccountId, amount: Balance) -> DispatchResult {
    <Assets as Mutate<u64>>::burn_from(
      WNATIVE,
      who,
      amount,
      Preservation::Expendable,
      Precision::Exact,
      Fortitude::Polite,
    )?;
    <Balances as NativeMutate<u64>>::transfer(&VAULT, who, amount, Preservation::Preserve)?;
    Ok(())
  }
}

/// Registry pulling tokens through the owner's asset approval to [`REGISTRY`]
pub struct MockRegistry;
impl AllowanceRegistry<AccountId> for MockRegistry {
  fn domain() -> PermitDomain {
    PermitDomain {
      name: b"Permit2".to_vec(),
      version: None,
      verifying_contract: address_of(&REGISTRY).0,
    }
  }

  fn nonce(owner: &AccountId, token: AssetKind, spender: &AccountId) -> u64 {
    RegistryNonces::get((*owner, token, *spender))
  }

  fn permit(owner: &AccountId, spender: &AccountId, details: &AllowanceDetails) -> DispatchResult {
    let key = (*owner, details.token, *spender);
    RegistryAllowances::insert(key, (details.amount, details.expiration));
    RegistryNonces::mutate(key, |nonce| *nonce += 1);
    Ok(())
  }

  fn transfer_from(
    owner: &AccountId,
    spender: &AccountId,
    to: &AccountId,
    token: AssetKind,
    amount: Balance,
  ) -> DispatchResult {
    let key = (*owner, token, *spender);
    let (allowed, expiration) =
      RegistryAllowances::get(key).ok_or(DispatchError::Other("InsufficientAllowance"))?;
    ensure!(
      expiration == 0 || <Timestamp as UnixTime>::now().as_secs() <= expiration,
      DispatchError::Other("AllowanceExpired")
    );
    ensure!(allowed >= amount, DispatchError::Other("InsufficientAllowance"));
    RegistryAllowances::insert(key, (allowed - amount, expiration));

    <Assets as approvals::Mutate<u64>>::transfer_from(asset_id(token)?, owner, &REGISTRY, to, amount)
  }
}

/// Accounts are the trailing eight bytes of an address
pub struct TruncatedAddressMapping;
impl AddressMapping<AccountId> for TruncatedAddressMapping {
  fn into_account_id(address: &H160) -> AccountId {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&address.0[12..]);
    AccountId::from_be_bytes(bytes)
  }

  fn into_address(account: &AccountId) -> H160 {
    let mut address = H160::zero();
    address.0[12..].copy_from_slice(&account.to_be_bytes());
    address
  }
}

parameter_types! {
  pub const LeverageRouterPalletId: PalletId = PalletId(*LEVERAGE_ROUTER_PALLET_ID);
  pub const WrappedNativeAsset: AssetKind = AssetKind::Local(WNATIVE);
}

impl pallet_leverage_router::Config for Test {
  type Assets = Assets;
  type Currency = Balances;
  type LendingPools = MockLendingPools;
  type Borrowables = MockBorrowables;
  type Positions = MockPositions;
  type LiquidityPools = MockPools;
  type NativeWrapper = MockWrapper;
  type AllowanceRegistry = MockRegistry;
  type AddressMapping = TruncatedAddressMapping;
  type Time = Timestamp;
  type PalletId = LeverageRouterPalletId;
  type ChainId = ConstU64<1>;
  type WrappedNative = WrappedNativeAsset;
  type MaxActions = ConstU32<32>;
  type MaxPermits = ConstU32<8>;
  type MaxSteps = ConstU32<64>;
  type WeightInfo = ();
}

pub fn new_test_ext() -> polkadot_sdk::sp_io::TestExternalities {
  let mut t = frame_system::GenesisConfig::<Test>::default()
    .build_storage()
    .unwrap();

  polkadot_sdk::pallet_balances::GenesisConfig::<Test> {
    balances: alloc::vec![
      (ALICE, INITIAL_BALANCE),
      (BOB, INITIAL_BALANCE),
      (CHARLIE, INITIAL_BALANCE),
      (ASSET_OWNER, INITIAL_BALANCE),
      (VAULT, 10 * INITIAL_BALANCE),
    ],
    dev_accounts: None,
  }
  .assimilate_storage(&mut t)
  .unwrap();

  let mut accounts = alloc::vec![];
  for who in [ALICE, BOB, CHARLIE] {
    for id in [TOKEN0, TOKEN1, WNATIVE] {
      accounts.push((id, who, INITIAL_BALANCE));
    }
  }
  accounts.extend([
    (TOKEN0, pool_account(COLLECTION), 1_000_000_000),
    (TOKEN1, pool_account(COLLECTION), 100_000_000_000),
    (lp_asset(COLLECTION), SEEDER, 10_000_000_000),
    (WNATIVE, pool_account(NATIVE_COLLECTION), 1_000_000_000),
    (TOKEN1, pool_account(NATIVE_COLLECTION), 1_000_000_000),
    (lp_asset(NATIVE_COLLECTION), SEEDER, 1_000_000_000),
    (TOKEN0, borrowable_account(COLLECTION, 0), BORROWABLE_CASH),
    (TOKEN1, borrowable_account(COLLECTION, 1), BORROWABLE_CASH),
    (WNATIVE, borrowable_account(NATIVE_COLLECTION, 0), BORROWABLE_CASH),
    (TOKEN1, borrowable_account(NATIVE_COLLECTION, 1), BORROWABLE_CASH),
  ]);

  polkadot_sdk::pallet_assets::GenesisConfig::<Test> {
    assets: alloc::vec![
      (TOKEN0, ASSET_OWNER, true, 1),
      (TOKEN1, ASSET_OWNER, true, 1),
      (WNATIVE, ASSET_OWNER, true, 1),
      (lp_asset(COLLECTION), ASSET_OWNER, true, 1),
      (lp_asset(NATIVE_COLLECTION), ASSET_OWNER, true, 1),
    ],
    metadata: alloc::vec![
      (TOKEN0, b"Token Zero".to_vec(), b"TK0".to_vec(), 18),
      (TOKEN1, b"Token One".to_vec(), b"TK1".to_vec(), 18),
      (WNATIVE, b"Wrapped Native".to_vec(), b"WNAT".to_vec(), 18),
    ],
    accounts,
    reserves: alloc::vec![],
    next_asset_id: None,
  }
  .assimilate_storage(&mut t)
  .unwrap();

  // Engine genesis: pallet account gets provider ref (ED-free)
  pallet_leverage_router::GenesisConfig::<Test>::default()
    .assimilate_storage(&mut t)
    .unwrap();

  suppress_callbacks(false);
  tamper_callbacks(false);

  let mut ext = polkadot_sdk::sp_io::TestExternalities::new(t);
  ext.execute_with(|| {
    System::set_block_number(1);
    Timestamp::set_timestamp(NOW * 1_000);
    for collection in [COLLECTION, NATIVE_COLLECTION] {
      for index in 0..2 {
        Cash::insert((collection, index), BORROWABLE_CASH);
      }
    }
  });
  ext
}

pub fn router() -> AccountId {
  LeverageRouter::account_id()
}

pub fn token_balance(id: u32, who: &AccountId) -> Balance {
  <Assets as Inspect<u64>>::balance(id, who)
}

pub fn native_balance(who: &AccountId) -> Balance {
  <Balances as polkadot_sdk::frame_support::traits::fungible::Inspect<u64>>::balance(who)
}

/// Asset approval from `who` to the engine account
pub fn approve_router(who: AccountId, id: u32, amount: Balance) {
  <Assets as approvals::Mutate<u64>>::approve(id, &who, &router(), amount).unwrap();
}

pub fn assert_router_empty() {
  let router = router();
  for id in [TOKEN0, TOKEN1, WNATIVE, lp_asset(COLLECTION), lp_asset(NATIVE_COLLECTION)] {
    assert_eq!(token_balance(id, &router), 0, "engine holds asset {id}");
  }
  assert_eq!(native_balance(&router), 0);
}
