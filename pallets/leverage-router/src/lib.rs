//! Leverage Router Pallet
//!
//! Action-chain execution engine of the leveraged lending protocol. A call carries a small
//! program of steps (mint, redeem, borrow, repay, add/remove liquidity, withdraw) that run
//! atomically against one lending pool, with signed permits applied up front.
//!
//! Borrows and redemptions suspend the chain: the collaborator receives the remainder of
//! the chain as callback data and hands it back through [`BorrowCallee`] or
//! [`PositionReceiver`], where it is re-validated before execution resumes.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub use pallet::*;

pub mod program;
pub mod types;
pub use types::*;

mod callbacks;
mod finalize;
mod funds;
mod interpreter;
mod lender;
pub mod permits;

#[cfg(test)]
pub mod mock;

pub mod weights;
pub use weights::WeightInfo;

pub(crate) const LOG_TARGET: &str = "runtime::leverage-router";

#[frame::pallet]
pub mod pallet {
  use super::WeightInfo;
  use crate::types::*;
  use alloc::vec::Vec;
  use frame::deps::{
    frame_support::traits::{
      UnixTime,
      fungible::{Inspect as NativeInspect, Mutate as NativeMutate},
      fungibles::{
        Inspect as FungiblesInspect, Mutate as FungiblesMutate, approvals, metadata,
      },
      tokens::Preservation,
    },
    sp_runtime::traits::AccountIdConversion,
  };
  use frame::prelude::*;
  use polkadot_sdk::sp_core::H160;

  pub type ActionOf<T> = Action<<T as frame_system::Config>::AccountId>;
  pub type ActionNodeOf<T> = ActionNode<<T as frame_system::Config>::AccountId>;
  pub type ExecutionContextOf<T> = ExecutionContext<<T as frame_system::Config>::AccountId>;
  pub type LendingPoolOf<T> = LendingPool<<T as frame_system::Config>::AccountId>;

  #[pallet::config]
  pub trait Config: frame_system::Config {
    /// Fungible assets: pool underlyings, LP tokens and the wrapped native token
    type Assets: FungiblesInspect<Self::AccountId, AssetId = u32, Balance = Balance>
      + FungiblesMutate<Self::AccountId>
      + approvals::Inspect<Self::AccountId>
      + approvals::Mutate<Self::AccountId>
      + metadata::Inspect<Self::AccountId>;
    /// Native currency attached to calls
    type Currency: NativeInspect<Self::AccountId, Balance = Balance>
      + NativeMutate<Self::AccountId>;
    /// Lending pool lookup
    type LendingPools: LendingPoolRegistry<Self::AccountId>;
    /// Borrowable accounting collaborator
    type Borrowables: BorrowableApi<Self::AccountId>;
    /// Collateral position token
    type Positions: PositionToken<Self::AccountId>;
    /// Liquidity pools backing the collaterals
    type LiquidityPools: LiquidityPoolApi<Self::AccountId>;
    /// Wraps attached native value into `WrappedNative`
    type NativeWrapper: NativeWrapper<Self::AccountId>;
    /// Shared signed-allowance registry
    type AllowanceRegistry: AllowanceRegistry<Self::AccountId>;
    /// Signer address to account mapping
    type AddressMapping: AddressMapping<Self::AccountId>;
    /// Wall clock used for deadlines (unix seconds)
    type Time: UnixTime;
    /// Pallet ID for account derivation
    #[pallet::constant]
    type PalletId: Get<frame::deps::frame_support::PalletId>;
    /// Chain id bound into every permit domain
    #[pallet::constant]
    type ChainId: Get<u64>;
    /// Asset wrapping the native currency
    #[pallet::constant]
    type WrappedNative: Get<AssetKind>;
    /// Maximum number of nodes in an action program
    #[pallet::constant]
    type MaxActions: Get<u32>;
    /// Maximum number of permits in one call
    #[pallet::constant]
    type MaxPermits: Get<u32>;
    /// Maximum number of steps executed in one call, expansions included
    #[pallet::constant]
    type MaxSteps: Get<u32>;
    /// Weight information for extrinsics
    type WeightInfo: WeightInfo;
  }

  /// The pallet module, the place to define dispatchable calls, storage items, events, errors, etc.
  ///
  /// ## Execution
  /// 1. **Permits**: every signed permit is verified and installed before any action runs.
  /// 2. **Authorization**: an existing position may only be driven by its owner, an approved
  ///    operator, or a caller presenting a signed position permit.
  /// 3. **Actions**: executed in order; borrows and redemptions suspend until the collaborator
  ///    calls back with the continuation the engine committed to.
  /// 4. **Finalization**: positions return to their owner, leftovers return to the caller and
  ///    the engine account must end empty.
  #[pallet::pallet]
  pub struct Pallet<T>(PhantomData<T>);

  /// Context of the call in flight; only set while a call executes
  #[pallet::storage]
  pub type ActiveExecution<T: Config> = StorageValue<_, ExecutionContextOf<T>, OptionQuery>;

  /// Callback the engine is suspended on
  #[pallet::storage]
  pub type AwaitedCallback<T: Config> = StorageValue<_, PendingCallback, OptionQuery>;

  /// Permit nonces per verifying contract and owner address
  #[pallet::storage]
  pub type PermitNonces<T: Config> =
    StorageDoubleMap<_, Blake2_128Concat, [u8; 20], Blake2_128Concat, H160, u64, ValueQuery>;

  /// Position permit nonces per verifying contract and position id
  #[pallet::storage]
  pub type PositionNonces<T: Config> =
    StorageDoubleMap<_, Blake2_128Concat, [u8; 20], Twox64Concat, PositionId, u64, ValueQuery>;

  #[pallet::event]
  #[pallet::generate_deposit(pub(super) fn deposit_event)]
  pub enum Event<T: Config> {
    /// Action chain executed
    Executed {
      who: T::AccountId,
      collection: CollectionId,
      position: Option<PositionId>,
      created: bool,
      borrowed: [Balance; 2],
      repaid: [Balance; 2],
    },
    /// Shortfall position liquidated
    Liquidated {
      liquidator: T::AccountId,
      collection: CollectionId,
      index: BorrowableIndex,
      position: PositionId,
      seized_position: PositionId,
      repaid: Balance,
    },
    /// Underlying supplied to a borrowable
    Lent {
      who: T::AccountId,
      collection: CollectionId,
      index: BorrowableIndex,
      amount: Balance,
      shares: Balance,
    },
    /// Borrowable shares redeemed for the underlying
    SharesRedeemed {
      who: T::AccountId,
      collection: CollectionId,
      index: BorrowableIndex,
      shares: Balance,
      amount: Balance,
    },
    /// Signed permit verified and installed
    PermitApplied { owner: H160, kind: PermitKind },
  }

  #[pallet::error]
  pub enum Error<T> {
    /// Deadline is in the past
    Expired,
    /// Redeem would move zero liquidity
    RedeemZero,
    /// Token0 amount below the requested minimum
    InsufficientAmount0,
    /// Token1 amount below the requested minimum
    InsufficientAmount1,
    /// Caller may not operate the position
    Unauthorized,
    /// Callback sender is not a collaborator of the lending pool
    UnauthorizedCaller,
    /// Callback was not solicited by the engine
    FromNotRouter,
    /// Position receipt does not come from the position token
    SenderNotNftlp,
    /// Action program is not a forward chain
    MalformedChain,
    /// Callback data cannot be decoded
    MalformedCallback,
    /// Too many steps executed in one call
    TooManySteps,
    /// Collaborator returned without calling back
    CallbackNotReceived,
    /// Signature does not recover to the permit owner
    InvalidSignature,
    /// Permit owner is not the caller
    InvalidPermitOwner,
    /// Allowance nonce does not match the registry
    InvalidNonce,
    /// Operation not supported for this token
    UnsupportedToken,
    /// No lending pool for the collection
    UnknownLendingPool,
    /// Position does not exist
    UnknownPosition,
    /// Action requires a position
    NoActivePosition,
    /// Position already set for this call
    PositionAlreadySet,
    /// Borrowable index out of range
    InvalidBorrowableIndex,
    /// No LP tokens to remove
    NoLiquidityHeld,
    /// Engine account not empty after execution
    ResidualBalance,
    /// Another execution is in flight
    ExecutionInProgress,
    /// Native value attached, or unwrapping requested, for a non-native borrowable
    NotWrappedNative,
    /// Arithmetic overflow in calculation
    ArithmeticOverflow,
  }

  #[pallet::call]
  impl<T: Config> Pallet<T> {
    /// Execute an action program against `collection`.
    ///
    /// `position` names an existing position; `None` lets the program mint one. With
    /// `with_collateral_transfer` the position is held by the engine for the duration of the
    /// call. `value` native currency is moved to the engine and wrapped on demand.
    #[pallet::call_index(0)]
    #[pallet::weight(T::WeightInfo::execute(T::MaxSteps::get(), permits.len() as u32))]
    pub fn execute(
      origin: OriginFor<T>,
      collection: CollectionId,
      position: Option<PositionId>,
      deadline: u64,
      actions: BoundedVec<ActionNodeOf<T>, T::MaxActions>,
      permits: BoundedVec<Permit, T::MaxPermits>,
      with_collateral_transfer: bool,
      value: Balance,
    ) -> DispatchResult {
      let who = ensure_signed(origin)?;

      Self::do_execute(
        who,
        collection,
        position,
        deadline,
        &actions,
        &permits,
        with_collateral_transfer,
        value,
      )?;

      Ok(())
    }

    /// Repay debt of a position in shortfall and seize its collateral to `to`.
    #[pallet::call_index(1)]
    #[pallet::weight(T::WeightInfo::liquidate())]
    pub fn liquidate(
      origin: OriginFor<T>,
      collection: CollectionId,
      index: BorrowableIndex,
      position: PositionId,
      amount_max: Balance,
      to: T::AccountId,
      deadline: u64,
      value: Balance,
    ) -> DispatchResult {
      let who = ensure_signed(origin)?;

      Self::do_liquidate(
        who, collection, index, position, amount_max, to, deadline, value,
      )?;

      Ok(())
    }

    /// Borrow callback entry for borrowables living outside the runtime's trait wiring.
    #[pallet::call_index(2)]
    #[pallet::weight(T::WeightInfo::borrow_callback())]
    pub fn borrow_callback(
      origin: OriginFor<T>,
      borrower: T::AccountId,
      position: PositionId,
      borrow_amount: Balance,
      data: Vec<u8>,
    ) -> DispatchResult {
      let sender = ensure_signed(origin)?;

      <Self as BorrowCallee<T::AccountId>>::on_borrow(
        &sender,
        &borrower,
        position,
        borrow_amount,
        &data,
      )
    }

    /// Position receipt entry for position tokens living outside the runtime's trait wiring.
    #[pallet::call_index(3)]
    #[pallet::weight(T::WeightInfo::position_received())]
    pub fn position_received(
      origin: OriginFor<T>,
      operator: T::AccountId,
      from: T::AccountId,
      position: PositionId,
      data: Vec<u8>,
    ) -> DispatchResult {
      let sender = ensure_signed(origin)?;

      <Self as PositionReceiver<T::AccountId>>::on_position_received(
        &sender, &operator, &from, position, &data,
      )
    }

    /// Supply `amount` to borrowable `index` of `collection` and mint its shares to `to`.
    ///
    /// `value` native currency may fund a wrapped native borrowable.
    #[pallet::call_index(4)]
    #[pallet::weight(T::WeightInfo::lend())]
    pub fn lend(
      origin: OriginFor<T>,
      collection: CollectionId,
      index: BorrowableIndex,
      amount: Balance,
      to: T::AccountId,
      deadline: u64,
      value: Balance,
    ) -> DispatchResult {
      let who = ensure_signed(origin)?;

      Self::do_lend(who, collection, index, amount, to, deadline, value)?;

      Ok(())
    }

    /// Redeem `shares` of borrowable `index` and send the underlying to `to`.
    ///
    /// `permits` may carry a share permit for the engine. With `unwrap_native` a wrapped
    /// native underlying is paid out as native currency.
    #[pallet::call_index(5)]
    #[pallet::weight(T::WeightInfo::redeem_shares(permits.len() as u32))]
    pub fn redeem_shares(
      origin: OriginFor<T>,
      collection: CollectionId,
      index: BorrowableIndex,
      shares: Balance,
      to: T::AccountId,
      deadline: u64,
      permits: BoundedVec<Permit, T::MaxPermits>,
      unwrap_native: bool,
    ) -> DispatchResult {
      let who = ensure_signed(origin)?;

      Self::do_redeem_shares(
        who,
        collection,
        index,
        shares,
        to,
        deadline,
        &permits,
        unwrap_native,
      )?;

      Ok(())
    }
  }

  impl<T: Config> Pallet<T> {
    /// Get the pallet's account ID (derived from PalletId)
    pub fn account_id() -> T::AccountId {
      T::PalletId::get().into_account_truncating()
    }

    /// Current wall-clock time in unix seconds
    pub fn now() -> u64 {
      T::Time::now().as_secs()
    }

    pub(crate) fn ensure_not_expired(deadline: u64) -> DispatchResult {
      ensure!(Self::now() <= deadline, Error::<T>::Expired);
      Ok(())
    }

    /// Run an action program for `caller` and report what it produced.
    pub fn do_execute(
      caller: T::AccountId,
      collection: CollectionId,
      position: Option<PositionId>,
      deadline: u64,
      actions: &[ActionNodeOf<T>],
      permits: &[Permit],
      with_collateral_transfer: bool,
      value: Balance,
    ) -> Result<ExecutionOutcome, DispatchError> {
      Self::ensure_not_expired(deadline)?;
      ensure!(
        !ActiveExecution::<T>::exists(),
        Error::<T>::ExecutionInProgress
      );

      let pool = T::LendingPools::lending_pool(collection).ok_or(Error::<T>::UnknownLendingPool)?;
      let chain = crate::program::into_chain(actions).map_err(|e| {
        log::debug!(target: crate::LOG_TARGET, "rejected action program: {:?}", e);
        Error::<T>::MalformedChain
      })?;

      let permitted = Self::apply_permits(&caller, collection, permits)?;

      let router = Self::account_id();
      let mut ctx = ExecutionContext::new(
        caller.clone(),
        collection,
        pool,
        with_collateral_transfer,
        value,
      );

      if let Some(id) = position {
        let owner = T::Positions::owner_of(collection, id).ok_or(Error::<T>::UnknownPosition)?;
        let via_permit = permitted.contains(&id);
        ensure!(
          owner == caller || T::Positions::is_approved(collection, id, &caller) || via_permit,
          Error::<T>::Unauthorized
        );

        if with_collateral_transfer {
          let operator = if via_permit { &router } else { &caller };
          T::Positions::transfer(collection, operator, &owner, &router, id)?;
        }
        ctx.position = Some(id);
        ctx.position_owner = owner;
      }

      if value > 0 {
        <T::Currency as NativeMutate<T::AccountId>>::transfer(
          &caller,
          &router,
          value,
          Preservation::Expendable,
        )?;
      }

      ActiveExecution::<T>::put(&ctx);
      Self::run_chain(&mut ctx, chain)?;
      ensure!(
        !AwaitedCallback::<T>::exists(),
        Error::<T>::CallbackNotReceived
      );
      ActiveExecution::<T>::kill();

      let outcome = Self::finalize(&ctx)?;

      Self::deposit_event(Event::Executed {
        who: caller,
        collection,
        position: outcome.position,
        created: outcome.created,
        borrowed: outcome.borrowed,
        repaid: outcome.repaid,
      });

      Ok(outcome)
    }

    /// Repay up to `amount_max` of a shortfall position's debt and seize collateral to `to`.
    pub fn do_liquidate(
      caller: T::AccountId,
      collection: CollectionId,
      index: BorrowableIndex,
      position: PositionId,
      amount_max: Balance,
      to: T::AccountId,
      deadline: u64,
      value: Balance,
    ) -> Result<ExecutionOutcome, DispatchError> {
      Self::ensure_not_expired(deadline)?;
      ensure!(
        !ActiveExecution::<T>::exists(),
        Error::<T>::ExecutionInProgress
      );

      let pool = T::LendingPools::lending_pool(collection).ok_or(Error::<T>::UnknownLendingPool)?;
      let token = pool
        .token(index)
        .ok_or(Error::<T>::InvalidBorrowableIndex)?;
      let borrowable = pool
        .borrowable(index)
        .cloned()
        .ok_or(Error::<T>::InvalidBorrowableIndex)?;
      ensure!(
        value == 0 || token == T::WrappedNative::get(),
        Error::<T>::NotWrappedNative
      );

      let router = Self::account_id();
      if value > 0 {
        <T::Currency as NativeMutate<T::AccountId>>::transfer(
          &caller,
          &router,
          value,
          Preservation::Expendable,
        )?;
      }

      let mut ctx = ExecutionContext::new(caller.clone(), collection, pool, false, value);
      ActiveExecution::<T>::put(&ctx);

      let debt = T::Borrowables::borrow_balance(collection, index, position);
      let amount = amount_max.min(debt);
      Self::pull_from_caller(&mut ctx, token, amount, &borrowable)?;
      let (seized_position, repaid) = T::Borrowables::liquidate(collection, index, position, &to)?;
      ctx.repaid[index as usize] = repaid;

      ActiveExecution::<T>::kill();
      let mut outcome = Self::finalize(&ctx)?;
      outcome.seized = Some((seized_position, repaid));

      Self::deposit_event(Event::Liquidated {
        liquidator: caller,
        collection,
        index,
        position,
        seized_position,
        repaid,
      });

      Ok(outcome)
    }

    /// Optimal `(amount0, amount1)` to add to the pool of `collection`.
    ///
    /// Matches the desired amounts to the current reserve ratio, keeping the larger side
    /// capped at its desired amount, and enforces both minimums.
    pub fn optimal_liquidity(
      collection: CollectionId,
      amount0_desired: Balance,
      amount1_desired: Balance,
      amount0_min: Balance,
      amount1_min: Balance,
    ) -> Result<(Balance, Balance), DispatchError> {
      let (reserve0, reserve1) = T::LiquidityPools::reserves(collection);
      if reserve0 == 0 && reserve1 == 0 {
        return Ok((amount0_desired, amount1_desired));
      }

      let amount1_optimal = Self::quote_amount(amount0_desired, reserve0, reserve1)?;
      if amount1_optimal <= amount1_desired {
        ensure!(
          amount1_optimal >= amount1_min,
          Error::<T>::InsufficientAmount1
        );
        return Ok((amount0_desired, amount1_optimal));
      }

      let amount0_optimal = Self::quote_amount(amount1_desired, reserve1, reserve0)?;
      ensure!(
        amount0_optimal <= amount0_desired,
        Error::<T>::ArithmeticOverflow
      );
      ensure!(
        amount0_optimal >= amount0_min,
        Error::<T>::InsufficientAmount0
      );
      Ok((amount0_optimal, amount1_desired))
    }

    /// Calculate optimal amount given reserves (XYK formula)
    fn quote_amount(
      amount_a: Balance,
      reserve_a: Balance,
      reserve_b: Balance,
    ) -> Result<Balance, DispatchError> {
      if reserve_a == 0 {
        return Err(Error::<T>::ArithmeticOverflow.into());
      }

      use polkadot_sdk::sp_core::U256;

      let result = U256::from(amount_a)
        .checked_mul(U256::from(reserve_b))
        .ok_or(Error::<T>::ArithmeticOverflow)?
        .checked_div(U256::from(reserve_a))
        .ok_or(Error::<T>::ArithmeticOverflow)?;

      if result > U256::from(u128::MAX) {
        return Err(Error::<T>::ArithmeticOverflow.into());
      }

      Ok(result.as_u128())
    }
  }

  /// Genesis configuration, the engine account gets a provider reference
  #[pallet::genesis_config]
  #[derive(frame::prelude::DefaultNoBound)]
  pub struct GenesisConfig<T: Config> {
    #[serde(skip)]
    pub _marker: core::marker::PhantomData<T>,
  }

  #[pallet::genesis_build]
  impl<T: Config> BuildGenesisConfig for GenesisConfig<T> {
    fn build(&self) {
      // Engine account survives zero native balance via provider reference
      frame_system::Pallet::<T>::inc_providers(&Pallet::<T>::account_id());
    }
  }
}
