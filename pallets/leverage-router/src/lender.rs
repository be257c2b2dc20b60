//! Lender side: supplying to a borrowable and redeeming its shares.

use crate::pallet::{ActiveExecution, Config, Error, Event, Pallet};
use crate::types::*;
use frame::deps::frame_support::{
  ensure,
  traits::{Get, fungible::Mutate as NativeMutate, tokens::Preservation},
};
use frame::deps::sp_runtime::DispatchError;

impl<T: Config> Pallet<T> {
  /// Supply `amount` of the underlying of borrowable `index` and mint its shares to `to`.
  ///
  /// Attached `value` is only accepted for the wrapped native borrowable; it is wrapped
  /// before any approval is used and the unspent part is refunded.
  pub fn do_lend(
    caller: T::AccountId,
    collection: CollectionId,
    index: BorrowableIndex,
    amount: Balance,
    to: T::AccountId,
    deadline: u64,
    value: Balance,
  ) -> Result<Balance, DispatchError> {
    Self::ensure_not_expired(deadline)?;
    ensure!(
      !ActiveExecution::<T>::exists(),
      Error::<T>::ExecutionInProgress
    );

    let pool = T::LendingPools::lending_pool(collection).ok_or(Error::<T>::UnknownLendingPool)?;
    let token = pool.token(index).ok_or(Error::<T>::InvalidBorrowableIndex)?;
    let borrowable = pool
      .borrowable(index)
      .cloned()
      .ok_or(Error::<T>::InvalidBorrowableIndex)?;
    ensure!(
      value == 0 || token == T::WrappedNative::get(),
      Error::<T>::NotWrappedNative
    );

    if value > 0 {
      <T::Currency as NativeMutate<T::AccountId>>::transfer(
        &caller,
        &Self::account_id(),
        value,
        Preservation::Expendable,
      )?;
    }

    let mut ctx = ExecutionContext::new(caller.clone(), collection, pool, false, value);
    ActiveExecution::<T>::put(&ctx);
    Self::pull_from_caller(&mut ctx, token, amount, &borrowable)?;
    let shares = T::Borrowables::mint(collection, index, &to)?;
    ActiveExecution::<T>::kill();
    Self::finalize(&ctx)?;

    log::debug!(
      target: crate::LOG_TARGET,
      "lent {} to borrowable {} of collection {}, {} shares",
      amount,
      index,
      collection,
      shares,
    );
    Self::deposit_event(Event::Lent {
      who: caller,
      collection,
      index,
      amount,
      shares,
    });

    Ok(shares)
  }

  /// Redeem `shares` of borrowable `index` held by the caller and send the underlying to `to`.
  ///
  /// The engine spends the caller's share allowance, so a share permit (or a prior
  /// approval) is required. With `unwrap_native` the wrapped native underlying is paid out
  /// as native currency.
  pub fn do_redeem_shares(
    caller: T::AccountId,
    collection: CollectionId,
    index: BorrowableIndex,
    shares: Balance,
    to: T::AccountId,
    deadline: u64,
    permits: &[Permit],
    unwrap_native: bool,
  ) -> Result<Balance, DispatchError> {
    Self::ensure_not_expired(deadline)?;
    ensure!(
      !ActiveExecution::<T>::exists(),
      Error::<T>::ExecutionInProgress
    );

    let pool = T::LendingPools::lending_pool(collection).ok_or(Error::<T>::UnknownLendingPool)?;
    let token = pool.token(index).ok_or(Error::<T>::InvalidBorrowableIndex)?;
    ensure!(
      !unwrap_native || token == T::WrappedNative::get(),
      Error::<T>::NotWrappedNative
    );

    Self::apply_permits(&caller, collection, permits)?;

    let router = Self::account_id();
    let ctx = ExecutionContext::new(caller.clone(), collection, pool, false, 0);
    ActiveExecution::<T>::put(&ctx);
    let amount = if unwrap_native {
      let amount = T::Borrowables::redeem(collection, index, &router, &caller, shares, &router)?;
      T::NativeWrapper::unwrap(&router, amount)?;
      Self::transfer_asset(AssetKind::Native, &router, &to, amount)?;
      amount
    } else {
      T::Borrowables::redeem(collection, index, &router, &caller, shares, &to)?
    };
    ActiveExecution::<T>::kill();
    Self::finalize(&ctx)?;

    Self::deposit_event(Event::SharesRedeemed {
      who: caller,
      collection,
      index,
      shares,
      amount,
    });

    Ok(amount)
  }
}
