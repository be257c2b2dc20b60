//! Token movements of the engine account.

use crate::pallet::{Config, Error, ExecutionContextOf, Pallet};
use crate::types::{AllowanceRegistry, AssetKind, Balance, NativeWrapper, Recipient};
use frame::deps::frame_support::traits::{
  Get,
  fungible::{Inspect as NativeInspect, Mutate as NativeMutate},
  fungibles::{Inspect as FungiblesInspect, Mutate as FungiblesMutate, approvals},
  tokens::Preservation,
};
use frame::deps::sp_runtime::{DispatchError, DispatchResult};

impl<T: Config> Pallet<T> {
  pub(crate) fn resolve(ctx: &ExecutionContextOf<T>, to: &Recipient<T::AccountId>) -> T::AccountId {
    match to {
      Recipient::Caller => ctx.caller.clone(),
      Recipient::Router => Self::account_id(),
      Recipient::Account(who) => who.clone(),
    }
  }

  pub(crate) fn balance_of(asset: AssetKind, who: &T::AccountId) -> Balance {
    match asset {
      AssetKind::Native => <T::Currency as NativeInspect<T::AccountId>>::balance(who),
      AssetKind::Local(id) | AssetKind::Foreign(id) => T::Assets::balance(id, who),
    }
  }

  pub(crate) fn transfer_asset(
    asset: AssetKind,
    from: &T::AccountId,
    to: &T::AccountId,
    amount: Balance,
  ) -> DispatchResult {
    if amount == 0 || from == to {
      return Ok(());
    }

    match asset {
      AssetKind::Native => {
        <T::Currency as NativeMutate<T::AccountId>>::transfer(
          from,
          to,
          amount,
          Preservation::Expendable,
        )?;
      }
      AssetKind::Local(id) | AssetKind::Foreign(id) => {
        <T::Assets as FungiblesMutate<T::AccountId>>::transfer(
          id,
          from,
          to,
          amount,
          Preservation::Expendable,
        )?;
      }
    }

    Ok(())
  }

  /// Send the engine's whole holding of `asset` to `to`. Returns the amount moved.
  pub(crate) fn sweep(asset: AssetKind, to: &T::AccountId) -> Result<Balance, DispatchError> {
    let router = Self::account_id();
    let held = Self::balance_of(asset, &router);
    Self::transfer_asset(asset, &router, to, held)?;
    Ok(held)
  }

  /// Move `amount` of `token` from the caller to `dest`.
  ///
  /// Wrapped native is first produced from unspent attached value. The rest is taken with
  /// the caller's asset approval to the engine when it covers the amount, otherwise through
  /// the allowance registry.
  pub(crate) fn pull_from_caller(
    ctx: &mut ExecutionContextOf<T>,
    token: AssetKind,
    amount: Balance,
    dest: &T::AccountId,
  ) -> DispatchResult {
    if amount == 0 {
      return Ok(());
    }
    let router = Self::account_id();
    let mut remaining = amount;

    if token == T::WrappedNative::get() && ctx.native_available > 0 {
      let wrapped = ctx.native_available.min(amount);
      T::NativeWrapper::wrap(&router, wrapped)?;
      ctx.native_available -= wrapped;
      Self::transfer_asset(token, &router, dest, wrapped)?;
      remaining -= wrapped;
    }
    if remaining == 0 {
      return Ok(());
    }

    let id = match token {
      AssetKind::Native => return Err(Error::<T>::UnsupportedToken.into()),
      AssetKind::Local(id) | AssetKind::Foreign(id) => id,
    };
    if <T::Assets as approvals::Inspect<T::AccountId>>::allowance(id, &ctx.caller, &router)
      >= remaining
    {
      <T::Assets as approvals::Mutate<T::AccountId>>::transfer_from(
        id,
        &ctx.caller,
        &router,
        dest,
        remaining,
      )
    } else {
      T::AllowanceRegistry::transfer_from(&ctx.caller, &router, dest, token, remaining)
    }
  }
}
