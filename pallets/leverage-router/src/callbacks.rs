//! Callback reentry gates.
//!
//! The engine only resumes a chain it suspended itself, and only when the callback comes
//! from the collaborator it called. Both gates decode the continuation, authenticate the
//! sender against the lending pool named in it, then consume the matching commitment in
//! [`AwaitedCallback`] before running the remaining actions.

use crate::pallet::{ActionOf, AwaitedCallback, Config, Error, Pallet};
use crate::types::*;
use codec::DecodeLimit;
use frame::deps::frame_support::{ensure, traits::Get};
use frame::deps::sp_runtime::{DispatchError, DispatchResult};
use polkadot_sdk::sp_io::hashing::blake2_256;

/// Nesting bound when decoding continuation bytes
const CONTINUATION_DEPTH_LIMIT: u32 = 16;

impl<T: Config> Pallet<T> {
  fn decode_continuation(data: &[u8]) -> Result<Continuation<T::AccountId>, DispatchError> {
    Continuation::<T::AccountId>::decode_all_with_depth_limit(
      CONTINUATION_DEPTH_LIMIT,
      &mut &data[..],
    )
    .map_err(|_| Error::<T>::MalformedCallback.into())
  }

  /// Consume the awaited callback if it is exactly `expected`
  fn take_awaited(expected: PendingCallback) -> DispatchResult {
    match AwaitedCallback::<T>::get() {
      Some(pending) if pending == expected => {
        AwaitedCallback::<T>::kill();
        Ok(())
      }
      _ => Err(Error::<T>::FromNotRouter.into()),
    }
  }

  fn ensure_within_steps(actions: &[ActionOf<T>]) -> DispatchResult {
    ensure!(
      actions.len() as u32 <= T::MaxSteps::get(),
      Error::<T>::TooManySteps
    );
    Ok(())
  }
}

impl<T: Config> BorrowCallee<T::AccountId> for Pallet<T> {
  fn on_borrow(
    sender: &T::AccountId,
    borrower: &T::AccountId,
    position: PositionId,
    _borrow_amount: Balance,
    data: &[u8],
  ) -> DispatchResult {
    let Continuation::Borrow {
      collection,
      index,
      position: expected_position,
      actions,
    } = Self::decode_continuation(data)?
    else {
      return Err(Error::<T>::MalformedCallback.into());
    };

    let pool = T::LendingPools::lending_pool(collection).ok_or(Error::<T>::UnauthorizedCaller)?;
    ensure!(
      pool.borrowable(index) == Some(sender),
      Error::<T>::UnauthorizedCaller
    );
    ensure!(
      *borrower == Self::account_id() && position == expected_position,
      Error::<T>::FromNotRouter
    );
    Self::take_awaited(PendingCallback::Borrow {
      collection,
      index,
      position,
      continuation: blake2_256(data),
    })?;
    Self::ensure_within_steps(&actions)?;

    Self::resume(actions, |_| {})
  }
}

impl<T: Config> PositionReceiver<T::AccountId> for Pallet<T> {
  fn on_position_received(
    sender: &T::AccountId,
    operator: &T::AccountId,
    from: &T::AccountId,
    position: PositionId,
    data: &[u8],
  ) -> DispatchResult {
    let Continuation::Redeem {
      collection,
      position: source,
      actions,
    } = Self::decode_continuation(data)?
    else {
      return Err(Error::<T>::MalformedCallback.into());
    };

    let pool = T::LendingPools::lending_pool(collection).ok_or(Error::<T>::SenderNotNftlp)?;
    ensure!(*sender == pool.position_token, Error::<T>::SenderNotNftlp);
    ensure!(*from == pool.collateral, Error::<T>::UnauthorizedCaller);
    ensure!(*operator == Self::account_id(), Error::<T>::FromNotRouter);
    Self::take_awaited(PendingCallback::Redeem {
      collection,
      position: source,
      continuation: blake2_256(data),
    })?;
    Self::ensure_within_steps(&actions)?;

    Self::resume(actions, |ctx| ctx.redeemed = Some(position))
  }
}
