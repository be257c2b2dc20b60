//! Result and refund finalization.

use crate::pallet::{Config, Error, ExecutionContextOf, Pallet};
use crate::types::*;
use alloc::vec::Vec;
use frame::deps::frame_support::{ensure, traits::Get};
use frame::deps::sp_runtime::DispatchError;

impl<T: Config> Pallet<T> {
  /// Hand everything the engine still holds back and report the outcome.
  ///
  /// Positions go back to their owner (a redeemed leftover to the caller), wrapped native
  /// is unwrapped and every token and the native currency are returned to the caller. The
  /// engine account must be empty afterwards.
  pub(crate) fn finalize(ctx: &ExecutionContextOf<T>) -> Result<ExecutionOutcome, DispatchError> {
    let router = Self::account_id();
    let collection = ctx.collection;

    if let Some(position) = ctx.position {
      if Self::holds_position(collection, position) {
        T::Positions::transfer(collection, &router, &router, &ctx.position_owner, position)?;
      }
    }
    if let Some(redeemed) = ctx.redeemed {
      if Self::holds_position(collection, redeemed) {
        T::Positions::transfer(collection, &router, &router, &ctx.caller, redeemed)?;
      }
    }

    let wrapped = T::WrappedNative::get();
    let wrapped_held = Self::balance_of(wrapped, &router);
    if wrapped_held > 0 {
      T::NativeWrapper::unwrap(&router, wrapped_held)?;
    }

    let tokens = Self::engine_tokens(ctx);
    for token in tokens.iter() {
      Self::sweep(*token, &ctx.caller)?;
    }
    let native = Self::sweep(AssetKind::Native, &ctx.caller)?;

    log::debug!(
      target: crate::LOG_TARGET,
      "finalized collection {} position {:?}, returned {} native",
      collection,
      ctx.position,
      native,
    );

    Self::ensure_no_residual(ctx, &tokens)?;

    Ok(ExecutionOutcome {
      position: ctx.position,
      created: ctx.created,
      borrowed: ctx.borrowed,
      repaid: ctx.repaid,
      seized: None,
    })
  }

  /// Tokens the engine may hold while running against `ctx.collection`
  fn engine_tokens(ctx: &ExecutionContextOf<T>) -> Vec<AssetKind> {
    let mut tokens = Vec::with_capacity(4);
    for token in ctx
      .pool
      .tokens
      .iter()
      .copied()
      .chain([
        T::LiquidityPools::lp_token(ctx.collection),
        T::WrappedNative::get(),
      ])
    {
      if !tokens.contains(&token) {
        tokens.push(token);
      }
    }
    tokens
  }

  fn holds_position(collection: CollectionId, position: PositionId) -> bool {
    T::Positions::owner_of(collection, position).as_ref() == Some(&Self::account_id())
  }

  fn ensure_no_residual(ctx: &ExecutionContextOf<T>, tokens: &[AssetKind]) -> Result<(), DispatchError> {
    let router = Self::account_id();
    let positions_clear = [ctx.position, ctx.redeemed]
      .into_iter()
      .flatten()
      .all(|position| !Self::holds_position(ctx.collection, position));
    let balances_clear = tokens
      .iter()
      .chain(core::iter::once(&AssetKind::Native))
      .all(|token| Self::balance_of(*token, &router) == 0);

    ensure!(positions_clear && balances_clear, Error::<T>::ResidualBalance);
    Ok(())
  }
}
