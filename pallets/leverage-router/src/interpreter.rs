//! Action interpreter: per-action handlers and the suspension protocol.

use crate::pallet::{
  ActionOf, ActiveExecution, AwaitedCallback, Config, Error, ExecutionContextOf, Pallet,
};
use crate::types::*;
use alloc::{collections::VecDeque, vec, vec::Vec};
use codec::Encode;
use frame::deps::frame_support::{ensure, traits::Get};
use frame::deps::sp_runtime::{DispatchError, DispatchResult};
use polkadot_sdk::sp_io::hashing::blake2_256;
use primitives::params::{mul_mantissa, to_mantissa};

impl<T: Config> Pallet<T> {
  /// Execute `chain` in order. A suspending action hands the rest of the chain to its
  /// collaborator, so the loop ends once the collaborator returns.
  pub(crate) fn run_chain(
    ctx: &mut ExecutionContextOf<T>,
    mut chain: VecDeque<ActionOf<T>>,
  ) -> DispatchResult {
    while let Some(action) = chain.pop_front() {
      ctx.steps = ctx.steps.saturating_add(1);
      ensure!(ctx.steps <= T::MaxSteps::get(), Error::<T>::TooManySteps);
      Self::step(ctx, action, &mut chain)?;
    }
    Ok(())
  }

  fn step(
    ctx: &mut ExecutionContextOf<T>,
    action: ActionOf<T>,
    chain: &mut VecDeque<ActionOf<T>>,
  ) -> DispatchResult {
    let collection = ctx.collection;
    let router = Self::account_id();

    match action {
      Action::MintEmpty { range } => {
        ensure!(ctx.position.is_none(), Error::<T>::PositionAlreadySet);
        let id = T::Positions::mint_empty(collection, &router, range)?;
        ctx.position = Some(id);
        ctx.position_owner = ctx.caller.clone();
        ctx.created = true;
      }
      Action::Mint {
        lp_amount_user,
        amount0_desired,
        amount1_desired,
        amount0_min,
        amount1_min,
      } => {
        Self::require_position(ctx)?;
        let lp_token = T::LiquidityPools::lp_token(collection);
        Self::pull_from_caller(ctx, lp_token, lp_amount_user, &router)?;

        if amount0_desired > 0 || amount1_desired > 0 {
          let (amount0, amount1) = Self::optimal_liquidity(
            collection,
            amount0_desired,
            amount1_desired,
            amount0_min,
            amount1_min,
          )?;
          let [token0, token1] = ctx.pool.tokens;
          Self::pull_from_caller(ctx, token0, amount0, &router)?;
          Self::pull_from_caller(ctx, token1, amount1, &router)?;
          // Deposit exactly the pulled amounts
          T::LiquidityPools::add_liquidity(collection, &router, amount0, amount1)?;
        }
        chain.push_front(Action::MintCollateral);
      }
      Action::Redeem {
        fraction,
        amount0_min,
        amount1_min,
        to,
      } => {
        let position = Self::require_position(ctx)?;
        let liquidity = T::Positions::liquidity(collection, position);
        let redeemed = mul_mantissa(liquidity, fraction).ok_or(Error::<T>::ArithmeticOverflow)?;
        ensure!(redeemed > 0, Error::<T>::RedeemZero);

        chain.push_front(Action::RemoveLiquidity {
          amount0_min,
          amount1_min,
          to,
        });
        let actions = Self::take_rest(chain);
        let continuation = Continuation::Redeem {
          collection,
          position,
          actions,
        };
        Self::suspend(
          ctx,
          continuation,
          |digest| PendingCallback::Redeem {
            collection,
            position,
            continuation: digest,
          },
          |data| {
            T::Positions::redeem(collection, &router, &router, position, fraction, data).map(|_| ())
          },
        )?;
      }
      Action::Deleverage {
        liquidity,
        amount0_min,
        amount1_min,
      } => {
        let position = Self::require_position(ctx)?;
        let total = T::Positions::liquidity(collection, position);
        ensure!(liquidity > 0 && total > 0, Error::<T>::RedeemZero);
        let fraction = to_mantissa(liquidity, total).ok_or(Error::<T>::ArithmeticOverflow)?;
        ensure!(fraction > 0, Error::<T>::RedeemZero);

        let refund = || Payer::Router {
          refund_to: Recipient::Caller,
        };
        Self::expand(
          chain,
          vec![
            Action::Redeem {
              fraction,
              amount0_min,
              amount1_min,
              to: Recipient::Router,
            },
            Action::Repay {
              index: 0,
              amount_max: Balance::MAX,
              payer: refund(),
            },
            Action::Repay {
              index: 1,
              amount_max: Balance::MAX,
              payer: refund(),
            },
          ],
        );
      }
      Action::Borrow { index, amount, to } => {
        let position = Self::require_position(ctx)?;
        ensure!(
          ctx.pool.borrowable(index).is_some(),
          Error::<T>::InvalidBorrowableIndex
        );
        let receiver = Self::resolve(ctx, &to);
        let slot = &mut ctx.borrowed[index as usize];
        *slot = slot.checked_add(amount).ok_or(Error::<T>::ArithmeticOverflow)?;

        let actions = Self::take_rest(chain);
        let continuation = Continuation::Borrow {
          collection,
          index,
          position,
          actions,
        };
        Self::suspend(
          ctx,
          continuation,
          |digest| PendingCallback::Borrow {
            collection,
            index,
            position,
            continuation: digest,
          },
          |data| {
            T::Borrowables::borrow(collection, index, &router, position, &receiver, amount, data)
          },
        )?;
      }
      Action::Repay {
        index,
        amount_max,
        payer,
      } => {
        let position = Self::require_position(ctx)?;
        let token = ctx
          .pool
          .token(index)
          .ok_or(Error::<T>::InvalidBorrowableIndex)?;
        let borrowable = ctx
          .pool
          .borrowable(index)
          .cloned()
          .ok_or(Error::<T>::InvalidBorrowableIndex)?;
        let debt = T::Borrowables::borrow_balance(collection, index, position);

        let amount = match payer {
          Payer::Caller => {
            let amount = amount_max.min(debt);
            Self::pull_from_caller(ctx, token, amount, &borrowable)?;
            amount
          }
          Payer::Router { refund_to } => {
            let held = Self::balance_of(token, &router);
            let amount = amount_max.min(debt).min(held);
            Self::transfer_asset(token, &router, &borrowable, amount)?;
            let refund_to = Self::resolve(ctx, &refund_to);
            Self::transfer_asset(token, &router, &refund_to, held - amount)?;
            amount
          }
        };

        if amount > 0 {
          let repaid = T::Borrowables::repay(collection, index, position)?;
          let slot = &mut ctx.repaid[index as usize];
          *slot = slot.saturating_add(repaid);
        }
      }
      Action::AddLiquidity {
        amount0_desired,
        amount1_desired,
        amount0_min,
        amount1_min,
      } => {
        let (amount0, amount1) = Self::optimal_liquidity(
          collection,
          amount0_desired,
          amount1_desired,
          amount0_min,
          amount1_min,
        )?;
        T::LiquidityPools::add_liquidity(collection, &router, amount0, amount1)?;
      }
      Action::RemoveLiquidity {
        amount0_min,
        amount1_min,
        to,
      } => {
        if let Some(redeemed) = ctx.redeemed.take() {
          T::Positions::withdraw(collection, &router, redeemed, &router)?;
        }
        let lp_token = T::LiquidityPools::lp_token(collection);
        let liquidity = Self::balance_of(lp_token, &router);
        ensure!(liquidity > 0, Error::<T>::NoLiquidityHeld);

        let recipient = Self::resolve(ctx, &to);
        let (amount0, amount1) =
          T::LiquidityPools::remove_liquidity(collection, &router, liquidity, &recipient)?;
        ensure!(amount0 >= amount0_min, Error::<T>::InsufficientAmount0);
        ensure!(amount1 >= amount1_min, Error::<T>::InsufficientAmount1);
      }
      Action::BorrowAndMint {
        amount0_user,
        amount1_user,
        amount0_desired,
        amount1_desired,
        amount0_min,
        amount1_min,
      } => {
        Self::require_position(ctx)?;
        let [token0, token1] = ctx.pool.tokens;
        Self::pull_from_caller(ctx, token0, amount0_user, &router)?;
        Self::pull_from_caller(ctx, token1, amount1_user, &router)?;

        let borrow = [
          amount0_desired.saturating_sub(amount0_user),
          amount1_desired.saturating_sub(amount1_user),
        ];
        let mut expansion = Vec::new();
        for (index, amount) in borrow.iter().enumerate() {
          if *amount > 0 {
            expansion.push(Action::Borrow {
              index: index as BorrowableIndex,
              amount: *amount,
              to: Recipient::Router,
            });
          }
        }
        expansion.push(Action::AddLiquidity {
          amount0_desired,
          amount1_desired,
          amount0_min,
          amount1_min,
        });
        expansion.push(Action::MintCollateral);
        // Unused borrowed funds go straight back to the borrowable
        for (index, amount) in borrow.iter().enumerate() {
          if *amount > 0 {
            expansion.push(Action::Repay {
              index: index as BorrowableIndex,
              amount_max: Balance::MAX,
              payer: Payer::Router {
                refund_to: Recipient::Caller,
              },
            });
          }
        }
        Self::expand(chain, expansion);
      }
      Action::WithdrawToken { token, to } => {
        let recipient = Self::resolve(ctx, &to);
        Self::sweep(token, &recipient)?;
      }
      Action::WithdrawNative { to } => {
        let wrapped = T::WrappedNative::get();
        let held = Self::balance_of(wrapped, &router);
        if held > 0 {
          T::NativeWrapper::unwrap(&router, held)?;
        }
        let recipient = Self::resolve(ctx, &to);
        Self::sweep(AssetKind::Native, &recipient)?;
        if recipient != router {
          ctx.native_available = 0;
        }
      }
      Action::MintCollateral => {
        let position = Self::require_position(ctx)?;
        let lp_token = T::LiquidityPools::lp_token(collection);
        let liquidity = Self::balance_of(lp_token, &router);
        if liquidity > 0 {
          T::Positions::deposit(collection, position, &router, liquidity)?;
        }
      }
    }

    Ok(())
  }

  fn require_position(ctx: &ExecutionContextOf<T>) -> Result<PositionId, DispatchError> {
    ctx.position.ok_or_else(|| Error::<T>::NoActivePosition.into())
  }

  /// Schedule `actions` to run next, in order
  fn expand(chain: &mut VecDeque<ActionOf<T>>, actions: Vec<ActionOf<T>>) {
    for action in actions.into_iter().rev() {
      chain.push_front(action);
    }
  }

  fn take_rest(chain: &mut VecDeque<ActionOf<T>>) -> Vec<ActionOf<T>> {
    core::mem::take(chain).into()
  }

  /// Hand `continuation` to a collaborator and wait for it to come back.
  ///
  /// The context and a commitment to the continuation bytes are stored before `call`; the
  /// callback gate consumes the commitment and runs the continuation against the stored
  /// context. After `call` returns the commitment must be gone.
  fn suspend(
    ctx: &mut ExecutionContextOf<T>,
    continuation: Continuation<T::AccountId>,
    pending: impl FnOnce([u8; 32]) -> PendingCallback,
    call: impl FnOnce(Vec<u8>) -> DispatchResult,
  ) -> DispatchResult {
    let data = continuation.encode();
    let digest = blake2_256(&data);

    log::debug!(
      target: crate::LOG_TARGET,
      "suspending on {} callback with {} continuation bytes",
      continuation_kind(&continuation),
      data.len(),
    );

    AwaitedCallback::<T>::put(pending(digest));
    ActiveExecution::<T>::put(&*ctx);

    call(data)?;

    ensure!(
      !AwaitedCallback::<T>::exists(),
      Error::<T>::CallbackNotReceived
    );
    *ctx = ActiveExecution::<T>::get().ok_or(Error::<T>::CallbackNotReceived)?;
    Ok(())
  }

  /// Continue a suspended chain from a callback gate
  pub(crate) fn resume(
    actions: Vec<ActionOf<T>>,
    prepare: impl FnOnce(&mut ExecutionContextOf<T>),
  ) -> DispatchResult {
    let mut ctx = ActiveExecution::<T>::get().ok_or(Error::<T>::FromNotRouter)?;
    prepare(&mut ctx);

    log::debug!(
      target: crate::LOG_TARGET,
      "resuming {} actions at step {}",
      actions.len(),
      ctx.steps,
    );

    Self::run_chain(&mut ctx, actions.into())?;
    ActiveExecution::<T>::put(ctx);
    Ok(())
  }
}

fn continuation_kind<AccountId>(continuation: &Continuation<AccountId>) -> &'static str {
  match continuation {
    Continuation::Borrow { .. } => "borrow",
    Continuation::Redeem { .. } => "redeem",
  }
}
