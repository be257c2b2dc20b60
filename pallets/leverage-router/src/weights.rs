#![cfg_attr(rustfmt, rustfmt_skip)]
#![allow(unused_parens)]
#![allow(unused_imports)]
#![allow(missing_docs)]

use polkadot_sdk::frame_support::{traits::Get, weights::{Weight, constants::RocksDbWeight}};
use core::marker::PhantomData;

pub trait WeightInfo {
	fn execute(s: u32, p: u32) -> Weight;
	fn liquidate() -> Weight;
	fn borrow_callback() -> Weight;
	fn position_received() -> Weight;
	fn lend() -> Weight;
	fn redeem_shares(p: u32) -> Weight;
}

/// `s` is the bound on executed steps, `p` the number of permits.
pub struct SubstrateWeight<T>(PhantomData<T>);
impl<T: polkadot_sdk::frame_system::Config> WeightInfo for SubstrateWeight<T> {
	fn execute(s: u32, p: u32) -> Weight {
		Weight::from_parts(60_000_000, 6000)
			.saturating_add(Weight::from_parts(45_000_000, 4000).saturating_mul(s.into()))
			.saturating_add(Weight::from_parts(80_000_000, 1000).saturating_mul(p.into()))
			.saturating_add(T::DbWeight::get().reads(4))
			.saturating_add(T::DbWeight::get().reads((6_u64).saturating_mul(s.into())))
			.saturating_add(T::DbWeight::get().reads((2_u64).saturating_mul(p.into())))
			.saturating_add(T::DbWeight::get().writes(4))
			.saturating_add(T::DbWeight::get().writes((6_u64).saturating_mul(s.into())))
			.saturating_add(T::DbWeight::get().writes((2_u64).saturating_mul(p.into())))
	}
	fn liquidate() -> Weight {
		Weight::from_parts(90_000_000, 8000)
			.saturating_add(T::DbWeight::get().reads(10))
			.saturating_add(T::DbWeight::get().writes(8))
	}
	fn borrow_callback() -> Weight {
		Weight::from_parts(20_000_000, 2000)
			.saturating_add(T::DbWeight::get().reads(3))
			.saturating_add(T::DbWeight::get().writes(2))
	}
	fn position_received() -> Weight {
		Weight::from_parts(20_000_000, 2000)
			.saturating_add(T::DbWeight::get().reads(3))
			.saturating_add(T::DbWeight::get().writes(2))
	}
	fn lend() -> Weight {
		Weight::from_parts(55_000_000, 5000)
			.saturating_add(T::DbWeight::get().reads(7))
			.saturating_add(T::DbWeight::get().writes(6))
	}
	fn redeem_shares(p: u32) -> Weight {
		Weight::from_parts(55_000_000, 5000)
			.saturating_add(Weight::from_parts(80_000_000, 1000).saturating_mul(p.into()))
			.saturating_add(T::DbWeight::get().reads(7))
			.saturating_add(T::DbWeight::get().reads((2_u64).saturating_mul(p.into())))
			.saturating_add(T::DbWeight::get().writes(6))
			.saturating_add(T::DbWeight::get().writes((2_u64).saturating_mul(p.into())))
	}
}

impl WeightInfo for () {
	fn execute(s: u32, p: u32) -> Weight {
		Weight::from_parts(60_000_000, 6000)
			.saturating_add(Weight::from_parts(45_000_000, 4000).saturating_mul(s.into()))
			.saturating_add(Weight::from_parts(80_000_000, 1000).saturating_mul(p.into()))
	}
	fn liquidate() -> Weight {
		Weight::from_parts(90_000_000, 8000)
	}
	fn borrow_callback() -> Weight {
		Weight::from_parts(20_000_000, 2000)
	}
	fn position_received() -> Weight {
		Weight::from_parts(20_000_000, 2000)
	}
	fn lend() -> Weight {
		Weight::from_parts(55_000_000, 5000)
	}
	fn redeem_shares(p: u32) -> Weight {
		Weight::from_parts(55_000_000, 5000)
			.saturating_add(Weight::from_parts(80_000_000, 1000).saturating_mul(p.into()))
	}
}
