//! どこで: 状態DBの中核 / 何を: アカウント・journal・SNFT・staking・orchestrator / なぜ: 実行層へ取引可能な状態面を提供するため

pub mod access_list;
pub mod account;
pub mod constants;
pub mod extra;
pub mod journal;
pub mod log;
pub mod prefetch;
pub mod snft;
pub mod staking;
pub mod state_db;
pub mod state_object;

pub use account::{Account, MintDeep, NftExt, StakerExt, WormExt};
pub use log::Log;
pub use state_db::{StateDb, StateError};
