mod account;
mod account_operation;
mod block;
mod checkpoint;
mod operation;
mod post;

pub use account::{Account, RefreshDepth, LIGHT_FIELDS};
pub use account_operation::AccountOperation;
pub use block::{block_num_from_id, Block, RawBlock, GENESIS_PREVIOUS};
pub use checkpoint::{Checkpoint, Position};
pub use operation::{parse_steem_time, Operation, RawOperation};
pub use post::{split_identifier, Post, PostKind, RawPost};
