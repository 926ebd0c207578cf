pub type OnlineEpochs = u8;
pub type Shard = u64;
