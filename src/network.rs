// Network-supplied constants consumed by the store. A binary wiring this
// crate up is expected to supply its own `NetworkParams`, built the same
// way `NetworkConfig::mainnet()` is built in a node binary: a handful of
// constants plus a small constructor.

pub const MAINNET_GENESIS: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// One `(hash, target)` pair per completed 2016-header chunk, hash is the
/// 64-char hex identity hash of the chunk's last header, target is the
/// 256-bit difficulty target that chunk's headers were mined against.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint {
    pub hash: &'static str,
    pub target: [u8; 32],
}

#[derive(Debug, Clone)]
pub struct NetworkParams {
    pub genesis: &'static str,
    pub checkpoints: &'static [Checkpoint],
    pub testnet: bool,
}

impl NetworkParams {
    pub fn mainnet() -> Self {
        NetworkParams {
            genesis: MAINNET_GENESIS,
            checkpoints: &[],
            testnet: false,
        }
    }

    pub fn testnet() -> Self {
        NetworkParams {
            genesis: MAINNET_GENESIS,
            checkpoints: &[],
            testnet: true,
        }
    }

    /// Highest header height still covered by a checkpoint, or -1 if none.
    pub fn max_checkpoint(&self) -> i64 {
        if self.checkpoints.is_empty() {
            -1
        } else {
            (self.checkpoints.len() as i64) * 2016 - 1
        }
    }

    pub fn checkpoint_at(&self, index: usize) -> Option<&Checkpoint> {
        self.checkpoints.get(index)
    }
}
