// A single chain: the main chain (forkpoint 0, no parent) or a fork rooted
// at some height. Parents are never held as owned pointers — every
// operation that needs the parent resolves it through the `Registry` by
// its stable integer identity (the parent's forkpoint), which is how this
// avoids the cyclic parent/child reference a naive port would produce.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::arith::{check_bits, max_target, target_to_bits, ArithU256, GENESIS_BITS, N_TARGET_TIMESPAN};
use crate::error::{StoreError, StoreResult};
use crate::header::{hash_header, pow_hash, Header, HEADER_BYTES, NULL_HASH};
use crate::network::NetworkParams;
use crate::store::file::ChainFile;
use crate::store::registry::Registry;

#[derive(Debug, Clone, Copy)]
pub(crate) struct ChainIdentity {
    pub parent_id: Option<u32>,
    pub forkpoint: u32,
    pub size: u32,
}

pub struct Blockchain {
    file: ChainFile,
    network: NetworkParams,
    identity: Mutex<ChainIdentity>,
}

impl Blockchain {
    pub(crate) fn new(
        file: ChainFile,
        network: NetworkParams,
        parent_id: Option<u32>,
        forkpoint: u32,
        size: u32,
    ) -> Self {
        assert_ne!(parent_id, Some(forkpoint), "a chain cannot be its own parent");
        Blockchain {
            file,
            network,
            identity: Mutex::new(ChainIdentity {
                parent_id,
                forkpoint,
                size,
            }),
        }
    }

    fn snapshot(&self) -> (Option<u32>, u32, u32) {
        let id = self.identity.lock().unwrap();
        (id.parent_id, id.forkpoint, id.size)
    }

    pub fn parent_id(&self) -> Option<u32> {
        self.identity.lock().unwrap().parent_id
    }

    pub fn forkpoint(&self) -> u32 {
        self.identity.lock().unwrap().forkpoint
    }

    pub fn size(&self) -> u32 {
        self.identity.lock().unwrap().size
    }

    pub fn height(&self) -> i64 {
        let id = self.identity.lock().unwrap();
        id.forkpoint as i64 + id.size as i64 - 1
    }

    pub fn get_max_child(&self, registry: &Registry) -> Option<u32> {
        let fp = self.forkpoint();
        registry
            .all_chains()
            .iter()
            .filter(|c| c.parent_id() == Some(fp))
            .map(|c| c.forkpoint())
            .max()
    }

    pub fn get_max_forkpoint(&self, registry: &Registry) -> u32 {
        self.get_max_child(registry).unwrap_or_else(|| self.forkpoint())
    }

    pub fn get_branch_size(&self, registry: &Registry) -> i64 {
        self.height() - self.get_max_forkpoint(registry) as i64 + 1
    }

    pub fn get_name(&self, registry: &Registry) -> String {
        let max_fp = self.get_max_forkpoint(registry);
        match self.get_hash(registry, max_fp as i64) {
            Ok(hash) => hash.trim_start_matches('0').chars().take(10).collect(),
            Err(_) => format!("chain@{max_fp}"),
        }
    }

    /// For each chunk this chain has fully stored, the hash of its last
    /// header and the target that applied to the *next* chunk — the
    /// checkpoint list this chain itself would publish, derived from its own
    /// headers rather than the network-supplied table consulted elsewhere.
    pub fn get_checkpoints(&self, registry: &Registry) -> StoreResult<Vec<(String, ArithU256)>> {
        let n = self.height() / 2016;
        let mut out = Vec::new();
        for index in 0..n {
            let hash = self.get_hash(registry, (index + 1) * 2016 - 1)?;
            let (_, target) = self.get_target(registry, index)?;
            out.push((hash, target));
        }
        Ok(out)
    }

    /// Reads the header at absolute `height`, delegating to the parent for
    /// heights below this chain's forkpoint.
    pub fn read_header(&self, registry: &Registry, height: i64) -> StoreResult<Option<Header>> {
        if height < 0 {
            return Ok(None);
        }
        let (parent_id, forkpoint, size) = self.snapshot();
        if height > forkpoint as i64 + size as i64 - 1 {
            return Ok(None);
        }
        if height < forkpoint as i64 {
            let parent = registry.get_chain(
                parent_id.expect("a chain with headers below its forkpoint must have a parent"),
            )?;
            return parent.read_header(registry, height);
        }
        let index = (height - forkpoint as i64) as u32;
        match self.file.read_record(parent_id, forkpoint, index)? {
            None => Ok(None),
            Some(bytes) => {
                if Header::is_null_record(&bytes) {
                    Ok(None)
                } else {
                    Ok(Some(Header::deserialize(&bytes, height as u32)?))
                }
            }
        }
    }

    /// 64-char hex identity hash at `height`. Height -1 is the null
    /// sentinel, height 0 is the network genesis, and checkpointed chunk
    /// boundaries return the hard-coded checkpoint hash even if this
    /// chain's own file disagrees.
    pub fn get_hash(&self, registry: &Registry, height: i64) -> StoreResult<String> {
        if height == -1 {
            return Ok(NULL_HASH.to_string());
        }
        if height == 0 {
            return Ok(self.network.genesis.to_string());
        }
        let max_cp = self.network.max_checkpoint();
        if height <= max_cp && (height + 1) % 2016 == 0 {
            let idx = (height / 2016) as usize;
            if let Some(cp) = self.network.checkpoint_at(idx) {
                return Ok(cp.hash.to_string());
            }
        }
        match self.read_header(registry, height)? {
            Some(h) => Ok(hash_header(&h)),
            None => Err(StoreError::MissingHeader(height as u32)),
        }
    }

    pub fn check_hash(&self, registry: &Registry, height: i64, hash: &str) -> bool {
        matches!(self.get_hash(registry, height), Ok(h) if h == hash)
    }

    pub fn check_header(&self, registry: &Registry, header: &Header) -> bool {
        self.check_hash(registry, header.block_height as i64, &hash_header(header))
    }

    fn retarget_from_gap(&self, last_bits: u32, actual_secs: i64) -> StoreResult<(u32, ArithU256)> {
        check_bits(last_bits)?;
        let timespan = N_TARGET_TIMESPAN as i64;
        let modulated = (timespan - (actual_secs - timespan) / 8).clamp(timespan * 7 / 8, timespan * 3 / 2) as u64;
        let old = ArithU256::from_compact(last_bits);
        // NOTE: this divides by the same `modulated` value it just
        // multiplied by, which is a documented quirk of the reference this
        // was ported from and is intentionally not "corrected" here.
        let mut new = old.mul_u64(modulated).div_u64(modulated);
        let max = max_target();
        if new > max {
            new = max;
        }
        Ok((target_to_bits(&new), new))
    }

    /// Retarget for the single header `last` at absolute height `index`,
    /// given the header immediately before it.
    pub fn get_target2(
        &self,
        registry: &Registry,
        index: i64,
        last: &Header,
    ) -> StoreResult<(u32, ArithU256)> {
        if index <= 0 {
            return Ok((GENESIS_BITS, max_target()));
        }
        let first = self
            .read_header(registry, index - 1)?
            .ok_or(StoreError::MissingHeader((index - 1).max(0) as u32))?;
        let actual = last.timestamp as i64 - first.timestamp as i64;
        self.retarget_from_gap(last.bits, actual)
    }

    /// Chunk-boundary retarget: the target to use for chunk `index + 1`,
    /// computed from the first and last headers of chunk `index`.
    pub fn get_target(&self, registry: &Registry, index: i64) -> StoreResult<(u32, ArithU256)> {
        if self.network.testnet {
            return Ok((0, ArithU256::ZERO));
        }
        if (index as usize) < self.network.checkpoints.len() {
            let cp = &self.network.checkpoints[index as usize];
            let target = ArithU256::from_be_bytes(&cp.target);
            return Ok((target_to_bits(&target), target));
        }
        let chunk_start = index * 2016;
        let first = self
            .read_header(registry, chunk_start)?
            .ok_or(StoreError::MissingHeader(chunk_start as u32))?;
        let last = self
            .read_header(registry, chunk_start + 2015)?
            .ok_or(StoreError::MissingHeader((chunk_start + 2015) as u32))?;
        let actual = last.timestamp as i64 - first.timestamp as i64;
        self.retarget_from_gap(last.bits, actual)
    }

    /// Structural + linkage verification. `check_pow` defaults to `false`
    /// throughout this crate: the bits/PoW comparison below is wired up but
    /// not enabled by default, matching the currently-disabled check in the
    /// source this was ported from.
    pub fn verify_header(
        &self,
        h: &Header,
        prev_hash: &str,
        target: &ArithU256,
        bits: u32,
        expected_hash: Option<&str>,
        check_pow: bool,
    ) -> StoreResult<()> {
        let digest = pow_hash(h);
        if let Some(expected) = expected_hash {
            let actual = hash_header(h);
            if expected != actual {
                return Err(StoreError::Verification(format!(
                    "hash mismatch: expected {expected}, got {actual}"
                )));
            }
        }
        let prev_hex = hex::encode(h.prev_block_hash);
        if prev_hex != prev_hash {
            return Err(StoreError::Verification(format!(
                "prev hash mismatch: header has {prev_hex}, expected {prev_hash}"
            )));
        }
        if self.network.testnet {
            return Ok(());
        }
        if check_pow {
            check_bits(bits)?;
            if h.bits != bits {
                return Err(StoreError::Verification(format!(
                    "bits mismatch: header has {:#010x}, expected {bits:#010x}",
                    h.bits
                )));
            }
            let mut raw = [0u8; 32];
            raw.copy_from_slice(&hex::decode(&digest).unwrap_or_else(|_| vec![0u8; 32]));
            if ArithU256::from_be_bytes(&raw) > *target {
                return Err(StoreError::Verification(
                    "insufficient proof of work".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn verify_chunk(
        &self,
        registry: &Registry,
        index: i64,
        data: &[u8],
        check_pow: bool,
    ) -> StoreResult<()> {
        if data.len() % HEADER_BYTES != 0 {
            return Err(StoreError::InvalidHeader(
                "chunk length is not a multiple of the header size".to_string(),
            ));
        }
        let num = data.len() / HEADER_BYTES;
        let start = index * 2016;
        let mut prev_hash = self.get_hash(registry, start - 1)?;
        for i in 0..num {
            let height = start + i as i64;
            let h = Header::deserialize(&data[i * HEADER_BYTES..(i + 1) * HEADER_BYTES], height as u32)?;
            let expected = match self.get_hash(registry, height) {
                Ok(hash) => Some(hash),
                Err(StoreError::MissingHeader(_)) => None,
                Err(e) => return Err(e),
            };
            // Retargeting is intentionally skipped here: a bulk chunk is
            // verified before its headers are saved, so `get_target2` would
            // have to read the still-unsaved prior header. Target/bits are
            // passed as literal zero, mirroring the disabled retarget call
            // this was ported from.
            self.verify_header(&h, &prev_hash, &ArithU256::ZERO, 0, expected.as_deref(), check_pow)?;
            prev_hash = hash_header(&h);
        }
        Ok(())
    }

    /// Whether `h` extends this chain by exactly one header. Swallows every
    /// predictable failure and returns `false` — this is a predicate, not a
    /// fallible operation.
    pub fn can_connect(&self, registry: &Registry, h: &Header, check_height: bool) -> bool {
        if check_height && self.height() != h.block_height as i64 - 1 {
            return false;
        }
        if h.block_height == 0 {
            return hash_header(h) == self.network.genesis;
        }
        let prev_hash = match self.get_hash(registry, h.block_height as i64 - 1) {
            Ok(v) => v,
            Err(_) => return false,
        };
        if prev_hash != hex::encode(h.prev_block_hash) {
            return false;
        }
        let (bits, target) = match self.get_target2(registry, h.block_height as i64, h) {
            Ok(v) => v,
            Err(_) => return false,
        };
        self.verify_header(h, &prev_hash, &target, bits, None, false).is_ok()
    }

    /// Locks `a` and `b`'s identities together, always in the same order
    /// (by the chains' own address) regardless of which is logically the
    /// child — this is what lets `save_header`/`save_chunk` hold one chain's
    /// lock across its own write *and* a possible parent swap without risking
    /// a deadlock against a swap running the other direction concurrently.
    fn lock_pair<'a>(a: &'a Blockchain, b: &'a Blockchain) -> (MutexGuard<'a, ChainIdentity>, MutexGuard<'a, ChainIdentity>) {
        if (a as *const Blockchain as usize) <= (b as *const Blockchain as usize) {
            let ga = a.identity.lock().unwrap();
            let gb = b.identity.lock().unwrap();
            (ga, gb)
        } else {
            let gb = b.identity.lock().unwrap();
            let ga = a.identity.lock().unwrap();
            (ga, gb)
        }
    }

    fn append_header_locked(&self, guard: &mut ChainIdentity, h: &Header) -> StoreResult<()> {
        let delta = h.block_height as i64 - guard.forkpoint as i64;
        if delta != guard.size as i64 {
            return Err(StoreError::InvalidHeader(format!(
                "header at height {} does not extend chain of size {} at forkpoint {}",
                h.block_height, guard.size, guard.forkpoint
            )));
        }
        let data = h.serialize();
        self.file
            .write_at(guard.parent_id, guard.forkpoint, delta as u64 * HEADER_BYTES as u64, &data, true)?;
        guard.size = self.file.size_at(guard.parent_id, guard.forkpoint)?;
        Ok(())
    }

    fn append_chunk_locked(
        &self,
        guard: &mut ChainIdentity,
        index: i64,
        chunk: &[u8],
        within_checkpoint_region: bool,
    ) -> StoreResult<()> {
        let delta_height = index * 2016 - guard.forkpoint as i64;
        let mut delta_bytes = delta_height * HEADER_BYTES as i64;
        let mut data = chunk;
        if delta_bytes < 0 {
            let drop_bytes = (-delta_bytes) as usize;
            if drop_bytes > data.len() {
                return Err(StoreError::InvalidHeader(
                    "chunk lies entirely before this chain's forkpoint".to_string(),
                ));
            }
            data = &data[drop_bytes..];
            delta_bytes = 0;
        }
        let truncate = !within_checkpoint_region;
        self.file
            .write_at(guard.parent_id, guard.forkpoint, delta_bytes as u64, data, truncate)?;
        guard.size = self.file.size_at(guard.parent_id, guard.forkpoint)?;
        Ok(())
    }

    /// Appends `h`, which must extend this chain by exactly one header, then
    /// checks whether the chain now outgrows its parent. The chain's
    /// identity lock (and, when a swap is attempted, the parent's too) is
    /// held across the whole write-and-maybe-swap sequence, so two
    /// concurrent appends to the same chain can never race on the same
    /// write.
    pub fn save_header(&self, registry: &Registry, h: &Header) -> StoreResult<()> {
        loop {
            match self.parent_id() {
                None => {
                    let mut guard = self.identity.lock().unwrap();
                    if guard.parent_id.is_some() {
                        drop(guard);
                        continue; // gained a parent between the hint and the lock; retry
                    }
                    return self.append_header_locked(&mut guard, h);
                }
                Some(pid) => {
                    let parent = registry.get_chain(pid)?;
                    let (mut self_guard, mut parent_guard) = Self::lock_pair(self, &parent);
                    if self_guard.parent_id != Some(pid) {
                        continue; // identity moved between the hint and the lock; retry
                    }
                    self.append_header_locked(&mut self_guard, h)?;
                    return self.swap_with_parent_locked(registry, &mut self_guard, &parent, &mut parent_guard);
                }
            }
        }
    }

    /// Appends a run of headers. Chunks inside the checkpoint region belong
    /// to the main chain; a fork receiving one delegates instead of writing
    /// it locally. Locking follows the same held-guard discipline as
    /// `save_header`.
    pub fn save_chunk(&self, registry: &Registry, index: i64, chunk: &[u8]) -> StoreResult<()> {
        let within_checkpoint_region = (index as usize) < self.network.checkpoints.len();
        if within_checkpoint_region && self.parent_id().is_some() {
            return registry.main_chain().save_chunk(registry, index, chunk);
        }
        loop {
            match self.parent_id() {
                None => {
                    let mut guard = self.identity.lock().unwrap();
                    if guard.parent_id.is_some() {
                        drop(guard);
                        continue;
                    }
                    return self.append_chunk_locked(&mut guard, index, chunk, within_checkpoint_region);
                }
                Some(pid) => {
                    let parent = registry.get_chain(pid)?;
                    let (mut self_guard, mut parent_guard) = Self::lock_pair(self, &parent);
                    if self_guard.parent_id != Some(pid) {
                        continue;
                    }
                    self.append_chunk_locked(&mut self_guard, index, chunk, within_checkpoint_region)?;
                    return self.swap_with_parent_locked(registry, &mut self_guard, &parent, &mut parent_guard);
                }
            }
        }
    }

    /// If this fork has overtaken its parent's branch in length, exchange
    /// file content and logical identity with the parent so the longer
    /// branch ends up owning the parent's forkpoint (and, transitively, the
    /// shorter one is demoted to a fork). No file is renamed for `self` or
    /// the parent: their `path()` is a pure function of identity, and the
    /// identity swap below is exactly what makes each one resolve to the
    /// physical file the other used to own.
    pub fn swap_with_parent(&self, registry: &Registry) -> StoreResult<()> {
        loop {
            let Some(pid) = self.parent_id() else {
                return Ok(());
            };
            let parent = registry.get_chain(pid)?;
            let (mut self_guard, mut parent_guard) = Self::lock_pair(self, &parent);
            if self_guard.parent_id != Some(pid) {
                continue;
            }
            return self.swap_with_parent_locked(registry, &mut self_guard, &parent, &mut parent_guard);
        }
    }

    /// Does the actual swap, assuming `self_guard`/`parent_guard` are already
    /// held for `self` and `parent` respectively and are held across the
    /// entire read-write-reidentify sequence below.
    fn swap_with_parent_locked(
        &self,
        registry: &Registry,
        self_guard: &mut MutexGuard<'_, ChainIdentity>,
        parent: &Arc<Blockchain>,
        parent_guard: &mut MutexGuard<'_, ChainIdentity>,
    ) -> StoreResult<()> {
        let self_parent_id = self_guard.parent_id;
        let self_forkpoint = self_guard.forkpoint;
        let self_size = self_guard.size;
        let parent_parent_id = parent_guard.parent_id;
        let parent_forkpoint = parent_guard.forkpoint;
        let parent_size = parent_guard.size;

        let parent_height = parent_forkpoint as i64 + parent_size as i64 - 1;
        let parent_branch_size = (parent_height - self_forkpoint as i64 + 1) as u32;
        if parent_branch_size >= self_size {
            return Ok(());
        }
        eprintln!("[chain] swap forkpoint={self_forkpoint} parent_id={self_parent_id:?}");

        let my_data = self.file.read_records(self_parent_id, self_forkpoint, 0, self_size)?;
        let rel_index = self_forkpoint - parent_forkpoint;
        let parent_data = self
            .file
            .read_records(parent_parent_id, parent_forkpoint, rel_index, parent_branch_size)?;

        self.file.write_at(self_parent_id, self_forkpoint, 0, &parent_data, true)?;
        self.file.write_at(
            parent_parent_id,
            parent_forkpoint,
            rel_index as u64 * HEADER_BYTES as u64,
            &my_data,
            true,
        )?;

        // Other registered chains are not locked here: lock order in this
        // crate is registry -> chain, never chain -> chain beyond this
        // self/parent pair, and none of their own (parent_id, forkpoint)
        // fields change as a side effect of this swap, so their path()
        // recomputed below is always unchanged in practice. Kept for
        // fidelity with the source this was ported from, which performs the
        // same no-op-in-practice scan.
        let self_arc = registry.get_chain(self_forkpoint)?;
        let bystanders: Vec<Arc<Blockchain>> = registry
            .all_chains()
            .into_iter()
            .filter(|c| !Arc::ptr_eq(c, &self_arc) && !Arc::ptr_eq(c, parent))
            .collect();
        let old_paths: Vec<(Arc<Blockchain>, PathBuf)> = bystanders
            .iter()
            .map(|c| {
                let (p, f) = (c.parent_id(), c.forkpoint());
                (c.clone(), self.file.path(p, f))
            })
            .collect();

        let new_self_size = (self_forkpoint - parent_forkpoint) + self_size;
        **self_guard = ChainIdentity {
            parent_id: parent_parent_id,
            forkpoint: parent_forkpoint,
            size: new_self_size,
        };
        **parent_guard = ChainIdentity {
            parent_id: self_parent_id,
            forkpoint: self_forkpoint,
            size: parent_branch_size,
        };

        for (chain, old_path) in old_paths {
            let new_path = self.file.path(chain.parent_id(), chain.forkpoint());
            if new_path != old_path && old_path.exists() {
                if let Some(dir) = new_path.parent() {
                    std::fs::create_dir_all(dir)?;
                }
                std::fs::rename(&old_path, &new_path)?;
            }
        }

        registry.rekey_after_swap(self_forkpoint, self_parent_id.unwrap(), self_arc, parent.clone());
        Ok(())
    }

    /// Verifies then saves a hex-encoded chunk, the composed entry point a
    /// network layer would call when it has a whole 2016-header batch.
    /// Swallows every failure and reports it as `false`, matching the
    /// try/except-wrapped original this was ported from.
    pub fn connect_chunk(&self, registry: &Registry, index: i64, hex_data: &str) -> bool {
        let data = match hex::decode(hex_data) {
            Ok(d) => d,
            Err(e) => {
                eprintln!("[chain] connect_chunk {index}: invalid hex: {e}");
                return false;
            }
        };
        if let Err(e) = self.verify_chunk(registry, index, &data, false) {
            eprintln!("[chain] connect_chunk {index}: verify_chunk failed: {e}");
            return false;
        }
        if let Err(e) = self.save_chunk(registry, index, &data) {
            eprintln!("[chain] connect_chunk {index}: save_chunk failed: {e}");
            return false;
        }
        true
    }
}
