// Process-wide index of every known chain, keyed by forkpoint. No chain
// holds an owned reference to its parent or children — every lookup goes
// through this registry, which is the only place that needs a lock wider
// than a single chain's own identity.
//
// Lock order is always registry -> chain; nothing here calls back into a
// chain method while holding the registry's own lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::header::{hash_header, Header};
use crate::network::NetworkParams;
use crate::store::chain::Blockchain;
use crate::store::file::ChainFile;

pub struct Registry {
    network: NetworkParams,
    file: ChainFile,
    chains: Mutex<HashMap<u32, Arc<Blockchain>>>,
}

impl Registry {
    /// An empty registry with just the (possibly already-populated) main
    /// chain. Use `read_blockchains` at startup instead of this directly
    /// when fork files on disk need to be discovered too.
    pub fn new(config: &StoreConfig, network: NetworkParams) -> StoreResult<Self> {
        let file = ChainFile::new(&config.headers_dir);
        let main_size = file.size_at(None, 0)?;
        let main = Arc::new(Blockchain::new(file.clone(), network.clone(), None, 0, main_size));
        let mut chains = HashMap::new();
        chains.insert(0, main);
        Ok(Registry {
            network,
            file,
            chains: Mutex::new(chains),
        })
    }

    /// Builds a registry and walks `<headers_dir>/forks` to pick up every
    /// fork file already on disk, in parent-first order so a child can
    /// always resolve its parent. A fork that fails to connect to its
    /// recorded parent is dropped with a log line rather than failing
    /// startup outright.
    pub fn read_blockchains(config: &StoreConfig, network: NetworkParams) -> StoreResult<Self> {
        let registry = Registry::new(config, network)?;
        let forks_dir = registry.file.forks_dir();
        let entries = match std::fs::read_dir(&forks_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(registry),
            Err(e) => return Err(e.into()),
        };

        let mut candidates: Vec<(u32, u32)> = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(rest) = name.strip_prefix("fork_") else {
                continue;
            };
            let mut parts = rest.splitn(2, '_');
            let (Some(p), Some(f)) = (parts.next(), parts.next()) else {
                continue;
            };
            let (Ok(pid), Ok(fp)) = (p.parse::<u32>(), f.parse::<u32>()) else {
                continue;
            };
            candidates.push((pid, fp));
        }
        // parents sort before children since a fork's parent_id is always a
        // lower or equal forkpoint than the fork itself
        candidates.sort_by_key(|&(pid, _)| pid);

        for (pid, fp) in candidates {
            let size = registry.file.size_at(Some(pid), fp)?;
            if size == 0 {
                continue;
            }
            let parent = match registry.chains.lock().unwrap().get(&pid).cloned() {
                Some(p) => p,
                None => {
                    eprintln!("[registry] dropping fork_{pid}_{fp}: parent {pid} not registered");
                    continue;
                }
            };
            let chain = Arc::new(Blockchain::new(
                registry.file.clone(),
                registry.network.clone(),
                Some(pid),
                fp,
                size,
            ));
            let first_header = match chain.read_header(&registry, fp as i64) {
                Ok(Some(h)) => h,
                _ => {
                    eprintln!("[registry] dropping fork_{pid}_{fp}: cannot read its own forkpoint header");
                    continue;
                }
            };
            if !parent.can_connect(&registry, &first_header, false) {
                eprintln!("[registry] dropping fork_{pid}_{fp}: does not connect to parent {pid}");
                continue;
            }
            registry.chains.lock().unwrap().insert(fp, chain);
        }
        Ok(registry)
    }

    pub fn network(&self) -> &NetworkParams {
        &self.network
    }

    pub fn main_chain(&self) -> Arc<Blockchain> {
        self.chains
            .lock()
            .unwrap()
            .get(&0)
            .cloned()
            .expect("the main chain is always registered at forkpoint 0")
    }

    pub fn get_chain(&self, forkpoint: u32) -> StoreResult<Arc<Blockchain>> {
        self.chains
            .lock()
            .unwrap()
            .get(&forkpoint)
            .cloned()
            .ok_or_else(|| StoreError::InvalidHeader(format!("no registered chain at forkpoint {forkpoint}")))
    }

    /// Snapshot of every registered chain. Callers iterate this without
    /// holding the registry lock, so a chain discovered mid-iteration by a
    /// concurrent fork is simply missed rather than causing a deadlock.
    pub fn all_chains(&self) -> Vec<Arc<Blockchain>> {
        self.chains.lock().unwrap().values().cloned().collect()
    }

    /// The chain (if any) whose recorded hash at `header`'s height already
    /// matches it.
    pub fn check_header(&self, header: &Header) -> Option<Arc<Blockchain>> {
        let hash = hash_header(header);
        self.all_chains()
            .into_iter()
            .find(|chain| chain.check_hash(self, header.block_height as i64, &hash))
    }

    /// The chain (if any) that `header` extends by exactly one height.
    pub fn can_connect(&self, header: &Header) -> Option<Arc<Blockchain>> {
        self.all_chains()
            .into_iter()
            .find(|chain| chain.can_connect(self, header, true))
    }

    /// Starts a new fork rooted at `header`'s height, parented at
    /// `parent_forkpoint`, and saves `header` as its first record. The fork
    /// is registered before the header is saved so that a swap triggered
    /// immediately (e.g. a one-header fork that already outgrows a
    /// zero-length parent branch) can find it.
    pub fn fork(&self, parent_forkpoint: u32, header: &Header) -> StoreResult<Arc<Blockchain>> {
        let forkpoint = header.block_height;
        let chain = Arc::new(Blockchain::new(
            self.file.clone(),
            self.network.clone(),
            Some(parent_forkpoint),
            forkpoint,
            0,
        ));
        self.chains.lock().unwrap().insert(forkpoint, chain.clone());
        chain.save_header(self, header)?;
        Ok(chain)
    }

    /// Re-keys `self_chain`/`parent_chain` after `Blockchain::swap_with_parent`
    /// has already mutated their identities in place.
    pub(crate) fn rekey_after_swap(
        &self,
        old_self_key: u32,
        old_parent_key: u32,
        self_chain: Arc<Blockchain>,
        parent_chain: Arc<Blockchain>,
    ) {
        let mut map = self.chains.lock().unwrap();
        map.remove(&old_self_key);
        map.remove(&old_parent_key);
        map.insert(self_chain.forkpoint(), self_chain);
        map.insert(parent_chain.forkpoint(), parent_chain);
    }
}
