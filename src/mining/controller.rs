//! Mining task controller
//!
//! Owns the lifecycle of the published mining task:
//!
//! ```text
//! Idle -> Rebuilding -> Published -> Suspended -> Rebuilding / Idle
//! ```
//!
//! The controller runs as a single tokio task. Everything else talks to it
//! through a [`ControllerHandle`]. Rebuilds run on a separate task while
//! holding the chain lock, and hand the guard back with the result so the
//! lock is only released once the new task has been published.

use crate::core::policy::DIFFICULTY_WINDOW_SECS;
use crate::core::{
    format_coins, Address, Blockchain, BranchStructure, ChainError, ChainGuard, ChainLock,
    ChainState, EconomicPolicy, Transaction, TransactionError,
};
use crate::crypto::Hash;
use crate::mining::{
    BlockTemplate, FoundBlock, MiningTask, NetworkClock, Session, SystemClock, TemplateError,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bitflags::bitflags;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};

// =============================================================================
// Constants
// =============================================================================

/// How often an active task gets a fresh timestamp
pub const TASK_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// How long publishing stays suspended after a found block
pub const FOUND_BLOCK_COOLDOWN: Duration = Duration::from_secs(2);

// =============================================================================
// Errors
// =============================================================================

/// Controller errors
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),
    #[error("Invalid found block notification: {0}")]
    InvalidNotification(String),
    #[error("Mining controller stopped")]
    Stopped,
}

// =============================================================================
// State
// =============================================================================

bitflags! {
    /// Transition guards of the controller
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ControllerFlags: u8 {
        /// A rebuild holds or waits for the chain lock
        const REBUILDING = 1;
        /// A found block is being handed off; ignore further ones
        const REJECT_BLOCKS = 1 << 1;
        /// A rebuild was requested during the cooldown
        const REBUILD_DEFERRED = 1 << 2;
    }
}

/// Observable controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// No active task
    Idle,
    /// A rebuild is in flight
    Rebuilding,
    /// An active task is visible to workers
    Published,
    /// Cooling down after a found block
    Suspended,
}

/// Which addresses to pay and whether to mine at all
#[derive(Debug, Clone, Default)]
pub struct MinerSettings {
    pub enabled: bool,
    pub addresses: Vec<Address>,
}

/// Uniformly pick a payout address
pub fn pick_address<'a, R: Rng + ?Sized>(
    addresses: &'a [Address],
    rng: &mut R,
) -> Option<&'a Address> {
    addresses.choose(rng)
}

/// Depth of the block with hex `hash_hex` below the tip of its branch.
/// Unknown or malformed hashes give -1.
pub fn confirmations(chain: &Blockchain, hash_hex: &str) -> i64 {
    let Some(hash) = hex::decode(hash_hex)
        .ok()
        .and_then(|bytes| Hash::try_from(bytes.as_slice()).ok())
    else {
        return -1;
    };

    chain
        .block_meta_by_hash(&hash)
        .and_then(|meta| {
            chain
                .branch_by_id(meta.branch_id)
                .map(|branch| branch.confirmations(meta.height))
        })
        .unwrap_or(-1)
}

// =============================================================================
// Template Assembly
// =============================================================================

/// A finished, serialized template
#[derive(Debug, Clone)]
pub struct Assembly {
    pub template: BlockTemplate,
    /// Subsidy plus fees
    pub reward: u64,
    /// Height of the block being built
    pub height: u64,
}

/// Build a template on the master tip from the pending transactions.
///
/// Must run under the chain lock. Transactions that fail validation are
/// evicted from the mempool; transactions that do not fit, or whose parent
/// is still pending, stay. Returns
/// `None` when the chain has no block above genesis yet.
pub fn assemble_template(
    state: &mut ChainState,
    policy: &EconomicPolicy,
    now: u32,
    payout_address: Address,
) -> Result<Option<Assembly>, ControllerError> {
    if state.chain.chain_length() < 2 {
        log::debug!("No blocks above genesis, nothing to mine on");
        return Ok(None);
    }

    let tip = state
        .chain
        .master_branch_tip()
        .cloned()
        .ok_or(ChainError::Empty)?;
    let last_block = state.chain.last_block()?;
    let (last_time, last_difficulty) = (last_block.time(), last_block.difficulty());

    let height = tip.length;
    let structure = state.chain.branch_structure(tip.id)?;
    let recent = state
        .chain
        .block_count_in_time_range(last_time.saturating_sub(DIFFICULTY_WINDOW_SECS), last_time);

    let mut template = BlockTemplate::create();
    template.set_prev_block(tip.last_block_hash);
    template.set_time(now.max(last_time));
    template.set_difficulty(policy.difficulty_adjustment(height, last_difficulty, recent));

    let candidates: Vec<Transaction> = state.mempool.pending().cloned().collect();
    let mut fees = 0u64;
    let mut waiting = Vec::new();
    for tx in candidates {
        match select(state, &structure, &mut template, height, policy, tx)? {
            Selection::Added(fee) => fees = fees.saturating_add(fee),
            Selection::Waiting(tx) => waiting.push(tx),
            Selection::Skipped | Selection::Evicted => {}
        }
    }

    // Children that arrived before their parents get another pass
    while !waiting.is_empty() {
        let before = waiting.len();
        let mut still_waiting = Vec::new();
        for tx in waiting {
            match select(state, &structure, &mut template, height, policy, tx)? {
                Selection::Added(fee) => fees = fees.saturating_add(fee),
                Selection::Waiting(tx) => still_waiting.push(tx),
                Selection::Skipped | Selection::Evicted => {}
            }
        }
        if still_waiting.len() == before {
            break;
        }
        waiting = still_waiting;
    }

    let reward = policy.block_subsidy(height).saturating_add(fees);
    template.add_first_transaction(Transaction::payout(payout_address, reward, template.time()))?;
    template.serialize()?;

    Ok(Some(Assembly {
        template,
        reward,
        height,
    }))
}

/// What happened to one mempool candidate
enum Selection {
    Added(u64),
    /// Does not fit the remaining budget
    Skipped,
    /// Spends an output of a transaction that is still pending
    Waiting(Transaction),
    Evicted,
}

fn select(
    state: &mut ChainState,
    structure: &BranchStructure,
    template: &mut BlockTemplate,
    height: u64,
    policy: &EconomicPolicy,
    tx: Transaction,
) -> Result<Selection, ControllerError> {
    if !template.has_room_for(tx.size()) {
        log::trace!("Transaction {} does not fit, skipped", hex::encode(tx.hash()));
        return Ok(Selection::Skipped);
    }

    match tx.validate_in_branch(structure, &*template, height, policy) {
        Ok(fee) => {
            template.add_transaction(tx)?;
            Ok(Selection::Added(fee))
        }
        Err(TransactionError::UnknownInput(input)) if state.mempool.contains(&input.tx_hash) => {
            log::trace!(
                "Transaction {} waits for pending parent {}",
                hex::encode(tx.hash()),
                hex::encode(input.tx_hash)
            );
            Ok(Selection::Waiting(tx))
        }
        Err(e) => {
            log::debug!("Evicting transaction {}: {}", hex::encode(tx.hash()), e);
            state.mempool.evict(tx.hash());
            Ok(Selection::Evicted)
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Messages accepted by the controller
#[derive(Debug)]
pub(crate) enum Command {
    Rebuild,
    BlockFound {
        hash: String,
        block: String,
        tx_hashes: Vec<String>,
    },
    Confirmations {
        hash: String,
        respond: oneshot::Sender<i64>,
    },
    State {
        respond: oneshot::Sender<ControllerState>,
    },
    Shutdown,
}

/// Cloneable handle to a running controller
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl ControllerHandle {
    fn send(&self, command: Command) -> Result<(), ControllerError> {
        self.commands
            .send(command)
            .map_err(|_| ControllerError::Stopped)
    }

    /// Ask for a new template (new tip, new transactions)
    pub fn request_rebuild(&self) -> Result<(), ControllerError> {
        self.send(Command::Rebuild)
    }

    /// Report a block found by a worker: base58 block hash, base64 raw
    /// block, base58 transaction hashes.
    pub fn block_found(
        &self,
        hash: String,
        block: String,
        tx_hashes: Vec<String>,
    ) -> Result<(), ControllerError> {
        self.send(Command::BlockFound {
            hash,
            block,
            tx_hashes,
        })
    }

    /// Confirmations of the block with the given hex hash, -1 if unknown
    pub async fn confirmations(&self, hash_hex: &str) -> Result<i64, ControllerError> {
        let (respond, response) = oneshot::channel();
        self.send(Command::Confirmations {
            hash: hash_hex.to_string(),
            respond,
        })?;
        response.await.map_err(|_| ControllerError::Stopped)
    }

    pub async fn state(&self) -> Result<ControllerState, ControllerError> {
        let (respond, response) = oneshot::channel();
        self.send(Command::State { respond })?;
        response.await.map_err(|_| ControllerError::Stopped)
    }

    pub fn shutdown(&self) -> Result<(), ControllerError> {
        self.send(Command::Shutdown)
    }

    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (commands, rx) = mpsc::unbounded_channel();
        (Self { commands }, rx)
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Result of a rebuild, carrying the lock it was assembled under
struct Assembled {
    outcome: Result<Option<Assembly>, ControllerError>,
    guard: ChainGuard,
}

/// The mining task state machine
pub struct MiningController {
    machine: TaskMachine,
    commands: mpsc::UnboundedReceiver<Command>,
    assembled: mpsc::UnboundedReceiver<Assembled>,
}

impl MiningController {
    /// Create a controller, its handle, and the receiving end of found blocks
    pub fn new(
        chain: ChainLock,
        session: Arc<Session>,
        settings: MinerSettings,
        policy: Arc<EconomicPolicy>,
    ) -> (Self, ControllerHandle, mpsc::UnboundedReceiver<FoundBlock>) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (assembled_tx, assembled) = mpsc::unbounded_channel();
        let (found_tx, found_rx) = mpsc::unbounded_channel();

        let machine = TaskMachine {
            chain,
            session,
            settings,
            policy,
            clock: Arc::new(SystemClock),
            rng: StdRng::from_entropy(),
            found_blocks: found_tx,
            assembled: assembled_tx,
            template: None,
            reward: 0,
            flags: ControllerFlags::empty(),
            cooldown_until: None,
        };

        let controller = Self {
            machine,
            commands,
            assembled,
        };
        let handle = ControllerHandle {
            commands: commands_tx,
        };
        (controller, handle, found_rx)
    }

    pub fn with_clock(mut self, clock: Arc<dyn NetworkClock>) -> Self {
        self.machine.clock = clock;
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.machine.rng = rng;
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until shutdown or until every handle is dropped
    pub async fn run(self) {
        let Self {
            mut machine,
            mut commands,
            mut assembled,
        } = self;

        let mut refresh = interval_at(Instant::now() + TASK_REFRESH_INTERVAL, TASK_REFRESH_INTERVAL);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!(
            "Mining controller started ({} payout addresses, mining {})",
            machine.settings.addresses.len(),
            if machine.settings.enabled { "enabled" } else { "disabled" }
        );
        machine.request_rebuild();

        loop {
            let cooldown = machine.cooldown_until;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => machine.handle(command),
                },
                Some(result) = assembled.recv() => machine.on_assembled(result),
                _ = refresh.tick() => machine.refresh_task(),
                _ = sleep_until(cooldown.unwrap_or_else(Instant::now)), if cooldown.is_some() => {
                    machine.end_cooldown();
                }
            }
        }

        machine.session.publish(MiningTask::inactive());
        log::info!("Mining controller stopped");
    }
}

struct TaskMachine {
    chain: ChainLock,
    session: Arc<Session>,
    settings: MinerSettings,
    policy: Arc<EconomicPolicy>,
    clock: Arc<dyn NetworkClock>,
    rng: StdRng,
    found_blocks: mpsc::UnboundedSender<FoundBlock>,
    assembled: mpsc::UnboundedSender<Assembled>,
    /// Last published template, kept for refresh and reactivation
    template: Option<BlockTemplate>,
    reward: u64,
    flags: ControllerFlags,
    cooldown_until: Option<Instant>,
}

impl TaskMachine {
    fn state(&self) -> ControllerState {
        if self.flags.contains(ControllerFlags::REJECT_BLOCKS) {
            ControllerState::Suspended
        } else if self.flags.contains(ControllerFlags::REBUILDING) {
            ControllerState::Rebuilding
        } else if self.session.current().active {
            ControllerState::Published
        } else {
            ControllerState::Idle
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Rebuild => self.request_rebuild(),
            Command::BlockFound {
                hash,
                block,
                tx_hashes,
            } => self.block_found(&hash, &block, &tx_hashes),
            Command::Confirmations { hash, respond } => self.confirmations(hash, respond),
            Command::State { respond } => {
                let _ = respond.send(self.state());
            }
            Command::Shutdown => {}
        }
    }

    fn request_rebuild(&mut self) {
        if !self.settings.enabled {
            log::debug!("Mining disabled, rebuild skipped");
            return;
        }
        if !self.session.is_synced() {
            log::debug!("Initial sync not complete, rebuild skipped");
            return;
        }
        if self.flags.contains(ControllerFlags::REBUILDING) {
            log::debug!("Rebuild already in flight");
            return;
        }
        if self.flags.contains(ControllerFlags::REJECT_BLOCKS) {
            log::debug!("Rebuild deferred until the cooldown ends");
            self.flags.insert(ControllerFlags::REBUILD_DEFERRED);
            return;
        }
        let Some(address) = pick_address(&self.settings.addresses, &mut self.rng).copied() else {
            log::debug!("No payout address configured, rebuild skipped");
            return;
        };

        self.flags.insert(ControllerFlags::REBUILDING);

        let chain = self.chain.clone();
        let policy = self.policy.clone();
        let clock = self.clock.clone();
        let assembled = self.assembled.clone();
        tokio::spawn(async move {
            let mut guard = chain.acquire("mining task rebuild").await;
            let outcome = assemble_template(&mut guard, &policy, clock.now(), address);
            // If the controller is gone the guard is dropped here
            let _ = assembled.send(Assembled { outcome, guard });
        });
    }

    fn on_assembled(&mut self, assembled: Assembled) {
        let Assembled { outcome, guard } = assembled;
        self.flags.remove(ControllerFlags::REBUILDING);

        match outcome {
            Ok(Some(assembly)) if self.flags.contains(ControllerFlags::REJECT_BLOCKS) => {
                log::debug!(
                    "Template for height {} discarded, a block was found meanwhile",
                    assembly.height
                );
                self.flags.insert(ControllerFlags::REBUILD_DEFERRED);
            }
            Ok(Some(assembly)) => {
                if let Err(e) = self.publish(assembly) {
                    log::error!("Mining task rebuild aborted: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => log::error!("Mining task rebuild aborted: {}", e),
        }

        drop(guard);
    }

    fn publish(&mut self, assembly: Assembly) -> Result<(), ControllerError> {
        let Assembly {
            template,
            reward,
            height,
        } = assembly;

        let task = MiningTask::from_template(&template, reward)?;
        self.session.record_stats(template.tx_count(), template.size());
        self.session.publish(task);

        log::info!(
            "Task updated, block reward {} coins (height {}, {} transactions, {} bytes)",
            format_coins(reward),
            height,
            template.tx_count(),
            template.size()
        );

        self.template = Some(template);
        self.reward = reward;
        Ok(())
    }

    /// Republish the current task with a fresh timestamp
    fn refresh_task(&mut self) {
        if self.flags.contains(ControllerFlags::REJECT_BLOCKS) || !self.session.current().active {
            return;
        }
        if let Err(e) = self.republish() {
            log::error!("Failed to refresh mining task: {}", e);
        }
    }

    fn republish(&mut self) -> Result<(), ControllerError> {
        let Some(template) = self.template.as_mut() else {
            return Ok(());
        };
        template.refresh_time(self.clock.now());
        if template.raw().is_empty() {
            template.serialize()?;
        }

        let task = MiningTask::from_template(template, self.reward)?;
        log::debug!("Mining task time refreshed to {}", template.time());
        self.session.publish(task);
        Ok(())
    }

    fn block_found(&mut self, hash: &str, block: &str, tx_hashes: &[String]) {
        if self.flags.contains(ControllerFlags::REJECT_BLOCKS) {
            log::debug!("Found block ignored while suspended");
            return;
        }

        let found = match decode_found_block(hash, block, tx_hashes) {
            Ok(found) => found,
            Err(e) => {
                log::warn!("{}", e);
                return;
            }
        };

        log::info!("New block found {}", hex::encode(found.hash));

        self.session.publish(MiningTask::inactive());
        self.flags.insert(ControllerFlags::REJECT_BLOCKS);
        if self.found_blocks.send(found).is_err() {
            log::error!("Block processor unavailable, found block dropped");
        }
        self.cooldown_until = Some(Instant::now() + FOUND_BLOCK_COOLDOWN);
    }

    fn end_cooldown(&mut self) {
        self.cooldown_until = None;
        self.flags.remove(ControllerFlags::REJECT_BLOCKS);

        if self.template.is_some() {
            match self.republish() {
                Ok(()) => log::debug!("Mining task reactivated"),
                Err(e) => log::error!("Failed to reactivate mining task: {}", e),
            }
        }

        if self.flags.contains(ControllerFlags::REBUILD_DEFERRED) {
            self.flags.remove(ControllerFlags::REBUILD_DEFERRED);
            self.request_rebuild();
        }
    }

    fn confirmations(&self, hash: String, respond: oneshot::Sender<i64>) {
        let chain = self.chain.clone();
        tokio::spawn(async move {
            let guard = chain.acquire("confirmation query").await;
            let _ = respond.send(confirmations(&guard.chain, &hash));
        });
    }
}

fn decode_hash(encoded: &str) -> Result<Hash, ControllerError> {
    bs58::decode(encoded)
        .into_vec()
        .ok()
        .and_then(|bytes| Hash::try_from(bytes.as_slice()).ok())
        .ok_or_else(|| ControllerError::InvalidNotification(format!("bad hash {:?}", encoded)))
}

fn decode_found_block(
    hash: &str,
    block: &str,
    tx_hashes: &[String],
) -> Result<FoundBlock, ControllerError> {
    let data = STANDARD
        .decode(block)
        .map_err(|e| ControllerError::InvalidNotification(format!("bad block data: {}", e)))?;

    Ok(FoundBlock {
        hash: decode_hash(hash)?,
        data,
        tx_hashes: tx_hashes
            .iter()
            .map(|encoded| decode_hash(encoded))
            .collect::<Result<_, _>>()?,
    })
}
