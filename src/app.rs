// Protocol adapter: the callback surface driven by the consensus engine.
// Only the block sequence mutates the ledger; CheckTx, Info and Query are read-only.

use crate::config::{AppConfig, ChainParams, GenesisValidator};
use crate::crypto::{Hash, ZERO_HASH, validator_address};
use crate::error::{AppError, Rejection, ResultCode};
use crate::incentives::{Misbehavior, ValidatorUpdate, VoteInfo, apply_block_incentives};
use crate::ledger::{LedgerState, Validator};
use crate::oracle::OracleCache;
use crate::transition::{Event, apply_transaction};
use crate::validation::{ValidationContext, check_bytes};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Time source for admission checks. Block application uses block time instead.
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// Settable clock for tests and replays.
#[derive(Default)]
pub struct FixedClock {
    secs: AtomicU64,
}

impl FixedClock {
    pub fn new(secs: u64) -> Self {
        Self {
            secs: AtomicU64::new(secs),
        }
    }

    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_secs(&self) -> u64 {
        self.secs.load(Ordering::SeqCst)
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now_secs(&self) -> u64 {
        (**self).now_secs()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoResponse {
    pub chain_id: String,
    pub version: String,
    pub last_block_height: u64,
    pub last_block_app_hash: String,
    pub total_transactions: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InitChainRequest {
    #[serde(default)]
    pub validators: Vec<GenesisValidator>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitChainResponse {
    pub validators: Vec<ValidatorUpdate>,
    pub app_hash: String,
}

/// Outcome of CheckTx or of one transaction inside a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResult {
    pub code: u32,
    #[serde(default)]
    pub log: String,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl TxResult {
    pub fn ok(events: Vec<Event>) -> Self {
        Self {
            code: ResultCode::Ok.as_u32(),
            log: String::new(),
            events,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == ResultCode::Ok.as_u32()
    }
}

impl From<Rejection> for TxResult {
    fn from(r: Rejection) -> Self {
        Self {
            code: r.code.as_u32(),
            log: r.log,
            events: Vec::new(),
        }
    }
}

/// Block-boundary facts; shared by FinalizeBlock and the legacy BeginBlock.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub time_secs: u64,
    /// Participation in the previous block's commit.
    #[serde(default)]
    pub votes: Vec<VoteInfo>,
    #[serde(default)]
    pub misbehavior: Vec<Misbehavior>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FinalizeBlockRequest {
    #[serde(flatten)]
    pub header: BlockHeader,
    #[serde(default, with = "hex_list")]
    pub txs: Vec<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeBlockResponse {
    pub tx_results: Vec<TxResult>,
    pub validator_updates: Vec<ValidatorUpdate>,
    pub app_hash: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndBlockResponse {
    pub validator_updates: Vec<ValidatorUpdate>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResponse {
    pub height: u64,
    pub app_hash: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub code: u32,
    #[serde(default)]
    pub log: String,
    #[serde(default)]
    pub value: String,
    pub height: u64,
}

/// Everything needed to resume after a restart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSnapshot {
    pub height: u64,
    pub app_hash: String,
    pub state: LedgerState,
}

struct OpenBlock {
    header: BlockHeader,
}

pub struct Application {
    chain_id: String,
    params: ChainParams,
    state: LedgerState,
    oracle: OracleCache,
    clock: Box<dyn Clock>,
    height: u64,
    last_app_hash: Hash,
    /// Set by InitChain, even for an empty genesis, and by restore.
    initialized: bool,
    open_block: Option<OpenBlock>,
    /// Height of the block finished but not yet committed.
    pending_height: Option<u64>,
}

impl Application {
    pub fn new(
        chain_id: impl Into<String>,
        params: ChainParams,
        oracle: OracleCache,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            chain_id: chain_id.into(),
            params,
            state: LedgerState::new(),
            oracle,
            clock,
            height: 0,
            last_app_hash: ZERO_HASH,
            initialized: false,
            open_block: None,
            pending_height: None,
        }
    }

    pub fn from_config(cfg: &AppConfig, oracle: OracleCache) -> Self {
        Self::new(
            cfg.chain_id.clone(),
            cfg.params.clone(),
            oracle,
            Box::new(SystemClock),
        )
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    pub fn oracle(&self) -> &OracleCache {
        &self.oracle
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn last_app_hash(&self) -> Hash {
        self.last_app_hash
    }

    pub fn info(&self) -> InfoResponse {
        InfoResponse {
            chain_id: self.chain_id.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            last_block_height: self.height,
            last_block_app_hash: hex::encode(self.last_app_hash),
            total_transactions: self.state.total_transactions,
        }
    }

    /// Seed the validator set. Runs once; a bad entry leaves the state untouched.
    pub fn init_chain(&mut self, req: InitChainRequest) -> Result<InitChainResponse, AppError> {
        if self.initialized || self.height > 0 {
            return Err(AppError::AlreadyInitialized);
        }

        let mut validators = BTreeMap::new();
        for gv in &req.validators {
            let pub_key = gv.pubkey().map_err(AppError::InvalidGenesisKey)?;
            let address = validator_address(&pub_key);
            if gv.power < 0 {
                return Err(AppError::NegativeGenesisPower {
                    address,
                    power: gv.power,
                });
            }
            if validators.contains_key(&address) {
                return Err(AppError::DuplicateGenesisValidator(address));
            }
            validators.insert(address, Validator::new(pub_key, gv.power));
        }

        self.state.validators = validators;
        self.initialized = true;
        self.last_app_hash = self.state.app_hash();
        info!(
            chain_id = %self.chain_id,
            validators = self.state.validators.len(),
            "chain initialised"
        );

        let updates = self
            .state
            .validators
            .values()
            .map(|v| ValidatorUpdate {
                pub_key: v.pub_key,
                power: v.governance_power,
            })
            .collect();
        Ok(InitChainResponse {
            validators: updates,
            app_hash: hex::encode(self.last_app_hash),
        })
    }

    /// Admission gate: decode and validate against the latest applied state,
    /// which includes a finalized block not yet committed, and the local clock.
    pub fn check_tx(&self, bytes: &[u8]) -> TxResult {
        let ctx = ValidationContext {
            now_secs: self.clock.now_secs(),
            params: &self.params,
            oracle: &self.oracle,
        };
        match check_bytes(&self.state, &ctx, bytes) {
            Ok(admitted) => {
                debug!(kind = admitted.kind(), "check_tx accepted");
                TxResult::ok(Vec::new())
            }
            Err(rejection) => {
                debug!(code = rejection.code.as_u32(), log = %rejection.log, "check_tx rejected");
                rejection.into()
            }
        }
    }

    pub fn begin_block(&mut self, header: BlockHeader) -> Result<(), AppError> {
        if let Some(open) = &self.open_block {
            return Err(AppError::BlockAlreadyOpen(open.header.height));
        }
        debug!(height = header.height, time = header.time_secs, "block opened");
        self.open_block = Some(OpenBlock { header });
        Ok(())
    }

    /// Validate against the current state, then apply. Never fails the block.
    pub fn deliver_tx(&mut self, bytes: &[u8]) -> TxResult {
        let Some(open) = &self.open_block else {
            warn!("deliver_tx outside of a block");
            return Rejection::new(ResultCode::UnknownError, AppError::NoOpenBlock.to_string())
                .into();
        };
        let height = open.header.height;
        let ctx = ValidationContext {
            now_secs: open.header.time_secs,
            params: &self.params,
            oracle: &self.oracle,
        };

        let admitted = match check_bytes(&self.state, &ctx, bytes) {
            Ok(a) => a,
            Err(rejection) => {
                warn!(
                    height,
                    code = rejection.code.as_u32(),
                    log = %rejection.log,
                    "transaction rejected"
                );
                return rejection.into();
            }
        };

        match apply_transaction(&mut self.state, &self.oracle, admitted, &self.params) {
            Ok(event) => {
                let event = event.to_event();
                info!(height, kind = %event.kind, "transaction applied");
                TxResult::ok(vec![event])
            }
            Err(rejection) => {
                warn!(height, log = %rejection.log, "transaction failed at apply");
                rejection.into()
            }
        }
    }

    /// Close the block: run the incentive pass once, after all transactions.
    pub fn end_block(&mut self) -> Result<EndBlockResponse, AppError> {
        let open = self.open_block.take().ok_or(AppError::NoOpenBlock)?;
        let updates = apply_block_incentives(
            &mut self.state,
            &open.header.votes,
            &open.header.misbehavior,
            &self.params,
        );
        self.pending_height = Some(open.header.height);
        debug!(
            height = open.header.height,
            updates = updates.len(),
            "block closed"
        );
        Ok(EndBlockResponse {
            validator_updates: updates,
        })
    }

    /// Whole-block form of BeginBlock, DeliverTx per transaction, EndBlock.
    pub fn finalize_block(
        &mut self,
        req: FinalizeBlockRequest,
    ) -> Result<FinalizeBlockResponse, AppError> {
        self.begin_block(req.header)?;
        let tx_results: Vec<TxResult> = req.txs.iter().map(|tx| self.deliver_tx(tx)).collect();
        let end = self.end_block()?;
        Ok(FinalizeBlockResponse {
            tx_results,
            validator_updates: end.validator_updates,
            app_hash: hex::encode(self.state.app_hash()),
        })
    }

    /// Seal the current state and report its digest.
    pub fn commit(&mut self) -> CommitResponse {
        if let Some(h) = self.pending_height.take() {
            self.height = h;
        }
        self.last_app_hash = self.state.app_hash();
        info!(
            height = self.height,
            app_hash = %hex::encode(self.last_app_hash),
            total_transactions = self.state.total_transactions,
            "committed"
        );
        CommitResponse {
            height: self.height,
            app_hash: hex::encode(self.last_app_hash),
        }
    }

    pub fn query(&self, path: &str) -> QueryResponse {
        let path = path.trim_matches('/');
        let result = match path.split_once('/') {
            None if path == "tx" => Ok(Some(self.state.total_transactions.to_string())),
            None if path == "data" => json(&self.state.verified_data),
            None if path == "validators" => json(&self.state.validators),
            Some(("data", feed)) => match self.state.verified_data.get(feed) {
                Some(item) => json(item),
                None => Ok(None),
            },
            Some(("validator", address)) => match self.state.validator(&address.to_uppercase()) {
                Some(v) => json(v),
                None => Ok(None),
            },
            _ => Err(Rejection::new(
                ResultCode::InvalidQueryPath,
                format!(
                    "invalid query path, expected tx, data, data/<feed>, validators or validator/<address>, got {}",
                    path
                ),
            )),
        };

        match result {
            Ok(Some(value)) => QueryResponse {
                code: ResultCode::Ok.as_u32(),
                log: String::new(),
                value,
                height: self.height,
            },
            Ok(None) => QueryResponse {
                code: ResultCode::Ok.as_u32(),
                log: "not found".to_string(),
                value: String::new(),
                height: self.height,
            },
            Err(r) => QueryResponse {
                code: r.code.as_u32(),
                log: r.log,
                value: String::new(),
                height: self.height,
            },
        }
    }

    pub fn snapshot(&self) -> AppSnapshot {
        AppSnapshot {
            height: self.height,
            app_hash: hex::encode(self.last_app_hash),
            state: self.state.clone(),
        }
    }

    /// Resume from a committed snapshot; rejects one whose state does not hash to its app hash.
    pub fn restore(&mut self, snapshot: AppSnapshot) -> Result<(), AppError> {
        let actual = snapshot.state.app_hash();
        if hex::encode(actual) != snapshot.app_hash.to_lowercase() {
            return Err(AppError::SnapshotMismatch {
                expected: snapshot.app_hash,
                actual: hex::encode(actual),
            });
        }
        self.state = snapshot.state;
        self.height = snapshot.height;
        self.last_app_hash = actual;
        self.initialized = true;
        self.open_block = None;
        self.pending_height = None;
        info!(height = self.height, "state restored from snapshot");
        Ok(())
    }
}

fn json<T: Serialize>(value: &T) -> Result<Option<String>, Rejection> {
    serde_json::to_string(value)
        .map(Some)
        .map_err(|e| Rejection::new(ResultCode::UnknownError, e.to_string()))
}

mod hex_list {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(items: &[Vec<u8>], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(items.iter().map(hex::encode))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<u8>>, D::Error> {
        let raw = Vec::<String>::deserialize(d)?;
        raw.iter()
            .map(|s| hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use crate::tx::{StakeTokens, Transaction, ValidateData};
    use std::sync::Arc;

    fn app_at(now: u64) -> (Application, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(now));
        let params = ChainParams {
            min_validator_power: 10_000,
            ..ChainParams::default()
        };
        let app = Application::new("test", params, OracleCache::new(), Box::new(clock.clone()));
        (app, clock)
    }

    fn genesis(seeds: &[u8]) -> InitChainRequest {
        InitChainRequest {
            validators: seeds
                .iter()
                .map(|s| GenesisValidator {
                    pub_key_hex: hex::encode(pubkey(*s)),
                    power: 50_000,
                })
                .collect(),
        }
    }

    fn block(height: u64, time_secs: u64, txs: Vec<Vec<u8>>) -> FinalizeBlockRequest {
        FinalizeBlockRequest {
            header: BlockHeader {
                height,
                time_secs,
                votes: Vec::new(),
                misbehavior: Vec::new(),
            },
            txs,
        }
    }

    #[test]
    fn init_chain_seeds_once() {
        let (mut app, _) = app_at(100);
        let resp = app.init_chain(genesis(&[1, 2])).expect("init");
        assert_eq!(resp.validators.len(), 2);
        assert_eq!(app.state().validators.len(), 2);
        assert!(app.state().validator(&address(1)).is_some());
        assert!(matches!(
            app.init_chain(genesis(&[3])),
            Err(AppError::AlreadyInitialized)
        ));
    }

    #[test]
    fn empty_genesis_still_counts_as_initialized() {
        let (mut app, _) = app_at(100);
        let resp = app.init_chain(genesis(&[])).expect("init");
        assert!(resp.validators.is_empty());
        assert!(matches!(
            app.init_chain(genesis(&[1])),
            Err(AppError::AlreadyInitialized)
        ));
        assert!(app.state().validators.is_empty());
    }

    #[test]
    fn init_chain_rejects_bad_entries_atomically() {
        let (mut app, _) = app_at(100);
        assert!(matches!(
            app.init_chain(genesis(&[1, 1])),
            Err(AppError::DuplicateGenesisValidator(_))
        ));
        let bad = InitChainRequest {
            validators: vec![GenesisValidator {
                pub_key_hex: "zz".into(),
                power: 1,
            }],
        };
        assert!(matches!(
            app.init_chain(bad),
            Err(AppError::InvalidGenesisKey(_))
        ));
        assert!(app.state().validators.is_empty());
        assert!(app.init_chain(genesis(&[1])).is_ok());
    }

    #[test]
    fn check_tx_uses_clock_and_does_not_mutate() {
        let (app, clock) = app_at(100);
        app.oracle().record_data("btc", 99, "1");
        let tx = Transaction::ValidateData(ValidateData {
            data_feed: "btc".into(),
            data_value: "1".into(),
            data_timestamp: 99,
        })
        .encode();

        assert_eq!(app.check_tx(&tx).code, ResultCode::DataTooNew.as_u32());
        clock.set(101);
        assert!(app.check_tx(&tx).is_ok());
        assert!(app.check_tx(&tx).is_ok());
        assert_eq!(app.state().total_transactions, 0);
    }

    #[test]
    fn deliver_tx_requires_open_block() {
        let (mut app, _) = app_at(100);
        let result = app.deliver_tx(b"{}");
        assert_eq!(result.code, ResultCode::UnknownError.as_u32());
        assert!(matches!(app.end_block(), Err(AppError::NoOpenBlock)));
    }

    #[test]
    fn begin_block_twice_is_misuse() {
        let (mut app, _) = app_at(100);
        app.begin_block(BlockHeader::default()).expect("begin");
        assert!(matches!(
            app.begin_block(BlockHeader::default()),
            Err(AppError::BlockAlreadyOpen(0))
        ));
    }

    #[test]
    fn finalize_block_uses_block_time() {
        let (mut app, _) = app_at(0);
        app.oracle().record_data("btc", 99, "1");
        let tx = Transaction::ValidateData(ValidateData {
            data_feed: "btc".into(),
            data_value: "1".into(),
            data_timestamp: 99,
        })
        .encode();

        let resp = app.finalize_block(block(1, 200, vec![tx])).expect("finalize");
        assert!(resp.tx_results[0].is_ok());
        assert_eq!(resp.tx_results[0].events[0].kind, "data_verified");
        assert_eq!(app.state().total_transactions, 1);
    }

    #[test]
    fn commit_advances_height_and_hash() {
        let (mut app, _) = app_at(100);
        app.init_chain(genesis(&[1])).expect("init");
        let genesis_hash = app.last_app_hash();

        let stake = Transaction::StakeTokens(StakeTokens {
            amount: -45_000,
            validator_address: address(1),
            proof: stake_proof(1, -45_000, 0),
        })
        .encode();
        let resp = app.finalize_block(block(1, 100, vec![stake])).expect("finalize");
        assert!(resp.tx_results[0].is_ok());

        let commit = app.commit();
        assert_eq!(commit.height, 1);
        assert_eq!(commit.app_hash, resp.app_hash);
        assert_ne!(app.last_app_hash(), genesis_hash);
        assert_eq!(app.info().last_block_height, 1);
        assert_eq!(app.info().total_transactions, 1);
    }

    #[test]
    fn query_paths() {
        let (mut app, _) = app_at(100);
        app.init_chain(genesis(&[1])).expect("init");

        assert_eq!(app.query("tx").value, "0");
        assert_eq!(app.query("data").value, "{}");
        let v = app.query(&format!("validator/{}", address(1).to_lowercase()));
        assert!(v.value.contains("\"governance_power\":50000"));
        assert_eq!(app.query("data/none").log, "not found");
        assert_eq!(
            app.query("price").code,
            ResultCode::InvalidQueryPath.as_u32()
        );
    }

    #[test]
    fn restore_checks_app_hash() {
        let (mut app, _) = app_at(100);
        app.init_chain(genesis(&[1, 2])).expect("init");
        app.commit();
        let snap = app.snapshot();

        let (mut other, _) = app_at(100);
        other.restore(snap.clone()).expect("restore");
        assert_eq!(other.last_app_hash(), app.last_app_hash());
        assert_eq!(other.state(), app.state());
        assert!(matches!(
            other.init_chain(genesis(&[3])),
            Err(AppError::AlreadyInitialized)
        ));

        let mut tampered = snap;
        tampered.state.total_transactions = 7;
        assert!(matches!(
            other.restore(tampered),
            Err(AppError::SnapshotMismatch { .. })
        ));
    }

    #[test]
    fn finalize_request_reads_hex_txs() {
        let req: FinalizeBlockRequest = serde_json::from_str(
            r#"{"height":3,"time_secs":9,"txs":["7b7d","0x00ff"],"votes":[{"address":"AA","signed_last_block":true}]}"#,
        )
        .expect("request");
        assert_eq!(req.header.height, 3);
        assert_eq!(req.txs, vec![b"{}".to_vec(), vec![0x00, 0xff]]);
        assert!(req.header.votes[0].signed_last_block);
        assert!(req.header.misbehavior.is_empty());
    }
}
