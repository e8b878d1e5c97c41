#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use voting_service::audit::AuditLog;
use voting_service::casting::VoteCastingService;
use voting_service::consistency::ConsistencyChecker;
use voting_service::database::models::{
    CampaignRecord, CampaignState, NewCampaign, NewVote, VoteRecord, VoteStatus,
};
use voting_service::database::Database;
use voting_service::finalizer::TallyFinalizer;
use voting_service::hasher::vote_content_hash;
use voting_service::ledger::{CampaignCommit, LedgerClient, LedgerError, LedgerReceipt};

/// Scripted ledger double. Queued outcomes are served first; afterwards the
/// defaults apply: submissions succeed and are remembered, so has-voted
/// answers behave like a real ledger.
#[derive(Default)]
pub struct MockLedger {
    submit_queue: Mutex<VecDeque<Result<String, LedgerError>>>,
    has_voted_queue: Mutex<VecDeque<Result<bool, LedgerError>>>,
    finalize_queue: Mutex<VecDeque<Result<String, LedgerError>>>,
    receipts: Mutex<HashMap<String, LedgerReceipt>>,
    voted: Mutex<HashSet<(i64, i64)>>,
    seq: AtomicUsize,
    pub submit_calls: AtomicUsize,
}

impl MockLedger {
    pub fn queue_submit(&self, result: Result<String, LedgerError>) {
        self.submit_queue.lock().unwrap().push_back(result);
    }

    pub fn queue_has_voted(&self, result: Result<bool, LedgerError>) {
        self.has_voted_queue.lock().unwrap().push_back(result);
    }

    pub fn queue_finalize(&self, result: Result<String, LedgerError>) {
        self.finalize_queue.lock().unwrap().push_back(result);
    }

    pub fn submit_call_count(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    fn next_ref(&self, prefix: &str) -> String {
        let n = self.seq.fetch_add(1, Ordering::SeqCst);
        format!("{prefix}-{n}")
    }

    fn included_receipt() -> LedgerReceipt {
        LedgerReceipt {
            included: true,
            block_ref: Some("block-1".to_string()),
            block_timestamp: Some(1_700_000_000),
            gas_used: Some(21_000),
        }
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn submit_vote(
        &self,
        campaign_ledger_id: i64,
        voter_id: i64,
        _option_ordinal: i64,
        _content_hash: &str,
    ) -> Result<String, LedgerError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);

        let result = match self.submit_queue.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(self.next_ref("tx")),
        };

        if let Ok(tx_ref) = &result {
            self.receipts
                .lock()
                .unwrap()
                .insert(tx_ref.clone(), Self::included_receipt());
            self.voted
                .lock()
                .unwrap()
                .insert((campaign_ledger_id, voter_id));
        }

        result
    }

    async fn get_receipt(&self, tx_ref: &str) -> Result<Option<LedgerReceipt>, LedgerError> {
        Ok(self.receipts.lock().unwrap().get(tx_ref).cloned())
    }

    async fn has_voted(
        &self,
        campaign_ledger_id: i64,
        voter_id: i64,
    ) -> Result<bool, LedgerError> {
        match self.has_voted_queue.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(self
                .voted
                .lock()
                .unwrap()
                .contains(&(campaign_ledger_id, voter_id))),
        }
    }

    async fn create_campaign(
        &self,
        _title: &str,
        _starts_at: i64,
        _ends_at: i64,
    ) -> Result<CampaignCommit, LedgerError> {
        let n = self.seq.fetch_add(1, Ordering::SeqCst);
        Ok(CampaignCommit {
            tx_ref: format!("ctx-{n}"),
            campaign_ledger_id: 1000 + n as i64,
        })
    }

    async fn finalize(&self, _campaign_ledger_id: i64) -> Result<String, LedgerError> {
        match self.finalize_queue.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(self.next_ref("ftx")),
        }
    }
}

pub struct TestContext {
    pub db: Database,
    pub ledger: Arc<MockLedger>,
    pub audit: AuditLog,
    pub checker: ConsistencyChecker,
    pub casting: VoteCastingService,
    pub finalizer: TallyFinalizer,
}

pub async fn setup() -> TestContext {
    let db = Database::connect(":memory:", 1)
        .await
        .expect("in-memory database");
    let ledger = Arc::new(MockLedger::default());
    let ledger_dyn: Arc<dyn LedgerClient> = ledger.clone();
    let audit = AuditLog::new(db.clone());
    let checker = ConsistencyChecker::new(db.clone(), ledger_dyn.clone(), audit.clone());
    let casting = VoteCastingService::new(
        db.clone(),
        ledger_dyn.clone(),
        checker.clone(),
        audit.clone(),
        10,
    );
    let finalizer = TallyFinalizer::new(db.clone(), ledger_dyn, audit.clone());

    TestContext {
        db,
        ledger,
        audit,
        checker,
        casting,
        finalizer,
    }
}

pub async fn seed_campaign(
    ctx: &TestContext,
    state: CampaignState,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    options: &[&str],
    on_ledger: bool,
) -> CampaignRecord {
    let new = NewCampaign {
        title: "Test campaign".to_string(),
        state,
        starts_at,
        ends_at,
        options: options.iter().map(|s| s.to_string()).collect(),
    };
    let campaign = CampaignRecord::create(ctx.db.pool(), &new)
        .await
        .expect("seed campaign");

    if on_ledger {
        CampaignRecord::set_ledger_commit(ctx.db.pool(), campaign.id, 9000 + campaign.id, "seed-tx")
            .await
            .expect("seed ledger commit");
        CampaignRecord::get(ctx.db.pool(), campaign.id)
            .await
            .expect("reload campaign")
    } else {
        campaign
    }
}

/// An open campaign whose window comfortably covers "now".
pub async fn seed_open_campaign(
    ctx: &TestContext,
    options: &[&str],
    on_ledger: bool,
) -> CampaignRecord {
    let now = Utc::now();
    seed_campaign(
        ctx,
        CampaignState::Open,
        now - Duration::minutes(5),
        now + Duration::hours(1),
        options,
        on_ledger,
    )
    .await
}

/// Insert and confirm a vote directly through the store, bypassing the
/// casting service; used to build up tallies quickly.
pub async fn add_confirmed_vote(
    ctx: &TestContext,
    campaign_id: i64,
    voter_id: i64,
    option_id: i64,
) -> VoteRecord {
    let content_hash = vote_content_hash(campaign_id, voter_id, option_id, "seed", voter_id);
    let vote = VoteRecord::insert_pending(
        ctx.db.pool(),
        &NewVote {
            voter_id,
            campaign_id,
            option_id,
            content_hash,
        },
    )
    .await
    .expect("insert vote");
    VoteRecord::update_confirmation(
        ctx.db.pool(),
        vote.id,
        Some(&format!("tx-seed-{}", vote.id)),
        VoteStatus::Confirmed,
    )
    .await
    .expect("confirm vote");
    VoteRecord::get(ctx.db.pool(), vote.id)
        .await
        .expect("reload vote")
}
