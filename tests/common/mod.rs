//! Common test utilities
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sepa_ledger::accounts::CustomerAccountService;
use sepa_ledger::cdc::ChannelBroker;
use sepa_ledger::directory::{FileDirectoryStore, SystemAccountDirectory};
use sepa_ledger::domain::{Amount, Currency, SepaAccountType, SystemAccountKey};
use sepa_ledger::ledger::engine::TransferKind;
use sepa_ledger::ledger::memory::equity_account;
use sepa_ledger::ledger::{IdGenerator, LedgerGateway, MemoryLedger, RetryPolicy, TransferOrder};
use sepa_ledger::sepa::{CounterpartyBank, SepaAccountProvisioner, SepaTransferOrchestrator, SepaTransferRequest};
use tempfile::TempDir;

pub const DE_IBAN: &str = "DE89370400440532013000";
pub const NO_IBAN: &str = "NO9386011117947";

/// Retry policy with millisecond backoff so fault tests stay fast
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

/// Full service stack over the in-process ledger and a temporary directory file
pub struct TestStack {
    pub tmp: Arc<TempDir>,
    pub directory_file: PathBuf,
    pub broker: Arc<ChannelBroker>,
    pub engine: Arc<MemoryLedger>,
    pub gateway: LedgerGateway,
    pub directory: Arc<SystemAccountDirectory>,
    pub provisioner: Arc<SepaAccountProvisioner>,
    pub orchestrator: SepaTransferOrchestrator,
    pub accounts: CustomerAccountService,
}

impl TestStack {
    /// Fresh stack with all SEPA accounts provisioned
    pub async fn provisioned() -> Self {
        let stack = Self::new().await;
        let report = stack.provisioner.provision_all().await;
        assert!(report.is_complete(), "provisioning failed: {:?}", report.errors);
        stack
    }

    /// Fresh stack, nothing provisioned
    pub async fn new() -> Self {
        let tmp = Arc::new(tempfile::tempdir().expect("tempdir"));
        let broker = Arc::new(ChannelBroker::new());
        let engine = Arc::new(MemoryLedger::new().with_cdc(Arc::clone(&broker)));
        Self::assemble(tmp, broker, engine).await
    }

    /// Same ledger and directory file, new process-level services
    pub async fn restart(&self) -> Self {
        Self::assemble(Arc::clone(&self.tmp), Arc::clone(&self.broker), Arc::clone(&self.engine)).await
    }

    /// Same directory file over an empty ledger, like a process restart
    /// with the in-process engine
    pub async fn restart_with_empty_ledger(&self) -> Self {
        let broker = Arc::new(ChannelBroker::new());
        let engine = Arc::new(MemoryLedger::new().with_cdc(Arc::clone(&broker)));
        Self::assemble(Arc::clone(&self.tmp), broker, engine).await
    }

    async fn assemble(tmp: Arc<TempDir>, broker: Arc<ChannelBroker>, engine: Arc<MemoryLedger>) -> Self {
        let directory_file = directory_path(tmp.path());
        let store = Arc::new(FileDirectoryStore::new(directory_file.clone()));
        let directory = Arc::new(SystemAccountDirectory::new(store));
        directory.load().await.expect("directory load");

        let gateway = LedgerGateway::new(engine.clone(), Arc::new(IdGenerator::new()), fast_retry());

        Self {
            tmp,
            directory_file,
            broker,
            engine,
            provisioner: Arc::new(SepaAccountProvisioner::new(gateway.clone(), Arc::clone(&directory))),
            orchestrator: SepaTransferOrchestrator::new(gateway.clone(), Arc::clone(&directory)),
            accounts: CustomerAccountService::new(gateway.clone(), Arc::clone(&directory)),
            gateway,
            directory,
        }
    }

    /// Ledger id of a SEPA system account
    pub async fn sepa_account(&self, account_type: SepaAccountType, currency: Currency) -> u128 {
        self.directory
            .resolve(&SystemAccountKey::sepa(account_type, currency))
            .await
            .expect("SEPA account registered")
    }

    /// Credit-normal balance of any ledger account
    pub async fn balance(&self, account_id: u128) -> i128 {
        self.gateway
            .account_balance(account_id)
            .await
            .expect("balance")
            .net_credit()
    }

    /// Open a customer account holding `amount` minor units
    pub async fn funded_customer(&self, currency: Currency, amount: u64) -> u128 {
        let account = self.accounts.open(7, currency).await.expect("open account");
        if amount > 0 {
            self.fund(account.account_id, currency, amount).await;
        }
        account.account_id
    }

    /// Move `amount` into `account_id` from a fresh equity account
    pub async fn fund(&self, account_id: u128, currency: Currency, amount: u64) {
        let equity = self.gateway.ids().generate();
        self.gateway
            .create_account(equity_account(equity, currency.ledger_code()))
            .await
            .expect("equity account");
        self.gateway
            .transfer(TransferOrder {
                debit_account_id: equity,
                credit_account_id: account_id,
                amount: Amount::new(amount).expect("amount"),
                currency,
                kind: TransferKind::Internal,
                memo: "test funding".to_string(),
            })
            .await
            .expect("funding transfer");
    }
}

pub fn directory_path(dir: &Path) -> PathBuf {
    dir.join("system-accounts.json")
}

/// Transfer request with a valid German IBAN
pub fn sepa_request(account_id: u128, amount: u64, currency: &str) -> SepaTransferRequest {
    SepaTransferRequest {
        account_id,
        amount,
        currency: currency.to_string(),
        direction: None,
        bank_info: CounterpartyBank {
            iban: DE_IBAN.to_string(),
            bic: Some("COBADEFFXXX".to_string()),
            bank_name: Some("Commerzbank".to_string()),
            recipient_name: Some("Erika Mustermann".to_string()),
            country: Some("DE".to_string()),
        },
        urgency: None,
        description: Some("Invoice 2026-117".to_string()),
        sepa_transaction_id: None,
    }
}

/// Poll until the broker has seen `expected` acknowledgements
pub async fn wait_for_acks(broker: &ChannelBroker, expected: u64) {
    for _ in 0..200 {
        if broker.acked().await >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "timed out waiting for {} acks (got {})",
        expected,
        broker.acked().await
    );
}
