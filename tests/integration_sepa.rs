//! SEPA pipeline integration tests

use std::collections::HashSet;

use sepa_ledger::domain::{Currency, SepaAccountType};
use sepa_ledger::ledger::LedgerError;
use sepa_ledger::sepa::{SepaError, TransferDirection, TransferStage, TransferStatus, SEPA_ACCOUNT_COUNT};

mod common;

use common::{sepa_request, TestStack};

// =========================================================================
// Provisioning
// =========================================================================

#[tokio::test]
async fn test_provisioning_is_idempotent_across_restart() {
    let stack = TestStack::new().await;

    let first = stack.provisioner.provision_all().await;
    assert!(first.is_complete());
    assert_eq!(first.created.len(), SEPA_ACCOUNT_COUNT);
    assert!(first.existing.is_empty());

    let before: Vec<_> = stack
        .directory
        .entries()
        .into_iter()
        .map(|(key, entry)| (key.to_string(), entry.ledger_id))
        .collect();
    let calls_before = stack.engine.calls();

    // New process over the same directory file and ledger
    let restarted = stack.restart().await;
    assert_eq!(restarted.directory.len(), SEPA_ACCOUNT_COUNT);

    let second = restarted.provisioner.provision_all().await;
    assert!(second.is_complete());
    assert!(second.created.is_empty());
    assert_eq!(second.existing.len(), SEPA_ACCOUNT_COUNT);
    assert_eq!(restarted.engine.calls(), calls_before, "directory hits must not call the ledger");

    let after: Vec<_> = restarted
        .directory
        .entries()
        .into_iter()
        .map(|(key, entry)| (key.to_string(), entry.ledger_id))
        .collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_directory_document_on_disk() {
    let stack = TestStack::provisioned().await;

    let raw = tokio::fs::read_to_string(&stack.directory_file).await.unwrap();
    let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(doc["version"], 1);

    let accounts = doc["accounts"].as_object().unwrap();
    assert_eq!(accounts.len(), SEPA_ACCOUNT_COUNT);
    let settlement = &accounts["SEPA-SETTLEMENT-EUR"];
    assert_eq!(settlement["category"], "SEPA_SETTLEMENT");
    assert!(settlement["ledgerId"].as_str().unwrap().parse::<u128>().is_ok());
}

#[tokio::test]
async fn test_validate_all_before_and_after_provisioning() {
    let stack = TestStack::new().await;

    let report = stack.provisioner.validate_all().await;
    assert!(!report.valid);
    assert_eq!(report.missing.len(), SEPA_ACCOUNT_COUNT);

    stack.provisioner.provision_all().await;
    let report = stack.provisioner.validate_all().await;
    assert!(report.valid);
    assert_eq!(report.configured.len(), SEPA_ACCOUNT_COUNT);
}

#[tokio::test]
async fn test_restore_recreates_registered_accounts_in_empty_ledger() {
    let stack = TestStack::provisioned().await;
    let settlement = stack.sepa_account(SepaAccountType::Settlement, Currency::Eur).await;

    let restarted = stack.restart_with_empty_ledger().await;
    let second = restarted.provisioner.provision_all().await;
    assert_eq!(second.existing.len(), SEPA_ACCOUNT_COUNT);
    let report = restarted.provisioner.validate_all().await;
    assert!(!report.valid);
    assert_eq!(report.missing.len(), SEPA_ACCOUNT_COUNT);

    let restored = restarted.provisioner.restore_missing().await;
    assert!(restored.is_complete());
    assert_eq!(restored.created.len(), SEPA_ACCOUNT_COUNT);

    let report = restarted.provisioner.validate_all().await;
    assert!(report.valid);
    assert_eq!(
        restarted.sepa_account(SepaAccountType::Settlement, Currency::Eur).await,
        settlement
    );

    let customer = restarted.funded_customer(Currency::Eur, 10_000).await;
    restarted
        .orchestrator
        .process_outgoing(&sepa_request(customer, 2_500, "EUR"))
        .await
        .unwrap();
    assert_eq!(restarted.balance(settlement).await, 2_500);
}

#[tokio::test]
async fn test_restore_leaves_healthy_accounts_alone() {
    let stack = TestStack::provisioned().await;
    let transfers_before = stack.engine.transfer_count().await;

    let restored = stack.provisioner.restore_missing().await;
    assert!(restored.is_complete());
    assert!(restored.created.is_empty());
    assert_eq!(restored.existing.len(), SEPA_ACCOUNT_COUNT);
    assert_eq!(stack.engine.transfer_count().await, transfers_before);
}

// =========================================================================
// Transfers
// =========================================================================

#[tokio::test]
async fn test_outgoing_transfer_moves_funds_to_settlement() {
    let stack = TestStack::provisioned().await;
    let customer = stack.funded_customer(Currency::Eur, 100_000).await;

    let result = stack
        .orchestrator
        .process_outgoing(&sepa_request(customer, 25_000, "EUR"))
        .await
        .unwrap();

    assert_eq!(result.status, TransferStatus::Completed);
    assert_eq!(result.stage, TransferStage::Settlement);
    assert_eq!(result.direction, TransferDirection::Outgoing);
    assert_eq!(result.transfer_ids.len(), 2);
    assert!(result.sepa_transaction_id.starts_with("SEPA_OUT_EUR_"));

    let settlement = stack.sepa_account(SepaAccountType::Settlement, Currency::Eur).await;
    let suspense = stack.sepa_account(SepaAccountType::OutgoingSuspense, Currency::Eur).await;
    assert_eq!(stack.balance(customer).await, 75_000);
    assert_eq!(stack.balance(settlement).await, 25_000);
    assert_eq!(stack.balance(suspense).await, 0);
}

#[tokio::test]
async fn test_incoming_transfer_credits_customer() {
    let stack = TestStack::provisioned().await;
    let settlement = stack.sepa_account(SepaAccountType::Settlement, Currency::Eur).await;
    stack.fund(settlement, Currency::Eur, 25_000).await;
    let customer = stack.funded_customer(Currency::Eur, 0).await;

    let mut request = sepa_request(customer, 25_000, "EUR");
    request.sepa_transaction_id = Some("X".to_string());
    let result = stack.orchestrator.process_incoming(&request).await.unwrap();

    assert_eq!(result.stage, TransferStage::External);
    assert_eq!(result.sepa_transaction_id, "X");
    assert_eq!(stack.balance(customer).await, 25_000);
    assert_eq!(stack.balance(settlement).await, 0);

    let suspense = stack.sepa_account(SepaAccountType::IncomingSuspense, Currency::Eur).await;
    assert_eq!(stack.balance(suspense).await, 0);
}

#[tokio::test]
async fn test_process_transfer_routes_by_direction() {
    let stack = TestStack::provisioned().await;
    let customer = stack.funded_customer(Currency::Sek, 10_000).await;

    let mut request = sepa_request(customer, 4_000, "sek");
    request.direction = Some(TransferDirection::Outgoing);
    let result = stack.orchestrator.process_transfer(&request).await.unwrap();
    assert_eq!(result.currency, Currency::Sek);
    assert_eq!(stack.balance(customer).await, 6_000);

    request.direction = None;
    let err = stack.orchestrator.process_transfer(&request).await.unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_direction_mismatch_is_rejected() {
    let stack = TestStack::provisioned().await;
    let customer = stack.funded_customer(Currency::Eur, 10_000).await;

    let mut request = sepa_request(customer, 1_000, "EUR");
    request.direction = Some(TransferDirection::Incoming);
    let err = stack.orchestrator.process_outgoing(&request).await.unwrap_err();
    assert!(matches!(err, SepaError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_unsupported_currency_makes_no_ledger_call() {
    let stack = TestStack::provisioned().await;
    let calls_before = stack.engine.calls();

    let err = stack
        .orchestrator
        .process_outgoing(&sepa_request(1, 25_000, "USD"))
        .await
        .unwrap_err();

    assert!(matches!(err, SepaError::CurrencyNotSupported(ref c) if c == "USD"));
    assert!(err.is_validation());
    assert_eq!(stack.engine.calls(), calls_before);
}

#[tokio::test]
async fn test_validation_failures_make_no_ledger_call() {
    let stack = TestStack::provisioned().await;
    let calls_before = stack.engine.calls();

    let zero = sepa_request(1, 0, "EUR");
    assert!(matches!(
        stack.orchestrator.process_outgoing(&zero).await,
        Err(SepaError::InvalidAmount(_))
    ));

    let mut bad_checksum = sepa_request(1, 100, "EUR");
    bad_checksum.bank_info.iban = "DE89370400440532013001".to_string();
    assert!(matches!(
        stack.orchestrator.process_outgoing(&bad_checksum).await,
        Err(SepaError::InvalidIban(_))
    ));

    let mut bad_bic = sepa_request(1, 100, "EUR");
    bad_bic.bank_info.bic = Some("COBA".to_string());
    assert!(matches!(
        stack.orchestrator.process_outgoing(&bad_bic).await,
        Err(SepaError::InvalidBic(_))
    ));

    assert_eq!(stack.engine.calls(), calls_before);
}

#[tokio::test]
async fn test_missing_sepa_account_is_not_found() {
    let stack = TestStack::new().await;

    let err = stack
        .orchestrator
        .process_outgoing(&sepa_request(1, 100, "EUR"))
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert!(!err.is_validation());
    assert_eq!(stack.engine.calls(), 0);
}

#[tokio::test]
async fn test_system_account_cannot_be_customer_leg() {
    let stack = TestStack::provisioned().await;
    stack
        .orchestrator
        .process_incoming(&sepa_request(424_242, 25_000, "EUR"))
        .await
        .unwrap_err();

    let incoming_suspense = stack
        .sepa_account(SepaAccountType::IncomingSuspense, Currency::Eur)
        .await;
    let outgoing_suspense = stack
        .sepa_account(SepaAccountType::OutgoingSuspense, Currency::Eur)
        .await;
    let settlement = stack.sepa_account(SepaAccountType::Settlement, Currency::Eur).await;
    let calls_before = stack.engine.calls();

    for account in [incoming_suspense, outgoing_suspense, settlement] {
        let err = stack
            .orchestrator
            .process_outgoing(&sepa_request(account, 25_000, "EUR"))
            .await
            .unwrap_err();
        assert!(matches!(err, SepaError::InvalidRequest(_)), "got {:?}", err);
        assert!(err.is_validation());

        let err = stack
            .orchestrator
            .process_incoming(&sepa_request(account, 25_000, "EUR"))
            .await
            .unwrap_err();
        assert!(matches!(err, SepaError::InvalidRequest(_)), "got {:?}", err);
    }

    assert_eq!(stack.engine.calls(), calls_before);
    assert_eq!(stack.balance(incoming_suspense).await, 25_000);
}

#[tokio::test]
async fn test_failed_second_hop_reports_stranded_funds() {
    let stack = TestStack::provisioned().await;
    let unknown_customer = 424_242;

    let err = stack
        .orchestrator
        .process_incoming(&sepa_request(unknown_customer, 25_000, "EUR"))
        .await
        .unwrap_err();

    match err {
        SepaError::StrandedInSuspense {
            ref sepa_transaction_id,
            ref suspense_account,
            first_hop_transfer_id,
            ref source,
            ..
        } => {
            assert!(sepa_transaction_id.starts_with("SEPA_IN_EUR_"));
            assert_eq!(suspense_account, "SEPA-IN-SUSPENSE-EUR");
            assert!(stack.engine.transfer(first_hop_transfer_id).await.is_some());
            assert_eq!(*source, LedgerError::AccountNotFound(unknown_customer));
        }
        ref other => panic!("expected stranded funds, got {:?}", other),
    }
    assert!(err.is_stranded());

    // Funds rest in suspense, nothing lost
    let balances = stack.orchestrator.get_suspense_balances("eur").await.unwrap();
    assert_eq!(balances.incoming_suspense.balance, 25_000);
    assert_eq!(balances.settlement.balance, -25_000);
    assert_eq!(balances.in_transit(), 25_000);
}

#[tokio::test]
async fn test_insufficient_funds_is_not_retried() {
    let stack = TestStack::provisioned().await;
    let customer = stack.funded_customer(Currency::Eur, 1_000).await;
    let calls_before = stack.engine.calls();
    let transfers_before = stack.engine.transfer_count().await;

    let err = stack
        .orchestrator
        .process_outgoing(&sepa_request(customer, 5_000, "EUR"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SepaError::Ledger(LedgerError::InsufficientFunds { required: 5_000, available: 1_000, .. })
    ));
    assert_eq!(stack.engine.calls(), calls_before + 1);
    assert_eq!(stack.engine.transfer_count().await, transfers_before);
    assert_eq!(stack.balance(customer).await, 1_000);
}

#[tokio::test]
async fn test_transient_fault_is_retried() {
    let stack = TestStack::provisioned().await;
    let customer = stack.funded_customer(Currency::Dkk, 50_000).await;
    let transfers_before = stack.engine.transfer_count().await;

    stack.engine.fail_next(2);
    let result = stack
        .orchestrator
        .process_outgoing(&sepa_request(customer, 20_000, "DKK"))
        .await
        .unwrap();

    assert_eq!(result.transfer_ids.len(), 2);
    assert_eq!(stack.engine.transfer_count().await, transfers_before + 2);
    assert_eq!(stack.balance(customer).await, 30_000);
}

#[tokio::test]
async fn test_retries_exhausted_surfaces_failure() {
    let stack = TestStack::provisioned().await;
    let customer = stack.funded_customer(Currency::Nok, 50_000).await;
    let transfers_before = stack.engine.transfer_count().await;

    stack.engine.fail_next(3);
    let err = stack
        .orchestrator
        .process_outgoing(&sepa_request(customer, 20_000, "NOK"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SepaError::Ledger(LedgerError::RetriesExhausted { attempts: 3, .. })
    ));
    assert_eq!(stack.engine.transfer_count().await, transfers_before);
    assert_eq!(stack.balance(customer).await, 50_000);
}

#[tokio::test]
async fn test_suspense_balances_reject_non_sepa_currency() {
    let stack = TestStack::provisioned().await;

    let err = stack.orchestrator.get_suspense_balances("gbp").await.unwrap_err();
    assert!(matches!(err, SepaError::CurrencyNotSupported(ref c) if c == "GBP"));

    let balances = stack.orchestrator.get_suspense_balances("NOK").await.unwrap();
    assert_eq!(balances.currency, Currency::Nok);
    assert_eq!(balances.in_transit(), 0);
}

// =========================================================================
// Identifier spaces
// =========================================================================

#[tokio::test]
async fn test_customer_ids_never_collide_with_system_ids() {
    let stack = TestStack::provisioned().await;

    let system_ids: HashSet<u128> = stack
        .directory
        .entries()
        .into_iter()
        .map(|(_, entry)| entry.ledger_id)
        .collect();
    assert_eq!(system_ids.len(), SEPA_ACCOUNT_COUNT);

    let mut customer_ids = HashSet::new();
    for i in 0..120u128 {
        let currency = Currency::SEPA[(i % 4) as usize];
        let account = stack.accounts.open(i, currency).await.unwrap();
        assert!(!system_ids.contains(&account.account_id));
        assert!(!stack.directory.is_system_ledger_id(account.account_id));
        assert!(customer_ids.insert(account.account_id), "duplicate customer id");
    }
    assert_eq!(customer_ids.len(), 120);
}
