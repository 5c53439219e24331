//! Scheduled Jobs
//!
//! Periodic suspense account monitoring. The job reports funds resting
//! mid-transit and missing SEPA accounts; it never moves funds.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::interval;

use crate::domain::serde_ids::i128_string;
use crate::domain::{Currency, SepaAccountType, SystemAccountKey};
use crate::sepa::{SepaAccountProvisioner, SepaTransferOrchestrator, SuspenseBalances, ValidationReport};

/// Configuration for the suspense monitor
#[derive(Debug, Clone)]
pub struct SuspenseMonitorConfig {
    /// Interval between checks (default: 5 minutes)
    pub interval: Duration,
}

impl Default for SuspenseMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
        }
    }
}

/// Non-zero balance in a suspense account
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestingFunds {
    pub account: String,
    pub currency: Currency,
    #[serde(with = "i128_string")]
    pub balance: i128,
}

/// Report from one monitoring pass
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorReport {
    pub validation: ValidationReport,
    pub balances: Vec<SuspenseBalances>,
    pub resting: Vec<RestingFunds>,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Suspense Monitor - periodic read-only health check of the SEPA accounts
pub struct SuspenseMonitor {
    provisioner: Arc<SepaAccountProvisioner>,
    orchestrator: SepaTransferOrchestrator,
    config: SuspenseMonitorConfig,
}

impl SuspenseMonitor {
    pub fn new(provisioner: Arc<SepaAccountProvisioner>, orchestrator: SepaTransferOrchestrator) -> Self {
        Self::with_config(provisioner, orchestrator, SuspenseMonitorConfig::default())
    }

    pub fn with_config(
        provisioner: Arc<SepaAccountProvisioner>,
        orchestrator: SepaTransferOrchestrator,
        config: SuspenseMonitorConfig,
    ) -> Self {
        Self {
            provisioner,
            orchestrator,
            config,
        }
    }

    /// Start the monitor in the background
    /// Returns a handle that can be used to abort it
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        tracing::info!(interval_secs = self.config.interval.as_secs(), "Suspense monitor started");

        let mut ticker = interval(self.config.interval);
        loop {
            ticker.tick().await;
            let report = self.run_once().await;
            if !report.errors.is_empty() {
                tracing::error!(errors = ?report.errors, "Suspense monitor pass had errors");
            }
        }
    }

    /// Run one monitoring pass (for manual trigger or testing)
    pub async fn run_once(&self) -> MonitorReport {
        let validation = self.provisioner.validate_all().await;
        let mut balances = Vec::new();
        let mut resting = Vec::new();
        let mut errors = Vec::new();

        for currency in Currency::SEPA {
            match self.orchestrator.get_suspense_balances(currency.code()).await {
                Ok(b) => {
                    for (account_type, balance) in [
                        (SepaAccountType::OutgoingSuspense, &b.outgoing_suspense),
                        (SepaAccountType::IncomingSuspense, &b.incoming_suspense),
                    ] {
                        if balance.balance != 0 {
                            let account = SystemAccountKey::sepa(account_type, currency).to_string();
                            tracing::warn!(
                                account = %account,
                                balance = %balance.balance,
                                "Funds resting in suspense"
                            );
                            resting.push(RestingFunds {
                                account,
                                currency,
                                balance: balance.balance,
                            });
                        }
                    }
                    balances.push(b);
                }
                Err(e) => errors.push(format!("{}: {}", currency, e)),
            }
        }

        MonitorReport {
            validation,
            balances,
            resting,
            errors,
            completed_at: Utc::now(),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
