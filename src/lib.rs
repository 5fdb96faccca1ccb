//! # Resilient Runner
//!
//! Núcleo de automação de UI resiliente: alvos com múltiplos candidatos,
//! retries com backoff, escalonamento de estratégia, navegação com
//! wait-until progressivo e snapshots de diagnóstico.
//!
//! ## Para todos entenderem:
//!
//! Um teste de UI quebra por motivos bobos: o botão mudou de id, um banner
//! de cookies ficou na frente, a rede piscou. Em vez de falhar na hora, o
//! runner:
//!
//! 1. Tenta cada candidato do alvo em ordem (`resolver`)
//! 2. Retenta falhas passageiras com espera crescente (`retry`)
//! 3. Troca de estratégia quando a atual não serve (standard → forced → script)
//! 4. Tira um snapshot quando desiste de vez (`diagnostics`)
//!
//! ## Exemplo de uso:
//!
//! ```rust,no_run
//! use resilient_runner::candidate::{CandidateList, Query};
//! use resilient_runner::driver::scripted::ScriptedDriver;
//! use resilient_runner::retry::outcome::ActionDescriptor;
//! use resilient_runner::retry::policy::OperationPolicy;
//! use resilient_runner::retry::ResilientExecutor;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let mut driver = ScriptedDriver::load("./fixtures/checkout.json")?;
//! let save = CandidateList::from_queries(
//!     "botão salvar",
//!     vec![Query::test_id("save"), Query::text("Salvar")],
//! )?;
//!
//! let outcome = ResilientExecutor::default()
//!     .execute(&mut driver, &ActionDescriptor::click(save), &OperationPolicy::default())
//!     .await;
//! outcome.into_result()?;
//! # Ok(())
//! # }
//! ```

pub mod candidate;
pub mod context;
pub mod diagnostics;
pub mod driver;
pub mod errors;
pub mod executors;
pub mod limits;
pub mod loader;
pub mod protocol;
pub mod resolver;
pub mod retry;
pub mod runner;
pub mod telemetry;
pub mod validation;

pub use candidate::{Candidate, CandidateList, Query};
pub use driver::{Driver, DriverError, LoadState, Requirement, Strategy};
pub use errors::FailureKind;
pub use resolver::resolve;
pub use retry::outcome::{ActionDescriptor, OperationOutcome};
pub use retry::policy::OperationPolicy;
pub use retry::ResilientExecutor;
pub use runner::ScenarioRunner;
