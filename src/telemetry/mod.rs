//! # Módulo de Telemetria OpenTelemetry
//!
//! Liga o `tracing` ao console e, opcionalmente, a um coletor OTLP.
//! Cada step do cenário vira um span com o alvo, a estratégia usada e o
//! número de tentativas.
//!
//! ## Para todos entenderem:
//!
//! Uma execução de cenário gera uma árvore de spans:
//!
//! ```text
//! [scenario login] ──────────────────────────────────────>
//!   [step open (navigate)] ──────>
//!       tentativa 1 falhou (rede), tentativa 2 ok
//!   [step email (fill)] ──>
//!   [step submit (click)] ─────────>
//!       standard interceptado → escalando para forced
//! ```
//!
//! Com um coletor (Jaeger, Tempo...) fica fácil ver qual step precisou de
//! retries e qual candidato acabou sendo usado.
//!
//! ## Configuração via variáveis de ambiente:
//!
//! - `OTEL_SERVICE_NAME`: Nome do serviço
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: URL do coletor OTLP
//! - `OTEL_TRACES_SAMPLER_ARG`: Taxa de sampling (0.0-1.0)
//! - `RUST_LOG`: filtro de nível (padrão: info)

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::runtime::Tokio;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, Tracer, TracerProvider};
use opentelemetry_sdk::{trace as sdktrace, Resource};
use tracing::Level;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CONFIGURAÇÃO
// ============================================================================

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,

    /// Endpoint OTLP (gRPC), ex: "http://localhost:4317".
    /// Se None, apenas loga para console.
    pub otlp_endpoint: Option<String>,

    /// Taxa de sampling, de 0.0 a 1.0.
    pub sampling_ratio: f64,

    pub enable_console_logging: bool,

    /// Nível usado quando `RUST_LOG` não está definido.
    pub log_level: Level,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "resilient-runner".to_string(),
            otlp_endpoint: None,
            sampling_ratio: 1.0,
            enable_console_logging: true,
            log_level: Level::INFO,
        }
    }
}

impl TelemetryConfig {
    /// Configuração a partir das variáveis `OTEL_*`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("OTEL_SERVICE_NAME") {
            config.service_name = name;
        }

        if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            config.otlp_endpoint = Some(endpoint);
        }

        if let Ok(ratio) = std::env::var("OTEL_TRACES_SAMPLER_ARG") {
            if let Ok(r) = ratio.parse::<f64>() {
                config.sampling_ratio = r.clamp(0.0, 1.0);
            }
        }

        config
    }
}

// ============================================================================
// INICIALIZAÇÃO
// ============================================================================

/// Inicializa o subscriber global.
///
/// ## Retorno:
///
/// - `Ok(Some(Tracer))`: OTLP configurado
/// - `Ok(None)`: apenas console
pub fn init_telemetry(config: TelemetryConfig) -> anyhow::Result<Option<Tracer>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    // Logs vão para stderr; stdout fica livre para o relatório JSON.
    // (macro: o tipo do layer depende do subscriber de cada branch)
    macro_rules! console_layer {
        () => {
            config.enable_console_logging.then(|| {
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr)
            })
        };
    }

    if let Some(endpoint) = &config.otlp_endpoint {
        let tracer = init_otlp_tracer(&config.service_name, endpoint, config.sampling_ratio)?;

        tracing_subscriber::registry()
            .with(env_filter)
            .with(OpenTelemetryLayer::new(tracer.clone()))
            .with(console_layer!())
            .init();

        tracing::info!(
            service_name = %config.service_name,
            endpoint = %endpoint,
            sampling_ratio = config.sampling_ratio,
            "Telemetria OTEL inicializada"
        );

        Ok(Some(tracer))
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer!())
            .init();

        tracing::debug!("Telemetria inicializada (apenas console, sem OTLP)");
        Ok(None)
    }
}

fn init_otlp_tracer(
    service_name: &str,
    endpoint: &str,
    sampling_ratio: f64,
) -> anyhow::Result<Tracer> {
    let sampler = if sampling_ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if sampling_ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(sampling_ratio)
    };

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .build_span_exporter()?,
            Tokio,
        )
        .with_config(
            sdktrace::Config::default()
                .with_sampler(sampler)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    service_name.to_string(),
                )])),
        )
        .build();

    let tracer = tracer_provider.tracer(service_name.to_string());
    global::set_tracer_provider(tracer_provider);

    Ok(tracer)
}

// ============================================================================
// ENCERRAMENTO
// ============================================================================

/// Faz flush dos spans pendentes. Chamar antes de sair do processo.
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
    tracing::debug!("Telemetria OTEL encerrada");
}

/// Atributos de span para steps de automação.
pub mod instrumentation {
    use std::time::Instant;

    use crate::protocol::{StepResult, StepStatus};

    /// Contexto de instrumentação de um step.
    #[derive(Debug)]
    pub struct ActionSpanContext {
        pub step_id: String,
        pub action: String,
        /// Nome legível do alvo, quando o step tem um.
        pub target: Option<String>,
        pub start_time: Instant,
        pub strategy: Option<String>,
        pub attempts: Option<u32>,
        pub matched_rank: Option<usize>,
        pub outcome: Option<String>,
        pub duration_ms: Option<u64>,
    }

    impl ActionSpanContext {
        pub fn new(step_id: &str, action: &str) -> Self {
            Self {
                step_id: step_id.to_string(),
                action: action.to_string(),
                target: None,
                start_time: Instant::now(),
                strategy: None,
                attempts: None,
                matched_rank: None,
                outcome: None,
                duration_ms: None,
            }
        }

        pub fn with_target(mut self, target: Option<&str>) -> Self {
            self.target = target.map(str::to_string);
            self
        }

        /// Finaliza o span com o resultado do step.
        pub fn finish(&mut self, result: &StepResult) {
            self.strategy = result.strategy.map(|s| s.to_string());
            self.attempts = Some(result.attempts);
            self.matched_rank = result.matched_rank;
            self.outcome = Some(match (result.status, result.failure) {
                (StepStatus::Failed, Some(kind)) => kind.to_string(),
                (status, _) => format!("{:?}", status).to_lowercase(),
            });
            self.duration_ms = Some(self.start_time.elapsed().as_millis() as u64);
        }

        pub fn attributes(&self) -> Vec<(&'static str, String)> {
            let mut attrs = vec![
                ("step.id", self.step_id.clone()),
                ("automation.action", self.action.clone()),
            ];

            if let Some(target) = &self.target {
                attrs.push(("automation.target", target.clone()));
            }
            if let Some(strategy) = &self.strategy {
                attrs.push(("automation.strategy", strategy.clone()));
            }
            if let Some(attempts) = self.attempts {
                attrs.push(("automation.attempts", attempts.to_string()));
            }
            if let Some(rank) = self.matched_rank {
                attrs.push(("automation.candidate_rank", rank.to_string()));
            }
            if let Some(outcome) = &self.outcome {
                attrs.push(("automation.outcome", outcome.clone()));
            }
            if let Some(duration) = self.duration_ms {
                attrs.push(("automation.duration_ms", duration.to_string()));
            }

            attrs
        }
    }
}
