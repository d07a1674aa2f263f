#![deny(clippy::print_stdout, clippy::print_stderr)]

mod finance;
mod logging;
mod platform;
mod runtime_config;
mod telemetry;
mod webhook;

pub use finance::FinanceAggregator;
pub use finance::FinanceError;
pub use finance::FinanceResult;
pub use finance::MasterMoney;
pub use finance::ProjectSummary;
pub use logging::init_tracing;
pub use platform::Platform;
pub use platform::PlatformError;
pub use runtime_config::ConfigError;
pub use runtime_config::RuntimeConfig;
pub use telemetry::ObservabilityCounters;
pub use telemetry::Telemetry;
pub use webhook::LeadWebhookBody;
pub use webhook::WebhookError;
pub use webhook::WebhookOutcome;
