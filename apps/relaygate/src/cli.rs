use clap::Parser;

/// CLI surface, with every field also readable from its `RELAYGATE_*`
/// environment variable via clap's `env` attribute (CLI wins when both are
/// set). A missing/blank value here falls through to whatever's already in
/// storage from a previous run, per [`crate::bootstrap`]'s CLI > ENV > DB
/// merge.
#[derive(Debug, Clone, Parser)]
#[command(name = "relaygate", version, about = "Multi-tenant LLM gateway")]
pub struct CliArgs {
    /// Database DSN (sqlite:// or postgres://); defaults to a sqlite file
    /// under `--data-dir` when unset.
    #[arg(long, env = "RELAYGATE_DSN")]
    pub dsn: Option<String>,

    /// Directory for the default sqlite file when `--dsn` is not given.
    #[arg(long, env = "RELAYGATE_DATA_DIR")]
    pub data_dir: Option<String>,

    /// Bind host.
    #[arg(long, env = "RELAYGATE_HOST")]
    pub host: Option<String>,

    /// Bind port.
    #[arg(long, env = "RELAYGATE_PORT")]
    pub port: Option<String>,

    /// Admin key (plaintext). Stored as a blake3 hash in the DB and in
    /// memory; never round-tripped back out in plaintext.
    #[arg(long, env = "RELAYGATE_ADMIN_KEY")]
    pub admin_key: Option<String>,

    /// Optional outbound proxy for upstream egress.
    #[arg(long, env = "RELAYGATE_PROXY")]
    pub proxy: Option<String>,

    /// Redact sensitive fields in emitted telemetry events.
    #[arg(long, env = "RELAYGATE_EVENT_REDACT_SENSITIVE")]
    pub event_redact_sensitive: Option<String>,
}
