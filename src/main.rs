#![cfg_attr(not(test), deny(clippy::panic))]

use anyhow::Context;
use axum::http::{Extensions, HeaderName, HeaderValue};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use token_binding_gate::config::{self, Config};
use token_binding_gate::headers::RequestHeaders;
use token_binding_gate::logging;
use token_binding_gate::pipeline::{PipelineOutcome, PipelineResult, TokenBindingEnv};
use token_binding_gate::protocol::{decode, KeyParameters, KeyType};
use token_binding_gate::security::{
    Ekm, ExtensionTlsProvider, FixedTlsSession, ProtocolVersion, Rfc8471Verifier,
    SessionProvider, TlsConnection, TlsSessionHandle,
};
use token_binding_gate::{TokenBindingPipeline, VerificationCache};

/// Token Binding Gate -- per-request TLS Token Binding verification
#[derive(Parser, Debug)]
#[command(name = "token-binding-gate")]
#[command(about = "Verify Sec-Token-Binding headers against TLS exported keying material")]
#[command(version, arg_required_else_help = true)]
struct Cli {
    /// Validate configuration and exit.
    #[arg(long, short = 'c', conflicts_with = "print_config")]
    validate_config: bool,

    /// Print the loaded configuration to stdout (as JSON) and exit.
    #[arg(long, conflicts_with = "validate_config")]
    print_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one Sec-Token-Binding header through the pipeline offline and print the result as JSON
    Verify(VerifyArgs),
}

#[derive(Args, Debug)]
struct VerifyArgs {
    /// Sec-Token-Binding header value (base64url)
    #[arg(long)]
    header: String,

    /// Exported keying material of the connection (base64url, 32 bytes)
    #[arg(long)]
    ekm: String,

    /// Negotiated key parameters: rsa2048_pkcs1.5, rsa2048_pss, ecdsap256, or a raw value
    #[arg(long, value_parser = parse_key_parameters, default_value = "ecdsap256")]
    key_type: KeyParameters,

    /// Emit pipeline logs before the JSON report
    #[arg(long, short = 'v')]
    verbose: bool,
}

fn parse_key_parameters(raw: &str) -> Result<KeyParameters, String> {
    if let Ok(key_type) = raw.parse::<KeyType>() {
        return Ok(key_type.into());
    }
    raw.parse::<u8>()
        .map(KeyParameters)
        .map_err(|_| format!("'{raw}' is neither a key type name nor a value in 0..=255"))
}

#[derive(Serialize)]
struct VerifyReport<'a> {
    outcome: &'static str,
    disposition: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    variables: &'a TokenBindingEnv,
}

impl<'a> VerifyReport<'a> {
    fn new(result: &'a PipelineResult) -> Self {
        let detail = match &result.outcome {
            PipelineOutcome::Passthrough(reason) => Some(reason.to_string()),
            PipelineOutcome::Malformed(err) => Some(err.to_string()),
            PipelineOutcome::VerificationFailed(reason) => Some(reason.to_string()),
            PipelineOutcome::Verified {
                context_bound: false,
                ..
            } => Some("termination context not available".to_string()),
            PipelineOutcome::CacheHit(_) | PipelineOutcome::Verified { .. } => None,
        };

        Self {
            outcome: result.outcome.label(),
            disposition: if result.disposition.is_reject() {
                "reject"
            } else {
                "continue"
            },
            detail,
            variables: &result.env,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load();

    if cli.print_config {
        let json = serde_json::to_string_pretty(&cfg).context("failed to serialize config")?;
        println!("{json}");
        return Ok(());
    }

    if cli.validate_config {
        match config::validate_config(&cfg) {
            Ok(()) => {
                println!("Configuration validation passed");
                println!();
                println!("Configuration summary:");
                println!("  Token binding enabled: {}", cfg.token_binding.enabled);
                println!(
                    "  Variables: {}, {}, {}",
                    cfg.token_binding.provided_env_var,
                    cfg.token_binding.referred_env_var,
                    cfg.token_binding.context_env_var
                );
                println!(
                    "  On verification failure: {:?}",
                    cfg.token_binding.on_verification_failure
                );
                println!(
                    "  Cache: capacity {}, ttl {}s",
                    cfg.token_binding.cache.capacity, cfg.token_binding.cache.ttl_secs
                );
                return Ok(());
            }
            Err(e) => {
                eprintln!("Configuration validation failed:\n{e:#}");
                std::process::exit(1);
            }
        }
    }

    match cli.command {
        Some(Command::Verify(args)) => run_verify(&cfg, &args),
        None => Ok(()),
    }
}

fn run_verify(cfg: &Config, args: &VerifyArgs) -> anyhow::Result<()> {
    config::validate_config(cfg)?;
    let _log_guard = args.verbose.then(|| logging::init_with_config(&cfg.logging));

    let ekm_bytes = decode(&args.ekm).context("--ekm is not valid base64url")?;
    let ekm = Ekm::from_slice(&ekm_bytes).context("--ekm has the wrong length")?;

    let cache = VerificationCache::new(
        cfg.token_binding.cache.settings(),
        Arc::new(Rfc8471Verifier),
    )
    .context("failed to create verification cache")?;
    let pipeline = TokenBindingPipeline::from_config(
        &cfg.token_binding,
        SessionProvider::available(ExtensionTlsProvider),
        Arc::new(cache),
    );

    let mut extensions = Extensions::new();
    extensions.insert(TlsConnection {
        session: Some(TlsSessionHandle::new(FixedTlsSession {
            key_parameters: Some(args.key_type),
            ekm: Some(ekm),
            version: ProtocolVersion::V1_0,
        })),
    });

    let mut headers = RequestHeaders::new();
    headers.append(
        HeaderName::from_static("sec-token-binding"),
        HeaderValue::from_str(args.header.trim()).context("--header is not a valid header value")?,
    );

    let result = pipeline.process(headers, &extensions);
    let json = serde_json::to_string_pretty(&VerifyReport::new(&result))
        .context("failed to serialize report")?;
    println!("{json}");

    if result.disposition.is_reject() {
        std::process::exit(2);
    }
    Ok(())
}
