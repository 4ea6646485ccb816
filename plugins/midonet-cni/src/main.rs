//! MidoNet CNI plugin
//!
//! Attaches Kubernetes pods to MidoNet tenant networks:
//! - one tenant network (router, uplink, NAT rules, bridges) per namespace, created on
//!   the first ADD and removed after the last DEL
//! - pod addresses from per-tenant pools kept in etcd, or from an external IP service
//! - host-side wiring through a veth controller
//!
//! The runtime calls the binary with `CNI_*` variables set and the network
//! configuration on stdin. Results and errors are written to stdout as JSON.

mod cidr;
mod config;
mod context;
mod coordinator;
mod error;
mod ipam;
mod logging;
mod provisioner;
mod records;
mod result;
mod saga;
mod store;
#[cfg(test)]
mod test_utils;
mod veth;

use crate::config::{CniEnv, Command, DEFAULT_CNI_VERSION, NetConf};
use crate::context::Context;
use crate::coordinator::Coordinator;
use crate::error::PluginError;
use crate::result::VersionResult;
use std::io::Read;
use std::process::ExitCode;
use tracing::{Instrument, info};

/// Upper bound for the configuration read from stdin.
const MAX_STDIN_BYTES: u64 = 1024 * 1024;

#[tokio::main]
async fn main() -> ExitCode {
    if std::env::args().skip(1).any(|arg| arg == "-v" || arg == "--version") {
        println!("midonet-cni {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let stdin = match read_stdin() {
        Ok(stdin) => stdin,
        Err(e) => return report(DEFAULT_CNI_VERSION, &e),
    };
    let version = requested_version(&stdin);

    match run(&stdin, &version).await {
        Ok(Some(output)) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(e) => report(&version, &e),
    }
}

fn read_stdin() -> Result<String, PluginError> {
    let mut input = String::new();
    std::io::stdin().take(MAX_STDIN_BYTES).read_to_string(&mut input)?;
    Ok(input)
}

/// `cniVersion` of the stdin document, or the default when it has none.
fn requested_version(stdin: &str) -> String {
    serde_json::from_str::<serde_json::Value>(stdin)
        .ok()
        .and_then(|doc| doc.get("cniVersion")?.as_str().map(str::to_string))
        .filter(|version| !version.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CNI_VERSION.to_string())
}

fn report(version: &str, err: &PluginError) -> ExitCode {
    println!("{}", err.to_cni_json(version));
    ExitCode::FAILURE
}

async fn run(stdin: &str, version: &str) -> Result<Option<serde_json::Value>, PluginError> {
    let env = CniEnv::from_env()?;
    if env.command == Command::Version {
        let doc = serde_json::to_value(VersionResult::new(version)).map_err(|e| PluginError::decode("version", e))?;
        return Ok(Some(doc));
    }

    let conf = NetConf::parse(stdin)?;
    if let Err(e) = logging::init(&conf.log_level, &conf.log_path) {
        eprintln!("midonet-cni: logging disabled: {:#}", e);
    }

    let ctx = Context::new(&env);
    let span = ctx.span().clone();
    info!(parent: &span, "{} for pod {} (netns {})", ctx.command, ctx.pod_name, env.netns);
    dispatch(&ctx, conf).instrument(span).await
}

async fn dispatch(ctx: &Context, conf: NetConf) -> Result<Option<serde_json::Value>, PluginError> {
    let coordinator = Coordinator::from_conf(conf)?;
    match ctx.command {
        Command::Add => {
            let result = coordinator.add_or_unwind(ctx).await?;
            info!("ADD done");
            Ok(Some(result.render()))
        }
        Command::Del => {
            coordinator.delete(ctx).await?;
            info!("DEL done");
            Ok(None)
        }
        Command::Version => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requested_version() {
        assert_eq!(requested_version(r#"{"cniVersion":"0.4.0"}"#), "0.4.0");
        assert_eq!(requested_version(r#"{"cniVersion":""}"#), DEFAULT_CNI_VERSION);
        assert_eq!(requested_version("not json"), DEFAULT_CNI_VERSION);
    }
}
