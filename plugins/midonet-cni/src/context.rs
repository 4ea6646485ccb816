//! Per-invocation request context

use crate::config::{CniEnv, Command};
use tracing::{Span, info_span};

/// Tenant used when the runtime passes no pod namespace.
pub const DEFAULT_TENANT: &str = "default";

/// Correlation data of one CNI invocation.
///
/// Every log line of the request is emitted inside [`Context::span`].
#[derive(Debug, Clone)]
pub struct Context {
    pub command: Command,
    /// Idempotence key: the pod infra container id when known
    pub container_id: String,
    /// `CNI_CONTAINERID` as passed by the runtime
    pub cni_container_id: String,
    pub tenant: String,
    pub pod_name: String,
    pub host_ifname: String,
    span: Span,
}

impl Context {
    pub fn new(env: &CniEnv) -> Self {
        let tenant = match env.args.pod_namespace.trim() {
            "" => DEFAULT_TENANT.to_string(),
            namespace => namespace.to_string(),
        };
        let container_id = env.key().to_string();
        let span = info_span!(
            "cni",
            command = %env.command,
            container_id = %container_id,
            tenant = %tenant
        );

        Self {
            command: env.command,
            container_id,
            cni_container_id: env.container_id.clone(),
            tenant,
            pod_name: env.args.pod_name.clone(),
            host_ifname: env.host_ifname(),
            span,
        }
    }

    /// Span every log line of the request is recorded under.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::K8sArgs;

    fn env(args: &str) -> CniEnv {
        CniEnv {
            command: Command::Add,
            container_id: "0123456789abcdef".to_string(),
            netns: "/proc/1/ns/net".to_string(),
            ifname: "eth0".to_string(),
            args: K8sArgs::parse(args).unwrap(),
        }
    }

    #[test]
    fn test_context_fields() {
        let ctx = Context::new(&env("K8S_POD_NAMESPACE=ns1;K8S_POD_NAME=web-1;K8S_POD_INFRA_CONTAINER_ID=infra1"));
        assert_eq!(ctx.tenant, "ns1");
        assert_eq!(ctx.container_id, "infra1");
        assert_eq!(ctx.cni_container_id, "0123456789abcdef");
        assert_eq!(ctx.pod_name, "web-1");
        assert_eq!(ctx.host_ifname, "vif0123456789ab");
    }

    #[test]
    fn test_missing_namespace_uses_default_tenant() {
        let ctx = Context::new(&env(""));
        assert_eq!(ctx.tenant, DEFAULT_TENANT);
        assert_eq!(ctx.container_id, "0123456789abcdef");
    }
}
