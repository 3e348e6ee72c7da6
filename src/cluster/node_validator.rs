use tracing::debug;

use super::{NodeError, Result};
use crate::{
    cluster::partition::DEFAULT_N_PARTITIONS,
    commands::Message,
    net::{Connection, Credentials, Host},
    policy::ClientPolicy,
};

/// Performs the handshake with a prospective cluster node: resolves its
/// addresses, verifies its identity and records its capabilities.
#[derive(Clone, Debug)]
pub(crate) struct NodeValidator {
    pub name: String,
    pub aliases: Vec<Host>,
    pub address: String,
    pub n_partitions: usize,
    pub supports_float: bool,
    pub rack_id: Option<usize>,
}

impl NodeValidator {
    pub fn new() -> Self {
        Self {
            name: String::new(),
            aliases: vec![],
            address: String::new(),
            n_partitions: DEFAULT_N_PARTITIONS,
            supports_float: false,
            rack_id: None,
        }
    }

    pub async fn validate_node(
        &mut self,
        policy: &ClientPolicy,
        credentials: Option<&Credentials>,
        host: &Host,
    ) -> Result<(), NodeError> {
        self.resolve_aliases(host).await?;

        let mut last_err = None;
        for alias in self.aliases.clone() {
            match self.validate_alias(policy, credentials, &alias).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    debug!(%alias, ?err, "alias validation failed");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.expect("at least one alias was tried"))
    }

    async fn resolve_aliases(&mut self, host: &Host) -> Result<(), NodeError> {
        self.aliases = host
            .to_socket_addrs()
            .await
            .map_err(|_| NodeError::NoAddress { host: host.clone() })?
            .map(|addr| Host::new(addr.ip().to_string(), addr.port()))
            .collect();
        debug!(%host, aliases = ?self.aliases, "resolved aliases");

        if self.aliases.is_empty() {
            Err(NodeError::NoAddress { host: host.clone() })
        } else {
            Ok(())
        }
    }

    async fn validate_alias(
        &mut self,
        policy: &ClientPolicy,
        credentials: Option<&Credentials>,
        alias: &Host,
    ) -> Result<(), NodeError> {
        let mut conn = Connection::open(&alias.address(), policy, credentials).await?;
        let info_map = Message::info(
            &mut conn,
            &["node", "cluster-name", "features", "partitions", "rack-id"],
        )
        .await?;

        match info_map.get("node") {
            None => return Err(NodeError::MissingNodeName),
            Some(node_name) => self.name.clone_from(node_name),
        }

        if let Some(expected) = &policy.cluster_name {
            match info_map.get("cluster-name") {
                None => return Err(NodeError::MissingClusterName),
                Some(info_name) if info_name == expected => (),
                Some(info_name) => {
                    return Err(NodeError::NameMismatch {
                        expected: expected.clone(),
                        got: info_name.clone(),
                    })
                }
            }
        }

        self.address = alias.address();

        if let Some(n_partitions) = info_map.get("partitions") {
            self.n_partitions = n_partitions
                .parse()
                .map_err(|_| NodeError::BadPartitionCount)?;
        }

        if let Some(features) = info_map.get("features") {
            self.supports_float = features.split(';').any(|feature| feature == "float");
        }

        if policy.rack_aware {
            self.rack_id = info_map.get("rack-id").and_then(|id| id.parse().ok());
        }

        conn.close().await;
        Ok(())
    }
}
