//! `--pool` argument parsing

use std::str::FromStr;

use redpool::{DatabaseResult, PoolRole, RedisDatabase};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoolSpecError {
    #[error("expected NAME=ROLE or NAME=HOST:PORT:ROLE, got '{0}'")]
    Malformed(String),

    #[error("invalid port '{0}'")]
    Port(String),

    #[error("unknown role '{0}'")]
    Role(String),
}

/// One pool given on the command line
///
/// `primary=writable` inherits the endpoint from the shared properties;
/// `replica=10.0.0.2:6380:read_only` names its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSpec {
    pub name: String,
    pub endpoint: Option<(String, u16)>,
    pub role: PoolRole,
}

impl FromStr for PoolSpec {
    type Err = PoolSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, rest) = s
            .split_once('=')
            .filter(|(name, rest)| !name.is_empty() && !rest.is_empty())
            .ok_or_else(|| PoolSpecError::Malformed(s.to_string()))?;

        // HOST may itself contain colons (IPv6), so split from the right
        let mut parts = rest.rsplitn(3, ':');
        let role_part = parts.next().unwrap_or_default();
        let role = role_part
            .parse::<PoolRole>()
            .map_err(|_| PoolSpecError::Role(role_part.to_string()))?;

        let endpoint = match (parts.next(), parts.next()) {
            (None, None) => None,
            (Some(port), Some(host)) if !host.is_empty() => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| PoolSpecError::Port(port.to_string()))?;
                let host = host.trim_start_matches('[').trim_end_matches(']');
                Some((host.to_string(), port))
            }
            _ => return Err(PoolSpecError::Malformed(s.to_string())),
        };

        Ok(Self {
            name: name.to_string(),
            endpoint,
            role,
        })
    }
}

/// Build an unconnected registry from the parsed specs
pub fn registry(specs: &[PoolSpec]) -> DatabaseResult<RedisDatabase> {
    if specs.is_empty() {
        return RedisDatabase::new().with_role("primary", PoolRole::Writable);
    }

    specs
        .iter()
        .try_fold(RedisDatabase::new(), |database, spec| match &spec.endpoint {
            Some((host, port)) => database.with_pool(&spec.name, host, *port, spec.role),
            None => database.with_role(&spec.name, spec.role),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inherited_endpoint() {
        let spec: PoolSpec = "primary=writable".parse().unwrap();
        assert_eq!(spec.name, "primary");
        assert_eq!(spec.endpoint, None);
        assert_eq!(spec.role, PoolRole::Writable);
    }

    #[test]
    fn test_parse_explicit_endpoint() {
        let spec: PoolSpec = "r1=10.0.0.2:6380:replica".parse().unwrap();
        assert_eq!(spec.endpoint, Some(("10.0.0.2".to_string(), 6380)));
        assert_eq!(spec.role, PoolRole::ReadOnly);

        let v6: PoolSpec = "r2=[::1]:6379:read_only".parse().unwrap();
        assert_eq!(v6.endpoint, Some(("::1".to_string(), 6379)));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "noequals".parse::<PoolSpec>(),
            Err(PoolSpecError::Malformed(_))
        ));
        assert!(matches!(
            "p=host:port:writable".parse::<PoolSpec>(),
            Err(PoolSpecError::Port(_))
        ));
        assert!(matches!(
            "p=10.0.0.1:6379:leader".parse::<PoolSpec>(),
            Err(PoolSpecError::Role(_))
        ));
        assert!(matches!(
            "p=6379:writable".parse::<PoolSpec>(),
            Err(PoolSpecError::Malformed(_))
        ));
    }

    #[test]
    fn test_default_registry_has_a_primary() {
        let database = registry(&[]).unwrap();
        let pools = database.pools();
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].name(), "primary");
        assert!(pools[0].is_writable());
    }
}
