//! `chord-config`: CLI flag parsing and validation for a Chord node.
//!
//! Follows the same load-then-validate shape the rest of this codebase
//! uses for its config types: parse raw input, surface a typed
//! [`ConfigError`] via `thiserror`, never panic on user input. The only
//! difference from a file-backed config is that the "raw input" here is
//! `argv` rather than a TOML document.

use chord_ring::RingParams;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("flag '{0}' requires a value")]
    MissingValue(String),

    #[error("unrecognized flag '{0}'")]
    UnknownFlag(String),

    #[error("flag '{flag}' value '{value}' is not a valid integer")]
    NotAnInteger { flag: String, value: String },

    #[error("bind IP address is invalid: '{0}'")]
    InvalidIp(String),

    #[error("port {0} is out of range; must be in [1024, 65535]")]
    InvalidPort(i64),

    #[error("join address is invalid: '{0}'")]
    InvalidJoinAddress(String),

    #[error("interval {value}ms for '{flag}' is out of range; must be in [1, 60000]")]
    InvalidInterval { flag: &'static str, value: i64 },

    #[error("successor list size {0} is out of range; must be in [1, 32]")]
    InvalidSuccessorCount(i64),

    #[error("client name '{0}' is invalid; must match [0-9a-fA-F]*")]
    InvalidClientName(String),

    #[error("ring bit-width {0} is out of range; must be in [1, 160]")]
    InvalidRingWidth(i64),
}

/// Raw CLI arguments, one field per flag in `SPEC_FULL.md` §6, before
/// validation. Mirrors the field set of the reference implementation's
/// `Arguments` struct one-for-one.
#[derive(Debug, Clone)]
pub struct Arguments {
    pub ip_address: String,
    pub port: i64,
    pub join_address: String,
    pub join_port: i64,
    pub ts_ms: i64,
    pub tff_ms: i64,
    pub tcp_ms: i64,
    pub r: i64,
    pub client_name: String,
    pub m: i64,
}

impl Default for Arguments {
    fn default() -> Self {
        Arguments {
            ip_address: "localhost".into(),
            port: 8080,
            join_address: "Null".into(),
            join_port: 8081,
            ts_ms: 3000,
            tff_ms: 3000,
            tcp_ms: 100,
            r: 3,
            client_name: "default".into(),
            m: 64,
        }
    }
}

/// Parse `argv` (excluding the program name) into [`Arguments`], applying
/// defaults for any flag not present. Accepts `-flag value` and
/// `-flag=value` forms.
pub fn parse_args<I: IntoIterator<Item = String>>(argv: I) -> Result<Arguments, ConfigError> {
    let mut args = Arguments::default();
    let mut iter = argv.into_iter().peekable();

    while let Some(token) = iter.next() {
        let (flag, inline_value) = match token.split_once('=') {
            Some((f, v)) => (f.to_string(), Some(v.to_string())),
            None => (token, None),
        };

        let mut take_value = |flag: &str, inline: Option<String>| -> Result<String, ConfigError> {
            if let Some(v) = inline {
                return Ok(v);
            }
            iter.next()
                .ok_or_else(|| ConfigError::MissingValue(flag.to_string()))
        };

        match flag.as_str() {
            "-a" => args.ip_address = take_value(&flag, inline_value)?,
            "-p" => args.port = parse_int(&flag, &take_value(&flag, inline_value)?)?,
            "-ja" => args.join_address = take_value(&flag, inline_value)?,
            "-jp" => args.join_port = parse_int(&flag, &take_value(&flag, inline_value)?)?,
            "-ts" => args.ts_ms = parse_int(&flag, &take_value(&flag, inline_value)?)?,
            "-tff" => args.tff_ms = parse_int(&flag, &take_value(&flag, inline_value)?)?,
            "-tcp" => args.tcp_ms = parse_int(&flag, &take_value(&flag, inline_value)?)?,
            "-r" => args.r = parse_int(&flag, &take_value(&flag, inline_value)?)?,
            "-i" => args.client_name = take_value(&flag, inline_value)?,
            "-m" => args.m = parse_int(&flag, &take_value(&flag, inline_value)?)?,
            other => return Err(ConfigError::UnknownFlag(other.to_string())),
        }
    }

    Ok(args)
}

fn parse_int(flag: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| ConfigError::NotAnInteger {
        flag: flag.to_string(),
        value: value.to_string(),
    })
}

/// Whether to create a new ring or join an existing one, decided by
/// whether `-ja` was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bootstrap {
    Create,
    Join,
}

/// Validated node configuration, ready to hand to `chord-engine`.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_ip: String,
    pub bind_port: u16,
    pub bootstrap: Bootstrap,
    pub join_ip: String,
    pub join_port: u16,
    pub ts: Duration,
    pub tff: Duration,
    pub tcp: Duration,
    pub ring: RingParams,
    pub client_name: Option<String>,
}

impl NodeConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_ip, self.bind_port)
    }

    pub fn join_addr(&self) -> String {
        format!("{}:{}", self.join_ip, self.join_port)
    }
}

fn valid_ip_or_localhost(s: &str) -> bool {
    s == "localhost" || s.parse::<IpAddr>().is_ok()
}

/// Validate raw [`Arguments`] into a [`NodeConfig`], per `SPEC_FULL.md` §6.
pub fn validate(args: &Arguments) -> Result<NodeConfig, ConfigError> {
    if !valid_ip_or_localhost(&args.ip_address) {
        return Err(ConfigError::InvalidIp(args.ip_address.clone()));
    }
    if !(1024..=65535).contains(&args.port) {
        return Err(ConfigError::InvalidPort(args.port));
    }
    if !(1..=60000).contains(&args.ts_ms) {
        return Err(ConfigError::InvalidInterval {
            flag: "ts",
            value: args.ts_ms,
        });
    }
    if !(1..=60000).contains(&args.tff_ms) {
        return Err(ConfigError::InvalidInterval {
            flag: "tff",
            value: args.tff_ms,
        });
    }
    if !(1..=60000).contains(&args.tcp_ms) {
        return Err(ConfigError::InvalidInterval {
            flag: "tcp",
            value: args.tcp_ms,
        });
    }
    if !(1..=32).contains(&args.r) {
        return Err(ConfigError::InvalidSuccessorCount(args.r));
    }
    if !(1..=160).contains(&args.m) {
        return Err(ConfigError::InvalidRingWidth(args.m));
    }
    if args.client_name != "default"
        && !args
            .client_name
            .chars()
            .all(|c| c.is_ascii_hexdigit())
    {
        return Err(ConfigError::InvalidClientName(args.client_name.clone()));
    }

    let bootstrap = if args.join_address == "Null" {
        Bootstrap::Create
    } else {
        if !valid_ip_or_localhost(&args.join_address) {
            return Err(ConfigError::InvalidJoinAddress(args.join_address.clone()));
        }
        if !(1024..=65535).contains(&args.join_port) {
            return Err(ConfigError::InvalidPort(args.join_port));
        }
        Bootstrap::Join
    };

    let ring = RingParams::new(args.m as u32, args.r as usize)
        .ok_or(ConfigError::InvalidRingWidth(args.m))?;

    let client_name = if args.client_name == "default" {
        None
    } else {
        Some(args.client_name.clone())
    };

    Ok(NodeConfig {
        bind_ip: args.ip_address.clone(),
        bind_port: args.port as u16,
        bootstrap,
        join_ip: args.join_address.clone(),
        join_port: args.join_port as u16,
        ts: Duration::from_millis(args.ts_ms as u64),
        tff: Duration::from_millis(args.tff_ms as u64),
        tcp: Duration::from_millis(args.tcp_ms as u64),
        ring,
        client_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_with<F: FnOnce(&mut Arguments)>(f: F) -> Arguments {
        let mut a = Arguments::default();
        f(&mut a);
        a
    }

    #[test]
    fn defaults_validate_as_create() {
        let cfg = validate(&Arguments::default()).unwrap();
        assert_eq!(cfg.bootstrap, Bootstrap::Create);
        assert_eq!(cfg.bind_port, 8080);
        assert_eq!(cfg.ring.m, 64);
    }

    #[test]
    fn join_address_selects_join_bootstrap() {
        let args = args_with(|a| a.join_address = "127.0.0.1".into());
        let cfg = validate(&args).unwrap();
        assert_eq!(cfg.bootstrap, Bootstrap::Join);
        assert_eq!(cfg.join_addr(), "127.0.0.1:8081");
    }

    #[test]
    fn rejects_out_of_range_port() {
        let args = args_with(|a| a.port = 80);
        assert!(matches!(validate(&args), Err(ConfigError::InvalidPort(80))));
    }

    #[test]
    fn rejects_bad_ip() {
        let args = args_with(|a| a.ip_address = "not-an-ip".into());
        assert!(matches!(validate(&args), Err(ConfigError::InvalidIp(_))));
    }

    #[test]
    fn rejects_out_of_range_successor_count() {
        let args = args_with(|a| a.r = 0);
        assert!(matches!(
            validate(&args),
            Err(ConfigError::InvalidSuccessorCount(0))
        ));
        let args = args_with(|a| a.r = 33);
        assert!(matches!(
            validate(&args),
            Err(ConfigError::InvalidSuccessorCount(33))
        ));
    }

    #[test]
    fn rejects_invalid_client_name() {
        let args = args_with(|a| a.client_name = "not-hex!".into());
        assert!(matches!(
            validate(&args),
            Err(ConfigError::InvalidClientName(_))
        ));
    }

    #[test]
    fn accepts_valid_hex_client_name() {
        let args = args_with(|a| a.client_name = "1a2B3c".into());
        let cfg = validate(&args).unwrap();
        assert_eq!(cfg.client_name.as_deref(), Some("1a2B3c"));
    }

    #[test]
    fn rejects_ring_width_out_of_range() {
        let args = args_with(|a| a.m = 0);
        assert!(matches!(validate(&args), Err(ConfigError::InvalidRingWidth(0))));
        let args = args_with(|a| a.m = 161);
        assert!(matches!(
            validate(&args),
            Err(ConfigError::InvalidRingWidth(161))
        ));
    }

    #[test]
    fn parses_flags_from_argv() {
        let argv = vec![
            "-a".to_string(),
            "127.0.0.1".to_string(),
            "-p".to_string(),
            "9000".to_string(),
            "-r".to_string(),
            "5".to_string(),
        ];
        let args = parse_args(argv).unwrap();
        assert_eq!(args.ip_address, "127.0.0.1");
        assert_eq!(args.port, 9000);
        assert_eq!(args.r, 5);
    }

    #[test]
    fn parses_inline_equals_form() {
        let argv = vec!["-p=9100".to_string()];
        let args = parse_args(argv).unwrap();
        assert_eq!(args.port, 9100);
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let argv = vec!["-bogus".to_string(), "1".to_string()];
        assert!(matches!(parse_args(argv), Err(ConfigError::UnknownFlag(_))));
    }
}
