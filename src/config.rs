//! Application-level configuration loading, including the auction rule set.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::room::Role;

/// Default location on disk where the server looks for the JSON rules file.
const DEFAULT_RULES_PATH: &str = "config/rules.json";
/// Environment variable that overrides [`DEFAULT_RULES_PATH`].
const RULES_PATH_ENV: &str = "FANTABID_RULES_PATH";

/// Immutable runtime configuration shared across the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// TCP port the HTTP server binds to.
    pub port: u16,
    /// Optional shared PIN required to claim the host slot when vacant.
    pub host_pin: Option<String>,
    /// Directory holding the live snapshot and timestamped backups.
    pub data_dir: PathBuf,
    /// Minimum spacing between two debounced snapshot flushes.
    pub persist_interval: Duration,
    /// Number of timestamped backups retained before pruning.
    pub max_backups: usize,
    /// Auction rule set applied to the room.
    pub rules: AuctionRules,
}

/// Bidding and roster constraints applied by bid arbitration and finalization.
#[derive(Debug, Clone)]
pub struct AuctionRules {
    /// Accept bids exceeding the bidder's credit balance.
    pub allow_overbid: bool,
    /// Treat roster-budget violations as hard rejections instead of warnings.
    pub strict_rules: bool,
    /// Enforce the per-slot credit reserve at all.
    pub enable_roster_budget: bool,
    /// Minimum credit that must remain available per unfilled roster slot.
    pub min_credit_per_slot: u32,
    /// Target number of players per role.
    pub slots: RoleSlots,
}

/// Per-role roster slot targets.
#[derive(Debug, Clone, Copy)]
pub struct RoleSlots {
    /// Goalkeeper slots.
    pub p: u32,
    /// Defender slots.
    pub d: u32,
    /// Midfielder slots.
    pub c: u32,
    /// Forward slots.
    pub a: u32,
}

impl RoleSlots {
    /// Slot target for one role.
    pub fn get(&self, role: Role) -> u32 {
        match role {
            Role::P => self.p,
            Role::D => self.d,
            Role::C => self.c,
            Role::A => self.a,
        }
    }
}

impl Default for RoleSlots {
    fn default() -> Self {
        Self {
            p: 3,
            d: 8,
            c: 8,
            a: 6,
        }
    }
}

impl Default for AuctionRules {
    fn default() -> Self {
        Self {
            allow_overbid: false,
            strict_rules: false,
            enable_roster_budget: false,
            min_credit_per_slot: 0,
            slots: RoleSlots::default(),
        }
    }
}

impl AppConfig {
    /// Load the application configuration from the environment and the JSON
    /// rules file, falling back to built-in defaults.
    pub fn load() -> Self {
        Self {
            port: env_parse("PORT", 8080),
            host_pin: env::var("HOST_PIN").ok().filter(|pin| !pin.is_empty()),
            data_dir: env::var_os("FANTABID_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            persist_interval: Duration::from_millis(env_parse(
                "FANTABID_PERSIST_INTERVAL_MS",
                1000,
            )),
            max_backups: env_parse("FANTABID_MAX_BACKUPS", 50),
            rules: load_rules(),
        }
    }
}

/// Parse an environment variable, returning `fallback` when absent or invalid.
fn env_parse<T: std::str::FromStr>(name: &str, fallback: T) -> T {
    match env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(var = name, value = %raw, "invalid value; using default");
                fallback
            }
        },
        Err(_) => fallback,
    }
}

/// Load the auction rules file, tolerating a missing file but warning on a
/// malformed one.
fn load_rules() -> AuctionRules {
    let path = resolve_rules_path();
    match fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str::<RawRules>(&contents) {
            Ok(raw) => {
                let rules: AuctionRules = raw.into();
                info!(path = %path.display(), "loaded auction rules from config");
                rules
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to parse rules file; falling back to defaults"
                );
                AuctionRules::default()
            }
        },
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!(
                path = %path.display(),
                "rules file not found; using built-in defaults"
            );
            AuctionRules::default()
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "failed to read rules file; falling back to defaults"
            );
            AuctionRules::default()
        }
    }
}

/// Resolve the rules file path taking the environment override into account.
fn resolve_rules_path() -> PathBuf {
    env::var_os(RULES_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_RULES_PATH))
}

/// JSON representation of the rules file located at [`DEFAULT_RULES_PATH`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRules {
    #[serde(default)]
    allow_overbid: bool,
    #[serde(default)]
    strict_rules: bool,
    #[serde(default)]
    enable_roster_budget: bool,
    #[serde(default)]
    min_remaining_credit_per_slot: u32,
    #[serde(default)]
    slots: Option<RawSlots>,
}

/// JSON representation of per-role slot targets.
#[derive(Debug, Deserialize)]
struct RawSlots {
    p: Option<u32>,
    d: Option<u32>,
    c: Option<u32>,
    a: Option<u32>,
}

impl From<RawRules> for AuctionRules {
    fn from(value: RawRules) -> Self {
        let defaults = RoleSlots::default();
        let slots = value
            .slots
            .map(|raw| RoleSlots {
                p: raw.p.unwrap_or(defaults.p),
                d: raw.d.unwrap_or(defaults.d),
                c: raw.c.unwrap_or(defaults.c),
                a: raw.a.unwrap_or(defaults.a),
            })
            .unwrap_or(defaults);

        Self {
            allow_overbid: value.allow_overbid,
            strict_rules: value.strict_rules,
            enable_roster_budget: value.enable_roster_budget,
            min_credit_per_slot: value.min_remaining_credit_per_slot,
            slots,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_rules_merge_partial_slots() {
        let raw: RawRules =
            serde_json::from_str(r#"{"strictRules":true,"slots":{"p":1,"a":2}}"#).unwrap();
        let rules: AuctionRules = raw.into();
        assert!(rules.strict_rules);
        assert_eq!(rules.slots.p, 1);
        assert_eq!(rules.slots.d, 8);
        assert_eq!(rules.slots.a, 2);
    }
}
