//! Config subcommand handlers.

use crate::cli::{ConfigArgs, ConfigCommand, ConfigInitArgs, GlobalOpts};
use crate::config::{self, Config, KEYRING_SERVICE, Profile};
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

/// Format config for display, masking sensitive fields.
fn format_config_redacted(cfg: &Config) -> String {
    use std::fmt::Write;
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", cfg.defaults.output);
    let _ = writeln!(out, "color = \"{}\"", cfg.defaults.color);
    let _ = writeln!(out, "timeout = {}", cfg.defaults.timeout);

    let mut names: Vec<_> = cfg.profiles.keys().collect();
    names.sort();
    for name in names {
        let p = &cfg.profiles[name];
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let _ = writeln!(out, "server = \"{}\"", p.server);
        if let Some(ref notify) = p.notify_server {
            let _ = writeln!(out, "notify_server = \"{notify}\"");
        }
        let _ = writeln!(out, "study = \"{}\"", p.study);
        let _ = writeln!(out, "root_network = \"{}\"", p.root_network);
        if p.token.is_some() {
            let _ = writeln!(out, "token = \"****\"");
        }
        if let Some(ref env) = p.token_env {
            let _ = writeln!(out, "token_env = \"{env}\"");
        }
        if let Some(ref ca) = p.ca_cert {
            let _ = writeln!(out, "ca_cert = \"{}\"", ca.display());
        }
        if let Some(insecure) = p.insecure {
            let _ = writeln!(out, "insecure = {insecure}");
        }
        if let Some(timeout) = p.timeout {
            let _ = writeln!(out, "timeout = {timeout}");
        }
        if let Some(policy) = p.failure_policy {
            let _ = writeln!(out, "failure_policy = \"{policy}\"");
        }
        if let Some(ref types) = p.types {
            let quoted: Vec<_> = types.iter().map(|t| format!("\"{t}\"")).collect();
            let _ = writeln!(out, "types = [{}]", quoted.join(", "));
        }
        if let Some(notifications) = p.notifications {
            let _ = writeln!(out, "notifications = {notifications}");
        }
    }

    out
}

fn keyring_err(e: impl std::fmt::Display) -> CliError {
    CliError::Keyring {
        reason: e.to_string(),
    }
}

fn init(args: ConfigInitArgs, cfg: &mut Config) -> Result<(), CliError> {
    config::parse_url("server", &args.server)?;
    config::parse_uuid("study", &args.study)?;
    config::parse_uuid("root_network", &args.root_network)?;
    if let Some(ref notify) = args.notify_server {
        config::parse_url("notify_server", notify)?;
    }

    let profile = Profile {
        server: args.server,
        notify_server: args.notify_server,
        study: args.study,
        root_network: args.root_network,
        token_env: args.token_env,
        ..Profile::default()
    };
    if args.default || cfg.profiles.is_empty() {
        cfg.default_profile = Some(args.name.clone());
    }
    cfg.profiles.insert(args.name, profile);
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init(init_args) => {
            let mut cfg = config::load_config_or_default();
            let name = init_args.name.clone();
            init(init_args, &mut cfg)?;
            let path = config::save_config(&cfg)?;
            if !global.quiet {
                eprintln!("Profile '{name}' saved to {}", path.display());
            }
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load_config_or_default();
            output::print_output(&format_config_redacted(&cfg), global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config_or_default();
            if !cfg.profiles.contains_key(&name) {
                let mut available: Vec<_> = cfg.profiles.keys().cloned().collect();
                available.sort();
                return Err(CliError::ProfileNotFound {
                    name,
                    available: available.join(", "),
                });
            }
            cfg.default_profile = Some(name);
            config::save_config(&cfg)?;
            Ok(())
        }

        ConfigCommand::SetToken { token } => {
            let cfg = config::load_config_or_default();
            let profile_name = config::active_profile_name(global, &cfg);
            let entry = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/token"))
                .map_err(keyring_err)?;
            entry.set_password(&token).map_err(keyring_err)?;
            if !global.quiet {
                eprintln!("Token for profile '{profile_name}' stored in system keyring");
            }
            Ok(())
        }
    }
}
