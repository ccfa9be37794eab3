//! `lazylife` command-line tool over a shared store file.
//!
//! # Usage
//!
//! ```text
//! lazylife <db> get <key> [--global]
//! lazylife <db> set <key> <json> [--global]
//! lazylife <db> rm <key> [--global]
//! lazylife <db> keys
//! lazylife <db> whoami
//! lazylife <db> login <user>
//! lazylife <db> logout
//! lazylife <db> watch <key> [--global]
//! ```
//!
//! `LAZYLIFE_CONFIG` points at an optional JSON config file and
//! `LAZYLIFE_LOG_DIR` (absolute) enables file logging.

use lazylife_store::{
    init_logging_from_config, KeyScope, SqliteMedium, StorageContext, StorageMedium, StoreConfig,
    WriteOutcome,
};
use log::info;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const USAGE: &str = "usage: lazylife <db> <get|set|rm|keys|whoami|login|logout|watch> [args] [--global]";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Get { key: String, scope: KeyScope },
    Set { key: String, json: String, scope: KeyScope },
    Remove { key: String, scope: KeyScope },
    Keys,
    WhoAmI,
    Login { user: String },
    Logout,
    Watch { key: String, scope: KeyScope },
}

#[derive(Debug, PartialEq, Eq)]
struct Invocation {
    db_path: String,
    command: Command,
}

fn parse_args(args: &[&str]) -> Result<Invocation, String> {
    let global = args.contains(&"--global");
    let positional: Vec<&str> = args
        .iter()
        .copied()
        .filter(|arg| *arg != "--global")
        .collect();
    let scope = if global {
        KeyScope::Global
    } else {
        KeyScope::Identity
    };

    let (db_path, rest) = match positional.split_first() {
        Some((db_path, rest)) => (db_path.to_string(), rest),
        None => return Err(USAGE.to_string()),
    };

    let command = match rest {
        ["get", key] => Command::Get {
            key: key.to_string(),
            scope,
        },
        ["set", key, json] => Command::Set {
            key: key.to_string(),
            json: json.to_string(),
            scope,
        },
        ["rm", key] => Command::Remove {
            key: key.to_string(),
            scope,
        },
        ["keys"] => Command::Keys,
        ["whoami"] => Command::WhoAmI,
        ["login", user] => Command::Login {
            user: user.to_string(),
        },
        ["logout"] => Command::Logout,
        ["watch", key] => Command::Watch {
            key: key.to_string(),
            scope,
        },
        [] => return Err(USAGE.to_string()),
        [other, ..] => return Err(format!("unknown or malformed command `{other}`\n{USAGE}")),
    };

    Ok(Invocation { db_path, command })
}

fn load_config() -> Result<StoreConfig, String> {
    match std::env::var("LAZYLIFE_CONFIG") {
        Ok(path) => StoreConfig::load(&path).map_err(|err| format!("config `{path}`: {err}")),
        Err(_) => Ok(StoreConfig::default()),
    }
}

/// Refuses direct edits of the session marker.
fn ensure_writable(context: &StorageContext, namespace: &str) -> Result<(), String> {
    if namespace == context.resolver().session_key() {
        return Err(format!(
            "`{namespace}` is reserved for the session marker; use login/logout"
        ));
    }
    Ok(())
}

fn run(invocation: Invocation, config: &StoreConfig) -> Result<(), String> {
    let medium = SqliteMedium::open(&invocation.db_path)
        .map_err(|err| format!("cannot open `{}`: {err}", invocation.db_path))?
        .with_quota(config.quota_bytes);
    let context = StorageContext::with_config(Arc::new(medium), config);
    info!(
        "event=cli_command module=cli status=ok command={:?}",
        invocation.command
    );

    match invocation.command {
        Command::Get { key, scope } => {
            let namespace = context.resolve_namespace(&key, scope);
            match context.accessor().read_raw(&namespace) {
                Some(raw) => println!("{raw}"),
                None => println!("null"),
            }
        }
        Command::Set { key, json, scope } => {
            let value: serde_json::Value =
                serde_json::from_str(&json).map_err(|err| format!("invalid JSON value: {err}"))?;
            let namespace = context.resolve_namespace(&key, scope);
            ensure_writable(&context, &namespace)?;
            match context.accessor().write(&namespace, &value) {
                WriteOutcome::Persisted => println!("saved {namespace}"),
                WriteOutcome::Unchanged => println!("unchanged {namespace}"),
                WriteOutcome::Failed => return Err(format!("failed to persist {namespace}")),
            }
        }
        Command::Remove { key, scope } => {
            let namespace = context.resolve_namespace(&key, scope);
            ensure_writable(&context, &namespace)?;
            if context.accessor().remove(&namespace) == WriteOutcome::Failed {
                return Err(format!("failed to remove {namespace}"));
            }
            println!("removed {namespace}");
        }
        Command::Keys => {
            let keys = context
                .medium()
                .keys()
                .map_err(|err| format!("cannot list keys: {err}"))?;
            for key in keys {
                println!("{key}");
            }
        }
        Command::WhoAmI => println!("{}", context.identity()),
        Command::Login { user } => {
            let identity = context
                .session()
                .impersonate(&user)
                .map_err(|err| err.to_string())?;
            println!("signed in as {identity}");
        }
        Command::Logout => {
            context
                .session()
                .logout(None)
                .map_err(|err| err.to_string())?;
            println!("continuing as guest");
        }
        Command::Watch { key, scope } => watch(&context, &key, scope),
    }
    Ok(())
}

fn watch(context: &StorageContext, key: &str, scope: KeyScope) {
    let binding = context.bind(key, serde_json::Value::Null, scope);
    println!("{} = {}", binding.namespace(), binding.value());

    let namespace_key = key.to_string();
    let resolver_context = context.clone();
    binding.on_change(move |value| {
        let namespace = resolver_context.resolve_namespace(&namespace_key, scope);
        println!("{namespace} = {value}");
    });

    let _polling = context.start_polling();
    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let arg_refs: Vec<&str> = args[1..].iter().map(|s| s.as_str()).collect();

    let invocation = match parse_args(&arg_refs) {
        Ok(invocation) => invocation,
        Err(err) => {
            eprintln!("lazylife: {err}");
            process::exit(1);
        }
    };

    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("lazylife: {err}");
            process::exit(1);
        }
    };

    if let Ok(log_dir) = std::env::var("LAZYLIFE_LOG_DIR") {
        if let Err(err) = init_logging_from_config(&config, &log_dir) {
            eprintln!("lazylife: logging disabled ({err})");
        }
    }

    if let Err(err) = run(invocation, &config) {
        eprintln!("lazylife: {err}");
        process::exit(1);
    }
}
