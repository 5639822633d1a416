use clap::{Arg, ArgAction, ArgMatches, Command};
use helpdesk_sync::{
    config::{load_config_from_path, save_config, Config, CONFIG_FILE_PATH},
    coordinator::{SyncNotice, UpdateCoordinator},
    logger::{self as logger, LogTag},
    subscriptions::{CurrentUser, Role},
    topics::{Credential, Topic},
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};

const DEBUG_FLAGS: [&str; 6] = [
    "debug-transport",
    "debug-heartbeat",
    "debug-subscriptions",
    "debug-poller",
    "debug-store",
    "debug-coordinator",
];

fn cli() -> Command {
    let mut command = Command::new("helpdesk-sync")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Helpdesk real-time synchronization client")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .default_value(CONFIG_FILE_PATH)
                .global(true)
                .help("Path to the TOML configuration file"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Show verbose output for every module"),
        )
        .arg(
            Arg::new("quiet")
                .long("quiet")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Only show warnings and errors"),
        )
        .subcommand(
            Command::new("watch")
                .about("Connect, synchronize and print every change")
                .arg(
                    Arg::new("token")
                        .long("token")
                        .value_name("TOKEN")
                        .env("HELPDESK_TOKEN")
                        .required(true)
                        .help("Bearer credential"),
                )
                .arg(
                    Arg::new("user-id")
                        .long("user-id")
                        .value_name("ID")
                        .required(true)
                        .help("Current user id"),
                )
                .arg(
                    Arg::new("role")
                        .long("role")
                        .value_name("ROLE")
                        .default_value("agent")
                        .help("agent, supervisor or admin"),
                ),
        )
        .subcommand(Command::new("check-config").about("Validate the configuration file"))
        .subcommand(
            Command::new("init-config")
                .about("Write the default configuration file")
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Overwrite an existing file"),
                ),
        );

    for flag in DEBUG_FLAGS {
        command = command.arg(
            Arg::new(flag)
                .long(flag)
                .action(ArgAction::SetTrue)
                .global(true)
                .hide(true),
        );
    }
    command
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    logger::init();

    let config_path = matches
        .get_one::<String>("config")
        .cloned()
        .unwrap_or_else(|| CONFIG_FILE_PATH.to_string());

    match matches.subcommand() {
        Some(("check-config", _)) => check_config(&config_path),
        Some(("init-config", sub_matches)) => {
            init_config(&config_path, sub_matches.get_flag("force"))
        }
        Some(("watch", sub_matches)) => watch(&config_path, sub_matches).await,
        _ => Ok(()),
    }
}

fn check_config(path: &str) -> anyhow::Result<()> {
    let config = match load_config_from_path(path) {
        Ok(config) => config,
        Err(e) => {
            logger::error(LogTag::Config, &format!("{}: {}", path, e));
            std::process::exit(1);
        }
    };

    println!("✅ {} is valid", path);
    println!("   push:  {}", config.transport.url);
    println!("   api:   {}", config.api.base_url);
    for topic in &config.topics {
        println!(
            "   topic: {} -> {} (poll {}ms..{}ms, x{})",
            topic.name,
            topic.endpoint,
            topic.poller.base_interval_ms,
            topic.poller.max_interval_ms,
            topic.poller.backoff_multiplier
        );
    }
    Ok(())
}

fn init_config(path: &str, force: bool) -> anyhow::Result<()> {
    if Path::new(path).exists() && !force {
        anyhow::bail!("{} already exists, pass --force to overwrite", path);
    }
    save_config(&Config::default(), path)?;
    println!("✅ Wrote default configuration to {}", path);
    Ok(())
}

async fn watch(path: &str, matches: &ArgMatches) -> anyhow::Result<()> {
    let config = load_config_from_path(path)?;

    let token = matches
        .get_one::<String>("token")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("--token is required"))?;
    let user_id = matches
        .get_one::<String>("user-id")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("--user-id is required"))?;
    let role: Role = matches
        .get_one::<String>("role")
        .map(|role| role.parse())
        .transpose()
        .map_err(|e: String| anyhow::anyhow!(e))?
        .unwrap_or(Role::Agent);

    let topics: Vec<Topic> = config
        .topics
        .iter()
        .map(|topic| Topic::from(topic.name.as_str()))
        .collect();
    let coordinator = UpdateCoordinator::from_config(config)?;

    for topic in topics {
        let name = topic.clone();
        coordinator.subscribe(&topic, move |value| {
            println!("📥 {} = {}", name, serde_json::to_string(value)?);
            Ok(())
        });
    }

    let mut notices = coordinator.notices();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => print_notice(&notice),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    logger::warning(LogTag::System, &format!("Missed {} notices", missed));
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();
    ctrlc::set_handler(move || {
        println!("\n🛑 Received Ctrl+C, shutting down...");
        signal.notify_one();
    })?;

    coordinator.initialize(Credential::new(token), CurrentUser::new(user_id, role))?;
    logger::info(LogTag::System, "Watching for changes, Ctrl+C to stop");

    shutdown.notified().await;
    coordinator.teardown();

    if let Ok(status) = serde_json::to_string_pretty(&coordinator.status()) {
        logger::info(LogTag::System, &format!("Final status:\n{}", status));
    }
    Ok(())
}

fn print_notice(notice: &SyncNotice) {
    match notice {
        SyncNotice::Connected => logger::info(LogTag::Transport, "Push channel connected"),
        SyncNotice::Disconnected { reason } => {
            logger::warning(LogTag::Transport, &format!("Push channel down ({})", reason))
        }
        SyncNotice::Reconnecting { attempt, delay_ms } => logger::info(
            LogTag::Transport,
            &format!("Reconnect attempt {} in {}ms", attempt, delay_ms),
        ),
        SyncNotice::ReconnectFailed { attempts } => logger::error(
            LogTag::Transport,
            &format!("Gave up after {} attempts, polling only", attempts),
        ),
        SyncNotice::PollFailed { topic, message, .. } => {
            logger::warning(LogTag::Poller, &format!("{}: {}", topic, message))
        }
        SyncNotice::AuthRequired { source } => logger::error(
            LogTag::System,
            &format!("Credential rejected by {}; restart with a fresh --token", source),
        ),
    }
}
